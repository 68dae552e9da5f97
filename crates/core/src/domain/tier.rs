use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One step of a promotion chain: a model and how long it may take to
/// produce its first content-bearing event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTier {
    pub model: String,
    pub first_token_timeout: Duration,
}

impl ModelTier {
    pub fn new(model: impl Into<String>, first_token_timeout: Duration) -> Self {
        Self { model: model.into(), first_token_timeout }
    }
}
