use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical call sites that can each run on a different model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelNode {
    Router,
    JobSearch,
    Crm,
    General,
    Evaluator,
    Title,
}

impl ModelNode {
    pub const ALL: [ModelNode; 6] =
        [Self::Router, Self::JobSearch, Self::Crm, Self::General, Self::Evaluator, Self::Title];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Router => "router",
            Self::JobSearch => "job_search",
            Self::Crm => "crm",
            Self::General => "general",
            Self::Evaluator => "evaluator",
            Self::Title => "title",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|node| node.as_str() == value)
    }
}

impl fmt::Display for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model identifier per node for one user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    models: BTreeMap<ModelNode, String>,
}

impl ModelSelection {
    pub fn get(&self, node: ModelNode) -> Option<&str> {
        self.models.get(&node).map(String::as_str)
    }

    pub fn set(&mut self, node: ModelNode, model: impl Into<String>) {
        self.models.insert(node, model.into());
    }

    /// Returns a copy where every entry of `overrides` with a non-blank model wins.
    pub fn overlay<'a>(&self, overrides: impl IntoIterator<Item = (ModelNode, &'a str)>) -> Self {
        let mut merged = self.clone();
        for (node, model) in overrides {
            if !model.trim().is_empty() {
                merged.set(node, model.trim());
            }
        }
        merged
    }

    pub fn model_for(&self, node: ModelNode) -> &str {
        self.get(node).unwrap_or_default()
    }
}
