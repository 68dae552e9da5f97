use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token counts reported by the model provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output, total: input + output }
    }

    /// Keeps a provider-reported total, which may count tokens outside input and output.
    pub fn with_total(input: u64, output: u64, total: u64) -> Self {
        Self { input, output, total }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

impl Add for TokenUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input: self.input.saturating_add(rhs.input),
            output: self.output.saturating_add(rhs.output),
            total: self.total.saturating_add(rhs.total),
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
