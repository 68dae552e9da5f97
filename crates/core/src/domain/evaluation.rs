use serde::{Deserialize, Serialize};

/// Rubric family used by the quality judge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Career,
    Crm,
    General,
}

impl EvaluatorKind {
    /// Maps the last active worker to the rubric that judges its output.
    pub fn for_worker(worker: &str) -> Self {
        match worker {
            "job_search" => Self::Career,
            "crm" => Self::Crm,
            _ => Self::General,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Career => "career",
            Self::Crm => "crm",
            Self::General => "general",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorResult {
    pub feedback: String,
    pub meets_criteria: bool,
    pub needs_user_input: bool,
    pub score: u8,
    /// Set when the pass was granted because the retry ceiling was reached.
    #[serde(default)]
    pub forced: bool,
}

impl EvaluatorResult {
    pub const PASSING_SCORE: u8 = 100;

    /// Result used whenever the judge cannot produce a usable verdict.
    pub fn passing_default() -> Self {
        Self {
            feedback: String::new(),
            meets_criteria: true,
            needs_user_input: false,
            score: Self::PASSING_SCORE,
            forced: false,
        }
    }
}
