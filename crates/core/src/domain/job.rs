use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListing {
    pub company: String,
    pub title: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Applied,
    DoNotApply,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::DoNotApply => "do_not_apply",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(Self::Applied),
            "do_not_apply" => Some(Self::DoNotApply),
            _ => None,
        }
    }
}

/// A posting the user applied to or asked never to be shown again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedJob {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub company: String,
    pub title: String,
    pub url: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}
