use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrmEntity {
    pub id: String,
    pub tenant_id: String,
    pub entity_type: String,
    pub name: String,
    pub summary: String,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}
