use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use hirewire_db::repositories::CrmRepository;

use super::job_search::SearchOutcome;
use super::Tool;

pub const TOOL_NAME: &str = "crm_lookup";
const MAX_ROWS: u32 = 10;

/// Tenant-scoped entity lookup for the CRM worker.
pub struct CrmLookupTool {
    repository: Arc<dyn CrmRepository>,
    tenant_id: String,
}

impl CrmLookupTool {
    pub fn new(repository: Arc<dyn CrmRepository>, tenant_id: impl Into<String>) -> Self {
        Self { repository, tenant_id: tenant_id.into() }
    }

    pub async fn lookup(&self, entity_type: Option<&str>, query: &str) -> SearchOutcome {
        let query = query.trim();
        if query.is_empty() {
            return SearchOutcome {
                results_text: "Provide a name or keyword to look up.".to_string(),
                count: 0,
            };
        }
        let entity_type = entity_type.map(str::trim).filter(|kind| !kind.is_empty());

        match self.repository.lookup(&self.tenant_id, entity_type, query, MAX_ROWS).await {
            Ok(entities) if entities.is_empty() => SearchOutcome {
                results_text: format!("No CRM records matched `{query}`."),
                count: 0,
            },
            Ok(entities) => {
                let results_text = entities
                    .iter()
                    .enumerate()
                    .map(|(index, entity)| {
                        let mut line =
                            format!("{}. [{}] {}", index + 1, entity.entity_type, entity.name);
                        if !entity.summary.trim().is_empty() {
                            line.push_str(": ");
                            line.push_str(entity.summary.trim());
                        }
                        line
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                SearchOutcome { results_text, count: entities.len() }
            }
            Err(error) => {
                warn!(
                    event_name = "crm_lookup.failed",
                    tenant_id = %self.tenant_id,
                    error = %error,
                    "crm lookup degraded"
                );
                SearchOutcome {
                    results_text: "CRM lookup is unavailable right now.".to_string(),
                    count: 0,
                }
            }
        }
    }
}

#[async_trait]
impl Tool for CrmLookupTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Look up contacts, companies and deals in the CRM by name or keyword."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "entity_type": {
                    "type": "string",
                    "description": "Optional filter such as `contact`, `company` or `deal`"
                },
                "query": { "type": "string", "description": "Name or keyword" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
        let entity_type = input.get("entity_type").and_then(Value::as_str);
        let outcome = self.lookup(entity_type, query).await;
        Ok(serde_json::to_value(outcome)?)
    }
}
