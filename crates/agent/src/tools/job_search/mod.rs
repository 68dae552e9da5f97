//! Rate-limited, cached job search.
//!
//! [`JobSearchSession`] lives as long as the chat session and owns the
//! listing cache and applied-jobs snapshot. [`JobSearchTool`] is built per
//! turn and enforces the per-turn call limit and the in-flight permit pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use hirewire_core::config::SearchConfig;
use hirewire_core::domain::job::JobListing;
use hirewire_core::domain::session::TurnScope;

use crate::tools::Tool;

pub mod extract;
pub mod provider;
pub mod session;

pub use provider::{OrganicResult, SearchError, SearchProvider, SerpApiProvider};
pub use session::JobSearchSession;

use extract::{
    build_search_query, extract_listing, format_listings, is_board_hosted, matches_applied,
    normalize_query,
};

pub const TOOL_NAME: &str = "search_jobs";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSearchSettings {
    pub max_calls_per_turn: u32,
    pub max_concurrent: usize,
    pub max_results: usize,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub applied_ttl: Duration,
    pub job_boards: Vec<String>,
    pub max_query_exclusions: usize,
}

impl JobSearchSettings {
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            max_calls_per_turn: config.max_calls_per_turn,
            max_concurrent: config.max_concurrent,
            max_results: config.max_results,
            timeout: Duration::from_secs(config.timeout_secs),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            applied_ttl: Duration::from_secs(config.applied_ttl_secs),
            job_boards: config.job_boards.clone(),
            max_query_exclusions: config.max_query_exclusions,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results_text: String,
    pub count: usize,
}

impl SearchOutcome {
    fn degraded(message: impl Into<String>) -> Self {
        Self { results_text: message.into(), count: 0 }
    }
}

#[derive(Default)]
struct TurnCounters {
    calls: u32,
    total_results: usize,
}

pub struct JobSearchTool {
    session: Arc<JobSearchSession>,
    scope: TurnScope,
    permits: Semaphore,
    counters: Mutex<TurnCounters>,
}

impl JobSearchTool {
    pub fn new(session: Arc<JobSearchSession>, scope: TurnScope) -> Self {
        let permits = Semaphore::new(session.settings().max_concurrent.max(1));
        Self { session, scope, permits, counters: Mutex::new(TurnCounters::default()) }
    }

    /// Never fails: every problem is reported as text for the model.
    pub async fn search(&self, query: &str) -> SearchOutcome {
        let settings = self.session.settings();
        let query_key = normalize_query(query);
        if query_key.is_empty() {
            return SearchOutcome::degraded("Provide a non-empty job search query.");
        }

        {
            let mut counters = self.counters.lock().await;
            if counters.calls >= settings.max_calls_per_turn {
                info!(
                    event_name = "job_search.limit_reached",
                    session_id = %self.scope.session_id,
                    calls = counters.calls,
                    "per-turn search limit reached"
                );
                return SearchOutcome::degraded(format!(
                    "Search limit reached for this turn ({} searches). {} listings were already \
                     found in earlier searches; present those to the user.",
                    settings.max_calls_per_turn, counters.total_results
                ));
            }
            counters.calls += 1;
        }

        if let Some(listings) = self.session.cached(TOOL_NAME, &query_key).await {
            debug!(
                event_name = "job_search.cache_hit",
                session_id = %self.scope.session_id,
                query = %query_key,
                "serving cached listings"
            );
            return self.finish(listings).await;
        }

        let permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => return SearchOutcome::degraded("Job search is shutting down."),
        };

        let search_query =
            build_search_query(query, &settings.job_boards, settings.max_query_exclusions);
        let results =
            match tokio::time::timeout(settings.timeout, self.session.provider().search(&search_query))
                .await
            {
                Ok(Ok(results)) => results,
                Ok(Err(error)) => {
                    warn!(
                        event_name = "job_search.failed",
                        session_id = %self.scope.session_id,
                        error = %error,
                        "job search degraded"
                    );
                    return SearchOutcome::degraded(format!("Job search is unavailable: {error}."));
                }
                Err(_) => {
                    warn!(
                        event_name = "job_search.timeout",
                        session_id = %self.scope.session_id,
                        timeout_secs = settings.timeout.as_secs(),
                        "job search timed out"
                    );
                    return SearchOutcome::degraded(format!(
                        "Job search timed out after {} seconds.",
                        settings.timeout.as_secs()
                    ));
                }
            };
        drop(permit);

        let applied =
            self.session.applied_snapshot(&self.scope.user_id, &self.scope.tenant_id).await;
        let raw_count = results.len();
        let mut listings: Vec<JobListing> = Vec::new();
        for result in &results {
            if result.link.trim().is_empty() || is_board_hosted(&result.link, &settings.job_boards)
            {
                continue;
            }
            let Some(listing) = extract_listing(&result.title, &result.link) else {
                continue;
            };
            if applied.iter().any(|entry| matches_applied(&listing, entry)) {
                continue;
            }
            if listings.iter().any(|existing| existing.url == listing.url) {
                continue;
            }
            listings.push(listing);
            if listings.len() >= settings.max_results {
                break;
            }
        }

        info!(
            event_name = "job_search.completed",
            session_id = %self.scope.session_id,
            raw_results = raw_count,
            kept = listings.len(),
            "job search completed"
        );

        self.session.store(TOOL_NAME, &query_key, listings.clone()).await;
        self.finish(listings).await
    }

    async fn finish(&self, listings: Vec<JobListing>) -> SearchOutcome {
        let mut counters = self.counters.lock().await;
        counters.total_results += listings.len();

        if listings.is_empty() {
            return SearchOutcome::degraded("No new job listings matched this search.");
        }
        SearchOutcome { results_text: format_listings(&listings), count: listings.len() }
    }
}

#[async_trait]
impl Tool for JobSearchTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn description(&self) -> &'static str {
        "Search the web for current job openings. Results exclude major job boards and \
         postings the user already applied to or rejected."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Role, skills and location, e.g. `senior rust engineer berlin`"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let query = input.get("query").and_then(Value::as_str).unwrap_or_default();
        let outcome = self.search(query).await;
        Ok(serde_json::to_value(outcome)?)
    }
}
