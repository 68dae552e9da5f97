use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use hirewire_core::domain::job::{AppliedJob, JobListing};
use hirewire_db::repositories::AppliedJobRepository;

use super::provider::SearchProvider;
use super::JobSearchSettings;

struct CachedListings {
    listings: Vec<JobListing>,
    expires_at: Instant,
}

struct AppliedSnapshot {
    owner: (String, String),
    jobs: Vec<AppliedJob>,
    fetched_at: Instant,
}

/// Search state shared by every turn of one session: the listing cache and
/// the applied-jobs snapshot.
pub struct JobSearchSession {
    provider: Arc<dyn SearchProvider>,
    applied_jobs: Arc<dyn AppliedJobRepository>,
    settings: JobSearchSettings,
    listings: RwLock<HashMap<(String, String), CachedListings>>,
    applied: RwLock<Option<AppliedSnapshot>>,
}

impl JobSearchSession {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        applied_jobs: Arc<dyn AppliedJobRepository>,
        settings: JobSearchSettings,
    ) -> Self {
        Self {
            provider,
            applied_jobs,
            settings,
            listings: RwLock::new(HashMap::new()),
            applied: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &JobSearchSettings {
        &self.settings
    }

    pub fn provider(&self) -> &dyn SearchProvider {
        self.provider.as_ref()
    }

    pub async fn cached(&self, tool: &str, query_key: &str) -> Option<Vec<JobListing>> {
        let listings = self.listings.read().await;
        listings
            .get(&(tool.to_string(), query_key.to_string()))
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.listings.clone())
    }

    pub async fn store(&self, tool: &str, query_key: &str, listings: Vec<JobListing>) {
        let expires_at = Instant::now() + self.settings.cache_ttl;
        let mut cache = self.listings.write().await;
        cache.retain(|_, entry| entry.expires_at > Instant::now());
        cache.insert((tool.to_string(), query_key.to_string()), CachedListings { listings, expires_at });
    }

    /// Applied / do-not-apply postings for the user, refreshed at most once per
    /// TTL window. A failed refresh yields an empty list so nothing is filtered.
    pub async fn applied_snapshot(&self, user_id: &str, tenant_id: &str) -> Vec<AppliedJob> {
        let owner = (user_id.to_string(), tenant_id.to_string());

        {
            let snapshot = self.applied.read().await;
            if let Some(jobs) = self.fresh_jobs(snapshot.as_ref(), &owner) {
                return jobs;
            }
        }

        let mut snapshot = self.applied.write().await;
        if let Some(jobs) = self.fresh_jobs(snapshot.as_ref(), &owner) {
            return jobs;
        }

        match self.applied_jobs.list_for_user(user_id, tenant_id).await {
            Ok(jobs) => {
                debug!(
                    event_name = "job_search.applied.refreshed",
                    user_id,
                    entries = jobs.len(),
                    "refreshed applied jobs snapshot"
                );
                *snapshot =
                    Some(AppliedSnapshot { owner, jobs: jobs.clone(), fetched_at: Instant::now() });
                jobs
            }
            Err(error) => {
                warn!(
                    event_name = "job_search.applied.refresh_failed",
                    user_id,
                    error = %error,
                    "applied jobs refresh failed; results will not be filtered"
                );
                Vec::new()
            }
        }
    }

    fn fresh_jobs(
        &self,
        snapshot: Option<&AppliedSnapshot>,
        owner: &(String, String),
    ) -> Option<Vec<AppliedJob>> {
        snapshot
            .filter(|snapshot| {
                &snapshot.owner == owner && snapshot.fetched_at.elapsed() < self.settings.applied_ttl
            })
            .map(|snapshot| snapshot.jobs.clone())
    }
}
