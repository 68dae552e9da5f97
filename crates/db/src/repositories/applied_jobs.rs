use sqlx::{sqlite::SqliteRow, Row};

use hirewire_core::domain::job::{AppliedJob, ApplicationStatus};

use super::{parse_timestamp, AppliedJobRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAppliedJobRepository {
    pool: DbPool,
}

impl SqlAppliedJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AppliedJobRepository for SqlAppliedJobRepository {
    async fn list_for_user(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<AppliedJob>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, tenant_id, company, title, url, status, created_at
             FROM applied_jobs
             WHERE user_id = ? AND tenant_id = ?
             ORDER BY created_at ASC",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(applied_job_from_row).collect()
    }

    async fn save(&self, job: AppliedJob) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO applied_jobs (id, user_id, tenant_id, company, title, url, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                company = excluded.company,
                title = excluded.title,
                url = excluded.url,
                status = excluded.status",
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.tenant_id)
        .bind(&job.company)
        .bind(&job.title)
        .bind(&job.url)
        .bind(job.status.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn applied_job_from_row(row: SqliteRow) -> Result<AppliedJob, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = ApplicationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown applied job status `{status_raw}`"))
    })?;

    Ok(AppliedJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        company: row.try_get("company")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        status,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
