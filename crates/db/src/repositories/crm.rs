use sqlx::{sqlite::SqliteRow, Row};

use hirewire_core::domain::crm::CrmEntity;

use super::{parse_timestamp, CrmRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCrmRepository {
    pool: DbPool,
}

impl SqlCrmRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CrmRepository for SqlCrmRepository {
    async fn lookup(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CrmEntity>, RepositoryError> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let rows = sqlx::query(
            "SELECT id, tenant_id, entity_type, name, summary, data_json, updated_at
             FROM crm_entities
             WHERE tenant_id = ?
               AND (? IS NULL OR entity_type = ?)
               AND (name LIKE ? ESCAPE '\\' OR summary LIKE ? ESCAPE '\\')
             ORDER BY updated_at DESC, name ASC
             LIMIT ?",
        )
        .bind(tenant_id)
        .bind(entity_type)
        .bind(entity_type)
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entity_from_row).collect()
    }

    async fn save(&self, entity: CrmEntity) -> Result<(), RepositoryError> {
        let data_json = serde_json::to_string(&entity.data)
            .map_err(|error| RepositoryError::Decode(format!("crm data encode failed: {error}")))?;

        sqlx::query(
            "INSERT INTO crm_entities (id, tenant_id, entity_type, name, summary, data_json, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                entity_type = excluded.entity_type,
                name = excluded.name,
                summary = excluded.summary,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at",
        )
        .bind(&entity.id)
        .bind(&entity.tenant_id)
        .bind(&entity.entity_type)
        .bind(&entity.name)
        .bind(&entity.summary)
        .bind(data_json)
        .bind(entity.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn entity_from_row(row: SqliteRow) -> Result<CrmEntity, RepositoryError> {
    let data_raw = row.try_get::<String, _>("data_json")?;
    let data = serde_json::from_str(&data_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid crm data_json: {error}")))?;

    Ok(CrmEntity {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        entity_type: row.try_get("entity_type")?,
        name: row.try_get("name")?,
        summary: row.try_get("summary")?,
        data,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
