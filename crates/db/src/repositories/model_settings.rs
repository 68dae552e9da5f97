use chrono::Utc;
use sqlx::Row;

use hirewire_core::domain::model::ModelNode;

use super::{ModelSettingsRepository, RepositoryError};
use crate::DbPool;

pub struct SqlModelSettingsRepository {
    pool: DbPool,
}

impl SqlModelSettingsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ModelSettingsRepository for SqlModelSettingsRepository {
    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(ModelNode, String)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT node, model FROM user_model_settings WHERE user_id = ? ORDER BY node ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let node_raw = row.try_get::<String, _>("node")?;
                let node = ModelNode::parse(&node_raw).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown model node `{node_raw}`"))
                })?;
                Ok((node, row.try_get::<String, _>("model")?))
            })
            .collect()
    }

    async fn save(
        &self,
        user_id: &str,
        node: ModelNode,
        model: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_model_settings (user_id, node, model, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(user_id, node) DO UPDATE SET
                model = excluded.model,
                updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(node.as_str())
        .bind(model)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
