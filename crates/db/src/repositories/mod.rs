use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use hirewire_core::domain::crm::CrmEntity;
use hirewire_core::domain::job::AppliedJob;
use hirewire_core::domain::model::ModelNode;
use hirewire_core::domain::session::{Conversation, Message, Role, TurnScope};
use hirewire_core::domain::usage::TokenUsage;

pub mod applied_jobs;
pub mod conversation;
pub mod crm;
pub mod memory;
pub mod model_settings;

pub use applied_jobs::SqlAppliedJobRepository;
pub use conversation::SqlConversationRepository;
pub use crm::SqlCrmRepository;
pub use memory::{
    InMemoryAppliedJobRepository, InMemoryConversationRepository, InMemoryCrmRepository,
    InMemoryModelSettingsRepository,
};
pub use model_settings::SqlModelSettingsRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    /// True when this save created the conversation header row.
    pub is_new_conversation: bool,
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Returns up to `limit` messages, oldest first.
    async fn load_recent_messages(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn save_message(
        &self,
        scope: &TurnScope,
        role: Role,
        content: &str,
        usage: Option<TokenUsage>,
    ) -> Result<SaveOutcome, RepositoryError>;

    async fn set_conversation_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), RepositoryError>;

    async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError>;
}

#[async_trait]
pub trait AppliedJobRepository: Send + Sync {
    async fn list_for_user(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<AppliedJob>, RepositoryError>;

    async fn save(&self, job: AppliedJob) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ModelSettingsRepository: Send + Sync {
    async fn list_for_user(&self, user_id: &str)
        -> Result<Vec<(ModelNode, String)>, RepositoryError>;

    async fn save(&self, user_id: &str, node: ModelNode, model: &str)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CrmRepository: Send + Sync {
    /// Case-insensitive substring match on name or summary within one tenant.
    async fn lookup(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CrmEntity>, RepositoryError>;

    async fn save(&self, entity: CrmEntity) -> Result<(), RepositoryError>;
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
pub(crate) async fn migrated_pool() -> crate::DbPool {
    let pool = crate::connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    crate::migrations::run_pending(&pool).await.expect("run migrations");
    pool
}
