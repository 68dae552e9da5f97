use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use hirewire_core::domain::crm::CrmEntity;
use hirewire_core::domain::job::AppliedJob;
use hirewire_core::domain::model::ModelNode;
use hirewire_core::domain::session::{Conversation, Message, Role, TurnScope};
use hirewire_core::domain::usage::TokenUsage;

use super::{
    AppliedJobRepository, ConversationRepository, CrmRepository, ModelSettingsRepository,
    RepositoryError, SaveOutcome,
};

#[derive(Default)]
struct ConversationRecord {
    header: Option<Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, ConversationRecord>>,
}

impl InMemoryConversationRepository {
    /// Seeds history for a session without going through `save_message`.
    pub async fn seed(&self, scope: &TurnScope, messages: Vec<Message>) {
        let mut conversations = self.conversations.write().await;
        let record = conversations.entry(scope.session_id.clone()).or_default();
        let now = Utc::now();
        record.header.get_or_insert_with(|| Conversation {
            session_id: scope.session_id.clone(),
            user_id: scope.user_id.clone(),
            tenant_id: scope.tenant_id.clone(),
            title: None,
            created_at: now,
            updated_at: now,
        });
        record.messages.extend(messages);
    }

    pub async fn message_count(&self, session_id: &str) -> usize {
        let conversations = self.conversations.read().await;
        conversations.get(session_id).map(|record| record.messages.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn load_recent_messages(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let Some(record) = conversations.get(session_id) else {
            return Ok(Vec::new());
        };
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let start = record.messages.len().saturating_sub(limit);
        Ok(record.messages[start..].to_vec())
    }

    async fn save_message(
        &self,
        scope: &TurnScope,
        role: Role,
        content: &str,
        _usage: Option<TokenUsage>,
    ) -> Result<SaveOutcome, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let record = conversations.entry(scope.session_id.clone()).or_default();
        let now = Utc::now();

        let is_new_conversation = record.header.is_none();
        match record.header.as_mut() {
            Some(header) => header.updated_at = now,
            None => {
                record.header = Some(Conversation {
                    session_id: scope.session_id.clone(),
                    user_id: scope.user_id.clone(),
                    tenant_id: scope.tenant_id.clone(),
                    title: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }
        record.messages.push(Message::new(role, content));

        Ok(SaveOutcome { is_new_conversation })
    }

    async fn set_conversation_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(header) =
            conversations.get_mut(session_id).and_then(|record| record.header.as_mut())
        {
            header.title = Some(title.to_string());
            header.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(session_id).and_then(|record| record.header.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryAppliedJobRepository {
    jobs: RwLock<Vec<AppliedJob>>,
}

#[async_trait::async_trait]
impl AppliedJobRepository for InMemoryAppliedJobRepository {
    async fn list_for_user(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Vec<AppliedJob>, RepositoryError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|job| job.user_id == user_id && job.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn save(&self, job: AppliedJob) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        match jobs.iter_mut().find(|existing| existing.id == job.id) {
            Some(existing) => *existing = job,
            None => jobs.push(job),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryModelSettingsRepository {
    settings: RwLock<HashMap<(String, ModelNode), String>>,
}

#[async_trait::async_trait]
impl ModelSettingsRepository for InMemoryModelSettingsRepository {
    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(ModelNode, String)>, RepositoryError> {
        let settings = self.settings.read().await;
        let mut rows: Vec<(ModelNode, String)> = settings
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|((_, node), model)| (*node, model.clone()))
            .collect();
        rows.sort_by(|left, right| left.0.as_str().cmp(right.0.as_str()));
        Ok(rows)
    }

    async fn save(
        &self,
        user_id: &str,
        node: ModelNode,
        model: &str,
    ) -> Result<(), RepositoryError> {
        let mut settings = self.settings.write().await;
        settings.insert((user_id.to_string(), node), model.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCrmRepository {
    entities: RwLock<HashMap<String, CrmEntity>>,
}

#[async_trait::async_trait]
impl CrmRepository for InMemoryCrmRepository {
    async fn lookup(
        &self,
        tenant_id: &str,
        entity_type: Option<&str>,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CrmEntity>, RepositoryError> {
        let needle = query.trim().to_lowercase();
        let entities = self.entities.read().await;
        let mut hits: Vec<CrmEntity> = entities
            .values()
            .filter(|entity| entity.tenant_id == tenant_id)
            .filter(|entity| entity_type.map_or(true, |kind| entity.entity_type == kind))
            .filter(|entity| {
                entity.name.to_lowercase().contains(&needle)
                    || entity.summary.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        hits.sort_by(|left, right| {
            right.updated_at.cmp(&left.updated_at).then_with(|| left.name.cmp(&right.name))
        });
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(hits)
    }

    async fn save(&self, entity: CrmEntity) -> Result<(), RepositoryError> {
        let mut entities = self.entities.write().await;
        entities.insert(entity.id.clone(), entity);
        Ok(())
    }
}
