use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use hirewire_core::domain::session::{Conversation, Message, Role, TurnScope};
use hirewire_core::domain::usage::TokenUsage;

use super::{parse_timestamp, ConversationRepository, RepositoryError, SaveOutcome};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn load_recent_messages(
        &self,
        session_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at
             FROM conversation_messages
             WHERE session_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn save_message(
        &self,
        scope: &TurnScope,
        role: Role,
        content: &str,
        usage: Option<TokenUsage>,
    ) -> Result<SaveOutcome, RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let usage_json = usage
            .map(|usage| serde_json::to_string(&usage))
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("usage encode failed: {error}")))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO conversations (session_id, user_id, tenant_id, title, created_at, updated_at)
             VALUES (?, ?, ?, NULL, ?, ?)
             ON CONFLICT(session_id) DO NOTHING",
        )
        .bind(&scope.session_id)
        .bind(&scope.user_id)
        .bind(&scope.tenant_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE session_id = ?")
                .bind(&now)
                .bind(&scope.session_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO conversation_messages (
                session_id,
                user_id,
                tenant_id,
                role,
                content,
                usage_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&scope.session_id)
        .bind(&scope.user_id)
        .bind(&scope.tenant_id)
        .bind(role.as_str())
        .bind(content)
        .bind(usage_json.as_deref())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(SaveOutcome { is_new_conversation: inserted == 1 })
    }

    async fn set_conversation_title(
        &self,
        session_id: &str,
        title: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE conversations SET title = ?, updated_at = ? WHERE session_id = ?")
            .bind(title)
            .bind(Utc::now().to_rfc3339())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT session_id, user_id, tenant_id, title, created_at, updated_at
             FROM conversations
             WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }
}

fn message_from_row(row: SqliteRow) -> Result<Message, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;

    Ok(Message {
        role,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    Ok(Conversation {
        session_id: row.try_get("session_id")?,
        user_id: row.try_get("user_id")?,
        tenant_id: row.try_get("tenant_id")?,
        title: row.try_get("title")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use hirewire_core::domain::session::{Role, TurnScope};
    use hirewire_core::domain::usage::TokenUsage;

    use super::SqlConversationRepository;
    use crate::repositories::{migrated_pool, ConversationRepository};

    #[tokio::test]
    async fn first_save_creates_conversation_and_later_saves_do_not() {
        let repo = SqlConversationRepository::new(migrated_pool().await);
        let scope = TurnScope::new("s-1", "u-1", "t-1");

        let first = repo.save_message(&scope, Role::User, "hello", None).await.expect("save user");
        let second = repo
            .save_message(&scope, Role::Assistant, "hi there", Some(TokenUsage::new(10, 4)))
            .await
            .expect("save assistant");

        assert!(first.is_new_conversation);
        assert!(!second.is_new_conversation);

        let conversation =
            repo.find_conversation("s-1").await.expect("find").expect("conversation exists");
        assert_eq!(conversation.user_id, "u-1");
        assert_eq!(conversation.title, None);
    }

    #[tokio::test]
    async fn recent_messages_are_limited_and_oldest_first() {
        let repo = SqlConversationRepository::new(migrated_pool().await);
        let scope = TurnScope::new("s-2", "u-1", "t-1");

        for index in 0..5 {
            let role = if index % 2 == 0 { Role::User } else { Role::Assistant };
            repo.save_message(&scope, role, &format!("message {index}"), None)
                .await
                .expect("save message");
        }

        let recent = repo.load_recent_messages("s-2", 3).await.expect("load recent");
        let contents: Vec<&str> = recent.iter().map(|message| message.content.as_str()).collect();

        assert_eq!(contents, vec!["message 2", "message 3", "message 4"]);
        assert_eq!(recent[0].role, Role::User);
        assert!(repo.load_recent_messages("missing", 3).await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn title_is_stored_on_the_conversation() {
        let repo = SqlConversationRepository::new(migrated_pool().await);
        let scope = TurnScope::new("s-3", "u-1", "t-1");
        repo.save_message(&scope, Role::User, "find rust jobs", None).await.expect("save");

        repo.set_conversation_title("s-3", "Rust job hunt").await.expect("set title");

        let conversation = repo.find_conversation("s-3").await.expect("find").expect("exists");
        assert_eq!(conversation.title.as_deref(), Some("Rust job hunt"));
    }
}
