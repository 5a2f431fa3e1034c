use crate::models::chats::{Chat, ChatType, Message, NewMessage, Participants};
use crate::models::like_pattern;
use crate::models::pagination::Page;

use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(Clone)]
pub struct ChatRepository {
    conn: PgPool,
}

impl ChatRepository {
    pub fn new(conn: PgPool) -> Self {
        ChatRepository { conn }
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, anyhow::Error> {
        let chat = sqlx::query_as::<_, Chat>("SELECT * FROM chats WHERE id = $1")
            .bind(chat_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(chat)
    }

    /// Returns the chat for this participant set, creating it if needed. The
    /// flag is true when a new row was written.
    pub async fn get_or_create_chat(
        &self,
        name: &str,
        kind: ChatType,
        participants: &Participants,
        created_by: &str,
    ) -> Result<(Chat, bool), anyhow::Error> {
        let chat_id = Uuid::new_v4().hyphenated().to_string();

        let created = sqlx::query_as::<_, Chat>(
            r#"
                INSERT INTO chats (id, name, type, participants, participant_key, created_by)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (type, participant_key) DO NOTHING
                RETURNING *
            "#,
        )
        .bind(chat_id)
        .bind(name)
        .bind(kind)
        .bind(participants.as_slice())
        .bind(participants.key())
        .bind(created_by)
        .fetch_optional(&self.conn)
        .await?;

        if let Some(chat) = created {
            return Ok((chat, true));
        }

        let existing = sqlx::query_as::<_, Chat>(
            "SELECT * FROM chats WHERE type = $1 AND participant_key = $2",
        )
        .bind(kind)
        .bind(participants.key())
        .fetch_one(&self.conn)
        .await?;

        Ok((existing, false))
    }

    pub async fn get_chats_for_user(
        &self,
        user_id: &str,
        search: Option<&str>,
        page: Page,
    ) -> Result<(Vec<Chat>, i64), anyhow::Error> {
        let mut rows_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT c.* FROM chats c WHERE ");
        push_member_filter(&mut rows_query, user_id, search);
        rows_query.push(" ORDER BY c.updated_at DESC LIMIT ");
        rows_query.push_bind(page.limit);
        rows_query.push(" OFFSET ");
        rows_query.push_bind(page.offset());
        let chats = rows_query
            .build_query_as::<Chat>()
            .fetch_all(&self.conn)
            .await?;

        let mut total_query: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(1) FROM chats c WHERE ");
        push_member_filter(&mut total_query, user_id, search);
        let total = total_query
            .build_query_scalar::<i64>()
            .fetch_one(&self.conn)
            .await?;

        Ok((chats, total))
    }

    pub async fn get_chat_ids_for_user(&self, user_id: &str) -> Result<Vec<String>, anyhow::Error> {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM chats WHERE $1 = ANY(participants)")
            .bind(user_id)
            .fetch_all(&self.conn)
            .await?;

        Ok(ids)
    }

    /// Latest visible message of each chat.
    pub async fn get_last_messages(&self, chat_ids: &[String]) -> Result<Vec<Message>, anyhow::Error> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let messages = sqlx::query_as::<_, Message>(
            r#"SELECT DISTINCT ON (chat_id) * FROM messages
            WHERE chat_id = ANY($1) AND NOT is_deleted
            ORDER BY chat_id, created_at DESC"#,
        )
        .bind(chat_ids)
        .fetch_all(&self.conn)
        .await?;

        Ok(messages)
    }

    /// One page of visible messages, newest page first, oldest-first within
    /// the page.
    pub async fn get_messages(&self, chat_id: &str, page: Page) -> Result<(Vec<Message>, i64), anyhow::Error> {
        let mut messages = sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages WHERE chat_id = $1 AND NOT is_deleted
            ORDER BY created_at DESC LIMIT $2 OFFSET $3"#,
        )
        .bind(chat_id)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.conn)
        .await?;
        messages.reverse();

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM messages WHERE chat_id = $1 AND NOT is_deleted",
        )
        .bind(chat_id)
        .fetch_one(&self.conn)
        .await?;

        Ok((messages, total))
    }

    pub async fn insert_message(&self, message: NewMessage) -> Result<Message, anyhow::Error> {
        let message_id = Uuid::new_v4().hyphenated().to_string();
        let mut tx = self.conn.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
                INSERT INTO messages (id, chat_id, sender, receiver, content, type, attachments)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
            "#,
        )
        .bind(&message_id)
        .bind(&message.chat_id)
        .bind(&message.sender)
        .bind(&message.receiver)
        .bind(&message.content)
        .bind(message.kind)
        .bind(Json(&message.attachments))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE chats SET last_message_id = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(&message.chat_id)
        .bind(&message.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(message)
    }

    pub async fn update_message(
        &self,
        message_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<Option<Message>, anyhow::Error> {
        let message = sqlx::query_as::<_, Message>(
            r#"
                UPDATE messages SET
                    content = $3,
                    is_edited = TRUE,
                    edited_at = CURRENT_TIMESTAMP,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND sender = $2 AND NOT is_deleted
                RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(sender)
        .bind(content)
        .fetch_optional(&self.conn)
        .await?;

        Ok(message)
    }

    /// Tombstones the message and repoints the chat's last message at the
    /// newest one still visible.
    pub async fn delete_message(&self, message_id: &str, sender: &str) -> Result<Option<Message>, anyhow::Error> {
        let mut tx = self.conn.begin().await?;

        let message = sqlx::query_as::<_, Message>(
            r#"
                UPDATE messages SET
                    is_deleted = TRUE,
                    deleted_at = CURRENT_TIMESTAMP,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1 AND sender = $2 AND NOT is_deleted
                RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(sender)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(message) = &message {
            sqlx::query(
                r#"UPDATE chats SET last_message_id = (
                    SELECT id FROM messages WHERE chat_id = $1 AND NOT is_deleted
                    ORDER BY created_at DESC LIMIT 1
                ) WHERE id = $1 AND last_message_id = $2"#,
            )
            .bind(&message.chat_id)
            .bind(&message.id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(message)
    }

    pub async fn mark_read(&self, chat_id: &str, reader: &str) -> Result<u64, anyhow::Error> {
        let result = sqlx::query(
            r#"UPDATE messages SET is_read = TRUE, updated_at = CURRENT_TIMESTAMP
            WHERE chat_id = $1 AND sender <> $2 AND NOT is_read AND NOT is_deleted"#,
        )
        .bind(chat_id)
        .bind(reader)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn search_messages(
        &self,
        chat_ids: &[String],
        query: &str,
        page: Page,
    ) -> Result<(Vec<Message>, i64), anyhow::Error> {
        let pattern = like_pattern(query);

        let messages = sqlx::query_as::<_, Message>(
            r#"SELECT * FROM messages
            WHERE chat_id = ANY($1) AND content ILIKE $2 AND NOT is_deleted
            ORDER BY created_at DESC LIMIT $3 OFFSET $4"#,
        )
        .bind(chat_ids)
        .bind(&pattern)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.conn)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM messages WHERE chat_id = ANY($1) AND content ILIKE $2 AND NOT is_deleted",
        )
        .bind(chat_ids)
        .bind(&pattern)
        .fetch_one(&self.conn)
        .await?;

        Ok((messages, total))
    }
}

fn push_member_filter(query: &mut QueryBuilder<'_, Postgres>, user_id: &str, search: Option<&str>) {
    query.push_bind(user_id.to_string());
    query.push(" = ANY(c.participants)");

    if let Some(search) = search.map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = like_pattern(search);
        query.push(" AND (c.name ILIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR EXISTS (SELECT 1 FROM messages m WHERE m.id = c.last_message_id AND NOT m.is_deleted AND m.content ILIKE ");
        query.push_bind(pattern);
        query.push("))");
    }
}
