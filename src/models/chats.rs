use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;

use super::pagination::{lenient_i64_opt, Page};
use super::users::UserSummary;

/// Largest message body or attachment list, measured as it travels inside a
/// realtime envelope. Both together keep an event under the 8000-byte
/// Postgres NOTIFY limit.
pub const MAX_RELAYED_PART_BYTES: usize = 3000;

/// Length of `value` once it is encoded into an event frame and the frame
/// is encoded again into an envelope.
fn relayed_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value)
        .and_then(|frame| serde_json::to_string(&frame))
        .map(|envelope| envelope.len())
        .unwrap_or(usize::MAX)
}

pub fn check_message_size(content: &str, attachments: &[Value]) -> Result<(), String> {
    if relayed_len(&content) > MAX_RELAYED_PART_BYTES {
        return Err("Message content is too long".to_string());
    }
    if relayed_len(&attachments) > MAX_RELAYED_PART_BYTES {
        return Err("Message attachments are too large".to_string());
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "chat_type", rename_all = "lowercase")]
pub enum ChatType {
    #[default]
    Direct,
    Group,
    Team,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "message_type", rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Link,
}

/// Sorted, deduplicated participant ids. Two chats with the same set of
/// people compare equal regardless of the order the client sent them in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participants(Vec<String>);

impl Participants {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids: Vec<String> = ids
            .into_iter()
            .map(Into::into)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        ids.sort();
        ids.dedup();
        Participants(ids)
    }

    pub fn key(&self) -> String {
        self.0.join(",")
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|p| p == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: ChatType,
    pub participants: Vec<String>,
    #[serde(skip_serializing)]
    pub participant_key: String,
    pub created_by: String,
    pub last_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// First participant who is not `user_id`.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        self.participants
            .iter()
            .map(String::as_str)
            .find(|p| *p != user_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: MessageType,
    pub attachments: Json<Vec<Value>>,
    pub is_read: bool,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub participant_details: Vec<UserSummary>,
    pub last_message: Option<Message>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: i64,
    pub total_pages: i64,
    pub total: i64,
}

impl PageInfo {
    pub fn new(page: Page, total: i64) -> Self {
        Self {
            current_page: page.page,
            total_pages: page.total_pages(total),
            total,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPage {
    pub chats: Vec<ChatSummary>,
    pub pagination: PageInfo,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    #[serde(flatten)]
    pub chat: ChatSummary,
    pub messages: Vec<Message>,
    pub pagination: PageInfo,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSearchPage {
    pub messages: Vec<Message>,
    pub pagination: PageInfo,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub limit: Option<i64>,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub limit: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default, rename = "type")]
    pub kind: ChatType,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: Option<String>,
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub attachments: Vec<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub message_id: Option<String>,
    pub content: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub chat_id: String,
    pub sender: String,
    pub receiver: String,
    pub content: String,
    pub kind: MessageType,
    pub attachments: Vec<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn participant_order_does_not_matter() {
        let a = Participants::new(["u2", "u1", "u3"]);
        let b = Participants::new(vec!["u3".to_string(), "u1".to_string(), "u2".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.key(), "u1,u2,u3");
    }

    #[test]
    fn duplicate_and_blank_participants_collapse() {
        let participants = Participants::new(["u1", " u1 ", "", "u2"]);
        assert_eq!(participants.as_slice(), ["u1", "u2"]);
        assert!(participants.contains("u2"));
        assert!(!participants.contains("u3"));
    }

    #[test]
    fn send_message_defaults_to_text() {
        let request: SendMessageRequest =
            serde_json::from_value(json!({"chatId": "c1", "content": "hi"})).unwrap();
        assert_eq!(request.kind, MessageType::Text);
        assert!(request.attachments.is_empty());

        let request: SendMessageRequest =
            serde_json::from_value(json!({"chatId": "c1", "content": "x", "type": "image"})).unwrap();
        assert_eq!(request.kind, MessageType::Image);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let result: Result<SendMessageRequest, _> =
            serde_json::from_value(json!({"chatId": "c1", "content": "x", "type": "video"}));
        assert!(result.is_err());
    }

    #[test]
    fn oversized_messages_are_refused_before_storage() {
        assert!(check_message_size("hello", &[]).is_ok());
        assert!(check_message_size(&"a".repeat(2500), &[]).is_ok());
        assert!(check_message_size(&"a".repeat(8000), &[]).is_err());

        // Quotes grow to four bytes each once encoded twice.
        assert!(check_message_size(&"\"".repeat(1000), &[]).is_err());

        let attachments = vec![json!({"url": "x".repeat(4000)})];
        assert!(check_message_size("hi", &attachments).is_err());
    }

    #[test]
    fn largest_accepted_message_fits_a_notify_payload() {
        let content = "a".repeat(MAX_RELAYED_PART_BYTES - 6);
        let attachments = vec![json!("b".repeat(MAX_RELAYED_PART_BYTES - 8))];
        assert!(check_message_size(&content, &attachments).is_ok());

        let now = Utc::now();
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: uuid::Uuid::new_v4().to_string(),
            sender: uuid::Uuid::new_v4().to_string(),
            receiver: uuid::Uuid::new_v4().to_string(),
            content,
            kind: MessageType::Text,
            attachments: Json(attachments),
            is_read: false,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let frame = serde_json::to_string(&json!({"event": "new-message", "data": message})).unwrap();
        let envelope = serde_json::to_string(&json!({
            "room": format!("chat:{}", message.chat_id),
            "except": uuid::Uuid::new_v4().to_string(),
            "frame": frame,
        }))
        .unwrap();
        assert!(envelope.len() < 8000, "envelope is {} bytes", envelope.len());
    }
}
