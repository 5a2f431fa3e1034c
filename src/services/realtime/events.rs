use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::chats::Message;

/// Broadcast target.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    Chat(String),
    User(String),
    Global,
}

impl Room {
    pub const GLOBAL_KEY: &'static str = "global";

    pub fn key(&self) -> String {
        match self {
            Room::Chat(chat_id) => chat_id.clone(),
            Room::User(user_id) => format!("user-{}", user_id),
            Room::Global => Self::GLOBAL_KEY.to_string(),
        }
    }
}

/// Server to client frame: `{"event": "<name>", "data": ...}`.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
    MessageUpdated(Message),
    MessageDeleted {
        message_id: String,
        chat_id: String,
    },
    Typing {
        chat_id: String,
        user_id: String,
        is_typing: bool,
    },
    Connected {
        message: String,
        socket_id: String,
        worker_id: String,
    },
    JoinedChat {
        chat_id: String,
        success: bool,
    },
    JoinedRoom(String),
    LeftChat {
        chat_id: String,
        success: bool,
    },
    Pong {
        message: String,
        timestamp: DateTime<Utc>,
        worker_id: String,
    },
    UpdateOnlineUsers(Vec<String>),
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: &str) -> Self {
        ServerEvent::Error {
            message: message.to_string(),
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Client to server frame. Room ids may arrive as bare strings.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    JoinChat(String),
    JoinUserRoom(String),
    LeaveChat(String),
    Typing { chat_id: String, is_typing: bool },
    UserConnected,
    Ping,
}

#[derive(Deserialize)]
struct RawClientEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingData {
    chat_id: String,
    #[serde(default)]
    is_typing: bool,
}

/// Accepts `"id"` or `{"chatId": "id"}` / `{"userId": "id"}`.
fn room_id(data: &Value, key: &str) -> Option<String> {
    let id = match data {
        Value::String(id) => Some(id.as_str()),
        Value::Object(map) => map.get(key).and_then(Value::as_str),
        _ => None,
    };
    id.map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown event {0}")]
    Unknown(String),
    #[error("missing {1} for {0}")]
    MissingField(String, &'static str),
}

impl ClientEvent {
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let raw: RawClientEvent =
            serde_json::from_str(frame).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let missing = |field| FrameError::MissingField(raw.event.clone(), field);
        match raw.event.as_str() {
            "join-chat" => room_id(&raw.data, "chatId")
                .map(ClientEvent::JoinChat)
                .ok_or_else(|| missing("chatId")),
            "leave-chat" => room_id(&raw.data, "chatId")
                .map(ClientEvent::LeaveChat)
                .ok_or_else(|| missing("chatId")),
            "join-user-room" => room_id(&raw.data, "userId")
                .map(ClientEvent::JoinUserRoom)
                .ok_or_else(|| missing("userId")),
            "typing" => {
                let data: TypingData = serde_json::from_value(raw.data.clone())
                    .map_err(|_| missing("chatId"))?;
                Ok(ClientEvent::Typing {
                    chat_id: data.chat_id,
                    is_typing: data.is_typing,
                })
            }
            "user-connected" => Ok(ClientEvent::UserConnected),
            "ping" => Ok(ClientEvent::Ping),
            other => Err(FrameError::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn server_frames_carry_event_and_data() {
        let frame = ServerEvent::MessageDeleted {
            message_id: "m1".into(),
            chat_id: "c1".into(),
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            json!({"event": "message-deleted", "data": {"messageId": "m1", "chatId": "c1"}})
        );

        let frame = ServerEvent::UpdateOnlineUsers(vec!["u1".into()]).to_frame().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "update-online-users", "data": ["u1"]}));
    }

    #[test]
    fn typing_frames_use_camel_case_fields() {
        let frame = ServerEvent::Typing {
            chat_id: "c1".into(),
            user_id: "u1".into(),
            is_typing: true,
        }
        .to_frame()
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "typing");
        assert_eq!(value["data"]["isTyping"], true);
        assert_eq!(value["data"]["userId"], "u1");
    }

    #[test]
    fn client_frames_accept_bare_ids_and_objects() {
        assert_eq!(
            ClientEvent::parse(r#"{"event":"join-chat","data":"c1"}"#),
            Ok(ClientEvent::JoinChat("c1".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"join-chat","data":{"chatId":"c1"}}"#),
            Ok(ClientEvent::JoinChat("c1".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"join-user-room","data":"u1"}"#),
            Ok(ClientEvent::JoinUserRoom("u1".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"typing","data":{"chatId":"c1","isTyping":true,"userId":"spoofed"}}"#),
            Ok(ClientEvent::Typing {
                chat_id: "c1".into(),
                is_typing: true
            })
        );
        assert_eq!(ClientEvent::parse(r#"{"event":"ping"}"#), Ok(ClientEvent::Ping));
        assert_eq!(
            ClientEvent::parse(r#"{"event":"user-connected","data":"u1"}"#),
            Ok(ClientEvent::UserConnected)
        );
    }

    #[test]
    fn bad_client_frames_are_reported() {
        assert!(matches!(ClientEvent::parse("not json"), Err(FrameError::Malformed(_))));
        assert_eq!(
            ClientEvent::parse(r#"{"event":"shutdown"}"#),
            Err(FrameError::Unknown("shutdown".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"event":"join-chat","data":"  "}"#),
            Err(FrameError::MissingField("join-chat".into(), "chatId"))
        );
    }

    #[test]
    fn rooms_have_stable_names() {
        assert_eq!(Room::Chat("c1".into()).key(), "c1");
        assert_eq!(Room::User("u1".into()).key(), "user-u1");
        assert_eq!(Room::Global.key(), "global");
    }
}
