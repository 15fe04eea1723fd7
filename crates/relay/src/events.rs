//! Wire events exchanged over a relay websocket connection.

use materna_backend::ChatMessage;
use serde::{Deserialize, Serialize};

/// Events a connected client may send.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Ping,
    JoinRoom {
        room_id: String,
    },
    LeaveRoom {
        room_id: String,
    },
    SendMessage {
        room_id: String,
        message: String,
        sender_id: String,
        token: String,
    },
    Typing {
        room_id: String,
        user_id: String,
    },
    StopTyping {
        room_id: String,
        user_id: String,
    },
}

/// Events the relay pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Pong,
    ReceiveMessage { message: ChatMessage },
    UserTyping { room_id: String, user_id: String },
    UserStopTyping { room_id: String, user_id: String },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn client_events_parse_from_kebab_case_tags() {
        let event: ClientEvent = serde_json::from_str(
            r#"{"type":"send-message","roomId":"r1","message":"hi","senderId":"u1","token":"t"}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            ClientEvent::SendMessage { room_id, sender_id, .. }
                if room_id == "r1" && sender_id == "u1"
        ));

        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"join-room","roomId":"r2"}"#).unwrap();
        assert!(matches!(event, ClientEvent::JoinRoom { room_id } if room_id == "r2"));
    }

    #[test]
    fn server_events_serialize_with_kebab_case_tags() {
        let event = ServerEvent::UserTyping {
            room_id: "r1".to_string(),
            user_id: "u1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user-typing");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["userId"], "u1");

        let event = ServerEvent::ReceiveMessage {
            message: ChatMessage {
                id: "m1".to_string(),
                room_id: "r1".to_string(),
                sender_id: "u1".to_string(),
                content: "hi".to_string(),
                created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                read: false,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "receive-message");
        assert_eq!(json["message"]["senderId"], "u1");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = serde_json::from_str::<ClientEvent>(r#"{"type":"shout","roomId":"r1"}"#);
        assert!(result.is_err());
    }
}
