use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::model::{ConversationSummary, Message};

/// Events pushed to connected clients, framed as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage(Message),
    MessageDelivered {
        message_id: i64,
        conversation_id: i64,
        delivered_at: DateTime<Utc>,
    },
    MessagesRead {
        conversation_id: i64,
        reader_id: i64,
        message_ids: Vec<i64>,
        read_at: DateTime<Utc>,
    },
    ConversationUpdated(ConversationSummary),
    Pong,
    Error {
        message: String,
    },
}

/// Body of an outgoing message, shared by the REST endpoint and the socket.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutgoingMessage {
    pub body: Option<String>,
    pub media_url: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketSend {
    pub conversation_id: i64,
    #[serde(flatten)]
    pub message: OutgoingMessage,
}

/// Events sent by clients over the socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    SendMessage(SocketSend),
    MarkRead { conversation_id: i64 },
    Ping,
}
