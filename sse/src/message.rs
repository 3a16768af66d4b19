//! Wire types exchanged with the host's messaging endpoints.

use serde::{Deserialize, Serialize};

/// A file carried inline with a message. `data` is base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub data: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// A message as delivered by `/events` and listed by `/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub from: String,
    pub from_name: String,
    pub message: String,
    pub message_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Body of `POST /send`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub message_type: String,
    pub attachments: Vec<Attachment>,
    pub from_name: String,
    pub from_ip: String,
}

impl SendMessageRequest {
    pub fn text(
        message: impl Into<String>,
        from_name: impl Into<String>,
        from_ip: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            message_type: "text".to_string(),
            attachments: Vec::new(),
            from_name: from_name.into(),
            from_ip: from_ip.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}
