use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::dao::{Conversation, Message};

/// Request body for `POST /chat/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub title: String,
}

/// A conversation without its transcript, as returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationSummaryResponse {
    pub id: i64,
    pub title: String,
    pub created_at: String,
    pub user_id: i64,
}

/// A conversation with its full ordered transcript.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConversationResponse {
    pub id: i64,
    pub title: String,
    pub created_at: String,
    pub user_id: i64,
    pub messages: Vec<MessageResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub id: i64,
    pub role: String,
    pub content: String,
    pub created_at: String,
    pub conversation_id: i64,
}

/// Per-request override of the caller's stored model configuration.
///
/// Each field falls back to the stored value independently; empty strings
/// count as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ModelOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// Request body for `POST /chat/stream`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ChatStreamRequest {
    /// The new user turn.
    pub message: String,
    /// Persist the turn into this conversation; omit for an ephemeral,
    /// unsaved exchange.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub conversation_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model_override: Option<ModelOverride>,
}

impl Conversation {
    pub fn to_summary_response(&self) -> ConversationSummaryResponse {
        ConversationSummaryResponse {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at.to_rfc3339(),
            user_id: self.user_id,
        }
    }

    pub fn to_response(&self, messages: Vec<Message>) -> ConversationResponse {
        ConversationResponse {
            id: self.id,
            title: self.title.clone(),
            created_at: self.created_at.to_rfc3339(),
            user_id: self.user_id,
            messages: messages.iter().map(Message::to_response).collect(),
        }
    }
}

impl Message {
    pub fn to_response(&self) -> MessageResponse {
        MessageResponse {
            id: self.id,
            role: self.role.clone(),
            content: self.content.clone(),
            created_at: self.created_at.to_rfc3339(),
            conversation_id: self.conversation_id,
        }
    }
}
