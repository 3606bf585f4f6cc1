use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Agent mode a conversation runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Normal,
    DataAnalysis,
    CodeReview,
}

impl ChatMode {
    pub const ALL: [ChatMode; 3] = [ChatMode::Normal, ChatMode::DataAnalysis, ChatMode::CodeReview];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Normal => "normal",
            ChatMode::DataAnalysis => "data_analysis",
            ChatMode::CodeReview => "code_review",
        }
    }

    /// Exact match only; mode strings come straight from the client.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(ChatMode::Normal),
            "data_analysis" => Some(ChatMode::DataAnalysis),
            "code_review" => Some(ChatMode::CodeReview),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub mode: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Totals reported by `GET /api/chat/stats`
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversationStats {
    pub total_conversations: i64,
    pub total_messages: i64,
    /// Every mode is listed, zero when unused
    pub conversations_by_mode: BTreeMap<String, i64>,
}
