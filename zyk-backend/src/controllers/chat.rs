use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::{error_response, internal_error};
use crate::dispatcher::AgentRequest;
use crate::mentions::ResolvedContext;
use crate::models::{ChatMode, Conversation, Message};
use crate::AppState;

/// Conversation titles are the opening of the first message
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    /// Commit to review (code_review mode)
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

fn default_mode() -> String {
    ChatMode::Normal.as_str().to_string()
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub conversation_id: i64,
    pub message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ResolvedContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/chat").route(web::post().to(chat)));
    cfg.service(web::resource("/api/chat/stats").route(web::get().to(chat_stats)));
}

async fn chat_stats(state: web::Data<AppState>) -> impl Responder {
    match state.db.conversation_stats() {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => internal_error("统计对话失败", e),
    }
}

pub(crate) fn conversation_title(message: &str) -> String {
    let title: String = message.trim().chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        "新对话".to_string()
    } else {
        title
    }
}

async fn chat(state: web::Data<AppState>, body: web::Json<ChatRequest>) -> impl Responder {
    let request = body.into_inner();

    let Some(mode) = ChatMode::from_str(&request.mode) else {
        log::warn!("[CHAT] Rejected unknown mode '{}'", request.mode);
        return error_response(StatusCode::BAD_REQUEST, "无效的对话模式");
    };
    if request.message.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "消息不能为空");
    }

    let conversation = match load_or_create_conversation(&state, &request, mode) {
        Ok(Some(conversation)) => conversation,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "对话不存在"),
        Err(e) => return internal_error("保存对话失败", e),
    };

    if let Err(e) = state.db.add_message(conversation.id, "user", &request.message) {
        return internal_error("保存消息失败", e);
    }

    let mut agent_request = AgentRequest::new(mode, request.message.clone());
    agent_request.conversation_id = Some(conversation.id);
    agent_request.commit_sha = request.commit_sha.clone();
    agent_request.project_id = request.project_id;

    let (content, context, error) = match state.dispatcher.dispatch(&agent_request).await {
        Ok(reply) => (reply.content, reply.context, None),
        Err(e) => {
            log::error!("[CHAT] Conversation {} failed: {}", conversation.id, e);
            (format!("处理失败: {}", e), None, Some(e.to_string()))
        }
    };

    match state.db.add_message(conversation.id, "assistant", &content) {
        Ok(message) => HttpResponse::Ok().json(ChatResponse {
            success: error.is_none(),
            conversation_id: conversation.id,
            message,
            context,
            error,
        }),
        Err(e) => internal_error("保存消息失败", e),
    }
}

fn load_or_create_conversation(
    state: &AppState,
    request: &ChatRequest,
    mode: ChatMode,
) -> rusqlite::Result<Option<Conversation>> {
    match request.conversation_id {
        Some(id) => state.db.get_conversation(id),
        None => {
            let conversation = state
                .db
                .create_conversation(&conversation_title(&request.message), mode.as_str())?;
            log::info!("[CHAT] Created conversation {} ({})", conversation.id, mode);
            Ok(Some(conversation))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_title_is_cut_by_chars() {
        let long = "统".repeat(80);
        assert_eq!(conversation_title(&long).chars().count(), 50);
        assert_eq!(conversation_title("  查询订单  "), "查询订单");
        assert_eq!(conversation_title("   "), "新对话");
    }

    #[test]
    fn test_chat_request_defaults_to_normal_mode() {
        let request: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(request.mode, "normal");
        assert!(request.conversation_id.is_none());
    }
}
