pub mod chat;
pub mod conversations;
pub mod health;
pub mod metadata;
pub mod settings;

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

use crate::mcp::BridgeError;
use crate::sync::SyncError;

/// `{"error": ...}` body with the given status
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(json!({ "error": message.into() }))
}

pub(crate) fn internal_error(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    log::error!("{}: {}", context, err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, err))
}

/// Sync failures: a disabled integration is the caller's problem, the rest
/// are upstream failures.
pub(crate) fn sync_error_response(err: SyncError) -> HttpResponse {
    match err {
        SyncError::Bridge(BridgeError::NotEnabled(what)) => {
            error_response(StatusCode::BAD_REQUEST, format!("{} 未启用", what))
        }
        SyncError::Bridge(e) => {
            log::error!("[SYNC] Worker failure: {}", e);
            error_response(StatusCode::BAD_GATEWAY, format!("同步失败: {}", e))
        }
        SyncError::Database(e) => internal_error("同步失败", e),
    }
}
