use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use serde::Deserialize;

use super::{error_response, internal_error};
use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/conversations").route(web::get().to(list_conversations)));
    cfg.service(
        web::resource("/api/conversations/{id}")
            .route(web::get().to(get_conversation))
            .route(web::delete().to(delete_conversation)),
    );
    cfg.service(
        web::resource("/api/conversations/{id}/messages").route(web::get().to(list_messages)),
    );
}

async fn list_conversations(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    let limit = query.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_LIST_LIMIT);
    match state.db.list_conversations(limit) {
        Ok(conversations) => HttpResponse::Ok().json(conversations),
        Err(e) => internal_error("获取对话列表失败", e),
    }
}

async fn get_conversation(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    match state.db.get_conversation(path.into_inner()) {
        Ok(Some(conversation)) => HttpResponse::Ok().json(conversation),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "对话不存在"),
        Err(e) => internal_error("获取对话失败", e),
    }
}

async fn list_messages(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let id = path.into_inner();
    match state.db.get_conversation(id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "对话不存在"),
        Err(e) => return internal_error("获取对话失败", e),
    }
    match state.db.list_messages(id) {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(e) => internal_error("获取消息失败", e),
    }
}

async fn delete_conversation(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let id = path.into_inner();
    match state.db.delete_conversation(id) {
        Ok(true) => {
            log::info!("[CONVERSATIONS] Deleted conversation {}", id);
            HttpResponse::Ok().json(serde_json::json!({ "success": true }))
        }
        Ok(false) => error_response(StatusCode::NOT_FOUND, "对话不存在"),
        Err(e) => internal_error("删除对话失败", e),
    }
}
