//! Tenant configuration: model endpoint, MySQL connection, GitLab connection.
//!
//! Reads return redacted secrets. A write that echoes a redacted secret back
//! keeps the stored one, so the settings form can be saved unchanged.

use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;
use std::time::Duration;

use super::internal_error;
use crate::ai::{AiClient, Message};
use crate::mcp::MysqlToolClient;
use crate::models::{config_keys, GitlabConfig, ModelConfig, MysqlConfig};
use crate::sync::{count_mysql_metadata, sync_mysql_metadata};
use crate::AppState;

const MODEL_CHECK_PROMPT: &str = "你好，请回复'测试成功'";
const MODEL_CHECK_TIMEOUT: Duration = Duration::from_secs(30);
const MODEL_CHECK_MAX_TOKENS: u32 = 50;
const MODEL_CHECK_REPLY_CHARS: usize = 200;

#[derive(Serialize)]
struct SyncReport {
    success: bool,
    message: String,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/config").route(web::get().to(get_config)));
    cfg.service(web::resource("/api/config/model").route(web::put().to(update_model_config)));
    cfg.service(web::resource("/api/config/mysql").route(web::put().to(update_mysql_config)));
    cfg.service(web::resource("/api/config/gitlab").route(web::put().to(update_gitlab_config)));
    cfg.service(web::resource("/api/config/test/model").route(web::post().to(test_model_config)));
    cfg.service(web::resource("/api/config/test/mysql").route(web::post().to(test_mysql_config)));
}

/// `incoming` unless it is the redacted form of `stored`
pub(crate) fn keep_masked_secret(incoming: String, stored: &str, masked: &str) -> String {
    if !incoming.is_empty() && incoming == masked {
        stored.to_string()
    } else {
        incoming
    }
}

async fn get_config(state: web::Data<AppState>) -> impl Responder {
    let model = state.db.get_model_config();
    let mysql = state.db.get_mysql_config();
    let gitlab = state.db.get_gitlab_config();

    match (model, mysql, gitlab) {
        (Ok(model), Ok(mysql), Ok(gitlab)) => HttpResponse::Ok().json(json!({
            "model_config": model.map(|c| c.redacted()),
            "mysql_config": mysql.map(|c| c.redacted()),
            "gitlab_config": gitlab.map(|c| c.redacted()),
        })),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => internal_error("获取配置失败", e),
    }
}

async fn update_model_config(
    state: web::Data<AppState>,
    body: web::Json<ModelConfig>,
) -> impl Responder {
    let mut incoming = body.into_inner();
    match state.db.get_model_config() {
        Ok(Some(stored)) => {
            incoming.api_key =
                keep_masked_secret(incoming.api_key, &stored.api_key, &stored.redacted().api_key);
        }
        Ok(None) => {}
        Err(e) => return internal_error("更新模型配置失败", e),
    }

    let value = match serde_json::to_value(&incoming) {
        Ok(v) => v,
        Err(e) => return internal_error("更新模型配置失败", e),
    };
    match state.db.set_config_value(config_keys::MODEL, &value) {
        Ok(()) => {
            log::info!("[CONFIG] Model config updated (model: {:?})", incoming.model);
            HttpResponse::Ok().json(json!({ "success": true, "message": "模型配置更新成功" }))
        }
        Err(e) => internal_error("更新模型配置失败", e),
    }
}

async fn update_gitlab_config(
    state: web::Data<AppState>,
    body: web::Json<GitlabConfig>,
) -> impl Responder {
    let mut incoming = body.into_inner();
    incoming.url = incoming.url.trim().trim_end_matches('/').to_string();
    incoming.groups = GitlabConfig::normalized_groups(&incoming.groups).unwrap_or_default();
    match state.db.get_gitlab_config() {
        Ok(Some(stored)) => {
            incoming.token =
                keep_masked_secret(incoming.token, &stored.token, &stored.redacted().token);
        }
        Ok(None) => {}
        Err(e) => return internal_error("更新GitLab配置失败", e),
    }

    let value = match serde_json::to_value(&incoming) {
        Ok(v) => v,
        Err(e) => return internal_error("更新GitLab配置失败", e),
    };
    match state.db.set_config_value(config_keys::GITLAB, &value) {
        Ok(()) => {
            log::info!("[CONFIG] GitLab config updated ({})", incoming.url);
            HttpResponse::Ok().json(json!({ "success": true, "message": "GitLab配置更新成功" }))
        }
        Err(e) => internal_error("更新GitLab配置失败", e),
    }
}

async fn update_mysql_config(
    state: web::Data<AppState>,
    body: web::Json<MysqlConfig>,
) -> impl Responder {
    let mut incoming = body.into_inner();
    match state.db.get_mysql_config() {
        Ok(Some(stored)) => {
            incoming.password = keep_masked_secret(
                incoming.password,
                &stored.password,
                &stored.redacted().password,
            );
        }
        Ok(None) => {}
        Err(e) => return internal_error("更新MySQL配置失败", e),
    }

    let value = match serde_json::to_value(&incoming) {
        Ok(v) => v,
        Err(e) => return internal_error("更新MySQL配置失败", e),
    };
    if let Err(e) = state.db.set_config_value(config_keys::MYSQL, &value) {
        return internal_error("更新MySQL配置失败", e);
    }
    log::info!("[CONFIG] MySQL config updated (enabled: {})", incoming.enabled);

    if !incoming.enabled {
        return HttpResponse::Ok().json(json!({ "success": true, "message": "MySQL配置更新成功" }));
    }

    let report = match refresh_mysql_metadata(&state, &incoming).await {
        Ok(message) => SyncReport {
            success: true,
            message,
        },
        Err(e) => {
            log::error!("[CONFIG] MySQL metadata sync after config update failed: {}", e);
            SyncReport {
                success: false,
                message: format!("同步失败: {}", e),
            }
        }
    };
    HttpResponse::Ok().json(json!({
        "success": report.success,
        "message": "MySQL配置更新成功",
        "sync": report,
    }))
}

async fn refresh_mysql_metadata(state: &AppState, stored: &MysqlConfig) -> Result<String, String> {
    let client = MysqlToolClient::new(Some(stored), &state.config).map_err(|e| e.to_string())?;
    log::info!("[CONFIG] Syncing MySQL metadata from {}", client.target());
    let summary = sync_mysql_metadata(&state.db, &client)
        .await
        .map_err(|e| e.to_string())?;
    Ok(summary.message())
}

/// Send one short prompt and return the start of the reply.
pub(crate) async fn check_model(client: &AiClient) -> Result<String, String> {
    let call = client.generate_with_tools(vec![Message::user(MODEL_CHECK_PROMPT)], vec![], vec![]);
    match tokio::time::timeout(MODEL_CHECK_TIMEOUT, call).await {
        Err(_) => Err("请求超时，请检查网络连接或API地址是否正确".to_string()),
        Ok(Err(e)) => Err(e.message),
        Ok(Ok(response)) => Ok(response.content.chars().take(MODEL_CHECK_REPLY_CHARS).collect()),
    }
}

fn check_failed(message: String) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": false,
        "message": format!("测试失败: {}", message),
    }))
}

/// Check a model config as submitted, before it is saved.
async fn test_model_config(
    state: web::Data<AppState>,
    body: web::Json<ModelConfig>,
) -> impl Responder {
    let mut submitted = body.into_inner();
    if let Ok(Some(stored)) = state.db.get_model_config() {
        submitted.api_key =
            keep_masked_secret(submitted.api_key, &stored.api_key, &stored.redacted().api_key);
    }
    log::info!("[CONFIG] Testing model config: {:?}", submitted.model);

    let client = match AiClient::from_model_config(&submitted) {
        Ok(client) => client
            .with_temperature(0.7)
            .with_max_tokens(MODEL_CHECK_MAX_TOKENS),
        Err(e) => return check_failed(e),
    };
    match check_model(&client).await {
        Ok(reply) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "模型配置测试成功",
            "response": reply,
        })),
        Err(e) => {
            log::error!("[CONFIG] Model config test failed: {}", e);
            check_failed(e)
        }
    }
}

/// Connect with a MySQL config as submitted and count what it can see.
async fn test_mysql_config(
    state: web::Data<AppState>,
    body: web::Json<MysqlConfig>,
) -> impl Responder {
    let mut submitted = body.into_inner();
    if let Ok(Some(stored)) = state.db.get_mysql_config() {
        submitted.password = keep_masked_secret(
            submitted.password,
            &stored.password,
            &stored.redacted().password,
        );
    }
    // A connection test runs even for a config about to be saved disabled
    submitted.enabled = true;

    let client = match MysqlToolClient::new(Some(&submitted), &state.config) {
        Ok(client) => client,
        Err(e) => return check_failed(e.to_string()),
    };
    log::info!("[CONFIG] Testing MySQL config against {}", client.target());
    match count_mysql_metadata(&client).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": "MySQL连接测试成功",
            "database_count": summary.database_count,
            "table_count": summary.table_count,
        })),
        Err(e) => {
            log::error!("[CONFIG] MySQL config test failed: {}", e);
            check_failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, AiResponse, MockAiClient};

    #[tokio::test]
    async fn test_model_check_returns_reply_head() {
        let mock = MockAiClient::new(vec![Ok(AiResponse::text("测试成功".repeat(100)))]);
        let reply = check_model(&AiClient::Mock(mock.clone())).await.unwrap();
        assert_eq!(reply.chars().count(), MODEL_CHECK_REPLY_CHARS);

        let trace = mock.get_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].input_messages[0].content, MODEL_CHECK_PROMPT);
        assert!(trace[0].input_tools.is_empty());
    }

    #[tokio::test]
    async fn test_model_check_surfaces_api_errors() {
        let mock = MockAiClient::new(vec![Err(AiError::with_status("Model API error: 401", 401))]);
        let err = check_model(&AiClient::Mock(mock)).await.unwrap_err();
        assert_eq!(err, "Model API error: 401");
    }

    #[test]
    fn test_masked_secret_keeps_stored_value() {
        let stored = ModelConfig {
            api_key: "sk-abcdef".to_string(),
            base_url: None,
            model: None,
        };
        let masked = stored.redacted().api_key;
        assert_eq!(
            keep_masked_secret(masked.clone(), &stored.api_key, &masked),
            "sk-abcdef"
        );
        assert_eq!(
            keep_masked_secret("sk-new".to_string(), &stored.api_key, &masked),
            "sk-new"
        );
        assert_eq!(keep_masked_secret(String::new(), "", ""), "");
    }
}
