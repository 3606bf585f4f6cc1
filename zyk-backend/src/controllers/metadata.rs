//! Cached metadata: manual sync, listings, and user annotations.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, Responder};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::{error_response, internal_error, sync_error_response};
use crate::mcp::{BridgeError, GitlabToolClient, MysqlToolClient};
use crate::models::Annotation;
use crate::sync::gitlab::DEFAULT_SYNC_COMMIT_LIMIT;
use crate::sync::{
    sync_gitlab_branches, sync_gitlab_commit_diffs, sync_gitlab_commits, sync_gitlab_metadata,
    sync_mysql_metadata,
};
use crate::AppState;

pub const REMARK_ERROR: &str = "备注仅支持中文、字母、数字、下划线";

static REMARK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\x{4e00}-\x{9fff}]+$").unwrap());

const MAX_COMMIT_LIMIT: u32 = 200;

/// Trim a remark; blank becomes `None`, anything else must match the pattern.
pub fn normalize_remark(remark: Option<&str>) -> Result<Option<String>, &'static str> {
    let Some(trimmed) = remark.map(str::trim) else {
        return Ok(None);
    };
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !REMARK_PATTERN.is_match(trimmed) {
        return Err(REMARK_ERROR);
    }
    Ok(Some(trimmed.to_string()))
}

/// Partial annotation update. An absent field is left as is; `"remark": null`
/// clears the remark.
#[derive(Debug, Default, Deserialize)]
pub struct AnnotationPatch {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub remark: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl AnnotationPatch {
    pub fn apply(&self, current: Annotation) -> Result<Annotation, &'static str> {
        let remark = match &self.remark {
            Some(remark) => normalize_remark(remark.as_deref())?,
            None => current.remark,
        };
        Ok(Annotation {
            enabled: self.enabled.unwrap_or(current.enabled),
            remark,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct TablesQuery {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct TableDetailQuery {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Deserialize)]
pub struct CommitsQuery {
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub refresh: bool,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/metadata/mysql/sync").route(web::post().to(sync_mysql)));
    cfg.service(web::resource("/api/metadata/gitlab/sync").route(web::post().to(sync_gitlab)));

    cfg.service(
        web::resource("/api/metadata/mysql/databases").route(web::get().to(list_databases)),
    );
    cfg.service(
        web::resource("/api/metadata/mysql/databases/{name}")
            .route(web::patch().to(patch_database)),
    );
    cfg.service(web::resource("/api/metadata/mysql/tables").route(web::get().to(list_tables)));
    cfg.service(
        web::resource("/api/metadata/mysql/table-detail").route(web::get().to(get_table_detail)),
    );
    cfg.service(
        web::resource("/api/metadata/mysql/databases/{database}/tables/{table}")
            .route(web::patch().to(patch_table)),
    );

    cfg.service(web::resource("/api/metadata/gitlab/users").route(web::get().to(list_users)));
    cfg.service(
        web::resource("/api/metadata/gitlab/users/{id}").route(web::patch().to(patch_user)),
    );
    cfg.service(
        web::resource("/api/metadata/gitlab/projects").route(web::get().to(list_projects)),
    );
    cfg.service(
        web::resource("/api/metadata/gitlab/projects/{id}").route(web::patch().to(patch_project)),
    );
    cfg.service(
        web::resource("/api/metadata/gitlab/projects/{id}/branches")
            .route(web::get().to(list_branches)),
    );
    cfg.service(
        web::resource("/api/metadata/gitlab/projects/{id}/commits")
            .route(web::get().to(list_commits)),
    );
    cfg.service(
        web::resource("/api/metadata/gitlab/projects/{id}/commits/{sha}/diffs")
            .route(web::get().to(list_commit_diffs)),
    );
}

fn mysql_client(state: &AppState) -> Result<MysqlToolClient, HttpResponse> {
    let stored = state
        .db
        .get_mysql_config()
        .map_err(|e| internal_error("读取MySQL配置失败", e))?;
    MysqlToolClient::new(stored.as_ref(), &state.config)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

fn gitlab_client(state: &AppState) -> Result<GitlabToolClient, HttpResponse> {
    let stored = state
        .db
        .get_gitlab_config()
        .map_err(|e| internal_error("读取GitLab配置失败", e))?;
    GitlabToolClient::new(stored.as_ref(), &state.config)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

async fn sync_mysql(state: web::Data<AppState>) -> impl Responder {
    let client = match mysql_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    log::info!("[METADATA] Manual MySQL sync from {}", client.target());
    match sync_mysql_metadata(&state.db, &client).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": summary.message(),
            "summary": summary,
        })),
        Err(e) => sync_error_response(e),
    }
}

async fn sync_gitlab(state: web::Data<AppState>) -> impl Responder {
    let client = match gitlab_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    log::info!("[METADATA] Manual GitLab sync");
    match sync_gitlab_metadata(&state.db, &client).await {
        Ok(summary) => HttpResponse::Ok().json(json!({
            "success": true,
            "message": summary.message(),
            "summary": summary,
        })),
        Err(e) => sync_error_response(e),
    }
}

async fn list_databases(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    match state.db.list_mysql_databases(query.enabled_only) {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => internal_error("获取数据库列表失败", e),
    }
}

async fn list_tables(state: web::Data<AppState>, query: web::Query<TablesQuery>) -> impl Responder {
    let database = query.database.as_deref().map(str::trim).filter(|d| !d.is_empty());
    match state.db.list_mysql_tables(database, query.enabled_only) {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => internal_error("获取表列表失败", e),
    }
}

/// Live column listing of one table, straight from the worker
pub(crate) async fn table_columns(
    client: &MysqlToolClient,
    database: &str,
    table: &str,
) -> Result<Value, BridgeError> {
    let columns = client.describe_table(table, Some(database)).await?;
    Ok(json!({ "columns": columns }))
}

async fn get_table_detail(
    state: web::Data<AppState>,
    query: web::Query<TableDetailQuery>,
) -> impl Responder {
    let database = query.database.as_deref().map(str::trim).unwrap_or_default();
    let table = query.table.as_deref().map(str::trim).unwrap_or_default();
    if database.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "缺少参数 database");
    }
    if table.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "缺少参数 table");
    }

    let client = match mysql_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match table_columns(&client, database, table).await {
        Ok(detail) => HttpResponse::Ok().json(detail),
        Err(e) => sync_error_response(e.into()),
    }
}

async fn patch_database(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AnnotationPatch>,
) -> impl Responder {
    let name = path.into_inner();
    let current = match state.db.get_mysql_database(&name) {
        Ok(Some(row)) => row,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "数据库不存在"),
        Err(e) => return internal_error("更新数据库失败", e),
    };
    let annotation = match body.apply(Annotation {
        enabled: current.enabled,
        remark: current.remark,
    }) {
        Ok(a) => a,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };
    match state.db.set_mysql_database_annotation(&name, &annotation) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => internal_error("更新数据库失败", e),
    }
}

async fn patch_table(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<AnnotationPatch>,
) -> impl Responder {
    let (database, table) = path.into_inner();
    let current = match state.db.get_mysql_table(&database, &table) {
        Ok(Some(row)) => row,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "表不存在"),
        Err(e) => return internal_error("更新表失败", e),
    };
    let annotation = match body.apply(Annotation {
        enabled: current.enabled,
        remark: current.remark,
    }) {
        Ok(a) => a,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };
    match state.db.set_mysql_table_annotation(&database, &table, &annotation) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => internal_error("更新表失败", e),
    }
}

async fn list_users(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    match state.db.list_gitlab_users(query.enabled_only) {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => internal_error("获取用户列表失败", e),
    }
}

async fn list_projects(state: web::Data<AppState>, query: web::Query<ListQuery>) -> impl Responder {
    match state.db.list_gitlab_projects(query.enabled_only) {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => internal_error("获取项目列表失败", e),
    }
}

async fn patch_user(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<AnnotationPatch>,
) -> impl Responder {
    let id = path.into_inner();
    let current = match state.db.get_gitlab_user(id) {
        Ok(Some(row)) => row,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "用户不存在"),
        Err(e) => return internal_error("更新用户失败", e),
    };
    let annotation = match body.apply(Annotation {
        enabled: current.enabled,
        remark: current.remark,
    }) {
        Ok(a) => a,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };
    match state.db.set_gitlab_user_annotation(id, &annotation) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => internal_error("更新用户失败", e),
    }
}

async fn patch_project(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<AnnotationPatch>,
) -> impl Responder {
    let id = path.into_inner();
    let current = match state.db.get_gitlab_project(id) {
        Ok(Some(row)) => row,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "项目不存在"),
        Err(e) => return internal_error("更新项目失败", e),
    };
    let annotation = match body.apply(Annotation {
        enabled: current.enabled,
        remark: current.remark,
    }) {
        Ok(a) => a,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, msg),
    };
    match state.db.set_gitlab_project_annotation(id, &annotation) {
        Ok(_) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(e) => internal_error("更新项目失败", e),
    }
}

async fn list_branches(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<RefreshQuery>,
) -> impl Responder {
    let project_id = path.into_inner();
    let cached = match state.db.list_gitlab_branches(project_id) {
        Ok(rows) => rows,
        Err(e) => return internal_error("获取分支失败", e),
    };
    if !cached.is_empty() && !query.refresh {
        return HttpResponse::Ok().json(cached);
    }

    let client = match gitlab_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match sync_gitlab_branches(&state.db, &client, project_id).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => sync_error_response(e),
    }
}

async fn list_commits(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<CommitsQuery>,
) -> impl Responder {
    let project_id = path.into_inner();
    let Some(branch) = query.branch.as_deref().map(str::trim).filter(|b| !b.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "缺少参数 branch");
    };
    let cached = match state.db.list_gitlab_commits(project_id, branch) {
        Ok(rows) => rows,
        Err(e) => return internal_error("获取提交失败", e),
    };
    if !cached.is_empty() && !query.refresh {
        return HttpResponse::Ok().json(cached);
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_SYNC_COMMIT_LIMIT)
        .clamp(1, MAX_COMMIT_LIMIT);
    let client = match gitlab_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match sync_gitlab_commits(&state.db, &client, project_id, branch, limit).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => sync_error_response(e),
    }
}

async fn list_commit_diffs(
    state: web::Data<AppState>,
    path: web::Path<(i64, String)>,
    query: web::Query<RefreshQuery>,
) -> impl Responder {
    let (project_id, sha) = path.into_inner();
    let cached = match state.db.list_gitlab_commit_diffs(project_id, &sha) {
        Ok(rows) => rows,
        Err(e) => return internal_error("获取代码差异失败", e),
    };
    if !cached.is_empty() && !query.refresh {
        return HttpResponse::Ok().json(cached);
    }

    let client = match gitlab_client(&state) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match sync_gitlab_commit_diffs(&state.db, &client, project_id, &sha).await {
        Ok(rows) => HttpResponse::Ok().json(rows),
        Err(e) => sync_error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_table_columns_wraps_worker_rows() {
        let client = crate::mcp::mysql::tests::scripted_client(
            r#"[{"Field":"id","Type":"bigint"},{"Field":"status","Type":"varchar(16)"}]"#,
        );
        let detail = table_columns(&client, "dispensing", "order_info").await.unwrap();
        assert_eq!(detail["columns"].as_array().unwrap().len(), 2);
        assert_eq!(detail["columns"][0]["Field"], "id");
    }

    #[tokio::test]
    async fn test_table_columns_passes_worker_errors() {
        let client = crate::mcp::mysql::tests::scripted_client(
            r#"{"isError":true,"content":[{"type":"text","text":"Table 'dispensing.nope' doesn't exist"}]}"#,
        );
        let err = table_columns(&client, "dispensing", "nope").await.unwrap_err();
        assert_eq!(err.to_string(), "Table 'dispensing.nope' doesn't exist");
    }

    #[test]
    fn test_normalize_remark() {
        assert_eq!(normalize_remark(None), Ok(None));
        assert_eq!(normalize_remark(Some("   ")), Ok(None));
        assert_eq!(
            normalize_remark(Some("  配送_库2 ")),
            Ok(Some("配送_库2".to_string()))
        );
        assert_eq!(normalize_remark(Some("订单 表")), Err(REMARK_ERROR));
        assert_eq!(normalize_remark(Some("orders-db")), Err(REMARK_ERROR));
    }

    #[test]
    fn test_patch_distinguishes_absent_and_null_remark() {
        let current = Annotation {
            enabled: true,
            remark: Some("配送".to_string()),
        };

        let patch: AnnotationPatch = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        let updated = patch.apply(current.clone()).unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.remark.as_deref(), Some("配送"));

        let patch: AnnotationPatch = serde_json::from_str(r#"{"remark": null}"#).unwrap();
        let updated = patch.apply(current.clone()).unwrap();
        assert!(updated.enabled);
        assert!(updated.remark.is_none());

        let patch: AnnotationPatch = serde_json::from_str(r#"{"remark": "bad remark!"}"#).unwrap();
        assert_eq!(patch.apply(current).unwrap_err(), REMARK_ERROR);
    }
}
