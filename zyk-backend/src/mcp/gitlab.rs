//! GitLab worker client

use serde_json::{json, Value};
use std::sync::Arc;

use super::bridge::{ToolBridge, WorkerCommand};
use super::result::into_rows;
use super::BridgeError;
use crate::config::Config;
use crate::models::GitlabConfig;

pub const LABEL: &str = "GITLAB_MCP";

pub const DEFAULT_COMMIT_LIMIT: u32 = 20;
pub const DEFAULT_USER_COMMIT_LIMIT: u32 = 10;

/// Prefix a failure with what was being fetched, keeping its kind.
fn wrap(what: &str, err: BridgeError) -> BridgeError {
    match err {
        BridgeError::Transport(m) => BridgeError::Transport(format!("{}: {}", what, m)),
        BridgeError::Protocol(m) => BridgeError::Protocol(format!("{}: {}", what, m)),
        BridgeError::Tool(m) => BridgeError::Tool(format!("{}: {}", what, m)),
        not_enabled @ BridgeError::NotEnabled(_) => not_enabled,
    }
}

pub struct GitlabToolClient {
    bridge: Arc<ToolBridge>,
}

impl GitlabToolClient {
    pub fn new(stored: Option<&GitlabConfig>, config: &Config) -> Result<Self, BridgeError> {
        let effective = match stored {
            Some(stored) => stored.overlay(&config.gitlab_defaults),
            None => config.gitlab_defaults.clone(),
        };
        let command = WorkerCommand::parse(&config.worker_commands.gitlab)
            .ok_or_else(|| BridgeError::Transport("GitLab worker command is empty".to_string()))?;
        let bridge = ToolBridge::new(
            LABEL,
            command,
            effective.worker_env(),
            config.worker_timeouts.gitlab,
        );
        Ok(Self::with_bridge(bridge))
    }

    pub fn with_bridge(bridge: ToolBridge) -> Self {
        GitlabToolClient {
            bridge: Arc::new(bridge),
        }
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        Arc::clone(&self.bridge)
            .call_tool_async(name.to_string(), arguments)
            .await
    }

    pub async fn list_users(&self) -> Result<Vec<Value>, BridgeError> {
        self.call("list_users", json!({}))
            .await
            .map(into_rows)
            .map_err(|e| wrap("获取GitLab用户列表失败", e))
    }

    pub async fn list_projects(&self) -> Result<Vec<Value>, BridgeError> {
        self.call("list_projects", json!({}))
            .await
            .map(into_rows)
            .map_err(|e| wrap("获取GitLab项目列表失败", e))
    }

    pub async fn list_branches(&self, project_id: i64) -> Result<Vec<Value>, BridgeError> {
        self.call("list_branches", json!({ "project_id": project_id }))
            .await
            .map(into_rows)
            .map_err(|e| wrap("获取GitLab分支列表失败", e))
    }

    pub async fn list_commits(
        &self,
        project_id: i64,
        limit: u32,
        ref_name: Option<&str>,
    ) -> Result<Vec<Value>, BridgeError> {
        let mut args = json!({ "project_id": project_id, "limit": limit });
        if let Some(ref_name) = ref_name.filter(|r| !r.is_empty()) {
            args["ref_name"] = json!(ref_name);
        }
        self.call("list_commits", args)
            .await
            .map(into_rows)
            .map_err(|e| wrap("获取GitLab提交列表失败", e))
    }

    /// Commits authored by `username` across `project_ids`.
    pub async fn get_user_commits(
        &self,
        username: &str,
        limit: u32,
        project_ids: &[i64],
    ) -> Result<Vec<Value>, BridgeError> {
        if project_ids.is_empty() {
            log::warn!("[{}] get_user_commits has no project ids", LABEL);
        }
        let rows = self
            .call(
                "get_user_commits",
                json!({ "username": username, "limit": limit, "project_ids": project_ids }),
            )
            .await
            .map(into_rows)
            .map_err(|e| wrap("获取GitLab用户提交失败", e))?;
        if rows.is_empty() {
            log::warn!(
                "[{}] get_user_commits empty result: username={} limit={}",
                LABEL,
                username,
                limit
            );
        }
        Ok(rows)
    }

    /// Diff document for one commit, always an object with a `diffs` list
    /// when the worker has nothing.
    pub async fn get_commit_diff(&self, project_id: i64, commit_sha: &str) -> Result<Value, BridgeError> {
        let payload = self
            .call(
                "get_commit_diff",
                json!({ "project_id": project_id, "commit_sha": commit_sha }),
            )
            .await
            .map_err(|e| wrap("获取GitLab提交差异失败", e))?;
        Ok(match payload {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            object @ Value::Object(_) => object,
            _ => json!({ "diffs": [] }),
        })
    }
}

/// Integer ids from a `list_projects` payload
pub fn project_ids(projects: &[Value]) -> Vec<i64> {
    projects
        .iter()
        .filter_map(|p| p.get("id").and_then(Value::as_i64))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    /// Client whose worker answers every call with `result`
    pub(crate) fn scripted_client(result: &str) -> GitlabToolClient {
        // The reply travels through the environment so any quoting survives
        let reply = format!(r#"{{"jsonrpc":"2.0","id":2,"result":{}}}"#, result);
        let script = r#"read a; read b; read c; printf '%s\n' "$REPLY_JSON""#.to_string();
        GitlabToolClient::with_bridge(
            ToolBridge::new(
                LABEL,
                WorkerCommand::new("sh", vec!["-c".to_string(), script]),
                vec![("REPLY_JSON".to_string(), reply)],
                Duration::from_secs(10),
            )
            .with_poll_interval(Duration::from_millis(50)),
        )
    }

    #[tokio::test]
    async fn test_commit_diff_takes_first_list_item() {
        let client = scripted_client(r#"[{"diffs":[{"new_path":"a.py"}]},{"diffs":[]}]"#);
        let diff = client.get_commit_diff(1, "abc").await.unwrap();
        assert_eq!(diff, json!({"diffs": [{"new_path": "a.py"}]}));
    }

    #[tokio::test]
    async fn test_commit_diff_defaults_to_empty_diffs() {
        let client = scripted_client(r#"{"content":[]}"#);
        let diff = client.get_commit_diff(1, "abc").await.unwrap();
        assert_eq!(diff, json!({"diffs": []}));
    }

    #[tokio::test]
    async fn test_failures_name_the_operation() {
        let client = scripted_client(r#"{"isError":true,"content":[{"type":"text","text":"401 Unauthorized"}]}"#);
        let err = client.list_users().await.unwrap_err();
        assert_eq!(err.to_string(), "获取GitLab用户列表失败: 401 Unauthorized");
    }

    #[test]
    fn test_project_ids_skip_missing() {
        let projects = vec![json!({"id": 4}), json!({"name": "x"}), json!({"id": 9})];
        assert_eq!(project_ids(&projects), vec![4, 9]);
    }
}
