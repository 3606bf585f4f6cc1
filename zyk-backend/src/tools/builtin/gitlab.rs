//! GitLab tools for the code-review agent

use crate::db::Database;
use crate::mcp::gitlab::project_ids;
use crate::mcp::GitlabToolClient;
use crate::models::GitlabCommitDiff;
use crate::sync::sync_gitlab_commit_diffs;
use crate::tools::registry::Tool;
use crate::tools::types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Commits shown per `get_user_commits` call unless the model asks otherwise
pub const USER_COMMITS_LIMIT: u32 = 5;

fn field_text(item: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| match item.get(*key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
        .next()
        .unwrap_or_else(|| "-".to_string())
}

/// Numbered commit list for the model
pub fn format_commits(commits: &[Value]) -> String {
    if commits.is_empty() {
        return "没有找到提交记录".to_string();
    }

    let mut out = String::from("最近提交记录：\n\n");
    for (i, commit) in commits.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, field_text(commit, &["title", "message"])));
        out.push_str(&format!("   - 提交ID: {}\n", field_text(commit, &["id", "commit_sha"])));
        out.push_str(&format!(
            "   - 项目: {}\n",
            field_text(commit, &["project_name", "project_id"])
        ));
        out.push_str(&format!(
            "   - 时间: {}\n\n",
            field_text(commit, &["authored_date", "created_at"])
        ));
    }
    out
}

/// Cached diffs of one commit as unified-diff text, one section per file
pub fn render_commit_diff(diffs: &[GitlabCommitDiff]) -> String {
    diffs
        .iter()
        .filter(|d| d.enabled)
        .map(|d| {
            let old_path = d.old_path.as_deref().or(d.new_path.as_deref()).unwrap_or("unknown");
            let new_path = d.new_path.as_deref().unwrap_or(old_path);
            format!(
                "diff --git a/{} b/{}\n{}",
                old_path,
                new_path,
                d.diff.as_deref().unwrap_or("").trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Diffs of a commit from the cache, fetched from GitLab on a miss.
pub async fn load_commit_diffs(
    db: &Database,
    client: &GitlabToolClient,
    project_id: i64,
    commit_sha: &str,
) -> Result<Vec<GitlabCommitDiff>, String> {
    let cached = db
        .list_gitlab_commit_diffs(project_id, commit_sha)
        .map_err(|e| e.to_string())?;
    if !cached.is_empty() {
        return Ok(cached);
    }
    log::info!(
        "[GITLAB_MCP] No cached diff for {} in project {}, fetching",
        commit_sha,
        project_id
    );
    sync_gitlab_commit_diffs(db, client, project_id, commit_sha)
        .await
        .map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
struct UserCommitsParams {
    username: String,
    #[serde(default)]
    limit: Option<u32>,
}

/// Recent commits by one GitLab user across the known projects
pub struct GitlabUserCommitsTool {
    definition: ToolDefinition,
    db: Arc<Database>,
    client: Arc<GitlabToolClient>,
}

impl GitlabUserCommitsTool {
    pub fn new(db: Arc<Database>, client: Arc<GitlabToolClient>) -> Self {
        GitlabUserCommitsTool {
            definition: ToolDefinition {
                name: "get_user_commits".to_string(),
                description: "获取指定GitLab用户最近的提交记录".to_string(),
                input_schema: ToolInputSchema::default()
                    .with_property("username", PropertySchema::string("GitLab用户名"), true)
                    .with_property(
                        "limit",
                        PropertySchema::integer("返回的提交数量", Some(USER_COMMITS_LIMIT as i64)),
                        false,
                    ),
                group: ToolGroup::Gitlab,
            },
            db,
            client,
        }
    }

    /// Enabled cached projects; a live listing when nothing is cached.
    async fn project_ids(&self) -> Result<Vec<i64>, String> {
        let cached: Vec<i64> = self
            .db
            .list_gitlab_projects(true)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|p| p.id)
            .collect();
        if !cached.is_empty() {
            return Ok(cached);
        }
        let projects = self.client.list_projects().await.map_err(|e| e.to_string())?;
        Ok(project_ids(&projects))
    }
}

#[async_trait]
impl Tool for GitlabUserCommitsTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
        let params: UserCommitsParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };
        let username = params.username.trim().trim_start_matches('@');
        if username.is_empty() {
            return ToolResult::error("获取提交失败: 用户名为空");
        }
        let limit = params.limit.filter(|l| *l > 0).unwrap_or(USER_COMMITS_LIMIT);

        let ids = match self.project_ids().await {
            Ok(ids) => ids,
            Err(e) => return ToolResult::error(format!("获取提交失败: {}", e)),
        };

        match self.client.get_user_commits(username, limit, &ids).await {
            Ok(commits) => ToolResult::success(format_commits(&commits))
                .with_metadata(json!({ "commit_count": commits.len() })),
            Err(e) => {
                log::error!("[GITLAB_MCP] get_user_commits failed for {}: {}", username, e);
                ToolResult::error(format!("获取提交失败: {}", e))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommitDiffParams {
    commit_id: String,
    #[serde(default)]
    project_id: Option<i64>,
}

/// Code changes of one commit, looked up by SHA
pub struct GitlabCommitDiffTool {
    definition: ToolDefinition,
    db: Arc<Database>,
    client: Arc<GitlabToolClient>,
}

impl GitlabCommitDiffTool {
    pub fn new(db: Arc<Database>, client: Arc<GitlabToolClient>) -> Self {
        GitlabCommitDiffTool {
            definition: ToolDefinition {
                name: "get_commit_diff".to_string(),
                description: "查看指定提交的代码差异".to_string(),
                input_schema: ToolInputSchema::default()
                    .with_property("commit_id", PropertySchema::string("提交SHA"), true)
                    .with_property(
                        "project_id",
                        PropertySchema::integer("项目ID，缺省时从已同步的提交中查找", None),
                        false,
                    ),
                group: ToolGroup::Gitlab,
            },
            db,
            client,
        }
    }

    async fn diff_text(&self, commit_sha: &str, project_id: Option<i64>) -> Result<String, String> {
        let project_id = match project_id {
            Some(id) => id,
            None => self
                .db
                .find_commit_project_id(commit_sha)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("未找到提交 {} 所属的项目，请先同步提交或提供 project_id", commit_sha))?,
        };

        let diffs = load_commit_diffs(&self.db, &self.client, project_id, commit_sha).await?;
        let text = render_commit_diff(&diffs);
        if text.is_empty() {
            Ok("该提交没有代码变更".to_string())
        } else {
            Ok(text)
        }
    }
}

#[async_trait]
impl Tool for GitlabCommitDiffTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
        let params: CommitDiffParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };
        let commit_sha = params.commit_id.trim();

        match self.diff_text(commit_sha, params.project_id).await {
            Ok(text) => ToolResult::success(text),
            Err(e) => {
                log::error!("[GITLAB_MCP] get_commit_diff failed for {}: {}", commit_sha, e);
                ToolResult::error(format!("获取代码差异失败: {}", e))
            }
        }
    }
}
