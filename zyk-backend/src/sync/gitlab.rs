use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::{carry_forward, str_field, GitlabMetadataSource, SyncError};
use crate::db::Database;
use crate::models::{GitlabBranch, GitlabCommit, GitlabCommitDiff, GitlabProject, GitlabUser};

pub const DEFAULT_SYNC_COMMIT_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GitlabSyncSummary {
    pub user_count: usize,
    pub project_count: usize,
    pub branch_count: usize,
}

impl GitlabSyncSummary {
    pub fn message(&self) -> String {
        format!(
            "同步成功: {} 个用户, {} 个项目, {} 个分支",
            self.user_count, self.project_count, self.branch_count
        )
    }
}

/// Drop rows whose key repeats; the first occurrence wins
fn dedup_by<T, K: std::hash::Hash + Eq>(rows: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(key(row))).collect()
}

pub async fn sync_gitlab_users(
    db: &Database,
    source: &dyn GitlabMetadataSource,
) -> Result<Vec<GitlabUser>, SyncError> {
    let remote = source.list_users().await?;
    let fresh: Vec<GitlabUser> = remote
        .iter()
        .filter_map(|item| {
            Some(GitlabUser {
                id: item.get("id")?.as_i64()?,
                username: str_field(item, "username").unwrap_or_default(),
                name: str_field(item, "name"),
                avatar_url: str_field(item, "avatar_url"),
                enabled: true,
                remark: None,
            })
        })
        .collect();
    let fresh = dedup_by(fresh, |u| u.id);

    let rows = carry_forward(db.list_gitlab_users(false)?, fresh);
    db.replace_gitlab_users(&rows)?;
    log::info!("[SYNC] GitLab users synced: {}", rows.len());
    Ok(rows)
}

pub async fn sync_gitlab_projects(
    db: &Database,
    source: &dyn GitlabMetadataSource,
) -> Result<Vec<GitlabProject>, SyncError> {
    let remote = source.list_projects().await?;
    let fresh: Vec<GitlabProject> = remote
        .iter()
        .filter_map(|item| {
            Some(GitlabProject {
                id: item.get("id")?.as_i64()?,
                name: str_field(item, "name_with_namespace")
                    .or_else(|| str_field(item, "name"))
                    .unwrap_or_default(),
                path_with_namespace: str_field(item, "path_with_namespace").unwrap_or_default(),
                web_url: str_field(item, "web_url"),
                last_activity_at: str_field(item, "last_activity_at"),
                enabled: true,
                remark: None,
            })
        })
        .collect();
    let fresh = dedup_by(fresh, |p| p.id);

    let rows = carry_forward(db.list_gitlab_projects(false)?, fresh);
    db.replace_gitlab_projects(&rows)?;
    log::info!("[SYNC] GitLab projects synced: {}", rows.len());
    Ok(rows)
}

pub async fn sync_gitlab_branches(
    db: &Database,
    source: &dyn GitlabMetadataSource,
    project_id: i64,
) -> Result<Vec<GitlabBranch>, SyncError> {
    let remote = source.list_branches(project_id).await?;
    let fresh: Vec<GitlabBranch> = remote
        .iter()
        .filter_map(|item| {
            Some(GitlabBranch {
                project_id,
                name: str_field(item, "name").filter(|n| !n.is_empty())?,
                commit_sha: str_field(item, "commit_sha"),
                committed_date: str_field(item, "committed_date"),
                enabled: true,
                remark: None,
            })
        })
        .collect();
    let fresh = dedup_by(fresh, |b| b.name.clone());

    let rows = carry_forward(db.list_gitlab_branches(project_id)?, fresh);
    db.replace_gitlab_branches(project_id, &rows)?;
    log::debug!("[SYNC] Branches synced for project {}: {}", project_id, rows.len());
    Ok(rows)
}

/// Refresh branches of every cached project. Returns the total branch count;
/// a project whose branches fail is logged and skipped.
pub async fn sync_all_gitlab_branches(
    db: &Database,
    source: &dyn GitlabMetadataSource,
) -> Result<usize, SyncError> {
    let mut total = 0;
    for project in db.list_gitlab_projects(false)? {
        match sync_gitlab_branches(db, source, project.id).await {
            Ok(branches) => total += branches.len(),
            Err(e) => log::warn!(
                "[SYNC] Failed to sync branches for project {} ({}): {}",
                project.id,
                project.path_with_namespace,
                e
            ),
        }
    }
    log::info!("[SYNC] GitLab branches synced: {}", total);
    Ok(total)
}

pub async fn sync_gitlab_commits(
    db: &Database,
    source: &dyn GitlabMetadataSource,
    project_id: i64,
    branch: &str,
    limit: u32,
) -> Result<Vec<GitlabCommit>, SyncError> {
    let remote = source.list_commits(project_id, limit, Some(branch)).await?;
    let fresh: Vec<GitlabCommit> = remote
        .iter()
        .filter_map(|item| {
            Some(GitlabCommit {
                project_id,
                branch: branch.to_string(),
                commit_sha: str_field(item, "id").filter(|s| !s.is_empty())?,
                title: str_field(item, "title"),
                author_name: str_field(item, "author_name"),
                created_at: str_field(item, "created_at"),
                web_url: str_field(item, "web_url"),
                enabled: true,
                remark: None,
            })
        })
        .collect();
    let fresh = dedup_by(fresh, |c| c.commit_sha.clone());

    let rows = carry_forward(db.list_gitlab_commits(project_id, branch)?, fresh);
    db.replace_gitlab_commits(project_id, branch, &rows)?;
    log::debug!(
        "[SYNC] Commits synced for project {} branch {}: {}",
        project_id,
        branch,
        rows.len()
    );
    Ok(rows)
}

pub async fn sync_gitlab_commit_diffs(
    db: &Database,
    source: &dyn GitlabMetadataSource,
    project_id: i64,
    commit_sha: &str,
) -> Result<Vec<GitlabCommitDiff>, SyncError> {
    let document = source.get_commit_diff(project_id, commit_sha).await?;
    let fresh: Vec<GitlabCommitDiff> = document
        .get("diffs")
        .and_then(Value::as_array)
        .map(|diffs| {
            diffs
                .iter()
                .map(|item| GitlabCommitDiff {
                    project_id,
                    commit_sha: commit_sha.to_string(),
                    old_path: str_field(item, "old_path"),
                    new_path: str_field(item, "new_path"),
                    diff: str_field(item, "diff"),
                    enabled: true,
                    remark: None,
                })
                .collect()
        })
        .unwrap_or_default();

    let rows = carry_forward(db.list_gitlab_commit_diffs(project_id, commit_sha)?, fresh);
    db.replace_gitlab_commit_diffs(project_id, commit_sha, &rows)?;
    log::debug!("[SYNC] Diffs synced for commit {}: {}", commit_sha, rows.len());
    Ok(rows)
}

/// Users, projects, then the branches of every project
pub async fn sync_gitlab_metadata(
    db: &Database,
    source: &dyn GitlabMetadataSource,
) -> Result<GitlabSyncSummary, SyncError> {
    let users = sync_gitlab_users(db, source).await?;
    let projects = sync_gitlab_projects(db, source).await?;
    let branch_count = sync_all_gitlab_branches(db, source).await?;

    let summary = GitlabSyncSummary {
        user_count: users.len(),
        project_count: projects.len(),
        branch_count,
    };
    log::info!("[SYNC] {}", summary.message());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::BridgeError;
    use crate::models::Annotation;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubGitlab {
        users: Vec<Value>,
        projects: Vec<Value>,
    }

    #[async_trait]
    impl GitlabMetadataSource for StubGitlab {
        async fn list_users(&self) -> Result<Vec<Value>, BridgeError> {
            Ok(self.users.clone())
        }

        async fn list_projects(&self) -> Result<Vec<Value>, BridgeError> {
            Ok(self.projects.clone())
        }

        async fn list_branches(&self, project_id: i64) -> Result<Vec<Value>, BridgeError> {
            if project_id == 13 {
                return Err(BridgeError::Tool("404 Project Not Found".to_string()));
            }
            Ok(vec![
                json!({"name": "main", "commit_sha": "abc123", "committed_date": "2025-01-02T00:00:00Z"}),
                json!({"name": "dev"}),
            ])
        }

        async fn list_commits(
            &self,
            _project_id: i64,
            limit: u32,
            ref_name: Option<&str>,
        ) -> Result<Vec<Value>, BridgeError> {
            assert_eq!(ref_name, Some("main"));
            assert_eq!(limit, DEFAULT_SYNC_COMMIT_LIMIT);
            Ok(vec![json!({
                "id": "abc123",
                "title": "修复订单统计",
                "author_name": "袁兀",
                "created_at": "2025-01-02T00:00:00Z",
                "web_url": "https://git.example.com/c/abc123"
            })])
        }

        async fn get_commit_diff(&self, _project_id: i64, commit_sha: &str) -> Result<Value, BridgeError> {
            Ok(json!({
                "id": commit_sha,
                "diffs": [
                    {"old_path": "a.py", "new_path": "a.py", "diff": "@@ -1 +1 @@\n-a\n+b"},
                    {"old_path": "b.py", "new_path": "c.py", "diff": ""}
                ]
            }))
        }
    }

    fn stub() -> StubGitlab {
        StubGitlab {
            users: vec![
                json!({"id": 3, "username": "yuanwu", "name": "袁兀", "avatar_url": null}),
                json!({"id": 4, "username": "lihua", "name": "李华"}),
                json!({"username": "no-id"}),
            ],
            projects: vec![
                json!({"id": 12, "name": "dispensing", "name_with_namespace": "backend / dispensing", "path_with_namespace": "backend/dispensing"}),
                json!({"id": 13, "name": "archived", "path_with_namespace": "backend/archived"}),
            ],
        }
    }

    #[tokio::test]
    async fn test_full_gitlab_sync_skips_failing_project() {
        let db = Database::new(":memory:").unwrap();
        let summary = sync_gitlab_metadata(&db, &stub()).await.unwrap();
        assert_eq!(
            summary,
            GitlabSyncSummary {
                user_count: 2,
                project_count: 2,
                branch_count: 2
            }
        );

        let project = db.get_gitlab_project(12).unwrap().unwrap();
        assert_eq!(project.name, "backend / dispensing");
        let archived = db.get_gitlab_project(13).unwrap().unwrap();
        assert_eq!(archived.name, "archived");

        let branches = db.list_gitlab_branches(12).unwrap();
        assert_eq!(branches.len(), 2);
        assert!(db.list_gitlab_branches(13).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_annotations_survive_refresh() {
        let db = Database::new(":memory:").unwrap();
        let source = stub();
        sync_gitlab_users(&db, &source).await.unwrap();

        let annotation = Annotation {
            enabled: false,
            remark: Some("legacy".to_string()),
        };
        assert!(db.set_gitlab_user_annotation(3, &annotation).unwrap());

        sync_gitlab_users(&db, &source).await.unwrap();
        let user = db.get_gitlab_user(3).unwrap().unwrap();
        assert!(!user.enabled);
        assert_eq!(user.remark.as_deref(), Some("legacy"));
        assert_eq!(user.name.as_deref(), Some("袁兀"));
    }

    #[tokio::test]
    async fn test_commits_and_diffs_are_cached() {
        let db = Database::new(":memory:").unwrap();
        let source = stub();

        let commits = sync_gitlab_commits(&db, &source, 12, "main", DEFAULT_SYNC_COMMIT_LIMIT)
            .await
            .unwrap();
        assert_eq!(commits[0].commit_sha, "abc123");
        assert_eq!(db.find_commit_project_id("abc123").unwrap(), Some(12));

        let diffs = sync_gitlab_commit_diffs(&db, &source, 12, "abc123").await.unwrap();
        assert_eq!(diffs.len(), 2);
        assert_eq!(diffs[1].new_path.as_deref(), Some("c.py"));
        assert_eq!(db.list_gitlab_commit_diffs(12, "abc123").unwrap().len(), 2);
    }
}
