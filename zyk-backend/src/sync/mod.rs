//! Metadata refresh from MySQL and GitLab into the local cache.
//!
//! Every refresh replaces one scope of cached rows (all databases, one
//! database's tables, one project's branches, ...). User annotations on the
//! previous rows are carried onto the fresh rows by natural key.

pub mod gitlab;
pub mod mysql;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::mcp::{BridgeError, GitlabToolClient, MysqlToolClient};
use crate::models::{Annotation, CachedEntity};

pub use gitlab::{
    sync_all_gitlab_branches, sync_gitlab_branches, sync_gitlab_commit_diffs, sync_gitlab_commits,
    sync_gitlab_metadata, sync_gitlab_projects, sync_gitlab_users, GitlabSyncSummary,
};
pub use mysql::{
    count_mysql_metadata, sync_mysql_databases, sync_mysql_metadata, sync_mysql_tables,
    MysqlSyncSummary,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("metadata cache error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Copy `enabled`/`remark` from prior rows onto fresh rows with the same
/// natural key. Fresh rows without a prior match get the default annotation.
pub fn carry_forward<T: CachedEntity>(existing: Vec<T>, fresh: Vec<T>) -> Vec<T> {
    let prior: HashMap<T::Key, Annotation> = existing
        .into_iter()
        .map(|row| (row.natural_key(), row.annotation()))
        .collect();

    fresh
        .into_iter()
        .map(|mut row| {
            let annotation = prior.get(&row.natural_key()).cloned().unwrap_or_default();
            row.set_annotation(annotation);
            row
        })
        .collect()
}

/// String field of a worker row; numbers are accepted and stringified
pub(crate) fn str_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where database and table listings come from
#[async_trait]
pub trait MysqlMetadataSource: Send + Sync {
    async fn list_databases(&self) -> Result<Vec<Value>, BridgeError>;
    async fn list_tables(&self, database: &str) -> Result<Vec<Value>, BridgeError>;
}

#[async_trait]
impl MysqlMetadataSource for MysqlToolClient {
    async fn list_databases(&self) -> Result<Vec<Value>, BridgeError> {
        MysqlToolClient::list_databases(self).await
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<Value>, BridgeError> {
        MysqlToolClient::list_tables(self, database).await
    }
}

/// Where GitLab listings come from
#[async_trait]
pub trait GitlabMetadataSource: Send + Sync {
    async fn list_users(&self) -> Result<Vec<Value>, BridgeError>;
    async fn list_projects(&self) -> Result<Vec<Value>, BridgeError>;
    async fn list_branches(&self, project_id: i64) -> Result<Vec<Value>, BridgeError>;
    async fn list_commits(
        &self,
        project_id: i64,
        limit: u32,
        ref_name: Option<&str>,
    ) -> Result<Vec<Value>, BridgeError>;
    async fn get_commit_diff(&self, project_id: i64, commit_sha: &str) -> Result<Value, BridgeError>;
}

#[async_trait]
impl GitlabMetadataSource for GitlabToolClient {
    async fn list_users(&self) -> Result<Vec<Value>, BridgeError> {
        GitlabToolClient::list_users(self).await
    }

    async fn list_projects(&self) -> Result<Vec<Value>, BridgeError> {
        GitlabToolClient::list_projects(self).await
    }

    async fn list_branches(&self, project_id: i64) -> Result<Vec<Value>, BridgeError> {
        GitlabToolClient::list_branches(self, project_id).await
    }

    async fn list_commits(
        &self,
        project_id: i64,
        limit: u32,
        ref_name: Option<&str>,
    ) -> Result<Vec<Value>, BridgeError> {
        GitlabToolClient::list_commits(self, project_id, limit, ref_name).await
    }

    async fn get_commit_diff(&self, project_id: i64, commit_sha: &str) -> Result<Value, BridgeError> {
        GitlabToolClient::get_commit_diff(self, project_id, commit_sha).await
    }
}
