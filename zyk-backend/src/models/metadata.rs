//! Cached metadata rows mirrored from MySQL and GitLab.
//!
//! Every row carries user-set annotations (`enabled`, `remark`) that a
//! metadata refresh must carry forward by natural key.

use serde::{Deserialize, Serialize};
use std::hash::Hash;

/// User-set annotation shared by every cached entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub enabled: bool,
    pub remark: Option<String>,
}

impl Default for Annotation {
    fn default() -> Self {
        Annotation {
            enabled: true,
            remark: None,
        }
    }
}

/// A cached row identified by a natural key with a carried-forward annotation
pub trait CachedEntity {
    type Key: Eq + Hash;

    fn natural_key(&self) -> Self::Key;
    fn annotation(&self) -> Annotation;
    fn set_annotation(&mut self, annotation: Annotation);
}

macro_rules! cached_entity {
    ($ty:ty, $key:ty, |$row:ident| $expr:expr) => {
        impl CachedEntity for $ty {
            type Key = $key;

            fn natural_key(&self) -> Self::Key {
                let $row = self;
                $expr
            }

            fn annotation(&self) -> Annotation {
                Annotation {
                    enabled: self.enabled,
                    remark: self.remark.clone(),
                }
            }

            fn set_annotation(&mut self, annotation: Annotation) {
                self.enabled = annotation.enabled;
                self.remark = annotation.remark;
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MysqlDatabase {
    pub name: String,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MysqlTable {
    pub database_name: String,
    pub table_name: String,
    pub table_type: String,
    pub table_comment: String,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabUser {
    pub id: i64,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabProject {
    pub id: i64,
    pub name: String,
    pub path_with_namespace: String,
    pub web_url: Option<String>,
    pub last_activity_at: Option<String>,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabBranch {
    pub project_id: i64,
    pub name: String,
    pub commit_sha: Option<String>,
    pub committed_date: Option<String>,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabCommit {
    pub project_id: i64,
    pub branch: String,
    pub commit_sha: String,
    pub title: Option<String>,
    pub author_name: Option<String>,
    pub created_at: Option<String>,
    pub web_url: Option<String>,
    pub enabled: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitlabCommitDiff {
    pub project_id: i64,
    pub commit_sha: String,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub diff: Option<String>,
    pub enabled: bool,
    pub remark: Option<String>,
}

cached_entity!(MysqlDatabase, String, |row| row.name.clone());
cached_entity!(MysqlTable, (String, String), |row| (
    row.database_name.clone(),
    row.table_name.clone()
));
cached_entity!(GitlabUser, i64, |row| row.id);
cached_entity!(GitlabProject, i64, |row| row.id);
cached_entity!(GitlabBranch, (i64, String), |row| (row.project_id, row.name.clone()));
cached_entity!(GitlabCommit, (i64, String, String), |row| (
    row.project_id,
    row.branch.clone(),
    row.commit_sha.clone()
));
cached_entity!(GitlabCommitDiff, (i64, String, Option<String>), |row| (
    row.project_id,
    row.commit_sha.clone(),
    row.new_path.clone()
));
