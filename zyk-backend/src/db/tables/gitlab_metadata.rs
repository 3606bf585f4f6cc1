//! Cached GitLab users, projects, branches, commits and commit diffs

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use crate::models::{
    Annotation, GitlabBranch, GitlabCommit, GitlabCommitDiff, GitlabProject, GitlabUser,
};
use super::super::Database;

const USER_COLUMNS: &str = "id, username, name, avatar_url, enabled, remark";
const PROJECT_COLUMNS: &str =
    "id, name, path_with_namespace, web_url, last_activity_at, enabled, remark";
const BRANCH_COLUMNS: &str = "project_id, name, commit_sha, committed_date, enabled, remark";
const COMMIT_COLUMNS: &str =
    "project_id, branch, commit_sha, title, author_name, created_at, web_url, enabled, remark";
const DIFF_COLUMNS: &str = "project_id, commit_sha, old_path, new_path, diff, enabled, remark";

impl Database {
    fn row_to_gitlab_user(row: &Row) -> rusqlite::Result<GitlabUser> {
        Ok(GitlabUser {
            id: row.get(0)?,
            username: row.get(1)?,
            name: row.get(2)?,
            avatar_url: row.get(3)?,
            enabled: row.get::<_, i64>(4)? != 0,
            remark: row.get(5)?,
        })
    }

    fn row_to_gitlab_project(row: &Row) -> rusqlite::Result<GitlabProject> {
        Ok(GitlabProject {
            id: row.get(0)?,
            name: row.get(1)?,
            path_with_namespace: row.get(2)?,
            web_url: row.get(3)?,
            last_activity_at: row.get(4)?,
            enabled: row.get::<_, i64>(5)? != 0,
            remark: row.get(6)?,
        })
    }

    fn row_to_gitlab_branch(row: &Row) -> rusqlite::Result<GitlabBranch> {
        Ok(GitlabBranch {
            project_id: row.get(0)?,
            name: row.get(1)?,
            commit_sha: row.get(2)?,
            committed_date: row.get(3)?,
            enabled: row.get::<_, i64>(4)? != 0,
            remark: row.get(5)?,
        })
    }

    fn row_to_gitlab_commit(row: &Row) -> rusqlite::Result<GitlabCommit> {
        Ok(GitlabCommit {
            project_id: row.get(0)?,
            branch: row.get(1)?,
            commit_sha: row.get(2)?,
            title: row.get(3)?,
            author_name: row.get(4)?,
            created_at: row.get(5)?,
            web_url: row.get(6)?,
            enabled: row.get::<_, i64>(7)? != 0,
            remark: row.get(8)?,
        })
    }

    fn row_to_gitlab_commit_diff(row: &Row) -> rusqlite::Result<GitlabCommitDiff> {
        Ok(GitlabCommitDiff {
            project_id: row.get(0)?,
            commit_sha: row.get(1)?,
            old_path: row.get(2)?,
            new_path: row.get(3)?,
            diff: row.get(4)?,
            enabled: row.get::<_, i64>(5)? != 0,
            remark: row.get(6)?,
        })
    }

    // ============================================
    // Users
    // ============================================

    pub fn list_gitlab_users(&self, enabled_only: bool) -> SqliteResult<Vec<GitlabUser>> {
        let conn = self.conn();
        let filter = if enabled_only { "WHERE enabled = 1" } else { "" };
        let sql = format!("SELECT {} FROM gitlab_users {} ORDER BY username", USER_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_gitlab_user(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_gitlab_user(&self, id: i64) -> SqliteResult<Option<GitlabUser>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM gitlab_users WHERE id = ?1", USER_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_gitlab_user(row))
            .optional()
    }

    pub fn replace_gitlab_users(&self, rows: &[GitlabUser]) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM gitlab_users", [])?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO gitlab_users
                 (id, username, name, avatar_url, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.username,
                    row.name,
                    row.avatar_url,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }

    pub fn set_gitlab_user_annotation(&self, id: i64, annotation: &Annotation) -> SqliteResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE gitlab_users SET enabled = ?1, remark = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![
                annotation.enabled as i64,
                annotation.remark,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    // ============================================
    // Projects
    // ============================================

    pub fn list_gitlab_projects(&self, enabled_only: bool) -> SqliteResult<Vec<GitlabProject>> {
        let conn = self.conn();
        let filter = if enabled_only { "WHERE enabled = 1" } else { "" };
        let sql = format!("SELECT {} FROM gitlab_projects {} ORDER BY id", PROJECT_COLUMNS, filter);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_gitlab_project(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_gitlab_project(&self, id: i64) -> SqliteResult<Option<GitlabProject>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM gitlab_projects WHERE id = ?1", PROJECT_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_gitlab_project(row))
            .optional()
    }

    pub fn replace_gitlab_projects(&self, rows: &[GitlabProject]) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM gitlab_projects", [])?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO gitlab_projects
                 (id, name, path_with_namespace, web_url, last_activity_at, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.id,
                    row.name,
                    row.path_with_namespace,
                    row.web_url,
                    row.last_activity_at,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }

    pub fn set_gitlab_project_annotation(&self, id: i64, annotation: &Annotation) -> SqliteResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE gitlab_projects SET enabled = ?1, remark = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![
                annotation.enabled as i64,
                annotation.remark,
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(changed > 0)
    }

    // ============================================
    // Branches
    // ============================================

    pub fn list_gitlab_branches(&self, project_id: i64) -> SqliteResult<Vec<GitlabBranch>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM gitlab_branches WHERE project_id = ?1 ORDER BY name",
            BRANCH_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([project_id], |row| Self::row_to_gitlab_branch(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn replace_gitlab_branches(&self, project_id: i64, rows: &[GitlabBranch]) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM gitlab_branches WHERE project_id = ?1", [project_id])?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO gitlab_branches
                 (project_id, name, commit_sha, committed_date, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    project_id,
                    row.name,
                    row.commit_sha,
                    row.committed_date,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }

    // ============================================
    // Commits
    // ============================================

    pub fn list_gitlab_commits(&self, project_id: i64, branch: &str) -> SqliteResult<Vec<GitlabCommit>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM gitlab_commits WHERE project_id = ?1 AND branch = ?2 ORDER BY created_at DESC",
            COMMIT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![project_id, branch], |row| {
                Self::row_to_gitlab_commit(row)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn replace_gitlab_commits(
        &self,
        project_id: i64,
        branch: &str,
        rows: &[GitlabCommit],
    ) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM gitlab_commits WHERE project_id = ?1 AND branch = ?2",
            rusqlite::params![project_id, branch],
        )?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO gitlab_commits
                 (project_id, branch, commit_sha, title, author_name, created_at, web_url, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    project_id,
                    branch,
                    row.commit_sha,
                    row.title,
                    row.author_name,
                    row.created_at,
                    row.web_url,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }

    /// Project that a cached commit belongs to, if any branch has it cached
    pub fn find_commit_project_id(&self, commit_sha: &str) -> SqliteResult<Option<i64>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT project_id FROM gitlab_commits WHERE commit_sha = ?1 LIMIT 1",
            [commit_sha],
            |row| row.get(0),
        )
        .optional()
    }

    // ============================================
    // Commit diffs
    // ============================================

    pub fn list_gitlab_commit_diffs(
        &self,
        project_id: i64,
        commit_sha: &str,
    ) -> SqliteResult<Vec<GitlabCommitDiff>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM gitlab_commit_diffs WHERE project_id = ?1 AND commit_sha = ?2 ORDER BY id",
            DIFF_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![project_id, commit_sha], |row| {
                Self::row_to_gitlab_commit_diff(row)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn replace_gitlab_commit_diffs(
        &self,
        project_id: i64,
        commit_sha: &str,
        rows: &[GitlabCommitDiff],
    ) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM gitlab_commit_diffs WHERE project_id = ?1 AND commit_sha = ?2",
            rusqlite::params![project_id, commit_sha],
        )?;
        for row in rows {
            tx.execute(
                "INSERT INTO gitlab_commit_diffs
                 (project_id, commit_sha, old_path, new_path, diff, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    project_id,
                    commit_sha,
                    row.old_path,
                    row.new_path,
                    row.diff,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(project_id: i64, branch: &str, sha: &str) -> GitlabCommit {
        GitlabCommit {
            project_id,
            branch: branch.to_string(),
            commit_sha: sha.to_string(),
            title: Some("fix".to_string()),
            author_name: None,
            created_at: Some("2025-01-01T00:00:00Z".to_string()),
            web_url: None,
            enabled: true,
            remark: None,
        }
    }

    #[test]
    fn test_find_commit_project_id() {
        let db = Database::new(":memory:").unwrap();
        db.replace_gitlab_commits(7, "main", &[commit(7, "main", "abc123")])
            .unwrap();

        assert_eq!(db.find_commit_project_id("abc123").unwrap(), Some(7));
        assert_eq!(db.find_commit_project_id("missing").unwrap(), None);
    }

    #[test]
    fn test_user_listing_respects_enabled_flag() {
        let db = Database::new(":memory:").unwrap();
        db.replace_gitlab_users(&[
            GitlabUser {
                id: 1,
                username: "yuanwu".to_string(),
                name: Some("袁兀".to_string()),
                avatar_url: None,
                enabled: true,
                remark: None,
            },
            GitlabUser {
                id: 2,
                username: "ghost".to_string(),
                name: None,
                avatar_url: None,
                enabled: false,
                remark: None,
            },
        ])
        .unwrap();

        assert_eq!(db.list_gitlab_users(false).unwrap().len(), 2);
        let enabled = db.list_gitlab_users(true).unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].username, "yuanwu");
    }
}
