use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if database_url != ":memory:" {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Lock the shared connection. A poisoned lock still holds a usable connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Tenant configuration (JSON values keyed by config name)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS config_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Cached MySQL metadata
        conn.execute(
            "CREATE TABLE IF NOT EXISTS mysql_databases (
                name TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS mysql_tables (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                database_name TEXT NOT NULL,
                table_name TEXT NOT NULL,
                table_type TEXT NOT NULL DEFAULT '',
                table_comment TEXT NOT NULL DEFAULT '',
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(database_name, table_name)
            )",
            [],
        )?;

        // Cached GitLab metadata
        conn.execute(
            "CREATE TABLE IF NOT EXISTS gitlab_users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL,
                name TEXT,
                avatar_url TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS gitlab_projects (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                path_with_namespace TEXT NOT NULL DEFAULT '',
                web_url TEXT,
                last_activity_at TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS gitlab_branches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                commit_sha TEXT,
                committed_date TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(project_id, name)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS gitlab_commits (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                branch TEXT NOT NULL,
                commit_sha TEXT NOT NULL,
                title TEXT,
                author_name TEXT,
                created_at TEXT,
                web_url TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(project_id, branch, commit_sha)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_gitlab_commits_sha ON gitlab_commits(commit_sha)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS gitlab_commit_diffs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id INTEGER NOT NULL,
                commit_sha TEXT NOT NULL,
                old_path TEXT,
                new_path TEXT,
                diff TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                remark TEXT,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Conversations and their transcripts
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                mode TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config_keys;
    use serde_json::json;

    #[test]
    fn test_file_database_creates_parent_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("zyk.db");
        let url = path.to_str().unwrap();

        {
            let db = Database::new(url).unwrap();
            db.set_config_value(config_keys::MODEL, &json!({"api_key": "sk-1"}))
                .unwrap();
        }

        let reopened = Database::new(url).unwrap();
        let model = reopened.get_model_config().unwrap().unwrap();
        assert_eq!(model.api_key, "sk-1");
    }
}
