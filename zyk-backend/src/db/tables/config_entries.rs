//! Tenant configuration stored as JSON documents keyed by name

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{config_keys, GitlabConfig, ModelConfig, MysqlConfig};
use super::super::Database;

impl Database {
    /// Get a raw config document by key
    pub fn get_config_value(&self, key: &str) -> SqliteResult<Option<Value>> {
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM config_entries WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(raw.and_then(|text| match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("[CONFIG] Stored value for '{}' is not valid JSON: {}", key, e);
                None
            }
        }))
    }

    /// Insert or replace a config document
    pub fn set_config_value(&self, key: &str, value: &Value) -> SqliteResult<()> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO config_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value.to_string(), now],
        )?;
        Ok(())
    }

    fn get_typed_config<T: DeserializeOwned>(&self, key: &str) -> SqliteResult<Option<T>> {
        let value = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(None),
        };
        // Derived visitors also accept sequences; only objects are configs
        if !value.is_object() {
            log::warn!("[CONFIG] Stored '{}' does not match the expected shape: not an object", key);
            return Ok(None);
        }
        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                log::warn!("[CONFIG] Stored '{}' does not match the expected shape: {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn get_model_config(&self) -> SqliteResult<Option<ModelConfig>> {
        self.get_typed_config(config_keys::MODEL)
    }

    pub fn get_mysql_config(&self) -> SqliteResult<Option<MysqlConfig>> {
        self.get_typed_config(config_keys::MYSQL)
    }

    pub fn get_gitlab_config(&self) -> SqliteResult<Option<GitlabConfig>> {
        self.get_typed_config(config_keys::GITLAB)
    }
}
