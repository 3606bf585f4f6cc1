//! MySQL worker client

use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use super::bridge::{ToolBridge, WorkerCommand};
use super::result::into_rows;
use super::BridgeError;
use crate::config::Config;
use crate::models::MysqlConfig;

pub const LABEL: &str = "MYSQL_MCP";

/// Calls MySQL tools on a fresh worker per call, scoped to one effective
/// connection config.
pub struct MysqlToolClient {
    config: MysqlConfig,
    bridge: Arc<ToolBridge>,
}

impl MysqlToolClient {
    /// Build a client from the stored tenant config (if any) laid over the
    /// process-wide defaults.
    pub fn new(stored: Option<&MysqlConfig>, config: &Config) -> Result<Self, BridgeError> {
        let effective = match stored {
            Some(stored) => stored.overlay(&config.mysql_defaults),
            None => config.mysql_defaults.clone(),
        };
        let command = WorkerCommand::parse(&config.worker_commands.mysql)
            .ok_or_else(|| BridgeError::Transport("MySQL worker command is empty".to_string()))?;
        let timeout = effective
            .timeout
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(config.worker_timeouts.mysql);
        let bridge = ToolBridge::new(LABEL, command, effective.worker_env(), timeout);
        Ok(Self::with_bridge(effective, bridge))
    }

    pub fn with_bridge(config: MysqlConfig, bridge: ToolBridge) -> Self {
        MysqlToolClient {
            config,
            bridge: Arc::new(bridge),
        }
    }

    /// Host and port the worker will connect to, for log lines
    pub fn target(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<Vec<Value>, BridgeError> {
        if !self.config.enabled {
            log::info!("[{}] Skipping '{}': MySQL is disabled", LABEL, name);
            return Err(BridgeError::NotEnabled("MySQL"));
        }
        let payload = Arc::clone(&self.bridge)
            .call_tool_async(name.to_string(), arguments)
            .await?;
        Ok(into_rows(payload))
    }

    /// Run a read-only SQL statement
    pub async fn execute_query(&self, sql: &str) -> Result<Vec<Value>, BridgeError> {
        self.call("execute_query", json!({ "sql": sql })).await
    }

    pub async fn list_databases(&self) -> Result<Vec<Value>, BridgeError> {
        self.call("list_databases", json!({})).await
    }

    pub async fn list_tables(&self, database: &str) -> Result<Vec<Value>, BridgeError> {
        self.call("list_tables", json!({ "database": database })).await
    }

    pub async fn describe_table(
        &self,
        table_name: &str,
        database: Option<&str>,
    ) -> Result<Vec<Value>, BridgeError> {
        self.call("describe_table", table_args(Some(table_name), database))
            .await
    }

    pub async fn show_table_status(&self, database: Option<&str>) -> Result<Vec<Value>, BridgeError> {
        self.call("show_table_status", table_args(None, database)).await
    }

    pub async fn get_table_indexes(
        &self,
        table_name: &str,
        database: Option<&str>,
    ) -> Result<Vec<Value>, BridgeError> {
        self.call("get_table_indexes", table_args(Some(table_name), database))
            .await
    }
}

/// Optional arguments are left out rather than sent as null.
fn table_args(table_name: Option<&str>, database: Option<&str>) -> Value {
    let mut args = Map::new();
    if let Some(table_name) = table_name {
        args.insert("table_name".to_string(), json!(table_name));
    }
    if let Some(database) = database.filter(|d| !d.trim().is_empty()) {
        args.insert("database".to_string(), json!(database));
    }
    Value::Object(args)
}
