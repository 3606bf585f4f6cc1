use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use super::{carry_forward, str_field, MysqlMetadataSource, SyncError};
use crate::db::Database;
use crate::models::{MysqlDatabase, MysqlTable};

/// Server-internal schemas, never cached and never table-synced
pub const SYSTEM_DATABASES: [&str; 4] = ["information_schema", "performance_schema", "mysql", "sys"];

pub fn is_system_database(name: &str) -> bool {
    SYSTEM_DATABASES.contains(&name)
}

fn database_name(item: &Value) -> Option<String> {
    str_field(item, "database")
        .or_else(|| str_field(item, "Database"))
        .filter(|name| !name.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MysqlSyncSummary {
    pub database_count: usize,
    pub table_count: usize,
}

impl MysqlSyncSummary {
    pub fn message(&self) -> String {
        format!(
            "同步成功: {} 个数据库, {} 个表",
            self.database_count, self.table_count
        )
    }
}

/// Refresh the cached database list. Returns the rows now cached.
pub async fn sync_mysql_databases(
    db: &Database,
    source: &dyn MysqlMetadataSource,
) -> Result<Vec<MysqlDatabase>, SyncError> {
    let remote = source.list_databases().await?;

    let mut seen = HashSet::new();
    let fresh: Vec<MysqlDatabase> = remote
        .iter()
        .filter_map(database_name)
        .filter(|name| !is_system_database(name))
        .filter(|name| seen.insert(name.clone()))
        .map(|name| MysqlDatabase {
            name,
            enabled: true,
            remark: None,
        })
        .collect();

    let rows = carry_forward(db.list_mysql_databases(false)?, fresh);
    db.replace_mysql_databases(&rows)?;
    log::info!("[SYNC] MySQL databases synced: {}", rows.len());
    Ok(rows)
}

/// Refresh the cached tables of one database.
pub async fn sync_mysql_tables(
    db: &Database,
    source: &dyn MysqlMetadataSource,
    database: &str,
) -> Result<Vec<MysqlTable>, SyncError> {
    let remote = source.list_tables(database).await?;

    let mut seen = HashSet::new();
    let fresh: Vec<MysqlTable> = remote
        .iter()
        .filter_map(|item| {
            let table_name = str_field(item, "table_name").filter(|n| !n.is_empty())?;
            Some(MysqlTable {
                database_name: database.to_string(),
                table_type: str_field(item, "table_type").unwrap_or_default(),
                table_comment: str_field(item, "table_comment").unwrap_or_default(),
                table_name,
                enabled: true,
                remark: None,
            })
        })
        .filter(|table| seen.insert(table.table_name.clone()))
        .collect();

    let rows = carry_forward(db.list_mysql_tables(Some(database), false)?, fresh);
    db.replace_mysql_tables(database, &rows)?;
    log::info!("[SYNC] MySQL tables synced for {}: {}", database, rows.len());
    Ok(rows)
}

/// Refresh databases, then the tables of each one. A database whose tables
/// fail to sync is logged and left out of the table count.
pub async fn sync_mysql_metadata(
    db: &Database,
    source: &dyn MysqlMetadataSource,
) -> Result<MysqlSyncSummary, SyncError> {
    let databases = sync_mysql_databases(db, source).await?;

    let mut table_count = 0;
    for database in &databases {
        match sync_mysql_tables(db, source, &database.name).await {
            Ok(tables) => table_count += tables.len(),
            Err(e) => log::error!("[SYNC] Failed to sync tables for {}: {}", database.name, e),
        }
    }

    let summary = MysqlSyncSummary {
        database_count: databases.len(),
        table_count,
    };
    log::info!("[SYNC] {}", summary.message());
    Ok(summary)
}

/// Count what a sync would cache without touching the cache. Used to check
/// an unsaved connection, so any failure is returned rather than skipped.
pub async fn count_mysql_metadata(
    source: &dyn MysqlMetadataSource,
) -> Result<MysqlSyncSummary, SyncError> {
    let mut seen = HashSet::new();
    let names: Vec<String> = source
        .list_databases()
        .await?
        .iter()
        .filter_map(database_name)
        .filter(|name| !is_system_database(name))
        .filter(|name| seen.insert(name.clone()))
        .collect();

    let mut table_count = 0;
    for name in &names {
        let tables = source.list_tables(name).await?;
        log::debug!("[SYNC] {} has {} tables", name, tables.len());
        table_count += tables.len();
    }

    Ok(MysqlSyncSummary {
        database_count: names.len(),
        table_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::BridgeError;
    use crate::models::Annotation;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubMysql {
        databases: Vec<Value>,
        tables: HashMap<String, Vec<Value>>,
        failing: HashSet<String>,
        table_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MysqlMetadataSource for StubMysql {
        async fn list_databases(&self) -> Result<Vec<Value>, BridgeError> {
            Ok(self.databases.clone())
        }

        async fn list_tables(&self, database: &str) -> Result<Vec<Value>, BridgeError> {
            self.table_calls.lock().unwrap().push(database.to_string());
            if self.failing.contains(database) {
                return Err(BridgeError::Tool(format!("Access denied for {}", database)));
            }
            Ok(self.tables.get(database).cloned().unwrap_or_default())
        }
    }

    fn stub() -> StubMysql {
        let mut tables = HashMap::new();
        tables.insert(
            "dispensing".to_string(),
            vec![
                json!({"table_name": "order_info", "table_type": "BASE TABLE", "table_comment": "订单"}),
                json!({"table_name": "order_operate_record", "table_type": "BASE TABLE"}),
            ],
        );
        tables.insert(
            "hospital".to_string(),
            vec![json!({"table_name": "fei_community_hospital"})],
        );
        StubMysql {
            databases: vec![
                json!({"Database": "information_schema"}),
                json!({"Database": "dispensing"}),
                json!({"database": "hospital"}),
                json!({"Database": "mysql"}),
                json!({"Database": "sys"}),
                json!({"Database": "performance_schema"}),
                json!({"other": "ignored"}),
            ],
            tables,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_system_databases_are_never_synced() {
        let db = Database::new(":memory:").unwrap();
        let source = stub();

        let summary = sync_mysql_metadata(&db, &source).await.unwrap();
        assert_eq!(summary.database_count, 2);
        assert_eq!(summary.table_count, 3);
        assert_eq!(summary.message(), "同步成功: 2 个数据库, 3 个表");

        let calls = source.table_calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["dispensing", "hospital"]);

        let names: Vec<String> = db
            .list_mysql_databases(false)
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert!(!names.contains(&"information_schema".to_string()));
    }

    #[tokio::test]
    async fn test_annotations_survive_refresh() {
        let db = Database::new(":memory:").unwrap();
        let source = stub();
        sync_mysql_metadata(&db, &source).await.unwrap();

        let legacy = Annotation {
            enabled: false,
            remark: Some("legacy".to_string()),
        };
        assert!(db.set_mysql_database_annotation("dispensing", &legacy).unwrap());
        assert!(db
            .set_mysql_table_annotation("dispensing", "order_info", &legacy)
            .unwrap());

        sync_mysql_metadata(&db, &source).await.unwrap();

        let database = db.get_mysql_database("dispensing").unwrap().unwrap();
        assert!(!database.enabled);
        assert_eq!(database.remark.as_deref(), Some("legacy"));

        let table = db.get_mysql_table("dispensing", "order_info").unwrap().unwrap();
        assert!(!table.enabled);
        assert_eq!(table.remark.as_deref(), Some("legacy"));
        assert_eq!(table.table_comment, "订单");

        let untouched = db.get_mysql_database("hospital").unwrap().unwrap();
        assert!(untouched.enabled);
        assert_eq!(untouched.remark, None);
    }

    #[tokio::test]
    async fn test_one_failing_database_does_not_abort_sync() {
        let db = Database::new(":memory:").unwrap();
        let mut source = stub();
        source.failing.insert("dispensing".to_string());

        let summary = sync_mysql_metadata(&db, &source).await.unwrap();
        assert_eq!(summary.database_count, 2);
        assert_eq!(summary.table_count, 1);
        assert_eq!(db.list_mysql_tables(Some("hospital"), false).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_database_listing_failure_is_an_error() {
        struct Disabled;

        #[async_trait]
        impl MysqlMetadataSource for Disabled {
            async fn list_databases(&self) -> Result<Vec<Value>, BridgeError> {
                Err(BridgeError::NotEnabled("MySQL"))
            }
            async fn list_tables(&self, _database: &str) -> Result<Vec<Value>, BridgeError> {
                unreachable!("tables are never listed without databases")
            }
        }

        let db = Database::new(":memory:").unwrap();
        let err = sync_mysql_metadata(&db, &Disabled).await.unwrap_err();
        assert!(matches!(err, SyncError::Bridge(BridgeError::NotEnabled(_))));
    }

    #[tokio::test]
    async fn test_count_leaves_cache_untouched() {
        let db = Database::new(":memory:").unwrap();
        let source = stub();

        let summary = count_mysql_metadata(&source).await.unwrap();
        assert_eq!(summary.database_count, 2);
        assert_eq!(summary.table_count, 3);
        assert!(db.list_mysql_databases(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_stops_at_first_table_failure() {
        let mut source = stub();
        source.failing.insert("hospital".to_string());

        let err = count_mysql_metadata(&source).await.unwrap_err();
        assert_eq!(err.to_string(), "Access denied for hospital");
    }

    #[tokio::test]
    async fn test_count_through_worker() {
        // Every worker call answers with one row naming the `shop` database
        let client = crate::mcp::mysql::tests::scripted_client(r#"[{"Database":"shop"}]"#);
        let summary = count_mysql_metadata(&client).await.unwrap();
        assert_eq!(summary.database_count, 1);
        assert_eq!(summary.table_count, 1);
    }
}
