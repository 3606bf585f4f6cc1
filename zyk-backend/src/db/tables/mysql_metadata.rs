//! Cached MySQL database and table listings

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult, Row};

use crate::models::{Annotation, MysqlDatabase, MysqlTable};
use super::super::Database;

impl Database {
    fn row_to_mysql_database(row: &Row) -> rusqlite::Result<MysqlDatabase> {
        Ok(MysqlDatabase {
            name: row.get(0)?,
            enabled: row.get::<_, i64>(1)? != 0,
            remark: row.get(2)?,
        })
    }

    fn row_to_mysql_table(row: &Row) -> rusqlite::Result<MysqlTable> {
        Ok(MysqlTable {
            database_name: row.get(0)?,
            table_name: row.get(1)?,
            table_type: row.get(2)?,
            table_comment: row.get(3)?,
            enabled: row.get::<_, i64>(4)? != 0,
            remark: row.get(5)?,
        })
    }

    /// List cached databases, optionally only the enabled ones
    pub fn list_mysql_databases(&self, enabled_only: bool) -> SqliteResult<Vec<MysqlDatabase>> {
        let conn = self.conn();
        let sql = if enabled_only {
            "SELECT name, enabled, remark FROM mysql_databases WHERE enabled = 1 ORDER BY name"
        } else {
            "SELECT name, enabled, remark FROM mysql_databases ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Self::row_to_mysql_database(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_mysql_database(&self, name: &str) -> SqliteResult<Option<MysqlDatabase>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT name, enabled, remark FROM mysql_databases WHERE name = ?1",
            [name],
            |row| Self::row_to_mysql_database(row),
        )
        .optional()
    }

    /// Replace every cached database row in one transaction
    pub fn replace_mysql_databases(&self, rows: &[MysqlDatabase]) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM mysql_databases", [])?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO mysql_databases (name, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![row.name, row.enabled as i64, row.remark, now],
            )?;
        }
        tx.commit()
    }

    /// List cached tables, optionally scoped to one database
    pub fn list_mysql_tables(
        &self,
        database: Option<&str>,
        enabled_only: bool,
    ) -> SqliteResult<Vec<MysqlTable>> {
        let conn = self.conn();
        let mut sql = String::from(
            "SELECT database_name, table_name, table_type, table_comment, enabled, remark
             FROM mysql_tables WHERE (?1 IS NULL OR database_name = ?1)",
        );
        if enabled_only {
            sql.push_str(" AND enabled = 1");
        }
        sql.push_str(" ORDER BY database_name, table_name");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([database], |row| Self::row_to_mysql_table(row))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_mysql_table(&self, database: &str, table: &str) -> SqliteResult<Option<MysqlTable>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT database_name, table_name, table_type, table_comment, enabled, remark
             FROM mysql_tables WHERE database_name = ?1 AND table_name = ?2",
            [database, table],
            |row| Self::row_to_mysql_table(row),
        )
        .optional()
    }

    /// Replace the cached tables of a single database in one transaction
    pub fn replace_mysql_tables(&self, database: &str, rows: &[MysqlTable]) -> SqliteResult<()> {
        let mut conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM mysql_tables WHERE database_name = ?1", [database])?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO mysql_tables
                 (database_name, table_name, table_type, table_comment, enabled, remark, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    database,
                    row.table_name,
                    row.table_type,
                    row.table_comment,
                    row.enabled as i64,
                    row.remark,
                    now
                ],
            )?;
        }
        tx.commit()
    }

    /// Returns false when no such database is cached
    pub fn set_mysql_database_annotation(&self, name: &str, annotation: &Annotation) -> SqliteResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE mysql_databases SET enabled = ?1, remark = ?2, updated_at = ?3 WHERE name = ?4",
            rusqlite::params![
                annotation.enabled as i64,
                annotation.remark,
                Utc::now().to_rfc3339(),
                name
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn set_mysql_table_annotation(
        &self,
        database: &str,
        table: &str,
        annotation: &Annotation,
    ) -> SqliteResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE mysql_tables SET enabled = ?1, remark = ?2, updated_at = ?3
             WHERE database_name = ?4 AND table_name = ?5",
            rusqlite::params![
                annotation.enabled as i64,
                annotation.remark,
                Utc::now().to_rfc3339(),
                database,
                table
            ],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(db: &str, name: &str, enabled: bool) -> MysqlTable {
        MysqlTable {
            database_name: db.to_string(),
            table_name: name.to_string(),
            table_type: "BASE TABLE".to_string(),
            table_comment: String::new(),
            enabled,
            remark: None,
        }
    }

    #[test]
    fn test_replace_tables_only_touches_one_database() {
        let db = Database::new(":memory:").unwrap();
        db.replace_mysql_tables("orders", &[table("orders", "order_info", true)])
            .unwrap();
        db.replace_mysql_tables("product", &[table("product", "central_drug", true)])
            .unwrap();

        db.replace_mysql_tables("orders", &[table("orders", "order_log", false)])
            .unwrap();

        let all = db.list_mysql_tables(None, false).unwrap();
        let names: Vec<&str> = all.iter().map(|t| t.table_name.as_str()).collect();
        assert_eq!(names, vec!["order_log", "central_drug"]);

        let enabled = db.list_mysql_tables(Some("orders"), true).unwrap();
        assert!(enabled.is_empty());
    }

    #[test]
    fn test_set_annotation_on_missing_row_reports_false() {
        let db = Database::new(":memory:").unwrap();
        let annotation = Annotation {
            enabled: false,
            remark: Some("订单库".to_string()),
        };
        assert!(!db.set_mysql_database_annotation("nope", &annotation).unwrap());

        db.replace_mysql_databases(&[MysqlDatabase {
            name: "orders".to_string(),
            enabled: true,
            remark: None,
        }])
        .unwrap();
        assert!(db.set_mysql_database_annotation("orders", &annotation).unwrap());

        let row = db.get_mysql_database("orders").unwrap().unwrap();
        assert!(!row.enabled);
        assert_eq!(row.remark.as_deref(), Some("订单库"));
        assert!(db.list_mysql_databases(true).unwrap().is_empty());
    }
}
