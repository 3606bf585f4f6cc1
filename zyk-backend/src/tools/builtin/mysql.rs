//! MySQL tools for the data-analysis agent

use crate::mcp::MysqlToolClient;
use crate::tools::registry::Tool;
use crate::tools::types::{
    string_param, PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema,
    ToolResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Render query rows as a Markdown table; column order follows the first row.
pub fn format_query_results(rows: &[Value]) -> String {
    let headers: Vec<String> = match rows.first() {
        Some(Value::Object(first)) => first.keys().cloned().collect(),
        Some(_) => vec!["value".to_string()],
        None => return "查询结果为空".to_string(),
    };

    let mut out = String::from("查询结果：\n\n");
    out.push_str(&format!("| {} |\n", headers.join(" | ")));
    out.push_str(&format!(
        "| {} |\n",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in rows {
        let cells: Vec<String> = match row {
            Value::Object(map) => headers
                .iter()
                .map(|h| map.get(h).map(table_cell).unwrap_or_default())
                .collect(),
            other => vec![table_cell(other)],
        };
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out.push_str(&format!("\n共 {} 条记录", rows.len()));
    out
}

fn table_cell(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    query: String,
}

/// Runs one SQL statement through the MySQL worker
pub struct MysqlQueryTool {
    definition: ToolDefinition,
    client: Arc<MysqlToolClient>,
}

impl MysqlQueryTool {
    pub fn new(client: Arc<MysqlToolClient>) -> Self {
        MysqlQueryTool {
            definition: ToolDefinition {
                name: "execute_mysql_query".to_string(),
                description: "执行MySQL查询语句并返回格式化的结果。只允许只读查询(SELECT/SHOW/DESCRIBE)。"
                    .to_string(),
                input_schema: ToolInputSchema::default().with_property(
                    "query",
                    PropertySchema::string("要执行的SQL语句，表名需带数据库前缀，如 dispensing.order_info"),
                    true,
                ),
                group: ToolGroup::Mysql,
            },
            client,
        }
    }
}

#[async_trait]
impl Tool for MysqlQueryTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
        let params: QueryParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };
        let sql = params.query.trim();
        if sql.is_empty() {
            return ToolResult::error("查询失败: SQL语句为空");
        }

        log::info!("[MYSQL_MCP] execute_mysql_query on {}: {}", self.client.target(), sql);
        match self.client.execute_query(sql).await {
            Ok(rows) => ToolResult::success(format_query_results(&rows))
                .with_metadata(json!({ "row_count": rows.len() })),
            Err(e) => {
                log::error!("[MYSQL_MCP] Query failed: {}", e);
                ToolResult::error(format!("查询失败: {}", e))
            }
        }
    }
}

/// Schema-inspection tools exposed alongside the query tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaToolKind {
    ListDatabases,
    ListTables,
    DescribeTable,
    ShowTableStatus,
    GetTableIndexes,
}

impl SchemaToolKind {
    pub fn all() -> [SchemaToolKind; 5] {
        [
            SchemaToolKind::ListDatabases,
            SchemaToolKind::ListTables,
            SchemaToolKind::DescribeTable,
            SchemaToolKind::ShowTableStatus,
            SchemaToolKind::GetTableIndexes,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SchemaToolKind::ListDatabases => "list_databases",
            SchemaToolKind::ListTables => "list_tables",
            SchemaToolKind::DescribeTable => "describe_table",
            SchemaToolKind::ShowTableStatus => "show_table_status",
            SchemaToolKind::GetTableIndexes => "get_table_indexes",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            SchemaToolKind::ListDatabases => "列出MySQL服务器上的所有数据库",
            SchemaToolKind::ListTables => "列出指定数据库中的所有表",
            SchemaToolKind::DescribeTable => "查看表结构(字段、类型、注释)",
            SchemaToolKind::ShowTableStatus => "查看数据库中各表的状态(行数、大小等)",
            SchemaToolKind::GetTableIndexes => "查看表的索引信息",
        }
    }

    fn input_schema(&self) -> ToolInputSchema {
        let database = PropertySchema::string("数据库名");
        let table = PropertySchema::string("表名");
        match self {
            SchemaToolKind::ListDatabases => ToolInputSchema::default(),
            SchemaToolKind::ListTables => {
                ToolInputSchema::default().with_property("database", database, true)
            }
            SchemaToolKind::ShowTableStatus => {
                ToolInputSchema::default().with_property("database", database, false)
            }
            SchemaToolKind::DescribeTable | SchemaToolKind::GetTableIndexes => {
                ToolInputSchema::default()
                    .with_property("table_name", table, true)
                    .with_property("database", database, false)
            }
        }
    }
}

pub struct MysqlSchemaTool {
    kind: SchemaToolKind,
    client: Arc<MysqlToolClient>,
}

impl MysqlSchemaTool {
    pub fn new(kind: SchemaToolKind, client: Arc<MysqlToolClient>) -> Self {
        MysqlSchemaTool { kind, client }
    }

    async fn run(&self, params: &Value) -> Result<Vec<Value>, String> {
        let database = string_param(params, "database");
        let table_name = string_param(params, "table_name");
        let require_table = || table_name.clone().ok_or_else(|| "缺少参数 table_name".to_string());

        let result = match self.kind {
            SchemaToolKind::ListDatabases => self.client.list_databases().await,
            SchemaToolKind::ListTables => {
                let database = database.ok_or_else(|| "缺少参数 database".to_string())?;
                self.client.list_tables(&database).await
            }
            SchemaToolKind::DescribeTable => {
                let table_name = require_table()?;
                self.client.describe_table(&table_name, database.as_deref()).await
            }
            SchemaToolKind::ShowTableStatus => {
                self.client.show_table_status(database.as_deref()).await
            }
            SchemaToolKind::GetTableIndexes => {
                let table_name = require_table()?;
                self.client.get_table_indexes(&table_name, database.as_deref()).await
            }
        };
        result.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl Tool for MysqlSchemaTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.kind.name().to_string(),
            description: self.kind.description().to_string(),
            input_schema: self.kind.input_schema(),
            group: ToolGroup::Mysql,
        }
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
        match self.run(&params).await {
            Ok(rows) if rows.is_empty() => ToolResult::success("查询结果为空"),
            Ok(rows) => match serde_json::to_string_pretty(&rows) {
                Ok(text) => ToolResult::success(text),
                Err(e) => ToolResult::error(format!("查询失败: {}", e)),
            },
            Err(e) => {
                log::error!("[MYSQL_MCP] {} failed: {}", self.kind.name(), e);
                ToolResult::error(format!("查询失败: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::mysql::tests::scripted_client;

    #[test]
    fn test_format_query_results_table() {
        let rows = vec![
            json!({"day": "2025-01-01", "total": 3}),
            json!({"day": "2025-01-02", "total": null}),
        ];
        assert_eq!(
            format_query_results(&rows),
            "查询结果：\n\n| day | total |\n| --- | --- |\n| 2025-01-01 | 3 |\n| 2025-01-02 | NULL |\n\n共 2 条记录"
        );
    }

    #[test]
    fn test_format_query_results_empty() {
        assert_eq!(format_query_results(&[]), "查询结果为空");
    }

    #[test]
    fn test_cells_cannot_break_the_table() {
        let rows = vec![json!({"note": "a|b\nc"})];
        assert!(format_query_results(&rows).contains("| a\\|b c |"));
    }

    #[tokio::test]
    async fn test_query_tool_formats_worker_rows() {
        let tool = MysqlQueryTool::new(Arc::new(scripted_client(r#"[{"n":1}]"#)));
        let result = tool
            .execute(json!({"query": "SELECT 1 AS n"}), &ToolContext::new())
            .await;
        assert!(result.success);
        assert!(result.content.ends_with("共 1 条记录"));
    }

    #[tokio::test]
    async fn test_query_tool_reports_tool_errors() {
        let tool = MysqlQueryTool::new(Arc::new(scripted_client(
            r#"{"isError":true,"content":[{"type":"text","text":"Unknown column 'x'"}]}"#,
        )));
        let result = tool
            .execute(json!({"query": "SELECT x"}), &ToolContext::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.content, "查询失败: Unknown column 'x'");
    }

    #[tokio::test]
    async fn test_schema_tool_requires_table_name() {
        let tool = MysqlSchemaTool::new(
            SchemaToolKind::DescribeTable,
            Arc::new(scripted_client("[]")),
        );
        let result = tool.execute(json!({}), &ToolContext::new()).await;
        assert_eq!(result.content, "查询失败: 缺少参数 table_name");
        assert_eq!(tool.definition().input_schema.required, vec!["table_name"]);
    }
}
