pub mod builtin;
pub mod registry;
pub mod types;

pub use registry::{Tool, ToolRegistry};
pub use types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};

use crate::db::Database;
use crate::mcp::{BrowserSession, GitlabToolClient, MysqlToolClient};
use builtin::SchemaToolKind;
use std::sync::Arc;

/// Register the query tool and the schema-inspection tools
pub fn register_mysql_tools(registry: &mut ToolRegistry, client: Arc<MysqlToolClient>) {
    registry.register(Arc::new(builtin::MysqlQueryTool::new(client.clone())));
    for kind in SchemaToolKind::all() {
        registry.register(Arc::new(builtin::MysqlSchemaTool::new(kind, client.clone())));
    }
}

/// Register the commit tools used by code review
pub fn register_gitlab_tools(
    registry: &mut ToolRegistry,
    db: Arc<Database>,
    client: Arc<GitlabToolClient>,
) {
    registry.register(Arc::new(builtin::GitlabUserCommitsTool::new(
        db.clone(),
        client.clone(),
    )));
    registry.register(Arc::new(builtin::GitlabCommitDiffTool::new(db, client)));
}

pub fn register_web_tools(registry: &mut ToolRegistry, session: Arc<BrowserSession>) {
    registry.register(Arc::new(builtin::BrowseWebTool::new(session)));
}
