//! Web browsing tool for the general chat agent

use crate::mcp::browser::EMPTY_QUERY_MESSAGE;
use crate::mcp::BrowserSession;
use crate::tools::registry::Tool;
use crate::tools::types::{
    PropertySchema, ToolContext, ToolDefinition, ToolGroup, ToolInputSchema, ToolResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Page text is cut here before it goes back to the model
const MAX_PAGE_CHARS: usize = 20_000;

#[derive(Debug, Deserialize)]
struct BrowseParams {
    #[serde(default)]
    query: String,
}

pub struct BrowseWebTool {
    definition: ToolDefinition,
    session: Arc<BrowserSession>,
}

impl BrowseWebTool {
    pub fn new(session: Arc<BrowserSession>) -> Self {
        BrowseWebTool {
            definition: ToolDefinition {
                name: "browse_web".to_string(),
                description: "浏览网页或搜索关键词并返回页面快照。传入完整URL直接访问，其他文本作为搜索关键词。"
                    .to_string(),
                input_schema: ToolInputSchema::default().with_property(
                    "query",
                    PropertySchema::string("网址或搜索关键词"),
                    true,
                ),
                group: ToolGroup::Web,
            },
            session,
        }
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}\n\n[页面内容过长，已截断]", &text[..cut]),
        None => text,
    }
}

#[async_trait]
impl Tool for BrowseWebTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, params: Value, _context: &ToolContext) -> ToolResult {
        let params: BrowseParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(format!("Invalid parameters: {}", e)),
        };
        if params.query.trim().is_empty() {
            return ToolResult::error(EMPTY_QUERY_MESSAGE);
        }

        match self.session.browse(&params.query).await {
            Ok(text) => ToolResult::success(truncate_chars(text, MAX_PAGE_CHARS)),
            Err(e) => {
                log::warn!("[BROWSER] browse_web failed: {}", e);
                ToolResult::error(format!("浏览失败: {}", e))
            }
        }
    }
}
