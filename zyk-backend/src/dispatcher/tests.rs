//! Dispatcher runs against an in-memory database and a mock model client.

use super::*;
use crate::ai::{AiError, AiResponse, MockAiClient, ToolCall};
use crate::models::{
    config_keys, GitlabCommit, GitlabCommitDiff, GitlabUser, MysqlDatabase, MysqlTable,
};
use serde_json::json;
use std::time::Duration;

struct TestHarness {
    dispatcher: AgentDispatcher,
    db: Arc<Database>,
}

impl TestHarness {
    fn new(mock_responses: Vec<Result<AiResponse, AiError>>) -> Self {
        let db = Arc::new(Database::new(":memory:").expect("in-memory db"));
        db.set_config_value(
            config_keys::MODEL,
            &json!({"api_key": "sk-test", "base_url": "http://mock.test/v1", "model": "mock"}),
        )
        .expect("save model config");

        let mut config = Config::from_env();
        // Any spawn in these tests is a bug; make it fail loudly
        config.worker_commands.mysql = "/nonexistent/mysql-worker".to_string();
        config.worker_commands.gitlab = "/nonexistent/gitlab-worker".to_string();
        config.worker_timeouts.gitlab = Duration::from_secs(1);

        let browser = Arc::new(BrowserSession::new("/nonexistent/browser", Duration::from_secs(1)));
        let dispatcher = AgentDispatcher::new(db.clone(), config, browser)
            .with_mock_ai_client(MockAiClient::new(mock_responses));
        TestHarness { dispatcher, db }
    }

    fn answering(text: &str) -> Self {
        Self::new(vec![Ok(AiResponse::text(text.to_string()))])
    }

    fn seed_mysql_metadata(&self) {
        self.db
            .replace_mysql_databases(&[MysqlDatabase {
                name: "dispensing".to_string(),
                enabled: true,
                remark: Some("配送".to_string()),
            }])
            .unwrap();
        self.db
            .replace_mysql_tables(
                "dispensing",
                &[MysqlTable {
                    database_name: "dispensing".to_string(),
                    table_name: "order_info".to_string(),
                    table_type: "BASE TABLE".to_string(),
                    table_comment: String::new(),
                    enabled: true,
                    remark: None,
                }],
            )
            .unwrap();
    }
}

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

#[test]
fn test_mode_parsing_is_exact() {
    assert_eq!(parse_mode("data_analysis").unwrap(), ChatMode::DataAnalysis);
    let err = parse_mode("Data_Analysis").unwrap_err();
    assert_eq!(err.to_string(), "不支持的Agent模式: Data_Analysis");
    assert!(parse_mode("").is_err());
}

#[tokio::test]
async fn test_missing_model_config() {
    let harness = TestHarness::answering("unused");
    harness
        .db
        .set_config_value(config_keys::MODEL, &json!({"api_key": ""}))
        .unwrap();

    let err = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::Normal, "你好"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "请先配置模型API信息");
    assert!(harness.dispatcher.get_mock_trace().is_empty());
}

#[tokio::test]
async fn test_disabled_mysql_short_circuits_data_analysis() {
    let harness = TestHarness::answering("unused");
    harness.seed_mysql_metadata();
    harness
        .db
        .set_config_value(config_keys::MYSQL, &json!({"enabled": false}))
        .unwrap();

    let err = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::DataAnalysis, "@dispensing 统计订单"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Bridge(BridgeError::NotEnabled("MySQL"))));
    assert!(harness.dispatcher.get_mock_trace().is_empty());
}

#[tokio::test]
async fn test_data_analysis_injects_context_block() {
    let harness = TestHarness::answering("共 42 条订单");
    harness.seed_mysql_metadata();

    let reply = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::DataAnalysis, "@配送 @order_info 统计一月订单"))
        .await
        .unwrap();
    assert_eq!(reply.content, "共 42 条订单");
    let context = reply.context.unwrap();
    assert_eq!(context.databases, vec!["dispensing"]);
    assert_eq!(context.tables, vec!["order_info"]);

    let trace = harness.dispatcher.get_mock_trace();
    assert_eq!(trace.len(), 1);
    let messages = &trace[0].input_messages;
    assert_eq!(messages[0].content, system_prompt::DATA_ANALYSIS_PROMPT);
    assert!(messages[1].content.starts_with("[DB_TABLE_CONTEXT]\n"));
    assert!(messages[1].content.ends_with("用户问题：统计一月订单"));
    assert_eq!(
        trace[0].input_tools,
        vec![
            "describe_table",
            "execute_mysql_query",
            "get_table_indexes",
            "list_databases",
            "list_tables",
            "show_table_status"
        ]
    );
}

#[tokio::test]
async fn test_tool_failures_are_fed_back_to_the_model() {
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools(
            String::new(),
            vec![tool_call("call_1", "browse_web", json!({"query": ""}))],
        )),
        Ok(AiResponse::text("请提供要浏览的网址".to_string())),
    ]);

    let reply = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::Normal, "帮我看看这个网页"))
        .await
        .unwrap();
    assert_eq!(reply.content, "请提供要浏览的网址");

    let trace = harness.dispatcher.get_mock_trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].input_tools, vec!["browse_web"]);
    let response = &trace[1].input_tool_history[0].tool_responses[0];
    assert!(response.is_error);
    assert_eq!(response.tool_call_id, "call_1");
    assert_eq!(response.content, "浏览失败: 未提供网址或关键词");
}

#[tokio::test]
async fn test_tools_of_other_modes_are_unavailable() {
    let harness = TestHarness::new(vec![
        Ok(AiResponse::with_tools(
            String::new(),
            vec![tool_call("call_1", "execute_mysql_query", json!({"query": "SELECT 1"}))],
        )),
        Ok(AiResponse::text("done".to_string())),
    ]);

    harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::Normal, "查询"))
        .await
        .unwrap();
    let trace = harness.dispatcher.get_mock_trace();
    let response = &trace[1].input_tool_history[0].tool_responses[0];
    assert_eq!(response.content, "Tool 'execute_mysql_query' not found");
}

#[tokio::test]
async fn test_tool_loop_is_bounded() {
    let responses = (0..MAX_TOOL_ITERATIONS + 2)
        .map(|i| {
            Ok(AiResponse::with_tools(
                String::new(),
                vec![tool_call(&format!("call_{}", i), "browse_web", json!({}))],
            ))
        })
        .collect();
    let harness = TestHarness::new(responses);

    let err = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::Normal, "loop"))
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::TooManyToolRounds(MAX_TOOL_ITERATIONS)));
    assert_eq!(harness.dispatcher.get_mock_trace().len(), MAX_TOOL_ITERATIONS);
}

#[tokio::test]
async fn test_model_errors_surface() {
    let harness = TestHarness::new(vec![Err(AiError::with_status("Model API error: bad key", 401))]);
    let err = harness
        .dispatcher
        .dispatch(&AgentRequest::new(ChatMode::Normal, "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "模型调用失败: Model API error: bad key");
}

#[tokio::test]
async fn test_code_review_rewrites_users_and_embeds_cached_diff() {
    let harness = TestHarness::answering("总体评价：良好");
    harness
        .db
        .replace_gitlab_users(&[GitlabUser {
            id: 3,
            username: "yuanwu".to_string(),
            name: Some("袁兀".to_string()),
            avatar_url: None,
            enabled: true,
            remark: None,
        }])
        .unwrap();
    harness
        .db
        .replace_gitlab_commits(
            7,
            "main",
            &[GitlabCommit {
                project_id: 7,
                branch: "main".to_string(),
                commit_sha: "abc123".to_string(),
                title: Some("fix: 统计口径".to_string()),
                author_name: Some("yuanwu".to_string()),
                created_at: None,
                web_url: None,
                enabled: true,
                remark: None,
            }],
        )
        .unwrap();
    harness
        .db
        .replace_gitlab_commit_diffs(
            7,
            "abc123",
            &[GitlabCommitDiff {
                project_id: 7,
                commit_sha: "abc123".to_string(),
                old_path: Some("stats.py".to_string()),
                new_path: Some("stats.py".to_string()),
                diff: Some("-count = 0\n+count = 1".to_string()),
                enabled: true,
                remark: None,
            }],
        )
        .unwrap();

    let mut request = AgentRequest::new(ChatMode::CodeReview, "@袁兀 查看他的最近提交情况");
    request.commit_sha = Some("abc123".to_string());
    harness.dispatcher.dispatch(&request).await.unwrap();

    let trace = harness.dispatcher.get_mock_trace();
    let messages = &trace[0].input_messages;
    assert!(messages[0]
        .content
        .contains("## 代码差异\ndiff --git a/stats.py b/stats.py\n-count = 0\n+count = 1"));
    assert_eq!(messages[1].content, "yuanwu 查看他的最近提交情况");
    assert_eq!(trace[0].input_tools, vec!["get_commit_diff", "get_user_commits"]);
}

#[tokio::test]
async fn test_code_review_unknown_commit_keeps_going() {
    let harness = TestHarness::answering("ok");
    let mut request = AgentRequest::new(ChatMode::CodeReview, "review");
    request.commit_sha = Some("deadbeef".to_string());

    harness.dispatcher.dispatch(&request).await.unwrap();
    let system = &harness.dispatcher.get_mock_trace()[0].input_messages[0].content;
    assert!(system.contains("(未提供diff内容)"));
    assert!(system.contains("未找到提交 deadbeef 所属的项目"));
}

#[test]
fn test_truncate_diff() {
    let (text, notice) = truncate_diff("短".to_string(), 10);
    assert_eq!(text, "短");
    assert!(notice.is_none());

    let (text, notice) = truncate_diff("一二三四五".to_string(), 3);
    assert_eq!(text, "一二三");
    assert_eq!(
        notice.as_deref(),
        Some("注意：代码差异共 5 个字符，过长已截断，仅展示前 3 个字符。")
    );
}
