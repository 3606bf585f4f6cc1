//! Agent dispatch: picks a prompt and tool set per chat mode, resolves
//! mentions, and drives the model through its tool calls.

pub mod system_prompt;
mod tool_loop;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use thiserror::Error;

use crate::ai::{AiClient, Message, MockAiClient, TraceEntry};
use crate::config::Config;
use crate::db::Database;
use crate::mcp::{BridgeError, BrowserSession, GitlabToolClient, MysqlToolClient};
use crate::mentions::{prepare_code_review_message, prepare_data_analysis_message, ResolvedContext};
use crate::models::ChatMode;
use crate::tools::builtin::{load_commit_diffs, render_commit_diff};
use crate::tools::{self, ToolContext, ToolGroup, ToolRegistry};

/// Model round trips allowed per message before giving up
pub const MAX_TOOL_ITERATIONS: usize = 10;

/// Diff text placed in the code-review prompt is cut at this many characters
pub const MAX_PROMPT_DIFF_CHARS: usize = 60_000;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("不支持的Agent模式: {0}")]
    UnsupportedMode(String),
    #[error("请先配置模型API信息")]
    ModelNotConfigured,
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("模型调用失败: {0}")]
    Ai(String),
    #[error("工具调用轮数超过上限 ({0})")]
    TooManyToolRounds(usize),
}

/// Exact-match mode parsing
pub fn parse_mode(mode: &str) -> Result<ChatMode, DispatchError> {
    ChatMode::from_str(mode).ok_or_else(|| DispatchError::UnsupportedMode(mode.to_string()))
}

fn tool_groups(mode: ChatMode) -> Vec<ToolGroup> {
    match mode {
        ChatMode::Normal => vec![ToolGroup::Web],
        ChatMode::DataAnalysis => vec![ToolGroup::Mysql],
        ChatMode::CodeReview => vec![ToolGroup::Gitlab],
    }
}

fn temperature(mode: ChatMode) -> f32 {
    match mode {
        ChatMode::Normal => 0.7,
        ChatMode::DataAnalysis => 0.1,
        ChatMode::CodeReview => 0.3,
    }
}

/// One chat message to answer
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub mode: ChatMode,
    pub message: String,
    pub conversation_id: Option<i64>,
    /// Commit whose diff is placed in the code-review prompt
    pub commit_sha: Option<String>,
    pub project_id: Option<i64>,
}

impl AgentRequest {
    pub fn new(mode: ChatMode, message: impl Into<String>) -> Self {
        AgentRequest {
            mode,
            message: message.into(),
            conversation_id: None,
            commit_sha: None,
            project_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentReply {
    pub content: String,
    /// Databases and tables resolved from mentions (data analysis only)
    pub context: Option<ResolvedContext>,
}

/// Everything one run needs, built per request from the stored config
struct PreparedRun {
    system_prompt: String,
    user_message: String,
    registry: ToolRegistry,
    context: Option<ResolvedContext>,
}

pub struct AgentDispatcher {
    db: Arc<Database>,
    config: Config,
    browser: Arc<BrowserSession>,
    /// Mock AI client for tests (bypasses the real API)
    mock_ai_client: Option<MockAiClient>,
}

impl AgentDispatcher {
    pub fn new(db: Arc<Database>, config: Config, browser: Arc<BrowserSession>) -> Self {
        AgentDispatcher {
            db,
            config,
            browser,
            mock_ai_client: None,
        }
    }

    pub fn with_mock_ai_client(mut self, client: MockAiClient) -> Self {
        self.mock_ai_client = Some(client);
        self
    }

    pub fn get_mock_trace(&self) -> Vec<TraceEntry> {
        self.mock_ai_client
            .as_ref()
            .map(|m| m.get_trace())
            .unwrap_or_default()
    }

    /// Answer one message under its mode.
    pub async fn dispatch(&self, request: &AgentRequest) -> Result<AgentReply, DispatchError> {
        log::info!(
            "[DISPATCH] Mode {} message ({} chars)",
            request.mode,
            request.message.chars().count()
        );

        let model_config = self
            .db
            .get_model_config()?
            .filter(|c| !c.api_key.trim().is_empty())
            .ok_or(DispatchError::ModelNotConfigured)?;

        let run = match request.mode {
            ChatMode::Normal => self.prepare_normal(request),
            ChatMode::DataAnalysis => self.prepare_data_analysis(request)?,
            ChatMode::CodeReview => self.prepare_code_review(request).await?,
        };

        let client = match self.mock_ai_client {
            Some(ref mock) => AiClient::Mock(mock.clone()),
            None => AiClient::from_model_config(&model_config)
                .map_err(DispatchError::Ai)?
                .with_temperature(temperature(request.mode)),
        };

        let mut tool_context = ToolContext::new().with_mode(request.mode.as_str());
        if let Some(id) = request.conversation_id {
            tool_context = tool_context.with_conversation(id);
        }

        let messages = vec![
            Message::system(run.system_prompt),
            Message::user(run.user_message),
        ];
        let content = self
            .run_tool_loop(
                &client,
                messages,
                &run.registry,
                &tool_groups(request.mode),
                &tool_context,
            )
            .await?;

        Ok(AgentReply {
            content,
            context: run.context,
        })
    }

    fn prepare_normal(&self, request: &AgentRequest) -> PreparedRun {
        let mut registry = ToolRegistry::new();
        tools::register_web_tools(&mut registry, self.browser.clone());
        PreparedRun {
            system_prompt: system_prompt::CHAT_PROMPT.to_string(),
            user_message: request.message.trim().to_string(),
            registry,
            context: None,
        }
    }

    fn prepare_data_analysis(&self, request: &AgentRequest) -> Result<PreparedRun, DispatchError> {
        let stored = self.db.get_mysql_config()?;
        // Decided before any worker is built or spawned
        let enabled = stored
            .as_ref()
            .map(|c| c.enabled)
            .unwrap_or(self.config.mysql_defaults.enabled);
        if !enabled {
            log::info!("[DISPATCH] MySQL is disabled, refusing data analysis");
            return Err(BridgeError::NotEnabled("MySQL").into());
        }

        let client = MysqlToolClient::new(stored.as_ref(), &self.config)?;
        let prepared = prepare_data_analysis_message(&self.db, &request.message)?;

        let mut registry = ToolRegistry::new();
        tools::register_mysql_tools(&mut registry, Arc::new(client));
        Ok(PreparedRun {
            system_prompt: system_prompt::DATA_ANALYSIS_PROMPT.to_string(),
            user_message: prepared.text,
            registry,
            context: prepared.context,
        })
    }

    async fn prepare_code_review(&self, request: &AgentRequest) -> Result<PreparedRun, DispatchError> {
        let stored = self.db.get_gitlab_config()?;
        let client = Arc::new(GitlabToolClient::new(stored.as_ref(), &self.config)?);
        let user_message = prepare_code_review_message(&self.db, &request.message)?;

        let (diff, notice) = match request.commit_sha.as_deref().map(str::trim) {
            Some(sha) if !sha.is_empty() => self.prompt_diff(&client, sha, request.project_id).await,
            _ => (String::new(), None),
        };

        let mut registry = ToolRegistry::new();
        tools::register_gitlab_tools(&mut registry, self.db.clone(), client);
        Ok(PreparedRun {
            system_prompt: system_prompt::render_code_review_prompt(&diff, notice.as_deref()),
            user_message,
            registry,
            context: None,
        })
    }

    /// Diff text for the review prompt, plus a notice when it is missing or cut.
    /// Lookup failures leave the prompt without a diff rather than failing the chat.
    async fn prompt_diff(
        &self,
        client: &GitlabToolClient,
        commit_sha: &str,
        project_id: Option<i64>,
    ) -> (String, Option<String>) {
        let project_id = match project_id {
            Some(id) => Some(id),
            None => match self.db.find_commit_project_id(commit_sha) {
                Ok(found) => found,
                Err(e) => {
                    log::error!("[DISPATCH] Commit lookup failed for {}: {}", commit_sha, e);
                    None
                }
            },
        };
        let Some(project_id) = project_id else {
            log::warn!("[DISPATCH] No project known for commit {}", commit_sha);
            return (
                String::new(),
                Some(format!("未找到提交 {} 所属的项目，未能加载代码差异。", commit_sha)),
            );
        };

        match load_commit_diffs(&self.db, client, project_id, commit_sha).await {
            Ok(diffs) => truncate_diff(render_commit_diff(&diffs), MAX_PROMPT_DIFF_CHARS),
            Err(e) => {
                log::error!("[DISPATCH] Failed to load diff for {}: {}", commit_sha, e);
                (String::new(), Some(format!("加载代码差异失败: {}", e)))
            }
        }
    }
}

/// Cut `diff` to `max_chars`, returning a notice when anything was dropped.
pub fn truncate_diff(diff: String, max_chars: usize) -> (String, Option<String>) {
    let total = diff.chars().count();
    match diff.char_indices().nth(max_chars) {
        Some((cut, _)) => (
            diff[..cut].to_string(),
            Some(format!(
                "注意：代码差异共 {} 个字符，过长已截断，仅展示前 {} 个字符。",
                total, max_chars
            )),
        ),
        None => (diff, None),
    }
}
