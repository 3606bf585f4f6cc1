//! Long-lived browser worker session.
//!
//! Unlike the MySQL and GitLab workers, the browser worker keeps page state
//! between calls, so one process is started lazily and reused. Requests are
//! serialized through a mutex; a dead or wedged worker is replaced on the
//! next call.

use serde::Serialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::bridge::WorkerCommand;
use super::protocol::{initialize_request, initialized_notification, response_id, tool_call_request};
use super::result::{describe_error, first_text_block, joined_text_blocks};
use super::BridgeError;

const LABEL: &str = "BROWSER";
const NAVIGATE_TOOL: &str = "browser_navigate";
const SEARCH_URL: &str = "https://duckduckgo.com/?q=";

pub const EMPTY_QUERY_MESSAGE: &str = "浏览失败: 未提供网址或关键词";

/// URLs pass through; anything else becomes a search.
pub fn navigation_url(query_or_url: &str) -> String {
    if query_or_url.starts_with("http://") || query_or_url.starts_with("https://") {
        query_or_url.to_string()
    } else {
        format!("{}{}", SEARCH_URL, urlencoding::encode(query_or_url))
    }
}

struct BrowserConnection {
    process: Child,
    stdin: ChildStdin,
    stdout_lines: Lines<BufReader<ChildStdout>>,
    request_id: u64,
}

impl BrowserConnection {
    async fn start(command: &WorkerCommand, timeout: Duration) -> Result<Self, BridgeError> {
        log::info!("[{}] Starting worker: {} {:?}", LABEL, command.program, command.args);

        let mut process = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::Transport(format!(
                    "failed to start browser worker '{}': {}",
                    command.program, e
                ))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Transport("browser worker has no stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Transport("browser worker has no stdout".to_string()))?;
        if let Some(stderr) = process.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::warn!("[{}] Worker stderr: {}", LABEL, line);
                }
            });
        }

        let mut connection = BrowserConnection {
            process,
            stdin,
            stdout_lines: BufReader::new(stdout).lines(),
            request_id: 0,
        };

        let id = connection.next_id();
        connection
            .send_request(id, &initialize_request(id), timeout)
            .await?;
        connection.write_document(&initialized_notification()).await?;
        log::info!("[{}] Worker initialized", LABEL);
        Ok(connection)
    }

    fn next_id(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.process.try_wait(), Ok(None))
    }

    async fn write_document<T: Serialize>(&mut self, document: &T) -> Result<(), BridgeError> {
        let mut line = serde_json::to_string(document)
            .map_err(|e| BridgeError::Protocol(format!("failed to encode request: {}", e)))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to write to browser worker: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| BridgeError::Transport(format!("failed to flush browser worker: {}", e)))
    }

    /// Write a request and wait for the response carrying its id.
    async fn send_request<T: Serialize>(
        &mut self,
        id: u64,
        request: &T,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.write_document(request).await?;

        let document = match tokio::time::timeout(timeout, self.read_response(id)).await {
            Ok(read) => read?,
            Err(_) => {
                return Err(BridgeError::Protocol(format!(
                    "browser worker did not answer request {} within {}s",
                    id,
                    timeout.as_secs()
                )))
            }
        };

        if let Some(error) = document.get("error") {
            return Err(BridgeError::Tool(format!("Tool Error: {}", describe_error(error))));
        }
        Ok(document.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn read_response(&mut self, expected_id: u64) -> Result<Value, BridgeError> {
        loop {
            let line = self
                .stdout_lines
                .next_line()
                .await
                .map_err(|e| BridgeError::Transport(format!("failed to read browser worker: {}", e)))?
                .ok_or_else(|| BridgeError::Transport("browser worker closed its output".to_string()))?;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(document) if response_id(&document) == Some(expected_id) => return Ok(document),
                Ok(_) => log::debug!("[{}] Skipping unrelated message: {}", LABEL, trimmed),
                Err(_) => log::debug!("[{}] Skipping non-JSON line: {}", LABEL, trimmed),
            }
        }
    }
}

/// Shared browser worker; cheap to hold in app state
pub struct BrowserSession {
    command: Option<WorkerCommand>,
    timeout: Duration,
    connection: Mutex<Option<BrowserConnection>>,
}

impl BrowserSession {
    pub fn new(command_line: &str, timeout: Duration) -> Self {
        BrowserSession {
            command: WorkerCommand::parse(command_line),
            timeout,
            connection: Mutex::new(None),
        }
    }

    /// Navigate to a URL, or search for free text, and return the page text.
    pub async fn browse(&self, query_or_url: &str) -> Result<String, BridgeError> {
        let query = query_or_url.trim();
        if query.is_empty() {
            return Err(BridgeError::Tool(EMPTY_QUERY_MESSAGE.to_string()));
        }
        let url = navigation_url(query);
        log::info!("[{}] Navigating to {}", LABEL, url);

        let mut slot = self.connection.lock().await;
        let mut connection = match slot.take() {
            Some(mut existing) => {
                if existing.is_alive() {
                    existing
                } else {
                    log::info!("[{}] Worker exited, restarting", LABEL);
                    self.connect().await?
                }
            }
            None => self.connect().await?,
        };

        let id = connection.next_id();
        let request = tool_call_request(id, NAVIGATE_TOOL, json!({ "url": url }));
        match connection.send_request(id, &request, self.timeout).await {
            Ok(result) => {
                *slot = Some(connection);
                page_text(&result)
            }
            // A tool-level failure leaves the worker usable
            Err(err @ BridgeError::Tool(_)) => {
                *slot = Some(connection);
                Err(err)
            }
            Err(err) => {
                log::warn!("[{}] Dropping worker after failure: {}", LABEL, err);
                Err(err)
            }
        }
    }

    async fn connect(&self) -> Result<BrowserConnection, BridgeError> {
        let command = self
            .command
            .as_ref()
            .ok_or_else(|| BridgeError::Transport("browser worker command is empty".to_string()))?;
        BrowserConnection::start(command, self.timeout).await
    }

    /// Stop the worker, if one is running.
    pub async fn shutdown(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            let _ = connection.process.kill().await;
            log::info!("[{}] Worker stopped", LABEL);
        }
    }
}

fn page_text(result: &Value) -> Result<String, BridgeError> {
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let message = first_text_block(result).unwrap_or("browser tool error");
        return Err(BridgeError::Tool(message.to_string()));
    }
    Ok(joined_text_blocks(result))
}
