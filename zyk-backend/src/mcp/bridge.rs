//! One-shot worker process bridge.
//!
//! Every call spawns a fresh worker, writes the `initialize` request, the
//! `initialized` notification and the `tools/call` request in a single flush,
//! then drains stdout/stderr until the response carrying the call's id shows
//! up, the worker exits, or the deadline passes. The blocking work happens on
//! the calling thread; async callers go through [`ToolBridge::call_tool_async`].

use serde_json::Value;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::protocol::{encode_handshake, response_id};
use super::result::parse_response;
use super::BridgeError;

/// How long a single wait on the output streams may block
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounded read after the main loop, and again after a forced kill
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Program and arguments used to launch a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        WorkerCommand {
            program: program.into(),
            args,
        }
    }

    /// Split a whitespace separated command line. `None` when blank.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(WorkerCommand {
            program,
            args: parts.collect(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

enum StreamEvent {
    Line(StreamKind, String),
    Closed(StreamKind),
}

/// Forward lines of one output stream to the drain loop until EOF.
fn spawn_reader<R: Read + Send + 'static>(stream: R, kind: StreamKind, tx: Sender<StreamEvent>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send(StreamEvent::Line(kind, line)).is_err() {
                        return;
                    }
                }
            }
        }
        let _ = tx.send(StreamEvent::Closed(kind));
    });
}

/// Everything observed from one worker during a call
#[derive(Debug)]
struct Transcript {
    call_id: u64,
    stdout: Vec<String>,
    stderr: Vec<String>,
    documents: Vec<Value>,
    response: Option<Value>,
    stdout_open: bool,
    stderr_open: bool,
}

impl Transcript {
    fn new(call_id: u64) -> Self {
        Transcript {
            call_id,
            stdout: Vec::new(),
            stderr: Vec::new(),
            documents: Vec::new(),
            response: None,
            stdout_open: true,
            stderr_open: true,
        }
    }

    fn record(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Line(StreamKind::Stdout, line) => {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    if let Ok(document) = serde_json::from_str::<Value>(trimmed) {
                        if self.response.is_none()
                            && document.is_object()
                            && response_id(&document) == Some(self.call_id)
                        {
                            self.response = Some(document.clone());
                        }
                        self.documents.push(document);
                    }
                }
                self.stdout.push(line);
            }
            StreamEvent::Line(StreamKind::Stderr, line) => self.stderr.push(line),
            StreamEvent::Closed(StreamKind::Stdout) => self.stdout_open = false,
            StreamEvent::Closed(StreamKind::Stderr) => self.stderr_open = false,
        }
    }

    fn streams_open(&self) -> bool {
        self.stdout_open || self.stderr_open
    }

    /// Record whatever arrives until both streams close or `limit` passes.
    fn collect_for(&mut self, rx: &Receiver<StreamEvent>, limit: Duration) {
        let deadline = Instant::now() + limit;
        while self.streams_open() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match rx.recv_timeout(deadline - now) {
                Ok(event) => self.record(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.stdout_open = false;
                    self.stderr_open = false;
                }
            }
        }
    }

    fn stdout_text(&self) -> String {
        self.stdout.join("\n")
    }

    fn stderr_text(&self) -> String {
        self.stderr.join("\n")
    }

    /// Captured match, then a rescan for the call id, then the whole of
    /// stdout as one document, then the first parseable line.
    fn select_response(&mut self) -> Option<Value> {
        if let Some(response) = self.response.take() {
            return Some(response);
        }
        if let Some(found) = self
            .documents
            .iter()
            .find(|d| d.is_object() && response_id(d) == Some(self.call_id))
        {
            return Some(found.clone());
        }
        match serde_json::from_str::<Value>(self.stdout_text().trim()) {
            Ok(whole) => Some(whole),
            Err(_) => self.documents.first().cloned(),
        }
    }
}

/// Result of driving one worker process to completion
struct Exchange {
    transcript: Transcript,
    /// Exit code observed for a worker that exited on its own
    exit_code: Option<i32>,
    timed_out: bool,
}

impl Exchange {
    fn log(&self, label: &str, tool: &str) {
        let stdout = self.transcript.stdout_text();
        if !stdout.trim().is_empty() {
            log::info!("[{}] Worker stdout ({}): {}", label, tool, stdout.trim());
        }
        let stderr = self.transcript.stderr_text();
        if !stderr.trim().is_empty() {
            log::warn!("[{}] Worker stderr ({}): {}", label, tool, stderr.trim());
        }
    }

    fn into_result(mut self, timeout: Duration) -> Result<Value, BridgeError> {
        if let Some(code) = self.exit_code {
            if code != 0 {
                return Err(BridgeError::Transport(format!(
                    "MCP Server Error (exit code {}): {}",
                    code,
                    self.transcript.stderr_text()
                )));
            }
        }

        match self.transcript.select_response() {
            Some(document) if document.is_object() => parse_response(&document),
            _ if self.timed_out => Err(BridgeError::Protocol(format!(
                "no response within {}s: {}",
                timeout.as_secs_f32(),
                self.transcript.stdout_text()
            ))),
            _ => Err(BridgeError::Protocol(format!(
                "MCP Server returned no valid response: {}",
                self.transcript.stdout_text()
            ))),
        }
    }
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for a worker to exit on its own for at most `limit`.
fn wait_for_exit(child: &mut Child, limit: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + limit;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(20)),
            _ => return None,
        }
    }
}

/// Client for one kind of stdio tool worker
pub struct ToolBridge {
    label: &'static str,
    command: WorkerCommand,
    env: Vec<(String, String)>,
    timeout: Duration,
    poll_interval: Duration,
    next_id: AtomicU64,
}

impl ToolBridge {
    /// `env` is added on top of the inherited process environment.
    pub fn new(
        label: &'static str,
        command: WorkerCommand,
        env: Vec<(String, String)>,
        timeout: Duration,
    ) -> Self {
        ToolBridge {
            label,
            command,
            env,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Reserve the (initialize, tools/call) id pair. Never reset.
    fn next_ids(&self) -> (u64, u64) {
        let init_id = self.next_id.fetch_add(2, Ordering::SeqCst) + 1;
        (init_id, init_id + 1)
    }

    /// Run one tool call against a fresh worker. Blocks the current thread.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, BridgeError> {
        let (init_id, call_id) = self.next_ids();
        let payload = encode_handshake(init_id, call_id, name, arguments)
            .map_err(|e| BridgeError::Protocol(format!("failed to encode request: {}", e)))?;

        log::info!("[{}] Calling tool '{}' (id {})", self.label, name, call_id);
        let exchange = self.exchange(&payload, call_id)?;
        exchange.log(self.label, name);
        exchange.into_result(self.timeout)
    }

    /// Run [`ToolBridge::call_tool`] on the blocking thread pool.
    pub async fn call_tool_async(
        self: Arc<Self>,
        name: String,
        arguments: Value,
    ) -> Result<Value, BridgeError> {
        tokio::task::spawn_blocking(move || self.call_tool(&name, arguments))
            .await
            .map_err(|e| BridgeError::Transport(format!("worker task failed: {}", e)))?
    }

    fn spawn(&self) -> Result<Child, BridgeError> {
        Command::new(&self.command.program)
            .args(&self.command.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                BridgeError::Transport(format!(
                    "failed to start worker '{}': {}",
                    self.command.program, e
                ))
            })
    }

    fn exchange(&self, payload: &str, call_id: u64) -> Result<Exchange, BridgeError> {
        let mut child = self.spawn()?;
        let (mut stdin, stdout, stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    kill_quietly(&mut child);
                    return Err(BridgeError::Transport(
                        "worker started without stdio pipes".to_string(),
                    ));
                }
            };

        let (tx, rx) = mpsc::channel();
        spawn_reader(stdout, StreamKind::Stdout, tx.clone());
        spawn_reader(stderr, StreamKind::Stderr, tx);

        // A worker that dies early refuses the write; its exit code and
        // stderr tell the real story, so keep draining.
        if let Err(e) = stdin.write_all(payload.as_bytes()).and_then(|_| stdin.flush()) {
            log::warn!("[{}] Worker did not accept the request: {}", self.label, e);
        }

        let mut transcript = Transcript::new(call_id);
        let deadline = Instant::now() + self.timeout;
        let mut exit_status: Option<ExitStatus> = None;
        let mut timed_out = false;

        while transcript.response.is_none() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit_status = Some(status);
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("[{}] Failed to poll worker status: {}", self.label, e);
                    break;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                timed_out = true;
                break;
            }
            let wait = self.poll_interval.min(deadline - now);

            if !transcript.streams_open() {
                thread::sleep(wait);
                continue;
            }
            match rx.recv_timeout(wait) {
                Ok(event) => {
                    transcript.record(event);
                    while transcript.response.is_none() {
                        match rx.try_recv() {
                            Ok(event) => transcript.record(event),
                            Err(_) => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    transcript.stdout_open = false;
                    transcript.stderr_open = false;
                }
            }
        }

        if timed_out {
            log::warn!(
                "[{}] No response for id {} within {:?}, draining worker",
                self.label,
                call_id,
                self.timeout
            );
        }

        // Closing stdin tells a well-behaved worker to shut down.
        drop(stdin);
        let grace_start = Instant::now();
        transcript.collect_for(&rx, DRAIN_GRACE);

        let mut killed = false;
        if exit_status.is_none() {
            let remaining = DRAIN_GRACE.saturating_sub(grace_start.elapsed());
            exit_status = wait_for_exit(&mut child, remaining);
            if exit_status.is_none() {
                log::warn!("[{}] Worker still running, killing it", self.label);
                kill_quietly(&mut child);
                killed = true;
                transcript.collect_for(&rx, DRAIN_GRACE);
            }
        }

        let exit_code = if killed {
            None
        } else {
            exit_status.and_then(|status| status.code())
        };

        Ok(Exchange {
            transcript,
            exit_code,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn shell_bridge(script: &str, timeout: Duration) -> ToolBridge {
        ToolBridge::new(
            "TEST_MCP",
            WorkerCommand::new("sh", vec!["-c".to_string(), script.to_string()]),
            vec![],
            timeout,
        )
        .with_poll_interval(Duration::from_millis(50))
    }

    fn bridge(script: &str) -> ToolBridge {
        shell_bridge(script, Duration::from_secs(10))
    }

    #[test]
    fn test_ids_are_monotonic_pairs() {
        let b = bridge("true");
        assert_eq!(b.next_ids(), (1, 2));
        assert_eq!(b.next_ids(), (3, 4));
    }

    #[test]
    fn test_parse_worker_command() {
        let cmd = WorkerCommand::parse("  npx -y @playwright/mcp@latest ").unwrap();
        assert_eq!(cmd.program, "npx");
        assert_eq!(cmd.args, vec!["-y", "@playwright/mcp@latest"]);
        assert!(WorkerCommand::parse("   ").is_none());
    }

    #[test]
    fn test_text_content_response() {
        let b = bridge(
            r#"read a; read b; read c
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18"}}'
echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"[{\"Database\":\"dispensing\"}]"}]}}'"#,
        );
        let value = b.call_tool("list_databases", json!({})).unwrap();
        assert_eq!(value, json!([{"Database": "dispensing"}]));
    }

    #[test]
    fn test_handshake_arrives_in_order() {
        let b = bridge(
            r#"read a; read b; read c
case "$a" in *'"method":"initialize"'*) ;; *) echo bad-init >&2; exit 4;; esac
case "$b" in *'"method":"notifications/initialized"'*) ;; *) echo bad-notify >&2; exit 4;; esac
case "$c" in *'"id":2'*'"method":"tools/call"'*'"name":"list_tables"'*) ;; *) echo bad-call >&2; exit 4;; esac
echo '{"jsonrpc":"2.0","id":2,"result":[{"table_name":"order_info"}]}'"#,
        );
        let value = b.call_tool("list_tables", json!({"database": "dispensing"})).unwrap();
        assert_eq!(value, json!([{"table_name": "order_info"}]));
    }

    #[test]
    fn test_stale_ids_are_ignored() {
        let b = bridge(
            r#"read a; read b; read c
echo 'server starting'
echo '{"jsonrpc":"2.0","id":7,"result":[{"stale":true}]}'
echo '{"jsonrpc":"2.0","id":2,"result":{"structuredContent":{"result":[{"id":1}]}}}'
echo '{"jsonrpc":"2.0","id":2,"result":[{"duplicate":true}]}'"#,
        );
        let value = b.call_tool("list_users", json!({})).unwrap();
        assert_eq!(value, json!([{"id": 1}]));
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let b = bridge("read a; read b; read c; echo 'Access denied for user' >&2; exit 3");
        let err = b.call_tool("execute_query", json!({"sql": "SELECT 1"})).unwrap_err();
        match err {
            BridgeError::Transport(message) => {
                assert!(message.contains("exit code 3"));
                assert!(message.contains("Access denied for user"));
            }
            other => panic!("expected transport failure, got {:?}", other),
        }
    }

    #[test]
    fn test_error_document_is_tool_failure() {
        let b = bridge(
            r#"read a; read b; read c
echo '{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"unknown tool"}}'"#,
        );
        let err = b.call_tool("nope", json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::Tool(ref m) if m.contains("unknown tool")));
    }

    #[test]
    fn test_falls_back_to_first_parseable_line() {
        let b = bridge(
            r#"read a; read b; read c
echo 'booting'
echo '{"result":[{"x":1}]}'
echo '{"result":[{"x":2}]}'"#,
        );
        let value = b.call_tool("anything", json!({})).unwrap();
        assert_eq!(value, json!([{"x": 1}]));
    }

    #[test]
    fn test_falls_back_to_whole_stdout_document() {
        let b = bridge(r#"read a; read b; read c; printf '{\n  "result": [3]\n}\n'"#);
        let value = b.call_tool("anything", json!({})).unwrap();
        assert_eq!(value, json!([3]));
    }

    #[test]
    fn test_silent_worker_is_protocol_failure() {
        let b = bridge("read a; read b; read c");
        let err = b.call_tool("anything", json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[test]
    fn test_deadline_kills_hung_worker() {
        let b = shell_bridge("read a; read b; read c; exec sleep 30", Duration::from_millis(300));
        let started = Instant::now();
        let err = b.call_tool("execute_query", json!({"sql": "SELECT SLEEP(60)"})).unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(ref m) if m.contains("no response")));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_missing_program_is_transport_failure() {
        let b = ToolBridge::new(
            "TEST_MCP",
            WorkerCommand::new("/nonexistent/zyk-worker", vec![]),
            vec![],
            Duration::from_secs(1),
        );
        let err = b.call_tool("list_users", json!({})).unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[test]
    fn test_env_reaches_worker() {
        let b = ToolBridge::new(
            "TEST_MCP",
            WorkerCommand::new(
                "sh",
                vec![
                    "-c".to_string(),
                    r#"read a; read b; read c; printf '{"id":2,"result":[{"host":"%s"}]}\n' "$MYSQL_HOST""#
                        .to_string(),
                ],
            ),
            vec![("MYSQL_HOST".to_string(), "db.internal".to_string())],
            Duration::from_secs(10),
        )
        .with_poll_interval(Duration::from_millis(50));
        let value = b.call_tool("list_databases", json!({})).unwrap();
        assert_eq!(value, json!([{"host": "db.internal"}]));
    }

    #[tokio::test]
    async fn test_async_call_runs_off_the_executor() {
        let b = Arc::new(bridge(
            r#"read a; read b; read c; echo '{"jsonrpc":"2.0","id":2,"result":{"content":[]}}'"#,
        ));
        let value = b.call_tool_async("list_users".to_string(), json!({})).await.unwrap();
        assert_eq!(value, json!([]));
    }
}
