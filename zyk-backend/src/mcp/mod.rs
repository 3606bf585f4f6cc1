//! Clients for the external tool workers (MySQL, GitLab, browser).
//!
//! MySQL and GitLab workers are spawned once per call through [`ToolBridge`];
//! the browser worker is a long-lived session.

pub mod bridge;
pub mod browser;
pub mod gitlab;
pub mod mysql;
pub mod protocol;
pub mod result;

use thiserror::Error;

pub use bridge::{ToolBridge, WorkerCommand};
pub use browser::BrowserSession;
pub use gitlab::GitlabToolClient;
pub use mysql::MysqlToolClient;
pub use result::into_rows;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Worker could not be started, died with a nonzero exit, or the
    /// surrounding task failed
    #[error("MCP transport failure: {0}")]
    Transport(String),
    /// Worker output could not be interpreted
    #[error("MCP protocol failure: {0}")]
    Protocol(String),
    /// Worker reported a tool-level failure; the message is passed through
    #[error("{0}")]
    Tool(String),
    #[error("{0} is not enabled")]
    NotEnabled(&'static str),
}
