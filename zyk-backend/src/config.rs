use std::env;
use std::time::Duration;

use crate::models::{GitlabConfig, MysqlConfig};

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const PORT: &str = "PORT";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    // Process-wide MySQL defaults (stored mysql_config takes precedence)
    pub const MYSQL_HOST: &str = "MYSQL_HOST";
    pub const MYSQL_PORT: &str = "MYSQL_PORT";
    pub const MYSQL_USER: &str = "MYSQL_USER";
    pub const MYSQL_PASSWORD: &str = "MYSQL_PASSWORD";
    pub const MYSQL_DATABASE: &str = "MYSQL_DATABASE";
    // Process-wide GitLab defaults (stored gitlab_config takes precedence)
    pub const GITLAB_URL: &str = "GITLAB_URL";
    pub const GITLAB_TOKEN: &str = "GITLAB_TOKEN";
    pub const GITLAB_GROUPS: &str = "GITLAB_GROUPS";
    // Worker process command lines
    pub const MYSQL_MCP_COMMAND: &str = "MYSQL_MCP_COMMAND";
    pub const GITLAB_MCP_COMMAND: &str = "GITLAB_MCP_COMMAND";
    pub const BROWSER_MCP_COMMAND: &str = "BROWSER_MCP_COMMAND";
    // Worker deadlines in seconds
    pub const MYSQL_MCP_TIMEOUT: &str = "MYSQL_MCP_TIMEOUT";
    pub const GITLAB_MCP_TIMEOUT: &str = "GITLAB_MCP_TIMEOUT";
    pub const BROWSER_MCP_TIMEOUT: &str = "BROWSER_MCP_TIMEOUT";
}

/// Default values
pub mod defaults {
    pub const PORT: u16 = 8080;
    pub const DATABASE_URL: &str = "./.db/zyk.db";
    pub const MYSQL_HOST: &str = "localhost";
    pub const MYSQL_PORT: u16 = 3306;
    pub const MYSQL_USER: &str = "root";
    pub const GITLAB_URL: &str = "https://gitlab.com";
    pub const MYSQL_MCP_COMMAND: &str = "python3 mcp-server/mysql-mcp-server/server.py";
    pub const GITLAB_MCP_COMMAND: &str = "python3 mcp-server/gitlab-mcp-server/server.py";
    pub const BROWSER_MCP_COMMAND: &str = "npx -y @playwright/mcp@latest --headless";
    pub const MYSQL_MCP_TIMEOUT_SECS: u64 = 60;
    pub const GITLAB_MCP_TIMEOUT_SECS: u64 = 120;
    pub const BROWSER_MCP_TIMEOUT_SECS: u64 = 30;
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

/// Command lines used to launch the stdio tool workers.
#[derive(Clone, Debug)]
pub struct WorkerCommands {
    pub mysql: String,
    pub gitlab: String,
    pub browser: String,
}

/// Deadlines for the "wait for matching response" phase of a worker call.
#[derive(Clone, Debug)]
pub struct WorkerTimeouts {
    pub mysql: Duration,
    pub gitlab: Duration,
    pub browser: Duration,
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub mysql_defaults: MysqlConfig,
    pub gitlab_defaults: GitlabConfig,
    pub worker_commands: WorkerCommands,
    pub worker_timeouts: WorkerTimeouts,
}

impl Config {
    pub fn from_env() -> Self {
        let mysql_port = env::var(env_vars::MYSQL_PORT)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::MYSQL_PORT);

        Self {
            port: env::var(env_vars::PORT)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| {
                    log::warn!("PORT not set or invalid, using {}", defaults::PORT);
                    defaults::PORT
                }),
            database_url: env_or(env_vars::DATABASE_URL, defaults::DATABASE_URL),
            mysql_defaults: MysqlConfig {
                host: env_or(env_vars::MYSQL_HOST, defaults::MYSQL_HOST),
                port: mysql_port,
                user: env_or(env_vars::MYSQL_USER, defaults::MYSQL_USER),
                password: env_or(env_vars::MYSQL_PASSWORD, ""),
                database: env_or(env_vars::MYSQL_DATABASE, ""),
                enabled: true,
                timeout: None,
            },
            gitlab_defaults: GitlabConfig {
                url: env_or(env_vars::GITLAB_URL, defaults::GITLAB_URL),
                token: env_or(env_vars::GITLAB_TOKEN, ""),
                groups: env_or(env_vars::GITLAB_GROUPS, ""),
            },
            worker_commands: WorkerCommands {
                mysql: env_or(env_vars::MYSQL_MCP_COMMAND, defaults::MYSQL_MCP_COMMAND),
                gitlab: env_or(env_vars::GITLAB_MCP_COMMAND, defaults::GITLAB_MCP_COMMAND),
                browser: env_or(env_vars::BROWSER_MCP_COMMAND, defaults::BROWSER_MCP_COMMAND),
            },
            worker_timeouts: WorkerTimeouts {
                mysql: env_secs(env_vars::MYSQL_MCP_TIMEOUT, defaults::MYSQL_MCP_TIMEOUT_SECS),
                gitlab: env_secs(env_vars::GITLAB_MCP_TIMEOUT, defaults::GITLAB_MCP_TIMEOUT_SECS),
                browser: env_secs(env_vars::BROWSER_MCP_TIMEOUT, defaults::BROWSER_MCP_TIMEOUT_SECS),
            },
        }
    }
}
