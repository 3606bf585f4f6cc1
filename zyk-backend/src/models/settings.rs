use serde::{Deserialize, Serialize};

/// Keys under which tenant configuration is stored in `config_entries`
pub mod config_keys {
    pub const MODEL: &str = "model_config";
    pub const MYSQL: &str = "mysql_config";
    pub const GITLAB: &str = "gitlab_config";
}

fn default_true() -> bool {
    true
}

/// OpenAI-compatible model endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ModelConfig {
    pub fn redacted(&self) -> Self {
        Self {
            api_key: mask_secret(&self.api_key),
            ..self.clone()
        }
    }
}

/// MySQL connection handed to the MySQL worker through its environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-call worker deadline in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl MysqlConfig {
    /// Fill fields the tenant left blank from the process-wide defaults.
    /// Stored values always win; `enabled` and `timeout` are never inherited.
    pub fn overlay(&self, defaults: &MysqlConfig) -> MysqlConfig {
        MysqlConfig {
            host: pick(&self.host, &defaults.host),
            port: if self.port == 0 { defaults.port } else { self.port },
            user: pick(&self.user, &defaults.user),
            password: pick(&self.password, &defaults.password),
            database: pick(&self.database, &defaults.database),
            enabled: self.enabled,
            timeout: self.timeout,
        }
    }

    pub fn worker_env(&self) -> Vec<(String, String)> {
        vec![
            ("MYSQL_HOST".to_string(), self.host.clone()),
            ("MYSQL_PORT".to_string(), self.port.to_string()),
            ("MYSQL_USER".to_string(), self.user.clone()),
            ("MYSQL_PASSWORD".to_string(), self.password.clone()),
            ("MYSQL_DATABASE".to_string(), self.database.clone()),
        ]
    }

    pub fn redacted(&self) -> Self {
        Self {
            password: mask_secret(&self.password),
            ..self.clone()
        }
    }
}

/// GitLab connection handed to the GitLab worker through its environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitlabConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub token: String,
    /// Comma separated group paths the worker is scoped to
    #[serde(default)]
    pub groups: String,
}

impl GitlabConfig {
    pub fn overlay(&self, defaults: &GitlabConfig) -> GitlabConfig {
        GitlabConfig {
            url: pick(&self.url, &defaults.url),
            token: pick(&self.token, &defaults.token),
            groups: pick(&self.groups, &defaults.groups),
        }
    }

    pub fn worker_env(&self) -> Vec<(String, String)> {
        vec![
            ("GITLAB_URL".to_string(), self.url.clone()),
            ("GITLAB_TOKEN".to_string(), self.token.clone()),
            ("GITLAB_GROUPS".to_string(), self.groups.clone()),
        ]
    }

    /// Trim and drop empty entries from the comma separated group list.
    pub fn normalized_groups(groups: &str) -> Option<String> {
        let items: Vec<&str> = groups
            .split(',')
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .collect();
        if items.is_empty() {
            None
        } else {
            Some(items.join(","))
        }
    }

    pub fn redacted(&self) -> Self {
        Self {
            token: mask_secret(&self.token),
            ..self.clone()
        }
    }
}

fn pick(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}
