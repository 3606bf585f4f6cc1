//! Database model modules - extends Database with domain-specific methods
//!
//! Each module adds `impl Database` blocks with methods for a specific table group.

mod config_entries;  // config_entries (model/mysql/gitlab tenant config)
mod conversations;   // conversations, messages
mod gitlab_metadata; // gitlab_users, gitlab_projects, gitlab_branches, gitlab_commits, gitlab_commit_diffs
mod mysql_metadata;  // mysql_databases, mysql_tables
