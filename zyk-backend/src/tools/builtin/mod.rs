//! Built-in tools for the agent
//!
//! - `mysql`: query and schema tools (data analysis)
//! - `gitlab`: commit history and diff tools (code review)
//! - `browser`: web browsing (general chat)

mod browser;
pub mod gitlab;
pub mod mysql;

pub use browser::BrowseWebTool;
pub use gitlab::{
    format_commits, load_commit_diffs, render_commit_diff, GitlabCommitDiffTool,
    GitlabUserCommitsTool,
};
pub use mysql::{format_query_results, MysqlQueryTool, MysqlSchemaTool, SchemaToolKind};
