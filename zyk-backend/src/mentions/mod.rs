//! `@mention` handling for chat messages.
//!
//! Data-analysis messages resolve `@database @table` pairs into a
//! `[DB_TABLE_CONTEXT]` block; code-review messages rewrite `@user` aliases
//! to GitLab usernames.

pub mod context;
pub mod parser;
pub mod resolver;

use rusqlite::Result as SqliteResult;

use crate::db::Database;

pub use context::build_augmented_message;
pub use parser::{parse_mentions, strip_mentions, MentionToken};
pub use resolver::{
    resolve_schema_mentions, resolve_user_mentions, AliasMap, ResolvedContext, SchemaAliases,
};

/// Message ready for the agent, plus what was resolved from it
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub text: String,
    pub context: Option<ResolvedContext>,
}

/// Resolve database/table mentions against enabled cached metadata.
pub fn prepare_data_analysis_message(db: &Database, message: &str) -> SqliteResult<PreparedMessage> {
    let tokens = parse_mentions(message);
    let stripped = strip_mentions(message);
    if tokens.is_empty() {
        return Ok(PreparedMessage {
            text: stripped,
            context: None,
        });
    }

    let databases = db.list_mysql_databases(true)?;
    let tables = db.list_mysql_tables(None, true)?;
    let aliases = SchemaAliases::build(&databases, &tables);
    let context = resolve_schema_mentions(&tokens, &aliases);

    match &context {
        Some(ctx) => log::info!(
            "[MENTIONS] Resolved {} database(s), {} table(s) from {} mention(s)",
            ctx.databases.len(),
            ctx.tables.len(),
            tokens.len()
        ),
        None => log::info!("[MENTIONS] {} mention(s) matched no enabled database", tokens.len()),
    }

    Ok(PreparedMessage {
        text: build_augmented_message(context.as_ref(), &stripped),
        context,
    })
}

/// Rewrite GitLab user mentions against enabled cached users.
pub fn prepare_code_review_message(db: &Database, message: &str) -> SqliteResult<String> {
    if parse_mentions(message).is_empty() {
        return Ok(parser::collapse_whitespace(message));
    }
    let users = db.list_gitlab_users(true)?;
    let aliases = AliasMap::for_users(&users);
    Ok(resolve_user_mentions(message, &aliases))
}
