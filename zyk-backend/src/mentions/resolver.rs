//! Resolve mention tokens against cached metadata aliases.
//!
//! Callers pass enabled rows only; disabled rows never take part.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashMap;

use super::parser::{collapse_whitespace, MentionToken, MENTION_PATTERN};
use crate::models::{GitlabUser, MysqlDatabase, MysqlTable};

/// Alias to canonical-name lookup. Exact, case-sensitive matches only.
#[derive(Debug, Default, Clone)]
pub struct AliasMap {
    entries: HashMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (canonical, aliases) pairs. Aliases are inserted before
    /// canonical names so a canonical name always maps to itself, even when
    /// another entity uses it as a remark.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, Vec<&'a str>)>,
    {
        let entries: Vec<(&str, Vec<&str>)> = entries.into_iter().collect();
        let mut map = AliasMap::new();
        for (canonical, aliases) in &entries {
            for alias in aliases {
                let alias = alias.trim();
                if !alias.is_empty() {
                    map.entries.insert(alias.to_string(), canonical.to_string());
                }
            }
        }
        for (canonical, _) in &entries {
            map.entries.insert(canonical.to_string(), canonical.to_string());
        }
        map
    }

    pub fn resolve(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical username, display name and remark all map to the username
    pub fn for_users(users: &[GitlabUser]) -> Self {
        Self::from_entries(users.iter().map(|u| {
            let mut aliases = Vec::new();
            if let Some(remark) = u.remark.as_deref() {
                aliases.push(remark);
            }
            if let Some(name) = u.name.as_deref() {
                aliases.push(name);
            }
            (u.username.as_str(), aliases)
        }))
    }
}

/// Database aliases plus per-database table aliases
#[derive(Debug, Default, Clone)]
pub struct SchemaAliases {
    databases: AliasMap,
    tables: HashMap<String, AliasMap>,
}

impl SchemaAliases {
    pub fn build(databases: &[MysqlDatabase], tables: &[MysqlTable]) -> Self {
        let database_map = AliasMap::from_entries(
            databases
                .iter()
                .map(|d| (d.name.as_str(), d.remark.as_deref().into_iter().collect::<Vec<_>>())),
        );

        let mut grouped: HashMap<&str, Vec<&MysqlTable>> = HashMap::new();
        for table in tables {
            grouped.entry(table.database_name.as_str()).or_default().push(table);
        }
        let tables = grouped
            .into_iter()
            .map(|(database, rows)| {
                let map = AliasMap::from_entries(rows.iter().map(|t| {
                    (t.table_name.as_str(), t.remark.as_deref().into_iter().collect::<Vec<_>>())
                }));
                (database.to_string(), map)
            })
            .collect();

        SchemaAliases {
            databases: database_map,
            tables,
        }
    }

    fn resolve_database(&self, token: &str) -> Option<&str> {
        self.databases.resolve(token)
    }

    fn resolve_table(&self, database: &str, token: &str) -> Option<&str> {
        self.tables.get(database)?.resolve(token)
    }
}

/// Ordered database -> tables grouping, serialized as a JSON object in
/// first-mention order
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TableMapping(Vec<(String, Vec<String>)>);

impl TableMapping {
    pub fn get(&self, database: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|(db, _)| db == database)
            .map(|(_, tables)| tables.as_slice())
    }

    fn entry(&mut self, database: &str) -> &mut Vec<String> {
        let index = match self.0.iter().position(|(db, _)| db == database) {
            Some(index) => index,
            None => {
                self.0.push((database.to_string(), Vec::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[index].1
    }
}

impl Serialize for TableMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (database, tables) in &self.0 {
            map.serialize_entry(database, tables)?;
        }
        map.end()
    }
}

/// Databases and tables referenced by a message
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedContext {
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub mapping: TableMapping,
}

impl ResolvedContext {
    fn add_database(&mut self, database: &str) {
        if !self.databases.iter().any(|d| d == database) {
            self.databases.push(database.to_string());
        }
        self.mapping.entry(database);
    }

    fn add_table(&mut self, database: &str, table: &str) {
        if !self.tables.iter().any(|t| t == table) {
            self.tables.push(table.to_string());
        }
        let grouped = self.mapping.entry(database);
        if !grouped.iter().any(|t| t == table) {
            grouped.push(table.to_string());
        }
    }
}

/// Resolve `@db @table @db2 @table2` token streams.
///
/// A database token moves the current-database cursor. A table token only
/// counts when it belongs to the current database; anything else is dropped.
/// Returns `None` when nothing resolved.
pub fn resolve_schema_mentions(
    tokens: &[MentionToken],
    aliases: &SchemaAliases,
) -> Option<ResolvedContext> {
    let mut context = ResolvedContext::default();
    let mut current: Option<String> = None;

    for token in tokens {
        let raw = token.raw_text.as_str();
        if let Some(database) = aliases.resolve_database(raw) {
            context.add_database(database);
            current = Some(database.to_string());
            continue;
        }
        match current.as_deref() {
            Some(database) => match aliases.resolve_table(database, raw) {
                Some(table) => context.add_table(database, table),
                None => log::debug!("[MENTIONS] Dropping '@{}' (not a table of '{}')", raw, database),
            },
            None => log::debug!("[MENTIONS] Dropping '@{}' (no database selected)", raw),
        }
    }

    if context.databases.is_empty() {
        None
    } else {
        Some(context)
    }
}

/// Rewrite user mentions in place: a known alias becomes the bare canonical
/// username, an unknown one is removed. Whitespace is collapsed afterwards.
pub fn resolve_user_mentions(message: &str, aliases: &AliasMap) -> String {
    let rewritten = MENTION_PATTERN.replace_all(message, |caps: &regex::Captures| {
        let token = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        aliases.resolve(token).unwrap_or_default().to_string()
    });
    collapse_whitespace(&rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mentions::parser::parse_mentions;

    fn database(name: &str, remark: Option<&str>) -> MysqlDatabase {
        MysqlDatabase {
            name: name.to_string(),
            enabled: true,
            remark: remark.map(String::from),
        }
    }

    fn table(db: &str, name: &str, remark: Option<&str>) -> MysqlTable {
        MysqlTable {
            database_name: db.to_string(),
            table_name: name.to_string(),
            table_type: "BASE TABLE".to_string(),
            table_comment: String::new(),
            enabled: true,
            remark: remark.map(String::from),
        }
    }

    fn user(username: &str, name: Option<&str>, remark: Option<&str>) -> GitlabUser {
        GitlabUser {
            id: 1,
            username: username.to_string(),
            name: name.map(String::from),
            avatar_url: None,
            enabled: true,
            remark: remark.map(String::from),
        }
    }

    fn schema() -> SchemaAliases {
        SchemaAliases::build(
            &[database("db1", None), database("db2", Some("库二"))],
            &[
                table("db1", "t1", None),
                table("db1", "t2", Some("订单表")),
                table("db2", "t3", None),
            ],
        )
    }

    #[test]
    fn test_tables_group_under_preceding_database() {
        let tokens = parse_mentions("@db1 @t1 @t2 @db2");
        let ctx = resolve_schema_mentions(&tokens, &schema()).unwrap();

        assert_eq!(ctx.databases, vec!["db1", "db2"]);
        assert_eq!(ctx.tables, vec!["t1", "t2"]);
        assert_eq!(ctx.mapping.get("db1").unwrap(), &["t1", "t2"]);
        assert!(ctx.mapping.get("db2").unwrap().is_empty());
    }

    #[test]
    fn test_table_before_any_database_is_dropped() {
        let tokens = parse_mentions("@t1 @db1");
        let ctx = resolve_schema_mentions(&tokens, &schema()).unwrap();
        assert_eq!(ctx.databases, vec!["db1"]);
        assert!(ctx.tables.is_empty());
    }

    #[test]
    fn test_table_of_another_database_is_dropped() {
        let tokens = parse_mentions("@db2 @t1 @t3");
        let ctx = resolve_schema_mentions(&tokens, &schema()).unwrap();
        assert_eq!(ctx.tables, vec!["t3"]);
        assert_eq!(ctx.mapping.get("db2").unwrap(), &["t3"]);
    }

    #[test]
    fn test_remarks_resolve_to_canonical_names_without_duplicates() {
        let tokens = parse_mentions("@db1 @订单表 @t2 @库二 @db1 @t2");
        let ctx = resolve_schema_mentions(&tokens, &schema()).unwrap();
        assert_eq!(ctx.databases, vec!["db1", "db2"]);
        assert_eq!(ctx.tables, vec!["t2"]);
        assert_eq!(ctx.mapping.get("db1").unwrap(), &["t2"]);
    }

    #[test]
    fn test_unknown_tokens_resolve_to_nothing() {
        let tokens = parse_mentions("@nobody @t1");
        assert!(resolve_schema_mentions(&tokens, &schema()).is_none());
        assert!(resolve_schema_mentions(&[], &schema()).is_none());
    }

    #[test]
    fn test_lookups_are_case_sensitive() {
        let tokens = parse_mentions("@DB1");
        assert!(resolve_schema_mentions(&tokens, &schema()).is_none());
    }

    #[test]
    fn test_mapping_serializes_in_mention_order() {
        let tokens = parse_mentions("@db2 @db1 @t1");
        let ctx = resolve_schema_mentions(&tokens, &schema()).unwrap();
        let json = serde_json::to_string(&ctx.mapping).unwrap();
        assert_eq!(json, r#"{"db2":[],"db1":["t1"]}"#);
    }

    #[test]
    fn test_canonical_name_wins_over_colliding_remark() {
        let aliases = AliasMap::for_users(&[
            user("alice", None, Some("bob")),
            user("bob", Some("Bob B"), None),
        ]);
        assert_eq!(aliases.resolve("bob"), Some("bob"));
        assert_eq!(aliases.resolve("Bob B"), Some("bob"));
    }

    #[test]
    fn test_user_mention_rewritten_to_username() {
        let aliases = AliasMap::from_entries([("yuanwu", vec!["袁兀"])]);
        assert_eq!(
            resolve_user_mentions("@袁兀 查看他的最近提交情况", &aliases),
            "yuanwu 查看他的最近提交情况"
        );
    }

    #[test]
    fn test_unknown_user_mention_is_removed() {
        let aliases = AliasMap::for_users(&[user("yuanwu", Some("袁兀"), Some("小袁"))]);
        assert_eq!(
            resolve_user_mentions("对比 @小袁 和 @陌生人 的提交", &aliases),
            "对比 yuanwu 和 的提交"
        );
        assert_eq!(resolve_user_mentions("没有提及", &aliases), "没有提及");
    }
}
