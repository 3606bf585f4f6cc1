use super::resolver::ResolvedContext;

pub const CONTEXT_START: &str = "[DB_TABLE_CONTEXT]";
pub const CONTEXT_END: &str = "[/DB_TABLE_CONTEXT]";
pub const QUESTION_LABEL: &str = "用户问题：";

/// Stands in for the question when the message held nothing but mentions
pub const DEFAULT_INSTRUCTION: &str = "请基于以上库表信息进行分析";

/// Prefix the resolved context block to the stripped message.
///
/// Without a context the stripped message is returned untouched.
pub fn build_augmented_message(context: Option<&ResolvedContext>, stripped_message: &str) -> String {
    let Some(context) = context else {
        return stripped_message.to_string();
    };

    // serde_json leaves non-ASCII characters unescaped
    let payload = match serde_json::to_string(context) {
        Ok(json) => json,
        Err(e) => {
            log::error!("[MENTIONS] Failed to serialize resolved context: {}", e);
            return stripped_message.to_string();
        }
    };

    let question = if stripped_message.trim().is_empty() {
        DEFAULT_INSTRUCTION
    } else {
        stripped_message
    };

    format!(
        "{}\n{}\n{}\n\n{}{}",
        CONTEXT_START, payload, CONTEXT_END, QUESTION_LABEL, question
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mentions::parser::parse_mentions;
    use crate::mentions::resolver::{resolve_schema_mentions, SchemaAliases};
    use crate::models::{MysqlDatabase, MysqlTable};

    fn context(message: &str) -> Option<ResolvedContext> {
        let aliases = SchemaAliases::build(
            &[MysqlDatabase {
                name: "订单库".to_string(),
                enabled: true,
                remark: None,
            }],
            &[MysqlTable {
                database_name: "订单库".to_string(),
                table_name: "order_info".to_string(),
                table_type: "BASE TABLE".to_string(),
                table_comment: String::new(),
                enabled: true,
                remark: Some("订单".to_string()),
            }],
        );
        resolve_schema_mentions(&parse_mentions(message), &aliases)
    }

    #[test]
    fn test_block_layout_and_unescaped_json() {
        let ctx = context("@订单库 @订单 每日趋势").unwrap();
        let message = build_augmented_message(Some(&ctx), "每日趋势");
        assert_eq!(
            message,
            "[DB_TABLE_CONTEXT]\n\
             {\"databases\":[\"订单库\"],\"tables\":[\"order_info\"],\"mapping\":{\"订单库\":[\"order_info\"]}}\n\
             [/DB_TABLE_CONTEXT]\n\n\
             用户问题：每日趋势"
        );
    }

    #[test]
    fn test_empty_question_uses_default_instruction() {
        let ctx = context("@订单库").unwrap();
        let message = build_augmented_message(Some(&ctx), "");
        assert!(message.ends_with(&format!("{}{}", QUESTION_LABEL, DEFAULT_INSTRUCTION)));
    }

    #[test]
    fn test_no_context_returns_stripped_message() {
        assert!(context("@unknown 你好").is_none());
        assert_eq!(build_augmented_message(None, "你好"), "你好");
    }
}
