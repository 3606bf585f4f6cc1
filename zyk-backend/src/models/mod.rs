pub mod conversation;
pub mod metadata;
pub mod settings;

pub use conversation::{ChatMode, Conversation, ConversationStats, Message};
pub use metadata::{
    Annotation, CachedEntity, GitlabBranch, GitlabCommit, GitlabCommitDiff, GitlabProject,
    GitlabUser, MysqlDatabase, MysqlTable,
};
pub use settings::{config_keys, GitlabConfig, ModelConfig, MysqlConfig};
