pub mod openai;
pub mod types;

pub use openai::OpenAIClient;
pub use types::{AiError, AiResponse, ToolCall, ToolHistoryEntry, ToolResponse};

use crate::models::ModelConfig;
use crate::tools::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        f.write_str(role)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// A single iteration's INPUT (what was sent to the model) and OUTPUT.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub iteration: usize,
    pub input_messages: Vec<Message>,
    pub input_tool_history: Vec<ToolHistoryEntry>,
    /// Tool names only, to keep it readable
    pub input_tools: Vec<String>,
    pub output_response: Option<AiResponse>,
    pub output_error: Option<String>,
}

/// Mock client for tests: returns queued responses and records a trace of
/// every call.
#[derive(Clone)]
pub struct MockAiClient {
    responses: Arc<Mutex<VecDeque<Result<AiResponse, AiError>>>>,
    trace: Arc<Mutex<Vec<TraceEntry>>>,
}

impl MockAiClient {
    pub fn new(responses: Vec<Result<AiResponse, AiError>>) -> Self {
        MockAiClient {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            trace: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn next_response_traced(
        &self,
        messages: Vec<Message>,
        tool_history: Vec<ToolHistoryEntry>,
        tools: Vec<ToolDefinition>,
    ) -> Result<AiResponse, AiError> {
        let result = self
            .responses
            .lock()
            .map_err(|_| AiError::new("mock queue poisoned"))?
            .pop_front()
            .unwrap_or_else(|| Ok(AiResponse::text("(mock exhausted)".to_string())));

        if let Ok(mut trace) = self.trace.lock() {
            let iteration = trace.len() + 1;
            trace.push(TraceEntry {
                iteration,
                input_messages: messages,
                input_tool_history: tool_history,
                input_tools: tools.iter().map(|t| t.name.clone()).collect(),
                output_response: result.as_ref().ok().cloned(),
                output_error: result.as_ref().err().map(|e| e.message.clone()),
            });
        }
        result
    }

    pub fn get_trace(&self) -> Vec<TraceEntry> {
        self.trace.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

/// Model client used by the dispatcher
pub enum AiClient {
    OpenAI(OpenAIClient),
    Mock(MockAiClient),
}

impl AiClient {
    pub fn from_model_config(config: &ModelConfig) -> Result<Self, String> {
        Ok(AiClient::OpenAI(OpenAIClient::from_model_config(config)?))
    }

    /// Sampling temperature; ignored by the mock
    pub fn with_temperature(self, temperature: f32) -> Self {
        match self {
            AiClient::OpenAI(client) => AiClient::OpenAI(client.with_temperature(temperature)),
            AiClient::Mock(_) => self,
        }
    }

    /// Completion length cap; ignored by the mock
    pub fn with_max_tokens(self, max_tokens: u32) -> Self {
        match self {
            AiClient::OpenAI(client) => AiClient::OpenAI(client.with_max_tokens(max_tokens)),
            AiClient::Mock(_) => self,
        }
    }

    pub async fn generate_with_tools(
        &self,
        messages: Vec<Message>,
        tool_history: Vec<ToolHistoryEntry>,
        tools: Vec<ToolDefinition>,
    ) -> Result<AiResponse, AiError> {
        match self {
            AiClient::OpenAI(client) => {
                let tool_messages = Self::tool_history_to_openai(&tool_history);
                client.generate_with_tools(messages, tool_messages, tools).await
            }
            AiClient::Mock(client) => client.next_response_traced(messages, tool_history, tools),
        }
    }

    fn tool_history_to_openai(history: &[ToolHistoryEntry]) -> Vec<openai::OpenAIMessage> {
        history
            .iter()
            .flat_map(|entry| {
                OpenAIClient::build_tool_result_messages(&entry.tool_calls, &entry.tool_responses)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_returns_queue_then_fallback() {
        let mock = MockAiClient::new(vec![
            Ok(AiResponse::text("first".to_string())),
            Err(AiError::with_status("rate limited", 429)),
        ]);
        let client = AiClient::Mock(mock.clone());

        let first = client
            .generate_with_tools(vec![Message::user("hi")], vec![], vec![])
            .await
            .unwrap();
        assert_eq!(first.content, "first");

        let err = client.generate_with_tools(vec![], vec![], vec![]).await.unwrap_err();
        assert_eq!(err.status_code, Some(429));

        let exhausted = client.generate_with_tools(vec![], vec![], vec![]).await.unwrap();
        assert_eq!(exhausted.content, "(mock exhausted)");

        let trace = mock.get_trace();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0].input_messages[0].content, "hi");
        assert_eq!(trace[1].output_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn test_message_role_display() {
        assert_eq!(MessageRole::System.to_string(), "system");
        assert_eq!(Message::user("x").role.to_string(), "user");
    }
}
