use crate::ai::types::{AiError, AiResponse, ToolCall, ToolResponse};
use crate::ai::Message;
use crate::models::ModelConfig;
use crate::tools::ToolDefinition;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    auth_headers: header::HeaderMap,
    endpoint: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAICompletionRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAICompletionResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

/// Chat-completions URL for a configured base URL. A base that already
/// names the endpoint is used as is.
pub fn chat_completions_url(base_url: Option<&str>) -> String {
    let base = base_url
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{}/chat/completions", base)
    }
}

fn tool_parameters(tool: &ToolDefinition) -> Value {
    let properties: serde_json::Map<String, Value> = tool
        .input_schema
        .properties
        .iter()
        .map(|(name, schema)| {
            let mut prop = serde_json::Map::new();
            prop.insert("type".to_string(), json!(schema.schema_type));
            prop.insert("description".to_string(), json!(schema.description));
            if let Some(ref default_val) = schema.default {
                prop.insert("default".to_string(), default_val.clone());
            }
            (name.clone(), Value::Object(prop))
        })
        .collect();
    json!({
        "type": tool.input_schema.schema_type,
        "properties": properties,
        "required": tool.input_schema.required
    })
}

fn truncate_for_log(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

impl OpenAIClient {
    pub fn new(api_key: &str, base_url: Option<&str>, model: Option<&str>) -> Result<Self, String> {
        let mut auth_headers = header::HeaderMap::new();
        auth_headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        // Only add auth header if API key is provided and not empty
        if !api_key.is_empty() {
            let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?;
            auth_headers.insert(header::AUTHORIZATION, auth_value);
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            auth_headers,
            endpoint: chat_completions_url(base_url),
            model: model
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            max_tokens: None,
            temperature: None,
        })
    }

    pub fn from_model_config(config: &ModelConfig) -> Result<Self, String> {
        Self::new(&config.api_key, config.base_url.as_deref(), config.model.as_deref())
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn generate_with_tools(
        &self,
        messages: Vec<Message>,
        tool_history: Vec<OpenAIMessage>,
        tools: Vec<ToolDefinition>,
    ) -> Result<AiResponse, AiError> {
        // Convert messages to OpenAI format
        let mut api_messages: Vec<OpenAIMessage> = messages
            .into_iter()
            .map(|m| OpenAIMessage {
                role: m.role.to_string(),
                content: Some(m.content),
                tool_calls: None,
                tool_call_id: None,
            })
            .collect();

        // Previous tool calls and results
        api_messages.extend(tool_history);

        let openai_tools: Option<Vec<OpenAITool>> = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: tool_parameters(t),
                        },
                    })
                    .collect(),
            )
        };

        let request = OpenAICompletionRequest {
            model: self.model.clone(),
            messages: api_messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            tool_choice: openai_tools.as_ref().map(|_| "auto".to_string()),
            tools: openai_tools,
        };

        log::info!(
            "[AI] Sending request to {} with model {} and {} tools",
            self.endpoint,
            self.model,
            request.tools.as_ref().map(|t| t.len()).unwrap_or(0)
        );
        log::debug!(
            "[AI] Full request:\n{}",
            serde_json::to_string_pretty(&request).unwrap_or_default()
        );

        // Retry configuration for transient errors
        const MAX_RETRIES: u32 = 3;
        const BASE_DELAY_MS: u64 = 2000;

        let mut last_error: Option<(String, Option<u16>)> = None;
        let mut response_text: Option<String> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s, 8s
                let delay_ms = BASE_DELAY_MS * (1 << (attempt - 1));
                log::warn!(
                    "[AI] Retry attempt {}/{} after {}ms delay",
                    attempt,
                    MAX_RETRIES,
                    delay_ms
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .headers(self.auth_headers.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    let message = format!("Model API request failed: {}", e);
                    // Network errors are retryable
                    if attempt < MAX_RETRIES {
                        log::warn!("[AI] Request failed (attempt {}): {}, will retry", attempt + 1, e);
                        last_error = Some((message, None));
                        continue;
                    }
                    return Err(AiError::new(message));
                }
            };

            let status = response.status();
            let status_code = status.as_u16();
            // 429 (rate limit), 502, 503, 504 (gateway errors)
            let is_retryable = matches!(status_code, 429 | 502 | 503 | 504);

            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();

                if is_retryable && attempt < MAX_RETRIES {
                    log::warn!(
                        "[AI] Received retryable status {} (attempt {}), will retry: {}",
                        status,
                        attempt + 1,
                        truncate_for_log(&error_text)
                    );
                    last_error = Some((format!("HTTP {}: {}", status, error_text), Some(status_code)));
                    continue;
                }

                let error_msg = match serde_json::from_str::<OpenAIErrorResponse>(&error_text) {
                    Ok(error_response) => format!("Model API error: {}", error_response.error.message),
                    Err(_) => {
                        let trimmed = error_text.trim_start();
                        if trimmed.starts_with("<!DOCTYPE") || trimmed.starts_with("<html") {
                            format!("Model API returned error status: {} (HTML error page)", status)
                        } else {
                            format!(
                                "Model API returned error status: {}, body: {}",
                                status,
                                truncate_for_log(&error_text)
                            )
                        }
                    }
                };

                return Err(AiError::with_status(error_msg, status_code));
            }

            response_text = Some(
                response
                    .text()
                    .await
                    .map_err(|e| AiError::new(format!("Failed to read model response: {}", e)))?,
            );
            break;
        }

        let response_text = response_text.ok_or_else(|| {
            let (msg, code) = last_error.unwrap_or_else(|| ("Max retries exceeded".to_string(), None));
            match code {
                Some(c) => AiError::with_status(msg, c),
                None => AiError::new(msg),
            }
        })?;

        log::debug!("[AI] Raw response:\n{}", response_text);
        parse_completion(&response_text)
    }

    /// Assistant message carrying the tool calls, then one `tool` message per response
    pub fn build_tool_result_messages(
        tool_calls: &[ToolCall],
        tool_responses: &[ToolResponse],
    ) -> Vec<OpenAIMessage> {
        let mut messages = Vec::new();

        let openai_tool_calls: Vec<OpenAIToolCall> = tool_calls
            .iter()
            .map(|tc| OpenAIToolCall {
                id: tc.id.clone(),
                call_type: "function".to_string(),
                function: OpenAIFunctionCall {
                    name: tc.name.clone(),
                    arguments: serde_json::to_string(&tc.arguments).unwrap_or_default(),
                },
            })
            .collect();

        messages.push(OpenAIMessage {
            role: "assistant".to_string(),
            // Some compatible providers reject an empty or omitted content
            content: Some("\n".to_string()),
            tool_calls: Some(openai_tool_calls),
            tool_call_id: None,
        });

        for response in tool_responses {
            messages.push(OpenAIMessage {
                role: "tool".to_string(),
                content: Some(response.content.clone()),
                tool_calls: None,
                tool_call_id: Some(response.tool_call_id.clone()),
            });
        }

        messages
    }
}

fn parse_completion(response_text: &str) -> Result<AiResponse, AiError> {
    let response_data: OpenAICompletionResponse = serde_json::from_str(response_text).map_err(|e| {
        AiError::new(format!(
            "Failed to parse model response: {} - body: {}",
            e,
            truncate_for_log(response_text)
        ))
    })?;

    let choice = response_data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AiError::new("Model API returned no choices"))?;

    log::info!(
        "[AI] Response - content_len: {}, tool_calls: {}, finish_reason: {:?}",
        choice.message.content.as_ref().map(|c| c.len()).unwrap_or(0),
        choice.message.tool_calls.as_ref().map(|t| t.len()).unwrap_or(0),
        choice.finish_reason
    );

    let content = choice.message.content.unwrap_or_default();
    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            arguments: serde_json::from_str(&tc.function.arguments).unwrap_or(json!({})),
            id: tc.id,
            name: tc.function.name,
        })
        .collect();

    if tool_calls.is_empty() {
        Ok(AiResponse::text(content))
    } else {
        Ok(AiResponse::with_tools(content, tool_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{PropertySchema, ToolGroup, ToolInputSchema};

    #[test]
    fn test_chat_completions_url() {
        assert_eq!(chat_completions_url(None), "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            chat_completions_url(Some("https://api.deepseek.com/v1/")),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            chat_completions_url(Some("http://llm.local/v1/chat/completions")),
            "http://llm.local/v1/chat/completions"
        );
        assert_eq!(chat_completions_url(Some("  ")), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn test_default_model() {
        let client = OpenAIClient::new("sk-test", None, Some("")).unwrap();
        assert_eq!(client.model(), "gpt-3.5-turbo");
    }

    #[test]
    fn test_tool_parameters_schema() {
        let tool = ToolDefinition {
            name: "execute_mysql_query".to_string(),
            description: "run sql".to_string(),
            input_schema: ToolInputSchema::default().with_property(
                "query",
                PropertySchema::string("SQL"),
                true,
            ),
            group: ToolGroup::Mysql,
        };
        assert_eq!(
            tool_parameters(&tool),
            json!({
                "type": "object",
                "properties": {"query": {"type": "string", "description": "SQL"}},
                "required": ["query"]
            })
        );
    }

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"call_1","type":"function","function":{"name":"list_tables","arguments":"{\"database\":\"dispensing\"}"}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let response = parse_completion(body).unwrap();
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls[0].name, "list_tables");
        assert_eq!(response.tool_calls[0].arguments, json!({"database": "dispensing"}));
        assert_eq!(response.content, "");
    }

    #[test]
    fn test_parse_completion_rejects_empty_choices() {
        let err = parse_completion(r#"{"choices":[]}"#).unwrap_err();
        assert_eq!(err.message, "Model API returned no choices");
    }

    #[test]
    fn test_build_tool_result_messages() {
        let calls = vec![ToolCall {
            id: "call_1".to_string(),
            name: "browse_web".to_string(),
            arguments: json!({"query": "rust"}),
        }];
        let responses = vec![ToolResponse::success("call_1".to_string(), "page".to_string())];

        let messages = OpenAIClient::build_tool_result_messages(&calls, &responses);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "assistant");
        let tool_calls = messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.arguments, r#"{"query":"rust"}"#);
        assert_eq!(messages[1].role, "tool");
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("call_1"));
    }
}
