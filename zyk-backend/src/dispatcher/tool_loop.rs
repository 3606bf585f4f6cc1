use crate::ai::{AiClient, Message, ToolHistoryEntry, ToolResponse};
use crate::tools::{ToolContext, ToolGroup, ToolRegistry};

use super::{AgentDispatcher, DispatchError, MAX_TOOL_ITERATIONS};

impl AgentDispatcher {
    /// Call the model until it answers without tool calls, executing the
    /// requested tools between rounds.
    pub(super) async fn run_tool_loop(
        &self,
        client: &AiClient,
        messages: Vec<Message>,
        registry: &ToolRegistry,
        groups: &[ToolGroup],
        tool_context: &ToolContext,
    ) -> Result<String, DispatchError> {
        let tools = registry.definitions_for_groups(groups);
        let mut tool_history: Vec<ToolHistoryEntry> = Vec::new();

        for iteration in 1..=MAX_TOOL_ITERATIONS {
            let response = client
                .generate_with_tools(messages.clone(), tool_history.clone(), tools.clone())
                .await
                .map_err(|e| DispatchError::Ai(e.message))?;

            if !response.has_tool_calls() {
                if response.content.trim().is_empty() {
                    log::warn!("[DISPATCH] Model returned an empty answer at iteration {}", iteration);
                }
                return Ok(response.content);
            }

            let mut tool_responses = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                log::info!(
                    "[DISPATCH] Iteration {}: calling tool '{}' with {}",
                    iteration,
                    call.name,
                    call.arguments
                );
                let result = registry
                    .execute(&call.name, call.arguments.clone(), tool_context, groups)
                    .await;
                if result.success {
                    tool_responses.push(ToolResponse::success(call.id.clone(), result.content));
                } else {
                    log::warn!("[DISPATCH] Tool '{}' failed: {}", call.name, result.content);
                    tool_responses.push(ToolResponse::error(call.id.clone(), result.content));
                }
            }

            tool_history.push(ToolHistoryEntry::new(response.tool_calls, tool_responses));
        }

        log::warn!("[DISPATCH] Tool loop exceeded {} iterations", MAX_TOOL_ITERATIONS);
        Err(DispatchError::TooManyToolRounds(MAX_TOOL_ITERATIONS))
    }
}
