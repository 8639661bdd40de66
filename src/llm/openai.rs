//! OpenAI-compatible Chat Completions provider.
//!
//! Works against any endpoint that speaks the standard `/v1/chat/completions`
//! protocol with function tools, which covers the hosted inference services
//! this assistant is deployed with.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    AssistantTurn, CompletionRequest, CompletionResponse, LlmProvider, Message, Role, ToolCall,
    ToolDefinition,
};

/// Chat completions client for OpenAI-compatible endpoints.
pub struct OpenAiChatProvider {
    client: Client,
    config: LlmConfig,
}

impl OpenAiChatProvider {
    pub fn new(config: LlmConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    fn api_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn send_request(&self, body: &ChatCompletionRequest) -> Result<ChatChoice, LlmError> {
        let mut request = self
            .client
            .post(self.api_url())
            .header("Content-Type", "application/json")
            .json(body);

        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(LlmError::Request(format!("HTTP {status}: {text}")));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|e| LlmError::InvalidResponse(format!("JSON parse error: {e}")))?;

        if let Some(usage) = parsed.usage {
            tracing::debug!(
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                model = %self.config.model,
                "chat completion finished"
            );
        }

        parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: req.messages.iter().map(wire_message).collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            tools: None,
            tool_choice: None,
        };

        let choice = self.send_request(&body).await?;
        let content = choice
            .message
            .and_then(|m| m.content)
            .ok_or_else(|| LlmError::InvalidResponse("completion had no content".into()))?;

        Ok(CompletionResponse { content })
    }

    async fn complete_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<AssistantTurn, LlmError> {
        let wire_tools: Vec<WireTool> = tools
            .into_iter()
            .map(|t| WireTool {
                tool_type: "function",
                function: WireFunction {
                    name: t.name,
                    description: t.description,
                    parameters: t.parameters,
                },
            })
            .collect();

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(wire_message).collect(),
            temperature: None,
            max_tokens: None,
            tools: if wire_tools.is_empty() {
                None
            } else {
                Some(wire_tools)
            },
            tool_choice: Some("auto".into()),
        };

        let choice = self.send_request(&body).await?;
        let message = choice
            .message
            .ok_or_else(|| LlmError::InvalidResponse("completion had no message".into()))?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(AssistantTurn {
            content: message.content.unwrap_or_default(),
            tool_calls,
        })
    }
}

fn wire_message(msg: &Message) -> WireMessage {
    let role = match msg.role {
        Role::System => "system",
        Role::Human => "user",
        Role::Assistant => "assistant",
        Role::ToolResult => "tool",
    };

    let tool_calls = msg.tool_call.as_ref().map(|tc| {
        vec![WireToolCall {
            id: tc.id.clone(),
            call_type: "function".to_string(),
            function: WireToolCallFunction {
                name: tc.name.clone(),
                arguments: tc.arguments.to_string(),
            },
        }]
    });

    WireMessage {
        role: role.to_string(),
        content: Some(msg.content.clone()),
        tool_call_id: msg.tool_call_id.clone(),
        tool_calls,
    }
}

// Wire types for the chat completions protocol.

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireToolCallFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
