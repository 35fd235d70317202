use crate::providers::fallback::parse_tagged_tool_calls;
use crate::traits::{
    AssistantTurn, CompletionRequest, ConversationTurn, Provider, ToolCallRequest, ToolDescriptor,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool<'a>>>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCallRequest<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCallRequest<'a> {
    id: &'a str,
    r#type: &'a str,
    function: OpenAIFunctionRequest<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionRequest<'a> {
    name: &'a str,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAITool<'a> {
    r#type: &'a str,
    function: OpenAIToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: Option<String>,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Chat-completions adapter. Works against any endpoint speaking the
/// OpenAI wire format (OpenRouter, Ollama's `/v1`, Z.AI).
pub struct OpenAIProvider {
    client: reqwest::Client,
    name: String,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let api_key = api_key.into();
        Self {
            client,
            name: "openai".to_string(),
            api_key: (!api_key.is_empty()).then_some(api_key),
            model: "gpt-4o".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn convert_messages<'a>(&self, transcript: &'a [ConversationTurn]) -> Vec<OpenAIMessage<'a>> {
        transcript
            .iter()
            .map(|turn| match turn {
                ConversationTurn::User { content } => OpenAIMessage {
                    role: "user",
                    content: Some(content.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                ConversationTurn::Assistant(assistant) => OpenAIMessage {
                    role: "assistant",
                    content: Some(assistant.content.clone()),
                    tool_calls: assistant.has_tool_calls().then(|| {
                        assistant
                            .tool_calls
                            .iter()
                            .map(|tc| OpenAIToolCallRequest {
                                id: &tc.id,
                                r#type: "function",
                                function: OpenAIFunctionRequest {
                                    name: &tc.name,
                                    arguments: tc.arguments.to_string(),
                                },
                            })
                            .collect()
                    }),
                    tool_call_id: None,
                },
                ConversationTurn::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => OpenAIMessage {
                    role: "tool",
                    content: Some(if *is_error {
                        format!("Error: {}", content)
                    } else {
                        content.clone()
                    }),
                    tool_calls: None,
                    tool_call_id: Some(tool_call_id),
                },
            })
            .collect()
    }

    fn convert_tools<'a>(&self, tools: &'a [ToolDescriptor]) -> Vec<OpenAITool<'a>> {
        tools
            .iter()
            .map(|t| OpenAITool {
                r#type: "function",
                function: OpenAIToolFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters_schema,
                },
            })
            .collect()
    }

    /// Converts the wire response into a turn. Tool calls are discarded when
    /// no tools were offered.
    fn into_turn(&self, message: OpenAIResponseMessage, tools_offered: bool) -> AssistantTurn {
        let content = message.content.unwrap_or_default();
        let native: Vec<ToolCallRequest> = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, c)| ToolCallRequest {
                id: c.id.unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                arguments: parse_arguments(&c.function.arguments, i),
                name: c.function.name,
            })
            .collect();

        if !tools_offered {
            if !native.is_empty() {
                warn!(
                    provider = %self.name,
                    dropped = native.len(),
                    "Provider requested tools although none were offered"
                );
            }
            return AssistantTurn::text(content);
        }

        if !native.is_empty() {
            return AssistantTurn::with_tool_calls(content, native);
        }

        let (text, tagged) = parse_tagged_tool_calls(&content);
        if tagged.is_empty() {
            AssistantTurn::text(content)
        } else {
            debug!(provider = %self.name, calls = tagged.len(), "Parsed tagged tool calls");
            AssistantTurn::with_tool_calls(text, tagged)
        }
    }
}

fn parse_arguments(raw: &str, index: usize) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|e| {
        warn!(index, "Tool call arguments are not valid JSON: {}", e);
        serde_json::Value::String(raw.to_string())
    })
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> anyhow::Result<AssistantTurn> {
        let tools_offered = !request.tools.is_empty();
        let body = OpenAIRequest {
            model: &self.model,
            messages: self.convert_messages(request.transcript),
            max_tokens: request.max_tokens,
            tools: tools_offered.then(|| self.convert_tools(request.tools)),
        };

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(api_key) = &self.api_key {
            http = http.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = http.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "{} API error {}: {}",
                self.name,
                status,
                error_text
            ));
        }

        let parsed: OpenAIResponse = response.json().await?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No choices in response"))?;

        let has_calls = choice
            .message
            .tool_calls
            .as_ref()
            .is_some_and(|c| !c.is_empty());
        if !has_calls && choice.message.content.as_deref().is_none_or(|c| c.trim().is_empty()) {
            warn!(provider = %self.name, "Provider returned an empty reply");
        }

        Ok(self.into_turn(choice.message, tools_offered))
    }
}
