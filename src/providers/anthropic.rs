//! Anthropic Messages API client.
//!
//! Serves Claude models both directly (`x-api-key` against
//! api.anthropic.com) and through Google Vertex AI, where the same body
//! shape is posted to a `rawPredict` publisher endpoint with bearer auth and
//! an `anthropic_version` field instead of a model name.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{LlmError, Result};
use crate::traits::{ChatMessage, ChatRole, CompletionOptions, LLMProvider, LLMResponse};

/// Anthropic API base URL.
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";

/// Required `anthropic-version` header for the direct API.
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

/// `anthropic_version` body field for Vertex-hosted Claude.
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

/// The Messages API requires max_tokens; this is the ceiling applied when
/// the caller leaves it unset.
const DEFAULT_MAX_TOKENS: usize = 4096;

/// How requests are authenticated and addressed.
#[derive(Debug, Clone)]
enum Transport {
    /// api.anthropic.com with an API key header.
    Direct { api_key: String },
    /// Vertex AI publisher endpoint with an optional OAuth bearer token.
    Vertex { token: Option<String> },
}

/// Anthropic provider client.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    provider_id: String,
    transport: Transport,
    messages_url: String,
    model: String,
    max_context_length: usize,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anthropic_version: Option<&'a str>,
    max_tokens: usize,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    message: String,
}

impl AnthropicProvider {
    /// Create a direct-API client.
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            transport: Transport::Direct {
                api_key: api_key.into(),
            },
            messages_url: format!("{ANTHROPIC_API_BASE}/v1/messages"),
            model: model.into(),
            max_context_length: 200_000,
        }
    }

    /// Create a client for Claude hosted on Vertex AI.
    ///
    /// `token` is an OAuth access token; when absent, requests are sent
    /// unauthenticated and rely on ambient proxy auth.
    pub fn for_vertex(
        provider_id: impl Into<String>,
        project: &str,
        location: &str,
        token: Option<String>,
        model: &str,
    ) -> Self {
        let messages_url = format!(
            "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/anthropic/models/{model}:rawPredict"
        );
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            transport: Transport::Vertex { token },
            messages_url,
            model: model.to_string(),
            max_context_length: 200_000,
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.transport {
            Transport::Direct { api_key } => builder
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_API_VERSION),
            Transport::Vertex { token } => match token {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            },
        }
    }

    /// System messages move to the dedicated `system` field; the messages
    /// array carries only user/assistant turns.
    fn convert_messages<'a>(
        messages: &'a [ChatMessage],
        options: &CompletionOptions,
    ) -> (Option<String>, Vec<WireMessage<'a>>) {
        let mut system_parts: Vec<&str> = Vec::new();
        if let Some(system) = &options.system_prompt {
            system_parts.push(system);
        }

        let mut wire = Vec::with_capacity(messages.len());
        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(&message.content),
                ChatRole::User => wire.push(WireMessage {
                    role: "user",
                    content: &message.content,
                }),
                ChatRole::Assistant => wire.push(WireMessage {
                    role: "assistant",
                    content: &message.content,
                }),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, wire)
    }

    fn build_request<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        options: &CompletionOptions,
        stream: bool,
    ) -> MessagesRequest<'a> {
        let (system, wire) = Self::convert_messages(messages, options);
        let (model, anthropic_version) = match self.transport {
            Transport::Direct { .. } => (Some(self.model.as_str()), None),
            Transport::Vertex { .. } => (None, Some(VERTEX_ANTHROPIC_VERSION)),
        };
        MessagesRequest {
            model,
            anthropic_version,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: wire,
            system,
            temperature: options.temperature,
            top_p: options.top_p,
            stop_sequences: options.stop.clone(),
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    #[instrument(skip(self, prompt, options), fields(provider = %self.provider_id, model = %self.model))]
    async fn complete_with_options(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<LLMResponse> {
        self.chat(&[ChatMessage::user(prompt)], Some(options)).await
    }

    #[instrument(skip(self, messages, options), fields(provider = %self.provider_id, model = %self.model))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        let options = options.cloned().unwrap_or_default();
        let request = self.build_request(messages, &options, false);

        debug!(url = %self.messages_url, "sending messages request");
        let response = self
            .apply_auth(self.client.post(&self.messages_url))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::transport(&self.provider_id, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::transport(&self.provider_id, e))?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<AnthropicErrorResponse>(&text) {
                return Err(LlmError::from_status(
                    &self.provider_id,
                    status,
                    &parsed.error.message,
                ));
            }
            return Err(LlmError::from_status(&self.provider_id, status, &text));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        let mut result = LLMResponse::new(
            content,
            parsed.model.unwrap_or_else(|| self.model.clone()),
        )
        .with_usage(parsed.usage.input_tokens, parsed.usage.output_tokens);
        if let Some(reason) = parsed.stop_reason {
            result = result.with_finish_reason(reason);
        }
        if let Some(id) = parsed.id {
            result = result.with_metadata("response_id", serde_json::json!(id));
        }
        Ok(result)
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let options = options.cloned().unwrap_or_default();
        let request = self.build_request(messages, &options, true);

        let response = self
            .apply_auth(self.client.post(&self.messages_url))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::transport(&self.provider_id, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(&self.provider_id, status, &text));
        }

        let provider_id = self.provider_id.clone();
        let stream = response.bytes_stream().map(move |result| match result {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let mut content = String::new();
                for line in text.lines() {
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if let Ok(event) = serde_json::from_str::<serde_json::Value>(data) {
                        if event.get("type").and_then(|t| t.as_str())
                            == Some("content_block_delta")
                        {
                            if let Some(delta) = event
                                .get("delta")
                                .and_then(|d| d.get("text"))
                                .and_then(|t| t.as_str())
                            {
                                content.push_str(delta);
                            }
                        }
                    }
                }
                Ok(content)
            }
            Err(e) => Err(LlmError::Network {
                provider: provider_id.clone(),
                message: format!("stream error: {e}"),
            }),
        });

        Ok(stream.boxed())
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}
