//! Client for OpenAI-style chat-completions and embeddings endpoints.
//!
//! One implementation covers OpenAI itself and the long tail of compatible
//! APIs (Groq, DeepSeek, Together, Fireworks, Mistral, xAI, Perplexity,
//! NVIDIA, the Cohere and HuggingFace compatibility layers) as well as local
//! servers such as Ollama's `/v1` endpoint, which run without an API key.
//! Only the base URL and the bearer credential differ per provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{LlmError, Result};
use crate::traits::{
    ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, LLMResponse,
};

/// Default context window assumed when the model is unknown to us.
const DEFAULT_CONTEXT_LENGTH: usize = 128_000;

/// OpenAI-compatible provider client.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    provider_id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_context_length: usize,
    embedding_dimension: usize,
    max_embedding_tokens: usize,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    id: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

// ============================================================================
// Implementation
// ============================================================================

impl OpenAiCompatibleProvider {
    /// Create a client for `base_url` bound to `model`.
    ///
    /// `api_key` is optional: local servers accept unauthenticated requests.
    pub fn new(
        provider_id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            max_context_length: DEFAULT_CONTEXT_LENGTH,
            embedding_dimension: 1536,
            max_embedding_tokens: 8192,
        }
    }

    /// Set the context window size.
    pub fn with_max_context_length(mut self, length: usize) -> Self {
        self.max_context_length = length;
        self
    }

    /// Set the embedding dimension reported for this model.
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(url).header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// POST a JSON body and decode the response, mapping failures onto the
    /// error taxonomy with this provider's id attached.
    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = self
            .request(url)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::transport(&self.provider_id, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::transport(&self.provider_id, e))?;

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<WireErrorResponse>(&text) {
                return Err(LlmError::from_status(
                    &self.provider_id,
                    status,
                    &parsed.error.message,
                ));
            }
            return Err(LlmError::from_status(&self.provider_id, status, &text));
        }

        serde_json::from_str(&text).map_err(LlmError::from)
    }

    fn wire_messages<'a>(
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
    ) -> Vec<WireMessage<'a>> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &options.system_prompt {
            wire.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        wire.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        wire
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatibleProvider {
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
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::wire_messages(messages, &options),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: None,
        };

        let url = self.url("chat/completions");
        debug!(%url, "sending chat completion request");
        let response: ChatCompletionResponse = self.send(&url, &request).await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            LlmError::Api {
                provider: self.provider_id.clone(),
                message: "no choices in response".to_string(),
            }
        })?;

        let mut result = LLMResponse::new(
            choice.message.content.unwrap_or_default(),
            response.model.unwrap_or_else(|| self.model.clone()),
        )
        .with_usage(response.usage.prompt_tokens, response.usage.completion_tokens);
        result.total_tokens = response.usage.total_tokens.max(result.total_tokens);
        if let Some(reason) = choice.finish_reason {
            result = result.with_finish_reason(reason);
        }
        if let Some(id) = response.id {
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
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: Self::wire_messages(messages, &options),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: Some(true),
        };

        let url = self.url("chat/completions");
        let response = self
            .request(&url)
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
                    if data == "[DONE]" {
                        continue;
                    }
                    if let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(delta) = chunk
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("delta"))
                            .and_then(|d| d.get("content"))
                            .and_then(|c| c.as_str())
                        {
                            content.push_str(delta);
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

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn max_input_tokens(&self) -> usize {
        self.max_embedding_tokens
    }

    #[instrument(skip(self, texts), fields(provider = %self.provider_id, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let url = self.url("embeddings");
        let response: EmbeddingResponse = self.send(&url, &request).await?;

        // The API may return entries out of order; restore input order.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        if data.len() != texts.len() {
            return Err(LlmError::Api {
                provider: self.provider_id.clone(),
                message: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    data.len()
                ),
            });
        }
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
