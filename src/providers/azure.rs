//! Azure OpenAI client.
//!
//! Azure routes requests to named deployments under a resource endpoint and
//! authenticates with an `api-key` header rather than a bearer token; the
//! request and response bodies are otherwise the OpenAI shapes. The model id
//! passed at construction is the deployment name.

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

/// Azure OpenAI provider client.
#[derive(Debug, Clone)]
pub struct AzureOpenAiProvider {
    client: Client,
    provider_id: String,
    endpoint: String,
    api_key: String,
    deployment: String,
    api_version: String,
    max_context_length: usize,
    embedding_dimension: usize,
}

#[derive(Debug, Serialize)]
struct AzureMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: Vec<AzureMessage<'a>>,
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
    id: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
    model: String,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
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
struct AzureErrorResponse {
    error: AzureError,
}

#[derive(Debug, Deserialize)]
struct AzureError {
    message: String,
}

impl AzureOpenAiProvider {
    /// Create a client for `deployment` under `endpoint`.
    ///
    /// Fails (with a reason string for the caller to wrap) when the endpoint
    /// is not an absolute http(s) URL.
    pub fn new(
        provider_id: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
    ) -> std::result::Result<Self, String> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let parsed = reqwest::Url::parse(&endpoint)
            .map_err(|e| format!("malformed endpoint '{endpoint}': {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("endpoint '{endpoint}' must use http or https"));
        }

        Ok(Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            endpoint,
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: "2024-02-15-preview".to_string(),
            max_context_length: 128_000,
            embedding_dimension: 1536,
        })
    }

    /// Pin the API version.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Set the embedding dimension reported for this deployment.
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    fn build_url(&self, operation: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint, self.deployment, operation, self.api_version
        )
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
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
            if let Ok(parsed) = serde_json::from_str::<AzureErrorResponse>(&text) {
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
    ) -> Vec<AzureMessage<'a>> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &options.system_prompt {
            wire.push(AzureMessage {
                role: "system",
                content: system,
            });
        }
        wire.extend(messages.iter().map(|m| AzureMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        wire
    }
}

#[async_trait]
impl LLMProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.deployment
    }

    fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    #[instrument(skip(self, prompt, options), fields(deployment = %self.deployment))]
    async fn complete_with_options(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<LLMResponse> {
        self.chat(&[ChatMessage::user(prompt)], Some(options)).await
    }

    #[instrument(skip(self, messages, options), fields(deployment = %self.deployment))]
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        let options = options.cloned().unwrap_or_default();
        let request = ChatCompletionRequest {
            messages: Self::wire_messages(messages, &options),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: None,
        };

        let url = self.build_url("chat/completions");
        debug!(%url, "sending request");
        let response: ChatCompletionResponse = self.send(&url, &request).await?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            LlmError::Api {
                provider: self.provider_id.clone(),
                message: "no choices in response".to_string(),
            }
        })?;

        let mut result = LLMResponse::new(
            choice.message.content.unwrap_or_default(),
            response.model,
        )
        .with_usage(response.usage.prompt_tokens, response.usage.completion_tokens)
        .with_metadata("response_id", serde_json::json!(response.id));
        result.total_tokens = response.usage.total_tokens.max(result.total_tokens);
        if let Some(reason) = choice.finish_reason {
            result = result.with_finish_reason(reason);
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
            messages: Self::wire_messages(messages, &options),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            top_p: options.top_p,
            stop: options.stop.clone(),
            stream: Some(true),
        };

        let url = self.build_url("chat/completions");
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
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
impl EmbeddingProvider for AzureOpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_id
    }

    fn model(&self) -> &str {
        &self.deployment
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn max_input_tokens(&self) -> usize {
        8192
    }

    #[instrument(skip(self, texts), fields(deployment = %self.deployment, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest { input: texts };
        let url = self.build_url("embeddings");
        let response: EmbeddingResponse = self.send(&url, &request).await?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}
