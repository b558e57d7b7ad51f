//! Google Gemini client: generateContent and batchEmbedContents.
//!
//! Two addressing modes share one body shape. Google AI mode authenticates
//! with an API key query parameter against generativelanguage.googleapis.com;
//! Vertex mode posts to a project/location publisher endpoint with an OAuth
//! bearer token. Embeddings are served in Google AI mode only.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{LlmError, Result};
use crate::traits::{
    ChatMessage, ChatRole, CompletionOptions, EmbeddingProvider, LLMProvider, LLMResponse,
};

/// Google AI base URL.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Addressing/auth mode.
#[derive(Debug, Clone)]
enum Mode {
    /// generativelanguage.googleapis.com with `?key=` auth.
    ApiKey { api_key: String },
    /// Vertex publisher endpoint with optional bearer token.
    Vertex {
        project: String,
        location: String,
        token: Option<String>,
    },
}

/// Gemini provider client.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    provider_id: String,
    mode: Mode,
    model: String,
    max_context_length: usize,
    embedding_dimension: usize,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Serialize)]
struct EmbedContentPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedContentPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedContentRequest<'a> {
    model: String,
    content: EmbedContent<'a>,
}

#[derive(Debug, Serialize)]
struct BatchEmbedContentsRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedContentsResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

impl GeminiProvider {
    /// Create a Google AI (API key) client.
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            mode: Mode::ApiKey {
                api_key: api_key.into(),
            },
            model: model.into(),
            max_context_length: 1_000_000,
            embedding_dimension: 768,
        }
    }

    /// Create a Vertex AI client for `project` in `location`.
    pub fn vertex(
        provider_id: impl Into<String>,
        project: &str,
        location: &str,
        token: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            provider_id: provider_id.into(),
            mode: Mode::Vertex {
                project: project.to_string(),
                location: location.to_string(),
                token,
            },
            model: model.into(),
            max_context_length: 1_000_000,
            embedding_dimension: 768,
        }
    }

    /// Set the embedding dimension reported for this model.
    pub fn with_embedding_dimension(mut self, dimension: usize) -> Self {
        self.embedding_dimension = dimension;
        self
    }

    fn operation_url(&self, operation: &str) -> String {
        match &self.mode {
            Mode::ApiKey { api_key } => format!(
                "{GEMINI_API_BASE}/models/{}:{operation}?key={api_key}",
                self.model
            ),
            Mode::Vertex {
                project, location, ..
            } => format!(
                "https://{location}-aiplatform.googleapis.com/v1/projects/{project}/locations/{location}/publishers/google/models/{}:{operation}",
                self.model
            ),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.mode {
            Mode::ApiKey { .. } => builder,
            Mode::Vertex { token, .. } => match token {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            },
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        let response = self
            .apply_auth(self.client.post(url))
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
            if let Ok(parsed) = serde_json::from_str::<GeminiErrorResponse>(&text) {
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

    /// Gemini speaks "user"/"model" roles; system prompts use the dedicated
    /// systemInstruction field.
    fn build_request<'a>(
        messages: &'a [ChatMessage],
        options: &'a CompletionOptions,
    ) -> GenerateContentRequest<'a> {
        let mut system_parts: Vec<Part<'a>> = Vec::new();
        let mut contents: Vec<Content<'a>> = Vec::new();

        if let Some(system) = &options.system_prompt {
            system_parts.push(Part { text: system });
        }

        for message in messages {
            match message.role {
                ChatRole::System => system_parts.push(Part {
                    text: &message.content,
                }),
                ChatRole::User => contents.push(Content {
                    role: Some("user"),
                    parts: vec![Part {
                        text: &message.content,
                    }],
                }),
                ChatRole::Assistant => contents.push(Content {
                    role: Some("model"),
                    parts: vec![Part {
                        text: &message.content,
                    }],
                }),
            }
        }

        let generation_config = GenerationConfig {
            temperature: options.temperature,
            top_p: options.top_p,
            max_output_tokens: options.max_tokens,
            stop_sequences: options.stop.clone(),
        };

        GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then_some(Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: Some(generation_config),
        }
    }
}

#[async_trait]
impl LLMProvider for GeminiProvider {
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
        let request = Self::build_request(messages, &options);
        let url = self.operation_url("generateContent");
        debug!(%url, "sending generateContent request");
        let response: GenerateContentResponse = self.send(&url, &request).await?;

        let candidate = response.candidates.into_iter().next().ok_or_else(|| {
            LlmError::Api {
                provider: self.provider_id.clone(),
                message: "no candidates in response".to_string(),
            }
        })?;

        let content: String = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let mut result = LLMResponse::new(content, self.model.clone()).with_usage(
            response.usage_metadata.prompt_token_count,
            response.usage_metadata.candidates_token_count,
        );
        if let Some(reason) = candidate.finish_reason {
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
        let request = Self::build_request(messages, &options);

        let mut url = self.operation_url("streamGenerateContent");
        url.push_str(if url.contains('?') { "&alt=sse" } else { "?alt=sse" });

        let response = self
            .apply_auth(self.client.post(&url))
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
                    if let Ok(chunk) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(parts) = chunk
                            .get("candidates")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("content"))
                            .and_then(|c| c.get("parts"))
                            .and_then(|p| p.as_array())
                        {
                            for part in parts {
                                if let Some(fragment) =
                                    part.get("text").and_then(|t| t.as_str())
                                {
                                    content.push_str(fragment);
                                }
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

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
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
        2048
    }

    #[instrument(skip(self, texts), fields(provider = %self.provider_id, count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if matches!(self.mode, Mode::Vertex { .. }) {
            return Err(LlmError::NotSupported(
                "embeddings are only available in Google AI mode".to_string(),
            ));
        }

        let request = BatchEmbedContentsRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: format!("models/{}", self.model),
                    content: EmbedContent {
                        parts: vec![EmbedContentPart { text }],
                    },
                })
                .collect(),
        };

        let url = self.operation_url("batchEmbedContents");
        let response: BatchEmbedContentsResponse = self.send(&url, &request).await?;
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_mode_url_carries_key() {
        let p = GeminiProvider::new("google_genai", "the-key", "gemini-1.5-flash");
        assert_eq!(
            p.operation_url("generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key=the-key"
        );
    }

    #[test]
    fn vertex_mode_url_carries_project_and_location() {
        let p = GeminiProvider::vertex(
            "google_vertexai",
            "my-project",
            "europe-west4",
            None,
            "gemini-1.5-pro",
        );
        assert_eq!(
            p.operation_url("generateContent"),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/my-project/locations/europe-west4/publishers/google/models/gemini-1.5-pro:generateContent"
        );
    }

    #[test]
    fn roles_map_to_user_and_model() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ];
        let options = CompletionOptions::default();
        let request = GeminiProvider::build_request(&messages, &options);
        assert_eq!(request.contents.len(), 2);
        assert_eq!(request.contents[0].role, Some("user"));
        assert_eq!(request.contents[1].role, Some("model"));
        assert!(request.system_instruction.is_some());
    }

    #[test]
    fn generation_config_serializes_camel_case() {
        let messages = vec![ChatMessage::user("hi")];
        let options = CompletionOptions {
            temperature: Some(0.5),
            max_tokens: Some(512),
            ..Default::default()
        };
        let request = GeminiProvider::build_request(&messages, &options);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["temperature"], 0.5);
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 512);
    }

    #[test]
    fn response_parsing() {
        let body = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "The answer"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 3, "totalTokenCount": 13}
        }"#;
        let parsed: GenerateContentResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(parsed.usage_metadata.prompt_token_count, 10);
    }

    #[tokio::test]
    async fn vertex_mode_has_no_embeddings() {
        let p = GeminiProvider::vertex("google_vertexai", "p", "us-central1", None, "gemini-1.5-pro");
        let err = p.embed(&["text".to_string()]).await.unwrap_err();
        assert!(matches!(err, LlmError::NotSupported(_)));
    }
}
