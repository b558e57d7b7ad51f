//! Model factory: the single choke point that turns (provider, model,
//! params, credentials) into ready-to-invoke handles.
//!
//! The factory is explicitly constructed with the registry and credential
//! store it should consult — there is no global instance — so tests inject
//! stub registries and callers own the wiring. Construction is local and
//! synchronous and never retries; the retry budget belongs to the handles'
//! invocation methods.
//!
//! Provider-specific wiring is two table lookups: the descriptor's
//! [`ProviderFamily`] decides which credential fields feed which
//! construction parameters, and its [`WireFormat`] decides which concrete
//! client speaks to the backend.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use tracing::{debug, warn};

use crate::credentials::{Credential, CredentialStore};
use crate::error::{LlmError, Result};
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::azure::AzureOpenAiProvider;
use crate::providers::gemini::GeminiProvider;
use crate::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::registry::{ProviderDescriptor, ProviderFamily, ProviderRegistry, WireFormat};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::traits::{ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, LLMResponse};

/// Baseline embedding provider used when the requested one has no
/// embedding-capable models.
const FALLBACK_EMBEDDING_PROVIDER: &str = "openai";

/// Baseline embedding model (the default the application ships with).
const FALLBACK_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Default Azure API version when the credential does not pin one.
const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Default Google Cloud location.
const DEFAULT_VERTEX_LOCATION: &str = "us-central1";

/// Default AWS region.
#[cfg(feature = "bedrock")]
const DEFAULT_AWS_REGION: &str = "us-east-1";

/// Generation parameters for a chat handle.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Sampling temperature, in `[0, 1]`.
    pub temperature: f32,

    /// Maximum output tokens; provider default when unset.
    pub max_tokens: Option<usize>,

    /// Provider-specific extra parameters, passed through opaquely.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            extra: HashMap::new(),
        }
    }
}

impl GenerationParams {
    /// Params with just a temperature.
    pub fn with_temperature(temperature: f32) -> Self {
        Self {
            temperature,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(LlmError::InvalidRequest(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// An initialized, ready-to-invoke chat client.
///
/// Immutable after construction and cheap to clone; safe to share across
/// concurrent invocations. Carries no resources needing explicit close.
#[derive(Clone)]
pub struct ChatHandle {
    provider_id: String,
    model_id: String,
    params: GenerationParams,
    client: Arc<dyn LLMProvider>,
    retry: RetryPolicy,
}

impl ChatHandle {
    /// Wrap an existing client (used by tests to inject stubs).
    pub fn from_client(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        params: GenerationParams,
        client: Arc<dyn LLMProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            params,
            client,
            retry,
        }
    }

    /// The provider this handle talks to.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// The model this handle is bound to.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// The generation parameters baked into this handle.
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.params.temperature),
            max_tokens: self.params.max_tokens,
            ..Default::default()
        }
    }

    /// Send role-tagged messages and return the completion.
    ///
    /// Transient failures (timeouts, rate limits, 5xx) are retried with
    /// bounded exponential backoff; permanent failures surface immediately.
    pub async fn invoke(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        let options = self.options();
        let client = self.client.clone();
        RetryExecutor::execute(&self.retry, move || {
            let client = client.clone();
            let options = options.clone();
            async move { client.chat(messages, Some(&options)).await }
        })
        .await
    }

    /// Stream the completion as a single-pass, forward-only sequence of text
    /// fragments. Not restartable; dropping the stream cancels it. No retry
    /// is applied to streams.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
    ) -> Result<BoxStream<'static, Result<String>>> {
        self.client.chat_stream(messages, Some(&self.options())).await
    }
}

impl std::fmt::Debug for ChatHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHandle")
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// An initialized embedding client.
#[derive(Clone)]
pub struct EmbeddingHandle {
    provider_id: String,
    model_id: String,
    client: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl EmbeddingHandle {
    /// Wrap an existing client (used by tests to inject stubs).
    pub fn from_client(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        client: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            client,
            retry,
        }
    }

    /// The provider this handle talks to.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// The embedding model this handle is bound to.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Vector dimension produced by this model.
    pub fn dimension(&self) -> usize {
        self.client.dimension()
    }

    /// Embed a batch of texts, retrying transient failures.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.client.clone();
        RetryExecutor::execute(&self.retry, move || {
            let client = client.clone();
            async move { client.embed(texts).await }
        })
        .await
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let client = self.client.clone();
        RetryExecutor::execute(&self.retry, move || {
            let client = client.clone();
            async move { client.embed_one(text).await }
        })
        .await
    }
}

impl std::fmt::Debug for EmbeddingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingHandle")
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .finish_non_exhaustive()
    }
}

/// Constructs chat and embedding handles from registry + credentials.
pub struct ModelFactory {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<CredentialStore>,
    retry: RetryPolicy,
}

impl ModelFactory {
    /// Create a factory over the given registry and credential store.
    pub fn new(registry: Arc<ProviderRegistry>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            registry,
            credentials,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the retry policy baked into produced handles.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The registry this factory consults.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// The credential store this factory consults.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Build a chat handle for `provider_id` / `model_id`.
    ///
    /// Fails with `Configuration` (missing fields named) when credentials
    /// are incomplete, `UnsupportedModel` when the model is not in the
    /// provider's catalog and the catalog is not open, and
    /// `ProviderInitialization` when client construction itself fails.
    pub fn create_chat_model(
        &self,
        provider_id: &str,
        model_id: &str,
        params: GenerationParams,
    ) -> Result<ChatHandle> {
        params.validate()?;
        let (descriptor, credential) = self.resolve(provider_id)?;

        if !descriptor.supports_model(model_id) {
            return Err(LlmError::UnsupportedModel {
                provider: provider_id.to_string(),
                model: model_id.to_string(),
            });
        }

        let client = self.build_chat_client(&descriptor, &credential, model_id)?;
        debug!(provider = provider_id, model = model_id, "chat handle created");

        Ok(ChatHandle {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            params,
            client,
            retry: self.retry.clone(),
        })
    }

    /// Build an embedding handle for `provider_id` / `model_id`.
    ///
    /// When the provider has no embedding-capable models at all, falls back
    /// to the baseline embedding provider and logs the substitution.
    pub fn create_embedding_model(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> Result<EmbeddingHandle> {
        let descriptor = self
            .registry
            .get(provider_id)
            .ok_or_else(|| LlmError::UnknownProvider {
                provider: provider_id.to_string(),
            })?;

        if !descriptor.has_embedding_models() {
            if provider_id == FALLBACK_EMBEDDING_PROVIDER {
                return Err(LlmError::NotSupported(format!(
                    "provider '{provider_id}' has no embedding models"
                )));
            }
            warn!(
                requested = provider_id,
                fallback = FALLBACK_EMBEDDING_PROVIDER,
                model = FALLBACK_EMBEDDING_MODEL,
                "provider has no embedding models, falling back"
            );
            return self
                .create_embedding_model(FALLBACK_EMBEDDING_PROVIDER, FALLBACK_EMBEDDING_MODEL);
        }

        if !descriptor.supports_embedding_model(model_id) {
            return Err(LlmError::UnsupportedModel {
                provider: provider_id.to_string(),
                model: model_id.to_string(),
            });
        }

        let (descriptor, credential) = self.resolve(provider_id)?;
        let client = self.build_embedding_client(&descriptor, &credential, model_id)?;
        debug!(provider = provider_id, model = model_id, "embedding handle created");

        Ok(EmbeddingHandle {
            provider_id: provider_id.to_string(),
            model_id: model_id.to_string(),
            client,
            retry: self.retry.clone(),
        })
    }

    /// Look up the descriptor and gate on credential completeness.
    fn resolve(&self, provider_id: &str) -> Result<(ProviderDescriptor, Credential)> {
        let descriptor = self
            .registry
            .get(provider_id)
            .ok_or_else(|| LlmError::UnknownProvider {
                provider: provider_id.to_string(),
            })?;

        let missing = self.credentials.missing_fields(&descriptor);
        if !missing.is_empty() {
            return Err(LlmError::Configuration {
                provider: provider_id.to_string(),
                missing,
            });
        }

        let credential = self.credentials.get(provider_id).unwrap_or_default();
        Ok((descriptor, credential))
    }

    /// Map the descriptor's family onto construction parameters and build
    /// the wire client.
    fn build_chat_client(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        model_id: &str,
    ) -> Result<Arc<dyn LLMProvider>> {
        let id = descriptor.id.as_str();
        match descriptor.wire {
            WireFormat::OpenAiChat => {
                let base_url = self.openai_style_base_url(descriptor, credential)?;
                let api_key = credential.get("api_key").map(str::to_string);
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    id, base_url, api_key, model_id,
                )))
            }

            WireFormat::AzureOpenAi => {
                let endpoint = credential.get("endpoint").unwrap_or_default();
                let api_key = credential.get("api_key").unwrap_or_default();
                let api_version = credential.get_or("api_version", DEFAULT_AZURE_API_VERSION);
                let provider = AzureOpenAiProvider::new(id, endpoint, api_key, model_id)
                    .map_err(|reason| LlmError::ProviderInitialization {
                        provider: id.to_string(),
                        reason,
                    })?
                    .with_api_version(api_version);
                Ok(Arc::new(provider))
            }

            WireFormat::AnthropicMessages => match descriptor.family {
                ProviderFamily::ProjectLocated => {
                    let project = credential.get("project").unwrap_or_default();
                    let location = credential.get_or("location", DEFAULT_VERTEX_LOCATION);
                    let token = credential.get("api_key").map(str::to_string);
                    Ok(Arc::new(AnthropicProvider::for_vertex(
                        id, project, location, token, model_id,
                    )))
                }
                _ => {
                    let api_key = credential.get("api_key").unwrap_or_default();
                    Ok(Arc::new(AnthropicProvider::new(id, api_key, model_id)))
                }
            },

            WireFormat::GeminiGenerate => match descriptor.family {
                ProviderFamily::ProjectLocated => {
                    let project = credential.get("project").unwrap_or_default();
                    let location = credential.get_or("location", DEFAULT_VERTEX_LOCATION);
                    let token = credential.get("api_key").map(str::to_string);
                    Ok(Arc::new(GeminiProvider::vertex(
                        id, project, location, token, model_id,
                    )))
                }
                _ => {
                    let api_key = credential.get("api_key").unwrap_or_default();
                    Ok(Arc::new(GeminiProvider::new(id, api_key, model_id)))
                }
            },

            WireFormat::BedrockConverse => self.build_bedrock_client(descriptor, credential, model_id),
        }
    }

    fn build_embedding_client(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        model_id: &str,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        let id = descriptor.id.as_str();
        match descriptor.wire {
            WireFormat::OpenAiChat => {
                let base_url = self.openai_style_base_url(descriptor, credential)?;
                let api_key = credential.get("api_key").map(str::to_string);
                Ok(Arc::new(
                    OpenAiCompatibleProvider::new(id, base_url, api_key, model_id)
                        .with_embedding_dimension(default_embedding_dimension(model_id)),
                ))
            }
            WireFormat::AzureOpenAi => {
                let endpoint = credential.get("endpoint").unwrap_or_default();
                let api_key = credential.get("api_key").unwrap_or_default();
                let api_version = credential.get_or("api_version", DEFAULT_AZURE_API_VERSION);
                let provider = AzureOpenAiProvider::new(id, endpoint, api_key, model_id)
                    .map_err(|reason| LlmError::ProviderInitialization {
                        provider: id.to_string(),
                        reason,
                    })?
                    .with_api_version(api_version)
                    .with_embedding_dimension(default_embedding_dimension(model_id));
                Ok(Arc::new(provider))
            }
            WireFormat::GeminiGenerate => {
                let api_key = credential.get("api_key").unwrap_or_default();
                Ok(Arc::new(
                    GeminiProvider::new(id, api_key, model_id)
                        .with_embedding_dimension(default_embedding_dimension(model_id)),
                ))
            }
            WireFormat::AnthropicMessages | WireFormat::BedrockConverse => {
                Err(LlmError::NotSupported(format!(
                    "provider '{id}' does not serve embeddings"
                )))
            }
        }
    }

    /// Resolve the endpoint for an OpenAI-style client: an explicit
    /// `base_url` credential wins, then the descriptor default. Local
    /// base-url-only servers get the `/v1` path appended when missing.
    fn openai_style_base_url(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
    ) -> Result<String> {
        let default = descriptor.default_base_url.as_deref().unwrap_or_default();
        let mut base = credential.get_or("base_url", default).trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(LlmError::ProviderInitialization {
                provider: descriptor.id.clone(),
                reason: "no endpoint configured".to_string(),
            });
        }
        if descriptor.family == ProviderFamily::BaseUrlOnly && !base.ends_with("/v1") {
            base.push_str("/v1");
        }
        Ok(base)
    }

    #[cfg(feature = "bedrock")]
    fn build_bedrock_client(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &Credential,
        model_id: &str,
    ) -> Result<Arc<dyn LLMProvider>> {
        let access_key = credential.get("api_key").unwrap_or_default();
        let secret_key = credential.get("secret_key").unwrap_or_default();
        let region = credential.get_or("region", DEFAULT_AWS_REGION);
        Ok(Arc::new(crate::providers::bedrock::BedrockProvider::new(
            &descriptor.id,
            access_key,
            secret_key,
            region,
            model_id,
        )))
    }

    #[cfg(not(feature = "bedrock"))]
    fn build_bedrock_client(
        &self,
        descriptor: &ProviderDescriptor,
        _credential: &Credential,
        _model_id: &str,
    ) -> Result<Arc<dyn LLMProvider>> {
        Err(LlmError::NotSupported(format!(
            "provider '{}' requires the 'bedrock' feature",
            descriptor.id
        )))
    }
}

/// Known vector dimensions for the embedding models in the built-in catalog;
/// 1536 for anything unrecognized.
fn default_embedding_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-004" | "nomic-embed-text" => 768,
        "mistral-embed" => 1024,
        _ => 1536,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;

    fn factory_with(
        entries: &[(&str, &[(&str, &str)])],
    ) -> ModelFactory {
        let registry = Arc::new(ProviderRegistry::builtin());
        let credentials = Arc::new(CredentialStore::new());
        for (provider, fields) in entries {
            credentials.set(
                *provider,
                Credential::from_pairs(fields.iter().map(|(k, v)| (*k, *v))),
            );
        }
        ModelFactory::new(registry, credentials)
    }

    #[test]
    fn configured_api_key_provider_yields_handle() {
        let factory = factory_with(&[("openai", &[("api_key", "sk-test")])]);
        let handle = factory
            .create_chat_model("openai", "gpt-4o-mini", GenerationParams::with_temperature(0.0))
            .unwrap();
        assert_eq!(handle.provider_id(), "openai");
        assert_eq!(handle.model_id(), "gpt-4o-mini");
        assert_eq!(handle.params().temperature, 0.0);
    }

    #[test]
    fn missing_endpoint_is_named_in_configuration_error() {
        let factory = factory_with(&[("azure_openai", &[("api_key", "azure-key")])]);
        let err = factory
            .create_chat_model("azure_openai", "my-deployment", GenerationParams::default())
            .unwrap_err();
        match err {
            LlmError::Configuration { provider, missing } => {
                assert_eq!(provider, "azure_openai");
                assert_eq!(missing, vec!["endpoint"]);
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }

    #[test]
    fn unconfigured_provider_is_rejected() {
        let factory = factory_with(&[]);
        let err = factory
            .create_chat_model("openai", "gpt-4o-mini", GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration { .. }));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let factory = factory_with(&[]);
        let err = factory
            .create_chat_model("warpdrive", "x-1", GenerationParams::default())
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownProvider { .. }));
    }

    #[test]
    fn model_outside_catalog_is_rejected() {
        let factory = factory_with(&[("openai", &[("api_key", "sk-test")])]);
        let err = factory
            .create_chat_model("openai", "gpt-99-ultra", GenerationParams::default())
            .unwrap_err();
        match err {
            LlmError::UnsupportedModel { provider, model } => {
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt-99-ultra");
            }
            other => panic!("expected UnsupportedModel, got {other:?}"),
        }
    }

    #[test]
    fn custom_catalog_accepts_any_deployment_name() {
        let factory = factory_with(&[(
            "azure_openai",
            &[
                ("api_key", "azure-key"),
                ("endpoint", "https://myres.openai.azure.com"),
            ],
        )]);
        let handle = factory
            .create_chat_model(
                "azure_openai",
                "my-private-gpt4o-deployment",
                GenerationParams::default(),
            )
            .unwrap();
        assert_eq!(handle.model_id(), "my-private-gpt4o-deployment");
    }

    #[test]
    fn malformed_azure_endpoint_fails_initialization() {
        let factory = factory_with(&[(
            "azure_openai",
            &[("api_key", "azure-key"), ("endpoint", "not a url")],
        )]);
        let err = factory
            .create_chat_model("azure_openai", "dep", GenerationParams::default())
            .unwrap_err();
        match err {
            LlmError::ProviderInitialization { provider, .. } => {
                assert_eq!(provider, "azure_openai");
            }
            other => panic!("expected ProviderInitialization, got {other:?}"),
        }
    }

    #[test]
    fn temperature_outside_range_is_rejected() {
        let factory = factory_with(&[("openai", &[("api_key", "sk-test")])]);
        let err = factory
            .create_chat_model(
                "openai",
                "gpt-4o-mini",
                GenerationParams::with_temperature(1.5),
            )
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }

    #[test]
    fn keyless_local_provider_constructs_without_api_key() {
        let factory = factory_with(&[("ollama", &[("base_url", "http://localhost:11434")])]);
        let handle = factory
            .create_chat_model("ollama", "llama3", GenerationParams::default())
            .unwrap();
        assert_eq!(handle.provider_id(), "ollama");
    }

    #[test]
    fn vertex_provider_uses_project_and_location() {
        let factory = factory_with(&[(
            "google_vertexai",
            &[("project", "my-project"), ("location", "europe-west4")],
        )]);
        let handle = factory
            .create_chat_model("google_vertexai", "gemini-1.5-pro", GenerationParams::default())
            .unwrap();
        assert_eq!(handle.provider_id(), "google_vertexai");
    }

    #[test]
    fn embedding_handle_for_capable_provider() {
        let factory = factory_with(&[("openai", &[("api_key", "sk-test")])]);
        let handle = factory
            .create_embedding_model("openai", "text-embedding-3-small")
            .unwrap();
        assert_eq!(handle.provider_id(), "openai");
        assert_eq!(handle.dimension(), 1536);

        let large = factory
            .create_embedding_model("openai", "text-embedding-3-large")
            .unwrap();
        assert_eq!(large.dimension(), 3072);
    }

    #[test]
    fn embedding_falls_back_when_provider_has_none() {
        // anthropic has no embedding catalog; with openai configured the
        // factory silently serves the baseline instead.
        let factory = factory_with(&[
            ("anthropic", &[("api_key", "sk-ant")]),
            ("openai", &[("api_key", "sk-test")]),
        ]);
        let handle = factory
            .create_embedding_model("anthropic", "claude-embed")
            .unwrap();
        assert_eq!(handle.provider_id(), "openai");
        assert_eq!(handle.model_id(), "text-embedding-3-large");
    }

    #[test]
    fn embedding_fallback_requires_baseline_configured() {
        let factory = factory_with(&[("anthropic", &[("api_key", "sk-ant")])]);
        let err = factory
            .create_embedding_model("anthropic", "claude-embed")
            .unwrap_err();
        assert!(matches!(err, LlmError::Configuration { .. }));
    }

    #[test]
    fn unknown_embedding_model_is_rejected() {
        let factory = factory_with(&[("openai", &[("api_key", "sk-test")])]);
        let err = factory
            .create_embedding_model("openai", "not-an-embedding-model")
            .unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel { .. }));
    }

    #[tokio::test]
    async fn invoke_retries_transient_failures_until_success() {
        use crate::providers::mock::MockChatProvider;
        use crate::retry::RetryPolicy;
        use std::time::Duration;

        let mock = Arc::new(MockChatProvider::new());
        mock.push_failure(LlmError::Timeout {
            provider: "mock".to_string(),
        });
        mock.push_failure(LlmError::Timeout {
            provider: "mock".to_string(),
        });
        mock.push_response("third time lucky");

        let handle = ChatHandle::from_client(
            "mock",
            "mock-model",
            GenerationParams::default(),
            mock.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        );

        let response = handle.invoke(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(response.content, "third time lucky");
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn invoke_does_not_retry_auth_failures() {
        use crate::providers::mock::MockChatProvider;
        use crate::retry::RetryPolicy;
        use std::time::Duration;

        let mock = Arc::new(MockChatProvider::new());
        mock.push_failure(LlmError::Auth {
            provider: "mock".to_string(),
            message: "key revoked".to_string(),
        });
        mock.push_response("never reached");

        let handle = ChatHandle::from_client(
            "mock",
            "mock-model",
            GenerationParams::default(),
            mock.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
        );

        let err = handle.invoke(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, LlmError::Auth { .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn default_dimension_table() {
        assert_eq!(default_embedding_dimension("text-embedding-3-large"), 3072);
        assert_eq!(default_embedding_dimension("mistral-embed"), 1024);
        assert_eq!(default_embedding_dimension("whatever"), 1536);
    }
}
