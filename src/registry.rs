//! Provider registry: the catalog of usable backends and their requirements.
//!
//! Each backend is described by a [`ProviderDescriptor`]: which credential
//! fields it needs (derived from its [`ProviderFamily`]), which wire protocol
//! its client speaks ([`WireFormat`]), and which models it serves. Provider
//! construction is therefore a data lookup, not a code change: adding a
//! backend means adding a descriptor row.
//!
//! The registry is two-tier. A built-in table always exists; an optional
//! [`DescriptorSource`] (e.g. a TOML catalog file) can replace it at startup
//! or on [`ProviderRegistry::refresh`]. When the source is unreachable the
//! registry serves the previous snapshot and logs the degradation — callers
//! never see an empty catalog.
//!
//! Reads take a cheap copy-on-write snapshot (`Arc<Vec<_>>`), so concurrent
//! lookups never block each other and `refresh` swaps the whole set at once.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Catalog sentinel: the caller may supply any deployment/model name.
pub const MODELS_CUSTOM: &str = "custom";

/// A credential field a provider may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialField {
    ApiKey,
    Endpoint,
    ApiVersion,
    Project,
    Location,
    BaseUrl,
    SecretKey,
    Region,
}

impl CredentialField {
    /// The key under which this field is stored in a credential map.
    pub fn key(&self) -> &'static str {
        match self {
            CredentialField::ApiKey => "api_key",
            CredentialField::Endpoint => "endpoint",
            CredentialField::ApiVersion => "api_version",
            CredentialField::Project => "project",
            CredentialField::Location => "location",
            CredentialField::BaseUrl => "base_url",
            CredentialField::SecretKey => "secret_key",
            CredentialField::Region => "region",
        }
    }
}

/// How a provider authenticates, as a finite set of credential shapes.
///
/// The family decides both the completeness check and how generic credential
/// fields map onto construction parameters in the model factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// A single API key (most hosted APIs).
    SimpleApiKey,
    /// API key plus resource endpoint and API version (Azure-style).
    EndpointVersioned,
    /// Cloud project plus location, no API key (Vertex-style).
    ProjectLocated,
    /// Access key plus secret key plus region (AWS-style).
    RegionSecreted,
    /// Only a base URL, no authentication (local servers).
    BaseUrlOnly,
}

impl ProviderFamily {
    /// The fields that must be present for a provider of this family to be
    /// considered configured. Optional fields with defaults (api_version,
    /// location, region) are not listed here.
    pub fn required_fields(&self) -> &'static [CredentialField] {
        match self {
            ProviderFamily::SimpleApiKey => &[CredentialField::ApiKey],
            ProviderFamily::EndpointVersioned => {
                &[CredentialField::ApiKey, CredentialField::Endpoint]
            }
            ProviderFamily::ProjectLocated => &[CredentialField::Project],
            ProviderFamily::RegionSecreted => {
                &[CredentialField::ApiKey, CredentialField::SecretKey]
            }
            ProviderFamily::BaseUrlOnly => &[CredentialField::BaseUrl],
        }
    }

    /// Whether this family authenticates with an API key at all.
    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            ProviderFamily::SimpleApiKey
                | ProviderFamily::EndpointVersioned
                | ProviderFamily::RegionSecreted
        )
    }
}

/// Wire protocol a provider's client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// OpenAI chat-completions shape (OpenAI and the many compatible APIs).
    #[serde(rename = "openai_chat")]
    OpenAiChat,
    /// Anthropic Messages API.
    #[serde(rename = "anthropic_messages")]
    AnthropicMessages,
    /// Google generateContent (Google AI and Vertex).
    #[serde(rename = "gemini_generate")]
    GeminiGenerate,
    /// Azure OpenAI deployments.
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    /// AWS Bedrock Converse.
    #[serde(rename = "bedrock_converse")]
    BedrockConverse,
}

/// Describes one LLM/embedding backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Unique provider id (e.g. `"openai"`, `"azure_openai"`).
    pub id: String,

    /// Human-readable name.
    pub display_name: String,

    /// Credential shape.
    pub family: ProviderFamily,

    /// Wire protocol for client construction.
    pub wire: WireFormat,

    /// Chat model catalog. May contain the [`MODELS_CUSTOM`] sentinel to
    /// accept caller-supplied deployment names.
    pub models: Vec<String>,

    /// Embedding model catalog; empty if the provider has no embedding API.
    #[serde(default)]
    pub embedding_models: Vec<String>,

    /// Default API endpoint, overridable by a `base_url` credential field.
    #[serde(default)]
    pub default_base_url: Option<String>,
}

impl ProviderDescriptor {
    fn new(
        id: &str,
        display_name: &str,
        family: ProviderFamily,
        wire: WireFormat,
        models: &[&str],
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            family,
            wire,
            models: models.iter().map(|m| m.to_string()).collect(),
            embedding_models: Vec::new(),
            default_base_url: None,
        }
    }

    fn with_embedding_models(mut self, models: &[&str]) -> Self {
        self.embedding_models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    fn with_base_url(mut self, url: &str) -> Self {
        self.default_base_url = Some(url.to_string());
        self
    }

    /// Fields that must be present and non-empty for this provider.
    pub fn credential_requirements(&self) -> &'static [CredentialField] {
        self.family.required_fields()
    }

    /// Whether this provider authenticates with an API key.
    pub fn requires_api_key(&self) -> bool {
        self.family.requires_api_key()
    }

    /// Whether the catalog is open (caller may pass any model id).
    pub fn accepts_any_model(&self) -> bool {
        self.models.iter().any(|m| m == MODELS_CUSTOM)
    }

    /// Whether `model` can be served by this provider.
    pub fn supports_model(&self, model: &str) -> bool {
        self.accepts_any_model() || self.models.iter().any(|m| m == model)
    }

    /// Whether this provider can serve embedding requests at all.
    pub fn has_embedding_models(&self) -> bool {
        !self.embedding_models.is_empty()
    }

    /// Whether `model` is in the embedding catalog.
    pub fn supports_embedding_model(&self, model: &str) -> bool {
        self.embedding_models
            .iter()
            .any(|m| m == model || m == MODELS_CUSTOM)
    }

    /// Descriptor invariants: non-empty id and a non-empty model catalog.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.models.is_empty()
    }
}

/// A read source for provider descriptors (config file, external store).
pub trait DescriptorSource: Send + Sync {
    /// Load the full descriptor set. Errors are reported as strings; the
    /// registry decides whether to fall back or keep its current snapshot.
    fn load(&self) -> std::result::Result<Vec<ProviderDescriptor>, String>;

    /// A short label for log messages.
    fn describe(&self) -> String;
}

/// Descriptor source backed by a TOML catalog file.
///
/// ```toml
/// [[providers]]
/// id = "openai"
/// display_name = "OpenAI"
/// family = "simple_api_key"
/// wire = "openai_chat"
/// models = ["gpt-4o", "gpt-4o-mini"]
/// embedding_models = ["text-embedding-3-small"]
/// ```
pub struct TomlDescriptorSource {
    path: PathBuf,
}

#[derive(Deserialize)]
struct TomlCatalog {
    #[serde(default)]
    providers: Vec<ProviderDescriptor>,
}

impl TomlDescriptorSource {
    /// Create a source reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DescriptorSource for TomlDescriptorSource {
    fn load(&self) -> std::result::Result<Vec<ProviderDescriptor>, String> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("failed to read {}: {e}", self.path.display()))?;
        let catalog: TomlCatalog =
            toml::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", self.path.display()))?;
        Ok(catalog.providers)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// The provider catalog with a built-in fallback table.
pub struct ProviderRegistry {
    source: Option<Box<dyn DescriptorSource>>,
    descriptors: RwLock<Arc<Vec<ProviderDescriptor>>>,
}

impl ProviderRegistry {
    /// Create a registry serving only the built-in table.
    pub fn builtin() -> Self {
        Self {
            source: None,
            descriptors: RwLock::new(Arc::new(builtin_descriptors())),
        }
    }

    /// Create a registry backed by an external source.
    ///
    /// The source is loaded immediately; if it is unavailable, the built-in
    /// table is served and a degradation warning is logged.
    pub fn with_source(source: Box<dyn DescriptorSource>) -> Self {
        let registry = Self {
            source: Some(source),
            descriptors: RwLock::new(Arc::new(builtin_descriptors())),
        };
        registry.refresh();
        registry
    }

    /// Snapshot of all descriptors. Never fails and never returns an empty
    /// set: the built-in table is the floor.
    pub fn list(&self) -> Arc<Vec<ProviderDescriptor>> {
        self.descriptors
            .read()
            .expect("registry lock poisoned")
            .clone()
    }

    /// Look up a descriptor by provider id.
    pub fn get(&self, id: &str) -> Option<ProviderDescriptor> {
        self.list().iter().find(|d| d.id == id).cloned()
    }

    /// Reload from the external source, replacing the current snapshot.
    ///
    /// On failure the previous set stays in place (stale-but-available over
    /// empty) and `false` is returned. A registry without a source is a
    /// no-op returning `true`.
    pub fn refresh(&self) -> bool {
        let Some(source) = &self.source else {
            return true;
        };

        match source.load() {
            Ok(loaded) => {
                let valid: Vec<ProviderDescriptor> = loaded
                    .into_iter()
                    .filter(|d| {
                        if d.is_valid() {
                            true
                        } else {
                            warn!(provider = %d.id, "skipping invalid provider descriptor");
                            false
                        }
                    })
                    .collect();

                if valid.is_empty() {
                    warn!(
                        source = %source.describe(),
                        "provider source returned no usable descriptors; keeping current set"
                    );
                    return false;
                }

                debug!(count = valid.len(), source = %source.describe(), "provider catalog refreshed");
                *self.descriptors.write().expect("registry lock poisoned") = Arc::new(valid);
                true
            }
            Err(e) => {
                warn!(
                    source = %source.describe(),
                    error = %e,
                    "provider source unavailable; serving previous catalog"
                );
                false
            }
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// The built-in provider table.
///
/// One row per supported backend; the model lists are the curated defaults
/// a fresh install starts with, not an exhaustive mirror of each vendor.
pub fn builtin_descriptors() -> Vec<ProviderDescriptor> {
    use ProviderFamily::*;
    use WireFormat::*;

    vec![
        ProviderDescriptor::new(
            "openai",
            "OpenAI",
            SimpleApiKey,
            OpenAiChat,
            &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"],
        )
        .with_embedding_models(&[
            "text-embedding-3-large",
            "text-embedding-3-small",
            "text-embedding-ada-002",
        ])
        .with_base_url("https://api.openai.com/v1"),
        ProviderDescriptor::new(
            "anthropic",
            "Anthropic",
            SimpleApiKey,
            AnthropicMessages,
            &[
                "claude-3-5-sonnet-20241022",
                "claude-3-opus-20240229",
                "claude-3-sonnet-20240229",
                "claude-3-haiku-20240307",
            ],
        ),
        ProviderDescriptor::new(
            "azure_openai",
            "Azure OpenAI",
            EndpointVersioned,
            AzureOpenAi,
            &[MODELS_CUSTOM],
        )
        .with_embedding_models(&[MODELS_CUSTOM]),
        ProviderDescriptor::new(
            "azure_ai",
            "Azure AI",
            EndpointVersioned,
            AzureOpenAi,
            &[MODELS_CUSTOM],
        ),
        ProviderDescriptor::new(
            "google_vertexai",
            "Google Vertex AI",
            ProjectLocated,
            GeminiGenerate,
            &["gemini-1.5-pro", "gemini-1.5-flash", "text-bison@002"],
        ),
        ProviderDescriptor::new(
            "google_genai",
            "Google Gemini",
            SimpleApiKey,
            GeminiGenerate,
            &["gemini-1.5-pro", "gemini-1.5-flash", "gemini-pro"],
        )
        .with_embedding_models(&["text-embedding-004"]),
        ProviderDescriptor::new(
            "google_anthropic_vertex",
            "Anthropic via Google Vertex AI",
            ProjectLocated,
            AnthropicMessages,
            &[
                "claude-3-5-sonnet@20240620",
                "claude-3-opus@20240229",
                "claude-3-haiku@20240307",
            ],
        ),
        ProviderDescriptor::new(
            "bedrock",
            "AWS Bedrock",
            RegionSecreted,
            BedrockConverse,
            &[
                "anthropic.claude-3-5-sonnet-20241022-v2:0",
                "anthropic.claude-3-sonnet-20240229-v1:0",
                "meta.llama3-70b-instruct-v1:0",
                "mistral.mistral-large-2402-v1:0",
            ],
        ),
        ProviderDescriptor::new(
            "bedrock_converse",
            "AWS Bedrock Converse",
            RegionSecreted,
            BedrockConverse,
            &[
                "anthropic.claude-3-5-sonnet-20241022-v2:0",
                "anthropic.claude-3-sonnet-20240229-v1:0",
            ],
        ),
        ProviderDescriptor::new(
            "cohere",
            "Cohere",
            SimpleApiKey,
            OpenAiChat,
            &["command-r-plus", "command-r", "command"],
        )
        .with_base_url("https://api.cohere.ai/compatibility/v1"),
        ProviderDescriptor::new(
            "fireworks",
            "Fireworks AI",
            SimpleApiKey,
            OpenAiChat,
            &[
                "accounts/fireworks/models/llama-v3p1-70b-instruct",
                "accounts/fireworks/models/mixtral-8x7b-instruct",
            ],
        )
        .with_base_url("https://api.fireworks.ai/inference/v1"),
        ProviderDescriptor::new(
            "together",
            "Together AI",
            SimpleApiKey,
            OpenAiChat,
            &[
                "meta-llama/Llama-3-70b-chat-hf",
                "mistralai/Mixtral-8x7B-Instruct-v0.1",
            ],
        )
        .with_base_url("https://api.together.xyz/v1"),
        ProviderDescriptor::new(
            "mistralai",
            "Mistral AI",
            SimpleApiKey,
            OpenAiChat,
            &[
                "mistral-large-latest",
                "mistral-medium-latest",
                "mistral-small-latest",
            ],
        )
        .with_embedding_models(&["mistral-embed"])
        .with_base_url("https://api.mistral.ai/v1"),
        ProviderDescriptor::new(
            "huggingface",
            "HuggingFace",
            SimpleApiKey,
            OpenAiChat,
            &[
                "HuggingFaceH4/zephyr-7b-beta",
                "mistralai/Mixtral-8x7B-Instruct-v0.1",
            ],
        )
        .with_base_url("https://router.huggingface.co/v1"),
        ProviderDescriptor::new(
            "groq",
            "Groq",
            SimpleApiKey,
            OpenAiChat,
            &[
                "llama-3.1-70b-versatile",
                "llama3-70b-8192",
                "mixtral-8x7b-32768",
            ],
        )
        .with_base_url("https://api.groq.com/openai/v1"),
        ProviderDescriptor::new(
            "ollama",
            "Ollama",
            BaseUrlOnly,
            OpenAiChat,
            &["llama3", "mistral", "codellama", "phi3"],
        )
        .with_embedding_models(&["nomic-embed-text"])
        .with_base_url("http://localhost:11434"),
        ProviderDescriptor::new(
            "deepseek",
            "DeepSeek",
            SimpleApiKey,
            OpenAiChat,
            &["deepseek-chat", "deepseek-coder"],
        )
        .with_base_url("https://api.deepseek.com/v1"),
        ProviderDescriptor::new(
            "ibm",
            "IBM watsonx.ai",
            SimpleApiKey,
            OpenAiChat,
            &["ibm/granite-13b-chat-v2", "meta-llama/llama-3-70b-instruct"],
        )
        .with_base_url("https://us-south.ml.cloud.ibm.com/v1"),
        ProviderDescriptor::new(
            "nvidia",
            "NVIDIA AI",
            SimpleApiKey,
            OpenAiChat,
            &[
                "meta/llama3-70b-instruct",
                "mistralai/mixtral-8x7b-instruct-v0.1",
            ],
        )
        .with_base_url("https://integrate.api.nvidia.com/v1"),
        ProviderDescriptor::new(
            "xai",
            "xAI (Grok)",
            SimpleApiKey,
            OpenAiChat,
            &["grok-beta", "grok-vision-beta"],
        )
        .with_base_url("https://api.x.ai/v1"),
        ProviderDescriptor::new(
            "perplexity",
            "Perplexity AI",
            SimpleApiKey,
            OpenAiChat,
            &[
                "llama-3.1-sonar-large-128k-online",
                "llama-3.1-sonar-small-128k-online",
            ],
        )
        .with_base_url("https://api.perplexity.ai"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn builtin_table_is_valid() {
        let descriptors = builtin_descriptors();
        assert!(descriptors.len() >= 12, "expected a dozen-plus providers");
        for d in &descriptors {
            assert!(d.is_valid(), "descriptor '{}' is invalid", d.id);
        }
        // ids are unique
        let mut ids: Vec<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), descriptors.len());
    }

    #[test]
    fn family_requirements() {
        assert_eq!(
            ProviderFamily::SimpleApiKey.required_fields(),
            &[CredentialField::ApiKey]
        );
        assert_eq!(
            ProviderFamily::EndpointVersioned.required_fields(),
            &[CredentialField::ApiKey, CredentialField::Endpoint]
        );
        assert!(!ProviderFamily::ProjectLocated.requires_api_key());
        assert!(!ProviderFamily::BaseUrlOnly.requires_api_key());
        assert!(ProviderFamily::RegionSecreted.requires_api_key());
    }

    #[test]
    fn custom_sentinel_accepts_any_model() {
        let registry = ProviderRegistry::builtin();
        let azure = registry.get("azure_openai").unwrap();
        assert!(azure.accepts_any_model());
        assert!(azure.supports_model("my-gpt4o-deployment"));

        let openai = registry.get("openai").unwrap();
        assert!(!openai.accepts_any_model());
        assert!(openai.supports_model("gpt-4o-mini"));
        assert!(!openai.supports_model("not-a-model"));
    }

    #[test]
    fn get_unknown_provider_is_none() {
        let registry = ProviderRegistry::builtin();
        assert!(registry.get("nope").is_none());
    }

    #[test]
    fn list_never_empty() {
        let registry = ProviderRegistry::builtin();
        assert!(!registry.list().is_empty());
    }

    #[test]
    fn embedding_capability() {
        let registry = ProviderRegistry::builtin();
        assert!(registry.get("openai").unwrap().has_embedding_models());
        assert!(!registry.get("anthropic").unwrap().has_embedding_models());
        assert!(registry
            .get("openai")
            .unwrap()
            .supports_embedding_model("text-embedding-3-small"));
    }

    struct FailingSource;

    impl DescriptorSource for FailingSource {
        fn load(&self) -> std::result::Result<Vec<ProviderDescriptor>, String> {
            Err("connection refused".to_string())
        }
        fn describe(&self) -> String {
            "failing-source".to_string()
        }
    }

    #[test]
    fn unreachable_source_falls_back_to_builtin() {
        let registry = ProviderRegistry::with_source(Box::new(FailingSource));
        assert!(!registry.list().is_empty());
        assert!(registry.get("openai").is_some());
        assert!(!registry.refresh());
        // still serving the fallback set after a failed refresh
        assert!(registry.get("openai").is_some());
    }

    struct StaticSource(Vec<ProviderDescriptor>);

    impl DescriptorSource for StaticSource {
        fn load(&self) -> std::result::Result<Vec<ProviderDescriptor>, String> {
            Ok(self.0.clone())
        }
        fn describe(&self) -> String {
            "static-source".to_string()
        }
    }

    #[test]
    fn source_replaces_builtin_table() {
        let custom = ProviderDescriptor {
            id: "local_llm".to_string(),
            display_name: "Local LLM".to_string(),
            family: ProviderFamily::BaseUrlOnly,
            wire: WireFormat::OpenAiChat,
            models: vec!["llama3".to_string()],
            embedding_models: vec![],
            default_base_url: Some("http://localhost:8080/v1".to_string()),
        };
        let registry = ProviderRegistry::with_source(Box::new(StaticSource(vec![custom])));
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("local_llm").is_some());
        assert!(registry.get("openai").is_none());
    }

    #[test]
    fn invalid_descriptors_are_skipped() {
        let bad = ProviderDescriptor {
            id: String::new(),
            display_name: "Broken".to_string(),
            family: ProviderFamily::SimpleApiKey,
            wire: WireFormat::OpenAiChat,
            models: vec!["m".to_string()],
            embedding_models: vec![],
            default_base_url: None,
        };
        let good = ProviderDescriptor {
            id: "ok".to_string(),
            display_name: "Ok".to_string(),
            family: ProviderFamily::SimpleApiKey,
            wire: WireFormat::OpenAiChat,
            models: vec!["m".to_string()],
            embedding_models: vec![],
            default_base_url: None,
        };
        let registry = ProviderRegistry::with_source(Box::new(StaticSource(vec![bad, good])));
        assert_eq!(registry.list().len(), 1);
        assert!(registry.get("ok").is_some());
    }

    #[test]
    fn toml_source_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[providers]]
id = "openai"
display_name = "OpenAI"
family = "simple_api_key"
wire = "openai_chat"
models = ["gpt-4o-mini"]
embedding_models = ["text-embedding-3-small"]
default_base_url = "https://api.openai.com/v1"

[[providers]]
id = "azure_openai"
display_name = "Azure OpenAI"
family = "endpoint_versioned"
wire = "azure_openai"
models = ["custom"]
"#
        )
        .unwrap();

        let source = TomlDescriptorSource::new(file.path());
        let descriptors = source.load().unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].id, "openai");
        assert_eq!(descriptors[1].family, ProviderFamily::EndpointVersioned);
        assert!(descriptors[1].accepts_any_model());
    }

    #[test]
    fn toml_source_missing_file_is_error() {
        let source = TomlDescriptorSource::new("/definitely/not/here.toml");
        assert!(source.load().is_err());
    }
}
