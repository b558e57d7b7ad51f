//! Scholaris LLM - Provider Abstraction and Retrieval Pipeline
//!
//! This crate is the model-facing core of the Scholaris research assistant:
//! one uniform construction and invocation contract over a dozen-plus LLM
//! and embedding providers, plus the chunk-retrieve-generate pipeline that
//! turns plain-text documents into a queryable knowledge base.
//!
//! # Components
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Provider registry | [`registry`] | catalog of backends, credential shapes, wire protocols |
//! | Credential store | [`credentials`] | session-scoped secrets, completeness gate |
//! | Model factory | [`factory`] | validated construction of chat/embedding handles |
//! | Document chunker | [`chunker`] | deterministic overlap-aware splitting |
//! | Embedding index | [`index`] | batched embedding, cosine top-k retrieval |
//! | RAG engine | [`rag`] | retrieve, assemble context, generate |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scholaris_llm::{
//!     chunk, ChunkConfig, Credential, CredentialStore, EmbedOptions,
//!     GenerationParams, ModelFactory, PromptTemplate, ProviderRegistry,
//!     RagEngine, VectorIndex,
//! };
//!
//! let registry = Arc::new(ProviderRegistry::builtin());
//! let credentials = Arc::new(CredentialStore::new());
//! credentials.set("openai", Credential::from_pairs([("api_key", "sk-...")]));
//!
//! let factory = ModelFactory::new(registry, credentials);
//! let chat = factory.create_chat_model("openai", "gpt-4o-mini", GenerationParams::default())?;
//! let embedder = factory.create_embedding_model("openai", "text-embedding-3-small")?;
//!
//! let chunks = chunk("paper-1", &text, &ChunkConfig::default())?;
//! let index = VectorIndex::build(chunks, &embedder, &EmbedOptions::default()).await?;
//!
//! let engine = RagEngine::default();
//! let answer = engine
//!     .answer(&index, "What are the main findings?", &chat, &embedder, &PromptTemplate::default())
//!     .await?;
//! println!("{}", answer.text);
//! ```
//!
//! # Concurrency
//!
//! Handles are immutable and freely shareable across tasks. The registry
//! and credential store are read-mostly with serialized writes. Index
//! mutation is `&mut self`; queries are `&self` and may run concurrently.
//! Only construction is synchronous — everything provider-facing is async
//! and should run off any UI thread.

pub mod chunker;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod index;
pub mod providers;
pub mod rag;
pub mod registry;
pub mod retry;
pub mod traits;

pub use chunker::{chunk, default_separators, ChunkConfig, DocumentChunk};
pub use credentials::{Credential, CredentialStore};
pub use error::{LlmError, Result};
pub use factory::{ChatHandle, EmbeddingHandle, GenerationParams, ModelFactory};
pub use index::{
    cosine_similarity, EmbedOptions, RetrievalResult, ScoredChunk, VectorIndex,
};
pub use providers::{MockChatProvider, MockEmbeddingProvider};
pub use rag::{PromptTemplate, RagAnswer, RagConfig, RagEngine, NO_CONTEXT_MARKER};
pub use registry::{
    builtin_descriptors, CredentialField, DescriptorSource, ProviderDescriptor, ProviderFamily,
    ProviderRegistry, TomlDescriptorSource, WireFormat, MODELS_CUSTOM,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use traits::{
    ChatMessage, ChatRole, CompletionOptions, EmbeddingProvider, LLMProvider, LLMResponse,
};
