//! Retrieval-augmented generation over a vector index.
//!
//! One query is one pass: retrieve the top-k chunks, assemble them in rank
//! order into a context block, render the prompt template, and invoke the
//! chat handle with a single user message. Retrieval coming back empty is
//! not a failure — the template receives an explicit no-context marker and
//! the model is expected to say it cannot answer.

use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::factory::{ChatHandle, EmbeddingHandle};
use crate::index::{RetrievalResult, VectorIndex};
use crate::traits::ChatMessage;

/// Context block substituted when retrieval returns nothing.
pub const NO_CONTEXT_MARKER: &str = "No relevant context was found in the knowledge base.";

/// Default number of chunks retrieved per query.
pub const DEFAULT_TOP_K: usize = 4;

/// Prompt template with `{context}` and `{question}` slots.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
}

impl PromptTemplate {
    /// Create a template. Both slots must be present.
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for slot in ["{context}", "{question}"] {
            if !template.contains(slot) {
                return Err(LlmError::InvalidRequest(format!(
                    "prompt template is missing the {slot} slot"
                )));
            }
        }
        Ok(Self { template })
    }

    /// Fill both slots.
    pub fn render(&self, context: &str, question: &str) -> String {
        self.template
            .replace("{context}", context)
            .replace("{question}", question)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: "You are an assistant for question-answering tasks. \
                       Use the following pieces of retrieved context to answer the question. \
                       If you don't know the answer, just say that you don't know. \
                       Keep the answer concise.\n\n\
                       Context:\n{context}\n\n\
                       Question: {question}\n\n\
                       Answer:"
                .to_string(),
        }
    }
}

/// Tunables for the query engine.
#[derive(Debug, Clone)]
pub struct RagConfig {
    /// Chunks retrieved per query.
    pub top_k: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

/// A grounded answer plus the retrieval that produced it.
#[derive(Debug, Clone)]
pub struct RagAnswer {
    /// The generated answer text.
    pub text: String,

    /// The ranked chunks that were fed into the prompt.
    pub retrieval: RetrievalResult,
}

/// Orchestrates retrieve-then-generate for one question at a time.
#[derive(Debug, Clone, Default)]
pub struct RagEngine {
    config: RagConfig,
}

impl RagEngine {
    /// Create an engine with the given tunables.
    pub fn new(config: RagConfig) -> Self {
        Self { config }
    }

    /// Answer `question` against `index`.
    ///
    /// Generation failures carry the retrieval hits so callers can still
    /// show what was found. Answers are not cached here; identical queries
    /// go through the full pipeline every time.
    pub async fn answer(
        &self,
        index: &VectorIndex,
        question: &str,
        chat: &ChatHandle,
        embedder: &EmbeddingHandle,
        template: &PromptTemplate,
    ) -> Result<RagAnswer> {
        let retrieval = index.query(question, self.config.top_k, embedder).await?;

        let context = if retrieval.is_empty() {
            warn!("retrieval returned no chunks, answering with the no-context marker");
            NO_CONTEXT_MARKER.to_string()
        } else {
            debug!(hits = retrieval.hits.len(), "assembling context from retrieved chunks");
            retrieval
                .hits
                .iter()
                .map(|hit| hit.chunk.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let prompt = template.render(&context, question);
        match chat.invoke(&[ChatMessage::user(prompt)]).await {
            Ok(response) => Ok(RagAnswer {
                text: response.content,
                retrieval,
            }),
            Err(e) => Err(LlmError::Generation {
                provider: chat.provider_id().to_string(),
                message: e.to_string(),
                retrieved: retrieval.hits,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{ChatHandle, EmbeddingHandle, GenerationParams};
    use crate::index::{EmbedOptions, VectorIndex};
    use crate::providers::mock::{MockChatProvider, MockEmbeddingProvider};
    use crate::retry::RetryPolicy;
    use crate::traits::ChatRole;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn chunk_named(index: usize, content: &str) -> crate::chunker::DocumentChunk {
        crate::chunker::DocumentChunk {
            content: content.to_string(),
            source_id: "doc".to_string(),
            sequence_index: index,
            start_offset: 0,
            end_offset: content.len().max(1),
            metadata: HashMap::new(),
        }
    }

    fn chat_handle(mock: Arc<MockChatProvider>) -> ChatHandle {
        ChatHandle::from_client(
            "mock",
            "mock-model",
            GenerationParams::default(),
            mock,
            RetryPolicy::none(),
        )
    }

    fn embed_handle(mock: MockEmbeddingProvider) -> EmbeddingHandle {
        EmbeddingHandle::from_client("mock", "mock-embedding", Arc::new(mock), RetryPolicy::none())
    }

    #[test]
    fn template_requires_both_slots() {
        assert!(PromptTemplate::new("{context} {question}").is_ok());
        assert!(PromptTemplate::new("{context} only").is_err());
        assert!(PromptTemplate::new("{question} only").is_err());
    }

    #[test]
    fn template_renders_slots() {
        let template = PromptTemplate::new("C: {context} Q: {question}").unwrap();
        assert_eq!(template.render("ctx", "why?"), "C: ctx Q: why?");
    }

    #[tokio::test]
    async fn answer_assembles_context_in_rank_order() {
        let embedding = MockEmbeddingProvider::new(2)
            .with_vector("best chunk", vec![1.0, 0.0])
            .with_vector("second chunk", vec![0.8, 0.2])
            .with_vector("distant chunk", vec![0.0, 1.0])
            .with_vector("what is it?", vec![1.0, 0.0]);
        let embedder = embed_handle(embedding);

        let index = VectorIndex::build(
            vec![
                chunk_named(0, "distant chunk"),
                chunk_named(1, "best chunk"),
                chunk_named(2, "second chunk"),
            ],
            &embedder,
            &EmbedOptions::default(),
        )
        .await
        .unwrap();

        let chat = Arc::new(MockChatProvider::new());
        chat.push_response("the answer");
        let handle = chat_handle(chat.clone());

        let engine = RagEngine::new(RagConfig { top_k: 2 });
        let answer = engine
            .answer(&index, "what is it?", &handle, &embedder, &PromptTemplate::default())
            .await
            .unwrap();

        assert_eq!(answer.text, "the answer");
        assert_eq!(answer.retrieval.hits.len(), 2);

        let messages = chat.last_messages().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, ChatRole::User);
        let prompt = &messages[0].content;
        assert!(prompt.contains("best chunk\n\nsecond chunk"));
        assert!(prompt.contains("what is it?"));
        assert!(!prompt.contains("distant chunk"));
    }

    #[tokio::test]
    async fn empty_index_uses_no_context_marker_instead_of_failing() {
        let embedder = embed_handle(MockEmbeddingProvider::new(2));
        let index = VectorIndex::build(Vec::new(), &embedder, &EmbedOptions::default())
            .await
            .unwrap();

        let chat = Arc::new(MockChatProvider::new());
        chat.push_response("I cannot answer that from the provided documents.");
        let handle = chat_handle(chat.clone());

        let engine = RagEngine::default();
        let answer = engine
            .answer(&index, "anything?", &handle, &embedder, &PromptTemplate::default())
            .await
            .unwrap();

        assert_eq!(answer.text, "I cannot answer that from the provided documents.");
        assert!(answer.retrieval.is_empty());

        let prompt = &chat.last_messages().unwrap()[0].content;
        assert!(prompt.contains(NO_CONTEXT_MARKER));
    }

    #[tokio::test]
    async fn generation_failure_carries_retrieval_hits() {
        let embedding = MockEmbeddingProvider::new(2)
            .with_vector("relevant", vec![1.0, 0.0])
            .with_vector("q", vec![1.0, 0.0]);
        let embedder = embed_handle(embedding);

        let index = VectorIndex::build(
            vec![chunk_named(0, "relevant")],
            &embedder,
            &EmbedOptions::default(),
        )
        .await
        .unwrap();

        let chat = Arc::new(MockChatProvider::new());
        chat.push_failure(LlmError::Auth {
            provider: "mock".to_string(),
            message: "revoked".to_string(),
        });
        let handle = chat_handle(chat);

        let engine = RagEngine::default();
        let err = engine
            .answer(&index, "q", &handle, &embedder, &PromptTemplate::default())
            .await
            .unwrap_err();

        match err {
            LlmError::Generation {
                provider,
                retrieved,
                ..
            } => {
                assert_eq!(provider, "mock");
                assert_eq!(retrieved.len(), 1);
                assert_eq!(retrieved[0].chunk.content, "relevant");
            }
            other => panic!("expected Generation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retrieval_failure_propagates_directly() {
        let embedder_4 = embed_handle(MockEmbeddingProvider::new(4));
        let embedder_8 = embed_handle(MockEmbeddingProvider::new(8));

        let index = VectorIndex::build(
            vec![chunk_named(0, "text")],
            &embedder_4,
            &EmbedOptions::default(),
        )
        .await
        .unwrap();

        let chat = Arc::new(MockChatProvider::new());
        let handle = chat_handle(chat);

        let err = RagEngine::default()
            .answer(&index, "q", &handle, &embedder_8, &PromptTemplate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::DimensionMismatch { .. }));
    }
}
