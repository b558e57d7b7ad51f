//! Scripted mock providers for deterministic tests.
//!
//! [`MockChatProvider`] replays a queue of responses or failures and records
//! every conversation it receives, which lets tests assert on the exact
//! prompt the pipeline rendered. [`MockEmbeddingProvider`] returns fixed
//! vectors for known texts and a deterministic pseudo-vector otherwise, so
//! retrieval ranking in tests is fully predictable.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{LlmError, Result};
use crate::traits::{
    ChatMessage, CompletionOptions, EmbeddingProvider, LLMProvider, LLMResponse,
};

/// Queue-driven chat mock.
#[derive(Debug, Default)]
pub struct MockChatProvider {
    responses: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
    conversations: Mutex<Vec<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl MockChatProvider {
    /// Create a mock with an empty queue. With nothing queued, every call
    /// answers `"Mock response"`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful response.
    pub fn push_response(&self, content: impl Into<String>) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Ok(content.into()));
    }

    /// Queue a failure.
    pub fn push_failure(&self, error: LlmError) {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .push_back(Err(error));
    }

    /// Number of chat calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The messages of the most recent chat call.
    pub fn last_messages(&self) -> Option<Vec<ChatMessage>> {
        self.conversations
            .lock()
            .expect("mock lock poisoned")
            .last()
            .cloned()
    }

    fn next(&self) -> std::result::Result<String, LlmError> {
        self.responses
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Ok("Mock response".to_string()))
    }
}

#[async_trait]
impl LLMProvider for MockChatProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn max_context_length(&self) -> usize {
        4096
    }

    async fn complete_with_options(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<LLMResponse> {
        self.chat(&[ChatMessage::user(prompt)], Some(options)).await
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .expect("mock lock poisoned")
            .push(messages.to_vec());

        let content = self.next()?;
        let prompt_len: usize = messages.iter().map(|m| m.content.len() / 4).sum();
        Ok(LLMResponse::new(content.clone(), "mock-model")
            .with_usage(prompt_len, content.len() / 4)
            .with_finish_reason("stop"))
    }

    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        options: Option<&CompletionOptions>,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let response = self.chat(messages, options).await?;
        Ok(futures::stream::iter(vec![Ok(response.content)]).boxed())
    }

    fn supports_streaming(&self) -> bool {
        true
    }
}

/// Deterministic embedding mock.
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    fixed: Mutex<HashMap<String, Vec<f32>>>,
    script: Mutex<VecDeque<Option<LlmError>>>,
    calls: AtomicUsize,
}

impl MockEmbeddingProvider {
    /// Create a mock producing vectors of `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Pin the vector returned for an exact text.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed
            .lock()
            .expect("mock lock poisoned")
            .insert(text.into(), vector);
        self
    }

    /// Queue a failure for the next unscripted embed call.
    pub fn fail_next(&self, error: LlmError) {
        self.script
            .lock()
            .expect("mock lock poisoned")
            .push_back(Some(error));
    }

    /// Queue an explicit success, letting a later [`Self::fail_next`] hit a
    /// specific call in a sequence.
    pub fn succeed_next(&self) {
        self.script.lock().expect("mock lock poisoned").push_back(None);
    }

    /// Number of embed calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.fixed.lock().expect("mock lock poisoned").get(text) {
            return v.clone();
        }
        // Deterministic pseudo-vector derived from the text bytes.
        let seed = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        (0..self.dimension)
            .map(|i| {
                let x = seed.wrapping_mul(i as u64 + 1).wrapping_add(17) % 1000;
                x as f32 / 1000.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_tokens(&self) -> usize {
        8192
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(err)) = self.script.lock().expect("mock lock poisoned").pop_front() {
            return Err(err);
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}
