//! In-memory vector index over chunk embeddings.
//!
//! An index is built once from a set of chunks, extended incrementally, and
//! queried by cosine similarity. Every vector in one index shares the
//! dimension of the embedding model that built it; a query through a
//! different-dimension model is rejected before any network call.
//!
//! Mutation (`build`, `add_documents`, `remove_source`) takes `&mut self`
//! and queries take `&self`, so the borrow checker enforces the
//! writer-exclusive / concurrent-reader contract; callers that share an
//! index across tasks wrap it in an `RwLock` or swap immutable snapshots.

use futures::StreamExt;
use tracing::{debug, warn};

use crate::chunker::DocumentChunk;
use crate::error::{LlmError, Result};
use crate::factory::EmbeddingHandle;

/// Batching and concurrency knobs for embedding calls.
///
/// `concurrency` caps in-flight requests so callers can respect provider
/// rate limits; backoff beyond the invocation-path retry is the caller's
/// concern.
#[derive(Debug, Clone)]
pub struct EmbedOptions {
    /// Texts per embedding request.
    pub batch_size: usize,

    /// Concurrent embedding requests in flight.
    pub concurrency: usize,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            concurrency: 4,
        }
    }
}

/// A chunk with its similarity score for one query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The retrieved chunk.
    pub chunk: DocumentChunk,

    /// Cosine similarity against the query, in `[-1, 1]`.
    pub score: f32,
}

/// Ranked retrieval output for one query.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Hits in non-increasing score order; at most `requested_k` entries.
    pub hits: Vec<ScoredChunk>,

    /// The `k` the caller asked for.
    pub requested_k: usize,
}

impl RetrievalResult {
    /// Whether no chunk matched (empty index or k = 0).
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    chunk: DocumentChunk,
    vector: Vec<f32>,
}

/// Vector index over embedded chunks.
#[derive(Debug)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
    model: String,
}

impl VectorIndex {
    /// Embed `chunks` and build an index.
    ///
    /// All-or-nothing: a failed batch fails the whole build with an
    /// `Embedding` error reporting how many chunks were already in.
    pub async fn build(
        chunks: Vec<DocumentChunk>,
        embedder: &EmbeddingHandle,
        options: &EmbedOptions,
    ) -> Result<Self> {
        let mut index = Self {
            entries: Vec::with_capacity(chunks.len()),
            dimension: embedder.dimension(),
            model: embedder.model_id().to_string(),
        };
        index.embed_into(chunks, embedder, options).await?;
        debug!(entries = index.len(), dimension = index.dimension, "index built");
        Ok(index)
    }

    /// Extend the index with new chunks.
    ///
    /// Chunks already present (same source id and sequence index) are
    /// skipped rather than re-embedded. Returns the number added.
    pub async fn add_documents(
        &mut self,
        chunks: Vec<DocumentChunk>,
        embedder: &EmbeddingHandle,
        options: &EmbedOptions,
    ) -> Result<usize> {
        if embedder.dimension() != self.dimension {
            return Err(LlmError::DimensionMismatch {
                expected: self.dimension,
                got: embedder.dimension(),
            });
        }

        let existing: std::collections::HashSet<String> =
            self.entries.iter().map(|e| e.chunk.chunk_id()).collect();
        let fresh: Vec<DocumentChunk> = chunks
            .into_iter()
            .filter(|c| !existing.contains(&c.chunk_id()))
            .collect();

        let added = fresh.len();
        self.embed_into(fresh, embedder, options).await?;
        Ok(added)
    }

    /// Drop every chunk belonging to `source_id`. Returns the number removed.
    pub fn remove_source(&mut self, source_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.chunk.source_id != source_id);
        before - self.entries.len()
    }

    /// Retrieve the `k` most similar chunks for `query_text`.
    ///
    /// The embedding handle must produce the same dimension the index was
    /// built with. Ties break by insertion order, so identical scores are
    /// returned deterministically.
    pub async fn query(
        &self,
        query_text: &str,
        k: usize,
        embedder: &EmbeddingHandle,
    ) -> Result<RetrievalResult> {
        if embedder.dimension() != self.dimension {
            return Err(LlmError::DimensionMismatch {
                expected: self.dimension,
                got: embedder.dimension(),
            });
        }

        if k == 0 || self.entries.is_empty() {
            return Ok(RetrievalResult {
                hits: Vec::new(),
                requested_k: k,
            });
        }

        let query_vector = embedder.embed_one(query_text).await?;
        if query_vector.len() != self.dimension {
            return Err(LlmError::DimensionMismatch {
                expected: self.dimension,
                got: query_vector.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&query_vector, &entry.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(RetrievalResult {
            hits: scored
                .into_iter()
                .map(|(i, score)| ScoredChunk {
                    chunk: self.entries[i].chunk.clone(),
                    score,
                })
                .collect(),
            requested_k: k,
        })
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vector dimension shared by every entry.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The embedding model the index was built with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed chunks in batches with bounded concurrency and append them.
    async fn embed_into(
        &mut self,
        chunks: Vec<DocumentChunk>,
        embedder: &EmbeddingHandle,
        options: &EmbedOptions,
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let batch_size = options.batch_size.max(1);
        let concurrency = options.concurrency.max(1);
        let batches: Vec<Vec<DocumentChunk>> =
            chunks.chunks(batch_size).map(|b| b.to_vec()).collect();

        let mut embedded = 0usize;
        let mut stream = futures::stream::iter(batches.into_iter().map(|batch| {
            let embedder = embedder.clone();
            async move {
                let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
                let vectors = embedder.embed(&texts).await?;
                Ok::<_, LlmError>((batch, vectors))
            }
        }))
        .buffered(concurrency);

        while let Some(result) = stream.next().await {
            let (batch, vectors) = result.map_err(|e| {
                warn!(embedded, error = %e, "embedding batch failed, aborting build");
                LlmError::Embedding {
                    provider: embedder.provider_id().to_string(),
                    embedded,
                    message: e.to_string(),
                }
            })?;

            if vectors.len() != batch.len() {
                return Err(LlmError::Embedding {
                    provider: embedder.provider_id().to_string(),
                    embedded,
                    message: format!(
                        "expected {} vectors, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                });
            }

            for (chunk, vector) in batch.into_iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(LlmError::Embedding {
                        provider: embedder.provider_id().to_string(),
                        embedded,
                        message: format!(
                            "model produced a {}-dimension vector in a {}-dimension index",
                            vector.len(),
                            self.dimension
                        ),
                    });
                }
                self.entries.push(IndexEntry { chunk, vector });
                embedded += 1;
            }
        }

        Ok(())
    }
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 for empty, mismatched-length, or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
