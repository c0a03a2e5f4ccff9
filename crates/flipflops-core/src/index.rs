//! In-memory embedding index with copy-then-swap snapshots.
//!
//! The current state is an immutable [`IndexSnapshot`] behind an
//! `RwLock<Arc<_>>`. Readers clone the `Arc` and search without holding
//! any lock. Writers serialize on a separate mutex, build a modified copy
//! of the snapshot, validate it, and publish it with one short write-lock.
//! A failed write leaves the published snapshot untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{FlipflopsError, Result};
use crate::models::{Chunk, ChunkRef, Document};
use crate::topics::{TopicCatalog, TopicOrigin};

/// Document metadata kept alongside the vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub id: String,
    pub title: String,
    pub source_path: String,
    pub topic: Option<String>,
    /// SHA-256 of the document text at indexing time.
    pub hash: String,
}

impl From<&Document> for DocumentEntry {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            source_path: doc.source_path.clone(),
            topic: doc.topic.clone(),
            hash: doc.hash.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A retrieved chunk with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub position: usize,
    pub text: String,
    pub score: f32,
}

impl SearchHit {
    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef {
            chunk_id: self.chunk_id.clone(),
            document_id: self.document_id.clone(),
            score: self.score,
        }
    }
}

/// One immutable version of the index. This is also the on-disk format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Embedding model that produced the vectors.
    #[serde(default)]
    pub model: Option<String>,
    /// Shared dimensionality; `None` while the index is empty.
    #[serde(default)]
    pub dims: Option<usize>,
    /// `chunking.max_tokens` the chunks were cut with.
    #[serde(default)]
    pub chunk_max_tokens: Option<usize>,
    #[serde(default)]
    pub documents: BTreeMap<String, DocumentEntry>,
    #[serde(default)]
    pub entries: BTreeMap<String, IndexEntry>,
}

impl IndexSnapshot {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    pub fn with_chunking(mut self, max_tokens: usize) -> Self {
        self.chunk_max_tokens = Some(max_tokens);
        self
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn document(&self, id: &str) -> Option<&DocumentEntry> {
        self.documents.get(id)
    }

    /// Check that every vector has the same length as `dims`.
    pub fn validate(&self) -> Result<()> {
        let Some(expected) = self.dims else {
            return Ok(());
        };
        for entry in self.entries.values() {
            if entry.vector.len() != expected {
                return Err(FlipflopsError::DimensionMismatch {
                    expected,
                    actual: entry.vector.len(),
                });
            }
        }
        Ok(())
    }

    /// Top-`k` chunks by cosine similarity.
    ///
    /// Order is score descending, then chunk id ascending. Hits below
    /// `min_score` are dropped. With `scope`, only chunks of those
    /// documents are considered.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        scope: Option<&BTreeSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        if let Some(expected) = self.dims {
            if query.len() != expected {
                return Err(FlipflopsError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .filter(|e| scope.map_or(true, |s| s.contains(&e.chunk.document_id)))
            .map(|e| SearchHit {
                chunk_id: e.chunk.id.clone(),
                document_id: e.chunk.document_id.clone(),
                position: e.chunk.position,
                text: e.chunk.text.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .filter(|h| h.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Ingestion topics derived from document labels.
    pub fn topics(&self) -> TopicCatalog {
        let mut catalog = TopicCatalog::new();
        for doc in self.documents.values() {
            let label = doc.topic.as_deref().unwrap_or(&doc.title);
            let chunk_ids = self
                .entries
                .values()
                .filter(|e| e.chunk.document_id == doc.id)
                .map(|e| e.chunk.id.clone());
            catalog.add(label, TopicOrigin::Ingestion, Some(&doc.id), chunk_ids);
        }
        catalog
    }

    /// Document ids whose topic label matches `label`.
    pub fn documents_for_topic(&self, label: &str) -> BTreeSet<String> {
        self.topics()
            .get(label)
            .map(|t| t.documents.clone())
            .unwrap_or_default()
    }

    fn check_dims(&self, vectors: &[Vec<f32>]) -> Result<Option<usize>> {
        let mut dims = self.dims;
        for v in vectors {
            match dims {
                Some(expected) if v.len() != expected => {
                    return Err(FlipflopsError::DimensionMismatch {
                        expected,
                        actual: v.len(),
                    });
                }
                None => dims = Some(v.len()),
                _ => {}
            }
        }
        Ok(dims)
    }

    fn without_document(&mut self, document_id: &str) {
        self.documents.remove(document_id);
        self.entries.retain(|_, e| e.chunk.document_id != document_id);
        if self.entries.is_empty() {
            self.dims = None;
        }
    }
}

/// Shared, concurrently readable embedding index.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl EmbeddingIndex {
    pub fn new(model: Option<String>) -> Self {
        Self::from_snapshot(IndexSnapshot::new(model))
    }

    /// Wrap a loaded snapshot. Fails if its vectors disagree on dims.
    pub fn load(snapshot: IndexSnapshot) -> Result<Self> {
        snapshot.validate()?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn publish(&self, next: IndexSnapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(next);
    }

    /// Apply `edit` to a copy of the current snapshot and swap it in if
    /// it succeeds.
    fn update<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut IndexSnapshot) -> Result<()>,
    {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = (*self.snapshot()).clone();
        edit(&mut next)?;
        self.publish(next);
        Ok(())
    }

    /// Add chunks with their vectors. Existing chunk ids are overwritten.
    pub fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.update(|next| {
            let vectors: Vec<Vec<f32>> = entries.iter().map(|e| e.vector.clone()).collect();
            next.dims = next.check_dims(&vectors)?;
            for entry in entries {
                next.entries.insert(entry.chunk.id.clone(), entry);
            }
            Ok(())
        })
    }

    /// Replace all chunks of a document in one swap. `vectors[i]` belongs
    /// to `doc.chunks[i]`.
    pub fn replace_document(&self, doc: &Document, vectors: Vec<Vec<f32>>) -> Result<()> {
        if vectors.len() != doc.chunks.len() {
            return Err(FlipflopsError::InvalidArgument(format!(
                "document {} has {} chunks but {} vectors",
                doc.id,
                doc.chunks.len(),
                vectors.len()
            )));
        }
        self.update(|next| {
            next.without_document(&doc.id);
            next.dims = next.check_dims(&vectors)?;
            next.documents.insert(doc.id.clone(), DocumentEntry::from(doc));
            for (chunk, vector) in doc.chunks.iter().cloned().zip(vectors) {
                next.entries
                    .insert(chunk.id.clone(), IndexEntry { chunk, vector });
            }
            Ok(())
        })
    }

    /// Drop a document and its chunks. Returns whether it was present.
    pub fn remove_document(&self, document_id: &str) -> bool {
        let mut removed = false;
        let _ = self.update(|next| {
            removed = next.documents.contains_key(document_id);
            next.without_document(document_id);
            Ok(())
        });
        removed
    }

    /// Swap in a fully built snapshot, discarding the current one.
    pub fn rebuild(&self, snapshot: IndexSnapshot) -> Result<()> {
        snapshot.validate()?;
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        self.publish(snapshot);
        Ok(())
    }

    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: f32,
        scope: Option<&BTreeSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        self.snapshot().search(query, k, min_score, scope)
    }
}
