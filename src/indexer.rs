//! Index maintenance: load on startup, incremental sync, full rebuild.
//!
//! Incremental sync compares each document's text hash with the indexed
//! one and re-embeds only chunks whose hash changed; documents whose
//! files disappeared are removed. A full rebuild embeds everything into a
//! fresh snapshot and swaps it in once, so searches running meanwhile keep
//! using the old index.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use flipflops_core::index::{EmbeddingIndex, IndexEntry, IndexSnapshot};
use flipflops_core::models::Document;
use flipflops_core::FlipflopsError;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{embed_batched, Embedder};
use crate::ingest::ingest_directory;
use crate::store::DataStore;

/// Counts reported by `flipflops ingest`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct IngestReport {
    pub full: bool,
    pub documents: usize,
    pub unchanged: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub reused: usize,
    pub removed: usize,
    /// `(path, reason)` for every file that was skipped.
    pub skipped: Vec<(String, String)>,
}

impl IngestReport {
    pub fn print(&self) {
        println!("ingest{}", if self.full { " (full rebuild)" } else { "" });
        println!("  documents: {}", self.documents);
        println!("  unchanged: {}", self.unchanged);
        println!("  chunks: {}", self.chunks);
        println!("  embedded: {}", self.embedded);
        println!("  reused: {}", self.reused);
        println!("  removed: {}", self.removed);
        println!("  skipped: {}", self.skipped.len());
        for (path, reason) in &self.skipped {
            println!("    {}: {}", path, reason);
        }
        println!("ok");
    }
}

/// Whether a stored index can be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Ready,
    /// Nothing stored yet.
    Empty,
    /// Stored vectors are unusable with the current backend.
    NeedsRebuild,
}

/// Load the persisted index, checking it against the embedding backend
/// and the chunk size it has to be cut with.
pub fn open_index(
    store: &DataStore,
    embedder: &dyn Embedder,
    chunk_max_tokens: usize,
) -> Result<(EmbeddingIndex, IndexState)> {
    let fresh = || -> Result<EmbeddingIndex> {
        let snapshot = IndexSnapshot::new(Some(embedder.model_name().to_string()))
            .with_chunking(chunk_max_tokens);
        Ok(EmbeddingIndex::load(snapshot)?)
    };

    let snapshot = match store.load_index() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Ok((fresh()?, IndexState::Empty)),
        Err(e) => {
            warn!(error = %e, "stored index is unreadable");
            return Ok((fresh()?, IndexState::NeedsRebuild));
        }
    };

    if snapshot.model.as_deref() != Some(embedder.model_name()) {
        warn!(
            stored = ?snapshot.model,
            current = embedder.model_name(),
            "embedding model changed"
        );
        return Ok((fresh()?, IndexState::NeedsRebuild));
    }
    if snapshot.chunk_max_tokens != Some(chunk_max_tokens) {
        warn!(
            stored = ?snapshot.chunk_max_tokens,
            current = chunk_max_tokens,
            "chunk size changed"
        );
        return Ok((fresh()?, IndexState::NeedsRebuild));
    }
    if let Some(dims) = snapshot.dims {
        if dims != embedder.dims() {
            let e = FlipflopsError::DimensionMismatch {
                expected: dims,
                actual: embedder.dims(),
            };
            warn!(error = %e, "stored index is unusable");
            return Ok((fresh()?, IndexState::NeedsRebuild));
        }
    }
    match EmbeddingIndex::load(snapshot) {
        Ok(index) => Ok((index, IndexState::Ready)),
        Err(e) => {
            warn!(error = %e, "stored index is unusable");
            Ok((fresh()?, IndexState::NeedsRebuild))
        }
    }
}

pub struct Indexer {
    config: Arc<Config>,
    store: DataStore,
    embedder: Arc<dyn Embedder>,
    index: Arc<EmbeddingIndex>,
}

impl Indexer {
    pub fn new(
        config: Arc<Config>,
        store: DataStore,
        embedder: Arc<dyn Embedder>,
        index: Arc<EmbeddingIndex>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            index,
        }
    }

    /// Ingest the documents root into the index and persist it.
    pub async fn sync(&self, full: bool) -> Result<IngestReport> {
        let outcome = ingest_directory(&self.config)?;
        let mut report = IngestReport {
            full,
            ..IngestReport::default()
        };

        let mut seen: BTreeSet<String> = BTreeSet::new();
        for failure in &outcome.failures {
            if let FlipflopsError::DocumentUnreadable { path, reason } = failure {
                seen.insert(crate::ingest::document_id(path));
                report.skipped.push((path.clone(), reason.clone()));
            }
        }

        if full {
            self.rebuild(&outcome.documents, &mut report).await?;
        } else {
            let current = self.index.snapshot();
            for doc in &outcome.documents {
                seen.insert(doc.id.clone());
                if current.document(&doc.id).map(|d| d.hash.as_str()) == Some(doc.hash.as_str()) {
                    report.unchanged += 1;
                    report.documents += 1;
                    report.chunks += doc.chunks.len();
                    report.reused += doc.chunks.len();
                    continue;
                }
                match self.vectors_for(doc, Some(&current), &mut report).await {
                    Ok(vectors) => {
                        self.index.replace_document(doc, vectors)?;
                        report.documents += 1;
                        report.chunks += doc.chunks.len();
                        info!(path = %doc.source_path, chunks = doc.chunks.len(), "document indexed");
                    }
                    Err(e) => {
                        let stale = e
                            .downcast_ref::<FlipflopsError>()
                            .is_some_and(FlipflopsError::requires_rebuild);
                        if stale {
                            return Err(e.context(
                                "stored vectors do not match the embedding backend; run `flipflops ingest --reindex`",
                            ));
                        }
                        warn!(path = %doc.source_path, error = %e, "embedding failed, document skipped");
                        report.skipped.push((doc.source_path.clone(), e.to_string()));
                    }
                }
            }
            for id in current.documents.keys() {
                if !seen.contains(id) && self.index.remove_document(id) {
                    report.removed += 1;
                    info!(document = %id, "document removed");
                }
            }
        }

        self.store.save_index(&self.index.snapshot())?;
        Ok(report)
    }

    async fn rebuild(&self, documents: &[Document], report: &mut IngestReport) -> Result<()> {
        let previous = self.index.snapshot();
        let mut next = IndexSnapshot::new(Some(self.embedder.model_name().to_string()))
            .with_chunking(self.config.chunking.max_tokens);
        for doc in documents {
            match self.vectors_for(doc, None, report).await {
                Ok(vectors) => {
                    next.documents.insert(doc.id.clone(), doc.into());
                    for (chunk, vector) in doc.chunks.iter().cloned().zip(vectors) {
                        next.dims.get_or_insert(vector.len());
                        next.entries.insert(chunk.id.clone(), IndexEntry { chunk, vector });
                    }
                    report.documents += 1;
                    report.chunks += doc.chunks.len();
                }
                Err(e) => {
                    warn!(path = %doc.source_path, error = %e, "embedding failed, document skipped");
                    report.skipped.push((doc.source_path.clone(), e.to_string()));
                }
            }
        }
        report.removed = previous
            .documents
            .keys()
            .filter(|id| !next.documents.contains_key(*id))
            .count();
        self.index.rebuild(next)?;
        info!(documents = report.documents, chunks = report.chunks, "index rebuilt");
        Ok(())
    }

    /// Vectors for every chunk of `doc`, reusing stored vectors whose
    /// chunk hash still matches.
    async fn vectors_for(
        &self,
        doc: &Document,
        reuse_from: Option<&IndexSnapshot>,
        report: &mut IngestReport,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors: Vec<Option<Vec<f32>>> = doc
            .chunks
            .iter()
            .map(|chunk| {
                reuse_from
                    .and_then(|s| s.entries.get(&chunk.id))
                    .filter(|e| e.chunk.hash == chunk.hash)
                    .map(|e| e.vector.clone())
            })
            .collect();

        let missing: Vec<usize> = (0..vectors.len()).filter(|i| vectors[*i].is_none()).collect();
        let texts: Vec<String> = missing.iter().map(|i| doc.chunks[*i].text.clone()).collect();
        let fresh = if texts.is_empty() {
            Vec::new()
        } else {
            embed_batched(self.embedder.as_ref(), &texts, self.config.embedding.batch_size).await?
        };

        report.reused += vectors.len() - missing.len();
        report.embedded += fresh.len();
        for (i, vector) in missing.into_iter().zip(fresh) {
            vectors[i] = Some(vector);
        }
        Ok(vectors.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashBackend;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<Config>, DataStore) {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(Config::with_data_dir(tmp.path()));
        let store = DataStore::new(tmp.path());
        store.ensure_layout().unwrap();
        std::fs::create_dir_all(store.documents_dir().join("biologia")).unwrap();
        std::fs::write(
            store.documents_dir().join("biologia/celula.md"),
            "A célula é a unidade básica da vida.\n\nA mitocôndria produz energia.",
        )
        .unwrap();
        std::fs::write(store.documents_dir().join("historia.txt"), "O Império do Brasil.").unwrap();
        (tmp, config, store)
    }

    fn indexer(config: &Arc<Config>, store: &DataStore) -> (Indexer, Arc<EmbeddingIndex>) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashBackend::new(64));
        let (index, _) = open_index(store, embedder.as_ref(), config.chunking.max_tokens).unwrap();
        let index = Arc::new(index);
        (
            Indexer::new(config.clone(), store.clone(), embedder, index.clone()),
            index,
        )
    }

    #[tokio::test]
    async fn test_incremental_sync_reuses_vectors() {
        let (_tmp, config, store) = setup();
        let (indexer, index) = indexer(&config, &store);

        let first = indexer.sync(false).await.unwrap();
        assert_eq!(first.documents, 2);
        assert_eq!(first.embedded, first.chunks);
        let before = index.snapshot();

        let second = indexer.sync(false).await.unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(second.embedded, 0);
        assert_eq!(*index.snapshot(), *before);
    }

    #[tokio::test]
    async fn test_removed_files_leave_the_index() {
        let (_tmp, config, store) = setup();
        let (indexer, index) = indexer(&config, &store);
        indexer.sync(false).await.unwrap();

        std::fs::remove_file(store.documents_dir().join("historia.txt")).unwrap();
        let report = indexer.sync(false).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(index.snapshot().document_count(), 1);
    }

    #[tokio::test]
    async fn test_index_persists_and_reloads() {
        let (_tmp, config, store) = setup();
        let (indexer, index) = indexer(&config, &store);
        indexer.sync(false).await.unwrap();

        let embedder = HashBackend::new(64);
        let (reloaded, state) = open_index(&store, &embedder, config.chunking.max_tokens).unwrap();
        assert_eq!(state, IndexState::Ready);
        assert_eq!(*reloaded.snapshot(), *index.snapshot());
    }

    #[tokio::test]
    async fn test_dims_change_needs_rebuild() {
        let (_tmp, config, store) = setup();
        let (indexer, _) = indexer(&config, &store);
        indexer.sync(false).await.unwrap();

        let other = HashBackend::new(128);
        let (index, state) = open_index(&store, &other, config.chunking.max_tokens).unwrap();
        assert_eq!(state, IndexState::NeedsRebuild);
        assert!(index.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_full_rebuild_reembeds() {
        let (_tmp, config, store) = setup();
        let (indexer, index) = indexer(&config, &store);
        indexer.sync(false).await.unwrap();
        let chunks = index.snapshot().chunk_count();

        let report = indexer.sync(true).await.unwrap();
        assert!(report.full);
        assert_eq!(report.embedded, chunks);
        assert_eq!(report.reused, 0);
        assert_eq!(index.snapshot().chunk_count(), chunks);
    }

    #[tokio::test]
    async fn test_chunk_size_change_needs_rebuild() {
        let (_tmp, config, store) = setup();
        let (indexer, _) = indexer(&config, &store);
        indexer.sync(false).await.unwrap();
        assert_eq!(
            store.load_index().unwrap().unwrap().chunk_max_tokens,
            Some(config.chunking.max_tokens)
        );

        let embedder = HashBackend::new(64);
        let (_, state) = open_index(&store, &embedder, config.chunking.max_tokens).unwrap();
        assert_eq!(state, IndexState::Ready);

        let smaller = config.chunking.max_tokens / 2;
        let (index, state) = open_index(&store, &embedder, smaller).unwrap();
        assert_eq!(state, IndexState::NeedsRebuild);
        assert!(index.snapshot().is_empty());
        assert_eq!(index.snapshot().chunk_max_tokens, Some(smaller));
    }
}
