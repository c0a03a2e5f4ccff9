//! Startup wiring: build every component from a [`Config`].

use std::sync::Arc;

use anyhow::{Context, Result};
use flipflops_core::index::EmbeddingIndex;
use tracing::{info, warn};

use crate::config::Config;
use crate::context::ContextManager;
use crate::embedding::{create_embedder, Embedder};
use crate::indexer::{open_index, IndexState, Indexer, IngestReport};
use crate::model::{create_model, ResponseModel};
use crate::router::Router;
use crate::store::DataStore;

pub struct App {
    pub config: Arc<Config>,
    pub index: Arc<EmbeddingIndex>,
    pub indexer: Indexer,
    pub context: Arc<ContextManager>,
    pub router: Router,
    state: IndexState,
}

impl App {
    /// Build with the embedding backend and model named in `config`.
    pub fn build(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_model(&config.model)?;
        Self::build_with(config, embedder, model)
    }

    /// Build with explicit backends.
    pub fn build_with(
        config: Config,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ResponseModel>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let store = DataStore::new(&config.data.dir);
        store
            .ensure_layout()
            .with_context(|| format!("Failed to prepare data dir {}", config.data.dir.display()))?;

        let (index, state) = open_index(&store, embedder.as_ref(), config.chunking.max_tokens)?;
        let index = Arc::new(index);
        let indexer = Indexer::new(config.clone(), store.clone(), embedder.clone(), index.clone());
        let context = Arc::new(ContextManager::new(
            store.clone(),
            &config.session.user_level,
        ));
        let router = Router::new(
            config.clone(),
            index.clone(),
            embedder,
            model,
            context.clone(),
        );
        info!(
            documents = index.snapshot().document_count(),
            chunks = index.snapshot().chunk_count(),
            ?state,
            "index opened"
        );

        Ok(Self {
            config,
            index,
            indexer,
            context,
            router,
            state,
        })
    }

    /// Sync the index with the documents root and refresh topics.
    pub async fn ingest(&mut self, full: bool) -> Result<IngestReport> {
        let report = self.indexer.sync(full || self.state == IndexState::NeedsRebuild).await?;
        self.state = IndexState::Ready;
        self.context.refresh_ingestion_topics(&self.index.snapshot())?;
        Ok(report)
    }

    /// Make the index usable before a chat: rebuild it if stored vectors
    /// cannot be used, otherwise sync only when `reindex` is asked for.
    pub async fn prepare(&mut self, reindex: bool) -> Result<()> {
        match (self.state, reindex) {
            (IndexState::NeedsRebuild, _) => {
                warn!("stored index is stale, rebuilding");
                self.ingest(true).await?;
            }
            (_, true) => {
                self.ingest(true).await?;
            }
            (IndexState::Empty, false) => {
                if self.config.documents_root().exists() {
                    self.ingest(false).await?;
                }
            }
            (IndexState::Ready, false) => {}
        }
        Ok(())
    }
}
