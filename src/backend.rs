//! The single owner of document, index and pipeline state.
//!
//! A [`Backend`] is moved into the worker task by
//! [`TaskRunner::spawn`](crate::worker::TaskRunner::spawn) and mutated only
//! there. The CLI never touches it directly while a runner is alive.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::chain::ChainCache;
use crate::config::{Config, Settings};
use crate::documents::DocumentStore;
use crate::embedding::create_provider;
use crate::error::{Error, ErrorKind, Result};
use crate::extract::ExtractorRegistry;
use crate::index_manager::IndexManager;
use crate::llm::{list_models, OllamaConnector};
use crate::models::EnsureReport;

pub struct Backend {
    store: DocumentStore,
    indexes: IndexManager,
    chains: ChainCache,
    settings: Settings,
    llm_timeout: Duration,
}

impl Backend {
    pub fn new(
        store: DocumentStore,
        indexes: IndexManager,
        chains: ChainCache,
        settings: Settings,
    ) -> Self {
        Self {
            store,
            indexes,
            chains,
            settings,
            llm_timeout: Duration::from_secs(10),
        }
    }

    /// Wire up the stock providers from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = DocumentStore::new(&config.documents)?;
        let embedder = create_provider(&config.embedding)?;
        let indexes = IndexManager::from_config(config, ExtractorRegistry::default(), embedder);
        let llm_timeout = Duration::from_secs(config.llm.timeout_secs);
        let chains = ChainCache::new(
            Arc::new(OllamaConnector::new(llm_timeout)),
            config.retrieval.top_k,
        );
        let mut backend = Self::new(store, indexes, chains, config.settings());
        backend.llm_timeout = llm_timeout;
        Ok(backend)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn indexes(&self) -> &IndexManager {
        &self.indexes
    }

    pub fn chains(&self) -> &ChainCache {
        &self.chains
    }

    /// Replace the active settings. An endpoint change clears every cached
    /// pipeline before the next question is answered.
    pub fn apply_settings(&mut self, settings: Settings) {
        if settings.endpoint_url != self.settings.endpoint_url {
            info!("endpoint set to {}", settings.endpoint_url);
            self.chains.set_endpoint(&settings.endpoint_url);
        }
        self.settings = settings;
    }

    pub fn list_documents(&self) -> Result<Vec<String>> {
        self.store.names()
    }

    /// Index every document in the folder.
    ///
    /// Per-document failures are reported, not raised, unless every
    /// document failed.
    pub async fn setup(&mut self, mut status: impl FnMut(String)) -> Result<EnsureReport> {
        let documents = self.store.list()?;
        if documents.is_empty() {
            status(format!(
                "no documents found in {}",
                self.store.folder().display()
            ));
            return Ok(EnsureReport::default());
        }

        status(format!("Preparing {} document(s)", documents.len()));
        let report = self.indexes.ensure_all_with(&documents, &mut status).await;
        status(report.summary());
        all_failed(&report)?;
        Ok(report)
    }

    /// Answer `question` from `document`, using `model` or the configured one.
    pub async fn ask(
        &mut self,
        question: &str,
        document: &str,
        model: Option<&str>,
    ) -> Result<String> {
        let model = model
            .map(str::to_string)
            .unwrap_or_else(|| self.settings.model.clone());
        let endpoint = self.settings.endpoint_url.clone();
        let pipeline = self
            .chains
            .get(&mut self.indexes, document, &model, &endpoint)
            .await?;
        pipeline.answer(question).await
    }

    /// Remove a document's pipeline, index and source file.
    pub async fn delete_document(&mut self, name: &str) -> Result<()> {
        self.chains.evict(name);
        let source = match self.store.resolve(name) {
            Ok(doc) => Some(doc.path),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        self.indexes.delete(name, source.as_deref()).await
    }

    /// Copy a file into the documents folder and index it.
    pub async fn import(
        &mut self,
        path: &Path,
        mut status: impl FnMut(String),
    ) -> Result<EnsureReport> {
        let doc = self.store.import(path)?;
        status(format!("Added {}", doc.path.display()));
        let report = self
            .indexes
            .ensure_all_with(std::slice::from_ref(&doc), &mut status)
            .await;
        all_failed(&report)?;
        Ok(report)
    }

    /// Models offered by the active endpoint.
    pub async fn models(&self) -> Result<Vec<String>> {
        list_models(&self.settings.endpoint_url, self.llm_timeout).await
    }
}

fn all_failed(report: &EnsureReport) -> Result<()> {
    if report.total() == 0 || report.failed.len() < report.total() {
        return Ok(());
    }
    let first = &report.failed[0];
    let message = format!("every document failed to index\n{}", report.summary());
    Err(match first.kind {
        ErrorKind::NotFound => Error::NotFound(message),
        ErrorKind::ExtractionFailure => Error::Extraction {
            document: first.name.clone(),
            message,
        },
        ErrorKind::ProviderFailure => Error::Provider(message),
        ErrorKind::StorageFailure => Error::Storage(message),
        ErrorKind::Config => Error::Config(message),
    })
}
