//! Per-document index lifecycle: build, load, and delete.
//!
//! The [`IndexManager`] owns the index root directory and the set of indexes
//! currently loaded in memory. On-disk presence of a document's storage
//! directory is what makes a document "indexed"; the in-memory map is only a
//! cache over it and is never consulted by [`IndexManager::exists`].
//!
//! # Build pipeline
//!
//! ```text
//! Document ─► extract ─► chunk_text ─► embed ─► VectorIndex ─► persist
//! ```
//!
//! Extraction and disk I/O run on the blocking pool. Each document is handled
//! independently: a failure is recorded in the [`EnsureReport`] and the pass
//! moves on to the next document.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::extract::ExtractorRegistry;
use crate::models::{Document, EnsureReport, FailedDocument};
use crate::vector_index::{sweep_staging, VectorIndex};

type StorageRemover = Arc<dyn Fn(&Path) -> std::io::Result<()> + Send + Sync>;

/// Filesystem-safe storage key for a document name.
///
/// Keeps alphanumerics, space, underscore and hyphen, drops everything else,
/// then trims trailing whitespace.
pub fn sanitize_name(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    kept.trim_end().to_string()
}

pub struct IndexManager {
    root: PathBuf,
    extractors: ExtractorRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    retry_delay: Duration,
    loaded: HashMap<String, Arc<VectorIndex>>,
    remove_storage: StorageRemover,
    builds: usize,
}

impl IndexManager {
    pub fn new(
        root: impl Into<PathBuf>,
        extractors: ExtractorRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        retry_delay: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            extractors,
            embedder,
            chunking,
            retry_delay,
            loaded: HashMap::new(),
            remove_storage: Arc::new(|path: &Path| std::fs::remove_dir_all(path)),
            builds: 0,
        }
    }

    pub fn from_config(
        config: &Config,
        extractors: ExtractorRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self::new(
            config.index.path.clone(),
            extractors,
            embedder,
            config.chunking.clone(),
            Duration::from_millis(config.index.delete_retry_delay_ms),
        )
    }

    #[cfg(test)]
    fn with_storage_remover(mut self, remover: StorageRemover) -> Self {
        self.remove_storage = remover;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        self.embedder.clone()
    }

    /// Number of indexes built (not loaded) over this manager's lifetime.
    pub fn builds_performed(&self) -> usize {
        self.builds
    }

    pub fn storage_path(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_name(name))
    }

    /// Whether the document's index is present in storage.
    pub fn exists(&self, name: &str) -> bool {
        !sanitize_name(name).is_empty() && self.storage_path(name).is_dir()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub async fn ensure_all(&mut self, documents: &[Document]) -> EnsureReport {
        self.ensure_all_with(documents, |_| {}).await
    }

    /// Load or build an index for every document.
    ///
    /// `progress` receives one line per document before it is processed.
    pub async fn ensure_all_with(
        &mut self,
        documents: &[Document],
        mut progress: impl FnMut(String),
    ) -> EnsureReport {
        let mut report = EnsureReport::default();
        let total = documents.len();

        let swept = sweep_staging(&self.root);
        if swept > 0 {
            info!("removed {} interrupted build(s) from {}", swept, self.root.display());
        }

        for (i, doc) in documents.iter().enumerate() {
            if self.loaded.contains_key(&doc.name) {
                if self.exists(&doc.name) {
                    report.loaded.push(doc.name.clone());
                    continue;
                }
                warn!("index storage for {} is gone, rebuilding", doc.name);
                self.evict(&doc.name);
            }

            if self.exists(&doc.name) {
                progress(format!("Loading {} ({}/{})", doc.name, i + 1, total));
                match self.load(&doc.name).await {
                    Ok(_) => report.loaded.push(doc.name.clone()),
                    Err(e) => {
                        warn!("failed to load index for {}: {}", doc.name, e);
                        report.failed.push(FailedDocument::new(&doc.name, &e));
                    }
                }
                continue;
            }

            progress(format!("Indexing {} ({}/{})", doc.name, i + 1, total));
            match self.build(doc).await {
                Ok(index) => {
                    info!("indexed {} ({} chunks)", doc.name, index.len());
                    self.loaded.insert(doc.name.clone(), index);
                    self.builds += 1;
                    report.built.push(doc.name.clone());
                }
                Err(e) => {
                    warn!("failed to index {}: {}", doc.name, e);
                    report.failed.push(FailedDocument::new(&doc.name, &e));
                }
            }
        }

        report
    }

    /// The document's index, loading it from storage if needed.
    ///
    /// Storage is checked first: a handle whose storage has disappeared is
    /// dropped and the document reported as not found.
    pub async fn get_or_load(&mut self, name: &str) -> Result<Arc<VectorIndex>> {
        if !self.exists(name) {
            self.evict(name);
            return Err(Error::NotFound(format!("no index for document '{}'", name)));
        }
        if let Some(index) = self.loaded.get(name) {
            return Ok(index.clone());
        }
        self.load(name).await
    }

    /// Drop the in-memory handle; storage is untouched.
    pub fn evict(&mut self, name: &str) -> bool {
        self.loaded.remove(name).is_some()
    }

    /// Remove a document's index storage and its source file.
    ///
    /// Storage removal is retried once after the configured delay. The source
    /// file is removed even when both attempts fail, and the storage error is
    /// returned afterwards. Storage whose manifest names another document is
    /// left alone.
    pub async fn delete(&mut self, name: &str, source: Option<&Path>) -> Result<()> {
        // Release our handle before touching storage.
        self.evict(name);

        let storage = self.storage_path(name);
        let had_storage = self.exists(name)
            && match VectorIndex::stored_document(&storage) {
                Some(owner) if owner != name => {
                    warn!(
                        "not removing {}: it holds the index of '{}'",
                        storage.display(),
                        owner
                    );
                    false
                }
                _ => true,
            };
        let had_source = source.is_some_and(|p| p.exists());
        if !had_storage && !had_source {
            return Err(Error::NotFound(format!("document '{}'", name)));
        }

        let storage_result = if had_storage {
            self.remove_storage_with_retry(&storage).await
        } else {
            Ok(())
        };

        if let Some(path) = source.filter(|_| had_source) {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || remove_file_if_present(&path))
                .await
                .map_err(|e| Error::Storage(e.to_string()))??;
        }

        storage_result?;
        info!("deleted {}", name);
        Ok(())
    }

    async fn remove_storage_with_retry(&self, storage: &Path) -> Result<()> {
        match self.remove_blocking(storage).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => warn!(
                "removing {} failed ({}), retrying in {:?}",
                storage.display(),
                e,
                self.retry_delay
            ),
        }

        tokio::time::sleep(self.retry_delay).await;
        match self.remove_blocking(storage).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "cannot remove {}: {}",
                storage.display(),
                e
            ))),
        }
    }

    async fn remove_blocking(&self, storage: &Path) -> std::io::Result<()> {
        let remover = self.remove_storage.clone();
        let storage = storage.to_path_buf();
        tokio::task::spawn_blocking(move || remover(&storage))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn load(&mut self, name: &str) -> Result<Arc<VectorIndex>> {
        let dir = self.storage_path(name);
        let index = tokio::task::spawn_blocking(move || VectorIndex::load(&dir))
            .await
            .map_err(|e| Error::Storage(e.to_string()))??;

        if index.document() != name {
            return Err(Error::Storage(format!(
                "storage for '{}' holds the index of '{}'",
                name,
                index.document()
            )));
        }
        if index.embedding_model() != self.embedder.model_name() {
            warn!(
                "index for {} was built with {}, current embedding model is {}",
                name,
                index.embedding_model(),
                self.embedder.model_name()
            );
        }

        debug!("loaded index for {} ({} chunks)", name, index.len());
        let index = Arc::new(index);
        self.loaded.insert(name.to_string(), index.clone());
        Ok(index)
    }

    async fn build(&self, doc: &Document) -> Result<Arc<VectorIndex>> {
        if sanitize_name(&doc.name).is_empty() {
            return Err(Error::Storage(format!(
                "cannot derive a storage name from '{}'",
                doc.name
            )));
        }

        let extractors = self.extractors.clone();
        let owned = doc.clone();
        let text = tokio::task::spawn_blocking(move || extractors.extract(&owned))
            .await
            .map_err(|e| {
                Error::extraction(&doc.name, format!("extractor crashed: {}", e))
            })??;

        let chunks = chunk_text(&text, self.chunking.chunk_size, self.chunking.chunk_overlap);
        debug!("{}: {} chars, {} chunks", doc.name, text.chars().count(), chunks.len());

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let index = Arc::new(VectorIndex::build(
            &doc.name,
            self.embedder.model_name(),
            chunks,
            vectors,
        )?);

        std::fs::create_dir_all(&self.root).map_err(|e| {
            Error::Storage(format!("cannot create {}: {}", self.root.display(), e))
        })?;
        let dir = self.storage_path(&doc.name);
        let to_persist = index.clone();
        tokio::task::spawn_blocking(move || to_persist.persist(&dir))
            .await
            .map_err(|e| Error::Storage(e.to_string()))??;

        Ok(index)
    }
}

fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Storage(format!(
            "cannot remove {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentFormat;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, 1.0])
                .collect())
        }
    }

    fn manager(root: &Path) -> (IndexManager, Arc<CountingEmbedder>) {
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let manager = IndexManager::new(
            root,
            ExtractorRegistry::default(),
            embedder.clone(),
            ChunkingConfig::default(),
            Duration::from_millis(1),
        );
        (manager, embedder)
    }

    fn text_doc(dir: &Path, name: &str, body: &str) -> Document {
        let path = dir.join(format!("{}.txt", name));
        std::fs::write(&path, body).unwrap();
        Document {
            name: name.to_string(),
            path,
            format: DocumentFormat::Text,
        }
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_name("Q3 report_v2-final"), "Q3 report_v2-final");
        assert_eq!(sanitize_name("a.b/c:d"), "abcd");
        assert_eq!(sanitize_name("notes (draft) "), "notes draft");
        assert_eq!(sanitize_name("!!!"), "");
    }

    #[tokio::test]
    async fn second_pass_performs_no_builds() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let docs = vec![
            text_doc(docs_dir.path(), "a", "Hello world"),
            text_doc(docs_dir.path(), "b", &"x".repeat(2400)),
        ];

        let (mut m, embedder) = manager(index_dir.path());
        let first = m.ensure_all(&docs).await;
        assert_eq!(first.built, vec!["a", "b"]);
        assert_eq!(m.builds_performed(), 2);

        let second = m.ensure_all(&docs).await;
        assert!(second.built.is_empty());
        assert_eq!(second.loaded.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        // A fresh manager over the same storage only loads.
        let (mut fresh, fresh_embedder) = manager(index_dir.path());
        let third = fresh.ensure_all(&docs).await;
        assert_eq!(third.loaded, vec!["a", "b"]);
        assert_eq!(fresh.builds_performed(), 0);
        assert_eq!(fresh_embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fresh.get_or_load("b").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn one_bad_document_does_not_stop_the_pass() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let docs = vec![
            text_doc(docs_dir.path(), "empty", "   \n"),
            text_doc(docs_dir.path(), "good", "content"),
        ];

        let (mut m, _) = manager(index_dir.path());
        let report = m.ensure_all(&docs).await;
        assert_eq!(report.built, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "empty");
        assert_eq!(report.failed[0].kind, crate::error::ErrorKind::ExtractionFailure);
        assert!(!m.exists("empty"));
        assert!(m.exists("good"));
    }

    #[tokio::test]
    async fn delete_removes_storage_and_source() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let doc = text_doc(docs_dir.path(), "a", "Hello world");

        let (mut m, _) = manager(index_dir.path());
        m.ensure_all(std::slice::from_ref(&doc)).await;
        assert!(m.is_loaded("a"));

        m.delete("a", Some(&doc.path)).await.unwrap();
        assert!(!m.exists("a"));
        assert!(!m.is_loaded("a"));
        assert!(!doc.path.exists());

        let err = m.delete("a", Some(&doc.path)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_retries_storage_removal_once() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let doc = text_doc(docs_dir.path(), "a", "Hello world");

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let (m, _) = manager(index_dir.path());
        let mut m = m.with_storage_remover(Arc::new(move |path: &Path| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(std::io::Error::other("resource busy"))
            } else {
                std::fs::remove_dir_all(path)
            }
        }));
        m.ensure_all(std::slice::from_ref(&doc)).await;

        m.delete("a", Some(&doc.path)).await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!m.exists("a"));
    }

    #[tokio::test]
    async fn failed_retry_still_removes_source() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let doc = text_doc(docs_dir.path(), "a", "Hello world");

        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let (m, _) = manager(index_dir.path());
        let mut m = m.with_storage_remover(Arc::new(move |_: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(std::io::Error::other("resource busy"))
        }));
        m.ensure_all(std::slice::from_ref(&doc)).await;

        let err = m.delete("a", Some(&doc.path)).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!doc.path.exists());
        assert!(m.exists("a"));
    }

    #[tokio::test]
    async fn vanished_storage_is_rebuilt_on_next_pass() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let docs = vec![text_doc(docs_dir.path(), "a", "Hello world")];

        let (mut m, embedder) = manager(index_dir.path());
        m.ensure_all(&docs).await;
        std::fs::remove_dir_all(index_dir.path().join("a")).unwrap();
        assert!(m.is_loaded("a"));

        let report = m.ensure_all(&docs).await;
        assert_eq!(report.built, vec!["a"]);
        assert!(report.loaded.is_empty());
        assert!(m.exists("a"));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn loaded_handle_without_storage_is_not_found() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let doc = text_doc(docs_dir.path(), "a", "Hello world");

        let (mut m, _) = manager(index_dir.path());
        m.ensure_all(std::slice::from_ref(&doc)).await;
        std::fs::remove_dir_all(index_dir.path().join("a")).unwrap();

        let err = m.get_or_load("a").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!m.is_loaded("a"));
    }

    struct PanickingExtractor;

    impl crate::extract::Extractor for PanickingExtractor {
        fn extract(&self, _path: &Path) -> std::result::Result<String, String> {
            panic!("malformed xref table");
        }
    }

    #[tokio::test]
    async fn extractor_panic_is_an_extraction_failure() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let docs = vec![text_doc(docs_dir.path(), "bad", "anything")];
        let mut extractors = ExtractorRegistry::empty();
        extractors.register(DocumentFormat::Text, Arc::new(PanickingExtractor));
        let mut m = IndexManager::new(
            index_dir.path(),
            extractors,
            Arc::new(CountingEmbedder {
                calls: AtomicUsize::new(0),
            }),
            ChunkingConfig::default(),
            Duration::from_millis(1),
        );

        let report = m.ensure_all(&docs).await;
        assert!(report.built.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, crate::error::ErrorKind::ExtractionFailure);
        assert!(!m.exists("bad"));
    }

    #[tokio::test]
    async fn interrupted_builds_are_swept() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let leftover = index_dir.path().join(".a.building-5f2c");
        std::fs::create_dir_all(&leftover).unwrap();
        std::fs::write(leftover.join("vectors.bin"), [0u8; 8]).unwrap();

        let (mut m, _) = manager(index_dir.path());
        let report = m
            .ensure_all(&[text_doc(docs_dir.path(), "a", "Hello world")])
            .await;
        assert_eq!(report.built, vec!["a"]);
        assert!(!leftover.exists());
        let entries: Vec<_> = std::fs::read_dir(index_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("a")]);
    }

    #[tokio::test]
    async fn delete_leaves_storage_of_colliding_name() {
        let docs_dir = TempDir::new().unwrap();
        let index_dir = TempDir::new().unwrap();
        let doc = text_doc(docs_dir.path(), "ab", "Hello world");

        let (mut m, _) = manager(index_dir.path());
        m.ensure_all(std::slice::from_ref(&doc)).await;
        assert_eq!(m.storage_path("a.b"), m.storage_path("ab"));

        let err = m.delete("a.b", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(m.exists("ab"));
        assert!(m.get_or_load("ab").await.is_ok());
    }

    #[tokio::test]
    async fn missing_index_is_not_found() {
        let index_dir = TempDir::new().unwrap();
        let (mut m, _) = manager(index_dir.path());
        let err = m.get_or_load("nope").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
