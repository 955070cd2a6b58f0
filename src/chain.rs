//! Question-answering pipelines and their cache.
//!
//! A [`QaPipeline`] binds one document's [`VectorIndex`] to a language model
//! at a specific endpoint. Answering a question embeds it, retrieves the
//! `top_k` most similar chunks, fills [`PROMPT_TEMPLATE`] and asks the model.
//!
//! [`ChainCache`] keeps at most one pipeline per document name. A request for
//! a different model on the same endpoint replaces the entry; a request for a
//! different endpoint drops every entry first.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::Result;
use crate::index_manager::IndexManager;
use crate::llm::{LlmConnector, LlmProvider};
use crate::models::RetrievedChunk;
use crate::vector_index::VectorIndex;

pub const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the user's question.
Provide a detailed and comprehensive answer based on the context.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

Context: {context}
Question: {question}

Helpful and detailed answer:";

/// Fill the prompt template.
pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

pub struct QaPipeline {
    document: String,
    model: String,
    endpoint: String,
    top_k: usize,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn LlmProvider>,
}

impl QaPipeline {
    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<RetrievedChunk>> {
        let query_vec = embed_query(self.embedder.as_ref(), question).await?;
        self.index.query(&query_vec, self.top_k)
    }

    pub async fn answer(&self, question: &str) -> Result<String> {
        let hits = self.retrieve(question).await?;
        debug!(
            "{}: retrieved chunks {:?}",
            self.document,
            hits.iter().map(|h| h.index).collect::<Vec<_>>()
        );
        let context = hits
            .iter()
            .map(|h| h.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        self.llm.generate(&build_prompt(&context, question)).await
    }
}

pub struct ChainCache {
    connector: Arc<dyn LlmConnector>,
    top_k: usize,
    active_endpoint: Option<String>,
    pipelines: HashMap<String, Arc<QaPipeline>>,
    constructions: usize,
}

impl ChainCache {
    pub fn new(connector: Arc<dyn LlmConnector>, top_k: usize) -> Self {
        Self {
            connector,
            top_k,
            active_endpoint: None,
            pipelines: HashMap::new(),
            constructions: 0,
        }
    }

    /// The cached pipeline for `document`, constructing it when missing or
    /// bound to another model or endpoint.
    ///
    /// A cached pipeline is only reused while its index storage still exists.
    /// Construction fails with `NotFound` when the document has no index,
    /// and a failed construction leaves the cache without an entry.
    pub async fn get(
        &mut self,
        indexes: &mut IndexManager,
        document: &str,
        model: &str,
        endpoint: &str,
    ) -> Result<Arc<QaPipeline>> {
        if self.active_endpoint.as_deref() != Some(endpoint) {
            if self.active_endpoint.is_some() {
                info!("endpoint changed to {}, dropping cached pipelines", endpoint);
                self.invalidate_all();
            }
            self.active_endpoint = Some(endpoint.to_string());
        }

        if let Some(pipeline) = self.pipelines.get(document) {
            if pipeline.model == model
                && pipeline.endpoint == endpoint
                && indexes.exists(document)
            {
                return Ok(pipeline.clone());
            }
        }
        // Stale binding, if any, must not outlive a failed rebuild.
        self.pipelines.remove(document);

        let index = indexes.get_or_load(document).await?;
        let llm = self.connector.connect(model, endpoint)?;
        let pipeline = Arc::new(QaPipeline {
            document: document.to_string(),
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            top_k: self.top_k,
            index,
            embedder: indexes.embedder(),
            llm,
        });
        self.constructions += 1;
        debug!("built pipeline for {} with {}", document, model);
        self.pipelines.insert(document.to_string(), pipeline.clone());
        Ok(pipeline)
    }

    /// Drop every cached pipeline.
    pub fn invalidate_all(&mut self) {
        self.pipelines.clear();
    }

    /// React to a settings change. Returns true when the cache was cleared.
    pub fn set_endpoint(&mut self, endpoint: &str) -> bool {
        if self.active_endpoint.as_deref() == Some(endpoint) {
            return false;
        }
        self.invalidate_all();
        self.active_endpoint = Some(endpoint.to_string());
        true
    }

    pub fn evict(&mut self, document: &str) -> bool {
        self.pipelines.remove(document).is_some()
    }

    pub fn contains(&self, document: &str) -> bool {
        self.pipelines.contains_key(document)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Pipelines constructed over this cache's lifetime.
    pub fn constructions(&self) -> usize {
        self.constructions
    }
}
