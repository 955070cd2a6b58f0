//! Stub providers and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use docchat::backend::Backend;
use docchat::chain::ChainCache;
use docchat::config::{ChunkingConfig, DocumentsConfig, Settings};
use docchat::documents::DocumentStore;
use docchat::embedding::EmbeddingProvider;
use docchat::error::Result;
use docchat::extract::ExtractorRegistry;
use docchat::index_manager::IndexManager;
use docchat::llm::{LlmConnector, LlmProvider};

pub const STUB_URL: &str = "http://stub-llm:11434";
pub const STUB_MODEL: &str = "stub-model";
pub const CANNED_ANSWER: &str = "It says hello to the world.";
/// Questions containing this make [`StubLlm`] panic.
pub const CRASH_WORD: &str = "kaboom";

#[derive(Default)]
pub struct Counters {
    pub embed_calls: AtomicUsize,
    pub connects: AtomicUsize,
    pub generations: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl Counters {
    pub fn embeds(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

/// Letter-frequency vectors: deterministic, and similar texts score higher.
pub struct StubEmbedder {
    counters: Arc<Counters>,
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    fn model_name(&self) -> &str {
        "stub-embedder"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.counters.embed_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 27];
                for c in t.to_lowercase().chars() {
                    if c.is_ascii_lowercase() {
                        v[(c as u8 - b'a') as usize] += 1.0;
                    }
                }
                v[26] = 1.0;
                v
            })
            .collect())
    }
}

pub struct StubLlm {
    model: String,
    endpoint: String,
    counters: Arc<Counters>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if prompt.contains(&format!("Question: {}", CRASH_WORD)) {
            panic!("stub model crashed");
        }
        self.counters.prompts.lock().unwrap().push(prompt.to_string());
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        Ok(CANNED_ANSWER.to_string())
    }
}

pub struct StubConnector {
    counters: Arc<Counters>,
    gate: Option<Arc<Semaphore>>,
}

impl LlmConnector for StubConnector {
    fn connect(&self, model: &str, endpoint: &str) -> Result<Arc<dyn LlmProvider>> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(StubLlm {
            model: model.to_string(),
            endpoint: endpoint.to_string(),
            counters: self.counters.clone(),
            gate: self.gate.clone(),
        }))
    }
}

/// A backend over `docs`/`index` wired to the stubs.
///
/// With a `gate`, every generation waits for a permit.
pub fn stub_backend(
    docs: &Path,
    index: &Path,
    gate: Option<Arc<Semaphore>>,
) -> (Backend, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let store = DocumentStore::new(&DocumentsConfig {
        folder: docs.to_path_buf(),
        recursive: true,
        exclude_globs: vec![],
    })
    .unwrap();
    let indexes = IndexManager::new(
        index,
        ExtractorRegistry::default(),
        Arc::new(StubEmbedder {
            counters: counters.clone(),
        }),
        ChunkingConfig::default(),
        Duration::from_millis(10),
    );
    let chains = ChainCache::new(
        Arc::new(StubConnector {
            counters: counters.clone(),
            gate,
        }),
        3,
    );
    let settings = Settings {
        endpoint_url: STUB_URL.to_string(),
        model: STUB_MODEL.to_string(),
    };
    (Backend::new(store, indexes, chains, settings), counters)
}

pub fn minimal_docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    zip_with(&[("word/document.xml", &xml)])
}

const SHEET_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

pub fn minimal_xlsx(strings: &[&str]) -> Vec<u8> {
    let shared: String = strings
        .iter()
        .map(|s| format!("<si><t>{}</t></si>", s))
        .collect();
    let cells: String = (0..strings.len())
        .map(|i| format!("<c r=\"A{}\" t=\"s\"><v>{}</v></c>", i + 1, i))
        .collect();
    let shared_xml = format!("<sst xmlns=\"{}\">{}</sst>", SHEET_NS, shared);
    let sheet_xml = format!(
        "<worksheet xmlns=\"{}\"><sheetData><row r=\"1\">{}<c r=\"B1\"><v>42</v></c></row></sheetData></worksheet>",
        SHEET_NS, cells
    );
    let workbook_xml = format!(
        "<workbook xmlns=\"{}\" xmlns:r=\"{}\"><sheets>\
         <sheet name=\"Sheet1\" sheetId=\"1\" r:id=\"rId1\"/></sheets></workbook>",
        SHEET_NS, REL_NS
    );
    let rels_xml = format!(
        "<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"{}/worksheet\" Target=\"worksheets/sheet1.xml\"/>\
         </Relationships>",
        REL_NS
    );
    zip_with(&[
        ("xl/workbook.xml", &workbook_xml),
        ("xl/_rels/workbook.xml.rels", &rels_xml),
        ("xl/sharedStrings.xml", &shared_xml),
        ("xl/worksheets/sheet1.xml", &sheet_xml),
    ])
}

fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}
