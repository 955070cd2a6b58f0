//! Core data models used throughout docchat.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the indexing and answering pipeline.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, ErrorKind};

/// Supported source formats, in stem-collision priority order.
///
/// When two files share a stem (`report.pdf`, `report.txt`), the format that
/// appears first in [`DocumentFormat::PRIORITY`] wins. The order is fixed so
/// that the same file is chosen on every scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Text,
    Xls,
    Xlsx,
}

impl DocumentFormat {
    pub const PRIORITY: [DocumentFormat; 5] = [
        DocumentFormat::Pdf,
        DocumentFormat::Docx,
        DocumentFormat::Text,
        DocumentFormat::Xls,
        DocumentFormat::Xlsx,
    ];

    /// Map a file extension (without the dot, any case) to a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentFormat::Pdf),
            "docx" => Some(DocumentFormat::Docx),
            "txt" => Some(DocumentFormat::Text),
            "xls" => Some(DocumentFormat::Xls),
            "xlsx" => Some(DocumentFormat::Xlsx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Text => "txt",
            DocumentFormat::Xls => "xls",
            DocumentFormat::Xlsx => "xlsx",
        }
    }

    /// Lower is preferred.
    pub fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|f| f == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

/// A source document discovered in the documents folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    /// Filename without extension; the document's identity.
    pub name: String,
    pub path: PathBuf,
    pub format: DocumentFormat,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    /// Offset of the first character within the source text.
    pub start: usize,
    pub text: String,
}

/// A chunk returned from a nearest-neighbor query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub index: usize,
    pub text: String,
    pub score: f32,
}

/// Outcome of a Setup pass over a set of documents.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnsureReport {
    /// Documents whose index was built and persisted in this pass.
    pub built: Vec<String>,
    /// Documents whose persisted index was loaded (or was already loaded).
    pub loaded: Vec<String>,
    /// Documents that could not be indexed.
    pub failed: Vec<FailedDocument>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl FailedDocument {
    pub fn new(name: &str, error: &Error) -> Self {
        Self {
            name: name.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl EnsureReport {
    pub fn total(&self) -> usize {
        self.built.len() + self.loaded.len() + self.failed.len()
    }

    /// One-line summary suitable for a status event.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{} built, {} loaded, {} failed",
            self.built.len(),
            self.loaded.len(),
            self.failed.len()
        );
        for failure in &self.failed {
            line.push_str(&format!("\n  {}: {}", failure.name, failure.message));
        }
        line
    }
}
