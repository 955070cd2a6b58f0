//! Per-document vector index.
//!
//! A [`VectorIndex`] holds the chunks of one document together with their
//! embeddings and answers brute-force cosine nearest-neighbor queries.
//!
//! # Storage layout
//!
//! ```text
//! <index root>/<sanitized name>/
//!     index.json    manifest: embedding model, dims, chunk texts + hashes
//!     vectors.bin   chunk vectors, little-endian f32, row-major
//! ```
//!
//! Builds are written into a temporary sibling directory and renamed into
//! place, so the storage location only ever appears complete. Every file
//! handle is opened and closed inside the call that needs it; a loaded index
//! keeps nothing open on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::chunk::chunk_hash;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{Chunk, RetrievedChunk};

const MANIFEST_FILE: &str = "index.json";
const VECTORS_FILE: &str = "vectors.bin";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    document: String,
    embedding_model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    chunks: Vec<StoredChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    index: usize,
    start: usize,
    hash: String,
    text: String,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    document: String,
    embedding_model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    chunks: Vec<StoredChunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Pair chunks with their embeddings.
    pub fn build(
        document: &str,
        embedding_model: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::extraction(document, "no chunks to index"));
        }
        if chunks.len() != vectors.len() {
            return Err(Error::Provider(format!(
                "got {} embeddings for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let dims = vectors[0].len();
        if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
            return Err(Error::Provider(
                "embeddings have inconsistent dimensions".to_string(),
            ));
        }

        let chunks = chunks
            .into_iter()
            .map(|c| StoredChunk {
                index: c.index,
                start: c.start,
                hash: chunk_hash(&c.text),
                text: c.text,
            })
            .collect();

        Ok(Self {
            document: document.to_string(),
            embedding_model: embedding_model.to_string(),
            dims,
            created_at: Utc::now(),
            chunks,
            vectors,
        })
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunk_texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.text.as_str())
    }

    /// Write the index to `dir`, which must not exist yet.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        if dir.exists() {
            return Err(Error::Storage(format!(
                "index location already exists: {}",
                dir.display()
            )));
        }
        let staging = staging_dir(dir);
        let written = self.write_files(&staging).and_then(|()| {
            std::fs::rename(&staging, dir).map_err(|e| {
                Error::Storage(format!("cannot move index into {}: {}", dir.display(), e))
            })
        });
        if written.is_err() {
            let _ = std::fs::remove_dir_all(&staging);
        }
        written
    }

    fn write_files(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(storage_err(dir))?;

        let manifest = Manifest {
            version: FORMAT_VERSION,
            document: self.document.clone(),
            embedding_model: self.embedding_model.clone(),
            dims: self.dims,
            created_at: self.created_at,
            chunks: self.chunks.clone(),
        };
        let manifest_path = dir.join(MANIFEST_FILE);
        {
            let file = File::create(&manifest_path).map_err(storage_err(&manifest_path))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &manifest)
                .map_err(|e| Error::Storage(e.to_string()))?;
            writer.flush().map_err(storage_err(&manifest_path))?;
        }

        let vectors_path = dir.join(VECTORS_FILE);
        {
            let file = File::create(&vectors_path).map_err(storage_err(&vectors_path))?;
            let mut writer = BufWriter::new(file);
            for v in &self.vectors {
                writer
                    .write_all(&vec_to_blob(v))
                    .map_err(storage_err(&vectors_path))?;
            }
            writer.flush().map_err(storage_err(&vectors_path))?;
        }
        Ok(())
    }

    /// Read an index previously written by [`persist`](Self::persist).
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("index at {}", dir.display())));
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: Manifest = {
            let file = File::open(&manifest_path).map_err(storage_err(&manifest_path))?;
            serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::Storage(format!("corrupt manifest {}: {}", manifest_path.display(), e))
            })?
        };
        if manifest.version != FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "unsupported index version {} in {}",
                manifest.version,
                dir.display()
            )));
        }

        let vectors_path = dir.join(VECTORS_FILE);
        let blob = {
            let mut file = File::open(&vectors_path).map_err(storage_err(&vectors_path))?;
            let mut blob = Vec::new();
            file.read_to_end(&mut blob)
                .map_err(storage_err(&vectors_path))?;
            blob
        };

        let expected = manifest.chunks.len() * manifest.dims * 4;
        if manifest.dims == 0 || blob.len() != expected {
            return Err(Error::Storage(format!(
                "vector file {} has {} bytes, expected {}",
                vectors_path.display(),
                blob.len(),
                expected
            )));
        }
        let vectors = blob
            .chunks_exact(manifest.dims * 4)
            .map(blob_to_vec)
            .collect();

        Ok(Self {
            document: manifest.document,
            embedding_model: manifest.embedding_model,
            dims: manifest.dims,
            created_at: manifest.created_at,
            chunks: manifest.chunks,
            vectors,
        })
    }

    /// Name of the document whose index is stored in `dir`, if its manifest
    /// can be read.
    pub fn stored_document(dir: &Path) -> Option<String> {
        #[derive(Deserialize)]
        struct Owner {
            document: String,
        }

        let file = File::open(dir.join(MANIFEST_FILE)).ok()?;
        serde_json::from_reader::<_, Owner>(BufReader::new(file))
            .ok()
            .map(|o| o.document)
    }

    /// Top-`k` chunks by cosine similarity, best first.
    ///
    /// Ties keep document order. A query vector whose length differs from
    /// the index dimensions fails with [`Error::Provider`]: the index was
    /// built by another embedding model and its scores would be meaningless.
    pub fn query(&self, query_vec: &[f32], k: usize) -> Result<Vec<RetrievedChunk>> {
        if query_vec.len() != self.dims {
            return Err(Error::Provider(format!(
                "query has {} dimensions but the index of '{}' has {} (built with {})",
                query_vec.len(),
                self.document,
                self.dims,
                self.embedding_model
            )));
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query_vec, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| RetrievedChunk {
                index: self.chunks[i].index,
                text: self.chunks[i].text.clone(),
                score,
            })
            .collect())
    }
}

/// Remove staging directories left behind by interrupted builds under
/// `root`. Returns how many were removed.
pub fn sweep_staging(root: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_staging_name(&name) || !entry.path().is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!("cannot remove stale build {}: {}", entry.path().display(), e),
        }
    }
    removed
}

fn is_staging_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(".building-")
}

fn staging_dir(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    dir.with_file_name(format!(".{}.building-{}", name, Uuid::new_v4()))
}

fn storage_err(path: &Path) -> impl Fn(std::io::Error) -> Error + '_ {
    move |e| Error::Storage(format!("{}: {}", path.display(), e))
}
