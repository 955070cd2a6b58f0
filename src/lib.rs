//! # docchat
//!
//! Ask natural-language questions about the documents in a folder and get
//! answers grounded in each document's own content.
//!
//! Every document gets its own persisted vector index. Questions are answered
//! by a pipeline that retrieves the most similar chunks of one document and
//! hands them, with the question, to a language model served by Ollama.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │DocumentStore │──▶│ IndexManager │──▶│ faiss_index/ │
//! │  AIDocs/*    │   │ chunk+embed  │   │  <name>/     │
//! └──────────────┘   └──────┬───────┘   └──────────────┘
//!                           │
//!                    ┌──────▼───────┐   ┌──────────────┐
//!                    │  ChainCache  │──▶│ LLM endpoint │
//!                    │ one/document │   │   (Ollama)   │
//!                    └──────┬───────┘   └──────────────┘
//!                           │
//!                    ┌──────▼───────┐
//!                    │  TaskRunner  │◀── CLI / REPL
//!                    │ single worker│──▶ status* result|error finished
//!                    └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat setup                          # index everything in ./AIDocs
//! docchat list
//! docchat ask handbook "How many vacation days do I get?" --model llama3
//! docchat chat handbook --model llama3   # interactive
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`documents`] | Document discovery and import |
//! | [`extract`] | Per-format text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_index`] | Persisted per-document vector index |
//! | [`index_manager`] | Index build/load/delete lifecycle |
//! | [`llm`] | Language-model endpoint client |
//! | [`chain`] | QA pipelines and their cache |
//! | [`backend`] | Owner of all mutable state |
//! | [`worker`] | Single-worker task runner and event protocol |
//! | [`progress`] | Event rendering for the CLI |

pub mod backend;
pub mod chain;
pub mod chunk;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index_manager;
pub mod llm;
pub mod models;
pub mod progress;
pub mod vector_index;
pub mod worker;
