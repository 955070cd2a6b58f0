//! # docchat CLI
//!
//! Ask questions about the documents in a folder.
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat setup` | Build or load the index of every document |
//! | `docchat list` | List documents; `*` marks indexed ones |
//! | `docchat ask <document> "<question>"` | Answer a question from one document |
//! | `docchat delete <document>` | Remove a document, its index and cached pipeline |
//! | `docchat add <file>` | Copy a file into the documents folder and index it |
//! | `docchat models` | List models offered by the LLM endpoint |
//! | `docchat chat <document>` | Interactive question loop |
//!
//! The config file is optional; without it every setting takes its default
//! (documents in `./AIDocs`, indexes in `./faiss_index`, Ollama on
//! `localhost:11434`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docchat::backend::Backend;
use docchat::config::{self, Config};
use docchat::llm;
use docchat::progress::{EventReporter, ProgressMode};
use docchat::worker::{Task, TaskEvent, TaskRunner};

/// Question answering over a folder of documents.
#[derive(Parser)]
#[command(name = "docchat", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "./docchat.toml")]
    config: PathBuf,

    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Task progress on stderr. Defaults to `human` on a terminal, else `off`.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every document in the documents folder.
    ///
    /// Documents that already have an index are loaded, not rebuilt.
    Setup,

    /// List documents, sorted by name.
    List,

    /// Answer a question from one document.
    Ask {
        /// Document name (file name without extension).
        document: String,
        question: String,
        /// Model id; defaults to `[llm].model`.
        #[arg(long)]
        model: Option<String>,
        /// Endpoint URL; defaults to `[llm].url`.
        #[arg(long)]
        url: Option<String>,
    },

    /// Delete a document's source file and index.
    Delete { document: String },

    /// Copy a file into the documents folder and index it.
    Add { file: PathBuf },

    /// List models available at the endpoint.
    Models {
        #[arg(long)]
        url: Option<String>,
    },

    /// Ask questions interactively.
    ///
    /// `/doc <name>` switches document, `/quit` exits.
    Chat {
        document: String,
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("docchat=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_or_default(&cli.config)?;
    let reporter = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let succeeded = match cli.command {
        Commands::List => {
            let backend = Backend::from_config(&cfg)?;
            for name in backend.list_documents()? {
                let marker = if backend.indexes().exists(&name) { "*" } else { " " };
                println!("{} {}", marker, name);
            }
            true
        }
        Commands::Models { url } => {
            let url = url.unwrap_or_else(|| cfg.llm.url.clone());
            match llm::list_models(&url, Duration::from_secs(cfg.llm.timeout_secs)).await {
                Ok(models) => {
                    for model in models {
                        println!("{}", model);
                    }
                    true
                }
                Err(e) => {
                    warn!("could not list models at {}: {}", url, e);
                    false
                }
            }
        }
        Commands::Setup => run_single(&cfg, Task::Setup, reporter.as_ref()).await?,
        Commands::Ask {
            document,
            question,
            model,
            url,
        } => {
            override_settings(&mut cfg, model, url);
            let task = Task::Ask {
                question,
                document,
                model: None,
            };
            run_single(&cfg, task, reporter.as_ref()).await?
        }
        Commands::Delete { document } => {
            run_single(&cfg, Task::Delete { document }, reporter.as_ref()).await?
        }
        Commands::Add { file } => {
            run_single(&cfg, Task::Import { path: file }, reporter.as_ref()).await?
        }
        Commands::Chat { document, model } => {
            override_settings(&mut cfg, model, None);
            chat(&cfg, document, reporter.as_ref()).await?
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

fn override_settings(cfg: &mut Config, model: Option<String>, url: Option<String>) {
    if let Some(model) = model {
        cfg.llm.model = model;
    }
    if let Some(url) = url {
        cfg.llm.url = url;
    }
}

/// Run one task to completion on a fresh worker.
async fn run_single(cfg: &Config, task: Task, reporter: &dyn EventReporter) -> Result<bool> {
    let mut runner = TaskRunner::spawn(Backend::from_config(cfg)?);
    let ok = run_task(&mut runner, task, reporter).await?;
    runner.shutdown().await;
    Ok(ok)
}

/// Submit `task` and render its events until `Finished`.
///
/// Returns false when the task ended with an error.
async fn run_task(
    runner: &mut TaskRunner,
    task: Task,
    reporter: &dyn EventReporter,
) -> Result<bool> {
    if !runner.submit(task) {
        anyhow::bail!("worker is busy");
    }

    let mut ok = true;
    while let Some(event) = runner.next_event().await {
        reporter.report(&event);
        match event {
            TaskEvent::Result { text } if !text.is_empty() => println!("{}", text),
            TaskEvent::Error { .. } => ok = false,
            TaskEvent::Finished => break,
            _ => {}
        }
    }
    Ok(ok)
}

async fn chat(cfg: &Config, mut document: String, reporter: &dyn EventReporter) -> Result<bool> {
    let mut runner = TaskRunner::spawn(Backend::from_config(cfg)?);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_ok = true;

    eprintln!("Asking {}. /doc <name> switches document, /quit exits.", document);
    loop {
        eprint!("{}> ", document);
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(name) = line.strip_prefix("/doc ") {
            document = name.trim().to_string();
            continue;
        }

        let task = Task::Ask {
            question: line.to_string(),
            document: document.clone(),
            model: None,
        };
        last_ok = run_task(&mut runner, task, reporter).await?;
    }

    runner.shutdown().await;
    Ok(last_ok)
}
