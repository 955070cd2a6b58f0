//! Single-worker task execution.
//!
//! [`TaskRunner`] owns a [`Backend`] inside one tokio task and runs submitted
//! [`Task`]s there, one at a time, to completion. Submissions are rejected,
//! not queued, while a task is running.
//!
//! # Event protocol
//!
//! Every accepted task produces, in order:
//!
//! ```text
//! Status*  (Result | Error)  Finished
//! ```
//!
//! The run state flips back to [`RunState::Idle`] under the same lock that
//! guards [`TaskRunner::submit`], right after `Finished` is sent, so a caller
//! that sees `Finished` can submit again immediately.
//!
//! A task that panics is reported as an `Error` event like any other
//! failure, and the worker keeps serving.
//!
//! Settings changes travel on a watch channel and are applied by the worker
//! before the next task starts, so the pipeline cache is only ever touched
//! from the worker.

use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::backend::Backend;
use crate::config::Settings;
use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Index every document in the folder.
    Setup,
    /// Answer a question from one document. `model` falls back to settings.
    Ask {
        question: String,
        document: String,
        model: Option<String>,
    },
    Delete {
        document: String,
    },
    /// Copy a file into the folder and index it.
    Import {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Setup,
    Ask,
    Delete,
    Import,
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Setup => TaskKind::Setup,
            Task::Ask { .. } => TaskKind::Ask,
            Task::Delete { .. } => TaskKind::Delete,
            Task::Import { .. } => TaskKind::Import,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Status { message: String },
    Result { text: String },
    Error { kind: ErrorKind, message: String },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(TaskKind),
}

pub struct TaskRunner {
    requests: Option<mpsc::Sender<Task>>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    state: Arc<Mutex<RunState>>,
    settings: watch::Sender<Settings>,
    handle: Option<JoinHandle<()>>,
}

impl TaskRunner {
    /// Move `backend` into a new worker task. Must be called inside a tokio
    /// runtime.
    pub fn spawn(backend: Backend) -> Self {
        let (request_tx, request_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (settings_tx, settings_rx) = watch::channel(backend.settings().clone());
        let state = Arc::new(Mutex::new(RunState::Idle));

        let handle = tokio::spawn(run_worker(
            backend,
            request_rx,
            event_tx,
            state.clone(),
            settings_rx,
        ));

        Self {
            requests: Some(request_tx),
            events: event_rx,
            state,
            settings: settings_tx,
            handle: Some(handle),
        }
    }

    /// Hand `task` to the worker. Returns false if a task is already running
    /// or the runner is shutting down.
    pub fn submit(&self, task: Task) -> bool {
        let Some(requests) = &self.requests else {
            return false;
        };
        let mut state = lock(&self.state);
        if *state != RunState::Idle {
            debug!("rejected {:?}: worker busy", task.kind());
            return false;
        }
        let kind = task.kind();
        match requests.try_send(task) {
            Ok(()) => {
                *state = RunState::Running(kind);
                true
            }
            Err(_) => false,
        }
    }

    pub fn state(&self) -> RunState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state() != RunState::Idle
    }

    /// Next event from the worker, or `None` once the worker has exited and
    /// every event has been drained.
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    /// Publish new settings; the worker applies them before its next task.
    pub fn update_settings(&self, settings: Settings) {
        self.settings.send_replace(settings);
    }

    /// Stop accepting work and wait for the current task, if any, to finish.
    pub async fn shutdown(mut self) {
        self.requests.take();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("worker exited abnormally: {}", e);
            }
        }
    }
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_worker(
    mut backend: Backend,
    mut requests: mpsc::Receiver<Task>,
    events: mpsc::UnboundedSender<TaskEvent>,
    state: Arc<Mutex<RunState>>,
    mut settings: watch::Receiver<Settings>,
) {
    while let Some(task) = requests.recv().await {
        if settings.has_changed().unwrap_or(false) {
            backend.apply_settings(settings.borrow_and_update().clone());
        }

        let kind = task.kind();
        debug!("running {:?}", kind);
        let outcome = AssertUnwindSafe(execute(&mut backend, task, &events))
            .catch_unwind()
            .await;
        let event = match outcome {
            Ok(Ok(text)) => TaskEvent::Result { text },
            Ok(Err(e)) => TaskEvent::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
            Err(payload) => {
                let message = format!(
                    "{:?} task crashed: {}",
                    kind,
                    panic_message(payload.as_ref())
                );
                error!("{}", message);
                TaskEvent::Error {
                    kind: ErrorKind::ProviderFailure,
                    message,
                }
            }
        };
        let _ = events.send(event);

        {
            let mut state = lock(&state);
            let _ = events.send(TaskEvent::Finished);
            *state = RunState::Idle;
        }
    }
    debug!("worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

async fn execute(
    backend: &mut Backend,
    task: Task,
    events: &mpsc::UnboundedSender<TaskEvent>,
) -> Result<String> {
    let status = |message: String| {
        let _ = events.send(TaskEvent::Status { message });
    };

    match task {
        Task::Setup => {
            status("Setting up documents".to_string());
            let report = backend.setup(status).await?;
            Ok(format!(
                "{} document(s) ready",
                report.built.len() + report.loaded.len()
            ))
        }
        Task::Ask {
            question,
            document,
            model,
        } => backend.ask(&question, &document, model.as_deref()).await,
        Task::Delete { document } => {
            backend.delete_document(&document).await?;
            Ok(format!("deleted {}", document))
        }
        Task::Import { path } => {
            let report = backend.import(&path, status).await?;
            Ok(match report.built.first() {
                Some(name) => format!("added {}", name),
                None => format!("added {}", path.display()),
            })
        }
    }
}
