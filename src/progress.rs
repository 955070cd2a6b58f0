//! Task event reporting.
//!
//! Renders the worker's [`TaskEvent`] stream for the CLI. Everything goes to
//! **stderr** so stdout carries only answers and listings and stays usable in
//! scripts. Task results are printed by the caller, not by reporters.

use std::io::Write;

use crate::worker::TaskEvent;

/// Renders task events. Implementations write to stderr (human or JSON).
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &TaskEvent);
}

/// Human-friendly lines on stderr: status messages and errors.
pub struct StderrProgress;

impl EventReporter for StderrProgress {
    fn report(&self, event: &TaskEvent) {
        let line = match event {
            TaskEvent::Status { message } => format!("{}\n", message),
            TaskEvent::Error { kind, message } => format!("error [{}]: {}\n", kind, message),
            TaskEvent::Result { .. } | TaskEvent::Finished => return,
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonProgress;

impl EventReporter for JsonProgress {
    fn report(&self, event: &TaskEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// Errors only; used when progress is off.
pub struct ErrorsOnly;

impl EventReporter for ErrorsOnly {
    fn report(&self, event: &TaskEvent) {
        if let TaskEvent::Error { kind, message } = event {
            eprintln!("error [{}]: {}", kind, message);
        }
    }
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn EventReporter> {
        match self {
            ProgressMode::Off => Box::new(ErrorsOnly),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
