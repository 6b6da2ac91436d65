//! Tracing setup, runtime debug toggle and the in-memory log history
//!
//! Every event that passes the level filter is also kept in a bounded
//! history. The history is written to `settings/app.log` when the save
//! queue flushes with auxiliary saves (process exit).

use anyhow::{Context, Result};
use chrono::Local;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber, debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, reload};

use crate::constants::logging::MAX_HISTORY;
use crate::error::StoreError;
use crate::save_queue::AuxiliarySave;

/// Parse a `LOG_LEVEL` style name, defaulting to INFO
pub fn parse_level(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    }
}

/// Bounded, shareable list of formatted log lines
#[derive(Debug, Clone, Default)]
pub struct LogHistory {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a line. When the cap is exceeded the oldest fifth is dropped.
    pub fn push(&self, line: String) {
        let mut lines = self.lock();
        lines.push(line);
        if lines.len() > MAX_HISTORY {
            lines.drain(..MAX_HISTORY / 5);
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lock().clone()
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Layer that records every event into a `LogHistory`
pub struct HistoryLayer {
    history: LogHistory,
}

impl HistoryLayer {
    pub fn new(history: LogHistory) -> Self {
        Self { history }
    }
}

impl<S: Subscriber> Layer<S> for HistoryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.history.push(format!(
            "[{}] [{}] ({}) {}{}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            metadata.level(),
            metadata.target(),
            visitor.message,
            visitor.fields
        ));
    }
}

/// Switches debug output on and off at runtime
#[derive(Clone)]
pub struct LogControl {
    handle: reload::Handle<LevelFilter, Registry>,
    base: LevelFilter,
    history: LogHistory,
}

impl LogControl {
    /// Raise the filter to DEBUG, or restore the startup level
    pub fn set_debug(&self, enabled: bool) {
        let level = if enabled { LevelFilter::DEBUG.max(self.base) } else { self.base };
        match self.handle.modify(|filter| *filter = level) {
            Ok(()) => debug!(%level, "Log level changed"),
            Err(e) => tracing::error!(error = %e, "Failed to change log level"),
        }
    }

    pub fn history(&self) -> &LogHistory {
        &self.history
    }
}

/// Install the global subscriber: reloadable level filter, stdout formatter
/// and the history layer.
pub fn init(level: LevelFilter) -> Result<LogControl> {
    let (filter, handle) = reload::Layer::new(level);
    let history = LogHistory::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(HistoryLayer::new(history.clone()))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LogControl {
        handle,
        base: level,
        history,
    })
}

/// Writes the log history to a plain text file
pub struct LogFile {
    history: LogHistory,
    path: PathBuf,
}

impl LogFile {
    pub fn new(history: LogHistory, path: impl Into<PathBuf>) -> Self {
        Self {
            history,
            path: path.into(),
        }
    }
}

impl AuxiliarySave for LogFile {
    fn save(&self) -> Result<(), StoreError> {
        let mut contents = self.history.snapshot().join("\n");
        contents.push('\n');
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::from_io(parent, e))?;
        }
        fs::write(&self.path, contents).map_err(|e| StoreError::from_io(&self.path, e))?;
        info!(path = %self.path.display(), "Log saved");
        Ok(())
    }
}
