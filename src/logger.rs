//! Structured event logging.
//!
//! Events are written to stdout and optionally appended to a log file,
//! either as human-readable lines or as newline-delimited JSON. In
//! dashboard mode stdout output is suppressed (the terminal belongs to
//! the table) while file logging keeps working.

use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds httptop can emit.
///
/// The `#[serde(tag = "event")]` attribute gives JSON output an
/// `"event"` key so consumers can filter by type without inspecting
/// structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// A response-side stream appeared with no registered request side.
    UnpairedResponse { flow: &'a str },

    /// A request stream carried a malformed HTTP message and was dropped.
    MalformedRequest { flow: &'a str },

    /// A section crossed the alert threshold.
    AlertTriggered { section: &'a str, hits: u64 },

    /// A section saw a full alert window of silence.
    AlertRecovered { section: &'a str, elapsed_secs: u64 },

    /// Session summary emitted on graceful shutdown.
    SessionSummary {
        duration_secs: u64,
        packets_total: u64,
        streams_opened: u64,
        round_trips_total: u64,
        unpaired_responses: u64,
        parse_errors: u64,
        reassembly_drops: u64,
        alerts_emitted: u64,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every
/// component that emits events.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json: bool,
    /// Whether events are echoed to stdout. Off in dashboard mode.
    stdout: bool,
    /// Optional buffered file writer.
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

/// Alias used throughout the codebase.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger, opening (or creating) the log file in
    /// append mode when a path is given.
    pub fn new(json: bool, log_path: Option<&str>, stdout: bool) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };
        Ok(Self { json, stdout, file })
    }

    /// Logs a single [`Event`].
    ///
    /// Plain-text output is prefixed with a timestamp and an event tag;
    /// NDJSON output is one JSON object per line with a `"timestamp"`
    /// field injected alongside the event fields.
    pub fn log(&self, event: &Event) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let line = if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(timestamp.clone()),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, self.plain_text(event))
        };

        if self.stdout {
            println!("{}", line);
        }

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Formats an [`Event`] as a human-readable line (no timestamp).
    fn plain_text(&self, event: &Event) -> String {
        match event {
            Event::Info { message } => format!("[INFO] {}", message),

            Event::UnpairedResponse { flow } => {
                format!("[UNPAIRED] response stream {} has no request side", flow)
            }

            Event::MalformedRequest { flow } => {
                format!("[MALFORMED] dropped request stream {}", flow)
            }

            Event::AlertTriggered { section, hits } => {
                format!("[ALERT] {} hits = {}", section, hits)
            }

            Event::AlertRecovered {
                section,
                elapsed_secs,
            } => format!("[RECOVERED] {} after {}s", section, elapsed_secs),

            Event::SessionSummary {
                duration_secs,
                packets_total,
                streams_opened,
                round_trips_total,
                unpaired_responses,
                parse_errors,
                reassembly_drops,
                alerts_emitted,
            } => format!(
                "[SUMMARY] duration={}s packets={} streams={} round_trips={} unpaired={} parse_errors={} drops={} alerts={}",
                duration_secs,
                packets_total,
                streams_opened,
                round_trips_total,
                unpaired_responses,
                parse_errors,
                reassembly_drops,
                alerts_emitted
            ),
        }
    }
}
