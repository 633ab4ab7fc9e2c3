//! Report sinks.
//!
//! A snapshot is rendered either as a full-screen table ([`Dashboard`])
//! or appended to a text stream ([`TextSink`]). The pipeline picks one
//! at startup; update calls are serialized by the display task.

pub mod dashboard;
pub mod text;

pub use dashboard::{spawn_input_thread, Dashboard};
pub use text::TextSink;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::sniffer::alerts::AlertEvent;

/// Section name of the aggregate row.
pub const GLOBAL_SECTION: &str = "global";

/// Counters for one section over both windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub section: String,
    pub display_hits: u64,
    pub display_up: u64,
    pub display_down: u64,
    pub display_total: u64,
    pub alert_hits: u64,
    pub alert_up: u64,
    pub alert_down: u64,
    pub alert_total: u64,
    pub is_alerting: bool,
}

/// All rows computed at a single instant.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub at: DateTime<Utc>,
    pub global: Row,
    pub sections: Vec<Row>,
}

/// A destination snapshots are rendered to.
pub trait Sink: Send {
    /// Renders one snapshot plus the alert transitions that accompanied it.
    fn update(&mut self, snapshot: &Snapshot, events: &[AlertEvent]);
}

/// Formats a byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{}B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value >= 10.0 {
        format!("{:.0}{}", value, UNITS[unit])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Formats a duration as compact hours/minutes/seconds, e.g. `2m5s`.
pub fn format_duration(duration: ChronoDuration) -> String {
    let total = duration.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if seconds > 0 || out.is_empty() {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_below_one_kib_are_plain() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1023), "1023B");
    }

    #[test]
    fn bytes_scale_through_binary_units() {
        assert_eq!(format_bytes(1024), "1.0KiB");
        assert_eq!(format_bytes(1536), "1.5KiB");
        assert_eq!(format_bytes(20 * 1024), "20KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 + 300 * 1024), "3.3MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0GiB");
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(ChronoDuration::seconds(0)), "0s");
        assert_eq!(format_duration(ChronoDuration::seconds(45)), "45s");
        assert_eq!(format_duration(ChronoDuration::seconds(121)), "2m1s");
        assert_eq!(format_duration(ChronoDuration::seconds(120)), "2m");
        assert_eq!(format_duration(ChronoDuration::seconds(3723)), "1h2m3s");
    }
}
