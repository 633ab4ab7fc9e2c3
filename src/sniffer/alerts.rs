//! Alert state machine.
//!
//! Tracks which sections are currently alerting. A section enters the
//! alerting state on the first snapshot that flags it and leaves it
//! only after a full alert window of silence, which gives the alerts
//! hysteresis across brief dips: a snapshot that merely omits a section
//! (or flags it false) does not clear the alert by itself.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};

use crate::display::{format_duration, Row};
use crate::sniffer::types::Clock;

/// One tracked alert.
#[derive(Debug, Clone, Copy)]
struct Alert {
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// A state transition produced by [`AlertTracker::observe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Triggered {
        section: String,
        hits: u64,
        at: DateTime<Utc>,
    },
    Recovered {
        section: String,
        elapsed: ChronoDuration,
    },
}

impl AlertEvent {
    /// The human-readable alert line for this event.
    pub fn message(&self) -> String {
        match self {
            AlertEvent::Triggered { section, hits, at } => format!(
                "High traffic to {} generated an alert - hits = {}, triggered at {}",
                section,
                hits,
                at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            AlertEvent::Recovered { section, elapsed } => format!(
                "High traffic to {} recovered after {}",
                section,
                format_duration(*elapsed)
            ),
        }
    }
}

/// Per-section idle/alerting state over the lifetime of the process.
pub struct AlertTracker {
    window: ChronoDuration,
    alerts: HashMap<String, Alert>,
    clock: Clock,
}

impl AlertTracker {
    pub fn new(window: ChronoDuration, clock: Clock) -> Self {
        Self {
            window,
            alerts: HashMap::new(),
            clock,
        }
    }

    /// Feeds one snapshot's section rows through the state machine and
    /// returns the transitions: newly-triggered alerts first, then any
    /// recoveries that a full window of silence has earned.
    pub fn observe(&mut self, rows: &[Row]) -> Vec<AlertEvent> {
        let now = (self.clock)();
        let mut events = Vec::new();

        for row in rows.iter().filter(|r| r.is_alerting) {
            match self.alerts.get_mut(&row.section) {
                Some(alert) => alert.last_seen = now,
                None => {
                    self.alerts.insert(
                        row.section.clone(),
                        Alert {
                            first_seen: now,
                            last_seen: now,
                        },
                    );
                    events.push(AlertEvent::Triggered {
                        section: row.section.clone(),
                        hits: row.alert_hits,
                        at: now,
                    });
                }
            }
        }

        let expired: Vec<String> = self
            .alerts
            .iter()
            .filter(|(_, alert)| now - alert.last_seen > self.window)
            .map(|(section, _)| section.clone())
            .collect();
        for section in expired {
            if let Some(alert) = self.alerts.remove(&section) {
                events.push(AlertEvent::Recovered {
                    section,
                    elapsed: now - alert.first_seen,
                });
            }
        }

        events
    }
}
