//! Round-trip aggregation into per-section sliding logs.
//!
//! A single aggregator task consumes the round-trip channel and is the
//! only writer of the section-log map. The map itself is sharded
//! (`DashMap`) so the stats collector can read entries from the display
//! thread without coordinating with the writer.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;

use crate::sniffer::types::{section_key, RoundTrip};

/// Shared per-section round-trip logs, newest at the back.
pub type SectionLogs = Arc<DashMap<String, VecDeque<RoundTrip>>>;

/// Consumes round trips until the channel closes.
///
/// Each record is appended to its section's log, after which the log is
/// trimmed to the alert window. In dashboard mode a nudge is offered to
/// the display task (dropped when one is already queued).
pub fn run(
    round_trips: Receiver<RoundTrip>,
    logs: SectionLogs,
    alert_window: Duration,
    nudge: Option<Sender<()>>,
) {
    let window = ChronoDuration::seconds(alert_window.as_secs() as i64);
    for trip in round_trips.iter() {
        ingest(&logs, window, trip);
        if let Some(tx) = &nudge {
            let _ = tx.try_send(());
        }
    }
}

/// Appends one record and trims its section log so every entry lies
/// within the alert window counted from the newest record.
pub fn ingest(logs: &SectionLogs, alert_window: ChronoDuration, trip: RoundTrip) {
    let section = section_key(&trip.host, &trip.path);
    let epoch = trip.timestamp - alert_window;
    let mut log = logs.entry(section).or_default();
    log.push_back(trip);
    while let Some(front) = log.front() {
        if front.timestamp < epoch {
            log.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trip(host: &str, path: &str, at_secs: i64) -> RoundTrip {
        RoundTrip {
            host: host.to_string(),
            path: path.to_string(),
            request_size: 100,
            response_size: 200,
            timestamp: Utc.timestamp_opt(at_secs, 0).single().expect("timestamp"),
        }
    }

    #[test]
    fn records_group_by_section() {
        let logs: SectionLogs = Arc::new(DashMap::new());
        let window = ChronoDuration::seconds(120);
        ingest(&logs, window, trip("ex.com", "/a/1", 1000));
        ingest(&logs, window, trip("ex.com", "/a/2", 1001));
        ingest(&logs, window, trip("ex.com", "/b", 1002));
        assert_eq!(logs.get("ex.com/a").expect("section").len(), 2);
        assert_eq!(logs.get("ex.com/b").expect("section").len(), 1);
    }

    #[test]
    fn trim_drops_entries_older_than_alert_window() {
        let logs: SectionLogs = Arc::new(DashMap::new());
        let window = ChronoDuration::seconds(120);
        ingest(&logs, window, trip("ex.com", "/", 1000));
        ingest(&logs, window, trip("ex.com", "/", 1060));
        // 1000 is now more than 120s behind the newest record.
        ingest(&logs, window, trip("ex.com", "/", 1121));
        let log = logs.get("ex.com/").expect("section");
        assert_eq!(log.len(), 2);
        assert!(log.iter().all(|t| t.timestamp.timestamp() >= 1121 - 120));
    }

    #[test]
    fn trim_invariant_holds_after_every_insert() {
        let logs: SectionLogs = Arc::new(DashMap::new());
        let window = ChronoDuration::seconds(60);
        let mut at = 0i64;
        for step in [1, 30, 2, 59, 61, 5, 120, 1, 1, 200].iter() {
            at += step;
            ingest(&logs, window, trip("ex.com", "/p", at));
            let log = logs.get("ex.com/p").expect("section");
            assert!(log
                .iter()
                .all(|t| t.timestamp.timestamp() >= at - 60));
        }
    }
}
