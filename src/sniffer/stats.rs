//! Snapshot construction from the per-section logs.

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::display::{Row, Snapshot, GLOBAL_SECTION};
use crate::sniffer::aggregate::SectionLogs;

/// Walks every section log newest-to-oldest and produces the snapshot
/// rows for both windows.
///
/// An entry contributes to the alert counters while it is at most
/// `alert_window` old and additionally to the display counters while it
/// is strictly younger than `display_window`; the walk stops at the
/// first entry past the alert window. Sections whose window is empty
/// are skipped. Rows are ordered by display hits descending, with
/// alerting rows floated to the top without disturbing that order.
pub fn collect(
    logs: &SectionLogs,
    now: DateTime<Utc>,
    display_window: ChronoDuration,
    alert_window: ChronoDuration,
    alert_threshold: u64,
) -> Snapshot {
    let display_epoch = now - display_window;
    let alert_epoch = now - alert_window;

    let mut sections = Vec::with_capacity(logs.len());
    for entry in logs.iter() {
        let mut row = Row {
            section: entry.key().clone(),
            ..Row::default()
        };
        for trip in entry.value().iter().rev() {
            if trip.timestamp < alert_epoch {
                break;
            }
            row.alert_hits += 1;
            row.alert_up += trip.request_size;
            row.alert_down += trip.response_size;
            if trip.timestamp > display_epoch {
                row.display_hits += 1;
                row.display_up += trip.request_size;
                row.display_down += trip.response_size;
            }
        }
        if row.alert_hits == 0 {
            continue;
        }
        row.alert_total = row.alert_up + row.alert_down;
        row.display_total = row.display_up + row.display_down;
        row.is_alerting = row.alert_hits > alert_threshold;
        sections.push(row);
    }

    sections.sort_by(|a, b| b.display_hits.cmp(&a.display_hits));
    sections.sort_by_key(|row| !row.is_alerting);

    Snapshot {
        at: now,
        global: aggregate(&sections),
        sections,
    }
}

/// Element-wise sum of all section rows.
fn aggregate(rows: &[Row]) -> Row {
    let mut global = Row {
        section: GLOBAL_SECTION.to_string(),
        ..Row::default()
    };
    for row in rows {
        global.display_hits += row.display_hits;
        global.display_up += row.display_up;
        global.display_down += row.display_down;
        global.display_total += row.display_total;
        global.alert_hits += row.alert_hits;
        global.alert_up += row.alert_up;
        global.alert_down += row.alert_down;
        global.alert_total += row.alert_total;
    }
    global
}
