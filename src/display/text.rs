//! Append-only text report.

use std::io::{self, Write};

use crate::display::{format_bytes, Row, Sink, Snapshot};
use crate::sniffer::alerts::AlertEvent;

/// Writes each snapshot as a tab-separated block: a header line, the
/// global row, every section with display traffic, any alert lines from
/// this update, and a trailing blank line.
pub struct TextSink {
    out: Box<dyn Write + Send>,
}

impl TextSink {
    /// Sink writing to stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Sink writing to an arbitrary stream.
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    fn write_row(&mut self, row: &Row) {
        let _ = writeln!(
            self.out,
            "{}\t{}\t{}\t{}\t{}",
            row.display_hits,
            format_bytes(row.display_total),
            format_bytes(row.display_down),
            format_bytes(row.display_up),
            row.section,
        );
    }
}

impl Sink for TextSink {
    fn update(&mut self, snapshot: &Snapshot, events: &[AlertEvent]) {
        let _ = writeln!(self.out, "HITS\tTotal\tDown\tUp\tSection");
        self.write_row(&snapshot.global);
        for row in snapshot.sections.iter().filter(|r| r.display_hits > 0) {
            self.write_row(row);
        }
        for event in events {
            let _ = writeln!(self.out, "{}", event.message());
        }
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }
}
