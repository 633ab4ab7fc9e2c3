//! Full-screen dashboard.
//!
//! Renders each snapshot as a table filling the terminal: a header row
//! naming both windows, the global row, then the per-section rows with
//! alerting sections on a red background. Alert transition events are
//! not printed here; the row styling carries the same information.

use std::io::{self, Stdout};
use std::time::Duration;

use crossterm::event::{self, Event as TermEvent, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use tui::backend::CrosstermBackend;
use tui::layout::Constraint;
use tui::style::{Color, Modifier, Style};
use tui::widgets::{Block, Borders, Row as TableRow, Table};
use tui::Terminal;

use crate::display::{format_bytes, format_duration, Row, Sink, Snapshot};
use crate::sniffer::alerts::AlertEvent;
use crate::sniffer::types::ShutdownFlag;

use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

pub struct Dashboard {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    headers: Vec<String>,
}

impl Dashboard {
    /// Switches the terminal to raw mode + alternate screen and builds
    /// the table headers from the configured windows.
    pub fn new(display_window: Duration, alert_window: Duration) -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

        let d = format_duration(chrono::Duration::seconds(display_window.as_secs() as i64));
        let a = format_duration(chrono::Duration::seconds(alert_window.as_secs() as i64));
        let headers = vec![
            "SECTION".to_string(),
            format!("HITS ({})", d),
            format!("HITS ({})", a),
            format!("TOTAL ({})", d),
            format!("TOTAL ({})", a),
            format!("DOWN ({})", d),
            format!("DOWN ({})", a),
            format!("UP ({})", d),
            format!("UP ({})", a),
        ];

        Ok(Self { terminal, headers })
    }

    fn cells(row: &Row) -> Vec<String> {
        vec![
            row.section.clone(),
            row.display_hits.to_string(),
            row.alert_hits.to_string(),
            format_bytes(row.display_total),
            format_bytes(row.alert_total),
            format_bytes(row.display_down),
            format_bytes(row.alert_down),
            format_bytes(row.display_up),
            format_bytes(row.alert_up),
        ]
    }

    fn style(alerting: bool) -> Style {
        if alerting {
            Style::default()
                .fg(Color::White)
                .bg(Color::Red)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
                .fg(Color::White)
                .add_modifier(Modifier::BOLD)
        }
    }
}

impl Sink for Dashboard {
    fn update(&mut self, snapshot: &Snapshot, _events: &[AlertEvent]) {
        let headers = self.headers.clone();
        let _ = self.terminal.draw(|frame| {
            // Style travels with its row, so alerting highlights always
            // land on the section that earned them.
            let mut rows = Vec::with_capacity(snapshot.sections.len() + 1);
            rows.push(TableRow::new(Dashboard::cells(&snapshot.global)).style(Self::style(false)));
            for section in &snapshot.sections {
                rows.push(
                    TableRow::new(Dashboard::cells(section))
                        .style(Self::style(section.is_alerting)),
                );
            }

            let widths = [
                Constraint::Percentage(20),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
                Constraint::Percentage(10),
            ];
            let table = Table::new(rows)
                .header(TableRow::new(headers).style(Style::default().fg(Color::White)))
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_style(Style::default().fg(Color::Green)),
                )
                .widths(&widths)
                .column_spacing(1);

            frame.render_widget(table, frame.size());
        });
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}

/// Watches keyboard input while the dashboard is up and flips the
/// shutdown flag on `q` or Ctrl-C (raw mode swallows the signal, so
/// Ctrl-C arrives as a key event here).
pub fn spawn_input_thread(shutdown: ShutdownFlag) -> JoinHandle<()> {
    thread::spawn(move || loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        match event::poll(Duration::from_millis(200)) {
            Ok(true) => {
                if let Ok(TermEvent::Key(key)) = event::read() {
                    let ctrl_c = key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL);
                    if key.code == KeyCode::Char('q') || ctrl_c {
                        shutdown.store(true, Ordering::SeqCst);
                        return;
                    }
                }
            }
            Ok(false) => {}
            Err(_) => return,
        }
    })
}
