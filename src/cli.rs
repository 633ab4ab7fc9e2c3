use clap::Parser;

/// httptop: passive per-section HTTP traffic monitor.
///
/// Observes TCP traffic on one port, reassembles flows, pairs HTTP
/// requests with responses and reports per-section traffic over a short
/// display window and a longer alert window.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "httptop",
    version = "0.1.0",
    about   = "Passive per-section HTTP traffic monitor",
    long_about = None,
)]
pub struct Cli {
    // ── Capture ──────────────────────────────────────────────────────────────

    /// Network interface to capture on.
    ///
    /// If omitted, the first non-loopback IPv4 interface is used. Use
    /// `ip link` or `ifconfig` to list available interfaces.
    #[arg(short = 'i', long = "iface", value_name = "IFACE")]
    pub iface: Option<String>,

    /// TCP port whose HTTP traffic is monitored.
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = 80)]
    pub port: u16,

    /// Read packets from a saved capture file instead of a live interface.
    ///
    /// The same pipeline runs over the file; the process exits when the
    /// file is exhausted or on Ctrl-C.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub capture_file: Option<String>,

    // ── Windows & alerting ───────────────────────────────────────────────────

    /// Size of the sliding window the headline counters cover, in
    /// seconds. Also the report interval.
    #[arg(long = "display-window", value_name = "SECS", default_value_t = 10)]
    pub display_window: u64,

    /// Size of the sliding window alerts are evaluated over, in seconds.
    ///
    /// Also the hysteresis: an alerting section recovers only after
    /// this much silence.
    #[arg(long = "alert-window", value_name = "SECS", default_value_t = 120)]
    pub alert_window: u64,

    /// An alert fires when a section's alert-window hit count exceeds
    /// this threshold.
    #[arg(long = "alert-threshold", value_name = "N", default_value_t = 100)]
    pub alert_threshold: u64,

    // ── Output ───────────────────────────────────────────────────────────────

    /// Render a full-screen dashboard instead of the append-only text
    /// report. Quit with `q` or Ctrl-C.
    #[arg(long = "gui")]
    pub gui: bool,

    /// Write log events to this file in addition to stdout.
    ///
    /// The file is created if it does not exist and appended to if it
    /// does. JSON mode (--json) affects the format written here as well.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log events as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    // ── Debugging ────────────────────────────────────────────────────────────

    /// Serve a plain-text counters endpoint on :8080 for debugging.
    #[arg(long = "debug")]
    pub debug: bool,
}
