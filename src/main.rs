use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use get_if_addrs::{get_if_addrs, IfAddr};

use httptop::cli::Cli;
use httptop::debug;
use httptop::logger::{Event, Logger, SharedLogger};
use httptop::sniffer::types::{SessionStats, SharedStats, ShutdownFlag};
use httptop::sniffer::{self, SnifferConfig};

fn main() {
    let cli = Cli::parse();

    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    let session_start = Instant::now();

    let logger: SharedLogger =
        match Logger::new(cli.json, cli.log_file.as_deref(), !cli.gui) {
            Ok(logger) => Arc::new(logger),
            Err(e) => {
                eprintln!("cannot open log file: {}", e);
                process::exit(1);
            }
        };

    let stats = SessionStats::new();

    if cli.debug {
        debug::spawn_stats_server(Arc::clone(&stats), Arc::clone(&logger));
    }

    register_shutdown_handler(Arc::clone(&shutdown));

    // Resolve the capture interface up front so a bad selection fails
    // fast. Replay mode needs no interface at all.
    let iface = if cli.capture_file.is_none() {
        match cli.iface.clone().or_else(default_iface) {
            Some(name) => {
                logger.log(&Event::Info {
                    message: &format!("capturing on {} (tcp port {})", name, cli.port),
                });
                Some(name)
            }
            None => {
                eprintln!("no usable capture interface found");
                process::exit(1);
            }
        }
    } else {
        None
    };

    let cfg = SnifferConfig {
        iface,
        capture_file: cli.capture_file.clone(),
        port: cli.port,
        display_window: Duration::from_secs(cli.display_window),
        alert_window: Duration::from_secs(cli.alert_window),
        alert_threshold: cli.alert_threshold,
        gui: cli.gui,
        logger: Arc::clone(&logger),
        stats: Arc::clone(&stats),
        shutdown: Arc::clone(&shutdown),
    };

    if let Err(e) = sniffer::run(cfg) {
        eprintln!("httptop: {}", e);
        process::exit(1);
    }

    print_summary(&logger, &stats, session_start);
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Registers a signal handler for graceful shutdown on Ctrl+C.
fn register_shutdown_handler(shutdown: ShutdownFlag) {
    let _ = ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    });
}

/// Picks the first non-loopback, non-link-local IPv4 interface.
fn default_iface() -> Option<String> {
    for iface in get_if_addrs().ok()? {
        if let IfAddr::V4(v4) = &iface.addr {
            let ip = v4.ip;
            if ip.is_loopback() || ip.is_link_local() {
                continue;
            }
            return Some(iface.name);
        }
    }
    None
}

/// Emits the end-of-session counters.
fn print_summary(logger: &SharedLogger, stats: &SharedStats, session_start: Instant) {
    logger.log(&Event::SessionSummary {
        duration_secs: session_start.elapsed().as_secs(),
        packets_total: stats.packets_total.load(Ordering::Relaxed),
        streams_opened: stats.streams_opened.load(Ordering::Relaxed),
        round_trips_total: stats.round_trips_total.load(Ordering::Relaxed),
        unpaired_responses: stats.unpaired_responses.load(Ordering::Relaxed),
        parse_errors: stats.parse_errors.load(Ordering::Relaxed),
        reassembly_drops: stats.reassembly_drops.load(Ordering::Relaxed),
        alerts_emitted: stats.alerts_emitted.load(Ordering::Relaxed),
    });
}
