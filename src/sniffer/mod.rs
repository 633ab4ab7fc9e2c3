//! The capture-assembly-aggregation pipeline.
//!
//! [`run`] wires everything together: it opens the packet source (live
//! interface or saved capture file), drives the assembler on the
//! calling thread, and spawns the aggregator and display tasks. Data
//! flows packet → assembler → per-stream parser tasks → round-trip
//! channel → aggregator → (periodic) stats collector → alert tracker →
//! display sink.
//!
//! Ownership discipline: the assembler thread owns the stream table and
//! pairing registry; the aggregator is the only writer of the
//! section-log map; the display task owns the sink and the alert
//! tracker. All hand-offs are channels.

pub mod aggregate;
pub mod alerts;
pub mod config;
pub mod http;
pub mod reassembly;
pub mod stats;
pub mod streams;
pub mod types;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use crossbeam_channel::{bounded, never, select, tick, Receiver};
use dashmap::DashMap;
use etherparse::{InternetSlice, SlicedPacket, TransportSlice};
use pcap::{Activated, Capture};
use thiserror::Error;

use crate::display::{Dashboard, Sink, TextSink};
use crate::logger::{Event, SharedLogger};
use crate::sniffer::aggregate::SectionLogs;
use crate::sniffer::alerts::{AlertEvent, AlertTracker};
use crate::sniffer::streams::{Assembler, StreamFactory};
use crate::sniffer::types::{system_clock, SharedStats, ShutdownFlag};

/// Errors that abort startup before the pipeline runs.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("no capture device available")]
    NoDevice,

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("failed to initialize dashboard: {0}")]
    Ui(#[from] std::io::Error),
}

/// Configuration bundle passed from `main` into the pipeline.
pub struct SnifferConfig {
    /// Interface for live capture. Ignored in replay mode.
    pub iface: Option<String>,
    /// Path to a saved capture file, or `None` for live capture.
    pub capture_file: Option<String>,
    /// Monitored TCP port.
    pub port: u16,
    /// Display window size; also the report interval.
    pub display_window: Duration,
    /// Alert window size and alert hysteresis.
    pub alert_window: Duration,
    /// Alert fires when a section's alert-window hits exceed this.
    pub alert_threshold: u64,
    /// Full-screen dashboard instead of the text report.
    pub gui: bool,
    /// Shared structured logger.
    pub logger: SharedLogger,
    /// Shared session statistics.
    pub stats: SharedStats,
    /// Set by the Ctrl-C handler or the dashboard input task.
    pub shutdown: ShutdownFlag,
}

/// Runs the pipeline until shutdown (or end of the capture file).
///
/// Startup failures (device open, BPF compile, dashboard init) are
/// returned before any worker starts. After startup, per-stream errors
/// never propagate here.
pub fn run(cfg: SnifferConfig) -> Result<(), StartupError> {
    let filter = format!("tcp port {}", cfg.port);

    // Open the packet source first so startup errors surface cleanly.
    enum Source {
        Live(Capture<pcap::Active>),
        File(Capture<pcap::Offline>),
    }
    let source = match &cfg.capture_file {
        Some(path) => {
            let mut cap = Capture::from_file(path)?;
            cap.filter(&filter, true)?;
            Source::File(cap)
        }
        None => {
            let iface = match &cfg.iface {
                Some(name) => name.clone(),
                None => return Err(StartupError::NoDevice),
            };
            let mut cap = Capture::from_device(iface.as_str())?
                .promisc(true)
                .snaplen(config::SNAP_LEN)
                .timeout(config::READ_TIMEOUT_MS)
                .open()?;
            cap.filter(&filter, true)?;
            Source::Live(cap)
        }
    };

    let sink: Box<dyn Sink> = if cfg.gui {
        Box::new(Dashboard::new(cfg.display_window, cfg.alert_window)?)
    } else {
        Box::new(TextSink::stdout())
    };

    let (rt_tx, rt_rx) = bounded(config::ROUND_TRIP_CAP);
    let (nudge_tx, nudge_rx) = bounded(1);
    let logs: SectionLogs = Arc::new(DashMap::new());

    let aggregator = {
        let logs = Arc::clone(&logs);
        let alert_window = cfg.alert_window;
        let nudge = cfg.gui.then_some(nudge_tx);
        thread::spawn(move || aggregate::run(rt_rx, logs, alert_window, nudge))
    };

    let display = {
        let logs = Arc::clone(&logs);
        let logger = SharedLogger::clone(&cfg.logger);
        let stats = SharedStats::clone(&cfg.stats);
        let shutdown = ShutdownFlag::clone(&cfg.shutdown);
        let nudge_rx = if cfg.gui { nudge_rx } else { never() };
        let display_window = cfg.display_window;
        let alert_window = cfg.alert_window;
        let threshold = cfg.alert_threshold;
        let log_alerts = cfg.gui;
        thread::spawn(move || {
            display_loop(
                sink,
                logs,
                display_window,
                alert_window,
                threshold,
                nudge_rx,
                shutdown,
                logger,
                stats,
                log_alerts,
            )
        })
    };

    let input = cfg
        .gui
        .then(|| crate::display::spawn_input_thread(ShutdownFlag::clone(&cfg.shutdown)));

    let factory = StreamFactory::new(
        cfg.port,
        rt_tx,
        system_clock(),
        SharedLogger::clone(&cfg.logger),
        SharedStats::clone(&cfg.stats),
    );
    let assembler = Assembler::new(factory);

    match source {
        Source::Live(cap) => capture_loop(cap, assembler, &cfg),
        Source::File(cap) => capture_loop(cap, assembler, &cfg),
    }

    // The round-trip sender is gone once the assembler is; the
    // aggregator drains the channel and exits.
    let _ = aggregator.join();

    cfg.shutdown.store(true, Ordering::SeqCst);
    let _ = display.join();
    if let Some(handle) = input {
        let _ = handle.join();
    }

    Ok(())
}

// ── Capture driver ───────────────────────────────────────────────────────────

/// Pulls packets from the source into the assembler until shutdown (or
/// end of file), flushing with close-all every flush interval so parser
/// tasks never outlive packet silence by more than that bound.
fn capture_loop<T: Activated>(mut cap: Capture<T>, mut asm: Assembler, cfg: &SnifferConfig) {
    let flush = tick(config::FLUSH_INTERVAL);
    while !cfg.shutdown.load(Ordering::Relaxed) {
        if flush.try_recv().is_ok() {
            asm.close_all(&cfg.stats);
        }
        match cap.next_packet() {
            Ok(packet) => {
                cfg.stats.packets_total.fetch_add(1, Ordering::Relaxed);
                handle_packet(packet.data, &mut asm, &cfg.stats);
            }
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(_) => break,
        }
    }
    asm.shutdown(&cfg.stats);
}

/// Slices one captured frame and feeds its TCP segment to the assembler.
/// Non-TCP and non-IPv4 frames are dropped silently.
fn handle_packet(data: &[u8], asm: &mut Assembler, stats: &SharedStats) {
    let sliced = match SlicedPacket::from_ethernet(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    let (src, dst) = match sliced.ip {
        Some(InternetSlice::Ipv4(header, _)) => (
            std::net::IpAddr::V4(header.source_addr()),
            std::net::IpAddr::V4(header.destination_addr()),
        ),
        _ => return,
    };

    let Some(TransportSlice::Tcp(tcp)) = sliced.transport else {
        return;
    };

    asm.handle_segment(
        src,
        dst,
        tcp.source_port(),
        tcp.destination_port(),
        tcp.sequence_number(),
        tcp.syn(),
        tcp.fin(),
        tcp.rst(),
        sliced.payload,
        stats,
    );
}

// ── Display task ─────────────────────────────────────────────────────────────

/// Renders a snapshot on every report tick, plus on each round-trip
/// nudge in dashboard mode. The alert tracker lives here so triggered
/// and recovered events for one section are strictly ordered.
#[allow(clippy::too_many_arguments)]
fn display_loop(
    mut sink: Box<dyn Sink>,
    logs: SectionLogs,
    display_window: Duration,
    alert_window: Duration,
    threshold: u64,
    mut nudge_rx: Receiver<()>,
    shutdown: ShutdownFlag,
    logger: SharedLogger,
    stats: SharedStats,
    log_alerts: bool,
) {
    let ticker = tick(display_window);
    let display_window = ChronoDuration::seconds(display_window.as_secs() as i64);
    let alert_window = ChronoDuration::seconds(alert_window.as_secs() as i64);
    let mut tracker = AlertTracker::new(alert_window, system_clock());

    loop {
        let mut render = false;
        select! {
            recv(ticker) -> _ => render = true,
            recv(nudge_rx) -> msg => match msg {
                Ok(()) => render = true,
                Err(_) => nudge_rx = never(),
            },
            default(Duration::from_millis(200)) => {}
        }

        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        if !render {
            continue;
        }

        let snapshot = stats::collect(
            &logs,
            chrono::Utc::now(),
            display_window,
            alert_window,
            threshold,
        );
        let events = tracker.observe(&snapshot.sections);
        for event in &events {
            stats.alerts_emitted.fetch_add(1, Ordering::Relaxed);
            if log_alerts {
                match event {
                    AlertEvent::Triggered { section, hits, .. } => {
                        logger.log(&Event::AlertTriggered {
                            section,
                            hits: *hits,
                        });
                    }
                    AlertEvent::Recovered { section, elapsed } => {
                        logger.log(&Event::AlertRecovered {
                            section,
                            elapsed_secs: elapsed.num_seconds().max(0) as u64,
                        });
                    }
                }
            }
        }
        sink.update(&snapshot, &events);
    }
}
