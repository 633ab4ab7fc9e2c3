//! Debug counters endpoint.
//!
//! With `--debug`, a background task serves the live session counters
//! as plain text on port 8080. Best-effort: failures to bind or serve
//! are logged and never affect the pipeline.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crate::logger::{Event, SharedLogger};
use crate::sniffer::types::SharedStats;

/// Spawns the debug endpoint listener on `:8080`.
pub fn spawn_stats_server(stats: SharedStats, logger: SharedLogger) -> JoinHandle<()> {
    thread::spawn(move || {
        let listener = match TcpListener::bind("0.0.0.0:8080") {
            Ok(listener) => listener,
            Err(e) => {
                logger.log(&Event::Info {
                    message: &format!("debug endpoint unavailable: {}", e),
                });
                return;
            }
        };
        for stream in listener.incoming() {
            if let Ok(stream) = stream {
                serve(stream, &stats);
            }
        }
    })
}

fn serve(mut stream: TcpStream, stats: &SharedStats) {
    // Consume whatever request line arrived; the reply is the same
    // either way.
    let mut scratch = [0u8; 1024];
    let _ = stream.read(&mut scratch);

    let body = format!(
        "packets_total {}\nstreams_opened {}\nround_trips_total {}\nunpaired_responses {}\nparse_errors {}\nreassembly_drops {}\nalerts_emitted {}\n",
        stats.packets_total.load(Ordering::Relaxed),
        stats.streams_opened.load(Ordering::Relaxed),
        stats.round_trips_total.load(Ordering::Relaxed),
        stats.unpaired_responses.load(Ordering::Relaxed),
        stats.parse_errors.load(Ordering::Relaxed),
        stats.reassembly_drops.load(Ordering::Relaxed),
        stats.alerts_emitted.load(Ordering::Relaxed),
    );
    let _ = write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
}
