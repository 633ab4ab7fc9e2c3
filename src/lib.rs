//! httptop: passive, on-host HTTP traffic monitor.
//!
//! Captures TCP packets on a network interface, reassembles flows, pairs
//! HTTP/1.x requests with their responses, aggregates per-section traffic
//! over two sliding windows and raises/clears alerts when a section's
//! hit count crosses a threshold. Reports either as a full-screen
//! terminal dashboard or as an append-only text stream.

pub mod cli;
pub mod debug;
pub mod display;
pub mod logger;
pub mod sniffer;
