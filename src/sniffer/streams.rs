//! Stream factory, pairing registry and assembler.
//!
//! The assembler runs on the capture thread and is the only owner of
//! the stream table and the pairing registry. Each new half-flow is
//! classified by the monitored port:
//!
//! - request side (dst port matches): a pending-request queue is
//!   registered under the flow id and a request-parser task is spawned;
//! - response side (src port matches): the queue is looked up; if
//!   present a response-parser task is spawned against it, otherwise
//!   the stream is drained by a dedicated task so the assembler is
//!   never left holding an unread stream.
//!
//! Reassembled bytes reach parser tasks over bounded chunk channels.
//! The assembler never blocks on a parser: when a channel fills, the
//! segment is dropped and a loss marker is queued so the parser sees a
//! framing error instead of silently missing bytes.

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::IpAddr;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::logger::{Event, SharedLogger};
use crate::sniffer::config::{PENDING_REQUEST_CAP, STREAM_CHUNK_CAP};
use crate::sniffer::http::{self, ParsedRequest};
use crate::sniffer::reassembly::StreamBuffer;
use crate::sniffer::types::{Clock, FlowId, RoundTrip, SharedStats};

// ── Chunk transport ──────────────────────────────────────────────────────────

/// One delivery from the assembler to a parser task.
#[derive(Debug)]
pub enum Chunk {
    /// Contiguous reassembled bytes.
    Data(Vec<u8>),
    /// Data was lost ahead of this point (gap never filled, or the
    /// parser fell behind and segments were dropped).
    Gap,
}

/// Blocking `io::Read` view over a chunk channel.
///
/// End-of-stream is the channel disconnecting (the assembler dropped
/// its sender on close). A [`Chunk::Gap`] surfaces as an
/// `InvalidData` read error, which parsers treat as a framing error.
pub struct ChunkReader {
    rx: Receiver<Chunk>,
    current: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    pub fn new(rx: Receiver<Chunk>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.current.len() {
                let n = out.len().min(self.current.len() - self.pos);
                out[..n].copy_from_slice(&self.current[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.rx.recv() {
                Ok(Chunk::Data(data)) => {
                    self.current = data;
                    self.pos = 0;
                }
                Ok(Chunk::Gap) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "bytes lost in reassembly",
                    ))
                }
                Err(_) => return Ok(0),
            }
        }
    }
}

// ── Stream factory & pairing registry ────────────────────────────────────────

/// Creates parser tasks for new half-flows and owns the pairing
/// registry mapping a [`FlowId`] to its pending-request queue.
///
/// Runs only on the assembler thread; the registry has exactly one
/// writer by construction.
pub struct StreamFactory {
    port: u16,
    pending: HashMap<FlowId, Receiver<ParsedRequest>>,
    round_trips: Sender<RoundTrip>,
    clock: Clock,
    logger: SharedLogger,
    stats: SharedStats,
    parsers: Vec<JoinHandle<()>>,
}

impl StreamFactory {
    pub fn new(
        port: u16,
        round_trips: Sender<RoundTrip>,
        clock: Clock,
        logger: SharedLogger,
        stats: SharedStats,
    ) -> Self {
        Self {
            port,
            pending: HashMap::new(),
            round_trips,
            clock,
            logger,
            stats,
            parsers: Vec::new(),
        }
    }

    /// Classifies a new half-flow and spawns its parser task.
    ///
    /// Returns the chunk sender the assembler should deliver the
    /// stream's bytes on, or `None` when neither port matches the
    /// monitored port (the half-flow is not tracked).
    pub fn new_stream(
        &mut self,
        net_src: IpAddr,
        net_dst: IpAddr,
        tcp_src: u16,
        tcp_dst: u16,
    ) -> Option<Sender<Chunk>> {
        if tcp_dst == self.port {
            // Outgoing request side.
            let flow = FlowId {
                peer: net_dst,
                client_port: tcp_src,
            };
            let (req_tx, req_rx) = bounded(PENDING_REQUEST_CAP);
            self.pending.insert(flow.clone(), req_rx);

            let (tx, rx) = bounded(STREAM_CHUNK_CAP);
            let reader = ChunkReader::new(rx);
            let logger = SharedLogger::clone(&self.logger);
            let stats = SharedStats::clone(&self.stats);
            self.stats.streams_opened.fetch_add(1, Ordering::Relaxed);
            self.parsers.push(thread::spawn(move || {
                http::process_requests(reader, req_tx, flow, logger, stats)
            }));
            return Some(tx);
        }

        if tcp_src == self.port {
            // Incoming response side.
            let flow = FlowId {
                peer: net_src,
                client_port: tcp_dst,
            };
            let (tx, rx) = bounded(STREAM_CHUNK_CAP);
            let mut reader = ChunkReader::new(rx);
            self.stats.streams_opened.fetch_add(1, Ordering::Relaxed);

            match self.pending.get(&flow).cloned() {
                Some(queue) => {
                    let round_trips = self.round_trips.clone();
                    let clock = Clock::clone(&self.clock);
                    let stats = SharedStats::clone(&self.stats);
                    self.parsers.push(thread::spawn(move || {
                        http::process_responses(reader, queue, round_trips, clock, stats)
                    }));
                }
                None => {
                    // Half-capture or late start: no request side was
                    // ever seen. The stream still has to be consumed.
                    self.stats.unpaired_responses.fetch_add(1, Ordering::Relaxed);
                    self.logger.log(&Event::UnpairedResponse {
                        flow: &flow.to_string(),
                    });
                    self.parsers
                        .push(thread::spawn(move || http::drain_stream(&mut reader)));
                }
            }
            return Some(tx);
        }

        None
    }

    /// Drops every registered pending queue. Called on close-all so
    /// flow identifiers do not accumulate across flush epochs.
    pub fn evict(&mut self) {
        self.pending.clear();
    }

    /// Waits for all spawned parser tasks to finish.
    pub fn join(&mut self) {
        for handle in self.parsers.drain(..) {
            let _ = handle.join();
        }
    }
}

// ── Assembler ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct SegmentKey {
    src: IpAddr,
    src_port: u16,
    dst: IpAddr,
    dst_port: u16,
}

/// Per-half-flow state: the reassembly buffer plus the channel to its
/// parser task. `tx == None` marks a closed (tombstoned) stream whose
/// late segments are discarded until the next close-all sweep.
struct StreamState {
    buffer: StreamBuffer,
    tx: Option<Sender<Chunk>>,
    gap_pending: bool,
}

impl StreamState {
    fn new(tx: Sender<Chunk>) -> Self {
        Self {
            buffer: StreamBuffer::new(),
            tx: Some(tx),
            gap_pending: false,
        }
    }

    /// Pushes all contiguous bytes to the parser. Never blocks: a full
    /// channel turns the delivery into recorded loss.
    fn deliver(&mut self, stats: &SharedStats) {
        let data = self.buffer.take_contiguous();
        let Some(tx) = &self.tx else {
            return;
        };
        if self.gap_pending {
            match tx.try_send(Chunk::Gap) {
                Ok(()) => self.gap_pending = false,
                Err(TrySendError::Full(_)) => {
                    if !data.is_empty() {
                        stats.reassembly_drops.fetch_add(1, Ordering::Relaxed);
                    }
                    return;
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.tx = None;
                    return;
                }
            }
        }
        if data.is_empty() {
            return;
        }
        match tx.try_send(Chunk::Data(data)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.gap_pending = true;
                stats.reassembly_drops.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => self.tx = None,
        }
    }

    /// Delivers what remains and closes the stream, surfacing stranded
    /// out-of-order data as a loss marker before end-of-stream.
    fn close(&mut self, stats: &SharedStats) {
        self.deliver(stats);
        if let Some(tx) = self.tx.take() {
            if self.buffer.has_pending() || self.gap_pending {
                let _ = tx.try_send(Chunk::Gap);
            }
        }
    }
}

/// Binds reassembly buffers to parser tasks. Single-threaded; driven
/// by the capture loop.
pub struct Assembler {
    factory: StreamFactory,
    streams: HashMap<SegmentKey, StreamState>,
}

impl Assembler {
    pub fn new(factory: StreamFactory) -> Self {
        Self {
            factory,
            streams: HashMap::new(),
        }
    }

    /// Feeds one TCP segment into the matching half-flow, creating the
    /// flow (and its parser task) on first sight.
    #[allow(clippy::too_many_arguments)]
    pub fn handle_segment(
        &mut self,
        src: IpAddr,
        dst: IpAddr,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        syn: bool,
        fin: bool,
        rst: bool,
        payload: &[u8],
        stats: &SharedStats,
    ) {
        let key = SegmentKey {
            src,
            src_port,
            dst,
            dst_port,
        };

        if !self.streams.contains_key(&key) {
            let tx = self.factory.new_stream(src, dst, src_port, dst_port);
            let Some(tx) = tx else {
                return;
            };
            self.streams.insert(key.clone(), StreamState::new(tx));
        }
        let Some(state) = self.streams.get_mut(&key) else {
            return;
        };
        if state.tx.is_none() {
            return;
        }

        if syn {
            state.buffer.set_initial_seq(seq);
            if !payload.is_empty() && !state.buffer.add(seq.wrapping_add(1), payload) {
                state.gap_pending = true;
                stats.reassembly_drops.fetch_add(1, Ordering::Relaxed);
            }
        } else if !payload.is_empty() && !state.buffer.add(seq, payload) {
            state.gap_pending = true;
            stats.reassembly_drops.fetch_add(1, Ordering::Relaxed);
        }

        state.deliver(stats);

        if fin || rst {
            state.close(stats);
        }
    }

    /// Closes every live stream (end-of-stream to all parser tasks),
    /// clears the stream table and evicts the pairing registry.
    pub fn close_all(&mut self, stats: &SharedStats) {
        for state in self.streams.values_mut() {
            state.close(stats);
        }
        self.streams.clear();
        self.factory.evict();
    }

    /// Closes everything and waits for parser tasks to finish.
    pub fn shutdown(mut self, stats: &SharedStats) {
        self.close_all(stats);
        self.factory.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_reader_concatenates_data_chunks() {
        let (tx, rx) = bounded(4);
        tx.send(Chunk::Data(b"hello ".to_vec())).expect("send");
        tx.send(Chunk::Data(b"world".to_vec())).expect("send");
        drop(tx);
        let mut reader = ChunkReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).expect("read");
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn chunk_reader_surfaces_gap_as_error() {
        let (tx, rx) = bounded(4);
        tx.send(Chunk::Data(b"ok".to_vec())).expect("send");
        tx.send(Chunk::Gap).expect("send");
        tx.send(Chunk::Data(b"after".to_vec())).expect("send");
        drop(tx);
        let mut reader = ChunkReader::new(rx);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).expect("data"), 2);
        assert!(reader.read(&mut buf).is_err());
        // Reads continue past the gap.
        assert_eq!(reader.read(&mut buf).expect("data"), 5);
        assert_eq!(reader.read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn chunk_reader_disconnect_is_eof() {
        let (tx, rx) = bounded::<Chunk>(1);
        drop(tx);
        let mut reader = ChunkReader::new(rx);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).expect("eof"), 0);
    }
}
