//! HTTP/1.x parsing over reassembled byte streams.
//!
//! Parsers run one per half-stream and read from an `io::Read` view of
//! the reassembled flow. Message heads are parsed with `httparse` over
//! an incrementally grown buffer; bodies are consumed (and counted)
//! without being retained, framed by Content-Length, chunked encoding,
//! or end-of-stream for responses that declare neither.
//!
//! Error discipline: a malformed or truncated message ends the parser
//! for that stream only. The remainder of the stream is drained to
//! end-of-stream so the assembler side is never left blocked, and the
//! failure is counted and logged. Nothing propagates past the stream.

use std::io::{self, Read, Write};
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender};
use httparse::{Status, EMPTY_HEADER};

use crate::logger::{Event, SharedLogger};
use crate::sniffer::config::MAX_HEAD_BYTES;
use crate::sniffer::types::{Clock, FlowId, RoundTrip, SharedStats};

/// Maximum number of headers parsed per message.
const MAX_HEADERS: usize = 100;

// ── Parsed request ───────────────────────────────────────────────────────────

/// A parsed HTTP/1.x request awaiting its response.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub uri: String,
    pub version: u8,
    pub host: String,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Body bytes observed on the wire for this request.
    pub body_len: u64,
}

impl ParsedRequest {
    /// Serializes the request head the way it would be written back out.
    fn write_head<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write!(w, "{} {} HTTP/1.{}\r\n", self.method, self.uri, self.version)?;
        for (name, value) in &self.headers {
            write!(w, "{}: ", name)?;
            w.write_all(value)?;
            w.write_all(b"\r\n")?;
        }
        w.write_all(b"\r\n")
    }

    /// Measured request size: the re-serialized head plus the body.
    ///
    /// Re-serializing through a counting sink makes the size
    /// deterministic regardless of how the request was framed on the
    /// wire (pipelining, header folding).
    pub fn size(&self) -> u64 {
        let mut counter = CountingWriter::default();
        let _ = self.write_head(&mut counter);
        counter.count() + self.body_len
    }
}

/// `io::Write` sink that discards data and counts it.
#[derive(Debug, Default)]
pub struct CountingWriter(u64);

impl CountingWriter {
    pub fn count(&self) -> u64 {
        self.0
    }
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Message framing ──────────────────────────────────────────────────────────

/// How the body following a message head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body.
    None,
    /// Exactly this many bytes.
    Length(u64),
    /// Chunked transfer encoding.
    Chunked,
    /// Body runs to end-of-stream (responses only).
    Eof,
}

/// Outcome of attempting to parse a message head from buffered bytes.
pub enum HeadParse<T> {
    /// Head complete; `usize` is the head length in bytes.
    Complete(T, usize),
    /// More bytes needed.
    Partial,
    /// Not a valid HTTP/1.x message.
    Malformed,
}

/// Parses a request head. Does not consume the body.
pub fn parse_request_head(data: &[u8]) -> HeadParse<(ParsedRequest, BodyFraming)> {
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let header_len = match req.parse(data) {
        Ok(Status::Complete(n)) => n,
        Ok(Status::Partial) => return HeadParse::Partial,
        Err(_) => return HeadParse::Malformed,
    };

    let (Some(method), Some(path), Some(version)) = (req.method, req.path, req.version) else {
        return HeadParse::Malformed;
    };

    let mut host = String::new();
    let mut framing = BodyFraming::None;
    let mut kept = Vec::with_capacity(req.headers.len());
    for h in req.headers.iter().filter(|h| !h.name.is_empty()) {
        if h.name.eq_ignore_ascii_case("host") {
            host = String::from_utf8_lossy(h.value).into_owned();
        } else if h.name.eq_ignore_ascii_case("content-length") {
            if let Ok(len) = String::from_utf8_lossy(h.value).trim().parse::<u64>() {
                framing = BodyFraming::Length(len);
            }
        } else if h.name.eq_ignore_ascii_case("transfer-encoding")
            && String::from_utf8_lossy(h.value)
                .to_ascii_lowercase()
                .contains("chunked")
        {
            framing = BodyFraming::Chunked;
        }
        kept.push((h.name.to_string(), h.value.to_vec()));
    }

    let parsed = ParsedRequest {
        method: method.to_string(),
        uri: path.to_string(),
        version,
        host,
        headers: kept,
        body_len: 0,
    };
    HeadParse::Complete((parsed, framing), header_len)
}

/// A parsed response head; only framing and status survive.
#[derive(Debug, Clone, Copy)]
pub struct ResponseHead {
    pub status: u16,
    pub framing: BodyFraming,
}

/// Parses a response head. Responses that declare neither a length nor
/// chunked encoding are delimited by end-of-stream.
pub fn parse_response_head(data: &[u8]) -> HeadParse<ResponseHead> {
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let header_len = match resp.parse(data) {
        Ok(Status::Complete(n)) => n,
        Ok(Status::Partial) => return HeadParse::Partial,
        Err(_) => return HeadParse::Malformed,
    };

    let Some(status) = resp.code else {
        return HeadParse::Malformed;
    };

    let mut framing = BodyFraming::Eof;
    for h in resp.headers.iter().filter(|h| !h.name.is_empty()) {
        if h.name.eq_ignore_ascii_case("content-length") {
            if let Ok(len) = String::from_utf8_lossy(h.value).trim().parse::<u64>() {
                framing = BodyFraming::Length(len);
            }
        } else if h.name.eq_ignore_ascii_case("transfer-encoding")
            && String::from_utf8_lossy(h.value)
                .to_ascii_lowercase()
                .contains("chunked")
        {
            framing = BodyFraming::Chunked;
        }
    }

    HeadParse::Complete(ResponseHead { status, framing }, header_len)
}

// ── Body consumption ─────────────────────────────────────────────────────────

/// Why a body could not be consumed to completion.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyError {
    /// Stream ended (or lost data) before the framing said it should.
    Truncated,
    /// Chunk framing did not parse.
    Malformed,
}

/// One step of chunked-body scanning.
enum ChunkStep {
    NeedMore,
    /// Consume this many buffered bytes; `last` marks the final chunk.
    Consume { bytes: usize, last: bool },
    Malformed,
}

/// Examines the front of `data` for the next complete chunk, including
/// its size line and trailing CRLF. Chunk extensions after `;` are
/// ignored; the terminal chunk swallows any trailers.
fn next_chunk(data: &[u8]) -> ChunkStep {
    let Some(line_end) = data.windows(2).position(|w| w == b"\r\n") else {
        if data.len() > MAX_HEAD_BYTES {
            return ChunkStep::Malformed;
        }
        return ChunkStep::NeedMore;
    };

    let Ok(size_line) = std::str::from_utf8(&data[..line_end]) else {
        return ChunkStep::Malformed;
    };
    let size_part = size_line.split(';').next().unwrap_or(size_line);
    let Ok(chunk_size) = usize::from_str_radix(size_part.trim(), 16) else {
        return ChunkStep::Malformed;
    };

    let body_start = line_end + 2;

    if chunk_size == 0 {
        // Final chunk: bare CRLF, or trailers terminated by CRLFCRLF.
        if data.len() >= body_start + 2 && &data[body_start..body_start + 2] == b"\r\n" {
            return ChunkStep::Consume {
                bytes: body_start + 2,
                last: true,
            };
        }
        if let Some(end) = data[body_start..].windows(4).position(|w| w == b"\r\n\r\n") {
            return ChunkStep::Consume {
                bytes: body_start + end + 4,
                last: true,
            };
        }
        return ChunkStep::NeedMore;
    }

    if data.len() < body_start + chunk_size + 2 {
        return ChunkStep::NeedMore;
    }
    if &data[body_start + chunk_size..body_start + chunk_size + 2] != b"\r\n" {
        return ChunkStep::Malformed;
    }
    ChunkStep::Consume {
        bytes: body_start + chunk_size + 2,
        last: false,
    }
}

/// Consumes one message body from `buf` plus `stream`, returning the
/// number of wire bytes it occupied. `buf` may hold bytes past the body
/// (pipelined messages); those are left in place.
pub fn consume_body<R: Read>(
    framing: BodyFraming,
    buf: &mut Vec<u8>,
    stream: &mut R,
) -> Result<u64, BodyError> {
    let mut scratch = [0u8; 8192];
    match framing {
        BodyFraming::None => Ok(0),
        BodyFraming::Length(len) => {
            let buffered = (buf.len() as u64).min(len) as usize;
            buf.drain(..buffered);
            let mut remaining = len - buffered as u64;
            while remaining > 0 {
                let want = scratch.len().min(remaining as usize);
                match stream.read(&mut scratch[..want]) {
                    Ok(0) | Err(_) => return Err(BodyError::Truncated),
                    Ok(n) => remaining -= n as u64,
                }
            }
            Ok(len)
        }
        BodyFraming::Chunked => {
            let mut total = 0u64;
            loop {
                match next_chunk(buf) {
                    ChunkStep::Consume { bytes, last } => {
                        buf.drain(..bytes);
                        total += bytes as u64;
                        if last {
                            return Ok(total);
                        }
                    }
                    ChunkStep::NeedMore => match stream.read(&mut scratch) {
                        Ok(0) | Err(_) => return Err(BodyError::Truncated),
                        Ok(n) => buf.extend_from_slice(&scratch[..n]),
                    },
                    ChunkStep::Malformed => return Err(BodyError::Malformed),
                }
            }
        }
        BodyFraming::Eof => {
            let mut total = buf.len() as u64;
            buf.clear();
            loop {
                match stream.read(&mut scratch) {
                    Ok(0) => return Ok(total),
                    Ok(n) => total += n as u64,
                    Err(_) => return Err(BodyError::Truncated),
                }
            }
        }
    }
}

/// Reads and discards the rest of a stream so the assembler side is
/// released. Loss markers are swallowed along the way.
pub fn drain_stream<R: Read>(stream: &mut R) {
    let mut sink = [0u8; 4096];
    loop {
        match stream.read(&mut sink) {
            Ok(0) => return,
            Ok(_) | Err(_) => {}
        }
    }
}

// ── Parser tasks ─────────────────────────────────────────────────────────────

/// Request-side parser task: reads HTTP requests off one half-stream
/// and enqueues them for pairing.
///
/// Terminates on clean end-of-stream, when the pairing queue closes, or
/// on the first malformed request (after draining the stream).
pub fn process_requests<R: Read>(
    mut stream: R,
    queue: Sender<ParsedRequest>,
    flow: FlowId,
    logger: SharedLogger,
    stats: SharedStats,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut scratch = [0u8; 8192];
    loop {
        match parse_request_head(&buf) {
            HeadParse::Complete((mut req, framing), header_len) => {
                buf.drain(..header_len);
                match consume_body(framing, &mut buf, &mut stream) {
                    Ok(n) => req.body_len = n,
                    Err(_) => {
                        stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                        drain_stream(&mut stream);
                        return;
                    }
                }
                if queue.send(req).is_err() {
                    drain_stream(&mut stream);
                    return;
                }
            }
            HeadParse::Partial => {
                if buf.len() > MAX_HEAD_BYTES {
                    stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                    drain_stream(&mut stream);
                    return;
                }
                match stream.read(&mut scratch) {
                    Ok(0) => return,
                    Ok(n) => buf.extend_from_slice(&scratch[..n]),
                    Err(_) => {
                        // Reassembly loss; everything past it is unframed.
                        drain_stream(&mut stream);
                        return;
                    }
                }
            }
            HeadParse::Malformed => {
                stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                logger.log(&Event::MalformedRequest {
                    flow: &flow.to_string(),
                });
                drain_stream(&mut stream);
                return;
            }
        }
    }
}

/// Response-side parser task: consumes responses off one half-stream,
/// pairs each with the oldest pending request on the flow (strict FIFO,
/// which is what HTTP/1.x guarantees per connection) and emits a round
/// trip stamped at the moment the response was fully consumed.
///
/// Terminates without emitting when the stream ends mid-response or the
/// pairing queue closes.
pub fn process_responses<R: Read>(
    mut stream: R,
    queue: Receiver<ParsedRequest>,
    round_trips: Sender<RoundTrip>,
    clock: Clock,
    stats: SharedStats,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut scratch = [0u8; 8192];
    loop {
        let (head, header_len) = loop {
            match parse_response_head(&buf) {
                HeadParse::Complete(head, n) => break (head, n),
                HeadParse::Partial => {
                    if buf.len() > MAX_HEAD_BYTES {
                        stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                        drain_stream(&mut stream);
                        return;
                    }
                    match stream.read(&mut scratch) {
                        Ok(0) => return,
                        Ok(n) => buf.extend_from_slice(&scratch[..n]),
                        Err(_) => {
                            drain_stream(&mut stream);
                            return;
                        }
                    }
                }
                HeadParse::Malformed => {
                    stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                    drain_stream(&mut stream);
                    return;
                }
            }
        };
        buf.drain(..header_len);

        let body = match consume_body(head.framing, &mut buf, &mut stream) {
            Ok(n) => n,
            Err(_) => return,
        };
        let response_size = header_len as u64 + body;

        let Ok(request) = queue.recv() else {
            return;
        };

        let trip = RoundTrip {
            host: request.host.clone(),
            path: request.uri.clone(),
            request_size: request.size(),
            response_size,
            timestamp: clock(),
        };
        if round_trips.send(trip).is_err() {
            return;
        }
        stats.round_trips_total.fetch_add(1, Ordering::Relaxed);
    }
}
