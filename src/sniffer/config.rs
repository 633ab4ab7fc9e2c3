use std::time::Duration;

/// How often the assembler performs a close-all flush.
///
/// Every flush delivers end-of-stream to all parser tasks, so a parser
/// stuck on a half-captured or silent flow is released within this bound.
/// Streams observed after a flush are re-created from their next segment.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// pcap read timeout in milliseconds.
///
/// The capture loop wakes at least this often to observe the shutdown
/// flag and the flush tick even when the wire is silent.
pub const READ_TIMEOUT_MS: i32 = 200;

/// Capture snap length. 1600 bytes covers a full Ethernet MTU frame.
pub const SNAP_LEN: i32 = 1600;

/// Capacity of each per-flow pending-request queue.
///
/// Absorbs pipelined requests awaiting their responses. When full, the
/// request parser blocks, which throttles its stream reads.
pub const PENDING_REQUEST_CAP: usize = 100;

/// Capacity (in chunks) of the channel between the assembler and one
/// parser task.
///
/// This is the per-stream buffer the assembler absorbs backpressure
/// with. When a parser falls this far behind, further segments for its
/// stream are dropped and the loss is surfaced to the parser as a
/// stream error.
pub const STREAM_CHUNK_CAP: usize = 256;

/// Capacity of the round-trip channel between response parsers and the
/// aggregator.
pub const ROUND_TRIP_CAP: usize = 64;

/// Upper bound on buffered bytes while waiting for a complete HTTP
/// message head. A head that exceeds this is treated as malformed.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on bytes held in a stream's out-of-order reassembly
/// buffer. Segments past this bound are dropped and accounted as loss.
pub const MAX_PENDING_BYTES: usize = 256 * 1024;
