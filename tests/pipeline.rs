//! End-to-end pipeline scenarios: synthetic TCP segments in, round
//! trips and alert transitions out.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use crossbeam_channel::{bounded, Receiver};

use httptop::logger::Logger;
use httptop::sniffer::aggregate::{self, SectionLogs};
use httptop::sniffer::alerts::{AlertEvent, AlertTracker};
use httptop::sniffer::stats::collect;
use httptop::sniffer::streams::{Assembler, StreamFactory};
use httptop::sniffer::types::{system_clock, Clock, RoundTrip, SessionStats, SharedStats};

const PORT: u16 = 80;

fn client_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))
}

fn server_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34))
}

fn harness() -> (Assembler, Receiver<RoundTrip>, SharedStats) {
    let (rt_tx, rt_rx) = bounded(64);
    let stats = SessionStats::new();
    let logger = Arc::new(Logger::new(false, None, false).expect("logger"));
    let factory = StreamFactory::new(
        PORT,
        rt_tx,
        system_clock(),
        logger,
        Arc::clone(&stats),
    );
    (Assembler::new(factory), rt_rx, stats)
}

/// Client→server segment on the given ephemeral port.
fn send_request_side(
    asm: &mut Assembler,
    stats: &SharedStats,
    client_port: u16,
    seq: u32,
    syn: bool,
    payload: &[u8],
) {
    asm.handle_segment(
        client_ip(),
        server_ip(),
        client_port,
        PORT,
        seq,
        syn,
        false,
        false,
        payload,
        stats,
    );
}

/// Server→client segment toward the given ephemeral port.
fn send_response_side(
    asm: &mut Assembler,
    stats: &SharedStats,
    client_port: u16,
    seq: u32,
    syn: bool,
    payload: &[u8],
) {
    asm.handle_segment(
        server_ip(),
        client_ip(),
        PORT,
        client_port,
        seq,
        syn,
        false,
        false,
        payload,
        stats,
    );
}

fn get(path: &str) -> String {
    format!("GET {} HTTP/1.1\r\nHost: ex.com\r\n\r\n", path)
}

fn response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
        body.len(),
        body
    )
}

#[test]
fn pipelined_requests_pair_with_responses_in_fifo_order() {
    let (mut asm, rt_rx, stats) = harness();

    let requests = format!("{}{}{}", get("/one"), get("/two"), get("/three"));
    send_request_side(&mut asm, &stats, 40001, 0, true, b"");
    send_request_side(&mut asm, &stats, 40001, 1, false, requests.as_bytes());

    let responses = format!("{}{}{}", response("a"), response("bb"), response("ccc"));
    send_response_side(&mut asm, &stats, 40001, 500, true, b"");
    send_response_side(&mut asm, &stats, 40001, 501, false, responses.as_bytes());

    asm.shutdown(&stats);
    let trips: Vec<RoundTrip> = rt_rx.iter().collect();

    assert_eq!(trips.len(), 3);
    let paths: Vec<&str> = trips.iter().map(|t| t.path.as_str()).collect();
    assert_eq!(paths, vec!["/one", "/two", "/three"]);
    // Content-Length framing: head is 38 bytes, bodies 1, 2, 3.
    assert_eq!(trips[0].response_size, 39);
    assert_eq!(trips[1].response_size, 40);
    assert_eq!(trips[2].response_size, 41);
    // Request size is the re-serialized wire size.
    assert_eq!(trips[0].request_size, get("/one").len() as u64);
    assert!(trips.iter().all(|t| t.host == "ex.com"));
}

#[test]
fn out_of_order_segments_still_produce_round_trips() {
    let (mut asm, rt_rx, stats) = harness();

    let request = get("/reordered");
    let (first, second) = request.as_bytes().split_at(10);
    send_request_side(&mut asm, &stats, 40002, 0, true, b"");
    // Second half arrives before the first.
    send_request_side(&mut asm, &stats, 40002, 11, false, second);
    send_request_side(&mut asm, &stats, 40002, 1, false, first);

    send_response_side(&mut asm, &stats, 40002, 900, true, b"");
    send_response_side(&mut asm, &stats, 40002, 901, false, response("ok").as_bytes());

    asm.shutdown(&stats);
    let trips: Vec<RoundTrip> = rt_rx.iter().collect();
    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].path, "/reordered");
}

#[test]
fn unpaired_response_is_drained_without_blocking_other_flows() {
    let (mut asm, rt_rx, stats) = harness();

    // Response-side stream with no request side ever seen.
    send_response_side(&mut asm, &stats, 50000, 100, true, b"");
    send_response_side(
        &mut asm,
        &stats,
        50000,
        101,
        false,
        response("orphan").as_bytes(),
    );

    // A properly paired flow keeps working.
    send_request_side(&mut asm, &stats, 40003, 0, true, b"");
    send_request_side(&mut asm, &stats, 40003, 1, false, get("/fine").as_bytes());
    send_response_side(&mut asm, &stats, 40003, 700, true, b"");
    send_response_side(&mut asm, &stats, 40003, 701, false, response("yes").as_bytes());

    asm.shutdown(&stats);
    let trips: Vec<RoundTrip> = rt_rx.iter().collect();

    assert_eq!(trips.len(), 1);
    assert_eq!(trips[0].path, "/fine");
    assert_eq!(stats.unpaired_responses.load(Ordering::Relaxed), 1);
}

#[test]
fn malformed_request_ends_its_stream_but_not_the_pipeline() {
    let (mut asm, rt_rx, stats) = harness();

    // First request valid, second malformed.
    let mut wire = get("/good").into_bytes();
    wire.extend_from_slice(b"\x13\x37 this is not http\r\n\r\n");
    send_request_side(&mut asm, &stats, 40004, 0, true, b"");
    send_request_side(&mut asm, &stats, 40004, 1, false, &wire);

    let responses = format!("{}{}", response("one"), response("two"));
    send_response_side(&mut asm, &stats, 40004, 300, true, b"");
    send_response_side(&mut asm, &stats, 40004, 301, false, responses.as_bytes());

    // An unrelated flow is unaffected.
    send_request_side(&mut asm, &stats, 40005, 0, true, b"");
    send_request_side(&mut asm, &stats, 40005, 1, false, get("/other").as_bytes());
    send_response_side(&mut asm, &stats, 40005, 800, true, b"");
    send_response_side(&mut asm, &stats, 40005, 801, false, response("ok").as_bytes());

    asm.shutdown(&stats);
    let mut paths: Vec<String> = rt_rx.iter().map(|t| t.path).collect();
    paths.sort();

    // The first round trip on the broken flow still pairs; the second
    // response finds its queue closed and emits nothing.
    assert_eq!(paths, vec!["/good", "/other"]);
    assert_eq!(stats.parse_errors.load(Ordering::Relaxed), 1);
}

#[test]
fn keep_alive_flow_yields_one_trip_per_exchange() {
    let (mut asm, rt_rx, stats) = harness();

    send_request_side(&mut asm, &stats, 40006, 0, true, b"");
    send_response_side(&mut asm, &stats, 40006, 600, true, b"");

    // Three sequential exchanges over one connection.
    let mut req_seq = 1u32;
    let mut resp_seq = 601u32;
    for path in ["/a/1", "/a/2", "/b/1"] {
        let request = get(path);
        send_request_side(&mut asm, &stats, 40006, req_seq, false, request.as_bytes());
        req_seq += request.len() as u32;

        let reply = response("body");
        send_response_side(&mut asm, &stats, 40006, resp_seq, false, reply.as_bytes());
        resp_seq += reply.len() as u32;
    }

    asm.shutdown(&stats);
    let trips: Vec<RoundTrip> = rt_rx.iter().collect();
    assert_eq!(trips.len(), 3);
    assert_eq!(stats.round_trips_total.load(Ordering::Relaxed), 3);
}

// ── Windowing & alerting scenarios ───────────────────────────────────────────

fn fake_clock(start_secs: i64) -> (Clock, Arc<Mutex<i64>>) {
    let state = Arc::new(Mutex::new(start_secs));
    let view = Arc::clone(&state);
    let clock: Clock = Arc::new(move || {
        let secs = *view.lock().expect("clock state");
        Utc.timestamp_opt(secs, 0).single().expect("timestamp")
    });
    (clock, state)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("timestamp")
}

fn feed_section(logs: &SectionLogs, host: &str, path: &str, when: i64) {
    aggregate::ingest(
        logs,
        ChronoDuration::seconds(120),
        RoundTrip {
            host: host.to_string(),
            path: path.to_string(),
            request_size: 10,
            response_size: 20,
            timestamp: at(when),
        },
    );
}

#[test]
fn alert_triggers_then_recovers_after_window_of_silence() {
    let logs: SectionLogs = Arc::new(dashmap::DashMap::new());
    let (clock, time) = fake_clock(10_000);
    let mut tracker = AlertTracker::new(ChronoDuration::seconds(120), clock);
    let display = ChronoDuration::seconds(10);
    let alert = ChronoDuration::seconds(120);

    // 101 round trips inside the alert window with threshold 100.
    for i in 0..101 {
        feed_section(&logs, "ex.com", "/", 9_900 + i);
    }

    let snap = collect(&logs, at(10_000), display, alert, 100);
    assert!(snap.sections[0].is_alerting);
    let events = tracker.observe(&snap.sections);
    assert_eq!(events.len(), 1);
    assert!(events[0].message().starts_with(
        "High traffic to ex.com/ generated an alert - hits = 101, triggered at "
    ));

    // Quiet for less than the window: no recovery, no re-trigger.
    *time.lock().expect("clock") = 10_060;
    let snap = collect(&logs, at(10_060), display, alert, 100);
    let events = tracker.observe(&snap.sections);
    assert!(events.is_empty());

    // A full window of silence recovers exactly once.
    *time.lock().expect("clock") = 10_125;
    let snap = collect(&logs, at(10_125), display, alert, 100);
    assert!(snap.sections.iter().all(|r| !r.is_alerting));
    let events = tracker.observe(&snap.sections);
    assert_eq!(events.len(), 1);
    match &events[0] {
        AlertEvent::Recovered { section, .. } => assert_eq!(section, "ex.com/"),
        other => panic!("expected recovery, got {:?}", other),
    }

    // And stays quiet afterwards.
    *time.lock().expect("clock") = 10_300;
    let snap = collect(&logs, at(10_300), display, alert, 100);
    assert!(tracker.observe(&snap.sections).is_empty());
}

#[test]
fn snapshot_global_row_matches_section_sums_end_to_end() {
    let logs: SectionLogs = Arc::new(dashmap::DashMap::new());
    for i in 0..7 {
        feed_section(&logs, "a.com", "/x/1", 5_000 - i);
    }
    for i in 0..3 {
        feed_section(&logs, "b.com", "/", 5_000 - i * 30);
    }

    let snap = collect(
        &logs,
        at(5_000),
        ChronoDuration::seconds(10),
        ChronoDuration::seconds(120),
        100,
    );
    let sum_hits: u64 = snap.sections.iter().map(|r| r.alert_hits).sum();
    let sum_total: u64 = snap.sections.iter().map(|r| r.alert_total).sum();
    assert_eq!(snap.global.alert_hits, sum_hits);
    assert_eq!(snap.global.alert_total, sum_total);
    assert_eq!(snap.global.alert_hits, 10);
    assert_eq!(snap.global.alert_total, 10 * 30);
}

#[test]
fn section_logs_never_hold_entries_past_the_alert_window() {
    let logs: SectionLogs = Arc::new(dashmap::DashMap::new());
    let mut now = 1_000i64;
    for gap in [1, 5, 119, 121, 1, 400, 2, 2, 60, 61] {
        now += gap;
        feed_section(&logs, "ex.com", "/p/q", now);
        let log = logs.get("ex.com/p").expect("section");
        assert!(log.iter().all(|t| t.timestamp >= at(now - 120)));
    }
}
