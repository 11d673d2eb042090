//! # Print Scenarios
//!
//! End-to-end prints against the scripted mock printer: encoding, chunking,
//! flow control, retries, link loss, cancellation and the job queue.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use peripage::encode::{self, ChunkConfig, CommandFrame, EncodeOptions, FrameChunker, LINK_HEADER_OVERHEAD};
use peripage::error::{ConnectionError, EncodingError, SessionBusyError};
use peripage::job::{CancelToken, FailureKind, JobControl, JobResult, PrintJobController, QueuePolicy, SessionHandle};
use peripage::protocol::commands::ACK;
use peripage::render::MonochromeRaster;
use peripage::transport::mock::{MockPrinter, Response};
use peripage::transport::{AckMode, Session, SessionConfig, SessionState};
use peripage::PeripageError;
use pretty_assertions::assert_eq;

/// Deterministic pattern with both runs and noise.
fn test_raster(width: u32, height: u32) -> MonochromeRaster {
    MonochromeRaster::from_fn(width, height, |x, y| (x / 3 + y * 7) % 5 < 2 || (x * y) % 11 == 0)
}

fn band_options(band_height: u16) -> EncodeOptions {
    EncodeOptions {
        band_height,
        ..Default::default()
    }
}

fn connected(printer: &MockPrinter, config: SessionConfig) -> Session {
    let mut session = Session::new(config).unwrap();
    session.connect(&mut printer.connector(), "04:7F:0E:B0:CA:57").unwrap();
    session
}

fn explicit(window: usize, retries: u32) -> SessionConfig {
    SessionConfig {
        ack_mode: AckMode::Explicit,
        window,
        retries,
        ..SessionConfig::immediate()
    }
}

fn frame_bytes(frames: &[CommandFrame]) -> Vec<u8> {
    frames.iter().flat_map(|f| f.payload().to_vec()).collect()
}

fn packet_lengths(raster: &MonochromeRaster, options: &EncodeOptions, mtu: usize) -> Vec<usize> {
    let frames = encode::encode(raster, options).unwrap();
    let chunker = FrameChunker::new(&frames, ChunkConfig::new(mtu)).unwrap();
    chunker.iter().map(|p| p.len()).collect()
}

// ============================================================================
// ENCODING AND CHUNKING
// ============================================================================

#[test]
fn test_chunked_stream_reassembles_frames() {
    for compress in [false, true] {
        let options = EncodeOptions {
            compress,
            ..band_options(8)
        };
        let frames = encode::encode(&test_raster(256, 40), &options).unwrap();
        let chunker = FrameChunker::new(&frames, ChunkConfig::new(61)).unwrap();

        let stream: Vec<u8> = chunker.iter().flat_map(|p| p.payload).collect();
        assert_eq!(stream, frame_bytes(&frames));

        // Every frame is recoverable from its own spans
        let mut rebuilt = vec![Vec::new(); frames.len()];
        for packet in &chunker {
            let mut cursor = 0;
            for span in &packet.spans {
                assert_eq!(span.offset, rebuilt[span.frame].len());
                rebuilt[span.frame].extend_from_slice(&packet.payload[cursor..cursor + span.len]);
                cursor += span.len;
            }
            assert_eq!(cursor, packet.len());
        }
        for (frame, bytes) in frames.iter().zip(&rebuilt) {
            assert_eq!(frame.payload(), &bytes[..]);
        }
    }
}

#[test]
fn test_invalid_rasters_produce_no_frames() {
    let cases = [
        (MonochromeRaster::blank(100, 10), "unaligned width"),
        (MonochromeRaster::blank(64, 0), "zero height"),
    ];
    for (raster, case) in cases {
        let result = encode::encode(&raster, &EncodeOptions::default());
        assert!(
            matches!(result, Err(PeripageError::Encoding(_))),
            "{} should be rejected",
            case
        );
    }

    let options = EncodeOptions {
        max_width: Some(384),
        ..Default::default()
    };
    assert!(matches!(
        encode::encode(&MonochromeRaster::blank(576, 4), &options),
        Err(PeripageError::Encoding(EncodingError::TooWide { width: 576, max: 384 }))
    ));
}

#[test]
fn test_packet_count_matches_formula() {
    let raster = test_raster(256, 40);
    let options = band_options(8);
    let total = frame_bytes(&encode::encode(&raster, &options).unwrap()).len();

    for mtu in [LINK_HEADER_OVERHEAD + 1, 20, 64, 182, 512, 4096] {
        let lengths = packet_lengths(&raster, &options, mtu);
        let payload = mtu - LINK_HEADER_OVERHEAD;

        assert_eq!(lengths.len(), total.div_ceil(payload), "mtu {}", mtu);
        let (last, full) = lengths.split_last().unwrap();
        assert!(full.iter().all(|&n| n == payload), "mtu {}", mtu);
        assert!(*last >= 1 && *last <= payload);
    }
}

// ============================================================================
// SESSION LIFECYCLE
// ============================================================================

#[test]
fn test_connect_outcomes() {
    let printer = MockPrinter::new();
    let session = connected(&printer, SessionConfig::immediate());
    assert_eq!(session.state(), SessionState::Streaming);
    assert!(session.history().contains(&SessionState::Handshaking));

    let silent = MockPrinter::new().reply_to(peripage::protocol::commands::DeviceQuery::Name, None);
    let mut session = Session::new(SessionConfig {
        handshake_timeout: Duration::from_millis(20),
        ..SessionConfig::immediate()
    }).unwrap();
    let err = session.connect(&mut silent.connector(), "mock").unwrap_err();
    assert!(matches!(err, ConnectionError::HandshakeTimeout(_)));
    assert_eq!(session.state(), SessionState::Faulted);
    assert!(session.history().contains(&SessionState::Handshaking));
}

#[test]
fn test_window_blocks_until_ack() {
    let printer = MockPrinter::new();
    let config = SessionConfig {
        ack_timeout: Duration::from_secs(5),
        ..explicit(2, 2)
    };
    let mut session = connected(&printer, config);

    let frames = vec![CommandFrame::feed(1); 4];
    let packets: Vec<_> = FrameChunker::new(&frames, ChunkConfig::new(LINK_HEADER_OVERHEAD + 3))
        .unwrap()
        .iter()
        .collect();
    assert_eq!(packets.len(), 4);

    let sender = thread::spawn(move || {
        let mut acked = Vec::new();
        for packet in &packets {
            acked.extend(session.send(packet).unwrap());
        }
        acked.extend(session.flush().unwrap());
        acked
    });

    // Two packets go out, then the sender waits for the oldest
    assert!(printer.wait_for_data_writes(2, Duration::from_secs(2)));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(printer.data_write_count(), 2);

    // One ack frees one slot
    printer.push_reply(&[ACK]);
    assert!(printer.wait_for_data_writes(3, Duration::from_secs(2)));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(printer.data_write_count(), 3);

    printer.push_reply(&[ACK]);
    printer.push_reply(&[ACK, ACK]);
    let acked = sender.join().unwrap();

    let indices: Vec<usize> = acked.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(printer.data_write_count(), 4);
}

// ============================================================================
// PRINT JOBS
// ============================================================================

#[test]
fn test_full_print_succeeds() {
    let raster = test_raster(256, 40);
    let options = band_options(8);
    let frames = encode::encode(&raster, &options).unwrap();
    assert_eq!(frames.len(), 7);
    let expected = frame_bytes(&frames);

    let implicit = (MockPrinter::new(), SessionConfig::immediate());
    let acking = (MockPrinter::new().acking(), explicit(1, 2));

    for (printer, config) in [implicit, acking] {
        let mut session = connected(&printer, config);
        let controller = PrintJobController::new(options.clone(), ChunkConfig::new(182));

        let job = controller.print_image(&raster, &mut session, &JobControl::new());

        assert_eq!(job.result, JobResult::Success);
        assert_eq!(job.total_bytes, expected.len());
        assert_eq!(job.bytes_acked, expected.len());
        assert_eq!(printer.data_writes().concat(), expected);
        assert_eq!(session.state(), SessionState::Streaming);

        session.finish().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }
}

#[test]
fn test_nack_below_retry_limit_is_delivered_once() {
    let printer = MockPrinter::new().on_data(|n, _| if n == 3 { Response::nak() } else { Response::ack() });
    let mut session = connected(&printer, explicit(1, 2));
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let job = controller.print_image(&raster, &mut session, &JobControl::new());
    let packets = packet_lengths(&raster, &band_options(8), 182);

    assert_eq!(job.result, JobResult::Success);
    assert_eq!(job.packets_acked, packets.len());
    assert_eq!(job.bytes_acked, packets.iter().sum::<usize>());
    // Packet 3 went out twice
    let writes = printer.data_writes();
    assert_eq!(writes.len(), packets.len() + 1);
    assert_eq!(writes[3], writes[4]);
}

#[test]
fn test_nack_at_retry_limit_fails_job() {
    let printer = MockPrinter::new().on_data(|n, _| {
        if n == 3 || n == 4 { Response::nak() } else { Response::ack() }
    });
    let mut session = connected(&printer, explicit(1, 2));
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let job = controller.print_image(&raster, &mut session, &JobControl::new());
    let packets = packet_lengths(&raster, &band_options(8), 182);

    assert_eq!(job.result.failure_kind(), Some(FailureKind::Nack));
    assert_eq!(job.packets_acked, 3);
    assert_eq!(job.bytes_acked, packets[..3].iter().sum::<usize>());
    assert_eq!(session.state(), SessionState::Streaming);
}

#[test]
fn test_link_drop_on_third_packet() {
    let printer = MockPrinter::new().on_data(|n, _| if n == 2 { Response::DropLink } else { Response::Silent });
    let mut session = connected(&printer, SessionConfig::immediate());
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let job = controller.print_image(&raster, &mut session, &JobControl::new());
    let packets = packet_lengths(&raster, &band_options(8), 182);

    assert_eq!(job.result.failure_kind(), Some(FailureKind::LinkDropped));
    assert_eq!(job.bytes_acked, packets[0] + packets[1]);
    assert_eq!(session.state(), SessionState::Faulted);
    assert_eq!(printer.closes(), 1);
    assert_eq!(printer.data_write_count(), 2);
}

#[test]
fn test_cancel_after_second_packet() {
    let printer = MockPrinter::new();
    let mut session = connected(&printer, SessionConfig::immediate());
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let token = CancelToken::new();
    let trigger = token.clone();
    let control = JobControl::new()
        .with_cancel(token)
        .on_progress(move |p| {
            if p.packets_acked >= 2 {
                trigger.cancel();
            }
        });

    let job = controller.print_image(&raster, &mut session, &control);

    assert_eq!(job.result, JobResult::Cancelled);
    assert_eq!(job.packets_acked, 2);
    assert_eq!(printer.data_write_count(), 2);
    // The session survives a cancelled job
    assert_eq!(session.state(), SessionState::Streaming);
    let next = controller.print_image(&MonochromeRaster::blank(64, 8), &mut session, &JobControl::new());
    assert!(next.is_success());
}

#[test]
fn test_cancel_with_nak_in_window_writes_nothing_more() {
    let printer = MockPrinter::new().on_data(|n, _| if n == 1 { Response::nak() } else { Response::ack() });
    let mut session = connected(&printer, explicit(2, 3));
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let writes_at_cancel = Arc::new(Mutex::new(None));
    let token = CancelToken::new();
    let (trigger, seen, observer) = (token.clone(), writes_at_cancel.clone(), printer.clone());
    let control = JobControl::new().with_cancel(token).on_progress(move |p| {
        if p.packets_acked >= 1 && !trigger.is_cancelled() {
            trigger.cancel();
            *seen.lock().unwrap() = Some(observer.data_write_count());
        }
    });

    let job = controller.print_image(&raster, &mut session, &control);

    assert_eq!(job.result, JobResult::Cancelled);
    assert_eq!(job.packets_acked, 1);
    // Packet 1 was NAKed but never resent
    assert_eq!(*writes_at_cancel.lock().unwrap(), Some(3));
    assert_eq!(printer.data_write_count(), 3);
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(session.in_flight(), 0);
}

#[test]
fn test_ack_timeout_retried_then_delivered_once() {
    let printer = MockPrinter::new().on_data(|n, _| if n == 2 { Response::Silent } else { Response::ack() });
    let config = SessionConfig {
        ack_timeout: Duration::from_millis(20),
        ..explicit(1, 2)
    };
    let mut session = connected(&printer, config);
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let job = controller.print_image(&raster, &mut session, &JobControl::new());
    let packets = packet_lengths(&raster, &band_options(8), 182);

    assert_eq!(job.result, JobResult::Success);
    assert_eq!(job.packets_acked, packets.len());
    assert_eq!(job.bytes_acked, packets.iter().sum::<usize>());
    // Packet 2 went out again after its ack timed out
    let writes = printer.data_writes();
    assert_eq!(writes.len(), packets.len() + 1);
    assert_eq!(writes[2], writes[3]);
}

#[test]
fn test_link_drop_while_awaiting_ack() {
    let printer = MockPrinter::new().on_data(|n, _| if n == 2 { Response::Hangup } else { Response::ack() });
    let mut session = connected(&printer, explicit(1, 2));
    let raster = test_raster(256, 40);
    let controller = PrintJobController::new(band_options(8), ChunkConfig::new(182));

    let job = controller.print_image(&raster, &mut session, &JobControl::new());
    let packets = packet_lengths(&raster, &band_options(8), 182);

    assert_eq!(job.result.failure_kind(), Some(FailureKind::LinkDropped));
    assert_eq!(job.packets_acked, 2);
    assert_eq!(job.bytes_acked, packets[0] + packets[1]);
    assert_eq!(session.state(), SessionState::Faulted);
    assert_eq!(printer.data_write_count(), 3);
    assert_eq!(printer.closes(), 1);
}

#[test]
fn test_text_print_pauses_after_each_line() {
    let printer = MockPrinter::new();
    let mut session = connected(&printer, SessionConfig::immediate());
    let options = EncodeOptions {
        text_settle: Duration::from_millis(30),
        ..Default::default()
    };
    let controller = PrintJobController::new(options.clone(), ChunkConfig::new(LINK_HEADER_OVERHEAD + 1));

    let started = Instant::now();
    let job = controller.print_text("one\ntwo\n\nthree", &mut session, &JobControl::new());

    assert!(job.is_success());
    // Two lines, a paragraph break and a line, each followed by a pause
    assert!(started.elapsed() >= Duration::from_millis(4 * 30));
    let expected = frame_bytes(&encode::encode_text("one\ntwo\n\nthree", &options).unwrap());
    assert_eq!(printer.data_writes().concat(), expected);
    session.finish().unwrap();
}

// ============================================================================
// JOB QUEUE
// ============================================================================

/// A session whose jobs take a while: one small packet every 20ms.
fn slow_handle(printer: &MockPrinter, policy: QueuePolicy) -> SessionHandle {
    let session = connected(printer, SessionConfig::immediate());
    let chunk = ChunkConfig {
        mtu: 36,
        inter_packet_delay: Duration::from_millis(20),
    };
    SessionHandle::spawn(session, PrintJobController::new(band_options(8), chunk), policy)
}

#[test]
fn test_fail_fast_rejects_second_job() {
    let printer = MockPrinter::new();
    let handle = slow_handle(&printer, QueuePolicy::FailFast);

    let first = handle.submit_job(MonochromeRaster::blank(64, 16)).unwrap();
    let err = handle.submit_job(MonochromeRaster::blank(64, 16)).unwrap_err();
    assert_eq!(
        err,
        SessionBusyError {
            active: first.to_string()
        }
    );

    assert!(handle.wait(first).unwrap().is_success());
    assert!(handle.submit_job(MonochromeRaster::blank(64, 8)).is_ok());
}

#[test]
fn test_queued_job_cancels_without_io() {
    let printer = MockPrinter::new();
    let handle = slow_handle(&printer, QueuePolicy::Queue);
    let first_raster = MonochromeRaster::blank(64, 16);
    let expected = frame_bytes(&encode::encode(&first_raster, &band_options(8)).unwrap());

    let first = handle.submit_job(first_raster).unwrap();
    let second = handle.submit_job(MonochromeRaster::from_fn(64, 16, |_, _| true)).unwrap();
    assert!(handle.cancel(second));

    assert_eq!(handle.wait(second).unwrap().result, JobResult::Cancelled);
    assert!(handle.wait(first).unwrap().is_success());

    let session = handle.shutdown().unwrap();
    assert_eq!(session.state(), SessionState::Streaming);
    assert_eq!(printer.data_writes().concat(), expected);
}

#[test]
fn test_running_job_cancels_between_packets() {
    let printer = MockPrinter::new();
    let handle = slow_handle(&printer, QueuePolicy::Queue);

    let id = handle.submit_job(MonochromeRaster::blank(64, 64)).unwrap();
    assert!(printer.wait_for_data_writes(2, Duration::from_secs(2)));
    assert!(handle.cancel(id));

    let job = handle.wait(id).unwrap();
    assert_eq!(job.result, JobResult::Cancelled);
    assert!(job.bytes_acked < job.total_bytes);
    assert_eq!(printer.data_write_count(), job.packets_acked);
}

#[test]
fn test_progress_subscription_sees_every_ack() {
    let printer = MockPrinter::new();
    let handle = slow_handle(&printer, QueuePolicy::Queue);

    let id = handle.submit_job(MonochromeRaster::blank(64, 16)).unwrap();
    let updates = Arc::new(Mutex::new(Vec::new()));
    let stream = handle.subscribe_progress(id).unwrap();
    for update in stream {
        updates.lock().unwrap().push(update.bytes_acked);
    }

    let job = handle.wait(id).unwrap();
    let updates = updates.lock().unwrap();
    assert!(updates.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(updates.last().copied(), Some(job.total_bytes));
}

#[test]
fn test_job_deadline_fails_with_timeout() {
    let printer = MockPrinter::new();
    let handle = slow_handle(&printer, QueuePolicy::Queue);

    let id = handle
        .submit_job_with_timeout(MonochromeRaster::blank(64, 64), Duration::from_millis(50))
        .unwrap();
    let job = handle.wait(id).unwrap();

    assert_eq!(job.result.failure_kind(), Some(FailureKind::Timeout));
    assert!(job.bytes_acked < job.total_bytes);
}
