mod common;

use common::{EventLog, FixedEncoder, ScriptedFrame, ScriptedSource};
use oko_camera::{
    capture_snapshot, EncodeError, FrameSource, JpegEncoder, MemoryResponse, MemoryTransport, StreamError,
};

#[test]
fn jpeg_frame_is_sent_whole() {
    let log = EventLog::default();
    let frame = ScriptedFrame::jpeg(1500);
    let expected = frame.data.clone();
    let source = ScriptedSource::new(vec![frame], log.clone());
    let encoder = FixedEncoder::new(10, log.clone());
    let mut response = MemoryResponse::new();

    let report = capture_snapshot(&source, &encoder, 80, response.responder()).unwrap();
    assert_eq!(report.bytes, 1500);
    assert!(!report.converted);

    let head = response.head.as_ref().unwrap();
    assert_eq!(head.status, 200);
    assert_eq!(head.get("Content-Type"), Some("image/jpeg"));
    assert_eq!(
        head.get("Content-Disposition"),
        Some("inline; filename=capture.jpg")
    );
    assert_eq!(head.get("X-Timestamp"), Some("1700000000.250000"));
    assert!(!response.chunked);
    assert_eq!(response.body, expected);

    // released only after the body went out
    assert_eq!(log.events(), vec!["acquire:1", "release:1"]);
    assert_eq!(source.stats().outstanding(), 0);
}

#[test]
fn raw_frame_is_streamed_through_the_encoder() {
    let log = EventLog::default();
    let source = ScriptedSource::new(vec![ScriptedFrame::raw(10, 10)], log.clone());
    let encoder = FixedEncoder::new(450, log.clone());
    let mut response = MemoryResponse::new();

    let report = capture_snapshot(&source, &encoder, 80, response.responder()).unwrap();
    assert_eq!(report.bytes, 450);
    assert!(report.converted);

    assert!(response.chunked);
    assert!(response.transport.is_finished());
    // 100-byte pushes from the encoder become 100-byte chunks
    let sizes: Vec<usize> = response.transport.chunks().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![100, 100, 100, 100, 50]);
    assert_eq!(response.full_body().len(), 450);
    assert_eq!(encoder.allocated(), 0);
    assert_eq!(source.stats().outstanding(), 0);
}

#[test]
fn real_encoder_produces_decodable_snapshot() {
    let log = EventLog::default();
    let source = ScriptedSource::new(vec![ScriptedFrame::raw(32, 16)], log);
    let encoder = JpegEncoder::new();
    let mut response = MemoryResponse::new();

    capture_snapshot(&source, &encoder, 80, response.responder()).unwrap();
    let jpeg = response.full_body();
    let decoded = image::load_from_memory_with_format(&jpeg, image::ImageFormat::Jpeg).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (32, 16));
}

#[test]
fn missing_frame_answers_500() {
    let log = EventLog::default();
    let source = ScriptedSource::new(Vec::new(), log.clone());
    let encoder = FixedEncoder::new(10, log);
    let mut response = MemoryResponse::new();

    let err = capture_snapshot(&source, &encoder, 80, response.responder()).unwrap_err();
    assert!(matches!(err, StreamError::SourceUnavailable));
    assert_eq!(response.status(), Some(500));
    assert!(!response.body.is_empty());
}

#[test]
fn client_disconnect_still_releases_frame() {
    let log = EventLog::default();
    let source = ScriptedSource::new(
        vec![ScriptedFrame::jpeg(200), ScriptedFrame::raw(10, 10)],
        log.clone(),
    );
    let encoder = FixedEncoder::new(300, log.clone());

    let mut refused = MemoryResponse::new();
    refused.refuse_body = true;
    let err = capture_snapshot(&source, &encoder, 80, refused.responder()).unwrap_err();
    assert!(err.is_transport());

    let mut broken = MemoryResponse::with_transport(MemoryTransport::failing_at(1));
    let err = capture_snapshot(&source, &encoder, 80, broken.responder()).unwrap_err();
    assert!(err.is_transport());
    // no terminator after a failed chunk
    assert!(!broken.transport.is_finished());

    assert_eq!(source.stats().frames_acquired, 2);
    assert_eq!(source.stats().outstanding(), 0);
}

#[test]
fn encode_failure_is_reported_after_release() {
    let log = EventLog::default();
    let source = ScriptedSource::new(vec![ScriptedFrame::raw(4, 4)], log.clone());
    let encoder = FixedEncoder::new(100, log).failing_on(0);
    let mut response = MemoryResponse::new();

    let err = capture_snapshot(&source, &encoder, 80, response.responder()).unwrap_err();
    assert!(matches!(err, StreamError::Encode(_)));
    assert_eq!(source.stats().outstanding(), 0);
    // no terminator: the client sees a truncated response
    assert!(response.chunked);
    assert!(!response.transport.is_finished());
}

#[test]
fn empty_conversion_fails_the_snapshot() {
    let log = EventLog::default();
    let source = ScriptedSource::new(vec![ScriptedFrame::raw(4, 4)], log.clone());
    let encoder = FixedEncoder::producing_nothing(log);
    let mut response = MemoryResponse::new();

    let err = capture_snapshot(&source, &encoder, 80, response.responder()).unwrap_err();
    assert!(matches!(err, StreamError::Encode(EncodeError::EmptyOutput)));
    assert!(!response.transport.is_finished());
    assert!(response.full_body().is_empty());
    assert_eq!(source.stats().outstanding(), 0);
}
