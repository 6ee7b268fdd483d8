//! Tests for the polling connection
//!
//! These drive the bootstrap and streaming loop through a scripted exchange,
//! so timing can be checked with tokio's paused clock.

use super::*;
use crate::codec::{encode_camera, encode_frame, split_lookup};
use crate::exchange::Exchange;
use crate::reqrep::{CAMERA, FRAME, Request};
use crate::types::{CalibrationRecord, LinkState, LookupPart, LookupTable, UpdateRate, ticks};
use crate::{LinkConfig, LinkError, Result};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

enum Step {
    Reply(Bytes),
    Fail(LinkError),
    /// Never answer; the caller sees a timeout
    Silent,
}

#[derive(Debug, Clone)]
struct Call {
    label: String,
    at: Instant,
}

struct ScriptedExchange<F> {
    respond: F,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl<F> ScriptedExchange<F>
where
    F: FnMut(&Request) -> Step + Send + 'static,
{
    fn new(respond: F) -> (Self, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (Self { respond, calls: calls.clone() }, calls)
    }
}

#[async_trait::async_trait]
impl<F> Exchange for ScriptedExchange<F>
where
    F: FnMut(&Request) -> Step + Send + 'static,
{
    async fn request(&mut self, request: &Request, timeout: Duration) -> Result<Bytes> {
        self.calls.lock().push(Call { label: request.label.clone(), at: Instant::now() });
        let step = (self.respond)(request);
        tokio::task::yield_now().await;
        match step {
            Step::Reply(body) => Ok(body),
            Step::Fail(e) => Err(e),
            Step::Silent => {
                tokio::time::sleep(timeout).await;
                Err(LinkError::Timeout { duration: timeout })
            }
        }
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

fn calibration() -> CalibrationRecord {
    CalibrationRecord {
        color_to_depth: CalibrationRecord::IDENTITY,
        color_width: 8,
        color_height: 4,
        depth_width: 4,
        depth_height: 2,
        ir_width: 4,
        ir_height: 2,
    }
}

fn lookup_bytes() -> Bytes {
    let len = LookupTable::expected_len(4, 2).unwrap();
    Bytes::from((0..len).map(|i| i as u8).collect::<Vec<_>>())
}

/// Replies like a capture host; frames beyond `frame_limit` go silent.
fn host(frame_limit: usize) -> impl FnMut(&Request) -> Step + Send + 'static {
    let parts = split_lookup(&lookup_bytes());
    let mut frames_served = 0;
    move |request: &Request| match request.label.as_str() {
        CAMERA => Step::Reply(encode_camera(&calibration()).unwrap()),
        FRAME if frames_served < frame_limit => {
            frames_served += 1;
            let sent = ticks::now_ticks() - 500 * ticks::TICKS_PER_MILLISECOND;
            Step::Reply(encode_frame(sent, &[frames_served as u8; 16], &[7; 32]))
        }
        FRAME => Step::Silent,
        label => match LookupPart::from_label(label) {
            Some(part) => Step::Reply(parts[part.index()].clone()),
            None => Step::Fail(LinkError::decode("request", "unknown label")),
        },
    }
}

fn labels(calls: &Mutex<Vec<Call>>) -> Vec<String> {
    calls.lock().iter().map(|call| call.label.clone()).collect()
}

#[tokio::test]
async fn bootstrap_reaches_streaming() {
    let _ = tracing_subscriber::fmt::try_init();

    let (exchange, calls) = ScriptedExchange::new(host(usize::MAX));
    let mut connection = PollingConnection::with_exchange(exchange, &LinkConfig::default());

    connection.wait_for_streaming(Duration::from_secs(2)).await.unwrap();
    assert_eq!(connection.state(), LinkState::Streaming);
    assert_eq!(connection.calibration(), Some(calibration()));
    assert_eq!(connection.lookup_table().unwrap().as_bytes(), &lookup_bytes());

    let mut updates = Box::pin(connection.frame_updates(UpdateRate::Native));
    let snapshot = tokio::time::timeout(Duration::from_secs(1), updates.next())
        .await
        .expect("no frame within 1s")
        .expect("frame stream ended");
    assert!(snapshot.sequence > 0);
    assert_eq!(snapshot.color.as_ref(), &[7; 32]);

    let depth = connection.latest_depth_frame().unwrap();
    assert_eq!((depth.width, depth.height), (4, 2));
    assert_eq!(depth.data.len(), 16);
    let color = connection.latest_color_frame().unwrap();
    assert_eq!((color.width, color.height), (4, 2));

    let delay = connection.latency().latest().unwrap().delay_ms;
    assert!(delay >= 500.0, "delay was {}", delay);

    connection.dispose().await;
    let seen = labels(&calls);
    assert_eq!(&seen[..5], &["Camera", "Lookup1", "Lookup2", "Lookup3", "Frame"]);
}

#[tokio::test(start_paused = true)]
async fn malformed_camera_reply_is_retried_after_backoff() {
    let mut inner = host(1);
    let mut camera_replies = 0;
    let (exchange, calls) = ScriptedExchange::new(move |request: &Request| {
        if request.label == CAMERA {
            camera_replies += 1;
            if camera_replies == 1 {
                return Step::Reply(Bytes::from_static(&[64, 0, 0, 0]));
            }
        }
        inner(request)
    });

    let config = LinkConfig::default();
    let mut connection = PollingConnection::with_exchange(exchange, &config);
    connection.wait_for_streaming(Duration::from_secs(5)).await.unwrap();

    let calls = calls.lock().clone();
    assert_eq!(calls[0].label, "Camera");
    assert_eq!(calls[1].label, "Camera");
    assert_eq!(calls[2].label, "Lookup1");
    assert!(calls[1].at - calls[0].at >= config.retry_backoff());

    connection.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn mismatched_lookup_table_restarts_at_first_part() {
    let mut inner = host(1);
    let mut third_parts = 0;
    let (exchange, calls) = ScriptedExchange::new(move |request: &Request| {
        if request.label == LookupPart::Third.label() {
            third_parts += 1;
            if third_parts == 1 {
                return Step::Reply(Bytes::from_static(b"short"));
            }
        }
        inner(request)
    });

    let mut connection = PollingConnection::with_exchange(exchange, &LinkConfig::default());
    connection.wait_for_streaming(Duration::from_secs(5)).await.unwrap();
    assert_eq!(connection.lookup_table().unwrap().len(), lookup_bytes().len());

    let seen = labels(&calls);
    assert_eq!(
        &seen[..8],
        &["Camera", "Lookup1", "Lookup2", "Lookup3", "Lookup1", "Lookup2", "Lookup3", "Frame"]
    );

    connection.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn huge_depth_resolution_keeps_session_retrying() {
    let huge = CalibrationRecord {
        depth_width: i32::MAX as u32,
        depth_height: i32::MAX as u32,
        ..calibration()
    };
    let mut inner = host(1);
    let (exchange, calls) = ScriptedExchange::new(move |request: &Request| match request.label.as_str() {
        CAMERA => Step::Reply(encode_camera(&huge).unwrap()),
        _ => inner(request),
    });

    let mut connection = PollingConnection::with_exchange(exchange, &LinkConfig::default());
    tokio::time::sleep(Duration::from_secs(2)).await;

    // The session is still alive: waiting times out instead of reporting a closed link
    let err = connection.wait_for_streaming(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }), "got {:?}", err);
    assert!(connection.lookup_table().is_none());

    let seen = labels(&calls);
    assert_eq!(seen.iter().filter(|label| *label == "Camera").count(), 1);
    assert!(seen.iter().filter(|label| *label == "Lookup1").count() >= 3);
    assert!(!seen.iter().any(|label| label == "Frame"));

    connection.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn silent_remote_is_retried_until_disposed() {
    let (exchange, calls) = ScriptedExchange::new(|_: &Request| Step::Silent);
    let config = LinkConfig::default();
    let mut connection = PollingConnection::with_exchange(exchange, &config);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(connection.state(), LinkState::AwaitingCameraData);

    // Each attempt costs one timeout plus one backoff
    let attempts = calls.lock().len();
    assert_eq!(attempts, 5);
    assert!(labels(&calls).iter().all(|label| label == "Camera"));

    let start = Instant::now();
    connection.dispose().await;
    assert!(start.elapsed() < config.request_timeout());
    assert!(connection.calibration().is_none());

    // second dispose is a no-op
    connection.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn frame_timeouts_retry_at_once_and_failures_back_off() {
    let mut inner = host(usize::MAX);
    let mut frame_requests = 0;
    let (exchange, calls) = ScriptedExchange::new(move |request: &Request| {
        if request.label != FRAME {
            return inner(request);
        }
        frame_requests += 1;
        match frame_requests {
            1 => Step::Fail(LinkError::Timeout { duration: Duration::from_secs(1) }),
            2 => Step::Fail(LinkError::connection_failed("reset by peer")),
            3 => inner(request),
            _ => Step::Silent,
        }
    });

    let config = LinkConfig::default();
    let mut connection = PollingConnection::with_exchange(exchange, &config);
    let mut updates = Box::pin(connection.frame_updates(UpdateRate::Native));
    updates.next().await.unwrap();

    let frames: Vec<Call> = calls.lock().iter().filter(|c| c.label == FRAME).cloned().collect();
    assert!(frames[1].at - frames[0].at < config.retry_backoff());
    assert!(frames[2].at - frames[1].at >= config.retry_backoff());
    assert_eq!(connection.frames().sequence(), 1);

    connection.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn undecodable_frames_are_skipped() {
    let mut inner = host(usize::MAX);
    let mut frame_requests = 0;
    let (exchange, _calls) = ScriptedExchange::new(move |request: &Request| {
        if request.label != FRAME {
            return inner(request);
        }
        frame_requests += 1;
        match frame_requests {
            1 => Step::Reply(Bytes::from_static(&[0; 20])),
            2 => inner(request),
            _ => Step::Silent,
        }
    });

    let mut connection = PollingConnection::with_exchange(exchange, &LinkConfig::default());
    let mut updates = Box::pin(connection.frame_updates(UpdateRate::Native));
    let snapshot = updates.next().await.unwrap();

    assert_eq!(snapshot.sequence, 1);
    assert_eq!(connection.latency().samples().len(), 1);
    connection.dispose().await;
}

#[tokio::test]
async fn nothing_to_read_before_bootstrap() {
    let (exchange, _calls) = ScriptedExchange::new(|_: &Request| Step::Silent);
    let mut connection = PollingConnection::with_exchange(exchange, &LinkConfig::default());

    assert!(connection.calibration().is_none());
    assert!(connection.lookup_table().is_none());
    assert!(connection.latest_depth_frame().is_none());
    assert!(connection.latest_color_frame().is_none());

    let err = connection.wait_for_streaming(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, LinkError::Timeout { .. }));
    connection.dispose().await;
}
