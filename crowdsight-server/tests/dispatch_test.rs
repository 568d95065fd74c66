//! Dispatch scheduler admission, ordering, fan-out and alerting

use async_trait::async_trait;
use crowdsight_core::config::{AlertConfig, DispatchConfig};
use crowdsight_eye::VisionError;
use crowdsight_server::{
    Admission, CapacityError, DispatchScheduler, FrameJob, FrameProcessor, LiveOutcome, ServerMessage, ViewerHub,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

/// Reports each job's tag when it starts, then holds it until a permit is released.
/// `source_bytes` = [tag, count, fail?]
struct GatedProcessor {
    started: UnboundedSender<u8>,
    gate: Arc<Semaphore>,
}

#[async_trait]
impl FrameProcessor for GatedProcessor {
    async fn process(&self, job: &FrameJob) -> Result<LiveOutcome, VisionError> {
        let tag = job.source_bytes[0];
        let _ = self.started.send(tag);
        self.gate.acquire().await.unwrap().forget();

        if job.source_bytes.get(2) == Some(&1) {
            return Err(VisionError::Transport("request timed out".to_string()));
        }
        Ok(LiveOutcome {
            count: job.source_bytes[1] as u32,
            annotated_image: format!("frame-{}", tag),
            heatmap_image: format!("heat-{}", tag),
            predictions: Vec::new(),
        })
    }
}

struct Fixture {
    scheduler: Arc<DispatchScheduler>,
    started: UnboundedReceiver<u8>,
    gate: Arc<Semaphore>,
    viewer: UnboundedReceiver<ServerMessage>,
}

fn fixture(concurrency: usize, capacity: usize, threshold: u32) -> Fixture {
    let (started_tx, started) = mpsc::unbounded_channel();
    let gate = Arc::new(Semaphore::new(0));
    let hub = Arc::new(ViewerHub::new(10));
    let (viewer_tx, viewer) = mpsc::unbounded_channel();
    hub.register(Uuid::new_v4(), viewer_tx).unwrap();

    let scheduler = Arc::new(DispatchScheduler::new(
        &DispatchConfig {
            concurrency_limit: concurrency,
            capacity_limit: capacity,
        },
        &AlertConfig {
            threshold,
            cooldown_secs: 300,
        },
        Arc::new(GatedProcessor {
            started: started_tx,
            gate: gate.clone(),
        }),
        hub,
    ));

    Fixture {
        scheduler,
        started,
        gate,
        viewer,
    }
}

fn job(tag: u8, count: u8) -> FrameJob {
    FrameJob {
        source_bytes: vec![tag, count, 0],
        submitter: Uuid::new_v4(),
    }
}

fn failing_job(tag: u8) -> FrameJob {
    FrameJob {
        source_bytes: vec![tag, 0, 1],
        submitter: Uuid::new_v4(),
    }
}

async fn next_started(rx: &mut UnboundedReceiver<u8>) -> u8 {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no job started in time")
        .unwrap()
}

async fn assert_nothing_started(rx: &mut UnboundedReceiver<u8>) {
    assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
}

/// Collect viewer messages until `predictions` predictions arrived, then drain stragglers
async fn collect(rx: &mut UnboundedReceiver<ServerMessage>, predictions: usize) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    let mut seen = 0;
    while seen < predictions {
        let message = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("viewer got no message in time")
            .unwrap();
        if matches!(message, ServerMessage::Prediction(_)) {
            seen += 1;
        }
        messages.push(message);
    }
    while let Ok(Some(message)) = timeout(Duration::from_millis(100), rx.recv()).await {
        messages.push(message);
    }
    messages
}

fn annotated_tags(messages: &[ServerMessage]) -> Vec<String> {
    messages
        .iter()
        .filter_map(|m| match m {
            ServerMessage::Prediction(p) => p.annotated_image.clone(),
            _ => None,
        })
        .collect()
}

async fn wait_idle(scheduler: &DispatchScheduler) {
    timeout(Duration::from_secs(2), async {
        while scheduler.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("scheduler did not go idle");
}

#[tokio::test]
async fn test_third_job_waits_for_a_free_slot() {
    let mut fx = fixture(2, 60, 100);

    assert_eq!(fx.scheduler.submit(job(1, 1)), Ok(Admission::Started));
    assert_eq!(fx.scheduler.submit(job(2, 1)), Ok(Admission::Started));
    assert_eq!(fx.scheduler.submit(job(3, 1)), Ok(Admission::Queued { position: 1 }));

    let mut first_two = vec![next_started(&mut fx.started).await, next_started(&mut fx.started).await];
    first_two.sort();
    assert_eq!(first_two, vec![1, 2]);
    assert_nothing_started(&mut fx.started).await;
    assert_eq!(fx.scheduler.in_flight(), 2);
    assert_eq!(fx.scheduler.pending(), 1);

    fx.gate.add_permits(1);
    assert_eq!(next_started(&mut fx.started).await, 3);
    assert_eq!(fx.scheduler.in_flight(), 2);
    assert_eq!(fx.scheduler.pending(), 0);

    fx.gate.add_permits(2);
    let messages = collect(&mut fx.viewer, 3).await;
    assert_eq!(annotated_tags(&messages).len(), 3);
    wait_idle(&fx.scheduler).await;
}

#[tokio::test]
async fn test_queued_jobs_run_in_submission_order() {
    let mut fx = fixture(1, 10, 100);

    for tag in 1..=5 {
        fx.scheduler.submit(job(tag, 0)).unwrap();
    }
    assert_eq!(fx.scheduler.pending(), 4);

    let mut order = vec![next_started(&mut fx.started).await];
    for _ in 0..4 {
        fx.gate.add_permits(1);
        order.push(next_started(&mut fx.started).await);
    }
    assert_eq!(order, vec![1, 2, 3, 4, 5]);

    fx.gate.add_permits(1);
    let messages = collect(&mut fx.viewer, 5).await;
    assert_eq!(
        annotated_tags(&messages),
        vec!["frame-1", "frame-2", "frame-3", "frame-4", "frame-5"]
    );
    wait_idle(&fx.scheduler).await;
}

#[tokio::test]
async fn test_overflow_is_rejected_and_never_broadcast() {
    let mut fx = fixture(1, 2, 100);

    assert_eq!(fx.scheduler.submit(job(1, 0)), Ok(Admission::Started));
    assert_eq!(fx.scheduler.submit(job(2, 0)), Ok(Admission::Queued { position: 1 }));
    assert_eq!(fx.scheduler.submit(job(3, 0)), Ok(Admission::Queued { position: 2 }));
    assert_eq!(fx.scheduler.submit(job(4, 0)), Err(CapacityError { pending: 2 }));
    assert_eq!(fx.scheduler.pending(), 2);

    fx.gate.add_permits(10);
    let messages = collect(&mut fx.viewer, 3).await;
    assert_eq!(annotated_tags(&messages), vec!["frame-1", "frame-2", "frame-3"]);
    assert_eq!(messages.len(), 3);

    wait_idle(&fx.scheduler).await;
    assert_eq!(fx.scheduler.pending(), 0);
}

#[tokio::test]
async fn test_alert_fires_once_per_cooldown() {
    let mut fx = fixture(2, 60, 5);

    for (tag, count) in [(1, 3), (2, 6), (3, 7), (4, 2), (5, 9)] {
        fx.scheduler.submit(job(tag, count)).unwrap();
    }
    fx.gate.add_permits(5);

    let messages = collect(&mut fx.viewer, 5).await;
    let alerts: Vec<&ServerMessage> = messages
        .iter()
        .filter(|m| matches!(m, ServerMessage::Alert { .. }))
        .collect();
    assert_eq!(alerts.len(), 1);
    match alerts[0] {
        ServerMessage::Alert { count, threshold, .. } => {
            assert!(*count >= 5);
            assert_eq!(*threshold, 5);
        }
        _ => unreachable!(),
    }
    wait_idle(&fx.scheduler).await;
}

#[tokio::test]
async fn test_failure_is_broadcast_and_frees_the_slot() {
    let mut fx = fixture(1, 5, 100);

    fx.scheduler.submit(failing_job(1)).unwrap();
    fx.scheduler.submit(job(2, 4)).unwrap();
    fx.gate.add_permits(2);

    let messages = collect(&mut fx.viewer, 2).await;
    match &messages[0] {
        ServerMessage::Prediction(p) => {
            assert!(!p.success);
            assert!(p.error.as_deref().unwrap_or_default().contains("timed out"));
        }
        other => panic!("Expected failed prediction, got {:?}", other),
    }
    match &messages[1] {
        ServerMessage::Prediction(p) => {
            assert!(p.success);
            assert_eq!(p.count, Some(4));
            assert_eq!(p.threshold, Some(100));
        }
        other => panic!("Expected prediction, got {:?}", other),
    }
    wait_idle(&fx.scheduler).await;
}
