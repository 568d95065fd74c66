// Dispatch scheduler for the live path
//
// Bounds concurrent inference calls, queues overflow FIFO up to a hard
// capacity, and owns the alert state. Every completion is broadcast to all
// viewers.

use crate::alert::AlertState;
use crate::hub::{ViewerHub, ViewerId};
use crate::protocol::{Prediction, ServerMessage, BUSY_MESSAGE};
use async_trait::async_trait;
use crowdsight_core::config::{AlertConfig, DispatchConfig};
use crowdsight_core::Detection;
use crowdsight_eye::VisionError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One submitted live frame
#[derive(Debug, Clone)]
pub struct FrameJob {
    pub source_bytes: Vec<u8>,
    pub submitter: ViewerId,
}

/// Annotated result of one live frame
#[derive(Debug, Clone, PartialEq)]
pub struct LiveOutcome {
    pub count: u32,
    pub annotated_image: String,
    pub heatmap_image: String,
    pub predictions: Vec<Detection>,
}

/// Turns a frame into an annotated outcome; one inference attempt per call
#[async_trait]
pub trait FrameProcessor: Send + Sync {
    async fn process(&self, job: &FrameJob) -> Result<LiveOutcome, VisionError>;
}

/// How a submitted job was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    Queued { position: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", BUSY_MESSAGE)]
pub struct CapacityError {
    pub pending: usize,
}

#[derive(Debug, Default)]
struct DispatchState {
    in_flight: usize,
    pending: VecDeque<FrameJob>,
}

/// Admission control over the detection service
pub struct DispatchScheduler {
    state: Mutex<DispatchState>,
    alert: Mutex<AlertState>,
    concurrency_limit: usize,
    capacity_limit: usize,
    processor: Arc<dyn FrameProcessor>,
    hub: Arc<ViewerHub>,
}

impl DispatchScheduler {
    pub fn new(
        dispatch: &DispatchConfig,
        alert: &AlertConfig,
        processor: Arc<dyn FrameProcessor>,
        hub: Arc<ViewerHub>,
    ) -> Self {
        Self {
            state: Mutex::new(DispatchState::default()),
            alert: Mutex::new(AlertState::new(alert.threshold, alert.cooldown())),
            concurrency_limit: dispatch.concurrency_limit.max(1),
            capacity_limit: dispatch.capacity_limit,
            processor,
            hub,
        }
    }

    /// Admit, queue or reject a job. Never waits on processing.
    ///
    /// An admitted job's submitter is sent its `ack` before the job can run,
    /// so the ack always precedes that frame's prediction. Rejected jobs get
    /// no ack.
    pub fn submit(self: &Arc<Self>, job: FrameJob) -> Result<Admission, CapacityError> {
        {
            let mut state = self.state.lock();
            if state.in_flight < self.concurrency_limit {
                state.in_flight += 1;
            } else if state.pending.len() < self.capacity_limit {
                // still under the lock, so no completion can pop it first
                self.hub.send_to(&job.submitter, ServerMessage::ack());
                state.pending.push_back(job);
                return Ok(Admission::Queued {
                    position: state.pending.len(),
                });
            } else {
                return Err(CapacityError {
                    pending: state.pending.len(),
                });
            }
        }

        debug!(submitter = %job.submitter, "Frame admitted");
        self.hub.send_to(&job.submitter, ServerMessage::ack());
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.drive(job).await });
        Ok(Admission::Started)
    }

    /// Run `job`, then keep pulling queued jobs on this task until the
    /// queue is empty.
    async fn drive(self: Arc<Self>, mut job: FrameJob) {
        loop {
            self.run_job(&job).await;
            match self.complete() {
                Some(next) => job = next,
                None => break,
            }
        }
    }

    /// Release one slot, or hand it straight to the oldest queued job.
    /// Both happen under one lock so a concurrent submit cannot slip in
    /// between.
    fn complete(&self) -> Option<FrameJob> {
        let mut state = self.state.lock();
        match state.pending.pop_front() {
            Some(next) => Some(next),
            None => {
                state.in_flight -= 1;
                None
            }
        }
    }

    async fn run_job(&self, job: &FrameJob) {
        match self.processor.process(job).await {
            Ok(outcome) => {
                let threshold = self.threshold();
                let count = outcome.count;
                let prediction = Prediction::success(
                    count,
                    outcome.annotated_image,
                    outcome.heatmap_image,
                    outcome.predictions,
                    threshold,
                );
                let viewers = self.hub.broadcast(ServerMessage::Prediction(prediction));
                debug!(count, viewers, "Prediction broadcast");
                self.evaluate_alert(count);
            }
            Err(e) => {
                warn!(submitter = %job.submitter, error = %e, "Live frame failed");
                self.hub
                    .broadcast(ServerMessage::Prediction(Prediction::failure(e.to_string())));
            }
        }
    }

    fn evaluate_alert(&self, count: u32) {
        let fired = {
            let mut alert = self.alert.lock();
            alert.observe(count, Instant::now()).then(|| alert.threshold())
        };
        if let Some(threshold) = fired {
            info!("🚨 Crowd alert: {} people (threshold {})", count, threshold);
            self.hub.broadcast(ServerMessage::alert(count, threshold));
        }
    }

    pub fn threshold(&self) -> u32 {
        self.alert.lock().threshold()
    }

    /// Change the alert threshold and tell every viewer
    pub fn set_threshold(&self, threshold: u32) {
        self.alert.lock().set_threshold(threshold);
        info!("Alert threshold set to {}", threshold);
        self.hub.broadcast(ServerMessage::ThresholdUpdated { threshold });
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn capacity_limit(&self) -> usize {
        self.capacity_limit
    }
}
