//! Batch video pipeline: extract, annotate frame by frame, reassemble

use super::media::{frame_file_name, MediaTool};
use crate::error::VisionError;
use crate::inference::Detector;
use crate::render::render_panel;
use crowdsight_core::config::VideoConfig;
use crowdsight_core::detection::{timestamp_label, ERROR_LABEL_SUFFIX};
use crowdsight_core::{Detection, FrameResult, VideoStatistics};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Lifecycle of one video job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Extracting,
    ProcessingFrames,
    Reassembling,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub frame_rate_hz: f64,
    /// Pause after each successful inference call
    pub frame_delay: Duration,
}

impl From<&VideoConfig> for PipelineSettings {
    fn from(config: &VideoConfig) -> Self {
        Self {
            frame_rate_hz: config.frame_rate_hz,
            frame_delay: config.frame_delay(),
        }
    }
}

/// Everything a finished job hands back
#[derive(Debug, Clone)]
pub struct VideoReport {
    pub output_video: PathBuf,
    pub results: Vec<FrameResult>,
    pub statistics: VideoStatistics,
}

impl VideoReport {
    pub fn total_frames(&self) -> usize {
        self.results.len()
    }

    pub fn valid_frames(&self) -> usize {
        self.results.iter().filter(|r| !r.failed).count()
    }
}

struct FrameTask {
    index: usize,
    bytes: Vec<u8>,
}

/// Drives frames through the detector and panel renderer strictly in order.
pub struct VideoPipeline {
    detector: Arc<dyn Detector>,
    media: Arc<dyn MediaTool>,
    settings: PipelineSettings,
}

impl VideoPipeline {
    pub fn new(detector: Arc<dyn Detector>, media: Arc<dyn MediaTool>, settings: PipelineSettings) -> Self {
        Self {
            detector,
            media,
            settings,
        }
    }

    /// Run a whole job. `work_dir` receives the extracted and annotated
    /// frame sequences; the caller owns its cleanup.
    pub async fn run(&self, input: &Path, work_dir: &Path, output: &Path) -> Result<VideoReport, VisionError> {
        let mut stage = JobStage::Extracting;
        match self.run_stages(input, work_dir, output, &mut stage).await {
            Ok(report) => {
                advance(&mut stage, JobStage::Done);
                info!(
                    frames = report.total_frames(),
                    valid = report.valid_frames(),
                    total_people = report.statistics.total_people,
                    output = %report.output_video.display(),
                    "Video job finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(stage = ?stage, error = %e, "Video job failed");
                advance(&mut stage, JobStage::Failed);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        input: &Path,
        work_dir: &Path,
        output: &Path,
        stage: &mut JobStage,
    ) -> Result<VideoReport, VisionError> {
        info!(input = %input.display(), "Video job extracting frames");
        let extracted_dir = work_dir.join("frames");
        let frame_paths = self
            .media
            .extract_frames(input, &extracted_dir, self.settings.frame_rate_hz)
            .await?;
        if frame_paths.is_empty() {
            return Err(VisionError::Extraction("no frames extracted".to_string()));
        }

        let mut frames = Vec::with_capacity(frame_paths.len());
        for path in &frame_paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| VisionError::Extraction(format!("cannot read {}: {}", path.display(), e)))?;
            frames.push(bytes);
        }

        advance(stage, JobStage::ProcessingFrames);
        let results = self.process_frames(frames).await;

        advance(stage, JobStage::Reassembling);
        let annotated_dir = work_dir.join("annotated");
        write_annotated(&annotated_dir, &results).await?;
        let output_video = self
            .media
            .reassemble(&annotated_dir, self.settings.frame_rate_hz, output)
            .await?;

        let statistics = VideoStatistics::from_results(&results, self.settings.frame_rate_hz);
        Ok(VideoReport {
            output_video,
            results,
            statistics,
        })
    }

    /// Infer and annotate each frame in order. A failed inference marks that
    /// frame failed and renders it with no detections; the loop carries on.
    pub async fn process_frames(&self, frames: Vec<Vec<u8>>) -> Vec<FrameResult> {
        let mut queue: VecDeque<FrameTask> = frames
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| FrameTask { index, bytes })
            .collect();
        let mut results = Vec::with_capacity(queue.len());

        while let Some(task) = queue.pop_front() {
            let frame_number = task.index as u32 + 1;
            let label = timestamp_label(task.index, self.settings.frame_rate_hz);

            match self.detector.infer(&task.bytes).await {
                Ok(detection) => {
                    let annotated = annotate(
                        task.bytes,
                        detection.detections.clone(),
                        detection.count,
                        frame_number,
                        label.clone(),
                    )
                    .await;
                    results.push(FrameResult {
                        frame_number,
                        timestamp_label: label,
                        detection: Some(detection),
                        annotated,
                        failed: false,
                    });

                    if !queue.is_empty() && !self.settings.frame_delay.is_zero() {
                        tokio::time::sleep(self.settings.frame_delay).await;
                    }
                }
                Err(e) => {
                    warn!(frame = frame_number, error = %e, "Inference failed, recording error frame");
                    let label = format!("{}{}", label, ERROR_LABEL_SUFFIX);
                    let annotated = annotate(task.bytes, Vec::new(), 0, frame_number, label.clone()).await;
                    results.push(FrameResult {
                        frame_number,
                        timestamp_label: label,
                        detection: None,
                        annotated,
                        failed: true,
                    });
                }
            }
        }

        results
    }
}

/// Panel rendering off the async workers. A render task that dies hands
/// back the unannotated frame.
async fn annotate(
    frame: Vec<u8>,
    detections: Vec<Detection>,
    count: u32,
    frame_number: u32,
    label: String,
) -> Vec<u8> {
    let fallback = frame.clone();
    let rendered = tokio::task::spawn_blocking(move || render_panel(&frame, &detections, count, frame_number, &label));
    match rendered.await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(frame = frame_number, error = %e, "Panel render task failed, keeping original frame");
            fallback
        }
    }
}

fn advance(stage: &mut JobStage, next: JobStage) {
    info!(from = ?stage, to = ?next, "Video job stage");
    *stage = next;
}

async fn write_annotated(dir: &Path, results: &[FrameResult]) -> Result<(), VisionError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| VisionError::Reassembly(format!("cannot create {}: {}", dir.display(), e)))?;
    for result in results {
        let path = dir.join(frame_file_name(result.frame_number));
        tokio::fs::write(&path, &result.annotated)
            .await
            .map_err(|e| VisionError::Reassembly(format!("cannot write {}: {}", path.display(), e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::MockDetector;
    use crate::render::test_support::solid_frame;
    use crate::video::media::MockMediaTool;
    use async_trait::async_trait;
    use crowdsight_core::DetectionResult;
    use serde_json::Value as JsonValue;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn settings() -> PipelineSettings {
        PipelineSettings {
            frame_rate_hz: 2.0,
            frame_delay: Duration::ZERO,
        }
    }

    fn people(n: usize) -> DetectionResult {
        let dets = (0..n)
            .map(|i| Detection::new(10.0 + i as f32 * 5.0, 20.0, 10.0, 20.0, 0.9, "person"))
            .collect();
        DetectionResult::new(dets, None, JsonValue::Null)
    }

    #[tokio::test]
    async fn test_failed_frame_is_isolated() {
        let mut detector = MockDetector::new();
        let mut call = 0;
        detector.expect_infer().times(3).returning(move |_| {
            call += 1;
            if call == 2 {
                Err(VisionError::Transport("request timed out".to_string()))
            } else {
                Ok(people(call))
            }
        });

        let pipeline = VideoPipeline::new(Arc::new(detector), Arc::new(MockMediaTool::new()), settings());
        let frames = vec![solid_frame(64, 48, [10, 10, 10]); 3];
        let results = pipeline.process_frames(frames).await;

        assert_eq!(results.len(), 3);
        assert_eq!(
            results.iter().map(|r| r.frame_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(!results[0].failed);
        assert!(results[1].failed);
        assert_eq!(results[1].count(), 0);
        assert_eq!(results[1].timestamp_label, "0.5s (ERROR)");
        assert!(!results[1].annotated.is_empty());
        assert_eq!(results[2].count(), 3);

        let stats = VideoStatistics::from_results(&results, 2.0);
        assert_eq!(stats.total_people, 4);
        assert_eq!(stats.max_people, 3);
        assert!((stats.average_people - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_after_each_successful_call() {
        let mut detector = MockDetector::new();
        detector.expect_infer().times(3).returning(|_| Ok(people(1)));

        let pipeline = VideoPipeline::new(
            Arc::new(detector),
            Arc::new(MockMediaTool::new()),
            PipelineSettings {
                frame_rate_hz: 2.0,
                frame_delay: Duration::from_millis(1000),
            },
        );
        let start = tokio::time::Instant::now();
        pipeline
            .process_frames(vec![solid_frame(16, 16, [0, 0, 0]); 3])
            .await;
        // no pause after the last frame
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_extraction_failure_is_fatal() {
        let mut media = MockMediaTool::new();
        media
            .expect_extract_frames()
            .returning(|_, _, _| Err(VisionError::Extraction("bad container".to_string())));
        media.expect_reassemble().never();

        let mut detector = MockDetector::new();
        detector.expect_infer().never();

        let dir = tempfile::tempdir().unwrap();
        let pipeline = VideoPipeline::new(Arc::new(detector), Arc::new(media), settings());
        let err = pipeline
            .run(&dir.path().join("in.mp4"), dir.path(), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_empty_extraction_is_fatal() {
        let mut media = MockMediaTool::new();
        media.expect_extract_frames().returning(|_, _, _| Ok(Vec::new()));

        let dir = tempfile::tempdir().unwrap();
        let pipeline = VideoPipeline::new(Arc::new(MockDetector::new()), Arc::new(media), settings());
        let err = pipeline
            .run(&dir.path().join("in.mp4"), dir.path(), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, VisionError::Extraction(_)));
    }

    /// Records, per call, whether a task spawned before the run has had a turn yet
    struct TurnDetector {
        other_ran: Arc<AtomicBool>,
        observed: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Detector for TurnDetector {
        async fn infer(&self, _frame: &[u8]) -> Result<DetectionResult, VisionError> {
            self.observed.lock().unwrap().push(self.other_ran.load(Ordering::SeqCst));
            Ok(people(2))
        }
    }

    #[tokio::test]
    async fn test_rendering_yields_to_other_tasks() {
        let other_ran = Arc::new(AtomicBool::new(false));
        let detector = Arc::new(TurnDetector {
            other_ran: other_ran.clone(),
            observed: Mutex::new(Vec::new()),
        });
        let flag = other_ran.clone();
        let other = tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let pipeline = VideoPipeline::new(detector.clone(), Arc::new(MockMediaTool::new()), settings());
        let results = pipeline
            .process_frames(vec![solid_frame(640, 480, [20, 20, 20]); 2])
            .await;
        other.await.unwrap();

        assert_eq!(results.len(), 2);
        // the detector never yields, so only the panel render can have let the other task in
        assert_eq!(*detector.observed.lock().unwrap(), vec![false, true]);
    }

    #[tokio::test]
    async fn test_panel_uses_reported_count() {
        let mut detector = MockDetector::new();
        detector
            .expect_infer()
            .returning(|_| Ok(DetectionResult::new(Vec::new(), Some(12), JsonValue::Null)));

        let pipeline = VideoPipeline::new(Arc::new(detector), Arc::new(MockMediaTool::new()), settings());
        let frame = solid_frame(64, 48, [10, 10, 10]);
        let results = pipeline.process_frames(vec![frame.clone()]).await;

        assert_eq!(results[0].count(), 12);
        assert_eq!(results[0].annotated, render_panel(&frame, &[], 12, 1, "0.0s"));
        assert_ne!(results[0].annotated, render_panel(&frame, &[], 0, 1, "0.0s"));
    }
}
