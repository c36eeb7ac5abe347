use crate::error::OverlayError;
use crate::overlay::buffer::DetectionBuffer;
use crate::overlay::codec::{encode_label, sanitize_bounding_box};
use crate::overlay::controller::OverlayConfig;
use crate::overlay::detector::{Detector, FrameSource};
use crate::overlay::messages::StopSignal;
use crate::overlay::model::{monotonic_millis, Detection, DetectionSet, RawDetection};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const UNKNOWN_LABEL: &str = "Unknown";

/// Time left in the current period, never negative.
pub fn pacing_delay(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

fn raw_iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let area = |d: &RawDetection| (d.x2 - d.x1).max(0.0) * (d.y2 - d.y1).max(0.0);
    let overlap_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let overlap_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let overlap = overlap_w * overlap_h;
    let union = area(a) + area(b) - overlap;
    if union <= 0.0 {
        return 0.0;
    }
    overlap / union
}

/// Filters by confidence, orders highest-confidence first, drops boxes that
/// overlap an already kept one by more than `dedupe_iou`, then keeps at
/// most `max_detections`.
///
/// The sort is stable, so equally confident detections keep model order.
pub fn select_detections(
    raw: &[RawDetection],
    conf_threshold: f32,
    max_detections: usize,
    dedupe_iou: Option<f32>,
) -> Vec<RawDetection> {
    let mut candidates: Vec<RawDetection> = raw
        .iter()
        .copied()
        .filter(|det| det.confidence >= conf_threshold)
        .collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<RawDetection> = Vec::with_capacity(candidates.len().min(max_detections));
    for candidate in candidates {
        if kept.len() == max_detections {
            break;
        }
        let duplicate = dedupe_iou.is_some_and(|limit| {
            kept.iter()
                .any(|existing| raw_iou(existing, &candidate) > limit)
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub raw: usize,
    pub published: usize,
}

/// Capture, inference and publish, one cycle at a time.
pub struct Producer {
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    buffer: Arc<DetectionBuffer>,
    config: Arc<Mutex<OverlayConfig>>,
    next_id: u64,
}

impl Producer {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        buffer: Arc<DetectionBuffer>,
        config: Arc<Mutex<OverlayConfig>>,
    ) -> Self {
        Self {
            source,
            detector,
            buffer,
            config,
            next_id: 1,
        }
    }

    fn config_snapshot(&self) -> OverlayConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn run_cycle(&mut self) -> Result<CycleReport, OverlayError> {
        self.run_cycle_at(monotonic_millis())
    }

    /// One cycle against a config snapshot taken now; edits made while the
    /// cycle runs apply to the next one.
    ///
    /// On a capture or inference failure the previous set stays visible,
    /// minus entries older than the staleness horizon.
    pub fn run_cycle_at(&mut self, now_ms: u64) -> Result<CycleReport, OverlayError> {
        let config = self.config_snapshot();
        match self.produce(&config, now_ms) {
            Ok((set, raw)) => {
                let report = CycleReport {
                    raw,
                    published: set.len(),
                };
                self.buffer.publish(set);
                Ok(report)
            }
            Err(err) => {
                self.expire_stale(now_ms, &config);
                Err(err)
            }
        }
    }

    fn produce(
        &mut self,
        config: &OverlayConfig,
        now_ms: u64,
    ) -> Result<(DetectionSet, usize), OverlayError> {
        let frame = self
            .source
            .capture(config.target)
            .map_err(|err| OverlayError::TransientCapture(format!("{err:#}")))?;
        let raw = self
            .detector
            .detect(&frame)
            .map_err(|err| OverlayError::TransientInference(format!("{err:#}")))?;

        let selected = select_detections(
            &raw,
            config.conf_threshold,
            config.max_detections,
            config.dedupe_iou,
        );

        let (bounds_w, bounds_h) = (config.target.width, config.target.height);
        let scale_x = axis_scale(bounds_w, frame.width());
        let scale_y = axis_scale(bounds_h, frame.height());
        let color = config.box_color.packed();

        let detections = selected
            .iter()
            .map(|det| {
                let rect = sanitize_bounding_box(
                    (det.x1 * scale_x).round() as i32,
                    (det.y1 * scale_y).round() as i32,
                    (det.x2 * scale_x).round() as i32,
                    (det.y2 * scale_y).round() as i32,
                    bounds_w,
                    bounds_h,
                );
                let label = encode_label(
                    self.detector
                        .class_name(det.class_id)
                        .unwrap_or(UNKNOWN_LABEL),
                );
                let id = self.next_id;
                self.next_id += 1;
                Detection {
                    id,
                    rect,
                    color,
                    label,
                    last_seen: now_ms,
                    paused: false,
                }
            })
            .collect();

        Ok((DetectionSet::new(detections), raw.len()))
    }

    fn expire_stale(&self, now_ms: u64, config: &OverlayConfig) {
        let previous = self.buffer.snapshot();
        let horizon = config.stale_after.as_millis() as u64;
        let fresh = previous.without_stale(now_ms, horizon);
        if fresh.len() != previous.len() {
            tracing::debug!(
                expired = previous.len() - fresh.len(),
                "dropping stale detections"
            );
            self.buffer.publish(fresh);
        }
    }

    /// Runs cycles paced to the configured rate until `stop` fires.
    pub fn run(mut self, stop: StopSignal) {
        tracing::info!("overlay producer started");
        while !stop.is_triggered() {
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| self.run_cycle()));
            match outcome {
                Ok(Ok(report)) => {
                    tracing::debug!(raw = report.raw, published = report.published, "producer cycle");
                }
                Ok(Err(err)) => {
                    tracing::warn!(%err, "producer cycle skipped");
                }
                Err(_) => {
                    tracing::error!("producer cycle panicked; skipping");
                }
            }
            let period = self.config_snapshot().producer_period();
            if stop
                .wait_timeout(pacing_delay(period, started.elapsed()))
                .is_some()
            {
                break;
            }
        }
        tracing::info!("overlay producer stopped");
    }

    pub fn spawn(self, stop: StopSignal) -> Result<JoinHandle<()>, OverlayError> {
        thread::Builder::new()
            .name("overlay-producer".to_string())
            .spawn(move || self.run(stop))
            .map_err(|err| {
                OverlayError::BackendAcquisition(format!("failed to spawn producer thread: {err}"))
            })
    }
}

fn axis_scale(target: i32, image: u32) -> f32 {
    if image == 0 || target <= 0 {
        return 1.0;
    }
    target as f32 / image as f32
}
