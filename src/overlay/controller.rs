use crate::error::OverlayError;
use crate::overlay::buffer::DetectionBuffer;
use crate::overlay::compositor::DEFAULT_MAX_CONSECUTIVE_FAILURES;
use crate::overlay::detector::{Detector, FrameSource};
use crate::overlay::driver::{DriverOptions, PaintDriver};
use crate::overlay::messages::{ExitReason, StopSignal};
use crate::overlay::model::{Rgb, SurfaceRect};
use crate::overlay::producer::Producer;
use crate::overlay::surface::{BoxStyle, SurfaceFactory};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Runtime configuration. The producer reads a fresh copy every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub target: SurfaceRect,
    pub max_detections: usize,
    pub conf_threshold: f32,
    pub producer_rate_hz: f32,
    pub paint_interval: Duration,
    /// Boxes older than this are dropped while cycles keep failing.
    pub stale_after: Duration,
    pub box_color: Rgb,
    pub stroke_width: u32,
    pub show_labels: bool,
    pub dedupe_iou: Option<f32>,
    pub max_consecutive_draw_failures: u32,
}

impl OverlayConfig {
    pub fn new(target: SurfaceRect) -> Self {
        Self {
            target,
            max_detections: 100,
            conf_threshold: 0.5,
            producer_rate_hz: 5.0,
            paint_interval: Duration::from_millis(16),
            stale_after: Duration::from_millis(2_000),
            box_color: Rgb::GREEN,
            stroke_width: 4,
            show_labels: true,
            dedupe_iou: Some(0.5),
            max_consecutive_draw_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn validate(&self) -> Result<(), OverlayError> {
        if self.target.is_degenerate() {
            return Err(OverlayError::Configuration(format!(
                "target rectangle {:?} has no area",
                self.target
            )));
        }
        if self.max_detections == 0 {
            return Err(OverlayError::Configuration(
                "max_detections must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(OverlayError::Configuration(format!(
                "conf_threshold {} is outside 0..=1",
                self.conf_threshold
            )));
        }
        if !(self.producer_rate_hz.is_finite() && self.producer_rate_hz > 0.0) {
            return Err(OverlayError::Configuration(format!(
                "producer rate {} Hz is not positive",
                self.producer_rate_hz
            )));
        }
        if self.paint_interval.is_zero() {
            return Err(OverlayError::Configuration(
                "paint interval must be non-zero".into(),
            ));
        }
        if let Some(iou) = self.dedupe_iou {
            if !(iou > 0.0 && iou <= 1.0) {
                return Err(OverlayError::Configuration(format!(
                    "dedupe IoU {iou} is outside (0, 1]"
                )));
            }
        }
        if self.max_consecutive_draw_failures == 0 {
            return Err(OverlayError::Configuration(
                "draw failure limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn producer_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.producer_rate_hz.max(f32::EPSILON)))
    }

    pub fn box_style(&self) -> BoxStyle {
        BoxStyle {
            stroke_width: self.stroke_width,
            show_labels: self.show_labels,
        }
    }
}

/// External pieces the overlay drives.
pub struct Collaborators {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn Detector>,
    pub surface: SurfaceFactory,
}

/// Owns one running overlay: the render surface, its paint driver and the
/// producer thread. Dropping the controller stops everything.
pub struct OverlayController {
    config: Arc<Mutex<OverlayConfig>>,
    buffer: Arc<DetectionBuffer>,
    stop: StopSignal,
    driver: Option<PaintDriver>,
    producer: Option<JoinHandle<()>>,
    exit: Option<ExitReason>,
}

impl OverlayController {
    /// Validates `config`, creates the surface, then starts painting and
    /// producing. Anything acquired before a failure is released before the
    /// error is returned.
    pub fn start(config: OverlayConfig, collaborators: Collaborators) -> Result<Self, OverlayError> {
        config.validate()?;
        let Collaborators {
            source,
            detector,
            surface,
        } = collaborators;

        let buffer = Arc::new(DetectionBuffer::new());
        let stop = StopSignal::new();
        let driver = PaintDriver::spawn(
            config.target,
            surface,
            Arc::clone(&buffer),
            DriverOptions {
                paint_interval: config.paint_interval,
                style: config.box_style(),
                failure_limit: config.max_consecutive_draw_failures,
            },
            stop.clone(),
        )?;

        let target = config.target;
        let config = Arc::new(Mutex::new(config));
        let mut controller = Self {
            config: Arc::clone(&config),
            buffer: Arc::clone(&buffer),
            stop: stop.clone(),
            driver: Some(driver),
            producer: None,
            exit: None,
        };

        if let Some(driver) = controller.driver.as_ref() {
            driver.start()?;
        }
        let producer = Producer::new(source, detector, buffer, config);
        controller.producer = Some(producer.spawn(stop)?);

        tracing::info!(?target, "overlay started");
        Ok(controller)
    }

    fn lock_config(&self) -> MutexGuard<'_, OverlayConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> OverlayConfig {
        self.lock_config().clone()
    }

    pub fn buffer(&self) -> Arc<DetectionBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Handle that stops this overlay from another thread.
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.stop.is_triggered() && self.driver.as_ref().is_some_and(PaintDriver::is_running)
    }

    /// Changes limits for the next producer cycle. Invalid values leave the
    /// configuration untouched.
    pub fn update_settings(
        &self,
        max_detections: Option<usize>,
        conf_threshold: Option<f32>,
    ) -> Result<(), OverlayError> {
        let mut config = self.lock_config();
        let mut candidate = config.clone();
        if let Some(max) = max_detections {
            candidate.max_detections = max;
        }
        if let Some(conf) = conf_threshold {
            candidate.conf_threshold = conf;
        }
        candidate.validate()?;
        tracing::info!(
            max_detections = candidate.max_detections,
            conf_threshold = candidate.conf_threshold,
            "overlay settings updated"
        );
        *config = candidate;
        Ok(())
    }

    pub fn update_style(&self, style: BoxStyle) -> Result<(), OverlayError> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| OverlayError::Fatal("overlay is stopped".into()))?;
        driver.set_style(style)?;
        let mut config = self.lock_config();
        config.stroke_width = style.stroke_width;
        config.show_labels = style.show_labels;
        Ok(())
    }

    /// Moves the surface to `target`; later cycles clamp boxes to it.
    pub fn retarget(&self, target: SurfaceRect) -> Result<(), OverlayError> {
        if target.is_degenerate() {
            return Err(OverlayError::Configuration(format!(
                "target rectangle {target:?} has no area"
            )));
        }
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| OverlayError::Fatal("overlay is stopped".into()))?;
        driver.resize_or_move(target)?;
        self.lock_config().target = target;
        Ok(())
    }

    /// Stops the producer, then the compositor, then destroys the surface.
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.shutdown(ExitReason::Stopped);
    }

    fn shutdown(&mut self, reason: ExitReason) {
        self.stop.trigger(reason.clone());
        let reason = self.stop.reason().unwrap_or(reason);

        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                tracing::error!("overlay producer thread panicked");
            }
        }
        if let Some(mut driver) = self.driver.take() {
            driver.stop(reason.clone());
        }
        if self.exit.is_none() {
            tracing::info!(?reason, "overlay stopped");
            self.exit = Some(reason);
        }
    }

    /// Blocks until the overlay is stopped or fails, then tears it down.
    pub fn wait(&mut self) -> Result<(), OverlayError> {
        let reason = self.stop.wait();
        self.shutdown(reason.clone());
        match reason {
            ExitReason::Fatal(detail) => Err(OverlayError::Fatal(detail)),
            ExitReason::Stopped | ExitReason::Interrupted => Ok(()),
        }
    }

    /// [`wait`](Self::wait) with Ctrl-C wired to a clean stop.
    pub fn run_until_ctrl_c(&mut self) -> Result<(), OverlayError> {
        let signal = self.stop.clone();
        ctrlc::set_handler(move || {
            tracing::info!("interrupt received");
            signal.trigger(ExitReason::Interrupted);
        })
        .map_err(|err| {
            OverlayError::BackendAcquisition(format!("cannot install Ctrl-C handler: {err}"))
        })?;
        self.wait()
    }
}

impl Drop for OverlayController {
    fn drop(&mut self) {
        self.stop();
    }
}
