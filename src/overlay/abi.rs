//! C entry points for loading the overlay as a shared library.
//!
//! One process-wide engine sits behind these functions: a target rectangle,
//! a detection limit, a [`DetectionBuffer`] and, once created, the paint
//! driver that owns the surface. Callers push complete detection arrays with
//! `UpdateDetections`; each call replaces what is on screen.

#![allow(non_snake_case)]

use crate::error::OverlayError;
use crate::overlay::buffer::DetectionBuffer;
use crate::overlay::codec::{sanitize_bounding_box, LABEL_CAPACITY};
use crate::overlay::compositor::DEFAULT_MAX_CONSECUTIVE_FAILURES;
use crate::overlay::driver::{DriverOptions, PaintDriver};
use crate::overlay::messages::{ExitReason, StopSignal};
use crate::overlay::model::{monotonic_millis, Detection, DetectionSet, Label, SurfaceRect};
use crate::overlay::surface::{native_factory, BoxStyle, SurfaceFactory};
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Wire layout of one detection. 84 bytes, field order fixed.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRecord {
    pub id: i32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: u32,
    pub label: [u8; LABEL_CAPACITY],
    pub last_seen: u32,
    pub paused: i32,
}

const _: () = assert!(std::mem::size_of::<DetectionRecord>() == 84);

impl Default for DetectionRecord {
    fn default() -> Self {
        Self {
            id: 0,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            color: 0,
            label: [0; LABEL_CAPACITY],
            last_seen: 0,
            paused: 0,
        }
    }
}

impl From<&Detection> for DetectionRecord {
    fn from(detection: &Detection) -> Self {
        Self {
            id: detection.id as i32,
            x: detection.rect.x,
            y: detection.rect.y,
            width: detection.rect.width,
            height: detection.rect.height,
            color: detection.color,
            label: *detection.label.as_raw(),
            last_seen: detection.last_seen as u32,
            paused: i32::from(detection.paused),
        }
    }
}

impl DetectionRecord {
    /// Converts to an engine detection clamped to a `bounds_w` x `bounds_h`
    /// surface.
    pub fn to_detection(&self, bounds_w: i32, bounds_h: i32) -> Detection {
        let mut label = self.label;
        label[LABEL_CAPACITY - 1] = 0;
        Detection {
            id: u64::from(self.id as u32),
            rect: sanitize_bounding_box(
                self.x,
                self.y,
                self.x.saturating_add(self.width),
                self.y.saturating_add(self.height),
                bounds_w,
                bounds_h,
            ),
            color: self.color & 0x00ff_ffff,
            label: Label::from_raw(label),
            last_seen: u64::from(self.last_seen),
            paused: self.paused != 0,
        }
    }
}

type FactoryMaker = Box<dyn Fn() -> SurfaceFactory + Send>;

struct AbiEngine {
    target: SurfaceRect,
    max_detections: usize,
    buffer: Arc<DetectionBuffer>,
    driver: Option<PaintDriver>,
    make_surface: FactoryMaker,
}

impl AbiEngine {
    fn new() -> Self {
        Self {
            target: SurfaceRect::new(0, 0, 2560, 1440),
            max_detections: 100,
            buffer: Arc::new(DetectionBuffer::new()),
            driver: None,
            make_surface: Box::new(native_factory),
        }
    }

    fn ensure_surface(&mut self) -> Result<&PaintDriver, OverlayError> {
        if self
            .driver
            .as_ref()
            .is_some_and(|driver| !driver.is_running())
        {
            tracing::warn!("previous overlay surface exited; recreating");
            self.teardown();
        }
        if self.driver.is_none() {
            let driver = PaintDriver::spawn(
                self.target,
                (self.make_surface)(),
                Arc::clone(&self.buffer),
                DriverOptions {
                    paint_interval: Duration::from_millis(16),
                    style: BoxStyle::default(),
                    failure_limit: DEFAULT_MAX_CONSECUTIVE_FAILURES,
                },
                StopSignal::new(),
            )?;
            self.driver = Some(driver);
        }
        self.driver
            .as_ref()
            .ok_or_else(|| OverlayError::SurfaceCreation("surface missing after creation".into()))
    }

    fn teardown(&mut self) -> bool {
        match self.driver.take() {
            Some(mut driver) => {
                driver.stop(ExitReason::Stopped);
                true
            }
            None => false,
        }
    }
}

static ENGINE: Lazy<Mutex<AbiEngine>> = Lazy::new(|| Mutex::new(AbiEngine::new()));

fn engine() -> MutexGuard<'static, AbiEngine> {
    ENGINE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Replaces how the exported functions create their surface. Used by hosts
/// that draw somewhere other than a native window.
pub fn set_surface_factory<F>(make: F)
where
    F: Fn() -> SurfaceFactory + Send + 'static,
{
    engine().make_surface = Box::new(make);
}

/// Buffer the exported functions publish into.
pub fn engine_buffer() -> Arc<DetectionBuffer> {
    Arc::clone(&engine().buffer)
}

pub fn engine_target() -> SurfaceRect {
    engine().target
}

pub fn engine_max_detections() -> usize {
    engine().max_detections
}

/// Creates the overlay surface over the current target rectangle without
/// starting to paint. Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn CreateSurface() -> i32 {
    match engine().ensure_surface() {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!(%err, "CreateSurface failed");
            -1
        }
    }
}

/// Stops painting, releases the surface and clears published detections.
#[no_mangle]
pub extern "C" fn DestroySurface() {
    let mut engine = engine();
    if engine.teardown() {
        tracing::info!("overlay surface released");
    }
    engine.buffer.clear();
}

#[no_mangle]
pub extern "C" fn SetTargetRect(left: i32, top: i32, right: i32, bottom: i32) {
    let target = SurfaceRect::from_ltrb(left, top, right, bottom);
    if target.is_degenerate() {
        tracing::warn!(left, top, right, bottom, "ignoring empty target rectangle");
        return;
    }
    let mut engine = engine();
    if let Some(driver) = engine.driver.as_ref() {
        if let Err(err) = driver.resize_or_move(target) {
            tracing::warn!(%err, "surface could not follow new target rectangle");
            return;
        }
    }
    engine.target = target;
    tracing::info!(?target, "target rectangle updated");
}

#[no_mangle]
pub extern "C" fn SetMaxDetections(max: i32) {
    if max <= 0 {
        tracing::warn!(max, "SetMaxDetections ignored; value must be > 0");
        return;
    }
    let mut engine = engine();
    engine.max_detections = max as usize;
    let current = engine.buffer.snapshot();
    if current.visible().count() > engine.max_detections {
        engine.buffer.publish(
            current
                .as_ref()
                .clone()
                .with_visible_limit(engine.max_detections),
        );
    }
    tracing::info!(max, "max detections updated");
}

/// Publishes the first `count` records as the new set. At most the configured
/// maximum of non-paused records is kept; paused records are not counted. A null pointer or non-positive count is ignored.
///
/// # Safety
///
/// `records` must point to `count` initialised records that stay valid for
/// the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn UpdateDetections(records: *const DetectionRecord, count: i32) {
    if records.is_null() || count <= 0 {
        return;
    }
    let records = unsafe { std::slice::from_raw_parts(records, count as usize) };
    let engine = engine();
    let now = monotonic_millis();
    let (bounds_w, bounds_h) = (engine.target.width, engine.target.height);
    let detections = records
        .iter()
        .map(|record| {
            let mut detection = record.to_detection(bounds_w, bounds_h);
            detection.last_seen = now;
            detection
        })
        .collect();
    engine
        .buffer
        .publish(DetectionSet::new(detections).with_visible_limit(engine.max_detections));
}

/// Creates the surface if needed and starts painting. Returns 0 on success,
/// -1 on failure.
#[no_mangle]
pub extern "C" fn Start() -> i32 {
    let mut engine = engine();
    let started = engine.ensure_surface().and_then(PaintDriver::start);
    match started {
        Ok(()) => {
            tracing::info!("overlay started");
            0
        }
        Err(err) => {
            tracing::error!(%err, "Start failed");
            engine.teardown();
            -1
        }
    }
}

/// Stops painting and releases the surface. Published detections are kept
/// for the next `Start`.
#[no_mangle]
pub extern "C" fn Stop() {
    if engine().teardown() {
        tracing::info!("overlay stopped");
    }
}
