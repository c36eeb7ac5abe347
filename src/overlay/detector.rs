use crate::error::OverlayError;
use crate::overlay::model::{RawDetection, SurfaceRect};
use anyhow::{anyhow, Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Supplies frames of a desktop region.
pub trait FrameSource: Send {
    /// Blocking; the returned image should match `region`'s size.
    fn capture(&mut self, region: SurfaceRect) -> Result<RgbaImage>;
}

/// Object detection model.
pub trait Detector: Send {
    /// Boxes in image-pixel coordinates of `frame`.
    fn detect(&mut self, frame: &RgbaImage) -> Result<Vec<RawDetection>>;

    fn class_name(&self, class_id: usize) -> Option<&str>;
}

/// Captures through the `screenshots` crate, which owns the per-platform
/// grab.
#[derive(Debug, Default)]
pub struct ScreenCapture;

impl FrameSource for ScreenCapture {
    fn capture(&mut self, region: SurfaceRect) -> Result<RgbaImage> {
        let screen = screenshots::Screen::from_point(region.x, region.y)?;
        let (width, height) = region.size();
        let image = screen.capture_area(
            region.x - screen.display_info.x,
            region.y - screen.display_info.y,
            width,
            height,
        )?;
        Ok(image)
    }
}

/// Recorded model output, as stored in a replay file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub detections: Vec<RawDetection>,
}

/// Detector that returns detections recorded in a JSON file.
///
/// The file is re-read whenever its modification time changes, so editing it
/// while the overlay runs updates the boxes on the next cycle.
#[derive(Debug)]
pub struct ReplayDetector {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
    replay: Replay,
}

impl ReplayDetector {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OverlayError> {
        let path = path.as_ref().to_path_buf();
        let (replay, modified) = read_replay(&path).map_err(|err| {
            OverlayError::BackendAcquisition(format!(
                "cannot load detections from {}: {err:#}",
                path.display()
            ))
        })?;
        tracing::info!(
            path = %path.display(),
            classes = replay.classes.len(),
            detections = replay.detections.len(),
            "replay detector loaded"
        );
        Ok(Self {
            path: Some(path),
            modified,
            replay,
        })
    }

    pub fn from_replay(replay: Replay) -> Self {
        Self {
            path: None,
            modified: None,
            replay,
        }
    }

    fn refresh(&mut self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok();
        if modified.is_some() && modified == self.modified {
            return Ok(());
        }
        let (replay, modified) = read_replay(path)?;
        tracing::debug!(path = %path.display(), "replay file reloaded");
        self.replay = replay;
        self.modified = modified;
        Ok(())
    }
}

fn read_replay(path: &Path) -> Result<(Replay, Option<SystemTime>)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let modified = std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok();
    let replay: Replay = serde_json::from_str(&content)
        .map_err(|err| anyhow!("malformed replay file {}: {err}", path.display()))?;
    Ok((replay, modified))
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _frame: &RgbaImage) -> Result<Vec<RawDetection>> {
        self.refresh()?;
        Ok(self.replay.detections.clone())
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        self.replay.classes.get(class_id).map(String::as_str)
    }
}
