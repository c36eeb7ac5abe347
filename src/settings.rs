use crate::overlay::controller::OverlayConfig;
use crate::overlay::model::{Rgb, SurfaceRect};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Overlay options persisted as JSON next to the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Display to cover. Out-of-range values fall back to the first monitor.
    #[serde(default)]
    pub monitor_index: usize,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    /// Producer cycles per second.
    #[serde(default = "default_target_fps")]
    pub target_fps: f32,
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
    /// Box and label colour as `#rrggbb`.
    #[serde(default = "default_box_color")]
    pub box_color: String,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: u32,
    #[serde(default = "default_true")]
    pub show_labels: bool,
    /// Overlap above which a lower-confidence box is discarded. `None`
    /// disables de-duplication.
    #[serde(default = "default_dedupe_iou")]
    pub dedupe_iou: Option<f32>,
    /// JSON file of recorded detections to replay.
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_max_detections() -> usize {
    100
}

fn default_conf_threshold() -> f32 {
    0.5
}

fn default_target_fps() -> f32 {
    5.0
}

fn default_stale_after_ms() -> u64 {
    2_000
}

fn default_box_color() -> String {
    "#00ff00".into()
}

fn default_stroke_width() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

fn default_dedupe_iou() -> Option<f32> {
    Some(0.5)
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            monitor_index: 0,
            max_detections: default_max_detections(),
            conf_threshold: default_conf_threshold(),
            target_fps: default_target_fps(),
            stale_after_ms: default_stale_after_ms(),
            box_color: default_box_color(),
            stroke_width: default_stroke_width(),
            show_labels: true,
            dedupe_iou: default_dedupe_iou(),
            replay_path: None,
            debug_logging: false,
            log_file: None,
        }
    }
}

/// Parses `#rrggbb` (the `#` is optional).
pub fn parse_color(value: &str) -> Option<Rgb> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

impl OverlaySettings {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn box_color(&self) -> Rgb {
        match parse_color(&self.box_color) {
            Some(color) => color,
            None => {
                tracing::warn!(
                    "provided box colour '{}' is invalid; using green",
                    self.box_color
                );
                Rgb::GREEN
            }
        }
    }

    /// Runtime configuration covering `target`. Not validated here; the
    /// controller rejects bad values on start.
    pub fn to_config(&self, target: SurfaceRect) -> OverlayConfig {
        OverlayConfig {
            max_detections: self.max_detections,
            conf_threshold: self.conf_threshold,
            producer_rate_hz: self.target_fps,
            stale_after: Duration::from_millis(self.stale_after_ms),
            box_color: self.box_color(),
            stroke_width: self.stroke_width,
            show_labels: self.show_labels,
            dedupe_iou: self.dedupe_iou,
            ..OverlayConfig::new(target)
        }
    }
}
