use crate::overlay::codec::{pack_color, LABEL_CAPACITY};
use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashSet;
use std::time::Instant;

/// Rectangle in virtual-desktop coordinates covered by a render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl SurfaceRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            x: left,
            y: top,
            width: right.saturating_sub(left),
            height: bottom.saturating_sub(top),
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn is_degenerate(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width.max(0) as u32, self.height.max(0) as u32)
    }
}

/// Box in surface-local pixels. `x + width` and `y + height` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoxRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn intersection_over_union(&self, other: &BoxRect) -> f32 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let overlap = (x1 - x0).max(0) as i64 * (y1 - y0).max(0) as i64;
        let union = self.area() + other.area() - overlap;
        if union <= 0 {
            return 0.0;
        }
        overlap as f32 / union as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const GREEN: Self = Self::new(0, 255, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn packed(self) -> u32 {
        pack_color(self.r, self.g, self.b)
    }

    pub fn from_packed(color: u32) -> Self {
        Self {
            r: (color & 0xff) as u8,
            g: ((color >> 8) & 0xff) as u8,
            b: ((color >> 16) & 0xff) as u8,
        }
    }
}

/// Fixed-size, NUL-terminated label as handed to the drawing backend.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Label(pub(crate) [u8; LABEL_CAPACITY]);

impl Label {
    pub const EMPTY: Self = Self([0; LABEL_CAPACITY]);

    pub fn from_raw(bytes: [u8; LABEL_CAPACITY]) -> Self {
        Self(bytes)
    }

    pub fn as_raw(&self) -> &[u8; LABEL_CAPACITY] {
        &self.0
    }

    /// Bytes up to (not including) the first NUL.
    pub fn as_bytes(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(LABEL_CAPACITY);
        &self.0[..end]
    }

    /// Text for display. A code point split by truncation renders as U+FFFD.
    pub fn to_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        self.0[0] == 0
    }
}

impl Default for Label {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl std::fmt::Debug for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Label({:?})", self.to_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub id: u64,
    pub rect: BoxRect,
    /// COLORREF-style packed colour, see [`pack_color`].
    pub color: u32,
    pub label: Label,
    /// Milliseconds since [`monotonic_millis`]'s epoch.
    pub last_seen: u64,
    pub paused: bool,
}

impl Detection {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen)
    }
}

/// Detections produced by one inference cycle. Ids are unique within a set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetectionSet {
    detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set, keeping the first occurrence of any repeated id.
    pub fn new(detections: Vec<Detection>) -> Self {
        let mut seen = HashSet::with_capacity(detections.len());
        let total = detections.len();
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|detection| seen.insert(detection.id))
            .collect();
        if detections.len() != total {
            tracing::warn!(
                dropped = total - detections.len(),
                "duplicate detection ids dropped from set"
            );
        }
        Self { detections }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.detections.iter()
    }

    pub fn as_slice(&self) -> &[Detection] {
        &self.detections
    }

    pub fn visible(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(|detection| !detection.paused)
    }

    /// Keeps the first `max` non-paused entries. Paused entries are kept
    /// regardless and do not use up the budget.
    pub fn with_visible_limit(mut self, max: usize) -> Self {
        let mut visible = 0;
        self.detections.retain(|detection| {
            if detection.paused {
                return true;
            }
            visible += 1;
            visible <= max
        });
        self
    }

    /// Copy of the set without entries older than `horizon_ms` at `now_ms`.
    pub fn without_stale(&self, now_ms: u64, horizon_ms: u64) -> Self {
        Self {
            detections: self
                .detections
                .iter()
                .copied()
                .filter(|detection| detection.age_ms(now_ms) <= horizon_ms)
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DetectionSet {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.detections.iter()
    }
}

/// One model output in image-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds elapsed since the first call in this process.
pub fn monotonic_millis() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}
