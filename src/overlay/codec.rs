//! Conversions from model output into the representation the drawing backend
//! consumes. Every function here is pure and total.

use crate::overlay::model::{BoxRect, Label};

/// Size of the label field in the native detection record.
pub const LABEL_CAPACITY: usize = 50;
/// Longest label payload; the remaining byte is always the terminator.
pub const LABEL_MAX_BYTES: usize = LABEL_CAPACITY - 1;

/// Clamps a corner-form box into `[0, bounds_w] x [0, bounds_h]` and returns
/// it as `(x, y, width, height)` with both extents at least one pixel.
///
/// A collapsed axis is widened by moving the larger coordinate one pixel
/// forward; when the box sits on the far edge the smaller coordinate moves
/// back instead so the result stays inside the bounds.
pub fn sanitize_bounding_box(
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    bounds_w: i32,
    bounds_h: i32,
) -> BoxRect {
    let (x, width) = sanitize_axis(x1, x2, bounds_w);
    let (y, height) = sanitize_axis(y1, y2, bounds_h);
    BoxRect {
        x,
        y,
        width,
        height,
    }
}

fn sanitize_axis(start: i32, end: i32, bound: i32) -> (i32, i32) {
    let bound = bound.max(0);
    let mut start = start.clamp(0, bound);
    let mut end = end.clamp(0, bound);
    if end <= start {
        if start < bound {
            end = start + 1;
        } else {
            start = (bound - 1).max(0);
            end = start + 1;
        }
    }
    (start, end - start)
}

/// Encodes `text` as UTF-8 truncated to [`LABEL_MAX_BYTES`], NUL-terminated and
/// zero-padded to [`LABEL_CAPACITY`].
///
/// Truncation is byte-wise: a multi-byte code point straddling the limit is
/// cut, and the backend shows it as a replacement glyph.
pub fn encode_label(text: &str) -> Label {
    let bytes = text.as_bytes();
    let len = bytes.len().min(LABEL_MAX_BYTES);
    let mut buf = [0u8; LABEL_CAPACITY];
    buf[..len].copy_from_slice(&bytes[..len]);
    Label(buf)
}

/// Packs a colour as `0x00BBGGRR`.
pub fn pack_color(r: u8, g: u8, b: u8) -> u32 {
    ((b as u32) << 16) | ((g as u32) << 8) | r as u32
}
