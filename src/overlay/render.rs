use crate::overlay::model::{BoxRect, Rgb};

/// Colour the surface is cleared to; the layered window treats it as fully
/// transparent.
pub const TRANSPARENCY_COLORKEY: Rgb = Rgb::new(255, 0, 255);
const COLORKEY_SAFE_FALLBACK: Rgb = Rgb::new(254, 0, 255);

/// Labels are drawn this many pixels above the box's top edge.
pub const LABEL_OFFSET_Y: i32 = 20;

pub fn resolve_colorkey_collision(color: Rgb) -> Rgb {
    if color == TRANSPARENCY_COLORKEY {
        COLORKEY_SAFE_FALLBACK
    } else {
        color
    }
}

/// Top-left anchor for a box's label, kept on the surface.
pub fn label_origin(rect: BoxRect) -> (i32, i32) {
    (rect.x.max(0), (rect.y - LABEL_OFFSET_Y).max(0))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgba,
    /// 32-bit top-down DIB layout.
    Bgra,
}

/// Borrowed 32-bit pixel grid that boxes are rasterised into.
pub struct PixelCanvas<'a> {
    pixels: &'a mut [u8],
    width: u32,
    height: u32,
    order: ChannelOrder,
}

impl<'a> PixelCanvas<'a> {
    pub fn new(pixels: &'a mut [u8], width: u32, height: u32, order: ChannelOrder) -> Self {
        debug_assert!(pixels.len() >= (width as usize) * (height as usize) * 4);
        Self {
            pixels,
            width,
            height,
            order,
        }
    }

    fn encode(&self, color: Rgb) -> [u8; 4] {
        match self.order {
            ChannelOrder::Rgba => [color.r, color.g, color.b, 255],
            ChannelOrder::Bgra => [color.b, color.g, color.r, 255],
        }
    }

    pub fn clear(&mut self, color: Rgb) {
        let px = self.encode(color);
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    pub fn fill_rect(&mut self, rect: BoxRect, color: Rgb) {
        let x0 = rect.x.clamp(0, self.width as i32);
        let y0 = rect.y.clamp(0, self.height as i32);
        let x1 = rect.right().clamp(0, self.width as i32);
        let y1 = rect.bottom().clamp(0, self.height as i32);
        if x1 <= x0 || y1 <= y0 {
            return;
        }
        let px = self.encode(color);
        let stride = self.width as usize * 4;
        for y in y0 as usize..y1 as usize {
            let row = &mut self.pixels[y * stride..(y + 1) * stride];
            for chunk in row[x0 as usize * 4..x1 as usize * 4].chunks_exact_mut(4) {
                chunk.copy_from_slice(&px);
            }
        }
    }

    /// Outline drawn inside `rect`, `stroke` pixels thick.
    pub fn draw_rect_outline(&mut self, rect: BoxRect, color: Rgb, stroke: u32) {
        if rect.width <= 0 || rect.height <= 0 {
            return;
        }
        let stroke = (stroke.max(1) as i32).min(rect.width).min(rect.height);
        let (x, y, w, h) = (rect.x, rect.y, rect.width, rect.height);
        self.fill_rect(BoxRect::new(x, y, w, stroke), color);
        self.fill_rect(BoxRect::new(x, rect.bottom() - stroke, w, stroke), color);
        self.fill_rect(BoxRect::new(x, y, stroke, h), color);
        self.fill_rect(BoxRect::new(rect.right() - stroke, y, stroke, h), color);
    }
}

/// Owned RGBA frame used by the headless surface and by tests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        let mut frame = Self {
            width,
            height,
            pixels: vec![0; (width as usize) * (height as usize) * 4],
        };
        frame.canvas().clear(TRANSPARENCY_COLORKEY);
        frame
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn canvas(&mut self) -> PixelCanvas<'_> {
        PixelCanvas::new(&mut self.pixels, self.width, self.height, ChannelOrder::Rgba)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgb {
        let idx = ((y * self.width + x) * 4) as usize;
        Rgb::new(self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2])
    }

    pub fn is_transparent(&self, x: u32, y: u32) -> bool {
        self.pixel(x, y) == TRANSPARENCY_COLORKEY
    }

    pub fn painted_pixels(&self) -> usize {
        let key = [
            TRANSPARENCY_COLORKEY.r,
            TRANSPARENCY_COLORKEY.g,
            TRANSPARENCY_COLORKEY.b,
        ];
        self.pixels
            .chunks_exact(4)
            .filter(|px| px[..3] != key)
            .count()
    }
}
