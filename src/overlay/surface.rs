use crate::error::{DrawError, OverlayError};
use crate::overlay::model::{BoxRect, Detection, Rgb, SurfaceRect};
use crate::overlay::render::{resolve_colorkey_collision, FrameBuffer};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxStyle {
    pub stroke_width: u32,
    pub show_labels: bool,
}

impl Default for BoxStyle {
    fn default() -> Self {
        Self {
            stroke_width: 4,
            show_labels: true,
        }
    }
}

/// Transparent, topmost, click-through surface covering one monitor region.
///
/// A surface is used only from the thread that created it; the paint driver
/// creates it through a [`SurfaceFactory`] on its own thread.
pub trait RenderSurface {
    fn bounds(&self) -> SurfaceRect;

    /// Repositions and resizes without recreating the surface.
    fn resize_or_move(&mut self, target: SurfaceRect) -> Result<(), OverlayError>;

    /// Services pending native events for this surface.
    fn pump(&mut self) {}

    fn begin_frame(&mut self) -> Result<(), DrawError>;

    fn draw_detection(&mut self, detection: &Detection, style: &BoxStyle)
        -> Result<(), DrawError>;

    fn present(&mut self) -> Result<(), DrawError>;

    /// Releases every native handle. Calling it again is a no-op.
    fn destroy(&mut self);

    fn is_destroyed(&self) -> bool;
}

pub type SurfaceFactory =
    Box<dyn FnOnce(SurfaceRect) -> Result<Box<dyn RenderSurface>, OverlayError> + Send>;

/// Factory for the platform's native surface: a GDI layered window on
/// Windows, an in-memory surface elsewhere.
pub fn native_factory() -> SurfaceFactory {
    Box::new(|target| {
        #[cfg(windows)]
        {
            let surface = platform::GdiSurface::create(target)?;
            Ok(Box::new(surface) as Box<dyn RenderSurface>)
        }

        #[cfg(not(windows))]
        {
            tracing::warn!("no native overlay backend on this platform; using headless surface");
            let surface = HeadlessSurface::create(target)?;
            Ok(Box::new(surface) as Box<dyn RenderSurface>)
        }
    })
}

/// A box as it was handed to a headless surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawnBox {
    pub id: u64,
    pub rect: BoxRect,
    pub color: Rgb,
    pub label: Option<String>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    bounds: SurfaceRect,
    frame: FrameBuffer,
    boxes: Vec<DrawnBox>,
    presented_frames: u64,
    releases: u32,
    moves: Vec<SurfaceRect>,
    pending_failures: u32,
}

/// Surface that rasterises into memory. Backs non-Windows builds and lets
/// tests observe exactly what a tick drew.
pub struct HeadlessSurface {
    shared: Arc<Mutex<HeadlessState>>,
    bounds: SurfaceRect,
    pending: FrameBuffer,
    pending_boxes: Vec<DrawnBox>,
    destroyed: bool,
}

impl HeadlessSurface {
    pub fn create(target: SurfaceRect) -> Result<Self, OverlayError> {
        Self::with_state(target, Arc::default())
    }

    fn with_state(
        target: SurfaceRect,
        shared: Arc<Mutex<HeadlessState>>,
    ) -> Result<Self, OverlayError> {
        if target.is_degenerate() {
            return Err(OverlayError::SurfaceCreation(format!(
                "target rectangle {target:?} has no area"
            )));
        }
        let (width, height) = target.size();
        {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.bounds = target;
            state.frame = FrameBuffer::new(width, height);
        }
        Ok(Self {
            shared,
            bounds: target,
            pending: FrameBuffer::new(width, height),
            pending_boxes: Vec::new(),
            destroyed: false,
        })
    }

    fn fail_if_injected(&self, operation: &'static str) -> Result<(), DrawError> {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(DrawError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

impl RenderSurface for HeadlessSurface {
    fn bounds(&self) -> SurfaceRect {
        self.bounds
    }

    fn resize_or_move(&mut self, target: SurfaceRect) -> Result<(), OverlayError> {
        if self.destroyed {
            return Err(OverlayError::SurfaceCreation(
                "surface already destroyed".into(),
            ));
        }
        if target.is_degenerate() {
            return Err(OverlayError::Configuration(format!(
                "target rectangle {target:?} has no area"
            )));
        }
        let resized = target.size() != self.bounds.size();
        self.bounds = target;
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if resized {
            // Both halves of the swap chain must match the new size.
            let (width, height) = target.size();
            self.pending = FrameBuffer::new(width, height);
            state.frame = FrameBuffer::new(width, height);
        }
        state.bounds = target;
        state.moves.push(target);
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), DrawError> {
        if self.destroyed {
            return Err(DrawError::new("begin_frame", "surface destroyed"));
        }
        self.fail_if_injected("begin_frame")?;
        self.pending
            .canvas()
            .clear(crate::overlay::render::TRANSPARENCY_COLORKEY);
        self.pending_boxes.clear();
        Ok(())
    }

    fn draw_detection(
        &mut self,
        detection: &Detection,
        style: &BoxStyle,
    ) -> Result<(), DrawError> {
        let color = resolve_colorkey_collision(Rgb::from_packed(detection.color));
        self.pending
            .canvas()
            .draw_rect_outline(detection.rect, color, style.stroke_width);
        self.pending_boxes.push(DrawnBox {
            id: detection.id,
            rect: detection.rect,
            color,
            label: (style.show_labels && !detection.label.is_empty())
                .then(|| detection.label.to_text().into_owned()),
        });
        Ok(())
    }

    fn present(&mut self) -> Result<(), DrawError> {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::swap(&mut state.frame, &mut self.pending);
        state.boxes = std::mem::take(&mut self.pending_boxes);
        state.presented_frames += 1;
        Ok(())
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pending = FrameBuffer::default();
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.releases += 1;
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Read side of a headless surface, usable from any thread.
#[derive(Clone, Default)]
pub struct SurfaceProbe {
    shared: Arc<Mutex<HeadlessState>>,
}

impl SurfaceProbe {
    fn with<T>(&self, f: impl FnOnce(&HeadlessState) -> T) -> T {
        let state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&*state)
    }

    /// Boxes of the most recently presented frame.
    pub fn boxes(&self) -> Vec<DrawnBox> {
        self.with(|state| state.boxes.clone())
    }

    pub fn frame(&self) -> FrameBuffer {
        self.with(|state| state.frame.clone())
    }

    pub fn presented_frames(&self) -> u64 {
        self.with(|state| state.presented_frames)
    }

    /// How many times native resources were actually released.
    pub fn releases(&self) -> u32 {
        self.with(|state| state.releases)
    }

    pub fn bounds(&self) -> SurfaceRect {
        self.with(|state| state.bounds)
    }

    pub fn moves(&self) -> Vec<SurfaceRect> {
        self.with(|state| state.moves.clone())
    }

    /// Makes the next `count` frames fail in `begin_frame`.
    pub fn fail_next_frames(&self, count: u32) {
        let mut state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending_failures = count;
    }
}

/// Headless factory plus a probe onto the surface it will create.
pub fn headless_factory() -> (SurfaceFactory, SurfaceProbe) {
    let probe = SurfaceProbe::default();
    (headless_factory_with(&probe), probe)
}

/// Headless factory whose surface reports to an existing probe.
pub fn headless_factory_with(probe: &SurfaceProbe) -> SurfaceFactory {
    let shared = Arc::clone(&probe.shared);
    Box::new(move |target| {
        let surface = HeadlessSurface::with_state(target, shared)?;
        Ok(Box::new(surface) as Box<dyn RenderSurface>)
    })
}

#[cfg(windows)]
mod platform {
    use super::{BoxStyle, RenderSurface};
    use crate::error::{DrawError, OverlayError};
    use crate::overlay::model::{Detection, Rgb, SurfaceRect};
    use crate::overlay::render::{
        label_origin, resolve_colorkey_collision, ChannelOrder, PixelCanvas,
        TRANSPARENCY_COLORKEY,
    };
    use std::mem;
    use std::ptr;
    use std::sync::Once;
    use windows::core::{w, PCWSTR};
    use windows::Win32::Foundation::{COLORREF, HANDLE, HWND, LPARAM, LRESULT, WPARAM};
    use windows::Win32::Graphics::Gdi::{
        BeginPaint, BitBlt, CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, EndPaint,
        GdiFlush, GetDC, ReleaseDC, SelectObject, SetBkMode, SetTextColor, TextOutW, BITMAPINFO,
        BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, PAINTSTRUCT, SRCCOPY,
        TRANSPARENT,
    };
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetWindowLongPtrW,
        PeekMessageW, RegisterClassW, SetLayeredWindowAttributes, SetWindowDisplayAffinity,
        SetWindowLongPtrW, SetWindowPos, ShowWindow, TranslateMessage, GWLP_USERDATA,
        HWND_TOPMOST, LWA_COLORKEY, MSG, PM_REMOVE, SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE,
        SW_SHOWNOACTIVATE, WDA_EXCLUDEFROMCAPTURE, WINDOW_EX_STYLE, WINDOW_STYLE, WM_ACTIVATE,
        WM_ERASEBKGND, WM_PAINT, WM_SHOWWINDOW, WM_WINDOWPOSCHANGED, WNDCLASSW, WS_EX_LAYERED,
        WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_EX_TRANSPARENT, WS_POPUP,
    };

    const CLASS_NAME: PCWSTR = w!("DetectOverlaySurface");

    /// `WS_EX_TRANSPARENT` keeps the window out of hit-testing so input
    /// reaches whatever is underneath.
    pub fn compose_surface_ex_style() -> WINDOW_EX_STYLE {
        WS_EX_LAYERED | WS_EX_TRANSPARENT | WS_EX_TOPMOST | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE
    }

    pub fn transparency_colorkey() -> COLORREF {
        COLORREF(TRANSPARENCY_COLORKEY.packed())
    }

    /// Copies the dirty region from the memory DC stored in the window's
    /// user data.
    unsafe fn blit_from_memory_dc(hwnd: HWND) {
        let mut ps = PAINTSTRUCT::default();
        let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
        let mem_dc = HDC(unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *mut _);
        if !hdc.0.is_null() && !mem_dc.0.is_null() {
            let dirty = ps.rcPaint;
            let _ = unsafe {
                BitBlt(
                    hdc,
                    dirty.left,
                    dirty.top,
                    dirty.right - dirty.left,
                    dirty.bottom - dirty.top,
                    mem_dc,
                    dirty.left,
                    dirty.top,
                    SRCCOPY,
                )
            };
        }
        let _ = unsafe { EndPaint(hwnd, &ps) };
    }

    /// Other topmost windows can be raised above ours; push back to the top
    /// without stealing focus.
    unsafe fn reassert_topmost(hwnd: HWND) {
        let flags = SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE;
        let _ = unsafe { SetWindowPos(hwnd, HWND_TOPMOST, 0, 0, 0, 0, flags) };
    }

    unsafe extern "system" fn surface_wndproc(
        hwnd: HWND,
        msg: u32,
        wparam: WPARAM,
        lparam: LPARAM,
    ) -> LRESULT {
        match msg {
            WM_ERASEBKGND => LRESULT(1),
            WM_PAINT => {
                unsafe { blit_from_memory_dc(hwnd) };
                LRESULT(0)
            }
            WM_SHOWWINDOW | WM_ACTIVATE | WM_WINDOWPOSCHANGED => {
                unsafe { reassert_topmost(hwnd) };
                unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
            }
            _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
        }
    }

    struct DibSection {
        bitmap: HBITMAP,
        bits: *mut u8,
        width: u32,
        height: u32,
    }

    fn allocate_dib(mem_dc: HDC, width: i32, height: i32) -> Option<DibSection> {
        let mut bmi = BITMAPINFO::default();
        bmi.bmiHeader = BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width,
            biHeight: -height,
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        };

        let mut bits: *mut core::ffi::c_void = ptr::null_mut();
        let bitmap = unsafe {
            CreateDIBSection(mem_dc, &bmi, DIB_RGB_COLORS, &mut bits, HANDLE::default(), 0).ok()?
        };
        if bits.is_null() {
            unsafe {
                let _ = DeleteObject(bitmap);
            }
            return None;
        }
        Some(DibSection {
            bitmap,
            bits: bits as *mut u8,
            width: width as u32,
            height: height as u32,
        })
    }

    #[derive(Debug)]
    pub struct GdiSurface {
        hwnd: HWND,
        mem_dc: HDC,
        dib: HBITMAP,
        old_bitmap: HGDIOBJ,
        bits: *mut u8,
        size: (u32, u32),
        bounds: SurfaceRect,
    }

    impl GdiSurface {
        pub fn create(target: SurfaceRect) -> Result<Self, OverlayError> {
            if target.is_degenerate() {
                return Err(OverlayError::SurfaceCreation(format!(
                    "target rectangle {target:?} has no area"
                )));
            }

            static REGISTER_CLASS: Once = Once::new();
            let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }
                .map_err(|err| OverlayError::SurfaceCreation(format!("GetModuleHandleW: {err}")))?;

            REGISTER_CLASS.call_once(|| unsafe {
                let wc = WNDCLASSW {
                    hInstance: hinstance.into(),
                    lpszClassName: CLASS_NAME,
                    lpfnWndProc: Some(surface_wndproc),
                    ..Default::default()
                };
                let _ = RegisterClassW(&wc);
            });

            let hwnd = unsafe {
                CreateWindowExW(
                    compose_surface_ex_style(),
                    CLASS_NAME,
                    PCWSTR::null(),
                    WINDOW_STYLE(WS_POPUP.0),
                    target.x,
                    target.y,
                    target.width,
                    target.height,
                    None,
                    None,
                    hinstance,
                    None,
                )
            }
            .map_err(|err| OverlayError::SurfaceCreation(format!("CreateWindowExW: {err}")))?;

            let mut surface = Self {
                hwnd,
                mem_dc: HDC::default(),
                dib: HBITMAP::default(),
                old_bitmap: HGDIOBJ::default(),
                bits: ptr::null_mut(),
                size: (0, 0),
                bounds: target,
            };

            if let Err(err) =
                unsafe { SetLayeredWindowAttributes(hwnd, transparency_colorkey(), 255, LWA_COLORKEY) }
            {
                surface.destroy();
                return Err(OverlayError::SurfaceCreation(format!(
                    "SetLayeredWindowAttributes: {err}"
                )));
            }

            surface.mem_dc = unsafe { CreateCompatibleDC(HDC::default()) };
            if surface.mem_dc.0.is_null() {
                surface.destroy();
                return Err(OverlayError::SurfaceCreation(
                    "CreateCompatibleDC returned null".into(),
                ));
            }

            let Some(dib) = allocate_dib(surface.mem_dc, target.width, target.height) else {
                surface.destroy();
                return Err(OverlayError::SurfaceCreation(
                    "CreateDIBSection failed".into(),
                ));
            };
            surface.old_bitmap = unsafe { SelectObject(surface.mem_dc, dib.bitmap) };
            surface.adopt_dib(dib);
            surface.canvas().clear(TRANSPARENCY_COLORKEY);

            unsafe {
                let _ = SetWindowLongPtrW(hwnd, GWLP_USERDATA, surface.mem_dc.0 as isize);
                // Keeps the model from seeing our own boxes in later captures.
                if let Err(err) = SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE) {
                    tracing::warn!(%err, "overlay surface will be visible to screen capture");
                }
                let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
            }

            tracing::info!(?target, "overlay surface created");
            Ok(surface)
        }

        fn adopt_dib(&mut self, dib: DibSection) {
            self.dib = dib.bitmap;
            self.bits = dib.bits;
            self.size = (dib.width, dib.height);
        }

        fn canvas(&mut self) -> PixelCanvas<'_> {
            let len = (self.size.0 as usize) * (self.size.1 as usize) * 4;
            let pixels: &mut [u8] = if self.bits.is_null() {
                &mut []
            } else {
                unsafe { std::slice::from_raw_parts_mut(self.bits, len) }
            };
            let (width, height) = if self.bits.is_null() { (0, 0) } else { self.size };
            PixelCanvas::new(pixels, width, height, ChannelOrder::Bgra)
        }

        fn ensure_live(&self, operation: &'static str) -> Result<(), DrawError> {
            if self.hwnd.0.is_null() || self.mem_dc.0.is_null() || self.bits.is_null() {
                return Err(DrawError::new(operation, "surface destroyed"));
            }
            Ok(())
        }
    }

    impl RenderSurface for GdiSurface {
        fn bounds(&self) -> SurfaceRect {
            self.bounds
        }

        fn resize_or_move(&mut self, target: SurfaceRect) -> Result<(), OverlayError> {
            if target.is_degenerate() {
                return Err(OverlayError::Configuration(format!(
                    "target rectangle {target:?} has no area"
                )));
            }
            if self.hwnd.0.is_null() {
                return Err(OverlayError::SurfaceCreation(
                    "surface already destroyed".into(),
                ));
            }

            if target.size() != self.size {
                let dib = allocate_dib(self.mem_dc, target.width, target.height).ok_or_else(
                    || OverlayError::SurfaceCreation("CreateDIBSection failed on resize".into()),
                )?;
                unsafe {
                    let _ = GdiFlush();
                    let _ = SelectObject(self.mem_dc, dib.bitmap);
                    let _ = DeleteObject(self.dib);
                }
                self.adopt_dib(dib);
                self.canvas().clear(TRANSPARENCY_COLORKEY);
            }

            unsafe {
                SetWindowPos(
                    self.hwnd,
                    HWND_TOPMOST,
                    target.x,
                    target.y,
                    target.width,
                    target.height,
                    SWP_NOACTIVATE,
                )
            }
            .map_err(|err| OverlayError::SurfaceCreation(format!("SetWindowPos: {err}")))?;
            self.bounds = target;
            tracing::info!(?target, "overlay surface moved");
            Ok(())
        }

        fn pump(&mut self) {
            unsafe {
                let mut msg = MSG::default();
                while PeekMessageW(&mut msg, self.hwnd, 0, 0, PM_REMOVE).into() {
                    let _ = TranslateMessage(&msg);
                    let _ = DispatchMessageW(&msg);
                }
            }
        }

        fn begin_frame(&mut self) -> Result<(), DrawError> {
            self.ensure_live("begin_frame")?;
            unsafe {
                let _ = GdiFlush();
            }
            self.canvas().clear(TRANSPARENCY_COLORKEY);
            Ok(())
        }

        fn draw_detection(
            &mut self,
            detection: &Detection,
            style: &BoxStyle,
        ) -> Result<(), DrawError> {
            self.ensure_live("draw_detection")?;
            let color = resolve_colorkey_collision(Rgb::from_packed(detection.color));
            // Pending GDI text output must land before touching the bits.
            unsafe {
                let _ = GdiFlush();
            }
            self.canvas()
                .draw_rect_outline(detection.rect, color, style.stroke_width);

            if style.show_labels && !detection.label.is_empty() {
                let text: Vec<u16> = detection.label.to_text().encode_utf16().collect();
                let (x, y) = label_origin(detection.rect);
                unsafe {
                    let _ = SetBkMode(self.mem_dc, TRANSPARENT);
                    let _ = SetTextColor(self.mem_dc, COLORREF(color.packed()));
                    if !TextOutW(self.mem_dc, x, y, &text).as_bool() {
                        return Err(DrawError::new("TextOutW", "returned FALSE"));
                    }
                }
            }
            Ok(())
        }

        fn present(&mut self) -> Result<(), DrawError> {
            self.ensure_live("present")?;
            unsafe {
                let _ = GdiFlush();
                let hdc = GetDC(self.hwnd);
                if hdc.0.is_null() {
                    return Err(DrawError::new("GetDC", "returned null"));
                }
                let result = BitBlt(
                    hdc,
                    0,
                    0,
                    self.size.0 as i32,
                    self.size.1 as i32,
                    self.mem_dc,
                    0,
                    0,
                    SRCCOPY,
                );
                let _ = ReleaseDC(self.hwnd, hdc);
                result.map_err(|err| DrawError::new("BitBlt", err.to_string()))
            }
        }

        fn destroy(&mut self) {
            unsafe {
                if !self.mem_dc.0.is_null() && !self.old_bitmap.0.is_null() {
                    let _ = SelectObject(self.mem_dc, self.old_bitmap);
                    self.old_bitmap = HGDIOBJ::default();
                }
                if !self.dib.0.is_null() {
                    let _ = DeleteObject(self.dib);
                    self.dib = HBITMAP::default();
                }
                if !self.mem_dc.0.is_null() {
                    let _ = DeleteDC(self.mem_dc);
                    self.mem_dc = HDC::default();
                }
                if !self.hwnd.0.is_null() {
                    let _ = SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
                    let _ = DestroyWindow(self.hwnd);
                    self.hwnd = HWND::default();
                    tracing::info!("overlay surface destroyed");
                }
                self.bits = ptr::null_mut();
                self.size = (0, 0);
            }
        }

        fn is_destroyed(&self) -> bool {
            self.hwnd.0.is_null()
        }
    }

    impl Drop for GdiSurface {
        fn drop(&mut self) {
            self.destroy();
        }
    }

}
