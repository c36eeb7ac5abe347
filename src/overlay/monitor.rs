use crate::error::OverlayError;
use crate::overlay::model::SurfaceRect;
use anyhow::Result;

/// Desktop rectangles of every attached display, in virtual-desktop
/// coordinates.
pub fn enumerate_monitors() -> Result<Vec<SurfaceRect>> {
    let screens = screenshots::Screen::all()?;
    Ok(screens
        .iter()
        .map(|screen| {
            let info = &screen.display_info;
            SurfaceRect::new(info.x, info.y, info.width as i32, info.height as i32)
        })
        .collect())
}

/// Picks `index`, falling back to the first monitor when it is out of range.
pub fn select_monitor(monitors: &[SurfaceRect], index: usize) -> Result<SurfaceRect, OverlayError> {
    if let Some(rect) = monitors.get(index) {
        return Ok(*rect);
    }
    let first = monitors.first().copied().ok_or_else(|| {
        OverlayError::BackendAcquisition("no monitors available".into())
    })?;
    tracing::warn!(
        index,
        available = monitors.len(),
        "monitor index out of range; using monitor 0"
    );
    Ok(first)
}
