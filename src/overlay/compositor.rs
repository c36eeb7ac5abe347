use crate::error::{DrawError, OverlayError};
use crate::overlay::buffer::DetectionBuffer;
use crate::overlay::model::DetectionSet;
use crate::overlay::surface::{BoxStyle, RenderSurface};
use std::sync::Arc;

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

pub fn can_transition(from: CompositorState, to: CompositorState) -> bool {
    matches!(
        (from, to),
        (CompositorState::Idle, CompositorState::Running)
            | (CompositorState::Idle, CompositorState::Stopping)
            | (CompositorState::Running, CompositorState::Stopping)
            | (CompositorState::Stopping, CompositorState::Stopped)
    ) || from == to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; nothing touched.
    Skipped,
    /// Buffer unchanged since the last good frame.
    Unchanged,
    Painted { drawn: usize },
    Failed { consecutive: u32 },
}

/// Paints the latest published [`DetectionSet`] onto a surface.
///
/// Holds no per-detection state between ticks; the only memory it keeps is
/// which buffer version was last painted successfully.
pub struct Compositor {
    buffer: Arc<DetectionBuffer>,
    state: CompositorState,
    style: BoxStyle,
    last_painted: Option<u64>,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl Compositor {
    pub fn new(buffer: Arc<DetectionBuffer>, style: BoxStyle) -> Self {
        Self {
            buffer,
            state: CompositorState::Idle,
            style,
            last_painted: None,
            consecutive_failures: 0,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }

    pub fn with_failure_limit(mut self, limit: u32) -> Self {
        self.max_consecutive_failures = limit.max(1);
        self
    }

    pub fn state(&self) -> CompositorState {
        self.state
    }

    pub fn style(&self) -> BoxStyle {
        self.style
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn transition(&mut self, to: CompositorState) -> bool {
        if !can_transition(self.state, to) {
            tracing::warn!(from = ?self.state, ?to, "ignored compositor transition");
            return false;
        }
        if self.state != to {
            tracing::debug!(from = ?self.state, ?to, "compositor state change");
        }
        self.state = to;
        true
    }

    pub fn start(&mut self) -> bool {
        self.transition(CompositorState::Running)
    }

    pub fn request_stop(&mut self) -> bool {
        match self.state {
            CompositorState::Stopping | CompositorState::Stopped => true,
            _ => self.transition(CompositorState::Stopping),
        }
    }

    pub fn finish(&mut self) {
        self.request_stop();
        self.transition(CompositorState::Stopped);
    }

    /// Forces the next tick to repaint even if the buffer is unchanged.
    pub fn invalidate(&mut self) {
        self.last_painted = None;
    }

    pub fn set_style(&mut self, style: BoxStyle) {
        if self.style != style {
            self.style = style;
            self.invalidate();
        }
    }

    /// Runs one paint tick.
    ///
    /// A backend failure skips the tick. Once the failure limit is reached
    /// in a row, the compositor moves to `Stopping` and the error is fatal.
    pub fn tick(&mut self, surface: &mut dyn RenderSurface) -> Result<TickOutcome, OverlayError> {
        if self.state != CompositorState::Running {
            return Ok(TickOutcome::Skipped);
        }

        let (snapshot, version) = self.buffer.snapshot_with_version();
        if self.last_painted == Some(version) {
            return Ok(TickOutcome::Unchanged);
        }

        match self.paint(surface, &snapshot) {
            Ok(drawn) => {
                if self.consecutive_failures > 0 {
                    tracing::info!(
                        after = self.consecutive_failures,
                        "overlay paint recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.last_painted = Some(version);
                tracing::trace!(version, drawn, "overlay frame painted");
                Ok(TickOutcome::Painted { drawn })
            }
            Err(err) => {
                self.consecutive_failures += 1;
                tracing::warn!(
                    %err,
                    consecutive = self.consecutive_failures,
                    "overlay paint tick skipped"
                );
                if self.consecutive_failures >= self.max_consecutive_failures {
                    self.transition(CompositorState::Stopping);
                    tracing::error!(
                        failures = self.consecutive_failures,
                        "drawing backend keeps failing; stopping overlay"
                    );
                    return Err(OverlayError::Fatal(format!(
                        "{} consecutive draw failures, last: {err}",
                        self.consecutive_failures
                    )));
                }
                Ok(TickOutcome::Failed {
                    consecutive: self.consecutive_failures,
                })
            }
        }
    }

    fn paint(
        &self,
        surface: &mut dyn RenderSurface,
        snapshot: &DetectionSet,
    ) -> Result<usize, DrawError> {
        surface.begin_frame()?;
        let mut drawn = 0;
        for detection in snapshot.visible() {
            surface.draw_detection(detection, &self.style)?;
            drawn += 1;
        }
        surface.present()?;
        Ok(drawn)
    }
}
