use thiserror::Error;

/// Failure raised by a drawing backend while painting a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {detail}")]
pub struct DrawError {
    pub operation: &'static str,
    pub detail: String,
}

impl DrawError {
    pub fn new(operation: &'static str, detail: impl Into<String>) -> Self {
        Self {
            operation,
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the overlay engine.
///
/// Only the acquisition variants (`Configuration`, `BackendAcquisition`,
/// `SurfaceCreation`) abort construction. Transient capture/inference errors
/// and single draw failures are logged by the loops that hit them and never
/// stop those loops; `Fatal` is raised once the compositor gives up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverlayError {
    #[error("invalid overlay configuration: {0}")]
    Configuration(String),
    #[error("overlay backend unavailable: {0}")]
    BackendAcquisition(String),
    #[error("unable to create render surface: {0}")]
    SurfaceCreation(String),
    #[error("frame capture failed: {0}")]
    TransientCapture(String),
    #[error("inference failed: {0}")]
    TransientInference(String),
    #[error(transparent)]
    Draw(#[from] DrawError),
    #[error("overlay stopped after repeated failures: {0}")]
    Fatal(String),
}

impl OverlayError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransientCapture(_) | Self::TransientInference(_) | Self::Draw(_)
        )
    }
}
