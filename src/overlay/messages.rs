use crate::error::OverlayError;
use crate::overlay::model::SurfaceRect;
use crate::overlay::surface::BoxStyle;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Stopped,
    Interrupted,
    Fatal(String),
}

#[derive(Debug)]
pub enum ControllerToDriver {
    Start,
    Retarget {
        target: SurfaceRect,
        reply: Sender<Result<(), OverlayError>>,
    },
    SetStyle(BoxStyle),
    RequestExit {
        reason: ExitReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverToController {
    Ready,
    StartFailed(OverlayError),
    Exited { reason: ExitReason },
}

/// One-shot stop flag shared by the controller, the producer and the paint
/// driver. The first reason recorded wins.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<Option<ExitReason>>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call was the one that stopped the signal.
    pub fn trigger(&self, reason: ExitReason) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        cvar.notify_all();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<ExitReason> {
        let (lock, _) = &*self.inner;
        lock.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn wait(&self) -> ExitReason {
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(reason) = slot.as_ref() {
                return reason.clone();
            }
            slot = cvar.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Sleeps up to `timeout`, waking early if the signal fires.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExitReason> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(reason) = slot.as_ref() {
                return Some(reason.clone());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = cvar
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("reason", &self.reason())
            .finish()
    }
}
