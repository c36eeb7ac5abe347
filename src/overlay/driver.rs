use crate::error::OverlayError;
use crate::overlay::buffer::DetectionBuffer;
use crate::overlay::compositor::Compositor;
use crate::overlay::messages::{ControllerToDriver, DriverToController, ExitReason, StopSignal};
use crate::overlay::model::SurfaceRect;
use crate::overlay::surface::{BoxStyle, RenderSurface, SurfaceFactory};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct DriverOptions {
    pub paint_interval: Duration,
    pub style: BoxStyle,
    pub failure_limit: u32,
}

/// Thread that owns the render surface and ticks the compositor.
///
/// The surface is created on the driver thread and never leaves it, so
/// window-affine handles stay with the thread that pumps their messages.
pub struct PaintDriver {
    thread: Option<JoinHandle<()>>,
    commands: Sender<ControllerToDriver>,
    events: Receiver<DriverToController>,
    exit: Option<ExitReason>,
}

fn send_exit_after_cleanup<F>(cleanup: F, events: &Sender<DriverToController>, reason: ExitReason)
where
    F: FnOnce(),
{
    cleanup();
    let _ = events.send(DriverToController::Exited { reason });
}

fn run_paint_loop(
    surface: &mut dyn RenderSurface,
    compositor: &mut Compositor,
    commands: &Receiver<ControllerToDriver>,
    paint_interval: Duration,
    stop: &StopSignal,
) -> ExitReason {
    loop {
        if let Some(reason) = stop.reason() {
            return reason;
        }

        surface.pump();

        if let Err(err) = compositor.tick(surface) {
            let reason = ExitReason::Fatal(err.to_string());
            stop.trigger(reason.clone());
            return reason;
        }

        match commands.recv_timeout(paint_interval) {
            Ok(ControllerToDriver::Start) => {
                compositor.start();
            }
            Ok(ControllerToDriver::Retarget { target, reply }) => {
                let result = surface.resize_or_move(target);
                if result.is_ok() {
                    compositor.invalidate();
                }
                let _ = reply.send(result);
            }
            Ok(ControllerToDriver::SetStyle(style)) => compositor.set_style(style),
            Ok(ControllerToDriver::RequestExit { reason }) => return reason,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return ExitReason::Stopped,
        }
    }
}

impl PaintDriver {
    /// Spawns the driver and waits until its surface exists.
    ///
    /// Surface creation failures come back as the factory's error; the
    /// thread has exited by the time this returns.
    pub fn spawn(
        target: SurfaceRect,
        factory: SurfaceFactory,
        buffer: Arc<DetectionBuffer>,
        options: DriverOptions,
        stop: StopSignal,
    ) -> Result<Self, OverlayError> {
        let (commands_tx, commands_rx) = channel::<ControllerToDriver>();
        let (events_tx, events_rx) = channel::<DriverToController>();

        let thread = thread::Builder::new()
            .name("overlay-paint".to_string())
            .spawn(move || {
                let mut surface = match factory(target) {
                    Ok(surface) => surface,
                    Err(err) => {
                        tracing::error!(%err, "render surface creation failed");
                        let _ = events_tx.send(DriverToController::StartFailed(err));
                        return;
                    }
                };
                let mut compositor = Compositor::new(buffer, options.style)
                    .with_failure_limit(options.failure_limit);
                let _ = events_tx.send(DriverToController::Ready);

                let reason = run_paint_loop(
                    surface.as_mut(),
                    &mut compositor,
                    &commands_rx,
                    options.paint_interval,
                    &stop,
                );
                tracing::info!(?reason, "overlay paint loop exiting");
                send_exit_after_cleanup(
                    || {
                        compositor.finish();
                        surface.destroy();
                    },
                    &events_tx,
                    reason,
                );
            })
            .map_err(|err| {
                OverlayError::BackendAcquisition(format!("failed to spawn paint thread: {err}"))
            })?;

        let mut driver = Self {
            thread: Some(thread),
            commands: commands_tx,
            events: events_rx,
            exit: None,
        };

        match driver.events.recv_timeout(READY_TIMEOUT) {
            Ok(DriverToController::Ready) => Ok(driver),
            Ok(DriverToController::StartFailed(err)) => {
                driver.join();
                Err(err)
            }
            Ok(DriverToController::Exited { reason }) => {
                driver.join();
                Err(OverlayError::SurfaceCreation(format!(
                    "paint thread exited during startup: {reason:?}"
                )))
            }
            Err(RecvTimeoutError::Timeout) => {
                driver.stop(ExitReason::Stopped);
                Err(OverlayError::SurfaceCreation(
                    "paint thread did not report readiness".into(),
                ))
            }
            Err(RecvTimeoutError::Disconnected) => {
                driver.join();
                Err(OverlayError::SurfaceCreation(
                    "paint thread ended before creating the surface".into(),
                ))
            }
        }
    }

    pub fn start(&self) -> Result<(), OverlayError> {
        self.send(ControllerToDriver::Start)
    }

    pub fn set_style(&self, style: BoxStyle) -> Result<(), OverlayError> {
        self.send(ControllerToDriver::SetStyle(style))
    }

    /// Moves the surface without recreating it.
    pub fn resize_or_move(&self, target: SurfaceRect) -> Result<(), OverlayError> {
        let (reply_tx, reply_rx) = channel();
        self.send(ControllerToDriver::Retarget {
            target,
            reply: reply_tx,
        })?;
        reply_rx.recv_timeout(REPLY_TIMEOUT).map_err(|_| {
            OverlayError::SurfaceCreation("paint thread did not answer retarget".into())
        })?
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Stops the driver, waits for surface teardown and returns why the loop
    /// ended. Later calls return the same reason without side effects.
    pub fn stop(&mut self, reason: ExitReason) -> Option<ExitReason> {
        if self.thread.is_some() {
            let _ = self.commands.send(ControllerToDriver::RequestExit { reason });
            self.join();
        }
        self.exit.clone()
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            tracing::error!("overlay paint thread panicked");
        }
        while let Ok(event) = self.events.try_recv() {
            if let DriverToController::Exited { reason } = event {
                self.exit = Some(reason);
            }
        }
    }

    fn send(&self, command: ControllerToDriver) -> Result<(), OverlayError> {
        self.commands.send(command).map_err(|_| {
            OverlayError::Fatal("paint thread is no longer running".into())
        })
    }
}

impl Drop for PaintDriver {
    fn drop(&mut self) {
        self.stop(ExitReason::Stopped);
    }
}
