use anyhow::Context;
use detect_overlay::logging;
use detect_overlay::overlay::monitor::{enumerate_monitors, select_monitor};
use detect_overlay::overlay::{
    native_factory, Collaborators, OverlayController, ReplayDetector, ScreenCapture,
};
use detect_overlay::settings::OverlaySettings;
use detect_overlay::OverlayError;

const DEFAULT_SETTINGS_PATH: &str = "overlay_settings.json";

fn main() -> anyhow::Result<()> {
    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_SETTINGS_PATH.to_string());
    let settings = OverlaySettings::load(&settings_path)
        .with_context(|| format!("loading {settings_path}"))?;
    logging::init(settings.debug_logging, settings.log_file.clone());

    let monitors = enumerate_monitors()
        .map_err(|err| OverlayError::BackendAcquisition(format!("monitor enumeration: {err:#}")))?;
    let target = select_monitor(&monitors, settings.monitor_index)?;

    let replay_path = settings.replay_path.clone().ok_or_else(|| {
        OverlayError::Configuration(format!("replay_path is not set in {settings_path}"))
    })?;
    let detector = ReplayDetector::open(&replay_path)?;

    let mut controller = OverlayController::start(
        settings.to_config(target),
        Collaborators {
            source: Box::new(ScreenCapture),
            detector: Box::new(detector),
            surface: native_factory(),
        },
    )?;
    tracing::info!(monitor = settings.monitor_index, "press Ctrl-C to exit");
    controller.run_until_ctrl_c()?;
    Ok(())
}
