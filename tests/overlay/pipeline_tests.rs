use anyhow::anyhow;
use detect_overlay::overlay::buffer::DetectionBuffer;
use detect_overlay::overlay::codec::encode_label;
use detect_overlay::overlay::compositor::{Compositor, TickOutcome};
use detect_overlay::overlay::detector::{FrameSource, Replay, ReplayDetector};
use detect_overlay::overlay::messages::ExitReason;
use detect_overlay::overlay::model::{BoxRect, Detection, DetectionSet, RawDetection, Rgb, SurfaceRect};
use detect_overlay::overlay::producer::Producer;
use detect_overlay::overlay::surface::{headless_factory, BoxStyle, SurfaceFactory, SurfaceProbe};
use detect_overlay::overlay::{Collaborators, OverlayConfig, OverlayController};
use detect_overlay::OverlayError;
use image::RgbaImage;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const TARGET: SurfaceRect = SurfaceRect::new(0, 0, 200, 100);

/// Blank frames the size of the requested region.
struct BlankFrames;

impl FrameSource for BlankFrames {
    fn capture(&mut self, region: SurfaceRect) -> anyhow::Result<RgbaImage> {
        let (width, height) = region.size();
        Ok(RgbaImage::new(width, height))
    }
}

struct NoFrames;

impl FrameSource for NoFrames {
    fn capture(&mut self, _region: SurfaceRect) -> anyhow::Result<RgbaImage> {
        Err(anyhow!("capture backend gone"))
    }
}

fn raw(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> RawDetection {
    RawDetection {
        x1,
        y1,
        x2,
        y2,
        class_id,
        confidence,
    }
}

fn replay(detections: Vec<RawDetection>) -> Box<ReplayDetector> {
    Box::new(ReplayDetector::from_replay(Replay {
        classes: vec!["person".into(), "car".into()],
        detections,
    }))
}

fn fast_config(target: SurfaceRect) -> OverlayConfig {
    OverlayConfig {
        producer_rate_hz: 100.0,
        paint_interval: Duration::from_millis(2),
        ..OverlayConfig::new(target)
    }
}

fn start(
    detections: Vec<RawDetection>,
    config: OverlayConfig,
) -> (OverlayController, SurfaceProbe) {
    let (factory, probe) = headless_factory();
    let controller = OverlayController::start(
        config,
        Collaborators {
            source: Box::new(BlankFrames),
            detector: replay(detections),
            surface: factory,
        },
    )
    .expect("overlay should start");
    (controller, probe)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn empty_set_draws_nothing() {
    let (mut controller, probe) = start(Vec::new(), fast_config(TARGET));
    assert!(wait_until(|| probe.presented_frames() >= 2));
    assert!(probe.boxes().is_empty());
    assert_eq!(probe.frame().painted_pixels(), 0);
    controller.stop();
}

#[test]
fn single_detection_is_outlined_and_labelled() {
    let (mut controller, probe) = start(
        vec![raw(10.0, 10.0, 60.0, 40.0, 0, 0.9)],
        fast_config(TARGET),
    );
    assert!(wait_until(|| probe.boxes().len() == 1));

    let drawn = probe.boxes().remove(0);
    assert_eq!(drawn.rect, BoxRect::new(10, 10, 50, 30));
    assert_eq!(drawn.label.as_deref(), Some("person"));
    assert_eq!(drawn.color, Rgb::GREEN);

    let frame = probe.frame();
    assert_eq!(frame.pixel(10, 10), Rgb::GREEN);
    assert_eq!(frame.pixel(59, 39), Rgb::GREEN);
    assert!(frame.is_transparent(35, 25));
    assert!(frame.is_transparent(60, 40));
    controller.stop();
}

#[test]
fn paused_detection_is_not_drawn() {
    let buffer = Arc::new(DetectionBuffer::new());
    let mut compositor = Compositor::new(Arc::clone(&buffer), BoxStyle::default());
    compositor.start();
    let (factory, probe) = headless_factory();
    let mut surface = factory(TARGET).expect("surface");

    buffer.publish(DetectionSet::new(vec![Detection {
        id: 1,
        rect: BoxRect::new(10, 10, 50, 30),
        color: Rgb::GREEN.packed(),
        label: encode_label("person"),
        last_seen: 0,
        paused: true,
    }]));
    assert_eq!(
        compositor.tick(surface.as_mut()).expect("tick"),
        TickOutcome::Painted { drawn: 0 }
    );
    assert!(probe.boxes().is_empty());
    assert_eq!(probe.frame().painted_pixels(), 0);
}

#[test]
fn far_corner_detection_is_clamped_to_monitor() {
    let buffer = Arc::new(DetectionBuffer::new());
    let target = SurfaceRect::new(0, 0, 1920, 1080);
    let mut producer = Producer::new(
        Box::new(BlankFrames),
        replay(vec![raw(1900.0, 1070.0, 2000.0, 1200.0, 1, 0.8)]),
        Arc::clone(&buffer),
        Arc::new(Mutex::new(OverlayConfig::new(target))),
    );
    producer.run_cycle().expect("cycle");
    let set = buffer.snapshot();
    assert_eq!(set.len(), 1);
    assert_eq!(set.as_slice()[0].rect, BoxRect::new(1900, 1070, 20, 10));
    assert_eq!(set.as_slice()[0].label.to_text(), "car");
}

#[test]
fn max_detections_keeps_highest_confidence() {
    let buffer = Arc::new(DetectionBuffer::new());
    let config = OverlayConfig {
        max_detections: 2,
        ..OverlayConfig::new(TARGET)
    };
    let confidences = [0.55, 0.97, 0.61, 0.88, 0.72];
    let raws = confidences
        .iter()
        .enumerate()
        .map(|(i, conf)| {
            let x = i as f32 * 30.0;
            raw(x, 0.0, x + 20.0, 20.0, 0, *conf)
        })
        .collect();
    let mut producer = Producer::new(
        Box::new(BlankFrames),
        replay(raws),
        Arc::clone(&buffer),
        Arc::new(Mutex::new(config)),
    );
    let report = producer.run_cycle().expect("cycle");
    assert_eq!(report.raw, 5);
    assert_eq!(report.published, 2);

    let xs: Vec<i32> = buffer.snapshot().iter().map(|d| d.rect.x).collect();
    // 0.97 came from index 1, 0.88 from index 3.
    assert_eq!(xs, vec![30, 90]);
}

#[test]
fn stop_twice_releases_surface_once() {
    let (mut controller, probe) = start(Vec::new(), fast_config(TARGET));
    assert!(wait_until(|| probe.presented_frames() >= 1));
    controller.stop();
    controller.stop();
    assert!(!controller.is_running());
    drop(controller);
    assert_eq!(probe.releases(), 1);
}

#[test]
fn settings_update_takes_effect_on_later_cycles() {
    let detections = vec![
        raw(0.0, 0.0, 20.0, 20.0, 0, 0.9),
        raw(40.0, 0.0, 60.0, 20.0, 0, 0.7),
        raw(80.0, 0.0, 100.0, 20.0, 0, 0.3),
    ];
    let (mut controller, probe) = start(detections, fast_config(TARGET));
    assert!(wait_until(|| probe.boxes().len() == 2));

    controller
        .update_settings(None, Some(0.1))
        .expect("valid threshold");
    assert!(wait_until(|| probe.boxes().len() == 3));

    controller
        .update_settings(Some(1), None)
        .expect("valid limit");
    assert!(wait_until(|| probe.boxes().len() == 1));
    assert_eq!(controller.config().max_detections, 1);

    let err = controller
        .update_settings(Some(0), Some(0.4))
        .expect_err("zero limit is rejected");
    assert!(matches!(err, OverlayError::Configuration(_)));
    assert_eq!(controller.config().max_detections, 1);
    assert_eq!(controller.config().conf_threshold, 0.1);
    controller.stop();
}

#[test]
fn repeated_draw_failures_stop_the_overlay() {
    let (factory, probe) = headless_factory();
    probe.fail_next_frames(u32::MAX);
    let mut controller = OverlayController::start(
        fast_config(TARGET),
        Collaborators {
            source: Box::new(BlankFrames),
            detector: replay(vec![raw(10.0, 10.0, 60.0, 40.0, 0, 0.9)]),
            surface: factory,
        },
    )
    .expect("start");

    let err = controller.wait().expect_err("fatal after repeated failures");
    assert!(matches!(err, OverlayError::Fatal(_)));
    assert_eq!(probe.presented_frames(), 0);
    assert_eq!(probe.releases(), 1);
    assert!(!controller.is_running());
}

#[test]
fn transient_capture_failures_keep_overlay_running() {
    let (factory, probe) = headless_factory();
    let mut controller = OverlayController::start(
        fast_config(TARGET),
        Collaborators {
            source: Box::new(NoFrames),
            detector: replay(vec![raw(10.0, 10.0, 60.0, 40.0, 0, 0.9)]),
            surface: factory,
        },
    )
    .expect("start");
    thread::sleep(Duration::from_millis(100));
    assert!(controller.is_running());
    assert!(probe.presented_frames() >= 1);
    controller.stop();
}

#[test]
fn invalid_config_fails_before_creating_a_surface() {
    let (factory, probe) = headless_factory();
    let config = OverlayConfig {
        conf_threshold: 1.2,
        ..OverlayConfig::new(TARGET)
    };
    let err = OverlayController::start(
        config,
        Collaborators {
            source: Box::new(BlankFrames),
            detector: replay(Vec::new()),
            surface: factory,
        },
    )
    .err()
    .expect("invalid threshold");
    assert!(matches!(err, OverlayError::Configuration(_)));
    assert_eq!(probe.presented_frames(), 0);
    assert_eq!(probe.releases(), 0);
}

#[test]
fn surface_creation_failure_is_returned_to_caller() {
    let factory: SurfaceFactory =
        Box::new(|_| Err(OverlayError::SurfaceCreation("no desktop session".into())));
    let err = OverlayController::start(
        fast_config(TARGET),
        Collaborators {
            source: Box::new(BlankFrames),
            detector: replay(Vec::new()),
            surface: factory,
        },
    )
    .err()
    .expect("surface creation fails");
    assert_eq!(
        err,
        OverlayError::SurfaceCreation("no desktop session".into())
    );
}

#[test]
fn retarget_moves_surface_and_clamps_later_boxes() {
    let (mut controller, probe) = start(
        vec![raw(100.0, 50.0, 180.0, 90.0, 0, 0.9)],
        fast_config(TARGET),
    );
    assert!(wait_until(|| probe.boxes().len() == 1));

    let smaller = SurfaceRect::new(1920, 0, 120, 60);
    controller.retarget(smaller).expect("retarget");
    assert_eq!(probe.bounds(), smaller);
    assert!(wait_until(|| probe
        .boxes()
        .first()
        .is_some_and(|drawn| drawn.rect.right() <= 120 && drawn.rect.bottom() <= 60)));
    assert_eq!(probe.releases(), 0);
    controller.stop();
}

#[test]
fn wait_returns_when_stopped_from_another_thread() {
    let (mut controller, probe) = start(Vec::new(), fast_config(TARGET));
    let handle = controller.stop_handle();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.trigger(ExitReason::Interrupted);
    });
    controller.wait().expect("clean stop");
    stopper.join().expect("stopper");
    assert_eq!(probe.releases(), 1);
}

#[test]
fn style_update_hides_labels() {
    let (mut controller, probe) = start(
        vec![raw(10.0, 10.0, 60.0, 40.0, 0, 0.9)],
        fast_config(TARGET),
    );
    assert!(wait_until(|| probe.boxes().len() == 1));
    controller
        .update_style(BoxStyle {
            stroke_width: 2,
            show_labels: false,
        })
        .expect("style");
    assert!(wait_until(|| probe
        .boxes()
        .first()
        .is_some_and(|drawn| drawn.label.is_none())));
    assert_eq!(controller.config().stroke_width, 2);
    controller.stop();
}
