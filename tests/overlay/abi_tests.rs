use detect_overlay::overlay::abi::{
    engine_buffer, engine_max_detections, engine_target, set_surface_factory, CreateSurface,
    DestroySurface, DetectionRecord, SetMaxDetections, SetTargetRect, Start, Stop,
    UpdateDetections,
};
use detect_overlay::overlay::codec::{encode_label, pack_color};
use detect_overlay::overlay::model::{BoxRect, SurfaceRect};
use detect_overlay::overlay::surface::{headless_factory_with, SurfaceProbe};
use serial_test::serial;
use std::thread;
use std::time::{Duration, Instant};

fn install_probe() -> SurfaceProbe {
    let probe = SurfaceProbe::default();
    let shared = probe.clone();
    set_surface_factory(move || headless_factory_with(&shared));
    DestroySurface();
    SetTargetRect(0, 0, 320, 240);
    SetMaxDetections(100);
    probe
}

fn record(id: i32, x: i32, label: &str) -> DetectionRecord {
    DetectionRecord {
        id,
        x,
        y: 20,
        width: 40,
        height: 30,
        color: pack_color(0, 255, 0),
        label: *encode_label(label).as_raw(),
        last_seen: 0,
        paused: 0,
    }
}

fn publish(records: &[DetectionRecord]) {
    unsafe { UpdateDetections(records.as_ptr(), records.len() as i32) };
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
#[serial]
fn start_paints_published_records() {
    let probe = install_probe();
    publish(&[record(1, 10, "person"), record(2, 100, "dog")]);
    assert_eq!(Start(), 0);
    assert!(wait_until(|| probe.boxes().len() == 2));

    let labels: Vec<Option<String>> = probe.boxes().into_iter().map(|b| b.label).collect();
    assert_eq!(labels, vec![Some("person".into()), Some("dog".into())]);

    Stop();
    Stop();
    assert_eq!(probe.releases(), 1);
    DestroySurface();
}

#[test]
#[serial]
fn update_replaces_visible_set_and_respects_limit() {
    let _probe = install_probe();
    SetMaxDetections(2);
    publish(&[record(1, 0, "a"), record(2, 50, "b"), record(3, 100, "c")]);
    let ids: Vec<u64> = engine_buffer().snapshot().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![1, 2]);

    publish(&[record(9, 0, "z")]);
    assert_eq!(engine_buffer().snapshot().len(), 1);
    DestroySurface();
}

#[test]
#[serial]
fn invalid_arguments_are_ignored() {
    let _probe = install_probe();
    publish(&[record(1, 0, "a")]);
    let version = engine_buffer().version();

    unsafe { UpdateDetections(std::ptr::null(), 3) };
    let records = [record(2, 0, "b")];
    unsafe { UpdateDetections(records.as_ptr(), 0) };
    unsafe { UpdateDetections(records.as_ptr(), -4) };
    assert_eq!(engine_buffer().version(), version);

    SetMaxDetections(0);
    SetMaxDetections(-7);
    assert_eq!(engine_max_detections(), 100);

    SetTargetRect(50, 50, 50, 400);
    assert_eq!(engine_target(), SurfaceRect::new(0, 0, 320, 240));
    DestroySurface();
}

#[test]
#[serial]
fn shrinking_limit_truncates_current_set() {
    let _probe = install_probe();
    publish(&[record(1, 0, "a"), record(2, 50, "b"), record(3, 100, "c")]);
    SetMaxDetections(1);
    assert_eq!(engine_buffer().snapshot().len(), 1);
    DestroySurface();
}

#[test]
#[serial]
fn records_are_clamped_to_target_rect() {
    let _probe = install_probe();
    SetTargetRect(1920, 0, 2020, 100);
    publish(&[DetectionRecord {
        x: 90,
        y: 95,
        width: 50,
        height: 50,
        ..record(4, 0, "edge")
    }]);
    let set = engine_buffer().snapshot();
    assert_eq!(set.as_slice()[0].rect, BoxRect::new(90, 95, 10, 5));
    DestroySurface();
}

#[test]
#[serial]
fn target_rect_moves_live_surface() {
    let probe = install_probe();
    assert_eq!(CreateSurface(), 0);
    SetTargetRect(-1280, 0, 0, 720);
    assert_eq!(probe.bounds(), SurfaceRect::new(-1280, 0, 1280, 720));
    assert_eq!(probe.releases(), 0);
    DestroySurface();
    DestroySurface();
    assert_eq!(probe.releases(), 1);
    assert!(engine_buffer().snapshot().is_empty());
}

#[test]
#[serial]
fn paused_records_stay_published_but_are_not_drawn() {
    let probe = install_probe();
    publish(&[
        DetectionRecord {
            paused: 1,
            ..record(1, 0, "frozen")
        },
        record(2, 100, "live"),
    ]);
    assert_eq!(engine_buffer().snapshot().len(), 2);
    assert_eq!(Start(), 0);
    assert!(wait_until(|| probe.presented_frames() >= 1));
    let ids: Vec<u64> = probe.boxes().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![2]);
    DestroySurface();
}

#[test]
#[serial]
fn paused_records_do_not_use_up_the_limit() {
    let probe = install_probe();
    SetMaxDetections(2);
    let frozen = |id, x| DetectionRecord {
        paused: 1,
        ..record(id, x, "frozen")
    };
    publish(&[frozen(1, 0), frozen(2, 50), record(3, 100, "live")]);

    let set = engine_buffer().snapshot();
    assert_eq!(set.len(), 3);
    let visible: Vec<u64> = set.visible().map(|d| d.id).collect();
    assert_eq!(visible, vec![3]);

    assert_eq!(Start(), 0);
    assert!(wait_until(|| probe.boxes().len() == 1));
    let ids: Vec<u64> = probe.boxes().iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![3]);
    DestroySurface();
}

#[test]
#[serial]
fn shrinking_limit_keeps_paused_records() {
    let _probe = install_probe();
    publish(&[
        DetectionRecord {
            paused: 1,
            ..record(1, 0, "frozen")
        },
        record(2, 50, "a"),
        record(3, 100, "b"),
    ]);
    SetMaxDetections(1);
    let ids: Vec<u64> = engine_buffer().snapshot().iter().map(|d| d.id).collect();
    assert_eq!(ids, vec![1, 2]);
    DestroySurface();
}
