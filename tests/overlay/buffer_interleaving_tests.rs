use detect_overlay::overlay::buffer::DetectionBuffer;
use detect_overlay::overlay::codec::encode_label;
use detect_overlay::overlay::model::{BoxRect, Detection, DetectionSet};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PUBLISHES: u64 = 400;

/// Set number `generation`: its size, ids, labels and timestamps all derive
/// from the generation, so any mix of two sets is detectable.
fn generation_set(generation: u64) -> DetectionSet {
    let len = generation % 7 + 1;
    DetectionSet::new(
        (0..len)
            .map(|i| Detection {
                id: generation * 100 + i,
                rect: BoxRect::new(i as i32 * 10, generation as i32 % 50, 8, 8),
                color: 0x00ff00,
                label: encode_label(&format!("gen-{generation}")),
                last_seen: generation,
                paused: false,
            })
            .collect(),
    )
}

fn assert_consistent(set: &DetectionSet) {
    let Some(first) = set.iter().next() else {
        return;
    };
    let generation = first.last_seen;
    assert_eq!(set.len() as u64, generation % 7 + 1, "length of gen {generation}");
    let expected_label = format!("gen-{generation}");
    for (i, detection) in set.iter().enumerate() {
        assert_eq!(detection.last_seen, generation);
        assert_eq!(detection.id, generation * 100 + i as u64);
        assert_eq!(detection.label.to_text(), expected_label.as_str());
        assert_eq!(detection.rect.y, generation as i32 % 50);
    }
}

fn pause(rng: &mut StdRng) {
    match rng.gen_range(0..10) {
        0 => thread::sleep(Duration::from_micros(rng.gen_range(1..200))),
        1..=4 => thread::yield_now(),
        _ => {}
    }
}

fn run_interleaving(seed: u64) {
    let buffer = Arc::new(DetectionBuffer::new());

    let writer_buffer = Arc::clone(&buffer);
    let writer = thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(seed);
        for generation in 1..=PUBLISHES {
            writer_buffer.publish(generation_set(generation));
            pause(&mut rng);
        }
    });

    let reader_buffer = Arc::clone(&buffer);
    let reader = thread::spawn(move || {
        let mut rng = StdRng::seed_from_u64(seed ^ 0xa5a5);
        let mut last_version = 0;
        let mut last_generation = 0;
        loop {
            let (set, version) = reader_buffer.snapshot_with_version();
            assert!(version >= last_version, "version went backwards");
            assert_consistent(&set);
            if let Some(first) = set.iter().next() {
                assert!(first.last_seen >= last_generation, "older set observed");
                assert_eq!(first.last_seen, version);
                last_generation = first.last_seen;
            }
            last_version = version;
            if version == PUBLISHES {
                break;
            }
            pause(&mut rng);
        }
    });

    writer.join().expect("writer panicked");
    reader.join().expect("reader panicked");
    assert_eq!(buffer.version(), PUBLISHES);
    assert_consistent(&buffer.snapshot());
}

#[test]
fn snapshots_never_observe_torn_sets() {
    for seed in 0..16 {
        run_interleaving(seed);
    }
}

#[test]
fn many_readers_share_one_writer() {
    let buffer = Arc::new(DetectionBuffer::new());
    let readers: Vec<_> = (0..4)
        .map(|n| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(n);
                while buffer.version() < PUBLISHES {
                    assert_consistent(&buffer.snapshot());
                    pause(&mut rng);
                }
            })
        })
        .collect();

    for generation in 1..=PUBLISHES {
        buffer.publish(generation_set(generation));
    }
    for reader in readers {
        reader.join().expect("reader panicked");
    }
}
