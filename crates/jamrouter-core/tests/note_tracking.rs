//! Property tests for `NoteTracker` against a plain vector model.

use jamrouter_core::NoteTracker;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    On(u8, u8),
    Off(u8, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4, 58u8..66).prop_map(|(c, n)| Op::On(c, n)),
        (0u8..4, 58u8..66).prop_map(|(c, n)| Op::Off(c, n)),
    ]
}

proptest! {
    #[test]
    fn prop_tracker_matches_model(ops in prop::collection::vec(op(), 0..64)) {
        let mut tracker = NoteTracker::new();
        let mut model: Vec<Vec<u8>> = vec![Vec::new(); 16];

        for op in &ops {
            match *op {
                Op::On(c, n) => {
                    tracker.note_on(c, n);
                    model[c as usize].retain(|&k| k != n);
                    model[c as usize].push(n);
                }
                Op::Off(c, n) => {
                    let held = model[c as usize].contains(&n);
                    prop_assert_eq!(tracker.note_off(c, n), held);
                    model[c as usize].retain(|&k| k != n);
                }
            }
        }

        let total: usize = model.iter().map(Vec::len).sum();
        prop_assert_eq!(tracker.keys_in_play() as usize, total);
        for c in 0..16u8 {
            let keys: Vec<u8> = tracker.keys(c).collect();
            prop_assert_eq!(&keys, &model[c as usize]);
            prop_assert_eq!(tracker.is_silent(c), model[c as usize].is_empty());
            if let Some(&newest) = model[c as usize].last() {
                prop_assert_eq!(tracker.last_key(c), Some(newest));
            }
        }
    }
}

#[test]
fn test_legato_sequence() {
    let mut tracker = NoteTracker::new();
    tracker.note_on(0, 60);
    tracker.note_on(0, 64);
    tracker.note_off(0, 60);
    assert_eq!(tracker.keys(0).collect::<Vec<_>>(), vec![64]);
    tracker.note_off(0, 64);
    assert!(tracker.is_silent(0));
    assert_eq!(tracker.keys_in_play(), 0);
}
