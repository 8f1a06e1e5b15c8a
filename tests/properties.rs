//! Randomized properties of the reversal algorithms and the
//! preprocessor.

use std::fs;

use proptest::prelude::*;

use racelab::detect::{EventDag, EventGraph, RaceInfo, RaceReport};
use racelab::preprocess::{ActionLog, Command, CommandKind, StringTable, TracePreprocessor};
use racelab::reorder::{ReorderOptions, reorder_for_race};
use racelab::schedule::{ScheduleStore, remove_special_markers};
use racelab::wave::reverse_pair;

const N: usize = 8;

fn store_of(events: &[usize]) -> (tempfile::TempDir, ScheduleStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.data");
    let text: String = events.iter().map(|e| format!("{e};a{e}\n")).collect();
    fs::write(&path, text).unwrap();
    let store = ScheduleStore::load(&path).unwrap();
    (dir, store)
}

/// Forward-only arcs over positions, so happens-before always agrees
/// with the recorded schedule order.
fn arcs_from_bits(bits: &[bool], exclude: (usize, usize)) -> Vec<(usize, usize)> {
    let mut arcs = Vec::new();
    let mut k = 0;
    for p in 0..N {
        for q in (p + 1)..N {
            if bits[k] && (p, q) != exclude {
                arcs.push((p, q));
            }
            k += 1;
        }
    }
    arcs
}

fn racing_pair() -> impl Strategy<Value = (usize, usize)> {
    (0..N - 1).prop_flat_map(|i| ((i + 1)..N).prop_map(move |j| (i, j)))
}

proptest! {
    #[test]
    fn reversal_output_is_a_permutation_that_swaps_the_pair(
        (x, y) in racing_pair(),
        bits in prop::collection::vec(any::<bool>(), N * (N - 1) / 2),
    ) {
        let dag = EventDag::from_arcs(&arcs_from_bits(&bits, (x, y)));
        prop_assume!(!dag.are_ordered(x, y));

        let (_dir, store) = store_of(&(0..N).collect::<Vec<_>>());
        let report = RaceReport::new(
            vec![RaceInfo {
                first: x,
                second: y,
                var_id: 0,
                multi_parent_races: Vec::new(),
                covered_by: None,
            }],
            dag.clone(),
        );

        let out = reorder_for_race(&store, &report, 0, ReorderOptions::default()).unwrap();
        let strict = remove_special_markers(&out.executable);

        let mut sorted = strict.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..N).collect::<Vec<_>>());

        let pos = |e: usize| strict.iter().position(|&v| v == e).unwrap();
        prop_assert!(pos(y) < pos(x));
        prop_assert_eq!(pos(y), out.hoisted_index);
        prop_assert_eq!(pos(x), out.deferred_index);

        // Happens-before is preserved for every pair but the reversed one.
        for a in 0..N {
            for b in 0..N {
                if a != b && dag.are_ordered(a, b) {
                    prop_assert!(pos(a) < pos(b), "hb({a}, {b}) violated");
                }
            }
        }
    }

    #[test]
    fn wave_reversal_preserves_happens_before(
        (x, y) in racing_pair(),
        bits in prop::collection::vec(any::<bool>(), N * (N - 1) / 2),
    ) {
        let dag = EventDag::from_arcs(&arcs_from_bits(&bits, (x, y)));
        prop_assume!(!dag.are_ordered(x, y));

        let mut schedule: Vec<usize> = (0..N).collect();
        prop_assert!(reverse_pair(&dag, &mut schedule, x, y));

        let mut sorted = schedule.clone();
        sorted.sort_unstable();
        prop_assert_eq!(sorted, (0..N).collect::<Vec<_>>());

        let pos = |e: usize| schedule.iter().position(|&v| v == e).unwrap();
        prop_assert!(pos(y) < pos(x));
        for a in 0..N {
            for b in 0..N {
                if a != b && dag.are_ordered(a, b) {
                    prop_assert!(pos(a) < pos(b), "hb({a}, {b}) violated");
                }
            }
        }
    }
}

fn any_command() -> impl Strategy<Value = Command> {
    (0u8..5, 0usize..4).prop_map(|(kind, location)| {
        let kind = match kind {
            0 => CommandKind::ReadMemory,
            1 => CommandKind::WriteMemory,
            2 => CommandKind::MemoryValue,
            3 => CommandKind::EnterScope,
            _ => CommandKind::ExitScope,
        };
        Command::new(kind, location)
    })
}

proptest! {
    #[test]
    fn nop_write_pass_reaches_a_fixed_point(
        first in prop::collection::vec(any_command(), 0..20),
        second in prop::collection::vec(any_command(), 0..20),
    ) {
        let vars = StringTable::default();
        let values = StringTable::default();
        let mut log = ActionLog::default();
        log.push_action(first);
        log.push_action(second);

        TracePreprocessor::new(&mut log, &vars, &values).remove_nop_writes();
        let once = log.clone();
        TracePreprocessor::new(&mut log, &vars, &values).remove_nop_writes();
        prop_assert_eq!(&log, &once);

        // Compaction left no tombstones behind.
        for action in &log.actions {
            prop_assert!(action.commands.iter().all(|c| c.kind != CommandKind::Deleted));
        }
    }
}
