//! Coverage-oriented schedule generation by random pairwise reversal.
//!
//! Enumerating every schedule consistent with happens-before is not
//! feasible for the trace lengths the replay runtime records, so this
//! explorer approximates coverage instead: it lists every unordered event
//! pair, shuffles the list with a seeded generator, and applies each
//! reversal to one of a fixed set of schedule copies, round-robin. Every
//! reversal lands in *some* schedule, spreading the mutations across the
//! whole batch.

use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use serde::Serialize;

use crate::detect::EventGraph;
use crate::error::Result;
use crate::replay::{Replayer, RunRequest};
use crate::schedule::{EventId, ScheduleEntry, ScheduleStore};

/// Settings for one WAVE batch.
#[derive(Debug, Clone)]
pub struct WaveConfig {
    /// Number of schedules to generate and execute.
    pub iteration_bound: usize,
    /// Shuffle seed; a random seed is drawn (and reported) when absent.
    pub seed: Option<u64>,
    /// Directory with the recorded logs the replay runtime needs.
    pub base_dir: PathBuf,
    /// Where to write each prepared schedule before executing it.
    pub schedule_file: PathBuf,
}

/// Outcome summary of a WAVE batch.
#[derive(Debug, Clone, Serialize)]
pub struct WaveReport {
    /// Seed the shuffle ran with.
    pub seed: u64,
    /// Unordered pairs found in the input schedule.
    pub possible: usize,
    /// Reversals that applied cleanly.
    pub reversed: usize,
    /// Schedules handed to the replay runtime.
    pub all_schedules: usize,
    /// Schedules that executed successfully.
    pub successful_schedules: usize,
}

/// The generated schedules of a batch, before execution.
#[derive(Debug)]
pub struct WaveGeneration {
    /// One mutated copy of the input schedule per iteration.
    pub schedules: Vec<Vec<EventId>>,
    /// Unordered pairs found in the input schedule.
    pub possible: usize,
    /// Reversals that applied cleanly.
    pub reversed: usize,
}

/// Swaps `first` and `second` in `schedule`, keeping everything that
/// happens after `first` behind it.
///
/// Unlike the race reverser this considers happens-before only; there is
/// no detector report for a synthetic reversal. Returns `false` (leaving
/// `schedule` untouched) when either event is no longer present, which
/// happens once earlier reversals have moved things around.
pub fn reverse_pair<G: EventGraph>(
    graph: &G,
    schedule: &mut Vec<EventId>,
    first: EventId,
    second: EventId,
) -> bool {
    let mut out = Vec::with_capacity(schedule.len());
    let mut pos = 0;

    while pos < schedule.len() && schedule[pos] != first {
        out.push(schedule[pos]);
        pos += 1;
    }
    if pos == schedule.len() {
        return false;
    }

    let mut dependent = vec![schedule[pos]];
    pos += 1;

    while pos < schedule.len() && schedule[pos] != second {
        let event = schedule[pos];
        if graph.are_ordered(first, event) {
            dependent.push(event);
        } else {
            out.push(event);
        }
        pos += 1;
    }
    if pos == schedule.len() {
        return false;
    }

    out.push(schedule[pos]);
    pos += 1;
    out.extend_from_slice(&dependent);
    out.extend_from_slice(&schedule[pos..]);

    *schedule = out;
    true
}

/// All `(earlier, later)` pairs of `schedule` with no happens-before edge.
#[must_use]
pub fn enumerate_reversals<G: EventGraph>(
    schedule: &[EventId],
    graph: &G,
) -> Vec<(EventId, EventId)> {
    let mut pairs = Vec::new();
    for i in 0..schedule.len() {
        for j in (i + 1)..schedule.len() {
            if !graph.are_ordered(schedule[i], schedule[j]) {
                pairs.push((schedule[i], schedule[j]));
            }
        }
    }
    pairs
}

/// Generates `count` mutated schedules by draining the shuffled reversal
/// queue round-robin across the batch.
pub fn generate<G: EventGraph, R: Rng>(
    schedule: &[EventId],
    graph: &G,
    count: usize,
    rng: &mut R,
) -> WaveGeneration {
    let mut queue = enumerate_reversals(schedule, graph);
    let possible = queue.len();
    queue.shuffle(rng);
    tracing::info!(possible, "enumerated reversal candidates");

    let mut schedules = vec![schedule.to_vec(); count];
    let mut reversed = 0;
    let mut pointer = 0;

    while let Some((first, second)) = queue.pop() {
        if schedules.is_empty() {
            break;
        }
        if reverse_pair(graph, &mut schedules[pointer], first, second) {
            reversed += 1;
        }
        pointer = (pointer + 1) % schedules.len();
    }
    tracing::info!(reversed, "applied reversals");

    WaveGeneration {
        schedules,
        possible,
        reversed,
    }
}

/// Generates and executes a full WAVE batch.
pub fn run<G: EventGraph, R: Replayer>(
    store: &ScheduleStore,
    graph: &G,
    config: &WaveConfig,
    replayer: &mut R,
) -> Result<WaveReport> {
    let seed = config.seed.unwrap_or_else(rand::random);
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    tracing::info!(seed, "wave shuffle seed");

    let generation = generate(store.schedule(), graph, config.iteration_bound, &mut rng);

    let mut all_schedules = 0;
    let mut successful_schedules = 0;
    for (i, schedule) in generation.schedules.iter().enumerate() {
        let name = format!("iteration{i}");

        // The whole schedule is synthetic; replay under relaxed
        // enforcement from the start.
        let mut executable = vec![ScheduleEntry::Relax, ScheduleEntry::Relax];
        executable.extend(schedule.iter().map(|&e| ScheduleEntry::Event(e)));
        store.save(&config.schedule_file, &executable)?;

        all_schedules += 1;
        let request = RunRequest {
            name: &name,
            origin: "base",
            base_dir: &config.base_dir,
            schedule: &config.schedule_file,
        };
        match replayer.execute(&request) {
            Ok(_) => successful_schedules += 1,
            Err(e) => tracing::warn!(run = %name, error = %e, "wave schedule failed"),
        }
    }

    tracing::info!(
        all_schedules,
        successful_schedules,
        "wave batch complete"
    );
    Ok(WaveReport {
        seed,
        possible: generation.possible,
        reversed: generation.reversed,
        all_schedules,
        successful_schedules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::EventDag;

    #[test]
    fn reverse_free_pair() {
        let dag = EventDag::default();
        let mut schedule = vec![1, 2, 3, 4];
        assert!(reverse_pair(&dag, &mut schedule, 2, 4));
        assert_eq!(schedule, vec![1, 3, 4, 2]);
    }

    #[test]
    fn reverse_carries_downstream() {
        let dag = EventDag::from_arcs(&[(2, 3)]);
        let mut schedule = vec![1, 2, 3, 4];
        assert!(reverse_pair(&dag, &mut schedule, 2, 4));
        assert_eq!(schedule, vec![1, 4, 2, 3]);
    }

    #[test]
    fn reverse_fails_without_mutating() {
        let dag = EventDag::default();
        let mut schedule = vec![1, 2, 3];
        assert!(!reverse_pair(&dag, &mut schedule, 2, 9));
        assert_eq!(schedule, vec![1, 2, 3]);
        assert!(!reverse_pair(&dag, &mut schedule, 9, 2));
        assert_eq!(schedule, vec![1, 2, 3]);
    }

    #[test]
    fn enumeration_respects_happens_before() {
        let dag = EventDag::from_arcs(&[(1, 2)]);
        let pairs = enumerate_reversals(&[1, 2, 3], &dag);
        assert_eq!(pairs, vec![(1, 3), (2, 3)]);
    }

    #[test]
    fn generation_is_deterministic_for_a_seed() {
        let dag = EventDag::default();
        let schedule = vec![0, 1, 2, 3, 4];

        let mut rng1 = Pcg64Mcg::seed_from_u64(7);
        let gen1 = generate(&schedule, &dag, 3, &mut rng1);
        let mut rng2 = Pcg64Mcg::seed_from_u64(7);
        let gen2 = generate(&schedule, &dag, 3, &mut rng2);

        assert_eq!(gen1.schedules, gen2.schedules);
        assert_eq!(gen1.possible, 10);
        assert_eq!(gen1.reversed, gen2.reversed);
    }

    #[test]
    fn generated_schedules_are_permutations() {
        let dag = EventDag::from_arcs(&[(0, 1), (1, 2)]);
        let schedule = vec![0, 1, 2, 3];
        let mut rng = Pcg64Mcg::seed_from_u64(42);

        let generation = generate(&schedule, &dag, 2, &mut rng);
        assert_eq!(generation.schedules.len(), 2);
        for mutated in &generation.schedules {
            let mut sorted = mutated.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn zero_iterations_applies_nothing() {
        let dag = EventDag::default();
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let generation = generate(&[0, 1, 2], &dag, 0, &mut rng);
        assert!(generation.schedules.is_empty());
        assert_eq!(generation.reversed, 0);
    }
}
