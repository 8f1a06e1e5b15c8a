//! Event-After-Trace schedule-space exploration.
//!
//! Depth-first search over event interleavings. The stack holds one state
//! per explored prefix; each state carries the pending alternative
//! continuations (EAT entries) rooted there and the set of first events
//! already tried from it. One iteration picks the top state's first
//! unexplored continuation, replays it, pushes states for the events the
//! execution appended, rebases the pending continuations, and turns every
//! uncovered race of the new trace into a further continuation, bounded
//! by the conflict-reversal depth and pruned by a one-step sleep set so
//! the reversal just performed is not immediately undone.
//!
//! Everything is synchronous and single-threaded; the only blocking
//! points are the replay and outcome-query subprocesses.

pub mod eat;
pub mod stack;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

pub use eat::{EatEntry, SwapIndices, eat_merge, eat_propagate, state_has_unexplored_eat};
pub use stack::StackState;

use crate::detect::RaceSource;
use crate::error::Result;
use crate::reorder::{ReorderOptions, reorder_for_race};
use crate::replay::{Replayer, RunRequest};
use crate::schedule::{ScheduleStore, remove_special_markers};

/// Exploration settings.
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Maximum nesting of race reversals along one branch.
    pub conflict_reversal_bound: usize,
    /// Bound path-segment depth instead of reversal depth.
    pub old_style_bound: bool,
    /// Maximum number of replay invocations; negative means unlimited.
    pub iteration_bound: i64,
    /// Skip races of a benign run unless they touch the reversed pair.
    pub same_state_reversal_opt: bool,
    /// Sentinel placement for reversal schedules.
    pub reorder_options: ReorderOptions,
    /// Where prepared schedules are written before each replay.
    pub schedule_file: PathBuf,
    /// Base directory (recorded logs) for the seed run.
    pub base_dir: PathBuf,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            conflict_reversal_bound: 1,
            old_style_bound: false,
            iteration_bound: -1,
            same_state_reversal_opt: false,
            reorder_options: ReorderOptions {
                include_change_marker: true,
                relax_replay_after_all_races: true,
            },
            schedule_file: PathBuf::from("/tmp/new_schedule.data"),
            base_dir: PathBuf::from("."),
        }
    }
}

/// Counters of one exploration.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ExploreReport {
    /// Reversal schedules handed to the replay runtime (seed excluded).
    pub all_schedules: usize,
    /// Race reversals that produced a schedule.
    pub successful_reverses: usize,
    /// Reversal schedules that executed successfully.
    pub successful_schedules: usize,
    /// Every replay invocation, seed included.
    pub runs_executed: usize,
}

impl ExploreReport {
    /// Human-readable summary.
    #[must_use]
    pub fn to_text(&self) -> String {
        format!(
            "Tried {} schedules. {} generated, {} successful ({} runs executed)",
            self.all_schedules,
            self.successful_reverses,
            self.successful_schedules,
            self.runs_executed
        )
    }
}

/// The exploration engine.
///
/// Generic over the replay invoker and the race-detector source so tests
/// can drive it without external processes.
#[derive(Debug)]
pub struct Explorer<R, S> {
    config: ExploreConfig,
    replayer: R,
    source: S,
}

impl<R: Replayer, S: RaceSource> Explorer<R, S> {
    /// Creates an explorer over the given invoker and detector source.
    pub fn new(config: ExploreConfig, replayer: R, source: S) -> Self {
        Self {
            config,
            replayer,
            source,
        }
    }

    /// Explores from the given seed schedule until the stack empties or
    /// the iteration bound is reached.
    pub fn run(&mut self, seed: &Arc<ScheduleStore>) -> Result<ExploreReport> {
        let mut stack = vec![StackState::root()];
        stack[0].eat.push(EatEntry {
            base_dir: self.config.base_dir.clone(),
            race_id: None,
            suffix: seed.schedule().to_vec(),
            executable: seed.executable(),
            store: Arc::clone(seed),
            origin: "base".to_string(),
            depth: 0,
            swap: None,
        });

        let mut totals = ExploreReport::default();
        let mut run_seq = 0usize;

        while !stack.is_empty() {
            if self.config.iteration_bound >= 0
                && totals.runs_executed as i64 >= self.config.iteration_bound
            {
                tracing::info!("iteration bound reached");
                break;
            }

            let top = stack.len() - 1;
            let Some(entry_index) = state_has_unexplored_eat(&stack[top]) else {
                stack.pop();
                continue;
            };
            let entry = stack[top].eat[entry_index].clone();

            // Mark before executing so a failed run still prunes.
            stack[top].visited.insert(entry.suffix[0]);

            let name = match entry.race_id {
                None => "base".to_string(),
                Some(race_id) => {
                    run_seq += 1;
                    format!("run{run_seq:04}_race{race_id}")
                }
            };
            let is_seed = entry.race_id.is_none();
            if !is_seed {
                totals.all_schedules += 1;
            }

            if let Err(e) = entry
                .store
                .save(&self.config.schedule_file, &entry.executable)
            {
                tracing::warn!(run = %name, error = %e, "cannot prepare schedule");
                continue;
            }

            totals.runs_executed += 1;
            tracing::info!(run = %name, origin = %entry.origin, depth = entry.depth, "replaying");
            let request = RunRequest {
                name: &name,
                origin: &entry.origin,
                base_dir: &entry.base_dir,
                schedule: &self.config.schedule_file,
            };
            let artifacts = match self.replayer.execute(&request) {
                Ok(artifacts) => artifacts,
                Err(e) => {
                    tracing::warn!(run = %name, error = %e, "replay failed");
                    continue;
                }
            };
            if !is_seed {
                totals.successful_schedules += 1;
            }

            // The runtime may diverge beyond the enforced prefix; what
            // counts is the schedule it actually executed.
            let executed_store = match ScheduleStore::load(&artifacts.schedule) {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(run = %name, error = %e, "cannot read executed schedule");
                    continue;
                }
            };
            let executed = executed_store.schedule().to_vec();

            let old_top = stack.len() - 1;
            let prior_last = stack[old_top].last_event();
            let segment_depth = if is_seed {
                0
            } else {
                stack[old_top].path_depth + 1
            };

            for pos in stack[old_top].schedule.len()..executed.len() {
                let mut schedule = stack[stack.len() - 1].schedule.clone();
                schedule.push(executed[pos]);
                stack.push(StackState {
                    name: name.clone(),
                    schedule,
                    visited: std::collections::BTreeSet::new(),
                    eat: Vec::new(),
                    race_first: entry.swap.is_some_and(|s| s.hoisted == pos),
                    race_second: entry.swap.is_some_and(|s| s.deferred == pos),
                    path_depth: segment_depth,
                });
            }

            eat_propagate(&mut stack, old_top);

            let analysis = match self.source.analyze(&artifacts.action_log) {
                Ok(analysis) => analysis,
                Err(e) => {
                    tracing::warn!(run = %name, error = %e, "race analysis failed");
                    continue;
                }
            };

            let benign = self.config.same_state_reversal_opt && self.replayer.query_outcome(&name);

            // Event id -> position in the executed schedule. Ids beyond
            // the table, or absent from it, are not on this path.
            let table_len = executed.iter().copied().max().map_or(0, |max| max + 1);
            let mut event_pos: Vec<Option<usize>> = vec![None; table_len];
            for (pos, &event) in executed.iter().enumerate() {
                if event_pos[event].is_none() {
                    event_pos[event] = Some(pos);
                }
            }

            let current_depth = entry.depth;
            for (race_id, race) in analysis.races().iter().enumerate() {
                if !race.is_uncovered() {
                    continue;
                }
                let Some(p1) = event_pos.get(race.first).copied().flatten() else {
                    continue;
                };
                let Some(p2) = event_pos.get(race.second).copied().flatten() else {
                    continue;
                };

                if self.config.old_style_bound {
                    if stack[p1 + 1].path_depth >= self.config.conflict_reversal_bound {
                        tracing::debug!(race_id, "pruned: path depth bound");
                        continue;
                    }
                } else if current_depth >= self.config.conflict_reversal_bound {
                    tracing::debug!(race_id, "pruned: reversal depth bound");
                    continue;
                }

                // Event ids are assigned in dispatch order, so a second
                // event below the pre-execution prefix tail lies in
                // already-explored territory.
                if prior_last.is_some_and(|last| race.second < last) {
                    tracing::debug!(race_id, "pruned: behind explored prefix");
                    continue;
                }

                if p2 == p1 + 1 && stack[p1 + 1].race_first && stack[p2 + 1].race_second {
                    tracing::debug!(race_id, "pruned: would undo the previous reversal");
                    continue;
                }

                if benign {
                    let marked = |state: &StackState| state.race_first || state.race_second;
                    if !marked(&stack[p1 + 1]) && !marked(&stack[p2 + 1]) {
                        tracing::debug!(race_id, "pruned: benign outcome, untouched pair");
                        continue;
                    }
                }

                let reordered = match reorder_for_race(
                    &executed_store,
                    &analysis,
                    race_id,
                    self.config.reorder_options,
                ) {
                    Ok(reordered) => reordered,
                    Err(e) => {
                        tracing::debug!(race_id, error = %e, "reversal rejected");
                        continue;
                    }
                };
                totals.successful_reverses += 1;

                let strict = remove_special_markers(&reordered.executable);
                let continuation = EatEntry {
                    base_dir: artifacts.dir.clone(),
                    race_id: Some(race_id),
                    suffix: strict[p1..].to_vec(),
                    executable: reordered.executable,
                    store: Arc::clone(&executed_store),
                    origin: name.clone(),
                    depth: current_depth + 1,
                    swap: Some(SwapIndices {
                        hoisted: reordered.hoisted_index,
                        deferred: reordered.deferred_index,
                    }),
                };
                let _ = eat_merge(&mut stack, p1, continuation);
            }
        }

        tracing::info!(
            tried = totals.all_schedules,
            successful = totals.successful_schedules,
            "exploration finished"
        );
        Ok(totals)
    }
}
