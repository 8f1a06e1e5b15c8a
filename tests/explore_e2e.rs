//! Exploration engine behavior against an in-memory replay runtime.
//!
//! The fake replayer executes every prescribed schedule exactly as
//! written; the fake detector replies with a scripted race report per
//! run. This pins down the engine's counters, its pruning rules, and its
//! tolerance of failed runs without any external process.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use racelab::detect::{EventDag, RaceInfo, RaceReport, RaceSource};
use racelab::error::{Error, Result};
use racelab::explore::{ExploreConfig, Explorer};
use racelab::replay::{Replayer, RunArtifacts, RunRequest};
use racelab::schedule::ScheduleStore;

struct FakeReplayer {
    out_dir: PathBuf,
    fail: BTreeSet<String>,
    benign: BTreeSet<String>,
}

impl FakeReplayer {
    fn new(out_dir: PathBuf) -> Self {
        Self {
            out_dir,
            fail: BTreeSet::new(),
            benign: BTreeSet::new(),
        }
    }
}

impl Replayer for FakeReplayer {
    fn execute(&mut self, request: &RunRequest<'_>) -> Result<RunArtifacts> {
        if self.fail.contains(request.name) {
            return Err(Error::CommandFailed {
                command: format!("fake replay of {}", request.name),
            });
        }

        // The runtime follows the prescribed schedule exactly.
        let store = ScheduleStore::load(request.schedule)?;
        let dir = self.out_dir.join(request.name);
        fs::create_dir_all(&dir).unwrap();
        let schedule = dir.join("schedule.data");
        store.save(&schedule, &store.executable())?;
        let action_log = dir.join("ER_actionlog");
        fs::write(&action_log, request.name).unwrap();

        Ok(RunArtifacts {
            dir,
            schedule,
            action_log,
        })
    }

    fn query_outcome(&mut self, run_name: &str) -> bool {
        self.benign.contains(run_name)
    }
}

/// Replies with the scripted report for the run that produced the action
/// log; unknown runs are race-free.
struct FakeSource {
    reports: BTreeMap<String, RaceReport>,
}

impl RaceSource for FakeSource {
    fn analyze(&self, action_log: &std::path::Path) -> Result<RaceReport> {
        let run = fs::read_to_string(action_log).unwrap();
        Ok(self
            .reports
            .get(&run)
            .cloned()
            .unwrap_or_default())
    }
}

fn race(first: usize, second: usize) -> RaceInfo {
    RaceInfo {
        first,
        second,
        var_id: 0,
        multi_parent_races: Vec::new(),
        covered_by: None,
    }
}

fn report(races: Vec<RaceInfo>) -> RaceReport {
    RaceReport::new(races, EventDag::default())
}

struct Setup {
    _dir: tempfile::TempDir,
    seed: Arc<ScheduleStore>,
    config: ExploreConfig,
    replayer: FakeReplayer,
}

fn setup(events: &[usize]) -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let seed_path = dir.path().join("schedule.data");
    let text: String = events.iter().map(|e| format!("{e};a{e}\n")).collect();
    fs::write(&seed_path, text).unwrap();
    let seed = Arc::new(ScheduleStore::load(&seed_path).unwrap());

    let config = ExploreConfig {
        schedule_file: dir.path().join("new_schedule.data"),
        base_dir: dir.path().join("base_logs"),
        ..ExploreConfig::default()
    };
    let replayer = FakeReplayer::new(dir.path().join("out"));

    Setup {
        _dir: dir,
        seed,
        config,
        replayer,
    }
}

#[test]
fn single_race_yields_seed_plus_one_reversal() {
    let s = setup(&[1, 2, 3, 4]);
    let source = FakeSource {
        reports: BTreeMap::from([("base".to_string(), report(vec![race(2, 3)]))]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 2);
    assert_eq!(totals.all_schedules, 1);
    assert_eq!(totals.successful_reverses, 1);
    assert_eq!(totals.successful_schedules, 1);
}

#[test]
fn covered_races_are_not_reversed() {
    let s = setup(&[1, 2, 3, 4]);
    let mut covered = race(2, 3);
    covered.covered_by = Some(7);
    let source = FakeSource {
        reports: BTreeMap::from([("base".to_string(), report(vec![covered]))]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 1);
    assert_eq!(totals.all_schedules, 0);
    assert_eq!(totals.successful_reverses, 0);
}

#[test]
fn depth_bound_stops_nested_reversals() {
    let s = setup(&[1, 2, 3, 4]);
    // The reversal of (2, 3) executes as [1, 3, 2, 4]; its trace reports
    // a further race that the default bound of 1 must prune.
    let source = FakeSource {
        reports: BTreeMap::from([
            ("base".to_string(), report(vec![race(2, 3)])),
            ("run0001_race0".to_string(), report(vec![race(3, 4)])),
        ]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 2);
    assert_eq!(totals.successful_reverses, 1);
}

#[test]
fn raising_the_bound_explores_nested_reversals() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.conflict_reversal_bound = 2;
    let source = FakeSource {
        reports: BTreeMap::from([
            ("base".to_string(), report(vec![race(2, 3)])),
            ("run0001_race0".to_string(), report(vec![race(3, 4)])),
        ]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 3);
    assert_eq!(totals.all_schedules, 2);
    assert_eq!(totals.successful_reverses, 2);
    assert_eq!(totals.successful_schedules, 2);
}

#[test]
fn mini_sleep_set_blocks_the_undo_reversal() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.conflict_reversal_bound = 2;
    // After reversing (2, 3) the trace reports the pair the other way
    // around; re-reversing it would just reproduce the seed path.
    let source = FakeSource {
        reports: BTreeMap::from([
            ("base".to_string(), report(vec![race(2, 3)])),
            ("run0001_race0".to_string(), report(vec![race(3, 2)])),
        ]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 2);
    assert_eq!(totals.successful_reverses, 1);
}

#[test]
fn failed_replay_consumes_the_continuation() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.replayer.fail.insert("run0001_race0".to_string());
    let source = FakeSource {
        reports: BTreeMap::from([("base".to_string(), report(vec![race(2, 3)]))]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    // The reversal was generated and attempted once, then abandoned.
    assert_eq!(totals.runs_executed, 2);
    assert_eq!(totals.all_schedules, 1);
    assert_eq!(totals.successful_reverses, 1);
    assert_eq!(totals.successful_schedules, 0);
}

#[test]
fn iteration_bound_limits_replays() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.iteration_bound = 1;
    let source = FakeSource {
        reports: BTreeMap::from([("base".to_string(), report(vec![race(2, 3)]))]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 1);
    assert_eq!(totals.all_schedules, 0);
}

#[test]
fn benign_runs_propagate_no_new_races_when_opted_in() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.same_state_reversal_opt = true;
    s.replayer.benign.insert("base".to_string());
    let source = FakeSource {
        reports: BTreeMap::from([("base".to_string(), report(vec![race(2, 3)]))]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    // The seed run carries no reversed pair, so a benign outcome prunes
    // every race it reported.
    assert_eq!(totals.runs_executed, 1);
    assert_eq!(totals.successful_reverses, 0);
}

#[test]
fn benign_pruning_spares_races_touching_the_reversed_pair() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.conflict_reversal_bound = 2;
    s.config.same_state_reversal_opt = true;
    s.replayer.benign.insert("run0001_race0".to_string());
    // (3, 4) touches event 3, which the first reversal hoisted, so the
    // benign outcome does not suppress it.
    let source = FakeSource {
        reports: BTreeMap::from([
            ("base".to_string(), report(vec![race(2, 3)])),
            ("run0001_race0".to_string(), report(vec![race(3, 4)])),
        ]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 3);
    assert_eq!(totals.successful_reverses, 2);
}

#[test]
fn old_style_bound_counts_path_segments() {
    let mut s = setup(&[1, 2, 3, 4]);
    s.config.old_style_bound = true;
    s.config.conflict_reversal_bound = 1;
    let source = FakeSource {
        reports: BTreeMap::from([
            ("base".to_string(), report(vec![race(2, 3)])),
            // States pushed by the first reversal run sit at path depth
            // 1, so this race is pruned under the old-style bound.
            ("run0001_race0".to_string(), report(vec![race(3, 4)])),
        ]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 2);
    assert_eq!(totals.successful_reverses, 1);
}

#[test]
fn races_off_the_executed_path_are_skipped() {
    let s = setup(&[1, 2, 3, 4]);
    let source = FakeSource {
        reports: BTreeMap::from([(
            "base".to_string(),
            report(vec![race(2, 9), race(9, 2), race(40, 41)]),
        )]),
    };

    let mut explorer = Explorer::new(s.config, s.replayer, source);
    let totals = explorer.run(&s.seed).unwrap();

    assert_eq!(totals.runs_executed, 1);
    assert_eq!(totals.successful_reverses, 0);
}
