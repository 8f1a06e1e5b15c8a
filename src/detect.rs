//! Interfaces consumed from the external race detector.
//!
//! Racelab does not detect races. The detector ingests an execution trace
//! (the `ER_actionlog` artifact of a run) and reports the racing event
//! pairs it found together with the happens-before DAG of the execution.
//! This module defines the shape of that report and the [`RaceSource`]
//! seam through which the explorer obtains one per executed run.

use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schedule::EventId;

/// Index of a race within one detector report.
pub type RaceId = usize;

/// One racing event pair reported by the detector.
///
/// `first` was scheduled before `second` in the analyzed execution; the
/// two access `var_id` without a happens-before edge between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceInfo {
    /// Event scheduled earlier.
    pub first: EventId,
    /// Event scheduled later.
    pub second: EventId,
    /// Detector id of the memory location the pair collides on.
    pub var_id: usize,
    /// Races that must be reversed together with this one, if any.
    #[serde(default)]
    pub multi_parent_races: Vec<RaceId>,
    /// Race whose reversal also reverses this one, if any.
    #[serde(default)]
    pub covered_by: Option<RaceId>,
}

impl RaceInfo {
    /// True when reversing this race alone is meaningful: it is not
    /// entangled with sibling races and not covered by another one.
    #[must_use]
    pub fn is_uncovered(&self) -> bool {
        self.multi_parent_races.is_empty() && self.covered_by.is_none()
    }
}

/// Happens-before oracle over event ids.
pub trait EventGraph {
    /// True iff `a` happens before `b`.
    fn are_ordered(&self, a: EventId, b: EventId) -> bool;
}

/// Happens-before DAG with a precomputed reachability closure.
///
/// Built once per detector report; `are_ordered` is then a set lookup.
/// Closure size is quadratic in the worst case, which is acceptable at
/// the trace lengths the replay runtime produces.
#[derive(Debug, Clone, Default)]
pub struct EventDag {
    reachable: Vec<BTreeSet<EventId>>,
}

impl EventDag {
    /// Builds the DAG from explicit arcs and closes it transitively.
    #[must_use]
    pub fn from_arcs(arcs: &[(EventId, EventId)]) -> Self {
        let nodes = arcs
            .iter()
            .map(|&(a, b)| a.max(b) + 1)
            .max()
            .unwrap_or(0);
        let mut successors = vec![Vec::new(); nodes];
        for &(a, b) in arcs {
            successors[a].push(b);
        }

        let mut reachable = vec![BTreeSet::new(); nodes];
        for start in 0..nodes {
            let mut pending = successors[start].clone();
            while let Some(node) = pending.pop() {
                if reachable[start].insert(node) {
                    pending.extend_from_slice(&successors[node]);
                }
            }
        }
        Self { reachable }
    }
}

impl EventGraph for EventDag {
    fn are_ordered(&self, a: EventId, b: EventId) -> bool {
        self.reachable.get(a).is_some_and(|set| set.contains(&b))
    }
}

/// Detector output for one execution: the race list plus the
/// happens-before graph of the trace.
#[derive(Debug, Clone, Default)]
pub struct RaceReport {
    races: Vec<RaceInfo>,
    graph: EventDag,
    racing_pairs: BTreeSet<(EventId, EventId)>,
}

/// Wire form of a detector report.
#[derive(Debug, Deserialize)]
struct RaceReportDoc {
    #[serde(default)]
    races: Vec<RaceInfo>,
    #[serde(default)]
    arcs: Vec<(EventId, EventId)>,
}

impl RaceReport {
    /// Builds a report from a race list and a closed happens-before DAG.
    #[must_use]
    pub fn new(races: Vec<RaceInfo>, graph: EventDag) -> Self {
        let racing_pairs = races.iter().map(|r| (r.first, r.second)).collect();
        Self {
            races,
            graph,
            racing_pairs,
        }
    }

    /// Parses the JSON document the external detector prints.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: RaceReportDoc =
            serde_json::from_str(text).map_err(|e| Error::Detector(e.to_string()))?;
        Ok(Self::new(doc.races, EventDag::from_arcs(&doc.arcs)))
    }

    /// All reported races, in detector order.
    #[must_use]
    pub fn races(&self) -> &[RaceInfo] {
        &self.races
    }

    /// The race at `id`, if in range.
    #[must_use]
    pub fn race(&self, id: RaceId) -> Option<&RaceInfo> {
        self.races.get(id)
    }

    /// The happens-before graph of the analyzed execution.
    #[must_use]
    pub fn graph(&self) -> &EventDag {
        &self.graph
    }

    /// True iff the detector reported a race with `first` scheduled
    /// before `second`.
    #[must_use]
    pub fn is_racing_pair(&self, first: EventId, second: EventId) -> bool {
        self.racing_pairs.contains(&(first, second))
    }
}

/// Source of detector reports, one per executed run.
pub trait RaceSource {
    /// Analyzes the action log of an executed run.
    fn analyze(&self, action_log: &Path) -> Result<RaceReport>;
}

/// Runs an external detector command and parses its stdout.
///
/// The command template carries one `%s` placeholder, filled with the
/// path of the `ER_actionlog` to analyze.
#[derive(Debug, Clone)]
pub struct CommandRaceSource {
    command: String,
}

impl CommandRaceSource {
    /// Creates a source from the command template.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl RaceSource for CommandRaceSource {
    fn analyze(&self, action_log: &Path) -> Result<RaceReport> {
        let command = self
            .command
            .replacen("%s", &action_log.display().to_string(), 1);
        tracing::info!(%command, "running race detector");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .output()
            .map_err(|e| Error::io(action_log, e))?;
        if !output.status.success() {
            return Err(Error::CommandFailed { command });
        }
        let text = String::from_utf8_lossy(&output.stdout);
        RaceReport::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_is_transitively_closed() {
        let dag = EventDag::from_arcs(&[(0, 1), (1, 3), (3, 4)]);
        assert!(dag.are_ordered(0, 1));
        assert!(dag.are_ordered(0, 3));
        assert!(dag.are_ordered(0, 4));
        assert!(dag.are_ordered(1, 4));
        assert!(!dag.are_ordered(4, 0));
        assert!(!dag.are_ordered(0, 2));
    }

    #[test]
    fn dag_out_of_range_is_unordered() {
        let dag = EventDag::from_arcs(&[(0, 1)]);
        assert!(!dag.are_ordered(7, 8));
    }

    #[test]
    fn uncovered_requires_no_parents_and_no_cover() {
        let mut race = RaceInfo {
            first: 1,
            second: 2,
            var_id: 0,
            multi_parent_races: Vec::new(),
            covered_by: None,
        };
        assert!(race.is_uncovered());
        race.covered_by = Some(0);
        assert!(!race.is_uncovered());
        race.covered_by = None;
        race.multi_parent_races.push(3);
        assert!(!race.is_uncovered());
    }

    #[test]
    fn report_parses_detector_json() {
        let report = RaceReport::from_json(
            r#"{ "races": [ { "first": 2, "second": 4, "var_id": 9 } ],
                 "arcs": [[0, 1], [1, 2]] }"#,
        )
        .unwrap();
        assert_eq!(report.races().len(), 1);
        assert!(report.races()[0].is_uncovered());
        assert!(report.is_racing_pair(2, 4));
        assert!(!report.is_racing_pair(4, 2));
        assert!(report.graph().are_ordered(0, 2));
    }

    #[test]
    fn report_rejects_malformed_json() {
        assert!(RaceReport::from_json("{ races: oops").is_err());
    }
}
