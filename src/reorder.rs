//! Race-driven schedule reversal.
//!
//! Takes a schedule of the form `a·x·b·y·c`, where `x` and `y` are a
//! racing pair, and produces `a·b′·y·x·b″·c`: `b″` is the transitive
//! causal downstream of `x` within `b` (happens-before or races-with,
//! seeded from `x` alone) and keeps its relative order behind `x`; `b′`
//! is the causally independent remainder and is hoisted before `y`.
//! Placing `b″` strictly after `y` is what keeps the reordering
//! consistent with the happens-before relation of every pair other than
//! the reversed one.

use crate::detect::{EventGraph, RaceId, RaceReport};
use crate::error::{Error, Result};
use crate::schedule::{EventId, ScheduleEntry, ScheduleStore};

/// Sentinel placement for reversal output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReorderOptions {
    /// Insert a `<change>` marker immediately before the hoisted event,
    /// warning the runtime that non-determinism is expected from there on.
    pub include_change_marker: bool,
    /// Insert a `<relax>` marker immediately after the hoisted event, so
    /// the runtime stops strictly enforcing the order once the race is
    /// reversed.
    pub relax_replay_after_all_races: bool,
}

/// A reversal result: the executable schedule plus where the racing pair
/// landed in its strict projection.
#[derive(Debug, Clone)]
pub struct ReorderedSchedule {
    /// The reordered schedule, markers included.
    pub executable: Vec<ScheduleEntry>,
    /// Strict position of the hoisted event (`y`, now scheduled first).
    pub hoisted_index: usize,
    /// Strict position of the deferred event (`x`, now right behind `y`).
    pub deferred_index: usize,
}

/// Builds the schedule that reverses race `race_id` of `report` within
/// the schedule held by `store`.
///
/// Fails when `race_id` is out of range or either racing event does not
/// occur in the stored schedule.
pub fn reorder_for_race(
    store: &ScheduleStore,
    report: &RaceReport,
    race_id: RaceId,
    options: ReorderOptions,
) -> Result<ReorderedSchedule> {
    let race = report.race(race_id).ok_or_else(|| Error::Reorder {
        race_id,
        reason: format!("race id out of range (report has {})", report.races().len()),
    })?;
    let schedule = store.schedule();
    let hb = report.graph();

    let mut out = Vec::with_capacity(schedule.len() + 2);
    let mut strict_pos = 0;
    let mut pos = 0;

    // Emit `a` until we see x.
    while pos < schedule.len() && schedule[pos] != race.first {
        out.push(ScheduleEntry::Event(schedule[pos]));
        strict_pos += 1;
        pos += 1;
    }
    if pos == schedule.len() {
        return Err(Error::Reorder {
            race_id,
            reason: format!("event {} not in schedule", race.first),
        });
    }

    // Skip x; it seeds the dependent suffix.
    let mut dependent = vec![schedule[pos]];
    pos += 1;

    // Emit `b′` until we see y, collecting the downstream of x.
    while pos < schedule.len() && schedule[pos] != race.second {
        let event = schedule[pos];
        let depends = dependent
            .iter()
            .any(|&v| hb.are_ordered(v, event) || report.is_racing_pair(v, event));
        if depends {
            dependent.push(event);
        } else {
            out.push(ScheduleEntry::Event(event));
            strict_pos += 1;
        }
        pos += 1;
    }
    if pos == schedule.len() {
        return Err(Error::Reorder {
            race_id,
            reason: format!("event {} not in schedule", race.second),
        });
    }

    if options.include_change_marker {
        out.push(ScheduleEntry::Change);
    }

    // Emit y.
    out.push(ScheduleEntry::Event(schedule[pos]));
    let hoisted_index = strict_pos;
    strict_pos += 1;
    pos += 1;

    if options.relax_replay_after_all_races {
        out.push(ScheduleEntry::Relax);
    }

    // Emit x and the rest of its downstream.
    let deferred_index = strict_pos;
    out.extend(dependent.iter().map(|&e| ScheduleEntry::Event(e)));

    // Emit `c`.
    out.extend(schedule[pos..].iter().map(|&e| ScheduleEntry::Event(e)));

    Ok(ReorderedSchedule {
        executable: out,
        hoisted_index,
        deferred_index,
    })
}
