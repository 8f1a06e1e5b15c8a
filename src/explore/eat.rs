//! Event-After-Trace entries: pending alternative continuations.
//!
//! An EAT entry records everything needed to replay one alternative
//! continuation of an explored prefix: the event suffix to schedule from
//! the merge point, the full executable schedule (markers included) to
//! write to disk, and a handle on the schedule store carrying the action
//! payloads of the run the entry was derived from.

use std::path::PathBuf;
use std::sync::Arc;

use crate::detect::RaceId;
use crate::explore::stack::StackState;
use crate::schedule::{EventId, ScheduleEntry, ScheduleStore};

/// Strict positions the reversal gave the racing pair in its output
/// schedule: the hoisted event runs first, the deferred one right after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapIndices {
    /// Position of the hoisted event (the pair member now scheduled first).
    pub hoisted: usize,
    /// Position of the deferred event.
    pub deferred: usize,
}

/// A pending continuation of an explored prefix.
#[derive(Debug, Clone)]
pub struct EatEntry {
    /// Output directory of the run whose trace produced this entry; the
    /// replay of this entry uses it as its base directory.
    pub base_dir: PathBuf,
    /// Race that yielded this continuation; `None` for the initial seed.
    pub race_id: Option<RaceId>,
    /// Strict event sequence to schedule from the merge point on.
    pub suffix: Vec<EventId>,
    /// Full executable schedule written to disk when this entry runs.
    pub executable: Vec<ScheduleEntry>,
    /// Payload table for serializing `executable`; shared with every
    /// entry derived from the same run, immutable after load.
    pub store: Arc<ScheduleStore>,
    /// Name of the run that spawned this entry.
    pub origin: String,
    /// Conflict-reversal depth: race reversals on the path to this entry.
    pub depth: usize,
    /// Where the reversal placed the racing pair, for the mini sleep set.
    pub swap: Option<SwapIndices>,
}

impl EatEntry {
    /// True when `other` proposes the same continuation: same suffix,
    /// produced by the same race of the same run.
    #[must_use]
    pub fn same_continuation(&self, other: &Self) -> bool {
        self.race_id == other.race_id && self.origin == other.origin && self.suffix == other.suffix
    }
}

/// Index of the first entry of `state.eat` whose first suffix event has
/// not been selected from this prefix yet. Entries are scanned in
/// insertion order; none is removed.
#[must_use]
pub fn state_has_unexplored_eat(state: &StackState) -> Option<usize> {
    state.eat.iter().position(|entry| {
        entry
            .suffix
            .first()
            .is_some_and(|first| !state.visited.contains(first))
    })
}

/// Merges `entry` onto the stack at `offset`.
///
/// Walks the longest common prefix between the stack descending from
/// `offset` and the entry's suffix, advancing in lock-step. When the
/// suffix is fully consumed the continuation is already on-stack and the
/// merge is a no-op (`None`); otherwise a copy truncated past the common
/// prefix is pushed onto the EAT of the state where it diverges, and the
/// number of consumed suffix events is returned. Re-merging a
/// continuation that is already pending at that state is also a no-op.
pub fn eat_merge(stack: &mut [StackState], offset: usize, entry: EatEntry) -> Option<usize> {
    let mut at = offset;
    let mut consumed = 0;

    while at + 1 < stack.len()
        && consumed < entry.suffix.len()
        && stack[at + 1].last_event() == Some(entry.suffix[consumed])
    {
        at += 1;
        consumed += 1;
    }

    if consumed == entry.suffix.len() {
        return None;
    }

    let mut rebased = entry;
    rebased.suffix.drain(..consumed);
    if stack[at]
        .eat
        .iter()
        .any(|existing| existing.same_continuation(&rebased))
    {
        return None;
    }
    stack[at].eat.push(rebased);
    Some(consumed)
}

/// Rebases every pending continuation of `stack[index]` after an
/// execution has lengthened the prefix.
///
/// The state's EAT vector is swapped out wholesale; any reference into it
/// taken before this call is stale.
pub fn eat_propagate(stack: &mut [StackState], index: usize) {
    let pending = std::mem::take(&mut stack[index].eat);
    for entry in pending {
        let _ = eat_merge(stack, index, entry);
    }
}
