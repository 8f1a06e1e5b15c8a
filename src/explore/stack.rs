//! Per-prefix exploration state.

use std::collections::BTreeSet;

use crate::explore::eat::EatEntry;
use crate::schedule::EventId;

/// One explored prefix on the search stack.
///
/// The state at stack index `i` holds a prefix of length `i`; index 0 is
/// the root with the empty prefix. States are uniquely owned by the
/// stack: they are created on push, mutated only through `visited` and
/// `eat`, and destroyed on pop.
#[derive(Debug)]
pub struct StackState {
    /// Name of the run that pushed this state.
    pub name: String,
    /// The event-id prefix from the root to here.
    pub schedule: Vec<EventId>,
    /// Events already selected as the next step from this prefix. Grows
    /// monotonically until the state is popped; no pending continuation
    /// proposing a visited first event is executed again.
    pub visited: BTreeSet<EventId>,
    /// Pending continuations rooted at this prefix: their first suffix
    /// element is the next event after it.
    pub eat: Vec<EatEntry>,
    /// This state's event was placed first by the reversal that produced
    /// the current path.
    pub race_first: bool,
    /// This state's event was placed second (deferred) by that reversal.
    pub race_second: bool,
    /// Number of executions between the root and this state; states
    /// pushed by the seed execution carry 0.
    pub path_depth: usize,
}

impl StackState {
    /// The root state: empty prefix, nothing visited.
    #[must_use]
    pub fn root() -> Self {
        Self {
            name: "root".to_string(),
            schedule: Vec::new(),
            visited: BTreeSet::new(),
            eat: Vec::new(),
            race_first: false,
            race_second: false,
            path_depth: 0,
        }
    }

    /// The last event of this prefix, if any.
    #[must_use]
    pub fn last_event(&self) -> Option<EventId> {
        self.schedule.last().copied()
    }
}
