//! In-memory model of a recorded action log.
//!
//! The replay runtime records, per event action, the ordered commands it
//! observed: scope entries and exits, memory reads and writes, and the
//! values involved. A memory access is two adjacent commands: the
//! `ReadMemory`/`WriteMemory` carrying the location id, immediately
//! followed by a `MemoryValue` whose location field carries the value id.
//! Location and value ids index interned string tables.
//!
//! The runtime's native binary encoding is not modeled here; this shape
//! exists for the preprocessing passes, with a JSON rendition for
//! tooling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of one recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Entered a function scope; location is the scope id.
    EnterScope,
    /// Left the innermost scope.
    ExitScope,
    /// Read a memory location.
    ReadMemory,
    /// Wrote a memory location.
    WriteMemory,
    /// Triggered another event action.
    TriggerArc,
    /// Value of the immediately preceding read or write.
    MemoryValue,
    /// Marked for removal; compaction drops these.
    Deleted,
}

/// One recorded command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// What happened.
    pub kind: CommandKind,
    /// Location id, scope id, or value id, depending on `kind`.
    pub location: usize,
}

impl Command {
    /// Convenience constructor.
    #[must_use]
    pub fn new(kind: CommandKind, location: usize) -> Self {
        Self { kind, location }
    }

    /// True for the two memory-access command kinds.
    #[must_use]
    pub fn is_access(&self) -> bool {
        matches!(self.kind, CommandKind::ReadMemory | CommandKind::WriteMemory)
    }
}

/// The command stream of one event action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAction {
    /// Commands in recorded order.
    pub commands: Vec<Command>,
}

/// A recorded execution: one command stream per event action, indexed by
/// event action id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLog {
    /// Event actions in id order; gaps are empty actions.
    pub actions: Vec<EventAction>,
}

impl ActionLog {
    /// Appends an event action and returns its id.
    pub fn push_action(&mut self, commands: Vec<Command>) -> usize {
        self.actions.push(EventAction { commands });
        self.actions.len() - 1
    }

    /// The command stream of `id`, if present.
    #[must_use]
    pub fn action(&self, id: usize) -> Option<&EventAction> {
        self.actions.get(id)
    }
}

/// Interned strings for memory-location and value names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringTable {
    strings: Vec<String>,
    index: BTreeMap<String, usize>,
}

impl StringTable {
    /// Interns `name`, returning its stable id.
    pub fn intern(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.strings.len();
        self.strings.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    /// The string behind `id`; unknown ids read as the empty string.
    #[must_use]
    pub fn get(&self, id: usize) -> &str {
        self.strings.get(id).map_or("", String::as_str)
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// True when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl From<Vec<String>> for StringTable {
    fn from(strings: Vec<String>) -> Self {
        let index = strings
            .iter()
            .enumerate()
            .map(|(id, s)| (s.clone(), id))
            .collect();
        Self { strings, index }
    }
}

impl From<StringTable> for Vec<String> {
    fn from(table: StringTable) -> Self {
        table.strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mut table = StringTable::default();
        let a = table.intern("O.counter");
        let b = table.intern("L.tmp");
        assert_ne!(a, b);
        assert_eq!(table.intern("O.counter"), a);
        assert_eq!(table.get(a), "O.counter");
        assert_eq!(table.get(999), "");
    }

    #[test]
    fn table_round_trips_through_json() {
        let mut table = StringTable::default();
        table.intern("x");
        table.intern("y");
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"["x","y"]"#);
        let back: StringTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(1), "y");
        // The rebuilt index still deduplicates.
        let mut back = back;
        assert_eq!(back.intern("x"), 0);
    }

    #[test]
    fn log_round_trips_through_json() {
        let mut log = ActionLog::default();
        log.push_action(vec![
            Command::new(CommandKind::ReadMemory, 3),
            Command::new(CommandKind::MemoryValue, 7),
        ]);
        let json = serde_json::to_string(&log).unwrap();
        let back: ActionLog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log);
    }
}
