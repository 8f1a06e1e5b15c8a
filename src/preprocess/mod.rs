//! Peephole cleanup of recorded command streams.
//!
//! Race detection over a raw action log drowns in accesses that cannot
//! matter: values written over themselves, locals that never escape their
//! event action, counters that only ever increment. Each pass here walks
//! the command streams, marks the accesses it can prove uninteresting,
//! and compacts. The log shrinks; no event action is ever added.
//!
//! All passes share one skeleton: scan windows of adjacent commands, flip
//! the kind of doomed commands to [`CommandKind::Deleted`], then run a
//! single forward-scan compaction per event action.

pub mod actionlog;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use actionlog::{ActionLog, Command, CommandKind, EventAction, StringTable};

use crate::error::{Error, Result};

/// Tuning for the passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreprocessOptions {
    /// Gate increment removal on the values actually incrementing
    /// (`v2 == v1 + 1`) instead of accepting every clean
    /// read-then-write window.
    pub require_increment: bool,
}

/// A trace with its string tables, as serialized for tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceFile {
    /// Memory-location names.
    pub vars: StringTable,
    /// Value names.
    pub values: StringTable,
    /// The command streams.
    pub log: ActionLog,
}

impl TraceFile {
    /// Reads the JSON rendition of a trace.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::Trace(e.to_string()))
    }

    /// Writes the JSON rendition of a trace.
    pub fn save(&self, path: &Path) -> Result<()> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| Error::Trace(e.to_string()))?;
        fs::write(path, text).map_err(|e| Error::io(path, e))
    }
}

/// Runs the cleanup passes over one action log.
#[derive(Debug)]
pub struct TracePreprocessor<'a> {
    log: &'a mut ActionLog,
    vars: &'a StringTable,
    values: &'a StringTable,
    options: PreprocessOptions,
}

impl<'a> TracePreprocessor<'a> {
    /// Creates a preprocessor with default options.
    pub fn new(log: &'a mut ActionLog, vars: &'a StringTable, values: &'a StringTable) -> Self {
        Self::with_options(log, vars, values, PreprocessOptions::default())
    }

    /// Creates a preprocessor with explicit options.
    pub fn with_options(
        log: &'a mut ActionLog,
        vars: &'a StringTable,
        values: &'a StringTable,
        options: PreprocessOptions,
    ) -> Self {
        Self {
            log,
            vars,
            values,
            options,
        }
    }

    /// Deletes every access to the memory location named `location`.
    /// A no-op for the empty name.
    pub fn ignore_location(&mut self, location: &str) {
        if location.is_empty() {
            return;
        }
        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            for i in 1..commands.len() {
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                if self.vars.get(commands[i - 1].location) == location {
                    commands[i - 1].kind = CommandKind::Deleted;
                    commands[i].kind = CommandKind::Deleted;
                }
            }
        }
        self.remove_empty_operations();
    }

    /// Deletes `read x:v, write x:v` windows: idempotent self-writes of a
    /// just-read value, the signature of lazy writes like
    /// `x = x || expr`.
    pub fn remove_empty_read_writes(&mut self) {
        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            for i in 3..commands.len() {
                if commands[i - 3].kind != CommandKind::ReadMemory
                    || commands[i - 2].kind != CommandKind::MemoryValue
                    || commands[i - 1].kind != CommandKind::WriteMemory
                    || commands[i].kind != CommandKind::MemoryValue
                {
                    continue;
                }
                if commands[i - 1].location != commands[i - 3].location
                    || commands[i].location != commands[i - 2].location
                {
                    continue;
                }
                for command in &mut commands[i - 3..=i] {
                    command.kind = CommandKind::Deleted;
                }
            }
        }
        self.remove_empty_operations();
    }

    /// Deletes writes that store the value the location was last seen
    /// holding, anywhere in the log so far. Reads are never deleted, but
    /// they do refresh the last-seen value.
    pub fn remove_nop_writes(&mut self) {
        let mut last_seen: BTreeMap<usize, usize> = BTreeMap::new();

        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            for i in 1..commands.len() {
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                let location = commands[i - 1].location;
                let value = commands[i].location;

                if commands[i - 1].kind == CommandKind::WriteMemory
                    && last_seen.get(&location) == Some(&value)
                {
                    commands[i - 1].kind = CommandKind::Deleted;
                    commands[i].kind = CommandKind::Deleted;
                }
                last_seen.insert(location, value);
            }
        }
        self.remove_empty_operations();
    }

    /// Deletes accesses made in the function that initialized the
    /// location, where initialization is a read followed by a write with
    /// nothing in between breaking the pattern.
    ///
    /// Scope id 0 doubles as the "not recorded yet" sentinel; a location
    /// initialized in two different scopes is poisoned (-1) and kept.
    pub fn remove_updates_in_same_method(&mut self) {
        let mut init_scope: BTreeMap<usize, i64> = BTreeMap::new();

        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            let mut scope: Vec<usize> = Vec::new();
            // Per event action: 0 untouched, 1 read seen, 2 initialized,
            // -1 pattern broken.
            let mut state: BTreeMap<usize, i8> = BTreeMap::new();

            for i in 1..commands.len() {
                match commands[i - 1].kind {
                    CommandKind::EnterScope => {
                        scope.push(commands[i - 1].location);
                        continue;
                    }
                    CommandKind::ExitScope => {
                        scope.pop();
                        continue;
                    }
                    _ => {}
                }
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                let location = commands[i - 1].location;

                if let (Some(&init), Some(&current)) = (init_scope.get(&location), scope.last()) {
                    if init == current as i64 {
                        commands[i - 1].kind = CommandKind::Deleted;
                        commands[i].kind = CommandKind::Deleted;
                        continue;
                    }
                }

                if commands[i - 1].kind == CommandKind::ReadMemory {
                    let entry = state.entry(location).or_insert(0);
                    if *entry != 0 {
                        *entry = -1;
                        continue;
                    }
                    *entry = 1;
                }
                if commands[i - 1].kind == CommandKind::WriteMemory {
                    let entry = state.entry(location).or_insert(0);
                    if *entry != 1 {
                        *entry = -1;
                        continue;
                    }
                    *entry = 2;
                    let slot = init_scope.entry(location).or_insert(0);
                    match scope.last() {
                        Some(&current) if *slot == 0 => *slot = current as i64,
                        _ => *slot = -1,
                    }
                }
            }
        }
        self.remove_empty_operations();
    }

    /// Deletes object and array locations (names starting `O` or `A`)
    /// whose accesses never leak between event actions: every access run
    /// begins with a write, and no read sees a value from another event
    /// action.
    pub fn remove_global_locals(&mut self) {
        // Last event action to access each location, or -1 once a read
        // disqualified it.
        let mut last_accessor: BTreeMap<usize, i64> = BTreeMap::new();

        for (op_id, action) in self.log.actions.iter().enumerate() {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &action.commands;
            for i in 1..commands.len() {
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                let location = commands[i - 1].location;
                let name = self.vars.get(location);
                if !name.starts_with('O') && !name.starts_with('A') {
                    continue;
                }

                if commands[i - 1].kind == CommandKind::ReadMemory
                    && last_accessor.get(&location) != Some(&(op_id as i64))
                {
                    // Read of an uninitialized value, or of a value
                    // written by another event action.
                    last_accessor.insert(location, -1);
                } else {
                    last_accessor.insert(location, op_id as i64);
                }
            }
        }

        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            for i in 1..commands.len() {
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                if let Some(&mark) = last_accessor.get(&commands[i - 1].location) {
                    if mark != -1 {
                        commands[i - 1].kind = CommandKind::Deleted;
                        commands[i].kind = CommandKind::Deleted;
                    }
                }
            }
        }
        self.remove_empty_operations();
    }

    /// Deletes object, array, and activation-object locations (names
    /// starting `O`, `A`, or `J`) whose every read is immediately
    /// followed by a write of the same location: the shape `x++` leaves
    /// behind, which commutes across event actions.
    ///
    /// With [`PreprocessOptions::require_increment`] the values must
    /// actually increment; by default any clean read-then-write window
    /// qualifies. Values that fail to parse compare as 0.
    pub fn remove_pure_incrementation(&mut self) {
        let mut removable: BTreeMap<usize, bool> = BTreeMap::new();

        for action in &self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &action.commands;
            for i in 1..commands.len() {
                if commands[i - 1].kind != CommandKind::ReadMemory
                    || commands[i].kind != CommandKind::MemoryValue
                {
                    continue;
                }
                let location = commands[i - 1].location;

                if i + 2 >= commands.len() {
                    // A read with no room for the write behind it.
                    removable.insert(location, false);
                    continue;
                }
                if commands[i + 1].kind != CommandKind::WriteMemory
                    || commands[i + 2].kind != CommandKind::MemoryValue
                    || commands[i + 1].location != location
                {
                    removable.insert(location, false);
                    continue;
                }

                let name = self.vars.get(location);
                if !name.starts_with('O') && !name.starts_with('A') && !name.starts_with('J') {
                    continue;
                }

                removable.entry(location).or_insert(true);

                if self.options.require_increment && removable.get(&location) == Some(&true) {
                    let before = parse_value(self.values.get(commands[i].location));
                    let after = parse_value(self.values.get(commands[i + 2].location));
                    removable.insert(location, before == after.wrapping_sub(1));
                }
            }
        }

        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            for i in 1..commands.len() {
                if !commands[i - 1].is_access() || commands[i].kind != CommandKind::MemoryValue {
                    continue;
                }
                if removable.get(&commands[i - 1].location) == Some(&true) {
                    commands[i - 1].kind = CommandKind::Deleted;
                    commands[i].kind = CommandKind::Deleted;
                }
            }
        }
        self.remove_empty_operations();
    }

    /// Compacts every event action, dropping marked commands while
    /// preserving the order of survivors. Already-empty event actions
    /// are left untouched.
    fn remove_empty_operations(&mut self) {
        for action in &mut self.log.actions {
            if action.commands.is_empty() {
                continue;
            }
            let commands = &mut action.commands;
            let mut keep = 0;
            for i in 0..commands.len() {
                if i != keep {
                    commands[keep] = commands[i];
                }
                if commands[keep].kind != CommandKind::Deleted {
                    keep += 1;
                }
            }
            commands.truncate(keep);
        }
    }
}

fn parse_value(text: &str) -> i64 {
    text.trim().parse().unwrap_or(0)
}
