//! Schedule files: ordered event actions plus their replay payloads.
//!
//! A schedule file has one line per event action, `<id>;<payload>`, where
//! the payload is an opaque byte string the replay runtime needs to
//! re-dispatch the action. Two marker lines may appear between events:
//! `<change>` warns the runtime that non-determinism is expected past this
//! point, and `<relax>` tells it to stop strictly enforcing the recorded
//! order. Anything else is ignored.
//!
//! [`ScheduleStore`] keeps the payload table of one recorded execution;
//! reordered schedules borrow it (shared, immutable) to serialize
//! themselves without copying payloads around.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Identifier of an event action. Assigned densely by the replay runtime
/// in dispatch order.
pub type EventId = usize;

/// One element of an executable schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEntry {
    /// A real event action.
    Event(EventId),
    /// Non-determinism expected after this point (`<change>`).
    Change,
    /// Stop enforcing the recorded order (`<relax>`).
    Relax,
}

/// Payload table and recorded order of one schedule file.
#[derive(Debug, Default)]
pub struct ScheduleStore {
    /// Action payload per event id; empty string marks a known hole.
    actions: Vec<String>,
    /// Event ids in file order.
    schedule: Vec<EventId>,
}

impl ScheduleStore {
    /// Loads a schedule file.
    ///
    /// Lines that do not parse as `<id>;<payload>` are skipped. A
    /// duplicated event id overwrites the earlier payload.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "loading schedule");
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

        let mut store = Self::default();
        for line in text.lines() {
            let Some((id, payload)) = line.split_once(';') else {
                continue;
            };
            let Ok(event) = id.trim_start().parse::<EventId>() else {
                continue;
            };
            if event >= store.actions.len() {
                store.actions.resize(event + 1, String::new());
            }
            store.actions[event] = payload.to_string();
            store.schedule.push(event);
        }
        tracing::info!(events = store.schedule.len(), "schedule loaded");
        Ok(store)
    }

    /// The recorded strict schedule, in file order.
    #[must_use]
    pub fn schedule(&self) -> &[EventId] {
        &self.schedule
    }

    /// The recorded schedule as an executable schedule (no markers).
    #[must_use]
    pub fn executable(&self) -> Vec<ScheduleEntry> {
        self.schedule.iter().map(|&e| ScheduleEntry::Event(e)).collect()
    }

    /// The payload stored for `event`, if any.
    #[must_use]
    pub fn action(&self, event: EventId) -> Option<&str> {
        match self.actions.get(event) {
            Some(s) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    /// Writes `schedule` to `path`.
    ///
    /// Markers become `<change>` / `<relax>` lines. An event id with no
    /// stored payload is a known hole and is not emitted.
    pub fn save(&self, path: &Path, schedule: &[ScheduleEntry]) -> Result<()> {
        tracing::info!(path = %path.display(), "saving schedule");
        let file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        let mut out = BufWriter::new(file);
        for entry in schedule {
            match *entry {
                ScheduleEntry::Change => writeln!(out, "<change>"),
                ScheduleEntry::Relax => writeln!(out, "<relax>"),
                ScheduleEntry::Event(event) => match self.action(event) {
                    Some(payload) => writeln!(out, "{event};{payload}"),
                    None => continue,
                },
            }
            .map_err(|e| Error::io(path, e))?;
        }
        out.flush().map_err(|e| Error::io(path, e))?;
        Ok(())
    }
}

/// Projects an executable schedule onto its strict event-id subsequence.
#[must_use]
pub fn remove_special_markers(schedule: &[ScheduleEntry]) -> Vec<EventId> {
    schedule
        .iter()
        .filter_map(|entry| match entry {
            ScheduleEntry::Event(e) => Some(*e),
            ScheduleEntry::Change | ScheduleEntry::Relax => None,
        })
        .collect()
}
