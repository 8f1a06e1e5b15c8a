//! Racelab: stateless model checking for event-driven programs.
//!
//! # Overview
//!
//! Racelab drives an external replay runtime through alternative event
//! schedules to surface behaviors that depend on scheduling order. Given a
//! recorded execution and the races an external detector found in it, the
//! explorer repeatedly reverses a racing event pair, re-executes the
//! application under the reordered schedule, and feeds the new execution
//! back into the search.
//!
//! The concurrency model is event dispatch: single-threaded, run-to-
//! completion event actions. A *schedule* is the order in which event
//! actions fire; reversing a race means constructing a schedule in which
//! the later event of the pair fires first while every event causally
//! downstream of the earlier one stays behind it.
//!
//! # Module structure
//!
//! - [`schedule`]: schedule files (event id + opaque action payload per
//!   line), marker handling, load/save
//! - [`detect`]: interfaces consumed from the external race detector
//!   (races, happens-before graph)
//! - [`reorder`]: race-driven schedule reversal
//! - [`wave`]: coverage-oriented random pairwise reversal
//! - [`explore`]: the Event-After-Trace exploration engine
//! - [`replay`]: the external replay command invoker
//! - [`preprocess`]: peephole cleanup of recorded command streams before
//!   race detection
//! - [`error`](mod@error): crate error type
//!
//! Race detection itself and the replay runtime are external systems;
//! racelab consumes their outputs and orchestrates re-execution.

pub mod detect;
pub mod error;
pub mod explore;
pub mod preprocess;
pub mod reorder;
pub mod replay;
pub mod schedule;
pub mod wave;

pub use detect::{EventDag, EventGraph, RaceId, RaceInfo, RaceReport, RaceSource};
pub use error::{Error, Result};
pub use explore::{ExploreConfig, ExploreReport, Explorer};
pub use reorder::{ReorderOptions, ReorderedSchedule};
pub use replay::{Replayer, RunArtifacts, RunRequest};
pub use schedule::{EventId, ScheduleEntry, ScheduleStore};
