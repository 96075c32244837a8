//! Tick-based discrete-event simulation engine.
//!
//! Named entities register time-delayed events on a shared [`Timeline`];
//! the [`Simulation`] driver advances simulated time tick by tick,
//! dispatching each tick's due events to their target entities and
//! yielding one [`Marker`] per completed tick.

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

mod timeline;
pub use timeline::{DrainCurrent, Event, Timeline};

mod entity;
pub use entity::{Entity, EventScheduler};

mod simulation;
pub use simulation::{DispatchLog, Marker, Run, Simulation, StopHandle};

/// Discrete unit of simulated time. Non-negative, strictly increasing over
/// the course of a run.
#[derive(
    From,
    Into,
    Debug,
    PartialEq,
    PartialOrd,
    Eq,
    Ord,
    Serialize,
    Deserialize,
    Copy,
    Clone,
    Hash,
    Display,
    Default,
)]
pub struct Tick(u64);

impl Tick {
    /// The tick immediately following this one.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub(crate) fn offset(self, delay: u64) -> Self {
        Self(self.0 + delay)
    }
}

/// Errors reported by the engine.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An event was scheduled with a negative delay. The queue is left
    /// untouched.
    #[error("cannot schedule event `{name}` with negative delay {delay}")]
    InvalidDelay {
        /// Name of the rejected event.
        name: String,
        /// The offending delay.
        delay: i64,
    },

    /// Two entities were registered under the same dispatch name.
    #[error("duplicate entity name: `{0}`")]
    DuplicateEntity(String),

    /// An entity reported a failed initialization; entities registered
    /// after it are left uninitialized and the run loop must not be
    /// entered.
    #[error("entity `{0}` failed to initialize")]
    Initialization(String),

    /// The end date of a simulation precedes its start date.
    #[error("end date precedes start date")]
    InvalidSpan,

    /// The tick scale must be a positive duration.
    #[error("tick scale must be a positive duration")]
    InvalidScale,
}
