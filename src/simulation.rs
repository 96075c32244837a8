use std::cell::Cell;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, SystemTime};

use delegate::delegate;
use serde::Serialize;
use serde_json::Value;

use crate::{Entity, Error, Event, EventScheduler, Tick, Timeline};

/// Output of one fully-processed tick: the tick the simulation has reached
/// and its wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Marker {
    /// The tick reached after draining the previous one.
    pub tick: Tick,
    /// Wall-clock timestamp of `tick`.
    pub timestamp: SystemTime,
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {} at {}",
            self.tick,
            humantime::format_rfc3339_seconds(self.timestamp)
        )
    }
}

/// Counters describing what happened to events during a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLog {
    dispatched: usize,
    unknown_target: usize,
    handler_failures: usize,
}

impl DispatchLog {
    /// Number of events routed to a registered entity.
    #[must_use]
    pub fn dispatched(self) -> usize {
        self.dispatched
    }

    /// Number of events dropped because no entity matched their target
    /// name.
    #[must_use]
    pub fn unknown_target(self) -> usize {
        self.unknown_target
    }

    /// Number of dispatched events whose handler returned `false`.
    #[must_use]
    pub fn handler_failures(self) -> usize {
        self.handler_failures
    }
}

/// Cloneable handle requesting cooperative termination of a run.
///
/// The flag is checked once per tick boundary: a tick already in progress
/// always completes, the next one is never started.
#[derive(Clone)]
pub struct StopHandle {
    flag: Rc<Cell<bool>>,
}

impl StopHandle {
    /// Asks the simulation to stop before processing its next tick.
    pub fn request_stop(&self) {
        self.flag.set(true);
    }
}

/// Drives a [`Timeline`] and a set of named entities from a start tick to
/// an end tick, dispatching each tick's due events and yielding one
/// [`Marker`] per completed tick.
pub struct Simulation {
    timeline: Timeline,
    entities: Vec<Box<dyn Entity>>,
    index: HashMap<String, usize>,
    end: Tick,
    stop: Rc<Cell<bool>>,
    log: DispatchLog,
}

impl Simulation {
    /// Creates a simulation over `entities` running from tick `start` to
    /// tick `end`, with tick `start` anchored at the current wall-clock
    /// time and every tick lasting `scale`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateEntity`] when two entities share a
    /// name.
    pub fn new(
        entities: Vec<Box<dyn Entity>>,
        start: Tick,
        end: Tick,
        scale: Duration,
    ) -> Result<Self, Error> {
        Self::starting_at(entities, SystemTime::now(), start, end, scale)
    }

    /// Creates a simulation spanning the given date pair: tick 0 is
    /// anchored at `start_date` and the end tick is the number of whole
    /// `scale` intervals between the two dates.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidScale`] when `scale` is zero, with
    /// [`Error::InvalidSpan`] when `end_date` precedes `start_date`, and
    /// with [`Error::DuplicateEntity`] when two entities share a name.
    pub fn between(
        entities: Vec<Box<dyn Entity>>,
        start_date: SystemTime,
        end_date: SystemTime,
        scale: Duration,
    ) -> Result<Self, Error> {
        if scale.as_nanos() == 0 {
            return Err(Error::InvalidScale);
        }
        let span = end_date
            .duration_since(start_date)
            .map_err(|_| Error::InvalidSpan)?;
        let end =
            u64::try_from(span.as_nanos() / scale.as_nanos()).map_err(|_| Error::InvalidSpan)?;
        Self::starting_at(entities, start_date, Tick::from(0), Tick::from(end), scale)
    }

    /// Creates a simulation with an explicit wall-clock anchor for the
    /// start tick.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateEntity`] when two entities share a
    /// name.
    pub fn starting_at(
        entities: Vec<Box<dyn Entity>>,
        start_date: SystemTime,
        start: Tick,
        end: Tick,
        scale: Duration,
    ) -> Result<Self, Error> {
        let mut index = HashMap::with_capacity(entities.len());
        for (position, entity) in entities.iter().enumerate() {
            if index.insert(entity.name().to_string(), position).is_some() {
                return Err(Error::DuplicateEntity(entity.name().to_string()));
            }
        }
        Ok(Self {
            timeline: Timeline::new(start_date, start, scale),
            entities,
            index,
            end,
            stop: Rc::new(Cell::new(false)),
            log: DispatchLog::default(),
        })
    }

    delegate! {
        to self.timeline {
            /// The tick the simulation is currently at.
            #[must_use]
            pub fn current_tick(&self) -> Tick;

            /// Wall-clock timestamp corresponding to `tick`.
            #[must_use]
            pub fn timestamp_for(&self, tick: Tick) -> SystemTime;

            /// Number of events still waiting in the queue.
            #[must_use]
            pub fn remaining(&self) -> usize;
        }
    }

    /// Counters for the run so far.
    #[must_use]
    pub fn dispatch_log(&self) -> DispatchLog {
        self.log
    }

    /// Initializes every registered entity, sequentially and in
    /// registration order, handing each a scheduling handle bound to its
    /// own name.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::Initialization`] on the first entity
    /// returning `false`; entities registered after it are not
    /// initialized and the run loop must not be entered.
    pub fn prepare(&mut self) -> Result<(), Error> {
        for entity in &mut self.entities {
            let name = entity.name().to_string();
            log::debug!("initializing entity `{}`", name);
            let mut scheduler = EventScheduler {
                timeline: &mut self.timeline,
                emitter: &name,
            };
            if !entity.initialize(&mut scheduler) {
                log::warn!("entity `{}` failed to initialize", name);
                return Err(Error::Initialization(name));
            }
        }
        Ok(())
    }

    /// Seeds an event from outside the simulation, before or during a run.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidDelay`] when `delay` is negative.
    pub fn schedule_event(
        &mut self,
        event: &str,
        target: &str,
        args: Vec<Value>,
        delay: i64,
    ) -> Result<(), Error> {
        self.timeline.schedule(Event {
            emitter: None,
            name: event.to_string(),
            target: target.to_string(),
            delay,
            args,
        })
    }

    /// Asks the simulation to stop before processing its next tick. The
    /// tick currently in progress always completes.
    pub fn request_stop(&self) {
        self.stop.set(true);
    }

    /// A cloneable stop handle usable while [`Simulation::run`] holds the
    /// simulation borrowed.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Rc::clone(&self.stop),
        }
    }

    /// Processes one tick: drains every due event (including zero-delay
    /// events scheduled mid-drain), dispatches each to its target entity,
    /// then advances the tick counter.
    ///
    /// Returns `None`, without processing anything, once the end tick has
    /// been reached or a stop was requested.
    pub fn step(&mut self) -> Option<Marker> {
        if self.stop.get() || self.timeline.current_tick() >= self.end {
            return None;
        }
        while let Some(event) = self.timeline.next_due() {
            self.dispatch(event);
        }
        self.timeline.advance();
        Some(Marker {
            tick: self.timeline.current_tick(),
            timestamp: self.timeline.current_timestamp(),
        })
    }

    /// Lazy sequence of [`Marker`]s, one per processed tick, bounded by
    /// the end tick unless stopped earlier.
    pub fn run(&mut self) -> Run<'_> {
        Run { simulation: self }
    }

    fn dispatch(&mut self, event: Event) {
        let tick = self.timeline.current_tick();
        if let Some(&position) = self.index.get(&event.target) {
            log::trace!(
                "tick {}: dispatching `{}` to `{}`",
                tick,
                event.name,
                event.target
            );
            let entity = &mut self.entities[position];
            let mut scheduler = EventScheduler {
                timeline: &mut self.timeline,
                emitter: &event.target,
            };
            let handled = entity.handle(&event.name, &event.args, tick, &mut scheduler);
            self.log.dispatched += 1;
            if !handled {
                self.log.handler_failures += 1;
                log::warn!(
                    "tick {}: entity `{}` failed to handle `{}`",
                    tick,
                    event.target,
                    event.name
                );
            }
        } else {
            self.log.unknown_target += 1;
            log::warn!(
                "tick {}: dropping `{}`: no entity named `{}`",
                tick,
                event.name,
                event.target
            );
        }
    }
}

/// Iterator over the markers of a running simulation.
///
/// Returned by [`Simulation::run`]; each pull processes one full tick.
pub struct Run<'a> {
    simulation: &'a mut Simulation,
}

impl Iterator for Run<'_> {
    type Item = Marker;

    fn next(&mut self) -> Option<Marker> {
        self.simulation.step()
    }
}
