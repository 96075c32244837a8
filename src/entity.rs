use serde_json::Value;

use crate::{Error, Event, Tick, Timeline};

/// Narrow scheduling handle passed into every entity call.
///
/// Entities never hold a reference to the [`Timeline`] or the simulation;
/// all they can do through this handle is schedule further events on
/// behalf of their own name.
pub struct EventScheduler<'a> {
    pub(crate) timeline: &'a mut Timeline,
    pub(crate) emitter: &'a str,
}

impl EventScheduler<'_> {
    /// Schedules `event` for `target`, carrying `args`, to be dispatched
    /// `delay` ticks from now. A delay of zero dispatches within the tick
    /// currently being drained.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidDelay`] when `delay` is negative.
    pub fn schedule(
        &mut self,
        event: &str,
        target: &str,
        args: Vec<Value>,
        delay: i64,
    ) -> Result<(), Error> {
        self.timeline.schedule(Event {
            emitter: Some(self.emitter.to_string()),
            name: event.to_string(),
            target: target.to_string(),
            delay,
            args,
        })
    }

    /// The tick the simulation is currently at.
    #[must_use]
    pub fn tick(&self) -> Tick {
        self.timeline.current_tick()
    }
}

/// A named simulation participant, the unit of event dispatch.
pub trait Entity {
    /// Name used as the dispatch key. Unique within one simulation.
    fn name(&self) -> &str;

    /// One-time setup, called before the run loop starts. May schedule
    /// events. Returning `false` reports a failed initialization, which
    /// blocks the run.
    fn initialize(&mut self, scheduler: &mut EventScheduler<'_>) -> bool;

    /// Reacts to one event dispatched to this entity at `tick`. May
    /// schedule further events, including zero-delay ones back into the
    /// tick currently being drained. The return value is advisory: a
    /// `false` is logged and counted but does not halt the run.
    fn handle(
        &mut self,
        event: &str,
        args: &[Value],
        tick: Tick,
        scheduler: &mut EventScheduler<'_>,
    ) -> bool;
}
