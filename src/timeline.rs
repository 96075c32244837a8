use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Tick};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A scheduled occurrence targeted at a named entity.
///
/// Events are immutable once scheduled: the timeline stores them verbatim
/// and hands them back, exactly once, when their tick is drained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Name of the entity that scheduled the event, or `None` for events
    /// seeded from outside the simulation.
    #[serde(default)]
    pub emitter: Option<String>,

    /// Event name, interpreted by the target entity.
    pub name: String,

    /// Name of the entity the event is dispatched to.
    pub target: String,

    /// Number of ticks between scheduling and dispatch. Must not be
    /// negative.
    pub delay: i64,

    /// Additional event payload, dispatched along with the name.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Owner of the event queue and the current-tick counter.
///
/// Events are bucketed by absolute tick; buckets are created lazily on the
/// first schedule and removed once fully drained. The timeline also maps
/// ticks to wall-clock timestamps through a linear scale.
pub struct Timeline {
    events: HashMap<Tick, VecDeque<Event>>,
    current: Tick,
    start_date: SystemTime,
    scale: Duration,
}

impl Timeline {
    /// Creates an empty timeline positioned at `start`, with tick `start`
    /// mapping to `start_date` and every tick lasting `scale`.
    #[must_use]
    pub fn new(start_date: SystemTime, start: Tick, scale: Duration) -> Self {
        Self {
            events: HashMap::new(),
            current: start,
            start_date,
            scale,
        }
    }

    /// The tick the timeline is currently positioned at.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.current
    }

    /// Wall-clock timestamp corresponding to `tick`:
    /// `start_date + tick * scale`.
    #[must_use]
    pub fn timestamp_for(&self, tick: Tick) -> SystemTime {
        self.start_date + scale_ticks(self.scale, tick.into())
    }

    /// Wall-clock timestamp of the current tick.
    #[must_use]
    pub fn current_timestamp(&self) -> SystemTime {
        self.timestamp_for(self.current)
    }

    /// Number of events still waiting in the queue, across all ticks.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.events.values().map(VecDeque::len).sum()
    }

    /// Appends `event` to the bucket at `current + event.delay`,
    /// preserving call order within the bucket.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidDelay`] when `event.delay` is negative;
    /// the queue is not modified in that case.
    pub fn schedule(&mut self, event: Event) -> Result<(), Error> {
        let delay = u64::try_from(event.delay).map_err(|_| Error::InvalidDelay {
            name: event.name.clone(),
            delay: event.delay,
        })?;
        let tick = self.current.offset(delay);
        log::debug!(
            "scheduling `{}` for `{}` at tick {}",
            event.name,
            event.target,
            tick
        );
        self.events.entry(tick).or_default().push_back(event);
        Ok(())
    }

    /// Removes and returns the next event due at the current tick, or
    /// `None` once the current tick's bucket is gone.
    ///
    /// Events scheduled with zero delay while a drain is in progress land
    /// back in the current tick's bucket and are returned before the drain
    /// terminates.
    pub fn next_due(&mut self) -> Option<Event> {
        let bucket = self.events.get_mut(&self.current)?;
        let event = bucket.pop_front();
        if bucket.is_empty() {
            self.events.remove(&self.current);
        }
        event
    }

    /// Lazy sequence of all events due at the current tick, in FIFO order,
    /// including events scheduled into this same tick mid-drain.
    ///
    /// An entity that perpetually reschedules zero-delay events keeps the
    /// current bucket open and the sequence never terminates.
    pub fn drain_current(&mut self) -> DrainCurrent<'_> {
        DrainCurrent { timeline: self }
    }

    /// Moves the timeline to the next tick. Called exactly once per tick,
    /// after the current tick has been fully drained.
    pub fn advance(&mut self) {
        self.current = self.current.next();
    }
}

/// Iterator over the events due at the timeline's current tick.
///
/// Returned by [`Timeline::drain_current`].
pub struct DrainCurrent<'a> {
    timeline: &'a mut Timeline,
}

impl Iterator for DrainCurrent<'_> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.timeline.next_due()
    }
}

/// Multiplies `scale` by a tick count using integer nanosecond arithmetic,
/// so that tick-to-timestamp mapping is exact.
fn scale_ticks(scale: Duration, ticks: u64) -> Duration {
    let nanos = scale.as_nanos().saturating_mul(u128::from(ticks));
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    let subsec = u32::try_from(nanos % NANOS_PER_SEC).unwrap_or(0);
    Duration::new(secs, subsec)
}

#[cfg(test)]
mod test {
    use super::*;

    use std::time::UNIX_EPOCH;

    use quickcheck_macros::quickcheck;
    use rstest::{fixture, rstest};

    fn event(name: &str, delay: i64) -> Event {
        Event {
            emitter: None,
            name: name.to_string(),
            target: String::from("target"),
            delay,
            args: Vec::new(),
        }
    }

    #[fixture]
    fn timeline() -> Timeline {
        Timeline::new(UNIX_EPOCH, Tick::from(0), Duration::from_secs(1))
    }

    #[rstest]
    fn test_drain_preserves_fifo_order(mut timeline: Timeline) {
        timeline.schedule(event("a", 0)).unwrap();
        timeline.schedule(event("b", 0)).unwrap();
        timeline.schedule(event("later", 1)).unwrap();
        let drained: Vec<_> = timeline.drain_current().map(|e| e.name).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert_eq!(timeline.remaining(), 1);
    }

    #[rstest]
    fn test_negative_delay_is_rejected_without_mutation(mut timeline: Timeline) {
        let err = timeline.schedule(event("bad", -1)).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidDelay {
                name: String::from("bad"),
                delay: -1,
            }
        );
        assert_eq!(timeline.remaining(), 0);
        assert!(timeline.next_due().is_none());
    }

    #[rstest]
    fn test_drain_picks_up_events_scheduled_mid_drain(mut timeline: Timeline) {
        timeline.schedule(event("first", 0)).unwrap();
        assert_eq!(timeline.next_due().unwrap().name, "first");
        timeline.schedule(event("chained", 0)).unwrap();
        assert_eq!(timeline.next_due().unwrap().name, "chained");
        assert!(timeline.next_due().is_none());
    }

    #[rstest]
    fn test_advance_moves_to_the_next_bucket(mut timeline: Timeline) {
        timeline.schedule(event("tomorrow", 1)).unwrap();
        assert!(timeline.next_due().is_none());
        timeline.advance();
        assert_eq!(timeline.current_tick(), Tick::from(1));
        assert_eq!(timeline.next_due().unwrap().name, "tomorrow");
        assert_eq!(timeline.remaining(), 0);
    }

    #[rstest]
    fn test_delay_is_relative_to_the_current_tick(mut timeline: Timeline) {
        timeline.advance();
        timeline.advance();
        timeline.schedule(event("soon", 1)).unwrap();
        timeline.advance();
        assert_eq!(timeline.current_tick(), Tick::from(3));
        assert_eq!(timeline.next_due().unwrap().name, "soon");
    }

    #[test]
    fn test_timestamp_with_subsecond_scale() {
        let timeline = Timeline::new(UNIX_EPOCH, Tick::from(0), Duration::from_millis(1500));
        assert_eq!(timeline.timestamp_for(Tick::from(0)), UNIX_EPOCH);
        assert_eq!(
            timeline.timestamp_for(Tick::from(4)),
            UNIX_EPOCH + Duration::from_secs(6)
        );
    }

    #[quickcheck]
    fn timestamp_is_linear_in_tick(tick: u32, scale_millis: u16) -> bool {
        let scale = Duration::from_millis(u64::from(scale_millis));
        let timeline = Timeline::new(UNIX_EPOCH, Tick::from(0), scale);
        timeline.timestamp_for(Tick::from(u64::from(tick))) == UNIX_EPOCH + scale * tick
    }
}
