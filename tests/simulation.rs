//! End-to-end driver tests: preparation, marker emission, seeded events,
//! and cooperative stopping.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, UNIX_EPOCH};

use serde_json::{json, Value};

use tickline::{Entity, EventScheduler, Simulation, Tick};

type Handled = Rc<RefCell<Vec<(String, Vec<Value>, u64)>>>;

/// Records every call it receives.
struct Probe {
    name: String,
    initialized: Rc<RefCell<usize>>,
    handled: Handled,
}

impl Probe {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            initialized: Rc::new(RefCell::new(0)),
            handled: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Entity for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _scheduler: &mut EventScheduler<'_>) -> bool {
        *self.initialized.borrow_mut() += 1;
        true
    }

    fn handle(
        &mut self,
        event: &str,
        args: &[Value],
        tick: Tick,
        _scheduler: &mut EventScheduler<'_>,
    ) -> bool {
        self.handled
            .borrow_mut()
            .push((event.to_string(), args.to_vec(), tick.into()));
        true
    }
}

fn simulation_with_probe(end: u64) -> (Simulation, Rc<RefCell<usize>>, Handled) {
    let probe = Probe::new("probe");
    let initialized = Rc::clone(&probe.initialized);
    let handled = Rc::clone(&probe.handled);
    let sim = Simulation::new(
        vec![Box::new(probe) as Box<dyn Entity>],
        Tick::from(0),
        Tick::from(end),
        Duration::from_secs(1),
    )
    .unwrap();
    (sim, initialized, handled)
}

#[test]
fn preparing_initializes_every_entity_exactly_once() {
    let (mut sim, initialized, _) = simulation_with_probe(10);
    sim.prepare().unwrap();
    assert_eq!(*initialized.borrow(), 1);
}

#[test]
fn an_empty_run_emits_one_marker_per_tick_and_no_dispatches() {
    let (mut sim, _, handled) = simulation_with_probe(10);
    sim.prepare().unwrap();
    let ticks: Vec<u64> = sim.run().map(|marker| marker.tick.into()).collect();
    assert_eq!(ticks, (1..=10).collect::<Vec<u64>>());
    assert!(handled.borrow().is_empty());
    assert_eq!(sim.dispatch_log().dispatched(), 0);
}

#[test]
fn a_seeded_event_is_dispatched_at_its_tick_with_arguments_intact() {
    let (mut sim, _, handled) = simulation_with_probe(10);
    sim.prepare().unwrap();
    let args = vec![json!({ "who": "alice" })];
    sim.schedule_event("greet", "probe", args.clone(), 1).unwrap();
    assert_eq!(sim.run().count(), 10);
    assert_eq!(*handled.borrow(), vec![(String::from("greet"), args, 1)]);
}

#[test]
fn requesting_a_stop_halts_the_run_after_the_current_tick() {
    let (mut sim, _, _) = simulation_with_probe(10);
    sim.prepare().unwrap();
    let stop = sim.stop_handle();
    let mut seen = Vec::new();
    for marker in sim.run() {
        seen.push(u64::from(marker.tick));
        if seen.len() == 5 {
            stop.request_stop();
        }
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
}

#[test]
fn a_date_pair_derives_the_end_tick_through_the_scale() {
    let start = UNIX_EPOCH + Duration::from_secs(1_577_836_800);
    let end = start + Duration::from_secs(10);
    let mut sim =
        Simulation::between(Vec::new(), start, end, Duration::from_secs(1)).unwrap();
    let markers: Vec<_> = sim.run().collect();
    assert_eq!(markers.len(), 10);
    assert_eq!(markers[0].timestamp, start + Duration::from_secs(1));
    assert_eq!(
        markers.last().unwrap().timestamp,
        start + Duration::from_secs(10)
    );
}
