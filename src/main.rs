//! Room occupancy simulation demo.
//!
//! A `people` entity seeds arrivals at seeded-random ticks; a `room`
//! entity admits them up to its capacity, keeps each occupant for a fixed
//! stay, and asks latecomers to retry on the next tick.

#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::convert::TryFrom;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use clap::Clap;
use eyre::WrapErr;
use rand::Rng;
use rand_chacha::{rand_core::SeedableRng, ChaChaRng};
use serde_json::{json, Value};

use tickline::{Entity, Event, EventScheduler, Simulation, Tick};

/// Runs the room occupancy simulation.
#[derive(Clap)]
#[clap(version)]
struct Opt {
    /// Start date of the simulated clock in RFC 3339 format; defaults to
    /// the current time.
    #[clap(long)]
    start_date: Option<String>,

    /// Number of ticks to simulate.
    #[clap(long, default_value = "20")]
    ticks: u64,

    /// Simulated seconds represented by one tick.
    #[clap(long, default_value = "1")]
    scale: u64,

    /// Room capacity.
    #[clap(long, default_value = "2")]
    capacity: usize,

    /// Number of ticks an admitted person stays in the room.
    #[clap(long, default_value = "3")]
    stay: i64,

    /// Number of people arriving at the room.
    #[clap(long, default_value = "4")]
    people: usize,

    /// Width of the arrival window in ticks.
    #[clap(long, default_value = "8")]
    window: i64,

    /// Seed for the arrival time generator.
    #[clap(long, default_value = "17")]
    seed: u64,

    /// Path to a JSON file with extra events to seed before the run.
    #[clap(long)]
    events: Option<PathBuf>,

    /// Write markers to this file, one JSON object per line.
    #[clap(long)]
    output: Option<PathBuf>,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs in this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,
}

/// Resolved demo configuration.
struct DemoConfig {
    start_date: SystemTime,
    ticks: u64,
    scale: Duration,
    capacity: usize,
    stay: i64,
    people: usize,
    window: i64,
    seed: u64,
    events: Vec<Event>,
    output: Option<PathBuf>,
}

impl TryFrom<Opt> for DemoConfig {
    type Error = eyre::Error;
    fn try_from(opt: Opt) -> eyre::Result<Self> {
        if opt.window <= 0 {
            return Err(eyre::eyre!("arrival window must be positive"));
        }
        let start_date = match &opt.start_date {
            Some(date) => {
                humantime::parse_rfc3339_weak(date).wrap_err("unable to parse start date")?
            }
            None => SystemTime::now(),
        };
        let events = match &opt.events {
            Some(path) => read_events(path)?,
            None => Vec::new(),
        };
        Ok(Self {
            start_date,
            ticks: opt.ticks,
            scale: Duration::from_secs(opt.scale),
            capacity: opt.capacity,
            stay: opt.stay,
            people: opt.people,
            window: opt.window,
            seed: opt.seed,
            events,
            output: opt.output,
        })
    }
}

impl DemoConfig {
    fn run(self) -> eyre::Result<()> {
        let entities: Vec<Box<dyn Entity>> = vec![
            Box::new(Room {
                name: String::from("room"),
                capacity: self.capacity,
                stay: self.stay,
                occupants: 0,
            }),
            Box::new(People {
                name: String::from("people"),
                room: String::from("room"),
                count: self.people,
                window: self.window,
                seed: self.seed,
            }),
        ];
        let mut sim = Simulation::starting_at(
            entities,
            self.start_date,
            Tick::from(0),
            Tick::from(self.ticks),
            self.scale,
        )?;
        for event in self.events {
            sim.schedule_event(&event.name, &event.target, event.args, event.delay)?;
        }
        sim.prepare().wrap_err("failed to prepare the simulation")?;

        let mut output = match &self.output {
            Some(path) => Some(File::create(path).wrap_err_with(|| {
                format!("unable to create output file: {}", path.display())
            })?),
            None => None,
        };
        for marker in sim.run() {
            log::info!("{}", marker);
            if let Some(file) = output.as_mut() {
                serde_json::to_writer(&mut *file, &marker)?;
                writeln!(file)?;
            }
        }

        let stats = sim.dispatch_log();
        log::info!(
            "dispatched {} events ({} dropped, {} handler failures); {} still queued",
            stats.dispatched(),
            stats.unknown_target(),
            stats.handler_failures(),
            sim.remaining()
        );
        Ok(())
    }
}

/// A room with a finite capacity. Admitted people stay for a fixed number
/// of ticks; arrivals at a full room retry on the next tick.
struct Room {
    name: String,
    capacity: usize,
    stay: i64,
    occupants: usize,
}

impl Entity for Room {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _scheduler: &mut EventScheduler<'_>) -> bool {
        log::info!("{}: opening with capacity {}", self.name, self.capacity);
        true
    }

    fn handle(
        &mut self,
        event: &str,
        args: &[Value],
        tick: Tick,
        scheduler: &mut EventScheduler<'_>,
    ) -> bool {
        match event {
            "enter" => {
                if self.occupants < self.capacity {
                    self.occupants += 1;
                    log::info!(
                        "tick {}: {} entered {} ({}/{})",
                        tick,
                        person(args),
                        self.name,
                        self.occupants,
                        self.capacity
                    );
                    scheduler
                        .schedule("leave", &self.name, args.to_vec(), self.stay)
                        .is_ok()
                } else {
                    log::info!(
                        "tick {}: {} found {} full, retrying next tick",
                        tick,
                        person(args),
                        self.name
                    );
                    scheduler
                        .schedule("enter", &self.name, args.to_vec(), 1)
                        .is_ok()
                }
            }
            "leave" => {
                self.occupants = self.occupants.saturating_sub(1);
                log::info!(
                    "tick {}: {} left {} ({}/{})",
                    tick,
                    person(args),
                    self.name,
                    self.occupants,
                    self.capacity
                );
                true
            }
            other => {
                log::warn!("{}: unexpected event `{}`", self.name, other);
                false
            }
        }
    }
}

/// Seeds one `enter` event per person at a random tick within the arrival
/// window. Never a dispatch target itself.
struct People {
    name: String,
    room: String,
    count: usize,
    window: i64,
    seed: u64,
}

impl Entity for People {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, scheduler: &mut EventScheduler<'_>) -> bool {
        let mut rng = ChaChaRng::seed_from_u64(self.seed);
        for person in 0..self.count {
            let delay = rng.gen_range(0..self.window);
            let args = vec![json!({ "person": format!("person-{}", person) })];
            if scheduler.schedule("enter", &self.room, args, delay).is_err() {
                return false;
            }
        }
        true
    }

    fn handle(
        &mut self,
        event: &str,
        _args: &[Value],
        _tick: Tick,
        _scheduler: &mut EventScheduler<'_>,
    ) -> bool {
        log::warn!("{}: does not handle events, got `{}`", self.name, event);
        false
    }
}

fn person(args: &[Value]) -> &str {
    args.first()
        .and_then(|arg| arg.get("person"))
        .and_then(Value::as_str)
        .unwrap_or("someone")
}

/// Reads the list of initial events passed as an input file, encoded as a
/// stream of JSON objects.
fn read_events(path: &Path) -> eyre::Result<Vec<Event>> {
    let file = File::open(path)
        .wrap_err_with(|| format!("unable to open events file: {}", path.display()))?;
    serde_json::Deserializer::from_reader(file)
        .into_iter()
        .collect::<Result<Vec<Event>, _>>()
        .wrap_err("unable to parse events file")
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Debug,
        level if level >= 2 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        let _ = std::fs::remove_file(path);
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(false)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    let conf = DemoConfig::try_from(opt)?;
    conf.run()
}
