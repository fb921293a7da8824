//! Implementation of the `lockbroker simulate` command.
//!
//! Worker threads repeatedly lock a security group together with its parent
//! connector: writers through [`lock_child_and_parents`], readers through
//! [`lock_objects`]. Every worker tracks how many readers and writers are
//! inside each security group and counts any overlap the locks should have
//! prevented.

use crate::cli::SimulateArgs;
use lockbroker::config::{Config, SimulationConfig};
use lockbroker::error::{BrokerError, Result};
use lockbroker::locks::{
    HolderToken, LockMode, LockRegistry, LockSet, LockStrategy, ObjectKind, ObjectRef,
    RegistrySnapshot, lock_child_and_parents, lock_objects,
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// One in this many write iterations downgrades before releasing.
const DOWNGRADE_EVERY: u64 = 4;

/// One in this many read iterations upgrades before releasing.
const UPGRADE_EVERY: u64 = 10;

/// Outcome of a simulation run.
#[derive(Debug, Serialize)]
pub(crate) struct SimulationReport {
    pub workers: u32,
    pub objects: u32,
    pub iterations: u32,
    pub write_percent: u32,
    pub lock_sets: u64,
    pub contention_failures: u64,
    pub upgrades: u64,
    pub downgrades: u64,
    pub violations: u64,
    pub elapsed_ms: u64,
    pub final_state: RegistrySnapshot,
}

/// Execute the `lockbroker simulate` command.
pub fn cmd_simulate(args: SimulateArgs, config: &Config) -> Result<()> {
    let mut config = config.clone();
    apply_overrides(&mut config.simulation, &args);
    config.validate()?;

    let registry = Arc::new(LockRegistry::with_config(&config));
    let report = run_simulation(&registry, &config.simulation)?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).map_err(|e| {
            BrokerError::SerializationError(format!("failed to serialize simulation report: {}", e))
        })?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    if report.violations > 0 {
        return Err(BrokerError::UserError(format!(
            "{} mutual exclusion violation(s) observed",
            report.violations
        )));
    }
    Ok(())
}

fn apply_overrides(sim: &mut SimulationConfig, args: &SimulateArgs) {
    if let Some(workers) = args.workers {
        sim.workers = workers;
    }
    if let Some(objects) = args.objects {
        sim.objects = objects;
    }
    if let Some(iterations) = args.iterations {
        sim.iterations = iterations;
    }
    if let Some(write_percent) = args.write_percent {
        sim.write_percent = write_percent;
    }
}

fn print_report(report: &SimulationReport) {
    println!("Simulation Report");
    println!("=================");
    println!();
    println!("  Workers:              {:>8}", report.workers);
    println!("  Objects:              {:>8}", report.objects);
    println!("  Iterations/worker:    {:>8}", report.iterations);
    println!("  Write share:          {:>7}%", report.write_percent);
    println!();
    println!("  Lock sets taken:      {:>8}", report.lock_sets);
    println!("  Contention failures:  {:>8}", report.contention_failures);
    println!("  Upgrades:             {:>8}", report.upgrades);
    println!("  Downgrades:           {:>8}", report.downgrades);
    println!("  Violations:           {:>8}", report.violations);
    println!("  Elapsed:              {:>6}ms", report.elapsed_ms);
    println!();
    print!("{}", report.final_state);
}

/// Readers and writers currently inside one security group.
#[derive(Default)]
struct Occupancy {
    readers: AtomicU32,
    writers: AtomicU32,
}

#[derive(Default)]
struct Tally {
    lock_sets: AtomicU64,
    contention_failures: AtomicU64,
    upgrades: AtomicU64,
    downgrades: AtomicU64,
    violations: AtomicU64,
}

struct Workload<'a> {
    registry: &'a Arc<LockRegistry>,
    sim: &'a SimulationConfig,
    parent: ObjectRef,
    children: Vec<ObjectRef>,
    occupancy: Vec<Occupancy>,
    tally: Tally,
}

impl Workload<'_> {
    fn hold(&self) {
        if self.sim.hold_micros > 0 {
            thread::sleep(Duration::from_micros(self.sim.hold_micros));
        }
    }

    fn violation(&self, child: &ObjectRef, what: &str) {
        self.tally.violations.fetch_add(1, Ordering::SeqCst);
        error!(object = %child, "{}", what);
    }

    fn run_worker(&self, worker: u32) -> Result<()> {
        for iteration in 0..self.sim.iterations {
            let roll = spread(worker, iteration);
            let index = (roll % self.children.len() as u64) as usize;
            let holder = HolderToken::new(format!("worker-{}/{}", worker, iteration));
            let strategy = LockStrategy::WaitMs(self.sim.timeout_ms);
            let writes = (roll >> 8) % 100 < u64::from(self.sim.write_percent);

            let outcome = if writes {
                lock_child_and_parents(
                    self.registry,
                    &holder,
                    &self.children[index],
                    std::slice::from_ref(&self.parent),
                    strategy,
                )
                .map(|set| self.write_phase(set, index, roll))
            } else {
                lock_objects(
                    self.registry,
                    &holder,
                    LockMode::Read,
                    &[self.children[index].clone(), self.parent.clone()],
                    strategy,
                )
                .and_then(|set| self.read_phase(set, index, roll))
            };

            match outcome {
                Ok(()) => {
                    self.tally.lock_sets.fetch_add(1, Ordering::SeqCst);
                }
                Err(BrokerError::LockUnavailable(reason)) => {
                    debug!(worker, iteration, %reason, "lock set not obtained");
                    self.tally.contention_failures.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write_phase(&self, mut set: LockSet, index: usize, roll: u64) {
        let child = &self.children[index];
        let occupancy = &self.occupancy[index];

        let writers = occupancy.writers.fetch_add(1, Ordering::SeqCst);
        let readers = occupancy.readers.load(Ordering::SeqCst);
        if writers != 0 || readers != 0 {
            self.violation(child, "writer entered an occupied object");
        }
        self.hold();

        if (roll >> 16) % DOWNGRADE_EVERY == 0 {
            occupancy.readers.fetch_add(1, Ordering::SeqCst);
            occupancy.writers.fetch_sub(1, Ordering::SeqCst);
            if set.downgrade(child) {
                self.tally.downgrades.fetch_add(1, Ordering::SeqCst);
            }
            self.hold();
            occupancy.readers.fetch_sub(1, Ordering::SeqCst);
        } else {
            occupancy.writers.fetch_sub(1, Ordering::SeqCst);
        }
        set.release();
    }

    fn read_phase(&self, mut set: LockSet, index: usize, roll: u64) -> Result<()> {
        let child = &self.children[index];
        let occupancy = &self.occupancy[index];

        occupancy.readers.fetch_add(1, Ordering::SeqCst);
        if occupancy.writers.load(Ordering::SeqCst) != 0 {
            self.violation(child, "reader entered a written object");
        }
        self.hold();
        occupancy.readers.fetch_sub(1, Ordering::SeqCst);

        if (roll >> 24) % UPGRADE_EVERY == 0 && set.upgrade(child)? {
            let writers = occupancy.writers.fetch_add(1, Ordering::SeqCst);
            if writers != 0 || occupancy.readers.load(Ordering::SeqCst) != 0 {
                self.violation(child, "upgrade entered an occupied object");
            }
            self.tally.upgrades.fetch_add(1, Ordering::SeqCst);
            self.hold();
            occupancy.writers.fetch_sub(1, Ordering::SeqCst);
        }
        set.release();
        Ok(())
    }
}

/// Run the workload described by `sim` against `registry`.
pub(crate) fn run_simulation(
    registry: &Arc<LockRegistry>,
    sim: &SimulationConfig,
) -> Result<SimulationReport> {
    let workload = Workload {
        registry,
        sim,
        parent: ObjectRef::new(ObjectKind::VirtualizationConnector, 1, "vc-1"),
        children: (1..=u64::from(sim.objects))
            .map(|id| ObjectRef::new(ObjectKind::SecurityGroup, id, format!("sg-{}", id)))
            .collect(),
        occupancy: (0..sim.objects).map(|_| Occupancy::default()).collect(),
        tally: Tally::default(),
    };

    info!(
        workers = sim.workers,
        objects = sim.objects,
        iterations = sim.iterations,
        "starting simulation"
    );
    let started = Instant::now();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..sim.workers)
            .map(|worker| {
                let workload = &workload;
                scope.spawn(move || workload.run_worker(worker))
            })
            .collect();

        handles.into_iter().try_for_each(|handle| {
            handle
                .join()
                .map_err(|_| BrokerError::UserError("simulation worker panicked".to_string()))?
        })
    })?;

    let tally = &workload.tally;
    Ok(SimulationReport {
        workers: sim.workers,
        objects: sim.objects,
        iterations: sim.iterations,
        write_percent: sim.write_percent,
        lock_sets: tally.lock_sets.load(Ordering::SeqCst),
        contention_failures: tally.contention_failures.load(Ordering::SeqCst),
        upgrades: tally.upgrades.load(Ordering::SeqCst),
        downgrades: tally.downgrades.load(Ordering::SeqCst),
        violations: tally.violations.load(Ordering::SeqCst),
        elapsed_ms: started.elapsed().as_millis() as u64,
        final_state: registry.snapshot_all(),
    })
}

/// Deterministic pseudo-random value for a worker's iteration (splitmix64).
fn spread(worker: u32, iteration: u32) -> u64 {
    let mut z = ((u64::from(worker) << 32) | u64::from(iteration)).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(write_percent: u32) -> SimulationConfig {
        SimulationConfig {
            workers: 4,
            objects: 2,
            iterations: 40,
            write_percent,
            hold_micros: 0,
            timeout_ms: 0,
        }
    }

    #[test]
    fn test_mixed_workload_has_no_violations() {
        let registry = Arc::new(LockRegistry::new());
        let report = run_simulation(&registry, &small(50)).unwrap();

        assert_eq!(report.violations, 0);
        assert_eq!(report.contention_failures, 0);
        assert_eq!(report.lock_sets, 4 * 40);
        assert!(report.final_state.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_write_only_workload_downgrades() {
        let registry = Arc::new(LockRegistry::new());
        let report = run_simulation(&registry, &small(100)).unwrap();

        assert_eq!(report.violations, 0);
        assert_eq!(report.upgrades, 0);
        assert!(report.downgrades > 0);
    }

    #[test]
    fn test_read_workload_upgrades_without_violations() {
        let registry = Arc::new(LockRegistry::new());
        let mut sim = small(0);
        sim.timeout_ms = 1;
        sim.iterations = 20;
        let report = run_simulation(&registry, &sim).unwrap();

        assert_eq!(report.downgrades, 0);
        assert_eq!(report.violations, 0);
    }

    #[test]
    fn test_flags_override_config() {
        let mut sim = SimulationConfig::default();
        let args = SimulateArgs {
            workers: Some(2),
            write_percent: Some(0),
            ..SimulateArgs::default()
        };
        apply_overrides(&mut sim, &args);

        assert_eq!(sim.workers, 2);
        assert_eq!(sim.write_percent, 0);
        assert_eq!(sim.objects, SimulationConfig::default().objects);
    }

    #[test]
    fn test_spread_is_deterministic() {
        assert_eq!(spread(3, 7), spread(3, 7));
        assert_ne!(spread(3, 7), spread(7, 3));
    }
}
