//! Implementation of the `lockbroker scenario` command.
//!
//! Replays a reference sequence against a fresh registry: readers A and B
//! share connector 1, writer C is refused until both release, then C
//! downgrades and a further writer is refused because C still reads.

use lockbroker::error::{BrokerError, Result};
use lockbroker::locks::{HolderToken, LockRegistry, LockRequest, ObjectKind, ObjectRef};

/// One step of the scenario and whether it behaved as expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScenarioStep {
    pub description: &'static str,
    pub expected: bool,
    pub actual: bool,
}

impl ScenarioStep {
    fn passed(&self) -> bool {
        self.expected == self.actual
    }
}

/// Execute the `lockbroker scenario` command.
pub fn cmd_scenario() -> Result<()> {
    let registry = LockRegistry::new();
    let steps = run_scenario(&registry);

    println!("Lock scenario on Virtualization Connector 1");
    println!("===========================================");
    println!();
    for step in &steps {
        println!(
            "  [{}] {:<42} -> {}",
            if step.passed() { "ok" } else { "FAIL" },
            step.description,
            step.actual
        );
    }
    println!();
    print!("{}", registry.snapshot_all());

    match steps.iter().find(|s| !s.passed()) {
        Some(step) => Err(BrokerError::UserError(format!(
            "scenario deviated at '{}': expected {}, got {}",
            step.description, step.expected, step.actual
        ))),
        None => Ok(()),
    }
}

pub(crate) fn run_scenario(registry: &LockRegistry) -> Vec<ScenarioStep> {
    let vc = ObjectRef::new(ObjectKind::VirtualizationConnector, 1, "vc-1");
    let a = LockRequest::read(vc.clone(), HolderToken::new("A"));
    let b = LockRequest::read(vc.clone(), HolderToken::new("B"));
    let mut c = LockRequest::write(vc.clone(), HolderToken::new("C"));
    let d = LockRequest::write(vc, HolderToken::new("D"));

    let mut steps = Vec::new();
    let mut record = |description, expected, actual| {
        steps.push(ScenarioStep {
            description,
            expected,
            actual,
        })
    };

    record("A: try read lock", true, registry.try_acquire(&a));
    record("B: try read lock", true, registry.try_acquire(&b));
    record("C: try write lock while A and B read", false, registry.try_acquire(&c));
    registry.release(&a);
    registry.release(&b);
    record("C: try write lock after A and B released", true, registry.try_acquire(&c));
    record("C: downgrade to read lock", true, registry.downgrade(&mut c));
    record("D: try write lock while C reads", false, registry.try_acquire(&d));
    registry.release(&c);

    steps
}
