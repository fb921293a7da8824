//! All-or-nothing locking of several objects for one task.
//!
//! Jobs rarely lock a single object. A conformance task writes its deployment
//! spec and reads the appliance and connectors above it; if any of those
//! cannot be locked, whatever was already obtained is released before the
//! error is returned.
//!
//! # RAII
//!
//! A [`LockSet`] releases its locks, in acquisition order, when dropped.
//! Release never fails, so dropping never panics.

use super::object_ref::ObjectRef;
use super::record::Attempt;
use super::registry::LockRegistry;
use super::request::{HolderToken, LockMode, LockRequest};
use crate::error::{BrokerError, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// How a lock set waits for each of its locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStrategy {
    /// Fail immediately if a lock is not available.
    Try,
    /// Wait up to the registry's default timeout.
    Wait,
    /// Wait up to the given number of milliseconds (0 waits indefinitely).
    WaitMs(u64),
}

/// Locks held together by one holder.
#[derive(Debug)]
pub struct LockSet {
    registry: Arc<LockRegistry>,
    requests: Vec<LockRequest>,
}

impl LockSet {
    /// Create an empty set bound to `registry`.
    pub fn new(registry: Arc<LockRegistry>) -> Self {
        Self {
            registry,
            requests: Vec::new(),
        }
    }

    /// Lock one more object and add it to the set.
    ///
    /// An object the set already holds in a covering mode is skipped. A grant
    /// the holder obtained outside this set is never adopted: the set does not
    /// own it, so the request fails rather than releasing it on drop.
    ///
    /// On failure the set is left unchanged; dropping it releases what it
    /// already holds.
    pub fn acquire(&mut self, request: LockRequest, strategy: LockStrategy) -> Result<()> {
        if let Some(held) = self.mode_of(&request.object)
            && (held == LockMode::Write || request.mode == LockMode::Read)
        {
            return Ok(());
        }

        let attempt = match strategy {
            LockStrategy::Try => self.registry.try_grant(&request),
            LockStrategy::Wait => self
                .registry
                .grant(&request, self.registry.default_timeout_ms())?,
            LockStrategy::WaitMs(timeout_ms) => self.registry.grant(&request, timeout_ms)?,
        };
        match attempt {
            Attempt::Granted => {
                self.requests.push(request);
                Ok(())
            }
            Attempt::AlreadyHeld => {
                warn!(object = %request.object, holder = %request.holder, "object already locked by this holder outside the lock set");
                Err(unavailable(&request.object))
            }
            Attempt::Denied | Attempt::Retired => Err(unavailable(&request.object)),
        }
    }

    /// Requests held by this set, in acquisition order.
    pub fn requests(&self) -> &[LockRequest] {
        &self.requests
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectRef> {
        self.requests.iter().map(|r| &r.object)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Mode currently held on `object`, if the set holds it.
    pub fn mode_of(&self, object: &ObjectRef) -> Option<LockMode> {
        self.position(object).map(|i| self.requests[i].mode)
    }

    /// Upgrade the set's read lock on `object` to a write lock.
    ///
    /// Returns `Ok(false)` if the set holds no lock on `object`. A cancelled
    /// upgrade also drops the object from the set, since its read lock is gone.
    pub fn upgrade(&mut self, object: &ObjectRef) -> Result<bool> {
        let Some(i) = self.position(object) else {
            return Ok(false);
        };
        match self.registry.upgrade(&mut self.requests[i]) {
            Ok(upgraded) => Ok(upgraded),
            Err(e) => {
                self.requests.remove(i);
                Err(e)
            }
        }
    }

    /// Downgrade the set's write lock on `object` to a read lock.
    pub fn downgrade(&mut self, object: &ObjectRef) -> bool {
        match self.position(object) {
            Some(i) => self.registry.downgrade(&mut self.requests[i]),
            None => false,
        }
    }

    /// Move every lock held by `other` into this set.
    ///
    /// # Panics
    ///
    /// Panics if the two sets belong to different registries.
    pub fn merge(&mut self, mut other: LockSet) {
        assert!(
            Arc::ptr_eq(&self.registry, &other.registry),
            "cannot merge lock sets from different registries"
        );
        self.requests.append(&mut other.requests);
    }

    /// Release every lock now rather than when the set is dropped.
    pub fn release(mut self) {
        self.release_all();
    }

    fn release_all(&mut self) {
        for request in self.requests.drain(..) {
            info!(object = %request.object, holder = %request.holder, mode = %request.mode, "releasing lock");
            self.registry.release(&request);
        }
    }

    fn position(&self, object: &ObjectRef) -> Option<usize> {
        self.requests.iter().position(|r| &r.object == object)
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        if !self.requests.is_empty() {
            self.release_all();
        }
    }
}

/// Lock a single object.
pub fn lock_object(
    registry: &Arc<LockRegistry>,
    holder: &HolderToken,
    object: &ObjectRef,
    mode: LockMode,
    strategy: LockStrategy,
) -> Result<LockSet> {
    lock_objects(registry, holder, mode, std::slice::from_ref(object), strategy)
}

/// Lock every object in `objects` with the same mode.
pub fn lock_objects(
    registry: &Arc<LockRegistry>,
    holder: &HolderToken,
    mode: LockMode,
    objects: &[ObjectRef],
    strategy: LockStrategy,
) -> Result<LockSet> {
    let mut set = LockSet::new(Arc::clone(registry));
    for object in objects {
        let request = LockRequest::new(object.clone(), holder.clone(), mode);
        if let Err(e) = set.acquire(request, strategy) {
            log_rollback(&set);
            return Err(e);
        }
    }
    Ok(set)
}

/// Write-lock `child` and read-lock each of its `parents`.
///
/// The child comes first in the returned set.
pub fn lock_child_and_parents(
    registry: &Arc<LockRegistry>,
    holder: &HolderToken,
    child: &ObjectRef,
    parents: &[ObjectRef],
    strategy: LockStrategy,
) -> Result<LockSet> {
    let mut set = LockSet::new(Arc::clone(registry));
    let requests = std::iter::once(LockRequest::write(child.clone(), holder.clone())).chain(
        parents
            .iter()
            .map(|parent| LockRequest::read(parent.clone(), holder.clone())),
    );
    for request in requests {
        if let Err(e) = set.acquire(request, strategy) {
            log_rollback(&set);
            return Err(e);
        }
    }
    Ok(set)
}

fn unavailable(object: &ObjectRef) -> BrokerError {
    BrokerError::LockUnavailable(format!(
        "Fail to gain lock for {} '{}'.",
        object.kind.label(),
        object.display_name
    ))
}

fn log_rollback(set: &LockSet) {
    if !set.is_empty() {
        info!(held = set.len(), "locking of objects failed, releasing locks already obtained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{ObjectKind, RecordMode};

    fn ds() -> ObjectRef {
        ObjectRef::new(ObjectKind::DeploymentSpec, 1, "ds-east")
    }

    fn da() -> ObjectRef {
        ObjectRef::new(ObjectKind::DistributedAppliance, 2, "da-fw")
    }

    fn vc() -> ObjectRef {
        ObjectRef::new(ObjectKind::VirtualizationConnector, 3, "openstack")
    }

    fn mc() -> ObjectRef {
        ObjectRef::new(ObjectKind::ApplianceManagerConnector, 4, "nsm")
    }

    #[test]
    fn test_child_is_written_and_parents_read() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("ds-conformance");

        let set =
            lock_child_and_parents(&registry, &holder, &ds(), &[da(), vc(), mc()], LockStrategy::Try)
                .unwrap();

        assert_eq!(set.len(), 4);
        assert_eq!(set.requests()[0].object, ds());
        assert_eq!(set.mode_of(&ds()), Some(LockMode::Write));
        assert_eq!(set.mode_of(&vc()), Some(LockMode::Read));
        assert_eq!(registry.snapshot_for(&ds()).unwrap().mode, RecordMode::Write);
        assert_eq!(registry.snapshot_for(&mc()).unwrap().mode, RecordMode::Read);

        drop(set);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sibling_children_share_parents() {
        let registry = Arc::new(LockRegistry::new());
        let sg1 = ObjectRef::new(ObjectKind::SecurityGroup, 10, "sg-a");
        let sg2 = ObjectRef::new(ObjectKind::SecurityGroup, 11, "sg-b");

        let a = lock_child_and_parents(
            &registry,
            &HolderToken::new("a"),
            &sg1,
            &[vc()],
            LockStrategy::Try,
        )
        .unwrap();
        let b = lock_child_and_parents(
            &registry,
            &HolderToken::new("b"),
            &sg2,
            &[vc()],
            LockStrategy::Try,
        )
        .unwrap();

        assert_eq!(registry.snapshot_for(&vc()).unwrap().active_readers, 2);
        drop(a);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failure_rolls_back_obtained_locks() {
        let registry = Arc::new(LockRegistry::new());
        let blocker = HolderToken::new("vc-delete");
        let _vc_lock =
            lock_object(&registry, &blocker, &vc(), LockMode::Write, LockStrategy::Try).unwrap();

        let holder = HolderToken::new("ds-conformance");
        let err = lock_child_and_parents(&registry, &holder, &ds(), &[da(), vc(), mc()], LockStrategy::Try)
            .unwrap_err();

        assert!(matches!(err, BrokerError::LockUnavailable(_)));
        assert_eq!(
            err.to_string(),
            "Lock acquisition failed: Fail to gain lock for Virtualization Connector 'openstack'."
        );
        assert!(registry.snapshot_for(&ds()).is_none());
        assert!(registry.snapshot_for(&da()).is_none());
        assert!(registry.snapshot_for(&mc()).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_wait_strategy_times_out_as_unavailable() {
        let registry = Arc::new(LockRegistry::new());
        let _held = lock_object(
            &registry,
            &HolderToken::new("writer"),
            &da(),
            LockMode::Write,
            LockStrategy::Try,
        )
        .unwrap();

        let err = lock_objects(
            &registry,
            &HolderToken::new("reader"),
            LockMode::Read,
            &[mc(), da()],
            LockStrategy::WaitMs(20),
        )
        .unwrap_err();

        assert!(matches!(err, BrokerError::LockUnavailable(_)));
        assert!(registry.snapshot_for(&mc()).is_none());
    }

    #[test]
    fn test_cancelled_holder_reports_cancellation() {
        let registry = Arc::new(LockRegistry::new());
        let _held = lock_object(
            &registry,
            &HolderToken::new("writer"),
            &da(),
            LockMode::Write,
            LockStrategy::Try,
        )
        .unwrap();

        let holder = HolderToken::new("aborted");
        holder.cancel();
        let err = lock_object(&registry, &holder, &da(), LockMode::Read, LockStrategy::WaitMs(0))
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(registry.snapshot_for(&da()).unwrap().waiting_readers, 0);
    }

    #[test]
    fn test_explicit_release_and_merge() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("job");

        let mut set = lock_object(&registry, &holder, &vc(), LockMode::Read, LockStrategy::Try).unwrap();
        let more = lock_object(&registry, &holder, &mc(), LockMode::Read, LockStrategy::Try).unwrap();
        set.merge(more);

        assert_eq!(set.objects().cloned().collect::<Vec<_>>(), vec![vc(), mc()]);
        assert_eq!(registry.len(), 2);

        set.release();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upgrade_and_downgrade_members() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("sg-sync");
        let mut set = lock_object(&registry, &holder, &vc(), LockMode::Read, LockStrategy::Try).unwrap();

        assert!(set.upgrade(&vc()).unwrap());
        assert_eq!(set.mode_of(&vc()), Some(LockMode::Write));
        assert!(set.downgrade(&vc()));
        assert_eq!(set.mode_of(&vc()), Some(LockMode::Read));

        assert!(!set.upgrade(&da()).unwrap());
        assert!(!set.downgrade(&da()));
    }

    #[test]
    fn test_overlapping_set_of_same_holder_is_refused() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("vc-sync");
        let outer = lock_object(&registry, &holder, &vc(), LockMode::Write, LockStrategy::Try).unwrap();

        let err = lock_object(&registry, &holder, &vc(), LockMode::Read, LockStrategy::Try).unwrap_err();
        assert!(matches!(err, BrokerError::LockUnavailable(_)));

        let intruder = LockRequest::write(vc(), HolderToken::new("intruder"));
        assert_eq!(outer.mode_of(&vc()), Some(LockMode::Write));
        assert!(!registry.try_acquire(&intruder));

        drop(outer);
        assert!(registry.try_acquire(&intruder));
    }

    #[test]
    fn test_waiting_overlap_is_refused_without_blocking() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("vc-sync");
        let _outer = lock_object(&registry, &holder, &vc(), LockMode::Read, LockStrategy::Try).unwrap();

        let err = lock_objects(&registry, &holder, LockMode::Read, &[mc(), vc()], LockStrategy::WaitMs(0))
            .unwrap_err();

        assert!(matches!(err, BrokerError::LockUnavailable(_)));
        assert!(registry.snapshot_for(&mc()).is_none());
        assert_eq!(registry.snapshot_for(&vc()).unwrap().active_readers, 1);
    }

    #[test]
    fn test_child_listed_among_parents_is_locked_once() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("ds-conformance");

        let set = lock_child_and_parents(&registry, &holder, &ds(), &[vc(), ds()], LockStrategy::Try)
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.mode_of(&ds()), Some(LockMode::Write));
        assert_eq!(registry.lock_requests_for(&ds()).unwrap().len(), 1);

        drop(set);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_objects_are_locked_once() {
        let registry = Arc::new(LockRegistry::new());
        let holder = HolderToken::new("reader");

        let set = lock_objects(&registry, &holder, LockMode::Read, &[vc(), vc()], LockStrategy::Try)
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(registry.snapshot_for(&vc()).unwrap().active_readers, 1);

        drop(set);
        assert!(registry.is_empty());
    }
}
