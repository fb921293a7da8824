//! Reader/writer lock state machine for a single object.
//!
//! A record is a monitor: one mutex guards the state below and one condition
//! variable is broadcast whenever a grant is removed. Waiting readers and
//! writers re-check different predicates, so every wake is a `notify_all`.
//!
//! Grantability looks only at the current mode and reader count, never at the
//! waiter counts. Readers keep joining while a writer waits, so a writer can
//! starve under a steady stream of readers.

use super::request::{HolderToken, LockMode, LockRequest};
use super::snapshot::{HolderDescriptor, RecordSnapshot};
use crate::error::{BrokerError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Mode a record is currently held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordMode {
    /// Nobody holds the object.
    None,
    /// One or more readers hold the object.
    Read,
    /// Exactly one writer holds the object.
    Write,
}

impl fmt::Display for RecordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordMode::None => "none",
            RecordMode::Read => "read",
            RecordMode::Write => "write",
        })
    }
}

/// Result of presenting a request to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attempt {
    Granted,
    /// The holder already holds a grant covering the requested mode. Nothing
    /// was counted; its single release still frees the object.
    AlreadyHeld,
    /// Not grantable now, or the deadline passed first.
    Denied,
    /// The record was evicted from the registry; look it up again.
    Retired,
}

#[derive(Debug, Clone)]
struct Grant {
    request: LockRequest,
    granted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct RecordState {
    mode: RecordMode,
    active_readers: u32,
    waiting_readers: u32,
    waiting_writers: u32,
    grants: HashMap<HolderToken, Grant>,
    retired: bool,
}

impl RecordState {
    fn grantable(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => self.mode != RecordMode::Write,
            LockMode::Write => self.mode == RecordMode::None && self.active_readers == 0,
        }
    }

    fn held_mode(&self, holder: &HolderToken) -> Option<LockMode> {
        self.grants.get(holder).map(|grant| grant.request.mode)
    }

    fn grant(&mut self, request: &LockRequest) {
        match request.mode {
            LockMode::Read => {
                self.active_readers += 1;
                self.mode = RecordMode::Read;
            }
            LockMode::Write => {
                self.mode = RecordMode::Write;
            }
        }
        self.grants.insert(
            request.holder.clone(),
            Grant {
                request: request.clone(),
                granted_at: Utc::now(),
            },
        );
        self.check_invariants();
        debug!(object = %request.object, holder = %request.holder, mode = %request.mode, "lock granted");
    }

    /// Remove the holder's grant. Returns `false` if it held none.
    fn revoke(&mut self, holder: &HolderToken) -> bool {
        let Some(grant) = self.grants.remove(holder) else {
            return false;
        };
        match self.mode {
            RecordMode::Read => {
                self.active_readers -= 1;
                if self.active_readers == 0 {
                    self.mode = RecordMode::None;
                }
            }
            RecordMode::Write => self.mode = RecordMode::None,
            RecordMode::None => unreachable!("grant {} present on an unheld record", grant.request),
        }
        self.check_invariants();
        true
    }

    fn add_waiter(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.waiting_readers += 1,
            LockMode::Write => self.waiting_writers += 1,
        }
    }

    fn remove_waiter(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.waiting_readers -= 1,
            LockMode::Write => self.waiting_writers -= 1,
        }
    }

    fn is_idle(&self) -> bool {
        self.mode == RecordMode::None && self.waiting_readers == 0 && self.waiting_writers == 0
    }

    /// A broken invariant means mutual exclusion is already lost for this
    /// object; there is nothing sensible to recover to.
    fn check_invariants(&self) {
        match self.mode {
            RecordMode::Write => assert!(
                self.active_readers == 0 && self.grants.len() == 1,
                "write-held record has {} readers and {} grants",
                self.active_readers,
                self.grants.len()
            ),
            RecordMode::Read => assert!(
                self.active_readers >= 1 && self.active_readers as usize == self.grants.len(),
                "read-held record has {} readers but {} grants",
                self.active_readers,
                self.grants.len()
            ),
            RecordMode::None => assert!(
                self.active_readers == 0 && self.grants.is_empty(),
                "unheld record has {} readers and {} grants",
                self.active_readers,
                self.grants.len()
            ),
        }
    }
}

/// Lock state for one object reference.
#[derive(Debug)]
pub(crate) struct LockRecord {
    state: Mutex<RecordState>,
    released: Condvar,
}

impl LockRecord {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RecordState {
                mode: RecordMode::None,
                active_readers: 0,
                waiting_readers: 0,
                waiting_writers: 0,
                grants: HashMap::new(),
                retired: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Grant the request if possible without blocking.
    pub(crate) fn try_acquire(&self, request: &LockRequest) -> Attempt {
        let mut state = self.state.lock();
        if state.retired {
            return Attempt::Retired;
        }
        if let Some(held) = state.held_mode(&request.holder) {
            return reentrant(request, held);
        }
        if state.grantable(request.mode) {
            state.grant(request);
            Attempt::Granted
        } else {
            debug!(object = %request.object, holder = %request.holder, mode = %request.mode, "try lock refused");
            Attempt::Denied
        }
    }

    /// Grant the request, blocking until it is grantable, `deadline` passes
    /// (`None` waits forever) or the holder is cancelled.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        request: &LockRequest,
        deadline: Option<Instant>,
    ) -> Result<Attempt> {
        let mut state = self.state.lock();
        if state.retired {
            return Ok(Attempt::Retired);
        }
        if let Some(held) = state.held_mode(&request.holder) {
            return Ok(reentrant(request, held));
        }
        self.wait_for_grant(&mut state, request, deadline)
    }

    /// Release the holder's grant and wake all waiters.
    ///
    /// Returns `false`, changing nothing, if the holder held no grant.
    pub(crate) fn release(&self, request: &LockRequest) -> bool {
        let mut state = self.state.lock();
        if !state.revoke(&request.holder) {
            warn!(object = %request.object, holder = %request.holder, "release requested but holder has no lock");
            return false;
        }
        debug!(object = %request.object, holder = %request.holder, "lock released");
        self.released.notify_all();
        true
    }

    /// Trade the holder's read grant for a write grant, blocking until the
    /// remaining readers drain.
    ///
    /// The read grant is given up before waiting, so other contenders may
    /// take the object in between. Returns `Ok(false)` if the holder held no
    /// grant and `Ok(true)` immediately if it already holds write.
    pub(crate) fn upgrade(self: &Arc<Self>, request: &LockRequest) -> Result<bool> {
        let mut state = self.state.lock();
        match state.held_mode(&request.holder) {
            None => {
                warn!(object = %request.object, holder = %request.holder, "upgrade requested but holder has no lock");
                Ok(false)
            }
            Some(LockMode::Write) => Ok(true),
            Some(LockMode::Read) => {
                state.revoke(&request.holder);
                self.released.notify_all();

                let write = LockRequest::new(
                    request.object.clone(),
                    request.holder.clone(),
                    LockMode::Write,
                );
                let attempt = self.wait_for_grant(&mut state, &write, None)?;
                Ok(attempt == Attempt::Granted)
            }
        }
    }

    /// Turn the holder's write grant into a read grant in one step.
    ///
    /// No other writer can slip in between; readers blocked on the writer are
    /// woken and may join immediately.
    pub(crate) fn downgrade(&self, request: &LockRequest) -> bool {
        let mut state = self.state.lock();
        if state.mode != RecordMode::Write || state.held_mode(&request.holder) != Some(LockMode::Write)
        {
            warn!(object = %request.object, holder = %request.holder, "downgrade requested but holder has no write lock");
            return false;
        }

        state.revoke(&request.holder);
        let read = LockRequest::new(
            request.object.clone(),
            request.holder.clone(),
            LockMode::Read,
        );
        state.grant(&read);
        self.released.notify_all();
        true
    }

    /// Evict the record if nobody holds or waits on it.
    ///
    /// Must be called with the registry map locked, so a concurrent lookup
    /// either finds the record before it is retired (and then sees the flag)
    /// or does not find it at all.
    pub(crate) fn retire_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.retired || !state.is_idle() {
            return false;
        }
        state.retired = true;
        true
    }

    /// Wake every waiter so it re-checks its predicate and cancellation.
    pub(crate) fn wake_all(&self) {
        let _state = self.state.lock();
        self.released.notify_all();
    }

    pub(crate) fn requests(&self) -> Vec<LockRequest> {
        let state = self.state.lock();
        let mut requests: Vec<_> = state.grants.values().map(|g| g.request.clone()).collect();
        requests.sort_by_key(|r| r.holder.id());
        requests
    }

    pub(crate) fn snapshot(&self) -> RecordSnapshot {
        let state = self.state.lock();
        let mut holders: Vec<_> = state
            .grants
            .values()
            .map(|grant| HolderDescriptor {
                holder_id: grant.request.holder.id(),
                holder_name: grant.request.holder.name().to_string(),
                mode: grant.request.mode,
                granted_at: grant.granted_at,
            })
            .collect();
        holders.sort_by_key(|h| h.holder_id);

        RecordSnapshot {
            mode: state.mode,
            active_readers: state.active_readers,
            waiting_readers: state.waiting_readers,
            waiting_writers: state.waiting_writers,
            holders,
        }
    }

    /// Block until `request` is grantable, counting this thread as a waiter
    /// for the whole wait.
    fn wait_for_grant(
        self: &Arc<Self>,
        state: &mut MutexGuard<'_, RecordState>,
        request: &LockRequest,
        deadline: Option<Instant>,
    ) -> Result<Attempt> {
        if state.grantable(request.mode) {
            state.grant(request);
            return Ok(Attempt::Granted);
        }

        state.add_waiter(request.mode);
        let outcome = {
            let _parked = request.holder.park(self);
            self.wait_loop(state, request, deadline)
        };
        state.remove_waiter(request.mode);
        outcome
    }

    fn wait_loop(
        &self,
        state: &mut MutexGuard<'_, RecordState>,
        request: &LockRequest,
        deadline: Option<Instant>,
    ) -> Result<Attempt> {
        loop {
            if state.grantable(request.mode) {
                state.grant(request);
                return Ok(Attempt::Granted);
            }
            if request.holder.is_cancelled() {
                debug!(object = %request.object, holder = %request.holder, "lock wait cancelled");
                return Err(BrokerError::Cancelled {
                    object: request.object.to_string(),
                    holder: request.holder.to_string(),
                });
            }

            debug!(object = %request.object, holder = %request.holder, mode = %request.mode, "waiting for lock");
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(state, deadline).timed_out() {
                        if state.grantable(request.mode) {
                            state.grant(request);
                            return Ok(Attempt::Granted);
                        }
                        debug!(object = %request.object, holder = %request.holder, "lock wait timed out");
                        return Ok(Attempt::Denied);
                    }
                }
                None => self.released.wait(state),
            }
        }
    }
}

/// Outcome of a request from a holder that already holds a grant here.
fn reentrant(request: &LockRequest, held: LockMode) -> Attempt {
    match (held, request.mode) {
        (LockMode::Write, _) | (LockMode::Read, LockMode::Read) => Attempt::AlreadyHeld,
        (LockMode::Read, LockMode::Write) => {
            warn!(object = %request.object, holder = %request.holder, "write requested by a read holder; use upgrade");
            Attempt::Denied
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::{ObjectKind, ObjectRef};
    use std::thread;
    use std::time::Duration;

    fn object() -> ObjectRef {
        ObjectRef::new(ObjectKind::DistributedAppliance, 5, "da-5")
    }

    fn request(name: &str, mode: LockMode) -> LockRequest {
        LockRequest::new(object(), HolderToken::new(name), mode)
    }

    #[test]
    fn test_new_record_is_unheld() {
        let record = LockRecord::new();
        let snapshot = record.snapshot();

        assert_eq!(snapshot.mode, RecordMode::None);
        assert_eq!(snapshot.active_readers, 0);
        assert!(snapshot.holders.is_empty());
    }

    #[test]
    fn test_readers_share_and_block_writer() {
        let record = LockRecord::new();
        let r1 = request("r1", LockMode::Read);
        let r2 = request("r2", LockMode::Read);
        let w = request("w", LockMode::Write);

        assert_eq!(record.try_acquire(&r1), Attempt::Granted);
        assert_eq!(record.try_acquire(&r2), Attempt::Granted);
        assert_eq!(record.try_acquire(&w), Attempt::Denied);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.mode, RecordMode::Read);
        assert_eq!(snapshot.active_readers, 2);
        assert_eq!(snapshot.waiting_writers, 0);

        assert!(record.release(&r1));
        assert_eq!(record.snapshot().mode, RecordMode::Read);
        assert!(record.release(&r2));
        assert_eq!(record.snapshot().mode, RecordMode::None);
        assert_eq!(record.try_acquire(&w), Attempt::Granted);
    }

    #[test]
    fn test_writer_excludes_everyone() {
        let record = LockRecord::new();
        let w = request("w", LockMode::Write);

        assert_eq!(record.try_acquire(&w), Attempt::Granted);
        assert_eq!(record.try_acquire(&request("r", LockMode::Read)), Attempt::Denied);
        assert_eq!(record.try_acquire(&request("w2", LockMode::Write)), Attempt::Denied);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.mode, RecordMode::Write);
        assert_eq!(snapshot.holders.len(), 1);
        assert_eq!(snapshot.holders[0].mode, LockMode::Write);
    }

    #[test]
    fn test_release_without_grant_is_a_no_op() {
        let record = LockRecord::new();
        let held = request("held", LockMode::Read);
        let stranger = request("stranger", LockMode::Read);

        assert_eq!(record.try_acquire(&held), Attempt::Granted);
        assert!(!record.release(&stranger));
        assert!(record.release(&held));
        assert!(!record.release(&held));

        let snapshot = record.snapshot();
        assert_eq!(snapshot.mode, RecordMode::None);
        assert_eq!(snapshot.active_readers, 0);
    }

    #[test]
    fn test_reentrant_requests_do_not_double_count() {
        let record = LockRecord::new();
        let read = request("task", LockMode::Read);

        assert_eq!(record.try_acquire(&read), Attempt::Granted);
        assert_eq!(record.try_acquire(&read), Attempt::AlreadyHeld);
        assert_eq!(record.snapshot().active_readers, 1);

        let write_same_holder = LockRequest::write(object(), read.holder.clone());
        assert_eq!(record.try_acquire(&write_same_holder), Attempt::Denied);

        let writer = Arc::new(LockRecord::new());
        let w = request("writer", LockMode::Write);
        let read_same_holder = LockRequest::read(object(), w.holder.clone());
        assert_eq!(writer.try_acquire(&w), Attempt::Granted);
        assert_eq!(writer.acquire(&read_same_holder, None).unwrap(), Attempt::AlreadyHeld);
        assert_eq!(writer.snapshot().mode, RecordMode::Write);
        assert!(writer.release(&read_same_holder));
        assert_eq!(writer.snapshot().mode, RecordMode::None);
    }

    #[test]
    fn test_downgrade_keeps_holder_as_reader() {
        let record = Arc::new(LockRecord::new());
        let w = request("writer", LockMode::Write);

        assert_eq!(record.try_acquire(&w), Attempt::Granted);
        assert!(record.downgrade(&w));

        let snapshot = record.snapshot();
        assert_eq!(snapshot.mode, RecordMode::Read);
        assert_eq!(snapshot.active_readers, 1);
        assert_eq!(snapshot.holders[0].holder_id, w.holder.id());
        assert_eq!(snapshot.holders[0].mode, LockMode::Read);

        assert!(!record.downgrade(&w));
        assert_eq!(record.try_acquire(&request("other", LockMode::Write)), Attempt::Denied);
    }

    #[test]
    fn test_upgrade_requires_a_grant() {
        let record = Arc::new(LockRecord::new());
        let r = request("reader", LockMode::Read);

        assert!(!record.upgrade(&r).unwrap());
        assert_eq!(record.snapshot().mode, RecordMode::None);

        assert_eq!(record.try_acquire(&r), Attempt::Granted);
        assert!(record.upgrade(&r).unwrap());
        assert_eq!(record.snapshot().mode, RecordMode::Write);
        assert!(record.upgrade(&r).unwrap());
    }

    #[test]
    fn test_acquire_times_out_and_restores_waiter_count() {
        let record = Arc::new(LockRecord::new());
        let w = request("writer", LockMode::Write);
        assert_eq!(record.try_acquire(&w), Attempt::Granted);

        let r = request("reader", LockMode::Read);
        let deadline = Instant::now() + Duration::from_millis(30);
        assert_eq!(record.acquire(&r, Some(deadline)).unwrap(), Attempt::Denied);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.waiting_readers, 0);
        assert_eq!(snapshot.waiting_writers, 0);
    }

    #[test]
    fn test_blocked_writer_is_granted_after_release() {
        let record = Arc::new(LockRecord::new());
        let r = request("reader", LockMode::Read);
        assert_eq!(record.try_acquire(&r), Attempt::Granted);

        let waiter = {
            let record = Arc::clone(&record);
            thread::spawn(move || {
                let w = request("writer", LockMode::Write);
                record.acquire(&w, None).unwrap()
            })
        };

        while record.snapshot().waiting_writers == 0 {
            thread::yield_now();
        }
        assert!(record.release(&r));

        assert_eq!(waiter.join().unwrap(), Attempt::Granted);
        let snapshot = record.snapshot();
        assert_eq!(snapshot.mode, RecordMode::Write);
        assert_eq!(snapshot.waiting_writers, 0);
    }

    #[test]
    fn test_retired_record_refuses_requests() {
        let record = Arc::new(LockRecord::new());
        assert!(record.retire_if_idle());
        assert!(!record.retire_if_idle());

        let r = request("late", LockMode::Read);
        assert_eq!(record.try_acquire(&r), Attempt::Retired);
        assert_eq!(record.acquire(&r, None).unwrap(), Attempt::Retired);
    }

    #[test]
    fn test_held_record_is_not_retired() {
        let record = LockRecord::new();
        let r = request("reader", LockMode::Read);
        assert_eq!(record.try_acquire(&r), Attempt::Granted);

        assert!(!record.retire_if_idle());
    }
}
