//! Process-wide map from object references to their lock records.

use super::object_ref::ObjectRef;
use super::record::{Attempt, LockRecord};
use super::request::{LockMode, LockRequest};
use super::snapshot::{RecordSnapshot, RegistrySnapshot};
use crate::config::Config;
use crate::config::types::default_lock_timeout_ms;
use crate::error::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Registry of advisory reader/writer locks keyed by object reference.
///
/// Construct one per process (or per test) and share it by `Arc`. Records
/// are created on first use and, unless disabled, dropped again once nobody
/// holds or waits on them.
///
/// Lock order is registry map, then record. Acquire calls take the map lock
/// only long enough to resolve the record and block on the record alone.
#[derive(Debug)]
pub struct LockRegistry {
    records: Mutex<HashMap<ObjectRef, Arc<LockRecord>>>,
    default_timeout_ms: u64,
    reclaim_idle: bool,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    /// Create a registry with the default settings.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            default_timeout_ms: default_lock_timeout_ms(),
            reclaim_idle: true,
        }
    }

    /// Create a registry using the lock settings from `config`.
    pub fn with_config(config: &Config) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            default_timeout_ms: config.default_lock_timeout_ms,
            reclaim_idle: config.reclaim_idle_records,
        }
    }

    /// Timeout used by [`acquire_default`](Self::acquire_default).
    pub fn default_timeout_ms(&self) -> u64 {
        self.default_timeout_ms
    }

    /// Try to lock the request's object without blocking.
    ///
    /// A request the holder's existing grant already covers returns `true`
    /// without being counted again; one release frees the object.
    pub fn try_acquire(&self, request: &LockRequest) -> bool {
        self.try_grant(request) != Attempt::Denied
    }

    /// Lock the request's object, waiting up to `timeout_ms` (0 waits
    /// indefinitely).
    ///
    /// Returns `Ok(false)` if the timeout elapsed first and
    /// [`BrokerError::Cancelled`](crate::error::BrokerError::Cancelled) if the
    /// holder was cancelled while waiting.
    pub fn acquire(&self, request: &LockRequest, timeout_ms: u64) -> Result<bool> {
        Ok(self.grant(request, timeout_ms)? != Attempt::Denied)
    }

    /// Like [`try_acquire`](Self::try_acquire), but tells a fresh grant apart
    /// from one the holder already had. Never returns `Retired`.
    pub(crate) fn try_grant(&self, request: &LockRequest) -> Attempt {
        loop {
            let record = self.get_or_create(&request.object);
            match record.try_acquire(request) {
                Attempt::Retired => continue,
                attempt => return attempt,
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but tells a fresh grant apart from
    /// one the holder already had. Never returns `Retired`.
    pub(crate) fn grant(&self, request: &LockRequest, timeout_ms: u64) -> Result<Attempt> {
        // A deadline past what `Instant` can represent is no deadline at all.
        let deadline = (timeout_ms > 0)
            .then(|| Instant::now().checked_add(Duration::from_millis(timeout_ms)))
            .flatten();
        loop {
            let record = self.get_or_create(&request.object);
            match record.acquire(request, deadline) {
                Ok(Attempt::Retired) => continue,
                Ok(Attempt::Denied) => {
                    self.reclaim_if_idle(&request.object, &record);
                    return Ok(Attempt::Denied);
                }
                Ok(attempt) => return Ok(attempt),
                Err(e) => {
                    self.reclaim_if_idle(&request.object, &record);
                    return Err(e);
                }
            }
        }
    }

    /// [`acquire`](Self::acquire) with the registry's default timeout.
    pub fn acquire_default(&self, request: &LockRequest) -> Result<bool> {
        self.acquire(request, self.default_timeout_ms)
    }

    /// Release the grant held by the request's holder.
    ///
    /// Releasing something that is not held only logs a warning, so cleanup
    /// paths may release unconditionally.
    pub fn release(&self, request: &LockRequest) {
        let Some(record) = self.lookup(&request.object) else {
            warn!(object = %request.object, holder = %request.holder, "release requested but no active locks found");
            return;
        };
        if record.release(request) {
            self.reclaim_if_idle(&request.object, &record);
        }
    }

    /// Upgrade the holder's read lock to a write lock, waiting for other
    /// readers to leave.
    ///
    /// On success `request.mode` becomes [`LockMode::Write`]. Returns
    /// `Ok(false)` if the holder has no lock on the object. If the wait is
    /// cancelled the holder is left with no lock at all.
    pub fn upgrade(&self, request: &mut LockRequest) -> Result<bool> {
        let Some(record) = self.lookup(&request.object) else {
            warn!(object = %request.object, holder = %request.holder, "upgrade requested but no active locks found");
            return Ok(false);
        };
        match record.upgrade(request) {
            Ok(true) => {
                request.mode = LockMode::Write;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.reclaim_if_idle(&request.object, &record);
                Err(e)
            }
        }
    }

    /// Downgrade the holder's write lock to a read lock without letting any
    /// other writer in.
    ///
    /// On success `request.mode` becomes [`LockMode::Read`].
    pub fn downgrade(&self, request: &mut LockRequest) -> bool {
        let Some(record) = self.lookup(&request.object) else {
            warn!(object = %request.object, holder = %request.holder, "downgrade requested but no active locks found");
            return false;
        };
        if record.downgrade(request) {
            request.mode = LockMode::Read;
            true
        } else {
            false
        }
    }

    /// Copies of the requests currently granted on `object`.
    pub fn lock_requests_for(&self, object: &ObjectRef) -> Option<Vec<LockRequest>> {
        self.lookup(object).map(|record| record.requests())
    }

    pub fn snapshot_for(&self, object: &ObjectRef) -> Option<RecordSnapshot> {
        self.lookup(object).map(|record| record.snapshot())
    }

    /// Snapshot every live record.
    pub fn snapshot_all(&self) -> RegistrySnapshot {
        let records = self.records.lock();
        RegistrySnapshot {
            captured_at: Utc::now(),
            records: records
                .iter()
                .map(|(object, record)| (object.clone(), record.snapshot()))
                .collect(),
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    fn get_or_create(&self, object: &ObjectRef) -> Arc<LockRecord> {
        let mut records = self.records.lock();
        let record = records
            .entry(object.clone())
            .or_insert_with(|| Arc::new(LockRecord::new()));
        Arc::clone(record)
    }

    fn lookup(&self, object: &ObjectRef) -> Option<Arc<LockRecord>> {
        self.records.lock().get(object).cloned()
    }

    /// Drop `record` from the map if it is still the mapped record and is idle.
    ///
    /// The record is retired while the map is locked, so a caller that
    /// resolved it just before removal retries against a fresh record instead
    /// of waiting on an orphan.
    fn reclaim_if_idle(&self, object: &ObjectRef, record: &Arc<LockRecord>) {
        if !self.reclaim_idle {
            return;
        }
        let mut records = self.records.lock();
        match records.get(object) {
            Some(current) if Arc::ptr_eq(current, record) => {}
            _ => return,
        }
        if record.retire_if_idle() {
            records.remove(object);
            debug!(object = %object, "reclaimed idle lock record");
        }
    }
}
