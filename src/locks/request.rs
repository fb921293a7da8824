//! Lock requests and the holder tokens that present them.

use super::object_ref::ObjectRef;
use super::record::LockRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Access mode requested by (or granted to) a holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Shared access; any number of readers may hold it at once.
    Read,
    /// Exclusive access.
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Read => "read",
            LockMode::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of the task that holds (or is waiting for) a grant.
///
/// Clones share identity: a grant taken with one clone is released with any
/// other. The token doubles as the task's cancellation handle; once
/// [`cancel`](Self::cancel) is called every blocking wait performed for this
/// holder fails with [`BrokerError::Cancelled`](crate::error::BrokerError::Cancelled).
#[derive(Clone)]
pub struct HolderToken {
    inner: Arc<HolderInner>,
}

struct HolderInner {
    id: u64,
    name: String,
    cancelled: AtomicBool,
    /// Records this holder is currently blocked on.
    parked: Mutex<Vec<Arc<LockRecord>>>,
}

impl HolderToken {
    /// Create a token with a fresh process-unique id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HolderInner {
                id: NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                cancelled: AtomicBool::new(false),
                parked: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Cancel the holder's task.
    ///
    /// Wakes every record this holder is blocked on so the waits can observe
    /// the cancellation and unwind.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let parked = self.inner.parked.lock().clone();
        for record in parked {
            record.wake_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register this holder as blocked on `record` until the guard drops.
    pub(crate) fn park(&self, record: &Arc<LockRecord>) -> ParkGuard<'_> {
        self.inner.parked.lock().push(Arc::clone(record));
        ParkGuard {
            holder: self,
            record: Arc::clone(record),
        }
    }
}

impl PartialEq for HolderToken {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for HolderToken {}

impl Hash for HolderToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolderToken")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl fmt::Display for HolderToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.inner.name, self.inner.id)
    }
}

/// Unregisters a parked holder when the wait ends, on every exit path.
pub(crate) struct ParkGuard<'a> {
    holder: &'a HolderToken,
    record: Arc<LockRecord>,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        let mut parked = self.holder.inner.parked.lock();
        if let Some(pos) = parked.iter().position(|r| Arc::ptr_eq(r, &self.record)) {
            parked.swap_remove(pos);
        }
    }
}

/// A holder's request for access to one object.
///
/// The same request is presented again to release, upgrade or downgrade the
/// grant. Once granted, `mode` is the mode currently held; upgrade and
/// downgrade update it in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub object: ObjectRef,
    pub holder: HolderToken,
    pub mode: LockMode,
}

impl LockRequest {
    pub fn new(object: ObjectRef, holder: HolderToken, mode: LockMode) -> Self {
        Self {
            object,
            holder,
            mode,
        }
    }

    pub fn read(object: ObjectRef, holder: HolderToken) -> Self {
        Self::new(object, holder, LockMode::Read)
    }

    pub fn write(object: ObjectRef, holder: HolderToken) -> Self {
        Self::new(object, holder, LockMode::Write)
    }
}

impl fmt::Display for LockRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lock on {} for {}", self.mode, self.object, self.holder)
    }
}
