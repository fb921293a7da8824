//! Advisory reader/writer locks on domain objects.
//!
//! Background jobs acting on shared objects (connectors, appliances, security
//! groups) serialize through this module:
//! - [`ObjectRef`] names an object by kind and numeric id
//! - [`LockRequest`] pairs an object with a [`HolderToken`] and a [`LockMode`]
//! - [`LockRegistry`] maps each object to its lock record and is the entry
//!   point for try-acquire, acquire with timeout, release, upgrade and downgrade
//! - [`LockSet`] locks several objects for one holder, all or nothing
//!
//! # Semantics
//!
//! Any number of readers, or exactly one writer. Waiters are not queued: on
//! every release all waiters wake and whoever finds its mode grantable
//! proceeds. Readers never defer to waiting writers, so writers can starve.
//!
//! Locks guard only this process; nothing is persisted.
//!
//! # Diagnostics
//!
//! [`LockRegistry::snapshot_all`] copies the state of every live record for
//! the lock inspector; [`RegistrySnapshot::to_json`] renders it.

mod lock_set;
mod object_ref;
mod record;
mod registry;
mod request;
mod snapshot;


// Re-export public API
pub use lock_set::{LockSet, LockStrategy, lock_child_and_parents, lock_object, lock_objects};
pub use object_ref::{ObjectKind, ObjectRef};
pub use record::RecordMode;
pub use registry::LockRegistry;
pub use request::{HolderToken, LockMode, LockRequest};
pub use snapshot::{HolderDescriptor, RecordSnapshot, RegistrySnapshot};
