//! Read-only copies of lock state for diagnostics.
//!
//! Snapshots are detached from the live records; changing them has no effect
//! on locking.

use super::object_ref::ObjectRef;
use super::record::RecordMode;
use super::request::LockMode;
use crate::error::{BrokerError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One granted holder of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderDescriptor {
    pub holder_id: u64,
    pub holder_name: String,
    pub mode: LockMode,
    pub granted_at: DateTime<Utc>,
}

impl HolderDescriptor {
    /// How long the grant has been held.
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.granted_at)
    }

    /// Format the age as a human-readable string.
    pub fn age_string(&self) -> String {
        let age = self.age();
        let minutes = age.num_minutes();
        let hours = age.num_hours();
        let days = age.num_days();

        if days > 0 {
            format!("{}d {}h", days, hours % 24)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes % 60)
        } else {
            format!("{}m", minutes)
        }
    }
}

impl fmt::Display for HolderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} ({}, held {})",
            self.holder_name,
            self.holder_id,
            self.mode,
            self.age_string()
        )
    }
}

/// State of one record at the moment it was captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub mode: RecordMode,
    pub active_readers: u32,
    pub waiting_readers: u32,
    pub waiting_writers: u32,
    /// Granted holders, ordered by holder id.
    pub holders: Vec<HolderDescriptor>,
}

impl RecordSnapshot {
    pub fn is_locked(&self) -> bool {
        self.mode != RecordMode::None
    }

    pub fn waiters(&self) -> u32 {
        self.waiting_readers + self.waiting_writers
    }
}

/// Every live record of a registry.
///
/// Records are captured one at a time, so the entries are each consistent but
/// not necessarily from the same instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub captured_at: DateTime<Utc>,
    #[serde(with = "records_as_list")]
    pub records: BTreeMap<ObjectRef, RecordSnapshot>,
}

impl RegistrySnapshot {
    pub fn get(&self, object: &ObjectRef) -> Option<&RecordSnapshot> {
        self.records.get(object)
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.records.contains_key(object)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render the snapshot as pretty JSON for the lock inspector.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            BrokerError::SerializationError(format!("failed to serialize lock snapshot: {}", e))
        })
    }
}

impl fmt::Display for RegistrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.records.is_empty() {
            return writeln!(f, "No active locks.");
        }

        writeln!(f, "Active lock records ({}):", self.records.len())?;
        for (object, record) in &self.records {
            writeln!(f)?;
            writeln!(f, "  {}:", object)?;
            writeln!(f, "    Mode:       {}", record.mode)?;
            writeln!(f, "    Readers:    {}", record.active_readers)?;
            writeln!(
                f,
                "    Waiting:    {} reader(s), {} writer(s)",
                record.waiting_readers, record.waiting_writers
            )?;
            for holder in &record.holders {
                writeln!(f, "    Holder:     {}", holder)?;
            }
        }
        Ok(())
    }
}

/// JSON object keys must be strings, so records serialize as a list of
/// `{ object, record }` entries.
mod records_as_list {
    use super::{ObjectRef, RecordSnapshot};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize)]
    struct Entry {
        object: ObjectRef,
        #[serde(flatten)]
        record: RecordSnapshot,
    }

    pub fn serialize<S: Serializer>(
        records: &BTreeMap<ObjectRef, RecordSnapshot>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<_> = records
            .iter()
            .map(|(object, record)| Entry {
                object: object.clone(),
                record: record.clone(),
            })
            .collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ObjectRef, RecordSnapshot>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.object, e.record)).collect())
    }
}
