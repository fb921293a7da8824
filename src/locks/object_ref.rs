//! Stable identities of lockable domain objects.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of domain object that can be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    VirtualizationConnector,
    ApplianceManagerConnector,
    DistributedAppliance,
    VirtualSystem,
    DeploymentSpec,
    DistributedApplianceInstance,
    SecurityGroup,
    SecurityGroupInterface,
    SslConfiguration,
    Job,
    Email,
    Network,
    Archive,
    Alert,
}

impl ObjectKind {
    /// Get the snake_case name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::VirtualizationConnector => "virtualization_connector",
            ObjectKind::ApplianceManagerConnector => "appliance_manager_connector",
            ObjectKind::DistributedAppliance => "distributed_appliance",
            ObjectKind::VirtualSystem => "virtual_system",
            ObjectKind::DeploymentSpec => "deployment_spec",
            ObjectKind::DistributedApplianceInstance => "distributed_appliance_instance",
            ObjectKind::SecurityGroup => "security_group",
            ObjectKind::SecurityGroupInterface => "security_group_interface",
            ObjectKind::SslConfiguration => "ssl_configuration",
            ObjectKind::Job => "job",
            ObjectKind::Email => "email",
            ObjectKind::Network => "network",
            ObjectKind::Archive => "archive",
            ObjectKind::Alert => "alert",
        }
    }

    /// Human-readable label shown to operators.
    ///
    /// Kinds without a dedicated label fall back to their snake_case name.
    pub fn label(&self) -> &'static str {
        match self {
            ObjectKind::VirtualizationConnector => "Virtualization Connector",
            ObjectKind::ApplianceManagerConnector => "Manager Connector",
            ObjectKind::DistributedAppliance => "Distributed Appliance",
            ObjectKind::VirtualSystem => "Virtual System",
            ObjectKind::DeploymentSpec => "Deployment Specification",
            ObjectKind::DistributedApplianceInstance => "Distributed Appliance Instance",
            ObjectKind::SecurityGroup => "Security Group",
            ObjectKind::SecurityGroupInterface => "Security Group Interface",
            ObjectKind::SslConfiguration => "SSL Configuration",
            ObjectKind::Job => "Job",
            ObjectKind::Alert => "Alert",
            ObjectKind::Email | ObjectKind::Network | ObjectKind::Archive => self.as_str(),
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a lockable object: its kind and numeric id.
///
/// `display_name` is carried for diagnostics only. Two references to the same
/// `(kind, id)` are equal (and hash identically) whatever their names are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: u64,
    #[serde(default)]
    pub display_name: String,
}

impl ObjectRef {
    /// Create a reference with a display name.
    pub fn new(kind: ObjectKind, id: u64, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            display_name: display_name.into(),
        }
    }

    /// Create a reference without a display name.
    pub fn anonymous(kind: ObjectKind, id: u64) -> Self {
        Self::new(kind, id, String::new())
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for ObjectRef {}

impl Hash for ObjectRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for ObjectRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ObjectRef {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.kind, self.id).cmp(&(other.kind, other.id))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            write!(f, "{} ({})", self.kind, self.id)
        } else {
            write!(f, "{} '{}' ({})", self.kind, self.display_name, self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_display_name_does_not_affect_identity() {
        let a = ObjectRef::new(ObjectKind::SecurityGroup, 7, "web-tier");
        let b = ObjectRef::new(ObjectKind::SecurityGroup, 7, "renamed");

        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_kind_and_id_both_participate() {
        let vc = ObjectRef::anonymous(ObjectKind::VirtualizationConnector, 1);
        let mc = ObjectRef::anonymous(ObjectKind::ApplianceManagerConnector, 1);
        let vc2 = ObjectRef::anonymous(ObjectKind::VirtualizationConnector, 2);

        assert_ne!(vc, mc);
        assert_ne!(vc, vc2);
    }

    #[test]
    fn test_labels_fall_back_to_snake_case() {
        assert_eq!(ObjectKind::DeploymentSpec.label(), "Deployment Specification");
        assert_eq!(ObjectKind::ApplianceManagerConnector.label(), "Manager Connector");
        assert_eq!(ObjectKind::Network.label(), "network");
    }

    #[test]
    fn test_display_includes_name_when_present() {
        let named = ObjectRef::new(ObjectKind::Job, 12, "nightly-sync");
        assert_eq!(named.to_string(), "Job 'nightly-sync' (12)");

        let bare = ObjectRef::anonymous(ObjectKind::Job, 12);
        assert_eq!(bare.to_string(), "Job (12)");
    }

    #[test]
    fn test_kind_serializes_as_snake_case() {
        let json = serde_json::to_string(&ObjectKind::SecurityGroupInterface).unwrap();
        assert_eq!(json, "\"security_group_interface\"");
    }
}
