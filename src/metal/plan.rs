//! VLAN diffing and batch construction.

use std::collections::BTreeSet;
use std::fmt;

use super::desired::DesiredConfig;
use super::model::{Port, VlanAssignment};

/// Elements of `a` that are not in `b`.
pub fn difference(a: &BTreeSet<String>, b: &BTreeSet<String>) -> BTreeSet<String> {
    a.difference(b).cloned().collect()
}

/// VLAN changes for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionPlan {
    /// Attached but not desired.
    pub vlans_to_remove: BTreeSet<String>,
    /// Desired but not attached. Always empty for a remove-only plan.
    pub vlans_to_assign: BTreeSet<String>,
    /// Assignment that gets the native flag.
    pub native_vlan_target: Option<String>,
}

impl TransitionPlan {
    /// Diff `attached` against `desired`.
    ///
    /// With `remove_only` the assignments are left out so that removals can
    /// be applied before any bond or mode change.
    pub fn compute(
        attached: &BTreeSet<String>,
        desired: &BTreeSet<String>,
        native_reference: Option<&str>,
        remove_only: bool,
    ) -> Self {
        let vlans_to_remove = difference(attached, desired);
        if remove_only {
            return Self {
                vlans_to_remove,
                ..Self::default()
            };
        }

        let vlans_to_assign = difference(desired, attached);
        let native_vlan_target = native_reference
            .filter(|native| vlans_to_assign.contains(*native))
            .map(str::to_string);
        Self {
            vlans_to_remove,
            vlans_to_assign,
            native_vlan_target,
        }
    }

    /// Whether the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.vlans_to_remove.is_empty() && self.vlans_to_assign.is_empty()
    }

    /// Batch items: every removal, then every assignment.
    pub fn batch(&self) -> Vec<VlanAssignment> {
        let removals = self
            .vlans_to_remove
            .iter()
            .map(|vlan| VlanAssignment::unassign(vlan.as_str()));
        let assignments = self.vlans_to_assign.iter().map(|vlan| {
            let native = self.native_vlan_target.as_ref() == Some(vlan);
            VlanAssignment::assign(vlan, native)
        });
        removals.chain(assignments).collect()
    }
}

/// A mutating operation a reconciliation pass would perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedOperation {
    /// Detach VLANs.
    RemoveVlans(BTreeSet<String>),
    /// Remove the port from its bond.
    Disbond,
    /// Switch to layer2.
    ConvertToLayer2,
    /// Add the port to its bond.
    Bond,
    /// Switch to layer3.
    ConvertToLayer3,
    /// Attach VLANs.
    AssignVlans(BTreeSet<String>),
    /// Set the native VLAN.
    AssignNativeVlan(String),
    /// Clear the native VLAN.
    RemoveNativeVlan,
}

impl fmt::Display for PlannedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoveVlans(vlans) => write!(f, "remove {} vlan(s)", vlans.len()),
            Self::Disbond => f.write_str("disbond"),
            Self::ConvertToLayer2 => f.write_str("toLayer2"),
            Self::Bond => f.write_str("bond"),
            Self::ConvertToLayer3 => f.write_str("toLayer3"),
            Self::AssignVlans(vlans) => write!(f, "assign {} vlan(s)", vlans.len()),
            Self::AssignNativeVlan(vlan) => write!(f, "assignNativeVlan {}", vlan),
            Self::RemoveNativeVlan => f.write_str("removeNativeVlan"),
        }
    }
}

/// Preview the operations a pass would run against `port`, in pass order.
///
/// Bond and mode changes are judged from the current snapshot only; a
/// disbond that implies a later layer change is not chained.
pub fn planned_operations(port: &Port, desired: &DesiredConfig) -> Vec<PlannedOperation> {
    let mut operations = Vec::new();
    let attached = port.attached_vlan_ids();
    let wanted = desired.vlans.resolve(port);

    let removals = difference(&attached, &wanted);
    if !removals.is_empty() {
        operations.push(PlannedOperation::RemoveVlans(removals));
    }
    if port.bonded && !desired.bonded {
        operations.push(PlannedOperation::Disbond);
    }
    if desired.layer2 == Some(true) && !port.is_layer2() {
        operations.push(PlannedOperation::ConvertToLayer2);
    }
    if !port.bonded && desired.bonded {
        operations.push(PlannedOperation::Bond);
    }
    if desired.layer2 == Some(false) && port.is_layer2() {
        operations.push(PlannedOperation::ConvertToLayer3);
    }
    let assignments = difference(&wanted, &attached);
    if !assignments.is_empty() {
        operations.push(PlannedOperation::AssignVlans(assignments));
    }
    match (desired.native_vlan_id.as_deref(), port.native_vlan_id()) {
        (Some(target), current) if current != Some(target) => {
            operations.push(PlannedOperation::AssignNativeVlan(target.to_string()));
        },
        (None, Some(_)) => operations.push(PlannedOperation::RemoveNativeVlan),
        _ => {},
    }
    operations
}
