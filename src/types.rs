//! Values exchanged between the host and the provider.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Attribute name.
    pub path: String,
    /// Value before the change, `None` if the attribute is being set.
    pub before: Option<Value>,
    /// Value after the change, `None` if the attribute is being cleared.
    pub after: Option<Value>,
}

impl AttributeChange {
    /// Create an attribute change.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }

    /// A change that sets a previously unset attribute.
    pub fn added(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, None, Some(value))
    }

    /// A change that clears an attribute.
    pub fn removed(path: impl Into<String>, value: Value) -> Self {
        Self::new(path, Some(value), None)
    }

    /// A change from one value to another.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }
}

/// The result of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State expected once the plan is applied.
    pub planned_state: Value,
    /// Attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource must be replaced.
    pub requires_replace: bool,
}

impl PlanResult {
    /// A plan that changes nothing.
    pub fn no_change(state: Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// A plan with changes.
    pub fn with_changes(
        planned_state: Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }

    /// Whether applying the plan does anything.
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || self.requires_replace
    }
}

/// A resource brought under management by import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Resource type.
    pub resource_type: String,
    /// Imported state.
    pub state: Value,
}

impl ImportedResource {
    /// Create an imported resource.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Resource and data source names a provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource type names.
    pub resources: Vec<String>,
    /// Data source type names.
    pub data_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_change_constructors() {
        let added = AttributeChange::added("native_vlan_id", json!("v1"));
        assert!(added.before.is_none());
        assert_eq!(added.after, Some(json!("v1")));

        let removed = AttributeChange::removed("native_vlan_id", json!("v1"));
        assert_eq!(removed.before, Some(json!("v1")));
        assert!(removed.after.is_none());

        let modified = AttributeChange::modified("bonded", json!(true), json!(false));
        assert_eq!(modified.before, Some(json!(true)));
        assert_eq!(modified.after, Some(json!(false)));
    }

    #[test]
    fn test_plan_result() {
        let no_change = PlanResult::no_change(json!({"id": "p1"}));
        assert!(!no_change.has_changes());

        let replace = PlanResult::with_changes(json!({"id": "p2"}), vec![], true);
        assert!(replace.has_changes());

        let update = PlanResult::with_changes(
            json!({"id": "p1", "bonded": false}),
            vec![AttributeChange::modified("bonded", json!(true), json!(false))],
            false,
        );
        assert!(update.has_changes());
        assert!(!update.requires_replace);
    }

    #[test]
    fn test_imported_resource() {
        let imported = ImportedResource::new("equinix_metal_port", json!({"id": "p1"}));
        assert_eq!(imported.resource_type, "equinix_metal_port");
        assert_eq!(imported.state["id"], "p1");
    }
}
