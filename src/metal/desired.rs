//! Declared port configuration.
//!
//! [`DesiredConfig`] is built once per reconciliation pass, either through
//! [`DesiredConfigBuilder`] or from resource JSON with
//! [`DesiredConfig::from_config`].

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::Value;

use super::model::Port;
use crate::error::ReconcileError;

/// How the desired VLAN set was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlanSelector {
    /// By VLAN id.
    ById(BTreeSet<String>),
    /// By VXLAN tag.
    ByVxlan(BTreeSet<u32>),
}

impl Default for VlanSelector {
    fn default() -> Self {
        Self::ById(BTreeSet::new())
    }
}

impl VlanSelector {
    /// Number of declared VLANs.
    pub fn len(&self) -> usize {
        match self {
            Self::ById(ids) => ids.len(),
            Self::ByVxlan(tags) => tags.len(),
        }
    }

    /// Whether no VLAN is declared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the declaration to VLAN identifiers against a snapshot.
    ///
    /// A VXLAN tag maps to the id of the attached VLAN carrying it. Tags
    /// that are not attached yet are kept in decimal form; the batch API
    /// accepts those as VLAN identifiers.
    pub fn resolve(&self, port: &Port) -> BTreeSet<String> {
        match self {
            Self::ById(ids) => ids.clone(),
            Self::ByVxlan(tags) => tags
                .iter()
                .map(|tag| {
                    port.vlans
                        .iter()
                        .find(|v| v.vxlan == Some(*tag))
                        .map_or_else(|| tag.to_string(), |v| v.id.clone())
                })
                .collect(),
        }
    }
}

/// The declared state a port should converge to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredConfig {
    /// Whether the port should be bonded.
    pub bonded: bool,
    /// Target layer2 (`true`) or layer3 (`false`) mode; `None` leaves it alone.
    pub layer2: Option<bool>,
    /// Target native VLAN id.
    pub native_vlan_id: Option<String>,
    /// Target VLAN set.
    pub vlans: VlanSelector,
    /// Reset the port to defaults when the resource is removed.
    pub reset_on_delete: bool,
}

impl DesiredConfig {
    /// Start building a configuration.
    pub fn builder(bonded: bool) -> DesiredConfigBuilder {
        DesiredConfigBuilder::new(bonded)
    }

    /// The default port state: bonded, layer3, no native VLAN, no VLANs.
    pub fn reset_defaults() -> Self {
        Self {
            bonded: true,
            layer2: Some(false),
            native_vlan_id: None,
            vlans: VlanSelector::default(),
            reset_on_delete: false,
        }
    }

    /// Read the configuration from resource JSON.
    ///
    /// `vlan_ids` and `vxlan_ids` are mutually exclusive; a null or empty
    /// list counts as not declared. Empty strings count as absent.
    pub fn from_config(config: &Value) -> Result<Self, ReconcileError> {
        let raw: RawPortConfig = serde_json::from_value(config.clone())
            .map_err(|e| ReconcileError::Configuration(e.to_string()))?;

        let mut builder = Self::builder(raw.bonded)
            .reset_on_delete(raw.reset_on_delete.unwrap_or(false));
        if let Some(layer2) = raw.layer2 {
            builder = builder.layer2(layer2);
        }
        if let Some(native) = raw.native_vlan_id.filter(|v| !v.is_empty()) {
            builder = builder.native_vlan(native);
        }
        if let Some(ids) = raw.vlan_ids.filter(|v| !v.is_empty()) {
            builder = builder.vlan_ids(ids);
        }
        if let Some(tags) = raw.vxlan_ids.filter(|v| !v.is_empty()) {
            builder = builder.vxlan_ids(tags);
        }
        builder.build()
    }

    /// Check the invariants that do not depend on the port.
    ///
    /// Native VLAN membership can only be checked here when VLANs are
    /// declared by id. A native VLAN cannot be combined with VXLAN tags.
    pub fn check_static(&self) -> Result<(), ReconcileError> {
        match (&self.native_vlan_id, &self.vlans) {
            (Some(native), VlanSelector::ById(ids)) => check_native(native, ids),
            (Some(_), VlanSelector::ByVxlan(_)) => Err(native_with_vxlan()),
            (None, _) => Ok(()),
        }
    }

    /// Check the declared state against the port it applies to.
    ///
    /// `vlan_ids` is the declared VLAN set resolved against the port.
    pub fn validate(&self, port: &Port, vlan_ids: &BTreeSet<String>) -> Result<(), ReconcileError> {
        let is_bond_port = port.is_bond_port();

        if self.layer2.is_some() && !is_bond_port {
            return Err(ReconcileError::Configuration(
                "layer2 flag can be set only for bond ports".to_string(),
            ));
        }

        let layer2 = self.layer2.unwrap_or_else(|| port.is_layer2());
        if is_bond_port && !layer2 && !self.bonded {
            return Err(ReconcileError::Configuration(
                "bond port in Layer3 can't be unbonded".to_string(),
            ));
        }

        if let Some(native) = &self.native_vlan_id {
            if matches!(self.vlans, VlanSelector::ByVxlan(_)) {
                return Err(native_with_vxlan());
            }
            check_native(native, vlan_ids)?;
        }
        Ok(())
    }
}

fn native_with_vxlan() -> ReconcileError {
    ReconcileError::Configuration(
        "native_vlan_id requires VLANs declared by id in vlan_ids, not by vxlan_ids".to_string(),
    )
}

fn check_native(native: &str, vlan_ids: &BTreeSet<String>) -> Result<(), ReconcileError> {
    if !vlan_ids.contains(native) {
        return Err(ReconcileError::Configuration(
            "the native VLAN to be set is not (being) assigned to the port".to_string(),
        ));
    }
    if vlan_ids.len() < 2 {
        return Err(ReconcileError::Configuration(
            "native VLAN can only be set if more than one VLAN are assigned to the port"
                .to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RawPortConfig {
    bonded: bool,
    #[serde(default)]
    layer2: Option<bool>,
    #[serde(default)]
    native_vlan_id: Option<String>,
    #[serde(default)]
    vlan_ids: Option<Vec<String>>,
    #[serde(default)]
    vxlan_ids: Option<Vec<u32>>,
    #[serde(default)]
    reset_on_delete: Option<bool>,
}

/// Builder for [`DesiredConfig`].
#[derive(Debug, Clone)]
pub struct DesiredConfigBuilder {
    bonded: bool,
    layer2: Option<bool>,
    native_vlan_id: Option<String>,
    vlan_ids: Option<BTreeSet<String>>,
    vxlan_ids: Option<BTreeSet<u32>>,
    reset_on_delete: bool,
}

impl DesiredConfigBuilder {
    fn new(bonded: bool) -> Self {
        Self {
            bonded,
            layer2: None,
            native_vlan_id: None,
            vlan_ids: None,
            vxlan_ids: None,
            reset_on_delete: false,
        }
    }

    /// Target layer2 (`true`) or layer3 (`false`).
    pub fn layer2(mut self, layer2: bool) -> Self {
        self.layer2 = Some(layer2);
        self
    }

    /// Target native VLAN.
    pub fn native_vlan(mut self, vlan_id: impl Into<String>) -> Self {
        self.native_vlan_id = Some(vlan_id.into());
        self
    }

    /// Declare the VLAN set by id.
    pub fn vlan_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vlan_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Declare the VLAN set by VXLAN tag.
    pub fn vxlan_ids(mut self, tags: impl IntoIterator<Item = u32>) -> Self {
        self.vxlan_ids = Some(tags.into_iter().collect());
        self
    }

    /// Reset the port to defaults on resource removal.
    pub fn reset_on_delete(mut self, reset: bool) -> Self {
        self.reset_on_delete = reset;
        self
    }

    /// Finish the configuration.
    pub fn build(self) -> Result<DesiredConfig, ReconcileError> {
        let vlans = match (self.vlan_ids, self.vxlan_ids) {
            (Some(_), Some(_)) => {
                return Err(ReconcileError::Configuration(
                    "vlan_ids and vxlan_ids are mutually exclusive".to_string(),
                ))
            },
            (Some(ids), None) => VlanSelector::ById(ids),
            (None, Some(tags)) => VlanSelector::ByVxlan(tags),
            (None, None) => VlanSelector::default(),
        };
        Ok(DesiredConfig {
            bonded: self.bonded,
            layer2: self.layer2,
            native_vlan_id: self.native_vlan_id,
            vlans,
            reset_on_delete: self.reset_on_delete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metal::model::{NetworkType, VlanRef};
    use serde_json::json;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_from_config_by_id() {
        let desired = DesiredConfig::from_config(&json!({
            "port_id": "p1",
            "bonded": true,
            "layer2": false,
            "native_vlan_id": "v1",
            "vlan_ids": ["v2", "v1"],
            "vxlan_ids": null,
            "reset_on_delete": true
        }))
        .unwrap();

        assert!(desired.bonded);
        assert_eq!(desired.layer2, Some(false));
        assert_eq!(desired.native_vlan_id.as_deref(), Some("v1"));
        assert_eq!(desired.vlans, VlanSelector::ById(ids(&["v1", "v2"])));
        assert!(desired.reset_on_delete);
    }

    #[test]
    fn test_from_config_by_vxlan() {
        let desired = DesiredConfig::from_config(&json!({
            "bonded": false,
            "layer2": true,
            "vxlan_ids": [1001, 1000],
            "vlan_ids": []
        }))
        .unwrap();

        assert_eq!(desired.vlans, VlanSelector::ByVxlan(BTreeSet::from([1000, 1001])));
        assert_eq!(desired.native_vlan_id, None);
        assert!(!desired.reset_on_delete);
    }

    #[test]
    fn test_from_config_rejects_both_selectors() {
        let err = DesiredConfig::from_config(&json!({
            "bonded": true,
            "vlan_ids": ["v1"],
            "vxlan_ids": [1000]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_from_config_requires_bonded() {
        let err = DesiredConfig::from_config(&json!({"vlan_ids": ["v1"]})).unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
    }

    #[test]
    fn test_vxlan_resolution_prefers_attached_ids() {
        let port = Port::bond("p1", "bond0").with_vlans([VlanRef::new("v-1000", 1000)]);
        let selector = VlanSelector::ByVxlan(BTreeSet::from([1000, 1001]));
        assert_eq!(selector.resolve(&port), ids(&["1001", "v-1000"]));
    }

    #[test]
    fn test_layer2_requires_bond_port() {
        let port = Port::member("p1", "eth1");
        let desired = DesiredConfig::builder(true).layer2(true).build().unwrap();
        let err = desired.validate(&port, &BTreeSet::new()).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Configuration("layer2 flag can be set only for bond ports".to_string())
        );
    }

    #[test]
    fn test_layer3_bond_port_cannot_unbond() {
        let port = Port::bond("p1", "bond0");
        let desired = DesiredConfig::builder(false).layer2(false).build().unwrap();
        let err = desired.validate(&port, &BTreeSet::new()).unwrap_err();
        assert!(err.to_string().contains("can't be unbonded"));

        // Without a declared layer2 flag the current mode decides.
        let desired = DesiredConfig::builder(false).build().unwrap();
        assert!(desired.validate(&port, &BTreeSet::new()).is_err());

        let layer2_port = port.with_network_type(NetworkType::Layer2Bonded);
        assert!(desired.validate(&layer2_port, &BTreeSet::new()).is_ok());
    }

    #[test]
    fn test_native_vlan_membership_and_count() {
        let port = Port::bond("p1", "bond0");

        let desired = DesiredConfig::builder(true)
            .native_vlan("v3")
            .vlan_ids(["v1", "v2"])
            .build()
            .unwrap();
        let err = desired.validate(&port, &ids(&["v1", "v2"])).unwrap_err();
        assert!(err.to_string().contains("not (being) assigned"));
        assert!(desired.check_static().is_err());

        let desired = DesiredConfig::builder(true)
            .native_vlan("v1")
            .vlan_ids(["v1"])
            .build()
            .unwrap();
        let err = desired.validate(&port, &ids(&["v1"])).unwrap_err();
        assert!(err.to_string().contains("more than one VLAN"));

        let desired = DesiredConfig::builder(true)
            .native_vlan("v1")
            .vlan_ids(["v1", "v2"])
            .build()
            .unwrap();
        assert!(desired.validate(&port, &ids(&["v1", "v2"])).is_ok());
        assert!(desired.check_static().is_ok());
    }

    #[test]
    fn test_native_vlan_rejected_with_vxlan_tags() {
        let port = Port::bond("p1", "bond0")
            .with_network_type(NetworkType::Layer2Bonded)
            .with_vlans([VlanRef::new("v1", 1000), VlanRef::new("v2", 1001)]);
        let desired = DesiredConfig::builder(true)
            .native_vlan("1001")
            .vxlan_ids([1000, 1001])
            .build()
            .unwrap();

        let err = desired.check_static().unwrap_err();
        assert!(err.to_string().contains("requires VLANs declared by id"));

        // Rejected the same way whether or not the tags are attached yet.
        let resolved = desired.vlans.resolve(&port);
        assert_eq!(resolved, ids(&["v1", "v2"]));
        assert_eq!(desired.validate(&port, &resolved).unwrap_err(), err);
        let fresh = Port::bond("p1", "bond0").with_network_type(NetworkType::Layer2Bonded);
        let resolved = desired.vlans.resolve(&fresh);
        assert_eq!(desired.validate(&fresh, &resolved).unwrap_err(), err);
    }

    #[test]
    fn test_reset_defaults() {
        let desired = DesiredConfig::reset_defaults();
        assert!(desired.bonded);
        assert_eq!(desired.layer2, Some(false));
        assert!(desired.vlans.is_empty());
        assert!(desired.native_vlan_id.is_none());
    }
}
