//! Port, VLAN and batch types exchanged with the Metal API.
//!
//! A [`Port`] is an immutable snapshot: every upstream operation returns a
//! fresh one, and the reconciliation pass threads the latest snapshot from
//! step to step instead of mutating a shared value.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a port is a physical member port or a logical bond port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// A physical port (`eth0`, `eth1`, ...).
    #[serde(rename = "NetworkPort")]
    Individual,
    /// A logical bond port (`bond0`, ...). Layer2/layer3 mode is set here.
    #[serde(rename = "NetworkBondPort")]
    Bond,
}

impl PortType {
    /// The name the Metal API uses for this port type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "NetworkPort",
            Self::Bond => "NetworkBondPort",
        }
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The network mode of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    /// Routed, bonded, no VLANs.
    Layer3,
    /// Routed on the bond with VLANs on an unbonded member.
    Hybrid,
    /// Routed and bonded, with VLANs on the bond.
    HybridBonded,
    /// Pure layer2 on the bond.
    Layer2Bonded,
    /// Pure layer2 on individual members.
    Layer2Individual,
}

impl NetworkType {
    /// All network types, in the order the API documents them.
    pub const ALL: [NetworkType; 5] = [
        NetworkType::Layer2Bonded,
        NetworkType::Layer2Individual,
        NetworkType::Layer3,
        NetworkType::Hybrid,
        NetworkType::HybridBonded,
    ];

    /// The wire name of this network type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Layer3 => "layer3",
            Self::Hybrid => "hybrid",
            Self::HybridBonded => "hybrid-bonded",
            Self::Layer2Bonded => "layer2-bonded",
            Self::Layer2Individual => "layer2-individual",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Whether this is one of the layer2 modes.
    pub fn is_layer2(&self) -> bool {
        matches!(self, Self::Layer2Bonded | Self::Layer2Individual)
    }

    /// Whether this is one of the layer3 (routed) modes.
    pub fn is_layer3(&self) -> bool {
        matches!(self, Self::Layer3 | Self::Hybrid | Self::HybridBonded)
    }

    /// The layer2 mode matching a bond state.
    pub fn layer2_for(bonded: bool) -> Self {
        if bonded {
            Self::Layer2Bonded
        } else {
            Self::Layer2Individual
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference to a virtual network (VLAN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VlanRef {
    /// Opaque VLAN id (UUID).
    pub id: String,
    /// Metro-local VXLAN tag, when the API expanded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan: Option<u32>,
}

impl VlanRef {
    /// A VLAN reference with a known VXLAN tag.
    pub fn new(id: impl Into<String>, vxlan: u32) -> Self {
        Self {
            id: id.into(),
            vxlan: Some(vxlan),
        }
    }

    /// A VLAN reference carrying only its id.
    pub fn id_only(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vxlan: None,
        }
    }
}

/// Back-reference from a member port to the bond that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondRef {
    /// Bond port id.
    pub id: String,
    /// Bond port name, e.g. `bond0`.
    pub name: String,
}

/// Snapshot of a network port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Port id.
    pub id: String,
    /// Port name, e.g. `bond0` or `eth1`.
    pub name: String,
    /// Individual or bond port.
    #[serde(rename = "type")]
    pub port_type: PortType,
    /// Network mode. The API only reports it for bond ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_type: Option<NetworkType>,
    /// MAC address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Whether the port is currently part of a bond.
    pub bonded: bool,
    /// Whether the port can be removed from its bond.
    #[serde(default)]
    pub disbond_supported: bool,
    /// VLAN receiving untagged traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_vlan: Option<VlanRef>,
    /// Attached VLANs.
    #[serde(default)]
    pub vlans: Vec<VlanRef>,
    /// Owning bond, for bonded member ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bond: Option<BondRef>,
}

impl Port {
    /// A bond port in the API's default state: bonded, layer3, no VLANs.
    pub fn bond(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            port_type: PortType::Bond,
            network_type: Some(NetworkType::Layer3),
            mac: None,
            bonded: true,
            disbond_supported: true,
            native_vlan: None,
            vlans: Vec::new(),
            bond: None,
        }
    }

    /// A bonded member port.
    pub fn member(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            port_type: PortType::Individual,
            network_type: None,
            ..Self::bond(id, name)
        }
    }

    /// Replace the network type.
    pub fn with_network_type(mut self, network_type: NetworkType) -> Self {
        self.network_type = Some(network_type);
        self
    }

    /// Replace the bonded flag.
    pub fn with_bonded(mut self, bonded: bool) -> Self {
        self.bonded = bonded;
        self
    }

    /// Replace the attached VLANs.
    pub fn with_vlans(mut self, vlans: impl IntoIterator<Item = VlanRef>) -> Self {
        self.vlans = vlans.into_iter().collect();
        self
    }

    /// Replace the native VLAN.
    pub fn with_native_vlan(mut self, vlan: VlanRef) -> Self {
        self.native_vlan = Some(vlan);
        self
    }

    /// Set the owning bond.
    pub fn with_bond(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.bond = Some(BondRef {
            id: id.into(),
            name: name.into(),
        });
        self
    }

    /// Set the MAC address.
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    /// Whether this is a bond port.
    pub fn is_bond_port(&self) -> bool {
        self.port_type == PortType::Bond
    }

    /// Whether the port currently runs in a layer2 mode.
    pub fn is_layer2(&self) -> bool {
        self.network_type.is_some_and(|t| t.is_layer2())
    }

    /// Whether the port currently runs in a layer3 mode.
    pub fn is_layer3(&self) -> bool {
        self.network_type.is_some_and(|t| t.is_layer3())
    }

    /// Id of the native VLAN, if any.
    pub fn native_vlan_id(&self) -> Option<&str> {
        self.native_vlan.as_ref().map(|v| v.id.as_str())
    }

    /// Ids of the attached VLANs.
    pub fn attached_vlan_ids(&self) -> BTreeSet<String> {
        self.vlans.iter().map(|v| v.id.clone()).collect()
    }

    /// The snapshot expected once a VLAN batch has completed.
    ///
    /// Removing the native VLAN clears it. The native flag of assignments is
    /// not reflected; the native VLAN is only trusted once the API reports it.
    pub fn with_batch_applied(
        &self,
        removed: &BTreeSet<String>,
        assigned: &BTreeSet<String>,
    ) -> Port {
        let mut port = self.clone();
        port.vlans.retain(|v| !removed.contains(&v.id));
        if port.native_vlan_id().is_some_and(|id| removed.contains(id)) {
            port.native_vlan = None;
        }
        for id in assigned {
            if !port.vlans.iter().any(|v| &v.id == id) {
                port.vlans.push(VlanRef::id_only(id.clone()));
            }
        }
        port
    }

    /// Describe how `network_type` contradicts `bonded`, if it does.
    pub fn consistency_violation(&self) -> Option<String> {
        let network_type = self.network_type?;
        let needs_bond = match network_type {
            NetworkType::Layer2Bonded | NetworkType::HybridBonded => Some(true),
            NetworkType::Layer2Individual => Some(false),
            NetworkType::Layer3 | NetworkType::Hybrid => None,
        };
        match needs_bond {
            Some(expected) if expected != self.bonded => Some(format!(
                "port {} reports network type {} while bonded={}",
                self.id, network_type, self.bonded
            )),
            _ => None,
        }
    }
}

/// An IP address block requested when converting a port to layer3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRequest {
    /// 4 or 6.
    pub address_family: u8,
    /// Public or private address block.
    pub public: bool,
}

impl AddressRequest {
    /// The address triple requested on layer3 conversion:
    /// public IPv4, private IPv4 and public IPv6.
    pub fn layer3_defaults() -> Vec<AddressRequest> {
        vec![
            AddressRequest {
                address_family: 4,
                public: true,
            },
            AddressRequest {
                address_family: 4,
                public: false,
            },
            AddressRequest {
                address_family: 6,
                public: true,
            },
        ]
    }
}

/// Requested state of a single VLAN in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentState {
    /// Attach the VLAN.
    Assigned,
    /// Detach the VLAN.
    Unassigned,
}

/// One item of a VLAN assignment batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanAssignment {
    /// VLAN id, or a VXLAN tag in decimal form.
    pub vlan: String,
    /// Requested state.
    pub state: AssignmentState,
    /// Native flag, only sent for assignments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<bool>,
}

impl VlanAssignment {
    /// Attach `vlan`, optionally as the native VLAN.
    pub fn assign(vlan: impl Into<String>, native: bool) -> Self {
        Self {
            vlan: vlan.into(),
            state: AssignmentState::Assigned,
            native: Some(native),
        }
    }

    /// Detach `vlan`.
    pub fn unassign(vlan: impl Into<String>) -> Self {
        Self {
            vlan: vlan.into(),
            state: AssignmentState::Unassigned,
            native: None,
        }
    }
}

/// Server-side state of a VLAN assignment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Accepted, not started.
    Queued,
    /// Being applied.
    InProgress,
    /// Applied.
    Completed,
    /// Rejected or partially applied.
    Failed,
}

impl BatchState {
    /// Whether the batch has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A submitted VLAN assignment batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanAssignmentBatch {
    /// Batch id.
    pub id: String,
    /// Current state.
    pub state: BatchState,
    /// Messages reported by the API when the batch failed.
    #[serde(default)]
    pub error_messages: Vec<String>,
}
