//! The Metal API operations the port reconciler needs.
//!
//! Transport, authentication and retries live behind this trait. The
//! reconciler only sees typed snapshots and the three failure kinds below.

use thiserror::Error;

use super::model::{AddressRequest, Port, VlanAssignment, VlanAssignmentBatch};

/// Failure reported by a [`MetalPortApi`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The addressed object does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller may not access the object (HTTP 403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// Port operations exposed by the Metal API.
///
/// Every method that changes a port returns the port as the API reports it
/// afterwards. Snapshots returned by `get_port` and `get_device_port` include
/// the native VLAN and the attached VLANs.
#[async_trait::async_trait]
pub trait MetalPortApi: Send + Sync + 'static {
    /// Fetch a port by id.
    async fn get_port(&self, port_id: &str) -> Result<Port, ApiError>;

    /// Fetch a port by owning device and port name.
    async fn get_device_port(&self, device_id: &str, name: &str) -> Result<Port, ApiError>;

    /// Remove the port from its bond.
    async fn disbond(&self, port_id: &str) -> Result<Port, ApiError>;

    /// Add the port to its bond.
    async fn bond(&self, port_id: &str) -> Result<Port, ApiError>;

    /// Switch the port to layer2.
    async fn convert_to_layer2(&self, port_id: &str) -> Result<Port, ApiError>;

    /// Switch the port to layer3, requesting the given address blocks.
    async fn convert_to_layer3(
        &self,
        port_id: &str,
        addresses: &[AddressRequest],
    ) -> Result<Port, ApiError>;

    /// Make an attached VLAN the native VLAN.
    async fn assign_native(&self, port_id: &str, vlan_id: &str) -> Result<Port, ApiError>;

    /// Clear the native VLAN.
    async fn unassign_native(&self, port_id: &str) -> Result<Port, ApiError>;

    /// Submit a VLAN assignment batch.
    async fn create_vlan_batch(
        &self,
        port_id: &str,
        assignments: &[VlanAssignment],
    ) -> Result<VlanAssignmentBatch, ApiError>;

    /// Fetch the current state of a VLAN assignment batch.
    async fn get_vlan_batch(
        &self,
        port_id: &str,
        batch_id: &str,
    ) -> Result<VlanAssignmentBatch, ApiError>;
}
