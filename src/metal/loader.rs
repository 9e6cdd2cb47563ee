//! Port snapshot loading.

use tracing::{debug, warn};

use super::api::MetalPortApi;
use super::model::Port;
use crate::error::ReconcileError;

/// How a port is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortLocator {
    /// By port id.
    Id(String),
    /// By owning device and port name.
    DeviceName {
        /// Device id.
        device_id: String,
        /// Port name, e.g. `bond0`.
        name: String,
    },
}

impl PortLocator {
    /// Pick the addressing mode from declared attributes.
    ///
    /// `resource_id` is the id of an already-managed (or imported) resource
    /// and stands in for a missing `port_id`. For a resource without an id,
    /// `port_id` and the (`device_id`, `name`) pair are mutually exclusive.
    /// Empty strings count as absent.
    pub fn resolve(
        port_id: Option<&str>,
        resource_id: Option<&str>,
        device_id: Option<&str>,
        name: Option<&str>,
    ) -> Result<Self, ReconcileError> {
        let port_id = present(port_id);
        let resource_id = present(resource_id);
        let device_id = present(device_id);
        let name = present(name);

        if resource_id.is_none() && port_id.is_some() && (device_id.is_some() || name.is_some()) {
            return Err(ReconcileError::Configuration(
                "you must specify either port_id or (device_id and name)".to_string(),
            ));
        }

        match (port_id.or(resource_id), device_id, name) {
            (Some(id), _, _) => Ok(Self::Id(id.to_string())),
            (None, Some(device_id), Some(name)) => Ok(Self::DeviceName {
                device_id: device_id.to_string(),
                name: name.to_string(),
            }),
            _ => Err(ReconcileError::Configuration(
                "if you don't use port_id, you must supply both device_id and name".to_string(),
            )),
        }
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Fetch the current snapshot of a port.
///
/// Upstream 404 and 403 become [`ReconcileError::NotFound`] and
/// [`ReconcileError::AccessDenied`]; anything else is
/// [`ReconcileError::Transient`]. Nothing is retried here.
pub async fn load_port<A>(api: &A, locator: &PortLocator) -> Result<Port, ReconcileError>
where
    A: MetalPortApi + ?Sized,
{
    let port = match locator {
        PortLocator::Id(id) => api.get_port(id).await?,
        PortLocator::DeviceName { device_id, name } => {
            api.get_device_port(device_id, name).await?
        },
    };

    if let Some(violation) = port.consistency_violation() {
        warn!(port_id = %port.id, "{}", violation);
    }
    debug!(
        port_id = %port.id,
        bonded = port.bonded,
        network_type = ?port.network_type,
        vlans = port.vlans.len(),
        "Loaded port snapshot"
    );
    Ok(port)
}
