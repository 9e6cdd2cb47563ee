//! Test support: a provider harness and an in-memory Metal API.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through the same call
//! sequences a host would. [`FakeMetalApi`] keeps ports in memory, applies
//! VLAN batches once they complete, and records every call so tests can
//! assert on the exact order of upstream operations.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use equinix_metal_provider::metal::model::Port;
//! use equinix_metal_provider::metal::resource::{MetalProvider, PORT_RESOURCE};
//! use equinix_metal_provider::testing::{FakeMetalApi, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_attach_vlans() {
//!     let api = Arc::new(FakeMetalApi::new().with_port(Port::bond("p1", "bond0")));
//!     let tester = ProviderTester::new(MetalProvider::new(api.clone()));
//!
//!     let state = tester
//!         .lifecycle_create(PORT_RESOURCE, json!({"port_id": "p1", "bonded": true, "vlan_ids": ["v1"]}))
//!         .await
//!         .unwrap();
//!     assert_eq!(state["vlan_ids"], json!(["v1"]));
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::ProviderError;
use crate::metal::api::{ApiError, MetalPortApi};
use crate::metal::model::{
    AddressRequest, AssignmentState, BatchState, NetworkType, Port, VlanAssignment,
    VlanAssignmentBatch, VlanRef,
};
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The provider under test.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate and apply the provider configuration.
    ///
    /// Fails with the error diagnostics of either step.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config.clone()).await?;
        check_diagnostics(diagnostics)?;
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan a resource update to `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a resource.
    pub async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource.
    pub async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import a resource by id.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read back.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan the deletion, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone()).await?;
        self.delete(resource_type, current_state).await
    }
}

/// Failure of a harness operation that reports diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// Error diagnostics were returned.
    Diagnostics(Vec<Diagnostic>),
    /// The provider returned an error.
    Provider(ProviderError),
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  {}", diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan changes nothing.
///
/// # Panics
///
/// Panics if the plan has any change.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan replaces the resource.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan changes the resource in place.
///
/// # Panics
///
/// Panics if the plan has no change or requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(!plan.changes.is_empty(), "Expected plan to have changes");
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes `path`.
///
/// # Panics
///
/// Panics if no change is planned for `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}'. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that an error diagnostic mentions `substring` in its summary or detail.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let matches = diagnostics.iter().filter(|d| d.is_error()).any(|d| {
        d.summary.contains(substring)
            || d.detail.as_deref().is_some_and(|detail| detail.contains(substring))
    });
    assert!(
        matches,
        "Expected an error containing '{}'. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

/// A recorded [`FakeMetalApi`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// `get_port`.
    GetPort(String),
    /// `get_device_port`.
    GetDevicePort {
        /// Device id.
        device_id: String,
        /// Port name.
        name: String,
    },
    /// `disbond`.
    Disbond(String),
    /// `bond`.
    Bond(String),
    /// `convert_to_layer2`.
    ConvertToLayer2(String),
    /// `convert_to_layer3`.
    ConvertToLayer3(String),
    /// `assign_native`.
    AssignNative {
        /// Port id.
        port_id: String,
        /// VLAN id.
        vlan_id: String,
    },
    /// `unassign_native`.
    UnassignNative(String),
    /// `create_vlan_batch`.
    CreateVlanBatch {
        /// Port id.
        port_id: String,
        /// Submitted items, in order.
        assignments: Vec<VlanAssignment>,
    },
    /// `get_vlan_batch`.
    GetVlanBatch {
        /// Port id.
        port_id: String,
        /// Batch id.
        batch_id: String,
    },
}

impl ApiCall {
    /// Whether the call changes a port.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Self::GetPort(_) | Self::GetDevicePort { .. } | Self::GetVlanBatch { .. }
        )
    }

    fn operation(&self) -> Operation {
        match self {
            Self::GetPort(_) => Operation::GetPort,
            Self::GetDevicePort { .. } => Operation::GetDevicePort,
            Self::Disbond(_) => Operation::Disbond,
            Self::Bond(_) => Operation::Bond,
            Self::ConvertToLayer2(_) => Operation::ConvertToLayer2,
            Self::ConvertToLayer3(_) => Operation::ConvertToLayer3,
            Self::AssignNative { .. } => Operation::AssignNative,
            Self::UnassignNative(_) => Operation::UnassignNative,
            Self::CreateVlanBatch { .. } => Operation::CreateVlanBatch,
            Self::GetVlanBatch { .. } => Operation::GetVlanBatch,
        }
    }
}

/// A [`MetalPortApi`] operation, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get_port`.
    GetPort,
    /// `get_device_port`.
    GetDevicePort,
    /// `disbond`.
    Disbond,
    /// `bond`.
    Bond,
    /// `convert_to_layer2`.
    ConvertToLayer2,
    /// `convert_to_layer3`.
    ConvertToLayer3,
    /// `assign_native`.
    AssignNative,
    /// `unassign_native`.
    UnassignNative,
    /// `create_vlan_batch`.
    CreateVlanBatch,
    /// `get_vlan_batch`.
    GetVlanBatch,
}

/// How submitted batches progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchBehavior {
    /// Complete on the given poll. Changes are applied then.
    CompleteAfter(u32),
    /// Fail on the first poll with these messages. Nothing is applied.
    Fail(Vec<String>),
    /// Stay in progress forever.
    NeverComplete,
}

impl Default for BatchBehavior {
    fn default() -> Self {
        Self::CompleteAfter(1)
    }
}

#[derive(Debug)]
struct FakeBatch {
    port_id: String,
    assignments: Vec<VlanAssignment>,
    polls: u32,
    applied: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    ports: HashMap<String, Port>,
    device_ports: HashMap<(String, String), String>,
    vlans: BTreeMap<String, u32>,
    batches: HashMap<String, FakeBatch>,
    batch_behavior: BatchBehavior,
    failures: HashMap<Operation, ApiError>,
    calls: Vec<ApiCall>,
}

impl FakeState {
    /// Record `call` and return the injected failure for it, if any.
    fn record(&mut self, call: ApiCall) -> Result<(), ApiError> {
        let operation = call.operation();
        self.calls.push(call);
        match self.failures.get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn port_mut(&mut self, port_id: &str) -> Result<&mut Port, ApiError> {
        self.ports
            .get_mut(port_id)
            .ok_or_else(|| ApiError::NotFound(format!("port {}", port_id)))
    }

    /// The VLAN an assignment item refers to: by id, or by VXLAN tag.
    fn vlan_ref(&self, vlan: &str) -> VlanRef {
        if let Some(tag) = self.vlans.get(vlan) {
            return VlanRef::new(vlan, *tag);
        }
        vlan.parse::<u32>()
            .ok()
            .and_then(|tag| self.vlans.iter().find(|(_, t)| **t == tag))
            .map_or_else(|| VlanRef::id_only(vlan), |(id, tag)| VlanRef::new(id.clone(), *tag))
    }

    fn apply_batch(&mut self, port_id: &str, assignments: &[VlanAssignment]) {
        let resolved: Vec<_> = assignments
            .iter()
            .map(|item| (item, self.vlan_ref(&item.vlan)))
            .collect();
        let Some(port) = self.ports.get_mut(port_id) else {
            return;
        };
        for (item, vlan) in resolved {
            match item.state {
                AssignmentState::Unassigned => {
                    port.vlans.retain(|v| v.id != vlan.id);
                    if port.native_vlan_id() == Some(vlan.id.as_str()) {
                        port.native_vlan = None;
                    }
                },
                AssignmentState::Assigned => {
                    if item.native == Some(true) {
                        port.native_vlan = Some(vlan.clone());
                    }
                    if !port.vlans.iter().any(|v| v.id == vlan.id) {
                        port.vlans.push(vlan);
                    }
                },
            }
        }
    }
}

/// In-memory [`MetalPortApi`] that records every call.
///
/// Bond and mode changes follow the API: bonding moves `layer2-individual`
/// to `layer2-bonded` and `hybrid` to `hybrid-bonded`, disbonding does the
/// reverse, and layer3 conversion requires a bonded port.
#[derive(Debug, Default)]
pub struct FakeMetalApi {
    state: Mutex<FakeState>,
}

impl FakeMetalApi {
    /// Create an empty fake.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut FakeState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a port addressable by id.
    pub fn with_port(mut self, port: Port) -> Self {
        self.state_mut().ports.insert(port.id.clone(), port);
        self
    }

    /// Add a port addressable by id and by (`device_id`, port name).
    pub fn with_device_port(mut self, device_id: impl Into<String>, port: Port) -> Self {
        let key = (device_id.into(), port.name.clone());
        self.state_mut().device_ports.insert(key, port.id.clone());
        self.with_port(port)
    }

    /// Register a VLAN and its VXLAN tag.
    pub fn with_vlan(mut self, id: impl Into<String>, vxlan: u32) -> Self {
        self.state_mut().vlans.insert(id.into(), vxlan);
        self
    }

    /// Set how batches progress.
    pub fn with_batch_behavior(mut self, behavior: BatchBehavior) -> Self {
        self.state_mut().batch_behavior = behavior;
        self
    }

    /// Make every call of `operation` fail with `err`.
    pub fn fail(mut self, operation: Operation, err: ApiError) -> Self {
        self.state_mut().failures.insert(operation, err);
        self
    }

    /// Current snapshot of a port.
    pub fn port(&self, port_id: &str) -> Option<Port> {
        self.state().ports.get(port_id).cloned()
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state().calls.clone()
    }

    /// Calls that change a port, in order.
    pub fn mutating_calls(&self) -> Vec<ApiCall> {
        self.calls().into_iter().filter(ApiCall::is_mutating).collect()
    }
}

#[async_trait::async_trait]
impl MetalPortApi for FakeMetalApi {
    async fn get_port(&self, port_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::GetPort(port_id.to_string()))?;
        state.port_mut(port_id).map(|port| port.clone())
    }

    async fn get_device_port(&self, device_id: &str, name: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::GetDevicePort {
            device_id: device_id.to_string(),
            name: name.to_string(),
        })?;
        let port_id = state
            .device_ports
            .get(&(device_id.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("port {} on device {}", name, device_id)))?;
        state.port_mut(&port_id).map(|port| port.clone())
    }

    async fn disbond(&self, port_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::Disbond(port_id.to_string()))?;
        let port = state.port_mut(port_id)?;
        port.bonded = false;
        port.network_type = port.network_type.map(|t| match t {
            NetworkType::Layer2Bonded => NetworkType::Layer2Individual,
            NetworkType::Layer3 | NetworkType::HybridBonded => NetworkType::Hybrid,
            other => other,
        });
        Ok(port.clone())
    }

    async fn bond(&self, port_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::Bond(port_id.to_string()))?;
        let port = state.port_mut(port_id)?;
        port.bonded = true;
        port.network_type = port.network_type.map(|t| match t {
            NetworkType::Layer2Individual => NetworkType::Layer2Bonded,
            NetworkType::Hybrid => NetworkType::HybridBonded,
            other => other,
        });
        Ok(port.clone())
    }

    async fn convert_to_layer2(&self, port_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::ConvertToLayer2(port_id.to_string()))?;
        let port = state.port_mut(port_id)?;
        port.network_type = Some(NetworkType::layer2_for(port.bonded));
        Ok(port.clone())
    }

    async fn convert_to_layer3(
        &self,
        port_id: &str,
        _addresses: &[AddressRequest],
    ) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::ConvertToLayer3(port_id.to_string()))?;
        let port = state.port_mut(port_id)?;
        if !port.bonded {
            return Err(ApiError::Request(format!(
                "port {} must be bonded to convert to layer3",
                port_id
            )));
        }
        port.network_type = Some(NetworkType::Layer3);
        Ok(port.clone())
    }

    async fn assign_native(&self, port_id: &str, vlan_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::AssignNative {
            port_id: port_id.to_string(),
            vlan_id: vlan_id.to_string(),
        })?;
        let port = state.port_mut(port_id)?;
        let vlan = port
            .vlans
            .iter()
            .find(|v| v.id == vlan_id)
            .cloned()
            .ok_or_else(|| {
                ApiError::Request(format!("vlan {} is not assigned to port {}", vlan_id, port_id))
            })?;
        port.native_vlan = Some(vlan);
        Ok(port.clone())
    }

    async fn unassign_native(&self, port_id: &str) -> Result<Port, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::UnassignNative(port_id.to_string()))?;
        let port = state.port_mut(port_id)?;
        port.native_vlan = None;
        Ok(port.clone())
    }

    async fn create_vlan_batch(
        &self,
        port_id: &str,
        assignments: &[VlanAssignment],
    ) -> Result<VlanAssignmentBatch, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::CreateVlanBatch {
            port_id: port_id.to_string(),
            assignments: assignments.to_vec(),
        })?;
        state.port_mut(port_id)?;

        let id = format!("batch-{}", state.batches.len() + 1);
        state.batches.insert(
            id.clone(),
            FakeBatch {
                port_id: port_id.to_string(),
                assignments: assignments.to_vec(),
                polls: 0,
                applied: false,
            },
        );
        Ok(VlanAssignmentBatch {
            id,
            state: BatchState::Queued,
            error_messages: Vec::new(),
        })
    }

    async fn get_vlan_batch(
        &self,
        port_id: &str,
        batch_id: &str,
    ) -> Result<VlanAssignmentBatch, ApiError> {
        let mut state = self.state();
        state.record(ApiCall::GetVlanBatch {
            port_id: port_id.to_string(),
            batch_id: batch_id.to_string(),
        })?;

        let behavior = state.batch_behavior.clone();
        let batch = state
            .batches
            .get_mut(batch_id)
            .filter(|batch| batch.port_id == port_id)
            .ok_or_else(|| ApiError::NotFound(format!("batch {}", batch_id)))?;
        batch.polls += 1;

        let (batch_state, error_messages) = match behavior {
            BatchBehavior::CompleteAfter(polls) if batch.polls >= polls => {
                (BatchState::Completed, Vec::new())
            },
            BatchBehavior::CompleteAfter(_) | BatchBehavior::NeverComplete => {
                (BatchState::InProgress, Vec::new())
            },
            BatchBehavior::Fail(messages) => (BatchState::Failed, messages),
        };

        if batch_state == BatchState::Completed && !batch.applied {
            batch.applied = true;
            let assignments = batch.assignments.clone();
            state.apply_batch(port_id, &assignments);
        }
        Ok(VlanAssignmentBatch {
            id: batch_id.to_string(),
            state: batch_state,
            error_messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_batch_applies_on_completion() {
        let api = FakeMetalApi::new()
            .with_port(Port::bond("p1", "bond0").with_vlans([VlanRef::new("v1", 1000)]))
            .with_vlan("v1", 1000)
            .with_vlan("v2", 1001)
            .with_batch_behavior(BatchBehavior::CompleteAfter(2));

        let batch = api
            .create_vlan_batch(
                "p1",
                &[VlanAssignment::unassign("v1"), VlanAssignment::assign("1001", true)],
            )
            .await
            .unwrap();
        assert_eq!(batch.state, BatchState::Queued);

        let polled = api.get_vlan_batch("p1", &batch.id).await.unwrap();
        assert_eq!(polled.state, BatchState::InProgress);
        assert_eq!(api.port("p1").unwrap().vlans, vec![VlanRef::new("v1", 1000)]);

        let polled = api.get_vlan_batch("p1", &batch.id).await.unwrap();
        assert_eq!(polled.state, BatchState::Completed);
        let port = api.port("p1").unwrap();
        assert_eq!(port.vlans, vec![VlanRef::new("v2", 1001)]);
        assert_eq!(port.native_vlan_id(), Some("v2"));
    }

    #[tokio::test]
    async fn test_fake_mode_rules() {
        let api = FakeMetalApi::new().with_port(
            Port::bond("p1", "bond0")
                .with_network_type(NetworkType::Layer2Individual)
                .with_bonded(false),
        );

        let err = api.convert_to_layer3("p1", &AddressRequest::layer3_defaults()).await;
        assert!(matches!(err, Err(ApiError::Request(_))));

        let port = api.bond("p1").await.unwrap();
        assert_eq!(port.network_type, Some(NetworkType::Layer2Bonded));

        let err = api.assign_native("p1", "v9").await.unwrap_err();
        assert!(err.to_string().contains("not assigned"));

        assert_eq!(
            api.mutating_calls(),
            vec![
                ApiCall::ConvertToLayer3("p1".to_string()),
                ApiCall::Bond("p1".to_string()),
                ApiCall::AssignNative {
                    port_id: "p1".to_string(),
                    vlan_id: "v9".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_fake_failure_injection_records_call() {
        let api = FakeMetalApi::new()
            .with_port(Port::bond("p1", "bond0"))
            .fail(Operation::Disbond, ApiError::Forbidden("p1".to_string()));

        assert!(api.disbond("p1").await.is_err());
        assert!(api.port("p1").unwrap().bonded);
        assert_eq!(api.calls(), vec![ApiCall::Disbond("p1".to_string())]);
    }

    #[test]
    fn test_error_contains_checks_detail() {
        let diagnostics = vec![Diagnostic::error("Invalid port configuration")
            .with_detail("native VLAN can only be set if more than one VLAN are assigned")];
        assert_error_contains(&diagnostics, "more than one VLAN");
        assert_no_errors(&[Diagnostic::warning("reset incomplete")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("vlan_ids"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = err.to_string();
        assert!(display.contains("First error"));
        assert!(display.contains("(at vlan_ids)"));
        assert!(display.contains("More info"));
    }
}
