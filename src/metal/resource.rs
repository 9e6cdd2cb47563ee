//! The `equinix_metal_port` resource and data source.
//!
//! Creating the resource does not provision anything: it takes over an
//! existing device port and runs a reconciliation pass, exactly like an
//! update. Deleting it releases the port, optionally resetting it first.

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::api::MetalPortApi;
use super::desired::DesiredConfig;
use super::executor::{BatchPolling, PortReconciler};
use super::loader::{load_port, PortLocator};
use super::locks::PortLocks;
use super::model::{NetworkType, Port};
use super::plan::planned_operations;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::schema::{Attribute, AttributeFlags, AttributeType, Diagnostic, ProviderSchema, Schema};
use crate::types::{AttributeChange, ImportedResource, PlanResult};
use crate::validation::validate;

/// Resource and data source type name.
pub const PORT_RESOURCE: &str = "equinix_metal_port";

/// Attributes a configuration may set.
const CONFIGURABLE: [&str; 7] = [
    "port_id",
    "bonded",
    "layer2",
    "native_vlan_id",
    "vlan_ids",
    "vxlan_ids",
    "reset_on_delete",
];

/// Attributes only the provider sets.
const COMPUTED: [&str; 8] = [
    "id",
    "name",
    "type",
    "network_type",
    "mac",
    "disbond_supported",
    "bond_id",
    "bond_name",
];

/// Mutually exclusive ways of declaring VLANs.
const VLAN_ATTRIBUTES: [&str; 2] = ["vlan_ids", "vxlan_ids"];

fn computed_port_attributes(schema: Schema) -> Schema {
    schema
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::computed_string().with_description("Port name, e.g. bond0"))
        .with_attribute(
            "type",
            Attribute::computed_string().with_description("NetworkPort or NetworkBondPort"),
        )
        .with_attribute(
            "network_type",
            Attribute::computed_string().one_of(NetworkType::ALL.map(|t| t.as_str())),
        )
        .with_attribute("mac", Attribute::computed_string())
        .with_attribute("disbond_supported", Attribute::computed_bool())
        .with_attribute("bond_id", Attribute::computed_string())
        .with_attribute("bond_name", Attribute::computed_string())
}

/// Schema of the `equinix_metal_port` resource.
pub fn port_schema() -> Schema {
    let vlan_set = |element| Attribute::new(AttributeType::set(element), AttributeFlags::optional_computed());

    computed_port_attributes(Schema::v0().with_description("Network configuration of a device port"))
        .with_attribute(
            "port_id",
            Attribute::required_string()
                .with_force_new()
                .with_description("Id of the port to manage"),
        )
        .with_attribute(
            "bonded",
            Attribute::required_bool().with_description("Whether the port should be bonded"),
        )
        .with_attribute(
            "layer2",
            Attribute::new(AttributeType::Bool, AttributeFlags::optional_computed())
                .with_description("Layer2 (true) or layer3 (false) mode. Bond ports only"),
        )
        .with_attribute(
            "native_vlan_id",
            Attribute::optional_string()
                .with_description("VLAN receiving untagged traffic. Must be one of vlan_ids; not allowed with vxlan_ids"),
        )
        .with_attribute(
            "vlan_ids",
            vlan_set(AttributeType::String)
                .conflicts_with("vxlan_ids")
                .with_description("Ids of the VLANs to attach"),
        )
        .with_attribute(
            "vxlan_ids",
            vlan_set(AttributeType::Int64)
                .conflicts_with("vlan_ids")
                .with_description("VXLAN tags of the VLANs to attach"),
        )
        .with_attribute(
            "reset_on_delete",
            Attribute::optional_bool()
                .with_description("Reset the port to bonded layer3 without VLANs on delete"),
        )
}

/// Schema of the `equinix_metal_port` data source.
pub fn port_data_source_schema() -> Schema {
    computed_port_attributes(Schema::v0().with_description("Look up a device port"))
        .with_attribute(
            "port_id",
            Attribute::optional_string()
                .conflicts_with("device_id")
                .conflicts_with("name"),
        )
        .with_attribute("device_id", Attribute::optional_string())
        .with_attribute("bonded", Attribute::computed_bool())
        .with_attribute("layer2", Attribute::computed_bool())
        .with_attribute("native_vlan_id", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::new(AttributeType::String, AttributeFlags::optional_computed()),
        )
        .with_attribute(
            "vlan_ids",
            Attribute::new(AttributeType::list(AttributeType::String), AttributeFlags::computed()),
        )
        .with_attribute(
            "vxlan_ids",
            Attribute::new(AttributeType::list(AttributeType::Int64), AttributeFlags::computed()),
        )
}

/// Flatten a port snapshot into state attributes.
///
/// `layer2` follows the network type and is null when the API does not
/// report one. VLAN lists are sorted.
pub fn port_attributes(port: &Port) -> Value {
    let mut vlan_ids: Vec<&str> = port.vlans.iter().map(|v| v.id.as_str()).collect();
    vlan_ids.sort_unstable();
    vlan_ids.dedup();
    let mut vxlan_ids: Vec<u32> = port.vlans.iter().filter_map(|v| v.vxlan).collect();
    vxlan_ids.sort_unstable();
    vxlan_ids.dedup();

    json!({
        "id": port.id,
        "port_id": port.id,
        "name": port.name,
        "type": port.port_type.as_str(),
        "network_type": port.network_type.map(|t| t.as_str()),
        "mac": port.mac,
        "disbond_supported": port.disbond_supported,
        "bond_id": port.bond.as_ref().map(|b| b.id.as_str()),
        "bond_name": port.bond.as_ref().map(|b| b.name.as_str()),
        "bonded": port.bonded,
        "layer2": port.network_type.map(|t| t.is_layer2()),
        "native_vlan_id": port.native_vlan_id(),
        "vlan_ids": vlan_ids,
        "vxlan_ids": vxlan_ids,
    })
}

fn resource_state(port: &Port, reset_on_delete: bool) -> Value {
    let mut state = port_attributes(port);
    state["reset_on_delete"] = json!(reset_on_delete);
    state
}

fn str_attr<'a>(state: &'a Value, name: &str) -> Option<&'a str> {
    state.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn is_declared(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Compare attribute values, ignoring order for lists and treating an
/// empty list as unset.
fn same_value(before: &Value, after: &Value) -> bool {
    fn normalized(value: &Value) -> Option<Vec<String>> {
        match value {
            Value::Null => Some(Vec::new()),
            Value::Array(items) => {
                let mut items: Vec<String> = items.iter().map(Value::to_string).collect();
                items.sort_unstable();
                Some(items)
            },
            _ => None,
        }
    }
    match (normalized(before), normalized(after)) {
        (Some(a), Some(b)) => a == b,
        _ => before == after,
    }
}

fn attribute_change(name: &str, before: Value, after: Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(name, after),
        (_, true) => AttributeChange::removed(name, before),
        _ => AttributeChange::modified(name, before, after),
    }
}

/// Null the VLAN attribute the configuration leaves out; it is reported
/// after apply.
///
/// With neither declared, a managed port keeps the VLANs recorded in
/// `prior` and a new one gets none.
fn plan_vlan_attributes(planned: &mut Value, config: &Value, prior: Option<&Value>) {
    let declared: Vec<&str> = VLAN_ATTRIBUTES
        .into_iter()
        .filter(|name| config.get(name).is_some_and(is_declared))
        .collect();
    if declared.is_empty() {
        match prior {
            Some(prior) => {
                planned["vlan_ids"] = prior.get("vlan_ids").cloned().unwrap_or_else(|| json!([]));
                planned["vxlan_ids"] = Value::Null;
            },
            None => {
                planned["vlan_ids"] = json!([]);
                planned["vxlan_ids"] = json!([]);
            },
        }
        return;
    }
    for name in VLAN_ATTRIBUTES {
        if !declared.contains(&name) {
            planned[name] = Value::Null;
        }
    }
}

fn plan_port(prior: Option<&Value>, proposed: Value, config: &Value) -> Result<PlanResult, ProviderError> {
    if !proposed.is_object() {
        return Err(ProviderError::Validation(
            "proposed state must be an object".to_string(),
        ));
    }
    let mut planned = proposed;
    if planned.get("reset_on_delete").is_none_or(Value::is_null) {
        planned["reset_on_delete"] = json!(false);
    }

    let Some(prior) = prior.filter(|p| !p.is_null()) else {
        plan_vlan_attributes(&mut planned, config, None);
        let changes = CONFIGURABLE
            .into_iter()
            .filter_map(|name| {
                planned
                    .get(name)
                    .filter(|v| is_declared(v))
                    .map(|v| AttributeChange::added(name, v.clone()))
            })
            .collect();
        return Ok(PlanResult::with_changes(planned, changes, false));
    };

    for name in COMPUTED.into_iter().chain(["layer2"]) {
        if planned.get(name).is_none_or(Value::is_null) {
            if let Some(value) = prior.get(name) {
                planned[name] = value.clone();
            }
        }
    }
    plan_vlan_attributes(&mut planned, config, Some(prior));

    let mut changes = Vec::new();
    for name in CONFIGURABLE {
        let before = prior.get(name).cloned().unwrap_or(Value::Null);
        let after = planned.get(name).cloned().unwrap_or(Value::Null);
        // Null means "known after apply" for the undeclared VLAN attribute.
        if after.is_null() && VLAN_ATTRIBUTES.contains(&name) {
            continue;
        }
        if !same_value(&before, &after) {
            changes.push(attribute_change(name, before, after));
        }
    }

    if changes.iter().any(|c| c.path == "bonded" || c.path == "layer2") {
        planned["network_type"] = Value::Null;
    }
    let requires_replace = changes.iter().any(|c| c.path == "port_id");
    Ok(PlanResult::with_changes(planned, changes, requires_replace))
}

/// Provider serving `equinix_metal_port` on top of a [`MetalPortApi`].
pub struct MetalProvider<A: ?Sized> {
    api: Arc<A>,
    locks: Arc<PortLocks>,
    config: RwLock<ProviderConfig>,
}

impl<A: MetalPortApi + ?Sized> MetalProvider<A> {
    /// Create a provider with the default configuration.
    pub fn new(api: Arc<A>) -> Self {
        Self {
            api,
            locks: Arc::new(PortLocks::new()),
            config: RwLock::new(ProviderConfig::default()),
        }
    }

    /// Share a lock registry with other providers using the same account.
    pub fn with_locks(mut self, locks: Arc<PortLocks>) -> Self {
        self.locks = locks;
        self
    }

    fn polling(&self) -> BatchPolling {
        self.config.read().unwrap_or_else(PoisonError::into_inner).polling()
    }

    fn reconciler(&self) -> PortReconciler<'_, A> {
        PortReconciler::new(self.api.as_ref()).with_polling(self.polling())
    }

    /// Run a pass towards `state` and return the state read back afterwards.
    #[instrument(skip_all, fields(port_id))]
    async fn apply(&self, state: &Value) -> Result<Value, ProviderError> {
        let desired = DesiredConfig::from_config(state)?;
        desired.check_static()?;
        let port_id = str_attr(state, "port_id")
            .or_else(|| str_attr(state, "id"))
            .ok_or_else(|| ProviderError::Configuration("port_id is required".to_string()))?
            .to_string();
        tracing::Span::current().record("port_id", port_id.as_str());

        let locator = PortLocator::Id(port_id.clone());
        let _guard = self.locks.lock(&port_id).await;
        let port = load_port(self.api.as_ref(), &locator).await?;
        let operations: Vec<String> = planned_operations(&port, &desired)
            .iter()
            .map(ToString::to_string)
            .collect();
        if operations.is_empty() {
            debug!("Port already converged");
        } else {
            info!(operations = %operations.join(", "), "Reconciling port");
        }

        self.reconciler().reconcile(port, &desired).await?;
        let port = load_port(self.api.as_ref(), &locator).await?;
        Ok(resource_state(&port, desired.reset_on_delete))
    }
}

fn check_type(resource_type: &str) -> Result<(), ProviderError> {
    if resource_type == PORT_RESOURCE {
        Ok(())
    } else {
        Err(ProviderError::UnknownResource(resource_type.to_string()))
    }
}

#[async_trait::async_trait]
impl<A: MetalPortApi + ?Sized> ProviderService for MetalProvider<A> {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(ProviderConfig::schema())
            .with_resource(PORT_RESOURCE, port_schema())
            .with_data_source(PORT_RESOURCE, port_data_source_schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let mut diagnostics = validate(&ProviderConfig::schema(), &config);
        if diagnostics.is_empty() {
            diagnostics = ProviderConfig::from_value(&config)?.validate();
        }
        Ok(diagnostics)
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let parsed = ProviderConfig::from_value(&config)?;
        let diagnostics = parsed.validate();
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = parsed;
        info!(
            poll_interval_seconds = parsed.batch_poll_interval_seconds,
            poll_attempts = parsed.batch_poll_attempts,
            "Provider configured"
        );
        Ok(diagnostics)
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_type(resource_type)?;
        let mut diagnostics = validate(&port_schema(), &config);
        if diagnostics.is_empty() {
            if let Err(err) = DesiredConfig::from_config(&config).and_then(|d| d.check_static()) {
                diagnostics.push(Diagnostic::error("Invalid port configuration").with_detail(err.to_string()));
            }
        }
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        check_type(resource_type)?;
        if proposed_state.is_null() {
            let changes = prior_state
                .as_ref()
                .and_then(|prior| prior.get("id"))
                .map(|id| vec![AttributeChange::removed("id", id.clone())])
                .unwrap_or_default();
            return Ok(PlanResult::with_changes(Value::Null, changes, false));
        }
        plan_port(prior_state.as_ref(), proposed_state, &config)
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        check_type(resource_type)?;
        self.apply(&planned_state).await
    }

    #[instrument(skip_all)]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        check_type(resource_type)?;
        let locator = PortLocator::resolve(
            str_attr(&current_state, "port_id"),
            str_attr(&current_state, "id"),
            None,
            None,
        )?;
        let reset_on_delete = current_state
            .get("reset_on_delete")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match load_port(self.api.as_ref(), &locator).await {
            Ok(port) => Ok(resource_state(&port, reset_on_delete)),
            Err(err) if err.is_gone() => {
                warn!(error = %err, "Port is gone, removing it from state");
                Err(ProviderError::NotFound(err.to_string()))
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        _prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        check_type(resource_type)?;
        self.apply(&planned_state).await
    }

    #[instrument(skip_all)]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        check_type(resource_type)?;
        let reset = current_state
            .get("reset_on_delete")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let Some(port_id) = str_attr(&current_state, "id").or_else(|| str_attr(&current_state, "port_id")) else {
            return Ok(());
        };
        if !reset {
            debug!(port_id, "Releasing port without reset");
            return Ok(());
        }

        let _guard = self.locks.lock(port_id).await;
        let port = match load_port(self.api.as_ref(), &PortLocator::Id(port_id.to_string())).await {
            Ok(port) => port,
            Err(err) => {
                warn!(port_id, error = %err, "Port could not be read, skipping reset");
                return Ok(());
            },
        };

        let outcome = self.reconciler().reset(port).await;
        if outcome.is_clean() {
            info!(port_id, "Port reset to defaults");
        } else {
            warn!(port_id, warnings = outcome.warnings.len(), "Port released without a full reset");
        }
        Ok(())
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        check_type(resource_type)?;
        let port = load_port(self.api.as_ref(), &PortLocator::Id(id.to_string())).await?;
        Ok(vec![ImportedResource::new(PORT_RESOURCE, resource_state(&port, false))])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_type(data_source_type)?;
        let mut diagnostics = validate(&port_data_source_schema(), &config);
        if diagnostics.is_empty() {
            if let Err(err) = PortLocator::resolve(
                str_attr(&config, "port_id"),
                None,
                str_attr(&config, "device_id"),
                str_attr(&config, "name"),
            ) {
                diagnostics.push(Diagnostic::error("Invalid port lookup").with_detail(err.to_string()));
            }
        }
        Ok(diagnostics)
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        check_type(data_source_type)?;
        let locator = PortLocator::resolve(
            str_attr(&config, "port_id"),
            None,
            str_attr(&config, "device_id"),
            str_attr(&config, "name"),
        )?;
        let port = load_port(self.api.as_ref(), &locator).await?;

        let mut state = port_attributes(&port);
        state["device_id"] = config.get("device_id").cloned().unwrap_or(Value::Null);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metal::api::ApiError;
    use crate::metal::model::{VlanAssignment, VlanRef};
    use crate::testing::{
        assert_error_contains, assert_no_errors, assert_plan_changes_attribute,
        assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place, ApiCall,
        BatchBehavior, FakeMetalApi, Operation, ProviderTester, TestError,
    };

    fn layer2_bond() -> Port {
        Port::bond("p1", "bond0")
            .with_network_type(NetworkType::Layer2Bonded)
            .with_mac("b8:ce:f6:00:00:01")
    }

    fn fake() -> Arc<FakeMetalApi> {
        Arc::new(
            FakeMetalApi::new()
                .with_device_port("d1", layer2_bond())
                .with_vlan("v1", 1000)
                .with_vlan("v2", 1001),
        )
    }

    fn tester(api: &Arc<FakeMetalApi>) -> ProviderTester<MetalProvider<FakeMetalApi>> {
        ProviderTester::new(MetalProvider::new(Arc::clone(api)))
    }

    fn attach_two() -> Value {
        json!({
            "port_id": "p1",
            "bonded": true,
            "layer2": true,
            "vlan_ids": ["v2", "v1"],
            "native_vlan_id": "v1",
        })
    }

    #[test]
    fn test_schema_and_metadata() {
        let tester = tester(&fake());
        let schema = tester.schema();

        let resource = &schema.resources[PORT_RESOURCE];
        assert!(resource.attribute("port_id").unwrap().force_new);
        assert_eq!(
            resource.attribute("vlan_ids").unwrap().conflicts_with,
            vec!["vxlan_ids".to_string()]
        );
        assert_eq!(
            resource.attribute("network_type").unwrap().allowed_values.len(),
            NetworkType::ALL.len()
        );
        assert!(schema.data_sources[PORT_RESOURCE]
            .attribute("device_id")
            .is_some());

        assert_eq!(tester.resource_types(), vec![PORT_RESOURCE.to_string()]);
        assert_eq!(tester.data_source_types(), vec![PORT_RESOURCE.to_string()]);
    }

    #[tokio::test]
    async fn test_configure() {
        let tester = tester(&fake());
        tester.configure(Value::Null).await.unwrap();
        tester
            .configure(json!({"batch_poll_interval_seconds": 1, "batch_poll_attempts": 3}))
            .await
            .unwrap();

        match tester.configure(json!({"batch_poll_attempts": 0})).await {
            Err(TestError::Diagnostics(diagnostics)) => {
                assert_error_contains(&diagnostics, "batch_poll_attempts must be at least 1");
            },
            other => panic!("expected diagnostics, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let tester = tester(&fake());
        tester
            .validate_resource_config(PORT_RESOURCE, attach_two())
            .await
            .unwrap();

        let provider = tester.provider();
        let diagnostics = provider
            .validate_resource_config(
                PORT_RESOURCE,
                json!({"port_id": "p1", "bonded": true, "vlan_ids": ["v1"], "vxlan_ids": [1000]}),
            )
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "Conflicting");

        let diagnostics = provider
            .validate_resource_config(
                PORT_RESOURCE,
                json!({"port_id": "p1", "bonded": true, "vlan_ids": ["v1"], "native_vlan_id": "v1"}),
            )
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "more than one VLAN");

        let diagnostics = provider
            .validate_resource_config(
                PORT_RESOURCE,
                json!({"port_id": "p1", "bonded": true, "vxlan_ids": [1000, 1001], "native_vlan_id": "1001"}),
            )
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "requires VLANs declared by id");

        let err = provider
            .validate_resource_config("equinix_metal_device", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_attaches_vlans() {
        let api = fake();
        let state = tester(&api)
            .lifecycle_create(PORT_RESOURCE, attach_two())
            .await
            .unwrap();

        assert_eq!(state["id"], "p1");
        assert_eq!(state["type"], "NetworkBondPort");
        assert_eq!(state["network_type"], "layer2-bonded");
        assert_eq!(state["layer2"], true);
        assert_eq!(state["mac"], "b8:ce:f6:00:00:01");
        assert_eq!(state["vlan_ids"], json!(["v1", "v2"]));
        assert_eq!(state["vxlan_ids"], json!([1000, 1001]));
        assert_eq!(state["native_vlan_id"], "v1");
        assert_eq!(state["reset_on_delete"], false);

        assert_eq!(
            api.mutating_calls(),
            vec![
                ApiCall::CreateVlanBatch {
                    port_id: "p1".to_string(),
                    assignments: vec![
                        VlanAssignment::assign("v1", true),
                        VlanAssignment::assign("v2", false),
                    ],
                },
                ApiCall::AssignNative {
                    port_id: "p1".to_string(),
                    vlan_id: "v1".to_string(),
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_against_state() {
        let api = fake();
        let tester = tester(&api);
        let state = tester
            .lifecycle_create(PORT_RESOURCE, attach_two())
            .await
            .unwrap();

        let plan = tester
            .plan_update(PORT_RESOURCE, state.clone(), attach_two())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        assert_eq!(plan.planned_state["id"], "p1");
        assert!(plan.planned_state["vxlan_ids"].is_null());

        let by_tag = json!({"port_id": "p1", "bonded": true, "vxlan_ids": [1001, 1000]});
        let plan = tester
            .plan_update(PORT_RESOURCE, state.clone(), by_tag)
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_eq!(plan.changes.len(), 1);
        assert_plan_changes_attribute(&plan, "native_vlan_id");
        assert_eq!(plan.planned_state["layer2"], true);

        let mut other_port = attach_two();
        other_port["port_id"] = json!("p2");
        let plan = tester
            .plan_update(PORT_RESOURCE, state.clone(), other_port)
            .await
            .unwrap();
        assert_plan_replaces(&plan);

        let plan = tester
            .plan_update(
                PORT_RESOURCE,
                state,
                json!({"port_id": "p1", "bonded": true, "layer2": false}),
            )
            .await
            .unwrap();
        assert_plan_updates_in_place(&plan);
        assert_plan_changes_attribute(&plan, "layer2");
        assert_plan_changes_attribute(&plan, "native_vlan_id");
        assert!(plan.changes.iter().all(|c| c.path != "vlan_ids"));
        assert_eq!(plan.planned_state["vlan_ids"], json!(["v1", "v2"]));
        assert!(plan.planned_state["network_type"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_without_vlan_attributes_keeps_vlans() {
        let api = Arc::new(
            FakeMetalApi::new()
                .with_port(layer2_bond().with_vlans([VlanRef::new("v1", 1000), VlanRef::new("v2", 1001)]))
                .with_vlan("v1", 1000)
                .with_vlan("v2", 1001),
        );
        let tester = tester(&api);
        let imported = tester.import_resource(PORT_RESOURCE, "p1").await.unwrap();

        let config = json!({"port_id": "p1", "bonded": true});
        let plan = tester
            .plan_update(PORT_RESOURCE, imported[0].state.clone(), config.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        assert_eq!(plan.planned_state["vlan_ids"], json!(["v1", "v2"]));
        assert!(plan.planned_state["vxlan_ids"].is_null());

        let state = tester
            .lifecycle_update(PORT_RESOURCE, imported[0].state.clone(), config)
            .await
            .unwrap();
        assert_eq!(state["vlan_ids"], json!(["v1", "v2"]));
        assert!(api.mutating_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_detaches_native_vlan() {
        let api = fake();
        let tester = tester(&api);
        let state = tester
            .lifecycle_create(PORT_RESOURCE, attach_two())
            .await
            .unwrap();
        let before = api.mutating_calls().len();

        let state = tester
            .lifecycle_update(
                PORT_RESOURCE,
                state,
                json!({"port_id": "p1", "bonded": true, "vlan_ids": ["v2"]}),
            )
            .await
            .unwrap();

        assert_eq!(state["vlan_ids"], json!(["v2"]));
        assert!(state["native_vlan_id"].is_null());
        assert_eq!(
            api.mutating_calls()[before..],
            [ApiCall::CreateVlanBatch {
                port_id: "p1".to_string(),
                assignments: vec![VlanAssignment::unassign("v1")],
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_invalid_layer2_flag() {
        let api = Arc::new(FakeMetalApi::new().with_port(Port::member("p2", "eth1")));
        let err = tester(&api)
            .create(
                PORT_RESOURCE,
                json!({"port_id": "p2", "bonded": true, "layer2": true}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Configuration(_)));
        assert!(err.message().contains("only for bond ports"));
        assert!(api.mutating_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_timeout_uses_configured_polling() {
        let api = Arc::new(
            FakeMetalApi::new()
                .with_port(Port::bond("p1", "bond0"))
                .with_batch_behavior(BatchBehavior::NeverComplete),
        );
        let tester = tester(&api);
        tester
            .configure(json!({"batch_poll_interval_seconds": 2, "batch_poll_attempts": 3}))
            .await
            .unwrap();

        let err = tester
            .create(PORT_RESOURCE, json!({"port_id": "p1", "bonded": true, "vlan_ids": ["v1"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        assert!(err.message().contains("6s"));
    }

    #[tokio::test]
    async fn test_read_gone_port() {
        let api = Arc::new(FakeMetalApi::new());
        let err = tester(&api)
            .read(PORT_RESOURCE, json!({"id": "p1", "port_id": "p1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let api = Arc::new(
            FakeMetalApi::new()
                .with_port(Port::bond("p1", "bond0"))
                .fail(Operation::GetPort, ApiError::Forbidden("p1".to_string())),
        );
        let err = tester(&api)
            .read(PORT_RESOURCE, json!({"id": "p1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));

        let api = Arc::new(
            FakeMetalApi::new()
                .with_port(Port::bond("p1", "bond0"))
                .fail(Operation::GetPort, ApiError::Request("502".to_string())),
        );
        let err = tester(&api)
            .read(PORT_RESOURCE, json!({"id": "p1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_read_keeps_reset_flag() {
        let api = fake();
        let state = tester(&api)
            .read(PORT_RESOURCE, json!({"id": "p1", "reset_on_delete": true}))
            .await
            .unwrap();
        assert_eq!(state["reset_on_delete"], true);
        assert_eq!(state["bonded"], true);
        assert!(state["bond_id"].is_null());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_without_reset_leaves_port() {
        let api = fake();
        let tester = tester(&api);
        let state = tester
            .lifecycle_create(PORT_RESOURCE, attach_two())
            .await
            .unwrap();
        let before = api.mutating_calls().len();

        tester.lifecycle_delete(PORT_RESOURCE, state).await.unwrap();
        assert_eq!(api.mutating_calls().len(), before);
        assert_eq!(api.port("p1").unwrap().vlans.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_with_reset() {
        let port = Port::bond("p1", "bond0")
            .with_network_type(NetworkType::Layer2Individual)
            .with_bonded(false)
            .with_vlans([VlanRef::new("v1", 1000)]);
        let api = Arc::new(FakeMetalApi::new().with_port(port).with_vlan("v1", 1000));
        let tester = tester(&api);

        tester
            .delete(PORT_RESOURCE, json!({"id": "p1", "reset_on_delete": true}))
            .await
            .unwrap();

        let port = api.port("p1").unwrap();
        assert!(port.bonded);
        assert_eq!(port.network_type, Some(NetworkType::Layer3));
        assert!(port.vlans.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_never_fails() {
        let port = Port::bond("p1", "bond0")
            .with_network_type(NetworkType::Layer2Individual)
            .with_bonded(false);
        let api = Arc::new(
            FakeMetalApi::new()
                .with_port(port)
                .fail(Operation::Bond, ApiError::Request("422".to_string())),
        );
        tester(&api)
            .delete(PORT_RESOURCE, json!({"id": "p1", "reset_on_delete": true}))
            .await
            .unwrap();
        assert!(!api.port("p1").unwrap().bonded);

        let api = Arc::new(FakeMetalApi::new());
        tester(&api)
            .delete(PORT_RESOURCE, json!({"id": "p1", "reset_on_delete": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_import() {
        let api = fake();
        let imported = tester(&api)
            .import_resource(PORT_RESOURCE, "p1")
            .await
            .unwrap();

        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, PORT_RESOURCE);
        assert_eq!(imported[0].state["port_id"], "p1");
        assert_eq!(imported[0].state["reset_on_delete"], false);

        let err = tester(&api)
            .import_resource(PORT_RESOURCE, "p9")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_data_source_lookup() {
        let api = fake();
        let tester = tester(&api);

        let config = json!({"device_id": "d1", "name": "bond0"});
        tester
            .validate_data_source_config(PORT_RESOURCE, config.clone())
            .await
            .unwrap();
        let state = tester.read_data_source(PORT_RESOURCE, config).await.unwrap();
        assert_eq!(state["id"], "p1");
        assert_eq!(state["device_id"], "d1");
        assert_eq!(state["layer2"], true);

        let state = tester
            .read_data_source(PORT_RESOURCE, json!({"port_id": "p1"}))
            .await
            .unwrap();
        assert_eq!(state["name"], "bond0");
        assert!(state["device_id"].is_null());
    }

    #[tokio::test]
    async fn test_data_source_invalid_lookup() {
        let tester = tester(&fake());
        let provider = tester.provider();

        let diagnostics = provider
            .validate_data_source_config(PORT_RESOURCE, json!({"device_id": "d1"}))
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "both device_id and name");

        let diagnostics = provider
            .validate_data_source_config(
                PORT_RESOURCE,
                json!({"port_id": "p1", "device_id": "d1", "name": "bond0"}),
            )
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "Conflicting");

        let diagnostics = provider
            .validate_data_source_config(PORT_RESOURCE, json!({"port_id": "p1"}))
            .await
            .unwrap();
        assert_no_errors(&diagnostics);

        let err = tester
            .read_data_source(PORT_RESOURCE, json!({"name": "bond0"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_port_attributes_for_member_port() {
        let port = Port::member("p2", "eth1")
            .with_bond("p1", "bond0")
            .with_vlans([VlanRef::id_only("v9"), VlanRef::new("v1", 1000)]);
        let state = port_attributes(&port);

        assert!(state["layer2"].is_null());
        assert!(state["network_type"].is_null());
        assert_eq!(state["bond_id"], "p1");
        assert_eq!(state["bond_name"], "bond0");
        assert_eq!(state["vlan_ids"], json!(["v1", "v9"]));
        assert_eq!(state["vxlan_ids"], json!([1000]));
    }
}
