//! Ordered port transitions.
//!
//! A pass runs every step of [`Step::UPDATE`] in order. Each step checks its
//! own guard against the latest snapshot and does nothing when the port is
//! already where the step would take it, so re-running a pass on a converged
//! port makes no mutating call. A failing step aborts the pass; steps that
//! already ran are not rolled back.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use super::api::{ApiError, MetalPortApi};
use super::desired::DesiredConfig;
use super::loader::{load_port, PortLocator};
use super::model::{AddressRequest, BatchState, Port};
use super::plan::TransitionPlan;
use crate::error::ReconcileError;

/// Default delay between two polls of a VLAN assignment batch.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of polls before a batch is considered timed out.
pub const DEFAULT_POLL_ATTEMPTS: u32 = 180;

/// How a submitted VLAN assignment batch is waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolling {
    /// Delay before each poll.
    pub interval: Duration,
    /// Maximum number of polls.
    pub max_attempts: u32,
}

impl BatchPolling {
    /// Total time a batch may take before it times out.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for BatchPolling {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_ATTEMPTS,
        }
    }
}

/// A transition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Check the declared state against the port. Makes no call.
    SanityCheck,
    /// Detach VLANs that are no longer declared.
    RemoveVlans,
    /// Remove the port from its bond.
    Disbond,
    /// Switch to layer2.
    ConvertToLayer2,
    /// Add the port to its bond.
    Bond,
    /// Switch to layer3.
    ConvertToLayer3,
    /// Attach declared VLANs.
    AssignVlans,
    /// Set or clear the native VLAN.
    UpdateNativeVlan,
}

impl Step {
    /// Steps of a reconciliation pass, in execution order.
    ///
    /// Removals come before bond and mode changes, which come before
    /// additions. The native VLAN is set last since it must be attached.
    pub const UPDATE: [Step; 8] = [
        Step::SanityCheck,
        Step::RemoveVlans,
        Step::Disbond,
        Step::ConvertToLayer2,
        Step::Bond,
        Step::ConvertToLayer3,
        Step::AssignVlans,
        Step::UpdateNativeVlan,
    ];

    /// Steps that bring a port back to bonded layer3 without VLANs.
    pub const RESET: [Step; 3] = [Step::RemoveVlans, Step::Bond, Step::ConvertToLayer3];

    /// Human readable step name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SanityCheck => "sanity check",
            Self::RemoveVlans => "remove vlans",
            Self::Disbond => "disbond",
            Self::ConvertToLayer2 => "convert to layer2",
            Self::Bond => "bond",
            Self::ConvertToLayer3 => "convert to layer3",
            Self::AssignVlans => "assign vlans",
            Self::UpdateNativeVlan => "update native vlan",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a best-effort port reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Port as read back after the reset, if it could be read.
    pub port: Option<Port>,
    /// Everything that did not go as planned.
    pub warnings: Vec<String>,
}

impl ResetOutcome {
    /// Whether the port is confirmed back in its default state.
    pub fn is_clean(&self) -> bool {
        self.port.is_some() && self.warnings.is_empty()
    }
}

/// Facts captured before the first step runs.
struct PassContext {
    /// Declared VLANs resolved against the pre-pass snapshot.
    vlan_ids: BTreeSet<String>,
    /// VLAN that gets the native flag in the assign batch: the native VLAN
    /// before the pass, or the declared one if the port had none.
    native_reference: Option<String>,
}

impl PassContext {
    fn capture(port: &Port, desired: &DesiredConfig) -> Self {
        let native_reference = port
            .native_vlan_id()
            .map(str::to_string)
            .or_else(|| desired.native_vlan_id.clone());
        Self {
            vlan_ids: desired.vlans.resolve(port),
            native_reference,
        }
    }
}

/// Drives a port from its current snapshot to a declared state.
pub struct PortReconciler<'a, A: ?Sized> {
    api: &'a A,
    polling: BatchPolling,
}

impl<'a, A> PortReconciler<'a, A>
where
    A: MetalPortApi + ?Sized,
{
    /// Create a reconciler using the default batch polling.
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            polling: BatchPolling::default(),
        }
    }

    /// Replace the batch polling settings.
    pub fn with_polling(mut self, polling: BatchPolling) -> Self {
        self.polling = polling;
        self
    }

    /// Run a full pass and return the last snapshot seen.
    ///
    /// The returned snapshot is not re-read; callers that need the exact
    /// upstream state should load the port again.
    #[instrument(skip_all, name = "reconcile", fields(port_id = %port.id))]
    pub async fn reconcile(&self, port: Port, desired: &DesiredConfig) -> Result<Port, ReconcileError> {
        let port = self.run(&Step::UPDATE, port, desired).await?;
        info!("Port reconciled");
        Ok(port)
    }

    /// Best effort return to bonded layer3 without VLANs.
    ///
    /// Never fails: step errors and post-conditions that do not hold are
    /// logged and collected in [`ResetOutcome::warnings`].
    #[instrument(skip_all, name = "reset", fields(port_id = %port.id))]
    pub async fn reset(&self, port: Port) -> ResetOutcome {
        let port_id = port.id.clone();
        let mut warnings = Vec::new();

        if let Err(err) = self.run(&Step::RESET, port, &DesiredConfig::reset_defaults()).await {
            warn!(error = %err, "Port reset did not complete");
            warnings.push(err.to_string());
        }

        match load_port(self.api, &PortLocator::Id(port_id)).await {
            Ok(port) => {
                for finding in reset_findings(&port) {
                    warn!("{}", finding);
                    warnings.push(finding);
                }
                ResetOutcome {
                    port: Some(port),
                    warnings,
                }
            },
            Err(err) => {
                warn!(error = %err, "Could not read port back after reset");
                warnings.push(err.to_string());
                ResetOutcome {
                    port: None,
                    warnings,
                }
            },
        }
    }

    async fn run(
        &self,
        steps: &[Step],
        mut port: Port,
        desired: &DesiredConfig,
    ) -> Result<Port, ReconcileError> {
        let pass = PassContext::capture(&port, desired);
        for step in steps {
            port = self.apply(*step, port, desired, &pass).await?;
        }
        Ok(port)
    }

    async fn apply(
        &self,
        step: Step,
        port: Port,
        desired: &DesiredConfig,
        pass: &PassContext,
    ) -> Result<Port, ReconcileError> {
        let on_error = |err: ApiError| ReconcileError::transition(step, err);

        match step {
            Step::SanityCheck => {
                desired.validate(&port, &pass.vlan_ids)?;
                Ok(port)
            },
            Step::RemoveVlans => {
                let plan =
                    TransitionPlan::compute(&port.attached_vlan_ids(), &pass.vlan_ids, None, true);
                self.submit(step, port, &plan).await
            },
            Step::Disbond if port.bonded && !desired.bonded => {
                debug!(%step, "Applying transition");
                let port = self.api.disbond(&port.id).await.map_err(on_error)?;
                self.refetch(step, &port.id).await
            },
            Step::ConvertToLayer2 if desired.layer2 == Some(true) && !port.is_layer2() => {
                debug!(%step, "Applying transition");
                self.api.convert_to_layer2(&port.id).await.map_err(on_error)
            },
            Step::Bond if !port.bonded && desired.bonded => {
                debug!(%step, "Applying transition");
                let port = self.api.bond(&port.id).await.map_err(on_error)?;
                self.refetch(step, &port.id).await
            },
            Step::ConvertToLayer3 if desired.layer2 == Some(false) && port.is_layer2() => {
                debug!(%step, "Applying transition");
                self.api
                    .convert_to_layer3(&port.id, &AddressRequest::layer3_defaults())
                    .await
                    .map_err(on_error)
            },
            Step::AssignVlans => {
                let plan = TransitionPlan {
                    vlans_to_remove: BTreeSet::new(),
                    ..TransitionPlan::compute(
                        &port.attached_vlan_ids(),
                        &pass.vlan_ids,
                        pass.native_reference.as_deref(),
                        false,
                    )
                };
                self.submit(step, port, &plan).await
            },
            Step::UpdateNativeVlan => {
                match (desired.native_vlan_id.as_deref(), port.native_vlan_id()) {
                    (Some(target), current) if current != Some(target) => {
                        debug!(%step, native_vlan = target, "Applying transition");
                        self.api.assign_native(&port.id, target).await.map_err(on_error)
                    },
                    (None, Some(_)) => {
                        debug!(%step, "Applying transition");
                        self.api.unassign_native(&port.id).await.map_err(on_error)
                    },
                    _ => Ok(port),
                }
            },
            Step::Disbond | Step::ConvertToLayer2 | Step::Bond | Step::ConvertToLayer3 => Ok(port),
        }
    }

    async fn refetch(&self, step: Step, port_id: &str) -> Result<Port, ReconcileError> {
        self.api
            .get_port(port_id)
            .await
            .map_err(|err| ReconcileError::transition(step, err))
    }

    /// Submit the batch for `plan` and wait for it. Empty plans are skipped.
    async fn submit(
        &self,
        step: Step,
        port: Port,
        plan: &TransitionPlan,
    ) -> Result<Port, ReconcileError> {
        let items = plan.batch();
        if items.is_empty() {
            return Ok(port);
        }

        let batch = self
            .api
            .create_vlan_batch(&port.id, &items)
            .await
            .map_err(|err| ReconcileError::Transition {
                step,
                message: format!("vlan assignment batch could not be created: {}", err),
            })?;
        info!(
            %step,
            batch_id = %batch.id,
            removals = plan.vlans_to_remove.len(),
            assignments = plan.vlans_to_assign.len(),
            "Submitted vlan assignment batch"
        );

        self.wait_for_batch(step, &port.id, &batch.id).await?;
        Ok(port.with_batch_applied(&plan.vlans_to_remove, &plan.vlans_to_assign))
    }

    async fn wait_for_batch(
        &self,
        step: Step,
        port_id: &str,
        batch_id: &str,
    ) -> Result<(), ReconcileError> {
        let started = Instant::now();

        for attempt in 1..=self.polling.max_attempts {
            sleep(self.polling.interval).await;

            let batch = self
                .api
                .get_vlan_batch(port_id, batch_id)
                .await
                .map_err(|err| ReconcileError::Transition {
                    step,
                    message: format!("vlan assignment batch {} could not be polled: {}", batch_id, err),
                })?;

            match batch.state {
                BatchState::Completed => {
                    debug!(batch_id, attempt, "Vlan assignment batch completed");
                    return Ok(());
                },
                BatchState::Failed => {
                    return Err(ReconcileError::Transition {
                        step,
                        message: format!(
                            "vlan assignment batch {} provisioning failed: {}",
                            batch_id,
                            batch.error_messages.join("; ")
                        ),
                    });
                },
                BatchState::Queued | BatchState::InProgress => {
                    debug!(batch_id, attempt, state = ?batch.state, "Waiting for vlan assignment batch");
                },
            }
        }

        Err(ReconcileError::Timeout {
            batch_id: batch_id.to_string(),
            elapsed: started.elapsed(),
        })
    }
}

/// Post-conditions of a reset that do not hold for `port`.
pub fn reset_findings(port: &Port) -> Vec<String> {
    let mut findings = Vec::new();
    if !port.bonded {
        findings.push(format!("port {} wasn't bonded after reset", port.id));
    }
    if port.is_bond_port() && !port.is_layer3() {
        findings.push("bond port should be in layer3 type after reset".to_string());
    }
    if port.native_vlan.is_some() {
        findings.push("port should not have native VLAN assigned after reset".to_string());
    }
    if !port.vlans.is_empty() {
        findings.push("port should not have VLANs attached after reset".to_string());
    }
    findings
}
