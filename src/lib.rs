//! Equinix Metal port provider
//!
//! This crate manages the network configuration of an Equinix Metal device
//! port: bonding, layer2/layer3 mode, attached VLANs and the native VLAN.
//! A declared configuration is converged through a fixed sequence of
//! upstream transitions, with VLAN changes submitted as assignment batches
//! and polled until they settle.
//!
//! # Overview
//!
//! - **Reconciliation core** ([`metal`]): port snapshots, the declared
//!   configuration, the diff between them and the ordered transition steps
//! - **ProviderService trait**: the lifecycle surface a host drives
//! - **Schema types**: attribute schemas and [`validate`]
//! - **Error types**: [`ReconcileError`] for the core, [`ProviderError`] for the host
//! - **Logging**: Integration with `tracing` for structured logging
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use equinix_metal_provider::{init_logging, MetalProvider, ProviderService, PORT_RESOURCE};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let provider = MetalProvider::new(Arc::new(MyMetalClient::from_env()?));
//!     provider.configure(json!({"batch_poll_attempts": 60})).await?;
//!
//!     let state = provider
//!         .create(
//!             PORT_RESOURCE,
//!             json!({
//!                 "port_id": "9b8e0a63-bond0",
//!                 "bonded": true,
//!                 "layer2": true,
//!                 "vlan_ids": ["vlan-a", "vlan-b"],
//!                 "native_vlan_id": "vlan-a",
//!             }),
//!         )
//!         .await?;
//!     tracing::info!(network_type = %state["network_type"], "Port converged");
//!     Ok(())
//! }
//! ```
//!
//! `MyMetalClient` stands for any implementation of
//! [`MetalPortApi`](metal::api::MetalPortApi).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metal;
pub mod provider;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;

// Re-export main types at crate root
pub use config::ProviderConfig;
pub use error::{ProviderError, ReconcileError};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use metal::resource::{MetalProvider, PORT_RESOURCE};
pub use provider::ProviderService;
pub use schema::ProviderSchema;
pub use types::{AttributeChange, ImportedResource, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
