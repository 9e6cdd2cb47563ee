//! Equinix Metal port reconciliation.
//!
//! A pass loads a [`Port`](model::Port) snapshot, reads the declared
//! [`DesiredConfig`](desired::DesiredConfig), and lets the
//! [`PortReconciler`](executor::PortReconciler) walk the port through the
//! ordered transition steps. [`resource`] exposes the whole thing as the
//! `equinix_metal_port` resource and data source.

pub mod api;
pub mod desired;
pub mod executor;
pub mod loader;
pub mod locks;
pub mod model;
pub mod plan;
pub mod resource;
