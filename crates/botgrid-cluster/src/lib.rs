//! botgrid-cluster: tenant provisioning against the cluster control plane.
//!
//! Every bot gets its own tenant boundary: one namespace holding one
//! service account, one empty role bound to it, one credential secret and
//! at most one pod.
//!
//! # Architecture
//!
//! ```text
//! Provisioner (ensure-semantics, pod hardening)
//!   └── dyn ControlPlane
//!       ├── KubeClient            (Kubernetes REST API, kubeconfig or in-cluster)
//!       └── InMemoryControlPlane  (tests, dry runs)
//! ```
//!
//! "Already exists" from the control plane is a warning inside every
//! `ensure_*` operation. Every other failure propagates.

pub mod control_plane;
pub mod error;
pub mod kube;
pub mod kubeconfig;
pub mod memory;
pub mod provisioner;
pub mod resources;

pub use control_plane::ControlPlane;
pub use error::{ClusterError, ClusterResult, ProvisionError, ProvisionResult};
pub use kube::KubeClient;
pub use kubeconfig::{Endpoint, Kubeconfig};
pub use memory::{ControlPlaneCall, InMemoryControlPlane, Operation};
pub use provisioner::Provisioner;
