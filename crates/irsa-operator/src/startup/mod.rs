//! Startup tasks run before the controller starts

mod crds;

pub use crds::{crd_manifests, ensure_crds_installed};
