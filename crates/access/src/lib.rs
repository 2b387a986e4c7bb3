//! `navalha-access` — pure device/role capability boundary.
//!
//! This crate is intentionally decoupled from transport and storage: it maps
//! an injected device classification and actor role to a capability set, and
//! the durable-write layer enforces that set. Nothing here trusts the UI.

pub mod capability;
pub mod device;
pub mod policy;
pub mod role;

pub use capability::{Capability, CapabilitySet};
pub use device::{DeviceClass, DeviceContext};
pub use policy::{CapabilityPolicy, authorize};
pub use role::Role;
