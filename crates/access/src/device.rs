use serde::{Deserialize, Serialize};

use navalha_core::DeviceId;

use crate::role::Role;

/// Device classification, resolved once per client session and injected.
///
/// Replaces runtime environment sniffing: callers construct this from the
/// device-classification signal of the provisioning layer and pass it with
/// every mutating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    /// Self-service kiosk; may not manage the session lifecycle.
    Kiosk,
    /// Trusted staff terminal.
    Trusted,
}

/// The calling device plus the actor behind it.
///
/// Travels with every mutating command so the capability check can happen at
/// the durable-write point, not merely in a UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub device_id: DeviceId,
    pub class: DeviceClass,
    pub role: Role,
}

impl DeviceContext {
    pub fn new(device_id: DeviceId, class: DeviceClass, role: Role) -> Self {
        Self {
            device_id,
            class,
            role,
        }
    }
}
