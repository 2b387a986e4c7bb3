use navalha_core::{LedgerError, LedgerResult};

use crate::capability::{Capability, CapabilitySet};
use crate::device::DeviceClass;
use crate::role::Role;

/// Capability policy: pure mapping from device class × role to a grant set.
///
/// Held as a value (not a static) so deployments can swap it and tests can
/// exercise it directly. The default policy:
///
/// - `Trusted` terminals: every capability, regardless of role.
/// - `Kiosk` devices: despesa entry and read-only views. Session lifecycle
///   and drawer-cash operations stay on trusted terminals.
///
/// Entrada/saída movements carry no capability of their own; they are
/// emitted by the order module on payment completion, not by operators.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityPolicy;

impl CapabilityPolicy {
    pub fn capabilities_for(&self, class: DeviceClass, role: &Role) -> CapabilitySet {
        let caps = match class {
            DeviceClass::Trusted => CapabilitySet::all(),
            DeviceClass::Kiosk => {
                CapabilitySet::from_iter([Capability::Despesa, Capability::ViewOnly])
            }
        };

        tracing::trace!(
            device_class = ?class,
            role = %role,
            granted = caps.len(),
            "resolved capability set"
        );

        caps
    }
}

/// Authorize a resolved capability set against a required action.
///
/// - No IO
/// - No panics
/// - No business logic (pure policy check)
pub fn authorize(caps: &CapabilitySet, required: Capability) -> LedgerResult<()> {
    if caps.allows(required) {
        Ok(())
    } else {
        Err(LedgerError::permission_denied(format!(
            "missing capability '{}'",
            required.as_str()
        )))
    }
}
