use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// An action the caixa engine can gate by device/role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    OpenSession,
    CloseSession,
    Sangria,
    Reforco,
    Despesa,
    ViewOnly,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::OpenSession => "open_session",
            Capability::CloseSession => "close_session",
            Capability::Sangria => "sangria",
            Capability::Reforco => "reforco",
            Capability::Despesa => "despesa",
            Capability::ViewOnly => "view_only",
        }
    }

    const ALL: [Capability; 6] = [
        Capability::OpenSession,
        Capability::CloseSession,
        Capability::Sangria,
        Capability::Reforco,
        Capability::Despesa,
        Capability::ViewOnly,
    ];
}

/// The set of actions granted to a device/role pair.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(HashSet<Capability>);

impl CapabilitySet {
    /// Every capability (trusted-terminal grant).
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
