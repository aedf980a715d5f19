//! Per-controller registration data

use std::collections::HashSet;
use std::fmt;

use crate::error::RegistryError;
use crate::kind::ResourceKind;

/// Name of the reconciliation handler a controller feeds
///
/// The runtime manager resolves this to an actual handler when the
/// controller is created. An empty id means "unset".
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(String);

impl HandlerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HandlerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for HandlerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One controller: a primary kind, the kinds it owns, and its handler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerDescriptor {
    primary_kind: ResourceKind,
    secondary_kinds: Vec<ResourceKind>,
    handler: HandlerId,
}

impl ControllerDescriptor {
    pub fn new(primary_kind: ResourceKind, handler: impl Into<HandlerId>) -> Self {
        Self {
            primary_kind,
            secondary_kinds: Vec::new(),
            handler: handler.into(),
        }
    }

    /// Add an owned secondary kind. Order of calls is watch order.
    pub fn owns(mut self, kind: ResourceKind) -> Self {
        self.secondary_kinds.push(kind);
        self
    }

    pub fn primary_kind(&self) -> &ResourceKind {
        &self.primary_kind
    }

    pub fn secondary_kinds(&self) -> &[ResourceKind] {
        &self.secondary_kinds
    }

    pub fn handler(&self) -> &HandlerId {
        &self.handler
    }

    /// Check the registration invariants
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.primary_kind.is_empty() {
            return Err(RegistryError::InvalidDescriptor(format!(
                "primary kind is empty ({:?})",
                self.primary_kind
            )));
        }

        if self.handler.is_empty() {
            return Err(RegistryError::InvalidDescriptor(format!(
                "no handler set for primary kind {}",
                self.primary_kind
            )));
        }

        let mut seen = HashSet::with_capacity(self.secondary_kinds.len());
        for kind in &self.secondary_kinds {
            if kind.is_empty() {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "empty secondary kind ({:?}) under {}",
                    kind, self.primary_kind
                )));
            }
            if kind.same_resource(&self.primary_kind) {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "{} cannot own itself",
                    self.primary_kind
                )));
            }
            if !seen.insert((kind.group(), kind.kind())) {
                return Err(RegistryError::InvalidDescriptor(format!(
                    "duplicate secondary kind {} under {}",
                    kind, self.primary_kind
                )));
            }
        }

        Ok(())
    }
}
