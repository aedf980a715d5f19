//! Resource kind identity (group/version/kind)

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::GroupVersionKind;

/// Identifier of a resource type
///
/// An empty group denotes the core API group (`v1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    group: String,
    version: String,
    kind: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// A kind without a version or a kind name identifies nothing
    pub fn is_empty(&self) -> bool {
        self.kind.is_empty() || self.version.is_empty()
    }

    /// Same group and kind, at any version.
    ///
    /// Versions of one kind are views of the same stored objects.
    pub fn same_resource(&self, other: &ResourceKind) -> bool {
        self.group == other.group && self.kind == other.kind
    }

    pub fn to_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }

    /// Whether an owner reference points at an object of this kind.
    ///
    /// Only group and kind are compared: owner references keep the version
    /// they were written with, while the owner may be served at another one.
    pub fn is_owner_kind(&self, owner: &OwnerReference) -> bool {
        let (group, _) = split_api_version(&owner.api_version);
        owner.kind == self.kind && group == self.group
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.kind, self.version)
        } else {
            write!(f, "{}.{}.{}", self.kind, self.version, self.group)
        }
    }
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
