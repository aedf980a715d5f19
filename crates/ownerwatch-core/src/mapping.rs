//! Event-to-request mapping
//!
//! Both functions run synchronously in the watch delivery path. They only
//! read metadata fields and never fail: an event either yields one request
//! or is dropped.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::kind::ResourceKind;
use crate::request::ReconcileRequest;

/// How a watch turns a changed object into a reconcile request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchMapping {
    /// The changed object is itself the primary to reconcile
    Identity,
    /// Reconcile the controlling owner of kind `owner`
    ControllerOwner { owner: ResourceKind },
}

impl WatchMapping {
    pub fn map(&self, meta: &ObjectMeta) -> Option<ReconcileRequest> {
        match self {
            WatchMapping::Identity => map_identity(meta),
            WatchMapping::ControllerOwner { owner } => map_owner_to_request(meta, owner),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, WatchMapping::Identity)
    }
}

/// Request for the object itself
///
/// Objects without a name (never the case for stored objects) are dropped.
pub fn map_identity(meta: &ObjectMeta) -> Option<ReconcileRequest> {
    let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
    Some(ReconcileRequest::new(
        meta.namespace.as_deref().unwrap_or_default(),
        name,
    ))
}

/// Request for the controlling owner of `primary_kind`, if any
///
/// Owner references are namespace-local, so the request takes the
/// secondary object's namespace.
pub fn map_owner_to_request(
    meta: &ObjectMeta,
    primary_kind: &ResourceKind,
) -> Option<ReconcileRequest> {
    let owner = meta
        .owner_references
        .as_deref()?
        .iter()
        .find(|owner| owner.controller == Some(true) && primary_kind.is_owner_kind(owner))?;

    Some(ReconcileRequest::new(
        meta.namespace.as_deref().unwrap_or_default(),
        owner.name.as_str(),
    ))
}
