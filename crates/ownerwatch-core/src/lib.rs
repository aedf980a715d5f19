//! ownerwatch-core: controller registry and event routing
//!
//! Controllers are described as data ([`ControllerDescriptor`]) collected in a
//! [`Registry`]. The [`bind`] entry point walks the registry and attaches one
//! primary watch plus one watch per owned secondary kind to a [`Manager`].
//! Every watch carries a [`WatchMapping`] that turns a changed object into the
//! [`ReconcileRequest`] of the primary resource it belongs to.

pub mod binder;
pub mod descriptor;
pub mod error;
pub mod kind;
pub mod manager;
pub mod mapping;
pub mod registry;
pub mod request;

pub use binder::{bind, BindSummary};
pub use descriptor::{ControllerDescriptor, HandlerId};
pub use error::{BindError, BoxedError, RegistryError};
pub use kind::ResourceKind;
pub use manager::{Manager, WatchTarget};
pub use mapping::{map_identity, map_owner_to_request, WatchMapping};
pub use registry::Registry;
pub use request::ReconcileRequest;
