//! Error types for registration and binding

use std::error::Error as StdError;
use thiserror::Error;

use crate::descriptor::HandlerId;
use crate::kind::ResourceKind;

/// Boxed error for wrapping runtime-specific failures
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Errors raised while building a [`Registry`](crate::Registry)
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Descriptor violates one of the registration invariants
    #[error("invalid controller descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Fatal startup errors raised by [`bind`](crate::bind)
///
/// None of these are retried. The caller is expected to exit.
#[derive(Debug, Error)]
pub enum BindError {
    /// Direct client could not be constructed from the manager config
    #[error("failed to construct direct client: {source}")]
    ClientInit {
        #[source]
        source: BoxedError,
    },

    /// Runtime refused to create a controller for a handler
    #[error("failed to create controller for handler {handler}: {source}")]
    ControllerCreation {
        handler: HandlerId,
        #[source]
        source: BoxedError,
    },

    /// A primary or secondary watch could not be attached
    #[error("failed to attach watch on {kind} for handler {handler}: {source}")]
    WatchAttach {
        handler: HandlerId,
        kind: ResourceKind,
        #[source]
        source: BoxedError,
    },
}

impl BindError {
    pub(crate) fn client_init(source: impl Into<BoxedError>) -> Self {
        Self::ClientInit {
            source: source.into(),
        }
    }

    pub(crate) fn controller_creation(handler: &HandlerId, source: impl Into<BoxedError>) -> Self {
        Self::ControllerCreation {
            handler: handler.clone(),
            source: source.into(),
        }
    }

    pub(crate) fn watch_attach(
        handler: &HandlerId,
        kind: &ResourceKind,
        source: impl Into<BoxedError>,
    ) -> Self {
        Self::WatchAttach {
            handler: handler.clone(),
            kind: kind.clone(),
            source: source.into(),
        }
    }
}
