//! Reconciliation handlers addressed by [`HandlerId`]
//!
//! What a handler does with a request is up to the handler. The operator
//! only resolves handler ids when controllers are created and classifies
//! handler errors for retry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use kube::Client;
use ownerwatch_core::{HandlerId, ReconcileRequest};
use thiserror::Error;
use tracing::info;

use crate::retry::ErrorKind;

/// Id of the built-in handler that only logs requests
pub const LOG_HANDLER: &str = "log";

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl HandlerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Transient(_) => ErrorKind::Transient,
            HandlerError::Permanent(_) => ErrorKind::Permanent,
            // Bad requests will not fix themselves; everything else might
            HandlerError::Kube(kube::Error::Api(resp)) if resp.code == 400 || resp.code == 422 => {
                ErrorKind::Permanent
            }
            HandlerError::Kube(_) => ErrorKind::Transient,
        }
    }
}

/// Reconciliation logic for one primary kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Bring the primary named by `request` to its desired state.
    ///
    /// `client` is the direct client built at bind time. Reads through it
    /// go to the API server, not the controller's cache.
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        object: Arc<DynamicObject>,
        client: Client,
    ) -> Result<Action, HandlerError>;
}

/// Logs every request and waits for the next change
#[derive(Debug, Default)]
pub struct LogReconciler;

#[async_trait]
impl Reconciler for LogReconciler {
    async fn reconcile(
        &self,
        request: &ReconcileRequest,
        object: Arc<DynamicObject>,
        _client: Client,
    ) -> Result<Action, HandlerError> {
        info!(
            request = %request,
            kind = object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("unknown"),
            resource_version = object.metadata.resource_version.as_deref().unwrap_or(""),
            deleting = object.metadata.deletion_timestamp.is_some(),
            "Reconcile requested"
        );
        Ok(Action::await_change())
    }
}

/// Handlers available to controllers
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<HandlerId, Arc<dyn Reconciler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing the built-in handlers
    pub fn with_builtin() -> Self {
        let mut set = Self::new();
        set.insert(LOG_HANDLER, Arc::new(LogReconciler));
        set
    }

    /// Register a handler, replacing any previous one with the same id
    pub fn insert(&mut self, id: impl Into<HandlerId>, handler: Arc<dyn Reconciler>) {
        self.handlers.insert(id.into(), handler);
    }

    pub fn get(&self, id: &HandlerId) -> Option<Arc<dyn Reconciler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.handlers.contains_key(id)
    }

}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.handlers.keys().map(HandlerId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("HandlerSet").field("handlers", &ids).finish()
    }
}
