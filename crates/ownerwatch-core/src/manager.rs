//! Runtime manager surface consumed by the binder
//!
//! The manager owns the event sources and work queues. The binder only asks
//! it for a direct client, one controller per descriptor, and watches on
//! those controllers.

use async_trait::async_trait;

use crate::descriptor::HandlerId;
use crate::error::BoxedError;
use crate::kind::ResourceKind;
use crate::mapping::WatchMapping;

/// Shared runtime manager
pub trait Manager: Send {
    /// Connection configuration handed to [`Manager::new_client`]
    type Config: Send + Sync;
    /// Client that talks to the API server without going through a cache
    type Client: Send + Sync;
    /// Controller instance produced for one descriptor
    type Controller: WatchTarget;

    fn config(&self) -> &Self::Config;

    fn new_client(&self, config: &Self::Config) -> Result<Self::Client, BoxedError>;

    /// Create a controller feeding the handler named `handler`
    fn new_controller(
        &self,
        handler: &HandlerId,
        client: &Self::Client,
    ) -> Result<Self::Controller, BoxedError>;

    /// Take ownership of a controller whose watches are all attached
    fn add_controller(&mut self, controller: Self::Controller);
}

/// Controller that accepts watch subscriptions
#[async_trait]
pub trait WatchTarget: Send {
    /// Subscribe to changes on `kind`, routing each event through `mapping`
    async fn watch(&mut self, kind: &ResourceKind, mapping: WatchMapping) -> Result<(), BoxedError>;
}
