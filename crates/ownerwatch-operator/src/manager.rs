//! kube-rs backed runtime manager

use futures::future::select_all;
use kube::Client;
use ownerwatch_core::{BoxedError, HandlerId, Manager};
use thiserror::Error;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::controller::{KubeController, WatchError};
use crate::handlers::HandlerSet;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("no handler registered under id {0}")]
    UnknownHandler(HandlerId),
    #[error("{0} controller exited unexpectedly")]
    ControllerExited(HandlerId),
    #[error("{handler} controller failed: {source}")]
    ControllerFailed {
        handler: HandlerId,
        #[source]
        source: WatchError,
    },
    #[error("{handler} controller task failed: {source}")]
    ControllerTask {
        handler: HandlerId,
        #[source]
        source: JoinError,
    },
}

/// Runtime manager holding the kube config and the bound controllers
pub struct KubeManager {
    config: kube::Config,
    watch_namespace: Option<String>,
    handlers: HandlerSet,
    controllers: Vec<KubeController>,
}

impl KubeManager {
    pub fn new(config: kube::Config, watch_namespace: Option<String>, handlers: HandlerSet) -> Self {
        Self {
            config,
            watch_namespace,
            handlers,
            controllers: Vec::new(),
        }
    }

    pub fn controllers(&self) -> &[KubeController] {
        &self.controllers
    }

    /// Run all bound controllers concurrently.
    ///
    /// Controllers are expected to run forever; the first one to stop ends
    /// the manager with an error. Without controllers this never returns.
    pub async fn run(self) -> Result<(), ManagerError> {
        if self.controllers.is_empty() {
            warn!("No controllers bound, idling");
            futures::future::pending::<()>().await;
        }

        let mut handlers = Vec::with_capacity(self.controllers.len());
        let mut tasks = Vec::with_capacity(self.controllers.len());
        for controller in self.controllers {
            info!(handler = %controller.handler(), "Starting controller task");
            handlers.push(controller.handler().clone());
            tasks.push(tokio::spawn(controller.run()));
        }

        info!(count = tasks.len(), "All controllers spawned");

        let (result, index, _remaining) = select_all(tasks).await;
        let handler = handlers
            .get(index)
            .cloned()
            .unwrap_or_else(|| HandlerId::new("unknown"));

        Err(controller_exit_error(handler, result))
    }
}

/// Map a finished controller task to the error that ends the manager
fn controller_exit_error(
    handler: HandlerId,
    result: Result<Result<(), WatchError>, JoinError>,
) -> ManagerError {
    match result {
        Ok(Ok(())) => {
            error!(controller = %handler, "Controller exited unexpectedly");
            ManagerError::ControllerExited(handler)
        }
        Ok(Err(source)) => {
            error!(controller = %handler, error = %source, "Controller failed");
            ManagerError::ControllerFailed { handler, source }
        }
        Err(source) if source.is_cancelled() => {
            warn!(controller = %handler, "Controller was cancelled");
            ManagerError::ControllerTask { handler, source }
        }
        Err(source) => {
            error!(controller = %handler, error = ?source, "Controller task failed");
            ManagerError::ControllerTask { handler, source }
        }
    }
}

impl Manager for KubeManager {
    type Config = kube::Config;
    type Client = Client;
    type Controller = KubeController;

    fn config(&self) -> &kube::Config {
        &self.config
    }

    fn new_client(&self, config: &kube::Config) -> Result<Client, BoxedError> {
        Ok(Client::try_from(config.clone())?)
    }

    fn new_controller(&self, handler: &HandlerId, client: &Client) -> Result<KubeController, BoxedError> {
        let reconciler = self
            .handlers
            .get(handler)
            .ok_or_else(|| ManagerError::UnknownHandler(handler.clone()))?;

        Ok(KubeController::new(
            handler.clone(),
            reconciler,
            client.clone(),
            self.watch_namespace.clone(),
        ))
    }

    fn add_controller(&mut self, controller: KubeController) {
        self.controllers.push(controller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::LOG_HANDLER;
    use ownerwatch_core::{bind, BindError, ControllerDescriptor, Registry, ResourceKind};

    /// Config pointing at a port nothing listens on
    fn unreachable_config() -> kube::Config {
        kube::Config::new("http://127.0.0.1:1".parse().unwrap())
    }

    fn manager() -> KubeManager {
        KubeManager::new(
            unreachable_config(),
            Some("databases".to_string()),
            HandlerSet::with_builtin(),
        )
    }

    #[tokio::test]
    async fn test_new_client_does_not_connect() {
        let manager = manager();
        assert!(manager.new_client(manager.config()).is_ok());
    }

    #[tokio::test]
    async fn test_new_controller_unknown_handler() {
        let manager = manager();
        let client = manager.new_client(manager.config()).unwrap();

        let err = manager
            .new_controller(&HandlerId::new("missing"), &client)
            .err()
            .unwrap();
        assert!(err.to_string().contains("no handler registered"));
    }

    #[tokio::test]
    async fn test_new_controller_known_handler() {
        let manager = manager();
        let client = manager.new_client(manager.config()).unwrap();

        let controller = manager
            .new_controller(&HandlerId::new(LOG_HANDLER), &client)
            .unwrap();
        assert_eq!(controller.handler().as_str(), LOG_HANDLER);
        assert!(controller.primary_kind().is_none());
    }

    #[tokio::test]
    async fn test_bind_unknown_handler_fails() {
        let mut manager = manager();
        let registry = Registry::from_descriptors(vec![ControllerDescriptor::new(
            ResourceKind::new("db.example.com", "v1", "Database"),
            "missing",
        )])
        .unwrap();

        let err = bind(&mut manager, &registry).await.unwrap_err();
        assert!(matches!(err, BindError::ControllerCreation { .. }));
        assert!(manager.controllers().is_empty());
    }

    #[tokio::test]
    async fn test_bind_unreachable_api_server_fails_on_watch() {
        let mut manager = manager();
        let registry = Registry::from_descriptors(vec![ControllerDescriptor::new(
            ResourceKind::new("db.example.com", "v1", "Database"),
            LOG_HANDLER,
        )])
        .unwrap();

        let err = bind(&mut manager, &registry).await.unwrap_err();
        assert!(matches!(err, BindError::WatchAttach { .. }));
        assert!(manager.controllers().is_empty());
    }

    #[test]
    fn test_controller_exit_is_an_error() {
        let err = controller_exit_error(HandlerId::new("database"), Ok(Ok(())));
        assert!(matches!(err, ManagerError::ControllerExited(_)));
        assert_eq!(err.to_string(), "database controller exited unexpectedly");
    }

    #[test]
    fn test_controller_failure_keeps_source() {
        let err = controller_exit_error(
            HandlerId::new("database"),
            Ok(Err(WatchError::NoPrimary(HandlerId::new("database")))),
        );
        assert!(matches!(err, ManagerError::ControllerFailed { .. }));
    }
}
