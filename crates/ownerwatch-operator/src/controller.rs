//! kube-runtime controller built from attached watches
//!
//! Each attached kind is resolved through API discovery when the watch is
//! attached, so unknown or unwatchable kinds fail binding instead of
//! surfacing later as a silently missing event stream.
//!
//! The primary watch is the controller's main stream (identity keyed by
//! kube-runtime itself). Secondary watches go through `watches_with` with
//! the ownership mapping, and kube-runtime's scheduler coalesces duplicate
//! requests for the same primary.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::discovery::{verbs, ApiCapabilities, Scope};
use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::Client;
use ownerwatch_core::{
    map_identity, BoxedError, HandlerId, ReconcileRequest, ResourceKind, WatchMapping, WatchTarget,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::handlers::{HandlerError, Reconciler};
use crate::retry::{compute_backoff, RetryTracker};

/// Watcher timeout (seconds), kept below the client read timeout (30s)
/// so idle watches are closed by the API server first.
const WATCH_TIMEOUT_SECS: u32 = 25;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("discovery failed for {kind}: {source}")]
    Discovery {
        kind: ResourceKind,
        #[source]
        source: kube::Error,
    },
    #[error("{0} does not support watch")]
    NotWatchable(ResourceKind),
    #[error("primary watch already attached ({0})")]
    PrimaryAlreadyAttached(ResourceKind),
    #[error("secondary watch on {0} attached before the primary watch")]
    MissingPrimary(ResourceKind),
    #[error("secondary watch maps to owner {owner} but the primary is {primary}")]
    OwnerMismatch {
        owner: ResourceKind,
        primary: ResourceKind,
    },
    #[error("controller for handler {0} has no primary watch")]
    NoPrimary(HandlerId),
}

/// A kind resolved against the API server
#[derive(Clone, Debug)]
struct WatchedKind {
    kind: ResourceKind,
    resource: ApiResource,
    scope: Scope,
}

#[derive(Clone, Debug)]
struct SecondaryWatch {
    watched: WatchedKind,
    mapping: WatchMapping,
}

/// Shared state for one controller's reconcile loop
struct ReconcileContext {
    handler: HandlerId,
    reconciler: Arc<dyn Reconciler>,
    client: Client,
    primary: ApiResource,
    store: Store<DynamicObject>,
    retry: RetryTracker,
}

/// Controller for one registered descriptor
pub struct KubeController {
    handler: HandlerId,
    reconciler: Arc<dyn Reconciler>,
    client: Client,
    namespace: Option<String>,
    primary: Option<WatchedKind>,
    secondaries: Vec<SecondaryWatch>,
}

impl KubeController {
    pub fn new(
        handler: HandlerId,
        reconciler: Arc<dyn Reconciler>,
        client: Client,
        namespace: Option<String>,
    ) -> Self {
        Self {
            handler,
            reconciler,
            client,
            namespace,
            primary: None,
            secondaries: Vec::new(),
        }
    }

    pub fn handler(&self) -> &HandlerId {
        &self.handler
    }

    pub fn primary_kind(&self) -> Option<&ResourceKind> {
        self.primary.as_ref().map(|p| &p.kind)
    }

    async fn resolve(&self, kind: &ResourceKind) -> Result<WatchedKind, WatchError> {
        let (resource, capabilities): (ApiResource, ApiCapabilities) =
            kube::discovery::pinned_kind(&self.client, &kind.to_gvk())
                .await
                .map_err(|source| WatchError::Discovery {
                    kind: kind.clone(),
                    source,
                })?;

        if !capabilities.supports_operation(verbs::WATCH) {
            return Err(WatchError::NotWatchable(kind.clone()));
        }

        Ok(WatchedKind {
            kind: kind.clone(),
            resource,
            scope: capabilities.scope,
        })
    }

    fn api(&self, watched: &WatchedKind) -> Api<DynamicObject> {
        match (&self.namespace, &watched.scope) {
            (Some(ns), Scope::Namespaced) => {
                Api::namespaced_with(self.client.clone(), ns, &watched.resource)
            }
            _ => Api::all_with(self.client.clone(), &watched.resource),
        }
    }

    /// Run the reconcile loop until shutdown
    pub async fn run(self) -> Result<(), WatchError> {
        let primary = self
            .primary
            .clone()
            .ok_or_else(|| WatchError::NoPrimary(self.handler.clone()))?;

        let mut controller = Controller::new_with(
            self.api(&primary),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            primary.resource.clone(),
        );
        let store = controller.store();

        for secondary in &self.secondaries {
            let owner = primary.resource.clone();
            let mapping = secondary.mapping.clone();
            controller = controller.watches_with(
                self.api(&secondary.watched),
                secondary.watched.resource.clone(),
                WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
                move |object: DynamicObject| {
                    mapping
                        .map(&object.metadata)
                        .map(|request| object_ref(&request, &owner))
                },
            );
        }

        info!(
            handler = %self.handler,
            primary = %primary.kind,
            secondaries = self.secondaries.len(),
            namespace = self.namespace.as_deref().unwrap_or("*"),
            "Starting controller"
        );

        let ctx = Arc::new(ReconcileContext {
            handler: self.handler.clone(),
            reconciler: self.reconciler.clone(),
            client: self.client.clone(),
            primary: primary.resource.clone(),
            store,
            retry: RetryTracker::new(),
        });
        let handler = &self.handler;

        controller
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| {
                match result {
                    Ok((object, _action)) => {
                        debug!(
                            handler = %handler,
                            name = %object.name,
                            namespace = object.namespace.as_deref().unwrap_or(""),
                            "Reconciled successfully"
                        );
                    }
                    Err(e) => {
                        warn!(handler = %handler, error = %e, "Controller error");
                    }
                }
                futures::future::ready(())
            })
            .await;

        Ok(())
    }
}

#[async_trait]
impl WatchTarget for KubeController {
    async fn watch(&mut self, kind: &ResourceKind, mapping: WatchMapping) -> Result<(), BoxedError> {
        check_watch_order(self.primary_kind(), kind, &mapping)?;
        let watched = self.resolve(kind).await?;

        debug!(
            handler = %self.handler,
            kind = %kind,
            plural = %watched.resource.plural,
            "Resolved watch"
        );

        if mapping.is_identity() {
            self.primary = Some(watched);
        } else {
            self.secondaries.push(SecondaryWatch { watched, mapping });
        }
        Ok(())
    }
}

/// A controller has exactly one primary, attached before any secondary,
/// and secondaries map to that primary.
fn check_watch_order(
    primary: Option<&ResourceKind>,
    kind: &ResourceKind,
    mapping: &WatchMapping,
) -> Result<(), WatchError> {
    match (mapping, primary) {
        (WatchMapping::Identity, Some(existing)) => {
            Err(WatchError::PrimaryAlreadyAttached(existing.clone()))
        }
        (WatchMapping::Identity, None) => Ok(()),
        (WatchMapping::ControllerOwner { .. }, None) => Err(WatchError::MissingPrimary(kind.clone())),
        (WatchMapping::ControllerOwner { owner }, Some(primary)) if owner != primary => {
            Err(WatchError::OwnerMismatch {
                owner: owner.clone(),
                primary: primary.clone(),
            })
        }
        (WatchMapping::ControllerOwner { .. }, Some(_)) => Ok(()),
    }
}

/// Reference to the primary object named by a request
fn object_ref(request: &ReconcileRequest, primary: &ApiResource) -> ObjectRef<DynamicObject> {
    let object = ObjectRef::new_with(&request.name, primary.clone());
    if request.is_cluster_scoped() {
        object
    } else {
        object.within(&request.namespace)
    }
}

#[instrument(skip(object, ctx), fields(
    handler = %ctx.handler,
    namespace = %object.metadata.namespace.as_deref().unwrap_or(""),
    name = %object.metadata.name.as_deref().unwrap_or("unknown"),
))]
async fn reconcile(
    object: Arc<DynamicObject>,
    ctx: Arc<ReconcileContext>,
) -> Result<Action, HandlerError> {
    let Some(request) = map_identity(&object.metadata) else {
        warn!("Primary object has no name, skipping");
        return Ok(Action::await_change());
    };

    let result = ctx
        .reconciler
        .reconcile(&request, object, ctx.client.clone())
        .await;
    if result.is_ok() {
        ctx.retry.reset(&request);
    }
    result
}

fn error_policy(object: Arc<DynamicObject>, error: &HandlerError, ctx: Arc<ReconcileContext>) -> Action {
    let request = map_identity(&object.metadata)
        .unwrap_or_else(|| ReconcileRequest::new("", "unknown"));
    let kind = error.kind();

    // Failed primaries that were deleted meanwhile never reach a success reset
    let pruned = ctx
        .retry
        .cleanup(|r| *r == request || ctx.store.get(&object_ref(r, &ctx.primary)).is_some());
    if pruned > 0 {
        debug!(handler = %ctx.handler, pruned, "Dropped retry state of deleted objects");
    }

    let attempt = ctx.retry.increment(&request);

    warn!(
        handler = %ctx.handler,
        request = %request,
        error = %error,
        attempt = attempt,
        error_kind = ?kind,
        "Reconciliation failed"
    );

    compute_backoff(attempt, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::MockReconciler;
    use kube::api::ObjectMeta;
    use kube::core::GroupVersionKind;
    use kube::runtime::reflector::store::Writer;
    use kube::runtime::watcher;

    fn database() -> ResourceKind {
        ResourceKind::new("db.example.com", "v1", "Database")
    }

    fn statefulset() -> ResourceKind {
        ResourceKind::new("apps", "v1", "StatefulSet")
    }

    fn database_resource() -> ApiResource {
        ApiResource::from_gvk(&GroupVersionKind::gvk("db.example.com", "v1", "Database"))
    }

    /// Client that never connects, tagged with a recognizable namespace
    fn client() -> Client {
        let mut config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        config.default_namespace = "databases".to_string();
        Client::try_from(config).unwrap()
    }

    fn context_with_store(reconciler: MockReconciler, store: Store<DynamicObject>) -> Arc<ReconcileContext> {
        Arc::new(ReconcileContext {
            handler: HandlerId::new("database"),
            reconciler: Arc::new(reconciler),
            client: client(),
            primary: database_resource(),
            store,
            retry: RetryTracker::new(),
        })
    }

    fn context(reconciler: MockReconciler) -> Arc<ReconcileContext> {
        let writer = Writer::<DynamicObject>::new(database_resource());
        context_with_store(reconciler, writer.as_reader())
    }

    fn dynamic(namespace: &str, name: &str) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: ObjectMeta {
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            },
            data: serde_json::Value::Null,
        }
    }

    fn object(namespace: &str, name: &str) -> Arc<DynamicObject> {
        Arc::new(dynamic(namespace, name))
    }

    #[test]
    fn test_watch_order_primary_first() {
        assert!(check_watch_order(None, &database(), &WatchMapping::Identity).is_ok());
    }

    #[test]
    fn test_watch_order_rejects_second_primary() {
        let result = check_watch_order(Some(&database()), &statefulset(), &WatchMapping::Identity);
        assert!(matches!(result, Err(WatchError::PrimaryAlreadyAttached(_))));
    }

    #[test]
    fn test_watch_order_rejects_secondary_without_primary() {
        let mapping = WatchMapping::ControllerOwner { owner: database() };
        let result = check_watch_order(None, &statefulset(), &mapping);
        assert!(matches!(result, Err(WatchError::MissingPrimary(_))));
    }

    #[test]
    fn test_watch_order_rejects_foreign_owner() {
        let mapping = WatchMapping::ControllerOwner {
            owner: ResourceKind::new("db.example.com", "v1", "Backup"),
        };
        let result = check_watch_order(Some(&database()), &statefulset(), &mapping);
        assert!(matches!(result, Err(WatchError::OwnerMismatch { .. })));
    }

    #[test]
    fn test_watch_order_accepts_secondary() {
        let mapping = WatchMapping::ControllerOwner { owner: database() };
        assert!(check_watch_order(Some(&database()), &statefulset(), &mapping).is_ok());
    }

    #[test]
    fn test_object_ref_namespaced() {
        let object = object_ref(&ReconcileRequest::new("a", "x"), &database_resource());
        assert_eq!(object.name, "x");
        assert_eq!(object.namespace.as_deref(), Some("a"));
    }

    #[test]
    fn test_object_ref_cluster_scoped() {
        let object = object_ref(&ReconcileRequest::new("", "global"), &database_resource());
        assert_eq!(object.name, "global");
        assert_eq!(object.namespace, None);
    }

    #[tokio::test]
    async fn test_reconcile_passes_identity_request() {
        let mut reconciler = MockReconciler::new();
        reconciler
            .expect_reconcile()
            .withf(|request, _, _| *request == ReconcileRequest::new("a", "x"))
            .times(1)
            .returning(|_, _, _| Ok(Action::await_change()));
        let ctx = context(reconciler);

        let action = reconcile(object("a", "x"), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_reconcile_hands_over_direct_client() {
        let mut reconciler = MockReconciler::new();
        reconciler
            .expect_reconcile()
            .withf(|_, _, client| client.default_namespace() == "databases")
            .times(1)
            .returning(|_, _, _| Ok(Action::await_change()));
        let ctx = context(reconciler);

        reconcile(object("a", "x"), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_success_resets_retries() {
        let mut reconciler = MockReconciler::new();
        reconciler
            .expect_reconcile()
            .returning(|_, _, _| Ok(Action::await_change()));
        let ctx = context(reconciler);
        let request = ReconcileRequest::new("a", "x");

        ctx.retry.increment(&request);
        ctx.retry.increment(&request);
        reconcile(object("a", "x"), ctx.clone()).await.unwrap();

        assert_eq!(ctx.retry.get(&request), 0);
    }

    #[tokio::test]
    async fn test_reconcile_skips_unnamed_object() {
        let mut reconciler = MockReconciler::new();
        reconciler.expect_reconcile().never();
        let ctx = context(reconciler);

        let unnamed = Arc::new(DynamicObject {
            types: None,
            metadata: ObjectMeta::default(),
            data: serde_json::Value::Null,
        });
        let action = reconcile(unnamed, ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_error_policy_backs_off_transient() {
        let ctx = context(MockReconciler::new());
        let error = HandlerError::Transient("database not ready".to_string());

        let first = error_policy(object("a", "x"), &error, ctx.clone());
        let second = error_policy(object("a", "x"), &error, ctx.clone());

        assert_eq!(first, Action::requeue(std::time::Duration::from_secs(5)));
        assert_eq!(second, Action::requeue(std::time::Duration::from_secs(10)));
        assert_eq!(ctx.retry.get(&ReconcileRequest::new("a", "x")), 2);
    }

    #[tokio::test]
    async fn test_error_policy_permanent_awaits_change() {
        let ctx = context(MockReconciler::new());
        let error = HandlerError::Permanent("invalid spec".to_string());

        assert_eq!(error_policy(object("a", "x"), &error, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn test_error_policy_drops_retry_state_of_deleted_objects() {
        let mut writer = Writer::<DynamicObject>::new(database_resource());
        writer.apply_watcher_event(&watcher::Event::Apply(dynamic("a", "x")));
        writer.apply_watcher_event(&watcher::Event::Apply(dynamic("a", "kept")));
        let ctx = context_with_store(MockReconciler::new(), writer.as_reader());

        let kept = ReconcileRequest::new("a", "kept");
        let deleted = ReconcileRequest::new("a", "deleted");
        ctx.retry.increment(&kept);
        ctx.retry.increment(&deleted);

        let error = HandlerError::Permanent("invalid spec".to_string());
        error_policy(object("a", "x"), &error, ctx.clone());

        assert_eq!(ctx.retry.get(&kept), 1);
        assert_eq!(ctx.retry.get(&deleted), 0);
        assert_eq!(ctx.retry.get(&ReconcileRequest::new("a", "x")), 1);
    }
}
