//! Attach every registered controller's watches to a manager

use tracing::{debug, info};

use crate::descriptor::ControllerDescriptor;
use crate::error::BindError;
use crate::manager::{Manager, WatchTarget};
use crate::mapping::WatchMapping;
use crate::registry::Registry;

/// Counts of what a successful [`bind`] attached
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BindSummary {
    pub controllers: usize,
    pub primary_watches: usize,
    pub secondary_watches: usize,
}

/// Bind all descriptors of `registry` to `manager`, in registry order.
///
/// Fails fast: the first error is returned as-is and nothing is attached for
/// the remaining descriptors. Watches already attached are not rolled back;
/// callers exit on error.
pub async fn bind<M: Manager>(manager: &mut M, registry: &Registry) -> Result<BindSummary, BindError> {
    // Fresh client instead of the manager's shared one, whose cache would
    // list cluster-wide even when watches are namespace-scoped.
    let client = manager
        .new_client(manager.config())
        .map_err(BindError::client_init)?;

    let mut summary = BindSummary::default();

    for descriptor in registry {
        let secondaries = bind_one(manager, &client, descriptor).await?;

        summary.controllers += 1;
        summary.primary_watches += 1;
        summary.secondary_watches += secondaries;
    }

    info!(
        controllers = summary.controllers,
        primary_watches = summary.primary_watches,
        secondary_watches = summary.secondary_watches,
        "Bound all controllers"
    );

    Ok(summary)
}

/// Bind a single descriptor, returning the number of secondary watches
async fn bind_one<M: Manager>(
    manager: &mut M,
    client: &M::Client,
    descriptor: &ControllerDescriptor,
) -> Result<usize, BindError> {
    let handler = descriptor.handler();
    let primary = descriptor.primary_kind();

    let mut controller = manager
        .new_controller(handler, client)
        .map_err(|e| BindError::controller_creation(handler, e))?;

    controller
        .watch(primary, WatchMapping::Identity)
        .await
        .map_err(|e| BindError::watch_attach(handler, primary, e))?;

    debug!(handler = %handler, kind = %primary, "Attached primary watch");

    for kind in descriptor.secondary_kinds() {
        let mapping = WatchMapping::ControllerOwner {
            owner: primary.clone(),
        };
        controller
            .watch(kind, mapping)
            .await
            .map_err(|e| BindError::watch_attach(handler, kind, e))?;

        debug!(handler = %handler, kind = %kind, owner = %primary, "Attached secondary watch");
    }

    manager.add_controller(controller);

    info!(
        handler = %handler,
        primary = %primary,
        secondaries = descriptor.secondary_kinds().len(),
        "Controller bound"
    );

    Ok(descriptor.secondary_kinds().len())
}
