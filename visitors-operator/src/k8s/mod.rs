//! Kubernetes controller.
//!
//! This controller watches VisitorsApp CRs in the configured namespace and converges the
//! cluster onto the state they describe. Each VisitorsApp owns the Deployments, Services
//! and the database auth Secret which realize its three tiers, and changes to any owned
//! object retrigger reconciliation of the owning CR.
//!
//! ## Reconciliation
//! Reconciliation is level-triggered and runs as an explicit ordered pipeline: ensure the
//! database credentials and workload exist, gate on database readiness, ensure the backend
//! and frontend workloads exist, reconcile drift on the mutable fields, then publish the
//! applied images to the CR status. Every step is idempotent, so a pass abandoned at any
//! point is safely re-run from scratch on the next invocation. No retry loops live here;
//! errors short-circuit the pipeline and the driving work-queue applies the backoff.

mod backend;
mod database;
mod ensure;
#[cfg(test)]
mod fixtures;
mod frontend;
mod store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::prelude::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::controller::{Context, Controller as ControllerRuntime, ReconcilerAction};
use kube::Resource;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::k8s::store::{KubeStore, Store};
use visitors_core::crd::{RequiredMetadata, VisitorsApp};
use visitors_core::ReconcileError;

/// The app name used by the operator, also recorded as the field manager on status patches.
pub(crate) const APP_NAME: &str = "visitors-operator";
/// The delay before a failed or not-yet-ready reconciliation is retried.
const RETRY_DELAY: Duration = Duration::from_secs(5);
/// The interval at which a fully converged VisitorsApp is re-examined.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// The label recording the owning VisitorsApp CR of a managed object.
const LABEL_OWNER_CR: &str = "visitorssite_cr";
/// The label recording the application tier of a managed object.
const LABEL_TIER: &str = "tier";

/// Kubernetes controller for watching VisitorsApp CRs.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            client,
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let apps: Api<VisitorsApp> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let services: Api<Service> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.config.namespace);

        let reconciler = Reconciler::new(Arc::new(KubeStore::new(self.client.clone())));
        // The applier guarantees single-flight per CR identity; `owns` relates the managed
        // objects back to their owning VisitorsApp through their owner references.
        let mut reconciliations = ControllerRuntime::new(apps, ListParams::default())
            .owns(deployments, ListParams::default())
            .owns(services, ListParams::default())
            .owns(secrets, ListParams::default())
            .run(reconcile, error_policy, Context::new(reconciler))
            .boxed();

        loop {
            tokio::select! {
                _ = self.shutdown_rx.next() => break,
                Some(res) = reconciliations.next() => match res {
                    Ok((object, _action)) => tracing::debug!(%object, "reconciled VisitorsApp"),
                    Err(err) => tracing::error!(error = ?err, "error from reconciliation stream"),
                },
                else => break,
            }
        }

        tracing::debug!("k8s controller has shut down");
        Ok(())
    }
}

/// Reconcile the given VisitorsApp.
#[tracing::instrument(level = "debug", skip(app, ctx), fields(name = %app.name(), namespace = %app.namespace()))]
async fn reconcile(app: VisitorsApp, ctx: Context<Reconciler>) -> Result<ReconcilerAction, ReconcileError> {
    ctx.get_ref().reconcile(&app).await
}

/// Handle a reconciliation error, scheduling the retry.
fn error_policy(error: &ReconcileError, _ctx: Context<Reconciler>) -> ReconcilerAction {
    tracing::error!(%error, "error reconciling VisitorsApp");
    requeue_after(RETRY_DELAY)
}

/// The reconciliation logic for a single VisitorsApp, bound to a cluster store.
pub(super) struct Reconciler {
    /// Handle to the cluster object store.
    store: Arc<dyn Store>,
}

impl Reconciler {
    /// Create a new instance.
    pub(super) fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Converge the cluster onto the state described by the given VisitorsApp.
    ///
    /// Steps run strictly in order and any error aborts the remainder of the pass. The
    /// backend and frontend tiers are only provisioned once the database tier reports a
    /// running replica.
    pub(super) async fn reconcile(&self, app: &VisitorsApp) -> Result<ReconcilerAction, ReconcileError> {
        self.ensure_secret(&database::auth_secret(app)).await?;
        self.ensure_deployment(&database::deployment(app)).await?;
        self.ensure_service(&database::service(app)).await?;

        if !self.database_ready(app).await {
            tracing::info!(name = app.name(), "database is not ready, deferring backend provisioning");
            return Ok(requeue_after(RETRY_DELAY));
        }

        self.ensure_deployment(&backend::deployment(app)).await?;
        self.ensure_service(&backend::service(app)).await?;
        self.ensure_deployment(&frontend::deployment(app)).await?;
        self.ensure_service(&frontend::service(app)).await?;

        if let Some(action) = self.reconcile_backend_drift(app).await? {
            return Ok(action);
        }
        if let Some(action) = self.reconcile_frontend_drift(app).await? {
            return Ok(action);
        }

        self.publish_backend_status(app).await?;
        self.publish_frontend_status(app).await?;

        Ok(requeue_after(RESYNC_INTERVAL))
    }
}

/// Build a requeue action with the given delay.
fn requeue_after(delay: Duration) -> ReconcilerAction {
    ReconcilerAction { requeue_after: Some(delay) }
}

/// Build an action requesting an immediate requeue.
fn requeue_now() -> ReconcilerAction {
    ReconcilerAction { requeue_after: Some(Duration::from_secs(0)) }
}

/// The labels carried by every object managed for the given VisitorsApp.
///
/// The triple is the sole selector mechanism binding a Service to its Deployment and
/// distinguishing tiers within a namespace.
fn labels(app: &VisitorsApp, tier: &str) -> BTreeMap<String, String> {
    maplit::btreemap! {
        "app".into() => "visitors".into(),
        LABEL_OWNER_CR.into() => app.name().to_string(),
        LABEL_TIER.into() => tier.to_string(),
    }
}

/// Attach an owner reference for the given VisitorsApp to the object.
///
/// Ownership drives cascading deletion of managed objects when the CR is deleted. A CR
/// with incomplete identity is logged and skipped rather than aborting construction, as
/// manual cleanup remains possible without the reference.
fn set_owner_reference<K: Resource<DynamicType = ()>>(object: &mut K, app: &VisitorsApp) {
    let (name, uid) = match (app.meta().name.as_ref(), app.meta().uid.as_ref()) {
        (Some(name), Some(uid)) => (name.clone(), uid.clone()),
        _ => {
            tracing::warn!("unable to set owner reference, VisitorsApp identity is incomplete");
            return;
        }
    };
    let owner = OwnerReference {
        api_version: VisitorsApp::api_version(&()).to_string(),
        kind: VisitorsApp::kind(&()).to_string(),
        name,
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    };
    object.meta_mut().owner_references.get_or_insert_with(Default::default).push(owner);
}
