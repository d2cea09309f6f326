//! Frontend tier reconciliation.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::runtime::controller::ReconcilerAction;
use kube::Resource;

use crate::k8s::store::is_not_found;
use crate::k8s::{requeue_now, Reconciler};
use visitors_core::crd::{RequiredMetadata, VisitorsApp};
use visitors_core::ReconcileError;

/// The tier label value of the frontend.
const TIER: &str = "frontend";
/// The pod container name of the frontend web UI.
const CONTAINER_NAME: &str = "visitors-webui";
/// The pinned frontend container image.
pub(super) const IMAGE: &str = "jdob/visitors-webui:1.0.0";
/// The port on which the frontend web UI listens.
const PORT: i32 = 3000;
/// The node port on which the frontend web UI is reachable from outside the cluster.
const NODE_PORT: i32 = 30686;
/// The env var carrying the display title of the web UI.
const ENV_TITLE: &str = "REACT_APP_TITLE";

/// The name of the frontend Deployment for the given VisitorsApp.
pub(super) fn deployment_name(app: &VisitorsApp) -> String {
    format!("{}-frontend", app.name())
}

/// The name of the frontend Service for the given VisitorsApp.
pub(super) fn service_name(app: &VisitorsApp) -> String {
    format!("{}-frontend-svc", app.name())
}

/// Build the frontend Deployment.
pub(super) fn deployment(app: &VisitorsApp) -> Deployment {
    let labels = super::labels(app, TIER);

    // The title var is omitted entirely when no title is requested, so the web UI falls
    // back to its built-in default rather than rendering an empty string.
    let mut env = Vec::new();
    if let Some(title) = app.spec.title.as_deref().filter(|title| !title.is_empty()) {
        env.push(EnvVar {
            name: ENV_TITLE.into(),
            value: Some(title.to_string()),
            ..Default::default()
        });
    }

    // Build metadata.
    let mut deployment = Deployment::default();
    deployment.meta_mut().namespace = Some(app.namespace().to_string());
    deployment.meta_mut().name = Some(deployment_name(app));
    deployment.meta_mut().labels = Some(labels.clone());
    super::set_owner_reference(&mut deployment, app);

    // Build spec. The replica count is fixed at 1 and is not user-configurable.
    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(1);
    spec.selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };
    spec.template = PodTemplateSpec {
        metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.into(),
                image: Some(IMAGE.into()),
                ports: Some(vec![ContainerPort {
                    container_port: PORT,
                    ..Default::default()
                }]),
                env: if env.is_empty() { None } else { Some(env) },
                ..Default::default()
            }],
            ..Default::default()
        }),
    };

    deployment
}

/// Build the NodePort Service exposing the frontend outside the cluster.
pub(super) fn service(app: &VisitorsApp) -> Service {
    let labels = super::labels(app, TIER);

    // Build metadata.
    let mut service = Service::default();
    service.meta_mut().namespace = Some(app.namespace().to_string());
    service.meta_mut().name = Some(service_name(app));
    service.meta_mut().labels = Some(labels.clone());
    super::set_owner_reference(&mut service, app);

    // Build spec.
    let spec = service.spec.get_or_insert_with(Default::default);
    spec.selector = Some(labels);
    spec.type_ = Some("NodePort".into());
    spec.ports = Some(vec![ServicePort {
        protocol: Some("TCP".into()),
        port: PORT,
        target_port: Some(IntOrString::Int(PORT)),
        node_port: Some(NODE_PORT),
        ..Default::default()
    }]);

    service
}

/// The desired title, if it differs from what the Deployment currently records.
///
/// The title lives in the first env entry of the first container; an absent entry reads
/// as the empty title.
pub(super) fn title_drift(app: &VisitorsApp, deployment: &Deployment) -> Option<String> {
    let desired = app.spec.title.clone().unwrap_or_default();
    let current = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|container| container.env.as_ref())
        .and_then(|env| env.first())
        .and_then(|var| var.value.clone())
        .unwrap_or_default();
    if desired != current {
        Some(desired)
    } else {
        None
    }
}

/// Write the given title into the first container's first env slot, inserting the title
/// var when the Deployment was created without one.
fn apply_title(deployment: &mut Deployment, title: &str) {
    let spec = deployment.spec.get_or_insert_with(Default::default);
    let pod = spec.template.spec.get_or_insert_with(Default::default);
    let container = match pod.containers.first_mut() {
        Some(container) => container,
        None => return,
    };
    let env = container.env.get_or_insert_with(Default::default);
    match env.first_mut() {
        Some(var) => var.value = Some(title.to_string()),
        None => env.push(EnvVar {
            name: ENV_TITLE.into(),
            value: Some(title.to_string()),
            ..Default::default()
        }),
    }
}

impl Reconciler {
    /// Converge the frontend Deployment's display title onto the requested one.
    ///
    /// A successful update requests an immediate requeue: the new title only takes effect
    /// once the pod template rolls, which should be observed sooner than the resync
    /// interval. A missing Deployment is surfaced as a retryable error.
    pub(super) async fn reconcile_frontend_drift(&self, app: &VisitorsApp) -> Result<Option<ReconcilerAction>, ReconcileError> {
        let name = deployment_name(app);
        let mut found = match self.store.get_deployment(app.namespace(), &name).await {
            Ok(found) => found,
            Err(err) if is_not_found(&err) => return Err(ReconcileError::ObjectPending(name)),
            Err(err) => return Err(err),
        };

        let title = match title_drift(app, &found) {
            Some(title) => title,
            None => return Ok(None),
        };
        tracing::info!(%name, %title, "updating frontend title");
        apply_title(&mut found, &title);
        self.store.update_deployment(&found).await?;

        Ok(Some(requeue_now()))
    }

    /// Record the applied frontend image on the VisitorsApp status.
    pub(super) async fn publish_frontend_status(&self, app: &VisitorsApp) -> Result<(), ReconcileError> {
        let mut updated = app.clone();
        updated.status.get_or_insert_with(Default::default).frontend_image = IMAGE.into();
        self.store.update_app_status(&updated).await?;
        Ok(())
    }
}
