//! Backend tier reconciliation.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::runtime::controller::ReconcilerAction;
use kube::Resource;

use crate::k8s::store::is_not_found;
use crate::k8s::{database, Reconciler};
use visitors_core::crd::{RequiredMetadata, VisitorsApp};
use visitors_core::ReconcileError;

/// The tier label value of the backend.
const TIER: &str = "backend";
/// The pod container name of the backend service.
const CONTAINER_NAME: &str = "visitors-service";
/// The pinned backend container image.
pub(super) const IMAGE: &str = "jdob/visitors-service:1.0.0";
/// The port on which the backend service listens.
const PORT: i32 = 8000;
/// The node port on which the backend service is reachable from outside the cluster.
const NODE_PORT: i32 = 30685;

/// The name of the backend Deployment for the given VisitorsApp.
pub(super) fn deployment_name(app: &VisitorsApp) -> String {
    format!("{}-backend", app.name())
}

/// The name of the backend Service for the given VisitorsApp.
pub(super) fn service_name(app: &VisitorsApp) -> String {
    format!("{}-backend-svc", app.name())
}

/// Build the backend Deployment.
pub(super) fn deployment(app: &VisitorsApp) -> Deployment {
    let labels = super::labels(app, TIER);

    // Build metadata.
    let mut deployment = Deployment::default();
    deployment.meta_mut().namespace = Some(app.namespace().to_string());
    deployment.meta_mut().name = Some(deployment_name(app));
    deployment.meta_mut().labels = Some(labels.clone());
    super::set_owner_reference(&mut deployment, app);

    // Build spec.
    let spec = deployment.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(app.spec.size);
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
                env: Some(vec![
                    EnvVar {
                        name: "MYSQL_DATABASE".into(),
                        value: Some(database::DATABASE_NAME.into()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_SERVICE_HOST".into(),
                        value: Some(database::SERVICE_NAME.into()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_USERNAME".into(),
                        value_from: Some(database::auth_env(database::SECRET_KEY_USERNAME)),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_PASSWORD".into(),
                        value_from: Some(database::auth_env(database::SECRET_KEY_PASSWORD)),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }],
            ..Default::default()
        }),
    };

    deployment
}

/// Build the NodePort Service exposing the backend outside the cluster.
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

/// The desired replica count, if it differs from what the Deployment currently records.
pub(super) fn replicas_drift(app: &VisitorsApp, deployment: &Deployment) -> Option<i32> {
    let current = deployment.spec.as_ref().and_then(|spec| spec.replicas).unwrap_or_default();
    if current != app.spec.size {
        Some(app.spec.size)
    } else {
        None
    }
}

impl Reconciler {
    /// Converge the backend Deployment's replica count onto the requested size.
    ///
    /// Only the replica count is written; every other field is left as stored. A missing
    /// Deployment means creation has not been observed yet, an ordering condition which is
    /// surfaced as a retryable error.
    pub(super) async fn reconcile_backend_drift(&self, app: &VisitorsApp) -> Result<Option<ReconcilerAction>, ReconcileError> {
        let name = deployment_name(app);
        let mut found = match self.store.get_deployment(app.namespace(), &name).await {
            Ok(found) => found,
            Err(err) if is_not_found(&err) => return Err(ReconcileError::ObjectPending(name)),
            Err(err) => return Err(err),
        };

        let size = match replicas_drift(app, &found) {
            Some(size) => size,
            None => return Ok(None),
        };
        tracing::info!(%name, replicas = size, "scaling backend Deployment");
        found.spec.get_or_insert_with(Default::default).replicas = Some(size);
        self.store.update_deployment(&found).await?;

        // Convergence is observed on the next natural resync, no requeue needed.
        Ok(None)
    }

    /// Record the applied backend image on the VisitorsApp status.
    pub(super) async fn publish_backend_status(&self, app: &VisitorsApp) -> Result<(), ReconcileError> {
        let mut updated = app.clone();
        updated.status.get_or_insert_with(Default::default).backend_image = IMAGE.into();
        self.store.update_app_status(&updated).await?;
        Ok(())
    }
}
