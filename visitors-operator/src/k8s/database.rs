//! Database tier reconciliation.
//!
//! The database tier is singleton-named within its namespace: one MySQL instance backs
//! every tier of a VisitorsApp, so its Deployment, Service and auth Secret carry fixed
//! names rather than names derived from the CR. Its replica count and configuration are
//! immutable after creation, so the tier has no drift handler.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec, Secret, SecretKeySelector, Service, ServicePort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::Resource;

use crate::k8s::Reconciler;
use visitors_core::crd::{RequiredMetadata, VisitorsApp};

/// The fixed name of the database Deployment.
pub(super) const DEPLOYMENT_NAME: &str = "mysql";
/// The fixed name of the database Service.
pub(super) const SERVICE_NAME: &str = "mysql-svc";
/// The fixed name of the database auth Secret.
pub(super) const AUTH_SECRET_NAME: &str = "mysql-auth";
/// The auth Secret key holding the application username.
pub(super) const SECRET_KEY_USERNAME: &str = "username";
/// The auth Secret key holding the application password.
pub(super) const SECRET_KEY_PASSWORD: &str = "password";
/// The name of the database which the backend service reads and writes.
pub(super) const DATABASE_NAME: &str = "visitors";

/// The tier label value of the database.
const TIER: &str = "mysql";
/// The pod container name of the database.
const CONTAINER_NAME: &str = "visitor-mysql";
/// The pinned database container image.
const IMAGE: &str = "mysql:5.7";
/// The port on which the database listens.
const PORT: i32 = 3306;
/// The root password of the database instance.
///
/// Only the application-level credentials are sourced from the auth Secret; the root
/// account is configured with this static literal and is not used by the other tiers.
const ROOT_PASSWORD: &str = "password";

/// Build the auth Secret holding the application-level database credentials.
pub(super) fn auth_secret(app: &VisitorsApp) -> Secret {
    let mut secret = Secret::default();
    secret.meta_mut().namespace = Some(app.namespace().to_string());
    secret.meta_mut().name = Some(AUTH_SECRET_NAME.into());
    secret.meta_mut().labels = Some(super::labels(app, TIER));
    super::set_owner_reference(&mut secret, app);

    secret.type_ = Some("Opaque".into());
    secret.string_data = Some(maplit::btreemap! {
        SECRET_KEY_USERNAME.into() => "visitors-user".into(),
        SECRET_KEY_PASSWORD.into() => "visitors-pass".into(),
    });

    secret
}

/// Build the database Deployment.
pub(super) fn deployment(app: &VisitorsApp) -> Deployment {
    let labels = super::labels(app, TIER);

    // Build metadata.
    let mut deployment = Deployment::default();
    deployment.meta_mut().namespace = Some(app.namespace().to_string());
    deployment.meta_mut().name = Some(DEPLOYMENT_NAME.into());
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
                    name: Some("mysql".into()),
                    container_port: PORT,
                    ..Default::default()
                }]),
                env: Some(vec![
                    EnvVar {
                        name: "MYSQL_ROOT_PASSWORD".into(),
                        value: Some(ROOT_PASSWORD.into()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_DATABASE".into(),
                        value: Some(DATABASE_NAME.into()),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_USER".into(),
                        value_from: Some(auth_env(SECRET_KEY_USERNAME)),
                        ..Default::default()
                    },
                    EnvVar {
                        name: "MYSQL_PASSWORD".into(),
                        value_from: Some(auth_env(SECRET_KEY_PASSWORD)),
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

/// Build the headless Service fronting the database within the cluster.
pub(super) fn service(app: &VisitorsApp) -> Service {
    let labels = super::labels(app, TIER);

    // Build metadata.
    let mut service = Service::default();
    service.meta_mut().namespace = Some(app.namespace().to_string());
    service.meta_mut().name = Some(SERVICE_NAME.into());
    service.meta_mut().labels = Some(labels.clone());
    super::set_owner_reference(&mut service, app);

    // Build spec.
    let spec = service.spec.get_or_insert_with(Default::default);
    spec.selector = Some(labels);
    spec.cluster_ip = Some("None".into());
    spec.type_ = Some("ClusterIP".into());
    spec.ports = Some(vec![ServicePort {
        port: PORT,
        ..Default::default()
    }]);

    service
}

/// An env var source referencing a key of the database auth Secret.
pub(super) fn auth_env(key: &str) -> EnvVarSource {
    EnvVarSource {
        secret_key_ref: Some(SecretKeySelector {
            name: Some(AUTH_SECRET_NAME.into()),
            key: key.into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl Reconciler {
    /// Check whether the database tier has a running replica.
    ///
    /// Absence of information, whether the Deployment does not exist yet or the lookup
    /// itself failed, is treated as "not ready", never as an error to propagate.
    pub(super) async fn database_ready(&self, app: &VisitorsApp) -> bool {
        match self.store.get_deployment(app.namespace(), DEPLOYMENT_NAME).await {
            Ok(found) => has_running_replica(&found),
            Err(_err) => false,
        }
    }
}

/// Check whether the given Deployment reports exactly one running replica.
pub(super) fn has_running_replica(deployment: &Deployment) -> bool {
    deployment.status.as_ref().and_then(|status| status.replicas) == Some(1)
}
