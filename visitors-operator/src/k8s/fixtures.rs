//! Test fixtures for reconciliation tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::{Container, EnvVar, Secret, Service};
use kube::core::ErrorResponse;
use kube::Resource;

use crate::k8s::store::Store;
use visitors_core::crd::{RequiredMetadata, VisitorsApp, VisitorsAppSpec, VisitorsAppStatus};
use visitors_core::ReconcileError;

/// Build a namespaced VisitorsApp for tests.
pub(super) fn visitors_app(name: &str, size: i32, title: Option<&str>) -> VisitorsApp {
    let mut app = VisitorsApp::new(name, VisitorsAppSpec { size, title: title.map(String::from) });
    app.meta_mut().namespace = Some("default".into());
    app.meta_mut().uid = Some("00000000-0000-0000-0000-000000000001".into());
    app
}

/// The first container of the given Deployment's pod template.
pub(super) fn first_container(deployment: &Deployment) -> Option<Container> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .cloned()
}

/// The env vars of the first container of the given Deployment.
pub(super) fn container_env(deployment: &Deployment) -> Vec<EnvVar> {
    first_container(deployment).and_then(|container| container.env).unwrap_or_default()
}

/// The literal value of the named env var of the first container, if set.
pub(super) fn env_value(deployment: &Deployment, name: &str) -> Option<String> {
    container_env(deployment).into_iter().find(|var| var.name == name).and_then(|var| var.value)
}

/// The declared replica count of the given Deployment.
pub(super) fn replicas(deployment: &Deployment) -> Option<i32> {
    deployment.spec.as_ref().and_then(|spec| spec.replicas)
}

/// An in-memory `Store` standing in for the cluster API, with call counters used to
/// assert on the exact number of mutations a reconciliation pass issued.
#[derive(Default)]
pub(super) struct MemStore {
    secrets: Mutex<HashMap<String, Secret>>,
    deployments: Mutex<HashMap<String, Deployment>>,
    services: Mutex<HashMap<String, Service>>,
    statuses: Mutex<HashMap<String, VisitorsAppStatus>>,

    /// When set, every get call fails with a transient API error.
    pub(super) fail_gets: AtomicBool,

    pub(super) secret_creates: AtomicUsize,
    pub(super) deployment_creates: AtomicUsize,
    pub(super) deployment_updates: AtomicUsize,
    pub(super) service_creates: AtomicUsize,
    pub(super) status_updates: AtomicUsize,
}

impl MemStore {
    /// Seed a Deployment directly into the store.
    pub(super) fn insert_deployment(&self, deployment: Deployment) {
        let key = object_key(deployment.metadata.namespace.as_deref(), deployment.metadata.name.as_deref());
        self.deployments.lock().unwrap().insert(key, deployment);
    }

    /// Record an observed replica count on the target Deployment's status.
    pub(super) fn set_deployment_status_replicas(&self, namespace: &str, name: &str, replicas: i32) {
        let mut deployments = self.deployments.lock().unwrap();
        if let Some(deployment) = deployments.get_mut(&object_key(Some(namespace), Some(name))) {
            deployment.status.get_or_insert_with(DeploymentStatus::default).replicas = Some(replicas);
        }
    }

    /// The stored Deployment with the given identity, if any.
    pub(super) fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned()
    }

    /// The stored Service with the given identity, if any.
    pub(super) fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned()
    }

    /// The stored Secret with the given identity, if any.
    pub(super) fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned()
    }

    /// The last published status of the target VisitorsApp, if any.
    pub(super) fn status(&self, namespace: &str, name: &str) -> Option<VisitorsAppStatus> {
        self.statuses.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ReconcileError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(transient());
        }
        self.secrets.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned().ok_or_else(|| not_found(name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ReconcileError> {
        self.secret_creates.fetch_add(1, Ordering::SeqCst);
        let key = object_key(secret.metadata.namespace.as_deref(), secret.metadata.name.as_deref());
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            return Err(already_exists(&key));
        }
        secrets.insert(key, secret.clone());
        Ok(secret.clone())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ReconcileError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(transient());
        }
        self.deployments.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned().ok_or_else(|| not_found(name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError> {
        self.deployment_creates.fetch_add(1, Ordering::SeqCst);
        let key = object_key(deployment.metadata.namespace.as_deref(), deployment.metadata.name.as_deref());
        let mut deployments = self.deployments.lock().unwrap();
        if deployments.contains_key(&key) {
            return Err(already_exists(&key));
        }
        deployments.insert(key, deployment.clone());
        Ok(deployment.clone())
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError> {
        self.deployment_updates.fetch_add(1, Ordering::SeqCst);
        let key = object_key(deployment.metadata.namespace.as_deref(), deployment.metadata.name.as_deref());
        let mut deployments = self.deployments.lock().unwrap();
        if !deployments.contains_key(&key) {
            return Err(not_found(&key));
        }
        deployments.insert(key, deployment.clone());
        Ok(deployment.clone())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ReconcileError> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(transient());
        }
        self.services.lock().unwrap().get(&object_key(Some(namespace), Some(name))).cloned().ok_or_else(|| not_found(name))
    }

    async fn create_service(&self, service: &Service) -> Result<Service, ReconcileError> {
        self.service_creates.fetch_add(1, Ordering::SeqCst);
        let key = object_key(service.metadata.namespace.as_deref(), service.metadata.name.as_deref());
        let mut services = self.services.lock().unwrap();
        if services.contains_key(&key) {
            return Err(already_exists(&key));
        }
        services.insert(key, service.clone());
        Ok(service.clone())
    }

    async fn update_app_status(&self, app: &VisitorsApp) -> Result<VisitorsApp, ReconcileError> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        let key = object_key(Some(app.namespace()), Some(app.name()));
        self.statuses.lock().unwrap().insert(key, app.status.clone().unwrap_or_default());
        Ok(app.clone())
    }
}

fn object_key(namespace: Option<&str>, name: Option<&str>) -> String {
    format!("{}/{}", namespace.unwrap_or_default(), name.unwrap_or_default())
}

fn not_found(name: &str) -> ReconcileError {
    ReconcileError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} not found", name),
        reason: "NotFound".into(),
        code: 404,
    }))
}

fn already_exists(name: &str) -> ReconcileError {
    ReconcileError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: format!("{} already exists", name),
        reason: "AlreadyExists".into(),
        code: 409,
    }))
}

fn transient() -> ReconcileError {
    ReconcileError::Api(kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message: "the server is currently unable to handle the request".into(),
        reason: "ServiceUnavailable".into(),
        code: 503,
    }))
}
