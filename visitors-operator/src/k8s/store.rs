//! Cluster object store access.
//!
//! The `Store` trait is the reconciler's view of the cluster API: typed get/create/update
//! calls with the store's own optimistic concurrency semantics. Keeping the surface behind
//! a trait lets the reconciliation logic be exercised against an in-memory double in tests.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use tokio::time::timeout;

use crate::k8s::APP_NAME;
use visitors_core::crd::{RequiredMetadata, VisitorsApp};
use visitors_core::ReconcileError;

/// The default timeout to use for API calls.
const API_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Typed access to the cluster object store.
#[async_trait]
pub(crate) trait Store: Send + Sync {
    /// Fetch the target Secret.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ReconcileError>;
    /// Create the given Secret.
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ReconcileError>;

    /// Fetch the target Deployment.
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ReconcileError>;
    /// Create the given Deployment.
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError>;
    /// Update the given Deployment, which must carry the resource version it was read with.
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError>;

    /// Fetch the target Service.
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ReconcileError>;
    /// Create the given Service.
    async fn create_service(&self, service: &Service) -> Result<Service, ReconcileError>;

    /// Persist the status subresource of the given VisitorsApp, leaving its spec untouched.
    async fn update_app_status(&self, app: &VisitorsApp) -> Result<VisitorsApp, ReconcileError>;
}

/// Check if the given error is the store's not-found response.
pub(crate) fn is_not_found(err: &ReconcileError) -> bool {
    matches!(err, ReconcileError::Api(kube::Error::Api(response)) if response.code == http::StatusCode::NOT_FOUND)
}

/// The production `Store` backed by the cluster API.
pub(crate) struct KubeStore {
    /// K8s client.
    client: Client,
}

impl KubeStore {
    /// Create a new instance.
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Store for KubeStore {
    #[tracing::instrument(level = "debug", skip(self, namespace, name))]
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ReconcileError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.get(name)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, secret))]
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ReconcileError> {
        if let Some(name) = secret.metadata.name.as_ref() {
            tracing::info!(%name, "creating Secret");
        }
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.create(&PostParams::default(), secret)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, namespace, name))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ReconcileError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.get(name)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError> {
        if let Some(name) = deployment.metadata.name.as_ref() {
            tracing::info!(%name, "creating Deployment");
        }
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.create(&PostParams::default(), deployment)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, ReconcileError> {
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        tracing::info!(%name, "updating Deployment");
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.replace(name, &PostParams::default(), deployment)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, namespace, name))]
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ReconcileError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.get(name)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, service))]
    async fn create_service(&self, service: &Service) -> Result<Service, ReconcileError> {
        if let Some(name) = service.metadata.name.as_ref() {
            tracing::info!(%name, "creating Service");
        }
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(timeout(API_TIMEOUT, api.create(&PostParams::default(), service)).await??)
    }

    #[tracing::instrument(level = "debug", skip(self, app))]
    async fn update_app_status(&self, app: &VisitorsApp) -> Result<VisitorsApp, ReconcileError> {
        tracing::info!(name = app.name(), "patching VisitorsApp status");
        let api: Api<VisitorsApp> = Api::namespaced(self.client.clone(), app.namespace());
        let mut params = PatchParams::apply(APP_NAME);
        params.force = true; // This will still be blocked by the server if we do not have the most up-to-date object info.
        let mut updated = app.clone();
        updated.metadata.managed_fields = None;
        Ok(timeout(API_TIMEOUT, api.patch_status(app.name(), &params, &Patch::Apply(&updated))).await??)
    }
}
