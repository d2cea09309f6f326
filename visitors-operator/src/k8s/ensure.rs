//! Idempotent create-if-absent for managed objects.
//!
//! Ensuring an object is a convergence check, never an overwrite: an object which already
//! exists is left exactly as stored, no matter how far it has drifted from what would be
//! built today. Drift on the fields the operator manages is reconciled separately, per
//! tier. Any lookup error other than not-found is propagated unmodified, as the object
//! cannot be assumed absent in that case.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};

use crate::k8s::store::is_not_found;
use crate::k8s::Reconciler;
use visitors_core::ReconcileError;

impl Reconciler {
    /// Ensure the given Secret exists, creating it if absent.
    pub(super) async fn ensure_secret(&self, secret: &Secret) -> Result<(), ReconcileError> {
        let namespace = secret.metadata.namespace.as_deref().unwrap_or_default();
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        match self.store.get_secret(namespace, name).await {
            Ok(_found) => Ok(()),
            Err(err) if is_not_found(&err) => {
                self.store.create_secret(secret).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Ensure the given Deployment exists, creating it if absent.
    pub(super) async fn ensure_deployment(&self, deployment: &Deployment) -> Result<(), ReconcileError> {
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or_default();
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        match self.store.get_deployment(namespace, name).await {
            Ok(_found) => Ok(()),
            Err(err) if is_not_found(&err) => {
                self.store.create_deployment(deployment).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Ensure the given Service exists, creating it if absent.
    pub(super) async fn ensure_service(&self, service: &Service) -> Result<(), ReconcileError> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or_default();
        let name = service.metadata.name.as_deref().unwrap_or_default();
        match self.store.get_service(namespace, name).await {
            Ok(_found) => Ok(()),
            Err(err) if is_not_found(&err) => {
                self.store.create_service(service).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
