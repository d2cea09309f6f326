//! Visitors error abstractions.

use thiserror::Error;

/// Reconciliation error variants.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The cluster API returned an error.
    ///
    /// Covers transient connectivity failures as well as optimistic concurrency
    /// conflicts on updates. Never retried internally, the driver's requeue handles it.
    #[error("error from the kubernetes API: {0}")]
    Api(#[from] kube::Error),
    /// The cluster API did not respond within the configured timeout.
    #[error("timeout while awaiting response from the kubernetes API: {0}")]
    Timeout(#[from] tokio::time::error::Elapsed),
    /// A managed object which is expected to exist has not been observed yet.
    ///
    /// This is an ordering condition during initial provisioning, not a hard failure.
    #[error("managed object {0} has not been created yet")]
    ObjectPending(String),
}
