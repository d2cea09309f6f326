//! VisitorsApp CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub type VisitorsApp = VisitorsAppCRD; // Mostly to resolve a Rust Analyzer issue.

/// CRD spec for the VisitorsApp resource.
///
/// A VisitorsApp describes a three tier web application: a MySQL database, a visitors
/// tracking backend service, and a web UI frontend. The operator owns the Deployments,
/// Services and the database auth Secret which realize those tiers.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    struct = "VisitorsAppCRD",
    status = "VisitorsAppStatus",
    group = "app.example.com",
    version = "v1alpha1",
    kind = "VisitorsApp",
    namespaced,
    derive = "PartialEq",
    apiextensions = "v1",
    shortname = "visitorsapp",
    printcolumn = r#"{"name":"Size","type":"number","jsonPath":".spec.size"}"#,
    printcolumn = r#"{"name":"Title","type":"string","jsonPath":".spec.title"}"#,
    printcolumn = r#"{"name":"Backend Image","type":"string","jsonPath":".status.backendImage"}"#,
    printcolumn = r#"{"name":"Frontend Image","type":"string","jsonPath":".status.frontendImage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VisitorsAppSpec {
    /// The number of replicas to run for the backend service.
    ///
    /// This value can be scaled up and down and directly corresponds to the number of
    /// pods of the backend Deployment. The database and frontend tiers always run a
    /// single replica and are not affected by this value.
    pub size: i32,
    /// An optional title displayed by the frontend web UI.
    ///
    /// When empty or absent, the frontend falls back to its built-in default title.
    #[serde(default)]
    pub title: Option<String>,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisitorsAppStatus {
    /// The backend container image most recently applied by the operator.
    #[serde(default)]
    pub backend_image: String,
    /// The frontend container image most recently applied by the operator.
    #[serde(default)]
    pub frontend_image: String,
}
