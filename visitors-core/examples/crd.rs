//! A script used to generate the CRDs used by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use visitors_core::crd::VisitorsApp;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("k8s").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating CRD output dir {:?}", &crds_path))?;

    let app = VisitorsApp::crd();
    let app_yaml = serde_yaml::to_string(&app).context("error serializing VisitorsApp CRD to yaml")?;
    std::fs::write(crds_path.join("visitorsapp.yaml"), &app_yaml).with_context(|| format!("error writing VisitorsApp CRD to {:?}", &crds_path))?;
    println!("VisitorsApp CRD written to {:?}", &crds_path);

    Ok(())
}
