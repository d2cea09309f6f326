use anyhow::Result;

use crate::config::Config;

#[test]
fn config_deserializes_from_env() -> Result<()> {
    let config: Config = envy::from_iter(vec![
        ("RUST_LOG".into(), "error".into()),
        ("NAMESPACE".into(), "default".into()),
    ])?;

    assert!(config.rust_log == "error", "unexpected value parsed for RUST_LOG, got {}, expected {}", config.rust_log, "error");
    assert!(config.namespace == "default", "unexpected value parsed for NAMESPACE, got {}, expected {}", config.namespace, "default");

    Ok(())
}

#[test]
fn config_requires_namespace() {
    let res = envy::from_iter::<_, Config>(vec![("RUST_LOG".into(), "error".into())]);
    assert!(res.is_err(), "expected config construction to fail without NAMESPACE, got {:?}", res);
}
