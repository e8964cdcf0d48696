use anyhow::{anyhow, Context, Result};
use serde_derive::Deserialize;
use std::collections::HashMap;

use crate::exec::Exec;

#[derive(Deserialize, Debug)]
struct Secret {
    #[serde(default)]
    data: HashMap<String, String>,
}

/// What `kubectl wait` should wait on.
pub enum WaitFor<'a> {
    /// `--for=condition=ready pod --selector=<selector>`
    PodsReady(&'a str),
    /// `--for=condition=available deployment/<name>`
    DeploymentAvailable(&'a str),
}

pub fn apply(exec: &dyn Exec, manifest: &str) -> Result<()> {
    exec.run("kubectl", &["apply", "-f", manifest])?;
    Ok(())
}

/// Server side apply, needed for manifests with CRDs too big for the
/// last-applied annotation.
pub fn apply_server_side(exec: &dyn Exec, manifest: &str) -> Result<()> {
    exec.run("kubectl", &["apply", "--server-side", "-f", manifest])?;
    Ok(())
}

pub fn wait(exec: &dyn Exec, namespace: &str, what: WaitFor, timeout: &str) -> Result<()> {
    let (condition, target) = match what {
        WaitFor::PodsReady(selector) => (
            "--for=condition=ready",
            vec![String::from("pod"), format!("--selector={}", selector)],
        ),
        WaitFor::DeploymentAvailable(name) => (
            "--for=condition=available",
            vec![format!("deployment/{}", name)],
        ),
    };
    let timeout = format!("--timeout={}", timeout);

    let mut args = vec!["wait", "--namespace", namespace, condition];
    args.extend(target.iter().map(String::as_str));
    args.push(&timeout);

    exec.run("kubectl", &args)?;
    Ok(())
}

/// Reads one key out of a Secret and returns it decoded.
pub fn secret_value(exec: &dyn Exec, namespace: &str, name: &str, key: &str) -> Result<String> {
    let json = exec.run(
        "kubectl",
        &["get", "secret", name, "--namespace", namespace, "-o", "json"],
    )?;

    decode_secret_value(&json, key).with_context(|| format!("secret {}/{}", namespace, name))
}

fn decode_secret_value(json: &str, key: &str) -> Result<String> {
    let secret: Secret = serde_json::from_str(json)?;
    let encoded = secret
        .data
        .get(key)
        .ok_or_else(|| anyhow!("has no key {}", key))?;
    let decoded = base64::decode(encoded.trim())?;

    Ok(String::from_utf8(decoded)?)
}
