//! Self-signed certificate for `--enableSSL`, generated once under the config dir.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use crate::config::config_dir;

pub fn cert_paths() -> (PathBuf, PathBuf) {
    let dir = config_dir().join("tls");
    (dir.join("cert.pem"), dir.join("key.pem"))
}

/// Returns existing cert/key paths, generating a new pair if either is missing.
pub fn ensure_self_signed_cert() -> anyhow::Result<(PathBuf, PathBuf)> {
    let (cert_path, key_path) = cert_paths();
    if cert_path.exists() && key_path.exists() {
        return Ok((cert_path, key_path));
    }
    if let Some(dir) = cert_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let hostname = hostname::get()
        .ok()
        .and_then(|s| s.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    // SANs: hostname + localhost loopbacks
    let mut sans = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    if hostname != "localhost" {
        sans.insert(0, hostname);
    }

    let certified = rcgen::generate_simple_self_signed(sans).context("generating certificate")?;
    fs::write(&cert_path, certified.cert.pem())
        .with_context(|| format!("writing {}", cert_path.display()))?;
    fs::write(&key_path, certified.key_pair.serialize_pem())
        .with_context(|| format!("writing {}", key_path.display()))?;

    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "generated self-signed TLS certificate"
    );
    Ok((cert_path, key_path))
}
