// src/core/postgres/certs.rs

//! Self-signed server certificates, generated with the system `openssl`
//! when the configuration asks for TLS without providing certificates.

use crate::core::errors::StewardError;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

const CERT_FILE: &str = "server.crt";
const KEY_FILE: &str = "server.key";

/// Creates `server.crt`/`server.key` in the data directory, keyed to
/// `hostname`. Existing files are left alone. Returns the two paths.
pub async fn create_self_signed_cert(
    pgdata: &Path,
    hostname: &str,
) -> Result<(PathBuf, PathBuf), StewardError> {
    let cert_path = pgdata.join(CERT_FILE);
    let key_path = pgdata.join(KEY_FILE);
    if cert_path.exists() && key_path.exists() {
        return Ok((cert_path, key_path));
    }

    info!("creating self-signed certificate for {hostname}");
    let output = Command::new("openssl")
        .args([
            "req", "-new", "-x509", "-days", "365", "-nodes", "-text",
        ])
        .arg("-out")
        .arg(&cert_path)
        .arg("-keyout")
        .arg(&key_path)
        .arg("-subj")
        .arg(format!("/CN={hostname}"))
        .output()
        .await
        .map_err(|e| StewardError::PgTooling(format!("failed to run openssl: {e}")))?;
    if !output.status.success() {
        return Err(StewardError::PgTooling(format!(
            "openssl req failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    // Postgres refuses to load a key readable by the group or others.
    std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    Ok((cert_path, key_path))
}
