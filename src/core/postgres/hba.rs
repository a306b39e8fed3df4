// src/core/postgres/hba.rs

//! Host-based-authentication edits. The keeper appends the entries the
//! cluster needs (replication from peers, monitor health checks) without
//! disturbing operator-managed lines.

use crate::core::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// How much of the HBA file the keeper manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HbaLevel {
    /// One entry per known peer host.
    #[default]
    Minimal,
    /// A single `samenet` entry covering the local network.
    Lan,
    /// The keeper never touches `pg_hba.conf`.
    Skip,
}

/// The HBA lines required for `level`, given the peer hosts of the
/// group. Entries use trust authentication inside the cluster; operators
/// harden beyond that by switching to `skip` and managing the file.
pub fn hba_lines(level: HbaLevel, dbname: &str, username: &str, peer_hosts: &[String]) -> Vec<String> {
    match level {
        HbaLevel::Skip => Vec::new(),
        HbaLevel::Lan => vec![
            format!("host {dbname} {username} samenet trust"),
            format!("host replication {username} samenet trust"),
        ],
        HbaLevel::Minimal => {
            let mut lines = Vec::with_capacity(peer_hosts.len() * 2);
            for host in peer_hosts {
                let mask = host_mask(host);
                lines.push(format!("host {dbname} {username} {mask} trust"));
                lines.push(format!("host replication {username} {mask} trust"));
            }
            lines
        }
    }
}

/// Appends any missing managed lines to `pg_hba.conf`. Returns whether
/// the file changed (the caller reloads the server if so). Idempotent.
pub fn ensure_hba_entries(
    pgdata: &Path,
    level: HbaLevel,
    dbname: &str,
    username: &str,
    peer_hosts: &[String],
) -> Result<bool, StewardError> {
    let wanted = hba_lines(level, dbname, username, peer_hosts);
    if wanted.is_empty() {
        debug!("HBA editing level is {level:?}, leaving pg_hba.conf alone");
        return Ok(false);
    }

    let hba_path = pgdata.join("pg_hba.conf");
    let existing = std::fs::read_to_string(&hba_path)?;
    let missing: Vec<&String> = wanted
        .iter()
        .filter(|line| !existing.lines().any(|l| l.trim() == line.as_str()))
        .collect();
    if missing.is_empty() {
        return Ok(false);
    }

    let mut contents = existing;
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    for line in &missing {
        contents.push_str(line);
        contents.push('\n');
    }

    // Replace atomically so a crash cannot leave a truncated HBA file.
    let temp_path = hba_path.with_extension(format!("conf.tmp.{}", rand::random::<u32>()));
    std::fs::write(&temp_path, &contents)?;
    std::fs::rename(&temp_path, &hba_path)?;
    info!("added {} entries to pg_hba.conf", missing.len());
    Ok(true)
}

/// A bare hostname or IP becomes a single-host CIDR entry; names with a
/// mask or hostnames are passed through.
fn host_mask(host: &str) -> String {
    if host.contains('/') {
        return host.to_string();
    }
    if host.parse::<std::net::Ipv4Addr>().is_ok() {
        return format!("{host}/32");
    }
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("{host}/128");
    }
    host.to_string()
}
