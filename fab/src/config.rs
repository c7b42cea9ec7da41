//! Client configuration: engine endpoint, trust material, field limits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fab_proto::Limits;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Connection settings for one engine, loaded from a JSON file.
///
/// Trust is multi-CA: every file in `trusted_cas` is loaded into the
/// root store, so a deployment can pin the engine's CA alongside the
/// organization CA that signs client certificates. When `client_cert`
/// and `client_key` are both set the client presents them during the
/// handshake and the engine can authenticate the caller in turn.
///
/// `limits` must match the engine's configuration; see [`Limits`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Engine hostname, also used for certificate verification.
    pub host: String,
    /// Engine TCP port.
    pub port: u16,
    /// PEM files whose certificates are trusted as roots.
    pub trusted_cas: Vec<PathBuf>,
    /// PEM file with the client certificate chain, if presenting one.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
    /// Per-read deadline for the session dispatch loop, in seconds.
    /// Absent means reads block until the peer speaks or hangs up.
    #[serde(default)]
    pub read_timeout_secs: Option<u64>,
    /// Field-size bounds shared with the engine.
    #[serde(default)]
    pub limits: Limits,
}

impl Config {
    /// Loads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| Error::Config {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }

    /// The configured per-read deadline, if any.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn minimal_config_gets_stock_limits() {
        let cfg: Config = serde_json::from_str(
            r#"{
                "host": "engine.example.edu",
                "port": 443,
                "trusted_cas": ["/etc/ssl/authority/serverchain.pem"]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.host, "engine.example.edu");
        assert_eq!(cfg.limits, Limits::default());
        assert!(cfg.client_cert.is_none());
        assert!(cfg.read_timeout().is_none());
    }

    #[test]
    fn load_reports_the_offending_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("config"));
    }
}
