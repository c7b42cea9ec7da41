//! Mutually authenticated TLS transport to the engine.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::Config;
use crate::error::{Error, Result};

/// Read half of an established channel; the dispatch loop is its only user.
pub type ChannelReader = ReadHalf<TlsStream<TcpStream>>;
/// Write half of an established channel, shared by both writer paths
/// under the session's write lock.
pub type ChannelWriter = WriteHalf<TlsStream<TcpStream>>;

/// An encrypted, mutually authenticated connection to the engine.
///
/// The server chain is verified against every CA in
/// [`Config::trusted_cas`]; when configured, the client certificate is
/// presented so the engine can authenticate the caller. Handshake and
/// trust failures surface as [`Error::Handshake`], distinct from drops
/// once the session is up.
#[derive(Debug)]
pub struct SecureChannel {
    /// The established TLS stream.
    stream: TlsStream<TcpStream>,
}

impl SecureChannel {
    /// Connects and completes the TLS handshake.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        for ca in &config.trusted_cas {
            for cert in load_certs(ca)? {
                roots.add(cert)?;
            }
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
        let tls = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::Config {
                    path: config
                        .client_cert
                        .clone()
                        .or_else(|| config.client_key.clone())
                        .unwrap_or_default(),
                    reason: "client_cert and client_key must be set together".to_owned(),
                });
            }
        };

        let host = config.host.clone();
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| handshake_error(&host, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let tcp = TcpStream::connect((host.as_str(), config.port))
            .await
            .map_err(|e| handshake_error(&host, e))?;

        tracing::debug!(host = %host, port = config.port, "tcp connected, starting tls handshake");
        let stream = TlsConnector::from(Arc::new(tls))
            .connect(server_name, tcp)
            .await
            .map_err(|e| handshake_error(&host, e))?;
        tracing::debug!(host = %host, "tls handshake complete");

        Ok(Self { stream })
    }

    /// Splits the channel for concurrent reading and writing.
    pub fn split(self) -> (ChannelReader, ChannelWriter) {
        tokio::io::split(self.stream)
    }
}

/// Orderly TLS shutdown on the write half. Idempotent: closing an
/// already-closed channel is a no-op.
pub async fn close(writer: &mut ChannelWriter) -> Result<()> {
    match writer.shutdown().await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Wraps a connect-phase failure with the engine host it targeted.
fn handshake_error(host: &str, source: io::Error) -> Error {
    Error::Handshake {
        host: host.to_owned(),
        source,
    }
}

/// Reads every certificate from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(open_pem(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| pem_error(path, &e))?;
    if certs.is_empty() {
        return Err(Error::Config {
            path: path.to_owned(),
            reason: "no certificates found".to_owned(),
        });
    }
    Ok(certs)
}

/// Reads the first private key from a PEM file.
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(open_pem(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| pem_error(path, &e))?
        .ok_or_else(|| Error::Config {
            path: path.to_owned(),
            reason: "no private key found".to_owned(),
        })
}

/// Opens a PEM file, reporting the path on failure.
fn open_pem(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| pem_error(path, &e))
}

/// Maps a trust-material read failure onto the offending file.
fn pem_error(path: &Path, err: &io::Error) -> Error {
    Error::Config {
        path: path.to_owned(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_pem_names_the_file() {
        let err = load_certs(Path::new("/nonexistent/ca.pem")).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("/nonexistent/ca.pem"), "{text}");
    }

    #[test]
    fn pem_without_certificates_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not pem at all").unwrap();
        let err = load_certs(file.path()).unwrap_err();
        assert!(err.to_string().contains("no certificates"), "{err}");
    }
}
