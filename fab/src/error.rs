//! Error types for fab client operations.

use std::io;
use std::path::PathBuf;

/// Alias for `Result<T, fab::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Substring the engine puts in its error text when no worker is free.
/// Callers treat a build failure carrying it as retryable, not fatal.
pub const CAPACITY_MARKER: &str = "try again later";

/// Errors returned by fab client operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// TCP connect or TLS handshake with the engine failed: unreachable
    /// host, rejected certificate chain, hostname mismatch. Distinct
    /// from a drop once the session is established.
    #[error("connecting to {host}: {source}")]
    Handshake {
        /// Engine host the attempt targeted.
        host: String,
        /// Underlying connect or handshake failure.
        #[source]
        source: io::Error,
    },

    /// Invalid trust material (unparseable certificate or key).
    #[error("tls configuration: {0}")]
    Tls(#[from] rustls::Error),

    /// I/O failure after the session was established.
    #[error("session i/o: {0}")]
    Io(#[from] io::Error),

    /// Malformed or over-limit frame from the peer.
    #[error(transparent)]
    Proto(#[from] fab_proto::ProtoError),

    /// The peer broke the session state machine.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The build could not be packaged for upload.
    #[error("bundle {path}: {reason}")]
    Bundle {
        /// File that made packaging fail.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("config {path}: {reason}")]
    Config {
        /// Configuration file path.
        path: PathBuf,
        /// Why it was rejected.
        reason: String,
    },

    /// The engine reported a build failure (its text verbatim).
    #[error("build failed: {0}")]
    Build(String),
}

impl Error {
    /// Whether this is the engine's "no capacity, try again later"
    /// condition rather than a real failure.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Build(text) if text.contains(CAPACITY_MARKER))
    }
}
