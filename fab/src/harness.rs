//! One-shot build driver: bundle, connect, run a session, retry when
//! the engine is at capacity.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::bundle::{self, BUNDLE_NAME};
use crate::channel::SecureChannel;
use crate::config::Config;
use crate::error::{CAPACITY_MARKER, Error, Result};
use crate::session::{Session, SessionEvent};

/// How long to wait before retrying a capacity rejection.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Everything one remote build needs from the caller.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build script; archived as the engine's fixed entry name.
    pub script: PathBuf,
    /// Auxiliary files shipped alongside the script.
    pub files: Vec<PathBuf>,
    /// Input lines released to the engine one per `REQUESTLINE`.
    pub input: Vec<String>,
    /// Where result artifacts are written.
    pub artifact_dir: PathBuf,
}

/// Packages the request, runs one session to completion, and returns
/// the captured transcript.
///
/// A build failure whose text carries the engine's capacity marker is
/// retried after [`RETRY_DELAY`] with the same bundle and input; any
/// other failure is returned as [`Error::Build`]. Transport, framing,
/// and protocol errors are never retried here.
pub async fn run_build<F>(config: &Config, request: &BuildRequest, mut on_event: F) -> Result<String>
where
    F: FnMut(SessionEvent<'_>),
{
    let script = request.script.clone();
    let files = request.files.clone();
    let limits = config.limits.clone();
    let blob = tokio::task::spawn_blocking(move || bundle::build_bundle(&script, &files, &limits))
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))??;
    tracing::debug!(bytes = blob.len(), "bundle packaged");

    loop {
        let channel = SecureChannel::connect(config).await?;
        let (reader, writer) = channel.split();

        let (tx, rx) = mpsc::channel(request.input.len().max(1));
        for line in &request.input {
            // Capacity covers the whole queue, so this cannot fail.
            let _ = tx.try_send(line.clone());
        }
        drop(tx);

        let session = Session::new(config.limits.clone(), request.artifact_dir.as_path())
            .with_read_timeout(config.read_timeout());
        let outcome = session
            .run(reader, writer, BUNDLE_NAME, blob.clone(), rx, &mut on_event)
            .await?;

        match outcome.failure {
            Some(text) if text.contains(CAPACITY_MARKER) => {
                tracing::info!("engine has no free workers, retrying shortly");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Some(text) => return Err(Error::Build(text)),
            None => return Ok(outcome.text()),
        }
    }
}
