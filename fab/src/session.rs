//! Client-side session driver: one build interaction over one channel.
//!
//! The dispatch loop is the sole reader. A spawned forwarder task sends
//! buffered input lines, gated so it never runs ahead of the engine's
//! `RequestLine`s. Both writer paths share one write lock and every
//! frame is staged before the locked write, so the peer never observes
//! interleaved message bytes.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fab_proto::{Limits, Message};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Something the session surfaced to the operator while running.
#[derive(Debug)]
#[non_exhaustive]
pub enum SessionEvent<'a> {
    /// A captured output line from the build.
    Line(&'a str),
    /// The engine probed liveness (already answered).
    Heartbeat,
    /// A result artifact was written locally.
    Artifact(&'a Path),
    /// The engine reported a build failure.
    Failure(&'a str),
}

/// What one completed session produced.
#[derive(Debug)]
pub struct SessionOutcome {
    /// Every build output line, in arrival order.
    pub transcript: Vec<String>,
    /// Engine-reported failure text, verbatim, if the build failed.
    pub failure: Option<String>,
}

impl SessionOutcome {
    /// The transcript as one newline-joined string.
    pub fn text(&self) -> String {
        self.transcript.join("\n")
    }
}

/// Drives one build session over an established channel.
#[derive(Debug)]
pub struct Session {
    /// Field bounds shared with the engine.
    limits: Limits,
    /// Where received artifacts are written.
    artifact_dir: PathBuf,
    /// Per-read deadline for the dispatch loop, if any.
    read_timeout: Option<Duration>,
}

impl Session {
    /// Creates a driver that stores result artifacts under `artifact_dir`.
    pub fn new(limits: Limits, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            limits,
            artifact_dir: artifact_dir.into(),
            read_timeout: None,
        }
    }

    /// Bounds each channel read; an expired deadline ends the session
    /// with a timeout error.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Runs the session to completion.
    ///
    /// Opens by uploading the bundle, then reacts to inbound opcodes
    /// until the engine hangs up or a failure is acknowledged. Lines
    /// queued on `input` are forwarded one per engine `RequestLine`;
    /// lines still queued at session end are discarded.
    pub async fn run<R, W, F>(
        &self,
        mut reader: R,
        writer: W,
        bundle_name: &str,
        bundle: Vec<u8>,
        input: mpsc::Receiver<String>,
        mut on_event: F,
    ) -> Result<SessionOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        F: FnMut(SessionEvent<'_>),
    {
        let writer = Arc::new(Mutex::new(writer));
        let gate = Arc::new(Semaphore::new(0));

        // The bundle upload opens every session.
        let opener = Message::SendFile {
            name: bundle_name.as_bytes().to_vec(),
            content: bundle,
        };
        send_locked(&writer, &opener, &self.limits).await?;
        tracing::debug!(bundle = bundle_name, "bundle uploaded, session running");

        let forwarder = tokio::spawn(forward_lines(
            input,
            Arc::clone(&gate),
            Arc::clone(&writer),
            self.limits.clone(),
        ));

        let result = self
            .dispatch(&mut reader, &writer, &gate, &forwarder, &mut on_event)
            .await;

        // Unblock and retire the forwarder, then close our side.
        gate.close();
        {
            let mut w = writer.lock().await;
            forwarder.abort();
            let _ = w.shutdown().await;
        }

        result
    }

    /// The inbound dispatch loop; returns when the session is terminal.
    async fn dispatch<R, W, F>(
        &self,
        reader: &mut R,
        writer: &Arc<Mutex<W>>,
        gate: &Semaphore,
        forwarder: &JoinHandle<()>,
        on_event: &mut F,
    ) -> Result<SessionOutcome>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        F: FnMut(SessionEvent<'_>),
    {
        let mut transcript = Vec::new();
        let mut failure = None;

        loop {
            let Some(msg) = self.next_message(reader).await? else {
                tracing::debug!("engine closed the channel, session over");
                break;
            };
            tracing::trace!(opcode = msg.name(), "inbound");

            match msg {
                Message::RequestLine => {
                    gate.add_permits(1);
                }
                Message::SendLine(raw) => {
                    let line = ascii_text(&raw);
                    on_event(SessionEvent::Line(&line));
                    transcript.push(line);
                    send_locked(writer, &Message::Ack, &self.limits).await?;
                }
                Message::SendFile { name, content } => {
                    let name = ascii_text(&name);
                    let path = self.store_artifact(&name, &content).await?;
                    on_event(SessionEvent::Artifact(&path));
                    send_locked(writer, &Message::Ack, &self.limits).await?;
                }
                Message::Error(raw) => {
                    let text = ascii_text(&raw);
                    tracing::warn!(error = %text, "engine reported a build failure");
                    on_event(SessionEvent::Failure(&text));
                    failure = Some(text);
                    // Nothing may follow our TERMINATE. Closing the gate
                    // stops new forwards; taking the lock waits out any
                    // in-flight one, so no frame is cut short by the abort.
                    gate.close();
                    let mut w = writer.lock().await;
                    forwarder.abort();
                    fab_proto::send(&mut *w, &Message::Terminate, &self.limits).await?;
                    break;
                }
                Message::Heartbeat => {
                    on_event(SessionEvent::Heartbeat);
                    send_locked(writer, &Message::Heartbeat, &self.limits).await?;
                }
                // Receipt for our bundle upload or a forwarded line.
                Message::Ack => {}
                Message::Terminate => {
                    return Err(Error::Protocol(
                        "engine sent TERMINATE, which only the client may send".to_owned(),
                    ));
                }
            }
        }

        Ok(SessionOutcome {
            transcript,
            failure,
        })
    }

    /// Reads the next message, honoring the configured read deadline.
    async fn next_message<R>(&self, reader: &mut R) -> Result<Option<Message>>
    where
        R: AsyncRead + Unpin,
    {
        let decoded = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, fab_proto::recv(reader, &self.limits))
                .await
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "read deadline expired")
                })?,
            None => fab_proto::recv(reader, &self.limits).await,
        };
        Ok(decoded?)
    }

    /// Persists a received artifact under the artifact directory.
    async fn store_artifact(&self, name: &str, content: &[u8]) -> Result<PathBuf> {
        let path = artifact_path(&self.artifact_dir, name)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        tracing::info!(artifact = %path.display(), bytes = content.len(), "stored artifact");
        Ok(path)
    }
}

/// Forwards buffered input lines, one per gate permit.
///
/// Exits when the input queue drains, the gate closes (session over),
/// or a write fails; the dispatch loop owns error reporting.
async fn forward_lines<W>(
    mut input: mpsc::Receiver<String>,
    gate: Arc<Semaphore>,
    writer: Arc<Mutex<W>>,
    limits: Limits,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = input.recv().await {
        let Ok(permit) = gate.acquire().await else {
            return;
        };
        permit.forget();
        let msg = Message::SendLine(line.into_bytes());
        let mut w = writer.lock().await;
        if fab_proto::send(&mut *w, &msg, &limits).await.is_err() {
            return;
        }
    }
}

/// Serializes and writes one message under the shared write lock.
async fn send_locked<W>(writer: &Mutex<W>, msg: &Message, limits: &Limits) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut w = writer.lock().await;
    fab_proto::send(&mut *w, msg, limits).await?;
    Ok(())
}

/// Labels are ASCII by protocol, so this is lossless.
fn ascii_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Resolves an artifact name inside `dir`, rejecting anything that
/// could escape it (absolute paths, `..`, drive prefixes).
fn artifact_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let safe = !name.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(Error::Protocol(format!(
            "artifact name {name:?} escapes the output directory"
        )));
    }
    Ok(dir.join(relative))
}
