//! Framing codec over any async byte stream.
//!
//! Layout: `[u8 opcode]` then, per field the opcode carries,
//! `[u64 big-endian length][bytes]`. A declared length is checked
//! against [`Limits`] before any of the field is read, so a hostile
//! peer cannot make the decoder allocate past the configured bounds.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::{
    Limits, Message, OP_ACK, OP_ERROR, OP_HEARTBEAT, OP_REQUESTLINE, OP_SENDFILE, OP_SENDLINE,
    OP_TERMINATE,
};

/// Errors produced while framing or parsing messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProtoError {
    /// I/O failure on the underlying stream.
    #[error("control channel i/o: {0}")]
    Io(#[from] io::Error),

    /// The peer sent an opcode tag outside the defined set. Always a
    /// bug or a compromised peer, never recoverable.
    #[error("unknown opcode tag {0:#04x}")]
    UnknownOpcode(u8),

    /// A declared field length exceeds its configured bound.
    #[error("{field} length {len} exceeds the {max} byte limit")]
    FieldTooLarge {
        /// Which field overflowed.
        field: &'static str,
        /// Length the peer declared.
        len: u64,
        /// Configured bound for the field.
        max: u64,
    },

    /// A text field contained bytes outside the ASCII range.
    #[error("{field} contains non-ascii bytes")]
    NotAscii {
        /// The offending field.
        field: &'static str,
    },

    /// The stream ended partway through a message.
    #[error("stream ended mid-message")]
    Truncated,
}

/// Serializes `msg` and writes it as one contiguous frame.
///
/// The whole frame is staged in memory first and written with a single
/// `write_all`, so a caller holding a write lock around this call gets
/// frame-atomic output. Over-limit or non-ASCII fields are rejected
/// before anything reaches the stream.
pub async fn send<W>(w: &mut W, msg: &Message, limits: &Limits) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = vec![msg.opcode()];
    match msg {
        Message::SendLine(line) => put_field(&mut frame, "line", line, limits.max_name_size, true)?,
        Message::Error(text) => put_field(&mut frame, "error", text, limits.max_name_size, true)?,
        Message::SendFile { name, content } => {
            put_field(&mut frame, "name", name, limits.max_name_size, true)?;
            put_field(&mut frame, "file", content, limits.max_file_size, false)?;
        }
        Message::RequestLine | Message::Terminate | Message::Ack | Message::Heartbeat => {}
    }
    w.write_all(&frame).await?;
    w.flush().await?;
    Ok(())
}

/// Reads one message from the stream.
///
/// Returns `Ok(None)` when the peer ends the stream cleanly before a
/// new opcode byte — the normal end of a session, not an error. A
/// stream that ends anywhere after the opcode is [`ProtoError::Truncated`].
pub async fn recv<R>(r: &mut R, limits: &Limits) -> Result<Option<Message>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match r.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let msg = match tag[0] {
        OP_SENDLINE => Message::SendLine(take_field(r, "line", limits.max_name_size, true).await?),
        OP_REQUESTLINE => Message::RequestLine,
        OP_SENDFILE => {
            let name = take_field(r, "name", limits.max_name_size, true).await?;
            let content = take_field(r, "file", limits.max_file_size, false).await?;
            Message::SendFile { name, content }
        }
        OP_TERMINATE => Message::Terminate,
        OP_ACK => Message::Ack,
        OP_HEARTBEAT => Message::Heartbeat,
        OP_ERROR => Message::Error(take_field(r, "error", limits.max_name_size, true).await?),
        other => return Err(ProtoError::UnknownOpcode(other)),
    };
    Ok(Some(msg))
}

/// Appends one length-prefixed field to a staged frame.
fn put_field(
    frame: &mut Vec<u8>,
    field: &'static str,
    bytes: &[u8],
    max: u64,
    ascii: bool,
) -> Result<(), ProtoError> {
    let len = bytes.len() as u64;
    if len > max {
        return Err(ProtoError::FieldTooLarge { field, len, max });
    }
    if ascii && !bytes.is_ascii() {
        return Err(ProtoError::NotAscii { field });
    }
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(bytes);
    Ok(())
}

/// Reads one length-prefixed field, validating the declared length
/// against `max` before allocating or reading the content.
async fn take_field<R>(
    r: &mut R,
    field: &'static str,
    max: u64,
    ascii: bool,
) -> Result<Vec<u8>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 8];
    read_exact_or_truncated(r, &mut prefix).await?;
    let len = u64::from_be_bytes(prefix);
    if len > max {
        return Err(ProtoError::FieldTooLarge { field, len, max });
    }

    #[allow(clippy::cast_possible_truncation)]
    let mut bytes = vec![0u8; len as usize];
    read_exact_or_truncated(r, &mut bytes).await?;
    if ascii && !bytes.is_ascii() {
        return Err(ProtoError::NotAscii { field });
    }
    Ok(bytes)
}

/// `read_exact` that maps a premature EOF to [`ProtoError::Truncated`].
async fn read_exact_or_truncated<R>(r: &mut R, buf: &mut [u8]) -> Result<(), ProtoError>
where
    R: AsyncRead + Unpin,
{
    match r.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ProtoError::Truncated),
        Err(e) => Err(e.into()),
    }
}
