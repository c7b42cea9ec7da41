//! Protocol message types for client↔engine communication.

use serde::Deserialize;

/// One protocol unit exchanged over the control channel.
///
/// The variant determines exactly which fields exist on the wire:
/// line-bearing variants carry a single text field, [`Message::SendFile`]
/// carries a name plus a content blob, and the remaining variants are
/// bare opcodes. Text fields are ASCII and bounded by
/// [`Limits::max_name_size`]; file content is bounded by
/// [`Limits::max_file_size`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// One captured line of interactive output (engine→client) or one
    /// queued input line (client→engine, only after a `RequestLine`).
    SendLine(Vec<u8>),
    /// Engine asks the client to release one buffered input line.
    RequestLine,
    /// A named file payload: the bundle upload, or a result artifact.
    SendFile {
        /// File path the content should be stored under.
        name: Vec<u8>,
        /// Raw file bytes.
        content: Vec<u8>,
    },
    /// Client acknowledges an `Error`, ending the session.
    Terminate,
    /// Receipt for a `SendLine` or `SendFile`.
    Ack,
    /// Build failure text, reported verbatim to the operator.
    Error(Vec<u8>),
    /// Liveness probe; the receiver must echo it.
    Heartbeat,
}

/// Wire tag for [`Message::SendLine`]. Tag values are a cross-process
/// contract and never change; tag 4 belonged to a retired file-request
/// opcode and must not be reused.
pub(crate) const OP_SENDLINE: u8 = 1;
/// Wire tag for [`Message::RequestLine`].
pub(crate) const OP_REQUESTLINE: u8 = 2;
/// Wire tag for [`Message::SendFile`].
pub(crate) const OP_SENDFILE: u8 = 3;
/// Wire tag for [`Message::Terminate`].
pub(crate) const OP_TERMINATE: u8 = 5;
/// Wire tag for [`Message::Ack`].
pub(crate) const OP_ACK: u8 = 6;
/// Wire tag for [`Message::Error`].
pub(crate) const OP_ERROR: u8 = 7;
/// Wire tag for [`Message::Heartbeat`].
pub(crate) const OP_HEARTBEAT: u8 = 8;

impl Message {
    /// The opcode tag this message is framed with.
    pub(crate) const fn opcode(&self) -> u8 {
        match self {
            Self::SendLine(_) => OP_SENDLINE,
            Self::RequestLine => OP_REQUESTLINE,
            Self::SendFile { .. } => OP_SENDFILE,
            Self::Terminate => OP_TERMINATE,
            Self::Ack => OP_ACK,
            Self::Error(_) => OP_ERROR,
            Self::Heartbeat => OP_HEARTBEAT,
        }
    }

    /// Human-readable opcode name, used in diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendLine(_) => "SENDLINE",
            Self::RequestLine => "REQUESTLINE",
            Self::SendFile { .. } => "SENDFILE",
            Self::Terminate => "TERMINATE",
            Self::Ack => "ACK",
            Self::Error(_) => "ERROR",
            Self::Heartbeat => "HEARTBEAT",
        }
    }
}

/// Field-size bounds shared by client and engine.
///
/// Both peers must run with identical limits; a mismatch is a deployment
/// error the protocol does not detect or negotiate. The defaults match
/// the stock engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest accepted bundle signature, in bytes.
    pub max_signature_size: u64,
    /// Largest accepted file payload, in bytes.
    pub max_file_size: u64,
    /// Largest accepted label (file name or text line), in bytes.
    pub max_name_size: u64,
    /// Most files one bundle may contain.
    pub max_archive_files: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_signature_size: 177,
            max_file_size: 10_485_760,
            max_name_size: 1024,
            max_archive_files: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_signature_size, 177);
        assert_eq!(limits.max_file_size, 10_485_760);
        assert_eq!(limits.max_name_size, 1024);
        assert_eq!(limits.max_archive_files, 100);
    }

    #[test]
    fn opcode_tags_are_stable() {
        // The tag values are a cross-process contract; renumbering the
        // enum must never change them.
        assert_eq!(Message::SendLine(vec![]).opcode(), 1);
        assert_eq!(Message::RequestLine.opcode(), 2);
        assert_eq!(
            Message::SendFile {
                name: vec![],
                content: vec![]
            }
            .opcode(),
            3
        );
        assert_eq!(Message::Terminate.opcode(), 5);
        assert_eq!(Message::Ack.opcode(), 6);
        assert_eq!(Message::Error(vec![]).opcode(), 7);
        assert_eq!(Message::Heartbeat.opcode(), 8);
    }
}
