/*!
 * Protocol message model.
 *
 * Each variant is one opaque protocol unit of the in.touch2 exchange set.
 * The wire encoding itself lives behind the [`MessageCodec`] seam; the
 * connection engine only relies on the matching key of each unit: its
 * [`MessageKind`] plus the shared sequence number.
 */
use std::fmt;

use bytes::Bytes;

use crate::error::Result;

/// Firmware version of one spa subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Firmware build identifier
    pub build: String,
    /// Major version number
    pub major: u8,
    /// Minor version number
    pub minor: u8,
}

impl FirmwareVersion {
    /// Create a new firmware version
    pub fn new<S: Into<String>>(build: S, major: u8, minor: u8) -> Self {
        Self {
            build: build.into(),
            major,
            minor,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}.{}", self.build, self.major, self.minor)
    }
}

/// One absolute byte-range patch within a partial status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockChange {
    /// Absolute byte offset into the status structure
    pub offset: u16,
    /// Replacement bytes for the range starting at `offset`
    pub data: Bytes,
}

impl BlockChange {
    /// Create a new block change
    pub fn new(offset: u16, data: Bytes) -> Self {
        Self { offset, data }
    }
}

/// The command carried by a pack-command message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackCommandKind {
    /// Write new bytes at an absolute offset in the structure
    SetValue {
        /// Absolute byte offset of the value
        offset: u16,
        /// Encoded replacement bytes
        data: Bytes,
    },
    /// Simulate a keypad press
    KeyPress {
        /// Key code of the pressed button
        key: u8,
    },
}

/// A protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client identification, sent once at connect; no reply is awaited
    Hello {
        /// Client identifier bytes
        client_identifier: Bytes,
    },
    /// Liveness probe
    Ping {
        /// Exchange sequence number
        seq: u8,
    },
    /// Liveness probe response
    PingResponse {
        /// Sequence number of the matched ping
        seq: u8,
    },
    /// Firmware version request
    VersionRequest {
        /// Exchange sequence number
        seq: u8,
    },
    /// Firmware version response, one version per subsystem
    VersionResponse {
        /// Sequence number of the matched request
        seq: u8,
        /// Display-facing subsystem version
        display: FirmwareVersion,
        /// Controller-facing subsystem version
        controller: FirmwareVersion,
    },
    /// Radio channel request
    ChannelRequest {
        /// Exchange sequence number
        seq: u8,
    },
    /// Radio channel response
    ChannelResponse {
        /// Sequence number of the matched request
        seq: u8,
        /// Radio channel in use
        channel: u8,
        /// Signal strength in percent
        signal_strength: u8,
    },
    /// Config file request
    ConfigFileRequest {
        /// Exchange sequence number
        seq: u8,
    },
    /// Config file response carrying the structure identity
    ConfigFileResponse {
        /// Sequence number of the matched request
        seq: u8,
        /// Platform key naming the firmware pack (e.g. "inYT")
        platform_key: String,
        /// Config layout revision in use by the device
        config_revision: u16,
        /// Log layout revision in use by the device
        log_revision: u16,
    },
    /// Status block request scoped to a byte range
    StatusBlockRequest {
        /// Exchange sequence number
        seq: u8,
        /// First byte of the requested range
        start: u16,
        /// One past the last byte of the requested range
        end: u16,
    },
    /// Status block response carrying the requested range
    StatusBlockResponse {
        /// Sequence number of the matched request
        seq: u8,
        /// First byte of the carried range
        start: u16,
        /// The bytes of the requested range
        data: Bytes,
    },
    /// Unsolicited device-initiated patch to the status structure
    PartialStatusUpdate {
        /// The byte-range patches, in device order
        changes: Vec<BlockChange>,
    },
    /// Command to the spa pack
    PackCommand {
        /// Exchange sequence number
        seq: u8,
        /// Pack type framing parameter
        pack_type: u8,
        /// Config layout revision framing parameter
        config_revision: u16,
        /// Log layout revision framing parameter
        log_revision: u16,
        /// The command itself
        command: PackCommandKind,
    },
}

/// Discriminant of a protocol message, used as half of the matching key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client hello
    Hello,
    /// Ping request
    Ping,
    /// Ping response
    PingResponse,
    /// Version request
    VersionRequest,
    /// Version response
    VersionResponse,
    /// Channel request
    ChannelRequest,
    /// Channel response
    ChannelResponse,
    /// Config file request
    ConfigFileRequest,
    /// Config file response
    ConfigFileResponse,
    /// Status block request
    StatusBlockRequest,
    /// Status block response
    StatusBlockResponse,
    /// Partial status update
    PartialStatusUpdate,
    /// Pack command
    PackCommand,
}

impl MessageKind {
    /// The response kind paired with this request kind, if any
    pub fn response_kind(&self) -> Option<MessageKind> {
        match self {
            MessageKind::Ping => Some(MessageKind::PingResponse),
            MessageKind::VersionRequest => Some(MessageKind::VersionResponse),
            MessageKind::ChannelRequest => Some(MessageKind::ChannelResponse),
            MessageKind::ConfigFileRequest => Some(MessageKind::ConfigFileResponse),
            MessageKind::StatusBlockRequest => Some(MessageKind::StatusBlockResponse),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Message {
    /// The kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Hello { .. } => MessageKind::Hello,
            Message::Ping { .. } => MessageKind::Ping,
            Message::PingResponse { .. } => MessageKind::PingResponse,
            Message::VersionRequest { .. } => MessageKind::VersionRequest,
            Message::VersionResponse { .. } => MessageKind::VersionResponse,
            Message::ChannelRequest { .. } => MessageKind::ChannelRequest,
            Message::ChannelResponse { .. } => MessageKind::ChannelResponse,
            Message::ConfigFileRequest { .. } => MessageKind::ConfigFileRequest,
            Message::ConfigFileResponse { .. } => MessageKind::ConfigFileResponse,
            Message::StatusBlockRequest { .. } => MessageKind::StatusBlockRequest,
            Message::StatusBlockResponse { .. } => MessageKind::StatusBlockResponse,
            Message::PartialStatusUpdate { .. } => MessageKind::PartialStatusUpdate,
            Message::PackCommand { .. } => MessageKind::PackCommand,
        }
    }

    /// The sequence number of this message, if it carries one
    pub fn sequence(&self) -> Option<u8> {
        match self {
            Message::Hello { .. } | Message::PartialStatusUpdate { .. } => None,
            Message::Ping { seq }
            | Message::PingResponse { seq }
            | Message::VersionRequest { seq }
            | Message::VersionResponse { seq, .. }
            | Message::ChannelRequest { seq }
            | Message::ChannelResponse { seq, .. }
            | Message::ConfigFileRequest { seq }
            | Message::ConfigFileResponse { seq, .. }
            | Message::StatusBlockRequest { seq, .. }
            | Message::StatusBlockResponse { seq, .. }
            | Message::PackCommand { seq, .. } => Some(*seq),
        }
    }
}

/// Wire codec seam.
///
/// The actual datagram encoding of the in.touch2 protocol lives behind
/// this trait; the connection engine never inspects raw bytes.
pub trait MessageCodec: Send + Sync + fmt::Debug {
    /// Encode a message into a datagram payload
    fn encode(&self, message: &Message) -> Result<Bytes>;

    /// Decode a datagram payload into a message
    fn decode(&self, datagram: &[u8]) -> Result<Message>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_sequence() {
        let msg = Message::VersionRequest { seq: 7 };
        assert_eq!(msg.kind(), MessageKind::VersionRequest);
        assert_eq!(msg.sequence(), Some(7));

        let msg = Message::Hello {
            client_identifier: Bytes::from_static(b"CLIENT01"),
        };
        assert_eq!(msg.kind(), MessageKind::Hello);
        assert_eq!(msg.sequence(), None);

        let msg = Message::PartialStatusUpdate { changes: vec![] };
        assert_eq!(msg.sequence(), None);
    }

    #[test]
    fn test_response_kinds() {
        assert_eq!(
            MessageKind::VersionRequest.response_kind(),
            Some(MessageKind::VersionResponse)
        );
        assert_eq!(
            MessageKind::StatusBlockRequest.response_kind(),
            Some(MessageKind::StatusBlockResponse)
        );
        assert_eq!(MessageKind::Hello.response_kind(), None);
        assert_eq!(MessageKind::PackCommand.response_kind(), None);
    }

    #[test]
    fn test_firmware_version_display() {
        let v = FirmwareVersion::new("inTW", 1, 2);
        assert_eq!(format!("{}", v), "inTW v1.2");
    }
}
