use std::io;

use thiserror::Error;

/// Any rsdsl_lcp error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("serde_json: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("lcp packet too short: {0} bytes")]
    PacketTooShort(usize),
    #[error("lcp length field {length} invalid for {available} bytes")]
    InvalidLength { length: usize, available: usize },
    #[error("malformed configure option at offset {0}")]
    MalformedOption(usize),
    #[error("code {0} is not a configure packet")]
    NotConfigurePacket(u8),
    #[error("option {kind} rejected by handler {handler}: {reason}")]
    BadOption {
        handler: String,
        kind: u8,
        reason: String,
    },

    #[error("no protocol registered under handle {0}")]
    NoSuchProtocol(usize),
    #[error("protocols can only be changed in down phase")]
    ConnectionRunning,
    #[error("protocol {0:#06x} is not allowed to send")]
    SendNotAllowed(u16),
    #[error("device: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;
