//! LCP packet codec - RFC 1661 section 5.
//!
//! The codec only knows the packet header and the generic type-length-value
//! layout of configure options. Option semantics belong to the option
//! handlers.

use crate::{Error, Result};

/// PPP protocol number of LCP.
pub const LCP_PROTOCOL: u16 = 0xc021;

/// code + identifier + length
pub const HEADER_LEN: usize = 4;

/// LCP packet codes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Code {
    ConfigureRequest = 1,
    ConfigureAck = 2,
    ConfigureNak = 3,
    ConfigureReject = 4,
    TerminateRequest = 5,
    TerminateAck = 6,
    CodeReject = 7,
    ProtocolReject = 8,
    EchoRequest = 9,
    EchoReply = 10,
    DiscardRequest = 11,
}

impl Code {
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::ConfigureRequest,
            2 => Self::ConfigureAck,
            3 => Self::ConfigureNak,
            4 => Self::ConfigureReject,
            5 => Self::TerminateRequest,
            6 => Self::TerminateAck,
            7 => Self::CodeReject,
            8 => Self::ProtocolReject,
            9 => Self::EchoRequest,
            10 => Self::EchoReply,
            11 => Self::DiscardRequest,
            _ => return None,
        })
    }

    /// Codes every implementation must understand.
    /// Rejecting one of them makes the link unusable.
    pub fn is_required(code: u8) -> bool {
        (Self::ConfigureRequest as u8..=Self::CodeReject as u8).contains(&code)
    }

    pub fn is_configure(&self) -> bool {
        matches!(
            self,
            Self::ConfigureRequest | Self::ConfigureAck | Self::ConfigureNak | Self::ConfigureReject
        )
    }
}

/// A raw LCP packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub code: u8,
    pub identifier: u8,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(code: Code, identifier: u8, data: Vec<u8>) -> Self {
        Self {
            code: code as u8,
            identifier,
            data,
        }
    }

    /// Parses a packet, ignoring any padding after the length field.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::PacketTooShort(buf.len()));
        }

        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if length < HEADER_LEN || length > buf.len() {
            return Err(Error::InvalidLength {
                length,
                available: buf.len(),
            });
        }

        Ok(Self {
            code: buf[0],
            identifier: buf[1],
            data: buf[HEADER_LEN..length].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.len());

        buf.push(self.code);
        buf.push(self.identifier);
        buf.extend_from_slice(&(self.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.data);

        buf
    }

    /// Total length including the header.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `None` for codes LCP does not know.
    pub fn kind(&self) -> Option<Code> {
        Code::from_u8(self.code)
    }

    /// Magic number of an Echo-Request, Echo-Reply or Discard-Request.
    pub fn magic_number(&self) -> Option<u32> {
        match self.kind() {
            Some(Code::EchoRequest | Code::EchoReply | Code::DiscardRequest) => {
                let magic = self.data.get(..4)?;
                Some(u32::from_be_bytes([magic[0], magic[1], magic[2], magic[3]]))
            }
            _ => None,
        }
    }

    /// The code rejected by a Code-Reject.
    pub fn rejected_code(&self) -> Option<u8> {
        match self.kind() {
            Some(Code::CodeReject) => self.data.first().copied(),
            _ => None,
        }
    }

    /// The protocol number rejected by a Protocol-Reject.
    pub fn rejected_protocol(&self) -> Option<u16> {
        match self.kind() {
            Some(Code::ProtocolReject) => {
                let protocol = self.data.get(..2)?;
                Some(u16::from_be_bytes([protocol[0], protocol[1]]))
            }
            _ => None,
        }
    }

    pub fn terminate_request(identifier: u8) -> Self {
        Self::new(Code::TerminateRequest, identifier, Vec::new())
    }

    pub fn terminate_ack(identifier: u8) -> Self {
        Self::new(Code::TerminateAck, identifier, Vec::new())
    }

    /// Code-Reject carrying as much of `rejected` as fits into `mru`.
    pub fn code_reject(identifier: u8, rejected: &[u8], mru: usize) -> Self {
        let room = mru.saturating_sub(HEADER_LEN);
        let end = rejected.len().min(room);

        Self::new(Code::CodeReject, identifier, rejected[..end].to_vec())
    }

    /// Protocol-Reject carrying as much of `rejected` as fits into `mru`.
    pub fn protocol_reject(identifier: u8, protocol: u16, rejected: &[u8], mru: usize) -> Self {
        let room = mru.saturating_sub(HEADER_LEN + 2);
        let end = rejected.len().min(room);

        let mut data = Vec::with_capacity(2 + end);
        data.extend_from_slice(&protocol.to_be_bytes());
        data.extend_from_slice(&rejected[..end]);

        Self::new(Code::ProtocolReject, identifier, data)
    }

    pub fn echo_request(identifier: u8, magic_number: u32) -> Self {
        Self::new(
            Code::EchoRequest,
            identifier,
            magic_number.to_be_bytes().to_vec(),
        )
    }

    /// Echo-Reply to `request`, returning its data behind our magic number.
    pub fn echo_reply(request: &Packet, magic_number: u32) -> Self {
        let mut data = magic_number.to_be_bytes().to_vec();
        if request.data.len() > 4 {
            data.extend_from_slice(&request.data[4..]);
        }

        Self::new(Code::EchoReply, request.identifier, data)
    }

    pub fn discard_request(identifier: u8, magic_number: u32) -> Self {
        Self::new(
            Code::DiscardRequest,
            identifier,
            magic_number.to_be_bytes().to_vec(),
        )
    }
}

/// One option of a Configure-* packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigItem {
    pub kind: u8,
    pub data: Vec<u8>,
}

impl ConfigItem {
    pub fn new(kind: u8, data: Vec<u8>) -> Self {
        Self { kind, data }
    }
}

/// A Configure-Request, -Ack, -Nak or -Reject split into its options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigurePacket {
    code: Code,
    identifier: u8,
    items: Vec<ConfigItem>,
}

impl ConfigurePacket {
    pub fn new(code: Code, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            items: Vec::new(),
        }
    }

    pub fn parse(packet: &Packet) -> Result<Self> {
        let code = match packet.kind() {
            Some(code) if code.is_configure() => code,
            _ => return Err(Error::NotConfigurePacket(packet.code)),
        };

        let mut items = Vec::new();
        let mut offset = 0;
        while offset < packet.data.len() {
            let header = packet
                .data
                .get(offset..offset + 2)
                .ok_or(Error::MalformedOption(offset))?;

            let len = header[1] as usize;
            if len < 2 || offset + len > packet.data.len() {
                return Err(Error::MalformedOption(offset));
            }

            items.push(ConfigItem::new(
                header[0],
                packet.data[offset + 2..offset + len].to_vec(),
            ));
            offset += len;
        }

        Ok(Self {
            code,
            identifier: packet.identifier,
            items,
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut data = Vec::new();
        for item in &self.items {
            data.push(item.kind);
            data.push((item.data.len() + 2) as u8);
            data.extend_from_slice(&item.data);
        }

        Packet::new(self.code, self.identifier, data)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn set_code(&mut self, code: Code) {
        self.code = code;
    }

    pub fn identifier(&self) -> u8 {
        self.identifier
    }

    pub fn set_identifier(&mut self, identifier: u8) {
        self.identifier = identifier;
    }

    pub fn items(&self) -> &[ConfigItem] {
        &self.items
    }

    pub fn item(&self, kind: u8) -> Option<&ConfigItem> {
        self.items.iter().find(|item| item.kind == kind)
    }

    pub fn add_item(&mut self, item: ConfigItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
