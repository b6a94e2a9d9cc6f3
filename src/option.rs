//! Configure option handling.
//!
//! The state machine never interprets option values itself. Every option
//! kind is owned by one handler which evaluates the peer's proposals and
//! contributes to our own Configure-Requests.

use tracing::debug;

use crate::packet::{Code, ConfigItem, ConfigurePacket};
use crate::{Error, Result};

/// Evaluation of a single option proposed by the peer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ItemVerdict {
    Acceptable,
    /// Suggest this value instead.
    Nak(ConfigItem),
    Reject,
}

/// Evaluation of a whole Configure-Request.
///
/// `Acceptable` is RCR+, the other two are RCR- carrying the response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RequestVerdict {
    Acceptable(ConfigurePacket),
    Nak(ConfigurePacket),
    Reject(ConfigurePacket),
}

impl RequestVerdict {
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::Acceptable(_))
    }
}

/// Handler for one configure option kind.
///
/// Errors returned from any method are treated as a corrupted negotiation
/// and close the connection.
pub trait OptionHandler: Send {
    fn name(&self) -> &str;

    /// The option type this handler owns.
    fn kind(&self) -> u8;

    fn is_enabled(&self) -> bool {
        true
    }

    fn add_to_request(&mut self, _request: &mut ConfigurePacket) -> Result<()> {
        Ok(())
    }

    fn parse_ack(&mut self, _ack: &ConfigurePacket) -> Result<()> {
        Ok(())
    }

    fn parse_nak(&mut self, _nak: &ConfigurePacket) -> Result<()> {
        Ok(())
    }

    fn parse_reject(&mut self, _reject: &ConfigurePacket) -> Result<()> {
        Ok(())
    }

    fn parse_request(&mut self, item: &ConfigItem) -> Result<ItemVerdict>;

    /// An item the peer should have proposed but did not, to be sent in a
    /// Configure-Nak.
    fn missing_from_request(&mut self, _request: &ConfigurePacket) -> Option<ConfigItem> {
        None
    }

    fn sending_ack(&mut self, _ack: &ConfigurePacket) -> Result<()> {
        Ok(())
    }

    /// Forgets everything negotiated.
    fn reset(&mut self) {}
}

/// Ordered set of option handlers.
#[derive(Default)]
pub struct OptionHandlers {
    handlers: Vec<Box<dyn OptionHandler>>,
}

impl OptionHandlers {
    pub fn add(&mut self, handler: Box<dyn OptionHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn enabled(&mut self) -> impl Iterator<Item = &mut Box<dyn OptionHandler>> {
        self.handlers
            .iter_mut()
            .filter(|handler| handler.is_enabled())
    }

    fn handler_for(&mut self, kind: u8) -> Option<&mut Box<dyn OptionHandler>> {
        self.enabled().find(|handler| handler.kind() == kind)
    }

    /// Decides how to answer the peer's request.
    ///
    /// Unknown options are rejected. Handlers may only append suggestions
    /// while `may_nak` holds.
    pub fn evaluate(&mut self, request: &ConfigurePacket, may_nak: bool) -> Result<RequestVerdict> {
        let mut nak = ConfigurePacket::new(Code::ConfigureNak, request.identifier());
        let mut reject = ConfigurePacket::new(Code::ConfigureReject, request.identifier());

        for item in request.items() {
            let Some(handler) = self.handler_for(item.kind) else {
                debug!("unknown configure option {}", item.kind);
                reject.add_item(item.clone());
                continue;
            };

            match handler.parse_request(item)? {
                ItemVerdict::Acceptable => {}
                ItemVerdict::Nak(suggestion) => nak.add_item(suggestion),
                ItemVerdict::Reject => reject.add_item(item.clone()),
            }
        }

        if may_nak {
            for handler in self.enabled() {
                if let Some(item) = handler.missing_from_request(request) {
                    nak.add_item(item);
                }
            }
        }

        Ok(if !reject.is_empty() {
            RequestVerdict::Reject(reject)
        } else if !nak.is_empty() {
            RequestVerdict::Nak(nak)
        } else {
            RequestVerdict::Acceptable(request.clone())
        })
    }

    pub fn add_to_request(&mut self, request: &mut ConfigurePacket) -> Result<()> {
        for handler in self.enabled() {
            handler.add_to_request(request)?;
        }

        Ok(())
    }

    pub fn parse_ack(&mut self, ack: &ConfigurePacket) -> Result<()> {
        for handler in self.enabled() {
            handler.parse_ack(ack)?;
        }

        Ok(())
    }

    /// Lets every handler see a Configure-Nak or Configure-Reject.
    pub fn parse_nak_or_reject(&mut self, packet: &ConfigurePacket) -> Result<()> {
        for handler in self.enabled() {
            if packet.code() == Code::ConfigureReject {
                handler.parse_reject(packet)?;
            } else {
                handler.parse_nak(packet)?;
            }
        }

        Ok(())
    }

    pub fn sending_ack(&mut self, ack: &ConfigurePacket) -> Result<()> {
        for handler in self.enabled() {
            handler.sending_ack(ack)?;
        }

        Ok(())
    }

    pub fn reset(&mut self) {
        for handler in self.handlers.iter_mut() {
            handler.reset();
        }
    }
}

pub const MRU_OPTION: u8 = 1;
pub const DEFAULT_MRU: u16 = 1500;

/// Maximum-Receive-Unit negotiation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MruHandler {
    configured: u16,
    minimum: u16,
    local: Option<u16>,
    peer: u16,
}

impl MruHandler {
    /// Requests `mru` if it differs from the default and naks peer values
    /// below `minimum`.
    pub fn new(mru: u16, minimum: u16) -> Self {
        Self {
            configured: mru,
            minimum,
            local: (mru != DEFAULT_MRU).then_some(mru),
            peer: DEFAULT_MRU,
        }
    }

    /// The MRU we are requesting, `None` if we rely on the default.
    pub fn local_mru(&self) -> Option<u16> {
        self.local
    }

    /// The MRU the peer asked for.
    pub fn peer_mru(&self) -> u16 {
        self.peer
    }

    fn value(&self, item: &ConfigItem) -> Result<u16> {
        match *item.data.as_slice() {
            [hi, lo] => Ok(u16::from_be_bytes([hi, lo])),
            _ => Err(Error::BadOption {
                handler: self.name().to_owned(),
                kind: MRU_OPTION,
                reason: format!("length {}", item.data.len()),
            }),
        }
    }
}

impl OptionHandler for MruHandler {
    fn name(&self) -> &str {
        "mru"
    }

    fn kind(&self) -> u8 {
        MRU_OPTION
    }

    fn add_to_request(&mut self, request: &mut ConfigurePacket) -> Result<()> {
        if let Some(mru) = self.local {
            request.add_item(ConfigItem::new(MRU_OPTION, mru.to_be_bytes().to_vec()));
        }

        Ok(())
    }

    fn parse_nak(&mut self, nak: &ConfigurePacket) -> Result<()> {
        if let Some(item) = nak.item(MRU_OPTION) {
            let suggested = self.value(item)?;
            if suggested < self.local.unwrap_or(DEFAULT_MRU) {
                self.local = Some(suggested);
            }
        }

        Ok(())
    }

    fn parse_reject(&mut self, reject: &ConfigurePacket) -> Result<()> {
        if reject.item(MRU_OPTION).is_some() {
            self.local = None;
        }

        Ok(())
    }

    fn parse_request(&mut self, item: &ConfigItem) -> Result<ItemVerdict> {
        let mru = self.value(item)?;
        if mru < self.minimum {
            return Ok(ItemVerdict::Nak(ConfigItem::new(
                MRU_OPTION,
                self.minimum.to_be_bytes().to_vec(),
            )));
        }

        self.peer = mru;
        Ok(ItemVerdict::Acceptable)
    }

    fn reset(&mut self) {
        self.local = (self.configured != DEFAULT_MRU).then_some(self.configured);
        self.peer = DEFAULT_MRU;
    }
}
