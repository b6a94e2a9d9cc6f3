//! Registry of the protocols riding on top of LCP.
//!
//! Authenticators, network control protocols and the like register here.
//! The state machine brings them up phase by phase once LCP is opened and
//! downs them when the link goes away.

use tracing::{debug, info};

use crate::{Error, Phase, Result};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ProtocolFlags {
    /// A failure to come up does not take the connection down.
    pub not_important: bool,
    /// May exchange packets from the establishment phase on.
    pub always_allowed: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ProtocolStatus {
    Down,
    GoingUp,
    Up,
}

/// Outcome of handing a packet to a protocol.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Received {
    Handled,
    /// Handled, send this packet back on the same protocol number.
    Reply(Vec<u8>),
    Unhandled,
}

/// A sub-protocol driven by the LCP state machine.
///
/// All methods are called with the interface lock held.
pub trait Protocol: Send {
    fn name(&self) -> &str;

    fn protocol_number(&self) -> u16;

    /// The phase in which this protocol is brought up.
    fn activation_phase(&self) -> Phase;

    fn flags(&self) -> ProtocolFlags {
        ProtocolFlags::default()
    }

    /// Starts the protocol.
    ///
    /// Returns `Up` if it is ready immediately, `GoingUp` if it will report
    /// through [`Interface::protocol_up`] or [`Interface::protocol_up_failed`]
    /// later and `Down` if it failed right away.
    ///
    /// [`Interface::protocol_up`]: crate::Interface::protocol_up
    /// [`Interface::protocol_up_failed`]: crate::Interface::protocol_up_failed
    fn up(&mut self) -> ProtocolStatus;

    fn down(&mut self);

    fn receive(&mut self, _packet: &[u8]) -> Received {
        Received::Unhandled
    }
}

/// Handle of a registered protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolId(usize);

impl ProtocolId {
    pub fn index(&self) -> usize {
        self.0
    }
}

struct Entry {
    protocol: Box<dyn Protocol>,
    status: ProtocolStatus,
    enabled: bool,
}

/// Result of bringing one phase up.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PhaseUp {
    /// Protocols of the phase that have not reported yet.
    pub waiting: usize,
    /// Protocols that failed to start.
    pub failed: Vec<ProtocolId>,
}

pub(crate) enum Dispatch {
    /// Nobody is registered for the protocol number.
    Unknown,
    /// Registered but disabled, not allowed yet or not interested.
    Discarded,
    Handled(Option<Vec<u8>>),
}

/// Whether a protocol may exchange packets in `phase`.
pub fn is_allowed(protocol: &dyn Protocol, phase: Phase) -> bool {
    if protocol.flags().always_allowed && phase >= Phase::Establishment {
        return true;
    }

    phase >= protocol.activation_phase()
}

/// Protocols in insertion order.
#[derive(Default)]
pub struct ProtocolRegistry {
    entries: Vec<Option<Entry>>,
}

impl ProtocolRegistry {
    pub fn add(&mut self, protocol: Box<dyn Protocol>) -> ProtocolId {
        info!(
            "add protocol {} {:#06x}, phase {:?}",
            protocol.name(),
            protocol.protocol_number(),
            protocol.activation_phase()
        );

        self.entries.push(Some(Entry {
            protocol,
            status: ProtocolStatus::Down,
            enabled: true,
        }));

        ProtocolId(self.entries.len() - 1)
    }

    /// Unregisters a protocol, downing it first if needed.
    pub fn remove(&mut self, id: ProtocolId) -> Result<Box<dyn Protocol>> {
        let mut entry = self
            .entries
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(Error::NoSuchProtocol(id.0))?;

        if entry.status != ProtocolStatus::Down {
            entry.protocol.down();
        }

        info!("remove protocol {}", entry.protocol.name());
        Ok(entry.protocol)
    }

    fn entry(&self, id: ProtocolId) -> Result<&Entry> {
        self.entries
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(Error::NoSuchProtocol(id.0))
    }

    fn entry_mut(&mut self, id: ProtocolId) -> Result<&mut Entry> {
        self.entries
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(Error::NoSuchProtocol(id.0))
    }

    fn iter(&self) -> impl Iterator<Item = (ProtocolId, &Entry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_ref().map(|entry| (ProtocolId(index), entry)))
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = (ProtocolId, &mut Entry)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(index, entry)| entry.as_mut().map(|entry| (ProtocolId(index), entry)))
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<ProtocolId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn get(&self, id: ProtocolId) -> Option<&dyn Protocol> {
        self.entry(id).ok().map(|entry| entry.protocol.as_ref())
    }

    pub fn status(&self, id: ProtocolId) -> Option<ProtocolStatus> {
        self.entry(id).ok().map(|entry| entry.status)
    }

    pub fn is_enabled(&self, id: ProtocolId) -> Option<bool> {
        self.entry(id).ok().map(|entry| entry.enabled)
    }

    pub fn set_enabled(&mut self, id: ProtocolId, enabled: bool) -> Result<()> {
        self.entry_mut(id)?.enabled = enabled;
        Ok(())
    }

    /// Records a readiness report, returning the previous status.
    pub fn set_status(&mut self, id: ProtocolId, status: ProtocolStatus) -> Result<ProtocolStatus> {
        let entry = self.entry_mut(id)?;
        debug!(
            "protocol {} {:?} -> {:?}",
            entry.protocol.name(),
            entry.status,
            status
        );

        Ok(std::mem::replace(&mut entry.status, status))
    }

    pub fn flags(&self, id: ProtocolId) -> Option<ProtocolFlags> {
        self.entry(id).ok().map(|entry| entry.protocol.flags())
    }

    /// Starts every enabled protocol of `phase` that is down.
    pub fn bring_phase_up(&mut self, phase: Phase) -> PhaseUp {
        let mut result = PhaseUp::default();

        for (id, entry) in self.iter_mut() {
            if !entry.enabled || entry.protocol.activation_phase() != phase {
                continue;
            }

            if entry.status == ProtocolStatus::Down {
                entry.status = entry.protocol.up();
                debug!("protocol {} up: {:?}", entry.protocol.name(), entry.status);

                if entry.status == ProtocolStatus::Down {
                    result.failed.push(id);
                }
            }

            if entry.status == ProtocolStatus::GoingUp {
                result.waiting += 1;
            }
        }

        result
    }

    /// Downs every protocol that is not down, whatever its phase.
    ///
    /// Returns how many were downed.
    pub fn down_protocols(&mut self) -> usize {
        let mut count = 0;
        for (_, entry) in self.iter_mut() {
            if entry.status != ProtocolStatus::Down {
                entry.status = ProtocolStatus::Down;
                entry.protocol.down();
                count += 1;
            }
        }

        count
    }

    pub fn all_down(&self) -> bool {
        self.iter()
            .all(|(_, entry)| entry.status == ProtocolStatus::Down)
    }

    /// Disables every protocol using `number` after the peer rejected it.
    pub fn disable_number(&mut self, number: u16) -> usize {
        let mut count = 0;
        for (_, entry) in self.iter_mut() {
            if entry.protocol.protocol_number() == number && entry.enabled {
                info!("protocol {} rejected by peer", entry.protocol.name());
                entry.enabled = false;
                count += 1;
            }
        }

        count
    }

    /// Finds the first registered protocol for `number` that is enabled and
    /// allowed in `phase`.
    pub fn find_allowed(&self, number: u16, phase: Phase) -> Option<ProtocolId> {
        self.iter()
            .find(|(_, entry)| {
                entry.enabled
                    && entry.protocol.protocol_number() == number
                    && is_allowed(entry.protocol.as_ref(), phase)
            })
            .map(|(id, _)| id)
    }

    /// Hands an incoming packet to the protocols registered for `number`.
    pub(crate) fn dispatch(&mut self, number: u16, phase: Phase, packet: &[u8]) -> Dispatch {
        let mut known = false;

        for (_, entry) in self.iter_mut() {
            if entry.protocol.protocol_number() != number {
                continue;
            }
            known = true;

            if !entry.enabled || !is_allowed(entry.protocol.as_ref(), phase) {
                continue;
            }

            match entry.protocol.receive(packet) {
                Received::Handled => return Dispatch::Handled(None),
                Received::Reply(reply) => return Dispatch::Handled(Some(reply)),
                Received::Unhandled => {}
            }
        }

        if known {
            Dispatch::Discarded
        } else {
            Dispatch::Unknown
        }
    }
}
