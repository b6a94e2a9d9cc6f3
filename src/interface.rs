//! Thread-safe PPP interface.
//!
//! An [`Interface`] owns one LCP state machine together with its device,
//! protocols, option handlers and listener. All events are serialized by a
//! single mutex, so the device, user commands and the pulse thread may call
//! in from different threads.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::auth::{AuthenticationStatus, Side};
use crate::counter::NegotiationCounter;
use crate::lcp::{Link, StateMachine};
use crate::option::{MruHandler, OptionHandler, OptionHandlers};
use crate::packet::LCP_PROTOCOL;
use crate::protocol::{Dispatch, Protocol, ProtocolId, ProtocolRegistry, ProtocolStatus};
use crate::{Config, Device, Error, Listener, NullListener, Phase, Report, Result, State};

/// What became of a packet handed to [`Interface::receive`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Disposition {
    /// Processed by LCP or a registered protocol.
    Accepted,
    /// Unknown protocol, answered with a Protocol-Reject.
    Rejected,
    /// Known protocol that is disabled, not allowed in this phase or did
    /// not handle the packet.
    Discarded,
}

struct Inner {
    name: String,
    lcp: StateMachine,
    device: Box<dyn Device>,
    protocols: ProtocolRegistry,
    options: OptionHandlers,
    listener: Box<dyn Listener>,

    // Attempts since the last established connection.
    connect_attempt: u32,
    reconnect_at: Option<Instant>,
    // Last data traffic, only tracked while established.
    idle_since: Option<Instant>,
}

impl Inner {
    fn split(&mut self) -> (&mut StateMachine, Link<'_>) {
        (
            &mut self.lcp,
            Link {
                device: &mut *self.device,
                protocols: &mut self.protocols,
                options: &mut self.options,
                listener: &mut *self.listener,
            },
        )
    }

    fn event<T>(&mut self, f: impl FnOnce(&mut StateMachine, &mut Link<'_>) -> T) -> T {
        let result = {
            let (lcp, mut link) = self.split();
            f(lcp, &mut link)
        };

        self.settle(Instant::now());
        result
    }

    /// Updates the redial and idle bookkeeping after an event.
    fn settle(&mut self, now: Instant) {
        if self.lcp.phase() == Phase::Established {
            self.connect_attempt = 0;
            self.idle_since.get_or_insert(now);
        } else {
            self.idle_since = None;
        }

        let Some(ended) = self.lcp.take_ended() else {
            return;
        };

        let config = self.lcp.config();
        let redial = match ended {
            Report::ConnectionLost => config.auto_reconnect,
            Report::DeviceUpFailed => true,
            _ => false,
        };
        if !redial {
            return;
        }

        if self.connect_attempt > config.connect_retries_limit {
            info!(
                "interface {} giving up after {} attempts",
                self.name, self.connect_attempt
            );
            return;
        }

        let delay = config.reconnect_delay();
        info!(
            "interface {} redialing in {:?}, attempt {}",
            self.name,
            delay,
            self.connect_attempt + 1
        );
        self.reconnect_at = Some(now + delay);
    }

    fn touch(&mut self, now: Instant) {
        if self.idle_since.is_some() {
            self.idle_since = Some(now);
        }
    }

    fn pulse(&mut self, now: Instant) {
        {
            let (lcp, mut link) = self.split();
            lcp.pulse(&mut link, now);
        }

        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.connect_attempt += 1;

            let (lcp, mut link) = self.split();
            if !lcp.redial(&mut link) {
                debug!("redial dropped in state {:?}", lcp.state());
            }
        }

        let idle_limit = self.lcp.config().disconnect_after_idle();
        if let (Some(limit), Some(since)) = (idle_limit, self.idle_since) {
            if now.saturating_duration_since(since) >= limit {
                info!("interface {} idle for {:?}, closing", self.name, limit);

                let (lcp, mut link) = self.split();
                lcp.close(&mut link);
            }
        }

        self.settle(now);
    }

    fn receive(&mut self, protocol: u16, packet: &[u8]) -> Result<Disposition> {
        let (lcp, mut link) = self.split();

        if protocol == LCP_PROTOCOL {
            lcp.receive(&mut link, packet)?;
            return Ok(Disposition::Accepted);
        }

        match link.protocols.dispatch(protocol, lcp.phase(), packet) {
            Dispatch::Handled(reply) => {
                if let Some(reply) = reply {
                    if let Err(e) = link.device.send(protocol, &reply) {
                        warn!("can't send reply for protocol {:#06x}: {}", protocol, e);
                    }
                }

                self.touch(Instant::now());
                Ok(Disposition::Accepted)
            }
            Dispatch::Discarded => {
                debug!("discard packet for protocol {:#06x}", protocol);
                Ok(Disposition::Discarded)
            }
            Dispatch::Unknown => {
                lcp.reject_protocol(&mut link, protocol, packet);
                Ok(Disposition::Rejected)
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let count = self.protocols.down_protocols();
        if count > 0 {
            warn!(
                "interface {} dropped in state {:?}, downed {} protocols",
                self.name,
                self.lcp.state(),
                count
            );
        }
    }
}

#[derive(Clone)]
pub struct Interface {
    inner: Arc<Mutex<Inner>>,
}

impl Interface {
    pub fn new(name: impl Into<String>, config: Config, device: Box<dyn Device>) -> Self {
        Self::with_listener(name, config, device, Box::new(NullListener))
    }

    pub fn with_listener(
        name: impl Into<String>,
        config: Config,
        device: Box<dyn Device>,
        listener: Box<dyn Listener>,
    ) -> Self {
        let name = name.into();

        let mut options = OptionHandlers::default();
        options.add(Box::new(MruHandler::new(config.mru, config.min_peer_mru)));

        debug!("create interface {} on device {}", name, device.name());

        Self {
            inner: Arc::new(Mutex::new(Inner {
                name,
                lcp: StateMachine::new(config),
                device,
                protocols: ProtocolRegistry::default(),
                options,
                listener,
                connect_attempt: 0,
                reconnect_at: None,
                idle_since: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("ppp interface mutex is poisoned")
    }

    fn with_lcp<T>(&self, f: impl FnOnce(&mut StateMachine, &mut Link<'_>) -> T) -> T {
        self.lock().event(f)
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn state(&self) -> State {
        self.lock().lcp.state()
    }

    pub fn phase(&self) -> Phase {
        self.lock().lcp.phase()
    }

    pub fn magic_number(&self) -> u32 {
        self.lock().lcp.magic_number()
    }

    pub fn request_counter(&self) -> NegotiationCounter {
        self.lock().lcp.request_counter()
    }

    pub fn terminate_counter(&self) -> NegotiationCounter {
        self.lock().lcp.terminate_counter()
    }

    pub fn nak_counter(&self) -> NegotiationCounter {
        self.lock().lcp.nak_counter()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.lock().lcp.timer().is_armed()
    }

    pub fn last_request_id(&self) -> Option<u8> {
        self.lock().lcp.last_request_id()
    }

    pub fn last_terminate_id(&self) -> Option<u8> {
        self.lock().lcp.last_terminate_id()
    }

    pub fn last_echo_id(&self) -> Option<u8> {
        self.lock().lcp.last_echo_id()
    }

    pub fn authentication_status(&self, side: Side) -> AuthenticationStatus {
        self.lock().lcp.authentication_status(side)
    }

    pub fn last_report(&self) -> Option<Report> {
        self.lock().lcp.last_report()
    }

    pub fn protocol_status(&self, id: ProtocolId) -> Option<ProtocolStatus> {
        self.lock().protocols.status(id)
    }

    /// Connection attempts since the last established connection.
    pub fn connect_attempt(&self) -> u32 {
        self.lock().connect_attempt
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.lock().reconnect_at.is_some()
    }

    /// Opens the connection. Starts counting connection attempts anew.
    pub fn up(&self) {
        let mut inner = self.lock();
        inner.connect_attempt = 1;
        inner.reconnect_at = None;

        inner.event(|lcp, link| lcp.open(link));
    }

    /// Closes the connection and cancels a pending redial. Calling it
    /// repeatedly is harmless.
    pub fn down(&self) {
        let mut inner = self.lock();
        inner.reconnect_at = None;

        inner.event(|lcp, link| lcp.close(link));
    }

    pub fn lower_up(&self) {
        self.with_lcp(|lcp, link| lcp.lower_up(link));
    }

    pub fn lower_down(&self) {
        self.with_lcp(|lcp, link| lcp.lower_down(link));
    }

    pub fn lower_up_failed(&self) {
        self.with_lcp(|lcp, link| lcp.lower_up_failed(link));
    }

    /// Renegotiates a running connection.
    pub fn reconfigure(&self) -> bool {
        self.with_lcp(|lcp, link| lcp.reconfigure(link))
    }

    pub fn send_echo_request(&self) -> bool {
        self.with_lcp(|lcp, link| lcp.send_echo_request(link))
    }

    pub fn send_discard_request(&self) -> bool {
        self.with_lcp(|lcp, link| lcp.send_discard_request(link))
    }

    /// Expires the restart timer immediately.
    pub fn timer_expired(&self) {
        self.with_lcp(|lcp, link| lcp.timer_expired(link));
    }

    /// Expires the restart timer if its deadline has passed, redials when a
    /// reconnect is due and closes an idle connection.
    pub fn pulse(&self) {
        self.pulse_at(Instant::now());
    }

    pub fn pulse_at(&self, now: Instant) {
        self.lock().pulse(now);
    }

    /// Spawns a thread that pulses the interface every `interval` until the
    /// last handle is dropped.
    pub fn spawn_pulse(&self, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);

        thread::spawn(move || loop {
            thread::sleep(interval);

            let Some(inner) = weak.upgrade() else {
                break;
            };

            let mut inner = inner.lock().expect("ppp interface mutex is poisoned");
            inner.pulse(Instant::now());
        })
    }

    /// Hands a packet received from the device to LCP or the protocol
    /// registered for `protocol`.
    pub fn receive(&self, protocol: u16, packet: &[u8]) -> Result<Disposition> {
        let mut inner = self.lock();

        let disposition = inner.receive(protocol, packet);
        inner.settle(Instant::now());

        disposition
    }

    /// Sends a packet on behalf of a registered protocol.
    ///
    /// Fails unless the device is up and the protocol is enabled and
    /// allowed in the current phase.
    pub fn send(&self, protocol: u16, packet: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        let phase = inner.lcp.phase();

        if !inner.device.is_up() || inner.protocols.find_allowed(protocol, phase).is_none() {
            return Err(Error::SendNotAllowed(protocol));
        }

        inner.device.send(protocol, packet)?;
        inner.touch(Instant::now());

        Ok(())
    }

    /// Registers a protocol. Only possible while the connection is down.
    pub fn add_protocol(&self, protocol: Box<dyn Protocol>) -> Result<ProtocolId> {
        let mut inner = self.lock();
        if inner.lcp.phase() != Phase::Down {
            return Err(Error::ConnectionRunning);
        }

        Ok(inner.protocols.add(protocol))
    }

    /// Unregisters a protocol. Only possible while the connection is down.
    pub fn remove_protocol(&self, id: ProtocolId) -> Result<Box<dyn Protocol>> {
        let mut inner = self.lock();
        if inner.lcp.phase() != Phase::Down {
            return Err(Error::ConnectionRunning);
        }

        inner.protocols.remove(id)
    }

    pub fn set_protocol_enabled(&self, id: ProtocolId, enabled: bool) -> Result<()> {
        self.lock().protocols.set_enabled(id, enabled)
    }

    /// Adds a configure option handler. Only possible while the connection
    /// is down.
    pub fn add_option_handler(&self, handler: Box<dyn OptionHandler>) -> Result<()> {
        let mut inner = self.lock();
        if inner.lcp.phase() != Phase::Down {
            return Err(Error::ConnectionRunning);
        }

        inner.options.add(handler);
        Ok(())
    }

    pub fn protocol_up(&self, id: ProtocolId) -> Result<()> {
        self.with_lcp(|lcp, link| lcp.protocol_up(link, id))
    }

    pub fn protocol_up_failed(&self, id: ProtocolId) -> Result<()> {
        self.with_lcp(|lcp, link| lcp.protocol_up_failed(link, id))
    }

    pub fn protocol_down(&self, id: ProtocolId) -> Result<()> {
        self.with_lcp(|lcp, link| lcp.protocol_down(link, id))
    }

    pub fn request_local_authentication(&self) {
        self.with_lcp(|lcp, link| lcp.request_authentication(link, Side::Local));
    }

    pub fn accept_local_authentication(&self, name: Option<&str>) {
        self.with_lcp(|lcp, link| lcp.accept_authentication(link, Side::Local, name));
    }

    pub fn deny_local_authentication(&self, name: Option<&str>) {
        self.with_lcp(|lcp, link| lcp.deny_authentication(link, Side::Local, name));
    }

    pub fn request_peer_authentication(&self) {
        self.with_lcp(|lcp, link| lcp.request_authentication(link, Side::Peer));
    }

    pub fn accept_peer_authentication(&self, name: Option<&str>) {
        self.with_lcp(|lcp, link| lcp.accept_authentication(link, Side::Peer, name));
    }

    pub fn deny_peer_authentication(&self, name: Option<&str>) {
        self.with_lcp(|lcp, link| lcp.deny_authentication(link, Side::Peer, name));
    }
}
