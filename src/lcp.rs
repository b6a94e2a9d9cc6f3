//! LCP automaton - RFC 1661 section 4.
//!
//! One method per event. Every method runs to completion, acting on the
//! collaborators passed in through a [`Link`]; nothing blocks and nothing
//! panics. Events the transition table does not allow in the current state
//! are logged and otherwise ignored.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::auth::{AuthenticationGate, AuthenticationStatus, Side};
use crate::counter::{Identifier, NegotiationCounter};
use crate::option::{OptionHandlers, RequestVerdict};
use crate::packet::{Code, ConfigurePacket, Packet, LCP_PROTOCOL};
use crate::protocol::{ProtocolId, ProtocolRegistry, ProtocolStatus};
use crate::timer::RetryTimer;
use crate::{Config, Device, Error, Event, Listener, Phase, Report, Result, State};

/// Collaborators of the state machine while it handles one event.
pub struct Link<'a> {
    pub device: &'a mut dyn Device,
    pub protocols: &'a mut ProtocolRegistry,
    pub options: &'a mut OptionHandlers,
    pub listener: &'a mut dyn Listener,
}

#[derive(Clone, Copy, Debug, Default)]
struct Identifiers {
    request: Identifier,
    terminate: Identifier,
    echo: Identifier,
    // Code-Reject, Protocol-Reject, Discard-Request, unsolicited Terminate-Ack
    other: Identifier,
}

fn new_magic_number() -> u32 {
    loop {
        let magic = rand::random::<u32>();
        if magic != 0 {
            return magic;
        }
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: State,
    phase: Phase,
    config: Config,

    request_counter: NegotiationCounter,
    terminate_counter: NegotiationCounter,
    nak_counter: NegotiationCounter,
    timer: RetryTimer,
    ids: Identifiers,

    magic_number: u32,
    auth: AuthenticationGate,
    last_report: Option<Report>,
    // Why the carrier went away, until the interface picks it up.
    ended: Option<Report>,
}

impl StateMachine {
    pub fn new(config: Config) -> Self {
        Self {
            state: State::default(),
            phase: Phase::default(),
            request_counter: NegotiationCounter::new(config.max_request),
            terminate_counter: NegotiationCounter::new(config.max_terminate),
            nak_counter: NegotiationCounter::new(config.max_nak),
            timer: RetryTimer::default(),
            ids: Identifiers::default(),
            magic_number: new_magic_number(),
            auth: AuthenticationGate::default(),
            last_report: None,
            ended: None,
            config,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn magic_number(&self) -> u32 {
        self.magic_number
    }

    pub fn request_counter(&self) -> NegotiationCounter {
        self.request_counter
    }

    pub fn terminate_counter(&self) -> NegotiationCounter {
        self.terminate_counter
    }

    pub fn nak_counter(&self) -> NegotiationCounter {
        self.nak_counter
    }

    pub fn timer(&self) -> &RetryTimer {
        &self.timer
    }

    /// Identifier of the last Configure-Request we sent.
    pub fn last_request_id(&self) -> Option<u8> {
        self.ids.request.last()
    }

    /// Identifier of the last Terminate-Request we sent.
    pub fn last_terminate_id(&self) -> Option<u8> {
        self.ids.terminate.last()
    }

    /// Identifier of the last Echo-Request we sent.
    pub fn last_echo_id(&self) -> Option<u8> {
        self.ids.echo.last()
    }

    pub fn authentication(&self) -> &AuthenticationGate {
        &self.auth
    }

    pub fn authentication_status(&self, side: Side) -> AuthenticationStatus {
        self.auth.status(side)
    }

    pub fn last_report(&self) -> Option<Report> {
        self.last_report
    }

    /// Takes the report of the last carrier loss or device failure, if any
    /// happened since the previous call.
    pub fn take_ended(&mut self) -> Option<Report> {
        self.ended.take()
    }

    fn new_state(&mut self, link: &mut Link, next: State) {
        if next.stops_timer() {
            self.timer.cancel();
        }

        let old = self.state;
        if old == next {
            return;
        }

        if old == State::Opened {
            link.options.reset();
        }

        info!("lcp state {:?} -> {:?}", old, next);

        self.state = next;
        link.listener.state_changed(old, next);
    }

    fn new_phase(&mut self, link: &mut Link, next: Phase) {
        let old = self.phase;
        if old == next {
            return;
        }

        info!("lcp phase {:?} -> {:?}", old, next);

        self.phase = next;
        link.listener.phase_changed(old, next);

        if next == Phase::Established {
            self.report(link, Report::UpSuccessful);
        }
    }

    fn report(&mut self, link: &mut Link, report: Report) {
        info!("report {:?}", report);

        self.last_report = Some(report);
        link.listener.report(report);
    }

    fn illegal_event(&self, event: Event) {
        warn!(
            "illegal event {:?} in state {:?}, phase {:?}",
            event, self.state, self.phase
        );
    }

    fn send(&mut self, link: &mut Link, packet: Packet) {
        if let Err(e) = link.device.send(LCP_PROTOCOL, &packet.encode()) {
            warn!(
                "can't send lcp code {} id {}: {}",
                packet.code, packet.identifier, e
            );
        }
    }

    // Administrative events.

    /// The administrative Open event.
    pub fn open(&mut self, link: &mut Link) {
        debug!("open in state {:?}, phase {:?}", self.state, self.phase);

        match self.state {
            State::Initial => {
                self.report(link, Report::GoingUp);
                self.new_state(link, State::Starting);
                self.this_layer_started(link);
            }
            State::Closed => {
                self.start_attempt(link);
                self.new_state(link, State::RequestSent);
                self.new_phase(link, Phase::Establishment);
                self.initialize_restart_count();
                self.send_configure_request(link);
            }
            State::Closing => self.new_state(link, State::Stopping),
            State::Starting
            | State::Stopped
            | State::Stopping
            | State::RequestSent
            | State::AckReceived
            | State::AckSent
            | State::Opened => {}
        }
    }

    /// The administrative Close event. Safe in every state.
    pub fn close(&mut self, link: &mut Link) {
        debug!("close in state {:?}, phase {:?}", self.state, self.phase);

        match self.state {
            State::Initial | State::Closed | State::Closing => {}
            State::Starting => {
                self.new_state(link, State::Initial);
                self.new_phase(link, Phase::Down);
                self.this_layer_finished(link);
            }
            State::Stopped => self.new_state(link, State::Closed),
            State::Stopping => self.new_state(link, State::Closing),
            State::RequestSent | State::AckReceived | State::AckSent | State::Opened => {
                let was_opened = self.state == State::Opened;

                self.new_state(link, State::Closing);
                if was_opened {
                    self.this_layer_down(link);
                }
                self.new_phase(link, Phase::Termination);
                self.initialize_restart_count();
                self.send_terminate_request(link);
            }
        }
    }

    /// Renegotiates the link. Returns `false` if there is nothing to
    /// renegotiate.
    pub fn reconfigure(&mut self, link: &mut Link) -> bool {
        match self.state {
            State::RequestSent | State::AckReceived | State::AckSent | State::Opened => {
                let was_opened = self.state == State::Opened;

                self.new_state(link, State::RequestSent);
                if was_opened {
                    self.this_layer_down(link);
                }
                self.new_phase(link, Phase::Establishment);
                link.options.reset();
                self.initialize_restart_count();
                self.send_configure_request(link);

                true
            }
            _ => false,
        }
    }

    // Lower layer events.

    /// The device established the carrier.
    pub fn lower_up(&mut self, link: &mut Link) {
        debug!("lower up in state {:?}, phase {:?}", self.state, self.phase);

        match self.state {
            State::Initial => self.new_state(link, State::Closed),
            State::Starting => {
                self.new_state(link, State::RequestSent);
                self.new_phase(link, Phase::Establishment);
                self.initialize_restart_count();
                self.send_configure_request(link);
            }
            _ => self.illegal_event(Event::Up),
        }
    }

    /// The device lost or dropped the carrier.
    pub fn lower_down(&mut self, link: &mut Link) {
        debug!("lower down in state {:?}, phase {:?}", self.state, self.phase);

        match self.state {
            State::Initial | State::Starting => {
                self.illegal_event(Event::Down);
                return;
            }
            State::Closed | State::Closing => self.new_state(link, State::Initial),
            State::Stopped
            | State::Stopping
            | State::RequestSent
            | State::AckReceived
            | State::AckSent => self.new_state(link, State::Starting),
            State::Opened => {
                self.new_state(link, State::Starting);
                self.this_layer_down(link);
            }
        }

        if self.phase > Phase::Termination {
            self.new_phase(link, Phase::Termination);
        }
        self.new_phase(link, Phase::Down);
        link.protocols.down_protocols();

        let report = if self.state != State::Starting {
            Report::DownSuccessful
        } else if self.auth.has_failed() || self.auth.is_pending() {
            Report::AuthenticationFailed
        } else {
            Report::ConnectionLost
        };
        self.report(link, report);
        self.ended = Some(report);

        self.auth.reset();
    }

    /// The device could not establish the carrier.
    pub fn lower_up_failed(&mut self, link: &mut Link) {
        debug!("lower up failed in state {:?}", self.state);

        match self.state {
            State::Starting => {
                self.report(link, Report::DeviceUpFailed);
                self.ended = Some(Report::DeviceUpFailed);
                self.new_state(link, State::Initial);
                self.new_phase(link, Phase::Down);
            }
            _ => self.illegal_event(Event::UpFailed),
        }
    }

    /// Starts a new connection attempt after the carrier went away. From
    /// Initial this is the Open event, from Starting the device is asked to
    /// come up again. Returns false in any other state.
    pub fn redial(&mut self, link: &mut Link) -> bool {
        debug!("redial in state {:?}, phase {:?}", self.state, self.phase);

        match self.state {
            State::Initial => self.open(link),
            State::Starting if self.phase == Phase::Down => {
                self.report(link, Report::GoingUp);
                self.this_layer_started(link);
            }
            _ => return false,
        }

        true
    }

    // Timer events.

    /// Expires the pending restart timer now. No-op if it is not armed.
    pub fn timer_expired(&mut self, link: &mut Link) {
        if self.timer.fire_now() {
            self.timeout(link);
        }
    }

    /// Expires the restart timer if its deadline has passed.
    pub fn pulse(&mut self, link: &mut Link, now: Instant) {
        if self.timer.fire(now) {
            self.timeout(link);
        }
    }

    fn timeout(&mut self, link: &mut Link) {
        let counter = if self.state.is_terminating() {
            self.terminate_counter
        } else if self.state.is_negotiating() {
            self.request_counter
        } else {
            self.illegal_event(Event::TimeoutGood);
            return;
        };

        if counter.is_exhausted() {
            self.timeout_bad(link);
        } else {
            self.timeout_good(link);
        }
    }

    fn timeout_good(&mut self, link: &mut Link) {
        debug!("TO+ in state {:?}", self.state);

        match self.state {
            State::Closing | State::Stopping => self.send_terminate_request(link),
            State::AckReceived => {
                self.new_state(link, State::RequestSent);
                self.send_configure_request(link);
            }
            State::RequestSent | State::AckSent => {
                self.send_configure_request(link);
            }
            _ => self.illegal_event(Event::TimeoutGood),
        }
    }

    fn timeout_bad(&mut self, link: &mut Link) {
        debug!("TO- in state {:?}", self.state);

        match self.state {
            State::Closing => {
                self.new_state(link, State::Closed);
                self.new_phase(link, Phase::Termination);
                self.this_layer_finished(link);
            }
            State::Stopping => {
                self.new_state(link, State::Stopped);
                self.new_phase(link, Phase::Termination);
                self.this_layer_finished(link);
            }
            State::RequestSent | State::AckReceived | State::AckSent => {
                self.new_state(link, State::Closed);
                self.new_phase(link, Phase::Termination);
                self.report(link, Report::NegotiationFailed);
                self.this_layer_finished(link);
            }
            _ => self.illegal_event(Event::TimeoutBad),
        }
    }

    // Packet events.

    /// Decodes one LCP packet and feeds it to the automaton.
    ///
    /// A Configure-Request the option handlers consider corrupt closes the
    /// connection and returns the handler error.
    pub fn receive(&mut self, link: &mut Link, buf: &[u8]) -> Result<()> {
        let packet = Packet::decode(buf)?;

        match packet.kind() {
            Some(Code::ConfigureRequest) => {
                let request = ConfigurePacket::parse(&packet)?;
                debug!(
                    " <- lcp configure-request {}, {} options",
                    request.identifier(),
                    request.len()
                );

                if self.state.is_lower_down() {
                    self.illegal_event(Event::ConfigureRequestGood);
                    return Ok(());
                }

                self.ids.request.avoid(request.identifier());

                match self.evaluate_request(link, request) {
                    Ok(verdict) => self.receive_configure_request(link, verdict),
                    Err(e) => {
                        warn!("corrupt configure-request: {}", e);
                        self.close(link);
                        return Err(e);
                    }
                }
            }
            Some(Code::ConfigureAck) => {
                let ack = ConfigurePacket::parse(&packet)?;
                self.receive_configure_ack(link, &ack);
            }
            Some(Code::ConfigureNak | Code::ConfigureReject) => {
                let nak = ConfigurePacket::parse(&packet)?;
                self.receive_configure_nak(link, &nak);
            }
            Some(Code::TerminateRequest) => self.receive_terminate_request(link, &packet),
            Some(Code::TerminateAck) => self.receive_terminate_ack(link, &packet),
            Some(Code::CodeReject | Code::ProtocolReject) => self.receive_reject(link, &packet),
            Some(Code::EchoRequest | Code::EchoReply | Code::DiscardRequest) => {
                self.receive_echo_or_discard(link, &packet)
            }
            None => self.receive_unknown_code(link, &packet),
        }

        Ok(())
    }

    /// Asks the option handlers how to answer a Configure-Request.
    ///
    /// Once the nak budget is exhausted, options that would be naked are
    /// rejected instead.
    pub fn evaluate_request(
        &mut self,
        link: &mut Link,
        request: ConfigurePacket,
    ) -> Result<RequestVerdict> {
        let may_nak = !self.nak_counter.is_exhausted();
        let verdict = link.options.evaluate(&request, may_nak)?;

        if let RequestVerdict::Nak(nak) = &verdict {
            if !may_nak {
                let mut reject =
                    ConfigurePacket::new(Code::ConfigureReject, request.identifier());
                for item in request.items() {
                    if nak.item(item.kind).is_some() {
                        reject.add_item(item.clone());
                    }
                }

                if !reject.is_empty() {
                    return Ok(RequestVerdict::Reject(reject));
                }
            }
        }

        Ok(verdict)
    }

    /// RCR+ or RCR-, depending on the verdict.
    pub fn receive_configure_request(&mut self, link: &mut Link, verdict: RequestVerdict) {
        match verdict {
            RequestVerdict::Acceptable(request) => self.rcr_good(link, request),
            RequestVerdict::Nak(response) | RequestVerdict::Reject(response) => {
                self.rcr_bad(link, response)
            }
        }
    }

    fn rcr_good(&mut self, link: &mut Link, request: ConfigurePacket) {
        match self.state {
            State::Initial | State::Starting => self.illegal_event(Event::ConfigureRequestGood),
            State::Closed => self.send_terminate_ack(link, None),
            State::Stopped => {
                self.start_attempt(link);
                self.new_state(link, State::AckSent);
                self.new_phase(link, Phase::Establishment);
                self.initialize_restart_count();
                if self.send_configure_request(link) {
                    self.send_configure_ack(link, request);
                }
            }
            State::Closing | State::Stopping => {}
            State::RequestSent => {
                self.new_state(link, State::AckSent);
                self.send_configure_ack(link, request);
            }
            State::AckReceived => {
                self.new_state(link, State::Opened);
                self.send_configure_ack(link, request);
                self.this_layer_up(link);
            }
            State::AckSent => self.send_configure_ack(link, request),
            State::Opened => {
                self.new_state(link, State::AckSent);
                self.this_layer_down(link);
                self.new_phase(link, Phase::Establishment);
                if self.send_configure_request(link) {
                    self.send_configure_ack(link, request);
                }
            }
        }
    }

    fn rcr_bad(&mut self, link: &mut Link, response: ConfigurePacket) {
        match self.state {
            State::Initial | State::Starting => self.illegal_event(Event::ConfigureRequestBad),
            State::Closed => self.send_terminate_ack(link, None),
            State::Stopped => {
                self.start_attempt(link);
                self.new_state(link, State::RequestSent);
                self.new_phase(link, Phase::Establishment);
                self.initialize_restart_count();
                if self.send_configure_request(link) {
                    self.send_configure_nak(link, response);
                }
            }
            State::Closing | State::Stopping => {}
            State::RequestSent | State::AckReceived => self.send_configure_nak(link, response),
            State::AckSent => {
                self.new_state(link, State::RequestSent);
                self.send_configure_nak(link, response);
            }
            State::Opened => {
                self.new_state(link, State::RequestSent);
                self.this_layer_down(link);
                self.new_phase(link, Phase::Establishment);
                if self.send_configure_request(link) {
                    self.send_configure_nak(link, response);
                }
            }
        }
    }

    /// RCA. Acks that do not answer our last request are dropped.
    pub fn receive_configure_ack(&mut self, link: &mut Link, ack: &ConfigurePacket) {
        if !self.ids.request.matches(ack.identifier()) {
            warn!(" <- unexpected lcp configure-ack {}", ack.identifier());
            return;
        }

        debug!(" <- lcp configure-ack {}", ack.identifier());

        match self.state {
            State::Initial | State::Starting => {
                self.illegal_event(Event::ConfigureAck);
                return;
            }
            State::Closed | State::Stopped | State::Closing | State::Stopping => {}
            State::RequestSent | State::AckReceived | State::AckSent | State::Opened => {
                if let Err(e) = link.options.parse_ack(ack) {
                    warn!("bad configure-ack {}: {}", ack.identifier(), e);
                    self.close(link);
                    return;
                }
            }
        }

        match self.state {
            State::Closed | State::Stopped => self.send_terminate_ack(link, None),
            State::RequestSent => {
                self.new_state(link, State::AckReceived);
                self.initialize_restart_count();
            }
            State::AckReceived => {
                self.new_state(link, State::RequestSent);
                self.send_configure_request(link);
            }
            State::AckSent => {
                self.new_state(link, State::Opened);
                self.initialize_restart_count();
                self.this_layer_up(link);
            }
            State::Opened => {
                self.new_state(link, State::RequestSent);
                self.this_layer_down(link);
                self.new_phase(link, Phase::Establishment);
                self.send_configure_request(link);
            }
            State::Initial | State::Starting | State::Closing | State::Stopping => {}
        }
    }

    /// RCN, for a Configure-Nak or Configure-Reject. Replies that do not
    /// answer our last request are dropped.
    pub fn receive_configure_nak(&mut self, link: &mut Link, packet: &ConfigurePacket) {
        if !self.ids.request.matches(packet.identifier()) {
            warn!(
                " <- unexpected lcp {:?} {}",
                packet.code(),
                packet.identifier()
            );
            return;
        }

        debug!(" <- lcp {:?} {}", packet.code(), packet.identifier());

        match self.state {
            State::Initial | State::Starting => {
                self.illegal_event(Event::ConfigureNak);
                return;
            }
            State::Closed | State::Stopped | State::Closing | State::Stopping => {}
            State::RequestSent | State::AckReceived | State::AckSent | State::Opened => {
                if let Err(e) = link.options.parse_nak_or_reject(packet) {
                    warn!("bad {:?} {}: {}", packet.code(), packet.identifier(), e);
                    self.close(link);
                    return;
                }
            }
        }

        match self.state {
            State::Closed | State::Stopped => self.send_terminate_ack(link, None),
            State::RequestSent | State::AckSent => {
                self.initialize_restart_count();
                self.send_configure_request(link);
            }
            State::AckReceived => {
                self.new_state(link, State::RequestSent);
                self.send_configure_request(link);
            }
            State::Opened => {
                self.new_state(link, State::RequestSent);
                self.this_layer_down(link);
                self.new_phase(link, Phase::Establishment);
                self.send_configure_request(link);
            }
            State::Initial | State::Starting | State::Closing | State::Stopping => {}
        }
    }

    /// RTR.
    pub fn receive_terminate_request(&mut self, link: &mut Link, packet: &Packet) {
        debug!(" <- lcp terminate-request {}", packet.identifier);

        self.ids.request.avoid(packet.identifier);

        if self.state.is_lower_down() {
            self.illegal_event(Event::TerminateRequest);
            return;
        }

        self.auth.reset();

        match self.state {
            State::Initial | State::Starting => {}
            State::Closed
            | State::Stopped
            | State::Closing
            | State::Stopping
            | State::RequestSent => self.send_terminate_ack(link, Some(packet)),
            State::AckReceived | State::AckSent => {
                self.new_state(link, State::RequestSent);
                self.send_terminate_ack(link, Some(packet));
            }
            State::Opened => {
                self.new_state(link, State::Stopping);
                self.this_layer_down(link);
                self.zero_restart_count();
                self.send_terminate_ack(link, Some(packet));
            }
        }
    }

    /// RTA. Acks that do not answer our last Terminate-Request are dropped.
    pub fn receive_terminate_ack(&mut self, link: &mut Link, packet: &Packet) {
        if !self.ids.terminate.matches(packet.identifier) {
            warn!(" <- unexpected lcp terminate-ack {}", packet.identifier);
            return;
        }

        debug!(" <- lcp terminate-ack {}", packet.identifier);

        match self.state {
            State::Initial | State::Starting => self.illegal_event(Event::TerminateAck),
            State::Closed | State::Stopped | State::RequestSent | State::AckSent => {}
            State::Closing => {
                self.new_state(link, State::Closed);
                self.this_layer_finished(link);
            }
            State::Stopping => {
                self.new_state(link, State::Stopped);
                self.this_layer_finished(link);
            }
            State::AckReceived => self.new_state(link, State::RequestSent),
            State::Opened => {
                self.new_state(link, State::RequestSent);
                self.this_layer_down(link);
                self.new_phase(link, Phase::Establishment);
                self.send_configure_request(link);
            }
        }
    }

    /// RUC. Answered with a Code-Reject, the state never changes.
    pub fn receive_unknown_code(&mut self, link: &mut Link, packet: &Packet) {
        debug!(" <- lcp unknown code {} {}", packet.code, packet.identifier);

        if self.state.is_lower_down() {
            self.illegal_event(Event::UnknownCode);
            return;
        }

        let id = self.ids.other.next_id();
        debug!(" -> lcp code-reject {}, code {}", id, packet.code);

        let reject = Packet::code_reject(id, &packet.encode(), self.config.mru as usize);
        self.send(link, reject);
    }

    /// A packet for a PPP protocol nobody handles. Answered with a
    /// Protocol-Reject, the state never changes.
    pub fn reject_protocol(&mut self, link: &mut Link, protocol: u16, packet: &[u8]) {
        if self.state.is_lower_down() {
            self.illegal_event(Event::UnknownCode);
            return;
        }

        let id = self.ids.other.next_id();
        debug!(" -> lcp protocol-reject {}, protocol {:#06x}", id, protocol);

        let reject = Packet::protocol_reject(id, protocol, packet, self.config.mru as usize);
        self.send(link, reject);
    }

    /// Classifies a Code-Reject or Protocol-Reject as RXJ+ or RXJ-.
    pub fn receive_reject(&mut self, link: &mut Link, packet: &Packet) {
        if let Some(code) = packet.rejected_code() {
            debug!(" <- lcp code-reject {}, code {}", packet.identifier, code);
            self.receive_code_reject(link, !Code::is_required(code));
        } else if let Some(protocol) = packet.rejected_protocol() {
            debug!(
                " <- lcp protocol-reject {}, protocol {:#06x}",
                packet.identifier, protocol
            );

            if protocol == LCP_PROTOCOL {
                self.receive_code_reject(link, false);
            } else {
                link.protocols.disable_number(protocol);
                self.receive_code_reject(link, true);
            }
        } else {
            warn!(" <- malformed lcp reject {}", packet.identifier);
        }
    }

    /// RXJ+ (`good`) or RXJ-.
    pub fn receive_code_reject(&mut self, link: &mut Link, good: bool) {
        if good {
            match self.state {
                State::Initial | State::Starting => self.illegal_event(Event::CodeRejectGood),
                State::AckReceived => self.new_state(link, State::RequestSent),
                _ => {}
            }

            return;
        }

        match self.state {
            State::Initial | State::Starting => self.illegal_event(Event::CodeRejectBad),
            State::Closed | State::Stopped => self.this_layer_finished(link),
            State::Closing => {
                self.new_state(link, State::Closed);
                self.this_layer_finished(link);
            }
            State::Stopping => {
                self.new_state(link, State::Stopped);
                self.this_layer_finished(link);
            }
            State::RequestSent | State::AckReceived | State::AckSent => {
                self.new_state(link, State::Stopped);
                self.new_phase(link, Phase::Termination);
                self.this_layer_finished(link);
            }
            State::Opened => {
                self.new_state(link, State::Stopping);
                self.this_layer_down(link);
                self.initialize_restart_count();
                self.send_terminate_request(link);
            }
        }
    }

    /// RXR: Echo-Request, Echo-Reply or Discard-Request.
    pub fn receive_echo_or_discard(&mut self, link: &mut Link, packet: &Packet) {
        match self.state {
            State::Initial | State::Starting => self.illegal_event(Event::EchoOrDiscard),
            State::Opened => match packet.kind() {
                Some(Code::EchoRequest) => {
                    if packet.magic_number() == Some(self.magic_number) {
                        warn!(
                            " <- lcp echo-request {} carries our magic number, link looped back",
                            packet.identifier
                        );
                    }

                    debug!(" <- lcp echo-request {}", packet.identifier);
                    debug!(" -> lcp echo-reply {}", packet.identifier);

                    let reply = Packet::echo_reply(packet, self.magic_number);
                    self.send(link, reply);
                }
                Some(Code::EchoReply) => {
                    if self.ids.echo.matches(packet.identifier) {
                        debug!(" <- lcp echo-reply {}", packet.identifier);
                    } else {
                        warn!(" <- unexpected lcp echo-reply {}", packet.identifier);
                    }
                }
                _ => debug!(" <- lcp discard-request {}", packet.identifier),
            },
            _ => {}
        }
    }

    /// Sends an Echo-Request. Only possible while opened.
    pub fn send_echo_request(&mut self, link: &mut Link) -> bool {
        if self.state != State::Opened {
            return false;
        }

        let id = self.ids.echo.next_id();
        debug!(" -> lcp echo-request {}", id);

        self.send(link, Packet::echo_request(id, self.magic_number));
        true
    }

    /// Sends a Discard-Request. Only possible while opened.
    pub fn send_discard_request(&mut self, link: &mut Link) -> bool {
        if self.state != State::Opened {
            return false;
        }

        let id = self.ids.other.next_id();
        debug!(" -> lcp discard-request {}", id);

        self.send(link, Packet::discard_request(id, self.magic_number));
        true
    }

    // Protocol readiness.

    /// A protocol finished coming up.
    ///
    /// Only a protocol that is still going up while the connection is
    /// activating can be marked up. A late notification after the
    /// protocols were downed is ignored.
    pub fn protocol_up(&mut self, link: &mut Link, id: ProtocolId) -> Result<()> {
        let status = link
            .protocols
            .status(id)
            .ok_or(Error::NoSuchProtocol(id.index()))?;

        if status != ProtocolStatus::GoingUp || !self.phase.is_activating() {
            warn!(
                "ignoring late up of protocol {} ({:?}) in phase {:?}",
                id.index(),
                status,
                self.phase
            );
            return Ok(());
        }

        link.protocols.set_status(id, ProtocolStatus::Up)?;
        self.bring_protocols_up(link);

        Ok(())
    }

    /// A protocol could not come up. Closes the connection unless the
    /// protocol is not important or the connection is no longer
    /// activating.
    pub fn protocol_up_failed(&mut self, link: &mut Link, id: ProtocolId) -> Result<()> {
        let old = link.protocols.set_status(id, ProtocolStatus::Down)?;
        if old == ProtocolStatus::Down {
            warn!("ignoring up failure of protocol {}, already down", id.index());
            return Ok(());
        }

        if self.phase.is_activating() {
            self.up_failed(link, id);
        }

        Ok(())
    }

    /// A protocol went down on its own.
    pub fn protocol_down(&mut self, link: &mut Link, id: ProtocolId) -> Result<()> {
        link.protocols.set_status(id, ProtocolStatus::Down)?;
        Ok(())
    }

    fn up_failed(&mut self, link: &mut Link, id: ProtocolId) {
        let not_important = link
            .protocols
            .flags(id)
            .map(|flags| flags.not_important)
            .unwrap_or(false);

        if not_important {
            info!("protocol {} failed to come up, not important", id.index());
            return;
        }

        warn!("protocol {} failed to come up, closing", id.index());
        self.close(link);
    }

    // Authentication.

    pub fn request_authentication(&mut self, link: &mut Link, side: Side) {
        debug!("{:?} authentication requested", side);

        self.auth.request(side);
        self.report(link, Report::AuthenticationRequested);
    }

    pub fn accept_authentication(&mut self, link: &mut Link, side: Side, name: Option<&str>) {
        if !self.auth.accept(side, name) {
            return;
        }

        info!("{:?} authentication accepted, name {:?}", side, name);

        if self.phase == Phase::Authentication {
            self.bring_protocols_up(link);
        }
    }

    /// Marks the side as failed and terminates the connection.
    pub fn deny_authentication(&mut self, link: &mut Link, side: Side, name: Option<&str>) {
        if !self.auth.deny(side, name) {
            return;
        }

        warn!("{:?} authentication denied, name {:?}", side, name);

        self.report(link, Report::AuthenticationFailed);
        self.close(link);
    }

    // Actions.

    fn this_layer_up(&mut self, link: &mut Link) {
        if self.phase != Phase::Establishment {
            return;
        }

        info!("lcp up, magic number {:#010x}", self.magic_number);

        self.new_phase(link, Phase::Authentication);
        self.bring_protocols_up(link);
    }

    fn this_layer_down(&mut self, link: &mut Link) {
        if self.phase > Phase::Termination {
            self.new_phase(link, Phase::Termination);
        }

        let count = link.protocols.down_protocols();
        info!("lcp down, {} protocols downed", count);
    }

    fn this_layer_started(&mut self, link: &mut Link) {
        self.start_attempt(link);
        self.new_phase(link, Phase::Establishment);

        if !link.device.up() {
            warn!("device {} refused to come up", link.device.name());
            self.lower_up_failed(link);
        }
    }

    fn this_layer_finished(&mut self, link: &mut Link) {
        debug!("lcp finished, taking device {} down", link.device.name());
        link.device.down();
    }

    /// Begins a new connection attempt with a fresh magic number.
    fn start_attempt(&mut self, link: &mut Link) {
        self.magic_number = new_magic_number();
        self.auth.reset();
        link.options.reset();
    }

    fn initialize_restart_count(&mut self) {
        self.request_counter.initialize();
        self.terminate_counter.initialize();
        self.nak_counter.initialize();
    }

    fn zero_restart_count(&mut self) {
        self.request_counter.zero();
        self.terminate_counter.zero();
        self.nak_counter.zero();

        self.timer.arm(self.config.restart_interval());
    }

    /// Returns false when no request could be built. The connection is
    /// closing then and the caller must not continue its action list.
    fn send_configure_request(&mut self, link: &mut Link) -> bool {
        if self.request_counter.consume() {
            debug!("configure-request budget exhausted");
        }
        self.timer.arm(self.config.restart_interval());

        let id = self.ids.request.next_id();
        let mut request = ConfigurePacket::new(Code::ConfigureRequest, id);
        if let Err(e) = link.options.add_to_request(&mut request) {
            warn!("can't build configure-request {}: {}", id, e);
            self.close(link);
            return false;
        }

        debug!(
            " -> lcp configure-request {}, {} options, {}/{} left",
            id,
            request.len(),
            self.request_counter.remaining(),
            self.request_counter.max()
        );

        self.send(link, request.to_packet());
        true
    }

    fn send_configure_ack(&mut self, link: &mut Link, request: ConfigurePacket) {
        let mut ack = request;
        ack.set_code(Code::ConfigureAck);

        if let Err(e) = link.options.sending_ack(&ack) {
            warn!("can't ack configure-request {}: {}", ack.identifier(), e);
            self.close(link);
            return;
        }

        debug!(" -> lcp configure-ack {}", ack.identifier());
        self.send(link, ack.to_packet());
    }

    /// Sends the response as built by the option handlers. Turning naks
    /// into rejects once the nak budget is spent happens while evaluating
    /// the request, where the peer's original values are still known.
    fn send_configure_nak(&mut self, link: &mut Link, response: ConfigurePacket) {
        if response.code() == Code::ConfigureNak && self.nak_counter.consume() {
            debug!("configure-nak budget exhausted");
        }

        debug!(
            " -> lcp {:?} {}, {} options",
            response.code(),
            response.identifier(),
            response.len()
        );
        self.send(link, response.to_packet());
    }

    fn send_terminate_request(&mut self, link: &mut Link) {
        if self.terminate_counter.consume() {
            debug!("terminate-request budget exhausted");
        }
        self.timer.arm(self.config.restart_interval());

        let id = self.ids.terminate.next_id();
        debug!(
            " -> lcp terminate-request {}, {}/{} left",
            id,
            self.terminate_counter.remaining(),
            self.terminate_counter.max()
        );

        self.send(link, Packet::terminate_request(id));
    }

    fn send_terminate_ack(&mut self, link: &mut Link, request: Option<&Packet>) {
        let id = match request {
            Some(request) => request.identifier,
            None => self.ids.other.next_id(),
        };

        debug!(" -> lcp terminate-ack {}", id);
        self.send(link, Packet::terminate_ack(id));
    }

    /// Raises the phase as far as the protocols and the authentication
    /// gate allow.
    fn bring_protocols_up(&mut self, link: &mut Link) {
        while self.phase.is_activating() {
            let phase = self.phase;

            let result = link.protocols.bring_phase_up(phase);
            for id in result.failed {
                self.up_failed(link, id);
            }

            if self.phase != phase {
                return;
            }

            if result.waiting > 0 {
                debug!("phase {:?} waiting for {} protocols", phase, result.waiting);
                return;
            }

            if phase == Phase::Authentication && !self.auth.allows_network() {
                debug!("phase {:?} waiting for authentication", phase);
                return;
            }

            match phase.next() {
                Some(next) => self.new_phase(link, next),
                None => return,
            }
        }
    }
}
