#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rsdsl_lcp::packet::{Code, ConfigItem, ConfigurePacket, Packet, LCP_PROTOCOL};
use rsdsl_lcp::protocol::{Protocol, ProtocolFlags, ProtocolId, ProtocolStatus, Received};
use rsdsl_lcp::{
    Config, Device, Disposition, Error, Interface, Listener, Phase, Report, Result, State,
};

#[derive(Debug, Default)]
pub struct Wire {
    pub sent: Vec<(u16, Vec<u8>)>,
    pub ups: usize,
    pub downs: usize,
    pub carrier: bool,
    pub refuse_up: bool,
    pub broken: bool,
}

/// Device that records everything sent through it.
#[derive(Clone, Default)]
pub struct MockDevice(pub Arc<Mutex<Wire>>);

impl MockDevice {
    pub fn wire(&self) -> std::sync::MutexGuard<'_, Wire> {
        self.0.lock().expect("wire mutex is poisoned")
    }

    /// Removes and decodes the LCP packets sent so far.
    pub fn take_lcp(&self) -> Vec<Packet> {
        let sent = std::mem::take(&mut self.wire().sent);

        sent.into_iter()
            .filter(|(protocol, _)| *protocol == LCP_PROTOCOL)
            .map(|(_, buf)| Packet::decode(&buf).unwrap())
            .collect()
    }

    /// Removes the packets sent so far, whatever their protocol.
    pub fn take_all(&self) -> Vec<(u16, Vec<u8>)> {
        std::mem::take(&mut self.wire().sent)
    }

    /// Codes of the LCP packets sent so far, without removing them.
    pub fn lcp_codes(&self) -> Vec<u8> {
        self.wire()
            .sent
            .iter()
            .filter(|(protocol, _)| *protocol == LCP_PROTOCOL)
            .map(|(_, buf)| buf[0])
            .collect()
    }
}

impl Device for MockDevice {
    fn name(&self) -> &str {
        "mock0"
    }

    fn up(&mut self) -> bool {
        let mut wire = self.wire();
        wire.ups += 1;

        !wire.refuse_up
    }

    fn down(&mut self) {
        self.wire().downs += 1;
    }

    fn is_up(&self) -> bool {
        self.wire().carrier
    }

    fn send(&mut self, protocol: u16, packet: &[u8]) -> Result<()> {
        let mut wire = self.wire();
        if wire.broken {
            return Err(Error::Device("broken".into()));
        }

        wire.sent.push((protocol, packet.to_vec()));
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Note {
    State(State, State),
    Phase(Phase, Phase),
    Report(Report),
}

#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Note>>>);

impl Recorder {
    fn notes(&self) -> std::sync::MutexGuard<'_, Vec<Note>> {
        self.0.lock().expect("recorder mutex is poisoned")
    }

    pub fn clear(&self) {
        self.notes().clear();
    }

    pub fn states(&self) -> Vec<(State, State)> {
        self.notes()
            .iter()
            .filter_map(|note| match note {
                Note::State(old, new) => Some((*old, *new)),
                _ => None,
            })
            .collect()
    }

    pub fn phases(&self) -> Vec<(Phase, Phase)> {
        self.notes()
            .iter()
            .filter_map(|note| match note {
                Note::Phase(old, new) => Some((*old, *new)),
                _ => None,
            })
            .collect()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.notes()
            .iter()
            .filter_map(|note| match note {
                Note::Report(report) => Some(*report),
                _ => None,
            })
            .collect()
    }
}

impl Listener for Recorder {
    fn state_changed(&mut self, old: State, new: State) {
        self.notes().push(Note::State(old, new));
    }

    fn phase_changed(&mut self, old: Phase, new: Phase) {
        self.notes().push(Note::Phase(old, new));
    }

    fn report(&mut self, report: Report) {
        self.notes().push(Note::Report(report));
    }
}

#[derive(Debug, Default)]
pub struct Calls {
    pub ups: usize,
    pub downs: usize,
    pub received: Vec<Vec<u8>>,
}

pub struct MockProtocol {
    pub name: &'static str,
    pub number: u16,
    pub phase: Phase,
    pub flags: ProtocolFlags,
    pub up_status: ProtocolStatus,
    pub calls: Arc<Mutex<Calls>>,
}

impl MockProtocol {
    pub fn new(name: &'static str, number: u16, phase: Phase) -> Self {
        Self {
            name,
            number,
            phase,
            flags: ProtocolFlags::default(),
            up_status: ProtocolStatus::Up,
            calls: Arc::default(),
        }
    }

    pub fn going_up(mut self) -> Self {
        self.up_status = ProtocolStatus::GoingUp;
        self
    }

    pub fn failing(mut self) -> Self {
        self.up_status = ProtocolStatus::Down;
        self
    }

    pub fn not_important(mut self) -> Self {
        self.flags.not_important = true;
        self
    }

    pub fn always_allowed(mut self) -> Self {
        self.flags.always_allowed = true;
        self
    }
}

impl Protocol for MockProtocol {
    fn name(&self) -> &str {
        self.name
    }

    fn protocol_number(&self) -> u16 {
        self.number
    }

    fn activation_phase(&self) -> Phase {
        self.phase
    }

    fn flags(&self) -> ProtocolFlags {
        self.flags
    }

    fn up(&mut self) -> ProtocolStatus {
        self.calls.lock().unwrap().ups += 1;
        self.up_status
    }

    fn down(&mut self) {
        self.calls.lock().unwrap().downs += 1;
    }

    fn receive(&mut self, packet: &[u8]) -> Received {
        self.calls.lock().unwrap().received.push(packet.to_vec());

        if packet.first() == Some(&0xff) {
            Received::Reply(packet.to_vec())
        } else {
            Received::Handled
        }
    }
}

pub struct Harness {
    pub interface: Interface,
    pub device: MockDevice,
    pub recorder: Recorder,
}

impl Harness {
    pub fn new(config: Config) -> Self {
        let device = MockDevice::default();
        let recorder = Recorder::default();

        let interface = Interface::with_listener(
            "ppp0",
            config,
            Box::new(device.clone()),
            Box::new(recorder.clone()),
        );

        Self {
            interface,
            device,
            recorder,
        }
    }

    pub fn add(&self, protocol: MockProtocol) -> (ProtocolId, Arc<Mutex<Calls>>) {
        let calls = protocol.calls.clone();
        let id = self.interface.add_protocol(Box::new(protocol)).unwrap();

        (id, calls)
    }

    pub fn lower_up(&self) {
        self.device.wire().carrier = true;
        self.interface.lower_up();
    }

    pub fn lower_down(&self) {
        self.device.wire().carrier = false;
        self.interface.lower_down();
    }

    pub fn peer(&self, packet: Packet) -> Result<Disposition> {
        self.interface.receive(LCP_PROTOCOL, &packet.encode())
    }

    pub fn last_request(&self) -> ConfigurePacket {
        let id = self.interface.last_request_id().unwrap();
        ConfigurePacket::new(Code::ConfigureRequest, id)
    }

    /// Acks our last Configure-Request.
    pub fn peer_ack(&self) {
        let mut ack = self.last_request();
        ack.set_code(Code::ConfigureAck);

        self.peer(ack.to_packet()).unwrap();
    }

    /// Naks our last Configure-Request.
    pub fn peer_nak(&self, items: Vec<ConfigItem>) {
        let mut nak = self.last_request();
        nak.set_code(Code::ConfigureNak);
        for item in items {
            nak.add_item(item);
        }

        self.peer(nak.to_packet()).unwrap();
    }

    /// Sends a Configure-Request from the peer.
    pub fn peer_request(&self, id: u8, items: Vec<ConfigItem>) {
        let mut request = ConfigurePacket::new(Code::ConfigureRequest, id);
        for item in items {
            request.add_item(item);
        }

        self.peer(request.to_packet()).unwrap();
    }

    pub fn peer_terminate_request(&self, id: u8) {
        self.peer(Packet::terminate_request(id)).unwrap();
    }

    /// Acks our last Terminate-Request.
    pub fn peer_terminate_ack(&self) {
        let id = self.interface.last_terminate_id().unwrap();
        self.peer(Packet::terminate_ack(id)).unwrap();
    }

    /// Up, lower up and both Configure-Requests acked.
    pub fn open(&self) {
        self.interface.up();
        self.lower_up();
        self.peer_ack();
        self.peer_request(0x80, vec![]);

        assert_eq!(self.interface.state(), State::Opened);
    }

    /// Drives a fresh interface into `state`. Clears everything recorded.
    pub fn drive_to(&self, state: State) {
        match state {
            State::Initial => {}
            State::Starting => self.interface.up(),
            State::Closed => self.lower_up(),
            State::RequestSent => {
                self.interface.up();
                self.lower_up();
            }
            State::AckReceived => {
                self.drive_to(State::RequestSent);
                self.peer_ack();
            }
            State::AckSent => {
                self.drive_to(State::RequestSent);
                self.peer_request(0x80, vec![]);
            }
            State::Opened => self.open(),
            State::Closing => {
                self.open();
                self.interface.down();
            }
            State::Stopping => {
                self.open();
                self.peer_terminate_request(0x81);
            }
            State::Stopped => {
                self.drive_to(State::Stopping);
                self.interface.timer_expired();
            }
        }

        assert_eq!(self.interface.state(), state);

        self.device.take_all();
        self.recorder.clear();
    }
}

pub fn config_with_requests(max_request: u32) -> Config {
    Config {
        max_request,
        ..Config::default()
    }
}
