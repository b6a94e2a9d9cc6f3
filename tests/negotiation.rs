mod common;

use common::{config_with_requests, Harness, MockProtocol};

use rsdsl_lcp::option::MRU_OPTION;
use rsdsl_lcp::packet::{Code, ConfigItem, ConfigurePacket, Packet, LCP_PROTOCOL};
use rsdsl_lcp::{Config, Disposition, Error, Phase, Report, State};

#[test]
fn test_round_trip_from_closed() {
    let h = Harness::new(Config::default());
    h.drive_to(State::Closed);

    h.interface.up();
    h.peer_ack();
    h.peer_request(7, vec![]);

    assert_eq!(
        h.recorder.states(),
        vec![
            (State::Closed, State::RequestSent),
            (State::RequestSent, State::AckReceived),
            (State::AckReceived, State::Opened),
        ]
    );

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].kind(), Some(Code::ConfigureRequest));
    assert_eq!(sent[1].kind(), Some(Code::ConfigureAck));
    assert_eq!(sent[1].identifier, 7);

    assert_eq!(h.interface.phase(), Phase::Established);
    assert_eq!(h.interface.last_report(), Some(Report::UpSuccessful));
    assert!(!h.interface.is_timer_armed());
}

#[test]
fn test_open_from_initial_starts_device() {
    let h = Harness::new(Config::default());

    h.interface.up();
    assert_eq!(h.interface.state(), State::Starting);
    assert_eq!(h.interface.phase(), Phase::Establishment);
    assert_eq!(h.device.wire().ups, 1);
    assert_eq!(h.recorder.reports(), vec![Report::GoingUp]);

    h.lower_up();
    assert_eq!(h.interface.state(), State::RequestSent);
    assert!(h.interface.is_timer_armed());

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), Some(Code::ConfigureRequest));
    assert_eq!(Some(sent[0].identifier), h.interface.last_request_id());
}

#[test]
fn test_ack_before_request_from_peer() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    h.peer_request(3, vec![]);
    assert_eq!(h.interface.state(), State::AckSent);

    h.peer_ack();
    assert_eq!(h.interface.state(), State::Opened);
    assert_eq!(h.interface.phase(), Phase::Established);
}

#[test]
fn test_silent_peer_gives_up() {
    let h = Harness::new(config_with_requests(3));
    h.interface.up();
    h.lower_up();

    h.interface.timer_expired();
    h.interface.timer_expired();
    assert_eq!(h.interface.state(), State::RequestSent);

    h.interface.timer_expired();
    assert_eq!(h.interface.state(), State::Closed);
    assert_eq!(h.interface.phase(), Phase::Termination);
    assert!(h.recorder.reports().contains(&Report::NegotiationFailed));
    assert_eq!(h.device.wire().downs, 1);

    let requests = h
        .device
        .take_lcp()
        .into_iter()
        .filter(|packet| packet.kind() == Some(Code::ConfigureRequest))
        .count();
    assert_eq!(requests, 3);

    h.interface.timer_expired();
    h.interface.pulse();
    assert!(h.device.take_lcp().is_empty());
}

#[test]
fn test_retransmission_uses_fresh_identifier() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    let first = h.interface.last_request_id().unwrap();
    h.interface.timer_expired();
    let second = h.interface.last_request_id().unwrap();

    assert_ne!(first, second);

    let mut stale = ConfigurePacket::new(Code::ConfigureAck, first);
    stale.set_identifier(first);
    h.peer(stale.to_packet()).unwrap();
    assert_eq!(h.interface.state(), State::RequestSent);
}

#[test]
fn test_mismatched_ack_is_dropped() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    let id = h.interface.last_request_id().unwrap();
    let ack = ConfigurePacket::new(Code::ConfigureAck, id.wrapping_add(1));
    h.peer(ack.to_packet()).unwrap();

    assert_eq!(h.interface.state(), State::RequestSent);
    assert!(h.recorder.states().is_empty());
    assert!(h.device.take_lcp().is_empty());
}

#[test]
fn test_nak_resends_request() {
    let h = Harness::new(Config::default());
    h.drive_to(State::AckReceived);

    h.peer_nak(vec![]);
    assert_eq!(h.interface.state(), State::RequestSent);

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), Some(Code::ConfigureRequest));
}

#[test]
fn test_nak_in_request_sent_restarts_counter() {
    let h = Harness::new(config_with_requests(3));
    h.drive_to(State::RequestSent);

    h.interface.timer_expired();
    assert_eq!(h.interface.request_counter().remaining(), 1);

    h.peer_nak(vec![]);
    assert_eq!(h.interface.state(), State::RequestSent);
    assert_eq!(h.interface.request_counter().remaining(), 2);

    let sent = h.device.take_lcp();
    assert_eq!(sent.last().unwrap().kind(), Some(Code::ConfigureRequest));
}

#[test]
fn test_mru_follows_peer_nak() {
    let config = Config {
        mru: 1492,
        ..Config::default()
    };
    let h = Harness::new(config);
    h.drive_to(State::RequestSent);

    h.peer_nak(vec![ConfigItem::new(MRU_OPTION, 1480u16.to_be_bytes().to_vec())]);

    let sent = h.device.take_lcp();
    let request = ConfigurePacket::parse(sent.last().unwrap()).unwrap();
    assert_eq!(
        request.item(MRU_OPTION).unwrap().data,
        1480u16.to_be_bytes().to_vec()
    );
}

#[test]
fn test_small_peer_mru_is_naked() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    h.peer_request(9, vec![ConfigItem::new(MRU_OPTION, vec![0x02, 0x40])]);
    assert_eq!(h.interface.state(), State::RequestSent);

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);

    let nak = ConfigurePacket::parse(&sent[0]).unwrap();
    assert_eq!(nak.code(), Code::ConfigureNak);
    assert_eq!(nak.identifier(), 9);
    assert_eq!(
        nak.item(MRU_OPTION).unwrap().data,
        1492u16.to_be_bytes().to_vec()
    );
}

#[test]
fn test_nak_turns_into_reject_when_budget_exhausted() {
    let config = Config {
        max_nak: 2,
        ..Config::default()
    };
    let h = Harness::new(config);
    h.drive_to(State::RequestSent);

    let small = ConfigItem::new(MRU_OPTION, vec![0x02, 0x40]);
    for id in 1..=3 {
        h.peer_request(id, vec![small.clone()]);
    }

    let codes: Vec<Code> = h
        .device
        .take_lcp()
        .iter()
        .filter_map(|packet| packet.kind())
        .collect();
    assert_eq!(
        codes,
        vec![Code::ConfigureNak, Code::ConfigureNak, Code::ConfigureReject]
    );
    assert!(h.interface.nak_counter().is_exhausted());
}

#[test]
fn test_rejected_reply_carries_original_option() {
    let config = Config {
        max_nak: 0,
        ..Config::default()
    };
    let h = Harness::new(config);
    h.drive_to(State::RequestSent);

    h.peer_request(4, vec![ConfigItem::new(MRU_OPTION, vec![0x02, 0x40])]);

    let sent = h.device.take_lcp();
    let reject = ConfigurePacket::parse(&sent[0]).unwrap();
    assert_eq!(reject.code(), Code::ConfigureReject);
    assert_eq!(reject.item(MRU_OPTION).unwrap().data, vec![0x02, 0x40]);
}

#[test]
fn test_unknown_option_is_rejected() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    h.peer_request(5, vec![ConfigItem::new(42, vec![1, 2, 3])]);

    let sent = h.device.take_lcp();
    let reject = ConfigurePacket::parse(&sent[0]).unwrap();
    assert_eq!(reject.code(), Code::ConfigureReject);
    assert_eq!(reject.items(), &[ConfigItem::new(42, vec![1, 2, 3])]);
}

#[test]
fn test_corrupt_option_closes() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    let mut request = ConfigurePacket::new(Code::ConfigureRequest, 6);
    request.add_item(ConfigItem::new(MRU_OPTION, vec![0x05]));

    assert!(matches!(
        h.peer(request.to_packet()),
        Err(Error::BadOption { kind: 1, .. })
    ));
    assert_eq!(h.interface.state(), State::Closing);
}

#[test]
fn test_truncated_packet_is_an_error() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    assert!(matches!(
        h.interface.receive(LCP_PROTOCOL, &[1, 2]),
        Err(Error::PacketTooShort(2))
    ));
    assert_eq!(h.interface.state(), State::RequestSent);
}

#[test]
fn test_opened_renegotiates_on_configure_request() {
    let h = Harness::new(Config::default());
    let (_, calls) = h.add(MockProtocol::new("ipcp", 0x8021, Phase::Network));
    h.drive_to(State::Opened);

    h.peer_request(0x90, vec![]);

    assert_eq!(h.interface.state(), State::AckSent);
    assert_eq!(h.interface.phase(), Phase::Establishment);
    assert_eq!(calls.lock().unwrap().downs, 1);

    let codes: Vec<Code> = h
        .device
        .take_lcp()
        .iter()
        .filter_map(|packet| packet.kind())
        .collect();
    assert_eq!(codes, vec![Code::ConfigureRequest, Code::ConfigureAck]);

    assert_eq!(
        h.recorder.phases(),
        vec![
            (Phase::Established, Phase::Termination),
            (Phase::Termination, Phase::Establishment),
        ]
    );
}

#[test]
fn test_reconfigure() {
    let h = Harness::new(Config::default());
    assert!(!h.interface.reconfigure());

    h.drive_to(State::Opened);
    assert!(h.interface.reconfigure());
    assert_eq!(h.interface.state(), State::RequestSent);

    h.peer_ack();
    h.peer_request(0x91, vec![]);
    assert_eq!(h.interface.state(), State::Opened);
    assert_eq!(h.interface.phase(), Phase::Established);
}

#[test]
fn test_unknown_code_is_code_rejected() {
    let h = Harness::new(Config::default());
    h.drive_to(State::Opened);

    let unknown = Packet {
        code: 42,
        identifier: 1,
        data: vec![1, 2, 3],
    };
    h.peer(unknown.clone()).unwrap();

    assert_eq!(h.interface.state(), State::Opened);

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), Some(Code::CodeReject));
    assert_eq!(sent[0].data, unknown.encode());
}

#[test]
fn test_unknown_protocol_is_protocol_rejected() {
    let h = Harness::new(Config::default());
    h.drive_to(State::Opened);

    assert_eq!(
        h.interface.receive(0x8057, &[9, 9]).unwrap(),
        Disposition::Rejected
    );

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].rejected_protocol(), Some(0x8057));
    assert_eq!(&sent[0].data[2..], &[9, 9]);
}

#[test]
fn test_echo_request_is_answered() {
    let h = Harness::new(Config::default());
    h.drive_to(State::Opened);

    h.peer(Packet::echo_request(0x33, 0x1234_5678)).unwrap();

    let sent = h.device.take_lcp();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), Some(Code::EchoReply));
    assert_eq!(sent[0].identifier, 0x33);
    assert_eq!(sent[0].magic_number(), Some(h.interface.magic_number()));
}

#[test]
fn test_echo_ignored_while_negotiating() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    h.peer(Packet::echo_request(0x33, 0x1234_5678)).unwrap();

    assert!(h.device.take_lcp().is_empty());
    assert_eq!(h.interface.state(), State::RequestSent);
}

#[test]
fn test_send_echo_and_discard_request() {
    let h = Harness::new(Config::default());
    assert!(!h.interface.send_echo_request());

    h.drive_to(State::Opened);
    assert!(h.interface.send_echo_request());
    assert!(h.interface.send_discard_request());

    let sent = h.device.take_lcp();
    assert_eq!(sent[0].kind(), Some(Code::EchoRequest));
    assert_eq!(Some(sent[0].identifier), h.interface.last_echo_id());
    assert_eq!(sent[1].kind(), Some(Code::DiscardRequest));

    let reply = Packet::echo_reply(&sent[0], 0x0bad_cafe);
    h.peer(reply).unwrap();
    assert_eq!(h.interface.state(), State::Opened);
}

#[test]
fn test_magic_number_is_nonzero_and_fresh_per_attempt() {
    let h = Harness::new(Config::default());
    h.drive_to(State::Opened);
    let first = h.interface.magic_number();
    assert_ne!(first, 0);

    h.interface.down();
    h.peer_terminate_ack();
    h.lower_down();
    h.interface.up();

    assert_ne!(h.interface.magic_number(), 0);
}

#[test]
fn test_send_failure_does_not_change_state() {
    let h = Harness::new(Config::default());
    h.drive_to(State::RequestSent);

    h.device.wire().broken = true;
    h.interface.timer_expired();

    assert_eq!(h.interface.state(), State::RequestSent);
    assert!(h.interface.is_timer_armed());
}
