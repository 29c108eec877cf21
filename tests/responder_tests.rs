//! tests/responder_tests.rs
//!
//! Responder-side behavior over a scripted transport: answering host and
//! service queries, the DNS-SD enumeration cascade, goodbyes and the
//! periodic re-announcement.

mod common;

use std::net::Ipv4Addr;

use bonjour::{Bonjour, ServiceProtocol};
use common::{be16, find, query, FakeTransport, TestClock, GROUP, PEER};

fn engine(
    host: &str,
    local_ip: Ipv4Addr,
    start_ms: u32,
) -> (Bonjour<FakeTransport, TestClock>, FakeTransport, TestClock) {
    let transport = FakeTransport::new(local_ip);
    let clock = TestClock::at(start_ms);
    let mut engine = Bonjour::with_clock(transport.clone(), clock.clone());
    engine.begin_with_name(host).unwrap();
    (engine, transport, clock)
}

#[test]
fn answers_host_a_query() {
    // 1) Host "spark" at 192.168.1.10.
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(192, 168, 1, 10), 1_000);

    // 2) Inbound A question for spark.local, XID 0x1234.
    transport.push_inbound(
        query(0x1234, b"\x05spark\x05local\x00\x00\x01\x00\x01"),
        PEER,
        5353,
    );
    engine.run();

    // 3) Exactly one answer, to the peer, XID echoed, A record with the
    //    cache-flush bit, TTL 120 and our address.
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].dest, sent[0].port), (PEER, 5353));
    assert_eq!(
        &sent[0].data[..12],
        &[0x12, 0x34, 0x84, 0x00, 0, 0, 0, 1, 0, 0, 0, 0]
    );
    assert_eq!(
        &sent[0].data[12..],
        b"\x05spark\x05local\x00\x00\x01\x80\x01\x00\x00\x00\x78\x00\x04\xc0\xa8\x01\x0a"
    );
}

#[test]
fn denies_aaaa_with_name_error_and_a_additional() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(192, 168, 1, 10), 1_000);

    transport.push_inbound(
        query(0x0042, b"\x05spark\x05local\x00\x00\x1c\x00\x01"),
        PEER,
        5353,
    );
    engine.run();

    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    let data = &sent[0].data;
    // RCODE 3, one question, one additional.
    assert_eq!(&data[..12], &[0x00, 0x42, 0x84, 0x03, 0, 1, 0, 0, 0, 0, 0, 1]);
    assert!(find(data, &[0x00, 0x1c, 0x00, 0x01]).is_some());
    assert!(find(data, &[0x00, 0x01, 0x80, 0x01]).is_some());
}

#[test]
fn dns_sd_enumeration_answers_for_every_service() {
    // Scenario: two registered services, one meta-query.
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("printer", 631, ServiceProtocol::Tcp, None)
        .unwrap();
    engine
        .add_service("web", 80, ServiceProtocol::Tcp, None)
        .unwrap();
    transport.take_sent(); // drop the two registration announcements

    transport.push_inbound(
        query(
            0x7777,
            b"\x09_services\x07_dns-sd\x04_udp\x05local\x00\x00\x0c\x00\x01",
        ),
        PEER,
        5353,
    );
    engine.run();

    // One full ServiceRecord datagram per slot, in slot order.
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 2);
    for pkt in &sent {
        assert_eq!((pkt.dest, pkt.port), (PEER, 5353));
        assert_eq!(be16(&pkt.data, 0), 0x7777);
        assert_eq!(be16(&pkt.data, 2), 0x8400);
        assert_eq!(
            [be16(&pkt.data, 4), be16(&pkt.data, 6), be16(&pkt.data, 8), be16(&pkt.data, 10)],
            [0, 4, 0, 1]
        );
    }
    assert!(find(&sent[0].data, b"\x07printer\x04_tcp\x05local\x00").is_some());
    assert!(find(&sent[1].data, b"\x03web\x04_tcp\x05local\x00").is_some());
    // Each carries an SRV with its port.
    let srv = find(&sent[0].data, &[0x00, 0x21, 0x80, 0x01]).unwrap();
    assert_eq!(be16(&sent[0].data, srv + 14), 631);
    let srv = find(&sent[1].data, &[0x00, 0x21, 0x80, 0x01]).unwrap();
    assert_eq!(be16(&sent[1].data, srv + 14), 80);
}

#[test]
fn service_type_query_stops_eliciting_answers_after_removal() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("web", 80, ServiceProtocol::Tcp, None)
        .unwrap();
    transport.take_sent();

    let question = b"\x03web\x04_tcp\x05local\x00\x00\x0c\x00\x01";
    transport.push_inbound(query(1, question), PEER, 5353);
    engine.run();
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(be16(&sent[0].data, 6), 4);

    engine.remove_service(None, 80, ServiceProtocol::Tcp);
    transport.take_sent(); // the goodbye

    transport.push_inbound(query(2, question), PEER, 5353);
    engine.run();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn goodbye_is_a_single_ptr_with_ttl_zero() {
    // Scenario: add then remove; exactly one release datagram.
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("x", 1234, ServiceProtocol::Udp, None)
        .unwrap();
    transport.take_sent();

    engine.remove_service(None, 1234, ServiceProtocol::Udp);
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].dest, sent[0].port), (GROUP, 5353));
    assert_eq!(&sent[0].data[..12], &[0, 0, 0x84, 0x00, 0, 0, 0, 1, 0, 0, 0, 0]);
    assert_eq!(
        &sent[0].data[12..],
        b"\x01x\x04_udp\x05local\x00\x00\x0c\x00\x01\x00\x00\x00\x00\x00\x0e\x01x\x04_udp\x05local\x00"
    );
}

#[test]
fn remove_all_services_is_idempotent() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("a._http", 80, ServiceProtocol::Tcp, None)
        .unwrap();
    engine
        .add_service("b._ipp", 631, ServiceProtocol::Tcp, None)
        .unwrap();
    transport.take_sent();

    engine.remove_all_services();
    assert_eq!(transport.take_sent().len(), 2);

    // The second pass has nothing left to say.
    engine.remove_all_services();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn ignores_queries_for_other_names() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    transport.push_inbound(
        query(9, b"\x05other\x05local\x00\x00\x01\x00\x01"),
        PEER,
        5353,
    );
    engine.run();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn ignores_queries_not_from_the_mdns_port() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    transport.push_inbound(
        query(9, b"\x05spark\x05local\x00\x00\x01\x00\x01"),
        PEER,
        1234,
    );
    engine.run();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn truncated_question_section_is_dropped_quietly() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    // Claims one question but the name is cut short.
    transport.push_inbound(query(9, b"\x05spa"), PEER, 5353);
    engine.run();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn reannounces_registered_services_every_90_seconds() {
    let (mut engine, transport, clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("web", 80, ServiceProtocol::Tcp, None)
        .unwrap();
    transport.take_sent();

    // Not yet due.
    clock.advance(89_000);
    engine.run();
    assert!(transport.take_sent().is_empty());

    // Past the 90 s mark: one unsolicited multicast ServiceRecord.
    clock.advance(1_500);
    engine.run();
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].dest, sent[0].port), (GROUP, 5353));
    assert_eq!(be16(&sent[0].data, 0), 0); // unsolicited: XID 0
    assert_eq!(be16(&sent[0].data, 6), 4);

    // The burst timestamp advanced; the next tick stays quiet.
    engine.run();
    assert!(transport.take_sent().is_empty());
}

#[test]
fn stop_says_goodbye_and_closes_the_socket() {
    let (mut engine, transport, _clock) = engine("spark", Ipv4Addr::new(10, 0, 0, 2), 1_000);
    engine
        .add_service("web", 80, ServiceProtocol::Tcp, None)
        .unwrap();
    transport.take_sent();

    engine.stop();
    let sent = transport.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0].data[4..12], &[0, 0, 0, 1, 0, 0, 0, 0]);
    assert!(!transport.is_bound());
}
