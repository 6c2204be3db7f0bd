use std::sync::Arc;
use std::time::Duration;

use etherparse::PacketBuilder;
use sipprobe::layers::LinkType;
use sipprobe::{CaptureInfo, CorrelationCaches, Correlator, Decoder, DecoderOptions, PortRoles, RecordType};

const CI: CaptureInfo = CaptureInfo {
    tsec: 1_700_000_000,
    tusec: 0,
    link: LinkType::Ethernet,
};

const INVITE: &[u8] = b"INVITE sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.1:5060\r\n\
Call-ID: flow-call-1@10.0.0.1\r\n\
CSeq: 1 INVITE\r\n\
Content-Type: application/sdp\r\n\
\r\n\
v=0\r\n\
c=IN IP4 10.0.0.5\r\n\
m=audio 30000 RTP/AVP 0\r\n\
a=rtcp:30001\r\n";

fn udp_frame(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16, payload: &[u8]) -> Vec<u8> {
    let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
        .ipv4(src, dst, 64)
        .udp(sport, dport);
    let mut frame = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut frame, payload).unwrap();
    frame
}

fn receiver_report(ssrc: u32) -> Vec<u8> {
    let mut packet = vec![0x81, 201, 0x00, 0x07];
    packet.extend_from_slice(&ssrc.to_be_bytes());
    packet.extend_from_slice(&0xcafe_babeu32.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0, 1]);
    packet.extend_from_slice(&500u32.to_be_bytes());
    packet.extend_from_slice(&7u32.to_be_bytes());
    packet.extend_from_slice(&0u32.to_be_bytes());
    packet.extend_from_slice(&0u32.to_be_bytes());
    packet
}

fn setup() -> (Decoder, Correlator) {
    let decoder = Decoder::new(
        "probe-1",
        DecoderOptions {
            payload_filter: None,
            reassembly: true,
            fragment_timeout: Duration::from_secs(30),
        },
    );
    let correlator = Correlator::new(Arc::new(CorrelationCaches::new()));
    (decoder, correlator)
}

#[test]
fn test_sip_then_rtcp() {
    let (decoder, correlator) = setup();
    let roles = PortRoles::default();

    let sip = decoder
        .process(&udp_frame([10, 0, 0, 1], 5060, [10, 0, 0, 2], 5060, INVITE), &CI)
        .expect("SIP 帧应被解码");
    assert_eq!(sip.host, "probe-1");
    assert_eq!(sip.sip_headers["call-id"], vec!["flow-call-1@10.0.0.1".to_string()]);
    assert_eq!(correlator.correlate_packet(&sip, &roles), None);

    let rtcp = decoder
        .process(
            &udp_frame([10, 0, 0, 5], 30001, [10, 0, 0, 9], 40001, &receiver_report(0x0102_0304)),
            &CI,
        )
        .expect("RTCP 帧应被解码");
    assert!(rtcp.sip_headers.is_empty());

    let correlation = correlator.correlate_packet(&rtcp, &roles).expect("应关联到 Call-ID");
    assert_eq!(correlation.record_type, RecordType::Rtcp);
    assert_eq!(correlation.correlation_id, b"flow-call-1@10.0.0.1");
    let report: serde_json::Value = serde_json::from_slice(&correlation.payload).unwrap();
    assert_eq!(report["ssrc"], 0x0102_0304);

    // SSRC 已写入长期缓存，换了源端口也能关联
    let moved = decoder
        .process(
            &udp_frame([10, 0, 0, 77], 50001, [10, 0, 0, 9], 40001, &receiver_report(0x0102_0304)),
            &CI,
        )
        .unwrap();
    let correlation = correlator.correlate_packet(&moved, &roles).unwrap();
    assert_eq!(correlation.correlation_id, b"flow-call-1@10.0.0.1");
}

#[test]
fn test_unknown_rtcp_stream() {
    let (decoder, correlator) = setup();
    let rtcp = decoder
        .process(
            &udp_frame([10, 0, 0, 6], 30001, [10, 0, 0, 9], 40001, &receiver_report(42)),
            &CI,
        )
        .unwrap();
    assert_eq!(correlator.correlate_packet(&rtcp, &PortRoles::default()), None);
}

#[test]
fn test_log_port() {
    let (decoder, correlator) = setup();
    let roles = PortRoles {
        ng_port: None,
        log_port: Some(514),
    };
    let line = b"<134>Oct 19 10:00:00 media[812]: ID=flow-call-1@10.0.0.1 port 30000 started";
    let packet = decoder
        .process(&udp_frame([10, 0, 0, 3], 40000, [10, 0, 0, 9], 514, line), &CI)
        .unwrap();

    let correlation = correlator.correlate_packet(&packet, &roles).unwrap();
    assert_eq!(correlation.record_type, RecordType::Log);
    assert_eq!(correlation.correlation_id, b"flow-call-1@10.0.0.1");
    assert_eq!(correlation.payload, line.to_vec());
}

#[test]
fn test_ng_port() {
    let (decoder, correlator) = setup();
    let roles = PortRoles {
        ng_port: Some(22222),
        log_port: None,
    };

    let offer = b"5323_1 d7:call-id10:ng-call-427:command5:offere";
    let packet = decoder
        .process(&udp_frame([10, 0, 0, 1], 41000, [10, 0, 0, 8], 22222, offer), &CI)
        .unwrap();
    assert_eq!(correlator.correlate_packet(&packet, &roles), None);

    let stats = b"5323_1 d4:SSRCd10:3735928559d7:packetsi120eeee";
    let packet = decoder
        .process(&udp_frame([10, 0, 0, 8], 22222, [10, 0, 0, 1], 41000, stats), &CI)
        .unwrap();
    let correlation = correlator.correlate_packet(&packet, &roles).unwrap();
    assert_eq!(correlation.record_type, RecordType::Log);
    assert_eq!(correlation.correlation_id, b"ng-call-42");
    let json: serde_json::Value = serde_json::from_slice(&correlation.payload).unwrap();
    assert_eq!(json["3735928559"]["packets"], 120);
}

#[test]
fn test_payload_filter() {
    let decoder = Decoder::new(
        "probe-1",
        DecoderOptions {
            payload_filter: Some("OPTIONS sip:".to_string()),
            reassembly: false,
            fragment_timeout: Duration::from_secs(30),
        },
    );
    let options = b"OPTIONS sip:ping@10.0.0.2 SIP/2.0\r\nCall-ID: keepalive\r\n\r\n";
    assert_eq!(
        decoder.process(&udp_frame([10, 0, 0, 1], 5060, [10, 0, 0, 2], 5060, options), &CI),
        None
    );
    assert!(decoder
        .process(&udp_frame([10, 0, 0, 1], 5060, [10, 0, 0, 2], 5060, INVITE), &CI)
        .is_some());
}
