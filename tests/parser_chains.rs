//! Parser-level invariants and the header chains from `spec.md` §8
//! scenario 1 (simple TCP flow) and scenario 2 (IPv4/IPv6 conflict split),
//! driven purely through `PacketParser`'s public surface.

use flow_exporter::config::ParserConfig;
use flow_exporter::parser::headers::HeaderKind;
use flow_exporter::parser::{PacketParser, ParseError};

fn push_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn eth_ip_tcp(src_port: u16, dst_port: u16, flags: u8) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x0800);

    packet.push(0x45);
    packet.push(0x00);
    push_u16(&mut packet, 40);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet.push(64);
    packet.push(6);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(&[10, 0, 0, 1]);
    packet.extend_from_slice(&[10, 0, 0, 2]);

    push_u16(&mut packet, src_port);
    push_u16(&mut packet, dst_port);
    packet.extend_from_slice(&[0; 8]);
    packet.push(0x50);
    packet.push(flags);
    push_u16(&mut packet, 0xffff);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet
}

#[test]
fn simple_tcp_flow_chain_is_ethernet_ipv4_tcp_payload() {
    let parser = PacketParser::new(ParserConfig::default());
    let packet = eth_ip_tcp(1234, 80, 0x02);
    let parsed = parser.parse(&packet).expect("a well-formed Ethernet/IPv4/TCP frame parses");

    let kinds: Vec<HeaderKind> = parsed.descriptors.iter().map(|d| d.kind()).collect();
    assert!(matches!(kinds.as_slice(), [HeaderKind::Ethernet, HeaderKind::Ipv4, HeaderKind::Tcp, HeaderKind::Payload]));
    assert!(parsed.last_of(HeaderKind::Tcp).is_some());
    assert!(parsed.payload.is_empty());
}

#[test]
fn truncated_frame_fails_with_packet_too_short() {
    let parser = PacketParser::new(ParserConfig::default());
    let err = parser.parse(&[0u8; 4]).unwrap_err();
    assert!(matches!(err, ParseError::PacketTooShort { .. }));
}

#[test]
fn unknown_ethertype_is_a_default_reject() {
    let parser = PacketParser::new(ParserConfig::default());
    let mut packet = vec![0u8; 12];
    push_u16(&mut packet, 0xBEEF);
    packet.extend_from_slice(&[0u8; 20]);
    let err = parser.parse(&packet).unwrap_err();
    assert!(matches!(err, ParseError::DefaultReject { .. }));
}

#[test]
fn vlan_tagged_ipv4_tcp_chain_includes_the_vlan_descriptor() {
    let parser = PacketParser::new(ParserConfig::default());

    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x8100);
    push_u16(&mut packet, 16); // pcp=0, dei=0, vid=16
    push_u16(&mut packet, 0x0800);

    packet.push(0x45);
    packet.push(0x00);
    push_u16(&mut packet, 40);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet.push(64);
    packet.push(17);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(&[10, 0, 0, 3]);
    packet.extend_from_slice(&[10, 0, 0, 4]);
    push_u16(&mut packet, 3000);
    push_u16(&mut packet, 9999);
    push_u16(&mut packet, 12);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(b"data");

    let parsed = parser.parse(&packet).unwrap();
    let kinds: Vec<HeaderKind> = parsed.descriptors.iter().map(|d| d.kind()).collect();
    assert!(matches!(
        kinds.as_slice(),
        [HeaderKind::Ethernet, HeaderKind::Vlan, HeaderKind::Ipv4, HeaderKind::Udp, HeaderKind::Payload]
    ));
    assert_eq!(parsed.payload, b"data");
}

/// Scenario 2: an IPv4 packet tunneled inside IPv6 by reusing IPv4's
/// protocol number in the IPv6 `next_header` field produces two IP-layer
/// descriptors in one chain, which is exactly what drives the cache's
/// conflicting-header split (`tests/cache_eviction.rs` exercises the split
/// itself; this only confirms the parser hands back both layers intact).
#[test]
fn ipv4_in_ipv6_chain_carries_both_ip_layers() {
    let parser = PacketParser::new(ParserConfig::default());

    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x86DD);
    packet.push(0x60);
    packet.extend_from_slice(&[0, 0, 0]);
    push_u16(&mut packet, 40);
    packet.push(4); // next_header: IP-in-IP
    packet.push(64);
    packet.extend_from_slice(&[0xAA; 16]);
    packet.extend_from_slice(&[0xBB; 16]);

    packet.push(0x45);
    packet.push(0x00);
    push_u16(&mut packet, 40);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet.push(64);
    packet.push(6);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(&[10, 0, 0, 1]);
    packet.extend_from_slice(&[10, 0, 0, 2]);
    push_u16(&mut packet, 1234);
    push_u16(&mut packet, 80);
    packet.extend_from_slice(&[0; 8]);
    packet.push(0x50);
    packet.push(0x02);
    push_u16(&mut packet, 0xffff);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);

    let parsed = parser.parse(&packet).unwrap();
    assert!(parsed.last_of(HeaderKind::Ipv6).is_some());
    assert!(parsed.last_of(HeaderKind::Ipv4).is_some());
    assert!(parsed.last_of(HeaderKind::Tcp).is_some());
}

/// MPLS bottom-of-stack nibble `0` is an EoMPLS control word, not a
/// malformed IPv4/IPv6 payload: four bytes are skipped and plain Ethernet
/// resumes underneath.
#[test]
fn mpls_eompls_control_word_resumes_plain_ethernet() {
    let parser = PacketParser::new(ParserConfig::default());

    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x8847); // MPLS unicast

    let label_word: u32 = (100 << 12) | (0 << 9) | (1 << 8) | 64; // label=100, bos=1, ttl=64
    packet.extend_from_slice(&label_word.to_be_bytes());

    packet.extend_from_slice(&[0u8; 4]); // EoMPLS control word

    // The inner Ethernet frame: dst/src MAC, ethertype IPv4, then a minimal
    // IPv4/TCP payload.
    let inner = eth_ip_tcp(1234, 80, 0x02);
    packet.extend_from_slice(&inner);

    let parsed = parser.parse(&packet).expect("EoMPLS control word should resume Ethernet parsing");
    let kinds: Vec<HeaderKind> = parsed.descriptors.iter().map(|d| d.kind()).collect();
    assert_eq!(kinds.iter().filter(|k| **k == HeaderKind::Ethernet).count(), 2);
    assert!(parsed.last_of(HeaderKind::Tcp).is_some());
}

fn udp_shell(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x0800);
    packet.push(0x45);
    packet.push(0x00);
    push_u16(&mut packet, (20 + 8 + payload.len()) as u16);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet.push(64);
    packet.push(17);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(&[10, 0, 0, 1]);
    packet.extend_from_slice(&[10, 0, 0, 2]);
    push_u16(&mut packet, src_port);
    push_u16(&mut packet, dst_port);
    push_u16(&mut packet, (8 + payload.len()) as u16);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(payload);
    packet
}

/// GTPv0's 20-byte fixed header (flow-label/SNDCP fields, 64-bit TID, no
/// TEID) is a genuinely different wire shape from GTPv1/v2; this pins that
/// the parser recognizes it (rather than misreading it through the GTPv1
/// layout) and stores the TID rather than a TEID.
#[test]
fn gtp_v0_header_carries_a_tid_not_a_teid() {
    let parser = PacketParser::new(ParserConfig::default());
    let mut gtp = vec![0x1E, 0x10, 0, 0]; // version=0, pt=1, snn=0; message_type=0x10 (not a G-PDU)
    gtp.extend_from_slice(&[0, 0]); // seq_num
    gtp.extend_from_slice(&[0, 0]); // flow_label
    gtp.push(0); // sndcp_num
    gtp.extend_from_slice(&[0, 0, 0]); // res2
    gtp.extend_from_slice(&0xABCDu64.to_be_bytes()); // tid
    let packet = udp_shell(2123, 2152, &gtp);

    let parsed = parser.parse(&packet).expect("GTPv0 header with no inner payload still parses");
    let gtp_descriptor = parsed.descriptors.iter().find(|d| d.kind() == HeaderKind::Gtp).expect("a GTP descriptor");
    match gtp_descriptor {
        flow_exporter::parser::headers::HeaderDescriptor::Gtp { header, .. } => {
            assert_eq!(header.version, 0);
            assert_eq!(header.teid, None);
            assert_eq!(header.tid, Some(0xABCD));
        }
        other => panic!("expected a GTP descriptor, got {other:?}"),
    }
}

/// GTPv2's TEID is gated by a presence flag in the first byte; when unset
/// the 4 TEID bytes are absent entirely (not zeroed), shifting the message
/// body that follows.
#[test]
fn gtp_v2_without_teid_flag_has_no_teid_field() {
    let parser = PacketParser::new(ParserConfig::default());
    let gtp = vec![0x40, 1, 0, 4]; // version=2, teid flag unset, message_type=1, length=4
    let packet = udp_shell(2123, 2123, &gtp);

    let parsed = parser.parse(&packet).unwrap();
    let gtp_descriptor = parsed.descriptors.iter().find(|d| d.kind() == HeaderKind::Gtp).unwrap();
    match gtp_descriptor {
        flow_exporter::parser::headers::HeaderDescriptor::Gtp { header, .. } => {
            assert_eq!(header.version, 2);
            assert_eq!(header.teid, None);
        }
        other => panic!("expected a GTP descriptor, got {other:?}"),
    }
}

/// Snapshot of a VXLAN/IPv4/UDP chain's header kinds, pinned with `insta`
/// so an accidental reordering of the tunnel dispatch table is caught.
#[test]
fn vxlan_ipv4_udp_chain_kinds_snapshot() {
    let parser = PacketParser::new(ParserConfig::default());

    let mut packet = Vec::new();
    packet.extend_from_slice(&[0x00; 6]);
    packet.extend_from_slice(&[0x11; 6]);
    push_u16(&mut packet, 0x0800);
    packet.push(0x45);
    packet.push(0x00);
    push_u16(&mut packet, 50);
    push_u16(&mut packet, 0);
    push_u16(&mut packet, 0);
    packet.push(64);
    packet.push(17);
    push_u16(&mut packet, 0);
    packet.extend_from_slice(&[192, 168, 0, 1]);
    packet.extend_from_slice(&[192, 168, 0, 2]);
    push_u16(&mut packet, 4789);
    push_u16(&mut packet, 4789);
    push_u16(&mut packet, 30);
    push_u16(&mut packet, 0);

    packet.push(0x08); // VXLAN flags: VNI present
    packet.extend_from_slice(&[0u8; 3]);
    packet.extend_from_slice(&[0, 0, 42]); // VNI = 42
    packet.push(0);

    let inner = eth_ip_tcp(1234, 80, 0x02);
    packet.extend_from_slice(&inner);

    let parsed = parser.parse(&packet).unwrap();
    let kinds: Vec<&str> = parsed.descriptors.iter().map(|d| d.kind().name()).collect();
    let rendered = format!("{kinds:?}");
    insta::assert_snapshot!(rendered, @r#"["ethernet", "ipv4", "udp", "vxlan", "ethernet", "ipv4", "tcp", "payload"]"#);
}
