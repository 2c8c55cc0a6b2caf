use criterion::{Criterion, criterion_group, criterion_main};
use flow_exporter::{ParserConfig, PacketParser};
use std::hint::black_box;

fn eth_ip_tcp(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&[0u8; 6]);
    packet.extend_from_slice(&[1u8; 6]);
    packet.extend_from_slice(&0x0800u16.to_be_bytes());

    packet.push(0x45);
    packet.push(0);
    packet.extend_from_slice(&40u16.to_be_bytes());
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&[0, 0]);
    packet.push(64);
    packet.push(6);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&[10, 0, 0, 1]);
    packet.extend_from_slice(&[10, 0, 0, 2]);

    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&[0; 4]);
    packet.extend_from_slice(&[0; 4]);
    packet.push(0x50);
    packet.push(0x18);
    packet.extend_from_slice(&[0xff, 0xff]);
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(&[0, 0]);
    packet
}

fn eth_vlan_ipv6_udp_vxlan_inner_tcp() -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&[0u8; 6]);
    packet.extend_from_slice(&[1u8; 6]);
    packet.extend_from_slice(&0x8100u16.to_be_bytes()); // VLAN
    packet.extend_from_slice(&0x0010u16.to_be_bytes()); // tag, pcp/dei/vid
    packet.extend_from_slice(&0x86ddu16.to_be_bytes()); // ethertype IPv6

    let inner_frame = eth_ip_tcp(1234, 80);
    let vxlan_payload_len = 8 + inner_frame.len(); // vxlan header + inner frame
    let udp_total_len = 8 + vxlan_payload_len;

    packet.push(0x60);
    packet.extend_from_slice(&[0, 0, 0]);
    packet.extend_from_slice(&(udp_total_len as u16).to_be_bytes()); // ipv6 payload_length
    packet.push(17); // next header UDP
    packet.push(64);
    packet.extend_from_slice(&[0u8; 16]);
    packet.extend_from_slice(&[0u8; 16]);

    packet.extend_from_slice(&4789u16.to_be_bytes()); // src port
    packet.extend_from_slice(&4789u16.to_be_bytes()); // dst port (vxlan)
    packet.extend_from_slice(&(udp_total_len as u16).to_be_bytes());
    packet.extend_from_slice(&[0, 0]);

    packet.extend_from_slice(&[0x08, 0, 0, 0]); // vxlan flags + reserved
    packet.extend_from_slice(&[0, 0, 42, 0]); // vni + reserved

    packet.extend_from_slice(&inner_frame);
    packet
}

fn criterion_benchmark(c: &mut Criterion) {
    let parser = PacketParser::new(ParserConfig::default());
    let simple = eth_ip_tcp(1234, 80);
    let tunneled = eth_vlan_ipv6_udp_vxlan_inner_tcp();

    c.bench_function("parse simple ethernet/ipv4/tcp", |b| {
        b.iter(|| {
            let _ = parser.parse(black_box(&simple));
        })
    });

    c.bench_function("parse vlan/ipv6/vxlan/tunneled tcp", |b| {
        b.iter(|| {
            let _ = parser.parse(black_box(&tunneled));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
