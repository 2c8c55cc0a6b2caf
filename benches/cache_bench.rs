use criterion::{Criterion, criterion_group, criterion_main};
use flow_exporter::{
    CacheConfigBuilder, ExporterConfig, FlowCache, NullExporter, ParserConfig, PacketParser,
    PluginRuntime, Timestamp,
};
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

fn exporter_config() -> ExporterConfig {
    ExporterConfig {
        observation_domain_id: 1,
        host: "127.0.0.1".to_string(),
        port: 4739,
        udp: true,
        verbose: false,
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let parser = PacketParser::new(ParserConfig::default());
    let packets: Vec<Vec<u8>> = (0..64u16).map(|i| eth_ip_tcp(10_000 + i, 80)).collect();

    c.bench_function("add_packet: 64 distinct flows, cold cache", |b| {
        b.iter(|| {
            let mut cache = FlowCache::new(
                CacheConfigBuilder::new().with_cache_size(1 << 12).with_line_size(4).build().unwrap(),
                PluginRuntime::new(),
                Box::new(NullExporter::new()),
                &exporter_config(),
            )
            .unwrap();
            for (i, packet) in packets.iter().enumerate() {
                let parsed = parser.parse(packet).unwrap();
                cache.add_packet(&parsed.descriptors, black_box(packet), Timestamp::new(i as u32, 0), 0);
            }
        })
    });

    c.bench_function("add_packet: single flow, repeated updates", |b| {
        let packet = eth_ip_tcp(1234, 80);
        let parsed = parser.parse(&packet).unwrap();
        let mut cache = FlowCache::new(
            CacheConfigBuilder::new().with_cache_size(1 << 8).with_line_size(4).build().unwrap(),
            PluginRuntime::new(),
            Box::new(NullExporter::new()),
            &exporter_config(),
        )
        .unwrap();
        let mut secs = 0u32;
        b.iter(|| {
            cache.add_packet(&parsed.descriptors, black_box(&packet), Timestamp::new(secs, 0), 0);
            secs += 1;
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
