#![doc = include_str!("../README.md")]

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod exporter;
pub mod metrics;
pub mod parser;
pub mod plugins;
pub mod protocol;
pub mod time;

pub use cache::{CacheError, FlowCache};
pub use config::{CacheConfig, CacheConfigBuilder, ConfigError, ParserConfig};
pub use error::FlowExporterError;
pub use events::{ExportReason, FlowEvent, FlowHook, FlowHooks};
pub use exporter::{Exporter, ExportError, ExporterConfig, NullExporter, TemplateField, TemplateHandle};
pub use metrics::{CacheMetricsSnapshot, ParserMetrics};
pub use parser::error::ParseError;
pub use parser::PacketParser;
pub use plugins::{ActionFlags, FlowExtension, Plugin, PluginKind, PluginRuntime};
pub use protocol::IpProtocol;
pub use time::Timestamp;

/// Ties the whole pipeline together: `capture -> PacketParser -> FlowCache
/// -> PluginRuntime -> Exporter`, per `spec.md` §2's data-flow diagram.
///
/// This is a thin convenience wrapper; nothing here is load-bearing that
/// [`PacketParser`] and [`FlowCache`] don't already do on their own. Callers
/// who want direct access to either stage (to batch packets across
/// multiple caches, or drive the cache from a non-packet source) can
/// construct them directly instead.
pub struct FlowExporter {
    parser: PacketParser,
    cache: FlowCache,
}

impl FlowExporter {
    /// Builds the parser and cache, registering `plugins` and driving
    /// `exporter` through its startup handshake (see [`FlowCache::new`]).
    pub fn new(
        parser_config: ParserConfig,
        cache_config: CacheConfig,
        plugins: PluginRuntime,
        exporter: Box<dyn Exporter>,
        exporter_config: &ExporterConfig,
    ) -> Result<Self, FlowExporterError> {
        let parser = PacketParser::new(parser_config);
        let cache = FlowCache::new(cache_config, plugins, exporter, exporter_config)?;
        Ok(Self { parser, cache })
    }

    /// Parses one captured frame and feeds it into the cache. A parse
    /// failure is reported and the packet is dropped; per `spec.md` §7 this
    /// never creates a flow or touches existing cache state.
    pub fn process_packet(&mut self, raw: &[u8], at: Timestamp) -> Result<(), FlowExporterError> {
        let parsed = self.parser.parse(raw)?;
        self.cache.add_packet(&parsed.descriptors, raw, at, 0);
        Ok(())
    }

    /// Runs the throttled inactive-timeout scan and exports anything past
    /// its active timeout, without requiring a new packet to drive it.
    pub fn export_expired(&mut self, now: Timestamp) {
        self.cache.export_expired(now);
    }

    /// Exports every live flow unconditionally. Used on shutdown so no
    /// in-progress flow is silently dropped.
    pub fn export_all(&mut self) {
        self.cache.export_all();
    }

    /// Drains the cache and shuts the exporter down.
    pub fn shutdown(mut self) -> Result<(), FlowExporterError> {
        self.cache.clear().map_err(FlowExporterError::from)
    }

    pub fn register_hook<F>(&mut self, hook: F)
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.cache.register_hook(hook);
    }

    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }

    pub fn parser_metrics(&self) -> &ParserMetrics {
        self.parser.metrics()
    }

    pub fn live_flow_count(&self) -> usize {
        self.cache.live_flow_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exporter::VecExporter;

    fn exporter_config() -> ExporterConfig {
        ExporterConfig {
            observation_domain_id: 1,
            host: "127.0.0.1".to_string(),
            port: 4739,
            udp: true,
            verbose: false,
        }
    }

    fn eth_ip_tcp(src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&[0u8; 6]); // dst mac
        packet.extend_from_slice(&[1u8; 6]); // src mac
        packet.extend_from_slice(&0x0800u16.to_be_bytes()); // ethertype IPv4

        let mut ip = Vec::new();
        ip.push(0x45); // version/ihl
        ip.push(0); // tos
        ip.extend_from_slice(&40u16.to_be_bytes()); // total length: 20 ip + 20 tcp
        ip.extend_from_slice(&[0, 0]); // id
        ip.extend_from_slice(&[0, 0]); // flags/fragment
        ip.push(64); // ttl
        ip.push(6); // protocol tcp
        ip.extend_from_slice(&[0, 0]); // checksum
        ip.extend_from_slice(&[10, 0, 0, 1]); // src
        ip.extend_from_slice(&[10, 0, 0, 2]); // dst
        packet.extend_from_slice(&ip);

        let mut tcp = Vec::new();
        tcp.extend_from_slice(&src_port.to_be_bytes());
        tcp.extend_from_slice(&dst_port.to_be_bytes());
        tcp.extend_from_slice(&[0; 4]); // seq
        tcp.extend_from_slice(&[0; 4]); // ack
        tcp.push(0x50); // data offset
        tcp.push(0x02); // SYN
        tcp.extend_from_slice(&[0xff, 0xff]); // window
        tcp.extend_from_slice(&[0, 0]); // checksum
        tcp.extend_from_slice(&[0, 0]); // urgent
        packet.extend_from_slice(&tcp);
        packet
    }

    #[test]
    fn processes_a_packet_end_to_end() {
        let mut flow_exporter = FlowExporter::new(
            ParserConfig::default(),
            CacheConfigBuilder::new().with_cache_size(16).with_line_size(4).build().unwrap(),
            PluginRuntime::new(),
            Box::new(VecExporter::new()),
            &exporter_config(),
        )
        .unwrap();

        let packet = eth_ip_tcp(1234, 80);
        flow_exporter.process_packet(&packet, Timestamp::new(100, 0)).unwrap();
        assert_eq!(flow_exporter.live_flow_count(), 1);
        assert_eq!(flow_exporter.cache_metrics().misses, 1);
    }

    #[test]
    fn unparseable_packet_is_dropped_without_touching_the_cache() {
        let mut flow_exporter = FlowExporter::new(
            ParserConfig::default(),
            CacheConfigBuilder::new().with_cache_size(16).with_line_size(4).build().unwrap(),
            PluginRuntime::new(),
            Box::new(VecExporter::new()),
            &exporter_config(),
        )
        .unwrap();

        let err = flow_exporter.process_packet(&[0u8; 4], Timestamp::ZERO).unwrap_err();
        assert!(matches!(err, FlowExporterError::Parse(_)));
        assert_eq!(flow_exporter.live_flow_count(), 0);
    }

    #[test]
    fn shutdown_exports_every_live_flow() {
        let mut flow_exporter = FlowExporter::new(
            ParserConfig::default(),
            CacheConfigBuilder::new().with_cache_size(16).with_line_size(4).build().unwrap(),
            PluginRuntime::new(),
            Box::new(VecExporter::new()),
            &exporter_config(),
        )
        .unwrap();

        flow_exporter.process_packet(&eth_ip_tcp(1234, 80), Timestamp::new(1, 0)).unwrap();
        assert_eq!(flow_exporter.live_flow_count(), 1);
        flow_exporter.shutdown().unwrap();
    }
}
