//! The live flow record stored in a [`crate::cache::FlowCache`] slot.
//!
//! Grounded on `original_source/exporter/cache.c` in full: every field here
//! is either copied straight off the wire on flow creation (first
//! timestamp, identity fields, MACs) or accumulated on every subsequent
//! packet (byte/packet counters, OR-accumulated TCP flags, last timestamp).
//! The plugin extension slots are the one piece the original keeps as a
//! fixed-size inline array; this keeps a `Vec<Option<_>>` sized to the
//! registered plugin count instead; see [`crate::plugins`] for why.

use std::net::IpAddr;

use serde::Serialize;

use crate::cache::key::FlowFields;
use crate::plugins::FlowExtension;
use crate::protocol::IpProtocol;
use crate::time::Timestamp;

/// A single, live flow. Lives in a [`crate::cache::FlowCache`] slot from
/// the packet that created it until it is exported.
#[derive(Debug, Clone, Serialize)]
pub struct FlowRecord {
    /// `= hash` at creation time. Re-derivable, but kept denormalized since
    /// `spec.md` §3 calls for it as an explicit exported field.
    pub id: u64,
    /// `hash` of the packet that caused this flow to be split off from,
    /// via the conflicting-header recursion; `0` for a top-level flow.
    pub parent_id: u64,

    pub first: Timestamp,
    pub last: Timestamp,

    pub packets: u64,
    pub bytes: u64,

    /// OR-accumulated across every packet on this flow; only meaningful
    /// when `protocol == Tcp`.
    pub tcp_flags: u8,

    pub tos: u8,
    pub ttl: u8,
    pub protocol: IpProtocol,

    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,

    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],

    /// Input interface index this flow's first packet arrived on. Carried
    /// purely for the IPFIX bootstrap field; this crate doesn't attribute
    /// capture interfaces itself, so it defaults to `0`.
    pub input_interface: u16,

    /// One slot per registered plugin, indexed by that plugin's dense
    /// registration id. `None` until the owning plugin's `post_create`
    /// first attaches a value.
    extensions: Vec<Option<FlowExtension>>,
}

impl FlowRecord {
    /// A record with every field zeroed, sized for `extension_count`
    /// plugin slots. [`crate::cache::FlowCache`] fills in identity fields
    /// from a [`FlowFields`] immediately after construction.
    pub fn new(extension_count: usize) -> Self {
        Self {
            id: 0,
            parent_id: 0,
            first: Timestamp::ZERO,
            last: Timestamp::ZERO,
            packets: 0,
            bytes: 0,
            tcp_flags: 0,
            tos: 0,
            ttl: 0,
            protocol: IpProtocol::Reserved,
            src_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
            src_port: 0,
            dst_port: 0,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            input_interface: 0,
            extensions: vec![None; extension_count],
        }
    }

    /// A zero-plugin-slot record, for tests and exporter test doubles that
    /// don't exercise the plugin runtime.
    pub fn scratch() -> Self {
        Self::new(0)
    }

    pub fn populate_identity(&mut self, id: u64, parent_id: u64, at: Timestamp, fields: &FlowFields) {
        self.id = id;
        self.parent_id = parent_id;
        self.first = at;
        self.last = at;
        self.tos = fields.tos;
        self.ttl = fields.ttl;
        self.protocol = fields.protocol;
        self.src_addr = fields.src_addr;
        self.dst_addr = fields.dst_addr;
        self.src_port = fields.src_port;
        self.dst_port = fields.dst_port;
        self.src_mac = fields.src_mac;
        self.dst_mac = fields.dst_mac;
    }

    /// Fold a new packet's counters and flags into this flow. Does not
    /// touch identity fields; a conflicting-header packet never reaches
    /// this path for an existing flow with a different identity.
    pub fn accumulate(&mut self, at: Timestamp, byte_len: u64, tcp_flags: Option<u8>) {
        self.last = at;
        self.packets += 1;
        self.bytes += byte_len;
        if let Some(flags) = tcp_flags {
            self.tcp_flags |= flags;
        }
    }

    pub fn extension_slots(&self) -> usize {
        self.extensions.len()
    }

    pub fn extension(&self, plugin_id: usize) -> Option<&FlowExtension> {
        self.extensions.get(plugin_id).and_then(Option::as_ref)
    }

    pub fn extension_mut(&mut self, plugin_id: usize) -> Option<&mut FlowExtension> {
        self.extensions.get_mut(plugin_id).and_then(Option::as_mut)
    }

    pub fn set_extension(&mut self, plugin_id: usize, value: FlowExtension) {
        if let Some(slot) = self.extensions.get_mut(plugin_id) {
            *slot = Some(value);
        }
    }

    /// Remove and return every populated extension, in plugin-id order.
    /// Called on export so a plugin's `close()` can observe and free its
    /// per-flow state.
    pub fn take_extensions(&mut self) -> impl Iterator<Item = (usize, FlowExtension)> {
        std::mem::take(&mut self.extensions)
            .into_iter()
            .enumerate()
            .filter_map(|(id, ext)| ext.map(|e| (id, e)))
    }

    pub fn is_active_expired(&self, now: Timestamp, active_timeout_secs: u32) -> bool {
        now.secs_since(self.first) >= active_timeout_secs
    }

    pub fn is_inactive_expired(&self, now: Timestamp, inactive_timeout_secs: u32) -> bool {
        now.secs_since(self.last) >= inactive_timeout_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_record_has_no_extensions() {
        let rec = FlowRecord::scratch();
        assert!(rec.extension(0).is_none());
    }

    #[test]
    fn accumulate_ors_tcp_flags_and_sums_bytes() {
        let mut rec = FlowRecord::new(0);
        rec.populate_identity(
            42,
            0,
            Timestamp::new(100, 0),
            &FlowFields {
                protocol: IpProtocol::Tcp,
                src_addr: IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 1)),
                dst_addr: IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 2)),
                src_port: 1234,
                dst_port: 80,
                tos: 0,
                ttl: 64,
                src_mac: [0; 6],
                dst_mac: [0; 6],
                ip_total_len: 60,
                tcp_flags: Some(crate::parser::headers::TcpHeader::SYN),
            },
        );
        rec.accumulate(Timestamp::new(100, 0), 60, Some(crate::parser::headers::TcpHeader::SYN));
        rec.accumulate(Timestamp::new(101, 0), 60, Some(crate::parser::headers::TcpHeader::ACK));

        assert_eq!(rec.packets, 2);
        assert_eq!(rec.bytes, 120);
        assert_eq!(
            rec.tcp_flags,
            crate::parser::headers::TcpHeader::SYN | crate::parser::headers::TcpHeader::ACK
        );
        assert_eq!(rec.first.secs, 100);
        assert_eq!(rec.last.secs, 101);
        assert_eq!(rec.id, 42);
    }

    #[test]
    fn active_and_inactive_expiry_compare_against_supplied_timestamps() {
        let mut rec = FlowRecord::new(0);
        rec.populate_identity(
            1,
            0,
            Timestamp::new(100, 0),
            &FlowFields {
                protocol: IpProtocol::Udp,
                src_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                dst_addr: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                src_port: 0,
                dst_port: 0,
                tos: 0,
                ttl: 0,
                src_mac: [0; 6],
                dst_mac: [0; 6],
                ip_total_len: 0,
                tcp_flags: None,
            },
        );
        assert!(!rec.is_active_expired(Timestamp::new(100, 500_000), 1));
        assert!(rec.is_active_expired(Timestamp::new(102, 0), 1));
        assert!(!rec.is_inactive_expired(Timestamp::new(100, 0), 5));
        assert!(rec.is_inactive_expired(Timestamp::new(106, 0), 5));
    }
}
