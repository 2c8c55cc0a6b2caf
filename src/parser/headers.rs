//! Decoded header values and the tagged descriptor that wraps each one.
//!
//! The shape here is grounded on `qmonnet-dataplane/net/src/headers/mod.rs`'s
//! `Header` enum, which tags every layer it decodes with the byte offset it
//! was found at. That file folds the tagged values into a typed `Headers`
//! accumulator struct; `spec.md` §4.2 instead wants them in flat discovery
//! order (flow-key assembly walks the list once, looking for specific
//! kinds), so [`HeaderDescriptor`] is pushed into a plain bounded `Vec`
//! rather than assigned into named struct fields.

use std::net::{Ipv4Addr, Ipv6Addr};

use serde::Serialize;

use crate::protocol::IpProtocol;

/// Identifies a [`HeaderDescriptor`] variant without its payload. Used to
/// index the packet parser's per-type bounded pools.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    Ethernet = 0,
    Vlan = 1,
    Mpls = 2,
    Pppoe = 3,
    Ipv4 = 4,
    Ipv6 = 5,
    Ipv6Ext = 6,
    Gre = 7,
    L2tp = 8,
    Vxlan = 9,
    Geneve = 10,
    Gtp = 11,
    Teredo = 12,
    Tcp = 13,
    Udp = 14,
    Icmp = 15,
    Icmpv6 = 16,
    Payload = 17,
}

impl HeaderKind {
    /// Number of distinct kinds; sizes the per-type counter array in
    /// [`crate::parser::PacketParser`].
    pub const COUNT: usize = 18;

    pub fn name(self) -> &'static str {
        match self {
            HeaderKind::Ethernet => "ethernet",
            HeaderKind::Vlan => "vlan",
            HeaderKind::Mpls => "mpls",
            HeaderKind::Pppoe => "pppoe",
            HeaderKind::Ipv4 => "ipv4",
            HeaderKind::Ipv6 => "ipv6",
            HeaderKind::Ipv6Ext => "ipv6_ext",
            HeaderKind::Gre => "gre",
            HeaderKind::L2tp => "l2tp",
            HeaderKind::Vxlan => "vxlan",
            HeaderKind::Geneve => "geneve",
            HeaderKind::Gtp => "gtp",
            HeaderKind::Teredo => "teredo",
            HeaderKind::Tcp => "tcp",
            HeaderKind::Udp => "udp",
            HeaderKind::Icmp => "icmp",
            HeaderKind::Icmpv6 => "icmpv6",
            HeaderKind::Payload => "payload",
        }
    }
}

/// Which 802.1 tag a [`VlanHeader`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VlanKind {
    /// 802.1Q, EtherType 0x8100.
    Dot1Q,
    /// 802.1ad (Q-in-Q) service tag, EtherType 0x88A8.
    QinQ,
    /// 802.1ah (PBB / MAC-in-MAC) backbone tag, EtherType 0x88E7.
    Ah,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EthernetHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    pub ethertype: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VlanHeader {
    pub kind: VlanKind,
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
    pub inner_ethertype: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MplsLabelHeader {
    pub label: u32,
    pub tc: u8,
    pub bottom_of_stack: bool,
    pub ttl: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PppoeHeader {
    pub version: u8,
    pub type_field: u8,
    pub code: u8,
    pub session_id: u16,
    pub length: u16,
    pub ppp_protocol: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: IpProtocol,
    pub checksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_length: u16,
    pub next_header: IpProtocol,
    pub hop_limit: u8,
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

/// One IPv6 extension header (hop-by-hop, routing, fragment, destination
/// options, AH, or ESP). `spec.md` §4.1 folds AH/ESP into the IPv6
/// extension chain since they too carry a `next_header` continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ipv6ExtHeader {
    pub next_header: IpProtocol,
    pub header_ext_len: u8,
    pub total_len_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GreHeader {
    pub version: u8,
    pub checksum_present: bool,
    pub key_present: bool,
    pub sequence_present: bool,
    pub protocol_type: u16,
    pub key: Option<u32>,
    pub sequence: Option<u32>,
    pub acknowledgment: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct L2tpHeader {
    pub flags: u16,
    pub version: u8,
    pub length: Option<u16>,
    pub tunnel_id: u16,
    pub session_id: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VxlanHeader {
    pub flags: u8,
    pub vni: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeneveHeader {
    pub version: u8,
    pub option_words: u8,
    pub oam: bool,
    pub critical: bool,
    pub protocol_type: u16,
    pub vni: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GtpHeader {
    pub version: u8,
    pub protocol_type: u8,
    pub message_type: u8,
    pub length: u16,
    /// GTPv1/v2 tunnel endpoint id. Absent for GTPv0, which carries a
    /// 64-bit TID (`tid`) at a different offset instead.
    pub teid: Option<u32>,
    /// GTPv0's 64-bit tunnel id (flow-label/SNDCP-qualified). Absent for
    /// GTPv1/v2.
    pub tid: Option<u64>,
}

/// Teredo has no fixed on-wire header of its own; per `spec.md` §4.1 it is
/// recognized purely by UDP port 3544 and the nibble of the first payload
/// byte distinguishing an IPv6-in-UDP tunnel packet from a bubble/origin
/// indication packet, so this descriptor is a marker plus that nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeredoHeader {
    pub first_nibble: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub data_offset: u8,
    pub flags: u8,
    pub window: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

impl TcpHeader {
    pub const FIN: u8 = 0b0000_0001;
    pub const SYN: u8 = 0b0000_0010;
    pub const RST: u8 = 0b0000_0100;
    pub const PSH: u8 = 0b0000_1000;
    pub const ACK: u8 = 0b0001_0000;
    pub const URG: u8 = 0b0010_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IcmpHeader {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Icmpv6Header {
    pub icmp_type: u8,
    pub code: u8,
    pub checksum: u16,
}

/// A single decoded header, tagged with the byte offset (from the start of
/// the packet) it was found at.
///
/// `spec.md` §3 describes the descriptor as carrying "a byte offset...and
/// a decoded value of the appropriate header struct"; the terminal
/// `Payload` variant carries no header value, only the offset where the L4
/// payload begins, and is what the plugin runtime is handed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum HeaderDescriptor {
    Ethernet { offset: usize, header: EthernetHeader },
    Vlan { offset: usize, header: VlanHeader },
    Mpls { offset: usize, header: MplsLabelHeader },
    Pppoe { offset: usize, header: PppoeHeader },
    Ipv4 { offset: usize, header: Ipv4Header },
    Ipv6 { offset: usize, header: Ipv6Header },
    Ipv6Ext { offset: usize, header: Ipv6ExtHeader },
    Gre { offset: usize, header: GreHeader },
    L2tp { offset: usize, header: L2tpHeader },
    Vxlan { offset: usize, header: VxlanHeader },
    Geneve { offset: usize, header: GeneveHeader },
    Gtp { offset: usize, header: GtpHeader },
    Teredo { offset: usize, header: TeredoHeader },
    Tcp { offset: usize, header: TcpHeader },
    Udp { offset: usize, header: UdpHeader },
    Icmp { offset: usize, header: IcmpHeader },
    Icmpv6 { offset: usize, header: Icmpv6Header },
    Payload { offset: usize },
}

impl HeaderDescriptor {
    pub fn kind(&self) -> HeaderKind {
        match self {
            HeaderDescriptor::Ethernet { .. } => HeaderKind::Ethernet,
            HeaderDescriptor::Vlan { .. } => HeaderKind::Vlan,
            HeaderDescriptor::Mpls { .. } => HeaderKind::Mpls,
            HeaderDescriptor::Pppoe { .. } => HeaderKind::Pppoe,
            HeaderDescriptor::Ipv4 { .. } => HeaderKind::Ipv4,
            HeaderDescriptor::Ipv6 { .. } => HeaderKind::Ipv6,
            HeaderDescriptor::Ipv6Ext { .. } => HeaderKind::Ipv6Ext,
            HeaderDescriptor::Gre { .. } => HeaderKind::Gre,
            HeaderDescriptor::L2tp { .. } => HeaderKind::L2tp,
            HeaderDescriptor::Vxlan { .. } => HeaderKind::Vxlan,
            HeaderDescriptor::Geneve { .. } => HeaderKind::Geneve,
            HeaderDescriptor::Gtp { .. } => HeaderKind::Gtp,
            HeaderDescriptor::Teredo { .. } => HeaderKind::Teredo,
            HeaderDescriptor::Tcp { .. } => HeaderKind::Tcp,
            HeaderDescriptor::Udp { .. } => HeaderKind::Udp,
            HeaderDescriptor::Icmp { .. } => HeaderKind::Icmp,
            HeaderDescriptor::Icmpv6 { .. } => HeaderKind::Icmpv6,
            HeaderDescriptor::Payload { .. } => HeaderKind::Payload,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            HeaderDescriptor::Ethernet { offset, .. }
            | HeaderDescriptor::Vlan { offset, .. }
            | HeaderDescriptor::Mpls { offset, .. }
            | HeaderDescriptor::Pppoe { offset, .. }
            | HeaderDescriptor::Ipv4 { offset, .. }
            | HeaderDescriptor::Ipv6 { offset, .. }
            | HeaderDescriptor::Ipv6Ext { offset, .. }
            | HeaderDescriptor::Gre { offset, .. }
            | HeaderDescriptor::L2tp { offset, .. }
            | HeaderDescriptor::Vxlan { offset, .. }
            | HeaderDescriptor::Geneve { offset, .. }
            | HeaderDescriptor::Gtp { offset, .. }
            | HeaderDescriptor::Teredo { offset, .. }
            | HeaderDescriptor::Tcp { offset, .. }
            | HeaderDescriptor::Udp { offset, .. }
            | HeaderDescriptor::Icmp { offset, .. }
            | HeaderDescriptor::Icmpv6 { offset, .. }
            | HeaderDescriptor::Payload { offset } => *offset,
        }
    }
}
