//! Layered packet parser.
//!
//! Walks a raw link-layer frame through Ethernet, VLAN/MPLS/PPPoE
//! encapsulation, IPv4/IPv6 (with extension headers), the GRE/L2TP/VXLAN/
//! Geneve/GTP/Teredo tunnel family, and TCP/UDP/ICMP(v6), producing a flat,
//! bounded list of [`headers::HeaderDescriptor`]s in discovery order plus
//! the byte slice of whatever payload remains past the last header
//! recognized.
//!
//! The dispatch loop's shape - accumulate a header, compute what comes
//! next from it, loop until a terminal state is hit - is grounded on
//! `qmonnet-dataplane/net/src/headers/mod.rs`'s `Headers::parse` loop. That
//! file threads a byte-granular cursor through a `match` per accumulated
//! header; this one threads a [`reader::BitReader`] through a `match` on a
//! small internal `Next` enum instead, since bit-field extraction (VLAN
//! PCP/DEI, MPLS label/TC/BoS, IPv4 flags/fragment offset, GRE flag bits,
//! GTP flags) needs sub-byte granularity the source's `Reader` doesn't
//! have.

pub mod error;
pub mod headers;
pub mod reader;

use crate::config::ParserConfig;
use crate::metrics::ParserMetrics;
use crate::protocol::IpProtocol;

use error::ParseError;
use headers::{
    EthernetHeader, GeneveHeader, GreHeader, GtpHeader, HeaderDescriptor, HeaderKind, IcmpHeader,
    Icmpv6Header, Ipv4Header, Ipv6ExtHeader, Ipv6Header, L2tpHeader, MplsLabelHeader, PppoeHeader,
    TcpHeader, TeredoHeader, UdpHeader, VlanHeader, VlanKind, VxlanHeader,
};
use reader::BitReader;
use std::net::{Ipv4Addr, Ipv6Addr};

/// The result of [`PacketParser::parse`]: the header chain discovered, and
/// the remaining unparsed bytes (the L7 payload, handed to the plugin
/// runtime).
#[derive(Debug, Clone)]
pub struct ParsedPacket<'a> {
    pub descriptors: Vec<HeaderDescriptor>,
    pub payload: &'a [u8],
}

impl<'a> ParsedPacket<'a> {
    /// The deepest descriptor of the given kind, if the chain contains one.
    /// Used by [`crate::cache::key::FlowKey`] assembly to find the
    /// innermost IPv4/IPv6/TCP/UDP/ICMP header.
    pub fn last_of(&self, kind: HeaderKind) -> Option<&HeaderDescriptor> {
        self.descriptors.iter().rev().find(|d| d.kind() == kind)
    }
}

/// Which IPv6-style extension header shape to parse: the generic
/// TLV-length shape (hop-by-hop, routing, destination options), the fixed
/// 8-byte fragment shape, or the AH shape (4-octet length units, SPI,
/// sequence).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExtKind {
    Generic,
    Fragment,
    Ah,
}

/// What to parse next. Threaded through [`PacketParser::run`]'s loop in
/// place of a named enum of parser states; each `parse_*` method both
/// pushes a descriptor for the header it just consumed and returns the
/// `Next` computed from that header's own fields.
#[derive(Debug, Clone, Copy)]
enum Next {
    Ethernet,
    Ethertype(u16),
    Vlan(VlanKind),
    Mpls,
    Pppoe,
    Ipv4,
    Ipv6,
    Ipv6Ext(ExtKind),
    Gre,
    L2tp,
    Vxlan,
    Geneve,
    Gtp,
    Teredo,
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    /// No further header recognized; the rest of the packet is opaque L7
    /// payload.
    Accept,
    /// The transition table's default arm was hit.
    Reject(&'static str),
}

fn dispatch_ethertype(ethertype: u16) -> Next {
    match ethertype {
        0x0800 => Next::Ipv4,
        0x86DD => Next::Ipv6,
        0x8100 => Next::Vlan(VlanKind::Dot1Q),
        0x88A8 => Next::Vlan(VlanKind::QinQ),
        0x88E7 => Next::Vlan(VlanKind::Ah),
        0x8847 | 0x8848 => Next::Mpls,
        0x8864 => Next::Pppoe,
        // PPPoE Discovery stage carries no IP payload at all; it is never
        // a valid continuation of a flow's data path.
        0x8863 => Next::Reject("ethertype_pppoe_discovery"),
        // Transparent Ethernet Bridging: GRE/Geneve's payload is itself an
        // Ethernet frame (NVGRE and similar overlays).
        0x6558 => Next::Ethernet,
        _ => Next::Reject("ethertype"),
    }
}

fn dispatch_ip_protocol(protocol: IpProtocol) -> Next {
    match protocol {
        IpProtocol::Tcp => Next::Tcp,
        IpProtocol::Udp => Next::Udp,
        IpProtocol::Icmp => Next::Icmp,
        IpProtocol::Ipv6Icmp => Next::Icmpv6,
        IpProtocol::HopOpt | IpProtocol::Ipv6Route | IpProtocol::Ipv6Opts => {
            Next::Ipv6Ext(ExtKind::Generic)
        }
        IpProtocol::Ipv6Frag => Next::Ipv6Ext(ExtKind::Fragment),
        IpProtocol::Ah => Next::Ipv6Ext(ExtKind::Ah),
        // ESP's payload is encrypted; Ipv6-NoNxt has no payload at all.
        IpProtocol::Esp | IpProtocol::Ipv6NoNxt => Next::Accept,
        IpProtocol::Gre => Next::Gre,
        IpProtocol::L2tp => Next::L2tp,
        IpProtocol::IpInIp => Next::Ipv4,
        IpProtocol::Ipv6 => Next::Ipv6,
        IpProtocol::MplsInIp => Next::Mpls,
        _ => Next::Accept,
    }
}

/// Per-type and total bounds on how many descriptors a single packet may
/// accumulate. Grounded on `spec.md` §3/§4.1's "configurable caps: default
/// 5 per type, 40 total links; on overflow the parser fails with
/// `OutOfMemory`."
#[derive(Debug, Clone, Copy)]
struct Budget {
    counts: [usize; HeaderKind::COUNT],
    total: usize,
}

impl Budget {
    fn new() -> Self {
        Self {
            counts: [0; HeaderKind::COUNT],
            total: 0,
        }
    }
}

fn push(
    config: &ParserConfig,
    descriptors: &mut Vec<HeaderDescriptor>,
    budget: &mut Budget,
    descriptor: HeaderDescriptor,
) -> Result<(), ParseError> {
    let kind = descriptor.kind();
    if budget.total >= config.max_descriptors_total {
        return Err(ParseError::OutOfMemory { pool: "total" });
    }
    if budget.counts[kind as usize] >= config.max_descriptors_per_type {
        return Err(ParseError::OutOfMemory { pool: kind.name() });
    }
    budget.counts[kind as usize] += 1;
    budget.total += 1;
    descriptors.push(descriptor);
    Ok(())
}

fn read_ipv4_addr(r: &mut BitReader) -> Result<Ipv4Addr, ParseError> {
    let bytes: [u8; 4] = r
        .read_bytes(4)?
        .try_into()
        .map_err(|_| ParseError::InvalidArgument)?;
    Ok(Ipv4Addr::from(bytes))
}

fn read_ipv6_addr(r: &mut BitReader) -> Result<Ipv6Addr, ParseError> {
    let bytes: [u8; 16] = r
        .read_bytes(16)?
        .try_into()
        .map_err(|_| ParseError::InvalidArgument)?;
    Ok(Ipv6Addr::from(bytes))
}

/// Decodes raw frames into a bounded chain of [`headers::HeaderDescriptor`]s.
///
/// ```
/// use flow_exporter::config::ParserConfig;
/// use flow_exporter::parser::PacketParser;
///
/// let parser = PacketParser::new(ParserConfig::default());
/// let err = parser.parse(&[0u8; 4]).unwrap_err();
/// assert!(format!("{err}").contains("too short"));
/// ```
#[derive(Debug)]
pub struct PacketParser {
    config: ParserConfig,
    metrics: ParserMetrics,
}

impl PacketParser {
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            metrics: ParserMetrics::new(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ParserMetrics {
        &self.metrics
    }

    /// Parse one frame, starting from its Ethernet header.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if the frame is too short for a field being
    /// extracted, a bounded descriptor pool is exhausted, or a dispatch
    /// table's default arm is hit.
    pub fn parse<'a>(&self, data: &'a [u8]) -> Result<ParsedPacket<'a>, ParseError> {
        let mut reader = BitReader::new(data);
        let mut descriptors = Vec::new();
        let mut budget = Budget::new();
        match self.run(&mut reader, &mut descriptors, &mut budget) {
            Ok(()) => {
                self.metrics.record_parsed(data.len() as u64);
                let payload_offset = descriptors
                    .last()
                    .map(HeaderDescriptor::offset)
                    .unwrap_or(0)
                    .min(data.len());
                Ok(ParsedPacket {
                    descriptors,
                    payload: &data[payload_offset..],
                })
            }
            Err(e) => {
                match e {
                    ParseError::OutOfMemory { .. } => self.metrics.record_out_of_memory(),
                    ParseError::PacketTooShort { .. } => self.metrics.record_too_short(),
                    _ => {}
                }
                self.metrics.record_rejected();
                Err(e)
            }
        }
    }

    fn run(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<(), ParseError> {
        let mut next = Next::Ethernet;
        // Bounded defensively; the per-type/total pool caps already bound
        // every loop body that pushes a descriptor, so this is never
        // expected to trip in practice.
        let iteration_cap = self.config.max_descriptors_total.saturating_mul(2) + 8;
        for _ in 0..iteration_cap {
            next = match next {
                Next::Ethernet => self.parse_ethernet(r, descriptors, budget)?,
                Next::Ethertype(et) => dispatch_ethertype(et),
                Next::Vlan(kind) => self.parse_vlan(r, descriptors, budget, kind)?,
                Next::Mpls => self.parse_mpls(r, descriptors, budget)?,
                Next::Pppoe => self.parse_pppoe(r, descriptors, budget)?,
                Next::Ipv4 => self.parse_ipv4(r, descriptors, budget)?,
                Next::Ipv6 => self.parse_ipv6(r, descriptors, budget)?,
                Next::Ipv6Ext(kind) => self.parse_ipv6_ext(r, descriptors, budget, kind)?,
                Next::Gre => self.parse_gre(r, descriptors, budget)?,
                Next::L2tp => self.parse_l2tp(r, descriptors, budget)?,
                Next::Vxlan => self.parse_vxlan(r, descriptors, budget)?,
                Next::Geneve => self.parse_geneve(r, descriptors, budget)?,
                Next::Gtp => self.parse_gtp(r, descriptors, budget)?,
                Next::Teredo => self.parse_teredo(r, descriptors, budget)?,
                Next::Tcp => self.parse_tcp(r, descriptors, budget)?,
                Next::Udp => self.parse_udp(r, descriptors, budget)?,
                Next::Icmp => self.parse_icmp(r, descriptors, budget)?,
                Next::Icmpv6 => self.parse_icmpv6(r, descriptors, budget)?,
                Next::Accept => {
                    let offset = r.byte_offset();
                    push(
                        &self.config,
                        descriptors,
                        budget,
                        HeaderDescriptor::Payload { offset },
                    )?;
                    return Ok(());
                }
                Next::Reject(state) => return Err(ParseError::DefaultReject { state }),
            };
        }
        Err(ParseError::ParserTimeout)
    }

    fn parse_ethernet(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let dst_mac: [u8; 6] = r
            .read_bytes(6)?
            .try_into()
            .map_err(|_| ParseError::InvalidArgument)?;
        let src_mac: [u8; 6] = r
            .read_bytes(6)?
            .try_into()
            .map_err(|_| ParseError::InvalidArgument)?;
        let ethertype = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Ethernet {
                offset,
                header: EthernetHeader {
                    dst_mac,
                    src_mac,
                    ethertype,
                },
            },
        )?;
        Ok(Next::Ethertype(ethertype))
    }

    fn parse_vlan(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
        kind: VlanKind,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let pcp = r.read_bits(3)? as u8;
        let dei = r.read_bits(1)? != 0;
        let vid = r.read_bits(12)? as u16;
        let inner_ethertype = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Vlan {
                offset,
                header: VlanHeader {
                    kind,
                    pcp,
                    dei,
                    vid,
                    inner_ethertype,
                },
            },
        )?;
        Ok(dispatch_ethertype(inner_ethertype))
    }

    fn parse_mpls(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let label = r.read_bits(20)? as u32;
        let tc = r.read_bits(3)? as u8;
        let bottom_of_stack = r.read_bits(1)? != 0;
        let ttl = r.read_u8()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Mpls {
                offset,
                header: MplsLabelHeader {
                    label,
                    tc,
                    bottom_of_stack,
                    ttl,
                },
            },
        )?;
        if !bottom_of_stack {
            return Ok(Next::Mpls);
        }
        // Bottom of stack: the payload's first nibble distinguishes an
        // IPv4 header (0x4) from an IPv6 header (0x6); a nibble of 0 is an
        // EoMPLS control word (4 bytes, then plain Ethernet resumes).
        match r.peek_bits(4)? {
            4 => Ok(Next::Ipv4),
            6 => Ok(Next::Ipv6),
            0 => {
                r.skip_bits(32)?;
                Ok(Next::Ethernet)
            }
            _ => Ok(Next::Reject("mpls_payload")),
        }
    }

    fn parse_pppoe(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let version = r.read_bits(4)? as u8;
        let type_field = r.read_bits(4)? as u8;
        let code = r.read_u8()?;
        let session_id = r.read_u16()?;
        let length = r.read_u16()?;
        let ppp_protocol = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Pppoe {
                offset,
                header: PppoeHeader {
                    version,
                    type_field,
                    code,
                    session_id,
                    length,
                    ppp_protocol,
                },
            },
        )?;
        match ppp_protocol {
            0x0021 => Ok(Next::Ipv4),
            0x0057 => Ok(Next::Ipv6),
            _ => Ok(Next::Reject("pppoe_protocol")),
        }
    }

    fn parse_ipv4(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let version = r.read_bits(4)?;
        if version != 4 {
            return Ok(Next::Reject("ipv4_version"));
        }
        let ihl = r.read_bits(4)? as u8;
        if ihl < 5 {
            return Ok(Next::Reject("ipv4_ihl"));
        }
        let dscp = r.read_bits(6)? as u8;
        let ecn = r.read_bits(2)? as u8;
        let total_length = r.read_u16()?;
        let identification = r.read_u16()?;
        let flags = r.read_bits(3)? as u8;
        let fragment_offset = r.read_bits(13)? as u16;
        let ttl = r.read_u8()?;
        let protocol = IpProtocol::from(r.read_u8()?);
        let checksum = r.read_u16()?;
        let src = read_ipv4_addr(r)?;
        let dst = read_ipv4_addr(r)?;
        r.skip_bits((ihl as usize - 5) * 32)?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Ipv4 {
                offset,
                header: Ipv4Header {
                    ihl,
                    dscp,
                    ecn,
                    total_length,
                    identification,
                    flags,
                    fragment_offset,
                    ttl,
                    protocol,
                    checksum,
                    src,
                    dst,
                },
            },
        )?;
        if fragment_offset != 0 {
            // Not the first fragment; the L4 header is not present here.
            return Ok(Next::Accept);
        }
        Ok(dispatch_ip_protocol(protocol))
    }

    fn parse_ipv6(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let version = r.read_bits(4)?;
        if version != 6 {
            return Ok(Next::Reject("ipv6_version"));
        }
        let traffic_class = r.read_bits(8)? as u8;
        let flow_label = r.read_bits(20)? as u32;
        let payload_length = r.read_u16()?;
        let next_header = IpProtocol::from(r.read_u8()?);
        let hop_limit = r.read_u8()?;
        let src = read_ipv6_addr(r)?;
        let dst = read_ipv6_addr(r)?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Ipv6 {
                offset,
                header: Ipv6Header {
                    traffic_class,
                    flow_label,
                    payload_length,
                    next_header,
                    hop_limit,
                    src,
                    dst,
                },
            },
        )?;
        Ok(dispatch_ip_protocol(next_header))
    }

    fn parse_ipv6_ext(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
        kind: ExtKind,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        match kind {
            ExtKind::Generic => {
                let next_header = IpProtocol::from(r.read_u8()?);
                let header_ext_len = r.read_u8()?;
                let total_len_bytes = (header_ext_len as usize + 1) * 8;
                r.skip_bits((total_len_bytes - 2) * 8)?;
                push(
                    &self.config,
                    descriptors,
                    budget,
                    HeaderDescriptor::Ipv6Ext {
                        offset,
                        header: Ipv6ExtHeader {
                            next_header,
                            header_ext_len,
                            total_len_bytes,
                        },
                    },
                )?;
                Ok(dispatch_ip_protocol(next_header))
            }
            ExtKind::Fragment => {
                let next_header = IpProtocol::from(r.read_u8()?);
                r.read_u8()?; // reserved
                let fragment_offset = r.read_bits(13)?;
                r.skip_bits(2)?; // reserved
                r.read_bits(1)?; // more-fragments, unused here
                r.read_u32()?; // identification
                push(
                    &self.config,
                    descriptors,
                    budget,
                    HeaderDescriptor::Ipv6Ext {
                        offset,
                        header: Ipv6ExtHeader {
                            next_header,
                            header_ext_len: 0,
                            total_len_bytes: 8,
                        },
                    },
                )?;
                if fragment_offset != 0 {
                    Ok(Next::Accept)
                } else {
                    Ok(dispatch_ip_protocol(next_header))
                }
            }
            ExtKind::Ah => {
                let next_header = IpProtocol::from(r.read_u8()?);
                let payload_len = r.read_u8()?;
                r.read_u16()?; // reserved
                r.read_u32()?; // SPI
                r.read_u32()?; // sequence
                let total_len_bytes = (payload_len as usize + 2) * 4;
                r.skip_bits((total_len_bytes - 12) * 8)?;
                push(
                    &self.config,
                    descriptors,
                    budget,
                    HeaderDescriptor::Ipv6Ext {
                        offset,
                        header: Ipv6ExtHeader {
                            next_header,
                            header_ext_len: payload_len,
                            total_len_bytes,
                        },
                    },
                )?;
                Ok(dispatch_ip_protocol(next_header))
            }
        }
    }

    fn parse_gre(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let raw = r.read_u16()?;
        let checksum_present = raw & 0x8000 != 0 || raw & 0x4000 != 0;
        let key_present = raw & 0x2000 != 0;
        let sequence_present = raw & 0x1000 != 0;
        let ack_flag = raw & 0x0080 != 0;
        let version = (raw & 0x0007) as u8;
        if version > 1 {
            return Ok(Next::Reject("gre_version"));
        }
        let protocol_type = r.read_u16()?;
        if checksum_present {
            r.read_u16()?; // checksum
            r.read_u16()?; // reserved1
        }
        let key = if key_present { Some(r.read_u32()?) } else { None };
        let sequence = if sequence_present {
            Some(r.read_u32()?)
        } else {
            None
        };
        let acknowledgment = if version == 1 && ack_flag {
            Some(r.read_u32()?)
        } else {
            None
        };
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Gre {
                offset,
                header: GreHeader {
                    version,
                    checksum_present,
                    key_present,
                    sequence_present,
                    protocol_type,
                    key,
                    sequence,
                    acknowledgment,
                },
            },
        )?;
        Ok(dispatch_ethertype(protocol_type))
    }

    fn parse_l2tp(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let raw = r.read_u16()?;
        let length_present = raw & 0x4000 != 0;
        let sequence_present = raw & 0x0800 != 0;
        let offset_present = raw & 0x0200 != 0;
        let version = (raw & 0x000F) as u8;
        let length = if length_present {
            Some(r.read_u16()?)
        } else {
            None
        };
        let tunnel_id = r.read_u16()?;
        let session_id = r.read_u16()?;
        if sequence_present {
            r.read_u16()?; // Ns
            r.read_u16()?; // Nr
        }
        if offset_present {
            let pad = r.read_u16()?;
            r.skip_bits(pad as usize * 8)?;
        }
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::L2tp {
                offset,
                header: L2tpHeader {
                    flags: raw,
                    version,
                    length,
                    tunnel_id,
                    session_id,
                },
            },
        )?;
        // L2TP's data payload (PPP-framed, or a pseudowire's native
        // payload for L2TPv3) is not decoded further.
        Ok(Next::Accept)
    }

    fn parse_vxlan(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let flags = r.read_u8()?;
        r.skip_bits(24)?; // reserved
        let vni = r.read_bits(24)? as u32;
        r.skip_bits(8)?; // reserved
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Vxlan {
                offset,
                header: VxlanHeader { flags, vni },
            },
        )?;
        // VXLAN always encapsulates a full Ethernet frame.
        Ok(Next::Ethernet)
    }

    fn parse_geneve(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let b0 = r.read_u8()?;
        let version = (b0 >> 6) & 0x3;
        let option_words = b0 & 0x3F;
        let b1 = r.read_u8()?;
        let oam = b1 & 0x80 != 0;
        let critical = b1 & 0x40 != 0;
        let protocol_type = r.read_u16()?;
        let vni = r.read_bits(24)? as u32;
        r.skip_bits(8)?; // reserved
        r.skip_bits(option_words as usize * 32)?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Geneve {
                offset,
                header: GeneveHeader {
                    version,
                    option_words,
                    oam,
                    critical,
                    protocol_type,
                    vni,
                },
            },
        )?;
        Ok(dispatch_ethertype(protocol_type))
    }

    fn parse_gtp(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        // First 3 bits select the version-specific sub-state without
        // consuming the byte; each sub-state re-reads it as part of its own
        // fixed header.
        match (r.peek_bits(8)? as u8) >> 5 {
            0 => self.parse_gtp_v0(r, descriptors, budget),
            1 => self.parse_gtp_v1(r, descriptors, budget),
            2 => self.parse_gtp_v2(r, descriptors, budget),
            _ => Ok(Next::Reject("gtp_version")),
        }
    }

    /// GTPv0's 20-byte fixed header: no optional-field flags, a 64-bit TID
    /// in place of GTPv1/v2's 32-bit TEID.
    fn parse_gtp_v0(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let b0 = r.read_u8()?;
        let version = (b0 >> 5) & 0x7;
        let protocol_type = (b0 >> 4) & 0x1;
        // res1 (3 bits) and snn (1 bit) carry no routing information.
        let message_type = r.read_u8()?;
        let length = r.read_u16()?;
        r.skip_bits(16)?; // seq_num
        r.skip_bits(16)?; // flow_label
        r.skip_bits(8)?; // sndcp_num
        r.skip_bits(24)?; // res2
        let tid = r.read_bits(64)?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Gtp {
                offset,
                header: GtpHeader {
                    version,
                    protocol_type,
                    message_type,
                    length,
                    teid: None,
                    tid: Some(tid),
                },
            },
        )?;
        self.gtp_continuation(r, message_type)
    }

    /// GTPv1's fixed header plus an optional 4-byte block (seq/npdu/next-ext)
    /// present whenever any of E/S/PN is set, and a chained sequence of
    /// extension headers when `E` is set.
    fn parse_gtp_v1(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let b0 = r.read_u8()?;
        let version = (b0 >> 5) & 0x7;
        let protocol_type = (b0 >> 4) & 0x1;
        // res (1 bit) carries no routing information.
        let extension_present = b0 & 0x04 != 0;
        let sequence_present = b0 & 0x02 != 0;
        let npdu_present = b0 & 0x01 != 0;
        let message_type = r.read_u8()?;
        let length = r.read_u16()?;
        let teid = r.read_u32()?;
        if extension_present || sequence_present || npdu_present {
            r.skip_bits(24)?; // seq_num (16) + npdu_num (8)
            if extension_present {
                loop {
                    let ext_len = r.peek_bits(8)? as usize;
                    if ext_len == 0 {
                        return Ok(Next::Reject("gtp_v1_extension_length"));
                    }
                    r.skip_bits(ext_len * 32 - 8)?;
                    let next_hdr = r.read_u8()?;
                    if next_hdr == 0 {
                        break;
                    }
                }
            } else {
                r.skip_bits(8)?; // next_ext_type byte, unused when E==0
            }
        }
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Gtp {
                offset,
                header: GtpHeader {
                    version,
                    protocol_type,
                    message_type,
                    length,
                    teid: Some(teid),
                    tid: None,
                },
            },
        )?;
        self.gtp_continuation(r, message_type)
    }

    /// GTPv2's fixed header: a TEID-presence flag gates an optional 32-bit
    /// TEID rather than GTPv1's sequence/extension machinery.
    fn parse_gtp_v2(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let b0 = r.read_u8()?;
        let version = (b0 >> 5) & 0x7;
        // piggy_flag (1 bit) and spare (3 bits) carry no routing information.
        let teid_present = b0 & 0x08 != 0;
        let message_type = r.read_u8()?;
        let length = r.read_u16()?;
        let teid = if teid_present {
            Some(r.read_u32()?)
        } else {
            None
        };
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Gtp {
                offset,
                header: GtpHeader {
                    version,
                    protocol_type: 0,
                    message_type,
                    length,
                    teid,
                    tid: None,
                },
            },
        )?;
        self.gtp_continuation(r, message_type)
    }

    // 0xFF is GTP-U's T-PDU message type, carrying a user IP packet.
    // Everything else (echo request/response, error indication, and the
    // GTP-C/GTP' control messages that share this header shape) carries no
    // encapsulated user payload worth descending into.
    fn gtp_continuation(&self, r: &mut BitReader, message_type: u8) -> Result<Next, ParseError> {
        if message_type == 0xFF {
            match r.peek_bits(4)? {
                4 => Ok(Next::Ipv4),
                6 => Ok(Next::Ipv6),
                _ => Ok(Next::Accept),
            }
        } else {
            Ok(Next::Accept)
        }
    }

    fn parse_teredo(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let first_nibble = (r.peek_bits(4)?) as u8;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Teredo {
                offset,
                header: TeredoHeader { first_nibble },
            },
        )?;
        if first_nibble == 6 {
            // An encapsulated IPv6 datagram.
            Ok(Next::Ipv6)
        } else {
            // A bubble or origin/authentication indication packet; no
            // encapsulated IP datagram follows.
            Ok(Next::Accept)
        }
    }

    fn parse_tcp(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let src_port = r.read_u16()?;
        let dst_port = r.read_u16()?;
        let sequence = r.read_u32()?;
        let acknowledgment = r.read_u32()?;
        let b = r.read_u8()?;
        let data_offset = b >> 4;
        let flags = r.read_u8()?;
        let window = r.read_u16()?;
        let checksum = r.read_u16()?;
        let urgent_pointer = r.read_u16()?;
        if data_offset < 5 {
            return Ok(Next::Reject("tcp_data_offset"));
        }
        r.skip_bits((data_offset as usize - 5) * 32)?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Tcp {
                offset,
                header: TcpHeader {
                    src_port,
                    dst_port,
                    sequence,
                    acknowledgment,
                    data_offset,
                    flags,
                    window,
                    checksum,
                    urgent_pointer,
                },
            },
        )?;
        Ok(Next::Accept)
    }

    fn parse_udp(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let src_port = r.read_u16()?;
        let dst_port = r.read_u16()?;
        let length = r.read_u16()?;
        let checksum = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Udp {
                offset,
                header: UdpHeader {
                    src_port,
                    dst_port,
                    length,
                    checksum,
                },
            },
        )?;
        let port_pair = [src_port, dst_port];
        if port_pair.contains(&4789) {
            Ok(Next::Vxlan)
        } else if port_pair.contains(&6081) {
            Ok(Next::Geneve)
        } else if port_pair.contains(&2152) || port_pair.contains(&2123) {
            Ok(Next::Gtp)
        } else if port_pair.contains(&3544) {
            Ok(Next::Teredo)
        } else if port_pair.contains(&1701) {
            Ok(Next::L2tp)
        } else {
            // Includes QUIC: the QUIC plugin recognizes Initial packets by
            // inspecting the UDP payload's own long-header form, not by
            // port number, so ordinary UDP traffic simply terminates here.
            Ok(Next::Accept)
        }
    }

    fn parse_icmp(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let icmp_type = r.read_u8()?;
        let code = r.read_u8()?;
        let checksum = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Icmp {
                offset,
                header: IcmpHeader {
                    icmp_type,
                    code,
                    checksum,
                },
            },
        )?;
        Ok(Next::Accept)
    }

    fn parse_icmpv6(
        &self,
        r: &mut BitReader,
        descriptors: &mut Vec<HeaderDescriptor>,
        budget: &mut Budget,
    ) -> Result<Next, ParseError> {
        let offset = r.byte_offset();
        let icmp_type = r.read_u8()?;
        let code = r.read_u8()?;
        let checksum = r.read_u16()?;
        push(
            &self.config,
            descriptors,
            budget,
            HeaderDescriptor::Icmpv6 {
                offset,
                header: Icmpv6Header {
                    icmp_type,
                    code,
                    checksum,
                },
            },
        )?;
        Ok(Next::Accept)
    }
}
