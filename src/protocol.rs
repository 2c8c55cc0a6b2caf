//! IANA IP protocol numbers.
//!
//! Used to tag the L4 protocol in both [`crate::parser::headers::HeaderDescriptor`]
//! and [`crate::cache::key::FlowKey`]. The enum carries the full IANA
//! assignment table, since header bytes flow through
//! [`crate::parser::reader::BitReader`] rather than a byte-wise derive
//! macro.

use serde::Serialize;

#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Serialize)]
pub enum IpProtocol {
    HopOpt = 0,
    Icmp = 1,
    Igmp = 2,
    Ggp = 3,
    IpInIp = 4,
    St = 5,
    Tcp = 6,
    Cbt = 7,
    Egp = 8,
    Igp = 9,
    BbnRccMon = 10,
    NvpII = 11,
    Pup = 12,
    Argus = 13,
    Emcon = 14,
    Xnet = 15,
    Chaos = 16,
    Udp = 17,
    Mux = 18,
    DcnMeas = 19,
    Hmp = 20,
    Prm = 21,
    XnsIdp = 22,
    Trunk1 = 23,
    Trunk2 = 24,
    Leaf1 = 25,
    Leaf2 = 26,
    Rdp = 27,
    Irtp = 28,
    IsoTp4 = 29,
    Netblt = 30,
    MfeNsp = 31,
    MeritInp = 32,
    Dccp = 33,
    ThreePc = 34,
    Idpr = 35,
    Xtp = 36,
    Ddp = 37,
    IdprCmtp = 38,
    TpPlusPlus = 39,
    Il = 40,
    Ipv6 = 41,
    Sdrp = 42,
    Ipv6Route = 43,
    Ipv6Frag = 44,
    Idrp = 45,
    Rsvp = 46,
    Gre = 47,
    Dsr = 48,
    Bna = 49,
    Esp = 50,
    Ah = 51,
    INlsp = 52,
    Swipe = 53,
    Narp = 54,
    Mobile = 55,
    Tlsp = 56,
    Skip = 57,
    Ipv6Icmp = 58,
    Ipv6NoNxt = 59,
    Ipv6Opts = 60,
    Cftp = 62,
    SatExpak = 64,
    Kryptolan = 65,
    Rvd = 66,
    Ippc = 67,
    SatMon = 69,
    Visa = 70,
    Ipcv = 71,
    Cpnx = 72,
    Cphb = 73,
    Wsn = 74,
    Pvp = 75,
    BrSatMon = 76,
    SunNd = 77,
    WbMon = 78,
    WbExpak = 79,
    IsoIp = 80,
    Vmtp = 81,
    SecureVmtp = 82,
    Vines = 83,
    NsfnetIgp = 85,
    Dgp = 86,
    Tcf = 87,
    Eigrp = 88,
    OspfIgp = 89,
    SpriteRpc = 90,
    Larp = 91,
    Mtp = 92,
    Ax25 = 93,
    IpIp = 94,
    Micp = 95,
    SccSp = 96,
    EtherIp = 97,
    Encap = 98,
    Gmtp = 100,
    Ifmp = 101,
    Pnni = 102,
    Pim = 103,
    Aris = 104,
    Scps = 105,
    Qnx = 106,
    An = 107,
    IpComp = 108,
    Snp = 109,
    CompaqPeer = 110,
    IpxInIp = 111,
    Vrrp = 112,
    Pgm = 113,
    L2tp = 115,
    Ddx = 116,
    Iatp = 117,
    Stp = 118,
    Srp = 119,
    Uti = 120,
    Smp = 121,
    Sm = 122,
    Ptp = 123,
    IsisOverIpv4 = 124,
    Fire = 125,
    Crtp = 126,
    Crudp = 127,
    SscopMce = 128,
    Iplt = 129,
    Sps = 130,
    Pipe = 131,
    Sctp = 132,
    Fc = 133,
    MobilityHeader = 135,
    UdpLite = 136,
    MplsInIp = 137,
    Manet = 138,
    Hip = 139,
    Shim6 = 140,
    Wesp = 141,
    Rohc = 142,
    Ethernet = 143,
    AggFrag = 144,
    Unknown = 254,
    Reserved = 255,
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            0 => IpProtocol::HopOpt,
            1 => IpProtocol::Icmp,
            2 => IpProtocol::Igmp,
            3 => IpProtocol::Ggp,
            4 => IpProtocol::IpInIp,
            5 => IpProtocol::St,
            6 => IpProtocol::Tcp,
            7 => IpProtocol::Cbt,
            8 => IpProtocol::Egp,
            9 => IpProtocol::Igp,
            17 => IpProtocol::Udp,
            41 => IpProtocol::Ipv6,
            43 => IpProtocol::Ipv6Route,
            44 => IpProtocol::Ipv6Frag,
            46 => IpProtocol::Rsvp,
            47 => IpProtocol::Gre,
            50 => IpProtocol::Esp,
            51 => IpProtocol::Ah,
            58 => IpProtocol::Ipv6Icmp,
            59 => IpProtocol::Ipv6NoNxt,
            60 => IpProtocol::Ipv6Opts,
            88 => IpProtocol::Eigrp,
            89 => IpProtocol::OspfIgp,
            94 => IpProtocol::IpIp,
            97 => IpProtocol::EtherIp,
            103 => IpProtocol::Pim,
            108 => IpProtocol::IpComp,
            112 => IpProtocol::Vrrp,
            115 => IpProtocol::L2tp,
            132 => IpProtocol::Sctp,
            137 => IpProtocol::MplsInIp,
            255 => IpProtocol::Reserved,
            _ => IpProtocol::Unknown,
        }
    }
}

impl IpProtocol {
    /// Raw on-wire protocol number, used when assembling [`crate::cache::key::FlowKey`] bytes.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
