//! SMTP command/reply recognition.
//!
//! Grounded on `original_source/plugins/smtp.c`'s reply-code histogram and
//! command-keyword scan. Only active on flows whose src or dst port is 25,
//! per `spec.md` §4.3.2. Reply lines are only recognized when the first
//! four bytes match the pattern `DDDS` (three decimal digits, then a space
//! or a hyphen for a multi-line reply); anything else on an SMTP-port flow
//! is ignored rather than misparsed.

use serde::Serialize;

use crate::cache::record::FlowRecord;
use crate::plugins::{ActionFlags, FlowExtension, Plugin};
use crate::time::Timestamp;

const DOMAIN_MAX: usize = 255;
const SENDER_MAX: usize = 255;
const RECIPIENT_MAX: usize = 255;

/// Bit positions within [`SmtpExtension::code_flags`], one per reply code
/// `spec.md` §4.3.2 calls out by literal value, plus two catch-alls.
const CODE_BITS: [(u16, u32); 24] = [
    (211, 0),
    (214, 1),
    (220, 2),
    (221, 3),
    (250, 4),
    (251, 5),
    (252, 6),
    (354, 7),
    (421, 8),
    (450, 9),
    (451, 10),
    (452, 11),
    (455, 12),
    (500, 13),
    (501, 14),
    (502, 15),
    (503, 16),
    (504, 17),
    (550, 18),
    (551, 19),
    (552, 20),
    (553, 21),
    (554, 22),
    (555, 23),
];
const CODE_BIT_SPAM: u32 = 24;
const CODE_BIT_UNKNOWN: u32 = 25;

const COMMAND_BITS: [(&[u8], u32); 11] = [
    (b"EHLO", 0),
    (b"HELO", 1),
    (b"MAIL", 2),
    (b"RCPT", 3),
    (b"DATA", 4),
    (b"RSET", 5),
    (b"VRFY", 6),
    (b"EXPN", 7),
    (b"HELP", 8),
    (b"NOOP", 9),
    (b"QUIT", 10),
];
const COMMAND_BIT_UNKNOWN: u32 = 11;

/// Caps at `max` *bytes* (matching the original's fixed-size `char[]`
/// buffers), not `max` Unicode scalars, truncating at the last valid UTF-8
/// boundary at or before that byte budget.
fn truncate_str(bytes: &[u8], max: usize) -> String {
    let lossy = String::from_utf8_lossy(bytes);
    let cut = floor_char_boundary(&lossy, max);
    lossy[..cut].to_string()
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

/// Per-flow SMTP state, attached via [`FlowExtension::Smtp`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SmtpExtension {
    pub domain: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub mail_cmd_cnt: u32,
    pub mail_rcpt_cnt: u32,
    pub data_transfer: bool,
    pub code_flags: u32,
    pub command_flags: u32,
    pub reply_2xx: u32,
    pub reply_3xx: u32,
    pub reply_4xx: u32,
    pub reply_5xx: u32,
}

fn split_lines(payload: &[u8]) -> impl Iterator<Item = &[u8]> {
    payload.split(|&b| b == b'\n').map(|line| {
        if line.last() == Some(&b'\r') {
            &line[..line.len() - 1]
        } else {
            line
        }
    })
}

fn parse_reply_code(line: &[u8]) -> Option<u16> {
    if line.len() < 4 || !line[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if line[3] != b' ' && line[3] != b'-' {
        return None;
    }
    std::str::from_utf8(&line[..3]).ok()?.parse().ok()
}

fn contains_spam(line: &[u8]) -> bool {
    line.windows(4).any(|w| w.eq_ignore_ascii_case(b"spam"))
}

fn handle_reply(ext: &mut SmtpExtension, code: u16, line: &[u8]) {
    match code / 100 {
        2 => ext.reply_2xx += 1,
        3 => ext.reply_3xx += 1,
        4 => ext.reply_4xx += 1,
        5 => ext.reply_5xx += 1,
        _ => {}
    }
    match CODE_BITS.iter().find(|(c, _)| *c == code) {
        Some((_, bit)) => ext.code_flags |= 1 << bit,
        None => ext.code_flags |= 1 << CODE_BIT_UNKNOWN,
    }
    if contains_spam(line) {
        ext.code_flags |= 1 << CODE_BIT_SPAM;
    }
}

fn handle_command(ext: &mut SmtpExtension, line: &[u8]) {
    if line.len() < 4 {
        ext.command_flags |= 1 << COMMAND_BIT_UNKNOWN;
        return;
    }
    let verb = &line[..4];
    match COMMAND_BITS.iter().find(|(c, _)| c.eq_ignore_ascii_case(verb)) {
        Some((_, bit)) => ext.command_flags |= 1 << bit,
        None => {
            ext.command_flags |= 1 << COMMAND_BIT_UNKNOWN;
            return;
        }
    }

    let rest = line[4..].trim_ascii_start();
    if verb.eq_ignore_ascii_case(b"HELO") || verb.eq_ignore_ascii_case(b"EHLO") {
        if ext.domain.is_none() {
            ext.domain = Some(truncate_str(rest, DOMAIN_MAX));
        }
    } else if verb.eq_ignore_ascii_case(b"MAIL") {
        ext.mail_cmd_cnt += 1;
        if ext.sender.is_none() {
            ext.sender = Some(truncate_str(rest, SENDER_MAX));
        }
    } else if verb.eq_ignore_ascii_case(b"RCPT") {
        ext.mail_rcpt_cnt += 1;
        if ext.recipient.is_none() {
            ext.recipient = Some(truncate_str(rest, RECIPIENT_MAX));
        }
    } else if verb.eq_ignore_ascii_case(b"DATA") {
        ext.data_transfer = true;
    }
}

#[derive(Debug, Default)]
pub struct SmtpPlugin;

impl SmtpPlugin {
    pub fn new() -> Self {
        Self
    }

    fn active(&self, flow: &FlowRecord) -> bool {
        flow.src_port == 25 || flow.dst_port == 25
    }

    fn run(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8]) -> ActionFlags {
        if !self.active(flow) {
            return ActionFlags::NONE;
        }
        let mut ext = match flow.extension(plugin_id) {
            Some(FlowExtension::Smtp(e)) => e.clone(),
            _ => SmtpExtension::default(),
        };

        for line in split_lines(payload) {
            if line.is_empty() {
                continue;
            }
            if ext.data_transfer {
                if line == b"." {
                    ext.data_transfer = false;
                }
                continue;
            }
            if let Some(code) = parse_reply_code(line) {
                handle_reply(&mut ext, code, line);
            } else {
                handle_command(&mut ext, line);
            }
        }

        flow.set_extension(plugin_id, FlowExtension::Smtp(ext));
        ActionFlags::NONE
    }
}

impl Plugin for SmtpPlugin {
    fn name(&self) -> &'static str {
        "smtp"
    }

    fn post_create(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], _at: Timestamp) -> ActionFlags {
        self.run(plugin_id, flow, payload)
    }

    fn pre_update(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], _at: Timestamp) -> ActionFlags {
        self.run(plugin_id, flow, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::FlowFields;
    use crate::protocol::IpProtocol;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_flow() -> FlowRecord {
        let mut flow = FlowRecord::new(1);
        flow.populate_identity(
            1,
            0,
            Timestamp::ZERO,
            &FlowFields {
                protocol: IpProtocol::Tcp,
                src_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                dst_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                src_port: 5000,
                dst_port: 25,
                tos: 0,
                ttl: 64,
                src_mac: [0; 6],
                dst_mac: [0; 6],
                ip_total_len: 0,
                tcp_flags: None,
            },
        );
        flow
    }

    #[test]
    fn inactive_off_port_25() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        flow.dst_port = 8025;
        plugin.post_create(0, &mut flow, b"HELO relay.example.com\r\n", Timestamp::ZERO);
        assert!(flow.extension(0).is_none());
    }

    #[test]
    fn captures_helo_domain_and_command_flag() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        plugin.post_create(0, &mut flow, b"HELO relay.example.com\r\n", Timestamp::ZERO);
        let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
            panic!("expected an SMTP extension");
        };
        assert_eq!(ext.domain.as_deref(), Some("relay.example.com"));
        assert_ne!(ext.command_flags & (1 << 1), 0);
    }

    #[test]
    fn captures_mail_from_and_rcpt_to_once_each() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        plugin.post_create(
            0,
            &mut flow,
            b"MAIL FROM:<a@example.com>\r\nRCPT TO:<b@example.com>\r\nRCPT TO:<c@example.com>\r\n",
            Timestamp::ZERO,
        );
        let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
            panic!("expected an SMTP extension");
        };
        assert_eq!(ext.sender.as_deref(), Some("<a@example.com>"));
        assert_eq!(ext.recipient.as_deref(), Some("<b@example.com>"));
        assert_eq!(ext.mail_rcpt_cnt, 2);
    }

    #[test]
    fn data_transfer_cleared_on_dot_line() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        plugin.post_create(0, &mut flow, b"DATA\r\n", Timestamp::ZERO);
        {
            let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
                panic!("expected an SMTP extension");
            };
            assert!(ext.data_transfer);
        }
        plugin.pre_update(0, &mut flow, b"body line\r\n.\r\n", Timestamp::ZERO);
        let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
            panic!("expected an SMTP extension");
        };
        assert!(!ext.data_transfer);
    }

    #[test]
    fn reply_code_histogram_and_spam_flag() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        plugin.post_create(0, &mut flow, b"250 OK\r\n550 SPAM detected\r\n", Timestamp::ZERO);
        let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
            panic!("expected an SMTP extension");
        };
        assert_eq!(ext.reply_2xx, 1);
        assert_eq!(ext.reply_5xx, 1);
        assert_ne!(ext.code_flags & (1 << CODE_BIT_SPAM), 0);
    }

    #[test]
    fn reply_code_bit_and_spam_bit_are_independent() {
        let plugin = SmtpPlugin::new();
        let mut flow = test_flow();
        plugin.post_create(0, &mut flow, b"550 SPAM detected\r\n", Timestamp::ZERO);
        let Some(FlowExtension::Smtp(ext)) = flow.extension(0) else {
            panic!("expected an SMTP extension");
        };
        let code_550_bit = CODE_BITS.iter().find(|(c, _)| *c == 550).unwrap().1;
        assert_ne!(ext.code_flags & (1 << code_550_bit), 0);
        assert_ne!(ext.code_flags & (1 << CODE_BIT_SPAM), 0);
    }

    #[test]
    fn truncate_str_caps_by_bytes_not_chars() {
        let s = "éééééé";
        assert_eq!(s.len(), 12);
        let truncated = truncate_str(s.as_bytes(), 5);
        assert!(truncated.len() <= 5);
        assert_eq!(truncated, "éé");
    }
}
