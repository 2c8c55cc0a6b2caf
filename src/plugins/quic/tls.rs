//! Minimal TLS 1.3 ClientHello parsing, just enough to pull the SNI and
//! a transport-parameter marker out of the CRYPTO frame payload carried
//! inside a QUIC Initial packet.
//!
//! Grounded on `original_source/plugins/quic.c`'s ClientHello walk: it
//! does not implement a general TLS parser, only enough extension
//! walking to reach `server_name` (0x0000) and the QUIC transport
//! parameters extension (ids 0x0039 / 0xffa5 / 0x0026 across drafts),
//! inside which it looks for the Google UA parameter (id 0x3129).

use crate::plugins::varint::decode_varint;

const SNI_MAX: usize = 255;
const GOOGLE_UA_MAX: usize = 255;

const EXT_SERVER_NAME: u16 = 0x0000;
const TRANSPORT_PARAM_EXT_IDS: [u16; 3] = [0x0039, 0xffa5, 0x0026];
const GOOGLE_UA_PARAM_ID: u64 = 0x3129;

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn read_u24(buf: &[u8], at: usize) -> Option<usize> {
    buf.get(at..at + 3).map(|b| (usize::from(b[0]) << 16) | (usize::from(b[1]) << 8) | usize::from(b[2]))
}

/// Extracted fields of interest from a ClientHello. Any field this parser
/// doesn't reach stays `None`; a malformed ClientHello yields an entirely
/// empty result rather than a partial one with garbage in it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientHelloInfo {
    pub server_name: Option<String>,
    pub google_ua: Option<String>,
}

/// Walks a reassembled CRYPTO-frame buffer looking for a single TLS
/// Handshake record containing a ClientHello, and extracts the SNI and
/// Google UA transport parameter from it.
pub fn parse_client_hello(buf: &[u8]) -> Option<ClientHelloInfo> {
    // Handshake header: msg_type(1) == 1 (client_hello), length(3).
    if buf.first()? != &1 {
        return None;
    }
    let body_len = read_u24(buf, 1)?;
    let body = buf.get(4..4 + body_len)?;

    // legacy_version(2) + random(32) + session_id (1 + up to 32).
    let mut pos = 2 + 32;
    let session_id_len = usize::from(*body.get(pos)?);
    pos += 1 + session_id_len;

    // cipher_suites: length(2) + data.
    let cs_len = usize::from(read_u16(body, pos)?);
    pos += 2 + cs_len;

    // compression_methods: length(1) + data.
    let cm_len = usize::from(*body.get(pos)?);
    pos += 1 + cm_len;

    // extensions: length(2) + data.
    let ext_total_len = usize::from(read_u16(body, pos)?);
    pos += 2;
    let extensions = body.get(pos..pos + ext_total_len)?;

    let mut info = ClientHelloInfo::default();
    let mut ext_pos = 0;
    while ext_pos + 4 <= extensions.len() {
        let ext_type = read_u16(extensions, ext_pos)?;
        let ext_len = usize::from(read_u16(extensions, ext_pos + 2)?);
        let ext_data = extensions.get(ext_pos + 4..ext_pos + 4 + ext_len)?;

        if ext_type == EXT_SERVER_NAME {
            info.server_name = parse_server_name(ext_data);
        } else if TRANSPORT_PARAM_EXT_IDS.contains(&ext_type) {
            info.google_ua = find_google_ua(ext_data);
        }

        ext_pos += 4 + ext_len;
    }

    Some(info)
}

fn parse_server_name(ext_data: &[u8]) -> Option<String> {
    // server_name_list length(2), then entries of {type(1), length(2), name}.
    let list_len = usize::from(read_u16(ext_data, 0)?);
    let list = ext_data.get(2..2 + list_len)?;
    let mut pos = 0;
    while pos + 3 <= list.len() {
        let name_type = list[pos];
        let name_len = usize::from(read_u16(list, pos + 1)?);
        let name = list.get(pos + 3..pos + 3 + name_len)?;
        if name_type == 0 {
            return Some(String::from_utf8_lossy(name).chars().take(SNI_MAX).collect());
        }
        pos += 3 + name_len;
    }
    None
}

/// QUIC transport parameters are a flat sequence of `(varint id, varint
/// length, value)` triples (RFC 9000 §18.2).
fn find_google_ua(params: &[u8]) -> Option<String> {
    let mut pos = 0;
    while pos < params.len() {
        let (id, id_len) = decode_varint(&params[pos..])?;
        pos += id_len;
        let (len, len_len) = decode_varint(&params[pos..])?;
        pos += len_len;
        let value = params.get(pos..pos + len as usize)?;
        if id == GOOGLE_UA_PARAM_ID {
            return Some(String::from_utf8_lossy(value).chars().take(GOOGLE_UA_MAX).collect());
        }
        pos += len as usize;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_client_hello(sni: &str, ua_param: Option<&[u8]>) -> Vec<u8> {
        let mut server_name_entry = Vec::new();
        server_name_entry.push(0u8); // host_name
        server_name_entry.extend_from_slice(&(sni.len() as u16).to_be_bytes());
        server_name_entry.extend_from_slice(sni.as_bytes());

        let mut sni_list = Vec::new();
        sni_list.extend_from_slice(&(server_name_entry.len() as u16).to_be_bytes());
        sni_list.extend_from_slice(&server_name_entry);

        let mut extensions = Vec::new();
        extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&(sni_list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&sni_list);

        if let Some(ua) = ua_param {
            let mut params = Vec::new();
            // id = 0x3129 as a 4-byte varint (top 2 bits = 10 -> 4 byte).
            params.extend_from_slice(&[0x80, 0x00, 0x31, 0x29]);
            params.push(ua.len() as u8); // 1-byte varint length
            params.extend_from_slice(ua);

            extensions.extend_from_slice(&0x0039u16.to_be_bytes());
            extensions.extend_from_slice(&(params.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&params);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]); // legacy_version
        body.extend_from_slice(&[0u8; 32]); // random
        body.push(0); // session_id length
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]); // cipher_suites
        body.push(1); // compression_methods length
        body.push(0);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut out = Vec::new();
        out.push(1); // client_hello
        let len = body.len();
        out.push((len >> 16) as u8);
        out.push((len >> 8) as u8);
        out.push(len as u8);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn extracts_sni() {
        let buf = build_client_hello("example.com", None);
        let info = parse_client_hello(&buf).unwrap();
        assert_eq!(info.server_name.as_deref(), Some("example.com"));
    }

    #[test]
    fn extracts_google_ua_param() {
        let buf = build_client_hello("example.com", Some(b"Chrome"));
        let info = parse_client_hello(&buf).unwrap();
        assert_eq!(info.google_ua.as_deref(), Some("Chrome"));
    }

    #[test]
    fn rejects_non_client_hello() {
        assert!(parse_client_hello(&[0x02, 0, 0, 0]).is_none());
    }
}
