//! HTTP/1.x request/response recognition.
//!
//! Grounded on `original_source/plugins/http.c`'s line-oriented CRLF scan:
//! the first line of a payload is matched against a fixed set of request
//! method prefixes or the `"HTTP"` response prefix, and a handful of
//! headers are copied into bounded buffers. `spec.md` §4.3.1 specifies
//! this plugin is stateless per packet (it doesn't reassemble TCP streams),
//! so each call inspects only the payload handed to it.

use serde::Serialize;

use crate::cache::record::FlowRecord;
use crate::plugins::{ActionFlags, FlowExtension, Plugin};
use crate::time::Timestamp;

const METHOD_MAX: usize = 10;
const URI_MAX: usize = 128;
const HOST_MAX: usize = 64;
const UA_MAX: usize = 128;
const REFERER_MAX: usize = 128;
const CONTENT_TYPE_MAX: usize = 32;

const REQUEST_PREFIXES: [&[u8]; 9] = [
    b"GET ", b"POST", b"PUT ", b"HEAD", b"DELE", b"TRAC", b"OPTI", b"CONN", b"PATC",
];
const RESPONSE_PREFIX: &[u8] = b"HTTP";

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

/// Per-flow HTTP state, attached to a [`FlowRecord`] via
/// [`FlowExtension::Http`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct HttpExtension {
    pub method: Option<String>,
    pub uri: Option<String>,
    pub host: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub status: Option<u16>,
    pub content_type: Option<String>,
    has_request: bool,
    has_response: bool,
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

fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    if line.len() <= name.len() || !line[..name.len()].eq_ignore_ascii_case(name) {
        return None;
    }
    let rest = &line[name.len()..];
    if rest.first() != Some(&b':') {
        return None;
    }
    let mut value = &rest[1..];
    while value.first() == Some(&b' ') {
        value = &value[1..];
    }
    Some(value)
}

fn parse_into(ext: &mut HttpExtension, payload: &[u8]) -> bool {
    let mut lines = split_lines(payload);
    let Some(first_line) = lines.next() else {
        return false;
    };

    let is_request = REQUEST_PREFIXES
        .iter()
        .any(|p| first_line.len() >= p.len() && &first_line[..p.len()] == *p);
    let is_response = first_line.len() >= RESPONSE_PREFIX.len() && &first_line[..RESPONSE_PREFIX.len()] == RESPONSE_PREFIX;

    if !is_request && !is_response {
        return false;
    }

    if is_request {
        let mut parts = first_line.splitn(3, |&b| b == b' ');
        if let Some(method) = parts.next() {
            ext.method = Some(truncate_str(method, METHOD_MAX));
        }
        if let Some(uri) = parts.next() {
            ext.uri = Some(truncate_str(uri, URI_MAX));
        }
    } else {
        let mut parts = first_line.splitn(3, |&b| b == b' ');
        parts.next();
        if let Some(code) = parts.next() {
            if let Ok(code_str) = std::str::from_utf8(code) {
                ext.status = code_str.trim().parse::<u16>().ok();
            }
        }
    }

    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some(v) = header_value(line, b"Host") {
            ext.host = Some(truncate_str(v, HOST_MAX));
        } else if let Some(v) = header_value(line, b"User-Agent") {
            ext.user_agent = Some(truncate_str(v, UA_MAX));
        } else if let Some(v) = header_value(line, b"Referer") {
            ext.referer = Some(truncate_str(v, REFERER_MAX));
        } else if let Some(v) = header_value(line, b"Content-Type") {
            ext.content_type = Some(truncate_str(v, CONTENT_TYPE_MAX));
        }
    }

    if is_request {
        ext.has_request = true;
    } else {
        ext.has_response = true;
    }
    true
}

#[derive(Debug, Default)]
pub struct HttpPlugin;

impl HttpPlugin {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8]) -> ActionFlags {
        let mut ext = match flow.extension(plugin_id) {
            Some(FlowExtension::Http(e)) => e.clone(),
            _ => HttpExtension::default(),
        };

        let mut lines = split_lines(payload);
        let Some(first_line) = lines.next() else {
            return ActionFlags::NONE;
        };
        let is_request = REQUEST_PREFIXES
            .iter()
            .any(|p| first_line.len() >= p.len() && &first_line[..p.len()] == *p);
        let is_response = first_line.len() >= RESPONSE_PREFIX.len() && &first_line[..RESPONSE_PREFIX.len()] == RESPONSE_PREFIX;

        // A second request or response seen on a flow that already
        // recorded one is a pipelined exchange; flush the existing flow
        // rather than overwrite its fields.
        let pipelined = (is_request && ext.has_request) || (is_response && ext.has_response);

        if !parse_into(&mut ext, payload) {
            return ActionFlags::NONE;
        }
        flow.set_extension(plugin_id, FlowExtension::Http(ext));

        if pipelined {
            ActionFlags::FLUSH
        } else {
            ActionFlags::NONE
        }
    }
}

impl Plugin for HttpPlugin {
    fn name(&self) -> &'static str {
        "http"
    }

    fn post_create(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], _at: Timestamp) -> ActionFlags {
        self.run(plugin_id, flow, payload)
    }

    fn pre_update(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], _at: Timestamp) -> ActionFlags {
        self.run(plugin_id, flow, payload)
    }
}
