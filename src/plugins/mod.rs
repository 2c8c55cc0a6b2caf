//! L7 plugin runtime.
//!
//! A plugin is called once when its flow is created and once per
//! subsequent packet; a small registry runs every registered plugin in a
//! fixed order rather than short-circuiting on the first match.
//! `ActionFlags` is a hand-rolled bitfield rather than reaching for the
//! `bitflags` crate, matching how bit masks are built elsewhere in this
//! crate.

pub mod http;
pub mod quic;
pub mod smtp;
pub mod varint;

use serde::Serialize;

use crate::cache::record::FlowRecord;
use crate::time::Timestamp;

pub use http::{HttpExtension, HttpPlugin};
pub use quic::{QuicExtension, QuicPlugin};
pub use smtp::{SmtpExtension, SmtpPlugin};

/// Bits a [`Plugin`] method may return, OR-accumulated across every
/// registered plugin's call for one packet (run-all, not short-circuit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionFlags(u8);

impl ActionFlags {
    pub const NONE: ActionFlags = ActionFlags(0b00);
    /// Export the flow immediately, then feed this packet into a fresh
    /// `add_packet` call so it is not lost.
    pub const FLUSH: ActionFlags = ActionFlags(0b01);
    /// Export the flow immediately; this packet is not reinserted.
    pub const EXPORT: ActionFlags = ActionFlags(0b10);

    pub fn contains(self, other: ActionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn union(self, other: ActionFlags) -> ActionFlags {
        ActionFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for ActionFlags {
    type Output = ActionFlags;
    fn bitor(self, rhs: ActionFlags) -> ActionFlags {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for ActionFlags {
    fn bitor_assign(&mut self, rhs: ActionFlags) {
        *self = self.union(rhs);
    }
}

/// A single L7 inspector, registered into a [`PluginRuntime`] at a dense
/// integer id equal to its registration index.
///
/// Per `spec.md` §7, a plugin's own parse failures are swallowed: it simply
/// returns [`ActionFlags::NONE`] and leaves the flow's extension slot
/// untouched rather than propagating an error.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once, the first time this plugin is run against a flow
    /// (i.e. on the packet that created the flow).
    fn post_create(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], at: Timestamp) -> ActionFlags;

    /// Called on every subsequent packet for a flow this plugin has
    /// already seen.
    fn pre_update(&self, plugin_id: usize, flow: &mut FlowRecord, payload: &[u8], at: Timestamp) -> ActionFlags;

    /// Called when a flow carrying this plugin's extension is exported, so
    /// the plugin can observe final state before the extension is dropped.
    /// Most plugins have nothing to do here.
    fn close(&self, _flow: &FlowRecord, _extension: &FlowExtension) {}
}

/// Tagged union of every plugin's per-flow record. One dense integer id
/// per registered plugin (`FlowRecord::extension`/`set_extension` index),
/// per `spec.md` §3's "linked list of FlowExtension values...identified by
/// a dense integer id".
#[derive(Debug, Clone, Serialize)]
pub enum FlowExtension {
    Http(HttpExtension),
    Smtp(SmtpExtension),
    Quic(QuicExtension),
}

/// Names the plugin registry's possible members, matching `spec.md` §6's
/// CLI surface (`{basic, http, smtp, https, ntp, sip}`). `Ntp` and `Sip` are
/// named but have no corresponding [`Plugin`] impl; they exist so callers
/// matching on this enum stay exhaustive as the registry grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    Basic,
    Http,
    Smtp,
    Https,
    Ntp,
    Sip,
}

impl PluginKind {
    pub fn name(self) -> &'static str {
        match self {
            PluginKind::Basic => "basic",
            PluginKind::Http => "http",
            PluginKind::Smtp => "smtp",
            PluginKind::Https => "https",
            PluginKind::Ntp => "ntp",
            PluginKind::Sip => "sip",
        }
    }

    /// Whether this kind has a [`Plugin`] implementation in this crate.
    /// `Ntp`/`Sip` are registry placeholders only.
    pub fn is_implemented(self) -> bool {
        !matches!(self, PluginKind::Ntp | PluginKind::Sip)
    }
}

/// The set of registered plugins, run in registration order against every
/// packet handed to [`crate::cache::FlowCache::add_packet`].
pub struct PluginRuntime {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRuntime {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// Registers a plugin, returning its dense extension id.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> usize {
        let id = self.plugins.len();
        self.plugins.push(plugin);
        id
    }

    pub fn extension_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|p| p.name())
    }

    /// Runs every registered plugin's `post_create` against a freshly
    /// created flow, OR-ing their returned flags. Per `spec.md` §4.3 this
    /// always runs every plugin; a plugin returning `FLUSH`/`EXPORT` does
    /// not stop the others from being called.
    pub fn post_create(&self, flow: &mut FlowRecord, payload: &[u8], at: Timestamp) -> ActionFlags {
        let mut acc = ActionFlags::NONE;
        for (id, plugin) in self.plugins.iter().enumerate() {
            acc |= plugin.post_create(id, flow, payload, at);
        }
        acc
    }

    pub fn pre_update(&self, flow: &mut FlowRecord, payload: &[u8], at: Timestamp) -> ActionFlags {
        let mut acc = ActionFlags::NONE;
        for (id, plugin) in self.plugins.iter().enumerate() {
            acc |= plugin.pre_update(id, flow, payload, at);
        }
        acc
    }

    /// Called once per populated extension on export, so each owning
    /// plugin can observe final state.
    pub fn close_flow(&self, flow: &FlowRecord) {
        for (id, ext) in flow_extensions_snapshot(flow) {
            if let Some(plugin) = self.plugins.get(id) {
                plugin.close(flow, &ext);
            }
        }
    }
}

impl Default for PluginRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn flow_extensions_snapshot(flow: &FlowRecord) -> Vec<(usize, FlowExtension)> {
    (0..flow.extension_slots())
        .filter_map(|id| flow.extension(id).map(|e| (id, e.clone())))
        .collect()
}
