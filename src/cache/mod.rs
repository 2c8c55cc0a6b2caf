//! The flow cache: a set-associative, per-line LRU store keyed by
//! [`key::hash_key`].
//!
//! Grounded on `original_source/exporter/cache.c`'s `cache_create_flow` /
//! `cache_find_or_insert` pair. The `CacheRecord{hash, FlowRecord*}` +
//! separate `FlowRecord` pool split from `spec.md` §3 is kept as two
//! parallel arrays (`slots`, `pool`) rather than raw pointers, with a
//! `Vec<usize>` free list standing in for the original's intrusive
//! free-list pointer chain.

pub mod key;
pub mod record;

use key::{build_key, hash_key, FlowFields, KeyBuildOutcome};
use record::FlowRecord;

use crate::config::{CacheConfig, ConfigError};
use crate::events::{ExportReason, FlowEvent, FlowHook, FlowHooks};
use crate::exporter::{bootstrap_fields, Exporter, ExportError, ExporterConfig, TemplateHandle};
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::plugins::{ActionFlags, PluginRuntime};
use crate::time::Timestamp;

/// Error raised by [`FlowCache::new`].
///
/// Per `spec.md` §7, cache invariant violations at runtime are bugs and
/// this crate does not attempt to recover from them (see the `unreachable!`
/// calls in [`key::build_key`]); this type only covers the two kinds of
/// failure that can occur before a single packet is ever processed:
/// rejecting a malformed [`CacheConfig`], and the exporter's own
/// `prepare`/`init`/`create_template` sequence failing.
#[derive(Debug, Clone)]
pub enum CacheError {
    Config(ConfigError),
    Export(ExportError),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Config(e) => write!(f, "{e}"),
            CacheError::Export(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CacheError {}

#[derive(Debug, Clone, Copy)]
struct CacheSlot {
    hash: u64,
    pool_index: usize,
}

impl CacheSlot {
    const EMPTY: CacheSlot = CacheSlot { hash: 0, pool_index: 0 };
}

/// The flow cache. Owns the `FlowRecord` pool, the plugin runtime, and the
/// exporter it drives on every eviction.
pub struct FlowCache {
    config: CacheConfig,
    slots: Vec<CacheSlot>,
    pool: Vec<FlowRecord>,
    free_list: Vec<usize>,
    plugins: PluginRuntime,
    exporter: Box<dyn Exporter>,
    template: TemplateHandle,
    metrics: CacheMetrics,
    hooks: FlowHooks,
    last_scan: Option<Timestamp>,
}

impl FlowCache {
    /// Allocates the `CacheRecord` array and a `FlowRecord` pool of size
    /// `cache_size + 1`, registers plugins, and drives the exporter through
    /// `prepare`/`init`/`create_template`/`send_templates` with the
    /// bootstrap-only template (`spec.md` §1 places per-protocol template
    /// fields out of scope).
    pub fn new(
        config: CacheConfig,
        plugins: PluginRuntime,
        mut exporter: Box<dyn Exporter>,
        exporter_config: &ExporterConfig,
    ) -> Result<Self, CacheError> {
        if config.cache_size == 0 || !config.cache_size.is_power_of_two() {
            return Err(CacheError::Config(ConfigError::InvalidCacheSize(config.cache_size)));
        }
        if config.line_size == 0
            || !config.line_size.is_power_of_two()
            || config.line_size > config.cache_size
            || config.cache_size % config.line_size != 0
        {
            return Err(CacheError::Config(ConfigError::InvalidLineSize {
                cache_size: config.cache_size,
                line_size: config.line_size,
            }));
        }

        exporter.prepare().map_err(CacheError::Export)?;
        exporter.init(exporter_config).map_err(CacheError::Export)?;
        let template = exporter.create_template(&bootstrap_fields()).map_err(CacheError::Export)?;
        exporter.send_templates().map_err(CacheError::Export)?;

        let extension_count = plugins.extension_count();
        let pool_size = config.cache_size + 1;
        let pool = (0..pool_size).map(|_| FlowRecord::new(extension_count)).collect();
        let free_list = (0..pool_size).collect();
        let slots = vec![CacheSlot::EMPTY; config.cache_size];

        Ok(Self {
            config,
            slots,
            pool,
            free_list,
            plugins,
            exporter,
            template,
            metrics: CacheMetrics::new(),
            hooks: FlowHooks::new(),
            last_scan: None,
        })
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn register_hook<F>(&mut self, hook: F)
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.hooks.register(hook);
    }

    pub fn live_flow_count(&self) -> usize {
        self.pool.len() - self.free_list.len()
    }

    /// Feeds one parsed packet into the cache. `raw` is the full captured
    /// packet; descriptors' byte offsets (and the offsets this function
    /// derives on conflict-split) index into it.
    pub fn add_packet(&mut self, descriptors: &[crate::parser::headers::HeaderDescriptor], raw: &[u8], at: Timestamp, parent_id: u64) {
        self.add_packet_inner(descriptors, raw, at, parent_id);
    }

    fn add_packet_inner(&mut self, descriptors: &[crate::parser::headers::HeaderDescriptor], raw: &[u8], at: Timestamp, parent_id: u64) {
        let Some(scratch_idx) = self.free_list.pop() else {
            // cache_size + 1 invariant guarantees a scratch is always
            // available; this is unreachable outside a prior invariant bug.
            return;
        };

        match build_key(descriptors) {
            KeyBuildOutcome::NoIpLayer => {
                self.free_list.push(scratch_idx);
            }
            KeyBuildOutcome::Conflict {
                prefix_key,
                prefix_fields,
                prefix_payload_offset,
                at: split,
            } => {
                self.metrics.record_conflict_split();
                self.hooks.trigger(&FlowEvent::ConflictSplit { at });
                let prefix_hash = hash_key(prefix_key.as_bytes());
                self.ingest(scratch_idx, prefix_hash, prefix_fields, raw, prefix_payload_offset, at, parent_id);
                // The remainder becomes its own flow, parented to the
                // prefix flow this call just created or updated.
                self.add_packet_inner(&descriptors[split..], raw, at, prefix_hash);
            }
            KeyBuildOutcome::Built { key, fields, payload_offset } => {
                let hash = hash_key(key.as_bytes());
                self.ingest(scratch_idx, hash, fields, raw, payload_offset, at, parent_id);
            }
        }
    }

    /// Steps 4-9 of `add_packet`: locate or create the slot, run the
    /// plugin lifecycle, then the active-timeout check and the throttled
    /// inactive scan. `scratch_idx` is a pool slot already popped from the
    /// free list by the caller.
    fn ingest(&mut self, scratch_idx: usize, hash: u64, fields: FlowFields, raw: &[u8], payload_offset: usize, at: Timestamp, parent_id: u64) {
        let line_start = self.line_start(hash);
        let (slot_idx, existing) = self.locate_slot(line_start, hash, at);
        let payload = raw.get(payload_offset..).unwrap_or(&[]);
        let byte_len = u64::from(fields.ip_total_len);

        if existing {
            self.free_list.push(scratch_idx);
            let pool_idx = self.slots[slot_idx].pool_index;
            let flags = self.plugins.pre_update(&mut self.pool[pool_idx], payload, at);

            if flags.contains(ActionFlags::EXPORT) {
                self.export_slot(slot_idx, at, ExportReason::PluginExport);
                return;
            }
            if flags.contains(ActionFlags::FLUSH) {
                self.export_slot(slot_idx, at, ExportReason::PluginFlush);
                self.retry_ingest(hash, fields, raw, payload_offset, at, parent_id);
                return;
            }

            self.pool[pool_idx].accumulate(at, byte_len, fields.tcp_flags);
        } else {
            self.pool[scratch_idx] = FlowRecord::new(self.plugins.extension_count());
            self.pool[scratch_idx].populate_identity(hash, parent_id, at, &fields);
            self.pool[scratch_idx].accumulate(at, byte_len, fields.tcp_flags);
            self.slots[slot_idx] = CacheSlot { hash, pool_index: scratch_idx };
            self.hooks.trigger(&FlowEvent::Created { flow_id: hash, at });

            let flags = self.plugins.post_create(&mut self.pool[scratch_idx], payload, at);
            if flags.contains(ActionFlags::FLUSH) {
                self.export_slot(slot_idx, at, ExportReason::PluginFlush);
                return;
            }
        }

        let pool_idx = self.slots[slot_idx].pool_index;
        if self.pool[pool_idx].is_active_expired(at, self.config.active_timeout_secs) {
            self.export_slot(slot_idx, at, ExportReason::ActiveTimeout);
        }

        let should_scan = match self.last_scan {
            None => true,
            Some(prev) => at.secs_since(prev) > 5,
        };
        if should_scan {
            self.export_expired(at);
            self.last_scan = Some(at);
        }
    }

    /// Re-drives `ingest` with an already-computed key/fields pair, for the
    /// "export then reinsert" `FLUSH` path (the freshly emptied slot takes
    /// the `post_create` branch, per `spec.md` §4.2 step 7).
    fn retry_ingest(&mut self, hash: u64, fields: FlowFields, raw: &[u8], payload_offset: usize, at: Timestamp, parent_id: u64) {
        let Some(scratch_idx) = self.free_list.pop() else {
            return;
        };
        self.ingest(scratch_idx, hash, fields, raw, payload_offset, at, parent_id);
    }

    fn line_start(&self, hash: u64) -> usize {
        let cache_mask = (self.config.cache_size - 1) as u64;
        let line_mask = !(self.config.line_size as u64 - 1);
        (hash & cache_mask & line_mask) as usize
    }

    /// Finds the slot for `hash` within the line starting at `line_start`,
    /// promoting an existing hit to index 0 or evicting the tail to make
    /// room, per `spec.md` §4.2 step 5. Returns `(slot_idx, existing)`.
    fn locate_slot(&mut self, line_start: usize, hash: u64, now: Timestamp) -> (usize, bool) {
        let line_size = self.config.line_size;

        if let Some(pos) = (0..line_size).find(|&i| self.slots[line_start + i].hash == hash) {
            if pos != 0 {
                let matched = self.slots[line_start + pos];
                for i in (1..=pos).rev() {
                    self.slots[line_start + i] = self.slots[line_start + i - 1];
                }
                self.slots[line_start] = matched;
            }
            self.metrics.record_hit();
            return (line_start, true);
        }

        if let Some(pos) = (0..line_size).find(|&i| self.slots[line_start + i].hash == 0) {
            self.metrics.record_miss();
            return (line_start + pos, false);
        }

        self.metrics.record_eviction();
        let tail = line_start + line_size - 1;
        self.export_slot(tail, now, ExportReason::LineFull);
        let mid = line_start + line_size / 2;
        for i in (mid + 1..=tail).rev() {
            self.slots[i] = self.slots[i - 1];
        }
        self.slots[mid] = CacheSlot::EMPTY;
        (mid, false)
    }

    /// Hands a slot's flow to the exporter, runs plugin teardown, and
    /// returns the pool slot to the free list.
    fn export_slot(&mut self, slot_idx: usize, at: Timestamp, reason: ExportReason) {
        let pool_idx = self.slots[slot_idx].pool_index;
        self.plugins.close_flow(&self.pool[pool_idx]);
        let flow_id = self.pool[pool_idx].id;

        if let Err(err) = self.exporter.export_flow(self.template, &self.pool[pool_idx]) {
            log::warn!("ipfix export failed for flow {flow_id}: {err}");
        }

        let _ = self.pool[pool_idx].take_extensions();
        self.free_list.push(pool_idx);
        self.slots[slot_idx] = CacheSlot::EMPTY;

        match reason {
            ExportReason::ActiveTimeout => self.metrics.record_active_timeout(),
            ExportReason::InactiveScan => self.metrics.record_expiration(),
            _ => {}
        }
        self.hooks.trigger(&FlowEvent::Exported { flow_id, reason, at });
    }

    /// Scans every non-empty slot and exports those whose last-seen
    /// timestamp is at least `inactive_timeout_secs` behind `now`.
    pub fn export_expired(&mut self, now: Timestamp) {
        let stale: Vec<usize> = (0..self.slots.len())
            .filter(|&i| self.slots[i].hash != 0)
            .filter(|&i| {
                let pool_idx = self.slots[i].pool_index;
                self.pool[pool_idx].is_inactive_expired(now, self.config.inactive_timeout_secs)
            })
            .collect();
        for idx in stale {
            self.export_slot(idx, now, ExportReason::InactiveScan);
        }
    }

    /// Drains every non-empty slot, regardless of timeout. Calling this
    /// twice in a row is a no-op the second time.
    pub fn export_all(&mut self) {
        for idx in 0..self.slots.len() {
            if self.slots[idx].hash != 0 {
                let pool_idx = self.slots[idx].pool_index;
                let at = self.pool[pool_idx].last;
                self.export_slot(idx, at, ExportReason::Drain);
            }
        }
    }

    /// Drains the cache and hands control back to the exporter's
    /// `shutdown`. Per `spec.md` §5, plugin `close()` already ran as part
    /// of each flow's export.
    pub fn clear(&mut self) -> Result<(), ExportError> {
        self.export_all();
        self.exporter.shutdown()
    }
}
