//! Flow lifecycle event hooks.
//!
//! An `Arc<dyn Fn(&FlowEvent) + Send + Sync + 'static>` hook registry,
//! fired on flow creation, export, and the conflict-split/tunnel-remainder
//! recursion points in `add_packet`.

use std::fmt;
use std::sync::Arc;

use crate::time::Timestamp;

/// Reason a flow was exported, attached to [`FlowEvent::Exported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportReason {
    /// A plugin's `post_create`/`pre_update` returned `FLUSH`.
    PluginFlush,
    /// A plugin's `pre_update` returned `EXPORT` (no reinsertion).
    PluginExport,
    /// A full cache line evicted its tail slot to make room.
    LineFull,
    /// `ts.sec - flow.first.sec >= active_timeout`.
    ActiveTimeout,
    /// Picked up by the throttled inactive scan.
    InactiveScan,
    /// `export_all()` drained the cache (shutdown).
    Drain,
}

/// A flow-cache lifecycle event, delivered to registered hooks.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A new flow record was created for a previously-unseen key.
    Created { flow_id: u64, at: Timestamp },
    /// A flow record was exported and its slot released.
    Exported {
        flow_id: u64,
        reason: ExportReason,
        at: Timestamp,
    },
    /// `add_packet` detected a header-type conflict and is recursing into
    /// the conflicting header's remainder as a fresh, parent-less packet.
    ConflictSplit { at: Timestamp },
    /// A trailing tunnel remainder is being processed with `parent_id`
    /// set to the enclosing flow's hash.
    TunnelRemainder { parent_id: u64, at: Timestamp },
}

/// A hook invoked for every [`FlowEvent`].
pub type FlowHook = Arc<dyn Fn(&FlowEvent) + Send + Sync + 'static>;

/// A registry of flow-event hooks, fired in registration order.
#[derive(Default, Clone)]
pub struct FlowHooks {
    hooks: Vec<FlowHook>,
}

impl FlowHooks {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Register a new hook. Hooks are fired in the order they were
    /// registered, and never unregistered once added.
    pub fn register<F>(&mut self, hook: F)
    where
        F: Fn(&FlowEvent) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(hook));
    }

    /// Fire every registered hook with the given event.
    pub fn trigger(&self, event: &FlowEvent) {
        for hook in &self.hooks {
            hook(event);
        }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for FlowHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowHooks")
            .field("hooks", &format!("{} hooks", self.hooks.len()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn hooks_fire_in_registration_order() {
        let mut hooks = FlowHooks::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        hooks.register(move |_event| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        hooks.register(move |_event| o2.lock().unwrap().push(2));

        hooks.trigger(&FlowEvent::Created {
            flow_id: 42,
            at: Timestamp::ZERO,
        });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn empty_registry_reports_empty() {
        let hooks = FlowHooks::new();
        assert!(hooks.is_empty());
        assert_eq!(hooks.len(), 0);
    }

    #[test]
    fn trigger_counts_calls() {
        let mut hooks = FlowHooks::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        hooks.register(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        let event = FlowEvent::Exported {
            flow_id: 0,
            reason: ExportReason::Drain,
            at: Timestamp::ZERO,
        };
        for _ in 0..3 {
            hooks.trigger(&event);
        }
        assert_eq!(count.load(Ordering::Relaxed), 3);
    }
}
