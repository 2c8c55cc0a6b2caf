//! The consumed IPFIX exporter interface.
//!
//! `FlowCache` depends on this trait, not on any concrete wire codec.
//! Per `spec.md` §1's Non-goals, IPFIX template registration/wire encoding
//! is out of scope as "a codec (trivial byte packing); only the
//! cache→exporter contract is specified" — so this module defines the
//! contract and two in-memory test doubles, not a UDP/TCP sender.

use crate::cache::record::FlowRecord;

/// Error raised by an [`Exporter`] implementation.
///
/// Per `spec.md` §7: "IPFIX transport failures: reported to stderr; the
/// cache continues to run." `FlowCache` logs at [`log::warn!`] and
/// continues rather than propagating this upward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    NotInitialized,
    UnknownTemplate,
    Transport(String),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::NotInitialized => write!(f, "exporter used before init()"),
            ExportError::UnknownTemplate => write!(f, "export_flow called with an unknown template handle"),
            ExportError::Transport(msg) => write!(f, "transport failure: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {}

/// One IPFIX information element reference, as registered via
/// [`Exporter::create_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateField {
    pub enterprise_number: u16,
    pub element_id: u16,
    /// `-1` means variable length.
    pub length: i32,
}

/// Opaque handle to a registered template, returned by
/// [`Exporter::create_template`] and passed back to
/// [`Exporter::export_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateHandle(pub u32);

/// Connection parameters for [`Exporter::init`].
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub observation_domain_id: u32,
    pub host: String,
    pub port: u16,
    pub udp: bool,
    pub verbose: bool,
}

/// The bootstrap fields emitted before any per-protocol fields on every
/// template, per `spec.md` §6.
pub fn bootstrap_fields() -> [TemplateField; 5] {
    [
        TemplateField {
            enterprise_number: 0,
            element_id: 10, // ingressInterface
            length: 2,
        },
        TemplateField {
            enterprise_number: 0,
            element_id: 152, // flowStartMilliseconds
            length: 8,
        },
        TemplateField {
            enterprise_number: 0,
            element_id: 153, // flowEndMilliseconds
            length: 8,
        },
        TemplateField {
            enterprise_number: 0,
            element_id: 148, // flowId
            length: 8,
        },
        TemplateField {
            enterprise_number: 0,
            element_id: 149, // parentFlowId (enterprise-local convention)
            length: 8,
        },
    ]
}

/// The interface [`crate::cache::FlowCache`] drives to hand off completed
/// flows. This crate consumes the interface; it does not implement a wire
/// codec for it.
pub trait Exporter {
    fn prepare(&mut self) -> Result<(), ExportError>;
    fn init(&mut self, cfg: &ExporterConfig) -> Result<(), ExportError>;
    fn create_template(&mut self, fields: &[TemplateField]) -> Result<TemplateHandle, ExportError>;
    fn send_templates(&mut self) -> Result<(), ExportError>;
    fn send_data(&mut self) -> Result<(), ExportError>;
    fn flush(&mut self) -> Result<(), ExportError>;
    fn export_flow(&mut self, template: TemplateHandle, flow: &FlowRecord) -> Result<(), ExportError>;
    fn shutdown(&mut self) -> Result<(), ExportError>;
}

/// An exporter that discards everything. Used in tests that only care
/// about cache-side behavior.
#[derive(Debug, Default)]
pub struct NullExporter {
    initialized: bool,
    next_handle: u32,
}

impl NullExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Exporter for NullExporter {
    fn prepare(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn init(&mut self, _cfg: &ExporterConfig) -> Result<(), ExportError> {
        self.initialized = true;
        Ok(())
    }

    fn create_template(&mut self, _fields: &[TemplateField]) -> Result<TemplateHandle, ExportError> {
        let handle = TemplateHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn send_templates(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn send_data(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn export_flow(&mut self, _template: TemplateHandle, _flow: &FlowRecord) -> Result<(), ExportError> {
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// An exporter that records every exported [`FlowRecord`] in memory, in
/// export order. Used by tests that assert on exactly which flows were
/// exported and in what order.
#[derive(Debug, Default)]
pub struct VecExporter {
    initialized: bool,
    next_handle: u32,
    pub exported: Vec<FlowRecord>,
}

impl VecExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Exporter for VecExporter {
    fn prepare(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn init(&mut self, _cfg: &ExporterConfig) -> Result<(), ExportError> {
        self.initialized = true;
        Ok(())
    }

    fn create_template(&mut self, _fields: &[TemplateField]) -> Result<TemplateHandle, ExportError> {
        let handle = TemplateHandle(self.next_handle);
        self.next_handle += 1;
        Ok(handle)
    }

    fn send_templates(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn send_data(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ExportError> {
        Ok(())
    }

    fn export_flow(&mut self, _template: TemplateHandle, flow: &FlowRecord) -> Result<(), ExportError> {
        if !self.initialized {
            return Err(ExportError::NotInitialized);
        }
        self.exported.push(flow.clone());
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_exporter_accepts_any_flow() {
        let mut exp = NullExporter::new();
        exp.prepare().unwrap();
        exp.init(&ExporterConfig {
            observation_domain_id: 1,
            host: "127.0.0.1".into(),
            port: 4739,
            udp: true,
            verbose: false,
        })
        .unwrap();
        let handle = exp.create_template(&bootstrap_fields()).unwrap();
        exp.export_flow(handle, &FlowRecord::scratch()).unwrap();
    }

    #[test]
    fn vec_exporter_requires_init() {
        let mut exp = VecExporter::new();
        let handle = TemplateHandle(0);
        let err = exp.export_flow(handle, &FlowRecord::scratch()).unwrap_err();
        assert_eq!(err, ExportError::NotInitialized);
    }

    #[test]
    fn vec_exporter_records_in_order() {
        let mut exp = VecExporter::new();
        exp.init(&ExporterConfig {
            observation_domain_id: 1,
            host: "127.0.0.1".into(),
            port: 4739,
            udp: true,
            verbose: false,
        })
        .unwrap();
        let handle = exp.create_template(&bootstrap_fields()).unwrap();
        let mut a = FlowRecord::scratch();
        a.id = 1;
        let mut b = FlowRecord::scratch();
        b.id = 2;
        exp.export_flow(handle, &a).unwrap();
        exp.export_flow(handle, &b).unwrap();
        assert_eq!(exp.exported.iter().map(|f| f.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
