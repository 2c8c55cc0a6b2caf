//! Crate-wide error aggregate.
//!
//! A manual enum with a hand-written [`std::fmt::Display`] impl and a
//! marker [`std::error::Error`] impl, no `thiserror`/`anyhow`. The three
//! subsystem error types ([`crate::parser::error::ParseError`],
//! [`crate::cache::CacheError`], [`crate::exporter::ExportError`]) are each
//! defined in their own module; this type exists only for callers driving
//! the full `parser -> cache -> plugins -> exporter` pipeline through
//! [`crate::FlowExporter`] who want a single error type to match on.

use crate::cache::CacheError;
use crate::exporter::ExportError;
use crate::parser::error::ParseError;

/// Aggregate error for the end-to-end pipeline facade.
#[derive(Debug, Clone)]
pub enum FlowExporterError {
    /// The packet failed to parse; per `spec.md` §7 the packet is dropped,
    /// no flow is created, and (if configured) a drop counter is incremented.
    Parse(ParseError),
    /// Cache configuration or invariant error. Per `spec.md` §7, invariant
    /// violations are bugs; this variant is only returned for configuration
    /// errors raised at `FlowCache::new` (invariant violations panic).
    Cache(CacheError),
    /// The configured exporter failed. Per `spec.md` §7 this is
    /// best-effort: callers typically log and continue rather than
    /// propagate, but the error is still surfaced.
    Export(ExportError),
}

impl std::fmt::Display for FlowExporterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowExporterError::Parse(e) => write!(f, "parse error: {e}"),
            FlowExporterError::Cache(e) => write!(f, "cache error: {e}"),
            FlowExporterError::Export(e) => write!(f, "export error: {e}"),
        }
    }
}

impl std::error::Error for FlowExporterError {}

impl From<ParseError> for FlowExporterError {
    fn from(e: ParseError) -> Self {
        FlowExporterError::Parse(e)
    }
}

impl From<CacheError> for FlowExporterError {
    fn from(e: CacheError) -> Self {
        FlowExporterError::Cache(e)
    }
}

impl From<ExportError> for FlowExporterError {
    fn from(e: ExportError) -> Self {
        FlowExporterError::Export(e)
    }
}
