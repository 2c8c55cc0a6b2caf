//! Parser error type.
//!
//! A manual enum, a hand-written [`std::fmt::Display`], and a marker
//! [`std::error::Error`] impl (no `thiserror`).

/// Errors raised by [`crate::parser::PacketParser::parse`].
///
/// Per `spec.md` §4.1: "any bounds failure, pool exhaustion, or
/// default-arm hit terminates parsing with the corresponding error."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// A transition table's default arm was hit (unrecognized selector
    /// value, or an explicitly-rejecting selector such as PPPoE discovery
    /// 0x8863).
    DefaultReject { state: &'static str },
    /// A bounded descriptor/header-value pool was exhausted.
    OutOfMemory { pool: &'static str },
    /// A field extraction would read past the end of the packet.
    PacketTooShort {
        needed_bits: usize,
        available_bits: usize,
    },
    /// The parser's internal loop counter exceeded its bound (runaway
    /// header chain); never expected in practice since the bounded pools
    /// already cap loop iterations, but kept distinct per `spec.md` §4.1's
    /// `ParserTimeout` error kind.
    ParserTimeout,
    /// A field width or offset requested by the caller was invalid (e.g. a
    /// non-byte-aligned `read_bytes`).
    InvalidArgument,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::DefaultReject { state } => {
                write!(f, "default-arm reject in state '{state}'")
            }
            ParseError::OutOfMemory { pool } => {
                write!(f, "header pool '{pool}' exhausted")
            }
            ParseError::PacketTooShort {
                needed_bits,
                available_bits,
            } => write!(
                f,
                "packet too short: needed {needed_bits} bits, had {available_bits} bits"
            ),
            ParseError::ParserTimeout => write!(f, "parser exceeded its bounded loop count"),
            ParseError::InvalidArgument => write!(f, "invalid argument to parser primitive"),
        }
    }
}

impl std::error::Error for ParseError {}
