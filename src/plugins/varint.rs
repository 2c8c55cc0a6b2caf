//! Shared variable-length integer decoder.
//!
//! Per `spec.md` §9 Design Notes: "Variable-length integer decoding appears
//! in both QUIC and TLS; share one routine." QUIC and the TLS record layer
//! it carries both use the same 2-bit-length-prefix big-endian encoding
//! (RFC 9000 §16): the top two bits of the first byte select a 1/2/4/8-byte
//! field, with those two bits masked out of the value itself.

/// Decodes one QUIC/TLS variable-length integer starting at `buf[0]`.
/// Returns `(value, bytes_consumed)`, or `None` if `buf` doesn't hold a
/// complete encoding.
pub fn decode_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = 1usize << (first >> 6);
    if buf.len() < len {
        return None;
    }
    let mut value = u64::from(first & 0x3F);
    for &b in &buf[1..len] {
        value = (value << 8) | u64::from(b);
    }
    Some((value, len))
}
