//! QUIC Initial-packet decryption (RFC 9001 §5.2, RFC 9000 §17.2).
//!
//! Grounded on `original_source/plugins/quic.c`'s salt table and
//! "derive then unprotect then decrypt" pipeline. Per `spec.md` §9's
//! Design Notes ("Crypto backend: any well-audited library suffices"),
//! this uses the RustCrypto stack already in the dependency graph
//! (`sha2`, `hkdf`, `aes`, `aes-gcm`) rather than a bespoke AES
//! implementation.

use aes::Aes128;
use aes::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use aes_gcm::aead::{Aead, Payload};
use hkdf::Hkdf;
use sha2::Sha256;

/// One QUIC version's Initial-secret salt. Versions not in this table are
/// treated as unsupported: per `spec.md` §4.3.3 step 2, an unknown version
/// aborts the whole QUIC inspection for that packet with no partial
/// extension produced.
///
/// Salt byte values are carried over verbatim from `original_source/
/// process/quic.cpp`'s `quic_create_initial_secrets` (`handshake_salt_*`/
/// `hanshake_salt_draft_*`), which recognizes exactly these seven distinct
/// salts and picks among them by thresholding a version into a draft
/// number. This flattens that threshold into nine explicit version->salt
/// rows (draft-23's salt also covers the adjacent draft-27/28 wire values,
/// matching the original's `quic_check_version(version, 28)` arm), per
/// `spec.md` §4.3.3's "nine known mappings, including Google Q050/T050/T051
/// and drafts 22/23/29 and v1".
const VERSION_SALTS: [(u32, [u8; 20]); 9] = [
    // QUIC v1.
    (
        0x0000_0001,
        [
            0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8,
            0x0c, 0xad, 0xcc, 0xbb, 0x7f, 0x0a,
        ],
    ),
    // draft-29.
    (
        0xff00_001d,
        [
            0xaf, 0xbf, 0xec, 0x28, 0x99, 0x93, 0xd2, 0x4c, 0x9e, 0x97, 0x86, 0xf1, 0x9c, 0x61,
            0x11, 0xe0, 0x43, 0x90, 0xa8, 0x99,
        ],
    ),
    // draft-28.
    (
        0xff00_001c,
        [
            0xc3, 0xee, 0xf7, 0x12, 0xc7, 0x2e, 0xbb, 0x5a, 0x11, 0xa7, 0xd2, 0x43, 0x2b, 0xb4,
            0x63, 0x65, 0xbe, 0xf9, 0xf5, 0x02,
        ],
    ),
    // draft-27.
    (
        0xff00_001b,
        [
            0xc3, 0xee, 0xf7, 0x12, 0xc7, 0x2e, 0xbb, 0x5a, 0x11, 0xa7, 0xd2, 0x43, 0x2b, 0xb4,
            0x63, 0x65, 0xbe, 0xf9, 0xf5, 0x02,
        ],
    ),
    // draft-23.
    (
        0xff00_0017,
        [
            0xc3, 0xee, 0xf7, 0x12, 0xc7, 0x2e, 0xbb, 0x5a, 0x11, 0xa7, 0xd2, 0x43, 0x2b, 0xb4,
            0x63, 0x65, 0xbe, 0xf9, 0xf5, 0x02,
        ],
    ),
    // draft-22.
    (
        0xff00_0016,
        [
            0x7f, 0xbc, 0xdb, 0x0e, 0x7c, 0x66, 0xbb, 0xe9, 0x19, 0x3a, 0x96, 0xcd, 0x21, 0x51,
            0x9e, 0xbd, 0x7a, 0x02, 0x64, 0x4a,
        ],
    ),
    // Google QUIC Q050.
    (
        0x5130_3530,
        [
            0x50, 0x45, 0x74, 0xEF, 0xD0, 0x66, 0xFE, 0x2F, 0x9D, 0x94, 0x5C, 0xFC, 0xDB, 0xD3,
            0xA7, 0xF0, 0xD3, 0xB5, 0x6B, 0x45,
        ],
    ),
    // Google QUIC T050.
    (
        0x5430_3530,
        [
            0x7f, 0xf5, 0x79, 0xe5, 0xac, 0xd0, 0x72, 0x91, 0x55, 0x80, 0x30, 0x4c, 0x43, 0xa2,
            0x36, 0x7c, 0x60, 0x48, 0x83, 0x10,
        ],
    ),
    // Google QUIC T051.
    (
        0x5430_3531,
        [
            0x7a, 0x4e, 0xde, 0xf4, 0xe7, 0xcc, 0xee, 0x5f, 0xa4, 0x50, 0x6c, 0x19, 0x12, 0x4f,
            0xc8, 0xcc, 0xda, 0x6e, 0x03, 0x3d,
        ],
    ),
];

pub fn salt_for_version(version: u32) -> Option<[u8; 20]> {
    VERSION_SALTS.iter().find(|(v, _)| *v == version).map(|(_, s)| *s)
}

/// The three keys derived from an Initial secret for one direction
/// (client or server).
pub struct DirectionalKeys {
    pub key: [u8; 16],
    pub iv: [u8; 12],
    pub hp: [u8; 16],
}

fn hkdf_expand_label(prk: &Hkdf<Sha256>, label: &[u8], out: &mut [u8]) {
    let mut info = Vec::with_capacity(2 + 1 + 6 + label.len() + 1);
    info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    let full_label_len = 6 + label.len(); // "tls13 " prefix
    info.push(full_label_len as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(0); // empty context
    let _ = prk.expand(&info, out);
}

/// Derives the client or server Initial keys for a given QUIC Destination
/// Connection ID, per RFC 9001 §5.2.
pub fn derive_initial_keys(salt: &[u8; 20], dcid: &[u8], is_client: bool) -> DirectionalKeys {
    let (initial_secret, _) = Hkdf::<Sha256>::extract(Some(salt.as_slice()), dcid);
    let hk = Hkdf::<Sha256>::from_prk(initial_secret.as_slice()).expect("PRK length matches SHA-256 output");

    let label: &[u8] = if is_client { b"client in" } else { b"server in" };
    let mut secret = [0u8; 32];
    hkdf_expand_label(&hk, label, &mut secret);

    let hk_secret = Hkdf::<Sha256>::from_prk(&secret).expect("secret length matches SHA-256 output");
    let mut key = [0u8; 16];
    let mut iv = [0u8; 12];
    let mut hp = [0u8; 16];
    hkdf_expand_label(&hk_secret, b"quic key", &mut key);
    hkdf_expand_label(&hk_secret, b"quic iv", &mut iv);
    hkdf_expand_label(&hk_secret, b"quic hp", &mut hp);

    DirectionalKeys { key, iv, hp }
}

/// Computes the 5-byte header-protection mask for a 16-byte ciphertext
/// sample, per RFC 9001 §5.4.1 (AES-128-ECB single-block encrypt).
pub fn header_protection_mask(hp_key: &[u8; 16], sample: &[u8; 16]) -> [u8; 5] {
    let cipher = Aes128::new(GenericArray::from_slice(hp_key));
    let mut block = *GenericArray::from_slice(sample);
    cipher.encrypt_block(&mut block);
    let mut mask = [0u8; 5];
    mask.copy_from_slice(&block[..5]);
    mask
}

/// Decrypts an Initial packet's payload with AES-128-GCM, given the
/// already-deprotected header as additional authenticated data and the
/// reconstructed full packet number.
pub fn decrypt_payload(
    key: &[u8; 16],
    iv: &[u8; 12],
    packet_number: u64,
    header: &[u8],
    ciphertext_with_tag: &[u8],
) -> Option<Vec<u8>> {
    let mut nonce_bytes = *iv;
    let pn_bytes = packet_number.to_be_bytes();
    for i in 0..8 {
        nonce_bytes[4 + i] ^= pn_bytes[i];
    }

    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext_with_tag,
                aad: header,
            },
        )
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_salt_is_present() {
        assert!(salt_for_version(0x0000_0001).is_some());
    }

    #[test]
    fn unknown_version_has_no_salt() {
        assert!(salt_for_version(0xdead_beef).is_none());
    }

    #[test]
    fn derives_distinct_client_and_server_keys() {
        let salt = salt_for_version(1).unwrap();
        let dcid = [0xAA; 8];
        let client = derive_initial_keys(&salt, &dcid, true);
        let server = derive_initial_keys(&salt, &dcid, false);
        assert_ne!(client.key, server.key);
    }
}
