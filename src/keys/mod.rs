//! OpenSSH public-key parsing and fingerprinting.
//!
//! Key identity throughout the server is the `SHA256:` fingerprint computed
//! over the key's SSH wire-format bytes. The same routine backs key ingest,
//! connection auth, and allowed-signers lookup, so the three can never
//! disagree on normalization.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A parsed OpenSSH `authorized_keys`-style public key line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub algorithm: String,
    pub blob: Vec<u8>,
    pub comment: Option<String>,
}

impl ParsedKey {
    /// The normalized single-line form: `<algorithm> <base64-blob>` with the
    /// comment dropped. This is what gets persisted and what lands in the
    /// allowed-signers manifest.
    #[must_use]
    pub fn canonical_line(&self) -> String {
        format!("{} {}", self.algorithm, STANDARD.encode(&self.blob))
    }

    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint_blob(&self.blob)
    }
}

/// Compute `SHA256:` + unpadded base64 of SHA-256 over wire-format key bytes.
#[must_use]
pub fn fingerprint_blob(blob: &[u8]) -> String {
    let hash = Sha256::digest(blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash))
}

/// Fingerprint of a key presented during SSH authentication, in the same
/// normalized form as [`fingerprint_blob`].
#[must_use]
pub fn fingerprint_public_key(key: &russh_keys::key::PublicKey) -> String {
    let blob = STANDARD
        .decode(key.public_key_base64())
        .unwrap_or_default();
    fingerprint_blob(&blob)
}

/// Parse a single OpenSSH public key line (`<type> <base64> [comment]`),
/// checking that the base64 payload really is a wire-format key of the
/// declared type.
pub fn parse_public_key(line: &str) -> Result<ParsedKey> {
    let line = line.trim();
    let mut fields = line.split_whitespace();

    let algorithm = fields
        .next()
        .ok_or_else(|| Error::InvalidKey("empty key line".to_string()))?;
    let blob_b64 = fields
        .next()
        .ok_or_else(|| Error::InvalidKey("missing key data".to_string()))?;
    let comment = {
        let rest: Vec<&str> = fields.collect();
        if rest.is_empty() {
            None
        } else {
            Some(rest.join(" "))
        }
    };

    if !algorithm.starts_with("ssh-") && !algorithm.starts_with("ecdsa-") && !algorithm.starts_with("sk-") {
        return Err(Error::InvalidKey(format!(
            "unrecognized key type: {algorithm}"
        )));
    }

    let blob = STANDARD
        .decode(blob_b64)
        .map_err(|e| Error::InvalidKey(format!("bad base64 key data: {e}")))?;

    // The wire format opens with a length-prefixed algorithm string; it must
    // agree with the declared type.
    let embedded = wire_algorithm(&blob)
        .ok_or_else(|| Error::InvalidKey("truncated key data".to_string()))?;
    if embedded != algorithm {
        return Err(Error::InvalidKey(format!(
            "key type mismatch: line says {algorithm}, data says {embedded}"
        )));
    }

    Ok(ParsedKey {
        algorithm: algorithm.to_string(),
        blob,
        comment,
    })
}

fn wire_algorithm(blob: &[u8]) -> Option<String> {
    if blob.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([blob[0], blob[1], blob[2], blob[3]]) as usize;
    if len == 0 || len > 64 || blob.len() < 4 + len {
        return None;
    }
    String::from_utf8(blob[4..4 + len].to_vec()).ok()
}
