//! Checksums recorded in `jobs.result_checksum`.

use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a result image.
pub fn result_checksum(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}
