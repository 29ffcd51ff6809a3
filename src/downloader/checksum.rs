//! Streaming SHA-256
//!
//! Opportunistic integrity digests, off the transfer hot path.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::CoreResult;

const CHUNK: usize = 1024;

/// Digest a file in 1 KiB chunks, returning lowercase hex.
pub async fn sha256_file(path: &Path) -> CoreResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Digest an in-memory buffer, returning lowercase hex.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
