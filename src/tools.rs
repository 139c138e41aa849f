//! Small ambient helpers shared by the store, sync engine, and publisher.
//!
//! Grounded in the teacher's `src/tools.rs`: atomic file replacement via
//! a temp file plus rename, and hex digest formatting.

use std::path::Path;

use rand::Rng;

pub mod fs;
pub mod gpg;
pub mod http;

/// Render a digest as a lowercase hex string, as the teacher's
/// `proxmox::tools::digest_to_hex` does for its chunk digests.
pub fn digest_to_hex(digest: &[u8]) -> String {
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

pub fn hex_to_digest(hex: &str) -> Option<[u8; 32]> {
    if hex.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Random suffix used for staging directories and temp files, the same
/// role `mkstemp`'s `XXXXXX` template plays in the teacher's
/// `file_set_contents`.
pub fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..12)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            std::char::from_digit(n as u32, 36).unwrap()
        })
        .collect()
}

/// `true` if `path` exists and its (dev, ino) differ from `dev`/`ino`.
pub fn exists_with_different_inode(path: &Path, dev: u64, ino: u64) -> std::io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.dev() != dev || meta.ino() != ino),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
