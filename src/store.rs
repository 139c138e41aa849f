//! Content Store (spec §4.1).
//!
//! A content-addressed blob pool rooted at a caller-supplied directory.
//! Grounded in the teacher's chunk-store design narrated in its
//! `src/backup.rs` module doc (fan-out directory layout, atomic rename
//! on ingest, mark-and-sweep GC) and its `file_set_contents`
//! temp-then-rename idiom, generalised from single-file writes to a
//! streaming digest-while-you-write ingest. The GC sweep walks the pool
//! with `walkdir`, already part of the teacher's own dependency tree,
//! rather than a hand-rolled recursive `read_dir`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, info, warn};
use openssl::sha::Sha256;
use walkdir::WalkDir;

use crate::error::{ChantalError, Result};
use crate::tools::{digest_to_hex, hex_to_digest, random_suffix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    Corrupt,
    Missing,
}

pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Fan-out path `pool/<aa>/<bb>/<sha256>` for a digest.
    pub fn blob_path(&self, digest: &[u8; 32]) -> PathBuf {
        let hex = digest_to_hex(digest);
        self.root.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }

    pub fn exists(&self, digest: &[u8; 32]) -> bool {
        self.blob_path(digest).is_file()
    }

    pub fn open(&self, digest: &[u8; 32]) -> Result<File> {
        let path = self.blob_path(digest);
        File::open(&path)
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ChantalError::NotFound(digest_to_hex(digest)),
                _ => ChantalError::Io(err),
            })
    }

    /// Stream `reader` into the pool, hashing incrementally, and
    /// atomically rename into place on completion. If the final path
    /// already exists the temp file is discarded — the blob is already
    /// stored (spec §4.1 Ingest).
    pub fn ingest<R: Read>(&self, mut reader: R) -> Result<([u8; 32], u64)> {
        let tmp_path = self.root.join(".tmp").join(random_suffix());
        let mut tmp_file = File::create(&tmp_path)?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path);
                    return Err(err.into());
                }
            };
            hasher.update(&buf[..n]);
            if let Err(err) = tmp_file.write_all(&buf[..n]) {
                let _ = fs::remove_file(&tmp_path);
                return Err(err.into());
            }
            size += n as u64;
        }
        tmp_file.sync_all()?;
        drop(tmp_file);

        let digest = hasher.finish();
        let final_path = self.blob_path(&digest);

        if final_path.is_file() {
            let _ = fs::remove_file(&tmp_path);
            debug!("ingest: {} already present", digest_to_hex(&digest));
            return Ok((digest, size));
        }

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(&tmp_path, &final_path) {
            Ok(()) => {}
            Err(err) => {
                let _ = fs::remove_file(&tmp_path);
                // Another ingest of the same content may have won the
                // race between our existence check and our rename.
                if !final_path.is_file() {
                    return Err(err.into());
                }
            }
        }

        Ok((digest, size))
    }

    /// Hardlink the pool copy of `digest` to `target`, tolerating an
    /// existing link to the same inode (spec §4.1 Hardlink).
    pub fn hardlink(&self, digest: &[u8; 32], target: &Path, overwrite: bool) -> Result<()> {
        let src = self.blob_path(digest);
        if !src.is_file() {
            return Err(ChantalError::NotFound(digest_to_hex(digest)));
        }
        crate::tools::fs::hardlink_idempotent(&src, target, overwrite)
    }

    /// Rehash the stored blob and compare against `digest` (spec §4.1
    /// Verify).
    pub fn verify(&self, digest: &[u8; 32]) -> Result<VerifyOutcome> {
        let path = self.blob_path(digest);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(VerifyOutcome::Missing)
            }
            Err(err) => return Err(err.into()),
        };

        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let actual = hasher.finish();
        if &actual == digest {
            Ok(VerifyOutcome::Ok)
        } else {
            warn!(
                "verify: {} rehashed to {}",
                digest_to_hex(digest),
                digest_to_hex(&actual)
            );
            Ok(VerifyOutcome::Corrupt)
        }
    }

    /// Two-phase mark-and-sweep GC (spec §4.1 GarbageCollect): any pool
    /// file whose digest is absent from `live_set` and whose mtime
    /// predates `started_at` is removed. The mtime guard (rather than
    /// the teacher's atime-based scheme — see DESIGN.md) tolerates
    /// ingests racing the GC's directory walk.
    pub fn garbage_collect(
        &self,
        live_set: &std::collections::HashSet<[u8; 32]>,
        started_at: SystemTime,
    ) -> Result<(u64, u64)> {
        let mut removed_count = 0u64;
        let mut freed_bytes = 0u64;

        let walker = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".tmp");

        for entry in walker {
            let entry = entry.map_err(|err| {
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk error"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            let Some(digest) = hex_to_digest(name) else {
                continue;
            };
            if live_set.contains(&digest) {
                continue;
            }
            let metadata = entry.metadata().map_err(|err| {
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "stat error"))
            })?;
            let mtime = metadata.modified()?;
            if mtime >= started_at {
                continue;
            }
            let len = metadata.len();
            fs::remove_file(entry.path())?;
            removed_count += 1;
            freed_bytes += len;
        }

        info!(
            "garbage_collect: removed {} blobs, freed {} bytes",
            removed_count, freed_bytes
        );
        Ok((removed_count, freed_bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn ingest_is_idempotent_and_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();

        let (digest1, size1) = store.ingest(Cursor::new(b"hello world")).unwrap();
        let (digest2, size2) = store.ingest(Cursor::new(b"hello world")).unwrap();

        assert_eq!(digest1, digest2);
        assert_eq!(size1, size2);
        assert!(store.exists(&digest1));
        assert_eq!(store.verify(&digest1).unwrap(), VerifyOutcome::Ok);
    }

    #[test]
    fn hardlink_to_same_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let (digest, _) = store.ingest(Cursor::new(b"package bytes")).unwrap();

        let target = dir.path().join("published").join("pkg.rpm");
        store.hardlink(&digest, &target, false).unwrap();
        store.hardlink(&digest, &target, false).unwrap();
        assert!(target.is_file());
    }

    #[test]
    fn verify_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let (digest, _) = store.ingest(Cursor::new(b"original contents")).unwrap();

        fs::write(store.blob_path(&digest), b"tampered").unwrap();
        assert_eq!(store.verify(&digest).unwrap(), VerifyOutcome::Corrupt);
    }

    #[test]
    fn garbage_collect_removes_only_stale_unreferenced_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).unwrap();
        let (kept, _) = store.ingest(Cursor::new(b"kept")).unwrap();
        let (removed, size) = store.ingest(Cursor::new(b"removed")).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let started_at = SystemTime::now();

        let mut live = std::collections::HashSet::new();
        live.insert(kept);

        let (removed_count, freed_bytes) = store.garbage_collect(&live, started_at).unwrap();
        assert_eq!(removed_count, 1);
        assert_eq!(freed_bytes, size);
        assert!(store.exists(&kept));
        assert!(!store.exists(&removed));
    }
}
