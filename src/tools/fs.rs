//! Atomic filesystem primitives.
//!
//! `replace_file` mirrors the teacher's `tools::file_set_contents`: write
//! to a sibling temp file, then atomically rename over the target. Chantal
//! uses `std::fs::OpenOptions` plus `rand`-suffixed names rather than
//! `mkstemp` directly since it has no dependency on `nix`'s raw fd dance
//! for this path.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{ChantalError, Result};
use crate::tools::random_suffix;

/// Atomically replace `path`'s contents with `data`.
pub fn replace_file(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = sibling_tmp_path(path);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    if let Err(err) = file.write_all(data) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    Ok(())
}

/// Build `<parent>/.<filename>.tmp-<random>` next to `path`.
pub fn sibling_tmp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!(".{}.tmp-{}", name, random_suffix()))
}

/// Stage a directory at `<target>.tmp-<random>`, hand it to `build`, then
/// atomically rename it onto `target`. The previous tree at `target` (if
/// any) is moved aside and removed only after the rename succeeds, so a
/// failure in `build` never leaves `target` partially written (spec §4.8).
pub fn atomic_publish_dir<F>(target: &Path, build: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let staging = target.with_file_name(format!(
        "{}.tmp-{}",
        target.file_name().unwrap_or_default().to_string_lossy(),
        random_suffix()
    ));

    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    if let Err(err) = build(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    let previous = if target.exists() {
        let aside = target.with_file_name(format!(
            "{}.old-{}",
            target.file_name().unwrap_or_default().to_string_lossy(),
            random_suffix()
        ));
        fs::rename(target, &aside)?;
        Some(aside)
    } else {
        None
    };

    if let Err(err) = fs::rename(&staging, target) {
        // restore the previous tree so a failed publish leaves the old
        // one intact, as required by spec §4.8.
        if let Some(previous) = previous {
            let _ = fs::rename(&previous, target);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(err.into());
    }

    if let Some(previous) = previous {
        fs::remove_dir_all(&previous)?;
    }

    Ok(())
}

/// Hardlink `src` to `dst`, tolerating an existing link that already
/// points at the same inode (spec §4.1).
pub fn hardlink_idempotent(src: &Path, dst: &Path, overwrite: bool) -> Result<()> {
    use std::os::unix::fs::MetadataExt;

    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::hard_link(src, dst) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let src_meta = fs::metadata(src)?;
            let dst_meta = fs::metadata(dst)?;
            if src_meta.dev() == dst_meta.dev() && src_meta.ino() == dst_meta.ino() {
                return Ok(());
            }
            if overwrite {
                fs::remove_file(dst)?;
                fs::hard_link(src, dst)?;
                Ok(())
            } else {
                Err(ChantalError::Conflict {
                    path: dst.display().to_string(),
                })
            }
        }
        Err(err) if err.raw_os_error() == Some(libc_exdev()) => Err(ChantalError::CrossDevice(
            format!("{} -> {}", src.display(), dst.display()),
        )),
        Err(err) => Err(err.into()),
    }
}

fn libc_exdev() -> i32 {
    18 // EXDEV on Linux
}

/// Open `path` for reading, mapping a missing file to `NotFound`.
pub fn open_existing(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ChantalError::NotFound(path.display().to_string())
        } else {
            ChantalError::Io(err)
        }
    })
}
