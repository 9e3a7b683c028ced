//! Durable save strategies: atomic sibling-file-then-rename, and in-place
//! truncating overwrite. Both are driven through a `SaveHandle` so a
//! caller can write the content as one or several ascending, non-
//! overlapping ranges before committing.
//!
//! Grounded in the atomic-write pattern used across the example corpus
//! (temp file in the destination's directory, `sync_all`, then
//! `rename` over the destination) rather than the teacher crate's own
//! (unfinished) `write_in_place`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{BufferError, Result};

/// How a save should reach disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMethod {
    /// Try [`SaveMethod::Atomic`], falling back to
    /// [`SaveMethod::Inplace`] if the destination cannot support a
    /// sibling-and-rename (non-regular file, permissions, filesystem
    /// without atomic rename-over).
    Auto,
    /// Write to a sibling temp file, `fsync`, then `rename` over the
    /// destination. A reader racing the save never observes a
    /// half-written file.
    Atomic,
    /// Truncate and overwrite the destination directly. The only option
    /// for special files (pipes, devices). An error partway through the
    /// write is data loss: the destination is left truncated.
    Inplace,
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let base = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("buffer");
    let name = format!(".{}.tmp.{}.{}", base, std::process::id(), n);
    match dest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

fn is_regular_or_absent(path: &Path) -> std::io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(meta.file_type().is_file()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e),
    }
}

enum Target {
    Atomic {
        tmp: PathBuf,
        dest: PathBuf,
        file: File,
    },
    Inplace {
        file: File,
    },
}

/// A handle opened by `Buffer::save_begin`. Fed with successive calls to
/// `Buffer::save_write_range` (strictly ascending, non-overlapping
/// ranges) and finished with `commit` or `cancel`.
pub struct SaveHandle {
    target: Option<Target>,
    last_end: Option<u64>,
}

impl SaveHandle {
    pub(crate) fn begin(path: &Path, method: SaveMethod) -> Result<SaveHandle> {
        let regular = is_regular_or_absent(path)?;
        match method {
            SaveMethod::Inplace => Self::begin_inplace(path),
            SaveMethod::Atomic => {
                if !regular {
                    return Err(BufferError::Unsupported(
                        "atomic save requires a regular file or a new path",
                    ));
                }
                Self::begin_atomic(path)
            }
            SaveMethod::Auto => {
                if regular {
                    match Self::begin_atomic(path) {
                        Ok(handle) => Ok(handle),
                        Err(_) => {
                            log::warn!(
                                "atomic save of {} failed, falling back to in-place",
                                path.display()
                            );
                            Self::begin_inplace(path)
                        }
                    }
                } else {
                    Self::begin_inplace(path)
                }
            }
        }
    }

    fn begin_atomic(path: &Path) -> Result<SaveHandle> {
        let tmp = tmp_sibling(path);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        if let Ok(meta) = fs::metadata(path) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(
                    &tmp,
                    fs::Permissions::from_mode(meta.permissions().mode()),
                );
            }
        }
        log::debug!("save: opened atomic temp file {}", tmp.display());
        Ok(SaveHandle {
            target: Some(Target::Atomic {
                tmp,
                dest: path.to_path_buf(),
                file,
            }),
            last_end: None,
        })
    }

    fn begin_inplace(path: &Path) -> Result<SaveHandle> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(SaveHandle {
            target: Some(Target::Inplace { file }),
            last_end: None,
        })
    }

    /// Writes `bytes` as the next range, validating it is ascending and
    /// non-overlapping with respect to every range written so far.
    /// `range` is in the buffer's own coordinates and is used only for
    /// ordering validation; the bytes land at the file's current write
    /// position regardless of any gap between ranges.
    pub(crate) fn write_range(&mut self, range: Range<u64>, bytes: &[u8]) -> Result<usize> {
        if range.end < range.start {
            return Err(BufferError::InvalidArgument(
                "save range end precedes start",
            ));
        }
        if let Some(last_end) = self.last_end {
            if range.start < last_end {
                return Err(BufferError::InvalidArgument(
                    "save ranges must be supplied in ascending, non-overlapping order",
                ));
            }
        }
        let file = match self
            .target
            .as_mut()
            .expect("SaveHandle used after commit/cancel")
        {
            Target::Atomic { file, .. } => file,
            Target::Inplace { file } => file,
        };
        let n = file.write(bytes)?;
        self.last_end = Some(range.end);
        Ok(n)
    }

    /// Finalizes the save: for atomic, `fsync` then `rename` over the
    /// destination; for in-place, `fsync` the already-truncated file.
    pub fn commit(mut self) -> Result<()> {
        let target = self
            .target
            .take()
            .expect("SaveHandle used after commit/cancel");
        match target {
            Target::Atomic { tmp, dest, file } => {
                if let Err(e) = file.sync_all() {
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
                drop(file);
                if let Err(e) = fs::rename(&tmp, &dest) {
                    let _ = fs::remove_file(&tmp);
                    return Err(e.into());
                }
                log::debug!("save: renamed {} over {}", tmp.display(), dest.display());
            }
            Target::Inplace { file } => {
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Aborts the save: for atomic, unlinks the temp file; for in-place,
    /// simply closes the (already partially overwritten) destination with
    /// no rollback.
    pub fn cancel(mut self) {
        if let Some(Target::Atomic { tmp, .. }) = self.target.take() {
            let _ = fs::remove_file(&tmp);
        }
    }
}

impl Drop for SaveHandle {
    fn drop(&mut self) {
        if let Some(Target::Atomic { tmp, .. }) = self.target.take() {
            let _ = fs::remove_file(&tmp);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn atomic_commit_renames_over_destination() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let mut handle = SaveHandle::begin(&dest, SaveMethod::Atomic).unwrap();
        handle.write_range(0..3, b"abc").unwrap();
        handle.commit().unwrap();

        let mut content = String::new();
        File::open(&dest).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");
    }

    #[test]
    fn cancel_leaves_destination_untouched() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        fs::write(&dest, b"original").unwrap();
        let mut handle = SaveHandle::begin(&dest, SaveMethod::Atomic).unwrap();
        handle.write_range(0..3, b"xyz").unwrap();
        handle.cancel();

        let mut content = String::new();
        File::open(&dest).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "original");
    }

    #[test]
    fn out_of_order_range_is_rejected() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out.txt");
        let mut handle = SaveHandle::begin(&dest, SaveMethod::Atomic).unwrap();
        handle.write_range(4..6, b"EF").unwrap();
        assert!(handle.write_range(0..2, b"AB").is_err());
        handle.cancel();
    }
}
