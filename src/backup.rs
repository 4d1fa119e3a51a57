/// Backups and atomic file replacement
///
/// Every destructive file operation (encoding conversion, save) first copies
/// the target to `<stem>_backup_<YYYYMMDD_HHMMSS><ext>` beside it, then
/// writes the new content to a temporary file in the same directory and
/// renames it over the target. A backup never replaces an earlier one: a
/// second backup within the same second gets `_2`, then `_3`, and so on.

use chrono::{Local, NaiveDateTime};
use log::{info, warn};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Timestamp layout used in backup file names
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Backup path for `path` at `timestamp`.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use dbf_commander::backup::backup_path;
/// use std::path::Path;
///
/// let ts = NaiveDate::from_ymd_opt(2024, 5, 17).unwrap().and_hms_opt(9, 3, 7).unwrap();
/// let backup = backup_path(Path::new("/data/CLIENTS.DBF"), ts);
/// assert_eq!(backup, Path::new("/data/CLIENTS_backup_20240517_090307.DBF"));
/// ```
pub fn backup_path(path: &Path, timestamp: NaiveDateTime) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = format!("{}_backup_{}{}", stem, timestamp.format(BACKUP_TIMESTAMP_FORMAT), ext);
    path.with_file_name(name)
}

/// `backup` with `_<n>` appended to its stem
fn numbered(backup: &Path, n: usize) -> PathBuf {
    let stem = backup
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = backup
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    backup.with_file_name(format!("{}_{}{}", stem, n, ext))
}

/// Copies `path` byte-for-byte to a timestamped backup beside it.
///
/// Any failure is returned; callers abort the mutation they were about to make.
pub fn create_backup(path: &Path) -> io::Result<PathBuf> {
    create_backup_at(path, Local::now().naive_local())
}

pub(crate) fn create_backup_at(path: &Path, timestamp: NaiveDateTime) -> io::Result<PathBuf> {
    let mut source = File::open(path)?;
    let first = backup_path(path, timestamp);
    let mut n = 1;
    loop {
        let target = if n == 1 { first.clone() } else { numbered(&first, n) };
        // create_new: an existing backup is never overwritten
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                n += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        if let Err(e) = io::copy(&mut source, &mut file).and_then(|_| file.sync_all()) {
            if let Err(cleanup) = fs::remove_file(&target) {
                warn!("Could not remove partial backup {}: {}", target.display(), cleanup);
            }
            return Err(e);
        }
        info!("Created backup {}", target.display());
        return Ok(target);
    }
}

/// Replaces `path` with whatever `write` produces.
///
/// The content goes to a temporary file in the target directory, which is
/// renamed over `path` only if `write` succeeds. On failure the original file
/// is untouched and the temporary file is removed.
pub fn write_atomically<F, E>(path: &Path, write: F) -> Result<(), E>
where
    F: FnOnce(&mut File) -> Result<(), E>,
    E: From<io::Error>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| E::from(e.error))?;
    Ok(())
}
