use crate::StoreError;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Atomically replaces the contents of `path` with `data`.
///
/// The bytes go to a fresh `<path>.tmp.<nanos>` file in the same directory,
/// are synced, and the temp file is then renamed over `path`. Readers see
/// either the old file or the new one, never a partial write. If a write,
/// sync or rename fails after the temp file was created, it is removed
/// before the error is returned. A temp name that is already taken is left
/// alone.
pub fn save_data(path: impl AsRef<Path>, data: &[u8]) -> Result<(), StoreError> {
    let path = path.as_ref();
    save_via(path, &temp_path(path), data)
}

fn save_via(path: &Path, tmp: &Path, data: &[u8]) -> Result<(), StoreError> {
    // a taken name belongs to another writer, so there is nothing to clean up
    let file = create_temp(tmp)?;

    if let Err(err) = write_synced(file, data) {
        remove_temp(tmp);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(tmp, path) {
        remove_temp(tmp);
        return Err(err.into());
    }

    sync_parent_dir(path)?;
    debug!(path = %path.display(), bytes = data.len(), "file_io.save.complete");
    Ok(())
}

/// `<path>.tmp.<unix nanos>`, next to `path` so the rename stays on one
/// filesystem.
fn temp_path(path: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut name = OsString::from(path.as_os_str());
    name.push(format!(".tmp.{}", nanos));
    PathBuf::from(name)
}

fn create_temp(tmp: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    // create_new fails if the name is taken instead of clobbering it
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o664);
    }
    options.open(tmp)
}

fn write_synced(mut file: File, data: &[u8]) -> std::io::Result<()> {
    file.write_all(data)?;
    file.sync_all()
}

/// Only called for a temp file this save created.
fn remove_temp(tmp: &Path) {
    if let Err(err) = fs::remove_file(tmp) {
        warn!(tmp = %tmp.display(), error = %err, "file_io.save.cleanup_failed");
    }
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
