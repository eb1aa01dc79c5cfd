//! Filesystem convenience helpers
//!
//! These return `crossgrader_errors::Error` with the offending path attached.

use crossgrader_errors::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, Error>;

/// Replace `path` with `contents` via a temp file in the same directory and a rename
///
/// Readers see either the old or the new file, never a partial one.
///
/// # Errors
///
/// Returns an I/O error if the parent directory cannot be created or the
/// temp file cannot be written, synced or renamed.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| Error::io_with_path(&e, &parent))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.tmp-{}", std::process::id()));

    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| Error::io_with_path(&e, &tmp))?;
    file.write_all(contents)
        .await
        .map_err(|e| Error::io_with_path(&e, &tmp))?;
    file.sync_all()
        .await
        .map_err(|e| Error::io_with_path(&e, &tmp))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(Error::io_with_path(&e, path));
    }
    Ok(())
}

/// Remove a file, treating "already gone" as success
///
/// # Errors
///
/// Returns an I/O error for anything other than `NotFound`.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Remove a directory tree, treating "already gone" as success
///
/// # Errors
///
/// Returns an I/O error for anything other than `NotFound`.
pub async fn remove_dir_all_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Sorted entries of a directory; a missing directory yields nothing
///
/// # Errors
///
/// Returns an I/O error if the directory exists but cannot be read.
pub async fn list_dir(path: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io_with_path(&e, path)),
    };
    let mut out = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_with_path(&e, path))?
    {
        out.push(entry.path());
    }
    out.sort();
    Ok(out)
}
