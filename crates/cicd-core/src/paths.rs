//! On-disk layout and atomic writes.
//!
//! Session scratch lives under `$XDG_CACHE_HOME/cicd-toolkit/sessions/<id>/`
//! (falling back to `~/.cache`). Writes go through a `<path>.tmp.<nanos>`
//! intermediate and a rename so a crash leaves either the prior content or
//! the full new content.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cicd-toolkit";

/// Root of the tool's cache tree.
pub fn cache_root() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        if !xdg.trim().is_empty() {
            return PathBuf::from(xdg).join(APP_DIR);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".cache").join(APP_DIR)
}

/// Scratch directory for one session.
pub fn session_dir(session_id: &str) -> PathBuf {
    cache_root().join("sessions").join(session_id)
}

/// Create the scratch directory for a session.
pub fn ensure_session_dir(session_id: &str) -> Result<PathBuf> {
    let dir = session_dir(session_id);
    fs::create_dir_all(&dir).map_err(|e| Error::Unknown(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}

/// Remove a session's scratch directory. Missing directories are fine.
pub fn remove_session_dir(session_id: &str) -> Result<()> {
    let dir = session_dir(session_id);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Unknown(format!("{}: {e}", dir.display()))),
    }
}

/// Write `contents` to `path` atomically via a tmp-and-rename intermediate.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::invalid_input(format!("no parent dir for {}", path.display())))?;
    fs::create_dir_all(parent).map_err(|e| Error::Unknown(format!("{}: {e}", parent.display())))?;

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_name = path
        .file_name()
        .ok_or_else(|| Error::invalid_input(format!("no file name in {}", path.display())))?;
    let tmp = path.with_file_name(format!("{}.tmp.{nanos}", file_name.to_string_lossy()));

    let write = |tmp: &Path| -> std::io::Result<()> {
        fs::write(tmp, contents)?;
        fs::rename(tmp, path)
    };
    if let Err(e) = write(&tmp) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::Unknown(format!("{}: {e}", path.display())));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.json");

        atomic_write(&target, b"first").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"first");

        atomic_write(&target, b"second version").unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"second version");

        // No tmp intermediates left behind
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn cache_root_honors_xdg() {
        // Serialized by cargo's per-test process env being private per run;
        // restore the var afterwards for neighbouring tests.
        let prev = std::env::var("XDG_CACHE_HOME").ok();
        std::env::set_var("XDG_CACHE_HOME", "/tmp/xdg-test");
        assert_eq!(cache_root(), PathBuf::from("/tmp/xdg-test/cicd-toolkit"));
        match prev {
            Some(v) => std::env::set_var("XDG_CACHE_HOME", v),
            None => std::env::remove_var("XDG_CACHE_HOME"),
        }
    }

    #[test]
    fn remove_missing_session_dir_is_ok() {
        remove_session_dir("no-such-session-id").unwrap();
        remove_session_dir("no-such-session-id").unwrap();
    }
}
