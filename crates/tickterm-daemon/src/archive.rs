//! Moves closed terminal directories out of the ephemeral session root.

use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::warn;

fn destination(archive_root: &Path, name: &str, tick: u64) -> PathBuf {
    let base = format!("{name}-tick-{tick}");
    let mut candidate = archive_root.join(&base);
    let mut suffix = 1;
    while candidate.exists() {
        candidate = archive_root.join(format!("{base}-{suffix}"));
        suffix += 1;
    }
    candidate
}

fn copy_dir(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn move_dir(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Archive root may live on another filesystem.
        Err(_) => {
            copy_dir(from, to)?;
            fs::remove_dir_all(from)
        }
    }
}

/// Archives `dir` as `<archive_root>/<name>-tick-<tick>[-<n>]`, dropping the
/// raw stream first. Returns the archive path, or `None` when there was
/// nothing to archive or archiving failed (the directory is then removed).
pub fn archive_terminal_dir(dir: &Path, archive_root: &Path, tick: u64) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }
    let name = dir.file_name()?.to_string_lossy().into_owned();

    if let Err(e) = fs::remove_file(dir.join("raw")) {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(dir = %dir.display(), error = %e, "failed to drop raw stream");
        }
    }

    let result = fs::create_dir_all(archive_root).and_then(|()| {
        let dest = destination(archive_root, &name, tick);
        move_dir(dir, &dest).map(|()| dest)
    });
    match result {
        Ok(dest) => {
            debug!(from = %dir.display(), to = %dest.display(), "archived terminal directory");
            Some(dest)
        }
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "archive failed, discarding directory");
            if let Err(e) = fs::remove_dir_all(dir) {
                warn!(dir = %dir.display(), error = %e, "failed to remove terminal directory");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("raw"), "\x1b[1mbold").unwrap();
        fs::write(dir.join("scrollback"), "hello\n").unwrap();
        dir
    }

    #[test]
    fn test_archive_drops_raw_and_keeps_scrollback() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = populated(&tmp.path().join("sessions"), "term_1");
        let archive = tmp.path().join("archive");

        let dest = archive_terminal_dir(&dir, &archive, 7).unwrap();
        assert_eq!(dest, archive.join("term_1-tick-7"));
        assert!(!dir.exists());
        assert!(!dest.join("raw").exists());
        assert_eq!(fs::read_to_string(dest.join("scrollback")).unwrap(), "hello\n");
    }

    #[test]
    fn test_archive_suffixes_collisions() {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = tmp.path().join("sessions");
        let archive = tmp.path().join("archive");

        let first = archive_terminal_dir(&populated(&sessions, "term_0"), &archive, 3).unwrap();
        let second = archive_terminal_dir(&populated(&sessions, "term_0"), &archive, 3).unwrap();
        let third = archive_terminal_dir(&populated(&sessions, "term_0"), &archive, 3).unwrap();
        assert_eq!(first, archive.join("term_0-tick-3"));
        assert_eq!(second, archive.join("term_0-tick-3-1"));
        assert_eq!(third, archive.join("term_0-tick-3-2"));
    }

    #[test]
    fn test_missing_directory_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(archive_terminal_dir(&tmp.path().join("nope"), tmp.path(), 1).is_none());
    }
}
