use fs2::FileExt;
use sitewatch_core::{Digest, Error, Result};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Previously observed document, as read from disk.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub digest: Digest,
    /// True when the file did not exist and was created empty.
    pub created: bool,
}

/// Exclusive owner of one snapshot path for the duration of a run.
/// The lock is released when the store is dropped.
pub struct SnapshotStore {
    path: PathBuf,
    _lock: LockGuard,
}

impl SnapshotStore {
    /// Lock `<path>.lock`, then load (or create) the snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<(Self, Snapshot)> {
        let path = path.into();
        let lock = lock_file(&lock_path(&path))?;
        let snapshot = load(&path)?;
        Ok((Self { path, _lock: lock }, snapshot))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot with `bytes`. Readers see either the old or the
    /// new document, never a mix.
    pub fn replace(&self, bytes: &[u8]) -> Result<()> {
        write_atomic(&self.path, bytes)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "snapshot replaced");
        Ok(())
    }
}

/// Sibling lock file for a snapshot path: `page.html` -> `page.html.lock`.
pub fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Read the snapshot at `path`. A missing file is created empty and reported
/// with the digest of zero bytes; any other failure is a storage error.
pub fn load(path: &Path) -> Result<Snapshot> {
    let mut file = match fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fs::File::create(path).map_err(|e| Error::storage(path, e))?;
            info!(path = %path.display(), "creating a new snapshot");
            return Ok(Snapshot {
                path: path.to_path_buf(),
                bytes: Vec::new(),
                digest: Digest::empty(),
                created: true,
            });
        }
        Err(e) => return Err(Error::storage(path, e)),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| Error::storage(path, e))?;
    let digest = Digest::of(&bytes);
    info!(path = %path.display(), bytes = bytes.len(), %digest, "loaded snapshot");
    Ok(Snapshot {
        path: path.to_path_buf(),
        bytes,
        digest,
        created: false,
    })
}

/// Atomic write: write to temp file in same dir, then rename. Existing file
/// permissions carry over to the replacement.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let io = |e: std::io::Error| Error::storage(path, e);
    fs::create_dir_all(parent).map_err(io)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io)?;
    tmp.write_all(data).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions()).map_err(io)?;
    }
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

/// File-based exclusive lock guard.
pub struct LockGuard {
    _file: fs::File,
}

/// Acquire an exclusive lock without waiting. Creates the lock file if
/// needed; a lock held elsewhere is `Error::Locked`.
pub fn lock_file(path: &Path) -> Result<LockGuard> {
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| Error::storage(path, e))?;
    file.try_lock_exclusive()
        .map_err(|e| lock_error(path, e))?;
    Ok(LockGuard { _file: file })
}

/// Contention is `Error::Locked`; ENOLCK, EIO and the like are storage errors.
fn lock_error(path: &Path, e: std::io::Error) -> Error {
    if e.raw_os_error().is_some()
        && e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
    {
        Error::Locked(path.to_path_buf())
    } else {
        Error::storage(path, e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_creates_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.html");
        let snap = load(&path).unwrap();
        assert!(snap.created);
        assert!(snap.bytes.is_empty());
        assert_eq!(snap.digest, Digest::empty());
        assert!(path.exists());
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn load_existing_hashes_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.html");
        fs::write(&path, "<h2>test</h2>").unwrap();
        let snap = load(&path).unwrap();
        assert!(!snap.created);
        assert_eq!(snap.bytes, b"<h2>test</h2>");
        assert_eq!(snap.digest, Digest::of(b"<h2>test</h2>"));
    }

    #[test]
    fn load_directory_is_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(load(tmp.path()), Err(Error::Storage { .. })));
    }

    #[test]
    fn replace_shorter_leaves_no_trailing_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.html");
        fs::write(&path, "a much longer previous document").unwrap();
        let (store, _) = SnapshotStore::open(&path).unwrap();
        store.replace(b"short").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"short");
    }

    #[cfg(unix)]
    #[test]
    fn replace_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.html");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        write_atomic(&path, b"new").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn second_open_is_locked_until_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("page.html");
        let (store, _) = SnapshotStore::open(&path).unwrap();
        assert!(lock_path(&path).exists());
        assert!(matches!(SnapshotStore::open(&path), Err(Error::Locked(_))));
        drop(store);
        assert!(SnapshotStore::open(&path).is_ok());
    }

    #[test]
    fn only_contention_maps_to_locked() {
        let path = Path::new("/tmp/site.html.lock");
        assert!(matches!(
            lock_error(path, fs2::lock_contended_error()),
            Error::Locked(_)
        ));
        assert!(matches!(
            lock_error(path, std::io::Error::other("no locks available")),
            Error::Storage { .. }
        ));
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/tmp/site.html")),
            PathBuf::from("/tmp/site.html.lock")
        );
    }
}
