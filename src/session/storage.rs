//! File-backed session storage.
//!
//! Sessions are kept one JSON file per id in a private directory. The
//! directory must live outside the public document root and is created (or
//! tightened) to owner-only permissions; if that is not possible the backend
//! refuses to start.

use chrono::{DateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{GuardError, GuardResult};
use crate::session::store::{is_valid_session_id, SessionBackend, SessionRecord};

const FILE_PREFIX: &str = "sess_";

/// Create or verify the session directory. Returns its canonical path.
///
/// A directory inside `public_root` is refused before anything is created.
pub fn prepare_storage_dir(dir: &Path, public_root: Option<&Path>) -> GuardResult<PathBuf> {
    let root = public_root.map(resolve_root).transpose()?;
    if let Some(root) = &root {
        ensure_outside(&prospective_path(dir)?, root)?;
    }

    if !dir.exists() {
        create_private_dir(dir).map_err(|e| {
            GuardError::Configuration(format!(
                "cannot create session storage {}: {}",
                dir.display(),
                e
            ))
        })?;
        info!("Created session storage directory {}", dir.display());
    }

    let canonical = dir.canonicalize().map_err(|e| {
        GuardError::Configuration(format!("cannot resolve session storage {}: {}", dir.display(), e))
    })?;

    if !canonical.is_dir() {
        return Err(GuardError::Configuration(format!(
            "session storage {} is not a directory",
            canonical.display()
        )));
    }

    // Symlinks can still lead into the root
    if let Some(root) = &root {
        ensure_outside(&canonical, root)?;
    }

    restrict_permissions(&canonical).map_err(|e| {
        GuardError::Configuration(format!(
            "cannot restrict permissions on {}: {}",
            canonical.display(),
            e
        ))
    })?;

    Ok(canonical)
}

fn resolve_root(root: &Path) -> GuardResult<PathBuf> {
    match root.canonicalize() {
        Ok(canonical) => Ok(canonical),
        Err(_) => lexical_absolute(root),
    }
}

/// Absolute path with `.` and `..` resolved without touching the filesystem
fn lexical_absolute(path: &Path) -> GuardResult<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Where `dir` will live once created: the deepest existing ancestor,
/// canonicalized, plus the components still to be made
fn prospective_path(dir: &Path) -> GuardResult<PathBuf> {
    let absolute = lexical_absolute(dir)?;
    for ancestor in absolute.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            let rest = absolute.strip_prefix(ancestor).unwrap_or(Path::new(""));
            return Ok(canonical.join(rest));
        }
    }
    Ok(absolute)
}

fn ensure_outside(dir: &Path, root: &Path) -> GuardResult<()> {
    if dir.starts_with(root) {
        return Err(GuardError::Configuration(format!(
            "session storage {} is inside public root {}",
            dir.display(),
            root.display()
        )));
    }
    Ok(())
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn restrict_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(dir)?.permissions().mode() & 0o777;
    if mode != 0o700 {
        warn!("Tightening session storage permissions from {:o} to 700", mode);
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// One JSON file per session under a private directory
#[derive(Debug, Clone)]
pub struct FileSessionBackend {
    dir: PathBuf,
}

impl FileSessionBackend {
    pub fn new(dir: &Path, public_root: Option<&Path>) -> GuardResult<Self> {
        Ok(Self {
            dir: prepare_storage_dir(dir, public_root)?,
        })
    }

    pub fn from_config(config: &SessionConfig) -> GuardResult<Self> {
        let dir = config.storage_dir.as_deref().ok_or_else(|| {
            GuardError::Configuration("session storage_dir is not configured".to_string())
        })?;
        Self::new(dir, config.public_root.as_deref())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> GuardResult<PathBuf> {
        if !is_valid_session_id(id) {
            return Err(GuardError::Validation("invalid session id".to_string()));
        }
        Ok(self.dir.join(format!("{}{}.json", FILE_PREFIX, id)))
    }
}

impl SessionBackend for FileSessionBackend {
    fn load(&self, id: &str) -> GuardResult<Option<SessionRecord>> {
        let path = self.path_for(id)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GuardError::Store(format!("failed to read session: {}", e))),
        }
    }

    fn save(&self, id: &str, record: &SessionRecord) -> GuardResult<()> {
        let path = self.path_for(id)?;
        let tmp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(record)?;

        write_private_file(&tmp, &bytes)
            .and_then(|_| fs::rename(&tmp, &path))
            .map_err(|e| GuardError::Store(format!("failed to write session: {}", e)))?;
        debug!("Saved session file {}", path.display());
        Ok(())
    }

    fn remove(&self, id: &str) -> GuardResult<()> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GuardError::Store(format!("failed to remove session: {}", e))),
        }
    }

    /// Idle time is the file's modification time. Leftover `.tmp` files from
    /// interrupted writes are swept too.
    fn purge_idle(&self, cutoff: DateTime<Utc>) -> GuardResult<usize> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| GuardError::Store(format!("failed to list sessions: {}", e)))?;

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_session_file(&path) {
                continue;
            }
            let modified = match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    warn!("Skipping session file {}: {}", path.display(), e);
                    continue;
                }
            };
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to purge session file {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

/// `sess_<id>.json` or `sess_<id>.tmp` with a well-formed id
fn is_session_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let Some(rest) = name.strip_prefix(FILE_PREFIX) else {
        return false;
    };
    rest.strip_suffix(".json")
        .or_else(|| rest.strip_suffix(".tmp"))
        .map(is_valid_session_id)
        .unwrap_or(false)
}

#[cfg(unix)]
fn write_private_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
