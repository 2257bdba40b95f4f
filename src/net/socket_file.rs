//! Filesystem socket lifecycle: stale-file cleanup, permissions, removal.
//!
//! # Responsibilities
//! - Refuse to bind when the parent directory is missing
//! - Remove a socket file left behind by a crashed process
//! - Refuse to clobber a live socket or a non-socket file
//! - Apply file mode and group ownership after bind
//! - Remove the socket file on teardown
//!
//! On platforms without filesystem sockets every function is a no-op.

use std::io;
use std::path::Path;

/// Group id meaning "leave the socket file's group unchanged".
pub const GROUP_UNCHANGED: i32 = -1;

/// Highest group id accepted by configuration.
pub const MAX_GID: i32 = 32767;

/// Get `path` ready for a fresh bind.
#[cfg(unix)]
pub fn prepare_socket_path(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("parent directory {} does not exist", parent.display()),
            ));
        }
    }

    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }

    match UnixStream::connect(path) {
        Ok(_live) => Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{} is served by another process", path.display()),
        )),
        Err(e)
            if e.kind() == io::ErrorKind::ConnectionRefused
                || e.kind() == io::ErrorKind::NotFound =>
        {
            tracing::debug!(path = %path.display(), "Removing stale socket file");
            match std::fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
pub fn prepare_socket_path(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Apply `mode` and, unless it is [`GROUP_UNCHANGED`], group `gid` to the
/// socket file at `path`.
#[cfg(unix)]
pub fn ensure_socket_file(path: &Path, mode: u32, gid: i32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;

    if gid != GROUP_UNCHANGED {
        let gid = u32::try_from(gid).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid group id {}", gid))
        })?;
        nix::unistd::chown(path, None, Some(nix::unistd::Gid::from_raw(gid)))
            .map_err(io::Error::from)?;
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_socket_file(_path: &Path, _mode: u32, _gid: i32) -> io::Result<()> {
    Ok(())
}

/// Remove the socket file at `path`. A missing file is not an error.
pub fn remove_socket_file(path: &Path) {
    if let Err(error) = std::fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "Failed to remove socket file"
            );
        }
    }
}
