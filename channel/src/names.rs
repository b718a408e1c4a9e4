//! Channel-name validation and the filesystem/shared-memory name mangling
//! described in §6 ("Channel naming").

use crate::error::{ChannelError, Result};
use std::path::PathBuf;

/// Prefix applied to every OS-visible name this crate creates, so multiple
/// tools sharing a `/tmp` and shared-memory namespace don't collide.
const OS_PREFIX: &str = "vtk.";

/// Validates a channel name against §3's grammar: no `/`, no `\`, no `*` or
/// `?`, and must not start with `_`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ChannelError::InvalidName {
            name: name.to_string(),
            reason: "must not be empty",
        });
    }
    if name.starts_with('_') {
        return Err(ChannelError::InvalidName {
            name: name.to_string(),
            reason: "must not start with '_'",
        });
    }
    if name.contains(['/', '\\', '*', '?']) {
        return Err(ChannelError::InvalidName {
            name: name.to_string(),
            reason: "must not contain '/', '\\\\', '*' or '?'",
        });
    }
    Ok(())
}

/// Maps a user-visible name to its mangled OS name, `osname(<name>)`.
pub fn osname(name: &str) -> String {
    format!("{OS_PREFIX}{name}")
}

/// The `shm_open`-compatible name for the control segment: a leading `/`
/// followed by the mangled name, as POSIX shared memory objects require.
pub fn shm_open_name(name: &str) -> String {
    format!("/{}", osname(name))
}

/// The data segment's shared-memory object name, `osname(<name>.d)`.
pub fn data_shm_open_name(name: &str) -> String {
    shm_open_name(&format!("{name}.d"))
}

/// Directory used for placeholder files and subscriber sockets.
pub fn tmp_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

/// Placeholder file path, `<tmp>/<osname>.x`, created alongside a control
/// segment so administrative tooling can enumerate live channels.
pub fn placeholder_path(name: &str) -> PathBuf {
    tmp_dir().join(format!("{}.x", osname(name)))
}

/// Default subscriber-socket prefix, `<tmp>/<osname(name)>`; a given
/// subscriber binds at `<prefix>.<pid>`.
pub fn socket_prefix(name: &str) -> PathBuf {
    tmp_dir().join(osname(name))
}

pub fn socket_path(name: &str, pid: i32) -> PathBuf {
    let mut p = socket_prefix(name).into_os_string();
    p.push(format!(".{pid}"));
    PathBuf::from(p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name("_hidden").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name("a*").is_err());
        assert!(validate_name("a?").is_err());
    }

    #[test]
    fn accepts_good_names() {
        assert!(validate_name("camera1").is_ok());
        assert!(validate_name("cam-front.raw").is_ok());
    }

    #[test]
    fn osname_and_data_name_distinct() {
        let base = osname("cam");
        assert!(shm_open_name("cam").ends_with(&base));
        assert!(data_shm_open_name("cam").ends_with("cam.d"));
    }

    #[test]
    fn socket_path_is_prefix_dot_pid() {
        let p = socket_path("cam", 1234);
        assert!(p.to_string_lossy().ends_with(".1234"));
    }
}
