//! Centralized path configuration for subnetd.
//!
//! All on-disk state goes through this module so the agent binary and any
//! embedding daemon agree on locations, whether running as root or as a user.

use std::path::PathBuf;

/// Get the subnetd data directory.
///
/// Resolution order:
/// 1. `SUBNETD_DATA_DIR` environment variable
/// 2. `/var/lib/subnetd` if it exists (system install)
/// 3. `~/.subnetd` for user-only installs
pub fn data_dir() -> PathBuf {
    resolve_data_dir(std::env::var("SUBNETD_DATA_DIR").ok())
}

fn resolve_data_dir(env_override: Option<String>) -> PathBuf {
    if let Some(dir) = env_override {
        return PathBuf::from(dir);
    }

    let system_dir = PathBuf::from("/var/lib/subnetd");
    if system_dir.exists() {
        return system_dir;
    }

    dirs::home_dir().map(|h| h.join(".subnetd")).unwrap_or(system_dir)
}

/// Get the root directory holding one config directory per network id.
pub fn confs_dir() -> PathBuf {
    data_dir().join("dhcp")
}

/// Get the runtime directory for sockets and other ephemeral files.
///
/// Resolution order:
/// 1. `SUBNETD_RUNTIME_DIR` environment variable
/// 2. `$XDG_RUNTIME_DIR/subnetd` if XDG_RUNTIME_DIR is set
/// 3. `/run/subnetd` if running as root
/// 4. `/tmp/subnetd-runtime` as fallback
pub fn runtime_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SUBNETD_RUNTIME_DIR") {
        return PathBuf::from(dir);
    }

    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(xdg).join("subnetd");
    }

    #[cfg(unix)]
    {
        if unsafe { libc::geteuid() } == 0 {
            return PathBuf::from("/run/subnetd");
        }
    }

    PathBuf::from("/tmp/subnetd-runtime")
}

/// Default path of the Unix socket that receives lease-change notifications.
pub fn relay_socket_path() -> PathBuf {
    runtime_dir().join("dhcp-relay.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_override_wins() {
        // Resolved without touching process env so parallel tests that
        // read paths never observe a transient override.
        let dir = resolve_data_dir(Some("/tmp/subnetd-test".to_string()));
        assert_eq!(dir, PathBuf::from("/tmp/subnetd-test"));
    }

    #[test]
    fn test_paths_consistency() {
        assert!(confs_dir().starts_with(data_dir()));
        assert_eq!(relay_socket_path().parent(), Some(runtime_dir().as_path()));
    }
}
