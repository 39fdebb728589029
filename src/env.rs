//! Environment constants and path utilities.
//!
//! Centralizes the directory names, file names and environment variables used
//! for configuration discovery and logging.

use std::path::{Path, PathBuf};

/// Application directory name (hidden directory like .git, .vscode)
pub const APP_DIR_NAME: &str = ".dockdash";

/// Configuration file name inside [`APP_DIR_NAME`]
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the current directory
pub const LOCAL_CONFIG_FILE_NAME: &str = "dockdash.toml";

/// System-wide configuration directory
#[cfg(unix)]
pub const SYSTEM_CONFIG_DIR: &str = "/etc/dockdash";

/// Overrides `runtime.host` from the configuration file
pub const HOST_ENV_VAR: &str = "DOCKDASH_HOST";

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "dockdash=info";

/// Log filter used with `--verbose`
pub const VERBOSE_LOG_FILTER: &str = "dockdash=debug";

/// Test-related constants
pub mod test {
    /// Set to skip tests that need a running Docker or Podman daemon
    pub const SKIP_CONTAINER_TESTS_ENV_VAR: &str = "SKIP_CONTAINER_TESTS";

    /// Small image used by integration tests
    pub const TEST_IMAGE: &str = "alpine:latest";
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(APP_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build `./.dockdash/config.toml` relative to `current_dir`
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Build `./dockdash.toml` relative to `current_dir`
pub fn local_flat_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.dockdash/config.toml")
        );
        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.dockdash/config.toml")
        );
        assert_eq!(
            local_flat_config_file_path(current_dir),
            Path::new("/current/project/dockdash.toml")
        );
    }
}
