use anyhow::Result;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "stack-installer";

/// Resolve the default parent directory for the installation target.
///
/// Prefers the user's home directory; falls back to the current working directory.
pub fn resolve_default_parent() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home;
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Resolve log folder (absolute path), creating it if needed.
///
/// Strategy:
/// - An explicit override (CLI `--log-dir` or config `log_dir`) wins
/// - Otherwise `<data_local_dir>/stack-installer/logs`
/// - Otherwise `./stack-installer-logs` next to the working directory
pub fn resolve_log_folder(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(d) => d.to_path_buf(),
        None => match dirs::data_local_dir() {
            Some(base) => base.join(APP_DIR).join("logs"),
            None => std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("stack-installer-logs"),
        },
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
    Ok(dir)
}

/// Default location of the optional TOML config file.
pub fn default_config_file() -> PathBuf {
    PathBuf::from("stack-installer.toml")
}
