//! XDG directory helpers for config, data and log locations.

use std::path::PathBuf;

const APP_DIR: &str = "pdm-store";

/// Base directory for configuration files.
///
/// Uses `PDM_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/pdm-store` or
/// `~/.config/pdm-store`.
pub fn config_dir() -> PathBuf {
    config_dir_from(|key| std::env::var(key).ok())
}

/// Base directory for persistent data such as the default clone location.
///
/// Uses `PDM_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/pdm-store` or
/// `~/.local/share/pdm-store`.
pub fn data_dir() -> PathBuf {
    data_dir_from(|key| std::env::var(key).ok())
}

/// Default directory for rolling log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

fn config_dir_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    resolve(&lookup, "PDM_CONFIG_DIR", "XDG_CONFIG_HOME", &[".config"])
}

fn data_dir_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    resolve(&lookup, "PDM_DATA_DIR", "XDG_DATA_HOME", &[".local", "share"])
}

fn resolve(
    lookup: &impl Fn(&str) -> Option<String>,
    override_var: &str,
    xdg_var: &str,
    home_fallback: &[&str],
) -> PathBuf {
    let non_empty = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

    if let Some(dir) = non_empty(override_var) {
        return PathBuf::from(dir);
    }

    non_empty(xdg_var)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
            for part in home_fallback {
                base.push(part);
            }
            base
        })
        .join(APP_DIR)
}
