// marksync platform paths
// Config and data locations per OS, selected with `cfg(target_os)`.

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MARKSYNC_DATA_DIR";

#[cfg_attr(target_os = "windows", allow(dead_code))]
fn home_dir() -> PathBuf {
    PathBuf::from(env::var("HOME").unwrap_or_else(|_| String::from("/tmp")))
}

/// Returns the configuration directory.
///
/// - **Linux**: `$XDG_CONFIG_HOME/marksync` or `~/.config/marksync`
/// - **macOS**: `~/Library/Application Support/marksync`
/// - **Windows**: `%APPDATA%/marksync`
pub fn get_config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA")
            .unwrap_or_else(|_| String::from("C:\\Users\\Default\\AppData\\Roaming"));
        PathBuf::from(appdata).join("marksync")
    }
    #[cfg(target_os = "macos")]
    {
        home_dir()
            .join("Library")
            .join("Application Support")
            .join("marksync")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => PathBuf::from(xdg).join("marksync"),
            Err(_) => home_dir().join(".config").join("marksync"),
        }
    }
}

/// Returns the data directory, honoring `$MARKSYNC_DATA_DIR`.
///
/// - **Linux**: `$XDG_DATA_HOME/marksync` or `~/.local/share/marksync`
/// - **macOS**: `~/Library/Application Support/marksync`
/// - **Windows**: `%APPDATA%/marksync`
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    #[cfg(any(target_os = "windows", target_os = "macos"))]
    {
        get_config_dir()
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        match env::var("XDG_DATA_HOME") {
            Ok(xdg) => PathBuf::from(xdg).join("marksync"),
            Err(_) => home_dir().join(".local").join("share").join("marksync"),
        }
    }
}

/// Default SQLite database location.
pub fn default_database_path() -> PathBuf {
    get_data_dir().join("marksync.db")
}
