use dirs::home_dir;
use std::path::PathBuf;

/// Returns the connect home directory, or None if the user's home cannot be resolved.
pub fn try_connect_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("CONNECT_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".connect"))
}

/// Returns the connect home directory (`~/.connect`), falling back to the
/// current directory when no home can be resolved.
pub fn connect_home() -> PathBuf {
    try_connect_home().unwrap_or_else(|| PathBuf::from(".connect"))
}

/// Default configuration file: ~/.connect/config.toml
pub fn config_path() -> PathBuf {
    connect_home().join("config.toml")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.split('/').next_back().unwrap_or("")
}
