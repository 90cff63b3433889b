use std::path::PathBuf;

const APP_DIR: &str = "asset-mirror";

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_default()
}

pub fn get_config_directory() -> PathBuf {
    let base = match std::env::consts::OS {
        "linux" | "freebsd" | "netbsd" | "openbsd" => std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home().join(".config")),
        "macos" => home().join("Library/Application Support"),
        _ => dirs::config_dir().unwrap_or_default(),
    };

    base.join(APP_DIR)
}

pub fn get_cache_directory() -> PathBuf {
    let base = match std::env::consts::OS {
        "linux" | "freebsd" | "netbsd" | "openbsd" => std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home().join(".cache")),
        "macos" => home().join("Library/Caches"),
        _ => dirs::cache_dir().unwrap_or_default(),
    };

    base.join(APP_DIR)
}

/// Output trees, working copies and restore ledgers.
pub fn get_data_directory() -> PathBuf {
    let base = match std::env::consts::OS {
        "linux" | "freebsd" | "netbsd" | "openbsd" => std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home().join(".local/share")),
        "macos" => home().join("Library/Application Support"),
        _ => dirs::data_dir().unwrap_or_default(),
    };

    base.join(APP_DIR)
}
