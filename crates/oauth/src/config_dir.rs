use std::path::PathBuf;

/// `~/.config/sfdup` (or the platform equivalent).
pub(crate) fn sfdup_config_dir() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.config_dir().join("sfdup"))
        .unwrap_or_else(|| PathBuf::from(".sfdup"))
}
