use camino::Utf8PathBuf;

pub const DEFAULT_BASE_PORT: u16 = 9470;

/// `$HOME/.nectar`, falling back to the working directory.
#[must_use]
pub fn default_node_dir() -> Utf8PathBuf {
    std::env::var("HOME").map_or_else(
        |_| Utf8PathBuf::from(".nectar"),
        |home| Utf8PathBuf::from(home).join(".nectar"),
    )
}
