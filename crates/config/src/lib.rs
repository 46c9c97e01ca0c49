//! On-disk configuration of a relay node: identity keypair, swarm and
//! HTTP listeners, datastore location, relay metadata and operational
//! limits, persisted as `config.toml` in the node home.

use std::net::SocketAddr;

use camino::{Utf8Path, Utf8PathBuf};
use eyre::{Result as EyreResult, WrapErr};
use multiaddr::Multiaddr;
use serde::{Deserialize, Serialize};

use nectar_server::RelayInfo;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(
        with = "serde_identity",
        default = "libp2p_identity::Keypair::generate_ed25519"
    )]
    pub identity: libp2p_identity::Keypair,

    pub swarm: SwarmConfig,

    pub server: HttpConfig,

    pub datastore: DataStoreConfig,

    pub relay: RelayInfo,

    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SwarmConfig {
    pub listen: Vec<Multiaddr>,
}

#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
pub struct HttpConfig {
    pub listen: SocketAddr,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DataStoreConfig {
    pub path: Utf8PathBuf,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Outbound events buffered per connection before drop-oldest.
    pub subscription_queue: usize,

    /// Blob MIME allow-list; empty allows every type.
    pub allowed_mime: Vec<String>,

    /// Initial-read timeout on transfer streams, milliseconds.
    pub handshake_timeout_ms: u64,

    /// Data-read timeout on transfer streams, milliseconds.
    pub read_timeout_ms: u64,

    /// Reject a second uploader on a busy root instead of queueing it.
    pub reject_busy_root: bool,

    /// Signed-envelope freshness window, seconds either side of now.
    pub auth_window_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            subscription_queue: 256,
            allowed_mime: Vec::new(),
            handshake_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            reject_busy_root: false,
            auth_window_secs: 60,
        }
    }
}

impl ConfigFile {
    #[must_use]
    pub fn exists(dir: &Utf8Path) -> bool {
        dir.join(CONFIG_FILE).is_file()
    }

    pub fn load(dir: &Utf8Path) -> EyreResult<Self> {
        let path = dir.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("failed to read {path}"))?;

        toml::from_str(&raw).wrap_err_with(|| format!("failed to parse {path}"))
    }

    pub fn save(&self, dir: &Utf8Path) -> EyreResult<()> {
        let path = dir.join(CONFIG_FILE);
        let raw = toml::to_string_pretty(self).wrap_err("failed to serialize config")?;

        std::fs::write(&path, raw).wrap_err_with(|| format!("failed to write {path}"))
    }
}

mod serde_identity {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use libp2p_identity::Keypair;
    use serde::de::Error as DeError;
    use serde::ser::Error as SerError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(keypair: &Keypair, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = keypair
            .to_protobuf_encoding()
            .map_err(|e| S::Error::custom(format!("unencodable keypair: {e}")))?;

        serializer.serialize_str(&BASE64.encode(encoded))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Keypair, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| D::Error::custom(format!("invalid base64 identity: {e}")))?;

        Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| D::Error::custom(format!("invalid identity: {e}")))
    }
}
