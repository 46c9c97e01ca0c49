//! The service discovery document served on `/` under content
//! negotiation: relay metadata plus the fixed port offsets clients use
//! to reach the adjacent services.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use nectar_primitives::Pubkey;

/// Offset of the libp2p endpoint from the base port.
pub const LIBP2P_PORT_OFFSET: u16 = 1;
/// Offset of the administrative panel from the base port.
pub const PANEL_PORT_OFFSET: u16 = 2;

/// Static relay metadata, set by the operator in the config file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<Pubkey>,

    #[serde(default)]
    pub supported_nips: Vec<u32>,

    pub base_port: u16,
}

impl RelayInfo {
    /// The `application/nostr+json` document.
    #[must_use]
    pub fn document(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "pubkey": self.pubkey,
            "supported_nips": self.supported_nips,
            "software": env!("CARGO_PKG_REPOSITORY"),
            "version": env!("CARGO_PKG_VERSION"),
            "base_port": self.base_port,
            "service_ports": {
                "libp2p": self.base_port + LIBP2P_PORT_OFFSET,
                "panel": self.base_port + PANEL_PORT_OFFSET,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_carries_service_ports() {
        let info = RelayInfo {
            name: "test relay".to_owned(),
            description: "unit test".to_owned(),
            pubkey: None,
            supported_nips: vec![1, 9, 11],
            base_port: 9000,
        };

        let doc = info.document();
        assert_eq!(doc["name"], "test relay");
        assert_eq!(doc["base_port"], 9000);
        assert_eq!(doc["service_ports"]["libp2p"], 9001);
        assert_eq!(doc["service_ports"]["panel"], 9002);
        assert!(doc["version"].as_str().is_some_and(|v| !v.is_empty()));
    }
}
