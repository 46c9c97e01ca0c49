use libp2p_identity::Keypair;
use multiaddr::Multiaddr;

/// Swarm configuration: the node identity and its listen addresses.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub identity: Keypair,
    pub listen: Vec<Multiaddr>,
}

impl NetworkConfig {
    #[must_use]
    pub fn new(identity: Keypair, listen: Vec<Multiaddr>) -> Self {
        Self { identity, listen }
    }
}
