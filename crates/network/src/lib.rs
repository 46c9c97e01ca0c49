//! libp2p surface of the relay: a minimal swarm (identify, ping, raw
//! streams) plus the framed [`RelayStream`] the DAG transfer protocols
//! run over. Discovery behaviours belong to external collaborators and
//! are deliberately absent.

use futures_util::StreamExt;
use libp2p::swarm::SwarmEvent;
use libp2p::StreamProtocol;
use libp2p_stream::{Control, IncomingStreams};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod behaviour;
mod config;
mod stream;

pub use behaviour::{Behaviour, BehaviourEvent};
pub use config::NetworkConfig;
pub use libp2p::PeerId;
pub use stream::RelayStream;

pub const UPLOAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/nectar/upload/1.0.0");
pub const DOWNLOAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/nectar/download/1.0.0");
pub const QUERY_PROTOCOL: StreamProtocol = StreamProtocol::new("/nectar/query/1.0.0");

/// Handle for accepting inbound protocol streams while the swarm task
/// pumps events in the background.
#[derive(Clone)]
pub struct NetworkHandle {
    control: Control,
    local_peer_id: PeerId,
}

impl std::fmt::Debug for NetworkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkHandle")
            .field("local_peer_id", &self.local_peer_id)
            .finish_non_exhaustive()
    }
}

impl NetworkHandle {
    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Register as the acceptor for `protocol`; at most one acceptor per
    /// protocol may exist.
    pub fn accept(&self, protocol: StreamProtocol) -> eyre::Result<IncomingStreams> {
        self.control
            .clone()
            .accept(protocol)
            .map_err(|e| eyre::eyre!("protocol already registered: {e}"))
    }
}

/// Build the swarm and spawn its event pump; returns once listen
/// addresses are registered with the swarm.
pub fn spawn(
    config: &NetworkConfig,
    cancel: CancellationToken,
) -> eyre::Result<(NetworkHandle, JoinHandle<()>)> {
    let swarm = Behaviour::build_swarm(config)?;

    let handle = NetworkHandle {
        control: swarm.behaviour().stream.new_control(),
        local_peer_id: *swarm.local_peer_id(),
    };

    let task = tokio::spawn(run(swarm, cancel));

    Ok((handle, task))
}

async fn run(mut swarm: libp2p::Swarm<Behaviour>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("network task shutting down");
                break;
            }
            event = swarm.select_next_some() => match event {
                SwarmEvent::NewListenAddr { address, .. } => {
                    info!(%address, "listening");
                }
                SwarmEvent::Behaviour(BehaviourEvent::Identify(event)) => {
                    debug!(?event, "identify");
                }
                SwarmEvent::Behaviour(BehaviourEvent::Ping(event)) => {
                    debug!(peer = %event.peer, result = ?event.result, "ping");
                }
                SwarmEvent::IncomingConnectionError { error, .. } => {
                    warn!(%error, "inbound connection failed");
                }
                other => {
                    debug!(?other, "swarm event");
                }
            },
        }
    }
}
