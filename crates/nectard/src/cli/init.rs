use std::fs::create_dir_all;

use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use tracing::info;

use nectar_config::{ConfigFile, DataStoreConfig, HttpConfig, LimitsConfig, SwarmConfig};
use nectar_server::RelayInfo;

use crate::cli::RootArgs;
use crate::defaults;

/// Initialize a node: create the home directory, generate an identity
/// and write the default configuration.
#[derive(Debug, Parser)]
pub struct InitCommand {
    /// Base port; HTTP serves here, libp2p at base+1
    #[arg(long, default_value_t = defaults::DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// Relay name published in the discovery document
    #[arg(long, default_value = "nectar relay")]
    pub name: String,

    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let dir = root_args.node_dir();

        create_dir_all(&dir).wrap_err_with(|| format!("failed to create {dir}"))?;

        if ConfigFile::exists(&dir) && !self.force {
            bail!("node {} is already initialized (use --force to overwrite)", dir);
        }

        let identity = libp2p_identity::Keypair::generate_ed25519();
        info!(peer_id = %identity.public().to_peer_id(), "generated identity");

        let swarm_port = self.base_port + 1;

        let config = ConfigFile {
            identity,
            swarm: SwarmConfig {
                listen: vec![
                    format!("/ip4/0.0.0.0/tcp/{swarm_port}").parse()?,
                    format!("/ip4/0.0.0.0/udp/{swarm_port}/quic-v1").parse()?,
                ],
            },
            server: HttpConfig {
                listen: format!("0.0.0.0:{}", self.base_port).parse()?,
            },
            datastore: DataStoreConfig {
                path: "data".into(),
            },
            relay: RelayInfo {
                name: self.name,
                description: String::new(),
                pubkey: None,
                supported_nips: vec![1, 9, 11],
                base_port: self.base_port,
            },
            limits: LimitsConfig::default(),
        };

        config.save(&dir)?;

        info!(%dir, "node initialized");
        Ok(())
    }
}
