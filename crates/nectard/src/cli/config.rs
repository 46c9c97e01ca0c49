use clap::Parser;
use eyre::{bail, Result as EyreResult};
use tracing::info;

use nectar_config::ConfigFile;

use crate::cli::RootArgs;

/// Inspect or adjust an initialized node's configuration.
#[derive(Debug, Parser)]
pub struct ConfigCommand {
    /// Change the HTTP listen port
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Change the published relay name
    #[arg(long)]
    pub name: Option<String>,

    /// Print the resulting configuration
    #[arg(long)]
    pub print: bool,
}

impl ConfigCommand {
    pub fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let dir = root_args.node_dir();

        if !ConfigFile::exists(&dir) {
            bail!("node {} is not initialized", dir);
        }

        let mut config = ConfigFile::load(&dir)?;
        let mut changed = false;

        if let Some(port) = self.http_port {
            let mut listen = config.server.listen;
            listen.set_port(port);
            config.server.listen = listen;
            changed = true;
        }

        if let Some(name) = self.name {
            config.relay.name = name;
            changed = true;
        }

        if changed {
            config.save(&dir)?;
            info!(%dir, "configuration updated");
        }

        if self.print {
            println!("http listen : {}", config.server.listen);
            println!("swarm listen: {:?}", config.swarm.listen);
            println!("relay name  : {}", config.relay.name);
            println!("datastore   : {}", config.datastore.path);
            println!("peer id     : {}", config.identity.public().to_peer_id());
        }

        Ok(())
    }
}
