use std::fs::create_dir_all;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{bail, Result as EyreResult, WrapErr};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nectar_config::ConfigFile;
use nectar_network::NetworkConfig;
use nectar_node::{serve_streams, Engine, Limits};
use nectar_server::ServerConfig;
use nectar_store::Database;
use nectar_store_rocksdb::RocksDB;
use nectar_sync::SyncConfig;

use crate::cli::RootArgs;

/// Run an initialized node until interrupted.
#[derive(Debug, Parser)]
pub struct RunCommand {}

impl RunCommand {
    pub async fn run(self, root_args: &RootArgs) -> EyreResult<()> {
        let dir = root_args.node_dir();

        if !ConfigFile::exists(&dir) {
            bail!("node {} is not initialized", dir);
        }

        let config = ConfigFile::load(&dir)?;

        let db_path = dir.join(&config.datastore.path);
        create_dir_all(&db_path).wrap_err_with(|| format!("failed to create {db_path}"))?;

        let db: Arc<dyn Database> = Arc::new(RocksDB::open(&db_path)?);

        let limits = Limits {
            queue_capacity: config.limits.subscription_queue,
            allowed_mime: config.limits.allowed_mime.clone(),
            sync: SyncConfig {
                handshake_timeout: Duration::from_millis(config.limits.handshake_timeout_ms),
                read_timeout: Duration::from_millis(config.limits.read_timeout_ms),
                reject_busy: config.limits.reject_busy_root,
            },
            auth_window_secs: config.limits.auth_window_secs,
        };

        let engine = Arc::new(Engine::new(db, limits));
        let cancel = CancellationToken::new();

        let network_config = NetworkConfig::new(config.identity.clone(), config.swarm.listen.clone());
        let (network, network_task) = nectar_network::spawn(&network_config, cancel.clone())?;

        info!(peer_id = %network.local_peer_id(), "relay identity");

        let streams_task = tokio::spawn({
            let engine = Arc::clone(&engine);
            let network = network.clone();
            let cancel = cancel.clone();
            async move { serve_streams(engine, &network, cancel).await }
        });

        let server_config = ServerConfig {
            listen: config.server.listen,
            relay: config.relay.clone(),
        };

        let server = nectar_server::serve(Arc::clone(&engine), server_config, cancel.clone());

        tokio::select! {
            result = server => result?,
            () = shutdown_signal() => {
                info!("shutdown signal received");
            }
        }

        cancel.cancel();

        let _streams = streams_task.await;
        let _network = network_task.await;

        info!("relay stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
