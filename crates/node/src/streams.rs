use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nectar_network::{
    NetworkHandle, PeerId, RelayStream, DOWNLOAD_PROTOCOL, QUERY_PROTOCOL, UPLOAD_PROTOCOL,
};
use nectar_sync::{serve_download, serve_query, serve_upload};

use crate::Engine;

/// Accept loops for the three DAG stream protocols. Each inbound stream
/// gets its own task; a child cancellation token tears every transfer
/// down on shutdown.
pub async fn serve_streams(
    engine: Arc<Engine>,
    network: &NetworkHandle,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let mut uploads = network.accept(UPLOAD_PROTOCOL)?;
    let mut downloads = network.accept(DOWNLOAD_PROTOCOL)?;
    let mut queries = network.accept(QUERY_PROTOCOL)?;

    info!("stream protocols registered");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some((peer, stream)) = uploads.next() => {
                let engine = Arc::clone(&engine);
                let cancel = cancel.child_token();
                let _task = tokio::spawn(async move {
                    handle_upload(&engine, peer, RelayStream::new(stream), cancel).await;
                });
            }
            Some((peer, stream)) = downloads.next() => {
                let engine = Arc::clone(&engine);
                let cancel = cancel.child_token();
                let _task = tokio::spawn(async move {
                    handle_download(&engine, peer, RelayStream::new(stream), cancel).await;
                });
            }
            Some((peer, stream)) = queries.next() => {
                let engine = Arc::clone(&engine);
                let cancel = cancel.child_token();
                let _task = tokio::spawn(async move {
                    handle_query(&engine, peer, RelayStream::new(stream), cancel).await;
                });
            }
        }
    }

    Ok(())
}

async fn handle_upload(
    engine: &Engine,
    peer: PeerId,
    mut stream: RelayStream,
    cancel: CancellationToken,
) {
    debug!(%peer, "upload stream opened");

    match serve_upload(
        &mut stream,
        engine.dags(),
        engine.locks(),
        &engine.limits().sync,
        &cancel,
    )
    .await
    {
        Ok(outcome) => {
            info!(%peer, root = %outcome.root, leaves = outcome.leaves, "upload stored");
        }
        Err(err) => {
            warn!(%peer, %err, "upload failed");
        }
    }
}

async fn handle_download(
    engine: &Engine,
    peer: PeerId,
    mut stream: RelayStream,
    cancel: CancellationToken,
) {
    debug!(%peer, "download stream opened");

    match serve_download(&mut stream, engine.dags(), &engine.limits().sync, &cancel).await {
        Ok(outcome) => {
            debug!(%peer, root = %outcome.root, packets = outcome.packets, "download served");
        }
        Err(err) => {
            warn!(%peer, %err, "download failed");
        }
    }
}

async fn handle_query(
    engine: &Engine,
    peer: PeerId,
    mut stream: RelayStream,
    cancel: CancellationToken,
) {
    match serve_query(&mut stream, engine.dags(), &engine.limits().sync, &cancel).await {
        Ok(roots) => {
            debug!(%peer, roots, "query served");
        }
        Err(err) => {
            warn!(%peer, %err, "query failed");
        }
    }
}
