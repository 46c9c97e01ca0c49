use tokio_util::sync::CancellationToken;
use tracing::debug;

use nectar_dagstore::DagStore;
use nectar_merkle::{root_digest, Dag};

use crate::wire::{Ack, SyncMessage};
use crate::{recv, send, send_error, RootLocks, SyncConfig, SyncError, SyncStream};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadOutcome {
    pub root: String,
    pub leaves: usize,
}

/// Server side of an upload stream.
///
/// `INIT → AUTH → VERIFY → ACK` per packet, stop-and-wait, then
/// `VERIFY_WHOLE → PERSIST → ACK_FINAL` once the final packet lands. Any
/// failure emits one error frame and leaves the partial DAG unpersisted;
/// the per-root mutex is released on every exit path.
pub async fn serve_upload<S: SyncStream>(
    stream: &mut S,
    store: &DagStore,
    locks: &RootLocks,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<UploadOutcome, SyncError> {
    match drive(stream, store, locks, config, cancel).await {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            if !matches!(err, SyncError::PeerClosed | SyncError::Cancelled) {
                send_error(stream, &err).await;
            }
            Err(err)
        }
    }
}

async fn drive<S: SyncStream>(
    stream: &mut S,
    store: &DagStore,
    locks: &RootLocks,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<UploadOutcome, SyncError> {
    // INIT: the first packet must carry the root leaf and the uploader's
    // claim over it.
    let SyncMessage::Packet(first) = recv(stream, config.handshake_timeout, cancel).await? else {
        return Err(SyncError::Protocol(
            "expected the root packet first".to_owned(),
        ));
    };

    if !first.parent_hash.is_empty() {
        return Err(SyncError::Protocol(
            "first packet does not carry the root".to_owned(),
        ));
    }

    // AUTH: the signature gates everything after it.
    let (Some(pubkey), Some(sig)) = (first.pubkey, first.sig) else {
        return Err(SyncError::Unauthorized(
            "upload carries no root signature".to_owned(),
        ));
    };

    let root = first.leaf.hash.clone();

    nectar_crypto::verify(&pubkey, &root_digest(&root), &sig)
        .map_err(|_| SyncError::Unauthorized("root signature does not verify".to_owned()))?;

    let _guard = if config.reject_busy {
        locks
            .try_lock(&root)
            .ok_or_else(|| SyncError::Busy(root.clone()))?
    } else {
        locks.lock(&root).await
    };

    if store.has_root(&root)? {
        return Err(SyncError::Duplicate(root));
    }

    // VERIFY/ACK loop, one ack per non-final packet before the next read.
    let mut dag = Dag::receiver();
    dag.apply_and_verify_packet(&first)?;

    let mut last_hash = first.leaf.hash.clone();
    let mut done = first.final_packet;

    while !done {
        send(
            stream,
            &SyncMessage::Ack(Ack {
                hash: last_hash.clone(),
                final_ack: false,
            }),
        )
        .await?;

        let SyncMessage::Packet(packet) = recv(stream, config.read_timeout, cancel).await? else {
            return Err(SyncError::Protocol("expected a packet".to_owned()));
        };

        dag.apply_and_verify_packet(&packet)?;

        last_hash = packet.leaf.hash;
        done = packet.final_packet;
    }

    // VERIFY_WHOLE: end-to-end, including the root signature carried in
    // the first packet.
    dag.verify()?;

    // PERSIST: leaves, labels, content refs and the ownership record in
    // one transaction.
    store.store_dag(&dag)?;

    send(
        stream,
        &SyncMessage::Ack(Ack {
            hash: dag.root.clone(),
            final_ack: true,
        }),
    )
    .await?;

    debug!(root = %dag.root, leaves = dag.len(), "upload complete");

    Ok(UploadOutcome {
        root: dag.root.clone(),
        leaves: dag.len(),
    })
}

/// Client side: push a signed DAG through an upload stream, waiting for
/// each ack as the server does.
pub async fn send_dag<S: SyncStream>(
    stream: &mut S,
    dag: &Dag,
    config: &SyncConfig,
) -> Result<(), SyncError> {
    let cancel = CancellationToken::new();
    let packets = dag.to_packets(true)?;

    for packet in &packets {
        send(stream, &SyncMessage::Packet(packet.clone())).await?;

        match recv(stream, config.read_timeout, &cancel).await? {
            SyncMessage::Ack(ack) => {
                if packet.final_packet && !ack.final_ack {
                    return Err(SyncError::Protocol(
                        "missing final ack after last packet".to_owned(),
                    ));
                }
            }
            SyncMessage::Error { reason } => return Err(SyncError::Rejected(reason)),
            _ => return Err(SyncError::Protocol("expected an ack".to_owned())),
        }
    }

    Ok(())
}
