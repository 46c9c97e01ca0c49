use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use nectar_dagstore::DagStore;

use crate::wire::{QueryFilter, SyncMessage};
use crate::{recv, send, send_error, SyncConfig, SyncError, SyncStream};

/// Server side of the query protocol: one filter frame in, one root-hash
/// list out. Criteria union: roots owned by any of the pubkeys, roots
/// containing any of the leaf hashes, roots whose label cache covers
/// every requested label.
pub async fn serve_query<S: SyncStream>(
    stream: &mut S,
    store: &DagStore,
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<usize, SyncError> {
    match drive(stream, store, config, cancel).await {
        Ok(count) => Ok(count),
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
    config: &SyncConfig,
    cancel: &CancellationToken,
) -> Result<usize, SyncError> {
    let SyncMessage::Query(filter) = recv(stream, config.handshake_timeout, cancel).await? else {
        return Err(SyncError::Protocol("expected a query".to_owned()));
    };

    let roots = evaluate(store, &filter)?;
    let count = roots.len();

    send(
        stream,
        &SyncMessage::QueryResponse {
            hashes: roots.into_iter().collect(),
        },
    )
    .await?;

    Ok(count)
}

fn evaluate(store: &DagStore, filter: &QueryFilter) -> Result<BTreeSet<String>, SyncError> {
    let mut roots = BTreeSet::new();

    for pubkey in &filter.pubkeys {
        roots.extend(store.roots_owned_by(pubkey)?);
    }

    for hash in &filter.hashes {
        roots.extend(store.roots_containing_leaf(hash)?);
    }

    if !filter.labels.is_empty() {
        for root in store.list_roots()? {
            let covered = filter
                .labels
                .iter()
                .all(|label| store.label_to_hash(&root, *label).is_ok());

            if covered {
                let _new = roots.insert(root);
            }
        }
    }

    Ok(roots)
}

/// Client side: send one filter, read the root list.
pub async fn query_remote<S: SyncStream>(
    stream: &mut S,
    filter: QueryFilter,
    config: &SyncConfig,
) -> Result<Vec<String>, SyncError> {
    let cancel = CancellationToken::new();

    send(stream, &SyncMessage::Query(filter)).await?;

    match recv(stream, config.read_timeout, &cancel).await? {
        SyncMessage::QueryResponse { hashes } => Ok(hashes),
        SyncMessage::Error { reason } => Err(SyncError::Rejected(reason)),
        _ => Err(SyncError::Protocol("expected a query response".to_owned())),
    }
}
