use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use nectar_eventstore::PutOutcome;
use nectar_node::ConnectionId;

use crate::wire::{ClientMessage, RelayMessage};
use crate::AppState;

const OUTBOUND_BUFFER: usize = 64;

pub async fn connection(socket: WebSocket, state: Arc<AppState>) {
    let (connection, queue) = state.engine.subscriptions().register();
    debug!(connection, "websocket client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<RelayMessage>(OUTBOUND_BUFFER);

    // Writer: everything leaving the connection funnels through here.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = match serde_json::to_string(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(connection, %err, "failed to serialize outbound frame");
                    continue;
                }
            };

            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }

        let _closed = ws_tx.close().await;
    });

    // Pump: dispatcher queue to outbound channel.
    let pump = tokio::spawn({
        let out_tx = out_tx.clone();
        async move {
            while let Some(delivery) = queue.pop().await {
                let message = RelayMessage::Event {
                    subscription_id: delivery.subscription_id,
                    event: Box::new(delivery.event),
                };

                if out_tx.send(message).await.is_err() {
                    break;
                }
            }
        }
    });

    // Reader: frames are processed strictly in arrival order.
    while let Some(incoming) = ws_rx.next().await {
        let message = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&message) {
            Ok(frame) => handle_frame(&state, connection, &out_tx, frame).await,
            Err(err) => {
                // One notice, then the connection closes.
                let _sent = out_tx
                    .send(RelayMessage::Notice {
                        message: format!("invalid: unparseable frame: {err}"),
                    })
                    .await;
                break;
            }
        }
    }

    state.engine.subscriptions().unregister(connection);
    drop(out_tx);

    pump.abort();
    let _ = writer.await;

    debug!(connection, "websocket client disconnected");
}

async fn handle_frame(
    state: &AppState,
    connection: ConnectionId,
    out_tx: &mpsc::Sender<RelayMessage>,
    frame: ClientMessage,
) {
    match frame {
        ClientMessage::Event(event) => {
            let reply = submit(state, &event);
            let _sent = out_tx.send(reply).await;
        }
        ClientMessage::Req {
            subscription_id,
            filters,
        } => {
            // Open the subscription before the historical query so no
            // committed event can fall between the two.
            state
                .engine
                .subscriptions()
                .subscribe(connection, &subscription_id, filters.clone());

            match state.engine.query(&filters) {
                Ok(events) => {
                    let events = elide_blocked(state, events);

                    for event in events {
                        let _sent = out_tx
                            .send(RelayMessage::Event {
                                subscription_id: subscription_id.clone(),
                                event: Box::new(event),
                            })
                            .await;
                    }
                }
                Err(err) => {
                    warn!(connection, %err, "historical query failed");
                    let _sent = out_tx
                        .send(RelayMessage::Notice {
                            message: err.to_string(),
                        })
                        .await;
                }
            }

            let _sent = out_tx
                .send(RelayMessage::Eose { subscription_id })
                .await;
        }
        ClientMessage::Close { subscription_id } => {
            let existed = state
                .engine
                .subscriptions()
                .unsubscribe(connection, &subscription_id);
            trace!(connection, subscription_id, existed, "subscription closed");
        }
    }
}

fn submit(state: &AppState, event: &nectar_primitives::Event) -> RelayMessage {
    // The store is moderation-neutral; the connection layer is where
    // blocked ids get refused.
    match state.engine.events().marker(&event.id) {
        Ok(Some(marker)) if marker.is_blocked() => {
            return RelayMessage::Ok {
                id: event.id,
                accepted: false,
                message: "blocked: rejected by moderation".to_owned(),
            };
        }
        Ok(_) => {}
        Err(err) => {
            return RelayMessage::Ok {
                id: event.id,
                accepted: false,
                message: err.to_string(),
            };
        }
    }

    match state.engine.submit_event(event) {
        Ok(PutOutcome::Stored | PutOutcome::Ephemeral) => RelayMessage::Ok {
            id: event.id,
            accepted: true,
            message: String::new(),
        },
        Ok(PutOutcome::Duplicate) => RelayMessage::Ok {
            id: event.id,
            accepted: true,
            message: "duplicate: already have this event".to_owned(),
        },
        Err(err) => RelayMessage::Ok {
            id: event.id,
            accepted: false,
            message: err.to_string(),
        },
    }
}

/// Drop events the moderation layer has blocked before they reach a
/// client; the store itself stays neutral.
fn elide_blocked(
    state: &AppState,
    events: Vec<nectar_primitives::Event>,
) -> Vec<nectar_primitives::Event> {
    let ids: Vec<_> = events.iter().map(|e| e.id).collect();

    match state.engine.events().batch_blocked_check(&ids) {
        Ok(blocked) => events
            .into_iter()
            .filter(|event| !blocked.contains_key(&event.id))
            .collect(),
        Err(err) => {
            warn!(%err, "blocked-id check failed; serving unfiltered");
            events
        }
    }
}
