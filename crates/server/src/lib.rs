//! HTTP/WebSocket surface of the relay: the event wire protocol on `/`,
//! the blob endpoints under `/blossom`, and the discovery document via
//! content negotiation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::header;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use nectar_node::Engine;

pub mod auth;
pub mod blossom;
pub mod info;
pub mod wire;
mod ws;

pub use info::RelayInfo;

/// HTTP surface configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub relay: RelayInfo,
}

pub struct AppState {
    pub engine: Arc<Engine>,
    pub relay: RelayInfo,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("relay", &self.relay.name)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .nest("/blossom", blossom::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `/` serves three things: WebSocket upgrades for the event protocol,
/// the discovery document for `Accept: application/nostr+json`, and a
/// short banner for everyone else.
async fn root(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    if let Some(upgrade) = upgrade {
        return upgrade.on_upgrade(move |socket| ws::connection(socket, state));
    }

    let wants_info = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| accept.contains("application/nostr+json"));

    if wants_info {
        return Json(state.relay.document()).into_response();
    }

    format!("{} - a nectar relay\n", state.relay.name).into_response()
}

/// Bind and serve until cancelled.
pub async fn serve(
    engine: Arc<Engine>,
    config: ServerConfig,
    cancel: CancellationToken,
) -> eyre::Result<()> {
    let state = Arc::new(AppState {
        engine,
        relay: config.relay,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    info!(listen = %config.listen, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests_support {
    use nectar_node::Limits;
    use nectar_store::InMemoryDB;

    use super::*;

    pub fn test_state() -> Arc<AppState> {
        let engine = Arc::new(Engine::new(
            Arc::new(InMemoryDB::new()),
            Limits::default(),
        ));

        Arc::new(AppState {
            engine,
            relay: RelayInfo {
                name: "test".to_owned(),
                description: String::new(),
                pubkey: None,
                supported_nips: vec![1],
                base_port: 9000,
            },
        })
    }
}
