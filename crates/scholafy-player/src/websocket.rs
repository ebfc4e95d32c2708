//! Live event stream for parent monitors.
//!
//! A connecting client first receives `connected` with the current live row,
//! then every [`LiveEvent`] the hub broadcasts. Live-row changes reach the
//! broadcaster through [`spawn_change_forwarder`], which relays the store's
//! change feed for the child's profile.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::hub::ProfileHub;
use crate::live::LiveEvent;

/// Interval between pings sent to monitor clients.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Relays live-row changes from the store to the hub's broadcaster.
///
/// The subscription is taken before this returns, so no change made after
/// the call is missed. The task ends when `token` is cancelled or the
/// store's change feed closes.
pub async fn spawn_change_forwarder(
    hub: Arc<ProfileHub>,
    token: CancellationToken,
) -> JoinHandle<()> {
    let profile_id = hub.profile_id().await;
    let mut subscription = hub.store().subscribe_live(profile_id);

    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                biased;
                () = token.cancelled() => break,
                change = subscription.recv() => change,
            };
            let Some(change) = change else {
                info!(%profile_id, "Live change feed closed");
                break;
            };
            let event = LiveEvent::from_change(change);
            let receivers = hub.broadcaster().send(event.clone());
            debug!(event = event.event_name(), receivers, "Forwarded live change");
        }
    })
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New monitor connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(event: &LiveEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Failed to serialize live event");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe first so nothing between the snapshot and the loop is lost.
    let mut events = state.hub.broadcaster().subscribe();

    let profile_id = state.hub.profile_id().await;
    let connected = match state.hub.store().fetch_live_session(profile_id).await {
        Ok(live) => LiveEvent::connected(live),
        Err(e) => {
            warn!(error = %e, "Failed to fetch live row for new monitor");
            LiveEvent::connected(None)
        }
    };
    let Some(json) = encode(&connected) else {
        return;
    };
    if sender.send(Message::Text(json)).await.is_err() {
        debug!("Monitor disconnected before receiving connected event");
        return;
    }
    info!(%profile_id, "Monitor connected, sent current live status");

    let mut ping = interval(PING_INTERVAL);
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Monitor requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message from monitor");
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "Monitor socket error");
                        break;
                    }
                    None => break,
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Some(json) = encode(&event) else {
                            continue;
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, monitor disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Monitor lagged behind live events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Live broadcaster closed");
                        break;
                    }
                }
            }

            _ = ping.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!(missed = MAX_MISSED_PONGS, "Monitor stopped answering pings, closing");
                    break;
                }
            }
        }
    }

    info!("Monitor disconnected");
}
