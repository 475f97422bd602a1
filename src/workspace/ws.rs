use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::access::Viewer;
use super::api::{ApiError, SharedState};
use super::auth::SessionStore;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Change notifications. They carry ids only; clients refetch the views
/// they display, which applies the usual visibility rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    TaskCreated {
        task_id: String,
        project_id: String,
    },
    TaskUpdated {
        task_id: String,
        project_id: String,
    },
    TaskDeleted {
        task_id: String,
        project_id: String,
    },
    ProjectCreated {
        project_id: String,
    },
    ProjectUpdated {
        project_id: String,
    },
    ProjectDeleted {
        project_id: String,
        removed_task_ids: Vec<String>,
    },
    TeamCreated {
        team_id: String,
    },
    TeamUpdated {
        team_id: String,
    },
    TeamDeleted {
        team_id: String,
    },
    TicketRaised {
        ticket_id: String,
    },
    TicketUpdated {
        ticket_id: String,
    },
    UserJoined {
        user_id: String,
    },
    UserApproved {
        user_id: String,
    },
    UserRemoved {
        user_id: String,
    },
}

/// A serialized [`WsMessage`] tagged with the organization it concerns.
#[derive(Debug, Clone)]
pub struct OrgEvent {
    pub organization_id: String,
    pub payload: String,
}

// ── WebSocket handler ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Session token. Browsers cannot set headers on the upgrade request.
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = state.sessions.resolve(&params.token).await?;
    let viewer = state
        .store
        .call(move |snap| Viewer::resolve(snap, &user_id))
        .await?;
    let subscriber = Subscriber {
        org: viewer.org().to_string(),
        token: params.token,
        sessions: state.sessions.clone(),
    };
    let rx = state.ws_tx.subscribe();
    tracing::debug!(user_id = %viewer.id(), org = %subscriber.org, "WebSocket subscribed");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, rx, subscriber)))
}

/// Who is listening on a socket, and the session that authorized it.
struct Subscriber {
    org: String,
    token: String,
    sessions: SessionStore,
}

#[derive(Debug, PartialEq)]
enum Forward {
    Send,
    Skip,
    Close,
}

/// Events of other organizations are skipped. Once the session behind the
/// socket is gone (signed out, expired, user removed) the socket is closed.
async fn forward(event: &OrgEvent, subscriber: &Subscriber) -> Forward {
    if event.organization_id != subscriber.org {
        return Forward::Skip;
    }
    if subscriber.sessions.resolve(&subscriber.token).await.is_err() {
        return Forward::Close;
    }
    Forward::Send
}

async fn handle_socket(
    socket: WebSocket,
    rx: broadcast::Receiver<OrgEvent>,
    subscriber: Subscriber,
) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, subscriber).await;
}

/// Forward the organization's events and keep the connection alive.
///
/// If no Pong arrives within [`PONG_TIMEOUT`] of a Ping the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<OrgEvent>,
    subscriber: Subscriber,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick is immediate.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => match forward(&event, &subscriber).await {
                        Forward::Send => {
                            if sender.send(Message::Text(event.payload.into())).await.is_err() {
                                break;
                            }
                        }
                        Forward::Skip => {}
                        Forward::Close => {
                            tracing::debug!(org = %subscriber.org, "WebSocket session ended");
                            break;
                        }
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "WebSocket subscriber lagged");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to the organization's subscribers.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<OrgEvent>, org: &str, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(OrgEvent {
                organization_id: org.to_string(),
                payload,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WsMessage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_message_task_created_serialization() {
        let msg = WsMessage::TaskCreated {
            task_id: "task-1".to_string(),
            project_id: "proj-1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"TaskCreated\""));
        assert!(json.contains("\"data\""));
        assert!(json.contains("\"task_id\":\"task-1\""));
    }

    #[test]
    fn test_ws_message_project_deleted_roundtrip() {
        let msg = WsMessage::ProjectDeleted {
            project_id: "proj-1".to_string(),
            removed_task_ids: vec!["task-1".to_string(), "task-4".to_string()],
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: WsMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscribers() {
        let (tx, _) = broadcast::channel::<OrgEvent>(16);
        let mut rx1 = tx.subscribe();
        let mut rx2 = tx.subscribe();

        let msg = WsMessage::TicketRaised {
            ticket_id: "ticket-1".to_string(),
        };
        broadcast_message(&tx, "acme", &msg);

        let received1 = rx1.recv().await.unwrap();
        let received2 = rx2.recv().await.unwrap();
        assert_eq!(received1.organization_id, "acme");
        assert!(received1.payload.contains("TicketRaised"));
        assert_eq!(received1.payload, received2.payload);
    }

    #[tokio::test]
    async fn test_broadcast_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<OrgEvent>(16);
        let msg = WsMessage::UserRemoved {
            user_id: "user-9".to_string(),
        };
        broadcast_message(&tx, "acme", &msg);
    }

    fn subscriber(org: &str, sessions: &SessionStore, token: &str) -> Subscriber {
        Subscriber {
            org: org.to_string(),
            token: token.to_string(),
            sessions: sessions.clone(),
        }
    }

    fn event(org: &str) -> OrgEvent {
        OrgEvent {
            organization_id: org.to_string(),
            payload: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn test_forward_skips_other_organizations() {
        let sessions = SessionStore::new(1);
        let token = sessions.issue("user-3").await;
        let acme = subscriber("acme", &sessions, &token);

        assert_eq!(forward(&event("globex"), &acme).await, Forward::Skip);
        assert_eq!(forward(&event("acme"), &acme).await, Forward::Send);
    }

    #[tokio::test]
    async fn test_forward_closes_after_sign_out() {
        let sessions = SessionStore::new(1);
        let token = sessions.issue("user-3").await;
        let acme = subscriber("acme", &sessions, &token);

        sessions.revoke(&token).await;
        assert_eq!(forward(&event("acme"), &acme).await, Forward::Close);
        // Other tenants' events never reach the session check.
        assert_eq!(forward(&event("globex"), &acme).await, Forward::Skip);
    }

    #[tokio::test]
    async fn test_forward_closes_after_user_removed() {
        let sessions = SessionStore::new(1);
        let token = sessions.issue("user-9").await;
        let acme = subscriber("acme", &sessions, &token);

        sessions.revoke_user("user-9").await;
        assert_eq!(forward(&event("acme"), &acme).await, Forward::Close);
    }

    #[test]
    fn test_keepalive_constants() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
    }
}
