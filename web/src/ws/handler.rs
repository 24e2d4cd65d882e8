use crate::extractors::authenticated_user::AuthenticatedUser;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use domain::emergency::{ActiveAlert, RaiseParams};
use domain::error::{DomainErrorKind, EntityErrorKind, Error as DomainError, InternalErrorKind};
use domain::users;
use futures::{SinkExt, StreamExt};
use log::*;
use realtime::connection::{ConnectionId, Subscribed};
use realtime::message::{Ack, ClientFrame, ClientRequest, NearbyPayload, ServerEvent};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Upgrade handler for the authenticated realtime channel. The
/// AuthenticatedUser extractor has already verified the token and the
/// session epoch; a rejection never reaches this body.
pub(crate) async fn realtime_handler(
    AuthenticatedUser(user): AuthenticatedUser,
    State(app_state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    debug!("Establishing realtime connection for user {}", user.id);

    ws.on_upgrade(move |socket| handle_socket(socket, user, app_state))
}

/// Per-connection lifecycle: register, pump frames both ways, then tear
/// down. Disconnect cleanup runs exactly when the user's last live
/// connection drops, whether or not it ever subscribed.
async fn handle_socket(socket: WebSocket, user: users::Model, app_state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let connection_id = app_state
        .realtime_manager
        .register_connection(user.id, tx.clone());

    // Writer task: drains acks, resync pushes and broadcast frames into the
    // socket. Everything outbound funnels through the one channel.
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&app_state, &user, &connection_id, &tx, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum itself; binary frames are
                    // not part of the protocol.
                    Some(Ok(_)) => {}
                }
            }
            // The peer stopped reading; no point processing its requests.
            _ = &mut writer => break,
        }
    }

    debug!(
        "Realtime connection closed for user {}, cleaning up",
        user.id
    );
    writer.abort();

    if let Some(disconnected) = app_state
        .realtime_manager
        .unregister_connection(&connection_id)
    {
        if disconnected.last_connection {
            app_state
                .dispatcher
                .disconnect_cleanup(disconnected.user_id)
                .await;
        }
    }
}

async fn handle_frame(
    app_state: &AppState,
    user: &users::Model,
    connection_id: &ConnectionId,
    tx: &UnboundedSender<String>,
    text: &str,
) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Rejecting malformed client frame: {e}");
            send(tx, ServerEvent::Ack(Ack::error(None, "Invalid payload")));
            return;
        }
    };
    let seq = frame.seq;

    let ack = match frame.request {
        ClientRequest::LocationUpdate {
            latitude,
            longitude,
        } => {
            match domain::user::update_location(app_state.db_conn_ref(), user.id, latitude, longitude)
                .await
            {
                Ok(()) => Ack::ok(seq),
                Err(e) => Ack::error(seq, ack_message(&e, "Failed to save location")),
            }
        }

        ClientRequest::EmergencySubscribe => {
            handle_subscribe(app_state, user, connection_id, tx, seq).await
        }

        ClientRequest::EmergencyUnsubscribe => {
            app_state.realtime_manager.unsubscribe(connection_id);
            Ack::ok(seq)
        }

        ClientRequest::EmergencyRaise {
            latitude,
            longitude,
            accuracy,
            image,
        } => {
            // Re-read the profile so the requester snapshot and medical
            // history reflect edits made since the handshake.
            match domain::user::find_by_id(app_state.db_conn_ref(), user.id).await {
                Ok(fresh) => {
                    let params = RaiseParams {
                        latitude,
                        longitude,
                        accuracy,
                        image,
                    };
                    match app_state.dispatcher.raise(&fresh, params).await {
                        Ok(receipt) => match serde_json::to_value(&receipt) {
                            Ok(body) => Ack::ok_with(seq, body),
                            Err(e) => {
                                error!("Failed to serialize raise receipt: {e}");
                                Ack::ok(seq)
                            }
                        },
                        Err(e) => Ack::error(seq, ack_message(&e, "Failed to save emergency")),
                    }
                }
                Err(e) => Ack::error(seq, ack_message(&e, "Failed to save emergency")),
            }
        }

        ClientRequest::EmergencyCancel { emergency_id } => {
            match app_state.dispatcher.cancel(user.id, emergency_id).await {
                Ok(()) => Ack::ok(seq),
                Err(e) => Ack::error(seq, ack_message(&e, "Failed to cancel emergency")),
            }
        }
    };

    send(tx, ServerEvent::Ack(ack));
}

/// Register the subscription, then resync: push every active, unexpired,
/// in-range emergency to this connection only. A repeated subscribe from
/// the same connection acks without replaying anything. If resync fails the
/// subscription is rolled back so the client's retry gets a fresh attempt.
async fn handle_subscribe(
    app_state: &AppState,
    user: &users::Model,
    connection_id: &ConnectionId,
    tx: &UnboundedSender<String>,
    seq: Option<u64>,
) -> Ack {
    match app_state.realtime_manager.subscribe(connection_id) {
        None => Ack::error(seq, "Connection is not registered"),
        Some(Subscribed::Already) => Ack::ok(seq),
        Some(Subscribed::New) => {
            let resync = match domain::user::find_by_id(app_state.db_conn_ref(), user.id).await {
                Ok(fresh) => app_state.dispatcher.resync(&fresh).await,
                Err(e) => Err(e),
            };

            match resync {
                Ok(alerts) => {
                    for alert in alerts {
                        send(tx, ServerEvent::EmergencyNearby(nearby_payload(alert)));
                    }
                    Ack::ok(seq)
                }
                Err(e) => {
                    app_state.realtime_manager.unsubscribe(connection_id);
                    Ack::error(seq, ack_message(&e, "Failed to load active emergencies"))
                }
            }
        }
    }
}

fn nearby_payload(alert: ActiveAlert) -> NearbyPayload {
    NearbyPayload {
        emergency_id: alert.emergency_id,
        owner_id: alert.owner_id,
        latitude: alert.latitude,
        longitude: alert.longitude,
        expires_at: alert.expires_at,
        distance: alert.distance_meters,
        image: alert.image,
        nearest_aeds: alert.nearest_aeds,
        ai_summary: alert.ai_summary,
        requester: alert.requester,
    }
}

fn send(tx: &UnboundedSender<String>, event: ServerEvent) {
    match serde_json::to_string(&event) {
        Ok(frame) => {
            // A send error means the writer already went away; teardown is
            // in progress and the frame is moot.
            let _ = tx.send(frame);
        }
        Err(e) => error!("Failed to serialize server event: {e}"),
    }
}

/// Phrase a domain error for the client acknowledgement. Validation
/// messages pass through verbatim; everything else collapses to either a
/// specific well-known phrase or the operation's fallback.
fn ack_message(error: &DomainError, fallback: &str) -> String {
    match &error.error_kind {
        DomainErrorKind::Internal(InternalErrorKind::Validation(message)) => message.clone(),
        DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::NotFound)) => {
            "Emergency not found".to_string()
        }
        DomainErrorKind::Internal(InternalErrorKind::Entity(EntityErrorKind::Unauthorized)) => {
            "Not allowed".to_string()
        }
        _ => fallback.to_string(),
    }
}
