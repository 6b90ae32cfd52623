use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use kute_db::Database;
use kute_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Cap on how much of a rejected frame gets echoed into the log.
const LOG_SNIPPET_BYTES: usize = 200;

/// Clips at the cap without splitting a multi-byte character, since the
/// raw frame is client-controlled text.
fn truncate_for_log(text: &str) -> &str {
    if text.len() <= LOG_SNIPPET_BYTES {
        return text;
    }
    let mut end = LOG_SNIPPET_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Handle a single WebSocket connection: Identify handshake, then the
/// command/event loop scoped to the match channels the client joins.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, name) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", name, user_id);

    // Step 2: Send Ready event
    let ready = GatewayEvent::Ready {
        user_id,
        name: name.clone(),
    };
    let Ok(ready_json) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Match channels this connection has joined (shared between tasks).
    let joined: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));

    // Connection-local events (command errors) bypass the broadcast bus.
    let (self_tx, mut self_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let mut broadcast_rx = dispatcher.subscribe();
    let send_joined = joined.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward match-scoped broadcasts + local events to the client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(match_id) = event.match_id() {
                        let subs = send_joined.read().expect("joined lock poisoned");
                        if !subs.contains(&match_id) {
                            continue;
                        }
                    }
                    // Typing signals never echo back to their sender.
                    if event.suppressed_for() == Some(user_id) {
                        continue;
                    }

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = self_rx.recv() => {
                    let Some(event) = result else { break };
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let name_recv = name.clone();
    let recv_joined = joined.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher,
                            &db,
                            user_id,
                            &name_recv,
                            cmd,
                            &recv_joined,
                            &self_tx,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            truncate_for_log(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("{} ({}) disconnected from gateway", name, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use kute_types::api::Claims;

    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.name));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    name: &str,
    cmd: GatewayCommand,
    joined: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
    self_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinMatch { match_id } => {
            let is_participant = {
                let db = db.clone();
                let uid = user_id.to_string();
                tokio::task::spawn_blocking(move || {
                    db.is_match_participant(&match_id.to_string(), &uid)
                })
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("join error: {}", e)))
            };

            match is_participant {
                Ok(true) => {
                    info!("{} ({}) joined match {}", name, user_id, match_id);
                    joined
                        .write()
                        .expect("joined lock poisoned")
                        .insert(match_id);
                }
                Ok(false) => {
                    let _ = self_tx.send(GatewayEvent::Error {
                        message: "You are not a participant of that match.".to_string(),
                    });
                }
                Err(e) => {
                    warn!("join_match lookup failed for {}: {}", user_id, e);
                    let _ = self_tx.send(GatewayEvent::Error {
                        message: "Failed to join match.".to_string(),
                    });
                }
            }
        }

        GatewayCommand::SendMessage { match_id, content } => {
            if content.trim().is_empty() {
                let _ = self_tx.send(GatewayEvent::Error {
                    message: "Message content must not be empty.".to_string(),
                });
                return;
            }
            if !joined
                .read()
                .expect("joined lock poisoned")
                .contains(&match_id)
            {
                let _ = self_tx.send(GatewayEvent::Error {
                    message: "Join the match before sending messages.".to_string(),
                });
                return;
            }

            // Persist first; only a durable message is fanned out.
            let persisted = {
                let db = db.clone();
                let uid = user_id.to_string();
                tokio::task::spawn_blocking(move || {
                    db.append_message(&match_id.to_string(), &uid, &content)
                })
                .await
                .unwrap_or_else(|e| Err(anyhow::anyhow!("persist error: {}", e)))
            };

            match persisted {
                Ok(stored) => {
                    dispatcher.broadcast(GatewayEvent::ReceiveMessage {
                        id: stored.id,
                        match_id,
                        sender_id: user_id,
                        sender_name: stored.sender_name,
                        content: stored.content,
                        timestamp: stored.created_at,
                    });
                }
                Err(e) => {
                    warn!("Failed to persist message from {}: {}", user_id, e);
                    let _ = self_tx.send(GatewayEvent::Error {
                        message: "Message could not be saved; it was not delivered.".to_string(),
                    });
                }
            }
        }

        GatewayCommand::TypingStart { match_id } => {
            if joined
                .read()
                .expect("joined lock poisoned")
                .contains(&match_id)
            {
                dispatcher.broadcast(GatewayEvent::TypingStart {
                    match_id,
                    user_id,
                    sender_name: name.to_string(),
                });
            }
        }

        GatewayCommand::TypingStop { match_id } => {
            if joined
                .read()
                .expect("joined lock poisoned")
                .contains(&match_id)
            {
                dispatcher.broadcast(GatewayEvent::TypingStop {
                    match_id,
                    user_id,
                    sender_name: name.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_for_log;

    #[test]
    fn log_snippet_keeps_short_frames_whole() {
        assert_eq!(truncate_for_log("not json"), "not json");
    }

    #[test]
    fn log_snippet_clips_long_ascii_at_the_cap() {
        let frame = "x".repeat(500);
        assert_eq!(truncate_for_log(&frame).len(), 200);
    }

    #[test]
    fn log_snippet_backs_off_a_split_multibyte_character() {
        // 'é' straddles the 200-byte cap (bytes 199..201); a naive byte
        // slice would panic here.
        let mut frame = "a".repeat(199);
        frame.push('é');
        frame.push_str(&"b".repeat(50));
        let clipped = truncate_for_log(&frame);
        assert_eq!(clipped.len(), 199);
        assert!(clipped.chars().all(|c| c == 'a'));
    }
}
