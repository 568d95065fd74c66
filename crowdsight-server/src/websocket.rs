// WebSocket handler for the live feed

use crate::dispatch::{Admission, FrameJob};
use crate::http::AppState;
use crate::hub::ViewerId;
use crate::live::decode_image_payload;
use crate::protocol::{ClientMessage, ServerMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one viewer connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let viewer_id: ViewerId = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    if let Err(e) = state.hub.register(viewer_id, tx) {
        warn!("Rejecting viewer {}: {}", viewer_id, e);
        let (mut sender, _) = socket.split();
        if let Ok(json) = ServerMessage::error(e.to_string()).to_json() {
            let _ = sender.send(Message::Text(json)).await;
        }
        let _ = sender.close().await;
        return;
    }
    info!("Viewer connected: {}", viewer_id);

    let (mut sender, mut receiver) = socket.split();

    // Hub -> client
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(json)).await {
                warn!("Failed to send to viewer {}: {}", viewer_id, e);
                break;
            }
        }
    });

    // Client -> scheduler
    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => handle_message(&text, viewer_id, &recv_state),
                Ok(Message::Binary(_)) => {
                    warn!("Binary message from {} ignored", viewer_id);
                }
                Ok(Message::Close(_)) => {
                    debug!("Viewer {} closed the connection", viewer_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Err(e) => {
                    warn!("WebSocket error from {}: {}", viewer_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => debug!("Send task finished for {}", viewer_id),
        _ = recv_task => debug!("Receive task finished for {}", viewer_id),
    }

    // queued or in-flight frames from this viewer still complete and broadcast
    state.hub.unregister(&viewer_id);
    info!("Viewer disconnected: {}", viewer_id);
}

fn handle_message(text: &str, viewer_id: ViewerId, state: &AppState) {
    let message = match ClientMessage::from_json(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Unparseable message from {}: {}", viewer_id, e);
            state
                .hub
                .send_to(&viewer_id, ServerMessage::error(format!("Invalid message: {}", e)));
            return;
        }
    };

    match message {
        ClientMessage::Frame { image_base64 } => {
            let source_bytes = match decode_image_payload(&image_base64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    state
                        .hub
                        .send_to(&viewer_id, ServerMessage::error(format!("Invalid image data: {}", e)));
                    return;
                }
            };

            let job = FrameJob {
                source_bytes,
                submitter: viewer_id,
            };
            // the scheduler acks admitted frames itself
            match state.scheduler.submit(job) {
                Ok(Admission::Started) => {}
                Ok(Admission::Queued { position }) => {
                    debug!("Frame from {} queued at {}", viewer_id, position);
                }
                Err(e) => {
                    warn!("Dropping frame from {}: {} ({} pending)", viewer_id, e, e.pending);
                    state.hub.send_to(&viewer_id, ServerMessage::busy());
                }
            }
        }
        ClientMessage::UpdateThreshold { threshold } => {
            state.scheduler.set_threshold(threshold);
        }
    }
}
