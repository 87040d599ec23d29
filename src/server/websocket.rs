use super::ClientRegistry;
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};

/// Router upgrading requests on any path to a telemetry WebSocket
pub fn router(registry: Arc<ClientRegistry>) -> Router {
    Router::new().fallback(upgrade).with_state(registry)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(registry): State<Arc<ClientRegistry>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_client(socket, addr, registry))
}

/// Forward queued payloads to one client until either side hangs up
async fn handle_client(socket: WebSocket, addr: SocketAddr, registry: Arc<ClientRegistry>) {
    let (id, mut outbound) = registry.register(addr);
    log::info!("Client connected: {} (total {})", addr, registry.len());

    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = sink.send(Message::Text(payload.to_string())).await {
                        log::debug!("Send to {} failed: {}", addr, e);
                        break;
                    }
                }
                None => {
                    // Registry dropped us: server shutting down
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    log::debug!("Receive from {} failed: {}", addr, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    registry.deregister(id);
    log::info!("Client disconnected: {}", addr);
}

/// Serve WebSocket clients on `listener` until shutdown
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_websocket(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("WebSocket telemetry listening on ws://{}", addr);
    }

    let app = router(registry);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|&stop| stop).await;
        })
        .await?;

    log::info!("WebSocket listener stopped");
    Ok(())
}
