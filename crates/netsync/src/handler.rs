//! Per-connection handler: hail, registration, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive the hail within the handshake timeout
//!   2. Register the player → it gets the absolute lobby
//!   3. Loop: received messages go to the service, queued messages go
//!      out, until close or the peer stays silent (pings included) past
//!      the connection timeout

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use netsync_protocol::{IncomingMessage, ProtocolError};
use netsync_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::mpsc;

use crate::NetsyncError;
use crate::server::ServerState;
use crate::service::Outbound;

/// How often a connection's silence is compared against the timeout.
const IDLE_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// Drop guard that removes a player when the handler exits.
///
/// `Drop` is synchronous, so the async cleanup runs in its own task.
struct PlayerGuard {
    conn: ConnectionId,
    state: Arc<ServerState>,
}

impl Drop for PlayerGuard {
    fn drop(&mut self) {
        let conn = self.conn;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            state.peers.lock().await.remove(&conn);
            let mut service = state.service.lock().await;
            match service.disconnect(conn) {
                Ok(dispatch) => state.deliver(dispatch).await,
                Err(e) => tracing::debug!(%conn, error = %e, "disconnect cleanup failed"),
            }
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), NetsyncError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Hail ---
    let hail = receive_hail(&conn, &state).await?;

    // --- Step 2: Register ---
    // The peer channel exists before the service runs so the lobby
    // refresh it produces has somewhere to go.
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.peers.lock().await.insert(conn_id, tx);

    let mut hail = hail;
    let mut service = state.service.lock().await;
    let dispatch = match service.connect(conn_id, &mut hail) {
        Ok(dispatch) => dispatch,
        Err(e) => {
            state.peers.lock().await.remove(&conn_id);
            drop(service);
            tracing::info!(%conn_id, error = %e, "hail rejected");
            let _ = conn.close().await;
            return Err(e);
        }
    };
    let _guard = PlayerGuard {
        conn: conn_id,
        state: Arc::clone(&state),
    };
    state.deliver(dispatch).await;
    drop(service);

    // --- Step 3: Message loop ---
    let timeout = state.config.connection_timeout();
    let mut idle_check = tokio::time::interval(IDLE_CHECK_PERIOD);
    loop {
        tokio::select! {
            received = conn.recv() => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                };
                dispatch_message(conn_id, data, &state).await;
            }
            Some(outbound) = rx.recv() => {
                if let Err(e) = conn.send(&outbound.bytes, outbound.delivery).await {
                    tracing::debug!(%conn_id, error = %e, "send failed");
                    break;
                }
            }
            _ = idle_check.tick() => {
                if conn.idle_for() > timeout {
                    tracing::info!(%conn_id, "connection timed out");
                    break;
                }
            }
        }
    }

    // _guard drops here → player removal fires.
    Ok(())
}

/// Waits for the first message and checks that it is a hail frame.
async fn receive_hail(
    conn: &WebSocketConnection,
    state: &ServerState,
) -> Result<IncomingMessage, NetsyncError> {
    let data = match tokio::time::timeout(state.config.handshake_timeout(), conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(NetsyncError::Protocol(ProtocolError::InvalidMessage(
                "connection closed before hail".into(),
            )));
        }
        Ok(Err(e)) => return Err(NetsyncError::Transport(e)),
        Err(_) => {
            let _ = conn.close().await;
            return Err(NetsyncError::Timeout("hail"));
        }
    };
    Ok(IncomingMessage::new(data)?)
}

/// Runs one message through the service. Bad messages are logged and
/// dropped; the connection stays up.
async fn dispatch_message(conn_id: ConnectionId, data: Bytes, state: &ServerState) {
    let mut service = state.service.lock().await;
    match service.handle_message(conn_id, data) {
        Ok(dispatch) => state.deliver(dispatch).await,
        Err(e) => tracing::warn!(%conn_id, error = %e, "message dropped"),
    }
}
