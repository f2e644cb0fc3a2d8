//! `NetsyncClient`: the matchmaking client over a WebSocket connection.
//!
//! A background task reads the connection, feeds every message to the
//! shared [`MatchmakingClient`] and forwards the resulting
//! [`ClientEvent`]s. It also pings the server so a quiet session is not
//! timed out.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use netsync_properties::PropertyTable;
use netsync_protocol::{EnterRoomResultCode, PlayerId, ProtocolError, RoomOptions};
use netsync_room::ClientState;
use netsync_transport::{Connection, DeliveryMethod, WebSocketConnection};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::client::{ClientEvent, EnterTicket, MatchmakingClient};
use crate::{ClientConfig, NetsyncError};

/// A connected matchmaking client.
///
/// # Example
///
/// ```rust,ignore
/// use netsync::prelude::*;
///
/// let config = ClientConfig::for_application("arena");
/// let (client, mut events) = NetsyncClient::connect("127.0.0.1:7777", config).await?;
/// let code = client.join_or_create_room(RoomOptions::named("room-1"), None).await?;
/// ```
pub struct NetsyncClient {
    conn: Arc<WebSocketConnection>,
    inner: Arc<Mutex<MatchmakingClient>>,
    timeout: Duration,
    background: JoinHandle<()>,
}

impl NetsyncClient {
    /// Connects, sends the hail, and waits for the lobby.
    ///
    /// Events start with [`ClientEvent::Connected`].
    pub async fn connect(
        addr: &str,
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), NetsyncError> {
        let mut client = MatchmakingClient::new(&config)?;
        let timeout = config.connection_timeout();

        let conn = WebSocketConnection::connect(addr).await?;
        let hail = client.begin_connect()?;
        conn.send(&hail, DeliveryMethod::ReliableOrdered).await?;

        let first = match tokio::time::timeout(timeout, conn.recv()).await {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => return Err(NetsyncError::ConnectionClosed),
            Ok(Err(e)) => return Err(NetsyncError::Transport(e)),
            Err(_) => return Err(NetsyncError::Timeout("lobby")),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        for event in client.handle_message(first)? {
            let _ = events_tx.send(event);
        }
        if client.state() != ClientState::InLobby {
            return Err(ProtocolError::InvalidMessage(
                "server did not answer the hail with the lobby".into(),
            )
            .into());
        }
        tracing::info!(%addr, nickname = client.player().nickname(), "connected");

        let conn = Arc::new(conn);
        let inner = Arc::new(Mutex::new(client));
        let background = tokio::spawn(run_background(
            Arc::clone(&conn),
            Arc::clone(&inner),
            events_tx,
            timeout / 3,
        ));

        Ok((
            Self {
                conn,
                inner,
                timeout,
                background,
            },
            events_rx,
        ))
    }

    pub async fn state(&self) -> ClientState {
        self.inner.lock().await.state()
    }

    /// Runs `f` against the client state: lobby, room, local player.
    /// Changes to the player or room go out on the next [`flush`](Self::flush).
    pub async fn with_client<R>(&self, f: impl FnOnce(&mut MatchmakingClient) -> R) -> R {
        let mut client = self.inner.lock().await;
        f(&mut client)
    }

    pub async fn create_room(
        &self,
        options: RoomOptions,
        initial_properties: Option<&PropertyTable>,
    ) -> Result<EnterRoomResultCode, NetsyncError> {
        let request = self
            .inner
            .lock()
            .await
            .create_room(options, initial_properties)?;
        self.enter(request).await
    }

    pub async fn join_room(&self, name: &str) -> Result<EnterRoomResultCode, NetsyncError> {
        let request = self.inner.lock().await.join_room(name)?;
        self.enter(request).await
    }

    pub async fn join_or_create_room(
        &self,
        options: RoomOptions,
        initial_properties: Option<&PropertyTable>,
    ) -> Result<EnterRoomResultCode, NetsyncError> {
        let request = self
            .inner
            .lock()
            .await
            .join_or_create_room(options, initial_properties)?;
        self.enter(request).await
    }

    async fn enter(
        &self,
        (request, ticket): (Bytes, EnterTicket),
    ) -> Result<EnterRoomResultCode, NetsyncError> {
        self.send(&request).await?;
        match tokio::time::timeout(self.timeout, ticket).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(_)) => Err(NetsyncError::ConnectionClosed),
            Err(_) => Err(NetsyncError::Timeout("enter room response")),
        }
    }

    /// Asks to leave the current room. [`ClientEvent::LeftRoom`] follows.
    pub async fn leave_room(&self) -> Result<(), NetsyncError> {
        let request = self.inner.lock().await.leave_room()?;
        self.send(&request).await
    }

    pub async fn send_to_server(&self, data: &[u8]) -> Result<(), NetsyncError> {
        let message = self.inner.lock().await.send_to_server(data)?;
        self.send(&message).await
    }

    pub async fn send_to_room(&self, data: &[u8]) -> Result<(), NetsyncError> {
        let message = self.inner.lock().await.send_to_room(data)?;
        self.send(&message).await
    }

    pub async fn send_to_player(&self, target: PlayerId, data: &[u8]) -> Result<(), NetsyncError> {
        let message = self.inner.lock().await.send_to_player(target, data)?;
        self.send(&message).await
    }

    /// Sends local player and room changes made since the last flush.
    pub async fn flush(&self) -> Result<(), NetsyncError> {
        let messages = self.inner.lock().await.flush();
        for message in &messages {
            self.send(message).await?;
        }
        Ok(())
    }

    /// Closes the connection and waits for the final
    /// [`ClientEvent::Disconnected`] to be forwarded.
    pub async fn disconnect(mut self) -> Result<(), NetsyncError> {
        self.conn.close().await?;
        if tokio::time::timeout(self.timeout, &mut self.background).await.is_err() {
            tracing::debug!("background task did not stop in time");
        }
        Ok(())
    }

    async fn send(&self, message: &[u8]) -> Result<(), NetsyncError> {
        self.conn
            .send(message, DeliveryMethod::ReliableOrdered)
            .await
            .map_err(NetsyncError::from)
    }
}

impl Drop for NetsyncClient {
    fn drop(&mut self) {
        self.background.abort();
    }
}

async fn run_background(
    conn: Arc<WebSocketConnection>,
    inner: Arc<Mutex<MatchmakingClient>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    keepalive_period: Duration,
) {
    let mut keepalive = tokio::time::interval(keepalive_period.max(Duration::from_millis(100)));
    keepalive.tick().await;

    loop {
        tokio::select! {
            received = conn.recv() => match received {
                Ok(Some(data)) => {
                    let result = inner.lock().await.handle_message(data);
                    match result {
                        Ok(produced) => {
                            for event in produced {
                                let _ = events.send(event);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "message dropped"),
                    }
                }
                Ok(None) => {
                    tracing::info!("connection closed");
                    break;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "recv error");
                    break;
                }
            },
            _ = keepalive.tick() => {
                if let Err(e) = conn.ping().await {
                    tracing::debug!(error = %e, "keepalive failed");
                    break;
                }
            }
        }
    }

    for event in inner.lock().await.disconnected() {
        let _ = events.send(event);
    }
}
