//! `NetsyncServer` builder and server loop.
//!
//! Ties the layers together: transport → protocol → session → room.
//! Connection tasks and the periodic flush task share one
//! [`MatchmakingService`] behind a mutex and hand each other messages
//! through per-connection channels.

use std::collections::HashMap;
use std::sync::Arc;

use netsync_room::JoiningHook;
use netsync_transport::{ConnectionId, Transport, WebSocketTransport};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::handler::handle_connection;
use crate::service::{Dispatch, MatchmakingService, Outbound, ServerEvent};
use crate::{NetsyncError, ServerConfig};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) service: Mutex<MatchmakingService>,
    pub(crate) peers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
    pub(crate) events: Option<mpsc::UnboundedSender<ServerEvent>>,
    pub(crate) config: ServerConfig,
}

impl ServerState {
    /// Routes a service result: messages to their connection tasks,
    /// events to the application.
    ///
    /// Callers hold the service lock until this returns, so each peer's
    /// channel receives messages in the order the service produced them.
    /// Lock order is always service, then peers.
    pub(crate) async fn deliver(&self, dispatch: Dispatch) {
        if !dispatch.outbound.is_empty() {
            let peers = self.peers.lock().await;
            for outbound in dispatch.outbound {
                let to = outbound.to;
                match peers.get(&to) {
                    Some(tx) => {
                        if tx.send(outbound).is_err() {
                            tracing::debug!(conn = %to, "peer task gone, message dropped");
                        }
                    }
                    None => tracing::debug!(conn = %to, "no peer for outbound message"),
                }
            }
        }
        if let Some(events) = &self.events {
            for event in dispatch.events {
                let _ = events.send(event);
            }
        }
    }
}

/// Builder for configuring and starting a netsync server.
///
/// # Example
///
/// ```rust,ignore
/// use netsync::prelude::*;
///
/// let server = NetsyncServer::builder()
///     .config(ServerConfig::for_application("arena"))
///     .bind("0.0.0.0:7777")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct NetsyncServerBuilder {
    config: ServerConfig,
    bind_addr: Option<String>,
    joining_hook: Option<JoiningHook>,
    events: Option<mpsc::UnboundedSender<ServerEvent>>,
}

impl NetsyncServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            bind_addr: None,
            joining_hook: None,
            events: None,
        }
    }

    /// Sets the listen address, overriding the config's `bind_addr`.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a hook that may reject joins into existing rooms.
    pub fn joining_hook(mut self, hook: JoiningHook) -> Self {
        self.joining_hook = Some(hook);
        self
    }

    /// Receives [`ServerEvent`]s as they happen.
    pub fn events(mut self, tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Validates the config and binds the listener.
    pub async fn build(self) -> Result<NetsyncServer, NetsyncError> {
        let mut config = self.config;
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        config.validate()?;

        let transport = WebSocketTransport::bind(&config.bind_addr).await?;

        let mut service = MatchmakingService::new(config.application_key());
        if let Some(hook) = self.joining_hook {
            service.set_joining_hook(hook);
        }

        let state = Arc::new(ServerState {
            service: Mutex::new(service),
            peers: Mutex::new(HashMap::new()),
            events: self.events,
            config,
        });

        Ok(NetsyncServer { transport, state })
    }
}

impl Default for NetsyncServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound matchmaking server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct NetsyncServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl NetsyncServer {
    pub fn builder() -> NetsyncServerBuilder {
        NetsyncServerBuilder::new()
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A cloneable handle for talking to the server while it runs.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the accept loop and the periodic flush until the future is
    /// dropped or the process exits.
    pub async fn run(mut self) -> Result<(), NetsyncError> {
        tracing::info!(
            application = %self.state.config.application_key(),
            "netsync server running"
        );
        let _flusher = FlushTask::spawn(Arc::clone(&self.state));

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

/// The periodic flush, aborted when the server loop goes away.
struct FlushTask(JoinHandle<()>);

impl FlushTask {
    fn spawn(state: Arc<ServerState>) -> Self {
        let period = state.config.sync_interval();
        Self(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let mut service = state.service.lock().await;
                let dispatch = service.flush();
                state.deliver(dispatch).await;
            }
        }))
    }
}

impl Drop for FlushTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Application-side access to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Sends `data` to one client as `UserDataFromHost`.
    pub async fn send_to_client(&self, conn: ConnectionId, data: &[u8]) -> Result<(), NetsyncError> {
        let mut service = self.state.service.lock().await;
        let outbound = service.send_to_client(conn, data)?;
        self.state
            .deliver(Dispatch {
                outbound: vec![outbound],
                events: Vec::new(),
            })
            .await;
        Ok(())
    }

    /// Runs `f` against the service, for server-side player or room
    /// changes. They go out on the next flush.
    pub async fn with_service<R>(&self, f: impl FnOnce(&mut MatchmakingService) -> R) -> R {
        let mut service = self.state.service.lock().await;
        f(&mut service)
    }

    /// Flushes pending changes now instead of waiting for the interval.
    pub async fn flush(&self) {
        let mut service = self.state.service.lock().await;
        let dispatch = service.flush();
        self.state.deliver(dispatch).await;
    }

    pub async fn player_count(&self) -> usize {
        self.state.service.lock().await.registry().len()
    }
}
