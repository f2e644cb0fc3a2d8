//! A standalone lobby server.
//!
//! Usage: `lobby-server [config.json]`. Without a config file it serves
//! the `lobby-demo` application on 0.0.0.0:7777.
//!
//! Rooms whose custom property [`LOCKED_KEY`] is `true` turn away new
//! players. A client that sends `rooms` to the host gets the room list
//! back as JSON; anything else is answered with `ack`.

use std::sync::Arc;

use netsync::prelude::*;
use netsync::MatchmakingService;
use netsync::room::ServerRoom;
use netsync::session::ServerPlayer;
use tokio::sync::mpsc;

/// Room property that closes a room to newcomers.
const LOCKED_KEY: u8 = 0;

fn load_config() -> Result<ServerConfig, netsync::ConfigError> {
    match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(path),
        None => {
            let mut config = ServerConfig::for_application("lobby-demo");
            config.bind_addr = "0.0.0.0:7777".into();
            Ok(config)
        }
    }
}

fn accept_unlocked(room: &ServerRoom, _: &ServerPlayer) -> bool {
    !room.properties().get::<bool>(LOCKED_KEY).unwrap_or(false)
}

fn room_list(service: &MatchmakingService) -> String {
    let rooms: Vec<_> = service
        .directory()
        .rooms()
        .map(|room| {
            serde_json::json!({
                "name": room.name(),
                "players": room.player_count(),
                "max_players": room.max_players(),
                "visible": room.is_visible(),
            })
        })
        .collect();
    serde_json::Value::Array(rooms).to_string()
}

async fn serve(
    config: ServerConfig,
) -> Result<(NetsyncServer, mpsc::UnboundedReceiver<ServerEvent>), NetsyncError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let server = NetsyncServer::builder()
        .config(config)
        .joining_hook(Arc::new(accept_unlocked))
        .events(tx)
        .build()
        .await?;
    Ok((server, rx))
}

async fn handle_events(handle: ServerHandle, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ServerEvent::PlayerConnected { conn, nickname } => {
                tracing::info!(%conn, %nickname, "player connected");
            }
            ServerEvent::PlayerDisconnected { conn } => {
                tracing::info!(%conn, "player disconnected");
            }
            ServerEvent::RoomCreated { name } => tracing::info!(%name, "room created"),
            ServerEvent::RoomDestroyed { name } => tracing::info!(%name, "room destroyed"),
            ServerEvent::MessageFromClient { conn, data } => {
                let reply = if &data[..] == b"rooms" {
                    handle.with_service(|service| room_list(service)).await
                } else {
                    "ack".to_string()
                };
                if let Err(e) = handle.send_to_client(conn, reply.as_bytes()).await {
                    tracing::warn!(%conn, error = %e, "reply failed");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    netsync::logging::init();

    let config = load_config()?;
    tracing::info!(
        addr = %config.bind_addr,
        application = %config.application_key(),
        "starting lobby server"
    );

    let (server, events) = serve(config).await?;
    tokio::spawn(handle_events(server.handle(), events));
    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn start() -> String {
        let mut config = ServerConfig::for_application("lobby-demo");
        config.bind_addr = "127.0.0.1:0".into();
        let (server, events) = serve(config).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(handle_events(server.handle(), events));
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        addr
    }

    async fn connect(addr: &str) -> (NetsyncClient, mpsc::UnboundedReceiver<ClientEvent>) {
        NetsyncClient::connect(addr, ClientConfig::for_application("lobby-demo"))
            .await
            .unwrap()
    }

    async fn next_host_message(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> String {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(ClientEvent::MessageFromHost(data)) = events.recv().await {
                    return String::from_utf8(data.to_vec()).unwrap();
                }
            }
        })
        .await
        .expect("no reply from host")
    }

    #[tokio::test]
    async fn test_rooms_query_lists_rooms() {
        let addr = start().await;
        let (client, mut events) = connect(&addr).await;
        client
            .create_room(RoomOptions::named("den"), None)
            .await
            .unwrap();

        client.send_to_server(b"rooms").await.unwrap();
        let reply = next_host_message(&mut events).await;
        let rooms: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(rooms[0]["name"], "den");
        assert_eq!(rooms[0]["players"], 1);
    }

    #[tokio::test]
    async fn test_other_messages_are_acked() {
        let addr = start().await;
        let (client, mut events) = connect(&addr).await;
        client.send_to_server(b"hi").await.unwrap();
        assert_eq!(next_host_message(&mut events).await, "ack");
    }

    #[tokio::test]
    async fn test_locked_room_rejects_join() {
        let addr = start().await;
        let (host, _) = connect(&addr).await;
        let (guest, _) = connect(&addr).await;

        let props = PropertyTable::new(false);
        props.set(LOCKED_KEY, true).unwrap();
        host.create_room(RoomOptions::named("vault"), Some(&props))
            .await
            .unwrap();

        let code = guest.join_room("vault").await.unwrap();
        assert_eq!(code, EnterRoomResultCode::Rejected);
    }
}
