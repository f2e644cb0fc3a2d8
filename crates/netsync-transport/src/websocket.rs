//! Connections over WebSocket, via `tokio-tungstenite`.
//!
//! Each binary frame is `[u8 delivery][u16 LE sequence][message]`. TCP
//! already delivers reliably and in order, so the tier header mostly
//! documents intent; the receiving side still runs every frame through a
//! [`DeliveryFilter`] so sequenced tiers keep their drop-stale contract.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    Connection, ConnectionId, DeliveryFilter, DeliveryMethod, SequenceCounter,
    Transport, TransportError,
};

/// Bytes of tier header in front of every message.
pub const FRAME_HEADER_LEN: usize = 3;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn ws_error(kind: io::ErrorKind, e: tungstenite::Error) -> io::Error {
    io::Error::new(kind, e)
}

fn send_failed(e: tungstenite::Error) -> TransportError {
    TransportError::SendFailed(ws_error(io::ErrorKind::BrokenPipe, e))
}

/// Listens for peers and upgrades each TCP stream to a WebSocket.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds the listener. Port 0 picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "listening for WebSocket peers");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
            .await
            .map_err(|e| {
                TransportError::AcceptFailed(ws_error(io::ErrorKind::InvalidData, e))
            })?;

        let conn = WebSocketConnection::from_stream(ws);
        tracing::debug!(id = %conn.id, %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Outgoing {
    sink: SplitSink<WsStream, Message>,
    sequences: SequenceCounter,
}

struct Incoming {
    stream: SplitStream<WsStream>,
    filter: DeliveryFilter<Bytes>,
    ready: VecDeque<Bytes>,
}

/// One peer over WebSocket, on either side.
///
/// The socket is split so a task blocked in [`recv`](Connection::recv)
/// never holds up a concurrent [`send`](Connection::send).
pub struct WebSocketConnection {
    id: ConnectionId,
    tx: Arc<Mutex<Outgoing>>,
    rx: Arc<Mutex<Incoming>>,
    opened: Instant,
    /// Milliseconds after `opened` at which the last frame of any kind
    /// arrived.
    last_seen_ms: AtomicU64,
}

impl WebSocketConnection {
    /// Opens a client connection to `ws://{addr}`.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let url = format!("ws://{addr}");
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(ws_error(io::ErrorKind::ConnectionRefused, e))
            })?;
        let conn = Self::from_stream(ws);
        tracing::debug!(id = %conn.id, %url, "opened WebSocket connection");
        Ok(conn)
    }

    fn from_stream(ws: WsStream) -> Self {
        let id = ConnectionId::allocate();
        let (sink, stream) = ws.split();
        Self {
            id,
            tx: Arc::new(Mutex::new(Outgoing {
                sink,
                sequences: SequenceCounter::new(),
            })),
            rx: Arc::new(Mutex::new(Incoming {
                stream,
                filter: DeliveryFilter::new(),
                ready: VecDeque::new(),
            })),
            opened: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Time since the peer last sent a frame, pings included.
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.opened.elapsed().saturating_sub(last_seen)
    }

    /// Sends a WebSocket ping so an otherwise quiet peer keeps counting
    /// this side as alive.
    pub async fn ping(&self) -> Result<(), TransportError> {
        let mut tx = self.tx.lock().await;
        tx.sink.send(Message::Ping(Bytes::new())).await.map_err(send_failed)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }
}

/// Splits a frame into its tier, sequence, and message bytes.
fn decode_frame(
    frame: Bytes,
) -> Result<(DeliveryMethod, u16, Bytes), TransportError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(TransportError::MalformedFrame(format!(
            "frame of {} bytes has no delivery header",
            frame.len()
        )));
    }
    let method = DeliveryMethod::try_from(frame[0])?;
    let sequence = u16::from_le_bytes([frame[1], frame[2]]);
    Ok((method, sequence, frame.slice(FRAME_HEADER_LEN..)))
}

fn encode_frame(method: DeliveryMethod, sequence: u16, data: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + data.len());
    frame.put_u8(method.as_u8());
    frame.put_u16_le(sequence);
    frame.put_slice(data);
    frame.freeze()
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8], delivery: DeliveryMethod) -> Result<(), Self::Error> {
        let mut tx = self.tx.lock().await;
        let sequence = tx.sequences.next(delivery);
        let frame = encode_frame(delivery, sequence, data);
        tx.sink.send(Message::Binary(frame)).await.map_err(send_failed)
    }

    async fn recv(&self) -> Result<Option<Bytes>, Self::Error> {
        let mut rx = self.rx.lock().await;
        loop {
            if let Some(ready) = rx.ready.pop_front() {
                return Ok(Some(ready));
            }

            let next = rx.stream.next().await;
            if matches!(next, Some(Ok(_))) {
                self.touch();
            }
            match next {
                Some(Ok(Message::Binary(data))) => match decode_frame(data) {
                    Ok((method, sequence, payload)) => {
                        let released = rx.filter.receive(method, sequence, payload);
                        rx.ready.extend(released);
                    }
                    Err(e) => {
                        tracing::warn!(id = %self.id, error = %e, "dropping malformed frame");
                    }
                },
                Some(Ok(Message::Text(_))) => {
                    tracing::debug!(id = %self.id, "ignoring text frame");
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // ping/pong/raw frame
                Some(Err(e)) => {
                    let e = ws_error(io::ErrorKind::ConnectionReset, e);
                    return Err(TransportError::ReceiveFailed(e));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.tx.lock().await.sink.close().await.map_err(send_failed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_frame(DeliveryMethod::ReliableOrdered, 0x0102, b"hi");
        assert_eq!(&frame[..], &[67, 0x02, 0x01, b'h', b'i']);
    }

    #[test]
    fn test_decode_frame_splits_header() {
        let frame = encode_frame(DeliveryMethod::UnreliableSequenced, 9, b"xyz");
        let (method, seq, payload) = decode_frame(frame).unwrap();
        assert_eq!(method, DeliveryMethod::UnreliableSequenced);
        assert_eq!(seq, 9);
        assert_eq!(&payload[..], b"xyz");
    }

    #[test]
    fn test_decode_frame_rejects_short_frame() {
        let err = decode_frame(Bytes::from_static(&[67, 0])).unwrap_err();
        assert!(matches!(err, TransportError::MalformedFrame(_)));
    }

    #[test]
    fn test_decode_frame_rejects_unknown_tier() {
        let err = decode_frame(Bytes::from_static(&[99, 0, 0])).unwrap_err();
        assert!(matches!(err, TransportError::UnknownDeliveryMethod(99)));
    }
}
