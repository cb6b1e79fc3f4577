//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{
    CloseCode, ConnectRequest, Connection, ConnectionId, Pending, Transport,
    TransportError,
};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// How long a peer gets to send its upgrade request.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self {
            listener,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    /// Sets the deadline for each peer's upgrade request.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl Transport for WebSocketTransport {
    type Pending = PendingWebSocket;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Pending, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        tracing::trace!(%addr, "tcp peer accepted");
        Ok(PendingWebSocket {
            stream,
            addr,
            timeout: self.handshake_timeout,
        })
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// A TCP peer waiting for its WebSocket upgrade.
pub struct PendingWebSocket {
    stream: TcpStream,
    addr: SocketAddr,
    timeout: Duration,
}

impl PendingWebSocket {
    /// The peer's address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Pending for PendingWebSocket {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn complete(self) -> Result<Self::Connection, Self::Error> {
        let addr = self.addr;
        let mut request = ConnectRequest::default();
        let upgrade = tokio_tungstenite::accept_hdr_async(
            self.stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                request = ConnectRequest::new(
                    req.uri().path(),
                    req.uri().query().map(str::to_string),
                );
                Ok(resp)
            },
        );
        let ws = tokio::time::timeout(self.timeout, upgrade)
            .await
            .map_err(|_| TransportError::Handshake(format!("{addr}: timed out")))?
            .map_err(|e| TransportError::Handshake(format!("{addr}: {e}")))?;

        let id = ConnectionId::new(
            NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        );
        tracing::debug!(%id, %addr, path = request.path(), "accepted WebSocket connection");

        Ok(WebSocketConnection::new(id, request, ws))
    }
}

/// A single WebSocket connection.
///
/// The socket is split so that a task blocked in [`Connection::recv`]
/// never delays a broadcast writing to the same peer.
pub struct WebSocketConnection {
    id: ConnectionId,
    request: ConnectRequest,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WebSocketConnection {
    fn new(id: ConnectionId, request: ConnectRequest, ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            request,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }

    /// The request target the client used when upgrading.
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Returns `true` once [`Connection::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Connection for WebSocketConnection {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), Self::Error> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.id));
        }
        let msg = Message::Text(text.to_owned().into());
        self.sink
            .lock()
            .await
            .send(msg)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&self) -> Result<Option<String>, Self::Error> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => {
                    // Not UTF-8 means not an event; the caller discards it.
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => return Err(TransportError::Recv(e.to_string())),
            }
        }
    }

    async fn close(&self, code: CloseCode) -> Result<(), Self::Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let frame = CloseFrame {
            code: WsCloseCode::from(code.as_u16()),
            reason: code.reason().to_string().into(),
        };
        let result = self
            .sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await;
        match result {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Ok(())
            }
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
