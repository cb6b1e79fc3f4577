use crate::ConnectionId;

/// Errors raised by a transport or one of its connections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// The peer connected but the WebSocket upgrade did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection was already closed on our side.
    #[error("{0} is closed")]
    Closed(ConnectionId),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Recv(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_names_the_address() {
        let err = TransportError::Bind {
            addr: "10.0.0.1:80".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 10.0.0.1:80: in use");
    }

    #[test]
    fn test_closed_error_shows_connection() {
        let err = TransportError::Closed(ConnectionId::new(3));
        assert_eq!(err.to_string(), "conn-3 is closed");
    }
}
