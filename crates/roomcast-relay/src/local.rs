use roomcast_protocol::RoomId;

use crate::{Relay, RelayError, RelayMessage};

/// The relay of a single-instance deployment: never active, so the bridge
/// always delivers locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl Relay for LocalOnly {
    async fn publish(&self, _room: &RoomId, _payload: &str) -> Result<(), RelayError> {
        Err(RelayError::Unavailable("local-only relay".into()))
    }

    async fn subscribe(&self, _room: &RoomId) -> Result<(), RelayError> {
        Ok(())
    }

    async fn unsubscribe(&self, _room: &RoomId) -> Result<(), RelayError> {
        Ok(())
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        std::future::pending().await
    }

    async fn close(&self) {}

    fn is_active(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_only_is_inactive_and_refuses_publish() {
        let relay = LocalOnly;
        let room = RoomId::parse("r1").unwrap();
        assert!(!relay.is_active());
        assert!(matches!(
            relay.publish(&room, "x").await,
            Err(RelayError::Unavailable(_))
        ));
        assert!(relay.subscribe(&room).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_only_next_message_never_resolves() {
        let relay = LocalOnly;
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(60), relay.next_message()).await;
        assert!(waited.is_err());
    }
}
