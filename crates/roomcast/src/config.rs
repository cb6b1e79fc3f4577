//! Server configuration loaded from TOML.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! history_limit = 50
//! bot_name = "AI_Bot"
//! handshake_timeout_secs = 10
//! send_timeout_ms = 2000
//!
//! [relay]
//! url = "redis://127.0.0.1:6379/"
//! channel_prefix = "roomcast:room:"
//!
//! [[tokens]]
//! token = "alice-secret"
//! key = "u1"
//! name = "alice"
//!
//! [[rooms]]
//! name = "lobby"
//! members = ["u1"]
//!
//! [bot]
//! enabled = true
//! ```
//!
//! Every section is optional. Without `[[rooms]]` any authenticated user
//! may join any room; without `relay.url` the server runs single-instance.

use std::path::Path;
use std::str::FromStr;

use roomcast_protocol::RoomId;
use roomcast_relay::DEFAULT_CHANNEL_PREFIX;
use roomcast_session::{Identity, RoomDirectory, TokenTable};
use serde::Deserialize;

use crate::responder::DEFAULT_BOT_NAME;

/// Default number of messages sent in the `history` event.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoomcastConfig {
    pub server: ServerConfig,
    pub relay: RelayConfig,
    /// Static bearer tokens.
    pub tokens: Vec<TokenEntry>,
    /// Static room membership. Empty means every room is open.
    pub rooms: Vec<RoomEntry>,
    pub bot: BotConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (e.g. `"0.0.0.0:8080"`).
    pub bind: String,
    /// Messages sent to a client when it joins.
    pub history_limit: usize,
    /// Display name of the bot.
    pub bot_name: String,
    /// Seconds a new peer gets to complete the WebSocket upgrade.
    pub handshake_timeout_secs: u64,
    /// Milliseconds one outbound frame may take before the peer is dropped.
    pub send_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            bot_name: DEFAULT_BOT_NAME.to_string(),
            handshake_timeout_secs: 10,
            send_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Redis URL. `None` runs single-instance.
    pub url: Option<String>,
    /// Channel name prefix; the room id is appended.
    pub channel_prefix: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

/// One `[[tokens]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    /// Stable user key, matched against room members.
    pub key: String,
    /// Display name.
    pub name: String,
}

/// One `[[rooms]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomEntry {
    pub name: RoomId,
    /// User keys allowed to join.
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Answer `/bot` and `@ai` messages with the built-in echo responder.
    pub enabled: bool,
}

impl RoomcastConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// The `[[tokens]]` table as an authenticator.
    pub fn token_table(&self) -> TokenTable {
        self.tokens
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity::new(entry.key.clone(), entry.name.clone()),
                )
            })
            .collect()
    }

    /// The `[[rooms]]` table as a membership service; open when empty.
    pub fn room_directory(&self) -> RoomDirectory {
        self.rooms
            .iter()
            .fold(RoomDirectory::open(), |directory, room| {
                directory.with_room(room.name.clone(), room.members.iter().cloned())
            })
    }
}

impl FromStr for RoomcastConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
