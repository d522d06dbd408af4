//! Runtime configuration for the server and clients.

use crate::protocol::{CHANNEL_PREFIX, REGISTRAR_NAME, REGISTRAR_SLOT_COUNT, SESSION_SLOT_COUNT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Name of the well-known registration segment.
    pub registrar_name: String,
    /// Prefix of per-client channel names.
    pub channel_prefix: String,
    pub registrar_capacity: u32,
    pub session_capacity: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registrar_name: REGISTRAR_NAME.to_string(),
            channel_prefix: CHANNEL_PREFIX.to_string(),
            registrar_capacity: REGISTRAR_SLOT_COUNT,
            session_capacity: SESSION_SLOT_COUNT,
        }
    }
}

impl ServerConfig {
    /// Client settings matching this server.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            registrar_name: self.registrar_name.clone(),
            channel_prefix: self.channel_prefix.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub registrar_name: String,
    pub channel_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ServerConfig::default().client_config()
    }
}
