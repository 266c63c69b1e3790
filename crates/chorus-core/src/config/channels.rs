use serde::{Deserialize, Serialize};

use super::defaults::*;

/// Channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub web: WebConfig,
}

/// Native real-time web channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bots randomly assigned to a brand-new conversation. 0 disables seeding.
    #[serde(default = "default_seed_bots")]
    pub seed_bots: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed_bots: default_seed_bots(),
        }
    }
}

/// Broadcast hub and live-connection deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Frames buffered per client before it is considered slow and evicted.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Time allowed to write one frame to the peer.
    #[serde(default = "default_write_wait")]
    pub write_wait_secs: u64,
    /// Time allowed between frames from the peer (pongs included).
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,
    /// Ping period. Must be less than `pong_wait_secs`.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Largest accepted client frame.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            write_wait_secs: default_write_wait(),
            pong_wait_secs: default_pong_wait(),
            ping_interval_secs: default_ping_interval(),
            max_message_bytes: default_max_message_bytes(),
        }
    }
}
