//! Runtime configuration of the status channel and the worker binary.

use modlane_contracts::endpoint::{CONVERSION, CURRENT_TASK, normalize_endpoint};

pub mod cli;

pub use cli::ServeArgs;

pub const DEFAULT_PORT: u16 = 47_810;

/// Status channel settings.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Set only when the launching host vouched for this process.
    pub launch_authorized: bool,
    /// Endpoints peers may connect to.
    pub endpoints: Vec<String>,
    /// Frames buffered per connection before sends to it start failing.
    pub outbound_buffer: usize,
}

impl ChannelConfig {
    pub fn accepts(&self, endpoint: &str) -> bool {
        let endpoint = normalize_endpoint(endpoint);
        self.endpoints.iter().any(|known| *known == endpoint)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            launch_authorized: false,
            endpoints: vec![CURRENT_TASK.to_string(), CONVERSION.to_string()],
            outbound_buffer: 256,
        }
    }
}
