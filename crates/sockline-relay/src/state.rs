//! State shared by the HTTP and WebSocket handlers.

use crate::config::Config;
use crate::hub::Hub;
use chrono::{DateTime, Utc};

/// Everything a handler can reach: the fan-out hub, the loaded settings,
/// and the start time used for uptime reporting.
pub struct AppState {
    pub hub: Hub,
    pub config: Config,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let hub = Hub::new(config.history_limit);

        Self {
            hub,
            config,
            started_at: Utc::now(),
        }
    }
}
