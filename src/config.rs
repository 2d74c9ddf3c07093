/// Per-node timer configuration.
use std::time::Duration;

/// The five timer durations named by `init` (§6): client deadline, redirect
/// retry, per-peer coordinator request retry, liveness probing cadence, and
/// anti-entropy cadence.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub client_timeout: Duration,
    pub redirect_timeout: Duration,
    pub request_timeout: Duration,
    pub health_check_interval: Duration,
    pub merkle_sync_interval: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_millis(1000),
            redirect_timeout: Duration::from_millis(300),
            request_timeout: Duration::from_millis(300),
            health_check_interval: Duration::from_millis(1000),
            merkle_sync_interval: Duration::from_millis(2000),
        }
    }
}

impl NodeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_timeout(mut self, d: Duration) -> Self {
        self.client_timeout = d;
        self
    }

    pub fn redirect_timeout(mut self, d: Duration) -> Self {
        self.redirect_timeout = d;
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.request_timeout = d;
        self
    }

    pub fn health_check_interval(mut self, d: Duration) -> Self {
        self.health_check_interval = d;
        self
    }

    pub fn merkle_sync_interval(mut self, d: Duration) -> Self {
        self.merkle_sync_interval = d;
        self
    }
}
