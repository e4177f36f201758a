use std::env;
use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Runtime knobs shared by the listener and dialer roles.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Base URL of the rendezvous relay.
    pub relay_url: String,
    /// STUN/TURN urls handed to the peer transport.
    pub ice_servers: Vec<String>,
    /// Minimum spacing between consecutive candidate pushes of one session.
    pub candidate_interval: Duration,
    /// Unit of the pull retry backoff.
    pub backoff_step: Duration,
    /// Backoff stops growing after this many consecutive failures.
    pub backoff_max_attempts: u32,
    /// Capacity of each session's handshake inbox.
    pub inbox_capacity: usize,
    /// A session that isn't open after this long is torn down.
    pub negotiation_timeout: Duration,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            candidate_interval: Duration::from_millis(100),
            backoff_step: Duration::from_secs(1),
            backoff_max_attempts: 10,
            inbox_capacity: 16,
            negotiation_timeout: Duration::from_secs(30),
        }
    }
}

impl TunnelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ice_servers = if env::var("BEACH_TUNNEL_LOCALHOST_ONLY").is_ok() {
            Vec::new()
        } else {
            env::var("BEACH_TUNNEL_ICE_SERVERS")
                .ok()
                .map(|raw| parse_list(&raw))
                .unwrap_or(defaults.ice_servers)
        };
        Self {
            relay_url: env::var("BEACH_TUNNEL_RELAY")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or(defaults.relay_url),
            ice_servers,
            candidate_interval: env_millis("BEACH_TUNNEL_CANDIDATE_INTERVAL_MS")
                .unwrap_or(defaults.candidate_interval),
            backoff_step: env_millis("BEACH_TUNNEL_BACKOFF_STEP_MS").unwrap_or(defaults.backoff_step),
            backoff_max_attempts: defaults.backoff_max_attempts,
            inbox_capacity: env::var("BEACH_TUNNEL_INBOX_CAPACITY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(defaults.inbox_capacity)
                .max(1),
            negotiation_timeout: env::var("BEACH_TUNNEL_NEGOTIATION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.negotiation_timeout),
        }
    }

    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = url.into();
        self
    }

    pub fn with_candidate_interval(mut self, interval: Duration) -> Self {
        self.candidate_interval = interval;
        self
    }

    pub fn with_backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
