use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub pull_timeout: Duration,
    pub mailbox_capacity: usize,
    pub idle_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env::var("BEACH_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            pull_timeout: env::var("BEACH_RELAY_PULL_TIMEOUT_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.pull_timeout),
            mailbox_capacity: env::var("BEACH_RELAY_MAILBOX_CAPACITY")
                .ok()
                .and_then(|c| c.parse::<usize>().ok())
                .map(|c| c.max(1))
                .unwrap_or(defaults.mailbox_capacity),
            idle_ttl: env::var("BEACH_RELAY_IDLE_TTL_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_ttl),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            pull_timeout: Duration::from_secs(5),
            mailbox_capacity: 1,
            idle_ttl: Duration::from_secs(300),
        }
    }
}
