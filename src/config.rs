//! Node configuration.

use {
    crate::{RingError, RingResult, ring::MAX_RING_BITS},
    std::time::Duration,
};

/// Configuration of a single ring node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host this node listens on and advertises to its peers.
    pub host: String,

    /// Port this node listens on.
    pub port: u16,

    /// Width of the ring: `RING_LEN = 2^ring_bits`.
    ///
    /// Must be the same on every node of a ring.
    pub ring_bits: u32,

    /// Member to join the ring through (host, port).
    ///
    /// `None` starts a new ring with this node as its only member.
    pub introducer: Option<(String, u16)>,

    /// Pause between two checks of the stability flag.
    pub stable_poll_interval: Duration,

    /// Number of checks after which waiting for stability gives up.
    pub max_stable_polls: u32,

    /// Upper bound on every call to a peer.
    pub rpc_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            ring_bits: 32,
            introducer: None,
            stable_poll_interval: Duration::from_secs(1),
            max_stable_polls: 30,
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

impl NodeConfig {
    /// Create a new configuration for a node listening on `host:port`.
    pub fn new(host: impl Into<String>, port: u16, ring_bits: u32) -> Self {
        Self {
            host: host.into(),
            port,
            ring_bits,
            ..Default::default()
        }
    }

    /// Join an existing ring through the given member.
    pub fn with_introducer(mut self, host: impl Into<String>, port: u16) -> Self {
        self.introducer = Some((host.into(), port));
        self
    }

    /// Set the pause between stability checks.
    pub fn with_stable_poll_interval(mut self, interval: Duration) -> Self {
        self.stable_poll_interval = interval;
        self
    }

    /// Set the number of stability checks before giving up.
    pub fn with_max_stable_polls(mut self, polls: u32) -> Self {
        self.max_stable_polls = polls;
        self
    }

    /// Set the bound on calls to peers.
    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// `host:port` address of this node.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Longest time a joining node waits for its introducer.
    ///
    /// The introducer may have to wait for its own topology to settle before
    /// it takes the request, so the plain call bound is extended by the
    /// whole stability window.
    pub fn join_timeout(&self) -> Duration {
        self.rpc_timeout + self.stable_poll_interval * self.max_stable_polls
    }

    /// Checks the configuration for values a node cannot run with.
    pub fn validate(&self) -> RingResult<()> {
        if self.host.is_empty() {
            return Err(RingError::Config("host must not be empty".into()));
        }
        if self.ring_bits == 0 || self.ring_bits > MAX_RING_BITS {
            return Err(RingError::Config(format!(
                "ring bits must be within 1..={MAX_RING_BITS}, got {}",
                self.ring_bits
            )));
        }
        if self.max_stable_polls == 0 {
            return Err(RingError::Config(
                "max stable polls must be at least 1".into(),
            ));
        }
        if self.rpc_timeout.is_zero() {
            return Err(RingError::Config("rpc timeout must be positive".into()));
        }
        if let Some((host, port)) = &self.introducer {
            if host == &self.host && *port == self.port {
                return Err(RingError::Config(
                    "node cannot be its own introducer".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.stable_poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_stable_polls, 30);
        assert_eq!(config.rpc_timeout, Duration::from_secs(10));
        assert!(config.introducer.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_methods() {
        let config = NodeConfig::new("10.0.0.2", 7100, 8)
            .with_introducer("10.0.0.1", 7000)
            .with_stable_poll_interval(Duration::from_millis(50))
            .with_max_stable_polls(4)
            .with_rpc_timeout(Duration::from_millis(500));

        assert_eq!(config.addr(), "10.0.0.2:7100");
        assert_eq!(config.introducer, Some(("10.0.0.1".to_string(), 7000)));
        assert_eq!(config.join_timeout(), Duration::from_millis(700));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values() {
        let invalid = [
            NodeConfig::new("", 7000, 8),
            NodeConfig::new("h", 7000, 0),
            NodeConfig::new("h", 7000, 64),
            NodeConfig::new("h", 7000, 8).with_max_stable_polls(0),
            NodeConfig::new("h", 7000, 8).with_rpc_timeout(Duration::ZERO),
            NodeConfig::new("h", 7000, 8).with_introducer("h", 7000),
        ];
        for config in invalid {
            assert!(
                matches!(config.validate(), Err(RingError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }
}
