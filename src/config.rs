//! Protocol configuration
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Budget for each co-signer session.
    pub session_timeout: Duration,
    /// bech32 human readable prefix for generated version ids.
    pub version_prefix: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(10),
            version_prefix: "ver_".to_string(),
        }
    }
}

impl ProtocolConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
    pub fn set_version_prefix(mut self, prefix: &str) -> Self {
        self.version_prefix = prefix.to_string();
        self
    }
}
