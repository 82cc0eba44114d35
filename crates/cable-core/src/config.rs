//! Client configuration surface.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CableError;

/// Wire dialect selection. Unknown strings fail fast at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// Plain ActionCable v1 JSON dialect.
    ActionCableV1Json,
    /// Extended dialect with session resume: a welcome carrying
    /// `restored: true` revives existing subscriptions without a
    /// resubscribe round-trip.
    ActionCableV1ExtJson,
}

impl ProtocolKind {
    /// Whether this dialect can resume a session transparently after a short
    /// closure. When `false` (the default dialect) every reconnect requires
    /// full resubscription.
    pub fn recoverable_closure(self) -> bool {
        matches!(self, Self::ActionCableV1ExtJson)
    }
}

impl FromStr for ProtocolKind {
    type Err = CableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actioncable-v1-json" => Ok(Self::ActionCableV1Json),
            "actioncable-v1-ext-json" => Ok(Self::ActionCableV1ExtJson),
            other => Err(CableError::Config(format!("unknown protocol: {other}"))),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ActionCableV1Json => write!(f, "actioncable-v1-json"),
            Self::ActionCableV1ExtJson => write!(f, "actioncable-v1-ext-json"),
        }
    }
}

/// Async hook invoked when the server closes the connection with a
/// `token_expired` reason.
///
/// Returning `Ok(Some(url))` retargets the transport before the follow-up
/// connect; `Ok(None)` reconnects to the current URL. At most one refresh is
/// in flight at a time; failures are logged and leave the connection
/// disconnected until the next expiry event.
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    async fn refresh(&self) -> Result<Option<String>, CableError>;
}

/// Injectable reconnect delay strategy: attempt number (1-based) → delay.
pub type ReconnectStrategy = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// Configuration for one connection.
#[derive(Clone)]
pub struct ClientConfig {
    /// Wire dialect to speak.
    pub protocol: ProtocolKind,
    /// Heartbeat cadence; also seeds the reconnect backoff.
    pub ping_interval: Duration,
    /// Consecutive missed heartbeats before the connection is declared dead.
    pub max_missing_pings: u32,
    /// Reconnect attempts before giving up permanently.
    pub max_reconnect_attempts: u32,
    /// Defer connecting until the first subscribe.
    pub lazy: bool,
    /// Set to `false` to disable heartbeat tracking and auto-reconnect.
    pub monitor: bool,
    /// Custom backoff schedule; the default is exponential with jitter,
    /// seeded off `ping_interval`.
    pub reconnect_strategy: Option<ReconnectStrategy>,
    /// Hook for `token_expired` disconnects.
    pub token_refresher: Option<Arc<dyn TokenRefresher>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolKind::ActionCableV1Json,
            ping_interval: Duration::from_secs(3),
            max_missing_pings: 2,
            max_reconnect_attempts: 5,
            lazy: true,
            monitor: true,
            reconnect_strategy: None,
            token_refresher: None,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("protocol", &self.protocol)
            .field("ping_interval", &self.ping_interval)
            .field("max_missing_pings", &self.max_missing_pings)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("lazy", &self.lazy)
            .field("monitor", &self.monitor)
            .field("reconnect_strategy", &self.reconnect_strategy.is_some())
            .field("token_refresher", &self.token_refresher.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_from_str() {
        assert_eq!(
            "actioncable-v1-json".parse::<ProtocolKind>().unwrap(),
            ProtocolKind::ActionCableV1Json
        );
        assert_eq!(
            "actioncable-v1-ext-json".parse::<ProtocolKind>().unwrap(),
            ProtocolKind::ActionCableV1ExtJson
        );
        assert!("msgpack".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn recoverable_closure_per_dialect() {
        assert!(!ProtocolKind::ActionCableV1Json.recoverable_closure());
        assert!(ProtocolKind::ActionCableV1ExtJson.recoverable_closure());
    }
}
