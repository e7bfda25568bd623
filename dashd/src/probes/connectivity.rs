//! Network reachability probes

use async_trait::async_trait;
use deskcheck_tools::{ResultMap, StatusSource, StrategyError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// Google public DNS; reachable from almost any network with egress
pub const DEFAULT_TARGET: SocketAddr =
    SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 8, 8)), 53);

/// Internet connectivity via a TCP connect with a deadline
#[derive(Debug, Clone)]
pub struct InternetCheck {
    target: SocketAddr,
    timeout: Duration,
}

impl Default for InternetCheck {
    fn default() -> Self {
        Self {
            target: DEFAULT_TARGET,
            timeout: Duration::from_secs(2),
        }
    }
}

impl InternetCheck {
    pub fn new(target: SocketAddr, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    pub async fn is_connected(&self) -> bool {
        let connected = tokio::time::timeout(self.timeout, TcpStream::connect(self.target))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);
        debug!("Connectivity to {}: {connected}", self.target);
        connected
    }

    pub async fn snapshot(&self) -> Value {
        json!({ "is_connected": self.is_connected().await })
    }

    /// Monitor predicate: a disconnected answer is re-checked before it is
    /// believed
    pub fn is_offline(snapshot: &Value) -> bool {
        snapshot["is_connected"] == json!(false)
    }
}

#[async_trait]
impl StatusSource for InternetCheck {
    async fn status(&self) -> Value {
        self.snapshot().await
    }
}

pub async fn internet_details(check: &InternetCheck) -> Result<ResultMap, StrategyError> {
    let mut map = ResultMap::new();
    map.insert("is_connected".into(), json!(check.is_connected().await));
    map.insert("probe_target".into(), json!(check.target.to_string()));
    Ok(map)
}

/// Trusted-network (ZPA / corporate LAN) status.
///
/// Reading the client state needs a platform agent that deskcheck does not
/// ship yet, so every call reports the probe as unsupported.
#[derive(Debug, Default, Clone)]
pub struct TrustedNetwork;

impl TrustedNetwork {
    pub fn execute(&self) -> Result<ResultMap, StrategyError> {
        Err(StrategyError::NotSupported)
    }
}

#[async_trait]
impl StatusSource for TrustedNetwork {
    async fn status(&self) -> Value {
        match self.execute() {
            Ok(map) => Value::Object(map),
            Err(e) => json!({ "status": "Unavailable", "reason": e.to_string() }),
        }
    }
}
