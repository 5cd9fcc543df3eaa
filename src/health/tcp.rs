/// TCP connect probe for `tcp://host:port` targets
use super::{HealthChecker, HealthStatus};
use async_trait::async_trait;
use tokio::net::TcpStream;

pub const TCP_SCHEME: &str = "tcp://";

/// Healthy iff a TCP connection to the target can be opened
#[derive(Debug, Default)]
pub struct TcpHealthChecker;

impl TcpHealthChecker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HealthChecker for TcpHealthChecker {
    async fn check_health(&self, target: &str) -> HealthStatus {
        let address = target.strip_prefix(TCP_SCHEME).unwrap_or(target);

        match TcpStream::connect(address).await {
            Ok(_) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy {
                reason: format!("Connection failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_port_is_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let status = TcpHealthChecker::new()
            .check_health(&format!("tcp://{}", addr))
            .await;
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_closed_port_is_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let status = TcpHealthChecker::new()
            .check_health(&format!("tcp://{}", addr))
            .await;
        assert!(matches!(status, HealthStatus::Unhealthy { .. }));
    }
}
