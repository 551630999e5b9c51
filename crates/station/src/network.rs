//! Network link below the messaging session.
//!
//! On the Pi, Wi-Fi association belongs to the OS (wpa_supplicant), so the
//! host implementation only probes reachability: the link counts as up when
//! the broker accepts a TCP connection.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[allow(async_fn_in_trait)]
pub trait Network {
    /// Start (or restart) association with the access point.
    async fn associate(&mut self, ssid: &str, password: &str);
    async fn is_connected(&mut self) -> bool;
}

/// Reachability probe against the broker address.
pub struct HostNetwork {
    host: String,
    port: u16,
}

impl HostNetwork {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }
}

impl Network for HostNetwork {
    async fn associate(&mut self, ssid: &str, _password: &str) {
        debug!(%ssid, "association is managed by the OS; waiting for link");
    }

    async fn is_connected(&mut self) -> bool {
        match timeout(PROBE_TIMEOUT, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host = %self.host, port = self.port, "broker unreachable: {e}");
                false
            }
            Err(_) => {
                debug!(host = %self.host, port = self.port, "broker probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_broker_counts_as_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut net = HostNetwork::new("127.0.0.1", port);
        assert!(net.is_connected().await);
    }

    #[tokio::test]
    async fn closed_port_counts_as_disconnected() {
        // Grab a free port, then release it so nothing listens there.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let mut net = HostNetwork::new("127.0.0.1", port);
        assert!(!net.is_connected().await);
    }
}
