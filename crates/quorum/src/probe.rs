//! Liveness probes for a single peer.

use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;
use tracing::trace;

use crate::Error;

/// A liveness probe against one peer address.
///
/// `Ok(())` means the peer is definitively healthy; every error, including
/// a timeout imposed by the caller, counts as unhealthy.
#[async_trait]
pub trait PeerProbe
where
    Self: Send + Sync + 'static,
{
    /// Probes `peer` once, without retrying.
    async fn probe(&self, peer: &str) -> Result<(), Error>;
}

/// Healthy if a TCP connection to the peer's port can be established.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    port: u16,
}

impl TcpProbe {
    /// Creates a probe that connects to `port` on every peer.
    #[must_use]
    pub const fn new(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait]
impl PeerProbe for TcpProbe {
    async fn probe(&self, peer: &str) -> Result<(), Error> {
        let stream = TcpStream::connect((peer, self.port))
            .await
            .map_err(Error::Connect)?;
        trace!("tcp probe connected to {peer}:{}", self.port);
        drop(stream);

        Ok(())
    }
}

/// Healthy if `GET http://<peer>:<port>/` answers `200 OK`.
///
/// This matches the health endpoint a galera-healthcheck sidecar serves:
/// 200 when the node is synced, 503 otherwise.
#[derive(Clone, Debug)]
pub struct HttpProbe {
    client: Client,
    port: u16,
}

impl HttpProbe {
    /// Creates a probe that queries `port` on every peer.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            client: Client::new(),
            port,
        }
    }

    fn url(&self, peer: &str) -> String {
        if peer.contains(':') && !peer.starts_with('[') {
            format!("http://[{peer}]:{}/", self.port)
        } else {
            format!("http://{peer}:{}/", self.port)
        }
    }
}

#[async_trait]
impl PeerProbe for HttpProbe {
    async fn probe(&self, peer: &str) -> Result<(), Error> {
        let response = self.client.get(self.url(peer)).send().await?;
        let status = response.status();
        trace!("http probe of {peer} returned {status}");

        if status == reqwest::StatusCode::OK {
            Ok(())
        } else {
            Err(Error::Status(status.as_u16()))
        }
    }
}
