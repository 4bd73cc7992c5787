use super::*;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 3000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Pushes encoded bundles to a peer's `POST /push` ingress endpoint.
///
/// This CLA cannot actively receive; the node's own ingress endpoint feeds
/// the processor directly.
pub struct HttpConvergenceLayer {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpConvergenceLayer {
    pub fn new(max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("http client construction cannot fail"),
            max_retries,
        }
    }
}

impl Default for HttpConvergenceLayer {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl ConvergenceLayer for HttpConvergenceLayer {
    fn id(&self) -> String {
        "http:push".into()
    }

    fn name(&self) -> &'static str {
        "http"
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) {}

    async fn send_bundle(&self, bundle: &Bundle, peer: &Peer) -> Result<()> {
        let target = peer_socket_addr(peer, self.name(), DEFAULT_PORT);
        let url = format!("http://{target}/push");
        let data = bundle.to_cbor();

        let mut last_status = None;
        for attempt in 1..=self.max_retries {
            match self
                .client
                .post(&url)
                .header("Content-Type", "application/octet-stream")
                .body(data.clone())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    debug!("Pushed bundle to {url} on attempt {attempt}");
                    return Ok(());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    last_status = Some(status);
                    warn!("Push to {url} returned {status} (attempt {attempt})");
                }
                Err(e) => {
                    warn!("Push to {url} failed: {e} (attempt {attempt})");
                }
            }
            tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
        }
        match last_status {
            Some(status) => Err(ClaError::Http(status)),
            None => Err(ClaError::ConnectionNotActive),
        }
    }

    fn connections(&self) -> Vec<Connection> {
        Vec::new()
    }

    fn take_incoming(&self) -> Option<IngressReceiver> {
        None
    }
}
