use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::warn;

use crate::sink::{SinkClient, SinkFactory};

/// Forwards a controller's own cycle instrumentation through the sink.
///
/// The connection is opened lazily on the first point of a cycle and closed
/// at the cycle's end, so an idle or disabled reporter costs nothing. Send
/// failures propagate: instrumentation shares the sink's fate.
pub struct Reporter<S: SinkFactory> {
    factory: Arc<S>,
    client: Option<S::Client>,
    enabled: bool,
    prefix: String,
    origin: String,
}

impl<S: SinkFactory> Reporter<S> {
    pub fn new(factory: Arc<S>, enabled: bool, prefix: &str, origin: &str) -> Self {
        Self {
            factory,
            client: None,
            enabled,
            prefix: prefix.to_string(),
            origin: origin.to_string(),
        }
    }

    /// Sends one instrumentation point stamped with the local clock.
    pub async fn send(&mut self, metric: &str, value: f64) -> Result<()> {
        self.send_at(metric, value, epoch_now()).await
    }

    /// Sends one instrumentation point with an explicit timestamp.
    pub async fn send_at(&mut self, metric: &str, value: f64, epoch_secs: i64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.client.is_none() {
            let client = self
                .factory
                .connect()
                .await
                .context("connecting instrumentation sink")?;
            self.client = Some(client);
        }

        if let Some(client) = self.client.as_mut() {
            let name = format!("{}{}", self.prefix, metric);
            client.send(&name, value, epoch_secs, &self.origin).await?;
            client.flush().await?;
        }

        Ok(())
    }

    /// Closes the instrumentation connection if one was opened this cycle.
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close().await {
                warn!(error = %e, "closing instrumentation sink");
            }
        }
    }
}

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
