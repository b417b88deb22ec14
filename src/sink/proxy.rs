use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::debug;

use super::format_line;

/// Buffered TCP connection to the metrics proxy.
pub struct ProxyClient {
    writer: BufWriter<TcpStream>,
    peer: String,
}

impl ProxyClient {
    /// Dials the proxy.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to metrics proxy at {addr}"))?;

        debug!(addr, "proxy connection opened");

        Ok(Self {
            writer: BufWriter::new(stream),
            peer: addr.to_string(),
        })
    }

    pub async fn send(&mut self, name: &str, value: f64, epoch_secs: i64, origin: &str) -> Result<()> {
        let line = format_line(name, value, epoch_secs, origin);

        self.writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("writing sample to proxy at {}", self.peer))?;
        self.writer
            .write_all(b"\n")
            .await
            .with_context(|| format!("writing sample to proxy at {}", self.peer))?;

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .with_context(|| format!("flushing proxy connection to {}", self.peer))
    }

    pub async fn close(&mut self) -> Result<()> {
        self.flush().await?;
        self.writer
            .get_mut()
            .shutdown()
            .await
            .with_context(|| format!("closing proxy connection to {}", self.peer))?;

        debug!(addr = %self.peer, "proxy connection closed");

        Ok(())
    }
}

/// Emits formatted lines through the log instead of a socket.
#[derive(Debug, Default)]
pub struct LogClient;

impl LogClient {
    pub async fn send(&mut self, name: &str, value: f64, epoch_secs: i64, origin: &str) -> Result<()> {
        debug!("{}", format_line(name, value, epoch_secs, origin));
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
