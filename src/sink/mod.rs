pub mod proxy;

use anyhow::Result;

use self::proxy::{LogClient, ProxyClient};

/// Formats one sample in the proxy line protocol.
pub fn format_line(name: &str, value: f64, epoch_secs: i64, origin: &str) -> String {
    format!("{name} {value} {epoch_secs} source={origin}")
}

/// A single proxy connection, opened once per cycle and closed on every exit
/// path of that cycle.
pub trait SinkClient: Send {
    /// Queues one sample for delivery.
    fn send(
        &mut self,
        name: &str,
        value: f64,
        epoch_secs: i64,
        origin: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Pushes buffered samples to the wire.
    fn flush(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Flushes and tears down the connection.
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Produces a fresh sink connection per cycle.
pub trait SinkFactory: Send + Sync {
    type Client: SinkClient;

    fn connect(&self) -> impl std::future::Future<Output = Result<Self::Client>> + Send;
}

/// Sink connection to either the TCP proxy or the log fallback.
///
/// Enum dispatch rather than trait objects keeps the per-sample send path
/// free of `Pin<Box<dyn Future>>` allocation.
pub enum Client {
    Proxy(ProxyClient),
    Log(LogClient),
}

impl SinkClient for Client {
    async fn send(&mut self, name: &str, value: f64, epoch_secs: i64, origin: &str) -> Result<()> {
        match self {
            Self::Proxy(c) => c.send(name, value, epoch_secs, origin).await,
            Self::Log(c) => c.send(name, value, epoch_secs, origin).await,
        }
    }

    async fn flush(&mut self) -> Result<()> {
        match self {
            Self::Proxy(c) => c.flush().await,
            Self::Log(c) => c.flush().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            Self::Proxy(c) => c.close().await,
            Self::Log(c) => c.close().await,
        }
    }
}

/// Factory for per-cycle sink connections.
///
/// When forwarding is disabled every connection is a [`LogClient`], so the
/// whole pipeline still runs and the formatted lines land in the log instead
/// of on the wire.
pub struct ProxyFactory {
    addr: String,
    forward: bool,
}

impl ProxyFactory {
    pub fn new(host: &str, port: u16, forward: bool) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            forward,
        }
    }

    /// Proxy address this factory dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl SinkFactory for ProxyFactory {
    type Client = Client;

    async fn connect(&self) -> Result<Client> {
        if self.forward {
            Ok(Client::Proxy(ProxyClient::connect(&self.addr).await?))
        } else {
            Ok(Client::Log(LogClient::default()))
        }
    }
}
