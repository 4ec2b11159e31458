use core::time::Duration;
use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::Arc,
};

use anyhow::{Context, Error};
use rustls::pki_types::ServerName;

use crate::{
    cfg::{Config, HttpVersion},
    stat::ErrorKind,
};

pub use self::{h1::H1Transport, h2::H2Transport, h3::H3Transport};

mod h1;
mod h2;
mod h3;
mod tls;

/// Connection parameters shared by all workers of one dispatch.
#[derive(Debug)]
pub(crate) struct Shared {
    /// Resolved target endpoint.
    pub addr: SocketAddr,
    /// Name presented for TLS verification and SNI.
    pub server_name: ServerName<'static>,
    /// Target host, as given in the URI.
    pub host: String,
    /// TLS client config; present exactly when the scheme is https.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Whether connections may be reused across requests.
    pub keep_alive: bool,
}

/// Immutable transport builder.
///
/// Constructed once per dispatch; resolves the target and builds the TLS
/// material up front so workers only dial.
#[derive(Debug, Clone)]
pub struct Connector {
    version: HttpVersion,
    shared: Arc<Shared>,
}

impl Connector {
    pub fn new(cfg: &Config) -> Result<Self, Error> {
        let host = cfg.host().to_owned();
        let port = cfg.port();

        let addr = (host.as_str(), port)
            .to_socket_addrs()
            .with_context(|| format!("failed to resolve {host}:{port}"))?
            .next()
            .with_context(|| format!("{host}:{port} resolved to no addresses"))?;

        let server_name = ServerName::try_from(host.clone())
            .with_context(|| format!("invalid server name {host:?}"))?;

        let tls = match cfg.is_tls() {
            true => Some(Arc::new(tls::client_config(cfg)?)),
            false => None,
        };

        let shared = Arc::new(Shared {
            addr,
            server_name,
            host,
            tls,
            read_timeout: cfg.read_timeout,
            write_timeout: cfg.write_timeout,
            keep_alive: !cfg.disable_keep_alive,
        });

        Ok(Self { version: cfg.version, shared })
    }

    /// Creates a fresh transport for one worker.
    pub fn transport(&self) -> Transport {
        match self.version {
            HttpVersion::H1 => Transport::H1(H1Transport::new(self.shared.clone())),
            HttpVersion::H2 => Transport::H2(H2Transport::new(self.shared.clone())),
            HttpVersion::H3 => Transport::H3(H3Transport::new(self.shared.clone())),
        }
    }
}

/// Per-worker HTTP client.
///
/// A tagged variant rather than a trait object: the version is fixed for the
/// whole run, so each worker loop is monomorphic over its transport.
pub enum Transport {
    H1(H1Transport),
    H2(H2Transport),
    H3(H3Transport),
}

impl Transport {
    /// Performs one request.
    ///
    /// Suspends until a full response is received, a timeout elapses or the
    /// connection fails. Never retries; records no timing.
    pub async fn send(
        &mut self,
        template: &crate::template::RequestTemplate,
        token: Option<&http::HeaderValue>,
    ) -> Result<u16, ErrorKind> {
        match self {
            Self::H1(transport) => transport.send(template, token).await,
            Self::H2(transport) => transport.send(template, token).await,
            Self::H3(transport) => transport.send(template, token).await,
        }
    }
}

pub(crate) fn classify_io(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => "connection_reset",
        io::ErrorKind::TimedOut => "read_timeout",
        _ => "connect",
    }
}

pub(crate) fn classify_hyper(err: &hyper::Error) -> ErrorKind {
    if err.is_incomplete_message() || err.is_closed() || err.is_canceled() {
        return "connection_reset";
    }
    if err.is_parse() {
        return "protocol";
    }
    if err.is_timeout() {
        return "read_timeout";
    }

    log::debug!("request failed: {err}");
    "protocol"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_io_errors() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert_eq!(classify_io(&reset), "connection_reset");

        let eof = io::Error::from(io::ErrorKind::UnexpectedEof);
        assert_eq!(classify_io(&eof), "connection_reset");

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_io(&refused), "connect");
    }
}
