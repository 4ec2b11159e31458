use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::{net::TcpStream, time::timeout};
use tokio_rustls::TlsConnector;

use super::{classify_hyper, classify_io, Shared};
use crate::{stat::ErrorKind, template::RequestTemplate};

/// HTTP/2 client over one multiplexed connection.
///
/// Speaks h2 over TLS (ALPN) and prior-knowledge h2c over plaintext.
#[derive(Debug)]
pub struct H2Transport {
    shared: Arc<Shared>,
    conn: Option<SendRequest<Full<Bytes>>>,
}

impl H2Transport {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared, conn: None }
    }

    pub async fn send(
        &mut self,
        template: &RequestTemplate,
        token: Option<&HeaderValue>,
    ) -> Result<u16, ErrorKind> {
        let mut sender = match self.conn.take() {
            Some(sender) if !sender.is_closed() => sender,
            _ => self.connect().await?,
        };

        let req = template.request(token);
        let exchange = async {
            let resp = sender
                .send_request(req)
                .await
                .map_err(|err| classify_hyper(&err))?;
            let status = resp.status().as_u16();

            let mut body = resp.into_body();
            while let Some(frame) = body.frame().await {
                frame.map_err(|err| classify_hyper(&err))?;
            }

            Ok(status)
        };

        let status = match timeout(self.shared.read_timeout, exchange).await {
            Ok(status) => status?,
            Err(..) => return Err("read_timeout"),
        };

        if self.shared.keep_alive {
            self.conn = Some(sender);
        }

        Ok(status)
    }

    async fn connect(&self) -> Result<SendRequest<Full<Bytes>>, ErrorKind> {
        let shared = &self.shared;

        let stream = match timeout(shared.write_timeout, TcpStream::connect(shared.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(classify_io(&err)),
            Err(..) => return Err("connect_timeout"),
        };
        let _ = stream.set_nodelay(true);

        match &shared.tls {
            Some(tls) => {
                let connector = TlsConnector::from(tls.clone());
                let server_name = shared.server_name.clone();

                let stream = match timeout(shared.write_timeout, connector.connect(server_name, stream)).await {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(err)) => {
                        log::debug!("tls handshake failed: {err}");
                        return Err("tls_handshake");
                    }
                    Err(..) => return Err("tls_handshake"),
                };

                handshake(TokioIo::new(stream)).await
            }
            None => handshake(TokioIo::new(stream)).await,
        }
    }
}

async fn handshake<T>(io: T) -> Result<SendRequest<Full<Bytes>>, ErrorKind>
where
    T: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (sender, conn) = http2::handshake(TokioExecutor::new(), io)
        .await
        .map_err(|err| classify_hyper(&err))?;

    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            log::debug!("connection closed: {err}");
        }
    });

    Ok(sender)
}
