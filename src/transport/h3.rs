use core::{fmt::Display, future::poll_fn, net::SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use h3_quinn::OpenStreams;
use http::HeaderValue;
use quinn::crypto::rustls::QuicClientConfig;
use tokio::time::timeout;

use super::Shared;
use crate::{stat::ErrorKind, template::RequestTemplate};

/// HTTP/3 client over one QUIC connection.
pub struct H3Transport {
    shared: Arc<Shared>,
    endpoint: Option<quinn::Endpoint>,
    conn: Option<h3::client::SendRequest<OpenStreams, Bytes>>,
}

impl H3Transport {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            endpoint: None,
            conn: None,
        }
    }

    pub async fn send(
        &mut self,
        template: &RequestTemplate,
        token: Option<&HeaderValue>,
    ) -> Result<u16, ErrorKind> {
        let mut sender = match self.conn.take() {
            Some(sender) => sender,
            None => self.connect().await?,
        };

        let (req, body) = template.request_empty(token);
        let exchange = async {
            let mut stream = sender.send_request(req).await.map_err(classify_h3)?;
            if !body.is_empty() {
                stream.send_data(body).await.map_err(classify_h3)?;
            }
            stream.finish().await.map_err(classify_h3)?;

            let resp = stream.recv_response().await.map_err(classify_h3)?;
            let status = resp.status().as_u16();

            while stream.recv_data().await.map_err(classify_h3)?.is_some() {}

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

    async fn connect(&mut self) -> Result<h3::client::SendRequest<OpenStreams, Bytes>, ErrorKind> {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let endpoint = self.endpoint()?;
                self.endpoint = Some(endpoint.clone());
                endpoint
            }
        };

        let shared = &self.shared;
        let connecting = endpoint
            .connect(shared.addr, &shared.host)
            .map_err(classify_h3)?;

        let conn = match timeout(shared.write_timeout, connecting).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                log::debug!("quic handshake failed: {err}");
                return Err("tls_handshake");
            }
            Err(..) => return Err("connect_timeout"),
        };

        let (mut driver, sender) = h3::client::new(h3_quinn::Connection::new(conn))
            .await
            .map_err(classify_h3)?;

        tokio::task::spawn(async move {
            let _ = poll_fn(|cx| driver.poll_close(cx)).await;
        });

        Ok(sender)
    }

    fn endpoint(&self) -> Result<quinn::Endpoint, ErrorKind> {
        let shared = &self.shared;

        // The scheme is https whenever H3 is selected, so the TLS material
        // is always present here.
        let tls = match &shared.tls {
            Some(tls) => (**tls).clone(),
            None => return Err("tls_handshake"),
        };
        let quic = QuicClientConfig::try_from(tls).map_err(classify_h3)?;

        let bind: SocketAddr = match shared.addr {
            SocketAddr::V4(..) => ([0, 0, 0, 0], 0).into(),
            SocketAddr::V6(..) => ([0u16, 0, 0, 0, 0, 0, 0, 0], 0).into(),
        };

        let mut endpoint = quinn::Endpoint::client(bind).map_err(|err| super::classify_io(&err))?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic)));

        Ok(endpoint)
    }
}

fn classify_h3<E: Display>(err: E) -> ErrorKind {
    log::debug!("h3 request failed: {err}");
    "protocol"
}
