use core::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::cmd::ServeCmd;

/// Runs a local HTTP/1.1 server to point a load test at.
///
/// Responds to every request with a fixed-size body, optionally after an
/// artificial delay (useful for exercising timeouts).
pub async fn run(cmd: ServeCmd) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([127, 0, 0, 1], cmd.port));
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;
    log::info!("http server listening on {addr}");

    let body = Bytes::from(vec![b'a'; cmd.response_size]);
    let delay = cmd.delay;

    loop {
        let (stream, _) = listener.accept().await?;
        let body = body.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |_req: Request<hyper::body::Incoming>| {
                let body = body.clone();

                async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }

                    Ok::<_, Infallible>(Response::new(Full::new(body)))
                }
            });

            if let Err(err) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                log::debug!("connection error: {err}");
            }
        });
    }
}
