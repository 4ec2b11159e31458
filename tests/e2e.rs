use core::{convert::Infallible, num::NonZero, time::Duration};
use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Instant,
};

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use volley::{
    cfg::{BodySource, Config, HttpVersion, TokenSource},
    dispatch::Dispatcher,
};

#[derive(Clone, Copy)]
struct StubResponse {
    status: u16,
    delay: Option<Duration>,
}

impl StubResponse {
    fn ok() -> Self {
        Self {
            status: 200,
            delay: None,
        }
    }
}

type Handler = Arc<dyn Fn(&http::request::Parts) -> StubResponse + Send + Sync>;

/// Spawns an HTTP/1.1 stub on an ephemeral port and returns its address.
///
/// Every response carries a 10-byte body; status and delay come from the
/// handler. The serving thread lives until the test process exits.
fn spawn_stub(handler: Handler) -> SocketAddr {
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();

            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let handler = handler.clone();

                tokio::task::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let handler = handler.clone();

                        async move {
                            let (parts, _body) = req.into_parts();
                            let stub = handler(&parts);

                            if let Some(delay) = stub.delay {
                                tokio::time::sleep(delay).await;
                            }

                            let mut response =
                                Response::new(Full::new(Bytes::from_static(b"aaaaaaaaaa")));
                            *response.status_mut() = StatusCode::from_u16(stub.status).unwrap();

                            Ok::<_, Infallible>(response)
                        }
                    });

                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
    });

    rx.recv().unwrap()
}

fn config(addr: SocketAddr, conns: usize, requests: u64) -> Config {
    Config {
        uri: format!("http://{addr}/").parse().unwrap(),
        version: HttpVersion::H1,
        method: http::Method::GET,
        headers: Vec::new(),
        body: BodySource::None,
        connections: NonZero::new(conns).unwrap(),
        requests,
        duration: None,
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(5),
        disable_keep_alive: false,
        skip_verify: false,
        mtls: None,
        token_header: None,
        tokens: None,
        claims: None,
        req_every: None,
        verbose: false,
        verbose_tick: Duration::from_secs(1),
    }
}

#[test]
fn fixed_reqs_completes_budget() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let cfg = config(addr, 10, 1000);

    let report = Dispatcher::new(cfg).run().unwrap();

    assert_eq!(report.completed, 1000);
    assert_eq!(report.failed, 0);
    assert_eq!(report.statuses[&200], 1000);
    assert_eq!(report.statuses.values().sum::<u64>(), 1000);
    assert!(report.errors.is_empty());
    assert!(report.throughput > 0.0);

    let lat = &report.latency;
    assert!(lat.min > Duration::ZERO);
    assert!(lat.p50 <= lat.p75);
    assert!(lat.p75 <= lat.p90);
    assert!(lat.p90 <= lat.p95);
    assert!(lat.p95 <= lat.p99);
    assert!(lat.p99 <= lat.p999);
    assert!(lat.p999 <= lat.max);
}

#[test]
fn fixed_time_runs_for_the_duration() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let mut cfg = config(addr, 4, 0);
    cfg.duration = Some(Duration::from_secs(2));
    cfg.read_timeout = Duration::from_secs(1);

    let report = Dispatcher::new(cfg).run().unwrap();

    assert!(report.completed > 0);
    assert_eq!(report.failed, 0);
    assert!(report.elapsed >= Duration::from_secs(2));
    // The in-flight request at the deadline may run into its timeout.
    assert!(report.elapsed < Duration::from_secs(4));
}

#[test]
fn fixed_time_requests_stops_at_budget() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let mut cfg = config(addr, 4, 100);
    cfg.duration = Some(Duration::from_secs(30));

    let started = Instant::now();
    let report = Dispatcher::new(cfg).run().unwrap();

    // The budget fires long before the deadline.
    assert_eq!(report.completed + report.failed, 100);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn mixed_status_codes_land_in_the_histogram() {
    let hits = Arc::new(Mutex::new(0u64));
    let addr = spawn_stub(Arc::new(move |_| {
        let mut hits = hits.lock().unwrap();
        *hits += 1;

        StubResponse {
            status: if *hits % 2 == 1 { 200 } else { 500 },
            delay: None,
        }
    }));

    let report = Dispatcher::new(config(addr, 1, 100)).run().unwrap();

    assert_eq!(report.completed, 100);
    assert_eq!(report.statuses[&200], 50);
    assert_eq!(report.statuses[&500], 50);
}

#[test]
fn slow_responses_become_read_timeouts() {
    let addr = spawn_stub(Arc::new(|_| StubResponse {
        status: 200,
        delay: Some(Duration::from_secs(2)),
    }));
    let mut cfg = config(addr, 2, 20);
    cfg.read_timeout = Duration::from_millis(300);

    let report = Dispatcher::new(cfg).run().unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.failed, 20);
    assert_eq!(report.errors["read_timeout"], 20);
    assert_eq!(report.errors.values().sum::<u64>(), report.failed);
    // Failed samples stay out of the latency percentiles.
    assert_eq!(report.latency.p999, Duration::ZERO);
}

#[test]
fn cancellation_stops_the_run_promptly() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let mut cfg = config(addr, 8, 1_000_000);
    cfg.read_timeout = Duration::from_secs(1);

    let dispatcher = Dispatcher::new(cfg);
    let cancel = dispatcher.cancel_handle();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        cancel.cancel();
    });

    let started = Instant::now();
    let report = dispatcher.run().unwrap();

    // 500ms plus at most one request timeout per worker.
    assert!(started.elapsed() < Duration::from_secs(5));

    let total = report.completed + report.failed;
    assert!(total > 0);
    assert!(total < 1_000_000);
    assert_eq!(report.statuses.values().sum::<u64>(), report.completed);
    assert_eq!(report.errors.values().sum::<u64>(), report.failed);
}

#[test]
fn each_token_is_sent_exactly_once() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let addr = {
        let seen = seen.clone();

        spawn_stub(Arc::new(move |parts: &http::request::Parts| {
            let token = parts
                .headers
                .get("x-auth")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned();
            seen.lock().unwrap().push(token);

            StubResponse::ok()
        }))
    };

    let tokens: Vec<String> = (0..500).map(|i| format!("t{i}")).collect();
    let mut cfg = config(addr, 10, 500);
    cfg.token_header = Some(http::header::HeaderName::from_static("x-auth"));
    cfg.tokens = Some(TokenSource::Inline(tokens.clone()));

    let report = Dispatcher::new(cfg).run().unwrap();

    assert_eq!(report.completed, 500);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 500);

    let unique: HashSet<&String> = seen.iter().collect();
    assert_eq!(unique.len(), 500, "a token was sent more than once");
    assert_eq!(unique, tokens.iter().collect::<HashSet<_>>());
}

#[test]
fn keep_alive_disabled_still_completes() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let mut cfg = config(addr, 2, 50);
    cfg.disable_keep_alive = true;

    let report = Dispatcher::new(cfg).run().unwrap();

    assert_eq!(report.completed, 50);
    assert_eq!(report.failed, 0);
}

#[test]
fn pacing_spaces_out_requests() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    let mut cfg = config(addr, 1, 10);
    cfg.req_every = Some(Duration::from_millis(50));

    let started = Instant::now();
    let report = Dispatcher::new(cfg).run().unwrap();

    assert_eq!(report.completed, 10);
    // Nine full intervals between ten sends.
    assert!(started.elapsed() >= Duration::from_millis(450));
}

#[test]
fn rejected_config_never_runs() {
    let addr = spawn_stub(Arc::new(|_| StubResponse::ok()));
    // More connections than requests.
    let cfg = config(addr, 8, 2);

    assert!(Dispatcher::new(cfg).run().is_err());
}
