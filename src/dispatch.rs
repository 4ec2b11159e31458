use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    sync::{Arc, Barrier},
    thread::{self, Builder},
    time::Instant,
};

use anyhow::{Context, Error};

use crate::{
    cfg::{Config, ConfigError, Mode},
    report::Report,
    stat::{self, RunCounters},
    template::RequestTemplate,
    token::{TokenSlice, TokenSupply},
    transport::Connector,
    worker::Worker,
};

/// Cloneable cancellation handle.
///
/// Written by the signal handler or a programmatic stop, polled by the
/// workers between requests. Pending sends finish or time out, so the
/// stop latency is bounded by the request timeouts.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs one dispatch: spawns a worker per connection, releases them through
/// the start barrier, waits for completion and aggregates the buffers.
pub struct Dispatcher {
    cfg: Config,
    cancel: Cancel,
}

impl Dispatcher {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            cancel: Cancel::new(),
        }
    }

    /// Returns a handle that stops the run when cancelled.
    ///
    /// Must be taken before [`run`](Self::run), which consumes the
    /// dispatcher.
    pub fn cancel_handle(&self) -> Cancel {
        self.cancel.clone()
    }

    pub fn run(self) -> Result<Report, Error> {
        self.cfg.validate()?;

        let conns = self.cfg.connections.get();
        let mode = self.cfg.mode();

        let budgets = match mode {
            Mode::FixedTime(..) => None,
            Mode::FixedReqs(reqs) | Mode::FixedTimeRequests(reqs, ..) => {
                Some(split_budget(reqs, conns))
            }
        };
        let duration = match mode {
            Mode::FixedReqs(..) => None,
            Mode::FixedTime(duration) | Mode::FixedTimeRequests(.., duration) => Some(duration),
        };

        let tokens = match &self.cfg.tokens {
            Some(source) => {
                let supply = TokenSupply::load(source)?;
                if supply.len() < self.cfg.requests {
                    return Err(ConfigError::NotEnoughTokens {
                        have: supply.len(),
                        need: self.cfg.requests,
                    }
                    .into());
                }
                Some(supply)
            }
            None => None,
        };

        let connector = Connector::new(&self.cfg)?;
        let template = Arc::new(RequestTemplate::new(&self.cfg)?);

        let mut slices: Vec<Option<TokenSlice>> = match (&tokens, &budgets) {
            (Some(supply), Some(budgets)) => {
                supply.partition(budgets).into_iter().map(Some).collect()
            }
            _ => (0..conns).map(|_| None).collect(),
        };

        let counters = Arc::new(RunCounters::default());
        let barrier = Arc::new(Barrier::new(conns + 1));
        let epoch = Instant::now();

        install_signal(self.cancel.clone());

        let mut threads = Vec::with_capacity(conns);
        for (idx, slice) in slices.iter_mut().enumerate() {
            let worker = Worker::new(
                connector.transport(),
                template.clone(),
                slice.take(),
                budgets.as_ref().map(|budgets| budgets[idx]),
                duration,
                self.cfg.req_every,
                epoch,
                barrier.clone(),
                self.cancel.clone(),
                counters.clone(),
            );

            let thread = Builder::new()
                .name(format!("volley:{idx:02}"))
                .spawn(move || worker.run())
                .context("failed to spawn worker")?;

            threads.push(thread);
        }

        let done = Arc::new(AtomicBool::new(false));
        let ticker = match self.cfg.verbose {
            true => Some(self.spawn_ticker(counters.clone(), done.clone())?),
            false => None,
        };

        log::info!("dispatching {conns} connections against {}", self.cfg.uri);
        let t0 = Instant::now();
        barrier.wait();

        let mut buffers = Vec::with_capacity(conns);
        for thread in threads {
            buffers.push(thread.join().expect("no self join"));
        }
        let elapsed = t0.elapsed();

        done.store(true, Ordering::Relaxed);
        if let Some(ticker) = ticker {
            ticker.join().expect("no self join");
        }

        let merged = stat::merge(buffers);

        Ok(Report::build(merged, elapsed))
    }

    fn spawn_ticker(
        &self,
        counters: Arc<RunCounters>,
        done: Arc<AtomicBool>,
    ) -> Result<thread::JoinHandle<()>, Error> {
        let tick = self.cfg.verbose_tick;

        let thread = Builder::new()
            .name("volley:tick".into())
            .spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    if done.load(Ordering::Relaxed) {
                        break;
                    }

                    log::info!(
                        "{} requests completed, {} failed",
                        counters.completed(),
                        counters.failed()
                    );
                }
            })
            .context("failed to spawn ticker")?;

        Ok(thread)
    }
}

/// Splits the request budget across connections, remainder first.
fn split_budget(reqs: u64, conns: usize) -> Vec<u64> {
    let lb = reqs / conns as u64;
    let ub = reqs % conns as u64;

    (0..conns as u64)
        .map(|idx| if idx < ub { lb + 1 } else { lb })
        .collect()
}

/// Trips the cancellation handle on SIGINT.
///
/// The watcher thread parks on the signal future and dies with the
/// process; there is nothing to join.
fn install_signal(cancel: Cancel) {
    let rc = Builder::new().name("volley:sig".into()).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(..) => return,
        };

        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupted, stopping");
                cancel.cancel();
            }
        });
    });

    if let Err(err) = rc {
        log::warn!("failed to install signal handler: {err}");
    }
}
