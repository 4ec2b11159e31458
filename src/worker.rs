use core::time::Duration;
use std::{
    sync::{Arc, Barrier},
    time::Instant,
};

use tokio::runtime::Builder;

use crate::{
    dispatch::Cancel,
    stat::{RunCounters, StatsBuffer},
    template::RequestTemplate,
    token::TokenSlice,
    transport::Transport,
};

/// Per-connection worker.
///
/// Owns its transport, token slice and stats buffer outright; the only
/// state shared with the rest of the run is the start barrier, the
/// cancellation handle and the snapshot counters.
pub struct Worker {
    transport: Transport,
    template: Arc<RequestTemplate>,
    /// This worker's contiguous share of the token supply.
    tokens: Option<TokenSlice>,
    /// Remaining request budget.
    budget: Option<u64>,
    /// Wall-clock budget, measured from barrier release.
    duration: Option<Duration>,
    /// Minimum interval between two consecutive sends.
    pace: Option<Duration>,
    /// Time base for outcome timestamps, shared by all workers.
    epoch: Instant,
    barrier: Arc<Barrier>,
    cancel: Cancel,
    counters: Arc<RunCounters>,
    stats: StatsBuffer,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Transport,
        template: Arc<RequestTemplate>,
        tokens: Option<TokenSlice>,
        budget: Option<u64>,
        duration: Option<Duration>,
        pace: Option<Duration>,
        epoch: Instant,
        barrier: Arc<Barrier>,
        cancel: Cancel,
        counters: Arc<RunCounters>,
    ) -> Self {
        let capacity = budget.unwrap_or(1024).min(1 << 20) as usize;

        Self {
            transport,
            template,
            tokens,
            budget,
            duration,
            pace,
            epoch,
            barrier,
            cancel,
            counters,
            stats: StatsBuffer::with_capacity(capacity),
        }
    }

    /// Runs the request loop to completion and yields the outcome buffer.
    ///
    /// Called on this worker's own thread; the loop itself is async and
    /// driven by a current-thread runtime.
    pub fn run(mut self) -> StatsBuffer {
        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                log::error!("failed to build worker runtime: {err}");
                // Still cross the barrier, the other workers must not wait
                // for a dead peer.
                self.barrier.wait();
                return self.stats;
            }
        };

        self.barrier.wait();
        let deadline = self.duration.map(|v| Instant::now() + v);

        runtime.block_on(self.run_loop(deadline));

        self.stats
    }

    async fn run_loop(&mut self, deadline: Option<Instant>) {
        let mut next_at: Option<Instant> = None;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.budget == Some(0) {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }

            if let Some(at) = next_at {
                if Instant::now() < at {
                    tokio::time::sleep_until(at.into()).await;
                }
            }

            let began = Instant::now();
            if let Some(every) = self.pace {
                next_at = Some(began + every);
            }

            let token = match &mut self.tokens {
                Some(tokens) => match tokens.next() {
                    Some(token) => Some(token),
                    // Slice spent, this worker is done.
                    None => break,
                },
                None => None,
            };

            let begin_ns = began.duration_since(self.epoch).as_nanos() as u64;
            let sent = self.transport.send(&self.template, token).await;
            let end_ns = self.epoch.elapsed().as_nanos() as u64;

            match sent {
                Ok(code) => self.stats.on_success(begin_ns, end_ns, code, &self.counters),
                Err(kind) => self.stats.on_error(begin_ns, end_ns, kind, &self.counters),
            }

            if let Some(budget) = &mut self.budget {
                *budget -= 1;
            }
        }
    }
}
