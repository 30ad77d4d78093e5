//! Recurring refresh.
//!
//! One background task owns the publish step: it runs a cycle, publishes the
//! snapshot and waits for the next tick. Cycles run inline in that task, so a
//! cycle that overruns the interval delays the next one instead of overlapping.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::debug;

use crate::collector::Scraper;
use crate::metrics::prom::SnapshotHandle;

pub struct Scheduler {
    scraper: Arc<Scraper>,
    handle: SnapshotHandle,
    interval: Duration,
}

impl Scheduler {
    pub fn new(scraper: Arc<Scraper>, handle: SnapshotHandle) -> Self {
        let interval = scraper.settings().interval;
        Scheduler {
            scraper,
            handle,
            interval,
        }
    }

    /// Runs one cycle and publishes its snapshot.
    pub async fn refresh(&self) {
        let snapshot = self.scraper.run_cycle().await;
        self.handle.publish(snapshot);
    }

    fn ticker(&self) -> Interval {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Refreshes on every tick, forever. The first refresh happens immediately.
    pub async fn run(self) {
        let ticker = self.ticker();
        self.tick_forever(ticker).await;
    }

    /// Refreshes once, then keeps refreshing on a background task.
    ///
    /// The initial snapshot is published before this returns, so the metrics
    /// endpoint never serves an empty snapshot once the server is up.
    pub async fn start(self) -> JoinHandle<()> {
        self.refresh().await;
        let mut ticker = self.ticker();
        // completes immediately, standing in for the refresh above
        ticker.tick().await;
        tokio::spawn(self.tick_forever(ticker))
    }

    async fn tick_forever(self, mut ticker: Interval) {
        loop {
            ticker.tick().await;
            self.refresh().await;
            debug!(
                interval_secs = self.interval.as_secs_f64(),
                "waiting for next refresh"
            );
        }
    }
}
