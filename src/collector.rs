//! The refresh cycle.
//!
//! [`Scraper::run_cycle`] enumerates trust stores, downloads and decodes their
//! CA bundles and turns everything into a [`Snapshot`]. Failures never abort
//! the cycle beyond their own scope: configuration and enumeration problems
//! leave only the exporter samples, a broken trust store only drops its own
//! samples. Any failure clears `collector_success`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::time::timeout_at;
use tracing::{info, warn};

use crate::certificate;
use crate::error::ScrapeError;
use crate::metrics::{MetricSample, Snapshot};
use crate::trust_store::{ApiConnector, BundleFetcher, TrustStoreApi, TrustStoreRecord};

/// Overall time budget of one cycle.
pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(60);

/// What to scrape and how often.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeSettings {
    /// Explicit region, or `None` to auto-discover it
    pub region: Option<String>,
    /// Trust stores to restrict the scrape to; empty means all
    pub trust_store_arns: Vec<String>,
    pub interval: Duration,
    pub cycle_timeout: Duration,
}

impl ScrapeSettings {
    pub fn new(region: Option<String>, trust_store_arns: Vec<String>, interval: Duration) -> Self {
        ScrapeSettings {
            region,
            trust_store_arns,
            interval,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
        }
    }
}

/// Runs refresh cycles, one at a time.
pub struct Scraper {
    connector: Arc<dyn ApiConnector>,
    fetcher: BundleFetcher,
    settings: ScrapeSettings,
    running: Mutex<()>,
}

impl Scraper {
    pub fn new(
        connector: Arc<dyn ApiConnector>,
        fetcher: BundleFetcher,
        settings: ScrapeSettings,
    ) -> Self {
        Scraper {
            connector,
            fetcher,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    /// Runs one full cycle and returns its snapshot.
    ///
    /// Concurrent callers are serialized: a second call waits for the running
    /// cycle to finish before starting its own.
    pub async fn run_cycle(&self) -> Snapshot {
        let _running = self.running.lock().await;

        info!("Scraping trust stores");
        let started = Instant::now();
        let started_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        let deadline = tokio::time::Instant::now() + self.settings.cycle_timeout;

        let mut samples = Vec::new();
        let success = match self.collect(deadline, &mut samples).await {
            Ok(success) => success,
            Err(err) => {
                warn!(error = %err, "scrape aborted");
                false
            }
        };

        let duration = started.elapsed();
        samples.push(MetricSample::last_scrape_timestamp(started_at));
        samples.push(MetricSample::scrape_duration(duration.as_secs_f64()));
        samples.push(MetricSample::scrape_interval(
            self.settings.interval.as_secs_f64(),
        ));
        samples.push(MetricSample::collector_success(success));

        info!(
            success,
            samples = samples.len(),
            duration_ms = duration.as_millis() as u64,
            "scrape finished"
        );
        Snapshot::new(samples)
    }

    /// Collects trust store samples into `samples`.
    ///
    /// Returns `Err` for cycle fatal failures and `Ok(false)` when at least one
    /// trust store failed.
    async fn collect(
        &self,
        deadline: tokio::time::Instant,
        samples: &mut Vec<MetricSample>,
    ) -> Result<bool, ScrapeError> {
        let api = bounded(
            deadline,
            "resolving API configuration",
            self.connector.connect(self.settings.region.as_deref()),
        )
        .await?;

        let records = bounded(
            deadline,
            "describing trust stores",
            api.list_trust_stores(&self.settings.trust_store_arns),
        )
        .await?;
        info!(count = records.len(), region = api.region(), "found trust stores");

        let mut success = true;
        for record in &records {
            match self.collect_trust_store(deadline, api.as_ref(), record).await {
                Ok(trust_store_samples) => samples.extend(trust_store_samples),
                Err(err) => {
                    warn!(trust_store_arn = %record.arn, error = %err, "failed to collect trust store");
                    success = false;
                }
            }
        }
        Ok(success)
    }

    /// Builds every sample of one trust store, or nothing at all.
    async fn collect_trust_store(
        &self,
        deadline: tokio::time::Instant,
        api: &dyn TrustStoreApi,
        record: &TrustStoreRecord,
    ) -> Result<Vec<MetricSample>, ScrapeError> {
        let mut samples = vec![
            MetricSample::trust_store_info(record, api.region()),
            MetricSample::trust_store_certificates(record),
            MetricSample::trust_store_revoked_entries(record),
        ];

        let location = bounded(
            deadline,
            "resolving CA bundle location",
            api.bundle_location(&record.arn),
        )
        .await?;
        let bundle = bounded(deadline, "fetching CA bundle", self.fetcher.fetch(&location)).await?;

        for fact in certificate::extract(&bundle) {
            let fact = fact.map_err(|source| ScrapeError::Extraction {
                trust_store_arn: record.arn.clone(),
                source,
            })?;
            samples.push(MetricSample::certificate_info(&record.arn, &fact));
            samples.push(MetricSample::certificate_not_before(&record.arn, &fact));
            samples.push(MetricSample::certificate_expiry(&record.arn, &fact));
        }
        Ok(samples)
    }
}

/// Awaits `operation` unless the cycle deadline passes first.
async fn bounded<T, F>(
    deadline: tokio::time::Instant,
    operation: &str,
    future: F,
) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    match timeout_at(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(ScrapeError::Timeout {
            operation: operation.to_string(),
        }),
    }
}
