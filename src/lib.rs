//! Prometheus exporter for AWS Elastic Load Balancer trust stores.
//!
//! On a fixed interval the exporter lists the trust stores of a region,
//! downloads each trust store's CA bundle, extracts identity and validity facts
//! of every certificate and publishes the result as one consistent snapshot of
//! gauges.
//!
//! # Modules
//!
//! - [`certificate`] - PEM bundle decoding and certificate facts
//! - [`trust_store`] - trust store enumeration and bundle download
//! - [`collector`] - the refresh cycle
//! - [`metrics`] - samples, snapshots and their Prometheus publication
//! - [`scheduler`] - recurring refresh
//! - [`server`] - HTTP endpoints
//! - [`config`] - configuration file and CLI merging

pub mod certificate;
pub mod collector;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod trust_store;

pub use certificate::{extract, CertificateFact, KeyKind};
pub use collector::{ScrapeSettings, Scraper};
pub use error::{CertificateError, ScrapeError};
pub use metrics::prom::{ExporterRegistry, SnapshotHandle};
pub use metrics::{MetricKind, MetricSample, Snapshot};
pub use scheduler::Scheduler;
pub use trust_store::{ApiConnector, AwsConnector, BundleFetcher, TrustStoreApi, TrustStoreRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit the binary was built from, set through `ELB_EXPORTER_COMMIT`.
pub const COMMIT: &str = match option_env!("ELB_EXPORTER_COMMIT") {
    Some(commit) => commit,
    None => "none",
};

/// Build date, set through `ELB_EXPORTER_DATE`.
pub const BUILD_DATE: &str = match option_env!("ELB_EXPORTER_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// Builder identity, set through `ELB_EXPORTER_BUILT_BY`.
pub const BUILT_BY: &str = match option_env!("ELB_EXPORTER_BUILT_BY") {
    Some(built_by) => built_by,
    None => "unknown",
};
