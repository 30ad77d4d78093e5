//! Metric samples and snapshots.
//!
//! A refresh cycle produces a [`Snapshot`]: an ordered, immutable list of
//! [`MetricSample`]s. Every metric family has a fixed label schema, and samples
//! can only be built through the per-family constructors below, so a sample
//! never carries a label set that does not match its family.
//!
//! # Submodules
//!
//! - `prom` - publication of snapshots through a Prometheus registry

pub mod prom;

use strum_macros::EnumIter;

use crate::certificate::CertificateFact;
use crate::trust_store::TrustStoreRecord;

/// Prefix shared by every metric name.
pub const NAMESPACE: &str = "elb_trust_store";

const LABEL_TRUST_STORE_ARN: &str = "trust_store_arn";

/// The metric families the exporter publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum MetricKind {
    CollectorSuccess,
    CertificateInfo,
    CertificateNotBefore,
    CertificateExpiry,
    TrustStoreInfo,
    TrustStoreCertificates,
    TrustStoreRevokedEntries,
    ExporterLastScrapeTimestamp,
    ExporterScrapeDurationSeconds,
    ExporterScrapeInterval,
}

impl MetricKind {
    /// Middle component of the fully qualified name, possibly empty.
    pub fn subsystem(self) -> &'static str {
        match self {
            MetricKind::CertificateInfo
            | MetricKind::CertificateNotBefore
            | MetricKind::CertificateExpiry => "certificate",
            MetricKind::ExporterLastScrapeTimestamp
            | MetricKind::ExporterScrapeDurationSeconds
            | MetricKind::ExporterScrapeInterval => "exporter",
            _ => "",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MetricKind::CollectorSuccess => "collector_success",
            MetricKind::CertificateInfo | MetricKind::TrustStoreInfo => "info",
            MetricKind::CertificateNotBefore => "not_before",
            MetricKind::CertificateExpiry => "expiry",
            MetricKind::TrustStoreCertificates => "certificates",
            MetricKind::TrustStoreRevokedEntries => "revoked_entries",
            MetricKind::ExporterLastScrapeTimestamp => "last_scrape_timestamp",
            MetricKind::ExporterScrapeDurationSeconds => "scrape_duration_seconds",
            MetricKind::ExporterScrapeInterval => "scrape_interval",
        }
    }

    /// Fully qualified name, e.g. `elb_trust_store_certificate_expiry`.
    pub fn fq_name(self) -> String {
        [NAMESPACE, self.subsystem(), self.name()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn help(self) -> &'static str {
        match self {
            MetricKind::CollectorSuccess => "Was the last scrape of the collector successful.",
            MetricKind::CertificateInfo => "Information about a certificate in a trust store.",
            MetricKind::CertificateNotBefore => {
                "The timestamp of the start of the certificate's validity (in seconds since epoch)."
            }
            MetricKind::CertificateExpiry => {
                "The timestamp of the certificate's expiry (in seconds since epoch)."
            }
            MetricKind::TrustStoreInfo => "Information about the trust store.",
            MetricKind::TrustStoreCertificates => {
                "The number of CA certificates in the trust store."
            }
            MetricKind::TrustStoreRevokedEntries => {
                "The number of revoked entries in the trust store."
            }
            MetricKind::ExporterLastScrapeTimestamp => {
                "The timestamp of the last successful scrape of the AWS API."
            }
            MetricKind::ExporterScrapeDurationSeconds => {
                "The duration of the last scrape of the AWS API."
            }
            MetricKind::ExporterScrapeInterval => "The interval between scraping the AWS API.",
        }
    }

    /// Exact label schema of the family, in label value order.
    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            MetricKind::CertificateInfo => &[
                LABEL_TRUST_STORE_ARN,
                "serial_number",
                "issuer",
                "subject",
                "signature_algo",
                "key_length",
            ],
            MetricKind::CertificateNotBefore | MetricKind::CertificateExpiry => {
                &[LABEL_TRUST_STORE_ARN, "serial_number", "subject"]
            }
            MetricKind::TrustStoreInfo => &[LABEL_TRUST_STORE_ARN, "name", "region"],
            MetricKind::TrustStoreCertificates | MetricKind::TrustStoreRevokedEntries => {
                &[LABEL_TRUST_STORE_ARN]
            }
            MetricKind::CollectorSuccess
            | MetricKind::ExporterLastScrapeTimestamp
            | MetricKind::ExporterScrapeDurationSeconds
            | MetricKind::ExporterScrapeInterval => &[],
        }
    }

    /// Whether the family describes the exporter itself rather than a trust store.
    pub fn is_exporter_level(self) -> bool {
        self.label_names().is_empty()
    }
}

/// One gauge value with its label values.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    kind: MetricKind,
    label_values: Vec<String>,
    value: f64,
}

impl MetricSample {
    fn new(kind: MetricKind, label_values: Vec<String>, value: f64) -> Self {
        debug_assert_eq!(kind.label_names().len(), label_values.len());
        MetricSample {
            kind,
            label_values,
            value,
        }
    }

    pub fn collector_success(success: bool) -> Self {
        Self::new(
            MetricKind::CollectorSuccess,
            Vec::new(),
            if success { 1.0 } else { 0.0 },
        )
    }

    pub fn last_scrape_timestamp(epoch_seconds: u64) -> Self {
        Self::new(
            MetricKind::ExporterLastScrapeTimestamp,
            Vec::new(),
            epoch_seconds as f64,
        )
    }

    pub fn scrape_duration(seconds: f64) -> Self {
        Self::new(MetricKind::ExporterScrapeDurationSeconds, Vec::new(), seconds)
    }

    pub fn scrape_interval(seconds: f64) -> Self {
        Self::new(MetricKind::ExporterScrapeInterval, Vec::new(), seconds)
    }

    pub fn trust_store_info(record: &TrustStoreRecord, region: &str) -> Self {
        Self::new(
            MetricKind::TrustStoreInfo,
            vec![record.arn.clone(), record.name.clone(), region.to_string()],
            1.0,
        )
    }

    pub fn trust_store_certificates(record: &TrustStoreRecord) -> Self {
        Self::new(
            MetricKind::TrustStoreCertificates,
            vec![record.arn.clone()],
            record.ca_certificates as f64,
        )
    }

    pub fn trust_store_revoked_entries(record: &TrustStoreRecord) -> Self {
        Self::new(
            MetricKind::TrustStoreRevokedEntries,
            vec![record.arn.clone()],
            record.revoked_entries as f64,
        )
    }

    pub fn certificate_info(trust_store_arn: &str, fact: &CertificateFact) -> Self {
        Self::new(
            MetricKind::CertificateInfo,
            vec![
                trust_store_arn.to_string(),
                fact.serial_number.clone(),
                fact.issuer.clone(),
                fact.subject.clone(),
                fact.signature_algorithm.clone(),
                fact.key_length().to_string(),
            ],
            1.0,
        )
    }

    pub fn certificate_not_before(trust_store_arn: &str, fact: &CertificateFact) -> Self {
        Self::new(
            MetricKind::CertificateNotBefore,
            vec![
                trust_store_arn.to_string(),
                fact.serial_number.clone(),
                fact.subject.clone(),
            ],
            fact.not_before as f64,
        )
    }

    pub fn certificate_expiry(trust_store_arn: &str, fact: &CertificateFact) -> Self {
        Self::new(
            MetricKind::CertificateExpiry,
            vec![
                trust_store_arn.to_string(),
                fact.serial_number.clone(),
                fact.subject.clone(),
            ],
            fact.not_after as f64,
        )
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_values(&self) -> &[String] {
        &self.label_values
    }

    /// Value of the label called `name`, if the family has one.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels()
            .find(|(label, _)| *label == name)
            .map(|(_, value)| value)
    }

    /// `(label name, label value)` pairs in schema order.
    pub fn labels(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.kind
            .label_names()
            .iter()
            .copied()
            .zip(self.label_values.iter().map(String::as_str))
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// The complete, immutable result of one refresh cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    samples: Vec<MetricSample>,
}

impl Snapshot {
    pub fn new(samples: Vec<MetricSample>) -> Self {
        Snapshot { samples }
    }

    /// The snapshot served before the first cycle completes.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn of_kind(&self, kind: MetricKind) -> impl Iterator<Item = &MetricSample> + '_ {
        self.samples.iter().filter(move |sample| sample.kind == kind)
    }

    pub fn value_of(&self, kind: MetricKind) -> Option<f64> {
        self.of_kind(kind).next().map(MetricSample::value)
    }

    /// `collector_success` as a boolean; `false` before the first cycle.
    pub fn is_success(&self) -> bool {
        self.value_of(MetricKind::CollectorSuccess) == Some(1.0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
