//! Trust store discovery and CA bundle download.
//!
//! [`ApiConnector`] and [`TrustStoreApi`] are the seams between the collector
//! and the Elastic Load Balancing API; [`AwsConnector`] is the production
//! implementation. [`BundleFetcher`] downloads the PEM bundle a trust store's
//! location points at.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_elasticloadbalancingv2::error::DisplayErrorContext;
use aws_sdk_elasticloadbalancingv2::types::TrustStore;
use aws_sdk_elasticloadbalancingv2::Client;
use tracing::debug;
use url::Url;

use crate::error::ScrapeError;

/// Trust store metadata as reported by the API for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustStoreRecord {
    pub arn: String,
    pub name: String,
    /// Number of CA certificates according to the API
    pub ca_certificates: u64,
    /// Number of revocation entries according to the API
    pub revoked_entries: u64,
}

/// Resolves API configuration and hands out a ready client.
#[async_trait]
pub trait ApiConnector: Send + Sync {
    /// Builds a client for `region`, or for the auto-discovered region when `None`.
    async fn connect(&self, region: Option<&str>) -> Result<Box<dyn TrustStoreApi>, ScrapeError>;
}

/// The trust store queries a cycle needs.
#[async_trait]
pub trait TrustStoreApi: Send + Sync {
    /// Region the client talks to.
    fn region(&self) -> &str;

    /// Lists trust stores, restricted to `arns` unless it is empty.
    async fn list_trust_stores(&self, arns: &[String]) -> Result<Vec<TrustStoreRecord>, ScrapeError>;

    /// Location of the CA certificate bundle of the trust store `arn`.
    async fn bundle_location(&self, arn: &str) -> Result<Url, ScrapeError>;
}

/// Connects to Elastic Load Balancing v2 using the default AWS credential chain.
#[derive(Debug, Clone, Default)]
pub struct AwsConnector;

#[async_trait]
impl ApiConnector for AwsConnector {
    async fn connect(&self, region: Option<&str>) -> Result<Box<dyn TrustStoreApi>, ScrapeError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;

        let region = config
            .region()
            .map(ToString::to_string)
            .ok_or_else(|| ScrapeError::ConfigResolution {
                reason: "no region configured and none could be discovered".to_string(),
            })?;
        debug!(region = %region, "resolved AWS configuration");

        Ok(Box::new(AwsTrustStoreApi {
            client: Client::new(&config),
            region,
        }))
    }
}

/// [`TrustStoreApi`] backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct AwsTrustStoreApi {
    client: Client,
    region: String,
}

impl AwsTrustStoreApi {
    fn record_from(trust_store: &TrustStore) -> Result<TrustStoreRecord, ScrapeError> {
        let arn = trust_store
            .trust_store_arn()
            .ok_or_else(|| ScrapeError::Enumeration {
                reason: "trust store without an ARN in response".to_string(),
            })?;

        Ok(TrustStoreRecord {
            arn: arn.to_string(),
            name: trust_store.name().unwrap_or_default().to_string(),
            ca_certificates: trust_store
                .number_of_ca_certificates()
                .map_or(0, |count| count.max(0) as u64),
            revoked_entries: trust_store
                .total_revoked_entries()
                .map_or(0, |count| count.max(0) as u64),
        })
    }
}

#[async_trait]
impl TrustStoreApi for AwsTrustStoreApi {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_trust_stores(&self, arns: &[String]) -> Result<Vec<TrustStoreRecord>, ScrapeError> {
        let filter = if arns.is_empty() {
            None
        } else {
            Some(arns.to_vec())
        };

        let mut records = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let page = self
                .client
                .describe_trust_stores()
                .set_trust_store_arns(filter.clone())
                .set_marker(marker.take())
                .send()
                .await
                .map_err(|err| ScrapeError::Enumeration {
                    reason: DisplayErrorContext(&err).to_string(),
                })?;

            for trust_store in page.trust_stores() {
                records.push(Self::record_from(trust_store)?);
            }

            match page.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(records)
    }

    async fn bundle_location(&self, arn: &str) -> Result<Url, ScrapeError> {
        let output = self
            .client
            .get_trust_store_ca_certificates_bundle()
            .trust_store_arn(arn)
            .send()
            .await
            .map_err(|err| ScrapeError::BundleLocation {
                trust_store_arn: arn.to_string(),
                reason: DisplayErrorContext(&err).to_string(),
            })?;

        let location = output.location().ok_or_else(|| ScrapeError::BundleLocation {
            trust_store_arn: arn.to_string(),
            reason: "response carries no location".to_string(),
        })?;
        parse_location(arn, location)
    }
}

/// Parses a bundle location, reporting failures against the trust store.
pub fn parse_location(trust_store_arn: &str, location: &str) -> Result<Url, ScrapeError> {
    Url::parse(location).map_err(|err| ScrapeError::BundleLocation {
        trust_store_arn: trust_store_arn.to_string(),
        reason: format!("invalid location: {}", err),
    })
}

/// Drops the query string, which for pre-signed locations carries credentials.
pub fn redacted(location: &Url) -> String {
    let mut location = location.clone();
    location.set_query(None);
    location.to_string()
}

/// Downloads CA bundles with a per-request timeout.
#[derive(Debug, Clone)]
pub struct BundleFetcher {
    client: reqwest::Client,
}

impl BundleFetcher {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(BundleFetcher { client })
    }

    /// GETs `location` and returns the body. Non-2xx statuses are errors.
    pub async fn fetch(&self, location: &Url) -> Result<Vec<u8>, ScrapeError> {
        let fetch_error = |source: reqwest::Error| ScrapeError::BundleFetch {
            url: redacted(location),
            source: source.without_url(),
        };

        let response = self
            .client
            .get(location.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_error)?;
        let body = response.bytes().await.map_err(fetch_error)?;
        Ok(body.to_vec())
    }
}
