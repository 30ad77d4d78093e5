//! Helpers shared by the integration tests: throwaway certificates and an
//! in-memory trust store API.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder, X509};
use url::Url;

use elb_trust_store_exporter::trust_store::parse_location;
use elb_trust_store_exporter::{ApiConnector, ScrapeError, TrustStoreApi, TrustStoreRecord};

pub const REGION: &str = "ap-southeast-2";
pub const NOT_BEFORE: i64 = 1_600_000_000;
pub const NOT_AFTER: i64 = 1_900_000_000;

fn certificate_pem(key: &PKey<Private>, serial: u32, common_name: &str) -> Vec<u8> {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
    let name = name.build();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::from_unix(NOT_BEFORE).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::from_unix(NOT_AFTER).unwrap())
        .unwrap();
    let digest = if key.id() == Id::ED25519 {
        MessageDigest::null()
    } else {
        MessageDigest::sha256()
    };
    builder.sign(key, digest).unwrap();
    builder.build().to_pem().unwrap()
}

pub fn rsa_certificate(serial: u32, common_name: &str) -> Vec<u8> {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
    certificate_pem(&key, serial, common_name)
}

pub fn ec_certificate(serial: u32, common_name: &str) -> Vec<u8> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    certificate_pem(&key, serial, common_name)
}

/// P-256 certificate whose key algorithm OID is rewritten to an unassigned one.
pub fn unknown_key_certificate(serial: u32, common_name: &str) -> Vec<u8> {
    const EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
    let cert = X509::from_pem(&ec_certificate(serial, common_name)).unwrap();
    let mut der = cert.to_der().unwrap();
    let at = der
        .windows(EC_PUBLIC_KEY.len())
        .position(|window| window == EC_PUBLIC_KEY)
        .unwrap();
    der[at + EC_PUBLIC_KEY.len() - 1] = 0x09;
    pem::encode(&pem::Pem::new("CERTIFICATE", der)).into_bytes()
}

pub fn ed25519_certificate(serial: u32, common_name: &str) -> Vec<u8> {
    let key = PKey::generate_ed25519().unwrap();
    certificate_pem(&key, serial, common_name)
}

pub fn private_key_pem() -> Vec<u8> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    let key = PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap();
    key.private_key_to_pem_pkcs8().unwrap()
}

pub fn record(arn: &str, name: &str) -> TrustStoreRecord {
    TrustStoreRecord {
        arn: arn.to_string(),
        name: name.to_string(),
        ca_certificates: 2,
        revoked_entries: 5,
    }
}

/// Tracks how many cycles are inside the API at the same time.
#[derive(Debug, Default)]
pub struct Activity {
    active: AtomicUsize,
    max_active: AtomicUsize,
    connects: AtomicUsize,
}

impl Activity {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

/// In-memory stand-in for the Elastic Load Balancing API.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub fail_connect: bool,
    pub fail_list: bool,
    pub records: Vec<TrustStoreRecord>,
    /// Bundle location per trust store ARN
    pub locations: HashMap<String, String>,
    /// Time spent inside `connect`
    pub connect_delay: Duration,
    pub activity: Arc<Activity>,
}

impl FakeConnector {
    pub fn with_store(mut self, record: TrustStoreRecord, location: String) -> Self {
        self.locations.insert(record.arn.clone(), location);
        self.records.push(record);
        self
    }
}

#[async_trait]
impl ApiConnector for FakeConnector {
    async fn connect(&self, region: Option<&str>) -> Result<Box<dyn TrustStoreApi>, ScrapeError> {
        let activity = &self.activity;
        activity.connects.fetch_add(1, Ordering::SeqCst);
        let now_active = activity.active.fetch_add(1, Ordering::SeqCst) + 1;
        activity.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        activity.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_connect {
            return Err(ScrapeError::ConfigResolution {
                reason: "no credentials".to_string(),
            });
        }
        Ok(Box::new(FakeApi {
            region: region.unwrap_or(REGION).to_string(),
            connector: self.clone(),
        }))
    }
}

struct FakeApi {
    region: String,
    connector: FakeConnector,
}

#[async_trait]
impl TrustStoreApi for FakeApi {
    fn region(&self) -> &str {
        &self.region
    }

    async fn list_trust_stores(&self, arns: &[String]) -> Result<Vec<TrustStoreRecord>, ScrapeError> {
        if self.connector.fail_list {
            return Err(ScrapeError::Enumeration {
                reason: "AccessDenied".to_string(),
            });
        }
        Ok(self
            .connector
            .records
            .iter()
            .filter(|record| arns.is_empty() || arns.contains(&record.arn))
            .cloned()
            .collect())
    }

    async fn bundle_location(&self, arn: &str) -> Result<Url, ScrapeError> {
        let location = self
            .connector
            .locations
            .get(arn)
            .ok_or_else(|| ScrapeError::BundleLocation {
                trust_store_arn: arn.to_string(),
                reason: "TrustStoreNotFound".to_string(),
            })?;
        parse_location(arn, location)
    }
}
