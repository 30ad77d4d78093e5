//! Certificate fact extraction.
//!
//! Turns a concatenated PEM bundle into [`CertificateFact`]s. Blocks that are
//! not certificates are ignored, certificates OpenSSL cannot parse are logged
//! and skipped, and a certificate whose key type cannot be measured rejects the
//! whole bundle.

use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKeyRef, Public};
use openssl::x509::{X509NameRef, X509Ref, X509};
use tracing::{debug, warn};

use crate::error::CertificateError;

/// PEM label of an X.509 certificate block.
pub const CERTIFICATE_TAG: &str = "CERTIFICATE";

const BEGIN_MARKER: &[u8] = b"-----BEGIN ";
const END_MARKER: &[u8] = b"-----END ";
const DASHES: &[u8] = b"-----";
const SECONDS_PER_DAY: i64 = 86_400;
const UNKNOWN_KEY_TYPE: &str = "unknown";

/// Public key kinds the exporter knows how to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// RSA key, sized by its modulus
    Rsa { bits: u32 },
    /// Elliptic-curve key, sized by the curve's field degree
    Ecdsa { bits: u32 },
}

impl KeyKind {
    /// Classifies `key`, refusing anything that is not RSA or EC.
    pub fn classify(key: &PKeyRef<Public>, serial_number: &str) -> Result<Self, CertificateError> {
        match key.id() {
            Id::RSA => Ok(KeyKind::Rsa {
                bits: key.rsa()?.n().num_bits().unsigned_abs(),
            }),
            Id::EC => Ok(KeyKind::Ecdsa {
                bits: key.ec_key()?.group().degree(),
            }),
            other => Err(CertificateError::UnsupportedKey {
                serial_number: serial_number.to_string(),
                key_type: key_type_name(other),
            }),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            KeyKind::Rsa { bits } | KeyKind::Ecdsa { bits } => bits,
        }
    }
}

fn key_type_name(id: Id) -> String {
    Nid::from_raw(id.as_raw())
        .short_name()
        .map(str::to_string)
        .unwrap_or_else(|_| format!("id {}", id.as_raw()))
}

/// Identity and validity facts of one certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateFact {
    pub serial_number: String,
    pub issuer: String,
    pub subject: String,
    pub signature_algorithm: String,
    pub key: KeyKind,
    /// Start of validity, seconds since the Unix epoch
    pub not_before: i64,
    /// End of validity, seconds since the Unix epoch
    pub not_after: i64,
}

impl CertificateFact {
    /// Reads the facts out of a parsed certificate.
    ///
    /// # Errors
    ///
    /// * `CertificateError::UnsupportedKey` - the key is neither RSA nor EC, or
    ///   its algorithm is not known at all
    /// * `CertificateError::OpenSsl` - a field could not be read
    pub fn from_x509(cert: &X509Ref) -> Result<Self, CertificateError> {
        let serial_number = cert.serial_number().to_bn()?.to_dec_str()?.to_string();
        // OpenSSL refuses to load keys of algorithms it does not know
        let public_key = cert
            .public_key()
            .map_err(|_| CertificateError::UnsupportedKey {
                serial_number: serial_number.clone(),
                key_type: UNKNOWN_KEY_TYPE.to_string(),
            })?;
        let key = KeyKind::classify(&public_key, &serial_number)?;

        Ok(CertificateFact {
            issuer: distinguished_name(cert.issuer_name()),
            subject: distinguished_name(cert.subject_name()),
            signature_algorithm: cert.signature_algorithm().object().to_string(),
            not_before: epoch_seconds(cert.not_before())?,
            not_after: epoch_seconds(cert.not_after())?,
            serial_number,
            key,
        })
    }

    /// Key length in bits.
    pub fn key_length(&self) -> u32 {
        self.key.bits()
    }
}

/// Formats a name as comma separated `KEY=value` pairs, most specific first.
fn distinguished_name(name: &X509NameRef) -> String {
    let mut parts: Vec<String> = name
        .entries()
        .map(|entry| {
            let object = entry.object();
            let key = object
                .nid()
                .short_name()
                .map(str::to_string)
                .unwrap_or_else(|_| object.to_string());
            let value = entry
                .data()
                .as_utf8()
                .map(|value| value.to_string())
                .unwrap_or_else(|_| String::from_utf8_lossy(entry.data().as_slice()).into_owned());
            format!("{}={}", key, escape_attribute_value(&value))
        })
        .collect();
    parts.reverse();
    parts.join(",")
}

fn escape_attribute_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut escaped = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == last && c == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn epoch_seconds(time: &Asn1TimeRef) -> Result<i64, ErrorStack> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    Ok(i64::from(diff.days) * SECONDS_PER_DAY + i64::from(diff.secs))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Iterator over the PEM blocks of a byte stream.
///
/// Yields `(index, block)` where `index` counts decoded blocks. A frame that
/// does not decode is skipped and scanning resumes just after its `BEGIN`
/// marker. The stream ends at the first `BEGIN` without a closing `END` line.
#[derive(Debug, Clone)]
pub struct PemBlocks<'a> {
    remaining: &'a [u8],
    decoded: usize,
}

impl<'a> PemBlocks<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PemBlocks {
            remaining: data,
            decoded: 0,
        }
    }
}

impl<'a> Iterator for PemBlocks<'a> {
    type Item = (usize, pem::Pem);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let begin = find(self.remaining, BEGIN_MARKER)?;
            let frame = &self.remaining[begin..];

            let frame_len = find(frame, END_MARKER).and_then(|end| {
                let label_start = end + END_MARKER.len();
                find(&frame[label_start..], DASHES).map(|close| label_start + close + DASHES.len())
            });
            let Some(frame_len) = frame_len else {
                self.remaining = &[];
                return None;
            };

            match pem::parse(&frame[..frame_len]) {
                Ok(block) => {
                    self.remaining = &frame[frame_len..];
                    let index = self.decoded;
                    self.decoded += 1;
                    return Some((index, block));
                }
                Err(err) => {
                    debug!(error = %err, "skipping undecodable PEM frame");
                    self.remaining = &frame[BEGIN_MARKER.len()..];
                }
            }
        }
    }
}

/// Lazily extracts certificate facts from a PEM bundle.
///
/// After yielding an error the iterator is exhausted.
#[derive(Debug, Clone)]
pub struct CertificateFacts<'a> {
    blocks: PemBlocks<'a>,
    rejected: bool,
}

impl<'a> Iterator for CertificateFacts<'a> {
    type Item = Result<CertificateFact, CertificateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rejected {
            return None;
        }
        loop {
            let (index, block) = self.blocks.next()?;
            if block.tag() != CERTIFICATE_TAG {
                debug!(block = index, tag = block.tag(), "ignoring non-certificate PEM block");
                continue;
            }

            let cert = match X509::from_der(block.contents()) {
                Ok(cert) => cert,
                Err(source) => {
                    let err = CertificateError::Malformed { index, source };
                    warn!(error = %err, "skipping certificate");
                    continue;
                }
            };

            match CertificateFact::from_x509(&cert) {
                Ok(fact) => return Some(Ok(fact)),
                Err(err @ CertificateError::UnsupportedKey { .. }) => {
                    self.rejected = true;
                    return Some(Err(err));
                }
                Err(err) => {
                    warn!(block = index, error = %err, "skipping certificate");
                }
            }
        }
    }
}

/// Extracts the certificate facts of a PEM bundle.
///
/// ```no_run
/// # use elb_trust_store_exporter::certificate::extract;
/// let bundle = std::fs::read("bundle.pem").unwrap();
/// let facts: Result<Vec<_>, _> = extract(&bundle).collect();
/// ```
pub fn extract(bundle: &[u8]) -> CertificateFacts<'_> {
    CertificateFacts {
        blocks: PemBlocks::new(bundle),
        rejected: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::x509::{X509Builder, X509NameBuilder};

    fn rsa_key(bits: u32) -> PKey<Private> {
        PKey::from_rsa(Rsa::generate(bits).unwrap()).unwrap()
    }

    fn ec_key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn self_signed(key: &PKey<Private>, serial: u32, common_name: &str) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "Example, Inc")
            .unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(key).unwrap();
        builder
            .set_not_before(&Asn1Time::from_unix(1_600_000_000).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::from_unix(1_900_000_000).unwrap())
            .unwrap();
        let digest = if key.id() == Id::ED25519 {
            MessageDigest::null()
        } else {
            MessageDigest::sha256()
        };
        builder.sign(key, digest).unwrap();
        builder.build()
    }

    fn pem_of(cert: &X509) -> Vec<u8> {
        cert.to_pem().unwrap()
    }

    #[test]
    fn test_rsa_certificate_facts() {
        let cert = self_signed(&rsa_key(2048), 4096, "Root CA");
        let facts: Vec<_> = extract(&pem_of(&cert)).collect::<Result<_, _>>().unwrap();

        assert_eq!(facts.len(), 1);
        let fact = &facts[0];
        assert_eq!(fact.serial_number, "4096");
        assert_eq!(fact.key, KeyKind::Rsa { bits: 2048 });
        assert_eq!(fact.key_length(), 2048);
        assert_eq!(fact.subject, "O=Example\\, Inc,CN=Root CA");
        assert_eq!(fact.issuer, fact.subject);
        assert_eq!(fact.signature_algorithm, "sha256WithRSAEncryption");
        assert_eq!(fact.not_before, 1_600_000_000);
        assert_eq!(fact.not_after, 1_900_000_000);
    }

    #[test]
    fn test_ec_certificate_key_length() {
        let cert = self_signed(&ec_key(), 1, "EC Root");
        let facts: Vec<_> = extract(&pem_of(&cert)).collect::<Result<_, _>>().unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].key, KeyKind::Ecdsa { bits: 256 });
        assert_eq!(facts[0].key_length().to_string(), "256");
    }

    #[test]
    fn test_non_certificate_blocks_are_ignored() {
        let key = rsa_key(2048);
        let mut bundle = pem_of(&self_signed(&key, 1, "First"));
        bundle.extend(key.private_key_to_pem_pkcs8().unwrap());
        bundle.extend(pem_of(&self_signed(&ec_key(), 2, "Second")));

        let facts: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();

        let serials: Vec<_> = facts.iter().map(|f| f.serial_number.as_str()).collect();
        assert_eq!(serials, vec!["1", "2"]);
    }

    #[test]
    fn test_malformed_certificate_is_skipped() {
        let mut bundle = pem::encode(&pem::Pem::new(CERTIFICATE_TAG, vec![0x30, 0x03, 0x01]))
            .into_bytes();
        bundle.extend(pem_of(&self_signed(&ec_key(), 9, "Good")));

        let facts: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].serial_number, "9");
    }

    #[test]
    fn test_unsupported_key_rejects_bundle() {
        let ed25519 = PKey::generate_ed25519().unwrap();
        let mut bundle = pem_of(&self_signed(&rsa_key(2048), 1, "Fine"));
        bundle.extend(pem_of(&self_signed(&ed25519, 2, "Edwards")));
        bundle.extend(pem_of(&self_signed(&ec_key(), 3, "Never reached")));

        let result: Result<Vec<_>, _> = extract(&bundle).collect();

        match result {
            Err(CertificateError::UnsupportedKey { serial_number, key_type }) => {
                assert_eq!(serial_number, "2");
                assert_eq!(key_type, "ED25519");
            }
            other => panic!("Expected UnsupportedKey, got {:?}", other),
        }
    }

    /// Re-labels the P-256 key as an unassigned `1.2.840.10045.2.9` algorithm.
    fn with_unknown_key_algorithm(cert: &X509) -> Vec<u8> {
        const EC_PUBLIC_KEY: &[u8] = &[0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
        let mut der = cert.to_der().unwrap();
        let at = find(&der, EC_PUBLIC_KEY).unwrap();
        der[at + EC_PUBLIC_KEY.len() - 1] = 0x09;
        pem::encode(&pem::Pem::new(CERTIFICATE_TAG, der)).into_bytes()
    }

    #[test]
    fn test_unknown_key_algorithm_rejects_bundle() {
        let mut bundle = pem_of(&self_signed(&rsa_key(2048), 1, "Fine"));
        bundle.extend(with_unknown_key_algorithm(&self_signed(&ec_key(), 7, "Mystery")));

        let result: Result<Vec<_>, _> = extract(&bundle).collect();

        match result {
            Err(CertificateError::UnsupportedKey { serial_number, key_type }) => {
                assert_eq!(serial_number, "7");
                assert_eq!(key_type, "unknown");
            }
            other => panic!("Expected UnsupportedKey, got {:?}", other),
        }
    }

    #[test]
    fn test_iterator_stops_after_rejection() {
        let ed25519 = PKey::generate_ed25519().unwrap();
        let mut bundle = pem_of(&self_signed(&ed25519, 1, "Edwards"));
        bundle.extend(pem_of(&self_signed(&ec_key(), 2, "After")));

        let mut facts = extract(&bundle);
        assert!(matches!(facts.next(), Some(Err(_))));
        assert!(facts.next().is_none());
    }

    #[test]
    fn test_trailing_garbage_is_tolerated() {
        let mut bundle = b"leading noise\n".to_vec();
        bundle.extend(pem_of(&self_signed(&ec_key(), 5, "Only")));
        bundle.extend(b"-----BEGIN CERTIFICATE-----\nMIIB".iter());

        let facts: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();

        assert_eq!(facts.len(), 1);
    }

    #[test]
    fn test_broken_frame_does_not_hide_next_block() {
        let mut bundle = b"-----BEGIN CERTIFICATE-----\n%%%%\n".to_vec();
        bundle.extend(pem_of(&self_signed(&ec_key(), 6, "Nested")));

        let facts: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].serial_number, "6");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let mut bundle = pem_of(&self_signed(&rsa_key(2048), 11, "A"));
        bundle.extend(pem_of(&self_signed(&ec_key(), 12, "B")));

        let first: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();
        let second: Vec<_> = extract(&bundle).collect::<Result<_, _>>().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(PemBlocks::new(b"").count(), 0);
        assert_eq!(extract(b"no pem here").count(), 0);
    }

    #[test]
    fn test_escape_attribute_value() {
        assert_eq!(escape_attribute_value("a,b"), "a\\,b");
        assert_eq!(escape_attribute_value("#lead"), "\\#lead");
        assert_eq!(escape_attribute_value(" pad "), "\\ pad\\ ");
        assert_eq!(escape_attribute_value("plain"), "plain");
    }
}
