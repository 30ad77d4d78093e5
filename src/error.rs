//! Error types for trust store scraping.
//!
//! Two layers of failure exist during a refresh cycle: problems with a single
//! certificate inside a bundle ([`CertificateError`]) and problems with the
//! cycle or one of its trust stores ([`ScrapeError`]). Neither ever terminates
//! the process; they are logged and folded into the `collector_success` gauge.

use thiserror::Error;

/// Error raised while decoding or characterizing a certificate.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// A `CERTIFICATE` PEM block whose payload is not a valid X.509 structure
    #[error("malformed certificate in PEM block #{index}: {source}")]
    Malformed {
        /// Zero-based position of the PEM block in the bundle
        index: usize,
        /// The underlying OpenSSL error
        #[source]
        source: openssl::error::ErrorStack,
    },

    /// The certificate carries a public key that is neither RSA nor ECDSA
    #[error("unsupported public key type {key_type} in certificate {serial_number}")]
    UnsupportedKey {
        /// Serial number of the offending certificate
        serial_number: String,
        /// OpenSSL's name for the key type
        key_type: String,
    },

    /// OpenSSL failed while reading fields of an already parsed certificate
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

/// Error raised during a refresh cycle.
///
/// `ConfigResolution` and `Enumeration` abort the cycle, as does a `Timeout`
/// while connecting or listing. Every other failure is scoped to one trust
/// store.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The API client configuration (credentials, region) could not be resolved
    #[error("failed to resolve API configuration: {reason}")]
    ConfigResolution {
        /// Description of what went wrong
        reason: String,
    },

    /// Listing trust stores failed
    #[error("failed to describe trust stores: {reason}")]
    Enumeration {
        /// Description of what went wrong
        reason: String,
    },

    /// Resolving the bundle location of a trust store failed
    #[error("failed to resolve CA bundle location for {trust_store_arn}: {reason}")]
    BundleLocation {
        /// The trust store whose bundle could not be located
        trust_store_arn: String,
        /// Description of what went wrong
        reason: String,
    },

    /// Downloading a CA bundle failed
    #[error("failed to fetch CA bundle from {url}: {source}")]
    BundleFetch {
        /// Location the bundle was fetched from
        url: String,
        /// The underlying HTTP error
        #[source]
        source: reqwest::Error,
    },

    /// The bundle was downloaded but could not be characterized
    #[error("failed to extract certificates of {trust_store_arn}: {source}")]
    Extraction {
        /// The trust store whose bundle was rejected
        trust_store_arn: String,
        /// The certificate level cause
        #[source]
        source: CertificateError,
    },

    /// The cycle budget ran out before the operation completed
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of which operation timed out
        operation: String,
    },
}
