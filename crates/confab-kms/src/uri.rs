//! Key URIs.

use std::fmt;

use crate::error::KmsError;

/// A key URI of the form `scheme://domain/path`.
///
/// All three parts must be non-empty. Validation happens before any network
/// I/O so that malformed URIs never reach the KMS.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyUri {
    raw: String,
    scheme_len: usize,
    domain_end: usize,
}

impl KeyUri {
    /// Parse and validate a key URI.
    ///
    /// # Errors
    ///
    /// - `InvalidUri` if the scheme, domain, or path is missing
    pub fn parse(uri: &str) -> Result<Self, KmsError> {
        let invalid = |reason: &str| KmsError::InvalidUri {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("empty scheme"));
        }

        let (domain, path) = rest.split_once('/').ok_or_else(|| invalid("missing path"))?;
        if domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self {
            raw: uri.to_string(),
            scheme_len: scheme.len(),
            domain_end: scheme.len() + 3 + domain.len(),
        })
    }

    /// URI scheme, e.g. `kms`.
    pub fn scheme(&self) -> &str {
        &self.raw[..self.scheme_len]
    }

    /// Authority, e.g. `kms-cisco.example.com`.
    pub fn domain(&self) -> &str {
        &self.raw[self.scheme_len + 3..self.domain_end]
    }

    /// Path without the leading slash.
    pub fn path(&self) -> &str {
        &self.raw[self.domain_end + 1..]
    }

    /// The URI as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for KeyUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
