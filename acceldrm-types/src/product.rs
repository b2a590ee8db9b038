//! Product identities and derived-product narrowing.
//!
//! The hardware reports a base product (`vendor/library/name`). A derived
//! product narrows it for sub-licensing: vendor and library must match and
//! the name must extend the base name with an optional suffix.

use crate::error::{DrmError, DrmResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Product identity as reported by the design ROM and sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId {
    pub vendor: String,
    pub library: String,
    pub name: String,
}

impl ProductId {
    /// Creates a product id from its three components.
    pub fn new(
        vendor: impl Into<String>,
        library: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            library: library.into(),
            name: name.into(),
        }
    }

    /// Parses a `vendor/library/name` string.
    pub fn parse(s: &str) -> DrmResult<Self> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        match parts.as_slice() {
            [vendor, library, name]
                if !vendor.is_empty() && !library.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(*vendor, *library, *name))
            }
            _ => Err(DrmError::BadArg(format!(
                "product id must be formatted as vendor/library/name, got {s:?}"
            ))),
        }
    }

    /// Validates `derived` against this base product and returns the narrowed id.
    ///
    /// # Errors
    ///
    /// Returns `BadArg` naming the first field that does not match.
    pub fn derive(&self, derived: &str) -> DrmResult<ProductId> {
        let candidate = Self::parse(derived)?;
        if candidate.vendor != self.vendor {
            return Err(DrmError::BadArg(format!(
                "derived product vendor '{}' does not match design vendor '{}'",
                candidate.vendor, self.vendor
            )));
        }
        if candidate.library != self.library {
            return Err(DrmError::BadArg(format!(
                "derived product library '{}' does not match design library '{}'",
                candidate.library, self.library
            )));
        }
        if !candidate.name.starts_with(&self.name) {
            return Err(DrmError::BadArg(format!(
                "derived product name '{}' does not extend design name '{}'",
                candidate.name, self.name
            )));
        }
        Ok(candidate)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vendor, self.library, self.name)
    }
}

/// Product information block stored in the design ROM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub product_id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkg_version: Option<String>,
}
