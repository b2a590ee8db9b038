//! Node-locked licence files.
//!
//! A node-locked licence is requested once: the request is written next to
//! the licence it produces, and later engines load the stored licence without
//! contacting the service.

use acceldrm_types::{DrmError, DrmResult, ProductId};
use acceldrm_ws::{LicenseGrant, SessionRequest};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

/// Request and licence file locations for one design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLockedFiles {
    request_path: PathBuf,
    license_path: PathBuf,
}

impl NodeLockedFiles {
    /// Files named after the design identity inside `dir`.
    pub fn for_design(
        dir: &Path,
        product: Option<&ProductId>,
        udid: Option<&str>,
        vlnvs: &[String],
    ) -> Self {
        let mut hasher = Sha256::new();
        if let Some(product) = product {
            hasher.update(product.to_string().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(udid.unwrap_or_default().as_bytes());
        for vlnv in vlnvs {
            hasher.update(b"|");
            hasher.update(vlnv.as_bytes());
        }
        let stem = &hex::encode(hasher.finalize())[..16];
        Self {
            request_path: dir.join(format!("{stem}.req")),
            license_path: dir.join(format!("{stem}.lic")),
        }
    }

    #[must_use]
    pub fn request_path(&self) -> &Path {
        &self.request_path
    }

    #[must_use]
    pub fn license_path(&self) -> &Path {
        &self.license_path
    }

    /// Reads the stored licence, if one exists.
    pub fn read_license(&self) -> DrmResult<Option<LicenseGrant>> {
        if !self.license_path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.license_path).map_err(|e| {
            DrmError::ExternFail(format!(
                "cannot read licence file {}: {e}",
                self.license_path.display()
            ))
        })?;
        let grant = serde_json::from_str(&text).map_err(|e| {
            DrmError::BadFormat(format!(
                "invalid licence file {}: {e}",
                self.license_path.display()
            ))
        })?;
        info!("Loaded node-locked licence from {}", self.license_path.display());
        Ok(Some(grant))
    }

    pub fn write_request(&self, request: &SessionRequest) -> DrmResult<()> {
        write_json(&self.request_path, request)?;
        info!("Wrote node-locked request to {}", self.request_path.display());
        Ok(())
    }

    pub fn write_license(&self, grant: &LicenseGrant) -> DrmResult<()> {
        write_json(&self.license_path, grant)?;
        info!("Saved node-locked licence to {}", self.license_path.display());
        Ok(())
    }
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> DrmResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| {
            DrmError::ExternFail(format!("cannot create directory {}: {e}", dir.display()))
        })?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)
        .map_err(|e| DrmError::ExternFail(format!("cannot write {}: {e}", path.display())))
}
