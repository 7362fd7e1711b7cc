//! Configuration for the package engine.
//!
//! Platform-level knobs the engine needs: the payload wrapper key used by the
//! dispatch layer, the default storage folder for application files, the
//! service kind that identifies the fallback local-file storage service, and
//! an optional temp directory override for archive staging.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{PackageError, Result};

/// File extension required on every package source and artifact.
pub const PACKAGE_EXTENSION: &str = "appkg";

/// Default container for application files.
pub const DEFAULT_STORAGE_FOLDER: &str = "applications";

/// Default key wrapping resource collections in dispatch payloads.
pub const DEFAULT_RESOURCE_WRAPPER: &str = "resource";

/// Service kind tag identifying the fallback local-file storage service.
pub const LOCAL_FILE_SERVICE_KIND: &str = "local_file";

/// Configuration for package import/export operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagerConfig {
    /// Key wrapping resource collections in dispatch payloads
    pub resource_wrapper: String,
    /// Folder application files are placed in when the descriptor does not
    /// name one; when configured empty, files land under a folder named
    /// after the application instead
    pub default_storage_folder: String,
    /// Service kind used to find the fallback storage service
    pub local_service_kind: String,
    /// Directory for staging downloaded and exported archives
    /// (defaults to the system temp directory)
    pub temp_dir: Option<PathBuf>,
}

impl PackagerConfig {
    /// Set the temp directory used for archive staging
    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Set the resource wrapper key used in dispatch payloads
    pub fn with_resource_wrapper<S: Into<String>>(mut self, wrapper: S) -> Self {
        self.resource_wrapper = wrapper.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.resource_wrapper.is_empty() {
            return Err(PackageError::bad_request(
                "resource wrapper key must not be empty",
            ));
        }
        if self.local_service_kind.is_empty() {
            return Err(PackageError::bad_request(
                "local storage service kind must not be empty",
            ));
        }
        Ok(())
    }
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            resource_wrapper: DEFAULT_RESOURCE_WRAPPER.to_string(),
            default_storage_folder: DEFAULT_STORAGE_FOLDER.to_string(),
            local_service_kind: LOCAL_FILE_SERVICE_KIND.to_string(),
            temp_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PackagerConfig::default();
        assert_eq!(config.resource_wrapper, "resource");
        assert_eq!(config.default_storage_folder, "applications");
        assert_eq!(config.local_service_kind, "local_file");
        assert!(config.temp_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = PackagerConfig::default()
            .with_temp_dir("/tmp/packages")
            .with_resource_wrapper("records");
        assert_eq!(config.temp_dir, Some(PathBuf::from("/tmp/packages")));
        assert_eq!(config.resource_wrapper, "records");
    }

    #[test]
    fn test_validate_rejects_empty_wrapper() {
        let mut config = PackagerConfig::default();
        config.resource_wrapper = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_storage_folder_is_allowed() {
        // An empty default folder switches file placement to per-app folders.
        let mut config = PackagerConfig::default();
        config.default_storage_folder = String::new();
        assert!(config.validate().is_ok());
    }
}
