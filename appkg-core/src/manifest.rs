/*!
Manifest reader: decodes the structured sections of a package archive.

Every section except the application descriptor is optional. Each reader
consumes its entry (read, then delete) so a second read within the same
import pass sees the section as absent.
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::archive::PackageArchive;
use crate::error::{PackageError, Result};

/// Application descriptor entry name.
pub const DESCRIPTOR_ENTRY: &str = "description.json";
/// Legacy descriptor entry name, still accepted on import.
pub const LEGACY_DESCRIPTOR_ENTRY: &str = "app.json";
/// Service definitions entry name.
pub const SERVICES_ENTRY: &str = "services.json";
/// Schema definitions entry name.
pub const SCHEMA_ENTRY: &str = "schema.json";
/// Seed data entry name.
pub const DATA_ENTRY: &str = "data.json";

/// Application behavior tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    /// No launch target
    #[default]
    None,
    /// Served from files in a storage service
    Storage,
    /// Served from a path on the platform host
    Path,
    /// Served from a remote URL
    Url,
}

impl AppKind {
    /// Whether this application keeps its files in a storage service.
    pub fn is_storage_backed(&self) -> bool {
        matches!(self, AppKind::Storage)
    }
}

/// The canonical record for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDescriptor {
    /// Application name, unique within a tenant
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(rename = "type", default)]
    pub kind: AppKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub requires_fullscreen: bool,
    #[serde(default)]
    pub allow_fullscreen_toggle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toggle_location: Option<String>,
    /// Storage service holding this application's files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_service_id: Option<i64>,
    /// Container/folder name within the storage service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_container: Option<String>,
}

impl AppDescriptor {
    /// Decode a descriptor from raw JSON, normalizing the name field.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: RawDescriptor = serde_json::from_slice(data)
            .map_err(|e| PackageError::bad_request(format!("Invalid application descriptor: {e}")))?;
        raw.normalize()
    }
}

/// Raw descriptor as found in a package; the application name may appear
/// under either `api_name` or `name`, with `api_name` winning.
#[derive(Debug, Deserialize)]
struct RawDescriptor {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    api_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    is_active: bool,
    #[serde(rename = "type", default)]
    kind: AppKind,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    requires_fullscreen: bool,
    #[serde(default)]
    allow_fullscreen_toggle: bool,
    #[serde(default)]
    toggle_location: Option<String>,
    #[serde(default)]
    storage_service_id: Option<i64>,
    #[serde(default)]
    storage_container: Option<String>,
}

impl RawDescriptor {
    fn normalize(self) -> Result<AppDescriptor> {
        let name = self
            .api_name
            .or(self.name)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PackageError::bad_request("No application name in the package description.")
            })?;
        Ok(AppDescriptor {
            name,
            description: self.description,
            is_active: self.is_active,
            kind: self.kind,
            path: self.path,
            url: self.url,
            requires_fullscreen: self.requires_fullscreen,
            allow_fullscreen_toggle: self.allow_fullscreen_toggle,
            toggle_location: self.toggle_location,
            storage_service_id: self.storage_service_id,
            storage_container: self.storage_container,
        })
    }
}

/// Caller-supplied descriptor overrides; every set field wins over the
/// value parsed from the package.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorOverrides {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(rename = "type", default)]
    pub kind: Option<AppKind>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub requires_fullscreen: Option<bool>,
    #[serde(default)]
    pub allow_fullscreen_toggle: Option<bool>,
    #[serde(default)]
    pub toggle_location: Option<String>,
    #[serde(default)]
    pub storage_service_id: Option<i64>,
    #[serde(default)]
    pub storage_container: Option<String>,
}

impl DescriptorOverrides {
    /// Merge these overrides over a parsed descriptor, field by field.
    pub fn apply(&self, descriptor: &mut AppDescriptor) {
        if let Some(name) = &self.name {
            descriptor.name = name.clone();
        }
        if let Some(description) = &self.description {
            descriptor.description = Some(description.clone());
        }
        if let Some(is_active) = self.is_active {
            descriptor.is_active = is_active;
        }
        if let Some(kind) = self.kind {
            descriptor.kind = kind;
        }
        if let Some(path) = &self.path {
            descriptor.path = Some(path.clone());
        }
        if let Some(url) = &self.url {
            descriptor.url = Some(url.clone());
        }
        if let Some(requires_fullscreen) = self.requires_fullscreen {
            descriptor.requires_fullscreen = requires_fullscreen;
        }
        if let Some(allow_fullscreen_toggle) = self.allow_fullscreen_toggle {
            descriptor.allow_fullscreen_toggle = allow_fullscreen_toggle;
        }
        if let Some(toggle_location) = &self.toggle_location {
            descriptor.toggle_location = Some(toggle_location.clone());
        }
        if let Some(storage_service_id) = self.storage_service_id {
            descriptor.storage_service_id = Some(storage_service_id);
        }
        if let Some(storage_container) = &self.storage_container {
            descriptor.storage_container = Some(storage_container.clone());
        }
    }
}

/// A named backend service carried in the package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Service kind tag (e.g. `local_file`, `mysql`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque service configuration blob
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

fn default_active() -> bool {
    true
}

/// Per-service table definitions from the `schema.json` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaManifest {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceSchemas>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSchemas {
    pub name: String,
    /// Opaque table definitions, submitted as one batch
    #[serde(rename = "table", default)]
    pub tables: Vec<Value>,
}

/// Per-service, per-table seed records from the `data.json` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataManifest {
    #[serde(rename = "service", default)]
    pub services: Vec<ServiceData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceData {
    pub name: String,
    #[serde(rename = "table", default)]
    pub tables: Vec<TableData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub name: String,
    #[serde(rename = "record", default)]
    pub records: Vec<Value>,
}

/// Read and consume the application descriptor.
///
/// Prefers `description.json`, falls back to the legacy `app.json`; both
/// entry names are deleted once the descriptor has been read. Fails with
/// `BadRequest` when neither entry exists.
pub fn read_descriptor(archive: &mut PackageArchive) -> Result<AppDescriptor> {
    let data = archive
        .read_entry(DESCRIPTOR_ENTRY)
        .or_else(|| archive.read_entry(LEGACY_DESCRIPTOR_ENTRY))
        .map(<[u8]>::to_vec);
    archive.delete_entry(DESCRIPTOR_ENTRY);
    archive.delete_entry(LEGACY_DESCRIPTOR_ENTRY);

    let data = data.ok_or_else(|| {
        PackageError::bad_request("No application description file in this package file.")
    })?;
    AppDescriptor::from_json(&data)
}

/// Read and consume the `services.json` section, if present.
pub fn read_services(archive: &mut PackageArchive) -> Result<Option<Vec<ServiceDefinition>>> {
    let Some(data) = take_entry(archive, SERVICES_ENTRY) else {
        return Ok(None);
    };
    let services: Vec<ServiceDefinition> = serde_json::from_slice(&data)
        .map_err(|e| PackageError::bad_request(format!("Invalid {SERVICES_ENTRY}: {e}")))?;
    debug!(count = services.len(), "service definitions read");
    Ok(Some(services))
}

/// Read and consume the `schema.json` section, if present.
///
/// Fails with `BadRequest` when the section exists but names no services.
pub fn read_schemas(archive: &mut PackageArchive) -> Result<Option<SchemaManifest>> {
    let Some(data) = take_entry(archive, SCHEMA_ENTRY) else {
        return Ok(None);
    };
    let manifest: SchemaManifest = serde_json::from_slice(&data)
        .map_err(|e| PackageError::bad_request(format!("Invalid {SCHEMA_ENTRY}: {e}")))?;
    if manifest.services.is_empty() {
        return Err(PackageError::bad_request(
            "Could not create the database tables for this application. \
             Database service or schema not found in schema.json.",
        ));
    }
    Ok(Some(manifest))
}

/// Read and consume the `data.json` section, if present.
///
/// Fails with `BadRequest` when the section exists but names no services.
pub fn read_data(archive: &mut PackageArchive) -> Result<Option<DataManifest>> {
    let Some(data) = take_entry(archive, DATA_ENTRY) else {
        return Ok(None);
    };
    let manifest: DataManifest = serde_json::from_slice(&data)
        .map_err(|e| PackageError::bad_request(format!("Invalid {DATA_ENTRY}: {e}")))?;
    if manifest.services.is_empty() {
        return Err(PackageError::bad_request(
            "Could not insert the seed data for this application. \
             Database service or data not found in data.json.",
        ));
    }
    Ok(Some(manifest))
}

fn take_entry(archive: &mut PackageArchive, name: &str) -> Option<Vec<u8>> {
    let data = archive.read_entry(name).map(<[u8]>::to_vec);
    archive.delete_entry(name);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_with(entries: &[(&str, &str)]) -> PackageArchive {
        let mut archive = PackageArchive::create("test.appkg");
        for (name, data) in entries {
            archive.write_entry(*name, data.as_bytes().to_vec());
        }
        archive
    }

    #[test]
    fn test_descriptor_from_description_json() {
        let mut archive = archive_with(&[(
            DESCRIPTOR_ENTRY,
            r#"{"name":"acme","type":"storage","description":"Acme app"}"#,
        )]);
        let descriptor = read_descriptor(&mut archive).unwrap();
        assert_eq!(descriptor.name, "acme");
        assert_eq!(descriptor.kind, AppKind::Storage);
        assert_eq!(descriptor.description.as_deref(), Some("Acme app"));
        assert!(!descriptor.is_active);
        // Entry consumed.
        assert!(archive.read_entry(DESCRIPTOR_ENTRY).is_none());
    }

    #[test]
    fn test_descriptor_legacy_fallback() {
        let mut archive = archive_with(&[(LEGACY_DESCRIPTOR_ENTRY, r#"{"name":"legacy"}"#)]);
        let descriptor = read_descriptor(&mut archive).unwrap();
        assert_eq!(descriptor.name, "legacy");
        assert!(archive.read_entry(LEGACY_DESCRIPTOR_ENTRY).is_none());
    }

    #[test]
    fn test_descriptor_prefers_description_json() {
        let mut archive = archive_with(&[
            (DESCRIPTOR_ENTRY, r#"{"name":"new"}"#),
            (LEGACY_DESCRIPTOR_ENTRY, r#"{"name":"old"}"#),
        ]);
        let descriptor = read_descriptor(&mut archive).unwrap();
        assert_eq!(descriptor.name, "new");
        // Both entry names are consumed.
        assert!(archive.is_empty());
    }

    #[test]
    fn test_descriptor_api_name_wins() {
        let mut archive = archive_with(&[(
            DESCRIPTOR_ENTRY,
            r#"{"api_name":"api","name":"display"}"#,
        )]);
        let descriptor = read_descriptor(&mut archive).unwrap();
        assert_eq!(descriptor.name, "api");
    }

    #[test]
    fn test_descriptor_missing_is_bad_request() {
        let mut archive = archive_with(&[("index.html", "<html></html>")]);
        let result = read_descriptor(&mut archive);
        assert!(matches!(result, Err(PackageError::BadRequest(_))));
    }

    #[test]
    fn test_descriptor_without_name_is_bad_request() {
        let mut archive = archive_with(&[(DESCRIPTOR_ENTRY, r#"{"description":"x"}"#)]);
        let result = read_descriptor(&mut archive);
        assert!(matches!(result, Err(PackageError::BadRequest(_))));
    }

    #[test]
    fn test_overrides_win_per_field() {
        let mut descriptor = AppDescriptor::from_json(
            br#"{"name":"acme","type":"storage","description":"original"}"#,
        )
        .unwrap();
        let overrides = DescriptorOverrides {
            name: Some("renamed".to_string()),
            is_active: Some(true),
            ..Default::default()
        };
        overrides.apply(&mut descriptor);
        assert_eq!(descriptor.name, "renamed");
        assert!(descriptor.is_active);
        // Untouched fields keep the parsed values.
        assert_eq!(descriptor.kind, AppKind::Storage);
        assert_eq!(descriptor.description.as_deref(), Some("original"));
    }

    #[test]
    fn test_services_absent_is_ok() {
        let mut archive = archive_with(&[]);
        assert!(read_services(&mut archive).unwrap().is_none());
    }

    #[test]
    fn test_services_read_once() {
        let mut archive = archive_with(&[(
            SERVICES_ENTRY,
            r#"[{"name":"db1","type":"mysql","config":{"host":"localhost"}}]"#,
        )]);
        let services = read_services(&mut archive).unwrap().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "db1");
        assert_eq!(services[0].kind, "mysql");
        assert!(services[0].is_active);
        // A second read sees the section as absent.
        assert!(read_services(&mut archive).unwrap().is_none());
    }

    #[test]
    fn test_schema_section() {
        let mut archive = archive_with(&[(
            SCHEMA_ENTRY,
            r#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
        )]);
        let manifest = read_schemas(&mut archive).unwrap().unwrap();
        assert_eq!(manifest.services.len(), 1);
        assert_eq!(manifest.services[0].name, "db1");
        assert_eq!(manifest.services[0].tables.len(), 1);
    }

    #[test]
    fn test_empty_schema_section_is_bad_request() {
        let mut archive = archive_with(&[(SCHEMA_ENTRY, r#"{"service":[]}"#)]);
        assert!(matches!(
            read_schemas(&mut archive),
            Err(PackageError::BadRequest(_))
        ));

        let mut archive = archive_with(&[(SCHEMA_ENTRY, r#"{}"#)]);
        assert!(matches!(
            read_schemas(&mut archive),
            Err(PackageError::BadRequest(_))
        ));
    }

    #[test]
    fn test_data_section() {
        let mut archive = archive_with(&[(
            DATA_ENTRY,
            r#"{"service":[{"name":"db1","table":[{"name":"widgets","record":[{"id":1}]}]}]}"#,
        )]);
        let manifest = read_data(&mut archive).unwrap().unwrap();
        assert_eq!(manifest.services[0].tables[0].name, "widgets");
        assert_eq!(manifest.services[0].tables[0].records.len(), 1);
    }

    #[test]
    fn test_empty_data_section_is_bad_request() {
        let mut archive = archive_with(&[(DATA_ENTRY, r#"{"service":[]}"#)]);
        assert!(matches!(
            read_data(&mut archive),
            Err(PackageError::BadRequest(_))
        ));
    }

    #[test]
    fn test_descriptor_serialization_roundtrip() {
        let descriptor = AppDescriptor::from_json(
            br#"{"name":"acme","type":"url","url":"https://acme.test","is_active":true}"#,
        )
        .unwrap();
        let json = serde_json::to_vec(&descriptor).unwrap();
        let parsed = AppDescriptor::from_json(&json).unwrap();
        assert_eq!(parsed, descriptor);
    }
}
