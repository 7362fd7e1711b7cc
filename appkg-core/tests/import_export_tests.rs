/*!
End-to-end import/export tests against the in-memory platform.
*/

use std::fs;
use std::path::PathBuf;

use appkg_core::{
    AppKind, DescriptorOverrides, ExportOptions, FailureKind, ImportSource, MemoryPlatform,
    PackageArchive, PackageError, Packager, PackagerConfig, ServiceDefinition,
};
use serde_json::json;
use tempfile::TempDir;

fn write_package(dir: &TempDir, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
    let mut archive = PackageArchive::create(name);
    for (entry, data) in entries {
        archive.write_entry(*entry, data.to_vec());
    }
    let path = dir.path().join(name);
    fs::write(&path, archive.finish().unwrap()).unwrap();
    path
}

fn service_definition(name: &str, kind: &str) -> ServiceDefinition {
    serde_json::from_value(json!({"name": name, "type": kind})).unwrap()
}

fn packager(platform: &MemoryPlatform) -> Packager<'_> {
    Packager::new(platform, platform, platform, PackagerConfig::default()).unwrap()
}

#[test]
fn descriptor_only_import_creates_exactly_one_app() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[("description.json", br#"{"name":"acme","type":"storage"}"#)],
    );

    let platform = MemoryPlatform::new();
    let app = packager(&platform)
        .import(
            ImportSource::Uploads(vec![path]),
            &DescriptorOverrides::default(),
        )
        .unwrap();

    assert_eq!(app.descriptor.name, "acme");
    assert_eq!(app.descriptor.kind, AppKind::Storage);
    assert_eq!(platform.apps().len(), 1);
    assert!(platform.services().is_empty());
    assert!(platform.requests().is_empty());
    assert!(platform.file_store().is_empty());
}

#[test]
fn caller_overrides_win_over_parsed_descriptor() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[(
            "description.json",
            br#"{"name":"acme","description":"from package"}"#,
        )],
    );

    let platform = MemoryPlatform::new();
    let overrides = DescriptorOverrides {
        name: Some("renamed".to_string()),
        is_active: Some(true),
        ..Default::default()
    };
    let app = packager(&platform)
        .import(ImportSource::Uploads(vec![path]), &overrides)
        .unwrap();

    assert_eq!(app.descriptor.name, "renamed");
    assert!(app.descriptor.is_active);
    assert_eq!(app.descriptor.description.as_deref(), Some("from package"));
}

#[test]
fn missing_descriptor_is_bad_request_and_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_package(&dir, "acme.appkg", &[("index.html", b"<html></html>")]);

    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    assert!(matches!(result, Err(PackageError::BadRequest(_))));
    assert!(platform.apps().is_empty());
}

#[test]
fn empty_schema_service_list_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            ("schema.json", br#"{"service":[]}"#),
        ],
    );

    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    assert!(matches!(result, Err(PackageError::BadRequest(_))));
    assert!(platform.apps().is_empty());
}

#[test]
fn multi_file_upload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let first = write_package(&dir, "a.appkg", &[("description.json", br#"{"name":"a"}"#)]);
    let second = write_package(&dir, "b.appkg", &[("description.json", br#"{"name":"b"}"#)]);

    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![first, second]),
        &DescriptorOverrides::default(),
    );

    assert!(matches!(result, Err(PackageError::BadRequest(_))));
}

#[test]
fn url_source_with_wrong_extension_is_rejected_before_download() {
    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Url("https://packages.test/acme.zip".to_string()),
        &DescriptorOverrides::default(),
    );
    assert!(matches!(result, Err(PackageError::BadRequest(_))));
}

#[test]
fn full_import_creates_services_schema_and_data() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            (
                "services.json",
                br#"[{"name":"db1","type":"mysql","config":{"host":"localhost"}}]"#,
            ),
            (
                "schema.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
            ),
            (
                "data.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets","record":[{"id":1},{"id":2}]}]}]}"#,
            ),
        ],
    );

    let platform = MemoryPlatform::new();
    let app = packager(&platform)
        .import(
            ImportSource::Uploads(vec![path]),
            &DescriptorOverrides::default(),
        )
        .unwrap();

    assert_eq!(app.descriptor.name, "acme");
    assert_eq!(platform.services().len(), 1);
    assert_eq!(platform.tables("db1"), ["widgets"]);
    assert_eq!(platform.table_rows("db1", "widgets").len(), 2);
    // Services were created through the store, not through dispatch.
    let dispatched: Vec<_> = platform
        .requests()
        .iter()
        .map(|r| r.resource.clone())
        .collect();
    assert_eq!(dispatched, ["_schema", "_table/widgets"]);
}

#[test]
fn schema_import_against_missing_service_rolls_everything_back() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            (
                "schema.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
            ),
        ],
    );

    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    let err = result.unwrap_err();
    assert_eq!(err.classification(), Some(FailureKind::NotFound));
    // The application record created earlier in the same import is gone.
    assert!(platform.apps().is_empty());
}

#[test]
fn fatal_data_failure_undoes_services_and_schema() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            ("services.json", br#"[{"name":"db1","type":"mysql"}]"#),
            (
                "schema.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
            ),
            (
                "data.json",
                br#"{"service":[{"name":"db2","table":[{"name":"widgets","record":[{"id":1}]}]}]}"#,
            ),
        ],
    );

    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    assert_eq!(
        result.unwrap_err().classification(),
        Some(FailureKind::NotFound)
    );
    assert!(platform.apps().is_empty());
    assert!(platform.services().is_empty());
    assert!(platform.tables("db1").is_empty());
}

#[test]
fn forced_internal_failure_on_an_existing_service_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            (
                "schema.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
            ),
        ],
    );

    let platform = MemoryPlatform::new();
    platform.insert_service(&service_definition("db1", "mysql"));
    platform.fail_dispatch("db1", FailureKind::Internal);

    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    assert_eq!(
        result.unwrap_err().classification(),
        Some(FailureKind::Internal)
    );
    assert!(platform.apps().is_empty());
}

#[test]
fn already_existing_schema_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme"}"#),
            (
                "schema.json",
                br#"{"service":[{"name":"db1","table":[{"name":"widgets"}]}]}"#,
            ),
        ],
    );

    let platform = MemoryPlatform::new();
    platform.insert_service(&service_definition("db1", "mysql"));
    platform.insert_table("db1", "widgets");

    let app = packager(&platform)
        .import(
            ImportSource::Uploads(vec![path]),
            &DescriptorOverrides::default(),
        )
        .unwrap();

    assert_eq!(app.descriptor.name, "acme");
    assert_eq!(platform.apps().len(), 1);
}

#[test]
fn file_entries_are_materialized_after_commit() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            (
                "description.json",
                br#"{"name":"acme","type":"storage"}"#,
            ),
            ("index.html", b"<html></html>"),
            ("assets/app.js", b"console.log('hi');"),
        ],
    );

    let platform = MemoryPlatform::new();
    platform.insert_service(&service_definition("files", "local_file"));

    packager(&platform)
        .import(
            ImportSource::Uploads(vec![path]),
            &DescriptorOverrides::default(),
        )
        .unwrap();

    let store = platform.file_store();
    assert_eq!(
        store.file("applications", "index.html"),
        Some(b"<html></html>".to_vec())
    );
    assert_eq!(
        store.file("applications", "assets/app.js"),
        Some(b"console.log('hi');".to_vec())
    );
}

#[test]
fn file_failure_after_commit_leaves_the_app_in_place() {
    let dir = TempDir::new().unwrap();
    let path = write_package(
        &dir,
        "acme.appkg",
        &[
            ("description.json", br#"{"name":"acme","type":"storage"}"#),
            ("index.html", b"<html></html>"),
        ],
    );

    // No storage service configured, so file placement cannot resolve one.
    let platform = MemoryPlatform::new();
    let result = packager(&platform).import(
        ImportSource::Uploads(vec![path]),
        &DescriptorOverrides::default(),
    );

    assert!(matches!(result, Err(PackageError::Internal(_))));
    // The transactional portion had already committed.
    assert_eq!(platform.apps().len(), 1);
    assert!(platform.file_store().is_empty());
}

#[test]
fn export_of_missing_app_is_not_found() {
    let platform = MemoryPlatform::new();
    let result = packager(&platform).export(42, &ExportOptions::default());
    assert!(matches!(result, Err(PackageError::NotFound(_))));
}

#[test]
fn export_of_non_storage_app_never_touches_file_storage() {
    // No storage service exists; resolution would fail if attempted.
    let platform = MemoryPlatform::new();
    let descriptor = serde_json::from_value(json!({"name": "acme", "type": "url"})).unwrap();
    let app = platform.insert_app(&descriptor);

    let exported = packager(&platform)
        .export(app.id, &ExportOptions::default())
        .unwrap();
    assert_eq!(exported.file_name(), "acme.appkg");
    assert!(exported.path().exists());
}

#[test]
fn export_skips_files_when_not_requested() {
    let platform = MemoryPlatform::new();
    let storage = platform.insert_service(&service_definition("files", "local_file"));
    platform
        .file_store()
        .put_file("applications", "acme/index.html", b"<html>".to_vec());
    let descriptor = serde_json::from_value(json!({
        "name": "acme",
        "type": "storage",
        "storage_service_id": storage.id
    }))
    .unwrap();
    let app = platform.insert_app(&descriptor);

    let exported = packager(&platform)
        .export(
            app.id,
            &ExportOptions {
                include_files: false,
            },
        )
        .unwrap();

    let bytes = exported.read_bytes().unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("acme.appkg");
    fs::write(&path, bytes).unwrap();
    let archive =
        PackageArchive::open_upload(&path, &PackagerConfig::default()).unwrap();
    assert_eq!(archive.entry_names(), ["description.json"]);
}

#[test]
fn export_then_import_roundtrips_the_descriptor_and_files() {
    let source = MemoryPlatform::new();
    let storage = source.insert_service(&service_definition("files", "local_file"));
    source
        .file_store()
        .put_file("applications", "acme/index.html", b"<html></html>".to_vec());
    source.file_store().put_file(
        "applications",
        "acme/assets/app.js",
        b"console.log('hi');".to_vec(),
    );
    let descriptor = serde_json::from_value(json!({
        "name": "acme",
        "description": "Acme storefront",
        "type": "storage",
        "is_active": true,
        "path": "/acme",
        "storage_service_id": storage.id
    }))
    .unwrap();
    let app = source.insert_app(&descriptor);

    let exported = packager(&source)
        .export(app.id, &ExportOptions::default())
        .unwrap();

    // Import the artifact into a fresh platform.
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(exported.file_name().to_string());
    exported.persist_to(&path).unwrap();

    let target = MemoryPlatform::new();
    target.insert_service(&service_definition("files", "local_file"));
    let overrides = DescriptorOverrides {
        description: Some("Imported copy".to_string()),
        storage_service_id: Some(1),
        ..Default::default()
    };
    let imported = packager(&target)
        .import(ImportSource::Uploads(vec![path]), &overrides)
        .unwrap();

    assert_eq!(imported.descriptor.name, "acme");
    assert_eq!(imported.descriptor.kind, AppKind::Storage);
    assert!(imported.descriptor.is_active);
    assert_eq!(imported.descriptor.path.as_deref(), Some("/acme"));
    // Override won over the exported description.
    assert_eq!(
        imported.descriptor.description.as_deref(),
        Some("Imported copy")
    );
    // Files came back under the same layout.
    let store = target.file_store();
    assert_eq!(
        store.file("applications", "acme/index.html"),
        Some(b"<html></html>".to_vec())
    );
    assert_eq!(
        store.file("applications", "acme/assets/app.js"),
        Some(b"console.log('hi');".to_vec())
    );
}

#[test]
fn exported_temp_file_is_removed_on_drop() {
    let platform = MemoryPlatform::new();
    let descriptor = serde_json::from_value(json!({"name": "acme"})).unwrap();
    let app = platform.insert_app(&descriptor);

    let exported = packager(&platform)
        .export(app.id, &ExportOptions::default())
        .unwrap();
    let temp_path = exported.path().to_path_buf();
    assert!(temp_path.exists());
    drop(exported);
    assert!(!temp_path.exists());
}
