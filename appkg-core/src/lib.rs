/*!
# Application Package Engine

Core library for importing and exporting application packages on a
multi-tenant data-API platform.

A package is a zip container carrying an application's full definition:
its descriptor, dependent service definitions, database schema, seed data,
and static files. Importing reconstructs the application and all its
dependents inside one transactional boundary; exporting serializes an
existing application back into a portable archive.

## Architecture

The engine depends only on collaborator ports:
- [`AppStore`]: application/service persistence with explicit transactions
- [`ServiceDispatch`]: routes schema/data requests to their target services,
  returning classified failures
- [`StorageRegistry`]/[`FileStore`]: file-storage backends for application
  files

[`MemoryPlatform`] implements all three in memory for tests and local
tooling; [`LocalFolderStore`] is the bundled filesystem file-storage driver.

## Usage

```rust
use appkg_core::{
    DescriptorOverrides, ImportSource, MemoryPlatform, PackageArchive, Packager, PackagerConfig,
};
use std::fs;

let platform = MemoryPlatform::new();
let packager = Packager::new(&platform, &platform, &platform, PackagerConfig::default())?;

// Build a minimal package: a descriptor and nothing else.
let mut archive = PackageArchive::create("acme.appkg");
archive.write_entry("description.json", br#"{"name":"acme"}"#.to_vec());
let dir = tempfile::tempdir()?;
let path = dir.path().join("acme.appkg");
fs::write(&path, archive.finish()?)?;

let app = packager.import(
    ImportSource::Uploads(vec![path]),
    &DescriptorOverrides::default(),
)?;
assert_eq!(app.descriptor.name, "acme");
# Ok::<(), appkg_core::PackageError>(())
```
*/

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod files;
pub mod importers;
pub mod manifest;
pub mod memory;
pub mod packager;
pub mod store;

pub use archive::PackageArchive;
pub use config::{PackagerConfig, DEFAULT_STORAGE_FOLDER, PACKAGE_EXTENSION};
pub use dispatch::{DispatchError, FailureKind, ServiceDispatch, Verb};
pub use error::{PackageError, Result};
pub use files::{FileMaterializer, FileStore, LocalFolderStore, StorageRegistry};
pub use importers::{DataImporter, SchemaImporter, ServicesImporter};
pub use manifest::{
    AppDescriptor, AppKind, DataManifest, DescriptorOverrides, SchemaManifest, ServiceDefinition,
};
pub use memory::{DispatchedRequest, MemoryFileStore, MemoryPlatform};
pub use packager::{ExportOptions, ExportedPackage, ImportSource, Packager};
pub use store::{AppRecord, AppStore, ServiceRecord, Transaction, TransactionGuard};
