/*!
Import/export orchestrator.

Drives the end-to-end package workflow: validates the source, opens the
archive, parses the manifest sections, creates the application record and
runs the sub-importers inside one transactional boundary, then materializes
files. The orchestrator is the single place that decides commit versus
rollback.

File placement runs after commit and outside rollback coverage: a failure
there surfaces to the caller but leaves the committed application, services,
schema, and data in place.
*/

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::archive::PackageArchive;
use crate::config::{PackagerConfig, PACKAGE_EXTENSION};
use crate::dispatch::ServiceDispatch;
use crate::error::{PackageError, Result};
use crate::files::{FileMaterializer, StorageRegistry};
use crate::importers::{DataImporter, SchemaImporter, ServicesImporter};
use crate::manifest::{self, DescriptorOverrides};
use crate::store::{AppRecord, AppStore};

/// Caller-supplied package source for an import.
#[derive(Debug, Clone)]
pub enum ImportSource {
    /// Uploaded file(s); exactly one package file is allowed
    Uploads(Vec<PathBuf>),
    /// Remote package to download
    Url(String),
}

/// Options for a package export.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Include the application's stored files (storage-backed apps only)
    pub include_files: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_files: true,
        }
    }
}

/// A completed export, staged in a temp file for streaming to the caller.
///
/// The backing temp file is removed when this value is dropped.
pub struct ExportedPackage {
    file_name: String,
    temp: NamedTempFile,
}

impl ExportedPackage {
    /// Download file name for the artifact (e.g. `acme.appkg`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Location of the staged archive.
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Read the full archive bytes.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.temp.path())?)
    }

    /// Copy the artifact to a final destination, then discard the temp file.
    pub fn persist_to(self, destination: &Path) -> Result<()> {
        std::fs::copy(self.temp.path(), destination).map_err(|e| {
            PackageError::internal(format!(
                "Failed to write package to {}: {e}",
                destination.display()
            ))
        })?;
        Ok(())
    }
}

/// Package import/export orchestrator.
pub struct Packager<'a> {
    store: &'a dyn AppStore,
    dispatch: &'a dyn ServiceDispatch,
    storage: &'a dyn StorageRegistry,
    config: PackagerConfig,
}

impl<'a> Packager<'a> {
    pub fn new(
        store: &'a dyn AppStore,
        dispatch: &'a dyn ServiceDispatch,
        storage: &'a dyn StorageRegistry,
        config: PackagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            dispatch,
            storage,
            config,
        })
    }

    /// Import an application and all its dependents from a package.
    ///
    /// The application record, service definitions, schema creation, and seed
    /// data share one transactional boundary: any fatal failure rolls all of
    /// them back and re-raises the original error. Returns the created
    /// application record.
    pub fn import(
        &self,
        source: ImportSource,
        overrides: &DescriptorOverrides,
    ) -> Result<AppRecord> {
        let operation_id = Uuid::new_v4();
        let span = info_span!("package_import", %operation_id);
        let _guard = span.enter();

        let mut archive = self.open_source(source)?;
        info!(
            package = archive.name(),
            entries = archive.len(),
            checksum = archive.checksum().unwrap_or(""),
            "package archive opened"
        );

        let mut descriptor = manifest::read_descriptor(&mut archive)?;
        overrides.apply(&mut descriptor);
        debug!(app = %descriptor.name, kind = ?descriptor.kind, "application descriptor read");

        // All sections are parsed up front; the archive then holds only
        // application files.
        let services = manifest::read_services(&mut archive)?;
        let schemas = manifest::read_schemas(&mut archive)?;
        let data = manifest::read_data(&mut archive)?;

        let transaction = self.store.begin()?;

        let app = self.store.create_app(&descriptor).map_err(|e| {
            PackageError::internal(format!("Could not create the application. {e}"))
        })?;
        debug!(app_id = app.id, "application record created");

        if let Some(services) = &services {
            let count = ServicesImporter::new(self.store).run(services)?;
            debug!(count, "services imported");
        }
        if let Some(schemas) = &schemas {
            SchemaImporter::new(self.dispatch, &self.config).run(schemas)?;
        }
        if let Some(data) = &data {
            DataImporter::new(self.dispatch, &self.config).run(data)?;
        }

        transaction.commit()?;

        // Outside the transactional boundary from here on.
        FileMaterializer::new(self.storage, self.store, &self.config)
            .store_application_files(&descriptor, &archive)?;

        info!(app_id = app.id, app = %app.descriptor.name, "package import committed");
        Ok(app)
    }

    /// Export an application's full definition as a package.
    pub fn export(&self, app_id: i64, options: &ExportOptions) -> Result<ExportedPackage> {
        let operation_id = Uuid::new_v4();
        let span = info_span!("package_export", %operation_id, app_id);
        let _guard = span.enter();

        let app = self.store.find_app(app_id)?.ok_or_else(|| {
            PackageError::not_found(format!("App not found in database with app id {app_id}"))
        })?;

        let file_name = format!("{}.{}", app.descriptor.name, PACKAGE_EXTENSION);
        let mut archive = PackageArchive::create(file_name.clone());

        let descriptor_json = serde_json::to_vec(&app.descriptor)?;
        archive.write_entry(manifest::DESCRIPTOR_ENTRY, descriptor_json);

        if app.descriptor.kind.is_storage_backed() && options.include_files {
            let added = FileMaterializer::new(self.storage, self.store, &self.config)
                .collect_application_files(&app.descriptor, &mut archive)?;
            debug!(added, "application files appended to package");
        }

        let temp = archive.write_to_temp(&self.config)?;
        info!(package = %file_name, entries = archive.len(), "package export staged");
        Ok(ExportedPackage { file_name, temp })
    }

    fn open_source(&self, source: ImportSource) -> Result<PackageArchive> {
        match source {
            ImportSource::Uploads(files) => {
                if files.len() != 1 {
                    return Err(PackageError::bad_request(
                        "Only a single application package file is allowed for import.",
                    ));
                }
                PackageArchive::open_upload(&files[0], &self.config)
            }
            ImportSource::Url(url) => PackageArchive::open_url(&url, &self.config),
        }
    }
}
