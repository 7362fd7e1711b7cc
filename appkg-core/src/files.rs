/*!
Application file materialization.

Copies the non-manifest archive entries into the application's storage
backend on import, and the inverse (folder contents into the archive) on
export. File placement sits outside the transactional boundary: these writes
are never rolled back.

The storage backend itself is an external collaborator behind the
[`FileStore`] port; [`LocalFolderStore`] is the bundled local-filesystem
driver.
*/

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::archive::PackageArchive;
use crate::config::PackagerConfig;
use crate::error::{PackageError, Result};
use crate::manifest::AppDescriptor;
use crate::store::AppStore;

/// File-storage driver port.
pub trait FileStore {
    /// Extract all remaining archive entries into `container`/`folder`.
    /// Entry names starting with `prefix` have it stripped first.
    fn extract_archive(
        &self,
        container: &str,
        folder: &str,
        archive: &PackageArchive,
        prefix: &str,
    ) -> Result<()>;

    /// Append the contents of `container`/`folder` to the archive,
    /// recursively when `recurse` is set. Returns whether anything was added.
    fn folder_to_archive(
        &self,
        container: &str,
        folder: &str,
        archive: &mut PackageArchive,
        recurse: bool,
    ) -> Result<bool>;

    fn container_exists(&self, container: &str) -> Result<bool>;

    fn folder_exists(&self, container: &str, folder: &str) -> Result<bool>;
}

/// Resolves storage service ids to their file-storage drivers.
pub trait StorageRegistry {
    fn file_store_by_id(&self, id: i64) -> Option<Arc<dyn FileStore>>;
}

/// Where an application's files live, per the resolution rules.
enum FileTarget {
    /// A named container/folder shared by applications
    Folder(String),
    /// A per-application folder named after the app
    AppFolder(String),
}

/// Materializes archive files into storage and back.
pub struct FileMaterializer<'a> {
    registry: &'a dyn StorageRegistry,
    store: &'a dyn AppStore,
    config: &'a PackagerConfig,
}

impl<'a> FileMaterializer<'a> {
    pub fn new(
        registry: &'a dyn StorageRegistry,
        store: &'a dyn AppStore,
        config: &'a PackagerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Resolve the storage service: the descriptor's own reference wins,
    /// else the first service of the configured local-file kind.
    fn resolve_service(&self, explicit: Option<i64>) -> Result<(i64, Arc<dyn FileStore>)> {
        let id = match explicit {
            Some(id) => Some(id),
            None => self
                .store
                .first_service_id_of_kind(&self.config.local_service_kind)?,
        };
        let id = id.ok_or_else(|| {
            PackageError::internal("Can not find storage service identifier.")
        })?;
        let driver = self.registry.file_store_by_id(id).ok_or_else(|| {
            PackageError::internal(format!("Unknown storage service with id '{id}'."))
        })?;
        Ok((id, driver))
    }

    /// Effective destination: the descriptor's container if set, else the
    /// configured default folder, else a folder named after the application.
    /// An empty `storage_container` is treated the same as an absent one.
    fn resolve_target(&self, descriptor: &AppDescriptor) -> FileTarget {
        let container = descriptor
            .storage_container
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.config.default_storage_folder);
        if container.is_empty() {
            FileTarget::AppFolder(descriptor.name.clone())
        } else {
            FileTarget::Folder(container.to_string())
        }
    }

    /// Import direction: place all remaining archive entries into storage.
    ///
    /// Skipped entirely when no file entries remain.
    pub fn store_application_files(
        &self,
        descriptor: &AppDescriptor,
        archive: &PackageArchive,
    ) -> Result<()> {
        if archive.is_empty() {
            debug!(app = %descriptor.name, "package contains no application files");
            return Ok(());
        }

        let (id, driver) = self.resolve_service(descriptor.storage_service_id)?;
        match self.resolve_target(descriptor) {
            FileTarget::Folder(folder) => {
                debug!(app = %descriptor.name, storage_service = id, %folder, files = archive.len(), "storing application files");
                driver.extract_archive(&folder, "", archive, "")
            }
            FileTarget::AppFolder(app_name) => {
                let prefix = format!("{app_name}/");
                debug!(app = %descriptor.name, storage_service = id, files = archive.len(), "storing application files under app folder");
                driver.extract_archive(&app_name, "", archive, &prefix)
            }
        }
    }

    /// Export direction: append the application's stored files to the
    /// archive. Returns whether anything was added.
    pub fn collect_application_files(
        &self,
        descriptor: &AppDescriptor,
        archive: &mut PackageArchive,
    ) -> Result<bool> {
        let (id, driver) = self.resolve_service(descriptor.storage_service_id)?;
        let added = match self.resolve_target(descriptor) {
            FileTarget::Folder(folder) => {
                if driver.folder_exists(&folder, &descriptor.name)? {
                    driver.folder_to_archive(&folder, &descriptor.name, archive, true)?
                } else {
                    false
                }
            }
            FileTarget::AppFolder(app_name) => {
                if driver.container_exists(&app_name)? {
                    driver.folder_to_archive(&app_name, "", archive, true)?
                } else {
                    false
                }
            }
        };
        debug!(app = %descriptor.name, storage_service = id, added, "application files collected");
        Ok(added)
    }
}

/// Local-filesystem file-storage driver.
///
/// Containers are directories under a fixed root; folders are nested
/// directories within a container.
#[derive(Debug, Clone)]
pub struct LocalFolderStore {
    root: PathBuf,
}

impl LocalFolderStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn folder_path(&self, container: &str, folder: &str) -> PathBuf {
        let mut path = self.root.join(container);
        if !folder.is_empty() {
            path = path.join(folder);
        }
        path
    }

    fn append_dir(
        &self,
        dir: &Path,
        entry_prefix: &str,
        archive: &mut PackageArchive,
        recurse: bool,
        added: &mut bool,
    ) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|e| {
            PackageError::internal(format!("Failed to read folder {}: {e}", dir.display()))
        })?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let entry_name = if entry_prefix.is_empty() {
                name
            } else {
                format!("{entry_prefix}/{name}")
            };
            if path.is_dir() {
                if recurse {
                    self.append_dir(&path, &entry_name, archive, recurse, added)?;
                }
            } else {
                let data = fs::read(&path)?;
                archive.write_entry(entry_name, data);
                *added = true;
            }
        }
        Ok(())
    }
}

/// Reject entry names that would escape the destination folder.
fn safe_relative_path(name: &str) -> Result<&Path> {
    let path = Path::new(name);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(PackageError::internal(format!(
                    "Refusing to extract entry with unsafe path '{name}'"
                )))
            }
        }
    }
    Ok(path)
}

impl FileStore for LocalFolderStore {
    fn extract_archive(
        &self,
        container: &str,
        folder: &str,
        archive: &PackageArchive,
        prefix: &str,
    ) -> Result<()> {
        let base = self.folder_path(container, folder);
        for (name, data) in archive.entries() {
            let relative = name.strip_prefix(prefix).unwrap_or(name);
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let destination = base.join(safe_relative_path(relative)?);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    PackageError::internal(format!(
                        "Failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            fs::write(&destination, data).map_err(|e| {
                PackageError::internal(format!(
                    "Failed to write file {}: {e}",
                    destination.display()
                ))
            })?;
        }
        Ok(())
    }

    fn folder_to_archive(
        &self,
        container: &str,
        folder: &str,
        archive: &mut PackageArchive,
        recurse: bool,
    ) -> Result<bool> {
        let base = self.folder_path(container, folder);
        if !base.is_dir() {
            return Ok(false);
        }
        let mut added = false;
        self.append_dir(&base, folder, archive, recurse, &mut added)?;
        Ok(added)
    }

    fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self.root.join(container).is_dir())
    }

    fn folder_exists(&self, container: &str, folder: &str) -> Result<bool> {
        Ok(self.folder_path(container, folder).is_dir())
    }
}
