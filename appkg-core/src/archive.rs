/*!
Package archive accessor.

A package is a zip container holding an application descriptor plus optional
service/schema/data sections and arbitrary application files. The whole entry
table is loaded into memory when the archive is opened; consumers read an
entry and then delete it, so no section can be processed twice within one
import pass.

Backing temp files (downloaded packages, export staging) are owned by the
archive or the export result and removed when that owner is dropped, on every
exit path.
*/

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;
use zip::write::SimpleFileOptions;

use crate::config::{PackagerConfig, PACKAGE_EXTENSION};
use crate::error::{PackageError, Result};

#[derive(Debug, Clone)]
struct ArchiveEntry {
    name: String,
    data: Vec<u8>,
}

/// An open package archive.
///
/// Mutable during construction (export) or consumption (import); owned
/// exclusively by the orchestrator for the duration of one operation.
pub struct PackageArchive {
    name: String,
    entries: Vec<ArchiveEntry>,
    checksum: Option<String>,
    // Keeps a downloaded package on disk until the operation ends.
    _temp: Option<NamedTempFile>,
}

impl PackageArchive {
    /// Open a previously uploaded package file.
    ///
    /// Fails with `BadRequest` if the file does not carry the package
    /// extension and `Internal` if the zip container cannot be read.
    pub fn open_upload(path: &Path, _config: &PackagerConfig) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        require_package_extension(&name)?;

        let bytes = fs::read(path).map_err(|e| {
            PackageError::internal(format!(
                "Failed to read package file {}: {e}",
                path.display()
            ))
        })?;
        let (entries, checksum) = read_zip_entries(&bytes)?;

        Ok(Self {
            name,
            entries,
            checksum: Some(checksum),
            _temp: None,
        })
    }

    /// Download a remote package to a temp file and open it.
    ///
    /// The URL must end with the package extension (`BadRequest` otherwise);
    /// any transfer failure surfaces as `Internal`.
    pub fn open_url(url: &str, config: &PackagerConfig) -> Result<Self> {
        require_package_extension(url_file_name(url))?;

        let temp = download_to_temp(url, config)?;
        let bytes = fs::read(temp.path()).map_err(|e| {
            PackageError::internal(format!("Failed to read downloaded package: {e}"))
        })?;
        let (entries, checksum) = read_zip_entries(&bytes)?;
        debug!(url, size = bytes.len(), "package downloaded");

        Ok(Self {
            name: url_file_name(url).to_string(),
            entries,
            checksum: Some(checksum),
            _temp: Some(temp),
        })
    }

    /// Create a new empty archive for export.
    pub fn create<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            checksum: None,
            _temp: None,
        }
    }

    /// Archive file name (e.g. `acme.appkg`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SHA-256 checksum of the package as opened; `None` for archives under
    /// construction.
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Read an entry by name. Absence is not an error; a consumed or never
    /// present section simply returns `None`.
    pub fn read_entry(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.data.as_slice())
    }

    /// Remove an entry after it has been consumed. No-op if absent.
    pub fn delete_entry(&mut self, name: &str) {
        self.entries.retain(|e| e.name != name);
    }

    /// Add or overwrite an entry.
    pub fn write_entry<S: Into<String>>(&mut self, name: S, data: Vec<u8>) {
        let name = name.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.data = data,
            None => self.entries.push(ArchiveEntry { name, data }),
        }
    }

    /// Names of all remaining entries, in archive order.
    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Iterate over all remaining entries.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.data.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the archive back into zip container bytes.
    pub fn finish(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));
            let options = SimpleFileOptions::default();
            for entry in &self.entries {
                zip.start_file(entry.name.as_str(), options).map_err(|e| {
                    PackageError::archive(format!(
                        "Failed to add entry '{}' to package: {e}",
                        entry.name
                    ))
                })?;
                zip.write_all(&entry.data).map_err(|e| {
                    PackageError::internal(format!(
                        "Failed to write entry '{}' to package: {e}",
                        entry.name
                    ))
                })?;
            }
            zip.finish()
                .map_err(|e| PackageError::archive(format!("Failed to finalize package: {e}")))?;
        }
        Ok(buffer)
    }

    /// Serialize the archive into a temp file for streaming to a caller.
    ///
    /// The returned temp file is deleted when dropped.
    pub fn write_to_temp(&self, config: &PackagerConfig) -> Result<NamedTempFile> {
        let bytes = self.finish()?;
        let mut temp = new_temp_file(config)?;
        temp.write_all(&bytes).map_err(|e| {
            PackageError::internal(format!("Can not create package file: {e}"))
        })?;
        Ok(temp)
    }
}

/// Reject sources that do not carry the package extension.
pub fn require_package_extension(name: &str) -> Result<()> {
    let extension = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if extension.as_deref() != Some(PACKAGE_EXTENSION) {
        return Err(PackageError::bad_request(format!(
            "Only package files ending with '{PACKAGE_EXTENSION}' are allowed for import."
        )));
    }
    Ok(())
}

/// File-name portion of a URL, with query and fragment stripped.
fn url_file_name(url: &str) -> &str {
    let base = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url);
    base.rsplit('/').next().unwrap_or(base)
}

fn new_temp_file(config: &PackagerConfig) -> Result<NamedTempFile> {
    let temp = match &config.temp_dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    };
    temp.map_err(|e| PackageError::internal(format!("Failed to create temp file: {e}")))
}

fn download_to_temp(url: &str, config: &PackagerConfig) -> Result<NamedTempFile> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| PackageError::internal(format!("Failed to import package {url}: {e}")))?;

    let mut temp = new_temp_file(config)?;
    response
        .copy_to(temp.as_file_mut())
        .map_err(|e| PackageError::internal(format!("Failed to import package {url}: {e}")))?;
    Ok(temp)
}

fn read_zip_entries(bytes: &[u8]) -> Result<(Vec<ArchiveEntry>, String)> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let checksum = format!("{:x}", hasher.finalize());

    let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PackageError::internal(format!("Error opening package archive: {e}")))?;

    let mut entries = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut file = zip
            .by_index(index)
            .map_err(|e| PackageError::internal(format!("Error reading package archive: {e}")))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data).map_err(|e| {
            PackageError::internal(format!("Error reading package entry '{name}': {e}"))
        })?;
        entries.push(ArchiveEntry { name, data });
    }

    Ok((entries, checksum))
}
