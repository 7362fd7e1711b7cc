/*!
appkg CLI - Command-line interface for the application package engine.

Provides utilities for inspecting and verifying package files, and for
running imports and exports against a local in-memory platform with files
stored on the local filesystem.
*/

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use appkg_core::{
    manifest, AppDescriptor, AppRecord, DescriptorOverrides, ExportOptions, FileStore,
    ImportSource, LocalFolderStore, MemoryPlatform, PackageArchive, Packager, PackagerConfig,
    ServiceDefinition, StorageRegistry,
};
use clap::{Parser, Subcommand};
use tabled::{Table, Tabled};
use tracing::info;

#[derive(Parser)]
#[command(name = "appkg")]
#[command(about = "CLI for the application package engine")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the contents of a package file
    Inspect {
        /// Path to the package file
        package: PathBuf,
    },
    /// Parse every section of a package file and report what it carries
    Verify {
        /// Path to the package file
        package: PathBuf,
    },
    /// Import a package into a local platform
    Import {
        /// Path to the package file
        package: PathBuf,
        /// Storage root for extracted application files
        #[arg(short, long, default_value = "./storage")]
        target: PathBuf,
        /// Override the application name from the package
        #[arg(long)]
        name: Option<String>,
        /// Activate the application on import
        #[arg(long)]
        activate: bool,
    },
    /// Build a package from a descriptor file plus a local storage root
    Export {
        /// Path to the application descriptor JSON
        descriptor: PathBuf,
        /// Storage root holding the application's files, laid out the way
        /// `import --target` writes them
        #[arg(short, long, default_value = "./storage")]
        files: PathBuf,
        /// Output package path (defaults to `<app>.appkg` in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Tabled)]
struct EntryRow {
    #[tabled(rename = "Entry")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
}

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Active")]
    active: bool,
    #[tabled(rename = "Created")]
    created: String,
}

impl AppRow {
    fn from_record(app: &AppRecord) -> Self {
        Self {
            id: app.id,
            name: app.descriptor.name.clone(),
            kind: format!("{:?}", app.descriptor.kind).to_lowercase(),
            active: app.descriptor.is_active,
            created: app.created.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Routes every storage service id to one local-filesystem driver.
struct LocalRegistry {
    store: Arc<LocalFolderStore>,
}

impl StorageRegistry for LocalRegistry {
    fn file_store_by_id(&self, _id: i64) -> Option<Arc<dyn FileStore>> {
        Some(self.store.clone())
    }
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Inspect { package } => inspect_package(&package)?,
        Commands::Verify { package } => verify_package(&package)?,
        Commands::Import {
            package,
            target,
            name,
            activate,
        } => import_package(&package, &target, name, activate)?,
        Commands::Export {
            descriptor,
            files,
            output,
        } => export_package(&descriptor, &files, output)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn inspect_package(package: &Path) -> Result<(), anyhow::Error> {
    let archive = PackageArchive::open_upload(package, &PackagerConfig::default())?;

    println!("Package: {}", archive.name());
    if let Some(checksum) = archive.checksum() {
        println!("SHA-256: {checksum}");
    }
    let descriptor_data = archive
        .read_entry(manifest::DESCRIPTOR_ENTRY)
        .or_else(|| archive.read_entry(manifest::LEGACY_DESCRIPTOR_ENTRY));
    if let Some(data) = descriptor_data {
        let descriptor = AppDescriptor::from_json(data)?;
        println!(
            "Application: {} ({})",
            descriptor.name,
            format!("{:?}", descriptor.kind).to_lowercase()
        );
        if let Some(description) = &descriptor.description {
            println!("Description: {description}");
        }
    }

    let rows: Vec<EntryRow> = archive
        .entries()
        .map(|(name, data)| EntryRow {
            name: name.to_string(),
            size: format_size(data.len() as u64),
        })
        .collect();
    if rows.is_empty() {
        println!("Package is empty");
    } else {
        println!("{}", Table::new(rows));
    }

    Ok(())
}

fn verify_package(package: &Path) -> Result<(), anyhow::Error> {
    let mut archive = PackageArchive::open_upload(package, &PackagerConfig::default())?;
    info!("Verifying package: {}", archive.name());

    let descriptor = manifest::read_descriptor(&mut archive)?;
    println!("✓ descriptor: {}", descriptor.name);

    match manifest::read_services(&mut archive)? {
        Some(services) => println!("✓ services: {}", services.len()),
        None => println!("- services: not present"),
    }
    match manifest::read_schemas(&mut archive)? {
        Some(schemas) => {
            let tables: usize = schemas.services.iter().map(|s| s.tables.len()).sum();
            println!("✓ schema: {} table(s) across {} service(s)", tables, schemas.services.len());
        }
        None => println!("- schema: not present"),
    }
    match manifest::read_data(&mut archive)? {
        Some(data) => {
            let records: usize = data
                .services
                .iter()
                .flat_map(|s| s.tables.iter())
                .map(|t| t.records.len())
                .sum();
            println!("✓ data: {records} record(s)");
        }
        None => println!("- data: not present"),
    }
    println!("✓ application files: {}", archive.len());

    Ok(())
}

fn import_package(
    package: &Path,
    target: &Path,
    name: Option<String>,
    activate: bool,
) -> Result<(), anyhow::Error> {
    fs::create_dir_all(target)
        .with_context(|| format!("Failed to create storage root {}", target.display()))?;

    let config = PackagerConfig::default();
    let platform = MemoryPlatform::new();
    platform.insert_service(&local_file_service(&config));
    let registry = LocalRegistry {
        store: Arc::new(LocalFolderStore::new(target)),
    };
    let packager = Packager::new(&platform, &platform, &registry, config)?;

    let overrides = DescriptorOverrides {
        name,
        is_active: activate.then_some(true),
        ..Default::default()
    };
    let app = packager.import(
        ImportSource::Uploads(vec![package.to_path_buf()]),
        &overrides,
    )?;

    println!("{}", Table::new([AppRow::from_record(&app)]));
    for service in platform.services() {
        let tables = platform.tables(&service.definition.name);
        println!(
            "✓ service '{}' ({}) with {} table(s)",
            service.definition.name,
            service.definition.kind,
            tables.len()
        );
    }
    println!("✓ files extracted under {}", target.display());

    Ok(())
}

fn export_package(
    descriptor_path: &Path,
    files: &Path,
    output: Option<PathBuf>,
) -> Result<(), anyhow::Error> {
    let data = fs::read(descriptor_path)
        .with_context(|| format!("Failed to read descriptor {}", descriptor_path.display()))?;
    let descriptor = AppDescriptor::from_json(&data)?;

    let config = PackagerConfig::default();
    let platform = MemoryPlatform::new();
    platform.insert_service(&local_file_service(&config));
    let app = platform.insert_app(&descriptor);
    let registry = LocalRegistry {
        store: Arc::new(LocalFolderStore::new(files)),
    };
    let packager = Packager::new(&platform, &platform, &registry, config)?;

    let exported = packager.export(app.id, &ExportOptions::default())?;
    let destination = output.unwrap_or_else(|| PathBuf::from(exported.file_name()));
    exported.persist_to(&destination)?;
    println!("✓ package written to {}", destination.display());

    Ok(())
}

fn local_file_service(config: &PackagerConfig) -> ServiceDefinition {
    ServiceDefinition {
        name: "files".to_string(),
        label: Some("Local file storage".to_string()),
        description: None,
        is_active: true,
        kind: config.local_service_kind.clone(),
        config: None,
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
