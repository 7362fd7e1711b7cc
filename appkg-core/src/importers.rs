/*!
Section sub-importers.

One importer per package section. Services are persisted directly through the
store, since the dispatch layer may itself depend on those services existing.
Schema and data submissions go through dispatch and apply an asymmetric
failure policy: a missing or broken target service aborts the whole import,
anything else (typically already-exists) is logged and skipped.
*/

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PackagerConfig;
use crate::dispatch::{DispatchError, ServiceDispatch, Verb};
use crate::error::{PackageError, Result};
use crate::manifest::{DataManifest, SchemaManifest, ServiceDefinition};
use crate::store::AppStore;

fn wrap_resources(config: &PackagerConfig, resources: Vec<Value>) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(config.resource_wrapper.clone(), Value::Array(resources));
    Value::Object(body)
}

fn classify(service: &str, err: DispatchError) -> Result<()> {
    if err.kind.is_fatal() {
        return Err(PackageError::Dispatch {
            service: service.to_string(),
            source: err,
        });
    }
    warn!(service, kind = %err.kind, "sub-import skipped: {}", err.message);
    Ok(())
}

/// Persists service definitions through the application store.
pub struct ServicesImporter<'a> {
    store: &'a dyn AppStore,
}

impl<'a> ServicesImporter<'a> {
    pub fn new(store: &'a dyn AppStore) -> Self {
        Self { store }
    }

    /// Create every service in the section. Any persistence error is fatal;
    /// there is no partial-success tolerance for services.
    pub fn run(&self, services: &[ServiceDefinition]) -> Result<usize> {
        for definition in services {
            self.store.create_service(definition).map_err(|e| {
                PackageError::internal(format!("Could not create the services. {e}"))
            })?;
            debug!(service = %definition.name, kind = %definition.kind, "service created");
        }
        Ok(services.len())
    }
}

/// Submits per-service table batches to each service's schema endpoint.
pub struct SchemaImporter<'a> {
    dispatch: &'a dyn ServiceDispatch,
    config: &'a PackagerConfig,
}

impl<'a> SchemaImporter<'a> {
    pub fn new(dispatch: &'a dyn ServiceDispatch, config: &'a PackagerConfig) -> Self {
        Self { dispatch, config }
    }

    pub fn run(&self, manifest: &SchemaManifest) -> Result<()> {
        for service in &manifest.services {
            if service.tables.is_empty() {
                continue;
            }
            let payload = wrap_resources(self.config, service.tables.clone());
            match self
                .dispatch
                .dispatch(Verb::Post, &service.name, "_schema", payload)
            {
                Ok(_) => {
                    debug!(service = %service.name, tables = service.tables.len(), "schema created");
                }
                Err(err) => classify(&service.name, err)?,
            }
        }
        Ok(())
    }
}

/// Submits per-table record batches to each table's resource endpoint.
pub struct DataImporter<'a> {
    dispatch: &'a dyn ServiceDispatch,
    config: &'a PackagerConfig,
}

impl<'a> DataImporter<'a> {
    pub fn new(dispatch: &'a dyn ServiceDispatch, config: &'a PackagerConfig) -> Self {
        Self { dispatch, config }
    }

    pub fn run(&self, manifest: &DataManifest) -> Result<()> {
        for service in &manifest.services {
            for table in &service.tables {
                let payload = wrap_resources(self.config, table.records.clone());
                let resource = format!("_table/{}", table.name);
                match self
                    .dispatch
                    .dispatch(Verb::Post, &service.name, &resource, payload)
                {
                    Ok(_) => {
                        debug!(
                            service = %service.name,
                            table = %table.name,
                            records = table.records.len(),
                            "records inserted"
                        );
                    }
                    Err(err) => classify(&service.name, err)?,
                }
            }
        }
        Ok(())
    }
}
