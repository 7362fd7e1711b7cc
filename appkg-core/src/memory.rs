/*!
In-memory platform collaborators.

A complete, self-contained implementation of the persistence, dispatch, and
file-storage ports backed by in-process maps. Useful for driving the full
import/export engine in tests, examples, and the CLI without a platform
deployment.

Transactions are snapshot-based: `begin` captures the platform state and
`rollback` restores it, so everything written through the store or the
dispatch layer inside the boundary disappears on rollback, including
schema and data applied to the simulated services.
*/

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;

use crate::archive::PackageArchive;
use crate::dispatch::{DispatchError, FailureKind, ServiceDispatch, Verb};
use crate::error::{PackageError, Result};
use crate::files::{FileStore, StorageRegistry};
use crate::manifest::{AppDescriptor, ServiceDefinition};
use crate::store::{AppRecord, AppStore, ServiceRecord, Transaction, TransactionGuard};

/// One request observed by the in-memory dispatch layer.
#[derive(Debug, Clone)]
pub struct DispatchedRequest {
    pub verb: Verb,
    pub service: String,
    pub resource: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default)]
struct PlatformState {
    apps: Vec<AppRecord>,
    services: Vec<ServiceRecord>,
    /// service name -> table name -> rows
    tables: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
    next_id: i64,
}

impl PlatformState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory application store, dispatch layer, and storage registry.
pub struct MemoryPlatform {
    state: Arc<Mutex<PlatformState>>,
    files: Arc<MemoryFileStore>,
    resource_wrapper: String,
    local_service_kind: String,
    forced_failures: Mutex<HashMap<String, FailureKind>>,
    requests: Mutex<Vec<DispatchedRequest>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState::default())),
            files: Arc::new(MemoryFileStore::new()),
            resource_wrapper: crate::config::DEFAULT_RESOURCE_WRAPPER.to_string(),
            local_service_kind: crate::config::LOCAL_FILE_SERVICE_KIND.to_string(),
            forced_failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Use a non-default resource wrapper key when unwrapping payloads.
    pub fn with_resource_wrapper<S: Into<String>>(mut self, wrapper: S) -> Self {
        self.resource_wrapper = wrapper.into();
        self
    }

    /// Insert a committed application directly, bypassing any transaction.
    pub fn insert_app(&self, descriptor: &AppDescriptor) -> AppRecord {
        let mut state = self.state.lock().unwrap();
        let record = AppRecord {
            id: state.next_id(),
            created: Utc::now(),
            descriptor: descriptor.clone(),
        };
        state.apps.push(record.clone());
        record
    }

    /// Insert a committed service directly, bypassing any transaction.
    pub fn insert_service(&self, definition: &ServiceDefinition) -> ServiceRecord {
        let mut state = self.state.lock().unwrap();
        let record = ServiceRecord {
            id: state.next_id(),
            created: Utc::now(),
            definition: definition.clone(),
        };
        state.services.push(record.clone());
        state.tables.entry(definition.name.clone()).or_default();
        record
    }

    /// Pre-create a table on a simulated service.
    pub fn insert_table(&self, service: &str, table: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .entry(service.to_string())
            .or_default()
            .entry(table.to_string())
            .or_default();
    }

    /// Force every dispatch to `service` to fail with the given classification.
    pub fn fail_dispatch<S: Into<String>>(&self, service: S, kind: FailureKind) {
        self.forced_failures
            .lock()
            .unwrap()
            .insert(service.into(), kind);
    }

    pub fn apps(&self) -> Vec<AppRecord> {
        self.state.lock().unwrap().apps.clone()
    }

    pub fn services(&self) -> Vec<ServiceRecord> {
        self.state.lock().unwrap().services.clone()
    }

    /// Table names existing on a simulated service.
    pub fn tables(&self, service: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(service)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Rows inserted into a simulated table.
    pub fn table_rows(&self, service: &str, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(service)
            .and_then(|tables| tables.get(table))
            .cloned()
            .unwrap_or_default()
    }

    /// All requests seen by the dispatch layer, in order.
    pub fn requests(&self) -> Vec<DispatchedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The shared in-memory file store.
    pub fn file_store(&self) -> Arc<MemoryFileStore> {
        self.files.clone()
    }

    fn unwrap_resources(&self, payload: &Value) -> std::result::Result<Vec<Value>, DispatchError> {
        payload
            .get(&self.resource_wrapper)
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                DispatchError::rejected(format!(
                    "payload missing '{}' wrapper",
                    self.resource_wrapper
                ))
            })
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<PlatformState>>,
    snapshot: PlatformState,
}

impl Transaction for MemoryTransaction {
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        *self.state.lock().unwrap() = self.snapshot;
        Ok(())
    }
}

impl AppStore for MemoryPlatform {
    fn begin(&self) -> Result<TransactionGuard> {
        let snapshot = self.state.lock().unwrap().clone();
        Ok(TransactionGuard::new(Box::new(MemoryTransaction {
            state: self.state.clone(),
            snapshot,
        })))
    }

    fn create_app(&self, descriptor: &AppDescriptor) -> Result<AppRecord> {
        let mut state = self.state.lock().unwrap();
        if state.apps.iter().any(|a| a.descriptor.name == descriptor.name) {
            return Err(PackageError::internal(format!(
                "An application named '{}' already exists.",
                descriptor.name
            )));
        }
        let record = AppRecord {
            id: state.next_id(),
            created: Utc::now(),
            descriptor: descriptor.clone(),
        };
        state.apps.push(record.clone());
        Ok(record)
    }

    fn find_app(&self, id: i64) -> Result<Option<AppRecord>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .apps
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    fn create_service(&self, definition: &ServiceDefinition) -> Result<ServiceRecord> {
        let mut state = self.state.lock().unwrap();
        if state
            .services
            .iter()
            .any(|s| s.definition.name == definition.name)
        {
            return Err(PackageError::internal(format!(
                "A service named '{}' already exists.",
                definition.name
            )));
        }
        let record = ServiceRecord {
            id: state.next_id(),
            created: Utc::now(),
            definition: definition.clone(),
        };
        state.services.push(record.clone());
        state.tables.entry(definition.name.clone()).or_default();
        Ok(record)
    }

    fn first_service_id_of_kind(&self, kind: &str) -> Result<Option<i64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .services
            .iter()
            .find(|s| s.definition.kind == kind)
            .map(|s| s.id))
    }
}

impl ServiceDispatch for MemoryPlatform {
    fn dispatch(
        &self,
        verb: Verb,
        service: &str,
        resource: &str,
        payload: Value,
    ) -> std::result::Result<Value, DispatchError> {
        self.requests.lock().unwrap().push(DispatchedRequest {
            verb,
            service: service.to_string(),
            resource: resource.to_string(),
            payload: payload.clone(),
        });

        if let Some(kind) = self.forced_failures.lock().unwrap().get(service) {
            return Err(DispatchError::new(
                *kind,
                format!("forced failure for service '{service}'"),
            ));
        }

        let mut state = self.state.lock().unwrap();
        if !state.services.iter().any(|s| s.definition.name == service) {
            return Err(DispatchError::not_found(format!(
                "Service '{service}' not found"
            )));
        }

        if resource == "_schema" {
            let tables = self.unwrap_resources(&payload)?;
            let existing = state.tables.entry(service.to_string()).or_default();
            let mut names = Vec::with_capacity(tables.len());
            for definition in &tables {
                let name = definition
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        DispatchError::rejected("table definition missing 'name'")
                    })?;
                if existing.contains_key(name) {
                    return Err(DispatchError::conflict(format!(
                        "Table '{name}' already exists on service '{service}'"
                    )));
                }
                names.push(name.to_string());
            }
            for name in names {
                existing.insert(name, Vec::new());
            }
            return Ok(Value::Null);
        }

        if let Some(table) = resource.strip_prefix("_table/") {
            let records = self.unwrap_resources(&payload)?;
            let tables = state.tables.entry(service.to_string()).or_default();
            let Some(rows) = tables.get_mut(table) else {
                return Err(DispatchError::not_found(format!(
                    "Table '{table}' not found on service '{service}'"
                )));
            };
            rows.extend(records);
            return Ok(Value::Null);
        }

        Err(DispatchError::rejected(format!(
            "Unsupported resource '{resource}'"
        )))
    }
}

impl StorageRegistry for MemoryPlatform {
    fn file_store_by_id(&self, id: i64) -> Option<Arc<dyn FileStore>> {
        let state = self.state.lock().unwrap();
        let service = state.services.iter().find(|s| s.id == id)?;
        if service.definition.kind == self.local_service_kind {
            Some(self.files.clone())
        } else {
            None
        }
    }
}

/// In-memory file-storage driver keyed by (container, path).
pub struct MemoryFileStore {
    files: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Place a file directly, e.g. to seed an export test.
    pub fn put_file(&self, container: &str, path: &str, data: Vec<u8>) {
        self.files
            .lock()
            .unwrap()
            .insert((container.to_string(), path.to_string()), data);
    }

    pub fn file(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(container.to_string(), path.to_string()))
            .cloned()
    }

    /// All paths stored in a container.
    pub fn paths(&self, container: &str) -> Vec<String> {
        self.files
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore for MemoryFileStore {
    fn extract_archive(
        &self,
        container: &str,
        folder: &str,
        archive: &PackageArchive,
        prefix: &str,
    ) -> Result<()> {
        let mut files = self.files.lock().unwrap();
        for (name, data) in archive.entries() {
            let relative = name.strip_prefix(prefix).unwrap_or(name);
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let path = if folder.is_empty() {
                relative.to_string()
            } else {
                format!("{folder}/{relative}")
            };
            files.insert((container.to_string(), path), data.to_vec());
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
        let files = self.files.lock().unwrap();
        let prefix = if folder.is_empty() {
            String::new()
        } else {
            format!("{folder}/")
        };
        let mut added = false;
        for ((c, path), data) in files.iter() {
            if c != container || !path.starts_with(&prefix) {
                continue;
            }
            if !recurse && path[prefix.len()..].contains('/') {
                continue;
            }
            archive.write_entry(path.clone(), data.clone());
            added = true;
        }
        Ok(added)
    }

    fn container_exists(&self, container: &str) -> Result<bool> {
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|(c, _)| c == container))
    }

    fn folder_exists(&self, container: &str, folder: &str) -> Result<bool> {
        let prefix = format!("{folder}/");
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .any(|(c, p)| c == container && p.starts_with(&prefix)))
    }
}
