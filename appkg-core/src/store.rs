/*!
Persistence collaborator interfaces.

The relational store behind the platform is an external collaborator; the
engine only depends on the `AppStore` port and on an explicit transaction
object it hands out. `TransactionGuard` rolls the transaction back on drop
unless it was committed, so every early return and error path inside an
import leaves the store untouched.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::manifest::{AppDescriptor, ServiceDefinition};

/// A persisted application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: i64,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub descriptor: AppDescriptor,
}

/// A persisted service definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: i64,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub definition: ServiceDefinition,
}

/// An open transaction on the persistence layer.
///
/// Exactly one of `commit`/`rollback` is called, once.
pub trait Transaction {
    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Scoped transactional boundary.
///
/// Rolls back on drop unless `commit` was called, covering every exit path
/// (success, error, early return).
pub struct TransactionGuard {
    inner: Option<Box<dyn Transaction>>,
}

impl TransactionGuard {
    pub fn new(transaction: Box<dyn Transaction>) -> Self {
        Self {
            inner: Some(transaction),
        }
    }

    /// Commit the transaction, disarming the rollback.
    pub fn commit(mut self) -> Result<()> {
        match self.inner.take() {
            Some(transaction) => transaction.commit(),
            None => Ok(()),
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if let Some(transaction) = self.inner.take() {
            if let Err(e) = transaction.rollback() {
                warn!("transaction rollback failed: {e}");
            }
        }
    }
}

/// Application and service persistence port.
pub trait AppStore {
    /// Begin a transaction covering subsequent writes.
    fn begin(&self) -> Result<TransactionGuard>;

    /// Persist a new application record.
    fn create_app(&self, descriptor: &AppDescriptor) -> Result<AppRecord>;

    /// Look up an application by id.
    fn find_app(&self, id: i64) -> Result<Option<AppRecord>>;

    /// Persist a new service definition.
    fn create_service(&self, definition: &ServiceDefinition) -> Result<ServiceRecord>;

    /// Id of the first service of the given kind, if any.
    fn first_service_id_of_kind(&self, kind: &str) -> Result<Option<i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};
    use std::sync::Arc;

    const NONE: u8 = 0;
    const COMMITTED: u8 = 1;
    const ROLLED_BACK: u8 = 2;

    struct RecordingTransaction {
        outcome: Arc<AtomicU8>,
    }

    impl Transaction for RecordingTransaction {
        fn commit(self: Box<Self>) -> Result<()> {
            self.outcome.store(COMMITTED, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<()> {
            self.outcome.store(ROLLED_BACK, Ordering::SeqCst);
            Ok(())
        }
    }

    fn guard_with_outcome() -> (TransactionGuard, Arc<AtomicU8>) {
        let outcome = Arc::new(AtomicU8::new(NONE));
        let guard = TransactionGuard::new(Box::new(RecordingTransaction {
            outcome: outcome.clone(),
        }));
        (guard, outcome)
    }

    #[test]
    fn test_guard_commits_once() {
        let (guard, outcome) = guard_with_outcome();
        guard.commit().unwrap();
        assert_eq!(outcome.load(Ordering::SeqCst), COMMITTED);
    }

    #[test]
    fn test_guard_rolls_back_on_drop() {
        let (guard, outcome) = guard_with_outcome();
        drop(guard);
        assert_eq!(outcome.load(Ordering::SeqCst), ROLLED_BACK);
    }

    #[test]
    fn test_guard_rolls_back_on_error_path() {
        let (guard, outcome) = guard_with_outcome();
        let result: Result<()> = (|| {
            let _guard = guard;
            Err(crate::error::PackageError::internal("sub-import failed"))
        })();
        assert!(result.is_err());
        assert_eq!(outcome.load(Ordering::SeqCst), ROLLED_BACK);
    }
}
