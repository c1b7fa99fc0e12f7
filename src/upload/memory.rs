//! In-memory storage and record store with fault injection, for tests and dry runs.

use super::record::{CompletionTransaction, RecordPatch, RemoteSessionRecord, SessionRecordStore};
use super::storage::{ObjectStorage, ProgressFn};
use crate::error::{RecordError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    fail_next_puts: AtomicU32,
    fail_all_puts: AtomicBool,
    fail_deletes: AtomicBool,
    fail_paths_containing: Mutex<Option<String>>,
    put_attempts: AtomicU32,
    deletes: Mutex<Vec<String>>,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` puts, then succeed
    pub fn fail_next_puts(&self, count: u32) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    pub fn fail_all_puts(&self, fail: bool) {
        self.fail_all_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Fail every put whose path contains `fragment`
    pub fn fail_paths_containing(&self, fragment: &str) {
        *self.fail_paths_containing.lock() = Some(fragment.to_string());
    }

    pub fn put_attempts(&self) -> u32 {
        self.put_attempts.load(Ordering::SeqCst)
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn should_fail(&self, path: &str) -> bool {
        if self.fail_all_puts.load(Ordering::SeqCst) {
            return true;
        }
        if let Some(fragment) = self.fail_paths_containing.lock().as_deref() {
            if path.contains(fragment) {
                return true;
            }
        }
        self.fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put_object(
        &self,
        path: &str,
        data: Bytes,
        content_type: &str,
        progress: &ProgressFn,
    ) -> Result<(), StorageError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        let total = data.len() as u64;
        progress(0, total);

        if self.should_fail(path) {
            progress(total / 2, total);
            return Err(StorageError::Transfer {
                path: path.to_string(),
                details: "connection reset".to_string(),
            });
        }

        progress(total, total);
        self.objects.lock().insert(
            path.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, path: &str) -> Result<(), StorageError> {
        self.deletes.lock().push(path.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Transfer {
                path: path.to_string(),
                details: "delete refused".to_string(),
            });
        }
        self.objects.lock().remove(path);
        Ok(())
    }

    async fn object_exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.objects.lock().contains_key(path))
    }
}

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, RemoteSessionRecord>>,
    fail_updates: AtomicBool,
    fail_next_completions: AtomicU32,
    completion_attempts: AtomicU32,
    updates: Mutex<Vec<RecordPatch>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: RemoteSessionRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn insert(&self, record: RemoteSessionRecord) {
        self.records.lock().insert(record.session_id.clone(), record);
    }

    pub fn record(&self, session_id: &str) -> Option<RemoteSessionRecord> {
        self.records.lock().get(session_id).cloned()
    }

    /// Make every partial update fail; completions are unaffected
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_next_completions(&self, count: u32) {
        self.fail_next_completions.store(count, Ordering::SeqCst);
    }

    pub fn completion_attempts(&self) -> u32 {
        self.completion_attempts.load(Ordering::SeqCst)
    }

    /// Patches applied successfully, in order
    pub fn applied_updates(&self) -> Vec<RecordPatch> {
        self.updates.lock().clone()
    }

    fn apply(&self, session_id: &str, patch: RecordPatch) -> Result<(), RecordError> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(session_id)
            .ok_or_else(|| RecordError::NotFound {
                session_id: session_id.to_string(),
            })?;
        record.apply(&patch)?;
        self.updates.lock().push(patch);
        Ok(())
    }
}

#[async_trait]
impl SessionRecordStore for MemoryRecordStore {
    async fn get(&self, session_id: &str) -> Result<Option<RemoteSessionRecord>, RecordError> {
        Ok(self.record(session_id))
    }

    async fn update(&self, session_id: &str, patch: RecordPatch) -> Result<(), RecordError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RecordError::Write {
                details: "permission denied".to_string(),
            });
        }
        self.apply(session_id, patch)
    }

    async fn complete(
        &self,
        session_id: &str,
        transaction: CompletionTransaction,
    ) -> Result<(), RecordError> {
        self.completion_attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .fail_next_completions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(RecordError::Write {
                details: "transaction aborted".to_string(),
            });
        }
        self.apply(session_id, transaction.to_patch())
    }
}
