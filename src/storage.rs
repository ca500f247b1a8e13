//! Key-value persistence port with scoped transactions.
//!
//! Everything that has to survive a restart lives in a handful of buckets.
//! A [Transaction] buffers writes on top of a [Store] and hands them to the
//! store as one atomic batch on [Transaction::commit]. Dropping it without
//! committing discards the writes.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use tracing::trace;

pub const CHANNEL_BUCKET: &str = "channel";
pub const TRANSFER_BUCKET: &str = "transfer";
pub const TRANSFER_ARCHIVE_BUCKET: &str = "transfer_archive";
pub const ACK_BUCKET: &str = "ack";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage backend failure: {0}")]
    Backend(String),
    #[error("corrupt record in bucket {bucket}: {reason}")]
    Corrupt { bucket: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put {
        bucket: &'static str,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: &'static str,
        key: Vec<u8>,
    },
}

impl BatchOperation {
    pub fn put(bucket: &'static str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            bucket,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(bucket: &'static str, key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete {
            bucket,
            key: key.into(),
        }
    }
}

/// Storage backend, implemented by the host.
pub trait Store: Send + Sync {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Every entry of `bucket`, ordered by key.
    fn all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply all operations or none of them.
    fn commit(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError>;

    fn begin(&self) -> Transaction<'_, Self>
    where
        Self: Sized,
    {
        Transaction::new(self)
    }
}

type Key = (&'static str, Vec<u8>);

/// Write overlay over a store. `None` marks a deletion.
pub struct Transaction<'s, S: Store + ?Sized> {
    store: &'s S,
    writes: BTreeMap<Key, Option<Vec<u8>>>,
    finished: bool,
}

impl<'s, S: Store + ?Sized> Transaction<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            writes: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn get(&self, bucket: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(&(bucket, key.to_vec())) {
            Some(pending) => Ok(pending.clone()),
            None => self.store.get(bucket, key),
        }
    }

    pub fn set(&mut self, bucket: &'static str, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.writes.insert((bucket, key.into()), Some(value.into()));
    }

    pub fn delete(&mut self, bucket: &'static str, key: impl Into<Vec<u8>>) {
        self.writes.insert((bucket, key.into()), None);
    }

    /// Store contents of `bucket` with this transaction's writes applied.
    pub fn all_of(&self, bucket: &'static str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.store.all(bucket)?.into_iter().collect();
        for ((b, key), value) in &self.writes {
            if *b != bucket {
                continue;
            }
            match value {
                Some(v) => merged.insert(key.clone(), v.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn commit(mut self) -> Result<(), StorageError> {
        self.finished = true;
        let operations = std::mem::take(&mut self.writes)
            .into_iter()
            .map(|((bucket, key), value)| match value {
                Some(value) => BatchOperation::put(bucket, key, value),
                None => BatchOperation::delete(bucket, key),
            })
            .collect();
        self.store.commit(operations)
    }
}

impl<'s, S: Store + ?Sized> Drop for Transaction<'s, S> {
    fn drop(&mut self) {
        if !self.finished && !self.writes.is_empty() {
            trace!(writes = self.writes.len(), "transaction rolled back");
        }
    }
}

/// In-memory [Store]. Reads and commits can be made to fail to exercise the
/// error paths of callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<(String, Vec<u8>), Vec<u8>>>,
    fail_reads: AtomicBool,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn read(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, Vec<u8>), Vec<u8>>>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("read failed (injected)".into()));
        }
        self.data()
    }

    fn data(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<(String, Vec<u8>), Vec<u8>>>, StorageError> {
        self.data
            .lock()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read()?.get(&(bucket.to_owned(), key.to_vec())).cloned())
    }

    fn all(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        Ok(self
            .read()?
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, operations: Vec<BatchOperation>) -> Result<(), StorageError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("commit failed (injected)".into()));
        }
        let mut data = self.data()?;
        for op in operations {
            match op {
                BatchOperation::Put { bucket, key, value } => {
                    data.insert((bucket.to_owned(), key), value);
                }
                BatchOperation::Delete { bucket, key } => {
                    data.remove(&(bucket.to_owned(), key));
                }
            }
        }
        Ok(())
    }
}
