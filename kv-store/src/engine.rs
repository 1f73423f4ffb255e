use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBAccess, DBRawIteratorWithThreadMode,
    ErrorKind, IteratorMode, MultiThreaded, Options, SnapshotWithThreadMode, Transaction,
    TransactionDB, TransactionDBOptions, TransactionOptions, WriteOptions, DB,
};

use crate::error::{Result, StoreError};

type Db = TransactionDB<MultiThreaded>;

// Buckets live in their own column families, kept apart from RocksDB's "default" family.
const BUCKET_CF_PREFIX: &str = "bucket:";
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

fn cf_name(bucket: &str) -> String {
    format!("{BUCKET_CF_PREFIX}{bucket}")
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    // How long open() keeps retrying while another handle holds the database lock
    pub lock_timeout: Duration,
    // fsync the WAL on every commit
    pub sync_writes: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(50),
            sync_writes: true,
        }
    }
}

/// File-backed transactional engine with independent ordered keyspaces (buckets).
///
/// Only one handle may hold a database directory at a time, whether from this process or
/// another one. Write transactions are serialized through a single writer lock; reads run
/// against snapshots and never see a partially committed write.
pub struct Engine {
    path: PathBuf,
    options: EngineOptions,
    db: RwLock<Option<Db>>,
    // Held for every write transaction and bucket change. Tracks known bucket names.
    writer: Mutex<BTreeSet<String>>,
}

impl Engine {
    /// Open or create the database at `path`.
    ///
    /// Fails with `StoreError::LockTimeout` if the lock is still held by another handle after
    /// `options.lock_timeout`.
    pub fn open(path: impl AsRef<Path>, options: EngineOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        prepare_dir(&path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        let txn_db_opts = TransactionDBOptions::default();

        let deadline = Instant::now() + options.lock_timeout;
        let (db, buckets) = loop {
            let buckets = existing_buckets(&db_opts, &path);
            let descriptors = buckets
                .iter()
                .map(|bucket| ColumnFamilyDescriptor::new(cf_name(bucket), Options::default()));

            match Db::open_cf_descriptors(&db_opts, &txn_db_opts, &path, descriptors) {
                Ok(db) => break (db, buckets),
                Err(e) if is_lock_error(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StoreError::LockTimeout {
                            path,
                            timeout: options.lock_timeout,
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(Self {
            path,
            options,
            db: RwLock::new(Some(db)),
            writer: Mutex::new(buckets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().is_none()
    }

    /// Create `bucket` if it does not exist yet. Idempotent.
    pub fn create_bucket(&self, bucket: &str) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut buckets = self.writer.lock();

        if buckets.contains(bucket) {
            return Ok(());
        }
        db.create_cf(cf_name(bucket), &Options::default())?;
        buckets.insert(bucket.to_owned());
        Ok(())
    }

    /// Drop `bucket` and everything in it.
    pub fn drop_bucket(&self, bucket: &str) -> Result<()> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        let mut buckets = self.writer.lock();

        if !buckets.contains(bucket) {
            return Err(StoreError::BucketNotFound(bucket.to_owned()));
        }
        db.drop_cf(&cf_name(bucket))?;
        buckets.remove(bucket);
        Ok(())
    }

    /// Names of all buckets, in order.
    pub fn buckets(&self) -> Result<Vec<String>> {
        let guard = self.db.read();
        if guard.is_none() {
            return Err(StoreError::Closed);
        }
        Ok(self.writer.lock().iter().cloned().collect())
    }

    /// Run `f` inside a read-write transaction.
    ///
    /// An error from `f` discards every write it made; otherwise the transaction commits
    /// atomically.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&WriteTx<'_>) -> Result<T>,
    {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        let _writer = self.writer.lock();

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.options.sync_writes);
        let tx = WriteTx {
            db,
            txn: db.transaction_opt(&write_opts, &TransactionOptions::default()),
        };

        // Dropping an uncommitted transaction rolls it back.
        let value = f(&tx)?;
        tx.txn.commit()?;
        Ok(value)
    }

    /// Run `f` against a consistent snapshot of the database.
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ReadTx<'_>) -> Result<T>,
    {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(StoreError::Closed)?;
        let tx = ReadTx {
            db,
            snapshot: db.snapshot(),
        };
        f(&tx)
    }

    /// Release the database lock. Waits for in-flight transactions to finish; every later
    /// call fails with `StoreError::Closed`. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let db = self.db.write().take();
        // Committed writes are already in the WAL; dropping the handle releases the LOCK file.
        drop(db);
        Ok(())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A read-write transaction handed to `Engine::update`.
pub struct WriteTx<'a> {
    db: &'a Db,
    txn: Transaction<'a, Db>,
}

impl WriteTx<'_> {
    fn bucket(&self, bucket: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(&cf_name(bucket))
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_owned()))
    }

    /// First entry in `bucket` whose key is >= `key`, including writes made earlier in this
    /// transaction. A missing bucket has no entries.
    pub fn seek(&self, bucket: &str, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(cf) = self.db.cf_handle(&cf_name(bucket)) else {
            return Ok(None);
        };
        seek_raw(self.txn.raw_iterator_cf(&cf), key)
    }

    pub fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.bucket(bucket)?;
        self.txn.put_cf(&cf, key, value)?;
        Ok(())
    }

    pub fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        let cf = self.bucket(bucket)?;
        self.txn.delete_cf(&cf, key)?;
        Ok(())
    }
}

/// A read-only view handed to `Engine::view`.
pub struct ReadTx<'a> {
    db: &'a Db,
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl ReadTx<'_> {
    /// First entry in `bucket` whose key is >= `key`. A missing bucket has no entries.
    pub fn seek(&self, bucket: &str, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(cf) = self.db.cf_handle(&cf_name(bucket)) else {
            return Ok(None);
        };
        seek_raw(self.snapshot.raw_iterator_cf(&cf), key)
    }

    /// Every key in `bucket`, in order.
    pub fn keys(&self, bucket: &str) -> Result<Vec<Vec<u8>>> {
        let cf = self
            .db
            .cf_handle(&cf_name(bucket))
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_owned()))?;

        let mut keys = Vec::new();
        for item in self.snapshot.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            keys.push(key.to_vec());
        }
        Ok(keys)
    }
}

fn seek_raw<D: DBAccess>(
    mut iter: DBRawIteratorWithThreadMode<'_, D>,
    key: &[u8],
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    iter.seek(key);
    match (iter.key(), iter.value()) {
        (Some(k), Some(v)) => Ok(Some((k.to_vec(), v.to_vec()))),
        _ => {
            iter.status()?;
            Ok(None)
        }
    }
}

// RocksDB reports a held LOCK file as an IO error, both for other processes and for a second
// handle inside this one.
fn is_lock_error(e: &rocksdb::Error) -> bool {
    e.kind() == ErrorKind::IOError && e.to_string().to_lowercase().contains("lock")
}

fn existing_buckets(opts: &Options, path: &Path) -> BTreeSet<String> {
    // A fresh directory has no column family list yet.
    DB::list_cf(opts, path)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|name| name.strip_prefix(BUCKET_CF_PREFIX).map(str::to_owned))
        .collect()
}

fn prepare_dir(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    std::fs::create_dir_all(path).map_err(|error| StoreError::Io {
        path: path.to_path_buf(),
        error,
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750)).map_err(
            |error| StoreError::Io {
                path: path.to_path_buf(),
                error,
            },
        )?;
    }

    Ok(())
}
