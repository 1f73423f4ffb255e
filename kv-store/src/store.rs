use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};

use crate::codec::{is_absent, Codec};
use crate::engine::{Engine, EngineOptions, ReadTx, WriteTx};
use crate::error::{Result, StoreError};
use crate::metrics_consts::*;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    // Path to the store in disk
    pub path: PathBuf,
    // How long to wait for another handle to release the store
    pub lock_timeout: Duration,
    // Encoding used for new writes
    pub codec: Codec,
    // fsync on every commit
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let defaults = EngineOptions::default();
        Self {
            path: path.into(),
            lock_timeout: defaults.lock_timeout,
            codec: Codec::default(),
            sync_writes: defaults.sync_writes,
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }
}

/// Persistent store mapping (bucket, string key) to any serde-encodable value.
///
/// ```no_run
/// use kv_store::{KvStore, StoreConfig};
///
/// let store = KvStore::open(StoreConfig::new("/tmp/example-store"))?;
/// store.put("pastes", "key42", &156)?;
/// let n: i32 = store.get("pastes", "key42")?;
/// assert_eq!(n, 156);
/// store.close()?;
/// # Ok::<(), kv_store::StoreError>(())
/// ```
///
/// All methods are safe to call from several threads at once. The store never logs: every
/// failure is returned to the caller.
#[derive(Debug)]
pub struct KvStore {
    engine: Engine,
    codec: Codec,
}

impl KvStore {
    /// Open the store at `config.path`, creating it if needed.
    ///
    /// Only one handle may have a given path open at a time. A second open, from this process
    /// or another, fails with `StoreError::LockTimeout` once `config.lock_timeout` elapses.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let engine = Engine::open(
            &config.path,
            EngineOptions {
                lock_timeout: config.lock_timeout,
                sync_writes: config.sync_writes,
            },
        )?;

        Ok(Self {
            engine,
            codec: config.codec,
        })
    }

    pub fn path(&self) -> &Path {
        self.engine.path()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Create `bucket` if it does not exist. Calling it again, from any thread, is a no-op.
    pub fn add_bucket(&self, bucket: &str) -> Result<()> {
        instrumented("add_bucket", || self.engine.create_bucket(bucket))
    }

    /// Names of every bucket in the store.
    pub fn buckets(&self) -> Result<Vec<String>> {
        self.engine.buckets()
    }

    /// Drop `bucket` with all its entries. Fails with `StoreError::BucketNotFound` if absent.
    pub fn delete_bucket(&self, bucket: &str) -> Result<()> {
        instrumented("delete_bucket", || self.engine.drop_bucket(bucket))
    }

    /// Store `value` under `key`, replacing what was there.
    ///
    /// The key may be empty. An absent value (`None`, `()`) is rejected with
    /// `StoreError::BadValue` before anything touches the disk.
    ///
    /// ```no_run
    /// # use std::collections::HashMap;
    /// # let store = kv_store::KvStore::open(kv_store::StoreConfig::new("/tmp/s"))?;
    /// store.put("b", "key42", &156)?;
    /// store.put("b", "key42", "this is a string")?;
    /// let m = HashMap::from([("harry", 100), ("emma", 101)]);
    /// store.put("b", "key43", &m)?;
    /// # Ok::<(), kv_store::StoreError>(())
    /// ```
    pub fn put<T: Serialize + ?Sized>(&self, bucket: &str, key: &str, value: &T) -> Result<()> {
        instrumented("put", || {
            if is_absent(value) {
                return Err(StoreError::BadValue);
            }
            let encoded = self.codec.encode(value)?;

            self.engine.create_bucket(bucket)?;
            metrics::histogram!(STORE_VALUE_BYTES_HISTOGRAM).record(encoded.len() as f64);
            self.engine
                .update(|tx| tx.put(bucket, key.as_bytes(), &encoded))
        })
    }

    /// Read the value under `key` as a `T`.
    ///
    /// Fails with `StoreError::NotFound` if the bucket or key is absent, and with
    /// `StoreError::Decode` if the stored value does not fit `T`.
    ///
    /// ```no_run
    /// # let store = kv_store::KvStore::open(kv_store::StoreConfig::new("/tmp/s"))?;
    /// match store.get::<Vec<i32>>("b", "key42") {
    ///     Ok(numbers) => println!("{numbers:?}"),
    ///     Err(e) if e.is_not_found() => println!("key42 not found"),
    ///     Err(e) => return Err(e),
    /// }
    /// # Ok::<(), kv_store::StoreError>(())
    /// ```
    pub fn get<T: DeserializeOwned>(&self, bucket: &str, key: &str) -> Result<T> {
        instrumented("get", || {
            let bytes = self
                .engine
                .view(|tx| find_read(tx, bucket, key))?
                .ok_or_else(|| StoreError::not_found(bucket, key))?;
            Codec::decode(&bytes)
        })
    }

    /// Whether `key` is present in `bucket`, without decoding its value.
    pub fn contains(&self, bucket: &str, key: &str) -> Result<bool> {
        instrumented("contains", || {
            self.engine
                .view(|tx| find_read(tx, bucket, key).map(|found| found.is_some()))
        })
    }

    /// Keys of `bucket` in order.
    pub fn keys(&self, bucket: &str) -> Result<Vec<String>> {
        instrumented("keys", || {
            let raw = self.engine.view(|tx| tx.keys(bucket))?;
            // Keys only ever enter the store as &str.
            Ok(raw
                .into_iter()
                .map(|k| String::from_utf8_lossy(&k).into_owned())
                .collect())
        })
    }

    /// Remove `key`. Fails with `StoreError::NotFound` if it is not present.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        instrumented("delete", || {
            self.engine.update(|tx| {
                if find_write(tx, bucket, key)?.is_none() {
                    return Err(StoreError::not_found(bucket, key));
                }
                tx.delete(bucket, key.as_bytes())
            })
        })
    }

    /// Release the underlying database. Every later call fails with `StoreError::Closed`.
    pub fn close(&self) -> Result<()> {
        self.engine.close()
    }
}

// The cursor lands on the first key >= the target, which may only share a prefix with it.
fn exact(found: Option<(Vec<u8>, Vec<u8>)>, key: &str) -> Option<Vec<u8>> {
    match found {
        Some((k, v)) if k == key.as_bytes() => Some(v),
        _ => None,
    }
}

fn find_read(tx: &ReadTx<'_>, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(exact(tx.seek(bucket, key.as_bytes())?, key))
}

fn find_write(tx: &WriteTx<'_>, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(exact(tx.seek(bucket, key.as_bytes())?, key))
}

fn instrumented<T>(op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = f();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) if e.is_not_found() => "not_found",
        Err(_) => "error",
    };
    metrics::counter!(STORE_OPERATIONS_COUNTER, "op" => op, "outcome" => outcome).increment(1);
    metrics::histogram!(STORE_OPERATION_DURATION_HISTOGRAM, "op" => op)
        .record(start.elapsed().as_secs_f64());

    result
}
