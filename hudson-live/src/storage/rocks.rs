//! RocksDB-backed store for sets, memberships and state pointers.
//!
//! Column families:
//! - `sets`       : set records (bincode), keyed by set id
//! - `tenant_sets`: listing index, keyed by `tenant_id:set_id`
//! - `slugs`      : slug uniqueness index, `tenant_id:slug` → set id
//! - `memberships`: membership records, keyed by membership id
//! - `positions`  : ordering index, `set_id:position(u32 BE)` → membership id
//! - `pointers`   : one state pointer per set, keyed by set id
//!
//! Reads here are lock-free and see the latest committed state; multi-row
//! reads go through a RocksDB snapshot so they never mix two commits.
//! All writes go through [`StoreTxn`](super::txn::StoreTxn).

use hudson_core::{LiveError, LiveSet, Membership, MembershipId, Position, SetId, StatePointer, TenantId};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::txn::StoreTxn;

/// Column families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Column {
    Sets,
    TenantSets,
    Slugs,
    Memberships,
    Positions,
    Pointers,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::Sets,
        Column::TenantSets,
        Column::Slugs,
        Column::Memberships,
        Column::Positions,
        Column::Pointers,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Sets => "sets",
            Column::TenantSets => "tenant_sets",
            Column::Slugs => "slugs",
            Column::Memberships => "memberships",
            Column::Positions => "positions",
            Column::Pointers => "pointers",
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every commit (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("hudson_data"),
            block_cache_size: 64 * 1024 * 1024, // 64MB
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024, // 8MB
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024, // 4MB
        }
    }
}

/// Storage errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StoreError> for LiveError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConstraintViolation(msg) => LiveError::ConstraintViolation(msg),
            other => LiveError::Storage(other.to_string()),
        }
    }
}

pub(crate) fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))
}

pub(crate) fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

pub(crate) fn id_key(id: &[u8; 16]) -> Vec<u8> {
    id.to_vec()
}

pub(crate) fn tenant_set_key(tenant_id: TenantId, set_id: SetId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(set_id.as_bytes());
    key
}

pub(crate) fn slug_key(tenant_id: TenantId, slug: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + slug.len());
    key.extend_from_slice(tenant_id.as_bytes());
    key.extend_from_slice(slug.as_bytes());
    key
}

/// Build a position key: set_id (16 bytes) + position (4 bytes big-endian).
pub(crate) fn position_key(set_id: SetId, position: Position) -> Vec<u8> {
    let mut key = Vec::with_capacity(20);
    key.extend_from_slice(set_id.as_bytes());
    key.extend_from_slice(&position.to_be_bytes());
    key
}

pub(crate) fn decode_membership_id(bytes: &[u8]) -> Result<MembershipId, StoreError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::DeserializationError("Invalid membership id".into()))?;
    Ok(MembershipId::from_bytes(raw))
}

pub(crate) fn decode_set_id(bytes: &[u8]) -> Result<SetId, StoreError> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| StoreError::DeserializationError("Invalid set id".into()))?;
    Ok(SetId::from_bytes(raw))
}

/// RocksDB-backed live store.
pub struct LiveStore {
    /// RocksDB instance (single-threaded mode, writers serialized by per-set locks)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl LiveStore {
    /// Open the store at the configured path, creating it if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Column::ALL
            .iter()
            .map(|column| ColumnFamilyDescriptor::new(column.name(), Self::cf_options(*column, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Live store opened at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(column: Column, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match column {
            Column::Sets | Column::Memberships | Column::Slugs => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            Column::Positions | Column::TenantSets => {
                // Prefix-scanned by the leading 16-byte id
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            Column::Pointers => {
                // Hot, tiny, rewritten on every navigation
                opts.set_max_write_buffer_number(4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }

        opts
    }

    /// Start a staged transaction.
    pub fn begin(&self) -> StoreTxn<'_> {
        StoreTxn::new(self)
    }

    // ─── Committed reads ──────────────────────────────────────────────

    pub fn load_set(&self, set_id: SetId) -> Result<Option<LiveSet>, StoreError> {
        self.get_raw(Column::Sets, set_id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// All sets of a tenant, in key order.
    pub fn list_sets(&self, tenant_id: TenantId) -> Result<Vec<LiveSet>, StoreError> {
        let snapshot = self.db.snapshot();
        let index = self.cf(Column::TenantSets)?;
        let sets_cf = self.cf(Column::Sets)?;
        let prefix: &[u8] = tenant_id.as_bytes();

        let mut sets = Vec::new();
        let iter = snapshot.iterator_cf(index, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(bytes) = snapshot.get_cf(sets_cf, &key[16..])? {
                sets.push(decode_record(&bytes)?);
            }
        }
        Ok(sets)
    }

    pub fn load_membership(&self, id: MembershipId) -> Result<Option<Membership>, StoreError> {
        self.get_raw(Column::Memberships, id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// Memberships of a set ordered by position, read from one snapshot.
    pub fn list_memberships(&self, set_id: SetId) -> Result<Vec<Membership>, StoreError> {
        let snapshot = self.db.snapshot();
        let positions = self.cf(Column::Positions)?;
        let records = self.cf(Column::Memberships)?;
        let prefix: &[u8] = set_id.as_bytes();

        let mut memberships = Vec::new();
        let iter = snapshot.iterator_cf(positions, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(bytes) = snapshot.get_cf(records, &value)? {
                memberships.push(decode_record(&bytes)?);
            }
        }
        Ok(memberships)
    }

    pub fn load_pointer(&self, set_id: SetId) -> Result<Option<StatePointer>, StoreError> {
        self.get_raw(Column::Pointers, set_id.as_bytes())?
            .map(|bytes| decode_record(&bytes))
            .transpose()
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // ─── Raw access for transactions ──────────────────────────────────

    pub(crate) fn get_raw(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let cf = self.cf(column)?;
        Ok(self.db.get_cf(cf, key)?)
    }

    /// Committed entries whose key starts with `prefix`, in key order.
    pub(crate) fn scan_raw(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let cf = self.cf(column)?;
        let mut entries = Vec::new();
        let iter = self.db.iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    /// Land staged writes as one atomic batch. `None` deletes the key.
    pub(crate) fn apply<'a, I>(&self, writes: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = (Column, &'a [u8], Option<&'a [u8]>)>,
    {
        let mut batch = WriteBatch::default();
        let mut count = 0;
        for (column, key, value) in writes {
            let cf = self.cf(column)?;
            match value {
                Some(value) => batch.put_cf(cf, key, value),
                None => batch.delete_cf(cf, key),
            }
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(count)
    }

    fn cf(&self, column: Column) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db.cf_handle(column.name()).ok_or_else(|| {
            StoreError::DatabaseError(format!("Column family '{}' not found", column.name()))
        })
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
