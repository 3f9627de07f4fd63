//! RocksDB-backed persistent chain storage.
//!
//! Implements [`ChainStore`] over column families for blocks, the two
//! height indexes, account balances, and metadata. The chain journals its
//! own multi-key mutations, so every trait method is a single point
//! read/write; atomicity across keys is the chain's responsibility.
//!
//! An unreadable or structurally corrupt database is fatal at open time.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, DB, Options};

use lode_chain::ChainStore;
use lode_core::error::ChainError;
use lode_core::types::{Block, Hash256, PubKey};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_BLOCK_HEIGHTS: &str = "block_heights";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_BALANCES: &str = "balances";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_BLOCK_HEIGHTS,
    CF_HEIGHT_INDEX,
    CF_BALANCES,
    CF_METADATA,
];

// --- Metadata keys ---

const META_HEAD: &[u8] = b"head";
const META_INITIALIZED: &[u8] = b"initialized";

/// RocksDB-backed persistent chain storage.
///
/// Blocks are stored under their hash in the wire encoding; the height
/// index keys heights big-endian so the primary chain iterates in order.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path, creating all
    /// column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| ChainError::Store(e.to_string()))?;

        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), ChainError> {
        self.db
            .flush()
            .map_err(|e| ChainError::Store(e.to_string()))
    }

    /// Get a column family handle, failing on a missing family.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, ChainError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ChainError::Store(format!("missing column family: {name}")))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>, ChainError> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| ChainError::Store(e.to_string()))
    }

    fn put_cf(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<(), ChainError> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| ChainError::Store(e.to_string()))
    }

    fn delete_cf(&self, cf_name: &str, key: &[u8]) -> Result<(), ChainError> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| ChainError::Store(e.to_string()))
    }

    fn decode_hash(bytes: &[u8]) -> Result<Hash256, ChainError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChainError::Store("invalid stored hash length".into()))?;
        Ok(Hash256(array))
    }

    fn decode_u64(bytes: &[u8]) -> Result<u64, ChainError> {
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| ChainError::Store("invalid stored integer length".into()))?;
        Ok(u64::from_le_bytes(array))
    }
}

impl ChainStore for RocksStore {
    fn put_block(&mut self, block: &Block) -> Result<(), ChainError> {
        let encoded = block.encode()?;
        self.put_cf(CF_BLOCKS, block.hash().as_bytes(), &encoded)
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        match self.get_cf(CF_BLOCKS, hash.as_bytes())? {
            Some(bytes) => Ok(Some(Block::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_block(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.delete_cf(CF_BLOCKS, hash.as_bytes())
    }

    fn block_hashes(&self) -> Result<Vec<Hash256>, ChainError> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let mut hashes = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key_bytes, _) = item.map_err(|e| ChainError::Store(e.to_string()))?;
            hashes.push(Self::decode_hash(&key_bytes)?);
        }
        Ok(hashes)
    }

    fn set_block_height(&mut self, hash: &Hash256, height: u64) -> Result<(), ChainError> {
        self.put_cf(CF_BLOCK_HEIGHTS, hash.as_bytes(), &height.to_le_bytes())
    }

    fn block_height(&self, hash: &Hash256) -> Result<Option<u64>, ChainError> {
        match self.get_cf(CF_BLOCK_HEIGHTS, hash.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_u64(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_block_height(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.delete_cf(CF_BLOCK_HEIGHTS, hash.as_bytes())
    }

    fn set_hash_at_height(&mut self, height: u64, hash: &Hash256) -> Result<(), ChainError> {
        self.put_cf(CF_HEIGHT_INDEX, &Self::height_key(height), hash.as_bytes())
    }

    fn hash_at_height(&self, height: u64) -> Result<Option<Hash256>, ChainError> {
        match self.get_cf(CF_HEIGHT_INDEX, &Self::height_key(height))? {
            Some(bytes) => Ok(Some(Self::decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete_hash_at_height(&mut self, height: u64) -> Result<(), ChainError> {
        self.delete_cf(CF_HEIGHT_INDEX, &Self::height_key(height))
    }

    fn set_balance(&mut self, key: &PubKey, balance: u64) -> Result<(), ChainError> {
        if balance == 0 && *key != PubKey::ZERO {
            self.delete_cf(CF_BALANCES, key.as_bytes())
        } else {
            self.put_cf(CF_BALANCES, key.as_bytes(), &balance.to_le_bytes())
        }
    }

    fn balances(&self) -> Result<Vec<(PubKey, u64)>, ChainError> {
        let cf = self.cf_handle(CF_BALANCES)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(&cf, rocksdb::IteratorMode::Start) {
            let (key_bytes, value_bytes) = item.map_err(|e| ChainError::Store(e.to_string()))?;
            let key = Self::decode_hash(&key_bytes)?;
            rows.push((PubKey(key.0), Self::decode_u64(&value_bytes)?));
        }
        Ok(rows)
    }

    fn set_head(&mut self, hash: &Hash256) -> Result<(), ChainError> {
        self.put_cf(CF_METADATA, META_HEAD, hash.as_bytes())
    }

    fn head(&self) -> Result<Option<Hash256>, ChainError> {
        match self.get_cf(CF_METADATA, META_HEAD)? {
            Some(bytes) => Ok(Some(Self::decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_initialized(&mut self) -> Result<(), ChainError> {
        self.put_cf(CF_METADATA, META_INITIALIZED, &[1])
    }

    fn initialized(&self) -> Result<bool, ChainError> {
        Ok(self.get_cf(CF_METADATA, META_INITIALIZED)?.is_some())
    }
}
