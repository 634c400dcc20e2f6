//! RocksDB-backed graph store
//!
//! Persistent storage for entities and relationships using a RocksDB
//! `TransactionDB` with LZ4 compression. Every key is prefixed by record kind
//! and tenant; components are separated by a NUL byte so prefix scans stay
//! inside one tenant.
//!
//! | key                                   | value                  |
//! |---------------------------------------|------------------------|
//! | `ent:{group}\0{entity_id}`            | entity (MessagePack)   |
//! | `vec:{group}\0{entity_id}`            | embedding (bincode)    |
//! | `typ:{group}\0{type}\0{entity_id}`    | empty                  |
//! | `epi:{group}\0{uuid}\0{entity_id}`    | empty                  |
//! | `rel:{group}\0{src}\0{tgt}\0{type}`   | relationship (MessagePack) |
//! | `rin:{group}\0{tgt}\0{src}\0{type}`   | empty                  |

use rocksdb::{
    Direction, ErrorKind, IteratorMode, Options, Transaction, TransactionDB, TransactionDBOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::{GraphError, Result};

const SCHEMA_VERSION_KEY: &[u8] = b"_schema_version";
const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Lock wait before a contended transaction gives up
const LOCK_TIMEOUT_MS: i64 = 2_000;

const SEP: char = '\0';

/// Key construction helpers
pub mod keys {
    use super::SEP;

    pub fn entity(group: &str, entity_id: &str) -> Vec<u8> {
        format!("ent:{}{}{}", group, SEP, entity_id).into_bytes()
    }

    pub fn entity_prefix(group: &str) -> Vec<u8> {
        format!("ent:{}{}", group, SEP).into_bytes()
    }

    pub fn vector(group: &str, entity_id: &str) -> Vec<u8> {
        format!("vec:{}{}{}", group, SEP, entity_id).into_bytes()
    }

    pub fn type_index(group: &str, entity_type: &str, entity_id: &str) -> Vec<u8> {
        format!("typ:{}{}{}{}{}", group, SEP, entity_type, SEP, entity_id).into_bytes()
    }

    pub fn type_prefix(group: &str, entity_type: &str) -> Vec<u8> {
        format!("typ:{}{}{}{}", group, SEP, entity_type, SEP).into_bytes()
    }

    pub fn episode_index(group: &str, episode_uuid: &str, entity_id: &str) -> Vec<u8> {
        format!("epi:{}{}{}{}{}", group, SEP, episode_uuid, SEP, entity_id).into_bytes()
    }

    pub fn episode_prefix(group: &str, episode_uuid: &str) -> Vec<u8> {
        format!("epi:{}{}{}{}", group, SEP, episode_uuid, SEP).into_bytes()
    }

    pub fn relationship(group: &str, source: &str, target: &str, rel_type: &str) -> Vec<u8> {
        format!(
            "rel:{}{}{}{}{}{}{}",
            group, SEP, source, SEP, target, SEP, rel_type
        )
        .into_bytes()
    }

    pub fn outgoing_prefix(group: &str, source: &str) -> Vec<u8> {
        format!("rel:{}{}{}{}", group, SEP, source, SEP).into_bytes()
    }

    pub fn incoming(group: &str, target: &str, source: &str, rel_type: &str) -> Vec<u8> {
        format!(
            "rin:{}{}{}{}{}{}{}",
            group, SEP, target, SEP, source, SEP, rel_type
        )
        .into_bytes()
    }

    pub fn incoming_prefix(group: &str, target: &str) -> Vec<u8> {
        format!("rin:{}{}{}{}", group, SEP, target, SEP).into_bytes()
    }

    /// Components of a key after `prefix`, split on the separator
    pub fn tail(key: &[u8], prefix: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(&key[prefix.len().min(key.len())..])
            .split(SEP)
            .map(str::to_string)
            .collect()
    }
}

/// Encode a record as a MessagePack map
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a MessagePack record
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Translate a lock conflict on a uniqueness check into the domain error
pub fn map_conflict(err: rocksdb::Error, what: impl FnOnce() -> String) -> GraphError {
    match err.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut => GraphError::DuplicateEntity(what()),
        _ => GraphError::Storage(err),
    }
}

/// Transactional graph store
#[derive(Clone)]
pub struct GraphStore {
    db: Arc<TransactionDB>,
}

impl GraphStore {
    /// Open (or create) a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        txn_opts.set_txn_lock_timeout(LOCK_TIMEOUT_MS);

        let db: TransactionDB = TransactionDB::open(&opts, &txn_opts, path)?;
        let store = Self { db: Arc::new(db) };
        store.check_schema_version()?;

        log::info!("GraphStore opened at: {}", path.display());
        Ok(store)
    }

    /// Stamp a fresh database and refuse one written by a newer schema
    fn check_schema_version(&self) -> Result<()> {
        let stored = match self.db.get(SCHEMA_VERSION_KEY)? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| GraphError::store("Invalid schema version format"))?;
                Some(u32::from_le_bytes(raw))
            }
            None => None,
        };

        match stored {
            Some(version) if version > CURRENT_SCHEMA_VERSION => {
                Err(GraphError::store(format!(
                    "Database schema v{} is newer than supported v{}",
                    version, CURRENT_SCHEMA_VERSION
                )))
            }
            Some(version) if version == CURRENT_SCHEMA_VERSION => Ok(()),
            _ => {
                log::debug!("Writing schema version v{}", CURRENT_SCHEMA_VERSION);
                self.db
                    .put(SCHEMA_VERSION_KEY, CURRENT_SCHEMA_VERSION.to_le_bytes())?;
                Ok(())
            }
        }
    }

    /// Begin a pessimistic transaction
    pub fn transaction(&self) -> Transaction<'_, TransactionDB> {
        self.db.transaction()
    }

    /// Read and decode a record outside any transaction
    pub fn get<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a stored embedding
    pub fn get_vector(&self, key: &[u8]) -> Result<Option<Vec<f32>>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist an embedding outside any transaction
    pub fn put_vector(&self, key: &[u8], vector: &[f32]) -> Result<()> {
        self.db.put(key, bincode::serialize(vector)?)?;
        Ok(())
    }

    /// All key/value pairs under `prefix`, in key order
    pub fn scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// All keys under `prefix`, in key order
    pub fn scan_keys(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.scan(prefix)?.into_iter().map(|(k, _)| k).collect())
    }

    /// Decode every record under `prefix`, skipping undecodable ones
    pub fn scan_records<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>> {
        let mut records = Vec::new();
        let mut skipped = 0;
        for (key, value) in self.scan(prefix)? {
            match decode::<T>(&value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!(
                        "Failed to decode record {}: {}. Skipping.",
                        String::from_utf8_lossy(&key),
                        e
                    );
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log::warn!("Skipped {} records due to decode errors", skipped);
        }
        Ok(records)
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    }

    #[test]
    fn test_open_writes_schema_version() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::open(dir.path()).unwrap();
        let raw = store.db.get(SCHEMA_VERSION_KEY).unwrap().unwrap();
        assert_eq!(raw, CURRENT_SCHEMA_VERSION.to_le_bytes().to_vec());
    }

    #[test]
    fn test_reopen_and_newer_schema_rejected() {
        let dir = TempDir::new().unwrap();
        {
            let store = GraphStore::open(dir.path()).unwrap();
            store
                .db
                .put(SCHEMA_VERSION_KEY, (CURRENT_SCHEMA_VERSION + 1).to_le_bytes())
                .unwrap();
        }
        let err = GraphStore::open(dir.path()).err().unwrap();
        assert_eq!(err.error_type(), "StoreError");
    }

    #[test]
    fn test_encode_decode_skips_absent_options() {
        let sample = Sample {
            id: "a".into(),
            note: None,
        };
        let bytes = encode(&sample).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_scan_stays_inside_prefix() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::open(dir.path()).unwrap();

        let txn = store.transaction();
        for (group, id) in [("teama", "x"), ("teama", "y"), ("teamab", "z"), ("teamb", "w")] {
            let record = Sample {
                id: id.to_string(),
                note: None,
            };
            txn.put(keys::entity(group, id), encode(&record).unwrap())
                .unwrap();
        }
        txn.commit().unwrap();

        let records: Vec<Sample> = store.scan_records(&keys::entity_prefix("teama")).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[test]
    fn test_key_tail() {
        let prefix = keys::outgoing_prefix("g", "src");
        let key = keys::relationship("g", "src", "tgt", "USES");
        assert_eq!(keys::tail(&key, &prefix), vec!["tgt", "USES"]);
    }

    #[test]
    fn test_vectors_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = GraphStore::open(dir.path()).unwrap();
        let key = keys::vector("g", "e");
        assert!(store.get_vector(&key).unwrap().is_none());
        store.put_vector(&key, &[0.5, -0.25]).unwrap();
        assert_eq!(store.get_vector(&key).unwrap(), Some(vec![0.5, -0.25]));
    }
}
