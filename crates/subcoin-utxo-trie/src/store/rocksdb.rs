use super::{Direction, NodeStore, StoreIter};
use crate::{Error, Result};
use ::rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

/// Column family names.
mod cf {
    /// Trie nodes.
    /// Key: node prefix (hex text)
    /// Value: TrieNode (bincode)
    pub const NODES: &str = "utxo_trie_nodes";

    /// Status record and other small entries.
    pub const AUX: &str = "aux";
}

/// [`NodeStore`] backed by RocksDB.
pub struct RocksDbNodeStore {
    db: DB,
}

impl RocksDbNodeStore {
    /// Open or create the node store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Point lookups by prefix dominate reads.
        db_opts.set_write_buffer_size(128 * 1024 * 1024);
        db_opts.set_max_write_buffer_number(4);
        db_opts.set_compression_type(::rocksdb::DBCompressionType::Lz4);

        let mut block_opts = ::rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        db_opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(cf::NODES, Options::default()),
            ColumnFamilyDescriptor::new(cf::AUX, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(target: crate::trie::LOG_TARGET, "Opened UTXO trie store at {}", path.display());

        Ok(Self { db })
    }

    /// Open a store in a fresh temporary directory. The directory lives as long as the
    /// returned guard.
    #[cfg(test)]
    pub(crate) fn open_temp() -> Result<(tempfile::TempDir, Self)> {
        let temp_dir = tempfile::tempdir().map_err(Error::Io)?;
        let store = Self::open(temp_dir.path())?;
        Ok((temp_dir, store))
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or(Error::NotInitialized)
    }

    fn clear_cf(&self, cf: &ColumnFamily, batch: &mut WriteBatch) {
        let mut iter = self.db.raw_iterator_cf(cf);
        iter.seek_to_first();
        while iter.valid() {
            if let Some(key) = iter.key() {
                batch.delete_cf(cf, key);
            }
            iter.next();
        }
    }
}

impl NodeStore for RocksDbNodeStore {
    fn get(&self, prefix: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf::NODES)?, prefix.as_bytes())?)
    }

    fn write_batch(&self, entries: Vec<(String, Option<Vec<u8>>)>) -> Result<()> {
        let cf_nodes = self.cf(cf::NODES)?;
        let mut batch = WriteBatch::default();
        for (prefix, value) in entries {
            match value {
                Some(value) => batch.put_cf(cf_nodes, prefix.as_bytes(), value),
                None => batch.delete_cf(cf_nodes, prefix.as_bytes()),
            }
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn iter(&self, direction: Direction) -> StoreIter<'_> {
        let cf_nodes = match self.cf(cf::NODES) {
            Ok(cf) => cf,
            Err(err) => return Box::new(std::iter::once(Err(err))),
        };
        let mode = match direction {
            Direction::Ascending => IteratorMode::Start,
            Direction::Descending => IteratorMode::End,
        };
        Box::new(self.db.iterator_cf(cf_nodes, mode).map(|entry| {
            let (key, value) = entry?;
            let prefix = String::from_utf8(key.into_vec()).map_err(|_| Error::InvalidStoreKey)?;
            Ok((prefix, value.into_vec()))
        }))
    }

    fn clear(&self) -> Result<()> {
        let cf_nodes = self.cf(cf::NODES)?;
        let cf_aux = self.cf(cf::AUX)?;

        let mut batch = WriteBatch::default();
        self.clear_cf(cf_nodes, &mut batch);
        self.clear_cf(cf_aux, &mut batch);
        self.db.write(batch)?;

        tracing::info!(target: crate::trie::LOG_TARGET, "Cleared UTXO trie store");

        Ok(())
    }

    fn get_aux(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get_cf(self.cf(cf::AUX)?, key)?)
    }

    fn insert_aux(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put_cf(self.cf(cf::AUX)?, key, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rocksdb_store_roundtrip() {
        let (_dir, store) = RocksDbNodeStore::open_temp().unwrap();

        store
            .write_batch(vec![
                ("".into(), Some(vec![0])),
                ("00".into(), Some(vec![1])),
                ("ff".into(), Some(vec![2])),
            ])
            .unwrap();
        store.write_batch(vec![("00".into(), None)]).unwrap();
        store.insert_aux(b"status", b"ok").unwrap();

        assert_eq!(store.get("ff").unwrap(), Some(vec![2]));
        assert_eq!(store.get("00").unwrap(), None);
        assert_eq!(store.get_aux(b"status").unwrap(), Some(b"ok".to_vec()));

        let descending: Vec<_> = store
            .iter(Direction::Descending)
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(descending, vec!["ff", ""]);

        store.clear().unwrap();
        assert_eq!(store.iter(Direction::Ascending).count(), 0);
        assert_eq!(store.get_aux(b"status").unwrap(), None);
    }

    #[test]
    fn test_rocksdb_store_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = RocksDbNodeStore::open(temp_dir.path()).unwrap();
            store.put("abcd".into(), vec![7, 7]).unwrap();
        }
        let store = RocksDbNodeStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.get("abcd").unwrap(), Some(vec![7, 7]));
    }
}
