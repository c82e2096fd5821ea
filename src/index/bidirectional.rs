//! `BidirectionalIndex<K, I>`: key -> dense id and back (spec §4.6).
//!
//! Grounded on the teacher's `BrandedInterner` (`collections/other/interner.rs`):
//! the same append-only backing storage plus a custom open-addressing hash
//! table keyed by cached hash, generalised by (a) dropping the
//! `GhostToken`/`'brand` machinery -- this index is owned outright rather
//! than shared under a token -- and (b) adding the reverse-array/common-buffer
//! persistence contract the corpus on-disk format needs.

use super::ids::IndexInt;
use crate::error::{Error, Result};
use crate::io::format::{check_signature, check_size, save_atomically, signature, SIGNATURE_LEN};
use std::hash::{BuildHasher, Hash, Hasher};
use std::io::{Read, Write};
use std::path::Path;

const SIGNATURE: [u8; SIGNATURE_LEN] = signature(b"\x7FBiDIndex");

#[derive(Clone, Copy)]
struct Entry {
    hash: u64,
    index: usize,
}

/// Maps a key to a dense `[0, n)` id and back (spec §4.6).
///
/// `storage[id]` is simultaneously the "reverse array": since ids are only
/// ever assigned in insertion order by `add_key`, no separate reverse-build
/// pass is needed the way a general hash map would require.
pub struct BidirectionalIndex<K, I: IndexInt = u32> {
    storage: Vec<K>,
    buckets: Vec<Option<Entry>>,
    error_id: I,
    /// Number of leading `storage` entries that alias a shared/mmap'd key
    /// buffer rather than owning their bytes (spec §4.6 "common buffer"):
    /// a save must not re-serialise them, and in the original C++ a drop
    /// must not free them individually. `Vec<K>` always owns uniformly in
    /// Rust, so here this is purely a bookkeeping count for (de)serialisation.
    common_buffer_len: usize,
}

impl<K: Hash + Eq + Clone, I: IndexInt> Default for BidirectionalIndex<K, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, I: IndexInt> BidirectionalIndex<K, I> {
    pub fn new() -> Self {
        Self { storage: Vec::new(), buckets: vec![None; 4], error_id: I::error_id(), common_buffer_len: 0 }
    }

    /// Overrides the sentinel id returned by `get_index` for absent keys
    /// (spec §4.6: "a configurable error id, default all-ones").
    pub fn with_error_id(mut self, error_id: I) -> Self {
        self.error_id = error_id;
        self
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn error_id(&self) -> I {
        self.error_id
    }

    /// Whether `id` points into the shared common-buffer prefix.
    pub fn is_common_buffer(&self, id: I) -> bool {
        id.as_usize() < self.common_buffer_len
    }

    fn hash_of<Q: ?Sized + Hash>(key: &Q) -> u64 {
        let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn find_slot<Q>(&self, key: &Q, hash: u64) -> Result<usize, usize>
    where
        K: std::borrow::Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mask = self.buckets.len() - 1;
        let mut idx = (hash as usize) & mask;
        for _ in 0..self.buckets.len() {
            match &self.buckets[idx] {
                None => return Err(idx),
                Some(entry) if entry.hash == hash && self.storage[entry.index].borrow() == key => {
                    return Ok(entry.index)
                }
                _ => {}
            }
            idx = (idx + 1) & mask;
        }
        Err(idx)
    }

    fn resize(&mut self) {
        let new_cap = self.buckets.len() * 2;
        let mut new_buckets = vec![None; new_cap];
        let mask = new_cap - 1;
        for entry in self.buckets.iter().flatten() {
            let mut idx = (entry.hash as usize) & mask;
            while new_buckets[idx].is_some() {
                idx = (idx + 1) & mask;
            }
            new_buckets[idx] = Some(*entry);
        }
        self.buckets = new_buckets;
    }

    /// Idempotent: returns the existing id if `key` is already present,
    /// otherwise assigns `len()` as its id and inserts it.
    pub fn add_key(&mut self, key: K) -> I {
        let hash = Self::hash_of(&key);
        if self.storage.len() * 4 >= self.buckets.len() * 3 {
            self.resize();
        }
        match self.find_slot(&key, hash) {
            Ok(index) => I::from_usize(index),
            Err(slot) => {
                let index = self.storage.len();
                self.storage.push(key);
                self.buckets[slot] = Some(Entry { hash, index });
                I::from_usize(index)
            }
        }
    }

    /// Looks up `key`'s id, or `error_id()` if absent.
    pub fn get_index<Q>(&self, key: &Q) -> I
    where
        K: std::borrow::Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let hash = Self::hash_of(key);
        match self.find_slot(key, hash) {
            Ok(index) => I::from_usize(index),
            Err(_) => self.error_id,
        }
    }

    /// Looks up the key for `id`.
    pub fn get_key(&self, id: I) -> Option<&K> {
        self.storage.get(id.as_usize())
    }

    /// Freezes the index. Present for parity with the spec's contract
    /// (`finalize()` builds the reverse array); here the reverse array is
    /// already `storage`, so this only fixes its capacity.
    pub fn finalize(&mut self) {
        self.storage.shrink_to_fit();
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &K)> {
        self.storage.iter().enumerate().map(|(i, k)| (I::from_usize(i), k))
    }
}

impl<I: IndexInt> BidirectionalIndex<String, I> {
    /// Persists the index (spec §6: signature `"\x7FBiDIndex"`, then a u64
    /// count, then the keys as length-prefixed UTF-8).
    pub fn save(&self, path: &Path) -> Result<()> {
        save_atomically(path, |file| {
            file.write_all(&SIGNATURE)?;
            file.write_all(&(self.storage.len() as u64).to_le_bytes())?;
            for key in &self.storage {
                let bytes = key.as_bytes();
                file.write_all(&(bytes.len() as u32).to_le_bytes())?;
                file.write_all(bytes)?;
            }
            Ok(())
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut header = [0u8; SIGNATURE_LEN + 8];
        file.read_exact(&mut header)?;
        check_signature(&header[..SIGNATURE_LEN], &SIGNATURE)?;
        let count = u64::from_le_bytes(header[SIGNATURE_LEN..].try_into().unwrap()) as usize;

        let mut index = Self::new();
        for _ in 0..count {
            let mut len_buf = [0u8; 4];
            file.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf) as usize;
            let mut bytes = vec![0u8; len];
            file.read_exact(&mut bytes)?;
            let key = String::from_utf8(bytes).map_err(|_| Error::BadFormat)?;
            index.add_key(key);
        }
        check_size(index.len(), count)?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_key_is_idempotent() {
        let mut idx: BidirectionalIndex<String, u32> = BidirectionalIndex::new();
        let a = idx.add_key("alpha".to_string());
        let b = idx.add_key("beta".to_string());
        let a_again = idx.add_key("alpha".to_string());
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn round_trips_key_to_index_and_back() {
        let mut idx: BidirectionalIndex<String, u32> = BidirectionalIndex::new();
        let id = idx.add_key("hello".to_string());
        assert_eq!(idx.get_key(id), Some(&"hello".to_string()));
    }

    #[test]
    fn missing_key_returns_error_id() {
        let idx: BidirectionalIndex<String, u32> = BidirectionalIndex::new();
        assert_eq!(idx.get_index("missing"), u32::MAX);
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut idx: BidirectionalIndex<String, u32> = BidirectionalIndex::new();
        idx.add_key("a".to_string());
        idx.add_key("b".to_string());
        idx.add_key("c".to_string());

        let dir = std::env::temp_dir()
            .join(format!("bidindex-test-{}-{:?}", std::process::id(), std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("index.bin");
        idx.save(&path).unwrap();

        let loaded: BidirectionalIndex<String, u32> = BidirectionalIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), idx.len());
        assert_eq!(loaded.get_key(1), Some(&"b".to_string()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
