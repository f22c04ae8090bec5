use crate::StoreError;

const HASH_SEED: u32 = 5381;

/// DJB2 variant over raw key bytes: `h = h * 33 + c`, 32-bit wrapping.
///
/// Bytes are sign-extended before they are mixed in, matching the `char`
/// semantics of the guest toolchain the keys were originally hashed with.
pub fn hash(bytes: &[u8]) -> u32 {
    bytes.iter().fold(HASH_SEED, |h, &b| {
        h.wrapping_mul(33).wrapping_add(b as i8 as i32 as u32)
    })
}

#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    entries: Vec<Entry>,
}

impl Bucket {
    fn find(&self, key: &[u8]) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key.as_slice() == key)
    }

    fn find_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.key.as_slice() == key)
    }
}

fn copy_bytes(src: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(src.len())?;
    buf.extend_from_slice(src);
    Ok(buf)
}

fn alloc_buckets(count: usize) -> Result<Vec<Bucket>, StoreError> {
    if count == 0 {
        return Err(StoreError::ZeroBuckets);
    }
    let mut buckets = Vec::new();
    buckets.try_reserve_exact(count)?;
    buckets.resize_with(count, Bucket::default);
    Ok(buckets)
}

/// Fixed-capacity chained hash table over byte keys and values.
///
/// The bucket count is chosen at creation and never changes implicitly; size it
/// for the expected entry count or call [`HashTable::rehash`] explicitly.
#[derive(Debug, Clone)]
pub struct HashTable {
    buckets: Vec<Bucket>,
    len: usize,
}

impl HashTable {
    pub fn with_buckets(bucket_count: usize) -> Result<Self, StoreError> {
        Ok(Self {
            buckets: alloc_buckets(bucket_count)?,
            len: 0,
        })
    }

    #[inline]
    fn bucket_index(&self, key: &[u8]) -> usize {
        hash(key) as usize % self.buckets.len()
    }

    /// Inserts `value` under `key`, replacing the value of an existing entry in
    /// place.
    ///
    /// On error nothing was modified: the previous value (if any) is still
    /// stored.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let index = self.bucket_index(key);
        let bucket = &mut self.buckets[index];

        if let Some(entry) = bucket.find_mut(key) {
            entry.value = copy_bytes(value)?;
            return Ok(());
        }

        let key = copy_bytes(key)?;
        let value = copy_bytes(value)?;
        bucket.entries.try_reserve(1)?;
        bucket.entries.push(Entry { key, value });
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.buckets[self.bucket_index(key)]
            .find(key)
            .map(|e| e.value.as_slice())
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.buckets[self.bucket_index(key)].find(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Calls `visit` once per entry, bucket by bucket and in insertion order
    /// within a bucket.
    pub fn for_each(&self, mut visit: impl FnMut(&[u8], &[u8])) {
        for (key, value) in self.iter() {
            visit(key, value);
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            buckets: self.buckets.iter(),
            entries: Default::default(),
        }
    }

    /// Drops every entry. The bucket count is kept.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.entries = Vec::new();
        }
        self.len = 0;
    }

    /// Redistributes all entries over `bucket_count` buckets.
    ///
    /// Every allocation is made before any entry moves, so on error the table
    /// keeps its old layout.
    pub fn rehash(&mut self, bucket_count: usize) -> Result<(), StoreError> {
        let mut buckets = alloc_buckets(bucket_count)?;

        let mut per_bucket = Vec::new();
        per_bucket.try_reserve_exact(bucket_count)?;
        per_bucket.resize(bucket_count, 0usize);
        for bucket in &self.buckets {
            for entry in &bucket.entries {
                per_bucket[hash(&entry.key) as usize % bucket_count] += 1;
            }
        }
        for (bucket, &count) in buckets.iter_mut().zip(&per_bucket) {
            bucket.entries.try_reserve_exact(count)?;
        }

        for bucket in std::mem::take(&mut self.buckets) {
            for entry in bucket.entries {
                let index = hash(&entry.key) as usize % bucket_count;
                buckets[index].entries.push(entry);
            }
        }
        self.buckets = buckets;
        Ok(())
    }
}

pub struct Iter<'a> {
    buckets: std::slice::Iter<'a, Bucket>,
    entries: std::slice::Iter<'a, Entry>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.entries.next() {
                return Some((entry.key.as_slice(), entry.value.as_slice()));
            }
            self.entries = self.buckets.next()?.entries.iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(hash(b""), 5381);
        // 5381 * 33 + 'a'
        assert_eq!(hash(b"a"), 177_670);
        // High bytes are mixed sign-extended.
        assert_eq!(hash(&[0xFF]), 5381u32.wrapping_mul(33).wrapping_sub(1));
    }

    #[test]
    fn zero_buckets_is_rejected() {
        assert_eq!(
            HashTable::with_buckets(0).unwrap_err(),
            StoreError::ZeroBuckets
        );
    }

    #[test]
    fn put_replaces_in_place() {
        let mut table = HashTable::with_buckets(4).unwrap();
        table.put(b"vector", &[1, 2, 3, 4]).unwrap();
        table.put(b"vector", &[9]).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.get(b"vector"), Some(&[9u8][..]));
    }

    #[test]
    fn keys_must_match_in_length_and_content() {
        let mut table = HashTable::with_buckets(1).unwrap();
        table.put(&[0, 0, 0, 8], b"long").unwrap();

        assert!(table.get(&[0, 0, 0]).is_none());
        assert!(table.get(&[0, 0, 0, 8, 0]).is_none());
        assert!(!table.contains_key(&[0, 0, 0, 9]));
        assert!(table.contains_key(&[0, 0, 0, 8]));
    }

    #[test]
    fn empty_key_is_a_regular_key() {
        let mut table = HashTable::with_buckets(3).unwrap();
        assert!(table.get(b"").is_none());
        table.put(b"", b"empty").unwrap();
        assert_eq!(table.get(b""), Some(&b"empty"[..]));
    }

    #[test]
    fn single_bucket_keeps_insertion_order() {
        let mut table = HashTable::with_buckets(1).unwrap();
        for i in 0u8..5 {
            table.put(&[i], &[i * 2]).unwrap();
        }

        let mut seen = Vec::new();
        table.for_each(|k, v| seen.push((k[0], v[0])));
        assert_eq!(seen, vec![(0, 0), (1, 2), (2, 4), (3, 6), (4, 8)]);
    }

    #[test]
    fn rehash_keeps_every_entry() {
        let mut table = HashTable::with_buckets(2).unwrap();
        for i in 0u32..64 {
            table.put(&i.to_be_bytes(), &(i * 3).to_be_bytes()).unwrap();
        }

        table.rehash(37).unwrap();
        assert_eq!(table.bucket_count(), 37);
        assert_eq!(table.len(), 64);
        for i in 0u32..64 {
            assert_eq!(table.get(&i.to_be_bytes()), Some(&(i * 3).to_be_bytes()[..]));
        }

        assert_eq!(table.rehash(0), Err(StoreError::ZeroBuckets));
        assert_eq!(table.bucket_count(), 37);
    }

    #[test]
    fn clear_releases_entries() {
        let mut table = HashTable::with_buckets(8).unwrap();
        table.put(b"a", b"1").unwrap();
        table.put(b"b", b"2").unwrap();
        table.clear();

        assert!(table.is_empty());
        assert_eq!(table.iter().count(), 0);
        assert_eq!(table.bucket_count(), 8);
    }
}
