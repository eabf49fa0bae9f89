//! Hybrid array + hash tables.
//!
//! Non-negative integer keys that stay dense live in the array part; every
//! other key goes to the hash part. The hash part keeps entries in insertion
//! order (values may be nil; entries are never removed) with a `hashbrown`
//! index on the side, so iteration with `next` is stable and key hashing can
//! be supplied by the caller — key equality for string keys needs the heap,
//! which the table itself cannot reach.

use hashbrown::hash_table::HashTable;

use crate::value::Value;

/// Bytes available for the inline debug name.
pub const TABLE_NAME_CAPACITY: usize = 63;

/// Payload of a heap table object.
pub struct Table {
    /// Dense prefix indexed `0..len`.
    pub array: Vec<Value>,
    /// Everything else, in insertion order.
    pub hash: TableHash,
    /// Optional metatable (always a table ref).
    pub metatable: Option<crate::object::GcRef>,
    name: [u8; TABLE_NAME_CAPACITY],
    name_len: u8,
}

impl Table {
    /// Creates a table with the given capacity hints.
    pub fn with_capacity(array_capacity: usize, hash_capacity: usize) -> Self {
        Self {
            array: Vec::with_capacity(array_capacity),
            hash: TableHash::with_capacity(hash_capacity),
            metatable: None,
            name: [0; TABLE_NAME_CAPACITY],
            name_len: 0,
        }
    }

    /// Attaches a debug name, truncated to the inline capacity.
    pub fn assign_name(&mut self, name: &str) {
        let copy_len = name.len().min(TABLE_NAME_CAPACITY);
        self.name[..copy_len].copy_from_slice(&name.as_bytes()[..copy_len]);
        self.name_len = copy_len as u8;
    }

    /// The debug name, empty if none was assigned.
    pub fn name(&self) -> &str {
        std::str::from_utf8(&self.name[..self.name_len as usize]).unwrap_or("")
    }

    /// True when a debug name is present.
    pub fn has_name(&self) -> bool {
        self.name_len > 0
    }

    /// Drops the debug name.
    pub fn clear_name(&mut self) {
        self.name_len = 0;
    }

    /// Border length: the number of leading non-nil array slots.
    pub fn border(&self) -> usize {
        let mut len = 0;
        while len < self.array.len() {
            if self.array[len].is_nil() {
                break;
            }
            len += 1;
        }
        len
    }

    /// Clears content for reuse from the free-table pool.
    pub(crate) fn reset(&mut self) {
        self.metatable = None;
        self.array.clear();
        self.hash.clear();
        self.clear_name();
    }
}

/// One hash-part entry. The key's hash is cached so the index can rehash
/// without consulting the heap.
#[derive(Debug, Clone, Copy)]
pub struct HashEntry {
    pub hash: u64,
    pub key: Value,
    pub value: Value,
}

/// Insertion-ordered map from [`Value`] to [`Value`] with externally supplied
/// hashing and equality.
pub struct TableHash {
    entries: Vec<HashEntry>,
    index: HashTable<u32>,
}

impl TableHash {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: HashTable::with_capacity(capacity),
        }
    }

    /// Number of entries, nil-valued ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the entry slot for a key, given its hash and an equality
    /// predicate (the caller closes over the heap for string content).
    pub fn find_with(&self, hash: u64, mut eq: impl FnMut(Value) -> bool) -> Option<u32> {
        self.index
            .find(hash, |&slot| {
                let entry = &self.entries[slot as usize];
                entry.hash == hash && eq(entry.key)
            })
            .copied()
    }

    /// Entry accessors by slot returned from [`find_with`](Self::find_with).
    pub fn entry(&self, slot: u32) -> &HashEntry {
        &self.entries[slot as usize]
    }

    pub fn value_at(&self, slot: u32) -> Value {
        self.entries[slot as usize].value
    }

    pub fn set_value_at(&mut self, slot: u32, value: Value) {
        self.entries[slot as usize].value = value;
    }

    /// Appends a key known to be absent.
    pub fn insert_new(&mut self, hash: u64, key: Value, value: Value) {
        let slot = self.entries.len() as u32;
        self.entries.push(HashEntry { hash, key, value });
        let entries = &self.entries;
        self.index
            .insert_unique(hash, slot, |&s| entries[s as usize].hash);
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HashEntry> {
        self.entries.iter()
    }

    /// The entry following `slot` in insertion order.
    pub fn entry_after(&self, slot: u32) -> Option<&HashEntry> {
        self.entries.get(slot as usize + 1)
    }

    /// First entry in insertion order.
    pub fn first_entry(&self) -> Option<&HashEntry> {
        self.entries.first()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
        let entries = &self.entries;
        self.index
            .reserve(additional, |&s| entries[s as usize].hash);
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_name() {
            write!(
                f,
                "Table['{}', arr={}, hash={}]",
                self.name(),
                self.array.len(),
                self.hash.len()
            )
        } else {
            write!(f, "Table[arr={}, hash={}]", self.array.len(), self.hash.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_stops_at_first_nil() {
        let mut t = Table::with_capacity(4, 0);
        t.array.push(Value::Integer(1));
        t.array.push(Value::Integer(2));
        t.array.push(Value::Nil);
        t.array.push(Value::Integer(4));
        assert_eq!(t.border(), 2);
    }

    #[test]
    fn debug_name_truncates() {
        let mut t = Table::with_capacity(0, 0);
        t.assign_name(&"n".repeat(100));
        assert_eq!(t.name().len(), TABLE_NAME_CAPACITY);
        assert!(t.has_name());
        t.clear_name();
        assert!(!t.has_name());
    }

    #[test]
    fn hash_part_preserves_insertion_order() {
        let mut h = TableHash::with_capacity(0);
        h.insert_new(10, Value::Integer(-1), Value::Integer(100));
        h.insert_new(20, Value::Boolean(true), Value::Integer(200));
        h.insert_new(30, Value::Integer(-2), Value::Nil);
        let keys: Vec<Value> = h.iter().map(|e| e.key).collect();
        assert!(matches!(keys[0], Value::Integer(-1)));
        assert!(matches!(keys[1], Value::Boolean(true)));
        assert!(matches!(keys[2], Value::Integer(-2)));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn find_with_uses_cached_hash_and_predicate() {
        let mut h = TableHash::with_capacity(0);
        h.insert_new(77, Value::Integer(5), Value::Integer(50));
        let slot = h.find_with(77, |k| matches!(k, Value::Integer(5)));
        assert!(slot.is_some());
        assert!(matches!(h.value_at(slot.unwrap()), Value::Integer(50)));
        assert!(h.find_with(77, |_| false).is_none());
        assert!(h.find_with(78, |_| true).is_none());
    }
}
