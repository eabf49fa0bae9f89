//! Table access: raw paths on the heap, metatable-aware paths on the
//! runtime.
//!
//! Raw access implements the hybrid layout: non-negative integer keys (and
//! integer-valued float keys) index the array part when dense; near-miss
//! writes within [`TABLE_ARRAY_GROWTH_LIMIT`] of the end grow the array;
//! everything else lives in the hash part. The metatable-aware paths layer
//! `__index`/`__newindex` on top: `__index` fires on a miss, `__newindex`
//! only for keys not already present.

use sable_core::limits::TABLE_ARRAY_GROWTH_LIMIT;
use sable_core::{Error, Result};

use crate::heap::Heap;
use crate::metatable::MetaMethod;
use crate::object::GcRef;
use crate::runtime::Runtime;
use crate::value::Value;

/// Chain-depth guard for `__index`/`__newindex` metatable chains.
const MAX_META_CHAIN: usize = 100;

/// Interprets a key as an array index: non-negative integers, and floats
/// that are exactly a non-negative integer.
pub fn key_as_array_index(key: Value) -> Option<usize> {
    match key {
        Value::Integer(i) if i >= 0 => Some(i as usize),
        Value::Number(f) if f.floor() == f && f >= 0.0 && f <= i64::MAX as f64 => {
            Some(f as usize)
        }
        _ => None,
    }
}

/// Where a key's value lives inside a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawSlot {
    Array(usize),
    Hash(u32),
    Absent,
}

impl Heap {
    /// Locates a key without metatable involvement.
    pub(crate) fn table_raw_find(&self, table: GcRef, key: Value) -> RawSlot {
        if let Some(index) = key_as_array_index(key) {
            if index < self.table(table).array.len() {
                return RawSlot::Array(index);
            }
        }
        let t = self.table(table);
        if t.hash.is_empty() {
            return RawSlot::Absent;
        }
        let hash = self.value_hash(key);
        match t.hash.find_with(hash, |probe| self.values_equal(probe, key)) {
            Some(slot) => RawSlot::Hash(slot),
            None => RawSlot::Absent,
        }
    }

    /// `rawget`: array fast path, then hash lookup.
    pub fn table_rawget(&self, table: GcRef, key: Value) -> Value {
        match self.table_raw_find(table, key) {
            RawSlot::Array(index) => self.table(table).array[index],
            RawSlot::Hash(slot) => self.table(table).hash.value_at(slot),
            RawSlot::Absent => Value::Nil,
        }
    }

    /// `rawset`: append/overwrite in the array when the key is dense or a
    /// near miss, otherwise hash insert.
    pub fn table_rawset(&mut self, table: GcRef, key: Value, value: Value) {
        if let Some(index) = key_as_array_index(key) {
            let len = self.table(table).array.len();
            if index == len {
                self.table_mut(table).array.push(value);
                return;
            }
            if index < len {
                self.table_mut(table).array[index] = value;
                return;
            }
            if index < len + TABLE_ARRAY_GROWTH_LIMIT {
                let t = self.table_mut(table);
                t.array.resize(index + 1, Value::Nil);
                t.array[index] = value;
                return;
            }
        }

        let hash = self.value_hash(key);
        let existing = {
            let t = self.table(table);
            t.hash.find_with(hash, |probe| self.values_equal(probe, key))
        };
        match existing {
            Some(slot) => self.table_mut(table).hash.set_value_at(slot, value),
            None => self.table_mut(table).hash.insert_new(hash, key, value),
        }
    }

    /// Border length: leading non-nil run of the array part.
    pub fn table_length(&self, table: GcRef) -> usize {
        self.table(table).border()
    }

    /// Stable iteration: array phase (skipping nils) followed by the hash
    /// part in insertion order. `Nil` starts iteration; `None` means done.
    /// An unknown key also yields `None`.
    pub fn table_rawnext(&self, table: GcRef, key: Value) -> Option<(Value, Value)> {
        let t = self.table(table);

        let array_from = match key {
            Value::Nil => Some(0),
            _ => match key_as_array_index(key) {
                Some(index) if index < t.array.len() => Some(index + 1),
                _ => None,
            },
        };

        if let Some(from) = array_from {
            for (offset, value) in t.array[from.min(t.array.len())..].iter().enumerate() {
                if !value.is_nil() {
                    return Some((Value::Integer((from + offset) as i64), *value));
                }
            }
            // Array exhausted: fall into the hash phase from the start.
            for entry in t.hash.iter() {
                if !entry.value.is_nil() {
                    return Some((entry.key, entry.value));
                }
            }
            return None;
        }

        // Key lives in the hash part: continue after it.
        let hash = self.value_hash(key);
        let slot = t
            .hash
            .find_with(hash, |probe| self.values_equal(probe, key))?;
        let mut cursor = slot;
        loop {
            let next = t.hash.entry_after(cursor)?;
            if !next.value.is_nil() {
                return Some((next.key, next.value));
            }
            cursor += 1;
        }
    }
}

impl Runtime {
    /// Metatable-aware get on a table ref: raw hit wins; on a nil result
    /// `__index` is consulted — a table chains the lookup, a callable is
    /// invoked as `(t, key)`.
    pub fn table_get_with_meta(&mut self, table: GcRef, key: Value) -> Result<Value> {
        let mut current = table;
        for _ in 0..MAX_META_CHAIN {
            let raw = self.heap.table_rawget(current, key);
            if !raw.is_nil() {
                return Ok(raw);
            }
            let table_value = Value::Table(current);
            let mm = self.get_metamethod(table_value, MetaMethod::Index);
            match mm {
                Value::Table(next) => {
                    current = next;
                }
                mm if mm.is_callable() => {
                    let result = self.call_metamethod(mm, &[table_value, key])?;
                    return Ok(if result.has_value() { result } else { Value::Nil });
                }
                _ => return Ok(Value::Nil),
            }
        }
        Err(Error::runtime(
            "'__index' chain too long; possible loop",
            self.current_location(),
        ))
    }

    /// Metatable-aware set: a present key is overwritten in place;
    /// `__newindex` fires only for absent keys — a table chains the store, a
    /// callable is invoked as `(t, key, v)`.
    pub fn table_set_with_meta(&mut self, table: GcRef, key: Value, value: Value) -> Result<()> {
        let mut current = table;
        for _ in 0..MAX_META_CHAIN {
            match self.heap.table_raw_find(current, key) {
                RawSlot::Array(index) => {
                    self.heap.table_mut(current).array[index] = value;
                    return Ok(());
                }
                RawSlot::Hash(slot) => {
                    self.heap.table_mut(current).hash.set_value_at(slot, value);
                    return Ok(());
                }
                RawSlot::Absent => {}
            }
            let table_value = Value::Table(current);
            let mm = self.get_metamethod(table_value, MetaMethod::NewIndex);
            match mm {
                Value::Table(next) => {
                    current = next;
                }
                mm if mm.is_callable() => {
                    return self.call_metamethod_void(mm, &[table_value, key, value]);
                }
                _ => {
                    self.heap.table_rawset(current, key, value);
                    return Ok(());
                }
            }
        }
        Err(Error::runtime(
            "'__newindex' chain too long; possible loop",
            self.current_location(),
        ))
    }

    /// Indexing on an arbitrary value: tables use the table path, userdata
    /// requires an `__index` metamethod, anything else is a type error.
    pub fn index_value(&mut self, container: Value, key: Value) -> Result<Value> {
        match container {
            Value::Table(t) => self.table_get_with_meta(t, key),
            Value::Userdata(_) => {
                let mm = self.get_metamethod(container, MetaMethod::Index);
                match mm {
                    Value::Table(t) => self.table_get_with_meta(t, key),
                    mm if mm.is_callable() => {
                        let result = self.call_metamethod(mm, &[container, key])?;
                        Ok(if result.has_value() { result } else { Value::Nil })
                    }
                    _ => Ok(Value::Nil),
                }
            }
            _ => Err(Error::type_error(
                format!("attempt to index a {} value", container.type_name()),
                self.current_location(),
            )),
        }
    }

    /// Store through an arbitrary value, mirroring [`index_value`].
    pub fn store_value(&mut self, container: Value, key: Value, value: Value) -> Result<()> {
        match container {
            Value::Table(t) => self.table_set_with_meta(t, key, value),
            Value::Userdata(_) => {
                let mm = self.get_metamethod(container, MetaMethod::NewIndex);
                match mm {
                    Value::Table(t) => self.table_set_with_meta(t, key, value),
                    mm if mm.is_callable() => {
                        self.call_metamethod_void(mm, &[container, key, value])
                    }
                    _ => Err(Error::type_error(
                        "attempt to index a userdata value without '__newindex'",
                        self.current_location(),
                    )),
                }
            }
            _ => Err(Error::type_error(
                format!("attempt to index a {} value", container.type_name()),
                self.current_location(),
            )),
        }
    }

    /// `next` with `__pairs`-free semantics for host iteration; metatables
    /// do not affect raw iteration order.
    pub fn table_next(&self, table: GcRef, key: Value) -> Option<(Value, Value)> {
        self.heap.table_rawnext(table, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(heap: &mut Heap) -> GcRef {
        heap.new_table(0, 0)
    }

    #[test]
    fn rawset_appends_and_overwrites_densely() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        heap.table_rawset(t, Value::Integer(0), Value::Integer(10));
        heap.table_rawset(t, Value::Integer(1), Value::Integer(11));
        assert_eq!(heap.table(t).array.len(), 2);
        heap.table_rawset(t, Value::Integer(0), Value::Integer(20));
        assert!(matches!(
            heap.table_rawget(t, Value::Integer(0)),
            Value::Integer(20)
        ));
        assert_eq!(heap.table(t).hash.len(), 0);
    }

    #[test]
    fn near_miss_grows_array_and_far_key_spills_to_hash() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        heap.table_rawset(t, Value::Integer(0), Value::Integer(1));
        heap.table_rawset(t, Value::Integer(10), Value::Integer(2));
        assert_eq!(heap.table(t).array.len(), 11);
        heap.table_rawset(t, Value::Integer(10_000), Value::Integer(3));
        assert_eq!(heap.table(t).hash.len(), 1);
        assert!(matches!(
            heap.table_rawget(t, Value::Integer(10_000)),
            Value::Integer(3)
        ));
    }

    #[test]
    fn float_keys_that_round_exactly_alias_integer_keys() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        heap.table_rawset(t, Value::Integer(2), Value::Integer(7));
        assert!(matches!(
            heap.table_rawget(t, Value::Number(2.0)),
            Value::Integer(7)
        ));
        let key = heap.new_string("k");
        heap.table_rawset(t, Value::String(key), Value::Integer(9));
        let other = heap.new_string("k");
        assert!(matches!(
            heap.table_rawget(t, Value::String(other)),
            Value::Integer(9)
        ));
    }

    #[test]
    fn length_uses_border_semantics() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        for i in 0..5 {
            heap.table_rawset(t, Value::Integer(i), Value::Integer(i));
        }
        assert_eq!(heap.table_length(t), 5);
        heap.table_rawset(t, Value::Integer(2), Value::Nil);
        assert_eq!(heap.table_length(t), 2);
    }

    #[test]
    fn rawnext_walks_array_then_hash() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        heap.table_rawset(t, Value::Integer(0), Value::Integer(100));
        heap.table_rawset(t, Value::Integer(1), Value::Integer(101));
        let key = heap.new_string("s");
        heap.table_rawset(t, Value::String(key), Value::Integer(102));

        let mut seen = Vec::new();
        let mut cursor = Value::Nil;
        while let Some((k, v)) = heap.table_rawnext(t, cursor) {
            seen.push((k, v));
            cursor = k;
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0].1, Value::Integer(100)));
        assert!(matches!(seen[1].1, Value::Integer(101)));
        assert!(matches!(seen[2].1, Value::Integer(102)));
    }

    #[test]
    fn rawnext_skips_nil_array_holes() {
        let mut heap = Heap::new();
        let t = table(&mut heap);
        heap.table_rawset(t, Value::Integer(0), Value::Integer(1));
        heap.table_rawset(t, Value::Integer(1), Value::Nil);
        heap.table_rawset(t, Value::Integer(2), Value::Integer(3));
        let (k1, _) = heap.table_rawnext(t, Value::Nil).unwrap();
        let (k2, v2) = heap.table_rawnext(t, k1).unwrap();
        assert!(matches!(k2, Value::Integer(2)));
        assert!(matches!(v2, Value::Integer(3)));
    }
}
