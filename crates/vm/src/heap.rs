//! The object heap.
//!
//! All collectable objects live in one slot arena addressed by [`GcRef`]
//! indices. Each slot carries a header (kind, tri-color mark, intrusive list
//! links) next to its payload. Objects are threaded onto the `all_objects`
//! doubly-linked list through the header links; the mark phase threads gray
//! objects through `gray_next`. Destroyed slots are recycled through a free
//! list, so a `GcRef` is stable for an object's whole lifetime.
//!
//! Frequently churned kinds (strings, tables, closures) are not destroyed
//! outright on sweep: they move to typed pools the allocator draws from
//! first. Pool capacity adapts to the observed hit rate each cycle (see
//! [`crate::gc`]).
//!
//! The upvalue pool also lives here so closure destruction can release
//! closed upvalue slots and the mark phase can treat closed upvalues as
//! roots without leaving the heap.

use std::collections::VecDeque;

use xxhash_rust::xxh3::xxh3_64;

use sable_core::limits::{GC_INITIAL_THRESHOLD, GC_MINIMUM_POOL_LIMIT};

use crate::object::{Closure, GcColor, GcKind, GcPhase, GcRef, LString, Proto, Table, Userdata};
use crate::upvalue::UpvaluePool;
use crate::value::Value;

pub(crate) const LINK_NONE: u32 = u32::MAX;

/// Object header: type tag, color and intrusive list links.
pub(crate) struct GcHeader {
    pub kind: GcKind,
    pub color: GcColor,
    pub prev: u32,
    pub next: u32,
    pub gray_next: u32,
    /// Bytes charged against the GC budget when this object was created.
    pub owned_bytes: usize,
}

/// Object payload.
pub(crate) enum GcBody {
    Dead,
    String(LString),
    Table(Table),
    Closure(Closure),
    Proto(Proto),
    Userdata(Userdata),
}

pub(crate) struct GcSlot {
    pub header: GcHeader,
    pub body: GcBody,
}

/// The heap plus the collector's bookkeeping state.
pub struct Heap {
    pub(crate) slots: Vec<GcSlot>,
    free_slots: Vec<u32>,

    // all_objects intrusive list
    pub(crate) all_head: u32,
    pub(crate) all_tail: u32,
    all_count: usize,

    // Collector state
    pub(crate) phase: GcPhase,
    pub(crate) gray_head: u32,
    pub(crate) sweep_cursor: u32,
    pub(crate) finalize_queue: Vec<GcRef>,
    pub(crate) total_bytes: usize,
    pub(crate) threshold: usize,
    pub(crate) debt: i64,
    pub(crate) paused: bool,
    pub(crate) running: bool,

    // Typed free-object pools
    pub(crate) string_pool: Vec<GcRef>,
    pub(crate) table_pool: VecDeque<GcRef>,
    pub(crate) closure_pool: VecDeque<GcRef>,
    pub(crate) pool_limit: usize,
    pub(crate) pool_hits: usize,
    pub(crate) pool_misses: usize,

    /// Closure upvalue storage; closed entries are GC roots.
    pub(crate) upvalues: UpvaluePool,
}

impl Heap {
    pub fn new() -> Self {
        let threshold = GC_INITIAL_THRESHOLD;
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            all_head: LINK_NONE,
            all_tail: LINK_NONE,
            all_count: 0,
            phase: GcPhase::Idle,
            gray_head: LINK_NONE,
            sweep_cursor: LINK_NONE,
            finalize_queue: Vec::new(),
            total_bytes: 0,
            threshold,
            debt: -(threshold as i64),
            paused: false,
            running: false,
            string_pool: Vec::new(),
            table_pool: VecDeque::new(),
            closure_pool: VecDeque::new(),
            pool_limit: GC_MINIMUM_POOL_LIMIT,
            pool_hits: 0,
            pool_misses: 0,
            upvalues: UpvaluePool::new(),
        }
    }

    // ----- accessors -----

    pub(crate) fn slot(&self, r: GcRef) -> &GcSlot {
        &self.slots[r.0 as usize]
    }

    pub(crate) fn slot_mut(&mut self, r: GcRef) -> &mut GcSlot {
        &mut self.slots[r.0 as usize]
    }

    /// Object kind of a handle.
    pub fn kind(&self, r: GcRef) -> GcKind {
        self.slot(r).header.kind
    }

    /// Current color of a handle.
    pub fn color(&self, r: GcRef) -> GcColor {
        self.slot(r).header.color
    }

    /// Live object count (pooled objects excluded).
    pub fn object_count(&self) -> usize {
        self.all_count
    }

    /// Total bytes currently charged against the collector budget.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Current collection threshold in bytes.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Overrides the collection threshold (exposed via `gc.setthreshold`).
    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
        self.debt = self.total_bytes as i64 - self.threshold as i64;
    }

    /// Current collector phase.
    pub fn gc_phase(&self) -> GcPhase {
        self.phase
    }

    /// Objects parked in the typed pools.
    pub fn pooled_count(&self) -> usize {
        self.string_pool.len() + self.table_pool.len() + self.closure_pool.len()
    }

    pub fn string(&self, r: GcRef) -> &LString {
        match &self.slot(r).body {
            GcBody::String(s) => s,
            _ => panic!("heap slot {} is not a string", r.0),
        }
    }

    pub fn string_mut(&mut self, r: GcRef) -> &mut LString {
        match &mut self.slot_mut(r).body {
            GcBody::String(s) => s,
            _ => panic!("heap slot {} is not a string", r.0),
        }
    }

    pub fn table(&self, r: GcRef) -> &Table {
        match &self.slot(r).body {
            GcBody::Table(t) => t,
            _ => panic!("heap slot {} is not a table", r.0),
        }
    }

    pub fn table_mut(&mut self, r: GcRef) -> &mut Table {
        match &mut self.slot_mut(r).body {
            GcBody::Table(t) => t,
            _ => panic!("heap slot {} is not a table", r.0),
        }
    }

    pub fn closure(&self, r: GcRef) -> &Closure {
        match &self.slot(r).body {
            GcBody::Closure(c) => c,
            _ => panic!("heap slot {} is not a closure", r.0),
        }
    }

    pub fn closure_mut(&mut self, r: GcRef) -> &mut Closure {
        match &mut self.slot_mut(r).body {
            GcBody::Closure(c) => c,
            _ => panic!("heap slot {} is not a closure", r.0),
        }
    }

    pub fn proto(&self, r: GcRef) -> &Proto {
        match &self.slot(r).body {
            GcBody::Proto(p) => p,
            _ => panic!("heap slot {} is not a proto", r.0),
        }
    }

    pub fn proto_mut(&mut self, r: GcRef) -> &mut Proto {
        match &mut self.slot_mut(r).body {
            GcBody::Proto(p) => p,
            _ => panic!("heap slot {} is not a proto", r.0),
        }
    }

    pub fn userdata(&self, r: GcRef) -> &Userdata {
        match &self.slot(r).body {
            GcBody::Userdata(u) => u,
            _ => panic!("heap slot {} is not a userdata", r.0),
        }
    }

    pub fn userdata_mut(&mut self, r: GcRef) -> &mut Userdata {
        match &mut self.slot_mut(r).body {
            GcBody::Userdata(u) => u,
            _ => panic!("heap slot {} is not a userdata", r.0),
        }
    }

    // ----- GC pause control -----

    pub fn gc_pause(&mut self) {
        self.paused = true;
    }

    pub fn gc_is_paused(&self) -> bool {
        self.paused
    }

    pub fn gc_resume(&mut self) {
        self.paused = false;
    }

    // ----- intrusive all_objects list -----

    fn link_all(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.header.prev = self.all_tail;
        slot.header.next = LINK_NONE;
        if self.all_tail != LINK_NONE {
            self.slots[self.all_tail as usize].header.next = index;
        } else {
            self.all_head = index;
        }
        self.all_tail = index;
        self.all_count += 1;
    }

    pub(crate) fn unlink_all(&mut self, index: u32) {
        let (prev, next) = {
            let header = &self.slots[index as usize].header;
            (header.prev, header.next)
        };
        if prev != LINK_NONE {
            self.slots[prev as usize].header.next = next;
        } else {
            self.all_head = next;
        }
        if next != LINK_NONE {
            self.slots[next as usize].header.prev = prev;
        } else {
            self.all_tail = prev;
        }
        let header = &mut self.slots[index as usize].header;
        header.prev = LINK_NONE;
        header.next = LINK_NONE;
        self.all_count -= 1;
    }

    // ----- allocation -----

    fn charge(&mut self, bytes: usize) {
        self.total_bytes += bytes;
        self.debt += bytes as i64;
    }

    fn credit(&mut self, bytes: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
    }

    fn payload_bytes(body: &GcBody) -> usize {
        let base = std::mem::size_of::<GcSlot>();
        match body {
            GcBody::Dead => base,
            GcBody::String(s) => base + if s.is_sso() { 0 } else { s.len() },
            GcBody::Table(t) => {
                base + t.array.capacity() * std::mem::size_of::<Value>() + t.hash.len() * 48
            }
            GcBody::Closure(c) => base + c.upvalue_indices.capacity() * 4,
            GcBody::Proto(p) => {
                base + p.code.capacity() * 4
                    + p.str_constants.capacity() * std::mem::size_of::<Value>()
                    + p.int_constants.capacity() * 8
                    + p.float_constants.capacity() * 8
                    + (p.line_info.capacity() + p.column_info.capacity()) * 4
            }
            GcBody::Userdata(u) => base + u.data.len(),
        }
    }

    /// Allocates a fresh slot for `body`. New objects are born black: they
    /// trivially survive the cycle in flight.
    fn allocate(&mut self, kind: GcKind, body: GcBody) -> GcRef {
        let bytes = Self::payload_bytes(&body);
        self.charge(bytes);
        let header = GcHeader {
            kind,
            color: GcColor::Black,
            prev: LINK_NONE,
            next: LINK_NONE,
            gray_next: LINK_NONE,
            owned_bytes: bytes,
        };
        let index = match self.free_slots.pop() {
            Some(index) => {
                self.slots[index as usize] = GcSlot { header, body };
                index
            }
            None => {
                self.slots.push(GcSlot { header, body });
                (self.slots.len() - 1) as u32
            }
        };
        self.link_all(index);
        log::trace!("heap: created {:?} at slot {}", kind, index);
        GcRef(index)
    }

    /// Revives a pooled object: back onto `all_objects`, born black again.
    fn revive(&mut self, r: GcRef) {
        self.slots[r.0 as usize].header.color = GcColor::Black;
        self.link_all(r.0);
    }

    /// Allocates a string, preferring a pooled object whose capacity fits.
    pub fn new_string(&mut self, text: &str) -> GcRef {
        self.new_string_parts(&[text])
    }

    /// Allocates the concatenation of `parts` as one string.
    pub fn new_string_parts(&mut self, parts: &[&str]) -> GcRef {
        let total: usize = parts.iter().map(|p| p.len()).sum();

        // Best-fit search of the string pool. Inline candidates fit any
        // inline-sized request; heap candidates may waste at most 4 bytes.
        let mut best: Option<(usize, usize)> = None; // (pool position, distance)
        for (pos, &candidate) in self.string_pool.iter().enumerate() {
            let s = self.string(candidate);
            let capacity = s.capacity();
            if capacity == total {
                best = Some((pos, 0));
                break;
            }
            if capacity > total {
                if s.is_sso() {
                    best = Some((pos, 0));
                    break;
                }
                let distance = capacity - total;
                if distance < 4 && best.map(|(_, d)| distance < d).unwrap_or(true) {
                    best = Some((pos, distance));
                }
            }
        }

        if let Some((pos, _)) = best {
            self.pool_hits += 1;
            let r = self.string_pool.swap_remove(pos);
            self.revive(r);
            self.string_mut(r).write_in_place(parts);
            return r;
        }

        self.pool_misses += 1;
        let body = GcBody::String(LString::from_parts(parts));
        self.allocate(GcKind::String, body)
    }

    /// Allocates a table, reusing the pool FIFO when possible.
    pub fn new_table(&mut self, array_capacity: usize, hash_capacity: usize) -> GcRef {
        if let Some(r) = self.table_pool.pop_front() {
            self.pool_hits += 1;
            self.revive(r);
            let table = self.table_mut(r);
            table.array.reserve(array_capacity);
            table.hash.reserve(hash_capacity);
            return r;
        }
        self.pool_misses += 1;
        self.allocate(
            GcKind::Table,
            GcBody::Table(Table::with_capacity(array_capacity, hash_capacity)),
        )
    }

    /// Allocates a closure for `proto`, reusing the pool FIFO when possible.
    pub fn new_closure(&mut self, proto: GcRef) -> GcRef {
        if let Some(r) = self.closure_pool.pop_front() {
            self.pool_hits += 1;
            self.revive(r);
            let closure = self.closure_mut(r);
            closure.proto = proto;
            closure.upvalue_indices.clear();
            return r;
        }
        self.pool_misses += 1;
        self.allocate(GcKind::Closure, GcBody::Closure(Closure::new(proto)))
    }

    /// Allocates a proto. Protos are never pooled.
    pub fn new_proto(&mut self, proto: Proto) -> GcRef {
        self.allocate(GcKind::Proto, GcBody::Proto(proto))
    }

    /// Allocates a userdata buffer. Userdata is never pooled; its finalizer
    /// story requires destruction to be observable.
    pub fn new_userdata(&mut self, size: usize, uid: u32) -> GcRef {
        self.allocate(GcKind::Userdata, GcBody::Userdata(Userdata::new(size, uid)))
    }

    // ----- destruction -----

    /// Destroys an object found unreachable, or hands it to its type pool
    /// when `poolable` and the pool has room. Protos and userdata are always
    /// destroyed.
    pub(crate) fn destroy_object(&mut self, r: GcRef, poolable: bool) {
        log::trace!("heap: destroying slot {} ({:?})", r.0, self.kind(r));
        self.unlink_all(r.0);
        self.slots[r.0 as usize].header.color = GcColor::Free;

        let kind = self.kind(r);
        match kind {
            GcKind::Closure => self.release_closure_upvalues(r),
            GcKind::String | GcKind::Table | GcKind::Proto | GcKind::Userdata | GcKind::Dead => {}
        }

        let pooled = match kind {
            GcKind::String if poolable && self.string_pool.len() < self.pool_limit => {
                self.string_pool.push(r);
                true
            }
            GcKind::Table if poolable && self.table_pool.len() < self.pool_limit => {
                self.table_mut(r).reset();
                self.table_pool.push_back(r);
                true
            }
            GcKind::Closure if poolable && self.closure_pool.len() < self.pool_limit => {
                self.closure_mut(r).upvalue_indices.clear();
                self.closure_pool.push_back(r);
                true
            }
            _ => false,
        };

        if !pooled {
            let slot = &mut self.slots[r.0 as usize];
            let bytes = slot.header.owned_bytes;
            slot.header.kind = GcKind::Dead;
            slot.body = GcBody::Dead;
            self.credit(bytes);
            self.free_slots.push(r.0);
        }
    }

    /// Returns a slot index to the free list after its object is gone.
    pub(crate) fn free_slot(&mut self, index: u32) {
        self.free_slots.push(index);
    }

    /// Releases the closed upvalue slots a dying closure was the holder of.
    /// Open entries stay: they alias live stack slots.
    fn release_closure_upvalues(&mut self, r: GcRef) {
        let mut indices = std::mem::take(&mut self.closure_mut(r).upvalue_indices);
        indices.sort_unstable_by(|a, b| b.cmp(a));
        for upvalue_index in indices {
            if (upvalue_index as usize) < self.upvalues.entries.len()
                && !self.upvalues.entries[upvalue_index as usize].is_open()
            {
                self.upvalues.release_closed(upvalue_index);
            }
        }
    }

    // ----- heap-aware value operations -----

    /// Content hash of a value. Integer-valued floats hash like the integer
    /// they round to, so table lookup stays consistent with `==`.
    pub fn value_hash(&self, v: Value) -> u64 {
        match v {
            Value::Nil => 0x9e37_79b9_7f4a_7c15,
            Value::NullOpt => 0x517c_c1b7_2722_0a95,
            Value::Boolean(b) => {
                if b {
                    0x2545_f491_4f6c_dd1d
                } else {
                    0x1234_5678_9abc_def0
                }
            }
            Value::Integer(i) => xxh3_64(&i.to_le_bytes()),
            Value::Number(f) => {
                if f.floor() == f && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    xxh3_64(&(f as i64).to_le_bytes())
                } else {
                    xxh3_64(&f.to_bits().to_le_bytes())
                }
            }
            Value::String(r) => self.string(r).hash(),
            Value::Table(r) | Value::Closure(r) | Value::Userdata(r) => {
                xxh3_64(&(r.0 as u64).to_le_bytes())
            }
            Value::CFunction(f) => xxh3_64(&(f as usize).to_le_bytes()),
        }
    }

    /// `==` semantics: numeric cross-type equality, string content equality,
    /// identity for other heap objects. Metamethods are layered on top by
    /// the VM.
    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Nil, Value::Nil) => true,
            (Value::NullOpt, Value::NullOpt) => true,
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Integer(x), Value::Integer(y)) => x == y,
            (Value::Number(x), Value::Number(y)) => x == y,
            (Value::Integer(i), Value::Number(f)) | (Value::Number(f), Value::Integer(i)) => {
                f.floor() == f
                    && f >= i64::MIN as f64
                    && f <= i64::MAX as f64
                    && f as i64 == i
            }
            (Value::String(x), Value::String(y)) => {
                x == y || LString::equals(self.string(x), self.string(y))
            }
            (Value::Table(x), Value::Table(y)) => x == y,
            (Value::Closure(x), Value::Closure(y)) => x == y,
            (Value::Userdata(x), Value::Userdata(y)) => x == y,
            (Value::CFunction(x), Value::CFunction(y)) => x as usize == y as usize,
            _ => false,
        }
    }

    /// Partial ordering: numbers (with int↔float promotion), strings, bools
    /// and nil are ordered; everything else is unordered and left to
    /// metamethod dispatch.
    pub fn value_compare(&self, a: Value, b: Value) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (a, b) {
            (Value::Integer(x), Value::Integer(y)) => Some(x.cmp(&y)),
            (Value::Number(x), Value::Number(y)) => x.partial_cmp(&y),
            (Value::Integer(x), Value::Number(y)) => (x as f64).partial_cmp(&y),
            (Value::Number(x), Value::Integer(y)) => x.partial_cmp(&(y as f64)),
            (Value::String(x), Value::String(y)) => {
                Some(LString::compare(self.string(x), self.string(y)))
            }
            (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(&y)),
            (Value::Nil, Value::Nil) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Raw field lookup by string name in a table's hash part. Used for
    /// metamethod resolution and globals.
    pub fn table_get_str(&self, table: GcRef, name: &str) -> Value {
        let hash = xxh3_64(name.as_bytes());
        let t = self.table(table);
        match t.hash.find_with(hash, |key| match key {
            Value::String(s) => self.string(s).view() == name,
            _ => false,
        }) {
            Some(slot) => t.hash.value_at(slot),
            None => Value::Nil,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_objects_are_black_and_linked() {
        let mut heap = Heap::new();
        let s = heap.new_string("hi");
        assert_eq!(heap.color(s), GcColor::Black);
        assert_eq!(heap.kind(s), GcKind::String);
        assert_eq!(heap.object_count(), 1);
        let t = heap.new_table(0, 0);
        assert_eq!(heap.object_count(), 2);
        assert_eq!(heap.kind(t), GcKind::Table);
    }

    #[test]
    fn destroyed_slots_are_recycled() {
        let mut heap = Heap::new();
        let u = heap.new_userdata(16, 7);
        let index = u.0;
        heap.destroy_object(u, false);
        assert_eq!(heap.object_count(), 0);
        let v = heap.new_userdata(8, 9);
        assert_eq!(v.0, index);
    }

    #[test]
    fn pooled_tables_are_reused_fifo() {
        let mut heap = Heap::new();
        let a = heap.new_table(0, 0);
        let b = heap.new_table(0, 0);
        heap.destroy_object(a, true);
        heap.destroy_object(b, true);
        assert_eq!(heap.pooled_count(), 2);
        let c = heap.new_table(0, 0);
        assert_eq!(c, a);
        let d = heap.new_table(0, 0);
        assert_eq!(d, b);
        assert_eq!(heap.pooled_count(), 0);
    }

    #[test]
    fn pooled_strings_pick_best_fit() {
        let mut heap = Heap::new();
        let long = heap.new_string(&"x".repeat(100));
        let short = heap.new_string("abc");
        heap.destroy_object(long, true);
        heap.destroy_object(short, true);
        // A short request must not claim the 100-byte buffer.
        let reused = heap.new_string("xyz");
        assert_eq!(reused, short);
        assert_eq!(heap.string(reused).view(), "xyz");
    }

    #[test]
    fn integer_valued_float_hashes_like_the_integer() {
        let heap = Heap::new();
        assert_eq!(
            heap.value_hash(Value::Integer(42)),
            heap.value_hash(Value::Number(42.0))
        );
        assert_ne!(
            heap.value_hash(Value::Integer(42)),
            heap.value_hash(Value::Number(42.5))
        );
    }

    #[test]
    fn string_equality_is_content_based() {
        let mut heap = Heap::new();
        let a = heap.new_string("key");
        let b = heap.new_string("key");
        assert_ne!(a, b);
        assert!(heap.values_equal(Value::String(a), Value::String(b)));
        assert_eq!(
            heap.value_hash(Value::String(a)),
            heap.value_hash(Value::String(b))
        );
    }

    #[test]
    fn tables_compare_by_identity_only() {
        let mut heap = Heap::new();
        let a = heap.new_table(0, 0);
        let b = heap.new_table(0, 0);
        assert!(heap.values_equal(Value::Table(a), Value::Table(a)));
        assert!(!heap.values_equal(Value::Table(a), Value::Table(b)));
        assert!(heap.value_compare(Value::Table(a), Value::Table(b)).is_none());
    }

    #[test]
    fn cross_numeric_equality_requires_exact_round_trip() {
        let heap = Heap::new();
        assert!(heap.values_equal(Value::Integer(5), Value::Number(5.0)));
        assert!(!heap.values_equal(Value::Integer(5), Value::Number(5.5)));
        let big = (1i64 << 53) + 1;
        assert!(!heap.values_equal(Value::Integer(big), Value::Number(big as f64)));
    }

    #[test]
    fn nan_is_unordered_and_unequal() {
        let heap = Heap::new();
        let nan = Value::Number(f64::NAN);
        assert!(!heap.values_equal(nan, nan));
        assert!(heap.value_compare(nan, Value::Integer(1)).is_none());
    }
}
