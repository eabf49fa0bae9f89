//! Incremental tri-color mark/sweep collection.
//!
//! The collector runs as a state machine over {Idle, Mark, Sweep, Finalize}:
//!
//! 1. **Idle → Mark**: every black object turns white, then the root set is
//!    marked gray (globals, the whole value stack, pinned values, module
//!    cache and metatable registry values, closed upvalues).
//! 2. **Mark**: gray objects are popped off the gray list and blackened,
//!    graying their white children.
//! 3. **Mark → Sweep boundary**: white userdata whose metatable defines
//!    `__gc` is resurrected (marked gray, metatable included) and queued for
//!    finalization; resulting grays propagate before the sweep begins.
//! 4. **Sweep**: the `all_objects` list is walked; whites are destroyed (or
//!    pooled), blacks survive.
//! 5. **Finalize**: queued userdata gets its `__gc` metamethod invoked as a
//!    normal VM call, then turns white so the *next* cycle collects it.
//!
//! There is no write barrier. New objects are born black, and the only way
//! script code can obtain a reference to a white object mid-cycle is through
//! the roots — which were all marked when the cycle began. A `running` flag
//! keeps finalizers (which may allocate) from re-entering the collector, and
//! `pause`/`resume` bracket critical sections such as compilation.
//!
//! Work is budgeted: each `gc_step` call performs at most
//! [`GC_WORK_BUDGET`] units (one gray propagation, one sweep check or one
//! finalizer call each), converted to bytes and subtracted from the
//! allocation debt.

use hashbrown::HashMap;

use sable_core::limits::{
    GC_BYTES_PER_WORK_UNIT, GC_INITIAL_THRESHOLD, GC_MAXIMUM_POOL_LIMIT, GC_MINIMUM_POOL_LIMIT,
    GC_WORK_BUDGET,
};

use crate::heap::{GcBody, Heap, LINK_NONE};
use crate::metatable::MetaMethod;
use crate::object::{GcColor, GcKind, GcPhase, GcRef};
use crate::runtime::Runtime;
use crate::upvalue::Upvalue;
use crate::value::Value;

/// Borrowed view of everything outside the heap that keeps objects alive.
pub(crate) struct GcRoots<'a> {
    pub stack: &'a [Value],
    pub globals: Value,
    pub pinned: &'a [Value],
    pub module_cache: &'a HashMap<String, Value>,
    pub metatable_registry: &'a HashMap<String, Value>,
}

impl Heap {
    /// Marks a white object gray and pushes it on the gray list.
    pub(crate) fn mark_gray(&mut self, r: GcRef) {
        let header = &mut self.slots[r.0 as usize].header;
        if header.color == GcColor::White {
            header.color = GcColor::Gray;
            header.gray_next = self.gray_head;
            self.gray_head = r.0;
        }
    }

    /// Marks the object behind a value, if it has one.
    pub(crate) fn mark_value(&mut self, v: Value) {
        if let Some(r) = v.gc_ref() {
            self.mark_gray(r);
        }
    }

    /// References held by an object, for the blacken step.
    fn collect_children(&self, r: GcRef) -> Vec<GcRef> {
        let mut children = Vec::new();
        match &self.slot(r).body {
            GcBody::Table(table) => {
                for value in &table.array {
                    if let Some(child) = value.gc_ref() {
                        children.push(child);
                    }
                }
                for entry in table.hash.iter() {
                    if let Some(child) = entry.key.gc_ref() {
                        children.push(child);
                    }
                    if let Some(child) = entry.value.gc_ref() {
                        children.push(child);
                    }
                }
                if let Some(mt) = table.metatable {
                    children.push(mt);
                }
            }
            GcBody::Closure(closure) => {
                children.push(closure.proto);
            }
            GcBody::Proto(proto) => {
                for constant in &proto.str_constants {
                    if let Some(child) = constant.gc_ref() {
                        children.push(child);
                    }
                }
                children.extend(proto.protos.iter().copied());
                children.extend(proto.upvalue_names.iter().copied());
                children.extend(proto.source_name);
                children.extend(proto.source_path);
                children.extend(proto.name);
            }
            GcBody::Userdata(userdata) => {
                if let Some(mt) = userdata.metatable {
                    children.push(mt);
                }
            }
            GcBody::String(_) | GcBody::Dead => {}
        }
        children
    }

    /// Blackens one object: marks it black and grays its white children.
    fn blacken(&mut self, r: GcRef) {
        self.slots[r.0 as usize].header.color = GcColor::Black;
        for child in self.collect_children(r) {
            self.mark_gray(child);
        }
    }

    /// Starts a cycle: whitens survivors of the last one and marks the roots.
    pub(crate) fn start_cycle(&mut self, roots: &GcRoots<'_>) {
        log::trace!(
            "gc: cycle start, objects={}, debt={}",
            self.object_count(),
            self.debt
        );
        self.phase = GcPhase::Mark;
        self.gray_head = LINK_NONE;
        self.finalize_queue.clear();

        let mut cursor = self.all_head;
        while cursor != LINK_NONE {
            let header = &mut self.slots[cursor as usize].header;
            if header.color == GcColor::Black {
                header.color = GcColor::White;
            }
            cursor = header.next;
        }

        for &value in roots.module_cache.values() {
            self.mark_value(value);
        }
        for &value in roots.metatable_registry.values() {
            self.mark_value(value);
        }
        self.mark_value(roots.globals);
        for &value in roots.stack {
            self.mark_value(value);
        }
        for &value in roots.pinned {
            self.mark_value(value);
        }
        for i in 0..self.upvalues.entries.len() {
            if let Upvalue::Closed { value } = self.upvalues.entries[i] {
                self.mark_value(value);
            }
        }
    }

    /// Propagates up to `limit` gray objects. When the gray list drains,
    /// queues finalizable userdata and, once nothing remains gray, moves to
    /// the sweep phase.
    pub(crate) fn propagate_mark(&mut self, limit: usize) -> usize {
        let budget = limit.max(1);
        let mut work_done = 0;

        while self.gray_head != LINK_NONE && work_done < budget {
            let index = self.gray_head;
            self.gray_head = self.slots[index as usize].header.gray_next;
            self.slots[index as usize].header.gray_next = LINK_NONE;
            self.blacken(GcRef(index));
            work_done += 1;
        }

        if self.gray_head == LINK_NONE {
            self.queue_finalizers();
            if self.gray_head == LINK_NONE {
                self.phase = GcPhase::Sweep;
                self.sweep_cursor = self.all_head;
            }
        }

        work_done
    }

    /// Resurrects white userdata that defines `__gc` and appends it to the
    /// finalize queue. The userdata and its metatable must survive this
    /// cycle so the finalizer can run.
    fn queue_finalizers(&mut self) {
        let mut candidates = Vec::new();
        let mut cursor = self.all_head;
        while cursor != LINK_NONE {
            let header = &self.slots[cursor as usize].header;
            if header.color == GcColor::White && header.kind == GcKind::Userdata {
                let r = GcRef(cursor);
                let userdata = self.userdata(r);
                if !userdata.finalized {
                    if let Some(mt) = userdata.metatable {
                        let gc_method = self.table_get_str(mt, MetaMethod::Gc.name());
                        if gc_method.is_callable() {
                            candidates.push((r, mt));
                        }
                    }
                }
            }
            cursor = self.slots[cursor as usize].header.next;
        }
        for (userdata, metatable) in candidates {
            log::trace!("gc: queueing userdata {} for finalization", userdata.0);
            self.mark_gray(userdata);
            if self.color(metatable) == GcColor::White {
                self.mark_gray(metatable);
            }
            self.finalize_queue.push(userdata);
        }
    }

    /// Sweeps up to `limit` objects, destroying the white ones. Moves to the
    /// finalize phase once the list has been fully walked.
    pub(crate) fn sweep_step(&mut self, limit: usize) -> usize {
        let mut work_done = 0;
        while self.sweep_cursor != LINK_NONE && work_done < limit {
            let index = self.sweep_cursor;
            let (color, next) = {
                let header = &self.slots[index as usize].header;
                (header.color, header.next)
            };
            if color == GcColor::White {
                self.destroy_object(GcRef(index), true);
            }
            self.sweep_cursor = next;
            work_done += 1;
        }
        if self.sweep_cursor == LINK_NONE {
            self.phase = GcPhase::Finalize;
        }
        work_done
    }

    /// Recomputes the collection threshold after a cycle: 1.2× the surviving
    /// byte load, floored at the initial threshold.
    pub(crate) fn adjust_threshold(&mut self) {
        let total = self.total_bytes;
        let new_threshold = (total + total / 5).max(GC_INITIAL_THRESHOLD);
        self.threshold = new_threshold;
        self.debt = self.total_bytes as i64 - self.threshold as i64;
    }

    /// Adapts the pool limit to the hit rate observed since the last cycle,
    /// then trims every pool to the limit.
    pub(crate) fn update_pool_limits(&mut self) {
        let hits = self.pool_hits;
        let misses = self.pool_misses;
        self.pool_hits = 0;
        self.pool_misses = 0;

        let total_requests = hits + misses;
        if total_requests == 0 {
            // Idle cycle: drift down by one.
            if self.pool_limit > GC_MINIMUM_POOL_LIMIT {
                self.pool_limit -= 1;
            }
            self.trim_pools();
            return;
        }

        let hit_rate = hits as f64 / total_requests as f64;
        if hit_rate < 0.50 && misses > 20 && self.pool_limit < GC_MAXIMUM_POOL_LIMIT {
            let new_limit = (self.pool_limit + 4).min(GC_MAXIMUM_POOL_LIMIT);
            log::trace!(
                "gc: pool limit {} -> {} (hit rate {:.0}%, misses {})",
                self.pool_limit,
                new_limit,
                hit_rate * 100.0,
                misses
            );
            self.pool_limit = new_limit;
        } else if hit_rate > 0.95
            && self.debt <= 0
            && misses < 5
            && self.pool_limit > GC_MINIMUM_POOL_LIMIT
        {
            let new_limit = self.pool_limit.saturating_sub(8).max(GC_MINIMUM_POOL_LIMIT);
            log::trace!(
                "gc: pool limit {} -> {} (hit rate {:.0}%, idle)",
                self.pool_limit,
                new_limit,
                hit_rate * 100.0
            );
            self.pool_limit = new_limit;
        }

        self.trim_pools();
    }

    fn trim_pools(&mut self) {
        while self.table_pool.len() > self.pool_limit {
            if let Some(r) = self.table_pool.pop_front() {
                self.destroy_pooled(r);
            }
        }
        while self.string_pool.len() > self.pool_limit {
            let r = self.string_pool.remove(0);
            self.destroy_pooled(r);
        }
        while self.closure_pool.len() > self.pool_limit {
            if let Some(r) = self.closure_pool.pop_front() {
                self.destroy_pooled(r);
            }
        }
    }

    /// Destroys every pooled object outright.
    pub(crate) fn destroy_pools(&mut self) {
        while let Some(r) = self.table_pool.pop_front() {
            self.destroy_pooled(r);
        }
        while let Some(r) = self.string_pool.pop() {
            self.destroy_pooled(r);
        }
        while let Some(r) = self.closure_pool.pop_front() {
            self.destroy_pooled(r);
        }
    }

    /// Final destruction of an object already detached into a pool.
    fn destroy_pooled(&mut self, r: GcRef) {
        let slot = &mut self.slots[r.0 as usize];
        let bytes = slot.header.owned_bytes;
        slot.header.kind = GcKind::Dead;
        slot.header.color = GcColor::Free;
        slot.body = GcBody::Dead;
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
        self.free_slot(r.0);
    }

    /// Destroys every remaining object without pooling. Terminal cleanup for
    /// `Runtime::close`.
    pub(crate) fn destroy_all(&mut self) {
        let mut destroyed = 0usize;
        while self.all_head != LINK_NONE {
            let index = self.all_head;
            self.destroy_object(GcRef(index), false);
            destroyed += 1;
        }
        self.destroy_pools();
        self.finalize_queue.clear();
        log::trace!("gc: close destroyed {destroyed} objects");
    }
}

impl Runtime {
    /// Opportunistic incremental collection step. Called after allocations
    /// in hot paths; bounded by the work budget.
    pub fn gc_step(&mut self) {
        if self.heap.paused || self.heap.running {
            return;
        }
        let cycle_active = self.heap.phase != GcPhase::Idle;
        if !cycle_active && self.heap.debt <= 0 {
            return;
        }

        self.heap.running = true;
        let budget = GC_WORK_BUDGET;
        let mut work_done = 0;

        while work_done < budget {
            let batch = match self.heap.phase {
                GcPhase::Idle => {
                    self.heap.start_cycle(&GcRoots {
                        stack: &self.stack,
                        globals: self.globals,
                        pinned: &self.pinned,
                        module_cache: &self.module_cache,
                        metatable_registry: &self.metatable_registry,
                    });
                    10
                }
                GcPhase::Mark => {
                    let work = self.heap.propagate_mark(budget - work_done);
                    if work == 0 {
                        work_done = budget;
                    }
                    work
                }
                GcPhase::Sweep => {
                    let work = self.heap.sweep_step(budget - work_done);
                    if work == 0 {
                        work_done = budget;
                    }
                    work
                }
                GcPhase::Finalize => {
                    let work = self.finalize_step(budget - work_done);
                    if work == 0 {
                        work_done = budget;
                    }
                    work
                }
            };

            work_done += batch;
            self.heap.debt -= (batch * GC_BYTES_PER_WORK_UNIT) as i64;

            if self.heap.phase == GcPhase::Idle {
                break;
            }
        }

        self.heap.running = false;
    }

    /// Runs queued `__gc` finalizers. Each finalized userdata turns white so
    /// the next cycle collects it for real. Finalizer errors are logged and
    /// swallowed — collection must not unwind into script code.
    fn finalize_step(&mut self, limit: usize) -> usize {
        let mut work_done = 0;
        while work_done < limit {
            let Some(userdata) = self.heap.finalize_queue.pop() else {
                break;
            };
            self.heap.userdata_mut(userdata).finalized = true;
            if let Some(mt) = self.heap.userdata(userdata).metatable {
                let gc_method = self.heap.table_get_str(mt, MetaMethod::Gc.name());
                if gc_method.is_callable() {
                    log::trace!("gc: running finalizer for userdata {}", userdata.0);
                    if let Err(err) =
                        self.call_metamethod_void(gc_method, &[Value::Userdata(userdata)])
                    {
                        log::warn!("gc: finalizer raised: {err}");
                    }
                }
            }
            self.heap.slots[userdata.0 as usize].header.color = GcColor::White;
            work_done += 1;
        }

        if self.heap.finalize_queue.is_empty() {
            self.heap.phase = GcPhase::Idle;
            self.heap.adjust_threshold();
            self.heap.update_pool_limits();
        }
        work_done
    }

    /// Forces a full synchronous collection cycle, draining every phase, and
    /// empties the typed pools. Used by `gc.collect()` and at shutdown.
    pub fn gc_collect(&mut self) {
        if self.heap.running {
            return;
        }
        log::trace!("gc: full collection requested");

        self.heap.phase = GcPhase::Idle;
        self.heap.gray_head = LINK_NONE;
        self.heap.sweep_cursor = LINK_NONE;
        self.heap.finalize_queue.clear();

        let mut cursor = self.heap.all_head;
        while cursor != LINK_NONE {
            let header = &mut self.heap.slots[cursor as usize].header;
            if header.color != GcColor::Free {
                header.color = GcColor::Black;
            }
            cursor = header.next;
        }

        self.heap.start_cycle(&GcRoots {
            stack: &self.stack,
            globals: self.globals,
            pinned: &self.pinned,
            module_cache: &self.module_cache,
            metatable_registry: &self.metatable_registry,
        });

        while self.heap.phase == GcPhase::Mark {
            if self.heap.propagate_mark(usize::MAX) == 0 {
                break;
            }
        }
        while self.heap.phase == GcPhase::Sweep {
            if self.heap.sweep_step(usize::MAX) == 0 {
                break;
            }
        }
        self.heap.running = true;
        while self.heap.phase == GcPhase::Finalize {
            if self.finalize_step(usize::MAX) == 0 {
                break;
            }
        }
        self.heap.running = false;

        if self.heap.phase == GcPhase::Idle {
            self.heap.adjust_threshold();
        }
        self.heap.destroy_pools();
    }
}

#[cfg(test)]
mod tests {
    use crate::object::GcColor;
    use crate::runtime::Runtime;
    use crate::value::Value;

    #[test]
    fn closed_upvalues_are_roots() {
        let mut rt = Runtime::new();
        let t = rt.heap.new_table(0, 0);

        // A closure capture over stack slot 0, closed before the slot dies.
        rt.stack.push(Value::Table(t));
        let uv = rt.heap.upvalues.find_or_create(0);
        let snapshot = rt.stack.clone();
        rt.heap.upvalues.close_from(0, &snapshot);
        rt.stack.pop();

        rt.gc_collect();
        assert_ne!(rt.heap.color(t), GcColor::Free);
        assert!(matches!(
            rt.heap.upvalues.get(uv, &rt.stack),
            Value::Table(r) if r == t
        ));

        // Releasing the closed slot drops the last root.
        rt.heap.upvalues.release_closed(uv);
        rt.gc_collect();
        assert_eq!(rt.heap.color(t), GcColor::Free);
    }

    #[test]
    fn objects_born_during_a_cycle_survive_it() {
        let mut rt = Runtime::new();
        // Put the collector mid-cycle, then allocate.
        rt.heap.set_threshold(1);
        rt.gc_step();
        let newborn = rt.heap.new_table(0, 0);
        assert_eq!(rt.heap.color(newborn), GcColor::Black);
        rt.gc_collect();
        // Unreachable now, but it must have survived the cycle it was born
        // into; after the forced full collection it is gone.
        assert_eq!(rt.heap.color(newborn), GcColor::Free);
    }
}
