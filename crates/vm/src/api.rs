//! The stack-oriented host API.
//!
//! Hosts talk to a [`Runtime`] through a value stack: arguments are pushed,
//! operations consume and produce stack slots, results are read back off the
//! top. Indices are resolved the conventional way: non-negative indices count
//! from the current host-call frame base (index 0 is the first argument of
//! the running host function), negative indices count back from the top
//! (−1 is the top of the stack).

use sable_core::{Error, ErrorKind, Result};

use crate::object::GcRef;
use crate::runtime::Runtime;
use crate::value::{CFunction, Value, ValueType};

impl Runtime {
    /// Stack index of the running host function's first argument, or 0 when
    /// no host call is active.
    fn host_call_base(&self) -> usize {
        match self.call_stack.last() {
            Some(frame) if frame.is_host() => frame.base + 1,
            _ => 0,
        }
    }

    /// Resolves an API index to an absolute stack position.
    pub fn resolve_index(&self, index: i32) -> Option<usize> {
        let absolute = if index >= 0 {
            self.host_call_base() as i64 + index as i64
        } else {
            self.stack.len() as i64 + index as i64
        };
        if absolute >= 0 && (absolute as usize) < self.stack.len() {
            Some(absolute as usize)
        } else {
            None
        }
    }

    /// The value at an API index; nil for out-of-range indices.
    pub fn value_at(&self, index: i32) -> Value {
        self.resolve_index(index)
            .map(|i| self.stack[i])
            .unwrap_or(Value::Nil)
    }

    // ----- stack shape -----

    /// Number of values above the current host-call base.
    pub fn get_top(&self) -> usize {
        self.stack.len() - self.host_call_base()
    }

    /// Grows (with nil) or shrinks the stack to `n` values above the base.
    pub fn set_top(&mut self, n: i32) {
        let base = self.host_call_base();
        let current = self.stack.len() - base;
        let new_len = if n >= 0 {
            base + n as usize
        } else {
            let to_pop = (-n) as usize;
            base + current.saturating_sub(to_pop)
        };
        self.stack.resize(new_len, Value::Nil);
    }

    /// Pops `n` values.
    pub fn pop(&mut self, n: usize) {
        let new_len = self.stack.len().saturating_sub(n);
        self.stack.truncate(new_len);
    }

    /// Pushes a copy of the value at `index`.
    pub fn dup(&mut self, index: i32) {
        let value = self.value_at(index);
        self.stack.push(value);
    }

    /// Removes the value at `index`, shifting the values above it down.
    pub fn remove(&mut self, index: i32) {
        if let Some(i) = self.resolve_index(index) {
            self.stack.remove(i);
        }
    }

    /// Moves the top value into position `index`, shifting values up.
    pub fn insert(&mut self, index: i32) {
        let Some(i) = self.resolve_index(index) else {
            return;
        };
        let Some(top) = self.stack.pop() else {
            return;
        };
        self.stack.insert(i, top);
    }

    // ----- pushes -----

    pub fn push_nil(&mut self) {
        self.stack.push(Value::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.stack.push(Value::Boolean(b));
    }

    pub fn push_integer(&mut self, n: i64) {
        self.stack.push(Value::Integer(n));
    }

    pub fn push_number(&mut self, n: f64) {
        self.stack.push(Value::Number(n));
    }

    pub fn push_string(&mut self, text: &str) {
        let s = self.heap.new_string(text);
        self.stack.push(Value::String(s));
    }

    pub fn push_cfunction(&mut self, f: CFunction) {
        self.stack.push(Value::CFunction(f));
    }

    /// Pushes an arbitrary value (host-held refs included).
    pub fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    // ----- type queries and non-raising conversions -----

    pub fn value_type_at(&self, index: i32) -> ValueType {
        self.value_at(index).value_type()
    }

    pub fn is_nil(&self, index: i32) -> bool {
        self.value_at(index).is_nil()
    }

    pub fn is_boolean(&self, index: i32) -> bool {
        self.value_at(index).is_boolean()
    }

    pub fn is_integer(&self, index: i32) -> bool {
        self.value_at(index).is_integer()
    }

    pub fn is_number(&self, index: i32) -> bool {
        self.value_at(index).is_numeric()
    }

    pub fn is_string(&self, index: i32) -> bool {
        self.value_at(index).is_string()
    }

    pub fn is_table(&self, index: i32) -> bool {
        self.value_at(index).is_table()
    }

    pub fn is_function(&self, index: i32) -> bool {
        self.value_at(index).is_callable()
    }

    pub fn is_userdata(&self, index: i32) -> bool {
        self.value_at(index).is_userdata()
    }

    /// Truthiness of the value at `index`.
    pub fn to_boolean(&self, index: i32) -> bool {
        self.value_at(index).is_truthy()
    }

    /// Integer view: integers directly, integer-valued floats rounded.
    pub fn to_integer(&self, index: i32) -> Option<i64> {
        self.value_at(index).as_integer_strict()
    }

    /// Float view of any numeric value.
    pub fn to_number(&self, index: i32) -> Option<f64> {
        self.value_at(index).as_f64()
    }

    /// String content, for string values only.
    pub fn to_str(&self, index: i32) -> Option<&str> {
        match self.value_at(index) {
            Value::String(r) => Some(self.heap.string(r).view()),
            _ => None,
        }
    }

    pub fn to_cfunction(&self, index: i32) -> Option<CFunction> {
        match self.value_at(index) {
            Value::CFunction(f) => Some(f),
            _ => None,
        }
    }

    // ----- raising argument checks -----

    fn bad_argument(&self, index: i32, expected: &str) -> Error {
        let got = self.value_at(index).type_name();
        Error::type_error_msg(format!(
            "bad argument #{index} (expected {expected}, got {got})"
        ))
    }

    pub fn check_type(&self, index: i32, expected: ValueType) -> Result<Value> {
        let value = self.value_at(index);
        if value.value_type() == expected {
            Ok(value)
        } else {
            Err(self.bad_argument(index, expected.name()))
        }
    }

    pub fn check_integer(&self, index: i32) -> Result<i64> {
        self.value_at(index)
            .as_integer_strict()
            .ok_or_else(|| self.bad_argument(index, "integer"))
    }

    pub fn check_number(&self, index: i32) -> Result<f64> {
        self.value_at(index)
            .as_f64()
            .ok_or_else(|| self.bad_argument(index, "number"))
    }

    pub fn check_boolean(&self, index: i32) -> Result<bool> {
        match self.value_at(index) {
            Value::Boolean(b) => Ok(b),
            _ => Err(self.bad_argument(index, "boolean")),
        }
    }

    pub fn check_string(&self, index: i32) -> Result<String> {
        match self.value_at(index) {
            Value::String(r) => Ok(self.heap.string(r).view().to_string()),
            _ => Err(self.bad_argument(index, "string")),
        }
    }

    pub fn check_table(&self, index: i32) -> Result<GcRef> {
        match self.value_at(index) {
            Value::Table(r) => Ok(r),
            _ => Err(self.bad_argument(index, "table")),
        }
    }

    pub fn check_function(&self, index: i32) -> Result<Value> {
        let value = self.value_at(index);
        if value.is_callable() {
            Ok(value)
        } else {
            Err(self.bad_argument(index, "function"))
        }
    }

    // ----- tables -----

    /// Creates a table and pushes it.
    pub fn table_new(&mut self, array_hint: usize, hash_hint: usize) -> GcRef {
        let t = self.heap.new_table(array_hint, hash_hint);
        self.stack.push(Value::Table(t));
        t
    }

    /// Pops a key, pushes `t[key]` (no metamethods).
    pub fn table_rawget_api(&mut self, table_index: i32) -> Result<()> {
        let table = self.check_table(table_index)?;
        let key = self.stack.pop().unwrap_or(Value::Nil);
        let value = self.heap.table_rawget(table, key);
        self.stack.push(value);
        Ok(())
    }

    /// Pops a value then a key, performs `t[key] = value` (no metamethods).
    pub fn table_rawset_api(&mut self, table_index: i32) -> Result<()> {
        let table = self.check_table(table_index)?;
        let value = self.stack.pop().unwrap_or(Value::Nil);
        let key = self.stack.pop().unwrap_or(Value::Nil);
        self.heap.table_rawset(table, key, value);
        Ok(())
    }

    /// Pops a key, pushes `t[key]` honoring `__index`.
    pub fn table_get_api(&mut self, table_index: i32) -> Result<()> {
        let table = self.check_table(table_index)?;
        let key = self.stack.pop().unwrap_or(Value::Nil);
        let value = self.table_get_with_meta(table, key)?;
        self.stack.push(value);
        Ok(())
    }

    /// Pops a value then a key, stores honoring `__newindex`.
    pub fn table_set_api(&mut self, table_index: i32) -> Result<()> {
        let table = self.check_table(table_index)?;
        let value = self.stack.pop().unwrap_or(Value::Nil);
        let key = self.stack.pop().unwrap_or(Value::Nil);
        self.table_set_with_meta(table, key, value)
    }

    /// Pushes `t[name]` (no metamethods).
    pub fn table_rawgetfield(&mut self, table_index: i32, name: &str) -> Result<()> {
        let table = self.check_table(table_index)?;
        let value = self.heap.table_get_str(table, name);
        self.stack.push(value);
        Ok(())
    }

    /// Pops a value, stores it at `t[name]` (no metamethods).
    pub fn table_rawsetfield(&mut self, table_index: i32, name: &str) -> Result<()> {
        let table = self.check_table(table_index)?;
        let value = self.stack.pop().unwrap_or(Value::Nil);
        let key = Value::String(self.heap.new_string(name));
        self.heap.table_rawset(table, key, value);
        Ok(())
    }

    /// Border length of the table at `index`.
    pub fn table_len(&self, table_index: i32) -> Result<usize> {
        match self.value_at(table_index) {
            Value::Table(t) => Ok(self.heap.table_length(t)),
            _ => Err(self.bad_argument(table_index, "table")),
        }
    }

    /// Iteration step: pops the previous key (nil to start), pushes the next
    /// key/value pair and returns true, or pushes nothing and returns false
    /// when iteration is done.
    pub fn table_rawnext_api(&mut self, table_index: i32) -> Result<bool> {
        let table = self.check_table(table_index)?;
        let key = self.stack.pop().unwrap_or(Value::Nil);
        match self.heap.table_rawnext(table, key) {
            Some((next_key, next_value)) => {
                self.stack.push(next_key);
                self.stack.push(next_value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ----- metatables -----

    /// Pushes the metatable of the value at `index`; false if it has none.
    pub fn metatable_get(&mut self, index: i32) -> bool {
        match self.metatable_of(self.value_at(index)) {
            Some(mt) => {
                self.stack.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pops a table (or nil) and installs it as the metatable of the value
    /// at `index`. The index is resolved before the pop.
    pub fn metatable_set(&mut self, index: i32) -> Result<()> {
        let target_pos = self
            .resolve_index(index)
            .ok_or_else(|| Error::type_error_msg("invalid stack index for metatable target"))?;
        let mt = match self.stack.pop().unwrap_or(Value::Nil) {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            other => {
                return Err(Error::type_error_msg(format!(
                    "metatable must be a table or nil, got {}",
                    other.type_name()
                )))
            }
        };
        match self.stack.get(target_pos).copied().unwrap_or(Value::Nil) {
            Value::Table(t) => {
                self.heap.table_mut(t).metatable = mt;
                Ok(())
            }
            Value::Userdata(u) => {
                self.heap.userdata_mut(u).metatable = mt;
                Ok(())
            }
            other => Err(Error::type_error_msg(format!(
                "cannot set a metatable on a {} value",
                other.type_name()
            ))),
        }
    }

    /// Fetches or creates the named metatable in the registry and pushes it.
    /// Returns true when the table was newly created.
    pub fn metatable_new(&mut self, name: &str) -> bool {
        if let Some(Value::Table(existing)) = self.metatable_registry.get(name).copied() {
            self.stack.push(Value::Table(existing));
            return false;
        }
        let mt = self.heap.new_table(0, 8);
        self.heap.table_mut(mt).assign_name(name);
        self.metatable_registry
            .insert(name.to_string(), Value::Table(mt));
        self.stack.push(Value::Table(mt));
        true
    }

    /// Pushes the named registry metatable, or nil when absent.
    pub fn metatable_find(&mut self, name: &str) {
        let value = self
            .metatable_registry
            .get(name)
            .copied()
            .unwrap_or(Value::Nil);
        self.stack.push(value);
    }

    // ----- globals and modules -----

    /// Pops a value and stores it as a global.
    pub fn set_global(&mut self, name: &str) {
        let value = self.stack.pop().unwrap_or(Value::Nil);
        let key = Value::String(self.heap.new_string(name));
        if let Value::Table(globals) = self.globals {
            self.heap.table_rawset(globals, key, value);
        }
    }

    /// Pushes the value of a global (nil when unset).
    pub fn get_global(&mut self, name: &str) {
        let value = match self.globals {
            Value::Table(globals) => self.heap.table_get_str(globals, name),
            _ => Value::Nil,
        };
        self.stack.push(value);
    }

    /// Registers a host function as a global.
    pub fn register_function(&mut self, name: &str, f: CFunction) {
        self.push_cfunction(f);
        self.set_global(name);
    }

    /// Builds a module table from a function list, caches it in the module
    /// cache and optionally exposes it as a global. Returns the table.
    pub fn create_module(
        &mut self,
        name: &str,
        functions: &[(&str, CFunction)],
        make_global: bool,
    ) -> GcRef {
        let table = self.heap.new_table(0, functions.len());
        self.heap.table_mut(table).assign_name(name);
        for &(fn_name, f) in functions {
            let key = Value::String(self.heap.new_string(fn_name));
            self.heap.table_rawset(table, key, Value::CFunction(f));
        }
        self.module_cache
            .insert(name.to_string(), Value::Table(table));
        if make_global {
            let key = Value::String(self.heap.new_string(name));
            if let Value::Table(globals) = self.globals {
                self.heap.table_rawset(globals, key, Value::Table(table));
            }
        }
        table
    }

    // ----- userdata -----

    /// Allocates a userdata buffer tagged with `uid`, pushes it and returns
    /// its handle. The bytes are reachable through
    /// [`userdata_bytes_mut`](Self::userdata_bytes_mut).
    pub fn userdata_new(&mut self, size: usize, uid: u32) -> GcRef {
        let u = self.heap.new_userdata(size, uid);
        self.stack.push(Value::Userdata(u));
        u
    }

    /// The bytes of the userdata at `index`, when it is one.
    pub fn to_userdata(&mut self, index: i32) -> Option<&mut [u8]> {
        match self.value_at(index) {
            Value::Userdata(u) => Some(&mut self.heap.userdata_mut(u).data),
            _ => None,
        }
    }

    /// The type tag of the userdata at `index`; 0 for non-userdata.
    pub fn userdata_get_uid(&self, index: i32) -> u32 {
        match self.value_at(index) {
            Value::Userdata(u) => self.heap.userdata(u).uid,
            _ => 0,
        }
    }

    /// Type-checked userdata access: the value must be a userdata carrying
    /// exactly `uid`.
    pub fn check_userdata(&mut self, index: i32, uid: u32) -> Result<GcRef> {
        let value = self.check_type(index, ValueType::Userdata)?;
        let Value::Userdata(u) = value else {
            unreachable!("check_type validated the kind");
        };
        let actual = self.heap.userdata(u).uid;
        if actual != uid {
            return Err(Error::new(
                ErrorKind::Runtime,
                format!(
                    "userdata type mismatch: expected tag {uid:#010x}, got {actual:#010x}"
                ),
            ));
        }
        Ok(u)
    }

    // ----- calls -----

    /// Calls the function below its `nargs` arguments at the top of the
    /// stack, expecting `nresults` results (255 for all). On error both
    /// stacks are restored to their pre-call shape and the error — annotated
    /// with a traceback — is re-raised.
    pub fn call(&mut self, nargs: usize, nresults: u8) -> Result<()> {
        if self.stack.len() < nargs + 1 {
            return Err(Error::type_error_msg("not enough arguments for call"));
        }
        let func_pos = self.stack.len() - nargs - 1;
        let frame_snapshot = self.call_stack.len();

        match self.perform_call(nargs, nresults, func_pos) {
            Ok(()) => Ok(()),
            Err(mut err) => {
                for frame in self.capture_traceback(frame_snapshot) {
                    err.push_trace_frame(frame);
                }
                self.heap.upvalues.close_from(func_pos, &self.stack);
                self.stack.truncate(func_pos);
                self.call_stack.truncate(frame_snapshot);
                Err(err)
            }
        }
    }

    /// `pcall`-style protected call: errors are caught and returned instead
    /// of propagated, with the stacks already restored.
    pub fn protected_call(&mut self, nargs: usize, nresults: u8) -> std::result::Result<(), Error> {
        self.call(nargs, nresults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_top_track_stack_shape() {
        let mut rt = Runtime::new();
        assert_eq!(rt.get_top(), 0);
        rt.push_integer(1);
        rt.push_boolean(true);
        rt.push_string("x");
        assert_eq!(rt.get_top(), 3);
        rt.pop(2);
        assert_eq!(rt.get_top(), 1);
        assert_eq!(rt.to_integer(-1), Some(1));
    }

    #[test]
    fn negative_indices_count_from_top() {
        let mut rt = Runtime::new();
        rt.push_integer(10);
        rt.push_integer(20);
        assert_eq!(rt.to_integer(-1), Some(20));
        assert_eq!(rt.to_integer(-2), Some(10));
        assert_eq!(rt.to_integer(0), Some(10));
    }

    #[test]
    fn dup_remove_insert_rearrange() {
        let mut rt = Runtime::new();
        rt.push_integer(1);
        rt.push_integer(2);
        rt.push_integer(3);
        rt.dup(0);
        assert_eq!(rt.to_integer(-1), Some(1));
        rt.remove(-1);
        assert_eq!(rt.get_top(), 3);
        rt.push_integer(9);
        rt.insert(0);
        assert_eq!(rt.to_integer(0), Some(9));
        assert_eq!(rt.to_integer(-1), Some(3));
    }

    #[test]
    fn integer_round_trips_through_push() {
        let mut rt = Runtime::new();
        rt.push_integer(-987654321);
        assert_eq!(rt.to_integer(-1), Some(-987654321));
        assert_eq!(rt.to_number(-1), Some(-987654321.0));
    }

    #[test]
    fn check_reports_expected_and_got() {
        let mut rt = Runtime::new();
        rt.push_boolean(true);
        let err = rt.check_integer(0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Type);
        assert!(err.message.contains("expected integer"));
        assert!(err.message.contains("got boolean"));
    }

    #[test]
    fn table_raw_roundtrip_through_api() {
        let mut rt = Runtime::new();
        rt.table_new(0, 0);
        rt.push_integer(7);
        rt.push_string("seven");
        rt.table_rawset_api(0).unwrap();
        rt.push_integer(7);
        rt.table_rawget_api(0).unwrap();
        assert_eq!(rt.to_str(-1), Some("seven"));
    }

    #[test]
    fn userdata_uid_checks() {
        let mut rt = Runtime::new();
        let uid_a = sable_core::make_uid("A");
        let uid_b = sable_core::make_uid("B");
        rt.userdata_new(8, uid_a);
        assert_eq!(rt.userdata_get_uid(-1), uid_a);
        assert!(rt.check_userdata(-1, uid_a).is_ok());
        let err = rt.check_userdata(-1, uid_b).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
    }

    #[test]
    fn globals_round_trip() {
        let mut rt = Runtime::new();
        rt.push_integer(5);
        rt.set_global("answer");
        rt.get_global("answer");
        assert_eq!(rt.to_integer(-1), Some(5));
        rt.get_global("missing");
        assert!(rt.is_nil(-1));
    }

    #[test]
    fn metatable_registry_create_or_fetch() {
        let mut rt = Runtime::new();
        assert!(rt.metatable_new("Point"));
        let first = rt.value_at(-1);
        rt.pop(1);
        assert!(!rt.metatable_new("Point"));
        let second = rt.value_at(-1);
        assert!(rt.heap.values_equal(first, second));
    }

    #[test]
    fn call_restores_stacks_on_error() {
        fn failing(rt: &mut Runtime) -> Result<usize> {
            let _ = rt;
            Err(Error::runtime_msg("host failure"))
        }
        let mut rt = Runtime::new();
        rt.push_integer(999);
        rt.push_cfunction(failing);
        rt.push_integer(1);
        let err = rt.call(1, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(rt.get_top(), 1);
        assert_eq!(rt.to_integer(-1), Some(999));
        assert!(rt.call_stack.is_empty());
    }

    #[test]
    fn cfunction_results_are_padded_and_truncated() {
        fn two_results(rt: &mut Runtime) -> Result<usize> {
            rt.push_integer(1);
            rt.push_integer(2);
            Ok(2)
        }
        let mut rt = Runtime::new();
        rt.push_cfunction(two_results);
        rt.call(0, 3).unwrap();
        assert_eq!(rt.get_top(), 3);
        assert!(rt.is_nil(-1));
        assert_eq!(rt.to_integer(-3), Some(1));

        rt.set_top(0);
        rt.push_cfunction(two_results);
        rt.call(0, 1).unwrap();
        assert_eq!(rt.get_top(), 1);
        assert_eq!(rt.to_integer(-1), Some(1));
    }
}
