//! Metamethod resolution and invocation.
//!
//! Metamethods are plain functions stored in a metatable's hash part under
//! well-known names. Only tables and userdata carry metatables. Dispatch
//! rules live with the operations (arithmetic tries the left operand's
//! metamethod before the right one, `__index` only fires on a miss, and so
//! on); this module supplies lookup and the call plumbing.

use sable_core::Result;

use crate::object::GcRef;
use crate::runtime::Runtime;
use crate::value::Value;

/// The metamethods the VM consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaMethod {
    Index,
    NewIndex,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    BNot,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Eq,
    Lt,
    Le,
    Call,
    Len,
    ToString,
    Pairs,
    Gc,
}

impl MetaMethod {
    /// The field name looked up in the metatable.
    pub fn name(self) -> &'static str {
        match self {
            MetaMethod::Index => "__index",
            MetaMethod::NewIndex => "__newindex",
            MetaMethod::Add => "__add",
            MetaMethod::Sub => "__sub",
            MetaMethod::Mul => "__mul",
            MetaMethod::Div => "__div",
            MetaMethod::Mod => "__mod",
            MetaMethod::Pow => "__pow",
            MetaMethod::Unm => "__unm",
            MetaMethod::BNot => "__bnot",
            MetaMethod::BAnd => "__band",
            MetaMethod::BOr => "__bor",
            MetaMethod::BXor => "__bxor",
            MetaMethod::Shl => "__shl",
            MetaMethod::Shr => "__shr",
            MetaMethod::Eq => "__eq",
            MetaMethod::Lt => "__lt",
            MetaMethod::Le => "__le",
            MetaMethod::Call => "__call",
            MetaMethod::Len => "__len",
            MetaMethod::ToString => "__tostring",
            MetaMethod::Pairs => "__pairs",
            MetaMethod::Gc => "__gc",
        }
    }
}

impl Runtime {
    /// The metatable of a value, for the kinds that can have one.
    pub fn metatable_of(&self, value: Value) -> Option<GcRef> {
        match value {
            Value::Table(r) => self.heap.table(r).metatable,
            Value::Userdata(r) => self.heap.userdata(r).metatable,
            _ => None,
        }
    }

    /// Looks up a metamethod on a value's metatable. Returns `NullOpt` when
    /// the value has no metatable or the field is absent.
    pub fn get_metamethod(&self, value: Value, mm: MetaMethod) -> Value {
        match self.metatable_of(value) {
            Some(mt) => {
                let found = self.heap.table_get_str(mt, mm.name());
                if found.is_nil() {
                    Value::NullOpt
                } else {
                    found
                }
            }
            None => Value::NullOpt,
        }
    }

    /// Calls a metamethod and returns its first result. The arguments are
    /// pushed above the current stack top; the stack is restored afterwards.
    pub fn call_metamethod(&mut self, mm: Value, args: &[Value]) -> Result<Value> {
        let call_base = self.stack.len();
        self.stack.push(mm);
        self.stack.extend_from_slice(args);
        let outcome = self.perform_call(args.len(), 1, call_base);
        match outcome {
            Ok(()) => {
                let result = if self.stack.len() > call_base {
                    self.stack[call_base]
                } else {
                    Value::NullOpt
                };
                self.stack.truncate(call_base);
                Ok(result)
            }
            Err(err) => Err(err),
        }
    }

    /// Calls a metamethod for effect, discarding results.
    pub fn call_metamethod_void(&mut self, mm: Value, args: &[Value]) -> Result<()> {
        let call_base = self.stack.len();
        self.stack.push(mm);
        self.stack.extend_from_slice(args);
        self.perform_call(args.len(), 0, call_base)?;
        self.stack.truncate(call_base);
        Ok(())
    }
}
