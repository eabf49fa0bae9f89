//! Closures: a proto bound to captured upvalues.

use crate::object::GcRef;

/// Payload of a heap closure object.
///
/// Upvalues are referenced by index into the runtime-wide upvalue pool, not
/// by pointer: two closures capturing the same local share the same pool
/// slot, and the pool can compact closed slots through its free list.
pub struct Closure {
    /// The function template.
    pub proto: GcRef,
    /// Pool indices, in the proto's declared upvalue order.
    pub upvalue_indices: Vec<u32>,
}

impl Closure {
    pub fn new(proto: GcRef) -> Self {
        Self {
            proto,
            upvalue_indices: Vec::new(),
        }
    }
}
