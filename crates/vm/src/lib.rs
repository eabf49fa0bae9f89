//! # Sable Virtual Machine
//!
//! A register-based bytecode VM with an incremental tri-color garbage
//! collector, the execution core of the Sable language.
//!
//! ## Architecture
//!
//! - **[`Runtime`]**: one self-contained VM instance — heap, value stack,
//!   call stack, globals, registries and the host API.
//! - **[`value::Value`]**: trivially copyable tagged values; heap-backed
//!   cases hold [`object::GcRef`] handles the collector traces.
//! - **[`heap::Heap`] / [`gc`]**: slot-arena object storage with an
//!   incremental mark/sweep collector, finalizer queue and adaptive typed
//!   free-object pools.
//! - **[`op_code::OpCode`] / [`instruction::Instruction`]**: the fixed-width
//!   32-bit instruction set and its static metadata table.
//! - **[`execution_engine`]**: the fetch-decode-dispatch loop, call/return/
//!   tail-call protocol, upvalue management and metatable dispatch.
//! - **[`api`]**: the stack-oriented embedding API (push/pop/convert/check,
//!   tables, metatables, globals, userdata, protected calls).
//! - **[`stdlib`]**: base globals plus the `gc` and `debug` modules.
//!
//! ## Example
//!
//! ```
//! use sable_vm::Runtime;
//!
//! let mut rt = Runtime::new();
//! rt.open_libs();
//! rt.push_integer(2);
//! rt.push_integer(40);
//! assert_eq!(rt.get_top(), 2);
//! let sum = rt.to_integer(-1).unwrap() + rt.to_integer(-2).unwrap();
//! assert_eq!(sum, 42);
//! ```
//!
//! Compiling source text into a runnable closure lives in `sable-compiler`;
//! this crate only executes already-compiled [`object::Proto`]s.

/// Stack-oriented host embedding API.
pub mod api;
/// Arithmetic, bitwise and comparison semantics.
pub mod arithmetic;
/// Breakpoint hooks.
pub mod debugger;
/// Bytecode disassembly.
pub mod dump;
/// The dispatch loop and call protocol.
pub mod execution_engine;
/// Call frames.
pub mod frame;
/// Incremental tri-color collection.
pub mod gc;
/// Object heap and typed pools.
pub mod heap;
/// Fixed-width instruction encoding.
pub mod instruction;
/// Metamethod lookup and invocation.
pub mod metatable;
/// Heap object kinds.
pub mod object;
/// Opcode definitions and metadata.
pub mod op_code;
/// The runtime instance.
pub mod runtime;
/// Base, `gc` and `debug` library modules.
pub mod stdlib;
/// Table access paths.
pub mod table_ops;
/// The upvalue pool.
pub mod upvalue;
/// Tagged values.
pub mod value;

pub use debugger::{DebugEvent, Debugger};
pub use frame::CallFrame;
pub use heap::Heap;
pub use instruction::Instruction;
pub use metatable::MetaMethod;
pub use object::{GcColor, GcKind, GcPhase, GcRef, Proto};
pub use op_code::{OpCode, OpCodeMeta, OpMode, OPCODE_META, OP_COUNT};
pub use runtime::{PrintHandler, Runtime};
pub use value::{CFunction, TypeFlags, Value, ValueType};
