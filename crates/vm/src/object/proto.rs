//! Function prototypes.

use crate::instruction::Instruction;
use crate::object::GcRef;
use crate::value::Value;

/// Immutable function template produced by the compiler.
///
/// A proto owns its bytecode, three deduplicated constant pools addressed by
/// instruction operands, the protos of nested functions, upvalue metadata and
/// per-instruction source positions. Closures pair a proto with captured
/// upvalue slots.
pub struct Proto {
    /// Bytecode.
    pub code: Vec<Instruction>,
    /// String constants (each a `Value::String`).
    pub str_constants: Vec<Value>,
    /// Integer constants.
    pub int_constants: Vec<i64>,
    /// Float constants.
    pub float_constants: Vec<f64>,
    /// Nested function prototypes, indexed by `Closure` instructions.
    pub protos: Vec<GcRef>,
    /// One name per declared upvalue (string refs), in capture order.
    pub upvalue_names: Vec<GcRef>,
    /// Source line per instruction.
    pub line_info: Vec<u32>,
    /// Source column per instruction.
    pub column_info: Vec<u32>,
    /// Chunk name for diagnostics.
    pub source_name: Option<GcRef>,
    /// Absolute source path, when loaded from a file.
    pub source_path: Option<GcRef>,
    /// Function name for tracebacks.
    pub name: Option<GcRef>,
    /// Declared parameter count.
    pub num_params: u32,
    /// Registers the function may touch, register 0 (the closure) included.
    pub max_stack_size: u32,
    /// Accepts trailing varargs.
    pub is_vararg: bool,
    /// This function or a nested one captures upvalues; every exit path must
    /// close the open ones at or above the frame base.
    pub has_upvalues: bool,
}

impl Proto {
    /// An empty prototype for the compiler to fill in.
    pub fn new() -> Self {
        Self {
            code: Vec::new(),
            str_constants: Vec::new(),
            int_constants: Vec::new(),
            float_constants: Vec::new(),
            protos: Vec::new(),
            upvalue_names: Vec::new(),
            line_info: Vec::new(),
            column_info: Vec::new(),
            source_name: None,
            source_path: None,
            name: None,
            num_params: 0,
            max_stack_size: 0,
            is_vararg: false,
            has_upvalues: false,
        }
    }

    /// Source position of the instruction at `pc`.
    pub fn position_at(&self, pc: usize) -> (u32, u32) {
        let line = self.line_info.get(pc).copied().unwrap_or(0);
        let column = self.column_info.get(pc).copied().unwrap_or(0);
        (line, column)
    }
}

impl Default for Proto {
    fn default() -> Self {
        Self::new()
    }
}
