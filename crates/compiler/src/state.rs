//! Per-function compilation state.
//!
//! One [`FuncState`] exists per function being compiled; nested function
//! definitions push another one, and upvalue resolution walks the stack of
//! states from the innermost outward. Registers are managed as a fast stack:
//! `alloc_reg` bumps `freereg`, `free_reg` only ever retracts the last
//! allocation, and statement boundaries reset `freereg` to the locals
//! watermark.

use hashbrown::HashMap;

use sable_core::limits::MAX_REGISTERS;
use sable_core::{Error, Result, SourceLocation};
use sable_syntax::ast::{Block, Span};
use sable_vm::{GcRef, Instruction, Runtime};

/// A declared local variable.
#[derive(Debug, Clone)]
pub(crate) struct Local {
    pub name: String,
    pub reg: u8,
    pub is_const: bool,
}

/// One lexical scope's locals plus the state to restore when it closes.
pub(crate) struct Scope {
    pub locals: Vec<Local>,
    pub saved_min_freereg: u8,
    pub defer_floor: usize,
}

/// An upvalue declared by the function under compilation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpvalueInfo {
    /// Parent-local register (when `is_local`) or parent upvalue index.
    pub index: u8,
    pub is_local: bool,
    pub is_const: bool,
}

/// Pending break/continue jumps of one loop.
#[derive(Default)]
pub(crate) struct LoopContext {
    pub break_jumps: Vec<usize>,
    pub continue_jumps: Vec<usize>,
    /// Scope depth at loop entry; break/continue flush defers below it.
    pub scope_level: usize,
}

/// A `defer` block pending execution at scope exit.
pub(crate) struct DeferInfo {
    pub body: Block,
    pub scope_level: usize,
}

/// State for one function being compiled.
pub(crate) struct FuncState {
    /// The proto under construction (heap-resident; the GC is paused for the
    /// whole compilation).
    pub proto: GcRef,
    pub scopes: Vec<Scope>,
    pub upvalues: Vec<UpvalueInfo>,
    pub upvalue_indices: HashMap<String, usize>,
    pub loop_stack: Vec<LoopContext>,
    pub defer_stack: Vec<DeferInfo>,
    pub freereg: u8,
    pub min_freereg: u8,
    pub last_line: u32,
    pub last_column: u32,
}

impl FuncState {
    pub fn new(proto: GcRef) -> Self {
        Self {
            proto,
            scopes: Vec::new(),
            upvalues: Vec::new(),
            upvalue_indices: HashMap::new(),
            loop_stack: Vec::new(),
            defer_stack: Vec::new(),
            freereg: 0,
            min_freereg: 0,
            last_line: 1,
            last_column: 1,
        }
    }
}

/// The compiler: a runtime handle (protos and constant strings are heap
/// objects) plus the stack of function states.
pub(crate) struct Compiler<'rt> {
    pub rt: &'rt mut Runtime,
    pub chunk_name: String,
    pub funcs: Vec<FuncState>,
}

impl<'rt> Compiler<'rt> {
    pub fn new(rt: &'rt mut Runtime, chunk_name: &str) -> Self {
        Self {
            rt,
            chunk_name: chunk_name.to_string(),
            funcs: Vec::new(),
        }
    }

    /// The innermost function state.
    pub fn f(&mut self) -> &mut FuncState {
        self.funcs.last_mut().expect("active function state")
    }

    pub fn f_ref(&self) -> &FuncState {
        self.funcs.last().expect("active function state")
    }

    pub fn location(&self) -> SourceLocation {
        let f = self.f_ref();
        SourceLocation::new(self.chunk_name.clone(), f.last_line, f.last_column)
    }

    pub fn mark_span(&mut self, span: Span) {
        let f = self.f();
        f.last_line = span.line;
        f.last_column = span.column;
    }

    // ----- registers -----

    /// Allocates the next register, growing the proto's register window.
    pub fn alloc_reg(&mut self) -> Result<u8> {
        let location = self.location();
        let f = self.f();
        if f.freereg as usize >= MAX_REGISTERS {
            return Err(Error::runtime("register overflow", location));
        }
        let reg = f.freereg;
        f.freereg += 1;
        let freereg = f.freereg;
        let proto = f.proto;
        let max = &mut self.rt.heap_mut().proto_mut(proto).max_stack_size;
        if (freereg as u32) > *max {
            *max = freereg as u32;
        }
        Ok(reg)
    }

    /// Frees a register only when it was the last one allocated; interior
    /// frees are no-ops and statement-end cleanup handles the rest.
    pub fn free_reg(&mut self, reg: u8) {
        let f = self.f();
        if reg + 1 == f.freereg && f.freereg > f.min_freereg {
            f.freereg -= 1;
        }
    }

    /// Statement boundary: temporaries die, locals stay.
    pub fn reset_temporaries(&mut self) {
        let f = self.f();
        f.freereg = f.min_freereg;
    }

    // ----- emission -----

    pub fn emit(&mut self, instr: Instruction) -> usize {
        let f = self.funcs.last().expect("active function state");
        let (line, column, proto) = (f.last_line, f.last_column, f.proto);
        let proto = self.rt.heap_mut().proto_mut(proto);
        proto.code.push(instr);
        proto.line_info.push(line);
        proto.column_info.push(column);
        proto.code.len() - 1
    }

    /// Current emission position (the next instruction index).
    pub fn here(&self) -> usize {
        self.rt.heap().proto(self.f_ref().proto).code.len()
    }

    /// Rewrites the instruction at `position`.
    pub fn patch(&mut self, position: usize, instr: Instruction) {
        let proto = self.f_ref().proto;
        self.rt.heap_mut().proto_mut(proto).code[position] = instr;
    }

    /// Patches the placeholder jump at `position` to land on `target`.
    pub fn patch_jump_to(&mut self, position: usize, target: usize) {
        let offset = target as i64 - position as i64 - 1;
        self.patch(position, Instruction::make_jmp(offset as i32));
    }

    /// True when the last emitted instruction ends the block (so no jump
    /// over branch arms is needed).
    pub fn last_is_terminal(&self) -> bool {
        let proto = self.rt.heap().proto(self.f_ref().proto);
        proto
            .code
            .last()
            .map(|i| i.op().meta().is_terminator)
            .unwrap_or(false)
    }

    // ----- constants -----

    /// Interns an integer constant, deduplicating by value.
    pub fn add_int_constant(&mut self, value: i64) -> u32 {
        let proto = self.f_ref().proto;
        let pool = &mut self.rt.heap_mut().proto_mut(proto).int_constants;
        if let Some(index) = pool.iter().position(|&v| v == value) {
            return index as u32;
        }
        pool.push(value);
        (pool.len() - 1) as u32
    }

    /// Interns a float constant, deduplicating by bit pattern.
    pub fn add_float_constant(&mut self, value: f64) -> u32 {
        let proto = self.f_ref().proto;
        let pool = &mut self.rt.heap_mut().proto_mut(proto).float_constants;
        if let Some(index) = pool.iter().position(|&v| v.to_bits() == value.to_bits()) {
            return index as u32;
        }
        pool.push(value);
        (pool.len() - 1) as u32
    }

    /// Interns a string constant, deduplicating by content.
    pub fn add_string_constant(&mut self, text: &str) -> u32 {
        let proto = self.f_ref().proto;
        {
            let heap = self.rt.heap();
            let pool = &heap.proto(proto).str_constants;
            for (index, value) in pool.iter().enumerate() {
                if let Some(s) = value.gc_ref() {
                    if heap.string(s).view() == text {
                        return index as u32;
                    }
                }
            }
        }
        let s = self.rt.heap_mut().new_string(text);
        let pool = &mut self.rt.heap_mut().proto_mut(proto).str_constants;
        pool.push(sable_vm::Value::String(s));
        (pool.len() - 1) as u32
    }

    // ----- scopes and locals -----

    pub fn enter_scope(&mut self) {
        let f = self.f();
        let scope = Scope {
            locals: Vec::new(),
            saved_min_freereg: f.min_freereg,
            defer_floor: f.defer_stack.len(),
        };
        f.scopes.push(scope);
    }

    /// Closes the innermost scope, restoring the register watermark.
    /// Deferred blocks of the scope are compiled by the caller *before* this
    /// (they need the scope's locals still visible).
    pub fn leave_scope(&mut self) {
        let f = self.f();
        if let Some(scope) = f.scopes.pop() {
            f.min_freereg = scope.saved_min_freereg;
            f.freereg = f.min_freereg;
            f.defer_stack.truncate(scope.defer_floor);
        }
    }

    pub fn scope_level(&self) -> usize {
        self.f_ref().scopes.len()
    }

    /// Declares a local at the next watermark register. The caller has
    /// already compiled the initializer into that register.
    pub fn declare_local(&mut self, name: &str, reg: u8, is_const: bool) {
        let f = self.f();
        if let Some(scope) = f.scopes.last_mut() {
            scope.locals.push(Local {
                name: name.to_string(),
                reg,
                is_const,
            });
        }
        if reg >= f.min_freereg {
            f.min_freereg = reg + 1;
        }
        if f.freereg < f.min_freereg {
            f.freereg = f.min_freereg;
        }
    }

    /// Innermost local with this name in the current function.
    pub fn resolve_local(&self, name: &str) -> Option<Local> {
        Self::resolve_local_in(self.funcs.last().expect("active function state"), name)
    }

    fn resolve_local_in(f: &FuncState, name: &str) -> Option<Local> {
        for scope in f.scopes.iter().rev() {
            for local in scope.locals.iter().rev() {
                if local.name == name {
                    return Some(local.clone());
                }
            }
        }
        None
    }

    /// Resolves `name` as an upvalue of the innermost function, creating
    /// descriptor chain entries through enclosing functions as needed.
    pub fn resolve_upvalue(&mut self, name: &str) -> Result<Option<(u8, bool)>> {
        let level = self.funcs.len() - 1;
        self.resolve_upvalue_at(level, name)
    }

    fn resolve_upvalue_at(&mut self, level: usize, name: &str) -> Result<Option<(u8, bool)>> {
        if let Some(&existing) = self.funcs[level].upvalue_indices.get(name) {
            let info = self.funcs[level].upvalues[existing];
            return Ok(Some((existing as u8, info.is_const)));
        }
        if level == 0 {
            return Ok(None);
        }

        // A local of the enclosing function becomes a direct capture.
        if let Some(local) = Self::resolve_local_in(&self.funcs[level - 1], name) {
            let index = self.register_upvalue(
                level,
                name,
                UpvalueInfo {
                    index: local.reg,
                    is_local: true,
                    is_const: local.is_const,
                },
            )?;
            self.mark_has_upvalues(level);
            return Ok(Some((index, local.is_const)));
        }

        // Otherwise chain through the enclosing function's upvalues.
        if let Some((parent_index, is_const)) = self.resolve_upvalue_at(level - 1, name)? {
            let index = self.register_upvalue(
                level,
                name,
                UpvalueInfo {
                    index: parent_index,
                    is_local: false,
                    is_const,
                },
            )?;
            self.mark_has_upvalues(level);
            return Ok(Some((index, is_const)));
        }

        Ok(None)
    }

    fn register_upvalue(&mut self, level: usize, name: &str, info: UpvalueInfo) -> Result<u8> {
        let f = &mut self.funcs[level];
        if f.upvalues.len() >= sable_core::limits::MAX_UPVALUES {
            return Err(Error::runtime(
                "too many upvalues",
                SourceLocation::new(self.chunk_name.clone(), f.last_line, f.last_column),
            ));
        }
        let index = f.upvalues.len();
        f.upvalues.push(info);
        f.upvalue_indices.insert(name.to_string(), index);
        let proto = f.proto;
        let name_ref = self.rt.heap_mut().new_string(name);
        let proto = self.rt.heap_mut().proto_mut(proto);
        proto.upvalue_names.push(name_ref);
        proto.has_upvalues = true;
        Ok(index as u8)
    }

    /// A function that declares upvalues forces the *enclosing* function to
    /// close open upvalues on exit as well.
    fn mark_has_upvalues(&mut self, level: usize) {
        let child = self.funcs[level].proto;
        self.rt.heap_mut().proto_mut(child).has_upvalues = true;
        if level > 0 {
            let parent = self.funcs[level - 1].proto;
            self.rt.heap_mut().proto_mut(parent).has_upvalues = true;
        }
    }
}
