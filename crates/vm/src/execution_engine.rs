//! The dispatch loop and call protocol.
//!
//! Execution is a single fetch-decode-dispatch loop over the current frame's
//! bytecode. Script-to-script calls push a [`CallFrame`] and continue the
//! same loop — only host entries (`call`, metamethod invocations, finalizers)
//! recurse natively. `Return` and `TailCall` pop frames; when the frame depth
//! drops back to the loop's entry depth, the loop exits.
//!
//! Register `r` of the active frame lives at `stack[frame.base + r]`, with
//! register 0 holding the callee closure. The stack is grown to
//! `base + max_stack_size + 1` on frame entry so register access never
//! reallocates mid-instruction.

use sable_core::limits::MULTRET;
use sable_core::{Error, Result};

use crate::arithmetic::{ArithOp, BitOp};
use crate::frame::CallFrame;
use crate::metatable::MetaMethod;
use crate::object::GcRef;
use crate::op_code::OpCode;
use crate::runtime::Runtime;
use crate::value::{CFunction, Value};

/// Longest `__call` metamethod chain honored before erroring out.
const MAX_CALL_CHAIN: usize = 10;

enum Flow {
    /// Keep dispatching.
    Continue,
    /// The frame the loop entered on has returned.
    Exit,
}

impl Runtime {
    // ----- small helpers -----

    fn frame(&self) -> &CallFrame {
        self.call_stack.last().expect("active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.call_stack.last_mut().expect("active call frame")
    }

    pub(crate) fn reg(&self, base: usize, r: u8) -> Value {
        self.stack[base + r as usize]
    }

    pub(crate) fn set_reg(&mut self, base: usize, r: u8, value: Value) {
        self.stack[base + r as usize] = value;
    }

    fn ensure_stack(&mut self, len: usize) {
        if self.stack.len() < len {
            self.stack.resize(len, Value::Nil);
        }
    }

    fn int_constant(&self, proto: GcRef, k: u32) -> Result<i64> {
        self.heap
            .proto(proto)
            .int_constants
            .get(k as usize)
            .copied()
            .ok_or_else(|| Error::runtime_msg("integer constant index out of range"))
    }

    fn float_constant(&self, proto: GcRef, k: u32) -> Result<f64> {
        self.heap
            .proto(proto)
            .float_constants
            .get(k as usize)
            .copied()
            .ok_or_else(|| Error::runtime_msg("float constant index out of range"))
    }

    fn str_constant(&self, proto: GcRef, k: u32) -> Result<Value> {
        self.heap
            .proto(proto)
            .str_constants
            .get(k as usize)
            .copied()
            .ok_or_else(|| Error::runtime_msg("string constant index out of range"))
    }

    fn current_closure(&self, base: usize) -> Result<GcRef> {
        match self.stack[base] {
            Value::Closure(c) => Ok(c),
            other => Err(Error::runtime_msg(format!(
                "frame base holds a {} instead of the running closure",
                other.type_name()
            ))),
        }
    }

    // ----- call protocol -----

    /// Calls the value at `func_pos` with `nargs` arguments sitting above
    /// it. This is the host entry: metamethods, finalizers and the public
    /// `call` API route through here.
    pub fn perform_call(&mut self, nargs: usize, nresults: u8, func_pos: usize) -> Result<()> {
        self.gc_step();
        let (callee, nargs) = self.resolve_callable(func_pos, nargs)?;
        match callee {
            Value::Closure(closure) => self.execute_closure(closure, nargs, nresults, func_pos),
            Value::CFunction(f) => {
                self.execute_native(f, nargs, nresults, func_pos)?;
                Ok(())
            }
            _ => unreachable!("resolve_callable yields callables only"),
        }
    }

    /// Resolves `__call` chains: a non-callable callee with a `__call`
    /// metamethod is replaced by that metamethod, with the original value
    /// prepended as the first argument.
    fn resolve_callable(&mut self, func_pos: usize, mut nargs: usize) -> Result<(Value, usize)> {
        for _ in 0..MAX_CALL_CHAIN {
            let callee = self.stack[func_pos];
            match callee {
                Value::Closure(_) | Value::CFunction(_) => return Ok((callee, nargs)),
                _ => {
                    let mm = self.get_metamethod(callee, MetaMethod::Call);
                    if !mm.is_callable() && !matches!(mm, Value::Table(_)) {
                        return Err(Error::type_error(
                            format!("attempt to call a {} value", callee.type_name()),
                            self.current_location(),
                        ));
                    }
                    self.stack.insert(func_pos, mm);
                    nargs += 1;
                }
            }
        }
        Err(Error::runtime(
            "'__call' chain too long; possible loop",
            self.current_location(),
        ))
    }

    /// Runs a host function. Its results are the top values of the stack on
    /// return; they are moved down to `func_pos` and padded or truncated to
    /// the expected count. Returns how many results were kept.
    fn execute_native(
        &mut self,
        f: CFunction,
        _nargs: usize,
        nresults: u8,
        func_pos: usize,
    ) -> Result<usize> {
        self.call_stack
            .push(CallFrame::host(func_pos, self.stack.len()));
        let returned = f(self)?;
        self.call_stack.pop();

        let returned = returned.min(self.stack.len().saturating_sub(func_pos));
        let wanted = if nresults == MULTRET {
            returned
        } else {
            nresults as usize
        };

        let src = self.stack.len() - returned;
        let moved = returned.min(wanted);
        self.stack.copy_within(src..src + moved, func_pos);
        self.ensure_stack(func_pos + wanted);
        for i in moved..wanted {
            self.stack[func_pos + i] = Value::Nil;
        }
        self.stack.truncate(func_pos + wanted);
        Ok(wanted)
    }

    /// Pushes a frame for a script function at `func_pos` and runs the
    /// dispatch loop until that frame returns.
    fn execute_closure(
        &mut self,
        closure: GcRef,
        nargs: usize,
        nresults: u8,
        func_pos: usize,
    ) -> Result<()> {
        let proto_ref = self.heap.closure(closure).proto;
        let max_stack = self.heap.proto(proto_ref).max_stack_size as usize;
        let entry_depth = self.call_stack.len();

        self.stack.truncate(func_pos + 1 + nargs);
        self.call_stack
            .push(CallFrame::script(proto_ref, func_pos, nargs, nresults));
        self.ensure_stack(func_pos + max_stack + 1);

        self.dispatch_loop(entry_depth)
    }

    /// Grows the stack back to the active frame's register window after a
    /// call shrank it, and records the caller-visible result top.
    fn restore_caller(&mut self, results_at: usize, result_count: usize) {
        let frame = self.frame();
        let base = frame.base;
        let max_stack = frame
            .proto
            .map(|p| self.heap.proto(p).max_stack_size as usize)
            .unwrap_or(0);
        self.ensure_stack(base + max_stack + 1);
        self.frame_mut().top = results_at + result_count;
    }

    // ----- the dispatch loop -----

    fn dispatch_loop(&mut self, entry_depth: usize) -> Result<()> {
        loop {
            if self.debugger.as_ref().map(|d| d.is_enabled()).unwrap_or(false) {
                self.debug_poll();
            }

            let frame_index = self.call_stack.len() - 1;
            let (proto_ref, base, pc) = {
                let frame = &self.call_stack[frame_index];
                let proto = frame
                    .proto
                    .ok_or_else(|| Error::runtime_msg("host frame entered dispatch loop"))?;
                (proto, frame.base, frame.pc)
            };

            let instr = {
                let proto = self.heap.proto(proto_ref);
                *proto.code.get(pc).ok_or_else(|| {
                    Error::runtime_msg("program counter ran past the end of the function")
                })?
            };
            self.call_stack[frame_index].pc = pc + 1;

            match instr.op() {
                // ----- constant loads -----
                OpCode::LoadNil => {
                    for i in 0..=instr.b() {
                        self.set_reg(base, instr.a() + i, Value::Nil);
                    }
                }
                OpCode::LoadBool => {
                    self.set_reg(base, instr.a(), Value::Boolean(instr.bool_value()));
                    if instr.skip_next() {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::LoadImm => {
                    self.set_reg(base, instr.a(), Value::Integer(instr.signed_offset() as i64));
                }
                OpCode::LoadI => {
                    let v = self.int_constant(proto_ref, instr.const_index())?;
                    self.set_reg(base, instr.a(), Value::Integer(v));
                }
                OpCode::LoadF => {
                    let v = self.float_constant(proto_ref, instr.const_index())?;
                    self.set_reg(base, instr.a(), Value::Number(v));
                }
                OpCode::LoadS => {
                    let v = self.str_constant(proto_ref, instr.const_index())?;
                    self.set_reg(base, instr.a(), v);
                }

                // ----- moves and globals -----
                OpCode::Move => {
                    let v = self.reg(base, instr.b());
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::GetGlobal => {
                    let key = self.str_constant(proto_ref, instr.const_index())?;
                    let globals = self.globals_ref()?;
                    let v = self.heap.table_rawget(globals, key);
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::SetGlobal => {
                    let key = self.str_constant(proto_ref, instr.const_index())?;
                    let v = self.reg(base, instr.a());
                    let globals = self.globals_ref()?;
                    self.heap.table_rawset(globals, key, v);
                }
                OpCode::IncGlobal => {
                    self.step_global(proto_ref, instr.large_const_index(), 1)?;
                }
                OpCode::DecGlobal => {
                    self.step_global(proto_ref, instr.large_const_index(), -1)?;
                }

                // ----- upvalues -----
                OpCode::GetUpval => {
                    let closure = self.current_closure(base)?;
                    let uv = self.upvalue_slot(closure, instr.b())?;
                    let v = self.heap.upvalues.get(uv, &self.stack);
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::SetUpval => {
                    let closure = self.current_closure(base)?;
                    let uv = self.upvalue_slot(closure, instr.b())?;
                    let v = self.reg(base, instr.a());
                    self.heap.upvalues.set(uv, v, &mut self.stack);
                }
                OpCode::IncUpvalue => {
                    self.step_upvalue(base, instr.a(), 1)?;
                }
                OpCode::DecUpvalue => {
                    self.step_upvalue(base, instr.a(), -1)?;
                }

                // ----- tables -----
                OpCode::NewTable => {
                    let t = self
                        .heap
                        .new_table(instr.b() as usize, instr.c() as usize);
                    self.set_reg(base, instr.a(), Value::Table(t));
                    self.gc_step();
                }
                OpCode::GetField => {
                    let container = self.reg(base, instr.b());
                    let key = self.reg(base, instr.c());
                    let v = self.index_value(container, key)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::GetFieldI => {
                    let container = self.reg(base, instr.b());
                    let key = Value::Integer(instr.small_const_index() as i64);
                    let v = self.index_value(container, key)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::GetFieldS => {
                    let container = self.reg(base, instr.b());
                    let key = self.str_constant(proto_ref, instr.small_const_index())?;
                    let v = self.index_value(container, key)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::SetField => {
                    let container = self.reg(base, instr.a());
                    let key = self.reg(base, instr.b());
                    let v = self.reg(base, instr.c());
                    self.store_value(container, key, v)?;
                }
                OpCode::SetFieldI => {
                    let container = self.reg(base, instr.a());
                    let key = Value::Integer(instr.small_const_index() as i64);
                    let v = self.reg(base, instr.b());
                    self.store_value(container, key, v)?;
                }
                OpCode::SetFieldS => {
                    let container = self.reg(base, instr.a());
                    let key = self.str_constant(proto_ref, instr.small_const_index())?;
                    let v = self.reg(base, instr.b());
                    self.store_value(container, key, v)?;
                }
                OpCode::SelfField => {
                    let container = self.reg(base, instr.b());
                    let key = self.reg(base, instr.c());
                    self.set_reg(base, instr.a() + 1, container);
                    let method = self.index_value(container, key)?;
                    self.set_reg(base, instr.a(), method);
                }
                OpCode::SetList => {
                    self.op_set_list(base, instr.a(), instr.b(), instr.c())?;
                }

                // ----- arithmetic -----
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod
                | OpCode::Pow => {
                    let op = arith_op_for(instr.op());
                    let l = self.reg(base, instr.b());
                    let r = self.reg(base, instr.c());
                    let v = self.arith(op, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::AddImm | OpCode::SubImm => {
                    let op = arith_op_for(instr.op());
                    let l = self.reg(base, instr.b());
                    let r = Value::Integer(instr.signed_imm9() as i64);
                    let v = self.arith(op, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::AddKI | OpCode::SubKI => {
                    let op = arith_op_for(instr.op());
                    let l = self.reg(base, instr.b());
                    let r = Value::Integer(self.int_constant(proto_ref, instr.small_const_index())?);
                    let v = self.arith(op, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::AddKF | OpCode::SubKF => {
                    let op = arith_op_for(instr.op());
                    let l = self.reg(base, instr.b());
                    let r =
                        Value::Number(self.float_constant(proto_ref, instr.small_const_index())?);
                    let v = self.arith(op, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::AddLocal => {
                    let l = self.reg(base, instr.a());
                    let r = self.reg(base, instr.b());
                    let v = self.arith(ArithOp::Add, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::Unm => {
                    let v = self.reg(base, instr.b());
                    let out = self.arith_negate(v)?;
                    self.set_reg(base, instr.a(), out);
                }
                OpCode::IncLocal => {
                    let v = self.step_numeric(self.reg(base, instr.a()), 1)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::DecLocal => {
                    let v = self.step_numeric(self.reg(base, instr.a()), -1)?;
                    self.set_reg(base, instr.a(), v);
                }

                // ----- bitwise -----
                OpCode::Band | OpCode::Bor | OpCode::Bxor | OpCode::Shl | OpCode::Shr => {
                    let op = bit_op_for(instr.op());
                    let l = self.reg(base, instr.b());
                    let r = self.reg(base, instr.c());
                    let v = self.bitwise(op, l, r)?;
                    self.set_reg(base, instr.a(), v);
                }
                OpCode::Bnot => {
                    let v = self.reg(base, instr.b());
                    let out = self.bitwise_not(v)?;
                    self.set_reg(base, instr.a(), out);
                }

                // ----- comparisons (test instructions) -----
                OpCode::Eq | OpCode::Ne | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                    let l = self.reg(base, instr.b());
                    let r = self.reg(base, instr.c());
                    let cond = self.compare_for(instr.op(), l, r)?;
                    if !cond {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::EqImm | OpCode::NeImm | OpCode::LtImm | OpCode::LeImm | OpCode::GtImm
                | OpCode::GeImm => {
                    let l = self.reg(base, instr.a());
                    let r = Value::Integer(instr.signed_offset() as i64);
                    let cond = self.compare_for(instr.op(), l, r)?;
                    if !cond {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::LtKI | OpCode::LeKI | OpCode::GtKI | OpCode::GeKI => {
                    let l = self.reg(base, instr.b());
                    let r = Value::Integer(self.int_constant(proto_ref, instr.small_const_index())?);
                    let cond = self.compare_for(instr.op(), l, r)?;
                    if !cond {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::LtKF | OpCode::LeKF | OpCode::GtKF | OpCode::GeKF => {
                    let l = self.reg(base, instr.b());
                    let r =
                        Value::Number(self.float_constant(proto_ref, instr.small_const_index())?);
                    let cond = self.compare_for(instr.op(), l, r)?;
                    if !cond {
                        self.frame_mut().pc += 1;
                    }
                }

                // ----- control flow -----
                OpCode::Jmp => {
                    let frame = self.frame_mut();
                    frame.pc = (frame.pc as i64 + instr.jump_offset() as i64) as usize;
                }
                OpCode::Test => {
                    let invert = instr.b() != 0;
                    let truthy = self.reg(base, instr.a()).is_truthy();
                    if truthy == invert {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let invert = instr.c() != 0;
                    let v = self.reg(base, instr.b());
                    if v.is_truthy() == invert {
                        self.set_reg(base, instr.a(), v);
                    } else {
                        self.frame_mut().pc += 1;
                    }
                }
                OpCode::ForPrep => {
                    self.op_for_prep(base, instr.a(), instr.signed_offset())?;
                }
                OpCode::ForLoop => {
                    self.op_for_loop(base, instr.a(), instr.signed_offset())?;
                }

                // ----- calls -----
                OpCode::Call => {
                    self.op_call(
                        base,
                        instr.a(),
                        instr.b(),
                        instr.c(),
                        instr.flag_bit(),
                    )?;
                }
                OpCode::TailCall => {
                    match self.op_tail_call(base, instr.a(), instr.b(), entry_depth)? {
                        Flow::Exit => return Ok(()),
                        Flow::Continue => {}
                    }
                }
                OpCode::Return => {
                    match self.op_return(base, instr.a(), instr.b(), entry_depth)? {
                        Flow::Exit => return Ok(()),
                        Flow::Continue => {}
                    }
                }

                // ----- closures -----
                OpCode::Closure => {
                    self.op_closure(proto_ref, base, instr.a(), instr.const_index())?;
                }

                // ----- varargs -----
                OpCode::VarargPrep => {
                    self.op_vararg_prep(instr.a());
                }
                OpCode::Vararg => {
                    self.op_vararg(base, instr.a(), instr.b());
                }
                OpCode::VarargExpand => {
                    self.op_vararg_expand(base, instr.a(), instr.b())?;
                }

                // ----- coercion and length -----
                OpCode::ToString => {
                    let v = self.reg(base, instr.b());
                    let out = self.coerce_to_string(v)?;
                    self.set_reg(base, instr.a(), out);
                    let top = base + instr.a() as usize + 1;
                    self.frame_mut().top = top;
                    self.gc_step();
                }
                OpCode::ToNumber => {
                    let v = self.reg(base, instr.b());
                    let out = self.coerce_to_number(v);
                    self.set_reg(base, instr.a(), out);
                    let top = base + instr.a() as usize + 1;
                    self.frame_mut().top = top;
                }
                OpCode::Len => {
                    let v = self.reg(base, instr.b());
                    let out = self.op_len(v)?;
                    self.set_reg(base, instr.a(), out);
                }
            }
        }
    }

    // ----- handler bodies -----

    fn globals_ref(&self) -> Result<GcRef> {
        match self.globals {
            Value::Table(t) => Ok(t),
            _ => Err(Error::runtime_msg("globals table is missing")),
        }
    }

    fn upvalue_slot(&self, closure: GcRef, index: u8) -> Result<u32> {
        self.heap
            .closure(closure)
            .upvalue_indices
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::runtime_msg("upvalue index out of range"))
    }

    fn step_numeric(&self, v: Value, delta: i64) -> Result<Value> {
        match v {
            Value::Integer(i) => Ok(Value::Integer(i.wrapping_add(delta))),
            Value::Number(f) => Ok(Value::Number(f + delta as f64)),
            _ => Err(Error::type_error(
                format!("attempt to step a {} value", v.type_name()),
                self.current_location(),
            )),
        }
    }

    fn step_global(&mut self, proto: GcRef, k: u32, delta: i64) -> Result<()> {
        let key = self.str_constant(proto, k)?;
        let globals = self.globals_ref()?;
        let current = self.heap.table_rawget(globals, key);
        let next = self.step_numeric(current, delta)?;
        self.heap.table_rawset(globals, key, next);
        Ok(())
    }

    fn step_upvalue(&mut self, base: usize, index: u8, delta: i64) -> Result<()> {
        let closure = self.current_closure(base)?;
        let uv = self.upvalue_slot(closure, index)?;
        let current = self.heap.upvalues.get(uv, &self.stack);
        let next = self.step_numeric(current, delta)?;
        self.heap.upvalues.set(uv, next, &mut self.stack);
        Ok(())
    }

    fn op_set_list(&mut self, base: usize, a: u8, num_fields: u8, start: u8) -> Result<()> {
        let table = match self.reg(base, a) {
            Value::Table(t) => t,
            other => {
                return Err(Error::type_error(
                    format!("attempt to build a list in a {} value", other.type_name()),
                    self.current_location(),
                ))
            }
        };
        let values_start = base + a as usize + 2;
        let count = if num_fields == 0 {
            // Trailing multi-value expansion: consume everything up to the
            // frame top.
            self.frame().top.saturating_sub(values_start)
        } else {
            num_fields as usize
        };
        for i in 0..count {
            let value = self.stack[values_start + i];
            self.heap
                .table_rawset(table, Value::Integer(start as i64 + i as i64), value);
        }
        Ok(())
    }

    fn op_for_prep(&mut self, base: usize, a: u8, offset: i32) -> Result<()> {
        let init = self.reg(base, a);
        let step = self.reg(base, a + 2);
        let adjusted = match (init, step) {
            (Value::Integer(i), Value::Integer(s)) => Value::Integer(i.wrapping_sub(s)),
            _ => match (init.as_f64(), step.as_f64()) {
                (Some(i), Some(s)) => Value::Number(i - s),
                _ => {
                    return Err(Error::type_error(
                        "numeric for-loop requires numeric initial and step values",
                        self.current_location(),
                    ))
                }
            },
        };
        self.set_reg(base, a, adjusted);
        let frame = self.frame_mut();
        frame.pc = (frame.pc as i64 + offset as i64) as usize;
        Ok(())
    }

    fn op_for_loop(&mut self, base: usize, a: u8, offset: i32) -> Result<()> {
        let idx = self.reg(base, a);
        let limit = self.reg(base, a + 1);
        let step = self.reg(base, a + 2);

        if let (Value::Integer(i), Value::Integer(l), Value::Integer(s)) = (idx, limit, step) {
            let next = i.wrapping_add(s);
            self.set_reg(base, a, Value::Integer(next));
            let continue_loop = if s > 0 { next <= l } else { next >= l };
            if continue_loop {
                let frame = self.frame_mut();
                frame.pc = (frame.pc as i64 + offset as i64 - 1) as usize;
            }
            return Ok(());
        }

        match (idx.as_f64(), limit.as_f64(), step.as_f64()) {
            (Some(i), Some(l), Some(s)) => {
                let next = i + s;
                self.set_reg(base, a, Value::Number(next));
                let continue_loop = if s > 0.0 { next <= l } else { next >= l };
                if continue_loop {
                    let frame = self.frame_mut();
                    frame.pc = (frame.pc as i64 + offset as i64 - 1) as usize;
                }
                Ok(())
            }
            _ => Err(Error::type_error(
                "numeric for-loop requires numeric index, limit and step values",
                self.current_location(),
            )),
        }
    }

    fn compare_for(&mut self, op: OpCode, l: Value, r: Value) -> Result<bool> {
        match op {
            OpCode::Eq | OpCode::EqImm => self.compare_equal(l, r),
            OpCode::Ne | OpCode::NeImm => self.compare_equal(l, r).map(|b| !b),
            OpCode::Lt | OpCode::LtImm | OpCode::LtKI | OpCode::LtKF => self.compare_less(l, r),
            OpCode::Le | OpCode::LeImm | OpCode::LeKI | OpCode::LeKF => {
                self.compare_less_equal(l, r)
            }
            OpCode::Gt | OpCode::GtImm | OpCode::GtKI | OpCode::GtKF => self.compare_less(r, l),
            OpCode::Ge | OpCode::GeImm | OpCode::GeKI | OpCode::GeKF => {
                self.compare_less_equal(r, l)
            }
            _ => unreachable!("compare_for only receives comparison opcodes"),
        }
    }

    /// `Call A nargs nresults selfFlag`. Closure callees push a frame and
    /// the loop keeps going; host callees run to completion here.
    fn op_call(
        &mut self,
        base: usize,
        a: u8,
        nargs_enc: u8,
        nresults: u8,
        _is_self_call: bool,
    ) -> Result<()> {
        let func_pos = base + a as usize;
        let nargs = if nargs_enc == MULTRET {
            self.frame().top.saturating_sub(func_pos + 1)
        } else {
            nargs_enc as usize
        };

        self.stack.truncate(func_pos + 1 + nargs);
        self.ensure_stack(func_pos + 1 + nargs);
        self.gc_step();

        let (callee, nargs) = self.resolve_callable(func_pos, nargs)?;
        match callee {
            Value::Closure(closure) => {
                let proto_ref = self.heap.closure(closure).proto;
                let max_stack = self.heap.proto(proto_ref).max_stack_size as usize;
                self.call_stack
                    .push(CallFrame::script(proto_ref, func_pos, nargs, nresults));
                self.ensure_stack(func_pos + max_stack + 1);
                Ok(())
            }
            Value::CFunction(f) => {
                let wanted = self.execute_native(f, nargs, nresults, func_pos)?;
                self.restore_caller(func_pos, wanted);
                Ok(())
            }
            _ => unreachable!("resolve_callable yields callables only"),
        }
    }

    /// `TailCall A nargs selfFlag`: reuses the current frame's call
    /// position, bounding stack growth for tail-recursive functions.
    fn op_tail_call(
        &mut self,
        base: usize,
        a: u8,
        nargs_enc: u8,
        entry_depth: usize,
    ) -> Result<Flow> {
        let func_pos = base + a as usize;
        let nargs = if nargs_enc == MULTRET {
            self.frame().top.saturating_sub(func_pos + 1)
        } else {
            nargs_enc as usize
        };

        let (call_pos, expected_results, has_upvalues) = {
            let frame = self.frame();
            let has_upvalues = frame
                .proto
                .map(|p| self.heap.proto(p).has_upvalues)
                .unwrap_or(false);
            (frame.call_pos, frame.expected_results, has_upvalues)
        };

        // Captured locals must be materialized before their slots are
        // overwritten by the argument shift.
        if has_upvalues {
            self.heap.upvalues.close_from(base, &self.stack);
        }

        self.stack.truncate(func_pos + 1 + nargs);
        self.stack.copy_within(func_pos..func_pos + 1 + nargs, call_pos);
        self.stack.truncate(call_pos + 1 + nargs);
        self.call_stack.pop();

        self.gc_step();
        let (callee, nargs) = self.resolve_callable(call_pos, nargs)?;
        match callee {
            Value::Closure(closure) => {
                let proto_ref = self.heap.closure(closure).proto;
                let max_stack = self.heap.proto(proto_ref).max_stack_size as usize;
                self.call_stack.push(CallFrame::script(
                    proto_ref,
                    call_pos,
                    nargs,
                    expected_results,
                ));
                self.ensure_stack(call_pos + max_stack + 1);
                Ok(Flow::Continue)
            }
            Value::CFunction(f) => {
                // A host callee degrades to call-and-return.
                let wanted = self.execute_native(f, nargs, expected_results, call_pos)?;
                if self.call_stack.len() == entry_depth {
                    return Ok(Flow::Exit);
                }
                self.restore_caller(call_pos, wanted);
                Ok(Flow::Continue)
            }
            _ => unreachable!("resolve_callable yields callables only"),
        }
    }

    /// `Return A nresults`.
    fn op_return(&mut self, base: usize, a: u8, nresults_enc: u8, entry_depth: usize) -> Result<Flow> {
        let (call_pos, expected_results, has_upvalues, top) = {
            let frame = self.frame();
            let has_upvalues = frame
                .proto
                .map(|p| self.heap.proto(p).has_upvalues)
                .unwrap_or(false);
            (frame.call_pos, frame.expected_results, has_upvalues, frame.top)
        };

        if has_upvalues {
            self.heap.upvalues.close_from(base, &self.stack);
        }

        let first = base + a as usize;
        let count = if nresults_enc == MULTRET {
            top.saturating_sub(first)
        } else {
            nresults_enc as usize
        };

        let actual = if expected_results == MULTRET {
            count
        } else {
            expected_results as usize
        };

        let moved = count.min(actual).min(self.stack.len().saturating_sub(first));
        self.stack.copy_within(first..first + moved, call_pos);
        self.ensure_stack(call_pos + actual);
        for i in moved..actual {
            self.stack[call_pos + i] = Value::Nil;
        }
        self.stack.truncate(call_pos + actual);

        self.call_stack.pop();
        if self.call_stack.len() == entry_depth {
            return Ok(Flow::Exit);
        }
        self.restore_caller(call_pos, actual);
        Ok(Flow::Continue)
    }

    /// `Closure A protoIdx` plus its trailing capture pseudo-instructions.
    fn op_closure(&mut self, proto_ref: GcRef, base: usize, a: u8, proto_index: u32) -> Result<()> {
        let nested = self
            .heap
            .proto(proto_ref)
            .protos
            .get(proto_index as usize)
            .copied()
            .ok_or_else(|| Error::runtime_msg("closure proto index out of range"))?;
        let upvalue_count = self.heap.proto(nested).upvalue_names.len();

        let closure = self.heap.new_closure(nested);
        self.set_reg(base, a, Value::Closure(closure));

        for _ in 0..upvalue_count {
            let capture = {
                let frame = self.frame();
                let proto = self.heap.proto(proto_ref);
                let instr = *proto.code.get(frame.pc).ok_or_else(|| {
                    Error::runtime_msg("closure capture list ran past the end of the function")
                })?;
                instr
            };
            self.frame_mut().pc += 1;

            let slot = match capture.op() {
                OpCode::Move => {
                    let stack_index = base + capture.b() as usize;
                    self.heap.upvalues.find_or_create(stack_index)
                }
                OpCode::GetUpval => {
                    let parent = self.current_closure(base)?;
                    self.upvalue_slot(parent, capture.b())?
                }
                other => {
                    return Err(Error::runtime_msg(format!(
                        "invalid upvalue capture instruction {:?}",
                        other
                    )))
                }
            };
            self.heap.closure_mut(closure).upvalue_indices.push(slot);
        }

        self.gc_step();
        Ok(())
    }

    /// `VarargPrep n`: shifts the closure and fixed parameters above the
    /// varargs so the frame base sits past them. The varargs stay at their
    /// original position, addressable at `base - num_varargs`. The frame's
    /// `call_pos` keeps pointing at the original call site so returns land
    /// where the caller expects them.
    fn op_vararg_prep(&mut self, num_params: u8) {
        let (old_base, top) = {
            let frame = self.frame();
            (frame.base, frame.top)
        };
        let total_args = top.saturating_sub(old_base + 1);
        let num_params = num_params as usize;
        let num_varargs = total_args.saturating_sub(num_params);

        self.frame_mut().num_varargs = num_varargs;
        if num_varargs == 0 {
            return;
        }

        let new_base = old_base + total_args + 1;
        let max_stack = self
            .frame()
            .proto
            .map(|p| self.heap.proto(p).max_stack_size as usize)
            .unwrap_or(0);
        self.ensure_stack(new_base + max_stack + 1);

        self.stack[new_base] = self.stack[old_base];
        for i in 0..num_params {
            self.stack[new_base + 1 + i] = self.stack[old_base + 1 + i];
        }

        let frame = self.frame_mut();
        frame.base = new_base;
        frame.top = new_base + 1 + num_params;
    }

    /// `Vararg A n`: copies varargs into registers starting at A.
    fn op_vararg(&mut self, base: usize, a: u8, n: u8) {
        let num_varargs = self.frame().num_varargs;
        let wanted = if n == 0 { num_varargs } else { n as usize };
        let vararg_start = base - num_varargs;
        let target = base + a as usize;

        self.ensure_stack(target + wanted);
        for i in 0..wanted {
            self.stack[target + i] = if i < num_varargs {
                self.stack[vararg_start + i]
            } else {
                Value::Nil
            };
        }
        self.frame_mut().top = target + wanted;
    }

    /// `VarargExpand tableReg startIdx`: appends every vararg directly into
    /// the table's array part, skipping the register spread.
    fn op_vararg_expand(&mut self, base: usize, table_reg: u8, start: u8) -> Result<()> {
        let table = match self.reg(base, table_reg) {
            Value::Table(t) => t,
            other => {
                return Err(Error::type_error(
                    format!(
                        "attempt to expand varargs into a {} value",
                        other.type_name()
                    ),
                    self.current_location(),
                ))
            }
        };
        let num_varargs = self.frame().num_varargs;
        let vararg_start = base - num_varargs;
        for i in 0..num_varargs {
            let value = self.stack[vararg_start + i];
            self.heap
                .table_rawset(table, Value::Integer(start as i64 + i as i64), value);
        }
        Ok(())
    }

    /// `Len A B`: `__len` first, then table border length or string byte
    /// length.
    fn op_len(&mut self, v: Value) -> Result<Value> {
        if v.is_table_like() {
            let mm = self.get_metamethod(v, MetaMethod::Len);
            if mm.is_callable() {
                return self.call_metamethod(mm, &[v]);
            }
        }
        match v {
            Value::Table(t) => Ok(Value::Integer(self.heap.table_length(t) as i64)),
            Value::String(s) => Ok(Value::Integer(self.heap.string(s).len() as i64)),
            _ => Err(Error::type_error(
                format!("attempt to get length of a {} value", v.type_name()),
                self.current_location(),
            )),
        }
    }
}

fn arith_op_for(op: OpCode) -> ArithOp {
    match op {
        OpCode::Add | OpCode::AddImm | OpCode::AddKI | OpCode::AddKF | OpCode::AddLocal => {
            ArithOp::Add
        }
        OpCode::Sub | OpCode::SubImm | OpCode::SubKI | OpCode::SubKF => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Div => ArithOp::Div,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        _ => unreachable!("not an arithmetic opcode"),
    }
}

fn bit_op_for(op: OpCode) -> BitOp {
    match op {
        OpCode::Band => BitOp::And,
        OpCode::Bor => BitOp::Or,
        OpCode::Bxor => BitOp::Xor,
        OpCode::Shl => BitOp::Shl,
        OpCode::Shr => BitOp::Shr,
        _ => unreachable!("not a bitwise opcode"),
    }
}
