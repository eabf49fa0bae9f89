//! Expression code generation.
//!
//! `expr` compiles one expression and returns the register holding its
//! value. With a target register supplied the result is stored there; plain
//! locals are otherwise returned in place, without a copy. Comparisons have
//! two renditions: inside a branch (`condition_jump`) they emit the inverted
//! test plus a placeholder `Jmp`, outside one they materialize a boolean
//! through the `LoadBool`-pair idiom.

use sable_core::limits::MULTRET;
use sable_core::{Error, Result};
use sable_syntax::ast::{BinOp, Expr, ExprKind, TableItem, UnOp};
use sable_vm::{Instruction, OpCode};

use crate::state::Compiler;

/// Register-register opcode for a comparison operator.
fn cmp_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Eq => OpCode::Eq,
        BinOp::Ne => OpCode::Ne,
        BinOp::Lt => OpCode::Lt,
        BinOp::Le => OpCode::Le,
        BinOp::Gt => OpCode::Gt,
        BinOp::Ge => OpCode::Ge,
        _ => unreachable!("not a comparison operator"),
    }
}

/// The operator with the opposite truth value; branch compilation emits the
/// inverted comparison so the paired `Jmp` lands on the false branch.
fn invert_cmp(op: BinOp) -> BinOp {
    match op {
        BinOp::Eq => BinOp::Ne,
        BinOp::Ne => BinOp::Eq,
        BinOp::Lt => BinOp::Ge,
        BinOp::Le => BinOp::Gt,
        BinOp::Gt => BinOp::Le,
        BinOp::Ge => BinOp::Lt,
        _ => unreachable!("not a comparison operator"),
    }
}

fn cmp_imm_opcode(op: BinOp) -> OpCode {
    match op {
        BinOp::Eq => OpCode::EqImm,
        BinOp::Ne => OpCode::NeImm,
        BinOp::Lt => OpCode::LtImm,
        BinOp::Le => OpCode::LeImm,
        BinOp::Gt => OpCode::GtImm,
        BinOp::Ge => OpCode::GeImm,
        _ => unreachable!("not a comparison operator"),
    }
}

fn cmp_ki_opcode(op: BinOp) -> Option<OpCode> {
    Some(match op {
        BinOp::Lt => OpCode::LtKI,
        BinOp::Le => OpCode::LeKI,
        BinOp::Gt => OpCode::GtKI,
        BinOp::Ge => OpCode::GeKI,
        _ => return None,
    })
}

fn cmp_kf_opcode(op: BinOp) -> Option<OpCode> {
    Some(match op {
        BinOp::Lt => OpCode::LtKF,
        BinOp::Le => OpCode::LeKF,
        BinOp::Gt => OpCode::GtKF,
        BinOp::Ge => OpCode::GeKF,
        _ => return None,
    })
}

fn arith_opcode(op: BinOp) -> Option<OpCode> {
    Some(match op {
        BinOp::Add => OpCode::Add,
        BinOp::Sub => OpCode::Sub,
        BinOp::Mul => OpCode::Mul,
        BinOp::Div => OpCode::Div,
        BinOp::Mod => OpCode::Mod,
        BinOp::Pow => OpCode::Pow,
        BinOp::BitAnd => OpCode::Band,
        BinOp::BitOr => OpCode::Bor,
        BinOp::BitXor => OpCode::Bxor,
        BinOp::Shl => OpCode::Shl,
        BinOp::Shr => OpCode::Shr,
        _ => return None,
    })
}

/// Literal integer payload of an expression, if it is one.
fn int_literal(e: &Expr) -> Option<i64> {
    match &e.kind {
        ExprKind::Int(v) => Some(*v),
        ExprKind::Un { op: UnOp::Neg, operand } => match &operand.kind {
            ExprKind::Int(v) => Some(v.wrapping_neg()),
            _ => None,
        },
        _ => None,
    }
}

fn float_literal(e: &Expr) -> Option<f64> {
    match &e.kind {
        ExprKind::Float(v) => Some(*v),
        ExprKind::Un { op: UnOp::Neg, operand } => match &operand.kind {
            ExprKind::Float(v) => Some(-*v),
            _ => None,
        },
        _ => None,
    }
}

impl Compiler<'_> {
    /// Compiles an expression; the result ends up in `target` when given,
    /// otherwise in the returned register (which may be a local's own
    /// register, borrowed without a copy).
    pub fn expr(&mut self, e: &Expr, target: Option<u8>) -> Result<u8> {
        self.mark_span(e.span);
        match &e.kind {
            ExprKind::Nil => {
                let reg = self.target_or_alloc(target)?;
                self.emit(Instruction::make_load_nil(reg, 0));
                Ok(reg)
            }
            ExprKind::True | ExprKind::False => {
                let reg = self.target_or_alloc(target)?;
                let value = matches!(e.kind, ExprKind::True);
                self.emit(Instruction::make_load_bool(reg, value, false));
                Ok(reg)
            }
            ExprKind::Int(v) => {
                let reg = self.target_or_alloc(target)?;
                self.load_int(reg, *v);
                Ok(reg)
            }
            ExprKind::Float(v) => {
                let reg = self.target_or_alloc(target)?;
                let k = self.add_float_constant(*v);
                self.emit(Instruction::make_load_f(reg, k));
                Ok(reg)
            }
            ExprKind::Str(s) => {
                let reg = self.target_or_alloc(target)?;
                let k = self.add_string_constant(s);
                self.emit(Instruction::make_load_s(reg, k));
                Ok(reg)
            }
            ExprKind::Vararg => {
                let reg = self.target_or_alloc(target)?;
                self.emit(Instruction::make_vararg(reg, 1));
                Ok(reg)
            }
            ExprKind::Name(name) => self.name_expr(name, target),
            ExprKind::Paren(inner) => self.expr(inner, target),
            ExprKind::Un { op, operand } => self.unary_expr(*op, operand, target),
            ExprKind::Bin { op, lhs, rhs } => self.binary_expr(*op, lhs, rhs, target),
            ExprKind::Ternary {
                cond,
                then_value,
                else_value,
            } => {
                let reg = self.target_or_alloc(target)?;
                let jump_false = self.condition_jump(cond)?;
                self.expr(then_value, Some(reg))?;
                let jump_end = self.emit(Instruction::make_jmp(0));
                let else_start = self.here();
                self.patch_jump_to(jump_false, else_start);
                self.expr(else_value, Some(reg))?;
                let end = self.here();
                self.patch_jump_to(jump_end, end);
                Ok(reg)
            }
            ExprKind::Call { .. } | ExprKind::MethodCall { .. } => {
                let base = self.call_expr(e, 1)?;
                match target {
                    Some(t) if t != base => {
                        self.emit(Instruction::make_move(t, base));
                        self.free_reg(base);
                        Ok(t)
                    }
                    _ => Ok(base),
                }
            }
            ExprKind::Index { object, key } => {
                let reg = self.target_or_alloc(target)?;
                let obj = self.expr(object, None)?;
                if let Some(i) = int_literal(key) {
                    if (0..=511).contains(&i) {
                        self.emit(Instruction::make_get_field_i(reg, obj, i as u32));
                        self.free_reg(obj);
                        return Ok(reg);
                    }
                }
                if let ExprKind::Str(s) = &key.kind {
                    let k = self.add_string_constant(s);
                    if k <= 511 {
                        self.emit(Instruction::make_get_field_s(reg, obj, k));
                        self.free_reg(obj);
                        return Ok(reg);
                    }
                }
                let key_reg = self.expr(key, None)?;
                self.emit(Instruction::make_get_field(reg, obj, key_reg));
                self.free_reg(key_reg);
                self.free_reg(obj);
                Ok(reg)
            }
            ExprKind::Member { object, name } => {
                let reg = self.target_or_alloc(target)?;
                let obj = self.expr(object, None)?;
                let k = self.add_string_constant(name);
                if k <= 511 {
                    self.emit(Instruction::make_get_field_s(reg, obj, k));
                } else {
                    let key_reg = self.alloc_reg()?;
                    self.emit(Instruction::make_load_s(key_reg, k));
                    self.emit(Instruction::make_get_field(reg, obj, key_reg));
                    self.free_reg(key_reg);
                }
                self.free_reg(obj);
                Ok(reg)
            }
            ExprKind::Function(def) => self.function_def(def, target),
            ExprKind::Table(items) => self.table_constructor(items, target),
        }
    }

    /// Compiles an expression into a specific register.
    pub fn expr_into(&mut self, e: &Expr, target: u8) -> Result<()> {
        self.expr(e, Some(target))?;
        Ok(())
    }

    fn target_or_alloc(&mut self, target: Option<u8>) -> Result<u8> {
        match target {
            Some(reg) => Ok(reg),
            None => self.alloc_reg(),
        }
    }

    /// Loads a small integer inline, larger ones through the pool.
    pub fn load_int(&mut self, reg: u8, value: i64) {
        if (-65536..=65535).contains(&value) {
            self.emit(Instruction::make_load_imm(reg, value as i32));
        } else {
            let k = self.add_int_constant(value);
            self.emit(Instruction::make_load_i(reg, k));
        }
    }

    fn name_expr(&mut self, name: &str, target: Option<u8>) -> Result<u8> {
        if let Some(local) = self.resolve_local(name) {
            return match target {
                Some(t) if t != local.reg => {
                    self.emit(Instruction::make_move(t, local.reg));
                    Ok(t)
                }
                Some(t) => Ok(t),
                None => Ok(local.reg),
            };
        }
        if let Some((index, _)) = self.resolve_upvalue(name)? {
            let reg = self.target_or_alloc(target)?;
            self.emit(Instruction::make_get_upval(reg, index));
            return Ok(reg);
        }
        let reg = self.target_or_alloc(target)?;
        let k = self.add_string_constant(name);
        self.emit(Instruction::make_get_global(reg, k));
        Ok(reg)
    }

    fn unary_expr(&mut self, op: UnOp, operand: &Expr, target: Option<u8>) -> Result<u8> {
        // Negated literals load directly.
        if op == UnOp::Neg {
            if let ExprKind::Int(v) = &operand.kind {
                let reg = self.target_or_alloc(target)?;
                self.load_int(reg, v.wrapping_neg());
                return Ok(reg);
            }
            if let ExprKind::Float(v) = &operand.kind {
                let reg = self.target_or_alloc(target)?;
                let k = self.add_float_constant(-*v);
                self.emit(Instruction::make_load_f(reg, k));
                return Ok(reg);
            }
        }

        let reg = self.target_or_alloc(target)?;
        let operand_reg = self.expr(operand, None)?;
        match op {
            UnOp::Neg => {
                self.emit(Instruction::make_unm(reg, operand_reg));
            }
            UnOp::BitNot => {
                self.emit(Instruction::make_bnot(reg, operand_reg));
            }
            UnOp::Len => {
                self.emit(Instruction::make_len(reg, operand_reg));
            }
            UnOp::Not => {
                // Materialize the negated truthiness through the
                // Test/LoadBool pair.
                self.emit(Instruction::make_test(operand_reg, false));
                self.emit(Instruction::make_load_bool(reg, false, true));
                self.emit(Instruction::make_load_bool(reg, true, false));
            }
        }
        self.free_reg(operand_reg);
        Ok(reg)
    }

    fn binary_expr(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        target: Option<u8>,
    ) -> Result<u8> {
        match op {
            BinOp::And | BinOp::Or => {
                let reg = self.target_or_alloc(target)?;
                self.expr(lhs, Some(reg))?;
                // Or keeps a truthy left operand, And a falsy one.
                let invert = op == BinOp::Or;
                self.emit(Instruction::make_test_set(reg, reg, invert));
                let jump_end = self.emit(Instruction::make_jmp(0));
                self.expr(rhs, Some(reg))?;
                let end = self.here();
                self.patch_jump_to(jump_end, end);
                Ok(reg)
            }
            op if op.is_comparison() => {
                let reg = self.target_or_alloc(target)?;
                self.comparison_test(op, lhs, rhs)?;
                self.emit(Instruction::make_load_bool(reg, true, true));
                self.emit(Instruction::make_load_bool(reg, false, false));
                Ok(reg)
            }
            _ => {
                let opcode = arith_opcode(op).ok_or_else(|| {
                    Error::runtime("unsupported binary operator", self.location())
                })?;
                let reg = self.target_or_alloc(target)?;

                // Immediate and constant-pool peepholes for add/sub.
                if matches!(op, BinOp::Add | BinOp::Sub) {
                    if let Some(v) = int_literal(rhs) {
                        let lreg = self.expr(lhs, None)?;
                        let variant = if op == BinOp::Add {
                            (OpCode::AddImm, OpCode::AddKI)
                        } else {
                            (OpCode::SubImm, OpCode::SubKI)
                        };
                        if (-256..=255).contains(&v) {
                            self.emit(Instruction::make_arith_imm(
                                variant.0, reg, lreg, v as i32,
                            ));
                            self.free_reg(lreg);
                            return Ok(reg);
                        }
                        let k = self.add_int_constant(v);
                        if k <= 511 {
                            self.emit(Instruction::make_arith_k(variant.1, reg, lreg, k));
                            self.free_reg(lreg);
                            return Ok(reg);
                        }
                        // Pool index too wide: materialize and fall through.
                        let rreg = self.alloc_reg()?;
                        self.emit(Instruction::make_load_i(rreg, k));
                        self.emit(Instruction::make_arith(opcode, reg, lreg, rreg));
                        self.free_reg(rreg);
                        self.free_reg(lreg);
                        return Ok(reg);
                    }
                    if let Some(v) = float_literal(rhs) {
                        let lreg = self.expr(lhs, None)?;
                        let k = self.add_float_constant(v);
                        if k <= 511 {
                            let variant = if op == BinOp::Add {
                                OpCode::AddKF
                            } else {
                                OpCode::SubKF
                            };
                            self.emit(Instruction::make_arith_k(variant, reg, lreg, k));
                            self.free_reg(lreg);
                            return Ok(reg);
                        }
                        let rreg = self.alloc_reg()?;
                        self.emit(Instruction::make_load_f(rreg, k));
                        self.emit(Instruction::make_arith(opcode, reg, lreg, rreg));
                        self.free_reg(rreg);
                        self.free_reg(lreg);
                        return Ok(reg);
                    }
                }

                let lreg = self.expr(lhs, None)?;
                let rreg = self.expr(rhs, None)?;
                self.emit(Instruction::make_arith(opcode, reg, lreg, rreg));
                self.free_reg(rreg);
                self.free_reg(lreg);
                Ok(reg)
            }
        }
    }

    /// Emits the test instruction for a comparison with its operand-kind
    /// peepholes: 17-bit immediate, 9-bit constant pool, then the general
    /// register form.
    fn comparison_test(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<()> {
        let lreg = self.expr(lhs, None)?;

        if let Some(v) = int_literal(rhs) {
            if (-65536..=65535).contains(&v) {
                self.emit(Instruction::make_cmp_imm(cmp_imm_opcode(op), lreg, v as i32));
                self.free_reg(lreg);
                return Ok(());
            }
            if let Some(ki) = cmp_ki_opcode(op) {
                let k = self.add_int_constant(v);
                if k <= 511 {
                    self.emit(Instruction::make_cmp_k(ki, lreg, k));
                    self.free_reg(lreg);
                    return Ok(());
                }
            }
        }
        if let Some(v) = float_literal(rhs) {
            if let Some(kf) = cmp_kf_opcode(op) {
                let k = self.add_float_constant(v);
                if k <= 511 {
                    self.emit(Instruction::make_cmp_k(kf, lreg, k));
                    self.free_reg(lreg);
                    return Ok(());
                }
            }
        }

        let rreg = self.expr(rhs, None)?;
        self.emit(Instruction::make_cmp(cmp_opcode(op), lreg, rreg));
        self.free_reg(rreg);
        self.free_reg(lreg);
        Ok(())
    }

    /// Compiles `e` as a branch condition. Emits a test instruction followed
    /// by a placeholder `Jmp` that is *taken when the condition is false*;
    /// returns the placeholder's position for patching.
    pub fn condition_jump(&mut self, e: &Expr) -> Result<usize> {
        match &e.kind {
            ExprKind::Bin { op, lhs, rhs } if op.is_comparison() => {
                // Inverted operator: the jump lands on the false branch.
                self.comparison_test(invert_cmp(*op), lhs, rhs)?;
                Ok(self.emit(Instruction::make_jmp(0)))
            }
            ExprKind::Un {
                op: UnOp::Not,
                operand,
            } => {
                let reg = self.expr(operand, None)?;
                self.emit(Instruction::make_test(reg, false));
                self.free_reg(reg);
                Ok(self.emit(Instruction::make_jmp(0)))
            }
            ExprKind::Paren(inner) => self.condition_jump(inner),
            _ => {
                let reg = self.expr(e, None)?;
                self.emit(Instruction::make_test(reg, true));
                self.free_reg(reg);
                Ok(self.emit(Instruction::make_jmp(0)))
            }
        }
    }

    /// Compiles the callee and arguments of a call or method call, leaving
    /// everything arranged for a `Call`/`TailCall` instruction. Returns
    /// `(base register, encoded arg count, self-call flag)`.
    pub fn call_parts(&mut self, e: &Expr) -> Result<(u8, u8, bool)> {
        self.mark_span(e.span);
        match &e.kind {
            ExprKind::Call { callee, args } => {
                let base = self.alloc_reg()?;
                self.expr_into(callee, base)?;
                let nargs = self.call_arguments(args, base, 0)?;
                Ok((base, nargs, false))
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let base = self.alloc_reg()?;
                let self_slot = self.alloc_reg()?;
                debug_assert_eq!(self_slot, base + 1);
                let obj = self.expr(object, None)?;
                let key_reg = self.alloc_reg()?;
                let k = self.add_string_constant(method);
                self.emit(Instruction::make_load_s(key_reg, k));
                self.emit(Instruction::make_self_field(base, obj, key_reg));
                self.free_reg(key_reg);
                self.free_reg(obj);
                // The receiver at base+1 counts as argument zero, which
                // call_arguments folds in through the offset.
                let nargs = self.call_arguments(args, base, 1)?;
                Ok((base, nargs, true))
            }
            _ => Err(Error::runtime(
                "expression is not callable syntax",
                self.location(),
            )),
        }
    }

    /// Compiles a call or method-call expression expecting `nresults`
    /// values; returns the base register (the function slot, where results
    /// land).
    pub fn call_expr(&mut self, e: &Expr, nresults: u8) -> Result<u8> {
        let (base, nargs, is_self) = self.call_parts(e)?;
        self.emit(Instruction::make_call(base, nargs, nresults, is_self));
        self.finish_call(base, nresults);
        Ok(base)
    }

    /// Compiles call arguments into consecutive registers above the callee.
    /// Returns the encoded argument count (`MULTRET` when the last argument
    /// spreads).
    fn call_arguments(&mut self, args: &[Expr], base: u8, offset: u8) -> Result<u8> {
        let first_arg = base + 1 + offset;
        for (i, arg) in args.iter().enumerate() {
            let is_last = i == args.len() - 1;
            if is_last && arg.is_multivalue() {
                match &arg.kind {
                    ExprKind::Vararg => {
                        let dest = self.alloc_reg()?;
                        debug_assert_eq!(dest, first_arg + i as u8);
                        self.emit(Instruction::make_vararg(dest, 0));
                    }
                    _ => {
                        let nested = self.call_expr(arg, MULTRET)?;
                        debug_assert_eq!(nested, first_arg + i as u8);
                    }
                }
                return Ok(MULTRET);
            }
            let dest = self.alloc_reg()?;
            debug_assert_eq!(dest, first_arg + i as u8);
            self.expr_into(arg, dest)?;
        }
        Ok(args.len() as u8 + offset)
    }

    /// Post-call register accounting: results occupy `base..base+nresults`.
    fn finish_call(&mut self, base: u8, nresults: u8) {
        let f = self.f();
        let occupied = if nresults == MULTRET { 1 } else { nresults };
        f.freereg = (base + occupied).max(f.min_freereg);
        let freereg = f.freereg;
        let proto = f.proto;
        let max = &mut self.rt.heap_mut().proto_mut(proto).max_stack_size;
        if (freereg as u32) > *max {
            *max = freereg as u32;
        }
    }

    /// Table constructors: array items flow through `SetList` batches (or
    /// `VarargExpand` for a trailing spread), named and keyed items through
    /// the field stores. The table is always built in a fresh top register
    /// so `SetList`'s `A+2` value window stays free, then moved to the
    /// target.
    fn table_constructor(&mut self, items: &[TableItem], target: Option<u8>) -> Result<u8> {
        let array_hint = items
            .iter()
            .filter(|i| matches!(i, TableItem::Positional(_)))
            .count();
        let hash_hint = items.len() - array_hint;

        let table_reg = self.alloc_reg()?;
        let scratch = self.alloc_reg()?;
        debug_assert_eq!(scratch, table_reg + 1);
        self.emit(Instruction::make_new_table(
            table_reg,
            array_hint.min(255) as u8,
            hash_hint.min(255) as u8,
        ));

        const BATCH: usize = 24;
        let mut array_index: usize = 0;
        let mut batch_len: usize = 0;

        for item in items {
            match item {
                TableItem::Positional(value) => {
                    let dest = self.alloc_reg()?;
                    debug_assert_eq!(dest as usize, table_reg as usize + 2 + batch_len);
                    self.expr_into(value, dest)?;
                    batch_len += 1;
                    array_index += 1;
                    if batch_len == BATCH {
                        self.flush_set_list(table_reg, &mut batch_len, &mut array_index)?;
                    }
                }
                TableItem::Spread => {
                    self.flush_set_list(table_reg, &mut batch_len, &mut array_index)?;
                    if array_index <= 255 {
                        self.emit(Instruction::make_vararg_expand(
                            table_reg,
                            array_index as u8,
                        ));
                    } else {
                        return Err(Error::runtime(
                            "table constructor array part too large for vararg expansion",
                            self.location(),
                        ));
                    }
                }
                TableItem::Named { name, value } => {
                    self.flush_set_list(table_reg, &mut batch_len, &mut array_index)?;
                    let vreg = self.expr(value, None)?;
                    let k = self.add_string_constant(name);
                    if k <= 511 {
                        self.emit(Instruction::make_set_field_s(table_reg, vreg, k));
                    } else {
                        let key_reg = self.alloc_reg()?;
                        self.emit(Instruction::make_load_s(key_reg, k));
                        self.emit(Instruction::make_set_field(table_reg, key_reg, vreg));
                        self.free_reg(key_reg);
                    }
                    self.free_reg(vreg);
                }
                TableItem::Keyed { key, value } => {
                    self.flush_set_list(table_reg, &mut batch_len, &mut array_index)?;
                    let key_reg = self.expr(key, None)?;
                    let vreg = self.expr(value, None)?;
                    self.emit(Instruction::make_set_field(table_reg, key_reg, vreg));
                    self.free_reg(vreg);
                    self.free_reg(key_reg);
                }
            }
        }
        self.flush_set_list(table_reg, &mut batch_len, &mut array_index)?;

        self.free_reg(scratch);
        match target {
            Some(t) if t != table_reg => {
                self.emit(Instruction::make_move(t, table_reg));
                self.free_reg(table_reg);
                Ok(t)
            }
            _ => Ok(table_reg),
        }
    }

    fn flush_set_list(
        &mut self,
        table_reg: u8,
        batch_len: &mut usize,
        array_index: &mut usize,
    ) -> Result<()> {
        if *batch_len == 0 {
            return Ok(());
        }
        let start = *array_index - *batch_len;
        if start <= 255 {
            self.emit(Instruction::make_set_list(
                table_reg,
                *batch_len as u8,
                start as u8,
            ));
        } else {
            // Start index past the 8-bit field: store the batch one element
            // at a time, using the reserved scratch slot for wide keys.
            let scratch = table_reg + 1;
            for j in 0..*batch_len {
                let index = start + j;
                let value_reg = table_reg + 2 + j as u8;
                if index <= 511 {
                    self.emit(Instruction::make_set_field_i(
                        table_reg,
                        value_reg,
                        index as u32,
                    ));
                } else {
                    self.load_int(scratch, index as i64);
                    self.emit(Instruction::make_set_field(table_reg, scratch, value_reg));
                }
            }
        }
        // The value window collapses back to just above the scratch slot.
        let f = self.f();
        f.freereg = table_reg + 2;
        *batch_len = 0;
        Ok(())
    }
}
