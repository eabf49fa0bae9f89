//! Statement code generation: declarations, assignments, control flow,
//! loops, functions and defers.

use sable_core::limits::MULTRET;
use sable_core::{Error, Result};
use sable_syntax::ast::{BinOp, Block, Expr, ExprKind, FuncDef, Stat, StatKind};
use sable_vm::Instruction;

use crate::state::{Compiler, FuncState, LoopContext};

impl Compiler<'_> {
    /// Compiles the statements of a block inside a fresh scope, flushing the
    /// scope's deferred blocks on the way out.
    pub fn scoped_block(&mut self, block: &Block) -> Result<()> {
        self.enter_scope();
        self.statements(block)?;
        self.flush_scope_defers()?;
        self.leave_scope();
        Ok(())
    }

    /// Compiles statements without opening a scope (function bodies open
    /// their own).
    pub fn statements(&mut self, block: &Block) -> Result<()> {
        for stat in &block.stats {
            self.statement(stat)?;
        }
        Ok(())
    }

    fn statement(&mut self, s: &Stat) -> Result<()> {
        self.mark_span(s.span);
        match &s.kind {
            StatKind::Let {
                names,
                is_const,
                inits,
            } => self.let_statement(names, *is_const, inits)?,
            StatKind::Assign { targets, values } => self.assign_statement(targets, values)?,
            StatKind::Compound { target, op, value } => {
                self.compound_statement(target, *op, value)?
            }
            StatKind::Increment { target } => self.step_statement(target, 1)?,
            StatKind::Decrement { target } => self.step_statement(target, -1)?,
            StatKind::ExprStat { expr } => {
                if expr.is_multivalue() && !matches!(expr.kind, ExprKind::Vararg) {
                    self.call_expr(expr, 0)?;
                } else {
                    let reg = self.expr(expr, None)?;
                    self.free_reg(reg);
                }
            }
            StatKind::If { arms, else_block } => self.if_statement(arms, else_block.as_ref())?,
            StatKind::While { cond, body } => self.while_statement(cond, body)?,
            StatKind::ForC {
                init,
                cond,
                update,
                body,
            } => self.for_c_statement(init.as_deref(), cond.as_ref(), update.as_deref(), body)?,
            StatKind::ForEach { names, iter, body } => {
                self.foreach_statement(names, iter, body)?
            }
            StatKind::Return { values } => self.return_statement(values)?,
            StatKind::Break => self.break_statement()?,
            StatKind::Continue => self.continue_statement()?,
            StatKind::Defer { body } => {
                let level = self.scope_level();
                self.f().defer_stack.push(crate::state::DeferInfo {
                    body: body.clone(),
                    scope_level: level,
                });
            }
            StatKind::FuncDecl { name, path, func } => {
                self.function_declaration(name, path, func)?
            }
            StatKind::Scope { body } => self.scoped_block(body)?,
        }
        self.reset_temporaries();
        Ok(())
    }

    // ----- defers -----

    /// Compiles (inline, LIFO) every defer declared in the current scope.
    fn flush_scope_defers(&mut self) -> Result<()> {
        let level = self.scope_level();
        self.flush_defers_from(level)
    }

    /// Compiles defers at or below `level` deep, LIFO, without popping them
    /// (break/continue/return flush copies; the owning scope pops on exit).
    fn flush_defers_from(&mut self, level: usize) -> Result<()> {
        let pending: Vec<Block> = self
            .f_ref()
            .defer_stack
            .iter()
            .filter(|d| d.scope_level >= level)
            .map(|d| d.body.clone())
            .rev()
            .collect();
        for body in pending {
            self.scoped_block(&body)?;
        }
        Ok(())
    }

    // ----- declarations and assignment -----

    fn let_statement(&mut self, names: &[String], is_const: bool, inits: &[Expr]) -> Result<()> {
        let base = self.f_ref().min_freereg;
        let count = names.len();

        if inits.is_empty() {
            let first = self.alloc_reg()?;
            for _ in 1..count {
                self.alloc_reg()?;
            }
            self.emit(Instruction::make_load_nil(first, (count - 1) as u8));
        } else {
            for (i, init) in inits.iter().enumerate() {
                let is_last = i == inits.len() - 1;
                let remaining = count.saturating_sub(i);
                if is_last && remaining > 1 && init.is_multivalue() {
                    match &init.kind {
                        ExprKind::Vararg => {
                            let first = self.alloc_reg()?;
                            for _ in 1..remaining {
                                self.alloc_reg()?;
                            }
                            self.emit(Instruction::make_vararg(first, remaining as u8));
                        }
                        _ => {
                            let call_base = self.call_expr(init, remaining as u8)?;
                            debug_assert_eq!(call_base as usize, base as usize + i);
                        }
                    }
                } else if i < count {
                    let dest = self.alloc_reg()?;
                    debug_assert_eq!(dest as usize, base as usize + i);
                    self.expr_into(init, dest)?;
                } else {
                    // Extra initializers evaluate for effect only.
                    let reg = self.expr(init, None)?;
                    self.free_reg(reg);
                }
            }
            // Missing initializers default to nil.
            if inits.len() < count && !inits.last().map(|e| e.is_multivalue()).unwrap_or(false) {
                for i in inits.len()..count {
                    let dest = self.alloc_reg()?;
                    debug_assert_eq!(dest as usize, base as usize + i);
                    self.emit(Instruction::make_load_nil(dest, 0));
                }
            }
        }

        for (i, name) in names.iter().enumerate() {
            self.declare_local(name, base + i as u8, is_const);
        }
        Ok(())
    }

    fn assign_statement(&mut self, targets: &[Expr], values: &[Expr]) -> Result<()> {
        // Fast path: one name, one value.
        if targets.len() == 1 && values.len() == 1 {
            return self.assign_single(&targets[0], &values[0]);
        }

        // Evaluate every value into consecutive temporaries, then store.
        let base = self.f_ref().freereg;
        let count = targets.len();
        for (i, value) in values.iter().enumerate() {
            let is_last = i == values.len() - 1;
            let remaining = count.saturating_sub(i);
            if is_last && remaining > 1 && value.is_multivalue() {
                match &value.kind {
                    ExprKind::Vararg => {
                        let first = self.alloc_reg()?;
                        for _ in 1..remaining {
                            self.alloc_reg()?;
                        }
                        self.emit(Instruction::make_vararg(first, remaining as u8));
                    }
                    _ => {
                        self.call_expr(value, remaining as u8)?;
                    }
                }
            } else {
                let dest = self.alloc_reg()?;
                self.expr_into(value, dest)?;
            }
        }
        // Nil-fill underproduction.
        let produced = values.len();
        if produced < count && !values.last().map(|e| e.is_multivalue()).unwrap_or(false) {
            for _ in produced..count {
                let dest = self.alloc_reg()?;
                self.emit(Instruction::make_load_nil(dest, 0));
            }
        }

        for (i, target) in targets.iter().enumerate() {
            self.store_into_target(target, base + i as u8)?;
        }
        Ok(())
    }

    fn assign_single(&mut self, target: &Expr, value: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.resolve_local(name) {
                    self.check_not_const(name, local.is_const)?;
                    self.expr_into(value, local.reg)?;
                    return Ok(());
                }
                if let Some((index, is_const)) = self.resolve_upvalue(name)? {
                    self.check_not_const(name, is_const)?;
                    let reg = self.expr(value, None)?;
                    self.emit(Instruction::make_set_upval(reg, index));
                    self.free_reg(reg);
                    return Ok(());
                }
                let reg = self.expr(value, None)?;
                let k = self.add_string_constant(name);
                self.emit(Instruction::make_set_global(reg, k));
                self.free_reg(reg);
                Ok(())
            }
            _ => {
                let reg = self.expr(value, None)?;
                self.store_into_target(target, reg)?;
                self.free_reg(reg);
                Ok(())
            }
        }
    }

    /// Stores the value held in `value_reg` into an lvalue expression.
    fn store_into_target(&mut self, target: &Expr, value_reg: u8) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.resolve_local(name) {
                    self.check_not_const(name, local.is_const)?;
                    if local.reg != value_reg {
                        self.emit(Instruction::make_move(local.reg, value_reg));
                    }
                    return Ok(());
                }
                if let Some((index, is_const)) = self.resolve_upvalue(name)? {
                    self.check_not_const(name, is_const)?;
                    self.emit(Instruction::make_set_upval(value_reg, index));
                    return Ok(());
                }
                let k = self.add_string_constant(name);
                self.emit(Instruction::make_set_global(value_reg, k));
                Ok(())
            }
            ExprKind::Member { object, name } => {
                let obj = self.expr(object, None)?;
                let k = self.add_string_constant(name);
                if k <= 511 {
                    self.emit(Instruction::make_set_field_s(obj, value_reg, k));
                } else {
                    let key_reg = self.alloc_reg()?;
                    self.emit(Instruction::make_load_s(key_reg, k));
                    self.emit(Instruction::make_set_field(obj, key_reg, value_reg));
                    self.free_reg(key_reg);
                }
                self.free_reg(obj);
                Ok(())
            }
            ExprKind::Index { object, key } => {
                let obj = self.expr(object, None)?;
                if let ExprKind::Int(i) = &key.kind {
                    if (0..=511).contains(i) {
                        self.emit(Instruction::make_set_field_i(obj, value_reg, *i as u32));
                        self.free_reg(obj);
                        return Ok(());
                    }
                }
                let key_reg = self.expr(key, None)?;
                self.emit(Instruction::make_set_field(obj, key_reg, value_reg));
                self.free_reg(key_reg);
                self.free_reg(obj);
                Ok(())
            }
            _ => Err(Error::semantic(
                "expression is not assignable",
                self.location(),
            )),
        }
    }

    fn check_not_const(&self, name: &str, is_const: bool) -> Result<()> {
        if is_const {
            Err(Error::semantic(
                format!("cannot assign to constant '{name}'"),
                self.location(),
            ))
        } else {
            Ok(())
        }
    }

    fn compound_statement(&mut self, target: &Expr, op: BinOp, value: &Expr) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.resolve_local(name) {
                    self.check_not_const(name, local.is_const)?;
                    // Result lands straight back in the local's register.
                    self.expr(
                        &Expr {
                            kind: ExprKind::Bin {
                                op,
                                lhs: Box::new(target.clone()),
                                rhs: Box::new(value.clone()),
                            },
                            span: target.span,
                        },
                        Some(local.reg),
                    )?;
                    return Ok(());
                }
                // Upvalue or global: read, combine, write back.
                let combined = self.expr(
                    &Expr {
                        kind: ExprKind::Bin {
                            op,
                            lhs: Box::new(target.clone()),
                            rhs: Box::new(value.clone()),
                        },
                        span: target.span,
                    },
                    None,
                )?;
                self.store_into_target(target, combined)?;
                self.free_reg(combined);
                Ok(())
            }
            ExprKind::Member { .. } | ExprKind::Index { .. } => {
                // Evaluate the container and key once.
                let (obj, key_reg) = self.container_and_key(target)?;
                let current = self.alloc_reg()?;
                self.emit(Instruction::make_get_field(current, obj, key_reg));
                let rhs = self.expr(value, None)?;
                let opcode = match op {
                    BinOp::Add => sable_vm::OpCode::Add,
                    BinOp::Sub => sable_vm::OpCode::Sub,
                    BinOp::Mul => sable_vm::OpCode::Mul,
                    BinOp::Div => sable_vm::OpCode::Div,
                    BinOp::Mod => sable_vm::OpCode::Mod,
                    _ => {
                        return Err(Error::semantic(
                            "operator not valid in compound assignment",
                            self.location(),
                        ))
                    }
                };
                self.emit(Instruction::make_arith(opcode, current, current, rhs));
                self.emit(Instruction::make_set_field(obj, key_reg, current));
                self.free_reg(rhs);
                self.free_reg(current);
                self.free_reg(key_reg);
                self.free_reg(obj);
                Ok(())
            }
            _ => Err(Error::semantic(
                "expression is not assignable",
                self.location(),
            )),
        }
    }

    /// Evaluates an index/member target's container and key into registers.
    fn container_and_key(&mut self, target: &Expr) -> Result<(u8, u8)> {
        match &target.kind {
            ExprKind::Member { object, name } => {
                let obj = self.expr(object, None)?;
                let key_reg = self.alloc_reg()?;
                let k = self.add_string_constant(name);
                self.emit(Instruction::make_load_s(key_reg, k));
                Ok((obj, key_reg))
            }
            ExprKind::Index { object, key } => {
                let obj = self.expr(object, None)?;
                let key_reg = self.expr(key, None)?;
                Ok((obj, key_reg))
            }
            _ => Err(Error::semantic(
                "expression is not assignable",
                self.location(),
            )),
        }
    }

    /// `x++` / `x--`: dedicated step opcodes for plain names, a compound
    /// add for fields.
    fn step_statement(&mut self, target: &Expr, delta: i64) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if let Some(local) = self.resolve_local(name) {
                    self.check_not_const(name, local.is_const)?;
                    let instr = if delta > 0 {
                        Instruction::make_inc_local(local.reg)
                    } else {
                        Instruction::make_dec_local(local.reg)
                    };
                    self.emit(instr);
                    return Ok(());
                }
                if let Some((index, is_const)) = self.resolve_upvalue(name)? {
                    self.check_not_const(name, is_const)?;
                    let instr = if delta > 0 {
                        Instruction::make_inc_upvalue(index)
                    } else {
                        Instruction::make_dec_upvalue(index)
                    };
                    self.emit(instr);
                    return Ok(());
                }
                let k = self.add_string_constant(name);
                let instr = if delta > 0 {
                    Instruction::make_inc_global(k)
                } else {
                    Instruction::make_dec_global(k)
                };
                self.emit(instr);
                Ok(())
            }
            _ => {
                let op = if delta > 0 { BinOp::Add } else { BinOp::Sub };
                let one = Expr {
                    kind: ExprKind::Int(1),
                    span: target.span,
                };
                self.compound_statement(target, op, &one)
            }
        }
    }

    // ----- control flow -----

    fn if_statement(&mut self, arms: &[(Expr, Block)], else_block: Option<&Block>) -> Result<()> {
        let mut end_jumps = Vec::new();
        for (i, (cond, block)) in arms.iter().enumerate() {
            let jump_false = self.condition_jump(cond)?;
            self.scoped_block(block)?;
            let has_more = i + 1 < arms.len() || else_block.is_some();
            if has_more && !self.last_is_terminal() {
                end_jumps.push(self.emit(Instruction::make_jmp(0)));
            }
            let after_arm = self.here();
            self.patch_jump_to(jump_false, after_arm);
        }
        if let Some(block) = else_block {
            self.scoped_block(block)?;
        }
        let end = self.here();
        for position in end_jumps {
            self.patch_jump_to(position, end);
        }
        Ok(())
    }

    fn while_statement(&mut self, cond: &Expr, body: &Block) -> Result<()> {
        let start = self.here();
        let exit_jump = self.condition_jump(cond)?;

        let scope_level = self.scope_level();
        self.f().loop_stack.push(LoopContext {
            scope_level,
            ..Default::default()
        });

        self.scoped_block(body)?;

        let ctx = self.f().loop_stack.pop().expect("loop context");
        for position in &ctx.continue_jumps {
            self.patch_jump_to(*position, start);
        }
        let back = self.here();
        self.emit(Instruction::make_jmp(start as i32 - back as i32 - 1));
        let exit = self.here();
        self.patch_jump_to(exit_jump, exit);
        for position in &ctx.break_jumps {
            self.patch_jump_to(*position, exit);
        }
        Ok(())
    }

    fn for_c_statement(
        &mut self,
        init: Option<&Stat>,
        cond: Option<&Expr>,
        update: Option<&Stat>,
        body: &Block,
    ) -> Result<()> {
        if let (Some(init), Some(cond), Some(update)) = (init, cond, update) {
            if self.try_numeric_for(init, cond, update, body)? {
                return Ok(());
            }
        }

        self.enter_scope();
        if let Some(init) = init {
            self.statement(init)?;
        }
        let start = self.here();
        let exit_jump = match cond {
            Some(cond) => Some(self.condition_jump(cond)?),
            None => None,
        };

        let scope_level = self.scope_level();
        self.f().loop_stack.push(LoopContext {
            scope_level,
            ..Default::default()
        });

        self.scoped_block(body)?;

        let ctx = self.f().loop_stack.pop().expect("loop context");
        // Continues land on the update section.
        let continue_target = self.here();
        for position in &ctx.continue_jumps {
            self.patch_jump_to(*position, continue_target);
        }
        if let Some(update) = update {
            self.statement(update)?;
        }
        let back = self.here();
        self.emit(Instruction::make_jmp(start as i32 - back as i32 - 1));
        let exit = self.here();
        if let Some(position) = exit_jump {
            self.patch_jump_to(position, exit);
        }
        for position in &ctx.break_jumps {
            self.patch_jump_to(*position, exit);
        }

        self.flush_scope_defers()?;
        self.leave_scope();
        Ok(())
    }

    /// Detects the canonical counting loop
    /// `for (let i = a; i < b; i++)` (or `<=`, or `i += step`) and lowers it
    /// to the `ForPrep`/`ForLoop` register quadruple. Returns false when the
    /// shape does not match and the general lowering must run.
    fn try_numeric_for(
        &mut self,
        init: &Stat,
        cond: &Expr,
        update: &Stat,
        body: &Block,
    ) -> Result<bool> {
        let StatKind::Let {
            names,
            is_const: false,
            inits,
        } = &init.kind
        else {
            return Ok(false);
        };
        let [var] = names.as_slice() else {
            return Ok(false);
        };
        let [start_expr] = inits.as_slice() else {
            return Ok(false);
        };

        let ExprKind::Bin { op, lhs, rhs } = &cond.kind else {
            return Ok(false);
        };
        let limit_is_exclusive = match op {
            BinOp::Lt => true,
            BinOp::Le => false,
            _ => return Ok(false),
        };
        let ExprKind::Name(cond_var) = &lhs.kind else {
            return Ok(false);
        };
        if cond_var != var {
            return Ok(false);
        }
        // An exclusive bound is only folded for integer literal limits.
        let exclusive_limit = if limit_is_exclusive {
            match &rhs.kind {
                ExprKind::Int(v) => Some(*v),
                _ => return Ok(false),
            }
        } else {
            None
        };

        let step = match &update.kind {
            StatKind::Increment { target } => match &target.kind {
                ExprKind::Name(n) if n == var => 1,
                _ => return Ok(false),
            },
            StatKind::Compound {
                target,
                op: BinOp::Add,
                value,
            } => match (&target.kind, &value.kind) {
                (ExprKind::Name(n), ExprKind::Int(step)) if n == var && *step > 0 => *step,
                _ => return Ok(false),
            },
            _ => return Ok(false),
        };

        self.enter_scope();
        let index_reg = self.alloc_reg()?;
        let limit_reg = self.alloc_reg()?;
        let step_reg = self.alloc_reg()?;
        let internal_reg = self.alloc_reg()?;

        self.expr_into(start_expr, index_reg)?;
        match exclusive_limit {
            Some(limit) => self.load_int(limit_reg, limit.wrapping_sub(1)),
            None => self.expr_into(cond.rhs_of_comparison(), limit_reg)?,
        }
        self.load_int(step_reg, step);

        self.declare_local(var, index_reg, false);
        self.declare_local("(for limit)", limit_reg, false);
        self.declare_local("(for step)", step_reg, false);
        self.declare_local("(for internal)", internal_reg, false);

        let prep_position = self.emit(Instruction::make_for_prep(index_reg, 0));

        let scope_level = self.scope_level();
        self.f().loop_stack.push(LoopContext {
            scope_level,
            ..Default::default()
        });

        self.scoped_block(body)?;

        let ctx = self.f().loop_stack.pop().expect("loop context");
        let loop_position = self.here();
        for position in &ctx.continue_jumps {
            self.patch_jump_to(*position, loop_position);
        }
        self.emit(Instruction::make_for_loop(index_reg, 0));
        self.patch(
            prep_position,
            Instruction::make_for_prep(
                index_reg,
                loop_position as i32 - (prep_position as i32 + 1),
            ),
        );
        self.patch(
            loop_position,
            Instruction::make_for_loop(
                index_reg,
                prep_position as i32 + 1 - loop_position as i32,
            ),
        );
        let exit = self.here();
        for position in &ctx.break_jumps {
            self.patch_jump_to(*position, exit);
        }

        self.flush_scope_defers()?;
        self.leave_scope();
        Ok(true)
    }

    /// `foreach (names in expr)`: the iterator protocol. The expression
    /// yields `(iterator, state, initial key)`; each round calls
    /// `iterator(state, key)` and stops when the first result is nil.
    fn foreach_statement(&mut self, names: &[String], iter: &Expr, body: &Block) -> Result<()> {
        self.enter_scope();

        let iter_reg = self.alloc_reg()?;
        let state_reg = self.alloc_reg()?;
        let key_reg = self.alloc_reg()?;
        self.declare_local("(for iterator)", iter_reg, false);
        self.declare_local("(for state)", state_reg, false);
        self.declare_local("(for key)", key_reg, false);

        if iter.is_multivalue() && !matches!(iter.kind, ExprKind::Vararg) {
            let call_base = self.call_expr(iter, 3)?;
            self.emit(Instruction::make_move(iter_reg, call_base));
            self.emit(Instruction::make_move(state_reg, call_base + 1));
            self.emit(Instruction::make_move(key_reg, call_base + 2));
            self.reset_temporaries();
        } else {
            self.expr_into(iter, iter_reg)?;
            self.emit(Instruction::make_load_nil(state_reg, 1));
        }

        let mut name_regs = Vec::with_capacity(names.len());
        for name in names {
            let reg = self.alloc_reg()?;
            self.emit(Instruction::make_load_nil(reg, 0));
            self.declare_local(name, reg, false);
            name_regs.push(reg);
        }

        // Per-iteration prelude: call the iterator with (state, key).
        let start = self.here();
        let call_base = self.alloc_reg()?;
        let arg_state = self.alloc_reg()?;
        let arg_key = self.alloc_reg()?;
        // Result slots beyond the two arguments, when more names are bound.
        for _ in 2..names.len() {
            self.alloc_reg()?;
        }
        self.emit(Instruction::make_move(call_base, iter_reg));
        self.emit(Instruction::make_move(arg_state, state_reg));
        self.emit(Instruction::make_move(arg_key, key_reg));
        self.emit(Instruction::make_call(
            call_base,
            2,
            names.len().max(1) as u8,
            false,
        ));
        // A nil (or false) first result terminates the loop.
        self.emit(Instruction::make_test(call_base, true));
        let exit_jump = self.emit(Instruction::make_jmp(0));
        self.emit(Instruction::make_move(key_reg, call_base));
        for (i, &name_reg) in name_regs.iter().enumerate() {
            self.emit(Instruction::make_move(name_reg, call_base + i as u8));
        }
        self.reset_temporaries();

        let scope_level = self.scope_level();
        self.f().loop_stack.push(LoopContext {
            scope_level,
            ..Default::default()
        });

        self.scoped_block(body)?;

        let ctx = self.f().loop_stack.pop().expect("loop context");
        for position in &ctx.continue_jumps {
            self.patch_jump_to(*position, start);
        }
        let back = self.here();
        self.emit(Instruction::make_jmp(start as i32 - back as i32 - 1));
        let exit = self.here();
        self.patch_jump_to(exit_jump, exit);
        for position in &ctx.break_jumps {
            self.patch_jump_to(*position, exit);
        }

        self.flush_scope_defers()?;
        self.leave_scope();
        Ok(())
    }

    fn return_statement(&mut self, values: &[Expr]) -> Result<()> {
        // Every pending defer runs before the frame goes away.
        self.flush_defers_from(0)?;

        match values {
            [] => {
                self.emit(Instruction::make_return(0, 0));
            }
            [single] if matches!(single.kind, ExprKind::Call { .. } | ExprKind::MethodCall { .. }) =>
            {
                // `return f(x)` reuses the frame.
                let (base, nargs, is_self) = self.call_parts(single)?;
                self.emit(Instruction::make_tail_call(base, nargs, is_self));
            }
            [single] => {
                let reg = self.expr(single, None)?;
                self.emit(Instruction::make_return(reg, 1));
                self.free_reg(reg);
            }
            _ => {
                let base = self.f_ref().freereg;
                let mut count = values.len() as u8;
                for (i, value) in values.iter().enumerate() {
                    let is_last = i == values.len() - 1;
                    if is_last && value.is_multivalue() {
                        match &value.kind {
                            ExprKind::Vararg => {
                                let dest = self.alloc_reg()?;
                                self.emit(Instruction::make_vararg(dest, 0));
                            }
                            _ => {
                                self.call_expr(value, MULTRET)?;
                            }
                        }
                        count = MULTRET;
                    } else {
                        let dest = self.alloc_reg()?;
                        self.expr_into(value, dest)?;
                    }
                }
                self.emit(Instruction::make_return(base, count));
            }
        }
        Ok(())
    }

    fn break_statement(&mut self) -> Result<()> {
        let Some(loop_level) = self.f_ref().loop_stack.last().map(|c| c.scope_level) else {
            return Err(Error::semantic("'break' outside a loop", self.location()));
        };
        // Scopes inside the loop body still owe their defers.
        self.flush_defers_from(loop_level + 1)?;
        let position = self.emit(Instruction::make_jmp(0));
        self.f()
            .loop_stack
            .last_mut()
            .expect("loop context")
            .break_jumps
            .push(position);
        Ok(())
    }

    fn continue_statement(&mut self) -> Result<()> {
        let Some(loop_level) = self.f_ref().loop_stack.last().map(|c| c.scope_level) else {
            return Err(Error::semantic(
                "'continue' outside a loop",
                self.location(),
            ));
        };
        self.flush_defers_from(loop_level + 1)?;
        let position = self.emit(Instruction::make_jmp(0));
        self.f()
            .loop_stack
            .last_mut()
            .expect("loop context")
            .continue_jumps
            .push(position);
        Ok(())
    }

    // ----- functions -----

    fn function_declaration(
        &mut self,
        name: &str,
        path: &[String],
        func: &FuncDef,
    ) -> Result<()> {
        if path.is_empty() {
            // Plain `function f(...)`: assign wherever `f` resolves.
            let closure_reg = self.function_def(func, None)?;
            let target = Expr {
                kind: ExprKind::Name(name.to_string()),
                span: func.span,
            };
            self.store_into_target(&target, closure_reg)?;
            self.free_reg(closure_reg);
            return Ok(());
        }

        // `function obj.a.b(...)`: walk to the owning table, store the last
        // segment.
        let closure_reg = self.function_def(func, None)?;
        let name_expr = Expr {
            kind: ExprKind::Name(name.to_string()),
            span: func.span,
        };
        let mut container = self.expr(&name_expr, None)?;
        for segment in &path[..path.len() - 1] {
            let next = self.alloc_reg()?;
            let k = self.add_string_constant(segment);
            if k <= 511 {
                self.emit(Instruction::make_get_field_s(next, container, k));
            } else {
                let key_reg = self.alloc_reg()?;
                self.emit(Instruction::make_load_s(key_reg, k));
                self.emit(Instruction::make_get_field(next, container, key_reg));
                self.free_reg(key_reg);
            }
            self.free_reg(container);
            container = next;
        }
        let last = &path[path.len() - 1];
        let k = self.add_string_constant(last);
        if k <= 511 {
            self.emit(Instruction::make_set_field_s(container, closure_reg, k));
        } else {
            let key_reg = self.alloc_reg()?;
            self.emit(Instruction::make_load_s(key_reg, k));
            self.emit(Instruction::make_set_field(container, key_reg, closure_reg));
            self.free_reg(key_reg);
        }
        self.free_reg(container);
        self.free_reg(closure_reg);
        Ok(())
    }

    /// Compiles a function definition: child proto, child state, body, then
    /// the `Closure` instruction plus one capture pseudo-instruction per
    /// upvalue in the parent.
    pub fn function_def(&mut self, def: &FuncDef, target: Option<u8>) -> Result<u8> {
        let parent_proto = self.f_ref().proto;
        let (source_name, source_path) = {
            let proto = self.rt.heap().proto(parent_proto);
            (proto.source_name, proto.source_path)
        };

        let mut proto = sable_vm::Proto::new();
        proto.source_name = source_name;
        proto.source_path = source_path;
        proto.num_params = def.params.len() as u32;
        proto.is_vararg = def.is_vararg;
        let fn_name = self
            .rt
            .heap_mut()
            .new_string(def.name.as_deref().unwrap_or("<anonymous>"));
        proto.name = Some(fn_name);
        let proto_ref = self.rt.heap_mut().new_proto(proto);

        let proto_index = {
            let parent = self.rt.heap_mut().proto_mut(parent_proto);
            parent.protos.push(proto_ref);
            (parent.protos.len() - 1) as u32
        };

        self.funcs.push(FuncState::new(proto_ref));
        self.f().last_line = def.span.line;
        self.f().last_column = def.span.column;

        if def.is_vararg {
            self.emit(Instruction::make_vararg_prep(def.params.len() as u8));
        }

        self.enter_scope();

        // Register 0 holds the running closure; a named function can reach
        // itself through it.
        let self_reg = self.alloc_reg()?;
        debug_assert_eq!(self_reg, 0);
        match &def.name {
            Some(name) => self.declare_local(name, 0, false),
            None => {
                let f = self.f();
                f.min_freereg = 1;
            }
        }

        for param in &def.params {
            let reg = self.alloc_reg()?;
            self.declare_local(param, reg, false);
        }

        self.statements(&def.body)?;

        if !self.last_is_terminal() {
            self.flush_defers_from(0)?;
            self.emit(Instruction::make_return(0, 0));
        }
        self.leave_scope();

        let child = self.funcs.pop().expect("child function state");
        let child_has_upvalues = self.rt.heap().proto(proto_ref).has_upvalues;
        if child_has_upvalues {
            self.rt.heap_mut().proto_mut(parent_proto).has_upvalues = true;
        }

        let reg = match target {
            Some(t) => t,
            None => self.alloc_reg()?,
        };
        self.emit(Instruction::make_closure(reg, proto_index));
        for upvalue in &child.upvalues {
            let capture = if upvalue.is_local {
                Instruction::make_move(0, upvalue.index)
            } else {
                Instruction::make_get_upval(0, upvalue.index)
            };
            self.emit(capture);
        }
        Ok(reg)
    }
}

/// Access to the right-hand side of a comparison condition; used by the
/// numeric-for lowering.
trait ComparisonRhs {
    fn rhs_of_comparison(&self) -> &Expr;
}

impl ComparisonRhs for Expr {
    fn rhs_of_comparison(&self) -> &Expr {
        match &self.kind {
            ExprKind::Bin { rhs, .. } => rhs,
            _ => self,
        }
    }
}
