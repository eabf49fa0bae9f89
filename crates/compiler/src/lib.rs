//! # Sable Compiler
//!
//! The bytecode back-end: translates the parsed, position-annotated AST from
//! `sable-syntax` into `sable-vm` prototypes — register allocation, constant
//! interning, jump patching and the immediate-operand peepholes.
//!
//! The public surface is source loading: [`load_string`] / [`load_buffer`]
//! parse and compile a chunk and leave its closure on the runtime's value
//! stack, ready for `call`.
//!
//! ```
//! use sable_vm::Runtime;
//!
//! let mut rt = Runtime::new();
//! rt.open_libs();
//! sable_compiler::load_string(&mut rt, "return 2 + 40").unwrap();
//! rt.call(0, 1).unwrap();
//! assert_eq!(rt.to_integer(-1), Some(42));
//! ```

mod expr;
mod stat;
mod state;

use sable_core::Result;
use sable_syntax::ast::Program;
use sable_vm::{GcRef, Instruction, Runtime, Value};

use crate::state::{Compiler, FuncState};

/// Compiles a parsed program into a main-chunk proto. The collector is
/// paused for the duration so partially built protos are never visible to a
/// collection.
pub fn compile(rt: &mut Runtime, program: &Program, chunk_name: &str) -> Result<GcRef> {
    let was_paused = rt.heap().gc_is_paused();
    rt.heap_mut().gc_pause();
    let result = compile_inner(rt, program, chunk_name);
    if !was_paused {
        rt.heap_mut().gc_resume();
    }
    result
}

fn compile_inner(rt: &mut Runtime, program: &Program, chunk_name: &str) -> Result<GcRef> {
    let mut proto = sable_vm::Proto::new();
    let source = rt.heap_mut().new_string(chunk_name);
    let name = rt.heap_mut().new_string("main chunk");
    proto.source_name = Some(source);
    proto.source_path = Some(source);
    proto.name = Some(name);
    let proto_ref = rt.heap_mut().new_proto(proto);

    let mut compiler = Compiler::new(rt, chunk_name);
    compiler.funcs.push(FuncState::new(proto_ref));
    compiler.enter_scope();

    // Register 0 belongs to the chunk closure.
    let chunk_reg = compiler.alloc_reg()?;
    debug_assert_eq!(chunk_reg, 0);
    compiler.f().min_freereg = 1;

    compiler.statements(&program.block)?;

    if !compiler.last_is_terminal() {
        compiler.emit(Instruction::make_return(0, 0));
    }
    compiler.leave_scope();
    compiler.funcs.pop();

    Ok(proto_ref)
}

/// Parses and compiles `source`, leaving the main-chunk closure on the
/// stack.
pub fn load_buffer(rt: &mut Runtime, source: &str, chunk_name: &str) -> Result<()> {
    let program = sable_syntax::parse(source, chunk_name)?;

    let was_paused = rt.heap().gc_is_paused();
    rt.heap_mut().gc_pause();
    let result = (|| -> Result<()> {
        let proto = compile_inner(rt, &program, chunk_name)?;
        log::debug!(
            "compiled chunk '{}': {} instructions",
            chunk_name,
            rt.heap().proto(proto).code.len()
        );
        let closure = rt.heap_mut().new_closure(proto);
        rt.push_value(Value::Closure(closure));
        Ok(())
    })();
    if !was_paused {
        rt.heap_mut().gc_resume();
    }
    result
}

/// [`load_buffer`] with the default chunk name.
pub fn load_string(rt: &mut Runtime, source: &str) -> Result<()> {
    load_buffer(rt, source, "chunk")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_core::ErrorKind;

    fn run_int(source: &str) -> i64 {
        let mut rt = Runtime::new();
        rt.open_libs();
        load_string(&mut rt, source).unwrap();
        rt.call(0, 1).unwrap();
        rt.to_integer(-1)
            .unwrap_or_else(|| panic!("expected integer result, got {:?}", rt.value_at(-1)))
    }

    fn compile_err(source: &str) -> sable_core::Error {
        let mut rt = Runtime::new();
        load_string(&mut rt, source).unwrap_err()
    }

    #[test]
    fn constant_pools_deduplicate() {
        let mut rt = Runtime::new();
        let program = sable_syntax::parse(
            "let a = 100000 let b = 100000 let s = \"x\" let t = \"x\" let f = 1.25 let g = 1.25",
            "t",
        )
        .unwrap();
        let proto = compile(&mut rt, &program, "t").unwrap();
        let proto = rt.heap().proto(proto);
        assert_eq!(proto.int_constants.len(), 1);
        assert_eq!(proto.str_constants.len(), 1);
        assert_eq!(proto.float_constants.len(), 1);
    }

    #[test]
    fn small_integers_avoid_the_pool() {
        let mut rt = Runtime::new();
        let program = sable_syntax::parse("let a = 5 let b = -65536", "t").unwrap();
        let proto = compile(&mut rt, &program, "t").unwrap();
        assert!(rt.heap().proto(proto).int_constants.is_empty());
    }

    #[test]
    fn arithmetic_and_locals() {
        assert_eq!(run_int("let a = 2 let b = 40 return a + b"), 42);
        assert_eq!(run_int("let a = 10 a += 5 return a"), 15);
        assert_eq!(run_int("let a = 10 a++ a++ a-- return a"), 11);
    }

    #[test]
    fn if_else_chains() {
        let src = "let n = 7
            if (n < 5) { return 1 }
            else if (n < 10) { return 2 }
            else { return 3 }";
        assert_eq!(run_int(src), 2);
    }

    #[test]
    fn while_loops_with_break_and_continue() {
        let src = "let total = 0 let i = 0
            while (true) {
                i++
                if (i > 10) { break }
                if (i % 2 == 0) { continue }
                total += i
            }
            return total";
        assert_eq!(run_int(src), 25);
    }

    #[test]
    fn c_style_for_counts() {
        assert_eq!(
            run_int("let total = 0 for (let i = 0; i < 10; i++) { total += i } return total"),
            45
        );
        assert_eq!(
            run_int("let total = 0 for (let i = 0; i <= 10; i += 2) { total += i } return total"),
            30
        );
    }

    #[test]
    fn general_for_with_non_canonical_update() {
        assert_eq!(
            run_int("let total = 0 for (let i = 10; i > 0; i -= 3) { total += i } return total"),
            10 + 7 + 4 + 1
        );
    }

    #[test]
    fn assignment_to_const_is_a_semantic_error() {
        let err = compile_err("const x = 1 x = 2");
        assert_eq!(err.kind, ErrorKind::Semantic);
        assert!(err.message.contains("constant 'x'"));
    }

    #[test]
    fn break_outside_loop_is_a_semantic_error() {
        let err = compile_err("break");
        assert_eq!(err.kind, ErrorKind::Semantic);
    }

    #[test]
    fn functions_and_recursion() {
        let src = "function f(n) { if (n < 2) { return n } return f(n - 1) + f(n - 2) }
            return f(10)";
        assert_eq!(run_int(src), 55);
    }

    #[test]
    fn multi_assignment_and_multiple_returns() {
        let src = "function two() { return 3, 4 }
            let a, b = two()
            return a * 10 + b";
        assert_eq!(run_int(src), 34);
    }

    #[test]
    fn underproduced_results_fill_with_nil() {
        let src = "function one() { return 9 }
            let a, b = one()
            if (b == nil) { return a } return -1";
        assert_eq!(run_int(src), 9);
    }

    #[test]
    fn closures_capture_and_share_upvalues() {
        let src = "function mk() { let x = 10; return function() { x = x + 1; return x } }
            let f = mk(); f(); f(); return f()";
        assert_eq!(run_int(src), 13);
    }

    #[test]
    fn defer_runs_in_lifo_order_at_scope_exit() {
        let src = "let order = 0
            function note(n) { order = order * 10 + n }
            {
                defer { note(2) }
                defer { note(1) }
                note(3)
            }
            return order";
        // 3 first, then defers LIFO: 1, then 2.
        assert_eq!(run_int(src), 312);
    }

    #[test]
    fn defer_runs_before_return() {
        let src = "let log = 0
            function f() { defer { log = 7 } return 1 }
            f()
            return log";
        assert_eq!(run_int(src), 7);
    }

    #[test]
    fn ternary_and_logical_operators() {
        assert_eq!(run_int("return true ? 1 : 2"), 1);
        assert_eq!(run_int("return false ? 1 : 2"), 2);
        assert_eq!(run_int("return (nil || 5) + (2 && 7)"), 12);
    }

    #[test]
    fn table_constructors_and_fields() {
        assert_eq!(run_int("let t = { 10, 20, 30 } return t[0] + t[1] + t[2]"), 60);
        assert_eq!(run_int("let t = { v = 6 } return t.v * 7"), 42);
        assert_eq!(run_int("let t = { [2 + 3] = 9 } return t[5]"), 9);
        assert_eq!(run_int("let t = {} t.x = 4 t[\"y\"] = 5 return t.x + t.y"), 9);
    }

    #[test]
    fn length_operator() {
        assert_eq!(run_int("let t = { 1, 2, 3 } return #t"), 3);
        assert_eq!(run_int("return #\"hello\""), 5);
    }

    #[test]
    fn method_calls_pass_the_receiver() {
        let src = "let obj = { factor = 6 }
            obj.scale = function(self, n) { return self.factor * n }
            return obj:scale(7)";
        assert_eq!(run_int(src), 42);
    }

    #[test]
    fn varargs_flow_through() {
        let src = "function sum(...) {
                let total = 0
                foreach (i, v in ipairs({...})) { total += v }
                return total
            }
            return sum(1, 2, 3, 4)";
        assert_eq!(run_int(src), 10);
    }

    #[test]
    fn foreach_iterates_pairs() {
        let src = "let t = { 5, 6, 7 }
            let total = 0
            foreach (k, v in pairs(t)) { total += v }
            return total";
        assert_eq!(run_int(src), 18);
    }

    #[test]
    fn compile_errors_carry_locations_in_range() {
        let source = "let a = 1\nlet b = 2\nbreak\n";
        let err = compile_err(source);
        let line = err.location.as_ref().map(|l| l.line).unwrap_or(0);
        let max_line = source.lines().count() as u32;
        assert!(line >= 1 && line <= max_line);
    }
}
