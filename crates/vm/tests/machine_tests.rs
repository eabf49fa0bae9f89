//! End-to-end dispatch tests over hand-assembled bytecode.
//!
//! The compiler crate has its own source-level tests; here protos are built
//! by hand so the VM's call protocol can be exercised in isolation.

use sable_vm::{Instruction, Proto, Runtime, Value};

/// Builds a runnable closure from a finished proto and leaves it on the
/// stack.
fn push_chunk(rt: &mut Runtime, proto: Proto) {
    let proto_ref = rt.heap_mut().new_proto(proto);
    let closure = rt.heap_mut().new_closure(proto_ref);
    rt.push_value(Value::Closure(closure));
}

fn named_proto(rt: &mut Runtime, name: &str) -> Proto {
    let mut proto = Proto::new();
    let source = rt.heap_mut().new_string("test.sbl");
    let fn_name = rt.heap_mut().new_string(name);
    proto.source_name = Some(source);
    proto.name = Some(fn_name);
    proto
}

#[test]
fn add_two_immediates() {
    let mut rt = Runtime::new();
    let mut proto = named_proto(&mut rt, "main");
    proto.max_stack_size = 3;
    proto.code = vec![
        Instruction::make_load_imm(1, 2),
        Instruction::make_load_imm(2, 40),
        Instruction::make_arith(sable_vm::OpCode::Add, 1, 1, 2),
        Instruction::make_return(1, 1),
    ];
    proto.line_info = vec![1; 4];
    proto.column_info = vec![1; 4];

    push_chunk(&mut rt, proto);
    rt.call(0, 1).unwrap();
    assert_eq!(rt.to_integer(-1), Some(42));
}

#[test]
fn stack_size_matches_call_arithmetic() {
    // Stack size after call = pre-call size - (nargs + 1) + nresults.
    let mut rt = Runtime::new();
    let mut proto = named_proto(&mut rt, "two");
    proto.num_params = 2;
    proto.max_stack_size = 4;
    proto.code = vec![
        Instruction::make_move(3, 1),
        Instruction::make_return(3, 1),
    ];
    proto.line_info = vec![1; 2];
    proto.column_info = vec![1; 2];

    rt.push_integer(111); // ballast below the call
    let before = rt.get_top();
    push_chunk(&mut rt, proto);
    rt.push_integer(7);
    rt.push_integer(8);
    rt.call(2, 1).unwrap();
    assert_eq!(rt.get_top(), before + 1);
    assert_eq!(rt.to_integer(-1), Some(7));
    assert_eq!(rt.to_integer(-2), Some(111));
}

#[test]
fn tail_recursion_runs_bounded() {
    // function g(n) { if (n <= 0) { return 42 } return g(n - 1) }
    let mut rt = Runtime::new();
    let mut proto = named_proto(&mut rt, "g");
    proto.num_params = 1;
    proto.max_stack_size = 4;
    let g_name = rt.heap_mut().new_string("g");
    proto.str_constants = vec![Value::String(g_name)];
    proto.code = vec![
        Instruction::make_cmp_imm(sable_vm::OpCode::LeImm, 1, 0),
        Instruction::make_jmp(3), // to the return-42 path
        Instruction::make_get_global(2, 0),
        Instruction::make_arith_imm(sable_vm::OpCode::SubImm, 3, 1, 1),
        Instruction::make_tail_call(2, 1, false),
        Instruction::make_load_imm(2, 42),
        Instruction::make_return(2, 1),
    ];
    proto.line_info = vec![1; 7];
    proto.column_info = vec![1; 7];

    push_chunk(&mut rt, proto);
    rt.set_global("g");

    rt.get_global("g");
    rt.push_integer(100_000);
    rt.call(1, 1).unwrap();
    assert_eq!(rt.to_integer(-1), Some(42));
}

#[test]
fn comparison_skips_jump_when_condition_fails() {
    // return (10 < 3) materialized through the LoadBool pair.
    let mut rt = Runtime::new();
    let mut proto = named_proto(&mut rt, "main");
    proto.max_stack_size = 4;
    proto.code = vec![
        Instruction::make_load_imm(2, 10),
        Instruction::make_load_imm(3, 3),
        Instruction::make_cmp(sable_vm::OpCode::Lt, 2, 3),
        Instruction::make_load_bool(1, true, true),
        Instruction::make_load_bool(1, false, false),
        Instruction::make_return(1, 1),
    ];
    proto.line_info = vec![1; 6];
    proto.column_info = vec![1; 6];

    push_chunk(&mut rt, proto);
    rt.call(0, 1).unwrap();
    assert!(!rt.to_boolean(-1));
}

#[test]
fn calling_nil_reports_a_type_error() {
    let mut rt = Runtime::new();
    rt.push_nil();
    let err = rt.call(0, 0).unwrap_err();
    assert_eq!(err.kind, sable_core::ErrorKind::Type);
    assert!(err.message.contains("attempt to call a nil value"));
}

#[test]
fn call_metamethod_makes_tables_callable() {
    // A table whose metatable defines __call(self, x) -> x + 1.
    fn callee(rt: &mut Runtime) -> sable_core::Result<usize> {
        // Argument 0 is the table itself, argument 1 the actual parameter.
        let x = rt.check_integer(1)?;
        rt.push_integer(x + 1);
        Ok(1)
    }

    let mut rt = Runtime::new();
    let table = rt.table_new(0, 0);
    rt.table_new(0, 1);
    rt.push_cfunction(callee);
    rt.table_rawsetfield(-2, "__call").unwrap();
    // Stack: [table, metatable]; install and drop down to the table.
    rt.metatable_set(-2).unwrap();
    assert!(matches!(rt.value_at(-1), Value::Table(t) if t == table));

    rt.push_integer(41);
    rt.call(1, 1).unwrap();
    assert_eq!(rt.to_integer(-1), Some(42));
}

#[test]
fn vararg_prep_shifts_frame_and_exposes_varargs() {
    // function f(a, ...) { return select-like copy of varargs }
    // Hand-coded: VarargPrep 1; Vararg r2; Return r2 MULTRET.
    let mut rt = Runtime::new();
    let mut proto = named_proto(&mut rt, "f");
    proto.num_params = 1;
    proto.is_vararg = true;
    proto.max_stack_size = 8;
    proto.code = vec![
        Instruction::make_vararg_prep(1),
        Instruction::make_vararg(2, 0),
        Instruction::make_return(2, sable_core::limits::MULTRET),
    ];
    proto.line_info = vec![1; 3];
    proto.column_info = vec![1; 3];

    push_chunk(&mut rt, proto);
    rt.push_integer(1); // fixed parameter
    rt.push_integer(10);
    rt.push_integer(20);
    rt.push_integer(30);
    rt.call(4, sable_core::limits::MULTRET).unwrap();
    assert_eq!(rt.get_top(), 3);
    assert_eq!(rt.to_integer(-3), Some(10));
    assert_eq!(rt.to_integer(-2), Some(20));
    assert_eq!(rt.to_integer(-1), Some(30));
}
