//! End-to-end scenarios: source text in, observed behavior out.
//!
//! Each test loads a source chunk through the full pipeline (lexer, parser,
//! compiler, VM) and inspects results through the host stack API.

use sable_compiler::load_string;
use sable_core::make_uid;
use sable_vm::{Runtime, Value};

fn runtime() -> Runtime {
    let mut rt = Runtime::new();
    rt.open_libs();
    rt
}

fn eval(rt: &mut Runtime, source: &str) {
    load_string(rt, source).unwrap();
    rt.call(0, 1).unwrap();
}

#[test]
fn recursive_fibonacci() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "function f(n) { if (n<2) { return n } return f(n-1)+f(n-2) } return f(10)",
    );
    assert_eq!(rt.to_integer(-1), Some(55));
}

#[test]
fn tail_calls_do_not_grow_the_call_stack() {
    let mut rt = runtime();

    // A host probe that observes the call-stack depth from inside the
    // deepest tail call.
    fn probe(rt: &mut Runtime) -> sable_core::Result<usize> {
        let depth = rt.call_depth();
        rt.push_integer(depth as i64);
        Ok(1)
    }
    rt.register_function("depth", probe);

    eval(
        &mut rt,
        "function g(n) { if (n<=0) { return 42 } return g(n-1) } return g(100000)",
    );
    assert_eq!(rt.to_integer(-1), Some(42));
    rt.pop(1);

    eval(
        &mut rt,
        "function h(n) { if (n<=0) { return depth() } return h(n-1) } return h(50000)",
    );
    // The reused frame keeps the depth flat: entry chunk + one script frame
    // + the probe's host frame.
    let depth = rt.to_integer(-1).unwrap();
    assert!(depth <= 3, "peak call depth was {depth}");
}

#[test]
fn closure_upvalue_shares_mutable_state() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "function mk() { let x = 10; return function() { x = x + 1; return x } }
         let f = mk(); f(); f(); return f()",
    );
    assert_eq!(rt.to_integer(-1), Some(13));
}

#[test]
fn metamethod_add_dispatches() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "let a={v=3}; let b={v=4};
         let mt={__add=function(x,y){return {v=x.v+y.v}}};
         setmetatable(a,mt); setmetatable(b,mt);
         return (a+b).v",
    );
    assert_eq!(rt.to_integer(-1), Some(7));
}

#[test]
fn incremental_gc_preserves_live_data() {
    let mut rt = runtime();

    // Baseline object load of an idle runtime with open libraries.
    eval(&mut rt, "gc.collect(); return gc.countall()");
    let baseline = rt.to_integer(-1).unwrap();
    rt.pop(1);

    eval(
        &mut rt,
        "let keeper = { data = \"important\" };
         for (let i=0; i<100; i++) { let tmp = {i,i*2} };
         gc.collect();
         return keeper.data",
    );
    assert_eq!(rt.to_str(-1), Some("important"));
    rt.pop(1);

    // The hundred temporaries must not leak: after dropping the keeper
    // chunk's results and collecting, the object count returns near the
    // baseline (the keeper itself and its strings are gone too once
    // unreachable).
    rt.gc_collect();
    eval(&mut rt, "gc.collect(); return gc.countall()");
    let after = rt.to_integer(-1).unwrap();
    assert!(
        after <= baseline + 4,
        "object count leaked: baseline {baseline}, after {after}"
    );
}

#[test]
fn userdata_type_tags_are_enforced() {
    const UID_A: u32 = make_uid("TypeA");
    const UID_B: u32 = make_uid("TypeB");

    fn make_a(rt: &mut Runtime) -> sable_core::Result<usize> {
        rt.userdata_new(8, UID_A);
        Ok(1)
    }
    fn check_b(rt: &mut Runtime) -> sable_core::Result<usize> {
        rt.check_userdata(0, UID_B)?;
        rt.push_boolean(true);
        Ok(1)
    }
    fn check_a(rt: &mut Runtime) -> sable_core::Result<usize> {
        rt.check_userdata(0, UID_A)?;
        rt.push_boolean(true);
        Ok(1)
    }

    let mut rt = runtime();
    rt.register_function("make_a", make_a);
    rt.register_function("check_a", check_a);
    rt.register_function("check_b", check_b);

    // Checking the right tag succeeds.
    eval(&mut rt, "return check_a(make_a())");
    assert!(rt.to_boolean(-1));
    rt.pop(1);

    // Checking the wrong tag raises a runtime error, observable via pcall.
    eval(
        &mut rt,
        "let ok, err = pcall(check_b, make_a()); return ok == false && err",
    );
    let message = rt.to_str(-1).unwrap();
    assert!(message.contains("type mismatch"), "message: {message}");
}

#[test]
fn pcall_catches_script_errors() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "let ok, err = pcall(function() { error(\"boom\") }); return ok == false && err",
    );
    assert!(rt.to_str(-1).unwrap().contains("boom"));
}

#[test]
fn error_messages_carry_source_locations() {
    let mut rt = runtime();
    load_string(&mut rt, "let x = 1\nreturn x + {}").unwrap();
    let err = rt.call(0, 1).unwrap_err();
    assert_eq!(err.kind, sable_core::ErrorKind::Type);
    let location = err.location.unwrap();
    assert_eq!(location.line, 2);
    assert!(!err.traceback.is_empty());
}

#[test]
fn tostring_consults_the_metamethod() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "let t = setmetatable({}, { __tostring = function(self) { return \"custom!\" } })
         return tostring(t)",
    );
    assert_eq!(rt.to_str(-1), Some("custom!"));
}

#[test]
fn string_coercion_in_arithmetic() {
    let mut rt = runtime();
    eval(&mut rt, "return \"10\" + 5");
    assert_eq!(rt.to_integer(-1), Some(15));
}

#[test]
fn integer_float_equality_and_hashing_agree() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "let t = {}
         t[2] = \"int\"
         let before = t[2.0]
         t[2.0] = \"float\"
         return before == \"int\" && t[2] == \"float\"",
    );
    assert!(rt.to_boolean(-1));
}

#[test]
fn division_yields_floats_and_integer_ops_stay_integer() {
    let mut rt = runtime();
    eval(&mut rt, "return 7 / 2");
    assert_eq!(rt.to_number(-1), Some(3.5));
    rt.pop(1);
    eval(&mut rt, "return 7 % 3 + 2 ** 3");
    // 1 + 8.0 promotes to float.
    assert_eq!(rt.to_number(-1), Some(9.0));
}

#[test]
fn print_goes_through_the_host_handler() {
    use std::sync::Mutex;
    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(_rt: &mut Runtime, text: &str) {
        CAPTURED.lock().unwrap().push_str(text);
    }

    let mut rt = runtime();
    rt.set_print_handler(Some(capture));
    eval(&mut rt, "print(\"hello\", 42) return 0");
    assert_eq!(CAPTURED.lock().unwrap().as_str(), "hello\t42\n");
}

#[test]
fn gc_module_reports_phase_names() {
    let mut rt = runtime();
    eval(&mut rt, "return gc.phase()");
    let phase = rt.to_str(-1).unwrap();
    assert!(matches!(phase, "idle" | "mark" | "sweep" | "finalize"));
}

#[test]
fn debug_traceback_is_available_to_scripts() {
    let mut rt = runtime();
    eval(
        &mut rt,
        "function inner() { return debug.traceback() } return inner()",
    );
    let text = rt.to_str(-1).unwrap();
    assert!(text.contains("stack traceback"));
}

#[test]
fn finalizers_run_via_script_collect() {
    const UID: u32 = make_uid("Tracked");

    fn make_tracked(rt: &mut Runtime) -> sable_core::Result<usize> {
        rt.userdata_new(4, UID);
        Ok(1)
    }

    /// Installs a metatable on a userdata value (the script-level
    /// `setmetatable` is table-only).
    fn setmetatable_userdata(rt: &mut Runtime) -> sable_core::Result<usize> {
        match rt.value_at(0) {
            Value::Userdata(_) => {}
            other => {
                return Err(sable_core::Error::type_error_msg(format!(
                    "bad argument #0 (expected userdata, got {})",
                    other.type_name()
                )))
            }
        }
        rt.dup(1);
        rt.metatable_set(0)?;
        rt.dup(0);
        Ok(1)
    }

    let mut rt = runtime();
    rt.register_function("make_tracked", make_tracked);
    rt.register_function("setmetatable_userdata", setmetatable_userdata);
    // The userdata is created inside a function so its registers leave the
    // stack when the frame returns; only then is it collectable.
    eval(
        &mut rt,
        "finalized = 0
         function makeit() {
             let mt = { __gc = function(u) { finalized = finalized + 1 } }
             let u = setmetatable_userdata(make_tracked(), mt)
             return 0
         }
         makeit()
         gc.collect()
         gc.collect()
         return finalized",
    );
    assert_eq!(rt.to_integer(-1), Some(1));
}
