//! The `debug` module: traceback text and bytecode dumps.

use sable_core::Result;

use crate::dump::dump_proto;
use crate::runtime::Runtime;
use crate::value::Value;

pub(super) fn open(rt: &mut Runtime) {
    rt.create_module(
        "debug",
        &[("traceback", traceback), ("dump", dump)],
        true,
    );
}

fn traceback(rt: &mut Runtime) -> Result<usize> {
    let text = rt.traceback_string();
    rt.push_string(&text);
    Ok(1)
}

/// Disassembles a closure through the print handler.
fn dump(rt: &mut Runtime) -> Result<usize> {
    let value = rt.check_function(0)?;
    match value {
        Value::Closure(closure) => {
            let proto = rt.heap().closure(closure).proto;
            let text = dump_proto(rt.heap(), proto, 0);
            rt.emit_output(&text);
        }
        _ => rt.emit_output("<builtin function>\n"),
    }
    Ok(0)
}
