//! Base globals: printing, type inspection, coercions, metatables, raw table
//! access, iteration and protected calls.

use sable_core::limits::MULTRET;
use sable_core::{Error, Result};

use crate::metatable::MetaMethod;
use crate::runtime::Runtime;
use crate::value::Value;

pub(super) fn open(rt: &mut Runtime) {
    rt.register_function("print", print);
    rt.register_function("type", type_name);
    rt.register_function("tostring", tostring);
    rt.register_function("tonumber", tonumber);
    rt.register_function("setmetatable", setmetatable);
    rt.register_function("getmetatable", getmetatable);
    rt.register_function("rawget", rawget);
    rt.register_function("rawset", rawset);
    rt.register_function("rawlen", rawlen);
    rt.register_function("rawequal", rawequal);
    rt.register_function("next", next);
    rt.register_function("pairs", pairs);
    rt.register_function("ipairs", ipairs);
    rt.register_function("select", select);
    rt.register_function("assert", assert_fn);
    rt.register_function("error", error_fn);
    rt.register_function("pcall", pcall);
}

fn print(rt: &mut Runtime) -> Result<usize> {
    let count = rt.get_top();
    let mut pieces = Vec::with_capacity(count);
    for i in 0..count {
        let value = rt.value_at(i as i32);
        let text = rt.coerce_to_string(value)?;
        match text {
            Value::String(s) => pieces.push(rt.heap().string(s).view().to_string()),
            other => pieces.push(rt.display_value(other)),
        }
    }
    let line = format!("{}\n", pieces.join("\t"));
    rt.emit_output(&line);
    Ok(0)
}

fn type_name(rt: &mut Runtime) -> Result<usize> {
    let name = rt.value_at(0).type_name();
    rt.push_string(name);
    Ok(1)
}

fn tostring(rt: &mut Runtime) -> Result<usize> {
    let value = rt.value_at(0);
    let text = rt.coerce_to_string(value)?;
    rt.push_value(text);
    Ok(1)
}

fn tonumber(rt: &mut Runtime) -> Result<usize> {
    let value = rt.value_at(0);
    let number = rt.coerce_to_number(value);
    rt.push_value(number);
    Ok(1)
}

fn setmetatable(rt: &mut Runtime) -> Result<usize> {
    rt.check_table(0)?;
    match rt.value_at(1) {
        Value::Table(_) | Value::Nil => {}
        other => {
            return Err(Error::type_error_msg(format!(
                "bad argument #1 (expected table or nil, got {})",
                other.type_name()
            )))
        }
    }
    rt.dup(1);
    rt.metatable_set(0)?;
    rt.dup(0);
    Ok(1)
}

fn getmetatable(rt: &mut Runtime) -> Result<usize> {
    if !rt.metatable_get(0) {
        rt.push_nil();
    }
    Ok(1)
}

fn rawget(rt: &mut Runtime) -> Result<usize> {
    let table = rt.check_table(0)?;
    let key = rt.value_at(1);
    let value = rt.heap().table_rawget(table, key);
    rt.push_value(value);
    Ok(1)
}

fn rawset(rt: &mut Runtime) -> Result<usize> {
    let table = rt.check_table(0)?;
    let key = rt.value_at(1);
    let value = rt.value_at(2);
    rt.heap_mut().table_rawset(table, key, value);
    rt.dup(0);
    Ok(1)
}

fn rawlen(rt: &mut Runtime) -> Result<usize> {
    let length = match rt.value_at(0) {
        Value::Table(t) => rt.heap().table_length(t),
        Value::String(s) => rt.heap().string(s).len(),
        other => {
            return Err(Error::type_error_msg(format!(
                "bad argument #0 (expected table or string, got {})",
                other.type_name()
            )))
        }
    };
    rt.push_integer(length as i64);
    Ok(1)
}

fn rawequal(rt: &mut Runtime) -> Result<usize> {
    let equal = rt.heap().values_equal(rt.value_at(0), rt.value_at(1));
    rt.push_boolean(equal);
    Ok(1)
}

/// `next(t, key)` — the raw iteration step behind `pairs`.
fn next(rt: &mut Runtime) -> Result<usize> {
    let table = rt.check_table(0)?;
    let key = rt.value_at(1);
    match rt.heap().table_rawnext(table, key) {
        Some((next_key, next_value)) => {
            rt.push_value(next_key);
            rt.push_value(next_value);
            Ok(2)
        }
        None => {
            rt.push_nil();
            Ok(1)
        }
    }
}

/// `pairs(t)` — honors `__pairs`; otherwise returns `(next, t, nil)`.
fn pairs(rt: &mut Runtime) -> Result<usize> {
    let value = rt.value_at(0);
    let mm = rt.get_metamethod(value, MetaMethod::Pairs);
    if mm.is_callable() {
        rt.push_value(mm);
        rt.push_value(value);
        rt.call(1, 3)?;
        return Ok(3);
    }
    rt.check_table(0)?;
    rt.push_cfunction(next);
    rt.push_value(value);
    rt.push_nil();
    Ok(3)
}

fn ipairs_iter(rt: &mut Runtime) -> Result<usize> {
    let table = rt.check_table(0)?;
    let index = rt.check_integer(1)? + 1;
    let value = rt.heap().table_rawget(table, Value::Integer(index));
    if value.is_nil() {
        rt.push_nil();
        Ok(1)
    } else {
        rt.push_integer(index);
        rt.push_value(value);
        Ok(2)
    }
}

/// `ipairs(t)` — dense integer iteration from index 0.
fn ipairs(rt: &mut Runtime) -> Result<usize> {
    rt.check_table(0)?;
    let table = rt.value_at(0);
    rt.push_cfunction(ipairs_iter);
    rt.push_value(table);
    rt.push_integer(-1);
    Ok(3)
}

/// `select("#", ...)` or `select(n, ...)` over the trailing arguments.
fn select(rt: &mut Runtime) -> Result<usize> {
    let extra = rt.get_top().saturating_sub(1);
    if let Some("#") = rt.to_str(0) {
        rt.push_integer(extra as i64);
        return Ok(1);
    }
    let n = rt.check_integer(0)?;
    if n < 0 {
        return Err(Error::type_error_msg(
            "bad argument #0 (expected non-negative index)",
        ));
    }
    let from = (n as usize).min(extra);
    let values: Vec<Value> = (from..extra).map(|i| rt.value_at(i as i32 + 1)).collect();
    let count = values.len();
    for value in values {
        rt.push_value(value);
    }
    Ok(count)
}

fn assert_fn(rt: &mut Runtime) -> Result<usize> {
    if rt.value_at(0).is_truthy() {
        // Pass every argument through.
        return Ok(rt.get_top());
    }
    let message = match rt.to_str(1) {
        Some(text) => text.to_string(),
        None => "assertion failed!".to_string(),
    };
    Err(Error::runtime(message, rt.current_location()))
}

fn error_fn(rt: &mut Runtime) -> Result<usize> {
    let value = rt.value_at(0);
    let text = rt.coerce_to_string(value)?;
    let message = match text {
        Value::String(s) => rt.heap().string(s).view().to_string(),
        other => rt.display_value(other),
    };
    Err(Error::runtime(message, rt.current_location()))
}

/// `pcall(f, ...)` — protected call: `(true, results…)` on success,
/// `(false, message)` on failure.
fn pcall(rt: &mut Runtime) -> Result<usize> {
    let nargs = rt.get_top().saturating_sub(1);
    let func_pos = rt.stack.len() - nargs - 1;

    match rt.call(nargs, MULTRET) {
        Ok(()) => {
            let result_count = rt.stack.len() - func_pos;
            rt.stack.insert(func_pos, Value::Boolean(true));
            Ok(result_count + 1)
        }
        Err(err) => {
            // call() already restored both stacks.
            rt.push_boolean(false);
            rt.push_string(&err.to_string());
            Ok(2)
        }
    }
}
