//! The `gc` module: collector control and introspection for scripts.

use sable_core::Result;

use crate::runtime::Runtime;

pub(super) fn open(rt: &mut Runtime) {
    rt.create_module(
        "gc",
        &[
            ("collect", collect),
            ("step", step),
            ("count", count),
            ("countall", countall),
            ("countfree", countfree),
            ("threshold", threshold),
            ("setthreshold", setthreshold),
            ("phase", phase),
        ],
        true,
    );
}

fn collect(rt: &mut Runtime) -> Result<usize> {
    rt.gc_collect();
    Ok(0)
}

fn step(rt: &mut Runtime) -> Result<usize> {
    rt.gc_step();
    Ok(0)
}

fn count(rt: &mut Runtime) -> Result<usize> {
    let n = rt.heap().object_count();
    rt.push_integer(n as i64);
    Ok(1)
}

fn countall(rt: &mut Runtime) -> Result<usize> {
    let n = rt.heap().object_count();
    rt.push_integer(n as i64);
    Ok(1)
}

fn countfree(rt: &mut Runtime) -> Result<usize> {
    let n = rt.heap().pooled_count();
    rt.push_integer(n as i64);
    Ok(1)
}

fn threshold(rt: &mut Runtime) -> Result<usize> {
    let t = rt.heap().threshold();
    rt.push_integer(t as i64);
    Ok(1)
}

fn setthreshold(rt: &mut Runtime) -> Result<usize> {
    let t = rt.check_integer(0)?;
    if t > 0 {
        rt.heap_mut().set_threshold(t as usize);
    }
    Ok(0)
}

fn phase(rt: &mut Runtime) -> Result<usize> {
    let name = rt.heap().gc_phase().as_str();
    rt.push_string(name);
    Ok(1)
}
