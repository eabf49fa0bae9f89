//! The runtime instance.
//!
//! A [`Runtime`] owns everything a script touches: the heap, the value and
//! call stacks, the globals table, the module and metatable registries and
//! the host print handler. One runtime is single-threaded; hosts serialize
//! access and may run any number of independent instances.

use hashbrown::HashMap;

use sable_core::{Result, SourceLocation, TraceFrame};

use crate::debugger::Debugger;
use crate::frame::CallFrame;
use crate::heap::Heap;
use crate::metatable::MetaMethod;
use crate::value::Value;

/// Host callback receiving script output (from `print` and `debug.dump`).
pub type PrintHandler = fn(&mut Runtime, &str);

fn default_print_handler(_runtime: &mut Runtime, text: &str) {
    print!("{text}");
}

/// A complete, independent instance of the Sable VM.
pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) call_stack: Vec<CallFrame>,
    pub(crate) globals: Value,
    pub(crate) module_paths: Vec<String>,
    pub(crate) module_cache: HashMap<String, Value>,
    pub(crate) metatable_registry: HashMap<String, Value>,
    pub(crate) pinned: Vec<Value>,
    pub(crate) free_pinned: Vec<usize>,
    pub(crate) print_handler: PrintHandler,
    pub(crate) debugger: Option<Debugger>,
}

impl Runtime {
    /// Allocates a runtime: heap, stacks, a self-referencing globals table
    /// named `_G` and the default module search paths.
    pub fn new() -> Self {
        let mut runtime = Self {
            heap: Heap::new(),
            stack: Vec::with_capacity(128),
            call_stack: Vec::with_capacity(64),
            globals: Value::Nil,
            module_paths: Vec::new(),
            module_cache: HashMap::new(),
            metatable_registry: HashMap::new(),
            pinned: Vec::new(),
            free_pinned: Vec::new(),
            print_handler: default_print_handler,
            debugger: None,
        };

        runtime.heap.gc_pause();

        let globals = runtime.heap.new_table(1024, 1024);
        runtime.heap.table_mut(globals).assign_name("_G");
        runtime.globals = Value::Table(globals);
        let key = runtime.heap.new_string("_G");
        runtime
            .heap
            .table_rawset(globals, Value::String(key), Value::Table(globals));

        runtime.module_paths.push("./".to_string());
        runtime.module_paths.push("./modules/".to_string());
        runtime.module_paths.push("./lib/".to_string());

        runtime.heap.gc_resume();
        runtime
    }

    /// Tears the runtime down: a terminal pass destroys every remaining
    /// object without pooling.
    pub fn close(mut self) {
        self.heap.destroy_all();
        self.stack.clear();
        self.call_stack.clear();
    }

    /// Read access to the heap, for hosts and tests.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable access to the heap.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// The globals table value.
    pub fn globals(&self) -> Value {
        self.globals
    }

    /// Number of active call frames (host frames included). Tail calls reuse
    /// frames, so tail-recursive scripts keep this flat.
    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    /// Installs (or, with `None`, resets) the print handler.
    pub fn set_print_handler(&mut self, handler: Option<PrintHandler>) {
        self.print_handler = handler.unwrap_or(default_print_handler);
    }

    /// Writes text through the print handler.
    pub fn emit_output(&mut self, text: &str) {
        let handler = self.print_handler;
        handler(self, text);
    }

    /// Attaches a debugger; `None` detaches.
    pub fn set_debugger(&mut self, debugger: Option<Debugger>) {
        self.debugger = debugger;
    }

    /// Anchors a value against collection; returns a pin slot for
    /// [`unpin`](Self::unpin).
    pub fn pin(&mut self, value: Value) -> usize {
        if let Some(slot) = self.free_pinned.pop() {
            self.pinned[slot] = value;
            slot
        } else {
            self.pinned.push(value);
            self.pinned.len() - 1
        }
    }

    /// Releases a pin slot.
    pub fn unpin(&mut self, slot: usize) {
        if slot < self.pinned.len() {
            self.pinned[slot] = Value::Nil;
            self.free_pinned.push(slot);
        }
    }

    // ----- diagnostics -----

    /// Source location of the instruction the innermost script frame is
    /// executing.
    pub fn current_location(&self) -> SourceLocation {
        for frame in self.call_stack.iter().rev() {
            let Some(proto_ref) = frame.proto else {
                continue;
            };
            let proto = self.heap.proto(proto_ref);
            let pc = frame.pc.saturating_sub(1);
            let (line, column) = proto.position_at(pc);
            let source = proto
                .source_name
                .map(|s| self.heap.string(s).view().to_string())
                .unwrap_or_else(|| "?".to_string());
            return SourceLocation::new(source, line, column);
        }
        SourceLocation::default()
    }

    /// Traceback frames for every call frame above `from_depth`, innermost
    /// first.
    pub(crate) fn capture_traceback(&self, from_depth: usize) -> Vec<TraceFrame> {
        let mut frames = Vec::new();
        for frame in self.call_stack[from_depth..].iter().rev() {
            match frame.proto {
                Some(proto_ref) => {
                    let proto = self.heap.proto(proto_ref);
                    let pc = frame.pc.saturating_sub(1);
                    let (line, _) = proto.position_at(pc);
                    let source = proto
                        .source_name
                        .map(|s| self.heap.string(s).view().to_string())
                        .unwrap_or_else(|| "?".to_string());
                    let function = proto
                        .name
                        .map(|s| self.heap.string(s).view().to_string())
                        .unwrap_or_else(|| "?".to_string());
                    frames.push(TraceFrame {
                        source,
                        line,
                        function,
                    });
                }
                None => frames.push(TraceFrame {
                    source: "[host]".to_string(),
                    line: 0,
                    function: "?".to_string(),
                }),
            }
        }
        frames
    }

    /// Renders the current call stack as text (used by `debug.traceback`).
    pub fn traceback_string(&self) -> String {
        let mut out = String::from("stack traceback:");
        for frame in self.capture_traceback(0) {
            out.push('\n');
            out.push_str(&format!("\t{frame}"));
        }
        out
    }

    // ----- coercion helpers -----

    /// Plain textual rendering, without metamethod dispatch.
    pub fn display_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Number(f) => format_float(f),
            Value::String(r) => self.heap.string(r).view().to_string(),
            Value::Table(r) => format!("table: 0x{:08x}", r.index()),
            Value::Closure(r) => format!("function: 0x{:08x}", r.index()),
            Value::CFunction(f) => format!("function: builtin 0x{:08x}", f as usize),
            Value::Userdata(r) => format!("userdata: 0x{:08x}", r.index()),
            Value::NullOpt => "nullopt".to_string(),
        }
    }

    /// `tostring` semantics: consults `__tostring`, otherwise renders the
    /// default form. Always produces a string value.
    pub fn coerce_to_string(&mut self, value: Value) -> Result<Value> {
        let mm = self.get_metamethod(value, MetaMethod::ToString);
        if mm.is_callable() {
            let result = self.call_metamethod(mm, &[value])?;
            if result.is_string() {
                return Ok(result);
            }
            let text = self.display_value(result);
            let s = self.heap.new_string(&text);
            return Ok(Value::String(s));
        }
        if value.is_string() {
            return Ok(value);
        }
        let text = self.display_value(value);
        let s = self.heap.new_string(&text);
        Ok(Value::String(s))
    }

    /// `tonumber` semantics: numbers pass through, strings parse as decimal
    /// or `0x` hex; anything else yields nil.
    pub fn coerce_to_number(&self, value: Value) -> Value {
        match value {
            Value::Integer(_) | Value::Number(_) => value,
            Value::String(r) => match parse_number(self.heap.string(r).view()) {
                Some(parsed) => parsed,
                None => Value::Nil,
            },
            _ => Value::Nil,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a float the way script code expects: integer-valued floats keep a
/// trailing `.0` so they stay distinguishable from integers.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Parses script numeric syntax: decimal integers, `0x` hex integers and
/// decimal floats. Leading/trailing whitespace is tolerated.
pub(crate) fn parse_number(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        let value = i64::from_str_radix(hex, 16).ok()?;
        return Some(Value::Integer(if negative { -value } else { value }));
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Some(Value::Integer(int));
    }
    trimmed.parse::<f64>().ok().map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_runtime_has_self_referencing_globals() {
        let rt = Runtime::new();
        let globals = match rt.globals() {
            Value::Table(r) => r,
            other => panic!("globals is {other:?}"),
        };
        let g = rt.heap.table_get_str(globals, "_G");
        assert!(matches!(g, Value::Table(r) if r == globals));
        assert_eq!(rt.module_paths.len(), 3);
    }

    #[test]
    fn parse_number_handles_int_hex_and_float() {
        assert!(matches!(parse_number("42"), Some(Value::Integer(42))));
        assert!(matches!(parse_number("-42"), Some(Value::Integer(-42))));
        assert!(matches!(parse_number("0x1F"), Some(Value::Integer(31))));
        assert!(matches!(parse_number(" 2.5 "), Some(Value::Number(f)) if f == 2.5));
        assert!(parse_number("zebra").is_none());
        assert!(parse_number("").is_none());
    }

    #[test]
    fn float_display_keeps_decimal_point() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(2.5), "2.5");
    }

    #[test]
    fn pin_slots_are_reused() {
        let mut rt = Runtime::new();
        let a = rt.pin(Value::Integer(1));
        rt.unpin(a);
        let b = rt.pin(Value::Integer(2));
        assert_eq!(a, b);
    }
}
