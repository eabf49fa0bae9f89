//! Call frames.

use crate::object::GcRef;

/// Record of one active function invocation.
///
/// Registers of the frame live at `stack[base..base + max_stack_size]`, with
/// `stack[base]` holding the callee closure itself (register 0). `call_pos`
/// remembers where the callee was placed by the caller — results are copied
/// there on return, and it stays put even when `VarargPrep` shifts `base`
/// above the varargs.
#[derive(Debug, Clone, Copy)]
pub struct CallFrame {
    /// The executing function's prototype; `None` for host-function frames.
    pub proto: Option<GcRef>,
    /// Index of the next instruction to execute.
    pub pc: usize,
    /// Stack index of register 0 (the closure).
    pub base: usize,
    /// One past the last live register.
    pub top: usize,
    /// Stack index the callee was called at; return values land here.
    pub call_pos: usize,
    /// Result count the caller expects (`MULTRET` for "all of them").
    pub expected_results: u8,
    /// Number of variadic arguments parked below `base` by `VarargPrep`.
    pub num_varargs: usize,
}

impl CallFrame {
    /// Frame for a script function called at `call_pos` with `num_args`
    /// arguments already on the stack.
    pub fn script(proto: GcRef, call_pos: usize, num_args: usize, expected_results: u8) -> Self {
        Self {
            proto: Some(proto),
            pc: 0,
            base: call_pos,
            top: call_pos + 1 + num_args,
            call_pos,
            expected_results,
            num_varargs: 0,
        }
    }

    /// Frame for a host function; exists so stack indices in the host API
    /// resolve relative to the call.
    pub fn host(call_pos: usize, top: usize) -> Self {
        Self {
            proto: None,
            pc: 0,
            base: call_pos,
            top,
            call_pos,
            expected_results: 0,
            num_varargs: 0,
        }
    }

    /// True for host-function frames.
    pub fn is_host(&self) -> bool {
        self.proto.is_none()
    }
}
