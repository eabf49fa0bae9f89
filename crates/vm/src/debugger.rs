//! In-process breakpoint hooks.
//!
//! There is no debugger wire protocol; a host installs a [`Debugger`] with
//! breakpoints and a hook function, and the dispatch loop consults it before
//! each instruction while enabled. A runtime without a debugger pays a
//! single boolean test per instruction.

use hashbrown::HashSet;

use sable_core::SourceLocation;

use crate::runtime::Runtime;

/// What triggered the hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// Per-instruction step (only when step mode is on).
    Step(SourceLocation),
    /// A breakpoint matched the current source line.
    Breakpoint(SourceLocation),
}

/// Hook invoked from the dispatch loop. The hook may inspect the runtime
/// (stacks, globals) and block waiting for host commands.
pub type DebugHook = fn(&mut Runtime, &DebugEvent);

/// Breakpoint set and hook configuration.
pub struct Debugger {
    enabled: bool,
    step_mode: bool,
    breakpoints: HashSet<(String, u32)>,
    hook: Option<DebugHook>,
}

impl Debugger {
    pub fn new() -> Self {
        Self {
            enabled: true,
            step_mode: false,
            breakpoints: HashSet::new(),
            hook: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Turns per-instruction stepping on or off.
    pub fn set_step_mode(&mut self, step: bool) {
        self.step_mode = step;
    }

    pub fn step_mode(&self) -> bool {
        self.step_mode
    }

    /// Registers a breakpoint at a source/line pair.
    pub fn add_breakpoint(&mut self, source: impl Into<String>, line: u32) {
        self.breakpoints.insert((source.into(), line));
    }

    /// Removes a breakpoint; returns whether it existed.
    pub fn remove_breakpoint(&mut self, source: &str, line: u32) -> bool {
        self.breakpoints.remove(&(source.to_string(), line))
    }

    pub fn has_breakpoint(&self, source: &str, line: u32) -> bool {
        self.breakpoints.contains(&(source.to_string(), line))
    }

    pub fn breakpoint_count(&self) -> usize {
        self.breakpoints.len()
    }

    /// Installs the hook called on steps and breakpoint hits.
    pub fn set_hook(&mut self, hook: Option<DebugHook>) {
        self.hook = hook;
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Dispatch-loop entry: fires the hook for a matching breakpoint, or for
    /// every instruction in step mode.
    pub(crate) fn debug_poll(&mut self) {
        let location = self.current_location();
        let (hook, event) = match &self.debugger {
            Some(debugger) => {
                let hook = debugger.hook;
                if debugger.has_breakpoint(&location.source, location.line) {
                    (hook, Some(DebugEvent::Breakpoint(location)))
                } else if debugger.step_mode() {
                    (hook, Some(DebugEvent::Step(location)))
                } else {
                    (None, None)
                }
            }
            None => (None, None),
        };
        if let (Some(hook), Some(event)) = (hook, event) {
            hook(self, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breakpoints_are_set_and_cleared() {
        let mut debugger = Debugger::new();
        debugger.add_breakpoint("main.sbl", 10);
        assert!(debugger.has_breakpoint("main.sbl", 10));
        assert!(!debugger.has_breakpoint("main.sbl", 11));
        assert!(debugger.remove_breakpoint("main.sbl", 10));
        assert!(!debugger.remove_breakpoint("main.sbl", 10));
        assert_eq!(debugger.breakpoint_count(), 0);
    }
}
