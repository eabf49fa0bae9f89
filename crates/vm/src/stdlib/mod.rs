//! Standard library modules.
//!
//! `open_libs` installs the base globals plus the `gc` and `debug` modules.
//! Everything here is a plain [`CFunction`](crate::value::CFunction) going
//! through the public host API, the same way embedder-supplied functions do.

mod base;
mod debug;
mod gc;

use crate::runtime::Runtime;

impl Runtime {
    /// Installs the base globals and the `gc` and `debug` modules.
    pub fn open_libs(&mut self) {
        base::open(self);
        gc::open(self);
        debug::open(self);
    }
}
