//! # Sable Core
//!
//! Shared foundation for the Sable language runtime. This crate holds the
//! pieces every other crate agrees on:
//!
//! - **Error taxonomy**: [`Error`] / [`ErrorKind`] with source locations and
//!   stack tracebacks, shared by the parser, the compiler and the VM.
//! - **Limits**: compile-time configuration of register counts, constant pool
//!   sizes and garbage collector tuning.
//! - **Userdata type tags**: [`make_uid`] hashes a host type name into the
//!   32-bit tag checked by `check_userdata`.

pub mod error;
pub mod limits;
pub mod uid;

pub use error::{Error, ErrorKind, Result, SourceLocation, TraceFrame};
pub use uid::make_uid;
