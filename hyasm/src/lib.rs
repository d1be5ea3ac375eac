//! Symbolic instruction containers for a stack-based virtual machine.
//!
//! A program is built as an ordered stream of [`entry::Entry`] values (real
//! instructions, labels, line markers and exception-region markers) held by a
//! [`bytecode::Bytecode`] together with the metadata of its routine. The
//! container checks the structure of the stream on every traversal, collapses
//! line markers into per-instruction lines ([`bytecode::Bytecode::legalize`])
//! and compares streams by resolving labels into offsets
//! ([`flatten::flatten`]).
//!
//! Stack-depth analysis and the final encoding are provided by other engines
//! through the traits of [`backend`].
pub mod backend;
pub mod bytecode;
pub mod entry;
pub mod flags;
pub mod flatten;
pub mod fmt;
pub mod instr;
pub mod label;
pub mod meta;
pub mod utils;
pub mod validate;

pub use bytecode::Bytecode;
pub use entry::{Entry, EntryKind, SetLineno, TryBegin, TryEnd};
pub use flags::CompilerFlags;
pub use instr::{Instr, InstrArg, InstrLocation, Lineno};
pub use label::{Label, RegionId};
pub use meta::{CodeMeta, Docstring};
pub use utils::{Error, Result};
