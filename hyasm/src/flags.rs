use std::collections::BTreeSet;

use bitflags::bitflags;
use log::trace;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    bytecode::Bytecode,
    utils::{Error, Result},
};

bitflags! {
    /// Compiler-level properties of a routine.
    ///
    /// Bit values follow the `co_flags` layout of the target virtual machine so
    /// that they can be handed to the encoder untouched. Unknown bits are kept.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
    pub struct CompilerFlags: u32 {
        /// Locals are stored in fast slots (no `*_NAME` opcodes).
        const OPTIMIZED = 0x0001;
        /// A new local namespace is created on call.
        const NEWLOCALS = 0x0002;
        /// The routine accepts `*args`.
        const VARARGS = 0x0004;
        /// The routine accepts `**kwargs`.
        const VARKEYWORDS = 0x0008;
        /// The routine is nested in another routine.
        const NESTED = 0x0010;
        const GENERATOR = 0x0020;
        /// No free or cell variables are used.
        const NOFREE = 0x0040;
        const COROUTINE = 0x0080;
        /// Generator-based coroutine usable in `await` expressions.
        const ITERABLE_COROUTINE = 0x0100;
        const ASYNC_GENERATOR = 0x0200;
        const FUTURE_GENERATOR_STOP = 0x0008_0000;

        const _ = !0;
    }
}

const NAME_OPS: &[&str] = &["STORE_NAME", "LOAD_NAME", "DELETE_NAME"];

const FREE_OPS: &[&str] = &[
    "LOAD_CLOSURE",
    "LOAD_DEREF",
    "STORE_DEREF",
    "DELETE_DEREF",
    "LOAD_CLASSDEREF",
    "MAKE_CELL",
    "COPY_FREE_VARS",
];

const SURE_GENERATOR_OPS: &[&str] = &["YIELD_VALUE"];

const MAYBE_GENERATOR_OPS: &[&str] = &["YIELD_VALUE", "YIELD_FROM", "RETURN_GENERATOR"];

const SURE_ASYNC_OPS: &[&str] = &[
    "GET_AWAITABLE",
    "GET_AITER",
    "GET_ANEXT",
    "BEFORE_ASYNC_WITH",
    "SETUP_ASYNC_WITH",
    "END_ASYNC_FOR",
    "ASYNC_GEN_WRAP",
];

/// Infer the compiler flags of `code` from its instructions.
///
/// `is_async` forces the routine to be (`Some(true)`) or not to be
/// (`Some(false)`) asynchronous; `None` infers it from the instructions and the
/// flags currently set.
pub fn infer_flags(code: &Bytecode, is_async: Option<bool>) -> Result<CompilerFlags> {
    let mut names = BTreeSet::new();
    for entry in code.iter() {
        if let Some(instr) = entry?.as_instr() {
            names.insert(instr.name.as_str());
        }
    }
    let uses_any = |ops: &[&str]| ops.iter().any(|op| names.contains(op));

    let current = code.meta.flags;
    let mut flags = CompilerFlags::empty();

    if !uses_any(NAME_OPS) {
        flags |= CompilerFlags::OPTIMIZED;
    }
    if !uses_any(FREE_OPS) {
        flags |= CompilerFlags::NOFREE;
    }

    // Those cannot be recovered from the instructions.
    flags |= current
        & (CompilerFlags::NEWLOCALS
            | CompilerFlags::VARARGS
            | CompilerFlags::VARKEYWORDS
            | CompilerFlags::NESTED);

    let sure_generator = uses_any(SURE_GENERATOR_OPS);
    let maybe_generator = uses_any(MAYBE_GENERATOR_OPS);
    let sure_async = uses_any(SURE_ASYNC_OPS);

    let async_kind = if sure_generator {
        CompilerFlags::ASYNC_GENERATOR
    } else {
        CompilerFlags::COROUTINE
    };

    if is_async != Some(false) {
        // Existing flags are the only way to recognize iterable coroutines.
        if current.contains(CompilerFlags::COROUTINE) {
            flags |= async_kind;
        } else if current.contains(CompilerFlags::ITERABLE_COROUTINE) {
            if sure_async {
                return Err(Error::FlagInference(
                    "the ITERABLE_COROUTINE flag is set but instructions only valid in async routines were found; unset the flag before inferring".to_string(),
                ));
            }
            flags |= CompilerFlags::ITERABLE_COROUTINE;
        } else if current.contains(CompilerFlags::ASYNC_GENERATOR) {
            flags |= async_kind;
        } else if sure_async {
            flags |= async_kind;
        } else if maybe_generator {
            if is_async == Some(true) {
                flags |= async_kind;
            } else {
                flags |= CompilerFlags::GENERATOR;
            }
        } else if is_async == Some(true) {
            flags |= CompilerFlags::COROUTINE;
        }
    } else {
        if sure_async {
            return Err(Error::FlagInference(
                "the routine is declared synchronous but instructions only valid in async routines were found".to_string(),
            ));
        }
        if maybe_generator {
            flags |= CompilerFlags::GENERATOR;
        }
    }

    flags |= current & CompilerFlags::FUTURE_GENERATOR_STOP;

    trace!(
        "Inferred flags {:?} for `{}` (previously {:?})",
        flags,
        code.meta.name,
        current
    );
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{entry::Entry, instr::Instr};

    fn build(ops: &[&str], flags: CompilerFlags) -> Bytecode {
        let mut code = Bytecode::from_entries(
            ops.iter().map(|op| Entry::from(Instr::bare(*op))),
        )
        .unwrap();
        code.meta.flags = flags;
        code
    }

    #[test]
    fn plain_function() {
        let code = build(&["LOAD_FAST", "RETURN_VALUE"], CompilerFlags::NEWLOCALS);
        assert_eq!(
            infer_flags(&code, None).unwrap(),
            CompilerFlags::OPTIMIZED | CompilerFlags::NOFREE | CompilerFlags::NEWLOCALS
        );
    }

    #[test]
    fn module_code_is_not_optimized() {
        let code = build(&["LOAD_NAME", "LOAD_DEREF"], CompilerFlags::empty());
        assert_eq!(infer_flags(&code, None).unwrap(), CompilerFlags::empty());
    }

    #[test]
    fn generators() {
        let code = build(&["YIELD_VALUE"], CompilerFlags::empty());
        let flags = infer_flags(&code, None).unwrap();
        assert!(flags.contains(CompilerFlags::GENERATOR));

        let flags = infer_flags(&code, Some(true)).unwrap();
        assert!(flags.contains(CompilerFlags::ASYNC_GENERATOR));
        assert!(!flags.contains(CompilerFlags::GENERATOR));
    }

    #[test]
    fn async_detection() {
        let code = build(&["GET_AWAITABLE"], CompilerFlags::empty());
        assert!(infer_flags(&code, None).unwrap().contains(CompilerFlags::COROUTINE));
        assert!(infer_flags(&code, Some(false)).unwrap_err().is_flag_inference());

        let forced = build(&["NOP"], CompilerFlags::empty());
        assert!(infer_flags(&forced, Some(true)).unwrap().contains(CompilerFlags::COROUTINE));
    }

    #[test]
    fn iterable_coroutine_conflicts_with_async_ops() {
        let code = build(&["GET_AITER"], CompilerFlags::ITERABLE_COROUTINE);
        assert!(infer_flags(&code, None).is_err());

        let code = build(&["YIELD_FROM"], CompilerFlags::ITERABLE_COROUTINE);
        assert!(
            infer_flags(&code, None)
                .unwrap()
                .contains(CompilerFlags::ITERABLE_COROUTINE)
        );
    }

    #[test]
    fn future_flags_are_preserved() {
        let code = build(&["NOP"], CompilerFlags::FUTURE_GENERATOR_STOP | CompilerFlags::VARARGS);
        let flags = infer_flags(&code, None).unwrap();
        assert!(flags.contains(CompilerFlags::FUTURE_GENERATOR_STOP));
        assert!(flags.contains(CompilerFlags::VARARGS));
    }
}
