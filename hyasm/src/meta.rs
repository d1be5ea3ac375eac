//! Routine-level metadata attached to every instruction container.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

use crate::flags::CompilerFlags;

/// Name given to top-level code.
pub const MODULE_NAME: &str = "<module>";

/// File name used when the source file is unknown.
pub const UNKNOWN_FILENAME: &str = "<string>";

/// Docstring of a routine.
///
/// `Unset` (never specified) and `None` (explicitly no docstring) are distinct
/// so that both survive a round-trip through the encoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Docstring {
    #[default]
    Unset,
    None,
    Text(String),
}

impl Docstring {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Docstring::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<&str> for Docstring {
    fn from(text: &str) -> Self {
        Docstring::Text(text.to_string())
    }
}

impl From<Option<String>> for Docstring {
    fn from(text: Option<String>) -> Self {
        match text {
            Some(text) => Docstring::Text(text),
            None => Docstring::None,
        }
    }
}

/// Signature, naming and compiler flags of the routine an instruction stream
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CodeMeta {
    pub argcount: u32,
    pub posonlyargcount: u32,
    pub kwonlyargcount: u32,
    pub first_lineno: u32,
    pub name: String,
    pub filename: String,
    pub docstring: Docstring,
    pub cellvars: Vec<String>,
    /// Order matters and cannot be recovered from the instructions: closures
    /// may capture variables they never load directly.
    pub freevars: Vec<String>,
    pub flags: CompilerFlags,
}

impl Default for CodeMeta {
    fn default() -> Self {
        Self {
            argcount: 0,
            posonlyargcount: 0,
            kwonlyargcount: 0,
            first_lineno: 1,
            name: MODULE_NAME.to_string(),
            filename: UNKNOWN_FILENAME.to_string(),
            docstring: Docstring::Unset,
            cellvars: Vec::new(),
            freevars: Vec::new(),
            flags: CompilerFlags::empty(),
        }
    }
}

impl CodeMeta {
    /// Metadata of a function named `name`.
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: CompilerFlags::NEWLOCALS,
            ..Default::default()
        }
    }

    /// Total number of declared parameters, including `*args` and `**kwargs`.
    pub fn total_args(&self) -> u32 {
        let mut total = self.argcount + self.kwonlyargcount;
        if self.flags.contains(CompilerFlags::VARARGS) {
            total += 1;
        }
        if self.flags.contains(CompilerFlags::VARKEYWORDS) {
            total += 1;
        }
        total
    }

    /// Set raw flag bits, keeping bits this crate does not know about.
    pub fn set_flag_bits(&mut self, bits: u32) {
        self.flags = CompilerFlags::from_bits_retain(bits);
    }
}
