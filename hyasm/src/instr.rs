//! Symbolic instructions.
//!
//! An [`Instr`] is an operation name plus an optional argument. Jump
//! instructions carry an [`InstrArg::Label`] instead of a numeric offset; the
//! offset is only resolved when the stream is linearized.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use strum::{EnumIs, EnumTryAs};

use crate::{label::Label, utils::is_identifier};

/// Argument of an instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, EnumIs, EnumTryAs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InstrArg {
    /// The instruction takes no argument.
    #[default]
    None,
    /// Integer immediate (also used for resolved jump offsets).
    Int(i64),
    /// Jump target, resolved to an offset on linearization.
    Label(Label),
    /// Opaque payload (variable name, constant key, ...).
    Name(String),
}

impl From<Label> for InstrArg {
    fn from(label: Label) -> Self {
        InstrArg::Label(label)
    }
}

impl From<i64> for InstrArg {
    fn from(value: i64) -> Self {
        InstrArg::Int(value)
    }
}

impl From<&str> for InstrArg {
    fn from(value: &str) -> Self {
        InstrArg::Name(value.to_string())
    }
}

impl From<String> for InstrArg {
    fn from(value: String) -> Self {
        InstrArg::Name(value)
    }
}

/// Line attribution of an instruction.
///
/// `Unset` means no line was given yet and legalization will fill one in.
/// `Absent` means the instruction deliberately has no line (synthetic code).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumIs)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Lineno {
    #[default]
    Unset,
    Absent,
    Line(u32),
}

impl Lineno {
    pub fn line(self) -> Option<u32> {
        match self {
            Lineno::Line(line) => Some(line),
            _ => None,
        }
    }
}

impl From<u32> for Lineno {
    fn from(line: u32) -> Self {
        Lineno::Line(line)
    }
}

/// Source span of an instruction. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InstrLocation {
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub end_lineno: Option<u32>,
    pub col_offset: Option<u32>,
    pub end_col_offset: Option<u32>,
}

impl InstrLocation {
    /// Location spanning a single source line.
    pub fn line(lineno: u32) -> Self {
        Self {
            lineno: Some(lineno),
            end_lineno: Some(lineno),
            ..Default::default()
        }
    }

    /// Check that the span is not reversed.
    pub fn check(&self) -> Result<(), String> {
        if let (Some(start), Some(end)) = (self.lineno, self.end_lineno) {
            if end < start {
                return Err(format!(
                    "location ends on line {end} before it starts on line {start}"
                ));
            }
            if start == end {
                if let (Some(col), Some(end_col)) = (self.col_offset, self.end_col_offset) {
                    if end_col < col {
                        return Err(format!(
                            "location ends at column {end_col} before it starts at column {col}"
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A symbolic instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instr {
    pub name: String,
    pub arg: InstrArg,
    pub lineno: Lineno,
    pub location: Option<InstrLocation>,
}

impl Instr {
    pub fn new(name: impl Into<String>, arg: impl Into<InstrArg>) -> Self {
        Self {
            name: name.into(),
            arg: arg.into(),
            lineno: Lineno::Unset,
            location: None,
        }
    }

    /// Instruction without argument.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, InstrArg::None)
    }

    pub fn with_lineno(mut self, lineno: impl Into<Lineno>) -> Self {
        self.lineno = lineno.into();
        self
    }

    pub fn with_location(mut self, location: InstrLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns true if the argument of this instruction is a jump target.
    pub fn has_jump(&self) -> bool {
        self.arg.is_label()
    }

    /// Jump target of this instruction, if any.
    pub fn jump_target(&self) -> Option<Label> {
        match self.arg {
            InstrArg::Label(label) => Some(label),
            _ => None,
        }
    }

    /// Check the instruction payload. Returns a human readable reason on failure.
    pub fn check(&self) -> Result<(), String> {
        if !is_identifier(&self.name) {
            return Err(format!("`{}` is not a valid operation name", self.name));
        }
        if self.lineno == Lineno::Line(0) {
            return Err("line numbers start at 1".to_string());
        }
        if let Some(location) = &self.location {
            location.check()?;
        }
        Ok(())
    }
}
