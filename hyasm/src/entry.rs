//! Entries of a symbolic instruction stream.
//!
//! Besides real instructions, a stream contains pseudo-entries that never
//! reach the encoded form: labels marking jump targets, line markers, and the
//! begin/end markers of exception regions.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{EnumDiscriminants, EnumIs, EnumTryAs};

use crate::{
    instr::Instr,
    label::{Label, RegionId},
};

/// Line marker. All following instructions are attributed to `lineno` until
/// the next marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SetLineno {
    pub lineno: u32,
}

impl SetLineno {
    pub fn new(lineno: u32) -> Self {
        Self { lineno }
    }
}

/// Start of an exception region.
///
/// Instructions between this entry and the matching [`TryEnd`] are protected
/// by the handler placed at `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TryBegin {
    pub id: RegionId,
    /// Label of the exception handler.
    pub target: Label,
    /// Whether the offset of the raising instruction is pushed before the
    /// exception when jumping to the handler.
    pub push_lasti: bool,
    /// Stack depth on entry of the handler, filled in by the encoder.
    pub stack_depth: Option<u32>,
}

impl TryBegin {
    pub fn new(id: RegionId, target: Label) -> Self {
        Self {
            id,
            target,
            push_lasti: false,
            stack_depth: None,
        }
    }
}

/// End of an exception region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TryEnd {
    pub begin: RegionId,
}

impl TryEnd {
    pub fn new(begin: RegionId) -> Self {
        Self { begin }
    }
}

/// One element of a symbolic instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, EnumDiscriminants)]
#[strum_discriminants(name(EntryKind))]
#[strum_discriminants(derive(Hash))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Entry {
    Instr(Instr),
    Label(Label),
    SetLineno(SetLineno),
    TryBegin(TryBegin),
    TryEnd(TryEnd),
}

impl Entry {
    pub fn kind(&self) -> EntryKind {
        self.into()
    }

    /// Check the payload of this entry in isolation.
    ///
    /// Region nesting depends on the surrounding entries and is checked by
    /// [`StreamValidator`](crate::validate::StreamValidator) instead.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Entry::Instr(instr) => instr.check(),
            Entry::SetLineno(set_lineno) if set_lineno.lineno == 0 => {
                Err("line numbers start at 1".to_string())
            }
            Entry::SetLineno(_) | Entry::Label(_) | Entry::TryBegin(_) | Entry::TryEnd(_) => {
                Ok(())
            }
        }
    }

    pub fn as_instr(&self) -> Option<&Instr> {
        match self {
            Entry::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn as_instr_mut(&mut self) -> Option<&mut Instr> {
        match self {
            Entry::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    /// Label and region handle numbers referenced by this entry.
    pub(crate) fn handles(&self) -> SmallVec<u32, 2> {
        let mut handles = SmallVec::new();
        match self {
            Entry::Instr(instr) => handles.extend(instr.jump_target().map(|label| label.0)),
            Entry::Label(label) => handles.push(label.0),
            Entry::SetLineno(_) => {}
            Entry::TryBegin(begin) => handles.extend([begin.id.0, begin.target.0]),
            Entry::TryEnd(end) => handles.push(end.begin.0),
        }
        handles
    }
}

macro_rules! define_entry_from {
    ($typ:ty, $variant:ident) => {
        impl From<$typ> for Entry {
            fn from(value: $typ) -> Self {
                Entry::$variant(value)
            }
        }
    };
}

define_entry_from!(Instr, Instr);
define_entry_from!(Label, Label);
define_entry_from!(SetLineno, SetLineno);
define_entry_from!(TryBegin, TryBegin);
define_entry_from!(TryEnd, TryEnd);
