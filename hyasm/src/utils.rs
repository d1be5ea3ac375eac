use strum::{EnumIs, EnumTryAs};
use thiserror::Error;

use crate::{
    entry::EntryKind,
    label::{Label, RegionId},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumIs, EnumTryAs, Error)]
pub enum Error {
    /// An entry carries a payload that cannot appear in a well-formed stream.
    #[error("Malformed `{kind:?}` entry at position {index}: {reason}.")]
    MalformedEntry {
        kind: EntryKind,
        index: usize,
        reason: String,
    },

    /// A second exception region was opened before the first one was closed.
    #[error(
        "Exception regions cannot be nested. A `TryBegin` was found at position {index} while region `{open}` is still open."
    )]
    NestingViolation { index: usize, open: RegionId },

    /// A `TryEnd` closes a region that is not the currently open one.
    #[error(
        "The `TryEnd` at position {index} closes region `{found}`, but the open region is `{open}`."
    )]
    MismatchedRegionEnd {
        index: usize,
        open: RegionId,
        found: RegionId,
    },

    /// An instruction jumps to a label that never appears in the stream.
    #[error(
        "The instruction at position {index} refers to `{label}` which is never placed in the instruction stream."
    )]
    UnresolvedLabelReference { label: Label, index: usize },

    /// Every label and region handle has been issued.
    #[error("No fresh label or region handle is left to allocate.")]
    HandlesExhausted,

    /// The routine metadata cannot describe a well-formed stream.
    #[error("Invalid first line number {0}: line numbers start at 1.")]
    InvalidFirstLineno(u32),

    /// Compiler flags cannot be inferred from the instruction stream.
    #[error("Unable to infer compiler flags: {0}")]
    FlagInference(String),

    /// A position or range lies outside the instruction stream.
    #[error("Position {index} is out of bounds for an instruction stream of length {len}.")]
    IndexOutOfBounds { index: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error produced when delegating to an external collaborator.
#[derive(Debug, Error)]
pub enum BackendError<E> {
    /// The instruction stream was rejected before being handed over.
    #[error(transparent)]
    Stream(#[from] Error),

    /// The collaborator itself failed.
    #[error("Backend failure: {0}")]
    Backend(E),
}

/// Returns true if `name` is usable as an operation name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
