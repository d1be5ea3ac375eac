//! Identity handles used inside an instruction stream.
//!
//! Jumps refer to their target through a [`Label`] and exception regions are
//! paired through a [`RegionId`]. Both are small integer handles: two handles
//! are the same target if and only if they hold the same number, regardless of
//! where they appear in the stream. Handles are issued by a
//! [`HandleAllocator`], usually through
//! [`Bytecode::new_label`](crate::bytecode::Bytecode::new_label).
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// Represents a jump target within an instruction stream.
///
/// A label carries no payload: it is placed in the stream as an
/// [`Entry::Label`](crate::entry::Entry::Label) and referenced by instructions
/// through [`InstrArg::Label`](crate::instr::InstrArg::Label).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Label(pub u32);

/// Identity pairing a `TryBegin` with the `TryEnd` entries closing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionId(pub u32);

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "region_{}", self.0)
    }
}

/// Monotonic source of fresh [`Label`] and [`RegionId`] handles.
///
/// Labels and regions draw from the same counter so that a number is never
/// issued twice, even across the two handle kinds. Containers allocate from
/// the process-wide [`HandleAllocator::global`] instance, so labels created
/// for two different containers never coincide.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU32,
}

static GLOBAL_HANDLES: HandleAllocator = HandleAllocator::new();

impl HandleAllocator {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Allocator whose first handle is `first`.
    pub const fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    /// Allocator shared by every container of the process.
    pub fn global() -> &'static HandleAllocator {
        &GLOBAL_HANDLES
    }

    pub fn next_label(&self) -> Result<Label> {
        self.bump().map(Label)
    }

    pub fn next_region(&self) -> Result<RegionId> {
        self.bump().map(RegionId)
    }

    /// Next raw handle. `u32::MAX` is never issued.
    pub(crate) fn bump(&self) -> Result<u32> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| {
                next.checked_add(1)
            })
            .map_err(|_| Error::HandlesExhausted)
    }
}
