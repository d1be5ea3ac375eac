//! Label-free view of an instruction stream, used for structural equality.
//!
//! Two streams built independently use different [`Label`] handles even when
//! they encode the same control flow. Flattening replaces every jump target
//! by the number of non-label entries preceding the label, which is what the
//! jump actually means once encoded.
use std::collections::HashMap;

use log::trace;
use smallvec::SmallVec;

use crate::{
    entry::{Entry, SetLineno, TryBegin, TryEnd},
    instr::{InstrArg, InstrLocation, Lineno},
    label::Label,
    utils::{Error, Result},
};

/// Instruction whose jump target, if any, has been resolved to an offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlatInstr {
    pub name: String,
    pub arg: FlatArg,
    pub lineno: Lineno,
    pub location: Option<InstrLocation>,
}

/// Argument of a [`FlatInstr`].
///
/// Resolved jumps are kept apart from integer immediates so that `JUMP label`
/// never compares equal to `JUMP 3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlatArg {
    Arg(InstrArg),
    Offset(usize),
}

/// Entry of a flattened stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlatEntry {
    /// Placeholder for a label, tagged with its position in the stream.
    Label { position: usize },
    Instr(FlatInstr),
    SetLineno(SetLineno),
    /// Region start with the handler target resolved to an offset.
    TryBegin {
        target: usize,
        push_lasti: bool,
        stack_depth: Option<u32>,
    },
    TryEnd,
}

/// A pending target resolution: which entry of the output, and which label.
enum Pending {
    Jump { at: usize, label: Label },
    Handler { at: usize, label: Label },
}

/// Flatten `entries`, resolving every label reference into an offset.
///
/// Fails with [`Error::UnresolvedLabelReference`] when a referenced label is
/// never placed in the stream.
pub fn flatten(entries: &[Entry]) -> Result<Vec<FlatEntry>> {
    let (mut flat, labels, pending) = collect(entries);

    for pending in pending {
        let (at, label) = match pending {
            Pending::Jump { at, label } | Pending::Handler { at, label } => (at, label),
        };
        let offset = *labels
            .get(&label)
            .ok_or(Error::UnresolvedLabelReference { label, index: at })?;

        match &mut flat[at] {
            FlatEntry::Instr(instr) => instr.arg = FlatArg::Offset(offset),
            FlatEntry::TryBegin { target, .. } => *target = offset,
            _ => unreachable!("pending resolution points to a non-referencing entry"),
        }
    }

    trace!(
        "Flattened {} entries ({} labels resolved)",
        flat.len(),
        labels.len()
    );
    Ok(flat)
}

/// First pass: emit placeholders and record the offset of every label.
fn collect(entries: &[Entry]) -> (Vec<FlatEntry>, HashMap<Label, usize>, SmallVec<Pending, 8>) {
    let mut flat = Vec::with_capacity(entries.len());
    let mut labels = HashMap::new();
    let mut pending = SmallVec::new();
    let mut offset = 0;

    for (position, entry) in entries.iter().enumerate() {
        match entry {
            Entry::Label(label) => {
                flat.push(FlatEntry::Label { position });
                labels.insert(*label, offset);
                continue;
            }
            Entry::Instr(instr) => {
                let arg = match instr.jump_target() {
                    Some(label) => {
                        pending.push(Pending::Jump { at: position, label });
                        FlatArg::Offset(0)
                    }
                    None => FlatArg::Arg(instr.arg.clone()),
                };
                flat.push(FlatEntry::Instr(FlatInstr {
                    name: instr.name.clone(),
                    arg,
                    lineno: instr.lineno,
                    location: instr.location.clone(),
                }));
            }
            Entry::SetLineno(set_lineno) => flat.push(FlatEntry::SetLineno(*set_lineno)),
            Entry::TryBegin(TryBegin {
                target,
                push_lasti,
                stack_depth,
                ..
            }) => {
                pending.push(Pending::Handler {
                    at: position,
                    label: *target,
                });
                flat.push(FlatEntry::TryBegin {
                    target: 0,
                    push_lasti: *push_lasti,
                    stack_depth: *stack_depth,
                });
            }
            Entry::TryEnd(TryEnd { .. }) => flat.push(FlatEntry::TryEnd),
        }
        offset += 1;
    }

    (flat, labels, pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{instr::Instr, label::RegionId};

    #[test]
    fn jumps_resolve_to_offsets() {
        let stream = [
            Entry::from(Instr::new("JUMP_FORWARD", Label(9))),
            Instr::bare("NOP").into(),
            Label(9).into(),
            Instr::bare("RETURN_VALUE").into(),
        ];
        let flat = flatten(&stream).unwrap();
        assert_eq!(flat.len(), 4);
        match &flat[0] {
            FlatEntry::Instr(instr) => assert_eq!(instr.arg, FlatArg::Offset(2)),
            other => panic!("unexpected entry {other:?}"),
        }
        assert_eq!(flat[2], FlatEntry::Label { position: 2 });
    }

    #[test]
    fn backward_jumps_resolve() {
        let stream = [
            Entry::from(Label(1)),
            Instr::bare("NOP").into(),
            Instr::new("JUMP_BACKWARD", Label(1)).into(),
        ];
        let flat = flatten(&stream).unwrap();
        match &flat[2] {
            FlatEntry::Instr(instr) => assert_eq!(instr.arg, FlatArg::Offset(0)),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn handler_targets_resolve() {
        let stream = [
            Entry::from(TryBegin::new(RegionId(0), Label(5))),
            Instr::bare("NOP").into(),
            TryEnd::new(RegionId(0)).into(),
            Label(5).into(),
            Instr::bare("RERAISE").into(),
        ];
        let flat = flatten(&stream).unwrap();
        assert_eq!(
            flat[0],
            FlatEntry::TryBegin {
                target: 3,
                push_lasti: false,
                stack_depth: None
            }
        );
    }

    #[test]
    fn missing_label_is_an_error() {
        let stream = [Entry::from(Instr::new("JUMP_FORWARD", Label(3)))];
        assert_eq!(
            flatten(&stream).unwrap_err(),
            Error::UnresolvedLabelReference {
                label: Label(3),
                index: 0
            }
        );
    }

    #[test]
    fn resolved_jump_differs_from_integer_argument() {
        let with_label = [
            Entry::from(Instr::new("JUMP_FORWARD", Label(0))),
            Label(0).into(),
        ];
        let with_int = [
            Entry::from(Instr::new("JUMP_FORWARD", 1i64)),
            Label(0).into(),
        ];
        assert_ne!(flatten(&with_label).unwrap(), flatten(&with_int).unwrap());
    }
}
