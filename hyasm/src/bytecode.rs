//! The symbolic instruction container.
//!
//! A [`Bytecode`] holds an ordered stream of [`Entry`] values together with the
//! [`CodeMeta`] of the routine they belong to. Mutation goes through ordinary
//! sequence operations and is never checked on the spot; every traversal
//! ([`Bytecode::iter`], [`Bytecode::validate`], [`Bytecode::legalize`], ...)
//! runs the [`StreamValidator`](crate::validate::StreamValidator) again.
use std::{
    collections::BTreeSet,
    ops::{Bound, Index, IndexMut, Range, RangeBounds},
};

use log::{debug, trace, warn};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    backend::{Linearizer, StackDepthAnalyzer},
    entry::Entry,
    flags::infer_flags,
    flatten::{FlatEntry, flatten},
    instr::Lineno,
    label::{HandleAllocator, Label, RegionId},
    meta::CodeMeta,
    utils::{BackendError, Error, Result},
    validate::{Validated, validate},
};

/// Symbolic instruction stream of one routine.
///
/// Cloning produces an independent stream sharing the same label handles, so
/// jumps of the copy still point at the copied labels.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bytecode {
    pub meta: CodeMeta,
    /// Names of the positional arguments, in order.
    pub argnames: Vec<String>,
    entries: Vec<Entry>,
    /// Handles referenced by the stream or issued for it. May hold stale numbers.
    #[cfg_attr(feature = "serde", serde(skip))]
    handles: BTreeSet<u32>,
    /// Cleared whenever an entry is handed out mutably.
    #[cfg_attr(feature = "serde", serde(skip))]
    handles_synced: bool,
}

impl Bytecode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_meta(meta: CodeMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    /// Build a container from `entries`, validating the stream eagerly.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Entry>,
    {
        let entries: Vec<Entry> = entries.into_iter().map(Into::into).collect();
        validate(&entries)?;

        let mut code = Self::new();
        code.extend(entries);
        Ok(code)
    }

    /// Allocate a label that does not clash with any handle of this stream.
    ///
    /// Labels come from [`HandleAllocator::global`], so a label of another
    /// container is never returned either and streams can be concatenated.
    pub fn new_label(&mut self) -> Result<Label> {
        self.new_label_from(HandleAllocator::global())
    }

    /// Allocate a region identity that does not clash with any handle of this stream.
    pub fn new_region(&mut self) -> Result<RegionId> {
        self.new_region_from(HandleAllocator::global())
    }

    /// Like [`Bytecode::new_label`], drawing from `alloc`.
    pub fn new_label_from(&mut self, alloc: &HandleAllocator) -> Result<Label> {
        self.fresh_handle(alloc).map(Label)
    }

    pub fn new_region_from(&mut self, alloc: &HandleAllocator) -> Result<RegionId> {
        self.fresh_handle(alloc).map(RegionId)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw access to one entry.
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    /// Raw mutable access to one entry. The change is checked on the next traversal.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Entry> {
        self.handles_synced = false;
        self.entries.get_mut(index)
    }

    pub fn push(&mut self, entry: impl Into<Entry>) {
        let entry = entry.into();
        self.track_handles(&entry);
        self.entries.push(entry);
    }

    pub fn insert(&mut self, index: usize, entry: impl Into<Entry>) -> Result<()> {
        if index > self.entries.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        let entry = entry.into();
        self.track_handles(&entry);
        self.entries.insert(index, entry);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Entry> {
        if index >= self.entries.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.entries.len(),
            });
        }
        Ok(self.entries.remove(index))
    }

    /// Replace the entries in `range` by `replacement` and return the removed ones.
    pub fn splice<R, I>(&mut self, range: R, replacement: I) -> Result<Vec<Entry>>
    where
        R: RangeBounds<usize>,
        I: IntoIterator,
        I::Item: Into<Entry>,
    {
        let range = resolve_range(&range, self.entries.len())?;
        let replacement: Vec<Entry> = replacement.into_iter().map(Into::into).collect();
        for entry in &replacement {
            self.track_handles(entry);
        }
        Ok(self.entries.splice(range, replacement).collect())
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over the entries, validating the stream along the way.
    pub fn iter(&self) -> Validated<'_> {
        Validated::new(&self.entries)
    }

    /// Validate the whole stream.
    pub fn validate(&self) -> Result<()> {
        validate(&self.entries)
    }

    /// New container holding the entries in `range` and a copy of the metadata.
    pub fn slice(&self, range: impl RangeBounds<usize>) -> Result<Self> {
        let range = resolve_range(&range, self.entries.len())?;
        Ok(Self {
            meta: self.meta.clone(),
            argnames: self.argnames.clone(),
            entries: self.entries[range].to_vec(),
            handles: self.handles.clone(),
            handles_synced: self.handles_synced,
        })
    }

    /// Collapse line markers into per-instruction line numbers and drop them.
    ///
    /// An instruction following a marker takes the marker's line, whatever it
    /// carried before. Otherwise an unset line inherits the last explicit
    /// line seen (initially `first_lineno`). Running it twice is a no-op.
    ///
    /// Fails without touching the stream if it is invalid or if
    /// `meta.first_lineno` is 0.
    pub fn legalize(&mut self) -> Result<()> {
        if self.meta.first_lineno == 0 {
            return Err(Error::InvalidFirstLineno(0));
        }
        self.validate()?;

        let mut marker_line: Option<u32> = None;
        let mut current = Lineno::Line(self.meta.first_lineno);
        let mut markers = 0usize;

        for entry in self.entries.iter_mut() {
            match entry {
                Entry::SetLineno(set_lineno) => {
                    marker_line = Some(set_lineno.lineno);
                    markers += 1;
                }
                Entry::Instr(instr) => {
                    if let Some(line) = marker_line {
                        instr.lineno = Lineno::Line(line);
                    } else if instr.lineno.is_unset() {
                        instr.lineno = current;
                    } else {
                        current = instr.lineno;
                    }
                }
                Entry::Label(_) | Entry::TryBegin(_) | Entry::TryEnd(_) => {}
            }
        }

        if markers > 0 {
            self.entries.retain(|entry| !entry.is_set_lineno());
        }
        debug!(
            "Legalized `{}`: {} line markers removed",
            self.meta.name, markers
        );
        Ok(())
    }

    /// Label-free form of the stream, see [`flatten`].
    pub fn flatten(&self) -> Result<Vec<FlatEntry>> {
        self.validate()?;
        flatten(&self.entries)
    }

    /// Compare metadata and flattened streams, surfacing flattening errors.
    pub fn try_eq(&self, other: &Self) -> Result<bool> {
        if self.meta != other.meta {
            return Ok(false);
        }
        Ok(self.flatten()? == other.flatten()?)
    }

    /// Full structural equality, including the stack depth computed by `analyzer`.
    pub fn equivalent<A>(
        &self,
        other: &Self,
        analyzer: &A,
    ) -> std::result::Result<bool, BackendError<A::Error>>
    where
        A: StackDepthAnalyzer + ?Sized,
    {
        if !self.try_eq(other)? {
            return Ok(false);
        }
        let lhs = self.compute_stacksize(analyzer, true)?;
        let rhs = other.compute_stacksize(analyzer, true)?;
        Ok(lhs == rhs)
    }

    /// Maximum stack depth of the routine, as computed by `analyzer`.
    pub fn compute_stacksize<A>(
        &self,
        analyzer: &A,
        check_pre_and_post: bool,
    ) -> std::result::Result<u32, BackendError<A::Error>>
    where
        A: StackDepthAnalyzer + ?Sized,
    {
        self.validate()?;
        analyzer
            .max_stack_depth(self, check_pre_and_post)
            .map_err(BackendError::Backend)
    }

    /// Replace the compiler flags by the ones inferred from the instructions.
    pub fn update_flags(&mut self, is_async: Option<bool>) -> Result<()> {
        self.meta.flags = infer_flags(self, is_async)?;
        Ok(())
    }

    /// Hand a validated, legalized copy of this container to `encoder`.
    pub fn to_linear<L>(
        &self,
        encoder: &L,
    ) -> std::result::Result<L::Output, BackendError<L::Error>>
    where
        L: Linearizer + ?Sized,
    {
        let mut code = self.clone();
        code.legalize()?;
        encoder.linearize(&code).map_err(BackendError::Backend)
    }

    fn track_handles(&mut self, entry: &Entry) {
        self.handles.extend(entry.handles());
    }

    fn fresh_handle(&mut self, alloc: &HandleAllocator) -> Result<u32> {
        if !self.handles_synced {
            self.handles = self.entries.iter().flat_map(Entry::handles).collect();
            self.handles_synced = true;
        }
        loop {
            let handle = alloc.bump()?;
            if self.handles.insert(handle) {
                return Ok(handle);
            }
            trace!("Skipping handle {handle}, already used by `{}`", self.meta.name);
        }
    }
}

fn resolve_range(range: &impl RangeBounds<usize>, len: usize) -> Result<Range<usize>> {
    let start = match range.start_bound() {
        Bound::Included(&start) => start,
        Bound::Excluded(&start) => start.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        Bound::Included(&end) => end.saturating_add(1),
        Bound::Excluded(&end) => end,
        Bound::Unbounded => len,
    };
    if end > len {
        return Err(Error::IndexOutOfBounds { index: end, len });
    }
    if start > end {
        return Err(Error::IndexOutOfBounds { index: start, len });
    }
    Ok(start..end)
}

impl Index<usize> for Bytecode {
    type Output = Entry;

    fn index(&self, index: usize) -> &Entry {
        &self.entries[index]
    }
}

impl IndexMut<usize> for Bytecode {
    fn index_mut(&mut self, index: usize) -> &mut Entry {
        self.handles_synced = false;
        &mut self.entries[index]
    }
}

impl<E: Into<Entry>> Extend<E> for Bytecode {
    fn extend<T: IntoIterator<Item = E>>(&mut self, iter: T) {
        for entry in iter {
            self.push(entry);
        }
    }
}

impl<'a> IntoIterator for &'a Bytecode {
    type Item = Result<&'a Entry>;
    type IntoIter = Validated<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Compares metadata and flattened streams.
///
/// The stack depth needs an external analyzer and is left out; use
/// [`Bytecode::equivalent`] to compare it as well. A stream that cannot be
/// flattened compares unequal to everything, see [`Bytecode::try_eq`].
impl PartialEq for Bytecode {
    fn eq(&self, other: &Self) -> bool {
        self.try_eq(other).unwrap_or_else(|err| {
            warn!("Instruction streams compared unequal: {err}");
            false
        })
    }
}

impl PartialEq<[Entry]> for Bytecode {
    fn eq(&self, other: &[Entry]) -> bool {
        match (self.flatten(), flatten(other)) {
            (Ok(lhs), Ok(rhs)) => lhs == rhs,
            (Err(err), _) | (_, Err(err)) => {
                warn!("Instruction streams compared unequal: {err}");
                false
            }
        }
    }
}

impl PartialEq<Vec<Entry>> for Bytecode {
    fn eq(&self, other: &Vec<Entry>) -> bool {
        *self == other[..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entry::{SetLineno, TryBegin, TryEnd},
        instr::Instr,
    };

    fn instr(name: &str) -> Entry {
        Instr::bare(name).into()
    }

    fn lines(code: &Bytecode) -> Vec<Lineno> {
        code.iter()
            .filter_map(|entry| entry.unwrap().as_instr().map(|instr| instr.lineno))
            .collect()
    }

    #[test]
    fn construction_validates_eagerly() {
        let alloc = HandleAllocator::new();
        let (r1, r2, handler) = (
            alloc.next_region().unwrap(),
            alloc.next_region().unwrap(),
            alloc.next_label().unwrap(),
        );
        let result = Bytecode::from_entries([
            Entry::from(TryBegin::new(r1, handler)),
            TryBegin::new(r2, handler).into(),
        ]);
        assert!(result.unwrap_err().is_nesting_violation());
    }

    #[test]
    fn traversal_catches_out_of_band_mutation() {
        let mut code = Bytecode::from_entries([instr("NOP"), instr("RETURN_VALUE")]).unwrap();
        assert!(code.validate().is_ok());

        code[1] = SetLineno::new(0).into();
        assert!(code.iter().any(|entry| entry.is_err()));
        assert!(code.validate().unwrap_err().is_malformed_entry());
    }

    #[test]
    fn marker_collapse() {
        let code_entries = [
            Entry::from(SetLineno::new(5)),
            instr("A"),
            SetLineno::new(9).into(),
            instr("B"),
            instr("C"),
        ];
        let mut code = Bytecode::from_entries(code_entries).unwrap();
        code.legalize().unwrap();

        assert_eq!(code.len(), 3);
        assert!(code.iter().all(|entry| !entry.unwrap().is_set_lineno()));
        assert_eq!(
            lines(&code),
            vec![Lineno::Line(5), Lineno::Line(9), Lineno::Line(9)]
        );
    }

    #[test]
    fn explicit_lines_become_the_baseline() {
        let mut code = Bytecode::from_entries([
            instr("A"),
            Instr::bare("B").with_lineno(7u32).into(),
            instr("C"),
            Instr::bare("D").with_lineno(Lineno::Absent).into(),
            instr("E"),
        ])
        .unwrap();
        code.meta.first_lineno = 3;
        code.legalize().unwrap();

        assert_eq!(
            lines(&code),
            vec![
                Lineno::Line(3),
                Lineno::Line(7),
                Lineno::Line(7),
                Lineno::Absent,
                Lineno::Absent
            ]
        );
    }

    #[test]
    fn markers_override_explicit_lines() {
        let mut code = Bytecode::from_entries([
            Entry::from(SetLineno::new(4)),
            Instr::bare("A").with_lineno(12u32).into(),
        ])
        .unwrap();
        code.legalize().unwrap();
        assert_eq!(lines(&code), vec![Lineno::Line(4)]);
    }

    #[test]
    fn legalize_is_idempotent() {
        let mut code = Bytecode::from_entries([
            instr("A"),
            SetLineno::new(2).into(),
            Label(0).into(),
            instr("B"),
        ])
        .unwrap();
        code.legalize().unwrap();
        let once = code.clone();
        code.legalize().unwrap();

        assert_eq!(code.meta, once.meta);
        assert_eq!(lines(&code), lines(&once));
        assert_eq!(code.len(), once.len());
    }

    #[test]
    fn legalize_refuses_invalid_streams() {
        let mut code = Bytecode::new();
        let (region, nested, handler) = (
            code.new_region().unwrap(),
            code.new_region().unwrap(),
            code.new_label().unwrap(),
        );
        code.push(SetLineno::new(2));
        code.push(TryBegin::new(region, handler));
        code.push(TryBegin::new(nested, handler));
        assert!(code.legalize().is_err());
        assert_eq!(code.len(), 3);
    }

    #[test]
    fn pushed_handles_are_not_reallocated() {
        let alloc = HandleAllocator::new();
        let mut code = Bytecode::new();
        code.push(Instr::new("JUMP_FORWARD", Label(0)));
        code.push(TryBegin::new(RegionId(1), Label(2)));
        assert_eq!(code.new_label_from(&alloc).unwrap(), Label(3));
        assert_eq!(code.new_region_from(&alloc).unwrap(), RegionId(4));
    }

    #[test]
    fn raw_writes_are_seen_by_allocation() {
        let alloc = HandleAllocator::new();
        let mut code = Bytecode::new();
        code.push(instr("NOP"));
        code.push(instr("NOP"));
        assert_eq!(code.new_label_from(&alloc).unwrap(), Label(0));

        code[0] = Label(1).into();
        *code.get_mut(1).unwrap() = Instr::new("JUMP_BACKWARD", Label(2)).into();
        assert_eq!(code.new_label_from(&alloc).unwrap(), Label(3));
    }

    #[test]
    fn issued_handles_are_not_reissued() {
        let alloc = HandleAllocator::new();
        let mut code = Bytecode::new();
        let first = code.new_label_from(&alloc).unwrap();
        assert_ne!(code.new_label_from(&HandleAllocator::new()).unwrap(), first);
    }

    #[test]
    fn allocation_never_panics_near_the_top() {
        let mut code = Bytecode::new();
        code.push(Label(u32::MAX));
        code.push(Label(u32::MAX - 1));
        assert!(code.new_label().is_ok());

        let alloc = HandleAllocator::starting_at(u32::MAX - 1);
        assert_eq!(code.new_label_from(&alloc).unwrap_err(), Error::HandlesExhausted);
        assert!(code.new_region_from(&alloc).unwrap_err().is_handles_exhausted());
    }

    #[test]
    fn legalize_rejects_zero_first_line() {
        let mut code = Bytecode::from_entries([SetLineno::new(2).into(), instr("A")]).unwrap();
        code.meta.first_lineno = 0;
        assert_eq!(code.legalize().unwrap_err(), Error::InvalidFirstLineno(0));
        assert_eq!(code.len(), 2);
        assert!(code[0].is_set_lineno());

        code.meta.first_lineno = 1;
        code.legalize().unwrap();
        assert!(code.validate().is_ok());
    }

    #[test]
    fn slices_keep_metadata() {
        let mut code =
            Bytecode::from_entries([instr("A"), instr("B"), instr("C"), instr("D")]).unwrap();
        code.meta.argcount = 2;
        code.meta.name = "f".to_string();
        code.meta.filename = "f.py".to_string();
        code.argnames = vec!["x".to_string(), "y".to_string()];

        let slice = code.slice(1..3).unwrap();
        assert_eq!(slice.meta, code.meta);
        assert_eq!(slice.argnames, code.argnames);
        assert_eq!(slice.len(), 2);
        assert_eq!(slice[0], instr("B"));
        assert_eq!(slice[1], instr("C"));

        assert!(code.slice(3..9).unwrap_err().is_index_out_of_bounds());
        assert_eq!(code.slice(..).unwrap().len(), 4);
    }

    #[test]
    fn splice_replaces_a_range() {
        let mut code = Bytecode::from_entries([instr("A"), instr("B"), instr("C")]).unwrap();
        let removed = code.splice(1..2, [instr("X"), instr("Y")]).unwrap();
        assert_eq!(removed, vec![instr("B")]);
        assert_eq!(code, vec![instr("A"), instr("X"), instr("Y"), instr("C")]);
    }

    #[test]
    fn insert_and_remove_check_bounds() {
        let mut code = Bytecode::new();
        assert!(code.insert(1, instr("A")).is_err());
        code.insert(0, instr("A")).unwrap();
        assert!(code.remove(1).is_err());
        assert_eq!(code.remove(0).unwrap(), instr("A"));
        assert!(code.is_empty());
    }

    #[test]
    fn metadata_takes_part_in_equality() {
        let lhs = Bytecode::from_entries([instr("A")]).unwrap();
        let mut rhs = lhs.clone();
        assert_eq!(lhs, rhs);

        rhs.meta.docstring = crate::meta::Docstring::None;
        assert_ne!(lhs, rhs);
    }

    #[test]
    fn unresolved_labels_make_streams_unequal() {
        let code = Bytecode::from_entries([Instr::new("JUMP_FORWARD", Label(1))]).unwrap();
        assert!(code.try_eq(&code).unwrap_err().is_unresolved_label_reference());
        assert_ne!(code, code.clone());
    }

    #[test]
    fn region_end_is_accepted_through_mutation() {
        let mut code = Bytecode::new();
        let region = code.new_region().unwrap();
        let handler = code.new_label().unwrap();
        code.extend([
            Entry::from(TryBegin::new(region, handler)),
            instr("NOP"),
            TryEnd::new(region).into(),
            handler.into(),
            instr("RERAISE"),
        ]);
        assert!(code.validate().is_ok());
        assert!(code.flatten().is_ok());
    }
}
