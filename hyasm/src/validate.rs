//! Single-pass structural checks over an instruction stream.
//!
//! The validator is run by every traversal of a
//! [`Bytecode`](crate::bytecode::Bytecode) rather than once on mutation, so a
//! stream edited through raw access between two traversals is still checked
//! before being consumed.
use crate::{
    entry::Entry,
    label::RegionId,
    utils::{Error, Result},
};

/// Stateful checker fed one entry at a time.
///
/// At most one exception region may be open at any position. The state is
/// local to one traversal.
#[derive(Debug, Clone, Default)]
pub struct StreamValidator {
    open_region: Option<RegionId>,
    index: usize,
}

impl StreamValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Region currently open, if any.
    pub fn open_region(&self) -> Option<RegionId> {
        self.open_region
    }

    /// Check the next entry of the stream.
    pub fn check(&mut self, entry: &Entry) -> Result<()> {
        let index = self.index;
        self.index += 1;

        entry.check().map_err(|reason| Error::MalformedEntry {
            kind: entry.kind(),
            index,
            reason,
        })?;

        match entry {
            Entry::TryBegin(begin) => {
                if let Some(open) = self.open_region {
                    return Err(Error::NestingViolation { index, open });
                }
                self.open_region = Some(begin.id);
            }
            Entry::TryEnd(end) => {
                // A region may have several exits, so closing an already
                // closed region is fine.
                if let Some(open) = self.open_region.take() {
                    if open != end.begin {
                        return Err(Error::MismatchedRegionEnd {
                            index,
                            open,
                            found: end.begin,
                        });
                    }
                }
            }
            Entry::Instr(_) | Entry::Label(_) | Entry::SetLineno(_) => {}
        }

        Ok(())
    }
}

/// Validate a whole stream.
pub fn validate<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Result<()> {
    let mut validator = StreamValidator::new();
    for entry in entries {
        validator.check(entry)?;
    }
    Ok(())
}

/// Iterator adaptor validating each entry before yielding it.
///
/// Iteration stops after the first error.
#[derive(Debug, Clone)]
pub struct Validated<'a> {
    inner: std::slice::Iter<'a, Entry>,
    validator: StreamValidator,
    failed: bool,
}

impl<'a> Validated<'a> {
    pub(crate) fn new(entries: &'a [Entry]) -> Self {
        Self {
            inner: entries.iter(),
            validator: StreamValidator::new(),
            failed: false,
        }
    }
}

impl<'a> Iterator for Validated<'a> {
    type Item = Result<&'a Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let entry = self.inner.next()?;
        match self.validator.check(entry) {
            Ok(()) => Some(Ok(entry)),
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
