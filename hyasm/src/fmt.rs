//! Pretty-print helpers for entries and containers.
use crate::{
    bytecode::Bytecode,
    entry::{Entry, SetLineno, TryBegin, TryEnd},
    instr::{Instr, InstrArg, Lineno},
    label::Label,
    meta::Docstring,
};

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            write!(f, "label label_{}", self.0)
        } else {
            write!(f, "label_{}", self.0)
        }
    }
}

impl std::fmt::Display for InstrArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstrArg::None => Ok(()),
            InstrArg::Int(value) => write!(f, "{}", value),
            InstrArg::Label(label) => write!(f, "<{}>", label),
            InstrArg::Name(name) => write!(f, "{}", name),
        }
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.arg.is_none() {
            write!(f, " {}", self.arg)?;
        }
        if let Lineno::Line(line) = self.lineno {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entry::Instr(instr) => write!(f, "{}", instr),
            Entry::Label(label) => write!(f, "{}:", label),
            Entry::SetLineno(SetLineno { lineno }) => write!(f, "SetLineno({})", lineno),
            Entry::TryBegin(TryBegin {
                id,
                target,
                push_lasti,
                stack_depth,
            }) => {
                write!(f, "TryBegin {} -> <{}>", id, target)?;
                if *push_lasti {
                    write!(f, " lasti")?;
                }
                if let Some(depth) = stack_depth {
                    write!(f, " depth={}", depth)?;
                }
                Ok(())
            }
            Entry::TryEnd(TryEnd { begin }) => write!(f, "TryEnd {}", begin),
        }
    }
}

impl std::fmt::Display for Bytecode {
    /// Render a listing with labels flush-left and entries indented.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "; code `{}` from {} (line {})",
            self.meta.name, self.meta.filename, self.meta.first_lineno
        )?;
        if let Docstring::Text(doc) = &self.meta.docstring {
            write!(f, "\n; doc {:?}", doc)?;
        }
        for index in 0..self.len() {
            match &self[index] {
                entry @ Entry::Label(_) => write!(f, "\n{}", entry)?,
                entry => write!(f, "\n    {}", entry)?,
            }
        }
        Ok(())
    }
}
