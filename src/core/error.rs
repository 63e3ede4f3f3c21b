//! Purpose: Crate error type carrying a kind plus where in the log it happened.
//! Exports: `Error`, `ErrorKind`, `to_exit_code`.
//! Role: Construction, mapping, and supplier failures; trips and failed appends are values, not errors.
//! Invariants: Exit codes per kind are stable for scripts driving the bench.
use std::error::Error as StdError;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Internal,
    Usage,
    Corrupt,
    Io,
    Supplier,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    path: Option<PathBuf>,
    term_id: Option<i32>,
    offset: Option<u64>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            path: None,
            term_id: None,
            offset: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn term_id(&self) -> Option<i32> {
        self.term_id
    }

    // Byte offset within the term (or log file for mapping errors).
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_term_id(mut self, term_id: i32) -> Self {
        self.term_id = Some(term_id);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            ErrorKind::Internal => "internal error",
            ErrorKind::Usage => "usage error",
            ErrorKind::Corrupt => "corrupt log",
            ErrorKind::Io => "io error",
            ErrorKind::Supplier => "reserved value supplier failed",
        };
        f.write_str(label)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        match (self.term_id, self.offset) {
            (Some(term_id), Some(offset)) => write!(f, " at term {term_id} offset {offset}")?,
            (Some(term_id), None) => write!(f, " in term {term_id}")?,
            (None, Some(offset)) => write!(f, " at offset {offset}")?,
            (None, None) => {}
        }
        if let Some(path) = &self.path {
            write!(f, " [{}]", path.display())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::Usage => 2,
        ErrorKind::Corrupt => 3,
        ErrorKind::Io => 4,
        ErrorKind::Supplier => 5,
    }
}
