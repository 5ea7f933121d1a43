//! Error types returned across the embedding API
//!
//! Each failure class has its own type so callers can match on exactly what
//! an operation can produce. [`Error`] wraps all of them for hosts that just
//! want to use `?`.

use std::io;

use crate::parser::module::{FunctionType, ValueType};
use crate::runtime::module::ExternKind;
use crate::runtime::trap::Trap;

/// A binary could not be decoded or failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("unexpected end of input at offset {offset:#x}")]
    UnexpectedEof { offset: usize },
    #[error("malformed binary at offset {offset:#x}: {message}")]
    Malformed { offset: usize, message: String },
    #[error("unsupported feature at offset {offset:#x}: {message}")]
    Unsupported { offset: usize, message: String },
    #[error("invalid module at offset {offset:#x}: {message}")]
    Invalid { offset: usize, message: String },
}

impl CompileError {
    pub fn offset(&self) -> usize {
        match self {
            CompileError::UnexpectedEof { offset }
            | CompileError::Malformed { offset, .. }
            | CompileError::Unsupported { offset, .. }
            | CompileError::Invalid { offset, .. } => *offset,
        }
    }

    pub(crate) fn malformed(offset: usize, message: impl Into<String>) -> CompileError {
        CompileError::Malformed {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(offset: usize, message: impl Into<String>) -> CompileError {
        CompileError::Unsupported {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(offset: usize, message: impl Into<String>) -> CompileError {
        CompileError::Invalid {
            offset,
            message: message.into(),
        }
    }

    pub(crate) fn from_io(err: io::Error, offset: usize) -> CompileError {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => CompileError::UnexpectedEof { offset },
            _ => CompileError::malformed(offset, err.to_string()),
        }
    }
}

/// An import could not be satisfied by the supplied bindings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("missing import {module}::{name} (import #{index})")]
    MissingImport {
        index: usize,
        module: String,
        name: String,
    },
    #[error("import {module}::{name} expects a {expected}, but a {found} was supplied")]
    KindMismatch {
        index: usize,
        module: String,
        name: String,
        expected: ExternKind,
        found: ExternKind,
    },
    #[error("import {module}::{name} expects {expected}, but {found} was supplied")]
    SignatureMismatch {
        index: usize,
        module: String,
        name: String,
        expected: String,
        found: String,
    },
}

impl LinkError {
    /// Position of the offending import in the module's import list.
    pub fn import_index(&self) -> usize {
        match self {
            LinkError::MissingImport { index, .. }
            | LinkError::KindMismatch { index, .. }
            | LinkError::SignatureMismatch { index, .. } => *index,
        }
    }
}

/// An export lookup by name or position found nothing of the requested kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no exported {kind} at {key}")]
pub struct NotFound {
    pub kind: ExternKind,
    pub key: String,
}

/// Values of the wrong kind were passed across an untyped boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
    #[error("argument {index} should be {expected}, got {actual}")]
    ArgumentType {
        index: usize,
        expected: ValueType,
        actual: ValueType,
    },
    #[error("expected a value of type {expected}, got {actual}")]
    Value { expected: ValueType, actual: ValueType },
    #[error("function has signature {actual}, not {expected}")]
    Signature {
        expected: FunctionType,
        actual: FunctionType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot write to an immutable global")]
pub struct ImmutableGlobalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot grow memory of {current} pages by {delta} pages (maximum {maximum})")]
pub struct GrowRejected {
    pub current: u32,
    pub delta: u32,
    pub maximum: u32,
}

/// A host-side read or write fell outside the memory's current size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of bounds memory access: {len} bytes at offset {offset:#x} of {size} byte memory")]
pub struct MemoryAccessError {
    pub offset: usize,
    pub len: usize,
    pub size: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error(transparent)]
    NotFound(#[from] NotFound),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    ImmutableGlobal(#[from] ImmutableGlobalError),
    #[error(transparent)]
    Grow(#[from] GrowRejected),
    #[error(transparent)]
    MemoryAccess(#[from] MemoryAccessError),
    #[error("trap: {0}")]
    Trap(#[from] Trap),
    #[error("instance is still imported by {importers} live instance(s)")]
    InstanceInUse { importers: usize },
    #[error("host info has already been set on this instance")]
    HostInfoAlreadySet,
    #[error("invalid memory limits: min {min}, max {max:?}")]
    InvalidLimits { min: u32, max: Option<u32> },
    #[error("cannot allocate {bytes} bytes of linear memory")]
    OutOfMemory { bytes: usize },
}

impl Error {
    /// The trap carried by this error, if execution faulted.
    pub fn as_trap(&self) -> Option<&Trap> {
        match self {
            Error::Trap(trap) => Some(trap),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
