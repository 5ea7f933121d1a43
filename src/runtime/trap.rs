//! Runtime faults and the guest call stack captured with them

use std::fmt;

use super::instance::Instance;

/// The kind of fault raised by guest execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrapCode {
    Unreachable,
    IntegerDivideByZero,
    IntegerOverflow,
    InvalidConversionToInteger,
    OutOfBoundsMemoryAccess,
    OutOfBoundsTableAccess,
    UninitializedElement,
    IndirectCallTypeMismatch,
    StackExhausted,
    BudgetExhausted,
    /// A host function returned values that do not match its declared type.
    HostSignatureMismatch,
}

impl TrapCode {
    pub fn message(&self) -> &'static str {
        match self {
            TrapCode::Unreachable => "unreachable",
            TrapCode::IntegerDivideByZero => "integer divide by zero",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::InvalidConversionToInteger => "invalid conversion to integer",
            TrapCode::OutOfBoundsMemoryAccess => "out of bounds memory access",
            TrapCode::OutOfBoundsTableAccess => "out of bounds table access",
            TrapCode::UninitializedElement => "uninitialized element",
            TrapCode::IndirectCallTypeMismatch => "indirect call type mismatch",
            TrapCode::StackExhausted => "call stack exhausted",
            TrapCode::BudgetExhausted => "instruction budget exhausted",
            TrapCode::HostSignatureMismatch => "host function returned values of the wrong type",
        }
    }
}

impl fmt::Display for TrapCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// One entry of a captured guest call stack.
///
/// The instance is held as a handle, so a frame stays inspectable after the
/// call returns for as long as that instance is alive in its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub(crate) instance: Instance,
    pub(crate) func_index: u32,
    pub(crate) func_offset: usize,
    pub(crate) module_offset: usize,
}

impl Frame {
    pub fn instance(&self) -> Instance {
        self.instance
    }

    /// Index in the module's function index space, imports included.
    pub fn func_index(&self) -> u32 {
        self.func_index
    }

    /// Offset of the executing instruction from the start of the function's
    /// code entry, after its size prefix.
    pub fn func_offset(&self) -> usize {
        self.func_offset
    }

    /// Absolute offset of the executing instruction in the binary.
    pub fn module_offset(&self) -> usize {
        self.module_offset
    }
}

/// A runtime fault that unwound a call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct Trap {
    message: String,
    code: Option<TrapCode>,
    pub(crate) trace: Vec<Frame>,
}

impl Trap {
    /// A trap raised by host code, with no code attached.
    pub fn new(message: impl Into<String>) -> Trap {
        Trap {
            message: message.into(),
            code: None,
            trace: Vec::new(),
        }
    }

    pub fn code(&self) -> Option<TrapCode> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The innermost guest frame at the point of the fault.
    pub fn origin(&self) -> Option<&Frame> {
        self.trace.first()
    }

    /// Active guest frames, innermost first.
    pub fn trace(&self) -> &[Frame] {
        &self.trace
    }
}

impl From<TrapCode> for Trap {
    fn from(code: TrapCode) -> Trap {
        Trap {
            message: code.message().to_string(),
            code: Some(code),
            trace: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_trap() {
        let trap = Trap::new("boom");
        assert_eq!(trap.message(), "boom");
        assert_eq!(trap.to_string(), "boom");
        assert_eq!(trap.code(), None);
        assert!(trap.origin().is_none());
        assert!(trap.trace().is_empty());
    }

    #[test]
    fn test_trap_from_code() {
        let trap = Trap::from(TrapCode::IntegerDivideByZero);
        assert_eq!(trap.code(), Some(TrapCode::IntegerDivideByZero));
        assert_eq!(trap.message(), "integer divide by zero");
    }
}
