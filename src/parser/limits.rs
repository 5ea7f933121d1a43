//! Decoder limits.
//!
//! Every count read from a binary is checked against one of these before
//! anything is allocated for it.

// counts per module
pub const MAX_TYPES: u32 = 1_000_000;
pub const MAX_FUNCTIONS: u32 = 1_000_000;
pub const MAX_IMPORTS: u32 = 1_000_000;
pub const MAX_EXPORTS: u32 = 1_000_000;
pub const MAX_GLOBALS: u32 = 1_000_000;
pub const MAX_DATA_SEGMENTS: u32 = 100_000;
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;

/// Encoded body size of one function, in bytes.
pub const MAX_FUNCTION_SIZE: u32 = 7_654_321;
pub const MAX_FUNCTION_PARAMS: u32 = 1_000;
pub const MAX_FUNCTION_RETURNS: u32 = 1_000;
/// Declared locals of one function, not counting its parameters.
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;
pub const MAX_BR_TABLE_LABELS: u32 = 65_536;
/// Blocks, loops and ifs open at once inside one function body.
pub const MAX_NESTING_DEPTH: usize = 1_024;

pub const MAX_TABLE_SIZE: u32 = 10_000_000;
/// Function indices listed by a single element segment.
pub const MAX_TABLE_INIT_ENTRIES: u32 = 10_000_000;
/// 4GiB of 64KiB pages.
pub const MAX_MEMORY_PAGES: u32 = 65_536;
