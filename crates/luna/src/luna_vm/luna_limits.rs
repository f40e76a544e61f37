//! Centralized VM limits and configuration constants.
//!
//! All magic numbers that control compiler and VM behavior are collected
//! here for easy tuning.

// ===== Compiler =====

/// Number of values addressable by a one-byte operand. Caps locals and
/// upvalues per function and constants per chunk.
pub const UINT8_COUNT: usize = 256;

/// Maximum number of call arguments / function parameters.
pub const MAX_ARGS: usize = 255;

/// Maximum number of elements in a list literal.
pub const MAX_LIST_ITEMS: usize = 255;

/// Jump and loop operands are 16-bit.
pub const MAX_JUMP: usize = u16::MAX as usize;

// ===== VM =====

/// Maximum call nesting depth.
pub const FRAMES_MAX: usize = 64;

/// Value stack capacity.
pub const STACK_MAX: usize = FRAMES_MAX * UINT8_COUNT;

/// REPL input line limit in bytes.
pub const REPL_LINE_MAX: usize = 1024;

// ===== GC =====

/// Growth factor applied to the live byte count at each cycle boundary
/// to derive the next collection threshold.
pub const GC_HEAP_GROW_FACTOR: f64 = 1.5;

/// Threshold before the very first collection.
pub const GC_NEXT_INITIAL: usize = 1024 * 1024;

/// Root items processed per collector step before yielding to the
/// mutator.
pub const GC_ROOT_CHUNK: usize = 8;
