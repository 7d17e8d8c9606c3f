pub mod gc;
pub mod heap;
pub mod interner;
pub mod value;

/// Stack left when a recursive walk moves onto a new segment.
const STACK_RED_ZONE: usize = 256 * 1024;
/// Size of each segment.
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Run one level of a recursive walk over script-controlled data (AST,
/// nested arrays), growing the native stack on the heap instead of
/// overflowing it.
pub fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, f)
}
