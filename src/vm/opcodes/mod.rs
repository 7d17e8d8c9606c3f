//! Opcode handlers grouped by family.
//!
//! The operator families (`arithmetic`, `bitwise`, `comparison`) are split
//! into pure functions over [`Val`](crate::core::value::Val) and thin `VM`
//! wrappers that pop operands, report warnings and raise errors.

pub mod arithmetic;
pub mod array_ops;
pub mod bitwise;
pub mod comparison;
pub mod control_flow;
pub mod special;

/// Failure of a pure operator function. The VM turns it into a thrown error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandError {
    /// `TypeError: Unsupported operand types: array + int`
    Unsupported,
    DivisionByZero,
    ModuloByZero,
    NegativeShift,
    /// Comparison recursed through a self-referencing structure.
    NestingTooDeep,
}
