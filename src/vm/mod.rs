mod array_access;
pub mod assign_op;
pub mod callable;
mod class_resolution;
pub mod engine;
mod error_construction;
mod error_formatting;
pub mod executor;
pub mod frame;
mod frame_helpers;
mod generators;
pub mod inc_dec;
mod iteration;
pub mod memory;
mod object_helpers;
pub mod opcode;
pub mod opcode_executor;
pub(crate) mod opcodes;
pub mod stack;
mod stack_helpers;
pub(crate) mod type_conversion;
mod variable_ops;
mod visibility;
