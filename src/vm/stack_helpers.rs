//! Stack operation helpers
//!
//! Most handlers pop their operands, compute and push one result. A missing
//! operand means the compiler and the VM disagree about an opcode's stack
//! effect, which is reported as a `RuntimeError` naming the operation.

use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};

impl VmError {
    pub(crate) fn stack_underflow(operation: &str) -> Self {
        VmError::RuntimeError(format!("Stack underflow during {}", operation))
    }
}

impl VM {
    #[inline]
    pub(crate) fn pop_operand(&mut self) -> Result<Val, VmError> {
        self.operand_stack
            .pop()
            .ok_or_else(|| VmError::stack_underflow("pop"))
    }

    /// Pop and look through a reference cell.
    #[inline]
    pub(crate) fn pop_value(&mut self) -> Result<Val, VmError> {
        match self.pop_operand()? {
            Val::Ref(cell) => Ok(cell.borrow().clone()),
            v => Ok(v),
        }
    }

    /// Pop `count` operands, oldest first.
    pub(crate) fn pop_n_operands(&mut self, count: usize) -> Result<Vec<Val>, VmError> {
        if self.operand_stack.len() < count {
            return Err(VmError::stack_underflow("pop_n"));
        }
        Ok(self.operand_stack.pop_n(count))
    }

    #[inline]
    pub(crate) fn peek_operand(&self) -> Result<&Val, VmError> {
        self.operand_stack
            .peek()
            .ok_or_else(|| VmError::stack_underflow("peek"))
    }

    #[inline]
    pub(crate) fn push_operand(&mut self, value: Val) {
        self.operand_stack.push(value);
    }
}
