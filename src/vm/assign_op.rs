//! Compound assignment: `$x += 1`, `$a['k'] .= "s"`, `$o->n <<= 2`
//!
//! The target is read with the usual notices, combined with the right
//! operand and written back through the same resolved path, so its key
//! expressions are evaluated once.

use crate::parser::ast::BinaryOp;
use crate::vm::engine::{VM, VmError};
use crate::vm::variable_ops::PathOp;

impl VM {
    pub(crate) fn exec_assign_op(&mut self, idx: u32, op: BinaryOp) -> Result<(), VmError> {
        let rhs = self.pop_value()?;
        let path = self.resolve_path(idx)?;
        let current = self.read_path(&path, false)?;
        let result = self.binary_value(op, &current, &rhs)?;
        let (_, written) = self.walk_path(&path, PathOp::Write(result))?;
        self.push_operand(written.unwrap_or_default());
        Ok(())
    }
}
