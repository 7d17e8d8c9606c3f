//! `++` and `--` on variables, elements and properties

use crate::vm::engine::{VM, VmError};
use crate::vm::opcode::IncDecKind;
use crate::vm::opcodes::arithmetic::{decrement, increment};
use crate::vm::variable_ops::PathOp;

impl VM {
    pub(crate) fn exec_inc_dec(&mut self, idx: u32, kind: IncDecKind) -> Result<(), VmError> {
        let path = self.resolve_path(idx)?;
        let old = self.read_path(&path, false)?;
        let result = if kind.is_increment() {
            increment(&old)
        } else {
            decrement(&old)
        };
        let new = match result {
            Ok(value) => value,
            Err(_) => {
                let verb = if kind.is_increment() {
                    "increment"
                } else {
                    "decrement"
                };
                let ty = self.debug_type(&old);
                return Err(self.type_error(&format!("Cannot {} {}", verb, ty)));
            }
        };
        let (_, written) = self.walk_path(&path, PathOp::Write(new))?;
        let pushed = if kind.is_prefix() {
            written.unwrap_or_default()
        } else {
            old
        };
        self.push_operand(pushed);
        Ok(())
    }
}
