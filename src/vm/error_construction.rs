//! Building throwable objects from inside the engine.
//!
//! Every catchable error the engine raises is a real instance of one of the
//! builtin exception classes, so `catch (TypeError $e)` and `getMessage()`
//! work the same for engine errors and user-thrown ones.

use crate::core::heap::ObjectRef;
use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};

impl VM {
    /// Create an instance of a builtin throwable class with `message`.
    /// Unknown class names fall back to `Error`.
    pub(crate) fn create_exception(
        &mut self,
        class_name: &str,
        message: &str,
    ) -> Result<ObjectRef, VmError> {
        let class = match self.context.lookup_class(class_name.as_bytes()) {
            Some(class) => class,
            None => self
                .context
                .lookup_class(b"Error")
                .ok_or_else(|| VmError::RuntimeError(format!("{}: {}", class_name, message)))?,
        };
        let obj = self.create_object(class)?;
        let message_sym = self.names.message;
        obj.borrow_mut()
            .properties
            .insert(message_sym, Val::from(message));
        Ok(obj)
    }

    /// Error value that throws a new `class_name` exception.
    pub(crate) fn throw_error(&mut self, class_name: &str, message: &str) -> VmError {
        match self.create_exception(class_name, message) {
            Ok(obj) => VmError::Exception(obj),
            Err(err) => err,
        }
    }

    /// `Error` with `message`.
    pub(crate) fn error(&mut self, message: &str) -> VmError {
        self.throw_error("Error", message)
    }

    pub(crate) fn type_error(&mut self, message: &str) -> VmError {
        self.throw_error("TypeError", message)
    }

    pub(crate) fn value_error(&mut self, message: &str) -> VmError {
        self.throw_error("ValueError", message)
    }

    /// Turn an operator failure into the matching throwable.
    pub(crate) fn operand_error(
        &mut self,
        err: crate::vm::opcodes::OperandError,
        symbol: &str,
        left: &Val,
        right: Option<&Val>,
    ) -> VmError {
        use crate::vm::opcodes::OperandError;
        match err {
            OperandError::Unsupported => {
                let left = self.debug_type(left);
                let message = match right {
                    Some(right) => {
                        let right = self.debug_type(right);
                        format!("Unsupported operand types: {} {} {}", left, symbol, right)
                    }
                    None => format!("Unsupported operand types: {}", left),
                };
                self.type_error(&message)
            }
            OperandError::DivisionByZero => self.throw_error("DivisionByZeroError", "Division by zero"),
            OperandError::ModuloByZero => self.throw_error("DivisionByZeroError", "Modulo by zero"),
            OperandError::NegativeShift => {
                self.throw_error("ArithmeticError", "Bit shift by negative number")
            }
            OperandError::NestingTooDeep => {
                self.fatal("Nesting level too deep - recursive dependency?")
            }
        }
    }

    /// Object thrown by `throw $x`; anything else is an `Error`.
    pub(crate) fn throwable_from(&mut self, value: Val) -> VmError {
        match value.deref_val() {
            Val::Object(obj) if obj.class().is_subclass_of(self.names.throwable) => {
                VmError::Exception(obj)
            }
            _ => self.error("Can only throw objects"),
        }
    }
}
