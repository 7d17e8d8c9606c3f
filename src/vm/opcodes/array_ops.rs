//! Array literals
//!
//! `[k => v, ...$xs, &$y]` builds its array on the operand stack: `InitArray`
//! pushes an empty array and every element opcode pops its operands and
//! adds to the array underneath them.

use crate::core::value::{ArrayData, ArrayKey, Val};
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

const NEXT_OCCUPIED: &str = "Cannot add element to the array as the next element is already occupied";

impl VM {
    pub(crate) fn exec_init_array(&mut self, capacity: u32) -> Result<(), VmError> {
        let arr = ArrayData::with_capacity(capacity as usize);
        self.push_operand(Val::Array(Rc::new(arr)));
        Ok(())
    }

    /// Run `f` on the array being built, which sits on top of the stack.
    fn with_literal<R>(&mut self, f: impl FnOnce(&mut ArrayData) -> R) -> Result<R, VmError> {
        let mut top = self.pop_operand()?;
        let result = match &mut top {
            Val::Array(arr) => f(Rc::make_mut(arr)),
            _ => {
                return Err(VmError::RuntimeError(
                    "array literal is not on the stack".into(),
                ));
            }
        };
        self.push_operand(top);
        Ok(result)
    }

    fn append_to_literal(&mut self, value: Val) -> Result<(), VmError> {
        if self.with_literal(|arr| arr.push(value))? {
            Ok(())
        } else {
            Err(self.error(NEXT_OCCUPIED))
        }
    }

    pub(crate) fn exec_add_element(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        let key = self.to_array_key(&key)?;
        self.with_literal(|arr| arr.insert(key, value))?;
        Ok(())
    }

    pub(crate) fn exec_append_element(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        self.append_to_literal(value)
    }

    fn literal_ref(&mut self) -> Result<Val, VmError> {
        match self.pop_operand()? {
            Val::Ref(cell) => Ok(Val::Ref(cell)),
            other => Ok(Val::Ref(self.new_cell(other))),
        }
    }

    /// `[k => &$v]`
    pub(crate) fn exec_add_element_ref(&mut self) -> Result<(), VmError> {
        let cell = self.literal_ref()?;
        let key = self.pop_value()?;
        let key = self.to_array_key(&key)?;
        self.with_literal(|arr| arr.insert(key, cell))?;
        Ok(())
    }

    pub(crate) fn exec_append_element_ref(&mut self) -> Result<(), VmError> {
        let cell = self.literal_ref()?;
        self.append_to_literal(cell)
    }

    /// `[...$xs]`: integer keys are renumbered, string keys overwrite.
    pub(crate) fn exec_spread_element(&mut self) -> Result<(), VmError> {
        let source = self.pop_value()?;
        let entries: Vec<(Val, Val)> = match &source {
            Val::Array(arr) => arr
                .iter()
                .map(|(k, v)| (k.to_val(), v.deref_val()))
                .collect(),
            Val::Object(obj) if obj.class().is_subclass_of(self.names.traversable) => {
                self.iterate_to_vec(&source)?
            }
            _ => return Err(self.error("Only arrays and Traversables can be unpacked")),
        };
        for (key, value) in entries {
            match key {
                Val::String(s) => {
                    let key = ArrayKey::from_str_val(&s);
                    self.with_literal(|arr| arr.insert(key, value))?;
                }
                _ => self.append_to_literal(value)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::value::{ArrayData, ArrayKey, Val};
    use crate::runtime::context::EngineBuilder;
    use crate::vm::engine::VM;

    fn vm() -> VM {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        VM::new(engine)
    }

    #[test]
    fn spread_renumbers_int_keys_and_overwrites_string_keys() {
        let mut vm = vm();
        let mut source = ArrayData::new();
        source.insert(ArrayKey::Int(7), Val::Int(1));
        source.insert(ArrayKey::from("a"), Val::Int(2));

        vm.exec_init_array(0).unwrap();
        vm.push_operand(Val::from("x"));
        vm.exec_append_element().unwrap();
        vm.push_operand(Val::from("a"));
        vm.push_operand(Val::Int(0));
        vm.exec_add_element().unwrap();
        vm.push_operand(Val::from(source));
        vm.exec_spread_element().unwrap();

        let result = vm.pop_operand().unwrap();
        let arr = result.as_array().unwrap();
        let keys: Vec<ArrayKey> = arr.keys().cloned().collect();
        assert_eq!(keys, vec![ArrayKey::Int(0), ArrayKey::from("a"), ArrayKey::Int(1)]);
        assert_eq!(arr.get(&ArrayKey::from("a")), Some(&Val::Int(2)));
        assert_eq!(arr.get(&ArrayKey::Int(1)), Some(&Val::Int(1)));
    }
}
