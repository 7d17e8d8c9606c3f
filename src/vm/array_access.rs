//! Reading `$a[k]` and `$o->p`
//!
//! Arrays, strings and `ArrayAccess` objects can be indexed. Reads never
//! create anything; writes go through the path walker in `variable_ops`.

use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayKey, PhpStr, Symbol, Val, canonical_int, parse_numeric};
use crate::vm::engine::{VM, VmError};

fn undefined_key_message(key: &ArrayKey) -> String {
    match key {
        ArrayKey::Int(i) => format!("Undefined array key {}", i),
        ArrayKey::Str(s) => format!(
            "Undefined array key \"{}\"",
            String::from_utf8_lossy(s.as_bytes())
        ),
    }
}

impl VM {
    pub(crate) fn implements_array_access(&self, obj: &ObjectRef) -> bool {
        obj.class().is_subclass_of(self.names.array_access)
    }

    pub(crate) fn array_access_get(&mut self, obj: &ObjectRef, offset: Val) -> Result<Val, VmError> {
        let name = self.names.offset_get;
        let value = self.call_method_named(obj, name, vec![offset])?;
        Ok(value.deref_val())
    }

    pub(crate) fn array_access_set(
        &mut self,
        obj: &ObjectRef,
        offset: Val,
        value: Val,
    ) -> Result<(), VmError> {
        let name = self.names.offset_set;
        self.call_method_named(obj, name, vec![offset, value])?;
        Ok(())
    }

    pub(crate) fn array_access_exists(&mut self, obj: &ObjectRef, offset: Val) -> Result<bool, VmError> {
        let name = self.names.offset_exists;
        Ok(self.call_method_named(obj, name, vec![offset])?.to_bool())
    }

    pub(crate) fn array_access_unset(&mut self, obj: &ObjectRef, offset: Val) -> Result<(), VmError> {
        let name = self.names.offset_unset;
        self.call_method_named(obj, name, vec![offset])?;
        Ok(())
    }

    /// `$container[$key]` as an rvalue. Quiet reads back `isset`, `empty`
    /// and `??`: no diagnostics, and null for anything missing.
    pub(crate) fn read_dim(&mut self, container: &Val, key: &Val, quiet: bool) -> Result<Val, VmError> {
        match container {
            Val::Ref(cell) => {
                let inner = cell.borrow().clone();
                self.read_dim(&inner, key, quiet)
            }
            Val::Array(arr) => {
                let key = self.to_array_key(key)?;
                match arr.get(&key) {
                    Some(value) => Ok(value.deref_val()),
                    None => {
                        if !quiet {
                            self.warn(&undefined_key_message(&key));
                        }
                        Ok(Val::Null)
                    }
                }
            }
            Val::String(s) => self.read_string_offset(s, key, quiet),
            Val::Object(obj) => {
                if !self.implements_array_access(obj) {
                    let name = self.class_name_of(obj);
                    return Err(self.error(&format!("Cannot use object of type {} as array", name)));
                }
                if quiet && !self.array_access_exists(obj, key.clone())? {
                    return Ok(Val::Null);
                }
                self.array_access_get(obj, key.clone())
            }
            other => {
                if !quiet {
                    self.warn(&format!(
                        "Trying to access array offset on value of type {}",
                        other.type_name()
                    ));
                }
                Ok(Val::Null)
            }
        }
    }

    fn read_string_offset(&mut self, s: &PhpStr, key: &Val, quiet: bool) -> Result<Val, VmError> {
        let offset = match key.deref_val() {
            Val::Int(i) => i,
            Val::String(k) => {
                let numeric = canonical_int(k.as_bytes())
                    .or_else(|| parse_numeric(k.as_bytes()).map(|n| n.into_val().to_int()));
                match numeric {
                    Some(i) => i,
                    None if quiet => return Ok(Val::Null),
                    None => {
                        return Err(
                            self.type_error("Cannot access offset of type string on string")
                        );
                    }
                }
            }
            Val::Array(_) | Val::Object(_) if quiet => return Ok(Val::Null),
            Val::Array(_) | Val::Object(_) => {
                let ty = key.type_name();
                return Err(self.type_error(&format!(
                    "Cannot access offset of type {} on string",
                    ty
                )));
            }
            other => other.to_int(),
        };
        let bytes = s.as_bytes();
        let index = if offset < 0 {
            offset + bytes.len() as i64
        } else {
            offset
        };
        match usize::try_from(index).ok().and_then(|i| bytes.get(i)) {
            Some(&byte) => Ok(Val::String(PhpStr::new(vec![byte]))),
            None if quiet => Ok(Val::Null),
            None => {
                self.warn(&format!("Uninitialized string offset {}", offset));
                Ok(Val::String(PhpStr::empty()))
            }
        }
    }

    /// `$target->name` as an rvalue.
    pub(crate) fn read_prop_of(&mut self, target: &Val, name: Symbol, quiet: bool) -> Result<Val, VmError> {
        match target.deref_val() {
            Val::Object(obj) => self.read_property(&obj, name, quiet),
            other => {
                if !quiet {
                    let prop = self.sym_name(name);
                    self.warn(&format!(
                        "Attempt to read property \"{}\" on {}",
                        prop,
                        other.type_name()
                    ));
                }
                Ok(Val::Null)
            }
        }
    }

    pub(crate) fn exec_fetch_dim(&mut self, quiet: bool) -> Result<(), VmError> {
        let key = self.pop_value()?;
        let container = self.pop_value()?;
        let value = self.read_dim(&container, &key, quiet)?;
        self.push_operand(value);
        Ok(())
    }

    /// `[$a, $b] = $value`: non-arrays destructure to nulls silently.
    pub(crate) fn exec_fetch_list_element(&mut self) -> Result<(), VmError> {
        let key = self.pop_value()?;
        let container = self.pop_value()?;
        let value = match &container {
            Val::Array(_) => self.read_dim(&container, &key, false)?,
            Val::Object(obj) if self.implements_array_access(obj) => {
                self.read_dim(&container, &key, false)?
            }
            _ => Val::Null,
        };
        self.push_operand(value);
        Ok(())
    }

    pub(crate) fn exec_fetch_prop(&mut self, name: Symbol, quiet: bool) -> Result<(), VmError> {
        let target = self.pop_value()?;
        let value = self.read_prop_of(&target, name, quiet)?;
        self.push_operand(value);
        Ok(())
    }

    pub(crate) fn exec_fetch_prop_dynamic(&mut self, quiet: bool) -> Result<(), VmError> {
        let name = self.pop_value()?;
        let name = self.to_php_string(&name)?;
        let name = self.context.interner.intern(&name);
        let target = self.pop_value()?;
        let value = self.read_prop_of(&target, name, quiet)?;
        self.push_operand(value);
        Ok(())
    }
}
