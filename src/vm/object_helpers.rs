//! Object creation and property access helpers
//!
//! `new`, `clone`, closures and the reflection-style
//! [`VM::instantiate_class`] all build objects through [`VM::create_object`],
//! which lays out declared property defaults in declaration order.

use crate::compiler::chunk::ClosureData;
use crate::core::heap::{ObjectData, ObjectInternal, ObjectRef};
use crate::core::value::{Symbol, Val};
use crate::runtime::context::ClassDef;
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

impl VM {
    /// Allocate an instance of `class` with its declared property defaults.
    /// Typed properties without a default stay uninitialized.
    pub fn create_object(&mut self, class: Rc<ClassDef>) -> Result<ObjectRef, VmError> {
        let mut data = ObjectData::new(class.clone());
        for (name, entry) in &class.properties {
            if let Some(default) = &entry.default {
                data.properties.insert(*name, default.clone());
            }
        }
        if class.is_subclass_of(self.names.throwable) {
            let file = Val::from(self.current_file());
            let line = Val::Int(self.current_line() as i64);
            data.properties.insert(self.names.file, file);
            data.properties.insert(self.names.line, line);
        }
        Ok(self.objects.alloc(data))
    }

    /// Object of a builtin class with the given properties, for natives.
    pub fn create_object_with_properties(
        &mut self,
        class_name: &[u8],
        properties: &[(&[u8], Val)],
    ) -> Result<ObjectRef, VmError> {
        let Some(class) = self.context.lookup_class(class_name) else {
            let name = String::from_utf8_lossy(class_name).into_owned();
            return Err(self.class_not_found(&name));
        };
        let obj = self.create_object(class)?;
        for (name, value) in properties {
            let sym = self.context.interner.intern(name);
            obj.borrow_mut().properties.insert(sym, value.clone());
        }
        Ok(obj)
    }

    /// Abstract classes and interfaces cannot be instantiated.
    pub(crate) fn check_instantiable(&mut self, class: &ClassDef) -> Result<(), VmError> {
        let kind = if class.is_interface {
            "interface"
        } else if class.is_abstract {
            "abstract class"
        } else {
            return Ok(());
        };
        let name = self.sym_name(class.name);
        Err(self.error(&format!("Cannot instantiate {} {}", kind, name)))
    }

    /// Create an object by class name and run its constructor, the way
    /// `ReflectionClass::newInstanceArgs` does.
    pub fn instantiate_class(&mut self, class_name: &[u8], args: Vec<Val>) -> Result<ObjectRef, VmError> {
        let Some(class) = self.context.lookup_class(class_name) else {
            let name = String::from_utf8_lossy(class_name).into_owned();
            return Err(self.throw_error(
                "ReflectionException",
                &format!("Class \"{}\" does not exist", name),
            ));
        };
        self.check_instantiable(&class)?;
        let obj = self.create_object(class.clone())?;
        if let Some(ctor) = class.find_method(self.names.construct).cloned() {
            let callable = self.method_callable(&obj, ctor, class)?;
            self.call_callable(&callable, args)?;
        }
        Ok(obj)
    }

    /// Closure object over a compiled function body.
    pub(crate) fn new_closure(&mut self, data: ClosureData) -> Result<ObjectRef, VmError> {
        let Some(class) = self.context.classes.get(&self.names.closure).cloned() else {
            return Err(VmError::RuntimeError("Closure class is not registered".into()));
        };
        let mut object = ObjectData::new(class);
        object.internal = ObjectInternal::Closure(Rc::new(data));
        Ok(self.objects.alloc(object))
    }

    pub(crate) fn closure_data(&self, obj: &ObjectRef) -> Option<Rc<ClosureData>> {
        match &obj.borrow().internal {
            ObjectInternal::Closure(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// `clone $obj`: shallow property copy, then `__clone` on the copy.
    pub(crate) fn clone_object(&mut self, obj: &ObjectRef) -> Result<ObjectRef, VmError> {
        let (class, properties, internal) = {
            let data = obj.borrow();
            (data.class.clone(), data.properties.clone(), data.internal.clone())
        };
        match internal {
            ObjectInternal::Generator(_) => {
                let name = self.sym_name(class.name);
                return Err(self.error(&format!(
                    "Trying to clone an uncloneable object of class {}",
                    name
                )));
            }
            ObjectInternal::Closure(_) | ObjectInternal::None => {}
        }
        let mut data = ObjectData::new(class.clone());
        // References stay shared between the original and the copy.
        data.properties = properties;
        data.internal = internal;
        let copy = self.objects.alloc(data);
        if let Some(method) = class.find_method(self.names.clone).cloned() {
            if !self.member_visible(method.visibility, method.declaring_class) {
                let name = self.sym_name(class.name);
                let scope = self.scope_description();
                return Err(self.error(&format!(
                    "Call to {} {}::__clone() from {}",
                    method.visibility.as_str(),
                    name,
                    scope
                )));
            }
            let callable = self.method_callable(&copy, method, class)?;
            self.call_callable(&callable, Vec::new())?;
        }
        Ok(copy)
    }

    /// Read `$obj->name` from the running scope.
    pub(crate) fn read_property(
        &mut self,
        obj: &ObjectRef,
        name: Symbol,
        quiet: bool,
    ) -> Result<Val, VmError> {
        let class = obj.class();
        let declared = class.properties.get(&name).cloned();
        if let Some(entry) = &declared {
            if !self.member_visible(entry.visibility, entry.declaring_class) {
                let class_name = self.sym_name(class.name);
                let prop = self.sym_name(name);
                return Err(self.error(&format!(
                    "Cannot access {} property {}::${}",
                    entry.visibility.as_str(),
                    class_name,
                    prop
                )));
            }
        }
        let value = obj.borrow().properties.get(&name).map(Val::deref_val);
        match value {
            Some(value) => Ok(value),
            None => {
                let class_name = self.sym_name(class.name);
                let prop = self.sym_name(name);
                if declared.as_ref().is_some_and(|e| e.ty.is_some()) {
                    return Err(self.error(&format!(
                        "Typed property {}::${} must not be accessed before initialization",
                        class_name, prop
                    )));
                }
                if !quiet {
                    self.warn(&format!("Undefined property: {}::${}", class_name, prop));
                }
                Ok(Val::Null)
            }
        }
    }

    /// Properties the running scope may see, in storage order.
    pub(crate) fn visible_properties(&self, obj: &ObjectRef) -> Vec<(Symbol, Val)> {
        let data = obj.borrow();
        data.properties
            .iter()
            .filter(|(name, _)| match data.class.properties.get(*name) {
                Some(entry) => self.member_visible(entry.visibility, entry.declaring_class),
                None => true,
            })
            .map(|(name, value)| (*name, value.clone()))
            .collect()
    }

    /// Whether `obj` is an instance of the class or interface `lc_name`.
    pub(crate) fn instance_of(&self, obj: &ObjectRef, lc_name: Symbol) -> bool {
        obj.class().is_subclass_of(lc_name)
    }
}
