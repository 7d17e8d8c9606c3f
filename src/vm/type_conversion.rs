//! Type conversion and declared-type checks
//!
//! String conversion needs the VM because objects convert through
//! `__toString`. Declared parameter, return and property types are checked
//! here in both coercion modes:
//!
//! - weak (default): scalars juggle to the declared scalar type, with the
//!   usual numeric-string rules
//! - strict (`declare(strict_types=1)` in the calling file): only exact
//!   matches, plus int to float widening

use crate::compiler::chunk::TypeHint;
use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayKey, Number, PhpStr, Val, float_to_int, parse_numeric_prefix};
use crate::runtime::context::ClassDef;
use crate::vm::engine::{VM, VmError};
use crate::vm::opcodes::arithmetic::ARRAY_TO_STRING;
use std::rc::Rc;

/// Result of checking a value against a declared type.
pub(crate) enum TypeCheck {
    Accepted(Val),
    Rejected,
}

impl VM {
    /// String conversion for echo, concatenation and string parameters.
    pub(crate) fn to_php_string(&mut self, value: &Val) -> Result<Vec<u8>, VmError> {
        match value {
            Val::Array(_) => {
                self.warn(ARRAY_TO_STRING);
                Ok(b"Array".to_vec())
            }
            Val::Object(obj) => self.object_to_string(obj),
            Val::Resource(id) => Ok(format!("Resource id #{}", id.0).into_bytes()),
            Val::Ref(cell) => {
                let inner = cell.borrow().clone();
                self.to_php_string(&inner)
            }
            scalar => Ok(scalar
                .scalar_to_bytes(self.context.config.precision)
                .unwrap_or_default()),
        }
    }

    pub(crate) fn to_php_str(&mut self, value: &Val) -> Result<PhpStr, VmError> {
        match value {
            Val::String(s) => Ok(s.clone()),
            other => Ok(PhpStr::new(self.to_php_string(other)?)),
        }
    }

    /// `__toString()`, or an `Error` for objects without one.
    pub(crate) fn object_to_string(&mut self, obj: &ObjectRef) -> Result<Vec<u8>, VmError> {
        let class = obj.class();
        let Some(method) = class.find_method(self.names.to_string).cloned() else {
            let name = self.class_name_of(obj);
            return Err(self.error(&format!(
                "Object of class {} could not be converted to string",
                name
            )));
        };
        let result = self.call_method(obj, &method, Vec::new())?;
        match result {
            Val::String(s) => Ok(s.as_bytes().to_vec()),
            other => {
                let name = self.class_name_of(obj);
                let given = self.debug_type(&other);
                Err(self.type_error(&format!(
                    "{}::__toString(): Return value must be of type string, {} returned",
                    name, given
                )))
            }
        }
    }

    /// Array key for a value used as an offset.
    pub(crate) fn to_array_key(&mut self, value: &Val) -> Result<ArrayKey, VmError> {
        match value {
            Val::Int(i) => Ok(ArrayKey::Int(*i)),
            Val::String(s) => Ok(ArrayKey::from_str_val(s)),
            Val::Null => Ok(ArrayKey::Str(PhpStr::empty())),
            Val::Bool(b) => Ok(ArrayKey::Int(*b as i64)),
            Val::Float(f) => {
                let i = float_to_int(*f);
                if f.is_finite() && f.fract() != 0.0 {
                    let shown = self.format_float(*f);
                    self.deprecated(&format!(
                        "Implicit conversion from float {} to int loses precision",
                        shown
                    ));
                }
                Ok(ArrayKey::Int(i))
            }
            Val::Resource(id) => {
                self.warn(&format!(
                    "Resource ID#{} used as offset, casting to integer ({})",
                    id.0, id.0
                ));
                Ok(ArrayKey::Int(id.0 as i64))
            }
            Val::Ref(cell) => {
                let inner = cell.borrow().clone();
                self.to_array_key(&inner)
            }
            Val::Array(_) | Val::Object(_) => Err(self.type_error("Illegal offset type")),
        }
    }

    /// Check `value` against `ty`, coercing scalars in weak mode.
    pub(crate) fn check_type(
        &mut self,
        value: Val,
        ty: &TypeHint,
        strict: bool,
        scope: Option<&Rc<ClassDef>>,
    ) -> Result<TypeCheck, VmError> {
        if self.matches_exactly(&value, ty, scope) {
            return Ok(TypeCheck::Accepted(value));
        }
        if let TypeHint::Nullable(inner) = ty {
            return self.check_type(value, inner, strict, scope);
        }
        let members: Vec<&TypeHint> = match ty {
            TypeHint::Union(types) => types.iter().collect(),
            other => vec![other],
        };
        // int to float widening is allowed even in strict mode.
        if let Val::Int(i) = value {
            if members.iter().any(|t| matches!(t, TypeHint::Float)) {
                return Ok(TypeCheck::Accepted(Val::Float(i as f64)));
            }
        }
        if strict {
            return Ok(TypeCheck::Rejected);
        }
        // Weak mode: try int, float, string, bool in that order.
        for target in [TypeHint::Int, TypeHint::Float, TypeHint::String, TypeHint::Bool] {
            if !members.iter().any(|t| **t == target) {
                continue;
            }
            if let Some(coerced) = self.coerce_scalar(&value, &target)? {
                return Ok(TypeCheck::Accepted(coerced));
            }
        }
        Ok(TypeCheck::Rejected)
    }

    /// Whether `value` satisfies `ty` without conversion.
    pub(crate) fn matches_exactly(
        &self,
        value: &Val,
        ty: &TypeHint,
        scope: Option<&Rc<ClassDef>>,
    ) -> bool {
        let value = match value {
            Val::Ref(cell) => return self.matches_exactly(&cell.borrow(), ty, scope),
            v => v,
        };
        match ty {
            TypeHint::Mixed => true,
            TypeHint::Int => matches!(value, Val::Int(_)),
            TypeHint::Float => matches!(value, Val::Float(_)),
            TypeHint::String => matches!(value, Val::String(_)),
            TypeHint::Bool => matches!(value, Val::Bool(_)),
            TypeHint::False => matches!(value, Val::Bool(false)),
            TypeHint::True => matches!(value, Val::Bool(true)),
            TypeHint::Null | TypeHint::Void => matches!(value, Val::Null),
            TypeHint::Never => false,
            TypeHint::Array => matches!(value, Val::Array(_)),
            TypeHint::Object => matches!(value, Val::Object(_)),
            TypeHint::Iterable => match value {
                Val::Array(_) => true,
                Val::Object(obj) => obj.class().is_subclass_of(self.names.traversable),
                _ => false,
            },
            TypeHint::Callable => self.is_callable_value(value),
            TypeHint::SelfType => match (value, scope) {
                (Val::Object(obj), Some(scope)) => obj.class().is_subclass_of(scope.lc_name),
                _ => false,
            },
            TypeHint::Parent => match (value, scope.and_then(|s| s.parent.as_ref())) {
                (Val::Object(obj), Some(parent)) => obj.class().is_subclass_of(parent.lc_name),
                _ => false,
            },
            TypeHint::Static => match (value, self.current_called_scope().or(scope.cloned())) {
                (Val::Object(obj), Some(called)) => obj.class().is_subclass_of(called.lc_name),
                _ => false,
            },
            TypeHint::Class(name) => match value {
                Val::Object(obj) => {
                    let bytes = self.context.interner.lookup(*name).unwrap_or_default();
                    match self.context.interner.find_lower(bytes) {
                        Some(lc) => obj.class().is_subclass_of(lc),
                        None => false,
                    }
                }
                _ => false,
            },
            TypeHint::Nullable(inner) => {
                matches!(value, Val::Null) || self.matches_exactly(value, inner, scope)
            }
            TypeHint::Union(types) => types.iter().any(|t| self.matches_exactly(value, t, scope)),
            TypeHint::Intersection(types) => {
                types.iter().all(|t| self.matches_exactly(value, t, scope))
            }
        }
    }

    /// Weak-mode scalar juggling. `None` means the value cannot be coerced.
    fn coerce_scalar(&mut self, value: &Val, target: &TypeHint) -> Result<Option<Val>, VmError> {
        let value = value.deref_val();
        let coerced = match (target, &value) {
            (_, Val::Null | Val::Array(_) | Val::Resource(_)) => None,
            (TypeHint::String, Val::Object(obj)) => {
                if obj.class().find_method(self.names.to_string).is_some() {
                    Some(Val::String(PhpStr::new(self.object_to_string(obj)?)))
                } else {
                    None
                }
            }
            (_, Val::Object(_)) => None,
            (TypeHint::Int, Val::Float(f)) => {
                if !f.is_finite() {
                    None
                } else {
                    if f.fract() != 0.0 {
                        let shown = self.format_float(*f);
                        self.deprecated(&format!(
                            "Implicit conversion from float {} to int loses precision",
                            shown
                        ));
                    }
                    Some(Val::Int(float_to_int(*f)))
                }
            }
            (TypeHint::Int, Val::Bool(b)) => Some(Val::Int(*b as i64)),
            (TypeHint::Int, Val::String(s)) => match self.numeric_param(s.as_bytes())? {
                Some(Number::Int(i)) => Some(Val::Int(i)),
                Some(Number::Float(f)) if f.is_finite() && f.fract() == 0.0 => {
                    Some(Val::Int(float_to_int(f)))
                }
                _ => None,
            },
            (TypeHint::Float, Val::Bool(b)) => Some(Val::Float(*b as i64 as f64)),
            (TypeHint::Float, Val::String(s)) => self
                .numeric_param(s.as_bytes())?
                .map(|n| Val::Float(n.to_float())),
            (TypeHint::String, Val::Int(_) | Val::Float(_) | Val::Bool(_)) => {
                Some(Val::String(self.to_php_str(&value)?))
            }
            (TypeHint::Bool, Val::Int(_) | Val::Float(_) | Val::String(_)) => {
                Some(Val::Bool(value.to_bool()))
            }
            _ => None,
        };
        Ok(coerced)
    }

    /// Numeric string accepted by an int or float parameter. Leading-numeric
    /// strings are accepted with a warning.
    fn numeric_param(&mut self, bytes: &[u8]) -> Result<Option<Number>, VmError> {
        match parse_numeric_prefix(bytes) {
            Some((n, true)) => Ok(Some(n)),
            Some((n, false)) => {
                self.warn(crate::vm::opcodes::arithmetic::NON_NUMERIC);
                Ok(Some(n))
            }
            None => Ok(None),
        }
    }

    /// Declared type as written in messages: `?int`, `int|string`, `Foo`.
    pub(crate) fn type_hint_display(&self, ty: &TypeHint) -> String {
        match ty {
            TypeHint::Int => "int".into(),
            TypeHint::Float => "float".into(),
            TypeHint::String => "string".into(),
            TypeHint::Bool => "bool".into(),
            TypeHint::Array => "array".into(),
            TypeHint::Object => "object".into(),
            TypeHint::Callable => "callable".into(),
            TypeHint::Iterable => "iterable".into(),
            TypeHint::Mixed => "mixed".into(),
            TypeHint::Void => "void".into(),
            TypeHint::Never => "never".into(),
            TypeHint::Null => "null".into(),
            TypeHint::False => "false".into(),
            TypeHint::True => "true".into(),
            TypeHint::SelfType => "self".into(),
            TypeHint::Parent => "parent".into(),
            TypeHint::Static => "static".into(),
            TypeHint::Class(name) => self.sym_name(*name),
            TypeHint::Nullable(inner) => format!("?{}", self.type_hint_display(inner)),
            TypeHint::Union(types) => types
                .iter()
                .map(|t| self.type_hint_display(t))
                .collect::<Vec<_>>()
                .join("|"),
            TypeHint::Intersection(types) => types
                .iter()
                .map(|t| self.type_hint_display(t))
                .collect::<Vec<_>>()
                .join("&"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn weak_mode_juggles_numeric_strings() {
        let out = run(
            "<?php function f(int $x) { var_dump($x); } f('12'); f(3.0); f(true);",
        );
        assert_eq!(out, "int(12)\nint(3)\nint(1)\n");
    }

    #[test]
    fn strict_mode_rejects_strings() {
        let out = run(
            "<?php declare(strict_types=1);
            function f(int $x) { return $x; }
            try { f('1'); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert!(out.starts_with("f(): Argument #1 ($x) must be of type int, string given"));
    }

    #[test]
    fn int_widens_to_float_in_strict_mode() {
        let out = run(
            "<?php declare(strict_types=1); function f(float $x) { var_dump($x); } f(2);",
        );
        assert_eq!(out, "float(2)\n");
    }
}
