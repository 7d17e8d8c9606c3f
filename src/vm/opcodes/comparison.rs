//! Comparison operations
//!
//! PHP 8 comparison semantics. Every ordered operator is derived from one
//! three-way [`compare`], the way the engine's `compare_function` does it:
//! `a > b` is evaluated as `b < a`, so an uncomparable pair (NaN, arrays
//! with different keys, objects of different classes) answers false both
//! ways.
//!
//! ## Loose comparison table
//!
//! | left \ right      | result                                              |
//! |-------------------|-----------------------------------------------------|
//! | null, null        | equal                                               |
//! | bool, any         | both sides converted to bool                        |
//! | null, string      | `""` compared with the string                       |
//! | null, any other   | both sides converted to bool                        |
//! | number, number    | numeric                                             |
//! | string, string    | numeric when both are numeric, otherwise bytewise   |
//! | number, string    | numeric when the string is numeric, otherwise the   |
//! |                   | number is printed and compared bytewise             |
//! | array, array      | smaller count first, then key by key; a key missing |
//! |                   | on the right side makes the pair uncomparable       |
//! | array, scalar     | the array is greater                                |
//! | object, object    | same instance equal; same class compares properties |
//! |                   | like arrays; different classes are uncomparable     |
//! | object, string    | `__toString` result when the class has one          |
//! | object, scalar    | the object is greater                               |
//!
//! `===` is [`identical`]: same type and same value, arrays with the same
//! key/value pairs in the same order, objects by identity.

use super::OperandError;
use crate::core::value::{ArrayData, Val, parse_numeric};
use crate::vm::engine::{VM, VmError};
use std::cmp::Ordering;

/// Result of comparing an uncomparable pair.
const UNCOMPARABLE: i64 = 1;
const MAX_DEPTH: usize = 256;

fn ordering(o: Ordering) -> i64 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

fn compare_floats(x: f64, y: f64) -> i64 {
    x.partial_cmp(&y).map(ordering).unwrap_or(UNCOMPARABLE)
}

fn compare_numbers(a: &Val, b: &Val) -> i64 {
    match (a, b) {
        (Val::Int(x), Val::Int(y)) => ordering(x.cmp(y)),
        _ => compare_floats(a.to_float(), b.to_float()),
    }
}

fn compare_bools(x: bool, y: bool) -> i64 {
    ordering(x.cmp(&y))
}

/// `"abc" <=> "abd"`, `"10" <=> "9"`.
fn compare_strings(x: &[u8], y: &[u8]) -> i64 {
    match (parse_numeric(x), parse_numeric(y)) {
        (Some(a), Some(b)) => compare_numbers(&a.into_val(), &b.into_val()),
        _ => ordering(x.cmp(y)),
    }
}

/// A number against a string.
fn compare_number_string(n: &Val, s: &[u8]) -> i64 {
    match parse_numeric(s) {
        Some(num) => compare_numbers(n, &num.into_val()),
        None => {
            let printed = n.scalar_to_bytes(14).unwrap_or_default();
            ordering(printed.as_slice().cmp(s))
        }
    }
}

fn compare_arrays(a: &ArrayData, b: &ArrayData, depth: usize) -> Result<i64, OperandError> {
    if a.len() != b.len() {
        return Ok(ordering(a.len().cmp(&b.len())));
    }
    for (key, left) in a.iter() {
        let Some(right) = b.get(key) else {
            return Ok(UNCOMPARABLE);
        };
        let result = compare_at(&left.deref_val(), &right.deref_val(), depth + 1)?;
        if result != 0 {
            return Ok(result);
        }
    }
    Ok(0)
}

/// Three-way loose comparison: -1, 0 or 1.
pub fn compare(a: &Val, b: &Val) -> Result<i64, OperandError> {
    compare_at(a, b, 0)
}

fn compare_at(a: &Val, b: &Val, depth: usize) -> Result<i64, OperandError> {
    if depth > MAX_DEPTH {
        return Err(OperandError::NestingTooDeep);
    }
    let result = match (a, b) {
        (Val::Ref(cell), _) => return compare_at(&cell.borrow().clone(), b, depth),
        (_, Val::Ref(cell)) => return compare_at(a, &cell.borrow().clone(), depth),

        (Val::Null, Val::Null) => 0,
        (Val::Bool(x), _) => compare_bools(*x, b.to_bool()),
        (_, Val::Bool(y)) => compare_bools(a.to_bool(), *y),
        (Val::Null, Val::String(s)) => ordering(b"".as_slice().cmp(s.as_bytes())),
        (Val::String(s), Val::Null) => ordering(s.as_bytes().cmp(b"".as_slice())),
        (Val::Null, Val::Object(_)) => -1,
        (Val::Object(_), Val::Null) => 1,
        (Val::Null, _) => compare_bools(false, b.to_bool()),
        (_, Val::Null) => compare_bools(a.to_bool(), false),

        (Val::Int(_) | Val::Float(_), Val::Int(_) | Val::Float(_)) => compare_numbers(a, b),
        (Val::String(x), Val::String(y)) => compare_strings(x.as_bytes(), y.as_bytes()),
        (Val::Int(_) | Val::Float(_), Val::String(s)) => compare_number_string(a, s.as_bytes()),
        (Val::String(s), Val::Int(_) | Val::Float(_)) => -compare_number_string(b, s.as_bytes()),

        (Val::Array(x), Val::Array(y)) => compare_arrays(x, y, depth)?,
        (Val::Array(_), _) => 1,
        (_, Val::Array(_)) => -1,

        (Val::Object(x), Val::Object(y)) => {
            if x.ptr_eq(y) {
                0
            } else if !std::rc::Rc::ptr_eq(&x.class(), &y.class()) {
                UNCOMPARABLE
            } else {
                let left = properties_of(x);
                let right = properties_of(y);
                compare_arrays(&left, &right, depth)?
            }
        }
        (Val::Object(_), _) => 1,
        (_, Val::Object(_)) => -1,

        (Val::Resource(x), Val::Resource(y)) => ordering(x.0.cmp(&y.0)),
        (Val::Resource(r), _) => compare_numbers(&Val::Int(r.0 as i64), b),
        (_, Val::Resource(r)) => compare_numbers(a, &Val::Int(r.0 as i64)),
    };
    Ok(result)
}

fn properties_of(obj: &crate::core::heap::ObjectRef) -> ArrayData {
    let data = obj.borrow();
    let mut arr = ArrayData::with_capacity(data.properties.len());
    for (name, value) in &data.properties {
        arr.insert(crate::core::value::ArrayKey::Int(name.0 as i64), value.clone());
    }
    arr
}

/// `==`
pub fn loose_equals(a: &Val, b: &Val) -> Result<bool, OperandError> {
    match (a, b) {
        // NaN is never equal to anything, so the three-way result is not enough.
        (Val::Float(x), _) | (_, Val::Float(x)) if x.is_nan() => Ok(false),
        _ => Ok(compare(a, b)? == 0),
    }
}

/// `===`
pub fn identical(a: &Val, b: &Val) -> bool {
    a.deref_val() == b.deref_val()
}

impl VM {
    /// Three-way comparison with `__toString` for objects compared to strings.
    pub(crate) fn compare_values(&mut self, a: &Val, b: &Val) -> Result<i64, VmError> {
        let (a, b) = self.stringify_for_compare(a, b)?;
        compare(&a, &b).map_err(|err| self.operand_error(err, "<=>", &a, Some(&b)))
    }

    pub(crate) fn loose_equals_values(&mut self, a: &Val, b: &Val) -> Result<bool, VmError> {
        let (a, b) = self.stringify_for_compare(a, b)?;
        loose_equals(&a, &b).map_err(|err| self.operand_error(err, "==", &a, Some(&b)))
    }

    fn stringify_for_compare(&mut self, a: &Val, b: &Val) -> Result<(Val, Val), VmError> {
        let a = a.deref_val();
        let b = b.deref_val();
        match (&a, &b) {
            (Val::Object(obj), Val::String(_)) if self.has_to_string(obj) => {
                let s = self.object_to_string(obj)?;
                Ok((Val::from(s), b))
            }
            (Val::String(_), Val::Object(obj)) if self.has_to_string(obj) => {
                let s = self.object_to_string(obj)?;
                Ok((a, Val::from(s)))
            }
            _ => Ok((a, b)),
        }
    }

    fn has_to_string(&self, obj: &crate::core::heap::ObjectRef) -> bool {
        obj.class().find_method(self.names.to_string).is_some()
    }

    fn binary_cmp<F>(&mut self, f: F) -> Result<(), VmError>
    where
        F: FnOnce(&mut VM, &Val, &Val) -> Result<bool, VmError>,
    {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let result = f(self, &a, &b)?;
        self.push_operand(Val::Bool(result));
        Ok(())
    }

    pub(crate) fn exec_equal(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| vm.loose_equals_values(a, b))
    }

    pub(crate) fn exec_not_equal(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| Ok(!vm.loose_equals_values(a, b)?))
    }

    pub(crate) fn exec_identical(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|_, a, b| Ok(identical(a, b)))
    }

    pub(crate) fn exec_not_identical(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|_, a, b| Ok(!identical(a, b)))
    }

    pub(crate) fn exec_less_than(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| Ok(vm.compare_values(a, b)? < 0))
    }

    pub(crate) fn exec_less_than_or_equal(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| Ok(vm.compare_values(a, b)? <= 0))
    }

    pub(crate) fn exec_greater_than(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| Ok(vm.compare_values(b, a)? < 0))
    }

    pub(crate) fn exec_greater_than_or_equal(&mut self) -> Result<(), VmError> {
        self.binary_cmp(|vm, a, b| Ok(vm.compare_values(b, a)? <= 0))
    }

    pub(crate) fn exec_spaceship(&mut self) -> Result<(), VmError> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        let result = self.compare_values(&a, &b)?;
        self.push_operand(Val::Int(result));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ArrayKey;

    fn eq(a: Val, b: Val) -> bool {
        loose_equals(&a, &b).unwrap()
    }

    fn list(items: &[i64]) -> Val {
        Val::from(ArrayData::from_list(items.iter().map(|i| Val::Int(*i))))
    }

    #[test]
    fn php8_string_number_equality() {
        assert!(eq(Val::Int(42), Val::from("42")));
        assert!(eq(Val::Int(42), Val::from(" 42 ")));
        assert!(eq(Val::from("1e3"), Val::from("1000")));
        assert!(!eq(Val::Int(0), Val::from("foo")));
        assert!(!eq(Val::from("abc"), Val::from("ABC")));
        assert!(eq(Val::from("abc"), Val::from("abc")));
    }

    #[test]
    fn null_and_bool_rows() {
        assert!(eq(Val::Null, Val::Bool(false)));
        assert!(eq(Val::Null, Val::from("")));
        assert!(!eq(Val::Null, Val::from("0")));
        assert!(eq(Val::Bool(true), Val::from("0.0")));
        assert!(eq(Val::Null, Val::empty_array()));
        assert!(eq(Val::Bool(false), Val::empty_array()));
        assert!(!eq(Val::Null, Val::Int(1)));
    }

    #[test]
    fn nan_is_unequal_and_unordered() {
        let nan = Val::Float(f64::NAN);
        assert!(!eq(nan.clone(), nan.clone()));
        assert_eq!(compare(&nan, &Val::Int(1)).unwrap(), 1);
        assert_eq!(compare(&Val::Int(1), &nan).unwrap(), 1);
    }

    #[test]
    fn arrays_compare_by_count_then_keys() {
        assert_eq!(compare(&list(&[1, 2]), &list(&[1, 2, 3])).unwrap(), -1);
        assert_eq!(compare(&list(&[1, 3]), &list(&[1, 2])).unwrap(), 1);
        assert!(eq(list(&[1, 2]), list(&[1, 2])));

        let mut reordered = ArrayData::new();
        reordered.insert(ArrayKey::Int(1), Val::Int(2));
        reordered.insert(ArrayKey::Int(0), Val::Int(1));
        assert!(eq(list(&[1, 2]), Val::from(reordered.clone())));
        assert!(!identical(&list(&[1, 2]), &Val::from(reordered)));

        let mut other_keys = ArrayData::new();
        other_keys.insert(ArrayKey::from("a"), Val::Int(1));
        assert_eq!(compare(&list(&[1]), &Val::from(other_keys.clone())).unwrap(), 1);
        assert_eq!(compare(&Val::from(other_keys), &list(&[1])).unwrap(), 1);
    }

    #[test]
    fn arrays_outrank_scalars() {
        assert_eq!(compare(&list(&[]), &Val::Int(100)).unwrap(), 1);
        assert_eq!(compare(&Val::from("zzz"), &list(&[1])).unwrap(), -1);
    }

    #[test]
    fn non_numeric_strings_compare_bytewise_with_numbers() {
        assert_eq!(compare(&Val::Int(10), &Val::from("9a")).unwrap(), -1);
        assert_eq!(compare(&Val::from("abc"), &Val::Int(5)).unwrap(), 1);
        assert_eq!(compare(&Val::from("10"), &Val::from("9")).unwrap(), 1);
    }

    #[test]
    fn identical_requires_same_type() {
        assert!(!identical(&Val::Int(1), &Val::Float(1.0)));
        assert!(!identical(&Val::Int(1), &Val::from("1")));
        assert!(identical(&Val::from("a"), &Val::from("a")));
    }
}
