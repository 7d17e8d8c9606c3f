//! Arithmetic operations
//!
//! PHP 8 weak-typing arithmetic. Operands are juggled to int or float first:
//! - null is 0, booleans are 0 and 1
//! - numeric strings convert silently, leading-numeric strings (`"12abc"`)
//!   and non-numeric strings convert with the warning
//!   `A non-numeric value encountered` (the latter to 0)
//! - arrays and objects are unsupported operands (TypeError), except for
//!   array union with `+`
//!
//! `+`, `-` and `*` overflow to float. `/` returns an int only for an exact
//! integer division. `%` works on integers.
//!
//! The pure functions here report warnings into a caller-provided list so
//! they can also run while the path walker holds a borrow on a variable.

use super::OperandError;
use crate::core::value::{ArrayData, Number, PhpStr, Val, format_float};
use crate::parser::ast::BinaryOp;
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

pub const NON_NUMERIC: &str = "A non-numeric value encountered";
pub const ARRAY_TO_STRING: &str = "Array to string conversion";

/// Juggle one operand to a number.
pub fn to_operand(v: &Val, warnings: &mut Vec<&'static str>) -> Result<Number, OperandError> {
    match v {
        Val::Null => Ok(Number::Int(0)),
        Val::Bool(b) => Ok(Number::Int(*b as i64)),
        Val::Int(i) => Ok(Number::Int(*i)),
        Val::Float(f) => Ok(Number::Float(*f)),
        Val::String(s) => match crate::core::value::parse_numeric_prefix(s.as_bytes()) {
            Some((n, true)) => Ok(n),
            Some((n, false)) => {
                warnings.push(NON_NUMERIC);
                Ok(n)
            }
            None => {
                warnings.push(NON_NUMERIC);
                Ok(Number::Int(0))
            }
        },
        Val::Resource(id) => Ok(Number::Int(id.0 as i64)),
        Val::Ref(cell) => to_operand(&cell.borrow(), warnings),
        Val::Array(_) | Val::Object(_) => Err(OperandError::Unsupported),
    }
}

fn operands(
    a: &Val,
    b: &Val,
    warnings: &mut Vec<&'static str>,
) -> Result<(Number, Number), OperandError> {
    if matches!(a, Val::Array(_) | Val::Object(_)) || matches!(b, Val::Array(_) | Val::Object(_))
    {
        return Err(OperandError::Unsupported);
    }
    Ok((to_operand(a, warnings)?, to_operand(b, warnings)?))
}

pub fn add(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    if let (Val::Array(x), Val::Array(y)) = (a, b) {
        return Ok(Val::Array(array_union(x, y)));
    }
    Ok(match operands(a, b, warnings)? {
        (Number::Int(x), Number::Int(y)) => match x.checked_add(y) {
            Some(n) => Val::Int(n),
            None => Val::Float(x as f64 + y as f64),
        },
        (x, y) => Val::Float(x.to_float() + y.to_float()),
    })
}

/// `$a + $b` on arrays: keys of the left side win.
fn array_union(x: &Rc<ArrayData>, y: &Rc<ArrayData>) -> Rc<ArrayData> {
    if y.is_empty() {
        return x.clone();
    }
    let mut out = (**x).clone();
    for (key, value) in y.iter() {
        if !out.contains_key(key) {
            out.insert(key.clone(), value.clone());
        }
    }
    Rc::new(out)
}

pub fn sub(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    Ok(match operands(a, b, warnings)? {
        (Number::Int(x), Number::Int(y)) => match x.checked_sub(y) {
            Some(n) => Val::Int(n),
            None => Val::Float(x as f64 - y as f64),
        },
        (x, y) => Val::Float(x.to_float() - y.to_float()),
    })
}

pub fn mul(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    Ok(match operands(a, b, warnings)? {
        (Number::Int(x), Number::Int(y)) => match x.checked_mul(y) {
            Some(n) => Val::Int(n),
            None => Val::Float(x as f64 * y as f64),
        },
        (x, y) => Val::Float(x.to_float() * y.to_float()),
    })
}

pub fn div(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    let (x, y) = operands(a, b, warnings)?;
    if y.to_float() == 0.0 {
        return Err(OperandError::DivisionByZero);
    }
    if let (Number::Int(x), Number::Int(y)) = (x, y) {
        if let Some(0) = x.checked_rem(y) {
            if let Some(q) = x.checked_div(y) {
                return Ok(Val::Int(q));
            }
        }
    }
    Ok(Val::Float(x.to_float() / y.to_float()))
}

pub fn modulo(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    let (x, y) = operands(a, b, warnings)?;
    let x = number_to_int(x);
    let y = number_to_int(y);
    if y == 0 {
        return Err(OperandError::ModuloByZero);
    }
    Ok(Val::Int(x.wrapping_rem(y)))
}

pub fn pow(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    Ok(match operands(a, b, warnings)? {
        (Number::Int(base), Number::Int(exp)) if exp >= 0 => {
            match u32::try_from(exp).ok().and_then(|e| base.checked_pow(e)) {
                Some(n) => Val::Int(n),
                None => Val::Float((base as f64).powf(exp as f64)),
            }
        }
        (x, y) => Val::Float(x.to_float().powf(y.to_float())),
    })
}

fn number_to_int(n: Number) -> i64 {
    match n {
        Number::Int(i) => i,
        Number::Float(f) => crate::core::value::float_to_int(f),
    }
}

/// Unary minus is multiplication by -1, so `-0.0` and `-PHP_INT_MIN` behave.
pub fn negate(v: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    mul(v, &Val::Int(-1), warnings)
}

pub fn unary_plus(v: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    mul(v, &Val::Int(1), warnings)
}

/// String form of a concatenation operand. Objects are converted by the VM
/// before they get here.
pub fn concat_operand(
    v: &Val,
    precision: i64,
    warnings: &mut Vec<&'static str>,
) -> Result<Vec<u8>, OperandError> {
    match v {
        Val::Array(_) => {
            warnings.push(ARRAY_TO_STRING);
            Ok(b"Array".to_vec())
        }
        Val::Object(_) => Err(OperandError::Unsupported),
        Val::Resource(id) => Ok(format!("Resource id #{}", id.0).into_bytes()),
        Val::Ref(cell) => concat_operand(&cell.borrow(), precision, warnings),
        scalar => Ok(scalar.scalar_to_bytes(precision).unwrap_or_default()),
    }
}

pub fn concat(
    a: &Val,
    b: &Val,
    precision: i64,
    warnings: &mut Vec<&'static str>,
) -> Result<Val, OperandError> {
    let mut out = concat_operand(a, precision, warnings)?;
    out.extend_from_slice(&concat_operand(b, precision, warnings)?);
    Ok(Val::String(PhpStr::new(out)))
}

/// Compound-assignment operator applied to the current value of a slot.
pub fn apply_binary(
    op: BinaryOp,
    a: &Val,
    b: &Val,
    precision: i64,
    warnings: &mut Vec<&'static str>,
) -> Result<Val, OperandError> {
    use super::bitwise;
    match op {
        BinaryOp::Plus => add(a, b, warnings),
        BinaryOp::Minus => sub(a, b, warnings),
        BinaryOp::Mul => mul(a, b, warnings),
        BinaryOp::Div => div(a, b, warnings),
        BinaryOp::Mod => modulo(a, b, warnings),
        BinaryOp::Pow => pow(a, b, warnings),
        BinaryOp::Concat => concat(a, b, precision, warnings),
        BinaryOp::BitAnd => bitwise::bit_and(a, b, warnings),
        BinaryOp::BitOr => bitwise::bit_or(a, b, warnings),
        BinaryOp::BitXor => bitwise::bit_xor(a, b, warnings),
        BinaryOp::ShiftLeft => bitwise::shift_left(a, b, warnings),
        BinaryOp::ShiftRight => bitwise::shift_right(a, b, warnings),
        _ => Err(OperandError::Unsupported),
    }
}

/// `++$x`
pub fn increment(v: &Val) -> Result<Val, OperandError> {
    match v {
        Val::Null => Ok(Val::Int(1)),
        Val::Int(i) => Ok(match i.checked_add(1) {
            Some(n) => Val::Int(n),
            None => Val::Float(*i as f64 + 1.0),
        }),
        Val::Float(f) => Ok(Val::Float(f + 1.0)),
        Val::Bool(_) | Val::Resource(_) => Ok(v.clone()),
        Val::String(s) => {
            if s.is_empty() {
                return Ok(Val::from("1"));
            }
            match crate::core::value::parse_numeric(s.as_bytes()) {
                Some(Number::Int(i)) => increment(&Val::Int(i)),
                Some(Number::Float(f)) => Ok(Val::Float(f + 1.0)),
                None => Ok(Val::String(PhpStr::new(string_increment(s.as_bytes())))),
            }
        }
        Val::Ref(cell) => increment(&cell.borrow()),
        Val::Array(_) | Val::Object(_) => Err(OperandError::Unsupported),
    }
}

/// `--$x`. Decrementing null leaves it null.
pub fn decrement(v: &Val) -> Result<Val, OperandError> {
    match v {
        Val::Null | Val::Bool(_) | Val::Resource(_) => Ok(v.clone()),
        Val::Int(i) => Ok(match i.checked_sub(1) {
            Some(n) => Val::Int(n),
            None => Val::Float(*i as f64 - 1.0),
        }),
        Val::Float(f) => Ok(Val::Float(f - 1.0)),
        Val::String(s) => {
            if s.is_empty() {
                return Ok(Val::Int(-1));
            }
            match crate::core::value::parse_numeric(s.as_bytes()) {
                Some(Number::Int(i)) => decrement(&Val::Int(i)),
                Some(Number::Float(f)) => Ok(Val::Float(f - 1.0)),
                None => Ok(v.clone()),
            }
        }
        Val::Ref(cell) => decrement(&cell.borrow()),
        Val::Array(_) | Val::Object(_) => Err(OperandError::Unsupported),
    }
}

/// Perl-style increment: "a" -> "b", "Az" -> "Ba", "zz" -> "aaa", "a9" -> "b0".
fn string_increment(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    let mut i = out.len();
    while i > 0 {
        i -= 1;
        match out[i] {
            b'z' => out[i] = b'a',
            b'Z' => out[i] = b'A',
            b'9' => out[i] = b'0',
            c if c.is_ascii_alphanumeric() => {
                out[i] = c + 1;
                return out;
            }
            _ => return out,
        }
    }
    let first = match bytes.first() {
        Some(b'0'..=b'9') => b'1',
        Some(b'A'..=b'Z') => b'A',
        _ => b'a',
    };
    out.insert(0, first);
    out
}

impl VM {
    /// Pop two operands, apply `op`, push the result.
    pub(crate) fn exec_arithmetic(&mut self, op: BinaryOp) -> Result<(), VmError> {
        let b = self.pop_operand()?;
        let a = self.pop_operand()?;
        let result = self.binary_value(op, &a, &b)?;
        self.operand_stack.push(result);
        Ok(())
    }

    /// Evaluate a non-short-circuit binary operator on two values.
    pub(crate) fn binary_value(&mut self, op: BinaryOp, a: &Val, b: &Val) -> Result<Val, VmError> {
        if op == BinaryOp::Concat {
            let mut out = self.to_php_string(a)?;
            out.extend_from_slice(&self.to_php_string(b)?);
            return Ok(Val::String(PhpStr::new(out)));
        }
        let precision = self.context.config.precision;
        let mut warnings = Vec::new();
        let result = apply_binary(op, a, b, precision, &mut warnings);
        self.flush_warnings(&warnings)?;
        match result {
            Ok(v) => Ok(v),
            Err(err) => Err(self.operand_error(err, op.symbol(), a, Some(b))),
        }
    }

    pub(crate) fn exec_negate(&mut self, plus: bool) -> Result<(), VmError> {
        let v = self.pop_operand()?;
        let mut warnings = Vec::new();
        let result = if plus {
            unary_plus(&v, &mut warnings)
        } else {
            negate(&v, &mut warnings)
        };
        self.flush_warnings(&warnings)?;
        match result {
            Ok(r) => {
                self.operand_stack.push(r);
                Ok(())
            }
            Err(err) => Err(self.operand_error(err, "*", &v, Some(&Val::Int(-1)))),
        }
    }

    /// Format a float for echo and string conversion.
    pub(crate) fn format_float(&self, f: f64) -> String {
        format_float(f, self.context.config.precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(f: fn(&Val, &Val, &mut Vec<&'static str>) -> Result<Val, OperandError>, a: Val, b: Val) -> (Result<Val, OperandError>, Vec<&'static str>) {
        let mut warnings = Vec::new();
        let r = f(&a, &b, &mut warnings);
        (r, warnings)
    }

    #[test]
    fn integer_overflow_becomes_float() {
        let (r, _) = run(add, Val::Int(i64::MAX), Val::Int(1));
        assert_eq!(r, Ok(Val::Float(9.223372036854775808e18)));
        let (r, _) = run(mul, Val::Int(i64::MAX), Val::Int(2));
        assert!(matches!(r, Ok(Val::Float(_))));
        let (r, _) = run(sub, Val::Int(i64::MIN), Val::Int(1));
        assert!(matches!(r, Ok(Val::Float(_))));
    }

    #[test]
    fn exact_division_stays_integer() {
        assert_eq!(run(div, Val::Int(6), Val::Int(3)).0, Ok(Val::Int(2)));
        assert_eq!(run(div, Val::Int(7), Val::Int(2)).0, Ok(Val::Float(3.5)));
        assert_eq!(
            run(div, Val::Int(i64::MIN), Val::Int(-1)).0,
            Ok(Val::Float(9.223372036854775808e18))
        );
        assert_eq!(
            run(div, Val::Int(1), Val::Int(0)).0,
            Err(OperandError::DivisionByZero)
        );
        assert_eq!(
            run(modulo, Val::Int(1), Val::Int(0)).0,
            Err(OperandError::ModuloByZero)
        );
        assert_eq!(run(modulo, Val::Int(i64::MIN), Val::Int(-1)).0, Ok(Val::Int(0)));
        assert_eq!(run(modulo, Val::Int(-7), Val::Int(3)).0, Ok(Val::Int(-1)));
    }

    #[test]
    fn numeric_strings_juggle_with_warnings() {
        let (r, w) = run(add, Val::from("12abc"), Val::Int(1));
        assert_eq!(r, Ok(Val::Int(13)));
        assert_eq!(w, vec![NON_NUMERIC]);
        let (r, w) = run(add, Val::from("abc"), Val::Int(1));
        assert_eq!(r, Ok(Val::Int(1)));
        assert_eq!(w, vec![NON_NUMERIC]);
        let (r, w) = run(add, Val::from(" 1.5 "), Val::Int(1));
        assert_eq!(r, Ok(Val::Float(2.5)));
        assert!(w.is_empty());
    }

    #[test]
    fn arrays_only_support_union() {
        let left = Val::from(ArrayData::from_list([Val::Int(1)]));
        let right = Val::from(ArrayData::from_list([Val::Int(2), Val::Int(3)]));
        match run(add, left.clone(), right).0 {
            Ok(Val::Array(arr)) => {
                let values: Vec<_> = arr.values().cloned().collect();
                assert_eq!(values, vec![Val::Int(1), Val::Int(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(run(sub, left, Val::Int(1)).0, Err(OperandError::Unsupported));
    }

    #[test]
    fn pow_overflow_and_negative_exponent() {
        assert_eq!(run(pow, Val::Int(2), Val::Int(10)).0, Ok(Val::Int(1024)));
        assert_eq!(run(pow, Val::Int(2), Val::Int(-1)).0, Ok(Val::Float(0.5)));
        assert!(matches!(run(pow, Val::Int(2), Val::Int(64)).0, Ok(Val::Float(_))));
    }

    #[test]
    fn string_increment_carries() {
        assert_eq!(increment(&Val::from("a")), Ok(Val::from("b")));
        assert_eq!(increment(&Val::from("Az")), Ok(Val::from("Ba")));
        assert_eq!(increment(&Val::from("zz")), Ok(Val::from("aaa")));
        assert_eq!(increment(&Val::from("a9")), Ok(Val::from("b0")));
        assert_eq!(increment(&Val::from("9")), Ok(Val::Int(10)));
        assert_eq!(increment(&Val::Null), Ok(Val::Int(1)));
        assert_eq!(decrement(&Val::Null), Ok(Val::Null));
        assert_eq!(decrement(&Val::from("abc")), Ok(Val::from("abc")));
    }
}
