//! Bitwise operations
//!
//! `&`, `|`, `^` and `~` work bytewise when every operand is a string, and
//! on integers otherwise. Shifts always convert to integers; shifting by a
//! negative amount is an `ArithmeticError`, shifting by 64 or more gives 0
//! (or -1 for a negative value shifted right).

use super::OperandError;
use super::arithmetic::to_operand;
use crate::core::value::{Number, PhpStr, Val, float_to_int};
use crate::vm::engine::{VM, VmError};

fn int_operand(v: &Val, warnings: &mut Vec<&'static str>) -> Result<i64, OperandError> {
    match to_operand(v, warnings)? {
        Number::Int(i) => Ok(i),
        Number::Float(f) => Ok(float_to_int(f)),
    }
}

fn string_pair<'a>(a: &'a Val, b: &'a Val) -> Option<(&'a [u8], &'a [u8])> {
    match (a, b) {
        (Val::String(x), Val::String(y)) => Some((x.as_bytes(), y.as_bytes())),
        _ => None,
    }
}

fn int_pair(
    a: &Val,
    b: &Val,
    warnings: &mut Vec<&'static str>,
) -> Result<(i64, i64), OperandError> {
    if matches!(a, Val::Array(_) | Val::Object(_)) || matches!(b, Val::Array(_) | Val::Object(_))
    {
        return Err(OperandError::Unsupported);
    }
    Ok((int_operand(a, warnings)?, int_operand(b, warnings)?))
}

pub fn bit_and(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    if let Some((x, y)) = string_pair(a, b) {
        let out: Vec<u8> = x.iter().zip(y).map(|(l, r)| l & r).collect();
        return Ok(Val::String(PhpStr::new(out)));
    }
    let (x, y) = int_pair(a, b, warnings)?;
    Ok(Val::Int(x & y))
}

pub fn bit_or(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    if let Some((x, y)) = string_pair(a, b) {
        let (long, short) = if x.len() >= y.len() { (x, y) } else { (y, x) };
        let mut out = long.to_vec();
        for (i, byte) in short.iter().enumerate() {
            out[i] |= byte;
        }
        return Ok(Val::String(PhpStr::new(out)));
    }
    let (x, y) = int_pair(a, b, warnings)?;
    Ok(Val::Int(x | y))
}

pub fn bit_xor(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    if let Some((x, y)) = string_pair(a, b) {
        let out: Vec<u8> = x.iter().zip(y).map(|(l, r)| l ^ r).collect();
        return Ok(Val::String(PhpStr::new(out)));
    }
    let (x, y) = int_pair(a, b, warnings)?;
    Ok(Val::Int(x ^ y))
}

pub fn shift_left(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    let (x, y) = int_pair(a, b, warnings)?;
    match y {
        n if n < 0 => Err(OperandError::NegativeShift),
        n if n >= 64 => Ok(Val::Int(0)),
        n => Ok(Val::Int(x.wrapping_shl(n as u32))),
    }
}

pub fn shift_right(a: &Val, b: &Val, warnings: &mut Vec<&'static str>) -> Result<Val, OperandError> {
    let (x, y) = int_pair(a, b, warnings)?;
    match y {
        n if n < 0 => Err(OperandError::NegativeShift),
        n if n >= 64 => Ok(Val::Int(if x < 0 { -1 } else { 0 })),
        n => Ok(Val::Int(x >> n)),
    }
}

/// `~$x`. Only integers, floats and strings are accepted.
pub fn bit_not(v: &Val) -> Result<Val, OperandError> {
    match v {
        Val::Int(i) => Ok(Val::Int(!i)),
        Val::Float(f) => Ok(Val::Int(!float_to_int(*f))),
        Val::String(s) => Ok(Val::String(PhpStr::new(
            s.as_bytes().iter().map(|b| !b).collect(),
        ))),
        Val::Ref(cell) => bit_not(&cell.borrow()),
        _ => Err(OperandError::Unsupported),
    }
}

impl VM {
    pub(crate) fn exec_bitwise_not(&mut self) -> Result<(), VmError> {
        let v = self.pop_operand()?;
        match bit_not(&v) {
            Ok(result) => {
                self.operand_stack.push(result);
                Ok(())
            }
            Err(_) => {
                let ty = self.debug_type(&v);
                Err(self.throw_error(
                    "TypeError",
                    &format!("Cannot perform bitwise not on {}", ty),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_combine_bytewise() {
        let mut w = Vec::new();
        assert_eq!(
            bit_and(&Val::from("ab"), &Val::from("a"), &mut w),
            Ok(Val::from("a"))
        );
        assert_eq!(
            bit_or(&Val::from("a"), &Val::from("  "), &mut w),
            Ok(Val::from("a "))
        );
        assert_eq!(bit_not(&Val::from("\x00")), Ok(Val::from(vec![0xffu8])));
    }

    #[test]
    fn mixed_operands_use_integers() {
        let mut w = Vec::new();
        assert_eq!(bit_and(&Val::from("12"), &Val::Int(10), &mut w), Ok(Val::Int(8)));
        assert_eq!(bit_xor(&Val::Int(5), &Val::Float(3.9), &mut w), Ok(Val::Int(6)));
        assert!(w.is_empty());
    }

    #[test]
    fn shift_edges() {
        let mut w = Vec::new();
        assert_eq!(shift_left(&Val::Int(1), &Val::Int(3), &mut w), Ok(Val::Int(8)));
        assert_eq!(shift_left(&Val::Int(1), &Val::Int(64), &mut w), Ok(Val::Int(0)));
        assert_eq!(shift_right(&Val::Int(-8), &Val::Int(70), &mut w), Ok(Val::Int(-1)));
        assert_eq!(
            shift_left(&Val::Int(1), &Val::Int(-1), &mut w),
            Err(OperandError::NegativeShift)
        );
        assert_eq!(bit_not(&Val::Bool(true)), Err(OperandError::Unsupported));
    }
}
