//! Native function library
//!
//! Each function has the [`NativeHandler`](crate::runtime::context::NativeHandler)
//! shape `fn(&mut VM, &[Val]) -> Result<Val, VmError>` and is registered by an
//! extension in `runtime/`. By-reference parameters arrive as `Val::Ref`.
//!
//! The helpers below parse parameters the way internal functions do:
//! the arity is checked first (`ArgumentCountError`), then each argument is
//! coerced to its declared scalar type under the caller's `strict_types`
//! mode (`TypeError` on mismatch).

pub mod array;
pub mod class;
pub mod exception;
pub mod filesystem;
pub mod function;
pub mod info;
pub mod math;
pub mod mbstring;
pub mod serialize;
pub mod spl;
pub mod string;
pub mod variable;

use crate::compiler::chunk::TypeHint;
use crate::core::value::{ArrayData, Number, PhpStr, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::type_conversion::TypeCheck;
use std::rc::Rc;

/// Fail with `ArgumentCountError` unless between `min` and `max` arguments were passed.
pub(crate) fn check_arity(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    min: usize,
    max: usize,
) -> Result<(), VmError> {
    let given = args.len();
    if given >= min && given <= max {
        return Ok(());
    }
    let (bound, count) = if min == max {
        ("exactly", min)
    } else if given < min {
        ("at least", min)
    } else {
        ("at most", max)
    };
    let message = format!(
        "{}() expects {} {} argument{}, {} given",
        func,
        bound,
        count,
        if count == 1 { "" } else { "s" },
        given
    );
    Err(vm.throw_error("ArgumentCountError", &message))
}

fn zero_of(ty: &TypeHint) -> Val {
    match ty {
        TypeHint::Int => Val::Int(0),
        TypeHint::Float => Val::Float(0.0),
        TypeHint::Bool => Val::Bool(false),
        _ => Val::String(PhpStr::empty()),
    }
}

/// Argument `idx` coerced to the scalar type `ty`.
fn scalar_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
    ty: TypeHint,
) -> Result<Val, VmError> {
    let value = args.get(idx).map(Val::deref_val).unwrap_or_default();
    let strict = vm.caller_is_strict();
    if let Val::Null = value {
        if !strict {
            let shown = vm.type_hint_display(&ty);
            vm.deprecated(&format!(
                "{}(): Passing null to parameter #{} (${}) of type {} is deprecated",
                func,
                idx + 1,
                param,
                shown
            ));
            return Ok(match &ty {
                TypeHint::Union(_) => Val::Int(0),
                other => zero_of(other),
            });
        }
    }
    match vm.check_type(value.clone(), &ty, strict, None)? {
        TypeCheck::Accepted(value) => Ok(value),
        TypeCheck::Rejected => Err(arg_type_error(vm, func, idx, param, &ty, &value)),
    }
}

/// `f(): Argument #1 ($x) must be of type T, U given`
pub(crate) fn arg_type_error(
    vm: &mut VM,
    func: &str,
    idx: usize,
    param: &str,
    ty: &TypeHint,
    given: &Val,
) -> VmError {
    let expected = vm.type_hint_display(ty);
    let given = vm.debug_type(given);
    vm.type_error(&format!(
        "{}(): Argument #{} (${}) must be of type {}, {} given",
        func,
        idx + 1,
        param,
        expected,
        given
    ))
}

pub(crate) fn string_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<PhpStr, VmError> {
    match scalar_arg(vm, func, args, idx, param, TypeHint::String)? {
        Val::String(s) => Ok(s),
        other => vm.to_php_str(&other),
    }
}

pub(crate) fn int_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<i64, VmError> {
    Ok(scalar_arg(vm, func, args, idx, param, TypeHint::Int)?.to_int())
}

pub(crate) fn float_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<f64, VmError> {
    Ok(scalar_arg(vm, func, args, idx, param, TypeHint::Float)?.to_float())
}

pub(crate) fn bool_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<bool, VmError> {
    Ok(scalar_arg(vm, func, args, idx, param, TypeHint::Bool)?.to_bool())
}

/// `int|float` parameter.
pub(crate) fn number_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<Number, VmError> {
    let ty = TypeHint::Union(vec![TypeHint::Int, TypeHint::Float]);
    match scalar_arg(vm, func, args, idx, param, ty)? {
        Val::Float(f) => Ok(Number::Float(f)),
        other => Ok(Number::Int(other.to_int())),
    }
}

pub(crate) fn opt_int_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
    default: i64,
) -> Result<i64, VmError> {
    if idx >= args.len() {
        return Ok(default);
    }
    int_arg(vm, func, args, idx, param)
}

pub(crate) fn opt_bool_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
    default: bool,
) -> Result<bool, VmError> {
    if idx >= args.len() {
        return Ok(default);
    }
    bool_arg(vm, func, args, idx, param)
}

pub(crate) fn opt_string_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
    default: &[u8],
) -> Result<PhpStr, VmError> {
    if idx >= args.len() {
        return Ok(PhpStr::from(default));
    }
    string_arg(vm, func, args, idx, param)
}

/// `?int` parameter: missing and null both give `None`.
pub(crate) fn nullable_int_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<Option<i64>, VmError> {
    match args.get(idx).map(Val::deref_val) {
        None | Some(Val::Null) => Ok(None),
        Some(_) => int_arg(vm, func, args, idx, param).map(Some),
    }
}

pub(crate) fn array_arg(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    idx: usize,
    param: &str,
) -> Result<Rc<ArrayData>, VmError> {
    match args.get(idx).map(Val::deref_val) {
        Some(Val::Array(arr)) => Ok(arr),
        other => {
            let given = other.unwrap_or_default();
            Err(arg_type_error(vm, func, idx, param, &TypeHint::Array, &given))
        }
    }
}

/// Store `value` through a by-reference argument.
pub(crate) fn write_ref(arg: Option<&Val>, value: Val) {
    if let Some(Val::Ref(cell)) = arg {
        *cell.borrow_mut() = value;
    }
}
