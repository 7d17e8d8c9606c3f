use super::{array_arg, check_arity, string_arg};
use crate::core::value::{ArrayData, Val};
use crate::vm::callable::Callable;
use crate::vm::engine::{VM, VmError};

/// Resolve argument #1 as a callback, raising the `TypeError` PHP gives
/// for a callback that cannot be called.
fn callback_arg(vm: &mut VM, func: &str, value: &Val) -> Result<Callable, VmError> {
    if vm.is_callable_value(value) {
        return vm.resolve_callable(value);
    }
    let reason = match value.deref_val() {
        Val::String(name) if !name.as_bytes().windows(2).any(|w| w == b"::") => format!(
            "function \"{}\" not found or invalid function name",
            name.to_string_lossy()
        ),
        Val::String(_) | Val::Array(_) => "class or method not found".to_string(),
        _ => "no array or string given".to_string(),
    };
    Err(vm.type_error(&format!(
        "{}(): Argument #1 ($callback) must be a valid callback, {}",
        func, reason
    )))
}

pub fn php_call_user_func(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "call_user_func", args, 1, usize::MAX)?;
    let callable = callback_arg(vm, "call_user_func", &args[0])?;
    let rest = args[1..].iter().map(Val::deref_val).collect();
    vm.call_callable(&callable, rest)
}

/// Array elements are passed positionally in iteration order; string
/// keys are not matched against parameter names.
pub fn php_call_user_func_array(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "call_user_func_array", args, 2, 2)?;
    let callable = callback_arg(vm, "call_user_func_array", &args[0])?;
    let list = array_arg(vm, "call_user_func_array", args, 1, "args")?;
    // Reference elements stay references so by-ref parameters bind to them.
    let call_args = list.values().cloned().collect();
    vm.call_callable(&callable, call_args)
}

fn calling_frame_args(vm: &mut VM, func: &str) -> Result<Vec<Val>, VmError> {
    match vm.frames.last() {
        Some(frame) if frame.func.is_some() => Ok(frame.args.clone()),
        _ => Err(vm.error(&format!("{}() cannot be called from the global scope", func))),
    }
}

pub fn php_func_get_args(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "func_get_args", args, 0, 0)?;
    let passed = calling_frame_args(vm, "func_get_args")?;
    Ok(Val::from(ArrayData::from_list(
        passed.iter().map(Val::deref_val),
    )))
}

pub fn php_func_num_args(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "func_num_args", args, 0, 0)?;
    let passed = calling_frame_args(vm, "func_num_args")?;
    Ok(Val::Int(passed.len() as i64))
}

pub fn php_func_get_arg(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "func_get_arg", args, 1, 1)?;
    let position = super::int_arg(vm, "func_get_arg", args, 0, "position")?;
    let passed = calling_frame_args(vm, "func_get_arg")?;
    if position < 0 {
        return Err(vm.value_error("func_get_arg(): Argument #1 ($position) must be greater than or equal to 0"));
    }
    match passed.get(position as usize) {
        Some(value) => Ok(value.deref_val()),
        None => Err(vm.value_error(
            "func_get_arg(): Argument #1 ($position) must be less than the number of the arguments passed to the currently executed function",
        )),
    }
}

pub fn php_function_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "function_exists", args, 1, 1)?;
    let name = string_arg(vm, "function_exists", args, 0, "function")?;
    Ok(Val::Bool(vm.function_exists(name.as_bytes())))
}

pub fn php_is_callable(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_callable", args, 1, 3)?;
    let syntax_only = super::opt_bool_arg(vm, "is_callable", args, 1, "syntax_only", false)?;
    let value = args[0].deref_val();
    if syntax_only {
        let shaped = match &value {
            Val::String(_) => true,
            Val::Array(arr) => {
                arr.len() == 2
                    && matches!(
                        (arr.values().next().map(Val::deref_val), arr.values().nth(1).map(Val::deref_val)),
                        (Some(Val::Object(_) | Val::String(_)), Some(Val::String(_)))
                    )
            }
            _ => vm.is_callable_value(&value),
        };
        return Ok(Val::Bool(shaped));
    }
    let callable = vm.is_callable_value(&value);
    if callable {
        if let Some(slot) = args.get(2) {
            let resolved = vm.resolve_callable(&value)?;
            let name = vm.callable_name(&resolved);
            super::write_ref(Some(slot), Val::from(name));
        }
    }
    Ok(Val::Bool(callable))
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn call_user_func_forms() {
        let out = run(
            "<?php function add($a, $b) { return $a + $b; }
             class M { static function twice($x) { return $x * 2; } function neg($x) { return -$x; } }
             echo call_user_func('add', 1, 2), ' ', call_user_func('M::twice', 4), ' ',
                  call_user_func([new M, 'neg'], 5), ' ', call_user_func(fn($x) => $x . '!', 'hi'), ' ',
                  call_user_func_array('add', [10, 20]), ' ', call_user_func('strtoupper', 'x');",
        );
        assert_eq!(out, "3 8 -5 hi! 30 X");
    }

    #[test]
    fn call_user_func_array_passes_references() {
        let out = run(
            "<?php function bump(&$n) { $n++; } $v = 1; call_user_func_array('bump', [&$v]); echo $v;",
        );
        assert_eq!(out, "2");
    }

    #[test]
    fn invalid_callback_is_a_type_error() {
        let out = run(
            "<?php try { call_user_func('nope'); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "call_user_func(): Argument #1 ($callback) must be a valid callback, function \"nope\" not found or invalid function name"
        );
    }

    #[test]
    fn argument_introspection() {
        let out = run(
            "<?php function f() { echo func_num_args(), ':', implode(',', func_get_args()), ':', func_get_arg(1); }
             f('a', 'b', 'c');
             try { func_get_args(); } catch (Error $e) { echo ' ', $e->getMessage(); }",
        );
        assert_eq!(out, "3:a,b,c:b func_get_args() cannot be called from the global scope");
    }

    #[test]
    fn callability_checks() {
        let out = run(
            "<?php function f() {} class C { function m() {} }
             var_dump(function_exists('F'), function_exists('strlen'), function_exists('nope'),
                      is_callable('f'), is_callable([new C, 'm']), is_callable([new C, 'x']),
                      is_callable('nope', true));
             is_callable([new C, 'm'], false, $name); echo $name;",
        );
        assert_eq!(
            out,
            "bool(true)\nbool(true)\nbool(false)\nbool(true)\nbool(true)\nbool(false)\nbool(true)\nC::m"
        );
    }
}
