//! Native methods shared by `Exception` and `Error`, plus `ErrorException`.
//!
//! Both base classes declare `message`, `code`, `file`, `line` and
//! `previous`; `file` and `line` are filled in when the object is created.

use super::{check_arity, opt_int_arg, opt_string_arg};
use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayData, Val};
use crate::vm::engine::{VM, VmError};

/// `E_ERROR`, the default severity of an `ErrorException`.
const E_ERROR: i64 = 1;

fn this_throwable(vm: &mut VM, method: &str) -> Result<ObjectRef, VmError> {
    match vm.current_this() {
        Some(obj) => Ok(obj),
        None => Err(vm.error(&format!(
            "Non-static method Exception::{}() cannot be called statically",
            method
        ))),
    }
}

fn previous_arg(vm: &mut VM, class: &str, args: &[Val], idx: usize) -> Result<Val, VmError> {
    match args.get(idx).map(Val::deref_val) {
        None | Some(Val::Null) => Ok(Val::Null),
        Some(Val::Object(prev)) if vm.instance_of(&prev, vm.names.throwable) => Ok(Val::Object(prev)),
        Some(other) => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "{}::__construct(): Argument #{} ($previous) must be of type ?Throwable, {} given",
                class,
                idx + 1,
                given
            )))
        }
    }
}

fn set_prop(vm: &mut VM, obj: &ObjectRef, name: &[u8], value: Val) {
    let sym = vm.context.interner.intern(name);
    obj.borrow_mut().properties.insert(sym, value);
}

/// `__construct(string $message = "", int $code = 0, ?Throwable $previous = null)`
pub fn exception_construct(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let this = this_throwable(vm, "__construct")?;
    let class = vm.class_name_of(&this);
    let func = format!("{}::__construct", class);
    check_arity(vm, &func, args, 0, 3)?;
    let message = opt_string_arg(vm, &func, args, 0, "message", b"")?;
    let code = opt_int_arg(vm, &func, args, 1, "code", 0)?;
    let previous = previous_arg(vm, &class, args, 2)?;
    set_prop(vm, &this, b"message", Val::String(message));
    set_prop(vm, &this, b"code", Val::Int(code));
    set_prop(vm, &this, b"previous", previous);
    Ok(Val::Null)
}

/// `__construct($message = "", $code = 0, $severity = E_ERROR, $filename = null, $line = null, $previous = null)`
pub fn error_exception_construct(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let this = this_throwable(vm, "__construct")?;
    let class = vm.class_name_of(&this);
    let func = format!("{}::__construct", class);
    check_arity(vm, &func, args, 0, 6)?;
    let message = opt_string_arg(vm, &func, args, 0, "message", b"")?;
    let code = opt_int_arg(vm, &func, args, 1, "code", 0)?;
    let severity = opt_int_arg(vm, &func, args, 2, "severity", E_ERROR)?;
    let previous = previous_arg(vm, &class, args, 5)?;
    set_prop(vm, &this, b"message", Val::String(message));
    set_prop(vm, &this, b"code", Val::Int(code));
    set_prop(vm, &this, b"severity", Val::Int(severity));
    if let Some(file) = args.get(3).map(Val::deref_val).filter(|v| !v.is_null()) {
        let file = vm.to_php_string(&file)?;
        set_prop(vm, &this, b"file", Val::from(file));
    }
    if let Some(line) = args.get(4).map(Val::deref_val).filter(|v| !v.is_null()) {
        set_prop(vm, &this, b"line", Val::Int(line.to_int()));
    }
    set_prop(vm, &this, b"previous", previous);
    Ok(Val::Null)
}

fn getter(vm: &mut VM, method: &str, name: &[u8]) -> Result<Val, VmError> {
    let this = this_throwable(vm, method)?;
    let sym = vm.context.interner.intern(name);
    Ok(vm.raw_prop(&this, sym))
}

pub fn exception_get_message(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getMessage", b"message")
}

pub fn exception_get_code(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getCode", b"code")
}

pub fn exception_get_previous(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getPrevious", b"previous")
}

pub fn exception_get_file(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getFile", b"file")
}

pub fn exception_get_line(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getLine", b"line")
}

pub fn error_exception_get_severity(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    getter(vm, "getSeverity", b"severity")
}

// Frames are not recorded on throw, so every trace is the top-level one.
pub fn exception_get_trace(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    this_throwable(vm, "getTrace")?;
    Ok(Val::from(ArrayData::new()))
}

pub fn exception_get_trace_as_string(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    this_throwable(vm, "getTraceAsString")?;
    Ok(Val::from("#0 {main}"))
}

pub fn exception_to_string(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let this = this_throwable(vm, "__toString")?;
    Ok(Val::from(vm.exception_string(&this)))
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn accessors_and_chaining() {
        let out = run(
            "<?php $inner = new LogicException('inner', 3);
             $outer = new RuntimeException('outer', 7, $inner);
             echo $outer->getMessage(), ' ', $outer->getCode(), ' ', $outer->getPrevious()->getMessage(), ' ',
                  $outer->getLine(), ' ', count($outer->getTrace()), ' ', $outer->getTraceAsString();",
        );
        assert_eq!(out, "outer 7 inner 2 0 #0 {main}");
    }

    #[test]
    fn subclasses_inherit_the_constructor() {
        let out = run(
            "<?php class MyEx extends Exception { public function __construct($m) { parent::__construct(\"my $m\", 42); } }
             try { throw new MyEx('bad'); } catch (Exception $e) { echo get_class($e), ': ', $e->getMessage(), ' ', $e->getCode(); }",
        );
        assert_eq!(out, "MyEx: my bad 42");
    }

    #[test]
    fn previous_must_be_throwable() {
        let out = run(
            "<?php try { new Exception('x', 0, new stdClass); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "Exception::__construct(): Argument #3 ($previous) must be of type ?Throwable, stdClass given"
        );
    }

    #[test]
    fn error_exception_carries_severity() {
        let out = run(
            "<?php $e = new ErrorException('boom', 1, E_WARNING, 'f.php', 9);
             echo $e->getSeverity(), ' ', $e->getFile(), ':', $e->getLine();",
        );
        assert_eq!(out, "2 f.php:9");
    }

    #[test]
    fn string_form_lists_causes_first() {
        let out = run(
            "<?php $e = new Exception('outer', 0, new Error('inner'));
             echo str_replace(__FILE__, 'F', (string) $e);",
        );
        assert_eq!(
            out,
            "Error: inner in F:1\nStack trace:\n#0 {main}\n\nNext Exception: outer in F:1\nStack trace:\n#0 {main}"
        );
    }
}
