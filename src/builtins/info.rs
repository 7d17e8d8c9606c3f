//! Runtime configuration and diagnostics: `ini_*`, `gc_*`,
//! `set_time_limit`, `error_reporting`, `trigger_error` and `error_log`.

use super::{check_arity, int_arg, nullable_int_arg, opt_int_arg, string_arg};
use crate::core::value::Val;
use crate::vm::engine::{ErrorLevel, VM, VmError};
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

const E_USER_ERROR: i64 = 256;
const E_USER_WARNING: i64 = 512;
const E_USER_NOTICE: i64 = 1024;
const E_USER_DEPRECATED: i64 = 16384;

pub fn php_gc_collect_cycles(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "gc_collect_cycles", args, 0, 0)?;
    let collected = vm.collect_cycles()?;
    Ok(Val::Int(collected as i64))
}

pub fn php_gc_enable(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "gc_enable", args, 0, 0)?;
    vm.context.config.enable_gc = true;
    Ok(Val::Null)
}

pub fn php_gc_disable(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "gc_disable", args, 0, 0)?;
    vm.context.config.enable_gc = false;
    Ok(Val::Null)
}

pub fn php_gc_enabled(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "gc_enabled", args, 0, 0)?;
    Ok(Val::Bool(vm.context.config.enable_gc))
}

fn apply_time_limit(vm: &mut VM, seconds: i64) {
    let limit = (seconds > 0).then(|| Duration::from_secs(seconds as u64));
    tracing::debug!(seconds, "execution time limit reset");
    vm.set_time_limit(limit);
}

/// Restarts the clock: the new limit counts from this call.
pub fn php_set_time_limit(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "set_time_limit", args, 1, 1)?;
    let seconds = int_arg(vm, "set_time_limit", args, 0, "seconds")?.max(0);
    vm.context.config.max_execution_time = seconds;
    apply_time_limit(vm, seconds);
    Ok(Val::Bool(true))
}

pub fn php_ini_get(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ini_get", args, 1, 1)?;
    let name = string_arg(vm, "ini_get", args, 0, "option")?;
    match vm.context.config.get(&name.to_string_lossy()) {
        Some(value) => Ok(Val::from(value)),
        None => Ok(Val::Bool(false)),
    }
}

/// Returns the old value, or `false` for a setting this runtime lacks.
pub fn php_ini_set(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "ini_set", args, 2, 2)?;
    let name = string_arg(vm, "ini_set", args, 0, "option")?.to_string_lossy();
    let value = match args[1].deref_val() {
        Val::Null => String::new(),
        Val::Bool(b) => if b { "1" } else { "" }.to_string(),
        other @ (Val::Int(_) | Val::Float(_) | Val::String(_)) => {
            String::from_utf8_lossy(&vm.to_php_string(&other)?).into_owned()
        }
        other => {
            let given = vm.debug_type(&other);
            return Err(vm.type_error(&format!(
                "ini_set(): Argument #2 ($value) must be of type string|int|float|bool|null, {} given",
                given
            )));
        }
    };
    let Some(old) = vm.context.config.set(&name, &value) else {
        return Ok(Val::Bool(false));
    };
    if name == "max_execution_time" {
        let seconds = vm.context.config.max_execution_time;
        apply_time_limit(vm, seconds);
    }
    Ok(Val::from(old))
}

pub fn php_error_reporting(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "error_reporting", args, 0, 1)?;
    let old = vm.context.config.error_reporting;
    if let Some(level) = nullable_int_arg(vm, "error_reporting", args, 0, "error_level")? {
        vm.context.config.error_reporting = level;
    }
    Ok(Val::Int(old))
}

pub fn php_trigger_error(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "trigger_error", args, 1, 2)?;
    let message = string_arg(vm, "trigger_error", args, 0, "message")?.to_string_lossy();
    let level = match opt_int_arg(vm, "trigger_error", args, 1, "error_level", E_USER_NOTICE)? {
        E_USER_ERROR => ErrorLevel::UserError,
        E_USER_WARNING => ErrorLevel::UserWarning,
        E_USER_NOTICE => ErrorLevel::UserNotice,
        E_USER_DEPRECATED => ErrorLevel::Deprecated,
        _ => {
            return Err(vm.value_error(
                "trigger_error(): Argument #2 ($error_level) must be one of E_USER_ERROR, E_USER_WARNING, E_USER_NOTICE, or E_USER_DEPRECATED",
            ));
        }
    };
    if level == ErrorLevel::UserError {
        return Err(vm.fatal(&message));
    }
    vm.report(level, &message);
    Ok(Val::Bool(true))
}

/// Message type 3 appends to the destination file; every other type goes
/// to stderr, as the CLI does without an `error_log` setting.
pub fn php_error_log(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "error_log", args, 1, 4)?;
    let message = string_arg(vm, "error_log", args, 0, "message")?;
    let kind = opt_int_arg(vm, "error_log", args, 1, "message_type", 0)?;
    if kind == 3 {
        let destination = match args.get(2).map(Val::deref_val) {
            Some(Val::Null) | None => String::new(),
            Some(_) => string_arg(vm, "error_log", args, 2, "destination")?.to_string_lossy(),
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&destination)
            .and_then(|mut file| file.write_all(message.as_bytes()));
        if let Err(err) = written {
            vm.warn(&format!("error_log({}): Failed to open stream: {}", destination, err));
            return Ok(Val::Bool(false));
        }
        return Ok(Val::Bool(true));
    }
    let mut stderr = std::io::stderr().lock();
    let _ = stderr.write_all(message.as_bytes());
    let _ = stderr.write_all(b"\n");
    Ok(Val::Bool(true))
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn ini_round_trip() {
        let out = run(
            "<?php echo ini_get('precision'), ' ', ini_set('precision', 4), ' ', ini_get('precision'), ' ', 1/3, ' ';
             var_dump(ini_get('no.such.setting'), ini_set('no.such.setting', '1'));",
        );
        assert_eq!(out, "14 14 4 0.3333 bool(false)\nbool(false)\n");
    }

    #[test]
    fn gc_toggles_and_collects() {
        let out = run(
            "<?php gc_disable(); var_dump(gc_enabled()); gc_enable(); var_dump(gc_enabled());
             class N { public $other; }
             $a = new N; $b = new N; $a->other = $b; $b->other = $a; unset($a, $b);
             echo gc_collect_cycles();",
        );
        assert_eq!(out, "bool(false)\nbool(true)\n2");
    }

    #[test]
    fn error_reporting_returns_previous_level() {
        let out = run("<?php echo error_reporting(0), ' ', error_reporting(), ' ', error_reporting(E_ALL);");
        assert_eq!(out, "32767 0 0");
    }

    #[test]
    fn trigger_error_validates_level() {
        let out = run(
            "<?php var_dump(@trigger_error('quiet', E_USER_WARNING));
             try { trigger_error('x', E_WARNING); } catch (ValueError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "bool(true)\ntrigger_error(): Argument #2 ($error_level) must be one of E_USER_ERROR, E_USER_WARNING, E_USER_NOTICE, or E_USER_DEPRECATED"
        );
    }

    #[test]
    fn error_log_appends_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let path = path.to_string_lossy().replace('\\', "/");
        let out = run(&format!(
            "<?php error_log('one;', 3, '{0}'); error_log('two', 3, '{0}'); $h = fopen('{0}', 'r'); echo fread($h, 100);",
            path
        ));
        assert_eq!(out, "one;two");
    }
}
