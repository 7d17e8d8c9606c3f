//! Centralized Code Execution API
//!
//! Compiles and runs a script in a fresh request with configurable options,
//! capturing its output. Used by the CLI's `-r` mode, the embedding API and
//! tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use php_core::vm::executor::{execute_code, ExecutionConfig};
//!
//! let result = execute_code("<?php return 42;").unwrap();
//! assert_eq!(result.value, Val::Int(42));
//!
//! let mut config = ExecutionConfig::default();
//! config.timeout_ms = 1000;
//! let result = execute_code_with_config("<?php echo 1 + 1;", config).unwrap();
//! assert_eq!(result.stdout, "2");
//! ```

use crate::compiler::emitter::Emitter;
use crate::core::value::Val;
use crate::runtime::context::{EngineBuilder, RequestContext};
use crate::vm::engine::{CapturingErrorHandler, CapturingOutputWriter, VM, VmError};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

/// Result of executing PHP code
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Value of a top-level `return`, or null
    pub value: Val,
    /// Captured output
    pub stdout: String,
    /// Captured diagnostics, one `PHP Level:  message` line each
    pub stderr: String,
    /// `exit()` status, 0 when the script ran off its end
    pub exit_status: i32,
    /// Execution time in microseconds
    pub duration_us: u64,
    /// Instructions executed (if profiling enabled)
    pub instructions: Option<u64>,
}

/// Configuration for code execution
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Maximum execution time in milliseconds (0 = unlimited)
    pub timeout_ms: u64,
    /// Initial global variables
    pub globals: HashMap<String, Val>,
    /// Capture output streams
    pub capture_output: bool,
    /// Name reported by `__FILE__` and in diagnostics
    pub file_path: Option<String>,
    /// Treat the script as if it began with `declare(strict_types=1)`
    pub strict_types: bool,
    /// ini overrides applied before the script starts
    pub ini: Vec<(String, String)>,
    /// Raised from another thread to stop the script
    pub interrupt: Option<Arc<AtomicBool>>,
    /// Count executed instructions
    pub enable_profiling: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            globals: HashMap::new(),
            capture_output: true,
            file_path: None,
            strict_types: false,
            ini: Vec::new(),
            interrupt: None,
            enable_profiling: false,
        }
    }
}

/// Execute PHP code with default configuration
///
/// # Returns
///
/// * `Ok(ExecutionResult)` - The script ran to its end or called `exit`
/// * `Err(VmError)` - Parse error, uncaught exception or fatal error
///
/// # Example
///
/// ```rust,ignore
/// let result = execute_code("<?php return 2 + 2;").unwrap();
/// assert_eq!(result.value, Val::Int(4));
/// ```
pub fn execute_code(code: &str) -> Result<ExecutionResult, VmError> {
    execute_code_with_config(code, ExecutionConfig::default())
}

/// Execute PHP code with custom configuration
pub fn execute_code_with_config(
    source: &str,
    config: ExecutionConfig,
) -> Result<ExecutionResult, VmError> {
    let start = Instant::now();

    let arena = bumpalo::Bump::new();
    let program = crate::parser::parser::parse(source.as_bytes(), &arena)?;

    let engine = EngineBuilder::new()
        .with_core_extensions()
        .build()
        .map_err(|e| VmError::RuntimeError(format!("Failed to build engine: {}", e)))?;
    let mut request_context = RequestContext::new(engine);
    for (name, value) in &config.ini {
        if request_context.config.set(name, value).is_none() {
            tracing::warn!(%name, "unknown ini setting");
        }
    }

    let mut emitter = Emitter::new(source.as_bytes(), &mut request_context.interner);
    if let Some(path) = &config.file_path {
        emitter = emitter.with_file_path(path.clone());
    }
    let mut chunk = emitter.compile(&program)?;
    chunk.strict_types |= config.strict_types;

    let mut vm = VM::new_with_context(request_context);
    for (name, value) in config.globals {
        let symbol = vm.context.interner.intern(name.as_bytes());
        vm.context.globals.insert(symbol, value);
    }
    vm.set_time_limit(match config.timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    });
    if let Some(flag) = config.interrupt {
        vm.set_interrupt_handle(flag);
    }

    let captured_stdout = Rc::new(RefCell::new(Vec::<u8>::new()));
    let captured_stderr = Rc::new(RefCell::new(Vec::<u8>::new()));
    if config.capture_output {
        let stdout = captured_stdout.clone();
        vm.set_output_writer(Box::new(CapturingOutputWriter::new(move |bytes| {
            stdout.borrow_mut().extend_from_slice(bytes);
        })));
        let stderr = captured_stderr.clone();
        vm.set_error_handler(Box::new(CapturingErrorHandler::new(move |level, message| {
            let line = format!("PHP {}:  {}\n", level.label(), message);
            stderr.borrow_mut().extend_from_slice(line.as_bytes());
        })));
    }

    let outcome = vm.run(Rc::new(chunk));
    let (value, exit_status) = match outcome {
        Ok(()) => (vm.operand_stack.pop().map(|v| v.deref_val()).unwrap_or_default(), 0),
        Err(VmError::Exit(code)) => (Val::Null, code),
        Err(err) => {
            if let VmError::Fatal(_) = err {
                vm.fatal_hit = true;
            }
            let _ = vm.shutdown();
            let _ = vm.flush_output();
            return Err(err);
        }
    };
    let exit_status = match vm.shutdown() {
        Ok(()) => exit_status,
        Err(VmError::Exit(code)) => code,
        Err(err) => return Err(err),
    };
    vm.flush_output()?;

    let instructions = config.enable_profiling.then_some(vm.instructions);
    let stdout = String::from_utf8_lossy(&captured_stdout.borrow()).into_owned();
    let stderr = String::from_utf8_lossy(&captured_stderr.borrow()).into_owned();
    Ok(ExecutionResult {
        value,
        stdout,
        stderr,
        exit_status,
        duration_us: start.elapsed().as_micros() as u64,
        instructions,
    })
}

/// Run `source` and return its top-level return value with its output.
pub fn run_code_capture_output(source: &str) -> Result<(Val, String), VmError> {
    let result = execute_code(source)?;
    Ok((result.value, result.stdout))
}

/// Quick assertion helper for tests - expects specific value
#[cfg(test)]
pub fn assert_code_equals(code: &str, expected: Val) {
    match execute_code(code) {
        Ok(result) => assert_eq!(
            result.value, expected,
            "Code: {}\nExpected: {:?}\nGot: {:?}",
            code, expected, result.value
        ),
        Err(e) => panic!("Execution failed for code: {}\nError: {:?}", code, e),
    }
}

/// Quick assertion helper for tests - expects error
#[cfg(test)]
pub fn assert_code_errors(code: &str) {
    assert!(
        execute_code(code).is_err(),
        "Expected code to error but it succeeded: {}",
        code
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_execution() {
        let result = execute_code("<?php return 42;").unwrap();
        assert_eq!(result.value, Val::Int(42));
    }

    #[test]
    fn test_string_operations() {
        let result = execute_code("<?php return 'hello' . ' world';").unwrap();
        match result.value {
            Val::String(s) => assert_eq!(s.as_bytes(), b"hello world"),
            _ => panic!("Expected string, got {:?}", result.value),
        }
    }

    #[test]
    fn test_with_globals() {
        let mut config = ExecutionConfig::default();
        config.globals.insert("x".to_string(), Val::Int(10));
        config.globals.insert("y".to_string(), Val::Int(5));
        let result = execute_code_with_config("<?php return $x + $y;", config).unwrap();
        assert_eq!(result.value, Val::Int(15));
    }

    #[test]
    fn test_parse_error() {
        assert_code_errors("<?php $x = ;");
    }

    #[test]
    fn test_parse_error_keeps_position() {
        match execute_code("<?php\n  $x = ;") {
            Err(VmError::Syntax(err)) => {
                assert_eq!((err.line, err.column), (2, 8));
                assert!(err.message.starts_with("syntax error, unexpected token \";\""));
            }
            other => panic!("expected a syntax error, got {:?}", other.map(|r| r.stdout)),
        }
    }

    #[test]
    fn test_compile_errors_are_syntax_errors() {
        match execute_code("<?php break;") {
            Err(VmError::Syntax(err)) => assert_eq!(err.line, 1),
            other => panic!("expected a syntax error, got {:?}", other.map(|r| r.stdout)),
        }
    }

    #[test]
    fn test_assert_helpers() {
        assert_code_equals("<?php return 2 * 21;", Val::Int(42));
        assert_code_errors("<?php throw new Exception('x');");
    }

    #[test]
    fn test_output_capture_mixed_with_return() {
        let result = execute_code("<?php echo 'a'; echo \"b\\n\"; return 3;").unwrap();
        assert_eq!(result.stdout, "ab\n");
        assert_eq!(result.value, Val::Int(3));
    }

    #[test]
    fn test_warnings_go_to_stderr() {
        let result = execute_code("<?php echo $undefined ?? 'd', $missing;").unwrap();
        assert_eq!(result.stdout, "d");
        assert!(
            result
                .stderr
                .starts_with("PHP Warning:  Undefined variable $missing in "),
            "{}",
            result.stderr
        );
    }

    #[test]
    fn test_exit_status() {
        let result = execute_code("<?php echo 'x'; exit(3);").unwrap();
        assert_eq!(result.exit_status, 3);
        assert_eq!(result.stdout, "x");
    }

    #[test]
    fn test_timeout_infinite_loop() {
        let config = ExecutionConfig {
            timeout_ms: 50,
            ..ExecutionConfig::default()
        };
        match execute_code_with_config("<?php while (true) {}", config) {
            Err(VmError::Fatal(message)) => {
                assert!(message.contains("Maximum execution time"), "{}", message)
            }
            other => panic!("expected a fatal error, got {:?}", other.map(|r| r.stdout)),
        }
    }

    #[test]
    fn test_time_limit_skips_shutdown_destructors() {
        let config = ExecutionConfig {
            timeout_ms: 50,
            ..ExecutionConfig::default()
        };
        let source = "<?php class D { function __destruct() { echo 'd'; } } $d = new D; while (true) {}";
        assert!(execute_code_with_config(source, config).is_err());
    }

    #[test]
    fn test_interrupt_flag() {
        let flag = Arc::new(AtomicBool::new(true));
        let config = ExecutionConfig {
            interrupt: Some(flag),
            timeout_ms: 0,
            ..ExecutionConfig::default()
        };
        match execute_code_with_config("<?php while (true) {}", config) {
            Err(VmError::Fatal(message)) => assert!(message.contains("Execution interrupted")),
            _ => panic!("expected interruption"),
        }
    }

    #[test]
    fn test_strict_types_default() {
        let config = ExecutionConfig {
            strict_types: true,
            ..ExecutionConfig::default()
        };
        let source = "<?php function f(int $x) { return $x; } try { f('1'); } catch (TypeError $e) { echo 'strict'; }";
        let result = execute_code_with_config(source, config).unwrap();
        assert_eq!(result.stdout, "strict");
    }

    #[test]
    fn test_ini_overrides() {
        let config = ExecutionConfig {
            ini: vec![("precision".to_string(), "4".to_string())],
            ..ExecutionConfig::default()
        };
        let result = execute_code_with_config("<?php echo 1/3;", config).unwrap();
        assert_eq!(result.stdout, "0.3333");
    }

    #[test]
    fn test_profiling() {
        let config = ExecutionConfig {
            enable_profiling: true,
            ..ExecutionConfig::default()
        };
        let result = execute_code_with_config("<?php $a = 1; $b = $a + 1;", config).unwrap();
        assert!(result.instructions.unwrap_or(0) > 0);
        assert!(execute_code("<?php 1;").unwrap().instructions.is_none());
    }
}
