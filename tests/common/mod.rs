//! Shared helpers for the integration tests.
//!
//! Most of them go through `vm::executor`, so every test runs in a fresh
//! request with output captured.

#![allow(dead_code)]

use php_core::compiler::emitter::Emitter;
use php_core::core::value::Val;
use php_core::runtime::context::{EngineBuilder, RequestContext};
use php_core::vm::engine::{CapturingErrorHandler, CapturingOutputWriter, VM, VmError};
use php_core::vm::executor::{
    ExecutionConfig, ExecutionResult, execute_code, execute_code_with_config,
};
use std::rc::Rc;

/// Run `code` (with its `<?php` tag) and return the top-level `return`
/// value. Panics if execution fails.
pub fn run_code(code: &str) -> Val {
    execute_code(code).expect("code execution failed").value
}

/// Run `code` and return its value together with everything it echoed.
pub fn run_code_capture_output(code: &str) -> (Val, String) {
    let result = execute_code(code).expect("code execution failed");
    (result.value, result.stdout)
}

/// Just the echoed output.
pub fn output_of(code: &str) -> String {
    run_code_capture_output(code).1
}

pub fn run_code_with_config(
    code: &str,
    config: ExecutionConfig,
) -> Result<ExecutionResult, VmError> {
    execute_code_with_config(code, config)
}

/// Test defaults: a 10 second limit and captured output.
pub fn test_config() -> ExecutionConfig {
    ExecutionConfig {
        timeout_ms: 10_000,
        capture_output: true,
        ..Default::default()
    }
}

/// Run `code` expecting an uncaught throwable; returns its class name and
/// message.
pub fn expect_exception(code: &str) -> (String, String) {
    let arena = bumpalo::Bump::new();
    let program = php_core::parse(code.as_bytes(), &arena).expect("parse failed");
    let engine = EngineBuilder::new()
        .with_core_extensions()
        .build()
        .expect("engine");
    let mut context = RequestContext::new(engine);
    let chunk = Emitter::new(code.as_bytes(), &mut context.interner)
        .compile(&program)
        .expect("compile failed");

    let mut vm = VM::new_with_context(context);
    vm.set_output_writer(Box::new(CapturingOutputWriter::new(|_: &[u8]| {})));
    vm.set_error_handler(Box::new(CapturingErrorHandler::new(|_, _: &str| {})));
    match vm.run(Rc::new(chunk)) {
        Err(VmError::Exception(exc)) => vm.throwable_summary(&exc),
        Err(other) => panic!("expected an uncaught throwable, got {:?}", other),
        Ok(()) => panic!("expected an uncaught throwable, script completed"),
    }
}

/// Run `code` expecting it to fail, returning the engine error.
pub fn expect_error(code: &str) -> VmError {
    match execute_code(code) {
        Ok(result) => panic!("expected an error, script printed {:?}", result.stdout),
        Err(err) => err,
    }
}
