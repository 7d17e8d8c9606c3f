//! A PHP language front-end and evaluation core.
//!
//! Source goes through the lexer and parser into an arena AST, the emitter
//! turns that into a [`compiler::chunk::CodeChunk`], and the [`vm`] runs
//! the chunk against a fresh request context.
//!
//! ```rust,ignore
//! let script = php_core::compile(b"<?php echo 'hi';")?;
//! let status = php_core::run(&script, Default::default());
//! assert!(status.success());
//! ```

pub mod builtins;
pub mod compiler;
pub mod core;
pub mod parser;
pub mod runtime;
pub mod vm;

use crate::compiler::chunk::CodeChunk;
use crate::compiler::emitter::Emitter;
use crate::core::interner::Interner;
use crate::core::value::Val;
use crate::parser::ast::{Program, SyntaxError};
use crate::runtime::context::{EngineBuilder, EngineContext, RequestContext};
use crate::runtime::registry::ExtensionRegistry;
use crate::vm::engine::VM;
use bumpalo::Bump;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// Parse `source` into an AST owned by `arena`.
pub fn parse<'ast>(source: &[u8], arena: &'ast Bump) -> Result<Program<'ast>, SyntaxError> {
    parser::parser::parse(source, arena)
}

/// A compiled script, ready to run any number of times.
///
/// Names in the chunk are symbols of the interner captured here; every run
/// starts its request from a copy of it.
#[derive(Clone)]
pub struct Script {
    chunk: Rc<CodeChunk>,
    interner: Interner,
    engine: Arc<EngineContext>,
}

impl Script {
    pub fn chunk(&self) -> &CodeChunk {
        &self.chunk
    }

    pub fn strict_types(&self) -> bool {
        self.chunk.strict_types
    }
}

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Script")
            .field("ops", &self.chunk.code.len())
            .field("strict_types", &self.chunk.strict_types)
            .finish()
    }
}

/// Process exit status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub i32);

impl ExitStatus {
    pub fn success(self) -> bool {
        self.0 == 0
    }

    pub fn code(self) -> i32 {
        self.0
    }
}

/// Compile `source` against the standard extensions.
pub fn compile(source: &[u8]) -> Result<Script, SyntaxError> {
    compile_with_path(source, None)
}

/// Like [`compile`], with the path reported by `__FILE__` and diagnostics.
pub fn compile_with_path(source: &[u8], path: Option<&str>) -> Result<Script, SyntaxError> {
    let arena = Bump::new();
    let program = parse(source, &arena)?;
    let mut interner = Interner::new();
    let mut emitter = Emitter::new(source, &mut interner);
    if let Some(path) = path {
        emitter = emitter.with_file_path(path.to_string());
    }
    let chunk = emitter.compile(&program)?;
    let engine = standard_engine();
    Ok(Script {
        chunk: Rc::new(chunk),
        interner,
        engine,
    })
}

fn standard_engine() -> Arc<EngineContext> {
    EngineBuilder::new()
        .with_core_extensions()
        .build()
        .unwrap_or_else(|err| {
            tracing::warn!(%err, "standard extensions failed to load");
            Arc::new(EngineContext {
                registry: ExtensionRegistry::default(),
            })
        })
}

/// Run `script` in a fresh request, writing output to stdout and
/// diagnostics to stderr. Uncaught exceptions and fatal errors are
/// reported and give status 255.
pub fn run(script: &Script, globals: HashMap<String, Val>) -> ExitStatus {
    let context = RequestContext::with_interner(script.engine.clone(), script.interner.clone());
    let mut vm = VM::new_with_context(context);
    for (name, value) in globals {
        let symbol = vm.context.interner.intern(name.as_bytes());
        vm.context.globals.insert(symbol, value);
    }
    ExitStatus(vm.run_to_completion(script.chunk.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_reports_position() {
        let err = compile(b"<?php\n$x = ;").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.to_human_readable().starts_with("PHP Parse error:  "));
    }

    #[test]
    fn scripts_run_repeatedly() {
        let script = compile(b"<?php $n = 1;").unwrap();
        assert!(run(&script, HashMap::new()).success());
        assert!(run(&script, HashMap::new()).success());
    }

    #[test]
    fn exit_and_uncaught_statuses() {
        let script = compile(b"<?php exit($code);").unwrap();
        let globals = HashMap::from([("code".to_string(), Val::Int(3))]);
        assert_eq!(run(&script, globals).code(), 3);

        let script = compile(b"<?php throw new LogicException('x');").unwrap();
        assert_eq!(run(&script, HashMap::new()).code(), 255);
    }
}
