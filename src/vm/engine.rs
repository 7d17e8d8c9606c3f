//! VM engine core
//!
//! The engine runs compiled [`CodeChunk`]s on one operand stack shared by a
//! stack of [`CallFrame`]s. Each frame owns the slice of the operand stack
//! above its `stack_base` and the pending calls above its `pending_base`.
//!
//! ## Delegated Responsibilities
//!
//! - **Dispatch**: [`opcode_executor`](crate::vm::opcode_executor)
//! - **Operators**: [`opcodes`](crate::vm::opcodes)
//! - **Variables and lvalue paths**: [`variable_ops`](crate::vm::variable_ops)
//! - **Calls**: [`callable`](crate::vm::callable)
//! - **Classes**: [`class_resolution`](crate::vm::class_resolution),
//!   [`object_helpers`](crate::vm::object_helpers)
//! - **foreach**: [`iteration`](crate::vm::iteration)
//! - **Generators**: [`generators`](crate::vm::generators)
//! - **Destructors, cycle collection, shutdown**: [`memory`](crate::vm::memory)
//!
//! ## Error Handling
//!
//! Catchable errors are real exception objects carried by
//! [`VmError::Exception`]; [`VM::handle_exception`] walks the catch table of
//! each frame. `Fatal` and `Exit` bypass catch and finally blocks.

use crate::compiler::chunk::{ClassTemplate, CodeChunk};
use crate::core::heap::{ObjectRef, ObjectStore};
use crate::core::value::{Symbol, Val};
use crate::parser::ast::SyntaxError;
use crate::runtime::context::{EngineContext, RequestContext};
use crate::runtime::resource_manager::ResourceError;
use crate::vm::callable::Callable;
use crate::vm::frame::{CallFrame, Completion, GeneratorData};
use crate::vm::stack::Stack;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Frames deeper than this raise an `Error` instead of exhausting memory.
pub const MAX_FRAMES: usize = 20_000;

/// Nested engine re-entries from Rust (natives calling back into scripts,
/// destructors, `__toString`). Each one uses native stack.
pub const MAX_NESTED_CALLS: u32 = 64;

/// Instructions between two time-limit checks.
const TIME_CHECK_INTERVAL: u64 = 1000;

pub enum VmError {
    /// A thrown object; the only kind catch blocks see.
    Exception(ObjectRef),
    /// Non-catchable error, message already carries its location.
    Fatal(String),
    /// `exit`/`die` with a status code.
    Exit(i32),
    /// Internal engine failure.
    RuntimeError(String),
    Resource(ResourceError),
    /// The script did not compile.
    Syntax(SyntaxError),
}

impl fmt::Debug for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Exception(obj) => write!(f, "Exception(#{})", obj.id().handle()),
            VmError::Fatal(msg) => write!(f, "Fatal({:?})", msg),
            VmError::Exit(code) => write!(f, "Exit({})", code),
            VmError::RuntimeError(msg) => write!(f, "RuntimeError({:?})", msg),
            VmError::Resource(err) => write!(f, "Resource({:?})", err),
            VmError::Syntax(err) => write!(f, "Syntax({:?})", err),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Exception(obj) => write!(f, "Uncaught exception object #{}", obj.id().handle()),
            VmError::Fatal(msg) => write!(f, "{}", msg),
            VmError::Exit(code) => write!(f, "exit({})", code),
            VmError::RuntimeError(msg) => write!(f, "{}", msg),
            VmError::Resource(err) => write!(f, "{}", err),
            VmError::Syntax(err) => write!(f, "Parse error: {} on line {}", err.message, err.line),
        }
    }
}

impl std::error::Error for VmError {}

impl From<SyntaxError> for VmError {
    fn from(err: SyntaxError) -> Self {
        VmError::Syntax(err)
    }
}

impl From<ResourceError> for VmError {
    fn from(err: ResourceError) -> Self {
        VmError::Resource(err)
    }
}

/// PHP error levels matching Zend constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    Notice,      // E_NOTICE
    Warning,     // E_WARNING
    Error,       // E_ERROR
    ParseError,  // E_PARSE
    UserNotice,  // E_USER_NOTICE
    UserWarning, // E_USER_WARNING
    UserError,   // E_USER_ERROR
    Deprecated,  // E_DEPRECATED
}

impl ErrorLevel {
    pub fn to_bitmask(self) -> u32 {
        match self {
            ErrorLevel::Error => 1,
            ErrorLevel::Warning => 2,
            ErrorLevel::ParseError => 4,
            ErrorLevel::Notice => 8,
            ErrorLevel::UserError => 256,
            ErrorLevel::UserWarning => 512,
            ErrorLevel::UserNotice => 1024,
            ErrorLevel::Deprecated => 8192,
        }
    }

    /// Label used in `PHP Warning:  ...`.
    pub fn label(self) -> &'static str {
        match self {
            ErrorLevel::Notice | ErrorLevel::UserNotice => "Notice",
            ErrorLevel::Warning | ErrorLevel::UserWarning => "Warning",
            ErrorLevel::Error | ErrorLevel::UserError => "Fatal error",
            ErrorLevel::ParseError => "Parse error",
            ErrorLevel::Deprecated => "Deprecated",
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorLevel::Error | ErrorLevel::UserError | ErrorLevel::ParseError
        )
    }
}

pub trait ErrorHandler {
    /// Report an error/warning/notice at runtime
    fn report(&mut self, level: ErrorLevel, message: &str);
}

/// Default error handler that writes to stderr
pub struct StderrErrorHandler {
    stderr: io::Stderr,
}

impl Default for StderrErrorHandler {
    fn default() -> Self {
        Self {
            stderr: io::stderr(),
        }
    }
}

impl ErrorHandler for StderrErrorHandler {
    fn report(&mut self, level: ErrorLevel, message: &str) {
        let _ = writeln!(self.stderr, "PHP {}:  {}", level.label(), message);
        let _ = self.stderr.flush();
    }
}

/// Capturing error handler for testing and output capture
pub struct CapturingErrorHandler<F: FnMut(ErrorLevel, &str)> {
    callback: F,
}

impl<F: FnMut(ErrorLevel, &str)> CapturingErrorHandler<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(ErrorLevel, &str)> ErrorHandler for CapturingErrorHandler<F> {
    fn report(&mut self, level: ErrorLevel, message: &str) {
        (self.callback)(level, message);
    }
}

pub trait OutputWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError>;
    fn flush(&mut self) -> Result<(), VmError> {
        Ok(())
    }
}

pub struct StdoutWriter {
    stdout: io::Stdout,
}

impl Default for StdoutWriter {
    fn default() -> Self {
        Self {
            stdout: io::stdout(),
        }
    }
}

impl OutputWriter for StdoutWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.stdout
            .write_all(bytes)
            .map_err(|e| VmError::RuntimeError(format!("Failed to write output: {}", e)))
    }

    fn flush(&mut self) -> Result<(), VmError> {
        self.stdout
            .flush()
            .map_err(|e| VmError::RuntimeError(format!("Failed to flush output: {}", e)))
    }
}

/// Capturing output writer for testing
pub struct CapturingOutputWriter<F: FnMut(&[u8])> {
    callback: F,
}

impl<F: FnMut(&[u8])> CapturingOutputWriter<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F: FnMut(&[u8])> OutputWriter for CapturingOutputWriter<F> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        (self.callback)(bytes);
        Ok(())
    }
}

/// A call being set up: the callee is resolved by an `Init*` opcode and the
/// arguments are collected by the `Send*` opcodes that follow.
pub struct PendingCall {
    /// `None` for `new` on a class without a constructor.
    pub callable: Option<Callable>,
    pub args: Vec<Val>,
    /// Object under construction, kept on the operand stack as well.
    pub object: Option<ObjectRef>,
}

/// Lowercase names the engine looks up on every call.
pub(crate) struct MagicNames {
    pub construct: Symbol,
    pub destruct: Symbol,
    pub to_string: Symbol,
    pub invoke: Symbol,
    pub clone: Symbol,
    pub this: Symbol,
    pub get_iterator: Symbol,
    pub current: Symbol,
    pub key: Symbol,
    pub next: Symbol,
    pub valid: Symbol,
    pub rewind: Symbol,
    pub closure: Symbol,
    pub generator: Symbol,
    pub throwable: Symbol,
    pub traversable: Symbol,
    pub iterator: Symbol,
    pub iterator_aggregate: Symbol,
    pub array_access: Symbol,
    pub offset_get: Symbol,
    pub offset_set: Symbol,
    pub offset_exists: Symbol,
    pub offset_unset: Symbol,
    pub message: Symbol,
    pub file: Symbol,
    pub line: Symbol,
    pub previous: Symbol,
}

impl MagicNames {
    fn new(interner: &mut crate::core::interner::Interner) -> Self {
        Self {
            construct: interner.intern(b"__construct"),
            destruct: interner.intern(b"__destruct"),
            to_string: interner.intern(b"__tostring"),
            invoke: interner.intern(b"__invoke"),
            clone: interner.intern(b"__clone"),
            this: interner.intern(b"this"),
            get_iterator: interner.intern(b"getiterator"),
            current: interner.intern(b"current"),
            key: interner.intern(b"key"),
            next: interner.intern(b"next"),
            valid: interner.intern(b"valid"),
            rewind: interner.intern(b"rewind"),
            closure: interner.intern(b"closure"),
            generator: interner.intern(b"generator"),
            throwable: interner.intern(b"throwable"),
            traversable: interner.intern(b"traversable"),
            iterator: interner.intern(b"iterator"),
            iterator_aggregate: interner.intern(b"iteratoraggregate"),
            array_access: interner.intern(b"arrayaccess"),
            offset_get: interner.intern(b"offsetget"),
            offset_set: interner.intern(b"offsetset"),
            offset_exists: interner.intern(b"offsetexists"),
            offset_unset: interner.intern(b"offsetunset"),
            message: interner.intern(b"message"),
            file: interner.intern(b"file"),
            line: interner.intern(b"line"),
            previous: interner.intern(b"previous"),
        }
    }
}

pub struct VM {
    pub operand_stack: Stack,
    pub frames: Vec<CallFrame>,
    pub context: RequestContext,
    pub objects: ObjectStore,
    pub pending_calls: Vec<PendingCall>,
    pub output_writer: Box<dyn OutputWriter>,
    pub error_handler: Box<dyn ErrorHandler>,
    /// Active `@` operators.
    pub(crate) silence_depth: u32,
    /// `$this` of the native methods being run, innermost last, with the
    /// frame depth each was called at.
    pub(crate) native_this: Vec<(usize, Option<ObjectRef>)>,
    /// Values held by Rust code across a call back into the engine.
    pub(crate) native_roots: Vec<Vec<Val>>,
    pub(crate) native_depth: u32,
    /// Every reference cell created, for the cycle collector.
    pub(crate) cells: Vec<Weak<RefCell<Val>>>,
    /// Template each user class was declared from, keyed by lowercase name.
    pub(crate) class_origins: HashMap<Symbol, Rc<ClassTemplate>>,
    pub(crate) time_limit: Option<Duration>,
    pub(crate) started: Instant,
    pub(crate) interrupt: Option<Arc<AtomicBool>>,
    pub(crate) instructions: u64,
    /// A fatal error ended the script; shutdown skips destructors.
    pub(crate) fatal_hit: bool,
    pub(crate) shut_down: bool,
    /// Generators being resumed, innermost last.
    pub(crate) generator_stack: Vec<(ObjectRef, Rc<RefCell<GeneratorData>>)>,
    /// Destructors are being run; releases are queued until they finish.
    pub(crate) draining: bool,
    /// `static $x` declared at top level.
    pub(crate) script_statics: HashMap<Symbol, crate::core::value::Reference>,
    pub(crate) names: MagicNames,
}

impl VM {
    pub fn new(engine_context: Arc<EngineContext>) -> Self {
        Self::new_with_context(RequestContext::new(engine_context))
    }

    pub fn new_with_context(mut context: RequestContext) -> Self {
        let names = MagicNames::new(&mut context.interner);
        let time_limit = match context.config.max_execution_time {
            secs if secs > 0 => Some(Duration::from_secs(secs as u64)),
            _ => None,
        };
        Self {
            operand_stack: Stack::new(),
            frames: Vec::new(),
            context,
            objects: ObjectStore::new(),
            pending_calls: Vec::new(),
            output_writer: Box::new(StdoutWriter::default()),
            error_handler: Box::new(StderrErrorHandler::default()),
            silence_depth: 0,
            native_this: Vec::new(),
            native_roots: Vec::new(),
            native_depth: 0,
            cells: Vec::new(),
            class_origins: HashMap::new(),
            time_limit,
            started: Instant::now(),
            interrupt: None,
            instructions: 0,
            fatal_hit: false,
            shut_down: false,
            generator_stack: Vec::new(),
            draining: false,
            script_statics: HashMap::new(),
            names,
        }
    }

    pub fn with_output_writer(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.output_writer = writer;
        self
    }

    pub fn set_output_writer(&mut self, writer: Box<dyn OutputWriter>) {
        self.output_writer = writer;
    }

    pub fn set_error_handler(&mut self, handler: Box<dyn ErrorHandler>) {
        self.error_handler = handler;
    }

    /// Restart the execution clock with a new limit (`set_time_limit`).
    pub fn set_time_limit(&mut self, limit: Option<Duration>) {
        self.time_limit = limit;
        self.started = Instant::now();
    }

    /// Flag checked at the same safe points as the time limit.
    pub fn set_interrupt_handle(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    pub fn flush_output(&mut self) -> Result<(), VmError> {
        self.output_writer.flush()
    }

    /// Write script output.
    pub fn print_bytes(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.output_writer.write(bytes)
    }

    /// Run a compiled script as the top-level frame. Variables live in the
    /// request's global table.
    pub fn run(&mut self, chunk: Rc<CodeChunk>) -> Result<(), VmError> {
        let mut frame = CallFrame::new(chunk);
        frame.uses_globals = true;
        frame.stack_base = self.operand_stack.len();
        frame.pending_base = self.pending_calls.len();
        frame.silence_at_entry = self.silence_depth;
        let depth = self.frames.len();
        self.frames.push(frame);
        self.run_loop(depth)
    }

    /// Run a script, report what escaped it and shut the request down.
    /// Returns the process exit status.
    pub fn run_to_completion(&mut self, chunk: Rc<CodeChunk>) -> i32 {
        let status = match self.run(chunk) {
            Ok(()) => 0,
            Err(err) => self.report_escaped(err),
        };
        let status = match self.shutdown() {
            Ok(()) => status,
            Err(err) => self.report_escaped(err),
        };
        let _ = self.flush_output();
        status
    }

    /// Drop whatever an escaped error left on the frame and operand
    /// stacks, so the next chunk can run against the same globals.
    pub fn reset_after_error(&mut self) {
        self.frames.clear();
        self.operand_stack.truncate(0);
        self.pending_calls.clear();
        self.native_this.clear();
        self.native_roots.clear();
        self.native_depth = 0;
        self.generator_stack.clear();
        self.silence_depth = 0;
    }

    /// Report an error that left the script and turn it into an exit status.
    pub fn report_escaped(&mut self, err: VmError) -> i32 {
        match err {
            VmError::Exit(code) => code,
            VmError::Exception(exc) => {
                let message = self.uncaught_message(&exc);
                self.emit_error(ErrorLevel::Error, &message);
                255
            }
            VmError::Fatal(message) => {
                self.fatal_hit = true;
                self.emit_error(ErrorLevel::Error, &message);
                255
            }
            VmError::RuntimeError(message) => {
                self.emit_error(ErrorLevel::Error, &message);
                255
            }
            VmError::Resource(err) => {
                self.emit_error(ErrorLevel::Error, &err.to_string());
                255
            }
            VmError::Syntax(err) => {
                self.emit_error(ErrorLevel::ParseError, &err.message);
                255
            }
        }
    }

    /// Execute until the frame stack shrinks back to `target_depth`.
    pub(crate) fn run_loop(&mut self, target_depth: usize) -> Result<(), VmError> {
        while self.frames.len() > target_depth {
            if let Err(err) = self.step() {
                match err {
                    VmError::Exception(exc) => self.handle_exception(exc, target_depth)?,
                    other => return Err(other),
                }
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<(), VmError> {
        if self.objects.has_released() {
            self.drain_releases()?;
        }
        if self.native_depth == 0
            && self.context.config.enable_gc
            && self.objects.allocated_since_collect >= self.context.config.gc_threshold
        {
            self.collect_cycles()?;
        }
        self.instructions = self.instructions.wrapping_add(1);
        if self.instructions % TIME_CHECK_INTERVAL == 0 {
            self.check_time_limit()?;
        }

        let op = {
            let frame = self.current_frame_mut()?;
            match frame.chunk.code.get(frame.ip) {
                Some(op) => {
                    let op = *op;
                    frame.ip += 1;
                    op
                }
                None => crate::vm::opcode::OpCode::ReturnVoid,
            }
        };
        self.execute_opcode(op)
    }

    /// Unwind to the innermost handler for `exc`. Returns the exception
    /// again once the frame stack reaches `target_depth` without a handler.
    pub(crate) fn handle_exception(
        &mut self,
        exc: ObjectRef,
        target_depth: usize,
    ) -> Result<(), VmError> {
        loop {
            if self.frames.len() <= target_depth {
                return Err(VmError::Exception(exc));
            }
            let (chunk, op_ip) = match self.frames.last() {
                Some(frame) => (frame.chunk.clone(), frame.ip.saturating_sub(1) as u32),
                None => return Err(VmError::Exception(exc)),
            };
            for entry in chunk.catch_table.iter() {
                if !entry.covers(op_ip) {
                    continue;
                }
                if let Some(target) = entry.catch_target {
                    self.unwind_frame_to(entry.iter_depth, entry.completion_depth);
                    self.operand_stack.push(Val::Object(exc));
                    self.current_frame_mut()?.ip = target as usize;
                    return Ok(());
                }
                if let Some(target) = entry.finally_target {
                    self.unwind_frame_to(entry.iter_depth, entry.completion_depth);
                    let frame = self.current_frame_mut()?;
                    frame.completions.push(Completion::Throw(exc));
                    frame.ip = target as usize;
                    return Ok(());
                }
            }
            self.pop_frame_discarding();
        }
    }

    /// Reset the current frame to statement level before entering a handler.
    pub(crate) fn unwind_frame_to(&mut self, iter_depth: u16, completion_depth: u16) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        self.operand_stack.truncate(frame.stack_base);
        self.pending_calls.truncate(frame.pending_base);
        frame.iterators.truncate(iter_depth as usize);
        frame.completions.truncate(completion_depth as usize);
        self.silence_depth = frame.silence_at_entry;
    }

    /// Drop the current frame and everything it left on the stacks.
    pub(crate) fn pop_frame_discarding(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.operand_stack.truncate(frame.stack_base);
            self.pending_calls.truncate(frame.pending_base);
            self.silence_depth = frame.silence_at_entry;
        }
    }

    /// Check the execution deadline and the interrupt flag.
    pub(crate) fn check_time_limit(&mut self) -> Result<(), VmError> {
        if let Some(flag) = &self.interrupt {
            if flag.load(Ordering::Relaxed) {
                tracing::warn!("execution interrupted");
                self.fatal_hit = true;
                return Err(self.fatal("Execution interrupted"));
            }
        }
        if let Some(limit) = self.time_limit {
            if self.started.elapsed() >= limit {
                let secs = limit_seconds(limit);
                tracing::warn!(seconds = secs, "time limit exceeded");
                self.fatal_hit = true;
                return Err(self.fatal(&format!(
                    "Maximum execution time of {} second{} exceeded",
                    secs,
                    if secs == 1 { "" } else { "s" }
                )));
            }
        }
        Ok(())
    }

    /// Build a non-catchable error located at the current instruction.
    pub(crate) fn fatal(&self, message: &str) -> VmError {
        VmError::Fatal(format!(
            "{} in {} on line {}",
            message,
            self.current_file(),
            self.current_line()
        ))
    }

    /// Report a diagnostic at the current location, honoring `@`,
    /// `error_reporting` and `display_errors`.
    pub fn report(&mut self, level: ErrorLevel, message: &str) {
        if self.silence_depth > 0 && !level.is_fatal() {
            return;
        }
        if self.context.config.error_reporting & level.to_bitmask() as i64 == 0 {
            return;
        }
        let message = format!(
            "{} in {} on line {}",
            message,
            self.current_file(),
            self.current_line()
        );
        self.emit_error(level, &message);
    }

    /// Hand a fully formatted message to the error handler.
    pub(crate) fn emit_error(&mut self, level: ErrorLevel, message: &str) {
        if !self.context.config.display_errors {
            return;
        }
        self.error_handler.report(level, message);
    }

    pub(crate) fn warn(&mut self, message: &str) {
        self.report(ErrorLevel::Warning, message);
    }

    pub(crate) fn notice(&mut self, message: &str) {
        self.report(ErrorLevel::Notice, message);
    }

    pub(crate) fn deprecated(&mut self, message: &str) {
        self.report(ErrorLevel::Deprecated, message);
    }

    /// Report warnings collected by a pure operator function.
    pub(crate) fn flush_warnings(&mut self, warnings: &[&'static str]) -> Result<(), VmError> {
        for warning in warnings {
            self.warn(warning);
        }
        Ok(())
    }

    pub(crate) fn current_file(&self) -> String {
        match self.frames.last() {
            Some(frame) => frame.chunk.file.to_string(),
            None => "Unknown".to_string(),
        }
    }

    pub(crate) fn current_line(&self) -> u32 {
        self.frames.last().map(|f| f.line()).unwrap_or(0)
    }
}

/// Whole seconds reported for a time limit; sub-second limits round up.
fn limit_seconds(limit: Duration) -> u64 {
    limit.as_secs() + u64::from(limit.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::EngineBuilder;

    fn vm() -> VM {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        VM::new(engine)
    }

    #[test]
    fn time_limits_report_whole_seconds() {
        assert_eq!(limit_seconds(Duration::from_millis(100)), 1);
        assert_eq!(limit_seconds(Duration::from_secs(30)), 30);
        assert_eq!(limit_seconds(Duration::from_millis(2500)), 3);
    }

    #[test]
    fn error_levels_map_to_zend_bits() {
        assert_eq!(ErrorLevel::Warning.to_bitmask(), 2);
        assert_eq!(ErrorLevel::Deprecated.to_bitmask(), 8192);
        assert_eq!(ErrorLevel::UserError.label(), "Fatal error");
    }

    #[test]
    fn silenced_and_filtered_reports_are_dropped() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut vm = vm();
        vm.set_error_handler(Box::new(CapturingErrorHandler::new(move |level, msg: &str| {
            sink.borrow_mut().push((level, msg.to_string()));
        })));
        vm.report(ErrorLevel::Warning, "first");
        vm.silence_depth = 1;
        vm.report(ErrorLevel::Warning, "silenced");
        vm.silence_depth = 0;
        vm.context.config.error_reporting = 0;
        vm.report(ErrorLevel::Notice, "filtered");
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.starts_with("first in "));
    }

    #[test]
    fn interrupt_flag_trips_fatal() {
        let mut vm = vm();
        let flag = Arc::new(AtomicBool::new(true));
        vm.set_interrupt_handle(flag);
        match vm.check_time_limit() {
            Err(VmError::Fatal(msg)) => assert!(msg.starts_with("Execution interrupted")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(vm.fatal_hit);
    }
}
