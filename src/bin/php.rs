use anyhow::{Context, bail};
use bumpalo::Bump;
use clap::{Parser, ValueEnum};
use php_core::compiler::chunk::CodeChunk;
use php_core::compiler::emitter::Emitter;
use php_core::core::value::{ArrayData, Val};
use php_core::parser::ast::deadcode::{DeclKind, dead_classes, dead_functions};
use php_core::parser::ast::printer::format_source;
use php_core::parser::ast::scope::ScopeAnalysis;
use php_core::parser::ast::sexpr::SexprPrinter;
use php_core::parser::ast::SyntaxError;
use php_core::parser::lexer::token::{TokenCategory, TokenKind};
use php_core::parser::lexer::tokenize;
use php_core::runtime::context::{EngineBuilder, EngineContext, RequestContext};
use php_core::vm::engine::{OutputWriter, StdoutWriter, VM, VmError};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde::Serialize;
use std::cell::RefCell;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Deeply nested scripts recurse through the parser and the engine.
const MAIN_STACK_SIZE: usize = 256 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "php")]
#[command(about = "PHP front-end and evaluation core", long_about = None)]
struct Cli {
    /// Run interactively
    #[arg(short = 'a', long)]
    interactive: bool,

    /// Run CODE without `<?php` tags
    #[arg(short = 'r', value_name = "CODE", conflicts_with = "file")]
    code: Option<String>,

    /// Syntax check only
    #[arg(short = 'l', long)]
    lint: bool,

    /// Print the AST instead of running
    #[arg(long, value_enum, value_name = "FORMAT")]
    dump_ast: Option<AstFormat>,

    /// Print the token stream as JSON instead of running
    #[arg(long)]
    dump_tokens: bool,

    /// Print the script reformatted instead of running
    #[arg(long)]
    format: bool,

    /// List functions, methods and classes nothing refers to
    #[arg(long)]
    dead_code: bool,

    /// Print each variable scope as JSON instead of running
    #[arg(long)]
    dump_scopes: bool,

    /// Set an ini entry, `key=value`
    #[arg(short = 'd', value_name = "KEY=VALUE")]
    define: Vec<String>,

    /// Log engine internals at debug level
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Script file to run
    #[arg(name = "FILE")]
    file: Option<PathBuf>,

    /// Arguments to pass to the script
    #[arg(allow_hyphen_values = true, trailing_var_arg = true)]
    args: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum AstFormat {
    Sexpr,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let worker = std::thread::Builder::new()
        .name("php-main".into())
        .stack_size(MAIN_STACK_SIZE)
        .spawn(move || dispatch(cli))
        .context("failed to start the interpreter thread")?;
    let status = match worker.join() {
        Ok(result) => result?,
        Err(_) => bail!("interpreter thread panicked"),
    };
    std::process::exit(status);
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PHP_CORE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    if cli.interactive {
        run_repl(&cli.define)?;
        return Ok(0);
    }

    let (source, display_name) = match (&cli.code, &cli.file) {
        (Some(code), _) => (format!("<?php {}", code).into_bytes(), "Command line code".to_string()),
        (None, Some(file)) => (
            fs::read(file).with_context(|| format!("Could not open input file: {}", file.display()))?,
            file.to_string_lossy().into_owned(),
        ),
        (None, None) => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            return Ok(0);
        }
    };

    if cli.dump_tokens {
        dump_tokens(&source)?;
        return Ok(0);
    }
    if let Some(format) = cli.dump_ast {
        return dump_ast(&source, &display_name, format);
    }
    if cli.format {
        return format(&source);
    }
    if cli.dead_code {
        return dead_code(&source, &display_name);
    }
    if cli.dump_scopes {
        return dump_scopes(&source);
    }
    if cli.lint {
        return Ok(lint(&source, &display_name));
    }

    run_script(&source, &display_name, cli.file.as_deref(), &cli.args, &cli.define)
}

fn create_engine() -> anyhow::Result<Arc<EngineContext>> {
    EngineBuilder::new()
        .with_core_extensions()
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build engine: {}", e))
}

/// Request context with the `-d` overrides applied, before the VM reads
/// `max_execution_time` from it.
fn create_context(defines: &[String]) -> anyhow::Result<RequestContext> {
    let mut context = RequestContext::new(create_engine()?);
    for define in defines {
        let (key, value) = define.split_once('=').unwrap_or((define.as_str(), "1"));
        if context.config.set(key.trim(), value.trim()).is_none() {
            tracing::warn!(key, "ignoring unknown ini setting");
        }
    }
    Ok(context)
}

fn compile_into(
    source: &[u8],
    file_path: Option<&str>,
    context: &mut RequestContext,
) -> Result<CodeChunk, SyntaxError> {
    let arena = Bump::new();
    let program = php_core::parse(source, &arena)?;
    let mut emitter = Emitter::new(source, &mut context.interner);
    if let Some(path) = file_path {
        emitter = emitter.with_file_path(path.to_string());
    }
    emitter.compile(&program)
}

fn run_script(
    source: &[u8],
    display_name: &str,
    file: Option<&Path>,
    args: &[String],
    defines: &[String],
) -> anyhow::Result<i32> {
    let mut context = create_context(defines)?;
    let canonical = file.map(|path| path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
    let file_path = canonical.as_ref().map(|path| path.to_string_lossy().into_owned());

    let chunk = match compile_into(source, file_path.as_deref(), &mut context) {
        Ok(chunk) => chunk,
        Err(err) => {
            eprintln!("{}", err.to_human_readable_with_path(display_name));
            return Ok(255);
        }
    };

    let mut vm = VM::new_with_context(context);

    let mut argv = vec![Val::from(display_name)];
    argv.extend(args.iter().map(|arg| Val::from(arg.as_str())));
    let argc = argv.len() as i64;
    let argv_sym = vm.context.interner.intern(b"argv");
    let argc_sym = vm.context.interner.intern(b"argc");
    vm.context.globals.insert(argv_sym, Val::from(ArrayData::from_list(argv)));
    vm.context.globals.insert(argc_sym, Val::Int(argc));

    let interrupt = Arc::new(AtomicBool::new(false));
    let flag = interrupt.clone();
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        tracing::warn!(%err, "SIGINT handler not installed");
    }
    vm.set_interrupt_handle(interrupt);

    if let Some(dir) = canonical.as_ref().and_then(|path| path.parent()) {
        std::env::set_current_dir(dir)?;
    }
    Ok(vm.run_to_completion(Rc::new(chunk)))
}

fn lint(source: &[u8], display_name: &str) -> i32 {
    let mut context = match create_context(&[]) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("{}", err);
            return 255;
        }
    };
    match compile_into(source, None, &mut context) {
        Ok(_) => {
            println!("No syntax errors detected in {}", display_name);
            0
        }
        Err(err) => {
            println!("{}", err.to_human_readable_with_path(display_name));
            println!("Errors parsing {}", display_name);
            255
        }
    }
}

fn dump_ast(source: &[u8], display_name: &str, format: AstFormat) -> anyhow::Result<i32> {
    let arena = Bump::new();
    let program = match php_core::parse(source, &arena) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{}", err.snippet(source));
            return Ok(255);
        }
    };
    match format {
        AstFormat::Sexpr => println!("{}", SexprPrinter::new().print_program(&program)),
        AstFormat::Json => {
            let statements: Vec<String> = program
                .statements
                .iter()
                .map(|stmt| SexprPrinter::new().print_stmt(stmt))
                .collect();
            let doc = serde_json::json!({
                "file": display_name,
                "strict_types": program.strict_types,
                "statements": statements,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
    }
    Ok(0)
}

fn format(source: &[u8]) -> anyhow::Result<i32> {
    match format_source(source) {
        Ok(formatted) => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            out.write_all(&formatted)?;
            out.flush()?;
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", err.snippet(source));
            Ok(255)
        }
    }
}

fn dead_code(source: &[u8], display_name: &str) -> anyhow::Result<i32> {
    let arena = Bump::new();
    let program = match php_core::parse(source, &arena) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{}", err.snippet(source));
            return Ok(255);
        }
    };
    let mut dead = dead_functions(&program);
    dead.extend(dead_classes(&program));
    dead.sort_by_key(|decl| decl.name.span.start);
    for decl in &dead {
        let kind = match decl.kind {
            DeclKind::Function => "function",
            DeclKind::Method => "method",
            DeclKind::Class => "class",
            DeclKind::Interface => "interface",
        };
        let name = String::from_utf8_lossy(decl.name.name);
        let line = decl.name.span.line(source);
        match decl.owner {
            Some(owner) => println!(
                "{display_name}:{line}: unused {kind} {}::{name}",
                String::from_utf8_lossy(owner.name)
            ),
            None => println!("{display_name}:{line}: unused {kind} {name}"),
        }
    }
    Ok(0)
}

fn text<'a>(names: impl IntoIterator<Item = &'a [u8]>) -> Vec<String> {
    names
        .into_iter()
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .collect()
}

#[derive(Serialize)]
struct ScopeRecord {
    name: String,
    line: u32,
    parent: Option<usize>,
    params: Vec<String>,
    variables: Vec<String>,
    globals: Vec<String>,
    statics: Vec<String>,
    captures: Vec<String>,
    dynamic: usize,
}

fn dump_scopes(source: &[u8]) -> anyhow::Result<i32> {
    let arena = Bump::new();
    let program = match php_core::parse(source, &arena) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{}", err.snippet(source));
            return Ok(255);
        }
    };
    let analysis = ScopeAnalysis::of(&program);
    let records: Vec<ScopeRecord> = analysis
        .scopes
        .iter()
        .map(|scope| ScopeRecord {
            name: scope.name(),
            line: scope.span.line(source),
            parent: scope.parent,
            params: text(scope.params.iter().copied()),
            variables: text(scope.variables.keys().copied()),
            globals: text(scope.globals.iter().copied()),
            statics: text(scope.statics.iter().copied()),
            captures: text(scope.implicit_captures()),
            dynamic: scope.dynamic.len(),
        })
        .collect();
    let doc = serde_json::json!({
        "scopes": records,
        "superglobals": text(analysis.superglobals.keys().copied()),
    });
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(0)
}

#[derive(Serialize)]
struct TokenRecord {
    kind: TokenKind,
    category: TokenCategory,
    text: String,
    line: usize,
    column: usize,
}

fn dump_tokens(source: &[u8]) -> anyhow::Result<()> {
    let records: Vec<TokenRecord> = tokenize(source)
        .map(|token| {
            let (line, column) = token.position(source);
            TokenRecord {
                kind: token.kind,
                category: token.kind.category(),
                text: String::from_utf8_lossy(token.text(source)).into_owned(),
                line,
                column,
            }
        })
        .collect();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &records)?;
    writeln!(out)?;
    Ok(())
}

#[derive(Default)]
struct ReplOutputState {
    wrote_output: bool,
    last_byte: Option<u8>,
}

impl ReplOutputState {
    fn reset(&mut self) {
        self.wrote_output = false;
        self.last_byte = None;
    }

    fn note_write(&mut self, bytes: &[u8]) {
        if let Some(&last) = bytes.last() {
            self.wrote_output = true;
            self.last_byte = Some(last);
        }
    }

    fn needs_trailing_newline(&self) -> bool {
        self.wrote_output && self.last_byte != Some(b'\n')
    }
}

struct TrackingOutputWriter<W: OutputWriter> {
    inner: W,
    state: Rc<RefCell<ReplOutputState>>,
}

impl<W: OutputWriter> OutputWriter for TrackingOutputWriter<W> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
        self.state.borrow_mut().note_write(bytes);
        self.inner.write(bytes)
    }

    fn flush(&mut self) -> Result<(), VmError> {
        self.inner.flush()
    }
}

/// History lines use readline's escaping: `\040` for space, `\134` for
/// backslash, and so on.
fn decode_history_line(line: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let octal = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
            if let Some(digits) = octal {
                let code = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                if let Ok(byte) = u8::try_from(code) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn encode_history_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for ch in line.chars() {
        match ch {
            ' ' | '\t' | '\n' | '\r' | '\\' => out.push_str(&format!("\\{:03o}", ch as u32)),
            _ => out.push(ch),
        }
    }
    out
}

fn load_history(path: &Path, editor: &mut DefaultEditor) -> anyhow::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let reader = BufReader::new(fs::File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        if line == "_HiStOrY_V2_" {
            continue;
        }
        let decoded = decode_history_line(&line);
        if !decoded.is_empty() {
            let _ = editor.add_history_entry(decoded);
        }
    }
    Ok(())
}

fn save_history(path: &Path, editor: &DefaultEditor) -> anyhow::Result<()> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "_HiStOrY_V2_")?;
    for entry in editor.history().iter() {
        writeln!(file, "{}", encode_history_line(entry))?;
    }
    Ok(())
}

/// Compile and run one REPL line against the long-lived VM. Errors are
/// reported and the VM is reset so the next line starts clean.
fn eval_line(vm: &mut VM, source: &str) {
    let chunk = match compile_into(source.as_bytes(), None, &mut vm.context) {
        Ok(chunk) => chunk,
        Err(err) => {
            eprintln!("{}", err.to_human_readable());
            return;
        }
    };
    if let Err(err) = vm.run(Rc::new(chunk)) {
        vm.report_escaped(err);
        vm.reset_after_error();
    }
    let _ = vm.flush_output();
}

fn run_repl(defines: &[String]) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history_path = std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".php_history"))
        .unwrap_or_else(|_| PathBuf::from(".php_history"));
    if let Err(e) = load_history(&history_path, &mut rl) {
        tracing::warn!(error = %e, "could not load history");
    }

    println!("Interactive shell");
    println!("Type 'exit' or 'quit' to quit");

    let mut vm = VM::new_with_context(create_context(defines)?);
    let output_state = Rc::new(RefCell::new(ReplOutputState::default()));
    vm.set_output_writer(Box::new(TrackingOutputWriter {
        inner: StdoutWriter::default(),
        state: output_state.clone(),
    }));

    loop {
        match rl.readline("php > ") {
            Ok(line) => {
                let line = line.trim();
                if line == "exit" || line == "quit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;
                let source = if line.starts_with("<?php") {
                    line.to_string()
                } else {
                    format!("<?php {}", line)
                };

                output_state.borrow_mut().reset();
                eval_line(&mut vm, &source);
                if output_state.borrow().needs_trailing_newline() {
                    let _ = vm.print_bytes(b"\n");
                    let _ = vm.flush_output();
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = vm.shutdown();
    let _ = vm.flush_output();
    if let Err(e) = save_history(&history_path, &rl) {
        tracing::warn!(error = %e, "could not save history");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl OutputWriter for SharedWriter {
        fn write(&mut self, bytes: &[u8]) -> Result<(), VmError> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> Result<(), VmError> {
            Ok(())
        }
    }

    #[test]
    fn repl_state_survives_errors() {
        let mut vm = VM::new_with_context(create_context(&[]).unwrap());
        let buffer = Arc::new(Mutex::new(Vec::new()));
        vm.set_output_writer(Box::new(SharedWriter(buffer.clone())));
        vm.set_error_handler(Box::new(php_core::vm::engine::CapturingErrorHandler::new(|_, _| {})));

        eval_line(&mut vm, "<?php $x = 40;");
        eval_line(&mut vm, "<?php function f() { throw new Exception('boom'); } f();");
        eval_line(&mut vm, "<?php echo $x + 2;");
        assert_eq!(buffer.lock().unwrap().as_slice(), b"42");
    }

    #[test]
    fn repl_tracks_trailing_newline() {
        let mut state = ReplOutputState::default();
        assert!(!state.needs_trailing_newline());
        state.note_write(b"123");
        assert!(state.needs_trailing_newline());
        state.note_write(b"\n");
        assert!(!state.needs_trailing_newline());
    }

    #[test]
    fn history_escaping_round_trips() {
        let line = "echo 'a b'; // \\ done";
        let encoded = encode_history_line(line);
        assert!(!encoded.contains(' '));
        assert_eq!(decode_history_line(&encoded), line);
        assert_eq!(decode_history_line("\\\\x"), "\\\\x");
    }

    #[test]
    fn defines_apply_before_the_vm_starts() {
        let context = create_context(&["precision=5".to_string()]).unwrap();
        assert_eq!(context.config.precision, 5);
    }
}
