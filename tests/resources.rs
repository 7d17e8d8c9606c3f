mod common;

use common::output_of;
use php_core::compiler::emitter::Emitter;
use php_core::runtime::context::{EngineBuilder, RequestContext};
use php_core::runtime::resource_manager::ResourceKind;
use php_core::vm::engine::{CapturingErrorHandler, CapturingOutputWriter, VM};
use php_core::vm::executor::execute_code;
use std::cell::RefCell;
use std::io::{self, SeekFrom};
use std::rc::Rc;

/// Upper-cases everything written to it.
#[derive(Default)]
struct ShoutStream {
    data: Vec<u8>,
    pos: usize,
}

impl ShoutStream {
    fn open(_path: &str, _mode: &str) -> io::Result<Box<dyn ResourceKind>> {
        Ok(Box::<ShoutStream>::default())
    }
}

impl ResourceKind for ShoutStream {
    fn name(&self) -> &'static str {
        "shout"
    }

    fn read(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let end = (self.pos + len).min(self.data.len());
        let chunk = self.data[self.pos..end].to_vec();
        self.pos = end;
        Ok(chunk)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.data.extend(data.iter().map(u8::to_ascii_uppercase));
        Ok(data.len())
    }

    fn eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = match pos {
            SeekFrom::Start(n) => n as usize,
            _ => return Err(io::Error::new(io::ErrorKind::Unsupported, "start only")),
        };
        Ok(self.pos as u64)
    }
}

fn run_with_shout_streams(code: &str) -> (String, Vec<String>) {
    let arena = bumpalo::Bump::new();
    let program = php_core::parse(code.as_bytes(), &arena).unwrap();
    let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
    let mut context = RequestContext::new(engine);
    context.resources.register_kind("shout://", ShoutStream::open);
    let chunk = Emitter::new(code.as_bytes(), &mut context.interner)
        .compile(&program)
        .unwrap();

    let out = Rc::new(RefCell::new(Vec::new()));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let mut vm = VM::new_with_context(context);
    let sink = out.clone();
    vm.set_output_writer(Box::new(CapturingOutputWriter::new(move |bytes: &[u8]| {
        sink.borrow_mut().extend_from_slice(bytes);
    })));
    let log = errors.clone();
    vm.set_error_handler(Box::new(CapturingErrorHandler::new(move |_, message: &str| {
        log.borrow_mut().push(message.to_string());
    })));
    vm.run(Rc::new(chunk)).unwrap();
    vm.shutdown().unwrap();
    vm.flush_output().unwrap();
    assert_eq!(vm.context.resources.open_count(), 0);

    let stdout = String::from_utf8_lossy(&out.borrow()).into_owned();
    let messages = errors.borrow().clone();
    (stdout, messages)
}

#[test]
fn registered_kinds_back_fopen() {
    let (out, errors) = run_with_shout_streams(
        "<?php $h = fopen('shout://anything', 'w+');
         fwrite($h, 'quiet words'); rewind($h);
         echo fread($h, 100), ' ', get_resource_type($h);
         $left_open = fopen('shout://other', 'r');",
    );
    assert_eq!(out, "QUIET WORDS shout");
    assert!(errors.is_empty(), "{:?}", errors);
}

#[test]
fn closing_twice_warns_and_returns_false() {
    let (out, errors) = run_with_shout_streams(
        "<?php $h = fopen('shout://x', 'w'); var_dump(fclose($h), fclose($h));",
    );
    assert_eq!(out, "bool(true)\nbool(false)\n");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("fclose(): supplied resource is not a valid stream resource"));
}

#[test]
fn closed_handles_reject_io() {
    let out = output_of(
        "<?php $h = fopen('php://memory', 'w+'); fclose($h);
         foreach (['fwrite' => fn() => fwrite($h, 'x'), 'feof' => fn() => feof($h)] as $name => $op) {
             try { $op(); } catch (TypeError $e) { echo $e->getMessage(), \"\\n\"; }
         }",
    );
    assert_eq!(
        out,
        "fwrite(): supplied resource is not a valid stream resource\nfeof(): supplied resource is not a valid stream resource\n"
    );
}

#[test]
fn resources_print_with_their_id() {
    let out = output_of(
        "<?php $a = fopen('php://memory', 'r'); $b = fopen('php://memory', 'r');
         echo (int) $b - (int) $a, ' ', gettype($a); fclose($a); echo ' ', gettype($a);",
    );
    assert_eq!(out, "1 resource resource (closed)");
}

#[test]
fn missing_files_warn() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.txt").to_string_lossy().replace('\\', "/");
    let result = execute_code(&format!("<?php var_dump(fopen('{}', 'r'));", path)).unwrap();
    assert_eq!(result.stdout, "bool(false)\n");
    assert!(result.stderr.contains("Failed to open stream"), "{}", result.stderr);
}
