//! Sweep over the fixture scripts in `tests/corpus/`: every file lexes to
//! end-of-input, compiles or fails with a positioned syntax error, and
//! runs under a short time limit without panicking.

mod common;

use php_core::parser::lexer::token::TokenKind;
use php_core::parser::lexer::tokenize;
use php_core::vm::engine::VmError;
use php_core::vm::executor::ExecutionConfig;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn fixtures() -> Vec<PathBuf> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/corpus");
    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_map(Result::ok)
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "php"))
        .collect();
    files.sort();
    assert!(!files.is_empty(), "no fixtures under {}", root.display());
    files
}

#[test]
fn every_fixture_lexes_to_end_of_input() {
    for path in fixtures() {
        let source = std::fs::read(&path).unwrap();
        let tokens: Vec<_> = tokenize(&source).collect();
        let last = tokens.last().map(|token| token.kind);
        assert_eq!(last, Some(TokenKind::Eof), "{}", path.display());
    }
}

#[test]
fn every_fixture_compiles_or_reports_a_position() {
    let mut compiled = 0;
    for path in fixtures() {
        let source = std::fs::read(&path).unwrap();
        match php_core::compile(&source) {
            Ok(_) => compiled += 1,
            Err(err) => {
                assert!(err.line >= 1, "{}: {:?}", path.display(), err);
                assert!(err.column >= 1, "{}: {:?}", path.display(), err);
                assert!(!err.message.is_empty(), "{}", path.display());
            }
        }
    }
    assert!(compiled > 0);
}

#[test]
fn truncated_fixtures_never_panic() {
    for path in fixtures().into_iter().step_by(7) {
        let source = std::fs::read(&path).unwrap();
        for cut in [source.len() / 3, source.len() / 2, source.len() * 2 / 3] {
            let _ = php_core::compile(&source[..cut]);
        }
    }
}

/// Scripts that touch the filesystem are left out of the run sweep.
fn writes_files(source: &str) -> bool {
    ["unlink", "file_put_contents", "fopen", "error_log", "mkdir", "rmdir", "rename", "touch"]
        .iter()
        .any(|name| source.contains(name))
}

#[test]
fn fixtures_run_under_a_short_time_limit() {
    for path in fixtures() {
        let source = String::from_utf8_lossy(&std::fs::read(&path).unwrap()).into_owned();
        if writes_files(&source) || php_core::compile(source.as_bytes()).is_err() {
            continue;
        }
        let config = ExecutionConfig {
            timeout_ms: 200,
            file_path: Some(path.to_string_lossy().into_owned()),
            ..Default::default()
        };
        if let Err(VmError::Exit(code)) = common::run_code_with_config(&source, config) {
            panic!("{}: exit({}) escaped the executor", path.display(), code);
        }
    }
}

fn nested(open: &str, inner: &str, close: &str, depth: usize) -> String {
    format!("<?php {}{}{};", open.repeat(depth), inner, close.repeat(depth))
}

#[test]
fn deep_nesting_is_a_syntax_error() {
    let cases = [
        format!("<?php echo {}1{};", "(".repeat(20_000), ")".repeat(20_000)),
        nested("[", "1", "]", 20_000),
        nested("if (1) { ", "echo 1;", " }", 20_000),
        nested("$f = function () { ", "return 1;", " };", 5_000),
        nested("$a = ", "1", "", 20_000),
        format!("<?php echo {}1;", "- ".repeat(20_000)),
        format!("<?php echo {}2;", "2 ** ".repeat(20_000)),
    ];
    for source in cases {
        match php_core::compile(source.as_bytes()) {
            Err(err) => {
                assert_eq!(err.message, "Maximum nesting depth exceeded", "{}", &source[..40]);
                assert_eq!(err.line, 1);
            }
            Ok(_) => panic!("{} compiled", &source[..40]),
        }
    }
}

#[test]
fn moderate_nesting_still_compiles() {
    let source = nested("echo (", "1", ")", 50);
    assert!(php_core::compile(source.as_bytes()).is_ok());
    let source = nested("if (1) { ", "echo 1;", " }", 40);
    assert!(php_core::compile(source.as_bytes()).is_ok());
}

#[test]
fn long_left_associative_chains_compile_and_run() {
    let concat = vec!["'a'"; 20_000].join(" . ");
    let result = common::run_code_with_config(
        &format!("<?php echo strlen({});", concat),
        common::test_config(),
    )
    .unwrap();
    assert_eq!(result.stdout, "20000");

    let sum = vec!["1"; 20_000].join(" + ");
    let result =
        common::run_code_with_config(&format!("<?php echo {};", sum), common::test_config())
            .unwrap();
    assert_eq!(result.stdout, "20000");

    let dims = "[0]".repeat(5_000);
    let source = format!("<?php $a = []; $a{dims} = 'deep'; echo $a{dims}; unset($a); echo ' ok';");
    let result = common::run_code_with_config(&source, common::test_config()).unwrap();
    assert_eq!(result.stdout, "deep ok");
}

#[test]
fn deeply_nested_values_are_released() {
    let result = common::run_code_with_config(
        "<?php $a = []; for ($i = 0; $i < 100000; $i++) { $a = [$a]; } unset($a);
         $r = []; for ($i = 0; $i < 100000; $i++) { $r = [&$r]; } unset($r);
         echo 'done';",
        common::test_config(),
    )
    .unwrap();
    assert_eq!(result.stdout, "done");
}

#[test]
fn deep_values_serialize_and_compare() {
    let build = "$a = []; $b = []; for ($i = 0; $i < 50000; $i++) { $a = [$a]; $b = [$b]; }";
    let result = common::run_code_with_config(
        &format!("<?php {build} echo strlen(serialize($a)), ' '; var_dump($a === $b);"),
        common::test_config(),
    )
    .unwrap();
    assert_eq!(result.stdout, "500006 bool(true)\n");

    match common::run_code_with_config(&format!("<?php {build} var_dump($a == $b);"), common::test_config()) {
        Err(VmError::Fatal(message)) => assert!(
            message.starts_with("Nesting level too deep - recursive dependency?"),
            "{}",
            message
        ),
        other => panic!("expected a fatal error, got {:?}", other.map(|r| r.stdout)),
    }
}

#[test]
fn deep_payloads_unserialize_or_fail_cleanly() {
    let result = common::run_code_with_config(
        "<?php $a = 'leaf'; for ($i = 0; $i < 3000; $i++) { $a = [$a]; }
         var_dump(unserialize(serialize($a)) === $a);
         $p = str_repeat('a:1:{i:0;', 100000) . 'N;' . str_repeat('}', 100000);
         var_dump(unserialize($p));",
        common::test_config(),
    )
    .unwrap();
    assert_eq!(result.stdout, "bool(true)\nbool(false)\n");
    assert!(result.stderr.contains("unserialize(): Error at offset"), "{}", result.stderr);
}
