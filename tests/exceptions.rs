mod common;

use common::{expect_error, expect_exception, output_of};
use php_core::vm::engine::VmError;
use php_core::vm::executor::execute_code;

#[test]
fn catch_picks_the_first_matching_clause() {
    let out = output_of(
        r#"<?php
        function risky($n) {
            if ($n == 1) throw new InvalidArgumentException('bad arg');
            if ($n == 2) throw new TypeError('bad type');
            return 'fine';
        }
        foreach ([0, 1, 2] as $n) {
            try { echo risky($n); }
            catch (LogicException | TypeError $e) { echo get_class($e), ':', $e->getMessage(); }
            catch (Exception $e) { echo 'generic'; }
            echo ' ';
        }
        "#,
    );
    assert_eq!(out, "fine InvalidArgumentException:bad arg TypeError:bad type ");
}

#[test]
fn finally_runs_on_every_exit_path() {
    let out = output_of(
        r#"<?php
        function f($mode) {
            try {
                if ($mode == 'throw') throw new Exception('x');
                if ($mode == 'return') return 'returned';
                echo 'body ';
            } catch (Exception $e) {
                echo 'caught ';
            } finally {
                echo 'finally ';
            }
            return 'end';
        }
        echo f('throw'), ' | ', f('return'), ' | ', f('plain');
        "#,
    );
    assert_eq!(
        out,
        "caught finally end | finally returned | body finally end"
    );
}

#[test]
fn finally_return_overrides() {
    let out = output_of(
        "<?php function f() { try { return 'try'; } finally { return 'finally'; } } echo f();",
    );
    assert_eq!(out, "finally");
}

#[test]
fn exceptions_unwind_through_calls() {
    let out = output_of(
        r#"<?php
        function level3() { throw new RuntimeException('deep', 42); }
        function level2() { try { level3(); } finally { echo 'cleanup '; } }
        try { level2(); } catch (RuntimeException $e) { echo $e->getMessage(), ' ', $e->getCode(), ' ', $e->getLine(); }
        "#,
    );
    assert_eq!(out, "cleanup deep 42 2");
}

#[test]
fn rethrow_with_previous() {
    let (class, message) = expect_exception(
        "<?php try { throw new LogicException('inner'); }
         catch (Exception $e) { throw new RuntimeException('outer', 0, $e); }",
    );
    assert_eq!(class, "RuntimeException");
    assert_eq!(message, "outer");
}

#[test]
fn uncaught_exceptions_surface_as_errors() {
    match expect_error("<?php throw new DomainException('nobody catches me');") {
        VmError::Exception(_) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn throwing_non_throwables_is_an_error() {
    let (class, message) = expect_exception("<?php throw new stdClass;");
    assert_eq!(class, "Error");
    assert_eq!(message, "Can only throw objects");
}

#[test]
fn user_exception_hierarchy() {
    let out = output_of(
        r#"<?php
        class AppException extends Exception {}
        class NotFound extends AppException {
            public function __construct(public string $what) { parent::__construct("$what not found", 404); }
        }
        try { throw new NotFound('page'); }
        catch (AppException $e) { echo get_class($e), ' ', $e->getMessage(), ' ', $e->getCode(), ' ', $e->what; }
        "#,
    );
    assert_eq!(out, "NotFound page not found 404 page");
}

#[test]
fn type_errors_from_builtins_are_catchable() {
    let out = output_of(
        "<?php try { strlen([]); } catch (TypeError $e) { echo $e->getMessage(); }",
    );
    assert_eq!(out, "strlen(): Argument #1 ($string) must be of type string, array given");
}

#[test]
fn argument_count_errors() {
    let (class, message) = expect_exception("<?php function two($a, $b) {} two(1);");
    assert_eq!(class, "ArgumentCountError");
    assert!(
        message.starts_with("Too few arguments to function two(), 1 passed"),
        "{}",
        message
    );
}

#[test]
fn warnings_are_reported_and_filtered() {
    let result = execute_code(
        "<?php echo $undefined ?? 'dflt', ' '; echo $missing; error_reporting(0); echo $also_missing; echo 'end';",
    )
    .unwrap();
    assert_eq!(result.stdout, "dflt end");
    let lines: Vec<&str> = result.stderr.lines().collect();
    assert_eq!(lines.len(), 1, "{}", result.stderr);
    assert!(lines[0].starts_with("PHP Warning:  Undefined variable $missing"));
}

#[test]
fn user_errors_go_through_the_handler() {
    let result = execute_code(
        "<?php trigger_error('careful', E_USER_WARNING); trigger_error('note'); echo 'ok';",
    )
    .unwrap();
    assert_eq!(result.stdout, "ok");
    let lines: Vec<&str> = result.stderr.lines().collect();
    assert_eq!(lines.len(), 2, "{}", result.stderr);
    assert!(lines[0].starts_with("PHP Warning:  careful"));
    assert!(lines[1].starts_with("PHP Notice:  note"));

    match expect_error("<?php trigger_error('fatal', E_USER_ERROR); echo 'unreachable';") {
        VmError::Fatal(message) => assert!(message.contains("fatal")),
        other => panic!("unexpected {:?}", other),
    }
}
