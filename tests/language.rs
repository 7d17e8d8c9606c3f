mod common;

use common::{expect_exception, output_of, run_code};
use php_core::core::value::Val;

#[test]
fn functions_with_defaults_refs_and_variadics() {
    let out = output_of(
        r#"<?php
        function greet($name, $greeting = 'Hello') { return "$greeting, $name!"; }
        function bump(&$n, $by = 1) { $n += $by; }
        function total(int ...$nums) { return array_sum($nums); }
        $x = 1; bump($x); bump($x, 5);
        echo greet('Ann'), ' ', greet('Bo', 'Hi'), ' ', $x, ' ', total(1, 2, 3), ' ', total(...[4, 5]);
        "#,
    );
    assert_eq!(out, "Hello, Ann! Hi, Bo! 7 6 9");
}

#[test]
fn closures_capture_by_value_and_reference() {
    let out = output_of(
        r#"<?php
        $n = 1;
        $byValue = function () use ($n) { return $n; };
        $byRef = function () use (&$n) { return $n; };
        $arrow = fn($x) => $x + $n;
        $n = 10;
        echo $byValue(), ' ', $byRef(), ' ', $arrow(5);
        "#,
    );
    assert_eq!(out, "1 10 6");
}

#[test]
fn static_variables_persist_between_calls() {
    let out = output_of(
        "<?php function counter() { static $c = 0; return ++$c; }
         counter(); counter(); echo counter();",
    );
    assert_eq!(out, "3");
}

#[test]
fn match_and_switch() {
    let out = output_of(
        r#"<?php
        function kind($v) {
            return match (true) {
                is_int($v) => 'int',
                is_string($v) => 'string',
                default => 'other',
            };
        }
        echo kind(1), kind('a'), kind(1.5), ' ';
        switch (2) {
            case 1: echo 'one';
            case 2: echo 'two';
            case 3: echo 'three'; break;
            default: echo 'default';
        }
        "#,
    );
    assert_eq!(out, "intstringother twothree");
}

#[test]
fn unmatched_match_throws() {
    let (class, message) = expect_exception("<?php echo match (5) { 1 => 'a' };");
    assert_eq!(class, "UnhandledMatchError");
    assert_eq!(message, "Unhandled match case 5");
}

#[test]
fn break_and_continue_with_levels() {
    let out = output_of(
        "<?php for ($i = 0; $i < 3; $i++) {
             foreach ([1, 2, 3] as $j) {
                 if ($j == 2) continue 2;
                 if ($i == 2) break 2;
                 echo $i, $j, ' ';
             }
         }
         echo 'done';",
    );
    assert_eq!(out, "01 11 done");
}

#[test]
fn destructuring_assignments() {
    let out = output_of(
        "<?php [$a, [$b, $c]] = [1, [2, 3]];
         list('x' => $x, 'y' => $y) = ['y' => 'Y', 'x' => 'X'];
         [, $second] = ['skip', 'kept'];
         [$a, $b] = [$b, $a];
         echo $a, $b, $c, $x, $y, $second;",
    );
    assert_eq!(out, "213XYkept");
}

#[test]
fn string_interpolation_forms() {
    let out = output_of(
        r#"<?php
        $name = 'World'; $arr = ['k' => 'v', 2 => 'two']; $obj = new stdClass; $obj->p = 'prop';
        echo "Hi $name! {$arr['k']} $arr[k] $arr[2] $obj->p {$obj->p}s ${name}";
        "#,
    );
    assert_eq!(out, "Hi World! v v two prop props World");
}

#[test]
fn heredoc_strips_closing_indentation() {
    let out = output_of(
        "<?php $x = 'in';
         echo <<<EOT
             a $x
               b
             EOT;
         echo '|', <<<'RAW'
           $x
           RAW;",
    );
    assert_eq!(out, "a in\n  b|$x");
}

#[test]
fn magic_constants() {
    let out = output_of(
        "<?php class K { function m() { return __CLASS__ . ' ' . __FUNCTION__ . ' ' . __METHOD__; } }
         function f() { return __FUNCTION__; }
         echo __LINE__, ' ', (new K)->m(), ' ', f();",
    );
    assert_eq!(out, "3 K m K::m f");
}

#[test]
fn strict_types_rejects_scalar_juggling() {
    let (class, message) = expect_exception(
        "<?php declare(strict_types=1);
         function half(int $n) { return $n / 2; }
         half('4');",
    );
    assert_eq!(class, "TypeError");
    assert!(message.starts_with("half(): Argument #1 ($n) must be of type int, string given"), "{}", message);

    assert_eq!(
        run_code("<?php function half(int $n) { return $n / 2; } return half('4');"),
        Val::Int(2)
    );
}

#[test]
fn return_type_violation_is_a_type_error() {
    let (class, message) = expect_exception("<?php function f(): int { return []; } f();");
    assert_eq!(class, "TypeError");
    assert_eq!(message, "f(): Return value must be of type int, array returned");
}

#[test]
fn silence_operator_hides_warnings() {
    let result = php_core::vm::executor::execute_code(
        "<?php $a = []; $x = @$a['missing']; $y = $a['missing']; echo 'ok';",
    )
    .unwrap();
    assert_eq!(result.stdout, "ok");
    assert_eq!(result.stderr.matches("Undefined array key").count(), 1);
}

#[test]
fn exit_stops_the_script() {
    let result =
        php_core::vm::executor::execute_code("<?php echo 'a'; exit(4); echo 'b';").unwrap();
    assert_eq!(result.stdout, "a");
    assert_eq!(result.exit_status, 4);

    let result = php_core::vm::executor::execute_code("<?php die('bye'); echo 'b';").unwrap();
    assert_eq!(result.stdout, "bye");
    assert_eq!(result.exit_status, 0);
}

#[test]
fn global_statement_binds_to_the_global_table() {
    let out = output_of(
        "<?php $count = 1;
         function inc() { global $count; $count++; }
         inc(); inc(); echo $count;",
    );
    assert_eq!(out, "3");
}

#[test]
fn unsupported_syntax_is_rejected_at_compile_time() {
    let err = php_core::compile(b"<?php\nnamespace App;\n").unwrap_err();
    assert_eq!(err.line, 2);
    let err = php_core::compile(b"<?php interface I { function m() { } }").unwrap_err();
    assert_eq!(err.line, 1);
}
