mod common;

use common::{expect_exception, output_of, run_code};
use php_core::core::value::Val;
use php_core::vm::executor::execute_code;

#[test]
fn intdiv_truncates_and_rejects_bad_operands() {
    assert_eq!(
        output_of("<?php echo intdiv(7, 2), ' ', intdiv(-7, 2), ' ', intdiv(7, -2);"),
        "3 -3 -3"
    );
    assert_eq!(
        expect_exception("<?php intdiv(1, 0);"),
        ("DivisionByZeroError".to_string(), "Division by zero".to_string())
    );
    assert_eq!(
        expect_exception("<?php intdiv(PHP_INT_MIN, -1);"),
        (
            "ArithmeticError".to_string(),
            "Division of PHP_INT_MIN by -1 is not an integer".to_string()
        )
    );
}

#[test]
fn division_and_modulo() {
    assert_eq!(run_code("<?php return 6 / 3;"), Val::Int(2));
    assert_eq!(run_code("<?php return 7 / 2;"), Val::Float(3.5));
    assert_eq!(run_code("<?php return -7 % 3;"), Val::Int(-1));
    assert_eq!(
        expect_exception("<?php $z = 0; echo 1 / $z;").1,
        "Division by zero"
    );
    assert_eq!(expect_exception("<?php $z = 0; echo 1 % $z;").1, "Modulo by zero");
}

#[test]
fn integer_overflow_promotes_to_float() {
    assert_eq!(
        run_code("<?php return PHP_INT_MAX + 1;"),
        Val::Float(9223372036854775808.0)
    );
    assert_eq!(
        output_of("<?php echo PHP_INT_MIN - 1, ' ', PHP_INT_MAX * 2, ' ', -PHP_INT_MIN;"),
        "-9.2233720368548E+18 1.844674407371E+19 9.2233720368548E+18"
    );
}

#[test]
fn numeric_strings_and_warnings() {
    let result = execute_code(
        "<?php echo ' 12 ' + 1, ' ', '1e3' + 0, ' ', '12abc' + 1, ' ', 'abc' + 1;",
    )
    .unwrap();
    assert_eq!(result.stdout, "13 1000 13 1");
    assert_eq!(result.stderr.matches("A non-numeric value encountered").count(), 2);
}

#[test]
fn float_printing_uses_precision_and_round_trip_forms() {
    assert_eq!(
        output_of("<?php echo 0.1 + 0.2, ' ', 1/3, ' ', 1e100, ' ', -0.0, ' ', 2.0; var_dump(0.1 + 0.2);"),
        "0.3 0.33333333333333 1.0E+100 -0 2float(0.30000000000000004)\n"
    );
    assert_eq!(output_of("<?php var_export(1.0); echo ' '; var_export(0.5);"), "1.0 0.5");
}

#[test]
fn float_to_int_conversion() {
    assert_eq!(
        output_of("<?php var_dump((int) NAN, (int) INF, (int) -1.9, (int) 1e19);"),
        "int(0)\nint(0)\nint(-1)\nint(-8446744073709551616)\n"
    );
}

#[test]
fn loose_and_strict_equality() {
    let out = output_of(
        r#"<?php
        $cases = [
            [0, 'a'], ['1', '01'], ['10', '1e1'], [100, '1e2'], [null, false],
            [[], false], ['abc', 0], [null, 0], ['', null], [1.0, 1], ['1', ' 1'],
        ];
        foreach ($cases as [$a, $b]) { echo $a == $b ? 'T' : 'F'; }
        echo ' ';
        echo 1 === 1.0 ? 'T' : 'F', [1, 2] === [1, 2] ? 'T' : 'F', [1, 2] === [1 => 2, 0 => 1] ? 'T' : 'F';
        $o = new stdClass; $p = $o; $q = new stdClass;
        echo $o === $p ? 'T' : 'F', $o === $q ? 'T' : 'F', $o == $q ? 'T' : 'F';
        "#,
    );
    assert_eq!(out, "FTTTTTFTTTT FTFTFT");
}

#[test]
fn spaceship_and_relational() {
    assert_eq!(
        output_of("<?php echo 1 <=> 2, 2 <=> 2, 'b' <=> 'a', ' ', [1, 2] <=> [1, 3], ' ', '10' < '9' ? 'T' : 'F', 'abc' < 'b' ? 'T' : 'F';"),
        "-101 -1 FT"
    );
}

#[test]
fn array_key_normalisation() {
    let out = output_of(
        "<?php $a = [];
         $a['8'] = 'int'; $a['08'] = 'str'; $a[1.7] = 'float'; $a[true] = 'bool'; $a[null] = 'null';
         var_dump(array_keys($a));",
    );
    assert_eq!(
        out,
        "array(4) {\n  [0]=>\n  int(8)\n  [1]=>\n  string(2) \"08\"\n  [2]=>\n  int(1)\n  [3]=>\n  string(0) \"\"\n}\n"
    );
    let (class, message) = expect_exception("<?php $a = []; $a[[]] = 1;");
    assert_eq!(class, "TypeError");
    assert_eq!(message, "Illegal offset type");
}

#[test]
fn arrays_keep_insertion_order() {
    let out = output_of(
        "<?php $a = ['x' => 1, 'y' => 2, 'z' => 3];
         $a['y'] = 20; unset($a['x']); $a['x'] = 10; $a[] = 4;
         foreach ($a as $k => $v) echo $k, '=', $v, ' ';",
    );
    assert_eq!(out, "y=20 z=3 x=10 0=4 ");
}

#[test]
fn conversions() {
    let out = output_of(
        r#"<?php var_dump((bool) '0', (bool) '0.0', (bool) [], (bool) [0], (string) false, (string) null, intval('  42abc'), (float) '1.5e3', strval(7.0));"#,
    );
    assert_eq!(
        out,
        "bool(false)\nbool(true)\nbool(false)\nbool(true)\nstring(0) \"\"\nstring(0) \"\"\nint(42)\nfloat(1500)\nstring(1) \"7\"\n"
    );
}
