mod common;

use common::{expect_exception, output_of};
use php_core::vm::executor::execute_code;

#[test]
fn array_pad_grows_either_end() {
    assert_eq!(
        output_of(
            "<?php echo implode(',', array_pad([1, 2], 4, 0)), ' ', implode(',', array_pad([1, 2], -4, 0)), ' ',
             implode(',', array_pad([1, 2, 3], 2, 0)), ' ', count(array_pad([], 0, 'x'));"
        ),
        "1,2,0,0 0,0,1,2 1,2,3 0"
    );
}

#[test]
fn array_pad_renumbers_int_keys_only() {
    let out = output_of(
        "<?php $p = array_pad([5 => 'a', 'k' => 'b'], -4, '-');
         foreach ($p as $key => $value) echo $key, '=', $value, ' ';",
    );
    assert_eq!(out, "0=- 1=- 2=a k=b ");
}

#[test]
fn array_pad_length_coercion() {
    let result = execute_code(
        "<?php echo count(array_pad([], 2.7, 0)), count(array_pad([], true, 0)), count(array_pad([], '3', 0));",
    )
    .unwrap();
    assert_eq!(result.stdout, "213");
    assert!(result.stderr.contains("Implicit conversion from float 2.7 to int loses precision"));

    let result = execute_code("<?php echo count(array_pad([1], null, 0));").unwrap();
    assert_eq!(result.stdout, "1");
    assert!(result.stderr.contains("Passing null to parameter #2 ($length) of type int is deprecated"));
}

#[test]
fn array_pad_rejects_bad_lengths() {
    assert_eq!(
        expect_exception("<?php array_pad([], [], 0);"),
        (
            "TypeError".to_string(),
            "array_pad(): Argument #2 ($length) must be of type int, array given".to_string()
        )
    );
    assert_eq!(
        expect_exception("<?php array_pad([], PHP_INT_MAX, 0);"),
        (
            "ValueError".to_string(),
            "array_pad(): Argument #2 ($length) must not exceed the maximum allowed array size"
                .to_string()
        )
    );
    assert_eq!(
        expect_exception("<?php declare(strict_types=1); array_pad([], '3', 0);").0,
        "TypeError"
    );
}

#[test]
fn string_functions() {
    let out = output_of(
        r#"<?php
        echo strtoupper('abc'), ' ', ucwords('hello big world'), ' ', str_pad('7', 3, '0', STR_PAD_LEFT), ' ';
        echo substr('abcdef', -3, 2), ' ', strrev('abc'), ' ', str_repeat('ab', 3), ' ';
        echo implode('|', explode(',', 'a,b,,c')), ' ', trim("  x \n"), ' ', substr_count('aaa', 'a'), ' ';
        var_dump(strpos('abc', 'd'), str_contains('haystack', 'st'));
        "#,
    );
    assert_eq!(
        out,
        "ABC Hello Big World 007 de cba ababab a|b||c x 3 bool(false)\nbool(true)\n"
    );
}

#[test]
fn formatting_functions() {
    let out = output_of(
        r#"<?php
        echo sprintf('%05.2f|%-4s|%04d|%x|%b|%%|%s', 3.14159, 'ab', 42, 255, 5, true), ' ';
        echo number_format(1234567.891), ' ', number_format(1234.5678, 2), ' ', number_format(0.5), ' ';
        printf('%s-%s', 'a', 'b');
        "#,
    );
    assert_eq!(out, "03.14|ab  |0042|ff|101|%|1 1,234,568 1,234.57 1 a-b");
}

#[test]
fn math_functions() {
    let out = output_of(
        "<?php echo abs(-5), ' ', floor(2.7), ' ', ceil(2.1), ' ', round(2.5), ' ', round(-2.5), ' ',
         max([1, 7, 3]), ' ', min(4, 2, 8), ' ', 2 ** 10, ' ', 2 ** -1, ' ', sqrt(16), ' ', fmod(10, 3), ' ',
         dechex(255), ' ', bindec('101'), ' ', octdec('17');",
    );
    assert_eq!(out, "5 2 3 3 -3 7 2 1024 0.5 4 1 ff 5 15");
}

#[test]
fn seeded_random_is_repeatable() {
    let out = output_of(
        "<?php mt_srand(42); $a = [mt_rand(), mt_rand(1, 6)]; mt_srand(42); $b = [mt_rand(), mt_rand(1, 6)];
         echo $a === $b ? 'same' : 'different', ' ', ($a[1] >= 1 && $a[1] <= 6) ? 'in-range' : 'out';",
    );
    assert_eq!(out, "same in-range");
}

#[test]
fn array_functions() {
    let out = output_of(
        r#"<?php
        $people = [['n' => 'ann', 'a' => 30], ['n' => 'bob', 'a' => 25], ['n' => 'cy', 'a' => 35]];
        usort($people, fn($x, $y) => $x['a'] <=> $y['a']);
        echo implode(',', array_column($people, 'n')), ' ';
        echo implode(',', array_map(fn($x) => $x * 2, array_filter([1, 2, 3, 4], fn($x) => $x % 2 == 0))), ' ';
        echo array_reduce([1, 2, 3], fn($carry, $x) => $carry + $x, 10), ' ';
        echo implode(',', array_keys(array_flip(['a', 'b', 'a']))), ' ';
        echo '[', implode(',', array_slice([1, 2, 3, 4], 1, 2)), '] ';
        var_dump(array_is_list([1 => 'a']), in_array('1', [1, 2], true));
        "#,
    );
    assert_eq!(out, "bob,ann,cy 4,8 16 a,b [2,3] bool(false)\nbool(false)\n");
}

#[test]
fn constants_can_be_defined_and_read() {
    let out = output_of(
        "<?php define('GREETING', 'hi'); const ANSWER = 42;
         var_dump(defined('GREETING'), defined('NOPE'));
         echo GREETING, ' ', constant('ANSWER'), ' ', PHP_EOL === \"\\n\" ? 'eol' : 'other';",
    );
    assert_eq!(out, "bool(true)\nbool(false)\nhi 42 eol");
}

#[test]
fn multibyte_strings() {
    let out = output_of(
        "<?php $s = 'héllo wörld';
         echo strlen($s), ' ', mb_strlen($s), ' ', mb_substr($s, 1, 4), ' ', mb_strtoupper($s), ' ';
         var_dump(mb_check_encoding(\"\\xff\", 'UTF-8'));",
    );
    assert_eq!(out, "13 11 éllo HÉLLO WÖRLD bool(false)\n");
}
