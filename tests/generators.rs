mod common;

use common::{expect_exception, output_of};

#[test]
fn generators_yield_keys_and_values_lazily() {
    let out = output_of(
        r#"<?php
        function numbers() {
            echo '[start]';
            yield 'a' => 1;
            yield 'b' => 2;
            echo '[end]';
            return 3;
        }
        $g = numbers();
        echo 'created ';
        foreach ($g as $k => $v) { echo "$k=$v "; }
        echo $g->getReturn();
        "#,
    );
    assert_eq!(out, "created [start]a=1 b=2 [end]3");
}

#[test]
fn send_resumes_with_a_value() {
    let out = output_of(
        r#"<?php
        function logger() {
            while (true) {
                $line = yield;
                if ($line === null) return;
                echo "got $line ";
            }
        }
        $g = logger();
        $g->current();
        $g->send('one');
        $g->send('two');
        $g->send(null);
        var_dump($g->valid());
        "#,
    );
    assert_eq!(out, "got one got two bool(false)\n");
}

#[test]
fn yield_from_delegates_and_returns() {
    let out = output_of(
        r#"<?php
        function inner() { yield 1; yield 2; return 'inner done'; }
        function outer() {
            $r = yield from inner();
            echo "($r) ";
            yield from [10, 20];
            yield 3;
        }
        foreach (outer() as $v) { echo $v, ' '; }
        "#,
    );
    assert_eq!(out, "1 2 (inner done) 10 20 3 ");
}

#[test]
fn throw_into_a_generator() {
    let out = output_of(
        r#"<?php
        function guarded() {
            try { yield 1; yield 2; }
            catch (RuntimeException $e) { echo 'caught ', $e->getMessage(), ' '; yield 99; }
        }
        $g = guarded();
        echo $g->current(), ' ';
        echo $g->throw(new RuntimeException('stop')), ' ';
        $g->next();
        var_dump($g->valid());
        "#,
    );
    assert_eq!(out, "1 caught stop 99 bool(false)\n");
}

#[test]
fn finished_generators_cannot_be_traversed_again() {
    let (class, message) = expect_exception(
        "<?php function g() { yield 1; } $g = g(); foreach ($g as $v) {} foreach ($g as $v) {}",
    );
    assert_eq!(class, "Exception");
    assert_eq!(message, "Cannot traverse an already closed generator");
}

#[test]
fn rewind_after_advancing_fails() {
    let (class, message) = expect_exception(
        "<?php function g() { yield 1; yield 2; } $g = g(); $g->next(); $g->next(); $g->rewind();",
    );
    assert_eq!(class, "Exception");
    assert_eq!(message, "Cannot rewind a generator that was already run");
}

#[test]
fn deeply_nested_generators() {
    let out = output_of(
        r#"<?php
        function nest($depth) {
            if ($depth === 0) { yield 'leaf'; return; }
            yield from nest($depth - 1);
        }
        foreach (nest(40) as $v) echo $v;
        "#,
    );
    assert_eq!(out, "leaf");
}

#[test]
fn generator_keys_auto_increment() {
    let out = output_of(
        "<?php function g() { yield 'a'; yield 5 => 'b'; yield 'c'; }
         foreach (g() as $k => $v) echo $k, $v, ' ';
         echo implode(',', iterator_to_array(g(), false));",
    );
    assert_eq!(out, "0a 5b 6c a,b,c");
}
