mod common;

use common::output_of;
use php_core::vm::executor::execute_code;

#[test]
fn object_graphs_keep_their_shape() {
    let out = output_of(
        r#"<?php
        class Node {
            public $children = [];
            public function __construct(public string $name, public ?Node $parent = null) {
                if ($parent) { $parent->children[] = $this; }
            }
        }
        $root = new Node('root');
        $left = new Node('left', $root);
        $right = new Node('right', $root);
        $shared = new Node('leaf', $left);
        $right->children[] = $shared;

        $copy = unserialize(serialize($root));
        echo $copy->name, ' ', count($copy->children), ' ';
        echo $copy->children[0]->parent === $copy ? 'parent-ok ' : 'parent-broken ';
        echo $copy->children[0]->children[0] === $copy->children[1]->children[0] ? 'shared ' : 'split ';
        echo $copy === $root ? 'same' : 'distinct';
        "#,
    );
    assert_eq!(out, "root 2 parent-ok shared distinct");
}

#[test]
fn references_survive_a_round_trip() {
    let out = output_of(
        "<?php $value = 'x'; $data = ['a' => &$value, 'b' => &$value, 'c' => $value];
         $copy = unserialize(serialize($data));
         $copy['a'] = 'changed';
         echo $copy['b'], ' ', $copy['c'];",
    );
    assert_eq!(out, "changed x");
}

#[test]
fn scalars_round_trip_exactly() {
    let out = output_of(
        r#"<?php
        $values = [0, -1, PHP_INT_MAX, 0.1, -0.0, 1e300, '', "bin\0ary", true, false, null, ['nested' => [1 => 'one']]];
        foreach ($values as $v) { echo unserialize(serialize($v)) === $v ? '.' : 'x'; }
        "#,
    );
    assert_eq!(out, "............");
}

#[test]
fn floats_use_the_round_trip_form() {
    assert_eq!(
        output_of("<?php echo serialize(0.1 + 0.2), serialize(1.5), serialize(-INF);"),
        "d:0.30000000000000004;d:1.5;d:-INF;"
    );
}

#[test]
fn closures_inside_structures_are_refused() {
    let out = output_of(
        "<?php $o = new stdClass; $o->callback = function () {};
         try { serialize(['wrapped' => $o]); } catch (Exception $e) { echo get_class($e), ': ', $e->getMessage(); }",
    );
    assert_eq!(out, "Exception: Serialization of 'Closure' is not allowed");
}

#[test]
fn malformed_payloads_return_false_with_a_notice() {
    for payload in ["s:5:\"abc\";", "i:12", "a:2:{i:0;i:1;}", "O:3:\"Foo\":1:{", "x:1;"] {
        let code = format!("<?php var_dump(unserialize('{}'));", payload);
        let result = execute_code(&code).unwrap();
        assert_eq!(result.stdout, "bool(false)\n", "{}", payload);
        assert!(
            result.stderr.contains("unserialize(): Error at offset"),
            "{}: {}",
            payload,
            result.stderr
        );
    }
}

#[test]
fn empty_payload_is_false_without_notice() {
    let result = execute_code("<?php var_dump(unserialize(''));").unwrap();
    assert_eq!(result.stdout, "bool(false)\n");
    assert_eq!(result.stderr, "");
}
