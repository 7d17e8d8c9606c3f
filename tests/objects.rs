mod common;

use common::{expect_exception, output_of};

#[test]
fn inheritance_and_interfaces() {
    let out = output_of(
        r#"<?php
        interface Shape { const SIDES = 0; function area(): float; }
        abstract class Base implements Shape {
            public function __construct(protected string $name) {}
            public function describe(): string { return $this->name . ':' . $this->area(); }
        }
        class Square extends Base {
            const SIDES = 4;
            public function __construct(private float $side) { parent::__construct('square'); }
            public function area(): float { return $this->side ** 2; }
        }
        $s = new Square(3);
        echo $s->describe(), ' ', Square::SIDES, ' ', Shape::SIDES, ' ';
        var_dump($s instanceof Shape, $s instanceof Base, is_subclass_of($s, 'Shape'));
        "#,
    );
    assert_eq!(out, "square:9 4 0 bool(true)\nbool(true)\nbool(true)\n");
}

#[test]
fn static_members_and_late_static_binding() {
    let out = output_of(
        r#"<?php
        class Model {
            protected static $count = 0;
            public static function create() { static::$count++; return new static(); }
            public static function count() { return static::$count; }
            public function name() { return static::class; }
        }
        class User extends Model {}
        User::create(); Model::create();
        echo Model::count(), ' ', (new User)->name(), ' ', get_class(User::create());
        "#,
    );
    assert_eq!(out, "2 User User");
}

#[test]
fn visibility_is_enforced() {
    let (class, message) = expect_exception(
        "<?php class A { private $secret = 1; } $a = new A; echo $a->secret;",
    );
    assert_eq!(class, "Error");
    assert_eq!(message, "Cannot access private property A::$secret");

    let (class, message) = expect_exception(
        "<?php class A { protected function hidden() {} } (new A)->hidden();",
    );
    assert_eq!(class, "Error");
    assert_eq!(message, "Call to protected method A::hidden() from global scope");
}

#[test]
fn magic_methods() {
    let out = output_of(
        r#"<?php
        class Money {
            public $log = [];
            public function __construct(public int $cents) {}
            public function __toString(): string { return sprintf('$%d.%02d', intdiv($this->cents, 100), $this->cents % 100); }
            public function __invoke($n) { return new Money($this->cents * $n); }
            public function __clone() { $this->log[] = 'cloned'; }
        }
        $m = new Money(1234);
        $c = clone $m;
        echo $m, ' ', $m(2), ' ', count($c->log), count($m->log), ' ', "in string: $m";
        "#,
    );
    assert_eq!(out, "$12.34 $24.68 10 in string: $12.34");
}

#[test]
fn clone_is_shallow() {
    let out = output_of(
        "<?php $inner = new stdClass; $inner->v = 1;
         $o = new stdClass; $o->inner = $inner; $o->list = [1];
         $c = clone $o; $c->inner->v = 2; $c->list[] = 2;
         echo $o->inner->v, count($o->list), count($c->list);",
    );
    assert_eq!(out, "212");
}

#[test]
fn destructors_run_once_in_a_deterministic_order() {
    let script = r#"<?php
        class D {
            public function __construct(public string $n) {}
            public function __destruct() { echo "~{$this->n} "; }
        }
        function scope() { $local = new D('local'); echo 'in '; }
        scope();
        $a = new D('a');
        $b = new D('b');
        $a = null;
        echo 'end ';
    "#;
    let first = output_of(script);
    assert_eq!(first, "in ~local ~a end ~b ");
    for _ in 0..3 {
        assert_eq!(output_of(script), first);
    }
}

#[test]
fn mutual_revival_terminates() {
    let out = output_of(
        r#"<?php
        class Phoenix {
            public static $saved = [];
            public $peer;
            public function __construct(public string $n) {}
            public function __destruct() {
                echo "~{$this->n} ";
                self::$saved[] = $this;
                self::$saved[] = $this->peer;
            }
        }
        $a = new Phoenix('a'); $b = new Phoenix('b');
        $a->peer = $b; $b->peer = $a;
        unset($a, $b);
        gc_collect_cycles();
        Phoenix::$saved = [];
        gc_collect_cycles();
        echo 'done';
        "#,
    );
    assert_eq!(out.matches("~a").count(), 1, "{}", out);
    assert_eq!(out.matches("~b").count(), 1, "{}", out);
    assert!(out.ends_with("done"), "{}", out);
}

#[test]
fn destructor_creating_references_does_not_double_invoke() {
    let out = output_of(
        r#"<?php
        class Tracker {
            public function __destruct() {
                global $again;
                $again = $this;
                echo 'd';
            }
        }
        $t = new Tracker;
        unset($t);
        $again = null;
        echo '|';
        "#,
    );
    assert_eq!(out, "d|");
}

#[test]
fn undefined_things_throw_errors() {
    assert_eq!(
        expect_exception("<?php new Nope();"),
        ("Error".to_string(), "Class \"Nope\" not found".to_string())
    );
    assert_eq!(
        expect_exception("<?php nope();"),
        ("Error".to_string(), "Call to undefined function nope()".to_string())
    );
    assert_eq!(
        expect_exception("<?php (new stdClass)->nope();"),
        ("Error".to_string(), "Call to undefined method stdClass::nope()".to_string())
    );
    assert_eq!(
        expect_exception("<?php $x = null; $x->m();"),
        ("Error".to_string(), "Call to a member function m() on null".to_string())
    );
}

#[test]
fn abstract_and_interface_instantiation_fails() {
    assert_eq!(
        expect_exception("<?php abstract class A {} new A;").1,
        "Cannot instantiate abstract class A"
    );
    assert_eq!(
        expect_exception("<?php interface I {} new I;").1,
        "Cannot instantiate interface I"
    );
}

#[test]
fn array_access_and_countable_objects() {
    let out = output_of(
        r#"<?php
        class Bag implements ArrayAccess, Countable {
            private $items = [];
            public function offsetExists($k): bool { return isset($this->items[$k]); }
            public function offsetGet($k): mixed { return $this->items[$k] ?? null; }
            public function offsetSet($k, $v): void { if ($k === null) { $this->items[] = $v; } else { $this->items[$k] = $v; } }
            public function offsetUnset($k): void { unset($this->items[$k]); }
            public function count(): int { return count($this->items); }
        }
        $b = new Bag; $b['x'] = 1; $b[] = 2; unset($b['x']);
        echo count($b), isset($b['x']) ? 'Y' : 'N', $b[0];
        "#,
    );
    assert_eq!(out, "1N2");
}
