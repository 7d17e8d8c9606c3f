mod common;

use common::output_of;

#[test]
fn assignment_copies_arrays() {
    let out = output_of(
        "<?php $a = [1, 2]; $b = $a; $b[] = 3; $c = &$a; $c[] = 4;
         echo count($a), count($b), count($c);",
    );
    assert_eq!(out, "333");
}

#[test]
fn references_share_one_cell() {
    let out = output_of(
        "<?php $x = 1; $y = &$x; $y++; echo $x;
         $arr = ['k' => 1]; $r = &$arr['k']; $r = 'changed'; echo ' ', $arr['k'];
         unset($r); $r = 'detached'; echo ' ', $arr['k'];",
    );
    assert_eq!(out, "2 changed changed");
}

#[test]
fn reference_inside_copied_array_stays_shared() {
    let out = output_of(
        "<?php $v = 1; $a = [&$v]; $b = $a; $b[0] = 2; echo $v, $a[0];",
    );
    assert_eq!(out, "22");
}

#[test]
fn foreach_by_value_sees_the_snapshot() {
    let out = output_of(
        "<?php $a = [1, 2, 3];
         foreach ($a as $v) { if ($v == 1) { $a[] = 4; unset($a[1]); } echo $v; }
         echo ' ', count($a);",
    );
    assert_eq!(out, "123 3");
}

#[test]
fn foreach_by_reference_iterates_live() {
    let out = output_of(
        "<?php $a = [1, 2, 3];
         foreach ($a as $k => &$v) {
             $v *= 10;
             if ($k == 0) { $a[] = 4; unset($a[1]); }
         }
         unset($v);
         echo implode(',', $a);",
    );
    assert_eq!(out, "10,30,40");
}

#[test]
fn foreach_reference_leaks_into_the_last_element() {
    let out = output_of(
        "<?php $a = [1, 2, 3];
         foreach ($a as &$v) {}
         foreach ($a as $v) {}
         echo implode(',', $a);",
    );
    assert_eq!(out, "1,2,2");
}

#[test]
fn by_ref_parameters_and_returns() {
    let out = output_of(
        "<?php function append(array &$list, $v) { $list[] = $v; }
         $l = []; append($l, 'a'); append($l, 'b');
         $nums = [3, 1, 2]; sort($nums);
         echo implode('', $l), implode('', $nums);",
    );
    assert_eq!(out, "ab123");
}

#[test]
fn objects_are_handles() {
    let out = output_of(
        "<?php function rename_it($o) { $o->name = 'new'; $o = null; }
         $obj = new stdClass; $obj->name = 'old'; rename_it($obj);
         echo $obj->name;",
    );
    assert_eq!(out, "new");
}

#[test]
fn self_referential_array_is_safe_to_dump() {
    let out = output_of("<?php $a = [1]; $a[] = &$a; echo count($a), ' ', count($a[1][1]);");
    assert_eq!(out, "2 2");
}
