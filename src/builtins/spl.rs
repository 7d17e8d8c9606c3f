use super::{check_arity, opt_bool_arg};
use crate::core::value::{ArrayData, Val};
use crate::vm::engine::{VM, VmError};

pub fn php_iterator_to_array(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "iterator_to_array", args, 1, 2)?;
    let source = args[0].deref_val();
    let traversable = match &source {
        Val::Array(_) => true,
        Val::Object(obj) => obj.class().is_subclass_of(vm.names.traversable),
        _ => false,
    };
    if !traversable {
        let given = vm.debug_type(&source);
        return Err(vm.type_error(&format!(
            "iterator_to_array(): Argument #1 ($iterator) must be of type Traversable|array, {} given",
            given
        )));
    }
    let preserve_keys = opt_bool_arg(vm, "iterator_to_array", args, 1, "preserve_keys", true)?;
    let mut out = ArrayData::new();
    for (key, value) in vm.iterate_to_vec(&source)? {
        if !preserve_keys {
            out.push(value);
            continue;
        }
        if matches!(key, Val::Array(_) | Val::Object(_)) {
            return Err(vm.type_error("Cannot access offset of type array|object on array"));
        }
        let key = vm.to_array_key(&key)?;
        out.insert(key, value);
    }
    Ok(Val::from(out))
}

fn object_arg(vm: &mut VM, func: &str, args: &[Val]) -> Result<u32, VmError> {
    check_arity(vm, func, args, 1, 1)?;
    match args[0].deref_val() {
        Val::Object(obj) => Ok(obj.id().handle()),
        other => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "{}(): Argument #1 ($object) must be of type object, {} given",
                func, given
            )))
        }
    }
}

pub fn php_spl_object_id(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let handle = object_arg(vm, "spl_object_id", args)?;
    Ok(Val::Int(handle as i64))
}

/// 32 hex digits: the object handle, then sixteen zeros.
pub fn php_spl_object_hash(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    let handle = object_arg(vm, "spl_object_hash", args)?;
    Ok(Val::from(format!("{:016x}{:016x}", handle, 0)))
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn generator_to_array() {
        let out = run(
            "<?php function g() { yield 'a' => 1; yield 'b' => 2; yield 'a' => 3; }
             function pairs($a) { $s = []; foreach ($a as $k => $v) { $s[] = \"$k=$v\"; } return implode(',', $s); }
             echo pairs(iterator_to_array(g())), ' ', pairs(iterator_to_array(g(), false));",
        );
        assert_eq!(out, "a=3,b=2 0=1,1=2,2=3");
    }

    #[test]
    fn iterator_to_array_rejects_scalars() {
        let out = run(
            "<?php try { iterator_to_array(5); } catch (TypeError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(
            out,
            "iterator_to_array(): Argument #1 ($iterator) must be of type Traversable|array, int given"
        );
    }

    #[test]
    fn object_ids_are_stable_and_distinct() {
        let out = run(
            "<?php $a = new stdClass; $b = new stdClass;
             var_dump(spl_object_id($a) === spl_object_id($a), spl_object_id($a) !== spl_object_id($b));
             echo strlen(spl_object_hash($a)), ' ', spl_object_hash($a) === spl_object_hash($a) ? 'same' : 'diff';",
        );
        assert_eq!(out, "bool(true)\nbool(true)\n32 same");
    }
}
