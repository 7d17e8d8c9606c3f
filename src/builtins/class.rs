//! Class and object introspection, plus the native methods of the
//! builtin `Closure` and `Generator` classes.

use super::{check_arity, opt_bool_arg, string_arg};
use crate::compiler::chunk::ClosureData;
use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayData, ArrayKey, Val};
use crate::runtime::context::ClassDef;
use crate::vm::engine::{VM, VmError};
use std::rc::Rc;

/// Class named by an object or a class-name string.
fn class_of_arg(vm: &VM, value: &Val) -> Option<Rc<ClassDef>> {
    match value {
        Val::Object(obj) => Some(obj.class()),
        Val::String(name) => {
            let name = name.as_bytes();
            vm.context
                .lookup_class(name.strip_prefix(b"\\").unwrap_or(name))
        }
        _ => None,
    }
}

fn object_or_class_error(vm: &mut VM, func: &str, idx: usize, param: &str, value: &Val) -> VmError {
    let given = vm.debug_type(value);
    vm.type_error(&format!(
        "{}(): Argument #{} (${}) must be of type object|string, {} given",
        func,
        idx + 1,
        param,
        given
    ))
}

pub fn php_get_class(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_class", args, 0, 1)?;
    match args.first().map(Val::deref_val) {
        Some(Val::Object(obj)) => Ok(Val::from(vm.class_name_of(&obj))),
        Some(other) => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "get_class(): Argument #1 ($object) must be of type object, {} given",
                given
            )))
        }
        None => match vm.current_scope() {
            Some(scope) => Ok(Val::from(vm.sym_name(scope.name))),
            None => Err(vm.error("get_class() without arguments must be called from within a class")),
        },
    }
}

pub fn php_get_parent_class(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_parent_class", args, 0, 1)?;
    let class = match args.first().map(Val::deref_val) {
        None => vm.current_scope(),
        Some(value @ (Val::Object(_) | Val::String(_))) => class_of_arg(vm, &value),
        Some(other) => {
            return Err(object_or_class_error(vm, "get_parent_class", 0, "object_or_class", &other));
        }
    };
    match class.and_then(|c| c.parent.clone()) {
        Some(parent) => Ok(Val::from(vm.sym_name(parent.name))),
        None => Ok(Val::Bool(false)),
    }
}

/// Properties visible from the calling scope, as a name-keyed array.
pub fn php_get_object_vars(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_object_vars", args, 1, 1)?;
    let Val::Object(obj) = args[0].deref_val() else {
        let given = vm.debug_type(&args[0].deref_val());
        return Err(vm.type_error(&format!(
            "get_object_vars(): Argument #1 ($object) must be of type object, {} given",
            given
        )));
    };
    let mut out = ArrayData::new();
    for (name, value) in vm.visible_properties(&obj) {
        let key = vm.sym_name(name);
        out.insert(ArrayKey::from_bytes(key.as_bytes()), value.deref_val());
    }
    Ok(Val::from(out))
}

pub fn php_method_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "method_exists", args, 2, 2)?;
    let target = args[0].deref_val();
    if !matches!(target, Val::Object(_) | Val::String(_)) {
        return Err(object_or_class_error(vm, "method_exists", 0, "object_or_class", &target));
    }
    let method = string_arg(vm, "method_exists", args, 1, "method")?;
    let Some(class) = class_of_arg(vm, &target) else {
        return Ok(Val::Bool(false));
    };
    let lc = vm.context.interner.intern_lower(method.as_bytes());
    Ok(Val::Bool(class.find_method(lc).is_some()))
}

pub fn php_property_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "property_exists", args, 2, 2)?;
    let target = args[0].deref_val();
    if !matches!(target, Val::Object(_) | Val::String(_)) {
        return Err(object_or_class_error(vm, "property_exists", 0, "object_or_class", &target));
    }
    let property = string_arg(vm, "property_exists", args, 1, "property")?;
    let Some(class) = class_of_arg(vm, &target) else {
        return Ok(Val::Bool(false));
    };
    let sym = vm.context.interner.intern(property.as_bytes());
    if class.properties.contains_key(&sym) || class.static_props.contains_key(&sym) {
        return Ok(Val::Bool(true));
    }
    Ok(Val::Bool(match target {
        Val::Object(obj) => obj.borrow().properties.contains_key(&sym),
        _ => false,
    }))
}

fn class_kind_exists(vm: &mut VM, func: &str, args: &[Val], want_interface: bool) -> Result<Val, VmError> {
    check_arity(vm, func, args, 1, 2)?;
    let name = string_arg(vm, func, args, 0, "class")?;
    let name = name.as_bytes();
    let found = vm
        .context
        .lookup_class(name.strip_prefix(b"\\").unwrap_or(name))
        .is_some_and(|class| class.is_interface == want_interface);
    Ok(Val::Bool(found))
}

pub fn php_class_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    class_kind_exists(vm, "class_exists", args, false)
}

pub fn php_interface_exists(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    class_kind_exists(vm, "interface_exists", args, true)
}

fn relation(
    vm: &mut VM,
    func: &str,
    args: &[Val],
    allow_string_default: bool,
    proper: bool,
) -> Result<Val, VmError> {
    check_arity(vm, func, args, 2, 3)?;
    let subject = args[0].deref_val();
    let target = string_arg(vm, func, args, 1, "class")?;
    let allow_string = opt_bool_arg(vm, func, args, 2, "allow_string", allow_string_default)?;
    let class = match &subject {
        Val::Object(obj) => obj.class(),
        Val::String(_) if allow_string => match class_of_arg(vm, &subject) {
            Some(class) => class,
            None => return Ok(Val::Bool(false)),
        },
        _ => return Ok(Val::Bool(false)),
    };
    let target = target.as_bytes();
    let lc = vm
        .context
        .interner
        .intern_lower(target.strip_prefix(b"\\").unwrap_or(target));
    if proper && class.lc_name == lc {
        return Ok(Val::Bool(false));
    }
    Ok(Val::Bool(class.is_subclass_of(lc)))
}

pub fn php_is_a(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    relation(vm, "is_a", args, false, false)
}

pub fn php_is_subclass_of(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    relation(vm, "is_subclass_of", args, true, true)
}

pub fn php_get_class_methods(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_class_methods", args, 1, 1)?;
    let target = args[0].deref_val();
    let Some(class) = class_of_arg(vm, &target) else {
        return Err(object_or_class_error(vm, "get_class_methods", 0, "object_or_class", &target));
    };
    let mut methods: Vec<_> = class
        .methods
        .values()
        .filter(|m| vm.member_visible(m.visibility, m.declaring_class))
        .map(|m| vm.sym_name(m.name))
        .collect();
    methods.sort();
    Ok(Val::from(ArrayData::from_list(methods.into_iter().map(Val::from))))
}

fn this_object(vm: &mut VM, class: &str) -> Result<ObjectRef, VmError> {
    match vm.current_this() {
        Some(obj) => Ok(obj),
        None => Err(vm.error(&format!("{} method called without an object", class))),
    }
}

fn this_generator(vm: &mut VM) -> Result<ObjectRef, VmError> {
    let obj = this_object(vm, "Generator")?;
    if vm.generator_data(&obj).is_none() {
        return Err(vm.error("The \"Generator\" class is reserved for internal use and cannot be manually instantiated"));
    }
    Ok(obj)
}

pub fn generator_current(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    vm.generator_current(&obj)
}

pub fn generator_key(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    vm.generator_key(&obj)
}

pub fn generator_next(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    vm.generator_next(&obj)?;
    Ok(Val::Null)
}

pub fn generator_valid(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    Ok(Val::Bool(vm.generator_valid(&obj)?))
}

pub fn generator_rewind(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    vm.generator_rewind(&obj)?;
    Ok(Val::Null)
}

pub fn generator_send(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "Generator::send", args, 1, 1)?;
    let obj = this_generator(vm)?;
    vm.generator_send(&obj, args[0].deref_val())
}

pub fn generator_throw(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "Generator::throw", args, 1, 1)?;
    let obj = this_generator(vm)?;
    match args[0].deref_val() {
        Val::Object(exc) if vm.instance_of(&exc, vm.names.throwable) => vm.generator_throw(&obj, exc),
        other => {
            let given = vm.debug_type(&other);
            Err(vm.type_error(&format!(
                "Generator::throw(): Argument #1 ($exception) must be of type Throwable, {} given",
                given
            )))
        }
    }
}

pub fn generator_get_return(vm: &mut VM, _args: &[Val]) -> Result<Val, VmError> {
    let obj = this_generator(vm)?;
    vm.generator_get_return(&obj)
}

/// Copy of a closure with a new `$this` and class scope.
fn rebind(
    vm: &mut VM,
    closure: &ObjectRef,
    new_this: Val,
    scope_arg: Option<Val>,
) -> Result<Val, VmError> {
    let Some(data) = vm.closure_data(closure) else {
        return Err(vm.error("Closure object expected"));
    };
    let this = match new_this {
        Val::Object(obj) => Some(obj),
        Val::Null => None,
        other => {
            let given = vm.debug_type(&other);
            return Err(vm.type_error(&format!(
                "Closure::bindTo(): Argument #1 ($newThis) must be of type ?object, {} given",
                given
            )));
        }
    };
    let scope = match scope_arg {
        None => match &this {
            Some(obj) if data.scope.is_none() => Some(obj.class()),
            _ => data.scope.clone(),
        },
        Some(Val::Object(obj)) => Some(obj.class()),
        Some(Val::Null) => None,
        Some(value) => {
            let name = vm.to_php_string(&value)?;
            if name.eq_ignore_ascii_case(b"static") {
                data.scope.clone()
            } else {
                match vm.context.lookup_class(&name) {
                    Some(class) => Some(class),
                    None => {
                        let shown = String::from_utf8_lossy(&name).into_owned();
                        return Err(vm.class_not_found(&shown));
                    }
                }
            }
        }
    };
    let called_scope = this.as_ref().map(|obj| obj.class()).or_else(|| scope.clone());
    let bound = vm.new_closure(ClosureData {
        func: data.func.clone(),
        captured: data.captured.clone(),
        this,
        scope,
        called_scope,
    })?;
    Ok(Val::Object(bound))
}

pub fn closure_bind_to(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "Closure::bindTo", args, 1, 2)?;
    let closure = this_object(vm, "Closure")?;
    rebind(vm, &closure, args[0].deref_val(), args.get(1).map(Val::deref_val))
}

pub fn closure_bind(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "Closure::bind", args, 2, 3)?;
    let Val::Object(closure) = args[0].deref_val() else {
        let given = vm.debug_type(&args[0].deref_val());
        return Err(vm.type_error(&format!(
            "Closure::bind(): Argument #1 ($closure) must be of type Closure, {} given",
            given
        )));
    };
    rebind(vm, &closure, args[1].deref_val(), args.get(2).map(Val::deref_val))
}

pub fn closure_call(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "Closure::call", args, 1, usize::MAX)?;
    let closure = this_object(vm, "Closure")?;
    let new_this = args[0].deref_val();
    let scope = Some(new_this.clone());
    let bound = rebind(vm, &closure, new_this, scope)?;
    vm.call_value(&bound, args[1..].to_vec())
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn class_names_and_parents() {
        let out = run(
            "<?php class A { function who() { return get_class(); } } class B extends A {}
             $b = new B; echo get_class($b), ' ', get_parent_class($b), ' ', $b->who(), ' ';
             var_dump(get_parent_class(new A));",
        );
        assert_eq!(out, "B A A bool(false)\n");
    }

    #[test]
    fn object_vars_respect_scope() {
        let out = run(
            "<?php class P { public $a = 1; private $b = 2; function all() { return get_object_vars($this); } }
             $p = new P; $p->dyn = 3;
             echo implode(',', array_keys(get_object_vars($p))), ' ', implode(',', array_keys($p->all()));",
        );
        assert_eq!(out, "a,dyn a,b,dyn");
    }

    #[test]
    fn existence_checks() {
        let out = run(
            "<?php interface I {} class C implements I { public $p; function m() {} }
             var_dump(method_exists('C', 'M'), property_exists('C', 'p'), property_exists('C', 'q'),
                      class_exists('c'), class_exists('I'), interface_exists('I'));",
        );
        assert_eq!(
            out,
            "bool(true)\nbool(true)\nbool(false)\nbool(true)\nbool(false)\nbool(true)\n"
        );
    }

    #[test]
    fn is_a_and_is_subclass_of() {
        let out = run(
            "<?php class A {} class B extends A {} $b = new B;
             var_dump(is_a($b, 'A'), is_a('B', 'A'), is_a('B', 'A', true), is_subclass_of($b, 'B'), is_subclass_of('B', 'A'));",
        );
        assert_eq!(
            out,
            "bool(true)\nbool(false)\nbool(true)\nbool(false)\nbool(true)\n"
        );
    }

    #[test]
    fn generator_methods() {
        let out = run(
            "<?php function g() { $x = yield 1; echo \"got $x \"; yield 2; return 3; }
             $g = g(); echo $g->current(), ' '; echo $g->send('a'), ' '; $g->next();
             var_dump($g->valid()); echo $g->getReturn();",
        );
        assert_eq!(out, "1 got a 2 bool(false)\n3");
    }

    #[test]
    fn closures_rebind() {
        let out = run(
            "<?php class Box { private $v = 42; }
             $peek = function () { return $this->v; };
             $bound = Closure::bind($peek, new Box, Box::class); echo $bound(), ' ';
             echo $peek->call(new Box), ' ';
             $again = $peek->bindTo(new Box, 'Box'); echo $again();",
        );
        assert_eq!(out, "42 42 42");
    }
}
