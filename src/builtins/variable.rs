//! Variable handling: dumpers, type predicates, conversions and global
//! constants.

use super::{check_arity, opt_bool_arg, opt_int_arg, string_arg};
use crate::core::heap::{ObjectId, ObjectRef};
use crate::core::value::{format_float, parse_numeric, ArrayData, ArrayKey, Symbol, Val, Visibility};
use crate::vm::engine::{VM, VmError};
use std::collections::HashSet;

/// Display form of a property name: `name`, `name:protected` or `name:Class:private`.
fn property_label(vm: &VM, obj: &ObjectRef, name: Symbol, quote: &str) -> String {
    let prop = vm.sym_name(name);
    let class = obj.class();
    match class.properties.get(&name) {
        Some(entry) if entry.visibility == Visibility::Protected => {
            format!("{q}{}{q}:protected", prop, q = quote)
        }
        Some(entry) if entry.visibility == Visibility::Private => format!(
            "{q}{}{q}:{q}{}{q}:private",
            prop,
            vm.class_display_name(entry.declaring_class),
            q = quote
        ),
        _ => format!("{q}{}{q}", prop, q = quote),
    }
}

fn all_properties(obj: &ObjectRef) -> Vec<(Symbol, Val)> {
    obj.borrow()
        .properties
        .iter()
        .map(|(name, value)| (*name, value.clone()))
        .collect()
}

/// Nesting past this is only reachable through a reference cycle.
const MAX_DEPTH: usize = 128;

struct VarDumper<'a> {
    vm: &'a mut VM,
    out: Vec<u8>,
    seen: HashSet<ObjectId>,
}

impl VarDumper<'_> {
    fn indent(&mut self, level: usize) {
        self.out.extend(std::iter::repeat_n(b' ', level * 2));
    }

    fn dump(&mut self, value: &Val, level: usize) -> Result<(), VmError> {
        let value = match value {
            Val::Ref(cell) => {
                if std::rc::Rc::strong_count(cell) > 1 {
                    self.out.push(b'&');
                }
                cell.borrow().clone()
            }
            other => other.clone(),
        };
        match &value {
            Val::Null => self.out.extend_from_slice(b"NULL\n"),
            Val::Bool(b) => self
                .out
                .extend_from_slice(format!("bool({})\n", b).as_bytes()),
            Val::Int(i) => self
                .out
                .extend_from_slice(format!("int({})\n", i).as_bytes()),
            Val::Float(f) => {
                let shown = format_float(*f, self.vm.context.config.serialize_precision);
                self.out
                    .extend_from_slice(format!("float({})\n", shown).as_bytes());
            }
            Val::String(s) => {
                self.out
                    .extend_from_slice(format!("string({}) \"", s.len()).as_bytes());
                self.out.extend_from_slice(s.as_bytes());
                self.out.extend_from_slice(b"\"\n");
            }
            Val::Array(_) if level > MAX_DEPTH => self.out.extend_from_slice(b"*RECURSION*\n"),
            Val::Array(arr) => {
                self.out
                    .extend_from_slice(format!("array({}) {{\n", arr.len()).as_bytes());
                for (key, item) in arr.iter() {
                    self.indent(level + 1);
                    match key {
                        ArrayKey::Int(i) => self.out.extend_from_slice(format!("[{}]=>\n", i).as_bytes()),
                        ArrayKey::Str(s) => {
                            self.out.extend_from_slice(b"[\"");
                            self.out.extend_from_slice(s.as_bytes());
                            self.out.extend_from_slice(b"\"]=>\n");
                        }
                    }
                    self.indent(level + 1);
                    self.dump(item, level + 1)?;
                }
                self.indent(level);
                self.out.extend_from_slice(b"}\n");
            }
            Val::Object(obj) => {
                if !self.seen.insert(obj.id()) {
                    self.out.extend_from_slice(b"*RECURSION*\n");
                    return Ok(());
                }
                let props = all_properties(obj);
                let class_name = self.vm.class_name_of(obj);
                self.out.extend_from_slice(
                    format!(
                        "object({})#{} ({}) {{\n",
                        class_name,
                        obj.id().handle(),
                        props.len()
                    )
                    .as_bytes(),
                );
                for (name, item) in props {
                    self.indent(level + 1);
                    let label = property_label(self.vm, obj, name, "\"");
                    self.out.extend_from_slice(format!("[{}]=>\n", label).as_bytes());
                    self.indent(level + 1);
                    self.dump(&item, level + 1)?;
                }
                self.indent(level);
                self.out.extend_from_slice(b"}\n");
                self.seen.remove(&obj.id());
            }
            Val::Resource(id) => {
                let line = match self.vm.context.resources.type_name(*id) {
                    Some("Unknown") | None => format!("resource({}) of type (Unknown)\n", id.0),
                    Some(kind) => format!("resource({}) of type ({})\n", id.0, kind),
                };
                self.out.extend_from_slice(line.as_bytes());
            }
            Val::Ref(_) => {}
        }
        Ok(())
    }
}

pub fn php_var_dump(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "var_dump", args, 1, usize::MAX)?;
    for arg in args {
        let mut dumper = VarDumper {
            vm: &mut *vm,
            out: Vec::new(),
            seen: HashSet::new(),
        };
        dumper.dump(&arg.deref_val(), 0)?;
        let out = dumper.out;
        vm.print_bytes(&out)?;
    }
    Ok(Val::Null)
}

fn print_r_value(
    vm: &mut VM,
    value: &Val,
    indent: usize,
    out: &mut Vec<u8>,
    seen: &mut HashSet<ObjectId>,
) -> Result<(), VmError> {
    match value.deref_val() {
        Val::Array(_) if indent > MAX_DEPTH * 8 => out.extend_from_slice(b"Array\n *RECURSION*"),
        Val::Array(arr) => {
            out.extend_from_slice(b"Array\n");
            let entries: Vec<(Vec<u8>, Val)> = arr
                .iter()
                .map(|(k, v)| (k.to_bytes(), v.deref_val()))
                .collect();
            print_r_entries(vm, entries, indent, out, seen)?;
        }
        Val::Object(obj) => {
            let class_name = vm.class_name_of(&obj);
            out.extend_from_slice(format!("{} Object\n", class_name).as_bytes());
            if !seen.insert(obj.id()) {
                out.extend_from_slice(b" *RECURSION*");
                return Ok(());
            }
            let entries: Vec<(Vec<u8>, Val)> = all_properties(&obj)
                .into_iter()
                .map(|(name, v)| (property_label(vm, &obj, name, "").into_bytes(), v.deref_val()))
                .collect();
            print_r_entries(vm, entries, indent, out, seen)?;
            seen.remove(&obj.id());
        }
        other => out.extend_from_slice(&vm.to_php_string(&other)?),
    }
    Ok(())
}

fn print_r_entries(
    vm: &mut VM,
    entries: Vec<(Vec<u8>, Val)>,
    indent: usize,
    out: &mut Vec<u8>,
    seen: &mut HashSet<ObjectId>,
) -> Result<(), VmError> {
    out.extend(std::iter::repeat_n(b' ', indent));
    out.extend_from_slice(b"(\n");
    for (key, item) in entries {
        out.extend(std::iter::repeat_n(b' ', indent + 4));
        out.push(b'[');
        out.extend_from_slice(&key);
        out.extend_from_slice(b"] => ");
        print_r_value(vm, &item, indent + 8, out, seen)?;
        out.push(b'\n');
    }
    out.extend(std::iter::repeat_n(b' ', indent));
    out.extend_from_slice(b")\n");
    Ok(())
}

pub fn php_print_r(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "print_r", args, 1, 2)?;
    let return_output = opt_bool_arg(vm, "print_r", args, 1, "return", false)?;
    let mut out = Vec::new();
    print_r_value(vm, &args[0], 0, &mut out, &mut HashSet::new())?;
    if return_output {
        return Ok(Val::from(out));
    }
    vm.print_bytes(&out)?;
    Ok(Val::Bool(true))
}

fn export_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.push(b'\'');
    for &b in bytes {
        match b {
            b'\'' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            0 => out.extend_from_slice(b"' . \"\\0\" . '"),
            _ => out.push(b),
        }
    }
    out.push(b'\'');
}

fn export_float(f: f64, precision: i64) -> String {
    let mut shown = format_float(f, precision);
    if f.is_finite() && !shown.contains(['.', 'E', 'e']) {
        shown.push_str(".0");
    }
    shown
}

fn var_export_value(
    vm: &mut VM,
    value: &Val,
    level: usize,
    out: &mut Vec<u8>,
    seen: &mut HashSet<ObjectId>,
) -> Result<(), VmError> {
    match value.deref_val() {
        Val::Null => out.extend_from_slice(b"NULL"),
        Val::Bool(b) => out.extend_from_slice(if b { b"true" } else { b"false" }),
        Val::Int(i64::MIN) => out.extend_from_slice(b"-9223372036854775807-1"),
        Val::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Val::Float(f) => {
            let shown = export_float(f, vm.context.config.serialize_precision);
            out.extend_from_slice(shown.as_bytes());
        }
        Val::String(s) => export_string(s.as_bytes(), out),
        Val::Array(_) if level > MAX_DEPTH * 2 => {
            vm.warn("var_export does not handle circular references");
            out.extend_from_slice(b"NULL");
        }
        Val::Array(arr) => {
            if level > 1 {
                out.push(b'\n');
                out.extend(std::iter::repeat_n(b' ', level - 1));
            }
            out.extend_from_slice(b"array (\n");
            for (key, item) in arr.iter() {
                out.extend(std::iter::repeat_n(b' ', level + 1));
                match key {
                    ArrayKey::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
                    ArrayKey::Str(s) => export_string(s.as_bytes(), out),
                }
                out.extend_from_slice(b" => ");
                var_export_value(vm, item, level + 2, out, seen)?;
                out.extend_from_slice(b",\n");
            }
            if level > 1 {
                out.extend(std::iter::repeat_n(b' ', level - 1));
            }
            out.push(b')');
        }
        Val::Object(obj) => {
            if !seen.insert(obj.id()) {
                vm.warn("var_export does not handle circular references");
                out.extend_from_slice(b"NULL");
                return Ok(());
            }
            if level > 1 {
                out.push(b'\n');
                out.extend(std::iter::repeat_n(b' ', level - 1));
            }
            let class_name = vm.class_name_of(&obj);
            let is_std = class_name.eq_ignore_ascii_case("stdClass");
            if is_std {
                out.extend_from_slice(b"(object) array(\n");
            } else {
                out.extend_from_slice(format!("\\{}::__set_state(array(\n", class_name).as_bytes());
            }
            for (name, item) in all_properties(&obj) {
                out.extend(std::iter::repeat_n(b' ', level + 2));
                export_string(vm.sym_name(name).as_bytes(), out);
                out.extend_from_slice(b" => ");
                var_export_value(vm, &item, level + 2, out, seen)?;
                out.extend_from_slice(b",\n");
            }
            if level > 1 {
                out.extend(std::iter::repeat_n(b' ', level - 1));
            }
            out.extend_from_slice(if is_std { b")" } else { b"))" });
            seen.remove(&obj.id());
        }
        Val::Resource(_) => {
            vm.warn("var_export does not handle resources");
            out.extend_from_slice(b"NULL");
        }
        Val::Ref(_) => {}
    }
    Ok(())
}

pub fn php_var_export(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "var_export", args, 1, 2)?;
    let return_output = opt_bool_arg(vm, "var_export", args, 1, "return", false)?;
    let mut out = Vec::new();
    var_export_value(vm, &args[0], 1, &mut out, &mut HashSet::new())?;
    if return_output {
        return Ok(Val::from(out));
    }
    vm.print_bytes(&out)?;
    Ok(Val::Null)
}

pub fn php_gettype(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "gettype", args, 1, 1)?;
    let value = args[0].deref_val();
    if let Val::Resource(id) = value {
        if !vm.context.resources.is_open(id) {
            return Ok(Val::from("resource (closed)"));
        }
    }
    Ok(Val::from(value.gettype_name()))
}

pub fn php_get_debug_type(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "get_debug_type", args, 1, 1)?;
    let shown = vm.debug_type(&args[0].deref_val());
    Ok(Val::from(shown))
}

macro_rules! type_predicate {
    ($name:ident, $php:literal, $pattern:pat) => {
        pub fn $name(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
            check_arity(vm, $php, args, 1, 1)?;
            Ok(Val::Bool(matches!(args[0].deref_val(), $pattern)))
        }
    };
}

type_predicate!(php_is_null, "is_null", Val::Null);
type_predicate!(php_is_bool, "is_bool", Val::Bool(_));
type_predicate!(php_is_int, "is_int", Val::Int(_));
type_predicate!(php_is_float, "is_float", Val::Float(_));
type_predicate!(php_is_string, "is_string", Val::String(_));
type_predicate!(php_is_array, "is_array", Val::Array(_));
type_predicate!(php_is_object, "is_object", Val::Object(_));
type_predicate!(
    php_is_scalar,
    "is_scalar",
    Val::Bool(_) | Val::Int(_) | Val::Float(_) | Val::String(_)
);

pub fn php_is_numeric(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_numeric", args, 1, 1)?;
    Ok(Val::Bool(match args[0].deref_val() {
        Val::Int(_) | Val::Float(_) => true,
        Val::String(s) => parse_numeric(s.as_bytes()).is_some(),
        _ => false,
    }))
}

pub fn php_is_iterable(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_iterable", args, 1, 1)?;
    Ok(Val::Bool(match args[0].deref_val() {
        Val::Array(_) => true,
        Val::Object(obj) => vm.instance_of(&obj, vm.names.traversable),
        _ => false,
    }))
}

pub fn php_is_countable(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_countable", args, 1, 1)?;
    Ok(Val::Bool(match args[0].deref_val() {
        Val::Array(_) => true,
        Val::Object(obj) => match vm.context.interner.find_lower(b"countable") {
            Some(countable) => vm.instance_of(&obj, countable),
            None => false,
        },
        _ => false,
    }))
}

pub fn php_is_resource(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "is_resource", args, 1, 1)?;
    Ok(Val::Bool(match args[0].deref_val() {
        Val::Resource(id) => vm.context.resources.is_open(id),
        _ => false,
    }))
}

/// Digits of `bytes` in `base`, after an optional sign and matching prefix.
fn parse_int_base(bytes: &[u8], mut base: u32) -> i64 {
    let mut s = bytes.trim_ascii_start();
    let negative = match s.first() {
        Some(b'-') => {
            s = &s[1..];
            true
        }
        Some(b'+') => {
            s = &s[1..];
            false
        }
        _ => false,
    };
    let lower = |i: usize| s.get(i).map(u8::to_ascii_lowercase);
    if base == 0 {
        base = match (lower(0), lower(1)) {
            (Some(b'0'), Some(b'x')) => 16,
            (Some(b'0'), Some(b'b')) => 2,
            (Some(b'0'), Some(b'o')) => 8,
            (Some(b'0'), _) => 8,
            _ => 10,
        };
    }
    let prefix = match base {
        16 => Some(b'x'),
        8 => Some(b'o'),
        2 => Some(b'b'),
        _ => None,
    };
    if lower(0) == Some(b'0') && prefix.is_some() && lower(1) == prefix {
        s = &s[2..];
    }
    let mut acc: i64 = 0;
    for &b in s {
        let Some(d) = (b as char).to_digit(base) else {
            break;
        };
        acc = match acc.checked_mul(base as i64).and_then(|v| v.checked_add(d as i64)) {
            Some(v) => v,
            None => return if negative { i64::MIN } else { i64::MAX },
        };
    }
    if negative { -acc } else { acc }
}

pub fn php_intval(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "intval", args, 1, 2)?;
    let base = opt_int_arg(vm, "intval", args, 1, "base", 10)?;
    let value = args[0].deref_val();
    if base != 10 {
        if let Val::String(s) = &value {
            if base != 0 && !(2..=36).contains(&base) {
                return Err(vm.value_error(
                    "intval(): Argument #2 ($base) must be between 2 and 36 (inclusive)",
                ));
            }
            return Ok(Val::Int(parse_int_base(s.as_bytes(), base as u32)));
        }
    }
    Ok(Val::Int(value.to_int()))
}

pub fn php_floatval(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "floatval", args, 1, 1)?;
    Ok(Val::Float(args[0].deref_val().to_float()))
}

pub fn php_boolval(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "boolval", args, 1, 1)?;
    Ok(Val::Bool(args[0].deref_val().to_bool()))
}

pub fn php_strval(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "strval", args, 1, 1)?;
    let text = vm.to_php_string(&args[0].deref_val())?;
    Ok(Val::from(text))
}

pub fn php_settype(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "settype", args, 2, 2)?;
    let ty = string_arg(vm, "settype", args, 1, "type")?;
    let value = args[0].deref_val();
    let converted = match ty.as_bytes().to_ascii_lowercase().as_slice() {
        b"int" | b"integer" => Val::Int(value.to_int()),
        b"float" | b"double" => Val::Float(value.to_float()),
        b"bool" | b"boolean" => Val::Bool(value.to_bool()),
        b"string" => Val::from(vm.to_php_string(&value)?),
        b"array" => match value {
            Val::Array(_) => value,
            Val::Null => Val::empty_array(),
            other => Val::from(ArrayData::from_list([other])),
        },
        b"null" => Val::Null,
        _ => {
            return Err(vm.value_error("settype(): Argument #2 ($type) must be a valid type"));
        }
    };
    super::write_ref(args.first(), converted);
    Ok(Val::Bool(true))
}

pub fn php_define(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "define", args, 2, 3)?;
    let name = string_arg(vm, "define", args, 0, "constant_name")?;
    let value = args[1].deref_val();
    if name.as_bytes().contains(&b':') {
        return Err(vm.value_error("define(): Argument #1 ($constant_name) cannot be a class constant"));
    }
    if matches!(value, Val::Object(_)) {
        let given = vm.debug_type(&value);
        return Err(vm.type_error(&format!(
            "define(): Argument #2 ($value) cannot be an object, {} given",
            given
        )));
    }
    let sym = vm.context.interner.intern(name.as_bytes());
    if vm.context.constants.contains_key(&sym) {
        vm.warn(&format!("Constant {} already defined", name.to_string_lossy()));
        return Ok(Val::Bool(false));
    }
    vm.context.insert_constant(name.as_bytes(), value);
    Ok(Val::Bool(true))
}

pub fn php_defined(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "defined", args, 1, 1)?;
    let name = string_arg(vm, "defined", args, 0, "constant_name")?;
    if let Some((class, constant)) = split_class_constant(name.as_bytes()) {
        let Some(class) = vm.context.lookup_class(class) else {
            return Ok(Val::Bool(false));
        };
        let sym = vm.context.interner.intern(constant);
        return Ok(Val::Bool(class.constants.contains_key(&sym)));
    }
    let sym = vm.context.interner.intern(name.as_bytes());
    Ok(Val::Bool(vm.lookup_constant(sym).is_some()))
}

fn split_class_constant(name: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = name.windows(2).position(|w| w == b"::")?;
    Some((&name[..pos], &name[pos + 2..]))
}

pub fn php_constant(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "constant", args, 1, 1)?;
    let name = string_arg(vm, "constant", args, 0, "name")?;
    if let Some((class_name, constant)) = split_class_constant(name.as_bytes()) {
        let Some(class) = vm.context.lookup_class(class_name) else {
            let shown = String::from_utf8_lossy(class_name).into_owned();
            return Err(vm.class_not_found(&shown));
        };
        let sym = vm.context.interner.intern(constant);
        return vm.class_constant(&class, sym);
    }
    let sym = vm.context.interner.intern(name.as_bytes());
    match vm.lookup_constant(sym) {
        Some(value) => Ok(value),
        None => Err(vm.error(&format!(
            "Undefined constant \"{}\"",
            name.to_string_lossy()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::{execute_code, run_code_capture_output};

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn base_parsing_handles_prefixes() {
        assert_eq!(parse_int_base(b"0x1A", 16), 26);
        assert_eq!(parse_int_base(b"0x1A", 0), 26);
        assert_eq!(parse_int_base(b"012", 0), 10);
        assert_eq!(parse_int_base(b" -101", 2), -5);
        assert_eq!(parse_int_base(b"zz", 36), 1295);
    }

    #[test]
    fn var_dump_nested_structures() {
        let out = run(
            "<?php class P { public $a = 1; protected $b = [true]; private $c = 1.5; }
             var_dump(new P, null, 'hi');",
        );
        assert_eq!(
            out,
            "object(P)#1 (3) {\n  [\"a\"]=>\n  int(1)\n  [\"b\":protected]=>\n  array(1) {\n    [0]=>\n    bool(true)\n  }\n  [\"c\":\"P\":private]=>\n  float(1.5)\n}\nNULL\nstring(2) \"hi\"\n"
        );
    }

    #[test]
    fn var_dump_marks_recursion_and_references() {
        let out = run("<?php $o = new stdClass; $o->self = $o; var_dump($o); $a = [1]; $r = &$a[0]; var_dump($a);");
        assert_eq!(
            out,
            "object(stdClass)#1 (1) {\n  [\"self\"]=>\n  *RECURSION*\n}\narray(1) {\n  [0]=>\n  &int(1)\n}\n"
        );
    }

    #[test]
    fn print_r_layout() {
        assert_eq!(
            run("<?php print_r(['a' => 1, 'b' => [2]]); echo print_r(3.0, true);"),
            "Array\n(\n    [a] => 1\n    [b] => Array\n        (\n            [0] => 2\n        )\n\n)\n3"
        );
    }

    #[test]
    fn var_export_layout() {
        assert_eq!(
            run("<?php var_export([1, 'k' => ['x' => 'it\\'s'], 2.0, null]);"),
            "array (\n  0 => 1,\n  'k' => \n  array (\n    'x' => 'it\\'s',\n  ),\n  1 => 2.0,\n  2 => NULL,\n)"
        );
        assert_eq!(
            run("<?php $o = new stdClass; $o->a = 1; var_export($o);"),
            "(object) array(\n   'a' => 1,\n)"
        );
    }

    #[test]
    fn type_names_and_conversions() {
        assert_eq!(
            run("<?php echo gettype(1.0), ' ', gettype(null), ' ', get_debug_type(1.0), ' ', intval('42abc'), ' ', intval('ff', 16), ' ', strval(0.1 + 0.2), ' ', var_export(boolval('0'), true);"),
            "double NULL float 42 255 0.3 false"
        );
    }

    #[test]
    fn predicates() {
        assert_eq!(
            run("<?php class Sized implements Countable { function count(): int { return 0; } }
                 var_dump(is_numeric(' 1e3'), is_numeric('1e'), is_scalar(null), is_iterable([]), is_countable(new Sized));"),
            "bool(true)\nbool(false)\nbool(false)\nbool(true)\nbool(true)\n"
        );
    }

    #[test]
    fn constants_define_and_lookup() {
        let result = execute_code(
            "<?php var_dump(define('GREETING', 'hi'), define('GREETING', 'again'), defined('GREETING'), constant('GREETING'));
             class K { const V = 3; } echo constant('K::V'), defined('K::V') ? 'y' : 'n';",
        )
        .unwrap();
        assert_eq!(
            result.stdout,
            "bool(true)\nbool(false)\nbool(true)\nstring(2) \"hi\"\n3y"
        );
        assert!(result.stderr.contains("Constant GREETING already defined"));
    }

    #[test]
    fn undefined_constant_throws() {
        let out = run("<?php try { constant('NOPE'); } catch (Error $e) { echo $e->getMessage(); }");
        assert_eq!(out, "Undefined constant \"NOPE\"");
    }
}
