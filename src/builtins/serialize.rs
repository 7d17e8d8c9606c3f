//! `serialize` / `unserialize` in PHP's native format
//!
//! ```text
//! N;   b:1;   i:42;   d:0.1;   s:5:"hello";
//! a:COUNT:{KEY VALUE ...}
//! O:LEN:"Class":COUNT:{NAME VALUE ...}
//! r:N;   (same object as value slot N)
//! R:N;   (reference to value slot N)
//! ```
//!
//! Every serialized value occupies a slot numbered from 1, keys excluded.
//! Repeated objects emit `r:` and still take a slot; repeated references
//! emit `R:` and do not. Unserializing rebuilds shared objects and
//! reference cells from those slots.
//!
//! An unknown class name unserializes as `stdClass` with the same
//! properties; the original name is lost.

use super::check_arity;
use crate::core::heap::{ObjectId, ObjectInternal, ObjectRef};
use crate::core::with_stack;
use crate::core::value::{format_float, ArrayData, ArrayKey, Reference, Symbol, Val, Visibility};
use crate::vm::engine::{VM, VmError};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Deepest nesting `unserialize` accepts.
const MAX_DEPTH: usize = 4096;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Identity {
    Object(ObjectId),
    Reference(*const RefCell<Val>),
}

struct Serializer<'a> {
    vm: &'a mut VM,
    out: Vec<u8>,
    slots: HashMap<Identity, usize>,
    next_slot: usize,
}

impl Serializer<'_> {
    fn write_str(&mut self, bytes: &[u8]) {
        self.out
            .extend_from_slice(format!("s:{}:\"", bytes.len()).as_bytes());
        self.out.extend_from_slice(bytes);
        self.out.extend_from_slice(b"\";");
    }

    fn write_key(&mut self, key: &ArrayKey) {
        match key {
            ArrayKey::Int(i) => self.out.extend_from_slice(format!("i:{};", i).as_bytes()),
            ArrayKey::Str(s) => self.write_str(s.as_bytes()),
        }
    }

    /// A reference to an object is keyed by the object, so either form of
    /// a repeat finds the first occurrence.
    fn value(&mut self, value: &Val) -> Result<(), VmError> {
        with_stack(|| self.value_inner(value))
    }

    fn value_inner(&mut self, value: &Val) -> Result<(), VmError> {
        self.next_slot += 1;
        let slot = self.next_slot;
        let (identity, is_ref) = match value {
            Val::Ref(cell) => match &*cell.borrow() {
                Val::Object(obj) => (Some(Identity::Object(obj.id())), true),
                _ => (Some(Identity::Reference(Rc::as_ptr(cell))), true),
            },
            Val::Object(obj) => (Some(Identity::Object(obj.id())), false),
            _ => (None, false),
        };
        if let Some(identity) = identity {
            if let Some(&first) = self.slots.get(&identity) {
                let tag = if is_ref {
                    self.next_slot -= 1;
                    'R'
                } else {
                    'r'
                };
                self.out
                    .extend_from_slice(format!("{}:{};", tag, first).as_bytes());
                return Ok(());
            }
            self.slots.insert(identity, slot);
        }
        match value.deref_val() {
            Val::Null => self.out.extend_from_slice(b"N;"),
            Val::Bool(b) => self
                .out
                .extend_from_slice(if b { b"b:1;" } else { b"b:0;" }),
            Val::Int(i) => self.out.extend_from_slice(format!("i:{};", i).as_bytes()),
            Val::Float(f) => {
                let shown = format_float(f, self.vm.context.config.serialize_precision);
                self.out.extend_from_slice(format!("d:{};", shown).as_bytes());
            }
            Val::String(s) => self.write_str(s.as_bytes()),
            Val::Resource(_) => self.out.extend_from_slice(b"i:0;"),
            Val::Array(arr) => {
                self.out
                    .extend_from_slice(format!("a:{}:{{", arr.len()).as_bytes());
                for (key, item) in arr.iter() {
                    self.write_key(key);
                    self.value(item)?;
                }
                self.out.push(b'}');
            }
            Val::Object(obj) => self.object(&obj)?,
            Val::Ref(_) => {}
        }
        Ok(())
    }

    fn object(&mut self, obj: &ObjectRef) -> Result<(), VmError> {
        let class_name = self.vm.class_name_of(obj);
        if !matches!(obj.borrow().internal, ObjectInternal::None) {
            return Err(self.vm.throw_error(
                "Exception",
                &format!("Serialization of '{}' is not allowed", class_name),
            ));
        }
        let header = |count: usize| {
            format!("O:{}:\"{}\":{}:{{", class_name.len(), class_name, count)
        };

        let custom = self.vm.context.interner.intern_lower(b"__serialize");
        if let Some(method) = obj.class().find_method(custom).cloned() {
            let data = self.vm.call_method(obj, &method, Vec::new())?;
            let Val::Array(data) = data.deref_val() else {
                return Err(self.vm.type_error(&format!(
                    "{}::__serialize() must return an array",
                    class_name
                )));
            };
            self.out.extend_from_slice(header(data.len()).as_bytes());
            for (key, item) in data.iter() {
                self.write_key(key);
                self.value(item)?;
            }
            self.out.push(b'}');
            return Ok(());
        }

        let props: Vec<(Symbol, Val)> = obj
            .borrow()
            .properties
            .iter()
            .map(|(name, value)| (*name, value.clone()))
            .collect();
        self.out.extend_from_slice(header(props.len()).as_bytes());
        let class = obj.class();
        for (name, item) in props {
            let mut mangled = Vec::new();
            match class.properties.get(&name) {
                Some(entry) if entry.visibility == Visibility::Protected => {
                    mangled.extend_from_slice(b"\0*\0");
                }
                Some(entry) if entry.visibility == Visibility::Private => {
                    mangled.push(0);
                    mangled.extend_from_slice(
                        self.vm.class_display_name(entry.declaring_class).as_bytes(),
                    );
                    mangled.push(0);
                }
                _ => {}
            }
            mangled.extend_from_slice(self.vm.sym_name(name).as_bytes());
            self.write_str(&mangled);
            self.value(&item)?;
        }
        self.out.push(b'}');
        Ok(())
    }
}

pub fn php_serialize(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "serialize", args, 1, 1)?;
    let value = args[0].deref_val();
    let mut serializer = Serializer {
        vm: &mut *vm,
        out: Vec::new(),
        slots: HashMap::new(),
        next_slot: 0,
    };
    serializer.value(&value)?;
    Ok(Val::from(serializer.out))
}

/// Offset of the first byte that could not be parsed.
struct Malformed(usize);

enum Pending {
    Unserialize(ObjectRef, Val),
    Wakeup(ObjectRef),
}

struct Unserializer<'a> {
    vm: &'a mut VM,
    data: &'a [u8],
    pos: usize,
    /// Cell per value slot; `R:` shares the cell, `r:` copies its value.
    slots: Vec<Reference>,
    shared: HashSet<*const RefCell<Val>>,
    pending: Vec<Pending>,
    /// Exception raised while building an object.
    error: Option<VmError>,
}

impl<'a> Unserializer<'a> {
    fn fail<T>(&self) -> Result<T, Malformed> {
        Err(Malformed(self.pos))
    }

    fn expect(&mut self, byte: u8) -> Result<(), Malformed> {
        if self.data.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            self.fail()
        }
    }

    /// Bytes up to (not including) `end`, consuming `end`.
    fn until(&mut self, end: u8) -> Result<&'a [u8], Malformed> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let Some(len) = memchr::memchr(end, rest) else {
            return self.fail();
        };
        let start = self.pos;
        self.pos += len + 1;
        Ok(&self.data[start..start + len])
    }

    fn int_until(&mut self, end: u8) -> Result<i64, Malformed> {
        let start = self.pos;
        let digits = self.until(end)?;
        let text = std::str::from_utf8(digits).ok();
        match text.and_then(|t| t.strip_prefix('+').unwrap_or(t).parse::<i64>().ok()) {
            Some(n) => Ok(n),
            None => Err(Malformed(start)),
        }
    }

    fn count_until(&mut self, end: u8) -> Result<usize, Malformed> {
        let start = self.pos;
        let n = self.int_until(end)?;
        if n < 0 || n as usize > self.data.len() {
            return Err(Malformed(start));
        }
        Ok(n as usize)
    }

    fn string_body(&mut self) -> Result<Vec<u8>, Malformed> {
        let len = self.count_until(b':')?;
        self.expect(b'"')?;
        let start = self.pos;
        let Some(bytes) = self.data.get(start..start + len) else {
            return self.fail();
        };
        let bytes = bytes.to_vec();
        self.pos += len;
        self.expect(b'"')?;
        Ok(bytes)
    }

    fn key(&mut self) -> Result<ArrayKey, Malformed> {
        let start = self.pos;
        match self.data.get(self.pos) {
            Some(b'i') => {
                self.pos += 1;
                self.expect(b':')?;
                Ok(ArrayKey::Int(self.int_until(b';')?))
            }
            Some(b's') => {
                self.pos += 1;
                self.expect(b':')?;
                let bytes = self.string_body()?;
                self.expect(b';')?;
                Ok(ArrayKey::from_bytes(&bytes))
            }
            _ => Err(Malformed(start)),
        }
    }

    /// Next value, wrapped in its slot cell.
    fn value(&mut self, depth: usize) -> Result<Val, Malformed> {
        if depth > MAX_DEPTH {
            return self.fail();
        }
        with_stack(|| self.value_inner(depth))
    }

    fn value_inner(&mut self, depth: usize) -> Result<Val, Malformed> {
        let start = self.pos;
        let tag = match self.data.get(self.pos) {
            Some(tag) => *tag,
            None => return self.fail(),
        };
        self.pos += 1;

        if tag == b'R' {
            self.expect(b':')?;
            let n = self.int_until(b';')?;
            let Some(cell) = usize::try_from(n)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| self.slots.get(i))
                .cloned()
            else {
                return Err(Malformed(start));
            };
            self.shared.insert(Rc::as_ptr(&cell));
            return Ok(Val::Ref(cell));
        }

        let cell = Val::new_ref(Val::Null);
        self.slots.push(cell.clone());
        let value = match tag {
            b'N' => {
                self.expect(b';')?;
                Val::Null
            }
            b'b' => {
                self.expect(b':')?;
                match self.int_until(b';')? {
                    0 => Val::Bool(false),
                    1 => Val::Bool(true),
                    _ => return Err(Malformed(start)),
                }
            }
            b'i' => {
                self.expect(b':')?;
                Val::Int(self.int_until(b';')?)
            }
            b'd' => {
                self.expect(b':')?;
                let text = self.until(b';')?;
                let parsed = match text {
                    b"INF" => Some(f64::INFINITY),
                    b"-INF" => Some(f64::NEG_INFINITY),
                    b"NAN" => Some(f64::NAN),
                    other => std::str::from_utf8(other).ok().and_then(|t| t.parse().ok()),
                };
                match parsed {
                    Some(f) => Val::Float(f),
                    None => return Err(Malformed(start)),
                }
            }
            b's' => {
                self.expect(b':')?;
                let bytes = self.string_body()?;
                self.expect(b';')?;
                Val::from(bytes)
            }
            b'r' => {
                self.expect(b':')?;
                let n = self.int_until(b';')?;
                let target = usize::try_from(n)
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|i| self.slots.get(i));
                match target {
                    Some(target) => target.borrow().clone(),
                    None => return Err(Malformed(start)),
                }
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.count_until(b':')?;
                self.expect(b'{')?;
                let mut arr = ArrayData::with_capacity(count);
                for _ in 0..count {
                    let key = self.key()?;
                    let item = self.value(depth + 1)?;
                    arr.insert(key, item);
                }
                self.expect(b'}')?;
                Val::from(arr)
            }
            b'O' => {
                self.expect(b':')?;
                let name = self.string_body()?;
                self.expect(b':')?;
                let obj = match self.new_object(&name) {
                    Ok(obj) => obj,
                    Err(err) => {
                        self.error = Some(err);
                        return Err(Malformed(start));
                    }
                };
                *cell.borrow_mut() = Val::Object(obj.clone());
                let count = self.count_until(b':')?;
                self.expect(b'{')?;
                let custom = self.vm.context.interner.intern_lower(b"__unserialize");
                if obj.class().find_method(custom).is_some() {
                    let mut data = ArrayData::with_capacity(count);
                    for _ in 0..count {
                        let key = self.key()?;
                        let item = self.value(depth + 1)?;
                        data.insert(key, item);
                    }
                    self.pending.push(Pending::Unserialize(obj.clone(), Val::from(data)));
                } else {
                    for _ in 0..count {
                        let key = self.key()?;
                        let item = self.value(depth + 1)?;
                        let name = demangle(&key.to_bytes());
                        let sym = self.vm.context.interner.intern(&name);
                        obj.borrow_mut().properties.insert(sym, item);
                    }
                    let wakeup = self.vm.context.interner.intern_lower(b"__wakeup");
                    if obj.class().find_method(wakeup).is_some() {
                        self.pending.push(Pending::Wakeup(obj.clone()));
                    }
                }
                self.expect(b'}')?;
                Val::Object(obj)
            }
            _ => return Err(Malformed(start)),
        };
        *cell.borrow_mut() = value;
        Ok(Val::Ref(cell))
    }

    fn new_object(&mut self, name: &[u8]) -> Result<ObjectRef, VmError> {
        let class = match self.vm.context.lookup_class(name) {
            Some(class) if !class.is_interface && !class.is_abstract => class,
            _ => {
                tracing::debug!(
                    class = %String::from_utf8_lossy(name),
                    "unserialize: unknown class, using stdClass"
                );
                match self.vm.context.lookup_class(b"stdClass") {
                    Some(class) => class,
                    None => return Err(VmError::RuntimeError("stdClass is not registered".into())),
                }
            }
        };
        if class.lc_name == self.vm.names.closure || class.lc_name == self.vm.names.generator {
            let shown = self.vm.sym_name(class.name);
            return Err(self.vm.throw_error(
                "Exception",
                &format!("Unserialization of '{}' is not allowed", shown),
            ));
        }
        self.vm.create_object(class)
    }
}

/// Drop slot cells nothing shares, leaving plain values.
fn unwrap_cells(
    value: Val,
    shared: &HashSet<*const RefCell<Val>>,
    seen_cells: &mut HashSet<*const RefCell<Val>>,
    seen_objects: &mut HashSet<ObjectId>,
) -> Val {
    with_stack(|| unwrap_cells_inner(value, shared, seen_cells, seen_objects))
}

fn unwrap_cells_inner(
    value: Val,
    shared: &HashSet<*const RefCell<Val>>,
    seen_cells: &mut HashSet<*const RefCell<Val>>,
    seen_objects: &mut HashSet<ObjectId>,
) -> Val {
    match value {
        Val::Ref(cell) => {
            let ptr = Rc::as_ptr(&cell);
            if !shared.contains(&ptr) {
                let inner = std::mem::take(&mut *cell.borrow_mut());
                return unwrap_cells(inner, shared, seen_cells, seen_objects);
            }
            if seen_cells.insert(ptr) {
                let inner = std::mem::take(&mut *cell.borrow_mut());
                let fixed = unwrap_cells(inner, shared, seen_cells, seen_objects);
                *cell.borrow_mut() = fixed;
            }
            Val::Ref(cell)
        }
        Val::Array(arr) => {
            let mut arr = Rc::unwrap_or_clone(arr);
            let next_free = arr.next_free;
            let mut out = ArrayData::with_capacity(arr.len());
            for (key, item) in std::mem::take(&mut arr.map) {
                out.insert(key, unwrap_cells(item, shared, seen_cells, seen_objects));
            }
            out.next_free = out.next_free.max(next_free);
            Val::from(out)
        }
        Val::Object(obj) => {
            if seen_objects.insert(obj.id()) {
                let props = std::mem::take(&mut obj.borrow_mut().properties);
                let fixed = props
                    .into_iter()
                    .map(|(name, item)| (name, unwrap_cells(item, shared, seen_cells, seen_objects)))
                    .collect();
                obj.borrow_mut().properties = fixed;
            }
            Val::Object(obj)
        }
        other => other,
    }
}

/// `\0*\0name` and `\0Class\0name` to `name`.
fn demangle(name: &[u8]) -> Vec<u8> {
    if name.first() == Some(&0) {
        if let Some(end) = name[1..].iter().position(|&b| b == 0) {
            return name[end + 2..].to_vec();
        }
    }
    name.to_vec()
}

pub fn php_unserialize(vm: &mut VM, args: &[Val]) -> Result<Val, VmError> {
    check_arity(vm, "unserialize", args, 1, 2)?;
    let input = super::string_arg(vm, "unserialize", args, 0, "data")?;
    let data = input.as_bytes();
    if data.is_empty() {
        return Ok(Val::Bool(false));
    }
    let mut parser = Unserializer {
        vm: &mut *vm,
        data,
        pos: 0,
        slots: Vec::new(),
        shared: HashSet::new(),
        pending: Vec::new(),
        error: None,
    };
    let parsed = parser.value(0);
    let Unserializer {
        shared,
        pending,
        error,
        ..
    } = parser;
    let value = match parsed {
        Ok(value) => value,
        Err(Malformed(offset)) => {
            if let Some(err) = error {
                return Err(err);
            }
            vm.notice(&format!(
                "unserialize(): Error at offset {} of {} bytes",
                offset,
                data.len()
            ));
            return Ok(Val::Bool(false));
        }
    };
    let mut seen_cells = HashSet::new();
    let mut seen_objects = HashSet::new();
    let value = unwrap_cells(value, &shared, &mut seen_cells, &mut seen_objects).deref_val();
    for step in pending {
        match step {
            Pending::Unserialize(obj, data) => {
                let data = unwrap_cells(data, &shared, &mut seen_cells, &mut seen_objects);
                let method = vm.context.interner.intern_lower(b"__unserialize");
                vm.call_method_named(&obj, method, vec![data])?;
            }
            Pending::Wakeup(obj) => {
                let method = vm.context.interner.intern_lower(b"__wakeup");
                vm.call_method_named(&obj, method, Vec::new())?;
            }
        }
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::executor::{execute_code, run_code_capture_output};

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn demangles_property_names() {
        assert_eq!(demangle(b"\0*\0b"), b"b");
        assert_eq!(demangle(b"\0Foo\0c"), b"c");
        assert_eq!(demangle(b"plain"), b"plain");
    }

    #[test]
    fn scalars_and_arrays() {
        assert_eq!(
            run("<?php echo serialize([null, true, 7, 0.1, 'hé', ['k' => 1.0]]);"),
            "a:6:{i:0;N;i:1;b:1;i:2;i:7;i:3;d:0.1;i:4;s:3:\"hé\";i:5;a:1:{s:1:\"k\";d:1;}}"
        );
    }

    #[test]
    fn object_identity_uses_back_references() {
        assert_eq!(
            run("<?php $o = new stdClass; $o->n = 1; echo serialize([$o, $o]);"),
            "a:2:{i:0;O:8:\"stdClass\":1:{s:1:\"n\";i:1;}i:1;r:2;}"
        );
        let out = run(
            "<?php $o = new stdClass; $o->self = $o; $c = unserialize(serialize($o));
             var_dump($c->self === $c);",
        );
        assert_eq!(out, "bool(true)\n");
    }

    #[test]
    fn references_round_trip() {
        let out = run(
            "<?php $a = [1, 2]; $a[2] = &$a[0]; $s = serialize($a); echo $s, \"\\n\";
             $b = unserialize($s); $b[2] = 9; echo $b[0];",
        );
        assert_eq!(out, "a:3:{i:0;i:1;i:1;i:2;i:2;R:2;}\n9");
    }

    #[test]
    fn self_referential_array() {
        let out = run("<?php $a = []; $a[0] = &$a; echo serialize($a);");
        assert_eq!(out, "a:1:{i:0;a:1:{i:0;R:2;}}");
    }

    #[test]
    fn visibility_is_mangled() {
        let out = run(
            "<?php class V { public $a = 1; protected $b = 2; private $c = 3; }
             $s = serialize(new V); echo str_replace(\"\\0\", '~', $s), ' ';
             $v = unserialize($s); var_dump($v == new V);",
        );
        assert_eq!(
            out,
            "O:1:\"V\":3:{s:1:\"a\";i:1;s:4:\"~*~b\";i:2;s:4:\"~V~c\";i:3;} bool(true)\n"
        );
    }

    #[test]
    fn closures_and_generators_refuse() {
        let out = run(
            "<?php try { serialize(fn() => 1); } catch (Exception $e) { echo $e->getMessage(); }",
        );
        assert_eq!(out, "Serialization of 'Closure' is not allowed");
    }

    #[test]
    fn resources_become_zero() {
        assert_eq!(run("<?php echo serialize(fopen('php://memory', 'r'));"), "i:0;");
    }

    #[test]
    fn malformed_input_notices_and_returns_false() {
        let result = execute_code("<?php var_dump(unserialize('a:1:{i:0;'));").unwrap();
        assert_eq!(result.stdout, "bool(false)\n");
        assert!(result
            .stderr
            .contains("unserialize(): Error at offset 9 of 9 bytes"));
    }

    #[test]
    fn unknown_class_becomes_std_class() {
        let out = run("<?php $o = unserialize('O:7:\"Missing\":1:{s:1:\"x\";i:5;}'); echo get_class($o), $o->x;");
        assert_eq!(out, "stdClass5");
    }

    #[test]
    fn magic_hooks_run() {
        let out = run(
            "<?php class M {
                 public $v = 0;
                 function __serialize(): array { return ['v' => $this->v + 1]; }
                 function __unserialize(array $d): void { $this->v = $d['v'] * 10; }
             }
             class W { public $woke = false; function __wakeup() { $this->woke = true; } }
             $m = new M; $m->v = 1; $s = serialize($m); echo $s, ' ', unserialize($s)->v, ' ';
             var_dump(unserialize(serialize(new W))->woke);",
        );
        assert_eq!(out, "O:1:\"M\":1:{s:1:\"v\";i:2;} 20 bool(true)\n");
    }
}
