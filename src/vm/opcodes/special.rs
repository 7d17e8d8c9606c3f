//! Special language constructs
//!
//! Output, `exit`, casts, `clone`, `instanceof`, constants, `match` without
//! a matching arm, the `@` operator and the small stack opcodes.

use crate::core::value::{ArrayData, ArrayKey, PhpStr, Symbol, Val, format_float};
use crate::parser::ast::CastKind;
use crate::vm::engine::{VM, VmError};
use crate::vm::opcode::ClassOperand;

impl VM {
    pub(crate) fn exec_const(&mut self, idx: u32) -> Result<(), VmError> {
        let value = self
            .current_frame()?
            .chunk
            .constants
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| VmError::RuntimeError(format!("Invalid constant index {}", idx)))?;
        self.push_operand(value);
        Ok(())
    }

    pub(crate) fn exec_dup(&mut self) -> Result<(), VmError> {
        let top = self.peek_operand()?.clone();
        self.push_operand(top);
        Ok(())
    }

    pub(crate) fn exec_echo(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let bytes = self.to_php_string(&value)?;
        self.print_bytes(&bytes)
    }

    /// Interpolated string.
    pub(crate) fn exec_concat_n(&mut self, count: u32) -> Result<(), VmError> {
        let parts = self.pop_n_operands(count as usize)?;
        let mut out = Vec::new();
        for part in &parts {
            out.extend_from_slice(&self.to_php_string(&part.deref_val())?);
        }
        self.push_operand(Val::String(PhpStr::new(out)));
        Ok(())
    }

    /// `exit("bye")` prints, `exit(3)` sets the status.
    pub(crate) fn exec_exit(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let code = match value {
            Val::Null => 0,
            Val::Int(code) => code as i32,
            other => {
                let bytes = self.to_php_string(&other)?;
                self.print_bytes(&bytes)?;
                0
            }
        };
        Err(VmError::Exit(code))
    }

    pub(crate) fn exec_bool_not(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        self.push_operand(Val::Bool(!value.to_bool()));
        Ok(())
    }

    pub(crate) fn exec_bool_xor(&mut self) -> Result<(), VmError> {
        let b = self.pop_value()?;
        let a = self.pop_value()?;
        self.push_operand(Val::Bool(a.to_bool() ^ b.to_bool()));
        Ok(())
    }

    pub(crate) fn exec_to_bool(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        self.push_operand(Val::Bool(value.to_bool()));
        Ok(())
    }

    pub(crate) fn exec_cast(&mut self, kind: CastKind) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let result = self.cast_value(value, kind)?;
        self.push_operand(result);
        Ok(())
    }

    pub(crate) fn cast_value(&mut self, value: Val, kind: CastKind) -> Result<Val, VmError> {
        Ok(match kind {
            CastKind::Int => match &value {
                Val::Object(obj) => {
                    let name = self.class_name_of(obj);
                    self.warn(&format!("Object of class {} could not be converted to int", name));
                    Val::Int(1)
                }
                other => Val::Int(other.to_int()),
            },
            CastKind::Float => match &value {
                Val::Object(obj) => {
                    let name = self.class_name_of(obj);
                    self.warn(&format!(
                        "Object of class {} could not be converted to float",
                        name
                    ));
                    Val::Float(1.0)
                }
                other => Val::Float(other.to_float()),
            },
            CastKind::String => Val::String(self.to_php_str(&value)?),
            CastKind::Bool => Val::Bool(value.to_bool()),
            CastKind::Array => self.to_array_value(value),
            CastKind::Object => self.to_object_value(value)?,
            CastKind::Unset => Val::Null,
        })
    }

    /// `(array)$x`
    pub(crate) fn to_array_value(&mut self, value: Val) -> Val {
        match value {
            Val::Array(_) => value,
            Val::Null => Val::empty_array(),
            Val::Object(obj) => {
                if self.closure_data(&obj).is_some() {
                    return Val::from(ArrayData::from_list([Val::Object(obj)]));
                }
                let data = obj.borrow();
                let mut arr = ArrayData::with_capacity(data.properties.len());
                for (name, prop) in &data.properties {
                    let key = self.context.interner.lookup(*name).unwrap_or_default();
                    arr.insert(ArrayKey::from_bytes(key), prop.clone());
                }
                Val::from(arr)
            }
            scalar => Val::from(ArrayData::from_list([scalar])),
        }
    }

    /// `(object)$x`
    pub(crate) fn to_object_value(&mut self, value: Val) -> Result<Val, VmError> {
        let properties: Vec<(Symbol, Val)> = match value {
            Val::Object(_) => return Ok(value),
            Val::Null => Vec::new(),
            Val::Array(arr) => arr
                .iter()
                .map(|(key, v)| (self.context.interner.intern(&key.to_bytes()), v.clone()))
                .collect(),
            scalar => vec![(self.context.interner.intern(b"scalar"), scalar)],
        };
        let Some(class) = self.context.lookup_class(b"stdClass") else {
            return Err(self.class_not_found("stdClass"));
        };
        let obj = self.create_object(class)?;
        {
            let mut data = obj.borrow_mut();
            for (name, v) in properties {
                data.properties.insert(name, v);
            }
        }
        Ok(Val::Object(obj))
    }

    pub(crate) fn exec_clone(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        match value {
            Val::Object(obj) => {
                let copy = self.clone_object(&obj)?;
                self.push_operand(Val::Object(copy));
                Ok(())
            }
            _ => Err(self.error("__clone method called on non-object")),
        }
    }

    /// `$x instanceof C`. A class that does not exist matches nothing.
    pub(crate) fn exec_instance_of(&mut self, op: ClassOperand) -> Result<(), VmError> {
        let target = match op {
            ClassOperand::Dynamic => {
                let class = self.pop_value()?;
                match class {
                    Val::Object(obj) => Some(obj.class().lc_name),
                    Val::String(name) => Some(self.context.interner.intern_lower(name.as_bytes())),
                    _ => {
                        return Err(self.error("Class name must be a valid object or a string"));
                    }
                }
            }
            ClassOperand::Named(name) => Some(self.lc_symbol(name)),
            other => Some(self.resolve_class_operand(other)?.lc_name),
        };
        let value = self.pop_value()?;
        let result = match (value, target) {
            (Val::Object(obj), Some(lc)) => self.instance_of(&obj, lc),
            _ => false,
        };
        self.push_operand(Val::Bool(result));
        Ok(())
    }

    /// `const X = expr;`
    pub(crate) fn exec_declare_const(&mut self, name: Symbol) -> Result<(), VmError> {
        let value = self.pop_value()?;
        if self.context.constants.contains_key(&name) {
            let shown = self.sym_name(name);
            self.warn(&format!("Constant {} already defined", shown));
            return Ok(());
        }
        self.context.constants.insert(name, value);
        Ok(())
    }

    /// Global constant by name. Namespaced names fall back to the global one.
    pub(crate) fn lookup_constant(&mut self, name: Symbol) -> Option<Val> {
        if let Some(value) = self.context.constants.get(&name) {
            return Some(value.clone());
        }
        let bytes = self.context.interner.lookup(name)?.to_vec();
        let bytes = bytes.strip_prefix(b"\\").unwrap_or(&bytes);
        let short = match memchr::memrchr(b'\\', bytes) {
            Some(pos) => &bytes[pos + 1..],
            None => bytes,
        };
        let sym = self.context.interner.find(short)?;
        self.context.constants.get(&sym).cloned()
    }

    pub(crate) fn exec_fetch_const(&mut self, name: Symbol) -> Result<(), VmError> {
        match self.lookup_constant(name) {
            Some(value) => {
                self.push_operand(value);
                Ok(())
            }
            None => {
                let shown = self.sym_name(name);
                Err(self.error(&format!("Undefined constant \"{}\"", shown)))
            }
        }
    }

    /// No arm of a `match` without `default` accepted the subject.
    pub(crate) fn exec_match_error(&mut self) -> Result<(), VmError> {
        let subject = self.pop_value()?;
        let shown = match &subject {
            Val::Null => "NULL".to_string(),
            Val::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Val::Int(i) => i.to_string(),
            Val::Float(f) => format_float(*f, -1),
            Val::String(s) => {
                let escaped = String::from_utf8_lossy(s.as_bytes())
                    .replace('\\', "\\\\")
                    .replace('\'', "\\'");
                format!("'{}'", escaped)
            }
            other => format!("of type {}", self.debug_type(other)),
        };
        Err(self.throw_error(
            "UnhandledMatchError",
            &format!("Unhandled match case {}", shown),
        ))
    }

    pub(crate) fn exec_begin_silence(&mut self) -> Result<(), VmError> {
        self.silence_depth += 1;
        Ok(())
    }

    pub(crate) fn exec_end_silence(&mut self) -> Result<(), VmError> {
        self.silence_depth = self.silence_depth.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn casts_follow_php_rules() {
        assert_eq!(
            run("<?php echo (int)'12abc', '|', (int)3.99, '|', (string)false, '|', (float)'1e2';"),
            "12|3||100"
        );
        assert_eq!(run("<?php $o = (object)['a' => 1]; echo $o->a, count((array)$o);"), "11");
        assert_eq!(run("<?php var_dump((array)null, (array)'x');"), "array(0) {\n}\narray(1) {\n  [0]=>\n  string(1) \"x\"\n}\n");
    }

    #[test]
    fn instanceof_with_unknown_class_is_false() {
        assert_eq!(
            run("<?php class A {} $a = new A; var_dump($a instanceof A, $a instanceof Nope, 1 instanceof A);"),
            "bool(true)\nbool(false)\nbool(false)\n"
        );
    }

    #[test]
    fn unhandled_match_reports_the_subject() {
        let out = run(
            "<?php try { echo match('x') { 'y' => 1 }; } catch (\\UnhandledMatchError $e) { echo $e->getMessage(); }",
        );
        assert_eq!(out, "Unhandled match case 'x'");
    }

    #[test]
    fn exit_prints_string_argument() {
        assert_eq!(run("<?php echo 'a'; exit('b'); echo 'c';"), "ab");
    }

    #[test]
    fn constants_declare_once() {
        let (_, out) = run_code_capture_output("<?php const A = 1; const A = 2; echo A;").unwrap();
        assert_eq!(out, "1");
    }
}
