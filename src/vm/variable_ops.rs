//! Variables and lvalue paths
//!
//! Reads of plain variables are single opcodes. Everything that writes
//! (`=`, `=&`, `unset`, `op=`, `++`, by-reference arguments) goes through an
//! [`LvalPath`](crate::compiler::chunk::LvalPath): a base (`$x`, `$$x`,
//! `$this`, `A::$x`, a temporary) followed by `[k]`, `[]` and `->p` steps.
//!
//! ## Walking a path
//!
//! The path's operands are popped and turned into a [`ResolvedPath`] first.
//! The walk then descends from the base, creating missing arrays on the way
//! and un-sharing copy-on-write arrays with `Rc::make_mut`. Whenever it
//! reaches a reference cell or an object it restarts from that cell or
//! object, so at most one `RefCell` borrow is held at a time.
//!
//! Notices raised on the way are buffered and reported after the walk;
//! failures are turned into thrown errors once every borrow is released.

use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayData, ArrayKey, PhpStr, Reference, Symbol, Val};
use crate::compiler::chunk::{ConstInit, PathBase, PathStep};
use crate::vm::engine::{VM, VmError};
use crate::vm::opcode::ClassOperand;
use crate::vm::type_conversion::TypeCheck;
use std::cell::RefCell;
use std::rc::Rc;

const FALSE_TO_ARRAY: &str = "Automatic conversion of false to array is deprecated";

#[derive(Clone)]
pub(crate) enum PathRoot {
    Var(Symbol),
    Object(ObjectRef),
    Cell(Reference),
    Temp(Val),
}

#[derive(Clone)]
pub(crate) enum PathKey {
    Dim(ArrayKey),
    Append,
    Prop(Symbol),
}

#[derive(Clone)]
pub(crate) struct ResolvedPath {
    pub root: PathRoot,
    pub steps: Vec<PathKey>,
}

pub(crate) enum PathOp {
    Write(Val),
    /// Turn the target into a reference slot and hand back its cell.
    MakeRef,
    /// Rebind the target slot to an existing cell.
    Bind(Reference),
    Unset,
}

impl PathOp {
    fn is_unset(&self) -> bool {
        matches!(self, PathOp::Unset)
    }
}

enum Walk {
    Done,
    /// The target slot holds a reference: write into this cell once every
    /// borrow is released.
    WriteCell(Reference),
    Cell { cell: Reference, fresh: bool },
    /// Continue from an object or a cell at the given step.
    Restart(PathRoot, usize),
}

enum WalkError {
    Throw(&'static str, String),
    PropertyOnNonObject {
        verb: &'static str,
        name: Symbol,
        type_name: &'static str,
    },
    ObjectAsArray(ObjectRef),
    Vm(VmError),
}

impl From<VmError> for WalkError {
    fn from(err: VmError) -> Self {
        WalkError::Vm(err)
    }
}

enum Diag {
    Deprecated(&'static str),
    Warning(String),
}

fn error(message: &str) -> WalkError {
    WalkError::Throw("Error", message.to_string())
}

fn scalar_type(value: &Val) -> &'static str {
    match value {
        Val::Null => "null",
        Val::Bool(_) => "bool",
        Val::Int(_) => "int",
        Val::Float(_) => "float",
        Val::String(_) => "string",
        Val::Array(_) => "array",
        Val::Resource(_) => "resource",
        Val::Object(_) => "object",
        Val::Ref(cell) => scalar_type(&cell.borrow()),
    }
}

fn fresh_cell(slot: &mut Val) -> Walk {
    if let Val::Ref(cell) = slot {
        return Walk::Cell {
            cell: cell.clone(),
            fresh: false,
        };
    }
    let cell = Rc::new(RefCell::new(std::mem::take(slot)));
    *slot = Val::Ref(cell.clone());
    Walk::Cell { cell, fresh: true }
}

/// Apply `op` to a slot that is the final target.
fn apply_to_slot(slot: &mut Val, op: &PathOp) -> Walk {
    match op {
        PathOp::Write(value) => match slot {
            Val::Ref(cell) => Walk::WriteCell(cell.clone()),
            _ => {
                *slot = value.clone();
                Walk::Done
            }
        },
        PathOp::MakeRef => fresh_cell(slot),
        PathOp::Bind(cell) => {
            *slot = Val::Ref(cell.clone());
            Walk::Done
        }
        PathOp::Unset => Walk::Done,
    }
}

/// Final step applied to an array container.
fn apply_in_array(arr: &mut ArrayData, key: &PathKey, op: &PathOp) -> Result<Walk, WalkError> {
    const APPEND_FAILED: &str =
        "Cannot add element to the array as the next element is already occupied";
    match key {
        PathKey::Dim(key) => {
            if op.is_unset() {
                arr.remove(key);
                return Ok(Walk::Done);
            }
            Ok(apply_to_slot(arr.slot_mut(key.clone()), op))
        }
        PathKey::Append => {
            if op.is_unset() {
                return Err(error("Cannot use [] for unsetting"));
            }
            match arr.push_slot() {
                Some(slot) => Ok(apply_to_slot(slot, op)),
                None => Err(error(APPEND_FAILED)),
            }
        }
        PathKey::Prop(_) => Err(error("Cannot use array as object")),
    }
}

/// `$str[i] = "c"`
fn write_string_offset(
    slot: &mut Val,
    key: &PathKey,
    op: &PathOp,
    diags: &mut Vec<Diag>,
) -> Result<Walk, WalkError> {
    let Val::String(s) = &*slot else {
        return Ok(Walk::Done);
    };
    let value = match op {
        PathOp::Write(value) => value,
        PathOp::Unset => return Err(error("Cannot unset string offsets")),
        _ => return Err(error("Cannot create references to/from string offsets")),
    };
    let offset = match key {
        PathKey::Append => return Err(error("[] operator not supported for strings")),
        PathKey::Dim(ArrayKey::Int(i)) => *i,
        PathKey::Dim(ArrayKey::Str(_)) => {
            return Err(WalkError::Throw(
                "TypeError",
                "Cannot access offset of type string on string".to_string(),
            ));
        }
        PathKey::Prop(_) => return Err(error("Cannot use string offset as an object")),
    };
    let replacement = match value.deref_val() {
        Val::String(r) => r.as_bytes().to_vec(),
        other => other.scalar_to_bytes(14).unwrap_or_default(),
    };
    let Some(&byte) = replacement.first() else {
        return Err(error("Cannot assign an empty string to a string offset"));
    };
    if replacement.len() > 1 {
        diags.push(Diag::Warning(
            "Only the first byte will be assigned to the string offset".to_string(),
        ));
    }
    let mut bytes = s.as_bytes().to_vec();
    let index = if offset < 0 {
        offset + bytes.len() as i64
    } else {
        offset
    };
    if index < 0 {
        diags.push(Diag::Warning(format!("Illegal string offset {}", offset)));
        return Ok(Walk::Done);
    }
    let index = index as usize;
    if index >= bytes.len() {
        bytes.resize(index + 1, b' ');
    }
    bytes[index] = byte;
    *slot = Val::String(PhpStr::new(bytes));
    Ok(Walk::Done)
}

/// Walk `steps` starting at `slot`. `steps` is never empty.
fn descend(
    mut slot: &mut Val,
    steps: &[PathKey],
    op: &PathOp,
    diags: &mut Vec<Diag>,
) -> Result<Walk, WalkError> {
    let mut idx = 0;
    loop {
        if let Val::Ref(cell) = &*slot {
            return Ok(Walk::Restart(PathRoot::Cell(cell.clone()), idx));
        }
        let step = &steps[idx];
        let last = idx + 1 == steps.len();

        if let PathKey::Prop(name) = step {
            return match &*slot {
                Val::Object(obj) => Ok(Walk::Restart(PathRoot::Object(obj.clone()), idx)),
                _ if op.is_unset() => Ok(Walk::Done),
                other => {
                    let verb = if matches!(op, PathOp::Write(_)) && last {
                        "assign"
                    } else {
                        "modify"
                    };
                    Err(WalkError::PropertyOnNonObject {
                        verb,
                        name: *name,
                        type_name: scalar_type(other),
                    })
                }
            };
        }

        match &*slot {
            Val::Array(_) => {}
            Val::Null => {
                if op.is_unset() {
                    return Ok(Walk::Done);
                }
                *slot = Val::empty_array();
            }
            Val::Bool(false) => {
                if op.is_unset() {
                    return Ok(Walk::Done);
                }
                diags.push(Diag::Deprecated(FALSE_TO_ARRAY));
                *slot = Val::empty_array();
            }
            Val::String(_) => {
                if !last {
                    return Err(error("Cannot use string offset as an array"));
                }
                return write_string_offset(slot, step, op, diags);
            }
            Val::Object(obj) => return Ok(Walk::Restart(PathRoot::Object(obj.clone()), idx)),
            _ if op.is_unset() => {
                return Err(error("Cannot unset offset in a non-array variable"));
            }
            _ => return Err(error("Cannot use a scalar value as an array")),
        }

        let Val::Array(rc) = &mut *slot else {
            return Ok(Walk::Done);
        };
        let arr = Rc::make_mut(rc);
        if last {
            return apply_in_array(arr, step, op);
        }
        slot = match step {
            PathKey::Dim(key) => arr.slot_mut(key.clone()),
            _ => match arr.push_slot() {
                Some(next) => next,
                None => {
                    return Err(error(
                        "Cannot add element to the array as the next element is already occupied",
                    ));
                }
            },
        };
        idx += 1;
    }
}

impl VM {
    /// Pop a path's operands and resolve its base and keys.
    pub(crate) fn resolve_path(&mut self, idx: u32) -> Result<ResolvedPath, VmError> {
        let path = {
            let frame = self.current_frame()?;
            frame
                .chunk
                .paths
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| VmError::RuntimeError(format!("Invalid path index {}", idx)))?
        };
        let operands = self.pop_n_operands(path.operand_count())?;
        let mut operands = operands.into_iter().map(|v| v.deref_val());
        let mut next_operand = move || operands.next().unwrap_or(Val::Null);

        let root = match path.base {
            PathBase::Local(name) => PathRoot::Var(name),
            PathBase::Dynamic => {
                let name = next_operand();
                let name = self.to_php_string(&name)?;
                PathRoot::Var(self.context.interner.intern(&name))
            }
            PathBase::This => match self.frames.last().and_then(|f| f.this.clone()) {
                Some(this) => PathRoot::Object(this),
                None => return Err(self.error("Using $this when not in object context")),
            },
            PathBase::StaticProp(op, name) => {
                let class = match op {
                    ClassOperand::Dynamic => {
                        let value = next_operand();
                        self.class_from_value(&value)?
                    }
                    other => self.resolve_class_operand(other)?,
                };
                PathRoot::Cell(self.static_prop_cell(&class, name)?)
            }
            PathBase::Temp => PathRoot::Temp(next_operand()),
        };

        let mut steps = Vec::with_capacity(path.steps.len());
        for step in &path.steps {
            let key = match step {
                PathStep::Dim => {
                    let key = next_operand();
                    PathKey::Dim(self.to_array_key(&key)?)
                }
                PathStep::Append => PathKey::Append,
                PathStep::Prop(name) => PathKey::Prop(*name),
                PathStep::PropDyn => {
                    let name = next_operand();
                    let name = self.to_php_string(&name)?;
                    PathKey::Prop(self.context.interner.intern(&name))
                }
            };
            steps.push(key);
        }
        Ok(ResolvedPath { root, steps })
    }

    /// Apply `op` at the end of `path`. Returns the cell for `MakeRef` and
    /// the value actually stored for `Write` (after property type coercion).
    pub(crate) fn walk_path(
        &mut self,
        path: &ResolvedPath,
        mut op: PathOp,
    ) -> Result<(Option<Reference>, Option<Val>), VmError> {
        let mut diags = Vec::new();
        let mut root = path.root.clone();
        let mut idx = 0;
        let steps = &path.steps;

        let outcome = loop {
            let walk = match &root {
                PathRoot::Var(name) => self.walk_var(*name, steps, &op, &mut diags),
                PathRoot::Cell(cell) => {
                    if steps.len() == idx {
                        Ok(self.walk_bare_cell(cell, &op))
                    } else {
                        match cell.try_borrow_mut() {
                            Ok(mut guard) => descend(&mut guard, &steps[idx..], &op, &mut diags),
                            Err(_) => Err(WalkError::Vm(VmError::RuntimeError(
                                "reference cell is already borrowed".into(),
                            ))),
                        }
                    }
                }
                PathRoot::Object(obj) => {
                    if steps.len() == idx {
                        Ok(Walk::Done)
                    } else {
                        let obj = obj.clone();
                        self.walk_object(&obj, steps, idx, &mut op, &mut diags)
                    }
                }
                PathRoot::Temp(value) => match value {
                    Val::Object(obj) if !steps.is_empty() => {
                        Ok(Walk::Restart(PathRoot::Object(obj.clone()), 0))
                    }
                    _ if steps.is_empty() => {
                        let mut tmp = value.clone();
                        Ok(apply_to_slot(&mut tmp, &op))
                    }
                    _ => {
                        let mut tmp = value.clone();
                        descend(&mut tmp, steps, &op, &mut diags)
                    }
                },
            };
            match walk {
                Ok(Walk::Restart(next, rel)) => {
                    // Object restarts carry an absolute index.
                    idx = match (&root, &next) {
                        (PathRoot::Temp(_), _) => rel,
                        (PathRoot::Object(_), _) => rel,
                        _ => idx + rel,
                    };
                    root = next;
                }
                other => break other,
            }
        };

        for diag in diags {
            match diag {
                Diag::Deprecated(msg) => self.deprecated(msg),
                Diag::Warning(msg) => self.warn(&msg),
            }
        }

        let written = match &op {
            PathOp::Write(value) => Some(value.clone()),
            _ => None,
        };
        match outcome {
            Ok(Walk::Done) | Ok(Walk::Restart(..)) => Ok((None, written)),
            Ok(Walk::WriteCell(cell)) => {
                if let Some(value) = &written {
                    *cell.borrow_mut() = value.clone();
                }
                Ok((None, written))
            }
            Ok(Walk::Cell { cell, fresh }) => {
                if fresh {
                    self.track_cell(&cell);
                }
                Ok((Some(cell), written))
            }
            Err(err) => Err(self.walk_failure(err)),
        }
    }

    fn walk_failure(&mut self, err: WalkError) -> VmError {
        match err {
            WalkError::Vm(err) => err,
            WalkError::ObjectAsArray(obj) => {
                let name = self.class_name_of(&obj);
                self.error(&format!("Cannot use object of type {} as array", name))
            }
            WalkError::PropertyOnNonObject {
                verb,
                name,
                type_name,
            } => {
                let prop = self.sym_name(name);
                self.error(&format!(
                    "Attempt to {} property \"{}\" on {}",
                    verb, prop, type_name
                ))
            }
            WalkError::Throw(class, message) => self.throw_error(class, &message),
        }
    }

    fn walk_var(
        &mut self,
        name: Symbol,
        steps: &[PathKey],
        op: &PathOp,
        diags: &mut Vec<Diag>,
    ) -> Result<Walk, WalkError> {
        if steps.is_empty() {
            let vars = self.vars_mut();
            return Ok(match op {
                PathOp::Unset => {
                    vars.shift_remove(&name);
                    Walk::Done
                }
                PathOp::Bind(cell) => {
                    vars.insert(name, Val::Ref(cell.clone()));
                    Walk::Done
                }
                _ => apply_to_slot(vars.entry(name).or_default(), op),
            });
        }
        let vars = self.vars_mut();
        if op.is_unset() && !vars.contains_key(&name) {
            return Ok(Walk::Done);
        }
        descend(vars.entry(name).or_default(), steps, op, diags)
    }

    /// A static property with no further steps.
    fn walk_bare_cell(&mut self, cell: &Reference, op: &PathOp) -> Walk {
        match op {
            PathOp::Write(_) => Walk::WriteCell(cell.clone()),
            PathOp::MakeRef => Walk::Cell {
                cell: cell.clone(),
                fresh: false,
            },
            PathOp::Bind(source) => {
                let value = source.borrow().clone();
                *cell.borrow_mut() = value;
                Walk::Done
            }
            PathOp::Unset => Walk::Done,
        }
    }

    /// Step `idx` applied to an object.
    fn walk_object(
        &mut self,
        obj: &ObjectRef,
        steps: &[PathKey],
        idx: usize,
        op: &mut PathOp,
        diags: &mut Vec<Diag>,
    ) -> Result<Walk, WalkError> {
        let last = idx + 1 == steps.len();
        let name = match &steps[idx] {
            PathKey::Prop(name) => *name,
            key => return self.walk_array_access(obj, key, steps, idx, op),
        };
        self.check_property_write(obj, name, last, op)?;

        let Some(mut data) = obj.try_borrow_mut() else {
            return Err(WalkError::Vm(VmError::RuntimeError(
                "object is already borrowed".into(),
            )));
        };
        if last {
            return Ok(match op {
                PathOp::Unset => {
                    data.properties.shift_remove(&name);
                    Walk::Done
                }
                PathOp::Bind(cell) => {
                    data.properties.insert(name, Val::Ref(cell.clone()));
                    Walk::Done
                }
                _ => apply_to_slot(data.properties.entry(name).or_default(), op),
            });
        }
        if op.is_unset() && !data.properties.contains_key(&name) {
            return Ok(Walk::Done);
        }
        let slot = data.properties.entry(name).or_default();
        match descend(slot, &steps[idx + 1..], op, diags)? {
            Walk::Restart(root, rel) => Ok(Walk::Restart(root, idx + 1 + rel)),
            other => Ok(other),
        }
    }

    /// Visibility, readonly and typed-property checks before a write.
    fn check_property_write(
        &mut self,
        obj: &ObjectRef,
        name: Symbol,
        last: bool,
        op: &mut PathOp,
    ) -> Result<(), WalkError> {
        let class = obj.class();
        let Some(entry) = class.properties.get(&name).cloned() else {
            return Ok(());
        };
        let class_name = self.sym_name(class.name);
        let prop = self.sym_name(name);
        if !self.member_visible(entry.visibility, entry.declaring_class) {
            return Err(error(&format!(
                "Cannot {} {} property {}::${}",
                if op.is_unset() { "unset" } else { "access" },
                entry.visibility.as_str(),
                class_name,
                prop
            )));
        }
        if entry.is_readonly {
            let initialized = obj.borrow().properties.contains_key(&name);
            let in_scope = self
                .current_scope()
                .is_some_and(|s| s.lc_name == entry.declaring_class);
            if initialized || !last || !matches!(op, PathOp::Write(_)) {
                return Err(error(&format!(
                    "Cannot modify readonly property {}::${}",
                    class_name, prop
                )));
            }
            if !in_scope {
                let scope = self.scope_description();
                return Err(error(&format!(
                    "Cannot initialize readonly property {}::${} from {}",
                    class_name, prop, scope
                )));
            }
        }
        let value = match &*op {
            PathOp::Write(value) if last => value.clone(),
            _ => return Ok(()),
        };
        if let Some(ty) = &entry.ty {
            let strict = self.caller_is_strict();
            let declaring = self.context.classes.get(&entry.declaring_class).cloned();
            match self.check_type(value.clone(), ty, strict, declaring.as_ref())? {
                TypeCheck::Accepted(coerced) => *op = PathOp::Write(coerced),
                TypeCheck::Rejected => {
                    let given = self.debug_type(&value);
                    let shown = self.type_hint_display(ty);
                    return Err(WalkError::Throw(
                        "TypeError",
                        format!(
                            "Cannot assign {} to property {}::${} of type {}",
                            given, class_name, prop, shown
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// `$obj[k] = v` on an `ArrayAccess` implementation.
    fn walk_array_access(
        &mut self,
        obj: &ObjectRef,
        key: &PathKey,
        steps: &[PathKey],
        idx: usize,
        op: &PathOp,
    ) -> Result<Walk, WalkError> {
        if !self.implements_array_access(obj) {
            return Err(WalkError::ObjectAsArray(obj.clone()));
        }
        let offset = match key {
            PathKey::Dim(key) => key.to_val(),
            _ => Val::Null,
        };
        let last = idx + 1 == steps.len();
        if last {
            match op {
                PathOp::Write(value) => {
                    self.array_access_set(obj, offset, value.clone())?;
                    return Ok(Walk::Done);
                }
                PathOp::Unset => {
                    self.array_access_unset(obj, offset)?;
                    return Ok(Walk::Done);
                }
                _ => {}
            }
        }
        let inner = self.array_access_get(obj, offset)?;
        match inner {
            Val::Object(inner) if !last => Ok(Walk::Restart(PathRoot::Object(inner), idx + 1)),
            other => {
                let name = self.class_name_of(obj);
                self.notice(&format!(
                    "Indirect modification of overloaded element of {} has no effect",
                    name
                ));
                let cell = self.new_cell(other);
                Ok(Walk::Cell { cell, fresh: false })
            }
        }
    }

    /// Read a resolved path the way an rvalue would, with notices.
    pub(crate) fn read_path(&mut self, path: &ResolvedPath, quiet: bool) -> Result<Val, VmError> {
        let mut value = match &path.root {
            PathRoot::Var(name) => match self.read_var(*name) {
                Some(value) => value,
                None => {
                    if !quiet {
                        let shown = self.sym_name(*name);
                        self.warn(&format!("Undefined variable ${}", shown));
                    }
                    Val::Null
                }
            },
            PathRoot::Object(obj) => Val::Object(obj.clone()),
            PathRoot::Cell(cell) => cell.borrow().clone(),
            PathRoot::Temp(value) => value.clone(),
        };
        for step in &path.steps {
            value = match step {
                PathKey::Dim(key) => self.read_dim(&value, &key.to_val(), quiet)?,
                PathKey::Append => return Err(self.error("Cannot use [] for reading")),
                PathKey::Prop(name) => self.read_prop_of(&value, *name, quiet)?,
            };
        }
        Ok(value)
    }

    /// `SendPath` to a by-value parameter.
    pub(crate) fn path_read(&mut self, idx: u32) -> Result<Val, VmError> {
        let path = self.resolve_path(idx)?;
        self.read_path(&path, false)
    }

    /// Reference to the slot a path names, creating it when missing.
    pub(crate) fn path_make_ref(&mut self, idx: u32) -> Result<Reference, VmError> {
        let path = self.resolve_path(idx)?;
        match self.walk_path(&path, PathOp::MakeRef)? {
            (Some(cell), _) => Ok(cell),
            (None, _) => {
                let value = self.read_path(&path, true)?;
                Ok(self.new_cell(value))
            }
        }
    }

    // Opcode handlers

    pub(crate) fn exec_load_var(&mut self, name: Symbol, quiet: bool) -> Result<(), VmError> {
        if name == self.names.this {
            let this = self.frames.last().and_then(|f| f.this.clone());
            self.push_operand(this.map(Val::Object).unwrap_or(Val::Null));
            return Ok(());
        }
        let value = match self.read_var(name) {
            Some(value) => value,
            None => {
                if !quiet {
                    let shown = self.sym_name(name);
                    self.warn(&format!("Undefined variable ${}", shown));
                }
                Val::Null
            }
        };
        self.push_operand(value);
        Ok(())
    }

    pub(crate) fn exec_load_var_dynamic(&mut self, quiet: bool) -> Result<(), VmError> {
        let name = self.pop_value()?;
        let name = self.to_php_string(&name)?;
        let sym = self.context.interner.intern(&name);
        self.exec_load_var(sym, quiet)
    }

    pub(crate) fn exec_load_this(&mut self) -> Result<(), VmError> {
        match self.frames.last().and_then(|f| f.this.clone()) {
            Some(this) => {
                self.push_operand(Val::Object(this));
                Ok(())
            }
            None => Err(self.error("Using $this when not in object context")),
        }
    }

    pub(crate) fn exec_assign(&mut self, idx: u32) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let path = self.resolve_path(idx)?;
        let (_, written) = self.walk_path(&path, PathOp::Write(value))?;
        self.push_operand(written.unwrap_or(Val::Null));
        Ok(())
    }

    /// `$a = &$b`: the source cell is on top of the target's operands.
    pub(crate) fn exec_assign_ref(&mut self, idx: u32) -> Result<(), VmError> {
        let source = self.pop_operand()?;
        let cell = match source {
            Val::Ref(cell) => cell,
            other => {
                if !matches!(other, Val::Object(_)) {
                    self.notice("Only variables should be assigned by reference");
                }
                self.new_cell(other)
            }
        };
        let path = self.resolve_path(idx)?;
        self.walk_path(&path, PathOp::Bind(cell.clone()))?;
        let value = cell.borrow().clone();
        self.push_operand(value);
        Ok(())
    }

    pub(crate) fn exec_make_ref(&mut self, idx: u32) -> Result<(), VmError> {
        let cell = self.path_make_ref(idx)?;
        self.push_operand(Val::Ref(cell));
        Ok(())
    }

    pub(crate) fn exec_unset(&mut self, idx: u32) -> Result<(), VmError> {
        let path = self.resolve_path(idx)?;
        if let (PathRoot::Cell(_), true) = (&path.root, path.steps.is_empty()) {
            return Err(self.error("Attempt to unset static property"));
        }
        self.walk_path(&path, PathOp::Unset)?;
        Ok(())
    }

    /// `global $x`
    pub(crate) fn exec_bind_global(&mut self, name: Symbol) -> Result<(), VmError> {
        if self.current_frame()?.uses_globals {
            return Ok(());
        }
        let slot = self.context.globals.entry(name).or_default();
        let cell = match slot {
            Val::Ref(cell) => cell.clone(),
            _ => {
                let cell = Rc::new(RefCell::new(std::mem::take(slot)));
                *slot = Val::Ref(cell.clone());
                self.track_cell(&cell);
                cell
            }
        };
        self.bind_var(name, cell);
        Ok(())
    }

    /// `static $x = init;`
    pub(crate) fn exec_bind_static(&mut self, name: Symbol, init: u32) -> Result<(), VmError> {
        let (func, chunk, scope) = {
            let frame = self.current_frame()?;
            (frame.func.clone(), frame.chunk.clone(), frame.scope.clone())
        };
        let existing = match &func {
            Some(func) => func.statics.borrow().get(&name).cloned(),
            None => self.script_statics.get(&name).cloned(),
        };
        let cell = match existing {
            Some(cell) => cell,
            None => {
                let init = chunk
                    .thunks
                    .get(init as usize)
                    .cloned()
                    .unwrap_or(ConstInit::Value(Val::Null));
                let value = self.eval_const_init(&init, scope)?;
                let cell = self.new_cell(value);
                match &func {
                    Some(func) => {
                        func.statics.borrow_mut().insert(name, cell.clone());
                    }
                    None => {
                        self.script_statics.insert(name, cell.clone());
                    }
                }
                cell
            }
        };
        self.bind_var(name, cell);
        Ok(())
    }

    pub(crate) fn exec_isset(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        self.push_operand(Val::Bool(!value.is_null()));
        Ok(())
    }

    pub(crate) fn exec_is_empty(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        self.push_operand(Val::Bool(!value.to_bool()));
        Ok(())
    }
}
