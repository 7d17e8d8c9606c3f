//! Class table management
//!
//! Turning compiled [`ClassTemplate`]s into runtime [`ClassDef`]s, resolving
//! class operands (`Foo`, `self`, `parent`, `static`, dynamic names), class
//! constants with lazy initializers, and static properties.
//!
//! ## Early binding
//!
//! Unconditional top-level classes are declared before the script body runs
//! (`HoistClasses`), as long as their parent and interfaces are already
//! known. The `DeclareClass` instruction at the original position is then a
//! no-op; classes that could not be hoisted are declared there.

use crate::compiler::chunk::{ClassTemplate, CodeChunk, ConstInit};
use crate::core::value::{PhpStr, Reference, Symbol, Val};
use crate::runtime::context::{
    ClassConstEntry, ClassDef, ConstState, MethodBody, MethodEntry, PropertyEntry, StaticPropEntry,
};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::CallFrame;
use crate::vm::opcode::ClassOperand;
use std::cell::RefCell;
use std::rc::Rc;

/// Initializer of a property that still has to be evaluated.
struct PendingDefault {
    name: Symbol,
    chunk: Rc<CodeChunk>,
    is_static: bool,
}

impl VM {
    /// Lowercase form of an interned name.
    pub(crate) fn lc_symbol(&mut self, sym: Symbol) -> Symbol {
        let bytes = self
            .context
            .interner
            .lookup(sym)
            .map(|b| b.to_vec())
            .unwrap_or_default();
        self.context.interner.intern_lower(&bytes)
    }

    /// Class by name as written, case-insensitively.
    pub(crate) fn lookup_class_sym(&self, name: Symbol) -> Option<Rc<ClassDef>> {
        let bytes = self.context.interner.lookup(name)?;
        self.context.lookup_class(bytes)
    }

    pub(crate) fn class_not_found(&mut self, name: &str) -> VmError {
        self.error(&format!("Class \"{}\" not found", name))
    }

    pub(crate) fn resolve_class_operand(&mut self, op: ClassOperand) -> Result<Rc<ClassDef>, VmError> {
        match op {
            ClassOperand::Named(sym) => match self.lookup_class_sym(sym) {
                Some(class) => Ok(class),
                None => {
                    let name = self.sym_name(sym);
                    Err(self.class_not_found(&name))
                }
            },
            ClassOperand::SelfClass => self
                .current_scope()
                .ok_or_else(|| self.error_no_scope("self")),
            ClassOperand::Static => self
                .current_called_scope()
                .or_else(|| self.current_scope())
                .ok_or_else(|| self.error_no_scope("static")),
            ClassOperand::Parent => {
                let scope = self
                    .current_scope()
                    .ok_or_else(|| self.error_no_scope("parent"))?;
                match scope.parent.clone() {
                    Some(parent) => Ok(parent),
                    None => Err(self.error(
                        "Cannot use \"parent\" when current class scope has no parent",
                    )),
                }
            }
            ClassOperand::Dynamic => {
                let value = self.pop_value()?;
                self.class_from_value(&value)
            }
        }
    }

    fn error_no_scope(&mut self, keyword: &str) -> VmError {
        self.error(&format!(
            "Cannot use \"{}\" when no class scope is active",
            keyword
        ))
    }

    /// Class named by a string or the class of an object.
    pub(crate) fn class_from_value(&mut self, value: &Val) -> Result<Rc<ClassDef>, VmError> {
        match value {
            Val::Object(obj) => Ok(obj.class()),
            Val::String(name) => match self.context.lookup_class(name.as_bytes()) {
                Some(class) => Ok(class),
                None => {
                    let name = name.to_string_lossy();
                    Err(self.class_not_found(&name))
                }
            },
            other => {
                let ty = self.debug_type(other);
                Err(self.error(&format!("Cannot use value of type {} as class name", ty)))
            }
        }
    }

    /// `HoistClasses`: declare the running chunk's top-level classes whose
    /// dependencies are already declared.
    pub(crate) fn hoist_classes(&mut self) -> Result<(), VmError> {
        let chunk = self.current_frame()?.chunk.clone();
        loop {
            let mut progress = false;
            for template in chunk.classes.iter().filter(|t| t.top_level) {
                let lc = self.lc_symbol(template.name);
                if self.context.classes.contains_key(&lc) {
                    continue;
                }
                let ready = template
                    .parent
                    .iter()
                    .chain(template.interfaces.iter())
                    .all(|dep| self.lookup_class_sym(*dep).is_some());
                if ready {
                    self.declare_class(template)?;
                    progress = true;
                }
            }
            if !progress {
                return Ok(());
            }
        }
    }

    /// `DeclareClass(idx)`.
    pub(crate) fn exec_declare_class(&mut self, idx: u32) -> Result<(), VmError> {
        let template = {
            let chunk = &self.current_frame()?.chunk;
            chunk
                .classes
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| VmError::RuntimeError(format!("Invalid class index {}", idx)))?
        };
        let lc = self.lc_symbol(template.name);
        if let Some(origin) = self.class_origins.get(&lc) {
            if Rc::ptr_eq(origin, &template) {
                return Ok(());
            }
        }
        self.declare_class(&template)
    }

    pub(crate) fn declare_class(&mut self, template: &Rc<ClassTemplate>) -> Result<(), VmError> {
        let name = self.sym_name(template.name);
        let lc = self.lc_symbol(template.name);
        if self.context.classes.contains_key(&lc) {
            return Err(self.fatal(&format!(
                "Cannot declare class {}, because the name is already in use",
                name
            )));
        }

        let parent = match template.parent {
            Some(parent_sym) => {
                let Some(parent) = self.lookup_class_sym(parent_sym) else {
                    let parent_name = self.sym_name(parent_sym);
                    return Err(self.class_not_found(&parent_name));
                };
                let parent_name = self.sym_name(parent.name);
                if parent.is_interface {
                    return Err(self.fatal(&format!(
                        "Class {} cannot extend interface {}",
                        name, parent_name
                    )));
                }
                if parent.is_final {
                    return Err(self.fatal(&format!(
                        "Class {} cannot extend final class {}",
                        name, parent_name
                    )));
                }
                Some(parent)
            }
            None => None,
        };

        let mut def = ClassDef::derive(template.name, lc, parent);
        def.is_interface = template.is_interface;
        def.is_abstract = template.is_abstract;
        def.is_final = template.is_final;

        for iface_sym in &template.interfaces {
            let Some(iface) = self.lookup_class_sym(*iface_sym) else {
                let iface_name = self.sym_name(*iface_sym);
                return Err(self.error(&format!("Interface \"{}\" not found", iface_name)));
            };
            if !iface.is_interface {
                let iface_name = self.sym_name(iface.name);
                return Err(self.fatal(&format!(
                    "{} cannot implement {} - it is not an interface",
                    name, iface_name
                )));
            }
            def.add_interface(iface.lc_name);
            for inherited in &iface.interfaces {
                def.add_interface(*inherited);
            }
            for (key, method) in &iface.methods {
                def.methods.entry(*key).or_insert_with(|| method.clone());
            }
            for (key, constant) in &iface.constants {
                def.constants.entry(*key).or_insert_with(|| constant.clone());
            }
        }

        for constant in &template.constants {
            let state = match &constant.init {
                ConstInit::Value(v) => ConstState::Ready(v.clone()),
                ConstInit::Thunk(chunk) => ConstState::Pending(chunk.clone()),
            };
            def.constants.insert(
                constant.name,
                Rc::new(ClassConstEntry {
                    state: RefCell::new(state),
                    visibility: constant.visibility,
                    declaring_class: lc,
                }),
            );
        }

        for method in &template.methods {
            let key = self.lc_symbol(method.name);
            if let Some(existing) = def.methods.get(&key) {
                if existing.is_final && existing.declaring_class != lc {
                    let owner = self.class_display_name(existing.declaring_class);
                    let method_name = self.sym_name(existing.name);
                    return Err(self.fatal(&format!(
                        "Cannot override final method {}::{}()",
                        owner, method_name
                    )));
                }
            }
            let body = if method.is_abstract {
                MethodBody::Abstract
            } else {
                MethodBody::User(method.func.clone())
            };
            def.methods.insert(
                key,
                Rc::new(MethodEntry {
                    name: method.name,
                    body,
                    visibility: method.visibility,
                    is_static: method.is_static,
                    is_final: method.is_final,
                    declaring_class: lc,
                }),
            );
        }

        if !def.is_abstract && !def.is_interface {
            let mut missing: Vec<(String, String)> = def
                .methods
                .values()
                .filter(|m| m.is_abstract())
                .map(|m| {
                    (
                        self.class_display_name(m.declaring_class),
                        self.sym_name(m.name),
                    )
                })
                .collect();
            if !missing.is_empty() {
                missing.sort();
                let count = missing.len();
                let mut listed: Vec<String> = missing
                    .iter()
                    .take(3)
                    .map(|(class, method)| format!("{}::{}", class, method))
                    .collect();
                if count > 3 {
                    listed.push("...".to_string());
                }
                return Err(self.fatal(&format!(
                    "Class {} contains {} abstract method{} and must therefore be declared abstract or implement the remaining methods ({})",
                    name,
                    count,
                    if count == 1 { "" } else { "s" },
                    listed.join(", ")
                )));
            }
        }

        let mut pending = Vec::new();
        for prop in &template.properties {
            let default = match &prop.default {
                Some(ConstInit::Value(v)) => Some(v.clone()),
                Some(ConstInit::Thunk(chunk)) => {
                    pending.push(PendingDefault {
                        name: prop.name,
                        chunk: chunk.clone(),
                        is_static: prop.is_static,
                    });
                    Some(Val::Null)
                }
                None => None,
            };
            if prop.is_static {
                let cell = self.new_cell(default.unwrap_or(Val::Null));
                def.static_props.insert(
                    prop.name,
                    StaticPropEntry {
                        cell,
                        visibility: prop.visibility,
                        declaring_class: lc,
                    },
                );
            } else {
                def.properties.insert(
                    prop.name,
                    PropertyEntry {
                        name: prop.name,
                        default,
                        visibility: prop.visibility,
                        declaring_class: lc,
                        ty: prop.ty.clone(),
                        is_readonly: prop.is_readonly,
                    },
                );
            }
        }

        let mut def = Rc::new(def);
        if !pending.is_empty() {
            def = self.evaluate_defaults(def, lc, pending)?;
        }

        tracing::debug!(class = %name, parent = ?template.parent.map(|p| p.0), "class declared");
        self.context.classes.insert(lc, def);
        self.class_origins.insert(lc, template.clone());
        Ok(())
    }

    /// Evaluate constant-expression property defaults. The class is visible
    /// under its own name while they run.
    fn evaluate_defaults(
        &mut self,
        def: Rc<ClassDef>,
        lc: Symbol,
        pending: Vec<PendingDefault>,
    ) -> Result<Rc<ClassDef>, VmError> {
        self.context.classes.insert(lc, def.clone());
        let mut values = Vec::new();
        let mut failure = None;
        for item in pending {
            match self.eval_thunk(item.chunk, Some(def.clone())) {
                Ok(value) => values.push((item.name, item.is_static, value)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        self.context.classes.remove(&lc);
        if let Some(err) = failure {
            return Err(err);
        }

        let mut def = def;
        for (name, is_static, value) in values {
            if is_static {
                if let Some(entry) = def.static_props.get(&name) {
                    *entry.cell.borrow_mut() = value;
                }
                continue;
            }
            let Some(def_mut) = Rc::get_mut(&mut def) else {
                return Err(VmError::RuntimeError(
                    "class definition is shared during declaration".into(),
                ));
            };
            if let Some(entry) = def_mut.properties.get_mut(&name) {
                entry.default = Some(value);
            }
        }
        Ok(def)
    }

    /// Declared name of a class given its lowercase key.
    pub(crate) fn class_display_name(&self, lc: Symbol) -> String {
        match self.context.classes.get(&lc) {
            Some(class) => self.sym_name(class.name),
            None => self.sym_name(lc),
        }
    }

    /// `DeclareFunction(idx)`.
    pub(crate) fn exec_declare_function(&mut self, idx: u32) -> Result<(), VmError> {
        let func = {
            let chunk = &self.current_frame()?.chunk;
            chunk
                .functions
                .get(idx as usize)
                .cloned()
                .ok_or_else(|| VmError::RuntimeError(format!("Invalid function index {}", idx)))?
        };
        let name = self.sym_name(func.name);
        let lc = self.lc_symbol(func.name);
        let native_exists = self
            .context
            .engine
            .registry
            .get_function(name.as_bytes())
            .is_some();
        if native_exists || self.context.functions.contains_key(&lc) {
            return Err(self.fatal(&format!("Cannot redeclare {}()", name)));
        }
        self.context.functions.insert(lc, func);
        Ok(())
    }

    /// Run an initializer chunk and return the value it produces.
    pub(crate) fn eval_thunk(
        &mut self,
        chunk: Rc<CodeChunk>,
        scope: Option<Rc<ClassDef>>,
    ) -> Result<Val, VmError> {
        let mut frame = CallFrame::new(chunk);
        frame.called_scope = scope.clone();
        frame.scope = scope;
        frame.stack_base = self.operand_stack.len();
        frame.pending_base = self.pending_calls.len();
        frame.silence_at_entry = self.silence_depth;
        let depth = self.frames.len();
        self.frames.push(frame);
        self.native_depth += 1;
        let result = self.run_loop(depth);
        self.native_depth -= 1;
        result?;
        self.pop_operand()
    }

    pub(crate) fn eval_const_init(
        &mut self,
        init: &ConstInit,
        scope: Option<Rc<ClassDef>>,
    ) -> Result<Val, VmError> {
        match init {
            ConstInit::Value(v) => Ok(v.clone()),
            ConstInit::Thunk(chunk) => self.eval_thunk(chunk.clone(), scope),
        }
    }

    /// Value of `Class::NAME`, evaluating its initializer on first use.
    pub(crate) fn class_constant(
        &mut self,
        class: &Rc<ClassDef>,
        name: Symbol,
    ) -> Result<Val, VmError> {
        let Some(entry) = class.constants.get(&name).cloned() else {
            let class_name = self.sym_name(class.name);
            let const_name = self.sym_name(name);
            return Err(self.error(&format!(
                "Undefined constant {}::{}",
                class_name, const_name
            )));
        };
        if !self.member_visible(entry.visibility, entry.declaring_class) {
            let class_name = self.sym_name(class.name);
            let const_name = self.sym_name(name);
            return Err(self.error(&format!(
                "Cannot access {} constant {}::{}",
                entry.visibility.as_str(),
                class_name,
                const_name
            )));
        }
        let state = std::mem::replace(&mut *entry.state.borrow_mut(), ConstState::Evaluating);
        match state {
            ConstState::Ready(value) => {
                *entry.state.borrow_mut() = ConstState::Ready(value.clone());
                Ok(value)
            }
            ConstState::Evaluating => {
                let class_name = self.class_display_name(entry.declaring_class);
                let const_name = self.sym_name(name);
                Err(self.error(&format!(
                    "Cannot declare self-referencing constant {}::{}",
                    class_name, const_name
                )))
            }
            ConstState::Pending(chunk) => {
                let scope = self.context.classes.get(&entry.declaring_class).cloned();
                match self.eval_thunk(chunk.clone(), scope) {
                    Ok(value) => {
                        *entry.state.borrow_mut() = ConstState::Ready(value.clone());
                        Ok(value)
                    }
                    Err(err) => {
                        *entry.state.borrow_mut() = ConstState::Pending(chunk);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Cell of `Class::$name`.
    pub(crate) fn static_prop_cell(
        &mut self,
        class: &Rc<ClassDef>,
        name: Symbol,
    ) -> Result<Reference, VmError> {
        let Some(entry) = class.static_props.get(&name) else {
            let class_name = self.sym_name(class.name);
            let prop = self.sym_name(name);
            return Err(self.error(&format!(
                "Access to undeclared static property {}::${}",
                class_name, prop
            )));
        };
        if !self.member_visible(entry.visibility, entry.declaring_class) {
            let class_name = self.sym_name(class.name);
            let prop = self.sym_name(name);
            let visibility = entry.visibility.as_str();
            return Err(self.error(&format!(
                "Cannot access {} property {}::${}",
                visibility, class_name, prop
            )));
        }
        Ok(entry.cell.clone())
    }

    pub(crate) fn exec_fetch_class_const(
        &mut self,
        op: ClassOperand,
        name: Symbol,
    ) -> Result<(), VmError> {
        let class = self.resolve_class_operand(op)?;
        let value = self.class_constant(&class, name)?;
        self.push_operand(value);
        Ok(())
    }

    /// `A::$x`. Under `isset`/`??` a missing class or property reads as null.
    pub(crate) fn exec_fetch_static_prop(
        &mut self,
        op: ClassOperand,
        name: Symbol,
        quiet: bool,
    ) -> Result<(), VmError> {
        let cell = match self
            .resolve_class_operand(op)
            .and_then(|class| self.static_prop_cell(&class, name))
        {
            Ok(cell) => cell,
            Err(VmError::Exception(_)) if quiet => {
                self.push_operand(Val::Null);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        let value = cell.borrow().deref_val();
        self.push_operand(value);
        Ok(())
    }

    /// `X::class`
    pub(crate) fn exec_fetch_class_name(&mut self, op: ClassOperand) -> Result<(), VmError> {
        let name = match op {
            ClassOperand::Named(sym) => self.sym_name(sym),
            ClassOperand::Dynamic => match self.pop_value()? {
                Val::Object(obj) => self.class_name_of(&obj),
                other => {
                    let ty = self.debug_type(&other);
                    return Err(self.type_error(&format!(
                        "Cannot use \"::class\" on value of type {}",
                        ty
                    )));
                }
            },
            other => {
                let class = self.resolve_class_operand(other)?;
                self.sym_name(class.name)
            }
        };
        self.push_operand(Val::String(PhpStr::from(name)));
        Ok(())
    }

}
