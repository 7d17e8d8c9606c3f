//! Calls
//!
//! Every way of calling code ends up as a [`Callable`], resolved once from
//! the call site (`f()`, `$obj->m()`, `A::m()`, `new A`) or from a value
//! (`$f()`, `call_user_func`, `array_map`) and dispatched with one match.
//!
//! A call is set up in three steps: an `Init*` opcode resolves the callee
//! into a [`PendingCall`], `Send*` opcodes collect the arguments, and
//! `DoCall` enters the function. User functions get a new [`CallFrame`];
//! natives run immediately and push their result.
//!
//! Rust code that needs a value back (natives taking callbacks, magic
//! methods, destructors) uses [`VM::call_callable`], which runs a nested
//! dispatch loop until the callee returns.

use crate::compiler::chunk::{TypeHint, UserFunc};
use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayData, ArrayKey, Symbol, Val, Visibility};
use crate::runtime::context::{ClassDef, MethodBody, MethodEntry, NativeHandler};
use crate::vm::engine::{MAX_FRAMES, MAX_NESTED_CALLS, PendingCall, VM, VmError};
use crate::vm::frame::{CallFrame, Completion};
use crate::vm::opcode::ClassOperand;
use crate::vm::type_conversion::TypeCheck;
use std::rc::Rc;

#[derive(Clone)]
pub enum Callable {
    NamedFunction(Rc<UserFunc>),
    NativeFunction {
        name: Symbol,
        handler: NativeHandler,
        by_ref: Rc<[usize]>,
    },
    /// `$obj->m()`; `class` is the late static binding class.
    BoundMethod {
        object: ObjectRef,
        method: Rc<MethodEntry>,
        class: Rc<ClassDef>,
    },
    /// `A::m()`, possibly forwarding a compatible `$this`.
    StaticMethod {
        class: Rc<ClassDef>,
        method: Rc<MethodEntry>,
        this: Option<ObjectRef>,
    },
    Closure(ObjectRef),
    /// Object with `__invoke`.
    InvokableObject(ObjectRef),
}

pub enum CallOutcome {
    /// A frame was pushed; its `Return` delivers the result.
    Entered,
    Value(Val),
}

/// Context a user function body runs in.
#[derive(Default)]
struct FrameBinding {
    this: Option<ObjectRef>,
    scope: Option<Rc<ClassDef>>,
    called_scope: Option<Rc<ClassDef>>,
    captured: Vec<(Symbol, Val)>,
}

fn user_param_by_ref(func: &UserFunc, idx: usize) -> bool {
    match func.params.get(idx) {
        Some(param) => param.by_ref,
        None => func
            .params
            .last()
            .is_some_and(|p| p.variadic && p.by_ref),
    }
}

fn strip_leading_backslash(name: &[u8]) -> &[u8] {
    name.strip_prefix(b"\\").unwrap_or(name)
}

impl VM {
    /// Resolve a function by name: user functions first, then natives.
    pub(crate) fn resolve_function(&mut self, name: &[u8]) -> Result<Callable, VmError> {
        let name = strip_leading_backslash(name);
        if let Some(callable) = self.find_function(name) {
            return Ok(callable);
        }
        // Unqualified calls inside a namespace fall back to the global function.
        if let Some(pos) = name.iter().rposition(|b| *b == b'\\') {
            if let Some(callable) = self.find_function(&name[pos + 1..]) {
                return Ok(callable);
            }
        }
        let shown = String::from_utf8_lossy(name).into_owned();
        Err(self.error(&format!("Call to undefined function {}()", shown)))
    }

    fn find_function(&mut self, name: &[u8]) -> Option<Callable> {
        if let Some(lc) = self.context.interner.find_lower(name) {
            if let Some(func) = self.context.functions.get(&lc) {
                return Some(Callable::NamedFunction(func.clone()));
            }
        }
        let native = self.context.engine.registry.get_function(name)?;
        let handler = native.handler;
        let by_ref: Rc<[usize]> = native.by_ref.clone().into();
        let name = self.context.interner.intern(name);
        Some(Callable::NativeFunction {
            name,
            handler,
            by_ref,
        })
    }

    pub(crate) fn function_exists(&self, name: &[u8]) -> bool {
        let name = strip_leading_backslash(name);
        let user = self
            .context
            .interner
            .find_lower(name)
            .is_some_and(|lc| self.context.functions.contains_key(&lc));
        user || self.context.engine.registry.get_function(name).is_some()
    }

    /// Method `name` of `class` as seen from the running scope. A private
    /// method of the calling class shadows whatever the object's class has.
    pub(crate) fn lookup_method(
        &mut self,
        class: &Rc<ClassDef>,
        name: Symbol,
    ) -> Result<Rc<MethodEntry>, VmError> {
        let lc = self.lc_symbol(name);
        if let Some(scope) = self.current_scope() {
            if class.extends_class(scope.lc_name) {
                if let Some(method) = scope.methods.get(&lc) {
                    if method.visibility == Visibility::Private
                        && method.declaring_class == scope.lc_name
                    {
                        return Ok(method.clone());
                    }
                }
            }
        }
        let Some(method) = class.find_method(lc).cloned() else {
            let class_name = self.sym_name(class.name);
            let method_name = self.sym_name(name);
            return Err(self.error(&format!(
                "Call to undefined method {}::{}()",
                class_name, method_name
            )));
        };
        if !self.member_visible(method.visibility, method.declaring_class) {
            let class_name = self.sym_name(class.name);
            let method_name = self.sym_name(method.name);
            let scope = self.scope_description();
            return Err(self.error(&format!(
                "Call to {} method {}::{}() from {}",
                method.visibility.as_str(),
                class_name,
                method_name,
                scope
            )));
        }
        Ok(method)
    }

    pub(crate) fn method_callable(
        &mut self,
        object: &ObjectRef,
        method: Rc<MethodEntry>,
        class: Rc<ClassDef>,
    ) -> Result<Callable, VmError> {
        if method.is_static {
            return Ok(Callable::StaticMethod {
                class,
                method,
                this: None,
            });
        }
        Ok(Callable::BoundMethod {
            object: object.clone(),
            method,
            class,
        })
    }

    /// `$obj->name(...)`
    pub(crate) fn object_method_callable(
        &mut self,
        target: Val,
        name: Symbol,
    ) -> Result<Callable, VmError> {
        let Val::Object(object) = target else {
            let method = self.sym_name(name);
            let ty = self.debug_type(&target);
            return Err(self.error(&format!(
                "Call to a member function {}() on {}",
                method, ty
            )));
        };
        let lc = self.lc_symbol(name);
        if lc == self.names.invoke && self.closure_data(&object).is_some() {
            return Ok(Callable::Closure(object));
        }
        let class = object.class();
        let method = self.lookup_method(&class, name)?;
        self.method_callable(&object, method, class)
    }

    /// `A::name(...)`. `forwarding` is set for `self::`, `parent::` and
    /// `static::`, which keep the late static binding class.
    pub(crate) fn static_method_callable(
        &mut self,
        class: Rc<ClassDef>,
        name: Symbol,
        forwarding: bool,
    ) -> Result<Callable, VmError> {
        let method = self.lookup_method(&class, name)?;
        let this = if method.is_static {
            None
        } else {
            let this = self
                .current_this()
                .filter(|t| t.class().is_subclass_of(method.declaring_class));
            if this.is_none() {
                let class_name = self.sym_name(class.name);
                let method_name = self.sym_name(method.name);
                return Err(self.error(&format!(
                    "Non-static method {}::{}() cannot be called statically",
                    class_name, method_name
                )));
            }
            this
        };
        let called = match &this {
            Some(object) => object.class(),
            None if forwarding => self
                .current_called_scope()
                .filter(|c| c.is_subclass_of(class.lc_name))
                .unwrap_or(class),
            None => class,
        };
        Ok(Callable::StaticMethod {
            class: called,
            method,
            this,
        })
    }

    /// Callable behind a value: `"f"`, `"A::m"`, `[$obj, "m"]`,
    /// `["A", "m"]`, a closure or an invokable object.
    pub fn resolve_callable(&mut self, value: &Val) -> Result<Callable, VmError> {
        match value.deref_val() {
            Val::String(s) => {
                let bytes = s.as_bytes();
                if let Some(pos) = memchr::memmem::find(bytes, b"::") {
                    let class = self.context.lookup_class(strip_leading_backslash(&bytes[..pos]));
                    let Some(class) = class else {
                        let name = String::from_utf8_lossy(&bytes[..pos]).into_owned();
                        return Err(self.class_not_found(&name));
                    };
                    let method = self.context.interner.intern(&bytes[pos + 2..]);
                    return self.static_method_callable(class, method, false);
                }
                self.resolve_function(bytes)
            }
            Val::Array(arr) => {
                if arr.len() != 2 {
                    return Err(self.error("Array callback must have exactly two elements"));
                }
                let target = arr.get(&ArrayKey::Int(0)).map(Val::deref_val);
                let method = arr.get(&ArrayKey::Int(1)).map(Val::deref_val);
                let (Some(target), Some(Val::String(method))) = (target, method) else {
                    return Err(self.error("Array callback must have exactly two elements"));
                };
                let method = self.context.interner.intern(method.as_bytes());
                match target {
                    Val::Object(_) => self.object_method_callable(target, method),
                    Val::String(class_name) => {
                        let Some(class) = self.context.lookup_class(class_name.as_bytes()) else {
                            let name = class_name.to_string_lossy();
                            return Err(self.class_not_found(&name));
                        };
                        self.static_method_callable(class, method, false)
                    }
                    _ => Err(self.error("Array callback must have exactly two elements")),
                }
            }
            Val::Object(obj) => {
                if self.closure_data(&obj).is_some() {
                    return Ok(Callable::Closure(obj));
                }
                if obj.class().find_method(self.names.invoke).is_some() {
                    return Ok(Callable::InvokableObject(obj));
                }
                let name = self.class_name_of(&obj);
                Err(self.error(&format!("Object of type {} is not callable", name)))
            }
            other => {
                let ty = self.debug_type(&other);
                Err(self.error(&format!("Value of type {} is not callable", ty)))
            }
        }
    }

    /// `is_callable()` without raising anything.
    pub(crate) fn is_callable_value(&self, value: &Val) -> bool {
        let method_exists = |class: &ClassDef, name: &[u8]| {
            self.context
                .interner
                .find_lower(name)
                .is_some_and(|lc| class.find_method(lc).is_some_and(|m| !m.is_abstract()))
        };
        match value {
            Val::Ref(cell) => self.is_callable_value(&cell.borrow()),
            Val::String(s) => {
                let bytes = s.as_bytes();
                match memchr::memmem::find(bytes, b"::") {
                    Some(pos) => self
                        .context
                        .lookup_class(strip_leading_backslash(&bytes[..pos]))
                        .is_some_and(|class| method_exists(&class, &bytes[pos + 2..])),
                    None => self.function_exists(bytes),
                }
            }
            Val::Array(arr) if arr.len() == 2 => {
                let target = arr.get(&ArrayKey::Int(0)).map(Val::deref_val);
                let method = arr.get(&ArrayKey::Int(1)).map(Val::deref_val);
                match (target, method) {
                    (Some(Val::Object(obj)), Some(Val::String(m))) => {
                        method_exists(&obj.class(), m.as_bytes())
                    }
                    (Some(Val::String(class)), Some(Val::String(m))) => self
                        .context
                        .lookup_class(class.as_bytes())
                        .is_some_and(|class| method_exists(&class, m.as_bytes())),
                    _ => false,
                }
            }
            Val::Object(obj) => {
                self.closure_data(obj).is_some()
                    || obj.class().find_method(self.names.invoke).is_some()
            }
            _ => false,
        }
    }

    /// Name of a callable for messages: `f`, `A::m` or `{closure}`.
    pub(crate) fn callable_name(&self, callable: &Callable) -> String {
        match callable {
            Callable::NamedFunction(func) => self.sym_name(func.name),
            Callable::NativeFunction { name, .. } => self.sym_name(*name),
            Callable::BoundMethod { method, .. } | Callable::StaticMethod { method, .. } => {
                format!(
                    "{}::{}",
                    self.class_display_name(method.declaring_class),
                    self.sym_name(method.name)
                )
            }
            Callable::Closure(_) => "{closure}".to_string(),
            Callable::InvokableObject(obj) => format!("{}::__invoke", self.class_name_of(obj)),
        }
    }

    /// Whether argument `idx` is taken by reference.
    pub(crate) fn param_by_ref(&self, callable: &Callable, idx: usize) -> bool {
        match callable {
            Callable::NamedFunction(func) => user_param_by_ref(func, idx),
            Callable::NativeFunction { by_ref, .. } => by_ref.contains(&idx),
            Callable::BoundMethod { method, .. } | Callable::StaticMethod { method, .. } => {
                match &method.body {
                    MethodBody::User(func) => user_param_by_ref(func, idx),
                    _ => false,
                }
            }
            Callable::Closure(obj) => self
                .closure_data(obj)
                .is_some_and(|data| user_param_by_ref(&data.func, idx)),
            Callable::InvokableObject(obj) => obj
                .class()
                .find_method(self.names.invoke)
                .is_some_and(|m| match &m.body {
                    MethodBody::User(func) => user_param_by_ref(func, idx),
                    _ => false,
                }),
        }
    }

    /// Call from Rust and wait for the result.
    pub fn call_callable(&mut self, callable: &Callable, args: Vec<Val>) -> Result<Val, VmError> {
        if self.native_depth >= MAX_NESTED_CALLS {
            return Err(self.error(&format!(
                "Maximum nesting level of {} nested engine calls reached",
                MAX_NESTED_CALLS
            )));
        }
        self.native_depth += 1;
        self.native_roots.push(args.clone());
        let depth = self.frames.len();
        let result = match self.invoke(callable.clone(), args, false) {
            Ok(CallOutcome::Value(value)) => Ok(value),
            Ok(CallOutcome::Entered) => self.run_loop(depth).and_then(|_| self.pop_operand()),
            Err(err) => Err(err),
        };
        self.native_roots.pop();
        self.native_depth -= 1;
        result
    }

    /// Call a value from Rust: `call_user_func` semantics.
    pub fn call_value(&mut self, callee: &Val, args: Vec<Val>) -> Result<Val, VmError> {
        let callable = self.resolve_callable(callee)?;
        self.call_callable(&callable, args)
    }

    pub(crate) fn call_method(
        &mut self,
        obj: &ObjectRef,
        method: &Rc<MethodEntry>,
        args: Vec<Val>,
    ) -> Result<Val, VmError> {
        let callable = self.method_callable(obj, method.clone(), obj.class())?;
        self.call_callable(&callable, args)
    }

    /// Call a method by lowercase name, ignoring visibility.
    pub(crate) fn call_method_named(
        &mut self,
        obj: &ObjectRef,
        lc_name: Symbol,
        args: Vec<Val>,
    ) -> Result<Val, VmError> {
        let Some(method) = obj.class().find_method(lc_name).cloned() else {
            let class_name = self.class_name_of(obj);
            let method_name = self.sym_name(lc_name);
            return Err(self.error(&format!(
                "Call to undefined method {}::{}()",
                class_name, method_name
            )));
        };
        self.call_method(obj, &method, args)
    }

    /// Start a call. User functions push a frame; everything else
    /// completes immediately.
    pub(crate) fn invoke(
        &mut self,
        callable: Callable,
        args: Vec<Val>,
        strict: bool,
    ) -> Result<CallOutcome, VmError> {
        match callable {
            Callable::NamedFunction(func) => {
                self.enter_user_function(func, args, FrameBinding::default(), strict)
            }
            Callable::NativeFunction { handler, .. } => {
                let value = self.call_native(handler, None, args)?;
                Ok(CallOutcome::Value(value))
            }
            Callable::BoundMethod {
                object,
                method,
                class,
            } => self.invoke_method(method, Some(object), class, args, strict),
            Callable::StaticMethod {
                class,
                method,
                this,
            } => self.invoke_method(method, this, class, args, strict),
            Callable::Closure(obj) => {
                let Some(data) = self.closure_data(&obj) else {
                    return Err(self.error("Closure object is not initialized"));
                };
                let binding = FrameBinding {
                    this: data.this.clone(),
                    scope: data.scope.clone(),
                    called_scope: data.called_scope.clone().or_else(|| data.scope.clone()),
                    captured: data.captured.clone(),
                };
                self.enter_user_function(data.func.clone(), args, binding, strict)
            }
            Callable::InvokableObject(obj) => {
                let class = obj.class();
                let method = self.lookup_method(&class, self.names.invoke)?;
                self.invoke_method(method, Some(obj), class, args, strict)
            }
        }
    }

    fn invoke_method(
        &mut self,
        method: Rc<MethodEntry>,
        this: Option<ObjectRef>,
        called: Rc<ClassDef>,
        args: Vec<Val>,
        strict: bool,
    ) -> Result<CallOutcome, VmError> {
        match &method.body {
            MethodBody::User(func) => {
                let scope = self
                    .context
                    .classes
                    .get(&method.declaring_class)
                    .cloned()
                    .or_else(|| Some(called.clone()));
                let binding = FrameBinding {
                    this,
                    scope,
                    called_scope: Some(called),
                    captured: Vec::new(),
                };
                self.enter_user_function(func.clone(), args, binding, strict)
            }
            MethodBody::Native(handler) => {
                let value = self.call_native(*handler, this, args)?;
                Ok(CallOutcome::Value(value))
            }
            MethodBody::Abstract => {
                let class_name = self.class_display_name(method.declaring_class);
                let method_name = self.sym_name(method.name);
                Err(self.error(&format!(
                    "Cannot call abstract method {}::{}()",
                    class_name, method_name
                )))
            }
        }
    }

    fn call_native(
        &mut self,
        handler: NativeHandler,
        this: Option<ObjectRef>,
        args: Vec<Val>,
    ) -> Result<Val, VmError> {
        self.native_this.push((self.frames.len(), this));
        self.native_roots.push(args.clone());
        let result = handler(self, &args);
        self.native_roots.pop();
        self.native_this.pop();
        result
    }

    fn enter_user_function(
        &mut self,
        func: Rc<UserFunc>,
        args: Vec<Val>,
        binding: FrameBinding,
        strict: bool,
    ) -> Result<CallOutcome, VmError> {
        if self.frames.len() >= MAX_FRAMES {
            return Err(self.error(&format!(
                "Maximum function nesting level of '{}' reached, aborting!",
                MAX_FRAMES
            )));
        }
        self.check_time_limit()?;

        let mut frame = CallFrame::new(func.chunk.clone());
        frame.func = Some(func.clone());
        frame.this = binding.this;
        frame.scope = binding.scope;
        frame.called_scope = binding.called_scope;
        for (name, value) in binding.captured {
            frame.locals.insert(name, value);
        }
        self.bind_args(&func, args, strict, &mut frame)?;

        if func.is_generator {
            let generator = self.create_generator(frame)?;
            return Ok(CallOutcome::Value(Val::Object(generator)));
        }
        frame.stack_base = self.operand_stack.len();
        frame.pending_base = self.pending_calls.len();
        frame.silence_at_entry = self.silence_depth;
        self.frames.push(frame);
        Ok(CallOutcome::Entered)
    }

    /// Bind passed arguments to parameters. Missing optional parameters are
    /// filled by the callee's prologue (`JmpIfArgPassed`/`BindDefault`).
    fn bind_args(
        &mut self,
        func: &Rc<UserFunc>,
        args: Vec<Val>,
        strict: bool,
        frame: &mut CallFrame,
    ) -> Result<(), VmError> {
        let required = func.required_params();
        if args.len() < required {
            let name = self.frame_function_name(frame);
            let exact = required == func.params.len();
            let message = format!(
                "Too few arguments to function {}(), {} passed in {} on line {} and {} {} expected",
                name,
                args.len(),
                self.current_file(),
                self.current_line(),
                if exact { "exactly" } else { "at least" },
                required
            );
            return Err(self.throw_error("ArgumentCountError", &message));
        }

        for (i, param) in func.params.iter().enumerate() {
            if param.variadic {
                let mut rest = ArrayData::new();
                for (j, arg) in args.iter().enumerate().skip(i) {
                    let value = if param.by_ref {
                        self.ref_arg(arg)
                    } else {
                        self.typed_arg(frame, i, j, arg.deref_val(), strict)?
                    };
                    rest.push(value);
                }
                frame.locals.insert(param.name, Val::Array(Rc::new(rest)));
                break;
            }
            let Some(arg) = args.get(i) else {
                continue;
            };
            let value = if param.by_ref {
                let value = self.ref_arg(arg);
                if let (Some(_), Val::Ref(cell)) = (&param.ty, &value) {
                    let current = cell.borrow().clone();
                    let checked = self.typed_arg(frame, i, i, current, strict)?;
                    *cell.borrow_mut() = checked;
                }
                value
            } else {
                self.typed_arg(frame, i, i, arg.deref_val(), strict)?
            };
            frame.locals.insert(param.name, value);
        }
        frame.args = args;
        Ok(())
    }

    fn ref_arg(&mut self, arg: &Val) -> Val {
        match arg {
            Val::Ref(cell) => Val::Ref(cell.clone()),
            other => Val::Ref(self.new_cell(other.clone())),
        }
    }

    /// Check argument `arg_idx` against parameter `param_idx`'s type.
    fn typed_arg(
        &mut self,
        frame: &CallFrame,
        param_idx: usize,
        arg_idx: usize,
        value: Val,
        strict: bool,
    ) -> Result<Val, VmError> {
        let Some(func) = frame.func.clone() else {
            return Ok(value);
        };
        let param = &func.params[param_idx];
        let Some(ty) = &param.ty else {
            return Ok(value);
        };
        if value.is_null() && param.has_default && ty.allows_null() {
            return Ok(value);
        }
        match self.check_type(value.clone(), ty, strict, frame.scope.as_ref())? {
            TypeCheck::Accepted(value) => Ok(value),
            TypeCheck::Rejected => {
                let name = self.frame_function_name(frame);
                let message = format!(
                    "{}(): Argument #{} (${}) must be of type {}, {} given, called in {} on line {}",
                    name,
                    arg_idx + 1,
                    self.sym_name(param.name),
                    self.type_hint_display(ty),
                    self.debug_type(&value),
                    self.current_file(),
                    self.current_line()
                );
                Err(self.type_error(&message))
            }
        }
    }

    // Opcode handlers

    pub(crate) fn exec_init_fcall(&mut self, name: Symbol) -> Result<(), VmError> {
        let bytes = self.context.interner.lookup(name).unwrap_or_default().to_vec();
        let callable = self.resolve_function(&bytes)?;
        self.push_pending(Some(callable), None);
        Ok(())
    }

    pub(crate) fn exec_init_dynamic_call(&mut self) -> Result<(), VmError> {
        let callee = self.pop_value()?;
        let callable = self.resolve_callable(&callee)?;
        self.push_pending(Some(callable), None);
        Ok(())
    }

    pub(crate) fn exec_init_method_call(&mut self, name: Symbol) -> Result<(), VmError> {
        let target = self.pop_value()?;
        let callable = self.object_method_callable(target, name)?;
        self.push_pending(Some(callable), None);
        Ok(())
    }

    pub(crate) fn exec_init_method_call_dynamic(&mut self) -> Result<(), VmError> {
        let name = self.pop_value()?;
        let target = self.pop_value()?;
        let callable = match name {
            Val::String(s) => {
                let sym = self.context.interner.intern(s.as_bytes());
                self.object_method_callable(target, sym)?
            }
            other @ Val::Object(_) => self.resolve_callable(&other)?,
            _ => return Err(self.error("Method name must be a string")),
        };
        self.push_pending(Some(callable), None);
        Ok(())
    }

    pub(crate) fn exec_init_static_call(
        &mut self,
        op: ClassOperand,
        name: Symbol,
    ) -> Result<(), VmError> {
        let forwarding = matches!(
            op,
            ClassOperand::SelfClass | ClassOperand::Parent | ClassOperand::Static
        );
        let class = self.resolve_class_operand(op)?;
        let callable = self.static_method_callable(class, name, forwarding)?;
        self.push_pending(Some(callable), None);
        Ok(())
    }

    pub(crate) fn exec_init_static_call_dynamic(&mut self, op: ClassOperand) -> Result<(), VmError> {
        let name = self.pop_value()?;
        let Val::String(name) = name else {
            return Err(self.error("Method name must be a string"));
        };
        let sym = self.context.interner.intern(name.as_bytes());
        self.exec_init_static_call(op, sym)
    }

    /// `new X`: the object goes on the stack right away; the constructor
    /// call is completed by `DoConstructorCall`.
    pub(crate) fn exec_new_object(&mut self, op: ClassOperand) -> Result<(), VmError> {
        let class = self.resolve_class_operand(op)?;
        self.check_instantiable(&class)?;
        let object = self.create_object(class.clone())?;
        self.push_operand(Val::Object(object.clone()));
        let callable = match class.find_method(self.names.construct).cloned() {
            Some(ctor) => {
                if !self.member_visible(ctor.visibility, ctor.declaring_class) {
                    let name = self.sym_name(class.name);
                    let scope = self.scope_description();
                    return Err(self.error(&format!(
                        "Call to {} {}::__construct() from {}",
                        ctor.visibility.as_str(),
                        name,
                        scope
                    )));
                }
                Some(Callable::BoundMethod {
                    object: object.clone(),
                    method: ctor,
                    class,
                })
            }
            None => None,
        };
        self.push_pending(callable, Some(object));
        Ok(())
    }

    fn push_pending(&mut self, callable: Option<Callable>, object: Option<ObjectRef>) {
        self.pending_calls.push(PendingCall {
            callable,
            args: Vec::new(),
            object,
        });
    }

    fn pending_call(&mut self) -> Result<&mut PendingCall, VmError> {
        self.pending_calls
            .last_mut()
            .ok_or_else(|| VmError::RuntimeError("Argument sent without a pending call".into()))
    }

    fn next_arg_by_ref(&self) -> bool {
        match self.pending_calls.last() {
            Some(PendingCall {
                callable: Some(callable),
                args,
                ..
            }) => self.param_by_ref(callable, args.len()),
            _ => false,
        }
    }

    pub(crate) fn exec_send_val(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let value = if self.next_arg_by_ref() {
            self.notice("Only variables should be passed by reference");
            Val::Ref(self.new_cell(value))
        } else {
            value
        };
        self.pending_call()?.args.push(value);
        Ok(())
    }

    pub(crate) fn exec_send_path(&mut self, path: u32) -> Result<(), VmError> {
        let value = if self.next_arg_by_ref() {
            Val::Ref(self.path_make_ref(path)?)
        } else {
            self.path_read(path)?
        };
        self.pending_call()?.args.push(value);
        Ok(())
    }

    /// `f(...$args)`
    pub(crate) fn exec_send_unpack(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let values = match &value {
            Val::Array(arr) => {
                if arr.keys().any(|k| matches!(k, ArrayKey::Str(_))) {
                    return Err(self.error("Cannot unpack array with string keys"));
                }
                arr.values().cloned().collect::<Vec<_>>()
            }
            Val::Object(obj) if obj.class().is_subclass_of(self.names.traversable) => self
                .iterate_to_vec(&value)?
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
            _ => return Err(self.error("Only arrays and Traversables can be unpacked")),
        };
        self.pending_call()?.args.extend(values);
        Ok(())
    }

    pub(crate) fn exec_do_call(&mut self) -> Result<(), VmError> {
        let Some(call) = self.pending_calls.pop() else {
            return Err(VmError::RuntimeError("DoCall without a pending call".into()));
        };
        let Some(callable) = call.callable else {
            return Err(VmError::RuntimeError("DoCall without a callee".into()));
        };
        let strict = self.caller_is_strict();
        match self.invoke(callable, call.args, strict)? {
            CallOutcome::Value(value) => self.push_operand(value),
            CallOutcome::Entered => {}
        }
        Ok(())
    }

    pub(crate) fn exec_do_constructor_call(&mut self) -> Result<(), VmError> {
        let Some(call) = self.pending_calls.pop() else {
            return Err(VmError::RuntimeError("Constructor call without a pending call".into()));
        };
        let Some(callable) = call.callable else {
            return Ok(());
        };
        let strict = self.caller_is_strict();
        if let CallOutcome::Entered = self.invoke(callable, call.args, strict)? {
            self.current_frame_mut()?.discard_return = true;
        }
        Ok(())
    }

    pub(crate) fn exec_jmp_if_arg_passed(&mut self, param: u32, target: u32) -> Result<(), VmError> {
        let frame = self.current_frame_mut()?;
        if frame.args.len() > param as usize {
            frame.ip = target as usize;
        }
        Ok(())
    }

    pub(crate) fn exec_bind_default(&mut self, param: u32) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let frame = self.current_frame_mut()?;
        let Some(func) = frame.func.clone() else {
            return Err(VmError::RuntimeError("Default parameter outside a function".into()));
        };
        let Some(param) = func.params.get(param as usize) else {
            return Err(VmError::RuntimeError("Invalid parameter index".into()));
        };
        let value = if param.by_ref {
            Val::Ref(self.new_cell(value))
        } else {
            value
        };
        self.current_frame_mut()?.locals.insert(param.name, value);
        Ok(())
    }

    /// `function () use (...) {}` and `fn () => ...`
    pub(crate) fn exec_make_closure(&mut self, func: u32, arrow: bool) -> Result<(), VmError> {
        let (func, this, scope, called_scope) = {
            let frame = self.current_frame()?;
            let Some(func) = frame.chunk.functions.get(func as usize).cloned() else {
                return Err(VmError::RuntimeError(format!("Invalid function index {}", func)));
            };
            let this = if func.is_static { None } else { frame.this.clone() };
            (func, this, frame.scope.clone(), frame.called_scope.clone())
        };
        let mut captured = Vec::with_capacity(func.uses.len());
        for var in &func.uses {
            if var.by_ref {
                let cell = self.var_cell(var.name);
                captured.push((var.name, Val::Ref(cell)));
                continue;
            }
            match self.read_var(var.name) {
                Some(value) => captured.push((var.name, value)),
                None if arrow => {}
                None => {
                    let name = self.sym_name(var.name);
                    self.warn(&format!("Undefined variable ${}", name));
                    captured.push((var.name, Val::Null));
                }
            }
        }
        let closure = self.new_closure(crate::compiler::chunk::ClosureData {
            func,
            captured,
            this,
            scope,
            called_scope,
        })?;
        self.push_operand(Val::Object(closure));
        Ok(())
    }

    pub(crate) fn exec_return(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let value = self.check_return_type(value, false)?;
        self.finish_return(value)
    }

    pub(crate) fn exec_return_void(&mut self) -> Result<(), VmError> {
        let value = self.check_return_type(Val::Null, true)?;
        self.finish_return(value)
    }

    fn check_return_type(&mut self, value: Val, implicit: bool) -> Result<Val, VmError> {
        let frame = self.current_frame()?;
        let Some(func) = frame.func.clone() else {
            return Ok(value);
        };
        if func.is_generator {
            return Ok(value);
        }
        let Some(ty) = func.return_type.clone() else {
            return Ok(value);
        };
        let name = self.frame_function_name(frame);
        let scope = frame.scope.clone();
        let strict = frame.chunk.strict_types;
        match ty {
            TypeHint::Void => return Ok(Val::Null),
            TypeHint::Never => {
                return Err(self.type_error(&format!(
                    "{}(): never-returning function must not implicitly return",
                    name
                )));
            }
            _ => {}
        }
        if implicit {
            if matches!(ty, TypeHint::Mixed) || ty.allows_null() {
                return Ok(Val::Null);
            }
            let shown = self.type_hint_display(&ty);
            return Err(self.type_error(&format!(
                "{}(): Return value must be of type {}, none returned",
                name, shown
            )));
        }
        match self.check_type(value.clone(), &ty, strict, scope.as_ref())? {
            TypeCheck::Accepted(value) => Ok(value),
            TypeCheck::Rejected => {
                let shown = self.type_hint_display(&ty);
                let given = self.debug_type(&value);
                Err(self.type_error(&format!(
                    "{}(): Return value must be of type {}, {} returned",
                    name, shown, given
                )))
            }
        }
    }

    /// Leave the current frame with `value`, running enclosing finally
    /// blocks first.
    pub(crate) fn finish_return(&mut self, value: Val) -> Result<(), VmError> {
        let (chunk, op_ip) = {
            let frame = self.current_frame()?;
            (frame.chunk.clone(), frame.ip.saturating_sub(1) as u32)
        };
        let finally = chunk
            .catch_table
            .iter()
            .find(|e| e.finally_target.is_some() && e.covers(op_ip));
        if let Some(entry) = finally {
            let target = entry.finally_target.unwrap_or_default();
            self.unwind_frame_to(entry.iter_depth, entry.completion_depth);
            let frame = self.current_frame_mut()?;
            frame.completions.push(Completion::Return(value));
            frame.ip = target as usize;
            return Ok(());
        }

        let Some(frame) = self.frames.pop() else {
            return Err(VmError::RuntimeError("Return without a frame".into()));
        };
        self.operand_stack.truncate(frame.stack_base);
        self.pending_calls.truncate(frame.pending_base);
        self.silence_depth = frame.silence_at_entry;
        if frame.generator.is_some() {
            return self.generator_returned(value);
        }
        if !frame.discard_return {
            self.operand_stack.push(value);
        }
        Ok(())
    }
}
