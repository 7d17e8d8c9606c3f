//! Frame access helpers
//!
//! Top-level code keeps its variables in the request's global table; every
//! other frame has its own locals. These helpers hide the difference.

use crate::core::heap::ObjectRef;
use crate::core::value::{Reference, Symbol, Val};
use crate::runtime::context::ClassDef;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::CallFrame;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

impl VM {
    #[inline]
    pub(crate) fn current_frame(&self) -> Result<&CallFrame, VmError> {
        self.frames
            .last()
            .ok_or_else(|| VmError::RuntimeError("No active frame".into()))
    }

    #[inline]
    pub(crate) fn current_frame_mut(&mut self) -> Result<&mut CallFrame, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::RuntimeError("No active frame".into()))
    }

    /// Variables of the running frame.
    pub(crate) fn vars(&self) -> &IndexMap<Symbol, Val> {
        match self.frames.last() {
            Some(frame) if !frame.uses_globals => &frame.locals,
            _ => &self.context.globals,
        }
    }

    pub(crate) fn vars_mut(&mut self) -> &mut IndexMap<Symbol, Val> {
        match self.frames.last_mut() {
            Some(frame) if !frame.uses_globals => &mut frame.locals,
            _ => &mut self.context.globals,
        }
    }

    /// Value of a variable, looking through references.
    pub(crate) fn read_var(&self, name: Symbol) -> Option<Val> {
        self.vars().get(&name).map(Val::deref_val)
    }

    /// Bind a variable to a reference cell.
    pub(crate) fn bind_var(&mut self, name: Symbol, cell: Reference) {
        self.vars_mut().insert(name, Val::Ref(cell));
    }

    /// Cell behind a variable, converting a plain value slot into a
    /// reference slot. Missing variables are created as null.
    pub(crate) fn var_cell(&mut self, name: Symbol) -> Reference {
        let slot = self.vars_mut().entry(name).or_default();
        if let Val::Ref(cell) = slot {
            return cell.clone();
        }
        let cell = Rc::new(RefCell::new(std::mem::take(slot)));
        *slot = Val::Ref(cell.clone());
        self.track_cell(&cell);
        cell
    }

    /// `$this` of the running code. Native methods see the object they were
    /// called on.
    pub(crate) fn current_this(&self) -> Option<ObjectRef> {
        if let Some((depth, this)) = self.native_this.last() {
            if *depth == self.frames.len() {
                return this.clone();
            }
        }
        self.frames.last().and_then(|f| f.this.clone())
    }

    /// Class scope used for visibility checks and `self::`.
    pub(crate) fn current_scope(&self) -> Option<Rc<ClassDef>> {
        self.frames.last().and_then(|f| f.scope.clone())
    }

    /// Late static binding class (`static::`).
    pub(crate) fn current_called_scope(&self) -> Option<Rc<ClassDef>> {
        self.frames.last().and_then(|f| f.called_scope.clone())
    }

    /// Whether the code that is calling runs under `declare(strict_types=1)`.
    pub(crate) fn caller_is_strict(&self) -> bool {
        self.frames
            .last()
            .map(|f| f.chunk.strict_types)
            .unwrap_or(false)
    }

    /// Display name of the running function for messages: `f`, `A::m` or `{closure}`.
    pub(crate) fn frame_function_name(&self, frame: &CallFrame) -> String {
        let Some(func) = &frame.func else {
            return String::new();
        };
        let name = self.context.interner.name(func.name);
        match (&frame.scope, func.is_closure) {
            (Some(scope), false) => {
                format!("{}::{}", self.context.interner.name(scope.name), name)
            }
            _ => name,
        }
    }
}
