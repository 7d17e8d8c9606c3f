//! Cycle collection support
//!
//! Reference counting frees everything except cycles. The collector marks
//! from the VM's exact root set through values, reference cells, object
//! properties, closure captures and suspended generator frames; what stays
//! unmarked is garbage.
//!
//! This module only knows how to walk values. Choosing roots, running
//! destructors and breaking the cycles is done by the VM
//! ([`memory`](crate::vm::memory)).

use crate::compiler::chunk::{ClosureData, UserFunc};
use crate::core::heap::{ObjectData, ObjectId, ObjectInternal, ObjectRef};
use crate::core::value::{ArrayData, Reference, Val};
use crate::vm::frame::{CallFrame, Completion, Delegate, ForeachIter, GeneratorData};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Something that can hold values the collector must see.
pub trait Trace {
    fn trace(&self, marker: &mut Marker);
}

enum Work {
    Object(Rc<RefCell<ObjectData>>),
    Array(Rc<ArrayData>),
    Cell(Reference),
}

/// Mark state of one collection. Traversal uses an explicit worklist, so
/// deeply nested arrays cannot overflow the native stack.
#[derive(Default)]
pub struct Marker {
    objects: HashSet<ObjectId>,
    cells: HashSet<usize>,
    arrays: HashSet<usize>,
    worklist: Vec<Work>,
    /// An object was borrowed while tracing, so its children are unknown.
    pub incomplete: bool,
}

impl Marker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_marked(&self, id: ObjectId) -> bool {
        self.objects.contains(&id)
    }

    pub fn is_cell_marked(&self, cell: &Reference) -> bool {
        self.cells.contains(&(Rc::as_ptr(cell) as usize))
    }

    pub fn marked_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn mark_object(&mut self, obj: &ObjectRef) {
        if self.objects.insert(obj.id()) {
            self.worklist.push(Work::Object(obj.data().clone()));
        }
    }

    pub fn mark_cell(&mut self, cell: &Reference) {
        if self.cells.insert(Rc::as_ptr(cell) as usize) {
            self.worklist.push(Work::Cell(cell.clone()));
        }
    }

    pub fn mark_value(&mut self, value: &Val) {
        match value {
            Val::Object(obj) => self.mark_object(obj),
            Val::Array(array) => {
                if self.arrays.insert(Rc::as_ptr(array) as usize) {
                    self.worklist.push(Work::Array(array.clone()));
                }
            }
            Val::Ref(cell) => self.mark_cell(cell),
            Val::Null
            | Val::Bool(_)
            | Val::Int(_)
            | Val::Float(_)
            | Val::String(_)
            | Val::Resource(_) => {}
        }
    }

    pub fn mark_values<'a>(&mut self, values: impl IntoIterator<Item = &'a Val>) {
        for value in values {
            self.mark_value(value);
        }
    }

    /// Process the worklist until everything reachable is marked.
    pub fn drain(&mut self) {
        while let Some(work) = self.worklist.pop() {
            match work {
                Work::Object(data) => match data.try_borrow() {
                    Ok(data) => data.trace(self),
                    Err(_) => self.incomplete = true,
                },
                Work::Array(array) => {
                    for value in array.values() {
                        self.mark_value(value);
                    }
                }
                Work::Cell(cell) => match cell.try_borrow() {
                    Ok(value) => self.mark_value(&value),
                    Err(_) => self.incomplete = true,
                },
            }
        }
    }
}

impl Trace for Val {
    fn trace(&self, marker: &mut Marker) {
        marker.mark_value(self);
    }
}

impl Trace for ObjectData {
    fn trace(&self, marker: &mut Marker) {
        marker.mark_values(self.properties.values());
        match &self.internal {
            ObjectInternal::None => {}
            ObjectInternal::Closure(closure) => closure.trace(marker),
            ObjectInternal::Generator(generator) => {
                // A running generator's frame is on the frame stack, a root.
                if let Ok(generator) = generator.try_borrow() {
                    generator.trace(marker);
                }
            }
        }
    }
}

impl Trace for UserFunc {
    fn trace(&self, marker: &mut Marker) {
        if let Ok(statics) = self.statics.try_borrow() {
            for cell in statics.values() {
                marker.mark_cell(cell);
            }
        }
    }
}

impl Trace for ClosureData {
    fn trace(&self, marker: &mut Marker) {
        for (_, value) in &self.captured {
            marker.mark_value(value);
        }
        if let Some(this) = &self.this {
            marker.mark_object(this);
        }
        self.func.trace(marker);
    }
}

impl Trace for CallFrame {
    fn trace(&self, marker: &mut Marker) {
        marker.mark_values(self.locals.values());
        marker.mark_values(&self.args);
        if let Some(this) = &self.this {
            marker.mark_object(this);
        }
        if let Some(func) = &self.func {
            func.trace(marker);
        }
        for cursor in &self.iterators {
            cursor.trace(marker);
        }
        for completion in &self.completions {
            match completion {
                Completion::Throw(exc) => marker.mark_object(exc),
                Completion::Return(value) => marker.mark_value(value),
                Completion::Normal | Completion::Jump { .. } => {}
            }
        }
    }
}

impl Trace for ForeachIter {
    fn trace(&self, marker: &mut Marker) {
        match self {
            ForeachIter::Array { array, .. } => marker.mark_value(&Val::Array(array.clone())),
            ForeachIter::ArrayRef { cell, .. } => marker.mark_cell(cell),
            ForeachIter::Props { object, .. }
            | ForeachIter::Generator { object, .. }
            | ForeachIter::Iterator { object, .. } => marker.mark_object(object),
        }
    }
}

impl Trace for GeneratorData {
    fn trace(&self, marker: &mut Marker) {
        if let Some(frame) = &self.frame {
            frame.trace(marker);
        }
        marker.mark_values(&self.stack);
        for call in &self.pending {
            call.trace(marker);
        }
        marker.mark_value(&self.current_key);
        marker.mark_value(&self.current_value);
        marker.mark_value(&self.return_value);
        match &self.delegate {
            Some(Delegate::Array { array, .. }) => marker.mark_value(&Val::Array(array.clone())),
            Some(Delegate::Generator(inner)) => marker.mark_object(inner),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::ObjectStore;
    use crate::core::value::{ArrayKey, Symbol};
    use crate::runtime::context::ClassDef;

    fn store() -> (ObjectStore, Rc<ClassDef>) {
        (ObjectStore::new(), Rc::new(ClassDef::empty(Symbol(0))))
    }

    #[test]
    fn unreachable_cycle_stays_unmarked() {
        let (mut store, class) = store();
        let a = store.alloc(ObjectData::new(class.clone()));
        let b = store.alloc(ObjectData::new(class.clone()));
        a.borrow_mut().properties.insert(Symbol(1), Val::Object(b.clone()));
        b.borrow_mut().properties.insert(Symbol(1), Val::Object(a.clone()));
        let root = store.alloc(ObjectData::new(class));

        let mut marker = Marker::new();
        marker.mark_object(&root);
        marker.drain();
        assert!(marker.is_marked(root.id()));
        assert!(!marker.is_marked(a.id()));
        assert!(!marker.is_marked(b.id()));
    }

    #[test]
    fn marking_follows_arrays_and_cells() {
        let (mut store, class) = store();
        let inner = store.alloc(ObjectData::new(class));
        let mut array = ArrayData::new();
        array.insert(ArrayKey::Int(0), Val::Object(inner.clone()));
        let cell = Val::new_ref(Val::from(array));

        let mut marker = Marker::new();
        marker.mark_value(&Val::Ref(cell.clone()));
        marker.drain();
        assert!(marker.is_marked(inner.id()));
        assert!(marker.is_cell_marked(&cell));
        assert!(!marker.incomplete);
    }

    #[test]
    fn self_referencing_cell_terminates() {
        let cell = Val::new_ref(Val::Null);
        let mut array = ArrayData::new();
        array.insert(ArrayKey::Int(0), Val::Ref(cell.clone()));
        *cell.borrow_mut() = Val::from(array);

        let mut marker = Marker::new();
        marker.mark_cell(&cell);
        marker.drain();
        assert!(marker.is_cell_marked(&cell));
        assert_eq!(marker.marked_objects(), 0);
        *cell.borrow_mut() = Val::Null;
    }
}
