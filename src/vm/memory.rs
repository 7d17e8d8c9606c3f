//! VM Memory Management
//!
//! Objects are reference counted through their [`ObjectRef`] handles. When
//! the last handle goes away the object id is queued, and the VM runs its
//! destructor and frees the slot between instructions. Cycles are found by
//! marking from the VM's roots (see [`crate::core::gc`]).
//!
//! ## Destructors
//!
//! `__destruct` runs at most once per object. A destructor may store `$this`
//! somewhere reachable; the object then lives on and is freed without a
//! second call when its last handle drops. Exceptions thrown by a destructor
//! are reported and do not propagate into the code that dropped the object.
//!
//! ## Shutdown
//!
//! Globals holding the only handle to an object are released in reverse
//! order of declaration, then the destructors of the remaining live objects
//! run in creation order. After a fatal error no destructor runs.

use crate::core::gc::{Marker, Trace};
use crate::core::heap::{DestructorState, ObjectId, ObjectInternal};
use crate::core::value::{Reference, Val};
use crate::runtime::context::{ConstState, MethodBody};
use crate::vm::callable::Callable;
use crate::vm::engine::{ErrorLevel, PendingCall, VM, VmError};
use std::cell::RefCell;
use std::rc::Rc;

/// Dead weak entries are dropped from the cell list when it reaches a
/// multiple of this length.
const CELL_PRUNE_INTERVAL: usize = 4096;

impl Trace for Callable {
    fn trace(&self, marker: &mut Marker) {
        match self {
            Callable::NamedFunction(func) => func.trace(marker),
            Callable::NativeFunction { .. } => {}
            Callable::BoundMethod { object, .. } => marker.mark_object(object),
            Callable::StaticMethod { this, .. } => {
                if let Some(this) = this {
                    marker.mark_object(this);
                }
            }
            Callable::Closure(object) | Callable::InvokableObject(object) => {
                marker.mark_object(object)
            }
        }
    }
}

impl Trace for PendingCall {
    fn trace(&self, marker: &mut Marker) {
        marker.mark_values(&self.args);
        if let Some(object) = &self.object {
            marker.mark_object(object);
        }
        if let Some(callable) = &self.callable {
            callable.trace(marker);
        }
    }
}

impl VM {
    /// A fresh reference cell the cycle collector knows about.
    pub(crate) fn new_cell(&mut self, value: Val) -> Reference {
        let cell = Rc::new(RefCell::new(value));
        self.track_cell(&cell);
        cell
    }

    pub(crate) fn track_cell(&mut self, cell: &Reference) {
        if self.cells.len() % CELL_PRUNE_INTERVAL == CELL_PRUNE_INTERVAL - 1 {
            self.cells.retain(|weak| weak.strong_count() > 0);
        }
        self.cells.push(Rc::downgrade(cell));
    }

    fn has_destructor(&self, id: ObjectId) -> bool {
        match self.objects.data(id) {
            Some(data) => data.borrow().class.find_method(self.names.destruct).is_some(),
            None => false,
        }
    }

    /// Run `__destruct` for `id` unless it already ran. Exceptions are
    /// reported as uncaught; `exit` and fatal errors propagate.
    fn run_destructor(&mut self, id: ObjectId) -> Result<(), VmError> {
        if self.objects.destructor_state(id) != Some(DestructorState::NotCalled) {
            return Ok(());
        }
        let Some(obj) = self.objects.handle(id) else {
            return Ok(());
        };
        let Some(method) = obj.class().find_method(self.names.destruct).cloned() else {
            self.objects.set_destructor_state(id, DestructorState::Done);
            return Ok(());
        };
        self.objects.set_destructor_state(id, DestructorState::Running);
        tracing::trace!(object = id.handle(), "running destructor");
        let result = self.call_method(&obj, &method, Vec::new());
        self.objects.set_destructor_state(id, DestructorState::Done);
        drop(obj);
        match result {
            Ok(_) => Ok(()),
            Err(VmError::Exception(exc)) => {
                let message = self.uncaught_message(&exc);
                tracing::debug!(object = id.handle(), "destructor threw");
                self.emit_error(ErrorLevel::Error, &message);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Process objects whose last handle dropped.
    pub(crate) fn drain_releases(&mut self) -> Result<(), VmError> {
        if self.draining {
            return Ok(());
        }
        self.draining = true;
        let result = self.drain_release_queue();
        self.draining = false;
        result
    }

    fn drain_release_queue(&mut self) -> Result<(), VmError> {
        while let Some(id) = self.objects.pop_released() {
            if self.objects.is_referenced(id) {
                continue;
            }
            match self.objects.destructor_state(id) {
                None | Some(DestructorState::Running) => {}
                Some(DestructorState::NotCalled) if !self.fatal_hit && self.has_destructor(id) => {
                    // Dropping the temporary handle queues the id again.
                    self.run_destructor(id)?;
                }
                Some(_) => {
                    let data = self.objects.free(id);
                    drop(data);
                }
            }
        }
        Ok(())
    }

    fn mark_roots(&self, marker: &mut Marker) {
        for frame in &self.frames {
            frame.trace(marker);
        }
        marker.mark_values(self.operand_stack.iter());
        for call in &self.pending_calls {
            call.trace(marker);
        }
        marker.mark_values(self.context.globals.values());
        marker.mark_values(self.context.constants.values());
        for cell in self.script_statics.values() {
            marker.mark_cell(cell);
        }
        for func in self.context.functions.values() {
            func.trace(marker);
        }
        for class in self.context.classes.values() {
            for entry in class.static_props.values() {
                marker.mark_cell(&entry.cell);
            }
            for constant in class.constants.values() {
                if let Ok(state) = constant.state.try_borrow() {
                    if let ConstState::Ready(value) = &*state {
                        marker.mark_value(value);
                    }
                }
            }
            for method in class.methods.values() {
                if let MethodBody::User(func) = &method.body {
                    func.trace(marker);
                }
            }
        }
        for (obj, generator) in &self.generator_stack {
            marker.mark_object(obj);
            if let Ok(generator) = generator.try_borrow() {
                generator.trace(marker);
            }
        }
        for roots in &self.native_roots {
            marker.mark_values(roots);
        }
        for (_, this) in &self.native_this {
            if let Some(this) = this {
                marker.mark_object(this);
            }
        }
        marker.drain();
    }

    /// Find and free unreachable cycles. Returns the number of objects
    /// collected.
    pub fn collect_cycles(&mut self) -> Result<usize, VmError> {
        self.objects.allocated_since_collect = 0;
        if self.draining {
            return Ok(0);
        }
        self.drain_releases()?;

        let mut marker = Marker::new();
        self.mark_roots(&mut marker);
        if marker.incomplete {
            tracing::debug!("cycle collection skipped, object graph in use");
            return Ok(0);
        }
        let garbage: Vec<ObjectId> = self
            .objects
            .live_ids()
            .into_iter()
            .filter(|id| !marker.is_marked(*id) && self.objects.is_referenced(*id))
            .collect();
        if garbage.is_empty() {
            return Ok(0);
        }
        tracing::debug!(
            reachable = marker.marked_objects(),
            candidates = garbage.len(),
            "collecting cycles"
        );

        if !self.fatal_hit {
            for &id in &garbage {
                self.run_destructor(id)?;
            }
        }

        // Destructors may have stored garbage somewhere reachable.
        let mut marker = Marker::new();
        self.mark_roots(&mut marker);
        if marker.incomplete {
            return Ok(0);
        }
        let mut broken = Vec::new();
        for &id in &garbage {
            if marker.is_marked(id) {
                continue;
            }
            let Some(data) = self.objects.data(id) else {
                continue;
            };
            self.objects.set_destructor_state(id, DestructorState::Done);
            if let Ok(mut data) = data.try_borrow_mut() {
                let properties = std::mem::take(&mut data.properties);
                let internal = std::mem::take(&mut data.internal);
                broken.push((properties, internal));
            }
        }
        let collected = broken.len();

        // Reference cells that only point at each other.
        self.cells.retain(|weak| weak.strong_count() > 0);
        let mut cleared = Vec::new();
        for weak in &self.cells {
            let Some(cell) = weak.upgrade() else {
                continue;
            };
            if marker.is_cell_marked(&cell) {
                continue;
            }
            if let Ok(mut value) = cell.try_borrow_mut() {
                if matches!(*value, Val::Array(_) | Val::Ref(_) | Val::Object(_)) {
                    cleared.push(std::mem::take(&mut *value));
                }
            }
        }

        drop(broken);
        drop(cleared);
        self.drain_releases()?;
        tracing::debug!(collected, "cycle collection finished");
        Ok(collected)
    }

    /// End the request: destroy globals, run outstanding destructors, free
    /// everything and close open resources. Safe to call twice.
    pub fn shutdown(&mut self) -> Result<(), VmError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        tracing::debug!(live_objects = self.objects.len(), "request shutdown");

        self.frames.clear();
        self.operand_stack.truncate(0);
        self.pending_calls.clear();
        self.generator_stack.clear();
        self.silence_depth = 0;

        let result = if self.fatal_hit {
            Ok(())
        } else {
            self.call_shutdown_destructors()
        };

        for id in self.objects.live_ids() {
            self.objects.set_destructor_state(id, DestructorState::Done);
        }
        self.release_everything();
        let drained = self.drain_releases();

        self.context.resources.close_all();
        result.and(drained)
    }

    fn call_shutdown_destructors(&mut self) -> Result<(), VmError> {
        self.drain_releases()?;
        loop {
            let before = self.context.globals.len();
            let mut idx = before;
            while idx > 0 {
                idx -= 1;
                let sole_owner = match self.context.globals.get_index(idx) {
                    Some((_, value)) => holds_sole_handle(value),
                    None => false,
                };
                if sole_owner {
                    let removed = self.context.globals.shift_remove_index(idx);
                    drop(removed);
                    self.drain_releases()?;
                    idx = idx.min(self.context.globals.len());
                }
            }
            if self.context.globals.len() == before {
                break;
            }
        }
        for id in self.objects.live_ids() {
            self.run_destructor(id)?;
            self.drain_releases()?;
        }
        Ok(())
    }

    /// Drop every root and break whatever cycles remain.
    fn release_everything(&mut self) {
        let globals = std::mem::take(&mut self.context.globals);
        let statics = std::mem::take(&mut self.script_statics);
        let mut values: Vec<Val> = Vec::new();
        for func in self.context.functions.values() {
            if let Ok(mut statics) = func.statics.try_borrow_mut() {
                statics.clear();
            }
        }
        for class in self.context.classes.values() {
            for entry in class.static_props.values() {
                if let Ok(mut value) = entry.cell.try_borrow_mut() {
                    values.push(std::mem::take(&mut *value));
                }
            }
            for method in class.methods.values() {
                if let MethodBody::User(func) = &method.body {
                    if let Ok(mut statics) = func.statics.try_borrow_mut() {
                        statics.clear();
                    }
                }
            }
        }
        let mut broken = Vec::new();
        for id in self.objects.live_ids() {
            if let Some(data) = self.objects.data(id) {
                if let Ok(mut data) = data.try_borrow_mut() {
                    let properties = std::mem::take(&mut data.properties);
                    let internal = std::mem::replace(&mut data.internal, ObjectInternal::None);
                    broken.push((properties, internal));
                }
            }
        }
        for weak in std::mem::take(&mut self.cells) {
            if let Some(cell) = weak.upgrade() {
                if let Ok(mut value) = cell.try_borrow_mut() {
                    values.push(std::mem::take(&mut *value));
                }
            }
        }
        drop(globals);
        drop(statics);
        drop(values);
        drop(broken);
    }
}

/// The global is the only thing keeping its object alive.
fn holds_sole_handle(value: &Val) -> bool {
    match value {
        Val::Object(obj) => obj.strong_count() == 1,
        Val::Ref(cell) => {
            Rc::strong_count(cell) == 1
                && matches!(&*cell.borrow(), Val::Object(obj) if obj.strong_count() == 1)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn destructor_runs_when_last_handle_drops() {
        let out = run(
            "<?php class D { function __destruct() { echo 'd'; } }
             $a = new D; $b = $a; echo 'x'; $a = null; echo 'y'; $b = null; echo 'z';",
        );
        assert_eq!(out, "xydz");
    }

    #[test]
    fn cycles_are_collected_with_destructors() {
        let out = run(
            "<?php class N { public $o; function __destruct() { echo 'd'; } }
             $a = new N; $b = new N; $a->o = $b; $b->o = $a;
             unset($a, $b);
             echo gc_collect_cycles(), '|', gc_collect_cycles();",
        );
        assert_eq!(out, "dd2|0");
    }

    #[test]
    fn revived_object_is_destructed_once() {
        let out = run(
            "<?php class R { function __destruct() { global $keep; $keep = $this; echo 'd'; } }
             $r = new R; $r = null; echo 'a'; $keep = null; echo 'b';",
        );
        assert_eq!(out, "dab");
    }

    #[test]
    fn shutdown_releases_globals_in_reverse_then_creation_order() {
        let out = run(
            "<?php class D { function __construct(public string $n) {}
                 function __destruct() { echo $this->n; } }
             $list = [new D('x'), new D('y')];
             $a = new D('a'); $b = new D('b');
             echo 'end:';",
        );
        assert_eq!(out, "end:baxy");
    }

    #[test]
    fn destructor_exception_does_not_propagate() {
        let (_, out) = run_code_capture_output(
            "<?php class T { function __destruct() { throw new Exception('boom'); } }
             $t = new T; $t = null; echo 'after';",
        )
        .unwrap();
        assert_eq!(out, "after");
    }

    #[test]
    fn self_referencing_array_is_collected() {
        let out = run(
            "<?php class D { function __destruct() { echo 'd'; } }
             $a = [new D]; $a[] = &$a; unset($a); gc_collect_cycles(); echo 'e';",
        );
        assert_eq!(out, "de");
    }
}
