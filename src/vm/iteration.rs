//! foreach
//!
//! `IterInit` turns the loop subject into a [`ForeachIter`] cursor on the
//! frame, `IterFetch` pushes the next value (and key) or leaves the loop,
//! `IterFree` drops the cursor when the loop is left by `break`.
//!
//! - Arrays by value iterate the snapshot taken at loop entry.
//! - Arrays by reference walk the live array: the cursor remembers the last
//!   key it visited, so appends are seen and removed keys are skipped.
//! - Plain objects iterate the properties visible from the running scope.
//! - `Iterator`, `IteratorAggregate` and generators are driven through
//!   their methods.

use crate::core::heap::ObjectRef;
use crate::core::value::{ArrayKey, Reference, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::ForeachIter;
use std::cell::RefCell;
use std::rc::Rc;

/// `getIterator()` chains longer than this are treated as a loop.
const MAX_AGGREGATE_DEPTH: usize = 32;

enum Fetched {
    Item(Val, Val),
    Done,
}

impl VM {
    pub(crate) fn exec_iter_init(&mut self, by_ref: bool, exit: u32) -> Result<(), VmError> {
        let source = self.pop_operand()?;
        let cursor = if by_ref {
            self.by_ref_cursor(source)?
        } else {
            self.by_value_cursor(source.deref_val())?
        };
        match cursor {
            Some(cursor) => self.current_frame_mut()?.iterators.push(cursor),
            None => self.current_frame_mut()?.ip = exit as usize,
        }
        Ok(())
    }

    fn by_value_cursor(&mut self, source: Val) -> Result<Option<ForeachIter>, VmError> {
        match source {
            Val::Array(array) => {
                if array.is_empty() {
                    return Ok(None);
                }
                Ok(Some(ForeachIter::Array { array, pos: 0 }))
            }
            Val::Object(object) => self.object_cursor(object, false).map(Some),
            other => {
                self.invalid_foreach_subject(&other);
                Ok(None)
            }
        }
    }

    fn by_ref_cursor(&mut self, source: Val) -> Result<Option<ForeachIter>, VmError> {
        let cell = match source {
            Val::Ref(cell) => cell,
            Val::Object(object) => return self.object_cursor(object, true).map(Some),
            // foreach (f() as &$v): the temporary gets its own cell.
            other => self.new_cell(other),
        };
        let current = cell.borrow().clone();
        match current {
            Val::Array(array) => {
                if array.is_empty() {
                    return Ok(None);
                }
                Ok(Some(ForeachIter::ArrayRef {
                    cell,
                    pos: 0,
                    key: None,
                }))
            }
            Val::Object(object) => self.object_cursor(object, true).map(Some),
            other => {
                self.invalid_foreach_subject(&other);
                Ok(None)
            }
        }
    }

    fn invalid_foreach_subject(&mut self, value: &Val) {
        let ty = self.debug_type(value);
        self.warn(&format!(
            "foreach() argument must be of type array|object, {} given",
            ty
        ));
    }

    fn object_cursor(&mut self, object: ObjectRef, by_ref: bool) -> Result<ForeachIter, VmError> {
        let class = object.class();
        if !class.is_subclass_of(self.names.traversable) {
            let names = self
                .visible_properties(&object)
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            return Ok(ForeachIter::Props {
                object,
                names,
                pos: 0,
                by_ref,
            });
        }
        let iterator = self.traversable_iterator(object)?;
        if self.generator_data(&iterator).is_some() {
            self.generator_check_traversable(&iterator, by_ref)?;
            self.generator_rewind(&iterator)?;
            return Ok(ForeachIter::Generator {
                object: iterator,
                started: false,
            });
        }
        if by_ref {
            return Err(self.error("An iterator cannot be used with foreach by reference"));
        }
        self.call_method_named(&iterator, self.names.rewind, Vec::new())?;
        Ok(ForeachIter::Iterator {
            object: iterator,
            started: false,
        })
    }

    /// Follow `getIterator()` until an `Iterator` (or generator) comes back.
    pub(crate) fn traversable_iterator(&mut self, mut object: ObjectRef) -> Result<ObjectRef, VmError> {
        for _ in 0..MAX_AGGREGATE_DEPTH {
            let class = object.class();
            if class.is_subclass_of(self.names.iterator) || self.generator_data(&object).is_some() {
                return Ok(object);
            }
            if !class.is_subclass_of(self.names.iterator_aggregate) {
                break;
            }
            let next = self.call_method_named(&object, self.names.get_iterator, Vec::new())?;
            match next {
                Val::Object(inner) if inner.class().is_subclass_of(self.names.traversable) => {
                    object = inner;
                }
                _ => {
                    let name = self.class_name_of(&object);
                    return Err(self.throw_error(
                        "Exception",
                        &format!(
                            "Objects returned by {}::getIterator() must be traversable or implement interface Iterator",
                            name
                        ),
                    ));
                }
            }
        }
        let name = self.class_name_of(&object);
        Err(self.error(&format!("Object of class {} is not traversable", name)))
    }

    pub(crate) fn exec_iter_fetch(&mut self, exit: u32, with_key: bool) -> Result<(), VmError> {
        let cursor = match self.current_frame()?.iterators.last() {
            Some(cursor) => cursor.clone(),
            None => return Err(VmError::RuntimeError("foreach cursor missing".into())),
        };
        let fetched = match cursor {
            ForeachIter::Array { array, pos } => match array.map.get_index(pos) {
                Some((key, value)) => {
                    let item = Fetched::Item(value.deref_val(), key.to_val());
                    self.set_cursor_pos(pos + 1)?;
                    item
                }
                None => Fetched::Done,
            },
            ForeachIter::ArrayRef { cell, pos, key } => self.fetch_by_ref(&cell, pos, key)?,
            ForeachIter::Props {
                object,
                names,
                pos,
                by_ref,
            } => self.fetch_property(&object, &names, pos, by_ref)?,
            ForeachIter::Generator { object, started } => {
                if started {
                    self.generator_next(&object)?;
                } else {
                    self.mark_cursor_started()?;
                }
                if self.generator_valid(&object)? {
                    let value = self.generator_current(&object)?;
                    let key = if with_key {
                        self.generator_key(&object)?
                    } else {
                        Val::Null
                    };
                    Fetched::Item(value, key)
                } else {
                    Fetched::Done
                }
            }
            ForeachIter::Iterator { object, started } => {
                if started {
                    self.call_method_named(&object, self.names.next, Vec::new())?;
                } else {
                    self.mark_cursor_started()?;
                }
                let valid = self.call_method_named(&object, self.names.valid, Vec::new())?;
                if valid.to_bool() {
                    let value = self.call_method_named(&object, self.names.current, Vec::new())?;
                    let key = if with_key {
                        self.call_method_named(&object, self.names.key, Vec::new())?
                    } else {
                        Val::Null
                    };
                    Fetched::Item(value, key)
                } else {
                    Fetched::Done
                }
            }
        };
        match fetched {
            Fetched::Item(value, key) => {
                self.push_operand(value);
                if with_key {
                    self.push_operand(key);
                }
            }
            Fetched::Done => {
                let frame = self.current_frame_mut()?;
                frame.iterators.pop();
                frame.ip = exit as usize;
            }
        }
        Ok(())
    }

    pub(crate) fn exec_iter_free(&mut self) -> Result<(), VmError> {
        self.current_frame_mut()?.iterators.pop();
        Ok(())
    }

    fn set_cursor_pos(&mut self, next: usize) -> Result<(), VmError> {
        match self.current_frame_mut()?.iterators.last_mut() {
            Some(ForeachIter::Array { pos, .. }) | Some(ForeachIter::Props { pos, .. }) => {
                *pos = next;
            }
            _ => {}
        }
        Ok(())
    }

    fn mark_cursor_started(&mut self) -> Result<(), VmError> {
        match self.current_frame_mut()?.iterators.last_mut() {
            Some(ForeachIter::Generator { started, .. })
            | Some(ForeachIter::Iterator { started, .. }) => *started = true,
            _ => {}
        }
        Ok(())
    }

    /// Next element of a by-reference loop. The element slot is turned into
    /// a reference so the loop variable aliases it.
    fn fetch_by_ref(
        &mut self,
        cell: &Reference,
        pos: usize,
        last: Option<ArrayKey>,
    ) -> Result<Fetched, VmError> {
        let (key, element, created) = {
            let mut slot = cell.borrow_mut();
            let Val::Array(array) = &mut *slot else {
                return Ok(Fetched::Done);
            };
            let array = Rc::make_mut(array);
            let index = match &last {
                Some(key) => array.map.get_index_of(key).map_or(pos, |i| i + 1),
                None => pos,
            };
            let Some((key, value)) = array.map.get_index_mut(index) else {
                return Ok(Fetched::Done);
            };
            let key = key.clone();
            let (element, created) = match value {
                Val::Ref(existing) => (existing.clone(), false),
                other => {
                    let fresh = Rc::new(RefCell::new(std::mem::take(other)));
                    *other = Val::Ref(fresh.clone());
                    (fresh, true)
                }
            };
            (key, element, created)
        };
        if created {
            self.track_cell(&element);
        }
        let index = {
            let slot = cell.borrow();
            match &*slot {
                Val::Array(array) => array.map.get_index_of(&key).unwrap_or(pos),
                _ => pos,
            }
        };
        if let Some(ForeachIter::ArrayRef { pos, key: seen, .. }) =
            self.current_frame_mut()?.iterators.last_mut()
        {
            *pos = index + 1;
            *seen = Some(key.clone());
        }
        Ok(Fetched::Item(Val::Ref(element), key.to_val()))
    }

    fn fetch_property(
        &mut self,
        object: &ObjectRef,
        names: &[crate::core::value::Symbol],
        mut pos: usize,
        by_ref: bool,
    ) -> Result<Fetched, VmError> {
        while let Some(name) = names.get(pos) {
            pos += 1;
            let value = {
                let mut data = object.borrow_mut();
                match data.properties.get_mut(name) {
                    None => None,
                    Some(slot) if by_ref => Some(match slot {
                        Val::Ref(cell) => Val::Ref(cell.clone()),
                        other => {
                            let fresh = Rc::new(RefCell::new(std::mem::take(other)));
                            *other = Val::Ref(fresh.clone());
                            Val::Ref(fresh)
                        }
                    }),
                    Some(slot) => Some(slot.deref_val()),
                }
            };
            if let Some(value) = value {
                if let Val::Ref(cell) = &value {
                    self.track_cell(cell);
                }
                self.set_cursor_pos(pos)?;
                let key = self.context.interner.lookup(*name).unwrap_or_default().to_vec();
                return Ok(Fetched::Item(value, Val::from(key)));
            }
        }
        Ok(Fetched::Done)
    }

    /// Every key/value pair of an array or Traversable, for spreads and
    /// `iterator_to_array`.
    pub(crate) fn iterate_to_vec(&mut self, source: &Val) -> Result<Vec<(Val, Val)>, VmError> {
        match source.deref_val() {
            Val::Array(array) => Ok(array
                .iter()
                .map(|(key, value)| (key.to_val(), value.deref_val()))
                .collect()),
            Val::Object(object) if object.class().is_subclass_of(self.names.traversable) => {
                let iterator = self.traversable_iterator(object)?;
                let mut out = Vec::new();
                if self.generator_data(&iterator).is_some() {
                    self.generator_rewind(&iterator)?;
                    while self.generator_valid(&iterator)? {
                        let key = self.generator_key(&iterator)?;
                        let value = self.generator_current(&iterator)?;
                        out.push((key, value));
                        self.generator_next(&iterator)?;
                    }
                    return Ok(out);
                }
                self.call_method_named(&iterator, self.names.rewind, Vec::new())?;
                loop {
                    let valid = self.call_method_named(&iterator, self.names.valid, Vec::new())?;
                    if !valid.to_bool() {
                        break;
                    }
                    let value = self.call_method_named(&iterator, self.names.current, Vec::new())?;
                    let key = self.call_method_named(&iterator, self.names.key, Vec::new())?;
                    out.push((key, value));
                    self.call_method_named(&iterator, self.names.next, Vec::new())?;
                }
                Ok(out)
            }
            other => {
                let ty = self.debug_type(&other);
                Err(self.type_error(&format!(
                    "Argument must be of type Traversable|array, {} given",
                    ty
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn by_value_iterates_the_snapshot() {
        let out = run("<?php $a = [1, 2]; foreach ($a as $v) { $a[] = $v * 10; echo $v, ' '; } echo count($a);");
        assert_eq!(out, "1 2 4");
    }

    #[test]
    fn by_ref_sees_appends_and_skips_removed_keys() {
        let out = run(
            "<?php $a = [1, 2, 3];
             foreach ($a as $k => &$v) {
                 if ($k == 0) { unset($a[1]); $a[] = 4; }
                 $v *= 2;
             }
             unset($v);
             echo implode(',', $a);",
        );
        assert_eq!(out, "2,6,8");
    }

    #[test]
    fn objects_iterate_visible_properties() {
        let out = run(
            "<?php class P { public $a = 1; protected $b = 2; private $c = 3;
                 function all() { foreach ($this as $k => $v) echo $k, '=', $v, ' '; } }
             $p = new P; $p->d = 4;
             foreach ($p as $k => $v) echo $k, '=', $v, ' ';
             echo '| '; $p->all();",
        );
        assert_eq!(out, "a=1 d=4 | a=1 b=2 c=3 d=4 ");
    }

    #[test]
    fn iterator_aggregate_and_iterator_are_driven_by_methods() {
        let out = run(
            "<?php class It implements Iterator {
                 private $i = 0;
                 private $xs;
                 function __construct(array $xs) { $this->xs = $xs; }
                 function rewind(): void { echo 'r'; $this->i = 0; }
                 function valid(): bool { return $this->i < count($this->xs); }
                 function current(): mixed { return $this->xs[$this->i]; }
                 function key(): mixed { return $this->i; }
                 function next(): void { $this->i++; }
             }
             class Agg implements IteratorAggregate {
                 function getIterator(): Iterator { return new It(['x', 'y']); }
             }
             foreach (new Agg as $k => $v) echo $k, $v;",
        );
        assert_eq!(out, "r0x1y");
    }

    #[test]
    fn non_iterable_warns_and_skips() {
        let out = run("<?php foreach (null as $v) echo 'never'; echo 'after';");
        assert_eq!(out, "after");
    }
}
