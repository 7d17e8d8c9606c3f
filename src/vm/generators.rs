//! Generators
//!
//! Calling a generator function builds its frame and parks it in a
//! `Generator` object instead of running it. Resuming pushes the frame back
//! on top of the frame stack, restores its operand stack slice and pending
//! calls, and runs a nested loop until the frame yields, returns or throws.
//!
//! `yield` pops the frame again and stores it with everything above its
//! `stack_base`. On the next resume the sent value (null for `next()`) is
//! pushed as the result of the `yield` expression.
//!
//! `yield from` keeps its source as the generator's [`Delegate`] and
//! suspends with the instruction pointer on the `YieldFrom` itself, so every
//! resume re-enters the opcode until the source is exhausted.

use crate::core::heap::{ObjectData, ObjectInternal, ObjectRef};
use crate::core::value::{ArrayData, Val};
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::{CallFrame, Delegate, GeneratorData, GeneratorState};
use std::cell::RefCell;
use std::rc::Rc;

type GeneratorCell = Rc<RefCell<GeneratorData>>;

enum Resume {
    Next,
    Send(Val),
    Throw(ObjectRef),
}

impl VM {
    pub(crate) fn create_generator(&mut self, mut frame: CallFrame) -> Result<ObjectRef, VmError> {
        let Some(class) = self.context.classes.get(&self.names.generator).cloned() else {
            return Err(VmError::RuntimeError("Generator class is not registered".into()));
        };
        frame.ip = 0;
        let cell = Rc::new(RefCell::new(GeneratorData::new(frame)));
        let mut data = ObjectData::new(class);
        data.internal = ObjectInternal::Generator(cell.clone());
        let object = self.objects.alloc(data);
        if let Some(frame) = cell.borrow_mut().frame.as_mut() {
            frame.generator = Some(object.id());
        }
        tracing::trace!(generator = object.id().handle(), "generator created");
        Ok(object)
    }

    pub(crate) fn generator_data(&self, obj: &ObjectRef) -> Option<GeneratorCell> {
        match &obj.borrow().internal {
            ObjectInternal::Generator(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn require_generator(&mut self, obj: &ObjectRef) -> Result<GeneratorCell, VmError> {
        match self.generator_data(obj) {
            Some(data) => Ok(data),
            None => Err(self.error("Generator object is not initialized")),
        }
    }

    /// The generator whose frame is running.
    fn running_generator(&self) -> Result<(ObjectRef, GeneratorCell), VmError> {
        self.generator_stack
            .last()
            .cloned()
            .ok_or_else(|| VmError::RuntimeError("yield outside of a generator".into()))
    }

    fn resume(&mut self, obj: &ObjectRef, action: Resume) -> Result<(), VmError> {
        let data = self.require_generator(obj)?;
        let (was, frame) = {
            let mut g = data.borrow_mut();
            match g.state {
                GeneratorState::Running => {
                    drop(g);
                    return Err(self.error("Cannot resume an already running generator"));
                }
                GeneratorState::Finished => {
                    return match action {
                        Resume::Throw(exc) => Err(VmError::Exception(exc)),
                        _ => Ok(()),
                    };
                }
                GeneratorState::Created | GeneratorState::Suspended => {}
            }
            let was = g.state;
            if was == GeneratorState::Suspended {
                g.advanced = true;
            }
            g.state = GeneratorState::Running;
            (was, g.frame.take())
        };
        let Some(mut frame) = frame else {
            data.borrow_mut().state = GeneratorState::Finished;
            return Ok(());
        };
        tracing::trace!(generator = obj.id().handle(), from = ?was, "generator resumed");

        frame.stack_base = self.operand_stack.len();
        frame.pending_base = self.pending_calls.len();
        frame.silence_at_entry = self.silence_depth;
        {
            let mut g = data.borrow_mut();
            for value in std::mem::take(&mut g.stack) {
                self.operand_stack.push(value);
            }
            self.pending_calls.append(&mut g.pending);
        }
        let depth = self.frames.len();
        self.frames.push(frame);
        self.generator_stack.push((obj.clone(), data.clone()));

        let result = match action {
            Resume::Throw(exc) => match self.handle_exception(exc, depth) {
                Ok(()) => self.run_loop(depth),
                Err(err) => Err(err),
            },
            Resume::Send(value) => {
                if was == GeneratorState::Suspended {
                    self.operand_stack.push(value);
                }
                self.run_loop(depth)
            }
            Resume::Next => {
                if was == GeneratorState::Suspended {
                    self.operand_stack.push(Val::Null);
                }
                self.run_loop(depth)
            }
        };
        self.generator_stack.pop();

        if result.is_err() {
            while self.frames.len() > depth {
                self.pop_frame_discarding();
            }
            let mut g = data.borrow_mut();
            g.state = GeneratorState::Finished;
            g.frame = None;
            g.delegate = None;
            g.current_key = Val::Null;
            g.current_value = Val::Null;
            tracing::trace!(generator = obj.id().handle(), "generator aborted by exception");
        }
        result
    }

    /// Pop the running generator frame and park it in its object.
    fn suspend_generator(&mut self, repeat_current: bool) -> Result<(), VmError> {
        let (_, data) = self.running_generator()?;
        let Some(mut frame) = self.frames.pop() else {
            return Err(VmError::RuntimeError("yield without a frame".into()));
        };
        if repeat_current {
            frame.ip = frame.ip.saturating_sub(1);
        }
        let stack = self.operand_stack.split_off(frame.stack_base);
        let pending = self.pending_calls.split_off(frame.pending_base.min(self.pending_calls.len()));
        self.silence_depth = frame.silence_at_entry;
        let mut g = data.borrow_mut();
        g.stack = stack;
        g.pending = pending;
        g.frame = Some(frame);
        g.state = GeneratorState::Suspended;
        Ok(())
    }

    /// The running generator frame returned; `finish_return` already
    /// popped it.
    pub(crate) fn generator_returned(&mut self, value: Val) -> Result<(), VmError> {
        let (obj, data) = self.running_generator()?;
        let mut g = data.borrow_mut();
        g.state = GeneratorState::Finished;
        g.frame = None;
        g.delegate = None;
        g.return_value = value;
        g.returned = true;
        g.current_key = Val::Null;
        g.current_value = Val::Null;
        tracing::trace!(generator = obj.id().handle(), "generator returned");
        Ok(())
    }

    pub(crate) fn exec_yield(&mut self, with_key: bool) -> Result<(), VmError> {
        let value = self.pop_value()?;
        let key = if with_key {
            Some(self.pop_value()?)
        } else {
            None
        };
        let (_, data) = self.running_generator()?;
        {
            let mut g = data.borrow_mut();
            let key = match key {
                Some(key) => {
                    if let Val::Int(i) = key {
                        if i >= g.auto_key {
                            g.auto_key = i.saturating_add(1);
                        }
                    }
                    key
                }
                None => {
                    let key = g.auto_key;
                    g.auto_key = key.saturating_add(1);
                    Val::Int(key)
                }
            };
            g.current_key = key;
            g.current_value = value;
        }
        self.suspend_generator(false)
    }

    pub(crate) fn exec_yield_from(&mut self) -> Result<(), VmError> {
        let (outer, data) = self.running_generator()?;
        let delegating = data.borrow().delegate.clone();
        match delegating {
            None => {
                let source = self.pop_value()?;
                let delegate = self.yield_from_source(&outer, source)?;
                data.borrow_mut().delegate = Some(delegate);
            }
            Some(Delegate::Generator(inner)) => {
                let sent = self.pop_value()?;
                let action = if sent.is_null() {
                    Resume::Next
                } else {
                    Resume::Send(sent)
                };
                if let Err(err) = self.resume(&inner, action) {
                    data.borrow_mut().delegate = None;
                    return Err(err);
                }
            }
            Some(Delegate::Array { .. }) => {
                self.pop_operand()?;
            }
        }

        let delegate = data.borrow().delegate.clone();
        match delegate {
            Some(Delegate::Array { array, pos }) => {
                let next = array
                    .map
                    .get_index(pos)
                    .map(|(key, value)| (key.to_val(), value.deref_val()));
                match next {
                    Some((key, value)) => {
                        {
                            let mut g = data.borrow_mut();
                            g.current_key = key;
                            g.current_value = value;
                            g.delegate = Some(Delegate::Array {
                                array,
                                pos: pos + 1,
                            });
                        }
                        self.suspend_generator(true)
                    }
                    None => {
                        data.borrow_mut().delegate = None;
                        self.push_operand(Val::Null);
                        Ok(())
                    }
                }
            }
            Some(Delegate::Generator(inner)) => {
                let inner_data = self.require_generator(&inner)?;
                let (state, returned, key, value, result) = {
                    let g = inner_data.borrow();
                    (
                        g.state,
                        g.returned,
                        g.current_key.clone(),
                        g.current_value.clone(),
                        g.return_value.clone(),
                    )
                };
                if state == GeneratorState::Finished {
                    data.borrow_mut().delegate = None;
                    if !returned {
                        return Err(self.error(
                            "Generator passed to yield from was aborted without proper return and is unable to continue",
                        ));
                    }
                    self.push_operand(result);
                    return Ok(());
                }
                {
                    let mut g = data.borrow_mut();
                    g.current_key = key;
                    g.current_value = value;
                }
                self.suspend_generator(true)
            }
            None => {
                self.push_operand(Val::Null);
                Ok(())
            }
        }
    }

    fn yield_from_source(&mut self, outer: &ObjectRef, source: Val) -> Result<Delegate, VmError> {
        match source {
            Val::Array(array) => Ok(Delegate::Array { array, pos: 0 }),
            Val::Object(obj) if self.generator_data(&obj).is_some() => {
                if obj.ptr_eq(outer) {
                    return Err(self.error("Impossible to yield from the Generator being currently run"));
                }
                self.generator_ensure_started(&obj)?;
                Ok(Delegate::Generator(obj))
            }
            Val::Object(obj) if obj.class().is_subclass_of(self.names.traversable) => {
                let pairs = self.iterate_to_vec(&Val::Object(obj))?;
                let mut array = ArrayData::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.to_array_key(&key)?;
                    array.insert(key, value);
                }
                Ok(Delegate::Array {
                    array: Rc::new(array),
                    pos: 0,
                })
            }
            _ => Err(self.error("Can use \"yield from\" only with arrays and Traversables")),
        }
    }

    // Generator API shared by the builtin methods and foreach.

    /// Run a fresh generator to its first `yield`.
    pub(crate) fn generator_ensure_started(&mut self, obj: &ObjectRef) -> Result<(), VmError> {
        let data = self.require_generator(obj)?;
        let created = data.borrow().state == GeneratorState::Created;
        if created {
            self.resume(obj, Resume::Next)?;
        }
        Ok(())
    }

    /// Check that foreach may start on the generator.
    pub(crate) fn generator_check_traversable(&mut self, obj: &ObjectRef, by_ref: bool) -> Result<(), VmError> {
        let data = self.require_generator(obj)?;
        if data.borrow().state == GeneratorState::Finished {
            return Err(self.throw_error("Exception", "Cannot traverse an already closed generator"));
        }
        if by_ref {
            return Err(self.throw_error(
                "Exception",
                "You can only iterate a generator by-reference if it declared that it yields by-reference",
            ));
        }
        Ok(())
    }

    pub(crate) fn generator_rewind(&mut self, obj: &ObjectRef) -> Result<(), VmError> {
        self.generator_ensure_started(obj)?;
        let data = self.require_generator(obj)?;
        let advanced = data.borrow().advanced;
        if advanced {
            return Err(self.throw_error("Exception", "Cannot rewind a generator that was already run"));
        }
        Ok(())
    }

    pub(crate) fn generator_next(&mut self, obj: &ObjectRef) -> Result<(), VmError> {
        self.generator_ensure_started(obj)?;
        self.resume(obj, Resume::Next)
    }

    pub(crate) fn generator_valid(&mut self, obj: &ObjectRef) -> Result<bool, VmError> {
        self.generator_ensure_started(obj)?;
        let data = self.require_generator(obj)?;
        let finished = data.borrow().state == GeneratorState::Finished;
        Ok(!finished)
    }

    pub(crate) fn generator_current(&mut self, obj: &ObjectRef) -> Result<Val, VmError> {
        self.generator_ensure_started(obj)?;
        let data = self.require_generator(obj)?;
        let value = data.borrow().current_value.clone();
        Ok(value)
    }

    pub(crate) fn generator_key(&mut self, obj: &ObjectRef) -> Result<Val, VmError> {
        self.generator_ensure_started(obj)?;
        let data = self.require_generator(obj)?;
        let key = data.borrow().current_key.clone();
        Ok(key)
    }

    /// `send()`: the value becomes the result of the pending `yield`.
    pub(crate) fn generator_send(&mut self, obj: &ObjectRef, value: Val) -> Result<Val, VmError> {
        self.generator_ensure_started(obj)?;
        self.resume(obj, Resume::Send(value))?;
        self.generator_current(obj)
    }

    /// `throw()`: raise `exc` at the pending `yield`.
    pub(crate) fn generator_throw(&mut self, obj: &ObjectRef, exc: ObjectRef) -> Result<Val, VmError> {
        self.generator_ensure_started(obj)?;
        self.resume(obj, Resume::Throw(exc))?;
        self.generator_current(obj)
    }

    pub(crate) fn generator_get_return(&mut self, obj: &ObjectRef) -> Result<Val, VmError> {
        self.generator_ensure_started(obj)?;
        let data = self.require_generator(obj)?;
        let (returned, value) = {
            let g = data.borrow();
            (g.returned, g.return_value.clone())
        };
        if returned {
            return Ok(value);
        }
        Err(self.throw_error(
            "Exception",
            "Cannot get return value of a generator that hasn't returned",
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn keys_continue_after_explicit_integer_keys() {
        let out = run(
            "<?php function g() { yield 'a'; yield 5 => 'b'; yield 'c'; yield 'k' => 'd'; yield 'e'; }
             foreach (g() as $k => $v) echo $k, '=', $v, ' ';",
        );
        assert_eq!(out, "0=a 5=b 6=c k=d 7=e ");
    }

    #[test]
    fn send_resumes_the_pending_yield() {
        let out = run(
            "<?php function acc() { $total = 0; while (true) { $x = yield $total; if ($x === null) return $total; $total += $x; } }
             $g = acc();
             echo $g->current(), ',', $g->send(5), ',', $g->send(7), ',';
             $g->next();
             var_dump($g->valid());
             echo $g->getReturn();",
        );
        assert_eq!(out, "0,5,12,bool(false)\n12");
    }

    #[test]
    fn yield_from_delegates_and_returns_inner_result() {
        let out = run(
            "<?php function inner() { yield 1; yield 2; return 'r'; }
             function outer() { $r = yield from inner(); yield 3; yield from ['x' => 4]; return $r; }
             $g = outer();
             foreach ($g as $k => $v) echo $k, ':', $v, ' ';
             echo $g->getReturn();",
        );
        assert_eq!(out, "0:1 1:2 0:3 x:4 r");
    }

    #[test]
    fn throw_is_caught_inside_the_generator() {
        let out = run(
            "<?php function g() { try { yield 1; } catch (Exception $e) { echo 'caught ', $e->getMessage(), ' '; yield 2; } }
             $g = g(); $g->current();
             echo $g->throw(new Exception('boom'));",
        );
        assert_eq!(out, "caught boom 2");
    }

    #[test]
    fn finished_generator_cannot_be_traversed_again() {
        let out = run(
            "<?php function g() { yield 1; }
             $g = g(); foreach ($g as $v) echo $v;
             try { foreach ($g as $v) echo $v; } catch (Exception $e) { echo ' ', $e->getMessage(); }",
        );
        assert_eq!(out, "1 Cannot traverse an already closed generator");
    }

    #[test]
    fn rewind_after_advancing_fails() {
        let out = run(
            "<?php function g() { yield 1; yield 2; }
             $g = g(); $g->next();
             try { $g->rewind(); } catch (Exception $e) { echo $e->getMessage(); }",
        );
        assert_eq!(out, "Cannot rewind a generator that was already run");
    }

    #[test]
    fn exception_escaping_a_generator_finishes_it() {
        let out = run(
            "<?php function g() { yield 1; throw new RuntimeException('x'); }
             $g = g();
             try { foreach ($g as $v) echo $v; } catch (RuntimeException $e) { echo 'E'; }
             var_dump($g->valid());",
        );
        assert_eq!(out, "1Ebool(false)\n");
    }
}
