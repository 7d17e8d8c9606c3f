//! Control flow operations
//!
//! Jumps, short-circuit helpers, exceptions and finally blocks.
//!
//! ## Finally blocks
//!
//! Every way out of a `try` that has a `finally` goes through the block:
//! the pending action is pushed as a [`Completion`] on the frame, control
//! jumps to the block, and `EndFinally` resumes the action. A `return`,
//! `break` or exception raised inside the block replaces the pending one.
//!
//! `break`/`continue` that cross finally blocks compile to `LeaveJmp`. The
//! finally blocks to run are the ones whose protected range contains the
//! jump but not its target.

use crate::core::value::Val;
use crate::vm::engine::{VM, VmError};
use crate::vm::frame::Completion;

impl VM {
    #[inline]
    fn jump_to(&mut self, target: u32) -> Result<(), VmError> {
        self.current_frame_mut()?.ip = target as usize;
        Ok(())
    }

    pub(crate) fn exec_jmp(&mut self, target: u32) -> Result<(), VmError> {
        self.jump_to(target)
    }

    pub(crate) fn exec_jmp_if(&mut self, target: u32, when: bool) -> Result<(), VmError> {
        let value = self.pop_value()?;
        if value.to_bool() == when {
            self.jump_to(target)?;
        }
        Ok(())
    }

    /// `&&`/`||`: jump leaving the value, or drop it and fall through.
    pub(crate) fn exec_jmp_if_keep(&mut self, target: u32, when: bool) -> Result<(), VmError> {
        if self.peek_operand()?.to_bool() == when {
            return self.jump_to(target);
        }
        self.pop_operand()?;
        Ok(())
    }

    /// `??`: keep a set value and jump; drop null and evaluate the default.
    pub(crate) fn exec_jmp_if_not_null_keep(&mut self, target: u32) -> Result<(), VmError> {
        if !self.peek_operand()?.is_null() {
            return self.jump_to(target);
        }
        self.pop_operand()?;
        Ok(())
    }

    /// `?->`: a null target short-circuits the rest of the chain.
    pub(crate) fn exec_jmp_if_null_keep(&mut self, target: u32) -> Result<(), VmError> {
        if self.peek_operand()?.is_null() {
            self.jump_to(target)?;
        }
        Ok(())
    }

    /// `break`/`continue` out of try or finally blocks.
    pub(crate) fn leave_jump(&mut self, target: u32, completion_depth: u16) -> Result<(), VmError> {
        let (chunk, op_ip) = {
            let frame = self.current_frame()?;
            (frame.chunk.clone(), frame.ip.saturating_sub(1) as u32)
        };
        let finally = chunk.catch_table.iter().find(|e| {
            e.finally_target.is_some() && e.covers(op_ip) && !e.covers(target)
        });
        if let Some(entry) = finally {
            let finally_target = entry.finally_target.unwrap_or_default();
            self.unwind_frame_to(entry.iter_depth, entry.completion_depth);
            let frame = self.current_frame_mut()?;
            frame.completions.push(Completion::Jump {
                target,
                depth: completion_depth,
            });
            frame.ip = finally_target as usize;
            return Ok(());
        }
        let frame = self.current_frame_mut()?;
        frame.completions.truncate(completion_depth as usize);
        frame.ip = target as usize;
        Ok(())
    }

    /// Falling into a finally block from the end of its try or catch.
    pub(crate) fn exec_enter_finally(&mut self) -> Result<(), VmError> {
        self.current_frame_mut()?.completions.push(Completion::Normal);
        Ok(())
    }

    pub(crate) fn exec_end_finally(&mut self) -> Result<(), VmError> {
        let completion = self
            .current_frame_mut()?
            .completions
            .pop()
            .unwrap_or(Completion::Normal);
        match completion {
            Completion::Normal => Ok(()),
            Completion::Throw(exc) => Err(VmError::Exception(exc)),
            Completion::Return(value) => self.finish_return(value),
            Completion::Jump { target, depth } => self.leave_jump(target, depth),
        }
    }

    pub(crate) fn exec_throw(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        Err(self.throwable_from(value))
    }

    /// Leave the exception on the stack and fall into the clause when it
    /// matches one of the listed classes; otherwise try the next clause.
    /// Unknown class names never match.
    pub(crate) fn exec_catch_match(&mut self, classes: u32, next: u32) -> Result<(), VmError> {
        let names = {
            let frame = self.current_frame()?;
            frame
                .chunk
                .class_lists
                .get(classes as usize)
                .cloned()
                .unwrap_or_default()
        };
        let matched = match self.peek_operand()? {
            Val::Object(exc) => {
                let exc = exc.clone();
                names.iter().any(|name| {
                    let lc = self.lc_symbol(*name);
                    self.instance_of(&exc, lc)
                })
            }
            _ => false,
        };
        if !matched {
            self.jump_to(next)?;
        }
        Ok(())
    }

    /// No catch clause matched.
    pub(crate) fn exec_rethrow(&mut self) -> Result<(), VmError> {
        let value = self.pop_value()?;
        Err(self.throwable_from(value))
    }
}

#[cfg(test)]
mod tests {
    use crate::vm::executor::run_code_capture_output;

    fn run(source: &str) -> String {
        run_code_capture_output(source).unwrap().1
    }

    #[test]
    fn finally_runs_on_return_and_break() {
        let out = run(
            "<?php function f() { try { return 'r'; } finally { echo 'f'; } }
             echo f();
             foreach ([1, 2] as $i) { try { break; } finally { echo 'b'; } }
             for ($i = 0; $i < 2; $i++) { try { continue; } finally { echo $i; } }",
        );
        assert_eq!(out, "frb01");
    }

    #[test]
    fn return_in_finally_overrides() {
        let out = run(
            "<?php function f() { try { throw new Exception('x'); } finally { return 'kept'; } }
             echo f();",
        );
        assert_eq!(out, "kept");
    }

    #[test]
    fn nested_finally_blocks_unwind_in_order() {
        let out = run(
            "<?php while (true) {
                 try { try { break; } finally { echo 'a'; } } finally { echo 'b'; }
             }
             echo 'c';",
        );
        assert_eq!(out, "abc");
    }

    #[test]
    fn catch_matches_parent_classes_and_skips_unknown_names() {
        let out = run(
            "<?php try { throw new InvalidArgumentException('m'); }
             catch (NoSuchClass | LogicException $e) { echo get_class($e), ':', $e->getMessage(); }",
        );
        assert_eq!(out, "InvalidArgumentException:m");
    }

    #[test]
    fn short_circuit_operators() {
        let out = run("<?php var_dump(null ?? 0 ?: 'd', 1 && 0, $u?->x);");
        assert_eq!(out, "string(1) \"d\"\nbool(false)\nNULL\n");
    }
}
