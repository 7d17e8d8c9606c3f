//! Opcode dispatch
//!
//! Maps each [`OpCode`] to its handler. The handlers live next to the state
//! they touch (`opcodes/`, `variable_ops`, `callable`, ...); this file only
//! decodes operands.
//!
//! The [`OpcodeExecutor`] trait exposes single-instruction execution to
//! tools such as a step debugger without making the dispatcher public.

use crate::core::value::Val;
use crate::parser::ast::BinaryOp;
use crate::vm::engine::{VM, VmError};
use crate::vm::opcode::OpCode;

/// Something that can execute one instruction on a VM.
pub trait OpcodeExecutor {
    /// # Errors
    ///
    /// Returns the error the instruction raised (exception, fatal, exit).
    fn execute(&self, vm: &mut VM) -> Result<(), VmError>;
}

impl OpcodeExecutor for OpCode {
    fn execute(&self, vm: &mut VM) -> Result<(), VmError> {
        vm.execute_opcode(*self)
    }
}

impl VM {
    pub(crate) fn execute_opcode(&mut self, op: OpCode) -> Result<(), VmError> {
        match op {
            OpCode::Nop => Ok(()),
            OpCode::Const(idx) => self.exec_const(idx),
            OpCode::PushNull => {
                self.push_operand(Val::Null);
                Ok(())
            }
            OpCode::PushTrue => {
                self.push_operand(Val::Bool(true));
                Ok(())
            }
            OpCode::PushFalse => {
                self.push_operand(Val::Bool(false));
                Ok(())
            }
            OpCode::Pop => {
                self.pop_operand()?;
                Ok(())
            }
            OpCode::Dup => self.exec_dup(),

            OpCode::Add => self.exec_arithmetic(BinaryOp::Plus),
            OpCode::Sub => self.exec_arithmetic(BinaryOp::Minus),
            OpCode::Mul => self.exec_arithmetic(BinaryOp::Mul),
            OpCode::Div => self.exec_arithmetic(BinaryOp::Div),
            OpCode::Mod => self.exec_arithmetic(BinaryOp::Mod),
            OpCode::Pow => self.exec_arithmetic(BinaryOp::Pow),
            OpCode::Concat => self.exec_arithmetic(BinaryOp::Concat),
            OpCode::ConcatN(count) => self.exec_concat_n(count),
            OpCode::Negate => self.exec_negate(false),
            OpCode::UnaryPlus => self.exec_negate(true),

            OpCode::BitwiseAnd => self.exec_arithmetic(BinaryOp::BitAnd),
            OpCode::BitwiseOr => self.exec_arithmetic(BinaryOp::BitOr),
            OpCode::BitwiseXor => self.exec_arithmetic(BinaryOp::BitXor),
            OpCode::BitwiseNot => self.exec_bitwise_not(),
            OpCode::ShiftLeft => self.exec_arithmetic(BinaryOp::ShiftLeft),
            OpCode::ShiftRight => self.exec_arithmetic(BinaryOp::ShiftRight),

            OpCode::IsEqual => self.exec_equal(),
            OpCode::IsNotEqual => self.exec_not_equal(),
            OpCode::IsIdentical => self.exec_identical(),
            OpCode::IsNotIdentical => self.exec_not_identical(),
            OpCode::IsLess => self.exec_less_than(),
            OpCode::IsLessOrEqual => self.exec_less_than_or_equal(),
            OpCode::IsGreater => self.exec_greater_than(),
            OpCode::IsGreaterOrEqual => self.exec_greater_than_or_equal(),
            OpCode::Spaceship => self.exec_spaceship(),

            OpCode::BoolNot => self.exec_bool_not(),
            OpCode::BoolXor => self.exec_bool_xor(),
            OpCode::ToBool => self.exec_to_bool(),
            OpCode::Cast(kind) => self.exec_cast(kind),

            OpCode::LoadVar(name) => self.exec_load_var(name, false),
            OpCode::LoadVarQuiet(name) => self.exec_load_var(name, true),
            OpCode::LoadVarDynamic { quiet } => self.exec_load_var_dynamic(quiet),
            OpCode::LoadThis => self.exec_load_this(),
            OpCode::FetchDim { quiet } => self.exec_fetch_dim(quiet),
            OpCode::FetchListElement => self.exec_fetch_list_element(),
            OpCode::FetchProp { name, quiet } => self.exec_fetch_prop(name, quiet),
            OpCode::FetchPropDynamic { quiet } => self.exec_fetch_prop_dynamic(quiet),
            OpCode::FetchStaticProp { class, name, quiet } => {
                self.exec_fetch_static_prop(class, name, quiet)
            }
            OpCode::FetchClassConst(class, name) => self.exec_fetch_class_const(class, name),
            OpCode::FetchClassName(class) => self.exec_fetch_class_name(class),
            OpCode::FetchConst(name) => self.exec_fetch_const(name),

            OpCode::Assign(path) => self.exec_assign(path),
            OpCode::AssignOp(path, op) => self.exec_assign_op(path, op),
            OpCode::IncDec(path, kind) => self.exec_inc_dec(path, kind),
            OpCode::MakeRef(path) => self.exec_make_ref(path),
            OpCode::AssignRef(path) => self.exec_assign_ref(path),
            OpCode::Unset(path) => self.exec_unset(path),
            OpCode::BindGlobal(name) => self.exec_bind_global(name),
            OpCode::BindStatic { name, init } => self.exec_bind_static(name, init),

            OpCode::Jmp(target) => self.exec_jmp(target),
            OpCode::JmpIfFalse(target) => self.exec_jmp_if(target, false),
            OpCode::JmpIfTrue(target) => self.exec_jmp_if(target, true),
            OpCode::JmpIfFalseKeep(target) => self.exec_jmp_if_keep(target, false),
            OpCode::JmpIfTrueKeep(target) => self.exec_jmp_if_keep(target, true),
            OpCode::JmpIfNotNullKeep(target) => self.exec_jmp_if_not_null_keep(target),
            OpCode::JmpIfNullKeep(target) => self.exec_jmp_if_null_keep(target),
            OpCode::LeaveJmp {
                target,
                completion_depth,
            } => self.leave_jump(target, completion_depth),

            OpCode::InitFcall(name) => self.exec_init_fcall(name),
            OpCode::InitDynamicCall => self.exec_init_dynamic_call(),
            OpCode::InitMethodCall(name) => self.exec_init_method_call(name),
            OpCode::InitMethodCallDynamic => self.exec_init_method_call_dynamic(),
            OpCode::InitStaticCall(class, name) => self.exec_init_static_call(class, name),
            OpCode::InitStaticCallDynamic(class) => self.exec_init_static_call_dynamic(class),
            OpCode::NewObject(class) => self.exec_new_object(class),
            OpCode::SendVal => self.exec_send_val(),
            OpCode::SendUnpack => self.exec_send_unpack(),
            OpCode::SendPath(path) => self.exec_send_path(path),
            OpCode::DoCall => self.exec_do_call(),
            OpCode::DoConstructorCall => self.exec_do_constructor_call(),
            OpCode::Return => self.exec_return(),
            OpCode::ReturnVoid => self.exec_return_void(),
            OpCode::JmpIfArgPassed { param, target } => self.exec_jmp_if_arg_passed(param, target),
            OpCode::BindDefault(param) => self.exec_bind_default(param),

            OpCode::IterInit { by_ref, exit } => self.exec_iter_init(by_ref, exit),
            OpCode::IterFetch { exit, with_key } => self.exec_iter_fetch(exit, with_key),
            OpCode::IterFree => self.exec_iter_free(),

            OpCode::InitArray(capacity) => self.exec_init_array(capacity),
            OpCode::AddElement => self.exec_add_element(),
            OpCode::AppendElement => self.exec_append_element(),
            OpCode::AddElementRef => self.exec_add_element_ref(),
            OpCode::AppendElementRef => self.exec_append_element_ref(),
            OpCode::SpreadElement => self.exec_spread_element(),

            OpCode::Echo => self.exec_echo(),
            OpCode::Exit => self.exec_exit(),

            OpCode::Clone => self.exec_clone(),
            OpCode::InstanceOf(class) => self.exec_instance_of(class),
            OpCode::DeclareFunction(idx) => self.exec_declare_function(idx),
            OpCode::DeclareClass(idx) => self.exec_declare_class(idx),
            OpCode::HoistClasses => self.hoist_classes(),
            OpCode::DeclareConst(name) => self.exec_declare_const(name),
            OpCode::MakeClosure { func, arrow } => self.exec_make_closure(func, arrow),

            OpCode::Throw => self.exec_throw(),
            OpCode::CatchMatch { classes, next } => self.exec_catch_match(classes, next),
            OpCode::Rethrow => self.exec_rethrow(),
            OpCode::EnterFinally => self.exec_enter_finally(),
            OpCode::EndFinally => self.exec_end_finally(),

            OpCode::Yield { with_key } => self.exec_yield(with_key),
            OpCode::YieldFrom => self.exec_yield_from(),

            OpCode::BeginSilence => self.exec_begin_silence(),
            OpCode::EndSilence => self.exec_end_silence(),
            OpCode::IsSet => self.exec_isset(),
            OpCode::IsEmpty => self.exec_is_empty(),
            OpCode::MatchError => self.exec_match_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::chunk::CodeChunk;
    use crate::runtime::context::EngineBuilder;
    use crate::vm::frame::CallFrame;
    use std::rc::Rc;

    fn vm() -> VM {
        let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
        let mut vm = VM::new(engine);
        vm.frames.push(CallFrame::new(Rc::new(CodeChunk::default())));
        vm
    }

    #[test]
    fn arithmetic_via_trait() {
        let mut vm = vm();
        vm.operand_stack.push(Val::Int(5));
        vm.operand_stack.push(Val::Int(3));
        OpCode::Add.execute(&mut vm).unwrap();
        assert_eq!(vm.operand_stack.pop(), Some(Val::Int(8)));
    }

    #[test]
    fn stack_operations_via_trait() {
        let mut vm = vm();
        vm.operand_stack.push(Val::Int(42));
        OpCode::Dup.execute(&mut vm).unwrap();
        assert_eq!(vm.operand_stack.len(), 2);
        OpCode::Pop.execute(&mut vm).unwrap();
        OpCode::PushNull.execute(&mut vm).unwrap();
        assert_eq!(vm.operand_stack.pop(), Some(Val::Null));
        assert_eq!(vm.operand_stack.pop(), Some(Val::Int(42)));
    }

    #[test]
    fn comparison_via_trait() {
        let mut vm = vm();
        vm.operand_stack.push(Val::Int(10));
        vm.operand_stack.push(Val::Int(20));
        OpCode::IsLess.execute(&mut vm).unwrap();
        assert_eq!(vm.operand_stack.pop(), Some(Val::Bool(true)));
    }

    #[test]
    fn pop_on_empty_stack_is_an_error() {
        let mut vm = vm();
        assert!(OpCode::Pop.execute(&mut vm).is_err());
    }
}
