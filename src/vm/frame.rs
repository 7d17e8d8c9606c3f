use crate::compiler::chunk::{CodeChunk, UserFunc};
use crate::core::heap::{ObjectId, ObjectRef};
use crate::core::value::{ArrayData, ArrayKey, Reference, Symbol, Val};
use crate::runtime::context::ClassDef;
use crate::vm::engine::PendingCall;
use indexmap::IndexMap;
use std::rc::Rc;

#[derive(Clone)]
pub struct CallFrame {
    pub chunk: Rc<CodeChunk>,
    pub func: Option<Rc<UserFunc>>,
    pub ip: usize,
    pub locals: IndexMap<Symbol, Val>,
    /// Top-level code: variables live in the request's global table.
    pub uses_globals: bool,
    pub this: Option<ObjectRef>,
    pub scope: Option<Rc<ClassDef>>,
    pub called_scope: Option<Rc<ClassDef>>,
    pub stack_base: usize,
    /// Calls being set up when the frame was entered belong to the caller.
    pub pending_base: usize,
    /// Arguments as passed, for `func_get_args()`.
    pub args: Vec<Val>,
    pub iterators: Vec<ForeachIter>,
    pub completions: Vec<Completion>,
    /// Set while the frame belongs to a generator.
    pub generator: Option<ObjectId>,
    pub silence_at_entry: u32,
    /// Constructor frames: the caller keeps the object, not the return value.
    pub discard_return: bool,
}

impl CallFrame {
    pub fn new(chunk: Rc<CodeChunk>) -> Self {
        Self {
            chunk,
            func: None,
            ip: 0,
            locals: IndexMap::new(),
            uses_globals: false,
            this: None,
            scope: None,
            called_scope: None,
            stack_base: 0,
            pending_base: 0,
            args: Vec::new(),
            iterators: Vec::new(),
            completions: Vec::new(),
            generator: None,
            silence_at_entry: 0,
            discard_return: false,
        }
    }

    /// Line of the instruction currently executing.
    pub fn line(&self) -> u32 {
        self.chunk.line_at(self.ip.saturating_sub(1))
    }
}

/// Pending action of a finally block.
#[derive(Clone)]
pub enum Completion {
    Normal,
    Throw(ObjectRef),
    Return(Val),
    /// break/continue target and the completion depth of its loop.
    Jump { target: u32, depth: u16 },
}

/// Foreach cursor.
#[derive(Clone)]
pub enum ForeachIter {
    /// By value: a snapshot taken at loop entry.
    Array { array: Rc<ArrayData>, pos: usize },
    /// By reference: walks the live array inside the cell.
    ArrayRef {
        cell: Reference,
        pos: usize,
        key: Option<ArrayKey>,
    },
    Props {
        object: ObjectRef,
        names: Vec<Symbol>,
        pos: usize,
        by_ref: bool,
    },
    Generator { object: ObjectRef, started: bool },
    Iterator { object: ObjectRef, started: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Created,
    Suspended,
    Running,
    Finished,
}

/// `yield from` source.
#[derive(Clone)]
pub enum Delegate {
    Array { array: Rc<ArrayData>, pos: usize },
    Generator(ObjectRef),
}

/// Heap frame of a generator: the suspended call frame plus its operand stack slice.
pub struct GeneratorData {
    pub state: GeneratorState,
    pub frame: Option<CallFrame>,
    pub stack: Vec<Val>,
    /// Calls that were being set up when the generator suspended.
    pub pending: Vec<PendingCall>,
    pub current_key: Val,
    pub current_value: Val,
    pub auto_key: i64,
    pub return_value: Val,
    /// Finished through `return` rather than an exception.
    pub returned: bool,
    pub delegate: Option<Delegate>,
    /// Resumed at least once past the first yield.
    pub advanced: bool,
}

impl GeneratorData {
    pub fn new(frame: CallFrame) -> Self {
        Self {
            state: GeneratorState::Created,
            frame: Some(frame),
            stack: Vec::new(),
            pending: Vec::new(),
            current_key: Val::Null,
            current_value: Val::Null,
            auto_key: 0,
            return_value: Val::Null,
            returned: false,
            delegate: None,
            advanced: false,
        }
    }
}
