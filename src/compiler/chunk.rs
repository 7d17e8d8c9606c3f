use crate::core::heap::ObjectRef;
use crate::core::value::{Reference, Symbol, Val, Visibility};
use crate::runtime::context::ClassDef;
use crate::vm::opcode::{ClassOperand, OpCode};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Declared parameter, property or return type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeHint {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    Callable,
    Iterable,
    Mixed,
    Void,
    Never,
    Null,
    False,
    True,
    SelfType,
    Parent,
    Static,
    /// Class or interface, as written.
    Class(Symbol),
    Nullable(Box<TypeHint>),
    Union(Vec<TypeHint>),
    Intersection(Vec<TypeHint>),
}

impl TypeHint {
    pub fn allows_null(&self) -> bool {
        match self {
            TypeHint::Mixed | TypeHint::Null | TypeHint::Nullable(_) => true,
            TypeHint::Union(types) => types.iter().any(TypeHint::allows_null),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuncParam {
    pub name: Symbol,
    pub by_ref: bool,
    pub ty: Option<TypeHint>,
    pub variadic: bool,
    pub has_default: bool,
    /// Constructor promotion target visibility.
    pub promote: Option<Visibility>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClosureUse {
    pub name: Symbol,
    pub by_ref: bool,
}

#[derive(Debug)]
pub struct UserFunc {
    /// Name as declared; `{closure}` for closures.
    pub name: Symbol,
    pub params: Vec<FuncParam>,
    pub uses: Vec<ClosureUse>,
    pub chunk: Rc<CodeChunk>,
    pub is_generator: bool,
    pub returns_ref: bool,
    pub is_static: bool,
    pub is_closure: bool,
    pub return_type: Option<TypeHint>,
    /// `static $x` bindings, created on first execution.
    pub statics: RefCell<HashMap<Symbol, Reference>>,
}

impl UserFunc {
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| !p.has_default && !p.variadic)
            .count()
    }
}

pub struct ClosureData {
    pub func: Rc<UserFunc>,
    pub captured: Vec<(Symbol, Val)>,
    pub this: Option<ObjectRef>,
    pub scope: Option<Rc<ClassDef>>,
    pub called_scope: Option<Rc<ClassDef>>,
}

/// Where an assignable path starts.
#[derive(Debug, Clone, Copy)]
pub enum PathBase {
    Local(Symbol),
    /// `$$name`; the name is an operand.
    Dynamic,
    This,
    StaticProp(ClassOperand, Symbol),
    /// A computed value such as a call result; the value is an operand.
    Temp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStep {
    /// `[expr]`; the key is an operand.
    Dim,
    /// `[]`
    Append,
    Prop(Symbol),
    /// `->{expr}`; the name is an operand.
    PropDyn,
}

/// Lvalue descriptor. Operands are pushed in order: base, then each dynamic step.
#[derive(Debug, Clone)]
pub struct LvalPath {
    pub base: PathBase,
    pub steps: Vec<PathStep>,
}

impl LvalPath {
    pub fn operand_count(&self) -> usize {
        let base = match self.base {
            PathBase::Dynamic | PathBase::Temp => 1,
            PathBase::StaticProp(ClassOperand::Dynamic, _) => 1,
            _ => 0,
        };
        base + self
            .steps
            .iter()
            .filter(|s| matches!(s, PathStep::Dim | PathStep::PropDyn))
            .count()
    }

    pub fn local(name: Symbol) -> Self {
        Self {
            base: PathBase::Local(name),
            steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatchEntry {
    pub start: u32,
    pub end: u32,
    /// First catch clause dispatch block.
    pub catch_target: Option<u32>,
    pub finally_target: Option<u32>,
    /// Exclusive end of the finally block.
    pub finally_end: u32,
    /// Foreach iterators live when the try began.
    pub iter_depth: u16,
    /// Pending finally completions when the try began.
    pub completion_depth: u16,
}

impl CatchEntry {
    pub fn covers(&self, ip: u32) -> bool {
        ip >= self.start && ip < self.end
    }

    pub fn in_finally(&self, ip: u32) -> bool {
        match self.finally_target {
            Some(start) => ip >= start && ip < self.finally_end,
            None => false,
        }
    }
}

/// Initializer for constants, property defaults and static variables.
#[derive(Debug, Clone)]
pub enum ConstInit {
    Value(Val),
    /// Small chunk that evaluates the expression and returns it.
    Thunk(Rc<CodeChunk>),
}

#[derive(Debug)]
pub struct PropertyTemplate {
    pub name: Symbol,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_readonly: bool,
    pub ty: Option<TypeHint>,
    /// `None` for typed properties without a default (uninitialized).
    pub default: Option<ConstInit>,
}

#[derive(Debug)]
pub struct MethodTemplate {
    pub name: Symbol,
    pub func: Rc<UserFunc>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
}

#[derive(Debug)]
pub struct ConstTemplate {
    pub name: Symbol,
    pub visibility: Visibility,
    pub init: ConstInit,
}

#[derive(Debug)]
pub struct ClassTemplate {
    pub name: Symbol,
    pub parent: Option<Symbol>,
    pub interfaces: Vec<Symbol>,
    pub is_interface: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub constants: Vec<ConstTemplate>,
    pub properties: Vec<PropertyTemplate>,
    pub methods: Vec<MethodTemplate>,
    /// Unconditional declaration in the file body; eligible for early binding.
    pub top_level: bool,
    pub line: u32,
}

#[derive(Debug, Default)]
pub struct CodeChunk {
    pub name: Symbol,
    pub file: Rc<str>,
    pub strict_types: bool,
    pub code: Vec<OpCode>,
    pub lines: Vec<u32>,
    pub constants: Vec<Val>,
    pub paths: Vec<LvalPath>,
    pub functions: Vec<Rc<UserFunc>>,
    pub classes: Vec<Rc<ClassTemplate>>,
    pub catch_table: Vec<CatchEntry>,
    /// Class name lists for catch clauses.
    pub class_lists: Vec<Vec<Symbol>>,
    /// Initializers for `static $x = expr`.
    pub thunks: Vec<ConstInit>,
}

impl CodeChunk {
    pub fn line_at(&self, ip: usize) -> u32 {
        self.lines.get(ip).copied().unwrap_or(0)
    }
}
