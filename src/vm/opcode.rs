use crate::core::value::Symbol;
use crate::parser::ast::{BinaryOp, CastKind};

/// Class named by `new`, `::`, `instanceof` and catch clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassOperand {
    /// As written in source.
    Named(Symbol),
    SelfClass,
    Parent,
    Static,
    /// Class name string or object popped from the stack.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncDecKind {
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl IncDecKind {
    pub fn is_increment(self) -> bool {
        matches!(self, IncDecKind::PreInc | IncDecKind::PostInc)
    }

    pub fn is_prefix(self) -> bool {
        matches!(self, IncDecKind::PreInc | IncDecKind::PreDec)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum OpCode {
    // Stack
    Nop,
    Const(u32), // Push constant from table
    PushNull,
    PushTrue,
    PushFalse,
    Pop,
    Dup,

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    /// Interpolated string: pops N parts.
    ConcatN(u32),
    Negate,
    UnaryPlus,

    // Bitwise
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseNot,
    ShiftLeft,
    ShiftRight,

    // Comparison
    IsEqual,
    IsNotEqual,
    IsIdentical,
    IsNotIdentical,
    IsLess,
    IsLessOrEqual,
    IsGreater,
    IsGreaterOrEqual,
    Spaceship,

    // Logical
    BoolNot,
    BoolXor,
    ToBool,
    Cast(CastKind),

    // Reads
    LoadVar(Symbol),
    /// No notice for undefined variables (isset, empty, ??).
    LoadVarQuiet(Symbol),
    LoadVarDynamic { quiet: bool },
    LoadThis,
    FetchDim { quiet: bool },
    /// `list()` element: silent on non-arrays.
    FetchListElement,
    FetchProp { name: Symbol, quiet: bool },
    FetchPropDynamic { quiet: bool },
    FetchStaticProp { class: ClassOperand, name: Symbol, quiet: bool },
    FetchClassConst(ClassOperand, Symbol),
    /// `X::class`
    FetchClassName(ClassOperand),
    FetchConst(Symbol),

    // Writes through an lvalue path (index into the chunk path table)
    Assign(u32),
    AssignOp(u32, BinaryOp),
    IncDec(u32, IncDecKind),
    /// Push the reference cell for a path, creating it if needed.
    MakeRef(u32),
    /// Pop a reference cell and bind the path to it.
    AssignRef(u32),
    Unset(u32),
    BindGlobal(Symbol),
    BindStatic { name: Symbol, init: u32 },

    // Control flow
    Jmp(u32),
    JmpIfFalse(u32),
    JmpIfTrue(u32),
    /// Short-circuit helpers: leave the bool on the stack when jumping.
    JmpIfFalseKeep(u32),
    JmpIfTrueKeep(u32),
    /// `??`: keep the value and jump if it is set.
    JmpIfNotNullKeep(u32),
    /// `?->`: keep null and jump past the access.
    JmpIfNullKeep(u32),
    /// break/continue that may cross finally blocks.
    LeaveJmp { target: u32, completion_depth: u16 },

    // Calls
    InitFcall(Symbol),
    InitDynamicCall,
    InitMethodCall(Symbol),
    InitMethodCallDynamic,
    InitStaticCall(ClassOperand, Symbol),
    InitStaticCallDynamic(ClassOperand),
    /// Instantiate and queue the constructor call. Leaves the object on the stack.
    NewObject(ClassOperand),
    SendVal,
    SendUnpack,
    /// Send a variable, by reference when the callee wants one.
    SendPath(u32),
    DoCall,
    /// Discard the constructor result and keep the object.
    DoConstructorCall,
    Return,
    /// `return;` or falling off the end of a function body.
    ReturnVoid,
    /// Jump past the default initializer when the argument was passed.
    JmpIfArgPassed { param: u32, target: u32 },
    BindDefault(u32),

    // Iteration
    IterInit { by_ref: bool, exit: u32 },
    IterFetch { exit: u32, with_key: bool },
    IterFree,

    // Arrays
    InitArray(u32),
    AddElement,
    AppendElement,
    AddElementRef,
    AppendElementRef,
    SpreadElement,

    // Output
    Echo,
    Exit,

    // Objects and declarations
    Clone,
    InstanceOf(ClassOperand),
    DeclareFunction(u32),
    DeclareClass(u32),
    /// Early-bind the chunk's classes whose parents are already known.
    HoistClasses,
    DeclareConst(Symbol),
    MakeClosure { func: u32, arrow: bool },

    // Exceptions
    Throw,
    CatchMatch { classes: u32, next: u32 },
    Rethrow,
    EnterFinally,
    EndFinally,

    // Generators
    Yield { with_key: bool },
    YieldFrom,

    // Misc
    BeginSilence,
    EndSilence,
    IsSet,
    IsEmpty,
    MatchError,
}
