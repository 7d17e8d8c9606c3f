use crate::core::value::Visibility;
use crate::parser::span::{LineInfo, Span};
use std::fmt;

pub mod deadcode;
pub mod printer;
pub mod scope;
pub mod sexpr;
pub mod visitor;

pub type ExprId<'ast> = &'ast Expr<'ast>;
pub type StmtId<'ast> = &'ast Stmt<'ast>;

/// First unrecoverable error found while lexing, parsing or compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(source: &[u8], span: Span, message: impl Into<String>) -> Self {
        let (line, column) = span
            .line_info(source)
            .map(|info| (info.line, info.column))
            .unwrap_or((0, 0));
        Self {
            line,
            column,
            message: message.into(),
            span,
        }
    }

    pub fn to_human_readable(&self) -> String {
        format!("PHP Parse error:  {} on line {}", self.message, self.line)
    }

    pub fn to_human_readable_with_path(&self, path: &str) -> String {
        format!(
            "PHP Parse error:  {} in {} on line {}",
            self.message, path, self.line
        )
    }

    /// Source excerpt with a caret marker under the offending span.
    pub fn snippet(&self, source: &[u8]) -> String {
        let Some(LineInfo {
            line,
            column,
            line_text,
        }) = self.span.line_info(source)
        else {
            return format!("error: {}", self.message);
        };

        let line_str = String::from_utf8_lossy(line_text);
        let gutter_width = line.to_string().len();
        let padding = std::cmp::min(line_text.len(), column.saturating_sub(1));
        let highlight_len = std::cmp::max(
            1,
            std::cmp::min(self.span.len(), line_text.len().saturating_sub(padding)),
        );

        format!(
            "error: {}\n --> line {line}, column {column}\n{gutter}|\n{line_no:>width$} | {line_src}\n{gutter}| {marker}",
            self.message,
            gutter = " ".repeat(gutter_width + 1),
            line_no = line,
            width = gutter_width,
            line_src = line_str,
            marker = format!("{}{}", " ".repeat(padding), "^".repeat(highlight_len)),
        )
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on line {}, column {}",
            self.message, self.line, self.column
        )
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Debug)]
pub struct Program<'ast> {
    pub statements: &'ast [StmtId<'ast>],
    pub strict_types: bool,
    pub span: Span,
}

/// An identifier copied into the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ident<'ast> {
    pub name: &'ast [u8],
    pub span: Span,
}

impl Ident<'_> {
    pub fn is(&self, other: &[u8]) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

#[derive(Debug)]
pub enum Stmt<'ast> {
    Echo {
        exprs: &'ast [ExprId<'ast>],
        span: Span,
    },
    InlineHtml {
        value: &'ast [u8],
        span: Span,
    },
    Expression {
        expr: ExprId<'ast>,
        span: Span,
    },
    If {
        condition: ExprId<'ast>,
        then_block: &'ast [StmtId<'ast>],
        else_block: Option<&'ast [StmtId<'ast>]>,
        span: Span,
    },
    While {
        condition: ExprId<'ast>,
        body: &'ast [StmtId<'ast>],
        span: Span,
    },
    DoWhile {
        body: &'ast [StmtId<'ast>],
        condition: ExprId<'ast>,
        span: Span,
    },
    For {
        init: &'ast [ExprId<'ast>],
        condition: &'ast [ExprId<'ast>],
        step: &'ast [ExprId<'ast>],
        body: &'ast [StmtId<'ast>],
        span: Span,
    },
    Foreach {
        expr: ExprId<'ast>,
        key_var: Option<ExprId<'ast>>,
        value_var: ExprId<'ast>,
        by_ref: bool,
        body: &'ast [StmtId<'ast>],
        span: Span,
    },
    Switch {
        subject: ExprId<'ast>,
        cases: &'ast [Case<'ast>],
        span: Span,
    },
    Break {
        levels: u32,
        span: Span,
    },
    Continue {
        levels: u32,
        span: Span,
    },
    Return {
        expr: Option<ExprId<'ast>>,
        span: Span,
    },
    Block {
        statements: &'ast [StmtId<'ast>],
        span: Span,
    },
    Function(&'ast FunctionDecl<'ast>),
    Class(&'ast ClassDecl<'ast>),
    Interface(&'ast InterfaceDecl<'ast>),
    Try {
        body: &'ast [StmtId<'ast>],
        catches: &'ast [Catch<'ast>],
        finally: Option<&'ast [StmtId<'ast>]>,
        span: Span,
    },
    Throw {
        expr: ExprId<'ast>,
        span: Span,
    },
    Global {
        vars: &'ast [Ident<'ast>],
        span: Span,
    },
    Static {
        vars: &'ast [StaticVar<'ast>],
        span: Span,
    },
    Unset {
        vars: &'ast [ExprId<'ast>],
        span: Span,
    },
    Const {
        items: &'ast [ConstItem<'ast>],
        span: Span,
    },
    Declare {
        strict_types: Option<bool>,
        body: Option<&'ast [StmtId<'ast>]>,
        span: Span,
    },
    HaltCompiler {
        span: Span,
    },
    Nop {
        span: Span,
    },
}

impl Stmt<'_> {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Echo { span, .. }
            | Stmt::InlineHtml { span, .. }
            | Stmt::Expression { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::DoWhile { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Foreach { span, .. }
            | Stmt::Switch { span, .. }
            | Stmt::Break { span, .. }
            | Stmt::Continue { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::Block { span, .. }
            | Stmt::Try { span, .. }
            | Stmt::Throw { span, .. }
            | Stmt::Global { span, .. }
            | Stmt::Static { span, .. }
            | Stmt::Unset { span, .. }
            | Stmt::Const { span, .. }
            | Stmt::Declare { span, .. }
            | Stmt::HaltCompiler { span }
            | Stmt::Nop { span } => *span,
            Stmt::Function(decl) => decl.span,
            Stmt::Class(decl) => decl.span,
            Stmt::Interface(decl) => decl.span,
        }
    }
}

#[derive(Debug)]
pub struct FunctionDecl<'ast> {
    pub name: Ident<'ast>,
    pub by_ref: bool,
    pub params: &'ast [Param<'ast>],
    pub return_type: Option<&'ast Type<'ast>>,
    pub body: &'ast [StmtId<'ast>],
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassModifiers {
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_readonly: bool,
}

#[derive(Debug)]
pub struct ClassDecl<'ast> {
    pub name: Ident<'ast>,
    pub modifiers: ClassModifiers,
    pub extends: Option<Ident<'ast>>,
    pub implements: &'ast [Ident<'ast>],
    pub members: &'ast [ClassMember<'ast>],
    pub span: Span,
}

#[derive(Debug)]
pub struct InterfaceDecl<'ast> {
    pub name: Ident<'ast>,
    pub extends: &'ast [Ident<'ast>],
    pub members: &'ast [ClassMember<'ast>],
    pub span: Span,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberModifiers {
    pub visibility: Option<Visibility>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_readonly: bool,
}

#[derive(Debug)]
pub enum ClassMember<'ast> {
    Property {
        modifiers: MemberModifiers,
        ty: Option<&'ast Type<'ast>>,
        entries: &'ast [PropertyEntry<'ast>],
        span: Span,
    },
    Method(&'ast MethodDecl<'ast>),
    Const {
        visibility: Option<Visibility>,
        items: &'ast [ConstItem<'ast>],
        span: Span,
    },
}

#[derive(Debug)]
pub struct MethodDecl<'ast> {
    pub name: Ident<'ast>,
    pub modifiers: MemberModifiers,
    pub by_ref: bool,
    pub params: &'ast [Param<'ast>],
    pub return_type: Option<&'ast Type<'ast>>,
    /// `None` for abstract and interface methods.
    pub body: Option<&'ast [StmtId<'ast>]>,
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct PropertyEntry<'ast> {
    pub name: Ident<'ast>,
    pub default: Option<ExprId<'ast>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct ConstItem<'ast> {
    pub name: Ident<'ast>,
    pub value: ExprId<'ast>,
    pub span: Span,
}

#[derive(Debug)]
pub struct StaticVar<'ast> {
    pub name: Ident<'ast>,
    pub default: Option<ExprId<'ast>>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Param<'ast> {
    pub name: Ident<'ast>,
    pub ty: Option<&'ast Type<'ast>>,
    pub default: Option<ExprId<'ast>>,
    pub by_ref: bool,
    pub variadic: bool,
    /// Constructor property promotion.
    pub promote: Option<MemberModifiers>,
    pub span: Span,
}

#[derive(Debug)]
pub struct Case<'ast> {
    /// `None` for `default:`.
    pub condition: Option<ExprId<'ast>>,
    pub body: &'ast [StmtId<'ast>],
    pub span: Span,
}

#[derive(Debug)]
pub struct Catch<'ast> {
    pub types: &'ast [Ident<'ast>],
    pub var: Option<Ident<'ast>>,
    pub body: &'ast [StmtId<'ast>],
    pub span: Span,
}

#[derive(Debug)]
pub enum Type<'ast> {
    Named(Ident<'ast>),
    Nullable(&'ast Type<'ast>),
    Union(&'ast [Type<'ast>]),
    Intersection(&'ast [Type<'ast>]),
}

#[derive(Debug)]
pub struct Arg<'ast> {
    pub value: ExprId<'ast>,
    pub unpack: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct ArrayItem<'ast> {
    pub key: Option<ExprId<'ast>>,
    /// `None` only for skipped slots in `list()` / `[, $b]` destructuring.
    pub value: Option<ExprId<'ast>>,
    pub by_ref: bool,
    pub unpack: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct ClosureUse<'ast> {
    pub name: Ident<'ast>,
    pub by_ref: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct ClosureDecl<'ast> {
    pub params: &'ast [Param<'ast>],
    pub uses: &'ast [ClosureUse<'ast>],
    pub by_ref: bool,
    pub return_type: Option<&'ast Type<'ast>>,
    pub body: &'ast [StmtId<'ast>],
    pub is_static: bool,
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct ArrowFnDecl<'ast> {
    pub params: &'ast [Param<'ast>],
    pub by_ref: bool,
    pub return_type: Option<&'ast Type<'ast>>,
    pub body: ExprId<'ast>,
    pub is_static: bool,
    pub is_generator: bool,
    pub span: Span,
}

#[derive(Debug)]
pub struct MatchArm<'ast> {
    /// `None` for `default`.
    pub conditions: Option<&'ast [ExprId<'ast>]>,
    pub body: ExprId<'ast>,
    pub span: Span,
}

/// Class reference in `new`, `::` and `instanceof`.
#[derive(Debug, Clone, Copy)]
pub enum ClassRef<'ast> {
    Named(Ident<'ast>),
    Dynamic(ExprId<'ast>),
}

/// Member name after `->` or `::`.
#[derive(Debug, Clone, Copy)]
pub enum MemberName<'ast> {
    Ident(Ident<'ast>),
    Dynamic(ExprId<'ast>),
}

#[derive(Debug)]
pub enum Expr<'ast> {
    Null {
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Int {
        value: i64,
        span: Span,
    },
    Float {
        value: f64,
        span: Span,
    },
    String {
        value: &'ast [u8],
        span: Span,
    },
    Interpolated {
        parts: &'ast [ExprId<'ast>],
        span: Span,
    },
    Variable {
        name: &'ast [u8],
        span: Span,
    },
    VariableVariable {
        expr: ExprId<'ast>,
        span: Span,
    },
    /// Bare identifier: a constant, or a function name when called.
    Name {
        name: Ident<'ast>,
        span: Span,
    },
    Array {
        items: &'ast [ArrayItem<'ast>],
        span: Span,
    },
    /// `list(...)` destructuring target.
    List {
        items: &'ast [ArrayItem<'ast>],
        span: Span,
    },
    ArrayDim {
        array: ExprId<'ast>,
        dim: Option<ExprId<'ast>>,
        span: Span,
    },
    Property {
        target: ExprId<'ast>,
        name: MemberName<'ast>,
        nullsafe: bool,
        span: Span,
    },
    StaticProperty {
        class: ClassRef<'ast>,
        name: Ident<'ast>,
        span: Span,
    },
    ClassConst {
        class: ClassRef<'ast>,
        name: Ident<'ast>,
        span: Span,
    },
    Call {
        func: ExprId<'ast>,
        args: &'ast [Arg<'ast>],
        span: Span,
    },
    MethodCall {
        target: ExprId<'ast>,
        method: MemberName<'ast>,
        args: &'ast [Arg<'ast>],
        nullsafe: bool,
        span: Span,
    },
    StaticCall {
        class: ClassRef<'ast>,
        method: MemberName<'ast>,
        args: &'ast [Arg<'ast>],
        span: Span,
    },
    New {
        class: ClassRef<'ast>,
        args: &'ast [Arg<'ast>],
        span: Span,
    },
    Clone {
        expr: ExprId<'ast>,
        span: Span,
    },
    Assign {
        target: ExprId<'ast>,
        value: ExprId<'ast>,
        span: Span,
    },
    AssignRef {
        target: ExprId<'ast>,
        value: ExprId<'ast>,
        span: Span,
    },
    AssignOp {
        op: BinaryOp,
        target: ExprId<'ast>,
        value: ExprId<'ast>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: ExprId<'ast>,
        right: ExprId<'ast>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        expr: ExprId<'ast>,
        span: Span,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        target: ExprId<'ast>,
        span: Span,
    },
    Ternary {
        condition: ExprId<'ast>,
        then: Option<ExprId<'ast>>,
        otherwise: ExprId<'ast>,
        span: Span,
    },
    Instanceof {
        expr: ExprId<'ast>,
        class: ClassRef<'ast>,
        span: Span,
    },
    Cast {
        kind: CastKind,
        expr: ExprId<'ast>,
        span: Span,
    },
    Isset {
        vars: &'ast [ExprId<'ast>],
        span: Span,
    },
    Empty {
        expr: ExprId<'ast>,
        span: Span,
    },
    Closure(&'ast ClosureDecl<'ast>),
    ArrowFn(&'ast ArrowFnDecl<'ast>),
    Yield {
        key: Option<ExprId<'ast>>,
        value: Option<ExprId<'ast>>,
        span: Span,
    },
    YieldFrom {
        expr: ExprId<'ast>,
        span: Span,
    },
    Throw {
        expr: ExprId<'ast>,
        span: Span,
    },
    Print {
        expr: ExprId<'ast>,
        span: Span,
    },
    Exit {
        expr: Option<ExprId<'ast>>,
        span: Span,
    },
    Match {
        subject: ExprId<'ast>,
        arms: &'ast [MatchArm<'ast>],
        span: Span,
    },
    MagicConst {
        kind: MagicConst,
        span: Span,
    },
}

impl Expr<'_> {
    pub fn span(&self) -> Span {
        match self {
            Expr::Null { span }
            | Expr::Bool { span, .. }
            | Expr::Int { span, .. }
            | Expr::Float { span, .. }
            | Expr::String { span, .. }
            | Expr::Interpolated { span, .. }
            | Expr::Variable { span, .. }
            | Expr::VariableVariable { span, .. }
            | Expr::Name { span, .. }
            | Expr::Array { span, .. }
            | Expr::List { span, .. }
            | Expr::ArrayDim { span, .. }
            | Expr::Property { span, .. }
            | Expr::StaticProperty { span, .. }
            | Expr::ClassConst { span, .. }
            | Expr::Call { span, .. }
            | Expr::MethodCall { span, .. }
            | Expr::StaticCall { span, .. }
            | Expr::New { span, .. }
            | Expr::Clone { span, .. }
            | Expr::Assign { span, .. }
            | Expr::AssignRef { span, .. }
            | Expr::AssignOp { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::IncDec { span, .. }
            | Expr::Ternary { span, .. }
            | Expr::Instanceof { span, .. }
            | Expr::Cast { span, .. }
            | Expr::Isset { span, .. }
            | Expr::Empty { span, .. }
            | Expr::Yield { span, .. }
            | Expr::YieldFrom { span, .. }
            | Expr::Throw { span, .. }
            | Expr::Print { span, .. }
            | Expr::Exit { span, .. }
            | Expr::Match { span, .. }
            | Expr::MagicConst { span, .. } => *span,
            Expr::Closure(decl) => decl.span,
            Expr::ArrowFn(decl) => decl.span,
        }
    }

    /// Whether the expression denotes a storage location.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            Expr::Variable { .. }
                | Expr::VariableVariable { .. }
                | Expr::ArrayDim { .. }
                | Expr::Property {
                    nullsafe: false,
                    ..
                }
                | Expr::StaticProperty { .. }
                | Expr::List { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    Int,
    Float,
    String,
    Bool,
    Array,
    Object,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagicConst {
    Line,
    File,
    Dir,
    Class,
    Function,
    Method,
    Namespace,
    Trait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    BitNot,
    Silence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Spaceship,
    Coalesce,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Concat => ".",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::LogicalXor => "xor",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Identical => "===",
            BinaryOp::NotIdentical => "!==",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Spaceship => "<=>",
            BinaryOp::Coalesce => "??",
        }
    }
}
