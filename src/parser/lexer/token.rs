use crate::parser::span::Span;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn text<'a>(&self, source: &'a [u8]) -> &'a [u8] {
        self.span.as_str(source)
    }

    pub fn line(&self, source: &[u8]) -> usize {
        source
            .get(..self.span.start)
            .unwrap_or_default()
            .iter()
            .filter(|&&b| b == b'\n')
            .count()
            + 1
    }

    /// 1-based (line, column) of the first byte of the token.
    pub fn position(&self, source: &[u8]) -> (usize, usize) {
        self.span
            .line_info(source)
            .map(|info| (info.line, info.column))
            .unwrap_or((0, 0))
    }
}

/// Why the lexer gave up. Reported once, after which only `Eof` follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LexError {
    UnterminatedString,
    UnterminatedHeredoc,
    UnterminatedComment,
    UnexpectedCharacter,
}

impl LexError {
    pub fn message(self) -> &'static str {
        match self {
            LexError::UnterminatedString => "Unterminated string literal",
            LexError::UnterminatedHeredoc => "Unterminated heredoc",
            LexError::UnterminatedComment => "Unterminated comment starting here",
            LexError::UnexpectedCharacter => "Unexpected character in input",
        }
    }
}

/// Coarse classification of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenCategory {
    Identifier,
    Keyword,
    Operator,
    LiteralInt,
    LiteralFloat,
    LiteralString,
    Punctuation,
    Variable,
    Cast,
    InlineHtml,
    Trivia,
    Error,
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Serialize)]
pub enum TokenKind {
    // Keywords
    Function,
    Fn,
    Class,
    Interface,
    Trait,
    Extends,
    Implements,
    Abstract,
    Final,
    Public,
    Protected,
    Private,
    Static,
    Readonly,
    Const,
    New,
    Clone,
    InstanceOf,
    If,
    Else,
    ElseIf,
    EndIf,
    While,
    EndWhile,
    Do,
    For,
    EndFor,
    Foreach,
    EndForeach,
    As,
    Switch,
    EndSwitch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Yield,
    YieldFrom,
    Try,
    Catch,
    Finally,
    Throw,
    Echo,
    Print,
    Global,
    Unset,
    Isset,
    Empty,
    List,
    Array,
    Exit,
    Declare,
    EndDeclare,
    Match,
    Namespace,
    Use,
    Goto,
    Insteadof,
    Include,
    IncludeOnce,
    Require,
    RequireOnce,
    Eval,
    HaltCompiler,
    LogicalAnd,
    LogicalOr,
    LogicalXor,

    // Magic constants
    Line,
    File,
    Dir,
    ClassC,
    FuncC,
    MethodC,
    NsC,
    TraitC,

    // Literals and names
    LNumber,
    DNumber,
    /// Single-quoted string including quotes.
    ConstantString,
    /// Double-quoted string including quotes; may contain interpolation.
    DoubleQuotedString,
    /// `<<<LABEL ... LABEL`, whole construct.
    Heredoc,
    /// `<<<'LABEL' ... LABEL`, whole construct.
    Nowdoc,
    Identifier,
    Variable,
    InlineHtml,

    // Tags and trivia
    OpenTag,
    OpenTagWithEcho,
    CloseTag,
    Comment,
    DocComment,

    // Casts
    IntCast,
    FloatCast,
    StringCast,
    BoolCast,
    ArrayCast,
    ObjectCast,
    UnsetCast,

    // Operators
    Plus,
    Minus,
    Asterisk,
    Slash,
    Percent,
    Pow,
    Dot,
    Inc,
    Dec,
    Eq,
    PlusEq,
    MinusEq,
    MulEq,
    DivEq,
    ModEq,
    PowEq,
    ConcatEq,
    AndEq,
    OrEq,
    XorEq,
    SlEq,
    SrEq,
    CoalesceEq,
    EqEq,
    BangEq,
    EqEqEq,
    BangEqEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Spaceship,
    AmpersandAmpersand,
    PipePipe,
    Bang,
    Ampersand,
    Pipe,
    Caret,
    BitNot,
    Sl,
    Sr,
    Question,
    Coalesce,
    Colon,
    DoubleColon,
    Arrow,
    NullsafeArrow,
    DoubleArrow,
    At,
    Dollar,
    Ellipsis,
    NsSeparator,
    Backtick,

    // Punctuation
    SemiColon,
    Comma,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    Attribute,

    Error(LexError),
    Eof,
}

impl TokenKind {
    pub fn category(&self) -> TokenCategory {
        use TokenKind::*;
        match self {
            Identifier => TokenCategory::Identifier,
            Variable => TokenCategory::Variable,
            LNumber => TokenCategory::LiteralInt,
            DNumber => TokenCategory::LiteralFloat,
            ConstantString | DoubleQuotedString | Heredoc | Nowdoc => {
                TokenCategory::LiteralString
            }
            InlineHtml => TokenCategory::InlineHtml,
            Comment | DocComment | OpenTag | OpenTagWithEcho | CloseTag => TokenCategory::Trivia,
            IntCast | FloatCast | StringCast | BoolCast | ArrayCast | ObjectCast | UnsetCast => {
                TokenCategory::Cast
            }
            SemiColon | Comma | OpenParen | CloseParen | OpenBracket | CloseBracket
            | OpenBrace | CloseBrace | Attribute | Backtick => TokenCategory::Punctuation,
            Error(_) => TokenCategory::Error,
            Eof => TokenCategory::EndOfInput,
            kind if kind.is_reserved() => TokenCategory::Keyword,
            _ => TokenCategory::Operator,
        }
    }

    /// Keywords that may still be used as member names after `->` and `::`,
    /// and as method or constant names inside a class body.
    pub fn is_semi_reserved(&self) -> bool {
        self.is_reserved()
    }

    pub fn is_reserved(&self) -> bool {
        matches!(
            self,
            TokenKind::Function
                | TokenKind::Fn
                | TokenKind::Class
                | TokenKind::Interface
                | TokenKind::Trait
                | TokenKind::Extends
                | TokenKind::Implements
                | TokenKind::Abstract
                | TokenKind::Final
                | TokenKind::Public
                | TokenKind::Protected
                | TokenKind::Private
                | TokenKind::Static
                | TokenKind::Readonly
                | TokenKind::Const
                | TokenKind::New
                | TokenKind::Clone
                | TokenKind::InstanceOf
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::ElseIf
                | TokenKind::EndIf
                | TokenKind::While
                | TokenKind::EndWhile
                | TokenKind::Do
                | TokenKind::For
                | TokenKind::EndFor
                | TokenKind::Foreach
                | TokenKind::EndForeach
                | TokenKind::As
                | TokenKind::Switch
                | TokenKind::EndSwitch
                | TokenKind::Case
                | TokenKind::Default
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::Return
                | TokenKind::Yield
                | TokenKind::Try
                | TokenKind::Catch
                | TokenKind::Finally
                | TokenKind::Throw
                | TokenKind::Echo
                | TokenKind::Print
                | TokenKind::Global
                | TokenKind::Unset
                | TokenKind::Isset
                | TokenKind::Empty
                | TokenKind::List
                | TokenKind::Array
                | TokenKind::Exit
                | TokenKind::Declare
                | TokenKind::EndDeclare
                | TokenKind::Match
                | TokenKind::Namespace
                | TokenKind::Use
                | TokenKind::Goto
                | TokenKind::Insteadof
                | TokenKind::Include
                | TokenKind::IncludeOnce
                | TokenKind::Require
                | TokenKind::RequireOnce
                | TokenKind::Eval
                | TokenKind::HaltCompiler
                | TokenKind::LogicalAnd
                | TokenKind::LogicalOr
                | TokenKind::LogicalXor
                | TokenKind::Line
                | TokenKind::File
                | TokenKind::Dir
                | TokenKind::ClassC
                | TokenKind::FuncC
                | TokenKind::MethodC
                | TokenKind::NsC
                | TokenKind::TraitC
        )
    }

    pub fn is_assignment_op(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::MulEq
                | TokenKind::DivEq
                | TokenKind::ModEq
                | TokenKind::PowEq
                | TokenKind::ConcatEq
                | TokenKind::AndEq
                | TokenKind::OrEq
                | TokenKind::XorEq
                | TokenKind::SlEq
                | TokenKind::SrEq
                | TokenKind::CoalesceEq
        )
    }

    pub fn is_trivia(&self) -> bool {
        matches!(
            self,
            TokenKind::Comment | TokenKind::DocComment | TokenKind::OpenTag
        )
    }
}
