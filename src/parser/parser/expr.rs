use super::{PResult, Parser};
use crate::core::with_stack;
use crate::parser::ast::{
    Arg, ArrayItem, ArrowFnDecl, BinaryOp, CastKind, ClassRef, ClosureDecl, ClosureUse, Expr,
    ExprId, MagicConst, MatchArm, MemberName, UnaryOp,
};
use crate::parser::lexer::{NumberLiteral, parse_number_literal, token::TokenKind};
use crate::parser::span::Span;

// Binding powers, loosest first.
const BP_LOGICAL_OR: u8 = 1;
const BP_LOGICAL_XOR: u8 = 2;
const BP_LOGICAL_AND: u8 = 3;
pub(super) const BP_ASSIGN: u8 = 4;
const BP_TERNARY: u8 = 5;
const BP_COALESCE: u8 = 6;
const BP_OR: u8 = 7;
const BP_AND: u8 = 8;
const BP_BIT_OR: u8 = 9;
const BP_BIT_XOR: u8 = 10;
const BP_BIT_AND: u8 = 11;
const BP_EQUALITY: u8 = 12;
const BP_RELATIONAL: u8 = 13;
const BP_CONCAT: u8 = 14;
const BP_SHIFT: u8 = 15;
const BP_ADDITIVE: u8 = 16;
const BP_MULTIPLICATIVE: u8 = 17;
const BP_NOT: u8 = 18;
const BP_INSTANCEOF: u8 = 19;
const BP_UNARY: u8 = 20;
const BP_POW: u8 = 21;
const BP_CLONE: u8 = 22;

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::LogicalOr => BinaryOp::LogicalOr,
        TokenKind::LogicalXor => BinaryOp::LogicalXor,
        TokenKind::LogicalAnd => BinaryOp::LogicalAnd,
        TokenKind::Coalesce => BinaryOp::Coalesce,
        TokenKind::PipePipe => BinaryOp::LogicalOr,
        TokenKind::AmpersandAmpersand => BinaryOp::LogicalAnd,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Caret => BinaryOp::BitXor,
        TokenKind::Ampersand => BinaryOp::BitAnd,
        TokenKind::EqEq => BinaryOp::Equal,
        TokenKind::BangEq => BinaryOp::NotEqual,
        TokenKind::EqEqEq => BinaryOp::Identical,
        TokenKind::BangEqEq => BinaryOp::NotIdentical,
        TokenKind::Spaceship => BinaryOp::Spaceship,
        TokenKind::Lt => BinaryOp::Less,
        TokenKind::LtEq => BinaryOp::LessEqual,
        TokenKind::Gt => BinaryOp::Greater,
        TokenKind::GtEq => BinaryOp::GreaterEqual,
        TokenKind::Dot => BinaryOp::Concat,
        TokenKind::Sl => BinaryOp::ShiftLeft,
        TokenKind::Sr => BinaryOp::ShiftRight,
        TokenKind::Plus => BinaryOp::Plus,
        TokenKind::Minus => BinaryOp::Minus,
        TokenKind::Asterisk => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::Pow => BinaryOp::Pow,
        _ => return None,
    })
}

/// `(left, right)` binding power of an infix token. `||`/`or` and
/// `&&`/`and` share a `BinaryOp` but not a precedence.
fn infix_binding_power(kind: TokenKind) -> (u8, u8) {
    let left = match kind {
        TokenKind::LogicalOr => BP_LOGICAL_OR,
        TokenKind::LogicalXor => BP_LOGICAL_XOR,
        TokenKind::LogicalAnd => BP_LOGICAL_AND,
        // Right associative.
        TokenKind::Coalesce => return (BP_COALESCE, BP_COALESCE),
        TokenKind::PipePipe => BP_OR,
        TokenKind::AmpersandAmpersand => BP_AND,
        TokenKind::Pipe => BP_BIT_OR,
        TokenKind::Caret => BP_BIT_XOR,
        TokenKind::Ampersand => BP_BIT_AND,
        TokenKind::EqEq
        | TokenKind::BangEq
        | TokenKind::EqEqEq
        | TokenKind::BangEqEq
        | TokenKind::Spaceship => BP_EQUALITY,
        TokenKind::Lt | TokenKind::LtEq | TokenKind::Gt | TokenKind::GtEq => BP_RELATIONAL,
        TokenKind::Dot => BP_CONCAT,
        TokenKind::Sl | TokenKind::Sr => BP_SHIFT,
        TokenKind::Plus | TokenKind::Minus => BP_ADDITIVE,
        TokenKind::Asterisk | TokenKind::Slash | TokenKind::Percent => BP_MULTIPLICATIVE,
        // Right associative.
        TokenKind::Pow => return (BP_POW, BP_POW),
        _ => 0,
    };
    (left, left + 1)
}

fn compound_assign_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::PlusEq => BinaryOp::Plus,
        TokenKind::MinusEq => BinaryOp::Minus,
        TokenKind::MulEq => BinaryOp::Mul,
        TokenKind::DivEq => BinaryOp::Div,
        TokenKind::ModEq => BinaryOp::Mod,
        TokenKind::PowEq => BinaryOp::Pow,
        TokenKind::ConcatEq => BinaryOp::Concat,
        TokenKind::AndEq => BinaryOp::BitAnd,
        TokenKind::OrEq => BinaryOp::BitOr,
        TokenKind::XorEq => BinaryOp::BitXor,
        TokenKind::SlEq => BinaryOp::ShiftLeft,
        TokenKind::SrEq => BinaryOp::ShiftRight,
        TokenKind::CoalesceEq => BinaryOp::Coalesce,
        _ => return None,
    })
}

impl<'src, 'ast> Parser<'src, 'ast> {
    pub(super) fn parse_expr(&mut self) -> PResult<ExprId<'ast>> {
        self.parse_expr_bp(0)
    }

    pub(super) fn parse_expr_bp(&mut self, min_bp: u8) -> PResult<ExprId<'ast>> {
        self.enter()?;
        let result = with_stack(|| self.parse_expr_bp_inner(min_bp));
        self.leave();
        result
    }

    fn parse_expr_bp_inner(&mut self, min_bp: u8) -> PResult<ExprId<'ast>> {
        let mut left = self.parse_prefix()?;
        let mut after_ternary = false;

        loop {
            let kind = self.current_token.kind;

            // Assignment binds to the nearest writable operand whatever the
            // surrounding precedence, so `!$a = f()` negates the assignment.
            if kind == TokenKind::Eq {
                let target = self.as_destructuring_target(left);
                if !target.is_writable() {
                    break;
                }
                self.bump();
                let start = left.span().start;
                if self.eat(TokenKind::Ampersand) {
                    if matches!(target, Expr::List { .. }) {
                        return Err(self.error_at(
                            target.span(),
                            "Cannot assign reference to non referenceable value",
                        ));
                    }
                    let value = self.parse_expr_bp(BP_ASSIGN)?;
                    left = self.arena.alloc(Expr::AssignRef {
                        target,
                        value,
                        span: Span::new(start, self.prev_end()),
                    });
                } else {
                    let value = self.parse_expr_bp(BP_ASSIGN)?;
                    left = self.arena.alloc(Expr::Assign {
                        target,
                        value,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                continue;
            }

            if let Some(op) = compound_assign_op(kind) {
                if !left.is_writable() || matches!(left, Expr::List { .. }) {
                    break;
                }
                self.bump();
                let value = self.parse_expr_bp(BP_ASSIGN)?;
                left = self.arena.alloc(Expr::AssignOp {
                    op,
                    target: left,
                    value,
                    span: Span::new(left.span().start, self.prev_end()),
                });
                continue;
            }

            if kind == TokenKind::Question {
                if BP_TERNARY < min_bp {
                    break;
                }
                if after_ternary {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Unparenthesized `a ? b : c ? d : e` is not supported. Use either `(a ? b : c) ? d : e` or `a ? b : (c ? d : e)`",
                    ));
                }
                self.bump();
                let then = if self.at(TokenKind::Colon) {
                    None
                } else {
                    Some(self.parse_expr_bp(0)?)
                };
                self.expect(TokenKind::Colon, "\":\"")?;
                let elvis = then.is_none();
                let otherwise = self.parse_expr_bp(BP_TERNARY + 1)?;
                left = self.arena.alloc(Expr::Ternary {
                    condition: left,
                    then,
                    otherwise,
                    span: Span::new(left.span().start, self.prev_end()),
                });
                // Chained short ternaries `a ?: b ?: c` are fine.
                after_ternary = !elvis;
                continue;
            }

            if kind == TokenKind::InstanceOf {
                if BP_INSTANCEOF < min_bp {
                    break;
                }
                self.bump();
                let class = self.parse_instanceof_class()?;
                left = self.arena.alloc(Expr::Instanceof {
                    expr: left,
                    class,
                    span: Span::new(left.span().start, self.prev_end()),
                });
                continue;
            }

            let Some(op) = binary_op(kind) else {
                break;
            };
            let (l_bp, r_bp) = infix_binding_power(kind);
            if l_bp < min_bp {
                break;
            }
            self.bump();
            let right = self.parse_expr_bp(r_bp)?;
            left = self.arena.alloc(Expr::Binary {
                op,
                left,
                right,
                span: Span::new(left.span().start, self.prev_end()),
            });
            after_ternary = false;
        }

        Ok(left)
    }

    /// Turn an array literal on the left of `=` (or in `foreach`) into a
    /// `List` destructuring target, recursively.
    pub(super) fn as_destructuring_target(&self, expr: ExprId<'ast>) -> ExprId<'ast> {
        let (Expr::Array { items, span } | Expr::List { items, span }) = expr else {
            return expr;
        };
        let converted = items.iter().map(|item| ArrayItem {
            key: item.key,
            value: item.value.map(|value| self.as_destructuring_target(value)),
            by_ref: item.by_ref,
            unpack: item.unpack,
            span: item.span,
        });
        self.arena.alloc(Expr::List {
            items: self.arena.alloc_slice_fill_iter(converted),
            span: *span,
        })
    }

    fn parse_instanceof_class(&mut self) -> PResult<ClassRef<'ast>> {
        match self.current_token.kind {
            TokenKind::Identifier | TokenKind::NsSeparator => {
                Ok(ClassRef::Named(self.parse_qualified_name()?))
            }
            TokenKind::Static => {
                let token = self.current_token;
                self.bump();
                Ok(ClassRef::Named(self.ident_from(token)))
            }
            _ => Ok(ClassRef::Dynamic(self.parse_expr_bp(BP_UNARY)?)),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand_bp: u8) -> PResult<ExprId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let expr = self.parse_expr_bp(operand_bp)?;
        Ok(self.arena.alloc(Expr::Unary {
            op,
            expr,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_prefix(&mut self) -> PResult<ExprId<'ast>> {
        let token = self.current_token;
        let start = token.span.start;
        match token.kind {
            TokenKind::Bang => self.unary(UnaryOp::Not, BP_NOT),
            TokenKind::Minus => self.unary(UnaryOp::Minus, BP_UNARY),
            TokenKind::Plus => self.unary(UnaryOp::Plus, BP_UNARY),
            TokenKind::BitNot => self.unary(UnaryOp::BitNot, BP_UNARY),
            TokenKind::At => self.unary(UnaryOp::Silence, BP_UNARY),
            TokenKind::Inc | TokenKind::Dec => {
                self.bump();
                let target = self.parse_expr_bp(BP_UNARY)?;
                if !target.is_writable() || matches!(target, Expr::List { .. }) {
                    return Err(self.error_at(
                        target.span(),
                        "Cannot increment or decrement a temporary expression",
                    ));
                }
                Ok(self.arena.alloc(Expr::IncDec {
                    increment: token.kind == TokenKind::Inc,
                    prefix: true,
                    target,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::IntCast
            | TokenKind::FloatCast
            | TokenKind::StringCast
            | TokenKind::BoolCast
            | TokenKind::ArrayCast
            | TokenKind::ObjectCast => {
                let kind = match token.kind {
                    TokenKind::IntCast => CastKind::Int,
                    TokenKind::FloatCast => CastKind::Float,
                    TokenKind::StringCast => CastKind::String,
                    TokenKind::BoolCast => CastKind::Bool,
                    TokenKind::ArrayCast => CastKind::Array,
                    _ => CastKind::Object,
                };
                self.bump();
                let expr = self.parse_expr_bp(BP_UNARY)?;
                Ok(self.arena.alloc(Expr::Cast {
                    kind,
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::UnsetCast => Err(self.error_at(
                token.span,
                "The (unset) cast is no longer supported",
            )),
            TokenKind::Clone => {
                self.bump();
                let expr = self.parse_expr_bp(BP_CLONE)?;
                Ok(self.arena.alloc(Expr::Clone {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Print => {
                self.bump();
                let expr = self.parse_expr_bp(BP_ASSIGN)?;
                Ok(self.arena.alloc(Expr::Print {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Throw => {
                self.bump();
                let expr = self.parse_expr_bp(BP_LOGICAL_OR)?;
                Ok(self.arena.alloc(Expr::Throw {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Yield => self.parse_yield(),
            TokenKind::YieldFrom => {
                self.mark_generator(token.span)?;
                self.bump();
                let expr = self.parse_expr_bp(BP_ASSIGN)?;
                Ok(self.arena.alloc(Expr::YieldFrom {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Include
            | TokenKind::IncludeOnce
            | TokenKind::Require
            | TokenKind::RequireOnce => Err(self.error_at(
                token.span,
                "File inclusion is not supported",
            )),
            TokenKind::Eval => Err(self.error_at(token.span, "eval() is not supported")),
            TokenKind::Backtick => Err(self.error_at(
                token.span,
                "Shell execution is not supported",
            )),
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn mark_generator(&mut self, span: Span) -> PResult<()> {
        match self.function_stack.last_mut() {
            Some(flag) => {
                *flag = true;
                Ok(())
            }
            None => Err(self.error_at(
                span,
                "The \"yield\" expression can only be used inside a function",
            )),
        }
    }

    fn parse_yield(&mut self) -> PResult<ExprId<'ast>> {
        let start = self.current_token.span.start;
        self.mark_generator(self.current_token.span)?;
        self.bump();

        let ends_expr = matches!(
            self.current_token.kind,
            TokenKind::SemiColon
                | TokenKind::CloseTag
                | TokenKind::CloseParen
                | TokenKind::CloseBracket
                | TokenKind::Comma
                | TokenKind::Eof
        );
        if ends_expr {
            return Ok(self.arena.alloc(Expr::Yield {
                key: None,
                value: None,
                span: Span::new(start, self.prev_end()),
            }));
        }

        let first = self.parse_expr_bp(BP_ASSIGN)?;
        let (key, value) = if self.eat(TokenKind::DoubleArrow) {
            (Some(first), self.parse_expr_bp(BP_ASSIGN)?)
        } else {
            (None, first)
        };
        Ok(self.arena.alloc(Expr::Yield {
            key,
            value: Some(value),
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_primary(&mut self) -> PResult<ExprId<'ast>> {
        let token = self.current_token;
        let start = token.span.start;
        let span = token.span;

        match token.kind {
            TokenKind::Variable => {
                self.bump();
                let name = self.variable_ident(token).name;
                Ok(self.arena.alloc(Expr::Variable { name, span }))
            }
            TokenKind::Dollar => self.parse_variable_variable(),
            TokenKind::LNumber | TokenKind::DNumber => {
                self.bump();
                match parse_number_literal(token.text(self.source)) {
                    Some(NumberLiteral::Int(value)) => Ok(self.arena.alloc(Expr::Int { value, span })),
                    Some(NumberLiteral::Float(value)) => {
                        Ok(self.arena.alloc(Expr::Float { value, span }))
                    }
                    None => Err(self.error_at(span, "Invalid numeric literal")),
                }
            }
            TokenKind::ConstantString => {
                self.bump();
                let text = token.text(self.source);
                let inner = text.get(1..text.len().saturating_sub(1)).unwrap_or_default();
                let value = self.arena.alloc_slice_copy(&super::strings::unescape_single(inner));
                Ok(self.arena.alloc(Expr::String { value, span }))
            }
            TokenKind::DoubleQuotedString => {
                self.bump();
                self.parse_double_quoted(token.span)
            }
            TokenKind::Heredoc => {
                self.bump();
                self.parse_heredoc(token.span)
            }
            TokenKind::Nowdoc => {
                self.bump();
                self.parse_nowdoc(token.span)
            }
            TokenKind::Identifier | TokenKind::NsSeparator => {
                let name = self.parse_qualified_name()?;
                let callable_or_class = matches!(
                    self.current_token.kind,
                    TokenKind::OpenParen | TokenKind::DoubleColon
                );
                if !callable_or_class {
                    if name.is(b"true") {
                        return Ok(self.arena.alloc(Expr::Bool { value: true, span }));
                    }
                    if name.is(b"false") {
                        return Ok(self.arena.alloc(Expr::Bool { value: false, span }));
                    }
                    if name.is(b"null") {
                        return Ok(self.arena.alloc(Expr::Null { span }));
                    }
                }
                Ok(self.arena.alloc(Expr::Name {
                    name,
                    span: name.span,
                }))
            }
            TokenKind::Static => match self.next_token.kind {
                TokenKind::DoubleColon => {
                    self.bump();
                    let name = self.ident_from(token);
                    Ok(self.arena.alloc(Expr::Name { name, span }))
                }
                TokenKind::Function => {
                    self.bump();
                    self.parse_closure(start, true)
                }
                TokenKind::Fn => {
                    self.bump();
                    self.parse_arrow_fn(start, true)
                }
                _ => Err(self.unexpected()),
            },
            TokenKind::Function => self.parse_closure(start, false),
            TokenKind::Fn => self.parse_arrow_fn(start, false),
            TokenKind::Attribute => {
                self.skip_attributes()?;
                match self.current_token.kind {
                    TokenKind::Function | TokenKind::Fn | TokenKind::Static => self.parse_primary(),
                    _ => Err(self.unexpected()),
                }
            }
            TokenKind::OpenParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, "\")\"")?;
                Ok(inner)
            }
            TokenKind::OpenBracket => {
                self.bump();
                let items = self.parse_array_items(TokenKind::CloseBracket, "\"]\"")?;
                Ok(self.arena.alloc(Expr::Array {
                    items,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Array if self.next_token.kind == TokenKind::OpenParen => {
                self.bump();
                self.bump();
                let items = self.parse_array_items(TokenKind::CloseParen, "\")\"")?;
                Ok(self.arena.alloc(Expr::Array {
                    items,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::List => {
                self.bump();
                self.expect(TokenKind::OpenParen, "\"(\"")?;
                let items = self.parse_array_items(TokenKind::CloseParen, "\")\"")?;
                let list = self.arena.alloc(Expr::List {
                    items,
                    span: Span::new(start, self.prev_end()),
                });
                Ok(self.as_destructuring_target(list))
            }
            TokenKind::New => self.parse_new(),
            TokenKind::Isset => {
                self.bump();
                self.expect(TokenKind::OpenParen, "\"(\"")?;
                let mut vars = Vec::new();
                while !self.at(TokenKind::CloseParen) {
                    let var = self.parse_expr()?;
                    let nullsafe_prop = matches!(var, Expr::Property { nullsafe: true, .. });
                    if !var.is_writable() && !nullsafe_prop {
                        return Err(self.error_at(
                            var.span(),
                            "Cannot use isset() on the result of an expression (you can use \"null !== expression\" instead)",
                        ));
                    }
                    vars.push(var);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseParen, "\")\"")?;
                if vars.is_empty() {
                    return Err(self.error_at(span, "isset() expects at least one argument"));
                }
                Ok(self.arena.alloc(Expr::Isset {
                    vars: self.arena.alloc_slice_copy(&vars),
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Empty => {
                self.bump();
                self.expect(TokenKind::OpenParen, "\"(\"")?;
                let expr = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, "\")\"")?;
                Ok(self.arena.alloc(Expr::Empty {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Exit => {
                self.bump();
                let mut expr = None;
                if self.eat(TokenKind::OpenParen) {
                    if !self.at(TokenKind::CloseParen) {
                        expr = Some(self.parse_expr()?);
                    }
                    self.expect(TokenKind::CloseParen, "\")\"")?;
                }
                Ok(self.arena.alloc(Expr::Exit {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Match => self.parse_match(),
            TokenKind::Line
            | TokenKind::File
            | TokenKind::Dir
            | TokenKind::ClassC
            | TokenKind::FuncC
            | TokenKind::MethodC
            | TokenKind::NsC
            | TokenKind::TraitC => {
                self.bump();
                let kind = match token.kind {
                    TokenKind::Line => MagicConst::Line,
                    TokenKind::File => MagicConst::File,
                    TokenKind::Dir => MagicConst::Dir,
                    TokenKind::ClassC => MagicConst::Class,
                    TokenKind::FuncC => MagicConst::Function,
                    TokenKind::MethodC => MagicConst::Method,
                    TokenKind::NsC => MagicConst::Namespace,
                    _ => MagicConst::Trait,
                };
                Ok(self.arena.alloc(Expr::MagicConst { kind, span }))
            }
            _ => Err(self.unexpected()),
        }
    }

    /// `$$name`, `$$$name`, `${expr}`.
    fn parse_variable_variable(&mut self) -> PResult<ExprId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let expr = match self.current_token.kind {
            TokenKind::OpenBrace => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::CloseBrace, "\"}\"")?;
                inner
            }
            TokenKind::Variable => {
                let token = self.current_token;
                self.bump();
                let name = self.variable_ident(token).name;
                self.arena.alloc(Expr::Variable {
                    name,
                    span: token.span,
                })
            }
            TokenKind::Dollar => {
                self.enter()?;
                let inner = self.parse_variable_variable();
                self.leave();
                inner?
            }
            _ => return Err(self.unexpected_expecting("variable")),
        };
        Ok(self.arena.alloc(Expr::VariableVariable {
            expr,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn class_ref_of(&self, expr: ExprId<'ast>) -> ClassRef<'ast> {
        match expr {
            Expr::Name { name, .. } => ClassRef::Named(*name),
            _ => ClassRef::Dynamic(expr),
        }
    }

    /// Name after `->`: identifier, keyword, `$var` or `{expr}`.
    fn parse_property_name(&mut self) -> PResult<MemberName<'ast>> {
        match self.current_token.kind {
            TokenKind::Variable => {
                let token = self.current_token;
                self.bump();
                let name = self.variable_ident(token).name;
                Ok(MemberName::Dynamic(self.arena.alloc(Expr::Variable {
                    name,
                    span: token.span,
                })))
            }
            TokenKind::OpenBrace => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::CloseBrace, "\"}\"")?;
                Ok(MemberName::Dynamic(expr))
            }
            TokenKind::Dollar => Ok(MemberName::Dynamic(self.parse_variable_variable()?)),
            _ => Ok(MemberName::Ident(self.parse_member_ident()?)),
        }
    }

    pub(super) fn parse_postfix(&mut self, mut expr: ExprId<'ast>) -> PResult<ExprId<'ast>> {
        loop {
            let start = expr.span().start;
            match self.current_token.kind {
                TokenKind::OpenBracket => {
                    self.bump();
                    let dim = if self.at(TokenKind::CloseBracket) {
                        None
                    } else {
                        Some(self.parse_expr()?)
                    };
                    self.expect(TokenKind::CloseBracket, "\"]\"")?;
                    expr = self.arena.alloc(Expr::ArrayDim {
                        array: expr,
                        dim,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                TokenKind::Arrow | TokenKind::NullsafeArrow => {
                    let nullsafe = self.at(TokenKind::NullsafeArrow);
                    self.bump();
                    let name = self.parse_property_name()?;
                    if self.at(TokenKind::OpenParen) {
                        let args = self.parse_args()?;
                        expr = self.arena.alloc(Expr::MethodCall {
                            target: expr,
                            method: name,
                            args,
                            nullsafe,
                            span: Span::new(start, self.prev_end()),
                        });
                    } else {
                        expr = self.arena.alloc(Expr::Property {
                            target: expr,
                            name,
                            nullsafe,
                            span: Span::new(start, self.prev_end()),
                        });
                    }
                }
                TokenKind::DoubleColon => {
                    self.bump();
                    let class = self.class_ref_of(expr);
                    expr = match self.current_token.kind {
                        TokenKind::Variable => {
                            let token = self.current_token;
                            self.bump();
                            let name = self.variable_ident(token);
                            if self.at(TokenKind::OpenParen) {
                                // Foo::$method()
                                let var = self.arena.alloc(Expr::Variable {
                                    name: name.name,
                                    span: token.span,
                                });
                                let args = self.parse_args()?;
                                self.arena.alloc(Expr::StaticCall {
                                    class,
                                    method: MemberName::Dynamic(var),
                                    args,
                                    span: Span::new(start, self.prev_end()),
                                })
                            } else {
                                self.arena.alloc(Expr::StaticProperty {
                                    class,
                                    name,
                                    span: Span::new(start, self.prev_end()),
                                })
                            }
                        }
                        TokenKind::OpenBrace => {
                            self.bump();
                            let method = self.parse_expr()?;
                            self.expect(TokenKind::CloseBrace, "\"}\"")?;
                            let args = self.parse_args()?;
                            self.arena.alloc(Expr::StaticCall {
                                class,
                                method: MemberName::Dynamic(method),
                                args,
                                span: Span::new(start, self.prev_end()),
                            })
                        }
                        _ => {
                            let name = self.parse_member_ident()?;
                            if self.at(TokenKind::OpenParen) {
                                let args = self.parse_args()?;
                                self.arena.alloc(Expr::StaticCall {
                                    class,
                                    method: MemberName::Ident(name),
                                    args,
                                    span: Span::new(start, self.prev_end()),
                                })
                            } else {
                                self.arena.alloc(Expr::ClassConst {
                                    class,
                                    name,
                                    span: Span::new(start, self.prev_end()),
                                })
                            }
                        }
                    };
                }
                TokenKind::OpenParen => {
                    let args = self.parse_args()?;
                    expr = self.arena.alloc(Expr::Call {
                        func: expr,
                        args,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                TokenKind::Inc | TokenKind::Dec
                    if expr.is_writable() && !matches!(expr, Expr::List { .. }) =>
                {
                    let increment = self.at(TokenKind::Inc);
                    self.bump();
                    expr = self.arena.alloc(Expr::IncDec {
                        increment,
                        prefix: false,
                        target: expr,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                _ => return Ok(expr),
            }
        }
    }

    pub(super) fn parse_args(&mut self) -> PResult<&'ast [Arg<'ast>]> {
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let mut args = bumpalo::collections::Vec::new_in(self.arena);
        while !self.at(TokenKind::CloseParen) {
            let start = self.current_token.span.start;
            let unpack = self.eat(TokenKind::Ellipsis);
            if unpack && self.at(TokenKind::CloseParen) {
                return Err(self.error_at(
                    Span::new(start, self.current_token.span.end),
                    "First-class callable syntax is not supported",
                ));
            }
            let named = (self.at(TokenKind::Identifier) || self.current_token.kind.is_semi_reserved())
                && self.next_token.kind == TokenKind::Colon;
            if named {
                return Err(self.error_at(
                    self.current_token.span,
                    "Named arguments are not supported",
                ));
            }
            let value = self.parse_expr()?;
            args.push(Arg {
                value,
                unpack,
                span: Span::new(start, self.prev_end()),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "\")\"")?;
        Ok(args.into_bump_slice())
    }

    /// Items up to and including `end`. Empty slots are kept as `value: None`
    /// so destructuring can skip positions.
    fn parse_array_items(
        &mut self,
        end: TokenKind,
        what: &str,
    ) -> PResult<&'ast [ArrayItem<'ast>]> {
        let mut items = bumpalo::collections::Vec::new_in(self.arena);
        loop {
            if self.eat(end) {
                break;
            }
            let start = self.current_token.span.start;
            if self.at(TokenKind::Comma) {
                self.bump();
                items.push(ArrayItem {
                    key: None,
                    value: None,
                    by_ref: false,
                    unpack: false,
                    span: Span::new(start, start),
                });
                continue;
            }

            let unpack = self.eat(TokenKind::Ellipsis);
            let mut by_ref = self.eat(TokenKind::Ampersand);
            let first = self.parse_expr()?;
            let (key, value) = if !unpack && !by_ref && self.eat(TokenKind::DoubleArrow) {
                by_ref = self.eat(TokenKind::Ampersand);
                (Some(first), self.parse_expr()?)
            } else {
                (None, first)
            };
            if by_ref && !value.is_writable() {
                return Err(self.error_at(
                    value.span(),
                    "Cannot assign reference to non referenceable value",
                ));
            }
            items.push(ArrayItem {
                key,
                value: Some(value),
                by_ref,
                unpack,
                span: Span::new(start, self.prev_end()),
            });

            if !self.eat(TokenKind::Comma) {
                self.expect(end, what)?;
                break;
            }
        }
        Ok(items.into_bump_slice())
    }

    fn parse_new(&mut self) -> PResult<ExprId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();

        let class = match self.current_token.kind {
            TokenKind::Identifier | TokenKind::NsSeparator => {
                ClassRef::Named(self.parse_qualified_name()?)
            }
            TokenKind::Static => {
                let token = self.current_token;
                self.bump();
                ClassRef::Named(self.ident_from(token))
            }
            TokenKind::Class => {
                return Err(self.error_at(
                    self.current_token.span,
                    "Anonymous classes are not supported",
                ));
            }
            TokenKind::OpenParen => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::CloseParen, "\")\"")?;
                ClassRef::Dynamic(expr)
            }
            TokenKind::Variable | TokenKind::Dollar => {
                ClassRef::Dynamic(self.parse_new_class_expr()?)
            }
            _ => return Err(self.unexpected()),
        };

        let args = if self.at(TokenKind::OpenParen) {
            self.parse_args()?
        } else {
            &[]
        };

        Ok(self.arena.alloc(Expr::New {
            class,
            args,
            span: Span::new(start, self.prev_end()),
        }))
    }

    /// `new $a->b['c']`: a variable with property and dim accesses but no calls.
    fn parse_new_class_expr(&mut self) -> PResult<ExprId<'ast>> {
        let mut expr = if self.at(TokenKind::Dollar) {
            self.parse_variable_variable()?
        } else {
            let token = self.current_token;
            self.bump();
            let name = self.variable_ident(token).name;
            self.arena.alloc(Expr::Variable {
                name,
                span: token.span,
            })
        };
        loop {
            let start = expr.span().start;
            match self.current_token.kind {
                TokenKind::OpenBracket => {
                    self.bump();
                    let dim = self.parse_expr()?;
                    self.expect(TokenKind::CloseBracket, "\"]\"")?;
                    expr = self.arena.alloc(Expr::ArrayDim {
                        array: expr,
                        dim: Some(dim),
                        span: Span::new(start, self.prev_end()),
                    });
                }
                TokenKind::Arrow | TokenKind::NullsafeArrow => {
                    let nullsafe = self.at(TokenKind::NullsafeArrow);
                    self.bump();
                    let name = self.parse_property_name()?;
                    expr = self.arena.alloc(Expr::Property {
                        target: expr,
                        name,
                        nullsafe,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                TokenKind::DoubleColon if self.next_token.kind == TokenKind::Variable => {
                    self.bump();
                    let token = self.current_token;
                    self.bump();
                    let name = self.variable_ident(token);
                    expr = self.arena.alloc(Expr::StaticProperty {
                        class: ClassRef::Dynamic(expr),
                        name,
                        span: Span::new(start, self.prev_end()),
                    });
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_closure(&mut self, start: usize, is_static: bool) -> PResult<ExprId<'ast>> {
        self.expect(TokenKind::Function, "\"function\"")?;
        let by_ref = self.eat(TokenKind::Ampersand);
        let params = self.parse_params(false)?;

        let mut uses = bumpalo::collections::Vec::new_in(self.arena);
        if self.eat(TokenKind::Use) {
            self.expect(TokenKind::OpenParen, "\"(\"")?;
            while !self.at(TokenKind::CloseParen) {
                let use_start = self.current_token.span.start;
                let by_ref = self.eat(TokenKind::Ampersand);
                let var = self.expect(TokenKind::Variable, "variable")?;
                let name = self.variable_ident(var);
                if name.is(b"this") {
                    return Err(self.error_at(var.span, "Cannot use $this as lexical variable"));
                }
                uses.push(ClosureUse {
                    name,
                    by_ref,
                    span: Span::new(use_start, self.prev_end()),
                });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            self.expect(TokenKind::CloseParen, "\")\"")?;
        }

        let return_type = self.parse_return_type()?;

        self.function_stack.push(false);
        let body = self.parse_block();
        let is_generator = self.function_stack.pop().unwrap_or(false);
        let body = body?;

        let decl = self.arena.alloc(ClosureDecl {
            params,
            uses: uses.into_bump_slice(),
            by_ref,
            return_type,
            body,
            is_static,
            is_generator,
            span: Span::new(start, self.prev_end()),
        });
        Ok(self.arena.alloc(Expr::Closure(decl)))
    }

    fn parse_arrow_fn(&mut self, start: usize, is_static: bool) -> PResult<ExprId<'ast>> {
        self.expect(TokenKind::Fn, "\"fn\"")?;
        let by_ref = self.eat(TokenKind::Ampersand);
        let params = self.parse_params(false)?;
        let return_type = self.parse_return_type()?;
        self.expect(TokenKind::DoubleArrow, "\"=>\"")?;

        self.function_stack.push(false);
        let body = self.parse_expr_bp(BP_ASSIGN);
        let is_generator = self.function_stack.pop().unwrap_or(false);
        let body = body?;

        let decl = self.arena.alloc(ArrowFnDecl {
            params,
            by_ref,
            return_type,
            body,
            is_static,
            is_generator,
            span: Span::new(start, self.prev_end()),
        });
        Ok(self.arena.alloc(Expr::ArrowFn(decl)))
    }

    fn parse_match(&mut self) -> PResult<ExprId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let subject = self.parse_expr()?;
        self.expect(TokenKind::CloseParen, "\")\"")?;
        self.expect(TokenKind::OpenBrace, "\"{\"")?;

        let mut arms = bumpalo::collections::Vec::new_in(self.arena);
        let mut seen_default = false;
        while !self.at(TokenKind::CloseBrace) {
            let arm_start = self.current_token.span.start;
            let conditions = if self.at(TokenKind::Default) {
                if seen_default {
                    return Err(self.error_at(
                        self.current_token.span,
                        "Match expressions may only contain one default arm",
                    ));
                }
                seen_default = true;
                self.bump();
                self.eat(TokenKind::Comma);
                None
            } else {
                let mut conditions = Vec::new();
                loop {
                    conditions.push(self.parse_expr()?);
                    if !self.eat(TokenKind::Comma) || self.at(TokenKind::DoubleArrow) {
                        break;
                    }
                }
                Some(self.arena.alloc_slice_copy(&conditions) as &[ExprId<'ast>])
            };
            self.expect(TokenKind::DoubleArrow, "\"=>\"")?;
            let body = self.parse_expr()?;
            arms.push(MatchArm {
                conditions,
                body,
                span: Span::new(arm_start, self.prev_end()),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseBrace, "\"}\"")?;

        Ok(self.arena.alloc(Expr::Match {
            subject,
            arms: arms.into_bump_slice(),
            span: Span::new(start, self.prev_end()),
        }))
    }
}
