use super::{PResult, Parser};
use crate::core::with_stack;
use crate::parser::ast::{ConstItem, Ident, StaticVar, Stmt, StmtId};
use crate::parser::lexer::token::TokenKind;
use crate::parser::span::Span;

impl<'src, 'ast> Parser<'src, 'ast> {
    pub(super) fn parse_top_stmt(&mut self) -> PResult<StmtId<'ast>> {
        let stmt = self.parse_stmt()?;
        if !matches!(stmt, Stmt::Nop { .. } | Stmt::Declare { .. }) {
            self.seen_non_declare_stmt = true;
        }
        Ok(stmt)
    }

    pub(super) fn parse_stmt(&mut self) -> PResult<StmtId<'ast>> {
        self.enter()?;
        let result = with_stack(|| self.parse_stmt_inner());
        self.leave();
        result
    }

    fn parse_stmt_inner(&mut self) -> PResult<StmtId<'ast>> {
        let token = self.current_token;
        let start = token.span.start;

        match token.kind {
            TokenKind::Attribute => {
                self.skip_attributes()?;
                self.parse_stmt_inner()
            }
            TokenKind::OpenBrace => {
                let statements = self.parse_block()?;
                Ok(self.arena.alloc(Stmt::Block {
                    statements,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Foreach => self.parse_foreach(),
            TokenKind::Switch => self.parse_switch(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Break | TokenKind::Continue => {
                self.bump();
                let mut levels = 1;
                if self.at(TokenKind::LNumber) {
                    let text = self.current_token.text(self.source);
                    levels = std::str::from_utf8(text)
                        .ok()
                        .and_then(|t| t.parse::<u32>().ok())
                        .filter(|n| *n > 0)
                        .ok_or_else(|| {
                            self.error_at(
                                self.current_token.span,
                                format!(
                                    "'{}' operator accepts only positive integers",
                                    if token.kind == TokenKind::Break {
                                        "break"
                                    } else {
                                        "continue"
                                    }
                                ),
                            )
                        })?;
                    self.bump();
                }
                self.expect_semicolon()?;
                let span = Span::new(start, self.prev_end());
                Ok(self.arena.alloc(if token.kind == TokenKind::Break {
                    Stmt::Break { levels, span }
                } else {
                    Stmt::Continue { levels, span }
                }))
            }
            TokenKind::Return => {
                self.bump();
                let expr = if matches!(
                    self.current_token.kind,
                    TokenKind::SemiColon | TokenKind::CloseTag
                ) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Return {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Echo | TokenKind::OpenTagWithEcho => {
                self.bump();
                let mut exprs = vec![self.parse_expr()?];
                while self.eat(TokenKind::Comma) {
                    exprs.push(self.parse_expr()?);
                }
                if !matches!(
                    self.current_token.kind,
                    TokenKind::SemiColon | TokenKind::CloseTag
                ) {
                    return Err(self.unexpected_expecting("\",\" or \";\""));
                }
                self.bump();
                Ok(self.arena.alloc(Stmt::Echo {
                    exprs: self.arena.alloc_slice_copy(&exprs),
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::InlineHtml => {
                self.bump();
                Ok(self.arena.alloc(Stmt::InlineHtml {
                    value: self.arena.alloc_slice_copy(token.text(self.source)),
                    span: token.span,
                }))
            }
            TokenKind::SemiColon | TokenKind::CloseTag => {
                self.bump();
                Ok(self.arena.alloc(Stmt::Nop { span: token.span }))
            }
            TokenKind::Function
                if self.next_token.kind == TokenKind::Identifier
                    || self.next_token.kind == TokenKind::Ampersand =>
            {
                let is_decl = self.next_token.kind == TokenKind::Identifier
                    || self.peek_after_ampersand_is_identifier();
                if is_decl {
                    self.parse_function_decl()
                } else {
                    self.parse_expr_stmt()
                }
            }
            TokenKind::Abstract | TokenKind::Final | TokenKind::Readonly | TokenKind::Class => {
                self.parse_class_decl()
            }
            TokenKind::Interface => self.parse_interface_decl(),
            TokenKind::Trait => Err(self.error_at(token.span, "Traits are not supported")),
            TokenKind::Namespace => {
                Err(self.error_at(token.span, "Namespaces are not supported"))
            }
            TokenKind::Use => Err(self.error_at(token.span, "Use imports are not supported")),
            TokenKind::Goto => Err(self.error_at(token.span, "Goto is not supported")),
            TokenKind::Identifier if self.next_token.kind == TokenKind::Colon => {
                Err(self.error_at(token.span, "Goto labels are not supported"))
            }
            TokenKind::Global => {
                self.bump();
                let mut vars = Vec::new();
                loop {
                    let var = self.expect(TokenKind::Variable, "variable")?;
                    vars.push(self.variable_ident(var));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Global {
                    vars: self.alloc_vec(vars),
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Static if self.next_token.kind == TokenKind::Variable => {
                self.bump();
                let mut vars = Vec::new();
                loop {
                    let var = self.expect(TokenKind::Variable, "variable")?;
                    let default = if self.eat(TokenKind::Eq) {
                        Some(self.parse_expr()?)
                    } else {
                        None
                    };
                    vars.push(StaticVar {
                        name: self.variable_ident(var),
                        default,
                        span: Span::new(var.span.start, self.prev_end()),
                    });
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Static {
                    vars: self.alloc_vec(vars),
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Unset => {
                self.bump();
                self.expect(TokenKind::OpenParen, "\"(\"")?;
                let mut vars = Vec::new();
                while !self.at(TokenKind::CloseParen) {
                    let target = self.parse_expr()?;
                    if !target.is_writable() {
                        return Err(self.error_at(
                            target.span(),
                            "Cannot use temporary expression in write context",
                        ));
                    }
                    vars.push(target);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::CloseParen, "\")\"")?;
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Unset {
                    vars: self.arena.alloc_slice_copy(&vars),
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Const => {
                self.bump();
                let items = self.parse_const_items()?;
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Const {
                    items,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::Declare => self.parse_declare(),
            TokenKind::Throw => {
                self.bump();
                let expr = self.parse_expr()?;
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::Throw {
                    expr,
                    span: Span::new(start, self.prev_end()),
                }))
            }
            TokenKind::HaltCompiler => {
                self.bump();
                self.expect(TokenKind::OpenParen, "\"(\"")?;
                self.expect(TokenKind::CloseParen, "\")\"")?;
                self.expect_semicolon()?;
                Ok(self.arena.alloc(Stmt::HaltCompiler {
                    span: Span::new(start, self.prev_end()),
                }))
            }
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        let expr = self.parse_expr()?;
        self.expect_semicolon()?;
        Ok(self.arena.alloc(Stmt::Expression {
            expr,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn peek_after_ampersand_is_identifier(&self) -> bool {
        let mut lookahead = self.lexer.clone();
        loop {
            let token = lookahead.next_token();
            if !token.kind.is_trivia() {
                return token.kind == TokenKind::Identifier;
            }
        }
    }

    /// `{ stmt* }`
    pub(super) fn parse_block(&mut self) -> PResult<&'ast [StmtId<'ast>]> {
        self.expect(TokenKind::OpenBrace, "\"{\"")?;
        let mut statements = Vec::new();
        while !self.at(TokenKind::CloseBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected_expecting("\"}\""));
            }
            statements.push(self.parse_stmt()?);
        }
        self.bump();
        Ok(self.arena.alloc_slice_copy(&statements))
    }

    /// Block or a single statement, as used by control structures.
    pub(super) fn parse_body(&mut self) -> PResult<&'ast [StmtId<'ast>]> {
        if self.at(TokenKind::OpenBrace) {
            self.parse_block()
        } else {
            let stmt = self.parse_stmt()?;
            Ok(self.arena.alloc_slice_copy(&[stmt]))
        }
    }

    /// Statements up to (not including) one of `terminators`, for the
    /// alternative `:` ... `endXXX;` syntax.
    pub(super) fn parse_stmts_until(
        &mut self,
        terminators: &[TokenKind],
    ) -> PResult<&'ast [StmtId<'ast>]> {
        let mut statements = Vec::new();
        while !terminators.contains(&self.current_token.kind) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected());
            }
            statements.push(self.parse_stmt()?);
        }
        Ok(self.arena.alloc_slice_copy(&statements))
    }

    pub(super) fn variable_ident(&self, token: crate::parser::lexer::token::Token) -> Ident<'ast> {
        let text = token.text(self.source);
        Ident {
            name: self.arena.alloc_slice_copy(text.strip_prefix(b"$").unwrap_or(text)),
            span: token.span,
        }
    }

    pub(super) fn parse_const_items(&mut self) -> PResult<&'ast [ConstItem<'ast>]> {
        let mut items = Vec::new();
        loop {
            let name = self.parse_member_ident()?;
            self.expect(TokenKind::Eq, "\"=\"")?;
            let value = self.parse_expr()?;
            items.push(ConstItem {
                name,
                value,
                span: name.span.to(value.span()),
            });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(self.alloc_vec(items))
    }

    fn parse_declare(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let mut strict_types = None;
        loop {
            let name = self.parse_member_ident()?;
            self.expect(TokenKind::Eq, "\"=\"")?;
            let value = self.parse_expr()?;
            if name.is(b"strict_types") {
                let enabled = match value {
                    crate::parser::ast::Expr::Int { value: 0, .. } => false,
                    crate::parser::ast::Expr::Int { value: 1, .. } => true,
                    _ => {
                        return Err(self.error_at(
                            value.span(),
                            "strict_types declaration must have 0 or 1 as its value",
                        ));
                    }
                };
                if self.seen_non_declare_stmt || !self.function_stack.is_empty() {
                    return Err(self.error_at(
                        name.span,
                        "strict_types declaration must be the very first statement in the script",
                    ));
                }
                strict_types = Some(enabled);
                self.strict_types = enabled;
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::CloseParen, "\")\"")?;

        let body = if self.at(TokenKind::OpenBrace) {
            Some(self.parse_block()?)
        } else if self.eat(TokenKind::Colon) {
            let body = self.parse_stmts_until(&[TokenKind::EndDeclare])?;
            self.bump();
            self.expect_semicolon()?;
            Some(body)
        } else {
            self.expect_semicolon()?;
            None
        };

        Ok(self.arena.alloc(Stmt::Declare {
            strict_types,
            body,
            span: Span::new(start, self.prev_end()),
        }))
    }
}
