use super::{PResult, Parser};
use crate::parser::ast::{Case, Catch, ExprId, Stmt, StmtId};
use crate::parser::lexer::token::TokenKind;
use crate::parser::span::Span;

impl<'src, 'ast> Parser<'src, 'ast> {
    fn parse_paren_condition(&mut self) -> PResult<ExprId<'ast>> {
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let condition = self.parse_expr()?;
        self.expect(TokenKind::CloseParen, "\")\"")?;
        Ok(condition)
    }

    /// Finish an alternative-syntax block: `endXXX ;`
    fn finish_alt_block(&mut self, end: TokenKind, what: &str) -> PResult<()> {
        self.expect(end, what)?;
        self.expect_semicolon()
    }

    pub(super) fn parse_if(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let condition = self.parse_paren_condition()?;

        if self.eat(TokenKind::Colon) {
            return self.parse_if_alt(start, condition);
        }

        let then_block = self.parse_body()?;
        let else_block = match self.current_token.kind {
            TokenKind::ElseIf => Some(self.arena.alloc_slice_copy(&[self.parse_if()?]) as &[_]),
            TokenKind::Else if self.next_token.kind == TokenKind::If => {
                self.bump();
                Some(self.arena.alloc_slice_copy(&[self.parse_if()?]) as &[_])
            }
            TokenKind::Else => {
                self.bump();
                Some(self.parse_body()?)
            }
            _ => None,
        };

        Ok(self.arena.alloc(Stmt::If {
            condition,
            then_block,
            else_block,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_if_alt(&mut self, start: usize, condition: ExprId<'ast>) -> PResult<StmtId<'ast>> {
        let then_block = self.parse_stmts_until(&[
            TokenKind::ElseIf,
            TokenKind::Else,
            TokenKind::EndIf,
        ])?;

        let else_block = match self.current_token.kind {
            TokenKind::ElseIf => {
                let nested_start = self.current_token.span.start;
                self.bump();
                let nested_condition = self.parse_paren_condition()?;
                self.expect(TokenKind::Colon, "\":\"")?;
                // The nested branch consumes the shared `endif;`.
                let nested = self.parse_if_alt(nested_start, nested_condition)?;
                return Ok(self.arena.alloc(Stmt::If {
                    condition,
                    then_block,
                    else_block: Some(self.arena.alloc_slice_copy(&[nested])),
                    span: Span::new(start, self.prev_end()),
                }));
            }
            TokenKind::Else => {
                self.bump();
                self.expect(TokenKind::Colon, "\":\"")?;
                Some(self.parse_stmts_until(&[TokenKind::EndIf])?)
            }
            _ => None,
        };
        self.finish_alt_block(TokenKind::EndIf, "\"endif\"")?;

        Ok(self.arena.alloc(Stmt::If {
            condition,
            then_block,
            else_block,
            span: Span::new(start, self.prev_end()),
        }))
    }

    pub(super) fn parse_while(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let condition = self.parse_paren_condition()?;
        let body = if self.eat(TokenKind::Colon) {
            let body = self.parse_stmts_until(&[TokenKind::EndWhile])?;
            self.finish_alt_block(TokenKind::EndWhile, "\"endwhile\"")?;
            body
        } else {
            self.parse_body()?
        };
        Ok(self.arena.alloc(Stmt::While {
            condition,
            body,
            span: Span::new(start, self.prev_end()),
        }))
    }

    pub(super) fn parse_do_while(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let body = self.parse_body()?;
        self.expect(TokenKind::While, "\"while\"")?;
        let condition = self.parse_paren_condition()?;
        self.expect_semicolon()?;
        Ok(self.arena.alloc(Stmt::DoWhile {
            body,
            condition,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_expr_list_until(&mut self, end: TokenKind) -> PResult<&'ast [ExprId<'ast>]> {
        let mut exprs = Vec::new();
        while !self.at(end) {
            exprs.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(self.arena.alloc_slice_copy(&exprs))
    }

    pub(super) fn parse_for(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let init = self.parse_expr_list_until(TokenKind::SemiColon)?;
        self.expect(TokenKind::SemiColon, "\";\"")?;
        let condition = self.parse_expr_list_until(TokenKind::SemiColon)?;
        self.expect(TokenKind::SemiColon, "\";\"")?;
        let step = self.parse_expr_list_until(TokenKind::CloseParen)?;
        self.expect(TokenKind::CloseParen, "\")\"")?;

        let body = if self.eat(TokenKind::Colon) {
            let body = self.parse_stmts_until(&[TokenKind::EndFor])?;
            self.finish_alt_block(TokenKind::EndFor, "\"endfor\"")?;
            body
        } else {
            self.parse_body()?
        };

        Ok(self.arena.alloc(Stmt::For {
            init,
            condition,
            step,
            body,
            span: Span::new(start, self.prev_end()),
        }))
    }

    pub(super) fn parse_foreach(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        self.expect(TokenKind::OpenParen, "\"(\"")?;
        let expr = self.parse_expr()?;
        self.expect(TokenKind::As, "\"as\"")?;

        let mut by_ref = self.eat(TokenKind::Ampersand);
        let mut value_var = self.parse_foreach_target()?;
        let mut key_var = None;
        if self.eat(TokenKind::DoubleArrow) {
            if by_ref {
                return Err(self.error_at(value_var.span(), "Key element cannot be a reference"));
            }
            key_var = Some(value_var);
            by_ref = self.eat(TokenKind::Ampersand);
            value_var = self.parse_foreach_target()?;
        }
        self.expect(TokenKind::CloseParen, "\")\"")?;

        let body = if self.eat(TokenKind::Colon) {
            let body = self.parse_stmts_until(&[TokenKind::EndForeach])?;
            self.finish_alt_block(TokenKind::EndForeach, "\"endforeach\"")?;
            body
        } else {
            self.parse_body()?
        };

        Ok(self.arena.alloc(Stmt::Foreach {
            expr,
            key_var,
            value_var,
            by_ref,
            body,
            span: Span::new(start, self.prev_end()),
        }))
    }

    fn parse_foreach_target(&mut self) -> PResult<ExprId<'ast>> {
        let target = self.parse_expr_bp(super::expr::BP_ASSIGN + 1)?;
        let target = self.as_destructuring_target(target);
        if !target.is_writable() {
            return Err(self.error_at(
                target.span(),
                "Cannot use temporary expression in write context",
            ));
        }
        Ok(target)
    }

    pub(super) fn parse_switch(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let subject = self.parse_paren_condition()?;

        let alt = if self.eat(TokenKind::Colon) {
            true
        } else {
            self.expect(TokenKind::OpenBrace, "\"{\"")?;
            false
        };
        // A stray `;` right after the opening brace is allowed.
        self.eat(TokenKind::SemiColon);

        let end = if alt {
            TokenKind::EndSwitch
        } else {
            TokenKind::CloseBrace
        };
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.at(end) {
            let case_start = self.current_token.span.start;
            let condition = match self.current_token.kind {
                TokenKind::Case => {
                    self.bump();
                    Some(self.parse_expr()?)
                }
                TokenKind::Default => {
                    if seen_default {
                        return Err(self.error_at(
                            self.current_token.span,
                            "Switch statements may only contain one default clause",
                        ));
                    }
                    seen_default = true;
                    self.bump();
                    None
                }
                _ => return Err(self.unexpected()),
            };
            if !self.eat(TokenKind::Colon) && !self.eat(TokenKind::SemiColon) {
                return Err(self.unexpected_expecting("\":\""));
            }
            let body = self.parse_stmts_until(&[TokenKind::Case, TokenKind::Default, end])?;
            cases.push(Case {
                condition,
                body,
                span: Span::new(case_start, self.prev_end()),
            });
        }
        self.bump();
        if alt {
            self.expect_semicolon()?;
        }

        Ok(self.arena.alloc(Stmt::Switch {
            subject,
            cases: self.alloc_vec(cases),
            span: Span::new(start, self.prev_end()),
        }))
    }

    pub(super) fn parse_try(&mut self) -> PResult<StmtId<'ast>> {
        let start = self.current_token.span.start;
        self.bump();
        let body = self.parse_block()?;

        let mut catches = Vec::new();
        while self.at(TokenKind::Catch) {
            let catch_start = self.current_token.span.start;
            self.bump();
            self.expect(TokenKind::OpenParen, "\"(\"")?;
            let mut types = vec![self.parse_qualified_name()?];
            while self.eat(TokenKind::Pipe) {
                types.push(self.parse_qualified_name()?);
            }
            let var = if self.at(TokenKind::Variable) {
                let token = self.current_token;
                self.bump();
                Some(self.variable_ident(token))
            } else {
                None
            };
            self.expect(TokenKind::CloseParen, "\")\"")?;
            let catch_body = self.parse_block()?;
            catches.push(Catch {
                types: self.alloc_vec(types),
                var,
                body: catch_body,
                span: Span::new(catch_start, self.prev_end()),
            });
        }

        let finally = if self.eat(TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            return Err(self.error_at(
                Span::new(start, self.prev_end()),
                "Cannot use try without catch or finally",
            ));
        }

        Ok(self.arena.alloc(Stmt::Try {
            body,
            catches: self.alloc_vec(catches),
            finally,
            span: Span::new(start, self.prev_end()),
        }))
    }
}
