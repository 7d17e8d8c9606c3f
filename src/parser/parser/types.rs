use super::{PResult, Parser};
use crate::parser::ast::Type;
use crate::parser::lexer::token::TokenKind;

impl<'src, 'ast> Parser<'src, 'ast> {
    /// `T`, `?T`, `A|B|null`, `A&B`.
    pub(super) fn parse_type(&mut self) -> PResult<&'ast Type<'ast>> {
        if self.eat(TokenKind::Question) {
            let inner = self.parse_type_atom()?;
            if self.at(TokenKind::Pipe) {
                return Err(self.error_at(
                    self.current_token.span,
                    "Nullable type cannot be part of a union type",
                ));
            }
            return Ok(self.arena.alloc(Type::Nullable(self.arena.alloc(inner))));
        }

        let first = self.parse_type_atom()?;
        if self.at(TokenKind::Pipe) {
            let mut members = vec![first];
            while self.eat(TokenKind::Pipe) {
                members.push(self.parse_type_atom()?);
            }
            return Ok(self.arena.alloc(Type::Union(self.alloc_vec(members))));
        }
        if self.at_intersection_amp() {
            let mut members = vec![first];
            while self.at_intersection_amp() {
                self.bump();
                members.push(self.parse_type_atom()?);
            }
            return Ok(self.arena.alloc(Type::Intersection(self.alloc_vec(members))));
        }
        Ok(self.arena.alloc(first))
    }

    /// `&` joining types, as opposed to a by-reference parameter marker.
    fn at_intersection_amp(&self) -> bool {
        self.at(TokenKind::Ampersand)
            && !matches!(
                self.next_token.kind,
                TokenKind::Variable | TokenKind::Ellipsis
            )
    }

    fn parse_type_atom(&mut self) -> PResult<Type<'ast>> {
        let token = self.current_token;
        match token.kind {
            TokenKind::Identifier | TokenKind::NsSeparator => {
                Ok(Type::Named(self.parse_qualified_name()?))
            }
            TokenKind::Static | TokenKind::Array => {
                self.bump();
                Ok(Type::Named(self.ident_from(token)))
            }
            _ => Err(self.unexpected_expecting("type")),
        }
    }

    pub(super) fn parse_return_type(&mut self) -> PResult<Option<&'ast Type<'ast>>> {
        if self.eat(TokenKind::Colon) {
            Ok(Some(self.parse_type()?))
        } else {
            Ok(None)
        }
    }

    /// Whether the current token can start a type declaration.
    pub(super) fn at_type_start(&self) -> bool {
        matches!(
            self.current_token.kind,
            TokenKind::Question
                | TokenKind::Identifier
                | TokenKind::NsSeparator
                | TokenKind::Static
                | TokenKind::Array
        )
    }
}
