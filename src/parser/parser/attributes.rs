use super::{PResult, Parser};
use crate::parser::lexer::token::TokenKind;

impl<'src, 'ast> Parser<'src, 'ast> {
    /// Consume `#[...]` groups. Attributes carry no runtime meaning here,
    /// but their syntax is still checked: names, then balanced arguments.
    pub(super) fn skip_attributes(&mut self) -> PResult<()> {
        while self.at(TokenKind::Attribute) {
            self.bump();
            loop {
                self.parse_qualified_name()?;
                if self.at(TokenKind::OpenParen) {
                    self.skip_balanced_parens()?;
                }
                if !self.eat(TokenKind::Comma) || self.at(TokenKind::CloseBracket) {
                    break;
                }
            }
            self.expect(TokenKind::CloseBracket, "\"]\"")?;
        }
        Ok(())
    }

    fn skip_balanced_parens(&mut self) -> PResult<()> {
        let mut depth = 0usize;
        loop {
            match self.current_token.kind {
                TokenKind::OpenParen => depth += 1,
                TokenKind::CloseParen => {
                    depth -= 1;
                    if depth == 0 {
                        self.bump();
                        return Ok(());
                    }
                }
                TokenKind::Eof | TokenKind::Error(_) => {
                    return Err(self.unexpected_expecting("\")\""));
                }
                _ => {}
            }
            self.bump();
        }
    }
}
