use crate::parser::ast::{Ident, Program, Stmt, SyntaxError};
use crate::parser::lexer::{
    Lexer,
    token::{Token, TokenKind},
};
use crate::parser::span::Span;
use bumpalo::Bump;

mod attributes;
mod control_flow;
mod definitions;
mod expr;
mod stmt;
mod strings;
mod types;

/// Nesting limit for statements and expressions.
const MAX_DEPTH: usize = 200;

pub type PResult<T> = Result<T, SyntaxError>;

/// Parse a whole script. Stops at the first error.
pub fn parse<'ast>(source: &[u8], arena: &'ast Bump) -> PResult<Program<'ast>> {
    Parser::new(Lexer::new(source), arena).parse_program()
}

pub struct Parser<'src, 'ast> {
    pub(super) lexer: Lexer<'src>,
    pub(super) source: &'src [u8],
    pub(super) arena: &'ast Bump,
    pub(super) current_token: Token,
    pub(super) next_token: Token,
    /// One entry per enclosing function body; set when it contains `yield`.
    pub(super) function_stack: Vec<bool>,
    pub(super) depth: usize,
    pub(super) seen_non_declare_stmt: bool,
    pub(super) strict_types: bool,
    prev_end_offset: usize,
}

impl<'src, 'ast> Parser<'src, 'ast> {
    pub fn new(lexer: Lexer<'src>, arena: &'ast Bump) -> Self {
        let eof = Token {
            kind: TokenKind::Eof,
            span: Span::default(),
        };
        let mut parser = Self {
            source: lexer.source(),
            lexer,
            arena,
            current_token: eof,
            next_token: eof,
            function_stack: Vec::new(),
            depth: 0,
            seen_non_declare_stmt: false,
            strict_types: false,
            prev_end_offset: 0,
        };
        parser.bump();
        parser.bump();
        parser
    }

    pub(super) fn bump(&mut self) {
        self.prev_end_offset = self.current_token.span.end;
        self.current_token = self.next_token;
        loop {
            let token = self.lexer.next_token();
            if !token.kind.is_trivia() {
                self.next_token = token;
                break;
            }
        }
    }

    /// End offset of the token just consumed.
    pub(super) fn prev_end(&self) -> usize {
        self.prev_end_offset
    }

    pub(super) fn at(&self, kind: TokenKind) -> bool {
        self.current_token.kind == kind
    }

    pub(super) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            let token = self.current_token;
            self.bump();
            Ok(token)
        } else {
            Err(self.unexpected_expecting(what))
        }
    }

    pub(super) fn expect_semicolon(&mut self) -> PResult<()> {
        match self.current_token.kind {
            TokenKind::SemiColon | TokenKind::CloseTag => {
                self.bump();
                Ok(())
            }
            _ => Err(self.unexpected_expecting("\";\"")),
        }
    }

    pub(super) fn error_at(&self, span: Span, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.source, span, message)
    }

    fn describe(&self, token: Token) -> String {
        let text = String::from_utf8_lossy(token.text(self.source)).into_owned();
        match token.kind {
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Variable => format!("variable \"{text}\""),
            TokenKind::Identifier => format!("identifier \"{text}\""),
            TokenKind::LNumber => format!("integer \"{text}\""),
            TokenKind::DNumber => format!("floating-point number \"{text}\""),
            TokenKind::ConstantString | TokenKind::Heredoc | TokenKind::Nowdoc => {
                format!("string content \"{text}\"")
            }
            TokenKind::DoubleQuotedString => "double-quote mark".to_string(),
            TokenKind::InlineHtml => "inline html".to_string(),
            _ => format!("token \"{text}\""),
        }
    }

    pub(super) fn unexpected(&self) -> SyntaxError {
        let token = self.current_token;
        if let TokenKind::Error(err) = token.kind {
            return self.error_at(token.span, err.message());
        }
        self.error_at(
            token.span,
            format!("syntax error, unexpected {}", self.describe(token)),
        )
    }

    pub(super) fn unexpected_expecting(&self, what: &str) -> SyntaxError {
        let token = self.current_token;
        if let TokenKind::Error(err) = token.kind {
            return self.error_at(token.span, err.message());
        }
        self.error_at(
            token.span,
            format!(
                "syntax error, unexpected {}, expecting {what}",
                self.describe(token)
            ),
        )
    }

    pub(super) fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error_at(
                self.current_token.span,
                "Maximum nesting depth exceeded",
            ));
        }
        Ok(())
    }

    pub(super) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(super) fn alloc_vec<T>(&self, items: Vec<T>) -> &'ast [T] {
        self.arena.alloc_slice_fill_iter(items)
    }

    pub(super) fn ident_from(&self, token: Token) -> Ident<'ast> {
        Ident {
            name: self.arena.alloc_slice_copy(token.text(self.source)),
            span: token.span,
        }
    }

    /// Identifier, or any keyword when used as a member name.
    pub(super) fn parse_member_ident(&mut self) -> PResult<Ident<'ast>> {
        let token = self.current_token;
        if token.kind == TokenKind::Identifier || token.kind.is_semi_reserved() {
            self.bump();
            Ok(self.ident_from(token))
        } else {
            Err(self.unexpected_expecting("identifier"))
        }
    }

    /// Class or function name, with an optional leading `\`.
    pub(super) fn parse_qualified_name(&mut self) -> PResult<Ident<'ast>> {
        let leading = self.current_token.span;
        let had_separator = self.eat(TokenKind::NsSeparator);
        let token = self.current_token;
        if token.kind != TokenKind::Identifier {
            return Err(self.unexpected_expecting("identifier"));
        }
        self.bump();
        if self.at(TokenKind::NsSeparator) {
            return Err(self.error_at(
                self.current_token.span,
                "Namespaced names are not supported",
            ));
        }
        let mut ident = self.ident_from(token);
        if had_separator {
            ident.span = leading.to(token.span);
        }
        Ok(ident)
    }

    pub fn parse_program(&mut self) -> PResult<Program<'ast>> {
        let mut statements = Vec::new();

        while !self.at(TokenKind::Eof) {
            let stmt = self.parse_top_stmt()?;
            let halt = matches!(stmt, Stmt::HaltCompiler { .. });
            statements.push(stmt);
            if halt {
                break;
            }
        }

        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => first.span().to(last.span()),
            _ => Span::default(),
        };

        Ok(Program {
            statements: self.arena.alloc_slice_copy(&statements),
            strict_types: self.strict_types,
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::sexpr::SexprPrinter;

    fn sexpr(src: &str) -> String {
        let arena = Bump::new();
        let program = parse(src.as_bytes(), &arena).expect("parse failed");
        SexprPrinter::new().print_program(&program)
    }

    fn parse_error(src: &str) -> SyntaxError {
        let arena = Bump::new();
        match parse(src.as_bytes(), &arena) {
            Ok(_) => panic!("expected a syntax error"),
            Err(err) => err,
        }
    }

    #[test]
    fn precedence_of_arithmetic_and_comparison() {
        assert_eq!(
            sexpr("<?php $a = 1 + 2 * 3 < 4 && $b || $c;"),
            "(program (expr (assign (var a) (|| (&& (< (+ (int 1) (* (int 2) (int 3))) (int 4)) (var b)) (var c)))))"
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(
            sexpr("<?php $a = $b = 3;"),
            "(program (expr (assign (var a) (assign (var b) (int 3)))))"
        );
    }

    #[test]
    fn unary_minus_binds_looser_than_pow() {
        assert_eq!(
            sexpr("<?php -2 ** 2;"),
            "(program (expr (neg (** (int 2) (int 2)))))"
        );
    }

    #[test]
    fn not_with_assignment_binds_to_variable() {
        assert_eq!(
            sexpr("<?php !$a = f();"),
            "(program (expr (not (assign (var a) (call (name f))))))"
        );
    }

    #[test]
    fn reserved_words_after_arrow_and_double_colon() {
        assert_eq!(
            sexpr("<?php Foo::class; Foo::CONST_X; $o->class; $o->continue(); Foo::list();"),
            "(program (expr (class-const Foo class)) (expr (class-const Foo CONST_X)) (expr (prop (var o) class)) (expr (method-call (var o) continue)) (expr (static-call Foo list)))"
        );
    }

    #[test]
    fn class_declaration_captures_members() {
        let out = sexpr(
            "<?php abstract class A extends B implements I, J {
                const X = 1;
                private static $count = 0;
                public function continue() {}
                abstract protected function run(int $x): ?string;
            }",
        );
        assert_eq!(
            out,
            "(program (class A abstract (extends B) (implements I J) (const X (int 1)) (property private static count (int 0)) (method public continue ()) (method protected abstract run ((param x int)) (returns ?string))))"
        );
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse_error("<?php\n$a = ;\n");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 6);
        assert_eq!(err.message, "syntax error, unexpected token \";\"");
    }

    #[test]
    fn missing_semicolon_at_eof() {
        let err = parse_error("<?php echo 1");
        assert_eq!(
            err.message,
            "syntax error, unexpected end of file, expecting \",\" or \";\""
        );
    }

    #[test]
    fn unterminated_string_is_reported() {
        let err = parse_error("<?php\necho 'abc;\n");
        assert_eq!(err.message, "Unterminated string literal");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn interpolation_builds_parts() {
        assert_eq!(
            sexpr("<?php \"a $b[0] {$c->d} e\";"),
            "(program (expr (interp (str \"a \") (dim (var b) (int 0)) (str \" \") (prop (var c) d) (str \" e\"))))"
        );
    }

    #[test]
    fn generator_flag_is_set_by_yield() {
        assert_eq!(
            sexpr("<?php function g() { $x = yield 1 => 2; }"),
            "(program (function g generator () (expr (assign (var x) (yield (int 1) (int 2))))))"
        );
    }

    #[test]
    fn deep_nesting_is_rejected_not_overflowed() {
        let src = format!("<?php {}1{};", "(".repeat(5000), ")".repeat(5000));
        let err = parse_error(&src);
        assert_eq!(err.message, "Maximum nesting depth exceeded");
    }

    #[test]
    fn long_left_associative_chains_parse() {
        let src = format!("<?php $s = {};", vec!["'a'"; 20_000].join(" . "));
        let arena = Bump::new();
        assert!(parse(src.as_bytes(), &arena).is_ok());
    }

    #[test]
    fn strict_types_must_come_first() {
        let err = parse_error("<?php echo 1; declare(strict_types=1);");
        assert_eq!(
            err.message,
            "strict_types declaration must be the very first statement in the script"
        );
    }
}
