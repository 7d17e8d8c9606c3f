pub mod token;

use crate::parser::span::Span;
use memchr::{memchr, memchr2, memrchr};
use token::{LexError, Token, TokenKind};

/// Nesting limit for `{$ ... "..." ... }` inside interpolated strings.
const MAX_INTERPOLATION_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexerState {
    /// Outside `<?php`: everything is inline HTML.
    Initial,
    Scripting,
    Finished,
}

fn keyword_lookup(text: &[u8]) -> TokenKind {
    if text.len() > 16 {
        return TokenKind::Identifier;
    }
    let mut buf = [0u8; 16];
    let lower = &mut buf[..text.len()];
    lower.copy_from_slice(text);
    lower.make_ascii_lowercase();

    match &*lower {
        b"or" => TokenKind::LogicalOr,
        b"and" => TokenKind::LogicalAnd,
        b"xor" => TokenKind::LogicalXor,
        b"exit" | b"die" => TokenKind::Exit,
        b"function" => TokenKind::Function,
        b"fn" => TokenKind::Fn,
        b"const" => TokenKind::Const,
        b"return" => TokenKind::Return,
        b"yield" => TokenKind::Yield,
        b"try" => TokenKind::Try,
        b"catch" => TokenKind::Catch,
        b"finally" => TokenKind::Finally,
        b"throw" => TokenKind::Throw,
        b"if" => TokenKind::If,
        b"elseif" => TokenKind::ElseIf,
        b"endif" => TokenKind::EndIf,
        b"else" => TokenKind::Else,
        b"insteadof" => TokenKind::Insteadof,
        b"while" => TokenKind::While,
        b"endwhile" => TokenKind::EndWhile,
        b"do" => TokenKind::Do,
        b"for" => TokenKind::For,
        b"endfor" => TokenKind::EndFor,
        b"foreach" => TokenKind::Foreach,
        b"endforeach" => TokenKind::EndForeach,
        b"declare" => TokenKind::Declare,
        b"enddeclare" => TokenKind::EndDeclare,
        b"instanceof" => TokenKind::InstanceOf,
        b"as" => TokenKind::As,
        b"switch" => TokenKind::Switch,
        b"endswitch" => TokenKind::EndSwitch,
        b"case" => TokenKind::Case,
        b"default" => TokenKind::Default,
        b"break" => TokenKind::Break,
        b"continue" => TokenKind::Continue,
        b"goto" => TokenKind::Goto,
        b"echo" => TokenKind::Echo,
        b"print" => TokenKind::Print,
        b"class" => TokenKind::Class,
        b"interface" => TokenKind::Interface,
        b"trait" => TokenKind::Trait,
        b"extends" => TokenKind::Extends,
        b"implements" => TokenKind::Implements,
        b"new" => TokenKind::New,
        b"clone" => TokenKind::Clone,
        b"var" | b"public" => TokenKind::Public,
        b"protected" => TokenKind::Protected,
        b"private" => TokenKind::Private,
        b"final" => TokenKind::Final,
        b"abstract" => TokenKind::Abstract,
        b"static" => TokenKind::Static,
        b"readonly" => TokenKind::Readonly,
        b"namespace" => TokenKind::Namespace,
        b"use" => TokenKind::Use,
        b"global" => TokenKind::Global,
        b"isset" => TokenKind::Isset,
        b"empty" => TokenKind::Empty,
        b"__halt_compiler" => TokenKind::HaltCompiler,
        b"__class__" => TokenKind::ClassC,
        b"__trait__" => TokenKind::TraitC,
        b"__function__" => TokenKind::FuncC,
        b"__method__" => TokenKind::MethodC,
        b"__line__" => TokenKind::Line,
        b"__file__" => TokenKind::File,
        b"__dir__" => TokenKind::Dir,
        b"__namespace__" => TokenKind::NsC,
        b"array" => TokenKind::Array,
        b"match" => TokenKind::Match,
        b"list" => TokenKind::List,
        b"include" => TokenKind::Include,
        b"include_once" => TokenKind::IncludeOnce,
        b"require" => TokenKind::Require,
        b"require_once" => TokenKind::RequireOnce,
        b"eval" => TokenKind::Eval,
        b"unset" => TokenKind::Unset,
        _ => TokenKind::Identifier,
    }
}

fn cast_lookup(text: &[u8]) -> Option<TokenKind> {
    let lower = text.to_ascii_lowercase();
    Some(match lower.as_slice() {
        b"int" | b"integer" => TokenKind::IntCast,
        b"bool" | b"boolean" => TokenKind::BoolCast,
        b"float" | b"double" | b"real" => TokenKind::FloatCast,
        b"string" | b"binary" => TokenKind::StringCast,
        b"array" => TokenKind::ArrayCast,
        b"object" => TokenKind::ObjectCast,
        b"unset" => TokenKind::UnsetCast,
        _ => return None,
    })
}

pub(crate) fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

pub(crate) fn is_ident_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c >= 0x80
}

const THREE_CHAR_OPS: &[(&[u8], TokenKind)] = &[
    (b"===", TokenKind::EqEqEq),
    (b"!==", TokenKind::BangEqEq),
    (b"<=>", TokenKind::Spaceship),
    (b"**=", TokenKind::PowEq),
    (b"...", TokenKind::Ellipsis),
    (b"<<=", TokenKind::SlEq),
    (b">>=", TokenKind::SrEq),
    (b"??=", TokenKind::CoalesceEq),
    (b"?->", TokenKind::NullsafeArrow),
];

const TWO_CHAR_OPS: &[(&[u8], TokenKind)] = &[
    (b"==", TokenKind::EqEq),
    (b"!=", TokenKind::BangEq),
    (b"<>", TokenKind::BangEq),
    (b"<=", TokenKind::LtEq),
    (b">=", TokenKind::GtEq),
    (b"&&", TokenKind::AmpersandAmpersand),
    (b"||", TokenKind::PipePipe),
    (b"++", TokenKind::Inc),
    (b"--", TokenKind::Dec),
    (b"+=", TokenKind::PlusEq),
    (b"-=", TokenKind::MinusEq),
    (b"*=", TokenKind::MulEq),
    (b"/=", TokenKind::DivEq),
    (b".=", TokenKind::ConcatEq),
    (b"%=", TokenKind::ModEq),
    (b"&=", TokenKind::AndEq),
    (b"|=", TokenKind::OrEq),
    (b"^=", TokenKind::XorEq),
    (b"->", TokenKind::Arrow),
    (b"=>", TokenKind::DoubleArrow),
    (b"::", TokenKind::DoubleColon),
    (b"<<", TokenKind::Sl),
    (b">>", TokenKind::Sr),
    (b"??", TokenKind::Coalesce),
    (b"**", TokenKind::Pow),
];

/// Lazily tokenize `source`. Restart by creating a new lexer.
pub fn tokenize(source: &[u8]) -> Lexer<'_> {
    Lexer::new(source)
}

#[derive(Debug, Clone)]
pub struct Lexer<'src> {
    input: &'src [u8],
    cursor: usize,
    end: usize,
    state: LexerState,
    halt_pending: bool,
    emitted_eof: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(input: &'src [u8]) -> Self {
        let mut cursor = 0;
        if input.starts_with(b"#!") {
            cursor = memchr(b'\n', input).map(|pos| pos + 1).unwrap_or(input.len());
        }

        Self {
            input,
            cursor,
            end: input.len(),
            state: LexerState::Initial,
            halt_pending: false,
            emitted_eof: false,
        }
    }

    /// Lexer over `input[start..end]` that begins in PHP code. Spans stay
    /// absolute so they can be reported against the full source.
    pub fn new_scripting(input: &'src [u8], start: usize, end: usize) -> Self {
        let end = end.min(input.len());
        Self {
            input,
            cursor: start.min(end),
            end,
            state: LexerState::Scripting,
            halt_pending: false,
            emitted_eof: false,
        }
    }

    pub fn source(&self) -> &'src [u8] {
        self.input
    }

    pub fn slice(&self, span: Span) -> &'src [u8] {
        span.as_str(self.input)
    }

    fn byte_at(&self, pos: usize) -> Option<u8> {
        if pos < self.end {
            Some(self.input[pos])
        } else {
            None
        }
    }

    fn peek(&self) -> Option<u8> {
        self.byte_at(self.cursor)
    }

    fn peek_next(&self) -> Option<u8> {
        self.byte_at(self.cursor + 1)
    }

    fn advance(&mut self) {
        self.cursor = (self.cursor + 1).min(self.end);
    }

    fn advance_n(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.end);
    }

    fn rest(&self) -> &'src [u8] {
        &self.input[self.cursor.min(self.end)..self.end]
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.cursor += 1;
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) {
        while let Some(c) = self.peek() {
            if is_ident_char(c) {
                self.cursor += 1;
            } else {
                break;
            }
        }
    }

    fn eof_token(&mut self) -> Token {
        self.state = LexerState::Finished;
        Token {
            kind: TokenKind::Eof,
            span: Span::new(self.end, self.end),
        }
    }

    /// Next token, or `Eof` forever once input is exhausted.
    pub fn next_token(&mut self) -> Token {
        match self.state {
            LexerState::Finished => self.eof_token(),
            LexerState::Initial => self.lex_inline(),
            LexerState::Scripting => self.lex_scripting(),
        }
    }

    fn open_tag_at(&self, at: usize) -> Option<(TokenKind, usize)> {
        let rest = &self.input[at..self.end];
        if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case(b"<?php") {
            return match rest.get(5) {
                None => Some((TokenKind::OpenTag, 5)),
                Some(b'\r') if rest.get(6) == Some(&b'\n') => Some((TokenKind::OpenTag, 7)),
                Some(b) if b.is_ascii_whitespace() => Some((TokenKind::OpenTag, 6)),
                _ => None,
            };
        }
        if rest.starts_with(b"<?=") {
            return Some((TokenKind::OpenTagWithEcho, 3));
        }
        None
    }

    fn lex_inline(&mut self) -> Token {
        let start = self.cursor;
        if start >= self.end {
            return self.eof_token();
        }

        if let Some((kind, len)) = self.open_tag_at(start) {
            self.advance_n(len);
            self.state = LexerState::Scripting;
            return Token {
                kind,
                span: Span::new(start, self.cursor),
            };
        }

        let mut pos = start;
        loop {
            match memchr(b'<', &self.input[pos..self.end]) {
                Some(off) => {
                    let at = pos + off;
                    if at > start && self.open_tag_at(at).is_some() {
                        self.cursor = at;
                        break;
                    }
                    pos = at + 1;
                }
                None => {
                    self.cursor = self.end;
                    break;
                }
            }
        }

        Token {
            kind: TokenKind::InlineHtml,
            span: Span::new(start, self.cursor),
        }
    }

    fn lex_scripting(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.cursor;
        let Some(c) = self.peek() else {
            return self.eof_token();
        };

        let kind = match c {
            b'$' => {
                self.advance();
                if self.peek().is_some_and(is_ident_start) {
                    self.read_identifier();
                    TokenKind::Variable
                } else {
                    TokenKind::Dollar
                }
            }
            c if is_ident_start(c) => self.lex_word(),
            b'0'..=b'9' => self.read_number(),
            b'.' if self.peek_next().is_some_and(|n| n.is_ascii_digit()) => self.read_number(),
            b'\'' => self.lex_single_quoted(),
            b'"' => {
                self.advance();
                if self.scan_interpolated_until(b'"', 0) {
                    TokenKind::DoubleQuotedString
                } else {
                    self.cursor = self.end;
                    TokenKind::Error(LexError::UnterminatedString)
                }
            }
            b'`' => {
                self.advance();
                TokenKind::Backtick
            }
            b'#' => {
                if self.peek_next() == Some(b'[') {
                    self.advance_n(2);
                    TokenKind::Attribute
                } else {
                    self.advance();
                    self.consume_single_line_comment()
                }
            }
            b'/' if self.peek_next() == Some(b'/') => {
                self.advance_n(2);
                self.consume_single_line_comment()
            }
            b'/' if self.peek_next() == Some(b'*') => {
                self.advance_n(2);
                self.consume_multi_line_comment()
            }
            b'?' if self.peek_next() == Some(b'>') => {
                self.advance_n(2);
                match self.peek() {
                    Some(b'\n') => self.advance(),
                    Some(b'\r') => {
                        self.advance();
                        if self.peek() == Some(b'\n') {
                            self.advance();
                        }
                    }
                    _ => {}
                }
                self.state = LexerState::Initial;
                TokenKind::CloseTag
            }
            b'<' if self.rest().starts_with(b"<<<") => match self.lex_heredoc() {
                Some(kind) => kind,
                None => self.lex_operator(),
            },
            b'(' => match self.cast_at() {
                Some((kind, len)) => {
                    self.advance_n(len);
                    kind
                }
                None => {
                    self.advance();
                    TokenKind::OpenParen
                }
            },
            _ => self.lex_operator(),
        };

        match kind {
            TokenKind::Error(LexError::UnexpectedCharacter) => {}
            TokenKind::Error(_) => self.state = LexerState::Finished,
            TokenKind::HaltCompiler => self.halt_pending = true,
            TokenKind::SemiColon | TokenKind::CloseTag if self.halt_pending => {
                self.state = LexerState::Finished;
            }
            _ => {}
        }

        Token {
            kind,
            span: Span::new(start, self.cursor),
        }
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.cursor;
        self.read_identifier();
        let kind = keyword_lookup(&self.input[start..self.cursor]);

        if kind == TokenKind::Yield {
            let mut p = self.cursor;
            while self.byte_at(p).is_some_and(|b| b.is_ascii_whitespace()) {
                p += 1;
            }
            if p > self.cursor {
                let candidate = self.input.get(p..(p + 4).min(self.end)).unwrap_or_default();
                if candidate.eq_ignore_ascii_case(b"from")
                    && !self.byte_at(p + 4).is_some_and(is_ident_char)
                {
                    self.cursor = p + 4;
                    return TokenKind::YieldFrom;
                }
            }
        }
        kind
    }

    fn read_digits(&mut self, accept: impl Fn(u8) -> bool) {
        while let Some(c) = self.peek() {
            if accept(c) || (c == b'_' && self.peek_next().is_some_and(&accept)) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> TokenKind {
        if self.peek() == Some(b'0') {
            match self.peek_next() {
                Some(b'x' | b'X') => {
                    self.advance_n(2);
                    self.read_digits(|c| c.is_ascii_hexdigit());
                    return TokenKind::LNumber;
                }
                Some(b'b' | b'B') => {
                    self.advance_n(2);
                    self.read_digits(|c| c == b'0' || c == b'1');
                    return TokenKind::LNumber;
                }
                Some(b'o' | b'O') => {
                    self.advance_n(2);
                    self.read_digits(|c| (b'0'..=b'7').contains(&c));
                    return TokenKind::LNumber;
                }
                _ => {}
            }
        }

        let mut is_float = false;
        self.read_digits(|c| c.is_ascii_digit());
        if self.peek() == Some(b'.') {
            is_float = true;
            self.advance();
            self.read_digits(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let after = self.peek_next();
            let digit_at = match after {
                Some(b'+' | b'-') => self.byte_at(self.cursor + 2),
                other => other,
            };
            if digit_at.is_some_and(|d| d.is_ascii_digit()) {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.advance();
                }
                self.read_digits(|c| c.is_ascii_digit());
            }
        }

        if is_float {
            TokenKind::DNumber
        } else {
            TokenKind::LNumber
        }
    }

    fn lex_single_quoted(&mut self) -> TokenKind {
        self.advance();
        loop {
            match memchr2(b'\'', b'\\', self.rest()) {
                None => {
                    self.cursor = self.end;
                    return TokenKind::Error(LexError::UnterminatedString);
                }
                Some(off) => {
                    self.cursor += off;
                    if self.input[self.cursor] == b'\\' {
                        self.advance_n(2);
                    } else {
                        self.advance();
                        return TokenKind::ConstantString;
                    }
                }
            }
        }
    }

    /// Advances past `terminator`, skipping escapes and embedded `{$ ... }`
    /// code blocks (which may themselves contain quoted strings).
    fn scan_interpolated_until(&mut self, terminator: u8, depth: usize) -> bool {
        if depth > MAX_INTERPOLATION_DEPTH {
            return false;
        }
        while let Some(c) = self.peek() {
            match c {
                b'\\' => self.advance_n(2),
                c if c == terminator => {
                    self.advance();
                    return true;
                }
                b'{' if self.peek_next() == Some(b'$') => {
                    if !self.skip_code_block(depth + 1) {
                        return false;
                    }
                }
                b'$' if self.peek_next() == Some(b'{') => {
                    self.advance();
                    if !self.skip_code_block(depth + 1) {
                        return false;
                    }
                }
                _ => self.advance(),
            }
        }
        false
    }

    fn skip_code_block(&mut self, depth: usize) -> bool {
        let mut braces = 0usize;
        while let Some(c) = self.peek() {
            match c {
                b'{' => {
                    braces += 1;
                    self.advance();
                }
                b'}' => {
                    self.advance();
                    braces = braces.saturating_sub(1);
                    if braces == 0 {
                        return true;
                    }
                }
                b'\'' => {
                    if let TokenKind::Error(_) = self.lex_single_quoted() {
                        return false;
                    }
                }
                b'"' => {
                    self.advance();
                    if !self.scan_interpolated_until(b'"', depth) {
                        return false;
                    }
                }
                _ => self.advance(),
            }
        }
        false
    }

    fn lex_heredoc(&mut self) -> Option<TokenKind> {
        let mut p = self.cursor + 3;
        while matches!(self.byte_at(p), Some(b' ' | b'\t')) {
            p += 1;
        }
        let quote = match self.byte_at(p) {
            Some(q @ (b'\'' | b'"')) => {
                p += 1;
                Some(q)
            }
            _ => None,
        };
        let label_start = p;
        if !self.byte_at(p).is_some_and(is_ident_start) {
            return None;
        }
        while self.byte_at(p).is_some_and(is_ident_char) {
            p += 1;
        }
        let label = &self.input[label_start..p];
        if let Some(q) = quote {
            if self.byte_at(p) != Some(q) {
                return None;
            }
            p += 1;
        }
        match self.byte_at(p) {
            Some(b'\n') => p += 1,
            Some(b'\r') => {
                p += 1;
                if self.byte_at(p) == Some(b'\n') {
                    p += 1;
                }
            }
            _ => return None,
        }

        let nowdoc = quote == Some(b'\'');
        let mut line_start = p;
        while line_start <= self.end {
            let mut q = line_start;
            while matches!(self.byte_at(q), Some(b' ' | b'\t')) {
                q += 1;
            }
            let candidate = self.input.get(q..self.end).unwrap_or_default();
            if candidate.starts_with(label) && !self.byte_at(q + label.len()).is_some_and(is_ident_char)
            {
                self.cursor = q + label.len();
                return Some(if nowdoc {
                    TokenKind::Nowdoc
                } else {
                    TokenKind::Heredoc
                });
            }
            match memchr(b'\n', self.input.get(line_start..self.end).unwrap_or_default()) {
                Some(off) => line_start += off + 1,
                None => break,
            }
        }

        self.cursor = self.end;
        Some(TokenKind::Error(LexError::UnterminatedHeredoc))
    }

    fn cast_at(&self) -> Option<(TokenKind, usize)> {
        let mut p = self.cursor + 1;
        while matches!(self.byte_at(p), Some(b' ' | b'\t')) {
            p += 1;
        }
        let word_start = p;
        while self.byte_at(p).is_some_and(|c| c.is_ascii_alphabetic()) {
            p += 1;
        }
        if p == word_start {
            return None;
        }
        let kind = cast_lookup(&self.input[word_start..p])?;
        while matches!(self.byte_at(p), Some(b' ' | b'\t')) {
            p += 1;
        }
        if self.byte_at(p) != Some(b')') {
            return None;
        }
        Some((kind, p + 1 - self.cursor))
    }

    fn consume_single_line_comment(&mut self) -> TokenKind {
        while let Some(c) = self.peek() {
            match c {
                b'\n' | b'\r' => break,
                b'?' if self.peek_next() == Some(b'>') => break,
                _ => self.advance(),
            }
        }
        TokenKind::Comment
    }

    fn consume_multi_line_comment(&mut self) -> TokenKind {
        let is_doc = self.peek() == Some(b'*') && self.peek_next() != Some(b'/');

        loop {
            match memchr(b'*', self.rest()) {
                Some(pos) => {
                    self.advance_n(pos + 1);
                    if self.peek() == Some(b'/') {
                        self.advance();
                        return if is_doc {
                            TokenKind::DocComment
                        } else {
                            TokenKind::Comment
                        };
                    }
                }
                None => {
                    self.cursor = self.end;
                    return TokenKind::Error(LexError::UnterminatedComment);
                }
            }
        }
    }

    fn lex_operator(&mut self) -> TokenKind {
        let rest = self.rest();
        for (pattern, kind) in THREE_CHAR_OPS.iter().chain(TWO_CHAR_OPS.iter()) {
            if rest.starts_with(pattern) {
                self.advance_n(pattern.len());
                return *kind;
            }
        }

        let kind = match rest.first().copied().unwrap_or(0) {
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Asterisk,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'.' => TokenKind::Dot,
            b'=' => TokenKind::Eq,
            b'<' => TokenKind::Lt,
            b'>' => TokenKind::Gt,
            b'!' => TokenKind::Bang,
            b'&' => TokenKind::Ampersand,
            b'|' => TokenKind::Pipe,
            b'^' => TokenKind::Caret,
            b'~' => TokenKind::BitNot,
            b'?' => TokenKind::Question,
            b':' => TokenKind::Colon,
            b'@' => TokenKind::At,
            b';' => TokenKind::SemiColon,
            b',' => TokenKind::Comma,
            b'(' => TokenKind::OpenParen,
            b')' => TokenKind::CloseParen,
            b'[' => TokenKind::OpenBracket,
            b']' => TokenKind::CloseBracket,
            b'{' => TokenKind::OpenBrace,
            b'}' => TokenKind::CloseBrace,
            b'\\' => TokenKind::NsSeparator,
            _ => TokenKind::Error(LexError::UnexpectedCharacter),
        };
        self.advance();
        kind
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.emitted_eof = true;
        }
        Some(token)
    }
}

/// Layout of a heredoc/nowdoc token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeredocLayout {
    /// Body bytes, excluding the newline before the closing label.
    pub body: Span,
    /// Whitespace width in front of the closing label; stripped from every body line.
    pub indent: usize,
}

pub fn heredoc_layout(source: &[u8], token: Span) -> HeredocLayout {
    let text = token.as_str(source);
    let body_start = memchr(b'\n', text)
        .map(|pos| token.start + pos + 1)
        .unwrap_or(token.end);

    // Closing label is the trailing identifier run.
    let mut label_pos = token.end;
    while label_pos > body_start && is_ident_char(source[label_pos - 1]) {
        label_pos -= 1;
    }
    let mut line_start = label_pos;
    while line_start > body_start && matches!(source[line_start - 1], b' ' | b'\t') {
        line_start -= 1;
    }
    let indent = label_pos - line_start;

    let body_end = match memrchr(b'\n', &source[body_start..line_start]) {
        Some(pos) => {
            let mut end = body_start + pos;
            if end > body_start && source[end - 1] == b'\r' {
                end -= 1;
            }
            end
        }
        None => body_start,
    };

    HeredocLayout {
        body: Span::new(body_start, body_end.max(body_start)),
        indent,
    }
}

/// Value of a numeric literal token. Integers that overflow become floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumberLiteral {
    Int(i64),
    Float(f64),
}

pub fn parse_number_literal(text: &[u8]) -> Option<NumberLiteral> {
    let digits: Vec<u8> = text.iter().copied().filter(|&b| b != b'_').collect();
    let lower = digits.to_ascii_lowercase();

    let (radix, body) = if let Some(rest) = lower.strip_prefix(b"0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix(b"0b") {
        (2, rest)
    } else if let Some(rest) = lower.strip_prefix(b"0o") {
        (8, rest)
    } else if lower.len() > 1
        && lower[0] == b'0'
        && lower.iter().all(|b| b.is_ascii_digit())
    {
        (8, &lower[1..])
    } else if lower.iter().all(|b| b.is_ascii_digit()) {
        (10, &lower[..])
    } else {
        let s = std::str::from_utf8(&lower).ok()?;
        return s.parse::<f64>().ok().map(NumberLiteral::Float);
    };

    if body.is_empty() {
        return None;
    }

    let mut value: i64 = 0;
    let mut overflow = false;
    let mut float_value = 0f64;
    for &b in body {
        let d = (b as char).to_digit(radix)? as i64;
        if !overflow {
            match value.checked_mul(radix as i64).and_then(|v| v.checked_add(d)) {
                Some(v) => value = v,
                None => {
                    overflow = true;
                    float_value = value as f64 * radix as f64 + d as f64;
                }
            }
        } else {
            float_value = float_value * radix as f64 + d as f64;
        }
    }

    Some(if overflow {
        NumberLiteral::Float(float_value)
    } else {
        NumberLiteral::Int(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &[u8]) -> Vec<TokenKind> {
        tokenize(src)
            .map(|t| t.kind)
            .filter(|k| !k.is_trivia())
            .collect()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds(b"<?php FUNCTION Class eChO"),
            vec![
                TokenKind::Function,
                TokenKind::Class,
                TokenKind::Echo,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn maximal_munch_prefers_longest_operator() {
        assert_eq!(
            kinds(b"<?php $a <=> $b <= $c << 1 <<= 2 !== ?->"),
            vec![
                TokenKind::Variable,
                TokenKind::Spaceship,
                TokenKind::Variable,
                TokenKind::LtEq,
                TokenKind::Variable,
                TokenKind::Sl,
                TokenKind::LNumber,
                TokenKind::SlEq,
                TokenKind::LNumber,
                TokenKind::BangEqEq,
                TokenKind::NullsafeArrow,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn inline_html_and_close_tag() {
        let src = b"<p>hi</p><?php echo 1 ?>\ntail";
        let tokens: Vec<Token> = tokenize(src).collect();
        assert_eq!(tokens[0].kind, TokenKind::InlineHtml);
        assert_eq!(tokens[0].text(src), b"<p>hi</p>");
        assert_eq!(tokens[1].kind, TokenKind::OpenTag);
        assert_eq!(tokens[4].kind, TokenKind::CloseTag);
        assert_eq!(tokens[5].kind, TokenKind::InlineHtml);
        assert_eq!(tokens[5].text(src), b"tail");
    }

    #[test]
    fn unterminated_string_emits_error_then_stops() {
        let toks = kinds(b"<?php $a = 'abc");
        assert_eq!(
            toks,
            vec![
                TokenKind::Variable,
                TokenKind::Eq,
                TokenKind::Error(LexError::UnterminatedString),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn invalid_utf8_passes_through_literals() {
        let src = b"<?php '\xff\xfe\xc3(' \"\x80{$a[\"k\"]}\"";
        let tokens: Vec<Token> = tokenize(src).filter(|t| !t.kind.is_trivia()).collect();
        assert_eq!(tokens[0].kind, TokenKind::ConstantString);
        assert_eq!(tokens[0].text(src), b"'\xff\xfe\xc3('");
        assert_eq!(tokens[1].kind, TokenKind::DoubleQuotedString);
        assert_eq!(tokens[1].text(src), b"\"\x80{$a[\"k\"]}\"");
    }

    #[test]
    fn heredoc_with_indented_closing_label() {
        let src = b"<?php $x = <<<EOT\n    a\n      b\n    EOT;\n";
        let tokens: Vec<Token> = tokenize(src).filter(|t| !t.kind.is_trivia()).collect();
        assert_eq!(tokens[2].kind, TokenKind::Heredoc);
        assert_eq!(tokens[3].kind, TokenKind::SemiColon);
        let layout = heredoc_layout(src, tokens[2].span);
        assert_eq!(layout.indent, 4);
        assert_eq!(layout.body.as_str(src), b"    a\n      b");
    }

    #[test]
    fn unterminated_heredoc_is_an_error() {
        let toks = kinds(b"<?php <<<EOT\nabc\n");
        assert_eq!(
            toks,
            vec![TokenKind::Error(LexError::UnterminatedHeredoc), TokenKind::Eof]
        );
    }

    #[test]
    fn casts_allow_inner_spaces() {
        assert_eq!(
            kinds(b"<?php ( int )$a (string)$b (foo)"),
            vec![
                TokenKind::IntCast,
                TokenKind::Variable,
                TokenKind::StringCast,
                TokenKind::Variable,
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::CloseParen,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn yield_from_is_one_token() {
        assert_eq!(
            kinds(b"<?php yield  from $g; yield $x;"),
            vec![
                TokenKind::YieldFrom,
                TokenKind::Variable,
                TokenKind::SemiColon,
                TokenKind::Yield,
                TokenKind::Variable,
                TokenKind::SemiColon,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn number_literals() {
        assert_eq!(parse_number_literal(b"0x1F"), Some(NumberLiteral::Int(31)));
        assert_eq!(parse_number_literal(b"0b101"), Some(NumberLiteral::Int(5)));
        assert_eq!(parse_number_literal(b"0755"), Some(NumberLiteral::Int(493)));
        assert_eq!(parse_number_literal(b"1_000"), Some(NumberLiteral::Int(1000)));
        assert_eq!(parse_number_literal(b"1.5e3"), Some(NumberLiteral::Float(1500.0)));
        assert_eq!(
            parse_number_literal(b"9223372036854775808"),
            Some(NumberLiteral::Float(9223372036854775808.0))
        );
        assert_eq!(parse_number_literal(b"089"), None);
    }

    #[test]
    fn iteration_is_finite() {
        let mut lexer = tokenize(b"<?php ;");
        assert!(lexer.by_ref().count() > 0);
        assert!(lexer.next().is_none());
    }
}
