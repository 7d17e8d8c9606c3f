use super::{PResult, Parser};
use crate::parser::ast::{Expr, ExprId, Ident, MemberName};
use crate::parser::lexer::{
    Lexer, heredoc_layout, is_ident_char, is_ident_start, token::TokenKind,
};
use crate::parser::span::Span;

/// Escapes of a single-quoted literal: only `\\` and `\'`.
pub(crate) fn unescape_single(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' && matches!(raw.get(i + 1), Some(b'\\' | b'\'')) {
            out.push(raw[i + 1]);
            i += 2;
        } else {
            out.push(raw[i]);
            i += 1;
        }
    }
    out
}

/// Escapes of a double-quoted or heredoc literal. `\"` is only an escape
/// inside double quotes.
pub(crate) fn unescape_double(raw: &[u8], heredoc: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let c = raw[i];
        if c != b'\\' || i + 1 >= raw.len() {
            out.push(c);
            i += 1;
            continue;
        }
        let next = raw[i + 1];
        i += 2;
        match next {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'v' => out.push(0x0b),
            b'e' => out.push(0x1b),
            b'f' => out.push(0x0c),
            b'\\' => out.push(b'\\'),
            b'$' => out.push(b'$'),
            b'"' if !heredoc => out.push(b'"'),
            b'0'..=b'7' => {
                let mut value = u32::from(next - b'0');
                let mut taken = 1;
                while taken < 3 && matches!(raw.get(i), Some(b'0'..=b'7')) {
                    value = value * 8 + u32::from(raw[i] - b'0');
                    i += 1;
                    taken += 1;
                }
                out.push((value & 0xff) as u8);
            }
            b'x' if raw.get(i).is_some_and(u8::is_ascii_hexdigit) => {
                let mut value = 0u32;
                let mut taken = 0;
                while taken < 2 {
                    match raw.get(i).and_then(|b| (*b as char).to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            i += 1;
                            taken += 1;
                        }
                        None => break,
                    }
                }
                out.push(value as u8);
            }
            b'u' if raw.get(i) == Some(&b'{') => {
                let close = raw[i..].iter().position(|&b| b == b'}').map(|p| i + p);
                let decoded = close.and_then(|close| {
                    let hex = std::str::from_utf8(&raw[i + 1..close]).ok()?;
                    let cp = u32::from_str_radix(hex, 16).ok()?;
                    char::from_u32(cp).map(|ch| (ch, close))
                });
                match decoded {
                    Some((ch, close)) => {
                        let mut buf = [0u8; 4];
                        out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        i = close + 1;
                    }
                    None => {
                        out.push(b'\\');
                        out.push(b'u');
                    }
                }
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    out
}

/// Canonical decimal integer text, as accepted for `$a[12]` offsets.
fn canonical_int(text: &[u8]) -> Option<i64> {
    let digits = text.strip_prefix(b"-").unwrap_or(text);
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') || text == b"-0" {
        return None;
    }
    std::str::from_utf8(text).ok()?.parse().ok()
}

struct Segment {
    raw: Vec<u8>,
    start: usize,
}

impl<'src, 'ast> Parser<'src, 'ast> {
    pub(super) fn parse_double_quoted(&mut self, token: Span) -> PResult<ExprId<'ast>> {
        let start = token.start + 1;
        let end = token.end.saturating_sub(1).max(start);
        self.parse_interpolated(Span::new(start, end), token, 0, false)
    }

    pub(super) fn parse_heredoc(&mut self, token: Span) -> PResult<ExprId<'ast>> {
        let layout = heredoc_layout(self.source, token);
        self.parse_interpolated(layout.body, token, layout.indent, true)
    }

    pub(super) fn parse_nowdoc(&mut self, token: Span) -> PResult<ExprId<'ast>> {
        let layout = heredoc_layout(self.source, token);
        let body = layout.body.as_str(self.source);
        let mut value = Vec::with_capacity(body.len());
        let mut at_line_start = true;
        let mut skipped = 0;
        for &b in body {
            if at_line_start && skipped < layout.indent && matches!(b, b' ' | b'\t') {
                skipped += 1;
                continue;
            }
            at_line_start = b == b'\n';
            skipped = 0;
            value.push(b);
        }
        Ok(self.arena.alloc(Expr::String {
            value: self.arena.alloc_slice_copy(&value),
            span: token,
        }))
    }

    fn flush_segment(
        &self,
        segment: &mut Option<Segment>,
        end: usize,
        heredoc: bool,
        parts: &mut Vec<ExprId<'ast>>,
    ) {
        if let Some(seg) = segment.take() {
            let value = unescape_double(&seg.raw, heredoc);
            parts.push(self.arena.alloc(Expr::String {
                value: self.arena.alloc_slice_copy(&value),
                span: Span::new(seg.start, end),
            }));
        }
    }

    fn parse_interpolated(
        &mut self,
        body: Span,
        whole: Span,
        indent: usize,
        heredoc: bool,
    ) -> PResult<ExprId<'ast>> {
        let src = self.source;
        let end = body.end;
        let mut parts: Vec<ExprId<'ast>> = Vec::new();
        let mut segment: Option<Segment> = None;
        let mut interpolated = false;
        let mut i = body.start;

        while i < end {
            if indent > 0 && (i == body.start || src[i - 1] == b'\n') {
                let mut skipped = 0;
                while skipped < indent && i < end && matches!(src[i], b' ' | b'\t') {
                    i += 1;
                    skipped += 1;
                }
                if i >= end {
                    break;
                }
            }

            let c = src[i];
            let next = src.get(i + 1).copied().filter(|_| i + 1 < end);
            match (c, next) {
                (b'\\', Some(escaped)) => {
                    let seg = segment.get_or_insert_with(|| Segment { raw: Vec::new(), start: i });
                    seg.raw.push(b'\\');
                    seg.raw.push(escaped);
                    i += 2;
                }
                (b'$', Some(n)) if is_ident_start(n) => {
                    self.flush_segment(&mut segment, i, heredoc, &mut parts);
                    interpolated = true;
                    let (expr, after) = self.parse_simple_interpolation(i, end)?;
                    parts.push(expr);
                    i = after;
                }
                (b'{', Some(b'$')) => {
                    self.flush_segment(&mut segment, i, heredoc, &mut parts);
                    interpolated = true;
                    let close = self.find_closing_brace(i + 1, end)?;
                    parts.push(self.parse_embedded_expr(i + 1, close)?);
                    i = close + 1;
                }
                (b'$', Some(b'{')) => {
                    self.flush_segment(&mut segment, i, heredoc, &mut parts);
                    interpolated = true;
                    let close = self.find_closing_brace(i + 2, end)?;
                    parts.push(self.parse_dollar_brace(i, close)?);
                    i = close + 1;
                }
                _ => {
                    let seg = segment.get_or_insert_with(|| Segment { raw: Vec::new(), start: i });
                    seg.raw.push(c);
                    i += 1;
                }
            }
        }
        self.flush_segment(&mut segment, end, heredoc, &mut parts);

        if !interpolated {
            let value = match parts.first() {
                Some(Expr::String { value, .. }) => *value,
                _ => &[],
            };
            return Ok(self.arena.alloc(Expr::String { value, span: whole }));
        }
        Ok(self.arena.alloc(Expr::Interpolated {
            parts: self.arena.alloc_slice_copy(&parts),
            span: whole,
        }))
    }

    /// `$name`, `$name[offset]` or `$name->prop` starting at `start`.
    fn parse_simple_interpolation(
        &mut self,
        start: usize,
        end: usize,
    ) -> PResult<(ExprId<'ast>, usize)> {
        let src = self.source;
        let mut i = start + 1;
        while i < end && is_ident_char(src[i]) {
            i += 1;
        }
        let var: ExprId<'ast> = self.arena.alloc(Expr::Variable {
            name: self.arena.alloc_slice_copy(&src[start + 1..i]),
            span: Span::new(start, i),
        });

        if i < end && src[i] == b'[' {
            let key_start = i + 1;
            let mut j = key_start;
            let variable_key =
                j + 1 < end && src[j] == b'$' && is_ident_start(src[j + 1]);
            let key: ExprId<'ast> = if variable_key {
                j += 1;
                while j < end && is_ident_char(src[j]) {
                    j += 1;
                }
                self.arena.alloc(Expr::Variable {
                    name: self.arena.alloc_slice_copy(&src[key_start + 1..j]),
                    span: Span::new(key_start, j),
                })
            } else if j < end && (src[j].is_ascii_digit() || src[j] == b'-') {
                j += 1;
                while j < end && src[j].is_ascii_digit() {
                    j += 1;
                }
                let text = &src[key_start..j];
                let span = Span::new(key_start, j);
                match canonical_int(text) {
                    Some(value) => self.arena.alloc(Expr::Int { value, span }),
                    None => self.arena.alloc(Expr::String {
                        value: self.arena.alloc_slice_copy(text),
                        span,
                    }),
                }
            } else if j < end && is_ident_start(src[j]) {
                while j < end && is_ident_char(src[j]) {
                    j += 1;
                }
                self.arena.alloc(Expr::String {
                    value: self.arena.alloc_slice_copy(&src[key_start..j]),
                    span: Span::new(key_start, j),
                })
            } else {
                return Err(self.error_at(
                    Span::new(key_start, (key_start + 1).min(end)),
                    "syntax error, unexpected string offset, expecting identifier or variable or number",
                ));
            };
            if j >= end || src[j] != b']' {
                return Err(self.error_at(
                    Span::new(j, (j + 1).min(end.max(j))),
                    "syntax error, unexpected string content, expecting \"]\"",
                ));
            }
            let dim = self.arena.alloc(Expr::ArrayDim {
                array: var,
                dim: Some(key),
                span: Span::new(start, j + 1),
            });
            return Ok((dim, j + 1));
        }

        if i + 2 < end && &src[i..i + 2] == b"->" && is_ident_start(src[i + 2]) {
            let name_start = i + 2;
            let mut j = name_start;
            while j < end && is_ident_char(src[j]) {
                j += 1;
            }
            let name = Ident {
                name: self.arena.alloc_slice_copy(&src[name_start..j]),
                span: Span::new(name_start, j),
            };
            let prop = self.arena.alloc(Expr::Property {
                target: var,
                name: MemberName::Ident(name),
                nullsafe: false,
                span: Span::new(start, j),
            });
            return Ok((prop, j));
        }

        Ok((var, i))
    }

    /// Offset of the `}` closing a code block whose contents start at `from`.
    fn find_closing_brace(&self, from: usize, end: usize) -> PResult<usize> {
        let mut lexer = Lexer::new_scripting(self.source, from, end);
        let mut depth = 0usize;
        loop {
            let token = lexer.next_token();
            match token.kind {
                TokenKind::OpenBrace => depth += 1,
                TokenKind::CloseBrace if depth == 0 => return Ok(token.span.start),
                TokenKind::CloseBrace => depth -= 1,
                TokenKind::Error(err) => return Err(self.error_at(token.span, err.message())),
                TokenKind::Eof => {
                    return Err(self.error_at(
                        Span::new(from.saturating_sub(1), from),
                        "syntax error, unexpected end of string, expecting \"}\"",
                    ));
                }
                _ => {}
            }
        }
    }

    /// A full expression embedded in a string, over `source[start..end]`.
    fn parse_embedded_expr(&mut self, start: usize, end: usize) -> PResult<ExprId<'ast>> {
        let mut sub = Parser::new(Lexer::new_scripting(self.source, start, end), self.arena);
        sub.depth = self.depth;
        sub.function_stack = std::mem::take(&mut self.function_stack);
        let result = sub.parse_expr().and_then(|expr| {
            if sub.at(TokenKind::Eof) {
                Ok(expr)
            } else {
                Err(sub.unexpected_expecting("\"}\""))
            }
        });
        self.function_stack = std::mem::take(&mut sub.function_stack);
        result
    }

    /// `${name}`, `${name[expr]}` or `${expr}` between `start` (the `$`) and `close`.
    fn parse_dollar_brace(&mut self, start: usize, close: usize) -> PResult<ExprId<'ast>> {
        let src = self.source;
        let inner = start + 2;
        let mut j = inner;
        if j < close && is_ident_start(src[j]) {
            while j < close && is_ident_char(src[j]) {
                j += 1;
            }
            if j == close || src[j] == b'[' {
                let var: ExprId<'ast> = self.arena.alloc(Expr::Variable {
                    name: self.arena.alloc_slice_copy(&src[inner..j]),
                    span: Span::new(start, close + 1),
                });
                if j == close {
                    return Ok(var);
                }
                let dim_end = close.saturating_sub(1);
                if src[dim_end] != b']' {
                    return Err(self.error_at(
                        Span::new(j, close),
                        "syntax error, unexpected token, expecting \"]\"",
                    ));
                }
                let dim = self.parse_embedded_expr(j + 1, dim_end)?;
                return Ok(self.arena.alloc(Expr::ArrayDim {
                    array: var,
                    dim: Some(dim),
                    span: Span::new(start, close + 1),
                }));
            }
        }
        let expr = self.parse_embedded_expr(inner, close)?;
        Ok(self.arena.alloc(Expr::VariableVariable {
            expr,
            span: Span::new(start, close + 1),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_quoted_escapes() {
        assert_eq!(
            unescape_double(br#"a\n\t\\\$\"\x41\101\u{1F600}"#, false),
            "a\n\t\\$\"AA\u{1F600}".as_bytes()
        );
        assert_eq!(unescape_double(br"\q\u{zz}", false), br"\q\u{zz}");
    }

    #[test]
    fn heredoc_keeps_escaped_quote() {
        assert_eq!(unescape_double(br#"\""#, true), br#"\""#);
    }

    #[test]
    fn single_quoted_escapes() {
        assert_eq!(unescape_single(br"it\'s \\ \n"), br"it's \ \n");
    }

    #[test]
    fn numeric_offsets() {
        assert_eq!(canonical_int(b"12"), Some(12));
        assert_eq!(canonical_int(b"-3"), Some(-3));
        assert_eq!(canonical_int(b"01"), None);
        assert_eq!(canonical_int(b"-0"), None);
    }
}
