use php_core::compiler::emitter::Emitter;
use php_core::parser::lexer::token::{LexError, Token, TokenCategory, TokenKind};
use php_core::parser::lexer::tokenize;
use php_core::runtime::context::{EngineBuilder, RequestContext};
use php_core::vm::engine::{CapturingOutputWriter, VM};
use std::cell::RefCell;
use std::rc::Rc;

const SAMPLE: &[u8] = b"<html><?php
// comment
setup();
$greeting = \"Hello {$user['name']}!\";
$n = 0x1F + 1_000 * 2.5e-3;
echo <<<TXT
    body $n
    TXT;
/** doc */
function f(int ...$xs): ?int { return $xs[0] ?? null; }
?>
tail";

fn gaps_are_whitespace(src: &[u8], tokens: &[Token]) {
    let mut cursor = 0;
    for token in tokens {
        assert!(token.span.start >= cursor, "overlap at {:?}", token);
        assert!(token.span.end <= src.len());
        let gap = &src[cursor..token.span.start];
        assert!(
            gap.iter().all(u8::is_ascii_whitespace),
            "non-whitespace gap {:?} before {:?}",
            String::from_utf8_lossy(gap),
            token.kind
        );
        cursor = token.span.end;
    }
}

#[test]
fn tokens_cover_the_source_in_order() {
    let tokens: Vec<Token> = tokenize(SAMPLE).collect();
    assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    assert_eq!(tokens.iter().filter(|t| t.kind == TokenKind::Eof).count(), 1);
    gaps_are_whitespace(SAMPLE, &tokens);

    assert_eq!(tokens[0].kind, TokenKind::InlineHtml);
    assert_eq!(tokens[0].text(SAMPLE), b"<html>");
    assert_eq!(tokens.last().map(|t| t.span.start), Some(SAMPLE.len()));
    assert!(tokens.iter().any(|t| t.kind == TokenKind::Heredoc));
    assert!(tokens.iter().any(|t| t.kind == TokenKind::DocComment));
    assert!(!tokens.iter().any(|t| t.kind.category() == TokenCategory::Error));
}

#[test]
fn positions_are_one_based() {
    let tokens: Vec<Token> = tokenize(SAMPLE).collect();
    let function = tokens
        .iter()
        .find(|t| t.kind == TokenKind::Function)
        .copied();
    let function = function.unwrap_or_else(|| panic!("no function token"));
    assert_eq!(function.position(SAMPLE), (10, 1));
    assert_eq!(function.line(SAMPLE), 10);
}

#[test]
fn invalid_utf8_survives_lexing_and_execution() {
    let src = b"<?php echo '\xff\xfe', \"-\\x41\xc3\";";
    let literal = tokenize(src)
        .find(|t| t.kind == TokenKind::ConstantString)
        .map(|t| t.text(src).to_vec());
    assert_eq!(literal, Some(b"'\xff\xfe'".to_vec()));

    let arena = bumpalo::Bump::new();
    let program = php_core::parse(src, &arena).unwrap();
    let engine = EngineBuilder::new().with_core_extensions().build().unwrap();
    let mut context = RequestContext::new(engine);
    let chunk = Emitter::new(src, &mut context.interner)
        .compile(&program)
        .unwrap();
    let out = Rc::new(RefCell::new(Vec::new()));
    let sink = out.clone();
    let mut vm = VM::new_with_context(context);
    vm.set_output_writer(Box::new(CapturingOutputWriter::new(move |bytes: &[u8]| {
        sink.borrow_mut().extend_from_slice(bytes);
    })));
    vm.run(Rc::new(chunk)).unwrap();
    vm.flush_output().unwrap();
    assert_eq!(out.borrow().as_slice(), b"\xff\xfe-A\xc3");
}

#[test]
fn unterminated_constructs_end_with_one_error() {
    for (src, expected) in [
        (&b"<?php $a = 'abc"[..], LexError::UnterminatedString),
        (&b"<?php /* never closed"[..], LexError::UnterminatedComment),
        (&b"<?php <<<EOT\nbody\n"[..], LexError::UnterminatedHeredoc),
    ] {
        let kinds: Vec<TokenKind> = tokenize(src).map(|t| t.kind).collect();
        let errors: Vec<&TokenKind> = kinds
            .iter()
            .filter(|k| matches!(k, TokenKind::Error(_)))
            .collect();
        assert_eq!(errors, vec![&TokenKind::Error(expected)], "{:?}", kinds);
        assert_eq!(kinds.last(), Some(&TokenKind::Eof));
    }
}

#[test]
fn tokens_serialize_for_tooling() {
    let src = b"<?php $x;";
    let tokens: Vec<Token> = tokenize(src).collect();
    let json = serde_json::to_value(&tokens).unwrap();
    assert_eq!(json.as_array().map(Vec::len), Some(tokens.len()));
    assert_eq!(json[1]["kind"], "Variable");
    assert_eq!(serde_json::to_value(TokenCategory::Variable).unwrap(), "Variable");
}
