//! Lexer tests: token classification, line tracking, and rejection of
//! unrecognised input.

use ember_parser::{lex, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    lex(source)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn keywords_lex_as_their_own_kinds() {
    assert_eq!(
        kinds("fn let var if else while for in"),
        vec![
            TokenKind::Fn,
            TokenKind::Let,
            TokenKind::Var,
            TokenKind::If,
            TokenKind::Else,
            TokenKind::While,
            TokenKind::For,
            TokenKind::In,
        ]
    );
}

#[test]
fn concurrency_keywords_lex_as_their_own_kinds() {
    assert_eq!(
        kinds("sync defer spawn await trap panic"),
        vec![
            TokenKind::Sync,
            TokenKind::Defer,
            TokenKind::Spawn,
            TokenKind::Await,
            TokenKind::Trap,
            TokenKind::Panic,
        ]
    );
}

#[test]
fn identifiers_are_not_confused_with_keyword_prefixes() {
    assert_eq!(
        kinds("lettuce fnord spawned"),
        vec![
            TokenKind::Ident("lettuce".into()),
            TokenKind::Ident("fnord".into()),
            TokenKind::Ident("spawned".into()),
        ]
    );
}

#[test]
fn numbers_split_into_int_and_float() {
    assert_eq!(
        kinds("42 0 3.25"),
        vec![
            TokenKind::Int(42),
            TokenKind::Int(0),
            TokenKind::Float(3.25),
        ]
    );
}

#[test]
fn strings_unescape_their_contents() {
    assert_eq!(
        kinds(r#""plain" "a\nb" "say \"hi\"""#),
        vec![
            TokenKind::Str("plain".into()),
            TokenKind::Str("a\nb".into()),
            TokenKind::Str("say \"hi\"".into()),
        ]
    );
}

#[test]
fn two_character_operators_win_over_their_prefixes() {
    assert_eq!(
        kinds("== != <= >= < > ="),
        vec![
            TokenKind::EqEq,
            TokenKind::BangEq,
            TokenKind::LtEq,
            TokenKind::GtEq,
            TokenKind::Lt,
            TokenKind::Gt,
            TokenKind::Eq,
        ]
    );
}

#[test]
fn line_comments_are_skipped_entirely() {
    assert_eq!(
        kinds("1 // the rest is noise == != \n 2"),
        vec![TokenKind::Int(1), TokenKind::Int(2)]
    );
}

#[test]
fn tokens_carry_their_one_based_source_line() {
    let tokens = lex("let x = 1\nlet y = 2\n\nlet z = 3").unwrap();
    let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
    assert_eq!(lines, vec![1, 1, 1, 1, 2, 2, 2, 2, 4, 4, 4, 4]);
}

#[test]
fn unrecognised_characters_are_an_error_with_a_line_number() {
    let err = lex("let x = 1\nlet y = @").unwrap_err();
    assert!(err.contains("line 2"), "error was: {err}");
}
