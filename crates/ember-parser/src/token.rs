//! Token stream produced by the lexer.

use logos::Logos;

/// A lexical token, tagged with the source line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
}

/// Logos-driven token classification.
///
/// Trimmed to the keyword/operator set the grammar actually uses — no
/// template literals, JSX, decorators, or static type annotations.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")]
pub enum TokenKind {
    #[token("\n")]
    Newline,

    #[regex(r"//[^\n]*", logos::skip)]
    LineComment,

    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("in")]
    In,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("return")]
    Return,
    #[token("sync")]
    Sync,
    #[token("defer")]
    Defer,
    #[token("spawn")]
    Spawn,
    #[token("await")]
    Await,
    #[token("trap")]
    Trap,
    #[token("panic")]
    Panic,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok(), priority = 3)]
    Float(f64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""([^"\\]|\\.)*""#, |lex| unescape(lex.slice()))]
    Str(String),

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("==")]
    EqEq,
    #[token("!=")]
    BangEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Eq,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
}

fn unescape(raw: &str) -> Option<String> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                '"' => out.push('"'),
                '\\' => out.push('\\'),
                other => out.push(other),
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Run the lexer over `source`, tagging each token with its 1-based source
/// line. Lines are tracked by counting skipped/emitted newlines rather than
/// relying on logos' byte span, since the grammar treats `\n` itself as
/// insignificant outside of error reporting.
pub fn lex(source: &str) -> Result<Vec<Token>, String> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1u32;
    while let Some(result) = lexer.next() {
        let kind = result.map_err(|_| format!("unrecognized token at line {line}: {:?}", lexer.slice()))?;
        if matches!(kind, TokenKind::Newline) {
            line += 1;
            continue;
        }
        tokens.push(Token { kind, line });
    }
    Ok(tokens)
}
