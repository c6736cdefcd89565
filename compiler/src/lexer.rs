// lexer.rs — Lexer for Dex source blocks.
//
// Uses the `logos` crate for DFA-based lexing. Spans are byte offsets
// relative to the lexed text; the parser rebases them to file-absolute
// offsets. Lexing is non-fatal: unrecognized characters are collected as
// errors and lexing continues.

use logos::Logos;
use std::fmt;

use crate::diag::SrcRegion;

/// A lexer error with location (relative to the lexed text).
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: SrcRegion,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, SrcRegion)>,
    pub errors: Vec<LexError>,
}

/// Dex token types.
///
/// Keywords and symbols are matched as fixed strings; literals carry parsed
/// values. Identifiers carry no value — the span retrieves the text.
/// `--` starts a line comment.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t]+|--[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("for")]
    For,
    #[token("sum")]
    Sum,

    // ── Symbols ──
    #[token("\\")]
    Lambda,
    #[token(".")]
    Dot,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,

    // ── Literals ──
    //
    // The real regex must appear before the integer regex so the longer
    // match (digits, point, digits) wins over a bare integer prefix.
    /// Real literal (e.g. `2.5`, `1.0e-3`). Requires digits on both sides
    /// of the point, so `xs.1` still lexes as an index expression.
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", parse_real)]
    Real(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", parse_int)]
    Int(i64),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_']*` (primes allowed).
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_']*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (significant — declaration terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::For => write!(f, "for"),
            Token::Sum => write!(f, "sum"),
            Token::Lambda => write!(f, "\\"),
            Token::Dot => write!(f, "."),
            Token::Colon => write!(f, ":"),
            Token::Equals => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Real(x) => write!(f, "{:?}", x),
            Token::Int(n) => write!(f, "{}", n),
            Token::Ident => write!(f, "<ident>"),
            Token::Newline => write!(f, "<newline>"),
        }
    }
}

// ── Callbacks ──

fn parse_real(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a Dex source string into tokens.
///
/// Returns all successfully lexed tokens together with any errors for
/// unrecognized characters. Lexing continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = SrcRegion::new(range.start, range.end);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[range]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_vs_idents() {
        // `forx` and `summary` are identifiers, not keyword prefixes.
        let tokens = lex_ok("for forx sum summary");
        assert_eq!(
            tokens,
            vec![Token::For, Token::Ident, Token::Sum, Token::Ident]
        );
    }

    #[test]
    fn integer_literal() {
        assert_eq!(lex_ok("42"), vec![Token::Int(42)]);
    }

    #[test]
    fn real_literal() {
        assert_eq!(lex_ok("2.5"), vec![Token::Real(2.5)]);
        assert_eq!(lex_ok("1.0e-3"), vec![Token::Real(0.001)]);
    }

    #[test]
    fn index_dot_is_not_a_real() {
        // `xs.1` must lex as ident, dot, int — not ident followed by a real.
        let tokens = lex_ok("xs.1");
        assert_eq!(tokens, vec![Token::Ident, Token::Dot, Token::Int(1)]);
    }

    #[test]
    fn lambda_and_application() {
        let tokens = lex_ok("\\x. f x");
        assert_eq!(
            tokens,
            vec![
                Token::Lambda,
                Token::Ident,
                Token::Dot,
                Token::Ident,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn for_loop_tokens() {
        let tokens = lex_ok("for i:8. i + 1");
        assert_eq!(
            tokens,
            vec![
                Token::For,
                Token::Ident,
                Token::Colon,
                Token::Int(8),
                Token::Dot,
                Token::Ident,
                Token::Plus,
                Token::Int(1),
            ]
        );
    }

    #[test]
    fn comment_skipped() {
        let tokens = lex_ok("x -- the answer\ny");
        assert_eq!(tokens, vec![Token::Ident, Token::Newline, Token::Ident]);
    }

    #[test]
    fn minus_vs_comment() {
        let tokens = lex_ok("a - b");
        assert_eq!(tokens, vec![Token::Ident, Token::Minus, Token::Ident]);
    }

    #[test]
    fn multiple_newlines_collapse() {
        let tokens = lex_ok("a\n\n\nb");
        assert_eq!(tokens, vec![Token::Ident, Token::Newline, Token::Ident]);
    }

    #[test]
    fn spans_are_byte_offsets() {
        let result = lex("ab = 1");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens[0].1, SrcRegion::new(0, 2));
        assert_eq!(result.tokens[1].1, SrcRegion::new(3, 4));
        assert_eq!(result.tokens[2].1, SrcRegion::new(5, 6));
    }

    #[test]
    fn error_recovery() {
        let result = lex("x ~ y");
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, SrcRegion::new(2, 3));
    }

    #[test]
    fn primes_in_identifiers() {
        assert_eq!(lex_ok("x'"), vec![Token::Ident]);
    }
}
