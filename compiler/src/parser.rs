// parser.rs — Source-block splitting and expression parsing.
//
// A source file splits into blocks at blank lines. Each block is
// classified (declarations, command, include/load directive, comment-only)
// and its payload parsed with chumsky combinators over the lexer's token
// stream. Spans are rebased to file-absolute byte offsets at parse time so
// every AST region points into the whole file.
//
// Parsing is non-fatal at the file level: a malformed block becomes
// `Unparseable` and the remaining blocks still parse.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::{BinOp, FDecl, FExpr, FModule, Lit};
use crate::block::{BlockKind, Cmd, OutFormat, SourceBlock};
use crate::diag::SrcRegion;
use crate::lexer::{lex, Token};
use crate::names::Name;
use crate::pipeline::STAGE_NAMES;

// ── File splitting ───────────────────────────────────────────────────────

/// Split a file into blocks and parse each one.
pub fn parse_source(source: &str) -> Vec<SourceBlock> {
    split_blocks(source)
        .into_iter()
        .map(|(text, offset)| parse_block(&text, offset))
        .collect()
}

/// Paragraphs (maximal runs of non-blank lines) with their byte offsets.
fn split_blocks(source: &str) -> Vec<(String, usize)> {
    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;
    let mut pos = 0;
    for line in source.split_inclusive('\n') {
        let blank = line.trim().is_empty();
        match (blank, start) {
            (true, Some(s)) => {
                blocks.push((source[s..pos].to_string(), s));
                start = None;
            }
            (false, None) => start = Some(pos),
            _ => {}
        }
        pos += line.len();
    }
    if let Some(s) = start {
        blocks.push((source[s..].to_string(), s));
    }
    blocks
}

// ── Block classification ─────────────────────────────────────────────────

pub fn parse_block(text: &str, offset: usize) -> SourceBlock {
    SourceBlock {
        text: text.to_string(),
        offset,
        kind: classify(text, offset),
    }
}

fn classify(text: &str, offset: usize) -> BlockKind {
    let comment_only = text.lines().all(|l| {
        let t = l.trim();
        t.is_empty() || t.starts_with("--")
    });
    if comment_only {
        return BlockKind::Other;
    }

    let stripped = text.trim_start();
    if stripped.starts_with(':') {
        return parse_command(text, offset);
    }

    let first_word_end = stripped
        .find(|c: char| c.is_whitespace())
        .unwrap_or(stripped.len());
    match &stripped[..first_word_end] {
        "include" => return path_directive(&stripped[first_word_end..], "include"),
        "load" => return path_directive(&stripped[first_word_end..], "load"),
        _ => {}
    }

    match parse_module_text(text, offset) {
        Ok(module) => BlockKind::RunModule(module),
        Err(msg) => BlockKind::Unparseable(msg),
    }
}

fn path_directive(rest: &str, keyword: &str) -> BlockKind {
    let rest = rest.trim();
    let path = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .filter(|p| !p.contains('"'));
    match path {
        Some(p) => {
            if keyword == "include" {
                BlockKind::IncludeSourceFile(p.to_string())
            } else {
                BlockKind::LoadData(p.to_string())
            }
        }
        None => BlockKind::Unparseable(format!("expected a quoted path after '{}'", keyword)),
    }
}

fn parse_command(text: &str, offset: usize) -> BlockKind {
    let stripped = text.trim_start();

    let (cmd, after) = if let Some(rest) = strip_command(stripped, ":passes") {
        (Cmd::ShowPasses, rest)
    } else if let Some(rest) = strip_command(stripped, ":pass") {
        match split_stage_name(rest) {
            Some((stage, rest)) => (Cmd::ShowPass(stage), rest),
            None => return BlockKind::Unparseable("expected a pass name after ':pass'".into()),
        }
    } else if let Some(rest) = strip_command(stripped, ":json") {
        (Cmd::EvalExpr(OutFormat::Json), rest)
    } else if let Some(rest) = strip_command(stripped, ":time") {
        (Cmd::TimeIt, rest)
    } else if let Some(rest) = strip_command(stripped, ":t") {
        (Cmd::GetType, rest)
    } else if let Some(rest) = strip_command(stripped, ":p") {
        (Cmd::EvalExpr(OutFormat::Default), rest)
    } else {
        let word_end = stripped
            .find(|c: char| c.is_whitespace())
            .unwrap_or(stripped.len());
        return BlockKind::Unparseable(format!("unknown command: {}", &stripped[..word_end]));
    };

    // `after` is a suffix of `text`, so its file offset is recoverable.
    let after_offset = offset + (text.len() - after.len());
    match parse_expr_text(after, after_offset) {
        Ok(body) => {
            let span = body.region();
            let name = Name::source("ans");
            let module = FModule {
                decls: vec![FDecl {
                    name: name.clone(),
                    body,
                    span,
                }],
            };
            BlockKind::Command(cmd, (name, module))
        }
        Err(msg) => BlockKind::Unparseable(msg),
    }
}

/// Strip a command word; the next character must end the word.
fn strip_command<'a>(text: &'a str, cmd: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(cmd)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

/// The `:pass` argument: the longest known stage name, or one bare word.
fn split_stage_name(rest: &str) -> Option<(String, &str)> {
    let trimmed = rest.trim_start();
    let mut best: Option<&str> = None;
    for stage in STAGE_NAMES {
        if let Some(tail) = trimmed.strip_prefix(stage) {
            if tail.is_empty() || tail.starts_with(char::is_whitespace) {
                match best {
                    Some(b) if b.len() >= stage.len() => {}
                    _ => best = Some(stage),
                }
            }
        }
    }
    if let Some(stage) = best {
        return Some((stage.to_string(), &trimmed[stage.len()..]));
    }
    let word_end = trimmed.find(|c: char| c.is_whitespace())?;
    if word_end == 0 {
        return None;
    }
    Some((trimmed[..word_end].to_string(), &trimmed[word_end..]))
}

// ── Token-stream plumbing ────────────────────────────────────────────────

/// Lex a block's text and hand the token stream to the lexer-span-to-
/// chumsky-span adapter. Lex errors win over parse errors.
macro_rules! run_block_parser {
    ($text:expr, $parser:expr) => {{
        let text: &str = $text;
        let lex_result = lex(text);
        if let Some(e) = lex_result.errors.into_iter().next() {
            return Err(e.message);
        }
        let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
            let cspan: SimpleSpan = (span.start..span.stop).into();
            (tok, cspan)
        });
        let eoi: SimpleSpan = (text.len()..text.len()).into();
        let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

        let (output, errors) = $parser.parse(stream).into_output_errors();
        match output {
            Some(out) if errors.is_empty() => Ok(out),
            _ => Err(errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "parse failed".to_string())),
        }
    }};
}

fn parse_module_text(text: &str, offset: usize) -> Result<FModule, String> {
    run_block_parser!(text, module_parser(text, offset))
}

fn parse_expr_text(text: &str, offset: usize) -> Result<FExpr, String> {
    run_block_parser!(text, expr_only_parser(text, offset))
}

// ── Grammar ──────────────────────────────────────────────────────────────

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
    offset: usize,
) -> impl Parser<'tokens, I, FExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let reg = move |span: SimpleSpan| SrcRegion::new(offset + span.start(), offset + span.end());

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        (
            Name::source(&source[span.start()..span.end()]),
            reg(span),
        )
    });

    recursive(move |expr| {
        let lit = select! {
            Token::Int(n) = e => (Lit::Int(n), e.span()),
            Token::Real(x) = e => (Lit::Real(x), e.span()),
        }
        .map(move |(l, span)| FExpr::Lit(l, reg(span)));

        let var = ident.clone().map(|(n, r)| FExpr::Var(n, r));

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let base = lit.or(var).or(parens);

        // Postfix indexing binds tightest: `xs.i`, `xs.0`, `xs.(i + 1)`.
        let indexed = base.clone().foldl(
            just(Token::Dot).ignore_then(base).repeated(),
            |arr, idx| {
                let r = arr.region().merge(idx.region());
                FExpr::Idx(Box::new(arr), Box::new(idx), r)
            },
        );

        // Application by juxtaposition, left-associative.
        let app = indexed.clone().foldl(indexed.repeated(), |f, x| {
            let r = f.region().merge(x.region());
            FExpr::App(Box::new(f), Box::new(x), r)
        });

        let sum = just(Token::Sum)
            .map_with(move |_, e| reg(e.span()))
            .then(app.clone())
            .map(|(r0, xs)| {
                let r = r0.merge(xs.region());
                FExpr::Sum(Box::new(xs), r)
            });

        let operand = sum.or(app);

        let mul_op = select! {
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
        };
        let product = operand
            .clone()
            .foldl(mul_op.then(operand).repeated(), |l, (op, r)| {
                let span = l.region().merge(r.region());
                FExpr::BinOp(op, Box::new(l), Box::new(r), span)
            });

        let add_op = select! {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
        };
        let arith = product
            .clone()
            .foldl(add_op.then(product).repeated(), |l, (op, r)| {
                let span = l.region().merge(r.region());
                FExpr::BinOp(op, Box::new(l), Box::new(r), span)
            });

        let lam = just(Token::Lambda)
            .map_with(move |_, e| reg(e.span()))
            .then(ident.clone())
            .then_ignore(just(Token::Dot))
            .then(expr.clone())
            .map(|((r0, (param, _)), body)| {
                let r = r0.merge(body.region());
                FExpr::Lam(param, Box::new(body), r)
            });

        let size = select! {
            Token::Int(n) if n > 0 => n as usize,
        };

        let for_expr = just(Token::For)
            .map_with(move |_, e| reg(e.span()))
            .then(ident.clone())
            .then_ignore(just(Token::Colon))
            .then(size)
            .then_ignore(just(Token::Dot))
            .then(expr)
            .map(|(((r0, (idx, _)), n), body)| {
                let r = r0.merge(body.region());
                FExpr::For(idx, n, Box::new(body), r)
            });

        lam.or(for_expr).or(arith)
    })
}

fn expr_only_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
    offset: usize,
) -> impl Parser<'tokens, I, FExpr, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();
    nl.clone()
        .ignore_then(expr_parser(source, offset))
        .then_ignore(nl)
}

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
    offset: usize,
) -> impl Parser<'tokens, I, FModule, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        (
            Name::source(&source[span.start()..span.end()]),
            SrcRegion::new(offset + span.start(), offset + span.end()),
        )
    });

    let decl = ident
        .then_ignore(just(Token::Equals))
        .then(expr_parser(source, offset))
        .map(|((name, name_region), body)| {
            let span = name_region.merge(body.region());
            FDecl { name, body, span }
        });

    let nl = just(Token::Newline).repeated().ignored();
    nl.clone()
        .ignore_then(
            decl.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map(|decls| FModule { decls })
}

// ── Tests ────────────────────────────────────────────────────────────────
