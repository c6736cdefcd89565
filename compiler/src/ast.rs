// ast.rs — Front-end IR for Dex source blocks.
//
// `FModule` is the representation handed to the pipeline: a list of
// top-level declarations over expressions. Every node carries a
// file-absolute `SrcRegion` for error reporting in downstream passes.
// The same type is both the parser's output and the deshadow pass's
// output (post-deshadow, all binders carry fresh qualified names).

use std::fmt;

use crate::diag::SrcRegion;
use crate::names::Name;

// ── Literals and operators ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lit {
    Int(i64),
    Real(f64),
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lit::Int(n) => write!(f, "{}", n),
            Lit::Real(x) => write!(f, "{:?}", x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        };
        write!(f, "{}", s)
    }
}

// ── Expressions ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum FExpr {
    Lit(Lit, SrcRegion),
    Var(Name, SrcRegion),
    /// `\x. body`
    Lam(Name, Box<FExpr>, SrcRegion),
    /// Application by juxtaposition, left-associative.
    App(Box<FExpr>, Box<FExpr>, SrcRegion),
    BinOp(BinOp, Box<FExpr>, Box<FExpr>, SrcRegion),
    /// `for i:n. body` — table over the index set `Fin n`.
    For(Name, usize, Box<FExpr>, SrcRegion),
    /// `xs.i`
    Idx(Box<FExpr>, Box<FExpr>, SrcRegion),
    /// `sum xs`
    Sum(Box<FExpr>, SrcRegion),
}

impl FExpr {
    pub fn region(&self) -> SrcRegion {
        match self {
            FExpr::Lit(_, r)
            | FExpr::Var(_, r)
            | FExpr::Lam(_, _, r)
            | FExpr::App(_, _, r)
            | FExpr::BinOp(_, _, _, r)
            | FExpr::For(_, _, _, r)
            | FExpr::Idx(_, _, r)
            | FExpr::Sum(_, r) => *r,
        }
    }
}

impl fmt::Display for FExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FExpr::Lit(l, _) => write!(f, "{}", l),
            FExpr::Var(n, _) => write!(f, "{}", n),
            FExpr::Lam(x, body, _) => write!(f, "(\\{}. {})", x, body),
            FExpr::App(g, x, _) => write!(f, "({} {})", g, x),
            FExpr::BinOp(op, l, r, _) => write!(f, "({} {} {})", l, op, r),
            FExpr::For(i, n, body, _) => write!(f, "(for {}:{}. {})", i, n, body),
            FExpr::Idx(xs, i, _) => write!(f, "{}.{}", xs, i),
            FExpr::Sum(xs, _) => write!(f, "(sum {})", xs),
        }
    }
}

// ── Declarations and modules ─────────────────────────────────────────────

/// A top-level declaration `name = expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct FDecl {
    pub name: Name,
    pub body: FExpr,
    pub span: SrcRegion,
}

/// A block's worth of declarations, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FModule {
    pub decls: Vec<FDecl>,
}

impl FModule {
    pub fn empty() -> Self {
        Self::default()
    }
}

impl fmt::Display for FModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            writeln!(f, "{} = {}", decl.name, decl.body)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r() -> SrcRegion {
        SrcRegion::new(0, 1)
    }

    #[test]
    fn display_is_fully_parenthesized() {
        let e = FExpr::BinOp(
            BinOp::Add,
            Box::new(FExpr::Lit(Lit::Int(1), r())),
            Box::new(FExpr::BinOp(
                BinOp::Mul,
                Box::new(FExpr::Lit(Lit::Int(2), r())),
                Box::new(FExpr::Var(Name::source("x"), r())),
                r(),
            )),
            r(),
        );
        assert_eq!(e.to_string(), "(1 + (2 * x))");
    }

    #[test]
    fn real_literals_keep_a_decimal_point() {
        assert_eq!(Lit::Real(2.0).to_string(), "2.0");
        assert_eq!(Lit::Real(2.5).to_string(), "2.5");
    }

    #[test]
    fn module_display_one_decl_per_line() {
        let m = FModule {
            decls: vec![FDecl {
                name: Name::source("x"),
                body: FExpr::Lit(Lit::Int(3), r()),
                span: r(),
            }],
        };
        assert_eq!(m.to_string(), "x = 3\n");
    }
}
