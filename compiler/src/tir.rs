// tir.rs — Typed core IR.
//
// `Module` is the core representation produced by type inference and
// rewritten in place by normalize and simplify. After normalization every
// body is a chain of `Let`s whose right-hand sides have atomic operands
// (ANF); simplification preserves that form and removes lambdas.
//
// `check_module` verifies internal consistency: binder/use type agreement,
// operator typing, and the absence of unsolved inference variables. Checker
// failures are compiler bugs, never user errors.

use std::collections::HashMap;
use std::fmt;

use crate::ast::{BinOp, Lit};
use crate::diag::{Err, SrcRegion};
use crate::names::Name;

// ── Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ty {
    Int,
    Real,
    /// `n=>a` — table over the index set `Fin n`.
    Tab(usize, Box<Ty>),
    /// `a -> b`
    Fn(Box<Ty>, Box<Ty>),
    /// Unification variable; must not survive inference.
    Var(u32),
}

impl Ty {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Ty::Int | Ty::Real)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int => write!(f, "Int"),
            Ty::Real => write!(f, "Real"),
            Ty::Tab(n, elem) => write!(f, "{}=>{}", n, elem),
            Ty::Fn(a, b) => write!(f, "({} -> {})", a, b),
            Ty::Var(v) => write!(f, "?{}", v),
        }
    }
}

// ── Binders, atoms, expressions ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Binder {
    pub name: Name,
    pub ty: Ty,
}

impl Binder {
    pub fn new(name: Name, ty: Ty) -> Self {
        Self { name, ty }
    }
}

impl fmt::Display for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.ty)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Var(Binder),
    Lit(Lit),
    Lam(Binder, Box<Expr>),
}

impl Atom {
    pub fn ty(&self) -> Ty {
        match self {
            Atom::Var(b) => b.ty.clone(),
            Atom::Lit(Lit::Int(_)) => Ty::Int,
            Atom::Lit(Lit::Real(_)) => Ty::Real,
            Atom::Lam(b, body) => Ty::Fn(Box::new(b.ty.clone()), Box::new(body.ty())),
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Var(b) => write!(f, "{}", b.name),
            Atom::Lit(l) => write!(f, "{}", l),
            Atom::Lam(b, body) => write!(f, "(\\{}. {})", b, body),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Atom(Atom),
    /// `let b = e1 in e2` — introduced by normalization.
    Let(Binder, Box<Expr>, Box<Expr>),
    App(Box<Expr>, Box<Expr>, Ty),
    Op(BinOp, Box<Expr>, Box<Expr>, Ty),
    Idx(Box<Expr>, Box<Expr>, Ty),
    Sum(Box<Expr>, Ty),
    For(Binder, usize, Box<Expr>, Ty),
}

impl Expr {
    pub fn ty(&self) -> Ty {
        match self {
            Expr::Atom(a) => a.ty(),
            Expr::Let(_, _, body) => body.ty(),
            Expr::App(_, _, t)
            | Expr::Op(_, _, _, t)
            | Expr::Idx(_, _, t)
            | Expr::Sum(_, t) => t.clone(),
            Expr::For(_, n, body, _) => Ty::Tab(*n, Box::new(body.ty())),
        }
    }

}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Atom(a) => write!(f, "{}", a),
            Expr::Let(b, e1, e2) => write!(f, "(let {} = {} in {})", b, e1, e2),
            Expr::App(g, x, _) => write!(f, "({} {})", g, x),
            Expr::Op(op, l, r, _) => write!(f, "({} {} {})", l, op, r),
            Expr::Idx(xs, i, _) => write!(f, "{}.{}", xs, i),
            Expr::Sum(xs, _) => write!(f, "(sum {})", xs),
            Expr::For(b, n, body, _) => write!(f, "(for {}:{}. {})", b, n, body),
        }
    }
}

// ── Modules ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct TopDecl {
    pub binder: Binder,
    pub body: Expr,
    pub span: SrcRegion,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub decls: Vec<TopDecl>,
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for decl in &self.decls {
            writeln!(f, "{} = {}", decl.binder, decl.body)?;
        }
        Ok(())
    }
}

// ── Checker ──────────────────────────────────────────────────────────────

/// Verify binder/use agreement, operator typing, and the absence of
/// unsolved type variables. Variables not bound in the module are globals;
/// their annotated types are trusted (the session environment established
/// them in an earlier block).
pub fn check_module(m: &Module) -> Result<(), Err> {
    let mut scope: HashMap<Name, Ty> = HashMap::new();
    for decl in &m.decls {
        no_ty_var(&decl.binder.ty)?;
        let ty = check_expr(&decl.body, &mut scope)?;
        if ty != decl.binder.ty {
            return Err(Err::compiler(format!(
                "binding {} annotated {} but body has type {}",
                decl.binder.name, decl.binder.ty, ty
            )));
        }
        scope.insert(decl.binder.name.clone(), decl.binder.ty.clone());
    }
    Ok(())
}

fn no_ty_var(ty: &Ty) -> Result<(), Err> {
    match ty {
        Ty::Int | Ty::Real => Ok(()),
        Ty::Tab(_, elem) => no_ty_var(elem),
        Ty::Fn(a, b) => {
            no_ty_var(a)?;
            no_ty_var(b)
        }
        Ty::Var(v) => Err(Err::compiler(format!(
            "unsolved inference variable ?{} escaped inference",
            v
        ))),
    }
}

fn check_atom(a: &Atom, scope: &mut HashMap<Name, Ty>) -> Result<Ty, Err> {
    match a {
        Atom::Var(b) => {
            no_ty_var(&b.ty)?;
            if let Some(expected) = scope.get(&b.name) {
                if *expected != b.ty {
                    return Err(Err::compiler(format!(
                        "occurrence of {} has type {} but its binder has type {}",
                        b.name, b.ty, expected
                    )));
                }
            }
            Ok(b.ty.clone())
        }
        Atom::Lit(Lit::Int(_)) => Ok(Ty::Int),
        Atom::Lit(Lit::Real(_)) => Ok(Ty::Real),
        Atom::Lam(b, body) => {
            no_ty_var(&b.ty)?;
            scope.insert(b.name.clone(), b.ty.clone());
            let body_ty = check_expr(body, scope)?;
            Ok(Ty::Fn(Box::new(b.ty.clone()), Box::new(body_ty)))
        }
    }
}

fn check_expr(e: &Expr, scope: &mut HashMap<Name, Ty>) -> Result<Ty, Err> {
    match e {
        Expr::Atom(a) => check_atom(a, scope),
        Expr::Let(b, bound, body) => {
            no_ty_var(&b.ty)?;
            let bound_ty = check_expr(bound, scope)?;
            if bound_ty != b.ty {
                return Err(Err::compiler(format!(
                    "let-binding {} annotated {} but bound expression has type {}",
                    b.name, b.ty, bound_ty
                )));
            }
            scope.insert(b.name.clone(), b.ty.clone());
            check_expr(body, scope)
        }
        Expr::App(g, x, ty) => {
            let f_ty = check_expr(g, scope)?;
            let x_ty = check_expr(x, scope)?;
            match f_ty {
                Ty::Fn(a, b) => {
                    if *a != x_ty {
                        return Err(Err::compiler(format!(
                            "application expects argument of type {} but got {}",
                            a, x_ty
                        )));
                    }
                    if *b != *ty {
                        return Err(Err::compiler(format!(
                            "application annotated {} but function returns {}",
                            ty, b
                        )));
                    }
                    Ok(*b)
                }
                other => Err(Err::compiler(format!(
                    "application target has non-function type {}",
                    other
                ))),
            }
        }
        Expr::Op(op, l, r, ty) => {
            let l_ty = check_expr(l, scope)?;
            let r_ty = check_expr(r, scope)?;
            if l_ty != r_ty || l_ty != *ty {
                return Err(Err::compiler(format!(
                    "operator {} with operand types {} and {}, annotated {}",
                    op, l_ty, r_ty, ty
                )));
            }
            if !ty.is_numeric() {
                return Err(Err::compiler(format!(
                    "operator {} at non-numeric type {}",
                    op, ty
                )));
            }
            Ok(l_ty)
        }
        Expr::Idx(xs, i, ty) => {
            let xs_ty = check_expr(xs, scope)?;
            let i_ty = check_expr(i, scope)?;
            if i_ty != Ty::Int {
                return Err(Err::compiler(format!("index has type {}, wanted Int", i_ty)));
            }
            match xs_ty {
                Ty::Tab(_, elem) => {
                    if *elem != *ty {
                        return Err(Err::compiler(format!(
                            "index annotated {} but table element type is {}",
                            ty, elem
                        )));
                    }
                    Ok(*elem)
                }
                other => Err(Err::compiler(format!(
                    "indexing a non-table of type {}",
                    other
                ))),
            }
        }
        Expr::Sum(xs, ty) => {
            let xs_ty = check_expr(xs, scope)?;
            match xs_ty {
                Ty::Tab(_, elem) if elem.is_numeric() && *elem == *ty => Ok(*elem),
                other => Err(Err::compiler(format!(
                    "sum over {} annotated {}",
                    other, ty
                ))),
            }
        }
        Expr::For(b, n, body, ty) => {
            if b.ty != Ty::Int {
                return Err(Err::compiler(format!(
                    "for-index {} has type {}, wanted Int",
                    b.name, b.ty
                )));
            }
            scope.insert(b.name.clone(), b.ty.clone());
            let body_ty = check_expr(body, scope)?;
            match ty {
                Ty::Tab(m, elem) if *m == *n && **elem == body_ty => {
                    Ok(Ty::Tab(*n, Box::new(body_ty)))
                }
                other => Err(Err::compiler(format!(
                    "for of size {} with body type {} annotated {}",
                    n, body_ty, other
                ))),
            }
        }
    }
}
