// normalize.rs — ANF conversion.
//
// Rewrites each declaration body into a chain of `Let`s whose right-hand
// sides have atomic operands, ending in an atom. Every intermediate is
// named with a fresh `%tmp` binder; lambda and loop bodies are normalized
// recursively. The `%` stem prefix cannot be written in source, so fresh
// temporaries never collide with deshadowed user names.

use crate::diag::Err;
use crate::names::FreshScope;
use crate::pass::{PassCtx, TopPassCtx};
use crate::tir::{Atom, Binder, Expr, Module, TopDecl};

pub fn normalize(ctx: &mut TopPassCtx<'_, ()>, m: Module) -> Result<Module, Err> {
    ctx.lift_pass((), FreshScope::new(), |p| {
        let mut decls = Vec::with_capacity(m.decls.len());
        for decl in m.decls {
            let body = norm_expr(p, decl.body)?;
            decls.push(TopDecl {
                binder: decl.binder,
                body,
                span: decl.span,
            });
        }
        Ok(Module { decls })
    })
}

type Norm<'a> = PassCtx<'a, (), ()>;

/// Normalize one body to a full ANF chain ending in an atom.
fn norm_expr(p: &mut Norm, e: Expr) -> Result<Expr, Err> {
    let mut binds = Vec::new();
    let atom = norm(p, e, &mut binds)?;
    Ok(unwind(binds, Expr::Atom(atom)))
}

fn unwind(binds: Vec<(Binder, Expr)>, tail: Expr) -> Expr {
    binds
        .into_iter()
        .rev()
        .fold(tail, |acc, (b, rhs)| Expr::Let(b, Box::new(rhs), Box::new(acc)))
}

/// Flatten `e`, pushing intermediate bindings onto `binds`, and return the
/// atom the expression reduces to.
fn norm(p: &mut Norm, e: Expr, binds: &mut Vec<(Binder, Expr)>) -> Result<Atom, Err> {
    match e {
        Expr::Atom(Atom::Lam(b, body)) => {
            let body = norm_expr(p, *body)?;
            Ok(Atom::Lam(b, Box::new(body)))
        }
        Expr::Atom(a) => Ok(a),
        Expr::Let(b, bound, body) => {
            let bound_atom = norm(p, *bound, binds)?;
            binds.push((b, Expr::Atom(bound_atom)));
            norm(p, *body, binds)
        }
        Expr::App(f, x, ty) => {
            let f = norm(p, *f, binds)?;
            let x = norm(p, *x, binds)?;
            name_it(
                p,
                Expr::App(Box::new(Expr::Atom(f)), Box::new(Expr::Atom(x)), ty),
                binds,
            )
        }
        Expr::Op(op, l, r, ty) => {
            let l = norm(p, *l, binds)?;
            let r = norm(p, *r, binds)?;
            name_it(
                p,
                Expr::Op(op, Box::new(Expr::Atom(l)), Box::new(Expr::Atom(r)), ty),
                binds,
            )
        }
        Expr::Idx(xs, i, ty) => {
            let xs = norm(p, *xs, binds)?;
            let i = norm(p, *i, binds)?;
            name_it(
                p,
                Expr::Idx(Box::new(Expr::Atom(xs)), Box::new(Expr::Atom(i)), ty),
                binds,
            )
        }
        Expr::Sum(xs, ty) => {
            let xs = norm(p, *xs, binds)?;
            name_it(p, Expr::Sum(Box::new(Expr::Atom(xs)), ty), binds)
        }
        Expr::For(b, n, body, ty) => {
            let body = norm_expr(p, *body)?;
            name_it(p, Expr::For(b, n, Box::new(body), ty), binds)
        }
    }
}

/// Bind a simple expression to a fresh temporary and return its atom.
fn name_it(p: &mut Norm, e: Expr, binds: &mut Vec<(Binder, Expr)>) -> Result<Atom, Err> {
    let binder = Binder::new(p.fresh("%tmp"), e.ty());
    binds.push((binder.clone(), e));
    Ok(Atom::Var(binder))
}
