// simplify.rs — Atom substitution, inlining, and constant folding.
//
// Consumes ANF and produces ANF with no lambdas left in module bodies:
//
// - known atoms from the ambient simplification environment are substituted
//   at their use sites (literals propagate, functions become inlinable);
// - every application is β-reduced, α-renaming the inlined body's binders
//   with fresh `%i` names so repeated inlining never duplicates a binder;
// - literal scalar arithmetic folds, except division by a literal zero,
//   which is left for the runtime to report;
// - lets whose right-hand side reduces to an atom disappear through
//   substitution.
//
// A function-valued top binding moves into the environment delta as an
// atom and leaves the module; bindings it captures are promoted to
// module-level values so the atom stays well-scoped.

use std::collections::HashMap;

use crate::ast::{BinOp, Lit};
use crate::diag::{Err, ErrKind};
use crate::env::SimpEnv;
use crate::names::{FreshScope, Name};
use crate::pass::{PassCtx, TopPassCtx};
use crate::tir::{Atom, Binder, Expr, Module, TopDecl, Ty};

pub fn simplify(ctx: &mut TopPassCtx<'_, SimpEnv>, m: Module) -> Result<Module, Err> {
    let (module, entries) = ctx.lift_pass((), FreshScope::new(), |p| simp_module(p, m))?;
    let mut delta = SimpEnv::new();
    for (name, atom) in entries {
        delta.insert(name, atom);
    }
    ctx.put_env(delta);
    Ok(module)
}

type Simp<'a> = PassCtx<'a, SimpEnv, ()>;
type Subst = HashMap<Name, Atom>;

fn simp_module(p: &mut Simp, m: Module) -> Result<(Module, Vec<(Name, Atom)>), Err> {
    let mut subst = Subst::new();
    let mut entries = Vec::new();
    let mut decls = Vec::new();

    for decl in m.decls {
        let mut residual = Vec::new();
        let result = simp_chain(p, &mut subst, decl.body, &mut residual)?;

        if matches!(decl.binder.ty, Ty::Fn(_, _)) {
            // Promote captured bindings so the stored atom stays scoped.
            for (b, ex) in residual {
                subst.insert(b.name.clone(), Atom::Var(b.clone()));
                entries.push((b.name.clone(), Atom::Var(b.clone())));
                decls.push(TopDecl {
                    binder: b,
                    body: ex,
                    span: decl.span,
                });
            }
            match result {
                atom @ Atom::Lam(..) => {
                    subst.insert(decl.binder.name.clone(), atom.clone());
                    entries.push((decl.binder.name.clone(), atom));
                }
                other => {
                    return Err(Err::compiler(format!(
                        "function binding {} simplified to non-lambda {}",
                        decl.binder.name, other
                    )))
                }
            }
        } else {
            let body = unwind(residual, Expr::Atom(result.clone()));
            let entry = match result {
                Atom::Lit(l) => Atom::Lit(l),
                _ => Atom::Var(decl.binder.clone()),
            };
            subst.insert(decl.binder.name.clone(), entry.clone());
            entries.push((decl.binder.name.clone(), entry));
            decls.push(TopDecl {
                binder: decl.binder,
                body,
                span: decl.span,
            });
        }
    }
    Ok((Module { decls }, entries))
}

fn unwind(binds: Vec<(Binder, Expr)>, tail: Expr) -> Expr {
    binds
        .into_iter()
        .rev()
        .fold(tail, |acc, (b, rhs)| Expr::Let(b, Box::new(rhs), Box::new(acc)))
}

/// Simplify an ANF chain, pushing surviving bindings onto `out`, returning
/// the atom the chain reduces to.
fn simp_chain(
    p: &mut Simp,
    subst: &mut Subst,
    e: Expr,
    out: &mut Vec<(Binder, Expr)>,
) -> Result<Atom, Err> {
    match e {
        Expr::Atom(a) => simp_atom(p, subst, a),
        Expr::Let(b, bound, body) => {
            match simp_simple(p, subst, *bound, out)? {
                Simple::Done(atom) => {
                    subst.insert(b.name.clone(), atom);
                }
                Simple::Residual(ex) => {
                    out.push((b, ex));
                }
            }
            simp_chain(p, subst, *body, out)
        }
        other => Err(Err::compiler(format!(
            "non-ANF expression reached simplify: {}",
            other
        ))),
    }
}

enum Simple {
    /// Reduced all the way to an atom; the let disappears.
    Done(Atom),
    /// Survives as a runtime computation.
    Residual(Expr),
}

fn simp_simple(
    p: &mut Simp,
    subst: &mut Subst,
    e: Expr,
    out: &mut Vec<(Binder, Expr)>,
) -> Result<Simple, Err> {
    match e {
        Expr::Atom(a) => Ok(Simple::Done(simp_atom(p, subst, a)?)),
        Expr::Op(op, l, r, ty) => {
            let l = simp_operand(p, subst, *l)?;
            let r = simp_operand(p, subst, *r)?;
            if let (Atom::Lit(a), Atom::Lit(b)) = (&l, &r) {
                if let Some(folded) = fold_op(op, *a, *b) {
                    return Ok(Simple::Done(Atom::Lit(folded)));
                }
            }
            Ok(Simple::Residual(Expr::Op(
                op,
                Box::new(Expr::Atom(l)),
                Box::new(Expr::Atom(r)),
                ty,
            )))
        }
        Expr::Idx(xs, i, ty) => {
            let xs = simp_operand(p, subst, *xs)?;
            let i = simp_operand(p, subst, *i)?;
            Ok(Simple::Residual(Expr::Idx(
                Box::new(Expr::Atom(xs)),
                Box::new(Expr::Atom(i)),
                ty,
            )))
        }
        Expr::Sum(xs, ty) => {
            let xs = simp_operand(p, subst, *xs)?;
            Ok(Simple::Residual(Expr::Sum(Box::new(Expr::Atom(xs)), ty)))
        }
        Expr::For(b, n, body, ty) => {
            let body = simp_body(p, subst, *body)?;
            Ok(Simple::Residual(Expr::For(b, n, Box::new(body), ty)))
        }
        Expr::App(f, x, _ty) => {
            let f = simp_operand(p, subst, *f)?;
            let x = simp_operand(p, subst, *x)?;
            match f {
                Atom::Lam(param, body) => {
                    let body = freshen(p, &param.name, x, *body);
                    Ok(Simple::Done(simp_chain(p, subst, body, out)?))
                }
                _ => Err(Err::new(
                    ErrKind::NotImplementedErr,
                    "application target is not a known function; \
                     first-class function values are not supported",
                )),
            }
        }
        Expr::Let(..) => Err(Err::compiler("nested let in simple position")),
    }
}

fn simp_body(p: &mut Simp, subst: &mut Subst, e: Expr) -> Result<Expr, Err> {
    let mut inner = Vec::new();
    let atom = simp_chain(p, subst, e, &mut inner)?;
    Ok(unwind(inner, Expr::Atom(atom)))
}

fn simp_operand(p: &mut Simp, subst: &mut Subst, e: Expr) -> Result<Atom, Err> {
    match e {
        Expr::Atom(a) => simp_atom(p, subst, a),
        other => Err(Err::compiler(format!("non-atomic operand: {}", other))),
    }
}

fn simp_atom(p: &mut Simp, subst: &Subst, a: Atom) -> Result<Atom, Err> {
    match a {
        Atom::Var(b) => {
            if let Some(atom) = subst.get(&b.name) {
                Ok(atom.clone())
            } else if let Some(atom) = p.read_env().lookup(&b.name) {
                Ok(atom.clone())
            } else {
                // local binder of a surviving computation
                Ok(Atom::Var(b))
            }
        }
        Atom::Lit(l) => Ok(Atom::Lit(l)),
        // Lambda bodies are simplified when they are inlined.
        Atom::Lam(b, body) => Ok(Atom::Lam(b, body)),
    }
}

// ── Inlining ─────────────────────────────────────────────────────────────

/// Substitute `param := arg` and α-rename every binder in `body` with
/// fresh `%i` names. The body may have been built by another block's
/// normalize run, so its binder names must never be trusted to be unique
/// in this module.
fn freshen(p: &mut Simp, param: &Name, arg: Atom, body: Expr) -> Expr {
    let mut map = Subst::new();
    map.insert(param.clone(), arg);
    rename_expr(p, &mut map, body)
}

fn rename_expr(p: &mut Simp, map: &mut Subst, e: Expr) -> Expr {
    match e {
        Expr::Atom(a) => Expr::Atom(rename_atom(p, map, a)),
        Expr::Let(b, bound, body) => {
            let bound = rename_expr(p, map, *bound);
            let fresh = Binder::new(p.fresh("%i"), b.ty.clone());
            map.insert(b.name, Atom::Var(fresh.clone()));
            Expr::Let(fresh, Box::new(bound), Box::new(rename_expr(p, map, *body)))
        }
        Expr::App(f, x, ty) => Expr::App(
            Box::new(rename_expr(p, map, *f)),
            Box::new(rename_expr(p, map, *x)),
            ty,
        ),
        Expr::Op(op, l, r, ty) => Expr::Op(
            op,
            Box::new(rename_expr(p, map, *l)),
            Box::new(rename_expr(p, map, *r)),
            ty,
        ),
        Expr::Idx(xs, i, ty) => Expr::Idx(
            Box::new(rename_expr(p, map, *xs)),
            Box::new(rename_expr(p, map, *i)),
            ty,
        ),
        Expr::Sum(xs, ty) => Expr::Sum(Box::new(rename_expr(p, map, *xs)), ty),
        Expr::For(b, n, body, ty) => {
            let fresh = Binder::new(p.fresh("%i"), b.ty.clone());
            map.insert(b.name, Atom::Var(fresh.clone()));
            Expr::For(fresh, n, Box::new(rename_expr(p, map, *body)), ty)
        }
    }
}

fn rename_atom(p: &mut Simp, map: &mut Subst, a: Atom) -> Atom {
    match a {
        Atom::Var(b) => match map.get(&b.name) {
            Some(atom) => atom.clone(),
            None => Atom::Var(b),
        },
        Atom::Lit(l) => Atom::Lit(l),
        Atom::Lam(b, body) => {
            let fresh = Binder::new(p.fresh("%i"), b.ty.clone());
            map.insert(b.name, Atom::Var(fresh.clone()));
            Atom::Lam(fresh, Box::new(rename_expr(p, map, *body)))
        }
    }
}

// ── Folding ──────────────────────────────────────────────────────────────

/// Fold literal arithmetic. Integer overflow and division by zero return
/// `None`: the computation survives to the runtime, which reports it.
fn fold_op(op: BinOp, l: Lit, r: Lit) -> Option<Lit> {
    match (l, r) {
        (Lit::Int(a), Lit::Int(b)) => {
            let v = match op {
                BinOp::Add => a.checked_add(b)?,
                BinOp::Sub => a.checked_sub(b)?,
                BinOp::Mul => a.checked_mul(b)?,
                BinOp::Div => {
                    if b == 0 {
                        return None;
                    }
                    a.checked_div(b)?
                }
            };
            Some(Lit::Int(v))
        }
        (Lit::Real(a), Lit::Real(b)) => {
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
            };
            Some(Lit::Real(v))
        }
        _ => None,
    }
}
