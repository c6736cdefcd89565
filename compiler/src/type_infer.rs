// type_infer.rs — Type inference.
//
// Walks a deshadowed front module and produces the typed core `Module`.
// Inference is monomorphic unification with an occurs check. Numeric
// requirements (arithmetic operands, sum elements) are collected during
// the walk and verified after solving; types still unconstrained after
// solving default to Int. Table types must be structurally known at index
// and reduce sites.
//
// Failure modes: unification mismatch, occurs-check failure, non-numeric
// operands, unknown table types — all `TypeErr` at the offending site.

use std::collections::HashMap;

use crate::ast::{FExpr, FModule};
use crate::diag::{Err, ErrKind, SrcRegion};
use crate::env::TyEnv;
use crate::names::{FreshScope, Name};
use crate::pass::{PassCtx, TopPassCtx};
use crate::tir::{Atom, Binder, Expr, Module, TopDecl, Ty};

pub fn type_infer(ctx: &mut TopPassCtx<'_, TyEnv>, m: FModule) -> Result<Module, Err> {
    let module = ctx.lift_pass(Infer::default(), FreshScope::new(), |p| infer_module(p, m))?;

    let mut delta = TyEnv::new();
    for decl in &module.decls {
        delta.insert(decl.binder.name.clone(), decl.binder.ty.clone());
    }
    ctx.put_env(delta);
    Ok(module)
}

// ── Inference state ──────────────────────────────────────────────────────

#[derive(Default)]
struct Infer {
    subst: HashMap<u32, Ty>,
    next_var: u32,
    /// Types that must resolve to Int or Real, with the site to blame.
    numeric: Vec<(Ty, SrcRegion)>,
}

impl Infer {
    fn fresh_var(&mut self) -> Ty {
        let v = self.next_var;
        self.next_var += 1;
        Ty::Var(v)
    }

    /// Follow substitution links at the top level only.
    fn resolve(&self, ty: &Ty) -> Ty {
        let mut t = ty.clone();
        while let Ty::Var(v) = t {
            match self.subst.get(&v) {
                Some(next) => t = next.clone(),
                None => break,
            }
        }
        t
    }

    /// Deep substitution; unconstrained variables default to Int.
    fn zonk(&self, ty: &Ty) -> Ty {
        match self.resolve(ty) {
            Ty::Int => Ty::Int,
            Ty::Real => Ty::Real,
            Ty::Tab(n, elem) => Ty::Tab(n, Box::new(self.zonk(&elem))),
            Ty::Fn(a, b) => Ty::Fn(Box::new(self.zonk(&a)), Box::new(self.zonk(&b))),
            Ty::Var(_) => Ty::Int,
        }
    }

    fn occurs(&self, v: u32, ty: &Ty) -> bool {
        match self.resolve(ty) {
            Ty::Var(w) => w == v,
            Ty::Tab(_, elem) => self.occurs(v, &elem),
            Ty::Fn(a, b) => self.occurs(v, &a) || self.occurs(v, &b),
            Ty::Int | Ty::Real => false,
        }
    }

    fn unify(&mut self, a: &Ty, b: &Ty, site: SrcRegion) -> Result<(), Err> {
        let a = self.resolve(a);
        let b = self.resolve(b);
        match (a, b) {
            (Ty::Int, Ty::Int) | (Ty::Real, Ty::Real) => Ok(()),
            (Ty::Var(v), t) | (t, Ty::Var(v)) => {
                if let Ty::Var(w) = t {
                    if w == v {
                        return Ok(());
                    }
                }
                if self.occurs(v, &t) {
                    return Err(Err::new(
                        ErrKind::TypeErr,
                        format!("infinite type: ?{} occurs in {}", v, t),
                    )
                    .with_region(site));
                }
                self.subst.insert(v, t);
                Ok(())
            }
            (Ty::Tab(n1, e1), Ty::Tab(n2, e2)) => {
                if n1 != n2 {
                    return Err(Err::new(
                        ErrKind::TypeErr,
                        format!("table sizes differ: {} vs {}", n1, n2),
                    )
                    .with_region(site));
                }
                self.unify(&e1, &e2, site)
            }
            (Ty::Fn(a1, b1), Ty::Fn(a2, b2)) => {
                self.unify(&a1, &a2, site)?;
                self.unify(&b1, &b2, site)
            }
            (t1, t2) => Err(Err::new(
                ErrKind::TypeErr,
                format!("couldn't match {} with {}", t1, t2),
            )
            .with_region(site)),
        }
    }
}

// ── Module walk ──────────────────────────────────────────────────────────

fn infer_module(p: &mut PassCtx<'_, TyEnv, Infer>, m: FModule) -> Result<Module, Err> {
    let mut local: HashMap<Name, Ty> = HashMap::new();
    let mut decls = Vec::with_capacity(m.decls.len());
    for decl in m.decls {
        let body = infer_expr(p, &mut local, decl.body)?;
        let ty = body.ty();
        local.insert(decl.name.clone(), ty.clone());
        decls.push(TopDecl {
            binder: Binder::new(decl.name, ty),
            body,
            span: decl.span,
        });
    }

    // Verify numeric requirements, then zonk the whole module.
    let numeric = std::mem::take(&mut p.state().numeric);
    for (ty, site) in numeric {
        let t = p.state().zonk(&ty);
        if !t.is_numeric() {
            return Err(Err::new(
                ErrKind::TypeErr,
                format!("expected a numeric type, got {}", t),
            )
            .with_region(site));
        }
    }
    let decls = decls
        .into_iter()
        .map(|d| zonk_decl(p.state(), d))
        .collect();
    Ok(Module { decls })
}

fn infer_expr(
    p: &mut PassCtx<'_, TyEnv, Infer>,
    local: &mut HashMap<Name, Ty>,
    e: FExpr,
) -> Result<Expr, Err> {
    match e {
        FExpr::Lit(l, _) => Ok(Expr::Atom(Atom::Lit(l))),
        FExpr::Var(name, r) => {
            let ty = if let Some(t) = local.get(&name) {
                t.clone()
            } else if let Some(t) = p.read_env().lookup(&name) {
                t.clone()
            } else {
                // deshadow guarantees scoping; a miss here is an internal bug
                return Err(Err::compiler(format!(
                    "deshadowed variable {} has no type",
                    name
                ))
                .with_region(r));
            };
            Ok(Expr::Atom(Atom::Var(Binder::new(name, ty))))
        }
        FExpr::Lam(param, body, _) => {
            let param_ty = p.state().fresh_var();
            local.insert(param.clone(), param_ty.clone());
            let body = infer_expr(p, local, *body)?;
            Ok(Expr::Atom(Atom::Lam(
                Binder::new(param, param_ty),
                Box::new(body),
            )))
        }
        FExpr::App(f, x, r) => {
            let f = infer_expr(p, local, *f)?;
            let x = infer_expr(p, local, *x)?;
            let out_ty = p.state().fresh_var();
            let want = Ty::Fn(Box::new(x.ty()), Box::new(out_ty.clone()));
            p.state().unify(&f.ty(), &want, r)?;
            Ok(Expr::App(Box::new(f), Box::new(x), out_ty))
        }
        FExpr::BinOp(op, l, rhs, r) => {
            let l = infer_expr(p, local, *l)?;
            let rhs = infer_expr(p, local, *rhs)?;
            let l_ty = l.ty();
            p.state().unify(&l_ty, &rhs.ty(), r)?;
            p.state().numeric.push((l_ty.clone(), r));
            Ok(Expr::Op(op, Box::new(l), Box::new(rhs), l_ty))
        }
        FExpr::For(idx, n, body, _) => {
            local.insert(idx.clone(), Ty::Int);
            let body = infer_expr(p, local, *body)?;
            let elem = body.ty();
            Ok(Expr::For(
                Binder::new(idx, Ty::Int),
                n,
                Box::new(body),
                Ty::Tab(n, Box::new(elem)),
            ))
        }
        FExpr::Idx(xs, i, r) => {
            let xs = infer_expr(p, local, *xs)?;
            let i = infer_expr(p, local, *i)?;
            p.state().unify(&i.ty(), &Ty::Int, r)?;
            match p.state().resolve(&xs.ty()) {
                Ty::Tab(_, elem) => Ok(Expr::Idx(Box::new(xs), Box::new(i), *elem)),
                Ty::Var(_) => Err(Err::new(
                    ErrKind::TypeErr,
                    "can't infer the type of this table expression",
                )
                .with_region(r)),
                other => Err(Err::new(
                    ErrKind::TypeErr,
                    format!("expected a table, got {}", other),
                )
                .with_region(r)),
            }
        }
        FExpr::Sum(xs, r) => {
            let xs = infer_expr(p, local, *xs)?;
            match p.state().resolve(&xs.ty()) {
                Ty::Tab(_, elem) => {
                    p.state().numeric.push(((*elem).clone(), r));
                    Ok(Expr::Sum(Box::new(xs), *elem))
                }
                Ty::Var(_) => Err(Err::new(
                    ErrKind::TypeErr,
                    "can't infer the type of this table expression",
                )
                .with_region(r)),
                other => Err(Err::new(
                    ErrKind::TypeErr,
                    format!("expected a table, got {}", other),
                )
                .with_region(r)),
            }
        }
    }
}

// ── Zonking ──────────────────────────────────────────────────────────────

fn zonk_decl(inf: &Infer, d: TopDecl) -> TopDecl {
    TopDecl {
        binder: zonk_binder(inf, d.binder),
        body: zonk_expr(inf, d.body),
        span: d.span,
    }
}

fn zonk_binder(inf: &Infer, b: Binder) -> Binder {
    Binder::new(b.name, inf.zonk(&b.ty))
}

fn zonk_atom(inf: &Infer, a: Atom) -> Atom {
    match a {
        Atom::Var(b) => Atom::Var(zonk_binder(inf, b)),
        Atom::Lit(l) => Atom::Lit(l),
        Atom::Lam(b, body) => Atom::Lam(zonk_binder(inf, b), Box::new(zonk_expr(inf, *body))),
    }
}

fn zonk_expr(inf: &Infer, e: Expr) -> Expr {
    match e {
        Expr::Atom(a) => Expr::Atom(zonk_atom(inf, a)),
        Expr::Let(b, bound, body) => Expr::Let(
            zonk_binder(inf, b),
            Box::new(zonk_expr(inf, *bound)),
            Box::new(zonk_expr(inf, *body)),
        ),
        Expr::App(f, x, ty) => Expr::App(
            Box::new(zonk_expr(inf, *f)),
            Box::new(zonk_expr(inf, *x)),
            inf.zonk(&ty),
        ),
        Expr::Op(op, l, r, ty) => Expr::Op(
            op,
            Box::new(zonk_expr(inf, *l)),
            Box::new(zonk_expr(inf, *r)),
            inf.zonk(&ty),
        ),
        Expr::Idx(xs, i, ty) => Expr::Idx(
            Box::new(zonk_expr(inf, *xs)),
            Box::new(zonk_expr(inf, *i)),
            inf.zonk(&ty),
        ),
        Expr::Sum(xs, ty) => Expr::Sum(Box::new(zonk_expr(inf, *xs)), inf.zonk(&ty)),
        Expr::For(b, n, body, ty) => Expr::For(
            zonk_binder(inf, b),
            n,
            Box::new(zonk_expr(inf, *body)),
            inf.zonk(&ty),
        ),
    }
}
