// deshadow.rs — α-renaming and unbound-variable detection.
//
// Renames every binder to a fresh qualified name so no later pass ever
// sees shadowing. Free variables resolve through the ambient deshadow
// environment (source name → qualified name); unknown variables fail here
// with `UnboundVarErr` at the occurrence. The pass contributes the block's
// top-level name mappings as its environment delta.

use std::collections::HashMap;

use crate::ast::{FDecl, FExpr, FModule};
use crate::diag::{Err, ErrKind};
use crate::env::DsEnv;
use crate::names::{FreshScope, Name};
use crate::pass::{PassCtx, TopPassCtx};

type TopNames = Vec<(Name, Name)>;

pub fn deshadow(ctx: &mut TopPassCtx<'_, DsEnv>, m: FModule) -> Result<FModule, Err> {
    let (module, top_names) = ctx.lift_pass(TopNames::new(), FreshScope::new(), |p| {
        let mut local: HashMap<String, Name> = HashMap::new();
        let mut decls = Vec::with_capacity(m.decls.len());
        for decl in m.decls {
            let body = rename(p, &local, decl.body)?;
            let fresh = p.fresh(decl.name.stem());
            p.state().push((decl.name.clone(), fresh.clone()));
            local.insert(decl.name.stem().to_string(), fresh.clone());
            decls.push(FDecl {
                name: fresh,
                body,
                span: decl.span,
            });
        }
        let top = std::mem::take(p.state());
        Ok((FModule { decls }, top))
    })?;

    let mut delta = DsEnv::new();
    for (source, fresh) in top_names {
        delta.insert(source, fresh);
    }
    ctx.put_env(delta);
    Ok(module)
}

fn rename(
    p: &mut PassCtx<'_, DsEnv, TopNames>,
    local: &HashMap<String, Name>,
    e: FExpr,
) -> Result<FExpr, Err> {
    match e {
        FExpr::Lit(..) => Ok(e),
        FExpr::Var(name, r) => {
            if let Some(q) = local.get(name.stem()) {
                Ok(FExpr::Var(q.clone(), r))
            } else if let Some(q) = p.read_env().lookup(&name) {
                Ok(FExpr::Var(q.clone(), r))
            } else {
                Err(Err::new(ErrKind::UnboundVarErr, name.stem().to_string()).with_region(r))
            }
        }
        FExpr::Lam(param, body, r) => {
            let fresh = p.fresh(param.stem());
            let mut inner = local.clone();
            inner.insert(param.stem().to_string(), fresh.clone());
            let body = rename(p, &inner, *body)?;
            Ok(FExpr::Lam(fresh, Box::new(body), r))
        }
        FExpr::For(idx, n, body, r) => {
            let fresh = p.fresh(idx.stem());
            let mut inner = local.clone();
            inner.insert(idx.stem().to_string(), fresh.clone());
            let body = rename(p, &inner, *body)?;
            Ok(FExpr::For(fresh, n, Box::new(body), r))
        }
        FExpr::App(f, x, r) => Ok(FExpr::App(
            Box::new(rename(p, local, *f)?),
            Box::new(rename(p, local, *x)?),
            r,
        )),
        FExpr::BinOp(op, l, rhs, r) => Ok(FExpr::BinOp(
            op,
            Box::new(rename(p, local, *l)?),
            Box::new(rename(p, local, *rhs)?),
            r,
        )),
        FExpr::Idx(xs, i, r) => Ok(FExpr::Idx(
            Box::new(rename(p, local, *xs)?),
            Box::new(rename(p, local, *i)?),
            r,
        )),
        FExpr::Sum(xs, r) => Ok(FExpr::Sum(Box::new(rename(p, local, *xs)?), r)),
    }
}
