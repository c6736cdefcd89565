// imp.rs — Imperative IR and lowering from ANF.
//
// The imperative module is a flat instruction list over named cells, plus
// the exported result operand for each top-level binding. Tables become
// allocated arrays filled by loops; `sum` becomes an accumulator loop.
// Lambdas must not reach this stage — simplification removed them.
//
// `lower_module` runs as a pure pass (it needs fresh `%c` cell names);
// `check_imp_module` verifies define-before-use and array discipline.

use std::collections::HashSet;
use std::fmt;

use crate::ast::{BinOp, Lit};
use crate::diag::{Err, ErrKind};
use crate::names::Name;
use crate::pass::PassCtx;
use crate::tir::{Atom, Expr, Module, Ty};

// ── Imperative types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IBase {
    Int,
    Real,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ITy {
    Scalar(IBase),
    Array(usize, Box<ITy>),
}

impl fmt::Display for ITy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ITy::Scalar(IBase::Int) => write!(f, "Int"),
            ITy::Scalar(IBase::Real) => write!(f, "Real"),
            ITy::Array(n, elem) => write!(f, "[{}]{}", n, elem),
        }
    }
}

/// Lower a surface type to a cell type. Function types have no imperative
/// representation.
pub fn lower_ty(ty: &Ty) -> Result<ITy, Err> {
    match ty {
        Ty::Int => Ok(ITy::Scalar(IBase::Int)),
        Ty::Real => Ok(ITy::Scalar(IBase::Real)),
        Ty::Tab(n, elem) => Ok(ITy::Array(*n, Box::new(lower_ty(elem)?))),
        Ty::Fn(_, _) => Err(Err::new(
            ErrKind::NotImplementedErr,
            "tables or cells of functions are not supported",
        )),
        Ty::Var(v) => Err(Err::compiler(format!(
            "inference variable ?{} reached imperative lowering",
            v
        ))),
    }
}

// ── Instructions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum IOperand {
    Lit(Lit),
    /// A cell defined in this module.
    Cell(Name),
    /// A binding computed by an earlier block, resolved by the executor.
    Global(Name),
}

impl fmt::Display for IOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IOperand::Lit(l) => write!(f, "{}", l),
            IOperand::Cell(n) => write!(f, "{}", n),
            IOperand::Global(n) => write!(f, "@{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Alloc {
        dest: Name,
        ty: ITy,
    },
    Copy {
        dest: Name,
        src: IOperand,
    },
    BinOp {
        dest: Name,
        op: BinOp,
        lhs: IOperand,
        rhs: IOperand,
    },
    ReadElt {
        dest: Name,
        arr: IOperand,
        idx: IOperand,
    },
    WriteElt {
        arr: Name,
        idx: IOperand,
        src: IOperand,
    },
    Loop {
        idx: Name,
        size: usize,
        body: Vec<Instr>,
    },
}

/// One top-level binding's result.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpExport {
    pub name: Name,
    pub value: IOperand,
    pub ty: Ty,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImpModule {
    pub instrs: Vec<Instr>,
    pub exports: Vec<ImpExport>,
}

impl fmt::Display for ImpModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instrs {
            write_instr(f, instr, 0)?;
        }
        for e in &self.exports {
            writeln!(f, "out {} = {} : {}", e.name, e.value, e.ty)?;
        }
        Ok(())
    }
}

fn write_instr(f: &mut fmt::Formatter<'_>, instr: &Instr, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match instr {
        Instr::Alloc { dest, ty } => writeln!(f, "{}alloc {} : {}", pad, dest, ty),
        Instr::Copy { dest, src } => writeln!(f, "{}{} <- {}", pad, dest, src),
        Instr::BinOp { dest, op, lhs, rhs } => {
            writeln!(f, "{}{} <- {} {} {}", pad, dest, lhs, op, rhs)
        }
        Instr::ReadElt { dest, arr, idx } => writeln!(f, "{}{} <- {}[{}]", pad, dest, arr, idx),
        Instr::WriteElt { arr, idx, src } => writeln!(f, "{}{}[{}] <- {}", pad, arr, idx, src),
        Instr::Loop { idx, size, body } => {
            writeln!(f, "{}for {} < {} {{", pad, idx, size)?;
            for i in body {
                write_instr(f, i, depth + 1)?;
            }
            writeln!(f, "{}}}", pad)
        }
    }
}

// ── Lowering ─────────────────────────────────────────────────────────────

pub fn lower_module(p: &mut PassCtx<'_, (), ()>, m: &Module) -> Result<ImpModule, Err> {
    let mut locals: HashSet<Name> = HashSet::new();
    let mut instrs = Vec::new();
    let mut exports = Vec::new();

    for decl in &m.decls {
        let value = lower_expr(p, &mut instrs, &mut locals, &decl.body)?;
        // Re-home the result in a cell named after the binder so later
        // declarations in this module can reference it.
        instrs.push(Instr::Copy {
            dest: decl.binder.name.clone(),
            src: value,
        });
        locals.insert(decl.binder.name.clone());
        exports.push(ImpExport {
            name: decl.binder.name.clone(),
            value: IOperand::Cell(decl.binder.name.clone()),
            ty: decl.binder.ty.clone(),
        });
    }
    Ok(ImpModule { instrs, exports })
}

/// Lower an ANF chain, returning the operand holding its result.
fn lower_expr(
    p: &mut PassCtx<'_, (), ()>,
    instrs: &mut Vec<Instr>,
    locals: &mut HashSet<Name>,
    e: &Expr,
) -> Result<IOperand, Err> {
    match e {
        Expr::Atom(a) => operand_of(a, locals),
        Expr::Let(b, bound, body) => {
            lower_simple(p, instrs, locals, b.name.clone(), bound)?;
            locals.insert(b.name.clone());
            lower_expr(p, instrs, locals, body)
        }
        // Promoted bindings have bare compound bodies.
        other => {
            let dest = p.fresh("%c");
            lower_simple(p, instrs, locals, dest.clone(), other)?;
            locals.insert(dest.clone());
            Ok(IOperand::Cell(dest))
        }
    }
}

/// Lower one simple (ANF right-hand side) expression into `dest`.
fn lower_simple(
    p: &mut PassCtx<'_, (), ()>,
    instrs: &mut Vec<Instr>,
    locals: &mut HashSet<Name>,
    dest: Name,
    e: &Expr,
) -> Result<(), Err> {
    match e {
        Expr::Atom(a) => {
            let src = operand_of(a, locals)?;
            instrs.push(Instr::Copy { dest, src });
            Ok(())
        }
        Expr::Op(op, l, r, _) => {
            let lhs = atom_operand(l, locals)?;
            let rhs = atom_operand(r, locals)?;
            instrs.push(Instr::BinOp {
                dest,
                op: *op,
                lhs,
                rhs,
            });
            Ok(())
        }
        Expr::Idx(xs, i, _) => {
            let arr = atom_operand(xs, locals)?;
            let idx = atom_operand(i, locals)?;
            instrs.push(Instr::ReadElt { dest, arr, idx });
            Ok(())
        }
        Expr::Sum(xs, ty) => {
            let arr = atom_operand(xs, locals)?;
            let n = match atom_of(xs)?.ty() {
                Ty::Tab(n, _) => n,
                other => {
                    return Err(Err::compiler(format!(
                        "sum over non-table of type {}",
                        other
                    )))
                }
            };
            let zero = match ty {
                Ty::Int => Lit::Int(0),
                Ty::Real => Lit::Real(0.0),
                other => {
                    return Err(Err::compiler(format!(
                        "sum at non-numeric type {}",
                        other
                    )))
                }
            };
            instrs.push(Instr::Copy {
                dest: dest.clone(),
                src: IOperand::Lit(zero),
            });
            let idx = p.fresh("%c");
            let elt = p.fresh("%c");
            instrs.push(Instr::Loop {
                idx: idx.clone(),
                size: n,
                body: vec![
                    Instr::ReadElt {
                        dest: elt.clone(),
                        arr,
                        idx: IOperand::Cell(idx),
                    },
                    Instr::BinOp {
                        dest: dest.clone(),
                        op: BinOp::Add,
                        lhs: IOperand::Cell(dest),
                        rhs: IOperand::Cell(elt),
                    },
                ],
            });
            Ok(())
        }
        Expr::For(b, n, body, ty) => {
            instrs.push(Instr::Alloc {
                dest: dest.clone(),
                ty: lower_ty(ty)?,
            });
            locals.insert(b.name.clone());
            let mut loop_body = Vec::new();
            let result = lower_expr(p, &mut loop_body, locals, body)?;
            loop_body.push(Instr::WriteElt {
                arr: dest,
                idx: IOperand::Cell(b.name.clone()),
                src: result,
            });
            instrs.push(Instr::Loop {
                idx: b.name.clone(),
                size: *n,
                body: loop_body,
            });
            Ok(())
        }
        Expr::App(..) => Err(Err::compiler(
            "application survived simplification into imperative lowering",
        )),
        Expr::Let(..) => Err(Err::compiler("nested let in simple position")),
    }
}

fn atom_of(e: &Expr) -> Result<&Atom, Err> {
    match e {
        Expr::Atom(a) => Ok(a),
        other => Err(Err::compiler(format!("non-atomic operand: {}", other))),
    }
}

fn atom_operand(e: &Expr, locals: &HashSet<Name>) -> Result<IOperand, Err> {
    operand_of(atom_of(e)?, locals)
}

fn operand_of(a: &Atom, locals: &HashSet<Name>) -> Result<IOperand, Err> {
    match a {
        Atom::Lit(l) => Ok(IOperand::Lit(*l)),
        Atom::Var(b) => {
            if locals.contains(&b.name) {
                Ok(IOperand::Cell(b.name.clone()))
            } else {
                Ok(IOperand::Global(b.name.clone()))
            }
        }
        Atom::Lam(..) => Err(Err::compiler(
            "lambda survived simplification into imperative lowering",
        )),
    }
}

// ── Checker ──────────────────────────────────────────────────────────────

/// Verify define-before-use for cells, array discipline for element
/// reads/writes, and that every export resolves.
pub fn check_imp_module(m: &ImpModule) -> Result<(), Err> {
    let mut defined: HashSet<Name> = HashSet::new();
    let mut arrays: HashSet<Name> = HashSet::new();
    check_instrs(&m.instrs, &mut defined, &mut arrays)?;
    for e in &m.exports {
        check_operand(&e.value, &defined)?;
    }
    Ok(())
}

fn check_instrs(
    instrs: &[Instr],
    defined: &mut HashSet<Name>,
    arrays: &mut HashSet<Name>,
) -> Result<(), Err> {
    for instr in instrs {
        match instr {
            Instr::Alloc { dest, ty } => {
                if matches!(ty, ITy::Array(_, _)) {
                    arrays.insert(dest.clone());
                }
                defined.insert(dest.clone());
            }
            Instr::Copy { dest, src } => {
                check_operand(src, defined)?;
                defined.insert(dest.clone());
            }
            Instr::BinOp { dest, lhs, rhs, .. } => {
                check_operand(lhs, defined)?;
                check_operand(rhs, defined)?;
                defined.insert(dest.clone());
            }
            Instr::ReadElt { dest, arr, idx } => {
                check_operand(arr, defined)?;
                check_operand(idx, defined)?;
                defined.insert(dest.clone());
            }
            Instr::WriteElt { arr, idx, src } => {
                if !arrays.contains(arr) {
                    return Err(Err::compiler(format!(
                        "element write to {} which is not an allocated array",
                        arr
                    )));
                }
                check_operand(idx, defined)?;
                check_operand(src, defined)?;
            }
            Instr::Loop { idx, body, .. } => {
                defined.insert(idx.clone());
                check_instrs(body, defined, arrays)?;
            }
        }
    }
    Ok(())
}

fn check_operand(op: &IOperand, defined: &HashSet<Name>) -> Result<(), Err> {
    match op {
        IOperand::Cell(n) if !defined.contains(n) => {
            Err(Err::compiler(format!("use of undefined cell {}", n)))
        }
        // Literals are always fine; globals are the executor's concern.
        _ => Ok(()),
    }
}
