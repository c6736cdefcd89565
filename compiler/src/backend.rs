// backend.rs — Runtime values and imperative-module execution.
//
// The jit stage hands a lowered module to `eval_imp`, which executes it
// against a cell store, resolving `@global` operands through the runtime
// environment accumulated by earlier blocks. Division by zero, integer
// overflow, and out-of-bounds indexing are runtime errors; shape or type
// disagreements at this level are compiler bugs.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::ast::{BinOp, Lit};
use crate::diag::{Err, ErrKind};
use crate::env::RtEnv;
use crate::imp::{IBase, ITy, IOperand, ImpModule, Instr};
use crate::names::Name;
use crate::tir::Atom;

/// Execution engine selector. `Interp` is reserved; only `Jit` is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Jit,
    Interp,
}

// ── Values ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Val {
    Int(i64),
    Real(f64),
    Arr(Vec<Val>),
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(n) => write!(f, "{}", n),
            Val::Real(x) => write!(f, "{:?}", x),
            Val::Arr(elems) => {
                write!(f, "[")?;
                for (i, v) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// The bindings one module evaluation produced, in declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RtBindings(pub Vec<(Name, Val)>);

impl fmt::Display for RtBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, val) in &self.0 {
            writeln!(f, "{} = {}", name, val)?;
        }
        Ok(())
    }
}

// ── Atom realization ─────────────────────────────────────────────────────

/// Realize an atom as a runtime value for display or type queries.
pub fn load_atom_val(values: &RtEnv, atom: &Atom) -> Result<Val, Err> {
    match atom {
        Atom::Lit(Lit::Int(n)) => Ok(Val::Int(*n)),
        Atom::Lit(Lit::Real(x)) => Ok(Val::Real(*x)),
        Atom::Var(b) => values.lookup(&b.name).cloned().ok_or_else(|| {
            Err::compiler(format!("no runtime value for {}", b.name))
        }),
        Atom::Lam(..) => Err(Err::new(
            ErrKind::TypeErr,
            "a function is not a value binding",
        )),
    }
}

// ── Execution ────────────────────────────────────────────────────────────

/// Execute an imperative module, reading previously computed bindings from
/// `globals`, and return the exported bindings.
pub fn eval_imp(globals: &RtEnv, m: &ImpModule) -> Result<RtBindings, Err> {
    let mut store: HashMap<Name, Val> = HashMap::new();
    exec(&m.instrs, &mut store, globals)?;

    let mut bindings = Vec::with_capacity(m.exports.len());
    for e in &m.exports {
        let val = operand_val(&e.value, &store, globals)?;
        bindings.push((e.name.clone(), val));
    }
    Ok(RtBindings(bindings))
}

fn exec(
    instrs: &[Instr],
    store: &mut HashMap<Name, Val>,
    globals: &RtEnv,
) -> Result<(), Err> {
    for instr in instrs {
        match instr {
            Instr::Alloc { dest, ty } => {
                store.insert(dest.clone(), zero_val(ty));
            }
            Instr::Copy { dest, src } => {
                let v = operand_val(src, store, globals)?;
                store.insert(dest.clone(), v);
            }
            Instr::BinOp { dest, op, lhs, rhs } => {
                let l = operand_val(lhs, store, globals)?;
                let r = operand_val(rhs, store, globals)?;
                store.insert(dest.clone(), apply_op(*op, l, r)?);
            }
            Instr::ReadElt { dest, arr, idx } => {
                let arr = operand_val(arr, store, globals)?;
                let i = index_val(&operand_val(idx, store, globals)?)?;
                let elems = as_array(&arr)?;
                let v = bounds_checked(elems, i)?.clone();
                store.insert(dest.clone(), v);
            }
            Instr::WriteElt { arr, idx, src } => {
                let i = index_val(&operand_val(idx, store, globals)?)?;
                let v = operand_val(src, store, globals)?;
                let cell = store
                    .get_mut(arr)
                    .ok_or_else(|| Err::compiler(format!("write to undefined cell {}", arr)))?;
                match cell {
                    Val::Arr(elems) => {
                        let n = elems.len();
                        let slot = elems.get_mut(i as usize).filter(|_| i >= 0).ok_or_else(
                            || {
                                Err::new(
                                    ErrKind::RuntimeErr,
                                    format!("index out of bounds: {} not in [0, {})", i, n),
                                )
                            },
                        )?;
                        *slot = v;
                    }
                    _ => return Err(Err::compiler(format!("element write to scalar {}", arr))),
                }
            }
            Instr::Loop { idx, size, body } => {
                for k in 0..*size {
                    store.insert(idx.clone(), Val::Int(k as i64));
                    exec(body, store, globals)?;
                }
            }
        }
    }
    Ok(())
}

fn zero_val(ty: &ITy) -> Val {
    match ty {
        ITy::Scalar(IBase::Int) => Val::Int(0),
        ITy::Scalar(IBase::Real) => Val::Real(0.0),
        ITy::Array(n, elem) => Val::Arr(vec![zero_val(elem); *n]),
    }
}

fn operand_val(
    op: &IOperand,
    store: &HashMap<Name, Val>,
    globals: &RtEnv,
) -> Result<Val, Err> {
    match op {
        IOperand::Lit(Lit::Int(n)) => Ok(Val::Int(*n)),
        IOperand::Lit(Lit::Real(x)) => Ok(Val::Real(*x)),
        IOperand::Cell(n) => store
            .get(n)
            .cloned()
            .ok_or_else(|| Err::compiler(format!("read of undefined cell {}", n))),
        IOperand::Global(n) => globals
            .lookup(n)
            .cloned()
            .ok_or_else(|| Err::compiler(format!("unbound global {}", n))),
    }
}

fn apply_op(op: BinOp, l: Val, r: Val) -> Result<Val, Err> {
    match (l, r) {
        (Val::Int(a), Val::Int(b)) => {
            if op == BinOp::Div && b == 0 {
                return Err(Err::new(ErrKind::RuntimeErr, "integer division by zero"));
            }
            let v = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
            };
            v.map(Val::Int).ok_or_else(|| {
                Err::new(
                    ErrKind::RuntimeErr,
                    format!("integer overflow in {} {} {}", a, op, b),
                )
            })
        }
        (Val::Real(a), Val::Real(b)) => {
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
            };
            Ok(Val::Real(v))
        }
        (l, r) => Err(Err::compiler(format!(
            "operator {} applied to mismatched values {} and {}",
            op, l, r
        ))),
    }
}

fn index_val(v: &Val) -> Result<i64, Err> {
    match v {
        Val::Int(i) => Ok(*i),
        other => Err(Err::compiler(format!("non-integer index {}", other))),
    }
}

fn as_array(v: &Val) -> Result<&[Val], Err> {
    match v {
        Val::Arr(elems) => Ok(elems),
        other => Err(Err::compiler(format!("indexing a non-array value {}", other))),
    }
}

fn bounds_checked(elems: &[Val], i: i64) -> Result<&Val, Err> {
    if i < 0 || i as usize >= elems.len() {
        return Err(Err::new(
            ErrKind::RuntimeErr,
            format!("index out of bounds: {} not in [0, {})", i, elems.len()),
        ));
    }
    Ok(&elems[i as usize])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::ImpExport;
    use crate::tir::{Binder, Ty};

    fn cell(s: &str) -> Name {
        Name::source(s)
    }

    #[test]
    fn copy_and_binop() {
        let m = ImpModule {
            instrs: vec![
                Instr::Copy {
                    dest: cell("a"),
                    src: IOperand::Lit(Lit::Int(2)),
                },
                Instr::BinOp {
                    dest: cell("x"),
                    op: BinOp::Mul,
                    lhs: IOperand::Cell(cell("a")),
                    rhs: IOperand::Lit(Lit::Int(21)),
                },
            ],
            exports: vec![ImpExport {
                name: cell("x"),
                value: IOperand::Cell(cell("x")),
                ty: Ty::Int,
            }],
        };
        let out = eval_imp(&RtEnv::new(), &m).unwrap();
        assert_eq!(out.0, vec![(cell("x"), Val::Int(42))]);
    }

    #[test]
    fn loop_fills_an_array() {
        // alloc xs; for i < 3 { t <- i * 2; xs[i] <- t }
        let m = ImpModule {
            instrs: vec![
                Instr::Alloc {
                    dest: cell("xs"),
                    ty: ITy::Array(3, Box::new(ITy::Scalar(IBase::Int))),
                },
                Instr::Loop {
                    idx: cell("i"),
                    size: 3,
                    body: vec![
                        Instr::BinOp {
                            dest: cell("t"),
                            op: BinOp::Mul,
                            lhs: IOperand::Cell(cell("i")),
                            rhs: IOperand::Lit(Lit::Int(2)),
                        },
                        Instr::WriteElt {
                            arr: cell("xs"),
                            idx: IOperand::Cell(cell("i")),
                            src: IOperand::Cell(cell("t")),
                        },
                    ],
                },
            ],
            exports: vec![ImpExport {
                name: cell("xs"),
                value: IOperand::Cell(cell("xs")),
                ty: Ty::Tab(3, Box::new(Ty::Int)),
            }],
        };
        let out = eval_imp(&RtEnv::new(), &m).unwrap();
        assert_eq!(
            out.0[0].1,
            Val::Arr(vec![Val::Int(0), Val::Int(2), Val::Int(4)])
        );
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let m = ImpModule {
            instrs: vec![Instr::BinOp {
                dest: cell("x"),
                op: BinOp::Div,
                lhs: IOperand::Lit(Lit::Int(1)),
                rhs: IOperand::Lit(Lit::Int(0)),
            }],
            exports: vec![],
        };
        let err = eval_imp(&RtEnv::new(), &m).unwrap_err();
        assert_eq!(err.kind, ErrKind::RuntimeErr);
        assert!(err.msg.contains("division by zero"));
    }

    #[test]
    fn out_of_bounds_read_is_a_runtime_error() {
        let m = ImpModule {
            instrs: vec![
                Instr::Alloc {
                    dest: cell("xs"),
                    ty: ITy::Array(2, Box::new(ITy::Scalar(IBase::Int))),
                },
                Instr::ReadElt {
                    dest: cell("x"),
                    arr: IOperand::Cell(cell("xs")),
                    idx: IOperand::Lit(Lit::Int(5)),
                },
            ],
            exports: vec![],
        };
        let err = eval_imp(&RtEnv::new(), &m).unwrap_err();
        assert_eq!(err.kind, ErrKind::RuntimeErr);
        assert!(err.msg.contains("5 not in [0, 2)"));
    }

    #[test]
    fn globals_resolve_through_the_runtime_env() {
        let mut globals = RtEnv::new();
        globals.insert(cell("g"), Val::Int(40));
        let m = ImpModule {
            instrs: vec![Instr::BinOp {
                dest: cell("x"),
                op: BinOp::Add,
                lhs: IOperand::Global(cell("g")),
                rhs: IOperand::Lit(Lit::Int(2)),
            }],
            exports: vec![ImpExport {
                name: cell("x"),
                value: IOperand::Cell(cell("x")),
                ty: Ty::Int,
            }],
        };
        let out = eval_imp(&globals, &m).unwrap();
        assert_eq!(out.0[0].1, Val::Int(42));
    }

    #[test]
    fn load_atom_val_realizes_atoms() {
        let mut values = RtEnv::new();
        values.insert(cell("x"), Val::Int(7));
        assert_eq!(
            load_atom_val(&values, &Atom::Lit(Lit::Int(3))).unwrap(),
            Val::Int(3)
        );
        assert_eq!(
            load_atom_val(&values, &Atom::Var(Binder::new(cell("x"), Ty::Int))).unwrap(),
            Val::Int(7)
        );
        let lam = Atom::Lam(
            Binder::new(cell("a"), Ty::Int),
            Box::new(crate::tir::Expr::Atom(Atom::Var(Binder::new(
                cell("a"),
                Ty::Int,
            )))),
        );
        assert_eq!(load_atom_val(&values, &lam).unwrap_err().kind, ErrKind::TypeErr);
    }

    #[test]
    fn arrays_display_like_dex_tables() {
        let v = Val::Arr(vec![Val::Int(1), Val::Int(2)]);
        assert_eq!(v.to_string(), "[1, 2]");
        assert_eq!(Val::Real(2.0).to_string(), "2.0");
    }
}
