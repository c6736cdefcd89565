// pipeline.rs — Staged block evaluation.
//
// Orchestrates the named passes for one source block:
//
//   deshadow → type inference → normalize → simplify → imp → jit
//
// Each stage is wrapped by `Named`, which gives failures a debug context
// holding the pretty-printed stage input, emits the stage's pretty-printed
// output as `PassInfo`, runs the stage's post-condition check, and recodes
// host panics as `CompilerErr`. The ordering is total: each stage assumes
// the invariants established by its predecessor.
//
// `eval_block` dispatches on the block kind, runs the module pipeline
// against a buffering sink, filters the outputs the kind asks for, and
// replays the survivors to the caller's sink. A failed block keeps its
// outputs and discards its delta.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::ast::FModule;
use crate::backend::{eval_imp, load_atom_val, Backend, RtBindings};
use crate::block::{filter_outputs, BlockKind, BlockResult, Cmd, Output, SourceBlock};
use crate::diag::{add_ctx, add_debug_ctx, Err, ErrKind};
use crate::env::{DsEnv, Monoid, RtEnv, SimpEnv, TopEnv, TopEnvExt, TyEnv};
use crate::names::{FreshScope, Name};
use crate::pass::{run_top, TopPass, TopPassCtx};
use crate::tir::{check_module, Module};
use crate::{deshadow, imp, normalize, simplify, type_infer};

/// Stage names in execution order, as they appear in `PassInfo` outputs.
pub const STAGE_NAMES: [&str; 6] = [
    "deshadow",
    "type inference",
    "normalize",
    "simplify",
    "imp",
    "jit",
];

// ── Stages ───────────────────────────────────────────────────────────────

/// One pipeline stage: a transformation plus its post-condition check.
pub trait Stage {
    type Env: Monoid;
    type In: fmt::Display;
    type Out: fmt::Display;

    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &mut TopPassCtx<'_, Self::Env>, input: Self::In)
        -> Result<Self::Out, Err>;
    fn check(&self, _out: &Self::Out) -> Result<(), Err> {
        Ok(())
    }
}

/// Wrap a stage as a named pass.
pub struct Named<S>(pub S);

impl<S: Stage> TopPass for Named<S> {
    type Env = S::Env;
    type In = S::In;
    type Out = S::Out;

    fn run(
        &self,
        ctx: &mut TopPassCtx<'_, Self::Env>,
        input: Self::In,
    ) -> Result<Self::Out, Err> {
        let t = Instant::now();
        // Forcing the full pretty print here surfaces latent structural
        // errors as compiler errors instead of crashes downstream.
        let input_ctx = format!("{} pass with input:\n{}", self.0.name(), input);

        let result = match catch_unwind(AssertUnwindSafe(|| self.0.apply(&mut *ctx, input))) {
            Ok(r) => r,
            Err(payload) => Err(Err::compiler(panic_message(payload))),
        };
        let out = result.map_err(|e| add_debug_ctx(&input_ctx, e))?;

        let pretty = out.to_string();
        ctx.write_out(Output::PassInfo(self.0.name().to_string(), pretty.clone()));

        self.0.check(&out).map_err(|e| {
            add_debug_ctx(&format!("{} pass output:\n{}", self.0.name(), pretty), e)
        })?;

        tracing::debug!(
            "{} complete, {:.1}ms",
            self.0.name(),
            t.elapsed().as_secs_f64() * 1000.0
        );
        Ok(out)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "host exception with unprintable payload".to_string()
    }
}

struct DeshadowStage;

impl Stage for DeshadowStage {
    type Env = DsEnv;
    type In = FModule;
    type Out = FModule;

    fn name(&self) -> &'static str {
        "deshadow"
    }

    fn apply(&self, ctx: &mut TopPassCtx<'_, DsEnv>, input: FModule) -> Result<FModule, Err> {
        deshadow::deshadow(ctx, input)
    }
}

struct InferStage;

impl Stage for InferStage {
    type Env = TyEnv;
    type In = FModule;
    type Out = Module;

    fn name(&self) -> &'static str {
        "type inference"
    }

    fn apply(&self, ctx: &mut TopPassCtx<'_, TyEnv>, input: FModule) -> Result<Module, Err> {
        type_infer::type_infer(ctx, input)
    }

    fn check(&self, out: &Module) -> Result<(), Err> {
        check_module(out)
    }
}

struct NormalizeStage;

impl Stage for NormalizeStage {
    type Env = ();
    type In = Module;
    type Out = Module;

    fn name(&self) -> &'static str {
        "normalize"
    }

    fn apply(&self, ctx: &mut TopPassCtx<'_, ()>, input: Module) -> Result<Module, Err> {
        normalize::normalize(ctx, input)
    }

    fn check(&self, out: &Module) -> Result<(), Err> {
        check_module(out)
    }
}

struct SimplifyStage;

impl Stage for SimplifyStage {
    type Env = SimpEnv;
    type In = Module;
    type Out = Module;

    fn name(&self) -> &'static str {
        "simplify"
    }

    fn apply(&self, ctx: &mut TopPassCtx<'_, SimpEnv>, input: Module) -> Result<Module, Err> {
        simplify::simplify(ctx, input)
    }

    fn check(&self, out: &Module) -> Result<(), Err> {
        check_module(out)
    }
}

struct ImpStage;

impl Stage for ImpStage {
    type Env = ();
    type In = Module;
    type Out = imp::ImpModule;

    fn name(&self) -> &'static str {
        "imp"
    }

    fn apply(
        &self,
        ctx: &mut TopPassCtx<'_, ()>,
        input: Module,
    ) -> Result<imp::ImpModule, Err> {
        ctx.lift_pass((), FreshScope::new(), |p| imp::lower_module(p, &input))
    }

    fn check(&self, out: &imp::ImpModule) -> Result<(), Err> {
        imp::check_imp_module(out)
    }
}

struct JitStage {
    backend: Backend,
}

impl Stage for JitStage {
    type Env = RtEnv;
    type In = imp::ImpModule;
    type Out = RtBindings;

    fn name(&self) -> &'static str {
        "jit"
    }

    fn apply(
        &self,
        ctx: &mut TopPassCtx<'_, RtEnv>,
        input: imp::ImpModule,
    ) -> Result<RtBindings, Err> {
        match self.backend {
            Backend::Jit => {
                let bindings = eval_imp(ctx.read_env(), &input)?;
                let mut delta = RtEnv::new();
                for (name, val) in &bindings.0 {
                    delta.insert(name.clone(), val.clone());
                }
                ctx.put_env(delta);
                Ok(bindings)
            }
            // Reserved backend: accepted but inert.
            Backend::Interp => Ok(RtBindings::default()),
        }
    }
}

/// The staged module pipeline over the full product environment.
///
/// `infer_types = deshadow >+> type-inference >+> normalize` and
/// `eval_typed = simplify >+> imp >+> jit`; the session environment is the
/// product of the two halves' environments.
fn eval_module_pipeline(
    backend: Backend,
) -> impl TopPass<Env = TopEnv, In = FModule, Out = RtBindings> {
    let infer_types = Named(DeshadowStage)
        .then(Named(InferStage))
        .then(Named(NormalizeStage));
    let eval_typed = Named(SimplifyStage)
        .then(Named(ImpStage))
        .then(Named(JitStage { backend }));
    infer_types.then(eval_typed)
}

// ── Block driver ─────────────────────────────────────────────────────────

/// Evaluate one source block against the session environment.
///
/// Returns the environment delta (empty unless the block is a successful
/// `RunModule`) and the block result. Outputs are forwarded to `sink` in
/// emission order before this returns; errors gain the block's source
/// context.
pub fn eval_block(
    backend: Backend,
    env: &TopEnv,
    block: &SourceBlock,
    sink: &mut dyn FnMut(&Output),
) -> (TopEnv, BlockResult) {
    let (delta, result) = dispatch_block(backend, env, block);
    for out in &result.outputs {
        sink(out);
    }
    (delta, result)
}

fn dispatch_block(backend: Backend, env: &TopEnv, block: &SourceBlock) -> (TopEnv, BlockResult) {
    match &block.kind {
        BlockKind::Other => (TopEnv::default(), BlockResult::ok(Vec::new())),
        BlockKind::Unparseable(reason) => fail(block, Err::new(ErrKind::ParseErr, reason.clone())),
        BlockKind::IncludeSourceFile(_) => fail(
            block,
            Err::new(
                ErrKind::NotImplementedErr,
                "including source files is not supported by this evaluator",
            ),
        ),
        BlockKind::LoadData(_) => fail(
            block,
            Err::new(
                ErrKind::NotImplementedErr,
                "loading data files is not supported by this evaluator",
            ),
        ),
        BlockKind::RunModule(m) => {
            let (res, delta, outs) = run_module(backend, env, m.clone());
            // Module runs suppress every output.
            let outs = filter_outputs(outs, |_| false);
            match res {
                Ok(_) => (delta, BlockResult::ok(outs)),
                Err(e) => (
                    TopEnv::default(),
                    BlockResult::failed(outs, add_ctx(&block.text, block.offset, e)),
                ),
            }
        }
        BlockKind::Command(cmd, (name, m)) => eval_command(backend, env, block, cmd, name, m),
    }
}

fn eval_command(
    backend: Backend,
    env: &TopEnv,
    block: &SourceBlock,
    cmd: &Cmd,
    name: &Name,
    m: &FModule,
) -> (TopEnv, BlockResult) {
    match cmd {
        Cmd::EvalExpr(fmt) => {
            let (res, delta, outs) = run_module(backend, env, m.clone());
            let outs = filter_outputs(outs, |_| false);
            match res.and_then(|_| resolve_value(&delta, name)) {
                Ok(val) => {
                    let mut outs = outs;
                    outs.push(Output::ValOut(*fmt, val));
                    (TopEnv::default(), BlockResult::ok(outs))
                }
                Err(e) => (
                    TopEnv::default(),
                    BlockResult::failed(outs, add_ctx(&block.text, block.offset, e)),
                ),
            }
        }
        Cmd::GetType => {
            let (res, delta, outs) = run_module(backend, env, m.clone());
            let outs = filter_outputs(outs, |_| false);
            match res.and_then(|_| resolve_type(&delta, name)) {
                Ok(text) => {
                    let mut outs = outs;
                    outs.push(Output::TextOut(text));
                    (TopEnv::default(), BlockResult::ok(outs))
                }
                Err(e) => (
                    TopEnv::default(),
                    BlockResult::failed(outs, add_ctx(&block.text, block.offset, e)),
                ),
            }
        }
        Cmd::ShowPasses => {
            let (res, _, outs) = run_module(backend, env, m.clone());
            let outs = filter_outputs(outs, Output::is_pass_info);
            finish_command(block, res, outs)
        }
        Cmd::ShowPass(stage) => {
            let (res, _, outs) = run_module(backend, env, m.clone());
            let stage = stage.clone();
            let outs = filter_outputs(outs, |o| match o {
                Output::PassInfo(n, _) => *n == stage,
                _ => false,
            });
            finish_command(block, res, outs)
        }
        // Recognized but inert commands are silent no-ops.
        Cmd::TimeIt => (TopEnv::default(), BlockResult::ok(Vec::new())),
    }
}

fn finish_command(
    block: &SourceBlock,
    res: Result<RtBindings, Err>,
    outs: Vec<Output>,
) -> (TopEnv, BlockResult) {
    match res {
        Ok(_) => (TopEnv::default(), BlockResult::ok(outs)),
        Err(e) => (
            TopEnv::default(),
            BlockResult::failed(outs, add_ctx(&block.text, block.offset, e)),
        ),
    }
}

fn fail(block: &SourceBlock, e: Err) -> (TopEnv, BlockResult) {
    (
        TopEnv::default(),
        BlockResult::failed(Vec::new(), add_ctx(&block.text, block.offset, e)),
    )
}

/// Run the module pipeline against a buffering sink; the caller filters
/// and replays. Nested output funneling keeps sink writes ordered.
fn run_module(
    backend: Backend,
    env: &TopEnv,
    m: FModule,
) -> (Result<RtBindings, Err>, TopEnv, Vec<Output>) {
    let mut outs: Vec<Output> = Vec::new();
    let pipeline = eval_module_pipeline(backend);
    let mut sink = |o: &Output| outs.push(o.clone());
    let (res, delta) = run_top(&mut sink, env, &pipeline, m);
    drop(sink);
    (res, delta, outs)
}

/// Look up the command scrutinee's runtime value in the module's delta.
/// The binding must be a value binding; functions have no runtime value.
fn resolve_value(delta: &TopEnv, name: &Name) -> Result<crate::backend::Val, Err> {
    let qualified = delta
        .names()
        .lookup(name)
        .ok_or_else(|| Err::compiler(format!("{} missing from the deshadow delta", name)))?;
    let atom = delta
        .atoms()
        .lookup(qualified)
        .cloned()
        .ok_or_else(|| {
            Err::compiler(format!("{} missing from the simplification delta", qualified))
        })?;
    load_atom_val(delta.values(), &atom)
}

fn resolve_type(delta: &TopEnv, name: &Name) -> Result<String, Err> {
    let qualified = delta
        .names()
        .lookup(name)
        .ok_or_else(|| Err::compiler(format!("{} missing from the deshadow delta", name)))?;
    let ty = delta
        .types()
        .lookup(qualified)
        .ok_or_else(|| Err::compiler(format!("{} missing from the type delta", qualified)))?;
    Ok(ty.to_string())
}

// ── Session driver ───────────────────────────────────────────────────────

/// Evaluate a whole source file block by block, folding each delta into
/// the session environment. Blocks are independent given a fixed input
/// environment; a failed block contributes nothing.
pub fn eval_source(
    backend: Backend,
    env: &mut TopEnv,
    source: &str,
    sink: &mut dyn FnMut(&Output),
) -> Vec<BlockResult> {
    let blocks = crate::parser::parse_source(source);
    let mut results = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let (delta, result) = eval_block(backend, env, block, sink);
        env.combine(delta);
        results.push(result);
    }
    results
}
