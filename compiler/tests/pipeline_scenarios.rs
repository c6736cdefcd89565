// End-to-end block evaluation scenarios through the library API.
//
// Covers the driver's dispatch table (modules, commands, directives,
// unparseable blocks), cross-block environment accumulation, and the
// failure policy: outputs before a failure are retained, deltas are not.

use dexc::ast::FModule;
use dexc::backend::{Backend, Val};
use dexc::block::{BlockKind, BlockResult, Output, OutFormat, SourceBlock};
use dexc::diag::ErrKind;
use dexc::env::{TopEnv, TopEnvExt};
use dexc::names::Name;
use dexc::pipeline::{eval_block, eval_source, STAGE_NAMES};

fn eval(source: &str) -> (TopEnv, Vec<BlockResult>, Vec<Output>) {
    let mut env = TopEnv::default();
    let mut outs = Vec::new();
    let mut sink = |o: &Output| outs.push(o.clone());
    let results = eval_source(Backend::Jit, &mut env, source, &mut sink);
    drop(sink);
    (env, results, outs)
}

fn pass_names(outs: &[Output]) -> Vec<String> {
    outs.iter()
        .filter_map(|o| match o {
            Output::PassInfo(name, _) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

// ── S1: trivial run ──────────────────────────────────────────────────────

#[test]
fn trivial_empty_module() {
    let block = SourceBlock {
        text: String::new(),
        offset: 0,
        kind: BlockKind::RunModule(FModule::empty()),
    };
    let env = TopEnv::default();
    let mut sink = |_: &Output| {};
    let (delta, result) = eval_block(Backend::Jit, &env, &block, &mut sink);
    assert!(result.outcome.is_ok());
    assert!(result.outputs.is_empty());
    assert_eq!(delta, TopEnv::default());
}

// ── S2: show-passes ──────────────────────────────────────────────────────

#[test]
fn show_passes_emits_every_stage_in_order() {
    let (env, results, outs) = eval(":passes 1 + 1\n");
    assert!(results[0].outcome.is_ok());
    assert_eq!(pass_names(&outs), STAGE_NAMES.to_vec());
    // Commands contribute nothing to the session.
    assert_eq!(env, TopEnv::default());
}

// ── S3: eval-expr ────────────────────────────────────────────────────────

#[test]
fn print_a_literal_binding() {
    let (env, results, outs) = eval(":p 2\n");
    assert!(results[0].outcome.is_ok());
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Default, Val::Int(2))]);
    assert_eq!(env, TopEnv::default());
}

// ── S4: scope error ──────────────────────────────────────────────────────

#[test]
fn unbound_variable_stops_the_pipeline_early() {
    let (_, results, outs) = eval(":passes y + 1\n");
    let err = results[0].outcome.clone().unwrap_err();
    assert_eq!(err.kind, ErrKind::UnboundVarErr);
    // deshadow failed, so no stage ever reported.
    assert!(pass_names(&outs).is_empty());
    // The highlight points at `y` within the block's own text.
    assert!(err.msg.contains(":passes y + 1"));
    let region = err.region.unwrap();
    assert_eq!(region.start, 8);
    assert_eq!(region.stop, 9);
}

// ── S5: hard failure inside a pass ───────────────────────────────────────

mod hard_failure {
    use super::*;
    use dexc::diag::Err;
    use dexc::pass::{run_top, TopPassCtx};
    use dexc::pipeline::{Named, Stage};

    struct PanickyJit;

    impl Stage for PanickyJit {
        type Env = ();
        type In = FModule;
        type Out = FModule;

        fn name(&self) -> &'static str {
            "jit"
        }

        fn apply(
            &self,
            _ctx: &mut TopPassCtx<'_, ()>,
            _input: FModule,
        ) -> Result<FModule, Err> {
            panic!("segfault in generated code");
        }
    }

    #[test]
    fn host_panics_become_compiler_errors_with_context() {
        let pass = Named(PanickyJit);
        let mut sink = |_: &Output| {};
        let (res, ()) = run_top(&mut sink, &(), &pass, FModule::empty());
        let err = res.unwrap_err();
        assert_eq!(err.kind, ErrKind::CompilerErr);
        assert!(err.msg.contains("segfault in generated code"));
        assert!(err.msg.contains("=== context ===\njit pass with input:\n"));
    }
}

// ── S6: unparseable ──────────────────────────────────────────────────────

#[test]
fn unparseable_block_is_a_parse_error() {
    let (env, results, outs) = eval("x = = 1\n");
    let err = results[0].outcome.clone().unwrap_err();
    assert_eq!(err.kind, ErrKind::ParseErr);
    assert!(outs.is_empty());
    assert_eq!(env, TopEnv::default());
}

#[test]
fn sentinel_unparseable_kind_reports_its_reason() {
    let block = SourceBlock {
        text: String::new(),
        offset: 0,
        kind: BlockKind::Unparseable("unexpected token".into()),
    };
    let mut sink = |_: &Output| {};
    let (_, result) = eval_block(Backend::Jit, &TopEnv::default(), &block, &mut sink);
    let err = result.outcome.unwrap_err();
    assert_eq!(err.kind, ErrKind::ParseErr);
    assert_eq!(err.msg, "unexpected token");
}

// ── Cross-block environment accumulation ─────────────────────────────────

#[test]
fn bindings_accumulate_across_blocks() {
    let (env, results, outs) = eval("x = 2\n\ny = x + 3\n\n:p y\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Default, Val::Int(5))]);
    // Both module blocks contributed runtime values.
    assert_eq!(env.values().len(), 2);
}

#[test]
fn rebinding_is_right_biased() {
    let (_, results, outs) = eval("x = 1\n\nx = x + 1\n\n:p x\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Default, Val::Int(2))]);
}

#[test]
fn module_runs_suppress_all_outputs() {
    let (_, results, outs) = eval("x = 1 + 2\n");
    assert!(results[0].outcome.is_ok());
    assert!(outs.is_empty());
}

// ── Arrays ───────────────────────────────────────────────────────────────

#[test]
fn tables_build_index_and_reduce() {
    let (_, results, outs) = eval("xs = for i:4. i * 2\n\n:p sum xs\n\n:p xs.3\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()), "{:?}", results);
    assert_eq!(
        outs,
        vec![
            Output::ValOut(OutFormat::Default, Val::Int(12)),
            Output::ValOut(OutFormat::Default, Val::Int(6)),
        ]
    );
}

#[test]
fn whole_tables_print_as_values() {
    let (_, results, outs) = eval("xs = for i:3. i + 10\n\n:p xs\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(
        outs,
        vec![Output::ValOut(
            OutFormat::Default,
            Val::Arr(vec![Val::Int(10), Val::Int(11), Val::Int(12)])
        )]
    );
}

#[test]
fn table_types_pretty_print() {
    let (_, results, outs) = eval("xs = for i:4. i\n\n:t xs\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(outs, vec![Output::TextOut("4=>Int".into())]);
}

// ── Functions ────────────────────────────────────────────────────────────

#[test]
fn functions_define_and_apply() {
    let (_, results, outs) = eval("f = \\x. x * 2\n\n:p f 21\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()), "{:?}", results);
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Default, Val::Int(42))]);
}

#[test]
fn function_types_pretty_print() {
    let (_, results, outs) = eval("f = \\x. x + 1.5\n\n:t f\n");
    assert!(results.iter().all(|r| r.outcome.is_ok()));
    assert_eq!(outs, vec![Output::TextOut("(Real -> Real)".into())]);
}

#[test]
fn printing_a_function_is_a_type_error() {
    let (_, results, _) = eval("f = \\x. x\n\n:p f\n");
    assert!(results[0].outcome.is_ok());
    assert_eq!(
        results[1].outcome.clone().unwrap_err().kind,
        ErrKind::TypeErr
    );
}

#[test]
fn higher_order_functions_inline() {
    let (_, results, outs) = eval(
        "twice = \\f. \\x. f (f x)\n\naddone = \\x. x + 1\n\n:p twice addone 5\n",
    );
    assert!(results.iter().all(|r| r.outcome.is_ok()), "{:?}", results);
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Default, Val::Int(7))]);
}

// ── Runtime errors ───────────────────────────────────────────────────────

#[test]
fn division_by_zero_reports_at_runtime() {
    let (_, results, _) = eval(":p 1 / 0\n");
    let err = results[0].outcome.clone().unwrap_err();
    assert_eq!(err.kind, ErrKind::RuntimeErr);
    assert!(err.msg.contains("division by zero"));
}

#[test]
fn out_of_bounds_keeps_prior_pass_outputs() {
    let (_, results, outs) = eval("xs = for i:4. i\n\n:passes xs.9\n");
    assert!(results[0].outcome.is_ok());
    let err = results[1].outcome.clone().unwrap_err();
    assert_eq!(err.kind, ErrKind::RuntimeErr);
    // Every pass before jit reported; jit itself failed.
    assert_eq!(
        pass_names(&outs),
        vec!["deshadow", "type inference", "normalize", "simplify", "imp"]
    );
}

// ── Output filtering ─────────────────────────────────────────────────────

#[test]
fn show_pass_filters_to_one_stage() {
    let (_, results, outs) = eval(":pass simplify 1 + 2\n");
    assert!(results[0].outcome.is_ok());
    assert_eq!(pass_names(&outs), vec!["simplify"]);
    assert_eq!(outs.len(), 1);
}

#[test]
fn json_format_prints_structured_values() {
    let (_, results, outs) = eval(":json 1 + 1\n");
    assert!(results[0].outcome.is_ok());
    assert_eq!(outs, vec![Output::ValOut(OutFormat::Json, Val::Int(2))]);
}

// ── Directives and inert commands ────────────────────────────────────────

#[test]
fn include_and_load_fail_loudly() {
    let (_, results, _) = eval("include \"prelude.dx\"\n\nload \"t.dxbo\"\n");
    for r in &results {
        assert_eq!(r.outcome.clone().unwrap_err().kind, ErrKind::NotImplementedErr);
    }
}

#[test]
fn time_command_is_an_inert_no_op() {
    let (env, results, outs) = eval(":time 1 + 1\n");
    assert!(results[0].outcome.is_ok());
    assert!(outs.is_empty());
    assert_eq!(env, TopEnv::default());
}

// ── Block independence ───────────────────────────────────────────────────

#[test]
fn blocks_are_independent_against_a_fixed_env() {
    let mut env = TopEnv::default();
    let mut sink = |_: &Output| {};
    eval_source(Backend::Jit, &mut env, "x = 5\n", &mut sink);

    let block = dexc::parser::parse_block(":p x * 2\n", 0);
    let mut outs1 = Vec::new();
    let mut s1 = |o: &Output| outs1.push(o.clone());
    let (d1, r1) = eval_block(Backend::Jit, &env, &block, &mut s1);
    drop(s1);
    let mut outs2 = Vec::new();
    let mut s2 = |o: &Output| outs2.push(o.clone());
    let (d2, r2) = eval_block(Backend::Jit, &env, &block, &mut s2);
    drop(s2);

    assert_eq!(d1, d2);
    assert_eq!(r1, r2);
    assert_eq!(outs1, outs2);
}

#[test]
fn failed_blocks_contribute_no_delta() {
    let (env, results, _) = eval("x = y\n");
    assert!(results[0].outcome.is_err());
    assert_eq!(env, TopEnv::default());
    assert!(env.names().lookup(&Name::source("x")).is_none());
}
