// pass.rs — The pass effect carrier, runners, and composition.
//
// A top pass is a computation that reads an environment, appends outputs to
// a sink, accumulates a monoidal environment delta, and either produces a
// value or fails with one `Err`. The carrier is a concrete context passed
// by exclusive reference; the composition combinator `then` runs two passes
// with independent environments over their product environment.
//
// Preconditions: the sink is a synchronous callback; each write completes
// before the next user-visible event.
// Postconditions: `run_top_pass` returns every contributed delta exactly
// once; outputs reach the sink in emission order before it returns.
// Failure modes: a pass failure aborts the computation; outputs written
// before the failure are retained, never rolled back.

use crate::block::Output;
use crate::diag::Err;
use crate::env::Monoid;
use crate::names::{FreshScope, Name};

// ── Top pass carrier ─────────────────────────────────────────────────────

/// Execution context for a top pass over environment `E`.
pub struct TopPassCtx<'a, E> {
    env: &'a E,
    sink: &'a mut dyn FnMut(&Output),
    delta: E,
}

impl<'a, E: Monoid> TopPassCtx<'a, E> {
    /// The ambient read-only environment.
    pub fn read_env(&self) -> &'a E {
        self.env
    }

    /// Contribute a delta into the accumulator (associative).
    pub fn put_env(&mut self, delta: E) {
        self.delta.combine(delta);
    }

    /// Append to the output sink, synchronously.
    pub fn write_out(&mut self, out: Output) {
        (self.sink)(&out);
    }

    /// Run `f`; on failure, hand the error to `h` for recovery.
    ///
    /// Outputs and deltas contributed before the failure are retained.
    pub fn catch<A>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<A, Err>,
        h: impl FnOnce(&mut Self, Err) -> Result<A, Err>,
    ) -> Result<A, Err> {
        match f(self) {
            Ok(a) => Ok(a),
            Err(e) => h(self, e),
        }
    }

    /// A child context over a different environment, sharing this sink.
    /// The child's delta is collected with `into_delta`.
    pub fn sub<'s, E2: Monoid>(&'s mut self, env: &'s E2) -> TopPassCtx<'s, E2> {
        TopPassCtx {
            env,
            sink: &mut *self.sink,
            delta: E2::default(),
        }
    }

    pub fn into_delta(self) -> E {
        self.delta
    }

    /// Run a pure pass against the ambient environment, folding its result
    /// or error back into the carrier.
    pub fn lift_pass<S, A>(
        &mut self,
        state: S,
        scope: FreshScope,
        f: impl FnOnce(&mut PassCtx<'_, E, S>) -> Result<A, Err>,
    ) -> Result<A, Err> {
        eval_pass(self.env, state, scope, f)
    }
}

/// Execute a top pass computation: the sole primitive execution boundary.
///
/// Returns the result together with the accumulated delta — on failure, the
/// accumulation up to the point of failure (callers may discard it; the
/// pipeline driver does).
pub fn run_top_pass<E: Monoid, A>(
    sink: &mut dyn FnMut(&Output),
    env: &E,
    f: impl FnOnce(&mut TopPassCtx<'_, E>) -> Result<A, Err>,
) -> (Result<A, Err>, E) {
    let mut ctx = TopPassCtx {
        env,
        sink,
        delta: E::default(),
    };
    let result = f(&mut ctx);
    (result, ctx.delta)
}

/// `run_top_pass` over a `TopPass` value instead of a closure.
pub fn run_top<P: TopPass>(
    sink: &mut dyn FnMut(&Output),
    env: &P::Env,
    pass: &P,
    input: P::In,
) -> (Result<P::Out, Err>, P::Env) {
    let mut ctx = TopPassCtx {
        env,
        sink,
        delta: P::Env::default(),
    };
    let result = pass.run(&mut ctx, input);
    (result, ctx.delta)
}

// ── Pure pass carrier ────────────────────────────────────────────────────

/// Context for a pure pass: environment + mutable state + fresh names.
/// No I/O, no outputs, no delta — internal bookkeeping must not leak as
/// top-level state.
pub struct PassCtx<'a, E, S> {
    env: &'a E,
    state: S,
    scope: FreshScope,
}

impl<'a, E, S> PassCtx<'a, E, S> {
    pub fn read_env(&self) -> &'a E {
        self.env
    }

    pub fn state(&mut self) -> &mut S {
        &mut self.state
    }

    /// Request a name unique within this pass run.
    pub fn fresh(&mut self, stem: &str) -> Name {
        self.scope.fresh(stem)
    }
}

/// Evaluate a pure pass, returning its value and terminal state.
pub fn run_pass<E, S, A>(
    env: &E,
    state: S,
    scope: FreshScope,
    f: impl FnOnce(&mut PassCtx<'_, E, S>) -> Result<A, Err>,
) -> Result<(A, S), Err> {
    let mut ctx = PassCtx { env, state, scope };
    let a = f(&mut ctx)?;
    Ok((a, ctx.state))
}

/// `run_pass`, discarding the terminal state.
pub fn eval_pass<E, S, A>(
    env: &E,
    state: S,
    scope: FreshScope,
    f: impl FnOnce(&mut PassCtx<'_, E, S>) -> Result<A, Err>,
) -> Result<A, Err> {
    run_pass(env, state, scope, f).map(|(a, _)| a)
}

// ── Composition ──────────────────────────────────────────────────────────

/// A named unit of staged computation: input in, output or error out, over
/// its own environment component.
pub trait TopPass {
    type Env: Monoid;
    type In;
    type Out;

    fn run(&self, ctx: &mut TopPassCtx<'_, Self::Env>, input: Self::In)
        -> Result<Self::Out, Err>;

    /// Sequential composition over the product environment (`>+>`).
    fn then<G>(self, second: G) -> Then<Self, G>
    where
        Self: Sized,
        G: TopPass<In = Self::Out>,
    {
        Then {
            first: self,
            second,
        }
    }
}

/// Two composed passes over `(E1, E2)`.
///
/// If the first pass fails the second never runs; if either fails, nothing
/// is contributed to the delta. A partial environment update must not leak
/// a half-typed binding.
pub struct Then<F, G> {
    first: F,
    second: G,
}

impl<F, G> TopPass for Then<F, G>
where
    F: TopPass,
    G: TopPass<In = F::Out>,
{
    type Env = (F::Env, G::Env);
    type In = F::In;
    type Out = G::Out;

    fn run(
        &self,
        ctx: &mut TopPassCtx<'_, Self::Env>,
        input: Self::In,
    ) -> Result<Self::Out, Err> {
        let env = ctx.read_env();

        let mut sub = ctx.sub(&env.0);
        let r1 = self.first.run(&mut sub, input);
        let d1 = sub.into_delta();
        let mid = r1?;

        let mut sub = ctx.sub(&env.1);
        let r2 = self.second.run(&mut sub, mid);
        let d2 = sub.into_delta();
        let out = r2?;

        ctx.put_env((d1, d2));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvMap;

    // A pass that logs, contributes one binding, and adds to its input.
    struct AddPass {
        key: &'static str,
        amount: i64,
    }

    impl TopPass for AddPass {
        type Env = EnvMap<i64>;
        type In = i64;
        type Out = i64;

        fn run(&self, ctx: &mut TopPassCtx<'_, Self::Env>, x: i64) -> Result<i64, Err> {
            ctx.write_out(Output::TextOut(format!("{}:{}", self.key, x)));
            ctx.put_env(EnvMap::singleton(Name::source(self.key), self.amount));
            Ok(x + self.amount)
        }
    }

    // A pass that logs, then fails.
    struct FailPass;

    impl TopPass for FailPass {
        type Env = EnvMap<i64>;
        type In = i64;
        type Out = i64;

        fn run(&self, ctx: &mut TopPassCtx<'_, Self::Env>, _x: i64) -> Result<i64, Err> {
            ctx.write_out(Output::TextOut("failing".into()));
            Err(Err::compiler("boom"))
        }
    }

    fn collect_sink(outs: &mut Vec<Output>) -> impl FnMut(&Output) + '_ {
        move |o: &Output| outs.push(o.clone())
    }

    #[test]
    fn outputs_reach_sink_in_order() {
        let mut outs = Vec::new();
        let env = EnvMap::new();
        let pass = AddPass { key: "a", amount: 1 }.then(AddPass { key: "b", amount: 2 });
        let (res, delta) = run_top(&mut collect_sink(&mut outs), &(env.clone(), env), &pass, 10);
        assert_eq!(res.unwrap(), 13);
        assert_eq!(
            outs,
            vec![
                Output::TextOut("a:10".into()),
                Output::TextOut("b:11".into()),
            ]
        );
        assert_eq!(delta.0.lookup(&Name::source("a")), Some(&1));
        assert_eq!(delta.1.lookup(&Name::source("b")), Some(&2));
    }

    #[test]
    fn first_failure_skips_second_and_contributes_nothing() {
        let mut outs = Vec::new();
        let env: EnvMap<i64> = EnvMap::new();
        let pass = FailPass.then(AddPass { key: "b", amount: 2 });
        let (res, delta) = run_top(&mut collect_sink(&mut outs), &(env.clone(), env), &pass, 0);
        assert!(res.is_err());
        // The second pass never ran; outputs before the failure are retained.
        assert_eq!(outs, vec![Output::TextOut("failing".into())]);
        assert!(delta.0.is_empty() && delta.1.is_empty());
    }

    #[test]
    fn second_failure_discards_first_delta() {
        let mut outs = Vec::new();
        let env: EnvMap<i64> = EnvMap::new();
        let pass = AddPass { key: "a", amount: 1 }.then(FailPass);
        let (res, delta) = run_top(&mut collect_sink(&mut outs), &(env.clone(), env), &pass, 0);
        assert!(res.is_err());
        assert!(delta.0.is_empty() && delta.1.is_empty());
        // Outputs from both stages are retained.
        assert_eq!(outs.len(), 2);
    }

    #[test]
    fn catch_recovers_and_keeps_outputs() {
        let mut outs = Vec::new();
        let env: EnvMap<i64> = EnvMap::new();
        let mut sink = collect_sink(&mut outs);
        let (res, _) = run_top_pass(&mut sink, &env, |ctx| {
            ctx.catch(
                |c| {
                    c.write_out(Output::TextOut("before".into()));
                    Err(Err::compiler("caught"))
                },
                |c, e| {
                    c.write_out(Output::TextOut(format!("recovered: {}", e.msg)));
                    Ok(7)
                },
            )
        });
        drop(sink);
        assert_eq!(res.unwrap(), 7);
        assert_eq!(
            outs,
            vec![
                Output::TextOut("before".into()),
                Output::TextOut("recovered: caught".into()),
            ]
        );
    }

    #[test]
    fn failure_keeps_delta_accumulated_so_far() {
        let mut sink = |_: &Output| {};
        let env: EnvMap<i64> = EnvMap::new();
        let (res, delta) = run_top_pass(&mut sink, &env, |ctx| {
            ctx.put_env(EnvMap::singleton(Name::source("partial"), 5));
            Err::<i64, _>(Err::compiler("late failure"))
        });
        assert!(res.is_err());
        // run_top_pass itself reports the partial delta; discarding it is
        // the driver's decision.
        assert_eq!(delta.lookup(&Name::source("partial")), Some(&5));
    }

    #[test]
    fn pure_pass_threads_state_and_scope() {
        let env = 100i64;
        let out = run_pass(&env, Vec::<Name>::new(), FreshScope::new(), |ctx| {
            let n1 = ctx.fresh("t");
            let n2 = ctx.fresh("t");
            ctx.state().push(n1.clone());
            ctx.state().push(n2.clone());
            assert_ne!(n1, n2);
            Ok(*ctx.read_env())
        });
        let (val, state) = out.unwrap();
        assert_eq!(val, 100);
        assert_eq!(state.len(), 2);
    }
}
