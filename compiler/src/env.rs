// env.rs — Monoidal binding environments.
//
// Each pass owns one `EnvMap`: an insertion-ordered name→binding map whose
// monoid is right-biased override with stable traversal order. The session
// environment `TopEnv` is the product of the per-pass maps, combined
// componentwise; stages that carry no environment use the trivial `()`
// monoid. Deltas produced by block evaluation are folded into the session
// with `Monoid::combine`.

use std::collections::HashMap;

use crate::backend::Val;
use crate::names::Name;
use crate::tir::{Atom, Ty};

// ── Monoid ───────────────────────────────────────────────────────────────

/// An associative combine with `Default` as the identity.
pub trait Monoid: Default {
    fn combine(&mut self, other: Self);
}

impl Monoid for () {
    fn combine(&mut self, (): Self) {}
}

impl<A: Monoid, B: Monoid> Monoid for (A, B) {
    fn combine(&mut self, other: Self) {
        self.0.combine(other.0);
        self.1.combine(other.1);
    }
}

// ── EnvMap ───────────────────────────────────────────────────────────────

/// Insertion-ordered name→binding map.
///
/// Combining is right-biased: a colliding key keeps its original position
/// and takes the newer binding. Traversal order is therefore stable across
/// re-binding, and `combine` is associative.
#[derive(Debug, Clone)]
pub struct EnvMap<B> {
    entries: Vec<(Name, B)>,
    index: HashMap<Name, usize>,
}

impl<B> Default for EnvMap<B> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<B> EnvMap<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(name: Name, binding: B) -> Self {
        let mut env = Self::new();
        env.insert(name, binding);
        env
    }

    pub fn insert(&mut self, name: Name, binding: B) {
        match self.index.get(&name) {
            Some(&i) => self.entries[i].1 = binding,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, binding));
            }
        }
    }

    pub fn lookup(&self, name: &Name) -> Option<&B> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, name: &Name) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &B)> {
        self.entries.iter().map(|(n, b)| (n, b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<B: PartialEq> PartialEq for EnvMap<B> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<B> Monoid for EnvMap<B> {
    fn combine(&mut self, other: Self) {
        for (name, binding) in other.entries {
            self.insert(name, binding);
        }
    }
}

// ── Per-pass environment components ──────────────────────────────────────

/// deshadow: source name → qualified name.
pub type DsEnv = EnvMap<Name>;
/// type inference: qualified name → type.
pub type TyEnv = EnvMap<Ty>;
/// simplify: qualified name → simplified atom.
pub type SimpEnv = EnvMap<Atom>;
/// jit: qualified name → runtime value.
pub type RtEnv = EnvMap<Val>;

/// Environment of the front half of the pipeline
/// (deshadow `>+>` type inference `>+>` normalize).
pub type FrontEnv = ((DsEnv, TyEnv), ());
/// Environment of the back half (simplify `>+>` imp `>+>` jit).
pub type TypedEnv = ((SimpEnv, ()), RtEnv);
/// The session environment: the full pipeline's product environment.
pub type TopEnv = (FrontEnv, TypedEnv);

/// Component accessors for the nested product.
pub trait TopEnvExt {
    fn names(&self) -> &DsEnv;
    fn types(&self) -> &TyEnv;
    fn atoms(&self) -> &SimpEnv;
    fn values(&self) -> &RtEnv;
}

impl TopEnvExt for TopEnv {
    fn names(&self) -> &DsEnv {
        &((self.0).0).0
    }

    fn types(&self) -> &TyEnv {
        &((self.0).0).1
    }

    fn atoms(&self) -> &SimpEnv {
        &((self.1).0).0
    }

    fn values(&self) -> &RtEnv {
        &(self.1).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Name {
        Name::source(s)
    }

    fn env(pairs: &[(&str, i64)]) -> EnvMap<i64> {
        let mut e = EnvMap::new();
        for (k, v) in pairs {
            e.insert(n(k), *v);
        }
        e
    }

    #[test]
    fn combine_is_right_biased() {
        let mut a = env(&[("x", 1), ("y", 2)]);
        a.combine(env(&[("x", 3)]));
        assert_eq!(a.lookup(&n("x")), Some(&3));
        assert_eq!(a.lookup(&n("y")), Some(&2));
    }

    #[test]
    fn collision_keeps_original_position() {
        let mut a = env(&[("x", 1), ("y", 2)]);
        a.combine(env(&[("x", 3)]));
        let order: Vec<_> = a.iter().map(|(k, _)| k.stem().to_string()).collect();
        assert_eq!(order, vec!["x", "y"]);
    }

    #[test]
    fn empty_is_identity() {
        let a = env(&[("x", 1)]);
        let mut left = EnvMap::new();
        left.combine(a.clone());
        assert_eq!(left, a);
        let mut right = a.clone();
        right.combine(EnvMap::new());
        assert_eq!(right, a);
    }

    #[test]
    fn combine_is_associative() {
        let a = env(&[("x", 1)]);
        let b = env(&[("y", 2), ("x", 3)]);
        let c = env(&[("z", 4), ("y", 5)]);

        let mut ab = a.clone();
        ab.combine(b.clone());
        let mut ab_c = ab;
        ab_c.combine(c.clone());

        let mut bc = b;
        bc.combine(c);
        let mut a_bc = a;
        a_bc.combine(bc);

        assert_eq!(ab_c, a_bc);
    }

    #[test]
    fn product_combines_componentwise() {
        let mut pair: (EnvMap<i64>, EnvMap<i64>) = (env(&[("x", 1)]), EnvMap::new());
        pair.combine((env(&[("x", 2)]), env(&[("y", 9)])));
        assert_eq!(pair.0.lookup(&n("x")), Some(&2));
        assert_eq!(pair.1.lookup(&n("y")), Some(&9));
    }
}
