//! # Conformal Kernel
//!
//! A runtime data specification and validation engine. A *spec* is a
//! first-class description of the shape of a value: it can validate,
//! *conform* (validate and destructure), *unform* (invert conform),
//! *explain* failures as structured problems, and *generate* sample values.
//!
//! ## Architecture
//!
//! ```text
//! registry            <- process-global Name -> Spec table, alias chains
//!     |
//! spec (protocol)     <- conform/unform/explain/gen/describe
//!     |
//! pred / logic /      <- leaf predicates, and/or/merge, keyed maps,
//! keys / tuple /         tuples, sampled and rebuilding collections,
//! coll / multi           tag dispatch
//!     |
//! regex               <- derivative-based sequence matching
//!     |
//! fspec / instrument  <- function contracts, callable wrapping
//! ```
//!
//! Values are `serde_json::Value`; data failures surface as
//! [`Conformed::Invalid`] or [`Problem`] vectors, never as errors. Usage
//! failures (dangling names, missing generators, non-invertible conformers)
//! are [`SpecError`].

pub mod coll;
pub mod config;
pub mod error;
pub mod fspec;
pub mod instrument;
pub mod keys;
pub mod logic;
pub mod multi;
pub mod name;
pub mod pred;
pub mod problem;
pub mod regex;
pub mod registry;
pub mod spec;
pub mod tuple;

pub use coll::{coll_of, every, every_kv, map_of, CollKind, EveryOpts};
pub use error::SpecError;
pub use fspec::{exercise_fn, fspec, FSpecDecl};
pub use keys::{keys, KeyReq, KeysDecl};
pub use logic::{all_of, any_of, merge};
pub use multi::{multi_spec, MultiFn, Retag};
pub use name::Name;
pub use problem::{explain_str as format_explain, ExplainData, Path, PathSeg, Problem};
pub use regex::{alt, amp, cat, maybe, plus, re_spec, star, RegexOp};
pub use registry::{def, fdef, get_spec, registry, resolve, resolve_strict, RegEntry};
pub use spec::{gen_fn, Conformed, GenFn, Overrides, Spec, SpecRef, INVALID_TOKEN};
pub use tuple::tuple;

use conformal_gen::Gen;
use serde_json::Value;
use spec::RecursionMap;

/// Validate and destructure `x` against `spec`.
pub fn conform(spec: impl Into<SpecRef>, x: &Value) -> Result<Conformed, SpecError> {
    spec.into().reify()?.conform(x)
}

/// Does `x` satisfy `spec`?
pub fn valid(spec: impl Into<SpecRef>, x: &Value) -> Result<bool, SpecError> {
    Ok(conform(spec, x)?.is_valid())
}

/// Invert a conformed value back to the input shape.
pub fn unform(spec: impl Into<SpecRef>, y: &Value) -> Result<Value, SpecError> {
    spec.into().reify()?.unform(y)
}

/// Structured diagnostics for a failing value; `None` when `x` is valid.
pub fn explain_data(
    spec: impl Into<SpecRef>,
    x: &Value,
) -> Result<Option<ExplainData>, SpecError> {
    let sref = spec.into();
    let reified = sref.reify()?;
    let via: Vec<Name> = reified.name().cloned().into_iter().collect();
    let problems = reified.explain(&Path::new(), &via, &Path::new(), x)?;
    if problems.is_empty() {
        return Ok(None);
    }
    Ok(Some(ExplainData {
        problems,
        spec: sref.describe(),
        value: x.clone(),
        extra: serde_json::Map::new(),
    }))
}

/// Formatted explanation text; `Success!` for a valid value.
pub fn explain_str(spec: impl Into<SpecRef>, x: &Value) -> Result<String, SpecError> {
    Ok(format_explain(explain_data(spec, x)?.as_ref()))
}

/// Print the explanation to stdout.
pub fn explain_printed(spec: impl Into<SpecRef>, x: &Value) -> Result<(), SpecError> {
    print!("{}", explain_str(spec, x)?);
    Ok(())
}

/// Symbolic form of a spec reference.
pub fn form(spec: impl Into<SpecRef>) -> Value {
    spec.into().describe()
}

/// Symbolic description; names describe as themselves.
pub fn describe(spec: impl Into<SpecRef>) -> Value {
    form(spec)
}

/// Build a generator for `spec`, honoring `overrides`. Failing to construct
/// one is a usage error.
pub fn gen(spec: impl Into<SpecRef>, overrides: &Overrides) -> Result<Gen, SpecError> {
    let sref = spec.into();
    let df = sref.describe();
    spec::gensub(&sref, overrides, &Path::new(), &RecursionMap::new(), &df)
}

/// Sample `n` values and pair each with its conformed form.
pub fn exercise(
    spec: impl Into<SpecRef>,
    n: usize,
    overrides: &Overrides,
) -> Result<Vec<(Value, Conformed)>, SpecError> {
    let sref = spec.into();
    let g = gen(sref.clone(), overrides)?;
    let reified = sref.reify()?;
    let mut out = Vec::with_capacity(n);
    for v in g.sample(n)? {
        let c = reified.conform(&v)?;
        out.push((v, c));
    }
    Ok(out)
}
