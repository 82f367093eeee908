//! The spec protocol and its handles.
//!
//! Every structural spec implements [`SpecImpl`]; user code holds [`Spec`]
//! handles and composes them through [`SpecRef`], the late-binding reference
//! type. Name references resolve through the registry at operation time, so
//! recursive specs are ordinary name cycles, never cyclic object graphs.

use crate::config;
use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{form_str, path_str, Path, PathSeg, Problem};
use crate::regex::RegexOp;
use crate::registry;
use conformal_gen::Gen;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Token that stands in for the invalid sentinel where a plain `Value` is
/// required (multi-spec catch-all method rows).
pub const INVALID_TOKEN: &str = "conformal.kernel/invalid";

/// The outcome of conforming a value. `Invalid` is not a `Value`, so the
/// sentinel can never leak into conformed data.
#[derive(Debug, Clone, PartialEq)]
pub enum Conformed {
    Valid(Value),
    Invalid,
}

impl Conformed {
    pub fn is_valid(&self) -> bool {
        matches!(self, Conformed::Valid(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Conformed::Valid(v) => Some(v),
            Conformed::Invalid => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Conformed::Valid(v) => Some(v),
            Conformed::Invalid => None,
        }
    }
}

/// Stable identity for a branching op, used by the generation recursion
/// budget. Unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpecId(u64);

impl SpecId {
    pub(crate) fn fresh() -> SpecId {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SpecId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-call budget table bounding generator recursion through branching ops.
#[derive(Debug, Clone)]
pub(crate) struct RecursionMap {
    limit: usize,
    counts: BTreeMap<SpecId, usize>,
}

impl RecursionMap {
    pub(crate) fn new() -> RecursionMap {
        RecursionMap {
            limit: config::recursion_limit(),
            counts: BTreeMap::new(),
        }
    }

    /// One more descent through `id`; the parent's counts are unaffected.
    pub(crate) fn bump(&self, id: SpecId) -> RecursionMap {
        let mut next = self.clone();
        *next.counts.entry(id).or_insert(0) += 1;
        next
    }

    /// A branch is cut once its id is over budget AND the key already
    /// appears on the current path, the signature of a genuinely recursive
    /// descent rather than a wide one.
    pub(crate) fn over_limit(&self, id: SpecId, path: &Path, key: &PathSeg) -> bool {
        self.counts.get(&id).copied().unwrap_or(0) > self.limit && path.contains(key)
    }

    /// Budget check for self-recursive ops with no path key (`Rep`).
    pub(crate) fn count_over(&self, id: SpecId) -> bool {
        self.counts.get(&id).copied().unwrap_or(0) > self.limit
    }
}

/// A generator-producing thunk; attached to specs by `with_gen` and carried
/// in override tables.
pub type GenFn = Arc<dyn Fn() -> Gen + Send + Sync>;

/// Wrap a closure as a [`GenFn`].
pub fn gen_fn(f: impl Fn() -> Gen + Send + Sync + 'static) -> GenFn {
    Arc::new(f)
}

/// Generator overrides, keyed by registered spec name or by path.
#[derive(Default, Clone)]
pub struct Overrides {
    by_name: BTreeMap<Name, GenFn>,
    by_path: BTreeMap<Path, GenFn>,
}

impl Overrides {
    pub fn new() -> Overrides {
        Overrides::default()
    }

    pub fn for_name(mut self, name: Name, f: GenFn) -> Overrides {
        self.by_name.insert(name, f);
        self
    }

    pub fn at_path(mut self, path: Path, f: GenFn) -> Overrides {
        self.by_path.insert(path, f);
        self
    }

    pub(crate) fn lookup(&self, name: Option<&Name>, path: &Path) -> Option<GenFn> {
        if let Some(n) = name {
            if let Some(f) = self.by_name.get(n) {
                return Some(f.clone());
            }
        }
        self.by_path.get(path).cloned()
    }

    pub(crate) fn path_lookup(&self, path: &Path) -> Option<GenFn> {
        self.by_path.get(path).cloned()
    }
}

/// The six-operation protocol every structural spec implements.
pub(crate) trait SpecImpl: Send + Sync {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError>;

    fn unform(&self, y: &Value) -> Result<Value, SpecError>;

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError>;

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError>;

    fn describe(&self) -> Value;

    /// Downcast hook for instrumentation, which needs the arg spec out of a
    /// registered function contract.
    fn as_fspec(&self) -> Option<&crate::fspec::FSpec> {
        None
    }
}

/// A spec value: immutable once constructed.
#[derive(Clone)]
pub struct Spec {
    imp: Arc<dyn SpecImpl>,
    name: Option<Name>,
    gfn: Option<GenFn>,
}

impl Spec {
    pub(crate) fn new(imp: impl SpecImpl + 'static) -> Spec {
        Spec {
            imp: Arc::new(imp),
            name: None,
            gfn: None,
        }
    }

    /// The registered name this handle was resolved under, if any.
    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub(crate) fn with_name(&self, name: Name) -> Spec {
        Spec {
            imp: Arc::clone(&self.imp),
            name: Some(name),
            gfn: self.gfn.clone(),
        }
    }

    /// Replace this spec's generator.
    pub fn with_gen(&self, gfn: GenFn) -> Spec {
        Spec {
            imp: Arc::clone(&self.imp),
            name: self.name.clone(),
            gfn: Some(gfn),
        }
    }

    pub fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        self.imp.conform(x)
    }

    pub fn is_valid(&self, x: &Value) -> Result<bool, SpecError> {
        Ok(self.conform(x)?.is_valid())
    }

    pub fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        self.imp.unform(y)
    }

    pub fn describe(&self) -> Value {
        self.imp.describe()
    }

    pub fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        self.imp.explain(path, via, in_, x)
    }

    pub(crate) fn gen_inner(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        if let Some(gfn) = &self.gfn {
            return Ok(Some(gfn()));
        }
        self.imp.gen(overrides, path, rmap)
    }

    pub(crate) fn as_fspec(&self) -> Option<&crate::fspec::FSpec> {
        self.imp.as_fspec()
    }
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Spec({})", form_str(&self.describe()))
    }
}

/// A reference to a spec: inline, by registered name, or a regex op.
///
/// Composite specs hold these rather than resolved handles so that name
/// references stay late-bound (recursion) and regex ops can splice.
#[derive(Clone)]
pub enum SpecRef {
    Spec(Spec),
    Named(Name),
    Re(Arc<RegexOp>),
}

impl From<Spec> for SpecRef {
    fn from(s: Spec) -> SpecRef {
        SpecRef::Spec(s)
    }
}

impl From<Name> for SpecRef {
    fn from(n: Name) -> SpecRef {
        SpecRef::Named(n)
    }
}

impl From<Arc<RegexOp>> for SpecRef {
    fn from(r: Arc<RegexOp>) -> SpecRef {
        SpecRef::Re(r)
    }
}

impl SpecRef {
    /// Resolve to an operable spec. Name chains are walked through the
    /// registry; a dangling name is a usage error. Regex ops are wrapped in
    /// the non-splicing adapter.
    pub fn reify(&self) -> Result<Spec, SpecError> {
        match self {
            SpecRef::Spec(s) => Ok(s.clone()),
            SpecRef::Named(n) => {
                registry::get_spec(n).ok_or_else(|| SpecError::UnresolvableName(n.clone()))
            }
            SpecRef::Re(r) => Ok(crate::regex::into_spec(r.clone())),
        }
    }

    /// Symbolic form. Name references describe as the name itself, never as
    /// the unrolled tree.
    pub fn describe(&self) -> Value {
        match self {
            SpecRef::Spec(s) => s.describe(),
            SpecRef::Named(n) => Value::String(n.to_string()),
            SpecRef::Re(r) => crate::regex::op_describe(r),
        }
    }
}

impl fmt::Debug for SpecRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpecRef({})", form_str(&self.describe()))
    }
}

/// Explain `x` against a sub-spec, extending `via` when the reference is
/// named.
pub(crate) fn explain_1(
    sref: &SpecRef,
    path: &Path,
    via: &[Name],
    in_: &Path,
    x: &Value,
) -> Result<Vec<Problem>, SpecError> {
    let spec = sref.reify()?;
    let mut via = via.to_vec();
    if let Some(n) = spec.name() {
        via.push(n.clone());
    }
    spec.explain(path, &via, in_, x)
}

/// Thread `x` through each pred's conform, left to right.
pub(crate) fn and_preds(x: &Value, preds: &[SpecRef]) -> Result<Conformed, SpecError> {
    let mut cur = x.clone();
    for p in preds {
        match p.reify()?.conform(&cur)? {
            Conformed::Invalid => return Ok(Conformed::Invalid),
            Conformed::Valid(v) => cur = v,
        }
    }
    Ok(Conformed::Valid(cur))
}

/// Thread `x` through preds and explain the first failure with the value as
/// conformed so far.
pub(crate) fn explain_pred_list(
    preds: &[SpecRef],
    path: &Path,
    via: &[Name],
    in_: &Path,
    x: &Value,
) -> Result<Vec<Problem>, SpecError> {
    let mut cur = x.clone();
    for p in preds {
        match p.reify()?.conform(&cur)? {
            Conformed::Valid(v) => cur = v,
            Conformed::Invalid => return explain_1(p, path, via, in_, &cur),
        }
    }
    Ok(Vec::new())
}

/// The single generator-descent choke point: override by name, then by path,
/// then the spec's own generator; the result is filtered by validity.
///
/// No generator at all is the usage error `NoGenerator`.
pub(crate) fn gensub(
    sref: &SpecRef,
    overrides: &Overrides,
    path: &Path,
    rmap: &RecursionMap,
    form: &Value,
) -> Result<Gen, SpecError> {
    let spec = sref.reify()?;
    let g = match overrides.lookup(spec.name(), path) {
        Some(gfn) => Some(gfn()),
        None => spec.gen_inner(overrides, path, rmap)?,
    };
    match g {
        Some(g) => {
            let vspec = spec.clone();
            Ok(g.such_that("generated value conforms", move |v| {
                vspec.conform(v).map(|c| c.is_valid()).unwrap_or(false)
            }))
        }
        None => Err(SpecError::NoGenerator {
            path: path_str(path),
            form: form_str(form),
        }),
    }
}

/// Path segment for a dispatch or branch value: strings verbatim, anything
/// else in its JSON rendering.
pub(crate) fn seg_for_value(v: &Value) -> PathSeg {
    match v {
        Value::String(s) => PathSeg::Key(s.clone()),
        other => PathSeg::Key(other.to_string()),
    }
}
