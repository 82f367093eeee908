//! Leaf specs: plain predicates and conformers.
//!
//! A predicate spec conforms to the input itself; a conformer returns a
//! transformed value (or invalid) and unforms through an optional inverse.
//! The standard predicates ship with default generators attached.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{form_str, Path, PathSeg, Problem};
use crate::spec::{
    explain_1, gen_fn, Conformed, Overrides, RecursionMap, Spec, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Value};
use std::sync::Arc;

type PredFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
type ConformFn = Arc<dyn Fn(&Value) -> Conformed + Send + Sync>;
type UnformFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

enum LeafKind {
    Predicate(PredFn),
    Conformer {
        f: ConformFn,
        inverse: Option<UnformFn>,
    },
}

struct PredSpec {
    form: Value,
    kind: LeafKind,
}

impl SpecImpl for PredSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        Ok(match &self.kind {
            LeafKind::Predicate(p) => {
                if p(x) {
                    Conformed::Valid(x.clone())
                } else {
                    Conformed::Invalid
                }
            }
            LeafKind::Conformer { f, .. } => f(x),
        })
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        match &self.kind {
            LeafKind::Predicate(_) => Ok(y.clone()),
            LeafKind::Conformer { inverse, .. } => match inverse {
                Some(inv) => Ok(inv(y)),
                None => Err(SpecError::NonInvertible {
                    form: form_str(&self.form),
                }),
            },
        }
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        if self.conform(x)?.is_valid() {
            return Ok(Vec::new());
        }
        Ok(vec![Problem::new(
            path.clone(),
            self.form.clone(),
            x.clone(),
            via.to_vec(),
            in_.clone(),
        )])
    }

    fn gen(
        &self,
        _overrides: &Overrides,
        _path: &Path,
        _rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        Ok(None)
    }

    fn describe(&self) -> Value {
        self.form.clone()
    }
}

/// Wrap a plain predicate as a spec.
pub fn pred(form: &str, f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Spec {
    Spec::new(PredSpec {
        form: Value::String(form.to_string()),
        kind: LeafKind::Predicate(Arc::new(f)),
    })
}

/// Wrap a conforming function (and optional inverse) as a spec.
pub fn conformer(
    form: &str,
    f: impl Fn(&Value) -> Conformed + Send + Sync + 'static,
    inverse: Option<Arc<dyn Fn(&Value) -> Value + Send + Sync>>,
) -> Spec {
    Spec::new(PredSpec {
        form: Value::String(form.to_string()),
        kind: LeafKind::Conformer {
            f: Arc::new(f),
            inverse,
        },
    })
}

// Standard predicates, each with a default generator.

pub fn int() -> Spec {
    pred("int?", |v| v.is_i64() || v.is_u64())
        .with_gen(gen_fn(|| Gen::large_integer(Some(-1_000_000), Some(1_000_000))))
}

pub fn nat_int() -> Spec {
    pred("nat-int?", |v| v.as_i64().map(|n| n >= 0).unwrap_or(v.is_u64()))
        .with_gen(gen_fn(|| Gen::large_integer(Some(0), Some(1_000_000))))
}

pub fn pos_int() -> Spec {
    pred("pos-int?", |v| v.as_i64().map(|n| n > 0).unwrap_or(false))
        .with_gen(gen_fn(|| Gen::large_integer(Some(1), Some(1_000_000))))
}

pub fn number() -> Spec {
    pred("number?", Value::is_number).with_gen(gen_fn(|| {
        Gen::one_of(vec![
            Gen::large_integer(Some(-1_000_000), Some(1_000_000)),
            Gen::double_in(-1e6, 1e6),
        ])
    }))
}

pub fn double() -> Spec {
    pred("double?", Value::is_f64).with_gen(gen_fn(|| Gen::double_in(-1e6, 1e6)))
}

pub fn string() -> Spec {
    pred("string?", Value::is_string).with_gen(gen_fn(Gen::alphanumeric_string))
}

pub fn boolean() -> Spec {
    pred("boolean?", Value::is_boolean).with_gen(gen_fn(Gen::boolean))
}

pub fn null() -> Spec {
    pred("nil?", Value::is_null).with_gen(gen_fn(|| Gen::constant(Value::Null)))
}

pub fn array() -> Spec {
    pred("vector?", Value::is_array)
        .with_gen(gen_fn(|| Gen::vector_of(Gen::any_value(), 0, 4)))
}

pub fn object() -> Spec {
    pred("map?", Value::is_object).with_gen(gen_fn(|| {
        Gen::vector_of(Gen::alphanumeric_string(), 0, 4).bind(|keys| {
            let entries = keys
                .as_array()
                .map(|ks| {
                    ks.iter()
                        .filter_map(|k| k.as_str())
                        .map(|k| (k.to_string(), Gen::any_value()))
                        .collect()
                })
                .unwrap_or_default();
            Gen::hash_map(entries)
        })
    }))
}

/// Strings that parse as namespace-qualified names.
pub fn keyword() -> Spec {
    pred("qualified-keyword?", |v| {
        v.as_str().map(|s| Name::parse(s).is_ok()).unwrap_or(false)
    })
    .with_gen(gen_fn(|| {
        Gen::tuple(vec![Gen::alphanumeric_string(), Gen::alphanumeric_string()]).fmap(|v| {
            let parts = v.as_array().cloned().unwrap_or_default();
            let ns = parts.first().and_then(Value::as_str).unwrap_or("ns");
            let local = parts.get(1).and_then(Value::as_str).unwrap_or("k");
            let ns = if ns.is_empty() { "ns" } else { ns };
            let local = if local.is_empty() { "k" } else { local };
            Value::String(format!("{ns}/{local}"))
        })
    }))
}

pub fn any() -> Spec {
    pred("any?", |_| true).with_gen(gen_fn(Gen::any_value))
}

// Nilable wrapper.

struct NilableSpec {
    inner: SpecRef,
    form: Value,
}

impl SpecImpl for NilableSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        if x.is_null() {
            return Ok(Conformed::Valid(Value::Null));
        }
        self.inner.reify()?.conform(x)
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        if y.is_null() {
            return Ok(Value::Null);
        }
        self.inner.reify()?.unform(y)
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        if self.conform(x)?.is_valid() {
            return Ok(Vec::new());
        }
        let mut pred_path = path.clone();
        pred_path.push(PathSeg::from("pred"));
        let mut problems = explain_1(&self.inner, &pred_path, via, in_, x)?;
        let mut nil_path = path.clone();
        nil_path.push(PathSeg::from("nil"));
        problems.push(Problem::new(
            nil_path,
            json!("nil?"),
            x.clone(),
            via.to_vec(),
            in_.clone(),
        ));
        Ok(problems)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let inner = crate::spec::gensub(&self.inner, overrides, path, rmap, &self.form)?;
        Ok(Some(Gen::one_of(vec![
            Gen::constant(Value::Null),
            inner,
        ])))
    }

    fn describe(&self) -> Value {
        json!(["nilable", self.form])
    }
}

/// Accept `null` or the wrapped spec.
pub fn nilable(inner: impl Into<SpecRef>) -> Spec {
    let inner = inner.into();
    let form = inner.describe();
    Spec::new(NilableSpec { inner, form })
}
