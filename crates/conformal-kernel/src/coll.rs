//! Collection specs: fixed tuples, sampled validation, full conformance.
//!
//! `every` proves membership on a bounded sample and returns the input
//! untouched; `coll_of`/`map_of` conform every element and rebuild the
//! collection. Collection kinds are arrays and maps; a map viewed as a
//! collection yields `[key, value]` pairs.

use crate::config;
use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::spec::{
    explain_1, gensub, Conformed, Overrides, RecursionMap, Spec, SpecImpl, SpecRef,
};
use crate::tuple::tuple;
use conformal_gen::Gen;
use serde_json::{json, Map, Value};

/// The collection kinds the value model distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollKind {
    Vector,
    Map,
}

/// Options shared by `every`, `coll_of`, `map_of`, `every_kv`.
#[derive(Clone)]
pub struct EveryOpts {
    pub kind: Option<CollKind>,
    pub count: Option<usize>,
    pub min_count: Option<usize>,
    pub max_count: Option<usize>,
    pub distinct: bool,
    /// Rebuild target for `coll_of`/`map_of`; defaults to the input's kind.
    pub into: Option<CollKind>,
    /// Also conform map keys when rebuilding.
    pub conform_keys: bool,
    /// Upper size bound for generated collections without explicit counts.
    pub gen_max: usize,
}

impl Default for EveryOpts {
    fn default() -> EveryOpts {
        EveryOpts {
            kind: None,
            count: None,
            min_count: None,
            max_count: None,
            distinct: false,
            into: None,
            conform_keys: false,
            gen_max: 20,
        }
    }
}

struct EverySpec {
    pred: SpecRef,
    form: Value,
    head: &'static str,
    opts: EveryOpts,
    conform_all: bool,
}

impl EverySpec {
    fn len_of(x: &Value) -> Option<usize> {
        match x {
            Value::Array(a) => Some(a.len()),
            Value::Object(m) => Some(m.len()),
            _ => None,
        }
    }

    /// The failing collection-level predicate form, if any.
    fn coll_problem(&self, x: &Value) -> Option<Value> {
        let len = match (self.opts.kind, x) {
            (Some(CollKind::Vector), Value::Array(a)) => a.len(),
            (Some(CollKind::Vector), _) => return Some(json!("vector?")),
            (Some(CollKind::Map), Value::Object(m)) => m.len(),
            (Some(CollKind::Map), _) => return Some(json!("map?")),
            (None, _) => match Self::len_of(x) {
                Some(len) => len,
                None => return Some(json!("coll?")),
            },
        };
        if let Some(count) = self.opts.count {
            if len != count {
                return Some(json!(["=", count, ["count", "%"]]));
            }
        }
        if self.opts.min_count.is_some() || self.opts.max_count.is_some() {
            let min = self.opts.min_count.unwrap_or(0);
            let max = self.opts.max_count.unwrap_or(usize::MAX);
            if len < min || len > max {
                return Some(json!([
                    "<=",
                    self.opts.min_count.unwrap_or(0),
                    ["count", "%"],
                    self.opts.max_count.map(Value::from).unwrap_or(json!("max"))
                ]));
            }
        }
        if self.opts.distinct {
            if let Value::Array(a) = x {
                let has_dup = a
                    .iter()
                    .enumerate()
                    .any(|(i, v)| a[..i].contains(v));
                if !a.is_empty() && has_dup {
                    return Some(json!(["distinct?", "%"]));
                }
            }
        }
        None
    }

    /// Elements in traversal order with their addressing segment.
    fn elements(x: &Value) -> Vec<(PathSeg, Value)> {
        match x {
            Value::Array(a) => a
                .iter()
                .enumerate()
                .map(|(i, v)| (PathSeg::Index(i), v.clone()))
                .collect(),
            Value::Object(m) => m
                .iter()
                .map(|(k, v)| (PathSeg::Key(k.clone()), json!([k, v])))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn rebuild_target(&self, x: &Value) -> CollKind {
        self.opts.into.unwrap_or(match x {
            Value::Object(_) => CollKind::Map,
            _ => CollKind::Vector,
        })
    }
}

impl SpecImpl for EverySpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        if self.coll_problem(x).is_some() {
            return Ok(Conformed::Invalid);
        }
        let spec = self.pred.reify()?;
        if !self.conform_all {
            // Sampled validation: step across indexed input, prefix of maps.
            let limit = config::coll_check_limit();
            match x {
                Value::Array(a) => {
                    // Ceiling step keeps the sample within the check limit.
                    let step = a.len().div_ceil(limit).max(1);
                    let mut i = 0;
                    while i < a.len() {
                        if !spec.conform(&a[i])?.is_valid() {
                            return Ok(Conformed::Invalid);
                        }
                        i += step;
                    }
                }
                Value::Object(m) => {
                    for (i, (k, v)) in m.iter().enumerate() {
                        if i >= limit {
                            break;
                        }
                        if !spec.conform(&json!([k, v]))?.is_valid() {
                            return Ok(Conformed::Invalid);
                        }
                    }
                }
                _ => return Ok(Conformed::Invalid),
            }
            return Ok(Conformed::Valid(x.clone()));
        }
        // Full conformance: rebuild into the target kind.
        match self.rebuild_target(x) {
            CollKind::Vector => {
                let mut out = Vec::new();
                for (_, elem) in Self::elements(x) {
                    match spec.conform(&elem)? {
                        Conformed::Invalid => return Ok(Conformed::Invalid),
                        Conformed::Valid(cv) => out.push(cv),
                    }
                }
                Ok(Conformed::Valid(Value::Array(out)))
            }
            CollKind::Map => {
                let mut out = Map::new();
                for (seg, elem) in Self::elements(x) {
                    let Conformed::Valid(cv) = spec.conform(&elem)? else {
                        return Ok(Conformed::Invalid);
                    };
                    let Some(pair) = cv.as_array().filter(|p| p.len() == 2) else {
                        return Ok(Conformed::Invalid);
                    };
                    let key = if self.opts.conform_keys {
                        match &pair[0] {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }
                    } else {
                        match seg {
                            PathSeg::Key(k) => k,
                            PathSeg::Index(_) => match &pair[0] {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            },
                        }
                    };
                    out.insert(key, pair[1].clone());
                }
                Ok(Conformed::Valid(Value::Object(out)))
            }
        }
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        if !self.conform_all {
            return Ok(y.clone());
        }
        let spec = self.pred.reify()?;
        match y {
            Value::Array(a) => {
                let mut out = Vec::with_capacity(a.len());
                for elem in a {
                    out.push(spec.unform(elem)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(m) => {
                let mut out = Map::new();
                for (k, v) in m {
                    let pair = spec.unform(&json!([k, v]))?;
                    match pair.as_array().filter(|p| p.len() == 2) {
                        Some(p) => {
                            let key = match &p[0] {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            };
                            out.insert(key, p[1].clone());
                        }
                        None => {
                            out.insert(k.clone(), v.clone());
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        if let Some(form) = self.coll_problem(x) {
            return Ok(vec![Problem::new(
                path.clone(),
                form,
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]);
        }
        let spec = self.pred.reify()?;
        let limit = config::coll_error_limit();
        let mut problems = Vec::new();
        for (seg, elem) in Self::elements(x) {
            if problems.len() >= limit {
                break;
            }
            if spec.conform(&elem)?.is_valid() {
                continue;
            }
            let mut sub_in = in_.clone();
            sub_in.push(seg);
            problems.extend(explain_1(&self.pred, path, via, &sub_in, &elem)?);
        }
        problems.truncate(limit);
        Ok(problems)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let pgen = gensub(&self.pred, overrides, path, rmap, &self.form)?;
        let (min, max) = match self.opts.count {
            Some(c) => (c, c),
            None => {
                let min = self.opts.min_count.unwrap_or(0);
                let max = self.opts.max_count.unwrap_or(min.max(self.opts.gen_max));
                (min, max)
            }
        };
        let base = if self.opts.distinct {
            Gen::vector_distinct(pgen, min, max)
        } else {
            Gen::vector_of(pgen, min, max)
        };
        let target = self.opts.into.or(self.opts.kind).unwrap_or(CollKind::Vector);
        Ok(Some(match target {
            CollKind::Vector => base,
            CollKind::Map => base.fmap(|v| {
                let mut out = Map::new();
                for elem in v.as_array().cloned().unwrap_or_default() {
                    if let Some(pair) = elem.as_array().filter(|p| p.len() == 2) {
                        let key = match &pair[0] {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        out.insert(key, pair[1].clone());
                    }
                }
                Value::Object(out)
            }),
        }))
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!(self.head), self.form.clone()];
        if let Some(kind) = self.opts.kind {
            form.push(json!(":kind"));
            form.push(json!(match kind {
                CollKind::Vector => "vector?",
                CollKind::Map => "map?",
            }));
        }
        if let Some(count) = self.opts.count {
            form.push(json!(":count"));
            form.push(json!(count));
        }
        if let Some(min) = self.opts.min_count {
            form.push(json!(":min-count"));
            form.push(json!(min));
        }
        if let Some(max) = self.opts.max_count {
            form.push(json!(":max-count"));
            form.push(json!(max));
        }
        if self.opts.distinct {
            form.push(json!(":distinct"));
            form.push(json!(true));
        }
        Value::Array(form)
    }
}

/// Sampled validation over a collection; conform returns the input as-is.
pub fn every(pred: impl Into<SpecRef>, opts: EveryOpts) -> Spec {
    let pred = pred.into();
    let form = pred.describe();
    Spec::new(EverySpec {
        pred,
        form,
        head: "every",
        opts,
        conform_all: false,
    })
}

/// Conform every element and rebuild the collection.
pub fn coll_of(pred: impl Into<SpecRef>, opts: EveryOpts) -> Spec {
    let pred = pred.into();
    let form = pred.describe();
    Spec::new(EverySpec {
        pred,
        form,
        head: "coll-of",
        opts,
        conform_all: true,
    })
}

/// Map spec over `[key, value]` pairs, rebuilt as a map. Keys pass through
/// verbatim unless `conform_keys` is set.
pub fn map_of(
    kpred: impl Into<SpecRef>,
    vpred: impl Into<SpecRef>,
    mut opts: EveryOpts,
) -> Spec {
    let kpred = kpred.into();
    let vpred = vpred.into();
    let form = json!(["map-of", kpred.describe(), vpred.describe()]);
    opts.kind = Some(CollKind::Map);
    opts.into = Some(CollKind::Map);
    let pair: SpecRef = tuple(vec![kpred, vpred]).into();
    Spec::new(EverySpec {
        pred: pair,
        form,
        head: "map-of",
        opts,
        conform_all: true,
    })
}

/// Sampled variant of [`map_of`]: validates `[key, value]` pairs without
/// rebuilding.
pub fn every_kv(
    kpred: impl Into<SpecRef>,
    vpred: impl Into<SpecRef>,
    mut opts: EveryOpts,
) -> Spec {
    let kpred = kpred.into();
    let vpred = vpred.into();
    let form = json!(["every-kv", kpred.describe(), vpred.describe()]);
    opts.kind = Some(CollKind::Map);
    let pair: SpecRef = tuple(vec![kpred, vpred]).into();
    Spec::new(EverySpec {
        pred: pair,
        form,
        head: "every-kv",
        opts,
        conform_all: false,
    })
}
