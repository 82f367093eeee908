//! Logical combinators: `all_of` threading, tagged alternation, map merge.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::spec::{
    and_preds, explain_1, explain_pred_list, gensub, Conformed, Overrides, RecursionMap, Spec,
    SpecId, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Map, Value};

struct AndSpec {
    preds: Vec<SpecRef>,
    forms: Vec<Value>,
}

impl SpecImpl for AndSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        and_preds(x, &self.preds)
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let mut cur = y.clone();
        for p in self.preds.iter().rev() {
            cur = p.reify()?.unform(&cur)?;
        }
        Ok(cur)
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        explain_pred_list(&self.preds, path, via, in_, x)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        // The first pred drives generation; the outer validity filter in
        // gensub enforces the rest.
        let Some(first) = self.preds.first() else {
            return Ok(None);
        };
        Ok(Some(gensub(first, overrides, path, rmap, &self.forms[0])?))
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("and")];
        form.extend(self.forms.iter().cloned());
        Value::Array(form)
    }
}

/// Conjunction. Each pred sees the previous pred's conformed output; unform
/// reverses the chain.
pub fn all_of(preds: Vec<SpecRef>) -> Spec {
    let forms = preds.iter().map(SpecRef::describe).collect();
    Spec::new(AndSpec { preds, forms })
}

struct OrSpec {
    keys: Vec<String>,
    preds: Vec<SpecRef>,
    forms: Vec<Value>,
    id: SpecId,
}

impl SpecImpl for OrSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        for (key, p) in self.keys.iter().zip(&self.preds) {
            if let Conformed::Valid(v) = p.reify()?.conform(x)? {
                return Ok(Conformed::Valid(json!([key, v])));
            }
        }
        Ok(Conformed::Invalid)
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let pair = y.as_array().filter(|a| a.len() == 2).ok_or_else(|| {
            SpecError::UnformMismatch {
                form: "or".to_string(),
                val: y.clone(),
            }
        })?;
        let key = pair[0].as_str().unwrap_or_default();
        let idx = self
            .keys
            .iter()
            .position(|k| k == key)
            .ok_or_else(|| SpecError::UnknownBranch {
                key: key.to_string(),
            })?;
        self.preds[idx].reify()?.unform(&pair[1])
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
        let mut problems = Vec::new();
        for (key, p) in self.keys.iter().zip(&self.preds) {
            let mut branch_path = path.clone();
            branch_path.push(PathSeg::Key(key.clone()));
            problems.extend(explain_1(p, &branch_path, via, in_, x)?);
        }
        Ok(problems)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let rmap = rmap.bump(self.id);
        let mut gens = Vec::new();
        for ((key, p), form) in self.keys.iter().zip(&self.preds).zip(&self.forms) {
            let seg = PathSeg::Key(key.clone());
            if rmap.over_limit(self.id, path, &seg) {
                continue;
            }
            let mut branch_path = path.clone();
            branch_path.push(seg);
            gens.push(gensub(p, overrides, &branch_path, &rmap, form)?);
        }
        if gens.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Gen::one_of(gens)))
        }
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("or")];
        for (key, f) in self.keys.iter().zip(&self.forms) {
            form.push(json!(key));
            form.push(f.clone());
        }
        Value::Array(form)
    }
}

/// Tagged alternation. Conform yields `[key, conformed]` for the first
/// matching branch; unform dispatches on the key.
pub fn any_of(branches: Vec<(&str, SpecRef)>) -> Spec {
    let keys = branches.iter().map(|(k, _)| k.to_string()).collect();
    let preds: Vec<SpecRef> = branches.into_iter().map(|(_, p)| p).collect();
    let forms = preds.iter().map(SpecRef::describe).collect();
    Spec::new(OrSpec {
        keys,
        preds,
        forms,
        id: SpecId::fresh(),
    })
}

struct MergeSpec {
    preds: Vec<SpecRef>,
    forms: Vec<Value>,
}

fn merge_values(results: Vec<Value>) -> Value {
    let mut merged = Map::new();
    for v in results {
        if let Value::Object(m) = v {
            merged.extend(m);
        }
    }
    Value::Object(merged)
}

impl SpecImpl for MergeSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        let mut results = Vec::with_capacity(self.preds.len());
        for p in &self.preds {
            match p.reify()?.conform(x)? {
                Conformed::Invalid => return Ok(Conformed::Invalid),
                Conformed::Valid(v) => results.push(v),
            }
        }
        Ok(Conformed::Valid(merge_values(results)))
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let mut results = Vec::with_capacity(self.preds.len());
        for p in self.preds.iter().rev() {
            results.push(p.reify()?.unform(y)?);
        }
        Ok(merge_values(results))
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        let mut problems = Vec::new();
        for p in &self.preds {
            problems.extend(explain_1(p, path, via, in_, x)?);
        }
        Ok(problems)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let mut gens = Vec::new();
        for (p, form) in self.preds.iter().zip(&self.forms) {
            gens.push(gensub(p, overrides, path, rmap, form)?);
        }
        Ok(Some(Gen::tuple(gens).fmap(|v| {
            merge_values(v.as_array().cloned().unwrap_or_default())
        })))
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("merge")];
        form.extend(self.forms.iter().cloned());
        Value::Array(form)
    }
}

/// Conjunction of map-shaped specs. Each conforms the original input; the
/// conformed maps merge left to right. Generation merges sub-generator
/// output rather than sampling an intersection.
pub fn merge(preds: Vec<SpecRef>) -> Spec {
    let forms = preds.iter().map(SpecRef::describe).collect();
    Spec::new(MergeSpec { preds, forms })
}
