//! Fixed-arity tuple specs.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::spec::{
    explain_1, gensub, Conformed, Overrides, RecursionMap, Spec, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Value};

struct TupleSpec {
    preds: Vec<SpecRef>,
    forms: Vec<Value>,
}

impl TupleSpec {
    fn count_form(&self) -> Value {
        json!(["=", ["count", "%"], self.preds.len()])
    }
}

impl SpecImpl for TupleSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        let Some(arr) = x.as_array() else {
            return Ok(Conformed::Invalid);
        };
        if arr.len() != self.preds.len() {
            return Ok(Conformed::Invalid);
        }
        let mut out = Vec::with_capacity(arr.len());
        for (p, v) in self.preds.iter().zip(arr) {
            match p.reify()?.conform(v)? {
                Conformed::Invalid => return Ok(Conformed::Invalid),
                Conformed::Valid(cv) => out.push(cv),
            }
        }
        Ok(Conformed::Valid(Value::Array(out)))
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let arr = y
            .as_array()
            .filter(|a| a.len() == self.preds.len())
            .ok_or_else(|| SpecError::UnformMismatch {
                form: "tuple".to_string(),
                val: y.clone(),
            })?;
        let mut out = Vec::with_capacity(arr.len());
        for (p, v) in self.preds.iter().zip(arr) {
            out.push(p.reify()?.unform(v)?);
        }
        Ok(Value::Array(out))
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        let Some(arr) = x.as_array() else {
            return Ok(vec![Problem::new(
                path.clone(),
                json!("vector?"),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]);
        };
        if arr.len() != self.preds.len() {
            return Ok(vec![Problem::new(
                path.clone(),
                self.count_form(),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]);
        }
        let mut problems = Vec::new();
        for (i, (p, v)) in self.preds.iter().zip(arr).enumerate() {
            if p.reify()?.conform(v)?.is_valid() {
                continue;
            }
            let mut sub_path = path.clone();
            sub_path.push(PathSeg::Index(i));
            let mut sub_in = in_.clone();
            sub_in.push(PathSeg::Index(i));
            problems.extend(explain_1(p, &sub_path, via, &sub_in, v)?);
        }
        Ok(problems)
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let mut gens = Vec::with_capacity(self.preds.len());
        for (i, (p, form)) in self.preds.iter().zip(&self.forms).enumerate() {
            let mut sub_path = path.clone();
            sub_path.push(PathSeg::Index(i));
            gens.push(gensub(p, overrides, &sub_path, rmap, form)?);
        }
        Ok(Some(Gen::tuple(gens)))
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("tuple")];
        form.extend(self.forms.iter().cloned());
        Value::Array(form)
    }
}

/// Fixed-arity vector: position `i` must conform to `preds[i]`.
pub fn tuple(preds: Vec<SpecRef>) -> Spec {
    let forms = preds.iter().map(SpecRef::describe).collect();
    Spec::new(TupleSpec { preds, forms })
}
