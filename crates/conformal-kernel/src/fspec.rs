//! Function contracts.
//!
//! An fspec holds up to three sub-specs: `args` (usually a regex over the
//! argument sequence), `ret`, and `func` (a predicate over the map
//! `{"args": conformed_args, "ret": conformed_ret}`). The candidate value is
//! the qualified name of a registered callable; conform runs generative
//! trials against the current binding.

use crate::config;
use crate::error::SpecError;
use crate::instrument::{self, CallFn};
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::spec::{
    explain_1, gensub, Conformed, Overrides, RecursionMap, Spec, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Value};
use std::sync::Arc;

/// Declaration for a function contract.
#[derive(Clone, Default)]
pub struct FSpecDecl {
    pub args: Option<SpecRef>,
    pub ret: Option<SpecRef>,
    pub func: Option<SpecRef>,
}

pub struct FSpec {
    args: Option<SpecRef>,
    ret: Option<SpecRef>,
    func: Option<SpecRef>,
}

/// How one generative trial went wrong.
enum TrialFault {
    Args(Vec<Value>),
    Call(Vec<Value>, String),
    Ret(Vec<Value>, Value),
    Func(Vec<Value>, Value),
}

impl FSpec {
    pub(crate) fn args(&self) -> Option<&SpecRef> {
        self.args.as_ref()
    }

    fn sample_args(&self) -> Result<Vec<Vec<Value>>, SpecError> {
        let Some(args) = &self.args else {
            return Ok(Vec::new());
        };
        let g = gensub(
            args,
            &Overrides::new(),
            &Path::new(),
            &RecursionMap::new(),
            &args.describe(),
        )?;
        let samples = g.sample(config::fspec_iterations())?;
        Ok(samples
            .into_iter()
            .map(|s| match s {
                Value::Array(items) => items,
                other => vec![other],
            })
            .collect())
    }

    /// Run the generative trials; `None` means every trial passed.
    fn find_fault(&self, f: &CallFn) -> Result<Option<TrialFault>, SpecError> {
        for args in self.sample_args()? {
            let argsv = Value::Array(args.clone());
            let cargs = match &self.args {
                Some(a) => match a.reify()?.conform(&argsv)? {
                    Conformed::Invalid => return Ok(Some(TrialFault::Args(args))),
                    Conformed::Valid(v) => v,
                },
                None => argsv.clone(),
            };
            let ret = match f(&args) {
                Ok(v) => v,
                Err(e) => return Ok(Some(TrialFault::Call(args, e.to_string()))),
            };
            let cret = match &self.ret {
                Some(r) => match r.reify()?.conform(&ret)? {
                    Conformed::Invalid => return Ok(Some(TrialFault::Ret(args, ret))),
                    Conformed::Valid(v) => v,
                },
                None => ret.clone(),
            };
            if let Some(fr) = &self.func {
                let pair = json!({"args": cargs, "ret": cret});
                if !fr.reify()?.conform(&pair)?.is_valid() {
                    return Ok(Some(TrialFault::Func(args, pair)));
                }
            }
        }
        Ok(None)
    }

    /// A callable that asserts its args conform and returns a generated
    /// `ret` value. Used by instrumentation stubs.
    pub fn stub(&self, name: &Name, overrides: &Overrides) -> Result<CallFn, SpecError> {
        let Some(ret) = self.ret.clone() else {
            return Err(SpecError::NoGenerator {
                path: "[]".to_string(),
                form: "fspec :ret".to_string(),
            });
        };
        let args = self.args.clone();
        let name = name.clone();
        let overrides = overrides.clone();
        Ok(Arc::new(move |call_args: &[Value]| {
            if let Some(a) = &args {
                let argsv = Value::Array(call_args.to_vec());
                let spec = a.reify()?;
                if !spec.conform(&argsv)?.is_valid() {
                    let problems = spec.explain(&Path::new(), &[], &Path::new(), &argsv)?;
                    return Err(SpecError::InstrumentCheckFailed {
                        name: name.clone(),
                        problems,
                        args: call_args.to_vec(),
                    });
                }
            }
            let g = gensub(
                &ret,
                &overrides,
                &Path::new(),
                &RecursionMap::new(),
                &ret.describe(),
            )?;
            Ok(g.generate()?)
        }))
    }

    fn resolve_callable(x: &Value) -> Option<(Name, CallFn)> {
        let name = x.as_str().and_then(|s| Name::parse(s).ok())?;
        let f = instrument::lookup(&name)?;
        Some((name, f))
    }
}

impl SpecImpl for FSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        let Some((_, f)) = FSpec::resolve_callable(x) else {
            return Ok(Conformed::Invalid);
        };
        match self.find_fault(&f)? {
            None => Ok(Conformed::Valid(x.clone())),
            Some(_) => Ok(Conformed::Invalid),
        }
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        Ok(y.clone())
    }

    /// Re-runs the generative search, so a fault found here was produced by
    /// fresh samples and may differ from (or miss) the one conform saw.
    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        let Some((_, f)) = FSpec::resolve_callable(x) else {
            return Ok(vec![Problem::new(
                path.clone(),
                json!("callable?"),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]);
        };
        let Some(fault) = self.find_fault(&f)? else {
            return Ok(Vec::new());
        };
        match fault {
            TrialFault::Args(args) => {
                let Some(a) = &self.args else {
                    return Ok(Vec::new());
                };
                let mut sub_path = path.clone();
                sub_path.push(PathSeg::from("args"));
                explain_1(a, &sub_path, via, in_, &Value::Array(args))
            }
            TrialFault::Call(args, message) => {
                let mut problem = Problem::new(
                    path.clone(),
                    json!(["apply", "fn"]),
                    Value::Array(args),
                    via.to_vec(),
                    in_.clone(),
                )
                .with_reason(message);
                problem
                    .extra
                    .insert("fn".to_string(), x.clone());
                Ok(vec![problem])
            }
            TrialFault::Ret(_, ret) => {
                let Some(r) = &self.ret else {
                    return Ok(Vec::new());
                };
                let mut sub_path = path.clone();
                sub_path.push(PathSeg::from("ret"));
                explain_1(r, &sub_path, via, in_, &ret)
            }
            TrialFault::Func(_, pair) => {
                let Some(fr) = &self.func else {
                    return Ok(Vec::new());
                };
                let mut sub_path = path.clone();
                sub_path.push(PathSeg::from("fn"));
                explain_1(fr, &sub_path, via, in_, &pair)
            }
        }
    }

    fn gen(
        &self,
        _overrides: &Overrides,
        _path: &Path,
        _rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        // Callables are not values in this model; stubs are reachable
        // through instrumentation.
        Ok(None)
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("fspec")];
        if let Some(a) = &self.args {
            form.push(json!(":args"));
            form.push(a.describe());
        }
        if let Some(r) = &self.ret {
            form.push(json!(":ret"));
            form.push(r.describe());
        }
        if let Some(f) = &self.func {
            form.push(json!(":fn"));
            form.push(f.describe());
        }
        Value::Array(form)
    }

    fn as_fspec(&self) -> Option<&FSpec> {
        Some(self)
    }
}

/// Build a function contract spec.
pub fn fspec(decl: FSpecDecl) -> Spec {
    Spec::new(FSpec {
        args: decl.args,
        ret: decl.ret,
        func: decl.func,
    })
}

/// Sample a registered callable through its contract: pairs of generated
/// argument lists and the returns they produced.
pub fn exercise_fn(name: &Name, n: usize) -> Result<Vec<(Vec<Value>, Value)>, SpecError> {
    let spec = crate::registry::get_spec(name)
        .ok_or_else(|| SpecError::UnresolvableName(name.clone()))?;
    let Some(fs) = spec.as_fspec() else {
        return Err(SpecError::UnresolvableName(name.clone()));
    };
    let Some(args) = fs.args() else {
        return Ok(Vec::new());
    };
    let f = instrument::lookup(name).ok_or_else(|| SpecError::UnknownCallable(name.clone()))?;
    let g = gensub(
        args,
        &Overrides::new(),
        &Path::new(),
        &RecursionMap::new(),
        &args.describe(),
    )?;
    let mut out = Vec::with_capacity(n);
    for sample in g.sample(n)? {
        let args = match sample {
            Value::Array(items) => items,
            other => vec![other],
        };
        let ret = f(&args)?;
        out.push((args, ret));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::defn;
    use crate::pred;
    use crate::regex::cat;

    fn int_to_int_decl() -> FSpecDecl {
        FSpecDecl {
            args: Some(SpecRef::Re(cat(vec![("x", pred::int().into())]))),
            ret: Some(pred::int().into()),
            func: Some(
                pred::pred("ret-gte-x", |v| {
                    let ret = v.get("ret").and_then(Value::as_i64);
                    let x = v
                        .get("args")
                        .and_then(|a| a.get("x"))
                        .and_then(Value::as_i64);
                    match (ret, x) {
                        (Some(r), Some(x)) => r >= x,
                        _ => false,
                    }
                })
                .into(),
            ),
        }
    }

    #[test]
    fn a_satisfying_callable_conforms_to_itself() {
        defn("fspec.test/incr", Arc::new(|args: &[Value]| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x + 1))
        }))
        .unwrap();
        let s = fspec(int_to_int_decl());
        assert_eq!(
            s.conform(&json!("fspec.test/incr")).unwrap(),
            Conformed::Valid(json!("fspec.test/incr"))
        );
    }

    #[test]
    fn a_violating_callable_is_invalid() {
        defn("fspec.test/shrink", Arc::new(|args: &[Value]| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x - 1))
        }))
        .unwrap();
        let s = fspec(int_to_int_decl());
        assert_eq!(
            s.conform(&json!("fspec.test/shrink")).unwrap(),
            Conformed::Invalid
        );
        let problems = s
            .explain(&vec![], &[], &vec![], &json!("fspec.test/shrink"))
            .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].path, vec![PathSeg::from("fn")]);
    }

    #[test]
    fn a_bad_return_type_is_invalid() {
        defn("fspec.test/stringy", Arc::new(|_: &[Value]| Ok(json!("nope"))))
            .unwrap();
        let s = fspec(FSpecDecl {
            args: Some(SpecRef::Re(cat(vec![("x", pred::int().into())]))),
            ret: Some(pred::int().into()),
            func: None,
        });
        assert_eq!(
            s.conform(&json!("fspec.test/stringy")).unwrap(),
            Conformed::Invalid
        );
    }

    #[test]
    fn unknown_callables_are_invalid_data() {
        let s = fspec(int_to_int_decl());
        assert_eq!(
            s.conform(&json!("fspec.test/nowhere")).unwrap(),
            Conformed::Invalid
        );
        assert_eq!(s.conform(&json!(42)).unwrap(), Conformed::Invalid);
    }

    #[test]
    fn stubs_generate_conforming_returns() {
        let s = fspec(int_to_int_decl());
        let fs = s.as_fspec().unwrap();
        let stub = fs
            .stub(&Name::parse("fspec.test/stub").unwrap(), &Overrides::new())
            .unwrap();
        let ret = stub(&[json!(3)]).unwrap();
        assert!(ret.is_i64());
        assert!(matches!(
            stub(&[json!("not-an-int")]),
            Err(SpecError::InstrumentCheckFailed { .. })
        ));
    }
}
