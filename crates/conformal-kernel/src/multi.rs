//! Multi-spec: dispatch on a tag computed from the value.
//!
//! The dispatch table is a [`MultiFn`]: a tag function plus method rows
//! mapping dispatch values to specs. Rows are added after construction, so a
//! multi-spec is open for extension the way the registry is.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, Problem};
use crate::spec::{
    explain_1, gensub, seg_for_value, Conformed, Overrides, RecursionMap, Spec, SpecId, SpecImpl,
    SpecRef, INVALID_TOKEN,
};
use conformal_gen::Gen;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

pub type DispatchFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// A named dispatch table.
pub struct MultiFn {
    name: Name,
    dispatch: DispatchFn,
    methods: RwLock<Vec<(Value, SpecRef)>>,
}

impl MultiFn {
    pub fn new(name: Name, dispatch: DispatchFn) -> Arc<MultiFn> {
        Arc::new(MultiFn {
            name,
            dispatch,
            methods: RwLock::new(Vec::new()),
        })
    }

    /// Dispatch on the value under `key`; absent keys dispatch on `null`.
    pub fn on_key(name: Name, key: &str) -> Arc<MultiFn> {
        let key = key.to_string();
        MultiFn::new(
            name,
            Arc::new(move |v| v.get(&key).cloned().unwrap_or(Value::Null)),
        )
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    /// Register (or replace) the method row for `tag`.
    pub fn add_method(&self, tag: Value, spec: impl Into<SpecRef>) {
        let mut rows = self.methods.write().unwrap_or_else(|e| e.into_inner());
        let spec = spec.into();
        if let Some(row) = rows.iter_mut().find(|(t, _)| *t == tag) {
            row.1 = spec;
        } else {
            rows.push((tag, spec));
        }
    }

    fn method_for(&self, tag: &Value) -> Option<SpecRef> {
        let rows = self.methods.read().unwrap_or_else(|e| e.into_inner());
        rows.iter()
            .find(|(t, _)| t == tag)
            .map(|(_, s)| s.clone())
    }

    fn rows(&self) -> Vec<(Value, SpecRef)> {
        self.methods
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// How a generated value advertises its own dispatch tag.
#[derive(Clone)]
pub enum Retag {
    /// Assoc the tag under this key.
    Key(String),
    /// Arbitrary `(value, tag) -> value` rewrite.
    Fn(Arc<dyn Fn(Value, &Value) -> Value + Send + Sync>),
}

impl Retag {
    fn apply(&self, v: Value, tag: &Value) -> Value {
        match self {
            Retag::Key(key) => match v {
                Value::Object(mut m) => {
                    m.insert(key.clone(), tag.clone());
                    Value::Object(m)
                }
                other => other,
            },
            Retag::Fn(f) => f(v, tag),
        }
    }
}

struct MultiSpec {
    mf: Arc<MultiFn>,
    retag: Retag,
    id: SpecId,
}

impl MultiSpec {
    fn form(&self) -> Value {
        json!(["multi-spec", self.mf.name.as_str()])
    }
}

impl SpecImpl for MultiSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        let tag = (self.mf.dispatch)(x);
        match self.mf.method_for(&tag) {
            Some(spec) => spec.reify()?.conform(x),
            None => Ok(Conformed::Invalid),
        }
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let tag = (self.mf.dispatch)(y);
        match self.mf.method_for(&tag) {
            Some(spec) => spec.reify()?.unform(y),
            None => Err(SpecError::NoMethod {
                multi: self.mf.name.clone(),
                tag,
            }),
        }
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        let tag = (self.mf.dispatch)(x);
        let mut tag_path = path.clone();
        tag_path.push(seg_for_value(&tag));
        match self.mf.method_for(&tag) {
            Some(spec) => explain_1(&spec, &tag_path, via, in_, x),
            None => Ok(vec![Problem::new(
                tag_path,
                self.form(),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )
            .with_reason("no method")]),
        }
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        let rmap = rmap.bump(self.id);
        let mut gens = Vec::new();
        for (tag, spec) in self.mf.rows() {
            // A catch-all row keyed by the invalid token is never generated.
            if tag == Value::String(INVALID_TOKEN.to_string()) {
                continue;
            }
            let seg = seg_for_value(&tag);
            if rmap.over_limit(self.id, path, &seg) {
                continue;
            }
            let mut tag_path = path.clone();
            tag_path.push(seg);
            let g = gensub(&spec, overrides, &tag_path, &rmap, &spec.describe())?;
            let retag = self.retag.clone();
            gens.push(g.fmap(move |v| retag.apply(v, &tag)));
        }
        if gens.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Gen::one_of(gens)))
        }
    }

    fn describe(&self) -> Value {
        self.form()
    }
}

/// Build a multi-spec from a dispatch table and a retag policy.
pub fn multi_spec(mf: Arc<MultiFn>, retag: Retag) -> Spec {
    Spec::new(MultiSpec {
        mf,
        retag,
        id: SpecId::fresh(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{keys, KeyReq, KeysDecl};
    use crate::pred;
    use crate::problem::PathSeg;
    use crate::registry::def;

    fn n(s: &str) -> Name {
        Name::parse(s).unwrap()
    }

    fn event_multi() -> Arc<MultiFn> {
        def("multi.test/kind", pred::string()).unwrap();
        def("multi.test/n", pred::int()).unwrap();
        def("multi.test/s", pred::string()).unwrap();
        let mf = MultiFn::on_key(n("multi.test/event"), "kind");
        mf.add_method(
            json!("a"),
            keys(KeysDecl {
                req_un: vec![
                    KeyReq::Key(n("multi.test/kind")),
                    KeyReq::Key(n("multi.test/n")),
                ],
                ..KeysDecl::default()
            }),
        );
        mf.add_method(
            json!("b"),
            keys(KeysDecl {
                req_un: vec![
                    KeyReq::Key(n("multi.test/kind")),
                    KeyReq::Key(n("multi.test/s")),
                ],
                ..KeysDecl::default()
            }),
        );
        mf
    }

    #[test]
    fn conform_dispatches_on_the_tag() {
        let s = multi_spec(event_multi(), Retag::Key("kind".to_string()));
        let ok = json!({"kind": "a", "n": 1});
        assert_eq!(s.conform(&ok).unwrap(), Conformed::Valid(ok.clone()));
        assert_eq!(
            s.conform(&json!({"kind": "a", "s": "x"})).unwrap(),
            Conformed::Invalid
        );
    }

    #[test]
    fn unknown_tags_explain_as_no_method() {
        let s = multi_spec(event_multi(), Retag::Key("kind".to_string()));
        assert_eq!(
            s.conform(&json!({"kind": "z"})).unwrap(),
            Conformed::Invalid
        );
        let problems = s
            .explain(&vec![], &[], &vec![], &json!({"kind": "z"}))
            .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].reason.as_deref(), Some("no method"));
        assert_eq!(problems[0].path, vec![PathSeg::from("z")]);
    }

    #[test]
    fn generation_retags_and_skips_the_catch_all() {
        let mf = event_multi();
        mf.add_method(Value::String(INVALID_TOKEN.to_string()), pred::any());
        let s = multi_spec(mf, Retag::Key("kind".to_string()));
        let g = s
            .gen_inner(&Overrides::new(), &vec![], &RecursionMap::new())
            .unwrap()
            .unwrap();
        for v in g.sample(20).unwrap() {
            let kind = v.get("kind").and_then(Value::as_str).unwrap();
            assert!(kind == "a" || kind == "b", "unexpected tag in {v}");
            assert!(s.conform(&v).unwrap().is_valid(), "bad sample: {v}");
        }
    }
}
