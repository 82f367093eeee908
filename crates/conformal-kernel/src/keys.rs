//! Keyed-map specs.
//!
//! Key specs validate map shape (presence of required keys, with `and`/`or`
//! groups) and conform every present key whose spec-name is registered.
//! Unqualified (`*_un`) declarations name the spec by its qualified name but
//! check presence by the bare local name.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::registry;
use crate::spec::{
    explain_1, gensub, Conformed, Overrides, RecursionMap, Spec, SpecId, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A required-key expression: a key, or a logical group of them.
#[derive(Debug, Clone)]
pub enum KeyReq {
    Key(Name),
    And(Vec<KeyReq>),
    Or(Vec<KeyReq>),
}

impl KeyReq {
    fn holds(&self, obj: &Map<String, Value>, unqualified: bool) -> bool {
        match self {
            KeyReq::Key(name) => obj.contains_key(presence_key(name, unqualified)),
            KeyReq::And(parts) => parts.iter().all(|p| p.holds(obj, unqualified)),
            KeyReq::Or(parts) => parts.iter().any(|p| p.holds(obj, unqualified)),
        }
    }

    fn form(&self, unqualified: bool) -> Value {
        match self {
            KeyReq::Key(name) => json!(["contains?", "%", presence_key(name, unqualified)]),
            KeyReq::And(parts) => {
                let mut form = vec![json!("and")];
                form.extend(parts.iter().map(|p| p.form(unqualified)));
                Value::Array(form)
            }
            KeyReq::Or(parts) => {
                let mut form = vec![json!("or")];
                form.extend(parts.iter().map(|p| p.form(unqualified)));
                Value::Array(form)
            }
        }
    }

    fn leaves<'a>(&'a self, out: &mut Vec<&'a Name>) {
        match self {
            KeyReq::Key(name) => out.push(name),
            KeyReq::And(parts) | KeyReq::Or(parts) => {
                for p in parts {
                    p.leaves(out);
                }
            }
        }
    }
}

fn presence_key(name: &Name, unqualified: bool) -> &str {
    if unqualified {
        name.local()
    } else {
        name.as_str()
    }
}

/// Declaration for a keys spec.
#[derive(Debug, Clone, Default)]
pub struct KeysDecl {
    pub req: Vec<KeyReq>,
    pub opt: Vec<Name>,
    pub req_un: Vec<KeyReq>,
    pub opt_un: Vec<Name>,
}

struct KeysSpec {
    decl: KeysDecl,
    /// Bare local name -> qualified spec name, for the `*_un` declarations.
    un_lookup: BTreeMap<String, Name>,
    id: SpecId,
}

impl KeysSpec {
    /// The spec-name a present map key checks against, if any.
    fn spec_name(&self, key: &str) -> Option<Name> {
        if let Some(qualified) = self.un_lookup.get(key) {
            return Some(qualified.clone());
        }
        Name::parse(key).ok()
    }

    fn key_spec(&self, key: &str) -> Option<(Name, Spec)> {
        let name = self.spec_name(key)?;
        let spec = registry::get_spec(&name)?;
        Some((name, spec))
    }

    fn failed_groups(&self, obj: &Map<String, Value>) -> Vec<Value> {
        let mut failed = Vec::new();
        for group in &self.decl.req {
            if !group.holds(obj, false) {
                failed.push(group.form(false));
            }
        }
        for group in &self.decl.req_un {
            if !group.holds(obj, true) {
                failed.push(group.form(true));
            }
        }
        failed
    }

    /// (presence key, spec name) rows for generation: every key mentioned in
    /// a required group is generated; optional keys may be dropped.
    fn gen_rows(&self) -> (Vec<(String, Name)>, Vec<(String, Name)>) {
        let mut required = Vec::new();
        for group in &self.decl.req {
            let mut leaves = Vec::new();
            group.leaves(&mut leaves);
            for name in leaves {
                required.push((name.as_str().to_string(), name.clone()));
            }
        }
        for group in &self.decl.req_un {
            let mut leaves = Vec::new();
            group.leaves(&mut leaves);
            for name in leaves {
                required.push((name.local().to_string(), name.clone()));
            }
        }
        let mut optional = Vec::new();
        for name in &self.decl.opt {
            optional.push((name.as_str().to_string(), name.clone()));
        }
        for name in &self.decl.opt_un {
            optional.push((name.local().to_string(), name.clone()));
        }
        (required, optional)
    }
}

impl SpecImpl for KeysSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        let Some(obj) = x.as_object() else {
            return Ok(Conformed::Invalid);
        };
        if !self.failed_groups(obj).is_empty() {
            return Ok(Conformed::Invalid);
        }
        let mut out = obj.clone();
        for (key, value) in obj {
            if let Some((_, spec)) = self.key_spec(key) {
                match spec.conform(value)? {
                    Conformed::Invalid => return Ok(Conformed::Invalid),
                    Conformed::Valid(cv) => {
                        out.insert(key.clone(), cv);
                    }
                }
            }
        }
        Ok(Conformed::Valid(Value::Object(out)))
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        let Some(obj) = y.as_object() else {
            return Ok(y.clone());
        };
        let mut out = obj.clone();
        for (key, value) in obj {
            if let Some((_, spec)) = self.key_spec(key) {
                out.insert(key.clone(), spec.unform(value)?);
            }
        }
        Ok(Value::Object(out))
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        let Some(obj) = x.as_object() else {
            return Ok(vec![Problem::new(
                path.clone(),
                json!("map?"),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]);
        };
        let mut problems = Vec::new();
        for form in self.failed_groups(obj) {
            problems.push(Problem::new(
                path.clone(),
                form,
                x.clone(),
                via.to_vec(),
                in_.clone(),
            ));
        }
        for (key, value) in obj {
            let Some((name, spec)) = self.key_spec(key) else {
                continue;
            };
            if spec.conform(value)?.is_valid() {
                continue;
            }
            let mut sub_path = path.clone();
            sub_path.push(PathSeg::Key(key.clone()));
            let mut sub_in = in_.clone();
            sub_in.push(PathSeg::Key(key.clone()));
            problems.extend(explain_1(
                &SpecRef::Named(name),
                &sub_path,
                via,
                &sub_in,
                value,
            )?);
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
        let (required, optional) = self.gen_rows();
        let mut entries = Vec::new();
        let mut opt_keys = Vec::new();
        for (key, name) in required {
            let mut key_path = path.clone();
            key_path.push(PathSeg::Key(key.clone()));
            let g = gensub(
                &SpecRef::Named(name.clone()),
                overrides,
                &key_path,
                &rmap,
                &Value::String(name.to_string()),
            )?;
            entries.push((key, g));
        }
        for (key, name) in optional {
            let seg = PathSeg::Key(key.clone());
            if rmap.over_limit(self.id, path, &seg) {
                continue;
            }
            let mut key_path = path.clone();
            key_path.push(seg);
            let g = gensub(
                &SpecRef::Named(name.clone()),
                overrides,
                &key_path,
                &rmap,
                &Value::String(name.to_string()),
            )?;
            entries.push((key.clone(), g));
            opt_keys.push(key);
        }
        // Generate the full map plus one mask bit per optional key, then
        // strip the unselected optional keys.
        let mut parts = vec![Gen::hash_map(entries)];
        for _ in &opt_keys {
            parts.push(Gen::boolean());
        }
        Ok(Some(Gen::tuple(parts).fmap(move |v| {
            let Some(items) = v.as_array() else {
                return v;
            };
            let Some(Value::Object(full)) = items.first() else {
                return v;
            };
            let mut out = full.clone();
            for (i, key) in opt_keys.iter().enumerate() {
                let keep = items
                    .get(i + 1)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if !keep {
                    out.remove(key);
                }
            }
            Value::Object(out)
        })))
    }

    fn describe(&self) -> Value {
        let mut form = vec![json!("keys")];
        if !self.decl.req.is_empty() {
            form.push(json!(":req"));
            form.push(Value::Array(
                self.decl.req.iter().map(|g| req_form(g)).collect(),
            ));
        }
        if !self.decl.opt.is_empty() {
            form.push(json!(":opt"));
            form.push(Value::Array(
                self.decl.opt.iter().map(|n| json!(n.as_str())).collect(),
            ));
        }
        if !self.decl.req_un.is_empty() {
            form.push(json!(":req-un"));
            form.push(Value::Array(
                self.decl.req_un.iter().map(|g| req_form(g)).collect(),
            ));
        }
        if !self.decl.opt_un.is_empty() {
            form.push(json!(":opt-un"));
            form.push(Value::Array(
                self.decl.opt_un.iter().map(|n| json!(n.as_str())).collect(),
            ));
        }
        Value::Array(form)
    }
}

fn req_form(group: &KeyReq) -> Value {
    match group {
        KeyReq::Key(name) => json!(name.as_str()),
        KeyReq::And(parts) => {
            let mut form = vec![json!("and")];
            form.extend(parts.iter().map(req_form));
            Value::Array(form)
        }
        KeyReq::Or(parts) => {
            let mut form = vec![json!("or")];
            form.extend(parts.iter().map(req_form));
            Value::Array(form)
        }
    }
}

/// Build a keys spec from its declaration.
pub fn keys(decl: KeysDecl) -> Spec {
    let mut un_lookup = BTreeMap::new();
    for group in &decl.req_un {
        let mut leaves = Vec::new();
        group.leaves(&mut leaves);
        for name in leaves {
            un_lookup.insert(name.local().to_string(), name.clone());
        }
    }
    for name in &decl.opt_un {
        un_lookup.insert(name.local().to_string(), name.clone());
    }
    Spec::new(KeysSpec {
        decl,
        un_lookup,
        id: SpecId::fresh(),
    })
}
