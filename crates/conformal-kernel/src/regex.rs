//! The sequence regex engine.
//!
//! A distinct algebra from specs: `cat`/`alt`/`star`/`plus`/`maybe`/`amp`
//! build a tagged op tree; matching is by Brzozowski derivatives. `deriv`
//! rewrites the tree as each element is consumed, `accept_nil` decides
//! acceptance on empty remainder, and `preturn` assembles the destructured
//! return value.
//!
//! Ops nest by splicing: a name registered directly to a regex op joins the
//! surrounding sequence. The non-splicing adapter [`re_spec`] presents an op
//! as an ordinary spec whose input is one nested sequence.

use crate::error::SpecError;
use crate::name::Name;
use crate::problem::{Path, PathSeg, Problem};
use crate::registry::{self, RegEntry};
use crate::spec::{
    and_preds, explain_1, explain_pred_list, gensub, Conformed, Overrides, RecursionMap, Spec,
    SpecId, SpecImpl, SpecRef,
};
use conformal_gen::Gen;
use serde_json::{json, Value};
use std::sync::Arc;

/// Token standing for "matched, produced nothing" (the empty branch of
/// `maybe`). Internal to the engine; surfaced as `null`.
const NIL_TOKEN: &str = "conformal.kernel/nil";

fn nil_ret() -> Value {
    Value::String(NIL_TOKEN.to_string())
}

fn is_nil_ret(v: &Value) -> bool {
    v.as_str() == Some(NIL_TOKEN)
}

/// One node of the regex op tree.
#[derive(Debug, Clone)]
pub enum RegexOp {
    /// Empty-match acceptor carrying its return value.
    Accept { ret: Value },
    /// A non-regex position: a spec, late-bound name, or inline predicate.
    Leaf { spec: SpecRef, form: Value },
    /// Ordered sequence, optionally tag-keyed.
    Cat {
        ps: Vec<Arc<RegexOp>>,
        ks: Option<Vec<String>>,
        forms: Vec<Value>,
        ret: Value,
        rep_plus: Option<Value>,
    },
    /// Alternation; `maybe` marks the `?` sugar.
    Alt {
        ps: Vec<Arc<RegexOp>>,
        ks: Option<Vec<String>>,
        forms: Vec<Value>,
        id: Option<SpecId>,
        maybe: Option<Value>,
    },
    /// Kleene repetition: `p1` is the derivative in progress, `p2` the
    /// original body. `splice` flattens returns into the surrounding
    /// sequence (the `+` expansion).
    Rep {
        p1: Arc<RegexOp>,
        p2: Arc<RegexOp>,
        ret: Value,
        splice: bool,
        form: Value,
        id: SpecId,
    },
    /// Consume per `p1`, then constrain the result by `ps`.
    Amp {
        p1: Arc<RegexOp>,
        ps: Vec<SpecRef>,
        forms: Vec<Value>,
    },
}

fn accept(ret: Value) -> Arc<RegexOp> {
    Arc::new(RegexOp::Accept { ret })
}

fn is_accept(p: &RegexOp) -> bool {
    matches!(p, RegexOp::Accept { .. })
}

fn accept_ret(p: &RegexOp) -> Value {
    match p {
        RegexOp::Accept { ret } => ret.clone(),
        _ => Value::Null,
    }
}

fn op_id(p: &RegexOp) -> Option<SpecId> {
    match p {
        RegexOp::Alt { id, .. } => *id,
        RegexOp::Rep { id, .. } => Some(*id),
        _ => None,
    }
}

/// A leaf resolved through the registry: either a sub-regex (which splices)
/// or an ordinary spec.
enum Node {
    Re(Arc<RegexOp>),
    Spec(Spec),
}

fn resolve_node(p: &Arc<RegexOp>) -> Result<Node, SpecError> {
    match &**p {
        RegexOp::Leaf { spec, .. } => match spec {
            SpecRef::Re(r) => Ok(Node::Re(Arc::clone(r))),
            SpecRef::Spec(s) => Ok(Node::Spec(s.clone())),
            SpecRef::Named(n) => match registry::lookup_entry(n) {
                Some(RegEntry::Re(r)) => Ok(Node::Re(r)),
                Some(RegEntry::Spec(s)) => Ok(Node::Spec(s.with_name(n.clone()))),
                _ => Err(SpecError::UnresolvableName(n.clone())),
            },
        },
        _ => Ok(Node::Re(Arc::clone(p))),
    }
}

// --- smart constructors -------------------------------------------------

/// Append `rp` to an accumulated return: keyed entries merge into map
/// returns, everything else pushes onto vector returns.
fn conj_ret(ret: &Value, rp: &Value, k: Option<&str>) -> Value {
    match (ret, k) {
        (Value::Object(m), Some(k)) => {
            let mut m = m.clone();
            m.insert(k.to_string(), rp.clone());
            Value::Object(m)
        }
        (Value::Array(a), _) => {
            let mut a = a.clone();
            match k {
                Some(k) => a.push(json!({ k: rp })),
                None => a.push(rp.clone()),
            }
            Value::Array(a)
        }
        _ => rp.clone(),
    }
}

/// Cat constructor: dead children kill the cat; leading accepted children
/// fold their returns; an emptied cat becomes an acceptor.
fn pcat_opt(
    ps: Vec<Option<Arc<RegexOp>>>,
    ks: Option<Vec<String>>,
    forms: Vec<Value>,
    ret: Value,
    rep_plus: Option<Value>,
) -> Option<Arc<RegexOp>> {
    let mut ps: Vec<Arc<RegexOp>> = ps.into_iter().collect::<Option<_>>()?;
    let mut ks = ks;
    let mut forms = forms;
    let mut ret = ret;
    loop {
        if ps.is_empty() {
            return Some(accept(ret));
        }
        if !is_accept(&ps[0]) {
            return Some(Arc::new(RegexOp::Cat {
                ps,
                ks,
                forms,
                ret,
                rep_plus,
            }));
        }
        let rp = accept_ret(&ps[0]);
        let k = ks.as_ref().and_then(|ks| ks.first().cloned());
        if !is_nil_ret(&rp) {
            ret = conj_ret(&ret, &rp, k.as_deref());
        }
        ps.remove(0);
        if let Some(ks) = ks.as_mut() {
            if !ks.is_empty() {
                ks.remove(0);
            }
        }
        if !forms.is_empty() {
            forms.remove(0);
        }
    }
}

/// Alt constructor: dead branches drop out; a single untagged survivor
/// collapses; a single tagged accepted survivor becomes a tagged acceptor.
fn alt_star(
    ps: Vec<Option<Arc<RegexOp>>>,
    ks: Option<Vec<String>>,
    forms: Vec<Value>,
) -> Option<Arc<RegexOp>> {
    let mut kept_ps = Vec::new();
    let mut kept_ks = Vec::new();
    let mut kept_forms = Vec::new();
    for (i, p) in ps.into_iter().enumerate() {
        let Some(p) = p else { continue };
        kept_ps.push(p);
        if let Some(ks) = &ks {
            kept_ks.push(ks[i].clone());
        }
        kept_forms.push(forms.get(i).cloned().unwrap_or(Value::Null));
    }
    if kept_ps.is_empty() {
        return None;
    }
    if kept_ps.len() == 1 && ks.is_none() {
        return kept_ps.pop();
    }
    if kept_ps.len() == 1 && is_accept(&kept_ps[0]) {
        let tagged = json!([kept_ks[0], accept_ret(&kept_ps[0])]);
        return Some(accept(tagged));
    }
    Some(Arc::new(RegexOp::Alt {
        ps: kept_ps,
        ks: ks.map(|_| kept_ks),
        forms: kept_forms,
        id: None,
        maybe: None,
    }))
}

fn alt2(a: Option<Arc<RegexOp>>, b: Option<Arc<RegexOp>>) -> Option<Arc<RegexOp>> {
    match (a, b) {
        (Some(a), Some(b)) => alt_star(vec![Some(a), Some(b)], None, Vec::new()),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Rep constructor; an accepted in-progress derivative folds its return and
/// restarts the body cycle. The id survives derivative construction.
fn rep(
    p1: Option<Arc<RegexOp>>,
    p2: &Arc<RegexOp>,
    ret: &Value,
    splice: bool,
    form: &Value,
    id: SpecId,
) -> Option<Arc<RegexOp>> {
    let p1 = p1?;
    Some(if is_accept(&p1) {
        let mut items = ret.as_array().cloned().unwrap_or_default();
        let rp = accept_ret(&p1);
        if !is_nil_ret(&rp) {
            items.push(rp);
        }
        Arc::new(RegexOp::Rep {
            p1: Arc::clone(p2),
            p2: Arc::clone(p2),
            ret: Value::Array(items),
            splice,
            form: form.clone(),
            id,
        })
    } else {
        Arc::new(RegexOp::Rep {
            p1,
            p2: Arc::clone(p2),
            ret: ret.clone(),
            splice,
            form: form.clone(),
            id,
        })
    })
}

// --- public constructors ------------------------------------------------

fn child(r: SpecRef) -> Arc<RegexOp> {
    match r {
        SpecRef::Re(op) => op,
        other => {
            let form = other.describe();
            Arc::new(RegexOp::Leaf { spec: other, form })
        }
    }
}

/// Ordered, tag-keyed sequence.
pub fn cat(fields: Vec<(&str, SpecRef)>) -> Arc<RegexOp> {
    let mut ps = Vec::with_capacity(fields.len());
    let mut ks = Vec::with_capacity(fields.len());
    let mut forms = Vec::with_capacity(fields.len());
    for (k, r) in fields {
        ks.push(k.to_string());
        forms.push(r.describe());
        ps.push(child(r));
    }
    Arc::new(RegexOp::Cat {
        ps,
        ks: Some(ks),
        forms,
        ret: json!({}),
        rep_plus: None,
    })
}

/// Tagged alternation.
pub fn alt(branches: Vec<(&str, SpecRef)>) -> Arc<RegexOp> {
    let mut ps = Vec::with_capacity(branches.len());
    let mut ks = Vec::with_capacity(branches.len());
    let mut forms = Vec::with_capacity(branches.len());
    for (k, r) in branches {
        ks.push(k.to_string());
        forms.push(r.describe());
        ps.push(child(r));
    }
    Arc::new(RegexOp::Alt {
        ps,
        ks: Some(ks),
        forms,
        id: Some(SpecId::fresh()),
        maybe: None,
    })
}

/// Zero or more.
pub fn star(p: impl Into<SpecRef>) -> Arc<RegexOp> {
    let r = p.into();
    let form = r.describe();
    let body = child(r);
    Arc::new(RegexOp::Rep {
        p1: Arc::clone(&body),
        p2: body,
        ret: json!([]),
        splice: false,
        form,
        id: SpecId::fresh(),
    })
}

/// One or more: one occurrence followed by a splicing star.
pub fn plus(p: impl Into<SpecRef>) -> Arc<RegexOp> {
    let r = p.into();
    let form = r.describe();
    let body = child(r);
    let tail = Arc::new(RegexOp::Rep {
        p1: Arc::clone(&body),
        p2: Arc::clone(&body),
        ret: json!([]),
        splice: true,
        form: form.clone(),
        id: SpecId::fresh(),
    });
    Arc::new(RegexOp::Cat {
        ps: vec![body, tail],
        ks: None,
        forms: vec![form.clone(), json!(["*", form.clone()])],
        ret: json!([]),
        rep_plus: Some(form),
    })
}

/// Zero or one.
pub fn maybe(p: impl Into<SpecRef>) -> Arc<RegexOp> {
    let r = p.into();
    let form = r.describe();
    Arc::new(RegexOp::Alt {
        ps: vec![child(r), accept(nil_ret())],
        ks: None,
        forms: vec![form.clone(), Value::Null],
        id: None,
        maybe: Some(form),
    })
}

/// Consume per `re`, then constrain the destructured result by `preds`.
pub fn amp(re: Arc<RegexOp>, preds: Vec<SpecRef>) -> Arc<RegexOp> {
    let forms = preds.iter().map(SpecRef::describe).collect();
    Arc::new(RegexOp::Amp {
        p1: re,
        ps: preds,
        forms,
    })
}

// --- the three fundamental algorithms -----------------------------------

/// Can `p` match the empty sequence?
pub(crate) fn accept_nil(p: &Arc<RegexOp>) -> Result<bool, SpecError> {
    match &**p {
        RegexOp::Accept { .. } => Ok(true),
        RegexOp::Leaf { .. } => match resolve_node(p)? {
            Node::Re(r) => accept_nil(&r),
            Node::Spec(_) => Ok(false),
        },
        RegexOp::Amp { p1, ps, .. } => {
            if !accept_nil(p1)? {
                return Ok(false);
            }
            let ret = preturn(p1)?;
            if is_nil_ret(&ret) {
                return Ok(true);
            }
            Ok(and_preds(&ret, ps)?.is_valid())
        }
        RegexOp::Rep { p1, p2, .. } => {
            if Arc::ptr_eq(p1, p2) {
                return Ok(true);
            }
            accept_nil(p1)
        }
        RegexOp::Cat { ps, .. } => {
            for c in ps {
                if !accept_nil(c)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RegexOp::Alt { ps, .. } => {
            for c in ps {
                if accept_nil(c)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn noret(p1: &Arc<RegexOp>, pret: &Value) -> Result<bool, SpecError> {
    if is_nil_ret(pret) || pret.is_null() {
        return Ok(true);
    }
    let empty = match pret {
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    };
    if !empty {
        return Ok(false);
    }
    match resolve_node(p1)? {
        Node::Re(r) => Ok(matches!(
            &*r,
            RegexOp::Rep { .. } | RegexOp::Cat { .. }
        )),
        Node::Spec(_) => Ok(false),
    }
}

/// The value `p` would produce on empty termination.
pub(crate) fn preturn(p: &Arc<RegexOp>) -> Result<Value, SpecError> {
    match &**p {
        RegexOp::Accept { ret } => Ok(ret.clone()),
        RegexOp::Leaf { .. } => match resolve_node(p)? {
            Node::Re(r) => preturn(&r),
            Node::Spec(_) => Ok(Value::Null),
        },
        RegexOp::Amp { p1, ps, .. } => {
            let pret = preturn(p1)?;
            if noret(p1, &pret)? {
                return Ok(nil_ret());
            }
            match and_preds(&pret, ps)? {
                Conformed::Valid(v) => Ok(v),
                Conformed::Invalid => Ok(Value::String(crate::spec::INVALID_TOKEN.to_string())),
            }
        }
        RegexOp::Rep { p1, ret, .. } => add_ret(p1, ret, None),
        RegexOp::Cat { ps, ks, ret, .. } => {
            let k = ks.as_ref().and_then(|ks| ks.first().map(String::as_str));
            add_ret(&ps[0], ret, k)
        }
        RegexOp::Alt { ps, ks, .. } => {
            let mut idx = None;
            for (i, c) in ps.iter().enumerate() {
                if accept_nil(c)? {
                    idx = Some(i);
                    break;
                }
            }
            match idx {
                None => Ok(nil_ret()),
                Some(i) => {
                    let r = preturn(&ps[i])?;
                    match ks.as_ref().and_then(|ks| ks.get(i)) {
                        Some(k) => Ok(json!([k, r])),
                        None => Ok(r),
                    }
                }
            }
        }
    }
}

/// Fold `p`'s pending return into the accumulated `r`.
fn add_ret(p: &Arc<RegexOp>, r: &Value, k: Option<&str>) -> Result<Value, SpecError> {
    let op = match resolve_node(p)? {
        Node::Spec(_) => return Ok(r.clone()),
        Node::Re(op) => op,
    };
    match &*op {
        RegexOp::Alt { .. } | RegexOp::Accept { .. } | RegexOp::Amp { .. } => {
            let ret = preturn(&op)?;
            if is_nil_ret(&ret) {
                Ok(r.clone())
            } else {
                Ok(conj_ret(r, &ret, k))
            }
        }
        RegexOp::Rep { .. } | RegexOp::Cat { .. } => {
            let splice = matches!(&*op, RegexOp::Rep { splice: true, .. });
            let ret = preturn(&op)?;
            let empty = match &ret {
                Value::Array(a) => a.is_empty(),
                Value::Object(m) => m.is_empty(),
                _ => false,
            };
            if empty {
                return Ok(r.clone());
            }
            if splice {
                if let (Value::Array(base), Value::Array(items)) = (r, &ret) {
                    let mut out = base.clone();
                    out.extend(items.iter().cloned());
                    return Ok(Value::Array(out));
                }
            }
            Ok(conj_ret(r, &ret, k))
        }
        RegexOp::Leaf { .. } => Ok(r.clone()),
    }
}

/// The regex matching what `p` matches after consuming `x`; `None` when
/// nothing can follow.
pub(crate) fn deriv(p: &Arc<RegexOp>, x: &Value) -> Result<Option<Arc<RegexOp>>, SpecError> {
    match &**p {
        RegexOp::Accept { .. } => Ok(None),
        RegexOp::Leaf { .. } => match resolve_node(p)? {
            Node::Re(r) => deriv(&r, x),
            Node::Spec(s) => match s.conform(x)? {
                Conformed::Invalid => Ok(None),
                Conformed::Valid(v) => Ok(Some(accept(v))),
            },
        },
        RegexOp::Amp { p1, ps, forms } => match deriv(p1, x)? {
            None => Ok(None),
            Some(d1) => {
                if is_accept(&d1) {
                    match and_preds(&accept_ret(&d1), ps)? {
                        Conformed::Invalid => Ok(None),
                        Conformed::Valid(v) => Ok(Some(accept(v))),
                    }
                } else {
                    Ok(Some(Arc::new(RegexOp::Amp {
                        p1: d1,
                        ps: ps.clone(),
                        forms: forms.clone(),
                    })))
                }
            }
        },
        RegexOp::Cat {
            ps,
            ks,
            forms,
            ret,
            rep_plus,
        } => {
            let d0 = deriv(&ps[0], x)?;
            let mut with_d0: Vec<Option<Arc<RegexOp>>> = vec![d0];
            with_d0.extend(ps[1..].iter().cloned().map(Some));
            let b1 = pcat_opt(
                with_d0,
                ks.clone(),
                forms.clone(),
                ret.clone(),
                rep_plus.clone(),
            );
            let b2 = if accept_nil(&ps[0])? {
                let k0 = ks.as_ref().and_then(|ks| ks.first().map(String::as_str));
                let folded = add_ret(&ps[0], ret, k0)?;
                let tail = pcat_opt(
                    ps[1..].iter().cloned().map(Some).collect(),
                    ks.as_ref().map(|ks| ks[1..].to_vec()),
                    forms.get(1..).map(<[Value]>::to_vec).unwrap_or_default(),
                    folded,
                    None,
                );
                match tail {
                    Some(t) => deriv(&t, x)?,
                    None => None,
                }
            } else {
                None
            };
            Ok(alt2(b1, b2))
        }
        RegexOp::Alt { ps, ks, forms, id, .. } => {
            let mut derivs = Vec::with_capacity(ps.len());
            for c in ps {
                derivs.push(deriv(c, x)?);
            }
            let result = alt_star(derivs, ks.clone(), forms.clone());
            // The original identity survives derivative construction so the
            // recursion budget keeps tracking this alternation.
            match (result, id) {
                (Some(r), Some(orig)) => {
                    if let RegexOp::Alt {
                        ps, ks, forms, maybe, ..
                    } = &*r
                    {
                        Ok(Some(Arc::new(RegexOp::Alt {
                            ps: ps.clone(),
                            ks: ks.clone(),
                            forms: forms.clone(),
                            id: Some(*orig),
                            maybe: maybe.clone(),
                        })))
                    } else {
                        Ok(Some(r))
                    }
                }
                (r, _) => Ok(r),
            }
        }
        RegexOp::Rep {
            p1,
            p2,
            ret,
            splice,
            form,
            id,
        } => {
            let b1 = rep(deriv(p1, x)?, p2, ret, *splice, form, *id);
            let b2 = if accept_nil(p1)? {
                let folded = add_ret(p1, ret, None)?;
                match rep(Some(Arc::clone(p2)), p2, &folded, *splice, form, *id) {
                    Some(fresh) => deriv(&fresh, x)?,
                    None => None,
                }
            } else {
                None
            };
            Ok(alt2(b1, b2))
        }
    }
}

// --- whole-input operations ---------------------------------------------

/// Fold `deriv` across the input and finish with `accept_nil`/`preturn`.
pub(crate) fn re_conform(re: &Arc<RegexOp>, data: &[Value]) -> Result<Conformed, SpecError> {
    let mut p = Arc::clone(re);
    for x in data {
        match deriv(&p, x)? {
            Some(d) => p = d,
            None => return Ok(Conformed::Invalid),
        }
    }
    if accept_nil(&p)? {
        let ret = preturn(&p)?;
        if is_nil_ret(&ret) {
            Ok(Conformed::Valid(Value::Null))
        } else {
            Ok(Conformed::Valid(ret))
        }
    } else {
        Ok(Conformed::Invalid)
    }
}

/// Mirror of conform that stops at the first dead derivative and describes
/// the fault.
pub(crate) fn re_explain(
    path: &Path,
    via: &[Name],
    in_: &Path,
    re: &Arc<RegexOp>,
    data: &[Value],
) -> Result<Vec<Problem>, SpecError> {
    let mut p = Arc::clone(re);
    let mut i = 0usize;
    loop {
        if i >= data.len() {
            if accept_nil(&p)? {
                return Ok(Vec::new());
            }
            return op_explain(&op_describe(&p), &p, path, via, in_, &[]);
        }
        match deriv(&p, &data[i])? {
            Some(d) => {
                p = d;
                i += 1;
            }
            None => {
                let rest = data[i..].to_vec();
                let extra = || {
                    vec![Problem::new(
                        path.clone(),
                        op_describe(&p),
                        Value::Array(rest.clone()),
                        via.to_vec(),
                        in_.clone(),
                    )
                    .with_reason("Extra input")]
                };
                if is_accept(&p) {
                    return Ok(extra());
                }
                let mut sub_in = in_.clone();
                sub_in.push(PathSeg::Index(i));
                let problems = op_explain(&op_describe(&p), &p, path, via, &sub_in, &rest)?;
                if problems.is_empty() {
                    return Ok(extra());
                }
                return Ok(problems);
            }
        }
    }
}

/// Descend to the op that cannot proceed on `input` and explain it.
fn op_explain(
    form: &Value,
    p: &Arc<RegexOp>,
    path: &Path,
    via: &[Name],
    in_: &Path,
    input: &[Value],
) -> Result<Vec<Problem>, SpecError> {
    let insufficient = |at: &Path, pred: &Value| {
        vec![Problem::new(
            at.clone(),
            pred.clone(),
            json!([]),
            via.to_vec(),
            in_.clone(),
        )
        .with_reason("Insufficient input")]
    };
    match &**p {
        RegexOp::Accept { .. } => Ok(Vec::new()),
        RegexOp::Leaf {
            spec,
            form: leaf_form,
        } => match resolve_node(p)? {
            Node::Re(r) => op_explain(form, &r, path, via, in_, input),
            Node::Spec(_) => {
                if input.is_empty() {
                    Ok(insufficient(path, leaf_form))
                } else {
                    explain_1(spec, path, via, in_, &input[0])
                }
            }
        },
        RegexOp::Amp { p1, ps, .. } => {
            if input.is_empty() {
                if accept_nil(p1)? {
                    return explain_pred_list(ps, path, via, in_, &preturn(p1)?);
                }
                return Ok(insufficient(path, &op_describe(p1)));
            }
            match deriv(p1, &input[0])? {
                Some(d1) => explain_pred_list(ps, path, via, in_, &preturn(&d1)?),
                None => op_explain(&op_describe(p1), p1, path, via, in_, input),
            }
        }
        RegexOp::Cat { ps, ks, forms, .. } => {
            let mut idx = None;
            if ps.len() == 1 {
                idx = Some(0);
            } else {
                for (i, c) in ps.iter().enumerate() {
                    if !accept_nil(c)? {
                        idx = Some(i);
                        break;
                    }
                }
            }
            match idx {
                None => Ok(insufficient(path, form)),
                Some(i) => {
                    let mut child_path = path.clone();
                    if let Some(k) = ks.as_ref().and_then(|ks| ks.get(i)) {
                        child_path.push(PathSeg::Key(k.clone()));
                    }
                    let child_form = forms
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| op_describe(&ps[i]));
                    op_explain(&child_form, &ps[i], &child_path, via, in_, input)
                }
            }
        }
        RegexOp::Alt { ps, ks, forms, .. } => {
            if input.is_empty() {
                return Ok(insufficient(path, &op_describe(p)));
            }
            let mut problems = Vec::new();
            for (i, c) in ps.iter().enumerate() {
                let mut child_path = path.clone();
                if let Some(k) = ks.as_ref().and_then(|ks| ks.get(i)) {
                    child_path.push(PathSeg::Key(k.clone()));
                }
                let child_form = forms.get(i).cloned().unwrap_or_else(|| op_describe(c));
                problems.extend(op_explain(&child_form, c, &child_path, via, in_, input)?);
            }
            Ok(problems)
        }
        RegexOp::Rep { p1, p2, form: rf, .. } => {
            let f = if Arc::ptr_eq(p1, p2) {
                rf.clone()
            } else {
                op_describe(p1)
            };
            op_explain(&f, p1, path, via, in_, input)
        }
    }
}

/// Symbolic form of an op.
pub fn op_describe(p: &Arc<RegexOp>) -> Value {
    match &**p {
        RegexOp::Accept { .. } => Value::Null,
        RegexOp::Leaf { form, .. } => form.clone(),
        RegexOp::Amp { p1, forms, .. } => {
            let mut form = vec![json!("&"), op_describe(p1)];
            form.extend(forms.iter().cloned());
            Value::Array(form)
        }
        RegexOp::Cat {
            rep_plus: Some(f), ..
        } => json!(["+", f]),
        RegexOp::Cat { ks, forms, .. } => {
            let mut form = vec![json!("cat")];
            for (i, f) in forms.iter().enumerate() {
                if let Some(k) = ks.as_ref().and_then(|ks| ks.get(i)) {
                    form.push(json!(k));
                }
                form.push(f.clone());
            }
            Value::Array(form)
        }
        RegexOp::Alt {
            maybe: Some(f), ..
        } => json!(["?", f]),
        RegexOp::Alt { ks, forms, .. } => {
            let mut form = vec![json!("alt")];
            for (i, f) in forms.iter().enumerate() {
                if let Some(k) = ks.as_ref().and_then(|ks| ks.get(i)) {
                    form.push(json!(k));
                }
                form.push(f.clone());
            }
            Value::Array(form)
        }
        RegexOp::Rep { form, .. } => json!(["*", form]),
    }
}

/// Rebuild an input sequence from a conformed value, variant by variant.
pub(crate) fn op_unform(p: &Arc<RegexOp>, x: &Value) -> Result<Vec<Value>, SpecError> {
    match &**p {
        RegexOp::Accept { ret } => {
            if is_nil_ret(ret) {
                Ok(Vec::new())
            } else {
                Ok(vec![ret.clone()])
            }
        }
        RegexOp::Leaf { .. } => match resolve_node(p)? {
            Node::Re(r) => op_unform(&r, x),
            Node::Spec(s) => Ok(vec![s.unform(x)?]),
        },
        RegexOp::Amp { p1, ps, .. } => {
            let mut cur = x.clone();
            for pred in ps.iter().rev() {
                cur = pred.reify()?.unform(&cur)?;
            }
            op_unform(p1, &cur)
        }
        RegexOp::Rep { p2, .. } => {
            let items = x.as_array().ok_or_else(|| SpecError::UnformMismatch {
                form: "*".to_string(),
                val: x.clone(),
            })?;
            let mut out = Vec::new();
            for item in items {
                out.extend(op_unform(p2, item)?);
            }
            Ok(out)
        }
        RegexOp::Cat {
            rep_plus: Some(_),
            ps,
            ..
        } => {
            let items = x.as_array().ok_or_else(|| SpecError::UnformMismatch {
                form: "+".to_string(),
                val: x.clone(),
            })?;
            let mut out = Vec::new();
            for item in items {
                out.extend(op_unform(&ps[0], item)?);
            }
            Ok(out)
        }
        RegexOp::Cat { ps, ks, .. } => match ks {
            Some(ks) => {
                let obj = x.as_object().ok_or_else(|| SpecError::UnformMismatch {
                    form: "cat".to_string(),
                    val: x.clone(),
                })?;
                let mut out = Vec::new();
                for (k, c) in ks.iter().zip(ps) {
                    // Absent keys are matched-empty components (e.g. `?`).
                    if let Some(v) = obj.get(k) {
                        out.extend(op_unform(c, v)?);
                    }
                }
                Ok(out)
            }
            None => {
                let items = x.as_array().ok_or_else(|| SpecError::UnformMismatch {
                    form: "cat".to_string(),
                    val: x.clone(),
                })?;
                let mut out = Vec::new();
                for (c, v) in ps.iter().zip(items) {
                    out.extend(op_unform(c, v)?);
                }
                Ok(out)
            }
        },
        RegexOp::Alt { ps, ks, maybe, .. } => {
            if maybe.is_some() {
                if x.is_null() {
                    return Ok(Vec::new());
                }
                return op_unform(&ps[0], x);
            }
            match ks {
                Some(ks) => {
                    let pair =
                        x.as_array()
                            .filter(|a| a.len() == 2)
                            .ok_or_else(|| SpecError::UnformMismatch {
                                form: "alt".to_string(),
                                val: x.clone(),
                            })?;
                    let key = pair[0].as_str().unwrap_or_default();
                    let idx = ks.iter().position(|k| k == key).ok_or_else(|| {
                        SpecError::UnknownBranch {
                            key: key.to_string(),
                        }
                    })?;
                    op_unform(&ps[idx], &pair[1])
                }
                None => op_unform(&ps[0], x),
            }
        }
    }
}

/// Mirror the tree as generators.
pub(crate) fn re_gen(
    p: &Arc<RegexOp>,
    overrides: &Overrides,
    path: &Path,
    rmap: &RecursionMap,
) -> Result<Option<Gen>, SpecError> {
    // An override at a regex position produces one element of the sequence.
    if let Some(gfn) = overrides.path_lookup(path) {
        let g = gfn();
        let wrapped = match &**p {
            RegexOp::Accept { .. } | RegexOp::Leaf { .. } => g.fmap(|v| json!([v])),
            _ => g,
        };
        return Ok(Some(wrapped));
    }
    let bumped;
    let rmap = match op_id(p) {
        Some(id) => {
            bumped = rmap.bump(id);
            &bumped
        }
        None => rmap,
    };
    match &**p {
        RegexOp::Accept { ret } => Ok(Some(if is_nil_ret(ret) {
            Gen::constant(json!([]))
        } else {
            Gen::constant(json!([ret.clone()]))
        })),
        RegexOp::Leaf { spec, form } => match resolve_node(p)? {
            Node::Re(r) => re_gen(&r, overrides, path, rmap),
            Node::Spec(_) => {
                let g = gensub(spec, overrides, path, rmap, form)?;
                Ok(Some(g.fmap(|v| json!([v]))))
            }
        },
        RegexOp::Amp { p1, .. } => re_gen(p1, overrides, path, rmap),
        RegexOp::Cat { ps, ks, .. } => {
            let mut gens = Vec::with_capacity(ps.len());
            for (i, c) in ps.iter().enumerate() {
                let mut child_path = path.clone();
                if let Some(k) = ks.as_ref().and_then(|ks| ks.get(i)) {
                    child_path.push(PathSeg::Key(k.clone()));
                }
                match re_gen(c, overrides, &child_path, rmap)? {
                    Some(g) => gens.push(g),
                    None => return Ok(None),
                }
            }
            Ok(Some(Gen::cat(gens)))
        }
        RegexOp::Alt { ps, ks, id, .. } => {
            let mut gens = Vec::new();
            for (i, c) in ps.iter().enumerate() {
                let key = ks.as_ref().and_then(|ks| ks.get(i));
                if let (Some(id), Some(k)) = (id, key) {
                    let seg = PathSeg::Key(k.clone());
                    if rmap.over_limit(*id, path, &seg) {
                        continue;
                    }
                }
                let mut child_path = path.clone();
                if let Some(k) = key {
                    child_path.push(PathSeg::Key(k.clone()));
                }
                if let Some(g) = re_gen(c, overrides, &child_path, rmap)? {
                    gens.push(g);
                }
            }
            if gens.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Gen::one_of(gens)))
            }
        }
        RegexOp::Rep { p2, id, .. } => {
            if rmap.count_over(*id) {
                return Ok(Some(Gen::constant(json!([]))));
            }
            match re_gen(p2, overrides, path, rmap)? {
                None => Ok(None),
                Some(g) => Ok(Some(Gen::vector_of(g, 0, 3).fmap(|v| {
                    let mut out = Vec::new();
                    for seg in v.as_array().cloned().unwrap_or_default() {
                        match seg {
                            Value::Array(items) => out.extend(items),
                            other => out.push(other),
                        }
                    }
                    Value::Array(out)
                }))),
            }
        }
    }
}

// --- the non-splicing spec adapter --------------------------------------

struct RegexSpec {
    re: Arc<RegexOp>,
}

fn seq_form() -> Value {
    json!(["or", ["nil?", "%"], ["sequential?", "%"]])
}

impl SpecImpl for RegexSpec {
    fn conform(&self, x: &Value) -> Result<Conformed, SpecError> {
        match x {
            Value::Null => re_conform(&self.re, &[]),
            Value::Array(items) => re_conform(&self.re, items),
            _ => Ok(Conformed::Invalid),
        }
    }

    fn unform(&self, y: &Value) -> Result<Value, SpecError> {
        Ok(Value::Array(op_unform(&self.re, y)?))
    }

    fn explain(
        &self,
        path: &Path,
        via: &[Name],
        in_: &Path,
        x: &Value,
    ) -> Result<Vec<Problem>, SpecError> {
        match x {
            Value::Null => re_explain(path, via, in_, &self.re, &[]),
            Value::Array(items) => re_explain(path, via, in_, &self.re, items),
            _ => Ok(vec![Problem::new(
                path.clone(),
                seq_form(),
                x.clone(),
                via.to_vec(),
                in_.clone(),
            )]),
        }
    }

    fn gen(
        &self,
        overrides: &Overrides,
        path: &Path,
        rmap: &RecursionMap,
    ) -> Result<Option<Gen>, SpecError> {
        re_gen(&self.re, overrides, path, rmap)
    }

    fn describe(&self) -> Value {
        op_describe(&self.re)
    }
}

/// Present a regex op as an ordinary, non-splicing spec.
pub fn re_spec(re: Arc<RegexOp>) -> Spec {
    Spec::new(RegexSpec { re })
}

pub(crate) fn into_spec(re: Arc<RegexOp>) -> Spec {
    re_spec(re)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pred;
    use crate::registry::def;

    fn conform_seq(re: &Arc<RegexOp>, data: Value) -> Conformed {
        re_spec(Arc::clone(re)).conform(&data).unwrap()
    }

    #[test]
    fn cat_with_star_destructures() {
        let re = cat(vec![
            ("xs", star(pred::int()).into()),
            ("s", pred::string().into()),
        ]);
        assert_eq!(
            conform_seq(&re, json!([1, 2, 3, "x"])),
            Conformed::Valid(json!({"xs": [1, 2, 3], "s": "x"}))
        );
        assert_eq!(
            conform_seq(&re, json!(["x"])),
            Conformed::Valid(json!({"xs": [], "s": "x"}))
        );
        assert_eq!(conform_seq(&re, json!([1, 2, "x", 3])), Conformed::Invalid);
        assert_eq!(conform_seq(&re, json!([1, 2])), Conformed::Invalid);
    }

    #[test]
    fn extra_input_is_reported_as_such() {
        let re = cat(vec![
            ("xs", star(pred::int()).into()),
            ("s", pred::string().into()),
        ]);
        let s = re_spec(re);
        let problems = s
            .explain(&vec![], &[], &vec![], &json!([1, 2, "x", 3]))
            .unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].reason.as_deref(), Some("Extra input"));
        assert_eq!(problems[0].val, json!([3]));
    }

    #[test]
    fn insufficient_input_is_reported_as_such() {
        let re = cat(vec![
            ("n", pred::int().into()),
            ("s", pred::string().into()),
        ]);
        let s = re_spec(re);
        let problems = s.explain(&vec![], &[], &vec![], &json!([1])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].reason.as_deref(), Some("Insufficient input"));
        assert_eq!(problems[0].path, vec![PathSeg::from("s")]);
    }

    #[test]
    fn mid_sequence_failures_descend_to_the_leaf() {
        let re = cat(vec![
            ("n", pred::int().into()),
            ("s", pred::string().into()),
        ]);
        let s = re_spec(re);
        let problems = s.explain(&vec![], &[], &vec![], &json!([1, 2])).unwrap();
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].path, vec![PathSeg::from("s")]);
        assert_eq!(problems[0].val, json!(2));
        assert_eq!(problems[0].in_, vec![PathSeg::Index(1)]);
    }

    #[test]
    fn plus_requires_at_least_one() {
        let re = plus(pred::int());
        assert_eq!(conform_seq(&re, json!([])), Conformed::Invalid);
        assert_eq!(
            conform_seq(&re, json!([5])),
            Conformed::Valid(json!([5]))
        );
        assert_eq!(
            conform_seq(&re, json!([5, 6])),
            Conformed::Valid(json!([5, 6]))
        );
    }

    #[test]
    fn maybe_matches_zero_or_one() {
        let re = maybe(pred::int());
        assert_eq!(conform_seq(&re, json!([])), Conformed::Valid(Value::Null));
        assert_eq!(conform_seq(&re, json!([3])), Conformed::Valid(json!(3)));
        assert_eq!(conform_seq(&re, json!([3, 4])), Conformed::Invalid);
    }

    #[test]
    fn alt_tags_its_branch() {
        let re = alt(vec![
            ("i", pred::int().into()),
            ("s", pred::string().into()),
        ]);
        assert_eq!(
            conform_seq(&re, json!(["q"])),
            Conformed::Valid(json!(["s", "q"]))
        );
        assert_eq!(conform_seq(&re, json!([true])), Conformed::Invalid);
    }

    #[test]
    fn amp_constrains_the_matched_run() {
        let even_len = pred::pred("even-count?", |v| {
            v.as_array().map(|a| a.len() % 2 == 0).unwrap_or(false)
        });
        let re = amp(star(pred::int()), vec![even_len.into()]);
        assert_eq!(
            conform_seq(&re, json!([1, 2])),
            Conformed::Valid(json!([1, 2]))
        );
        assert_eq!(conform_seq(&re, json!([1, 2, 3])), Conformed::Invalid);
        // An empty, accepted run is a no-op return and conforms to null.
        assert_eq!(conform_seq(&re, json!([])), Conformed::Valid(Value::Null));
    }

    #[test]
    fn named_regex_ops_splice_into_the_sequence() {
        def("regex.splice/ints", star(pred::int())).unwrap();
        let re = cat(vec![
            (
                "xs",
                SpecRef::Named(Name::parse("regex.splice/ints").unwrap()),
            ),
            ("s", pred::string().into()),
        ]);
        assert_eq!(
            conform_seq(&re, json!([1, 2, "x"])),
            Conformed::Valid(json!({"xs": [1, 2], "s": "x"}))
        );
    }

    #[test]
    fn wrapped_regex_specs_nest_instead_of_splicing() {
        let inner = re_spec(star(pred::int()));
        let re = cat(vec![("xs", inner.into()), ("s", pred::string().into())]);
        assert_eq!(
            conform_seq(&re, json!([[1, 2], "x"])),
            Conformed::Valid(json!({"xs": [1, 2], "s": "x"}))
        );
        assert_eq!(conform_seq(&re, json!([1, 2, "x"])), Conformed::Invalid);
    }

    #[test]
    fn unform_round_trips_the_input_shape() {
        let re = cat(vec![
            ("xs", star(pred::int()).into()),
            ("s", pred::string().into()),
        ]);
        let s = re_spec(Arc::clone(&re));
        let conformed = s.conform(&json!([1, 2, "x"])).unwrap().into_value().unwrap();
        assert_eq!(s.unform(&conformed).unwrap(), json!([1, 2, "x"]));

        let p = re_spec(plus(pred::int()));
        let conformed = p.conform(&json!([7, 8])).unwrap().into_value().unwrap();
        assert_eq!(p.unform(&conformed).unwrap(), json!([7, 8]));

        let m = re_spec(maybe(pred::int()));
        let conformed = m.conform(&json!([])).unwrap().into_value().unwrap();
        assert_eq!(m.unform(&conformed).unwrap(), json!([]));
    }

    #[test]
    fn derivative_residue_accepts_nil_iff_input_matched() {
        let re = cat(vec![
            ("n", pred::int().into()),
            ("s", pred::string().into()),
        ]);
        let mut p = Arc::clone(&re);
        for x in [json!(1), json!("a")] {
            p = deriv(&p, &x).unwrap().expect("derivative died");
        }
        assert!(accept_nil(&p).unwrap());

        let mut q = Arc::clone(&re);
        q = deriv(&q, &json!(1)).unwrap().expect("derivative died");
        assert!(!accept_nil(&q).unwrap());
    }

    #[test]
    fn non_sequential_input_is_invalid() {
        let s = re_spec(star(pred::int()));
        assert_eq!(s.conform(&json!(3)).unwrap(), Conformed::Invalid);
        assert!(s.conform(&Value::Null).unwrap().is_valid());
        let problems = s.explain(&vec![], &[], &vec![], &json!(3)).unwrap();
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn generated_sequences_match_the_regex() {
        let re = cat(vec![
            ("xs", star(pred::int()).into()),
            ("s", pred::string().into()),
        ]);
        let s = re_spec(Arc::clone(&re));
        let g = re_gen(&re, &Overrides::new(), &vec![], &RecursionMap::new())
            .unwrap()
            .unwrap();
        for v in g.sample(20).unwrap() {
            assert!(s.conform(&v).unwrap().is_valid(), "bad sample: {v}");
        }
    }
}
