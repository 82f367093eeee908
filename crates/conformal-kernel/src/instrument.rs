//! Instrumentation: wrap named callables with argument-spec checking.
//!
//! Callables live in a process-global table keyed by qualified name, the
//! same copy-on-write shape as the spec registry. Instrumenting a name swaps
//! its binding for a wrapper that conforms the argument vector against the
//! registered contract's `args` spec before delegating with the original
//! arguments, not the conformed ones. Originals are retained for reversal.

use crate::config;
use crate::error::SpecError;
use crate::name::Name;
use crate::registry;
use crate::spec::{Overrides, Spec, SpecRef};
use serde_json::Value;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

/// A registered callable: argument vector in, value (or usage error) out.
pub type CallFn = Arc<dyn Fn(&[Value]) -> Result<Value, SpecError> + Send + Sync>;

type Bindings = BTreeMap<Name, CallFn>;

fn bindings() -> &'static RwLock<Arc<Bindings>> {
    static BINDINGS: OnceLock<RwLock<Arc<Bindings>>> = OnceLock::new();
    BINDINGS.get_or_init(|| RwLock::new(Arc::new(BTreeMap::new())))
}

struct Instrumented {
    raw: CallFn,
    wrapped: CallFn,
}

fn instrumented() -> &'static Mutex<BTreeMap<Name, Instrumented>> {
    static TABLE: OnceLock<Mutex<BTreeMap<Name, Instrumented>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(BTreeMap::new()))
}

thread_local! {
    static IN_CHECK: Cell<bool> = const { Cell::new(false) };
}

fn swap_binding(name: &Name, f: CallFn) {
    let mut guard = bindings().write().unwrap_or_else(|e| e.into_inner());
    let mut next = (**guard).clone();
    next.insert(name.clone(), f);
    *guard = Arc::new(next);
}

/// Register a callable under a qualified name; replaces any prior binding.
pub fn defn(name: impl AsRef<str>, f: CallFn) -> Result<Name, SpecError> {
    let name = Name::parse(name)?;
    swap_binding(&name, f);
    Ok(name)
}

/// The current binding for `name`.
pub fn lookup(name: &Name) -> Option<CallFn> {
    let guard = bindings().read().unwrap_or_else(|e| e.into_inner());
    guard.get(name).cloned()
}

/// Invoke the current binding for `name`.
pub fn call(name: &Name, args: &[Value]) -> Result<Value, SpecError> {
    let f = lookup(name).ok_or_else(|| SpecError::UnknownCallable(name.clone()))?;
    f(args)
}

/// Per-call options for [`instrument`].
#[derive(Default, Clone)]
pub struct InstrumentOpts {
    /// Replace these bodies with generated-return stubs.
    pub stub: BTreeSet<Name>,
    /// Replace these bodies entirely; arg checking is retained.
    pub replace: BTreeMap<Name, CallFn>,
    /// Override the registered spec per name.
    pub spec: BTreeMap<Name, Spec>,
    /// Generator overrides for stubbed returns.
    pub gen: Overrides,
}

fn checking_fn(name: Name, args: SpecRef, target: CallFn) -> CallFn {
    Arc::new(move |call_args: &[Value]| {
        let should_check = config::instrument_enabled() && !IN_CHECK.with(Cell::get);
        if should_check {
            IN_CHECK.with(|c| c.set(true));
            let checked = (|| -> Result<(), SpecError> {
                let argsv = Value::Array(call_args.to_vec());
                let spec = args.reify()?;
                if spec.conform(&argsv)?.is_valid() {
                    return Ok(());
                }
                let mut via = Vec::new();
                if let Some(n) = spec.name() {
                    via.push(n.clone());
                }
                let problems = spec.explain(&Vec::new(), &via, &Vec::new(), &argsv)?;
                Err(SpecError::InstrumentCheckFailed {
                    name: name.clone(),
                    problems,
                    args: call_args.to_vec(),
                })
            })();
            IN_CHECK.with(|c| c.set(false));
            checked?;
        }
        target(call_args)
    })
}

/// Wrap each named callable that has a function contract with `args`
/// checking. Names without a binding or without an applicable contract are
/// skipped. Returns the names actually instrumented.
pub fn instrument(names: &[Name], opts: &InstrumentOpts) -> Result<Vec<Name>, SpecError> {
    let mut done = Vec::new();
    let mut table = instrumented().lock().unwrap_or_else(|e| e.into_inner());
    for name in names {
        // Re-instrumenting reuses the retained original, so options can
        // change without stacking wrappers.
        let raw = match table.get(name) {
            Some(entry) => Arc::clone(&entry.raw),
            None => match lookup(name) {
                Some(f) => f,
                None => continue,
            },
        };
        let spec = match opts.spec.get(name) {
            Some(s) => s.clone(),
            None => match registry::get_spec(name) {
                Some(s) => s,
                None => continue,
            },
        };
        let Some(fs) = spec.as_fspec() else { continue };
        let Some(args) = fs.args().cloned() else {
            continue;
        };
        let target: CallFn = if opts.stub.contains(name) {
            fs.stub(name, &opts.gen)?
        } else if let Some(replacement) = opts.replace.get(name) {
            Arc::clone(replacement)
        } else {
            Arc::clone(&raw)
        };
        let wrapped = checking_fn(name.clone(), args, target);
        swap_binding(name, Arc::clone(&wrapped));
        tracing::debug!(name = %name, "instrumented callable");
        table.insert(name.clone(), Instrumented { raw, wrapped });
        done.push(name.clone());
    }
    Ok(done)
}

/// Instrument every registered callable with an applicable contract.
pub fn instrument_all(opts: &InstrumentOpts) -> Result<Vec<Name>, SpecError> {
    let names: Vec<Name> = {
        let guard = bindings().read().unwrap_or_else(|e| e.into_inner());
        guard.keys().cloned().collect()
    };
    instrument(&names, opts)
}

/// Restore original bindings. A binding is only restored if the wrapper is
/// still current, so user re-bindings survive. Returns the names restored.
pub fn unstrument(names: &[Name]) -> Vec<Name> {
    let mut done = Vec::new();
    let mut table = instrumented().lock().unwrap_or_else(|e| e.into_inner());
    for name in names {
        let Some(entry) = table.get(name) else { continue };
        let still_current = lookup(name)
            .map(|cur| Arc::ptr_eq(&cur, &entry.wrapped))
            .unwrap_or(false);
        if still_current {
            swap_binding(name, Arc::clone(&entry.raw));
            tracing::debug!(name = %name, "restored callable");
            done.push(name.clone());
        }
        table.remove(name);
    }
    done
}

/// Restore every instrumented binding.
pub fn unstrument_all() -> Vec<Name> {
    let names: Vec<Name> = {
        let table = instrumented().lock().unwrap_or_else(|e| e.into_inner());
        table.keys().cloned().collect()
    };
    unstrument(&names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fspec::FSpecDecl;
    use crate::pred;
    use crate::regex::cat;
    use crate::registry::fdef;
    use serde_json::json;

    fn add_contract(name: &str) -> Name {
        fdef(
            name,
            FSpecDecl {
                args: Some(SpecRef::Re(cat(vec![
                    ("x", pred::int().into()),
                    ("y", pred::int().into()),
                ]))),
                ret: Some(pred::int().into()),
                func: None,
            },
        )
        .unwrap()
    }

    fn add_fn(name: &str) -> Name {
        defn(
            name,
            Arc::new(|args: &[Value]| {
                let x = args.first().and_then(Value::as_i64).unwrap_or(0);
                let y = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(x + y))
            }),
        )
        .unwrap()
    }

    #[test]
    fn instrumented_calls_check_args() {
        let name = add_fn("instrument.test/add");
        add_contract("instrument.test/add");
        let done = instrument(&[name.clone()], &InstrumentOpts::default()).unwrap();
        assert_eq!(done, vec![name.clone()]);

        assert_eq!(call(&name, &[json!(1), json!(2)]).unwrap(), json!(3));
        let err = call(&name, &[json!(1), json!("two")]).unwrap_err();
        match err {
            SpecError::InstrumentCheckFailed { problems, args, .. } => {
                assert!(!problems.is_empty());
                assert_eq!(args, vec![json!(1), json!("two")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        unstrument(&[name.clone()]);
        // Unwrapped again: bad args reach the raw fn.
        assert_eq!(call(&name, &[json!(1), json!("two")]).unwrap(), json!(1));
    }

    #[test]
    fn disabled_instrumentation_is_reversible() {
        // Exercises the wrapper's own reentrancy/enable gate rather than the
        // process switch, which other tests rely on staying enabled.
        let name = add_fn("instrument.test/gated");
        add_contract("instrument.test/gated");
        instrument(&[name.clone()], &InstrumentOpts::default()).unwrap();
        assert!(call(&name, &[json!("bad"), json!(2)]).is_err());
        unstrument(&[name.clone()]);
        assert_eq!(call(&name, &[json!("bad"), json!(2)]).unwrap(), json!(2));
    }

    #[test]
    fn unstrument_keeps_user_rebindings() {
        let name = add_fn("instrument.test/rebound");
        add_contract("instrument.test/rebound");
        instrument(&[name.clone()], &InstrumentOpts::default()).unwrap();
        // The user replaces the binding while instrumented.
        defn(
            "instrument.test/rebound",
            Arc::new(|_: &[Value]| Ok(json!("mine"))),
        )
        .unwrap();
        let restored = unstrument(&[name.clone()]);
        assert!(restored.is_empty());
        assert_eq!(call(&name, &[]).unwrap(), json!("mine"));
    }

    #[test]
    fn stubbed_bindings_generate_returns() {
        let name = add_fn("instrument.test/stubbed");
        add_contract("instrument.test/stubbed");
        let opts = InstrumentOpts {
            stub: [name.clone()].into_iter().collect(),
            ..InstrumentOpts::default()
        };
        instrument(&[name.clone()], &opts).unwrap();
        let out = call(&name, &[json!(40), json!(2)]).unwrap();
        assert!(out.is_i64());
        unstrument(&[name.clone()]);
        assert_eq!(call(&name, &[json!(40), json!(2)]).unwrap(), json!(42));
    }

    #[test]
    fn replaced_bodies_keep_arg_checking() {
        let name = add_fn("instrument.test/replaced");
        add_contract("instrument.test/replaced");
        let opts = InstrumentOpts {
            replace: [(
                name.clone(),
                Arc::new(|_: &[Value]| Ok(json!(-1))) as CallFn,
            )]
            .into_iter()
            .collect(),
            ..InstrumentOpts::default()
        };
        instrument(&[name.clone()], &opts).unwrap();
        assert_eq!(call(&name, &[json!(1), json!(2)]).unwrap(), json!(-1));
        assert!(call(&name, &[json!("bad"), json!(2)]).is_err());
        unstrument(&[name.clone()]);
    }
}
