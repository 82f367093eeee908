//! The process-global spec registry.
//!
//! A single copy-on-write map behind a lock: readers clone the `Arc` and see
//! a consistent snapshot; writers rebuild and swap, so registration is
//! linearizable. Entries are specs, raw regex ops, or aliases to other
//! names; lookup walks alias chains until a non-name entry.

use crate::error::SpecError;
use crate::fspec::{fspec, FSpecDecl};
use crate::name::Name;
use crate::regex::{into_spec, RegexOp};
use crate::spec::{Spec, SpecRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock, RwLock};

/// One registry row.
#[derive(Clone)]
pub enum RegEntry {
    Spec(Spec),
    Re(Arc<RegexOp>),
    Alias(Name),
}

type Table = BTreeMap<Name, RegEntry>;

fn table() -> &'static RwLock<Arc<Table>> {
    static TABLE: OnceLock<RwLock<Arc<Table>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(Arc::new(BTreeMap::new())))
}

fn snapshot() -> Arc<Table> {
    let guard = table().read().unwrap_or_else(|e| e.into_inner());
    Arc::clone(&guard)
}

/// Register `form` under `name`. The name must be namespace-qualified;
/// re-registration replaces the previous entry.
pub fn def(name: impl AsRef<str>, form: impl Into<SpecRef>) -> Result<Name, SpecError> {
    let name = Name::parse(name)?;
    let entry = match form.into() {
        SpecRef::Spec(s) => RegEntry::Spec(s),
        SpecRef::Re(r) => RegEntry::Re(r),
        SpecRef::Named(alias) => RegEntry::Alias(alias),
    };
    tracing::debug!(name = %name, "registering spec");
    let mut guard = table().write().unwrap_or_else(|e| e.into_inner());
    let mut next = (**guard).clone();
    next.insert(name.clone(), entry);
    *guard = Arc::new(next);
    Ok(name)
}

/// Register a function contract: shorthand for `def(name, fspec(decl))`.
pub fn fdef(name: impl AsRef<str>, decl: FSpecDecl) -> Result<Name, SpecError> {
    def(name, fspec(decl))
}

/// The current registry snapshot.
pub fn registry() -> Arc<BTreeMap<Name, RegEntry>> {
    snapshot()
}

/// Walk the alias chain from `name` to its terminal entry.
pub(crate) fn lookup_entry(name: &Name) -> Option<RegEntry> {
    let reg = snapshot();
    let mut seen = BTreeSet::new();
    let mut cur = name.clone();
    loop {
        if !seen.insert(cur.clone()) {
            return None;
        }
        match reg.get(&cur)? {
            RegEntry::Alias(next) => cur = next.clone(),
            other => return Some(other.clone()),
        }
    }
}

/// Resolve a name to a spec, remembering the queried name for diagnostics.
/// Raw regex entries come back wrapped in the non-splicing adapter.
pub fn get_spec(name: &Name) -> Option<Spec> {
    match lookup_entry(name)? {
        RegEntry::Spec(s) => Some(s.with_name(name.clone())),
        RegEntry::Re(r) => Some(into_spec(r).with_name(name.clone())),
        RegEntry::Alias(_) => None,
    }
}

/// Silent resolution of any reference shape.
pub fn resolve(sref: &SpecRef) -> Option<Spec> {
    sref.reify().ok()
}

/// Strict resolution: a dangling name is a usage error.
pub fn resolve_strict(sref: &SpecRef) -> Result<Spec, SpecError> {
    sref.reify()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pred;
    use serde_json::json;

    #[test]
    fn def_rejects_unqualified_names() {
        assert!(matches!(
            def("bare", pred::int()),
            Err(SpecError::UnqualifiedName(_))
        ));
    }

    #[test]
    fn registered_specs_resolve_with_their_name() {
        let name = def("registry.test/int", pred::int()).unwrap();
        let spec = get_spec(&name).unwrap();
        assert_eq!(spec.name(), Some(&name));
        assert!(spec.conform(&json!(3)).unwrap().is_valid());
    }

    #[test]
    fn alias_chains_resolve_to_the_terminal_spec() {
        let base = def("registry.test.alias/base", pred::string()).unwrap();
        let mid = def("registry.test.alias/mid", base).unwrap();
        let top = def("registry.test.alias/top", mid).unwrap();
        let spec = get_spec(&top).unwrap();
        assert_eq!(spec.name(), Some(&top));
        assert!(spec.conform(&json!("q")).unwrap().is_valid());
        assert!(!spec.conform(&json!(1)).unwrap().is_valid());
    }

    #[test]
    fn alias_cycles_resolve_to_nothing() {
        def("registry.test.cycle/a", Name::parse("registry.test.cycle/b").unwrap()).unwrap();
        def("registry.test.cycle/b", Name::parse("registry.test.cycle/a").unwrap()).unwrap();
        assert!(get_spec(&Name::parse("registry.test.cycle/a").unwrap()).is_none());
    }

    #[test]
    fn unregistered_names_are_silent_or_strict() {
        let name = Name::parse("registry.test/missing").unwrap();
        assert!(get_spec(&name).is_none());
        let sref = SpecRef::Named(name);
        assert!(resolve(&sref).is_none());
        assert!(matches!(
            resolve_strict(&sref),
            Err(SpecError::UnresolvableName(_))
        ));
    }
}
