//! Namespace-qualified names.
//!
//! Every registry key, callable identifier, and `via` entry is a `Name` of
//! the shape `namespace/local`. Unqualified strings are rejected at parse
//! time, which is the only way to construct one.

use crate::error::SpecError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A namespace-qualified name, e.g. `app.order/id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(String);

impl Name {
    /// Parse a qualified name. The namespace and local part must both be
    /// non-empty, separated by the first `/`.
    pub fn parse(s: impl AsRef<str>) -> Result<Name, SpecError> {
        let s = s.as_ref();
        match s.split_once('/') {
            Some((ns, local)) if !ns.is_empty() && !local.is_empty() => {
                Ok(Name(s.to_string()))
            }
            _ => Err(SpecError::UnqualifiedName(s.to_string())),
        }
    }

    pub fn namespace(&self) -> &str {
        self.0.split_once('/').map(|(ns, _)| ns).unwrap_or("")
    }

    /// The bare local part, used for unqualified key presence checks.
    pub fn local(&self) -> &str {
        self.0.split_once('/').map(|(_, l)| l).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names_parse() {
        let n = Name::parse("app.order/id").unwrap();
        assert_eq!(n.namespace(), "app.order");
        assert_eq!(n.local(), "id");
        assert_eq!(n.to_string(), "app.order/id");
    }

    #[test]
    fn unqualified_names_are_rejected() {
        assert!(Name::parse("id").is_err());
        assert!(Name::parse("/id").is_err());
        assert!(Name::parse("app/").is_err());
        assert!(Name::parse("").is_err());
    }

    #[test]
    fn local_part_splits_at_first_slash() {
        let n = Name::parse("ns/a/b").unwrap();
        assert_eq!(n.namespace(), "ns");
        assert_eq!(n.local(), "a/b");
    }
}
