//! Usage-failure errors.
//!
//! Data failures (a value not matching a spec) are never errors: conform
//! reports them as `Conformed::Invalid` and explain as `Problem`s. The
//! variants here are programmer errors: unresolvable names, missing
//! generators, non-invertible conformers, instrumented call mismatches.

use crate::name::Name;
use crate::problem::Problem;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// A name reference whose registry chain ends at nothing.
    #[error("unable to resolve spec name: {0}")]
    UnresolvableName(Name),

    /// Registration requires namespace-qualified names.
    #[error("spec name must be namespace-qualified: {0:?}")]
    UnqualifiedName(String),

    /// No generator could be constructed at a path.
    #[error("unable to construct generator at {path} for: {form}")]
    NoGenerator { path: String, form: String },

    /// Unform of a conformer with no inverse.
    #[error("no inverse conformer for {form}; cannot unform")]
    NonInvertible { form: String },

    /// Unform of a tagged value whose tag names no branch.
    #[error("no `{key}` branch in conformed value")]
    UnknownBranch { key: String },

    /// Unform input does not have the shape the spec conforms to.
    #[error("cannot unform {form} from {val}")]
    UnformMismatch { form: String, val: Value },

    /// Multi-spec operation on a dispatch value with no method row.
    #[error("no method in {multi} for dispatch value {tag}")]
    NoMethod { multi: Name, tag: Value },

    /// A callable identifier with no registered binding.
    #[error("no callable registered under {0}")]
    UnknownCallable(Name),

    /// An instrumented call whose arguments did not conform. Carries the
    /// full explain payload and the original argument list.
    #[error("arguments to {name} did not conform")]
    InstrumentCheckFailed {
        name: Name,
        problems: Vec<Problem>,
        args: Vec<Value>,
    },

    #[error(transparent)]
    Gen(#[from] conformal_gen::GenError),
}
