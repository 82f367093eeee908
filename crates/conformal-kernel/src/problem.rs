//! Structured diagnostics.
//!
//! A failing explain produces an ordered vector of [`Problem`]s; `path`
//! indexes into the conformed structure, `in` into the input value, `via`
//! is the chain of registered spec names crossed on the way down.

use crate::name::Name;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write as _;

/// One step into a structure: a map key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum PathSeg {
    Index(usize),
    Key(String),
}

impl From<usize> for PathSeg {
    fn from(i: usize) -> Self {
        PathSeg::Index(i)
    }
}

impl From<&str> for PathSeg {
    fn from(k: &str) -> Self {
        PathSeg::Key(k.to_string())
    }
}

impl std::fmt::Display for PathSeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSeg::Index(i) => write!(f, "{i}"),
            PathSeg::Key(k) => f.write_str(k),
        }
    }
}

pub type Path = Vec<PathSeg>;

/// One diagnostic: where, what failed, and against which predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    pub path: Path,
    /// Symbolic form of the failed predicate.
    pub pred: Value,
    pub val: Value,
    pub via: Vec<Name>,
    #[serde(rename = "in")]
    pub in_: Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Additional per-problem keys, printed indented after the summary line.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Problem {
    pub fn new(path: Path, pred: Value, val: Value, via: Vec<Name>, in_: Path) -> Problem {
        Problem {
            path,
            pred,
            val,
            via,
            in_,
            reason: None,
            extra: Map::new(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Problem {
        self.reason = Some(reason.into());
        self
    }
}

/// The full payload of a failed explain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainData {
    pub problems: Vec<Problem>,
    /// Symbolic form of the top spec.
    pub spec: Value,
    /// The original input value.
    pub value: Value,
    /// Additional top-level keys, printed after the problems.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Render a symbolic form in list notation: arrays become `(a b c)`, strings
/// print bare, everything else as JSON.
pub fn form_str(form: &Value) -> String {
    let mut out = String::new();
    write_form(&mut out, form);
    out
}

fn write_form(out: &mut String, form: &Value) {
    match form {
        Value::Array(items) => {
            out.push('(');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_form(out, item);
            }
            out.push(')');
        }
        Value::String(s) => out.push_str(s),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

/// Render a path as `[seg seg ...]`.
pub fn path_str(path: &Path) -> String {
    let mut out = String::from("[");
    for (i, seg) in path.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{seg}");
    }
    out.push(']');
    out
}

/// Format an explain payload as text; `None` (a valid value) prints
/// `Success!`.
pub fn explain_str(data: Option<&ExplainData>) -> String {
    let Some(data) = data else {
        return "Success!\n".to_string();
    };
    let mut out = String::new();
    for problem in &data.problems {
        if !problem.in_.is_empty() {
            let _ = write!(out, "In: {} ", path_str(&problem.in_));
        }
        let _ = write!(out, "val: {} fails", problem.val);
        if let Some(via) = problem.via.last() {
            let _ = write!(out, " spec: {via}");
        }
        if !problem.path.is_empty() {
            let _ = write!(out, " at: {}", path_str(&problem.path));
        }
        let _ = write!(out, " predicate: {}", form_str(&problem.pred));
        if let Some(reason) = &problem.reason {
            let _ = write!(out, ", {reason}");
        }
        out.push('\n');
        for (k, v) in &problem.extra {
            let _ = writeln!(out, "\t{k} {v}");
        }
    }
    for (k, v) in &data.extra {
        let _ = writeln!(out, "{k} {v}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn forms_render_in_list_notation() {
        assert_eq!(form_str(&json!(["=", ["count", "%"], 2])), "(= (count %) 2)");
        assert_eq!(form_str(&json!("int?")), "int?");
        assert_eq!(form_str(&json!(3)), "3");
    }

    #[test]
    fn success_prints_for_valid_input() {
        assert_eq!(explain_str(None), "Success!\n");
    }

    #[test]
    fn problem_lines_follow_the_documented_order() {
        let name = Name::parse("app/thing").unwrap();
        let problem = Problem::new(
            vec![PathSeg::from("s")],
            json!("string?"),
            json!(3),
            vec![name],
            vec![PathSeg::from(1usize)],
        )
        .with_reason("Extra input");
        let data = ExplainData {
            problems: vec![problem],
            spec: json!("app/thing"),
            value: json!([1, 3]),
            extra: Map::new(),
        };
        let text = explain_str(Some(&data));
        assert_eq!(
            text,
            "In: [1] val: 3 fails spec: app/thing at: [s] predicate: string?, Extra input\n"
        );
    }
}
