//! Generator bridge over `proptest` strategies.
//!
//! The kernel consumes generators through this crate only. A [`Gen`] is a
//! boxed strategy producing `serde_json::Value`; the combinators here are the
//! fixed surface the spec engine composes generators from. Shrinking is not
//! exposed; sampling drives a fresh `TestRunner` per call.

use proptest::collection::vec as strategy_vec;
use proptest::sample::select;
use proptest::strategy::{BoxedStrategy, Just, Strategy, Union, ValueTree};
use proptest::test_runner::TestRunner;
use serde_json::{Map, Number, Value};

/// Errors raised while constructing or sampling values.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// The strategy could not produce a value (e.g. a `such_that` predicate
    /// rejected every candidate the runner was willing to try).
    #[error("value generation failed: {0}")]
    Unsatisfied(String),
}

/// A generator of dynamic values.
///
/// Combinators consume `self`; reuse is expressed by regenerating from the
/// generator-producing closures the kernel stores, not by cloning.
pub struct Gen {
    strategy: BoxedStrategy<Value>,
}

impl Gen {
    fn from_strategy(strategy: impl Strategy<Value = Value> + 'static) -> Gen {
        Gen {
            strategy: strategy.boxed(),
        }
    }

    /// Always produces `x`.
    pub fn constant(x: Value) -> Gen {
        Gen::from_strategy(Just(x))
    }

    /// Map the produced value through `f`.
    pub fn fmap(self, f: impl Fn(Value) -> Value + 'static) -> Gen {
        Gen::from_strategy(self.strategy.prop_map(f))
    }

    /// Monadic bind: feed the produced value into a generator-producing `f`.
    pub fn bind(self, f: impl Fn(Value) -> Gen + 'static) -> Gen {
        Gen::from_strategy(self.strategy.prop_flat_map(move |v| f(v).strategy))
    }

    /// Keep only values satisfying `pred`.
    ///
    /// Retries are bounded by the runner's rejection budget at sampling time;
    /// exhaustion surfaces as [`GenError::Unsatisfied`].
    pub fn such_that(self, label: &str, pred: impl Fn(&Value) -> bool + 'static) -> Gen {
        Gen::from_strategy(self.strategy.prop_filter(label.to_string(), pred))
    }

    /// Uniform choice between alternatives. `gens` must be non-empty.
    pub fn one_of(gens: Vec<Gen>) -> Gen {
        Gen::from_strategy(Union::new(gens.into_iter().map(|g| g.strategy)))
    }

    /// Fixed-arity array: one element from each generator, in order.
    pub fn tuple(gens: Vec<Gen>) -> Gen {
        let parts = Gen::sequence(gens);
        Gen::from_strategy(parts.prop_map(Value::Array))
    }

    /// Concatenation of sequence generators: each generator is expected to
    /// produce an array; the results are appended into one array.
    pub fn cat(gens: Vec<Gen>) -> Gen {
        let parts = Gen::sequence(gens);
        Gen::from_strategy(parts.prop_map(|vs| {
            let mut out = Vec::new();
            for v in vs {
                match v {
                    Value::Array(items) => out.extend(items),
                    other => out.push(other),
                }
            }
            Value::Array(out)
        }))
    }

    // Fold a heterogeneous list of generators into one Vec-producing strategy.
    fn sequence(gens: Vec<Gen>) -> BoxedStrategy<Vec<Value>> {
        let mut acc: BoxedStrategy<Vec<Value>> = Just(Vec::new()).boxed();
        for g in gens {
            acc = (acc, g.strategy)
                .prop_map(|(mut vs, v)| {
                    vs.push(v);
                    vs
                })
                .boxed();
        }
        acc
    }

    /// Array of `min..=max` elements drawn from `g`.
    pub fn vector_of(g: Gen, min: usize, max: usize) -> Gen {
        let max = max.max(min);
        Gen::from_strategy(strategy_vec(g.strategy, min..=max).prop_map(Value::Array))
    }

    /// Like [`Gen::vector_of`] but rejects arrays with duplicate elements.
    pub fn vector_distinct(g: Gen, min: usize, max: usize) -> Gen {
        let max = max.max(min);
        Gen::from_strategy(
            strategy_vec(g.strategy, min..=max)
                .prop_filter("distinct elements".to_string(), |vs| {
                    vs.iter()
                        .enumerate()
                        .all(|(i, v)| !vs[..i].contains(v))
                })
                .prop_map(Value::Array),
        )
    }

    /// Object with a fixed key set; each key's value drawn from its generator.
    pub fn hash_map(entries: Vec<(String, Gen)>) -> Gen {
        let mut acc: BoxedStrategy<Map<String, Value>> = Just(Map::new()).boxed();
        for (k, g) in entries {
            acc = (acc, g.strategy)
                .prop_map(move |(mut m, v)| {
                    m.insert(k.clone(), v);
                    m
                })
                .boxed();
        }
        Gen::from_strategy(acc.prop_map(Value::Object))
    }

    /// Integer in `lo..=hi` inclusive.
    pub fn choose(lo: i64, hi: i64) -> Gen {
        let hi = hi.max(lo);
        Gen::from_strategy((lo..=hi).prop_map(|n| Value::Number(Number::from(n))))
    }

    /// Integer over the full (or bounded) `i64` range.
    pub fn large_integer(min: Option<i64>, max: Option<i64>) -> Gen {
        Gen::choose(min.unwrap_or(i64::MIN), max.unwrap_or(i64::MAX))
    }

    /// Finite double in `lo..hi`.
    pub fn double_in(lo: f64, hi: f64) -> Gen {
        Gen::from_strategy((lo..hi).prop_filter_map("representable double", |f| {
            Number::from_f64(f).map(Value::Number)
        }))
    }

    pub fn boolean() -> Gen {
        Gen::from_strategy(proptest::bool::ANY.prop_map(Value::Bool))
    }

    /// Short alphanumeric string.
    pub fn alphanumeric_string() -> Gen {
        let charset: Vec<char> = ('a'..='z').chain('A'..='Z').chain('0'..='9').collect();
        Gen::from_strategy(
            strategy_vec(select(charset), 0..=16).prop_map(|cs| Value::String(cs.into_iter().collect())),
        )
    }

    /// Arbitrary JSON value with bounded depth.
    pub fn any_value() -> Gen {
        let charset: Vec<char> = ('a'..='z').chain('0'..='9').collect();
        let string = strategy_vec(select(charset), 0..=8).prop_map(|cs| Value::String(cs.into_iter().collect()));
        let leaf = Union::new(vec![
            Just(Value::Null).boxed(),
            proptest::bool::ANY.prop_map(Value::Bool).boxed(),
            (-1_000_000i64..1_000_000).prop_map(|n| Value::Number(Number::from(n))).boxed(),
            string.boxed(),
        ]);
        let key_charset: Vec<char> = ('a'..='z').collect();
        Gen::from_strategy(leaf.prop_recursive(3, 24, 4, move |inner| {
            let key = strategy_vec(select(key_charset.clone()), 1..=6)
                .prop_map(|cs| cs.into_iter().collect::<String>());
            Union::new(vec![
                strategy_vec(inner.clone(), 0..=4).prop_map(Value::Array).boxed(),
                strategy_vec((key, inner), 0..=4)
                    .prop_map(|pairs| Value::Object(pairs.into_iter().collect()))
                    .boxed(),
            ])
        }))
    }

    /// Defer construction of the underlying generator until sampling.
    pub fn delay(f: impl Fn() -> Gen + 'static) -> Gen {
        Gen::from_strategy(Just(()).prop_flat_map(move |_| f().strategy))
    }

    /// Produce one value.
    pub fn generate(&self) -> Result<Value, GenError> {
        let mut runner = TestRunner::default();
        let tree = self
            .strategy
            .new_tree(&mut runner)
            .map_err(|reason| GenError::Unsatisfied(reason.to_string()))?;
        Ok(tree.current())
    }

    /// Produce `n` values.
    pub fn sample(&self, n: usize) -> Result<Vec<Value>, GenError> {
        let mut runner = TestRunner::default();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let tree = self
                .strategy
                .new_tree(&mut runner)
                .map_err(|reason| GenError::Unsatisfied(reason.to_string()))?;
            out.push(tree.current());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constant_generates_itself() {
        let g = Gen::constant(json!({"a": 1}));
        assert_eq!(g.generate().unwrap(), json!({"a": 1}));
    }

    #[test]
    fn choose_stays_in_range() {
        let g = Gen::choose(3, 7);
        for v in g.sample(50).unwrap() {
            let n = v.as_i64().unwrap();
            assert!((3..=7).contains(&n), "out of range: {n}");
        }
    }

    #[test]
    fn tuple_has_fixed_shape() {
        let g = Gen::tuple(vec![Gen::choose(0, 9), Gen::boolean()]);
        for v in g.sample(20).unwrap() {
            let arr = v.as_array().unwrap();
            assert_eq!(arr.len(), 2);
            assert!(arr[0].is_i64());
            assert!(arr[1].is_boolean());
        }
    }

    #[test]
    fn cat_concatenates_segments() {
        let g = Gen::cat(vec![
            Gen::constant(json!([1, 2])),
            Gen::constant(json!(["x"])),
        ]);
        assert_eq!(g.generate().unwrap(), json!([1, 2, "x"]));
    }

    #[test]
    fn such_that_filters() {
        let g = Gen::choose(0, 100).such_that("even", |v| v.as_i64().unwrap() % 2 == 0);
        for v in g.sample(30).unwrap() {
            assert_eq!(v.as_i64().unwrap() % 2, 0);
        }
    }

    #[test]
    fn impossible_filter_is_an_error() {
        let g = Gen::choose(0, 10).such_that("never", |_| false);
        assert!(g.generate().is_err());
    }

    #[test]
    fn vector_distinct_has_no_duplicates() {
        let g = Gen::vector_distinct(Gen::choose(0, 50), 3, 6);
        for v in g.sample(20).unwrap() {
            let arr = v.as_array().unwrap();
            for (i, x) in arr.iter().enumerate() {
                assert!(!arr[..i].contains(x));
            }
        }
    }

    #[test]
    fn hash_map_holds_all_keys() {
        let g = Gen::hash_map(vec![
            ("a".to_string(), Gen::choose(0, 5)),
            ("b".to_string(), Gen::boolean()),
        ]);
        let v = g.generate().unwrap();
        let obj = v.as_object().unwrap();
        assert!(obj.contains_key("a") && obj.contains_key("b"));
    }
}
