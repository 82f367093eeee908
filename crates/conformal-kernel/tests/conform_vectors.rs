//! Integration vectors: the documented seed scenarios and the universal
//! properties every spec must satisfy (validity agreement, round-tripping,
//! generation validity, registry resolution, bounded recursion).

use conformal_kernel::instrument::defn;
use conformal_kernel::{
    all_of, any_of, cat, coll_of, conform, def, exercise, explain_data, explain_str, fdef, gen,
    get_spec, keys, multi_spec, pred, star, tuple, unform, valid, Conformed, EveryOpts, FSpecDecl,
    KeyReq, KeysDecl, MultiFn, Name, Overrides, PathSeg, Retag, SpecRef,
};
use proptest::proptest;
use serde_json::{json, Value};

fn n(s: &str) -> Name {
    Name::parse(s).unwrap()
}

// --- S1: tuple ----------------------------------------------------------

#[test]
fn s1_tuple_conform_and_explain() {
    let s = tuple(vec![pred::int().into(), pred::string().into()]);
    assert_eq!(
        conform(s.clone(), &json!([1, "a"])).unwrap(),
        Conformed::Valid(json!([1, "a"]))
    );
    assert_eq!(conform(s.clone(), &json!([1])).unwrap(), Conformed::Invalid);
    let data = explain_data(s, &json!([1])).unwrap().unwrap();
    assert_eq!(data.problems.len(), 1);
    assert_eq!(data.problems[0].pred, json!(["=", ["count", "%"], 2]));
    assert_eq!(data.problems[0].val, json!([1]));
}

// --- S2: or -------------------------------------------------------------

#[test]
fn s2_or_tagged_alternation() {
    let s = any_of(vec![
        ("i", pred::int().into()),
        ("s", pred::string().into()),
    ]);
    assert_eq!(
        conform(s.clone(), &json!(3)).unwrap(),
        Conformed::Valid(json!(["i", 3]))
    );
    assert_eq!(unform(s.clone(), &json!(["s", "q"])).unwrap(), json!("q"));
    assert_eq!(conform(s.clone(), &json!(true)).unwrap(), Conformed::Invalid);
    let data = explain_data(s, &json!(true)).unwrap().unwrap();
    assert_eq!(data.problems.len(), 2);
    assert_eq!(data.problems[0].path, vec![PathSeg::from("i")]);
    assert_eq!(data.problems[1].path, vec![PathSeg::from("s")]);
}

// --- S3: keys with a logical group ---------------------------------------

#[test]
fn s3_keys_with_or_group() {
    let s = keys(KeysDecl {
        req: vec![
            KeyReq::Key(n("vectors.s3/a")),
            KeyReq::Or(vec![
                KeyReq::Key(n("vectors.s3/b")),
                KeyReq::Key(n("vectors.s3/c")),
            ]),
        ],
        opt: vec![n("vectors.s3/d")],
        ..KeysDecl::default()
    });
    let ok = json!({"vectors.s3/a": 1, "vectors.s3/b": 2});
    assert_eq!(conform(s.clone(), &ok).unwrap(), Conformed::Valid(ok));
    assert_eq!(
        conform(s.clone(), &json!({"vectors.s3/a": 1})).unwrap(),
        Conformed::Invalid
    );
    let data = explain_data(s, &json!({"vectors.s3/a": 1}))
        .unwrap()
        .unwrap();
    assert_eq!(data.problems.len(), 1);
    assert_eq!(
        data.problems[0].pred,
        json!([
            "or",
            ["contains?", "%", "vectors.s3/b"],
            ["contains?", "%", "vectors.s3/c"]
        ])
    );
}

// --- S4: regex cat + star -------------------------------------------------

#[test]
fn s4_cat_star_destructuring() {
    let re = cat(vec![
        ("xs", star(pred::int()).into()),
        ("s", pred::string().into()),
    ]);
    let s = conformal_kernel::re_spec(re);
    assert_eq!(
        conform(s.clone(), &json!([1, 2, 3, "x"])).unwrap(),
        Conformed::Valid(json!({"xs": [1, 2, 3], "s": "x"}))
    );
    assert_eq!(
        conform(s.clone(), &json!([1, 2, "x", 3])).unwrap(),
        Conformed::Invalid
    );
    let data = explain_data(s, &json!([1, 2, "x", 3])).unwrap().unwrap();
    assert_eq!(data.problems[0].reason.as_deref(), Some("Extra input"));
}

// --- S5: multi-spec -------------------------------------------------------

#[test]
fn s5_multi_spec_dispatch() {
    def("vectors.s5/kind", pred::string()).unwrap();
    def("vectors.s5/n", pred::int()).unwrap();
    def("vectors.s5/s", pred::string()).unwrap();
    let mf = MultiFn::on_key(n("vectors.s5/event"), "kind");
    mf.add_method(
        json!("a"),
        keys(KeysDecl {
            req_un: vec![
                KeyReq::Key(n("vectors.s5/kind")),
                KeyReq::Key(n("vectors.s5/n")),
            ],
            ..KeysDecl::default()
        }),
    );
    mf.add_method(
        json!("b"),
        keys(KeysDecl {
            req_un: vec![
                KeyReq::Key(n("vectors.s5/kind")),
                KeyReq::Key(n("vectors.s5/s")),
            ],
            ..KeysDecl::default()
        }),
    );
    let s = multi_spec(mf, Retag::Key("kind".to_string()));
    let ok = json!({"kind": "a", "n": 1});
    assert_eq!(conform(s.clone(), &ok).unwrap(), Conformed::Valid(ok));
    let data = explain_data(s, &json!({"kind": "z"})).unwrap().unwrap();
    assert_eq!(data.problems.len(), 1);
    assert_eq!(data.problems[0].reason.as_deref(), Some("no method"));
    assert_eq!(data.problems[0].path, vec![PathSeg::from("z")]);
}

// --- S6: fspec ------------------------------------------------------------

#[test]
fn s6_fspec_generative_conform() {
    use std::sync::Arc;
    defn(
        "vectors.s6/good",
        Arc::new(|args: &[Value]| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x.saturating_add(1)))
        }),
    )
    .unwrap();
    defn(
        "vectors.s6/bad",
        Arc::new(|args: &[Value]| {
            let x = args.first().and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(x.saturating_sub(1)))
        }),
    )
    .unwrap();
    let decl = FSpecDecl {
        args: Some(SpecRef::Re(cat(vec![("x", pred::int().into())]))),
        ret: Some(pred::int().into()),
        func: Some(
            pred::pred("ret-gte-x", |v| {
                let ret = v.get("ret").and_then(Value::as_i64);
                let x = v
                    .get("args")
                    .and_then(|a| a.get("x"))
                    .and_then(Value::as_i64);
                matches!((ret, x), (Some(r), Some(x)) if r >= x)
            })
            .into(),
        ),
    };
    let name = fdef("vectors.s6/contract", decl).unwrap();
    let s = get_spec(&name).unwrap();
    assert!(s.conform(&json!("vectors.s6/good")).unwrap().is_valid());
    assert_eq!(
        s.conform(&json!("vectors.s6/bad")).unwrap(),
        Conformed::Invalid
    );
}

// --- universal properties -------------------------------------------------

#[test]
fn validity_conform_and_explain_agree() {
    let specs: Vec<(conformal_kernel::Spec, Value)> = vec![
        (pred::int(), json!(3)),
        (pred::int(), json!("x")),
        (
            tuple(vec![pred::int().into(), pred::string().into()]),
            json!([1, "a"]),
        ),
        (
            tuple(vec![pred::int().into(), pred::string().into()]),
            json!([1, 2]),
        ),
        (
            any_of(vec![("i", pred::int().into()), ("s", pred::string().into())]),
            json!(true),
        ),
        (
            coll_of(pred::int(), EveryOpts::default()),
            json!([1, "x"]),
        ),
    ];
    for (s, x) in specs {
        let is_valid = valid(s.clone(), &x).unwrap();
        let conformed = conform(s.clone(), &x).unwrap();
        let explained = explain_data(s, &x).unwrap();
        assert_eq!(is_valid, conformed.is_valid());
        assert_eq!(is_valid, explained.is_none());
    }
}

#[test]
fn conformed_values_round_trip() {
    let re = cat(vec![
        ("xs", star(pred::int()).into()),
        ("s", pred::string().into()),
    ]);
    let s = conformal_kernel::re_spec(re);
    let input = json!([1, 2, "x"]);
    let c = conform(s.clone(), &input).unwrap().into_value().unwrap();
    let back = unform(s.clone(), &c).unwrap();
    assert_eq!(back, input);
    assert_eq!(
        conform(s, &back).unwrap(),
        Conformed::Valid(c)
    );
}

#[test]
fn predicate_conform_is_identity_hence_idempotent() {
    let s = pred::int();
    let once = conform(s.clone(), &json!(5)).unwrap().into_value().unwrap();
    let twice = conform(s, &once).unwrap().into_value().unwrap();
    assert_eq!(once, twice);
}

#[test]
fn generated_samples_are_valid() {
    let s = keys(KeysDecl {
        req: vec![KeyReq::Key(n("vectors.gen/id"))],
        opt: vec![n("vectors.gen/note")],
        ..KeysDecl::default()
    });
    def("vectors.gen/id", pred::pos_int()).unwrap();
    def("vectors.gen/note", pred::string()).unwrap();
    for (v, c) in exercise(s, 25, &Overrides::new()).unwrap() {
        assert!(c.is_valid(), "generated value failed its own spec: {v}");
    }
}

#[test]
fn registry_round_trips_registered_specs() {
    let name = def("vectors.registry/id", pred::pos_int()).unwrap();
    let s = get_spec(&name).unwrap();
    assert_eq!(s.name(), Some(&name));
    assert!(valid(name, &json!(4)).unwrap());
}

#[test]
fn recursive_spec_generation_terminates() {
    // expr = int | list of expr: a genuinely recursive reference through
    // the registry, bounded only by the recursion budget.
    def(
        "vectors.rec/expr",
        any_of(vec![
            ("n", pred::int().into()),
            (
                "sum",
                coll_of(
                    n("vectors.rec/expr"),
                    EveryOpts {
                        min_count: Some(1),
                        max_count: Some(2),
                        ..EveryOpts::default()
                    },
                )
                .into(),
            ),
        ]),
    )
    .unwrap();
    let g = gen(n("vectors.rec/expr"), &Overrides::new()).unwrap();
    for v in g.sample(10).unwrap() {
        assert!(valid(n("vectors.rec/expr"), &v).unwrap(), "bad sample: {v}");
    }
}

#[test]
fn explain_text_for_nested_failures_names_the_location() {
    def("vectors.text/age", all_of(vec![pred::int().into(), pred::pos_int().into()])).unwrap();
    let s = keys(KeysDecl {
        req: vec![KeyReq::Key(n("vectors.text/age"))],
        ..KeysDecl::default()
    });
    let text = explain_str(s, &json!({"vectors.text/age": -3})).unwrap();
    assert!(text.contains("val: -3 fails"), "text was: {text}");
    assert!(text.contains("spec: vectors.text/age"), "text was: {text}");
    assert!(text.contains("predicate: pos-int?"), "text was: {text}");
    assert!(text.contains("In: [vectors.text/age]"), "text was: {text}");
}

proptest! {
    #[test]
    fn tuple_conform_agrees_with_validity(a in -1000i64..1000, flag: bool) {
        let s = tuple(vec![pred::int().into(), pred::boolean().into()]);
        let v = json!([a, flag]);
        let c = conform(s.clone(), &v).unwrap();
        assert_eq!(c, Conformed::Valid(v.clone()));
        assert_eq!(unform(s, &v).unwrap(), v);
    }

    #[test]
    fn or_conform_tags_round_trip(a in -1000i64..1000) {
        let s = any_of(vec![("i", pred::int().into()), ("s", pred::string().into())]);
        let c = conform(s.clone(), &json!(a)).unwrap().into_value().unwrap();
        assert_eq!(unform(s, &c).unwrap(), json!(a));
    }
}
