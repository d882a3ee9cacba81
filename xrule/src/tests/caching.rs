use super::fixtures::{balance_sheet, q, run};
use crate::ast::build::*;
use crate::ast::RuleSet;
use crate::resource_limits::RunOptions;

fn mixed_rules() -> RuleSet {
    let richer = FactsetBuilder::new()
        .concept(q("Assets"))
        .where_clause(gt(var("fact"), facts(q("Liabilities"))))
        .build();
    RuleSet {
        constants: vec![
            constant_decl("assets", facts(q("Assets"))),
            constant_decl("limit", int(20)),
        ],
        functions: vec![
            function_decl("half", &["x"], div(var("x"), int(2))),
            function_decl("everything", &[], call("sum", vec![
                FactsetBuilder::new().concept(q("Assets")).covered().build(),
            ])),
        ],
        rules: vec![
            output("half", call("half", vec![constant("assets")])),
            output("share", div(facts(q("Assets")), call("everything", vec![]))),
            assertion("limit", gt(facts(q("Liabilities")), constant("limit"))),
            output("richer", richer),
            output(
                "pairs",
                block(
                    vec![decl("a", facts(q("Assets"))), decl("l", facts(q("Liabilities")))],
                    add(var("a"), var("l")),
                ),
            ),
        ],
    }
}

#[test]
fn caching_does_not_change_results() {
    let cached = run(balance_sheet(), mixed_rules(), RunOptions::default());
    let uncached = run(
        balance_sheet(),
        mixed_rules(),
        RunOptions {
            no_cache: true,
            ..Default::default()
        },
    );
    assert_eq!(cached.results.len(), 5);
    assert!(cached.failures().next().is_none(), "{:?}", cached.failures().collect::<Vec<_>>());
    // cache hits skip isolated passes, so only the emitted results must agree
    for (with, without) in cached.results.iter().zip(&uncached.results) {
        assert_eq!(with.rule, without.rule);
        assert_eq!(with.messages, without.messages, "rule {}", with.rule);
        assert_eq!(with.error, without.error);
    }
}

#[test]
fn repeated_expressions_see_their_own_rows() {
    // the same factset twice must not be served the first row's value
    let rule_set = RuleSet {
        rules: vec![output(
            "sum",
            block(
                vec![decl("a", facts(q("Assets")))],
                add(var("a"), call("sum", vec![facts(q("Assets"))])),
            ),
        )],
        ..Default::default()
    };
    let report = run(balance_sheet(), rule_set, RunOptions::default());
    let mut values: Vec<String> = report.messages().filter_map(|m| m.value.clone()).collect();
    values.sort();
    assert_eq!(values, vec!["10", "20", "200"]);
}
