use super::fixtures::{q, run, run_default};
use crate::ast::build::*;
use crate::ast::{ComparisonOp, RuleSet};
use crate::document::MemoryDocument;
use crate::resource_limits::{ResourceLimits, RunOptions};
use crate::response::RunReport;
use std::collections::BTreeSet;

fn only(rules: Vec<crate::ast::Rule>) -> RuleSet {
    RuleSet {
        rules,
        ..Default::default()
    }
}

fn values(report: &RunReport, rule: &str) -> Vec<String> {
    let mut values: Vec<String> = report
        .outcome(rule)
        .unwrap()
        .messages
        .iter()
        .filter_map(|m| m.value.clone())
        .collect();
    values.sort();
    values
}

#[test]
fn one_result_per_entity_alignment() {
    let report = run_default(only(vec![output("assets", facts(q("Assets")))]));
    let outcome = report.outcome("assets").unwrap();
    assert_eq!(outcome.messages.len(), 3);
    assert_eq!(outcome.iterations, 3);
    let alignments: BTreeSet<_> = outcome
        .messages
        .iter()
        .map(|m| m.alignment.clone().unwrap())
        .collect();
    assert_eq!(alignments.len(), 3);
    assert_eq!(values(&report, "assets"), vec!["10", "100", "5"]);
}

#[test]
fn factsets_join_on_alignment() {
    let report = run_default(only(vec![assertion(
        "covered",
        cmp(ComparisonOp::Ge, facts(q("Assets")), facts(q("Liabilities"))),
    )]));
    let outcome = report.outcome("covered").unwrap();
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.messages.len(), 1);
    let message = &outcome.messages[0];
    assert_eq!(message.text, "Assertion covered unsatisfied");
    assert_eq!(message.facts.len(), 2);
}

#[test]
fn satisfied_assertions_report_true_results() {
    let report = run_default(only(vec![satisfied_assertion(
        "covered",
        cmp(ComparisonOp::Ge, facts(q("Assets")), facts(q("Liabilities"))),
    )]));
    let outcome = report.outcome("covered").unwrap();
    assert_eq!(outcome.messages.len(), 1);
    assert_eq!(outcome.messages[0].text, "Assertion covered satisfied");
}

#[test]
fn messages_render_tags_and_declarations() {
    let rule = with_message(
        output(
            "assets",
            block(vec![tagged("a", facts(q("Assets")), "assets")], var("a")),
        ),
        vec![text("Assets are "), expr(tag("assets")), text(" ("), expr(mul(var("a"), int(2))), text(")")],
    );
    let report = run_default(only(vec![rule]));
    let mut texts: Vec<String> = report.messages().map(|m| m.text.clone()).collect();
    texts.sort();
    assert_eq!(
        texts,
        vec!["Assets are 10 (20)", "Assets are 100 (200)", "Assets are 5 (10)"]
    );
}

#[test]
fn missing_facts_produce_no_results() {
    let covered = FactsetBuilder::new().concept(q("Equity")).covered().build();
    let report = run_default(only(vec![output("plain", facts(q("Equity"))), output("covered", covered)]));
    assert_eq!(report.message_count(), 0);
    assert!(report.failures().next().is_none());
    assert_eq!(report.outcome("plain").unwrap().iterations, 1);
}

#[test]
fn aggregates_group_by_alignment() {
    let everything = FactsetBuilder::new().concept(q("Assets")).covered().build();
    let report = run_default(only(vec![
        output("total", call("sum", vec![everything])),
        output("per_entity", call("sum", vec![facts(q("Assets"))])),
        output("none", call("count", vec![facts(q("Equity"))])),
    ]));
    assert_eq!(values(&report, "total"), vec!["115"]);
    assert_eq!(values(&report, "per_entity"), vec!["10", "100", "5"]);
    assert_eq!(values(&report, "none"), vec!["0"]);
}

#[test]
fn where_clauses_compare_against_the_candidate_alignment() {
    let richer = FactsetBuilder::new()
        .concept(q("Assets"))
        .where_clause(gt(var("fact"), facts(q("Liabilities"))))
        .build();
    let report = run_default(only(vec![output("richer", richer)]));
    assert_eq!(values(&report, "richer"), vec!["100"]);
}

#[test]
fn where_clause_reading_a_declared_factset_follows_its_alignment() {
    let lower = FactsetBuilder::new()
        .concept(q("Liabilities"))
        .where_clause(lt(var("fact"), var("a")))
        .build();
    let report = run_default(only(vec![output(
        "lower",
        block(vec![decl("a", facts(q("Assets")))], lower),
    )]));
    assert!(report.failures().next().is_none());
    assert_eq!(values(&report, "lower"), vec!["50"]);
}

#[test]
fn covered_factsets_form_a_cross_product() {
    let assets = FactsetBuilder::new().concept(q("Assets")).covered().build();
    let liabilities = FactsetBuilder::new().concept(q("Liabilities")).covered().build();
    let report = run_default(only(vec![output("pairs", add(assets, liabilities))]));
    let outcome = report.outcome("pairs").unwrap();
    assert_eq!(outcome.iterations, 6);
    assert_eq!(outcome.messages.len(), 6);
    assert_eq!(
        values(&report, "pairs"),
        vec!["120", "150", "25", "30", "55", "60"]
    );
}

#[test]
fn isolating_forms_can_be_whole_bodies() {
    let everything = || FactsetBuilder::new().concept(q("Assets")).covered().build();
    let rule_set = RuleSet {
        constants: vec![constant_decl("asset_count", call("count", vec![everything()]))],
        functions: vec![function_decl("total_assets", &[], call("sum", vec![everything()]))],
        rules: vec![
            output("per_entity", call("count", vec![facts(q("Assets"))])),
            output("constant", constant("asset_count")),
            output("function", call("total_assets", vec![])),
        ],
    };
    let report = run_default(rule_set);
    assert!(report.failures().next().is_none());
    assert_eq!(values(&report, "per_entity"), vec!["1", "1", "1"]);
    assert_eq!(values(&report, "constant"), vec!["3"]);
    assert_eq!(values(&report, "function"), vec!["115"]);
}

#[test]
fn loops_and_filters_collect_their_results() {
    let report = run_default(only(vec![
        output(
            "doubled",
            for_each("x", list(vec![int(1), int(2), int(3)]), mul(var("x"), int(2))),
        ),
        output(
            "large",
            filter(
                set(vec![int(1), int(5), int(10)]),
                "item",
                Some(gt(var("item"), int(4))),
                None,
            ),
        ),
    ]));
    assert_eq!(values(&report, "doubled"), vec!["list(2, 4, 6)"]);
    assert_eq!(values(&report, "large"), vec!["set(5, 10)"]);
}

#[test]
fn constants_and_functions_are_shared_by_rules() {
    let rule_set = RuleSet {
        constants: vec![constant_decl("threshold", int(50))],
        functions: vec![function_decl("double", &["x"], mul(var("x"), int(2)))],
        rules: vec![
            assertion("large", gt(facts(q("Assets")), constant("threshold"))),
            output("double", call("double", vec![facts(q("Assets"))])),
        ],
    };
    let report = run_default(rule_set);
    assert_eq!(report.outcome("large").unwrap().messages.len(), 2);
    assert_eq!(values(&report, "double"), vec!["10", "20", "200"]);
}

#[test]
fn failing_rules_are_recorded() {
    let report = run_default(only(vec![
        output("broken", div(facts(q("Assets")), int(0))),
        output("fine", int(1)),
    ]));
    let broken = report.outcome("broken").unwrap();
    let error = broken.error.as_deref().unwrap();
    assert!(error.contains("broken"), "{}", error);
    assert!(broken.messages.is_empty());
    assert_eq!(values(&report, "fine"), vec!["1"]);
}

#[test]
fn resource_limits_abort_only_the_offending_rule() {
    let rule_set = RuleSet {
        functions: vec![function_decl("spin", &["x"], call("spin", vec![var("x")]))],
        rules: vec![
            output("assets", facts(q("Assets"))),
            output("spin", call("spin", vec![int(1)])),
            output("fine", int(1)),
        ],
        ..Default::default()
    };
    let options = RunOptions {
        limits: ResourceLimits {
            max_iterations_per_rule: 2,
            ..ResourceLimits::default()
        },
        ..Default::default()
    };
    let report = run(crate::tests::fixtures::balance_sheet(), rule_set, options);
    let assets = report.outcome("assets").unwrap().error.clone().unwrap();
    assert!(assets.contains("max_iterations_per_rule"));
    let spin = report.outcome("spin").unwrap().error.clone().unwrap();
    assert!(spin.contains("Resource limit exceeded"));
    assert!(!report.outcome("fine").unwrap().failed());
}

#[test]
fn rules_run_against_an_empty_document() {
    let report = run(
        MemoryDocument::default(),
        only(vec![output("assets", facts(q("Assets"))), output("one", int(1))]),
        RunOptions::default(),
    );
    assert_eq!(report.message_count(), 1);
}
