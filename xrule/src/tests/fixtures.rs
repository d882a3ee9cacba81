use crate::ast::RuleSet;
use crate::document::{
    Concept, DataKind, Decimals, Entity, Fact, FactId, MemoryDocument, Period, PeriodType, QName,
    UnitValue,
};
use crate::engine::Engine;
use crate::resource_limits::RunOptions;
use crate::response::RunReport;
use std::sync::Arc;

pub const NS: &str = "http://example.com/gaap";

pub fn q(name: &str) -> QName {
    QName::new(NS, name)
}

fn monetary(name: &str) -> Concept {
    Concept {
        name: q(name),
        data_kind: DataKind::Monetary,
        period_type: PeriodType::Instant,
        balance: None,
        is_abstract: false,
    }
}

pub fn fact(concept: &str, entity: &str, value: &str) -> Fact {
    Fact {
        id: FactId(0),
        concept: q(concept),
        period: Period::instant("2024-12-31").unwrap(),
        unit: Some(UnitValue::single(QName::new("http://www.xbrl.org/2003/iso4217", "USD"))),
        entity: Entity::new("http://www.sec.gov/CIK", entity),
        dimensions: Default::default(),
        value: Some(value.to_string()),
        decimals: Some(Decimals::Places(0)),
    }
}

/// Assets for three entities; liabilities for the first two only
///
/// | entity | Assets | Liabilities |
/// |--------|--------|-------------|
/// | e1     | 100    | 50          |
/// | e2     | 10     | 20          |
/// | e3     | 5      |             |
pub fn balance_sheet() -> MemoryDocument {
    MemoryDocument::new(
        vec![
            fact("Assets", "e1", "100"),
            fact("Assets", "e2", "10"),
            fact("Assets", "e3", "5"),
            fact("Liabilities", "e1", "50"),
            fact("Liabilities", "e2", "20"),
        ],
        vec![monetary("Assets"), monetary("Liabilities")],
    )
    .unwrap()
}

pub fn run(document: MemoryDocument, rule_set: RuleSet, options: RunOptions) -> RunReport {
    Engine::new(Arc::new(document), rule_set, options)
        .unwrap()
        .run()
        .unwrap()
}

pub fn run_default(rule_set: RuleSet) -> RunReport {
    run(balance_sheet(), rule_set, RunOptions::default())
}
