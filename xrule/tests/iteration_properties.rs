use proptest::prelude::*;
use std::collections::BTreeSet;
use xrule::ast::NodeId;
use xrule::table::{ColumnLinks, IterationTable, ProcessingId};
use xrule::value::{AspectKey, AspectValue};
use xrule::{Alignment, Value, ValueKind, ValueSet};

fn col(n: u64) -> ProcessingId {
    ProcessingId::root(NodeId(n))
}

fn entity(index: usize) -> Alignment {
    [(AspectKey::ENTITY, AspectValue::Typed(format!("e{}", index)))]
        .into_iter()
        .collect()
}

/// Drive a table like the rule loop: read every column each pass,
/// registering a column the first time it is read
fn enumerate(columns: &[ValueSet]) -> Vec<Vec<i64>> {
    let root = col(0);
    let mut table = IterationTable::new();
    table.add_table(root.clone()).unwrap();
    let mut rows = Vec::new();
    loop {
        let mut row = Vec::new();
        for (i, values) in columns.iter().enumerate() {
            let id = col(i as u64 + 1);
            let value = match table.current_value(&root, &id).unwrap() {
                Some(value) => value,
                None => {
                    table
                        .add_column(&root, id.clone(), values.clone(), ColumnLinks::default())
                        .unwrap();
                    table.current_value(&root, &id).unwrap().unwrap()
                }
            };
            row.push(match value.kind {
                ValueKind::Int(i) => i,
                _ => -1,
            });
        }
        rows.push(row);
        table.next(&root).unwrap();
        if table.is_empty(&root).unwrap() {
            break;
        }
    }
    rows
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_unaligned_columns_enumerate_full_product(sizes in prop::collection::vec(1usize..5, 1..5)) {
        let columns: Vec<ValueSet> = sizes
            .iter()
            .map(|&size| {
                let mut set = ValueSet::new();
                for row in 0..size {
                    set.append(None, Value::int(row as i64));
                }
                set
            })
            .collect();
        let rows = enumerate(&columns);
        let expected: usize = sizes.iter().product();
        prop_assert_eq!(rows.len(), expected);
        let unique: BTreeSet<_> = rows.into_iter().collect();
        prop_assert_eq!(unique.len(), expected);
    }

    #[test]
    fn prop_alignments_are_never_cross_multiplied(
        buckets in prop::collection::vec((1usize..4, 1usize..4), 1..5)
    ) {
        let mut left = ValueSet::new();
        let mut right = ValueSet::new();
        for (index, &(a, b)) in buckets.iter().enumerate() {
            let alignment = entity(index);
            for row in 0..a {
                let value = Value::int((index * 100 + row) as i64).with_alignment(Some(alignment.clone()));
                left.append(Some(alignment.clone()), value);
            }
            for row in 0..b {
                let value = Value::int((index * 100 + row) as i64).with_alignment(Some(alignment.clone()));
                right.append(Some(alignment.clone()), value);
            }
        }
        let rows = enumerate(&[left, right]);
        let expected: usize = buckets.iter().map(|(a, b)| a * b).sum();
        prop_assert_eq!(rows.len(), expected);
        for row in &rows {
            prop_assert_eq!(row[0] / 100, row[1] / 100);
        }
        let unique: BTreeSet<_> = rows.into_iter().collect();
        prop_assert_eq!(unique.len(), expected);
    }

    #[test]
    fn prop_sets_deduplicate_by_shadow(items in prop::collection::vec(-5i64..5, 0..12)) {
        let values: Vec<Value> = items.iter().map(|&i| Value::int(i)).collect();
        let mut reversed = values.clone();
        reversed.reverse();
        let distinct: BTreeSet<i64> = items.iter().copied().collect();

        let set = Value::set(values);
        prop_assert_eq!(set.items().map(|i| i.len()), Some(distinct.len()));
        prop_assert_eq!(set, Value::set(reversed));
    }

    #[test]
    fn prop_dicts_compare_by_value(key in "[a-z]{1,4}", v1 in -50i64..50, v2 in -50i64..50) {
        let first = Value::dict(vec![(Value::string(&key), Value::int(v1))]);
        let second = Value::dict(vec![(Value::string(&key), Value::int(v2))]);
        prop_assert_eq!(first == second, v1 == v2);
    }
}

#[test]
fn nested_collections_compare_structurally() {
    let inner = |items: &[i64]| Value::set(items.iter().map(|&i| Value::int(i)).collect());
    let a = Value::list(vec![inner(&[1, 2]), inner(&[3])]);
    let b = Value::list(vec![inner(&[2, 1]), inner(&[3])]);
    assert_eq!(a, b);
    assert_eq!(Value::set(vec![Value::int(1), Value::int(2), Value::int(2), Value::int(3)])
        .items()
        .map(|i| i.len()), Some(3));
}
