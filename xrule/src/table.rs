//! Iteration table
//!
//! A rule body is re-walked once per combination of rows of its iterable
//! sub-expressions. Each iterable registers its full [`ValueSet`] as a column
//! of a [`SubTable`]; the cursor then selects one row per column under the
//! current alignment, and [`IterationTable::next`] advances it like an
//! odometer until every combination in every alignment has been visited.
//!
//! Nested forms (for bodies, where clauses, aggregate arguments, function
//! bodies) push their own sub-table so their rows never multiply with the
//! caller's.

use crate::ast::NodeId;
use crate::value::{Alignment, Value, ValueSet};
use crate::{XruleError, XruleResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::fmt;
use tracing::trace;

/// Node id qualified by the call sites it is evaluated under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessingId {
    pub prefix: Vec<NodeId>,
    pub node: NodeId,
}

impl ProcessingId {
    pub fn new(prefix: &[NodeId], node: NodeId) -> Self {
        Self {
            prefix: prefix.to_vec(),
            node,
        }
    }

    pub fn root(node: NodeId) -> Self {
        Self {
            prefix: Vec::new(),
            node,
        }
    }

    /// Table of a rule, constant or function body under `prefix`
    pub fn body(prefix: &[NodeId]) -> Self {
        Self::new(prefix, NodeId::BODY_TABLE)
    }
}

impl fmt::Display for ProcessingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in &self.prefix {
            write!(f, "{}/", id.0)?;
        }
        write!(f, "{}", self.node)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    At {
        alignment: Option<Alignment>,
        row: usize,
    },
    /// No value under the current alignment; reads as unbound
    Absent,
}

#[derive(Debug, Clone)]
struct Column {
    values: ValueSet,
    masters: Vec<ProcessingId>,
    /// Computed for one specific alignment
    alignment_bound: bool,
}

/// How a column relates to the rest of its table, given when registering it
#[derive(Debug, Clone, Default)]
pub struct ColumnLinks {
    /// Columns whose current rows fed this column's values
    pub masters: Vec<ProcessingId>,
    /// The values were restricted to the table's alignment
    pub alignment_bound: bool,
    /// Alignment an enclosing table pinned this column to
    pub pinned: Option<Alignment>,
}

#[derive(Debug, Clone)]
pub struct SubTable {
    id: ProcessingId,
    columns: FxHashMap<ProcessingId, Column>,
    order: Vec<ProcessingId>,
    current_alignment: Option<Alignment>,
    /// "No alignment" was reached through the queue and is not provisional
    unaligned_final: bool,
    unprocessed: BTreeSet<Alignment>,
    processed: FxHashSet<Alignment>,
    unaligned_pending: bool,
    cursor: FxHashMap<ProcessingId, Slot>,
    used: FxHashSet<ProcessingId>,
    dependent_alignment: Option<Alignment>,
}

impl SubTable {
    fn new(id: ProcessingId) -> Self {
        Self {
            id,
            columns: FxHashMap::default(),
            order: Vec::new(),
            current_alignment: None,
            unaligned_final: false,
            unprocessed: BTreeSet::new(),
            processed: FxHashSet::default(),
            unaligned_pending: false,
            cursor: FxHashMap::default(),
            used: FxHashSet::default(),
            dependent_alignment: None,
        }
    }

    pub fn id(&self) -> &ProcessingId {
        &self.id
    }

    pub fn is_empty(&self) -> bool {
        self.cursor.is_empty()
    }

    pub fn current_alignment(&self) -> Option<&Alignment> {
        self.current_alignment.as_ref()
    }

    pub fn column_count(&self) -> usize {
        self.order.len()
    }

    fn add_column(
        &mut self,
        column_id: ProcessingId,
        values: ValueSet,
        links: ColumnLinks,
    ) -> XruleResult<()> {
        if self.cursor.contains_key(&column_id) {
            return Err(XruleError::build_table(format!(
                "column {} is already present in table {}",
                column_id, self.id
            )));
        }
        let was_empty = self.cursor.is_empty();

        for alignment in values.alignments() {
            if self.current_alignment.as_ref() != Some(alignment)
                && !self.processed.contains(alignment)
            {
                self.unprocessed.insert(alignment.clone());
            }
        }

        if was_empty {
            match self.unprocessed.pop_first() {
                Some(first) => {
                    self.processed.insert(first.clone());
                    self.current_alignment = Some(first);
                    self.unaligned_pending = values.has_unaligned();
                }
                None => {
                    self.current_alignment = None;
                    self.unaligned_pending = false;
                }
            }
            self.unaligned_final = false;
        } else if self.current_alignment.is_none() && !self.unaligned_final {
            if let Some(first) = self.unprocessed.pop_first() {
                trace!(table = %self.id, alignment = %first, "Leaving provisional no-alignment");
                self.processed.insert(first.clone());
                self.current_alignment = Some(first);
                self.unaligned_pending = values.has_unaligned()
                    || self.columns.values().any(|c| c.values.has_unaligned());
            }
        } else if values.has_unaligned() && self.current_alignment.is_some() {
            self.unaligned_pending = true;
        }

        let masters: Vec<ProcessingId> = links
            .masters
            .into_iter()
            .filter(|m| self.columns.contains_key(m))
            .collect();
        if self.dependent_alignment.is_none() {
            self.dependent_alignment = links.pinned;
        }

        let slot = self.seed(&values);
        self.order.push(column_id.clone());
        self.cursor.insert(column_id.clone(), slot);
        self.columns.insert(
            column_id,
            Column {
                values,
                masters,
                alignment_bound: links.alignment_bound,
            },
        );
        Ok(())
    }

    fn seed(&self, values: &ValueSet) -> Slot {
        if self.current_alignment.is_some() && values.contains_alignment(&self.current_alignment)
        {
            Slot::At {
                alignment: self.current_alignment.clone(),
                row: 0,
            }
        } else if values.has_unaligned() {
            Slot::At {
                alignment: None,
                row: 0,
            }
        } else {
            Slot::Absent
        }
    }

    fn current_value(&mut self, column_id: &ProcessingId) -> Option<Value> {
        let slot = self.cursor.get(column_id)?;
        let mut value = match slot {
            Slot::Absent => Value::default_unbound(),
            Slot::At { alignment, row } => self
                .columns
                .get(column_id)
                .and_then(|c| c.values.get(alignment))
                .and_then(|values| values.get(*row))
                .cloned()
                .unwrap_or_else(Value::default_unbound),
        };
        value.used_expressions.insert(column_id.node);
        self.used.insert(column_id.clone());
        Some(value)
    }

    fn peek(&self, column_id: &ProcessingId) -> Option<&Value> {
        match self.cursor.get(column_id)? {
            Slot::Absent => None,
            Slot::At { alignment, row } => self
                .columns
                .get(column_id)
                .and_then(|c| c.values.get(alignment))
                .and_then(|values| values.get(*row)),
        }
    }

    fn rows(&self, column_id: &ProcessingId, alignment: &Option<Alignment>) -> usize {
        self.columns
            .get(column_id)
            .and_then(|c| c.values.get(alignment))
            .map_or(0, <[Value]>::len)
    }

    fn next(&mut self) {
        if self.cursor.is_empty() {
            return;
        }
        let mut incremented = false;
        let order = self.order.clone();
        for column_id in order.iter().rev() {
            let (alignment, row) = match self.cursor.get(column_id) {
                Some(Slot::At { alignment, row }) => (alignment.clone(), *row),
                Some(Slot::Absent) | None => continue,
            };
            let used = self.used.contains(column_id);
            if used && row + 1 < self.rows(column_id, &alignment) {
                self.cursor.insert(
                    column_id.clone(),
                    Slot::At {
                        alignment,
                        row: row + 1,
                    },
                );
                self.remove_dependents(column_id);
                incremented = true;
                break;
            }
            if row != 0 {
                self.cursor
                    .insert(column_id.clone(), Slot::At { alignment, row: 0 });
                self.remove_dependents(column_id);
            }
        }
        self.used.clear();
        if !incremented {
            self.next_alignment();
        }
    }

    fn remove_dependents(&mut self, master: &ProcessingId) {
        let dependents: Vec<ProcessingId> = self
            .columns
            .iter()
            .filter(|(_, c)| c.masters.contains(master))
            .map(|(id, _)| id.clone())
            .collect();
        for dependent in dependents {
            self.remove_column(&dependent);
        }
    }

    fn remove_column(&mut self, column_id: &ProcessingId) {
        if self.columns.remove(column_id).is_none() {
            return;
        }
        self.cursor.remove(column_id);
        self.used.remove(column_id);
        self.order.retain(|c| c != column_id);
        self.remove_dependents(column_id);
    }

    fn next_alignment(&mut self) {
        let bound: Vec<ProcessingId> = self
            .columns
            .iter()
            .filter(|(_, c)| c.alignment_bound || !c.masters.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        for column_id in &bound {
            self.remove_column(column_id);
        }

        if let Some(next) = self.unprocessed.pop_first() {
            self.processed.insert(next.clone());
            self.current_alignment = Some(next);
        } else if self.unaligned_pending {
            self.unaligned_pending = false;
            self.unaligned_final = true;
            self.current_alignment = None;
        } else {
            self.cursor.clear();
            trace!(table = %self.id, "Table exhausted");
            return;
        }
        trace!(
            table = %self.id,
            alignment = ?self.current_alignment.as_ref().map(ToString::to_string),
            "Moved to next alignment"
        );

        let reseeded: Vec<(ProcessingId, Slot)> = self
            .order
            .iter()
            .filter_map(|id| self.columns.get(id).map(|c| (id.clone(), self.seed(&c.values))))
            .collect();
        self.cursor = reseeded.into_iter().collect();
        if self.cursor.is_empty() {
            // Every column was alignment-bound; keep the table alive so the
            // body is evaluated again under the new alignment.
            self.cursor.insert(self.id.clone(), Slot::Absent);
        }
    }
}

/// Stack of sub-tables for one rule execution
#[derive(Debug, Clone, Default)]
pub struct IterationTable {
    tables: Vec<SubTable>,
}

impl IterationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a nested sub-table, which becomes current
    pub fn add_table(&mut self, id: ProcessingId) -> XruleResult<()> {
        if self.position(&id).is_some() {
            return Err(XruleError::build_table(format!(
                "table {} already exists",
                id
            )));
        }
        self.tables.push(SubTable::new(id));
        Ok(())
    }

    pub fn del_table(&mut self, id: &ProcessingId) -> XruleResult<()> {
        let position = self.require(id)?;
        self.tables.remove(position);
        Ok(())
    }

    pub fn contains_table(&self, id: &ProcessingId) -> bool {
        self.position(id).is_some()
    }

    /// Id of the most recently added sub-table, if any
    pub fn current_table_id(&self) -> Option<&ProcessingId> {
        self.tables.last().map(SubTable::id)
    }

    pub fn table(&self, id: &ProcessingId) -> XruleResult<&SubTable> {
        let position = self.require(id)?;
        Ok(&self.tables[position])
    }

    pub fn is_empty(&self, id: &ProcessingId) -> XruleResult<bool> {
        Ok(self.table(id)?.is_empty())
    }

    pub fn add_column(
        &mut self,
        table_id: &ProcessingId,
        column_id: ProcessingId,
        values: ValueSet,
        links: ColumnLinks,
    ) -> XruleResult<()> {
        let position = self.require(table_id)?;
        self.tables[position].add_column(column_id, values, links)
    }

    /// Value the cursor selects for a column, marking the column as used.
    /// `None` when the column is not registered.
    pub fn current_value(
        &mut self,
        table_id: &ProcessingId,
        column_id: &ProcessingId,
    ) -> XruleResult<Option<Value>> {
        let position = self.require(table_id)?;
        Ok(self.tables[position].current_value(column_id))
    }

    /// Selected value of a column in whichever table holds it, without
    /// marking it used. Absent slots read as unbound.
    pub fn peek_column(&self, column_id: &ProcessingId) -> Option<Value> {
        self.tables
            .iter()
            .rev()
            .find(|t| t.cursor.contains_key(column_id))
            .map(|t| t.peek(column_id).cloned().unwrap_or_else(Value::default_unbound))
    }

    pub fn next(&mut self, table_id: &ProcessingId) -> XruleResult<()> {
        let position = self.require(table_id)?;
        self.tables[position].next();
        Ok(())
    }

    /// Fix the alignment dependent columns of a fresh table are restricted to
    pub fn pin_alignment(&mut self, table_id: &ProcessingId, alignment: Alignment) -> XruleResult<()> {
        let position = self.require(table_id)?;
        self.tables[position].dependent_alignment = Some(alignment);
        Ok(())
    }

    pub fn current_alignment(&self, table_id: &ProcessingId) -> XruleResult<Option<Alignment>> {
        Ok(self.table(table_id)?.current_alignment.clone())
    }

    /// Alignment of the nearest table at or below `table_id` that has one,
    /// either current or pinned. `None` when there is no such table.
    pub fn dependent_alignment(&self, table_id: &ProcessingId) -> Option<Alignment> {
        let top = self.position(table_id)?;
        self.tables[..=top].iter().rev().find_map(|t| {
            t.current_alignment
                .clone()
                .or_else(|| t.dependent_alignment.clone())
        })
    }

    fn position(&self, id: &ProcessingId) -> Option<usize> {
        self.tables.iter().rposition(|t| t.id == *id)
    }

    fn require(&self, id: &ProcessingId) -> XruleResult<usize> {
        self.position(id)
            .ok_or_else(|| XruleError::build_table(format!("table {} does not exist", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AspectKey, AspectValue};

    fn alignment(name: &str) -> Alignment {
        [(AspectKey::ENTITY, AspectValue::Typed(name.to_string()))]
            .into_iter()
            .collect()
    }

    fn unaligned(values: &[i64]) -> ValueSet {
        let mut set = ValueSet::new();
        for v in values {
            set.append(None, Value::int(*v));
        }
        set
    }

    fn aligned(buckets: &[(&str, &[i64])]) -> ValueSet {
        let mut set = ValueSet::new();
        for (name, values) in buckets {
            for v in *values {
                set.append(Some(alignment(name)), Value::int(*v).with_alignment(Some(alignment(name))));
            }
        }
        set
    }

    fn col(n: u64) -> ProcessingId {
        ProcessingId::root(NodeId(n))
    }

    /// Drive a table the way the rule loop does, reading every column each
    /// pass and registering columns on first sight
    fn enumerate(columns: Vec<ValueSet>) -> Vec<Vec<i64>> {
        let root = col(0);
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        let mut seen = Vec::new();
        loop {
            let mut row = Vec::new();
            for (i, values) in columns.iter().enumerate() {
                let id = col(i as u64 + 1);
                let value = match table.current_value(&root, &id).unwrap() {
                    Some(v) => v,
                    None => {
                        table
                            .add_column(&root, id.clone(), values.clone(), ColumnLinks::default())
                            .unwrap();
                        table.current_value(&root, &id).unwrap().unwrap()
                    }
                };
                row.push(match value.kind {
                    crate::value::ValueKind::Int(i) => i,
                    _ => -1,
                });
            }
            seen.push(row);
            table.next(&root).unwrap();
            if table.is_empty(&root).unwrap() {
                break;
            }
        }
        seen
    }

    #[test]
    fn odometer_visits_full_product_once() {
        let rows = enumerate(vec![unaligned(&[1, 2]), unaligned(&[10, 20, 30])]);
        assert_eq!(rows.len(), 6);
        let unique: BTreeSet<_> = rows.iter().cloned().collect();
        assert_eq!(unique.len(), 6);
        assert_eq!(rows[0], vec![1, 10]);
        assert_eq!(rows[1], vec![1, 20]);
        assert_eq!(rows[3], vec![2, 10]);
    }

    #[test]
    fn alignments_are_not_cross_multiplied() {
        let a = aligned(&[("e1", &[1, 2]), ("e2", &[3])]);
        let b = aligned(&[("e1", &[10]), ("e2", &[30, 40])]);
        let rows = enumerate(vec![a, b]);
        assert_eq!(rows, vec![vec![1, 10], vec![2, 10], vec![3, 30], vec![3, 40]]);
    }

    #[test]
    fn missing_alignment_reads_as_unbound() {
        let a = aligned(&[("e1", &[1]), ("e2", &[2])]);
        let b = aligned(&[("e1", &[10])]);
        let rows = enumerate(vec![a, b]);
        assert_eq!(rows, vec![vec![1, 10], vec![2, -1]]);
    }

    #[test]
    fn unaligned_values_join_every_alignment() {
        let a = aligned(&[("e1", &[1]), ("e2", &[2])]);
        let rows = enumerate(vec![a, unaligned(&[7])]);
        // the trailing no-alignment pass sees the aligned column as absent
        assert_eq!(rows, vec![vec![1, 7], vec![2, 7], vec![-1, 7]]);
    }

    #[test]
    fn provisional_no_alignment_switches_to_real_alignment() {
        let rows = enumerate(vec![unaligned(&[7]), aligned(&[("e1", &[1]), ("e2", &[2])])]);
        assert_eq!(rows, vec![vec![7, 1], vec![7, 2], vec![7, -1]]);
    }

    #[test]
    fn unused_columns_do_not_advance() {
        let root = col(0);
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        table
            .add_column(&root, col(1), unaligned(&[1, 2, 3]), ColumnLinks::default())
            .unwrap();
        // never read: the table has nothing to advance
        table.next(&root).unwrap();
        assert!(table.is_empty(&root).unwrap());
    }

    #[test]
    fn advancing_a_master_drops_its_dependents() {
        let root = col(0);
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        table
            .add_column(&root, col(1), unaligned(&[1, 2]), ColumnLinks::default())
            .unwrap();
        table.current_value(&root, &col(1)).unwrap();
        table
            .add_column(
                &root,
                col(2),
                unaligned(&[5]),
                ColumnLinks {
                    masters: vec![col(1)],
                    ..Default::default()
                },
            )
            .unwrap();
        table.current_value(&root, &col(2)).unwrap();
        table.next(&root).unwrap();
        assert!(table.current_value(&root, &col(2)).unwrap().is_none());
        assert_eq!(table.table(&root).unwrap().column_count(), 1);
    }

    #[test]
    fn alignment_change_drops_bound_columns() {
        let root = col(0);
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        table
            .add_column(&root, col(1), aligned(&[("e1", &[1]), ("e2", &[2])]), ColumnLinks::default())
            .unwrap();
        table.current_value(&root, &col(1)).unwrap();
        table
            .add_column(
                &root,
                col(2),
                aligned(&[("e1", &[10])]),
                ColumnLinks {
                    alignment_bound: true,
                    ..Default::default()
                },
            )
            .unwrap();
        table.current_value(&root, &col(2)).unwrap();
        table.next(&root).unwrap();
        assert_eq!(table.current_alignment(&root).unwrap(), Some(alignment("e2")));
        assert!(table.current_value(&root, &col(2)).unwrap().is_none());
    }

    #[test]
    fn duplicate_columns_and_unknown_tables_are_build_errors() {
        let root = col(0);
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        table
            .add_column(&root, col(1), unaligned(&[1]), ColumnLinks::default())
            .unwrap();
        let err = table
            .add_column(&root, col(1), unaligned(&[1]), ColumnLinks::default())
            .unwrap_err();
        assert!(matches!(err, XruleError::BuildTable { .. }));
        let err = table
            .add_column(&col(9), col(2), unaligned(&[1]), ColumnLinks::default())
            .unwrap_err();
        assert!(matches!(err, XruleError::BuildTable { .. }));
        assert!(table.add_table(root).is_err());
    }

    #[test]
    fn dependent_alignment_scans_outward() {
        let root = col(0);
        let nested = ProcessingId::new(&[NodeId(3)], NodeId(4));
        let mut table = IterationTable::new();
        table.add_table(root.clone()).unwrap();
        table
            .add_column(&root, col(1), aligned(&[("e1", &[1])]), ColumnLinks::default())
            .unwrap();
        table.add_table(nested.clone()).unwrap();
        assert_eq!(table.current_table_id(), Some(&nested));
        assert_eq!(table.dependent_alignment(&nested), Some(alignment("e1")));
        table.del_table(&nested).unwrap();
        assert_eq!(table.current_table_id(), Some(&root));
    }
}
