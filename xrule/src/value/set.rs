use super::{Alignment, Value};
use std::collections::BTreeMap;

/// Every value an iterable expression produces, bucketed by alignment
///
/// The `None` key holds values without alignment. Iteration visits real
/// alignments in order and the unaligned bucket last.
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    buckets: BTreeMap<Option<Alignment>, Vec<Value>>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding one value under the value's own alignment
    pub fn single(value: Value) -> Self {
        let mut set = Self::new();
        set.push(value);
        set
    }

    /// Append under the value's own alignment
    pub fn push(&mut self, value: Value) {
        let alignment = value.alignment.clone();
        self.append(alignment, value);
    }

    pub fn append(&mut self, alignment: Option<Alignment>, value: Value) {
        self.buckets.entry(alignment).or_default().push(value);
    }

    pub fn get(&self, alignment: &Option<Alignment>) -> Option<&[Value]> {
        self.buckets.get(alignment).map(Vec::as_slice)
    }

    pub fn contains_alignment(&self, alignment: &Option<Alignment>) -> bool {
        self.buckets.contains_key(alignment)
    }

    pub fn has_unaligned(&self) -> bool {
        self.buckets.contains_key(&None)
    }

    /// Real alignments in iteration order
    pub fn alignments(&self) -> impl Iterator<Item = &Alignment> {
        self.buckets.keys().filter_map(Option::as_ref)
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&Option<Alignment>, &Vec<Value>)> {
        let aligned = self.buckets.iter().filter(|(k, _)| k.is_some());
        let unaligned = self.buckets.iter().filter(|(k, _)| k.is_none());
        aligned.chain(unaligned)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.buckets().flat_map(|(_, values)| values.iter())
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// The only value, when the set holds exactly one
    pub fn as_single(&self) -> Option<&Value> {
        if self.len() == 1 {
            self.values().next()
        } else {
            None
        }
    }

    /// Restrict to one alignment plus the unaligned bucket
    pub fn restricted_to(&self, alignment: &Alignment) -> ValueSet {
        let mut restricted = ValueSet::new();
        for (key, values) in self.buckets() {
            if key.as_ref().is_none_or(|a| a == alignment) {
                restricted.buckets.insert(key.clone(), values.clone());
            }
        }
        restricted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AspectKey, AspectValue};
    use crate::document::QName;

    fn concept_alignment(name: &str) -> Alignment {
        [(AspectKey::CONCEPT, AspectValue::QName(QName::local(name)))]
            .into_iter()
            .collect()
    }

    #[test]
    fn unaligned_bucket_comes_last() {
        let mut set = ValueSet::new();
        set.append(None, Value::int(0));
        set.append(Some(concept_alignment("B")), Value::int(2));
        set.append(Some(concept_alignment("A")), Value::int(1));
        let order: Vec<_> = set.buckets().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            order,
            vec![
                Some(concept_alignment("A")),
                Some(concept_alignment("B")),
                None
            ]
        );
        assert_eq!(set.len(), 3);
        assert!(set.as_single().is_none());
    }

    #[test]
    fn restriction_keeps_unaligned_values() {
        let mut set = ValueSet::new();
        set.append(None, Value::int(0));
        set.append(Some(concept_alignment("A")), Value::int(1));
        set.append(Some(concept_alignment("B")), Value::int(2));
        let restricted = set.restricted_to(&concept_alignment("A"));
        assert_eq!(restricted.len(), 2);
        assert!(!restricted.contains_alignment(&Some(concept_alignment("B"))));
    }
}
