//! In-memory document loaded from JSON

use super::{
    Concept, DocumentGraph, Fact, FactId, QName, Relationship, RelationshipId, Role, Taxonomy,
};
use crate::{XruleError, XruleResult};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A complete instance plus its taxonomy, held in memory
///
/// Fact ids are reassigned to their position on construction so that
/// [`DocumentGraph::fact`] is a direct index.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    facts: Vec<Fact>,
    concepts: Vec<Concept>,
    concept_index: FxHashMap<QName, usize>,
    relationships: Vec<Relationship>,
    roles: Vec<Role>,
    taxonomies: BTreeMap<String, Arc<Taxonomy>>,
}

#[derive(Deserialize)]
struct DocumentRepr {
    #[serde(default)]
    facts: Vec<Fact>,
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    relationships: Vec<Relationship>,
    #[serde(default)]
    roles: Vec<Role>,
    #[serde(default)]
    taxonomies: BTreeMap<String, Taxonomy>,
}

impl MemoryDocument {
    pub fn new(facts: Vec<Fact>, concepts: Vec<Concept>) -> XruleResult<Self> {
        let mut doc = MemoryDocument::default();
        for concept in concepts {
            doc.add_concept(concept)?;
        }
        for fact in facts {
            doc.add_fact(fact);
        }
        Ok(doc)
    }

    pub fn from_json(text: &str) -> XruleResult<Self> {
        let repr: DocumentRepr = serde_json::from_str(text)
            .map_err(|e| XruleError::Document(format!("Invalid instance JSON: {}", e)))?;
        let mut doc = MemoryDocument::new(repr.facts, repr.concepts)?;
        doc.relationships = repr.relationships;
        doc.roles = repr.roles;
        doc.taxonomies = repr
            .taxonomies
            .into_iter()
            .map(|(url, taxonomy)| (url, Arc::new(taxonomy)))
            .collect();
        Ok(doc)
    }

    pub fn add_concept(&mut self, concept: Concept) -> XruleResult<()> {
        if self.concept_index.contains_key(&concept.name) {
            return Err(XruleError::Document(format!(
                "Duplicate concept {}",
                concept.name
            )));
        }
        self.concept_index
            .insert(concept.name.clone(), self.concepts.len());
        self.concepts.push(concept);
        Ok(())
    }

    pub fn add_fact(&mut self, mut fact: Fact) -> FactId {
        let id = FactId(self.facts.len() as u32);
        fact.id = id;
        self.facts.push(fact);
        id
    }

    pub fn add_relationship(&mut self, relationship: Relationship) -> RelationshipId {
        self.relationships.push(relationship);
        RelationshipId(self.relationships.len() as u32 - 1)
    }

    pub fn add_role(&mut self, role: Role) {
        self.roles.push(role);
    }

    pub fn add_taxonomy(&mut self, url: impl Into<String>, taxonomy: Taxonomy) {
        self.taxonomies.insert(url.into(), Arc::new(taxonomy));
    }
}

impl DocumentGraph for MemoryDocument {
    fn facts(&self) -> &[Fact] {
        &self.facts
    }

    fn concept(&self, name: &QName) -> Option<&Concept> {
        self.concept_index.get(name).map(|&i| &self.concepts[i])
    }

    fn concepts(&self) -> Vec<&Concept> {
        self.concepts.iter().collect()
    }

    fn relationships(
        &self,
        arcrole: &str,
        role: Option<&str>,
    ) -> Vec<(RelationshipId, &Relationship)> {
        self.relationships
            .iter()
            .enumerate()
            .filter(|(_, r)| r.arcrole == arcrole && role.is_none_or(|role| r.role == role))
            .map(|(i, r)| (RelationshipId(i as u32), r))
            .collect()
    }

    fn relationship(&self, id: RelationshipId) -> Option<&Relationship> {
        self.relationships.get(id.0 as usize)
    }

    fn role(&self, uri: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.uri == uri)
    }

    fn load_taxonomy(&self, url: &str) -> XruleResult<Arc<Taxonomy>> {
        self.taxonomies
            .get(url)
            .cloned()
            .ok_or_else(|| XruleError::Document(format!("Taxonomy '{}' is not available", url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_facts_and_reassigns_ids() {
        let doc = MemoryDocument::from_json(
            r#"{
                "concepts": [
                    {"name": "{us-gaap}Assets", "data_kind": "monetary", "period_type": "instant", "balance": "debit"}
                ],
                "facts": [
                    {"id": 40, "concept": "{us-gaap}Assets", "period": {"instant": "2020-12-31"},
                     "unit": "{iso4217}USD", "entity": {"scheme": "cik", "id": "1"},
                     "value": "100", "decimals": "INF"},
                    {"concept": "{us-gaap}Assets", "period": {"instant": "2019-12-31"},
                     "unit": "{iso4217}USD", "entity": {"scheme": "cik", "id": "1"},
                     "value": "90", "decimals": -3}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(doc.facts().len(), 2);
        assert_eq!(doc.facts()[0].id, FactId(0));
        assert_eq!(doc.facts()[1].id, FactId(1));
        let assets = QName::parse("{us-gaap}Assets").unwrap();
        assert!(doc.concept(&assets).unwrap().is_monetary());
    }

    #[test]
    fn missing_taxonomy_is_a_document_error() {
        let doc = MemoryDocument::default();
        assert!(matches!(
            doc.load_taxonomy("http://example.com/tax.xsd"),
            Err(XruleError::Document(_))
        ));
    }

    #[test]
    fn duplicate_concepts_are_rejected() {
        let concept = Concept {
            name: QName::local("A"),
            data_kind: Default::default(),
            period_type: super::super::PeriodType::Instant,
            balance: None,
            is_abstract: false,
        };
        assert!(MemoryDocument::new(vec![], vec![concept.clone(), concept]).is_err());
    }
}
