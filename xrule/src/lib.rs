//! # xrule
//!
//! **Alignment-aware rules over fact graphs**
//!
//! xrule evaluates assertion and output rules against a document of facts
//! (concept, period, entity, unit and dimensions per fact). A rule body that
//! mentions several factsets runs once per combination of facts that share
//! an alignment, so `@Assets > @Liabilities` compares the two concepts per
//! entity and period without the rule spelling out the join.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xrule::{Engine, MemoryDocument, RuleSet, RunOptions, XruleResult};
//!
//! fn main() -> XruleResult<()> {
//!     let document = MemoryDocument::from_json(&std::fs::read_to_string("instance.json").unwrap())?;
//!     let rules = RuleSet::from_json(&std::fs::read_to_string("rules.json").unwrap())?;
//!
//!     let engine = Engine::new(Arc::new(document), rules, RunOptions::default())?;
//!     for message in engine.run()?.messages() {
//!         println!("{}: {}", message.rule, message.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Iteration table
//! Every rule owns an [`table::IterationTable`]: one column per iterable
//! expression, whose rows are that expression's values grouped by
//! alignment. The table walks the combinations like an odometer and keeps
//! every column on a single alignment at a time.
//!
//! ### Isolation
//! Aggregates, `for` loops, filters, factset `where` clauses, function
//! bodies and constants evaluate their inner expressions in a sub-table of
//! their own, exhaust it, and hand the collected results back to the
//! enclosing table as one value.
//!
//! ### Analysis
//! [`analysis::analyze`] annotates the rule set before evaluation: node ids,
//! iterability, the sub-table each node lives in and the iterables a node
//! depends on. Undeclared names are reported here, before any fact is read.

pub mod analysis;
pub mod ast;
pub mod cache;
pub mod document;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod index;
pub mod resource_limits;
pub mod response;
pub mod table;
pub mod value;

pub use ast::{NodeId, Rule, RuleSet, Severity};
pub use document::{DocumentGraph, MemoryDocument, QName};
pub use engine::Engine;
pub use error::{Signal, XruleError};
pub use evaluator::{RuleMessage, RuleRun};
pub use resource_limits::{ResourceLimits, RunOptions};
pub use response::{RuleOutcome, RunReport};
pub use value::{Alignment, Value, ValueKind, ValueSet};

/// Result type for engine operations
pub type XruleResult<T> = Result<T, XruleError>;

/// Result of evaluating an expression: a value, or a signal that ends the
/// iteration, re-enters it under another alignment, or fails the rule
pub type EvalResult<T> = Result<T, Signal>;

#[cfg(test)]
mod tests;
