//! Evaluation contexts
//!
//! [`GlobalContext`] holds everything shared by a run: the document, its fact
//! index, the analyzed rule set and the global caches. [`RuleContext`] is the
//! mutable state of one rule execution and is never shared.

use crate::ast::{AspectFilter, ConstantDecl, Declaration, FunctionDecl, NodeId, NodeMeta, RuleSet};
use crate::cache::{GlobalCache, LocalCache};
use crate::document::{DocumentGraph, FactId};
use crate::index::FactIndex;
use crate::resource_limits::RunOptions;
use crate::table::{IterationTable, ProcessingId};
use crate::value::{Alignment, Value};
use crate::{EvalResult, Signal, XruleError, XruleResult};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// State shared by every rule of a run
pub struct GlobalContext {
    pub document: Arc<dyn DocumentGraph>,
    pub index: Arc<FactIndex>,
    pub rule_set: Arc<RuleSet>,
    pub cache: GlobalCache,
    pub options: RunOptions,
    constants: FxHashMap<String, usize>,
    functions: FxHashMap<String, usize>,
}

impl GlobalContext {
    pub fn new(
        document: Arc<dyn DocumentGraph>,
        index: Arc<FactIndex>,
        rule_set: Arc<RuleSet>,
        options: RunOptions,
    ) -> Self {
        let constants = rule_set
            .constants
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let functions = rule_set
            .functions
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            document,
            index,
            rule_set,
            cache: GlobalCache::default(),
            options,
            constants,
            functions,
        }
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantDecl> {
        self.constants
            .get(name)
            .map(|&i| &self.rule_set.constants[i])
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions
            .get(name)
            .map(|&i| &self.rule_set.functions[i])
    }

    pub fn caching(&self) -> bool {
        !self.options.no_cache
    }
}

#[derive(Debug, Clone)]
enum LazyState {
    Pending,
    Evaluating,
    Done(Value),
}

#[derive(Debug, Clone)]
enum Binding<'g> {
    Value(Value),
    Lazy(&'g Declaration, LazyState),
}

/// Variables introduced by one block, loop body or function call
#[derive(Debug, Clone, Default)]
pub struct Frame<'g> {
    bindings: Vec<(String, Binding<'g>)>,
}

/// Outcome of looking up a variable by name
pub(crate) enum VarLookup<'g> {
    Ready(Value),
    Pending {
        frame: usize,
        slot: usize,
        decl: &'g Declaration,
    },
    Cycle,
    Missing,
}

/// Mutable state of one rule execution
pub struct RuleContext<'g> {
    pub global: &'g GlobalContext,
    pub rule_name: String,
    pub table: IterationTable,
    pub cache: LocalCache,
    /// Facts that contributed to the current iteration
    pub facts: Vec<FactId>,
    /// Tags published during the current iteration
    pub tags: BTreeMap<String, Value>,
    pub iterations: u64,
    scopes: Vec<Frame<'g>>,
    prefix: Vec<NodeId>,
    envelopes: Vec<&'g [AspectFilter]>,
    depth: usize,
    function_depth: usize,
}

impl<'g> RuleContext<'g> {
    pub fn new(global: &'g GlobalContext, rule_name: impl Into<String>) -> Self {
        Self {
            global,
            rule_name: rule_name.into(),
            table: IterationTable::new(),
            cache: LocalCache::default(),
            facts: Vec::new(),
            tags: BTreeMap::new(),
            iterations: 0,
            scopes: Vec::new(),
            prefix: Vec::new(),
            envelopes: Vec::new(),
            depth: 0,
            function_depth: 0,
        }
    }

    /// Independent copy for message evaluation. The table, accumulators and
    /// scopes are copied; the global context stays shared and the local cache
    /// starts empty.
    pub fn fork(&self) -> RuleContext<'g> {
        RuleContext {
            global: self.global,
            rule_name: self.rule_name.clone(),
            table: self.table.clone(),
            cache: LocalCache::default(),
            facts: self.facts.clone(),
            tags: self.tags.clone(),
            iterations: self.iterations,
            scopes: self.scopes.clone(),
            prefix: self.prefix.clone(),
            envelopes: self.envelopes.clone(),
            depth: self.depth,
            function_depth: self.function_depth,
        }
    }

    pub fn document(&self) -> &'g dyn DocumentGraph {
        self.global.document.as_ref()
    }

    pub fn index(&self) -> &'g FactIndex {
        self.global.index.as_ref()
    }

    pub fn processing_id(&self, node: NodeId) -> ProcessingId {
        ProcessingId::new(&self.prefix, node)
    }

    /// Sub-table a node's column belongs to
    pub fn table_for(&self, meta: &NodeMeta) -> XruleResult<ProcessingId> {
        if meta.table_id.is_assigned() {
            return Ok(self.processing_id(meta.table_id));
        }
        self.table
            .current_table_id()
            .cloned()
            .ok_or_else(|| XruleError::build_table("no current table"))
    }

    pub fn prefix(&self) -> &[NodeId] {
        &self.prefix
    }

    pub(crate) fn push_prefix(&mut self, call_site: NodeId) {
        self.prefix.push(call_site);
    }

    pub(crate) fn pop_prefix(&mut self) {
        self.prefix.pop();
    }

    /// Merge a value's provenance into the iteration accumulators
    pub fn record(&mut self, value: &Value) {
        for fact in &value.facts {
            if !self.facts.contains(fact) {
                self.facts.push(*fact);
            }
        }
        for (name, tagged) in &value.tags {
            self.tags.insert(name.clone(), tagged.clone());
        }
    }

    pub fn reset_iteration(&mut self) {
        self.facts.clear();
        self.tags.clear();
    }

    pub(crate) fn enter(&mut self) -> XruleResult<()> {
        self.depth += 1;
        let limit = self.global.options.limits.max_expression_depth;
        if self.depth > limit {
            return Err(XruleError::ResourceLimitExceeded {
                limit_name: "max_expression_depth".to_string(),
                limit_value: limit.to_string(),
                actual_value: self.depth.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn exit(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn enter_function(&mut self) -> XruleResult<()> {
        self.function_depth += 1;
        let limit = self.global.options.limits.max_function_depth;
        if self.function_depth > limit {
            return Err(XruleError::ResourceLimitExceeded {
                limit_name: "max_function_depth".to_string(),
                limit_value: limit.to_string(),
                actual_value: self.function_depth.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn exit_function(&mut self) {
        self.function_depth = self.function_depth.saturating_sub(1);
    }

    /// Count one full iteration against the per-rule limit
    pub(crate) fn count_iteration(&mut self) -> XruleResult<()> {
        self.iterations += 1;
        let limit = self.global.options.limits.max_iterations_per_rule;
        if self.iterations > limit {
            return Err(XruleError::ResourceLimitExceeded {
                limit_name: "max_iterations_per_rule".to_string(),
                limit_value: limit.to_string(),
                actual_value: self.iterations.to_string(),
            });
        }
        Ok(())
    }

    pub fn push_frame(&mut self) {
        self.scopes.push(Frame::default());
    }

    pub fn pop_frame(&mut self) {
        self.scopes.pop();
    }

    pub fn bind_value(&mut self, name: &str, value: Value) {
        if self.scopes.is_empty() {
            self.push_frame();
        }
        if let Some(frame) = self.scopes.last_mut() {
            frame.bindings.push((name.to_string(), Binding::Value(value)));
        }
    }

    /// Bind a declaration, evaluated on first reference
    pub fn bind_lazy(&mut self, decl: &'g Declaration) {
        if self.scopes.is_empty() {
            self.push_frame();
        }
        if let Some(frame) = self.scopes.last_mut() {
            frame
                .bindings
                .push((decl.name.clone(), Binding::Lazy(decl, LazyState::Pending)));
        }
    }

    pub(crate) fn lookup_var(&self, name: &str) -> VarLookup<'g> {
        for (frame_index, frame) in self.scopes.iter().enumerate().rev() {
            if let Some((slot, (_, binding))) = frame
                .bindings
                .iter()
                .enumerate()
                .rev()
                .find(|(_, (n, _))| n == name)
            {
                return match binding {
                    Binding::Value(value) => VarLookup::Ready(value.clone()),
                    Binding::Lazy(_, LazyState::Done(value)) => VarLookup::Ready(value.clone()),
                    Binding::Lazy(_, LazyState::Evaluating) => VarLookup::Cycle,
                    Binding::Lazy(decl, LazyState::Pending) => VarLookup::Pending {
                        frame: frame_index,
                        slot,
                        decl,
                    },
                };
            }
        }
        VarLookup::Missing
    }

    /// Current value of a variable without evaluating anything
    pub fn peek_var(&self, name: &str) -> Option<Value> {
        match self.lookup_var(name) {
            VarLookup::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn set_lazy_state(&mut self, frame: usize, slot: usize, done: Option<Value>, evaluating: bool) {
        if let Some((_, Binding::Lazy(_, state))) = self
            .scopes
            .get_mut(frame)
            .and_then(|f| f.bindings.get_mut(slot))
        {
            *state = match (done, evaluating) {
                (Some(value), _) => LazyState::Done(value),
                (None, true) => LazyState::Evaluating,
                (None, false) => LazyState::Pending,
            };
        }
    }

    /// Detach every frame above `frame` so a declaration is evaluated in the
    /// scope it was written in
    pub(crate) fn split_scopes(&mut self, frame: usize) -> Vec<Frame<'g>> {
        self.scopes.split_off((frame + 1).min(self.scopes.len()))
    }

    pub(crate) fn restore_scopes(&mut self, frames: Vec<Frame<'g>>) {
        self.scopes.extend(frames);
    }

    /// Swap in a fresh scope stack (function bodies see only their params)
    pub(crate) fn replace_scopes(&mut self, frames: Vec<Frame<'g>>) -> Vec<Frame<'g>> {
        std::mem::replace(&mut self.scopes, frames)
    }

    pub(crate) fn replace_envelopes(
        &mut self,
        envelopes: Vec<&'g [AspectFilter]>,
    ) -> Vec<&'g [AspectFilter]> {
        std::mem::replace(&mut self.envelopes, envelopes)
    }

    pub(crate) fn push_envelope(&mut self, filters: &'g [AspectFilter]) {
        self.envelopes.push(filters);
    }

    pub(crate) fn pop_envelope(&mut self) {
        self.envelopes.pop();
    }

    /// Filters inherited from enclosing envelopes, innermost last
    pub(crate) fn envelope_filters(&self) -> Vec<&'g AspectFilter> {
        self.envelopes.iter().flat_map(|f| f.iter()).collect()
    }

    /// Run `body` once per row combination of a private sub-table
    ///
    /// Each produced value carries the facts and tags of its own inner
    /// iteration. Iteration stops are skipped; the caller's accumulators are
    /// restored afterwards whatever the outcome.
    pub fn isolated<F>(&mut self, table_id: ProcessingId, body: F) -> EvalResult<Vec<Value>>
    where
        F: FnMut(&mut RuleContext<'g>) -> EvalResult<Value>,
    {
        self.isolated_pinned(table_id, None, body)
    }

    /// [`RuleContext::isolated`] with the sub-table's dependent alignment
    /// fixed up front, so dependent factsets inside it match `pinned`
    pub fn isolated_pinned<F>(
        &mut self,
        table_id: ProcessingId,
        pinned: Option<Alignment>,
        mut body: F,
    ) -> EvalResult<Vec<Value>>
    where
        F: FnMut(&mut RuleContext<'g>) -> EvalResult<Value>,
    {
        self.table.add_table(table_id.clone())?;
        if let Some(alignment) = pinned {
            self.table.pin_alignment(&table_id, alignment)?;
        }
        let saved_facts = std::mem::take(&mut self.facts);
        let saved_tags = std::mem::take(&mut self.tags);

        let mut produced = Vec::new();
        let outcome = loop {
            if let Err(err) = self.count_iteration() {
                break Err(Signal::Error(err));
            }
            match body(self) {
                Ok(mut value) => {
                    value.add_facts(&self.facts);
                    for (name, tagged) in &self.tags {
                        value.tags.insert(name.clone(), tagged.clone());
                    }
                    produced.push(value);
                }
                Err(Signal::IterationStop) => {}
                Err(other) => break Err(other),
            }
            self.reset_iteration();
            if let Err(err) = self.table.next(&table_id) {
                break Err(Signal::Error(err));
            }
            match self.table.is_empty(&table_id) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(err) => break Err(Signal::Error(err)),
            }
        };

        let removed = self.table.del_table(&table_id);
        self.facts = saved_facts;
        self.tags = saved_tags;
        outcome?;
        removed?;
        Ok(produced)
    }
}
