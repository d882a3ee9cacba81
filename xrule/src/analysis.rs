//! Static analysis of a rule set
//!
//! Fills in every node's [`NodeMeta`](crate::ast::NodeMeta): its id, whether
//! it iterates, which sub-table its column lives in, and the variables and
//! iterables its value depends on. The evaluator trusts these flags and never
//! recomputes them.
//!
//! Nodes at the top level of a rule, constant or function body share the
//! reserved [`NodeId::BODY_TABLE`]. Every other sub-table is named after the
//! node that isolates it: a `for`, a factset's `where`, an aggregate call or
//! a `filter`. A body that is itself one of those forms therefore owns two
//! distinct tables.

use crate::ast::{
    ConstantDecl, Declaration, Factset, FunctionDecl, MessagePart, Node, NodeId, NodeIdGenerator,
    NodeKind, NodeMeta, Rule, RuleSet,
};
use crate::evaluator::functions::FunctionRegistry;
use crate::{XruleError, XruleResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use tracing::debug;

/// What a constant or function body produces, seen from a reference to it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Shape {
    iterable: bool,
    aligned: bool,
}

#[derive(Debug, Clone, Default)]
struct Summary {
    /// Variables (and `#tag`s) the value reads
    free_vars: BTreeSet<String>,
    /// `(table, node)` of iterables whose current row feeds the value
    iterables: BTreeSet<(NodeId, NodeId)>,
    has_alignment: bool,
    /// Free variables whose values carry an alignment
    aligned_vars: BTreeSet<String>,
    /// Contains a factset restricted to an enclosing alignment
    dependent: bool,
}

impl Summary {
    fn merge(&mut self, other: Summary) {
        self.free_vars.extend(other.free_vars);
        self.iterables.extend(other.iterables);
        self.has_alignment |= other.has_alignment;
        self.aligned_vars.extend(other.aligned_vars);
        self.dependent |= other.dependent;
    }

    /// Forget the iterables of an isolated sub-table once it is left
    fn leave_table(mut self, table: NodeId) -> Self {
        self.iterables.retain(|(t, _)| *t != table);
        self
    }

    fn unbind(mut self, name: &str) -> Self {
        self.free_vars.remove(name);
        self.aligned_vars.remove(name);
        self
    }

    fn dependent_iterables(&self) -> Vec<NodeId> {
        let ids: BTreeSet<NodeId> = self.iterables.iter().map(|(_, id)| *id).collect();
        ids.into_iter().collect()
    }
}

/// What the analysis knows about a variable
#[derive(Debug, Clone, Default)]
struct VarInfo {
    free_vars: BTreeSet<String>,
    iterables: BTreeSet<(NodeId, NodeId)>,
    aligned: bool,
    aligned_vars: BTreeSet<String>,
}

impl VarInfo {
    fn bound(aligned: bool) -> Self {
        Self {
            aligned,
            ..Default::default()
        }
    }
}

/// A frame of names; `None` marks a declaration not analyzed yet
type Scope = Vec<(String, Option<VarInfo>)>;

struct Analyzer<'a> {
    constants: &'a FxHashMap<String, Shape>,
    functions: &'a FxHashMap<String, (usize, Shape)>,
    scopes: Vec<Scope>,
    /// Summaries of the filters of enclosing envelopes
    envelopes: Vec<Summary>,
    where_depth: usize,
}

/// Analyze a rule set in place
///
/// Assigns ids to nodes that lack one, then computes the static flags of
/// every node. Undeclared variables, constants and functions and arity
/// mismatches are processing errors naming the rule they occur in.
pub fn analyze(rule_set: &mut RuleSet) -> XruleResult<()> {
    check_names(rule_set)?;
    assign_ids(rule_set)?;

    let mut constants: FxHashMap<String, Shape> = rule_set
        .constants
        .iter()
        .map(|c| (c.name.clone(), Shape::default()))
        .collect();
    let mut functions: FxHashMap<String, (usize, Shape)> = rule_set
        .functions
        .iter()
        .map(|f| (f.name.clone(), (f.params.len(), Shape::default())))
        .collect();

    // Shapes only ever grow, so this settles within one round per declaration
    let rounds = rule_set.constants.len() + rule_set.functions.len() + 1;
    for _ in 0..rounds {
        let mut changed = false;
        for constant in rule_set.constants.iter_mut() {
            let shape = analyze_constant(constant, &constants, &functions)
                .map_err(|e| e.with_rule(&format!("constant {}", constant.name)))?;
            if constants.insert(constant.name.clone(), shape) != Some(shape) {
                changed = true;
            }
        }
        for function in rule_set.functions.iter_mut() {
            let shape = analyze_function(function, &constants, &functions)
                .map_err(|e| e.with_rule(&format!("function {}", function.name)))?;
            let entry = (function.params.len(), shape);
            if functions.insert(function.name.clone(), entry) != Some(entry) {
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for rule in rule_set.rules.iter_mut() {
        let name = rule.name().to_string();
        analyze_rule(rule, &constants, &functions).map_err(|e| e.with_rule(&name))?;
    }
    debug!(
        rules = rule_set.rules.len(),
        constants = rule_set.constants.len(),
        functions = rule_set.functions.len(),
        "rule set analyzed"
    );
    Ok(())
}

fn check_names(rule_set: &RuleSet) -> XruleResult<()> {
    let mut seen = FxHashSet::default();
    for name in rule_set.rules.iter().map(Rule::name) {
        if !seen.insert(name) {
            return Err(XruleError::Engine(format!("Duplicate rule '{}'", name)));
        }
    }
    seen.clear();
    for name in rule_set.constants.iter().map(|c| c.name.as_str()) {
        if !seen.insert(name) {
            return Err(XruleError::Engine(format!("Duplicate constant '{}'", name)));
        }
    }
    seen.clear();
    for function in &rule_set.functions {
        if FunctionRegistry::lookup(&function.name).is_some() {
            return Err(XruleError::Engine(format!(
                "Function '{}' shadows a built-in function",
                function.name
            )));
        }
        if !seen.insert(function.name.as_str()) {
            return Err(XruleError::Engine(format!(
                "Duplicate function '{}'",
                function.name
            )));
        }
    }
    Ok(())
}

fn assign_ids(rule_set: &mut RuleSet) -> XruleResult<()> {
    let mut seen = FxHashSet::default();
    let mut last = 0;
    for root in rule_set.roots_mut() {
        collect_ids(root, &mut seen, &mut last)?;
    }
    let mut ids = NodeIdGenerator::starting_after(last);
    for root in rule_set.roots_mut() {
        fill_ids(root, &mut ids);
    }
    Ok(())
}

fn collect_ids(node: &Node, seen: &mut FxHashSet<NodeId>, last: &mut u64) -> XruleResult<()> {
    let id = node.meta.id;
    if id == NodeId::BODY_TABLE {
        return Err(XruleError::Engine(format!("Node id {} is reserved", id.0)));
    }
    if id.is_assigned() {
        if !seen.insert(id) {
            return Err(XruleError::Engine(format!("Duplicate node id {}", id.0)));
        }
        *last = (*last).max(id.0);
    }
    for child in node.children() {
        collect_ids(child, seen, last)?;
    }
    Ok(())
}

fn fill_ids(node: &mut Node, ids: &mut NodeIdGenerator) {
    if !node.meta.id.is_assigned() {
        node.meta.id = ids.next_id();
    }
    for child in node.children_mut() {
        fill_ids(child, ids);
    }
}

fn analyze_constant(
    constant: &mut ConstantDecl,
    constants: &FxHashMap<String, Shape>,
    functions: &FxHashMap<String, (usize, Shape)>,
) -> XruleResult<Shape> {
    let table = NodeId::BODY_TABLE;
    let summary = Analyzer::new(constants, functions).node(&mut constant.expr, table)?;
    Ok(Shape {
        iterable: !summary.iterables.is_empty(),
        aligned: summary.has_alignment,
    })
}

fn analyze_function(
    function: &mut FunctionDecl,
    constants: &FxHashMap<String, Shape>,
    functions: &FxHashMap<String, (usize, Shape)>,
) -> XruleResult<Shape> {
    let table = NodeId::BODY_TABLE;
    let mut analyzer = Analyzer::new(constants, functions);
    // Arguments may come from aligned values of the caller
    analyzer.scopes.push(
        function
            .params
            .iter()
            .map(|p| (p.clone(), Some(VarInfo::bound(true))))
            .collect(),
    );
    let summary = analyzer.node(&mut function.body, table)?;
    Ok(Shape {
        iterable: summary.iterables.iter().any(|(t, _)| *t == table),
        aligned: summary.has_alignment,
    })
}

fn analyze_rule(
    rule: &mut Rule,
    constants: &FxHashMap<String, Shape>,
    functions: &FxHashMap<String, (usize, Shape)>,
) -> XruleResult<()> {
    let (body, message) = match rule {
        Rule::Assertion(a) => (&mut a.body, a.message.as_mut()),
        Rule::Output(o) => (&mut o.body, o.message.as_mut()),
    };
    let table = NodeId::BODY_TABLE;
    let mut analyzer = Analyzer::new(constants, functions);

    // The driver keeps a top-level block's frame while rendering messages,
    // so message expressions resolve against its declarations
    let top_level = if let NodeKind::Block {
        declarations,
        body: inner,
    } = &mut body.kind
    {
        analyzer.declare(declarations, table)?;
        Some(analyzer.node(inner, table)?)
    } else {
        None
    };
    match top_level {
        Some(summary) => {
            let mut summary = summary;
            if let Some(frame) = analyzer.scopes.last() {
                for (name, _) in frame {
                    summary = summary.unbind(name);
                }
            }
            finish(&mut body.meta, &summary, table, false, summary.dependent);
        }
        None => {
            analyzer.node(body, table)?;
        }
    }

    if let Some(parts) = message {
        for part in parts.iter_mut() {
            if let MessagePart::Expr(node) = part {
                analyzer.node(node, table)?;
            }
        }
    }
    Ok(())
}

fn finish(meta: &mut NodeMeta, summary: &Summary, table: NodeId, iterable: bool, dependent: bool) {
    meta.table_id = table;
    meta.is_iterable = iterable;
    meta.is_dependent = dependent;
    meta.has_alignment = summary.has_alignment;
    meta.dependent_iterables = summary.dependent_iterables();
    meta.var_refs = summary.free_vars.iter().cloned().collect();
}

impl<'a> Analyzer<'a> {
    fn new(
        constants: &'a FxHashMap<String, Shape>,
        functions: &'a FxHashMap<String, (usize, Shape)>,
    ) -> Self {
        Self {
            constants,
            functions,
            scopes: Vec::new(),
            envelopes: Vec::new(),
            where_depth: 0,
        }
    }

    fn node(&mut self, node: &mut Node, table: NodeId) -> XruleResult<Summary> {
        let id = node.meta.id;
        let mut iterable = false;
        let mut own_dependent = None;

        let special = match &mut node.kind {
            NodeKind::Literal(_) => Some(Summary::default()),
            NodeKind::Variable(name) => Some(self.variable(name)?),
            NodeKind::Tag(name) => {
                let mut summary = Summary::default();
                summary.free_vars.insert(format!("#{}", name));
                Some(summary)
            }
            NodeKind::Constant(name) => {
                let shape = self.constants.get(name.as_str()).copied().ok_or_else(|| {
                    XruleError::processing(format!("Constant '{}' is not defined", name))
                })?;
                iterable = shape.iterable;
                Some(Summary {
                    has_alignment: shape.aligned,
                    ..Default::default()
                })
            }
            NodeKind::Block { declarations, body } => {
                self.declare(declarations, table)?;
                let summary = self.node(body, table);
                let frame = self.scopes.pop().unwrap_or_default();
                let mut summary = summary?;
                for (name, _) in &frame {
                    summary = summary.unbind(name);
                }
                Some(summary)
            }
            NodeKind::For {
                variable,
                collection,
                body,
            } => {
                iterable = true;
                let mut summary = self.node(collection, table)?;
                self.scopes
                    .push(vec![(variable.clone(), Some(VarInfo::bound(summary.has_alignment)))]);
                let inner = self.node(body, id);
                self.scopes.pop();
                let inner = inner?.leave_table(id).unbind(variable);
                let has_alignment = inner.has_alignment;
                summary.merge(inner);
                summary.has_alignment = has_alignment;
                Some(summary)
            }
            NodeKind::Filter {
                collection,
                variable,
                condition,
                returns,
            } => {
                let mut summary = self.node(collection, table)?;
                let has_alignment = summary.has_alignment;
                self.scopes
                    .push(vec![(variable.clone(), Some(VarInfo::bound(has_alignment)))]);
                let mut inner = Summary::default();
                for part in [condition, returns].into_iter().flatten() {
                    inner.merge(self.node(part, id)?);
                }
                self.scopes.pop();
                summary.merge(inner.leave_table(id).unbind(variable));
                summary.has_alignment = has_alignment;
                Some(summary)
            }
            NodeKind::Call { function, args } => {
                let (summary, is_iterable) = self.call(function, args, id, table)?;
                iterable = is_iterable;
                Some(summary)
            }
            NodeKind::Factset(factset) => {
                iterable = true;
                let (summary, dependent) = self.factset(factset, id, table)?;
                own_dependent = Some(dependent);
                Some(summary)
            }
            NodeKind::Envelope { filters, body } => {
                let mut inherited = Summary::default();
                for value in filters.iter_mut().filter_map(|f| f.value.as_mut()) {
                    inherited.merge(self.node(value, table)?);
                }
                self.envelopes.push(inherited.clone());
                let summary = self.node(body, table);
                self.envelopes.pop();
                let mut summary = summary?;
                summary.merge(inherited);
                Some(summary)
            }
            NodeKind::Navigate(navigation) => {
                iterable = true;
                let mut summary = match navigation.from.as_mut() {
                    Some(from) => self.node(from, table)?,
                    None => Summary::default(),
                };
                summary.has_alignment = false;
                Some(summary)
            }
            _ => None,
        };

        let mut summary = match special {
            Some(summary) => summary,
            None => {
                let mut summary = Summary::default();
                for child in node.children_mut() {
                    summary.merge(self.node(child, table)?);
                }
                summary
            }
        };

        let dependent = match own_dependent {
            Some(dependent) => dependent,
            None if iterable => {
                summary.dependent
                    || !summary.iterables.is_empty()
                    || !summary.aligned_vars.is_empty()
            }
            None => summary.dependent,
        };
        finish(&mut node.meta, &summary, table, iterable, dependent);
        summary.dependent |= dependent && own_dependent.is_some();
        if iterable {
            summary.iterables.insert((table, id));
        }
        Ok(summary)
    }

    fn lookup(&self, name: &str) -> Option<Option<&VarInfo>> {
        self.scopes.iter().rev().find_map(|frame| {
            frame
                .iter()
                .rev()
                .find(|(n, _)| n == name)
                .map(|(_, info)| info.as_ref())
        })
    }

    fn variable(&self, name: &str) -> XruleResult<Summary> {
        let info = self
            .lookup(name)
            .ok_or_else(|| XruleError::processing(format!("Variable ${} is not declared", name)))?;
        let mut summary = Summary::default();
        summary.free_vars.insert(name.to_string());
        if let Some(info) = info {
            summary.free_vars.extend(info.free_vars.iter().cloned());
            summary.iterables.extend(info.iterables.iter().copied());
            summary.aligned_vars.extend(info.aligned_vars.iter().cloned());
            summary.has_alignment = info.aligned;
            if info.aligned {
                summary.aligned_vars.insert(name.to_string());
            }
        }
        Ok(summary)
    }

    /// Push a frame for a block's declarations and analyze them so that each
    /// one is seen after the siblings it refers to
    fn declare(&mut self, declarations: &mut [Declaration], table: NodeId) -> XruleResult<()> {
        self.scopes
            .push(declarations.iter().map(|d| (d.name.clone(), None)).collect());
        for index in declaration_order(declarations) {
            let declaration = &mut declarations[index];
            let summary = self.node(&mut declaration.expr, table)?;
            let info = VarInfo {
                free_vars: summary.free_vars,
                iterables: summary.iterables,
                aligned: summary.has_alignment,
                aligned_vars: summary.aligned_vars,
            };
            if let Some(frame) = self.scopes.last_mut() {
                if let Some(slot) = frame.iter_mut().rev().find(|(n, _)| *n == declaration.name) {
                    slot.1 = Some(info);
                }
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        function: &str,
        args: &mut [Node],
        id: NodeId,
        table: NodeId,
    ) -> XruleResult<(Summary, bool)> {
        if let Some(builtin) = FunctionRegistry::lookup(function) {
            builtin.check_arity(args.len())?;
            if builtin.is_aggregate() {
                let mut summary = Summary::default();
                for arg in args.iter_mut() {
                    summary.merge(self.node(arg, id)?);
                }
                return Ok((summary.leave_table(id), true));
            }
            let mut summary = Summary::default();
            for arg in args.iter_mut() {
                summary.merge(self.node(arg, table)?);
            }
            return Ok((summary, false));
        }

        let (params, shape) = self.functions.get(function).copied().ok_or_else(|| {
            XruleError::processing(format!("Function '{}' is not defined", function))
        })?;
        if params != args.len() {
            return Err(XruleError::processing(format!(
                "Function '{}' expects {} argument(s), found {}",
                function,
                params,
                args.len()
            )));
        }
        let mut summary = Summary::default();
        for arg in args.iter_mut() {
            summary.merge(self.node(arg, table)?);
        }
        summary.has_alignment |= shape.aligned;
        Ok((summary, shape.iterable))
    }

    /// A factset is dependent when its filters or where clause read an
    /// enclosing iteration, or when it sits inside another factset's where
    /// clause and must match the candidate fact's alignment
    fn factset(&mut self, factset: &mut Factset, id: NodeId, table: NodeId) -> XruleResult<(Summary, bool)> {
        let mut summary = Summary::default();
        for value in factset.filters.iter_mut().filter_map(|f| f.value.as_mut()) {
            summary.merge(self.node(value, table)?);
        }
        for inherited in &self.envelopes {
            summary.merge(inherited.clone());
        }
        if let Some(condition) = factset.where_clause.as_mut() {
            let variable = factset.fact_variable.clone();
            self.scopes
                .push(vec![(variable.clone(), Some(VarInfo::bound(!factset.covered)))]);
            self.where_depth += 1;
            let inner = self.node(condition, id);
            self.where_depth -= 1;
            self.scopes.pop();
            summary.merge(inner?.leave_table(id).unbind(&variable));
        }
        let dependent = self.where_depth > 0
            || !summary.iterables.is_empty()
            || !summary.aligned_vars.is_empty();
        summary.has_alignment = !factset.covered;
        Ok((summary, dependent))
    }
}

/// Declaration indices ordered so that referenced siblings come first.
/// Mutual references keep declaration order.
fn declaration_order(declarations: &[Declaration]) -> Vec<usize> {
    let positions: FxHashMap<&str, usize> = declarations
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let mut visited = vec![false; declarations.len()];
    let mut order = Vec::with_capacity(declarations.len());
    for index in 0..declarations.len() {
        visit_declaration(index, declarations, &positions, &mut visited, &mut order);
    }
    order
}

fn visit_declaration(
    index: usize,
    declarations: &[Declaration],
    positions: &FxHashMap<&str, usize>,
    visited: &mut [bool],
    order: &mut Vec<usize>,
) {
    if visited[index] {
        return;
    }
    visited[index] = true;
    let mut names = BTreeSet::new();
    referenced_names(&declarations[index].expr, &mut names);
    for name in &names {
        if let Some(&sibling) = positions.get(name.as_str()) {
            visit_declaration(sibling, declarations, positions, visited, order);
        }
    }
    order.push(index);
}

fn referenced_names(node: &Node, names: &mut BTreeSet<String>) {
    if let NodeKind::Variable(name) = &node.kind {
        names.insert(name.clone());
    }
    for child in node.children() {
        referenced_names(child, names);
    }
}
