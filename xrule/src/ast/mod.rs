//! Rule-language AST
//!
//! The grammar front end is a separate concern; rule sets arrive as JSON in
//! this shape. Every node carries a [`NodeMeta`] that the analysis pass fills
//! in and the evaluator only reads.

pub mod build;

use crate::document::QName;
use crate::{XruleError, XruleResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Span representing a location in rule source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub col: usize,
}

/// Unique identifier for each node in a rule set. Zero means unassigned.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    pub const UNASSIGNED: NodeId = NodeId(0);
    /// Table id shared by every node at the top level of a rule, constant or
    /// function body. Never handed out to a node.
    pub const BODY_TABLE: NodeId = NodeId(u64::MAX);

    pub fn is_assigned(self) -> bool {
        self != NodeId::UNASSIGNED
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NodeId::BODY_TABLE {
            return write!(f, "body");
        }
        write!(f, "node_{}", self.0)
    }
}

/// Counter for handing out node ids
#[derive(Debug, Default)]
pub struct NodeIdGenerator {
    last: u64,
}

impl NodeIdGenerator {
    pub fn starting_after(last: u64) -> Self {
        Self { last }
    }

    pub fn next_id(&mut self) -> NodeId {
        self.last += 1;
        NodeId(self.last)
    }
}

/// Static facts about a node, computed by [`crate::analysis`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeMeta {
    pub id: NodeId,
    pub span: Option<Span>,
    /// Can produce more than one value for an alignment
    pub is_iterable: bool,
    /// Reads values from an enclosing iteration, so its result depends on
    /// the current alignment
    pub is_dependent: bool,
    pub has_alignment: bool,
    /// Isolation node whose sub-table this node's column lives in
    pub table_id: NodeId,
    /// Iterable nodes whose current rows feed this node
    pub dependent_iterables: Vec<NodeId>,
    /// Free variables (and `#tag` references) the node's value depends on
    pub var_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub meta: NodeMeta,
    pub kind: NodeKind,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            meta: NodeMeta::default(),
            kind,
        }
    }

    pub fn id(&self) -> NodeId {
        self.meta.id
    }

    /// Direct child nodes, in evaluation order
    pub fn children(&self) -> Vec<&Node> {
        let mut out: Vec<&Node> = Vec::new();
        match &self.kind {
            NodeKind::Literal(_)
            | NodeKind::Variable(_)
            | NodeKind::Tag(_)
            | NodeKind::Constant(_) => {}
            NodeKind::Unary { operand, .. } => out.push(operand),
            NodeKind::Arithmetic { left, right, .. } | NodeKind::Comparison { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            NodeKind::And(items)
            | NodeKind::Or(items)
            | NodeKind::List(items)
            | NodeKind::Set(items) => out.extend(items.iter()),
            NodeKind::Dict(entries) => {
                for entry in entries {
                    out.push(&entry.key);
                    out.push(&entry.value);
                }
            }
            NodeKind::Block { declarations, body } => {
                out.extend(declarations.iter().map(|d| &d.expr));
                out.push(body);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(condition);
                out.push(then_branch);
                if let Some(e) = else_branch {
                    out.push(e);
                }
            }
            NodeKind::For {
                collection, body, ..
            } => {
                out.push(collection);
                out.push(body);
            }
            NodeKind::Filter {
                collection,
                condition,
                returns,
                ..
            } => {
                out.push(collection);
                out.extend(condition.as_deref());
                out.extend(returns.as_deref());
            }
            NodeKind::Call { args, .. } => out.extend(args.iter()),
            NodeKind::Property { target, args, .. } => {
                out.push(target);
                out.extend(args.iter());
            }
            NodeKind::Index { target, index } => {
                out.push(target);
                out.push(index);
            }
            NodeKind::Factset(factset) => {
                out.extend(factset.filters.iter().filter_map(|f| f.value.as_ref()));
                out.extend(factset.where_clause.as_ref());
            }
            NodeKind::Envelope { filters, body } => {
                out.extend(filters.iter().filter_map(|f| f.value.as_ref()));
                out.push(body);
            }
            NodeKind::Navigate(nav) => out.extend(nav.from.as_ref()),
        }
        out
    }

    /// Mutable counterpart of [`Node::children`]
    pub fn children_mut(&mut self) -> Vec<&mut Node> {
        let mut out: Vec<&mut Node> = Vec::new();
        match &mut self.kind {
            NodeKind::Literal(_)
            | NodeKind::Variable(_)
            | NodeKind::Tag(_)
            | NodeKind::Constant(_) => {}
            NodeKind::Unary { operand, .. } => out.push(operand),
            NodeKind::Arithmetic { left, right, .. } | NodeKind::Comparison { left, right, .. } => {
                out.push(left);
                out.push(right);
            }
            NodeKind::And(items)
            | NodeKind::Or(items)
            | NodeKind::List(items)
            | NodeKind::Set(items) => out.extend(items.iter_mut()),
            NodeKind::Dict(entries) => {
                for entry in entries {
                    out.push(&mut entry.key);
                    out.push(&mut entry.value);
                }
            }
            NodeKind::Block { declarations, body } => {
                out.extend(declarations.iter_mut().map(|d| &mut d.expr));
                out.push(body);
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                out.push(condition);
                out.push(then_branch);
                if let Some(e) = else_branch {
                    out.push(e);
                }
            }
            NodeKind::For {
                collection, body, ..
            } => {
                out.push(collection);
                out.push(body);
            }
            NodeKind::Filter {
                collection,
                condition,
                returns,
                ..
            } => {
                out.push(collection);
                out.extend(condition.as_deref_mut());
                out.extend(returns.as_deref_mut());
            }
            NodeKind::Call { args, .. } => out.extend(args.iter_mut()),
            NodeKind::Property { target, args, .. } => {
                out.push(target);
                out.extend(args.iter_mut());
            }
            NodeKind::Index { target, index } => {
                out.push(target);
                out.push(index);
            }
            NodeKind::Factset(factset) => {
                let Factset {
                    filters,
                    where_clause,
                    ..
                } = factset.as_mut();
                out.extend(filters.iter_mut().filter_map(|f| f.value.as_mut()));
                out.extend(where_clause.as_mut());
            }
            NodeKind::Envelope { filters, body } => {
                out.extend(filters.iter_mut().filter_map(|f| f.value.as_mut()));
                out.push(body);
            }
            NodeKind::Navigate(nav) => out.extend(nav.from.as_mut()),
        }
        out
    }

    /// Count nodes in this subtree matching a predicate
    pub fn count_where(&self, predicate: &dyn Fn(&Node) -> bool) -> usize {
        let own = usize::from(predicate(self));
        own + self
            .children()
            .into_iter()
            .map(|c| c.count_where(predicate))
            .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Literal(Literal),
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    /// `hard_left`/`hard_right` mark bar-delimited operands: a missing value
    /// on a hard side stops the iteration instead of acting as identity
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Node>,
        right: Box<Node>,
        #[serde(default)]
        hard_left: bool,
        #[serde(default)]
        hard_right: bool,
    },
    Comparison {
        op: ComparisonOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    And(Vec<Node>),
    Or(Vec<Node>),
    Block {
        declarations: Vec<Declaration>,
        body: Box<Node>,
    },
    Variable(String),
    Tag(String),
    If {
        condition: Box<Node>,
        then_branch: Box<Node>,
        #[serde(default)]
        else_branch: Option<Box<Node>>,
    },
    For {
        variable: String,
        collection: Box<Node>,
        body: Box<Node>,
    },
    Filter {
        collection: Box<Node>,
        #[serde(default = "default_item_variable")]
        variable: String,
        #[serde(default)]
        condition: Option<Box<Node>>,
        #[serde(default)]
        returns: Option<Box<Node>>,
    },
    Call {
        function: String,
        #[serde(default)]
        args: Vec<Node>,
    },
    Property {
        target: Box<Node>,
        name: String,
        #[serde(default)]
        args: Vec<Node>,
    },
    Index {
        target: Box<Node>,
        index: Box<Node>,
    },
    List(Vec<Node>),
    Set(Vec<Node>),
    Dict(Vec<DictEntry>),
    Factset(Box<Factset>),
    /// Filters inherited by every factset inside `body`
    Envelope {
        filters: Vec<AspectFilter>,
        body: Box<Node>,
    },
    Navigate(Box<Navigation>),
    Constant(String),
}

fn default_item_variable() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Decimal(Decimal),
    Float(f64),
    String(String),
    Bool(bool),
    None,
    Skip,
    QName(QName),
    /// ISO date naming the end of that day
    Date(String),
    Period { start: String, end: String },
    Forever,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
}

impl ComparisonOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
            ComparisonOp::In => "in",
            ComparisonOp::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub expr: Node,
    /// Tag name the value is published under for messages
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictEntry {
    pub key: Node,
    pub value: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factset {
    #[serde(default)]
    pub filters: Vec<AspectFilter>,
    /// Braced factsets: zero matches yield nothing instead of a default
    /// unbound, and results carry no alignment
    #[serde(default)]
    pub covered: bool,
    #[serde(default)]
    pub where_clause: Option<Node>,
    /// Name the candidate fact is bound to inside the where clause
    #[serde(default = "default_fact_variable")]
    pub fact_variable: String,
}

fn default_fact_variable() -> String {
    "fact".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AspectFilter {
    pub aspect: AspectSelector,
    #[serde(default = "default_filter_op")]
    pub op: FilterOp,
    /// Absent for wildcard filters
    #[serde(default)]
    pub value: Option<Node>,
    /// `@@` filters keep their aspect in the result alignment
    #[serde(default)]
    pub aligning: bool,
}

fn default_filter_op() -> FilterOp {
    FilterOp::Eq
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectSelector {
    Concept,
    Period,
    Unit,
    Entity,
    Dimension(QName),
    /// Derived fact property held in the fact index
    Property(IndexedProperty),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexedProperty {
    #[serde(rename = "concept.is-monetary")]
    ConceptIsMonetary,
    #[serde(rename = "concept.is-numeric")]
    ConceptIsNumeric,
    #[serde(rename = "concept.balance")]
    ConceptBalance,
    #[serde(rename = "concept.period-type")]
    ConceptPeriodType,
    #[serde(rename = "period.start")]
    PeriodStart,
    #[serde(rename = "period.end")]
    PeriodEnd,
    #[serde(rename = "period.days")]
    PeriodDays,
    #[serde(rename = "is-nil")]
    IsNil,
}

impl IndexedProperty {
    pub const ALL: [IndexedProperty; 8] = [
        IndexedProperty::ConceptIsMonetary,
        IndexedProperty::ConceptIsNumeric,
        IndexedProperty::ConceptBalance,
        IndexedProperty::ConceptPeriodType,
        IndexedProperty::PeriodStart,
        IndexedProperty::PeriodEnd,
        IndexedProperty::PeriodDays,
        IndexedProperty::IsNil,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    NotEq,
    In,
    NotIn,
    /// `=*`: any fact that has the aspect
    Any,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Navigation {
    pub direction: NavDirection,
    #[serde(default)]
    pub from: Option<Node>,
    pub arcrole: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub returns: NavReturn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavDirection {
    Children,
    Parents,
    Descendants,
    Ancestors,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavReturn {
    #[default]
    Concepts,
    Relationships,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
    Ok,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
            Severity::Ok => write!(f, "ok"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePart {
    Text(String),
    Expr(Node),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub name: String,
    /// Emit when the body is true (`satisfied`) rather than false
    #[serde(default)]
    pub satisfied: bool,
    #[serde(default)]
    pub severity: Severity,
    pub body: Node,
    #[serde(default)]
    pub message: Option<Vec<MessagePart>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRule {
    pub name: String,
    #[serde(default = "default_output_severity")]
    pub severity: Severity,
    pub body: Node,
    #[serde(default)]
    pub message: Option<Vec<MessagePart>>,
}

fn default_output_severity() -> Severity {
    Severity::Info
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Assertion(Assertion),
    Output(OutputRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Assertion(a) => &a.name,
            Rule::Output(o) => &o.name,
        }
    }

    pub fn body(&self) -> &Node {
        match self {
            Rule::Assertion(a) => &a.body,
            Rule::Output(o) => &o.body,
        }
    }

    pub fn body_mut(&mut self) -> &mut Node {
        match self {
            Rule::Assertion(a) => &mut a.body,
            Rule::Output(o) => &mut o.body,
        }
    }

    pub fn message(&self) -> Option<&[MessagePart]> {
        match self {
            Rule::Assertion(a) => a.message.as_deref(),
            Rule::Output(o) => o.message.as_deref(),
        }
    }

    pub fn message_mut(&mut self) -> Option<&mut Vec<MessagePart>> {
        match self {
            Rule::Assertion(a) => a.message.as_mut(),
            Rule::Output(o) => o.message.as_mut(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Rule::Assertion(a) => a.severity,
            Rule::Output(o) => o.severity,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::Assertion(_) => "assertion",
            Rule::Output(_) => "output",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantDecl {
    pub name: String,
    pub expr: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Node,
}

/// Constants, functions and rules evaluated together against one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub constants: Vec<ConstantDecl>,
    pub functions: Vec<FunctionDecl>,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_json(text: &str) -> XruleResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| XruleError::Engine(format!("Invalid rule set JSON: {}", e)))
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub fn constant(&self, name: &str) -> Option<&ConstantDecl> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Every root expression: constants, function bodies, rule bodies and
    /// message expressions
    pub fn roots_mut(&mut self) -> Vec<&mut Node> {
        let mut roots: Vec<&mut Node> = Vec::new();
        roots.extend(self.constants.iter_mut().map(|c| &mut c.expr));
        roots.extend(self.functions.iter_mut().map(|f| &mut f.body));
        for rule in self.rules.iter_mut() {
            let (body, message) = match rule {
                Rule::Assertion(a) => (&mut a.body, a.message.as_mut()),
                Rule::Output(o) => (&mut o.body, o.message.as_mut()),
            };
            roots.push(body);
            if let Some(parts) = message {
                for part in parts.iter_mut() {
                    if let MessagePart::Expr(node) = part {
                        roots.push(node);
                    }
                }
            }
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_deserializes_from_json() {
        let rules = RuleSet::from_json(
            r#"{
                "rules": [{
                    "assertion": {
                        "name": "assets.positive",
                        "body": {"kind": {"comparison": {
                            "op": "lt",
                            "left": {"kind": {"factset": {"filters": [
                                {"aspect": "concept", "value": {"kind": {"literal": {"q_name": "{us-gaap}Assets"}}}}
                            ]}}},
                            "right": {"kind": {"literal": {"int": 0}}}
                        }}},
                        "message": [{"text": "Assets are negative: "}, {"expr": {"kind": {"tag": "a"}}}]
                    }
                }]
            }"#,
        )
        .unwrap();
        let rule = rules.rule("assets.positive").unwrap();
        assert_eq!(rule.kind_name(), "assertion");
        assert_eq!(rule.severity(), Severity::Error);
        assert_eq!(rule.body().children().len(), 2);
        assert_eq!(rule.message().unwrap().len(), 2);
    }

    #[test]
    fn id_generator_skips_existing_ids() {
        let mut ids = NodeIdGenerator::starting_after(41);
        assert_eq!(ids.next_id(), NodeId(42));
        assert!(!NodeId::UNASSIGNED.is_assigned());
    }
}
