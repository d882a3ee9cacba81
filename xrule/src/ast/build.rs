//! Constructors for building rule ASTs in Rust code

use super::*;

pub fn int(i: i64) -> Node {
    Node::new(NodeKind::Literal(Literal::Int(i)))
}

pub fn dec(value: Decimal) -> Node {
    Node::new(NodeKind::Literal(Literal::Decimal(value)))
}

pub fn float(f: f64) -> Node {
    Node::new(NodeKind::Literal(Literal::Float(f)))
}

pub fn string(s: &str) -> Node {
    Node::new(NodeKind::Literal(Literal::String(s.to_string())))
}

pub fn boolean(b: bool) -> Node {
    Node::new(NodeKind::Literal(Literal::Bool(b)))
}

pub fn none() -> Node {
    Node::new(NodeKind::Literal(Literal::None))
}

pub fn skip() -> Node {
    Node::new(NodeKind::Literal(Literal::Skip))
}

pub fn qname(q: QName) -> Node {
    Node::new(NodeKind::Literal(Literal::QName(q)))
}

pub fn date(text: &str) -> Node {
    Node::new(NodeKind::Literal(Literal::Date(text.to_string())))
}

pub fn var(name: &str) -> Node {
    Node::new(NodeKind::Variable(name.to_string()))
}

pub fn tag(name: &str) -> Node {
    Node::new(NodeKind::Tag(name.to_string()))
}

pub fn constant(name: &str) -> Node {
    Node::new(NodeKind::Constant(name.to_string()))
}

pub fn arith(op: ArithmeticOp, left: Node, right: Node) -> Node {
    Node::new(NodeKind::Arithmetic {
        op,
        left: Box::new(left),
        right: Box::new(right),
        hard_left: false,
        hard_right: false,
    })
}

pub fn add(left: Node, right: Node) -> Node {
    arith(ArithmeticOp::Add, left, right)
}

pub fn sub(left: Node, right: Node) -> Node {
    arith(ArithmeticOp::Subtract, left, right)
}

pub fn mul(left: Node, right: Node) -> Node {
    arith(ArithmeticOp::Multiply, left, right)
}

pub fn div(left: Node, right: Node) -> Node {
    arith(ArithmeticOp::Divide, left, right)
}

/// Mark the operands of an add/subtract as hard
pub fn hard(mut node: Node, left: bool, right: bool) -> Node {
    if let NodeKind::Arithmetic {
        hard_left,
        hard_right,
        ..
    } = &mut node.kind
    {
        *hard_left = left;
        *hard_right = right;
    }
    node
}

pub fn cmp(op: ComparisonOp, left: Node, right: Node) -> Node {
    Node::new(NodeKind::Comparison {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

pub fn eq(left: Node, right: Node) -> Node {
    cmp(ComparisonOp::Eq, left, right)
}

pub fn gt(left: Node, right: Node) -> Node {
    cmp(ComparisonOp::Gt, left, right)
}

pub fn lt(left: Node, right: Node) -> Node {
    cmp(ComparisonOp::Lt, left, right)
}

pub fn and(items: Vec<Node>) -> Node {
    Node::new(NodeKind::And(items))
}

pub fn or(items: Vec<Node>) -> Node {
    Node::new(NodeKind::Or(items))
}

pub fn unary(op: UnaryOp, operand: Node) -> Node {
    Node::new(NodeKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn not(operand: Node) -> Node {
    unary(UnaryOp::Not, operand)
}

pub fn neg(operand: Node) -> Node {
    unary(UnaryOp::Negate, operand)
}

pub fn decl(name: &str, expr: Node) -> Declaration {
    Declaration {
        name: name.to_string(),
        expr,
        tag: None,
    }
}

pub fn tagged(name: &str, expr: Node, tag: &str) -> Declaration {
    Declaration {
        name: name.to_string(),
        expr,
        tag: Some(tag.to_string()),
    }
}

pub fn block(declarations: Vec<Declaration>, body: Node) -> Node {
    Node::new(NodeKind::Block {
        declarations,
        body: Box::new(body),
    })
}

pub fn if_else(condition: Node, then_branch: Node, else_branch: Option<Node>) -> Node {
    Node::new(NodeKind::If {
        condition: Box::new(condition),
        then_branch: Box::new(then_branch),
        else_branch: else_branch.map(Box::new),
    })
}

pub fn for_each(variable: &str, collection: Node, body: Node) -> Node {
    Node::new(NodeKind::For {
        variable: variable.to_string(),
        collection: Box::new(collection),
        body: Box::new(body),
    })
}

pub fn filter(
    collection: Node,
    variable: &str,
    condition: Option<Node>,
    returns: Option<Node>,
) -> Node {
    Node::new(NodeKind::Filter {
        collection: Box::new(collection),
        variable: variable.to_string(),
        condition: condition.map(Box::new),
        returns: returns.map(Box::new),
    })
}

pub fn call(function: &str, args: Vec<Node>) -> Node {
    Node::new(NodeKind::Call {
        function: function.to_string(),
        args,
    })
}

pub fn prop(target: Node, name: &str) -> Node {
    prop_args(target, name, Vec::new())
}

pub fn prop_args(target: Node, name: &str, args: Vec<Node>) -> Node {
    Node::new(NodeKind::Property {
        target: Box::new(target),
        name: name.to_string(),
        args,
    })
}

pub fn index(target: Node, index: Node) -> Node {
    Node::new(NodeKind::Index {
        target: Box::new(target),
        index: Box::new(index),
    })
}

pub fn list(items: Vec<Node>) -> Node {
    Node::new(NodeKind::List(items))
}

pub fn set(items: Vec<Node>) -> Node {
    Node::new(NodeKind::Set(items))
}

pub fn dict(entries: Vec<(Node, Node)>) -> Node {
    Node::new(NodeKind::Dict(
        entries
            .into_iter()
            .map(|(key, value)| DictEntry { key, value })
            .collect(),
    ))
}

pub fn navigate(direction: NavDirection, from: Option<Node>, arcrole: &str) -> Node {
    Node::new(NodeKind::Navigate(Box::new(Navigation {
        direction,
        from,
        arcrole: arcrole.to_string(),
        role: None,
        returns: NavReturn::Concepts,
    })))
}

pub fn envelope(filters: Vec<AspectFilter>, body: Node) -> Node {
    Node::new(NodeKind::Envelope {
        filters,
        body: Box::new(body),
    })
}

pub fn filter_eq(aspect: AspectSelector, value: Node) -> AspectFilter {
    AspectFilter {
        aspect,
        op: FilterOp::Eq,
        value: Some(value),
        aligning: false,
    }
}

pub fn filter_op(aspect: AspectSelector, op: FilterOp, value: Option<Node>) -> AspectFilter {
    AspectFilter {
        aspect,
        op,
        value,
        aligning: false,
    }
}

/// Fluent builder for factset nodes
#[derive(Debug, Clone)]
pub struct FactsetBuilder {
    factset: Factset,
}

impl Default for FactsetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FactsetBuilder {
    pub fn new() -> Self {
        Self {
            factset: Factset {
                filters: Vec::new(),
                covered: false,
                where_clause: None,
                fact_variable: "fact".to_string(),
            },
        }
    }

    pub fn concept(self, name: QName) -> Self {
        self.filter(filter_eq(AspectSelector::Concept, qname(name)))
    }

    pub fn filter(mut self, filter: AspectFilter) -> Self {
        self.factset.filters.push(filter);
        self
    }

    /// Same as [`FactsetBuilder::filter`] with the aspect kept in the alignment
    pub fn aligning(mut self, mut filter: AspectFilter) -> Self {
        filter.aligning = true;
        self.factset.filters.push(filter);
        self
    }

    pub fn covered(mut self) -> Self {
        self.factset.covered = true;
        self
    }

    pub fn where_clause(mut self, condition: Node) -> Self {
        self.factset.where_clause = Some(condition);
        self
    }

    pub fn build(self) -> Node {
        Node::new(NodeKind::Factset(Box::new(self.factset)))
    }
}

/// `@Concept`
pub fn facts(concept: QName) -> Node {
    FactsetBuilder::new().concept(concept).build()
}

pub fn assertion(name: &str, body: Node) -> Rule {
    Rule::Assertion(Assertion {
        name: name.to_string(),
        satisfied: false,
        severity: Severity::Error,
        body,
        message: None,
    })
}

pub fn satisfied_assertion(name: &str, body: Node) -> Rule {
    Rule::Assertion(Assertion {
        name: name.to_string(),
        satisfied: true,
        severity: Severity::Ok,
        body,
        message: None,
    })
}

pub fn output(name: &str, body: Node) -> Rule {
    Rule::Output(OutputRule {
        name: name.to_string(),
        severity: Severity::Info,
        body,
        message: None,
    })
}

pub fn with_message(mut rule: Rule, parts: Vec<MessagePart>) -> Rule {
    match &mut rule {
        Rule::Assertion(a) => a.message = Some(parts),
        Rule::Output(o) => o.message = Some(parts),
    }
    rule
}

pub fn text(s: &str) -> MessagePart {
    MessagePart::Text(s.to_string())
}

pub fn expr(node: Node) -> MessagePart {
    MessagePart::Expr(node)
}

pub fn constant_decl(name: &str, expr: Node) -> ConstantDecl {
    ConstantDecl {
        name: name.to_string(),
        expr,
    }
}

pub fn function_decl(name: &str, params: &[&str], body: Node) -> FunctionDecl {
    FunctionDecl {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        body,
    }
}
