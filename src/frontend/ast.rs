use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            start: 0,
            end: 0,
            line,
            column,
        }
    }
}

/// Node kinds produced by the parser. The evaluator dispatch table is keyed
/// on this enum and is closed: a kind without a handler is a coded error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AstKind {
    Module,
    Symbol,
    SymbolPart,
    TypeIdentifier,
    Statement,
    StatementBody,
    Expression,
    Assignment,
    ConstantAssignment,
    AssignmentTargetList,
    AssignmentSourceList,
    Label,
    LabelList,
    LineComment,
    BlockComment,
    Attribute,
    Directive,
    RawBlock,
    NumberLiteral,
    StringLiteral,
    BooleanLiteral,
    CharacterLiteral,
    NilLiteral,
    UninitializedLiteral,
    UnaryOperator,
    BinaryOperator,
    SubscriptExpression,
    CastExpression,
    TransmuteExpression,
    ProcExpression,
    ProcCall,
    ArgumentList,
    ParameterList,
    ReturnArgumentList,
    Pair,
    IfExpression,
    ElseIfExpression,
    ElseExpression,
    WhileStatement,
    ForInStatement,
    BreakStatement,
    ContinueStatement,
    ReturnStatement,
    SwitchExpression,
    CaseExpression,
    FallthroughStatement,
    DeferExpression,
    WithExpression,
    StructExpression,
    UnionExpression,
    EnumExpression,
    NamespaceExpression,
    ModuleExpression,
    ImportExpression,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Integer(i128),
    Float(f64),
}

#[derive(Clone, Debug, Default)]
pub struct Token {
    pub value: String,
    pub number: Option<Number>,
}

impl Token {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            number: None,
        }
    }

    pub fn integer(value: i128) -> Self {
        Self {
            value: value.to_string(),
            number: Some(Number::Integer(value)),
        }
    }

    pub fn float(value: f64) -> Self {
        Self {
            value: value.to_string(),
            number: Some(Number::Float(value)),
        }
    }
}

pub type NodeFlags = u8;

pub const NODE_FLAG_NONE: NodeFlags = 0b0000_0000;
pub const NODE_FLAG_POINTER: NodeFlags = 0b0000_0001;
pub const NODE_FLAG_ARRAY: NodeFlags = 0b0000_0010;
pub const NODE_FLAG_SPREAD: NodeFlags = 0b0000_0100;

/// The tree handed to the evaluator by the (external) parser. Shapes per kind:
///
/// - `Symbol`: children = `SymbolPart` nodes (dotted path), rhs = optional
///   `TypeIdentifier` annotation.
/// - `TypeIdentifier`: lhs = `Symbol` naming the type, pointer/array flags,
///   rhs = array size expression when the array flag is set.
/// - `Assignment`/`ConstantAssignment`: lhs = `AssignmentTargetList`,
///   rhs = `AssignmentSourceList`; rhs may be absent for bare declarations.
/// - `ProcExpression`: lhs = `ReturnArgumentList`, rhs = `ParameterList`,
///   children = optional `StatementBody`.
/// - `ProcCall`: lhs = `Symbol` callee, rhs = `ArgumentList` whose children
///   are expressions or `Pair` nodes (lhs name symbol, rhs value).
/// - `IfExpression`/`ElseIfExpression`: lhs = predicate, children[0] = true
///   `StatementBody`, rhs = chained else node. `ElseExpression`:
///   children[0] = body.
/// - `WhileStatement`: lhs = predicate, children[0] = body.
/// - `ForInStatement`: lhs = induction `Symbol`, rhs = range expression,
///   children[0] = body.
/// - `SwitchExpression`: lhs = expression, children = `CaseExpression`
///   nodes (lhs = optional case expression, children[0] = body).
/// - `BreakStatement`/`ContinueStatement`: lhs = optional label `Symbol`.
/// - `ReturnStatement`: children = returned expressions.
/// - `DeferExpression`: lhs = deferred expression.
/// - `WithExpression`: lhs = receiver expression, children[0] = body.
/// - `Struct/Union/EnumExpression`: children[0] = `StatementBody` of field
///   declarations.
/// - `CastExpression`/`TransmuteExpression`: lhs = `TypeIdentifier`,
///   rhs = expression.
/// - `Directive`: token = directive name; operands per name (see evaluator).
/// - `Statement`: lhs = optional `LabelList`, rhs = wrapped node.
#[derive(Clone, Debug)]
pub struct AstNode {
    pub id: u32,
    pub kind: AstKind,
    pub token: Option<Token>,
    pub lhs: Option<Box<AstNode>>,
    pub rhs: Option<Box<AstNode>>,
    pub children: Vec<AstNode>,
    pub span: Span,
    pub attributes: Vec<AstNode>,
    pub comments: Vec<AstNode>,
    pub flags: NodeFlags,
}

impl AstNode {
    pub fn is_pointer(&self) -> bool {
        self.flags & NODE_FLAG_POINTER != 0
    }

    pub fn is_array(&self) -> bool {
        self.flags & NODE_FLAG_ARRAY != 0
    }

    pub fn is_spread(&self) -> bool {
        self.flags & NODE_FLAG_SPREAD != 0
    }

    pub fn token_value(&self) -> &str {
        self.token.as_ref().map(|t| t.value.as_str()).unwrap_or("")
    }
}

/// Programmatic node construction for collaborators and tests. The real
/// parser lives outside this crate; everything here just fills the node
/// shapes documented on [`AstNode`].
#[derive(Default)]
pub struct AstBuilder {
    next_id: u32,
}

impl AstBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, kind: AstKind) -> AstNode {
        self.next_id += 1;
        AstNode {
            id: self.next_id,
            kind,
            token: None,
            lhs: None,
            rhs: None,
            children: Vec::new(),
            span: Span::default(),
            attributes: Vec::new(),
            comments: Vec::new(),
            flags: NODE_FLAG_NONE,
        }
    }

    fn token_node(&mut self, kind: AstKind, token: Token) -> AstNode {
        let mut node = self.node(kind);
        node.token = Some(token);
        node
    }

    pub fn module(&mut self, statements: Vec<AstNode>) -> AstNode {
        let mut node = self.node(AstKind::Module);
        node.children = statements;
        node
    }

    pub fn statement(&mut self, expr: AstNode) -> AstNode {
        let mut node = self.node(AstKind::Statement);
        node.rhs = Some(Box::new(expr));
        node
    }

    pub fn labeled_statement(&mut self, labels: &[&str], expr: AstNode) -> AstNode {
        let mut list = self.node(AstKind::LabelList);
        for label in labels {
            let item = self.token_node(AstKind::Label, Token::text(*label));
            list.children.push(item);
        }
        let mut node = self.node(AstKind::Statement);
        node.lhs = Some(Box::new(list));
        node.rhs = Some(Box::new(expr));
        node
    }

    pub fn statement_body(&mut self, statements: Vec<AstNode>) -> AstNode {
        let mut node = self.node(AstKind::StatementBody);
        node.children = statements;
        node
    }

    pub fn symbol(&mut self, parts: &[&str]) -> AstNode {
        let mut node = self.node(AstKind::Symbol);
        for part in parts {
            let child = self.token_node(AstKind::SymbolPart, Token::text(*part));
            node.children.push(child);
        }
        node
    }

    pub fn typed_symbol(&mut self, parts: &[&str], type_name: &str) -> AstNode {
        let annotation = self.type_identifier(type_name);
        let mut node = self.symbol(parts);
        node.rhs = Some(Box::new(annotation));
        node
    }

    pub fn pointer_typed_symbol(&mut self, parts: &[&str], type_name: &str) -> AstNode {
        let annotation = self.pointer_type_identifier(type_name);
        let mut node = self.symbol(parts);
        node.rhs = Some(Box::new(annotation));
        node
    }

    pub fn type_identifier(&mut self, name: &str) -> AstNode {
        let symbol = self.symbol(&[name]);
        let mut node = self.node(AstKind::TypeIdentifier);
        node.lhs = Some(Box::new(symbol));
        node
    }

    pub fn pointer_type_identifier(&mut self, name: &str) -> AstNode {
        let mut node = self.type_identifier(name);
        node.flags |= NODE_FLAG_POINTER;
        node
    }

    pub fn array_type_identifier(&mut self, name: &str, size: i128) -> AstNode {
        let size_node = self.number(size);
        let mut node = self.type_identifier(name);
        node.flags |= NODE_FLAG_ARRAY;
        node.rhs = Some(Box::new(size_node));
        node
    }

    pub fn number(&mut self, value: i128) -> AstNode {
        self.token_node(AstKind::NumberLiteral, Token::integer(value))
    }

    pub fn float(&mut self, value: f64) -> AstNode {
        self.token_node(AstKind::NumberLiteral, Token::float(value))
    }

    pub fn string(&mut self, value: &str) -> AstNode {
        self.token_node(AstKind::StringLiteral, Token::text(value))
    }

    pub fn boolean(&mut self, value: bool) -> AstNode {
        self.token_node(
            AstKind::BooleanLiteral,
            Token::text(if value { "true" } else { "false" }),
        )
    }

    pub fn character(&mut self, value: char) -> AstNode {
        self.token_node(AstKind::CharacterLiteral, Token::text(value.to_string()))
    }

    pub fn nil(&mut self) -> AstNode {
        self.node(AstKind::NilLiteral)
    }

    pub fn uninitialized(&mut self) -> AstNode {
        self.node(AstKind::UninitializedLiteral)
    }

    pub fn assignment(&mut self, target: AstNode, source: AstNode) -> AstNode {
        self.assignment_node(AstKind::Assignment, vec![target], vec![source])
    }

    pub fn constant_assignment(&mut self, target: AstNode, source: AstNode) -> AstNode {
        self.assignment_node(AstKind::ConstantAssignment, vec![target], vec![source])
    }

    pub fn declaration(&mut self, target: AstNode) -> AstNode {
        self.assignment_node(AstKind::Assignment, vec![target], Vec::new())
    }

    fn assignment_node(
        &mut self,
        kind: AstKind,
        targets: Vec<AstNode>,
        sources: Vec<AstNode>,
    ) -> AstNode {
        let mut target_list = self.node(AstKind::AssignmentTargetList);
        target_list.children = targets;
        let mut node = self.node(kind);
        node.lhs = Some(Box::new(target_list));
        if !sources.is_empty() {
            let mut source_list = self.node(AstKind::AssignmentSourceList);
            source_list.children = sources;
            node.rhs = Some(Box::new(source_list));
        }
        node
    }

    pub fn binary(&mut self, op: &str, lhs: AstNode, rhs: AstNode) -> AstNode {
        let mut node = self.token_node(AstKind::BinaryOperator, Token::text(op));
        node.lhs = Some(Box::new(lhs));
        node.rhs = Some(Box::new(rhs));
        node
    }

    pub fn unary(&mut self, op: &str, operand: AstNode) -> AstNode {
        let mut node = self.token_node(AstKind::UnaryOperator, Token::text(op));
        node.rhs = Some(Box::new(operand));
        node
    }

    pub fn member_access(&mut self, lhs: AstNode, field: &str) -> AstNode {
        let rhs = self.symbol(&[field]);
        self.binary(".", lhs, rhs)
    }

    pub fn subscript(&mut self, base: AstNode, index: AstNode) -> AstNode {
        let mut node = self.node(AstKind::SubscriptExpression);
        node.lhs = Some(Box::new(base));
        node.rhs = Some(Box::new(index));
        node
    }

    pub fn cast(&mut self, type_id: AstNode, expr: AstNode) -> AstNode {
        let mut node = self.node(AstKind::CastExpression);
        node.lhs = Some(Box::new(type_id));
        node.rhs = Some(Box::new(expr));
        node
    }

    pub fn transmute(&mut self, type_id: AstNode, expr: AstNode) -> AstNode {
        let mut node = self.node(AstKind::TransmuteExpression);
        node.lhs = Some(Box::new(type_id));
        node.rhs = Some(Box::new(expr));
        node
    }

    pub fn proc_expression(
        &mut self,
        params: Vec<AstNode>,
        returns: Vec<AstNode>,
        body: Option<AstNode>,
    ) -> AstNode {
        let mut return_list = self.node(AstKind::ReturnArgumentList);
        return_list.children = returns;
        let mut param_list = self.node(AstKind::ParameterList);
        param_list.children = params;
        let mut node = self.node(AstKind::ProcExpression);
        node.lhs = Some(Box::new(return_list));
        node.rhs = Some(Box::new(param_list));
        if let Some(body) = body {
            node.children.push(body);
        }
        node
    }

    pub fn proc_call(&mut self, callee: AstNode, arguments: Vec<AstNode>) -> AstNode {
        let mut argument_list = self.node(AstKind::ArgumentList);
        argument_list.children = arguments;
        let mut node = self.node(AstKind::ProcCall);
        node.lhs = Some(Box::new(callee));
        node.rhs = Some(Box::new(argument_list));
        node
    }

    pub fn named_argument(&mut self, name: &str, value: AstNode) -> AstNode {
        let name_node = self.symbol(&[name]);
        let mut node = self.node(AstKind::Pair);
        node.lhs = Some(Box::new(name_node));
        node.rhs = Some(Box::new(value));
        node
    }

    pub fn if_expression(
        &mut self,
        predicate: AstNode,
        true_body: AstNode,
        else_node: Option<AstNode>,
    ) -> AstNode {
        let mut node = self.node(AstKind::IfExpression);
        node.lhs = Some(Box::new(predicate));
        node.children.push(true_body);
        if let Some(else_node) = else_node {
            node.rhs = Some(Box::new(else_node));
        }
        node
    }

    pub fn else_if_expression(
        &mut self,
        predicate: AstNode,
        true_body: AstNode,
        else_node: Option<AstNode>,
    ) -> AstNode {
        let mut node = self.if_expression(predicate, true_body, else_node);
        node.kind = AstKind::ElseIfExpression;
        node
    }

    pub fn else_expression(&mut self, body: AstNode) -> AstNode {
        let mut node = self.node(AstKind::ElseExpression);
        node.children.push(body);
        node
    }

    pub fn while_statement(&mut self, predicate: AstNode, body: AstNode) -> AstNode {
        let mut node = self.node(AstKind::WhileStatement);
        node.lhs = Some(Box::new(predicate));
        node.children.push(body);
        node
    }

    pub fn for_in_statement(
        &mut self,
        induction: AstNode,
        expression: AstNode,
        body: AstNode,
    ) -> AstNode {
        let mut node = self.node(AstKind::ForInStatement);
        node.lhs = Some(Box::new(induction));
        node.rhs = Some(Box::new(expression));
        node.children.push(body);
        node
    }

    pub fn switch_expression(&mut self, expr: AstNode, cases: Vec<AstNode>) -> AstNode {
        let mut node = self.node(AstKind::SwitchExpression);
        node.lhs = Some(Box::new(expr));
        node.children = cases;
        node
    }

    pub fn case_expression(&mut self, expr: Option<AstNode>, body: AstNode) -> AstNode {
        let mut node = self.node(AstKind::CaseExpression);
        node.lhs = expr.map(Box::new);
        node.children.push(body);
        node
    }

    pub fn fallthrough(&mut self) -> AstNode {
        self.node(AstKind::FallthroughStatement)
    }

    pub fn break_statement(&mut self, label: Option<&str>) -> AstNode {
        let mut node = self.node(AstKind::BreakStatement);
        if let Some(label) = label {
            let sym = self.symbol(&[label]);
            node.lhs = Some(Box::new(sym));
        }
        node
    }

    pub fn continue_statement(&mut self, label: Option<&str>) -> AstNode {
        let mut node = self.node(AstKind::ContinueStatement);
        if let Some(label) = label {
            let sym = self.symbol(&[label]);
            node.lhs = Some(Box::new(sym));
        }
        node
    }

    pub fn return_statement(&mut self, values: Vec<AstNode>) -> AstNode {
        let mut node = self.node(AstKind::ReturnStatement);
        node.children = values;
        node
    }

    pub fn defer_expression(&mut self, expr: AstNode) -> AstNode {
        let mut node = self.node(AstKind::DeferExpression);
        node.lhs = Some(Box::new(expr));
        node
    }

    pub fn with_expression(&mut self, expr: AstNode, body: AstNode) -> AstNode {
        let mut node = self.node(AstKind::WithExpression);
        node.lhs = Some(Box::new(expr));
        node.children.push(body);
        node
    }

    pub fn struct_expression(&mut self, fields: AstNode) -> AstNode {
        let mut node = self.node(AstKind::StructExpression);
        node.children.push(fields);
        node
    }

    pub fn union_expression(&mut self, fields: AstNode) -> AstNode {
        let mut node = self.node(AstKind::UnionExpression);
        node.children.push(fields);
        node
    }

    pub fn enum_expression(&mut self, fields: AstNode) -> AstNode {
        let mut node = self.node(AstKind::EnumExpression);
        node.children.push(fields);
        node
    }

    pub fn namespace_expression(&mut self, body: AstNode) -> AstNode {
        let mut node = self.node(AstKind::NamespaceExpression);
        node.children.push(body);
        node
    }

    pub fn directive(&mut self, name: &str, lhs: Option<AstNode>, rhs: Option<AstNode>) -> AstNode {
        let mut node = self.token_node(AstKind::Directive, Token::text(name));
        node.lhs = lhs.map(Box::new);
        node.rhs = rhs.map(Box::new);
        node
    }

    pub fn raw_block(&mut self, source: &str) -> AstNode {
        self.token_node(AstKind::RawBlock, Token::text(source))
    }

    pub fn attribute(&mut self, name: &str, expr: Option<AstNode>) -> AstNode {
        let mut node = self.token_node(AstKind::Attribute, Token::text(name));
        node.lhs = expr.map(Box::new);
        node
    }
}
