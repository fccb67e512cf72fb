use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::frontend::ast::Span;

pub type ElementId = usize;

/// Kind tag for every node of the semantic graph. Dispatch in the resolver
/// passes and the emitter is keyed on this enum; `label_prefix` feeds the
/// deterministic assembler label derived from kind + id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Program,
    Module,
    ModuleReference,
    Namespace,
    Block,
    Field,
    Statement,
    Expression,
    Declaration,
    Initializer,
    Identifier,
    IdentifierReference,
    Attribute,
    Comment,
    RawBlock,
    Directive,
    Intrinsic,
    If,
    While,
    For,
    Switch,
    Case,
    Fallthrough,
    Break,
    Continue,
    Return,
    Defer,
    With,
    Cast,
    Transmute,
    ProcCall,
    ArgumentList,
    ArgumentPair,
    ProcInstance,
    UnaryOperator,
    BinaryOperator,
    NilLiteral,
    IntegerLiteral,
    FloatLiteral,
    BooleanLiteral,
    StringLiteral,
    CharacterLiteral,
    UninitializedLiteral,
    NumericType,
    BoolType,
    RuneType,
    StringType,
    AnyType,
    PointerType,
    ArrayType,
    CompositeType,
    TupleType,
    ProcedureType,
    NamespaceType,
    ModuleType,
    UnknownType,
    TypeReference,
}

impl ElementKind {
    pub fn label_prefix(self) -> &'static str {
        match self {
            ElementKind::Program => "program",
            ElementKind::Module => "module",
            ElementKind::ModuleReference => "module_ref",
            ElementKind::Namespace => "namespace",
            ElementKind::Block => "block",
            ElementKind::Field => "field",
            ElementKind::Statement => "statement",
            ElementKind::Expression => "expression",
            ElementKind::Declaration => "declaration",
            ElementKind::Initializer => "initializer",
            ElementKind::Identifier => "identifier",
            ElementKind::IdentifierReference => "identifier_ref",
            ElementKind::Attribute => "attribute",
            ElementKind::Comment => "comment",
            ElementKind::RawBlock => "raw_block",
            ElementKind::Directive => "directive",
            ElementKind::Intrinsic => "intrinsic",
            ElementKind::If => "if",
            ElementKind::While => "while",
            ElementKind::For => "for",
            ElementKind::Switch => "switch",
            ElementKind::Case => "case",
            ElementKind::Fallthrough => "fallthrough",
            ElementKind::Break => "break",
            ElementKind::Continue => "continue",
            ElementKind::Return => "return",
            ElementKind::Defer => "defer",
            ElementKind::With => "with",
            ElementKind::Cast => "cast",
            ElementKind::Transmute => "transmute",
            ElementKind::ProcCall => "proc_call",
            ElementKind::ArgumentList => "argument_list",
            ElementKind::ArgumentPair => "argument_pair",
            ElementKind::ProcInstance => "proc_instance",
            ElementKind::UnaryOperator => "unary_op",
            ElementKind::BinaryOperator => "binary_op",
            ElementKind::NilLiteral => "nil_lit",
            ElementKind::IntegerLiteral => "integer_lit",
            ElementKind::FloatLiteral => "float_lit",
            ElementKind::BooleanLiteral => "bool_lit",
            ElementKind::StringLiteral => "string_lit",
            ElementKind::CharacterLiteral => "char_lit",
            ElementKind::UninitializedLiteral => "uninit_lit",
            ElementKind::NumericType => "numeric_type",
            ElementKind::BoolType => "bool_type",
            ElementKind::RuneType => "rune_type",
            ElementKind::StringType => "string_type",
            ElementKind::AnyType => "any_type",
            ElementKind::PointerType => "pointer_type",
            ElementKind::ArrayType => "array_type",
            ElementKind::CompositeType => "composite_type",
            ElementKind::TupleType => "tuple_type",
            ElementKind::ProcedureType => "proc_type",
            ElementKind::NamespaceType => "namespace_type",
            ElementKind::ModuleType => "module_type",
            ElementKind::UnknownType => "unknown_type",
            ElementKind::TypeReference => "type_ref",
        }
    }

    pub fn is_type(self) -> bool {
        matches!(
            self,
            ElementKind::NumericType
                | ElementKind::BoolType
                | ElementKind::RuneType
                | ElementKind::StringType
                | ElementKind::AnyType
                | ElementKind::PointerType
                | ElementKind::ArrayType
                | ElementKind::CompositeType
                | ElementKind::TupleType
                | ElementKind::ProcedureType
                | ElementKind::NamespaceType
                | ElementKind::ModuleType
                | ElementKind::UnknownType
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumberClass {
    Integer,
    FloatingPoint,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessModel {
    Value,
    Pointer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompositeKind {
    Struct,
    Union,
    Enum,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponent,
    BinaryOr,
    BinaryAnd,
    BinaryXor,
    ShiftLeft,
    ShiftRight,
    RotateLeft,
    RotateRight,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LogicalOr,
    LogicalAnd,
    MemberAccess,
    Subscript,
    Assignment,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
                | BinaryOp::Exponent
                | BinaryOp::BinaryOr
                | BinaryOp::BinaryAnd
                | BinaryOp::BinaryXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::RotateLeft
                | BinaryOp::RotateRight
        )
    }

    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::LogicalOr
                | BinaryOp::LogicalAnd
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Negate,
    BinaryNot,
    LogicalNot,
    AddressOf,
    Dereference,
}

/// A dotted reference path: leading namespace components plus the leaf name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct QualifiedSymbol {
    pub namespaces: Vec<String>,
    pub name: String,
}

impl QualifiedSymbol {
    pub fn flat(name: impl Into<String>) -> Self {
        Self {
            namespaces: Vec::new(),
            name: name.into(),
        }
    }

    pub fn is_qualified(&self) -> bool {
        !self.namespaces.is_empty()
    }
}

impl fmt::Display for QualifiedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ns in &self.namespaces {
            write!(f, "{}.", ns)?;
        }
        write!(f, "{}", self.name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub statements: Vec<ElementId>,
    pub identifiers: Vec<ElementId>,
    pub types: Vec<ElementId>,
    pub blocks: Vec<ElementId>,
    /// LIFO of deferred expressions replayed at scope exit.
    pub defers: Vec<ElementId>,
    pub has_stack_frame: bool,
    pub with_receiver: Option<ElementId>,
}

#[derive(Clone, Debug)]
pub struct IdentifierData {
    pub symbol: QualifiedSymbol,
    pub type_ref: Option<ElementId>,
    pub initializer: Option<ElementId>,
    pub is_constant: bool,
    pub inferred_type: bool,
}

/// Fields common to every type element: display name, computed size, and
/// alignment in bytes.
#[derive(Clone, Debug)]
pub struct TypeBase {
    pub name: String,
    pub size_in_bytes: u64,
    pub alignment: u64,
}

impl TypeBase {
    pub fn new(name: impl Into<String>, size_in_bytes: u64, alignment: u64) -> Self {
        Self {
            name: name.into(),
            size_in_bytes,
            alignment,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompositeData {
    pub base: TypeBase,
    pub kind: CompositeKind,
    pub fields: Vec<ElementId>,
    pub scope: ElementId,
    pub is_packed: bool,
}

#[derive(Clone, Debug)]
pub struct ProcedureData {
    pub base: TypeBase,
    pub parameters: Vec<ElementId>,
    pub return_field: Option<ElementId>,
    pub scope: ElementId,
    pub is_foreign: bool,
    pub foreign_address: Option<u64>,
    pub instances: Vec<ElementId>,
}

#[derive(Clone, Debug)]
pub enum DirectiveData {
    Assembly {
        raw_block: ElementId,
    },
    Run {
        expression: ElementId,
    },
    If {
        condition: ElementId,
        true_body: ElementId,
        false_body: Option<ElementId>,
    },
    Type {
        expression: ElementId,
    },
    Foreign {
        expression: ElementId,
    },
}

impl DirectiveData {
    pub fn name(&self) -> &'static str {
        match self {
            DirectiveData::Assembly { .. } => "assembly",
            DirectiveData::Run { .. } => "run",
            DirectiveData::If { .. } => "if",
            DirectiveData::Type { .. } => "type",
            DirectiveData::Foreign { .. } => "foreign",
        }
    }
}

/// Per-kind payload. All cross-element links are ids into the element map;
/// the map is the sole owner of every element.
#[derive(Clone, Debug)]
pub enum ElementData {
    Program {
        modules: Vec<ElementId>,
        block: ElementId,
    },
    Module {
        name: String,
        scope: ElementId,
    },
    ModuleReference {
        module: Option<ElementId>,
    },
    Namespace {
        name: String,
        scope: ElementId,
    },
    Block(BlockData),
    Field {
        identifier: ElementId,
        offset: u64,
    },
    // No symbol variant: qualified names are plain values on identifiers
    // and references, never graph nodes of their own.
    Statement {
        labels: Vec<String>,
        expression: Option<ElementId>,
    },
    Expression {
        root: ElementId,
    },
    Declaration {
        identifier: ElementId,
        assignment: Option<ElementId>,
    },
    Initializer {
        expression: Option<ElementId>,
    },
    Identifier(IdentifierData),
    IdentifierReference {
        symbol: QualifiedSymbol,
        identifier: Option<ElementId>,
    },
    Attribute {
        name: String,
        expression: Option<ElementId>,
    },
    Comment {
        value: String,
    },
    RawBlock {
        source: String,
    },
    Directive(DirectiveData),
    Intrinsic {
        name: String,
        arguments: ElementId,
    },
    If {
        predicate: ElementId,
        true_branch: ElementId,
        false_branch: Option<ElementId>,
    },
    While {
        predicate: ElementId,
        body: ElementId,
    },
    For {
        induction: ElementId,
        expression: ElementId,
        body: ElementId,
    },
    Switch {
        expression: ElementId,
        scope: ElementId,
    },
    Case {
        expression: Option<ElementId>,
        scope: ElementId,
    },
    Fallthrough,
    Break {
        label: Option<String>,
    },
    Continue {
        label: Option<String>,
    },
    Return {
        expressions: Vec<ElementId>,
    },
    Defer {
        expression: ElementId,
    },
    With {
        expression: ElementId,
        body: ElementId,
    },
    Cast {
        type_ref: ElementId,
        expression: ElementId,
    },
    Transmute {
        type_ref: ElementId,
        expression: ElementId,
    },
    ProcCall {
        reference: ElementId,
        arguments: ElementId,
    },
    ArgumentList {
        elements: Vec<ElementId>,
    },
    ArgumentPair {
        name: String,
        value: ElementId,
    },
    ProcInstance {
        procedure_type: ElementId,
        scope: ElementId,
    },
    UnaryOperator {
        op: UnaryOp,
        operand: ElementId,
    },
    BinaryOperator {
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    },
    NilLiteral,
    IntegerLiteral {
        value: i128,
    },
    FloatLiteral {
        value: f64,
    },
    BooleanLiteral {
        value: bool,
    },
    StringLiteral {
        value: String,
    },
    CharacterLiteral {
        rune: char,
    },
    UninitializedLiteral,
    NumericType {
        base: TypeBase,
        min: i128,
        max: u128,
        is_signed: bool,
        class: NumberClass,
    },
    BoolType {
        base: TypeBase,
    },
    RuneType {
        base: TypeBase,
    },
    StringType {
        base: TypeBase,
    },
    AnyType {
        base: TypeBase,
    },
    PointerType {
        base: TypeBase,
        base_type: ElementId,
    },
    ArrayType {
        base: TypeBase,
        entry_type: ElementId,
        size: u64,
    },
    CompositeType(CompositeData),
    TupleType(CompositeData),
    ProcedureType(ProcedureData),
    NamespaceType {
        base: TypeBase,
    },
    ModuleType {
        base: TypeBase,
    },
    UnknownType {
        base: TypeBase,
    },
    TypeReference {
        symbol: QualifiedSymbol,
        referenced_type: Option<ElementId>,
        /// Pointer/array decoration to apply once the named base resolves;
        /// carries cyclic references like a struct pointing at itself.
        is_pointer: bool,
        array_size: Option<u64>,
    },
}

impl ElementData {
    pub fn kind(&self) -> ElementKind {
        match self {
            ElementData::Program { .. } => ElementKind::Program,
            ElementData::Module { .. } => ElementKind::Module,
            ElementData::ModuleReference { .. } => ElementKind::ModuleReference,
            ElementData::Namespace { .. } => ElementKind::Namespace,
            ElementData::Block(_) => ElementKind::Block,
            ElementData::Field { .. } => ElementKind::Field,
            ElementData::Statement { .. } => ElementKind::Statement,
            ElementData::Expression { .. } => ElementKind::Expression,
            ElementData::Declaration { .. } => ElementKind::Declaration,
            ElementData::Initializer { .. } => ElementKind::Initializer,
            ElementData::Identifier(_) => ElementKind::Identifier,
            ElementData::IdentifierReference { .. } => ElementKind::IdentifierReference,
            ElementData::Attribute { .. } => ElementKind::Attribute,
            ElementData::Comment { .. } => ElementKind::Comment,
            ElementData::RawBlock { .. } => ElementKind::RawBlock,
            ElementData::Directive(_) => ElementKind::Directive,
            ElementData::Intrinsic { .. } => ElementKind::Intrinsic,
            ElementData::If { .. } => ElementKind::If,
            ElementData::While { .. } => ElementKind::While,
            ElementData::For { .. } => ElementKind::For,
            ElementData::Switch { .. } => ElementKind::Switch,
            ElementData::Case { .. } => ElementKind::Case,
            ElementData::Fallthrough => ElementKind::Fallthrough,
            ElementData::Break { .. } => ElementKind::Break,
            ElementData::Continue { .. } => ElementKind::Continue,
            ElementData::Return { .. } => ElementKind::Return,
            ElementData::Defer { .. } => ElementKind::Defer,
            ElementData::With { .. } => ElementKind::With,
            ElementData::Cast { .. } => ElementKind::Cast,
            ElementData::Transmute { .. } => ElementKind::Transmute,
            ElementData::ProcCall { .. } => ElementKind::ProcCall,
            ElementData::ArgumentList { .. } => ElementKind::ArgumentList,
            ElementData::ArgumentPair { .. } => ElementKind::ArgumentPair,
            ElementData::ProcInstance { .. } => ElementKind::ProcInstance,
            ElementData::UnaryOperator { .. } => ElementKind::UnaryOperator,
            ElementData::BinaryOperator { .. } => ElementKind::BinaryOperator,
            ElementData::NilLiteral => ElementKind::NilLiteral,
            ElementData::IntegerLiteral { .. } => ElementKind::IntegerLiteral,
            ElementData::FloatLiteral { .. } => ElementKind::FloatLiteral,
            ElementData::BooleanLiteral { .. } => ElementKind::BooleanLiteral,
            ElementData::StringLiteral { .. } => ElementKind::StringLiteral,
            ElementData::CharacterLiteral { .. } => ElementKind::CharacterLiteral,
            ElementData::UninitializedLiteral => ElementKind::UninitializedLiteral,
            ElementData::NumericType { .. } => ElementKind::NumericType,
            ElementData::BoolType { .. } => ElementKind::BoolType,
            ElementData::RuneType { .. } => ElementKind::RuneType,
            ElementData::StringType { .. } => ElementKind::StringType,
            ElementData::AnyType { .. } => ElementKind::AnyType,
            ElementData::PointerType { .. } => ElementKind::PointerType,
            ElementData::ArrayType { .. } => ElementKind::ArrayType,
            ElementData::CompositeType(_) => ElementKind::CompositeType,
            ElementData::TupleType(_) => ElementKind::TupleType,
            ElementData::ProcedureType(_) => ElementKind::ProcedureType,
            ElementData::NamespaceType { .. } => ElementKind::NamespaceType,
            ElementData::ModuleType { .. } => ElementKind::ModuleType,
            ElementData::UnknownType { .. } => ElementKind::UnknownType,
            ElementData::TypeReference { .. } => ElementKind::TypeReference,
        }
    }

    /// Child ids owned by this element, in declaration order. The builder
    /// uses this to wire the ownership adjacency at creation time.
    pub fn owned_children(&self) -> Vec<ElementId> {
        match self {
            ElementData::Program { modules, block } => {
                let mut out = vec![*block];
                out.extend(modules.iter().copied());
                out
            }
            ElementData::Module { scope, .. } => vec![*scope],
            ElementData::ModuleReference { .. } => vec![],
            ElementData::Namespace { scope, .. } => vec![*scope],
            ElementData::Block(block) => {
                let mut out = Vec::new();
                out.extend(block.identifiers.iter().copied());
                out.extend(block.types.iter().copied());
                out.extend(block.statements.iter().copied());
                out.extend(block.blocks.iter().copied());
                out
            }
            // Fields and declarations reference identifiers that their
            // enclosing constructs own.
            ElementData::Field { .. } => vec![],
            ElementData::Statement { expression, .. } => expression.iter().copied().collect(),
            ElementData::Expression { root } => vec![*root],
            ElementData::Declaration { assignment, .. } => {
                assignment.iter().copied().collect()
            }
            ElementData::Initializer { expression } => expression.iter().copied().collect(),
            ElementData::Identifier(data) => data.initializer.iter().copied().collect(),
            ElementData::IdentifierReference { .. } => vec![],
            ElementData::Attribute { expression, .. } => expression.iter().copied().collect(),
            ElementData::Comment { .. } => vec![],
            ElementData::RawBlock { .. } => vec![],
            ElementData::Directive(directive) => match directive {
                DirectiveData::Assembly { raw_block } => vec![*raw_block],
                DirectiveData::Run { expression } => vec![*expression],
                DirectiveData::If {
                    condition,
                    true_body,
                    false_body,
                } => {
                    let mut out = vec![*condition, *true_body];
                    out.extend(false_body.iter().copied());
                    out
                }
                DirectiveData::Type { expression } => vec![*expression],
                DirectiveData::Foreign { expression } => vec![*expression],
            },
            ElementData::Intrinsic { arguments, .. } => vec![*arguments],
            ElementData::If {
                predicate,
                true_branch,
                false_branch,
            } => {
                let mut out = vec![*predicate, *true_branch];
                out.extend(false_branch.iter().copied());
                out
            }
            ElementData::While { predicate, body } => vec![*predicate, *body],
            // The induction identifier is owned by the body block.
            ElementData::For {
                expression, body, ..
            } => vec![*expression, *body],
            ElementData::Switch { expression, scope } => vec![*expression, *scope],
            ElementData::Case { expression, scope } => {
                let mut out: Vec<ElementId> = expression.iter().copied().collect();
                out.push(*scope);
                out
            }
            ElementData::Fallthrough => vec![],
            ElementData::Break { .. } => vec![],
            ElementData::Continue { .. } => vec![],
            ElementData::Return { expressions } => expressions.clone(),
            ElementData::Defer { expression } => vec![*expression],
            ElementData::With { expression, body } => vec![*expression, *body],
            ElementData::Cast {
                type_ref,
                expression,
            } => vec![*type_ref, *expression],
            ElementData::Transmute {
                type_ref,
                expression,
            } => vec![*type_ref, *expression],
            ElementData::ProcCall {
                reference,
                arguments,
            } => vec![*reference, *arguments],
            ElementData::ArgumentList { elements } => elements.clone(),
            ElementData::ArgumentPair { value, .. } => vec![*value],
            ElementData::ProcInstance { scope, .. } => vec![*scope],
            ElementData::UnaryOperator { operand, .. } => vec![*operand],
            ElementData::BinaryOperator { lhs, rhs, .. } => vec![*lhs, *rhs],
            ElementData::NilLiteral
            | ElementData::IntegerLiteral { .. }
            | ElementData::FloatLiteral { .. }
            | ElementData::BooleanLiteral { .. }
            | ElementData::StringLiteral { .. }
            | ElementData::CharacterLiteral { .. }
            | ElementData::UninitializedLiteral => vec![],
            ElementData::NumericType { .. }
            | ElementData::BoolType { .. }
            | ElementData::RuneType { .. }
            | ElementData::StringType { .. }
            | ElementData::AnyType { .. }
            | ElementData::PointerType { .. }
            | ElementData::ArrayType { .. }
            | ElementData::NamespaceType { .. }
            | ElementData::ModuleType { .. }
            | ElementData::UnknownType { .. } => vec![],
            ElementData::CompositeType(data) | ElementData::TupleType(data) => {
                let mut out = data.fields.clone();
                out.push(data.scope);
                out
            }
            ElementData::ProcedureType(data) => {
                let mut out = data.parameters.clone();
                out.extend(data.return_field.iter().copied());
                out.push(data.scope);
                out.extend(data.instances.iter().copied());
                out
            }
            ElementData::TypeReference { .. } => vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Element {
    pub id: ElementId,
    pub module: Option<ElementId>,
    pub parent_scope: Option<ElementId>,
    pub parent_element: Option<ElementId>,
    pub span: Span,
    pub attributes: Vec<ElementId>,
    pub comments: Vec<ElementId>,
    pub data: ElementData,
}

impl Element {
    pub fn kind(&self) -> ElementKind {
        self.data.kind()
    }

    /// Deterministic assembler reference for this element.
    pub fn label_name(&self) -> String {
        format!("{}_{}", self.kind().label_prefix(), self.id)
    }

    pub fn is_type(&self) -> bool {
        self.kind().is_type()
    }

    pub fn type_base(&self) -> Option<&TypeBase> {
        match &self.data {
            ElementData::NumericType { base, .. }
            | ElementData::BoolType { base }
            | ElementData::RuneType { base }
            | ElementData::StringType { base }
            | ElementData::AnyType { base }
            | ElementData::PointerType { base, .. }
            | ElementData::ArrayType { base, .. }
            | ElementData::NamespaceType { base }
            | ElementData::ModuleType { base }
            | ElementData::UnknownType { base } => Some(base),
            ElementData::CompositeType(data) | ElementData::TupleType(data) => Some(&data.base),
            ElementData::ProcedureType(data) => Some(&data.base),
            _ => None,
        }
    }

    pub fn type_base_mut(&mut self) -> Option<&mut TypeBase> {
        match &mut self.data {
            ElementData::NumericType { base, .. }
            | ElementData::BoolType { base }
            | ElementData::RuneType { base }
            | ElementData::StringType { base }
            | ElementData::AnyType { base }
            | ElementData::PointerType { base, .. }
            | ElementData::ArrayType { base, .. }
            | ElementData::NamespaceType { base }
            | ElementData::ModuleType { base }
            | ElementData::UnknownType { base } => Some(base),
            ElementData::CompositeType(data) | ElementData::TupleType(data) => {
                Some(&mut data.base)
            }
            ElementData::ProcedureType(data) => Some(&mut data.base),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&BlockData> {
        match &self.data {
            ElementData::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_block_mut(&mut self) -> Option<&mut BlockData> {
        match &mut self.data {
            ElementData::Block(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<&IdentifierData> {
        match &self.data {
            ElementData::Identifier(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_identifier_mut(&mut self) -> Option<&mut IdentifierData> {
        match &mut self.data {
            ElementData::Identifier(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeData> {
        match &self.data {
            ElementData::CompositeType(data) | ElementData::TupleType(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_procedure(&self) -> Option<&ProcedureData> {
        match &self.data {
            ElementData::ProcedureType(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i128> {
        match &self.data {
            ElementData::IntegerLiteral { value } => Some(*value),
            ElementData::BooleanLiteral { value } => Some(*value as i128),
            ElementData::CharacterLiteral { rune } => Some(*rune as i128),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.data {
            ElementData::FloatLiteral { value } => Some(*value),
            ElementData::IntegerLiteral { value } => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.data {
            ElementData::BooleanLiteral { value } => Some(*value),
            _ => None,
        }
    }

    pub fn as_rune(&self) -> Option<char> {
        match &self.data {
            ElementData::CharacterLiteral { rune } => Some(*rune),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match &self.data {
            ElementData::StringLiteral { value } => Some(value),
            _ => None,
        }
    }
}

/// Sole owner of every element in a compilation unit. Ids are unique and
/// monotonically assigned; iteration is in id (insertion) order so every
/// pass visits elements deterministically.
#[derive(Default)]
pub struct ElementMap {
    elements: BTreeMap<ElementId, Element>,
    owned: HashMap<ElementId, Vec<ElementId>>,
    next_id: ElementId,
}

impl ElementMap {
    pub fn alloc(
        &mut self,
        module: Option<ElementId>,
        parent_scope: Option<ElementId>,
        span: Span,
        data: ElementData,
    ) -> ElementId {
        let id = self.next_id;
        self.next_id += 1;
        let children = data.owned_children();
        self.elements.insert(
            id,
            Element {
                id,
                module,
                parent_scope,
                parent_element: None,
                span,
                attributes: Vec::new(),
                comments: Vec::new(),
                data,
            },
        );
        for child in children {
            self.adopt(id, child);
        }
        id
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    pub fn ids(&self) -> Vec<ElementId> {
        self.elements.keys().copied().collect()
    }

    pub fn find_by_kind(&self, kind: ElementKind) -> Vec<ElementId> {
        self.elements
            .values()
            .filter(|e| e.kind() == kind)
            .map(|e| e.id)
            .collect()
    }

    /// Record that `parent` owns `child` and stamp the back edge. The first
    /// owner wins: a shared type already registered with its scope is not
    /// re-owned by the initializer that mentions it.
    pub fn adopt(&mut self, parent: ElementId, child: ElementId) {
        if let Some(element) = self.elements.get(&child) {
            if element.parent_element.is_some() {
                return;
            }
        }
        let list = self.owned.entry(parent).or_default();
        if !list.contains(&child) {
            list.push(child);
        }
        if let Some(element) = self.elements.get_mut(&child) {
            element.parent_element = Some(parent);
        }
    }

    pub fn owned_elements(&self, id: ElementId) -> &[ElementId] {
        self.owned.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Transitive ownership closure in discovery order, excluding the root.
    pub fn owned_closure(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut queue = vec![root];
        while let Some(next) = queue.pop() {
            for &child in self.owned_elements(next) {
                if !out.contains(&child) {
                    out.push(child);
                    queue.push(child);
                }
            }
        }
        out
    }

    /// Swap one owned child for another, preserving position. Used when
    /// constant folding replaces an expression with a literal.
    pub fn replace_owned(&mut self, parent: ElementId, old: ElementId, new: ElementId) {
        if let Some(list) = self.owned.get_mut(&parent) {
            for slot in list.iter_mut() {
                if *slot == old {
                    *slot = new;
                }
            }
        }
        if let Some(element) = self.elements.get_mut(&new) {
            element.parent_element = Some(parent);
        }
    }

    /// Drop an element and everything it transitively owns.
    pub fn remove_subtree(&mut self, id: ElementId) {
        let mut doomed = self.owned_closure(id);
        doomed.push(id);
        for victim in doomed {
            self.elements.remove(&victim);
            self.owned.remove(&victim);
        }
    }
}

impl std::ops::Index<ElementId> for ElementMap {
    type Output = Element;

    fn index(&self, id: ElementId) -> &Element {
        &self.elements[&id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let mut map = ElementMap::default();
        let a = map.alloc(None, None, Span::default(), ElementData::NilLiteral);
        let b = map.alloc(None, None, Span::default(), ElementData::Fallthrough);
        assert!(b > a);
        assert_eq!(map[a].id, a);
        assert_eq!(map[b].id, b);
    }

    #[test]
    fn label_names_derive_from_kind_and_id() {
        let mut map = ElementMap::default();
        let id = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::IntegerLiteral { value: 7 },
        );
        assert_eq!(map[id].label_name(), format!("integer_lit_{}", id));
    }

    #[test]
    fn ownership_closure_reaches_children_once() {
        let mut map = ElementMap::default();
        let lhs = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::IntegerLiteral { value: 1 },
        );
        let rhs = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::IntegerLiteral { value: 2 },
        );
        let op = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::BinaryOperator {
                op: BinaryOp::Add,
                lhs,
                rhs,
            },
        );
        let closure = map.owned_closure(op);
        assert_eq!(closure.len(), 2);
        assert!(closure.contains(&lhs) && closure.contains(&rhs));
        assert_eq!(map[lhs].parent_element, Some(op));
    }

    #[test]
    fn remove_subtree_drops_descendants() {
        let mut map = ElementMap::default();
        let lhs = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::IntegerLiteral { value: 1 },
        );
        let rhs = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::IntegerLiteral { value: 2 },
        );
        let op = map.alloc(
            None,
            None,
            Span::default(),
            ElementData::BinaryOperator {
                op: BinaryOp::Add,
                lhs,
                rhs,
            },
        );
        map.remove_subtree(op);
        assert!(map.get(op).is_none());
        assert!(map.get(lhs).is_none());
        assert!(map.get(rhs).is_none());
    }
}
