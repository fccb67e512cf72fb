use log::debug;

use crate::compile::Session;
use crate::frontend::ast::{AstKind, AstNode, Number};
use crate::frontend::diagnostic::X_UNSUPPORTED;
use crate::intrinsics;

use super::element::{
    BinaryOp, DirectiveData, ElementData, ElementId, ElementKind, QualifiedSymbol, UnaryOp,
};
use super::infer::TypeInference;

/// Inputs available to every node handler: the node, the accumulated
/// comments/attributes attached to it, and the scope it evaluates in.
pub struct EvaluatorContext<'n> {
    pub scope: ElementId,
    pub node: &'n AstNode,
}

/// AST to element-graph construction. One handler per AST node kind; the
/// handler map is closed, so an unexpected kind is a coded error rather
/// than a panic.
pub struct AstEvaluator<'a> {
    pub session: &'a mut Session,
}

impl<'a> AstEvaluator<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    pub fn evaluate(&mut self, node: &AstNode) -> Option<ElementId> {
        let scope = self.session.scopes.current_scope();
        self.evaluate_in_scope(node, scope)
    }

    pub fn evaluate_in_scope(&mut self, node: &AstNode, scope: ElementId) -> Option<ElementId> {
        let ctx = EvaluatorContext { scope, node };
        let element = match node.kind {
            AstKind::Module => self.module(&ctx),
            AstKind::Statement => self.statement(&ctx),
            AstKind::StatementBody => self.statement_body(&ctx),
            AstKind::Expression => self.expression(&ctx),
            AstKind::Assignment => self.assignment(&ctx, false),
            AstKind::ConstantAssignment => self.assignment(&ctx, true),
            AstKind::Symbol => self.symbol_reference(&ctx),
            AstKind::NumberLiteral => self.number_literal(&ctx),
            AstKind::StringLiteral => {
                Some(self.session.builder.make_string_literal(
                    scope,
                    node.span.clone(),
                    node.token_value(),
                ))
            }
            AstKind::BooleanLiteral => Some(self.session.builder.make_boolean_literal(
                scope,
                node.span.clone(),
                node.token_value() == "true",
            )),
            AstKind::CharacterLiteral => self.character_literal(&ctx),
            AstKind::NilLiteral => {
                Some(self.session.builder.make_nil_literal(scope, node.span.clone()))
            }
            AstKind::UninitializedLiteral => Some(
                self.session
                    .builder
                    .make_uninitialized_literal(scope, node.span.clone()),
            ),
            AstKind::UnaryOperator => self.unary_operator(&ctx),
            AstKind::BinaryOperator => self.binary_operator(&ctx),
            AstKind::SubscriptExpression => self.subscript(&ctx),
            AstKind::CastExpression => self.cast(&ctx, false),
            AstKind::TransmuteExpression => self.cast(&ctx, true),
            AstKind::ProcExpression => self.proc_expression(&ctx),
            AstKind::ProcCall => self.proc_call(&ctx),
            AstKind::IfExpression | AstKind::ElseIfExpression => self.if_expression(&ctx),
            AstKind::ElseExpression => self.else_expression(&ctx),
            AstKind::WhileStatement => self.while_statement(&ctx),
            AstKind::ForInStatement => self.for_in_statement(&ctx),
            AstKind::SwitchExpression => self.switch_expression(&ctx),
            AstKind::CaseExpression => self.case_expression(&ctx),
            AstKind::FallthroughStatement => Some(
                self.session
                    .builder
                    .make_fallthrough(scope, node.span.clone()),
            ),
            AstKind::BreakStatement => {
                let label = self.optional_label(node);
                Some(self.session.builder.make_break(scope, node.span.clone(), label))
            }
            AstKind::ContinueStatement => {
                let label = self.optional_label(node);
                Some(
                    self.session
                        .builder
                        .make_continue(scope, node.span.clone(), label),
                )
            }
            AstKind::ReturnStatement => self.return_statement(&ctx),
            AstKind::DeferExpression => self.defer_expression(&ctx),
            AstKind::WithExpression => self.with_expression(&ctx),
            AstKind::StructExpression => self.composite_expression(&ctx, super::element::CompositeKind::Struct),
            AstKind::UnionExpression => self.composite_expression(&ctx, super::element::CompositeKind::Union),
            AstKind::EnumExpression => self.composite_expression(&ctx, super::element::CompositeKind::Enum),
            AstKind::NamespaceExpression => self.namespace_expression(&ctx),
            AstKind::Directive => self.directive(&ctx),
            AstKind::RawBlock => Some(self.session.builder.make_raw_block(
                scope,
                node.span.clone(),
                node.token_value(),
            )),
            AstKind::Attribute => {
                let expr = node
                    .lhs
                    .as_deref()
                    .and_then(|lhs| self.evaluate_in_scope(lhs, scope));
                Some(self.session.builder.make_attribute(
                    scope,
                    node.span.clone(),
                    node.token_value(),
                    expr,
                ))
            }
            AstKind::LineComment | AstKind::BlockComment => Some(
                self.session
                    .builder
                    .make_comment(scope, node.span.clone(), node.token_value()),
            ),
            AstKind::TypeIdentifier => {
                let type_ref = self.type_reference(node, scope);
                Some(type_ref)
            }
            AstKind::ImportExpression | AstKind::ModuleExpression => self.import_expression(&ctx),
            AstKind::SymbolPart
            | AstKind::Label
            | AstKind::LabelList
            | AstKind::AssignmentTargetList
            | AstKind::AssignmentSourceList
            | AstKind::ArgumentList
            | AstKind::ParameterList
            | AstKind::ReturnArgumentList
            | AstKind::Pair => {
                self.session.result.error(
                    X_UNSUPPORTED,
                    format!("unexpected ast node kind: {:?}", node.kind),
                    Some(node.span.clone()),
                );
                None
            }
        };
        if let Some(id) = element {
            self.apply_context(id, node, scope);
        }
        element
    }

    /// Attach the node's comments and attributes to the produced element.
    fn apply_context(&mut self, element: ElementId, node: &AstNode, scope: ElementId) {
        for comment in &node.comments {
            let id = self.session.builder.make_comment(
                scope,
                comment.span.clone(),
                comment.token_value(),
            );
            if let Some(target) = self.session.builder.elements_mut().get_mut(element) {
                target.comments.push(id);
            }
        }
        for attribute in &node.attributes {
            let expr = attribute
                .lhs
                .as_deref()
                .and_then(|lhs| self.evaluate_in_scope(lhs, scope));
            let id = self.session.builder.make_attribute(
                scope,
                attribute.span.clone(),
                attribute.token_value(),
                expr,
            );
            if let Some(target) = self.session.builder.elements_mut().get_mut(element) {
                target.attributes.push(id);
            }
        }
    }

    // ------------------------------------------------------------------
    // structure

    fn module(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let name = if ctx.node.token_value().is_empty() {
            "module"
        } else {
            ctx.node.token_value()
        };
        let module = self
            .session
            .builder
            .make_module(self.session.program, name, ctx.node.span.clone());
        self.session.builder.current_module = Some(module);
        let scope = match &self.session.builder.elements()[module].data {
            ElementData::Module { scope, .. } => *scope,
            _ => return None,
        };
        self.evaluate_statements_into(&ctx.node.children, scope);
        debug!(
            "module `{}` evaluated: {} elements total",
            name,
            self.session.builder.elements().len()
        );
        Some(module)
    }

    fn evaluate_statements_into(&mut self, nodes: &[AstNode], block: ElementId) {
        self.session.scopes.push_scope(block);
        for node in nodes {
            let Some(element) = self.evaluate(node) else {
                continue;
            };
            let statement = if self.session.builder.elements()[element].kind()
                == ElementKind::Statement
            {
                element
            } else {
                self.session.builder.make_statement(
                    block,
                    node.span.clone(),
                    Vec::new(),
                    Some(element),
                )
            };
            self.session.builder.append_statement(block, statement);
        }
        self.session.scopes.pop_scope();
    }

    /// Build a child block and evaluate a statement body into it.
    fn body_block(&mut self, body: &AstNode, parent: ElementId, has_frame: bool) -> ElementId {
        let block = self.session.builder.make_block(Some(parent), has_frame);
        self.session.builder.append_child_block(parent, block);
        self.evaluate_statements_into(&body.children, block);
        block
    }

    fn statement(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let labels = ctx
            .node
            .lhs
            .as_deref()
            .map(|list| {
                list.children
                    .iter()
                    .map(|l| l.token_value().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let expression = match ctx.node.rhs.as_deref() {
            Some(rhs) => self.evaluate_in_scope(rhs, ctx.scope),
            None => None,
        };
        if expression.is_none() && ctx.node.rhs.is_some() {
            return None;
        }
        Some(self.session.builder.make_statement(
            ctx.scope,
            ctx.node.span.clone(),
            labels,
            expression,
        ))
    }

    fn statement_body(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        Some(self.body_block(ctx.node, ctx.scope, false))
    }

    fn expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let root = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        Some(
            self.session
                .builder
                .make_expression(ctx.scope, ctx.node.span.clone(), root),
        )
    }

    // ------------------------------------------------------------------
    // names and literals

    fn qualified_symbol(&self, node: &AstNode) -> QualifiedSymbol {
        let mut parts: Vec<String> = node
            .children
            .iter()
            .filter(|c| c.kind == AstKind::SymbolPart)
            .map(|c| c.token_value().to_string())
            .collect();
        if parts.is_empty() {
            parts.push(node.token_value().to_string());
        }
        let name = parts.pop().unwrap_or_default();
        QualifiedSymbol {
            namespaces: parts,
            name,
        }
    }

    /// A symbol in expression position: resolve against the scope chain or
    /// queue for the unknown-identifier pass.
    fn symbol_reference(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let symbol = self.qualified_symbol(ctx.node);
        let identifier = self.session.scopes.find_identifier(
            self.session.builder.elements(),
            &symbol,
            Some(ctx.scope),
        );
        let reference = self.session.builder.make_identifier_reference(
            ctx.scope,
            ctx.node.span.clone(),
            symbol,
            identifier,
        );
        if identifier.is_none() {
            self.session.unresolved_references.push(reference);
        }
        Some(reference)
    }

    fn number_literal(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        match ctx.node.token.as_ref().and_then(|t| t.number) {
            Some(Number::Integer(value)) => Some(self.session.builder.make_integer_literal(
                ctx.scope,
                ctx.node.span.clone(),
                value,
            )),
            Some(Number::Float(value)) => Some(self.session.builder.make_float_literal(
                ctx.scope,
                ctx.node.span.clone(),
                value,
            )),
            None => {
                self.session.result.error(
                    X_UNSUPPORTED,
                    "number literal without a parsed value",
                    Some(ctx.node.span.clone()),
                );
                None
            }
        }
    }

    fn character_literal(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let rune = ctx.node.token_value().chars().next().unwrap_or('\u{fffd}');
        Some(
            self.session
                .builder
                .make_character_literal(ctx.scope, ctx.node.span.clone(), rune),
        )
    }

    // ------------------------------------------------------------------
    // operators

    fn binary_operator(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let op = match binary_op_for_token(ctx.node.token_value()) {
            Some(op) => op,
            None => {
                self.session.result.error(
                    X_UNSUPPORTED,
                    format!("unknown binary operator `{}`", ctx.node.token_value()),
                    Some(ctx.node.span.clone()),
                );
                return None;
            }
        };
        let lhs = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let rhs = if op == BinaryOp::MemberAccess {
            // Field references resolve against the composite during the
            // resolver passes, not through the scope chain.
            let symbol = self.qualified_symbol(ctx.node.rhs.as_deref()?);
            self.session.builder.make_identifier_reference(
                ctx.scope,
                ctx.node.span.clone(),
                symbol,
                None,
            )
        } else {
            self.evaluate_in_scope(ctx.node.rhs.as_deref()?, ctx.scope)?
        };
        Some(self.session.builder.make_binary_operator(
            ctx.scope,
            ctx.node.span.clone(),
            op,
            lhs,
            rhs,
        ))
    }

    fn unary_operator(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let op = match ctx.node.token_value() {
            "-" => UnaryOp::Negate,
            "~" => UnaryOp::BinaryNot,
            "!" => UnaryOp::LogicalNot,
            "&" => UnaryOp::AddressOf,
            "*" | "^" => UnaryOp::Dereference,
            other => {
                self.session.result.error(
                    X_UNSUPPORTED,
                    format!("unknown unary operator `{}`", other),
                    Some(ctx.node.span.clone()),
                );
                return None;
            }
        };
        let operand = self.evaluate_in_scope(ctx.node.rhs.as_deref()?, ctx.scope)?;
        Some(self.session.builder.make_unary_operator(
            ctx.scope,
            ctx.node.span.clone(),
            op,
            operand,
        ))
    }

    fn subscript(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let lhs = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let rhs = self.evaluate_in_scope(ctx.node.rhs.as_deref()?, ctx.scope)?;
        Some(self.session.builder.make_binary_operator(
            ctx.scope,
            ctx.node.span.clone(),
            BinaryOp::Subscript,
            lhs,
            rhs,
        ))
    }

    fn cast(&mut self, ctx: &EvaluatorContext<'_>, transmute: bool) -> Option<ElementId> {
        let type_ref = self.type_reference(ctx.node.lhs.as_deref()?, ctx.scope);
        let expression = self.evaluate_in_scope(ctx.node.rhs.as_deref()?, ctx.scope)?;
        Some(if transmute {
            self.session.builder.make_transmute(
                ctx.scope,
                ctx.node.span.clone(),
                type_ref,
                expression,
            )
        } else {
            self.session
                .builder
                .make_cast(ctx.scope, ctx.node.span.clone(), type_ref, expression)
        })
    }

    // ------------------------------------------------------------------
    // assignment and declaration

    fn assignment(&mut self, ctx: &EvaluatorContext<'_>, constant: bool) -> Option<ElementId> {
        let targets = &ctx.node.lhs.as_deref()?.children;
        let empty: Vec<AstNode> = Vec::new();
        let sources = ctx
            .node
            .rhs
            .as_deref()
            .map(|rhs| &rhs.children)
            .unwrap_or(&empty);

        let mut last = None;
        for (index, target) in targets.iter().enumerate() {
            let source = sources.get(index);
            last = self.assign_one(ctx, target, source, constant);
        }
        last
    }

    fn assign_one(
        &mut self,
        ctx: &EvaluatorContext<'_>,
        target: &AstNode,
        source: Option<&AstNode>,
        constant: bool,
    ) -> Option<ElementId> {
        if target.kind != AstKind::Symbol {
            // Store through an lvalue expression: member access, subscript,
            // or pointer dereference.
            let lhs = self.evaluate_in_scope(target, ctx.scope)?;
            let rhs = self.evaluate_in_scope(source?, ctx.scope)?;
            return Some(self.session.builder.make_binary_operator(
                ctx.scope,
                ctx.node.span.clone(),
                BinaryOp::Assignment,
                lhs,
                rhs,
            ));
        }

        let symbol = self.qualified_symbol(target);
        let existing = self.session.scopes.find_identifier(
            self.session.builder.elements(),
            &symbol,
            Some(ctx.scope),
        );
        if let Some(identifier) = existing {
            let reference = self.session.builder.make_identifier_reference(
                ctx.scope,
                target.span.clone(),
                symbol,
                Some(identifier),
            );
            let rhs = self.evaluate_in_scope(source?, ctx.scope)?;
            return Some(self.session.builder.make_binary_operator(
                ctx.scope,
                ctx.node.span.clone(),
                BinaryOp::Assignment,
                reference,
                rhs,
            ));
        }

        self.declare(ctx, target, symbol, source, constant)
    }

    fn declare(
        &mut self,
        ctx: &EvaluatorContext<'_>,
        target: &AstNode,
        symbol: QualifiedSymbol,
        source: Option<&AstNode>,
        constant: bool,
    ) -> Option<ElementId> {
        let source_element = match source {
            Some(node) => {
                let evaluated = self.evaluate_in_scope(node, ctx.scope)?;
                Some(evaluated)
            }
            None => None,
        };

        let annotation = target
            .rhs
            .as_deref()
            .map(|node| self.type_reference(node, ctx.scope));

        let name = symbol.name.clone();
        let mut type_ref = annotation;
        let mut inferred = annotation.is_none();
        let mut initializer = None;

        if let Some(src) = source_element {
            let kind = self.session.builder.elements()[src].kind();
            match kind {
                ElementKind::ProcedureType => {
                    self.session.builder.rename_type(src, &name);
                    type_ref = Some(src);
                    inferred = false;
                }
                ElementKind::CompositeType | ElementKind::TupleType => {
                    self.session.builder.rename_type(src, &name);
                    type_ref = Some(src);
                    inferred = false;
                }
                ElementKind::Namespace => {
                    self.rename_namespace(src, &name);
                    type_ref = Some(self.session.core.namespace_type);
                    inferred = false;
                }
                ElementKind::ModuleReference => {
                    type_ref = Some(self.session.core.module_type);
                    inferred = false;
                }
                _ => {}
            }
            initializer = Some(self.session.builder.make_initializer(
                ctx.scope,
                ctx.node.span.clone(),
                Some(src),
            ));
        }

        let identifier = self.session.builder.make_identifier(
            ctx.scope,
            target.span.clone(),
            symbol,
            type_ref,
            initializer,
            constant,
            inferred,
        );
        self.session.builder.append_identifier(ctx.scope, identifier);

        self.queue_if_unknown(identifier, type_ref);

        Some(self.session.builder.make_declaration(
            ctx.scope,
            ctx.node.span.clone(),
            identifier,
            None,
        ))
    }

    /// Identifiers without a resolvable type yet go onto the unknown-types
    /// list for the fix-point resolver; this covers both missing
    /// annotations and forward/cyclic type references.
    fn queue_if_unknown(&mut self, identifier: ElementId, type_ref: Option<ElementId>) {
        let unknown = match type_ref {
            None => true,
            Some(type_id) => matches!(
                &self.session.builder.elements()[type_id].data,
                ElementData::TypeReference {
                    referenced_type: None,
                    ..
                }
            ),
        };
        if unknown {
            self.session.unknown_type_identifiers.push(identifier);
        }
    }

    fn rename_namespace(&mut self, namespace: ElementId, new_name: &str) {
        if let Some(ElementData::Namespace { name, .. }) = self
            .session
            .builder
            .elements_mut()
            .get_mut(namespace)
            .map(|e| &mut e.data)
        {
            *name = new_name.to_string();
        }
    }

    /// Resolve a type-identifier node to a type reference element,
    /// materializing pointer/array wrappers when the base is known and
    /// recording the decoration for the resolver when it is not.
    fn type_reference(&mut self, node: &AstNode, scope: ElementId) -> ElementId {
        let symbol = node
            .lhs
            .as_deref()
            .map(|lhs| self.qualified_symbol(lhs))
            .unwrap_or_else(|| QualifiedSymbol::flat(node.token_value()));
        let array_size = node
            .rhs
            .as_deref()
            .and_then(|size| size.token.as_ref())
            .and_then(|token| match token.number {
                Some(Number::Integer(v)) if v >= 0 => Some(v as u64),
                _ => None,
            });

        let base = self.session.scopes.find_type(
            self.session.builder.elements(),
            &symbol,
            Some(scope),
        );
        match base {
            Some(base) => {
                let mut resolved = base;
                if node.is_pointer() {
                    resolved = self
                        .session
                        .scopes
                        .find_pointer_type(&mut self.session.builder, resolved);
                }
                if node.is_array() {
                    resolved = self.session.scopes.find_array_type(
                        &mut self.session.builder,
                        resolved,
                        array_size.unwrap_or(0),
                    );
                }
                self.session.builder.make_type_reference(
                    scope,
                    node.span.clone(),
                    symbol,
                    Some(resolved),
                )
            }
            None => self.session.builder.make_decorated_type_reference(
                scope,
                node.span.clone(),
                symbol,
                node.is_pointer(),
                if node.is_array() { Some(array_size.unwrap_or(0)) } else { None },
            ),
        }
    }

    // ------------------------------------------------------------------
    // procedures and calls

    fn proc_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let proc_type = self.session.builder.make_procedure_type(
            ctx.scope,
            ctx.node.span.clone(),
            &format!("proc_{}", ctx.node.id),
        );
        let proc_scope = self.session.builder.elements()[proc_type]
            .as_procedure()
            .map(|p| p.scope)?;

        if let Some(params) = ctx.node.rhs.as_deref() {
            for param in &params.children {
                let target = match param.kind {
                    AstKind::Symbol => param,
                    AstKind::Assignment | AstKind::ConstantAssignment => {
                        match param.lhs.as_deref().and_then(|l| l.children.first()) {
                            Some(symbol) => symbol,
                            None => continue,
                        }
                    }
                    _ => continue,
                };
                let symbol = self.qualified_symbol(target);
                let annotation = target
                    .rhs
                    .as_deref()
                    .map(|node| self.type_reference(node, proc_scope));
                let identifier = self.session.builder.make_identifier(
                    proc_scope,
                    target.span.clone(),
                    symbol,
                    annotation,
                    None,
                    false,
                    annotation.is_none(),
                );
                self.session.builder.append_identifier(proc_scope, identifier);
                self.queue_if_unknown(identifier, annotation);
                let field = self.session.builder.make_field(
                    proc_scope,
                    target.span.clone(),
                    identifier,
                );
                self.session.builder.add_proc_parameter(proc_type, field);
            }
        }

        if let Some(returns) = ctx.node.lhs.as_deref() {
            if let Some(first) = returns.children.first() {
                let type_ref = self.type_reference(first, proc_scope);
                let identifier = self.session.builder.make_identifier(
                    proc_scope,
                    first.span.clone(),
                    QualifiedSymbol::flat("_result"),
                    Some(type_ref),
                    None,
                    false,
                    false,
                );
                self.queue_if_unknown(identifier, Some(type_ref));
                let field = self.session.builder.make_field(
                    proc_scope,
                    first.span.clone(),
                    identifier,
                );
                self.session.builder.adopt_field_identifier(field, identifier);
                self.session.builder.set_proc_return(proc_type, field);
            }
        }

        if let Some(body) = ctx.node.children.first() {
            self.evaluate_statements_into(&body.children, proc_scope);
            let instance = self.session.builder.make_proc_instance(
                ctx.scope,
                ctx.node.span.clone(),
                proc_type,
                proc_scope,
            );
            self.session.builder.add_proc_instance(proc_type, instance);
        }

        Some(proc_type)
    }

    fn proc_call(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let callee = ctx.node.lhs.as_deref()?;
        let symbol = self.qualified_symbol(callee);
        let argument_nodes = ctx
            .node
            .rhs
            .as_deref()
            .map(|list| list.children.as_slice())
            .unwrap_or(&[]);

        let mut arguments = Vec::new();
        for argument in argument_nodes {
            let element = if argument.kind == AstKind::Pair {
                let name = self.qualified_symbol(argument.lhs.as_deref()?).name;
                let value = self.evaluate_in_scope(argument.rhs.as_deref()?, ctx.scope)?;
                self.session.builder.make_argument_pair(
                    ctx.scope,
                    argument.span.clone(),
                    name,
                    value,
                )
            } else {
                self.evaluate_in_scope(argument, ctx.scope)?
            };
            arguments.push(element);
        }
        let argument_list = self.session.builder.make_argument_list(
            ctx.scope,
            ctx.node.span.clone(),
            arguments,
        );

        if !symbol.is_qualified() {
            if let Some(def) = intrinsics::find_intrinsic(&symbol.name) {
                let count = argument_nodes.len();
                if count < def.min_args || count > def.max_args {
                    let diag = intrinsics::arity_error(def, count, ctx.node.span.clone());
                    self.session.result.push_diag(diag);
                    return None;
                }
                return Some(self.session.builder.make_intrinsic(
                    ctx.scope,
                    ctx.node.span.clone(),
                    def.name,
                    argument_list,
                ));
            }
        }

        let identifier = self.session.scopes.find_identifier(
            self.session.builder.elements(),
            &symbol,
            Some(ctx.scope),
        );
        let reference = self.session.builder.make_identifier_reference(
            ctx.scope,
            callee.span.clone(),
            symbol,
            identifier,
        );
        if identifier.is_none() {
            self.session.unresolved_references.push(reference);
        }
        Some(self.session.builder.make_proc_call(
            ctx.scope,
            ctx.node.span.clone(),
            reference,
            argument_list,
        ))
    }

    // ------------------------------------------------------------------
    // control flow

    fn if_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let predicate = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let true_branch = self.body_block(ctx.node.children.first()?, ctx.scope, false);
        let false_branch = match ctx.node.rhs.as_deref() {
            Some(chained) => self.evaluate_in_scope(chained, ctx.scope),
            None => None,
        };
        Some(self.session.builder.make_if(
            ctx.scope,
            ctx.node.span.clone(),
            predicate,
            true_branch,
            false_branch,
        ))
    }

    fn else_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        Some(self.body_block(ctx.node.children.first()?, ctx.scope, false))
    }

    fn while_statement(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let predicate = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let body = self.body_block(ctx.node.children.first()?, ctx.scope, false);
        Some(self.session.builder.make_while(
            ctx.scope,
            ctx.node.span.clone(),
            predicate,
            body,
        ))
    }

    fn for_in_statement(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let body = self.session.builder.make_block(Some(ctx.scope), false);
        self.session.builder.append_child_block(ctx.scope, body);

        let expression = self.evaluate_in_scope(ctx.node.rhs.as_deref()?, ctx.scope)?;

        let induction_symbol = self.qualified_symbol(ctx.node.lhs.as_deref()?);
        let inferred = {
            let inference = TypeInference {
                map: self.session.builder.elements(),
                scopes: &self.session.scopes,
                core: &self.session.core,
            };
            inference.infer(expression)
        };
        let induction = self.session.builder.make_identifier(
            body,
            ctx.node.lhs.as_deref()?.span.clone(),
            induction_symbol,
            inferred,
            None,
            false,
            inferred.is_none(),
        );
        self.session.builder.append_identifier(body, induction);
        if inferred.is_none() {
            self.session.unknown_type_identifiers.push(induction);
        }

        if let Some(body_node) = ctx.node.children.first() {
            self.evaluate_statements_into(&body_node.children, body);
        }

        Some(self.session.builder.make_for(
            ctx.scope,
            ctx.node.span.clone(),
            induction,
            expression,
            body,
        ))
    }

    fn switch_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let expression = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let scope = self.session.builder.make_block(Some(ctx.scope), false);
        self.session.builder.append_child_block(ctx.scope, scope);
        self.evaluate_statements_into(&ctx.node.children, scope);
        Some(self.session.builder.make_switch(
            ctx.scope,
            ctx.node.span.clone(),
            expression,
            scope,
        ))
    }

    fn case_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let expression = match ctx.node.lhs.as_deref() {
            Some(expr) => Some(self.evaluate_in_scope(expr, ctx.scope)?),
            None => None,
        };
        let scope = self.body_block(ctx.node.children.first()?, ctx.scope, false);
        Some(self.session.builder.make_case(
            ctx.scope,
            ctx.node.span.clone(),
            expression,
            scope,
        ))
    }

    fn return_statement(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let mut expressions = Vec::new();
        for child in &ctx.node.children {
            expressions.push(self.evaluate_in_scope(child, ctx.scope)?);
        }
        Some(
            self.session
                .builder
                .make_return(ctx.scope, ctx.node.span.clone(), expressions),
        )
    }

    fn defer_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let expression = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let defer = self
            .session
            .builder
            .make_defer(ctx.scope, ctx.node.span.clone(), expression);
        self.session.builder.push_defer(ctx.scope, defer);
        Some(defer)
    }

    fn with_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let expression = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
        let body = self.session.builder.make_block(Some(ctx.scope), false);
        self.session.builder.append_child_block(ctx.scope, body);
        self.session.builder.set_with_receiver(body, expression);
        if let Some(body_node) = ctx.node.children.first() {
            self.evaluate_statements_into(&body_node.children, body);
        }
        Some(self.session.builder.make_with(
            ctx.scope,
            ctx.node.span.clone(),
            expression,
            body,
        ))
    }

    // ------------------------------------------------------------------
    // type declarations

    fn composite_expression(
        &mut self,
        ctx: &EvaluatorContext<'_>,
        kind: super::element::CompositeKind,
    ) -> Option<ElementId> {
        let is_packed = ctx
            .node
            .attributes
            .iter()
            .any(|a| a.token_value() == "packed");
        let composite = self.session.builder.make_composite_type(
            ctx.scope,
            ctx.node.span.clone(),
            kind,
            &format!("composite_{}", ctx.node.id),
            is_packed,
        );
        let composite_scope = self.session.builder.elements()[composite]
            .as_composite()
            .map(|c| c.scope)?;

        let Some(body) = ctx.node.children.first() else {
            return Some(composite);
        };
        let mut enum_ordinal: i128 = 0;
        for member in &body.children {
            let declaration = match member.kind {
                AstKind::Statement => member.rhs.as_deref(),
                _ => Some(member),
            };
            let Some(declaration) = declaration else {
                continue;
            };
            match declaration.kind {
                AstKind::Assignment | AstKind::ConstantAssignment => {
                    let target = declaration.lhs.as_deref()?.children.first()?;
                    let symbol = self.qualified_symbol(target);
                    let annotation = target
                        .rhs
                        .as_deref()
                        .map(|node| self.type_reference(node, composite_scope));
                    let source = declaration
                        .rhs
                        .as_deref()
                        .and_then(|rhs| rhs.children.first());
                    self.session.scopes.push_scope(composite_scope);
                    let initializer_expr =
                        source.and_then(|node| self.evaluate_in_scope(node, composite_scope));
                    self.session.scopes.pop_scope();
                    let initializer = initializer_expr.map(|expr| {
                        self.session.builder.make_initializer(
                            composite_scope,
                            declaration.span.clone(),
                            Some(expr),
                        )
                    });
                    let identifier = self.session.builder.make_identifier(
                        composite_scope,
                        target.span.clone(),
                        symbol,
                        annotation,
                        initializer,
                        kind == super::element::CompositeKind::Enum,
                        annotation.is_none(),
                    );
                    if kind != super::element::CompositeKind::Enum {
                        self.queue_if_unknown(identifier, annotation);
                    }
                    let field = self.session.builder.make_field(
                        composite_scope,
                        target.span.clone(),
                        identifier,
                    );
                    self.session.builder.adopt_field_identifier(field, identifier);
                    self.session.builder.add_composite_field(composite, field);
                }
                AstKind::Symbol => {
                    // Bare enum member: auto-assigned ordinal.
                    let symbol = self.qualified_symbol(declaration);
                    let ordinal = self.session.builder.make_integer_literal(
                        composite_scope,
                        declaration.span.clone(),
                        enum_ordinal,
                    );
                    enum_ordinal += 1;
                    let initializer = self.session.builder.make_initializer(
                        composite_scope,
                        declaration.span.clone(),
                        Some(ordinal),
                    );
                    let type_ref = self.session.core.numeric("s32");
                    let identifier = self.session.builder.make_identifier(
                        composite_scope,
                        declaration.span.clone(),
                        symbol,
                        type_ref,
                        Some(initializer),
                        true,
                        false,
                    );
                    let field = self.session.builder.make_field(
                        composite_scope,
                        declaration.span.clone(),
                        identifier,
                    );
                    self.session.builder.adopt_field_identifier(field, identifier);
                    self.session.builder.add_composite_field(composite, field);
                }
                _ => {
                    self.session.result.error(
                        X_UNSUPPORTED,
                        format!("unexpected composite member: {:?}", declaration.kind),
                        Some(declaration.span.clone()),
                    );
                }
            }
        }
        Some(composite)
    }

    fn namespace_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let namespace = self.session.builder.make_namespace(
            ctx.scope,
            &format!("namespace_{}", ctx.node.id),
            ctx.node.span.clone(),
        );
        let scope = match &self.session.builder.elements()[namespace].data {
            ElementData::Namespace { scope, .. } => *scope,
            _ => return None,
        };
        if let Some(body) = ctx.node.children.first() {
            self.evaluate_statements_into(&body.children, scope);
        }
        Some(namespace)
    }

    fn import_expression(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let name = match ctx.node.lhs.as_deref() {
            Some(symbol) => self.qualified_symbol(symbol).name,
            None => ctx.node.token_value().to_string(),
        };
        let module = self.find_module_by_name(&name);
        let reference =
            self.session
                .builder
                .make_module_reference(ctx.scope, ctx.node.span.clone(), module);
        if module.is_none() {
            self.session.result.error(
                X_UNSUPPORTED,
                format!("unknown module `{}`", name),
                Some(ctx.node.span.clone()),
            );
        }
        Some(reference)
    }

    fn find_module_by_name(&self, name: &str) -> Option<ElementId> {
        let map = self.session.builder.elements();
        match &map[self.session.program].data {
            ElementData::Program { modules, .. } => modules
                .iter()
                .copied()
                .find(|&m| matches!(&map[m].data, ElementData::Module { name: n, .. } if n == name)),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // directives

    fn directive(&mut self, ctx: &EvaluatorContext<'_>) -> Option<ElementId> {
        let name = ctx.node.token_value();
        let data = match name {
            "assembly" => {
                let raw = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
                DirectiveData::Assembly { raw_block: raw }
            }
            "run" => {
                let expression = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
                DirectiveData::Run { expression }
            }
            "if" => {
                let condition = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
                let true_body = self.body_block(ctx.node.children.first()?, ctx.scope, false);
                let false_body = ctx
                    .node
                    .rhs
                    .as_deref()
                    .map(|body| self.body_block(body, ctx.scope, false));
                DirectiveData::If {
                    condition,
                    true_body,
                    false_body,
                }
            }
            "type" => {
                let expression = self.type_reference(ctx.node.lhs.as_deref()?, ctx.scope);
                DirectiveData::Type { expression }
            }
            "foreign" => {
                let declaration = self.evaluate_in_scope(ctx.node.lhs.as_deref()?, ctx.scope)?;
                if let Some(proc_type) = self.declared_procedure_type(declaration) {
                    self.session.builder.set_foreign(proc_type, None);
                } else {
                    self.session.result.error(
                        X_UNSUPPORTED,
                        "#foreign expects a procedure declaration",
                        Some(ctx.node.span.clone()),
                    );
                    return None;
                }
                DirectiveData::Foreign {
                    expression: declaration,
                }
            }
            other => {
                self.session.result.error(
                    X_UNSUPPORTED,
                    format!("unknown directive `#{}`", other),
                    Some(ctx.node.span.clone()),
                );
                return None;
            }
        };
        Some(
            self.session
                .builder
                .make_directive(ctx.scope, ctx.node.span.clone(), data),
        )
    }

    fn declared_procedure_type(&self, declaration: ElementId) -> Option<ElementId> {
        let map = self.session.builder.elements();
        let identifier = match &map.get(declaration)?.data {
            ElementData::Declaration { identifier, .. } => *identifier,
            ElementData::Identifier(_) => declaration,
            _ => return None,
        };
        let data = map.get(identifier)?.as_identifier()?;
        let type_id = super::types::concrete_type(map, data.type_ref?)?;
        match map.get(type_id)?.kind() {
            ElementKind::ProcedureType => Some(type_id),
            _ => None,
        }
    }

    fn optional_label(&self, node: &AstNode) -> Option<String> {
        node.lhs
            .as_deref()
            .map(|symbol| self.qualified_symbol(symbol).name)
    }
}

fn binary_op_for_token(token: &str) -> Option<BinaryOp> {
    Some(match token {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Subtract,
        "*" => BinaryOp::Multiply,
        "/" => BinaryOp::Divide,
        "%" => BinaryOp::Modulo,
        "**" => BinaryOp::Exponent,
        "|" => BinaryOp::BinaryOr,
        "&" => BinaryOp::BinaryAnd,
        "^" => BinaryOp::BinaryXor,
        "<<" => BinaryOp::ShiftLeft,
        ">>" => BinaryOp::ShiftRight,
        "<<<" => BinaryOp::RotateLeft,
        ">>>" => BinaryOp::RotateRight,
        "==" => BinaryOp::Equals,
        "!=" => BinaryOp::NotEquals,
        "<" => BinaryOp::LessThan,
        "<=" => BinaryOp::LessThanOrEqual,
        ">" => BinaryOp::GreaterThan,
        ">=" => BinaryOp::GreaterThanOrEqual,
        "&&" | "and" => BinaryOp::LogicalAnd,
        "||" | "or" => BinaryOp::LogicalOr,
        "." => BinaryOp::MemberAccess,
        ":=" | "=" => BinaryOp::Assignment,
        _ => return None,
    })
}
