use crate::frontend::ast::Span;

use super::element::{
    BinaryOp, BlockData, CompositeData, CompositeKind, DirectiveData, ElementData, ElementId,
    ElementMap, IdentifierData, ProcedureData, QualifiedSymbol, TypeBase, UnaryOp,
};
use super::types::{NumericTypeProperties, MACHINE_WORD};

/// Factories for every element kind. Each factory allocates an id, stamps
/// the current module and parent scope, installs the element in the map, and
/// wires ownership. Factories never perform name resolution.
#[derive(Default)]
pub struct ElementBuilder {
    map: ElementMap,
    pub current_module: Option<ElementId>,
}

impl ElementBuilder {
    pub fn elements(&self) -> &ElementMap {
        &self.map
    }

    pub fn elements_mut(&mut self) -> &mut ElementMap {
        &mut self.map
    }

    fn make(&mut self, parent_scope: Option<ElementId>, span: Span, data: ElementData) -> ElementId {
        self.map.alloc(self.current_module, parent_scope, span, data)
    }

    pub fn make_block(&mut self, parent_scope: Option<ElementId>, has_stack_frame: bool) -> ElementId {
        self.make(
            parent_scope,
            Span::default(),
            ElementData::Block(BlockData {
                has_stack_frame,
                ..BlockData::default()
            }),
        )
    }

    pub fn make_program(&mut self) -> ElementId {
        let block = self.make_block(None, false);
        let program = self.make(
            None,
            Span::default(),
            ElementData::Program {
                modules: Vec::new(),
                block,
            },
        );
        program
    }

    pub fn make_module(&mut self, program: ElementId, name: &str, span: Span) -> ElementId {
        let program_block = match &self.map[program].data {
            ElementData::Program { block, .. } => *block,
            _ => return program,
        };
        let scope = self.make_block(Some(program_block), false);
        let module = self.make(
            Some(program_block),
            span,
            ElementData::Module {
                name: name.to_string(),
                scope,
            },
        );
        if let Some(ElementData::Program { modules, .. }) =
            self.map.get_mut(program).map(|e| &mut e.data)
        {
            modules.push(module);
        }
        self.map.adopt(program, module);
        module
    }

    pub fn make_namespace(&mut self, parent_scope: ElementId, name: &str, span: Span) -> ElementId {
        let scope = self.make_block(Some(parent_scope), false);
        self.make(
            Some(parent_scope),
            span,
            ElementData::Namespace {
                name: name.to_string(),
                scope,
            },
        )
    }

    pub fn make_field(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        identifier: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Field {
                identifier,
                offset: 0,
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn make_identifier(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        symbol: QualifiedSymbol,
        type_ref: Option<ElementId>,
        initializer: Option<ElementId>,
        is_constant: bool,
        inferred_type: bool,
    ) -> ElementId {
        let id = self.make(
            Some(parent_scope),
            span,
            ElementData::Identifier(IdentifierData {
                symbol,
                type_ref,
                initializer,
                is_constant,
                inferred_type,
            }),
        );
        // Per-use type references belong to the identifier; shared type
        // elements stay owned by their scope.
        if let Some(type_ref) = type_ref {
            if self.map[type_ref].kind() == super::element::ElementKind::TypeReference {
                self.map.adopt(id, type_ref);
            }
        }
        id
    }

    /// Attach a composite field's identifier to the field element. Proc
    /// parameters skip this: their identifiers live in the proc scope.
    pub fn adopt_field_identifier(&mut self, field: ElementId, identifier: ElementId) {
        self.map.adopt(field, identifier);
    }

    pub fn make_identifier_reference(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        symbol: QualifiedSymbol,
        identifier: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::IdentifierReference { symbol, identifier },
        )
    }

    pub fn make_initializer(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        expression: Option<ElementId>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Initializer { expression })
    }

    pub fn make_expression(&mut self, parent_scope: ElementId, span: Span, root: ElementId) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Expression { root })
    }

    pub fn make_statement(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        labels: Vec<String>,
        expression: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Statement { labels, expression },
        )
    }

    pub fn make_declaration(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        identifier: ElementId,
        assignment: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Declaration {
                identifier,
                assignment,
            },
        )
    }

    pub fn make_integer_literal(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        value: i128,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::IntegerLiteral { value })
    }

    pub fn make_float_literal(&mut self, parent_scope: ElementId, span: Span, value: f64) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::FloatLiteral { value })
    }

    pub fn make_boolean_literal(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        value: bool,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::BooleanLiteral { value })
    }

    pub fn make_string_literal(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        value: &str,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::StringLiteral {
                value: value.to_string(),
            },
        )
    }

    pub fn make_character_literal(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        rune: char,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::CharacterLiteral { rune })
    }

    pub fn make_nil_literal(&mut self, parent_scope: ElementId, span: Span) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::NilLiteral)
    }

    pub fn make_uninitialized_literal(&mut self, parent_scope: ElementId, span: Span) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::UninitializedLiteral)
    }

    pub fn make_binary_operator(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        op: BinaryOp,
        lhs: ElementId,
        rhs: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::BinaryOperator { op, lhs, rhs },
        )
    }

    pub fn make_unary_operator(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        op: UnaryOp,
        operand: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::UnaryOperator { op, operand })
    }

    pub fn make_if(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        predicate: ElementId,
        true_branch: ElementId,
        false_branch: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::If {
                predicate,
                true_branch,
                false_branch,
            },
        )
    }

    pub fn make_while(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        predicate: ElementId,
        body: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::While { predicate, body })
    }

    pub fn make_for(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        induction: ElementId,
        expression: ElementId,
        body: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::For {
                induction,
                expression,
                body,
            },
        )
    }

    pub fn make_switch(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        expression: ElementId,
        scope: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Switch { expression, scope })
    }

    pub fn make_case(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        expression: Option<ElementId>,
        scope: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Case { expression, scope })
    }

    pub fn make_fallthrough(&mut self, parent_scope: ElementId, span: Span) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Fallthrough)
    }

    pub fn make_break(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        label: Option<String>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Break { label })
    }

    pub fn make_continue(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        label: Option<String>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Continue { label })
    }

    pub fn make_return(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        expressions: Vec<ElementId>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Return { expressions })
    }

    pub fn make_defer(&mut self, parent_scope: ElementId, span: Span, expression: ElementId) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Defer { expression })
    }

    pub fn make_with(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        expression: ElementId,
        body: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::With { expression, body })
    }

    pub fn make_cast(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        type_ref: ElementId,
        expression: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Cast {
                type_ref,
                expression,
            },
        )
    }

    pub fn make_transmute(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        type_ref: ElementId,
        expression: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Transmute {
                type_ref,
                expression,
            },
        )
    }

    pub fn make_proc_call(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        reference: ElementId,
        arguments: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::ProcCall {
                reference,
                arguments,
            },
        )
    }

    pub fn make_argument_list(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        elements: Vec<ElementId>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::ArgumentList { elements })
    }

    pub fn make_argument_pair(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        name: String,
        value: ElementId,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::ArgumentPair { name, value })
    }

    pub fn make_intrinsic(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        name: &str,
        arguments: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Intrinsic {
                name: name.to_string(),
                arguments,
            },
        )
    }

    pub fn make_directive(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        directive: DirectiveData,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::Directive(directive))
    }

    pub fn make_attribute(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        name: &str,
        expression: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Attribute {
                name: name.to_string(),
                expression,
            },
        )
    }

    pub fn make_comment(&mut self, parent_scope: ElementId, span: Span, value: &str) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::Comment {
                value: value.to_string(),
            },
        )
    }

    pub fn make_raw_block(&mut self, parent_scope: ElementId, span: Span, source: &str) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::RawBlock {
                source: source.to_string(),
            },
        )
    }

    pub fn make_module_reference(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        module: Option<ElementId>,
    ) -> ElementId {
        self.make(Some(parent_scope), span, ElementData::ModuleReference { module })
    }

    // ------------------------------------------------------------------
    // type factories

    pub fn make_numeric_type(
        &mut self,
        parent_scope: ElementId,
        props: &NumericTypeProperties,
    ) -> ElementId {
        let type_id = self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::NumericType {
                base: TypeBase::new(props.name, props.size_in_bytes, props.size_in_bytes.max(1)),
                min: props.min,
                max: props.max,
                is_signed: props.is_signed,
                class: props.class,
            },
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_bool_type(&mut self, parent_scope: ElementId) -> ElementId {
        let type_id = self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::BoolType {
                base: TypeBase::new("bool", 1, 1),
            },
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_rune_type(&mut self, parent_scope: ElementId) -> ElementId {
        let type_id = self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::RuneType {
                base: TypeBase::new("rune", 4, 4),
            },
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_string_type(&mut self, parent_scope: ElementId) -> ElementId {
        let type_id = self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::StringType {
                base: TypeBase::new("string", MACHINE_WORD, MACHINE_WORD),
            },
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_any_type(&mut self, parent_scope: ElementId) -> ElementId {
        let type_id = self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::AnyType {
                base: TypeBase::new("any", MACHINE_WORD, MACHINE_WORD),
            },
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_namespace_type(&mut self, parent_scope: ElementId) -> ElementId {
        self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::NamespaceType {
                base: TypeBase::new("namespace", 0, 1),
            },
        )
    }

    pub fn make_module_type(&mut self, parent_scope: ElementId) -> ElementId {
        self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::ModuleType {
                base: TypeBase::new("module", 0, 1),
            },
        )
    }

    pub fn make_unknown_type(&mut self, parent_scope: ElementId, name: &str) -> ElementId {
        self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::UnknownType {
                base: TypeBase::new(name, 0, 1),
            },
        )
    }

    pub fn make_pointer_type(&mut self, parent_scope: ElementId, base_type: ElementId) -> ElementId {
        let name = format!(
            "ptr_{}",
            self.map[base_type]
                .type_base()
                .map(|b| b.name.clone())
                .unwrap_or_else(|| "unknown".to_string())
        );
        self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::PointerType {
                base: TypeBase::new(name, MACHINE_WORD, MACHINE_WORD),
                base_type,
            },
        )
    }

    pub fn make_array_type(
        &mut self,
        parent_scope: ElementId,
        entry_type: ElementId,
        size: u64,
    ) -> ElementId {
        let entry_name = self.map[entry_type]
            .type_base()
            .map(|b| b.name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let entry_size = self.map[entry_type]
            .type_base()
            .map(|b| b.size_in_bytes)
            .unwrap_or(0);
        let entry_align = self.map[entry_type]
            .type_base()
            .map(|b| b.alignment)
            .unwrap_or(1);
        self.make(
            Some(parent_scope),
            Span::default(),
            ElementData::ArrayType {
                base: TypeBase::new(
                    format!("array_{}_{}", entry_name, size),
                    entry_size * size,
                    entry_align,
                ),
                entry_type,
                size,
            },
        )
    }

    /// Composite factories also create the inner scope block.
    pub fn make_composite_type(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        kind: CompositeKind,
        name: &str,
        is_packed: bool,
    ) -> ElementId {
        let scope = self.make_block(Some(parent_scope), false);
        let type_id = self.make(
            Some(parent_scope),
            span,
            ElementData::CompositeType(CompositeData {
                base: TypeBase::new(name, 0, 1),
                kind,
                fields: Vec::new(),
                scope,
                is_packed,
            }),
        );
        self.register_type(parent_scope, type_id);
        type_id
    }

    pub fn make_tuple_type(&mut self, parent_scope: ElementId, span: Span, name: &str) -> ElementId {
        let scope = self.make_block(Some(parent_scope), false);
        self.make(
            Some(parent_scope),
            span,
            ElementData::TupleType(CompositeData {
                base: TypeBase::new(name, 0, 1),
                kind: CompositeKind::Struct,
                fields: Vec::new(),
                scope,
                is_packed: false,
            }),
        )
    }

    pub fn make_procedure_type(&mut self, parent_scope: ElementId, span: Span, name: &str) -> ElementId {
        let scope = self.make_block(Some(parent_scope), true);
        self.make(
            Some(parent_scope),
            span,
            ElementData::ProcedureType(ProcedureData {
                base: TypeBase::new(name, MACHINE_WORD, MACHINE_WORD),
                parameters: Vec::new(),
                return_field: None,
                scope,
                is_foreign: false,
                foreign_address: None,
                instances: Vec::new(),
            }),
        )
    }

    pub fn make_proc_instance(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        procedure_type: ElementId,
        scope: ElementId,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::ProcInstance {
                procedure_type,
                scope,
            },
        )
    }

    pub fn make_type_reference(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        symbol: QualifiedSymbol,
        referenced_type: Option<ElementId>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::TypeReference {
                symbol,
                referenced_type,
                is_pointer: false,
                array_size: None,
            },
        )
    }

    pub fn make_decorated_type_reference(
        &mut self,
        parent_scope: ElementId,
        span: Span,
        symbol: QualifiedSymbol,
        is_pointer: bool,
        array_size: Option<u64>,
    ) -> ElementId {
        self.make(
            Some(parent_scope),
            span,
            ElementData::TypeReference {
                symbol,
                referenced_type: None,
                is_pointer,
                array_size,
            },
        )
    }

    // ------------------------------------------------------------------
    // graph mutation helpers; keep the ownership adjacency in sync

    pub fn append_statement(&mut self, block: ElementId, statement: ElementId) {
        if let Some(data) = self.map.get_mut(block).and_then(|e| e.as_block_mut()) {
            data.statements.push(statement);
        }
        self.map.adopt(block, statement);
    }

    pub fn append_identifier(&mut self, block: ElementId, identifier: ElementId) {
        if let Some(data) = self.map.get_mut(block).and_then(|e| e.as_block_mut()) {
            data.identifiers.push(identifier);
        }
        self.map.adopt(block, identifier);
    }

    pub fn register_type(&mut self, block: ElementId, type_id: ElementId) {
        if let Some(data) = self.map.get_mut(block).and_then(|e| e.as_block_mut()) {
            data.types.push(type_id);
        }
        self.map.adopt(block, type_id);
    }

    pub fn append_child_block(&mut self, parent: ElementId, child: ElementId) {
        if let Some(data) = self.map.get_mut(parent).and_then(|e| e.as_block_mut()) {
            data.blocks.push(child);
        }
        self.map.adopt(parent, child);
    }

    pub fn push_defer(&mut self, block: ElementId, defer: ElementId) {
        if let Some(data) = self.map.get_mut(block).and_then(|e| e.as_block_mut()) {
            data.defers.push(defer);
        }
    }

    pub fn set_with_receiver(&mut self, block: ElementId, receiver: ElementId) {
        if let Some(data) = self.map.get_mut(block).and_then(|e| e.as_block_mut()) {
            data.with_receiver = Some(receiver);
        }
    }

    pub fn add_composite_field(&mut self, composite: ElementId, field: ElementId) {
        if let Some(element) = self.map.get_mut(composite) {
            match &mut element.data {
                ElementData::CompositeType(data) | ElementData::TupleType(data) => {
                    data.fields.push(field);
                }
                _ => return,
            }
        }
        self.map.adopt(composite, field);
    }

    pub fn add_proc_parameter(&mut self, proc_type: ElementId, field: ElementId) {
        if let Some(ElementData::ProcedureType(data)) =
            self.map.get_mut(proc_type).map(|e| &mut e.data)
        {
            data.parameters.push(field);
        }
        self.map.adopt(proc_type, field);
    }

    pub fn set_proc_return(&mut self, proc_type: ElementId, field: ElementId) {
        if let Some(ElementData::ProcedureType(data)) =
            self.map.get_mut(proc_type).map(|e| &mut e.data)
        {
            data.return_field = Some(field);
        }
        self.map.adopt(proc_type, field);
    }

    pub fn add_proc_instance(&mut self, proc_type: ElementId, instance: ElementId) {
        if let Some(ElementData::ProcedureType(data)) =
            self.map.get_mut(proc_type).map(|e| &mut e.data)
        {
            data.instances.push(instance);
        }
        self.map.adopt(proc_type, instance);
    }

    pub fn set_foreign(&mut self, proc_type: ElementId, address: Option<u64>) {
        if let Some(ElementData::ProcedureType(data)) =
            self.map.get_mut(proc_type).map(|e| &mut e.data)
        {
            data.is_foreign = true;
            data.foreign_address = address;
        }
    }

    pub fn rename_type(&mut self, type_id: ElementId, name: &str) {
        if let Some(base) = self.map.get_mut(type_id).and_then(|e| e.type_base_mut()) {
            base.name = name.to_string();
        }
    }

    pub fn set_identifier_type(&mut self, identifier: ElementId, type_ref: ElementId) {
        if let Some(data) = self.map.get_mut(identifier).and_then(|e| e.as_identifier_mut()) {
            data.type_ref = Some(type_ref);
            data.inferred_type = false;
        }
    }

    pub fn bind_reference(&mut self, reference: ElementId, identifier: ElementId) {
        if let Some(ElementData::IdentifierReference {
            identifier: slot, ..
        }) = self.map.get_mut(reference).map(|e| &mut e.data)
        {
            *slot = Some(identifier);
        }
    }

    pub fn bind_type_reference(&mut self, reference: ElementId, type_id: ElementId) {
        if let Some(ElementData::TypeReference {
            referenced_type, ..
        }) = self.map.get_mut(reference).map(|e| &mut e.data)
        {
            *referenced_type = Some(type_id);
        }
    }

    /// Replace `old` with `new` wherever `parent`'s payload references it,
    /// then fix the adjacency. Used by constant folding.
    pub fn replace_child(&mut self, parent: ElementId, old: ElementId, new: ElementId) {
        if let Some(element) = self.map.get_mut(parent) {
            replace_in_data(&mut element.data, old, new);
        }
        self.map.replace_owned(parent, old, new);
    }
}

fn replace_in_data(data: &mut ElementData, old: ElementId, new: ElementId) {
    let swap = |slot: &mut ElementId| {
        if *slot == old {
            *slot = new;
        }
    };
    let swap_opt = |slot: &mut Option<ElementId>| {
        if *slot == Some(old) {
            *slot = Some(new);
        }
    };
    let swap_list = |list: &mut Vec<ElementId>| {
        for slot in list.iter_mut() {
            if *slot == old {
                *slot = new;
            }
        }
    };
    match data {
        ElementData::Block(block) => {
            swap_list(&mut block.statements);
            swap_list(&mut block.defers);
        }
        ElementData::Statement { expression, .. } => swap_opt(expression),
        ElementData::Expression { root } => swap(root),
        ElementData::Initializer { expression } => swap_opt(expression),
        ElementData::Identifier(ident) => swap_opt(&mut ident.initializer),
        ElementData::Declaration { assignment, .. } => swap_opt(assignment),
        ElementData::BinaryOperator { lhs, rhs, .. } => {
            swap(lhs);
            swap(rhs);
        }
        ElementData::UnaryOperator { operand, .. } => swap(operand),
        ElementData::If {
            predicate,
            true_branch,
            false_branch,
        } => {
            swap(predicate);
            swap(true_branch);
            swap_opt(false_branch);
        }
        ElementData::While { predicate, body } => {
            swap(predicate);
            swap(body);
        }
        ElementData::For {
            induction,
            expression,
            body,
        } => {
            swap(induction);
            swap(expression);
            swap(body);
        }
        ElementData::Switch { expression, .. } => swap(expression),
        ElementData::Case { expression, .. } => {
            if let Some(slot) = expression {
                swap(slot);
            }
        }
        ElementData::Return { expressions } => swap_list(expressions),
        ElementData::Defer { expression } => swap(expression),
        ElementData::With { expression, .. } => swap(expression),
        ElementData::Cast { expression, .. } => swap(expression),
        ElementData::Transmute { expression, .. } => swap(expression),
        ElementData::ProcCall { arguments, .. } => swap(arguments),
        ElementData::ArgumentList { elements } => swap_list(elements),
        ElementData::ArgumentPair { value, .. } => swap(value),
        ElementData::Intrinsic { arguments, .. } => swap(arguments),
        ElementData::Directive(directive) => match directive {
            DirectiveData::Assembly { raw_block } => swap(raw_block),
            DirectiveData::Run { expression } => swap(expression),
            DirectiveData::If {
                condition,
                true_body,
                false_body,
            } => {
                swap(condition);
                swap(true_body);
                swap_opt(false_body);
            }
            DirectiveData::Type { expression } => swap(expression),
            DirectiveData::Foreign { expression } => swap(expression),
        },
        ElementData::Attribute { expression, .. } => swap_opt(expression),
        _ => {}
    }
}

/// The built-in types created once at session start, addressed by id.
#[derive(Clone, Debug, Default)]
pub struct CoreTypes {
    pub numerics: Vec<(String, ElementId)>,
    pub bool_type: ElementId,
    pub rune_type: ElementId,
    pub string_type: ElementId,
    pub any_type: ElementId,
    pub namespace_type: ElementId,
    pub module_type: ElementId,
}

impl CoreTypes {
    pub fn initialize(builder: &mut ElementBuilder, root_block: ElementId) -> Self {
        let mut numerics = Vec::new();
        for props in super::types::NUMERIC_TYPES {
            let id = builder.make_numeric_type(root_block, props);
            numerics.push((props.name.to_string(), id));
        }
        Self {
            numerics,
            bool_type: builder.make_bool_type(root_block),
            rune_type: builder.make_rune_type(root_block),
            string_type: builder.make_string_type(root_block),
            any_type: builder.make_any_type(root_block),
            namespace_type: builder.make_namespace_type(root_block),
            module_type: builder.make_module_type(root_block),
        }
    }

    pub fn numeric(&self, name: &str) -> Option<ElementId> {
        self.numerics
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn void(&self) -> Option<ElementId> {
        self.numeric("u0")
    }

    pub fn narrowest_integer(&self, value: i128) -> Option<ElementId> {
        self.numeric(super::types::narrow_to_integer(value))
    }

    pub fn narrowest_float(&self, value: f64) -> Option<ElementId> {
        self.numeric(super::types::narrow_to_float(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::element::ElementKind;

    #[test]
    fn pointer_types_are_auto_named() {
        let mut builder = ElementBuilder::default();
        let program = builder.make_program();
        let root = match &builder.elements()[program].data {
            ElementData::Program { block, .. } => *block,
            _ => unreachable!(),
        };
        let core = CoreTypes::initialize(&mut builder, root);
        let u8_type = core.numeric("u8").expect("u8");
        let ptr = builder.make_pointer_type(root, u8_type);
        let base = builder.elements()[ptr].type_base().expect("base");
        assert_eq!(base.name, "ptr_u8");
        assert_eq!(base.size_in_bytes, MACHINE_WORD);
    }

    #[test]
    fn composite_factory_creates_inner_scope() {
        let mut builder = ElementBuilder::default();
        let program = builder.make_program();
        let root = match &builder.elements()[program].data {
            ElementData::Program { block, .. } => *block,
            _ => unreachable!(),
        };
        let composite =
            builder.make_composite_type(root, Span::default(), CompositeKind::Struct, "point", false);
        let data = builder.elements()[composite].as_composite().expect("data");
        assert_eq!(builder.elements()[data.scope].kind(), ElementKind::Block);
    }

    #[test]
    fn core_types_cover_every_builtin() {
        let mut builder = ElementBuilder::default();
        let program = builder.make_program();
        let root = match &builder.elements()[program].data {
            ElementData::Program { block, .. } => *block,
            _ => unreachable!(),
        };
        let core = CoreTypes::initialize(&mut builder, root);
        for name in ["u0", "u8", "u16", "u32", "u64", "s8", "s16", "s32", "s64", "f32", "f64"] {
            assert!(core.numeric(name).is_some(), "missing {}", name);
        }
        assert_ne!(core.bool_type, core.rune_type);
    }
}
