// Purpose: Lower resolved elements into labeled basic blocks of VM instructions.
// Inputs/Outputs: Consumes the element graph read-only and appends blocks/entries to the assembler.
// Invariants: Each emission rule returns its result operands; callers decide where values land.
// Gotchas: Temporaries are scoped to the statement being emitted and released on every exit path.

use std::collections::HashMap;

use crate::abi;
use crate::frontend::ast::Span;
use crate::frontend::diagnostic::{
    Diagnostics, P_INVALID_BREAK_CONTINUE, P_MISSING_VARIABLE, P_REGISTER_EXHAUSTED,
    X_UNSUPPORTED,
};
use crate::sema::builder::CoreTypes;
use crate::sema::element::{
    BinaryOp, DirectiveData, ElementData, ElementId, ElementKind, ElementMap, NumberClass,
    UnaryOp,
};
use crate::sema::fold;
use crate::sema::infer::TypeInference;
use crate::sema::intern::StringInternMap;
use crate::sema::scope::ScopeManager;
use crate::sema::types::{self, concrete_type};
use crate::vm::assembler::{Assembler, BasicBlock, BlockId};
use crate::vm::ffi::{CallSignature, Ffi, FfiArgument};
use crate::vm::{NamedRefKind, OpCode, OpSize, Operand};

/// Result of one emission rule. One operand is a value; two operands are an
/// `(address, offset)` pair produced by member access and consumed by loads
/// and stores downstream.
#[derive(Debug, Default)]
pub(crate) struct EmitResult {
    pub operands: Vec<Operand>,
    pub type_id: Option<ElementId>,
}

impl EmitResult {
    fn value(operand: Operand, type_id: Option<ElementId>) -> Self {
        Self {
            operands: vec![operand],
            type_id,
        }
    }

    fn pair(address: Operand, offset: i64, type_id: Option<ElementId>) -> Self {
        Self {
            operands: vec![address, Operand::imm(offset as u64, OpSize::Qword)],
            type_id,
        }
    }

    fn none() -> Self {
        Self::default()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlowKind {
    Loop,
    Switch,
}

/// Active control-flow frame: where `break`/`continue` jump, and the label
/// the next case's body carries for `fallthrough`.
struct FlowFrame {
    kind: FlowKind,
    exit_label: String,
    continue_label: Option<String>,
    statement_labels: Vec<String>,
    /// Blocks that jumped to the exit/continue label before the target
    /// block existed; wired into the CFG when the frame closes.
    break_sources: Vec<BlockId>,
    continue_sources: Vec<BlockId>,
}

impl FlowFrame {
    fn new(
        kind: FlowKind,
        exit_label: String,
        continue_label: Option<String>,
        statement_labels: Vec<String>,
    ) -> Self {
        Self {
            kind,
            exit_label,
            continue_label,
            statement_labels,
            break_sources: Vec::new(),
            continue_sources: Vec::new(),
        }
    }
}

struct FrameLocal {
    offset: i64,
    size: OpSize,
}

/// Per-procedure frame bookkeeping: named locals at negative fp offsets and
/// the statement-scoped temporary pool.
struct FrameInfo {
    locals: HashMap<String, FrameLocal>,
    next_local_offset: i64,
    temp_next: usize,
    proc_type: Option<ElementId>,
}

impl FrameInfo {
    fn new(proc_type: Option<ElementId>) -> Self {
        Self {
            locals: HashMap::new(),
            next_local_offset: 0,
            temp_next: 0,
            proc_type,
        }
    }
}

pub(crate) struct ByteCodeEmitter<'a> {
    pub(crate) elements: &'a ElementMap,
    pub(crate) scopes: &'a ScopeManager,
    pub(crate) core: &'a CoreTypes,
    pub(crate) interns: &'a mut StringInternMap,
    pub(crate) result: &'a mut Diagnostics,
    pub(crate) ffi: &'a mut Ffi,
    pub(crate) asm: &'a mut Assembler,
    pub(crate) current: BlockId,
    frames: Vec<FrameInfo>,
    flow: Vec<FlowFrame>,
    /// Element blocks currently being emitted, innermost last; drives defer
    /// replay on early returns.
    block_stack: Vec<ElementId>,
    pending_labels: Vec<String>,
    max_temporaries: usize,
}

impl<'a> ByteCodeEmitter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        elements: &'a ElementMap,
        scopes: &'a ScopeManager,
        core: &'a CoreTypes,
        interns: &'a mut StringInternMap,
        result: &'a mut Diagnostics,
        ffi: &'a mut Ffi,
        asm: &'a mut Assembler,
        max_temporaries: usize,
    ) -> Self {
        let current = asm.make_basic_block();
        Self {
            elements,
            scopes,
            core,
            interns,
            result,
            ffi,
            asm,
            current,
            frames: Vec::new(),
            flow: Vec::new(),
            block_stack: Vec::new(),
            pending_labels: Vec::new(),
            max_temporaries,
        }
    }

    // ------------------------------------------------------------------
    // plumbing

    pub(crate) fn block(&mut self) -> &mut BasicBlock {
        self.asm.block_mut(self.current)
    }

    fn new_block(&mut self) -> BlockId {
        self.asm.make_basic_block()
    }

    fn error(&mut self, code: &str, message: String, span: Span) {
        self.result.error(code, message, Some(span));
    }

    fn span_of(&self, id: ElementId) -> Span {
        self.elements[id].span.clone()
    }

    fn infer(&self, id: ElementId) -> Option<ElementId> {
        let inference = TypeInference {
            map: self.elements,
            scopes: self.scopes,
            core: self.core,
        };
        inference.infer(id)
    }

    fn op_size_of(&self, type_id: Option<ElementId>) -> OpSize {
        type_id
            .map(|t| OpSize::from_byte_size(types::size_of(self.elements, t)))
            .unwrap_or(OpSize::Qword)
    }

    fn frame(&mut self) -> &mut FrameInfo {
        if self.frames.is_empty() {
            self.frames.push(FrameInfo::new(None));
        }
        self.frames.last_mut().expect("frame stack")
    }

    pub(crate) fn push_frame(&mut self, proc_type: Option<ElementId>) {
        self.frames.push(FrameInfo::new(proc_type));
    }

    pub(crate) fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Bytes of frame storage the emitted code needs below `fp`.
    pub(crate) fn frame_reserve_size(&mut self) -> u64 {
        (-self.frame().next_local_offset).max(0) as u64
    }

    /// Register a parameter at its caller-assigned positive offset.
    pub(crate) fn register_param(&mut self, name: &str, offset: i64, byte_size: u64) {
        let size = OpSize::from_byte_size(byte_size);
        self.frame().locals.insert(
            name.to_string(),
            FrameLocal { offset, size },
        );
        self.asm.block_mut(self.current).local(name, offset, size);
    }

    pub(crate) fn local_value(&self, name: &str, size: OpSize) -> Operand {
        self.local_value_operand(name, size)
    }

    pub(crate) fn register_local(&mut self, name: &str, byte_size: u64) -> i64 {
        let slot = abi::aligned_slot_size(byte_size.max(1));
        let frame = self.frame();
        if let Some(existing) = frame.locals.get(name) {
            return existing.offset;
        }
        frame.next_local_offset -= slot as i64;
        let offset = frame.next_local_offset;
        frame.locals.insert(
            name.to_string(),
            FrameLocal {
                offset,
                size: OpSize::from_byte_size(byte_size),
            },
        );
        self.asm
            .block_mut(self.current)
            .local(name, offset, OpSize::from_byte_size(byte_size));
        offset
    }

    fn temp_mark(&mut self) -> usize {
        self.frame().temp_next
    }

    fn temp_release(&mut self, mark: usize) {
        self.frame().temp_next = mark;
    }

    fn alloc_temp(&mut self, size: OpSize, span: &Span) -> Result<Operand, ()> {
        let index = self.frame().temp_next;
        if index >= self.max_temporaries {
            self.error(
                P_REGISTER_EXHAUSTED,
                format!("out of temporaries (limit {})", self.max_temporaries),
                span.clone(),
            );
            return Err(());
        }
        self.frame().temp_next = index + 1;
        let name = format!("t{}", index);
        self.register_local(&name, size.byte_size());
        Ok(self.asm.local_operand(name, size))
    }

    fn label_operand(&mut self, name: &str) -> Operand {
        self.asm.label_operand(name)
    }

    fn local_value_operand(&self, name: &str, size: OpSize) -> Operand {
        Operand::named(self.asm.make_named_ref(NamedRefKind::Local, name, size))
    }

    fn local_address_operand(&self, name: &str) -> Operand {
        Operand::named(self.asm.make_named_ref(NamedRefKind::Offset, name, OpSize::Qword))
    }

    // ------------------------------------------------------------------
    // statements and blocks

    /// Emit every statement of an element block, then replay its deferred
    /// expressions in LIFO order unless a statement already left the frame.
    pub(crate) fn emit_scope_block(&mut self, block_element: ElementId) -> Result<bool, ()> {
        let Some(block_data) = self.elements[block_element].as_block() else {
            return Ok(false);
        };
        let statements = block_data.statements.clone();
        self.block_stack.push(block_element);

        let mut terminated = false;
        for statement in statements {
            if terminated {
                break;
            }
            terminated = self.emit_statement(statement)?;
        }
        if !terminated {
            self.emit_block_defers(block_element)?;
        }
        self.block_stack.pop();
        Ok(terminated)
    }

    fn emit_block_defers(&mut self, block_element: ElementId) -> Result<(), ()> {
        let defers: Vec<ElementId> = self.elements[block_element]
            .as_block()
            .map(|b| b.defers.clone())
            .unwrap_or_default();
        for defer in defers.into_iter().rev() {
            if let ElementData::Defer { expression } = &self.elements[defer].data {
                let expression = *expression;
                let mark = self.temp_mark();
                let outcome = self.emit_element(expression);
                self.temp_release(mark);
                outcome?;
            }
        }
        Ok(())
    }

    /// Returns true when the statement terminated the current path.
    fn emit_statement(&mut self, statement: ElementId) -> Result<bool, ()> {
        let (labels, expression) = match &self.elements[statement].data {
            ElementData::Statement { labels, expression } => (labels.clone(), *expression),
            _ => (Vec::new(), Some(statement)),
        };
        let Some(expression) = expression else {
            return Ok(false);
        };

        let kind = self.elements[expression].kind();
        if matches!(
            kind,
            ElementKind::Comment
                | ElementKind::Attribute
                | ElementKind::Defer
        ) {
            return Ok(false);
        }
        // Module-scope declarations get their storage from the section
        // tables; only frame-local declarations emit here.
        if kind == ElementKind::Declaration {
            return self.emit_declaration(expression).map(|_| false);
        }

        self.pending_labels = labels;
        let mark = self.temp_mark();
        let outcome = self.emit_element(expression);
        self.temp_release(mark);
        self.pending_labels.clear();
        outcome?;

        Ok(matches!(
            kind,
            ElementKind::Return | ElementKind::Break | ElementKind::Continue
        ))
    }

    fn emit_declaration(&mut self, declaration: ElementId) -> Result<(), ()> {
        let identifier = match &self.elements[declaration].data {
            ElementData::Declaration { identifier, .. } => *identifier,
            _ => return Ok(()),
        };
        let Some(data) = self.elements[identifier].as_identifier() else {
            return Ok(());
        };
        let scope = self.elements[identifier].parent_scope.unwrap_or_default();
        if !self.scopes.within_local_scope(self.elements, scope) {
            return Ok(());
        }
        let type_id = data.type_ref.and_then(|t| concrete_type(self.elements, t));
        if type_id
            .map(|t| {
                matches!(
                    self.elements[t].kind(),
                    ElementKind::ProcedureType
                        | ElementKind::NamespaceType
                        | ElementKind::ModuleType
                )
            })
            .unwrap_or(true)
        {
            return Ok(());
        }
        let name = data.symbol.name.clone();
        let initializer = data.initializer;
        let size = type_id
            .map(|t| types::size_of(self.elements, t))
            .unwrap_or(abi::WORD_SIZE);
        self.register_local(&name, size);

        let Some(initializer) = initializer else {
            return Ok(());
        };
        let uninitialized = matches!(
            &self.elements[initializer].data,
            ElementData::Initializer { expression: Some(e) }
                if self.elements[*e].kind() == ElementKind::UninitializedLiteral
        );
        if uninitialized {
            return Ok(());
        }

        let mark = self.temp_mark();
        let outcome = (|| {
            let (value, value_type) = self.emit_value(initializer)?;
            if types::is_composite_type(self.elements, value_type.unwrap_or(usize::MAX)) {
                let dest = self.local_address_operand(&name);
                let length = value_type
                    .map(|t| types::size_of(self.elements, t))
                    .unwrap_or(0);
                self.block().copy(dest, value, length);
            } else {
                let op_size = self.op_size_of(type_id);
                let dest = self.local_value_operand(&name, op_size);
                self.block().move_op(op_size, dest, value);
            }
            Ok(())
        })();
        self.temp_release(mark);
        outcome
    }

    // ------------------------------------------------------------------
    // expression dispatch

    pub(crate) fn emit_element(&mut self, id: ElementId) -> Result<EmitResult, ()> {
        match &self.elements[id].data {
            ElementData::Expression { root } => {
                let root = *root;
                self.emit_element(root)
            }
            ElementData::Initializer { expression } => match expression {
                Some(expression) => {
                    let expression = *expression;
                    self.emit_element(expression)
                }
                None => Ok(EmitResult::none()),
            },
            ElementData::IntegerLiteral { value } => {
                let type_id = self.infer(id);
                let size = self.op_size_of(type_id);
                Ok(EmitResult::value(
                    Operand::imm(*value as i64 as u64, size),
                    type_id,
                ))
            }
            ElementData::FloatLiteral { value } => {
                let type_id = self.infer(id);
                let size = self.op_size_of(type_id);
                Ok(EmitResult::value(
                    Operand::FloatImm {
                        value: *value,
                        size,
                    },
                    type_id,
                ))
            }
            ElementData::BooleanLiteral { value } => Ok(EmitResult::value(
                Operand::imm(*value as u64, OpSize::Byte),
                Some(self.core.bool_type),
            )),
            ElementData::CharacterLiteral { rune } => Ok(EmitResult::value(
                Operand::imm(*rune as u64, OpSize::Dword),
                Some(self.core.rune_type),
            )),
            ElementData::NilLiteral => Ok(EmitResult::value(
                Operand::imm(0, OpSize::Qword),
                self.infer(id),
            )),
            ElementData::UninitializedLiteral => Ok(EmitResult::none()),
            ElementData::StringLiteral { .. } => {
                let type_id = self.infer(id);
                match self.interns.element_id_to_intern_id(id) {
                    Some(intern_id) => {
                        let label = StringInternMap::data_label(intern_id);
                        let operand = self.label_operand(&label);
                        Ok(EmitResult::value(operand, type_id))
                    }
                    None => {
                        let span = self.span_of(id);
                        self.error(
                            P_MISSING_VARIABLE,
                            "string literal was never interned".to_string(),
                            span,
                        );
                        Err(())
                    }
                }
            }
            ElementData::IdentifierReference { .. } | ElementData::Identifier(_) => {
                let (operand, type_id) = self.emit_value(id)?;
                Ok(EmitResult::value(operand, type_id))
            }
            ElementData::UnaryOperator { .. } => self.emit_unary(id),
            ElementData::BinaryOperator { op, .. } => {
                let op = *op;
                self.emit_binary(id, op)
            }
            ElementData::Cast { .. } => self.emit_cast(id, false),
            ElementData::Transmute { .. } => self.emit_cast(id, true),
            ElementData::If { .. } => self.emit_if(id).map(|_| EmitResult::none()),
            ElementData::While { .. } => self.emit_while(id).map(|_| EmitResult::none()),
            ElementData::For { .. } => self.emit_for(id).map(|_| EmitResult::none()),
            ElementData::Switch { .. } => self.emit_switch(id).map(|_| EmitResult::none()),
            ElementData::Break { label } => {
                let label = label.clone();
                self.emit_break_continue(id, label, true)
                    .map(|_| EmitResult::none())
            }
            ElementData::Continue { label } => {
                let label = label.clone();
                self.emit_break_continue(id, label, false)
                    .map(|_| EmitResult::none())
            }
            ElementData::Return { .. } => self.emit_return(id).map(|_| EmitResult::none()),
            ElementData::With { body, .. } => {
                let body = *body;
                self.emit_scope_block(body)?;
                Ok(EmitResult::none())
            }
            ElementData::Block(_) => {
                self.emit_scope_block(id)?;
                Ok(EmitResult::none())
            }
            ElementData::ProcCall { .. } => self.emit_proc_call(id),
            ElementData::Intrinsic { .. } => self.emit_intrinsic(id),
            ElementData::Directive(directive) => {
                let directive = directive.clone();
                self.emit_directive(id, &directive)
            }
            ElementData::RawBlock { source } => {
                let source = source.clone();
                self.asm.assemble_from_source(self.current, &source);
                Ok(EmitResult::none())
            }
            ElementData::Statement { .. } => {
                self.emit_statement(id)?;
                Ok(EmitResult::none())
            }
            ElementData::Fallthrough => Ok(EmitResult::none()),
            ElementData::Comment { .. } | ElementData::Attribute { .. } => Ok(EmitResult::none()),
            _ => {
                let span = self.span_of(id);
                let kind = self.elements[id].kind();
                self.error(
                    X_UNSUPPORTED,
                    format!("cannot emit element kind {:?}", kind),
                    span,
                );
                Err(())
            }
        }
    }

    /// Emit an expression and collapse address/offset pairs into a loaded
    /// scalar (composites keep their address).
    fn emit_value(&mut self, id: ElementId) -> Result<(Operand, Option<ElementId>), ()> {
        match &self.elements[id].data {
            ElementData::IdentifierReference { identifier, .. } => match identifier {
                Some(identifier) => {
                    let identifier = *identifier;
                    self.emit_identifier_value(id, identifier)
                }
                None => {
                    let span = self.span_of(id);
                    self.error(
                        P_MISSING_VARIABLE,
                        "reference was never resolved".to_string(),
                        span,
                    );
                    Err(())
                }
            },
            ElementData::Identifier(_) => self.emit_identifier_value(id, id),
            _ => {
                let result = self.emit_element(id)?;
                self.collapse(result, id)
            }
        }
    }

    fn collapse(
        &mut self,
        result: EmitResult,
        origin: ElementId,
    ) -> Result<(Operand, Option<ElementId>), ()> {
        let span = self.span_of(origin);
        match result.operands.len() {
            1 => {
                let mut operands = result.operands;
                Ok((operands.remove(0), result.type_id))
            }
            2 => {
                let type_id = result.type_id;
                if types::is_composite_type(self.elements, type_id.unwrap_or(usize::MAX)) {
                    // Composite values travel as addresses.
                    let combined = self.combine_pair(&result.operands)?;
                    return Ok((combined, type_id));
                }
                let size = self.op_size_of(type_id);
                let temp = self.alloc_temp(size, &span)?;
                let address = result.operands[0].clone();
                let offset = match &result.operands[1] {
                    Operand::Imm { value, .. } => *value as i64,
                    _ => 0,
                };
                self.block()
                    .load(size, temp.clone(), address, offset);
                Ok((temp, type_id))
            }
            _ => {
                self.error(
                    X_UNSUPPORTED,
                    "expression produced no value".to_string(),
                    span,
                );
                Err(())
            }
        }
    }

    /// Fold an (address, offset) pair into one address operand.
    fn combine_pair(&mut self, operands: &[Operand]) -> Result<Operand, ()> {
        let offset = match operands.get(1) {
            Some(Operand::Imm { value, .. }) => *value as i64,
            _ => 0,
        };
        match operands.first() {
            Some(Operand::Named { reference, offset: base }) => {
                Ok(Operand::named_with_offset(reference.clone(), base + offset))
            }
            Some(other) => Ok(other.clone()),
            None => Err(()),
        }
    }

    fn emit_identifier_value(
        &mut self,
        origin: ElementId,
        identifier: ElementId,
    ) -> Result<(Operand, Option<ElementId>), ()> {
        let Some(data) = self.elements[identifier].as_identifier() else {
            return Err(());
        };
        let name = data.symbol.name.clone();
        let type_id = data.type_ref.and_then(|t| concrete_type(self.elements, t));
        let span = self.span_of(origin);

        // Procedure identifiers evaluate to their instance entry label.
        if let Some(type_id) = type_id {
            if let Some(proc) = self.elements[type_id].as_procedure() {
                if let Some(&instance) = proc.instances.first() {
                    let label = self.elements[instance].label_name();
                    let operand = self.label_operand(&label);
                    return Ok((operand, Some(type_id)));
                }
            }
        }

        // Field identifier reached through a `with` binding.
        if self.is_field_identifier(identifier) {
            let (address, offset, _) = self.with_receiver_address(origin, identifier)?;
            let size = self.op_size_of(type_id);
            let temp = self.alloc_temp(size, &span)?;
            self.block().load(size, temp.clone(), address, offset);
            return Ok((temp, type_id));
        }

        let scope = self.elements[identifier].parent_scope.unwrap_or_default();
        if self.scopes.within_local_scope(self.elements, scope) {
            let size = self.op_size_of(type_id);
            if types::is_composite_type(self.elements, type_id.unwrap_or(usize::MAX)) {
                return Ok((self.local_address_operand(&name), type_id));
            }
            return Ok((self.local_value_operand(&name, size), type_id));
        }

        // Module-scope storage: address by label, scalars load to a temp.
        let label = self.elements[identifier].label_name();
        let address = self.label_operand(&label);
        if types::is_composite_type(self.elements, type_id.unwrap_or(usize::MAX)) {
            return Ok((address, type_id));
        }
        let size = self.op_size_of(type_id);
        let temp = self.alloc_temp(size, &span)?;
        self.block().load(size, temp.clone(), address, 0);
        Ok((temp, type_id))
    }

    fn is_field_identifier(&self, identifier: ElementId) -> bool {
        self.elements[identifier]
            .parent_element
            .and_then(|p| self.elements.get(p))
            .map(|p| p.kind() == ElementKind::Field)
            .unwrap_or(false)
    }

    fn with_receiver_address(
        &mut self,
        origin: ElementId,
        field_identifier: ElementId,
    ) -> Result<(Operand, i64, Option<ElementId>), ()> {
        let span = self.span_of(origin);
        let scope = self.elements[origin].parent_scope.unwrap_or_default();
        let Some(receiver) = self.scopes.find_with_receiver(self.elements, scope) else {
            self.error(
                P_MISSING_VARIABLE,
                "field reference outside of a with binding".to_string(),
                span,
            );
            return Err(());
        };
        let (address, offset, receiver_type) = self.emit_address(receiver)?;
        let mut base_type = receiver_type;
        let mut address = address;
        let mut offset = offset;
        if let Some(t) = receiver_type {
            if types::is_pointer_type(self.elements, t) {
                let temp = self.alloc_temp(OpSize::Qword, &span)?;
                self.block()
                    .load(OpSize::Qword, temp.clone(), address, offset);
                address = temp;
                offset = 0;
                base_type = types::pointer_base(self.elements, t);
            }
        }
        let field_offset = self.field_offset_by_identifier(base_type, field_identifier);
        let field_type = self.elements[field_identifier]
            .as_identifier()
            .and_then(|d| d.type_ref)
            .and_then(|t| concrete_type(self.elements, t));
        Ok((address, offset + field_offset, field_type))
    }

    fn field_offset_by_identifier(
        &self,
        composite: Option<ElementId>,
        field_identifier: ElementId,
    ) -> i64 {
        let Some(composite) = composite else {
            return 0;
        };
        let Some(data) = self.elements[composite].as_composite() else {
            return 0;
        };
        for &field in &data.fields {
            if let ElementData::Field { identifier, offset } = &self.elements[field].data {
                if *identifier == field_identifier {
                    return *offset as i64;
                }
            }
        }
        0
    }

    /// Evaluate an lvalue down to `(address, offset, type)`.
    fn emit_address(&mut self, id: ElementId) -> Result<(Operand, i64, Option<ElementId>), ()> {
        let span = self.span_of(id);
        match &self.elements[id].data {
            ElementData::Expression { root } => {
                let root = *root;
                self.emit_address(root)
            }
            ElementData::IdentifierReference { identifier, .. } => {
                let Some(identifier) = *identifier else {
                    self.error(
                        P_MISSING_VARIABLE,
                        "reference was never resolved".to_string(),
                        span,
                    );
                    return Err(());
                };
                self.emit_identifier_address(id, identifier)
            }
            ElementData::Identifier(_) => self.emit_identifier_address(id, id),
            ElementData::BinaryOperator {
                op: BinaryOp::MemberAccess,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                self.emit_member_address(id, lhs, rhs)
            }
            ElementData::BinaryOperator {
                op: BinaryOp::Subscript,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                self.emit_subscript_address(id, lhs, rhs)
            }
            ElementData::UnaryOperator {
                op: UnaryOp::Dereference,
                operand,
            } => {
                let operand = *operand;
                let (value, pointer_type) = self.emit_value(operand)?;
                let base = pointer_type.and_then(|t| types::pointer_base(self.elements, t));
                Ok((value, 0, base))
            }
            _ => {
                self.error(
                    X_UNSUPPORTED,
                    "expression is not addressable".to_string(),
                    span,
                );
                Err(())
            }
        }
    }

    fn emit_identifier_address(
        &mut self,
        origin: ElementId,
        identifier: ElementId,
    ) -> Result<(Operand, i64, Option<ElementId>), ()> {
        let Some(data) = self.elements[identifier].as_identifier() else {
            return Err(());
        };
        let name = data.symbol.name.clone();
        let type_id = data.type_ref.and_then(|t| concrete_type(self.elements, t));

        if self.is_field_identifier(identifier) {
            return self.with_receiver_address(origin, identifier);
        }

        let scope = self.elements[identifier].parent_scope.unwrap_or_default();
        if self.scopes.within_local_scope(self.elements, scope) {
            return Ok((self.local_address_operand(&name), 0, type_id));
        }
        let label = self.elements[identifier].label_name();
        Ok((self.label_operand(&label), 0, type_id))
    }

    /// Member access per the address/offset pair protocol: pointer bases
    /// step once to the pointee before the field offset applies.
    fn emit_member_address(
        &mut self,
        origin: ElementId,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Result<(Operand, i64, Option<ElementId>), ()> {
        let span = self.span_of(origin);
        let (mut address, mut offset, lhs_type) = self.emit_address(lhs)?;
        let mut base_type = lhs_type;
        if let Some(t) = lhs_type {
            if types::is_pointer_type(self.elements, t) {
                let temp = self.alloc_temp(OpSize::Qword, &span)?;
                self.block()
                    .load(OpSize::Qword, temp.clone(), address, offset);
                address = temp;
                offset = 0;
                base_type = types::pointer_base(self.elements, t);
            }
        }

        let field_identifier = match &self.elements[rhs].data {
            ElementData::IdentifierReference {
                identifier: Some(identifier),
                ..
            } => *identifier,
            _ => {
                self.error(
                    P_MISSING_VARIABLE,
                    "member reference was never resolved".to_string(),
                    span,
                );
                return Err(());
            }
        };
        let field_offset = self.field_offset_by_identifier(base_type, field_identifier);
        let field_type = self.elements[field_identifier]
            .as_identifier()
            .and_then(|d| d.type_ref)
            .and_then(|t| concrete_type(self.elements, t));
        Ok((address, offset + field_offset, field_type))
    }

    fn emit_subscript_address(
        &mut self,
        origin: ElementId,
        lhs: ElementId,
        rhs: ElementId,
    ) -> Result<(Operand, i64, Option<ElementId>), ()> {
        let span = self.span_of(origin);
        let (address, offset, lhs_type) = self.emit_address(lhs)?;
        let entry_type = lhs_type.and_then(|t| {
            types::array_entry(self.elements, t).or_else(|| types::pointer_base(self.elements, t))
        });
        let entry_size = entry_type
            .map(|t| types::size_of(self.elements, t))
            .unwrap_or(1)
            .max(1);

        if let Some(index) = fold::constant_integer(self.elements, rhs) {
            return Ok((address, offset + index as i64 * entry_size as i64, entry_type));
        }

        let (index, _) = self.emit_value(rhs)?;
        let scaled = self.alloc_temp(OpSize::Qword, &span)?;
        self.block().op(
            OpCode::Mul,
            OpSize::Qword,
            vec![
                scaled.clone(),
                index,
                Operand::imm(entry_size, OpSize::Qword),
            ],
        );
        let combined = self.alloc_temp(OpSize::Qword, &span)?;
        self.block().op(
            OpCode::Add,
            OpSize::Qword,
            vec![combined.clone(), address, scaled],
        );
        Ok((combined, offset, entry_type))
    }

    // ------------------------------------------------------------------
    // operators

    fn emit_binary(&mut self, id: ElementId, op: BinaryOp) -> Result<EmitResult, ()> {
        match op {
            BinaryOp::Assignment => self.emit_assignment(id),
            BinaryOp::MemberAccess => {
                let (lhs, rhs) = match &self.elements[id].data {
                    ElementData::BinaryOperator { lhs, rhs, .. } => (*lhs, *rhs),
                    _ => return Err(()),
                };
                let (address, offset, field_type) = self.emit_member_address(id, lhs, rhs)?;
                Ok(EmitResult::pair(address, offset, field_type))
            }
            BinaryOp::Subscript => {
                let (lhs, rhs) = match &self.elements[id].data {
                    ElementData::BinaryOperator { lhs, rhs, .. } => (*lhs, *rhs),
                    _ => return Err(()),
                };
                let (address, offset, entry_type) = self.emit_subscript_address(id, lhs, rhs)?;
                Ok(EmitResult::pair(address, offset, entry_type))
            }
            _ if op.is_relational() => {
                let span = self.span_of(id);
                let target = self.alloc_temp(OpSize::Byte, &span)?;
                self.block().clr(OpSize::Byte, target.clone());
                self.emit_relational_into(id, target.clone())?;
                Ok(EmitResult::value(target, Some(self.core.bool_type)))
            }
            _ => self.emit_arithmetic(id, op),
        }
    }

    /// One three-operand instruction into a fresh temporary of the
    /// expression's inferred type.
    fn emit_arithmetic(&mut self, id: ElementId, op: BinaryOp) -> Result<EmitResult, ()> {
        let (lhs, rhs) = match &self.elements[id].data {
            ElementData::BinaryOperator { lhs, rhs, .. } => (*lhs, *rhs),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let (lhs_operand, _) = self.emit_value(lhs)?;
        let (rhs_operand, _) = self.emit_value(rhs)?;
        let type_id = self.infer(id);
        let size = self.op_size_of(type_id);
        let dest = self.alloc_temp(size, &span)?;

        let opcode = match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Subtract => OpCode::Sub,
            BinaryOp::Multiply => OpCode::Mul,
            BinaryOp::Divide => OpCode::Div,
            BinaryOp::Modulo => OpCode::Mod,
            BinaryOp::Exponent => OpCode::Pow,
            BinaryOp::BinaryOr => OpCode::Or,
            BinaryOp::BinaryAnd => OpCode::And,
            BinaryOp::BinaryXor => OpCode::Xor,
            BinaryOp::ShiftLeft => OpCode::Shl,
            BinaryOp::ShiftRight => OpCode::Shr,
            BinaryOp::RotateLeft => OpCode::Rol,
            BinaryOp::RotateRight => OpCode::Ror,
            _ => {
                self.error(
                    X_UNSUPPORTED,
                    format!("operator {:?} is not arithmetic", op),
                    span,
                );
                return Err(());
            }
        };
        self.block()
            .op(opcode, size, vec![dest.clone(), lhs_operand, rhs_operand]);
        Ok(EmitResult::value(dest, type_id))
    }

    /// Relational and short-circuit lowering into a byte-sized target.
    /// `and`/`or` materialize the left side first, then skip the right side
    /// on the short-circuit condition.
    fn emit_relational_into(&mut self, id: ElementId, target: Operand) -> Result<(), ()> {
        let (op, lhs, rhs) = match &self.elements[id].data {
            ElementData::BinaryOperator { op, lhs, rhs } => (*op, *lhs, *rhs),
            _ => {
                // A bare boolean expression inside a logical chain.
                let (value, _) = self.emit_value(id)?;
                self.block().move_op(OpSize::Byte, target, value);
                return Ok(());
            }
        };

        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                let end_label = self
                    .asm
                    .make_label(format!("{}_end", self.elements[id].label_name()));
                self.emit_relational_into(lhs, target.clone())?;
                let target_ref = self.label_operand(&end_label);
                if op == BinaryOp::LogicalOr {
                    self.block().bnz(target.clone(), target_ref);
                } else {
                    self.block().bz(target.clone(), target_ref);
                }
                let short_circuit_end = self.current;

                let rhs_block = self.new_block();
                self.asm.add_edge(short_circuit_end, rhs_block);
                self.current = rhs_block;
                self.emit_relational_into(rhs, target)?;
                let rhs_end = self.current;

                let end_block = self.new_block();
                self.asm.block_mut(end_block).label(end_label);
                self.asm.add_edge(short_circuit_end, end_block);
                self.asm.add_edge(rhs_end, end_block);
                self.current = end_block;
                Ok(())
            }
            _ if op.is_relational() => {
                let (lhs_operand, lhs_type) = self.emit_value(lhs)?;
                let (rhs_operand, rhs_type) = self.emit_value(rhs)?;
                let size = if lhs_operand.size().byte_size() >= rhs_operand.size().byte_size() {
                    lhs_operand.size()
                } else {
                    rhs_operand.size()
                };
                self.block().cmp(size, lhs_operand, rhs_operand);
                let signed = lhs_type
                    .map(|t| types::is_signed(self.elements, t))
                    .unwrap_or(false)
                    || rhs_type
                        .map(|t| types::is_signed(self.elements, t))
                        .unwrap_or(false);
                let setcc = match (op, signed) {
                    (BinaryOp::Equals, _) => OpCode::Setz,
                    (BinaryOp::NotEquals, _) => OpCode::Setnz,
                    (BinaryOp::LessThan, true) => OpCode::Setl,
                    (BinaryOp::LessThan, false) => OpCode::Setb,
                    (BinaryOp::LessThanOrEqual, true) => OpCode::Setle,
                    (BinaryOp::LessThanOrEqual, false) => OpCode::Setbe,
                    (BinaryOp::GreaterThan, true) => OpCode::Setg,
                    (BinaryOp::GreaterThan, false) => OpCode::Seta,
                    (BinaryOp::GreaterThanOrEqual, true) => OpCode::Setge,
                    (BinaryOp::GreaterThanOrEqual, false) => OpCode::Setae,
                    _ => OpCode::Setz,
                };
                self.block().setcc(setcc, target);
                Ok(())
            }
            _ => {
                let (value, _) = self.emit_value(id)?;
                self.block().move_op(OpSize::Byte, target, value);
                Ok(())
            }
        }
    }

    /// Assignment per the scalar/composite split: matching composites copy
    /// byte-wise; everything else stores the scalar.
    fn emit_assignment(&mut self, id: ElementId) -> Result<EmitResult, ()> {
        let (lhs, rhs) = match &self.elements[id].data {
            ElementData::BinaryOperator { lhs, rhs, .. } => (*lhs, *rhs),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let (value, rhs_type) = self.emit_value(rhs)?;
        let (address, offset, lhs_type) = self.emit_address(lhs)?;

        let lhs_composite = types::is_composite_type(self.elements, lhs_type.unwrap_or(usize::MAX));
        let rhs_composite = types::is_composite_type(self.elements, rhs_type.unwrap_or(usize::MAX));
        let lhs_pointer = lhs_type
            .map(|t| types::is_pointer_type(self.elements, t))
            .unwrap_or(false);

        if lhs_composite && rhs_composite {
            let same_identity = match (lhs_type, rhs_type) {
                (Some(a), Some(b)) => {
                    types::type_name(self.elements, a) == types::type_name(self.elements, b)
                }
                _ => false,
            };
            if !same_identity {
                self.error(
                    X_UNSUPPORTED,
                    "composite assignment requires identical types".to_string(),
                    span,
                );
                return Err(());
            }
            let dest = self.offset_address(address, offset, &span)?;
            let length = lhs_type
                .map(|t| types::size_of(self.elements, t))
                .unwrap_or(0);
            self.block().copy(dest, value, length);
            return Ok(EmitResult::none());
        }

        if (lhs_composite || rhs_composite) && !lhs_pointer {
            self.error(
                X_UNSUPPORTED,
                "cannot mix composite and scalar assignment".to_string(),
                span,
            );
            return Err(());
        }

        let size = self.op_size_of(lhs_type);
        match &address {
            Operand::Named { reference, .. } if reference.kind == NamedRefKind::Offset => {
                // Frame local: move straight into the slot.
                let dest = self.local_value_operand(&reference.name, size);
                if offset == 0 {
                    self.block().move_op(size, dest, value);
                } else {
                    self.block().store(size, address, value, offset);
                }
            }
            _ => {
                self.block().store(size, address, value, offset);
            }
        }
        Ok(EmitResult::none())
    }

    fn offset_address(&mut self, address: Operand, offset: i64, span: &Span) -> Result<Operand, ()> {
        if offset == 0 {
            return Ok(address);
        }
        match address {
            Operand::Named { reference, offset: base } => {
                Ok(Operand::named_with_offset(reference, base + offset))
            }
            other => {
                let combined = self.alloc_temp(OpSize::Qword, span)?;
                self.block().op(
                    OpCode::Add,
                    OpSize::Qword,
                    vec![
                        combined.clone(),
                        other,
                        Operand::imm(offset as u64, OpSize::Qword),
                    ],
                );
                Ok(combined)
            }
        }
    }

    fn emit_unary(&mut self, id: ElementId) -> Result<EmitResult, ()> {
        let (op, operand) = match &self.elements[id].data {
            ElementData::UnaryOperator { op, operand } => (*op, *operand),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        match op {
            UnaryOp::Negate | UnaryOp::BinaryNot => {
                let (value, _) = self.emit_value(operand)?;
                let type_id = self.infer(id);
                let size = self.op_size_of(type_id);
                let dest = self.alloc_temp(size, &span)?;
                let opcode = if op == UnaryOp::Negate {
                    OpCode::Neg
                } else {
                    OpCode::Not
                };
                self.block().op(opcode, size, vec![dest.clone(), value]);
                Ok(EmitResult::value(dest, type_id))
            }
            UnaryOp::LogicalNot => {
                let (value, _) = self.emit_value(operand)?;
                let dest = self.alloc_temp(OpSize::Byte, &span)?;
                self.block().cmp(OpSize::Byte, value, Operand::imm(0, OpSize::Byte));
                self.block().setcc(OpCode::Setz, dest.clone());
                Ok(EmitResult::value(dest, Some(self.core.bool_type)))
            }
            UnaryOp::AddressOf => {
                let (address, offset, _) = self.emit_address(operand)?;
                let type_id = self.infer(id);
                let dest = self.alloc_temp(OpSize::Qword, &span)?;
                let source = self.offset_address(address, offset, &span)?;
                self.block().move_op(OpSize::Qword, dest.clone(), source);
                Ok(EmitResult::value(dest, type_id))
            }
            UnaryOp::Dereference => {
                let (value, pointer_type) = self.emit_value(operand)?;
                let base = pointer_type.and_then(|t| types::pointer_base(self.elements, t));
                if types::is_composite_type(self.elements, base.unwrap_or(usize::MAX)) {
                    // Composite base: same pair, downstream adds offsets.
                    return Ok(EmitResult::pair(value, 0, base));
                }
                let size = self.op_size_of(base);
                let dest = self.alloc_temp(size, &span)?;
                self.block().load(size, dest.clone(), value, 0);
                Ok(EmitResult::value(dest, base))
            }
        }
    }

    /// Cast lowering: choose between no-op moves, truncation, sign/zero
    /// extension, and float conversion from the class/size/sign triple.
    fn emit_cast(&mut self, id: ElementId, transmute: bool) -> Result<EmitResult, ()> {
        let (type_ref, expression) = match &self.elements[id].data {
            ElementData::Cast {
                type_ref,
                expression,
            }
            | ElementData::Transmute {
                type_ref,
                expression,
            } => (*type_ref, *expression),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let (value, source_type) = self.emit_value(expression)?;
        let target_type = concrete_type(self.elements, type_ref);

        let (Some(source_type), Some(target_type)) = (source_type, target_type) else {
            return Err(());
        };
        let source_class = types::number_class(self.elements, source_type);
        let target_class = types::number_class(self.elements, target_type);
        let (Some(source_class), Some(target_class)) = (source_class, target_class) else {
            self.error(
                crate::frontend::diagnostic::C_INVALID_CAST,
                format!(
                    "cannot cast `{}` to `{}`",
                    types::type_name(self.elements, source_type),
                    types::type_name(self.elements, target_type)
                ),
                span,
            );
            return Err(());
        };

        let source_size = types::size_of(self.elements, source_type);
        let target_size = types::size_of(self.elements, target_type);
        let size = OpSize::from_byte_size(target_size);
        let dest = self.alloc_temp(size, &span)?;

        if transmute {
            self.block().move_op(size, dest.clone(), value);
            return Ok(EmitResult::value(dest, Some(target_type)));
        }

        match (source_class, target_class) {
            (NumberClass::Integer, NumberClass::Integer) => {
                if target_size <= source_size {
                    // Truncate, or same-size reinterpretation across signs.
                    self.block().move_op(size, dest.clone(), value);
                } else if types::is_signed(self.elements, source_type) {
                    self.block().moves(size, dest.clone(), value);
                } else {
                    self.block().movez(size, dest.clone(), value);
                }
            }
            (NumberClass::FloatingPoint, NumberClass::FloatingPoint)
            | (NumberClass::Integer, NumberClass::FloatingPoint)
            | (NumberClass::FloatingPoint, NumberClass::Integer) => {
                self.block().convert(size, dest.clone(), value);
            }
        }
        Ok(EmitResult::value(dest, Some(target_type)))
    }

    // ------------------------------------------------------------------
    // control flow

    /// predicate -> (true, false?) -> exit, with the true block jumping
    /// over the false block when both exist.
    fn emit_if(&mut self, id: ElementId) -> Result<(), ()> {
        let (predicate, true_branch, false_branch) = match &self.elements[id].data {
            ElementData::If {
                predicate,
                true_branch,
                false_branch,
            } => (*predicate, *true_branch, *false_branch),
            _ => return Err(()),
        };
        let base = self.elements[id].label_name();
        let true_label = self.asm.make_label(format!("{}_true", base));
        let exit_label = self.asm.make_label(format!("{}_exit", base));
        let false_label = false_branch.map(|_| self.asm.make_label(format!("{}_false", base)));

        let mark = self.temp_mark();
        let (pred_value, _) = self.emit_value(predicate)?;
        let on_false = false_label.clone().unwrap_or_else(|| exit_label.clone());
        let on_false_ref = self.label_operand(&on_false);
        self.block().bz(pred_value, on_false_ref);
        self.temp_release(mark);
        let predicate_block = self.current;

        let true_block = self.new_block();
        self.current = true_block;
        self.block().label(true_label);
        let true_terminated = self.emit_scope_block(true_branch)?;
        if false_branch.is_some() && !true_terminated && !self.block().is_terminated() {
            let exit_ref = self.label_operand(&exit_label);
            self.block().jmp(exit_ref);
        }
        let true_end = self.current;

        let mut false_end = None;
        if let Some(false_branch) = false_branch {
            let false_block = self.new_block();
            self.current = false_block;
            if let Some(label) = false_label {
                self.block().label(label);
            }
            match self.elements[false_branch].kind() {
                ElementKind::If => {
                    self.emit_if(false_branch)?;
                }
                _ => {
                    self.emit_scope_block(false_branch)?;
                }
            }
            false_end = Some(self.current);
            self.asm.add_edge(predicate_block, false_block);
        }

        let exit_block = self.new_block();
        self.asm.block_mut(exit_block).label(exit_label);
        self.asm.add_edge(predicate_block, true_block);
        if !true_terminated {
            self.asm.add_edge(true_end, exit_block);
        }
        if let Some(false_end) = false_end {
            if !self.asm.block(false_end).is_terminated() {
                self.asm.add_edge(false_end, exit_block);
            }
        } else if false_branch.is_none() {
            self.asm.add_edge(predicate_block, exit_block);
        }
        self.current = exit_block;
        Ok(())
    }

    fn emit_while(&mut self, id: ElementId) -> Result<(), ()> {
        let (predicate, body) = match &self.elements[id].data {
            ElementData::While { predicate, body } => (*predicate, *body),
            _ => return Err(()),
        };
        let base = self.elements[id].label_name();
        let entry_label = self.asm.make_label(format!("{}_entry", base));
        let body_label = self.asm.make_label(format!("{}_body", base));
        let exit_label = self.asm.make_label(format!("{}_exit", base));

        let before = self.current;
        let entry_block = self.new_block();
        self.asm.add_edge(before, entry_block);
        self.current = entry_block;
        self.block().label(entry_label.clone());
        let mark = self.temp_mark();
        let (pred_value, _) = self.emit_value(predicate)?;
        let exit_ref = self.label_operand(&exit_label);
        self.block().bz(pred_value, exit_ref);
        self.temp_release(mark);
        let predicate_end = self.current;

        self.flow.push(FlowFrame::new(
            FlowKind::Loop,
            exit_label.clone(),
            Some(entry_label.clone()),
            std::mem::take(&mut self.pending_labels),
        ));

        let body_block = self.new_block();
        self.current = body_block;
        self.block().label(body_label);
        let terminated = self.emit_scope_block(body)?;
        let loops_back = !terminated && !self.block().is_terminated();
        if loops_back {
            let entry_ref = self.label_operand(&entry_label);
            self.block().jmp(entry_ref);
        }
        let body_end = self.current;

        let frame = self.flow.pop().expect("while flow frame");

        let exit_block = self.new_block();
        self.asm.block_mut(exit_block).label(exit_label);
        self.asm.add_edge(predicate_end, body_block);
        self.asm.add_edge(predicate_end, exit_block);
        if loops_back {
            self.asm.add_edge(body_end, entry_block);
        }
        for source in frame.break_sources {
            self.asm.add_edge(source, exit_block);
        }
        for source in frame.continue_sources {
            self.asm.add_edge(source, entry_block);
        }
        self.current = exit_block;
        Ok(())
    }

    /// Range-driven for loop: init, predicate, body, step, exit. Predicate
    /// comparison and step direction come from the range's `dir`/`kind`.
    fn emit_for(&mut self, id: ElementId) -> Result<(), ()> {
        let (induction, expression, body) = match &self.elements[id].data {
            ElementData::For {
                induction,
                expression,
                body,
            } => (*induction, *expression, *body),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let range = match &self.elements[expression].data {
            ElementData::Intrinsic { name, arguments } if name == "range" => *arguments,
            _ => {
                self.error(
                    X_UNSUPPORTED,
                    "for loops support range() expressions only".to_string(),
                    span,
                );
                return Err(());
            }
        };
        let (start, stop, step, dir, kind) = self.range_arguments(range)?;

        let base = self.elements[id].label_name();
        let entry_label = self.asm.make_label(format!("{}_entry", base));
        let body_label = self.asm.make_label(format!("{}_body", base));
        let step_label = self.asm.make_label(format!("{}_step", base));
        let exit_label = self.asm.make_label(format!("{}_exit", base));

        let induction_name = self.elements[induction]
            .as_identifier()
            .map(|d| d.symbol.name.clone())
            .unwrap_or_else(|| "i".to_string());
        let induction_type = self.infer(induction);
        let size = self.op_size_of(induction_type);
        self.register_local(&induction_name, size.byte_size());
        let induction_operand = self.local_value_operand(&induction_name, size);

        // init
        let mark = self.temp_mark();
        let (start_value, _) = self.emit_value(start)?;
        self.block()
            .move_op(size, induction_operand.clone(), start_value);
        self.temp_release(mark);
        let init_end = self.current;
        let step_operand_default = Operand::imm(1, size);

        // predicate
        let entry_block = self.new_block();
        self.asm.add_edge(init_end, entry_block);
        self.current = entry_block;
        self.block().label(entry_label);
        let mark = self.temp_mark();
        let (stop_value, _) = self.emit_value(stop)?;
        let signed = induction_type
            .map(|t| types::is_signed(self.elements, t))
            .unwrap_or(false);
        // dir 0/1 = ascending/descending, kind 0/1 = inclusive/exclusive.
        let setcc = match (dir, kind, signed) {
            (0, 0, true) => OpCode::Setle,
            (0, 0, false) => OpCode::Setbe,
            (0, _, true) => OpCode::Setl,
            (0, _, false) => OpCode::Setb,
            (_, 0, true) => OpCode::Setge,
            (_, 0, false) => OpCode::Setae,
            (_, _, true) => OpCode::Setg,
            (_, _, false) => OpCode::Seta,
        };
        let flag = self.alloc_temp(OpSize::Byte, &span)?;
        self.block()
            .cmp(size, induction_operand.clone(), stop_value);
        self.block().setcc(setcc, flag.clone());
        let exit_ref = self.label_operand(&exit_label);
        self.block().bz(flag, exit_ref);
        self.temp_release(mark);
        let predicate_end = self.current;

        self.flow.push(FlowFrame::new(
            FlowKind::Loop,
            exit_label.clone(),
            Some(step_label.clone()),
            std::mem::take(&mut self.pending_labels),
        ));

        // body
        let body_block = self.new_block();
        self.current = body_block;
        self.block().label(body_label);
        let terminated = self.emit_scope_block(body)?;
        let body_end = self.current;

        let frame = self.flow.pop().expect("for flow frame");

        // step
        let step_block = self.new_block();
        self.current = step_block;
        self.block().label(step_label);
        let mark = self.temp_mark();
        let step_value = match step {
            Some(step) => self.emit_value(step)?.0,
            None => step_operand_default,
        };
        let step_op = if dir == 0 { OpCode::Add } else { OpCode::Sub };
        self.block().op(
            step_op,
            size,
            vec![
                induction_operand.clone(),
                induction_operand.clone(),
                step_value,
            ],
        );
        let entry_ref = self.label_operand(&format!("{}_entry", base));
        self.block().jmp(entry_ref);
        self.temp_release(mark);

        let exit_block = self.new_block();
        self.asm.block_mut(exit_block).label(exit_label);
        self.asm.add_edge(predicate_end, body_block);
        self.asm.add_edge(predicate_end, exit_block);
        if !terminated && !self.asm.block(body_end).is_terminated() {
            self.asm.add_edge(body_end, step_block);
        }
        self.asm.add_edge(step_block, entry_block);
        for source in frame.break_sources {
            self.asm.add_edge(source, exit_block);
        }
        for source in frame.continue_sources {
            self.asm.add_edge(source, step_block);
        }
        self.current = exit_block;
        Ok(())
    }

    /// (start, stop, step, dir, kind) from the range argument list; step
    /// defaults to 1, direction to ascending, kind to exclusive.
    fn range_arguments(
        &mut self,
        arguments: ElementId,
    ) -> Result<(ElementId, ElementId, Option<ElementId>, i128, i128), ()> {
        let span = self.span_of(arguments);
        let elements = match &self.elements[arguments].data {
            ElementData::ArgumentList { elements } => elements.clone(),
            _ => return Err(()),
        };
        let mut positional = Vec::new();
        let mut named: HashMap<String, ElementId> = HashMap::new();
        for argument in elements {
            match &self.elements[argument].data {
                ElementData::ArgumentPair { name, value } => {
                    named.insert(name.clone(), *value);
                }
                _ => positional.push(argument),
            }
        }
        let start = positional.first().copied();
        let stop = positional.get(1).copied();
        let (Some(start), Some(stop)) = (start, stop) else {
            self.error(
                X_UNSUPPORTED,
                "range requires start and stop".to_string(),
                span,
            );
            return Err(());
        };
        let step = positional
            .get(2)
            .copied()
            .or_else(|| named.get("step").copied());
        let dir = positional
            .get(3)
            .copied()
            .or_else(|| named.get("dir").copied())
            .and_then(|e| fold::constant_integer(self.elements, e))
            .unwrap_or(0);
        let kind = positional
            .get(4)
            .copied()
            .or_else(|| named.get("kind").copied())
            .and_then(|e| fold::constant_integer(self.elements, e))
            .unwrap_or(1);
        Ok((start, stop, step, dir, kind))
    }

    fn emit_switch(&mut self, id: ElementId) -> Result<(), ()> {
        let (expression, scope) = match &self.elements[id].data {
            ElementData::Switch { expression, scope } => (*expression, *scope),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let base = self.elements[id].label_name();
        let exit_label = self.asm.make_label(format!("{}_exit", base));

        let mark = self.temp_mark();
        let (switch_value, switch_type) = self.emit_value(expression)?;
        let switch_size = self.op_size_of(switch_type);
        // Hold the scrutinee in a stable temp across all case blocks.
        let scrutinee = self.alloc_temp(switch_size, &span)?;
        self.block()
            .move_op(switch_size, scrutinee.clone(), switch_value);

        let cases: Vec<ElementId> = self.elements[scope]
            .as_block()
            .map(|b| {
                b.statements
                    .iter()
                    .filter_map(|&s| match &self.elements[s].data {
                        ElementData::Statement {
                            expression: Some(e),
                            ..
                        } if self.elements[*e].kind() == ElementKind::Case => Some(*e),
                        _ if self.elements[s].kind() == ElementKind::Case => Some(s),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.flow.push(FlowFrame::new(
            FlowKind::Switch,
            exit_label.clone(),
            None,
            std::mem::take(&mut self.pending_labels),
        ));

        let mut previous_end = self.current;
        let mut body_blocks: Vec<BlockId> = Vec::new();
        let mut body_exits: Vec<(BlockId, bool, usize)> = Vec::new();
        let mut last_case_branches = false;
        for (index, &case) in cases.iter().enumerate() {
            let (case_expression, case_scope) = match &self.elements[case].data {
                ElementData::Case { expression, scope } => (*expression, *scope),
                _ => continue,
            };
            let case_base = self.elements[case].label_name();
            let entry_label = self.asm.make_label(format!("{}_entry", case_base));
            let true_label = self.asm.make_label(format!("{}_true", case_base));
            let next_label = match cases.get(index + 1) {
                Some(&next) => format!("{}_entry", self.elements[next].label_name()),
                None => exit_label.clone(),
            };

            let entry_block = self.new_block();
            self.asm.add_edge(previous_end, entry_block);
            self.current = entry_block;
            self.block().label(entry_label);
            last_case_branches = case_expression.is_some();
            if let Some(case_expression) = case_expression {
                let case_mark = self.temp_mark();
                let (case_value, _) = self.emit_value(case_expression)?;
                self.block()
                    .cmp(switch_size, scrutinee.clone(), case_value);
                let next_ref = self.label_operand(&next_label);
                self.block().bne(next_ref);
                self.temp_release(case_mark);
            }
            let entry_end = self.current;

            let body_block = self.new_block();
            body_blocks.push(body_block);
            self.current = body_block;
            self.block().label(true_label);
            let terminated = self.emit_scope_block(case_scope)?;
            let fell_through = self.case_falls_through(case_scope);
            if !terminated && !self.block().is_terminated() {
                if fell_through {
                    let next_case_true = match cases.get(index + 1) {
                        Some(&next) => format!("{}_true", self.elements[next].label_name()),
                        None => exit_label.clone(),
                    };
                    let target = self.label_operand(&next_case_true);
                    self.block().jmp(target);
                } else {
                    let exit_ref = self.label_operand(&exit_label);
                    self.block().jmp(exit_ref);
                }
                body_exits.push((self.current, fell_through, index));
            }
            self.asm.add_edge(entry_end, body_block);
            previous_end = entry_end;
        }

        let frame = self.flow.pop().expect("switch flow frame");
        self.temp_release(mark);

        let exit_block = self.new_block();
        self.asm.block_mut(exit_block).label(exit_label);
        if cases.is_empty() || last_case_branches {
            self.asm.add_edge(previous_end, exit_block);
        }
        for source in frame.break_sources {
            self.asm.add_edge(source, exit_block);
        }
        for (body_end, fell_through, index) in body_exits {
            let target = if fell_through && index + 1 < body_blocks.len() {
                body_blocks[index + 1]
            } else {
                exit_block
            };
            self.asm.add_edge(body_end, target);
        }
        self.current = exit_block;
        Ok(())
    }

    fn case_falls_through(&self, case_scope: ElementId) -> bool {
        self.elements[case_scope]
            .as_block()
            .map(|block| {
                block.statements.iter().any(|&s| match &self.elements[s].data {
                    ElementData::Statement {
                        expression: Some(e),
                        ..
                    } => self.elements[*e].kind() == ElementKind::Fallthrough,
                    _ => self.elements[s].kind() == ElementKind::Fallthrough,
                })
            })
            .unwrap_or(false)
    }

    fn emit_break_continue(
        &mut self,
        id: ElementId,
        label: Option<String>,
        is_break: bool,
    ) -> Result<(), ()> {
        let span = self.span_of(id);
        let frame_index = match &label {
            Some(label) => self
                .flow
                .iter()
                .rposition(|f| f.statement_labels.iter().any(|l| l == label)),
            None => {
                if is_break {
                    self.flow.len().checked_sub(1)
                } else {
                    self.flow.iter().rposition(|f| f.kind == FlowKind::Loop)
                }
            }
        };
        let target = frame_index.and_then(|index| {
            let frame = &self.flow[index];
            if is_break {
                Some(frame.exit_label.clone())
            } else {
                frame.continue_label.clone()
            }
        });
        let (Some(target), Some(frame_index)) = (target, frame_index) else {
            let what = if is_break { "break" } else { "continue" };
            self.error(
                P_INVALID_BREAK_CONTINUE,
                format!("{} outside of a loop or switch", what),
                span,
            );
            return Err(());
        };
        let target_ref = self.label_operand(&target);
        self.block().jmp(target_ref);
        let source = self.current;
        if is_break {
            self.flow[frame_index].break_sources.push(source);
        } else {
            self.flow[frame_index].continue_sources.push(source);
        }
        Ok(())
    }

    /// Evaluate, store into the frame's return slot, replay defers, unwind.
    fn emit_return(&mut self, id: ElementId) -> Result<(), ()> {
        let expressions = match &self.elements[id].data {
            ElementData::Return { expressions } => expressions.clone(),
            _ => return Err(()),
        };

        if let Some(&value_expr) = expressions.first() {
            let proc_type = self.frame().proc_type;
            let return_size = proc_type
                .and_then(|p| self.elements[p].as_procedure())
                .and_then(|p| p.return_field)
                .and_then(|f| types::field_type_of(self.elements, f))
                .map(|t| types::size_of(self.elements, t))
                .unwrap_or(abi::WORD_SIZE);
            let mark = self.temp_mark();
            let (value, _) = self.emit_value(value_expr)?;
            let size = OpSize::from_byte_size(return_size);
            self.block().store(
                size,
                Operand::fp(),
                value,
                abi::return_slot_offset(),
            );
            self.temp_release(mark);
        }

        // Deferred work runs before the frame is torn down; paths that
        // return never re-run defers at block exit.
        let pending: Vec<ElementId> = self.block_stack.clone();
        for block_element in pending.into_iter().rev() {
            self.emit_block_defers(block_element)?;
            let is_frame = self.elements[block_element]
                .as_block()
                .map(|b| b.has_stack_frame)
                .unwrap_or(false);
            if is_frame {
                break;
            }
        }
        self.block()
            .move_op(OpSize::Qword, Operand::sp(), Operand::fp());
        self.block().pop(OpSize::Qword, Operand::fp());
        self.block().rts();
        Ok(())
    }

    // ------------------------------------------------------------------
    // calls

    /// Three adjacent blocks per call: `<id>_prologue` saves locals and
    /// pushes arguments right-to-left, `<id>_invoke` transfers, and
    /// `<id>_epilogue` collects the return value and unwinds.
    fn emit_proc_call(&mut self, id: ElementId) -> Result<EmitResult, ()> {
        let (reference, arguments) = match &self.elements[id].data {
            ElementData::ProcCall {
                reference,
                arguments,
            } => (*reference, *arguments),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let inference = TypeInference {
            map: self.elements,
            scopes: self.scopes,
            core: self.core,
        };
        let Some(proc_type) = inference.procedure_type_of(reference) else {
            self.error(
                P_MISSING_VARIABLE,
                "call target is not a procedure".to_string(),
                span,
            );
            return Err(());
        };
        let proc_data = match self.elements[proc_type].as_procedure() {
            Some(data) => data.clone(),
            None => return Err(()),
        };

        let argument_ids: Vec<ElementId> = match &self.elements[arguments].data {
            ElementData::ArgumentList { elements } => elements.clone(),
            _ => Vec::new(),
        };

        let return_type = proc_data
            .return_field
            .and_then(|f| types::field_type_of(self.elements, f));
        let return_size = return_type
            .map(|t| types::size_of(self.elements, t))
            .unwrap_or(0);

        let base = self.elements[id].label_name();
        let prologue_label = self.asm.make_label(format!("{}_prologue", base));
        let invoke_label = self.asm.make_label(format!("{}_invoke", base));
        let epilogue_label = self.asm.make_label(format!("{}_epilogue", base));

        let before = self.current;
        let prologue = self.new_block();
        self.asm.add_edge(before, prologue);
        self.current = prologue;
        self.block().label(prologue_label);

        // Caller-saved locals, non-foreign calls only.
        let saved_locals: Vec<(String, OpSize)> = if proc_data.is_foreign {
            Vec::new()
        } else {
            let frame = self.frame();
            let mut names: Vec<(String, i64, OpSize)> = frame
                .locals
                .iter()
                .map(|(name, local)| (name.clone(), local.offset, local.size))
                .collect();
            names.sort_by_key(|(_, offset, _)| *offset);
            names
                .into_iter()
                .map(|(name, _, size)| (name, size))
                .collect()
        };
        for (name, _) in &saved_locals {
            let operand = self.local_value_operand(name, OpSize::Qword);
            self.block().push(OpSize::Qword, operand);
        }

        // Arguments, right-to-left, composites by value.
        let mut argument_sizes: Vec<u64> = Vec::new();
        let mut ffi_arguments: Vec<FfiArgument> = Vec::new();
        for &argument in &argument_ids {
            let value = match &self.elements[argument].data {
                ElementData::ArgumentPair { value, .. } => *value,
                _ => argument,
            };
            let value_type = self.infer(value);
            let byte_size = value_type
                .map(|t| types::size_of(self.elements, t))
                .unwrap_or(abi::WORD_SIZE);
            argument_sizes.push(byte_size);
            ffi_arguments.push(FfiArgument {
                size: OpSize::from_byte_size(byte_size),
                is_float: value_type
                    .and_then(|t| types::number_class(self.elements, t))
                    .map(|c| c == NumberClass::FloatingPoint)
                    .unwrap_or(false),
            });
        }

        for (&argument, &byte_size) in argument_ids.iter().zip(argument_sizes.iter()).rev() {
            let value_expr = match &self.elements[argument].data {
                ElementData::ArgumentPair { value, .. } => *value,
                _ => argument,
            };
            let mark = self.temp_mark();
            let (value, value_type) = self.emit_value(value_expr)?;
            if types::is_composite_type(self.elements, value_type.unwrap_or(usize::MAX)) {
                let slot = abi::aligned_slot_size(byte_size);
                self.block().op(
                    OpCode::Sub,
                    OpSize::Qword,
                    vec![
                        Operand::sp(),
                        Operand::sp(),
                        Operand::imm(slot, OpSize::Qword),
                    ],
                );
                self.block().copy(Operand::sp(), value, byte_size);
            } else {
                self.block().push(value.size(), value);
            }
            self.temp_release(mark);
        }

        if return_size > 0 {
            self.block().op(
                OpCode::Sub,
                OpSize::Qword,
                vec![
                    Operand::sp(),
                    Operand::sp(),
                    Operand::imm(abi::return_slot_size(return_size), OpSize::Qword),
                ],
            );
        }

        // invoke
        let invoke = self.new_block();
        self.asm.add_edge(prologue, invoke);
        self.current = invoke;
        self.block().label(invoke_label);
        if proc_data.is_foreign {
            let symbol = proc_data.base.name.clone();
            let address = match proc_data
                .foreign_address
                .or_else(|| self.ffi.find_by_symbol(&symbol).map(|f| f.address))
            {
                Some(address) => address,
                None => {
                    self.error(
                        X_UNSUPPORTED,
                        format!("unknown foreign function `{}`", symbol),
                        span,
                    );
                    return Err(());
                }
            };
            let signature_id = if self.ffi.is_variadic(address) {
                Some(self.ffi.register_call_signature(CallSignature {
                    arguments: ffi_arguments,
                }))
            } else {
                None
            };
            self.block()
                .ffi(Operand::imm(address, OpSize::Qword), signature_id);
        } else {
            let Some(&instance) = proc_data.instances.first() else {
                self.error(
                    P_MISSING_VARIABLE,
                    format!("procedure `{}` has no body", proc_data.base.name),
                    span,
                );
                return Err(());
            };
            let entry = self.elements[instance].label_name();
            let entry_ref = self.label_operand(&entry);
            self.block().jsr(entry_ref);
        }

        // epilogue
        let epilogue = self.new_block();
        self.asm.add_edge(invoke, epilogue);
        self.current = epilogue;
        self.block().label(epilogue_label);

        let mut result = EmitResult::none();
        if return_size > 0 {
            let size = OpSize::from_byte_size(return_size);
            let temp = self.alloc_temp(size, &span)?;
            self.block().pop(size, temp.clone());
            result = EmitResult::value(temp, return_type);
        }
        let argument_area = abi::argument_area_size(&argument_sizes);
        if argument_area > 0 {
            self.block().op(
                OpCode::Add,
                OpSize::Qword,
                vec![
                    Operand::sp(),
                    Operand::sp(),
                    Operand::imm(argument_area, OpSize::Qword),
                ],
            );
        }
        for (name, size) in saved_locals.iter().rev() {
            let operand = self.local_value_operand(name, *size);
            self.block().pop(OpSize::Qword, operand);
        }
        Ok(result)
    }

    fn emit_intrinsic(&mut self, id: ElementId) -> Result<EmitResult, ()> {
        let (name, arguments) = match &self.elements[id].data {
            ElementData::Intrinsic { name, arguments } => (name.clone(), *arguments),
            _ => return Err(()),
        };
        let span = self.span_of(id);
        let first = match &self.elements[arguments].data {
            ElementData::ArgumentList { elements } => elements.first().copied(),
            _ => None,
        };
        match name.as_str() {
            "size_of" | "align_of" => {
                let Some(first) = first else {
                    return Err(());
                };
                let Some(arg_type) = self.infer(first) else {
                    return Err(());
                };
                let value = if name == "size_of" {
                    types::size_of(self.elements, arg_type)
                } else {
                    types::alignment_of(self.elements, arg_type)
                };
                Ok(EmitResult::value(
                    Operand::imm(value, OpSize::Dword),
                    self.core.numeric("u32"),
                ))
            }
            "address_of" => {
                let Some(first) = first else {
                    return Err(());
                };
                let (address, offset, _) = self.emit_address(first)?;
                let dest = self.alloc_temp(OpSize::Qword, &span)?;
                let source = self.offset_address(address, offset, &span)?;
                self.block().move_op(OpSize::Qword, dest.clone(), source);
                Ok(EmitResult::value(dest, self.infer(id)))
            }
            "range" => {
                self.error(
                    X_UNSUPPORTED,
                    "range() is only valid in a for loop".to_string(),
                    span,
                );
                Err(())
            }
            other => {
                self.error(
                    X_UNSUPPORTED,
                    format!("unknown intrinsic `{}`", other),
                    span,
                );
                Err(())
            }
        }
    }

    fn emit_directive(
        &mut self,
        id: ElementId,
        directive: &DirectiveData,
    ) -> Result<EmitResult, ()> {
        let span = self.span_of(id);
        match directive {
            DirectiveData::Assembly { raw_block } => {
                if let ElementData::RawBlock { source } = &self.elements[*raw_block].data {
                    let source = source.clone();
                    self.asm.assemble_from_source(self.current, &source);
                }
                Ok(EmitResult::none())
            }
            DirectiveData::Run { expression } => {
                // Folding replaced constant #run bodies already; reaching
                // here means the expression was not compile-time evaluable.
                let expression = *expression;
                if fold::is_constant(self.elements, expression) {
                    self.emit_element(expression)
                } else {
                    self.error(
                        X_UNSUPPORTED,
                        "#run expression is not compile-time evaluable".to_string(),
                        span,
                    );
                    Err(())
                }
            }
            DirectiveData::If {
                condition,
                true_body,
                false_body,
            } => {
                let chosen = match fold::fold_value(self.elements, self.scopes, self.core, *condition)
                {
                    Some(fold::FoldValue::Boolean(true)) => Some(*true_body),
                    Some(fold::FoldValue::Boolean(false)) => *false_body,
                    Some(fold::FoldValue::Integer(v)) => {
                        if v != 0 {
                            Some(*true_body)
                        } else {
                            *false_body
                        }
                    }
                    _ => {
                        self.error(
                            X_UNSUPPORTED,
                            "#if condition is not compile-time evaluable".to_string(),
                            span,
                        );
                        return Err(());
                    }
                };
                if let Some(body) = chosen {
                    self.emit_scope_block(body)?;
                }
                Ok(EmitResult::none())
            }
            DirectiveData::Type { .. } | DirectiveData::Foreign { .. } => Ok(EmitResult::none()),
        }
    }
}
