// Purpose: Drive byte-code emission in the fixed program layout order.
// Inputs/Outputs: Consumes the resolved session and writes labeled blocks into the assembler.
// Invariants: bootstrap < type table < string table < sections < procedures < _start < implicit < _end.
// Gotchas: The assembler and FFI registry are passed in; the session never owns them.

mod emitter;

use log::debug;

use crate::compile::Session;
use crate::frontend::diagnostic::X_UNSUPPORTED;
use crate::sema::element::{
    CompositeKind, ElementData, ElementId, ElementKind, NumberClass,
};
use crate::sema::fold;
use crate::sema::intern::{self, StringInternMap};
use crate::sema::types::{self, concrete_type};
use crate::sema::vars;
use crate::vm::assembler::{Assembler, DataValue};
use crate::vm::ffi::Ffi;
use crate::vm::{Instruction, OpCode, OpSize, Operand, Section};

use emitter::ByteCodeEmitter;

/// Lower the fully resolved element graph into the assembler. Returns false
/// when any coded error was produced.
pub fn emit_program(session: &mut Session, asm: &mut Assembler, ffi: &mut Ffi) -> bool {
    intern_string_literals(session);

    let groups = vars::group_identifiers(session.builder.elements(), &session.scopes);

    let Session {
        ref builder,
        ref scopes,
        ref core,
        ref mut result,
        ref mut interns,
        ref options,
        ..
    } = *session;

    let mut emitter = ByteCodeEmitter::new(
        builder.elements(),
        scopes,
        core,
        interns,
        result,
        ffi,
        asm,
        options.max_temporaries,
    );

    emitter.emit_bootstrap_block();
    if !emitter.emit_type_table() {
        return false;
    }
    if !emitter.emit_interned_string_table() {
        return false;
    }
    if !emitter.emit_section_tables(&groups) {
        return false;
    }
    if !emitter.emit_procedure_instances() {
        return false;
    }
    if !emitter.emit_start_block() {
        return false;
    }
    if !emitter.emit_initializers(&groups) {
        return false;
    }
    if !emitter.emit_implicit_blocks() {
        return false;
    }
    if !emitter.emit_finalizers(&groups) {
        return false;
    }
    emitter.emit_end_block();

    let ok = !session.result.is_failed();
    debug!(
        "emission produced {} blocks ({})",
        asm.blocks().len(),
        if ok { "ok" } else { "failed" }
    );
    ok
}

/// Map every string literal to an intern id, skipping literals consumed by
/// attributes, directives, and module references.
fn intern_string_literals(session: &mut Session) {
    let literals = session
        .builder
        .elements()
        .find_by_kind(ElementKind::StringLiteral);
    for literal in literals {
        let element = &session.builder.elements()[literal];
        let skip = element
            .parent_element
            .and_then(|p| session.builder.elements().get(p))
            .map(|p| {
                matches!(
                    p.kind(),
                    ElementKind::Attribute | ElementKind::Directive | ElementKind::ModuleReference
                )
            })
            .unwrap_or(false);
        if skip {
            continue;
        }
        let value = match element.as_string() {
            Some(value) => value.to_string(),
            None => continue,
        };
        session.interns.intern(literal, &value);
    }
    debug!("interned {} unique strings", session.interns.len());
}

impl ByteCodeEmitter<'_> {
    /// Unconditional jump to `_start`; always the first block.
    fn emit_bootstrap_block(&mut self) {
        let target = self.asm.label_operand("_start");
        self.block().jmp(target);
    }

    fn used_types(&self) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = Vec::new();
        for element in self.elements.iter() {
            let Some(identifier) = element.as_identifier() else {
                continue;
            };
            let Some(type_id) = identifier
                .type_ref
                .and_then(|t| concrete_type(self.elements, t))
            else {
                continue;
            };
            if matches!(
                self.elements[type_id].kind(),
                ElementKind::UnknownType | ElementKind::NamespaceType | ElementKind::ModuleType
            ) {
                continue;
            }
            if !out.contains(&type_id) {
                out.push(type_id);
            }
        }
        out
    }

    /// Descriptor records `(name_length, name_length, name_data_ptr)` per
    /// used type, then the `_ti_array` vector prefixed by the count.
    fn emit_type_table(&mut self) -> bool {
        let used = self.used_types();
        let block_id = self.asm.make_basic_block();
        self.current = block_id;
        self.block().section(Section::RoData);

        for &type_id in &used {
            let name = types::type_name(self.elements, type_id);
            let literal = self.asm.make_label(format!("_ti_lit_{}", name));
            let data = self.asm.make_label(format!("_ti_lit_{}_data", name));
            self.block().blank_line();
            self.block().align(4);
            self.block().string(literal, data, name);
        }

        self.block().blank_line();
        self.block().align(8);
        let array_label = self.asm.make_label("_ti_array");
        self.block().label(array_label);
        self.block()
            .qwords(vec![DataValue::Int(used.len() as u64)]);

        for &type_id in &used {
            let name = types::type_name(self.elements, type_id);
            let info_label = self.asm.make_label(format!("_ti_{}", name));
            let name_len = name.len() as u64;
            self.block().blank_line();
            self.block().comment(format!("type: {}", name));
            self.block().label(info_label);
            self.block().dwords(vec![name_len]);
            self.block().dwords(vec![name_len]);
            self.block()
                .qwords(vec![DataValue::LabelRef(format!("_ti_lit_{}_data", name))]);
        }
        true
    }

    fn emit_interned_string_table(&mut self) -> bool {
        let block_id = self.asm.make_basic_block();
        self.current = block_id;
        self.block().comment("interned string literals");
        self.block().section(Section::RoData);

        let interned: Vec<(u64, String)> = self
            .interns
            .sorted()
            .map(|(id, value)| (id, value.to_string()))
            .collect();
        for (intern_id, value) in interned {
            let Some(escaped) = intern::escape(&value) else {
                self.result.error(
                    X_UNSUPPORTED,
                    format!("invalid escape sequence: {}", value),
                    None,
                );
                return false;
            };
            let descriptor = self
                .asm
                .make_label(StringInternMap::descriptor_label(intern_id));
            let data = self.asm.make_label(StringInternMap::data_label(intern_id));
            self.block().blank_line();
            self.block().align(4);
            self.block().comment(format!("\"{}\"", value));
            self.block().string(descriptor, data, escaped);
        }
        true
    }

    fn emit_section_tables(&mut self, groups: &vars::IdentifiersBySection) -> bool {
        let block_id = self.asm.make_basic_block();
        self.current = block_id;
        for (section, identifiers) in groups.iter_sections() {
            if section == Section::Text {
                // Procedure bodies are scheduled separately.
                continue;
            }
            self.block().blank_line();
            self.block().section(section);
            for &identifier in identifiers {
                self.emit_section_variable(identifier, section);
            }
        }
        true
    }

    fn emit_section_variable(&mut self, identifier: ElementId, section: Section) {
        let Some(data) = self.elements[identifier].as_identifier() else {
            return;
        };
        let Some(type_id) = data
            .type_ref
            .and_then(|t| concrete_type(self.elements, t))
        else {
            return;
        };
        let initializer = data.initializer;
        let label = self.elements[identifier].label_name();
        let type_label = types::type_name(self.elements, type_id);
        let alignment = types::alignment_of(self.elements, type_id);
        let reserve_only = section == Section::Bss || initializer.is_none();

        self.block().blank_line();
        if alignment > 1 {
            self.block().align(alignment);
        }
        self.block()
            .comment(format!("identifier type: {}", type_label));
        let label = self.asm.make_label(label);
        self.block().label(label);

        match &self.elements[type_id].data {
            ElementData::BoolType { .. } => {
                let value = initializer
                    .and_then(|init| fold::constant_integer(self.elements, init))
                    .unwrap_or(0);
                if reserve_only {
                    self.block().reserve(OpSize::Byte, 1);
                } else {
                    self.block().bytes(vec![(value != 0) as u64]);
                }
            }
            ElementData::RuneType { .. } => {
                let value = initializer
                    .and_then(|init| {
                        self.elements
                            .get(init)
                            .and_then(|e| match &e.data {
                                ElementData::Initializer {
                                    expression: Some(expr),
                                } => self.elements[*expr].as_rune(),
                                _ => None,
                            })
                    })
                    .map(|rune| rune as u64)
                    .unwrap_or('\u{fffd}' as u64);
                if reserve_only {
                    self.block().reserve(OpSize::Dword, 1);
                } else {
                    self.block().dwords(vec![value]);
                }
            }
            ElementData::PointerType { .. } => {
                if reserve_only {
                    self.block().reserve(OpSize::Qword, 1);
                } else {
                    self.block().qwords(vec![DataValue::Int(0)]);
                }
            }
            ElementData::StringType { .. } => {
                let intern = initializer.and_then(|init| self.interned_of(init));
                match (reserve_only, intern) {
                    (false, Some(intern_id)) => {
                        self.block().qwords(vec![DataValue::LabelRef(
                            StringInternMap::descriptor_label(intern_id),
                        )]);
                    }
                    _ => self.block().reserve(OpSize::Qword, 1),
                }
            }
            ElementData::NumericType { class, base, .. } => {
                let size = OpSize::from_byte_size(base.size_in_bytes);
                if reserve_only {
                    self.block().reserve(size, 1);
                    return;
                }
                let bits = match class {
                    NumberClass::Integer => initializer
                        .and_then(|init| fold::constant_integer(self.elements, init))
                        .map(|v| v as i64 as u64)
                        .unwrap_or(0),
                    NumberClass::FloatingPoint => initializer
                        .and_then(|init| fold::constant_float(self.elements, init))
                        .map(|v| match size {
                            OpSize::Dword => (v as f32).to_bits() as u64,
                            _ => v.to_bits(),
                        })
                        .unwrap_or(0),
                };
                match size {
                    OpSize::Byte => self.block().bytes(vec![bits & 0xff]),
                    OpSize::Word => self.block().words(vec![bits & 0xffff]),
                    OpSize::Dword => self.block().dwords(vec![bits & 0xffff_ffff]),
                    OpSize::Qword => self.block().qwords(vec![DataValue::Int(bits)]),
                }
            }
            ElementData::ArrayType { base, .. }
            | ElementData::CompositeType(crate::sema::element::CompositeData { base, .. })
            | ElementData::TupleType(crate::sema::element::CompositeData { base, .. }) => {
                self.block().reserve(OpSize::Byte, base.size_in_bytes.max(1));
            }
            _ => {}
        }
    }

    fn interned_of(&self, initializer: ElementId) -> Option<u64> {
        let expression = match &self.elements.get(initializer)?.data {
            ElementData::Initializer { expression } => (*expression)?,
            _ => initializer,
        };
        self.interns.element_id_to_intern_id(expression)
    }

    /// Every reachable non-foreign procedure instance, exactly once, found
    /// by walking call sites module by module.
    fn emit_procedure_instances(&mut self) -> bool {
        let mut instances: Vec<ElementId> = Vec::new();
        for call in self.elements.find_by_kind(ElementKind::ProcCall) {
            let reference = match &self.elements[call].data {
                ElementData::ProcCall { reference, .. } => *reference,
                _ => continue,
            };
            let inference = crate::sema::infer::TypeInference {
                map: self.elements,
                scopes: self.scopes,
                core: self.core,
            };
            let Some(proc_type) = inference.procedure_type_of(reference) else {
                continue;
            };
            let Some(proc) = self.elements[proc_type].as_procedure() else {
                continue;
            };
            if proc.is_foreign {
                continue;
            }
            for &instance in &proc.instances {
                if !instances.contains(&instance) {
                    instances.push(instance);
                }
            }
        }

        for instance in instances {
            if !self.emit_procedure(instance) {
                return false;
            }
        }
        true
    }

    fn emit_procedure(&mut self, instance: ElementId) -> bool {
        let (proc_type, scope) = match &self.elements[instance].data {
            ElementData::ProcInstance {
                procedure_type,
                scope,
            } => (*procedure_type, *scope),
            _ => return true,
        };
        let Some(proc) = self.elements[proc_type].as_procedure().cloned() else {
            return true;
        };

        let block_id = self.asm.make_basic_block();
        self.current = block_id;
        self.block().blank_line();
        self.block().align(8);
        self.block()
            .comment(format!("procedure: {}", proc.base.name));
        let entry = self.asm.make_label(self.elements[instance].label_name());
        self.block().label(entry);

        self.block().push(OpSize::Qword, Operand::fp());
        self.block()
            .move_op(OpSize::Qword, Operand::fp(), Operand::sp());
        let reserve_at = self.block().entries.len();

        self.push_frame(Some(proc_type));

        // Parameters live above the frame header; register them by their
        // caller-assigned offsets so body references resolve.
        let return_size = proc
            .return_field
            .and_then(|f| types::field_type_of(self.elements, f))
            .map(|t| types::size_of(self.elements, t))
            .unwrap_or(0);
        let argument_sizes: Vec<u64> = proc
            .parameters
            .iter()
            .map(|&field| {
                types::field_type_of(self.elements, field)
                    .map(|t| types::size_of(self.elements, t))
                    .unwrap_or(crate::abi::WORD_SIZE)
            })
            .collect();
        for (index, &field) in proc.parameters.iter().enumerate() {
            let Some(name) = types::field_name_of(self.elements, field) else {
                continue;
            };
            let offset = crate::abi::argument_offset(index, &argument_sizes, return_size);
            let size = argument_sizes[index];
            self.register_param(&name, offset, size);
        }

        let terminated = match self.emit_scope_block(scope) {
            Ok(terminated) => terminated,
            Err(()) => {
                self.pop_frame();
                return false;
            }
        };
        if !terminated && !self.block().is_terminated() {
            self.block()
                .move_op(OpSize::Qword, Operand::sp(), Operand::fp());
            self.block().pop(OpSize::Qword, Operand::fp());
            self.block().rts();
        }

        let frame_size = self.frame_reserve_size();
        self.pop_frame();
        if frame_size > 0 {
            self.asm.block_mut(block_id).entries.insert(
                reserve_at,
                crate::vm::assembler::BlockEntry::Instruction(Instruction::new(
                    OpCode::Sub,
                    OpSize::Qword,
                    vec![
                        Operand::sp(),
                        Operand::sp(),
                        Operand::imm(frame_size, OpSize::Qword),
                    ],
                )),
            );
        }
        true
    }

    /// `_start` saves the stack pointer into the frame pointer and falls
    /// through to `_initializer`.
    fn emit_start_block(&mut self) -> bool {
        let block_id = self.asm.make_basic_block();
        self.current = block_id;
        self.block().blank_line();
        self.block().align(8);
        let label = self.asm.make_label("_start");
        self.block().label(label);
        self.block()
            .move_op(OpSize::Qword, Operand::fp(), Operand::sp());
        // Bootstrap jumps here.
        self.asm.add_edge(0, block_id);
        true
    }

    /// Static-data initialization walk (`_initializer`): composites get a
    /// breadth-first field walk of stores relative to the variable's base
    /// address; plain globals re-store their literal values.
    fn emit_initializers(&mut self, groups: &vars::IdentifiersBySection) -> bool {
        let previous = self.current;
        let block_id = self.asm.make_basic_block();
        self.asm.add_edge(previous, block_id);
        self.current = block_id;
        self.block().blank_line();
        self.block().align(8);
        let label = self.asm.make_label("_initializer");
        self.block().label(label);

        self.push_frame(None);
        let reserve_at = self.block().entries.len();

        let mut to_init: Vec<ElementId> = Vec::new();
        for (_, identifiers) in groups.iter_sections() {
            for &identifier in identifiers {
                let Some(data) = self.elements[identifier].as_identifier() else {
                    continue;
                };
                let Some(type_id) = data
                    .type_ref
                    .and_then(|t| concrete_type(self.elements, t))
                else {
                    continue;
                };
                let composite = types::is_composite_type(self.elements, type_id);
                if data.is_constant && !composite {
                    continue;
                }
                if data.initializer.is_none() && !composite {
                    continue;
                }
                if self.initializer_is_uninitialized(identifier) {
                    continue;
                }
                if matches!(
                    self.elements[type_id].kind(),
                    ElementKind::ProcedureType
                ) {
                    continue;
                }
                to_init.push(identifier);
            }
        }

        // Base addresses first, then the stores.
        for &identifier in &to_init {
            let name = self.elements[identifier]
                .as_identifier()
                .map(|d| d.symbol.name.clone())
                .unwrap_or_default();
            self.register_local(&name, crate::abi::WORD_SIZE);
        }
        self.block().blank_line();
        for &identifier in &to_init {
            let name = self.elements[identifier]
                .as_identifier()
                .map(|d| d.symbol.name.clone())
                .unwrap_or_default();
            let label = self.elements[identifier].label_name();
            let dest = self.local_value(&name, OpSize::Qword);
            let source = self.asm.label_operand(&label);
            self.block().move_op(OpSize::Qword, dest, source);
        }
        for &identifier in &to_init {
            if !self.emit_variable_initializer(identifier) {
                return false;
            }
        }

        let frame_size = self.frame_reserve_size();
        if frame_size > 0 {
            self.asm.block_mut(block_id).entries.insert(
                reserve_at,
                crate::vm::assembler::BlockEntry::Instruction(Instruction::new(
                    OpCode::Sub,
                    OpSize::Qword,
                    vec![
                        Operand::sp(),
                        Operand::sp(),
                        Operand::imm(frame_size, OpSize::Qword),
                    ],
                )),
            );
            self.block()
                .move_op(OpSize::Qword, Operand::sp(), Operand::fp());
        }
        self.pop_frame();
        true
    }

    fn initializer_is_uninitialized(&self, identifier: ElementId) -> bool {
        self.elements[identifier]
            .as_identifier()
            .and_then(|d| d.initializer)
            .map(|init| match &self.elements[init].data {
                ElementData::Initializer {
                    expression: Some(expr),
                } => self.elements[*expr].kind() == ElementKind::UninitializedLiteral,
                _ => false,
            })
            .unwrap_or(false)
    }

    /// Breadth-first §4.10 walk: struct fields advance the running offset
    /// (re-aligned at each struct boundary), unions store only their first
    /// active variant, enums and primitives store one value.
    fn emit_variable_initializer(&mut self, identifier: ElementId) -> bool {
        let name = self.elements[identifier]
            .as_identifier()
            .map(|d| d.symbol.name.clone())
            .unwrap_or_default();
        let base = self.local_value(&name, OpSize::Qword);

        let mut queue: Vec<ElementId> = vec![identifier];
        let mut offset: u64 = 0;
        while !queue.is_empty() {
            let current = queue.remove(0);
            let Some(data) = self.elements[current].as_identifier() else {
                continue;
            };
            let Some(type_id) = data
                .type_ref
                .and_then(|t| concrete_type(self.elements, t))
            else {
                continue;
            };
            match &self.elements[type_id].data {
                ElementData::BoolType { .. }
                | ElementData::RuneType { .. }
                | ElementData::NumericType { .. }
                | ElementData::PointerType { .. }
                | ElementData::StringType { .. } => {
                    self.emit_primitive_initializer(current, type_id, &base, offset);
                    offset += types::size_of(self.elements, type_id);
                }
                ElementData::CompositeType(composite) | ElementData::TupleType(composite) => {
                    match composite.kind {
                        CompositeKind::Enum => {
                            self.emit_primitive_initializer(current, type_id, &base, offset);
                            offset += types::size_of(self.elements, type_id);
                        }
                        CompositeKind::Union => {
                            // First active variant only; statically a no-op.
                        }
                        CompositeKind::Struct => {
                            for (index, &field) in composite.fields.iter().enumerate() {
                                if let ElementData::Field { identifier, .. } =
                                    &self.elements[field].data
                                {
                                    queue.insert(index, *identifier);
                                }
                            }
                            offset = types::align_up(offset, composite.base.alignment.max(1));
                        }
                    }
                }
                _ => {}
            }
        }
        true
    }

    fn emit_primitive_initializer(
        &mut self,
        identifier: ElementId,
        type_id: ElementId,
        base: &Operand,
        offset: u64,
    ) {
        let Some(data) = self.elements[identifier].as_identifier() else {
            return;
        };
        let size = OpSize::from_byte_size(types::size_of(self.elements, type_id));

        // String values are a pointer to their interned descriptor.
        if self.elements[type_id].kind() == ElementKind::StringType {
            let symbol = data.symbol.name.clone();
            let value = match data.initializer.and_then(|init| self.interned_of(init)) {
                Some(intern_id) => {
                    let label = StringInternMap::descriptor_label(intern_id);
                    self.asm.label_operand(&label)
                }
                None => Operand::imm(0, OpSize::Qword),
            };
            self.block()
                .comment(format!("initializer: {}: string", symbol));
            self.block()
                .store(OpSize::Qword, base.clone(), value, offset as i64);
            return;
        }

        let is_rune = self.elements[type_id].kind() == ElementKind::RuneType;
        let default_value: u64 = if is_rune { '\u{fffd}' as u64 } else { 0 };

        let value = match data.initializer {
            Some(init) => match types::number_class(self.elements, type_id) {
                Some(NumberClass::FloatingPoint) => fold::constant_float(self.elements, init)
                    .map(|v| match size {
                        OpSize::Dword => (v as f32).to_bits() as u64,
                        _ => v.to_bits(),
                    })
                    .unwrap_or(default_value),
                _ => fold::constant_integer(self.elements, init)
                    .map(|v| v as i64 as u64)
                    .unwrap_or(default_value),
            },
            None => default_value,
        };

        let symbol = data.symbol.name.clone();
        let type_label = types::type_name(self.elements, type_id);
        self.block()
            .comment(format!("initializer: {}: {}", symbol, type_label));
        self.block().store(
            size,
            base.clone(),
            Operand::imm(value, size),
            offset as i64,
        );
    }

    /// One labeled block per non-empty module and namespace scope.
    fn emit_implicit_blocks(&mut self) -> bool {
        let mut scopes: Vec<(String, ElementId)> = Vec::new();
        let program = match self
            .elements
            .iter()
            .find(|e| e.kind() == ElementKind::Program)
        {
            Some(program) => program.id,
            None => return true,
        };
        if let ElementData::Program { modules, .. } = &self.elements[program].data {
            for &module in modules {
                if let ElementData::Module { name, scope } = &self.elements[module].data {
                    scopes.push((format!("module: {}", name), *scope));
                }
            }
        }
        for element in self.elements.iter() {
            if let ElementData::Namespace { name, scope } = &element.data {
                scopes.push((format!("namespace: {}", name), *scope));
            }
        }

        for (description, scope) in scopes {
            let has_statements = self.elements[scope]
                .as_block()
                .map(|b| !b.statements.is_empty())
                .unwrap_or(false);
            if !has_statements {
                continue;
            }
            let previous = self.current;
            let block_id = self.asm.make_basic_block();
            self.asm.add_edge(previous, block_id);
            self.current = block_id;
            self.block().blank_line();
            self.block().comment(description);
            let label = self.asm.make_label(self.elements[scope].label_name());
            self.block().label(label);

            self.push_frame(None);
            let reserve_at = self.block().entries.len();
            let outcome = self.emit_scope_block(scope);
            let frame_size = self.frame_reserve_size();
            if frame_size > 0 {
                self.asm.block_mut(block_id).entries.insert(
                    reserve_at,
                    crate::vm::assembler::BlockEntry::Instruction(Instruction::new(
                        OpCode::Sub,
                        OpSize::Qword,
                        vec![
                            Operand::sp(),
                            Operand::sp(),
                            Operand::imm(frame_size, OpSize::Qword),
                        ],
                    )),
                );
                self.block()
                    .move_op(OpSize::Qword, Operand::sp(), Operand::fp());
            }
            self.pop_frame();
            if outcome.is_err() {
                return false;
            }
        }
        true
    }

    /// `_finalizer` names composite globals for teardown symmetry; the
    /// body is a labeled no-op today.
    fn emit_finalizers(&mut self, groups: &vars::IdentifiersBySection) -> bool {
        let previous = self.current;
        let block_id = self.asm.make_basic_block();
        self.asm.add_edge(previous, block_id);
        self.current = block_id;
        self.block().blank_line();
        self.block().align(8);
        let label = self.asm.make_label("_finalizer");
        self.block().label(label);

        self.push_frame(None);
        for (_, identifiers) in groups.iter_sections() {
            for &identifier in identifiers {
                let Some(data) = self.elements[identifier].as_identifier() else {
                    continue;
                };
                let composite = data
                    .type_ref
                    .and_then(|t| concrete_type(self.elements, t))
                    .map(|t| types::is_composite_type(self.elements, t))
                    .unwrap_or(false);
                if !composite {
                    continue;
                }
                let name = data.symbol.name.clone();
                let type_label = data
                    .type_ref
                    .map(|t| types::type_name(self.elements, t))
                    .unwrap_or_default();
                self.register_local(&name, crate::abi::WORD_SIZE);
                self.block()
                    .comment(format!("finalizer: {}: {}", name, type_label));
            }
        }
        self.pop_frame();
        true
    }

    fn emit_end_block(&mut self) {
        let previous = self.current;
        let block_id = self.asm.make_basic_block();
        self.asm.add_edge(previous, block_id);
        self.current = block_id;
        self.block().blank_line();
        self.block().align(8);
        let label = self.asm.make_label("_end");
        self.block().label(label);
        self.block().exit();
    }
}
