// Purpose: Labeled basic blocks and the assembler surface the emitter writes into.
// Inputs/Outputs: Collects block entries (labels, instructions, data, locals) and renders listings.
// Invariants: Block list order is emission order; pred/succ edges are kept symmetric.
// Gotchas: Machine encoding happens downstream; this layer only records and prints.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::{Instruction, NamedRef, NamedRefKind, OpCode, OpSize, Operand, Section};

pub type BlockId = usize;

#[derive(Clone, Debug)]
pub struct DataDef {
    pub size: OpSize,
    pub values: Vec<DataValue>,
}

#[derive(Clone, Debug)]
pub enum DataValue {
    Int(u64),
    LabelRef(String),
}

#[derive(Clone, Debug)]
pub enum BlockEntry {
    Label(String),
    Instruction(Instruction),
    Data(DataDef),
    Reserve { size: OpSize, count: u64 },
    /// A string record: a descriptor label holding the length twice and a
    /// pointer to the data label, then the payload bytes.
    String {
        descriptor_label: String,
        data_label: String,
        value: String,
    },
    Local {
        name: String,
        offset: i64,
        size: OpSize,
    },
    Align(u64),
    Section(Section),
    Comment(String),
    BlankLine,
    Raw(String),
}

/// A maximal straight-line run of instructions with at most one terminator,
/// created during emission and owned by the assembler.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub entries: Vec<BlockEntry>,
    pub predecessors: Vec<BlockId>,
    pub successors: Vec<BlockId>,
}

impl BasicBlock {
    pub fn label(&mut self, name: impl Into<String>) {
        self.entries.push(BlockEntry::Label(name.into()));
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.entries.push(BlockEntry::Comment(text.into()));
    }

    pub fn blank_line(&mut self) {
        self.entries.push(BlockEntry::BlankLine);
    }

    pub fn align(&mut self, bytes: u64) {
        self.entries.push(BlockEntry::Align(bytes));
    }

    pub fn section(&mut self, section: Section) {
        self.entries.push(BlockEntry::Section(section));
    }

    pub fn local(&mut self, name: impl Into<String>, offset: i64, size: OpSize) {
        self.entries.push(BlockEntry::Local {
            name: name.into(),
            offset,
            size,
        });
    }

    pub fn data(&mut self, size: OpSize, values: Vec<DataValue>) {
        self.entries.push(BlockEntry::Data(DataDef { size, values }));
    }

    pub fn bytes(&mut self, values: Vec<u64>) {
        self.data(OpSize::Byte, values.into_iter().map(DataValue::Int).collect());
    }

    pub fn words(&mut self, values: Vec<u64>) {
        self.data(OpSize::Word, values.into_iter().map(DataValue::Int).collect());
    }

    pub fn dwords(&mut self, values: Vec<u64>) {
        self.data(OpSize::Dword, values.into_iter().map(DataValue::Int).collect());
    }

    pub fn qwords(&mut self, values: Vec<DataValue>) {
        self.data(OpSize::Qword, values);
    }

    pub fn reserve(&mut self, size: OpSize, count: u64) {
        self.entries.push(BlockEntry::Reserve { size, count });
    }

    pub fn string(
        &mut self,
        descriptor_label: impl Into<String>,
        data_label: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.entries.push(BlockEntry::String {
            descriptor_label: descriptor_label.into(),
            data_label: data_label.into(),
            value: value.into(),
        });
    }

    pub fn push_instruction(&mut self, instruction: Instruction) {
        self.entries.push(BlockEntry::Instruction(instruction));
    }

    pub fn op(&mut self, op: OpCode, size: OpSize, operands: Vec<Operand>) {
        self.push_instruction(Instruction::new(op, size, operands));
    }

    pub fn nop(&mut self) {
        self.op(OpCode::Nop, OpSize::Qword, vec![]);
    }

    pub fn move_op(&mut self, size: OpSize, dest: Operand, src: Operand) {
        self.op(OpCode::Move, size, vec![dest, src]);
    }

    pub fn moves(&mut self, size: OpSize, dest: Operand, src: Operand) {
        self.op(OpCode::Moves, size, vec![dest, src]);
    }

    pub fn movez(&mut self, size: OpSize, dest: Operand, src: Operand) {
        self.op(OpCode::Movez, size, vec![dest, src]);
    }

    pub fn convert(&mut self, size: OpSize, dest: Operand, src: Operand) {
        self.op(OpCode::Convert, size, vec![dest, src]);
    }

    pub fn clr(&mut self, size: OpSize, dest: Operand) {
        self.op(OpCode::Clr, size, vec![dest]);
    }

    pub fn load(&mut self, size: OpSize, dest: Operand, address: Operand, offset: i64) {
        let mut operands = vec![dest, address];
        if offset != 0 {
            operands.push(Operand::imm(offset as u64, OpSize::Qword));
        }
        self.op(OpCode::Load, size, operands);
    }

    pub fn store(&mut self, size: OpSize, address: Operand, value: Operand, offset: i64) {
        let mut operands = vec![address, value];
        if offset != 0 {
            operands.push(Operand::imm(offset as u64, OpSize::Qword));
        }
        self.op(OpCode::Store, size, operands);
    }

    /// Byte-wise copy of `length` bytes between two addresses.
    pub fn copy(&mut self, dest: Operand, src: Operand, length: u64) {
        self.op(
            OpCode::Copy,
            OpSize::Byte,
            vec![dest, src, Operand::imm(length, OpSize::Qword)],
        );
    }

    pub fn push(&mut self, size: OpSize, value: Operand) {
        self.op(OpCode::Push, size, vec![value]);
    }

    pub fn pop(&mut self, size: OpSize, dest: Operand) {
        self.op(OpCode::Pop, size, vec![dest]);
    }

    pub fn cmp(&mut self, size: OpSize, lhs: Operand, rhs: Operand) {
        self.op(OpCode::Cmp, size, vec![lhs, rhs]);
    }

    pub fn setcc(&mut self, op: OpCode, dest: Operand) {
        self.op(op, OpSize::Byte, vec![dest]);
    }

    pub fn bz(&mut self, value: Operand, target: Operand) {
        self.op(OpCode::Bz, OpSize::Qword, vec![value, target]);
    }

    pub fn bnz(&mut self, value: Operand, target: Operand) {
        self.op(OpCode::Bnz, OpSize::Qword, vec![value, target]);
    }

    pub fn bne(&mut self, target: Operand) {
        self.op(OpCode::Bne, OpSize::Qword, vec![target]);
    }

    pub fn jmp(&mut self, target: Operand) {
        self.op(OpCode::Jmp, OpSize::Qword, vec![target]);
    }

    pub fn jsr(&mut self, target: Operand) {
        self.op(OpCode::Jsr, OpSize::Qword, vec![target]);
    }

    pub fn rts(&mut self) {
        self.op(OpCode::Rts, OpSize::Qword, vec![]);
    }

    pub fn exit(&mut self) {
        self.op(OpCode::Exit, OpSize::Qword, vec![]);
    }

    pub fn ffi(&mut self, address: Operand, signature_id: Option<u64>) {
        let mut operands = vec![address];
        if let Some(id) = signature_id {
            operands.push(Operand::imm(id, OpSize::Qword));
        }
        self.op(OpCode::Ffi, OpSize::Qword, operands);
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.entries.iter().filter_map(|entry| match entry {
            BlockEntry::Instruction(inst) => Some(inst),
            _ => None,
        })
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            BlockEntry::Label(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// A block ends hard when its last instruction never falls through.
    pub fn is_terminated(&self) -> bool {
        self.instructions()
            .last()
            .map(|inst| matches!(inst.op, OpCode::Jmp | OpCode::Rts | OpCode::Exit))
            .unwrap_or(false)
    }
}

#[derive(Default)]
pub struct Assembler {
    blocks: Vec<BasicBlock>,
    labels: HashSet<String>,
}

impl Assembler {
    pub fn make_basic_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock {
            id,
            ..BasicBlock::default()
        });
        id
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id]
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Register a label name and hand it back for use in a block entry.
    pub fn make_label(&mut self, name: impl Into<String>) -> String {
        let name = name.into();
        self.labels.insert(name.clone());
        name
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains(name)
    }

    pub fn make_named_ref(&self, kind: NamedRefKind, name: impl Into<String>, size: OpSize) -> NamedRef {
        NamedRef {
            kind,
            name: name.into(),
            size,
        }
    }

    pub fn label_operand(&self, name: impl Into<String>) -> Operand {
        Operand::named(NamedRef {
            kind: NamedRefKind::Label,
            name: name.into(),
            size: OpSize::Qword,
        })
    }

    pub fn local_operand(&self, name: impl Into<String>, size: OpSize) -> Operand {
        Operand::named(NamedRef {
            kind: NamedRefKind::Local,
            name: name.into(),
            size,
        })
    }

    /// Mirror one control-flow edge into both endpoints.
    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from].successors.contains(&to) {
            self.blocks[from].successors.push(to);
        }
        if !self.blocks[to].predecessors.contains(&from) {
            self.blocks[to].predecessors.push(from);
        }
    }

    /// Pred/succ lists agree pairwise across the whole block list.
    pub fn edges_are_symmetric(&self) -> bool {
        for block in &self.blocks {
            for &succ in &block.successors {
                if !self.blocks[succ].predecessors.contains(&block.id) {
                    return false;
                }
            }
            for &pred in &block.predecessors {
                if !self.blocks[pred].successors.contains(&block.id) {
                    return false;
                }
            }
        }
        true
    }

    /// Splice raw VM source lines into a block, one entry per line.
    pub fn assemble_from_source(&mut self, block: BlockId, source: &str) {
        for line in source.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.blocks[block].entries.push(BlockEntry::Raw(line.to_string()));
        }
    }

    /// Human-readable listing of every block in emission order.
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            for entry in &block.entries {
                match entry {
                    BlockEntry::Label(name) => {
                        let _ = writeln!(out, "{}:", name);
                    }
                    BlockEntry::Instruction(inst) => {
                        let _ = writeln!(out, "    {}", inst);
                    }
                    BlockEntry::Data(def) => {
                        let directive = match def.size {
                            OpSize::Byte => ".byte",
                            OpSize::Word => ".word",
                            OpSize::Dword => ".dword",
                            OpSize::Qword => ".qword",
                        };
                        let rendered: Vec<String> = def
                            .values
                            .iter()
                            .map(|v| match v {
                                DataValue::Int(value) => value.to_string(),
                                DataValue::LabelRef(name) => name.clone(),
                            })
                            .collect();
                        let _ = writeln!(out, "    {} {}", directive, rendered.join(", "));
                    }
                    BlockEntry::Reserve { size, count } => {
                        let _ = writeln!(out, "    .reserve {} * {}", size.byte_size(), count);
                    }
                    BlockEntry::String {
                        descriptor_label,
                        data_label,
                        value,
                    } => {
                        let _ = writeln!(out, "{}:", descriptor_label);
                        let _ = writeln!(out, "    .dword {}", value.len());
                        let _ = writeln!(out, "    .dword {}", value.len());
                        let _ = writeln!(out, "    .qword {}", data_label);
                        let _ = writeln!(out, "{}:", data_label);
                        let _ = writeln!(out, "    .string \"{}\"", value.escape_default());
                    }
                    BlockEntry::Local { name, offset, size } => {
                        let _ = writeln!(
                            out,
                            "    .local {} fp{:+} ({})",
                            name,
                            offset,
                            size.byte_size()
                        );
                    }
                    BlockEntry::Align(bytes) => {
                        let _ = writeln!(out, "    .align {}", bytes);
                    }
                    BlockEntry::Section(section) => {
                        let _ = writeln!(out, ".section {}", section.name());
                    }
                    BlockEntry::Comment(text) => {
                        let _ = writeln!(out, "    ; {}", text);
                    }
                    BlockEntry::BlankLine => {
                        out.push('\n');
                    }
                    BlockEntry::Raw(line) => {
                        let _ = writeln!(out, "    {}", line);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_stay_symmetric() {
        let mut asm = Assembler::default();
        let a = asm.make_basic_block();
        let b = asm.make_basic_block();
        asm.add_edge(a, b);
        assert!(asm.edges_are_symmetric());
        assert_eq!(asm.block(a).successors, vec![b]);
        assert_eq!(asm.block(b).predecessors, vec![a]);
    }

    #[test]
    fn listing_renders_string_records() {
        let mut asm = Assembler::default();
        let id = asm.make_basic_block();
        let descriptor = asm.make_label("_intern_str_lit_0");
        let data = asm.make_label("_intern_str_lit_0_data");
        asm.block_mut(id).string(descriptor, data, "hi");
        let listing = asm.listing();
        assert!(listing.contains("_intern_str_lit_0:"));
        assert!(listing.contains("_intern_str_lit_0_data:"));
        assert!(listing.contains(".string \"hi\""));
    }

    #[test]
    fn raw_source_splices_per_line() {
        let mut asm = Assembler::default();
        let id = asm.make_basic_block();
        asm.assemble_from_source(id, "nop\n\n  move.qw sp, fp\n");
        let raw: Vec<_> = asm
            .block(id)
            .entries
            .iter()
            .filter(|e| matches!(e, BlockEntry::Raw(_)))
            .collect();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn terminator_detection() {
        let mut asm = Assembler::default();
        let id = asm.make_basic_block();
        assert!(!asm.block(id).is_terminated());
        let target = asm.label_operand("_end");
        asm.block_mut(id).jmp(target);
        assert!(asm.block(id).is_terminated());
    }
}
