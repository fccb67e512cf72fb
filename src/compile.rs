use log::debug;

use crate::codegen;
use crate::frontend::ast::AstNode;
use crate::frontend::diagnostic::Diagnostics;
use crate::sema::builder::{CoreTypes, ElementBuilder};
use crate::sema::element::{ElementData, ElementId, ElementMap};
use crate::sema::eval::AstEvaluator;
use crate::sema::intern::StringInternMap;
use crate::sema::scope::ScopeManager;
use crate::sema::{fold, resolve};
use crate::vm::assembler::Assembler;
use crate::vm::ffi::Ffi;

#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Emit comments and blank lines into the listing.
    pub verbose: bool,
    /// Upper bound on statement-scoped temporaries per frame.
    pub max_temporaries: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            max_temporaries: 64,
        }
    }
}

/// One compilation unit: drives parsing collaborators' output through the
/// pass pipeline and aggregates the coded result. The assembler and FFI
/// registry are external and passed to `emit` explicitly.
pub struct Session {
    pub options: SessionOptions,
    pub builder: ElementBuilder,
    pub scopes: ScopeManager,
    pub core: CoreTypes,
    pub result: Diagnostics,
    pub interns: StringInternMap,
    pub program: ElementId,
    pub root_block: ElementId,
    pub(crate) unresolved_references: Vec<ElementId>,
    pub(crate) unknown_type_identifiers: Vec<ElementId>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        let mut builder = ElementBuilder::default();
        let program = builder.make_program();
        let root_block = match &builder.elements()[program].data {
            ElementData::Program { block, .. } => *block,
            _ => unreachable!("program element owns its root block"),
        };
        let core = CoreTypes::initialize(&mut builder, root_block);
        let scopes = ScopeManager::new(root_block);
        Self {
            options,
            builder,
            scopes,
            core,
            result: Diagnostics::default(),
            interns: StringInternMap::default(),
            program,
            root_block,
            unresolved_references: Vec::new(),
            unknown_type_identifiers: Vec::new(),
        }
    }

    pub fn elements(&self) -> &ElementMap {
        self.builder.elements()
    }

    /// Phase 1: evaluate one module's AST into the element graph.
    pub fn compile_module(&mut self, ast: &AstNode) -> Option<ElementId> {
        let mut evaluator = AstEvaluator::new(self);
        let module = evaluator.evaluate(ast);
        debug!(
            "evaluated module: {} elements, {} unresolved refs, {} unknown types",
            self.builder.elements().len(),
            self.unresolved_references.len(),
            self.unknown_type_identifiers.len()
        );
        module
    }

    /// Phases 2-5: identifier resolution, type resolution, type check,
    /// constant folding. Stops at the first failed phase boundary.
    pub fn resolve(&mut self) -> bool {
        if self.result.is_failed() {
            return false;
        }
        if !resolve::resolve_unknown_identifiers(self) {
            return false;
        }
        if !resolve::resolve_unknown_types(self) {
            return false;
        }
        if !resolve::type_check(self) {
            return false;
        }
        let Session {
            ref mut builder,
            ref scopes,
            ref core,
            ..
        } = *self;
        fold::fold_constants(builder, scopes, core);
        !self.result.is_failed()
    }

    /// Phase 6: byte-code emission into the caller's assembler.
    pub fn emit(&mut self, asm: &mut Assembler, ffi: &mut Ffi) -> bool {
        if self.result.is_failed() {
            return false;
        }
        let ok = codegen::emit_program(self, asm, ffi);
        if self.options.verbose {
            debug!("listing:\n{}", asm.listing());
        }
        ok
    }

    /// Run the whole pipeline over a set of module ASTs.
    pub fn compile(&mut self, modules: &[AstNode], asm: &mut Assembler, ffi: &mut Ffi) -> bool {
        for module in modules {
            self.compile_module(module);
        }
        if self.result.is_failed() {
            return false;
        }
        if !self.resolve() {
            return false;
        }
        self.emit(asm, ffi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sema::element::ElementKind;

    #[test]
    fn new_session_registers_core_types() {
        let session = Session::new(SessionOptions::default());
        let root = session.root_block;
        let types = session.elements()[root]
            .as_block()
            .map(|b| b.types.len())
            .unwrap_or(0);
        // 11 numerics + bool + rune + string + any.
        assert!(types >= 15, "expected core types registered, got {}", types);
    }

    #[test]
    fn program_owns_the_root_block() {
        let session = Session::new(SessionOptions::default());
        assert_eq!(
            session.elements()[session.program].kind(),
            ElementKind::Program
        );
        let owned = session.elements().owned_elements(session.program);
        assert!(owned.contains(&session.root_block));
    }
}
