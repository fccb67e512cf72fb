//! Shared helpers for the integration tests: programmatic AST construction
//! and a one-call compile pipeline over a fresh session.

// Not every test file uses every helper.
#![allow(dead_code)]

use basecode::frontend::ast::{AstBuilder, AstNode};
use basecode::vm::assembler::Assembler;
use basecode::vm::ffi::Ffi;
use basecode::{Session, SessionOptions};

pub struct Compiled {
    pub session: Session,
    pub asm: Assembler,
    pub ffi: Ffi,
    pub ok: bool,
}

impl Compiled {
    pub fn listing(&self) -> String {
        self.asm.listing()
    }

    pub fn messages(&self) -> String {
        self.session
            .result
            .items
            .iter()
            .map(|d| format!("{}: {}", d.code, d.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn compile(ast: AstNode) -> Compiled {
    compile_with(ast, |_| {})
}

pub fn compile_with(ast: AstNode, setup: impl FnOnce(&mut Ffi)) -> Compiled {
    let mut session = Session::new(SessionOptions::default());
    let mut asm = Assembler::default();
    let mut ffi = Ffi::default();
    setup(&mut ffi);
    let ok = session.compile(std::slice::from_ref(&ast), &mut asm, &mut ffi);
    Compiled {
        session,
        asm,
        ffi,
        ok,
    }
}

/// Locate a declared identifier anywhere in the element graph.
pub fn find_identifier(session: &Session, name: &str) -> Option<basecode::sema::ElementId> {
    session
        .elements()
        .iter()
        .find(|e| {
            e.as_identifier()
                .map(|data| data.symbol.name == name)
                .unwrap_or(false)
        })
        .map(|e| e.id)
}

/// Locate a named composite type anywhere in the element graph.
pub fn find_composite(session: &Session, name: &str) -> Option<basecode::sema::ElementId> {
    session
        .elements()
        .iter()
        .find(|e| {
            e.as_composite().is_some()
                && e.type_base().map(|b| b.name == name).unwrap_or(false)
        })
        .map(|e| e.id)
}

/// `name: type` declaration statement.
pub fn typed_decl(b: &mut AstBuilder, name: &str, type_name: &str) -> AstNode {
    let target = b.typed_symbol(&[name], type_name);
    let decl = b.declaration(target);
    b.statement(decl)
}

/// `name := value` declaration statement.
pub fn init_decl(b: &mut AstBuilder, name: &str, value: AstNode) -> AstNode {
    let target = b.symbol(&[name]);
    let assign = b.assignment(target, value);
    b.statement(assign)
}

/// `Point :: struct { x: s32, y: s32 }` statement.
pub fn point_struct(b: &mut AstBuilder) -> AstNode {
    let x = {
        let target = b.typed_symbol(&["x"], "s32");
        b.declaration(target)
    };
    let y = {
        let target = b.typed_symbol(&["y"], "s32");
        b.declaration(target)
    };
    let body = b.statement_body(vec![x, y]);
    let struct_expr = b.struct_expression(body);
    let target = b.symbol(&["Point"]);
    let decl = b.constant_assignment(target, struct_expr);
    b.statement(decl)
}

/// `name :: proc() { body }` plus a call statement so the procedure is
/// reachable from the module's call graph.
pub fn proc_with_call(b: &mut AstBuilder, name: &str, body: Vec<AstNode>) -> Vec<AstNode> {
    let body = b.statement_body(body);
    let proc_expr = b.proc_expression(Vec::new(), Vec::new(), Some(body));
    let target = b.symbol(&[name]);
    let decl = b.constant_assignment(target, proc_expr);
    let decl_stmt = b.statement(decl);
    let callee = b.symbol(&[name]);
    let call = b.proc_call(callee, Vec::new());
    let call_stmt = b.statement(call);
    vec![decl_stmt, call_stmt]
}
