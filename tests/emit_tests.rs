mod common;

use basecode::frontend::ast::AstBuilder;

use common::{
    compile, compile_with, find_composite, init_decl, point_struct, proc_with_call, typed_decl,
};

#[test]
fn hello_world_layout() {
    let mut b = AstBuilder::new();
    let s_decl = {
        let value = b.string("hi");
        init_decl(&mut b, "s", value)
    };
    let print_decl = {
        let param = b.typed_symbol(&["text"], "string");
        let proc_expr = b.proc_expression(vec![param], Vec::new(), None);
        let target = b.symbol(&["print"]);
        let assign = b.constant_assignment(target, proc_expr);
        let directive = b.directive("foreign", Some(assign), None);
        b.statement(directive)
    };
    let call = {
        let callee = b.symbol(&["print"]);
        let arg = b.symbol(&["s"]);
        let call = b.proc_call(callee, vec![arg]);
        b.statement(call)
    };
    let module = b.module(vec![s_decl, print_decl, call]);

    let compiled = compile_with(module, |ffi| {
        ffi.register_function("print", false);
    });
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    assert!(listing.contains("_intern_str_lit_0_data:"), "{}", listing);
    assert!(listing.contains(".string \"hi\""), "{}", listing);
    assert!(listing.contains("_start:"), "{}", listing);
    assert!(listing.contains("ffi.qw"), "{}", listing);
    assert!(listing.contains("_end:"), "{}", listing);
    assert!(listing.contains("exit.qw"), "{}", listing);

    // Emission order is observable through the label sequence.
    let start = listing.find("_start:").unwrap();
    let end = listing.find("_end:").unwrap();
    let call_site = listing.find("ffi.qw").unwrap();
    let strings = listing.find("_intern_str_lit_0:").unwrap();
    assert!(strings < start);
    assert!(start < call_site);
    assert!(call_site < end);
}

#[test]
fn composite_assignment_copies_bytes() {
    let mut b = AstBuilder::new();
    let point = point_struct(&mut b);
    let a_decl = typed_decl(&mut b, "a", "Point");
    let b_decl = typed_decl(&mut b, "b", "Point");
    let copy = {
        let target = b.symbol(&["b"]);
        let source = b.symbol(&["a"]);
        let assign = b.assignment(target, source);
        b.statement(assign)
    };
    let module = b.module(vec![point, a_decl, b_decl, copy]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let point_type = find_composite(&compiled.session, "Point").expect("Point resolved");
    let base = compiled.session.elements()[point_type]
        .type_base()
        .expect("type base");
    assert_eq!(base.size_in_bytes, 8);

    // One byte-wise copy of 8 bytes, not two scalar stores.
    let listing = compiled.listing();
    let copy_line = listing
        .lines()
        .find(|line| line.trim_start().starts_with("copy.b"))
        .unwrap_or_else(|| panic!("no copy instruction in:\n{}", listing));
    assert!(copy_line.trim_end().ends_with(", 8"), "{}", copy_line);
}

#[test]
fn logical_and_short_circuits_into_one_temporary() {
    let mut b = AstBuilder::new();
    let x_decl = typed_decl(&mut b, "x", "s32");
    let y_decl = typed_decl(&mut b, "y", "s32");
    let body_stmt = {
        let x = b.symbol(&["x"]);
        let zero = b.number(0);
        let left = b.binary(">", x, zero);
        let y = b.symbol(&["y"]);
        let zero = b.number(0);
        let right = b.binary(">", y, zero);
        let and = b.binary("and", left, right);
        init_decl(&mut b, "ok", and)
    };
    let mut statements = vec![x_decl, y_decl];
    statements.extend(proc_with_call(&mut b, "check", vec![body_stmt]));
    let module = b.module(statements);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    let setg_count = listing.matches("setg.b t0").count();
    assert_eq!(setg_count, 2, "expected both sides in t0:\n{}", listing);
    assert!(listing.contains("bz.qw t0"), "{}", listing);

    let first = listing.find("setg.b t0").unwrap();
    let branch = listing.find("bz.qw t0").unwrap();
    let second = listing.rfind("setg.b t0").unwrap();
    assert!(first < branch && branch < second);
}

#[test]
fn descending_inclusive_range_uses_ge_and_sub() {
    let mut b = AstBuilder::new();
    let loop_stmt = {
        let induction = b.symbol(&["i"]);
        let callee = b.symbol(&["range"]);
        let start = b.number(10);
        let stop = b.number(0);
        let dir_value = b.number(1);
        let dir = b.named_argument("dir", dir_value);
        let kind_value = b.number(0);
        let kind = b.named_argument("kind", kind_value);
        let range = b.proc_call(callee, vec![start, stop, dir, kind]);
        let body = b.statement_body(Vec::new());
        let for_in = b.for_in_statement(induction, range, body);
        b.statement(for_in)
    };
    let module = b.module(vec![loop_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    assert!(listing.contains("setae.b"), "{}", listing);
    assert!(listing.contains("sub.b i, i, 1"), "{}", listing);
}

#[test]
fn ascending_exclusive_range_uses_lt_and_add() {
    let mut b = AstBuilder::new();
    let loop_stmt = {
        let induction = b.symbol(&["i"]);
        let callee = b.symbol(&["range"]);
        let start = b.number(0);
        let stop = b.number(3);
        let range = b.proc_call(callee, vec![start, stop]);
        let body = b.statement_body(Vec::new());
        let for_in = b.for_in_statement(induction, range, body);
        b.statement(for_in)
    };
    let module = b.module(vec![loop_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    assert!(listing.contains("setb.b"), "{}", listing);
    assert!(listing.contains("add.b i, i, 1"), "{}", listing);
}

#[test]
fn widening_signed_cast_sign_extends() {
    let mut b = AstBuilder::new();
    let body = vec![
        typed_decl(&mut b, "narrow", "s8"),
        {
            let type_id = b.type_identifier("s64");
            let operand = b.symbol(&["narrow"]);
            let cast = b.cast(type_id, operand);
            init_decl(&mut b, "wide", cast)
        },
    ];
    let statements = proc_with_call(&mut b, "widen", body);
    let module = b.module(statements);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    assert!(listing.contains("moves.qw"), "expected sign-extend:\n{}", listing);
    assert!(!listing.contains("movez.qw"), "{}", listing);
}

#[test]
fn member_access_through_pointer_loads_with_field_offset() {
    let mut b = AstBuilder::new();
    let point = point_struct(&mut b);
    let p_decl = {
        let target = b.pointer_typed_symbol(&["p"], "Point");
        let decl = b.declaration(target);
        b.statement(decl)
    };
    let body = vec![{
        let base = b.symbol(&["p"]);
        let access = b.member_access(base, "y");
        init_decl(&mut b, "v", access)
    }];
    let mut statements = vec![point, p_decl];
    statements.extend(proc_with_call(&mut b, "read", body));
    let module = b.module(statements);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    // The pointer steps once to its base, then the load applies the
    // field's offset from the (address, offset) pair.
    let listing = compiled.listing();
    let field_load = listing
        .lines()
        .find(|line| line.trim_start().starts_with("load.dw") && line.trim_end().ends_with(", 4"));
    assert!(field_load.is_some(), "{}", listing);
}

#[test]
fn switch_cases_compare_and_fallthrough_chains() {
    let mut b = AstBuilder::new();
    let x_decl = typed_decl(&mut b, "x", "s32");
    let switch_stmt = {
        let one = b.number(1);
        let one_body = {
            let fall = b.fallthrough();
            let stmt = b.statement(fall);
            b.statement_body(vec![stmt])
        };
        let case_one = b.case_expression(Some(one), one_body);
        let two = b.number(2);
        let two_body = b.statement_body(Vec::new());
        let case_two = b.case_expression(Some(two), two_body);
        let default_body = b.statement_body(Vec::new());
        let default_case = b.case_expression(None, default_body);
        let scrutinee = b.symbol(&["x"]);
        let switch = b.switch_expression(scrutinee, vec![case_one, case_two, default_case]);
        b.statement(switch)
    };
    let module = b.module(vec![x_decl, switch_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    let listing = compiled.listing();
    assert!(listing.contains("bne.qw"), "{}", listing);
    // fallthrough jumps to the next case's true label.
    let fallthrough_jump = listing
        .lines()
        .any(|line| line.contains("jmp.qw case_") && line.trim_end().ends_with("_true"));
    assert!(fallthrough_jump, "{}", listing);
}

#[test]
fn break_targets_the_innermost_frame() {
    let mut b = AstBuilder::new();
    let x_decl = typed_decl(&mut b, "x", "s32");
    let switch_stmt = {
        let inner_break = {
            let br = b.break_statement(None);
            b.statement(br)
        };
        let loop_body = b.statement_body(vec![inner_break]);
        let induction = b.symbol(&["i"]);
        let callee = b.symbol(&["range"]);
        let start = b.number(0);
        let stop = b.number(3);
        let range = b.proc_call(callee, vec![start, stop]);
        let for_in = b.for_in_statement(induction, range, loop_body);
        let for_stmt = b.statement(for_in);
        let case_body = b.statement_body(vec![for_stmt]);
        let one = b.number(1);
        let case = b.case_expression(Some(one), case_body);
        let scrutinee = b.symbol(&["x"]);
        let switch = b.switch_expression(scrutinee, vec![case]);
        b.statement(switch)
    };
    let module = b.module(vec![x_decl, switch_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    // break inside the for leaves the for, not the switch.
    let listing = compiled.listing();
    let break_jump = listing
        .lines()
        .any(|line| line.contains("jmp.qw for_") && line.trim_end().ends_with("_exit"));
    assert!(break_jump, "{}", listing);
}

#[test]
fn while_loop_wires_a_back_edge() {
    let mut b = AstBuilder::new();
    let x_decl = typed_decl(&mut b, "x", "s32");
    let while_stmt = {
        let x = b.symbol(&["x"]);
        let zero = b.number(0);
        let predicate = b.binary(">", x, zero);
        let assign = {
            let target = b.symbol(&["x"]);
            let x_again = b.symbol(&["x"]);
            let one = b.number(1);
            let minus = b.binary("-", x_again, one);
            b.assignment(target, minus)
        };
        let body = b.statement_body(vec![assign]);
        let while_node = b.while_statement(predicate, body);
        b.statement(while_node)
    };
    let module = b.module(vec![x_decl, while_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());
    assert!(compiled.asm.edges_are_symmetric());

    let listing = compiled.listing();
    let back_jump = listing
        .lines()
        .any(|line| line.contains("jmp.qw while_") && line.trim_end().ends_with("_entry"));
    assert!(back_jump, "{}", listing);
}

#[test]
fn defers_replay_in_lifo_order_at_scope_exit() {
    let mut b = AstBuilder::new();
    let body = vec![
        typed_decl(&mut b, "a", "s32"),
        {
            let target = b.symbol(&["a"]);
            let one = b.number(1);
            let assign = b.assignment(target, one);
            let defer = b.defer_expression(assign);
            b.statement(defer)
        },
        {
            let target = b.symbol(&["a"]);
            let two = b.number(2);
            let assign = b.assignment(target, two);
            let defer = b.defer_expression(assign);
            b.statement(defer)
        },
    ];
    let statements = proc_with_call(&mut b, "cleanup", body);
    let module = b.module(statements);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());

    // LIFO: the `2` store lands before the `1` store.
    let listing = compiled.listing();
    let store_two = listing.find("move.dw a, 2").unwrap_or_else(|| {
        panic!("missing deferred store of 2:\n{}", listing)
    });
    let store_one = listing
        .find("move.dw a, 1")
        .unwrap_or_else(|| panic!("missing deferred store of 1:\n{}", listing));
    assert!(store_two < store_one, "{}", listing);
}

#[test]
fn emitted_blocks_keep_edge_symmetry_and_order() {
    let mut b = AstBuilder::new();
    let x_decl = typed_decl(&mut b, "x", "s32");
    let if_stmt = {
        let x = b.symbol(&["x"]);
        let zero = b.number(0);
        let predicate = b.binary(">", x, zero);
        let assign = {
            let target = b.symbol(&["x"]);
            let one = b.number(1);
            b.assignment(target, one)
        };
        let true_body = b.statement_body(vec![assign]);
        let else_assign = {
            let target = b.symbol(&["x"]);
            let two = b.number(2);
            b.assignment(target, two)
        };
        let else_body = b.statement_body(vec![else_assign]);
        let else_node = b.else_expression(else_body);
        let if_node = b.if_expression(predicate, true_body, Some(else_node));
        b.statement(if_node)
    };
    let module = b.module(vec![x_decl, if_stmt]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());
    assert!(compiled.asm.edges_are_symmetric());

    let listing = compiled.listing();
    let ti_array = listing.find("_ti_array:").unwrap();
    let interns_or_sections = listing.find(".section").unwrap();
    let start = listing.find("_start:").unwrap();
    let end = listing.find("_end:").unwrap();
    assert!(interns_or_sections < start);
    assert!(ti_array < start);
    assert!(start < end);
}
