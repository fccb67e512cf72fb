mod common;

use basecode::frontend::ast::AstBuilder;
use basecode::frontend::diagnostic::{
    C_INVALID_CAST, P_INTRINSIC_ARITY, P_INVALID_BREAK_CONTINUE, P_TYPE_MISMATCH,
    P_UNRESOLVED_IDENTIFIER, P_UNRESOLVED_TYPE,
};
use basecode::sema::infer::TypeInference;
use basecode::sema::types;
use basecode::{Session, SessionOptions};

use common::{compile, find_identifier, init_decl, point_struct, typed_decl};

#[test]
fn resolution_is_idempotent() {
    let mut b = AstBuilder::new();
    let x_decl = {
        let one = b.number(1);
        init_decl(&mut b, "x", one)
    };
    let y_decl = {
        let x = b.symbol(&["x"]);
        let one = b.number(1);
        let sum = b.binary("+", x, one);
        init_decl(&mut b, "y", sum)
    };
    let module = b.module(vec![x_decl, y_decl]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve(), "first resolution failed");

    let ids_before = session.elements().ids();
    let messages_before = session.result.items.len();

    assert!(session.resolve(), "second resolution failed");
    assert_eq!(session.elements().ids(), ids_before);
    assert_eq!(session.result.items.len(), messages_before);
}

#[test]
fn element_map_closure_reaches_every_element_once() {
    let mut b = AstBuilder::new();
    let point = point_struct(&mut b);
    let p_decl = typed_decl(&mut b, "p", "Point");
    let module = b.module(vec![point, p_decl]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve(), "resolution failed");

    let map = session.elements();
    for element in map.iter() {
        assert_eq!(map[element.id].id, element.id);
    }

    let closure = map.owned_closure(session.program);
    let mut sorted = closure.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), closure.len(), "duplicate ownership");
    // Everything but the program root itself is owned.
    assert_eq!(closure.len(), map.len() - 1);
}

#[test]
fn resolved_references_carry_their_symbol() {
    let mut b = AstBuilder::new();
    let x_decl = {
        let seven = b.number(7);
        init_decl(&mut b, "x", seven)
    };
    let y_decl = {
        let x = b.symbol(&["x"]);
        init_decl(&mut b, "y", x)
    };
    let module = b.module(vec![x_decl, y_decl]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve());

    let map = session.elements();
    for element in map.iter() {
        if let basecode::sema::element::ElementData::IdentifierReference {
            symbol,
            identifier: Some(identifier),
        } = &element.data
        {
            let referent = map[*identifier].as_identifier().expect("identifier");
            assert_eq!(referent.symbol.name, symbol.name);
        }
    }
}

#[test]
fn type_check_is_reflexive_for_every_core_type() {
    let session = Session::new(SessionOptions::default());
    let map = session.elements();
    let mut core: Vec<_> = session
        .core
        .numerics
        .iter()
        .map(|(_, id)| *id)
        .collect();
    core.push(session.core.bool_type);
    core.push(session.core.rune_type);
    core.push(session.core.string_type);
    for type_id in core {
        assert!(types::type_check(
            map,
            type_id,
            type_id,
            types::TypeCheckOptions::default()
        ));
    }
}

#[test]
fn inference_is_pure() {
    let mut b = AstBuilder::new();
    let x_decl = {
        let value = b.number(300);
        init_decl(&mut b, "x", value)
    };
    let module = b.module(vec![x_decl]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve());

    let identifier = find_identifier(&session, "x").expect("x resolved");
    let map = session.elements();
    let inference = TypeInference {
        map,
        scopes: &session.scopes,
        core: &session.core,
    };
    let first = inference.infer(identifier);
    let second = inference.infer(identifier);
    assert_eq!(first, second);
    assert_eq!(first, session.core.numeric("u16"));
}

#[test]
fn unknown_identifier_reports_p004_with_a_suggestion() {
    let mut b = AstBuilder::new();
    let count_decl = {
        let one = b.number(1);
        init_decl(&mut b, "count", one)
    };
    let use_typo = {
        let typo = b.symbol(&["cout"]);
        init_decl(&mut b, "copy_of", typo)
    };
    let module = b.module(vec![count_decl, use_typo]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());
    let diag = session
        .result
        .find_code(P_UNRESOLVED_IDENTIFIER)
        .expect("P004 reported");
    assert!(
        diag.help.as_deref().unwrap_or("").contains("count"),
        "expected suggestion, got {:?}",
        diag.help
    );
}

#[test]
fn unresolvable_type_reports_p005() {
    let mut b = AstBuilder::new();
    let decl = typed_decl(&mut b, "mystery", "Widget");
    let module = b.module(vec![decl]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());
    assert!(session.result.has_code(P_UNRESOLVED_TYPE));
}

#[test]
fn assigning_incompatible_types_reports_p019() {
    let mut b = AstBuilder::new();
    let n_decl = typed_decl(&mut b, "n", "s32");
    let s_decl = {
        let text = b.string("text");
        init_decl(&mut b, "s", text)
    };
    let bad = {
        let target = b.symbol(&["n"]);
        let source = b.symbol(&["s"]);
        let assign = b.assignment(target, source);
        b.statement(assign)
    };
    let module = b.module(vec![n_decl, s_decl, bad]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());
    assert!(session.result.has_code(P_TYPE_MISMATCH));
}

#[test]
fn negative_constant_to_unsigned_reports_p019() {
    let mut b = AstBuilder::new();
    let u_decl = typed_decl(&mut b, "u", "u32");
    let bad = {
        let target = b.symbol(&["u"]);
        let one = b.number(1);
        let minus_one = b.unary("-", one);
        let assign = b.assignment(target, minus_one);
        b.statement(assign)
    };
    let module = b.module(vec![u_decl, bad]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());
    assert!(session.result.has_code(P_TYPE_MISMATCH));
}

#[test]
fn intrinsic_arity_reports_p091() {
    let mut b = AstBuilder::new();
    let bad = {
        let callee = b.symbol(&["size_of"]);
        let call = b.proc_call(callee, Vec::new());
        b.statement(call)
    };
    let module = b.module(vec![bad]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.result.has_code(P_INTRINSIC_ARITY));
}

#[test]
fn casting_a_composite_reports_c073() {
    let mut b = AstBuilder::new();
    let point = point_struct(&mut b);
    let p_decl = typed_decl(&mut b, "p", "Point");
    let bad = {
        let type_id = b.type_identifier("s64");
        let operand = b.symbol(&["p"]);
        let cast = b.cast(type_id, operand);
        init_decl(&mut b, "v", cast)
    };
    let module = b.module(vec![point, p_decl, bad]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());
    assert!(session.result.has_code(C_INVALID_CAST));
}

#[test]
fn break_outside_a_loop_reports_p081() {
    let mut b = AstBuilder::new();
    let bad = {
        let br = b.break_statement(None);
        b.statement(br)
    };
    let module = b.module(vec![bad]);

    let compiled = compile(module);
    assert!(!compiled.ok);
    assert!(compiled.session.result.has_code(P_INVALID_BREAK_CONTINUE));
}

#[test]
fn equal_strings_share_one_intern_id() {
    let mut b = AstBuilder::new();
    let first = {
        let text = b.string("hello");
        init_decl(&mut b, "first", text)
    };
    let second = {
        let text = b.string("hello");
        init_decl(&mut b, "second", text)
    };
    let module = b.module(vec![first, second]);

    let compiled = compile(module);
    assert!(compiled.ok, "compile failed:\n{}", compiled.messages());
    assert_eq!(compiled.session.interns.len(), 1);

    let listing = compiled.listing();
    assert!(listing.contains("_intern_str_lit_0:"));
    assert!(!listing.contains("_intern_str_lit_1:"));
}

#[test]
fn constant_folding_replaces_operators_with_literals() {
    let mut b = AstBuilder::new();
    let folded = {
        let two = b.number(2);
        let three = b.number(3);
        let product = b.binary("*", two, three);
        let four = b.number(4);
        let sum = b.binary("+", product, four);
        let target = b.symbol(&["answer"]);
        let assign = b.constant_assignment(target, sum);
        b.statement(assign)
    };
    let module = b.module(vec![folded]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve());

    let identifier = find_identifier(&session, "answer").expect("answer resolved");
    let map = session.elements();
    let value = basecode::sema::fold::constant_integer(map, identifier);
    assert_eq!(value, Some(10));
    // The operator subtree is gone from the map.
    let operators = map.find_by_kind(basecode::sema::element::ElementKind::BinaryOperator);
    assert!(operators.is_empty(), "unfolded operators: {:?}", operators);
}

#[test]
fn with_binding_resolves_unqualified_field_names() {
    let mut b = AstBuilder::new();
    let point = point_struct(&mut b);
    let p_decl = typed_decl(&mut b, "p", "Point");
    let with_stmt = {
        let receiver = b.symbol(&["p"]);
        let read = {
            let y = b.symbol(&["y"]);
            init_decl(&mut b, "v", y)
        };
        let body = b.statement_body(vec![read]);
        let with = b.with_expression(receiver, body);
        b.statement(with)
    };
    let module = b.module(vec![point, p_decl, with_stmt]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(session.resolve(), "with body failed to resolve");
}

#[test]
fn diagnostics_serialize_for_embedders() {
    let mut b = AstBuilder::new();
    let bad = {
        let unknown = b.symbol(&["ghost"]);
        init_decl(&mut b, "x", unknown)
    };
    let module = b.module(vec![bad]);

    let mut session = Session::new(SessionOptions::default());
    session.compile_module(&module);
    assert!(!session.resolve());

    let rendered = serde_json::to_string(&session.result.items).expect("serialize");
    assert!(rendered.contains("P004"));
}
