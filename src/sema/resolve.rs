use log::debug;

use crate::compile::Session;
use crate::frontend::diagnostic::{
    Diagnostic, C_INVALID_CAST, P_TYPE_MISMATCH, P_UNRESOLVED_IDENTIFIER, P_UNRESOLVED_TYPE,
};
use crate::frontend::suggest;

use super::element::{BinaryOp, ElementData, ElementId, ElementKind, UnaryOp};
use super::fold;
use super::infer::TypeInference;
use super::types::{self, concrete_type, TypeCheckOptions};

/// Re-run symbol lookup for every reference the evaluator left unbound.
/// Fix-point: a pass that binds nothing more stops and fails with P004 for
/// each leftover.
pub fn resolve_unknown_identifiers(session: &mut Session) -> bool {
    let mut pending = std::mem::take(&mut session.unresolved_references);
    loop {
        let before = pending.len();
        let mut still_pending = Vec::new();
        for reference in pending {
            let Some(element) = session.builder.elements().get(reference) else {
                continue;
            };
            let (symbol, scope) = match (&element.data, element.parent_scope) {
                (ElementData::IdentifierReference { symbol, .. }, Some(scope)) => {
                    (symbol.clone(), scope)
                }
                _ => continue,
            };
            match session
                .scopes
                .find_identifier(session.builder.elements(), &symbol, Some(scope))
            {
                Some(identifier) => session.builder.bind_reference(reference, identifier),
                None => still_pending.push(reference),
            }
        }
        pending = still_pending;
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    if pending.is_empty() {
        return true;
    }
    let mut failed = false;
    for reference in &pending {
        let element = &session.builder.elements()[*reference];
        let (symbol, scope) = match (&element.data, element.parent_scope) {
            (ElementData::IdentifierReference { symbol, .. }, scope) => {
                (symbol.clone(), scope.unwrap_or(session.root_block))
            }
            _ => continue,
        };
        // Unqualified names under a `with` binding resolve against the
        // receiver's fields once types are known; defer them.
        if !symbol.is_qualified()
            && session
                .scopes
                .find_with_receiver(session.builder.elements(), scope)
                .is_some()
        {
            session.unresolved_references.push(*reference);
            continue;
        }
        failed = true;
        let span = element.span.clone();
        let candidates = session
            .scopes
            .visible_identifier_names(session.builder.elements(), scope);
        let mut diag = Diagnostic::new(
            format!("unknown identifier `{}`", symbol),
            Some(span),
        )
        .code(P_UNRESOLVED_IDENTIFIER);
        if let Some(hint) = suggest::did_you_mean(&symbol.name, candidates) {
            diag = diag.help(hint);
        }
        session.result.push_diag(diag);
    }
    !failed
}

/// Resolve identifiers whose declared type was unknown at evaluation time:
/// retry annotation lookup, then re-infer from the initializer, to a fixed
/// point. Afterwards composites are laid out and member accesses bound.
pub fn resolve_unknown_types(session: &mut Session) -> bool {
    // nil needs its pointer-to-void identity before anything infers.
    if let Some(void) = session.core.void() {
        session
            .scopes
            .find_pointer_type(&mut session.builder, void);
    }

    let mut pending = std::mem::take(&mut session.unknown_type_identifiers);
    let mut iterations = 0usize;
    loop {
        iterations += 1;
        let with_before = session.unresolved_references.len();
        materialize_derived_types(session);
        resolve_for_inductions(session);
        resolve_with_references(session, false);

        let before = pending.len();
        let mut still_pending = Vec::new();
        for identifier in pending {
            if resolve_one_identifier(session, identifier) {
                continue;
            }
            still_pending.push(identifier);
        }
        pending = still_pending;
        if pending.is_empty() && session.unresolved_references.is_empty() {
            break;
        }
        let progressed = pending.len() < before
            || session.unresolved_references.len() < with_before;
        if !progressed {
            break;
        }
    }
    debug!("type resolution converged after {} iteration(s)", iterations);

    let ok = if pending.is_empty() {
        true
    } else {
        for identifier in &pending {
            let element = &session.builder.elements()[*identifier];
            let name = element
                .as_identifier()
                .map(|i| i.symbol.to_string())
                .unwrap_or_else(|| element.label_name());
            let span = element.span.clone();
            session.result.push_diag(
                Diagnostic::new(
                    format!("unable to resolve type for identifier `{}`", name),
                    Some(span),
                )
                .code(P_UNRESOLVED_TYPE),
            );
        }
        false
    };

    let composites_ok =
        types::initialize_composite_types(session.builder.elements_mut(), &mut session.result);
    let members_ok = resolve_member_accesses(session);
    let with_ok = resolve_with_references(session, true);
    ok && composites_ok && members_ok && with_ok
}

/// Bind unqualified names deferred from the identifier pass to fields of
/// the innermost `with` receiver. During the fix point `report` is false
/// and unresolved names are re-queued instead of failing.
fn resolve_with_references(session: &mut Session, report: bool) -> bool {
    let mut ok = true;
    let pending = std::mem::take(&mut session.unresolved_references);
    for reference in pending {
        let Some(element) = session.builder.elements().get(reference) else {
            continue;
        };
        let (symbol, scope) = match (&element.data, element.parent_scope) {
            (ElementData::IdentifierReference { symbol, .. }, Some(scope)) => {
                (symbol.clone(), scope)
            }
            _ => continue,
        };
        let span = element.span.clone();
        let receiver = session
            .scopes
            .find_with_receiver(session.builder.elements(), scope);
        let field_identifier = receiver.and_then(|receiver| {
            let mut receiver_type = {
                let inference = TypeInference {
                    map: session.builder.elements(),
                    scopes: &session.scopes,
                    core: &session.core,
                };
                inference.infer(receiver)
            }?;
            if let Some(pointee) = types::pointer_base(session.builder.elements(), receiver_type) {
                receiver_type = pointee;
            }
            let composite = session.builder.elements()[receiver_type].as_composite()?;
            composite.fields.iter().copied().find_map(|field| {
                let name = types::field_name_of(session.builder.elements(), field)?;
                if name == symbol.name {
                    match &session.builder.elements()[field].data {
                        ElementData::Field { identifier, .. } => Some(*identifier),
                        _ => None,
                    }
                } else {
                    None
                }
            })
        });
        match field_identifier {
            Some(identifier) => session.builder.bind_reference(reference, identifier),
            None if report => {
                ok = false;
                session.result.push_diag(
                    Diagnostic::new(
                        format!("unknown identifier `{}`", symbol),
                        Some(span),
                    )
                    .code(P_UNRESOLVED_IDENTIFIER),
                );
            }
            None => session.unresolved_references.push(reference),
        }
    }
    ok
}

fn resolve_one_identifier(session: &mut Session, identifier: ElementId) -> bool {
    let Some(element) = session.builder.elements().get(identifier) else {
        return true;
    };
    let Some(data) = element.as_identifier() else {
        return true;
    };

    match data.type_ref {
        Some(type_ref) => resolve_annotation(session, identifier, type_ref),
        None => {
            let Some(initializer) = data.initializer else {
                return false;
            };
            let inferred = {
                let inference = TypeInference {
                    map: session.builder.elements(),
                    scopes: &session.scopes,
                    core: &session.core,
                };
                inference.infer(initializer)
            };
            match inferred {
                Some(type_id) => {
                    session.builder.set_identifier_type(identifier, type_id);
                    if let Some(ident) = session
                        .builder
                        .elements_mut()
                        .get_mut(identifier)
                        .and_then(|e| e.as_identifier_mut())
                    {
                        ident.inferred_type = true;
                    }
                    true
                }
                None => false,
            }
        }
    }
}

fn resolve_annotation(session: &mut Session, identifier: ElementId, type_ref: ElementId) -> bool {
    let (symbol, is_pointer, array_size, already) =
        match &session.builder.elements()[type_ref].data {
            ElementData::TypeReference {
                symbol,
                referenced_type,
                is_pointer,
                array_size,
            } => (
                symbol.clone(),
                *is_pointer,
                *array_size,
                referenced_type.is_some(),
            ),
            // Direct type element (procedure/composite declaration).
            _ => return true,
        };
    if already {
        return true;
    }
    let scope = session.builder.elements()[identifier].parent_scope;
    let Some(base) = session
        .scopes
        .find_type(session.builder.elements(), &symbol, scope)
    else {
        return false;
    };
    let mut resolved = base;
    if is_pointer {
        resolved = session
            .scopes
            .find_pointer_type(&mut session.builder, resolved);
    }
    if let Some(size) = array_size {
        resolved = session
            .scopes
            .find_array_type(&mut session.builder, resolved, size);
    }
    session.builder.bind_type_reference(type_ref, resolved);
    true
}

/// Create the memoized pointer types address-of expressions will need, so
/// pure inference can find them.
fn materialize_derived_types(session: &mut Session) {
    let candidates: Vec<ElementId> = session
        .builder
        .elements()
        .iter()
        .filter(|e| match &e.data {
            ElementData::UnaryOperator {
                op: UnaryOp::AddressOf,
                ..
            } => true,
            ElementData::Intrinsic { name, .. } => name == "address_of",
            _ => false,
        })
        .map(|e| e.id)
        .collect();
    for id in candidates {
        let operand = match &session.builder.elements()[id].data {
            ElementData::UnaryOperator { operand, .. } => *operand,
            ElementData::Intrinsic { arguments, .. } => {
                match &session.builder.elements()[*arguments].data {
                    ElementData::ArgumentList { elements } => match elements.first() {
                        Some(first) => *first,
                        None => continue,
                    },
                    _ => continue,
                }
            }
            _ => continue,
        };
        let operand_type = {
            let inference = TypeInference {
                map: session.builder.elements(),
                scopes: &session.scopes,
                core: &session.core,
            };
            inference.infer(operand)
        };
        if let Some(operand_type) = operand_type {
            session
                .scopes
                .find_pointer_type(&mut session.builder, operand_type);
        }
    }
}

/// For-loop induction variables type from the range expression's start.
fn resolve_for_inductions(session: &mut Session) {
    let fors = session.builder.elements().find_by_kind(ElementKind::For);
    for id in fors {
        let (induction, expression) = match &session.builder.elements()[id].data {
            ElementData::For {
                induction,
                expression,
                ..
            } => (*induction, *expression),
            _ => continue,
        };
        let untyped = session.builder.elements()[induction]
            .as_identifier()
            .map(|i| i.type_ref.is_none())
            .unwrap_or(false);
        if !untyped {
            continue;
        }
        let inferred = {
            let inference = TypeInference {
                map: session.builder.elements(),
                scopes: &session.scopes,
                core: &session.core,
            };
            inference.infer(expression)
        };
        if let Some(type_id) = inferred {
            session.builder.set_identifier_type(induction, type_id);
        }
    }
}

/// Bind the right side of every member access to the named field of the
/// left side's composite type, stepping through one pointer level.
fn resolve_member_accesses(session: &mut Session) -> bool {
    let mut ok = true;
    let accesses: Vec<ElementId> = session
        .builder
        .elements()
        .iter()
        .filter(|e| {
            matches!(
                &e.data,
                ElementData::BinaryOperator {
                    op: BinaryOp::MemberAccess,
                    ..
                }
            )
        })
        .map(|e| e.id)
        .collect();

    for access in accesses {
        let (lhs, rhs) = match &session.builder.elements()[access].data {
            ElementData::BinaryOperator { lhs, rhs, .. } => (*lhs, *rhs),
            _ => continue,
        };
        let already_bound = matches!(
            &session.builder.elements()[rhs].data,
            ElementData::IdentifierReference {
                identifier: Some(_),
                ..
            }
        );
        if already_bound {
            continue;
        }
        let field_name = match &session.builder.elements()[rhs].data {
            ElementData::IdentifierReference { symbol, .. } => symbol.name.clone(),
            _ => continue,
        };
        let lhs_type = {
            let inference = TypeInference {
                map: session.builder.elements(),
                scopes: &session.scopes,
                core: &session.core,
            };
            inference.infer(lhs)
        };
        let Some(mut base_type) = lhs_type else {
            ok = false;
            let span = session.builder.elements()[access].span.clone();
            session.result.push_diag(
                Diagnostic::new(
                    format!("cannot resolve member `{}` on untyped expression", field_name),
                    Some(span),
                )
                .code(P_UNRESOLVED_IDENTIFIER),
            );
            continue;
        };
        if let Some(pointee) = types::pointer_base(session.builder.elements(), base_type) {
            base_type = pointee;
        }
        let field_identifier = session.builder.elements()[base_type]
            .as_composite()
            .and_then(|composite| {
                composite.fields.iter().copied().find_map(|field| {
                    let name = types::field_name_of(session.builder.elements(), field)?;
                    if name == field_name {
                        match &session.builder.elements()[field].data {
                            ElementData::Field { identifier, .. } => Some(*identifier),
                            _ => None,
                        }
                    } else {
                        None
                    }
                })
            });
        match field_identifier {
            Some(identifier) => session.builder.bind_reference(rhs, identifier),
            None => {
                ok = false;
                let type_label = types::type_name(session.builder.elements(), base_type);
                let span = session.builder.elements()[access].span.clone();
                session.result.push_diag(
                    Diagnostic::new(
                        format!("no field `{}` on type `{}`", field_name, type_label),
                        Some(span),
                    )
                    .code(P_UNRESOLVED_IDENTIFIER),
                );
            }
        }
    }
    ok
}

/// Pass 4: assignment, call-argument, return, and cast compatibility.
pub fn type_check(session: &mut Session) -> bool {
    let inference_snapshot: Vec<ElementId> = session.builder.elements().ids();
    let mut ok = true;

    for id in inference_snapshot {
        let Some(element) = session.builder.elements().get(id) else {
            continue;
        };
        match &element.data {
            ElementData::BinaryOperator {
                op: BinaryOp::Assignment,
                lhs,
                rhs,
            } => {
                let (lhs, rhs) = (*lhs, *rhs);
                ok &= check_assignment(session, id, lhs, rhs);
            }
            ElementData::ProcCall {
                reference,
                arguments,
            } => {
                let (reference, arguments) = (*reference, *arguments);
                ok &= check_call(session, id, reference, arguments);
            }
            ElementData::Return { expressions } => {
                let expressions = expressions.clone();
                ok &= check_return(session, id, &expressions);
            }
            ElementData::Cast {
                type_ref,
                expression,
            } => {
                let (type_ref, expression) = (*type_ref, *expression);
                ok &= check_cast(session, id, type_ref, expression, false);
            }
            ElementData::Transmute {
                type_ref,
                expression,
            } => {
                let (type_ref, expression) = (*type_ref, *expression);
                ok &= check_cast(session, id, type_ref, expression, true);
            }
            _ => {}
        }
    }
    ok
}

fn infer_of(session: &Session, id: ElementId) -> Option<ElementId> {
    let inference = TypeInference {
        map: session.builder.elements(),
        scopes: &session.scopes,
        core: &session.core,
    };
    inference.infer(id)
}

fn check_assignment(
    session: &mut Session,
    assignment: ElementId,
    lhs: ElementId,
    rhs: ElementId,
) -> bool {
    let (Some(lhs_type), Some(rhs_type)) = (infer_of(session, lhs), infer_of(session, rhs)) else {
        // Unresolved operands already produced their own diagnostics.
        return true;
    };
    let negative_constant = fold::constant_integer(session.builder.elements(), rhs)
        .map(|v| v < 0)
        .unwrap_or(false);
    let compatible = types::type_check(
        session.builder.elements(),
        lhs_type,
        rhs_type,
        TypeCheckOptions { negative_constant },
    );
    if !compatible {
        let span = session.builder.elements()[assignment].span.clone();
        let lhs_name = types::type_name(session.builder.elements(), lhs_type);
        let rhs_name = types::type_name(session.builder.elements(), rhs_type);
        session.result.push_diag(
            Diagnostic::new(
                format!("type mismatch: cannot assign `{}` to `{}`", rhs_name, lhs_name),
                Some(span),
            )
            .code(P_TYPE_MISMATCH),
        );
        return false;
    }
    true
}

fn check_call(
    session: &mut Session,
    call: ElementId,
    reference: ElementId,
    arguments: ElementId,
) -> bool {
    let proc_type = {
        let inference = TypeInference {
            map: session.builder.elements(),
            scopes: &session.scopes,
            core: &session.core,
        };
        inference.procedure_type_of(reference)
    };
    let Some(proc_type) = proc_type else {
        return true;
    };
    let Some(proc_data) = session.builder.elements()[proc_type].as_procedure().cloned() else {
        return true;
    };
    let argument_ids = match &session.builder.elements()[arguments].data {
        ElementData::ArgumentList { elements } => elements.clone(),
        _ => return true,
    };

    let mut ok = true;
    for (index, &argument) in argument_ids.iter().enumerate() {
        let value = match &session.builder.elements()[argument].data {
            ElementData::ArgumentPair { value, .. } => *value,
            _ => argument,
        };
        let Some(param_field) = parameter_for_argument(session, &proc_data, index, argument)
        else {
            if proc_data.is_foreign {
                // Variadic tail: checked by the FFI signature at runtime.
                continue;
            }
            continue;
        };
        let param_type = types::field_type_of(session.builder.elements(), param_field);
        let (Some(param_type), Some(value_type)) = (param_type, infer_of(session, value)) else {
            continue;
        };
        let negative_constant = fold::constant_integer(session.builder.elements(), value)
            .map(|v| v < 0)
            .unwrap_or(false);
        if !types::type_check(
            session.builder.elements(),
            param_type,
            value_type,
            TypeCheckOptions { negative_constant },
        ) {
            ok = false;
            let span = session.builder.elements()[call].span.clone();
            let want = types::type_name(session.builder.elements(), param_type);
            let got = types::type_name(session.builder.elements(), value_type);
            session.result.push_diag(
                Diagnostic::new(
                    format!(
                        "type mismatch: argument {} expects `{}`, found `{}`",
                        index + 1,
                        want,
                        got
                    ),
                    Some(span),
                )
                .code(P_TYPE_MISMATCH),
            );
        }
    }
    ok
}

fn parameter_for_argument(
    session: &Session,
    proc_data: &super::element::ProcedureData,
    index: usize,
    argument: ElementId,
) -> Option<ElementId> {
    if let ElementData::ArgumentPair { name, .. } = &session.builder.elements()[argument].data {
        return proc_data.parameters.iter().copied().find(|&field| {
            types::field_name_of(session.builder.elements(), field)
                .map(|n| n == *name)
                .unwrap_or(false)
        });
    }
    proc_data.parameters.get(index).copied()
}

fn check_return(session: &mut Session, return_id: ElementId, expressions: &[ElementId]) -> bool {
    let Some(proc_type) = enclosing_procedure(session, return_id) else {
        return true;
    };
    let return_field = session.builder.elements()[proc_type]
        .as_procedure()
        .and_then(|p| p.return_field);
    let Some(&value) = expressions.first() else {
        return true;
    };
    let Some(return_field) = return_field else {
        let span = session.builder.elements()[return_id].span.clone();
        session.result.push_diag(
            Diagnostic::new("return with a value in a void procedure", Some(span))
                .code(P_TYPE_MISMATCH),
        );
        return false;
    };
    let (Some(expected), Some(actual)) = (
        types::field_type_of(session.builder.elements(), return_field),
        infer_of(session, value),
    ) else {
        return true;
    };
    let negative_constant = fold::constant_integer(session.builder.elements(), value)
        .map(|v| v < 0)
        .unwrap_or(false);
    if !types::type_check(
        session.builder.elements(),
        expected,
        actual,
        TypeCheckOptions { negative_constant },
    ) {
        let span = session.builder.elements()[return_id].span.clone();
        let want = types::type_name(session.builder.elements(), expected);
        let got = types::type_name(session.builder.elements(), actual);
        session.result.push_diag(
            Diagnostic::new(
                format!("type mismatch: return expects `{}`, found `{}`", want, got),
                Some(span),
            )
            .code(P_TYPE_MISMATCH),
        );
        return false;
    }
    true
}

/// Walk parent scopes to the procedure whose scope contains this element.
fn enclosing_procedure(session: &Session, id: ElementId) -> Option<ElementId> {
    let map = session.builder.elements();
    let mut cursor = map.get(id)?.parent_scope;
    while let Some(scope) = cursor {
        let is_frame = map
            .get(scope)
            .and_then(|e| e.as_block())
            .map(|b| b.has_stack_frame)
            .unwrap_or(false);
        if is_frame {
            return map.iter().find_map(|e| match &e.data {
                ElementData::ProcedureType(data) if data.scope == scope => Some(e.id),
                _ => None,
            });
        }
        cursor = map.get(scope)?.parent_scope;
    }
    None
}

fn check_cast(
    session: &mut Session,
    cast: ElementId,
    type_ref: ElementId,
    expression: ElementId,
    transmute: bool,
) -> bool {
    let target = concrete_type(session.builder.elements(), type_ref);
    let source = infer_of(session, expression);
    let (Some(target), Some(source)) = (target, source) else {
        return true;
    };
    let target_class = types::number_class(session.builder.elements(), target);
    let source_class = types::number_class(session.builder.elements(), source);
    if target_class.is_none() || source_class.is_none() {
        let span = session.builder.elements()[cast].span.clone();
        let verb = if transmute { "transmute" } else { "cast" };
        let target_name = types::type_name(session.builder.elements(), target);
        let source_name = types::type_name(session.builder.elements(), source);
        session.result.push_diag(
            Diagnostic::new(
                format!("invalid {}: `{}` to `{}`", verb, source_name, target_name),
                Some(span),
            )
            .code(C_INVALID_CAST),
        );
        return false;
    }
    if transmute
        && types::size_of(session.builder.elements(), target)
            != types::size_of(session.builder.elements(), source)
    {
        let span = session.builder.elements()[cast].span.clone();
        session.result.push_diag(
            Diagnostic::new("transmute requires identical sizes", Some(span))
                .code(C_INVALID_CAST),
        );
        return false;
    }
    true
}
