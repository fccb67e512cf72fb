use log::debug;

use super::builder::{CoreTypes, ElementBuilder};
use super::element::{
    BinaryOp, ElementData, ElementId, ElementKind, ElementMap, NumberClass, UnaryOp,
};
use super::infer::TypeInference;
use super::scope::ScopeManager;
use super::types;

/// True when the element's value is known at compile time.
pub fn is_constant(map: &ElementMap, id: ElementId) -> bool {
    let Some(element) = map.get(id) else {
        return false;
    };
    match &element.data {
        ElementData::IntegerLiteral { .. }
        | ElementData::FloatLiteral { .. }
        | ElementData::BooleanLiteral { .. }
        | ElementData::StringLiteral { .. }
        | ElementData::CharacterLiteral { .. }
        | ElementData::NilLiteral => true,
        ElementData::Expression { root } => is_constant(map, *root),
        ElementData::Initializer { expression } => {
            expression.map(|e| is_constant(map, e)).unwrap_or(false)
        }
        ElementData::Identifier(data) => {
            data.is_constant
                && data
                    .initializer
                    .map(|init| is_constant(map, init))
                    .unwrap_or(false)
        }
        ElementData::IdentifierReference { identifier, .. } => {
            identifier.map(|i| is_constant(map, i)).unwrap_or(false)
        }
        ElementData::UnaryOperator { op, operand } => match op {
            UnaryOp::Negate | UnaryOp::BinaryNot | UnaryOp::LogicalNot => is_constant(map, *operand),
            UnaryOp::AddressOf | UnaryOp::Dereference => false,
        },
        ElementData::BinaryOperator { op, lhs, rhs } => {
            (op.is_arithmetic() || op.is_relational())
                && is_constant(map, *lhs)
                && is_constant(map, *rhs)
        }
        ElementData::Intrinsic { name, .. } => matches!(name.as_str(), "size_of" | "align_of"),
        ElementData::Directive(super::element::DirectiveData::Run { expression }) => {
            is_constant(map, *expression)
        }
        ElementData::CompositeType(_) | ElementData::TupleType(_) => true,
        _ => false,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FoldValue {
    Integer(i128),
    Float(f64),
    Boolean(bool),
    Rune(char),
    Text(String),
}

/// Evaluate a constant expression. Returns `None` when the value cannot be
/// computed (division by zero, unresolved operand), in which case the
/// element is left in place.
pub fn fold_value(
    map: &ElementMap,
    scopes: &ScopeManager,
    core: &CoreTypes,
    id: ElementId,
) -> Option<FoldValue> {
    let element = map.get(id)?;
    match &element.data {
        ElementData::IntegerLiteral { value } => Some(FoldValue::Integer(*value)),
        ElementData::FloatLiteral { value } => Some(FoldValue::Float(*value)),
        ElementData::BooleanLiteral { value } => Some(FoldValue::Boolean(*value)),
        ElementData::CharacterLiteral { rune } => Some(FoldValue::Rune(*rune)),
        ElementData::StringLiteral { value } => Some(FoldValue::Text(value.clone())),
        ElementData::Expression { root } => fold_value(map, scopes, core, *root),
        ElementData::Initializer { expression } => fold_value(map, scopes, core, (*expression)?),
        ElementData::Identifier(data) => fold_value(map, scopes, core, data.initializer?),
        ElementData::IdentifierReference { identifier, .. } => {
            fold_value(map, scopes, core, (*identifier)?)
        }
        ElementData::Directive(super::element::DirectiveData::Run { expression }) => {
            fold_value(map, scopes, core, *expression)
        }
        ElementData::UnaryOperator { op, operand } => {
            let value = fold_value(map, scopes, core, *operand)?;
            let width = result_width(map, scopes, core, id);
            match (op, value) {
                (UnaryOp::Negate, FoldValue::Integer(v)) => {
                    Some(FoldValue::Integer(wrap_integer(-v, width, true)))
                }
                (UnaryOp::Negate, FoldValue::Float(v)) => Some(FoldValue::Float(-v)),
                (UnaryOp::BinaryNot, FoldValue::Integer(v)) => {
                    Some(FoldValue::Integer(wrap_integer(!v, width, false)))
                }
                (UnaryOp::LogicalNot, FoldValue::Boolean(v)) => Some(FoldValue::Boolean(!v)),
                _ => None,
            }
        }
        ElementData::BinaryOperator { op, lhs, rhs } => {
            let lhs_value = fold_value(map, scopes, core, *lhs)?;
            let rhs_value = fold_value(map, scopes, core, *rhs)?;
            fold_binary(map, scopes, core, id, *op, lhs_value, rhs_value)
        }
        ElementData::Intrinsic { name, arguments } => {
            let first = match &map.get(*arguments)?.data {
                ElementData::ArgumentList { elements } => elements.first().copied()?,
                _ => return None,
            };
            let inference = TypeInference { map, scopes, core };
            let arg_type = inference.infer(first)?;
            match name.as_str() {
                "size_of" => Some(FoldValue::Integer(types::size_of(map, arg_type) as i128)),
                "align_of" => Some(FoldValue::Integer(types::alignment_of(map, arg_type) as i128)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn fold_binary(
    map: &ElementMap,
    scopes: &ScopeManager,
    core: &CoreTypes,
    id: ElementId,
    op: BinaryOp,
    lhs: FoldValue,
    rhs: FoldValue,
) -> Option<FoldValue> {
    match (lhs, rhs) {
        (FoldValue::Integer(a), FoldValue::Integer(b)) => {
            if op.is_relational() {
                return fold_integer_relational(op, a, b);
            }
            let width = result_width(map, scopes, core, id);
            let signed = result_signed(map, scopes, core, id);
            let raw = match op {
                BinaryOp::Add => a.wrapping_add(b),
                BinaryOp::Subtract => a.wrapping_sub(b),
                BinaryOp::Multiply => a.wrapping_mul(b),
                BinaryOp::Divide => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_div(b)
                }
                BinaryOp::Modulo => {
                    if b == 0 {
                        return None;
                    }
                    a.wrapping_rem(b)
                }
                BinaryOp::Exponent => integer_pow(a, b)?,
                BinaryOp::BinaryOr => a | b,
                BinaryOp::BinaryAnd => a & b,
                BinaryOp::BinaryXor => a ^ b,
                BinaryOp::ShiftLeft => a.wrapping_shl(shift_amount(b, width)),
                BinaryOp::ShiftRight => a.wrapping_shr(shift_amount(b, width)),
                BinaryOp::RotateLeft => rotate(a, b, width, true),
                BinaryOp::RotateRight => rotate(a, b, width, false),
                _ => return None,
            };
            Some(FoldValue::Integer(wrap_integer(raw, width, signed)))
        }
        (FoldValue::Float(a), FoldValue::Float(b)) => fold_float(op, a, b),
        (FoldValue::Float(a), FoldValue::Integer(b)) => fold_float(op, a, b as f64),
        (FoldValue::Integer(a), FoldValue::Float(b)) => fold_float(op, a as f64, b),
        (FoldValue::Boolean(a), FoldValue::Boolean(b)) => match op {
            BinaryOp::LogicalAnd => Some(FoldValue::Boolean(a && b)),
            BinaryOp::LogicalOr => Some(FoldValue::Boolean(a || b)),
            BinaryOp::Equals => Some(FoldValue::Boolean(a == b)),
            BinaryOp::NotEquals => Some(FoldValue::Boolean(a != b)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_integer_relational(op: BinaryOp, a: i128, b: i128) -> Option<FoldValue> {
    let result = match op {
        BinaryOp::Equals => a == b,
        BinaryOp::NotEquals => a != b,
        BinaryOp::LessThan => a < b,
        BinaryOp::LessThanOrEqual => a <= b,
        BinaryOp::GreaterThan => a > b,
        BinaryOp::GreaterThanOrEqual => a >= b,
        _ => return None,
    };
    Some(FoldValue::Boolean(result))
}

fn fold_float(op: BinaryOp, a: f64, b: f64) -> Option<FoldValue> {
    match op {
        BinaryOp::Add => Some(FoldValue::Float(a + b)),
        BinaryOp::Subtract => Some(FoldValue::Float(a - b)),
        BinaryOp::Multiply => Some(FoldValue::Float(a * b)),
        BinaryOp::Divide => {
            if b == 0.0 {
                return None;
            }
            Some(FoldValue::Float(a / b))
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                return None;
            }
            Some(FoldValue::Float(a % b))
        }
        BinaryOp::Exponent => Some(FoldValue::Float(a.powf(b))),
        BinaryOp::Equals => Some(FoldValue::Boolean(a == b)),
        BinaryOp::NotEquals => Some(FoldValue::Boolean(a != b)),
        BinaryOp::LessThan => Some(FoldValue::Boolean(a < b)),
        BinaryOp::LessThanOrEqual => Some(FoldValue::Boolean(a <= b)),
        BinaryOp::GreaterThan => Some(FoldValue::Boolean(a > b)),
        BinaryOp::GreaterThanOrEqual => Some(FoldValue::Boolean(a >= b)),
        _ => None,
    }
}

/// Bit width of the expression's inferred type; defaults to the machine
/// word when inference has nothing better.
fn result_width(
    map: &ElementMap,
    scopes: &ScopeManager,
    core: &CoreTypes,
    id: ElementId,
) -> u32 {
    let inference = TypeInference { map, scopes, core };
    inference
        .infer(id)
        .map(|t| (types::size_of(map, t) * 8) as u32)
        .filter(|w| *w > 0)
        .unwrap_or(64)
}

fn result_signed(
    map: &ElementMap,
    scopes: &ScopeManager,
    core: &CoreTypes,
    id: ElementId,
) -> bool {
    let inference = TypeInference { map, scopes, core };
    inference
        .infer(id)
        .map(|t| types::is_signed(map, t))
        .unwrap_or(false)
}

/// Wrap modulo 2^width, reinterpreting the top bit for signed results.
fn wrap_integer(value: i128, width: u32, signed: bool) -> i128 {
    if width >= 128 {
        return value;
    }
    let modulus: i128 = 1 << width;
    let mut wrapped = value.rem_euclid(modulus);
    if signed && wrapped >= modulus / 2 {
        wrapped -= modulus;
    }
    wrapped
}

fn shift_amount(value: i128, width: u32) -> u32 {
    (value.rem_euclid(width.max(1) as i128)) as u32
}

fn rotate(value: i128, amount: i128, width: u32, left: bool) -> i128 {
    let width = width.max(1);
    let amount = shift_amount(amount, width);
    let mask: u128 = if width >= 128 {
        u128::MAX
    } else {
        (1u128 << width) - 1
    };
    let unsigned = (value as u128) & mask;
    if amount == 0 {
        return unsigned as i128;
    }
    let rotated = if left {
        ((unsigned << amount) | (unsigned >> (width - amount))) & mask
    } else {
        ((unsigned >> amount) | (unsigned << (width - amount))) & mask
    };
    rotated as i128
}

fn integer_pow(base: i128, exponent: i128) -> Option<i128> {
    if exponent < 0 {
        return None;
    }
    let mut result: i128 = 1;
    let mut remaining = exponent;
    let mut acc = base;
    while remaining > 0 {
        if remaining & 1 == 1 {
            result = result.wrapping_mul(acc);
        }
        acc = acc.wrapping_mul(acc);
        remaining >>= 1;
    }
    Some(result)
}

/// The constant-fold pass: replace every foldable operator and `#run`
/// directive with the literal it evaluates to, dropping the folded subtree
/// from the element map.
pub fn fold_constants(
    builder: &mut ElementBuilder,
    scopes: &ScopeManager,
    core: &CoreTypes,
) -> bool {
    let candidates: Vec<ElementId> = builder
        .elements()
        .iter()
        .filter(|e| {
            matches!(
                e.kind(),
                ElementKind::BinaryOperator
                    | ElementKind::UnaryOperator
                    | ElementKind::Intrinsic
                    | ElementKind::Directive
            )
        })
        .map(|e| e.id)
        .collect();

    let mut folded = 0usize;
    for id in candidates {
        if builder.elements().get(id).is_none() {
            continue;
        }
        if !is_constant(builder.elements(), id) {
            continue;
        }
        let Some(parent) = builder.elements()[id].parent_element else {
            continue;
        };
        let Some(value) = fold_value(builder.elements(), scopes, core, id) else {
            continue;
        };
        let (scope, span) = {
            let element = &builder.elements()[id];
            (element.parent_scope.unwrap_or(scopes.root()), element.span.clone())
        };
        let literal = match value {
            FoldValue::Integer(v) => builder.make_integer_literal(scope, span, v),
            FoldValue::Float(v) => builder.make_float_literal(scope, span, v),
            FoldValue::Boolean(v) => builder.make_boolean_literal(scope, span, v),
            FoldValue::Rune(v) => builder.make_character_literal(scope, span, v),
            FoldValue::Text(v) => builder.make_string_literal(scope, span, &v),
        };
        builder.replace_child(parent, id, literal);
        builder.elements_mut().remove_subtree(id);
        folded += 1;
    }
    debug!("constant fold replaced {} elements", folded);
    true
}

/// The literal's value class after folding, used by assignment checks.
pub fn folded_number_class(map: &ElementMap, id: ElementId) -> Option<NumberClass> {
    match &map.get(id)?.data {
        ElementData::IntegerLiteral { .. } => Some(NumberClass::Integer),
        ElementData::FloatLiteral { .. } => Some(NumberClass::FloatingPoint),
        _ => None,
    }
}

/// Constant integer value reachable through identifiers and wrappers.
pub fn constant_integer(map: &ElementMap, id: ElementId) -> Option<i128> {
    let element = map.get(id)?;
    match &element.data {
        ElementData::IntegerLiteral { value } => Some(*value),
        ElementData::BooleanLiteral { value } => Some(*value as i128),
        ElementData::CharacterLiteral { rune } => Some(*rune as i128),
        ElementData::Expression { root } => constant_integer(map, *root),
        ElementData::Initializer { expression } => constant_integer(map, (*expression)?),
        ElementData::Identifier(data) => constant_integer(map, data.initializer?),
        ElementData::IdentifierReference { identifier, .. } => {
            constant_integer(map, (*identifier)?)
        }
        ElementData::UnaryOperator {
            op: UnaryOp::Negate,
            operand,
        } => constant_integer(map, *operand).map(|v| -v),
        _ => None,
    }
}

/// Constant float value reachable through identifiers and wrappers.
pub fn constant_float(map: &ElementMap, id: ElementId) -> Option<f64> {
    let element = map.get(id)?;
    match &element.data {
        ElementData::FloatLiteral { value } => Some(*value),
        ElementData::IntegerLiteral { value } => Some(*value as f64),
        ElementData::Expression { root } => constant_float(map, *root),
        ElementData::Initializer { expression } => constant_float(map, (*expression)?),
        ElementData::Identifier(data) => constant_float(map, data.initializer?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_is_modulo_two_to_width() {
        assert_eq!(wrap_integer(256, 8, false), 0);
        assert_eq!(wrap_integer(257, 8, false), 1);
        assert_eq!(wrap_integer(-1, 8, false), 255);
        assert_eq!(wrap_integer(128, 8, true), -128);
        assert_eq!(wrap_integer(127, 8, true), 127);
    }

    #[test]
    fn integer_pow_wraps() {
        assert_eq!(integer_pow(2, 10), Some(1024));
        assert_eq!(integer_pow(3, 0), Some(1));
        assert_eq!(integer_pow(2, -1), None);
    }

    #[test]
    fn relational_folds_to_bool() {
        assert_eq!(
            fold_integer_relational(BinaryOp::LessThan, 1, 2),
            Some(FoldValue::Boolean(true))
        );
        assert_eq!(
            fold_integer_relational(BinaryOp::Equals, 5, 5),
            Some(FoldValue::Boolean(true))
        );
    }
}
