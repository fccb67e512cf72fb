use crate::frontend::diagnostic::{Diagnostics, X_UNSUPPORTED};

use super::element::{
    AccessModel, CompositeKind, ElementData, ElementId, ElementKind, ElementMap, NumberClass,
};

pub const MACHINE_WORD: u64 = 8;

#[derive(Clone, Copy, Debug)]
pub struct NumericTypeProperties {
    pub name: &'static str,
    pub min: i128,
    pub max: u128,
    pub size_in_bytes: u64,
    pub is_signed: bool,
    pub class: NumberClass,
}

pub const NUMERIC_TYPES: &[NumericTypeProperties] = &[
    NumericTypeProperties {
        name: "u0",
        min: 0,
        max: 0,
        size_in_bytes: 0,
        is_signed: false,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "u8",
        min: 0,
        max: u8::MAX as u128,
        size_in_bytes: 1,
        is_signed: false,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "u16",
        min: 0,
        max: u16::MAX as u128,
        size_in_bytes: 2,
        is_signed: false,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "u32",
        min: 0,
        max: u32::MAX as u128,
        size_in_bytes: 4,
        is_signed: false,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "u64",
        min: 0,
        max: u64::MAX as u128,
        size_in_bytes: 8,
        is_signed: false,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "s8",
        min: i8::MIN as i128,
        max: i8::MAX as u128,
        size_in_bytes: 1,
        is_signed: true,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "s16",
        min: i16::MIN as i128,
        max: i16::MAX as u128,
        size_in_bytes: 2,
        is_signed: true,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "s32",
        min: i32::MIN as i128,
        max: i32::MAX as u128,
        size_in_bytes: 4,
        is_signed: true,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "s64",
        min: i64::MIN as i128,
        max: i64::MAX as u128,
        size_in_bytes: 8,
        is_signed: true,
        class: NumberClass::Integer,
    },
    NumericTypeProperties {
        name: "f32",
        min: 0,
        max: u32::MAX as u128,
        size_in_bytes: 4,
        is_signed: true,
        class: NumberClass::FloatingPoint,
    },
    NumericTypeProperties {
        name: "f64",
        min: 0,
        max: u64::MAX as u128,
        size_in_bytes: 8,
        is_signed: true,
        class: NumberClass::FloatingPoint,
    },
];

pub fn numeric_properties(name: &str) -> Option<&'static NumericTypeProperties> {
    NUMERIC_TYPES.iter().find(|p| p.name == name)
}

/// Name of the narrowest built-in type whose range admits `value`.
/// Non-negative literals prefer the byte-exact unsigned types, then fall
/// into the signed ladder so that arithmetic on the literal keeps working
/// when it later meets a signed operand.
pub fn narrow_to_integer(value: i128) -> &'static str {
    if value < 0 {
        if value >= i8::MIN as i128 {
            "s8"
        } else if value >= i16::MIN as i128 {
            "s16"
        } else if value >= i32::MIN as i128 {
            "s32"
        } else {
            "s64"
        }
    } else if value <= u8::MAX as i128 {
        "u8"
    } else if value <= u16::MAX as i128 {
        "u16"
    } else if value <= i32::MAX as i128 {
        "s32"
    } else if value <= i64::MAX as i128 {
        "s64"
    } else {
        "u64"
    }
}

pub fn narrow_to_float(value: f64) -> &'static str {
    if value >= f32::MIN as f64 && value <= f32::MAX as f64 {
        "f32"
    } else {
        "f64"
    }
}

pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Follow a type reference to the concrete type element, or pass a type
/// element straight through. Returns `None` for unresolved references.
pub fn concrete_type(map: &ElementMap, id: ElementId) -> Option<ElementId> {
    let element = map.get(id)?;
    match &element.data {
        ElementData::TypeReference {
            referenced_type, ..
        } => *referenced_type,
        _ if element.is_type() => Some(id),
        _ => None,
    }
}

pub fn type_name(map: &ElementMap, id: ElementId) -> String {
    concrete_type(map, id)
        .and_then(|t| map[t].type_base().map(|b| b.name.clone()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn size_of(map: &ElementMap, id: ElementId) -> u64 {
    concrete_type(map, id)
        .and_then(|t| map[t].type_base().map(|b| b.size_in_bytes))
        .unwrap_or(0)
}

pub fn alignment_of(map: &ElementMap, id: ElementId) -> u64 {
    concrete_type(map, id)
        .and_then(|t| map[t].type_base().map(|b| b.alignment))
        .unwrap_or(0)
}

pub fn number_class(map: &ElementMap, id: ElementId) -> Option<NumberClass> {
    let id = concrete_type(map, id)?;
    match &map[id].data {
        ElementData::NumericType { class, .. } => Some(*class),
        ElementData::BoolType { .. }
        | ElementData::RuneType { .. }
        | ElementData::PointerType { .. } => Some(NumberClass::Integer),
        ElementData::CompositeType(data) if data.kind == CompositeKind::Enum => {
            Some(NumberClass::Integer)
        }
        _ => None,
    }
}

pub fn is_signed(map: &ElementMap, id: ElementId) -> bool {
    concrete_type(map, id)
        .map(|t| match &map[t].data {
            ElementData::NumericType { is_signed, .. } => *is_signed,
            _ => false,
        })
        .unwrap_or(false)
}

pub fn is_pointer_type(map: &ElementMap, id: ElementId) -> bool {
    concrete_type(map, id)
        .map(|t| map[t].kind() == ElementKind::PointerType)
        .unwrap_or(false)
}

pub fn is_composite_type(map: &ElementMap, id: ElementId) -> bool {
    concrete_type(map, id)
        .map(|t| {
            matches!(
                map[t].kind(),
                ElementKind::CompositeType | ElementKind::TupleType
            )
        })
        .unwrap_or(false)
}

pub fn pointer_base(map: &ElementMap, id: ElementId) -> Option<ElementId> {
    let id = concrete_type(map, id)?;
    match &map[id].data {
        ElementData::PointerType { base_type, .. } => concrete_type(map, *base_type),
        _ => None,
    }
}

pub fn array_entry(map: &ElementMap, id: ElementId) -> Option<ElementId> {
    let id = concrete_type(map, id)?;
    match &map[id].data {
        ElementData::ArrayType { entry_type, .. } => concrete_type(map, *entry_type),
        _ => None,
    }
}

pub fn access_model(map: &ElementMap, id: ElementId) -> AccessModel {
    concrete_type(map, id)
        .map(|t| match map[t].kind() {
            ElementKind::CompositeType
            | ElementKind::TupleType
            | ElementKind::ArrayType
            | ElementKind::StringType => AccessModel::Pointer,
            _ => AccessModel::Value,
        })
        .unwrap_or(AccessModel::Value)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TypeCheckOptions {
    /// The right side is a constant with a negative value; rules out
    /// unsigned/signed mixing.
    pub negative_constant: bool,
}

/// Assignment-compatibility per the language rules. Widening is implicit
/// within a numeric class; everything structural requires identity.
pub fn type_check(
    map: &ElementMap,
    lhs: ElementId,
    rhs: ElementId,
    options: TypeCheckOptions,
) -> bool {
    let (Some(lhs), Some(rhs)) = (concrete_type(map, lhs), concrete_type(map, rhs)) else {
        return false;
    };
    if lhs == rhs {
        return true;
    }

    let lhs_el = &map[lhs];
    let rhs_el = &map[rhs];

    if lhs_el.kind() == ElementKind::AnyType || rhs_el.kind() == ElementKind::AnyType {
        return true;
    }

    match (&lhs_el.data, &rhs_el.data) {
        (
            ElementData::NumericType {
                class: lhs_class,
                is_signed: lhs_signed,
                ..
            },
            ElementData::NumericType {
                class: rhs_class, ..
            },
        ) => {
            if lhs_class != rhs_class {
                return false;
            }
            // A negative constant can never land in an unsigned slot.
            if options.negative_constant && !lhs_signed {
                return false;
            }
            true
        }
        (
            ElementData::PointerType {
                base_type: lhs_base,
                ..
            },
            ElementData::PointerType {
                base_type: rhs_base,
                ..
            },
        ) => {
            let lhs_base = concrete_type(map, *lhs_base);
            let rhs_base = concrete_type(map, *rhs_base);
            match (lhs_base, rhs_base) {
                (Some(a), Some(b)) => {
                    is_void(map, a)
                        || is_void(map, b)
                        || type_check(map, a, b, TypeCheckOptions::default())
                }
                _ => false,
            }
        }
        (ElementData::PointerType { .. }, ElementData::NumericType { class, .. })
        | (ElementData::NumericType { class, .. }, ElementData::PointerType { .. }) => {
            // Pointers interchange with machine-word integers only.
            *class == NumberClass::Integer
                && size_of(map, lhs) == MACHINE_WORD
                && size_of(map, rhs) == MACHINE_WORD
        }
        (ElementData::CompositeType(lhs_data), ElementData::CompositeType(rhs_data))
        | (ElementData::TupleType(lhs_data), ElementData::TupleType(rhs_data)) => {
            lhs_data.base.name == rhs_data.base.name
        }
        (ElementData::BoolType { .. }, ElementData::BoolType { .. })
        | (ElementData::RuneType { .. }, ElementData::RuneType { .. })
        | (ElementData::StringType { .. }, ElementData::StringType { .. }) => true,
        _ => false,
    }
}

pub fn is_void(map: &ElementMap, id: ElementId) -> bool {
    matches!(
        &map[id].data,
        ElementData::NumericType { base, .. } if base.name == "u0"
    )
}

/// Compute field offsets, total size, and alignment for every composite and
/// tuple type in the map. Nested composites are laid out first; a cycle in
/// the value graph cannot be sized and is reported.
pub fn initialize_composite_types(map: &mut ElementMap, diags: &mut Diagnostics) -> bool {
    let composites: Vec<ElementId> = map
        .iter()
        .filter(|e| {
            matches!(
                e.kind(),
                ElementKind::CompositeType | ElementKind::TupleType
            )
        })
        .map(|e| e.id)
        .collect();

    let mut done: Vec<ElementId> = Vec::new();
    let mut in_progress: Vec<ElementId> = Vec::new();
    for id in composites {
        if !initialize_composite(map, id, &mut done, &mut in_progress, diags) {
            return false;
        }
    }
    true
}

fn initialize_composite(
    map: &mut ElementMap,
    id: ElementId,
    done: &mut Vec<ElementId>,
    in_progress: &mut Vec<ElementId>,
    diags: &mut Diagnostics,
) -> bool {
    if done.contains(&id) {
        return true;
    }
    if in_progress.contains(&id) {
        let span = map[id].span.clone();
        diags.error(
            X_UNSUPPORTED,
            format!("composite type `{}` contains itself by value", type_name(map, id)),
            Some(span),
        );
        return false;
    }
    in_progress.push(id);

    let Some(data) = map[id].as_composite().cloned() else {
        in_progress.retain(|x| *x != id);
        return true;
    };

    // Make sure every field's composite type is sized before ours.
    for &field in &data.fields {
        let Some(field_type) = field_type_of(map, field) else {
            continue;
        };
        if matches!(
            map[field_type].kind(),
            ElementKind::CompositeType | ElementKind::TupleType
        ) && !initialize_composite(map, field_type, done, in_progress, diags)
        {
            return false;
        }
    }

    let mut offset: u64 = 0;
    let mut max_size: u64 = 0;
    let mut max_align: u64 = 1;
    for &field in &data.fields {
        let (field_size, field_align) = match field_type_of(map, field) {
            Some(t) => (size_of(map, t), alignment_of(map, t).max(1)),
            None => (0, 1),
        };
        max_align = max_align.max(field_align);
        match data.kind {
            CompositeKind::Struct => {
                if !data.is_packed {
                    offset = align_up(offset, field_align);
                }
                if let Some(element) = map.get_mut(field) {
                    if let ElementData::Field { offset: slot, .. } = &mut element.data {
                        *slot = offset;
                    }
                }
                offset += field_size;
            }
            CompositeKind::Union => {
                max_size = max_size.max(field_size);
            }
            CompositeKind::Enum => {}
        }
    }

    let (size, alignment) = match data.kind {
        CompositeKind::Struct => (offset, align_up(max_align, MACHINE_WORD)),
        CompositeKind::Union => (max_size, align_up(max_align, MACHINE_WORD)),
        CompositeKind::Enum => (4, 4),
    };

    if let Some(base) = map.get_mut(id).and_then(|e| e.type_base_mut()) {
        base.size_in_bytes = size;
        base.alignment = alignment;
    }

    in_progress.retain(|x| *x != id);
    done.push(id);
    true
}

/// The concrete type of a field element, through its identifier.
pub fn field_type_of(map: &ElementMap, field: ElementId) -> Option<ElementId> {
    match &map.get(field)?.data {
        ElementData::Field { identifier, .. } => {
            let ident = map.get(*identifier)?.as_identifier()?;
            concrete_type(map, ident.type_ref?)
        }
        _ => None,
    }
}

pub fn field_offset_of(map: &ElementMap, field: ElementId) -> u64 {
    match &map[field].data {
        ElementData::Field { offset, .. } => *offset,
        _ => 0,
    }
}

pub fn field_name_of(map: &ElementMap, field: ElementId) -> Option<String> {
    match &map.get(field)?.data {
        ElementData::Field { identifier, .. } => map
            .get(*identifier)?
            .as_identifier()
            .map(|i| i.symbol.name.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowest_fit_boundaries() {
        assert_eq!(narrow_to_integer(255), "u8");
        assert_eq!(narrow_to_integer(256), "u16");
        assert_eq!(narrow_to_integer(-1), "s8");
        assert_eq!(narrow_to_integer(1 << 31), "s64");
        assert_eq!(narrow_to_integer((1 << 31) - 1), "s32");
        assert_eq!(narrow_to_integer(i128::from(u64::MAX)), "u64");
    }

    #[test]
    fn alignment_rounds_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 1), 9);
    }
}
