use super::builder::CoreTypes;
use super::element::{BinaryOp, ElementData, ElementId, ElementMap, UnaryOp};
use super::scope::ScopeManager;
use super::types::{self, concrete_type, NumericTypeProperties};

/// Bottom-up, memo-free type inference. Pure: repeated calls return types
/// with identical identity and never allocate new elements; derived types
/// must already exist in the scope manager's memo tables (the resolver
/// materializes them before anything downstream infers).
pub struct TypeInference<'a> {
    pub map: &'a ElementMap,
    pub scopes: &'a ScopeManager,
    pub core: &'a CoreTypes,
}

impl TypeInference<'_> {
    pub fn infer(&self, id: ElementId) -> Option<ElementId> {
        let element = self.map.get(id)?;
        match &element.data {
            ElementData::IntegerLiteral { value } => self.core.narrowest_integer(*value),
            ElementData::FloatLiteral { value } => self.core.narrowest_float(*value),
            ElementData::BooleanLiteral { .. } => Some(self.core.bool_type),
            ElementData::StringLiteral { .. } => Some(self.core.string_type),
            ElementData::CharacterLiteral { .. } => Some(self.core.rune_type),
            ElementData::NilLiteral => {
                let void = self.core.void()?;
                self.scopes.existing_pointer_type(void)
            }
            ElementData::UninitializedLiteral => None,
            ElementData::Expression { root } => self.infer(*root),
            ElementData::Statement { expression, .. } => self.infer((*expression)?),
            ElementData::Initializer { expression } => self.infer((*expression)?),
            ElementData::Identifier(data) => concrete_type(self.map, data.type_ref?),
            ElementData::IdentifierReference { identifier, .. } => self.infer((*identifier)?),
            ElementData::Declaration { identifier, .. } => self.infer(*identifier),
            ElementData::Field { identifier, .. } => self.infer(*identifier),
            ElementData::UnaryOperator { op, operand } => match op {
                UnaryOp::Negate | UnaryOp::BinaryNot => self.infer(*operand),
                UnaryOp::LogicalNot => Some(self.core.bool_type),
                UnaryOp::AddressOf => {
                    let operand_type = self.infer(*operand)?;
                    self.scopes.existing_pointer_type(operand_type)
                }
                UnaryOp::Dereference => {
                    let operand_type = self.infer(*operand)?;
                    types::pointer_base(self.map, operand_type)
                }
            },
            ElementData::BinaryOperator { op, lhs, rhs } => match op {
                BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
                | BinaryOp::Exponent
                | BinaryOp::BinaryOr
                | BinaryOp::BinaryAnd
                | BinaryOp::BinaryXor
                | BinaryOp::ShiftLeft
                | BinaryOp::ShiftRight
                | BinaryOp::RotateLeft
                | BinaryOp::RotateRight => {
                    let lhs_type = self.infer(*lhs)?;
                    match self.infer(*rhs) {
                        Some(rhs_type) => Some(self.widen(lhs_type, rhs_type)),
                        None => Some(lhs_type),
                    }
                }
                BinaryOp::Equals
                | BinaryOp::NotEquals
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::LogicalOr
                | BinaryOp::LogicalAnd => Some(self.core.bool_type),
                BinaryOp::Subscript => {
                    let base = self.infer(*lhs)?;
                    types::array_entry(self.map, base)
                        .or_else(|| types::pointer_base(self.map, base))
                }
                BinaryOp::MemberAccess => self.infer(*rhs),
                BinaryOp::Assignment => self.infer(*lhs),
            },
            ElementData::Cast { type_ref, .. } | ElementData::Transmute { type_ref, .. } => {
                concrete_type(self.map, *type_ref)
            }
            ElementData::ProcCall { reference, .. } => {
                let proc_type = self.procedure_type_of(*reference)?;
                self.return_type_of(proc_type)
            }
            ElementData::Intrinsic { name, arguments } => match name.as_str() {
                "size_of" | "align_of" => self.core.numeric("u32"),
                "address_of" => {
                    let arg = self.first_argument(*arguments)?;
                    let arg_type = self.infer(arg)?;
                    self.scopes.existing_pointer_type(arg_type)
                }
                "range" => {
                    let arg = self.first_argument(*arguments)?;
                    self.infer(arg)
                }
                _ => None,
            },
            ElementData::Directive(directive) => match directive {
                super::element::DirectiveData::Run { expression } => self.infer(*expression),
                _ => None,
            },
            _ if element.is_type() => Some(id),
            ElementData::TypeReference {
                referenced_type, ..
            } => *referenced_type,
            _ => None,
        }
    }

    /// The callee's procedure type, through the resolved reference.
    pub fn procedure_type_of(&self, reference: ElementId) -> Option<ElementId> {
        let identifier = match &self.map.get(reference)?.data {
            ElementData::IdentifierReference { identifier, .. } => (*identifier)?,
            _ => reference,
        };
        let data = self.map.get(identifier)?.as_identifier()?;
        let type_id = concrete_type(self.map, data.type_ref?)?;
        match &self.map.get(type_id)?.data {
            ElementData::ProcedureType(_) => Some(type_id),
            _ => None,
        }
    }

    /// First return field's type; procedures without one yield `u0`.
    pub fn return_type_of(&self, proc_type: ElementId) -> Option<ElementId> {
        let data = self.map.get(proc_type)?.as_procedure()?;
        match data.return_field {
            Some(field) => types::field_type_of(self.map, field),
            None => self.core.void(),
        }
    }

    fn first_argument(&self, arguments: ElementId) -> Option<ElementId> {
        match &self.map.get(arguments)?.data {
            ElementData::ArgumentList { elements } => elements.first().copied(),
            _ => None,
        }
    }

    /// Left type widened to the right when both are numeric of one class.
    fn widen(&self, lhs: ElementId, rhs: ElementId) -> ElementId {
        let (Some(lhs_props), Some(rhs_props)) =
            (self.numeric_props(lhs), self.numeric_props(rhs))
        else {
            return lhs;
        };
        if lhs_props.class == rhs_props.class
            && rhs_props.size_in_bytes > lhs_props.size_in_bytes
        {
            rhs
        } else {
            lhs
        }
    }

    fn numeric_props(&self, type_id: ElementId) -> Option<&'static NumericTypeProperties> {
        match &self.map.get(type_id)?.data {
            ElementData::NumericType { base, .. } => types::numeric_properties(&base.name),
            _ => None,
        }
    }
}
