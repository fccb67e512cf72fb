use crate::vm::Section;

use super::element::{DirectiveData, ElementData, ElementId, ElementKind, ElementMap};
use super::scope::ScopeManager;
use super::types::concrete_type;

/// Module-scope identifiers grouped by the storage section they emit into.
#[derive(Debug, Default)]
pub struct IdentifiersBySection {
    pub bss: Vec<ElementId>,
    pub ro_data: Vec<ElementId>,
    pub data: Vec<ElementId>,
    pub text: Vec<ElementId>,
}

impl IdentifiersBySection {
    pub fn section(&self, section: Section) -> &[ElementId] {
        match section {
            Section::Bss => &self.bss,
            Section::RoData => &self.ro_data,
            Section::Data => &self.data,
            Section::Text => &self.text,
        }
    }

    /// Emission order: bss, ro_data, data, text.
    pub fn iter_sections(&self) -> impl Iterator<Item = (Section, &[ElementId])> {
        [
            (Section::Bss, self.bss.as_slice()),
            (Section::RoData, self.ro_data.as_slice()),
            (Section::Data, self.data.as_slice()),
            (Section::Text, self.text.as_slice()),
        ]
        .into_iter()
    }
}

/// Group every non-local identifier into its section. Identifiers bound to
/// types, namespaces, and modules carry no storage and are skipped, as are
/// composite fields (their storage belongs to the enclosing composite).
pub fn group_identifiers(map: &ElementMap, scopes: &ScopeManager) -> IdentifiersBySection {
    let mut out = IdentifiersBySection::default();

    for element in map.iter() {
        let Some(identifier) = element.as_identifier() else {
            continue;
        };
        let Some(parent_scope) = element.parent_scope else {
            continue;
        };
        if scopes.within_local_scope(map, parent_scope) {
            continue;
        }
        if element
            .parent_element
            .and_then(|p| map.get(p))
            .map(|p| p.kind() == ElementKind::Field)
            .unwrap_or(false)
        {
            continue;
        }

        let Some(type_id) = identifier.type_ref.and_then(|t| concrete_type(map, t)) else {
            continue;
        };
        let type_kind = map[type_id].kind();
        if matches!(
            type_kind,
            ElementKind::NamespaceType | ElementKind::ModuleType | ElementKind::UnknownType
        ) {
            continue;
        }

        if type_kind == ElementKind::ProcedureType {
            let is_foreign = map[type_id]
                .as_procedure()
                .map(|p| p.is_foreign)
                .unwrap_or(false);
            if !is_foreign {
                out.text.push(element.id);
            }
            continue;
        }

        let initializer_expr = identifier.initializer.and_then(|init| match &map[init].data {
            ElementData::Initializer { expression } => *expression,
            _ => Some(init),
        });

        if let Some(expr) = initializer_expr {
            match &map[expr].data {
                ElementData::Directive(DirectiveData::Type { .. }) => continue,
                ElementData::ProcedureType(_)
                | ElementData::CompositeType(_)
                | ElementData::TupleType(_)
                | ElementData::TypeReference { .. }
                | ElementData::ModuleReference { .. }
                | ElementData::Namespace { .. } => continue,
                ElementData::UninitializedLiteral => {
                    out.bss.push(element.id);
                    continue;
                }
                _ => {}
            }
        } else {
            out.bss.push(element.id);
            continue;
        }

        if identifier.is_constant {
            out.ro_data.push(element.id);
        } else {
            out.data.push(element.id);
        }
    }

    out
}
