use std::collections::HashMap;

use super::builder::ElementBuilder;
use super::element::{ElementData, ElementId, ElementMap, QualifiedSymbol};

/// Lexical scope services: the stack of open blocks during AST evaluation
/// plus name lookup over the finished scope tree. Derived pointer/array
/// types are memoized here so structurally equal types share identity.
pub struct ScopeManager {
    root: ElementId,
    stack: Vec<ElementId>,
    pointer_types: HashMap<ElementId, ElementId>,
    array_types: HashMap<(ElementId, u64), ElementId>,
}

impl ScopeManager {
    pub fn new(root: ElementId) -> Self {
        Self {
            root,
            stack: Vec::new(),
            pointer_types: HashMap::new(),
            array_types: HashMap::new(),
        }
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn push_scope(&mut self, block: ElementId) {
        self.stack.push(block);
    }

    pub fn pop_scope(&mut self) -> Option<ElementId> {
        self.stack.pop()
    }

    pub fn current_scope(&self) -> ElementId {
        self.stack.last().copied().unwrap_or(self.root)
    }

    fn scope_chain(&self, map: &ElementMap, from: ElementId) -> Vec<ElementId> {
        let mut chain = vec![from];
        let mut cursor = from;
        while let Some(parent) = map.get(cursor).and_then(|e| e.parent_scope) {
            chain.push(parent);
            cursor = parent;
        }
        if !chain.contains(&self.root) {
            chain.push(self.root);
        }
        chain
    }

    /// First matching declaration walking the scope chain outward. For a
    /// qualified symbol the first scope providing the leading namespace
    /// wins; resolution then commits to descending from there.
    pub fn find_identifier(
        &self,
        map: &ElementMap,
        symbol: &QualifiedSymbol,
        scope: Option<ElementId>,
    ) -> Option<ElementId> {
        let start = scope.unwrap_or_else(|| self.current_scope());
        for block in self.scope_chain(map, start) {
            if symbol.is_qualified() {
                if let Some(ns_scope) = descend_namespaces(map, block, &symbol.namespaces) {
                    return identifier_in_block(map, ns_scope, &symbol.name);
                }
            } else if let Some(found) = identifier_in_block(map, block, &symbol.name) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_type(
        &self,
        map: &ElementMap,
        symbol: &QualifiedSymbol,
        scope: Option<ElementId>,
    ) -> Option<ElementId> {
        let start = scope.unwrap_or_else(|| self.current_scope());
        for block in self.scope_chain(map, start) {
            if symbol.is_qualified() {
                if let Some(ns_scope) = descend_namespaces(map, block, &symbol.namespaces) {
                    return type_in_block(map, ns_scope, &symbol.name);
                }
            } else if let Some(found) = type_in_block(map, block, &symbol.name) {
                return Some(found);
            }
        }
        None
    }

    /// True iff `block` lies inside a procedure scope.
    pub fn within_local_scope(&self, map: &ElementMap, block: ElementId) -> bool {
        let mut cursor = Some(block);
        while let Some(current) = cursor {
            let Some(element) = map.get(current) else {
                return false;
            };
            if element.as_block().map(|b| b.has_stack_frame).unwrap_or(false) {
                return true;
            }
            cursor = element.parent_scope;
        }
        false
    }

    /// Innermost `with` receiver visible from `scope`, if any.
    pub fn find_with_receiver(&self, map: &ElementMap, scope: ElementId) -> Option<ElementId> {
        for block in self.scope_chain(map, scope) {
            if let Some(receiver) = map.get(block).and_then(|e| e.as_block()?.with_receiver) {
                return Some(receiver);
            }
        }
        None
    }

    pub fn existing_pointer_type(&self, base: ElementId) -> Option<ElementId> {
        self.pointer_types.get(&base).copied()
    }

    pub fn existing_array_type(&self, base: ElementId, size: u64) -> Option<ElementId> {
        self.array_types.get(&(base, size)).copied()
    }

    /// Memoized constructor: one pointer type per base type.
    pub fn find_pointer_type(
        &mut self,
        builder: &mut ElementBuilder,
        base: ElementId,
    ) -> ElementId {
        if let Some(existing) = self.pointer_types.get(&base) {
            return *existing;
        }
        let created = builder.make_pointer_type(self.root, base);
        builder.register_type(self.root, created);
        self.pointer_types.insert(base, created);
        created
    }

    /// Memoized constructor: one array type per (base, size) pair.
    pub fn find_array_type(
        &mut self,
        builder: &mut ElementBuilder,
        base: ElementId,
        size: u64,
    ) -> ElementId {
        if let Some(existing) = self.array_types.get(&(base, size)) {
            return *existing;
        }
        let created = builder.make_array_type(self.root, base, size);
        builder.register_type(self.root, created);
        self.array_types.insert((base, size), created);
        created
    }

    /// Identifier names visible from `scope`, for diagnostics suggestions.
    pub fn visible_identifier_names(&self, map: &ElementMap, scope: ElementId) -> Vec<String> {
        let mut names = Vec::new();
        for block in self.scope_chain(map, scope) {
            let Some(data) = map.get(block).and_then(|e| e.as_block()) else {
                continue;
            };
            for &ident in &data.identifiers {
                if let Some(identifier) = map.get(ident).and_then(|e| e.as_identifier()) {
                    names.push(identifier.symbol.name.clone());
                }
            }
        }
        names
    }
}

fn identifier_in_block(map: &ElementMap, block: ElementId, name: &str) -> Option<ElementId> {
    let data = map.get(block)?.as_block()?;
    data.identifiers.iter().copied().find(|&id| {
        map.get(id)
            .and_then(|e| e.as_identifier())
            .map(|i| i.symbol.name == name)
            .unwrap_or(false)
    })
}

fn type_in_block(map: &ElementMap, block: ElementId, name: &str) -> Option<ElementId> {
    let data = map.get(block)?.as_block()?;
    data.types.iter().copied().find(|&id| {
        map.get(id)
            .and_then(|e| e.type_base())
            .map(|b| b.name == name)
            .unwrap_or(false)
    })
}

/// Walk `namespaces` down from `block`, through identifiers bound to
/// namespace or module-reference initializers.
fn descend_namespaces(
    map: &ElementMap,
    block: ElementId,
    namespaces: &[String],
) -> Option<ElementId> {
    let mut scope = block;
    for component in namespaces {
        let ident = identifier_in_block(map, scope, component)?;
        scope = namespace_scope_of(map, ident)?;
    }
    Some(scope)
}

fn namespace_scope_of(map: &ElementMap, identifier: ElementId) -> Option<ElementId> {
    let data = map.get(identifier)?.as_identifier()?;
    let initializer = data.initializer?;
    let expression = match &map.get(initializer)?.data {
        ElementData::Initializer { expression } => (*expression)?,
        _ => initializer,
    };
    match &map.get(expression)?.data {
        ElementData::Namespace { scope, .. } => Some(*scope),
        ElementData::ModuleReference { module } => match &map.get((*module)?)?.data {
            ElementData::Module { scope, .. } => Some(*scope),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Span;
    use crate::sema::element::ElementData;

    fn setup() -> (ElementBuilder, ElementId) {
        let mut builder = ElementBuilder::default();
        let program = builder.make_program();
        let root = match &builder.elements()[program].data {
            ElementData::Program { block, .. } => *block,
            _ => unreachable!(),
        };
        (builder, root)
    }

    #[test]
    fn innermost_match_wins() {
        let (mut builder, root) = setup();
        let inner = builder.make_block(Some(root), false);
        builder.append_child_block(root, inner);

        let outer_ident = builder.make_identifier(
            root,
            Span::default(),
            QualifiedSymbol::flat("x"),
            None,
            None,
            false,
            false,
        );
        builder.append_identifier(root, outer_ident);
        let inner_ident = builder.make_identifier(
            inner,
            Span::default(),
            QualifiedSymbol::flat("x"),
            None,
            None,
            false,
            false,
        );
        builder.append_identifier(inner, inner_ident);

        let scopes = ScopeManager::new(root);
        let found = scopes.find_identifier(
            builder.elements(),
            &QualifiedSymbol::flat("x"),
            Some(inner),
        );
        assert_eq!(found, Some(inner_ident));
    }

    #[test]
    fn pointer_types_share_identity() {
        let (mut builder, root) = setup();
        let core = crate::sema::builder::CoreTypes::initialize(&mut builder, root);
        let mut scopes = ScopeManager::new(root);
        let u8_type = core.numeric("u8").expect("u8");
        let a = scopes.find_pointer_type(&mut builder, u8_type);
        let b = scopes.find_pointer_type(&mut builder, u8_type);
        assert_eq!(a, b);
        assert_eq!(scopes.existing_pointer_type(u8_type), Some(a));
    }

    #[test]
    fn local_scope_requires_stack_frame_ancestor() {
        let (mut builder, root) = setup();
        let frame = builder.make_block(Some(root), true);
        builder.append_child_block(root, frame);
        let nested = builder.make_block(Some(frame), false);
        builder.append_child_block(frame, nested);

        let scopes = ScopeManager::new(root);
        assert!(scopes.within_local_scope(builder.elements(), nested));
        assert!(!scopes.within_local_scope(builder.elements(), root));
    }
}
