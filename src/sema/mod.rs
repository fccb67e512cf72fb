pub mod builder;
pub mod element;
pub mod eval;
pub mod fold;
pub mod infer;
pub mod intern;
pub mod resolve;
pub mod scope;
pub mod types;
pub mod vars;

pub use builder::{CoreTypes, ElementBuilder};
pub use element::{Element, ElementId, ElementKind, ElementMap, QualifiedSymbol};
pub use scope::ScopeManager;
