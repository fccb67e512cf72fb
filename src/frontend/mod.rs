// Purpose: Frontend module hub exposing the parser-facing AST and diagnostics.
// Inputs/Outputs: Provides the node model consumed by the evaluator and the coded result type.
// Invariants: Public frontend API should remain a thin composition over specialized modules.
// Gotchas: The parser itself is an external collaborator; only its output shape lives here.

pub mod ast;
pub mod diagnostic;
pub mod suggest;
