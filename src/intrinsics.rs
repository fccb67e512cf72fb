use crate::frontend::ast::Span;
use crate::frontend::diagnostic::{Diagnostic, P_INTRINSIC_ARITY};

/// Compile-time intrinsics callable like procedures. The evaluator rewrites
/// calls to these names into intrinsic elements; everything else goes
/// through the regular call path.
#[derive(Clone, Copy, Debug)]
pub struct IntrinsicDef {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
}

pub const INTRINSICS: &[IntrinsicDef] = &[
    // range(start, stop, step, dir, kind) drives for-loop lowering; step,
    // dir, and kind are optional (defaults 1, ascending, exclusive).
    IntrinsicDef {
        name: "range",
        min_args: 2,
        max_args: 5,
    },
    IntrinsicDef {
        name: "size_of",
        min_args: 1,
        max_args: 1,
    },
    IntrinsicDef {
        name: "align_of",
        min_args: 1,
        max_args: 1,
    },
    IntrinsicDef {
        name: "address_of",
        min_args: 1,
        max_args: 1,
    },
];

pub fn find_intrinsic(name: &str) -> Option<&'static IntrinsicDef> {
    INTRINSICS.iter().find(|def| def.name == name)
}

pub fn arity_error(def: &IntrinsicDef, actual: usize, span: Span) -> Diagnostic {
    let expected = if def.min_args == def.max_args {
        format!("{}", def.min_args)
    } else {
        format!("{} to {}", def.min_args, def.max_args)
    };
    Diagnostic::new(
        format!(
            "intrinsic `{}` expects {} argument(s), found {}",
            def.name, expected, actual
        ),
        Some(span),
    )
    .code(P_INTRINSIC_ARITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_range_and_size_of() {
        assert!(find_intrinsic("range").is_some());
        assert!(find_intrinsic("size_of").is_some());
        assert!(find_intrinsic("not_an_intrinsic").is_none());
    }

    #[test]
    fn arity_error_carries_the_code() {
        let def = find_intrinsic("range").unwrap();
        let diag = arity_error(def, 1, Span::default());
        assert_eq!(diag.code, P_INTRINSIC_ARITY);
        assert!(diag.message.contains("2 to 5"));
    }
}
