//! Compilation entry point: strip comments, lex, parse, validate against the
//! project schema, lower. Deterministic by construction: the rule tree is
//! built from ordered containers only, so the same source always serializes
//! to the same bytes.

use triggr_common::{Result, TriggrError, MAX_DSL_SOURCE_BYTES};
use triggr_registry::EventDecl;

use crate::ast::CompiledTrigger;
use crate::lexer::{lex, strip_comments};
use crate::parser::parse;
use crate::validate::validate_and_lower;

pub fn compile(source: &str, schema: &[EventDecl]) -> Result<CompiledTrigger> {
    if source.len() > MAX_DSL_SOURCE_BYTES {
        return Err(TriggrError::validation(format!(
            "trigger source is {} bytes; maximum is {MAX_DSL_SOURCE_BYTES}",
            source.len()
        )));
    }

    let stripped = strip_comments(source)?;
    let tokens = lex(&stripped)?;
    let program = parse(tokens)?;
    let (tree, bound_event) = validate_and_lower(&program, schema)?;

    Ok(CompiledTrigger {
        tree,
        bound_event,
        stripped_source: stripped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use triggr_registry::ScalarType;

    fn schema() -> Vec<EventDecl> {
        vec![
            EventDecl {
                name: "ValueChanged".into(),
                fields: vec![
                    ("value".into(), ScalarType::U64),
                    ("who".into(), ScalarType::Account),
                    ("active".into(), ScalarType::Bool),
                ],
            },
            EventDecl {
                name: "Transferred".into(),
                fields: vec![("amount".into(), ScalarType::U128)],
            },
        ]
    }

    #[test]
    fn compiles_and_binds_single_event() {
        let compiled = compile(
            "fn main(events) { insert @transactions: { v: events.ValueChanged.value } }",
            &schema(),
        )
        .unwrap();
        assert_eq!(compiled.bound_event, "ValueChanged");
    }

    #[test]
    fn recompilation_is_bitwise_identical() {
        let src = r#"
            // record large transfers
            fn main(events) {
                if (events.Transferred.amount > 1000) {
                    insert @transfers: { amount: events.Transferred.amount }
                }
            }
        "#;
        let first = compile(src, &schema()).unwrap();
        let second = compile(src, &schema()).unwrap();
        assert_eq!(first.serialized_tree(), second.serialized_tree());
        assert_eq!(first.tree, second.tree);
    }

    #[test]
    fn unknown_event_rejected_with_line() {
        let err = compile(
            "fn main(events) {\n  insert @t: { x: events.Foo.bar }\n}",
            &schema(),
        )
        .unwrap_err();
        match err {
            TriggrError::Validation { message, line } => {
                assert!(message.contains("unknown event Foo"));
                assert_eq!(line, Some(2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_field_rejected() {
        let err = compile(
            "fn main(events) { insert @t: { x: events.ValueChanged.missing } }",
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field missing"));
    }

    #[test]
    fn multiple_events_rejected() {
        let err = compile(
            "fn main(events) { insert @t: { a: events.ValueChanged.value, b: events.Transferred.amount } }",
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiple events"));
    }

    #[test]
    fn legacy_event_form_resolves_via_const_header() {
        let compiled = compile(
            "const events = [ ValueChanged { value } ]\nfn main(events) { insert @t: { v: event.value } }",
            &schema(),
        )
        .unwrap();
        assert_eq!(compiled.bound_event, "ValueChanged");
    }

    #[test]
    fn legacy_form_without_header_rejected_on_multi_event_schema() {
        let err = compile(
            "fn main(events) { insert @t: { v: event.value } }",
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot determine"));
    }

    #[test]
    fn legacy_form_resolves_on_single_event_schema() {
        let single = vec![EventDecl {
            name: "ValueChanged".into(),
            fields: vec![("value".into(), ScalarType::U64)],
        }];
        let compiled = compile(
            "fn main(events) { insert @t: { v: event.value } }",
            &single,
        )
        .unwrap();
        assert_eq!(compiled.bound_event, "ValueChanged");
    }

    #[test]
    fn comparison_type_mismatch_rejected() {
        let err = compile(
            "fn main(events) { if (events.ValueChanged.value == \"high\") { delete @t:x } }",
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("type mismatch"));
    }

    #[test]
    fn boolean_ordering_rejected() {
        let err = compile(
            "fn main(events) { if (events.ValueChanged.active > true) { delete @t:x } }",
            &schema(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not defined for booleans"));
    }

    #[test]
    fn oversized_source_rejected() {
        let mut src = String::from("fn main(events) { } //");
        src.push_str(&"x".repeat(MAX_DSL_SOURCE_BYTES));
        let err = compile(&src, &schema()).unwrap_err();
        assert!(matches!(err, TriggrError::Validation { .. }));
    }

    #[test]
    fn stripped_source_is_persisted_form() {
        let compiled = compile(
            "fn main(events) { /* note */ insert @t: { v: 1 } }",
            &schema(),
        )
        .unwrap();
        assert!(!compiled.stripped_source.contains("note"));
        // Re-compiling the stripped form yields the same tree.
        let again = compile(&compiled.stripped_source, &schema()).unwrap();
        assert_eq!(compiled.serialized_tree(), again.serialized_tree());
    }
}
