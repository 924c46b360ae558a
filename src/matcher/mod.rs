//! Matcher specification language (§4.2).
//!
//! A `message_matcher` string compiles once, at plugin configuration time,
//! into an immutable boolean expression tree. Evaluation is pure and
//! re-entrant: the same compiled [`MatcherSpecification`] is shared by every
//! task that holds the plugin's [`crate::pack::Pack`] reference, and
//! evaluating it never mutates the compiled form (P3).
//!
//! The module is split the way a small expression-language implementation
//! usually is: [`lexer`] turns source text into tokens, [`parser`] builds a
//! boxed AST by recursive descent, and [`evaluator`] walks the AST against a
//! message with short-circuit `&&`/`||` (P4).

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::eval;
pub use parser::Expr;

use crate::error::MatcherError;
use crate::message::Message;

/// An immutable compiled predicate plus its original source text, used for
/// reporting (§3).
#[derive(Debug, Clone)]
pub struct MatcherSpecification {
    source: String,
    expr: Expr,
}

impl MatcherSpecification {
    /// Compiles `source` into a `MatcherSpecification`, or an error
    /// describing the first lexical, syntax, or semantic problem found.
    pub fn compile(source: &str) -> Result<Self, MatcherError> {
        let tokens = lexer::tokenize(source)?;
        let expr = parser::parse(&tokens)?;
        Ok(MatcherSpecification {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the compiled expression against `message`. Side-effect-free
    /// and safe to call concurrently from many tasks (P3).
    pub fn eval(&self, message: &Message) -> bool {
        evaluator::eval(&self.expr, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Field, FieldValue};

    fn msg_with_type(t: &str) -> Message {
        let mut m = Message::new();
        m.msg_type = t.to_string();
        m
    }

    #[test]
    fn route_by_type_scenario() {
        // End-to-end scenario 1: Type == 'nginx.access'
        let spec = MatcherSpecification::compile("Type == 'nginx.access'").unwrap();
        assert!(spec.eval(&msg_with_type("nginx.access")));
        assert!(!spec.eval(&msg_with_type("nginx.error")));
    }

    #[test]
    fn regex_on_dynamic_field_scenario() {
        // End-to-end scenario 6.
        let spec = MatcherSpecification::compile(r#"Fields[url] =~ /^\/api\//"#).unwrap();
        let mut accept = Message::new();
        accept.add_field(Field {
            name: "url".into(),
            representation: String::new(),
            value: FieldValue::String(vec!["/api/v1/x".into()]),
        });
        let mut reject = Message::new();
        reject.add_field(Field {
            name: "url".into(),
            representation: String::new(),
            value: FieldValue::String(vec!["/static".into()]),
        });
        assert!(spec.eval(&accept));
        assert!(!spec.eval(&reject));
    }

    #[test]
    fn nil_on_missing_field_boundary_behaviour() {
        let eq_nil = MatcherSpecification::compile("Fields[missing] == NIL").unwrap();
        let ne_nil = MatcherSpecification::compile("Fields[missing] != NIL").unwrap();
        let ordering = MatcherSpecification::compile("Fields[missing] > 1").unwrap();
        let m = Message::new();
        assert!(eq_nil.eval(&m));
        assert!(!ne_nil.eval(&m));
        assert!(!ordering.eval(&m));
    }

    #[test]
    fn nil_with_ordering_operator_is_compile_error() {
        assert!(MatcherSpecification::compile("Severity < NIL").is_err());
    }

    #[test]
    fn unknown_header_is_compile_error() {
        assert!(MatcherSpecification::compile("Bogus == 'x'").is_err());
    }
}
