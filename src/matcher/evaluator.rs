//! Stateless, short-circuit evaluator for the matcher AST (§4.2, P3, P4).
//!
//! `eval` never mutates the [`Expr`] tree and touches nothing but the
//! message passed in, so the same compiled matcher can be evaluated
//! concurrently by every consumer task that holds it.

use uuid::Uuid;

use super::parser::{CompiledRegex, Expr, Header, Lhs, Op, Rhs};
use crate::message::Message;

/// A resolved left-hand-side value, typed the way §4.2 requires: string
/// headers and string/bytes fields compare as strings, numeric headers and
/// integer/double fields compare as doubles. `Missing` models "field absent
/// or sub-index out of bounds" (only possible for `Fields[...]`; fixed
/// headers always resolve, per Design Note (i) a numeric zero is
/// "present with value 0").
enum Resolved {
    Str(String),
    Num(f64),
    Missing,
}

fn resolve(lhs: &Lhs, message: &Message) -> Resolved {
    match lhs {
        Lhs::Header(Header::Uuid) => Resolved::Str(Uuid::from_bytes(message.uuid).to_string()),
        Lhs::Header(Header::Type) => Resolved::Str(message.msg_type.clone()),
        Lhs::Header(Header::Logger) => Resolved::Str(message.logger.clone()),
        Lhs::Header(Header::Payload) => Resolved::Str(message.payload.clone()),
        Lhs::Header(Header::EnvVersion) => Resolved::Str(message.env_version.clone()),
        Lhs::Header(Header::Hostname) => Resolved::Str(message.hostname.clone()),
        Lhs::Header(Header::Timestamp) => Resolved::Num(message.timestamp as f64),
        Lhs::Header(Header::Severity) => Resolved::Num(message.severity as f64),
        Lhs::Header(Header::Pid) => Resolved::Num(message.pid as f64),
        Lhs::Fields {
            name,
            occurrence,
            index,
        } => match message.find_field(name, *occurrence) {
            None => Resolved::Missing,
            Some(field) => {
                if let Some(n) = field.value.as_f64_at(*index) {
                    if matches!(
                        field.value,
                        crate::message::FieldValue::Integer(_) | crate::message::FieldValue::Double(_)
                    ) {
                        return Resolved::Num(n);
                    }
                }
                match field.value.as_string_at(*index) {
                    Some(s) => Resolved::Str(s),
                    None => Resolved::Missing,
                }
            }
        },
    }
}

fn compare(resolved: Resolved, op: Op, rhs: &Rhs) -> bool {
    match resolved {
        Resolved::Missing => match (op, rhs) {
            (Op::Eq, Rhs::Nil) => true,
            (Op::Ne, Rhs::Nil) => false,
            _ => false,
        },
        Resolved::Str(s) => match rhs {
            Rhs::Nil => matches!(op, Op::Ne),
            Rhs::Str(r) => match op {
                Op::Eq => s == *r,
                Op::Ne => s != *r,
                Op::Lt => s < *r,
                Op::Le => s <= *r,
                Op::Gt => s > *r,
                Op::Ge => s >= *r,
                Op::RegexMatch | Op::RegexNotMatch => false,
            },
            Rhs::Num(_) => false,
            Rhs::Regex(re) => match op {
                Op::RegexMatch => re.is_match(&s),
                Op::RegexNotMatch => !re.is_match(&s),
                _ => false,
            },
        },
        Resolved::Num(n) => match rhs {
            Rhs::Nil => matches!(op, Op::Ne),
            Rhs::Num(r) => match op {
                Op::Eq => n == *r,
                Op::Ne => n != *r,
                Op::Lt => n < *r,
                Op::Le => n <= *r,
                Op::Gt => n > *r,
                Op::Ge => n >= *r,
                Op::RegexMatch | Op::RegexNotMatch => false,
            },
            Rhs::Str(_) => false,
            Rhs::Regex(re) => {
                let text = format_num(n);
                match op {
                    Op::RegexMatch => re.is_match(&text),
                    Op::RegexNotMatch => !re.is_match(&text),
                    _ => false,
                }
            }
        },
    }
}

fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Evaluates `expr` against `message` with short-circuit `&&`/`||` (P4).
pub fn eval(expr: &Expr, message: &Message) -> bool {
    match expr {
        Expr::True => true,
        Expr::False => false,
        Expr::Not(inner) => !eval(inner, message),
        Expr::And(lhs, rhs) => eval(lhs, message) && eval(rhs, message),
        Expr::Or(lhs, rhs) => eval(lhs, message) || eval(rhs, message),
        Expr::Cmp { lhs, op, rhs } => compare(resolve(lhs, message), *op, rhs),
    }
}
