//! Recursive-descent parser producing a boxed AST (§4.2).
//!
//! Mirrors the lexer → parser → boxed-AST → evaluator shape used elsewhere
//! in this codebase for small expression languages, but implements Heka's
//! own grammar rather than a SQL-like one: `or_expr`, `and_expr`, `unary`,
//! `primary`, `cmp` exactly as specified, with header identifiers and
//! `Fields[name][occurrence][index]` references on the left-hand side.

use regex::Regex;

use super::lexer::Token;
use crate::error::MatcherError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    Uuid,
    Type,
    Logger,
    Payload,
    EnvVersion,
    Hostname,
    Timestamp,
    Severity,
    Pid,
}

impl Header {
    fn from_ident(s: &str) -> Option<Header> {
        Some(match s {
            "Uuid" => Header::Uuid,
            "Type" => Header::Type,
            "Logger" => Header::Logger,
            "Payload" => Header::Payload,
            "EnvVersion" => Header::EnvVersion,
            "Hostname" => Header::Hostname,
            "Timestamp" => Header::Timestamp,
            "Severity" => Header::Severity,
            "Pid" => Header::Pid,
            _ => return None,
        })
    }

    /// Headers compared as doubles rather than strings (§4.2).
    pub fn is_numeric(self) -> bool {
        matches!(self, Header::Timestamp | Header::Severity | Header::Pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lhs {
    Header(Header),
    /// `Fields[name]`, optionally `[occurrence]` and `[occurrence][index]`.
    /// Defaults are occurrence 0, index 0.
    Fields {
        name: String,
        occurrence: usize,
        index: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexMatch,
    RegexNotMatch,
}

/// A compiled regex literal, optimized to a plain prefix/suffix check when
/// the pattern has no other metacharacters (§4.2).
#[derive(Debug, Clone)]
pub enum CompiledRegex {
    Prefix(String),
    Suffix(String),
    Full(Regex),
}

impl CompiledRegex {
    pub fn is_match(&self, haystack: &str) -> bool {
        match self {
            CompiledRegex::Prefix(p) => haystack.starts_with(p.as_str()),
            CompiledRegex::Suffix(s) => haystack.ends_with(s.as_str()),
            CompiledRegex::Full(re) => re.is_match(haystack),
        }
    }
}

fn is_plain_text(s: &str) -> bool {
    !s.chars().any(|c| "\\.+*?()|[]{}^$".contains(c))
}

fn compile_regex(pattern: &str) -> Result<CompiledRegex, MatcherError> {
    if let Some(rest) = pattern.strip_prefix('^') {
        if is_plain_text(rest) {
            return Ok(CompiledRegex::Prefix(rest.to_string()));
        }
    }
    if let Some(rest) = pattern.strip_suffix('$') {
        if !rest.starts_with('^') && is_plain_text(rest) {
            return Ok(CompiledRegex::Suffix(rest.to_string()));
        }
    }
    Regex::new(pattern)
        .map(CompiledRegex::Full)
        .map_err(|e| MatcherError::BadRegex(e.to_string()))
}

#[derive(Debug, Clone)]
pub enum Rhs {
    Str(String),
    Num(f64),
    Nil,
    Regex(CompiledRegex),
}

#[derive(Debug, Clone)]
pub enum Expr {
    True,
    False,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp { lhs: Lhs, op: Op, rhs: Rhs },
}

pub fn parse(tokens: &[Token]) -> Result<Expr, MatcherError> {
    let mut p = Parser { tokens, pos: 0 };
    let expr = p.parse_or()?;
    if p.pos != p.tokens.len() {
        return Err(MatcherError::Syntax(format!(
            "unexpected trailing token {:?}",
            p.tokens[p.pos]
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), MatcherError> {
        match self.bump() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(MatcherError::Syntax(format!("expected {tok:?}, found {t:?}"))),
            None => Err(MatcherError::Syntax(format!("expected {tok:?}, found end of input"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::OrOr)) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, MatcherError> {
        let mut lhs = self.parse_unary()?;
        while matches!(self.peek(), Some(Token::AndAnd)) {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, MatcherError> {
        if matches!(self.peek(), Some(Token::Bang)) {
            self.bump();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, MatcherError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.bump();
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::True) => {
                self.bump();
                Ok(Expr::True)
            }
            Some(Token::False) => {
                self.bump();
                Ok(Expr::False)
            }
            Some(_) => self.parse_cmp(),
            None => Err(MatcherError::Syntax("unexpected end of input".into())),
        }
    }

    fn parse_lhs(&mut self) -> Result<Lhs, MatcherError> {
        let ident = match self.bump() {
            Some(Token::Identifier(name)) => name.clone(),
            other => {
                return Err(MatcherError::Syntax(format!(
                    "expected identifier, found {other:?}"
                )))
            }
        };
        if ident == "Fields" {
            self.expect(&Token::LBracket)?;
            let name = match self.bump() {
                Some(Token::Identifier(n)) => n.clone(),
                Some(Token::Str(n)) => n.clone(),
                other => {
                    return Err(MatcherError::MalformedFields(format!(
                        "expected field name, found {other:?}"
                    )))
                }
            };
            self.expect(&Token::RBracket)?;
            let mut occurrence = 0usize;
            let mut index = 0usize;
            if matches!(self.peek(), Some(Token::LBracket)) {
                self.bump();
                occurrence = self.parse_index_int()?;
                self.expect(&Token::RBracket)?;
                if matches!(self.peek(), Some(Token::LBracket)) {
                    self.bump();
                    index = self.parse_index_int()?;
                    self.expect(&Token::RBracket)?;
                }
            }
            return Ok(Lhs::Fields {
                name,
                occurrence,
                index,
            });
        }
        Header::from_ident(&ident)
            .map(Lhs::Header)
            .ok_or(MatcherError::UnknownHeader(ident))
    }

    fn parse_index_int(&mut self) -> Result<usize, MatcherError> {
        match self.bump() {
            Some(Token::Int(n)) if *n >= 0 => Ok(*n as usize),
            other => Err(MatcherError::MalformedFields(format!(
                "expected non-negative integer index, found {other:?}"
            ))),
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, MatcherError> {
        let lhs = self.parse_lhs()?;
        let op = match self.bump() {
            Some(Token::Eq) => Op::Eq,
            Some(Token::Ne) => Op::Ne,
            Some(Token::Lt) => Op::Lt,
            Some(Token::Le) => Op::Le,
            Some(Token::Gt) => Op::Gt,
            Some(Token::Ge) => Op::Ge,
            Some(Token::RegexMatch) => Op::RegexMatch,
            Some(Token::RegexNotMatch) => Op::RegexNotMatch,
            other => {
                return Err(MatcherError::Syntax(format!(
                    "expected a comparison operator, found {other:?}"
                )))
            }
        };
        let rhs = match self.bump() {
            Some(Token::Str(s)) => Rhs::Str(s.clone()),
            Some(Token::Int(n)) => Rhs::Num(*n as f64),
            Some(Token::Float(f)) => Rhs::Num(*f),
            Some(Token::Nil) => Rhs::Nil,
            Some(Token::Regex(r)) => Rhs::Regex(compile_regex(r)?),
            other => {
                return Err(MatcherError::Syntax(format!(
                    "expected a value, found {other:?}"
                )))
            }
        };
        if matches!(rhs, Rhs::Nil) && !matches!(op, Op::Eq | Op::Ne) {
            return Err(MatcherError::NilMisuse);
        }
        if matches!(op, Op::RegexMatch | Op::RegexNotMatch) && !matches!(rhs, Rhs::Regex(_)) {
            return Err(MatcherError::Syntax(
                "=~ and !~ require a /regex/ literal".into(),
            ));
        }
        if matches!(rhs, Rhs::Regex(_)) && !matches!(op, Op::RegexMatch | Op::RegexNotMatch) {
            return Err(MatcherError::Syntax(
                "a /regex/ literal may only be used with =~ or !~".into(),
            ));
        }
        Ok(Expr::Cmp { lhs, op, rhs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::lexer::tokenize;

    fn parse_src(src: &str) -> Expr {
        parse(&tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn parses_and_or_precedence() {
        // && binds tighter than ||
        match parse_src("TRUE || FALSE && FALSE") {
            Expr::Or(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::True));
                assert!(matches!(*rhs, Expr::And(_, _)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_fields_with_two_indices() {
        match parse_src("Fields[url][1][2] == 'x'") {
            Expr::Cmp {
                lhs: Lhs::Fields { name, occurrence, index },
                ..
            } => {
                assert_eq!(name, "url");
                assert_eq!(occurrence, 1);
                assert_eq!(index, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn prefix_regex_is_optimized() {
        match parse_src("Payload =~ /^hello/") {
            Expr::Cmp {
                rhs: Rhs::Regex(CompiledRegex::Prefix(p)),
                ..
            } => assert_eq!(p, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn suffix_regex_is_optimized() {
        match parse_src("Payload =~ /world$/") {
            Expr::Cmp {
                rhs: Rhs::Regex(CompiledRegex::Suffix(s)),
                ..
            } => assert_eq!(s, "world"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn mixed_metacharacter_regex_is_not_optimized() {
        match parse_src(r#"Payload =~ /^a.b/"#) {
            Expr::Cmp {
                rhs: Rhs::Regex(CompiledRegex::Full(_)),
                ..
            } => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn nil_with_ordering_is_rejected() {
        assert!(matches!(
            parse(&tokenize("Severity < NIL").unwrap()),
            Err(MatcherError::NilMisuse)
        ));
    }

    #[test]
    fn unknown_header_is_rejected() {
        assert!(matches!(
            parse(&tokenize("Bogus == 'x'").unwrap()),
            Err(MatcherError::UnknownHeader(_))
        ));
    }
}
