/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Recursive descent parser for filter queries and permission scopes.
//!
//! ```text
//! or    := and ((',' | 'or') and)*
//! and   := term ((';' | 'and') term)*
//! term  := '(' or ')' | path op value
//! value := word | quoted | '(' value (',' value)* ')'
//! ```

use super::predicate::{CompareOp, Predicate};
use crate::errors::{RepositoryError, Result};
use sindri_models::models::{Entity, FieldValue};

/// Parses `query` without checking its field names.
pub fn parse(query: &str) -> Result<Predicate> {
    let mut parser = Parser::new(query);
    parser.skip_ws();
    if parser.at_end() {
        return Err(parser.error("query is empty"));
    }
    let predicate = parser.parse_or()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error(&format!("unexpected input at position {}", parser.pos)));
    }
    Ok(predicate)
}

/// Parses `query` and rejects fields `T` does not expose.
pub fn parse_for<T: Entity>(query: &str) -> Result<Predicate> {
    let predicate = parse(query)?;
    if let Some(unknown) = predicate.fields().into_iter().find(|f| !T::supports_field(f)) {
        return Err(RepositoryError::InvalidQuery {
            query: query.to_string(),
            reason: format!("unknown field '{}' for {}", unknown, T::KIND),
        });
    }
    Ok(predicate)
}

enum Operand {
    Single(String),
    List(Vec<String>),
}

struct Parser<'q> {
    query: &'q str,
    chars: Vec<char>,
    pos: usize,
}

impl<'q> Parser<'q> {
    fn new(query: &'q str) -> Self {
        Parser {
            query,
            chars: query.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: &str) -> RepositoryError {
        RepositoryError::InvalidQuery {
            query: self.query.to_string(),
            reason: reason.to_string(),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        let len = s.chars().count();
        let matches = self.pos + len <= self.chars.len()
            && self.chars[self.pos..self.pos + len]
                .iter()
                .zip(s.chars())
                .all(|(a, b)| a.to_ascii_lowercase() == b);
        if matches {
            self.pos += len;
        }
        matches
    }

    /// Consumes `and`/`or` when followed by whitespace or a parenthesis.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let start = self.pos;
        if !self.eat_str(keyword) {
            return false;
        }
        match self.peek() {
            Some(c) if c.is_whitespace() || c == '(' => true,
            _ => {
                self.pos = start;
                false
            }
        }
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_and()?];
        loop {
            self.skip_ws();
            if self.eat(',') || self.eat_keyword("or") {
                terms.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(Predicate::any(terms))
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut terms = vec![self.parse_term()?];
        loop {
            self.skip_ws();
            if self.eat(';') || self.eat_keyword("and") {
                terms.push(self.parse_term()?);
            } else {
                break;
            }
        }
        Ok(Predicate::all(terms))
    }

    fn parse_term(&mut self) -> Result<Predicate> {
        self.skip_ws();
        if self.eat('(') {
            let inner = self.parse_or()?;
            self.skip_ws();
            if !self.eat(')') {
                return Err(self.error("missing closing parenthesis"));
            }
            return Ok(inner);
        }

        let field = self.read_field()?;
        self.skip_ws();
        let op = self.read_operator()?;
        self.skip_ws();
        let operand = self.read_operand()?;
        self.build(&field, op, operand)
    }

    fn read_field(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error(&format!("expected field name at position {}", start)));
        }
        Ok(self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .to_ascii_lowercase())
    }

    fn read_operator(&mut self) -> Result<&'static str> {
        const OPERATORS: &[&str] = &[
            "=in=", "=out=", "=gt=", "=ge=", "=lt=", "=le=", "=is=", "=not=", "==", "!=", ">=",
            "<=", ">", "<",
        ];
        for op in OPERATORS {
            if self.eat_str(op) {
                return Ok(op);
            }
        }
        Err(self.error(&format!("expected operator at position {}", self.pos)))
    }

    fn read_operand(&mut self) -> Result<Operand> {
        if self.eat('(') {
            let mut values = Vec::new();
            loop {
                self.skip_ws();
                values.push(self.read_value()?);
                self.skip_ws();
                if self.eat(')') {
                    break;
                }
                if !self.eat(',') {
                    return Err(self.error("expected ',' or ')' in value list"));
                }
            }
            return Ok(Operand::List(values));
        }
        Ok(Operand::Single(self.read_value()?))
    }

    fn read_value(&mut self) -> Result<String> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.pos += 1;
                let mut value = String::new();
                loop {
                    match self.peek() {
                        None => return Err(self.error("unterminated quoted value")),
                        Some('\\') => {
                            self.pos += 1;
                            match self.peek() {
                                Some(c) => value.push(c),
                                None => return Err(self.error("dangling escape")),
                            }
                            self.pos += 1;
                        }
                        Some(c) if c == quote => {
                            self.pos += 1;
                            return Ok(value);
                        }
                        Some(c) => {
                            value.push(c);
                            self.pos += 1;
                        }
                    }
                }
            }
            _ => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_whitespace() || "();,".contains(c) {
                        break;
                    }
                    self.pos += 1;
                }
                if start == self.pos {
                    return Err(self.error(&format!("expected value at position {}", start)));
                }
                Ok(self.chars[start..self.pos].iter().collect())
            }
        }
    }

    fn build(&self, field: &str, op: &str, operand: Operand) -> Result<Predicate> {
        let single = |operand: Operand| -> Result<FieldValue> {
            match operand {
                Operand::Single(v) => Ok(FieldValue::Str(v)),
                Operand::List(_) => Err(self.error(&format!("operator {} takes a single value", op))),
            }
        };
        let list = |operand: Operand| -> Vec<FieldValue> {
            match operand {
                Operand::Single(v) => vec![FieldValue::Str(v)],
                Operand::List(vs) => vs.into_iter().map(FieldValue::Str).collect(),
            }
        };
        let null_check = |operand: Operand| -> Result<()> {
            match operand {
                Operand::Single(v) if v.eq_ignore_ascii_case("null") => Ok(()),
                _ => Err(self.error(&format!("operator {} only accepts null", op))),
            }
        };

        Ok(match op {
            "==" => Predicate::equals(field, single(operand)?),
            "!=" => Predicate::not(Predicate::equals(field, single(operand)?)),
            "=in=" => Predicate::in_values(field, list(operand)),
            "=out=" => Predicate::not(Predicate::in_values(field, list(operand))),
            "=gt=" | ">" => Predicate::compare(field, CompareOp::Gt, single(operand)?),
            "=ge=" | ">=" => Predicate::compare(field, CompareOp::Ge, single(operand)?),
            "=lt=" | "<" => Predicate::compare(field, CompareOp::Lt, single(operand)?),
            "=le=" | "<=" => Predicate::compare(field, CompareOp::Le, single(operand)?),
            "=is=" => {
                null_check(operand)?;
                Predicate::is_null(field)
            }
            "=not=" => {
                null_check(operand)?;
                Predicate::not(Predicate::is_null(field))
            }
            other => return Err(self.error(&format!("unsupported operator {}", other))),
        })
    }
}
